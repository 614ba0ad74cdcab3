//! Domain data model — conversations, campaigns, reminders.
//!
//! Statuses are stored as TEXT in SQLite; every enum carries `as_str`
//! and `parse` so the store never round-trips through serde for a column.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Normalize a phone number to the digits-only form the provider uses as
/// `wa_id` (E.164 without the leading '+').
pub fn normalize_phone(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

// ─── Conversations ──────────────────────────────────────

/// Lifecycle of a WhatsApp conversation with one phone number.
/// At most one non-`Closed` conversation exists per number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    /// Created by us; customer has never messaged in.
    New,
    /// We sent a template outside the window and wait for a reply.
    AwaitingReply,
    /// Customer has messaged in; window fields are authoritative.
    Received,
    /// Terminal. Only operator action closes a conversation.
    Closed,
}

impl ConversationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::AwaitingReply => "awaiting_reply",
            Self::Received => "received",
            Self::Closed => "closed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "awaiting_reply" => Self::AwaitingReply,
            "received" => Self::Received,
            "closed" => Self::Closed,
            _ => Self::New,
        }
    }
}

/// State of the 24-hour customer service window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowStatus {
    /// Free-form text is allowed right now.
    Active,
    /// A template went out and no reply has arrived yet.
    AwaitingResponse,
    /// Window lapsed (or the customer never messaged in).
    Expired,
}

impl WindowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::AwaitingResponse => "awaiting_response",
            Self::Expired => "expired",
        }
    }
}

/// Who a conversation is attributed to in the customer directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Company,
    Branch,
    Unknown,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Company => "company",
            Self::Branch => "branch",
            Self::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "company" => Self::Company,
            "branch" => Self::Branch,
            _ => Self::Unknown,
        }
    }
}

/// One conversation with one phone number.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: i64,
    /// Normalized E.164 number without the leading '+'.
    pub phone_number: String,
    pub client_name: Option<String>,
    pub source_type: SourceType,
    pub company_id: Option<i64>,
    pub branch_id: Option<i64>,
    pub status: ConversationStatus,
    pub last_message_at: Option<DateTime<Utc>>,
    /// `last inbound + 24h`. Null until the first inbound message.
    /// Written exclusively by the window tracker.
    pub window_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Message direction relative to us.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }

    pub fn parse(s: &str) -> Self {
        if s == "outbound" { Self::Outbound } else { Self::Inbound }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Text,
    Template,
    Image,
    Video,
    Document,
    Location,
    /// Provider types we do not interpret; recorded with a null body.
    Unknown,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Template => "template",
            Self::Image => "image",
            Self::Video => "video",
            Self::Document => "document",
            Self::Location => "location",
            Self::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "text" => Self::Text,
            "template" => Self::Template,
            "image" => Self::Image,
            "video" => Self::Video,
            "document" => Self::Document,
            "location" => Self::Location,
            _ => Self::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Received,
    Sent,
    Failed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "sent" => Self::Sent,
            "failed" => Self::Failed,
            _ => Self::Received,
        }
    }
}

/// One message on a conversation. Append-only; the only post-insert
/// mutation is attaching the provider response after a send.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub conversation_id: i64,
    pub direction: Direction,
    pub message_type: MessageType,
    pub body: Option<String>,
    /// Provider message id (`wamid.…`).
    pub external_id: Option<String>,
    pub status: MessageStatus,
    /// Raw wire exchange kept for audit.
    pub request_payload: Option<serde_json::Value>,
    pub response_payload: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

// ─── Campaigns & triggers ──────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    Active,
    Archived,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Archived => "archived",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "active" => Self::Active,
            "archived" => Self::Archived,
            _ => Self::Draft,
        }
    }
}

/// Which time-based rule a trigger evaluates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignEventType {
    /// Menus created within the last `hours_after` hours.
    MenuCreated,
    /// Menus whose ordering deadline falls within the next `hours_before` hours.
    MenuClosing,
    /// No entities; only re-opens a conversation with the fixed template.
    InitialContact,
}

impl CampaignEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MenuCreated => "menu_created",
            Self::MenuClosing => "menu_closing",
            Self::InitialContact => "initial_contact",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "menu_created" => Some(Self::MenuCreated),
            "menu_closing" => Some(Self::MenuClosing),
            "initial_contact" => Some(Self::InitialContact),
            _ => None,
        }
    }

    /// The reminder event types a scheduler tick walks through.
    pub fn reminder_types() -> [Self; 2] {
        [Self::MenuCreated, Self::MenuClosing]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: i64,
    pub name: String,
    /// Only "whatsapp" today.
    pub channel: String,
    pub status: CampaignStatus,
    /// Message body with `{{menu_count}}` / `{{menus}}` placeholders.
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trigger {
    pub id: i64,
    pub campaign_id: i64,
    pub event_type: CampaignEventType,
    pub hours_before: i64,
    pub hours_after: i64,
    pub is_active: bool,
    /// Advisory telemetry — never used for mutual exclusion.
    pub last_executed_at: Option<DateTime<Utc>>,
    /// Run-lock timestamp; held while an executor run is in flight.
    pub locked_at: Option<DateTime<Utc>>,
}

// ─── Directory ──────────────────────────────────────

/// A menu is the entity reminders are about.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Menu {
    pub id: i64,
    pub title: String,
    pub active: bool,
    /// Date the menu is served (YYYY-MM-DD).
    pub publication_date: String,
    /// Ordering deadline.
    pub max_order_date: DateTime<Utc>,
    pub role_id: Option<i64>,
    pub permission_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// A reminder recipient resolved from the campaign audience.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub phone_number: String,
    pub source_type: SourceType,
    pub company_id: i64,
    pub branch_id: Option<i64>,
}

// ─── Reminder bookkeeping ──────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingStatus {
    WaitingResponse,
    Sent,
    Expired,
}

impl PendingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WaitingResponse => "waiting_response",
            Self::Sent => "sent",
            Self::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "sent" => Self::Sent,
            "expired" => Self::Expired,
            _ => Self::WaitingResponse,
        }
    }
}

/// Reminder content queued behind a closed window for one
/// (trigger, conversation) pair. At most one `WaitingResponse` row per pair;
/// new menus merge into `menu_ids` without re-rendering `message_content`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingNotification {
    pub id: i64,
    pub trigger_id: i64,
    pub conversation_id: i64,
    pub phone_number: String,
    pub message_content: String,
    /// Ordered, deduplicated menu ids covered by this batch.
    pub menu_ids: Vec<i64>,
    pub status: PendingStatus,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifiedStatus {
    Pending,
    Sent,
    Failed,
}

impl NotifiedStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "sent" => Self::Sent,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

/// Per-menu delivery ledger row. UNIQUE(trigger_id, menu_id, phone_number)
/// is the at-most-once guarantee; status never moves back to `Pending`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifiedMenu {
    pub id: i64,
    pub trigger_id: i64,
    pub menu_id: i64,
    pub phone_number: String,
    pub conversation_id: i64,
    pub status: NotifiedStatus,
    pub notified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

// ─── Executions ──────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Completed,
    CompletedWithErrors,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::CompletedWithErrors => "completed_with_errors",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "completed_with_errors" => Self::CompletedWithErrors,
            "failed" => Self::Failed,
            _ => Self::Completed,
        }
    }
}

/// Immutable audit record — exactly one per trigger run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignExecution {
    pub id: i64,
    pub campaign_id: i64,
    pub trigger_id: i64,
    pub executed_at: DateTime<Utc>,
    pub total_recipients: i64,
    pub sent_count: i64,
    pub failed_count: i64,
    pub status: ExecutionStatus,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

/// One normalized inbound message extracted from a webhook payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub from: String,
    pub contact_name: Option<String>,
    pub external_id: Option<String>,
    pub message_type: MessageType,
    pub body: Option<String>,
}

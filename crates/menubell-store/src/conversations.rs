//! Conversation and message repository.
//!
//! Window fields (`last_message_at`, `window_expires_at`) are written only
//! through `record_inbound_window`; everything else reads them. First-touch
//! fields use guarded conditional updates so concurrent writers cannot both
//! win.

use chrono::{Duration, Utc};
use menubell_core::types::{
    Conversation, ConversationStatus, Direction, Message, MessageStatus, MessageType, SourceType,
};
use menubell_core::{MenubellError, Result};
use rusqlite::{params, Row};

use crate::{parse_ts, parse_ts_opt, ts, Store};

/// Fields for a message append.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub conversation_id: i64,
    pub direction: Direction,
    pub message_type: MessageType,
    pub body: Option<String>,
    pub external_id: Option<String>,
    pub status: MessageStatus,
    pub request_payload: Option<serde_json::Value>,
    pub response_payload: Option<serde_json::Value>,
}

impl NewMessage {
    /// An inbound message as parsed from a webhook payload.
    pub fn inbound(conversation_id: i64, message_type: MessageType, body: Option<String>, external_id: Option<String>) -> Self {
        Self {
            conversation_id,
            direction: Direction::Inbound,
            message_type,
            body,
            external_id,
            status: MessageStatus::Received,
            request_payload: None,
            response_payload: None,
        }
    }

    /// An outbound message about to be handed to the provider.
    pub fn outbound(conversation_id: i64, message_type: MessageType, body: Option<String>) -> Self {
        Self {
            conversation_id,
            direction: Direction::Outbound,
            message_type,
            body,
            external_id: None,
            status: MessageStatus::Sent,
            request_payload: None,
            response_payload: None,
        }
    }
}

const CONVERSATION_COLS: &str =
    "id, phone_number, client_name, source_type, company_id, branch_id, status, last_message_at, window_expires_at, created_at";

fn row_to_conversation(row: &Row<'_>) -> rusqlite::Result<Conversation> {
    let status: String = row.get(6)?;
    let source: String = row.get(3)?;
    Ok(Conversation {
        id: row.get(0)?,
        phone_number: row.get(1)?,
        client_name: row.get(2)?,
        source_type: SourceType::parse(&source),
        company_id: row.get(4)?,
        branch_id: row.get(5)?,
        status: ConversationStatus::parse(&status),
        last_message_at: parse_ts_opt(row.get(7)?),
        window_expires_at: parse_ts_opt(row.get(8)?),
        created_at: parse_ts(&row.get::<_, String>(9)?),
    })
}

const MESSAGE_COLS: &str =
    "id, conversation_id, direction, message_type, body, external_id, status, request_payload, response_payload, created_at";

fn row_to_message(row: &Row<'_>) -> rusqlite::Result<Message> {
    let direction: String = row.get(2)?;
    let mtype: String = row.get(3)?;
    let status: String = row.get(6)?;
    let req: Option<String> = row.get(7)?;
    let resp: Option<String> = row.get(8)?;
    Ok(Message {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        direction: Direction::parse(&direction),
        message_type: MessageType::parse(&mtype),
        body: row.get(4)?,
        external_id: row.get(5)?,
        status: MessageStatus::parse(&status),
        request_payload: req.and_then(|s| serde_json::from_str(&s).ok()),
        response_payload: resp.and_then(|s| serde_json::from_str(&s).ok()),
        created_at: parse_ts(&row.get::<_, String>(9)?),
    })
}

impl Store {
    /// Find the unique non-closed conversation for a phone number.
    pub fn find_active_conversation(&self, phone: &str) -> Result<Option<Conversation>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {CONVERSATION_COLS} FROM conversations WHERE phone_number = ?1 AND status != 'closed'"
            ))
            .map_err(MenubellError::db)?;
        let mut rows = stmt
            .query_map(params![phone], row_to_conversation)
            .map_err(MenubellError::db)?;
        match rows.next() {
            Some(r) => Ok(Some(r.map_err(MenubellError::db)?)),
            None => Ok(None),
        }
    }

    pub fn get_conversation(&self, id: i64) -> Result<Conversation> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {CONVERSATION_COLS} FROM conversations WHERE id = ?1"),
            params![id],
            row_to_conversation,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => {
                MenubellError::NotFound(format!("conversation {id}"))
            }
            other => MenubellError::db(other),
        })
    }

    /// Create a conversation in state `new` with no window.
    pub fn create_conversation(
        &self,
        phone: &str,
        client_name: Option<&str>,
        source_type: SourceType,
        company_id: Option<i64>,
        branch_id: Option<i64>,
    ) -> Result<Conversation> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO conversations (phone_number, client_name, source_type, company_id, branch_id, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 'new', ?6)",
            params![phone, client_name, source_type.as_str(), company_id, branch_id, ts(Utc::now())],
        )
        .map_err(|e| MenubellError::db(format!("Create conversation: {e}")))?;
        let id = conn.last_insert_rowid();
        conn.query_row(
            &format!("SELECT {CONVERSATION_COLS} FROM conversations WHERE id = ?1"),
            params![id],
            row_to_conversation,
        )
        .map_err(MenubellError::db)
    }

    /// Advance the window on an inbound message: `received`, fresh
    /// `last_message_at`, expiry pushed to now + 24h. The single writer of
    /// `window_expires_at` in the whole system.
    pub fn record_inbound_window(&self, conversation_id: i64) -> Result<Conversation> {
        let now = Utc::now();
        let expires = now + Duration::hours(24);
        {
            let conn = self.lock()?;
            let changed = conn
                .execute(
                    "UPDATE conversations
                     SET status = 'received', last_message_at = ?1, window_expires_at = ?2
                     WHERE id = ?3 AND status != 'closed'",
                    params![ts(now), ts(expires), conversation_id],
                )
                .map_err(|e| MenubellError::db(format!("Record inbound: {e}")))?;
            if changed == 0 {
                return Err(MenubellError::NotFound(format!(
                    "open conversation {conversation_id}"
                )));
            }
        }
        self.get_conversation(conversation_id)
    }

    /// Flip to `awaiting_reply` after a template went out while the window
    /// was closed. Conditional update: only one of several concurrent
    /// writers observes a changed row.
    pub fn mark_awaiting_reply(&self, conversation_id: i64) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE conversations SET status = 'awaiting_reply'
                 WHERE id = ?1 AND status NOT IN ('awaiting_reply', 'closed')",
                params![conversation_id],
            )
            .map_err(|e| MenubellError::db(format!("Mark awaiting: {e}")))?;
        Ok(changed > 0)
    }

    /// First-touch contact name: set only while unset, one winner under
    /// concurrent writers.
    pub fn set_client_name_if_missing(&self, conversation_id: i64, name: &str) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE conversations SET client_name = ?1
                 WHERE id = ?2 AND client_name IS NULL",
                params![name, conversation_id],
            )
            .map_err(|e| MenubellError::db(format!("Set client name: {e}")))?;
        Ok(changed > 0)
    }

    /// Operator action; terminal. A later inbound from the same number
    /// opens a fresh conversation.
    pub fn close_conversation(&self, conversation_id: i64) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE conversations SET status = 'closed' WHERE id = ?1",
            params![conversation_id],
        )
        .map_err(|e| MenubellError::db(format!("Close conversation: {e}")))?;
        Ok(())
    }

    /// Whether the customer has ever messaged in on this conversation.
    pub fn has_inbound(&self, conversation_id: i64) -> Result<bool> {
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1 AND direction = 'inbound'",
                params![conversation_id],
                |r| r.get(0),
            )
            .map_err(MenubellError::db)?;
        Ok(count > 0)
    }

    /// Append a message row.
    pub fn append_message(&self, msg: NewMessage) -> Result<Message> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO messages (conversation_id, direction, message_type, body, external_id, status, request_payload, response_payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                msg.conversation_id,
                msg.direction.as_str(),
                msg.message_type.as_str(),
                msg.body,
                msg.external_id,
                msg.status.as_str(),
                msg.request_payload.map(|v| v.to_string()),
                msg.response_payload.map(|v| v.to_string()),
                ts(Utc::now()),
            ],
        )
        .map_err(|e| MenubellError::db(format!("Append message: {e}")))?;
        let id = conn.last_insert_rowid();
        conn.query_row(
            &format!("SELECT {MESSAGE_COLS} FROM messages WHERE id = ?1"),
            params![id],
            row_to_message,
        )
        .map_err(MenubellError::db)
    }

    /// Attach the provider wire exchange after a send. The only post-insert
    /// mutation messages ever see.
    pub fn attach_send_outcome(
        &self,
        message_id: i64,
        status: MessageStatus,
        external_id: Option<&str>,
        request_payload: &serde_json::Value,
        response_payload: &serde_json::Value,
    ) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE messages
             SET status = ?1, external_id = COALESCE(?2, external_id),
                 request_payload = ?3, response_payload = ?4
             WHERE id = ?5",
            params![
                status.as_str(),
                external_id,
                request_payload.to_string(),
                response_payload.to_string(),
                message_id
            ],
        )
        .map_err(|e| MenubellError::db(format!("Attach outcome: {e}")))?;
        Ok(())
    }

    pub fn messages_for(&self, conversation_id: i64) -> Result<Vec<Message>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {MESSAGE_COLS} FROM messages WHERE conversation_id = ?1 ORDER BY id"
            ))
            .map_err(MenubellError::db)?;
        let rows = stmt
            .query_map(params![conversation_id], row_to_message)
            .map_err(MenubellError::db)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(MenubellError::db)
    }
}

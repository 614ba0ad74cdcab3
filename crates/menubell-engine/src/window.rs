//! Conversation window state machine.
//!
//! WhatsApp allows free-form text only inside the 24 hours after the
//! customer's last message. This tracker owns every transition of that
//! window; no other component writes `window_expires_at`.
//!
//! ```text
//! New -(inbound)-> Received -(template while closed)-> AwaitingReply
//!      AwaitingReply -(inbound)-> Received
//!      Received -(24h elapse)-> Expired (logical, time-derived)
//!      any -(operator)-> Closed (terminal)
//! ```

use chrono::Utc;
use menubell_core::types::{
    normalize_phone, Conversation, ConversationStatus, MessageType, Recipient, SourceType,
    WindowStatus,
};
use menubell_core::Result;
use menubell_store::Store;

/// Stateless facade over the store's conversation rows.
pub struct WindowTracker<'a> {
    store: &'a Store,
}

impl<'a> WindowTracker<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Find the unique open conversation for a phone number, creating one
    /// in state `New` (no window) when absent. With `preview` set, an
    /// absent conversation is returned unsaved — callers that must not
    /// produce side effects (operator previews) use this mode.
    pub fn resolve_or_open(
        &self,
        phone: &str,
        owner: Option<&Recipient>,
        client_name: Option<&str>,
        preview: bool,
    ) -> Result<Conversation> {
        let phone = normalize_phone(phone);
        if let Some(existing) = self.store.find_active_conversation(&phone)? {
            return Ok(existing);
        }

        let (source_type, company_id, branch_id) = match owner {
            Some(r) => (r.source_type, Some(r.company_id), r.branch_id),
            None => (SourceType::Unknown, None, None),
        };

        if preview {
            return Ok(Conversation {
                id: 0,
                phone_number: phone.clone(),
                client_name: client_name.map(|s| s.to_string()),
                source_type,
                company_id,
                branch_id,
                status: ConversationStatus::New,
                last_message_at: None,
                window_expires_at: None,
                created_at: Utc::now(),
            });
        }

        tracing::debug!("Opening conversation for {phone} ({})", source_type.as_str());
        self.store
            .create_conversation(&phone, client_name, source_type, company_id, branch_id)
    }

    /// The customer messaged in: `Received`, window pushed to now + 24h.
    /// The only operation that extends the window.
    pub fn record_inbound(&self, conversation_id: i64) -> Result<Conversation> {
        self.store.record_inbound_window(conversation_id)
    }

    /// An outbound message left us. A template sent while the window was
    /// closed flips the conversation to `AwaitingReply`; ordinary text
    /// inside an open window changes nothing.
    pub fn record_outbound(
        &self,
        conversation_id: i64,
        message_type: MessageType,
        window_was_closed: bool,
    ) -> Result<()> {
        if message_type == MessageType::Template && window_was_closed {
            self.store.mark_awaiting_reply(conversation_id)?;
        }
        Ok(())
    }

    /// Derive the window state. `AwaitingResponse` while a template is
    /// outstanding with no reply, regardless of clock time; `Active` only
    /// with an unexpired window; `Expired` otherwise — including a
    /// conversation the customer never answered at all.
    pub fn window_status(&self, conversation: &Conversation) -> WindowStatus {
        if conversation.status == ConversationStatus::AwaitingReply {
            return WindowStatus::AwaitingResponse;
        }
        match conversation.window_expires_at {
            Some(expires) if expires > Utc::now() => WindowStatus::Active,
            _ => WindowStatus::Expired,
        }
    }

    /// Whether free-form text may be sent right now.
    pub fn is_text_allowed(&self, conversation: &Conversation) -> bool {
        self.window_status(conversation) == WindowStatus::Active
    }

    /// Operator action; terminal. The next inbound from this number opens
    /// a fresh conversation.
    pub fn close(&self, conversation_id: i64) -> Result<()> {
        self.store.close_conversation(conversation_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn tracker_fixture() -> Store {
        Store::open_in_memory().unwrap()
    }

    #[test]
    fn test_resolve_or_open_creates_new() {
        let store = tracker_fixture();
        let tracker = WindowTracker::new(&store);

        let c = tracker.resolve_or_open("56912345678", None, None, false).unwrap();
        assert_eq!(c.status, ConversationStatus::New);
        assert!(c.window_expires_at.is_none());

        let again = tracker.resolve_or_open("56912345678", None, None, false).unwrap();
        assert_eq!(again.id, c.id, "must reuse the open conversation");
    }

    #[test]
    fn test_resolve_normalizes_phone() {
        let store = tracker_fixture();
        let tracker = WindowTracker::new(&store);
        let c = tracker
            .resolve_or_open("+56 9 1234 5678", None, None, false)
            .unwrap();
        assert_eq!(c.phone_number, "56912345678");

        let again = tracker.resolve_or_open("56912345678", None, None, false).unwrap();
        assert_eq!(again.id, c.id);
    }

    #[test]
    fn test_preview_mode_has_no_side_effects() {
        let store = tracker_fixture();
        let tracker = WindowTracker::new(&store);

        let c = tracker.resolve_or_open("56912345678", None, None, true).unwrap();
        assert_eq!(c.id, 0);
        assert!(store.find_active_conversation("56912345678").unwrap().is_none());
    }

    #[test]
    fn test_inbound_activates_window() {
        let store = tracker_fixture();
        let tracker = WindowTracker::new(&store);
        let c = tracker.resolve_or_open("56912345678", None, None, false).unwrap();

        assert_eq!(tracker.window_status(&c), WindowStatus::Expired);

        let c = tracker.record_inbound(c.id).unwrap();
        assert_eq!(tracker.window_status(&c), WindowStatus::Active);
        assert!(tracker.is_text_allowed(&c));

        let expires = c.window_expires_at.unwrap();
        let expected = c.last_message_at.unwrap() + Duration::hours(24);
        assert_eq!(expires, expected);
    }

    #[test]
    fn test_expired_after_24h() {
        let store = tracker_fixture();
        let tracker = WindowTracker::new(&store);
        let c = tracker.resolve_or_open("56912345678", None, None, false).unwrap();
        let mut c = tracker.record_inbound(c.id).unwrap();

        // simulate the clock passing the expiry
        c.window_expires_at = Some(Utc::now() - Duration::minutes(1));
        assert_eq!(tracker.window_status(&c), WindowStatus::Expired);
    }

    #[test]
    fn test_template_while_closed_awaits_reply() {
        let store = tracker_fixture();
        let tracker = WindowTracker::new(&store);
        let c = tracker.resolve_or_open("56912345678", None, None, false).unwrap();

        tracker
            .record_outbound(c.id, MessageType::Template, true)
            .unwrap();
        let c = store.get_conversation(c.id).unwrap();
        assert_eq!(c.status, ConversationStatus::AwaitingReply);
        // awaiting a reply regardless of expiry
        assert_eq!(tracker.window_status(&c), WindowStatus::AwaitingResponse);

        // the reply re-opens the window
        let c = tracker.record_inbound(c.id).unwrap();
        assert_eq!(c.status, ConversationStatus::Received);
        assert_eq!(tracker.window_status(&c), WindowStatus::Active);
    }

    #[test]
    fn test_text_inside_window_keeps_status() {
        let store = tracker_fixture();
        let tracker = WindowTracker::new(&store);
        let c = tracker.resolve_or_open("56912345678", None, None, false).unwrap();
        let c = tracker.record_inbound(c.id).unwrap();

        tracker.record_outbound(c.id, MessageType::Text, false).unwrap();
        let c = store.get_conversation(c.id).unwrap();
        assert_eq!(c.status, ConversationStatus::Received);
    }

    #[test]
    fn test_closed_is_terminal_and_fresh_conversation_opens() {
        let store = tracker_fixture();
        let tracker = WindowTracker::new(&store);
        let c = tracker.resolve_or_open("56912345678", None, None, false).unwrap();
        tracker.close(c.id).unwrap();

        let fresh = tracker.resolve_or_open("56912345678", None, None, false).unwrap();
        assert_ne!(fresh.id, c.id);
        assert_eq!(fresh.status, ConversationStatus::New);
    }
}

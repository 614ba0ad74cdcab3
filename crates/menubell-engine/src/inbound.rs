//! Inbound webhook processing.
//!
//! Every customer message re-opens the 24-hour window and triggers
//! delivery of whatever reminders queued up while it was closed. One bad
//! entry never sinks the batch — it is logged and skipped.

use menubell_channels::parse_webhook_payload;
use menubell_core::config::RemindersConfig;
use menubell_core::types::{normalize_phone, InboundMessage};
use menubell_core::{MessageSender, Result};
use menubell_store::{NewMessage, Store};

use crate::pending::PendingProcessor;
use crate::window::WindowTracker;

/// Counters for one webhook batch.
#[derive(Debug, Default, Clone, PartialEq, Eq, serde::Serialize)]
pub struct InboundStats {
    pub received: usize,
    pub skipped: usize,
    pub flushed: usize,
}

pub struct InboundProcessor<'a> {
    store: &'a Store,
    sender: &'a dyn MessageSender,
    config: &'a RemindersConfig,
}

impl<'a> InboundProcessor<'a> {
    pub fn new(store: &'a Store, sender: &'a dyn MessageSender, config: &'a RemindersConfig) -> Self {
        Self {
            store,
            sender,
            config,
        }
    }

    /// Parse a raw provider payload and ingest every message in it.
    pub async fn process(&self, payload: &serde_json::Value) -> Result<InboundStats> {
        let messages = parse_webhook_payload(payload);
        let mut stats = InboundStats::default();

        for message in &messages {
            match self.handle_message(message).await {
                Ok(flushed) => {
                    stats.received += 1;
                    stats.flushed += flushed;
                }
                Err(e) => {
                    tracing::warn!("Skipping inbound message from {}: {e}", message.from);
                    stats.skipped += 1;
                }
            }
        }

        if stats.received > 0 {
            tracing::info!(
                "📥 Webhook batch: {} received, {} skipped, {} pending flushed",
                stats.received,
                stats.skipped,
                stats.flushed
            );
        }
        Ok(stats)
    }

    async fn handle_message(&self, message: &InboundMessage) -> Result<usize> {
        let tracker = WindowTracker::new(self.store);
        let phone = normalize_phone(&message.from);

        let conversation = match self.store.find_active_conversation(&phone)? {
            Some(c) => c,
            // attribute to the directory owner when the number is known,
            // otherwise record an unknown contact
            None => {
                let owner = self.store.resolve_phone_owner(&phone)?;
                tracker.resolve_or_open(
                    &phone,
                    owner.as_ref(),
                    message.contact_name.as_deref(),
                    false,
                )?
            }
        };

        if let Some(name) = &message.contact_name {
            self.store.set_client_name_if_missing(conversation.id, name)?;
        }

        tracker.record_inbound(conversation.id)?;
        self.store.append_message(NewMessage::inbound(
            conversation.id,
            message.message_type,
            message.body.clone(),
            message.external_id.clone(),
        ))?;

        // anything queued while the window was closed goes out now
        let processor = PendingProcessor::new(self.store, self.sender, self.config);
        processor.flush(conversation.id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockSender;
    use menubell_core::types::{
        CampaignEventType, CampaignStatus, ConversationStatus, Direction, MessageType,
        NotifiedStatus, SourceType, WindowStatus,
    };
    use menubell_core::OutboundPayload;

    const PHONE: &str = "5712345678";

    fn webhook_payload(from: &str, body: &str) -> serde_json::Value {
        serde_json::json!({
            "entry": [{
                "changes": [{
                    "field": "messages",
                    "value": {
                        "contacts": [{ "wa_id": from, "profile": { "name": "Cliente" } }],
                        "messages": [{
                            "from": from,
                            "id": "wamid.test",
                            "type": "text",
                            "text": { "body": body }
                        }]
                    }
                }]
            }]
        })
    }

    #[tokio::test]
    async fn test_inbound_opens_conversation_and_window() {
        let store = Store::open_in_memory().unwrap();
        let sender = MockSender::new();
        let config = RemindersConfig::default();
        let processor = InboundProcessor::new(&store, &sender, &config);

        let stats = processor.process(&webhook_payload(PHONE, "hola")).await.unwrap();
        assert_eq!(stats.received, 1);

        let conversation = store.find_active_conversation(PHONE).unwrap().unwrap();
        assert_eq!(conversation.status, ConversationStatus::Received);
        assert_eq!(conversation.client_name.as_deref(), Some("Cliente"));
        assert_eq!(conversation.source_type, SourceType::Unknown);

        let tracker = WindowTracker::new(&store);
        assert_eq!(tracker.window_status(&conversation), WindowStatus::Active);

        let messages = store.messages_for(conversation.id).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].direction, Direction::Inbound);
        assert_eq!(messages[0].body.as_deref(), Some("hola"));
    }

    #[tokio::test]
    async fn test_known_phone_attributed_to_branch() {
        let store = Store::open_in_memory().unwrap();
        let company = store.create_company("C", Some("56900000001")).unwrap();
        let branch = store.create_branch(company, "B", Some(PHONE)).unwrap();

        let sender = MockSender::new();
        let config = RemindersConfig::default();
        let processor = InboundProcessor::new(&store, &sender, &config);
        processor.process(&webhook_payload(PHONE, "hola")).await.unwrap();

        let conversation = store.find_active_conversation(PHONE).unwrap().unwrap();
        assert_eq!(conversation.source_type, SourceType::Branch);
        assert_eq!(conversation.branch_id, Some(branch));
        assert_eq!(conversation.company_id, Some(company));
    }

    // Scenario B end-to-end: queued reminder flushes on the reply
    #[tokio::test]
    async fn test_inbound_flushes_queued_reminder() {
        let store = Store::open_in_memory().unwrap();
        let campaign = store
            .create_campaign("c", CampaignStatus::Active, "{{menus}}")
            .unwrap();
        let trigger = store
            .create_trigger(campaign.id, CampaignEventType::MenuCreated, 0, 24)
            .unwrap();
        let conversation = store
            .create_conversation(PHONE, None, SourceType::Unknown, None, None)
            .unwrap();
        store
            .enqueue_pending(trigger.id, conversation.id, PHONE, "Menu Lunes", &[10])
            .unwrap();
        store
            .record_notified(trigger.id, 10, PHONE, conversation.id, NotifiedStatus::Pending)
            .unwrap();

        let sender = MockSender::new();
        let config = RemindersConfig::default();
        let processor = InboundProcessor::new(&store, &sender, &config);
        let stats = processor.process(&webhook_payload(PHONE, "hola")).await.unwrap();
        assert_eq!(stats.flushed, 1);

        // inbound + flushed reminder text
        let messages = store.messages_for(conversation.id).unwrap();
        assert_eq!(messages.len(), 2);
        let outbound: Vec<_> = messages
            .iter()
            .filter(|m| m.direction == Direction::Outbound)
            .collect();
        assert_eq!(outbound.len(), 1);
        assert_eq!(outbound[0].message_type, MessageType::Text);
        assert_eq!(outbound[0].body.as_deref(), Some("Menu Lunes"));

        let payloads = sender.sent_to(PHONE);
        assert!(matches!(&payloads[0], OutboundPayload::Text { body } if body == "Menu Lunes"));

        let pending = store.all_waiting_pending().unwrap();
        assert!(pending.is_empty());
        let rows = store.notified_rows(trigger.id, PHONE).unwrap();
        assert_eq!(rows[0].status, NotifiedStatus::Sent);
    }

    #[tokio::test]
    async fn test_unknown_type_recorded_with_null_body() {
        let store = Store::open_in_memory().unwrap();
        let sender = MockSender::new();
        let config = RemindersConfig::default();
        let processor = InboundProcessor::new(&store, &sender, &config);

        let payload = serde_json::json!({
            "entry": [{
                "changes": [{
                    "field": "messages",
                    "value": {
                        "messages": [{
                            "from": PHONE,
                            "id": "wamid.stk",
                            "type": "sticker",
                            "sticker": { "id": "m1" }
                        }]
                    }
                }]
            }]
        });
        let stats = processor.process(&payload).await.unwrap();
        assert_eq!(stats.received, 1);

        let conversation = store.find_active_conversation(PHONE).unwrap().unwrap();
        let messages = store.messages_for(conversation.id).unwrap();
        assert_eq!(messages[0].message_type, MessageType::Unknown);
        assert!(messages[0].body.is_none());
        // an unreadable message still re-opens the window
        assert!(conversation.window_expires_at.is_some());
    }

    #[tokio::test]
    async fn test_malformed_payload_is_not_fatal() {
        let store = Store::open_in_memory().unwrap();
        let sender = MockSender::new();
        let config = RemindersConfig::default();
        let processor = InboundProcessor::new(&store, &sender, &config);

        let stats = processor
            .process(&serde_json::json!({"entry": "garbage"}))
            .await
            .unwrap();
        assert_eq!(stats.received, 0);
        assert_eq!(stats.skipped, 0);
    }

    #[tokio::test]
    async fn test_reply_after_template_resumes_cycle() {
        // full AwaitingReply -> inbound -> Received transition
        let store = Store::open_in_memory().unwrap();
        let conversation = store
            .create_conversation(PHONE, None, SourceType::Unknown, None, None)
            .unwrap();
        store.mark_awaiting_reply(conversation.id).unwrap();

        let sender = MockSender::new();
        let config = RemindersConfig::default();
        let processor = InboundProcessor::new(&store, &sender, &config);
        processor.process(&webhook_payload(PHONE, "si, quiero")).await.unwrap();

        let conversation = store.get_conversation(conversation.id).unwrap();
        assert_eq!(conversation.status, ConversationStatus::Received);

        let tracker = WindowTracker::new(&store);
        assert_eq!(tracker.window_status(&conversation), WindowStatus::Active);
    }
}

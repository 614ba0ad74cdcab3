//! Pending-notification processing: flush on window reopen, expire on TTL.
//!
//! A pending batch lives on a (trigger, conversation) pair while the
//! customer has not replied. The moment an inbound message arrives the
//! batch is delivered as plain text; batches nobody ever answers are
//! expired by the periodic sweep, flipping their ledger rows to `failed`.

use chrono::{Duration, Utc};
use menubell_core::config::RemindersConfig;
use menubell_core::types::{
    ConversationStatus, MessageStatus, MessageType, NotifiedStatus, PendingNotification,
};
use menubell_core::{MenubellError, MessageSender, OutboundPayload, Result};
use menubell_store::{NewMessage, Store};

/// Counters returned by the sweep — mirrors what operators see in logs.
#[derive(Debug, Default, Clone, PartialEq, Eq, serde::Serialize)]
pub struct SweepStats {
    pub total_checked: usize,
    pub sent: usize,
    pub expired: usize,
    pub unchanged: usize,
}

pub struct PendingProcessor<'a> {
    store: &'a Store,
    sender: &'a dyn MessageSender,
    config: &'a RemindersConfig,
}

impl<'a> PendingProcessor<'a> {
    pub fn new(store: &'a Store, sender: &'a dyn MessageSender, config: &'a RemindersConfig) -> Self {
        Self {
            store,
            sender,
            config,
        }
    }

    /// Deliver every waiting batch on a conversation whose window just
    /// reopened. A failed send leaves the batch waiting — it is retried on
    /// the next inbound or eventually expired.
    pub async fn flush(&self, conversation_id: i64) -> Result<usize> {
        let waiting = self.store.waiting_pending_for_conversation(conversation_id)?;
        let mut delivered = 0;
        for pending in waiting {
            if self.deliver(&pending).await? {
                delivered += 1;
            }
        }
        Ok(delivered)
    }

    /// Terminal: expire one batch and fail its owed ledger rows. A later
    /// trigger run re-evaluates eligibility independently.
    pub fn expire(&self, pending: &PendingNotification) -> Result<()> {
        if self.store.mark_pending_expired(pending.id)? {
            self.store.resolve_notified_batch(
                pending.trigger_id,
                &pending.phone_number,
                &pending.menu_ids,
                NotifiedStatus::Failed,
            )?;
            tracing::info!(
                "Pending {} expired ({} menus owed to {})",
                pending.id,
                pending.menu_ids.len(),
                pending.phone_number
            );
        }
        Ok(())
    }

    /// Walk every waiting batch: deliver where the customer replied,
    /// expire the unanswered ones past the TTL (and any whose conversation
    /// vanished or was closed), leave the rest.
    pub async fn check_all(&self) -> Result<SweepStats> {
        let ttl = Duration::hours(self.config.pending_expiration_hours);
        let mut stats = SweepStats::default();

        for pending in self.store.all_waiting_pending()? {
            stats.total_checked += 1;

            let conversation = match self.store.get_conversation(pending.conversation_id) {
                Ok(c) => c,
                Err(MenubellError::NotFound(_)) => {
                    self.expire(&pending)?;
                    stats.expired += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };

            if conversation.status == ConversationStatus::Closed {
                self.expire(&pending)?;
                stats.expired += 1;
                continue;
            }

            if self.store.has_inbound(conversation.id)? {
                if self.deliver(&pending).await? {
                    stats.sent += 1;
                } else {
                    stats.unchanged += 1;
                }
                continue;
            }

            if pending.created_at + ttl <= Utc::now() {
                self.expire(&pending)?;
                stats.expired += 1;
            } else {
                stats.unchanged += 1;
            }
        }

        tracing::info!(
            "🔎 Pending sweep: {} checked, {} sent, {} expired, {} unchanged",
            stats.total_checked,
            stats.sent,
            stats.expired,
            stats.unchanged
        );
        Ok(stats)
    }

    /// Send the stored content as outbound text and resolve the batch.
    async fn deliver(&self, pending: &PendingNotification) -> Result<bool> {
        let message = self.store.append_message(NewMessage::outbound(
            pending.conversation_id,
            MessageType::Text,
            Some(pending.message_content.clone()),
        ))?;

        let outcome = self
            .sender
            .send(
                &pending.phone_number,
                OutboundPayload::Text {
                    body: pending.message_content.clone(),
                },
            )
            .await?;

        let status = if outcome.success {
            MessageStatus::Sent
        } else {
            MessageStatus::Failed
        };
        self.store.attach_send_outcome(
            message.id,
            status,
            outcome.external_id.as_deref(),
            &outcome.request_payload,
            &outcome.response_payload,
        )?;

        if !outcome.success {
            tracing::warn!(
                "Pending {} delivery failed for {}, will retry",
                pending.id,
                pending.phone_number
            );
            return Ok(false);
        }

        self.store.mark_pending_sent(pending.id)?;
        self.store.resolve_notified_batch(
            pending.trigger_id,
            &pending.phone_number,
            &pending.menu_ids,
            NotifiedStatus::Sent,
        )?;
        tracing::debug!(
            "Pending {} delivered to {} ({} menus)",
            pending.id,
            pending.phone_number,
            pending.menu_ids.len()
        );
        Ok(true)
    }
}

//! Campaign executor — one trigger-run from eligibility to audit record.
//!
//! A run never lets one recipient's failure abort the rest; only
//! strategy/audience resolution and channel misconfiguration are run-fatal.
//! Overlapping runs of the same trigger are excluded by a CAS run-lock, and
//! the notified-menu ledger guarantees at-most-once per (trigger, menu,
//! phone) even if that lock is ever bypassed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use menubell_core::config::RemindersConfig;
use menubell_core::types::{
    Campaign, CampaignExecution, ConversationStatus, ExecutionStatus, Menu, MessageStatus,
    MessageType, NotifiedStatus, Recipient, Trigger, WindowStatus,
};
use menubell_core::{MenubellError, MessageSender, OutboundPayload, Result};
use menubell_store::{NewMessage, Store};

use crate::strategies::{strategy_for, ReminderStrategy};
use crate::window::WindowTracker;

/// Result of asking the executor to run a trigger.
#[derive(Debug)]
pub enum RunOutcome {
    Executed(CampaignExecution),
    /// Another run holds the lock; nothing was written.
    AlreadyRunning,
}

enum RecipientOutcome {
    Sent,
    Deferred,
    Failed,
    Skipped,
}

pub struct CampaignExecutor<'a> {
    store: &'a Store,
    sender: &'a dyn MessageSender,
    config: &'a RemindersConfig,
    shutdown: Arc<AtomicBool>,
}

impl<'a> CampaignExecutor<'a> {
    pub fn new(
        store: &'a Store,
        sender: &'a dyn MessageSender,
        config: &'a RemindersConfig,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            store,
            sender,
            config,
            shutdown,
        }
    }

    /// Run one trigger. Exactly one `CampaignExecution` row is written per
    /// executed run; a held lock produces `AlreadyRunning` and no row.
    pub async fn run(&self, trigger_id: i64) -> Result<RunOutcome> {
        let trigger = self.store.get_trigger(trigger_id)?;
        let campaign = self.store.get_campaign(trigger.campaign_id)?;

        if !self
            .store
            .try_lock_trigger(trigger.id, self.config.run_lock_stale_secs)?
        {
            tracing::info!(
                "Trigger {} already running, skipping ({})",
                trigger.id,
                trigger.event_type.as_str()
            );
            return Ok(RunOutcome::AlreadyRunning);
        }

        let result = self.run_locked(&trigger, &campaign).await;
        self.store.unlock_trigger(trigger.id)?;

        let execution = match result {
            Ok(execution) => execution,
            // run-fatal: record the failure, nothing else written
            Err(e) => {
                tracing::error!("Trigger {} run failed: {e}", trigger.id);
                self.store.insert_execution(
                    campaign.id,
                    trigger.id,
                    Utc::now(),
                    0,
                    0,
                    0,
                    ExecutionStatus::Failed,
                    Some(&e.to_string()),
                )?
            }
        };
        self.store.touch_last_executed(trigger.id)?;
        Ok(RunOutcome::Executed(execution))
    }

    async fn run_locked(&self, trigger: &Trigger, campaign: &Campaign) -> Result<CampaignExecution> {
        let executed_at = Utc::now();
        let strategy = strategy_for(trigger.event_type);

        let role_ids = self.store.audience_role_ids(campaign.id)?;
        let permission_ids = self.store.audience_permission_ids(campaign.id)?;
        let menus = strategy.eligible_menus(
            self.store,
            self.config,
            trigger,
            &role_ids,
            &permission_ids,
            executed_at,
        )?;

        if menus.is_empty() && trigger.event_type != menubell_core::types::CampaignEventType::InitialContact {
            tracing::debug!("Trigger {}: no eligible menus", trigger.id);
            return self.store.insert_execution(
                campaign.id,
                trigger.id,
                executed_at,
                0,
                0,
                0,
                ExecutionStatus::Completed,
                None,
            );
        }

        let recipients = self.store.campaign_recipients(campaign.id)?;
        if recipients.is_empty() {
            return self.store.insert_execution(
                campaign.id,
                trigger.id,
                executed_at,
                0,
                0,
                0,
                ExecutionStatus::Completed,
                None,
            );
        }

        let mut sent_count: i64 = 0;
        let mut failed_count: i64 = 0;

        for recipient in &recipients {
            // a shutdown request is honored between recipients, never mid-send
            if self.shutdown.load(Ordering::Relaxed) {
                tracing::warn!("Trigger {}: shutdown requested, stopping run", trigger.id);
                break;
            }

            match self
                .process_recipient(trigger, campaign, strategy, recipient, &menus)
                .await
            {
                Ok(RecipientOutcome::Sent) => sent_count += 1,
                Ok(RecipientOutcome::Failed) => failed_count += 1,
                Ok(RecipientOutcome::Deferred | RecipientOutcome::Skipped) => {}
                // Config errors bubble out of the sender as Err — run-fatal
                Err(e @ MenubellError::Config(_)) => return Err(e),
                Err(e) => {
                    tracing::error!(
                        "Trigger {}: recipient {} failed: {e}",
                        trigger.id,
                        recipient.phone_number
                    );
                    failed_count += 1;
                }
            }
        }

        let status = if failed_count > 0 {
            ExecutionStatus::CompletedWithErrors
        } else {
            ExecutionStatus::Completed
        };
        tracing::info!(
            "📣 Trigger {} ({}) done: {} recipients, {} sent, {} failed",
            trigger.id,
            trigger.event_type.as_str(),
            recipients.len(),
            sent_count,
            failed_count
        );

        self.store.insert_execution(
            campaign.id,
            trigger.id,
            executed_at,
            recipients.len() as i64,
            sent_count,
            failed_count,
            status,
            None,
        )
    }

    async fn process_recipient(
        &self,
        trigger: &Trigger,
        campaign: &Campaign,
        strategy: &dyn ReminderStrategy,
        recipient: &Recipient,
        menus: &[Menu],
    ) -> Result<RecipientOutcome> {
        if recipient.phone_number.is_empty() {
            // counted neither sent nor failed
            tracing::warn!(
                "Trigger {}: recipient company {} has no phone, skipping",
                trigger.id,
                recipient.company_id
            );
            return Ok(RecipientOutcome::Skipped);
        }

        if !strategy.should_notify_recipient(self.store, recipient, menus)? {
            tracing::debug!(
                "Trigger {}: {} already satisfied, skipping",
                trigger.id,
                recipient.phone_number
            );
            return Ok(RecipientOutcome::Skipped);
        }

        // the ledger's `sent` rows are the at-most-once guard
        let already_sent = self
            .store
            .sent_menu_ids(trigger.id, &recipient.phone_number)?;
        let due: Vec<&Menu> = menus
            .iter()
            .filter(|m| !already_sent.contains(&m.id))
            .collect();
        if due.is_empty() && !menus.is_empty() {
            return Ok(RecipientOutcome::Skipped);
        }

        let due_owned: Vec<Menu> = due.iter().map(|m| (*m).clone()).collect();
        let content = strategy.render_content(campaign, &due_owned);

        let tracker = WindowTracker::new(self.store);
        let conversation =
            tracker.resolve_or_open(&recipient.phone_number, Some(recipient), None, false)?;

        match tracker.window_status(&conversation) {
            WindowStatus::Active => {
                self.send_direct(trigger, recipient, conversation.id, &due_owned, &content)
                    .await
            }
            status => {
                self.defer_behind_template(
                    trigger,
                    strategy,
                    recipient,
                    conversation.id,
                    conversation.status,
                    status,
                    &due_owned,
                    &content,
                )
                .await
            }
        }
    }

    /// Window open: say it now as plain text.
    async fn send_direct(
        &self,
        trigger: &Trigger,
        recipient: &Recipient,
        conversation_id: i64,
        menus: &[Menu],
        content: &str,
    ) -> Result<RecipientOutcome> {
        let message = self.store.append_message(NewMessage::outbound(
            conversation_id,
            MessageType::Text,
            Some(content.to_string()),
        ))?;

        let outcome = self
            .sender
            .send(
                &recipient.phone_number,
                OutboundPayload::Text {
                    body: content.to_string(),
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

        let ledger_status = if outcome.success {
            NotifiedStatus::Sent
        } else {
            NotifiedStatus::Failed
        };
        for menu in menus {
            self.store.record_notified(
                trigger.id,
                menu.id,
                &recipient.phone_number,
                conversation_id,
                ledger_status,
            )?;
        }

        if outcome.success {
            Ok(RecipientOutcome::Sent)
        } else {
            // no retry within the run; a later run retries naturally
            Ok(RecipientOutcome::Failed)
        }
    }

    /// Window closed: open it with the strategy's template and queue the
    /// reminder content for delivery once the customer replies. When a
    /// template is already outstanding (`AwaitingReply`), only the queue is
    /// updated — the provider rejects duplicate template sends.
    #[allow(clippy::too_many_arguments)]
    async fn defer_behind_template(
        &self,
        trigger: &Trigger,
        strategy: &dyn ReminderStrategy,
        recipient: &Recipient,
        conversation_id: i64,
        conversation_status: ConversationStatus,
        window_status: WindowStatus,
        menus: &[Menu],
        content: &str,
    ) -> Result<RecipientOutcome> {
        let template_outstanding = conversation_status == ConversationStatus::AwaitingReply
            || window_status == WindowStatus::AwaitingResponse;

        if !template_outstanding {
            let template = strategy.template_message(self.config, menus);
            let message = self.store.append_message(NewMessage::outbound(
                conversation_id,
                MessageType::Template,
                Some(template.body.clone()),
            ))?;

            let outcome = self
                .sender
                .send(
                    &recipient.phone_number,
                    OutboundPayload::Template {
                        name: template.name,
                        language: template.language,
                        components: template.components,
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
                for menu in menus {
                    self.store.record_notified(
                        trigger.id,
                        menu.id,
                        &recipient.phone_number,
                        conversation_id,
                        NotifiedStatus::Failed,
                    )?;
                }
                return Ok(RecipientOutcome::Failed);
            }

            let tracker = WindowTracker::new(self.store);
            tracker.record_outbound(conversation_id, MessageType::Template, true)?;
        }

        // InitialContact carries no entities — nothing to owe once the
        // template is out
        if !menus.is_empty() {
            let menu_ids: Vec<i64> = menus.iter().map(|m| m.id).collect();
            self.store.enqueue_pending(
                trigger.id,
                conversation_id,
                &recipient.phone_number,
                content,
                &menu_ids,
            )?;
            for menu in menus {
                self.store.record_notified(
                    trigger.id,
                    menu.id,
                    &recipient.phone_number,
                    conversation_id,
                    NotifiedStatus::Pending,
                )?;
            }
        }

        Ok(RecipientOutcome::Deferred)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockSender;
    use chrono::Duration;
    use menubell_core::types::{CampaignEventType, CampaignStatus, PendingStatus};

    struct Fixture {
        store: Store,
        sender: MockSender,
        config: RemindersConfig,
        trigger_id: i64,
        company_id: i64,
    }

    const PHONE: &str = "5712345678";

    fn fixture(event_type: CampaignEventType) -> Fixture {
        let store = Store::open_in_memory().unwrap();
        let campaign = store
            .create_campaign(
                "Nuevos menus",
                CampaignStatus::Active,
                "Hay {{menu_count}} nuevos menus: {{menus}}",
            )
            .unwrap();
        let company_id = store.create_company("Comidas Ltda", Some(PHONE)).unwrap();
        store.attach_campaign_company(campaign.id, company_id).unwrap();
        let trigger = store.create_trigger(campaign.id, event_type, 3, 24).unwrap();

        Fixture {
            store,
            sender: MockSender::new(),
            config: RemindersConfig::default(),
            trigger_id: trigger.id,
            company_id,
        }
    }

    fn executor<'a>(f: &'a Fixture) -> CampaignExecutor<'a> {
        CampaignExecutor::new(
            &f.store,
            &f.sender,
            &f.config,
            Arc::new(AtomicBool::new(false)),
        )
    }

    fn add_menu(f: &Fixture, title: &str, publication_date: &str) -> i64 {
        let now = Utc::now();
        f.store
            .create_menu(
                title,
                publication_date,
                now + Duration::hours(2),
                None,
                None,
                now,
            )
            .unwrap()
    }

    fn unwrap_executed(outcome: RunOutcome) -> CampaignExecution {
        match outcome {
            RunOutcome::Executed(e) => e,
            RunOutcome::AlreadyRunning => panic!("expected an executed run"),
        }
    }

    #[tokio::test]
    async fn test_no_eligible_menus_writes_zero_execution() {
        let f = fixture(CampaignEventType::MenuCreated);
        let exec = unwrap_executed(executor(&f).run(f.trigger_id).await.unwrap());
        assert_eq!(exec.status, ExecutionStatus::Completed);
        assert_eq!(exec.total_recipients, 0);
        assert_eq!(f.sender.sent_count(), 0);
    }

    // Scenario A: expired window → template send + pending batch + pending ledger
    #[tokio::test]
    async fn test_expired_window_defers_behind_template() {
        let f = fixture(CampaignEventType::MenuCreated);
        let menu_id = add_menu(&f, "Menu Lunes", "2026-08-10");

        let exec = unwrap_executed(executor(&f).run(f.trigger_id).await.unwrap());
        assert_eq!(exec.status, ExecutionStatus::Completed);
        assert_eq!(exec.total_recipients, 1);
        assert_eq!(exec.sent_count, 0, "deferred sends are not counted as sent");

        // one template went out
        let payloads = f.sender.sent_to(PHONE);
        assert_eq!(payloads.len(), 1);
        assert!(matches!(payloads[0], OutboundPayload::Template { .. }));

        // conversation awaits the reply
        let conversation = f.store.find_active_conversation(PHONE).unwrap().unwrap();
        assert_eq!(conversation.status, ConversationStatus::AwaitingReply);

        // one waiting batch with the menu id
        let pending = f.store.waiting_pending_for_conversation(conversation.id).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].status, PendingStatus::WaitingResponse);
        assert_eq!(pending[0].menu_ids, vec![menu_id]);

        // ledger row pending
        let rows = f.store.notified_rows(f.trigger_id, PHONE).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, NotifiedStatus::Pending);
    }

    // Scenario C: active window → single text covering both menus, ledger sent
    #[tokio::test]
    async fn test_active_window_sends_single_text() {
        let f = fixture(CampaignEventType::MenuCreated);
        add_menu(&f, "Menu Lunes", "2026-08-10");
        add_menu(&f, "Menu Martes", "2026-08-11");

        // open the window first
        let c = f
            .store
            .create_conversation(PHONE, None, menubell_core::types::SourceType::Company, Some(f.company_id), None)
            .unwrap();
        f.store.record_inbound_window(c.id).unwrap();

        let exec = unwrap_executed(executor(&f).run(f.trigger_id).await.unwrap());
        assert_eq!(exec.sent_count, 1);
        assert_eq!(exec.status, ExecutionStatus::Completed);

        let payloads = f.sender.sent_to(PHONE);
        assert_eq!(payloads.len(), 1, "both menus merge into one message");
        match &payloads[0] {
            OutboundPayload::Text { body } => {
                assert!(body.contains("Menu Lunes"));
                assert!(body.contains("Menu Martes"));
                assert!(body.contains("2 nuevos menus"));
            }
            other => panic!("expected text, got {other:?}"),
        }

        let rows = f.store.notified_rows(f.trigger_id, PHONE).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.status == NotifiedStatus::Sent));

        // no pending batch was created
        assert!(f.store.all_waiting_pending().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_idempotent_rerun_skips_sent_menus() {
        let f = fixture(CampaignEventType::MenuCreated);
        add_menu(&f, "Menu Lunes", "2026-08-10");
        let c = f
            .store
            .create_conversation(PHONE, None, menubell_core::types::SourceType::Company, Some(f.company_id), None)
            .unwrap();
        f.store.record_inbound_window(c.id).unwrap();

        let first = unwrap_executed(executor(&f).run(f.trigger_id).await.unwrap());
        assert_eq!(first.sent_count, 1);

        let second = unwrap_executed(executor(&f).run(f.trigger_id).await.unwrap());
        assert_eq!(second.sent_count, 0, "second run must not resend");
        assert_eq!(f.sender.sent_count(), 1, "exactly one provider send overall");
    }

    #[tokio::test]
    async fn test_send_failure_marks_failed_and_run_continues() {
        let f = fixture(CampaignEventType::MenuCreated);
        add_menu(&f, "Menu Lunes", "2026-08-10");
        // second recipient succeeds
        let other = store_second_company(&f, "56987654321");
        let c = f
            .store
            .create_conversation(PHONE, None, menubell_core::types::SourceType::Company, Some(f.company_id), None)
            .unwrap();
        f.store.record_inbound_window(c.id).unwrap();
        let c2 = f
            .store
            .create_conversation("56987654321", None, menubell_core::types::SourceType::Company, Some(other), None)
            .unwrap();
        f.store.record_inbound_window(c2.id).unwrap();

        f.sender.fail_for(PHONE);

        let exec = unwrap_executed(executor(&f).run(f.trigger_id).await.unwrap());
        assert_eq!(exec.status, ExecutionStatus::CompletedWithErrors);
        assert_eq!(exec.failed_count, 1);
        assert_eq!(exec.sent_count, 1, "the other recipient still went out");

        let rows = f.store.notified_rows(f.trigger_id, PHONE).unwrap();
        assert_eq!(rows[0].status, NotifiedStatus::Failed);
    }

    #[tokio::test]
    async fn test_failed_menu_retried_on_next_run() {
        let f = fixture(CampaignEventType::MenuCreated);
        add_menu(&f, "Menu Lunes", "2026-08-10");
        let c = f
            .store
            .create_conversation(PHONE, None, menubell_core::types::SourceType::Company, Some(f.company_id), None)
            .unwrap();
        f.store.record_inbound_window(c.id).unwrap();

        f.sender.fail_for(PHONE);
        let first = unwrap_executed(executor(&f).run(f.trigger_id).await.unwrap());
        assert_eq!(first.failed_count, 1);

        f.sender.recover(PHONE);
        let second = unwrap_executed(executor(&f).run(f.trigger_id).await.unwrap());
        assert_eq!(second.sent_count, 1, "failure retries naturally next run");

        let rows = f.store.notified_rows(f.trigger_id, PHONE).unwrap();
        assert_eq!(rows[0].status, NotifiedStatus::Sent);
    }

    #[tokio::test]
    async fn test_run_lock_excludes_overlap() {
        let f = fixture(CampaignEventType::MenuCreated);
        assert!(f.store.try_lock_trigger(f.trigger_id, 600).unwrap());

        let outcome = executor(&f).run(f.trigger_id).await.unwrap();
        assert!(matches!(outcome, RunOutcome::AlreadyRunning));
        assert!(f.store.executions_for_trigger(f.trigger_id).unwrap().is_empty());

        f.store.unlock_trigger(f.trigger_id).unwrap();
        let outcome = executor(&f).run(f.trigger_id).await.unwrap();
        assert!(matches!(outcome, RunOutcome::Executed(_)));
    }

    #[tokio::test]
    async fn test_closing_strategy_suppresses_satisfied_recipient() {
        let f = fixture(CampaignEventType::MenuClosing);
        add_menu(&f, "Menu Lunes", "2026-08-10");
        // recipient already ordered for that date
        f.store.create_order(f.company_id, None, "2026-08-10").unwrap();

        let exec = unwrap_executed(executor(&f).run(f.trigger_id).await.unwrap());
        assert_eq!(exec.sent_count, 0);
        assert_eq!(f.sender.sent_count(), 0);
        assert!(f.store.all_waiting_pending().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_awaiting_reply_merges_without_resending_template() {
        let f = fixture(CampaignEventType::MenuCreated);
        add_menu(&f, "Menu Lunes", "2026-08-10");

        let first = unwrap_executed(executor(&f).run(f.trigger_id).await.unwrap());
        assert_eq!(first.total_recipients, 1);
        assert_eq!(f.sender.sent_count(), 1, "one template");

        // a new menu shows up while the template is still unanswered
        let second_menu = add_menu(&f, "Menu Martes", "2026-08-11");
        let second = unwrap_executed(executor(&f).run(f.trigger_id).await.unwrap());
        assert_eq!(second.status, ExecutionStatus::Completed);
        assert_eq!(f.sender.sent_count(), 1, "no duplicate template send");

        let conversation = f.store.find_active_conversation(PHONE).unwrap().unwrap();
        let pending = f.store.waiting_pending_for_conversation(conversation.id).unwrap();
        assert_eq!(pending.len(), 1);
        assert!(pending[0].menu_ids.contains(&second_menu));
        assert_eq!(pending[0].menu_ids.len(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_checkpoint_stops_between_recipients() {
        let f = fixture(CampaignEventType::MenuCreated);
        add_menu(&f, "Menu Lunes", "2026-08-10");
        store_second_company(&f, "56987654321");

        let shutdown = Arc::new(AtomicBool::new(true));
        let executor = CampaignExecutor::new(&f.store, &f.sender, &f.config, shutdown);
        let exec = unwrap_executed(executor.run(f.trigger_id).await.unwrap());
        // run stopped before touching any recipient, but the audit row exists
        assert_eq!(exec.sent_count, 0);
        assert_eq!(f.sender.sent_count(), 0);
    }

    fn store_second_company(f: &Fixture, phone: &str) -> i64 {
        let other = f.store.create_company("Otra", Some(phone)).unwrap();
        let trigger = f.store.get_trigger(f.trigger_id).unwrap();
        f.store.attach_campaign_company(trigger.campaign_id, other).unwrap();
        other
    }
}

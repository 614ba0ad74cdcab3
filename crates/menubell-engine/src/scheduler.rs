//! The periodic reminder loop — a tokio interval that walks every active
//! trigger, then sweeps the pending queue. Zero overhead while idle; the
//! store is the only shared state, so webhook traffic runs concurrently.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use menubell_core::config::RemindersConfig;
use menubell_core::types::CampaignEventType;
use menubell_core::MessageSender;
use menubell_store::Store;

use crate::executor::CampaignExecutor;
use crate::pending::PendingProcessor;

/// Run the reminder loop until `shutdown` is raised. Shutdown is honored
/// between triggers and — inside the executor — between recipients, never
/// mid-send.
pub async fn run_reminder_loop(
    store: Arc<Store>,
    sender: Arc<dyn MessageSender>,
    config: RemindersConfig,
    shutdown: Arc<AtomicBool>,
) {
    tracing::info!(
        "⏰ Reminder loop started (check every {}s)",
        config.check_interval_secs
    );

    let mut interval =
        tokio::time::interval(std::time::Duration::from_secs(config.check_interval_secs));

    loop {
        interval.tick().await;
        if shutdown.load(Ordering::Relaxed) {
            tracing::info!("Reminder loop stopping");
            break;
        }

        tick(&store, sender.as_ref(), &config, &shutdown).await;
    }
}

/// One scheduler tick: every active reminder trigger, then the sweep.
pub async fn tick(
    store: &Store,
    sender: &dyn MessageSender,
    config: &RemindersConfig,
    shutdown: &Arc<AtomicBool>,
) {
    for event_type in CampaignEventType::reminder_types() {
        let triggers = match store.active_triggers_by_event(event_type) {
            Ok(t) => t,
            Err(e) => {
                tracing::error!("Failed to load {} triggers: {e}", event_type.as_str());
                continue;
            }
        };

        for trigger in triggers {
            if shutdown.load(Ordering::Relaxed) {
                return;
            }
            let executor = CampaignExecutor::new(store, sender, config, Arc::clone(shutdown));
            if let Err(e) = executor.run(trigger.id).await {
                tracing::error!("Trigger {} errored: {e}", trigger.id);
            }
        }
    }

    let processor = PendingProcessor::new(store, sender, config);
    if let Err(e) = processor.check_all().await {
        tracing::error!("Pending sweep failed: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockSender;
    use chrono::{Duration, Utc};
    use menubell_core::types::{CampaignStatus, ExecutionStatus};

    #[tokio::test]
    async fn test_tick_runs_active_triggers_and_sweep() {
        let store = Store::open_in_memory().unwrap();
        let campaign = store
            .create_campaign("c", CampaignStatus::Active, "{{menus}}")
            .unwrap();
        let company = store.create_company("C", Some("56911111111")).unwrap();
        store.attach_campaign_company(campaign.id, company).unwrap();
        let trigger = store
            .create_trigger(campaign.id, CampaignEventType::MenuCreated, 0, 24)
            .unwrap();
        let now = Utc::now();
        store
            .create_menu("Menu Lunes", "2026-08-10", now + Duration::hours(4), None, None, now)
            .unwrap();

        let sender = MockSender::new();
        let config = RemindersConfig::default();
        let shutdown = Arc::new(AtomicBool::new(false));

        tick(&store, &sender, &config, &shutdown).await;

        let executions = store.executions_for_trigger(trigger.id).unwrap();
        assert_eq!(executions.len(), 1);
        assert_eq!(executions[0].status, ExecutionStatus::Completed);
        // the deferred template went out
        assert_eq!(sender.sent_count(), 1);
    }

    #[tokio::test]
    async fn test_tick_honors_shutdown() {
        let store = Store::open_in_memory().unwrap();
        let campaign = store
            .create_campaign("c", CampaignStatus::Active, "{{menus}}")
            .unwrap();
        let trigger = store
            .create_trigger(campaign.id, CampaignEventType::MenuCreated, 0, 24)
            .unwrap();

        let sender = MockSender::new();
        let config = RemindersConfig::default();
        let shutdown = Arc::new(AtomicBool::new(true));

        tick(&store, &sender, &config, &shutdown).await;
        assert!(store.executions_for_trigger(trigger.id).unwrap().is_empty());
    }
}

//! # Menubell Engine
//!
//! The reminder core: who should be reminded about which menus, and
//! whether WhatsApp lets us say it right now.
//!
//! ## Architecture
//! ```text
//! Scheduler (tokio interval)
//!   └── per active trigger → CampaignExecutor
//!         ├── Strategy: eligible menus × recipients
//!         ├── WindowTracker: can we text this number now?
//!         ├── window open  → MessageSender (text, immediately)
//!         └── window closed → template + PendingNotification (deferred)
//!
//! Inbound webhook → InboundProcessor
//!   ├── WindowTracker: reopen the 24h window
//!   └── PendingProcessor: flush whatever was queued
//! ```

pub mod executor;
pub mod inbound;
pub mod pending;
pub mod scheduler;
pub mod strategies;
pub mod window;

pub use executor::{CampaignExecutor, RunOutcome};
pub use inbound::{InboundProcessor, InboundStats};
pub use pending::{PendingProcessor, SweepStats};
pub use strategies::{strategy_for, ReminderStrategy, TemplateMessage};
pub use window::WindowTracker;

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted `MessageSender` for engine tests.

    use std::collections::HashSet;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    use menubell_core::{MessageSender, OutboundPayload, Result, SendOutcome};

    #[derive(Default)]
    pub struct MockSender {
        pub sent: Mutex<Vec<(String, OutboundPayload)>>,
        /// Phone numbers whose sends report a provider failure.
        pub failing: Mutex<HashSet<String>>,
        counter: AtomicU64,
    }

    impl MockSender {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn fail_for(&self, phone: &str) {
            self.failing.lock().unwrap().insert(phone.to_string());
        }

        pub fn recover(&self, phone: &str) {
            self.failing.lock().unwrap().remove(phone);
        }

        pub fn sent_count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }

        pub fn sent_to(&self, phone: &str) -> Vec<OutboundPayload> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .filter(|(p, _)| p == phone)
                .map(|(_, payload)| payload.clone())
                .collect()
        }
    }

    #[async_trait::async_trait]
    impl MessageSender for MockSender {
        async fn send(&self, phone_number: &str, payload: OutboundPayload) -> Result<SendOutcome> {
            let failing = self.failing.lock().unwrap().contains(phone_number);
            let n = self.counter.fetch_add(1, Ordering::SeqCst);
            if failing {
                return Ok(SendOutcome {
                    success: false,
                    provider_status: 500,
                    external_id: None,
                    request_payload: serde_json::json!({ "to": phone_number }),
                    response_payload: serde_json::json!({ "error": "simulated outage" }),
                });
            }
            self.sent
                .lock()
                .unwrap()
                .push((phone_number.to_string(), payload));
            Ok(SendOutcome {
                success: true,
                provider_status: 200,
                external_id: Some(format!("wamid.mock{n}")),
                request_payload: serde_json::json!({ "to": phone_number }),
                response_payload: serde_json::json!({ "messages": [{ "id": format!("wamid.mock{n}") }] }),
            })
        }
    }
}

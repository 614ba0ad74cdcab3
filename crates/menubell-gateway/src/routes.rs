//! API route handlers for the gateway.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use menubell_engine::{CampaignExecutor, InboundProcessor, PendingProcessor, RunOutcome, WindowTracker};

use super::server::AppState;

/// Health check endpoint.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "menubell-gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
}

/// Webhook subscription challenge (Meta calls this once on setup).
pub async fn webhook_verify(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let mode = params.get("hub.mode").map(String::as_str);
    let token = params.get("hub.verify_token").map(String::as_str);
    let challenge = params.get("hub.challenge").cloned().unwrap_or_default();

    if mode == Some("subscribe") && token == Some(state.config.whatsapp.webhook_verify_token.as_str())
    {
        (StatusCode::OK, challenge)
    } else {
        tracing::warn!("Webhook verification rejected (mode={mode:?})");
        (StatusCode::FORBIDDEN, String::new())
    }
}

/// Inbound messages from the provider. Always answers 200 — the provider
/// retries on anything else, and a poison payload must not loop forever.
pub async fn webhook_receive(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<serde_json::Value>,
) -> Json<serde_json::Value> {
    let processor = InboundProcessor::new(&state.store, state.sender.as_ref(), &state.config.reminders);
    match processor.process(&payload).await {
        Ok(stats) => Json(serde_json::json!({ "ok": true, "stats": stats })),
        Err(e) => {
            tracing::error!("Webhook processing failed: {e}");
            Json(serde_json::json!({ "ok": false }))
        }
    }
}

/// Run one trigger immediately. 409 when a run already holds the lock.
pub async fn run_trigger(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    let executor = CampaignExecutor::new(
        &state.store,
        state.sender.as_ref(),
        &state.config.reminders,
        Arc::clone(&state.shutdown),
    );
    match executor.run(id).await {
        Ok(RunOutcome::Executed(execution)) => (
            StatusCode::OK,
            Json(serde_json::json!({ "ok": true, "execution": execution })),
        ),
        Ok(RunOutcome::AlreadyRunning) => (
            StatusCode::CONFLICT,
            Json(serde_json::json!({ "ok": false, "error": "trigger is already running" })),
        ),
        Err(e) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(serde_json::json!({ "ok": false, "error": e.to_string() })),
        ),
    }
}

/// Sweep the pending queue: deliver answered batches, expire stale ones.
pub async fn check_pending(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let processor =
        PendingProcessor::new(&state.store, state.sender.as_ref(), &state.config.reminders);
    match processor.check_all().await {
        Ok(stats) => (
            StatusCode::OK,
            Json(serde_json::json!({ "ok": true, "stats": stats })),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "ok": false, "error": e.to_string() })),
        ),
    }
}

/// Window state for one phone number — what a dashboard shows next to the
/// chat.
pub async fn conversation_window(
    State(state): State<Arc<AppState>>,
    Path(phone): Path<String>,
) -> impl IntoResponse {
    let tracker = WindowTracker::new(&state.store);
    let phone = menubell_core::types::normalize_phone(&phone);
    match state.store.find_active_conversation(&phone) {
        Ok(Some(conversation)) => {
            let status = tracker.window_status(&conversation);
            (
                StatusCode::OK,
                Json(serde_json::json!({
                    "ok": true,
                    "status": status.as_str(),
                    "expires_at": conversation.window_expires_at.map(|t| t.to_rfc3339()),
                })),
            )
        }
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "ok": false, "error": "no open conversation" })),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "ok": false, "error": e.to_string() })),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use menubell_core::config::MenubellConfig;
    use menubell_core::types::SourceType;
    use menubell_core::{MessageSender, OutboundPayload, Result, SendOutcome};
    use menubell_store::Store;
    use std::sync::atomic::AtomicBool;

    struct NullSender;

    #[async_trait::async_trait]
    impl MessageSender for NullSender {
        async fn send(&self, _phone: &str, _payload: OutboundPayload) -> Result<SendOutcome> {
            Ok(SendOutcome {
                success: true,
                provider_status: 200,
                external_id: Some("wamid.null".into()),
                request_payload: serde_json::json!({}),
                response_payload: serde_json::json!({}),
            })
        }
    }

    fn app_state() -> Arc<AppState> {
        let mut config = MenubellConfig::default();
        config.whatsapp.webhook_verify_token = "secreto".into();
        Arc::new(AppState::new(
            config,
            Arc::new(Store::open_in_memory().unwrap()),
            Arc::new(NullSender),
            Arc::new(AtomicBool::new(false)),
        ))
    }

    #[tokio::test]
    async fn test_webhook_verify_accepts_matching_token() {
        let state = app_state();
        let mut params = HashMap::new();
        params.insert("hub.mode".to_string(), "subscribe".to_string());
        params.insert("hub.verify_token".to_string(), "secreto".to_string());
        params.insert("hub.challenge".to_string(), "12345".to_string());

        let response = webhook_verify(State(state), Query(params)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_webhook_verify_rejects_bad_token() {
        let state = app_state();
        let mut params = HashMap::new();
        params.insert("hub.mode".to_string(), "subscribe".to_string());
        params.insert("hub.verify_token".to_string(), "wrong".to_string());

        let response = webhook_verify(State(state), Query(params)).await.into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_webhook_receive_always_ok() {
        let state = app_state();
        let response =
            webhook_receive(State(state), Json(serde_json::json!({"entry": "garbage"}))).await;
        assert_eq!(response.0["ok"], true);
    }

    #[tokio::test]
    async fn test_conversation_window_not_found() {
        let state = app_state();
        let response = conversation_window(State(state), Path("56900000000".to_string()))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_conversation_window_reports_status() {
        let state = app_state();
        let c = state
            .store
            .create_conversation("56912345678", None, SourceType::Unknown, None, None)
            .unwrap();
        state.store.record_inbound_window(c.id).unwrap();

        let response = conversation_window(State(state), Path("56912345678".to_string()))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_run_trigger_unknown_id() {
        let state = app_state();
        let response = run_trigger(State(state), Path(999)).await.into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}

use lawgpt_chat::{ApiStatus, ChatAction, ChatStore};

use crate::backend::ChatBackend;

/// One-shot reachability check.
///
/// Publishes `Connecting` first, then `Connected` for a 2xx answer and
/// `Disconnected` for anything else. Retrying is left to the caller.
pub async fn check_connection(store: &ChatStore, backend: &dyn ChatBackend) -> ApiStatus {
    store.dispatch(ChatAction::SetApiStatus(ApiStatus::Connecting));

    let status = match backend.check_health().await {
        Ok(()) => {
            tracing::info!(endpoint = %backend.endpoint(), "backend connected");
            ApiStatus::Connected
        }
        Err(error) => {
            tracing::warn!(
                endpoint = %backend.endpoint(),
                error = %error,
                "backend health check failed"
            );
            ApiStatus::Disconnected
        }
    };

    store.dispatch(ChatAction::SetApiStatus(status));
    status
}

use std::sync::Arc;

use crate::config::Config;
use crate::gateway::GatewayRegistry;

/// Shared state handed to every proxy request. Constructed once in
/// [`crate::app::bootstrap`] and cloned cheaply (everything behind an `Arc`)
/// into the axum router.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<GatewayRegistry>,
    pub http_client: reqwest::Client,
}

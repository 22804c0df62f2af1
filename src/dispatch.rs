use std::sync::Arc;

use serde_json::json;
use url::Url;

use crate::clock::Clock;
use crate::error::DashboardError;
use crate::loader::with_cache_buster;
use crate::logging::{log, obj, v_str, Domain, Level, ProfileScope};
use crate::transport::Transport;

/// Triggers the remote workflow that rebuilds the metrics document.
pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    endpoint: Url,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn Transport>, clock: Arc<dyn Clock>, endpoint: Url) -> Self {
        Self { transport, clock, endpoint }
    }

    /// One POST, no body, no retry.
    pub async fn trigger(&self) -> Result<(), DashboardError> {
        let url = with_cache_buster(&self.endpoint, self.clock.now_ms());
        let _scope = ProfileScope::new("dispatch", &[("url", v_str(url.as_str()))]);

        let resp = self
            .transport
            .post(url.as_str())
            .await
            .map_err(|e| DashboardError::dispatch(e.to_string()))?;

        log(
            Level::Info,
            Domain::Dispatch,
            "response",
            obj(&[("url", v_str(url.as_str())), ("status", json!(resp.status))]),
        );

        if resp.is_success() {
            return Ok(());
        }
        if resp.body.is_empty() {
            Err(DashboardError::dispatch(format!("HTTP {}", resp.status)))
        } else {
            Err(DashboardError::dispatch(resp.body))
        }
    }
}

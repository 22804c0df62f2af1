use std::sync::Arc;

use url::Url;

use crate::clock::Clock;
use crate::context::DashboardContext;
use crate::document::{fingerprint, MetricsDocument};
use crate::error::DashboardError;
use crate::logging::{log_document_loaded, v_str, ProfileScope};
use crate::transport::Transport;

/// Appends `t=<epoch ms>` so intermediate caches never serve a stale copy.
pub fn with_cache_buster(url: &Url, now_ms: u64) -> Url {
    let mut busted = url.clone();
    busted.query_pairs_mut().append_pair("t", &now_ms.to_string());
    busted
}

pub struct MetricsLoader {
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    metrics_url: Url,
}

impl MetricsLoader {
    pub fn new(transport: Arc<dyn Transport>, clock: Arc<dyn Clock>, metrics_url: Url) -> Self {
        Self { transport, clock, metrics_url }
    }

    pub fn request_url(&self, bust_cache: bool) -> Url {
        if bust_cache {
            with_cache_buster(&self.metrics_url, self.clock.now_ms())
        } else {
            self.metrics_url.clone()
        }
    }

    /// Fetches and normalizes the document without touching shared state.
    pub async fn fetch(&self, bust_cache: bool) -> Result<MetricsDocument, DashboardError> {
        let url = self.request_url(bust_cache);
        let _scope = ProfileScope::new("metrics_fetch", &[("url", v_str(url.as_str()))]);

        let resp = self
            .transport
            .get(url.as_str())
            .await
            .map_err(|e| DashboardError::fetch(e.to_string()))?;
        if !resp.is_success() {
            return Err(DashboardError::fetch(format!("HTTP {}", resp.status)));
        }
        let doc = MetricsDocument::parse(&resp.body)
            .map_err(|e| DashboardError::fetch(format!("invalid metrics document: {}", e)))?;

        log_document_loaded(
            url.as_str(),
            doc.last_updated_utc.as_deref(),
            doc.per_day.len(),
            &fingerprint(&resp.body),
        );
        Ok(doc)
    }

    /// Fetches and stores the document in the context (last write wins).
    pub async fn load(
        &self,
        ctx: &DashboardContext,
        bust_cache: bool,
    ) -> Result<MetricsDocument, DashboardError> {
        let doc = self.fetch(bust_cache).await?;
        ctx.apply_document(doc.clone());
        Ok(doc)
    }
}

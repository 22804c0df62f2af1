//! Shared dashboard state: the single point of contention between the manual
//! update flow and the background reload. Writes are last-write-wins.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;

use crate::document::MetricsDocument;
use crate::error::DashboardError;
use crate::view::{day_selector, OVERALL};

#[derive(Debug, Clone)]
pub struct DashboardState {
    pub document: Option<MetricsDocument>,
    /// Freshness timestamp of the last successfully loaded document.
    pub last_updated: Option<String>,
    pub selected: String,
    pub status: String,
    pub updating: bool,
}

impl Default for DashboardState {
    fn default() -> Self {
        Self {
            document: None,
            last_updated: None,
            selected: OVERALL.to_string(),
            status: String::new(),
            updating: false,
        }
    }
}

#[derive(Clone)]
pub struct DashboardContext {
    inner: Arc<Mutex<DashboardState>>,
    revision: Arc<watch::Sender<u64>>,
}

impl Default for DashboardContext {
    fn default() -> Self {
        Self::new()
    }
}

impl DashboardContext {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0);
        Self { inner: Arc::new(Mutex::new(DashboardState::default())), revision: Arc::new(tx) }
    }

    fn lock(&self) -> MutexGuard<'_, DashboardState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn mutate<R>(&self, f: impl FnOnce(&mut DashboardState) -> R) -> R {
        let out = f(&mut self.lock());
        self.revision.send_modify(|r| *r += 1);
        out
    }

    /// Receiver that fires after every state change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub fn snapshot(&self) -> DashboardState {
        self.lock().clone()
    }

    /// Replaces the document wholesale along with its timestamp. A selected
    /// day that the new document no longer offers falls back to overall.
    pub fn apply_document(&self, doc: MetricsDocument) {
        self.mutate(|s| {
            s.selected = day_selector(&doc, &s.selected).selected;
            s.last_updated = doc.last_updated_utc.clone();
            s.document = Some(doc);
        });
    }

    pub fn last_updated(&self) -> Option<String> {
        self.lock().last_updated.clone()
    }

    pub fn document(&self) -> Option<MetricsDocument> {
        self.lock().document.clone()
    }

    pub fn selected(&self) -> String {
        self.lock().selected.clone()
    }

    pub fn select(&self, key: &str) {
        self.mutate(|s| s.selected = key.to_string());
    }

    pub fn status(&self) -> String {
        self.lock().status.clone()
    }

    pub fn set_status(&self, status: impl Into<String>) {
        let status = status.into();
        self.mutate(|s| s.status = status);
    }

    pub fn is_updating(&self) -> bool {
        self.lock().updating
    }

    /// Claims the update flow; the claim is released when the guard drops.
    pub fn begin_update(&self) -> Result<UpdateGuard, DashboardError> {
        self.mutate(|s| {
            if s.updating {
                return Err(DashboardError::Busy);
            }
            s.updating = true;
            Ok(())
        })?;
        Ok(UpdateGuard { ctx: self.clone() })
    }
}

pub struct UpdateGuard {
    ctx: DashboardContext,
}

impl Drop for UpdateGuard {
    fn drop(&mut self) {
        self.ctx.mutate(|s| s.updating = false);
    }
}

//! Single owner of dashboard state transitions. Controls emit `Command`s and
//! the controller routes them to the loader, the orchestrator, or the view
//! selector.

use std::sync::Arc;

use crate::clock::Clock;
use crate::context::DashboardContext;
use crate::error::DashboardError;
use crate::loader::MetricsLoader;
use crate::logging::{log, log_failure, obj, v_str, Domain, Level};
use crate::orchestrator::{UpdateOrchestrator, UpdateOutcome};
use crate::render::{render_view, Rendered};
use crate::view::{day_selector, select_view, DaySelector, OVERALL};

pub const STATUS_LOADING: &str = "Loading...";
pub const STATUS_OK: &str = "OK";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Trigger the remote workflow and wait for fresh data.
    Refresh,
    SelectView(String),
    /// Fetch the current document without triggering the workflow.
    Reload,
    Redraw,
    ListDays,
    Help,
    Quit,
}

impl Command {
    pub fn parse(line: &str) -> Result<Command, String> {
        let mut parts = line.split_whitespace();
        let head = parts.next().unwrap_or("");
        let arg = parts.collect::<Vec<_>>().join(" ");
        match (head, arg.is_empty()) {
            ("refresh" | "r", true) => Ok(Command::Refresh),
            ("view" | "v", false) => Ok(Command::SelectView(arg)),
            ("view" | "v", true) => Ok(Command::SelectView(OVERALL.to_string())),
            ("reload", true) => Ok(Command::Reload),
            ("" | "show" | "s", true) => Ok(Command::Redraw),
            ("days" | "d", true) => Ok(Command::ListDays),
            ("help" | "h" | "?", true) => Ok(Command::Help),
            ("quit" | "q" | "exit", true) => Ok(Command::Quit),
            _ => Err(format!("unknown command: {}", line.trim())),
        }
    }
}

pub const HELP: &str = "\
commands:
  refresh | r        trigger the server update and wait for new metrics
  view <day> | v     show one day (or `overall`)
  days | d           list available days
  reload             fetch the published metrics again
  show | s           redraw the current view
  quit | q           exit";

#[derive(Clone)]
pub struct DashboardController {
    ctx: DashboardContext,
    loader: Arc<MetricsLoader>,
    orchestrator: Arc<UpdateOrchestrator>,
    clock: Arc<dyn Clock>,
    utc_offset_hours: i32,
}

impl DashboardController {
    pub fn new(
        ctx: DashboardContext,
        loader: Arc<MetricsLoader>,
        orchestrator: Arc<UpdateOrchestrator>,
        clock: Arc<dyn Clock>,
        utc_offset_hours: i32,
    ) -> Self {
        Self { ctx, loader, orchestrator, clock, utc_offset_hours }
    }

    pub fn context(&self) -> &DashboardContext {
        &self.ctx
    }

    /// Errors are logged and surfaced in the status line, never propagated
    /// past the flow that produced them.
    fn report(&self, domain: Domain, err: &DashboardError) {
        log_failure(domain, err.error_code(), &err.to_string());
        self.ctx.set_status(err.status_line());
    }

    pub async fn reload(&self) -> Result<(), DashboardError> {
        self.ctx.set_status(STATUS_LOADING);
        match self.loader.load(&self.ctx, true).await {
            Ok(_) => {
                self.ctx.set_status(STATUS_OK);
                Ok(())
            }
            Err(e) => {
                self.report(Domain::Loader, &e);
                Err(e)
            }
        }
    }

    pub async fn refresh(&self) -> Result<UpdateOutcome, DashboardError> {
        let result = self.orchestrator.run_update_flow(&self.ctx).await;
        match &result {
            Ok(outcome) => log(
                Level::Info,
                Domain::Update,
                "succeeded",
                obj(&[
                    ("timestamp", v_str(&outcome.timestamp)),
                    ("polls", serde_json::json!(outcome.polls)),
                    ("elapsed_ms", serde_json::json!(outcome.elapsed.as_millis() as u64)),
                ]),
            ),
            Err(e) => self.report(Domain::Update, e),
        }
        result
    }

    pub fn day_selector(&self) -> DaySelector {
        let state = self.ctx.snapshot();
        match &state.document {
            Some(doc) => day_selector(doc, &state.selected),
            None => day_selector(&Default::default(), OVERALL),
        }
    }

    /// Unknown days fall back to overall, like the view lookup does.
    pub fn select_view(&self, key: &str) -> DaySelector {
        let selector = match self.ctx.document() {
            Some(doc) => day_selector(&doc, key),
            None => day_selector(&Default::default(), OVERALL),
        };
        if selector.selected != key {
            log(
                Level::Warn,
                Domain::View,
                "unknown_view",
                obj(&[("requested", v_str(key)), ("selected", v_str(&selector.selected))]),
            );
        }
        self.ctx.select(&selector.selected);
        selector
    }

    pub fn render(&self) -> Option<Rendered> {
        let state = self.ctx.snapshot();
        let doc = state.document.as_ref()?;
        let view = select_view(doc, &state.selected);
        Some(render_view(
            view,
            state.last_updated.as_deref(),
            self.clock.now_utc(),
            self.utc_offset_hours,
        ))
    }

    pub fn render_text(&self) -> String {
        match self.render() {
            Some(r) => r.to_string(),
            None => "No metrics loaded yet.\n".to_string(),
        }
    }

    pub fn days_text(&self) -> String {
        let sel = self.day_selector();
        if !sel.enabled {
            return "Per-day data not available; showing overall only.\n".to_string();
        }
        sel.options
            .iter()
            .map(|o| {
                let marker = if o.key == sel.selected { "*" } else { " " };
                format!("{} {:<12} {}\n", marker, o.key, o.label)
            })
            .collect()
    }

    /// Runs one command to completion and returns text to show, if any.
    pub async fn handle(&self, cmd: Command) -> Option<String> {
        match cmd {
            Command::Refresh => {
                let _ = self.refresh().await;
                Some(self.render_text())
            }
            Command::SelectView(key) => {
                self.select_view(&key);
                Some(self.render_text())
            }
            Command::Reload => {
                let _ = self.reload().await;
                Some(self.render_text())
            }
            Command::Redraw => Some(self.render_text()),
            Command::ListDays => Some(self.days_text()),
            Command::Help => Some(format!("{}\n", HELP)),
            Command::Quit => None,
        }
    }
}

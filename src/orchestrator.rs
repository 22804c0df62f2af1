//! Update flow: trigger the remote job, wait for it to start, then poll the
//! published document until its freshness timestamp changes or the deadline
//! passes.
//!
//! `UpdateMachine` is pure: it consumes `Event`s and answers with the next
//! `Step`. `UpdateOrchestrator` executes those steps against the network and
//! an injected clock.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use crate::clock::Clock;
use crate::config::UpdateTimings;
use crate::context::DashboardContext;
use crate::dispatch::Dispatcher;
use crate::error::DashboardError;
use crate::loader::MetricsLoader;
use crate::logging::{log, log_failure, log_transition, obj, v_str, Domain, Level};

pub const TIMEOUT_MESSAGE: &str = "Update took longer than expected. Try again in a moment.";

pub const STATUS_DISPATCHING: &str = "Triggering update on server...";
pub const STATUS_WAITING: &str = "Workflow started. Waiting for processing...";
pub const STATUS_POLLING: &str = "Fetching newly published metrics...";
pub const STATUS_UPDATED: &str = "Updated";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Dispatching,
    AwaitingStart,
    Polling,
    Succeeded,
    TimedOut,
    Failed,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Dispatching => "dispatching",
            Phase::AwaitingStart => "awaiting_start",
            Phase::Polling => "polling",
            Phase::Succeeded => "succeeded",
            Phase::TimedOut => "timed_out",
            Phase::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Succeeded | Phase::TimedOut | Phase::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Trigger { previous: Option<String>, now_ms: u64 },
    DispatchAccepted,
    DispatchRejected { message: String },
    WaitElapsed { now_ms: u64 },
    /// `timestamp` is `None` when the poll failed or the document had none.
    PollCompleted { timestamp: Option<String>, now_ms: u64 },
}

impl Event {
    fn name(&self) -> &'static str {
        match self {
            Event::Trigger { .. } => "trigger",
            Event::DispatchAccepted => "dispatch_accepted",
            Event::DispatchRejected { .. } => "dispatch_rejected",
            Event::WaitElapsed { .. } => "wait_elapsed",
            Event::PollCompleted { .. } => "poll_completed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateOutcome {
    pub timestamp: String,
    pub polls: u32,
    /// From trigger to the successful poll.
    pub elapsed: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Dispatch,
    Wait(Duration),
    Poll,
    Done(Result<UpdateOutcome, DashboardError>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionError {
    pub phase: Phase,
    pub event: &'static str,
}

impl fmt::Display for TransitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "event {} not valid in phase {}", self.event, self.phase.as_str())
    }
}

impl std::error::Error for TransitionError {}

impl From<TransitionError> for DashboardError {
    fn from(e: TransitionError) -> Self {
        DashboardError::Transition { message: e.to_string() }
    }
}

/// New data means a non-empty timestamp different from the one seen at trigger time.
pub fn is_fresh(timestamp: Option<&str>, previous: Option<&str>) -> bool {
    match timestamp {
        Some(ts) => !ts.is_empty() && Some(ts) != previous,
        None => false,
    }
}

#[derive(Debug, Clone)]
pub struct UpdateMachine {
    phase: Phase,
    timings: UpdateTimings,
    previous: Option<String>,
    triggered_ms: u64,
    polling_started_ms: u64,
    polls: u32,
}

impl UpdateMachine {
    pub fn new(timings: UpdateTimings) -> Self {
        Self {
            phase: Phase::Idle,
            timings,
            previous: None,
            triggered_ms: 0,
            polling_started_ms: 0,
            polls: 0,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn polls(&self) -> u32 {
        self.polls
    }

    /// Polling time left before the deadline.
    pub fn remaining(&self, now_ms: u64) -> Duration {
        self.timings.deadline.saturating_sub(self.polling_elapsed(now_ms))
    }

    fn enter(&mut self, to: Phase) {
        log_transition(
            self.phase.as_str(),
            to.as_str(),
            &[("polls", json!(self.polls)), ("previous", self.previous.as_deref().map(v_str).unwrap_or_default())],
        );
        self.phase = to;
    }

    fn polling_elapsed(&self, now_ms: u64) -> Duration {
        Duration::from_millis(now_ms.saturating_sub(self.polling_started_ms))
    }

    fn time_out(&mut self) -> Step {
        self.enter(Phase::TimedOut);
        Step::Done(Err(DashboardError::Timeout { message: TIMEOUT_MESSAGE.to_string() }))
    }

    pub fn apply(&mut self, event: Event) -> Result<Step, TransitionError> {
        let name = event.name();
        match (self.phase, event) {
            (Phase::Idle, Event::Trigger { previous, now_ms }) => {
                self.previous = previous;
                self.triggered_ms = now_ms;
                self.enter(Phase::Dispatching);
                Ok(Step::Dispatch)
            }
            (Phase::Dispatching, Event::DispatchAccepted) => {
                self.enter(Phase::AwaitingStart);
                Ok(Step::Wait(self.timings.grace))
            }
            (Phase::Dispatching, Event::DispatchRejected { message }) => {
                self.enter(Phase::Failed);
                Ok(Step::Done(Err(DashboardError::Dispatch { message })))
            }
            (Phase::AwaitingStart, Event::WaitElapsed { now_ms }) => {
                self.polling_started_ms = now_ms;
                if self.timings.deadline.is_zero() {
                    return Ok(self.time_out());
                }
                self.enter(Phase::Polling);
                Ok(Step::Poll)
            }
            (Phase::Polling, Event::PollCompleted { timestamp, now_ms }) => {
                self.polls += 1;
                if is_fresh(timestamp.as_deref(), self.previous.as_deref()) {
                    self.enter(Phase::Succeeded);
                    return Ok(Step::Done(Ok(UpdateOutcome {
                        timestamp: timestamp.unwrap_or_default(),
                        polls: self.polls,
                        elapsed: Duration::from_millis(now_ms.saturating_sub(self.triggered_ms)),
                    })));
                }
                let remaining = self.remaining(now_ms);
                if remaining.is_zero() {
                    return Ok(self.time_out());
                }
                // Last wait is clamped so the timeout lands on the deadline.
                Ok(Step::Wait(self.timings.poll_interval.min(remaining)))
            }
            (Phase::Polling, Event::WaitElapsed { now_ms }) => {
                if self.polling_elapsed(now_ms) >= self.timings.deadline {
                    return Ok(self.time_out());
                }
                Ok(Step::Poll)
            }
            (phase, _) => Err(TransitionError { phase, event: name }),
        }
    }
}

/// Runs update flows against the real collaborators.
pub struct UpdateOrchestrator {
    dispatcher: Dispatcher,
    loader: Arc<MetricsLoader>,
    clock: Arc<dyn Clock>,
    timings: UpdateTimings,
}

impl UpdateOrchestrator {
    pub fn new(
        dispatcher: Dispatcher,
        loader: Arc<MetricsLoader>,
        clock: Arc<dyn Clock>,
        timings: UpdateTimings,
    ) -> Self {
        Self { dispatcher, loader, clock, timings }
    }

    /// Fails with `Busy` while another run holds the context.
    pub async fn run_update_flow(&self, ctx: &DashboardContext) -> Result<UpdateOutcome, DashboardError> {
        let _guard = ctx.begin_update()?;
        let mut machine = UpdateMachine::new(self.timings);
        let mut step = machine.apply(Event::Trigger {
            previous: ctx.last_updated(),
            now_ms: self.clock.now_ms(),
        })?;

        loop {
            let event = match step {
                Step::Dispatch => {
                    ctx.set_status(STATUS_DISPATCHING);
                    match self.dispatcher.trigger().await {
                        Ok(()) => Event::DispatchAccepted,
                        Err(e) => Event::DispatchRejected { message: e.to_string() },
                    }
                }
                Step::Wait(d) => {
                    if machine.phase() == Phase::AwaitingStart {
                        ctx.set_status(STATUS_WAITING);
                    }
                    self.clock.sleep(d).await;
                    Event::WaitElapsed { now_ms: self.clock.now_ms() }
                }
                Step::Poll => {
                    ctx.set_status(STATUS_POLLING);
                    let remaining = machine.remaining(self.clock.now_ms());
                    // A poll still in flight at the deadline is abandoned.
                    let timestamp = tokio::select! {
                        biased;
                        loaded = self.loader.load(ctx, true) => match loaded {
                            Ok(doc) => doc.last_updated_utc,
                            Err(e) => {
                                log_failure(Domain::Loader, e.error_code(), &e.to_string());
                                ctx.set_status(e.status_line());
                                None
                            }
                        },
                        _ = self.clock.sleep(remaining) => {
                            log(
                                Level::Warn,
                                Domain::Update,
                                "poll_abandoned",
                                obj(&[("poll", json!(machine.polls() + 1))]),
                            );
                            None
                        }
                    };
                    Event::PollCompleted { timestamp, now_ms: self.clock.now_ms() }
                }
                Step::Done(result) => {
                    if result.is_ok() {
                        ctx.set_status(STATUS_UPDATED);
                    }
                    return result;
                }
            };
            step = machine.apply(event)?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::VirtualClock;
    use crate::document::MetricsDocument;
    use crate::transport::{HttpResponse, ScriptedTransport, Transport};
    use async_trait::async_trait;
    use url::Url;

    const PREV: &str = "2024-01-01T00:00:00Z";
    const NEXT: &str = "2024-01-01T00:05:00Z";
    const START_MS: u64 = 1_700_000_000_000;

    fn doc(ts: &str) -> HttpResponse {
        HttpResponse::ok(format!(r#"{{"last_updated_utc":"{}","overall":{{"n_rows":1}}}}"#, ts))
    }

    fn machine() -> UpdateMachine {
        UpdateMachine::new(UpdateTimings::default())
    }

    /// Answers every GET only after `delay`.
    struct SlowTransport {
        inner: Arc<ScriptedTransport>,
        delay: Duration,
    }

    #[async_trait]
    impl Transport for SlowTransport {
        async fn get(&self, url: &str) -> anyhow::Result<HttpResponse> {
            tokio::time::sleep(self.delay).await;
            self.inner.get(url).await
        }

        async fn post(&self, url: &str) -> anyhow::Result<HttpResponse> {
            self.inner.post(url).await
        }
    }

    fn setup() -> (Arc<ScriptedTransport>, Arc<VirtualClock>, UpdateOrchestrator, DashboardContext) {
        let t = Arc::new(ScriptedTransport::new());
        let (clock, orch, ctx) = setup_with(t.clone());
        (t, clock, orch, ctx)
    }

    fn setup_with(t: Arc<dyn Transport>) -> (Arc<VirtualClock>, UpdateOrchestrator, DashboardContext) {
        let clock = Arc::new(VirtualClock::starting_at(START_MS));
        let loader = Arc::new(MetricsLoader::new(
            t.clone(),
            clock.clone(),
            Url::parse("https://example.github.io/pascoa/data/metrics.json").unwrap(),
        ));
        let dispatcher = Dispatcher::new(t, clock.clone(), Url::parse("https://dispatch.example.dev/").unwrap());
        let orch = UpdateOrchestrator::new(dispatcher, loader, clock.clone(), UpdateTimings::default());
        let ctx = DashboardContext::new();
        ctx.apply_document(MetricsDocument::normalize(serde_json::json!({"last_updated_utc": PREV})));
        (clock, orch, ctx)
    }

    #[test]
    fn test_is_fresh() {
        assert!(is_fresh(Some(NEXT), Some(PREV)));
        assert!(is_fresh(Some(NEXT), None));
        assert!(!is_fresh(Some(PREV), Some(PREV)));
        assert!(!is_fresh(Some(""), None));
        assert!(!is_fresh(None, Some(PREV)));
    }

    #[test]
    fn test_machine_happy_path() {
        let mut m = machine();
        assert_eq!(m.apply(Event::Trigger { previous: Some(PREV.into()), now_ms: 0 }).unwrap(), Step::Dispatch);
        assert_eq!(m.apply(Event::DispatchAccepted).unwrap(), Step::Wait(Duration::from_secs(15)));
        assert_eq!(m.phase(), Phase::AwaitingStart);
        assert_eq!(m.apply(Event::WaitElapsed { now_ms: 15_000 }).unwrap(), Step::Poll);
        let step = m
            .apply(Event::PollCompleted { timestamp: Some(PREV.into()), now_ms: 15_000 })
            .unwrap();
        assert_eq!(step, Step::Wait(Duration::from_secs(8)));
        assert_eq!(m.apply(Event::WaitElapsed { now_ms: 23_000 }).unwrap(), Step::Poll);
        let step = m
            .apply(Event::PollCompleted { timestamp: Some(NEXT.into()), now_ms: 23_000 })
            .unwrap();
        assert_eq!(
            step,
            Step::Done(Ok(UpdateOutcome {
                timestamp: NEXT.into(),
                polls: 2,
                elapsed: Duration::from_secs(23)
            }))
        );
        assert!(m.phase().is_terminal());
    }

    #[test]
    fn test_machine_rejection_is_terminal() {
        let mut m = machine();
        m.apply(Event::Trigger { previous: None, now_ms: 0 }).unwrap();
        let step = m.apply(Event::DispatchRejected { message: "server busy".into() }).unwrap();
        assert_eq!(step, Step::Done(Err(DashboardError::dispatch("server busy"))));
        assert_eq!(m.phase(), Phase::Failed);
        assert!(m.apply(Event::WaitElapsed { now_ms: 1 }).is_err());
    }

    #[test]
    fn test_machine_rejects_out_of_order_events() {
        let mut m = machine();
        let err = m.apply(Event::DispatchAccepted).unwrap_err();
        assert_eq!(err, TransitionError { phase: Phase::Idle, event: "dispatch_accepted" });
        m.apply(Event::Trigger { previous: None, now_ms: 0 }).unwrap();
        assert!(m.apply(Event::PollCompleted { timestamp: None, now_ms: 0 }).is_err());
        assert!(m.apply(Event::Trigger { previous: None, now_ms: 0 }).is_err());
    }

    #[test]
    fn test_machine_clamps_last_wait_to_deadline() {
        let mut m = machine();
        m.apply(Event::Trigger { previous: None, now_ms: 0 }).unwrap();
        m.apply(Event::DispatchAccepted).unwrap();
        m.apply(Event::WaitElapsed { now_ms: 15_000 }).unwrap();
        let step = m
            .apply(Event::PollCompleted { timestamp: None, now_ms: 15_000 + 176_000 })
            .unwrap();
        assert_eq!(step, Step::Wait(Duration::from_secs(4)));
        let step = m.apply(Event::WaitElapsed { now_ms: 15_000 + 180_000 }).unwrap();
        assert!(matches!(step, Step::Done(Err(DashboardError::Timeout { .. }))));
        assert_eq!(m.phase(), Phase::TimedOut);
    }

    #[test]
    fn test_machine_zero_deadline_never_polls() {
        let timings = UpdateTimings { deadline: Duration::ZERO, ..UpdateTimings::default() };
        let mut m = UpdateMachine::new(timings);
        m.apply(Event::Trigger { previous: None, now_ms: 0 }).unwrap();
        m.apply(Event::DispatchAccepted).unwrap();
        let step = m.apply(Event::WaitElapsed { now_ms: 15_000 }).unwrap();
        assert!(matches!(step, Step::Done(Err(DashboardError::Timeout { .. }))));
        assert_eq!(m.polls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_failure_skips_polling() {
        let (t, clock, orch, ctx) = setup();
        t.push_post(HttpResponse::new(500, "server busy"));
        let err = orch.run_update_flow(&ctx).await.unwrap_err();
        assert_eq!(err.to_string(), "server busy");
        assert_eq!(t.count("GET"), 0);
        assert_eq!(clock.now_ms(), START_MS);
        assert!(!ctx.is_updating());
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_third_poll() {
        let (t, clock, orch, ctx) = setup();
        t.push_post(HttpResponse::ok(""));
        t.push_get(doc(PREV)).push_get(doc(PREV)).push_get(doc(NEXT));
        let outcome = orch.run_update_flow(&ctx).await.unwrap();
        assert_eq!(outcome.polls, 3);
        assert_eq!(outcome.timestamp, NEXT);
        assert_eq!(outcome.elapsed, Duration::from_secs(15 + 2 * 8));
        assert_eq!(clock.now_ms() - START_MS, 31_000);
        assert_eq!(t.count("GET"), 3);
        assert_eq!(ctx.last_updated().as_deref(), Some(NEXT));
        assert_eq!(ctx.status(), STATUS_UPDATED);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_exactly_at_deadline() {
        let (t, clock, orch, ctx) = setup();
        t.push_post(HttpResponse::ok(""));
        t.push_get(doc(PREV));
        let err = orch.run_update_flow(&ctx).await.unwrap_err();
        assert_eq!(err, DashboardError::Timeout { message: TIMEOUT_MESSAGE.to_string() });
        assert_eq!(clock.now_ms() - START_MS, (15 + 180) * 1000);
        // polls at 0, 8, .., 176 s into the polling phase
        assert_eq!(t.count("GET"), 23);
        assert!(!ctx.is_updating());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_poll_is_cut_off_at_deadline() {
        let inner = Arc::new(ScriptedTransport::new());
        inner.push_post(HttpResponse::ok("")).push_get(doc(PREV));
        let slow = Arc::new(SlowTransport { inner: inner.clone(), delay: Duration::from_secs(11) });
        let (clock, orch, ctx) = setup_with(slow);

        let err = orch.run_update_flow(&ctx).await.unwrap_err();
        assert_eq!(err, DashboardError::Timeout { message: TIMEOUT_MESSAGE.to_string() });
        assert_eq!(clock.now_ms() - START_MS, (15 + 180) * 1000);
        // polls start every 19 s; the one starting at 171 s never answers
        assert_eq!(inner.count("GET"), 9);
        assert!(!ctx.is_updating());
    }

    #[test]
    fn test_remaining_counts_from_polling_start() {
        let mut m = machine();
        m.apply(Event::Trigger { previous: None, now_ms: 0 }).unwrap();
        m.apply(Event::DispatchAccepted).unwrap();
        m.apply(Event::WaitElapsed { now_ms: 15_000 }).unwrap();
        assert_eq!(m.remaining(15_000), Duration::from_secs(180));
        assert_eq!(m.remaining(186_000), Duration::from_secs(9));
        assert_eq!(m.remaining(400_000), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_timestamp_is_never_success() {
        let (t, _clock, orch, ctx) = setup();
        ctx.apply_document(MetricsDocument::default());
        t.push_post(HttpResponse::ok(""));
        t.push_get(HttpResponse::ok(r#"{"n_rows":3}"#));
        let err = orch.run_update_flow(&ctx).await.unwrap_err();
        assert!(matches!(err, DashboardError::Timeout { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_poll_keeps_polling() {
        let (t, clock, orch, ctx) = setup();
        t.push_post(HttpResponse::ok(""));
        t.push_get_error("connection reset").push_get(doc(NEXT));
        let outcome = orch.run_update_flow(&ctx).await.unwrap();
        assert_eq!(outcome.polls, 2);
        assert_eq!(clock.now_ms() - START_MS, 23_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_run_is_refused_while_busy() {
        let (t, _clock, orch, ctx) = setup();
        let _held = ctx.begin_update().unwrap();
        let err = orch.run_update_flow(&ctx).await.unwrap_err();
        assert_eq!(err, DashboardError::Busy);
        assert!(t.requests().is_empty());
    }
}

//! Terminal front end: wires the collaborators together and runs either the
//! interactive dashboard or a one-shot mode.

use std::io::Write;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use url::Url;

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::context::DashboardContext;
use crate::controller::{Command, DashboardController, HELP};
use crate::dispatch::Dispatcher;
use crate::loader::MetricsLoader;
use crate::logging::{log, obj, v_str, Domain, Level};
use crate::orchestrator::UpdateOrchestrator;
use crate::transport::{HttpTransport, Transport};

const CLEAR: &str = "\x1b[2J\x1b[H";

pub fn build(cfg: &Config) -> Result<DashboardController> {
    cfg.validate()?;
    let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(cfg.http_timeout)?);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    build_with(cfg, transport, clock)
}

/// Same wiring with injected network and time.
pub fn build_with(
    cfg: &Config,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
) -> Result<DashboardController> {
    let metrics_url = cfg.metrics_url()?;
    let dispatch_url = Url::parse(&cfg.dispatch_url)?;

    let loader = Arc::new(MetricsLoader::new(transport.clone(), clock.clone(), metrics_url.clone()));
    let dispatcher = Dispatcher::new(transport, clock.clone(), dispatch_url.clone());
    let orchestrator = Arc::new(UpdateOrchestrator::new(dispatcher, loader.clone(), clock.clone(), cfg.timings));

    log(
        Level::Info,
        Domain::System,
        "configured",
        obj(&[
            ("metrics_url", v_str(metrics_url.as_str())),
            ("dispatch_url", v_str(dispatch_url.as_str())),
            ("grace_secs", json!(cfg.timings.grace.as_secs())),
            ("poll_secs", json!(cfg.timings.poll_interval.as_secs())),
            ("deadline_secs", json!(cfg.timings.deadline.as_secs())),
        ]),
    );

    Ok(DashboardController::new(
        DashboardContext::new(),
        loader,
        orchestrator,
        clock,
        cfg.display_utc_offset_hours,
    ))
}

/// Full screen: view, control state, status line, prompt.
pub fn compose_screen(controller: &DashboardController) -> String {
    let state = controller.context().snapshot();
    let selector = controller.day_selector();
    let mut out = String::from("Pascoa metrics\n");
    if selector.enabled {
        let label = selector
            .options
            .iter()
            .find(|o| o.key == selector.selected)
            .map(|o| o.label.as_str())
            .unwrap_or("");
        out.push_str(&format!("View: {}  (`days` to list, `view <day>` to switch)\n", label));
    }
    out.push('\n');
    out.push_str(&controller.render_text());
    out.push('\n');
    if state.updating {
        out.push_str("[refresh] busy\n");
    } else {
        out.push_str("[refresh] ready (`r`)\n");
    }
    out.push_str(&format!("Status: {}\n> ", state.status));
    out
}

fn draw(controller: &DashboardController, extra: Option<&str>) {
    let mut stdout = std::io::stdout();
    let _ = write!(stdout, "{}", CLEAR);
    if let Some(text) = extra {
        let _ = writeln!(stdout, "{}", text.trim_end());
        let _ = writeln!(stdout);
    }
    let _ = write!(stdout, "{}", compose_screen(controller));
    let _ = stdout.flush();
}

/// Reads commands from stdin until `quit` or EOF. The background reload and
/// a manual refresh may overlap; both write the shared context.
pub async fn run_interactive(controller: DashboardController, cfg: &Config) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut background = tokio::time::interval(cfg.background_refresh);
    let mut redraw = tokio::time::interval(cfg.time_ago_refresh);
    redraw.tick().await;
    let mut changes = controller.context().subscribe();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match Command::parse(&line) {
                    Ok(Command::Quit) => break,
                    Ok(Command::Refresh) => {
                        if controller.context().is_updating() {
                            draw(&controller, Some("An update is already in progress."));
                            continue;
                        }
                        let c = controller.clone();
                        tokio::spawn(async move {
                            let _ = c.refresh().await;
                        });
                    }
                    Ok(Command::Help) => draw(&controller, Some(HELP)),
                    Ok(Command::ListDays) => draw(&controller, Some(&controller.days_text())),
                    Ok(cmd) => {
                        controller.handle(cmd).await;
                        draw(&controller, None);
                    }
                    Err(msg) => draw(&controller, Some(&msg)),
                }
            }
            _ = background.tick() => {
                let c = controller.clone();
                tokio::spawn(async move {
                    let _ = c.reload().await;
                });
            }
            _ = redraw.tick() => draw(&controller, None),
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                draw(&controller, None);
            }
        }
    }

    log(Level::Info, Domain::System, "shutdown", obj(&[]));
    Ok(())
}

/// `show [day]`: load once and print.
pub async fn run_show(controller: &DashboardController, day: Option<&str>) -> Result<()> {
    controller.reload().await?;
    if let Some(day) = day {
        controller.select_view(day);
    }
    print!("{}", controller.render_text());
    Ok(())
}

/// `refresh`: load the current document, run one update flow, print the result.
pub async fn run_refresh_once(controller: &DashboardController) -> Result<()> {
    if let Err(e) = controller.reload().await {
        eprintln!("initial load failed: {}", e);
    }
    let outcome = controller.refresh().await.map_err(|e| anyhow!(e.status_line()))?;
    println!(
        "Updated to {} after {} poll(s) in {}s",
        outcome.timestamp,
        outcome.polls,
        outcome.elapsed.as_secs()
    );
    print!("{}", controller.render_text());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::VirtualClock;
    use crate::transport::{HttpResponse, ScriptedTransport};

    fn controller(t: Arc<ScriptedTransport>) -> DashboardController {
        let cfg = Config {
            page_url: "https://example.github.io/pascoa/".to_string(),
            ..Config::default()
        };
        build_with(&cfg, t, Arc::new(VirtualClock::starting_at(1_704_067_200_000))).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_screen_hides_selector_without_days() {
        let t = Arc::new(ScriptedTransport::new());
        t.push_get(HttpResponse::ok(r#"{"last_updated_utc":"2024-01-01T00:00:00Z","n_rows":5}"#));
        let c = controller(t.clone());
        c.reload().await.unwrap();
        let screen = compose_screen(&c);
        assert!(!screen.contains("View:"));
        assert!(screen.contains("Total rows: 5"));
        assert!(screen.contains("[refresh] ready"));
        assert!(screen.ends_with("Status: OK\n> "));
        assert_eq!(t.requests()[0].1, "https://example.github.io/pascoa/data/metrics.json?t=1704067200000");
    }

    #[tokio::test(start_paused = true)]
    async fn test_screen_shows_selected_day() {
        let t = Arc::new(ScriptedTransport::new());
        t.push_get(HttpResponse::ok(
            r#"{"overall":{"n_rows":2},"per_day":{"29/03":{"n_rows":1}}}"#,
        ));
        let c = controller(t);
        run_show(&c, Some("29/03")).await.unwrap();
        let screen = compose_screen(&c);
        assert!(screen.contains("View: Day 29/03"));
        assert!(screen.contains("Total rows: 1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_show_propagates_fetch_error() {
        let t = Arc::new(ScriptedTransport::new());
        t.push_get(HttpResponse::new(404, ""));
        let c = controller(t);
        let err = run_show(&c, None).await.unwrap_err();
        assert_eq!(err.to_string(), "HTTP 404");
    }
}

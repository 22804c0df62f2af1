use anyhow::{bail, Result};

use pascoa_dashboard::app;
use pascoa_dashboard::config::Config;
use pascoa_dashboard::logging::{log, obj, v_str, Domain, Level};

const USAGE: &str = "usage: pascoa-dashboard [watch | show [day] | refresh]";

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cfg = Config::from_env();
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mode = args.first().map(String::as_str).unwrap_or("watch");

    log(
        Level::Info,
        Domain::System,
        "startup",
        obj(&[("mode", v_str(mode)), ("page_url", v_str(&cfg.page_url))]),
    );

    let controller = app::build(&cfg)?;
    match mode {
        "watch" => app::run_interactive(controller, &cfg).await,
        "show" => app::run_show(&controller, args.get(1).map(String::as_str)).await,
        "refresh" => app::run_refresh_once(&controller).await,
        "help" | "-h" | "--help" => {
            println!("{}", USAGE);
            Ok(())
        }
        other => bail!("unknown mode `{}`\n{}", other, USAGE),
    }
}

//! Long-running commands: the scheduler and the web server.

use std::sync::Arc;

use console::style;

use crate::config::Settings;
use crate::scheduler;

use super::super::helpers::build_runner;

/// Start the scheduler and block until Ctrl+C.
pub async fn cmd_start_all(settings: &Settings) -> anyhow::Result<()> {
    let runner = Arc::new(build_runner(settings).await?);
    let mut sched = scheduler::start(runner).await?;

    println!(
        "{} Scheduler running ({}). Press Ctrl+C to stop",
        style("→").cyan(),
        settings.timezone
    );
    tokio::signal::ctrl_c().await?;

    println!("{} Shutting down", style("→").cyan());
    sched.shutdown().await?;
    Ok(())
}

/// Start the web server, with the scheduler unless `schedule` is false.
pub async fn cmd_serve(
    settings: &Settings,
    bind: Option<&str>,
    schedule: bool,
) -> anyhow::Result<()> {
    let (host, port) = match bind {
        Some(bind) => parse_bind_address(bind, settings.port)?,
        None => (settings.host.clone(), settings.port),
    };

    println!("{} Opening database...", style("→").cyan());
    let runner = Arc::new(build_runner(settings).await?);
    println!("  {} Database ready", style("✓").green());

    let _sched = if schedule {
        Some(scheduler::start(runner.clone()).await?)
    } else {
        None
    };

    println!(
        "{} Starting chanstats server at http://{}:{}",
        style("→").cyan(),
        host,
        port
    );
    println!("  Press Ctrl+C to stop");

    crate::server::serve(runner, &host, port).await
}

/// Parse a bind address that can be:
/// - Just a port: "3030" -> 127.0.0.1:3030
/// - Just a host: "0.0.0.0" -> 0.0.0.0:`default_port`
/// - Host and port: "0.0.0.0:3030" -> 0.0.0.0:3030
fn parse_bind_address(bind: &str, default_port: u16) -> anyhow::Result<(String, u16)> {
    if let Ok(port) = bind.parse::<u16>() {
        return Ok(("127.0.0.1".to_string(), port));
    }

    if let Some((host, port_str)) = bind.rsplit_once(':') {
        if let Ok(port) = port_str.parse::<u16>() {
            return Ok((host.to_string(), port));
        }
        anyhow::bail!("invalid port in bind address {:?}", bind);
    }

    Ok((bind.to_string(), default_port))
}

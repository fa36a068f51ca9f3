use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ncmonitor_services::{
    display_snapshot, now_ms, render_tab, status_line, ConfigScan, FilePattern, MonitorSettings,
    PollEvent, PollResult, ServerConfig, ServerState, Services, Tab, TabContent,
    DEFAULT_FILE_PREFIX, DEFAULT_FILE_SUFFIX, DEFAULT_POLL_INTERVAL_SECS,
    DEFAULT_REQUEST_TIMEOUT_SECS, MAX_POLL_INTERVAL_SECS, MIN_POLL_INTERVAL_SECS,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "ncmonitor")]
#[command(about = "ncmonitor - Nextcloud serverinfo monitor", long_about = None)]
struct Cli {
    /// Directory containing server config files
    #[arg(long, env = "NCMONITOR_DIR", default_value = ".", global = true)]
    dir: PathBuf,

    /// Config file name prefix
    #[arg(long, default_value = DEFAULT_FILE_PREFIX, global = true)]
    prefix: String,

    /// Config file name suffix
    #[arg(long, default_value = DEFAULT_FILE_SUFFIX, global = true)]
    suffix: String,

    /// Request timeout in seconds
    #[arg(long, env = "NCMONITOR_TIMEOUT", default_value_t = DEFAULT_REQUEST_TIMEOUT_SECS, global = true)]
    timeout: u64,

    /// Poll interval in seconds
    #[arg(
        short,
        long,
        env = "NCMONITOR_INTERVAL",
        default_value_t = DEFAULT_POLL_INTERVAL_SECS,
        value_parser = clap::value_parser!(u64).range(MIN_POLL_INTERVAL_SECS..=MAX_POLL_INTERVAL_SECS),
        global = true
    )]
    interval: u64,

    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List configured servers
    Servers,

    /// Poll once and print the results
    Fetch {
        /// Only this server
        #[arg(short, long)]
        server: Option<String>,

        /// Tab to show (core, health, activity, storage, config, raw)
        #[arg(short, long, default_value_t = Tab::CoreMetrics)]
        tab: Tab,

        /// Print poll results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Poll continuously and redraw after every cycle (default)
    Watch {
        /// Only this server
        #[arg(short, long)]
        server: Option<String>,

        /// Tab to show (core, health, activity, storage, config, raw)
        #[arg(short, long, default_value_t = Tab::CoreMetrics)]
        tab: Tab,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let _guard = init_tracing(cli.log_file.as_deref())?;

    let settings = MonitorSettings {
        config_dir: cli.dir.clone(),
        pattern: FilePattern::new(&cli.prefix, &cli.suffix),
        poll_interval_secs: cli.interval,
        request_timeout_secs: cli.timeout,
    };
    settings.validate()?;
    let services = Services::new(settings);

    match cli.command {
        Some(Commands::Servers) => cmd_servers(&services)?,
        Some(Commands::Fetch { server, tab, json }) => {
            cmd_fetch(&services, server.as_deref(), tab, json).await?
        }
        Some(Commands::Watch { server, tab }) => {
            cmd_watch(&services, server.as_deref(), tab).await?
        }
        None => cmd_watch(&services, None, Tab::default()).await?,
    }

    Ok(())
}

/// Logs go to stderr so they never mix with printed output
fn init_tracing(log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .with_context(|| format!("Log file path has no file name: {}", path.display()))?;
            let file_appender = tracing_appender::rolling::never(dir, name);
            let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
            (
                Some(fmt::layer().with_writer(file_writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("ncmonitor_services=info,ncmonitor_cli=info")
        }))
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    Ok(guard)
}

/// Discover servers, optionally narrowed to one, failing when none are usable
fn select_servers(services: &Services, only: Option<&str>) -> Result<Vec<ServerConfig>> {
    let scan = services.discover_servers()?;

    if scan.is_empty() {
        let settings = &services.settings;
        anyhow::bail!(
            "No valid config files found in {}.\n\
             Create a file named like '{}_myserver{}' with two lines:\n  \
             https://cloud.example.com\n  <serverinfo token>",
            settings.config_dir.display(),
            settings.pattern.prefix,
            settings.pattern.suffix
        );
    }

    match only {
        Some(name) => {
            let server = scan.find(name).cloned().with_context(|| {
                let names: Vec<&str> = scan.servers.iter().map(|s| s.name.as_str()).collect();
                format!("Unknown server '{}'. Available: {}", name, names.join(", "))
            })?;
            Ok(vec![server])
        }
        None => Ok(scan.servers),
    }
}

fn cmd_servers(services: &Services) -> Result<()> {
    let ConfigScan { servers, skipped } = services.discover_servers()?;

    println!();
    println!("Configured Servers:");
    println!("{:-<80}", "");
    println!("  {:<4} {:<24} {:<36} {}", "#", "Name", "Host", "Token");
    println!("{:-<80}", "");
    for (i, s) in servers.iter().enumerate() {
        println!(
            "  {:<4} {:<24} {:<36} {}",
            i + 1,
            s.name,
            s.host(),
            s.masked_token()
        );
    }
    if servers.is_empty() {
        println!("  (none)");
    }

    if !skipped.is_empty() {
        println!();
        println!("Skipped Files:");
        for file in &skipped {
            println!("  {}: {}", file.path.display(), file.reason);
        }
    }
    println!();

    Ok(())
}

async fn cmd_fetch(services: &Services, only: Option<&str>, tab: Tab, json: bool) -> Result<()> {
    let servers = select_servers(services, only)?;
    let summary = services.poll_once(servers.clone()).await;
    debug!(succeeded = summary.succeeded, failed = summary.failed, "Fetch complete");

    if json {
        let results: BTreeMap<&str, PollResult> = servers
            .iter()
            .filter_map(|s| services.store.latest(&s.name).map(|r| (s.name.as_str(), r)))
            .collect();
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        render_servers(services, &servers, tab);
    }

    if summary.succeeded == 0 {
        anyhow::bail!("All {} servers failed to respond", summary.failed);
    }
    Ok(())
}

async fn cmd_watch(services: &Services, only: Option<&str>, initial_tab: Tab) -> Result<()> {
    let servers = select_servers(services, only)?;
    let (handle, mut events) = services.scheduler(servers.clone()).spawn();
    info!(servers = servers.len(), "Watching");

    let mut tab = initial_tab;
    let mut interval = services.settings.poll_interval();
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping");
                break;
            }
            event = events.recv() => match event {
                Some(PollEvent::CycleFinished { .. }) => {
                    redraw(services, &servers, tab, interval);
                }
                Some(PollEvent::ServerPolled { server, failure: Some(kind), .. }) => {
                    debug!("{} poll failed: {}", server, kind);
                }
                Some(_) => {}
                None => break,
            },
            line = stdin.next_line(), if stdin_open => match line {
                Ok(Some(line)) => match parse_watch_command(&line) {
                    WatchCommand::Refresh => {
                        println!("  Refreshing...");
                        handle.refresh_now();
                    }
                    WatchCommand::Interval(secs) => {
                        interval = Duration::from_secs(secs);
                        handle.set_interval(interval);
                        println!("  Refresh interval set to {}s. Fetching now...", secs);
                    }
                    WatchCommand::Tab(next) => {
                        tab = next;
                        redraw(services, &servers, tab, interval);
                    }
                    WatchCommand::Quit => break,
                    WatchCommand::Help => display_watch_help(),
                    WatchCommand::Invalid(msg) => println!("  {}", msg),
                    WatchCommand::Empty => {}
                },
                Ok(None) | Err(_) => stdin_open = false,
            },
        }
    }

    let cycles = handle.shutdown().await;
    info!(cycles, "Stopped");
    Ok(())
}

#[derive(Debug, PartialEq)]
enum WatchCommand {
    Refresh,
    Interval(u64),
    Tab(Tab),
    Quit,
    Help,
    Invalid(String),
    Empty,
}

fn parse_watch_command(line: &str) -> WatchCommand {
    let parts: Vec<&str> = line.split_whitespace().collect();
    let Some(cmd) = parts.first() else {
        return WatchCommand::Empty;
    };

    match cmd.to_lowercase().as_str() {
        "refresh" | "r" => WatchCommand::Refresh,
        "interval" | "i" => match parts.get(1).map(|s| s.parse::<u64>()) {
            Some(Ok(secs)) if (MIN_POLL_INTERVAL_SECS..=MAX_POLL_INTERVAL_SECS).contains(&secs) => {
                WatchCommand::Interval(secs)
            }
            _ => WatchCommand::Invalid(format!(
                "Usage: interval <seconds> ({}-{})",
                MIN_POLL_INTERVAL_SECS, MAX_POLL_INTERVAL_SECS
            )),
        },
        "tab" | "t" => match parts.get(1).map(|s| s.parse::<Tab>()) {
            Some(Ok(tab)) => WatchCommand::Tab(tab),
            Some(Err(e)) => WatchCommand::Invalid(e),
            None => WatchCommand::Invalid("Usage: tab <name>".to_string()),
        },
        "quit" | "exit" | "q" => WatchCommand::Quit,
        "help" | "h" | "?" => WatchCommand::Help,
        other => WatchCommand::Invalid(format!(
            "Unknown command: {}. Type 'help' for available commands.",
            other
        )),
    }
}

fn display_watch_help() {
    println!();
    println!("Watch Commands:");
    println!("  refresh, r             Poll all servers now");
    println!(
        "  interval, i <secs>     Set refresh interval ({}-{}s)",
        MIN_POLL_INTERVAL_SECS, MAX_POLL_INTERVAL_SECS
    );
    println!("  tab, t <name>          Switch tab:");
    for tab in Tab::ALL {
        println!("                           {:<10} {}", tab.key(), tab.label());
    }
    println!("  help, h                Show this help message");
    println!("  quit, q                Stop watching (or Ctrl+C)");
    println!();
}

fn redraw(services: &Services, servers: &[ServerConfig], tab: Tab, interval: Duration) {
    print!("\x1B[2J\x1B[1;1H");
    println!(
        "ncmonitor - {} server(s), every {}s - {} (type 'help' for commands)",
        servers.len(),
        interval.as_secs(),
        tab.label()
    );
    render_states(services, servers, tab, interval);
}

fn render_servers(services: &Services, servers: &[ServerConfig], tab: Tab) {
    render_states(services, servers, tab, services.settings.poll_interval());
}

fn render_states(services: &Services, servers: &[ServerConfig], tab: Tab, interval: Duration) {
    let now = now_ms();
    for (server, state) in services.server_states(servers) {
        println!();
        println!("{}", server.display_label());
        println!("{:=<80}", "");
        match state {
            Some(state) => render_state(&state, tab, interval, now),
            None => println!("  Waiting for first poll..."),
        }
    }
    println!();
}

fn render_state(state: &ServerState, tab: Tab, interval: Duration, now: u64) {
    println!("  {}", status_line(state, interval, now));

    let Some(snapshot) = display_snapshot(state) else {
        return;
    };

    println!();
    println!("  {}", tab.label());
    println!("  {:-<40}", "");
    match render_tab(tab, snapshot, now) {
        TabContent::Rows(rows) => {
            for row in rows {
                println!("  {:<32} {}", format!("{}:", row.label), row.value);
            }
        }
        TabContent::Text(text) => println!("{}", text),
    }
}

// main.rs - NetEnum - Internal network enumeration
// Purpose: Bootstrap launcher (dependency setup + hand-off to the engine program),
//          enumeration API server, one-shot CLI scans and tool status checks

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

// Module declarations
mod api;
mod auth;
mod config;
mod engine;
mod error;
mod graph;
mod icons;
mod launcher;
mod logger;
mod model;
mod nmap;
mod package_manager;
mod privilege;
mod rate_limiter;
mod store;
mod system;
mod tools;
mod venv;
mod web_capture;

use config::{AppConfig, EngineConfig, LauncherConfig};
use engine::Engine;
use error::LaunchError;
use logger::Logger;
use system::{HostShell, SystemShell};

/// NetEnum - Internal network enumeration
#[derive(Parser, Debug)]
#[command(
    name = "netenum",
    version,
    about = "Host discovery, port/service scanning and web capture for internal networks",
    long_about = r#"
╔═══════════════════════════════════════════════════════════════════════════════╗
║                   NETENUM - Internal Network Enumeration                      ║
╚═══════════════════════════════════════════════════════════════════════════════╝

Run without arguments (as root) to bootstrap the environment:

  1. Verify python3, pip3, venv, nmap and a headless browser,
     installing missing ones with the system package manager
  2. Create/reuse the Python virtual environment and install requirements.txt
  3. Hand off to the entry point program (main.py by default)

Logs go to the terminal and to a timestamped log file that is removed on exit.

═══════════════════════════════════════════════════════════════════════════════

EXAMPLES:

  Bootstrap and launch:
    sudo netenum

  Serve the enumeration API on port 8000:
    sudo netenum --serve

  Scan a network from the command line:
    sudo netenum --scan 192.168.1.0/24

  Check which tools are installed:
    netenum --check-tools

═══════════════════════════════════════════════════════════════════════════════

OUTPUT FILES:

  scan_results.json      # Hosts, ports, HTTP responses, screenshots
  scan_log.txt           # Summary of the last scan
  scans/                 # Raw nmap output (-oA)
  api_token.txt          # Bearer token for the API

═══════════════════════════════════════════════════════════════════════════════
"#
)]
struct Args {
    // ═══════════════════════════════════════════════════════════════════════════
    // MODES
    // ═══════════════════════════════════════════════════════════════════════════

    /// Serve the enumeration API instead of bootstrapping
    #[arg(long, help_heading = "Modes", conflicts_with_all = ["scan", "check_tools"],
          help = "Start the enumeration API (token auth, rate limited, requires root)")]
    serve: bool,

    /// Scan a network once and exit
    #[arg(long, value_name = "CIDR", help_heading = "Modes", conflicts_with = "check_tools",
          help = "Run a single scan of CIDR from the command line (requires root)")]
    scan: Option<String>,

    // ═══════════════════════════════════════════════════════════════════════════
    // TOOL MANAGEMENT
    // ═══════════════════════════════════════════════════════════════════════════

    /// Check which tools are installed
    #[arg(long, help_heading = "Tool Management",
          help = "Report required tools and whether each one is present")]
    check_tools: bool,

    // ═══════════════════════════════════════════════════════════════════════════
    // CONFIGURATION & OUTPUT
    // ═══════════════════════════════════════════════════════════════════════════

    /// Configuration file
    #[arg(short, long, value_name = "FILE", help_heading = "Configuration",
          help = "TOML configuration file (default: ./netenum.toml when present)")]
    config: Option<PathBuf>,

    /// API port
    #[arg(short, long, value_name = "PORT", help_heading = "Configuration",
          help = "Port for the API server (default: 8000)")]
    port: Option<u16>,

    /// Verbose output
    #[arg(short, long, help_heading = "Output",
          help = "Show debug messages on the terminal")]
    verbose: bool,
}

fn main() {
    let args = Args::parse();

    print_banner();

    let mut config = match AppConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", format!("[-] {:#}", e).red().bold());
            std::process::exit(1);
        }
    };
    if let Some(port) = args.port {
        config.engine.port = port;
    }

    let code = if args.check_tools {
        run_async(false, check_tools(&config.launcher))
    } else if args.serve {
        run_async(true, run_server(config.engine, args.verbose))
    } else if let Some(network) = args.scan.as_deref() {
        run_async(true, run_cli_scan(config.engine, network, args.verbose))
    } else {
        run_launcher(&config.launcher, args.verbose)
    };

    std::process::exit(code);
}

fn print_banner() {
    println!("{}", "═══════════════════════════════════════════════════════════════".cyan().bold());
    println!("{}", "  ███╗   ██╗███████╗████████╗███████╗███╗   ██╗██╗   ██╗███╗   ███╗".cyan().bold());
    println!("{}", "  ████╗  ██║██╔════╝╚══██╔══╝██╔════╝████╗  ██║██║   ██║████╗ ████║".cyan().bold());
    println!("{}", "  ██╔██╗ ██║█████╗     ██║   █████╗  ██╔██╗ ██║██║   ██║██╔████╔██║".cyan().bold());
    println!("{}", "  ██║╚██╗██║██╔══╝     ██║   ██╔══╝  ██║╚██╗██║██║   ██║██║╚██╔╝██║".cyan().bold());
    println!("{}", "  ██║ ╚████║███████╗   ██║   ███████╗██║ ╚████║╚██████╔╝██║ ╚═╝ ██║".cyan().bold());
    println!("{}", "  ╚═╝  ╚═══╝╚══════╝   ╚═╝   ╚══════╝╚═╝  ╚═══╝ ╚═════╝ ╚═╝     ╚═╝".cyan().bold());
    println!("{}", "═══════════════════════════════════════════════════════════════".cyan().bold());
    println!("{}", format!("  NetEnum v{} - Internal Network Enumeration", env!("CARGO_PKG_VERSION")).white().bold());
    println!("{}", "  Host Discovery | Service Detection | Web Capture".white());
    println!("{}", "═══════════════════════════════════════════════════════════════\n".cyan().bold());
}

/// Run an engine-side future on a multi-thread runtime; errors exit 1
fn run_async<F>(multi_thread: bool, future: F) -> i32
where
    F: std::future::Future<Output = Result<()>>,
{
    let runtime = if multi_thread {
        tokio::runtime::Builder::new_multi_thread().enable_all().build()
    } else {
        tokio::runtime::Builder::new_current_thread().enable_all().build()
    };

    let result = runtime
        .context("Failed to start the async runtime")
        .and_then(|runtime| runtime.block_on(future));

    match result {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("{}", format!("[-] {:#}", e).red().bold());
            1
        }
    }
}

/// Default mode: bootstrap the environment and hand off to the entry point
fn run_launcher(config: &LauncherConfig, verbose: bool) -> i32 {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("{}", format!("[-] Failed to start the async runtime: {}", e).red().bold());
            return 1;
        }
    };

    let result = runtime.block_on(launcher::run(
        &HostShell,
        config,
        privilege::effective_uid(),
        verbose,
        launcher::wait_for_signal(),
    ));

    match result {
        Ok(()) => 0,
        Err(e) => {
            // Anything past the privilege check was already logged
            if matches!(e, LaunchError::Privilege) {
                eprintln!("{}", format!("[-] {}", e).red().bold());
            }
            e.exit_code()
        }
    }
}

async fn check_tools(config: &LauncherConfig) -> Result<()> {
    tools::check_tools_status(&HostShell, &config.python).await;
    Ok(())
}

async fn run_server(config: EngineConfig, verbose: bool) -> Result<()> {
    // OS detection (-O) needs raw sockets
    privilege::require_root(privilege::effective_uid())?;

    let logger = Logger::new(verbose);
    let token = auth::load_or_create_token(&config.token_file, &logger)?;
    let shell: Arc<dyn SystemShell> = Arc::new(HostShell);
    let engine = Arc::new(Engine::new(shell, logger, config));

    api::start_api_server(engine, token).await
}

async fn run_cli_scan(config: EngineConfig, network: &str, verbose: bool) -> Result<()> {
    privilege::require_root(privilege::effective_uid())?;

    let network = api::validate_cidr(network)
        .ok_or_else(|| anyhow!("Invalid network CIDR '{}' (format: x.x.x.x/x)", network))?
        .to_string();

    let logger = Logger::new(verbose);
    let results_file = config.results_file.clone();
    let engine = Engine::new(Arc::new(HostShell), logger.clone(), config);
    let guard = engine.try_begin().context("A scan is already running")?;

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.enable_steady_tick(Duration::from_millis(120));
    spinner.set_message(format!("Scanning {}", network));

    let (subscription, mut lines) = logger.subscribe();
    let ticker = spinner.clone();
    let follower = tokio::spawn(async move {
        while let Some(line) = lines.recv().await {
            // "<date> <time> [LEVEL] message"
            let message = line.split_once("] ").map(|(_, m)| m).unwrap_or(&line);
            ticker.set_message(message.trim_end().to_string());
        }
    });

    let result = engine.run_scan(guard, &network).await;
    logger.unsubscribe(subscription);
    follower.await.ok();
    spinner.finish_and_clear();

    let scan = result?;
    let ports: usize = scan.hosts.iter().map(|h| h.open_ports.len()).sum();
    println!();
    println!("{}", "═══════════════════════════════════════════════════════════════".green().bold());
    println!("{}", format!("[+] {} live hosts, {} open ports", scan.hosts.len(), ports).green().bold());
    for host in &scan.hosts {
        println!(
            "    {} {}",
            host.ip.white().bold(),
            host.hostname.as_deref().unwrap_or("").dimmed()
        );
        for port in &host.open_ports {
            println!(
                "      {:>5}/tcp  {:<14} {}",
                port.port,
                port.service,
                port.version.as_deref().unwrap_or("")
            );
        }
    }
    println!("{}", format!("[+] Results saved to {}", results_file.display()).green());
    println!("{}", "═══════════════════════════════════════════════════════════════".green().bold());
    Ok(())
}

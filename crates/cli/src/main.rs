//! lanscout CLI - local network discovery from the terminal.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use colored::*;
use lanscout_core::{compare_ips, Device, Engine, Event, InterfaceInfo, OuiRegistry};
use lanscout_core::scanners::{ArpScanner, MdnsScanner, SsdpScanner};
use lanscout_probes::SubnetSweeper;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

/// lanscout - discover devices on the local network without privileges
#[derive(Parser, Debug)]
#[command(name = "lanscout")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Discovers local network devices via ARP, mDNS, and SSDP")]
struct Cli {
    /// Network interface to scan on (auto-detected when omitted)
    #[arg(short = 'i', long = "interface", value_name = "IFACE", default_value = "")]
    interface: String,

    /// Seconds between scan starts (0 = single scan)
    #[arg(long = "interval", value_name = "SECONDS", default_value = "20")]
    interval: u64,

    /// Per-scan timeout in seconds
    #[arg(long = "timeout", value_name = "SECONDS", default_value = "10")]
    timeout: u64,

    /// Run one blocking scan, print the result, and exit
    #[arg(long = "once")]
    once: bool,

    /// Disable the ARP-priming subnet sweeper
    #[arg(long = "no-sweep")]
    no_sweep: bool,

    /// Directory for the OUI manufacturer cache (disables caching when omitted)
    #[arg(long = "cache-dir", value_name = "DIR")]
    cache_dir: Option<PathBuf>,

    /// Output format
    #[arg(short = 'o', long = "output", value_enum, default_value = "human")]
    output: OutputFormat,

    /// Verbose output (-v info, -vv debug, -vvv trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (errors only)
    #[arg(short = 'q', long = "quiet")]
    quiet: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum OutputFormat {
    Human,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    debug!("CLI arguments: {:?}", cli);

    let iface = InterfaceInfo::resolve(&cli.interface).context("Failed to resolve interface")?;
    info!(interface = %iface.name, ip = %iface.ipv4, subnet = %iface.subnet, "scanning");

    let oui = match OuiRegistry::new(cli.cache_dir.clone()) {
        Ok(registry) => Some(registry),
        Err(err) => {
            eprintln!("{} {err}", "warning:".yellow().bold());
            None
        }
    };

    let mut builder = Engine::builder()
        .interface(iface.clone())
        .scanner(Arc::new(ArpScanner::new(iface.clone())))
        .scanner(Arc::new(MdnsScanner::new(iface.clone())))
        .scanner(Arc::new(SsdpScanner::new(iface.clone())))
        .scan_interval(Duration::from_secs(cli.interval))
        .scan_timeout(Duration::from_secs(cli.timeout.max(1)));
    if !cli.no_sweep {
        builder = builder.sweeper(Arc::new(SubnetSweeper::new(iface)));
    }
    if let Some(registry) = oui {
        builder = builder.oui_registry(registry);
    }
    let engine = Arc::new(builder.build().context("Failed to build engine")?);

    if cli.once {
        run_once(&engine, cli.output).await
    } else {
        run_continuous(engine, cli.output).await
    }
}

/// One blocking scan; prints devices sorted by IP.
async fn run_once(engine: &Engine, output: OutputFormat) -> Result<()> {
    let mut devices = engine.scan().await.context("Scan failed")?;
    devices.sort_by(|a, b| compare_ips(&a.ip(), &b.ip()));

    match output {
        OutputFormat::Json => {
            let snapshots: Vec<_> = devices.iter().map(|d| d.snapshot()).collect();
            println!("{}", serde_json::to_string_pretty(&snapshots)?);
        }
        OutputFormat::Human => {
            if devices.is_empty() {
                println!("No devices found.");
                return Ok(());
            }
            for device in &devices {
                print_device_line(device);
            }
            println!("\n{} device(s)", devices.len());
        }
    }
    Ok(())
}

/// Continuous mode: stream events until Ctrl-C.
async fn run_continuous(engine: Arc<Engine>, output: OutputFormat) -> Result<()> {
    let mut events = engine
        .start()
        .expect("freshly built engine hands out its event stream");

    let stopper = Arc::clone(&engine);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, stopping");
            stopper.stop().await;
        }
    });

    while let Some(event) = events.recv().await {
        match event {
            Event::DeviceDiscovered(device) => match output {
                OutputFormat::Json => println!("{}", serde_json::to_string(&device.snapshot())?),
                OutputFormat::Human => print_device_line(&device),
            },
            Event::ScanCompleted(stats) => {
                info!(
                    devices = stats.device_count,
                    duration = ?stats.duration,
                    "scan completed"
                );
            }
            Event::Error(err) => {
                eprintln!("{} {err}", "error:".red().bold());
            }
            Event::EngineStarted | Event::ScanStarted | Event::EngineStopped => {
                debug!(kind = event.kind(), "lifecycle event");
            }
        }
    }

    Ok(())
}

fn print_device_line(device: &Device) {
    let snapshot = device.snapshot();
    let mut sources = snapshot.sources.join(",");
    if sources.is_empty() {
        sources = "-".to_string();
    }
    println!(
        "{:<16} {:<18} {:<28} {:<24} [{}]",
        snapshot.ip.to_string().bold(),
        snapshot.mac.as_deref().unwrap_or("-"),
        snapshot.display_name.as_deref().unwrap_or("-"),
        snapshot.manufacturer.as_deref().unwrap_or("-"),
        sources.dimmed(),
    );
}

fn init_logging(cli: &Cli) {
    let level = if cli.quiet {
        tracing::Level::ERROR
    } else {
        match cli.verbose {
            0 => tracing::Level::WARN,
            1 => tracing::Level::INFO,
            2 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        }
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_level(true)
                .with_filter(tracing_subscriber::filter::LevelFilter::from_level(level)),
        )
        .init();
}

//! Headless front end for Balance Logger
//!
//! Connects to a balance, prints every accepted reading and the connection
//! status, and appends the session to the CSV export on exit.
//!
//! # Usage
//!
//! ```bash
//! balancelog --port /dev/ttyUSB0
//! balancelog --host 192.168.1.100 --tcp-port 8000 --export run1.csv
//! balancelog --demo
//! balancelog --list-ports
//! ```

use anyhow::{bail, Context, Result};
use balancelog_core::acquisition::{Acquisition, ConnectionState, StatusReport, StatusTone};
use balancelog_core::config::LoggerConfig;
use balancelog_core::demo::DemoConfig;
use balancelog_core::export::format_weight;
use balancelog_core::ledger::Measurement;
use balancelog_core::transport::{list_ports, SerialConfig, TcpConfig, TransportConfig};
use clap::Parser;
use std::io::BufRead;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

const BUILD_ID: &str = match option_env!("BALANCELOG_BUILD_ID") {
    Some(id) => id,
    None => "unknown",
};

#[derive(Parser)]
#[command(name = "balancelog")]
#[command(about = "Record weight readings from a laboratory balance", long_about = None)]
#[command(version = balancelog_core::VERSION)]
struct Cli {
    /// Configuration file (defaults to the user config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Serial port to open, overriding the config file
    #[arg(long, conflicts_with_all = ["host", "demo"])]
    port: Option<String>,

    /// Serial baud rate
    #[arg(long, requires = "port")]
    baud: Option<u32>,

    /// Connect over TCP to this host
    #[arg(long, conflicts_with = "demo")]
    host: Option<String>,

    /// TCP port of the balance's network adapter
    #[arg(long, requires = "host")]
    tcp_port: Option<u16>,

    /// Use the simulated balance
    #[arg(long)]
    demo: bool,

    /// Label stamped on readings
    #[arg(long)]
    label: Option<String>,

    /// Restore a leftover crash-recovery checkpoint without asking
    #[arg(long, conflicts_with = "discard")]
    restore: bool,

    /// Delete a leftover crash-recovery checkpoint without asking
    #[arg(long)]
    discard: bool,

    /// CSV file the session is appended to on exit
    #[arg(long)]
    export: Option<PathBuf>,

    /// List serial ports and exit
    #[arg(long)]
    list_ports: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    info!(build = BUILD_ID, "balancelog starting");

    if cli.list_ports {
        print_ports();
        return Ok(());
    }

    let config = load_config(&cli)?;
    let mut session = Acquisition::from_config(&config);

    recover(&session, &cli).await?;

    // Subscribe first so nothing published during connect is missed
    let status = session.subscribe_transitions();
    let readings = session.subscribe_measurements();
    session
        .connect(&config.transport)
        .await
        .with_context(|| format!("Failed to connect ({})", config.transport.kind()))?;

    println!("Type `label <name>` to change the device label, Ctrl-C to stop");
    let lost = record(&session, status, readings).await;
    session.disconnect().await;

    let export_path = cli.export.unwrap_or(config.export_path);
    if session.snapshot().is_empty() {
        println!("No readings recorded");
    } else {
        let rows = session
            .export_csv(&export_path)
            .with_context(|| format!("Failed to export to {}", export_path.display()))?;
        println!("Exported {rows} readings to {}", export_path.display());
        // The export is the durable copy now
        session.reset();
    }

    if lost {
        bail!("Connection lost");
    }
    Ok(())
}

fn print_ports() {
    let ports = list_ports();
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        match (&port.manufacturer, &port.product) {
            (Some(m), Some(p)) => println!("{}  {} {}", port.name, m, p),
            (_, Some(p)) => println!("{}  {}", port.name, p),
            _ => println!("{}", port.name),
        }
    }
}

fn load_config(cli: &Cli) -> Result<LoggerConfig> {
    let path = match &cli.config {
        Some(path) => path.clone(),
        None => LoggerConfig::default_path().context("No config directory")?,
    };
    let mut config = LoggerConfig::load(&path)
        .with_context(|| format!("Failed to load {}", path.display()))?;

    if let Some(port_name) = &cli.port {
        let mut serial = match config.transport {
            TransportConfig::Serial(serial) => serial,
            _ => SerialConfig::default(),
        };
        serial.port_name = port_name.clone();
        if let Some(baud) = cli.baud {
            serial.baud_rate = baud;
        }
        config.transport = TransportConfig::Serial(serial);
    } else if let Some(host) = &cli.host {
        let mut tcp = match config.transport {
            TransportConfig::Tcp(tcp) => tcp,
            _ => TcpConfig::default(),
        };
        tcp.host = host.clone();
        if let Some(port) = cli.tcp_port {
            tcp.port = port;
        }
        config.transport = TransportConfig::Tcp(tcp);
    } else if cli.demo {
        config.transport = TransportConfig::Demo(DemoConfig::default());
    }

    if cli.label.is_some() {
        config.device_label = cli.label.clone();
    }

    config.validate().context("Invalid settings")?;
    Ok(config)
}

/// Offer a checkpoint left by a crashed run
async fn recover(session: &Acquisition, cli: &Cli) -> Result<()> {
    let Some(state) = session.pending_recovery() else {
        return Ok(());
    };

    let restore = if cli.restore {
        true
    } else if cli.discard {
        false
    } else {
        println!(
            "Found {} unsaved readings from a previous session ({}).",
            state.data.len(),
            session.checkpoint().path().display()
        );
        println!("Restore them? [y/N]");
        let mut answer = String::new();
        BufReader::new(tokio::io::stdin())
            .read_line(&mut answer)
            .await
            .context("Failed to read answer")?;
        matches!(answer.trim(), "y" | "Y" | "yes")
    };

    if restore {
        session.restore();
        println!(
            "Restored {} readings; next sample is {}",
            session.snapshot().len(),
            session.cursor()
        );
    } else {
        session.discard();
    }
    Ok(())
}

/// Print readings and status until Ctrl-C or a lost connection.
/// Returns true if the connection was lost.
async fn record(
    session: &Acquisition,
    mut status: broadcast::Receiver<StatusReport>,
    mut readings: broadcast::Receiver<Measurement>,
) -> bool {
    let mut commands = stdin_lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            line = commands.recv(), if stdin_open => match line {
                Some(line) => handle_command(session, &line),
                None => stdin_open = false,
            },
            _ = signal::ctrl_c() => {
                println!();
                return false;
            }
            report = status.recv() => {
                let report = match report {
                    Ok(report) => report,
                    Err(RecvError::Lagged(_)) => session.status(),
                    Err(RecvError::Closed) => return false,
                };
                print_status(&report);
                if report.state == ConnectionState::Disconnected {
                    while let Ok(m) = readings.try_recv() {
                        print_reading(&m);
                    }
                    return report.tone == StatusTone::Error;
                }
            }
            reading = readings.recv() => match reading {
                Ok(m) => print_reading(&m),
                Err(RecvError::Lagged(n)) => warn!("{n} readings not shown"),
                Err(RecvError::Closed) => return false,
            },
        }
    }
}

/// Operator input read on a plain thread; a pending blocking read on
/// `tokio::io::stdin` would hold up runtime shutdown
fn stdin_lines() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("stdin unreadable: {e}");
                    break;
                }
            }
        }
    });
    rx
}

fn handle_command(session: &Acquisition, line: &str) {
    let line = line.trim();
    match line.split_once(' ') {
        Some(("label", name)) => {
            session.set_device_label(Some(name.trim().to_string()));
            println!("Device label: {}", name.trim());
        }
        None if line == "label" => {
            session.set_device_label(None);
            println!("Device label cleared; keeping {}", session.last_device_label());
        }
        _ if line.is_empty() => {}
        _ => println!("Unknown command: {line}"),
    }
}

fn print_status(report: &StatusReport) {
    let marker = match report.tone {
        StatusTone::Neutral => "-",
        StatusTone::Success => "+",
        StatusTone::Error => "!",
    };
    println!("[{marker}] {}", report.message);
}

fn print_reading(m: &Measurement) {
    println!(
        "{:>5}  {:<12} {:>12} {:<2}  {}",
        m.sample_id,
        m.sample_name,
        format_weight(m.weight),
        m.unit,
        m.device_label
    );
}

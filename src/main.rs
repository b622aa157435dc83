use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::Parser;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, UdpSocket};
use tokio::time::{interval, Duration};

use rover_follow_rs::controller::Gains;
use rover_follow_rs::ingress;
use rover_follow_rs::rover_link::RoverLink;
use rover_follow_rs::state::{self, SharedState};
use rover_follow_rs::telemetry;
use rover_follow_rs::ws::{self, ObserverHub};

#[derive(Parser, Debug)]
#[command(name = "rover_follow")]
#[command(about = "Drone VIO to rover follow bridge", long_about = None)]
struct Args {
    /// Odometry inspection command to spawn (e.g. "voxl-inspect-qvio").
    /// When omitted, pose records are expected on the command port.
    #[arg(long)]
    vio_cmd: Option<String>,

    /// UDP port for pose records and mode/goto/calibration commands
    #[arg(long, default_value = "5005")]
    command_port: u16,

    /// Rover motor command endpoint (host:port)
    #[arg(long, default_value = "127.0.0.1:8000")]
    rover_addr: String,

    /// TCP port for the observer WebSocket broadcast
    #[arg(long, default_value = "8765")]
    observer_port: u16,

    /// Minimum VIO quality accepted as a trusted pose
    #[arg(long, default_value = "30.0")]
    quality_min: f64,

    /// Control tick period in milliseconds
    #[arg(long, default_value = "100")]
    tick_ms: u64,

    /// Forward gain
    #[arg(long, default_value = "0.8")]
    kt: f64,

    /// Turn gain
    #[arg(long, default_value = "1.2")]
    kr: f64,

    /// Arrival distance in meters
    #[arg(long, default_value = "0.05")]
    stop_distance: f64,

    /// Dead-reckoning integrator step
    #[arg(long, default_value = "0.1")]
    sim_step: f64,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    log::info!(
        "[{}] rover_follow starting: commands on udp/{}, observers on tcp/{}, rover at {}",
        Utc::now().format("%H:%M:%S"),
        args.command_port,
        args.observer_port,
        args.rover_addr
    );

    let state = state::shared(args.quality_min);
    let hub = ObserverHub::new();
    let gains = Gains {
        kt: args.kt,
        kr: args.kr,
        stop_distance: args.stop_distance,
        sim_step: args.sim_step,
    };

    // All listening endpoints bind up front; a conflict is fatal here.
    let command_socket = UdpSocket::bind(("0.0.0.0", args.command_port))
        .await
        .with_context(|| format!("binding command port {}", args.command_port))?;
    let observer_listener = TcpListener::bind(("0.0.0.0", args.observer_port))
        .await
        .with_context(|| format!("binding observer port {}", args.observer_port))?;
    let rover = RoverLink::connect(&args.rover_addr)
        .await
        .with_context(|| format!("opening rover link to {}", args.rover_addr))?;
    log::info!("[WS] observer broadcast listening on port {}", args.observer_port);

    // Observer broadcast accept loop.
    {
        let hub = hub.clone();
        tokio::spawn(async move {
            if let Err(e) = ws::serve(observer_listener, hub).await {
                log::error!("[WS] observer server stopped: {e}");
            }
        });
    }

    // Command ingress listener.
    {
        let state = state.clone();
        let hub = hub.clone();
        tokio::spawn(async move {
            if let Err(e) = ingress::listen(command_socket, state, hub).await {
                log::error!("[CMD] ingress listener stopped: {e}");
            }
        });
    }

    // Fixed-period control tick; never blocks, UDP send is best effort.
    {
        let state = state.clone();
        let tick_period = Duration::from_millis(args.tick_ms);
        tokio::spawn(async move {
            let mut ticker = interval(tick_period);
            loop {
                ticker.tick().await;
                let command = state.lock().unwrap().control_tick(&gains);
                rover.send(&command);
            }
        });
    }

    match args.vio_cmd {
        Some(command) => ingest_vio(&command, state, hub).await,
        None => {
            log::info!("[VIO] no odometry command configured, relying on UDP pose records");
            tokio::signal::ctrl_c().await?;
            log::info!("shutting down");
            Ok(())
        }
    }
}

/// Telemetry ingestion loop: spawn the odometry tool and feed each
/// matching line into the tracker. This is the system's only
/// long-blocking read; losing the source is fatal.
async fn ingest_vio(command_line: &str, state: SharedState, hub: Arc<ObserverHub>) -> Result<()> {
    let mut parts = command_line.split_whitespace();
    let program = parts.next().context("empty VIO command")?;

    let mut child = tokio::process::Command::new(program)
        .args(parts)
        .stdout(Stdio::piped())
        .spawn()
        .with_context(|| format!("spawning `{command_line}`"))?;
    let stdout = child
        .stdout
        .take()
        .context("odometry process has no stdout")?;

    log::info!("[VIO] streaming from `{command_line}`");
    let mut lines = BufReader::new(stdout).lines();
    let mut accepted = 0u64;

    while let Some(line) = lines.next_line().await? {
        let Some(sample) = telemetry::parse_line(&line, telemetry::now_timestamp()) else {
            continue;
        };
        let pose = state.lock().unwrap().apply_vio_sample(&sample);
        if let Some(pose) = pose {
            accepted += 1;
            if accepted % 100 == 0 {
                log::info!("[VIO] {accepted} samples accepted, latest {}", pose.csv_record());
            }
            hub.broadcast(&pose.csv_record()).await;
        }
    }

    bail!("odometry source `{command_line}` closed its output after {accepted} samples");
}

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::net::TcpStream;
use tracing::{info, warn};

use wayline_cam::CameraConfig;
use wayline_fc::{Backend, FcConfig};
use wayline_link::{
    discovery, doctor as link_doctor, read_reply, write_frame, DiscoveryConfig, Heartbeat, HeartbeatConfig, Reply,
    Router, Server, ServerConfig,
};
use wayline_nav::{doctor as nav_doctor, NavConfig, NavigationHandle, WayPointQueue};
use wayline_proto::RequestEnvelope;

const SEND_MAX_REPLY: usize = 1 << 20;

#[derive(Debug, Parser)]
#[command(name = "wayline", version, about = "wayline - companion computer command & control for waypoint drones")]
struct Cli {
    #[arg(long)]
    config: Option<String>,

    /// Overrides RUST_LOG, e.g. `debug` or `wayline_link=trace`.
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve workstation requests and fly queued waypoints.
    Run,
    /// Validate the configuration without touching the vehicle.
    Doctor,
    /// Send one framed JSON request and print the reply.
    Send { addr: String, json: String },
}

#[derive(Debug, serde::Deserialize)]
struct Config {
    #[serde(default)]
    server: ServerConfig,
    #[serde(default)]
    heartbeat: HeartbeatConfig,
    #[serde(default)]
    nav: NavConfig,
    fc: FcConfig,
    #[serde(default)]
    camera: CameraConfig,
    #[serde(default)]
    discovery: DiscoveryConfig,
}

fn load_config(path: &str) -> Result<Config> {
    let s = std::fs::read_to_string(path).context("read config")?;
    Ok(toml::from_str(&s).context("parse config toml")?)
}

fn config_path(cli: &Cli) -> Result<&str> {
    cli.config.as_deref().context("--config is required for this command")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match &cli.log_level {
        Some(level) => tracing_subscriber::EnvFilter::try_new(level).context("parse --log-level")?,
        None => tracing_subscriber::EnvFilter::from_default_env(),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match &cli.cmd {
        Command::Run => run(&load_config(config_path(&cli)?)?).await?,
        Command::Doctor => doctor(&load_config(config_path(&cli)?)?).await?,
        Command::Send { addr, json } => send(addr, json).await?,
    }
    Ok(())
}

/// Checks shared by `doctor` and `run`.
fn validate(cfg: &Config) -> Result<()> {
    link_doctor::check_server(&cfg.server)?;
    link_doctor::check_heartbeat(&cfg.heartbeat)?;
    link_doctor::check_discovery(&cfg.discovery)?;
    nav_doctor::check_nav(&cfg.nav)?;
    nav_doctor::check_flight(&cfg.fc)?;
    anyhow::ensure!(cfg.camera.busy_timeout_ms >= 100, "camera.busy_timeout_ms too small; set >= 100");
    if cfg.fc.backend == Backend::Mavlink {
        anyhow::ensure!(!cfg.fc.url.is_empty(), "fc.url missing");
    }
    Ok(())
}

async fn doctor(cfg: &Config) -> Result<()> {
    info!("doctor: starting");
    validate(cfg)?;

    match cfg.fc.backend {
        Backend::Sim => warn!("doctor: fc backend is sim, nothing will fly"),
        Backend::Mavlink => info!("doctor: fc url {}", cfg.fc.url),
    }
    if !cfg.discovery.enabled {
        warn!("doctor: discovery disabled, the workstation needs the command port configured by hand");
    }

    info!("doctor: OK");
    println!("doctor: OK");
    Ok(())
}

async fn run(cfg: &Config) -> Result<()> {
    validate(cfg).context("invalid config, see `wayline doctor`")?;

    let vehicle = wayline_fc::connect(&cfg.fc, &cfg.camera).context("connect flight controller")?;
    if let Err(e) = vehicle.camera().refresh() {
        warn!("camera: initial refresh failed: {:#}", e);
    }

    let queue = Arc::new(WayPointQueue::new());
    let nav = NavigationHandle::spawn(queue, vehicle, cfg.nav.clone())?;
    let router = Router::new(nav.clone());
    let heartbeat = Arc::new(Heartbeat::new(router.clone(), cfg.heartbeat.clone()));

    let server = Server::bind(&cfg.server, router, heartbeat.clone()).await?;
    let local = server.local_addr()?;
    info!("run: serving on {}", local);
    let announcer = cfg.discovery.enabled.then(|| discovery::spawn(cfg.discovery.clone(), local.port()));
    server.run(shutdown_signal()).await?;

    // Leave the vehicle where it is; landing is an explicit request.
    if let Some(a) = announcer {
        a.abort();
    }
    heartbeat.stop();
    tokio::task::spawn_blocking(move || nav.shutdown())
        .await
        .context("join navigation worker")?;
    info!("run: stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("ctrl-c handler failed: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("SIGTERM handler failed: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("run: interrupted"),
        _ = terminate => info!("run: terminated"),
    }
}

async fn send(addr: &str, json: &str) -> Result<()> {
    // Catch typos locally instead of getting a bare 500 back.
    RequestEnvelope::parse(json.as_bytes()).context("request")?;

    let mut stream = TcpStream::connect(addr).await.with_context(|| format!("connect {}", addr))?;
    write_frame(&mut stream, json.as_bytes()).await?;
    let reply = read_reply(&mut stream, SEND_MAX_REPLY).await.context("read reply")?;

    let code = reply.code().as_u32();
    match reply {
        Reply::Status(payload) => {
            let body: serde_json::Value = serde_json::from_slice(&payload).context("status payload")?;
            println!("{} {}", code, serde_json::to_string_pretty(&body)?);
        }
        Reply::StartHeartbeat { host, port } => println!("{} heartbeat -> {}:{}", code, host, port),
        Reply::Ack | Reply::Err => println!("{}", code),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_from(extra: &str) -> Config {
        toml::from_str(&format!("[fc]\nbackend = \"sim\"\n{}", extra)).unwrap()
    }

    #[test]
    fn minimal_config_is_valid() {
        let cfg = config_from("");
        validate(&cfg).unwrap();
        assert_eq!(cfg.server.port, 6330);
        assert_eq!(cfg.discovery.hello_port, 4849);
    }

    #[test]
    fn zero_intervals_are_rejected_before_anything_starts() {
        let hb = config_from("[heartbeat]\ninterval_ms = 0\n");
        assert!(validate(&hb).unwrap_err().to_string().contains("heartbeat.interval_ms"));

        let poll = config_from("arrival_poll_ms = 0\n");
        assert!(validate(&poll).unwrap_err().to_string().contains("arrival_poll_ms"));

        let disc = config_from("[discovery]\nreply_timeout_ms = 0\n");
        assert!(validate(&disc).is_err());
    }
}

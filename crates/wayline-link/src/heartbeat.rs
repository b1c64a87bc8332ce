use anyhow::{Context, Result};
use serde::Deserialize;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use wayline_proto::{MessageType, RequestEnvelope};

use crate::frame::{write_frame, Reply};
use crate::router::Router;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub interval_ms: u64,
    pub connect_timeout_ms: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self { interval_ms: 1000, connect_timeout_ms: 2000 }
    }
}

/// Pushes a `status:heartbeat` payload to the workstation every interval,
/// over a fresh connection each time. At most one loop runs; configuring a
/// new workstation replaces it.
pub struct Heartbeat {
    router: Router,
    cfg: HeartbeatConfig,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Heartbeat {
    pub fn new(router: Router, cfg: HeartbeatConfig) -> Self {
        Self { router, cfg, task: Mutex::new(None) }
    }

    /// Must be called inside a tokio runtime.
    pub fn start(&self, host: &str, port: &str) -> Result<()> {
        anyhow::ensure!(self.cfg.interval_ms > 0, "heartbeat interval must be positive");
        let port: u16 = port.parse().with_context(|| format!("bad heartbeat port {}", port))?;
        let addr = format!("{}:{}", host, port);
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(old) = task.take() {
            old.abort();
        }
        info!("heartbeat: sending to {} every {} ms", addr, self.cfg.interval_ms);
        *task = Some(tokio::spawn(run(self.router.clone(), addr, self.cfg.clone())));
        Ok(())
    }

    pub fn stop(&self) {
        if let Some(t) = self.task.lock().unwrap_or_else(PoisonError::into_inner).take() {
            t.abort();
            info!("heartbeat: stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }
}

async fn run(router: Router, addr: String, cfg: HeartbeatConfig) {
    let request = RequestEnvelope::tagged(MessageType::Status, "heartbeat").to_bytes();
    let connect_timeout = Duration::from_millis(cfg.connect_timeout_ms);
    let mut tick = tokio::time::interval(Duration::from_millis(cfg.interval_ms));

    loop {
        tick.tick().await;
        let r = router.clone();
        let req = request.clone();
        let payload = match tokio::task::spawn_blocking(move || r.route(&req)).await {
            Ok(Reply::Status(p)) => p,
            Ok(other) => {
                debug!("heartbeat: status unavailable ({:?})", other.code());
                continue;
            }
            Err(e) => {
                warn!("heartbeat: status task failed: {}", e);
                continue;
            }
        };
        if let Err(e) = push(&addr, &payload, connect_timeout).await {
            info!("heartbeat: workstation {} unreachable, stopping: {:#}", addr, e);
            break;
        }
        trace!("heartbeat: {} bytes to {}", payload.len(), addr);
    }
}

async fn push(addr: &str, payload: &[u8], connect_timeout: Duration) -> Result<()> {
    let mut stream = tokio::time::timeout(connect_timeout, TcpStream::connect(addr))
        .await
        .context("connect timed out")?
        .context("connect")?;
    write_frame(&mut stream, payload).await?;
    stream.shutdown().await.ok();
    Ok(())
}

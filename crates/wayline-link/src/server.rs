use anyhow::{Context, Result};
use serde::Deserialize;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::frame::{read_frame, write_reply, Reply};
use crate::heartbeat::Heartbeat;
use crate::router::Router;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// Requests larger than this are answered with ERR without being read.
    pub max_frame_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: "0.0.0.0".into(), port: 6330, max_frame_bytes: 1 << 20 }
    }
}

/// One request per connection, each on its own task.
pub struct Server {
    listener: TcpListener,
    router: Router,
    heartbeat: Arc<Heartbeat>,
    max_frame: usize,
}

impl Server {
    pub async fn bind(cfg: &ServerConfig, router: Router, heartbeat: Arc<Heartbeat>) -> Result<Self> {
        let addr = format!("{}:{}", cfg.bind, cfg.port);
        let listener = TcpListener::bind(&addr).await.with_context(|| format!("bind {}", addr))?;
        info!("server: listening on {}", listener.local_addr()?);
        Ok(Self { listener, router, heartbeat, max_frame: cfg.max_frame_bytes })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept until `shutdown` resolves. Requests already in progress finish on their own.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("server: shutting down");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let router = self.router.clone();
                        let heartbeat = self.heartbeat.clone();
                        let max = self.max_frame;
                        tokio::spawn(async move {
                            if let Err(e) = serve_one(stream, peer, router, heartbeat, max).await {
                                debug!("server: {}: {:#}", peer, e);
                            }
                        });
                    }
                    Err(e) => warn!("server: accept failed: {}", e),
                }
            }
        }
    }
}

async fn serve_one(
    mut stream: TcpStream,
    peer: SocketAddr,
    router: Router,
    heartbeat: Arc<Heartbeat>,
    max: usize,
) -> Result<()> {
    let mut reply = match read_frame(&mut stream, max).await {
        Ok(frame) => tokio::task::spawn_blocking(move || router.route(&frame))
            .await
            .unwrap_or_else(|e| {
                warn!("server: {}: handler task failed: {}", peer, e);
                Reply::Err
            }),
        Err(e) => {
            warn!("server: {}: bad frame: {:#}", peer, e);
            Reply::Err
        }
    };

    if let Reply::StartHeartbeat { host, port } = &reply {
        if let Err(e) = heartbeat.start(host, port) {
            warn!("server: {}: cannot start heartbeat: {:#}", peer, e);
            reply = Reply::Err;
        }
    }

    debug!("server: {} -> {:?}", peer, reply.code());
    write_reply(&mut stream, &reply).await
}

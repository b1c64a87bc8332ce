//! Workstation discovery: broadcast a `hello` datagram describing where the
//! command server and video stream live, until a workstation says hello back.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub enabled: bool,
    pub broadcast_address: String,
    pub hello_port: u16,
    /// Address the workstation should use to reach us.
    pub drone_ip: String,
    pub controller_ip: String,
    pub stream_port: u16,
    pub stream_file: String,
    pub vision_width: f64,
    /// How long to wait for an answer before broadcasting again.
    pub reply_timeout_ms: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            broadcast_address: "10.1.1.255".into(),
            hello_port: 4849,
            drone_ip: "10.1.1.10".into(),
            controller_ip: "10.1.1.1".into(),
            stream_port: 5502,
            stream_file: "sololink.sdp".into(),
            vision_width: 0.0001,
            reply_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Serialize)]
struct Hello<'a> {
    message_type: &'static str,
    ip_drone: &'a str,
    ip_controller: &'a str,
    port_stream: u16,
    port_commands: u16,
    stream_file: &'a str,
    vision_width: f64,
}

#[derive(Debug, Deserialize)]
struct Answer {
    message_type: Option<String>,
}

pub fn hello_message(cfg: &DiscoveryConfig, port_commands: u16) -> Result<Vec<u8>> {
    let hello = Hello {
        message_type: "hello",
        ip_drone: &cfg.drone_ip,
        ip_controller: &cfg.controller_ip,
        port_stream: cfg.stream_port,
        port_commands,
        stream_file: &cfg.stream_file,
        vision_width: cfg.vision_width,
    };
    Ok(serde_json::to_vec(&hello)?)
}

fn is_hello(datagram: &[u8]) -> bool {
    serde_json::from_slice::<Answer>(datagram)
        .ok()
        .and_then(|a| a.message_type)
        .is_some_and(|t| t == "hello")
}

/// Broadcast until a workstation answers with its own hello. Returns the
/// address the answer came from.
pub async fn announce(cfg: &DiscoveryConfig, port_commands: u16) -> Result<SocketAddr> {
    let payload = hello_message(cfg, port_commands)?;
    let target = format!("{}:{}", cfg.broadcast_address, cfg.hello_port);
    let wait = Duration::from_millis(cfg.reply_timeout_ms.max(1));

    let socket = UdpSocket::bind("0.0.0.0:0").await.context("bind discovery socket")?;
    socket.set_broadcast(true).context("enable broadcast")?;
    info!("discovery: announcing command port {} to {}", port_commands, target);

    let mut buf = [0u8; 1024];
    loop {
        if let Err(e) = socket.send_to(&payload, target.as_str()).await {
            warn!("discovery: send to {} failed: {}", target, e);
            tokio::time::sleep(wait).await;
            continue;
        }
        match tokio::time::timeout(wait, socket.recv_from(&mut buf)).await {
            Err(_) => debug!("discovery: no answer within {:?}, repeating", wait),
            Ok(Err(e)) => debug!("discovery: recv failed: {}", e),
            Ok(Ok((n, from))) if is_hello(&buf[..n]) => {
                info!("discovery: workstation {} answered", from);
                return Ok(from);
            }
            Ok(Ok((n, from))) => debug!("discovery: ignoring {} byte(s) from {}", n, from),
        }
    }
}

/// Must be called inside a tokio runtime. Abort the handle to stop announcing.
pub fn spawn(cfg: DiscoveryConfig, port_commands: u16) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = announce(&cfg, port_commands).await {
            warn!("discovery: stopped: {:#}", e);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn local(port: u16) -> DiscoveryConfig {
        DiscoveryConfig {
            broadcast_address: "127.0.0.1".into(),
            hello_port: port,
            reply_timeout_ms: 100,
            ..DiscoveryConfig::default()
        }
    }

    #[test]
    fn hello_carries_the_command_port() {
        let raw = hello_message(&DiscoveryConfig::default(), 6330).unwrap();
        let v: Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(v["message_type"], "hello");
        assert_eq!(v["ip_drone"], "10.1.1.10");
        assert_eq!(v["ip_controller"], "10.1.1.1");
        assert_eq!(v["port_stream"], 5502);
        assert_eq!(v["port_commands"], 6330);
        assert_eq!(v["stream_file"], "sololink.sdp");
        assert!(is_hello(br#"{"message_type":"hello","ip":"10.1.1.2"}"#));
        assert!(!is_hello(br#"{"message_type":"status"}"#));
        assert!(!is_hello(b"hello"));
    }

    #[tokio::test]
    async fn repeats_until_the_workstation_says_hello() {
        let workstation = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let cfg = local(workstation.local_addr().unwrap().port());
        let announcer = tokio::spawn(async move { announce(&cfg, 7001).await });

        let mut buf = [0u8; 1024];
        let (n, from) = tokio::time::timeout(Duration::from_secs(5), workstation.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        let hello: Value = serde_json::from_slice(&buf[..n]).unwrap();
        assert_eq!(hello["port_commands"], 7001);

        // anything but a hello leaves the announcer going
        workstation.send_to(br#"{"message_type":"status"}"#, from).await.unwrap();
        let (n, from) = tokio::time::timeout(Duration::from_secs(5), workstation.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert!(is_hello(&buf[..n]));
        assert!(!announcer.is_finished());

        workstation.send_to(br#"{"message_type":"hello"}"#, from).await.unwrap();
        let answered_by = tokio::time::timeout(Duration::from_secs(5), announcer)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(answered_by, workstation.local_addr().unwrap());
    }
}

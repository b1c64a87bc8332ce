use anyhow::Result;

use crate::discovery::DiscoveryConfig;
use crate::heartbeat::HeartbeatConfig;
use crate::server::ServerConfig;

pub fn check_server(cfg: &ServerConfig) -> Result<()> {
    anyhow::ensure!(cfg.port != 0, "server.port must be set");
    anyhow::ensure!(!cfg.bind.is_empty(), "server.bind must be set");
    anyhow::ensure!(cfg.max_frame_bytes >= 1024, "server.max_frame_bytes too small; set >= 1024");
    Ok(())
}

pub fn check_heartbeat(cfg: &HeartbeatConfig) -> Result<()> {
    anyhow::ensure!(cfg.interval_ms >= 100, "heartbeat.interval_ms too small; set >= 100");
    anyhow::ensure!(cfg.connect_timeout_ms >= 50, "heartbeat.connect_timeout_ms too small");
    Ok(())
}

pub fn check_discovery(cfg: &DiscoveryConfig) -> Result<()> {
    if !cfg.enabled {
        return Ok(());
    }
    anyhow::ensure!(!cfg.broadcast_address.is_empty(), "discovery.broadcast_address must be set");
    anyhow::ensure!(cfg.hello_port != 0, "discovery.hello_port must be set");
    anyhow::ensure!(!cfg.drone_ip.is_empty(), "discovery.drone_ip must be set");
    anyhow::ensure!(cfg.reply_timeout_ms >= 100, "discovery.reply_timeout_ms too small; set >= 100");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass() {
        check_server(&ServerConfig::default()).unwrap();
        check_heartbeat(&HeartbeatConfig::default()).unwrap();
        check_discovery(&DiscoveryConfig::default()).unwrap();
    }

    #[test]
    fn zero_heartbeat_interval_is_rejected() {
        let cfg = HeartbeatConfig { interval_ms: 0, ..HeartbeatConfig::default() };
        assert!(check_heartbeat(&cfg).unwrap_err().to_string().contains("interval_ms"));
    }

    #[test]
    fn disabled_discovery_is_not_checked() {
        let cfg = DiscoveryConfig { enabled: false, hello_port: 0, ..DiscoveryConfig::default() };
        check_discovery(&cfg).unwrap();
        let cfg = DiscoveryConfig { hello_port: 0, ..DiscoveryConfig::default() };
        assert!(check_discovery(&cfg).is_err());
    }
}

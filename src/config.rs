use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::membership::PeerId;
use crate::node::{self, NodeConfig};

// SwimConfig holds everything needed to run one node
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwimConfig {
    // Defaults to the bind address
    pub node_id: Option<String>,
    pub bind_addr: SocketAddr,
    pub contact_peers: Vec<String>,
    // Peer identities that are not plain `ip:port`
    pub address_book: HashMap<String, SocketAddr>,
    pub probe_interval_ms: u64,
    pub probe_timeout_ms: u64,
    pub indirect_fanout: usize,
    pub indirect_escalation_timeout_ms: u64,
    pub suspicion_timeout_ms: u64,
    pub relay_timeout_ms: u64,
    pub view_dump_interval_ms: Option<u64>,
    pub probe_discovered_peers: bool,
    pub log_level: String,
}

impl Default for SwimConfig {
    fn default() -> Self {
        Self {
            node_id: None,
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 7946)),
            contact_peers: Vec::new(),
            address_book: HashMap::new(),
            probe_interval_ms: millis(node::PROBE_INTERVAL),
            probe_timeout_ms: millis(node::PROBE_TIMEOUT),
            indirect_fanout: node::INDIRECT_FANOUT,
            indirect_escalation_timeout_ms: millis(node::INDIRECT_ESCALATION_TIMEOUT),
            suspicion_timeout_ms: millis(node::SUSPICION_TIMEOUT),
            relay_timeout_ms: millis(node::RELAY_TIMEOUT),
            view_dump_interval_ms: Some(millis(node::VIEW_DUMP_INTERVAL)),
            probe_discovered_peers: false,
            log_level: "info".to_string(),
        }
    }
}

fn millis(duration: Duration) -> u64 {
    duration.as_millis() as u64
}

impl SwimConfig {
    /// Load a JSON configuration file. Missing fields take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: SwimConfig = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize config")
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("probe_interval_ms", self.probe_interval_ms),
            ("probe_timeout_ms", self.probe_timeout_ms),
            (
                "indirect_escalation_timeout_ms",
                self.indirect_escalation_timeout_ms,
            ),
            ("suspicion_timeout_ms", self.suspicion_timeout_ms),
            ("relay_timeout_ms", self.relay_timeout_ms),
        ];
        for (name, value) in positive {
            if value == 0 {
                bail!("{} must be greater than zero", name);
            }
        }

        if self.view_dump_interval_ms == Some(0) {
            bail!("view_dump_interval_ms must be greater than zero when set");
        }

        if self.probe_timeout_ms >= self.indirect_escalation_timeout_ms {
            bail!(
                "probe_timeout_ms ({}) must be shorter than indirect_escalation_timeout_ms ({})",
                self.probe_timeout_ms,
                self.indirect_escalation_timeout_ms
            );
        }

        match self.node_id.as_deref() {
            Some("") => bail!("node_id must not be empty"),
            // Every node would share the same identity
            None if self.bind_addr.ip().is_unspecified() => bail!(
                "node_id must be set when bind_addr ({}) is a wildcard address",
                self.bind_addr
            ),
            _ => {}
        }

        Ok(())
    }

    pub fn local_id(&self) -> PeerId {
        match &self.node_id {
            Some(id) => PeerId::new(id.clone()),
            None => PeerId::new(self.bind_addr.to_string()),
        }
    }

    pub fn address_book(&self) -> HashMap<PeerId, SocketAddr> {
        self.address_book
            .iter()
            .map(|(id, addr)| (PeerId::new(id.clone()), *addr))
            .collect()
    }

    /// Protocol settings for the core state machine.
    pub fn node_config(&self) -> NodeConfig {
        let mut config = NodeConfig::new(self.local_id());
        config.contact_peers = self
            .contact_peers
            .iter()
            .map(|peer| PeerId::new(peer.clone()))
            .collect();
        config.probe_interval = Duration::from_millis(self.probe_interval_ms);
        config.probe_timeout = Duration::from_millis(self.probe_timeout_ms);
        config.indirect_fanout = self.indirect_fanout;
        config.indirect_escalation_timeout =
            Duration::from_millis(self.indirect_escalation_timeout_ms);
        config.suspicion_timeout = Duration::from_millis(self.suspicion_timeout_ms);
        config.relay_timeout = Duration::from_millis(self.relay_timeout_ms);
        config.view_dump_interval = self.view_dump_interval_ms.map(Duration::from_millis);
        config.probe_discovered_peers = self.probe_discovered_peers;
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn named(id: &str) -> SwimConfig {
        SwimConfig {
            node_id: Some(id.to_string()),
            ..SwimConfig::default()
        }
    }

    #[test]
    fn test_defaults_are_valid_once_named() {
        let config = named("node-1");

        assert!(config.validate().is_ok());
        let node = config.node_config();
        assert_eq!(node.local_id, PeerId::from("node-1"));
        assert_eq!(node.probe_interval, Duration::from_millis(3000));
        assert_eq!(node.probe_timeout, Duration::from_millis(2000));
        assert_eq!(node.indirect_fanout, 2);
    }

    #[test]
    fn test_partial_file_falls_back_to_defaults() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        write!(
            file,
            r#"{{
                "node_id": "node-1",
                "bind_addr": "127.0.0.1:7001",
                "contact_peers": ["127.0.0.1:7002"],
                "probe_interval_ms": 500,
                "view_dump_interval_ms": null
            }}"#
        )?;

        let config = SwimConfig::from_file(file.path())?;

        assert_eq!(config.local_id(), PeerId::from("node-1"));
        assert_eq!(config.probe_interval_ms, 500);
        assert_eq!(config.probe_timeout_ms, 2000);
        assert_eq!(config.view_dump_interval_ms, None);
        assert_eq!(
            config.node_config().contact_peers,
            vec![PeerId::from("127.0.0.1:7002")]
        );
        Ok(())
    }

    #[test]
    fn test_json_round_trip() -> Result<()> {
        let mut config = SwimConfig::default();
        config.node_id = Some("node-7".to_string());
        config
            .address_book
            .insert("node-8".to_string(), "10.1.1.8:7946".parse()?);

        let parsed: SwimConfig = serde_json::from_str(&config.to_json()?)?;

        assert_eq!(parsed, config);
        Ok(())
    }

    #[test]
    fn test_rejects_bad_timeouts() {
        let mut config = named("node-1");
        config.probe_timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = named("node-1");
        config.probe_timeout_ms = 6000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_wildcard_bind_requires_node_id() -> Result<()> {
        let unnamed = SwimConfig::default();
        assert!(unnamed.bind_addr.ip().is_unspecified());
        assert!(unnamed.validate().is_err());

        let mut file = tempfile::NamedTempFile::new()?;
        write!(file, r#"{{ "bind_addr": "0.0.0.0:7001" }}"#)?;
        assert!(SwimConfig::from_file(file.path()).is_err());

        let mut specific = SwimConfig::default();
        specific.bind_addr = "10.0.0.5:7946".parse()?;
        assert!(specific.validate().is_ok());
        assert_eq!(specific.local_id(), PeerId::from("10.0.0.5:7946"));

        assert!(named("node-1").validate().is_ok());
        Ok(())
    }
}

use std::path::Path;
use std::time::Duration;

use evc_codec::Compression;
use evc_ops::LatchPolicy;
use evc_transport::NodeBehavior;
use serde::{Deserialize, Serialize};

use crate::error::{ClientError, ClientResult};

/// Client behaviour and timeouts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Prefix of every metric name.
    pub app_name: String,
    /// Default wait for gets and bulk gets.
    pub read_timeout_ms: u64,
    /// Default wait for writes.
    pub operation_timeout_ms: u64,
    /// Bound on the blocking counter calls. Falls back to
    /// `operation_timeout_ms`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mutate_timeout_ms: Option<u64>,
    /// Writes are not registered with latches while set.
    pub write_only: bool,
    /// Binary-protocol key rules (no whitespace restriction).
    pub binary_keys: bool,
    /// Payloads above this many bytes are zstd-compressed.
    pub compression_threshold: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            app_name: "EVCACHE".to_string(),
            read_timeout_ms: 20,
            operation_timeout_ms: 2500,
            mutate_timeout_ms: None,
            write_only: false,
            binary_keys: true,
            compression_threshold: Compression::DEFAULT_THRESHOLD,
        }
    }
}

impl ClientConfig {
    /// Parse a TOML document holding only client keys, then validate it.
    pub fn from_toml_str(s: &str) -> ClientResult<Self> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file.
    pub fn load(path: impl AsRef<Path>) -> ClientResult<Self> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }

    /// Reject settings the client cannot run with.
    pub fn validate(&self) -> ClientResult<()> {
        if self.app_name.trim().is_empty() {
            return Err(ClientError::Config("app_name must not be empty".into()));
        }
        if self.read_timeout_ms == 0 || self.operation_timeout_ms == 0 {
            return Err(ClientError::Config("timeouts must be positive".into()));
        }
        if self.mutate_timeout_ms == Some(0) {
            return Err(ClientError::Config("mutate_timeout_ms must be positive".into()));
        }
        Ok(())
    }

    /// Default wait for reads.
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Default wait for writes and append-or-add.
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    /// How long counter calls block. Falls back to the operation timeout.
    pub fn mutate_timeout(&self) -> Duration {
        Duration::from_millis(self.mutate_timeout_ms.unwrap_or(self.operation_timeout_ms))
    }

    /// Compression settings for the transcoders built from this config.
    pub fn compression(&self) -> Compression {
        Compression::new(self.compression_threshold)
    }
}

/// Shape of a simulated cluster.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub nodes: u32,
    /// Copies of each key, primary included.
    pub replicas: usize,
    pub latency_ms: u64,
    pub jitter_ms: u64,
    pub latch_policy: LatchPolicy,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            nodes: 3,
            replicas: 1,
            latency_ms: 0,
            jitter_ms: 0,
            latch_policy: LatchPolicy::All,
        }
    }
}

impl ClusterConfig {
    /// Latency and jitter applied to every simulated node.
    pub fn behavior(&self) -> NodeBehavior {
        NodeBehavior {
            latency: Duration::from_millis(self.latency_ms),
            jitter: Duration::from_millis(self.jitter_ms),
        }
    }
}

/// A whole configuration file: `[client]` and `[cluster]` tables.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub client: ClientConfig,
    pub cluster: ClusterConfig,
}

impl Settings {
    /// Parse a TOML document with `[client]` and `[cluster]` tables.
    pub fn from_toml_str(s: &str) -> ClientResult<Self> {
        let settings: Self = toml::from_str(s)?;
        settings.client.validate()?;
        if settings.cluster.nodes == 0 {
            return Err(ClientError::Config("cluster needs at least one node".into()));
        }
        if settings.cluster.replicas == 0 || settings.cluster.replicas > settings.cluster.nodes as usize {
            return Err(ClientError::Config(format!(
                "replicas must be between 1 and {}",
                settings.cluster.nodes
            )));
        }
        Ok(settings)
    }

    /// Read and parse a TOML file.
    pub fn load(path: impl AsRef<Path>) -> ClientResult<Self> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }

    /// Render the settings as TOML.
    pub fn to_toml_string(&self) -> ClientResult<String> {
        toml::to_string_pretty(self).map_err(|e| ClientError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config() {
        let c = ClientConfig::default();
        assert_eq!(c.app_name, "EVCACHE");
        assert_eq!(c.read_timeout(), Duration::from_millis(20));
        assert_eq!(c.operation_timeout(), Duration::from_millis(2500));
        assert_eq!(c.mutate_timeout(), c.operation_timeout());
        assert!(!c.write_only);
        assert!(c.binary_keys);
        assert_eq!(c.compression().threshold, 16 * 1024);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let c = ClientConfig::from_toml_str("app_name = \"MOVIES\"\nmutate_timeout_ms = 100\n").unwrap();
        assert_eq!(c.app_name, "MOVIES");
        assert_eq!(c.mutate_timeout(), Duration::from_millis(100));
        assert_eq!(c.read_timeout_ms, 20);
    }

    #[test]
    fn invalid_values_rejected() {
        assert!(matches!(
            ClientConfig::from_toml_str("app_name = \"\""),
            Err(ClientError::Config(_))
        ));
        assert!(ClientConfig::from_toml_str("read_timeout_ms = 0").is_err());
        assert!(matches!(
            ClientConfig::from_toml_str("read_timeout_ms = \"soon\""),
            Err(ClientError::Toml(_))
        ));
    }

    #[test]
    fn settings_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[client]\nread_timeout_ms = 50\n\n[cluster]\nnodes = 5\nreplicas = 3\nlatch_policy = \"quorum\""
        )
        .unwrap();

        let s = Settings::load(file.path()).unwrap();
        assert_eq!(s.client.read_timeout_ms, 50);
        assert_eq!(s.cluster.nodes, 5);
        assert_eq!(s.cluster.replicas, 3);
        assert_eq!(s.cluster.latch_policy, LatchPolicy::Quorum);
    }

    #[test]
    fn settings_reject_impossible_replication() {
        assert!(Settings::from_toml_str("[cluster]\nnodes = 2\nreplicas = 3").is_err());
        assert!(Settings::from_toml_str("[cluster]\nnodes = 0").is_err());
    }

    #[test]
    fn settings_round_trip_through_toml() {
        let s = Settings::default();
        let text = s.to_toml_string().unwrap();
        assert_eq!(Settings::from_toml_str(&text).unwrap(), s);
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Settings::load(dir.path().join("nope.toml")),
            Err(ClientError::Io(_))
        ));
    }
}

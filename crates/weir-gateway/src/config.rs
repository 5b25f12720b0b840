//! Configuration parsing and validation.
//!
//! One YAML document serves both binaries; each side validates the keys it
//! needs before binding any socket. Crashes are most likely to originate
//! from this code, intentionally: an invalid configuration must fail startup
//! with a precise message, never limp into the data plane.

use std::{
    fs,
    net::{Ipv4Addr, SocketAddr, ToSocketAddrs},
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;
use weir_core::{
    breaker::BreakerConfig, classify::ProtocolTag, monitor::MonitorConfig,
    ratelimit::RateLimiterConfig, shaper::ShaperConfig,
};

/// Errors produced while loading or validating configuration.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// Configuration file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path that was attempted
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// YAML did not deserialize (unknown keys, wrong types, out-of-range
    /// integers, unknown protocol tags).
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// A key parsed but its value is unusable.
    #[error("invalid config: {key}: {reason}")]
    Invalid {
        /// Offending key
        key: &'static str,
        /// What is wrong with it
        reason: String,
    },
}

fn default_s1_tcp_port() -> u16 {
    8080
}

fn default_s2_udp_port() -> u16 {
    42001
}

fn default_s2_bind_ip() -> Ipv4Addr {
    Ipv4Addr::UNSPECIFIED
}

fn default_max_payload_bytes() -> u32 {
    weir_proto::MAX_PAYLOAD as u32
}

fn default_allowed_protocols() -> Vec<ProtocolTag> {
    vec![ProtocolTag::Any]
}

fn default_max_packets_per_second() -> u32 {
    1000
}

fn default_shaper_capacity() -> u32 {
    1000
}

fn default_shaper_refill_per_sec() -> u32 {
    1000
}

fn default_breaker_failure_threshold() -> u32 {
    5
}

fn default_breaker_success_threshold() -> u32 {
    2
}

fn default_breaker_open_timeout_ms() -> u64 {
    30_000
}

fn default_breaker_half_open_max_in_flight() -> u32 {
    3
}

fn default_heartbeat_interval_ms() -> u64 {
    5_000
}

fn default_heartbeat_timeout_ms() -> u64 {
    360_000
}

fn default_heartbeat_check_interval_ms() -> u64 {
    30_000
}

fn default_worker_pool_size() -> u32 {
    200
}

fn default_max_connections_per_second() -> u32 {
    100
}

fn default_rate_table_max_entries() -> u32 {
    10_000
}

fn default_watchdog_interval_ms() -> u64 {
    10_000
}

fn default_watchdog_max_temp_celsius() -> f64 {
    85.0
}

fn default_log_level() -> String {
    "info".to_string()
}

/// The immutable gateway configuration record.
///
/// Built once at startup; components receive the slice they need through the
/// accessor methods, never the whole record.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// S1 TCP bind port (0 = ephemeral).
    #[serde(default = "default_s1_tcp_port")]
    pub s1_tcp_port: u16,

    /// S1 UDP bind port; absent disables UDP ingress.
    #[serde(default)]
    pub s1_udp_port: Option<u16>,

    /// S1 bind address; absent = all interfaces.
    #[serde(default)]
    pub s1_bind_ip: Option<Ipv4Addr>,

    /// S2 UDP bind port.
    #[serde(default = "default_s2_udp_port")]
    pub s2_udp_port: u16,

    /// S2 bind address.
    #[serde(default = "default_s2_bind_ip")]
    pub s2_bind_ip: Ipv4Addr,

    /// Where the encapsulator sends frames. Required on the ingress side.
    #[serde(default)]
    pub s2_peer_addr: Option<String>,

    /// Per-frame payload limit.
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: u32,

    /// Protocol allow-list for the classifier.
    #[serde(default = "default_allowed_protocols")]
    pub allowed_protocols: Vec<ProtocolTag>,

    /// Per-source packet budget per second.
    #[serde(default = "default_max_packets_per_second")]
    pub max_packets_per_second: u32,

    /// Token bucket burst size.
    #[serde(default = "default_shaper_capacity")]
    pub shaper_capacity: u32,

    /// Token bucket refill rate.
    #[serde(default = "default_shaper_refill_per_sec")]
    pub shaper_refill_per_sec: u32,

    /// Consecutive send failures that trip the breaker.
    #[serde(default = "default_breaker_failure_threshold")]
    pub breaker_failure_threshold: u32,

    /// Successful probes that close the breaker.
    #[serde(default = "default_breaker_success_threshold")]
    pub breaker_success_threshold: u32,

    /// Time the breaker stays open before probing.
    #[serde(default = "default_breaker_open_timeout_ms")]
    pub breaker_open_timeout_ms: u64,

    /// Concurrent probes while half-open.
    #[serde(default = "default_breaker_half_open_max_in_flight")]
    pub breaker_half_open_max_in_flight: u32,

    /// Beacon emission interval.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Link silence before the egress side declares it dead.
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,

    /// How often the egress side evaluates link liveness.
    #[serde(default = "default_heartbeat_check_interval_ms")]
    pub heartbeat_check_interval_ms: u64,

    /// Record directory. Required on the egress side.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    /// Egress worker pool capacity.
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: u32,

    /// Accept throttle for new TCP connections per second.
    #[serde(default = "default_max_connections_per_second")]
    pub max_connections_per_second: u32,

    /// Hard cap on tracked rate-limiter sources.
    #[serde(default = "default_rate_table_max_entries")]
    pub rate_table_max_entries: u32,

    /// Watchdog pulse target; absent disables the watchdog.
    #[serde(default)]
    pub watchdog_path: Option<PathBuf>,

    /// Watchdog evaluation interval.
    #[serde(default = "default_watchdog_interval_ms")]
    pub watchdog_interval_ms: u64,

    /// Temperature above which the pulse is withheld.
    #[serde(default = "default_watchdog_max_temp_celsius")]
    pub watchdog_max_temp_celsius: f64,

    /// Default log level when RUST_LOG is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        // INVARIANT: an empty mapping deserializes using every field default.
        #[allow(clippy::expect_used)]
        serde_yaml::from_str("{}").expect("invariant: all config fields have defaults")
    }
}

impl Config {
    /// Load and parse a YAML configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        let config: Self = serde_yaml::from_str(&contents)?;
        config.validate_common()?;
        Ok(config)
    }

    /// Checks shared by both sides.
    pub fn validate_common(&self) -> Result<(), ConfigError> {
        if self.max_payload_bytes == 0 {
            return Err(ConfigError::Invalid {
                key: "max_payload_bytes",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.max_payload_bytes as usize > weir_proto::MAX_PAYLOAD {
            return Err(ConfigError::Invalid {
                key: "max_payload_bytes",
                reason: format!("exceeds frame limit of {}", weir_proto::MAX_PAYLOAD),
            });
        }
        for (key, value) in [
            ("max_packets_per_second", self.max_packets_per_second),
            ("shaper_capacity", self.shaper_capacity),
            ("shaper_refill_per_sec", self.shaper_refill_per_sec),
            ("breaker_failure_threshold", self.breaker_failure_threshold),
            ("breaker_success_threshold", self.breaker_success_threshold),
            ("worker_pool_size", self.worker_pool_size),
            ("max_connections_per_second", self.max_connections_per_second),
            ("rate_table_max_entries", self.rate_table_max_entries),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid { key, reason: "must be at least 1".to_string() });
            }
        }
        Ok(())
    }

    /// Checks required before starting the ingress (S1) side.
    ///
    /// Resolves `s2_peer_addr` so a typo fails here, not at the first send.
    pub fn validate_ingress(&self) -> Result<SocketAddr, ConfigError> {
        let Some(peer) = &self.s2_peer_addr else {
            return Err(ConfigError::Invalid {
                key: "s2_peer_addr",
                reason: "required for the ingress side".to_string(),
            });
        };

        peer.to_socket_addrs()
            .map_err(|e| ConfigError::Invalid {
                key: "s2_peer_addr",
                reason: format!("cannot resolve '{peer}': {e}"),
            })?
            .next()
            .ok_or_else(|| ConfigError::Invalid {
                key: "s2_peer_addr",
                reason: format!("'{peer}' resolved to no addresses"),
            })
    }

    /// Checks required before starting the egress (S2) side.
    ///
    /// Creates `data_dir` if missing and probes it with a write, so an
    /// unwritable spool fails before the socket is bound.
    pub fn validate_egress(&self) -> Result<PathBuf, ConfigError> {
        let Some(dir) = &self.data_dir else {
            return Err(ConfigError::Invalid {
                key: "data_dir",
                reason: "required for the egress side".to_string(),
            });
        };

        fs::create_dir_all(dir).map_err(|e| ConfigError::Invalid {
            key: "data_dir",
            reason: format!("cannot create {}: {e}", dir.display()),
        })?;

        let probe = dir.join(".write_probe.tmp");
        fs::write(&probe, b"probe").map_err(|e| ConfigError::Invalid {
            key: "data_dir",
            reason: format!("{} is not writable: {e}", dir.display()),
        })?;
        let _ = fs::remove_file(&probe);

        Ok(dir.clone())
    }

    /// S1 bind address for the TCP listener.
    #[must_use]
    pub fn s1_tcp_bind(&self) -> SocketAddr {
        SocketAddr::from((self.s1_bind_ip.unwrap_or(Ipv4Addr::UNSPECIFIED), self.s1_tcp_port))
    }

    /// S1 bind address for the UDP listener, when enabled.
    #[must_use]
    pub fn s1_udp_bind(&self) -> Option<SocketAddr> {
        self.s1_udp_port
            .map(|port| SocketAddr::from((self.s1_bind_ip.unwrap_or(Ipv4Addr::UNSPECIFIED), port)))
    }

    /// S2 bind address.
    #[must_use]
    pub fn s2_bind(&self) -> SocketAddr {
        SocketAddr::from((self.s2_bind_ip, self.s2_udp_port))
    }

    /// Per-source rate limiter slice.
    #[must_use]
    pub fn rate_limiter(&self) -> RateLimiterConfig {
        RateLimiterConfig {
            max_packets_per_second: self.max_packets_per_second,
            max_entries: self.rate_table_max_entries as usize,
        }
    }

    /// Global shaper slice.
    #[must_use]
    pub fn shaper(&self) -> ShaperConfig {
        ShaperConfig { capacity: self.shaper_capacity, refill_per_sec: self.shaper_refill_per_sec }
    }

    /// Accept throttle slice (same bucket primitive as the shaper).
    #[must_use]
    pub fn accept_throttle(&self) -> ShaperConfig {
        ShaperConfig {
            capacity: self.max_connections_per_second,
            refill_per_sec: self.max_connections_per_second,
        }
    }

    /// Circuit breaker slice.
    #[must_use]
    pub fn breaker(&self) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: self.breaker_failure_threshold,
            success_threshold: self.breaker_success_threshold,
            open_timeout: Duration::from_millis(self.breaker_open_timeout_ms),
            half_open_max_in_flight: self.breaker_half_open_max_in_flight,
        }
    }

    /// Link monitor slice.
    #[must_use]
    pub fn link_monitor(&self) -> MonitorConfig {
        MonitorConfig { timeout: Duration::from_millis(self.heartbeat_timeout_ms) }
    }

    /// Beacon emission interval.
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Liveness evaluation interval.
    #[must_use]
    pub fn heartbeat_check_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_check_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_all_defaults() {
        let config = Config::default();
        assert_eq!(config.s1_tcp_port, 8080);
        assert_eq!(config.s1_udp_port, None);
        assert_eq!(config.s2_udp_port, 42001);
        assert_eq!(config.max_payload_bytes as usize, weir_proto::MAX_PAYLOAD);
        assert_eq!(config.allowed_protocols, vec![ProtocolTag::Any]);
        assert_eq!(config.worker_pool_size, 200);
        assert!(config.watchdog_path.is_none());
    }

    #[test]
    fn unknown_protocol_tag_fails_parse() {
        let yaml = "allowed_protocols: [modbus, coap]";
        let result: Result<Config, _> = serde_yaml::from_str(yaml);
        assert!(result.is_err(), "unknown tag must be rejected at load");
    }

    #[test]
    fn unknown_keys_fail_parse() {
        let result: Result<Config, _> = serde_yaml::from_str("s1_tpc_port: 8080");
        assert!(result.is_err(), "typoed keys must be rejected, not ignored");
    }

    #[test]
    fn out_of_range_port_fails_parse() {
        let result: Result<Config, _> = serde_yaml::from_str("s1_tcp_port: 70000");
        assert!(result.is_err());

        let result: Result<Config, _> = serde_yaml::from_str("s1_tcp_port: \"eighty\"");
        assert!(result.is_err());
    }

    #[test]
    fn zero_limits_fail_validation() {
        let config: Config = serde_yaml::from_str("shaper_refill_per_sec: 0").unwrap();
        assert!(matches!(
            config.validate_common(),
            Err(ConfigError::Invalid { key: "shaper_refill_per_sec", .. })
        ));
    }

    #[test]
    fn oversized_payload_limit_fails_validation() {
        let config: Config = serde_yaml::from_str("max_payload_bytes: 2097152").unwrap();
        assert!(matches!(
            config.validate_common(),
            Err(ConfigError::Invalid { key: "max_payload_bytes", .. })
        ));
    }

    #[test]
    fn ingress_requires_peer_addr() {
        let config = Config::default();
        assert!(matches!(
            config.validate_ingress(),
            Err(ConfigError::Invalid { key: "s2_peer_addr", .. })
        ));

        let config: Config = serde_yaml::from_str("s2_peer_addr: \"127.0.0.1:42001\"").unwrap();
        let addr = config.validate_ingress().unwrap();
        assert_eq!(addr.port(), 42001);
    }

    #[test]
    fn ingress_rejects_unresolvable_peer() {
        let config: Config = serde_yaml::from_str("s2_peer_addr: \"not an address\"").unwrap();
        assert!(matches!(
            config.validate_ingress(),
            Err(ConfigError::Invalid { key: "s2_peer_addr", .. })
        ));
    }

    #[test]
    fn egress_requires_data_dir() {
        let config = Config::default();
        assert!(matches!(
            config.validate_egress(),
            Err(ConfigError::Invalid { key: "data_dir", .. })
        ));
    }

    #[test]
    fn egress_rejects_unwritable_data_dir() {
        // A regular file where a directory is expected
        let file = tempfile::NamedTempFile::new().unwrap();
        let yaml = format!("data_dir: {}", file.path().display());
        let config: Config = serde_yaml::from_str(&yaml).unwrap();
        assert!(matches!(
            config.validate_egress(),
            Err(ConfigError::Invalid { key: "data_dir", .. })
        ));
    }

    #[test]
    fn egress_creates_missing_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("spool");
        let yaml = format!("data_dir: {}", nested.display());
        let config: Config = serde_yaml::from_str(&yaml).unwrap();

        let resolved = config.validate_egress().unwrap();
        assert!(resolved.is_dir());
        // The probe file is cleaned up
        assert_eq!(fs::read_dir(&resolved).unwrap().count(), 0);
    }

    #[test]
    fn bind_addresses_compose_ip_and_port() {
        let config: Config = serde_yaml::from_str(
            "s1_bind_ip: \"10.1.2.3\"\ns1_tcp_port: 9000\ns1_udp_port: 9001",
        )
        .unwrap();

        assert_eq!(config.s1_tcp_bind().to_string(), "10.1.2.3:9000");
        assert_eq!(config.s1_udp_bind().unwrap().to_string(), "10.1.2.3:9001");

        let config = Config::default();
        assert_eq!(config.s1_tcp_bind().to_string(), "0.0.0.0:8080");
        assert!(config.s1_udp_bind().is_none());
    }
}

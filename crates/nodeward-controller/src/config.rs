//! Per-node controller configuration.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use nodeward_core::{
    DEFAULT_CERT_CHECK_MULTIPLIER, DEFAULT_LISTEN_IP, DEFAULT_SEND_IP,
    DEFAULT_UPDATE_PERIODIC_SECS, mbps_to_bytes_per_sec,
};
use nodeward_limiter::RedisConfig;
use serde::Deserialize;

use crate::cert::{CertMode, CertRequest};

/// Settings for one controller instance.
#[derive(Debug, Clone, Deserialize)]
pub struct ControllerConfig {
    /// Address inbounds listen on.
    #[serde(default = "default_listen_ip")]
    pub listen_ip: String,

    /// Source address for outbound traffic.
    #[serde(default = "default_send_ip")]
    pub send_ip: String,

    /// Interval between reconciliation and report cycles, in seconds.
    #[serde(default = "default_update_periodic_secs")]
    pub update_periodic_secs: u64,

    /// Read and reset traffic counters without reporting them.
    #[serde(default)]
    pub disable_upload_traffic: bool,

    /// Use only the local rule file.
    #[serde(default)]
    pub disable_get_rule: bool,

    #[serde(default)]
    pub disable_sniffing: bool,

    #[serde(default)]
    pub enable_proxy_protocol: bool,

    /// Local rule file: one regular expression per line.
    #[serde(default)]
    pub rule_list_path: Option<PathBuf>,

    /// Certificate checks run every `update_periodic_secs * cert_check_multiplier`.
    #[serde(default = "default_cert_check_multiplier")]
    pub cert_check_multiplier: u32,

    #[serde(default)]
    pub cert: CertConfig,

    #[serde(default)]
    pub auto_speed_limit: AutoSpeedLimitConfig,

    #[serde(default)]
    pub global_device_limit: RedisConfig,
}

impl ControllerConfig {
    /// Period of the node and usage tasks.
    pub fn update_periodic(&self) -> Duration {
        match self.update_periodic_secs {
            0 => Duration::from_secs(DEFAULT_UPDATE_PERIODIC_SECS),
            secs => Duration::from_secs(secs),
        }
    }

    /// Period of the certificate task.
    pub fn cert_check_period(&self) -> Duration {
        self.update_periodic() * self.cert_check_multiplier.max(1)
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            listen_ip: default_listen_ip(),
            send_ip: default_send_ip(),
            update_periodic_secs: default_update_periodic_secs(),
            disable_upload_traffic: false,
            disable_get_rule: false,
            disable_sniffing: false,
            enable_proxy_protocol: false,
            rule_list_path: None,
            cert_check_multiplier: default_cert_check_multiplier(),
            cert: CertConfig::default(),
            auto_speed_limit: AutoSpeedLimitConfig::default(),
            global_device_limit: RedisConfig::default(),
        }
    }
}

/// TLS certificate source.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CertConfig {
    #[serde(default)]
    pub mode: CertMode,

    #[serde(default)]
    pub domain: String,

    #[serde(default)]
    pub cert_file: String,

    #[serde(default)]
    pub key_file: String,

    /// DNS provider (e.g. `cloudflare`), for DNS-01.
    #[serde(default)]
    pub provider: String,

    /// ACME account email.
    #[serde(default)]
    pub email: String,

    #[serde(default)]
    pub dns_env: HashMap<String, String>,

    #[serde(default)]
    pub reject_unknown_sni: bool,
}

impl CertConfig {
    pub fn request(&self) -> CertRequest {
        CertRequest {
            domain: self.domain.clone(),
            email: self.email.clone(),
            mode: self.mode,
            provider: self.provider.clone(),
            dns_env: self.dns_env.clone(),
        }
    }
}

/// Usage-triggered throttling. Disabled when `limit_mbps` is 0.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AutoSpeedLimitConfig {
    /// Sustained rate (Mbps) above which a user is warned.
    #[serde(default)]
    pub limit_mbps: u64,

    /// Warnings tolerated before throttling (0 = throttle on first breach).
    #[serde(default)]
    pub warn_times: u32,

    /// Rate (Mbps) applied while throttled.
    #[serde(default)]
    pub limit_speed_mbps: u64,

    /// Throttle duration in minutes.
    #[serde(default)]
    pub limit_duration_mins: u64,
}

impl AutoSpeedLimitConfig {
    pub fn enabled(&self) -> bool {
        self.limit_mbps > 0
    }

    /// Threshold in bytes/second.
    #[expect(clippy::cast_precision_loss)]
    pub fn threshold_bytes_per_sec(&self) -> u64 {
        mbps_to_bytes_per_sec(self.limit_mbps as f64)
    }

    /// Throttled rate in bytes/second.
    #[expect(clippy::cast_precision_loss)]
    pub fn limited_bytes_per_sec(&self) -> u64 {
        mbps_to_bytes_per_sec(self.limit_speed_mbps as f64)
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.limit_duration_mins.saturating_mul(60))
    }
}

fn default_listen_ip() -> String {
    DEFAULT_LISTEN_IP.to_string()
}

fn default_send_ip() -> String {
    DEFAULT_SEND_IP.to_string()
}

fn default_update_periodic_secs() -> u64 {
    DEFAULT_UPDATE_PERIODIC_SECS
}

fn default_cert_check_multiplier() -> u32 {
    DEFAULT_CERT_CHECK_MULTIPLIER
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config: ControllerConfig = toml::from_str("").unwrap();
        assert_eq!(config.listen_ip, "0.0.0.0");
        assert_eq!(config.update_periodic(), Duration::from_secs(60));
        assert_eq!(config.cert_check_period(), Duration::from_secs(3600));
        assert_eq!(config.cert.mode, CertMode::None);
        assert!(!config.auto_speed_limit.enabled());
        assert!(!config.global_device_limit.enable);
        assert!(config.rule_list_path.is_none());
    }

    #[test]
    fn full_config_deserializes() {
        let config: ControllerConfig = toml::from_str(
            r#"
listen_ip = "127.0.0.1"
send_ip = "10.0.0.2"
update_periodic_secs = 30
disable_upload_traffic = true
disable_get_rule = true
rule_list_path = "/etc/nodeward/rules.txt"
cert_check_multiplier = 10

[cert]
mode = "dns"
domain = "node.example.com"
provider = "cloudflare"
email = "ops@example.com"
dns_env = { CF_DNS_API_TOKEN = "t" }

[auto_speed_limit]
limit_mbps = 100
warn_times = 2
limit_speed_mbps = 10
limit_duration_mins = 30

[global_device_limit]
enable = true
addr = "redis.internal:6379"
expiry_secs = 120
"#,
        )
        .unwrap();
        assert_eq!(config.update_periodic(), Duration::from_secs(30));
        assert_eq!(config.cert_check_period(), Duration::from_secs(300));
        assert!(config.cert.mode.is_managed());
        assert_eq!(config.cert.request().dns_env["CF_DNS_API_TOKEN"], "t");
        assert_eq!(config.auto_speed_limit.threshold_bytes_per_sec(), 12_500_000);
        assert_eq!(config.auto_speed_limit.limited_bytes_per_sec(), 1_250_000);
        assert_eq!(config.auto_speed_limit.duration(), Duration::from_secs(1800));
        assert!(config.global_device_limit.enable);
    }

    #[test]
    fn zero_period_falls_back_to_default() {
        let config = ControllerConfig {
            update_periodic_secs: 0,
            ..Default::default()
        };
        assert_eq!(config.update_periodic(), Duration::from_secs(60));
    }
}

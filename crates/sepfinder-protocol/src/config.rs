//! Configuration structures for protocol clients

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::retry::RetryPolicy;

/// Default device catalog endpoint
pub const DEFAULT_CATALOG_URL: &str = "https://api.ipsw.me/v4/";
/// Default beta firmware catalog endpoint
pub const DEFAULT_BETA_CATALOG_URL: &str = "https://api.m1sta.xyz/betas/";
/// Hosts whose firmware links have no usable sibling manifest
pub const DEFAULT_LEGACY_HOSTS: &[&str] = &["appldnld.apple.com"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the device catalog (trailing slash significant)
    pub catalog_url: String,

    /// Base URL of the beta firmware catalog
    pub beta_catalog_url: String,

    /// Connection timeout
    pub connect_timeout: Duration,

    /// Deadline for a single request attempt
    pub request_timeout: Duration,

    /// How long the device list stays cached
    pub device_list_ttl: Duration,

    /// Firmware hosts that need the manifest extracted from the archive
    pub legacy_hosts: Vec<String>,

    /// Retry policy for failed requests
    pub retry_policy: RetryPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            catalog_url: DEFAULT_CATALOG_URL.to_string(),
            beta_catalog_url: DEFAULT_BETA_CATALOG_URL.to_string(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(60),
            device_list_ttl: Duration::from_secs(300),
            legacy_hosts: DEFAULT_LEGACY_HOSTS.iter().map(ToString::to_string).collect(),
            retry_policy: RetryPolicy::default(),
        }
    }
}

impl ClientConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Self {
        let secs = |var: &str, default: u64| {
            Duration::from_secs(
                std::env::var(var)
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(default),
            )
        };

        Self {
            catalog_url: std::env::var("SEPFINDER_CATALOG_URL")
                .unwrap_or_else(|_| DEFAULT_CATALOG_URL.to_string()),
            beta_catalog_url: std::env::var("SEPFINDER_BETA_CATALOG_URL")
                .unwrap_or_else(|_| DEFAULT_BETA_CATALOG_URL.to_string()),
            connect_timeout: secs("SEPFINDER_CONNECT_TIMEOUT", 10),
            request_timeout: secs("SEPFINDER_REQUEST_TIMEOUT", 60),
            device_list_ttl: secs("SEPFINDER_DEVICE_LIST_TTL", 300),
            legacy_hosts: std::env::var("SEPFINDER_LEGACY_HOSTS")
                .map(|hosts| parse_host_list(&hosts))
                .unwrap_or_else(|_| {
                    DEFAULT_LEGACY_HOSTS.iter().map(ToString::to_string).collect()
                }),
            retry_policy: RetryPolicy::from_env(),
        }
    }

    /// Point both catalogs at `base`, with the beta catalog under `betas/`
    pub fn with_catalog_base(mut self, base: &str) -> Self {
        let base = base.trim_end_matches('/');
        self.catalog_url = format!("{base}/v4/");
        self.beta_catalog_url = format!("{base}/betas/");
        self
    }

    /// Whether firmware from `host` must go through archive extraction
    pub fn is_legacy_host(&self, host: &str) -> bool {
        self.legacy_hosts
            .iter()
            .any(|legacy| legacy.eq_ignore_ascii_case(host))
    }
}

fn parse_host_list(hosts: &str) -> Vec<String> {
    hosts
        .split(',')
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .map(str::to_ascii_lowercase)
        .collect()
}

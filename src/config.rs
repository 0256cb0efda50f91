// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Application configuration management.
//!
//! Persistent configuration stored in TOML format. Every field has a sane
//! default so a missing or empty config file works out of the box; the CLI
//! and environment can override individual fields at startup.

use std::time::Duration;

use flightfeed::RetryPolicy;
use serde::{Deserialize, Serialize};

/// Default base URL for the aircraft API (bulk seed).
pub const DEFAULT_API_URL: &str = "http://localhost:3001";

/// Default WebSocket URL for the live feed.
pub const DEFAULT_STREAM_URL: &str = "ws://localhost:3001";

/// Application configuration stored in TOML format.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    /// Base URL of the aircraft API used for the initial bulk fetch.
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// WebSocket URL of the live aircraft feed.
    #[serde(default = "default_stream_url")]
    pub stream_url: String,

    /// Give up after this many consecutive failed reconnect attempts.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// Delay before the first reconnect attempt, in milliseconds.
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,

    /// Upper bound on the reconnect backoff delay, in milliseconds.
    #[serde(default = "default_reconnect_cap_delay_ms")]
    pub reconnect_cap_delay_ms: u64,

    /// Evict aircraft not updated for this many seconds. Absent means
    /// records are kept until the feed replaces them.
    #[serde(default)]
    pub stale_timeout_secs: Option<u64>,
}

// Default value functions for serde
fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_stream_url() -> String {
    DEFAULT_STREAM_URL.to_string()
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

fn default_reconnect_base_delay_ms() -> u64 {
    1000
}

fn default_reconnect_cap_delay_ms() -> u64 {
    30000
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            stream_url: default_stream_url(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
            reconnect_cap_delay_ms: default_reconnect_cap_delay_ms(),
            stale_timeout_secs: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from disk, creating a default file if absent.
    pub fn load() -> Result<Self, confy::ConfyError> {
        confy::load("skywatch", "config")
    }

    /// Get the config file path for display to the user.
    pub fn get_config_path() -> Result<std::path::PathBuf, confy::ConfyError> {
        confy::get_configuration_file_path("skywatch", "config")
    }

    /// Reconnect policy built from the configured delays.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_reconnect_attempts,
            base_delay: Duration::from_millis(self.reconnect_base_delay_ms),
            cap_delay: Duration::from_millis(self.reconnect_cap_delay_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: AppConfig = serde_json::from_str("{}").unwrap();

        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert_eq!(config.stream_url, DEFAULT_STREAM_URL);
        assert_eq!(config.max_reconnect_attempts, 10);
        assert_eq!(config.stale_timeout_secs, None);
    }

    #[test]
    fn test_retry_policy_from_config() {
        let config = AppConfig::default();
        let policy = config.retry_policy();

        assert_eq!(policy.max_attempts, 10);
        assert_eq!(policy.base_delay, Duration::from_millis(1000));
        assert_eq!(policy.cap_delay, Duration::from_millis(30000));
    }
}

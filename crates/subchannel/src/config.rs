// -------------------------------------------------------------------------------------------------
//  Copyright (C) 2015-2025 Nautech Systems Pty Ltd. All rights reserved.
//  https://nautechsystems.io
//
//  Licensed under the GNU Lesser General Public License Version 3.0 (the "License");
//  You may not use this file except in compliance with the License.
//  You may obtain a copy of the License at https://www.gnu.org/licenses/lgpl-3.0.en.html
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.
// -------------------------------------------------------------------------------------------------

//! Configuration for subchannel connections.
//!
//! Field names serialize to the gRPC channel option keys, so a channel's option map
//! (JSON, TOML, or any serde format) deserializes directly into a [`SubchannelConfig`].
//! Keys this crate does not recognize are ignored and values are taken as given.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    backoff::{BACKOFF_JITTER, BACKOFF_MULTIPLIER, INITIAL_BACKOFF_MS, MAX_BACKOFF_MS},
    keepalive::{KEEPALIVE_MAX_TIME_MS, KEEPALIVE_TIMEOUT_MS},
};

/// Configuration for a subchannel.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubchannelConfig {
    /// User agent prepended to the library user agent.
    #[serde(rename = "grpc.primary_user_agent")]
    pub primary_user_agent: Option<String>,
    /// User agent appended to the library user agent.
    #[serde(rename = "grpc.secondary_user_agent")]
    pub secondary_user_agent: Option<String>,
    /// The interval (milliseconds) between keepalive pings while calls are active.
    #[serde(rename = "grpc.keepalive_time_ms")]
    pub keepalive_time_ms: Option<u64>,
    /// The time (milliseconds) to wait for a keepalive ping acknowledgement.
    #[serde(rename = "grpc.keepalive_timeout_ms")]
    pub keepalive_timeout_ms: Option<u64>,
    /// The TLS server name to verify and negotiate instead of the channel authority.
    ///
    /// Intended for testing against servers with certificates for another host.
    #[serde(rename = "grpc.ssl_target_name_override")]
    pub ssl_target_name_override: Option<String>,
    /// The authority to use instead of the one derived from the channel target.
    #[serde(rename = "grpc.default_authority")]
    pub default_authority: Option<String>,
    /// The initial reconnection delay (milliseconds).
    #[serde(rename = "grpc.initial_reconnect_backoff_ms")]
    pub initial_reconnect_backoff_ms: Option<u64>,
    /// The maximum reconnection delay (milliseconds).
    #[serde(rename = "grpc.max_reconnect_backoff_ms")]
    pub max_reconnect_backoff_ms: Option<u64>,
    /// The multiplier applied to the reconnection delay after each attempt.
    #[serde(rename = "grpc.reconnect_backoff_multiplier")]
    pub reconnect_backoff_multiplier: Option<f64>,
    /// The proportional jitter applied to reconnection delays.
    #[serde(rename = "grpc.reconnect_backoff_jitter")]
    pub reconnect_backoff_jitter: Option<f64>,
}

impl SubchannelConfig {
    /// Returns the configured keepalive interval, defaulting to [`KEEPALIVE_MAX_TIME_MS`].
    #[must_use]
    pub fn keepalive_time(&self) -> Duration {
        non_zero_millis(self.keepalive_time_ms.unwrap_or(KEEPALIVE_MAX_TIME_MS))
    }

    /// Returns the configured keepalive ack timeout, defaulting to [`KEEPALIVE_TIMEOUT_MS`].
    #[must_use]
    pub fn keepalive_timeout(&self) -> Duration {
        non_zero_millis(self.keepalive_timeout_ms.unwrap_or(KEEPALIVE_TIMEOUT_MS))
    }

    #[must_use]
    pub fn initial_reconnect_backoff(&self) -> Duration {
        Duration::from_millis(
            self.initial_reconnect_backoff_ms
                .unwrap_or(INITIAL_BACKOFF_MS),
        )
    }

    #[must_use]
    pub fn max_reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.max_reconnect_backoff_ms.unwrap_or(MAX_BACKOFF_MS))
    }

    #[must_use]
    pub fn reconnect_backoff_multiplier(&self) -> f64 {
        self.reconnect_backoff_multiplier
            .unwrap_or(BACKOFF_MULTIPLIER)
    }

    #[must_use]
    pub fn reconnect_backoff_jitter(&self) -> f64 {
        self.reconnect_backoff_jitter.unwrap_or(BACKOFF_JITTER)
    }

    /// Returns the user agent sent with every call.
    ///
    /// Joins the primary user agent, the library user agent and the secondary user agent
    /// with single spaces, skipping empty parts.
    #[must_use]
    pub fn user_agent(&self) -> String {
        let library = format!("grpc-rust-nautilus/{}", env!("CARGO_PKG_VERSION"));
        [
            self.primary_user_agent.as_deref(),
            Some(library.as_str()),
            self.secondary_user_agent.as_deref(),
        ]
        .into_iter()
        .flatten()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
    }
}

// Tokio intervals require a non-zero period
fn non_zero_millis(millis: u64) -> Duration {
    Duration::from_millis(millis.max(1))
}

////////////////////////////////////////////////////////////////////////////////
// Tests
////////////////////////////////////////////////////////////////////////////////
#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn test_defaults() {
        let config = SubchannelConfig::default();

        assert_eq!(
            config.keepalive_time(),
            Duration::from_millis(KEEPALIVE_MAX_TIME_MS)
        );
        assert_eq!(config.keepalive_timeout(), Duration::from_secs(20));
        assert_eq!(config.initial_reconnect_backoff(), Duration::from_secs(1));
        assert_eq!(config.max_reconnect_backoff(), Duration::from_secs(120));
        assert!((config.reconnect_backoff_multiplier() - 1.6).abs() < f64::EPSILON);
        assert!((config.reconnect_backoff_jitter() - 0.2).abs() < f64::EPSILON);
    }

    #[rstest]
    fn test_deserialize_channel_options() {
        let json = r#"{
            "grpc.primary_user_agent": "my-app/1.0",
            "grpc.keepalive_time_ms": 30000,
            "grpc.keepalive_timeout_ms": 5000,
            "grpc.ssl_target_name_override": "foo.test.google.fr",
            "grpc.max_receive_message_length": 1024
        }"#;

        let config: SubchannelConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.primary_user_agent.as_deref(), Some("my-app/1.0"));
        assert_eq!(config.keepalive_time(), Duration::from_secs(30));
        assert_eq!(config.keepalive_timeout(), Duration::from_secs(5));
        assert_eq!(
            config.ssl_target_name_override.as_deref(),
            Some("foo.test.google.fr")
        );
        assert_eq!(config.secondary_user_agent, None);
    }

    #[rstest]
    fn test_serialize_uses_option_keys() {
        let config = SubchannelConfig {
            keepalive_time_ms: Some(10_000),
            ..Default::default()
        };

        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["grpc.keepalive_time_ms"], 10_000);
    }

    #[rstest]
    fn test_zero_keepalive_is_clamped() {
        let config = SubchannelConfig {
            keepalive_time_ms: Some(0),
            keepalive_timeout_ms: Some(0),
            ..Default::default()
        };

        assert_eq!(config.keepalive_time(), Duration::from_millis(1));
        assert_eq!(config.keepalive_timeout(), Duration::from_millis(1));
    }

    #[rstest]
    #[case(None, None, "{lib}")]
    #[case(Some("primary/1.0"), None, "primary/1.0 {lib}")]
    #[case(None, Some("secondary/2.0"), "{lib} secondary/2.0")]
    #[case(Some("primary/1.0"), Some("secondary/2.0"), "primary/1.0 {lib} secondary/2.0")]
    #[case(Some(""), Some(""), "{lib}")]
    fn test_user_agent(
        #[case] primary: Option<&str>,
        #[case] secondary: Option<&str>,
        #[case] expected: &str,
    ) {
        let config = SubchannelConfig {
            primary_user_agent: primary.map(str::to_string),
            secondary_user_agent: secondary.map(str::to_string),
            ..Default::default()
        };

        let library = format!("grpc-rust-nautilus/{}", env!("CARGO_PKG_VERSION"));
        assert_eq!(config.user_agent(), expected.replace("{lib}", &library));
    }
}

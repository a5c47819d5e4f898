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

//! Authority and TLS server name resolution.

use crate::config::SubchannelConfig;

/// A host with an optional port, as found in a target or authority string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostPort {
    /// The host, without IPv6 brackets.
    pub host: String,
    /// The port, if one was given.
    pub port: Option<u16>,
}

/// Splits `target` into host and optional port.
///
/// Accepts `host`, `host:port`, `[v6]`, `[v6]:port` and bare IPv6 addresses (which are
/// never split). Returns `None` for an empty host, unbalanced brackets or an invalid port.
#[must_use]
pub fn split_host_port(target: &str) -> Option<HostPort> {
    if let Some(rest) = target.strip_prefix('[') {
        let (host, remainder) = rest.split_once(']')?;
        if host.is_empty() {
            return None;
        }

        let port = match remainder {
            "" => None,
            _ => Some(remainder.strip_prefix(':')?.parse().ok()?),
        };

        return Some(HostPort {
            host: host.to_string(),
            port,
        });
    }

    if target.is_empty() {
        return None;
    }

    match target.split_once(':') {
        // More than one colon: a bare IPv6 address
        Some((_, rest)) if rest.contains(':') => Some(HostPort {
            host: target.to_string(),
            port: None,
        }),
        Some((host, port)) => {
            if host.is_empty() {
                return None;
            }
            Some(HostPort {
                host: host.to_string(),
                port: Some(port.parse().ok()?),
            })
        }
        None => Some(HostPort {
            host: target.to_string(),
            port: None,
        }),
    }
}

/// Returns the default authority for a channel target.
///
/// `dns:` targets use their path, `unix:` targets use `localhost`, anything else is
/// taken as an authority already.
#[must_use]
pub fn default_authority(channel_target: &str) -> String {
    if channel_target.starts_with("unix:") {
        return "localhost".to_string();
    }

    match channel_target.strip_prefix("dns:") {
        Some(rest) => match rest.strip_prefix("//") {
            // dns://resolver/host:port
            Some(with_resolver) => with_resolver
                .split_once('/')
                .map_or(with_resolver, |(_, path)| path)
                .to_string(),
            None => rest.to_string(),
        },
        None => channel_target.to_string(),
    }
}

/// Returns the name used to verify the server certificate and sent as SNI.
///
/// The `grpc.ssl_target_name_override` option wins; otherwise the host of the configured
/// default authority, or of the channel target's default authority, is used, falling
/// back to `localhost`.
#[must_use]
pub fn tls_server_name(config: &SubchannelConfig, channel_target: &str) -> String {
    if let Some(name) = &config.ssl_target_name_override {
        return name.clone();
    }

    let authority = config
        .default_authority
        .clone()
        .unwrap_or_else(|| default_authority(channel_target));

    split_host_port(&authority).map_or_else(|| "localhost".to_string(), |hp| hp.host)
}

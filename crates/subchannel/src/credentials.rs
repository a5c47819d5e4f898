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

//! Channel credentials selecting plaintext or TLS sessions.

use std::sync::{Arc, Once};

use rustls::{
    ClientConfig, RootCertStore,
    crypto::{CryptoProvider, aws_lc_rs},
};

/// ALPN protocol identifier for HTTP/2.
pub const ALPN_H2: &[u8] = b"h2";

static INSTALL_PROVIDER: Once = Once::new();

/// Installs the `aws_lc_rs` cryptographic provider as the process default, once.
pub fn install_cryptographic_provider() {
    INSTALL_PROVIDER.call_once(|| {
        if CryptoProvider::get_default().is_none() {
            tracing::debug!("Installing aws_lc_rs cryptographic provider");

            match aws_lc_rs::default_provider().install_default() {
                Ok(()) => tracing::debug!("Cryptographic provider installed successfully"),
                Err(e) => tracing::debug!("Error installing cryptographic provider: {e:?}"),
            }
        }
    });
}

/// Creates a client TLS configuration trusting the Mozilla root store, advertising `h2`.
#[must_use]
pub fn create_tls_config() -> ClientConfig {
    install_cryptographic_provider();

    let mut root_store = RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let mut config = ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();
    config.alpn_protocols = vec![ALPN_H2.to_vec()];
    config
}

/// Credentials used when establishing sessions for a subchannel.
#[derive(Clone, Debug)]
pub enum ChannelCredentials {
    /// Plaintext HTTP/2.
    Insecure,
    /// HTTP/2 over TLS with the given client configuration.
    Secure(Arc<ClientConfig>),
}

impl ChannelCredentials {
    /// Creates plaintext credentials.
    #[must_use]
    pub const fn insecure() -> Self {
        Self::Insecure
    }

    /// Creates TLS credentials from `config`, adding `h2` to its ALPN protocols when absent.
    #[must_use]
    pub fn secure(mut config: ClientConfig) -> Self {
        if !config.alpn_protocols.iter().any(|p| p == ALPN_H2) {
            config.alpn_protocols.push(ALPN_H2.to_vec());
        }
        Self::Secure(Arc::new(config))
    }

    /// Creates TLS credentials trusting the Mozilla root store.
    #[must_use]
    pub fn secure_with_webpki_roots() -> Self {
        Self::Secure(Arc::new(create_tls_config()))
    }

    #[must_use]
    pub const fn is_secure(&self) -> bool {
        matches!(self, Self::Secure(_))
    }

    /// Returns the TLS configuration, if any.
    #[must_use]
    pub fn secure_context(&self) -> Option<Arc<ClientConfig>> {
        match self {
            Self::Insecure => None,
            Self::Secure(config) => Some(config.clone()),
        }
    }
}

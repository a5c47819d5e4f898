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

//! The transport seam between a subchannel and the HTTP/2 session it owns.
//!
//! A [`Transport`] establishes a [`Session`] to a backend address. The session reports its
//! lifecycle through [`SessionEvents`], which tag every event with the [`SessionId`] the
//! subchannel assigned when the attempt started. The subchannel uses that tag to discard
//! events from sessions it has already replaced.

pub mod h2;

use std::{
    fmt::{Debug, Display},
    sync::Arc,
};

use bytes::Bytes;
use futures::future::BoxFuture;

use crate::{
    authority::tls_server_name, config::SubchannelConfig, credentials::ChannelCredentials,
};

/// Identity token for one connection attempt of a subchannel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Errors raised by a transport while establishing or using a session.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP/2 error: {0}")]
    Http2(#[from] ::h2::Error),
    #[error("Invalid TLS server name: {0}")]
    InvalidServerName(String),
    #[error("Session is not connected")]
    NotConnected,
    #[error("Session is closed")]
    Closed,
}

/// A lifecycle event reported by a session.
#[derive(Debug)]
pub enum SessionEvent {
    /// The HTTP/2 handshake completed.
    Connected,
    /// The session ended, whether or not it ever connected.
    Closed,
    /// The peer sent GOAWAY.
    GoAway {
        code: u32,
        debug_data: Option<Bytes>,
    },
    /// A session-level error. Always followed by [`SessionEvent::Closed`].
    Error(TransportError),
    /// The underlying socket closed.
    SocketClosed,
}

/// Receives events from sessions, tagged with their identity.
pub type SessionEventSink = Arc<dyn Fn(SessionId, SessionEvent) + Send + Sync>;

/// The handle a session uses to report its lifecycle.
#[derive(Clone)]
pub struct SessionEvents {
    session_id: SessionId,
    sink: SessionEventSink,
}

impl Debug for SessionEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct(stringify!(SessionEvents))
            .field("session_id", &self.session_id)
            .field("sink", &"<function>")
            .finish()
    }
}

impl SessionEvents {
    #[must_use]
    pub fn new(session_id: SessionId, sink: SessionEventSink) -> Self {
        Self { session_id, sink }
    }

    #[must_use]
    pub const fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn emit(&self, event: SessionEvent) {
        (self.sink)(self.session_id, event);
    }

    pub fn connected(&self) {
        self.emit(SessionEvent::Connected);
    }

    pub fn closed(&self) {
        self.emit(SessionEvent::Closed);
    }

    pub fn go_away(&self, code: u32, debug_data: Option<Bytes>) {
        self.emit(SessionEvent::GoAway { code, debug_data });
    }

    pub fn error(&self, error: TransportError) {
        self.emit(SessionEvent::Error(error));
    }

    pub fn socket_closed(&self) {
        self.emit(SessionEvent::SocketClosed);
    }
}

/// TLS parameters for a connection attempt.
#[derive(Clone, Debug)]
pub struct TlsSettings {
    pub config: Arc<rustls::ClientConfig>,
    /// Name verified against the server certificate and sent as SNI.
    pub server_name: String,
}

/// Everything a transport needs to start one connection attempt.
#[derive(Clone, Debug)]
pub struct ConnectRequest {
    /// The backend address, as `host:port`.
    pub address: String,
    pub tls: Option<TlsSettings>,
}

impl ConnectRequest {
    /// Builds the request for `address`, resolving the TLS server name when secure.
    #[must_use]
    pub fn new(
        address: &str,
        credentials: &ChannelCredentials,
        config: &SubchannelConfig,
        channel_target: &str,
    ) -> Self {
        let tls = credentials.secure_context().map(|config_tls| TlsSettings {
            config: config_tls,
            server_name: tls_server_name(config, channel_target),
        });

        Self {
            address: address.to_string(),
            tls,
        }
    }

    #[must_use]
    pub const fn is_secure(&self) -> bool {
        self.tls.is_some()
    }

    /// Returns the URI scheme for call requests on this session.
    #[must_use]
    pub fn scheme(&self) -> http::uri::Scheme {
        if self.is_secure() {
            http::uri::Scheme::HTTPS
        } else {
            http::uri::Scheme::HTTP
        }
    }
}

/// Establishes sessions to backend addresses.
pub trait Transport: Send + Sync + 'static {
    type Session: Session;

    /// Starts a connection attempt and returns its session immediately.
    ///
    /// The outcome is reported through `events`. Implementations must not invoke `events`
    /// synchronously from within this call.
    fn connect(&self, request: ConnectRequest, events: SessionEvents) -> Self::Session;
}

/// One HTTP/2 session, connecting or connected.
pub trait Session: Send + Sync + 'static {
    /// The stream handle returned when a call is opened.
    type Stream: Send + 'static;

    /// Sends a PING and resolves when it is acknowledged.
    fn ping(&self) -> BoxFuture<'static, Result<(), TransportError>>;

    /// Opens a request stream on the session.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is not connected or refuses the stream.
    fn open_stream(&self, request: http::Request<()>) -> Result<Self::Stream, TransportError>;

    /// Marks whether active calls depend on this session.
    fn set_referenced(&self, referenced: bool);

    /// Closes the session. Idempotent.
    fn close(&self);
}

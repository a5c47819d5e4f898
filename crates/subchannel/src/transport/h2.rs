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

//! HTTP/2 transport built on `h2`, over plain TCP or TLS via `tokio-rustls`.
//!
//! Each session runs on its own task which connects, performs the handshake and then
//! drives the connection until it ends. Lifecycle events are emitted in order:
//! `connected` once the handshake completes, then on termination either `go_away` or
//! `error`, followed by `closed` and `socket_closed`. A failed attempt emits `error` and
//! `closed` only.

use std::{
    fmt::Debug,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use bytes::Bytes;
use futures::future::BoxFuture;
use h2::{
    Ping, PingPong, SendStream,
    client::{self, Connection, ResponseFuture, SendRequest},
};
use rustls::pki_types::ServerName;
use tokio::{net::TcpStream, sync::Notify};
use tokio_rustls::TlsConnector;
use tokio_tungstenite::MaybeTlsStream;

use super::{ConnectRequest, Session, SessionEvents, Transport, TransportError};
use crate::{MUTEX_POISONED, runtime::spawn_task};

type H2Connection = Connection<MaybeTlsStream<TcpStream>, Bytes>;

/// Establishes HTTP/2 sessions over TCP, with TLS when the request carries settings.
#[derive(Clone, Copy, Debug, Default)]
pub struct H2Transport;

impl H2Transport {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Transport for H2Transport {
    type Session = H2Session;

    fn connect(&self, request: ConnectRequest, events: SessionEvents) -> Self::Session {
        let shared = Arc::new(SessionShared::default());
        spawn_task(run_session(request, shared.clone(), events));
        H2Session { shared }
    }
}

/// A request stream opened on an [`H2Session`].
#[derive(Debug)]
pub struct H2Stream {
    /// Resolves to the response headers.
    pub response: ResponseFuture,
    /// Sends the request body and trailers.
    pub send: SendStream<Bytes>,
}

#[derive(Debug, Default)]
enum SessionSlot {
    #[default]
    Connecting,
    Ready(SendRequest<Bytes>),
    Closed,
}

#[derive(Default)]
struct SessionShared {
    slot: Mutex<SessionSlot>,
    ping_pong: tokio::sync::Mutex<Option<PingPong>>,
    shutdown: Notify,
    referenced: AtomicBool,
}

impl SessionShared {
    /// Publishes the handshake result, unless the session was closed meanwhile.
    fn publish(&self, send_request: SendRequest<Bytes>) -> bool {
        let mut slot = self.slot.lock().expect(MUTEX_POISONED);
        if matches!(*slot, SessionSlot::Closed) {
            return false;
        }
        *slot = SessionSlot::Ready(send_request);
        true
    }
}

/// An HTTP/2 session handle.
#[derive(Clone)]
pub struct H2Session {
    shared: Arc<SessionShared>,
}

impl Debug for H2Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slot = match &*self.shared.slot.lock().expect(MUTEX_POISONED) {
            SessionSlot::Connecting => "connecting",
            SessionSlot::Ready(_) => "ready",
            SessionSlot::Closed => "closed",
        };
        f.debug_struct(stringify!(H2Session))
            .field("slot", &slot)
            .field("referenced", &self.is_referenced())
            .finish()
    }
}

impl H2Session {
    #[must_use]
    pub fn is_referenced(&self) -> bool {
        self.shared.referenced.load(Ordering::Relaxed)
    }
}

impl Session for H2Session {
    type Stream = H2Stream;

    fn ping(&self) -> BoxFuture<'static, Result<(), TransportError>> {
        let shared = self.shared.clone();
        Box::pin(async move {
            let mut guard = shared.ping_pong.lock().await;
            let ping_pong = guard.as_mut().ok_or(TransportError::NotConnected)?;
            ping_pong.ping(Ping::opaque()).await?;
            Ok(())
        })
    }

    fn open_stream(&self, request: http::Request<()>) -> Result<Self::Stream, TransportError> {
        let mut send_request = match &*self.shared.slot.lock().expect(MUTEX_POISONED) {
            SessionSlot::Ready(send_request) => send_request.clone(),
            SessionSlot::Connecting => return Err(TransportError::NotConnected),
            SessionSlot::Closed => return Err(TransportError::Closed),
        };

        let (response, send) = send_request.send_request(request, false)?;
        Ok(H2Stream { response, send })
    }

    fn set_referenced(&self, referenced: bool) {
        if self.shared.referenced.swap(referenced, Ordering::Relaxed) != referenced {
            tracing::trace!("Session referenced={referenced}");
        }
    }

    fn close(&self) {
        let previous = std::mem::replace(
            &mut *self.shared.slot.lock().expect(MUTEX_POISONED),
            SessionSlot::Closed,
        );

        if !matches!(previous, SessionSlot::Closed) {
            // Dropping the last `SendRequest` lets the connection shut down gracefully
            drop(previous);
            self.shared.shutdown.notify_one();
        }
    }
}

async fn run_session(request: ConnectRequest, shared: Arc<SessionShared>, events: SessionEvents) {
    let session_id = events.session_id();
    let address = request.address.clone();

    let established = tokio::select! {
        result = establish(&request) => result,
        () = shared.shutdown.notified() => {
            tracing::debug!("Connection attempt {session_id} to {address} cancelled");
            events.closed();
            return;
        }
    };

    let (send_request, mut connection) = match established {
        Ok(parts) => parts,
        Err(e) => {
            tracing::debug!("Connection attempt {session_id} to {address} failed: {e}");
            events.error(e);
            events.closed();
            return;
        }
    };

    *shared.ping_pong.lock().await = connection.ping_pong();

    if shared.publish(send_request) {
        tracing::debug!("Connected {session_id} to {address}");
        events.connected();
    }

    match connection.await {
        Ok(()) => tracing::debug!("Connection {session_id} to {address} closed"),
        Err(e) if e.is_go_away() && e.is_remote() => {
            let code = e.reason().map_or(0, u32::from);
            tracing::debug!("Connection {session_id} to {address} received GOAWAY: {e}");
            // `h2` does not expose the GOAWAY debug data
            events.go_away(code, None);
        }
        Err(e) => {
            tracing::debug!("Connection {session_id} to {address} failed: {e}");
            events.error(TransportError::from(e));
        }
    }

    if let Ok(mut ping_pong) = shared.ping_pong.try_lock() {
        ping_pong.take();
    }
    *shared.slot.lock().expect(MUTEX_POISONED) = SessionSlot::Closed;

    events.closed();
    events.socket_closed();
}

async fn establish(
    request: &ConnectRequest,
) -> Result<(SendRequest<Bytes>, H2Connection), TransportError> {
    let tcp = TcpStream::connect(request.address.as_str()).await?;
    tcp.set_nodelay(true)?;

    let io = match &request.tls {
        None => MaybeTlsStream::Plain(tcp),
        Some(tls) => {
            let server_name = ServerName::try_from(tls.server_name.clone())
                .map_err(|_| TransportError::InvalidServerName(tls.server_name.clone()))?;
            let connector = TlsConnector::from(tls.config.clone());
            MaybeTlsStream::Rustls(connector.connect(server_name, tcp).await?)
        }
    };

    let (send_request, connection) = client::handshake(io).await?;
    Ok((send_request, connection))
}

////////////////////////////////////////////////////////////////////////////////
// Tests
////////////////////////////////////////////////////////////////////////////////
#[cfg(test)]
mod tests {
    use rstest::rstest;
    use tokio::{net::TcpListener, sync::mpsc};

    use super::*;
    use crate::transport::{SessionEvent, SessionId};

    fn channel_events(
        id: u64,
    ) -> (
        SessionEvents,
        mpsc::UnboundedReceiver<(SessionId, SessionEvent)>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let events = SessionEvents::new(
            SessionId::new(id),
            Arc::new(move |id: SessionId, event: SessionEvent| {
                let _ = tx.send((id, event));
            }),
        );
        (events, rx)
    }

    fn plain_request(address: String) -> ConnectRequest {
        ConnectRequest { address, tls: None }
    }

    #[rstest]
    #[tokio::test]
    async fn test_refused_connection_reports_error_then_closed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let (events, mut rx) = channel_events(1);
        let session = H2Transport::new().connect(plain_request(address), events);

        let (id, first) = rx.recv().await.unwrap();
        assert_eq!(id, SessionId::new(1));
        assert!(matches!(first, SessionEvent::Error(TransportError::Io(_))));
        assert!(matches!(rx.recv().await.unwrap().1, SessionEvent::Closed));
        assert!(rx.recv().await.is_none());

        let request = http::Request::new(());
        assert!(matches!(
            session.open_stream(request),
            Err(TransportError::NotConnected)
        ));
    }

    #[rstest]
    #[tokio::test]
    async fn test_handshake_then_close_emits_lifecycle() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut connection = h2::server::handshake(socket).await.unwrap();
            while let Some(result) = connection.accept().await {
                if result.is_err() {
                    break;
                }
            }
        });

        let (events, mut rx) = channel_events(7);
        let session = H2Transport::new().connect(plain_request(address), events);

        assert!(matches!(rx.recv().await.unwrap().1, SessionEvent::Connected));
        assert!(session.ping().await.is_ok());

        session.set_referenced(true);
        assert!(session.is_referenced());

        session.close();
        session.close();

        let mut remaining = Vec::new();
        while let Some((_, event)) = rx.recv().await {
            remaining.push(event);
        }
        assert!(matches!(
            remaining.as_slice(),
            [.., SessionEvent::Closed, SessionEvent::SocketClosed]
        ));
        assert!(matches!(
            session.open_stream(http::Request::new(())),
            Err(TransportError::Closed)
        ));

        server.await.unwrap();
    }
}

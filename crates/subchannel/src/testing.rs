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

//! Test doubles and helpers for exercising subchannels without a network.
//!
//! [`MockTransport`] records every session it creates. Tests drive a session's lifecycle
//! by emitting events through its [`MockSession`] handle, exactly as a real transport
//! task would.

use std::{
    future::Future,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;
use futures::{
    FutureExt,
    future::{self, BoxFuture},
};
use http::{HeaderMap, Method, Uri};

use crate::{
    MUTEX_POISONED,
    transport::{
        ConnectRequest, Session, SessionEvent, SessionEvents, SessionId, Transport,
        TransportError,
    },
};

/// Initializes a `tracing` subscriber writing to the test output.
///
/// Honors `RUST_LOG`, defaulting to `debug`. Safe to call repeatedly.
pub fn init_logger_for_testing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Repeatedly evaluates a condition with a delay until it becomes true or a timeout occurs.
///
/// Time is measured with the Tokio clock, so this also works with paused time.
///
/// # Panics
///
/// Panics if the timeout duration is exceeded without the condition being met.
pub async fn wait_until_async<F, Fut>(mut condition: F, timeout: Duration)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let start_time = tokio::time::Instant::now();

    loop {
        if condition().await {
            break;
        }

        assert!(
            start_time.elapsed() <= timeout,
            "Timeout waiting for condition"
        );

        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// A stream opened on a [`MockSession`], holding the request head.
#[derive(Clone, Debug)]
pub struct MockStream {
    pub session_id: SessionId,
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
}

#[derive(Debug)]
struct MockSessionInner {
    request: ConnectRequest,
    events: SessionEvents,
    closed: AtomicBool,
    referenced: AtomicBool,
    acks_pings: AtomicBool,
    pings: AtomicUsize,
    streams: Mutex<Vec<MockStream>>,
}

/// A session whose lifecycle is driven by the test.
#[derive(Clone, Debug)]
pub struct MockSession {
    inner: Arc<MockSessionInner>,
}

impl MockSession {
    fn new(request: ConnectRequest, events: SessionEvents, acks_pings: bool) -> Self {
        Self {
            inner: Arc::new(MockSessionInner {
                request,
                events,
                closed: AtomicBool::new(false),
                referenced: AtomicBool::new(false),
                acks_pings: AtomicBool::new(acks_pings),
                pings: AtomicUsize::new(0),
                streams: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Creates a session not attached to any subchannel, whose events go nowhere.
    #[must_use]
    pub fn detached(session_id: SessionId) -> Self {
        let request = ConnectRequest {
            address: "127.0.0.1:0".to_string(),
            tls: None,
        };
        let events =
            SessionEvents::new(session_id, Arc::new(|_: SessionId, _: SessionEvent| {}));
        Self::new(request, events, true)
    }

    #[must_use]
    pub fn id(&self) -> SessionId {
        self.inner.events.session_id()
    }

    #[must_use]
    pub fn request(&self) -> &ConnectRequest {
        &self.inner.request
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_referenced(&self) -> bool {
        self.inner.referenced.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn ping_count(&self) -> usize {
        self.inner.pings.load(Ordering::SeqCst)
    }

    /// Sets whether pings are acknowledged. Unacknowledged pings never complete.
    pub fn set_acks_pings(&self, acks: bool) {
        self.inner.acks_pings.store(acks, Ordering::SeqCst);
    }

    /// Returns the streams opened on this session.
    #[must_use]
    pub fn streams(&self) -> Vec<MockStream> {
        self.inner.streams.lock().expect(MUTEX_POISONED).clone()
    }

    /// Returns the event handle the subchannel supplied for this session.
    #[must_use]
    pub fn events(&self) -> &SessionEvents {
        &self.inner.events
    }

    pub fn emit_connected(&self) {
        self.inner.events.connected();
    }

    pub fn emit_closed(&self) {
        self.inner.events.closed();
    }

    pub fn emit_go_away(&self, code: u32, debug_data: Option<&'static [u8]>) {
        self.inner
            .events
            .go_away(code, debug_data.map(Bytes::from_static));
    }

    pub fn emit_error(&self, error: TransportError) {
        self.inner.events.error(error);
    }

    pub fn emit_socket_closed(&self) {
        self.inner.events.socket_closed();
    }
}

impl Session for MockSession {
    type Stream = MockStream;

    fn ping(&self) -> BoxFuture<'static, Result<(), TransportError>> {
        self.inner.pings.fetch_add(1, Ordering::SeqCst);

        if self.is_closed() {
            future::ready(Err::<(), _>(TransportError::Closed)).boxed()
        } else if self.inner.acks_pings.load(Ordering::SeqCst) {
            future::ready(Ok::<_, TransportError>(())).boxed()
        } else {
            future::pending::<Result<(), TransportError>>().boxed()
        }
    }

    fn open_stream(&self, request: http::Request<()>) -> Result<Self::Stream, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        let (parts, ()) = request.into_parts();
        let stream = MockStream {
            session_id: self.id(),
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
        };
        self.inner
            .streams
            .lock()
            .expect(MUTEX_POISONED)
            .push(stream.clone());
        Ok(stream)
    }

    fn set_referenced(&self, referenced: bool) {
        self.inner.referenced.store(referenced, Ordering::SeqCst);
    }

    fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
    }
}

/// A transport recording the sessions it creates instead of connecting.
#[derive(Clone, Debug, Default)]
pub struct MockTransport {
    sessions: Arc<Mutex<Vec<MockSession>>>,
    ignores_pings: Arc<AtomicBool>,
}

impl MockTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether sessions created from now on acknowledge pings.
    pub fn set_acks_pings(&self, acks: bool) {
        self.ignores_pings.store(!acks, Ordering::SeqCst);
    }

    /// Returns every session created so far, oldest first.
    #[must_use]
    pub fn sessions(&self) -> Vec<MockSession> {
        self.sessions.lock().expect(MUTEX_POISONED).clone()
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.lock().expect(MUTEX_POISONED).len()
    }

    /// Returns the most recently created session.
    #[must_use]
    pub fn last_session(&self) -> Option<MockSession> {
        self.sessions.lock().expect(MUTEX_POISONED).last().cloned()
    }
}

impl Transport for MockTransport {
    type Session = MockSession;

    fn connect(&self, request: ConnectRequest, events: SessionEvents) -> Self::Session {
        let acks_pings = !self.ignores_pings.load(Ordering::SeqCst);
        let session = MockSession::new(request, events, acks_pings);
        self.sessions
            .lock()
            .expect(MUTEX_POISONED)
            .push(session.clone());
        session
    }
}

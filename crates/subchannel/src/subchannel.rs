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

//! The subchannel: connection lifecycle manager for a single backend address.
//!
//! A [`Subchannel`] owns at most one transport session and drives it through the gRPC
//! connectivity state machine:
//!
//! ```text
//!            start_connecting                connected
//!   IDLE ───────────────────────▶ CONNECTING ──────────▶ READY
//!    ▲  ▲                           │   ▲                 │
//!    │  │ backoff fires     closed  │   │ backoff fires   │ closed / GOAWAY /
//!    │  └────────────── TRANSIENT_FAILURE  (reconnect     │ keepalive timeout
//!    │                              │       pending)      │
//!    └──────────────────────────────┴─────────────────────┘
//! ```
//!
//! All state is held behind a single mutex, so every transition is an atomic
//! check-and-set against the allowed source states. Transport events and timer fires
//! are delivered through a queue drained by one task per subchannel, and every transport
//! event carries the [`SessionId`] of the attempt that produced it: events from a session
//! the subchannel has since replaced are discarded. Listeners are always invoked after
//! the state lock is released.

use std::{
    fmt::{Debug, Display},
    sync::{Arc, Mutex, MutexGuard, Weak},
    time::Duration,
};

use http::HeaderMap;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

use crate::{
    MUTEX_POISONED,
    backoff::{BackoffTimeout, ExponentialBackoff},
    call::{SubchannelCall, build_call_request},
    config::SubchannelConfig,
    credentials::ChannelCredentials,
    error::SubchannelError,
    keepalive::{KeepaliveController, backed_off_keepalive_time, is_too_many_pings},
    listeners::ListenerRegistry,
    runtime::spawn_task,
    state::ConnectivityState,
    transport::{ConnectRequest, Session, SessionEvent, SessionEvents, SessionId, Transport},
};

/// Listener notified of every connectivity state transition with `(subchannel, previous, new)`.
pub type StateListener<T> =
    dyn Fn(&Subchannel<T>, ConnectivityState, ConnectivityState) + Send + Sync;

/// Listener notified when a session that reached `READY` loses its socket.
pub type DisconnectListener = dyn Fn() + Send + Sync;

type Transition = (ConnectivityState, ConnectivityState);

/// Bound on sessions awaiting their socket close for disconnect notification.
const MAX_TRACKED_READY_SESSIONS: usize = 8;

/// Events delivered to the subchannel's event loop.
#[derive(Debug)]
pub(crate) enum SubchannelEvent {
    Session {
        session_id: SessionId,
        event: SessionEvent,
    },
    BackoffFired {
        generation: u64,
    },
    KeepaliveTimeout {
        session_id: SessionId,
        generation: u64,
    },
}

/// What the backoff timer does when it fires.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum BackoffOutcome {
    #[default]
    ReturnToIdle,
    ResumeConnecting,
}

struct ActiveSession<S> {
    id: SessionId,
    handle: Arc<S>,
}

struct SubchannelCore<S> {
    state: ConnectivityState,
    session: Option<ActiveSession<S>>,
    last_session_id: u64,
    backoff_outcome: BackoffOutcome,
    call_refcount: usize,
    refcount: usize,
    keepalive_time: Duration,
    keepalive_timeout: Duration,
    keepalive: KeepaliveController,
    backoff: BackoffTimeout,
    /// Sessions that reached `READY` and whose socket has not closed yet.
    ready_sessions: Vec<SessionId>,
}

impl<S: Session> SubchannelCore<S> {
    fn is_current_session(&self, session_id: SessionId) -> bool {
        self.session.as_ref().is_some_and(|s| s.id == session_id)
    }

    fn close_session(&mut self) {
        if let Some(session) = self.session.take() {
            tracing::trace!("Closing {}", session.id);
            session.handle.close();
        }
    }

    fn start_keepalive(&mut self) {
        if let Some(session) = &self.session {
            let (id, handle) = (session.id, session.handle.clone());
            self.keepalive
                .start(id, handle, self.keepalive_time, self.keepalive_timeout);
        }
    }
}

struct SubchannelInner<T: Transport> {
    channel_target: String,
    address: String,
    config: SubchannelConfig,
    credentials: ChannelCredentials,
    user_agent: String,
    transport: T,
    events_tx: UnboundedSender<SubchannelEvent>,
    core: Mutex<SubchannelCore<T::Session>>,
    state_listeners: Mutex<ListenerRegistry<StateListener<T>>>,
    disconnect_listeners: Mutex<ListenerRegistry<DisconnectListener>>,
}

impl<T: Transport> Drop for SubchannelInner<T> {
    fn drop(&mut self) {
        let core = match self.core.get_mut() {
            Ok(core) => core,
            Err(poisoned) => poisoned.into_inner(),
        };
        core.backoff.stop();
        core.keepalive.stop();
        core.close_session();
        tracing::debug!("Dropped subchannel {}", self.address);
    }
}

/// A connection lifecycle manager for a single backend address.
///
/// Cloning produces another handle to the same subchannel.
pub struct Subchannel<T: Transport> {
    inner: Arc<SubchannelInner<T>>,
}

impl<T: Transport> Clone for Subchannel<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Transport> Debug for Subchannel<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let core = self.lock_core();
        f.debug_struct(stringify!(Subchannel))
            .field("address", &self.inner.address)
            .field("state", &core.state)
            .field("call_refcount", &core.call_refcount)
            .field("refcount", &core.refcount)
            .finish_non_exhaustive()
    }
}

impl<T: Transport> Display for Subchannel<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.inner.address)
    }
}

impl<T: Transport> Subchannel<T> {
    /// Creates a new [`Subchannel`] in `IDLE` for `address`.
    ///
    /// `channel_target` is the target of the owning channel and determines the default
    /// authority used for TLS server name verification. Must be called where a Tokio
    /// runtime is available or can be created. Out-of-range reconnect backoff options are
    /// normalized as described on [`ExponentialBackoff::new`].
    #[must_use]
    pub fn new(
        channel_target: impl Into<String>,
        address: impl Into<String>,
        config: SubchannelConfig,
        credentials: ChannelCredentials,
        transport: T,
    ) -> Self {
        let backoff = ExponentialBackoff::new(
            config.initial_reconnect_backoff(),
            config.max_reconnect_backoff(),
            config.reconnect_backoff_multiplier(),
            config.reconnect_backoff_jitter(),
        );

        let (events_tx, events_rx) = unbounded_channel();

        let backoff_tx = events_tx.clone();
        let backoff = BackoffTimeout::new(
            backoff,
            Arc::new(move |generation: u64| {
                if let Err(e) = backoff_tx.send(SubchannelEvent::BackoffFired { generation }) {
                    tracing::trace!("Backoff fired after subchannel dropped: {e}");
                }
            }),
        );

        let keepalive_tx = events_tx.clone();
        let keepalive = KeepaliveController::new(Arc::new(
            move |session_id: SessionId, generation: u64| {
                let event = SubchannelEvent::KeepaliveTimeout {
                    session_id,
                    generation,
                };
                if let Err(e) = keepalive_tx.send(event) {
                    tracing::trace!("Keepalive timeout after subchannel dropped: {e}");
                }
            },
        ));

        let core = SubchannelCore {
            state: ConnectivityState::Idle,
            session: None,
            last_session_id: 0,
            backoff_outcome: BackoffOutcome::default(),
            call_refcount: 0,
            refcount: 0,
            keepalive_time: config.keepalive_time(),
            keepalive_timeout: config.keepalive_timeout(),
            keepalive,
            backoff,
            ready_sessions: Vec::new(),
        };

        let inner = Arc::new(SubchannelInner {
            channel_target: channel_target.into(),
            address: address.into(),
            user_agent: config.user_agent(),
            config,
            credentials,
            transport,
            events_tx,
            core: Mutex::new(core),
            state_listeners: Mutex::new(ListenerRegistry::default()),
            disconnect_listeners: Mutex::new(ListenerRegistry::default()),
        });

        spawn_task(Self::run_event_loop(Arc::downgrade(&inner), events_rx));
        tracing::debug!("Created subchannel {}", inner.address);

        Self { inner }
    }

    async fn run_event_loop(
        inner: Weak<SubchannelInner<T>>,
        mut events_rx: UnboundedReceiver<SubchannelEvent>,
    ) {
        while let Some(event) = events_rx.recv().await {
            let Some(inner) = inner.upgrade() else {
                break;
            };
            Self { inner }.handle_event(event);
        }
        tracing::trace!("Subchannel event loop completed");
    }

    /// Returns the backend address.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.inner.address
    }

    /// Returns the target of the owning channel.
    #[must_use]
    pub fn channel_target(&self) -> &str {
        &self.inner.channel_target
    }

    /// Returns the user agent sent with every call.
    #[must_use]
    pub fn user_agent(&self) -> &str {
        &self.inner.user_agent
    }

    /// Returns the current connectivity state.
    #[must_use]
    pub fn connectivity_state(&self) -> ConnectivityState {
        self.lock_core().state
    }

    #[must_use]
    pub fn call_refcount(&self) -> usize {
        self.lock_core().call_refcount
    }

    #[must_use]
    pub fn refcount(&self) -> usize {
        self.lock_core().refcount
    }

    /// Returns the current keepalive interval.
    #[must_use]
    pub fn keepalive_time(&self) -> Duration {
        self.lock_core().keepalive_time
    }

    /// Returns true if the subchannel holds a session.
    #[must_use]
    pub fn has_session(&self) -> bool {
        self.lock_core().session.is_some()
    }

    /// Returns true if the reconnect backoff timer is armed.
    #[must_use]
    pub fn is_backoff_running(&self) -> bool {
        self.lock_core().backoff.is_running()
    }

    /// Returns true if keepalive probing is active.
    #[must_use]
    pub fn is_keepalive_running(&self) -> bool {
        self.lock_core().keepalive.is_running()
    }

    /// Requests a connection attempt.
    ///
    /// From `IDLE` this starts connecting immediately. From `TRANSIENT_FAILURE` the
    /// attempt is deferred until the backoff timer fires. Otherwise does nothing.
    pub fn start_connecting(&self) {
        let transition = {
            let mut core = self.lock_core();
            let transition = self.transition_locked(
                &mut core,
                &[ConnectivityState::Idle],
                ConnectivityState::Connecting,
            );
            if transition.is_none() && core.state.is_transient_failure() {
                tracing::debug!("{} will reconnect when backoff fires", self.inner.address);
                core.backoff_outcome = BackoffOutcome::ResumeConnecting;
            }
            transition
        };
        self.notify_state_listeners(transition);
    }

    /// Resets the reconnect backoff and, from `TRANSIENT_FAILURE`, reconnects immediately.
    pub fn reset_backoff(&self) {
        let transition = {
            let mut core = self.lock_core();
            core.backoff.reset();
            self.transition_locked(
                &mut core,
                &[ConnectivityState::TransientFailure],
                ConnectivityState::Connecting,
            )
        };
        self.notify_state_listeners(transition);
    }

    /// Transitions to `to` if the current state is one of `from`.
    ///
    /// Returns true if the transition happened. Entering a state runs its entry actions
    /// and notifies state listeners. `READY` can only be entered while a session is held.
    pub fn transition_to_state(&self, from: &[ConnectivityState], to: ConnectivityState) -> bool {
        let transition = {
            let mut core = self.lock_core();
            self.transition_locked(&mut core, from, to)
        };
        let transitioned = transition.is_some();
        self.notify_state_listeners(transition);
        transitioned
    }

    /// Registers an active call.
    ///
    /// The first call references the session and starts keepalive probing.
    pub fn call_ref(&self) {
        let mut core = self.lock_core();
        if core.call_refcount == 0 {
            if let Some(session) = &core.session {
                session.handle.set_referenced(true);
            }
            core.start_keepalive();
        }
        core.call_refcount += 1;
        tracing::trace!(
            "{} call_refcount {} -> {}",
            self.inner.address,
            core.call_refcount - 1,
            core.call_refcount
        );
    }

    /// Releases an active call.
    ///
    /// Releasing the last call unreferences the session and stops keepalive probing.
    pub fn call_unref(&self) {
        let transition = {
            let mut core = self.lock_core();
            if core.call_refcount == 0 {
                tracing::error!("{} call_unref without a matching call_ref", self.inner.address);
                return;
            }

            core.call_refcount -= 1;
            tracing::trace!(
                "{} call_refcount {} -> {}",
                self.inner.address,
                core.call_refcount + 1,
                core.call_refcount
            );

            if core.call_refcount == 0 {
                if let Some(session) = &core.session {
                    session.handle.set_referenced(false);
                }
                core.keepalive.stop();
            }
            self.check_both_refcounts(&mut core)
        };
        self.notify_state_listeners(transition);
    }

    /// Registers an owner.
    pub fn add_ref(&self) {
        let mut core = self.lock_core();
        core.refcount += 1;
        tracing::trace!(
            "{} refcount {} -> {}",
            self.inner.address,
            core.refcount - 1,
            core.refcount
        );
    }

    /// Releases an owner.
    pub fn unref(&self) {
        let transition = {
            let mut core = self.lock_core();
            if core.refcount == 0 {
                tracing::error!("{} unref without a matching add_ref", self.inner.address);
                return;
            }
            core.refcount -= 1;
            tracing::trace!(
                "{} refcount {} -> {}",
                self.inner.address,
                core.refcount + 1,
                core.refcount
            );
            self.check_both_refcounts(&mut core)
        };
        self.notify_state_listeners(transition);
    }

    /// Releases an owner only if it is the sole owner.
    ///
    /// Returns true if the reference was released.
    pub fn unref_if_one_ref(&self) -> bool {
        let transition = {
            let mut core = self.lock_core();
            if core.refcount != 1 {
                return false;
            }
            core.refcount = 0;
            tracing::trace!("{} refcount 1 -> 0", self.inner.address);
            self.check_both_refcounts(&mut core)
        };
        self.notify_state_listeners(transition);
        true
    }

    /// Opens a call stream on the current session and attaches it to `call`.
    ///
    /// `metadata` is sent as request headers, with the user agent, content type and `te`
    /// headers set by the subchannel.
    ///
    /// # Errors
    ///
    /// Returns an error if the subchannel is not `READY`, if the request cannot be built,
    /// or if the session refuses the stream.
    pub fn start_call_stream<C>(
        &self,
        metadata: &HeaderMap,
        call: &mut C,
    ) -> Result<(), SubchannelError>
    where
        C: SubchannelCall<T> + ?Sized,
    {
        let session = {
            let core = self.lock_core();
            if !core.state.is_ready() {
                return Err(SubchannelError::NotReady { state: core.state });
            }
            core.session
                .as_ref()
                .map(|session| session.handle.clone())
                .ok_or(SubchannelError::NoSession)?
        };

        let scheme = if self.inner.credentials.is_secure() {
            http::uri::Scheme::HTTPS
        } else {
            http::uri::Scheme::HTTP
        };
        let request = build_call_request(
            metadata,
            scheme,
            call.host(),
            call.method(),
            &self.inner.user_agent,
        )?;

        tracing::trace!("{} starting call {}", self.inner.address, call.method());
        let stream = session.open_stream(request)?;
        call.attach_stream(stream, self.clone());
        Ok(())
    }

    /// Registers a connectivity state listener. Registering the same `Arc` twice has no
    /// effect.
    pub fn add_connectivity_state_listener(&self, listener: Arc<StateListener<T>>) {
        self.inner
            .state_listeners
            .lock()
            .expect(MUTEX_POISONED)
            .add(listener);
    }

    /// Removes a connectivity state listener, returning false if it was not registered.
    pub fn remove_connectivity_state_listener(&self, listener: &Arc<StateListener<T>>) -> bool {
        self.inner
            .state_listeners
            .lock()
            .expect(MUTEX_POISONED)
            .remove(listener)
    }

    /// Registers a disconnect listener. Registering the same `Arc` twice has no effect.
    pub fn add_disconnect_listener(&self, listener: Arc<DisconnectListener>) {
        self.inner
            .disconnect_listeners
            .lock()
            .expect(MUTEX_POISONED)
            .add(listener);
    }

    /// Removes a disconnect listener, returning false if it was not registered.
    pub fn remove_disconnect_listener(&self, listener: &Arc<DisconnectListener>) -> bool {
        self.inner
            .disconnect_listeners
            .lock()
            .expect(MUTEX_POISONED)
            .remove(listener)
    }

    fn lock_core(&self) -> MutexGuard<'_, SubchannelCore<T::Session>> {
        self.inner.core.lock().expect(MUTEX_POISONED)
    }

    /// Applies a guarded transition and runs the entry actions of `to`.
    fn transition_locked(
        &self,
        core: &mut SubchannelCore<T::Session>,
        from: &[ConnectivityState],
        to: ConnectivityState,
    ) -> Option<Transition> {
        if !from.contains(&core.state) {
            return None;
        }
        if to.is_ready() && core.session.is_none() {
            tracing::debug!("{} cannot enter {to} without a session", self.inner.address);
            return None;
        }

        let previous = core.state;
        core.state = to;
        tracing::debug!("{} {previous} -> {to}", self.inner.address);

        match to {
            ConnectivityState::Idle => {
                core.backoff.stop();
                core.backoff.reset();
                core.close_session();
                core.keepalive.stop();
            }
            ConnectivityState::Connecting => {
                core.backoff.stop();
                core.backoff.run_once();
                self.start_session(core);
                core.backoff_outcome = BackoffOutcome::ReturnToIdle;
            }
            ConnectivityState::Ready => {
                core.backoff.stop();
                if let Some(id) = core.session.as_ref().map(|session| session.id) {
                    if core.ready_sessions.len() == MAX_TRACKED_READY_SESSIONS {
                        let dropped = core.ready_sessions.remove(0);
                        tracing::debug!("{} no longer tracking {dropped}", self.inner.address);
                    }
                    core.ready_sessions.push(id);
                }
            }
            ConnectivityState::TransientFailure => {
                core.close_session();
                core.keepalive.stop();
            }
        }

        Some((previous, to))
    }

    /// Starts a new connection attempt, replacing any existing session.
    fn start_session(&self, core: &mut SubchannelCore<T::Session>) {
        core.last_session_id += 1;
        let session_id = SessionId::new(core.last_session_id);

        let request = ConnectRequest::new(
            &self.inner.address,
            &self.inner.credentials,
            &self.inner.config,
            &self.inner.channel_target,
        );

        let events_tx = self.inner.events_tx.clone();
        let events = SessionEvents::new(
            session_id,
            Arc::new(move |session_id: SessionId, event: SessionEvent| {
                if let Err(e) = events_tx.send(SubchannelEvent::Session { session_id, event }) {
                    tracing::trace!("Session event after subchannel dropped: {e}");
                }
            }),
        );

        tracing::debug!("{} starting {session_id}", self.inner.address);
        let handle = Arc::new(self.inner.transport.connect(request, events));
        handle.set_referenced(false);

        let session = ActiveSession {
            id: session_id,
            handle,
        };
        if let Some(previous) = core.session.replace(session) {
            tracing::trace!("Closing replaced {}", previous.id);
            previous.handle.close();
            core.keepalive.stop();
        }
    }

    fn check_both_refcounts(&self, core: &mut SubchannelCore<T::Session>) -> Option<Transition> {
        if core.call_refcount != 0 || core.refcount != 0 {
            return None;
        }

        self.transition_locked(
            core,
            &[
                ConnectivityState::Connecting,
                ConnectivityState::Idle,
                ConnectivityState::Ready,
            ],
            ConnectivityState::TransientFailure,
        )
    }

    fn notify_state_listeners(&self, transition: Option<Transition>) {
        let Some((previous, new)) = transition else {
            return;
        };

        let listeners = self
            .inner
            .state_listeners
            .lock()
            .expect(MUTEX_POISONED)
            .snapshot();

        for listener in listeners {
            listener(self, previous, new);
        }
    }

    fn notify_disconnect_listeners(&self) {
        let listeners = self
            .inner
            .disconnect_listeners
            .lock()
            .expect(MUTEX_POISONED)
            .snapshot();

        for listener in listeners {
            listener();
        }
    }

    pub(crate) fn handle_event(&self, event: SubchannelEvent) {
        match event {
            SubchannelEvent::Session { session_id, event } => match event {
                SessionEvent::Connected => self.on_session_connected(session_id),
                SessionEvent::Closed => self.on_session_closed(session_id),
                SessionEvent::GoAway { code, debug_data } => {
                    self.on_session_go_away(session_id, code, debug_data.as_deref());
                }
                SessionEvent::Error(e) => {
                    // The paired close event drives the transition
                    tracing::trace!("{} {session_id} error: {e}", self.inner.address);
                }
                SessionEvent::SocketClosed => self.on_socket_closed(session_id),
            },
            SubchannelEvent::BackoffFired { generation } => self.on_backoff_fired(generation),
            SubchannelEvent::KeepaliveTimeout {
                session_id,
                generation,
            } => self.on_keepalive_timeout(session_id, generation),
        }
    }

    fn on_session_connected(&self, session_id: SessionId) {
        let transition = {
            let mut core = self.lock_core();
            if !core.is_current_session(session_id) {
                tracing::trace!("{} ignoring connect of stale {session_id}", self.inner.address);
                return;
            }
            self.transition_locked(
                &mut core,
                &[ConnectivityState::Connecting],
                ConnectivityState::Ready,
            )
        };
        self.notify_state_listeners(transition);
    }

    fn on_session_closed(&self, session_id: SessionId) {
        let transition = {
            let mut core = self.lock_core();
            if !core.is_current_session(session_id) {
                tracing::trace!("{} ignoring close of stale {session_id}", self.inner.address);
                return;
            }
            self.transition_locked(
                &mut core,
                &[ConnectivityState::Connecting],
                ConnectivityState::TransientFailure,
            )
            .or_else(|| {
                self.transition_locked(
                    &mut core,
                    &[ConnectivityState::Ready],
                    ConnectivityState::Idle,
                )
            })
        };
        self.notify_state_listeners(transition);
    }

    fn on_session_go_away(&self, session_id: SessionId, code: u32, debug_data: Option<&[u8]>) {
        let transition = {
            let mut core = self.lock_core();
            if !core.is_current_session(session_id) {
                tracing::trace!("{} ignoring GOAWAY of stale {session_id}", self.inner.address);
                return;
            }

            if is_too_many_pings(code, debug_data) {
                let previous = core.keepalive_time;
                core.keepalive_time = backed_off_keepalive_time(previous);
                tracing::warn!(
                    "{} received GOAWAY for too many pings, keepalive time {}ms -> {}ms",
                    self.inner.address,
                    previous.as_millis(),
                    core.keepalive_time.as_millis()
                );
            } else {
                tracing::debug!("{} received GOAWAY with code {code}", self.inner.address);
            }

            self.transition_locked(
                &mut core,
                &[ConnectivityState::Connecting, ConnectivityState::Ready],
                ConnectivityState::Idle,
            )
        };
        self.notify_state_listeners(transition);
    }

    fn on_socket_closed(&self, session_id: SessionId) {
        let was_ready = {
            let mut core = self.lock_core();
            match core.ready_sessions.iter().position(|id| *id == session_id) {
                Some(index) => {
                    core.ready_sessions.swap_remove(index);
                    true
                }
                None => false,
            }
        };

        if was_ready {
            tracing::debug!("{} disconnected ({session_id})", self.inner.address);
            self.notify_disconnect_listeners();
        }
    }

    fn on_backoff_fired(&self, generation: u64) {
        let transition = {
            let mut core = self.lock_core();
            if !core.backoff.acknowledge_fire(generation) {
                tracing::trace!("{} ignoring stale backoff fire", self.inner.address);
                return;
            }

            let to = match std::mem::take(&mut core.backoff_outcome) {
                BackoffOutcome::ResumeConnecting => ConnectivityState::Connecting,
                BackoffOutcome::ReturnToIdle => ConnectivityState::Idle,
            };
            tracing::debug!("{} backoff fired", self.inner.address);

            self.transition_locked(
                &mut core,
                &[
                    ConnectivityState::TransientFailure,
                    ConnectivityState::Connecting,
                ],
                to,
            )
        };
        self.notify_state_listeners(transition);
    }

    fn on_keepalive_timeout(&self, session_id: SessionId, generation: u64) {
        let transition = {
            let mut core = self.lock_core();
            if !core.keepalive.acknowledge_timeout(generation)
                || !core.is_current_session(session_id)
            {
                tracing::trace!("{} ignoring stale keepalive timeout", self.inner.address);
                return;
            }
            self.transition_locked(
                &mut core,
                &[ConnectivityState::Ready],
                ConnectivityState::Idle,
            )
        };
        self.notify_state_listeners(transition);
    }
}

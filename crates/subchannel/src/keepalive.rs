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

//! Application-level keepalive probing for the active session.
//!
//! While calls are in flight the subchannel pings its session every keepalive interval.
//! A ping not acknowledged within the keepalive timeout is reported through the timeout
//! callback, tagged with the session and the probing generation, so that reports from a
//! stopped or restarted controller can be recognized and ignored.

use std::{fmt::Debug, sync::Arc, time::Duration};

use tokio::{task::JoinHandle, time::MissedTickBehavior};

use crate::{
    runtime::spawn_task,
    transport::{Session, SessionId},
};

/// Upper bound for the keepalive interval, in milliseconds.
pub const KEEPALIVE_MAX_TIME_MS: u64 = 2_147_483_647;

/// Default time to wait for a ping acknowledgement, in milliseconds.
pub const KEEPALIVE_TIMEOUT_MS: u64 = 20_000;

/// HTTP/2 `ENHANCE_YOUR_CALM` error code.
pub const ENHANCE_YOUR_CALM: u32 = 0xb;

/// GOAWAY debug data sent by servers rejecting excessive pings.
pub const TOO_MANY_PINGS: &[u8] = b"too_many_pings";

/// Returns true if a GOAWAY signals excessive-ping rejection.
///
/// When the transport does not surface the GOAWAY debug data (`None`) the error code
/// alone decides.
#[must_use]
pub fn is_too_many_pings(code: u32, debug_data: Option<&[u8]>) -> bool {
    code == ENHANCE_YOUR_CALM && debug_data.is_none_or(|data| data == TOO_MANY_PINGS)
}

/// Doubles `current`, capped at [`KEEPALIVE_MAX_TIME_MS`].
#[must_use]
pub fn backed_off_keepalive_time(current: Duration) -> Duration {
    current
        .saturating_mul(2)
        .min(Duration::from_millis(KEEPALIVE_MAX_TIME_MS))
}

/// Callback invoked with the session and generation when a ping goes unanswered.
pub type KeepaliveTimeoutCallback = Arc<dyn Fn(SessionId, u64) + Send + Sync>;

/// Drives periodic pings on one session at a time.
pub struct KeepaliveController {
    on_timeout: KeepaliveTimeoutCallback,
    generation: u64,
    task: Option<JoinHandle<()>>,
}

impl Debug for KeepaliveController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct(stringify!(KeepaliveController))
            .field("on_timeout", &"<function>")
            .field("generation", &self.generation)
            .field("running", &self.is_running())
            .finish()
    }
}

impl KeepaliveController {
    #[must_use]
    pub fn new(on_timeout: KeepaliveTimeoutCallback) -> Self {
        Self {
            on_timeout,
            generation: 0,
            task: None,
        }
    }

    /// Starts probing `session`, replacing any previous probing.
    ///
    /// The first ping is sent immediately, then one every `interval`.
    pub fn start<S: Session>(
        &mut self,
        session_id: SessionId,
        session: Arc<S>,
        interval: Duration,
        timeout: Duration,
    ) {
        self.stop();

        self.generation += 1;
        let generation = self.generation;
        let on_timeout = self.on_timeout.clone();

        tracing::debug!(
            "Starting keepalive for {session_id} every {}ms",
            interval.as_millis()
        );

        self.task = Some(spawn_task(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                tracing::trace!("Sending keepalive ping on {session_id}");

                match tokio::time::timeout(timeout, session.ping()).await {
                    Ok(Ok(())) => tracing::trace!("Received keepalive ack on {session_id}"),
                    // The session close event is authoritative for failed pings
                    Ok(Err(e)) => tracing::trace!("Keepalive ping on {session_id} failed: {e}"),
                    Err(_) => {
                        tracing::debug!(
                            "Keepalive ping on {session_id} unanswered after {}ms",
                            timeout.as_millis()
                        );
                        on_timeout(session_id, generation);
                        break;
                    }
                }
            }
        }));
    }

    /// Stops probing and discards any outstanding ping.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take()
            && !task.is_finished()
        {
            task.abort();
            tracing::trace!("Keepalive stopped");
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Acknowledges a timeout delivered by the callback.
    ///
    /// Returns true if `generation` belongs to the current probing, which is then
    /// considered stopped.
    pub fn acknowledge_timeout(&mut self, generation: u64) -> bool {
        if generation != self.generation || self.task.is_none() {
            return false;
        }
        self.task = None;
        true
    }
}

impl Drop for KeepaliveController {
    fn drop(&mut self) {
        self.stop();
    }
}

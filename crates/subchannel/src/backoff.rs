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

//! Reconnection backoff for subchannels.
//!
//! [`ExponentialBackoff`] computes successive delays following the gRPC connection backoff
//! scheme: the first delay is exactly the initial delay, each following one is multiplied
//! by a factor and capped at a maximum, with a proportional random jitter applied.
//!
//! [`BackoffTimeout`] is the scoped, single-shot and restartable timer a subchannel keeps
//! for its whole lifetime. It has no knowledge of subchannel state: when it fires it invokes
//! the callback supplied at construction with the generation it was armed under, so the owner
//! can discard fires from a timer that has since been stopped or re-armed.

use std::{fmt::Debug, sync::Arc, time::Duration};

use rand::RngExt;
use tokio::task::JoinHandle;

use crate::runtime::spawn_task;

/// Default delay before the first reconnection attempt.
pub const INITIAL_BACKOFF_MS: u64 = 1_000;
/// Default multiplier applied to the delay after each attempt.
pub const BACKOFF_MULTIPLIER: f64 = 1.6;
/// Default upper bound for the delay.
pub const MAX_BACKOFF_MS: u64 = 120_000;
/// Default proportional jitter applied to each delay after the first.
pub const BACKOFF_JITTER: f64 = 0.2;

const MIN_BACKOFF: Duration = Duration::from_millis(1);

#[derive(Clone, Debug)]
pub struct ExponentialBackoff {
    /// The initial backoff delay.
    delay_initial: Duration,
    /// The maximum delay to cap the backoff.
    delay_max: Duration,
    /// The current base delay (without jitter).
    delay_current: Duration,
    /// The factor to multiply the delay on each iteration.
    multiplier: f64,
    /// The proportional jitter, e.g. 0.2 for +/-20%.
    jitter: f64,
    /// True until the first delay after construction or reset has been handed out.
    first: bool,
}

impl ExponentialBackoff {
    /// Creates a new [`ExponentialBackoff`] instance.
    ///
    /// Parameters are normalized rather than rejected: a zero initial delay becomes 1ms,
    /// a maximum below the initial delay is raised to it, a multiplier that is not finite
    /// or below 1.0 becomes 1.0, and jitter is clamped to [0.0, 1.0].
    #[must_use]
    pub fn new(
        delay_initial: Duration,
        delay_max: Duration,
        multiplier: f64,
        jitter: f64,
    ) -> Self {
        let delay_initial = delay_initial.max(MIN_BACKOFF);
        let delay_max = delay_max.max(delay_initial);
        let multiplier = if multiplier.is_finite() {
            multiplier.max(1.0)
        } else {
            1.0
        };
        let jitter = if jitter.is_nan() {
            0.0
        } else {
            jitter.clamp(0.0, 1.0)
        };

        Self {
            delay_initial,
            delay_max,
            delay_current: delay_initial,
            multiplier,
            jitter,
            first: true,
        }
    }

    /// Returns the next backoff delay and advances the internal state.
    ///
    /// The first call after construction or [`reset`](Self::reset) returns the initial delay
    /// unchanged. Later calls return the grown base delay with jitter applied, never above
    /// the maximum.
    pub fn next_duration(&mut self) -> Duration {
        if self.first {
            self.first = false;
            return self.delay_initial;
        }

        let next_secs = self.delay_current.as_secs_f64() * self.multiplier;
        self.delay_current = Duration::from_secs_f64(next_secs).min(self.delay_max);

        let base_secs = self.delay_current.as_secs_f64();
        let magnitude = base_secs * self.jitter;
        let offset = rand::rng().random_range(-magnitude..=magnitude);

        Duration::from_secs_f64((base_secs + offset).max(0.0)).min(self.delay_max)
    }

    /// Resets the backoff to its initial state.
    pub const fn reset(&mut self) {
        self.delay_current = self.delay_initial;
        self.first = true;
    }

    /// Returns the current base delay without jitter.
    #[must_use]
    pub const fn current_delay(&self) -> Duration {
        self.delay_current
    }

    #[must_use]
    pub const fn initial_delay(&self) -> Duration {
        self.delay_initial
    }

    #[must_use]
    pub const fn max_delay(&self) -> Duration {
        self.delay_max
    }
}

/// Callback invoked when a [`BackoffTimeout`] fires, receiving the arming generation.
pub type BackoffCallback = Arc<dyn Fn(u64) + Send + Sync>;

/// A scoped single-shot timer driven by an [`ExponentialBackoff`].
pub struct BackoffTimeout {
    backoff: ExponentialBackoff,
    callback: BackoffCallback,
    generation: u64,
    task: Option<JoinHandle<()>>,
}

impl Debug for BackoffTimeout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct(stringify!(BackoffTimeout))
            .field("backoff", &self.backoff)
            .field("callback", &"<function>")
            .field("generation", &self.generation)
            .field("running", &self.is_running())
            .finish()
    }
}

impl BackoffTimeout {
    /// Creates a new disarmed [`BackoffTimeout`].
    #[must_use]
    pub fn new(backoff: ExponentialBackoff, callback: BackoffCallback) -> Self {
        Self {
            backoff,
            callback,
            generation: 0,
            task: None,
        }
    }

    /// Arms the timer with the next backoff delay.
    ///
    /// Does nothing if the timer is already armed.
    pub fn run_once(&mut self) {
        if self.is_running() {
            return;
        }

        self.generation += 1;
        let generation = self.generation;
        let delay = self.backoff.next_duration();
        let callback = self.callback.clone();

        tracing::debug!("Backoff armed for {}ms", delay.as_millis());

        self.task = Some(spawn_task(async move {
            tokio::time::sleep(delay).await;
            callback(generation);
        }));
    }

    /// Disarms the timer without resetting the accumulated backoff.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take()
            && !task.is_finished()
        {
            task.abort();
            tracing::trace!("Backoff stopped");
        }
    }

    /// Clears the accumulated backoff back to the initial delay.
    pub const fn reset(&mut self) {
        self.backoff.reset();
    }

    /// Returns true if the timer is armed and has not fired yet.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Acknowledges a fire delivered by the callback.
    ///
    /// Returns true if `generation` belongs to the current arming, in which case the timer
    /// is disarmed. Fires from a stopped or re-armed timer return false.
    pub fn acknowledge_fire(&mut self, generation: u64) -> bool {
        if generation != self.generation || self.task.is_none() {
            return false;
        }
        self.task = None;
        true
    }

    #[must_use]
    pub const fn backoff(&self) -> &ExponentialBackoff {
        &self.backoff
    }
}

impl Drop for BackoffTimeout {
    fn drop(&mut self) {
        self.stop();
    }
}

////////////////////////////////////////////////////////////////////////////////
// Tests
////////////////////////////////////////////////////////////////////////////////
#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use rstest::rstest;

    use super::*;

    fn backoff(initial_ms: u64, max_ms: u64, multiplier: f64, jitter: f64) -> ExponentialBackoff {
        ExponentialBackoff::new(
            Duration::from_millis(initial_ms),
            Duration::from_millis(max_ms),
            multiplier,
            jitter,
        )
    }

    fn recording_timeout(initial_ms: u64) -> (BackoffTimeout, Arc<Mutex<Vec<u64>>>) {
        let fired = Arc::new(Mutex::new(Vec::new()));
        let fired_clone = fired.clone();
        let callback: BackoffCallback = Arc::new(move |generation| {
            fired_clone.lock().unwrap().push(generation);
        });
        let timeout = BackoffTimeout::new(backoff(initial_ms, 10_000, 2.0, 0.0), callback);
        (timeout, fired)
    }

    #[rstest]
    fn test_no_jitter_exponential_growth() {
        let mut backoff = backoff(100, 1_600, 2.0, 0.0);

        assert_eq!(backoff.next_duration(), Duration::from_millis(100));
        assert_eq!(backoff.next_duration(), Duration::from_millis(200));
        assert_eq!(backoff.next_duration(), Duration::from_millis(400));
        assert_eq!(backoff.next_duration(), Duration::from_millis(800));
        assert_eq!(backoff.next_duration(), Duration::from_millis(1_600));
        // Capped
        assert_eq!(backoff.next_duration(), Duration::from_millis(1_600));
    }

    #[rstest]
    fn test_reset_returns_initial_delay() {
        let mut backoff = backoff(100, 1_600, 2.0, 0.0);
        let _ = backoff.next_duration();
        let _ = backoff.next_duration();
        assert_eq!(backoff.current_delay(), Duration::from_millis(200));

        backoff.reset();
        assert_eq!(backoff.current_delay(), Duration::from_millis(100));
        assert_eq!(backoff.next_duration(), Duration::from_millis(100));
    }

    #[rstest]
    fn test_first_delay_has_no_jitter() {
        for _ in 0..20 {
            let mut backoff = backoff(1_000, 120_000, 1.6, 0.2);
            assert_eq!(backoff.next_duration(), Duration::from_millis(1_000));
        }
    }

    #[rstest]
    fn test_jitter_within_bounds() {
        for _ in 0..50 {
            let mut backoff = backoff(1_000, 120_000, 1.6, 0.2);
            let _ = backoff.next_duration();
            let delay = backoff.next_duration();
            // Base is 1600ms, +/-20%
            assert!(delay >= Duration::from_millis(1_280), "{delay:?}");
            assert!(delay <= Duration::from_millis(1_920), "{delay:?}");
        }
    }

    #[rstest]
    fn test_jitter_never_exceeds_max() {
        let mut backoff = backoff(900, 1_000, 2.0, 1.0);
        let _ = backoff.next_duration();
        for _ in 0..50 {
            assert!(backoff.next_duration() <= Duration::from_millis(1_000));
        }
    }

    #[rstest]
    #[case(0, 1_000, 1.6, 0.2, 1, 1_000, 1.6, 0.2)]
    #[case(1_000, 500, 1.6, 0.2, 1_000, 1_000, 1.6, 0.2)]
    #[case(600_000, 120_000, 1.6, 0.2, 600_000, 600_000, 1.6, 0.2)]
    #[case(1_000, 2_000, 0.5, 0.2, 1_000, 2_000, 1.0, 0.2)]
    #[case(1_000, 2_000, f64::NAN, 0.2, 1_000, 2_000, 1.0, 0.2)]
    #[case(1_000, 2_000, 1.6, 1.5, 1_000, 2_000, 1.6, 1.0)]
    #[case(1_000, 2_000, 1.6, -0.1, 1_000, 2_000, 1.6, 0.0)]
    #[case(1_000, 2_000, 1.6, f64::NAN, 1_000, 2_000, 1.6, 0.0)]
    #[allow(clippy::too_many_arguments)]
    fn test_out_of_range_parameters_are_normalized(
        #[case] initial_ms: u64,
        #[case] max_ms: u64,
        #[case] multiplier: f64,
        #[case] jitter: f64,
        #[case] expected_initial_ms: u64,
        #[case] expected_max_ms: u64,
        #[case] expected_multiplier: f64,
        #[case] expected_jitter: f64,
    ) {
        let backoff = backoff(initial_ms, max_ms, multiplier, jitter);

        assert_eq!(
            backoff.initial_delay(),
            Duration::from_millis(expected_initial_ms)
        );
        assert_eq!(backoff.max_delay(), Duration::from_millis(expected_max_ms));
        assert!((backoff.multiplier - expected_multiplier).abs() < f64::EPSILON);
        assert!((backoff.jitter - expected_jitter).abs() < f64::EPSILON);
    }

    #[rstest]
    fn test_initial_above_max_still_delays_initial() {
        let mut backoff = backoff(600_000, 120_000, 1.6, 0.0);

        assert_eq!(backoff.next_duration(), Duration::from_millis(600_000));
        assert_eq!(backoff.next_duration(), Duration::from_millis(600_000));
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn test_timeout_fires_once_after_initial_delay() {
        let (mut timeout, fired) = recording_timeout(100);

        timeout.run_once();
        assert!(timeout.is_running());

        tokio::time::sleep(Duration::from_millis(99)).await;
        assert!(fired.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(*fired.lock().unwrap(), vec![1]);
        assert!(!timeout.is_running());
        assert!(timeout.acknowledge_fire(1));
        assert!(!timeout.acknowledge_fire(1));
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn test_run_once_while_armed_is_noop() {
        let (mut timeout, fired) = recording_timeout(100);

        timeout.run_once();
        timeout.run_once();
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(*fired.lock().unwrap(), vec![1]);
        // The second call did not consume a backoff step
        assert_eq!(timeout.backoff().current_delay(), Duration::from_millis(100));
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn test_stop_prevents_fire_and_keeps_backoff() {
        let (mut timeout, fired) = recording_timeout(100);

        timeout.run_once();
        timeout.stop();
        assert!(!timeout.is_running());

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(fired.lock().unwrap().is_empty());
        assert!(!timeout.acknowledge_fire(1));

        // Accumulated backoff survives a stop
        timeout.run_once();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(fired.lock().unwrap().is_empty());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(*fired.lock().unwrap(), vec![2]);
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn test_reset_restores_initial_interval() {
        let (mut timeout, fired) = recording_timeout(100);

        timeout.run_once();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(timeout.acknowledge_fire(1));

        timeout.reset();
        timeout.run_once();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(*fired.lock().unwrap(), vec![1, 2]);
    }
}

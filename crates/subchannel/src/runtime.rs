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

//! Task spawning for subchannel timers, keepalive probes and transport sessions.
//!
//! Subchannel operations are synchronous and may be invoked from outside an async
//! context. Background work is spawned on the ambient Tokio runtime when there is one,
//! otherwise on a lazily created shared runtime.

use std::{future::Future, sync::OnceLock};

use tokio::{runtime::Runtime, task::JoinHandle};

static RUNTIME: OnceLock<Runtime> = OnceLock::new();

/// Retrieves a reference to the shared fallback Tokio runtime.
///
/// # Panics
///
/// Panics if the runtime could not be created, which typically indicates
/// an inability to spawn threads or allocate necessary resources.
pub fn get_runtime() -> &'static Runtime {
    RUNTIME.get_or_init(|| Runtime::new().expect("Failed to create tokio runtime"))
}

/// Spawns `future` on the current Tokio runtime, falling back to [`get_runtime`].
pub fn spawn_task<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => handle.spawn(future),
        Err(_) => get_runtime().spawn(future),
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn test_spawn_outside_runtime_uses_fallback() {
        let handle = spawn_task(async { 7 });
        let value = get_runtime().block_on(handle).unwrap();
        assert_eq!(value, 7);
    }

    #[rstest]
    #[tokio::test]
    async fn test_spawn_inside_runtime() {
        let value = spawn_task(async { 11 }).await.unwrap();
        assert_eq!(value, 11);
    }
}

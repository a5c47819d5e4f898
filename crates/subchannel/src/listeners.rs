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

//! Registries for connectivity state and disconnect listeners.
//!
//! Listeners are identified by their `Arc` allocation: registering the same `Arc` twice
//! has no effect and removal matches by pointer. Notification always iterates a snapshot,
//! so listeners may register or remove listeners (including themselves) while being
//! notified.

use std::{fmt::Debug, sync::Arc};

/// An ordered set of listeners identified by allocation.
pub struct ListenerRegistry<L: ?Sized> {
    listeners: Vec<Arc<L>>,
}

impl<L: ?Sized> Default for ListenerRegistry<L> {
    fn default() -> Self {
        Self {
            listeners: Vec::new(),
        }
    }
}

impl<L: ?Sized> Debug for ListenerRegistry<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct(stringify!(ListenerRegistry))
            .field("len", &self.listeners.len())
            .finish()
    }
}

impl<L: ?Sized> ListenerRegistry<L> {
    /// Registers `listener`, returning false if it was already registered.
    pub fn add(&mut self, listener: Arc<L>) -> bool {
        if self.contains(&listener) {
            return false;
        }
        self.listeners.push(listener);
        true
    }

    /// Removes `listener`, returning false if it was not registered.
    pub fn remove(&mut self, listener: &Arc<L>) -> bool {
        let len_before = self.listeners.len();
        self.listeners.retain(|l| !Arc::ptr_eq(l, listener));
        self.listeners.len() != len_before
    }

    #[must_use]
    pub fn contains(&self, listener: &Arc<L>) -> bool {
        self.listeners.iter().any(|l| Arc::ptr_eq(l, listener))
    }

    /// Returns the registered listeners in registration order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<L>> {
        self.listeners.clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Tests
////////////////////////////////////////////////////////////////////////////////
#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use rstest::rstest;

    use super::*;

    type Listener = dyn Fn() + Send + Sync;

    #[rstest]
    fn test_add_deduplicates_by_allocation() {
        let mut registry = ListenerRegistry::<Listener>::default();
        let listener: Arc<Listener> = Arc::new(|| {});
        let lookalike: Arc<Listener> = Arc::new(|| {});

        assert!(registry.add(listener.clone()));
        assert!(!registry.add(listener.clone()));
        assert!(registry.add(lookalike));
        assert_eq!(registry.len(), 2);
    }

    #[rstest]
    fn test_remove() {
        let mut registry = ListenerRegistry::<Listener>::default();
        let listener: Arc<Listener> = Arc::new(|| {});

        assert!(!registry.remove(&listener));
        registry.add(listener.clone());
        assert!(registry.remove(&listener));
        assert!(registry.is_empty());
        assert!(!registry.contains(&listener));
    }

    #[rstest]
    fn test_snapshot_is_unaffected_by_later_changes() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = ListenerRegistry::<Listener>::default();
        let calls_clone = calls.clone();
        let counting: Arc<Listener> = Arc::new(move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });
        registry.add(counting.clone());

        let snapshot = registry.snapshot();
        registry.remove(&counting);

        for listener in snapshot {
            listener();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }
}

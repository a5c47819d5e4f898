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

//! Connection lifecycle management for a single gRPC backend endpoint.
//!
//! The `nautilus-subchannel` crate owns the transport-level session to one backend address
//! and drives it through the gRPC connectivity state machine:
//!
//! - Guarded state transitions with stale-event protection (session identity tokens).
//! - Reconnection arbitration through a scoped exponential backoff timer.
//! - Application-level keepalive pings while calls are in flight.
//! - Independent call and owner reference counts with shutdown-on-idle.
//! - State-change and disconnect listener fan-out.
//! - An HTTP/2 transport built on `h2`, with optional TLS via `rustls`.
//!
//! # Feature flags
//!
//! - `stubs`: Exposes the mock transport and test helpers in [`testing`].

#![deny(unsafe_code)]
#![deny(nonstandard_style)]
#![deny(missing_debug_implementations)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod authority;
pub mod backoff;
pub mod call;
pub mod config;
pub mod credentials;
pub mod error;
pub mod keepalive;
pub mod listeners;
pub mod runtime;
pub mod state;
pub mod subchannel;
pub mod transport;

#[cfg(any(test, feature = "stubs"))]
pub mod testing;

/// Message used when a mutex guarding subchannel state is found poisoned.
pub const MUTEX_POISONED: &str = "Mutex poisoned";

// Re-exports
pub use crate::{
    call::SubchannelCall,
    config::SubchannelConfig,
    credentials::ChannelCredentials,
    error::SubchannelError,
    state::ConnectivityState,
    subchannel::Subchannel,
    transport::{Session, Transport, h2::H2Transport},
};

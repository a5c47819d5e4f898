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

//! Error types for subchannel operations.
//!
//! Network failures are never reported through these types: they surface as connectivity
//! state transitions and disconnect notifications. Errors here indicate a caller contract
//! violation or a request that could not be handed to the transport.

use thiserror::Error;

use crate::{state::ConnectivityState, transport::TransportError};

/// Errors returned by [`Subchannel`](crate::Subchannel) operations.
#[derive(Debug, Error)]
pub enum SubchannelError {
    /// A call stream was requested while the subchannel was not `READY`.
    #[error("Cannot start call stream while subchannel is {state}")]
    NotReady { state: ConnectivityState },
    /// The subchannel is `READY` but holds no session.
    #[error("Subchannel has no session")]
    NoSession,
    /// The call request could not be built.
    #[error("Invalid call request: {0}")]
    InvalidRequest(#[from] http::Error),
    /// A required header value could not be encoded.
    #[error("Invalid header value: {0}")]
    InvalidHeader(#[from] http::header::InvalidHeaderValue),
    /// The transport refused to open a stream.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

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

//! Connectivity states shared by subchannels and their observers.

use strum::{AsRefStr, Display, EnumIter, EnumString};

/// Connectivity state of a subchannel.
///
/// A subchannel starts in `Idle`. Requesting a connection moves it to `Connecting`;
/// a successful transport handshake moves it to `Ready`. Failed attempts land in
/// `TransientFailure` until the backoff timer decides whether to retry or go idle.
///
/// There is no terminal state: once both reference counts drop to zero the subchannel
/// is forced into `TransientFailure` and abandoned by its owners.
#[derive(
    Clone, Copy, Debug, Default, Display, Hash, PartialEq, Eq, AsRefStr, EnumIter, EnumString,
)]
#[repr(u8)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectivityState {
    /// No session exists and no connection attempt is in progress.
    #[default]
    Idle = 0,
    /// A session is being established.
    Connecting = 1,
    /// A session is established and can carry calls.
    Ready = 2,
    /// The last attempt failed, or the subchannel has been abandoned.
    TransientFailure = 3,
}

impl ConnectivityState {
    /// Converts a `u8` to a [`ConnectivityState`].
    ///
    /// # Panics
    ///
    /// Panics if `value` does not name a state.
    #[inline]
    #[must_use]
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Connecting,
            2 => Self::Ready,
            3 => Self::TransientFailure,
            _ => panic!("Invalid `ConnectivityState` value: {value}"),
        }
    }

    #[inline]
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Returns true if a live session handle is expected in this state.
    #[inline]
    #[must_use]
    pub const fn has_session(&self) -> bool {
        matches!(self, Self::Connecting | Self::Ready)
    }

    #[inline]
    #[must_use]
    pub const fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    #[inline]
    #[must_use]
    pub const fn is_connecting(&self) -> bool {
        matches!(self, Self::Connecting)
    }

    #[inline]
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    #[inline]
    #[must_use]
    pub const fn is_transient_failure(&self) -> bool {
        matches!(self, Self::TransientFailure)
    }
}

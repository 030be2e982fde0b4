// -------------------------------------------------------------------------------------------------
//  Copyright (C) 2015-2026 Nautech Systems Pty Ltd. All rights reserved.
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

//! Enumerations for the event service.

use strum::Display;

/// How a subscription holds its target.
///
/// A weak reference does not extend the target's lifetime: once the last
/// strong reference elsewhere is dropped, the subscription goes stale and is
/// scrubbed on the next publish touching its key or by the reaper sweep.
#[derive(Copy, Clone, Debug, Display, PartialEq, Eq, Hash)]
pub enum ReferenceStrength {
    Strong,
    Weak,
}

/// Whether an event class descriptor is concrete or an interface.
///
/// Interface descriptors may key subscriptions and cache-size configuration,
/// but never describe a published event instance.
#[derive(Copy, Clone, Debug, Display, PartialEq, Eq, Hash)]
pub enum ClassKind {
    Concrete,
    Interface,
}

/// Phase markers carried by [`CleanupEvent`](crate::events::CleanupEvent).
#[derive(Copy, Clone, Debug, Display, PartialEq, Eq, Hash)]
pub enum CleanupPhase {
    /// A sweep cycle is about to inspect the stale-reference count.
    Starting,
    /// The count was at or below the stop threshold; the sweep timer cancelled itself.
    CancelledUnderThreshold,
    /// The sweep is walking the subscriber indices.
    Begun,
    /// The sweep completed; the event carries the number of cells removed.
    Finished,
}

/// Which callback kind a timing measurement covers.
#[derive(Copy, Clone, Debug, Display, PartialEq, Eq, Hash)]
pub enum TimingSource {
    Vetoer,
    Subscriber,
}

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

//! In-process publish/subscribe event service.
//!
//! Components exchange notifications without direct references, keyed four
//! ways:
//!
//! - **Event class**: hierarchical (the key class or any descendant) or exact.
//! - **Generic type**: parameterized type expressions with wildcard bounds.
//! - **Topic**: exact string names.
//! - **Topic pattern**: regexes with full-match semantics.
//!
//! # Architecture
//!
//! Publication is a two-phase veto → deliver pipeline over immutable
//! snapshots: the index lock is held only while snapshotting, so subscribers
//! may freely mutate subscriptions or publish re-entrantly from inside a
//! callback. Vetoers cancel a publication before anything is cached or
//! delivered; panicking callbacks are quarantined through an overridable
//! exception sink and never abort the pipeline.
//!
//! Subscriptions hold their target strongly, weakly, or through a proxy.
//! Weakly-held targets are scrubbed opportunistically during publish-time
//! walks and by a lazily-started background reaper once enough weak cells
//! are resident.
//!
//! Per-key bounded recency caches retain the newest events and payloads,
//! with cap resolution aware of class inheritance and topic patterns. An
//! optional timing monitor measures every callback and publishes a
//! [`events::SubscriberTimingEvent`] when one runs long.

mod cache;
mod index;
mod monitor;
mod reaper;

pub mod cell;
pub mod enums;
pub mod error;
pub mod events;
pub mod matching;
pub mod registry;
pub mod service;
pub mod stubs;
pub mod subscriber;

pub use enums::{ClassKind, CleanupPhase, ReferenceStrength, TimingSource};
pub use error::{ExceptionSink, LogExceptionSink, ServiceError, SubscriberThrew};
pub use events::{
    CleanupEvent, Event, EventClass, GenericType, Payload, SubscriberTimingEvent, TypeArg,
};
pub use matching::PatternKey;
pub use registry::{DEFAULT_SERVICE_NAME, ServiceRegistry, default_service, service_registry};
pub use service::{EventService, EventServiceConfig};
pub use subscriber::{
    CallbackSubscriber, CallbackTopicSubscriber, CallbackTopicVetoer, CallbackVetoer,
    EventSubscriber, EventVetoer, TopicSubscriber, TopicVetoer, TypedSubscriber, payload_as,
};

pub use cell::{ProxyControl, SubscriberCell};

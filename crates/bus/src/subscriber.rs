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

//! Subscriber and vetoer capability traits with callback adapters.
//!
//! Class-based and topic-based delivery are separate capabilities stored in
//! separate indices; a single object may implement both and subscribe under
//! several keys. Closure adapters cover the common case where implementing a
//! trait is overkill, and [`TypedSubscriber`] adds compile-time-typed handling
//! on top of the dynamically-classed event stream by downcasting.

use std::{any::Any, marker::PhantomData, sync::Arc};

use ustr::Ustr;

use crate::events::{Event, Payload};

/// Receives events published under a matching class key.
pub trait EventSubscriber: Send + Sync + 'static {
    /// Handles one published event. Clone the `Arc` to retain it.
    fn on_event(&self, event: &Arc<dyn Event>);
}

/// Consulted before class-based delivery; returning `true` cancels the
/// publication (no cache write, no delivery).
pub trait EventVetoer: Send + Sync + 'static {
    /// Returns whether the publication should be vetoed.
    fn should_veto(&self, event: &Arc<dyn Event>) -> bool;
}

/// Receives payloads published under a matching topic or pattern key.
pub trait TopicSubscriber: Send + Sync + 'static {
    /// Handles one published payload.
    fn on_topic(&self, topic: Ustr, payload: &Payload);
}

/// Consulted before topic-based delivery; returning `true` cancels the
/// publication.
pub trait TopicVetoer: Send + Sync + 'static {
    /// Returns whether the publication should be vetoed.
    fn should_veto(&self, topic: Ustr, payload: &Payload) -> bool;
}

/// Event subscriber backed by a closure.
pub struct CallbackSubscriber<F>
where
    F: Fn(&Arc<dyn Event>) + Send + Sync + 'static,
{
    callback: F,
}

impl<F> CallbackSubscriber<F>
where
    F: Fn(&Arc<dyn Event>) + Send + Sync + 'static,
{
    /// Creates a new callback subscriber.
    pub const fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> EventSubscriber for CallbackSubscriber<F>
where
    F: Fn(&Arc<dyn Event>) + Send + Sync + 'static,
{
    fn on_event(&self, event: &Arc<dyn Event>) {
        (self.callback)(event);
    }
}

/// Event subscriber that downcasts to a concrete event type `E` before
/// calling the closure.
///
/// The closure is only invoked when the downcast succeeds; a mismatch is
/// logged as an error. Use this with hierarchical subscriptions only when
/// every event published under the key is the same Rust type.
pub struct TypedSubscriber<E, F>
where
    E: Event,
    F: Fn(&E) + Send + Sync + 'static,
{
    callback: F,
    _marker: PhantomData<fn(&E)>,
}

impl<E, F> TypedSubscriber<E, F>
where
    E: Event,
    F: Fn(&E) + Send + Sync + 'static,
{
    /// Creates a new typed subscriber.
    pub const fn new(callback: F) -> Self {
        Self {
            callback,
            _marker: PhantomData,
        }
    }
}

impl<E, F> EventSubscriber for TypedSubscriber<E, F>
where
    E: Event,
    F: Fn(&E) + Send + Sync + 'static,
{
    fn on_event(&self, event: &Arc<dyn Event>) {
        if let Some(typed) = event.as_any().downcast_ref::<E>() {
            (self.callback)(typed);
        } else {
            log::error!(
                "TypedSubscriber downcast failed: expected {}, got event class `{}`",
                std::any::type_name::<E>(),
                event.event_class().name(),
            );
        }
    }
}

/// Event vetoer backed by a closure.
pub struct CallbackVetoer<F>
where
    F: Fn(&Arc<dyn Event>) -> bool + Send + Sync + 'static,
{
    callback: F,
}

impl<F> CallbackVetoer<F>
where
    F: Fn(&Arc<dyn Event>) -> bool + Send + Sync + 'static,
{
    /// Creates a new callback vetoer.
    pub const fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> EventVetoer for CallbackVetoer<F>
where
    F: Fn(&Arc<dyn Event>) -> bool + Send + Sync + 'static,
{
    fn should_veto(&self, event: &Arc<dyn Event>) -> bool {
        (self.callback)(event)
    }
}

/// Topic subscriber backed by a closure.
pub struct CallbackTopicSubscriber<F>
where
    F: Fn(Ustr, &Payload) + Send + Sync + 'static,
{
    callback: F,
}

impl<F> CallbackTopicSubscriber<F>
where
    F: Fn(Ustr, &Payload) + Send + Sync + 'static,
{
    /// Creates a new callback topic subscriber.
    pub const fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> TopicSubscriber for CallbackTopicSubscriber<F>
where
    F: Fn(Ustr, &Payload) + Send + Sync + 'static,
{
    fn on_topic(&self, topic: Ustr, payload: &Payload) {
        (self.callback)(topic, payload);
    }
}

/// Topic vetoer backed by a closure.
pub struct CallbackTopicVetoer<F>
where
    F: Fn(Ustr, &Payload) -> bool + Send + Sync + 'static,
{
    callback: F,
}

impl<F> CallbackTopicVetoer<F>
where
    F: Fn(Ustr, &Payload) -> bool + Send + Sync + 'static,
{
    /// Creates a new callback topic vetoer.
    pub const fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> TopicVetoer for CallbackTopicVetoer<F>
where
    F: Fn(Ustr, &Payload) -> bool + Send + Sync + 'static,
{
    fn should_veto(&self, topic: Ustr, payload: &Payload) -> bool {
        (self.callback)(topic, payload)
    }
}

/// Downcasts a topic payload to a concrete type.
///
/// Convenience for topic subscribers that expect a single payload type.
#[must_use]
pub fn payload_as<T: Any>(payload: &Payload) -> Option<&T> {
    let any: &(dyn Any + Send + Sync) = payload.as_ref();
    any.downcast_ref::<T>()
}

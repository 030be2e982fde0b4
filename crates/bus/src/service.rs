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

//! The event service: subscription management and the publish pipeline.
//!
//! # Locking
//!
//! Two independent mutexes: the index lock over the nine subscription maps
//! and the reaper counter, and the cache lock over the cap tables and recency
//! buffers. Neither lock is ever held while subscriber, vetoer, or sink code
//! runs. A publication takes the index lock once to compute its vetoer and
//! subscriber snapshots, then drops it; delivery iterates the private
//! snapshots. This admits one documented race: a subscriber unsubscribed
//! between snapshot and invocation still receives that one in-flight event.
//!
//! # Pipeline
//!
//! Validate, snapshot, then three phases: vetoers in order (any `true`
//! cancels the publication before anything is cached or delivered), cache
//! insert, delivery in order. A panicking vetoer does not veto and a
//! panicking subscriber does not stop delivery; both are captured and routed
//! through the exception sink. Wall-clock timing wraps every callback when a
//! threshold is configured.
//!
//! # Reentrancy
//!
//! Subscribers may freely subscribe, unsubscribe, or publish from inside a
//! callback. In-flight publications iterate their own snapshots, so such
//! mutations only affect publications that start afterwards.

use std::{
    any::Any,
    backtrace::Backtrace,
    fmt::Debug,
    panic::{AssertUnwindSafe, catch_unwind},
    ptr,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use courier_core::{
    correctness::{check_predicate_true, check_valid_string},
    unix_millis,
};
use ustr::Ustr;
use uuid::Uuid;

use crate::{
    cache::EventCache,
    cell::{ProxyControl, SubscriberCell, data_addr},
    enums::{CleanupPhase, ReferenceStrength, TimingSource},
    error::{ExceptionSink, LogExceptionSink, ServiceError, SubscriberThrew},
    events::{
        CleanupEvent, Event, EventClass, GenericType, Payload, SUBSCRIBER_TIMING_EVENT,
    },
    index::{Snapshot, SubscriberIndex},
    matching::PatternKey,
    monitor::{TimingLogSubscriber, TimingMonitor},
    reaper::{Reaper, ReaperConfig},
    subscriber::{EventSubscriber, EventVetoer, TopicSubscriber, TopicVetoer},
};

/// Configuration for an [`EventService`] instance.
#[derive(Clone, Debug)]
pub struct EventServiceConfig {
    /// The name for the service instance.
    pub name: Option<String>,
    /// Wall-clock threshold above which subscriber and vetoer calls publish a
    /// timing event. `None` disables the timing monitor.
    pub timing_threshold: Option<Duration>,
    /// Whether to self-subscribe a logger for timing events. Requires a
    /// timing threshold.
    pub subscribe_timing_logger: bool,
    /// Default recency-cache cap for keys without a configured cap.
    pub default_cache_size: usize,
    /// Weak/proxy cell count at which the reaper sweep starts.
    pub cleanup_start_threshold: Option<usize>,
    /// Weak/proxy cell count at or below which a running sweep cancels itself.
    pub cleanup_stop_threshold: Option<usize>,
    /// Sweep tick period.
    pub cleanup_period: Option<Duration>,
}

impl Default for EventServiceConfig {
    /// Creates a new default [`EventServiceConfig`]: no timing monitor, no
    /// caching, no reaper sweep.
    fn default() -> Self {
        Self {
            name: None,
            timing_threshold: None,
            subscribe_timing_logger: false,
            default_cache_size: 0,
            cleanup_start_threshold: None,
            cleanup_stop_threshold: None,
            cleanup_period: None,
        }
    }
}

/// In-process publish/subscribe event service.
///
/// Components exchange notifications by event class, generic type, topic
/// name, or topic pattern without direct references. See the module docs for
/// the locking and pipeline design.
pub struct EventService {
    name: String,
    instance_id: Uuid,
    index: Mutex<SubscriberIndex>,
    cache: Mutex<EventCache>,
    monitor: Option<TimingMonitor>,
    exception_sink: Arc<dyn ExceptionSink>,
    reaper: Reaper,
}

impl Debug for EventService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct(stringify!(EventService))
            .field("name", &self.name)
            .field("instance_id", &self.instance_id)
            .finish()
    }
}

fn listener_desc<S: ?Sized>(target: &Arc<S>) -> String {
    format!("{:p}", Arc::as_ptr(target))
}

impl EventService {
    /// Creates a new service with the default exception sink (logs at warn).
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the timing logger is requested without a
    /// timing threshold.
    pub fn new(config: EventServiceConfig) -> Result<Arc<Self>, ServiceError> {
        Self::with_sink(config, Arc::new(LogExceptionSink))
    }

    /// Creates a new service routing subscriber panics to the given sink.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the timing logger is requested without a
    /// timing threshold.
    pub fn with_sink(
        config: EventServiceConfig,
        sink: Arc<dyn ExceptionSink>,
    ) -> Result<Arc<Self>, ServiceError> {
        check_predicate_true(
            !(config.subscribe_timing_logger && config.timing_threshold.is_none()),
            "`subscribe_timing_logger` requires a `timing_threshold`",
        )
        .map_err(ServiceError::invalid)?;

        let reaper_config = ReaperConfig {
            start_threshold: config.cleanup_start_threshold,
            stop_threshold: config.cleanup_stop_threshold,
            period: config.cleanup_period,
        };

        let service = Arc::new_cyclic(|weak| Self {
            name: config
                .name
                .unwrap_or_else(|| stringify!(EventService).to_owned()),
            instance_id: Uuid::new_v4(),
            index: Mutex::new(SubscriberIndex::default()),
            cache: Mutex::new(EventCache::new(config.default_cache_size)),
            monitor: config.timing_threshold.map(TimingMonitor::new),
            exception_sink: sink,
            reaper: Reaper::new(weak.clone(), reaper_config),
        });

        if config.subscribe_timing_logger {
            service.subscribe(
                &SUBSCRIBER_TIMING_EVENT,
                Arc::new(TimingLogSubscriber),
                ReferenceStrength::Strong,
            )?;
        }

        Ok(service)
    }

    /// Returns the service name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the unique instance ID.
    #[must_use]
    pub const fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    fn index_guard(&self) -> MutexGuard<'_, SubscriberIndex> {
        self.index.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cache_guard(&self) -> MutexGuard<'_, EventCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn make_cell<S: ?Sized>(subscriber: Arc<S>, strength: ReferenceStrength) -> SubscriberCell<S> {
        match strength {
            ReferenceStrength::Strong => SubscriberCell::strong(subscriber),
            ReferenceStrength::Weak => SubscriberCell::weak(&subscriber),
        }
    }

    fn check_proxy_strength(strength: ReferenceStrength) -> Result<(), ServiceError> {
        check_predicate_true(
            strength == ReferenceStrength::Strong,
            "proxy subscriptions must be held strongly; the proxy itself is the weak holder",
        )
        .map_err(ServiceError::invalid)
    }

    fn valid_topic<T: AsRef<str>>(topic: T) -> Result<Ustr, ServiceError> {
        check_valid_string(topic.as_ref(), stringify!(topic)).map_err(ServiceError::invalid)?;
        Ok(Ustr::from(topic.as_ref()))
    }

    fn valid_pattern<T: AsRef<str>>(pattern: T) -> Result<PatternKey, ServiceError> {
        let pattern = pattern.as_ref();
        check_valid_string(pattern, stringify!(pattern)).map_err(ServiceError::invalid)?;
        PatternKey::new(pattern).map_err(|e| {
            ServiceError::InvalidArgument(format!("invalid topic pattern `{pattern}`: {e}"))
        })
    }

    /// Tracks an index mutation that inserted a weakish cell, starting the
    /// reaper sweep once the count crosses the start threshold.
    fn track_weakish(&self, weakish: bool, count: usize) {
        if weakish {
            self.reaper.maybe_start(count);
        }
    }

    // -- Subscribe ---------------------------------------------------------

    /// Subscribes to events whose class is `class` or a descendant of it.
    ///
    /// Returns `true` when the subscriber was newly added; a duplicate
    /// subscribe returns `false` and relocates the subscriber to the tail of
    /// the key's delivery order.
    ///
    /// # Errors
    ///
    /// Currently infallible for non-proxy subscribers; the `Result` shape
    /// matches the other subscribe operations.
    pub fn subscribe(
        &self,
        class: &'static EventClass,
        subscriber: Arc<dyn EventSubscriber>,
        strength: ReferenceStrength,
    ) -> Result<bool, ServiceError> {
        log::debug!(
            "Subscribing {} to class `{}` ({strength})",
            listener_desc(&subscriber),
            class.name(),
        );
        let cell = Self::make_cell(subscriber, strength);
        let weakish = cell.is_weakish();
        let mut index = self.index_guard();
        let added = index.subscribe_class(class, cell);
        let count = index.weak_or_proxy_count();
        drop(index);
        self.track_weakish(weakish, count);
        Ok(added)
    }

    /// Subscribes to events of exactly `class`, descendants excluded.
    ///
    /// # Errors
    ///
    /// Currently infallible for non-proxy subscribers.
    pub fn subscribe_exactly(
        &self,
        class: &'static EventClass,
        subscriber: Arc<dyn EventSubscriber>,
        strength: ReferenceStrength,
    ) -> Result<bool, ServiceError> {
        log::debug!(
            "Subscribing {} to exact class `{}` ({strength})",
            listener_desc(&subscriber),
            class.name(),
        );
        let cell = Self::make_cell(subscriber, strength);
        let weakish = cell.is_weakish();
        let mut index = self.index_guard();
        let added = index.subscribe_class_exact(class, cell);
        let count = index.weak_or_proxy_count();
        drop(index);
        self.track_weakish(weakish, count);
        Ok(added)
    }

    /// Subscribes to publications whose generic type matches `ty`.
    ///
    /// Wildcard arguments in `ty` match published arguments within their
    /// bounds.
    ///
    /// # Errors
    ///
    /// Currently infallible for non-proxy subscribers.
    pub fn subscribe_to_type(
        &self,
        ty: GenericType,
        subscriber: Arc<dyn EventSubscriber>,
        strength: ReferenceStrength,
    ) -> Result<bool, ServiceError> {
        log::debug!(
            "Subscribing {} to type `{ty}` ({strength})",
            listener_desc(&subscriber),
        );
        let cell = Self::make_cell(subscriber, strength);
        let weakish = cell.is_weakish();
        let mut index = self.index_guard();
        let added = index.subscribe_type(ty, cell);
        let count = index.weak_or_proxy_count();
        drop(index);
        self.track_weakish(weakish, count);
        Ok(added)
    }

    /// Subscribes to payloads published under exactly `topic`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the topic is empty or all whitespace.
    pub fn subscribe_topic<T: AsRef<str>>(
        &self,
        topic: T,
        subscriber: Arc<dyn TopicSubscriber>,
        strength: ReferenceStrength,
    ) -> Result<bool, ServiceError> {
        let topic = Self::valid_topic(topic)?;
        log::debug!(
            "Subscribing {} to topic `{topic}` ({strength})",
            listener_desc(&subscriber),
        );
        let cell = Self::make_cell(subscriber, strength);
        let weakish = cell.is_weakish();
        let mut index = self.index_guard();
        let added = index.subscribe_topic(topic, cell);
        let count = index.weak_or_proxy_count();
        drop(index);
        self.track_weakish(weakish, count);
        Ok(added)
    }

    /// Subscribes to payloads published under any topic the regex `pattern`
    /// fully matches.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the pattern is blank or not a valid regex.
    pub fn subscribe_pattern<T: AsRef<str>>(
        &self,
        pattern: T,
        subscriber: Arc<dyn TopicSubscriber>,
        strength: ReferenceStrength,
    ) -> Result<bool, ServiceError> {
        let pattern = Self::valid_pattern(pattern)?;
        log::debug!(
            "Subscribing {} to pattern `{pattern}` ({strength})",
            listener_desc(&subscriber),
        );
        let cell = Self::make_cell(subscriber, strength);
        let weakish = cell.is_weakish();
        let mut index = self.index_guard();
        let added = index.subscribe_pattern(pattern, cell);
        let count = index.weak_or_proxy_count();
        drop(index);
        self.track_weakish(weakish, count);
        Ok(added)
    }

    // -- Subscribe proxies -------------------------------------------------

    /// Subscribes a proxy to events whose class is `class` or a descendant.
    ///
    /// The proxy cell is always held strongly; the proxy itself tracks the
    /// real target, and a weakly-tracking proxy counts toward the reaper.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for `ReferenceStrength::Weak`.
    pub fn subscribe_proxy<P>(
        &self,
        class: &'static EventClass,
        proxy: Arc<P>,
        strength: ReferenceStrength,
    ) -> Result<bool, ServiceError>
    where
        P: EventSubscriber + ProxyControl,
    {
        Self::check_proxy_strength(strength)?;
        let control: Arc<dyn ProxyControl> = proxy.clone();
        let subscriber: Arc<dyn EventSubscriber> = proxy;
        log::debug!(
            "Subscribing proxy {} to class `{}`",
            listener_desc(&subscriber),
            class.name(),
        );
        let cell = SubscriberCell::proxy(subscriber, control);
        let weakish = cell.is_weakish();
        let mut index = self.index_guard();
        let added = index.subscribe_class(class, cell);
        let count = index.weak_or_proxy_count();
        drop(index);
        self.track_weakish(weakish, count);
        Ok(added)
    }

    /// Subscribes a proxy to events of exactly `class`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for `ReferenceStrength::Weak`.
    pub fn subscribe_exactly_proxy<P>(
        &self,
        class: &'static EventClass,
        proxy: Arc<P>,
        strength: ReferenceStrength,
    ) -> Result<bool, ServiceError>
    where
        P: EventSubscriber + ProxyControl,
    {
        Self::check_proxy_strength(strength)?;
        let control: Arc<dyn ProxyControl> = proxy.clone();
        let subscriber: Arc<dyn EventSubscriber> = proxy;
        let cell = SubscriberCell::proxy(subscriber, control);
        let weakish = cell.is_weakish();
        let mut index = self.index_guard();
        let added = index.subscribe_class_exact(class, cell);
        let count = index.weak_or_proxy_count();
        drop(index);
        self.track_weakish(weakish, count);
        Ok(added)
    }

    /// Subscribes a proxy to publications matching the generic type `ty`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for `ReferenceStrength::Weak`.
    pub fn subscribe_to_type_proxy<P>(
        &self,
        ty: GenericType,
        proxy: Arc<P>,
        strength: ReferenceStrength,
    ) -> Result<bool, ServiceError>
    where
        P: EventSubscriber + ProxyControl,
    {
        Self::check_proxy_strength(strength)?;
        let control: Arc<dyn ProxyControl> = proxy.clone();
        let subscriber: Arc<dyn EventSubscriber> = proxy;
        let cell = SubscriberCell::proxy(subscriber, control);
        let weakish = cell.is_weakish();
        let mut index = self.index_guard();
        let added = index.subscribe_type(ty, cell);
        let count = index.weak_or_proxy_count();
        drop(index);
        self.track_weakish(weakish, count);
        Ok(added)
    }

    /// Subscribes a proxy to payloads published under exactly `topic`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a blank topic or `ReferenceStrength::Weak`.
    pub fn subscribe_topic_proxy<P>(
        &self,
        topic: impl AsRef<str>,
        proxy: Arc<P>,
        strength: ReferenceStrength,
    ) -> Result<bool, ServiceError>
    where
        P: TopicSubscriber + ProxyControl,
    {
        Self::check_proxy_strength(strength)?;
        let topic = Self::valid_topic(topic)?;
        let control: Arc<dyn ProxyControl> = proxy.clone();
        let subscriber: Arc<dyn TopicSubscriber> = proxy;
        let cell = SubscriberCell::proxy(subscriber, control);
        let weakish = cell.is_weakish();
        let mut index = self.index_guard();
        let added = index.subscribe_topic(topic, cell);
        let count = index.weak_or_proxy_count();
        drop(index);
        self.track_weakish(weakish, count);
        Ok(added)
    }

    /// Subscribes a proxy to topics the regex `pattern` fully matches.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a malformed pattern or
    /// `ReferenceStrength::Weak`.
    pub fn subscribe_pattern_proxy<P>(
        &self,
        pattern: impl AsRef<str>,
        proxy: Arc<P>,
        strength: ReferenceStrength,
    ) -> Result<bool, ServiceError>
    where
        P: TopicSubscriber + ProxyControl,
    {
        Self::check_proxy_strength(strength)?;
        let pattern = Self::valid_pattern(pattern)?;
        let control: Arc<dyn ProxyControl> = proxy.clone();
        let subscriber: Arc<dyn TopicSubscriber> = proxy;
        let cell = SubscriberCell::proxy(subscriber, control);
        let weakish = cell.is_weakish();
        let mut index = self.index_guard();
        let added = index.subscribe_pattern(pattern, cell);
        let count = index.weak_or_proxy_count();
        drop(index);
        self.track_weakish(weakish, count);
        Ok(added)
    }

    // -- Subscribe vetoers -------------------------------------------------

    /// Subscribes a vetoer consulted for events whose class is `class` or a
    /// descendant.
    ///
    /// # Errors
    ///
    /// Currently infallible; the `Result` shape matches the other subscribe
    /// operations.
    pub fn subscribe_veto(
        &self,
        class: &'static EventClass,
        vetoer: Arc<dyn EventVetoer>,
        strength: ReferenceStrength,
    ) -> Result<bool, ServiceError> {
        log::debug!(
            "Subscribing vetoer {} to class `{}` ({strength})",
            listener_desc(&vetoer),
            class.name(),
        );
        let cell = Self::make_cell(vetoer, strength);
        let weakish = cell.is_weakish();
        let mut index = self.index_guard();
        let added = index.subscribe_class_veto(class, cell);
        let count = index.weak_or_proxy_count();
        drop(index);
        self.track_weakish(weakish, count);
        Ok(added)
    }

    /// Subscribes a vetoer consulted for events of exactly `class`.
    ///
    /// # Errors
    ///
    /// Currently infallible.
    pub fn subscribe_veto_exactly(
        &self,
        class: &'static EventClass,
        vetoer: Arc<dyn EventVetoer>,
        strength: ReferenceStrength,
    ) -> Result<bool, ServiceError> {
        let cell = Self::make_cell(vetoer, strength);
        let weakish = cell.is_weakish();
        let mut index = self.index_guard();
        let added = index.subscribe_class_exact_veto(class, cell);
        let count = index.weak_or_proxy_count();
        drop(index);
        self.track_weakish(weakish, count);
        Ok(added)
    }

    /// Subscribes a vetoer consulted for payloads published under `topic`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the topic is blank.
    pub fn subscribe_veto_topic<T: AsRef<str>>(
        &self,
        topic: T,
        vetoer: Arc<dyn TopicVetoer>,
        strength: ReferenceStrength,
    ) -> Result<bool, ServiceError> {
        let topic = Self::valid_topic(topic)?;
        let cell = Self::make_cell(vetoer, strength);
        let weakish = cell.is_weakish();
        let mut index = self.index_guard();
        let added = index.subscribe_topic_veto(topic, cell);
        let count = index.weak_or_proxy_count();
        drop(index);
        self.track_weakish(weakish, count);
        Ok(added)
    }

    /// Subscribes a vetoer consulted for topics the regex `pattern` fully
    /// matches.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a malformed pattern.
    pub fn subscribe_veto_pattern<T: AsRef<str>>(
        &self,
        pattern: T,
        vetoer: Arc<dyn TopicVetoer>,
        strength: ReferenceStrength,
    ) -> Result<bool, ServiceError> {
        let pattern = Self::valid_pattern(pattern)?;
        let cell = Self::make_cell(vetoer, strength);
        let weakish = cell.is_weakish();
        let mut index = self.index_guard();
        let added = index.subscribe_pattern_veto(pattern, cell);
        let count = index.weak_or_proxy_count();
        drop(index);
        self.track_weakish(weakish, count);
        Ok(added)
    }

    // -- Unsubscribe -------------------------------------------------------

    /// Removes a hierarchical class subscription. Returns whether a removal
    /// occurred.
    pub fn unsubscribe(
        &self,
        class: &'static EventClass,
        subscriber: &Arc<dyn EventSubscriber>,
    ) -> bool {
        self.index_guard()
            .unsubscribe_class(class, data_addr(subscriber))
    }

    /// Removes an exact class subscription.
    pub fn unsubscribe_exactly(
        &self,
        class: &'static EventClass,
        subscriber: &Arc<dyn EventSubscriber>,
    ) -> bool {
        self.index_guard()
            .unsubscribe_class_exact(class, data_addr(subscriber))
    }

    /// Removes a generic type subscription.
    pub fn unsubscribe_from_type(
        &self,
        ty: &GenericType,
        subscriber: &Arc<dyn EventSubscriber>,
    ) -> bool {
        self.index_guard()
            .unsubscribe_type(ty, data_addr(subscriber))
    }

    /// Removes an exact topic subscription.
    pub fn unsubscribe_topic<T: AsRef<str>>(
        &self,
        topic: T,
        subscriber: &Arc<dyn TopicSubscriber>,
    ) -> bool {
        self.index_guard()
            .unsubscribe_topic(Ustr::from(topic.as_ref()), data_addr(subscriber))
    }

    /// Removes a pattern subscription.
    pub fn unsubscribe_pattern<T: AsRef<str>>(
        &self,
        pattern: T,
        subscriber: &Arc<dyn TopicSubscriber>,
    ) -> bool {
        self.index_guard()
            .unsubscribe_pattern(pattern.as_ref(), data_addr(subscriber))
    }

    /// Removes a hierarchical class vetoer.
    pub fn unsubscribe_veto(
        &self,
        class: &'static EventClass,
        vetoer: &Arc<dyn EventVetoer>,
    ) -> bool {
        self.index_guard()
            .unsubscribe_class_veto(class, data_addr(vetoer))
    }

    /// Removes an exact class vetoer.
    pub fn unsubscribe_veto_exactly(
        &self,
        class: &'static EventClass,
        vetoer: &Arc<dyn EventVetoer>,
    ) -> bool {
        self.index_guard()
            .unsubscribe_class_exact_veto(class, data_addr(vetoer))
    }

    /// Removes an exact topic vetoer.
    pub fn unsubscribe_veto_topic<T: AsRef<str>>(
        &self,
        topic: T,
        vetoer: &Arc<dyn TopicVetoer>,
    ) -> bool {
        self.index_guard()
            .unsubscribe_topic_veto(Ustr::from(topic.as_ref()), data_addr(vetoer))
    }

    /// Removes a pattern vetoer.
    pub fn unsubscribe_veto_pattern<T: AsRef<str>>(
        &self,
        pattern: T,
        vetoer: &Arc<dyn TopicVetoer>,
    ) -> bool {
        self.index_guard()
            .unsubscribe_pattern_veto(pattern.as_ref(), data_addr(vetoer))
    }

    // -- Unsubscribe by target (resolves proxies) --------------------------

    /// Removes the hierarchical class subscription whose *resolved* target is
    /// `target`, matching proxy cells by their proxied real target.
    pub fn unsubscribe_target(
        &self,
        class: &'static EventClass,
        target: &Arc<dyn Any + Send + Sync>,
    ) -> bool {
        self.index_guard()
            .unsubscribe_class_target(class, data_addr(target))
    }

    /// Removes the exact class subscription whose resolved target is `target`.
    pub fn unsubscribe_exactly_target(
        &self,
        class: &'static EventClass,
        target: &Arc<dyn Any + Send + Sync>,
    ) -> bool {
        self.index_guard()
            .unsubscribe_class_exact_target(class, data_addr(target))
    }

    /// Removes the generic type subscription whose resolved target is `target`.
    pub fn unsubscribe_type_target(
        &self,
        ty: &GenericType,
        target: &Arc<dyn Any + Send + Sync>,
    ) -> bool {
        self.index_guard()
            .unsubscribe_type_target(ty, data_addr(target))
    }

    /// Removes the topic subscription whose resolved target is `target`.
    pub fn unsubscribe_topic_target<T: AsRef<str>>(
        &self,
        topic: T,
        target: &Arc<dyn Any + Send + Sync>,
    ) -> bool {
        self.index_guard()
            .unsubscribe_topic_target(Ustr::from(topic.as_ref()), data_addr(target))
    }

    /// Removes the pattern subscription whose resolved target is `target`.
    pub fn unsubscribe_pattern_target<T: AsRef<str>>(
        &self,
        pattern: T,
        target: &Arc<dyn Any + Send + Sync>,
    ) -> bool {
        self.index_guard()
            .unsubscribe_pattern_target(pattern.as_ref(), data_addr(target))
    }

    /// Removes every subscription and vetoer across all keys.
    pub fn clear_all_subscribers(&self) {
        log::debug!("Clearing all subscribers");
        self.index_guard().clear_all();
    }

    // -- Publish -----------------------------------------------------------

    /// Publishes an event to all class subscribers matching its class.
    ///
    /// # Errors
    ///
    /// Currently infallible; the `Result` shape matches the other publish
    /// operations.
    pub fn publish<E: Event>(&self, event: E) -> Result<(), ServiceError> {
        self.publish_arc(Arc::new(event))
    }

    /// Publishes an already-shared event.
    ///
    /// # Errors
    ///
    /// Currently infallible.
    pub fn publish_arc(&self, event: Arc<dyn Event>) -> Result<(), ServiceError> {
        let class = event.event_class();
        let (vetoers, subscribers) = {
            let mut index = self.index_guard();
            (
                index.vetoers_for_class(class),
                index.subscribers_for_class(class),
            )
        };
        self.dispatch_event(&event, &vetoers, &subscribers);
        Ok(())
    }

    /// Publishes an event to subscribers of matching generic type keys.
    ///
    /// The veto phase and the cache use the event's concrete class; the
    /// generic type index itself has no veto dimension.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `ty` contains wildcard arguments.
    pub fn publish_typed<E: Event>(
        &self,
        ty: &GenericType,
        event: E,
    ) -> Result<(), ServiceError> {
        check_predicate_true(
            !ty.has_wildcards(),
            "published generic type must not contain wildcard arguments",
        )
        .map_err(ServiceError::invalid)?;

        let event: Arc<dyn Event> = Arc::new(event);
        let class = event.event_class();
        let (vetoers, subscribers) = {
            let mut index = self.index_guard();
            (index.vetoers_for_class(class), index.subscribers_for_type(ty))
        };
        self.dispatch_event(&event, &vetoers, &subscribers);
        Ok(())
    }

    /// Publishes a payload under a topic to exact and pattern subscribers.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the topic is blank.
    pub fn publish_topic<T, P>(&self, topic: T, payload: P) -> Result<(), ServiceError>
    where
        T: AsRef<str>,
        P: Any + Send + Sync,
    {
        self.publish_topic_payload(topic, Arc::new(payload))
    }

    /// Publishes an already-shared payload under a topic.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the topic is blank.
    pub fn publish_topic_payload<T: AsRef<str>>(
        &self,
        topic: T,
        payload: Payload,
    ) -> Result<(), ServiceError> {
        let topic = Self::valid_topic(topic)?;
        let (vetoers, subscribers) = {
            let mut index = self.index_guard();
            (
                index.vetoers_for_topic(topic),
                index.subscribers_for_topic(topic),
            )
        };
        self.dispatch_topic(topic, &payload, &vetoers, &subscribers);
        Ok(())
    }

    fn dispatch_event(
        &self,
        event: &Arc<dyn Event>,
        vetoers: &Snapshot<dyn EventVetoer>,
        subscribers: &Snapshot<dyn EventSubscriber>,
    ) {
        let class = event.event_class();

        for vetoer in vetoers {
            let listener = listener_desc(vetoer);
            let started = Instant::now();
            let start_ms = unix_millis();
            let outcome = catch_unwind(AssertUnwindSafe(|| vetoer.should_veto(event)));
            self.check_timing(
                TimingSource::Vetoer,
                started,
                start_ms,
                Some(class),
                None,
                &listener,
            );
            match outcome {
                Ok(true) => {
                    log::debug!("Publication of event class `{}` vetoed by {listener}", class.name());
                    return;
                }
                Ok(false) => {}
                // A panicking vetoer does not veto.
                Err(payload) => self.route_panic(
                    "EventVetoer::should_veto",
                    format!("event class `{}`", class.name()),
                    listener,
                    payload,
                ),
            }
        }

        self.cache_guard().insert_event(class, event.clone());

        for subscriber in subscribers {
            let listener = listener_desc(subscriber);
            let started = Instant::now();
            let start_ms = unix_millis();
            let outcome = catch_unwind(AssertUnwindSafe(|| subscriber.on_event(event)));
            self.check_timing(
                TimingSource::Subscriber,
                started,
                start_ms,
                Some(class),
                None,
                &listener,
            );
            if let Err(payload) = outcome {
                self.route_panic(
                    "EventSubscriber::on_event",
                    format!("event class `{}`", class.name()),
                    listener,
                    payload,
                );
            }
        }
    }

    fn dispatch_topic(
        &self,
        topic: Ustr,
        payload: &Payload,
        vetoers: &Snapshot<dyn TopicVetoer>,
        subscribers: &Snapshot<dyn TopicSubscriber>,
    ) {
        for vetoer in vetoers {
            let listener = listener_desc(vetoer);
            let started = Instant::now();
            let start_ms = unix_millis();
            let outcome = catch_unwind(AssertUnwindSafe(|| vetoer.should_veto(topic, payload)));
            self.check_timing(
                TimingSource::Vetoer,
                started,
                start_ms,
                None,
                Some(topic),
                &listener,
            );
            match outcome {
                Ok(true) => {
                    log::debug!("Publication to topic `{topic}` vetoed by {listener}");
                    return;
                }
                Ok(false) => {}
                Err(payload) => self.route_panic(
                    "TopicVetoer::should_veto",
                    format!("topic `{topic}`"),
                    listener,
                    payload,
                ),
            }
        }

        self.cache_guard().insert_topic_payload(topic, payload.clone());

        for subscriber in subscribers {
            let listener = listener_desc(subscriber);
            let started = Instant::now();
            let start_ms = unix_millis();
            let outcome = catch_unwind(AssertUnwindSafe(|| subscriber.on_topic(topic, payload)));
            self.check_timing(
                TimingSource::Subscriber,
                started,
                start_ms,
                None,
                Some(topic),
                &listener,
            );
            if let Err(payload) = outcome {
                self.route_panic(
                    "TopicSubscriber::on_topic",
                    format!("topic `{topic}`"),
                    listener,
                    payload,
                );
            }
        }
    }

    fn check_timing(
        &self,
        source: TimingSource,
        started: Instant,
        start_ms: u64,
        event_class: Option<&'static EventClass>,
        topic: Option<Ustr>,
        listener: &str,
    ) {
        let Some(monitor) = &self.monitor else {
            return;
        };
        // Timing events are never themselves timed.
        if event_class.is_some_and(|class| ptr::eq(class, &SUBSCRIBER_TIMING_EVENT)) {
            return;
        }
        if let Some(timing) =
            monitor.observe(source, started, start_ms, event_class, topic, listener)
            && let Err(e) = self.publish(timing)
        {
            log::error!("Failed to publish timing event: {e}");
        }
    }

    fn route_panic(
        &self,
        source: &'static str,
        context: String,
        listener: String,
        payload: Box<dyn Any + Send>,
    ) {
        let thrown = SubscriberThrew {
            source,
            context,
            listener,
            payload,
            backtrace: Backtrace::capture(),
        };
        self.exception_sink.handle_exception(&thrown);
    }

    // -- Cache -------------------------------------------------------------

    /// Returns the default recency-cache cap.
    #[must_use]
    pub fn default_cache_size(&self) -> usize {
        self.cache_guard().default_cap()
    }

    /// Sets the default recency-cache cap.
    pub fn set_default_cache_size(&self, size: usize) {
        self.cache_guard().set_default_cap(size);
    }

    /// Sets the cap for a class key. Interface descriptors are accepted and
    /// apply through inheritance.
    pub fn set_cache_size_for_class(&self, class: &'static EventClass, size: usize) {
        self.cache_guard().set_class_cap(class, size);
    }

    /// Sets the cap for an exact topic.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the topic is blank.
    pub fn set_cache_size_for_topic<T: AsRef<str>>(
        &self,
        topic: T,
        size: usize,
    ) -> Result<(), ServiceError> {
        let topic = Self::valid_topic(topic)?;
        self.cache_guard().set_topic_cap(topic, size);
        Ok(())
    }

    /// Sets the cap for topics matching a pattern.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a malformed pattern.
    pub fn set_cache_size_for_pattern<T: AsRef<str>>(
        &self,
        pattern: T,
        size: usize,
    ) -> Result<(), ServiceError> {
        let pattern = Self::valid_pattern(pattern)?;
        self.cache_guard().set_pattern_cap(pattern, size);
        Ok(())
    }

    /// Returns the effective cap for an event class, after inheritance
    /// resolution.
    #[must_use]
    pub fn cache_size_for_class(&self, class: &'static EventClass) -> usize {
        self.cache_guard().resolve_class_cap(class)
    }

    /// Returns the effective cap for a topic, after pattern resolution.
    #[must_use]
    pub fn cache_size_for_topic<T: AsRef<str>>(&self, topic: T) -> usize {
        self.cache_guard()
            .resolve_topic_cap(Ustr::from(topic.as_ref()))
    }

    /// Returns the most recently cached event for exactly `class`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for interface descriptors: no event instance
    /// ever has an interface class, so the read is a caller bug.
    pub fn last_event(
        &self,
        class: &'static EventClass,
    ) -> Result<Option<Arc<dyn Event>>, ServiceError> {
        check_predicate_true(
            !class.is_interface(),
            "cache reads require a concrete event class",
        )
        .map_err(ServiceError::invalid)?;
        Ok(self.cache_guard().last_event(class))
    }

    /// Returns the cached events for exactly `class`, newest first, as a
    /// defensive copy.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for interface descriptors.
    pub fn cached_events(
        &self,
        class: &'static EventClass,
    ) -> Result<Vec<Arc<dyn Event>>, ServiceError> {
        check_predicate_true(
            !class.is_interface(),
            "cache reads require a concrete event class",
        )
        .map_err(ServiceError::invalid)?;
        Ok(self.cache_guard().cached_events(class))
    }

    /// Returns the most recently cached payload for `topic`.
    #[must_use]
    pub fn last_topic_payload<T: AsRef<str>>(&self, topic: T) -> Option<Payload> {
        self.cache_guard()
            .last_topic_payload(Ustr::from(topic.as_ref()))
    }

    /// Returns the cached payloads for `topic`, newest first, as a defensive
    /// copy.
    #[must_use]
    pub fn cached_topic_payloads<T: AsRef<str>>(&self, topic: T) -> Vec<Payload> {
        self.cache_guard()
            .cached_topic_payloads(Ustr::from(topic.as_ref()))
    }

    /// Drops every cached event and payload. Cap configuration is unaffected.
    pub fn clear_cache(&self) {
        self.cache_guard().clear();
    }

    /// Drops cached events whose class is `class` or a subclass of it.
    pub fn clear_cache_for_class(&self, class: &'static EventClass) {
        self.cache_guard().clear_class(class);
    }

    /// Drops the cached payloads for an exact topic.
    pub fn clear_cache_for_topic<T: AsRef<str>>(&self, topic: T) {
        self.cache_guard().clear_topic(Ustr::from(topic.as_ref()));
    }

    /// Drops cached payloads for every topic the pattern fully matches.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a malformed pattern.
    pub fn clear_cache_matching<T: AsRef<str>>(&self, pattern: T) -> Result<(), ServiceError> {
        let pattern = Self::valid_pattern(pattern)?;
        self.cache_guard().clear_topic_matching(&pattern);
        Ok(())
    }

    // -- Reaper tuning -----------------------------------------------------

    /// Returns the weak/proxy count at which the reaper sweep starts.
    #[must_use]
    pub fn cleanup_start_threshold(&self) -> Option<usize> {
        self.reaper.config().start_threshold
    }

    /// Sets the sweep start threshold; `None` disables sweep starts.
    pub fn set_cleanup_start_threshold(&self, threshold: Option<usize>) {
        self.reaper.set_start_threshold(threshold);
    }

    /// Returns the weak/proxy count at or below which a sweep cancels itself.
    #[must_use]
    pub fn cleanup_stop_threshold(&self) -> Option<usize> {
        self.reaper.config().stop_threshold
    }

    /// Sets the sweep stop threshold; `None` disables threshold-based
    /// cancellation.
    pub fn set_cleanup_stop_threshold(&self, threshold: Option<usize>) {
        self.reaper.set_stop_threshold(threshold);
    }

    /// Returns the sweep tick period.
    #[must_use]
    pub fn cleanup_period(&self) -> Option<Duration> {
        self.reaper.config().period
    }

    /// Sets the sweep tick period; `None` disables the sweep.
    pub fn set_cleanup_period(&self, period: Option<Duration>) {
        self.reaper.set_period(period);
    }

    /// Returns whether a reaper sweep thread is currently running.
    #[must_use]
    pub fn cleanup_running(&self) -> bool {
        self.reaper.is_running()
    }

    /// One reaper sweep cycle. Returns `false` when the sweep cancelled
    /// itself under the stop threshold.
    pub(crate) fn reaper_tick(&self) -> bool {
        self.publish_cleanup(CleanupEvent {
            phase: CleanupPhase::Starting,
            stale_removed: None,
        });

        let count = self.index_guard().weak_or_proxy_count();
        if let Some(stop) = self.reaper.config().stop_threshold
            && count <= stop
        {
            log::debug!("Reaper sweep cancelled (count={count}, stop={stop})");
            self.publish_cleanup(CleanupEvent {
                phase: CleanupPhase::CancelledUnderThreshold,
                stale_removed: None,
            });
            return false;
        }

        self.publish_cleanup(CleanupEvent {
            phase: CleanupPhase::Begun,
            stale_removed: None,
        });
        let removed = self.index_guard().scrub_stale();
        log::debug!("Reaper sweep removed {removed} stale cells");
        self.publish_cleanup(CleanupEvent {
            phase: CleanupPhase::Finished,
            stale_removed: Some(removed),
        });
        true
    }

    fn publish_cleanup(&self, event: CleanupEvent) {
        if let Err(e) = self.publish(event) {
            log::error!("Failed to publish cleanup event: {e}");
        }
    }

    // -- Introspection -----------------------------------------------------

    /// Number of resident weak and weakly-proxied subscription cells.
    #[must_use]
    pub fn weak_or_proxy_count(&self) -> usize {
        self.index_guard().weak_or_proxy_count()
    }

    /// Returns the exactly-subscribed topic names.
    #[must_use]
    pub fn topics(&self) -> Vec<Ustr> {
        self.index_guard().topics()
    }

    /// Returns the subscribed pattern sources.
    #[must_use]
    pub fn patterns(&self) -> Vec<Ustr> {
        self.index_guard().patterns()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Mutex, PoisonError,
            atomic::{AtomicUsize, Ordering},
        },
        thread,
    };

    use rstest::rstest;

    use super::*;
    use crate::{
        events::{CLEANUP_EVENT, SubscriberTimingEvent, TypeArg},
        stubs::{
            AUDITABLE, BASE_EVENT, CHILD_EVENT, CountingSink, CountingSubscriber,
            OrderRecordingSubscriber, PanickingSubscriber, PanickingVetoer,
            RecordingTopicSubscriber, STUB_EVENT, StubEvent, StubProxy, StubTopicVetoer,
            StubVetoer, TagRecordingSubscriber,
        },
        subscriber::{CallbackSubscriber, TypedSubscriber},
    };

    fn service() -> Arc<EventService> {
        EventService::new(EventServiceConfig::default()).unwrap()
    }

    fn wait_until(timeout: Duration, predicate: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if predicate() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        predicate()
    }

    fn cached_tags(service: &EventService, class: &'static EventClass) -> Vec<u64> {
        service
            .cached_events(class)
            .unwrap()
            .iter()
            .map(|e| e.as_any().downcast_ref::<StubEvent>().unwrap().tag)
            .collect()
    }

    #[rstest]
    fn test_basic_subscribe_publish() {
        let service = service();
        let subscriber = Arc::new(CountingSubscriber::new());

        assert!(service
            .subscribe(&BASE_EVENT, subscriber.clone(), ReferenceStrength::Strong)
            .unwrap());
        service.publish(StubEvent::new(&BASE_EVENT, 1)).unwrap();

        assert_eq!(subscriber.count(), 1);
    }

    #[rstest]
    fn test_duplicate_subscribe_returns_false() {
        let service = service();
        let subscriber: Arc<dyn EventSubscriber> = Arc::new(CountingSubscriber::new());

        assert!(service
            .subscribe(&BASE_EVENT, subscriber.clone(), ReferenceStrength::Strong)
            .unwrap());
        assert!(!service
            .subscribe(&BASE_EVENT, subscriber, ReferenceStrength::Strong)
            .unwrap());
    }

    #[rstest]
    fn test_unsubscribe_stops_delivery() {
        let service = service();
        let subscriber = Arc::new(CountingSubscriber::new());
        let as_dyn: Arc<dyn EventSubscriber> = subscriber.clone();

        service
            .subscribe(&BASE_EVENT, as_dyn.clone(), ReferenceStrength::Strong)
            .unwrap();
        assert!(service.unsubscribe(&BASE_EVENT, &as_dyn));
        assert!(!service.unsubscribe(&BASE_EVENT, &as_dyn));

        service.publish(StubEvent::new(&BASE_EVENT, 1)).unwrap();
        assert_eq!(subscriber.count(), 0);
    }

    #[rstest]
    fn test_exception_isolation() {
        let sink = Arc::new(CountingSink::new());
        let service =
            EventService::with_sink(EventServiceConfig::default(), sink.clone()).unwrap();

        let s2 = Arc::new(CountingSubscriber::new());
        let s4 = Arc::new(CountingSubscriber::new());

        service
            .subscribe(
                &BASE_EVENT,
                Arc::new(PanickingSubscriber),
                ReferenceStrength::Strong,
            )
            .unwrap();
        service
            .subscribe(&BASE_EVENT, s2.clone(), ReferenceStrength::Strong)
            .unwrap();
        service
            .subscribe(
                &BASE_EVENT,
                Arc::new(PanickingSubscriber),
                ReferenceStrength::Strong,
            )
            .unwrap();
        service
            .subscribe(&BASE_EVENT, s4.clone(), ReferenceStrength::Strong)
            .unwrap();

        service.publish(StubEvent::new(&BASE_EVENT, 1)).unwrap();

        assert_eq!(s2.count(), 1);
        assert_eq!(s4.count(), 1);
        assert_eq!(sink.count(), 2);
    }

    #[rstest]
    fn test_veto_blocks_delivery_and_cache() {
        let service = service();
        service.set_cache_size_for_class(&BASE_EVENT, 3);

        let subscriber = Arc::new(CountingSubscriber::new());
        let vetoer = Arc::new(StubVetoer::new(true));
        let veto_dyn: Arc<dyn EventVetoer> = vetoer.clone();

        service
            .subscribe(&BASE_EVENT, subscriber.clone(), ReferenceStrength::Strong)
            .unwrap();
        service
            .subscribe_veto(&BASE_EVENT, veto_dyn.clone(), ReferenceStrength::Strong)
            .unwrap();

        service.publish(StubEvent::new(&BASE_EVENT, 1)).unwrap();
        assert_eq!(subscriber.count(), 0);
        assert_eq!(vetoer.consulted(), 1);
        assert!(cached_tags(&service, &BASE_EVENT).is_empty());

        assert!(service.unsubscribe_veto(&BASE_EVENT, &veto_dyn));
        service.publish(StubEvent::new(&BASE_EVENT, 2)).unwrap();
        assert_eq!(subscriber.count(), 1);
        assert_eq!(cached_tags(&service, &BASE_EVENT), vec![2]);
    }

    #[rstest]
    fn test_vetoer_panic_does_not_veto() {
        let sink = Arc::new(CountingSink::new());
        let service =
            EventService::with_sink(EventServiceConfig::default(), sink.clone()).unwrap();

        let subscriber = Arc::new(CountingSubscriber::new());
        let second_vetoer = Arc::new(StubVetoer::new(false));

        service
            .subscribe_veto(
                &BASE_EVENT,
                Arc::new(PanickingVetoer),
                ReferenceStrength::Strong,
            )
            .unwrap();
        service
            .subscribe_veto(&BASE_EVENT, second_vetoer.clone(), ReferenceStrength::Strong)
            .unwrap();
        service
            .subscribe(&BASE_EVENT, subscriber.clone(), ReferenceStrength::Strong)
            .unwrap();

        service.publish(StubEvent::new(&BASE_EVENT, 1)).unwrap();

        // The panic was captured, the remaining vetoer ran, delivery happened.
        assert_eq!(sink.count(), 1);
        assert_eq!(second_vetoer.consulted(), 1);
        assert_eq!(subscriber.count(), 1);
    }

    #[rstest]
    fn test_resubscribe_relocates_to_tail() {
        let service = service();
        let log = Arc::new(Mutex::new(Vec::new()));

        let a: Arc<dyn EventSubscriber> =
            Arc::new(OrderRecordingSubscriber::new("a", log.clone()));
        let b: Arc<dyn EventSubscriber> =
            Arc::new(OrderRecordingSubscriber::new("b", log.clone()));
        let c: Arc<dyn EventSubscriber> =
            Arc::new(OrderRecordingSubscriber::new("c", log.clone()));

        service
            .subscribe(&BASE_EVENT, a.clone(), ReferenceStrength::Strong)
            .unwrap();
        service
            .subscribe(&BASE_EVENT, b, ReferenceStrength::Strong)
            .unwrap();
        service
            .subscribe(&BASE_EVENT, c, ReferenceStrength::Strong)
            .unwrap();

        service.publish(StubEvent::new(&BASE_EVENT, 1)).unwrap();
        assert_eq!(
            *log.lock().unwrap_or_else(PoisonError::into_inner),
            vec!["a", "b", "c"]
        );

        // Re-subscribing `a` moves it to the tail of the delivery order.
        assert!(!service
            .subscribe(&BASE_EVENT, a, ReferenceStrength::Strong)
            .unwrap());
        log.lock().unwrap_or_else(PoisonError::into_inner).clear();

        service.publish(StubEvent::new(&BASE_EVENT, 2)).unwrap();
        assert_eq!(
            *log.lock().unwrap_or_else(PoisonError::into_inner),
            vec!["b", "c", "a"]
        );
    }

    #[rstest]
    fn test_hierarchical_vs_exact_delivery() {
        let service = service();
        let hierarchical = Arc::new(CountingSubscriber::new());
        let exact = Arc::new(CountingSubscriber::new());

        service
            .subscribe(&BASE_EVENT, hierarchical.clone(), ReferenceStrength::Strong)
            .unwrap();
        service
            .subscribe_exactly(&BASE_EVENT, exact.clone(), ReferenceStrength::Strong)
            .unwrap();

        service.publish(StubEvent::new(&CHILD_EVENT, 1)).unwrap();
        assert_eq!(hierarchical.count(), 1);
        assert_eq!(exact.count(), 0);

        service.publish(StubEvent::new(&BASE_EVENT, 2)).unwrap();
        assert_eq!(hierarchical.count(), 2);
        assert_eq!(exact.count(), 1);
    }

    #[rstest]
    fn test_cache_resize_sequence() {
        let service = service();
        service.publish(StubEvent::new(&STUB_EVENT, 1)).unwrap();
        assert!(cached_tags(&service, &STUB_EVENT).is_empty());

        service.set_cache_size_for_class(&STUB_EVENT, 1);
        service.publish(StubEvent::new(&STUB_EVENT, 2)).unwrap();
        assert_eq!(cached_tags(&service, &STUB_EVENT), vec![2]);

        service.set_cache_size_for_class(&STUB_EVENT, 5);
        for tag in 3..=6 {
            service.publish(StubEvent::new(&STUB_EVENT, tag)).unwrap();
        }
        assert_eq!(cached_tags(&service, &STUB_EVENT), vec![6, 5, 4, 3, 2]);

        service.publish(StubEvent::new(&STUB_EVENT, 7)).unwrap();
        assert_eq!(cached_tags(&service, &STUB_EVENT), vec![7, 6, 5, 4, 3]);

        let last = service.last_event(&STUB_EVENT).unwrap().unwrap();
        assert_eq!(last.as_any().downcast_ref::<StubEvent>().unwrap().tag, 7);
    }

    #[rstest]
    fn test_pattern_topic_delivery() {
        let service = service();
        let subscriber = Arc::new(RecordingTopicSubscriber::new());

        service
            .subscribe_pattern("Foo[1-5]", subscriber.clone(), ReferenceStrength::Strong)
            .unwrap();

        service.publish_topic("Foo1", "p1").unwrap();
        service.publish_topic("Foo7", "p7").unwrap();
        service.publish_topic("Foo2", "p2").unwrap();

        assert_eq!(
            subscriber.seen(),
            vec![
                (Ustr::from("Foo1"), "p1".to_string()),
                (Ustr::from("Foo2"), "p2".to_string()),
            ]
        );
    }

    #[rstest]
    fn test_topic_veto_blocks_delivery_and_cache() {
        let service = service();
        service.set_cache_size_for_topic("orders", 3).unwrap();

        let subscriber = Arc::new(RecordingTopicSubscriber::new());
        service
            .subscribe_topic("orders", subscriber.clone(), ReferenceStrength::Strong)
            .unwrap();
        service
            .subscribe_veto_topic(
                "orders",
                Arc::new(StubTopicVetoer::new(true)),
                ReferenceStrength::Strong,
            )
            .unwrap();

        service.publish_topic("orders", "p1").unwrap();
        assert!(subscriber.seen().is_empty());
        assert!(service.cached_topic_payloads("orders").is_empty());
        assert!(service.last_topic_payload("orders").is_none());
    }

    #[rstest]
    fn test_topic_payload_caching() {
        let service = service();
        service.set_cache_size_for_pattern("orders\\..*", 2).unwrap();

        service.publish_topic("orders.filled", "p1").unwrap();
        service.publish_topic("orders.filled", "p2").unwrap();
        service.publish_topic("orders.filled", "p3").unwrap();

        let cached = service.cached_topic_payloads("orders.filled");
        let strs: Vec<&str> = cached
            .iter()
            .map(|p| *crate::subscriber::payload_as::<&str>(p).unwrap())
            .collect();
        assert_eq!(strs, vec!["p3", "p2"]);

        let last = service.last_topic_payload("orders.filled").unwrap();
        assert_eq!(*crate::subscriber::payload_as::<&str>(&last).unwrap(), "p3");
    }

    #[rstest]
    fn test_interface_keys_configure_but_do_not_read() {
        let service = service();
        service.set_cache_size_for_class(&AUDITABLE, 3);

        assert!(matches!(
            service.last_event(&AUDITABLE),
            Err(ServiceError::InvalidArgument(_))
        ));
        assert!(matches!(
            service.cached_events(&AUDITABLE),
            Err(ServiceError::InvalidArgument(_))
        ));
    }

    #[rstest]
    fn test_blank_topic_and_bad_pattern_rejected() {
        let service = service();
        let subscriber: Arc<dyn TopicSubscriber> = Arc::new(RecordingTopicSubscriber::new());

        assert!(matches!(
            service.subscribe_topic("   ", subscriber.clone(), ReferenceStrength::Strong),
            Err(ServiceError::InvalidArgument(_))
        ));
        assert!(matches!(
            service.subscribe_pattern("Foo[", subscriber, ReferenceStrength::Strong),
            Err(ServiceError::InvalidArgument(_))
        ));
        assert!(matches!(
            service.publish_topic("", "p"),
            Err(ServiceError::InvalidArgument(_))
        ));
    }

    #[rstest]
    fn test_timing_logger_requires_threshold() {
        let config = EventServiceConfig {
            subscribe_timing_logger: true,
            ..Default::default()
        };
        assert!(matches!(
            EventService::new(config),
            Err(ServiceError::InvalidArgument(_))
        ));
    }

    #[rstest]
    fn test_generic_type_publish() {
        let service = service();
        let subscriber = Arc::new(CountingSubscriber::new());

        // `Stub<? extends BaseEvent>` matches `Stub<ChildEvent>` but not
        // `Stub<StubEvent>`.
        let key = GenericType::new(
            &STUB_EVENT,
            vec![TypeArg::Wildcard {
                upper: vec![&BASE_EVENT],
                lower: vec![],
            }],
        );
        service
            .subscribe_to_type(key, subscriber.clone(), ReferenceStrength::Strong)
            .unwrap();

        let child_arg = GenericType::new(&STUB_EVENT, vec![TypeArg::Concrete(&CHILD_EVENT)]);
        service
            .publish_typed(&child_arg, StubEvent::new(&STUB_EVENT, 1))
            .unwrap();
        assert_eq!(subscriber.count(), 1);

        let stub_arg = GenericType::new(&STUB_EVENT, vec![TypeArg::Concrete(&STUB_EVENT)]);
        service
            .publish_typed(&stub_arg, StubEvent::new(&STUB_EVENT, 2))
            .unwrap();
        assert_eq!(subscriber.count(), 1);
    }

    #[rstest]
    fn test_generic_type_publish_rejects_wildcards() {
        let service = service();
        let wild = GenericType::new(
            &STUB_EVENT,
            vec![TypeArg::Wildcard {
                upper: vec![&BASE_EVENT],
                lower: vec![],
            }],
        );
        assert!(matches!(
            service.publish_typed(&wild, StubEvent::new(&STUB_EVENT, 1)),
            Err(ServiceError::InvalidArgument(_))
        ));
    }

    #[rstest]
    fn test_weak_subscriber_collected() {
        let service = service();
        let subscriber = Arc::new(CountingSubscriber::new());
        let as_dyn: Arc<dyn EventSubscriber> = subscriber.clone();

        service
            .subscribe(&BASE_EVENT, as_dyn, ReferenceStrength::Weak)
            .unwrap();
        assert_eq!(service.weak_or_proxy_count(), 1);

        service.publish(StubEvent::new(&BASE_EVENT, 1)).unwrap();
        assert_eq!(subscriber.count(), 1);

        drop(subscriber);
        // The stale cell is scrubbed by the publish-time walk.
        service.publish(StubEvent::new(&BASE_EVENT, 2)).unwrap();
        assert_eq!(service.weak_or_proxy_count(), 0);
    }

    #[rstest]
    fn test_proxy_must_be_held_strongly() {
        let service = service();
        let real = Arc::new(CountingSubscriber::new());
        let proxy = Arc::new(StubProxy::new(&real, ReferenceStrength::Weak));

        assert!(matches!(
            service.subscribe_proxy(&BASE_EVENT, proxy, ReferenceStrength::Weak),
            Err(ServiceError::InvalidArgument(_))
        ));
    }

    #[rstest]
    fn test_proxy_delivery_and_target_unsubscribe() {
        let service = service();
        let real = Arc::new(CountingSubscriber::new());
        let proxy = Arc::new(StubProxy::new(&real, ReferenceStrength::Weak));

        service
            .subscribe_proxy(&BASE_EVENT, proxy.clone(), ReferenceStrength::Strong)
            .unwrap();
        // A weakly-tracking proxy counts toward the reaper.
        assert_eq!(service.weak_or_proxy_count(), 1);

        service.publish(StubEvent::new(&BASE_EVENT, 1)).unwrap();
        assert_eq!(real.count(), 1);

        // The variant matches the proxy cell by its proxied real target.
        let target: Arc<dyn Any + Send + Sync> = real.clone();
        assert!(service.unsubscribe_target(&BASE_EVENT, &target));
        assert!(proxy.was_unsubscribed());
        assert_eq!(service.weak_or_proxy_count(), 0);

        service.publish(StubEvent::new(&BASE_EVENT, 2)).unwrap();
        assert_eq!(real.count(), 1);
    }

    #[rstest]
    fn test_proxy_goes_stale_with_its_target() {
        let service = service();
        let real = Arc::new(CountingSubscriber::new());
        let proxy = Arc::new(StubProxy::new(&real, ReferenceStrength::Weak));

        service
            .subscribe_proxy(&BASE_EVENT, proxy, ReferenceStrength::Strong)
            .unwrap();
        drop(real);

        service.publish(StubEvent::new(&BASE_EVENT, 1)).unwrap();
        assert_eq!(service.weak_or_proxy_count(), 0);
    }

    #[rstest]
    fn test_reentrant_subscribe_during_delivery() {
        let service = service();
        let late = Arc::new(CountingSubscriber::new());

        let service_clone = service.clone();
        let late_clone = late.clone();
        let installer: Arc<dyn EventSubscriber> = Arc::new(CallbackSubscriber::new(move |_| {
            service_clone
                .subscribe(&BASE_EVENT, late_clone.clone(), ReferenceStrength::Strong)
                .unwrap();
        }));

        service
            .subscribe(&BASE_EVENT, installer, ReferenceStrength::Strong)
            .unwrap();

        // The in-flight publication iterates its private snapshot; the
        // newly-subscribed target only sees later publications.
        service.publish(StubEvent::new(&BASE_EVENT, 1)).unwrap();
        assert_eq!(late.count(), 0);

        service.publish(StubEvent::new(&BASE_EVENT, 2)).unwrap();
        assert_eq!(late.count(), 1);
    }

    #[rstest]
    fn test_clear_all_subscribers() {
        let service = service();
        let subscriber = Arc::new(CountingSubscriber::new());
        let topic_sub = Arc::new(RecordingTopicSubscriber::new());

        service
            .subscribe(&BASE_EVENT, subscriber.clone(), ReferenceStrength::Strong)
            .unwrap();
        service
            .subscribe_topic("orders", topic_sub.clone(), ReferenceStrength::Strong)
            .unwrap();

        service.clear_all_subscribers();

        service.publish(StubEvent::new(&BASE_EVENT, 1)).unwrap();
        service.publish_topic("orders", "p").unwrap();
        assert_eq!(subscriber.count(), 0);
        assert!(topic_sub.seen().is_empty());
        assert!(service.topics().is_empty());
    }

    #[rstest]
    fn test_timing_monitor_publishes_event() {
        let config = EventServiceConfig {
            timing_threshold: Some(Duration::from_millis(5)),
            ..Default::default()
        };
        let service = EventService::new(config).unwrap();

        let timings = Arc::new(Mutex::new(Vec::new()));
        let timings_clone = timings.clone();
        let recorder: Arc<dyn EventSubscriber> =
            Arc::new(TypedSubscriber::new(move |e: &SubscriberTimingEvent| {
                timings_clone
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push((e.source, e.event_class));
            }));
        service
            .subscribe(&SUBSCRIBER_TIMING_EVENT, recorder, ReferenceStrength::Strong)
            .unwrap();

        let slow: Arc<dyn EventSubscriber> = Arc::new(CallbackSubscriber::new(|_| {
            thread::sleep(Duration::from_millis(25));
        }));
        service
            .subscribe(&BASE_EVENT, slow, ReferenceStrength::Strong)
            .unwrap();

        service.publish(StubEvent::new(&BASE_EVENT, 1)).unwrap();

        let seen = timings.lock().unwrap_or_else(PoisonError::into_inner);
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, TimingSource::Subscriber);
        assert!(std::ptr::eq(seen[0].1.unwrap(), &BASE_EVENT));
    }

    #[rstest]
    fn test_fast_subscriber_produces_no_timing_event() {
        let config = EventServiceConfig {
            timing_threshold: Some(Duration::from_secs(60)),
            ..Default::default()
        };
        let service = EventService::new(config).unwrap();

        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        let recorder: Arc<dyn EventSubscriber> =
            Arc::new(TypedSubscriber::new(move |_: &SubscriberTimingEvent| {
                count_clone.fetch_add(1, Ordering::SeqCst);
            }));
        service
            .subscribe(&SUBSCRIBER_TIMING_EVENT, recorder, ReferenceStrength::Strong)
            .unwrap();
        service
            .subscribe(
                &BASE_EVENT,
                Arc::new(CountingSubscriber::new()),
                ReferenceStrength::Strong,
            )
            .unwrap();

        service.publish(StubEvent::new(&BASE_EVENT, 1)).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[rstest]
    fn test_reaper_sweep_stream() {
        let config = EventServiceConfig {
            cleanup_start_threshold: Some(2),
            cleanup_stop_threshold: Some(0),
            cleanup_period: Some(Duration::from_millis(10)),
            ..Default::default()
        };
        let service = EventService::new(config).unwrap();

        let phases = Arc::new(Mutex::new(Vec::new()));
        let phases_clone = phases.clone();
        let recorder: Arc<dyn EventSubscriber> =
            Arc::new(TypedSubscriber::new(move |e: &CleanupEvent| {
                phases_clone
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push((e.phase, e.stale_removed));
            }));
        service
            .subscribe(&CLEANUP_EVENT, recorder, ReferenceStrength::Strong)
            .unwrap();

        let a = Arc::new(CountingSubscriber::new());
        let b = Arc::new(CountingSubscriber::new());
        service
            .subscribe(&BASE_EVENT, a.clone(), ReferenceStrength::Weak)
            .unwrap();
        service
            .subscribe_exactly(&CHILD_EVENT, b.clone(), ReferenceStrength::Weak)
            .unwrap();
        assert!(service.cleanup_running());

        drop(a);
        drop(b);

        // The sweep removes both stale cells and then cancels itself under
        // the stop threshold.
        assert!(wait_until(Duration::from_secs(3), || {
            phases
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .any(|(phase, _)| *phase == CleanupPhase::CancelledUnderThreshold)
        }));

        let seen = phases.lock().unwrap_or_else(PoisonError::into_inner).clone();
        assert_eq!(seen[0].0, CleanupPhase::Starting);
        let removed_total: usize = seen
            .iter()
            .filter(|(phase, _)| *phase == CleanupPhase::Finished)
            .map(|(_, removed)| removed.unwrap_or(0))
            .sum();
        assert_eq!(removed_total, 2);

        let cancelled_at = seen
            .iter()
            .position(|(phase, _)| *phase == CleanupPhase::CancelledUnderThreshold)
            .unwrap();
        let finished_at = seen
            .iter()
            .rposition(|(phase, _)| *phase == CleanupPhase::Finished)
            .unwrap();
        assert!(finished_at < cancelled_at);

        assert!(wait_until(Duration::from_secs(1), || !service
            .cleanup_running()));
        assert_eq!(service.weak_or_proxy_count(), 0);
    }

    #[rstest]
    fn test_reaper_does_not_start_without_period() {
        let config = EventServiceConfig {
            cleanup_start_threshold: Some(1),
            ..Default::default()
        };
        let service = EventService::new(config).unwrap();

        let subscriber = Arc::new(CountingSubscriber::new());
        service
            .subscribe(&BASE_EVENT, subscriber.clone(), ReferenceStrength::Weak)
            .unwrap();

        assert!(!service.cleanup_running());
    }

    #[rstest]
    fn test_reaper_tuning_accessors() {
        let service = service();
        assert_eq!(service.cleanup_start_threshold(), None);

        service.set_cleanup_start_threshold(Some(10));
        service.set_cleanup_stop_threshold(Some(2));
        service.set_cleanup_period(Some(Duration::from_secs(1)));

        assert_eq!(service.cleanup_start_threshold(), Some(10));
        assert_eq!(service.cleanup_stop_threshold(), Some(2));
        assert_eq!(service.cleanup_period(), Some(Duration::from_secs(1)));

        service.set_cleanup_period(None);
        assert_eq!(service.cleanup_period(), None);
    }

    #[rstest]
    fn test_cache_size_resolution_through_service() {
        let service = service();
        service.set_default_cache_size(1);
        service.set_cache_size_for_class(&BASE_EVENT, 4);

        assert_eq!(service.default_cache_size(), 1);
        assert_eq!(service.cache_size_for_class(&CHILD_EVENT), 4);
        assert_eq!(service.cache_size_for_class(&STUB_EVENT), 1);

        service.set_cache_size_for_topic("orders", 7).unwrap();
        assert_eq!(service.cache_size_for_topic("orders"), 7);
        assert_eq!(service.cache_size_for_topic("fills"), 1);
    }

    #[rstest]
    fn test_clear_cache_variants_through_service() {
        let service = service();
        service.set_default_cache_size(3);

        service.publish(StubEvent::new(&BASE_EVENT, 1)).unwrap();
        service.publish(StubEvent::new(&CHILD_EVENT, 2)).unwrap();
        service.publish_topic("orders.filled", "p").unwrap();

        service.clear_cache_for_class(&CHILD_EVENT);
        assert_eq!(cached_tags(&service, &BASE_EVENT), vec![1]);
        assert!(cached_tags(&service, &CHILD_EVENT).is_empty());

        service.clear_cache_matching("orders\\..*").unwrap();
        assert!(service.last_topic_payload("orders.filled").is_none());

        service.clear_cache();
        assert!(cached_tags(&service, &BASE_EVENT).is_empty());
    }
}

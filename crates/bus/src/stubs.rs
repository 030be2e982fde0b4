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

//! Stub subscribers, vetoers, and a small event-class hierarchy for tests.

use std::{
    any::Any,
    sync::{
        Arc, Mutex, PoisonError, Weak,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use ustr::Ustr;

use crate::{
    cell::ProxyControl,
    enums::ReferenceStrength,
    error::{ExceptionSink, SubscriberThrew},
    events::{Event, EventClass, Payload},
    subscriber::{EventSubscriber, EventVetoer, TopicSubscriber, TopicVetoer},
};

/// Root of the stub event hierarchy.
pub static BASE_EVENT: EventClass = EventClass::concrete("BaseEvent", None, &[]);
/// Direct subclass of `BASE_EVENT`.
pub static CHILD_EVENT: EventClass = EventClass::concrete("ChildEvent", Some(&BASE_EVENT), &[]);
/// Subclass of `CHILD_EVENT`, two levels below the root.
pub static GRANDCHILD_EVENT: EventClass =
    EventClass::concrete("GrandchildEvent", Some(&CHILD_EVENT), &[]);
/// Marker interface.
pub static AUDITABLE: EventClass = EventClass::interface("Auditable", &[]);
/// Subclass of `BASE_EVENT` declaring `AUDITABLE`.
pub static AUDITED_EVENT: EventClass =
    EventClass::concrete("AuditedEvent", Some(&BASE_EVENT), &[&AUDITABLE]);
/// A class unrelated to the stub hierarchy.
pub static STUB_EVENT: EventClass = EventClass::concrete("StubEvent", None, &[]);

/// Stub event instance bound to an arbitrary class descriptor.
#[derive(Debug, Clone)]
pub struct StubEvent {
    class: &'static EventClass,
    /// Sequence tag for ordering and identity assertions.
    pub tag: u64,
}

impl StubEvent {
    /// Creates a stub event of the given class.
    #[must_use]
    pub const fn new(class: &'static EventClass, tag: u64) -> Self {
        Self { class, tag }
    }
}

impl Event for StubEvent {
    fn event_class(&self) -> &'static EventClass {
        self.class
    }

    fn as_any(&self) -> &(dyn Any + Send + Sync) {
        self
    }
}

/// Subscriber that counts invocations.
#[derive(Debug, Default)]
pub struct CountingSubscriber {
    count: AtomicUsize,
}

impl CountingSubscriber {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

impl EventSubscriber for CountingSubscriber {
    fn on_event(&self, _event: &Arc<dyn Event>) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}

/// Subscriber that appends its label to a shared call log.
pub struct OrderRecordingSubscriber {
    label: &'static str,
    log: Arc<Mutex<Vec<&'static str>>>,
}

impl OrderRecordingSubscriber {
    #[must_use]
    pub fn new(label: &'static str, log: Arc<Mutex<Vec<&'static str>>>) -> Self {
        Self { label, log }
    }
}

impl EventSubscriber for OrderRecordingSubscriber {
    fn on_event(&self, _event: &Arc<dyn Event>) {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(self.label);
    }
}

/// Subscriber that records the tags of [`StubEvent`]s it receives.
#[derive(Debug, Default)]
pub struct TagRecordingSubscriber {
    tags: Mutex<Vec<u64>>,
}

impl TagRecordingSubscriber {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn tags(&self) -> Vec<u64> {
        self.tags
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl EventSubscriber for TagRecordingSubscriber {
    fn on_event(&self, event: &Arc<dyn Event>) {
        if let Some(stub) = event.as_any().downcast_ref::<StubEvent>() {
            self.tags
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(stub.tag);
        }
    }
}

/// Subscriber that always panics.
#[derive(Debug, Default)]
pub struct PanickingSubscriber;

impl EventSubscriber for PanickingSubscriber {
    fn on_event(&self, _event: &Arc<dyn Event>) {
        panic!("stub subscriber failure");
    }
}

/// Vetoer with a fixed verdict that counts consultations.
#[derive(Debug)]
pub struct StubVetoer {
    veto: bool,
    consulted: AtomicUsize,
}

impl StubVetoer {
    #[must_use]
    pub const fn new(veto: bool) -> Self {
        Self {
            veto,
            consulted: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn consulted(&self) -> usize {
        self.consulted.load(Ordering::SeqCst)
    }
}

impl EventVetoer for StubVetoer {
    fn should_veto(&self, _event: &Arc<dyn Event>) -> bool {
        self.consulted.fetch_add(1, Ordering::SeqCst);
        self.veto
    }
}

/// Vetoer that always panics.
#[derive(Debug, Default)]
pub struct PanickingVetoer;

impl EventVetoer for PanickingVetoer {
    fn should_veto(&self, _event: &Arc<dyn Event>) -> bool {
        panic!("stub vetoer failure");
    }
}

/// Topic subscriber recording `(topic, payload)` pairs for `&str` payloads.
#[derive(Debug, Default)]
pub struct RecordingTopicSubscriber {
    seen: Mutex<Vec<(Ustr, String)>>,
}

impl RecordingTopicSubscriber {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn seen(&self) -> Vec<(Ustr, String)> {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl TopicSubscriber for RecordingTopicSubscriber {
    fn on_topic(&self, topic: Ustr, payload: &Payload) {
        let rendered = crate::subscriber::payload_as::<&str>(payload)
            .map_or_else(|| "<opaque>".to_string(), |s| (*s).to_string());
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((topic, rendered));
    }
}

/// Topic vetoer with a fixed verdict.
#[derive(Debug)]
pub struct StubTopicVetoer {
    veto: bool,
}

impl StubTopicVetoer {
    #[must_use]
    pub const fn new(veto: bool) -> Self {
        Self { veto }
    }
}

impl TopicVetoer for StubTopicVetoer {
    fn should_veto(&self, _topic: Ustr, _payload: &Payload) -> bool {
        self.veto
    }
}

/// Exception sink that counts captured panics.
#[derive(Debug, Default)]
pub struct CountingSink {
    count: AtomicUsize,
}

impl CountingSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

impl ExceptionSink for CountingSink {
    fn handle_exception(&self, _thrown: &SubscriberThrew) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}

/// Proxy forwarding events to a weakly-tracked real subscriber.
pub struct StubProxy {
    target: Weak<CountingSubscriber>,
    strength: ReferenceStrength,
    unsubscribed: AtomicBool,
}

impl StubProxy {
    /// Creates a proxy tracking `target` with the given internal strength.
    #[must_use]
    pub fn new(target: &Arc<CountingSubscriber>, strength: ReferenceStrength) -> Self {
        Self {
            target: Arc::downgrade(target),
            strength,
            unsubscribed: AtomicBool::new(false),
        }
    }

    /// Returns whether the proxy was notified of its removal.
    #[must_use]
    pub fn was_unsubscribed(&self) -> bool {
        self.unsubscribed.load(Ordering::SeqCst)
    }
}

impl EventSubscriber for StubProxy {
    fn on_event(&self, event: &Arc<dyn Event>) {
        if let Some(target) = self.target.upgrade() {
            target.on_event(event);
        }
    }
}

impl ProxyControl for StubProxy {
    fn proxied(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.target
            .upgrade()
            .map(|target| target as Arc<dyn Any + Send + Sync>)
    }

    fn strength(&self) -> ReferenceStrength {
        self.strength
    }

    fn on_unsubscribed(&self) {
        self.unsubscribed.store(true, Ordering::SeqCst);
    }
}

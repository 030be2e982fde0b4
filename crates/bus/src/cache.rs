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

//! Bounded recency caches for published events and topic payloads.
//!
//! Each cached key holds a `VecDeque` with the newest entry at the front,
//! trimmed to its effective cap on insert. Effective caps resolve through the
//! configuration tables: exact key first, then inheritance (superclass chain,
//! then declared interfaces in declaration order) for classes, or the first
//! matching pattern cap (iteration order unspecified) for topics, then the
//! default. Resolutions are memoized; any cap write marks the memo dirty and
//! it rebuilds lazily on the next read.
//!
//! Setting a cap to 0 drops an existing buffer on the next publish touching
//! that key. The whole cache lives behind a single mutex owned by the
//! service.

use std::{collections::VecDeque, sync::Arc};

use ahash::AHashMap;
use indexmap::IndexMap;
use ustr::Ustr;

use crate::{
    events::{ClassKey, Event, EventClass, Payload},
    matching::PatternKey,
};

#[derive(Default)]
pub(crate) struct EventCache {
    default_cap: usize,
    class_caps: IndexMap<ClassKey, usize>,
    topic_caps: IndexMap<Ustr, usize>,
    pattern_caps: AHashMap<PatternKey, usize>,
    resolved_class_caps: AHashMap<ClassKey, usize>,
    resolved_topic_caps: AHashMap<Ustr, usize>,
    class_caps_dirty: bool,
    topic_caps_dirty: bool,
    class_events: AHashMap<ClassKey, VecDeque<Arc<dyn Event>>>,
    topic_payloads: AHashMap<Ustr, VecDeque<Payload>>,
}

impl EventCache {
    pub fn new(default_cap: usize) -> Self {
        Self {
            default_cap,
            ..Default::default()
        }
    }

    // -- Cap configuration -------------------------------------------------

    pub fn default_cap(&self) -> usize {
        self.default_cap
    }

    pub fn set_default_cap(&mut self, cap: usize) {
        self.default_cap = cap;
        self.class_caps_dirty = true;
        self.topic_caps_dirty = true;
    }

    /// Sets the cap for a class key. Interface descriptors are accepted and
    /// take effect through inheritance resolution.
    pub fn set_class_cap(&mut self, class: &'static EventClass, cap: usize) {
        self.class_caps.insert(ClassKey::new(class), cap);
        self.class_caps_dirty = true;
    }

    pub fn set_topic_cap(&mut self, topic: Ustr, cap: usize) {
        self.topic_caps.insert(topic, cap);
        self.topic_caps_dirty = true;
    }

    pub fn set_pattern_cap(&mut self, pattern: PatternKey, cap: usize) {
        self.pattern_caps.insert(pattern, cap);
        self.topic_caps_dirty = true;
    }

    /// Resolves the effective cap for an event class, memoizing the result.
    pub fn resolve_class_cap(&mut self, class: &'static EventClass) -> usize {
        if self.class_caps_dirty {
            self.resolved_class_caps.clear();
            self.class_caps_dirty = false;
        }

        let key = ClassKey::new(class);
        if let Some(&cap) = self.resolved_class_caps.get(&key) {
            return cap;
        }

        let cap = self.lookup_class_cap(class);
        self.resolved_class_caps.insert(key, cap);
        cap
    }

    fn lookup_class_cap(&self, class: &'static EventClass) -> usize {
        if let Some(&cap) = self.class_caps.get(&ClassKey::new(class)) {
            return cap;
        }
        for ancestor in class.ancestors() {
            if let Some(&cap) = self.class_caps.get(&ClassKey::new(ancestor)) {
                return cap;
            }
        }
        for &iface in class.declared_interfaces() {
            if let Some(&cap) = self.class_caps.get(&ClassKey::new(iface)) {
                return cap;
            }
        }
        self.default_cap
    }

    /// Resolves the effective cap for a topic, memoizing the result.
    pub fn resolve_topic_cap(&mut self, topic: Ustr) -> usize {
        if self.topic_caps_dirty {
            self.resolved_topic_caps.clear();
            self.topic_caps_dirty = false;
        }

        if let Some(&cap) = self.resolved_topic_caps.get(&topic) {
            return cap;
        }

        let cap = self.lookup_topic_cap(topic);
        self.resolved_topic_caps.insert(topic, cap);
        cap
    }

    fn lookup_topic_cap(&self, topic: Ustr) -> usize {
        if let Some(&cap) = self.topic_caps.get(&topic) {
            return cap;
        }
        // First matching pattern wins; iteration order is unspecified.
        for (pattern, &cap) in &self.pattern_caps {
            if pattern.matches(topic.as_str()) {
                return cap;
            }
        }
        self.default_cap
    }

    // -- Insertion ---------------------------------------------------------

    /// Caches an event under its class key, trimming to the effective cap.
    /// A cap of 0 drops any existing buffer for the key instead.
    pub fn insert_event(&mut self, class: &'static EventClass, event: Arc<dyn Event>) {
        let cap = self.resolve_class_cap(class);
        let key = ClassKey::new(class);
        if cap == 0 {
            self.class_events.remove(&key);
            return;
        }

        let buffer = self.class_events.entry(key).or_default();
        buffer.push_front(event);
        buffer.truncate(cap);
    }

    /// Caches a payload under its topic, trimming to the effective cap.
    pub fn insert_topic_payload(&mut self, topic: Ustr, payload: Payload) {
        let cap = self.resolve_topic_cap(topic);
        if cap == 0 {
            self.topic_payloads.remove(&topic);
            return;
        }

        let buffer = self.topic_payloads.entry(topic).or_default();
        buffer.push_front(payload);
        buffer.truncate(cap);
    }

    // -- Reads -------------------------------------------------------------

    pub fn last_event(&self, class: &'static EventClass) -> Option<Arc<dyn Event>> {
        self.class_events
            .get(&ClassKey::new(class))
            .and_then(|buffer| buffer.front().cloned())
    }

    /// Returns a defensive copy of the cached events, newest first.
    pub fn cached_events(&self, class: &'static EventClass) -> Vec<Arc<dyn Event>> {
        self.class_events
            .get(&ClassKey::new(class))
            .map(|buffer| buffer.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn last_topic_payload(&self, topic: Ustr) -> Option<Payload> {
        self.topic_payloads
            .get(&topic)
            .and_then(|buffer| buffer.front().cloned())
    }

    /// Returns a defensive copy of the cached payloads, newest first.
    pub fn cached_topic_payloads(&self, topic: Ustr) -> Vec<Payload> {
        self.topic_payloads
            .get(&topic)
            .map(|buffer| buffer.iter().cloned().collect())
            .unwrap_or_default()
    }

    // -- Clearing ----------------------------------------------------------

    /// Drops every cached buffer. Cap configuration is unaffected.
    pub fn clear(&mut self) {
        self.class_events.clear();
        self.topic_payloads.clear();
    }

    /// Drops buffers whose class key is `class` or a subclass of it.
    pub fn clear_class(&mut self, class: &'static EventClass) {
        self.class_events
            .retain(|key, _| !class.is_assignable_from(key.get()));
    }

    /// Drops the buffer for an exact topic.
    pub fn clear_topic(&mut self, topic: Ustr) {
        self.topic_payloads.remove(&topic);
    }

    /// Drops buffers whose topic matches the pattern.
    pub fn clear_topic_matching(&mut self, pattern: &PatternKey) {
        self.topic_payloads
            .retain(|topic, _| !pattern.matches(topic.as_str()));
    }
}

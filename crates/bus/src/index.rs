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

//! The subscriber index: nine keyed maps of ordered reference-cell lists.
//!
//! Five key kinds index subscribers (class-hierarchical, class-exact, generic
//! type, topic-exact, topic-pattern); all but generic type also index
//! vetoers. Exact-keyed maps are `IndexMap` so iteration follows key
//! insertion; the pattern maps are hash maps whose iteration order among
//! multiple matching patterns is deliberately unspecified.
//!
//! Per-key lists are ordered. A duplicate subscribe does not add a second
//! cell: the existing cell (compared by target identity, with weak and proxy
//! cells resolved to their real target) is removed and the new cell appended,
//! refreshing the target's delivery position to the tail. Every walk
//! opportunistically evicts stale cells, and the weak/proxy counter tracks
//! how many resident cells the reaper is responsible for.
//!
//! The whole index lives behind a single mutex owned by the service; nothing
//! here calls back into subscriber code.

use std::sync::Arc;

use ahash::AHashMap;
use indexmap::IndexMap;
use smallvec::SmallVec;
use ustr::Ustr;

use crate::{
    cell::{SubscriberCell, data_addr},
    events::{ClassKey, EventClass, GenericType},
    matching::{PatternKey, class_matches_hierarchical, generic_type_matches},
    subscriber::{EventSubscriber, EventVetoer, TopicSubscriber, TopicVetoer},
};

/// Inline snapshot capacity before heap allocation.
pub(crate) const SNAPSHOT_BUFFER_CAP: usize = 16;

/// An immutable, ordered set of live dispatch targets.
pub(crate) type Snapshot<S> = SmallVec<[Arc<S>; SNAPSHOT_BUFFER_CAP]>;

type CellList<S> = Vec<SubscriberCell<S>>;

/// Removes stale cells and appends `cell`, de-duplicating by resolved target
/// identity. Returns `true` when the target was not already present.
fn insert_cell<S: ?Sized>(
    list: &mut CellList<S>,
    cell: SubscriberCell<S>,
    weak_count: &mut usize,
) -> bool {
    let identity = cell.identity();
    let mut was_present = false;
    let mut i = 0;
    while i < list.len() {
        if list[i].live().is_none() {
            evict(list, i, weak_count);
        } else if identity.is_some() && list[i].identity() == identity {
            // Relocation, not removal: no proxy notification.
            let prior = list.remove(i);
            dec_weakish(&prior, weak_count);
            was_present = true;
        } else {
            i += 1;
        }
    }

    if cell.is_weakish() {
        *weak_count += 1;
    }
    list.push(cell);
    !was_present
}

/// Removes the first cell whose live dispatch target has the given address,
/// evicting stale cells along the way. Returns whether a removal occurred.
fn remove_cell<S: ?Sized>(list: &mut CellList<S>, addr: usize, weak_count: &mut usize) -> bool {
    let mut removed = false;
    let mut i = 0;
    while i < list.len() {
        match list[i].live() {
            None => evict(list, i, weak_count),
            Some(live) if !removed && data_addr(&live) == addr => {
                evict(list, i, weak_count);
                removed = true;
            }
            Some(_) => i += 1,
        }
    }
    removed
}

/// Removes the first cell whose *resolved* identity has the given address,
/// matching proxy cells by their proxied real target.
fn remove_cell_by_identity<S: ?Sized>(
    list: &mut CellList<S>,
    addr: usize,
    weak_count: &mut usize,
) -> bool {
    let mut removed = false;
    let mut i = 0;
    while i < list.len() {
        if list[i].live().is_none() {
            evict(list, i, weak_count);
        } else if !removed && list[i].identity() == Some(addr) {
            evict(list, i, weak_count);
            removed = true;
        } else {
            i += 1;
        }
    }
    removed
}

/// Copies live targets into `out` in list order, scrubbing dead cells out of
/// the underlying list.
fn snapshot_cells<S: ?Sized>(list: &mut CellList<S>, weak_count: &mut usize, out: &mut Snapshot<S>) {
    let mut i = 0;
    while i < list.len() {
        match list[i].live() {
            Some(target) => {
                out.push(target);
                i += 1;
            }
            None => evict(list, i, weak_count),
        }
    }
}

/// Removes every stale cell from the list, returning how many were removed.
fn scrub_list<S: ?Sized>(list: &mut CellList<S>, weak_count: &mut usize) -> usize {
    let mut removed = 0;
    let mut i = 0;
    while i < list.len() {
        if list[i].live().is_none() {
            evict(list, i, weak_count);
            removed += 1;
        } else {
            i += 1;
        }
    }
    removed
}

fn evict<S: ?Sized>(list: &mut CellList<S>, i: usize, weak_count: &mut usize) {
    let cell = list.remove(i);
    cell.notify_unsubscribed();
    dec_weakish(&cell, weak_count);
}

fn dec_weakish<S: ?Sized>(cell: &SubscriberCell<S>, weak_count: &mut usize) {
    if cell.is_weakish() {
        *weak_count = weak_count.saturating_sub(1);
    }
}

fn drop_all<S: ?Sized>(list: &mut CellList<S>) {
    for cell in list.drain(..) {
        cell.notify_unsubscribed();
    }
}

/// The nine keyed subscription maps plus the reaper counter.
#[derive(Default)]
pub(crate) struct SubscriberIndex {
    class_subs: IndexMap<ClassKey, CellList<dyn EventSubscriber>>,
    class_exact_subs: IndexMap<ClassKey, CellList<dyn EventSubscriber>>,
    type_subs: IndexMap<GenericType, CellList<dyn EventSubscriber>>,
    topic_subs: IndexMap<Ustr, CellList<dyn TopicSubscriber>>,
    pattern_subs: AHashMap<PatternKey, CellList<dyn TopicSubscriber>>,
    class_vetoers: IndexMap<ClassKey, CellList<dyn EventVetoer>>,
    class_exact_vetoers: IndexMap<ClassKey, CellList<dyn EventVetoer>>,
    topic_vetoers: IndexMap<Ustr, CellList<dyn TopicVetoer>>,
    pattern_vetoers: AHashMap<PatternKey, CellList<dyn TopicVetoer>>,
    weak_or_proxy_count: usize,
}

impl SubscriberIndex {
    /// Number of resident weak and weakly-proxied cells across all maps.
    pub fn weak_or_proxy_count(&self) -> usize {
        self.weak_or_proxy_count
    }

    // -- Subscribe ---------------------------------------------------------

    pub fn subscribe_class(
        &mut self,
        class: &'static EventClass,
        cell: SubscriberCell<dyn EventSubscriber>,
    ) -> bool {
        insert_cell(
            self.class_subs.entry(ClassKey::new(class)).or_default(),
            cell,
            &mut self.weak_or_proxy_count,
        )
    }

    pub fn subscribe_class_exact(
        &mut self,
        class: &'static EventClass,
        cell: SubscriberCell<dyn EventSubscriber>,
    ) -> bool {
        insert_cell(
            self.class_exact_subs
                .entry(ClassKey::new(class))
                .or_default(),
            cell,
            &mut self.weak_or_proxy_count,
        )
    }

    pub fn subscribe_type(
        &mut self,
        ty: GenericType,
        cell: SubscriberCell<dyn EventSubscriber>,
    ) -> bool {
        insert_cell(
            self.type_subs.entry(ty).or_default(),
            cell,
            &mut self.weak_or_proxy_count,
        )
    }

    pub fn subscribe_topic(
        &mut self,
        topic: Ustr,
        cell: SubscriberCell<dyn TopicSubscriber>,
    ) -> bool {
        insert_cell(
            self.topic_subs.entry(topic).or_default(),
            cell,
            &mut self.weak_or_proxy_count,
        )
    }

    pub fn subscribe_pattern(
        &mut self,
        pattern: PatternKey,
        cell: SubscriberCell<dyn TopicSubscriber>,
    ) -> bool {
        insert_cell(
            self.pattern_subs.entry(pattern).or_default(),
            cell,
            &mut self.weak_or_proxy_count,
        )
    }

    pub fn subscribe_class_veto(
        &mut self,
        class: &'static EventClass,
        cell: SubscriberCell<dyn EventVetoer>,
    ) -> bool {
        insert_cell(
            self.class_vetoers.entry(ClassKey::new(class)).or_default(),
            cell,
            &mut self.weak_or_proxy_count,
        )
    }

    pub fn subscribe_class_exact_veto(
        &mut self,
        class: &'static EventClass,
        cell: SubscriberCell<dyn EventVetoer>,
    ) -> bool {
        insert_cell(
            self.class_exact_vetoers
                .entry(ClassKey::new(class))
                .or_default(),
            cell,
            &mut self.weak_or_proxy_count,
        )
    }

    pub fn subscribe_topic_veto(
        &mut self,
        topic: Ustr,
        cell: SubscriberCell<dyn TopicVetoer>,
    ) -> bool {
        insert_cell(
            self.topic_vetoers.entry(topic).or_default(),
            cell,
            &mut self.weak_or_proxy_count,
        )
    }

    pub fn subscribe_pattern_veto(
        &mut self,
        pattern: PatternKey,
        cell: SubscriberCell<dyn TopicVetoer>,
    ) -> bool {
        insert_cell(
            self.pattern_vetoers.entry(pattern).or_default(),
            cell,
            &mut self.weak_or_proxy_count,
        )
    }

    // -- Unsubscribe -------------------------------------------------------

    pub fn unsubscribe_class(&mut self, class: &'static EventClass, addr: usize) -> bool {
        self.class_subs
            .get_mut(&ClassKey::new(class))
            .is_some_and(|list| remove_cell(list, addr, &mut self.weak_or_proxy_count))
    }

    pub fn unsubscribe_class_exact(&mut self, class: &'static EventClass, addr: usize) -> bool {
        self.class_exact_subs
            .get_mut(&ClassKey::new(class))
            .is_some_and(|list| remove_cell(list, addr, &mut self.weak_or_proxy_count))
    }

    pub fn unsubscribe_type(&mut self, ty: &GenericType, addr: usize) -> bool {
        self.type_subs
            .get_mut(ty)
            .is_some_and(|list| remove_cell(list, addr, &mut self.weak_or_proxy_count))
    }

    pub fn unsubscribe_topic(&mut self, topic: Ustr, addr: usize) -> bool {
        self.topic_subs
            .get_mut(&topic)
            .is_some_and(|list| remove_cell(list, addr, &mut self.weak_or_proxy_count))
    }

    pub fn unsubscribe_pattern(&mut self, pattern: &str, addr: usize) -> bool {
        self.pattern_subs
            .get_mut(pattern)
            .is_some_and(|list| remove_cell(list, addr, &mut self.weak_or_proxy_count))
    }

    pub fn unsubscribe_class_veto(&mut self, class: &'static EventClass, addr: usize) -> bool {
        self.class_vetoers
            .get_mut(&ClassKey::new(class))
            .is_some_and(|list| remove_cell(list, addr, &mut self.weak_or_proxy_count))
    }

    pub fn unsubscribe_class_exact_veto(
        &mut self,
        class: &'static EventClass,
        addr: usize,
    ) -> bool {
        self.class_exact_vetoers
            .get_mut(&ClassKey::new(class))
            .is_some_and(|list| remove_cell(list, addr, &mut self.weak_or_proxy_count))
    }

    pub fn unsubscribe_topic_veto(&mut self, topic: Ustr, addr: usize) -> bool {
        self.topic_vetoers
            .get_mut(&topic)
            .is_some_and(|list| remove_cell(list, addr, &mut self.weak_or_proxy_count))
    }

    pub fn unsubscribe_pattern_veto(&mut self, pattern: &str, addr: usize) -> bool {
        self.pattern_vetoers
            .get_mut(pattern)
            .is_some_and(|list| remove_cell(list, addr, &mut self.weak_or_proxy_count))
    }

    // -- Unsubscribe by resolved target (matches proxied targets) ----------

    pub fn unsubscribe_class_target(&mut self, class: &'static EventClass, addr: usize) -> bool {
        self.class_subs
            .get_mut(&ClassKey::new(class))
            .is_some_and(|list| remove_cell_by_identity(list, addr, &mut self.weak_or_proxy_count))
    }

    pub fn unsubscribe_class_exact_target(
        &mut self,
        class: &'static EventClass,
        addr: usize,
    ) -> bool {
        self.class_exact_subs
            .get_mut(&ClassKey::new(class))
            .is_some_and(|list| remove_cell_by_identity(list, addr, &mut self.weak_or_proxy_count))
    }

    pub fn unsubscribe_type_target(&mut self, ty: &GenericType, addr: usize) -> bool {
        self.type_subs
            .get_mut(ty)
            .is_some_and(|list| remove_cell_by_identity(list, addr, &mut self.weak_or_proxy_count))
    }

    pub fn unsubscribe_topic_target(&mut self, topic: Ustr, addr: usize) -> bool {
        self.topic_subs
            .get_mut(&topic)
            .is_some_and(|list| remove_cell_by_identity(list, addr, &mut self.weak_or_proxy_count))
    }

    pub fn unsubscribe_pattern_target(&mut self, pattern: &str, addr: usize) -> bool {
        self.pattern_subs
            .get_mut(pattern)
            .is_some_and(|list| remove_cell_by_identity(list, addr, &mut self.weak_or_proxy_count))
    }

    // -- Lookup & snapshot -------------------------------------------------

    /// Snapshot of subscribers for a published event class: exact matches
    /// first, then hierarchical matches in key-insertion order.
    pub fn subscribers_for_class(
        &mut self,
        class: &'static EventClass,
    ) -> Snapshot<dyn EventSubscriber> {
        let mut out = Snapshot::new();
        if let Some(list) = self.class_exact_subs.get_mut(&ClassKey::new(class)) {
            snapshot_cells(list, &mut self.weak_or_proxy_count, &mut out);
        }
        for (key, list) in &mut self.class_subs {
            if class_matches_hierarchical(key.get(), class) {
                snapshot_cells(list, &mut self.weak_or_proxy_count, &mut out);
            }
        }
        out
    }

    /// Snapshot of subscribers whose generic type key matches the published
    /// type expression.
    pub fn subscribers_for_type(
        &mut self,
        published: &GenericType,
    ) -> Snapshot<dyn EventSubscriber> {
        let mut out = Snapshot::new();
        for (key, list) in &mut self.type_subs {
            if generic_type_matches(key, published) {
                snapshot_cells(list, &mut self.weak_or_proxy_count, &mut out);
            }
        }
        out
    }

    /// Snapshot of subscribers for a published topic: exact matches first,
    /// then pattern matches in unspecified order.
    pub fn subscribers_for_topic(&mut self, topic: Ustr) -> Snapshot<dyn TopicSubscriber> {
        let mut out = Snapshot::new();
        if let Some(list) = self.topic_subs.get_mut(&topic) {
            snapshot_cells(list, &mut self.weak_or_proxy_count, &mut out);
        }
        for (pattern, list) in &mut self.pattern_subs {
            if pattern.matches(topic.as_str()) {
                snapshot_cells(list, &mut self.weak_or_proxy_count, &mut out);
            }
        }
        out
    }

    /// Snapshot of vetoers for a published event class.
    pub fn vetoers_for_class(&mut self, class: &'static EventClass) -> Snapshot<dyn EventVetoer> {
        let mut out = Snapshot::new();
        if let Some(list) = self.class_exact_vetoers.get_mut(&ClassKey::new(class)) {
            snapshot_cells(list, &mut self.weak_or_proxy_count, &mut out);
        }
        for (key, list) in &mut self.class_vetoers {
            if class_matches_hierarchical(key.get(), class) {
                snapshot_cells(list, &mut self.weak_or_proxy_count, &mut out);
            }
        }
        out
    }

    /// Snapshot of vetoers for a published topic.
    pub fn vetoers_for_topic(&mut self, topic: Ustr) -> Snapshot<dyn TopicVetoer> {
        let mut out = Snapshot::new();
        if let Some(list) = self.topic_vetoers.get_mut(&topic) {
            snapshot_cells(list, &mut self.weak_or_proxy_count, &mut out);
        }
        for (pattern, list) in &mut self.pattern_vetoers {
            if pattern.matches(topic.as_str()) {
                snapshot_cells(list, &mut self.weak_or_proxy_count, &mut out);
            }
        }
        out
    }

    // -- Maintenance -------------------------------------------------------

    /// Removes every stale cell across all nine maps, returning the count.
    pub fn scrub_stale(&mut self) -> usize {
        let count = &mut self.weak_or_proxy_count;
        let mut removed = 0;
        for list in self.class_subs.values_mut() {
            removed += scrub_list(list, count);
        }
        for list in self.class_exact_subs.values_mut() {
            removed += scrub_list(list, count);
        }
        for list in self.type_subs.values_mut() {
            removed += scrub_list(list, count);
        }
        for list in self.topic_subs.values_mut() {
            removed += scrub_list(list, count);
        }
        for list in self.pattern_subs.values_mut() {
            removed += scrub_list(list, count);
        }
        for list in self.class_vetoers.values_mut() {
            removed += scrub_list(list, count);
        }
        for list in self.class_exact_vetoers.values_mut() {
            removed += scrub_list(list, count);
        }
        for list in self.topic_vetoers.values_mut() {
            removed += scrub_list(list, count);
        }
        for list in self.pattern_vetoers.values_mut() {
            removed += scrub_list(list, count);
        }
        removed
    }

    /// Empties every map, notifying proxies, and zeroes the counter.
    pub fn clear_all(&mut self) {
        for list in self.class_subs.values_mut() {
            drop_all(list);
        }
        for list in self.class_exact_subs.values_mut() {
            drop_all(list);
        }
        for list in self.type_subs.values_mut() {
            drop_all(list);
        }
        for list in self.topic_subs.values_mut() {
            drop_all(list);
        }
        for list in self.pattern_subs.values_mut() {
            drop_all(list);
        }
        for list in self.class_vetoers.values_mut() {
            drop_all(list);
        }
        for list in self.class_exact_vetoers.values_mut() {
            drop_all(list);
        }
        for list in self.topic_vetoers.values_mut() {
            drop_all(list);
        }
        for list in self.pattern_vetoers.values_mut() {
            drop_all(list);
        }
        self.class_subs.clear();
        self.class_exact_subs.clear();
        self.type_subs.clear();
        self.topic_subs.clear();
        self.pattern_subs.clear();
        self.class_vetoers.clear();
        self.class_exact_vetoers.clear();
        self.topic_vetoers.clear();
        self.pattern_vetoers.clear();
        self.weak_or_proxy_count = 0;
    }

    // -- Introspection -----------------------------------------------------

    /// Returns the exactly-subscribed topic names.
    pub fn topics(&self) -> Vec<Ustr> {
        self.topic_subs
            .iter()
            .filter(|(_, list)| !list.is_empty())
            .map(|(topic, _)| *topic)
            .collect()
    }

    /// Returns the subscribed pattern sources.
    pub fn patterns(&self) -> Vec<Ustr> {
        self.pattern_subs
            .iter()
            .filter(|(_, list)| !list.is_empty())
            .map(|(pattern, _)| Ustr::from(pattern.as_str()))
            .collect()
    }
}

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

//! Event class descriptors, generic type expressions, and built-in events.
//!
//! Rust has no class inheritance, so hierarchy-aware dispatch works off
//! explicit runtime descriptors: each event type binds itself to a `'static`
//! [`EventClass`] forming a tree of superclasses and declared interfaces.
//! Descriptor identity is pointer identity, which makes class keys cheap to
//! hash and compare.
//!
//! Generic subscriptions use [`GenericType`] expressions over the same
//! descriptors, with wildcard arguments carrying upper and lower bounds.

use std::{
    any::Any,
    fmt::{Debug, Display},
    hash::{Hash, Hasher},
    ptr,
    sync::Arc,
    time::Duration,
};

use ustr::Ustr;

use crate::enums::{ClassKind, CleanupPhase, TimingSource};

/// Payload type delivered to topic subscribers.
pub type Payload = Arc<dyn Any + Send + Sync>;

/// Runtime descriptor for an event class.
///
/// Declared as `static` items so that identity is the address of the
/// descriptor:
///
/// ```
/// use courier_bus::events::EventClass;
///
/// static ORDER_EVENT: EventClass = EventClass::concrete("OrderEvent", None, &[]);
/// static FILL_EVENT: EventClass = EventClass::concrete("FillEvent", Some(&ORDER_EVENT), &[]);
///
/// assert!(ORDER_EVENT.is_assignable_from(&FILL_EVENT));
/// assert!(!FILL_EVENT.is_assignable_from(&ORDER_EVENT));
/// ```
pub struct EventClass {
    name: &'static str,
    parent: Option<&'static EventClass>,
    interfaces: &'static [&'static EventClass],
    kind: ClassKind,
}

impl EventClass {
    /// Creates a concrete class descriptor with an optional superclass and
    /// declared interfaces (in declaration order).
    #[must_use]
    pub const fn concrete(
        name: &'static str,
        parent: Option<&'static EventClass>,
        interfaces: &'static [&'static EventClass],
    ) -> Self {
        Self {
            name,
            parent,
            interfaces,
            kind: ClassKind::Concrete,
        }
    }

    /// Creates an interface descriptor, optionally extending other interfaces.
    #[must_use]
    pub const fn interface(name: &'static str, extends: &'static [&'static EventClass]) -> Self {
        Self {
            name,
            parent: None,
            interfaces: extends,
            kind: ClassKind::Interface,
        }
    }

    /// Returns the class name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Returns the superclass, if any.
    #[must_use]
    pub const fn parent(&self) -> Option<&'static EventClass> {
        self.parent
    }

    /// Returns the declared interfaces in declaration order.
    #[must_use]
    pub const fn declared_interfaces(&self) -> &'static [&'static EventClass] {
        self.interfaces
    }

    /// Returns the descriptor kind.
    #[must_use]
    pub const fn kind(&self) -> ClassKind {
        self.kind
    }

    /// Returns whether this descriptor is an interface.
    #[must_use]
    pub const fn is_interface(&self) -> bool {
        matches!(self.kind, ClassKind::Interface)
    }

    /// Iterates the superclass chain, nearest ancestor first, excluding `self`.
    pub fn ancestors(&self) -> impl Iterator<Item = &'static EventClass> {
        let mut cur = self.parent;
        std::iter::from_fn(move || {
            let next = cur?;
            cur = next.parent;
            Some(next)
        })
    }

    /// Returns whether a value of class `other` can stand in for this class:
    /// the classes are identical, this class is in `other`'s superclass chain,
    /// or this class is in `other`'s transitive interface closure.
    #[must_use]
    pub fn is_assignable_from(&self, other: &EventClass) -> bool {
        let mut cur = Some(other);
        while let Some(class) = cur {
            if ptr::eq(self, class) {
                return true;
            }
            if class
                .interfaces
                .iter()
                .any(|iface| self.is_assignable_from(iface))
            {
                return true;
            }
            cur = class.parent;
        }
        false
    }
}

impl Debug for EventClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct(stringify!(EventClass))
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish()
    }
}

impl Display for EventClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Hash/equality wrapper keying maps by descriptor pointer identity.
#[derive(Clone, Copy)]
pub struct ClassKey(&'static EventClass);

impl ClassKey {
    /// Creates a key for the given descriptor.
    #[must_use]
    pub const fn new(class: &'static EventClass) -> Self {
        Self(class)
    }

    /// Returns the wrapped descriptor.
    #[must_use]
    pub const fn get(&self) -> &'static EventClass {
        self.0
    }
}

impl From<&'static EventClass> for ClassKey {
    fn from(class: &'static EventClass) -> Self {
        Self(class)
    }
}

impl PartialEq for ClassKey {
    fn eq(&self, other: &Self) -> bool {
        ptr::eq(self.0, other.0)
    }
}

impl Eq for ClassKey {}

impl Hash for ClassKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        ptr::from_ref(self.0).addr().hash(state);
    }
}

impl Debug for ClassKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ClassKey({})", self.0.name)
    }
}

/// An event deliverable to class-based subscribers.
///
/// Implementors bind themselves to a `'static` [`EventClass`] descriptor;
/// `as_any` supports downcasting in typed subscriber adapters.
pub trait Event: Any + Send + Sync {
    /// Returns the class descriptor for this event instance.
    fn event_class(&self) -> &'static EventClass;

    /// Returns the event as `Any` for downcasting.
    fn as_any(&self) -> &(dyn Any + Send + Sync);
}

/// One argument of a [`GenericType`] expression.
#[derive(Clone)]
pub enum TypeArg {
    /// A concrete class argument.
    Concrete(&'static EventClass),
    /// A wildcard argument with upper (`? extends`) and lower (`? super`) bounds.
    Wildcard {
        upper: Vec<&'static EventClass>,
        lower: Vec<&'static EventClass>,
    },
}

impl TypeArg {
    /// Returns whether this argument is a wildcard.
    #[must_use]
    pub const fn is_wildcard(&self) -> bool {
        matches!(self, Self::Wildcard { .. })
    }
}

impl PartialEq for TypeArg {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Concrete(a), Self::Concrete(b)) => ptr::eq(*a, *b),
            (
                Self::Wildcard { upper: ua, lower: la },
                Self::Wildcard { upper: ub, lower: lb },
            ) => {
                ua.len() == ub.len()
                    && la.len() == lb.len()
                    && ua.iter().zip(ub).all(|(a, b)| ptr::eq(*a, *b))
                    && la.iter().zip(lb).all(|(a, b)| ptr::eq(*a, *b))
            }
            _ => false,
        }
    }
}

impl Eq for TypeArg {}

impl Hash for TypeArg {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::Concrete(c) => {
                0u8.hash(state);
                ptr::from_ref(*c).addr().hash(state);
            }
            Self::Wildcard { upper, lower } => {
                1u8.hash(state);
                for b in upper {
                    ptr::from_ref(*b).addr().hash(state);
                }
                u8::MAX.hash(state);
                for b in lower {
                    ptr::from_ref(*b).addr().hash(state);
                }
            }
        }
    }
}

impl Debug for TypeArg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Concrete(c) => write!(f, "{}", c.name()),
            Self::Wildcard { upper, lower } => {
                write!(f, "?")?;
                if !upper.is_empty() {
                    let names: Vec<&str> = upper.iter().map(|c| c.name()).collect();
                    write!(f, " extends {}", names.join(" & "))?;
                }
                if !lower.is_empty() {
                    let names: Vec<&str> = lower.iter().map(|c| c.name()).collect();
                    write!(f, " super {}", names.join(" & "))?;
                }
                Ok(())
            }
        }
    }
}

/// A parameterized type expression used as a generic subscription key.
///
/// Two expressions are equal when their raw classes are identical and their
/// arguments are structurally equal. Published expressions must not contain
/// wildcard arguments.
#[derive(Clone)]
pub struct GenericType {
    raw: &'static EventClass,
    args: Vec<TypeArg>,
}

impl PartialEq for GenericType {
    fn eq(&self, other: &Self) -> bool {
        ptr::eq(self.raw, other.raw) && self.args == other.args
    }
}

impl Eq for GenericType {}

impl Hash for GenericType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        ptr::from_ref(self.raw).addr().hash(state);
        self.args.hash(state);
    }
}

impl GenericType {
    /// Creates a parameterized type expression over the raw class.
    #[must_use]
    pub fn new(raw: &'static EventClass, args: Vec<TypeArg>) -> Self {
        Self { raw, args }
    }

    /// Returns the raw (unparameterized) class.
    #[must_use]
    pub const fn raw(&self) -> &'static EventClass {
        self.raw
    }

    /// Returns the type arguments.
    #[must_use]
    pub fn args(&self) -> &[TypeArg] {
        &self.args
    }

    /// Returns whether any argument is a wildcard.
    #[must_use]
    pub fn has_wildcards(&self) -> bool {
        self.args.iter().any(TypeArg::is_wildcard)
    }
}

impl Debug for GenericType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.raw.name())?;
        if !self.args.is_empty() {
            let args: Vec<String> = self.args.iter().map(|a| format!("{a:?}")).collect();
            write!(f, "<{}>", args.join(", "))?;
        }
        Ok(())
    }
}

impl Display for GenericType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Class descriptor for [`CleanupEvent`].
pub static CLEANUP_EVENT: EventClass = EventClass::concrete("CleanupEvent", None, &[]);

/// Progress marker published by the stale-reference reaper.
#[derive(Clone, Debug)]
pub struct CleanupEvent {
    /// The sweep phase this event marks.
    pub phase: CleanupPhase,
    /// Number of stale cells removed; only set for the finished phase.
    pub stale_removed: Option<usize>,
}

impl Event for CleanupEvent {
    fn event_class(&self) -> &'static EventClass {
        &CLEANUP_EVENT
    }

    fn as_any(&self) -> &(dyn Any + Send + Sync) {
        self
    }
}

impl Display for CleanupEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}(phase={}", stringify!(CleanupEvent), self.phase)?;
        if let Some(removed) = self.stale_removed {
            write!(f, ", stale_removed={removed}")?;
        }
        write!(f, ")")
    }
}

/// Class descriptor for [`SubscriberTimingEvent`].
pub static SUBSCRIBER_TIMING_EVENT: EventClass =
    EventClass::concrete("SubscriberTimingEvent", None, &[]);

/// Published when a subscriber or vetoer call exceeds the timing threshold.
///
/// A post-hoc signal only: the offending callback already ran to completion
/// and was not interrupted.
#[derive(Clone, Debug)]
pub struct SubscriberTimingEvent {
    /// Which callback kind was measured.
    pub source: TimingSource,
    /// Wall-clock start, milliseconds since the UNIX epoch.
    pub start_ms: u64,
    /// Wall-clock end, milliseconds since the UNIX epoch.
    pub end_ms: u64,
    /// Measured call duration.
    pub elapsed: Duration,
    /// The configured threshold that was exceeded.
    pub threshold: Duration,
    /// The published event class, for class-based publications.
    pub event_class: Option<&'static EventClass>,
    /// The published topic, for topic-based publications.
    pub topic: Option<Ustr>,
    /// Pointer-formatted description of the offending subscriber or vetoer.
    pub listener: String,
}

impl Event for SubscriberTimingEvent {
    fn event_class(&self) -> &'static EventClass {
        &SUBSCRIBER_TIMING_EVENT
    }

    fn as_any(&self) -> &(dyn Any + Send + Sync) {
        self
    }
}

impl Display for SubscriberTimingEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let subject = match (self.event_class, self.topic) {
            (Some(class), _) => format!("event class `{}`", class.name()),
            (None, Some(topic)) => format!("topic `{topic}`"),
            (None, None) => "unknown publication".to_string(),
        };
        write!(
            f,
            "{} {} exceeded {:?} handling {subject}: took {:?} ({} -> {})",
            self.source, self.listener, self.threshold, self.elapsed, self.start_ms, self.end_ms,
        )
    }
}

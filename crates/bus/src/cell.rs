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

//! Reference cells: the uniform handle subscriptions use to hold a target.
//!
//! A cell either holds its target strongly, weakly (not extending its
//! lifetime), or through a proxy that forwards delivery to a real target it
//! tracks weakly itself. Dispatch and de-duplication code consume cells only
//! through [`SubscriberCell::live`] and the identity accessors, so stale
//! handling is uniform across all three shapes.

use std::{
    any::Any,
    fmt::Debug,
    sync::{Arc, Weak},
};

use crate::enums::ReferenceStrength;

/// Contract a proxy subscriber exposes to the index.
///
/// The proxy itself is the dispatch target; the control surface reports
/// whether the *real* target behind it is still reachable, how strongly the
/// proxy holds it, and receives a notification when the proxy's subscription
/// is removed.
pub trait ProxyControl: Send + Sync + 'static {
    /// Returns the real target behind the proxy, if still reachable.
    fn proxied(&self) -> Option<Arc<dyn Any + Send + Sync>>;

    /// Returns how the proxy holds its real target. Weakly-held targets count
    /// toward the reaper's stale-tracking threshold.
    fn strength(&self) -> ReferenceStrength;

    /// Called when the proxy's subscription is removed from an index.
    fn on_unsubscribed(&self) {}
}

/// Returns the address of an `Arc`'s data allocation, usable as an identity.
pub(crate) fn data_addr<T: ?Sized>(arc: &Arc<T>) -> usize {
    Arc::as_ptr(arc).cast::<()>().addr()
}

/// A subscription's handle on its target.
pub enum SubscriberCell<S: ?Sized> {
    /// Holds the target strongly for the life of the subscription.
    Strong(Arc<S>),
    /// Holds the target weakly; goes stale once the last strong reference
    /// elsewhere is dropped.
    Weak(Weak<S>),
    /// Holds a proxy strongly; the proxy tracks the real target itself.
    Proxy {
        subscriber: Arc<S>,
        control: Arc<dyn ProxyControl>,
    },
}

impl<S: ?Sized> SubscriberCell<S> {
    /// Creates a strong cell.
    pub const fn strong(target: Arc<S>) -> Self {
        Self::Strong(target)
    }

    /// Creates a weak cell over the target.
    pub fn weak(target: &Arc<S>) -> Self {
        Self::Weak(Arc::downgrade(target))
    }

    /// Creates a proxy cell; `subscriber` and `control` must be the same
    /// underlying object coerced to its two capability traits.
    pub const fn proxy(subscriber: Arc<S>, control: Arc<dyn ProxyControl>) -> Self {
        Self::Proxy {
            subscriber,
            control,
        }
    }

    /// Returns the live dispatch target, or `None` when the cell is stale.
    ///
    /// For proxy cells the proxy itself is the dispatch target; the cell is
    /// stale once the proxied real target has been collected.
    pub fn live(&self) -> Option<Arc<S>> {
        match self {
            Self::Strong(target) => Some(target.clone()),
            Self::Weak(target) => target.upgrade(),
            Self::Proxy {
                subscriber,
                control,
            } => control.proxied().map(|_| subscriber.clone()),
        }
    }

    /// Returns whether this cell counts toward the reaper's stale tracking:
    /// weak cells, and proxy cells holding their real target weakly.
    pub fn is_weakish(&self) -> bool {
        match self {
            Self::Strong(_) => false,
            Self::Weak(_) => true,
            Self::Proxy { control, .. } => control.strength() == ReferenceStrength::Weak,
        }
    }

    /// Returns the de-duplication identity: the address of the underlying
    /// target, with proxy cells resolved through to the *real* target.
    ///
    /// `None` when the cell is stale.
    pub fn identity(&self) -> Option<usize> {
        match self {
            Self::Strong(target) => Some(data_addr(target)),
            Self::Weak(target) => target.upgrade().map(|t| data_addr(&t)),
            Self::Proxy { control, .. } => control.proxied().map(|t| data_addr(&t)),
        }
    }

    /// Notifies a proxy cell that its subscription has been removed.
    pub fn notify_unsubscribed(&self) {
        if let Self::Proxy { control, .. } = self {
            control.on_unsubscribed();
        }
    }
}

impl<S: ?Sized> Debug for SubscriberCell<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Strong(target) => write!(f, "Strong({:p})", Arc::as_ptr(target)),
            Self::Weak(target) => write!(f, "Weak({:p})", target.as_ptr()),
            Self::Proxy { subscriber, .. } => write!(f, "Proxy({:p})", Arc::as_ptr(subscriber)),
        }
    }
}

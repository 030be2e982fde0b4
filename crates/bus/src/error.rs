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

//! Error types and the subscriber exception sink.
//!
//! Argument-validation failures propagate to the caller as [`ServiceError`].
//! Panics escaping subscriber or vetoer callbacks are a different animal:
//! they are captured as [`SubscriberThrew`] records and routed through the
//! [`ExceptionSink`] seam, never propagated, so one failing subscriber cannot
//! abort a publication for the rest.

use std::{any::Any, backtrace::Backtrace, fmt::Debug};

use thiserror::Error;

/// Errors raised at the event service API boundary.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// An argument failed validation (blank topic, malformed pattern, weakly
    /// held proxy, interface key passed to a cache read, wildcard in a
    /// published type, timing logger without a threshold).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// A registry slot was already occupied by a non-null value.
    #[error("already present: {0}")]
    AlreadyPresent(String),
}

impl ServiceError {
    /// Wraps a correctness-check failure as an invalid-argument error.
    pub(crate) fn invalid(e: anyhow::Error) -> Self {
        Self::InvalidArgument(e.to_string())
    }
}

/// Record of a panic that escaped a subscriber or vetoer callback.
///
/// The captured payload is whatever the panicking callback threw; use
/// [`Self::panic_message`] for a printable rendition.
pub struct SubscriberThrew {
    /// The callback that panicked, e.g. `"EventSubscriber::on_event"`.
    pub source: &'static str,
    /// What was being published, e.g. ``event class `OrderEvent` ``.
    pub context: String,
    /// Pointer-formatted description of the offending subscriber or vetoer.
    pub listener: String,
    /// The raw panic payload.
    pub payload: Box<dyn Any + Send>,
    /// Trace captured where the panic was caught (the publish call site).
    pub backtrace: Backtrace,
}

impl SubscriberThrew {
    /// Renders the panic payload as a string where possible.
    #[must_use]
    pub fn panic_message(&self) -> &str {
        if let Some(s) = self.payload.downcast_ref::<&str>() {
            s
        } else if let Some(s) = self.payload.downcast_ref::<String>() {
            s
        } else {
            "<non-string panic payload>"
        }
    }
}

impl Debug for SubscriberThrew {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct(stringify!(SubscriberThrew))
            .field("source", &self.source)
            .field("context", &self.context)
            .field("listener", &self.listener)
            .field("message", &self.panic_message())
            .finish()
    }
}

/// Sink for panics escaping subscriber and vetoer callbacks.
///
/// The default sink logs at warn; hosts that report errors differently
/// inject their own implementation at service construction.
pub trait ExceptionSink: Send + Sync {
    /// Handles one captured callback panic.
    fn handle_exception(&self, thrown: &SubscriberThrew);
}

/// Default sink: logs each captured panic at warn with full context.
#[derive(Debug, Default)]
pub struct LogExceptionSink;

impl ExceptionSink for LogExceptionSink {
    fn handle_exception(&self, thrown: &SubscriberThrew) {
        log::warn!(
            "{} panicked during {} ({}): {}",
            thrown.listener,
            thrown.source,
            thrown.context,
            thrown.panic_message(),
        );
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn test_panic_message_from_str() {
        let thrown = SubscriberThrew {
            source: "EventSubscriber::on_event",
            context: "event class `StubEvent`".to_string(),
            listener: "0x0".to_string(),
            payload: Box::new("boom"),
            backtrace: Backtrace::capture(),
        };
        assert_eq!(thrown.panic_message(), "boom");
    }

    #[rstest]
    fn test_panic_message_from_string() {
        let thrown = SubscriberThrew {
            source: "EventVetoer::should_veto",
            context: "topic `orders`".to_string(),
            listener: "0x0".to_string(),
            payload: Box::new(String::from("kaboom")),
            backtrace: Backtrace::capture(),
        };
        assert_eq!(thrown.panic_message(), "kaboom");
    }

    #[rstest]
    fn test_panic_message_opaque_payload() {
        let thrown = SubscriberThrew {
            source: "EventSubscriber::on_event",
            context: "event class `StubEvent`".to_string(),
            listener: "0x0".to_string(),
            payload: Box::new(42u32),
            backtrace: Backtrace::capture(),
        };
        assert_eq!(thrown.panic_message(), "<non-string panic payload>");
    }

    #[rstest]
    fn test_service_error_display() {
        let e = ServiceError::InvalidArgument("topic was empty".to_string());
        assert_eq!(e.to_string(), "invalid argument: topic was empty");

        let e = ServiceError::AlreadyPresent("service `default`".to_string());
        assert_eq!(e.to_string(), "already present: service `default`");
    }
}

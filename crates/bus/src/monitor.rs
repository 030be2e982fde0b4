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

//! Wall-clock timing of subscriber and vetoer calls.
//!
//! Measurement only: a slow callback is never interrupted. When a call runs
//! past the configured threshold the monitor produces a
//! [`SubscriberTimingEvent`] which the service publishes re-entrantly as an
//! ordinary event.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use courier_core::unix_millis;
use ustr::Ustr;

use crate::{
    enums::TimingSource,
    events::{Event, EventClass, SubscriberTimingEvent},
    subscriber::EventSubscriber,
};

/// Measures one callback against a fixed threshold.
#[derive(Clone, Debug)]
pub(crate) struct TimingMonitor {
    threshold: Duration,
}

impl TimingMonitor {
    pub const fn new(threshold: Duration) -> Self {
        Self { threshold }
    }

    pub const fn threshold(&self) -> Duration {
        self.threshold
    }

    /// Returns a timing event when the call that started at `started` ran
    /// over the threshold, `None` otherwise.
    pub fn observe(
        &self,
        source: TimingSource,
        started: Instant,
        start_ms: u64,
        event_class: Option<&'static EventClass>,
        topic: Option<Ustr>,
        listener: &str,
    ) -> Option<SubscriberTimingEvent> {
        let elapsed = started.elapsed();
        if elapsed <= self.threshold {
            return None;
        }

        Some(SubscriberTimingEvent {
            source,
            start_ms,
            end_ms: unix_millis(),
            elapsed,
            threshold: self.threshold,
            event_class,
            topic,
            listener: listener.to_string(),
        })
    }
}

/// Internal subscriber that logs timing events at warn.
///
/// Installed when the service is configured to self-subscribe its timing
/// logger.
#[derive(Debug, Default)]
pub(crate) struct TimingLogSubscriber;

impl EventSubscriber for TimingLogSubscriber {
    fn on_event(&self, event: &Arc<dyn Event>) {
        if let Some(timing) = event.as_any().downcast_ref::<SubscriberTimingEvent>() {
            log::warn!("{timing}");
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::stubs::BASE_EVENT;

    #[rstest]
    fn test_observe_under_threshold_is_quiet() {
        let monitor = TimingMonitor::new(Duration::from_secs(60));
        let timing = monitor.observe(
            TimingSource::Subscriber,
            Instant::now(),
            unix_millis(),
            Some(&BASE_EVENT),
            None,
            "0x0",
        );
        assert!(timing.is_none());
    }

    #[rstest]
    fn test_observe_over_threshold_produces_event() {
        let monitor = TimingMonitor::new(Duration::ZERO);
        let started = Instant::now();
        std::thread::sleep(Duration::from_millis(2));

        let timing = monitor
            .observe(
                TimingSource::Vetoer,
                started,
                unix_millis(),
                None,
                Some(Ustr::from("orders")),
                "0xbeef",
            )
            .expect("over threshold");

        assert_eq!(timing.source, TimingSource::Vetoer);
        assert_eq!(timing.topic, Some(Ustr::from("orders")));
        assert!(timing.elapsed >= Duration::from_millis(2));
        assert_eq!(timing.listener, "0xbeef");
    }
}

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

//! Background reaper for stale weak and proxy subscription cells.
//!
//! Publish-time walks already scrub stale cells from the keys they touch; the
//! reaper covers keys no publication visits. The sweep thread is spawned
//! lazily when the resident weak/proxy cell count crosses the start threshold
//! (start threshold and period both configured), ticks on the period, and
//! cancels itself once the count drains to the stop threshold. Each tick
//! publishes [`CleanupEvent`](crate::events::CleanupEvent) progress markers
//! on the owning service.
//!
//! The thread holds only a `Weak` back-reference: it exits on its next wakeup
//! once the service is dropped, and never blocks process shutdown.

use std::{
    sync::{
        Arc, Mutex, PoisonError, Weak,
        atomic::{AtomicBool, Ordering},
        mpsc::{self, RecvTimeoutError},
    },
    thread,
    time::Duration,
};

use crate::service::EventService;

/// Tuning knobs for the sweep. All optional; the sweep never starts unless
/// both the start threshold and the period are set.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct ReaperConfig {
    pub start_threshold: Option<usize>,
    pub stop_threshold: Option<usize>,
    pub period: Option<Duration>,
}

struct Worker {
    cancel: mpsc::Sender<()>,
    running: Arc<AtomicBool>,
    handle: thread::JoinHandle<()>,
}

pub(crate) struct Reaper {
    service: Weak<EventService>,
    config: Mutex<ReaperConfig>,
    worker: Mutex<Option<Worker>>,
}

impl Reaper {
    pub fn new(service: Weak<EventService>, config: ReaperConfig) -> Self {
        Self {
            service,
            config: Mutex::new(config),
            worker: Mutex::new(None),
        }
    }

    pub fn config(&self) -> ReaperConfig {
        *self.config.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_start_threshold(&self, threshold: Option<usize>) {
        self.config
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .start_threshold = threshold;
    }

    pub fn set_stop_threshold(&self, threshold: Option<usize>) {
        self.config
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .stop_threshold = threshold;
    }

    pub fn set_period(&self, period: Option<Duration>) {
        self.config
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .period = period;
    }

    /// Starts the sweep thread when the resident weak/proxy count has reached
    /// the start threshold and no sweep is running.
    pub fn maybe_start(&self, weak_or_proxy_count: usize) {
        let config = self.config();
        let (Some(start), Some(_)) = (config.start_threshold, config.period) else {
            return;
        };
        if weak_or_proxy_count < start {
            return;
        }

        let mut slot = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if slot
            .as_ref()
            .is_some_and(|worker| worker.running.load(Ordering::Acquire))
        {
            return;
        }
        // A previous sweep cancelled itself; reap it before respawning.
        if let Some(worker) = slot.take() {
            let _ = worker.handle.join();
        }

        let (cancel, ticks) = mpsc::channel();
        let running = Arc::new(AtomicBool::new(true));
        let service = self.service.clone();
        let flag = running.clone();

        let spawned = thread::Builder::new()
            .name("courier-reaper".to_string())
            .spawn(move || {
                run_sweep(&service, &ticks);
                flag.store(false, Ordering::Release);
            });

        match spawned {
            Ok(handle) => {
                log::debug!("Reaper sweep started (count={weak_or_proxy_count}, start={start})");
                *slot = Some(Worker {
                    cancel,
                    running,
                    handle,
                });
            }
            Err(e) => log::error!("Failed to spawn reaper thread: {e}"),
        }
    }

    /// Returns whether a sweep thread is currently running.
    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|worker| worker.running.load(Ordering::Acquire))
    }
}

impl Drop for Reaper {
    fn drop(&mut self) {
        // Wake the sweep so it exits promptly; never block the drop on a join.
        if let Some(worker) = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            let _ = worker.cancel.send(());
        }
    }
}

fn run_sweep(service: &Weak<EventService>, ticks: &mpsc::Receiver<()>) {
    loop {
        // Re-read the period each cycle so tuning applies to a live sweep.
        let Some(period) = service.upgrade().and_then(|s| s.cleanup_period()) else {
            return;
        };
        match ticks.recv_timeout(period) {
            Err(RecvTimeoutError::Timeout) => {
                let Some(service) = service.upgrade() else {
                    return;
                };
                if !service.reaper_tick() {
                    return;
                }
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}

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

//! Process-global registry of named event service instances.
//!
//! Slots are write-once: the first `set` of a name wins and a second non-null
//! `set` fails, so component wiring cannot silently replace a service other
//! components already hold. Passing `None` clears a slot. The default
//! instance is created lazily on first access.

use std::sync::{Arc, LazyLock, Mutex, PoisonError};

use ahash::AHashMap;
use ustr::Ustr;

use crate::{
    error::ServiceError,
    service::{EventService, EventServiceConfig},
};

/// Name under which the lazily-created default service registers.
pub const DEFAULT_SERVICE_NAME: &str = "default";

static SERVICE_REGISTRY: LazyLock<ServiceRegistry> = LazyLock::new(ServiceRegistry::new);

/// Registry mapping names to service instances.
pub struct ServiceRegistry {
    services: Mutex<AHashMap<Ustr, Arc<EventService>>>,
}

impl ServiceRegistry {
    fn new() -> Self {
        Self {
            services: Mutex::new(AHashMap::new()),
        }
    }

    /// Sets or clears the service registered under `name`.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyPresent` when setting a non-null value into an
    /// occupied slot.
    pub fn set(
        &self,
        name: impl AsRef<str>,
        service: Option<Arc<EventService>>,
    ) -> Result<(), ServiceError> {
        let name = Ustr::from(name.as_ref());
        let mut services = self
            .services
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match service {
            Some(service) => {
                if services.contains_key(&name) {
                    return Err(ServiceError::AlreadyPresent(format!("service `{name}`")));
                }
                log::debug!("Registering service `{name}`");
                services.insert(name, service);
                Ok(())
            }
            None => {
                log::debug!("Clearing service `{name}`");
                services.remove(&name);
                Ok(())
            }
        }
    }

    /// Returns the service registered under `name`.
    #[must_use]
    pub fn get(&self, name: impl AsRef<str>) -> Option<Arc<EventService>> {
        self.services
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&Ustr::from(name.as_ref()))
            .cloned()
    }

    /// Returns whether a service is registered under `name`.
    #[must_use]
    pub fn contains(&self, name: impl AsRef<str>) -> bool {
        self.services
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&Ustr::from(name.as_ref()))
    }

    fn get_or_init_default(&self) -> Arc<EventService> {
        let mut services = self
            .services
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        services
            .entry(Ustr::from(DEFAULT_SERVICE_NAME))
            .or_insert_with(|| {
                EventService::new(EventServiceConfig::default())
                    .expect("default config is always valid")
            })
            .clone()
    }
}

/// Returns the process-global service registry.
pub fn service_registry() -> &'static ServiceRegistry {
    &SERVICE_REGISTRY
}

/// Returns the default service instance, creating and registering it on
/// first access.
pub fn default_service() -> Arc<EventService> {
    service_registry().get_or_init_default()
}

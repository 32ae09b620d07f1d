// Copyright 2025 HEM Sp. z o.o.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::sync::Arc;

use log::{debug, info};

use crate::composite_router::CompositeOperationRouter;
use crate::config::CacheConfig;
use crate::definitions::{ConnectionType, ConnectorAddress, ConnectorInfo};
use crate::errors::RoutingError;
use crate::routing_state_cache::RoutingStateCache;

/// Hardware command surface a device family implements.
///
/// Each call addresses one elementary media class; decomposition happens above it.
pub trait CrosspointDriver: Send + Sync {
    /// Commands `input` (or disconnect) onto `output` for one media class.
    ///
    /// `Ok(false)` means the hardware refused; the cache is left as it was for this class.
    fn apply_route(
        &self,
        input: Option<ConnectorAddress>,
        output: ConnectorAddress,
        flag: ConnectionType,
    ) -> Result<bool, RoutingError>;
}

/// Uniform capability set of a switch-like component, whatever the device family.
pub trait SwitcherControl: Send + Sync {
    fn inputs(&self) -> Vec<ConnectorInfo>;
    fn outputs(&self) -> Vec<ConnectorInfo>;

    /// Routes `input` to `output` for every media class in `flags`.
    ///
    /// Returns `Ok(false)` if any class failed; classes that succeeded stay applied.
    fn route(&self, input: ConnectorAddress, output: ConnectorAddress, flags: ConnectionType)
        -> Result<bool, RoutingError>;

    /// Disconnects `output` for every media class in `flags`.
    fn clear_output(&self, output: ConnectorAddress, flags: ConnectionType) -> Result<bool, RoutingError>;

    fn source_detected(&self, input: ConnectorAddress, flags: ConnectionType) -> Result<bool, RoutingError>;

    fn input_for_output(&self, output: ConnectorAddress, flag: ConnectionType)
        -> Result<Option<ConnectorInfo>, RoutingError>;

    fn outputs_for_input(&self, input: ConnectorAddress, flags: ConnectionType)
        -> Result<Vec<ConnectorInfo>, RoutingError>;

    fn routing_state(&self) -> &RoutingStateCache;
}

/// A switcher built from a family-specific driver plus the shared cache and router.
pub struct CachedSwitcher<D: CrosspointDriver> {
    driver: Arc<D>,
    cache: Arc<RoutingStateCache>,
    router: CompositeOperationRouter,
}

impl<D: CrosspointDriver> CachedSwitcher<D> {
    pub fn new<I, O>(driver: Arc<D>, inputs: I, outputs: O) -> Self
    where
        I: IntoIterator<Item = ConnectorInfo>,
        O: IntoIterator<Item = ConnectorInfo>,
    {
        Self::with_cache(driver, Arc::new(RoutingStateCache::with_config(inputs, outputs, CacheConfig::default())))
    }

    pub fn with_cache(driver: Arc<D>, cache: Arc<RoutingStateCache>) -> Self {
        Self {
            driver,
            cache,
            router: CompositeOperationRouter::default(),
        }
    }

    pub fn driver(&self) -> Arc<D> {
        self.driver.clone()
    }

    pub fn cache(&self) -> Arc<RoutingStateCache> {
        self.cache.clone()
    }

    fn command(
        &self,
        input: Option<ConnectorAddress>,
        output: ConnectorAddress,
        flags: ConnectionType,
    ) -> Result<bool, RoutingError> {
        self.cache.check_route(output, input, flags)?;
        self.router.route(flags, |flag| {
            if !self.driver.apply_route(input, output, flag)? {
                return Ok(false);
            }
            self.cache.set_input_for_output(output, input, flag)?;
            Ok(true)
        })
    }

    /// Records a route the device reported on its own (front panel, another controller).
    pub fn on_route_feedback(
        &self,
        input: Option<ConnectorAddress>,
        output: ConnectorAddress,
        flags: ConnectionType,
    ) -> Result<bool, RoutingError> {
        self.router.route(flags, |flag| {
            self.cache.set_input_for_output(output, input, flag)?;
            Ok(true)
        })
    }

    /// Records signal presence reported by the device.
    pub fn on_signal_feedback(
        &self,
        input: ConnectorAddress,
        flags: ConnectionType,
        detected: bool,
    ) -> Result<bool, RoutingError> {
        self.router.route(flags, |flag| {
            self.cache.set_source_detected_state(input, flag, detected)?;
            Ok(true)
        })
    }

    /// Forgets all state after the device reconnected; feedback re-populates it.
    pub fn on_device_reconnected(&self) {
        info!("Device reconnected, routing state will be re-learned");
        self.cache.clear();
    }
}

impl<D: CrosspointDriver> SwitcherControl for CachedSwitcher<D> {
    fn inputs(&self) -> Vec<ConnectorInfo> {
        self.cache.inputs()
    }

    fn outputs(&self) -> Vec<ConnectorInfo> {
        self.cache.outputs()
    }

    fn route(&self, input: ConnectorAddress, output: ConnectorAddress, flags: ConnectionType)
        -> Result<bool, RoutingError> {
        debug!("Route request: input {} -> output {} ({})", input, output, flags);
        self.command(Some(input), output, flags)
    }

    fn clear_output(&self, output: ConnectorAddress, flags: ConnectionType) -> Result<bool, RoutingError> {
        debug!("Clear request: output {} ({})", output, flags);
        self.command(None, output, flags)
    }

    fn source_detected(&self, input: ConnectorAddress, flags: ConnectionType) -> Result<bool, RoutingError> {
        self.router.query(flags, |flag| self.cache.get_source_detected_state(input, flag))
    }

    fn input_for_output(&self, output: ConnectorAddress, flag: ConnectionType)
        -> Result<Option<ConnectorInfo>, RoutingError> {
        self.cache.get_input_for_output(output, flag)
    }

    fn outputs_for_input(&self, input: ConnectorAddress, flags: ConnectionType)
        -> Result<Vec<ConnectorInfo>, RoutingError> {
        self.cache.get_outputs_for_input(input, flags)
    }

    fn routing_state(&self) -> &RoutingStateCache {
        &self.cache
    }
}

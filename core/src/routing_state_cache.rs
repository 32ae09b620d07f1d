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

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, warn};
use tokio::sync::broadcast;

use crate::composite_router::unanimous;
use crate::config::CacheConfig;
use crate::definitions::{ConnectionType, ConnectorAddress, ConnectorInfo, ConnectorRole};
use crate::errors::RoutingError;
use crate::routing_events::{EventDispatcher, ListenerId, RoutingEvent, RoutingEventListener};

/// One stored crosspoint: `input` feeds `output` for the elementary `flag`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RouteAssignment {
    pub output: ConnectorAddress,
    pub flag: ConnectionType,
    pub input: ConnectorAddress,
}

#[derive(Default)]
struct CacheState {
    inputs: BTreeMap<ConnectorAddress, ConnectorInfo>,
    outputs: BTreeMap<ConnectorAddress, ConnectorInfo>,
    // (output, flag) -> input; a missing key is "unrouted"
    routes: HashMap<(ConnectorAddress, ConnectionType), ConnectorAddress>,
    // (input, flag) -> detected
    detected: HashMap<(ConnectorAddress, ConnectionType), bool>,
    // (input, flag) -> number of outputs currently selecting the input
    selectors: HashMap<(ConnectorAddress, ConnectionType), usize>,
}

fn require_flags(flags: ConnectionType) -> Result<(), RoutingError> {
    if flags.is_empty() {
        Err(RoutingError::NoneFlag)
    } else {
        Ok(())
    }
}

fn require_elementary(flag: ConnectionType) -> Result<(), RoutingError> {
    require_flags(flag)?;
    if flag.is_elementary() {
        Ok(())
    } else {
        Err(RoutingError::CompositeFlag(flag))
    }
}

impl CacheState {
    fn input(&self, address: ConnectorAddress, flags: ConnectionType) -> Result<&ConnectorInfo, RoutingError> {
        let info = self.inputs.get(&address).ok_or(RoutingError::UnknownInput(address))?;
        if info.supports(flags) {
            Ok(info)
        } else {
            Err(RoutingError::UnsupportedOperation { role: ConnectorRole::Input, address, flag: flags })
        }
    }

    fn output(&self, address: ConnectorAddress, flags: ConnectionType) -> Result<&ConnectorInfo, RoutingError> {
        let info = self.outputs.get(&address).ok_or(RoutingError::UnknownOutput(address))?;
        if info.supports(flags) {
            Ok(info)
        } else {
            Err(RoutingError::UnsupportedOperation { role: ConnectorRole::Output, address, flag: flags })
        }
    }

    fn selector_count(&self, input: ConnectorAddress, flag: ConnectionType) -> usize {
        self.selectors.get(&(input, flag)).copied().unwrap_or(0)
    }

    fn add_selector(&mut self, input: ConnectorAddress, flag: ConnectionType) -> bool {
        let count = self.selectors.entry((input, flag)).or_insert(0);
        *count += 1;
        *count == 1
    }

    fn remove_selector(&mut self, input: ConnectorAddress, flag: ConnectionType) -> bool {
        match self.selectors.get_mut(&(input, flag)) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            Some(_) => {
                self.selectors.remove(&(input, flag));
                true
            }
            None => false,
        }
    }

    fn reset(&mut self) {
        self.routes.clear();
        self.detected.clear();
        self.selectors.clear();
    }
}

/// Single source of truth for what is routed where and what is detected on one component.
///
/// Mutators validate their arguments, update the tables under an internal lock and then,
/// with the lock released, deliver the resulting events to listeners in registration
/// order before returning. Repeating a mutation with the value already stored changes
/// nothing and emits nothing.
pub struct RoutingStateCache {
    state: Mutex<CacheState>,
    dispatcher: EventDispatcher,
}

impl RoutingStateCache {
    /// Creates a cache for a component with the given input and output connectors.
    pub fn new<I, O>(inputs: I, outputs: O) -> Self
    where
        I: IntoIterator<Item = ConnectorInfo>,
        O: IntoIterator<Item = ConnectorInfo>,
    {
        Self::with_config(inputs, outputs, CacheConfig::default())
    }

    pub fn with_config<I, O>(inputs: I, outputs: O, config: CacheConfig) -> Self
    where
        I: IntoIterator<Item = ConnectorInfo>,
        O: IntoIterator<Item = ConnectorInfo>,
    {
        let cache = Self {
            state: Mutex::new(CacheState::default()),
            dispatcher: EventDispatcher::new(config.event_channel_capacity),
        };
        cache.set_connectors(inputs, outputs);
        cache
    }

    fn lock_state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a synchronous listener. Listeners run in registration order.
    pub fn add_listener(&self, listener: Arc<dyn RoutingEventListener>) -> ListenerId {
        self.dispatcher.add_listener(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.dispatcher.remove_listener(id)
    }

    /// Subscribe to routing events from an async context.
    pub fn subscribe(&self) -> broadcast::Receiver<RoutingEvent> {
        self.dispatcher.subscribe()
    }

    /// Assigns `input` (or nothing) to `output` for one elementary media class.
    ///
    /// Returns `Ok(true)` when the stored assignment changed and `Ok(false)` when it already
    /// held `input`.
    pub fn set_input_for_output(
        &self,
        output: ConnectorAddress,
        input: Option<ConnectorAddress>,
        flag: ConnectionType,
    ) -> Result<bool, RoutingError> {
        require_elementary(flag)?;
        let events = {
            let mut state = self.lock_state();
            state.output(output, flag)?;
            if let Some(input) = input {
                state.input(input, flag)?;
            }

            let old_input = state.routes.get(&(output, flag)).copied();
            if old_input == input {
                return Ok(false);
            }

            match input {
                Some(input) => state.routes.insert((output, flag), input),
                None => state.routes.remove(&(output, flag)),
            };

            let mut events = vec![RoutingEvent::RouteChanged { output, old_input, new_input: input, flag }];

            if let Some(old) = old_input {
                if state.remove_selector(old, flag) {
                    events.push(RoutingEvent::ActiveInputChanged { input: old, flag, active: false });
                }
            }
            if let Some(new) = input {
                if state.add_selector(new, flag) {
                    events.push(RoutingEvent::ActiveInputChanged { input: new, flag, active: true });
                }
            }

            let was_transmitting = old_input.is_some();
            let transmitting = input.is_some();
            if was_transmitting != transmitting {
                events.push(RoutingEvent::ActiveTransmissionStateChanged { output, flag, transmitting });
            }

            debug!("Route {}: output {} {:?} -> {:?}", flag, output, old_input, input);
            events
        };

        self.dispatcher.dispatch(events);
        Ok(true)
    }

    /// Validates a prospective route without touching state.
    ///
    /// Lets an adapter reject a request before commanding hardware with it.
    pub fn check_route(
        &self,
        output: ConnectorAddress,
        input: Option<ConnectorAddress>,
        flags: ConnectionType,
    ) -> Result<(), RoutingError> {
        require_flags(flags)?;
        let state = self.lock_state();
        state.output(output, flags)?;
        if let Some(input) = input {
            state.input(input, flags)?;
        }
        Ok(())
    }

    /// Stores device-reported signal presence for one elementary media class.
    ///
    /// Returns `Ok(true)` when the stored value changed.
    pub fn set_source_detected_state(
        &self,
        input: ConnectorAddress,
        flag: ConnectionType,
        detected: bool,
    ) -> Result<bool, RoutingError> {
        require_elementary(flag)?;
        {
            let mut state = self.lock_state();
            state.input(input, flag)?;
            let current = state.detected.get(&(input, flag)).copied().unwrap_or(false);
            if current == detected {
                return Ok(false);
            }
            state.detected.insert((input, flag), detected);
        }
        debug!("Source {} on input {} detected: {}", flag, input, detected);

        self.dispatcher
            .dispatch(vec![RoutingEvent::SourceDetectionStateChanged { input, flag, detected }]);
        Ok(true)
    }

    /// Returns the input feeding `output` for one elementary media class.
    ///
    /// A composite flag is rejected: its media classes may be fed by different inputs.
    pub fn get_input_for_output(
        &self,
        output: ConnectorAddress,
        flag: ConnectionType,
    ) -> Result<Option<ConnectorInfo>, RoutingError> {
        require_elementary(flag)?;
        let state = self.lock_state();
        state.output(output, flag)?;
        Ok(state
            .routes
            .get(&(output, flag))
            .and_then(|input| state.inputs.get(input))
            .cloned())
    }

    /// Returns the outputs fed by `input` for **every** media class in `flags`.
    ///
    /// An output that takes only some of the requested media classes from `input` (audio
    /// breakaway) is not included.
    pub fn get_outputs_for_input(
        &self,
        input: ConnectorAddress,
        flags: ConnectionType,
    ) -> Result<Vec<ConnectorInfo>, RoutingError> {
        require_flags(flags)?;
        let state = self.lock_state();
        state.input(input, flags)?;
        Ok(state
            .outputs
            .values()
            .filter(|output| {
                flags
                    .elementary()
                    .all(|flag| state.routes.get(&(output.address(), flag)) == Some(&input))
            })
            .cloned()
            .collect())
    }

    /// Signal presence on `input`; a composite flag is true only if every media class is detected.
    pub fn get_source_detected_state(
        &self,
        input: ConnectorAddress,
        flags: ConnectionType,
    ) -> Result<bool, RoutingError> {
        require_flags(flags)?;
        let state = self.lock_state();
        state.input(input, flags)?;
        Ok(unanimous(
            flags
                .elementary()
                .map(|flag| state.detected.get(&(input, flag)).copied().unwrap_or(false)),
            false,
        ))
    }

    /// Whether some output currently selects `input`; composite flags use the unanimous rule.
    pub fn is_input_active(&self, input: ConnectorAddress, flags: ConnectionType) -> Result<bool, RoutingError> {
        require_flags(flags)?;
        let state = self.lock_state();
        state.input(input, flags)?;
        Ok(unanimous(flags.elementary().map(|flag| state.selector_count(input, flag) > 0), false))
    }

    /// Whether `output` has an input assigned; composite flags use the unanimous rule.
    pub fn is_transmitting(&self, output: ConnectorAddress, flags: ConnectionType) -> Result<bool, RoutingError> {
        require_flags(flags)?;
        let state = self.lock_state();
        state.output(output, flags)?;
        Ok(unanimous(
            flags.elementary().map(|flag| state.routes.contains_key(&(output, flag))),
            false,
        ))
    }

    /// All stored assignments, ordered by output then flag.
    pub fn assignments(&self) -> Vec<RouteAssignment> {
        let state = self.lock_state();
        let mut assignments: Vec<RouteAssignment> = state
            .routes
            .iter()
            .map(|(&(output, flag), &input)| RouteAssignment { output, flag, input })
            .collect();
        assignments.sort();
        assignments
    }

    pub fn inputs(&self) -> Vec<ConnectorInfo> {
        self.lock_state().inputs.values().cloned().collect()
    }

    pub fn outputs(&self) -> Vec<ConnectorInfo> {
        self.lock_state().outputs.values().cloned().collect()
    }

    pub fn input_info(&self, address: ConnectorAddress) -> Option<ConnectorInfo> {
        self.lock_state().inputs.get(&address).cloned()
    }

    pub fn output_info(&self, address: ConnectorAddress) -> Option<ConnectorInfo> {
        self.lock_state().outputs.get(&address).cloned()
    }

    /// Forgets all assignments and detection state without emitting events.
    ///
    /// Used when the device reconnects; the owner re-populates the cache through the
    /// normal mutators, which then report transitions from the empty baseline.
    pub fn clear(&self) {
        self.lock_state().reset();
        debug!("Routing state cleared");
    }

    /// Replaces the declared connector set and clears all state without emitting events.
    pub fn set_connectors<I, O>(&self, inputs: I, outputs: O)
    where
        I: IntoIterator<Item = ConnectorInfo>,
        O: IntoIterator<Item = ConnectorInfo>,
    {
        let mut state = self.lock_state();
        state.inputs.clear();
        for info in inputs {
            if let Some(previous) = state.inputs.insert(info.address(), info) {
                warn!("Input {} declared twice; keeping the last declaration", previous.address());
            }
        }
        state.outputs.clear();
        for info in outputs {
            if let Some(previous) = state.outputs.insert(info.address(), info) {
                warn!("Output {} declared twice; keeping the last declaration", previous.address());
            }
        }
        state.reset();
    }
}

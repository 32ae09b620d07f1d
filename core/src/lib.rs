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

pub mod config;
pub mod definitions;
pub mod errors;
pub mod routing_events;
pub mod topology;

mod composite_router;
mod content_control;
mod device_uuid_calculator;
mod reconciliation_graph;
mod routing_state_cache;
mod service;
mod switcher;
mod topology_watch;

pub use composite_router::{unanimous, CompositeOperationRouter};
pub use config::{CacheConfig, GraphConfig};
pub use content_control::{
    ContentChange, ContentChangeListener, ContentConsumer, ContentNotifier, ContentProducer, ContentSubscribers,
    ControlRegistry, ControlResolver, InMemoryStreamControl, SubscriptionId,
};
pub use definitions::{ConnectionType, ConnectorAddress, ConnectorInfo, ConnectorRole};
pub use device_uuid_calculator::calculate_device_id;
pub use errors::{ControlError, RoutingError, TopologyError};
pub use reconciliation_graph::{BuildReport, EndpointReconciliationGraph};
pub use routing_events::{routing_listener, ListenerId, RoutingEvent, RoutingEventListener};
pub use routing_state_cache::{RouteAssignment, RoutingStateCache};
pub use service::{spawn_service, MultiServiceHandle, ServiceHandle, StopHandle};
pub use switcher::{CachedSwitcher, CrosspointDriver, SwitcherControl};
pub use topology::{Connection, ControlId, ControlRef, Endpoint, ManagedDeviceId, Topology, TopologyEvent};
pub use topology_watch::run_topology_watch;

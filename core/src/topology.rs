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

use std::fmt;

use uuid::Uuid;

use crate::definitions::ConnectorAddress;
use crate::device_uuid_calculator::calculate_device_id;

/// Unique identifier for managed devices
pub type ManagedDeviceId = Uuid;

/// Index of a control (switcher, encoder, decoder, …) within one device.
pub type ControlId = u32;

/// Reference to one control of one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ControlRef {
    pub device: ManagedDeviceId,
    pub control: ControlId,
}

impl ControlRef {
    pub fn new(device: ManagedDeviceId, control: ControlId) -> Self {
        Self { device, control }
    }

    /// References `control` on the device identified by manufacturer, model and serial.
    ///
    /// The device part is stable across restarts and rediscovery, so topologies stored by
    /// an integrator keep pointing at the same hardware.
    pub fn for_device(manufacturer: &str, model: &str, serial_number: &str, control: ControlId) -> Self {
        Self::new(calculate_device_id(manufacturer, model, serial_number), control)
    }

    pub fn endpoint(self, address: ConnectorAddress) -> Endpoint {
        Endpoint { control: self, address }
    }
}

impl fmt::Display for ControlRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.device, self.control)
    }
}

/// One connector of one control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Endpoint {
    pub control: ControlRef,
    pub address: ConnectorAddress,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.control, self.address)
    }
}

/// Directed link from an output endpoint to an input endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Connection {
    pub source: Endpoint,
    pub destination: Endpoint,
}

impl Connection {
    pub fn new(source: Endpoint, destination: Endpoint) -> Self {
        Self { source, destination }
    }
}

/// The set of directed connections between device endpoints of a system.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Topology {
    connections: Vec<Connection>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connection(mut self, source: Endpoint, destination: Endpoint) -> Self {
        self.add_connection(source, destination);
        self
    }

    pub fn add_connection(&mut self, source: Endpoint, destination: Endpoint) {
        self.connections.push(Connection::new(source, destination));
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    /// Connections whose destination is a connector of `control`.
    pub fn connections_to(&self, control: ControlRef) -> impl Iterator<Item = &Connection> {
        self.connections.iter().filter(move |c| c.destination.control == control)
    }

    /// Connections whose source is a connector of `control`.
    pub fn connections_from(&self, control: ControlRef) -> impl Iterator<Item = &Connection> {
        self.connections.iter().filter(move |c| c.source.control == control)
    }
}

/// Notifications consumed by the topology watch.
#[derive(Debug, Clone)]
pub enum TopologyEvent {
    /// The topology was replaced; graphs must rebuild their endpoint mappings.
    Changed(std::sync::Arc<Topology>),

    /// Mappings are unchanged but derived routing should be recomputed.
    Refresh,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn control(n: ControlId) -> ControlRef {
        ControlRef::new(Uuid::from_u128(0x42), n)
    }

    #[test]
    fn device_identity_gives_stable_control_refs() {
        let decoder = ControlRef::for_device("Acme AV", "DM-NVX-360", "SN0042", 2);
        assert_eq!(decoder, ControlRef::for_device("ACME av", "dm-nvx-360", "SN0042", 2));
        assert_ne!(decoder, ControlRef::for_device("Acme AV", "DM-NVX-360", "SN0043", 2));
        assert_ne!(decoder, ControlRef::for_device("Acme AV", "DM-NVX-360", "SN0042", 3));
        assert_eq!(decoder.device, calculate_device_id("Acme AV", "DM-NVX-360", "SN0042"));
    }

    #[test]
    fn connections_are_selected_by_direction() {
        let encoder = control(1);
        let switcher = control(2);
        let decoder = control(3);
        let topology = Topology::new()
            .with_connection(encoder.endpoint(1), switcher.endpoint(1))
            .with_connection(encoder.endpoint(2), switcher.endpoint(2))
            .with_connection(switcher.endpoint(1), decoder.endpoint(1));

        assert_eq!(topology.connections_to(switcher).count(), 2);
        assert_eq!(topology.connections_from(switcher).count(), 1);
        assert_eq!(topology.connections_to(encoder).count(), 0);
        assert_eq!(topology.connections().len(), 3);
    }

    #[test]
    fn endpoint_display_includes_control_and_address() {
        let endpoint = control(7).endpoint(3);
        assert!(endpoint.to_string().ends_with("/7#3"));
    }
}

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

use uuid::Uuid;

use crate::topology::ManagedDeviceId;

const ROOT_UUID: Uuid = Uuid::from_u128(0x6d1c_93a0_5e2f_4b7a_9c41_0f38_d2a7_b915);

/// Derives a stable device id from what the device reports about itself.
///
/// Devices are re-discovered after every reconnect; deriving the id keeps topology
/// references valid across reconnects.
pub fn calculate_device_id(manufacturer: &str, model: &str, serial_number: &str) -> ManagedDeviceId {
    let manufacturer_uuid = Uuid::new_v5(&ROOT_UUID, manufacturer.to_ascii_lowercase().as_bytes());
    let model_uuid = Uuid::new_v5(&manufacturer_uuid, model.to_ascii_lowercase().as_bytes());
    Uuid::new_v5(&model_uuid, serial_number.as_bytes())
}

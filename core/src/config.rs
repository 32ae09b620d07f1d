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

use crate::definitions::ConnectionType;

/// Capacity of the broadcast channel a cache publishes routing events on.
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 100;

/// Settings for a routing state cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Events buffered per broadcast subscriber before it starts lagging.
    /// Synchronous listeners are not affected.
    pub event_channel_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
        }
    }
}

/// Settings for an endpoint reconciliation graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphConfig {
    /// Media classes a content match routes. A stream carries audio and video together.
    pub route_flags: ConnectionType,

    pub cache: CacheConfig,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            route_flags: ConnectionType::AudioVideo,
            cache: CacheConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graph_defaults_route_audio_and_video() {
        let config = GraphConfig::default();
        assert_eq!(config.route_flags, ConnectionType::Audio | ConnectionType::Video);
        assert_eq!(config.cache.event_channel_capacity, 100);
    }
}

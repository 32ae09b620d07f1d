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

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::broadcast;

use crate::definitions::{ConnectionType, ConnectorAddress};

/// Change notifications emitted by a routing state cache.
///
/// Every flag carried by an event is elementary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingEvent {
    /// The input assigned to an output changed.
    RouteChanged {
        output: ConnectorAddress,
        old_input: Option<ConnectorAddress>,
        new_input: Option<ConnectorAddress>,
        flag: ConnectionType,
    },

    /// An input gained its first selecting output or lost its last one.
    ActiveInputChanged { input: ConnectorAddress, flag: ConnectionType, active: bool },

    /// An output started or stopped transmitting.
    ActiveTransmissionStateChanged { output: ConnectorAddress, flag: ConnectionType, transmitting: bool },

    /// The device reported a change of signal presence on an input.
    SourceDetectionStateChanged { input: ConnectorAddress, flag: ConnectionType, detected: bool },
}

/// Identifies a registered listener so it can be removed again.
pub type ListenerId = u64;

/// Synchronous receiver of routing events.
///
/// Called on the mutating thread, after the cache released its internal lock, so a
/// listener may query the same cache. Listeners are called in registration order.
pub trait RoutingEventListener: Send + Sync {
    fn on_event(&self, event: &RoutingEvent);
}

impl<F> RoutingEventListener for F
where
    F: Fn(&RoutingEvent) + Send + Sync,
{
    fn on_event(&self, event: &RoutingEvent) {
        self(event)
    }
}

/// Wraps a closure into a shareable listener.
pub fn routing_listener<F>(f: F) -> Arc<dyn RoutingEventListener>
where
    F: Fn(&RoutingEvent) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Fan-out of routing events to synchronous listeners and a broadcast channel.
pub(crate) struct EventDispatcher {
    listeners: Mutex<Vec<(ListenerId, Arc<dyn RoutingEventListener>)>>,
    next_listener_id: AtomicU64,
    event_sender: broadcast::Sender<RoutingEvent>,
}

impl EventDispatcher {
    pub(crate) fn new(channel_capacity: usize) -> Self {
        let (event_sender, _) = broadcast::channel(channel_capacity.max(1));
        Self {
            listeners: Mutex::new(Vec::new()),
            next_listener_id: AtomicU64::new(1),
            event_sender,
        }
    }

    pub(crate) fn add_listener(&self, listener: Arc<dyn RoutingEventListener>) -> ListenerId {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, listener));
        id
    }

    pub(crate) fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<RoutingEvent> {
        self.event_sender.subscribe()
    }

    /// Delivers events in order. Must not be called while holding a cache lock.
    pub(crate) fn dispatch(&self, events: Vec<RoutingEvent>) {
        if events.is_empty() {
            return;
        }
        // Snapshot so listeners may (un)register from inside a callback.
        let listeners: Vec<Arc<dyn RoutingEventListener>> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();

        for event in events {
            for listener in &listeners {
                listener.on_event(&event);
            }
            // No receivers is fine.
            let _ = self.event_sender.send(event);
        }
    }
}

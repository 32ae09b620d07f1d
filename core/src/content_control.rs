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
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use log::debug;

use crate::definitions::ConnectorAddress;
use crate::errors::{ControlError, TopologyError};
use crate::topology::ControlRef;

/// Identifies a content-change subscription on one control.
pub type SubscriptionId = u64;

/// Which of a control's own connectors changed content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentChange {
    /// What an output produces changed.
    Produced(ConnectorAddress),

    /// What an input consumes changed.
    Consumed(ConnectorAddress),
}

impl ContentChange {
    pub fn address(self) -> ConnectorAddress {
        match self {
            ContentChange::Produced(address) | ContentChange::Consumed(address) => address,
        }
    }
}

/// Receives "content changed" notifications from an external control.
pub trait ContentChangeListener: Send + Sync {
    fn on_content_changed(&self, change: ContentChange);
}

/// Subscription point every soft-routing control exposes.
pub trait ContentNotifier: Send + Sync {
    fn subscribe_content(&self, listener: Arc<dyn ContentChangeListener>) -> SubscriptionId;
    fn unsubscribe_content(&self, id: SubscriptionId) -> bool;
}

/// A control that produces content (an encoder publishing a stream URI) on its outputs.
pub trait ContentProducer: ContentNotifier {
    fn produced_content(&self, output: ConnectorAddress) -> Option<String>;
}

/// A control that consumes content (a decoder pulling a stream URI) on its inputs.
pub trait ContentConsumer: ContentNotifier {
    fn consumed_content(&self, input: ConnectorAddress) -> Option<String>;

    /// Commands `input` to consume `content`, or to stop consuming when `None`.
    fn consume(&self, input: ConnectorAddress, content: Option<&str>) -> Result<(), ControlError>;
}

/// Locates the external controls a topology refers to.
pub trait ControlResolver: Send + Sync {
    fn resolve_producer(&self, control: ControlRef) -> Result<Arc<dyn ContentProducer>, TopologyError>;
    fn resolve_consumer(&self, control: ControlRef) -> Result<Arc<dyn ContentConsumer>, TopologyError>;
}

#[derive(Clone, Default)]
struct RegisteredControl {
    producer: Option<Arc<dyn ContentProducer>>,
    consumer: Option<Arc<dyn ContentConsumer>>,
}

/// In-process resolver backed by explicit registrations.
#[derive(Default)]
pub struct ControlRegistry {
    controls: Mutex<HashMap<ControlRef, RegisteredControl>>,
}

impl ControlRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_producer(&self, control: ControlRef, producer: Arc<dyn ContentProducer>) {
        let mut controls = self.controls.lock().unwrap_or_else(PoisonError::into_inner);
        controls.entry(control).or_default().producer = Some(producer);
        debug!("Producer {} registered", control);
    }

    pub fn register_consumer(&self, control: ControlRef, consumer: Arc<dyn ContentConsumer>) {
        let mut controls = self.controls.lock().unwrap_or_else(PoisonError::into_inner);
        controls.entry(control).or_default().consumer = Some(consumer);
        debug!("Consumer {} registered", control);
    }

    /// Removes every capability registered for `control`.
    pub fn remove_control(&self, control: ControlRef) -> bool {
        let removed = self
            .controls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&control)
            .is_some();
        if removed {
            debug!("Control {} removed", control);
        }
        removed
    }

    fn get(&self, control: ControlRef) -> Result<RegisteredControl, TopologyError> {
        let controls = self.controls.lock().unwrap_or_else(PoisonError::into_inner);
        controls.get(&control).cloned().ok_or(TopologyError::ControlNotFound(control))
    }
}

impl ControlResolver for ControlRegistry {
    fn resolve_producer(&self, control: ControlRef) -> Result<Arc<dyn ContentProducer>, TopologyError> {
        self.get(control)?.producer.ok_or(TopologyError::NotAProducer(control))
    }

    fn resolve_consumer(&self, control: ControlRef) -> Result<Arc<dyn ContentConsumer>, TopologyError> {
        self.get(control)?.consumer.ok_or(TopologyError::NotAConsumer(control))
    }
}

/// Listener bookkeeping shared by control implementations.
pub struct ContentSubscribers {
    listeners: Mutex<Vec<(SubscriptionId, Arc<dyn ContentChangeListener>)>>,
    next_id: AtomicU64,
}

impl Default for ContentSubscribers {
    fn default() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl ContentSubscribers {
    pub fn subscribe(&self, listener: Arc<dyn ContentChangeListener>) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, listener));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Notifies every subscriber, in subscription order, without holding the listener lock.
    pub fn notify(&self, change: ContentChange) {
        let listeners: Vec<_> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener.on_content_changed(change);
        }
    }
}

/// A software stream endpoint keeping produced and consumed content in memory.
///
/// Acts as both producer and consumer; used for virtual devices and loopback setups.
#[derive(Default)]
pub struct InMemoryStreamControl {
    produced: Mutex<BTreeMap<ConnectorAddress, String>>,
    consumed: Mutex<BTreeMap<ConnectorAddress, String>>,
    subscribers: ContentSubscribers,
}

impl InMemoryStreamControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Changes what `output` produces and notifies subscribers when it differs.
    pub fn set_produced(&self, output: ConnectorAddress, content: Option<&str>) {
        let changed = {
            let mut produced = self.produced.lock().unwrap_or_else(PoisonError::into_inner);
            replace_content(&mut produced, output, content)
        };
        if changed {
            self.subscribers.notify(ContentChange::Produced(output));
        }
    }

    /// Changes what `input` consumes as if done by another actor, notifying subscribers.
    pub fn set_consumed(&self, input: ConnectorAddress, content: Option<&str>) {
        let changed = {
            let mut consumed = self.consumed.lock().unwrap_or_else(PoisonError::into_inner);
            replace_content(&mut consumed, input, content)
        };
        if changed {
            self.subscribers.notify(ContentChange::Consumed(input));
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

fn replace_content(
    table: &mut BTreeMap<ConnectorAddress, String>,
    address: ConnectorAddress,
    content: Option<&str>,
) -> bool {
    if table.get(&address).map(String::as_str) == content {
        return false;
    }
    match content {
        Some(content) => table.insert(address, content.to_string()),
        None => table.remove(&address),
    };
    true
}

impl ContentNotifier for InMemoryStreamControl {
    fn subscribe_content(&self, listener: Arc<dyn ContentChangeListener>) -> SubscriptionId {
        self.subscribers.subscribe(listener)
    }

    fn unsubscribe_content(&self, id: SubscriptionId) -> bool {
        self.subscribers.unsubscribe(id)
    }
}

impl ContentProducer for InMemoryStreamControl {
    fn produced_content(&self, output: ConnectorAddress) -> Option<String> {
        self.produced
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&output)
            .cloned()
    }
}

impl ContentConsumer for InMemoryStreamControl {
    fn consumed_content(&self, input: ConnectorAddress) -> Option<String> {
        self.consumed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&input)
            .cloned()
    }

    fn consume(&self, input: ConnectorAddress, content: Option<&str>) -> Result<(), ControlError> {
        self.set_consumed(input, content);
        Ok(())
    }
}

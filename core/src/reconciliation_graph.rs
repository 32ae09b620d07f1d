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

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use anyhow::{anyhow, Error};
use log::{debug, error, info, warn};

use crate::composite_router::CompositeOperationRouter;
use crate::config::GraphConfig;
use crate::content_control::{
    ContentChange, ContentChangeListener, ContentConsumer, ContentProducer, ControlResolver, SubscriptionId,
};
use crate::definitions::{ConnectorAddress, ConnectorInfo, ConnectorRole};
use crate::errors::{RoutingError, TopologyError};
use crate::routing_state_cache::RoutingStateCache;
use crate::topology::{ControlRef, Endpoint, Topology};

/// Bidirectional mapping between local connectors and the remote endpoints they face.
struct EndpointMap<C: ?Sized> {
    by_local: BTreeMap<ConnectorAddress, (Endpoint, Arc<C>)>,
    by_remote: HashMap<Endpoint, ConnectorAddress>,
}

impl<C: ?Sized> Default for EndpointMap<C> {
    fn default() -> Self {
        Self {
            by_local: BTreeMap::new(),
            by_remote: HashMap::new(),
        }
    }
}

impl<C: ?Sized> EndpointMap<C> {
    fn insert(
        &mut self,
        role: ConnectorRole,
        local: ConnectorAddress,
        remote: Endpoint,
        control: Arc<C>,
    ) -> Result<(), TopologyError> {
        if self.by_local.contains_key(&local) {
            return Err(TopologyError::DuplicateMapping { role, address: local });
        }
        if let Some(&mapped) = self.by_remote.get(&remote) {
            return Err(TopologyError::DuplicateEndpoint { role, endpoint: remote, mapped });
        }
        self.by_local.insert(local, (remote, control));
        self.by_remote.insert(remote, local);
        Ok(())
    }

    fn remote(&self, local: ConnectorAddress) -> Option<&(Endpoint, Arc<C>)> {
        self.by_local.get(&local)
    }

    fn local(&self, remote: &Endpoint) -> Option<ConnectorAddress> {
        self.by_remote.get(remote).copied()
    }

    fn entries(&self) -> Vec<(ConnectorAddress, Endpoint, Arc<C>)> {
        self.by_local
            .iter()
            .map(|(local, (remote, control))| (*local, *remote, control.clone()))
            .collect()
    }

    fn len(&self) -> usize {
        self.by_local.len()
    }
}

/// Which side of the graph a subscribed control sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Side {
    Upstream,
    Downstream,
}

enum SubscribedControl {
    Producer(Arc<dyn ContentProducer>),
    Consumer(Arc<dyn ContentConsumer>),
}

struct Subscription {
    control: ControlRef,
    handle: SubscribedControl,
    id: SubscriptionId,
}

impl Subscription {
    fn cancel(self) {
        let removed = match &self.handle {
            SubscribedControl::Producer(producer) => producer.unsubscribe_content(self.id),
            SubscribedControl::Consumer(consumer) => consumer.unsubscribe_content(self.id),
        };
        if !removed {
            debug!("Subscription {} on {} was already gone", self.id, self.control);
        }
    }
}

#[derive(Default)]
struct GraphState {
    upstream: EndpointMap<dyn ContentProducer>,
    downstream: EndpointMap<dyn ContentConsumer>,
    subscriptions: Vec<Subscription>,
}

/// Outcome of a rebuild.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildReport {
    pub inputs_mapped: usize,
    pub outputs_mapped: usize,
    pub controls_subscribed: usize,
    /// Connections that could not be mapped; each was logged and skipped.
    pub skipped: Vec<TopologyError>,
}

/// Forwards content notifications of one external control into the graph.
struct ContentForwarder {
    graph: Weak<EndpointReconciliationGraph>,
    control: ControlRef,
    side: Side,
}

impl ContentChangeListener for ContentForwarder {
    fn on_content_changed(&self, change: ContentChange) {
        let Some(graph) = self.graph.upgrade() else { return; };
        // A control on both sides gets one forwarder per side; each takes only its kind.
        match (self.side, change) {
            (Side::Upstream, ContentChange::Produced(address)) => {
                graph.on_upstream_content_changed(self.control.endpoint(address))
            }
            (Side::Downstream, ContentChange::Consumed(address)) => {
                graph.on_downstream_content_changed(self.control.endpoint(address))
            }
            _ => {}
        }
    }
}

/// Derives routing for a soft-routed component by matching content identifiers.
///
/// Each local input faces an upstream producer endpoint and each local output faces a
/// downstream consumer endpoint. An output is routed from the input whose upstream
/// produces exactly what the output's downstream currently consumes. The downstream side
/// is authoritative: a destination may clear or refuse content on its own.
///
/// The graph never holds its lock while calling an external control, so controls may
/// notify synchronously from inside `consume`.
pub struct EndpointReconciliationGraph {
    control: ControlRef,
    resolver: Arc<dyn ControlResolver>,
    cache: Arc<RoutingStateCache>,
    router: CompositeOperationRouter,
    config: GraphConfig,
    state: Mutex<GraphState>,
    self_ref: Weak<EndpointReconciliationGraph>,
}

impl EndpointReconciliationGraph {
    /// Creates a graph for `control`, whose own connectors are `inputs` and `outputs`.
    pub fn new<I, O>(
        control: ControlRef,
        inputs: I,
        outputs: O,
        resolver: Arc<dyn ControlResolver>,
        config: GraphConfig,
    ) -> Arc<Self>
    where
        I: IntoIterator<Item = ConnectorInfo>,
        O: IntoIterator<Item = ConnectorInfo>,
    {
        let cache = Arc::new(RoutingStateCache::with_config(inputs, outputs, config.cache.clone()));
        Arc::new_cyclic(|self_ref| Self {
            control,
            resolver,
            cache,
            router: CompositeOperationRouter::default(),
            config,
            state: Mutex::new(GraphState::default()),
            self_ref: self_ref.clone(),
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, GraphState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn control(&self) -> ControlRef {
        self.control
    }

    /// The cache this graph publishes derived routing into.
    pub fn cache(&self) -> Arc<RoutingStateCache> {
        self.cache.clone()
    }

    /// Upstream endpoint feeding a local input.
    pub fn upstream_of(&self, input: ConnectorAddress) -> Option<Endpoint> {
        self.lock_state().upstream.remote(input).map(|(endpoint, _)| *endpoint)
    }

    /// Downstream endpoint fed by a local output.
    pub fn downstream_of(&self, output: ConnectorAddress) -> Option<Endpoint> {
        self.lock_state().downstream.remote(output).map(|(endpoint, _)| *endpoint)
    }

    pub fn input_for_upstream(&self, endpoint: &Endpoint) -> Option<ConnectorAddress> {
        self.lock_state().upstream.local(endpoint)
    }

    pub fn output_for_downstream(&self, endpoint: &Endpoint) -> Option<ConnectorAddress> {
        self.lock_state().downstream.local(endpoint)
    }

    /// Input feeding `output` for every media class the graph routes, if they agree.
    ///
    /// Soft routing moves all classes together, so disagreement only shows up transiently.
    pub fn input_for_output(&self, output: ConnectorAddress) -> Result<Option<ConnectorInfo>, RoutingError> {
        let mut agreed: Option<Option<ConnectorInfo>> = None;
        for flag in self.config.route_flags.elementary() {
            let current = self.cache.get_input_for_output(output, flag)?;
            match &agreed {
                None => agreed = Some(current),
                Some(previous) if *previous != current => return Ok(None),
                Some(_) => {}
            }
        }
        Ok(agreed.flatten())
    }

    fn check_local(&self, role: ConnectorRole, address: ConnectorAddress) -> Result<(), TopologyError> {
        let info = match role {
            ConnectorRole::Input => self.cache.input_info(address),
            ConnectorRole::Output => self.cache.output_info(address),
        };
        match info {
            None => Err(TopologyError::UnknownLocalConnector { role, address }),
            Some(info) if !info.supports(self.config.route_flags) => Err(TopologyError::UnsupportedLocalConnector {
                role,
                address,
                flags: self.config.route_flags,
            }),
            Some(_) => Ok(()),
        }
    }

    fn subscribe(&self, control: ControlRef, side: Side, handle: SubscribedControl) -> Subscription {
        let listener = Arc::new(ContentForwarder {
            graph: self.self_ref.clone(),
            control,
            side,
        });
        let id = match &handle {
            SubscribedControl::Producer(producer) => producer.subscribe_content(listener),
            SubscribedControl::Consumer(consumer) => consumer.subscribe_content(listener),
        };
        Subscription { control, handle, id }
    }

    fn skip(report: &mut BuildReport, connection: &str, err: TopologyError) {
        warn!("Skipping connection {}: {}", connection, err);
        report.skipped.push(err);
    }

    /// Rebuilds endpoint mappings from `topology` and runs one reconciliation pass.
    ///
    /// Previous mappings and subscriptions are discarded and the cache is cleared first.
    /// A connection that cannot be resolved is logged and skipped; the rest still apply.
    pub fn rebuild(&self, topology: &Topology) -> Result<BuildReport, RoutingError> {
        let previous = std::mem::take(&mut self.lock_state().subscriptions);
        for subscription in previous {
            subscription.cancel();
        }
        {
            let mut state = self.lock_state();
            state.upstream = EndpointMap::default();
            state.downstream = EndpointMap::default();
        }
        self.cache.clear();

        let mut report = BuildReport::default();
        let mut upstream: EndpointMap<dyn ContentProducer> = EndpointMap::default();
        let mut downstream: EndpointMap<dyn ContentConsumer> = EndpointMap::default();

        for connection in topology.connections_to(self.control) {
            let local = connection.destination.address;
            let description = format!("{} -> {}", connection.source, connection.destination);
            let mapped = self
                .check_local(ConnectorRole::Input, local)
                .and_then(|_| self.resolver.resolve_producer(connection.source.control))
                .and_then(|producer| upstream.insert(ConnectorRole::Input, local, connection.source, producer));
            if let Err(err) = mapped {
                Self::skip(&mut report, &description, err);
            }
        }

        for connection in topology.connections_from(self.control) {
            let local = connection.source.address;
            let description = format!("{} -> {}", connection.source, connection.destination);
            let mapped = self
                .check_local(ConnectorRole::Output, local)
                .and_then(|_| self.resolver.resolve_consumer(connection.destination.control))
                .and_then(|consumer| downstream.insert(ConnectorRole::Output, local, connection.destination, consumer));
            if let Err(err) = mapped {
                Self::skip(&mut report, &description, err);
            }
        }

        let mut seen: HashSet<(ControlRef, Side)> = HashSet::new();
        let mut subscriptions = Vec::new();
        for (_, remote, producer) in upstream.entries() {
            if seen.insert((remote.control, Side::Upstream)) {
                subscriptions.push(self.subscribe(remote.control, Side::Upstream, SubscribedControl::Producer(producer)));
            }
        }
        for (_, remote, consumer) in downstream.entries() {
            if seen.insert((remote.control, Side::Downstream)) {
                subscriptions.push(self.subscribe(remote.control, Side::Downstream, SubscribedControl::Consumer(consumer)));
            }
        }

        report.inputs_mapped = upstream.len();
        report.outputs_mapped = downstream.len();
        report.controls_subscribed = subscriptions.len();
        {
            let mut state = self.lock_state();
            state.upstream = upstream;
            state.downstream = downstream;
            state.subscriptions = subscriptions;
        }

        info!(
            "Graph {} rebuilt: {} inputs, {} outputs mapped, {} controls subscribed, {} connections skipped",
            self.control,
            report.inputs_mapped,
            report.outputs_mapped,
            report.controls_subscribed,
            report.skipped.len()
        );

        self.reconcile()?;
        Ok(report)
    }

    /// Re-derives the route of every mapped output from current content.
    ///
    /// A full pass over outputs × inputs; only actual changes reach the cache's listeners.
    pub fn reconcile(&self) -> Result<(), RoutingError> {
        let (inputs, outputs) = {
            let state = self.lock_state();
            (state.upstream.entries(), state.downstream.entries())
        };

        for (output, remote, consumer) in outputs {
            let consumed = consumer
                .consumed_content(remote.address)
                .filter(|content| !content.is_empty());
            let source = consumed.as_deref().and_then(|content| {
                inputs
                    .iter()
                    .find(|(_, upstream, producer)| {
                        producer.produced_content(upstream.address).as_deref() == Some(content)
                    })
                    .map(|(input, _, _)| *input)
            });

            self.router.route(self.config.route_flags, |flag| {
                self.cache.set_input_for_output(output, source, flag)?;
                Ok(true)
            })?;
        }
        Ok(())
    }

    /// Soft take: makes `output`'s downstream consume what `input`'s upstream produces.
    ///
    /// `None` makes the downstream stop consuming. The cache follows from reconciliation,
    /// so a destination that refuses the content is reported as it really is.
    pub fn route(&self, input: Option<ConnectorAddress>, output: ConnectorAddress) -> Result<(), Error> {
        let (downstream, upstream) = {
            let state = self.lock_state();
            let downstream = state
                .downstream
                .remote(output)
                .cloned()
                .ok_or_else(|| anyhow!("Output {} of {} has no downstream consumer", output, self.control))?;
            let upstream = match input {
                Some(input) => Some(
                    state
                        .upstream
                        .remote(input)
                        .cloned()
                        .ok_or_else(|| anyhow!("Input {} of {} has no upstream producer", input, self.control))?,
                ),
                None => None,
            };
            (downstream, upstream)
        };

        let content = upstream.and_then(|(endpoint, producer)| producer.produced_content(endpoint.address));
        let (endpoint, consumer) = downstream;
        debug!("Soft route {:?} -> {}: pushing {:?} to {}", input, output, content, endpoint);
        consumer.consume(endpoint.address, content.as_deref())?;

        self.reconcile()?;
        Ok(())
    }

    fn on_upstream_content_changed(&self, endpoint: Endpoint) {
        let Some(input) = self.input_for_upstream(&endpoint) else {
            debug!("Content change on unmapped upstream {}", endpoint);
            return;
        };
        let selecting = match self.cache.get_outputs_for_input(input, self.config.route_flags) {
            Ok(outputs) => outputs,
            Err(e) => {
                error!("Failed to look up outputs selecting input {}: {}", input, e);
                return;
            }
        };
        let (upstream, targets) = {
            let state = self.lock_state();
            let targets: Vec<_> = selecting
                .iter()
                .filter_map(|output| state.downstream.remote(output.address()).cloned())
                .collect();
            (state.upstream.remote(input).cloned(), targets)
        };
        let content = upstream.and_then(|(remote, producer)| producer.produced_content(remote.address));

        debug!("Upstream {} now produces {:?}; forwarding to {} destinations", endpoint, content, targets.len());
        for (remote, consumer) in targets {
            if let Err(e) = consumer.consume(remote.address, content.as_deref()) {
                error!("Failed to forward content to {}: {}", remote, e);
            }
        }

        // Refused pushes and idle outputs whose destination already consumes the new
        // content raise no downstream notification, so re-derive here as well.
        if let Err(e) = self.reconcile() {
            error!("Reconciliation of {} failed: {}", self.control, e);
        }
    }

    fn on_downstream_content_changed(&self, endpoint: Endpoint) {
        debug!("Downstream {} content changed", endpoint);
        if let Err(e) = self.reconcile() {
            error!("Reconciliation of {} failed: {}", self.control, e);
        }
    }
}

impl Drop for EndpointReconciliationGraph {
    fn drop(&mut self) {
        let subscriptions = std::mem::take(&mut self.lock_state().subscriptions);
        for subscription in subscriptions {
            subscription.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    use uuid::Uuid;

    use crate::content_control::{ContentNotifier, ContentSubscribers, ControlRegistry, InMemoryStreamControl};
    use crate::definitions::ConnectionType;
    use crate::errors::ControlError;
    use crate::routing_events::{routing_listener, RoutingEvent};

    const AV: ConnectionType = ConnectionType::AudioVideo;

    fn control(n: u32) -> ControlRef {
        ControlRef::new(Uuid::from_u128(0xa0), n)
    }

    fn av_connectors(count: u32) -> Vec<ConnectorInfo> {
        (1..=count).map(|a| ConnectorInfo::new(a, AV)).collect()
    }

    struct Fixture {
        graph: Arc<EndpointReconciliationGraph>,
        encoders: Vec<Arc<InMemoryStreamControl>>,
        decoders: Vec<Arc<InMemoryStreamControl>>,
        topology: Topology,
    }

    // Switcher control 0 with `n` inputs fed by encoders 1..=n and `n` outputs feeding
    // decoders 101..=100+n, one connector each.
    fn fixture(n: u32) -> Fixture {
        let registry = Arc::new(ControlRegistry::new());
        let switcher = control(0);
        let mut topology = Topology::new();
        let mut encoders = Vec::new();
        let mut decoders = Vec::new();
        for i in 1..=n {
            let encoder = Arc::new(InMemoryStreamControl::new());
            registry.register_producer(control(i), encoder.clone());
            topology.add_connection(control(i).endpoint(1), switcher.endpoint(i));
            encoders.push(encoder);

            let decoder = Arc::new(InMemoryStreamControl::new());
            registry.register_consumer(control(100 + i), decoder.clone());
            topology.add_connection(switcher.endpoint(i), control(100 + i).endpoint(1));
            decoders.push(decoder);
        }
        let graph = EndpointReconciliationGraph::new(
            switcher,
            av_connectors(n),
            av_connectors(n),
            registry,
            GraphConfig::default(),
        );
        Fixture { graph, encoders, decoders, topology }
    }

    fn routed_input(graph: &EndpointReconciliationGraph, output: ConnectorAddress) -> Option<ConnectorAddress> {
        let cache = graph.cache();
        let video = cache.get_input_for_output(output, ConnectionType::Video).unwrap().map(|i| i.address());
        let audio = cache.get_input_for_output(output, ConnectionType::Audio).unwrap().map(|i| i.address());
        assert_eq!(video, audio, "audio and video must follow the same stream");
        video
    }

    #[test]
    fn rebuild_maps_both_sides_and_subscribes_once_per_control() {
        let f = fixture(2);
        let report = f.graph.rebuild(&f.topology).unwrap();

        assert_eq!(report.inputs_mapped, 2);
        assert_eq!(report.outputs_mapped, 2);
        assert_eq!(report.controls_subscribed, 4);
        assert!(report.skipped.is_empty());
        assert_eq!(f.graph.upstream_of(2), Some(control(2).endpoint(1)));
        assert_eq!(f.graph.downstream_of(1), Some(control(101).endpoint(1)));
        assert_eq!(f.graph.input_for_upstream(&control(1).endpoint(1)), Some(1));
        assert_eq!(f.graph.output_for_downstream(&control(102).endpoint(1)), Some(2));
        assert_eq!(f.encoders[0].subscriber_count(), 1);
        assert_eq!(f.decoders[1].subscriber_count(), 1);
    }

    #[test]
    fn rebuild_replaces_previous_subscriptions() {
        let f = fixture(1);
        f.graph.rebuild(&f.topology).unwrap();
        f.graph.rebuild(&f.topology).unwrap();
        assert_eq!(f.encoders[0].subscriber_count(), 1);

        f.graph.rebuild(&Topology::new()).unwrap();
        assert_eq!(f.encoders[0].subscriber_count(), 0);
        assert_eq!(f.graph.upstream_of(1), None);
    }

    #[test]
    fn unresolvable_connections_are_skipped_without_aborting() {
        let f = fixture(1);
        let topology = f
            .topology
            .clone()
            .with_connection(control(55).endpoint(1), control(0).endpoint(1))
            .with_connection(control(0).endpoint(9), control(101).endpoint(2))
            .with_connection(control(0).endpoint(1), control(1).endpoint(3));

        let report = f.graph.rebuild(&topology).unwrap();

        assert_eq!(report.inputs_mapped, 1);
        assert_eq!(report.outputs_mapped, 1);
        assert_eq!(report.skipped.len(), 3);
        assert!(report.skipped.contains(&TopologyError::ControlNotFound(control(55))));
        assert!(report.skipped.contains(&TopologyError::UnknownLocalConnector {
            role: ConnectorRole::Output,
            address: 9
        }));
        assert!(report.skipped.contains(&TopologyError::NotAConsumer(control(1))));
    }

    #[test]
    fn unsupported_connectors_and_remote_collisions_are_reported_precisely() {
        let registry = Arc::new(ControlRegistry::new());
        registry.register_producer(control(1), Arc::new(InMemoryStreamControl::new()));
        registry.register_producer(control(2), Arc::new(InMemoryStreamControl::new()));
        let inputs = vec![
            ConnectorInfo::new(1, AV),
            ConnectorInfo::new(2, AV),
            ConnectorInfo::new(3, ConnectionType::Audio),
        ];
        let graph = EndpointReconciliationGraph::new(control(0), inputs, av_connectors(1), registry, GraphConfig::default());
        let topology = Topology::new()
            .with_connection(control(1).endpoint(1), control(0).endpoint(1))
            .with_connection(control(1).endpoint(1), control(0).endpoint(2))
            .with_connection(control(2).endpoint(1), control(0).endpoint(1))
            .with_connection(control(2).endpoint(2), control(0).endpoint(3));

        let report = graph.rebuild(&topology).unwrap();

        assert_eq!(report.inputs_mapped, 1);
        assert_eq!(
            report.skipped,
            vec![
                TopologyError::DuplicateEndpoint {
                    role: ConnectorRole::Input,
                    endpoint: control(1).endpoint(1),
                    mapped: 1,
                },
                TopologyError::DuplicateMapping { role: ConnectorRole::Input, address: 1 },
                TopologyError::UnsupportedLocalConnector {
                    role: ConnectorRole::Input,
                    address: 3,
                    flags: AV,
                },
            ]
        );
    }

    #[test]
    fn build_derives_routing_from_current_content() {
        let f = fixture(2);
        f.encoders[0].set_produced(1, Some("rtsp://x"));
        f.encoders[1].set_produced(1, Some("rtsp://y"));
        f.decoders[0].set_consumed(1, Some("rtsp://y"));

        f.graph.rebuild(&f.topology).unwrap();

        assert_eq!(routed_input(&f.graph, 1), Some(2));
        assert_eq!(routed_input(&f.graph, 2), None);
    }

    #[test]
    fn external_consumer_change_triggers_reconciliation() {
        let f = fixture(2);
        f.encoders[0].set_produced(1, Some("rtsp://x"));
        f.graph.rebuild(&f.topology).unwrap();
        assert_eq!(routed_input(&f.graph, 2), None);

        f.decoders[1].set_consumed(1, Some("rtsp://x"));
        assert_eq!(routed_input(&f.graph, 2), Some(1));

        f.decoders[1].set_consumed(1, Some("rtsp://elsewhere"));
        assert_eq!(routed_input(&f.graph, 2), None);
    }

    #[test]
    fn soft_route_pushes_content_and_updates_cache() {
        let f = fixture(2);
        f.encoders[1].set_produced(1, Some("rtsp://y"));
        f.graph.rebuild(&f.topology).unwrap();

        f.graph.route(Some(2), 1).unwrap();

        assert_eq!(f.decoders[0].consumed_content(1).as_deref(), Some("rtsp://y"));
        assert_eq!(routed_input(&f.graph, 1), Some(2));

        f.graph.route(None, 1).unwrap();
        assert_eq!(f.decoders[0].consumed_content(1), None);
        assert_eq!(routed_input(&f.graph, 1), None);
    }

    #[test]
    fn soft_route_rejects_unmapped_connectors() {
        let f = fixture(1);
        f.graph.rebuild(&f.topology).unwrap();
        assert!(f.graph.route(Some(1), 7).is_err());
        assert!(f.graph.route(Some(7), 1).is_err());
    }

    #[test]
    fn producer_change_is_forwarded_to_selecting_destinations() {
        let f = fixture(2);
        f.encoders[0].set_produced(1, Some("rtsp://x/1"));
        f.graph.rebuild(&f.topology).unwrap();
        f.graph.route(Some(1), 1).unwrap();
        f.graph.route(Some(1), 2).unwrap();

        f.encoders[0].set_produced(1, Some("rtsp://x/2"));

        assert_eq!(f.decoders[0].consumed_content(1).as_deref(), Some("rtsp://x/2"));
        assert_eq!(f.decoders[1].consumed_content(1).as_deref(), Some("rtsp://x/2"));
        assert_eq!(routed_input(&f.graph, 1), Some(1));
        assert_eq!(routed_input(&f.graph, 2), Some(1));
    }

    #[test]
    fn producer_change_does_not_touch_other_destinations() {
        let f = fixture(2);
        f.encoders[0].set_produced(1, Some("rtsp://a"));
        f.encoders[1].set_produced(1, Some("rtsp://b"));
        f.graph.rebuild(&f.topology).unwrap();
        f.graph.route(Some(1), 1).unwrap();
        f.graph.route(Some(2), 2).unwrap();

        f.encoders[0].set_produced(1, Some("rtsp://a2"));

        assert_eq!(f.decoders[1].consumed_content(1).as_deref(), Some("rtsp://b"));
        assert_eq!(routed_input(&f.graph, 2), Some(2));
    }

    #[test]
    fn idle_output_follows_upstream_that_starts_producing_its_content() {
        let f = fixture(1);
        f.encoders[0].set_produced(1, Some("rtsp://x"));
        f.decoders[0].set_consumed(1, Some("rtsp://y"));
        f.graph.rebuild(&f.topology).unwrap();
        assert_eq!(routed_input(&f.graph, 1), None);

        f.encoders[0].set_produced(1, Some("rtsp://y"));

        assert_eq!(routed_input(&f.graph, 1), Some(1));
    }

    #[test]
    fn loopback_control_consume_is_not_taken_for_a_producer_change() {
        let registry = Arc::new(ControlRegistry::new());
        let looped = Arc::new(InMemoryStreamControl::new());
        let encoder = Arc::new(InMemoryStreamControl::new());
        registry.register_producer(control(1), looped.clone());
        registry.register_consumer(control(1), looped.clone());
        registry.register_producer(control(2), encoder.clone());
        let topology = Topology::new()
            .with_connection(control(1).endpoint(1), control(0).endpoint(1))
            .with_connection(control(2).endpoint(1), control(0).endpoint(2))
            .with_connection(control(0).endpoint(1), control(1).endpoint(1));
        let graph =
            EndpointReconciliationGraph::new(control(0), av_connectors(2), av_connectors(1), registry, GraphConfig::default());
        looped.set_produced(1, Some("rtsp://a"));
        looped.set_consumed(1, Some("rtsp://a"));
        encoder.set_produced(1, Some("rtsp://b"));
        let report = graph.rebuild(&topology).unwrap();
        assert_eq!(report.controls_subscribed, 3);
        assert_eq!(routed_input(&graph, 1), Some(1));

        graph.route(Some(2), 1).unwrap();

        assert_eq!(looped.consumed_content(1).as_deref(), Some("rtsp://b"));
        assert_eq!(routed_input(&graph, 1), Some(2));
    }

    #[test]
    fn reconciliation_emits_each_route_change_once() {
        let f = fixture(1);
        f.encoders[0].set_produced(1, Some("rtsp://x"));
        f.graph.rebuild(&f.topology).unwrap();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        f.graph.cache().add_listener(routing_listener(move |event: &RoutingEvent| {
            if matches!(event, RoutingEvent::RouteChanged { .. }) {
                sink.lock().unwrap().push(event.clone());
            }
        }));

        f.graph.route(Some(1), 1).unwrap();
        f.graph.reconcile().unwrap();
        f.graph.reconcile().unwrap();

        assert_eq!(events.lock().unwrap().len(), 2);
    }

    struct RefusingDecoder {
        consumed: Mutex<Option<String>>,
        refuse: AtomicBool,
        subscribers: ContentSubscribers,
    }

    impl ContentNotifier for RefusingDecoder {
        fn subscribe_content(&self, listener: Arc<dyn ContentChangeListener>) -> SubscriptionId {
            self.subscribers.subscribe(listener)
        }

        fn unsubscribe_content(&self, id: SubscriptionId) -> bool {
            self.subscribers.unsubscribe(id)
        }
    }

    impl ContentConsumer for RefusingDecoder {
        fn consumed_content(&self, _input: ConnectorAddress) -> Option<String> {
            self.consumed.lock().unwrap().clone()
        }

        fn consume(&self, input: ConnectorAddress, content: Option<&str>) -> Result<(), ControlError> {
            if self.refuse.load(Ordering::SeqCst) {
                return Err(ControlError::Rejected {
                    control: control(101),
                    input,
                    reason: "unsupported codec".to_string(),
                });
            }
            *self.consumed.lock().unwrap() = content.map(str::to_string);
            self.subscribers.notify(ContentChange::Consumed(input));
            Ok(())
        }
    }

    #[test]
    fn refused_forward_clears_stale_route() {
        let registry = Arc::new(ControlRegistry::new());
        let encoder = Arc::new(InMemoryStreamControl::new());
        let decoder = Arc::new(RefusingDecoder {
            consumed: Mutex::new(None),
            refuse: AtomicBool::new(false),
            subscribers: ContentSubscribers::default(),
        });
        registry.register_producer(control(1), encoder.clone());
        registry.register_consumer(control(101), decoder.clone());
        let topology = Topology::new()
            .with_connection(control(1).endpoint(1), control(0).endpoint(1))
            .with_connection(control(0).endpoint(1), control(101).endpoint(1));
        let graph =
            EndpointReconciliationGraph::new(control(0), av_connectors(1), av_connectors(1), registry, GraphConfig::default());
        encoder.set_produced(1, Some("rtsp://x"));
        graph.rebuild(&topology).unwrap();
        graph.route(Some(1), 1).unwrap();
        assert_eq!(routed_input(&graph, 1), Some(1));

        decoder.refuse.store(true, Ordering::SeqCst);
        encoder.set_produced(1, Some("rtsp://x-hevc"));

        assert_eq!(decoder.consumed_content(1).as_deref(), Some("rtsp://x"));
        assert_eq!(routed_input(&graph, 1), None);
        assert!(graph.route(Some(1), 1).is_err());
    }

    #[test]
    fn dropping_the_graph_unsubscribes() {
        let f = fixture(1);
        f.graph.rebuild(&f.topology).unwrap();
        let encoder = f.encoders[0].clone();
        assert_eq!(encoder.subscriber_count(), 1);

        drop(f.graph);

        assert_eq!(encoder.subscriber_count(), 0);
    }
}

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

use log::{error, info, warn};
use tokio::select;
use tokio::sync::broadcast;

use crate::reconciliation_graph::EndpointReconciliationGraph;
use crate::service::{spawn_service, ServiceHandle};
use crate::topology::TopologyEvent;

/// Keeps `graph` in step with published topology changes.
///
/// Each `Changed` event rebuilds the graph; `Refresh` runs a reconciliation pass over the
/// existing mappings. The service stops on shutdown or when the channel closes.
pub fn run_topology_watch(
    graph: Arc<EndpointReconciliationGraph>,
    mut topology_rx: broadcast::Receiver<TopologyEvent>,
) -> ServiceHandle {
    let name = format!("topology-watch {}", graph.control());
    spawn_service(name, move |mut stop| async move {
        info!("Topology watch for {} started", graph.control());
        loop {
            select! {
                biased;
                _ = stop.signaled() => {
                    info!("Topology watch for {} shutdown requested", graph.control());
                    break;
                }
                recv_res = topology_rx.recv() => {
                    match recv_res {
                        Ok(TopologyEvent::Changed(topology)) => {
                            if let Err(e) = graph.rebuild(&topology) {
                                error!("Rebuild of {} failed: {}", graph.control(), e);
                            }
                        }
                        Ok(TopologyEvent::Refresh) => {
                            if let Err(e) = graph.reconcile() {
                                error!("Reconciliation of {} failed: {}", graph.control(), e);
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!("TopologyEvent lagged by {} messages; catching up", n);
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            info!("TopologyEvent channel closed; stopping topology watch");
                            break;
                        }
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{sleep, Duration};
    use uuid::Uuid;

    use crate::config::GraphConfig;
    use crate::content_control::{ControlRegistry, InMemoryStreamControl};
    use crate::definitions::{ConnectionType, ConnectorInfo};
    use crate::topology::{ControlRef, Topology};

    fn control(n: u32) -> ControlRef {
        ControlRef::new(Uuid::from_u128(0xb0), n)
    }

    async fn short_wait() {
        sleep(Duration::from_millis(20)).await
    }

    fn setup() -> (Arc<EndpointReconciliationGraph>, Arc<InMemoryStreamControl>, Arc<InMemoryStreamControl>, Topology) {
        let registry = Arc::new(ControlRegistry::new());
        let encoder = Arc::new(InMemoryStreamControl::new());
        let decoder = Arc::new(InMemoryStreamControl::new());
        registry.register_producer(control(1), encoder.clone());
        registry.register_consumer(control(2), decoder.clone());
        let graph = EndpointReconciliationGraph::new(
            control(0),
            [ConnectorInfo::new(1, ConnectionType::AudioVideo)],
            [ConnectorInfo::new(1, ConnectionType::AudioVideo)],
            registry,
            GraphConfig::default(),
        );
        let topology = Topology::new()
            .with_connection(control(1).endpoint(1), control(0).endpoint(1))
            .with_connection(control(0).endpoint(1), control(2).endpoint(1));
        (graph, encoder, decoder, topology)
    }

    #[tokio::test]
    async fn changed_topology_rebuilds_graph() {
        let (graph, encoder, decoder, topology) = setup();
        encoder.set_produced(1, Some("rtsp://x"));
        decoder.set_consumed(1, Some("rtsp://x"));
        let (tx, rx) = broadcast::channel(8);
        let handle = run_topology_watch(graph.clone(), rx);

        tx.send(TopologyEvent::Changed(Arc::new(topology))).unwrap();
        short_wait().await;

        assert_eq!(graph.upstream_of(1), Some(control(1).endpoint(1)));
        let routed = graph.cache().get_input_for_output(1, ConnectionType::Video).unwrap();
        assert_eq!(routed.map(|i| i.address()), Some(1));

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn refresh_reconciles_without_rebuilding() {
        let (graph, encoder, decoder, topology) = setup();
        graph.rebuild(&topology).unwrap();
        let (tx, rx) = broadcast::channel(8);
        let handle = run_topology_watch(graph.clone(), rx);

        encoder.set_produced(1, Some("rtsp://x"));
        decoder.set_consumed(1, Some("rtsp://x"));
        // Clearing drops derived routing; a refresh re-derives it from content.
        graph.cache().clear();
        tx.send(TopologyEvent::Refresh).unwrap();
        short_wait().await;

        let routed = graph.cache().get_input_for_output(1, ConnectionType::Audio).unwrap();
        assert_eq!(routed.map(|i| i.address()), Some(1));

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn watch_stops_when_channel_closes() {
        let (graph, _, _, _) = setup();
        let (tx, rx) = broadcast::channel::<TopologyEvent>(8);
        let handle = run_topology_watch(graph, rx);

        drop(tx);
        short_wait().await;

        assert!(handle.is_finished());
        handle.await_join().await.unwrap();
    }
}

// Example showing a hardware crosspoint and a soft-routed stream switcher side by side
use std::sync::Arc;
use std::time::Duration;
use anyhow::Result;
use avroute_core::{run_topology_watch, routing_listener, CachedSwitcher, ConnectionType, ContentConsumer,
                   ConnectorAddress, ConnectorInfo, ControlRef, ControlRegistry, CrosspointDriver,
                   EndpointReconciliationGraph, GraphConfig, InMemoryStreamControl, MultiServiceHandle,
                   RoutingError, RoutingEvent, SwitcherControl, Topology, TopologyEvent};
use log::info;
use tokio::sync::broadcast;

struct LoggingDriver;

impl CrosspointDriver for LoggingDriver {
    fn apply_route(&self, input: Option<ConnectorAddress>, output: ConnectorAddress, flag: ConnectionType)
        -> Result<bool, RoutingError> {
        info!("[matrix] {} {:?} -> {}", flag, input, output);
        Ok(true)
    }
}

fn log_events(label: &'static str) -> Arc<dyn avroute_core::RoutingEventListener> {
    routing_listener(move |event: &RoutingEvent| info!("[{}] {:?}", label, event))
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    // Hardware matrix: 4x4 audio/video with audio breakaway
    let av = ConnectionType::AudioVideo;
    let connectors: Vec<_> = (1..=4).map(|a| ConnectorInfo::new(a, av).with_name(format!("Port {a}"))).collect();
    let matrix = CachedSwitcher::new(Arc::new(LoggingDriver), connectors.clone(), connectors);
    matrix.cache().add_listener(log_events("matrix"));
    matrix.route(1, 1, av)?;
    matrix.route(2, 1, ConnectionType::Audio)?;
    matrix.on_signal_feedback(1, av, true)?;
    info!("Outputs carrying input 1 audio+video: {:?}", matrix.outputs_for_input(1, av)?);

    // Soft switcher between two encoders and one decoder
    let switcher = ControlRef::for_device("AV Route", "Stream Switcher", "demo-0001", 0);
    let device = switcher.device;
    let registry = Arc::new(ControlRegistry::new());
    let mut topology = Topology::new();
    let mut encoders = Vec::new();
    for i in 1..=2 {
        let encoder = Arc::new(InMemoryStreamControl::new());
        encoder.set_produced(1, Some(&format!("rtsp://10.0.0.{i}/live")));
        registry.register_producer(ControlRef::new(device, i), encoder.clone());
        topology.add_connection(ControlRef::new(device, i).endpoint(1), switcher.endpoint(i));
        encoders.push(encoder);
    }
    let decoder = Arc::new(InMemoryStreamControl::new());
    registry.register_consumer(ControlRef::new(device, 10), decoder.clone());
    topology.add_connection(switcher.endpoint(1), ControlRef::new(device, 10).endpoint(1));

    let graph = EndpointReconciliationGraph::new(
        switcher,
        (1..=2).map(|a| ConnectorInfo::new(a, av)),
        [ConnectorInfo::new(1, av)],
        registry,
        GraphConfig::default(),
    );
    graph.cache().add_listener(log_events("stream"));

    let (topology_tx, topology_rx) = broadcast::channel(16);
    let mut services = MultiServiceHandle::new();
    services.add(run_topology_watch(graph.clone(), topology_rx));

    topology_tx.send(TopologyEvent::Changed(Arc::new(topology)))?;
    tokio::time::sleep(Duration::from_millis(50)).await;

    graph.route(Some(2), 1)?;
    encoders[1].set_produced(1, Some("rtsp://10.0.0.2/backup"));
    info!("Decoder now plays {:?}", decoder.consumed_content(1));

    services.shutdown().await?;
    Ok(())
}

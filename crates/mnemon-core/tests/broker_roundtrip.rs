//! Broker round trip: external publisher → pull endpoint → fabric →
//! pub endpoint → external subscriber, plus the ACKNOWLEDGE/STATUS
//! metrics handshake.

mod common;

use common::{Collector, StubEmbedding, StubLlm};
use futures::{SinkExt, StreamExt};
use mnemon_core::bus::{BrokerService, Topic};
use mnemon_core::plugin::PluginRegistry;
use mnemon_core::recorder::MockRecorder;
use mnemon_core::runtime::{Host, Profile};
use mnemon_core::services::ConsolidateService;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

async fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("addr").port();
    drop(listener);
    port
}

#[tokio::test]
async fn acknowledge_round_trip_over_the_broker() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = common::test_config(&dir);
    let pull_port = free_port().await;
    let pub_port = free_port().await;
    config.broker.enabled = true;
    config.broker.pull_endpoint = format!("tcp://127.0.0.1:{pull_port}");
    config.broker.pub_endpoint = format!("tcp://127.0.0.1:{pub_port}");

    let recorder = Arc::new(MockRecorder::new());
    let mut registry = PluginRegistry::new();
    registry.register_llm("gen_indices", Arc::new(StubLlm::indices(&["index"])));
    registry.register_embedding("gen_embed", Arc::new(StubEmbedding::fixed(vec![0.1])));

    let broker = BrokerService::new(&config.broker).expect("broker");
    let consolidate = ConsolidateService::new(&registry, recorder.clone()).expect("consolidate");

    let mut host = Host::with_registry(
        Profile::Standard,
        config,
        Arc::new(registry),
        recorder,
    );
    host.install(broker).await.expect("install broker");
    host.install(consolidate).await.expect("install consolidate");
    host.install(Collector::new(vec![Topic::Status]))
        .await
        .expect("install collector");
    let collector = host.get_service::<Collector>().expect("collector");

    // External subscriber connects to the pub endpoint.
    let subscriber = TcpStream::connect(format!("127.0.0.1:{pub_port}"))
        .await
        .expect("subscriber connect");
    let mut sub_frames = FramedRead::new(subscriber, LengthDelimitedCodec::new());

    // External publisher pushes an ACKNOWLEDGE through the pull endpoint.
    let publisher = TcpStream::connect(format!("127.0.0.1:{pull_port}"))
        .await
        .expect("publisher connect");
    let mut pub_frames = FramedWrite::new(publisher, LengthDelimitedCodec::new());
    tokio::time::sleep(Duration::from_millis(50)).await;
    pub_frames
        .send(b"ACKNOWLEDGE".to_vec().into())
        .await
        .expect("topic frame");
    pub_frames
        .send(b"{}".to_vec().into())
        .await
        .expect("payload frame");

    // Every running service answers with exactly one STATUS.
    assert!(
        collector
            .wait_for(Topic::Status, 2, Duration::from_secs(3))
            .await
    );
    tokio::time::sleep(Duration::from_millis(200)).await;

    let statuses = collector.payloads(Topic::Status);
    let by_name = common::statuses_by_name(&statuses);
    assert_eq!(by_name.get("BrokerService").map(Vec::len), Some(1));
    assert_eq!(by_name.get("ConsolidateService").map(Vec::len), Some(1));

    // Metrics are a flat map of non-negative integers.
    for status in &statuses {
        let metrics = status["metrics"].as_object().expect("metrics object");
        for (name, value) in metrics {
            assert!(
                value.as_u64().is_some(),
                "metric {name} is not a non-negative integer: {value}"
            );
        }
        assert!(status["id"].as_str().is_some());
        assert!(status["timestamp"].as_i64().is_some());
    }

    // The subscriber sees the fabric mirrored: first the ACKNOWLEDGE, then
    // STATUS replies.
    let mut seen_topics = Vec::new();
    while seen_topics.iter().filter(|t| *t == "STATUS").count() < 2 {
        let topic = tokio::time::timeout(Duration::from_secs(2), sub_frames.next())
            .await
            .expect("frame within deadline")
            .expect("stream open")
            .expect("read topic");
        let payload = tokio::time::timeout(Duration::from_secs(2), sub_frames.next())
            .await
            .expect("frame within deadline")
            .expect("stream open")
            .expect("read payload");
        assert!(serde_json::from_slice::<serde_json::Value>(&payload).is_ok());
        seen_topics.push(String::from_utf8_lossy(&topic).to_string());
    }
    assert!(seen_topics.contains(&"ACKNOWLEDGE".to_string()));

    host.trigger_shutdown();
    host.wait_for_shutdown().await;
}

#[tokio::test]
async fn port_conflict_fails_install() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = common::test_config(&dir);

    // Hold the pull port so the broker cannot bind it.
    let taken = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let pull_port = taken.local_addr().expect("addr").port();
    let pub_port = free_port().await;
    config.broker.pull_endpoint = format!("tcp://127.0.0.1:{pull_port}");
    config.broker.pub_endpoint = format!("tcp://127.0.0.1:{pub_port}");

    let recorder = Arc::new(MockRecorder::new());
    let registry = PluginRegistry::new();
    let broker = BrokerService::new(&config.broker).expect("broker");

    let mut host = Host::with_registry(
        Profile::Standard,
        config,
        Arc::new(registry),
        recorder,
    );
    let err = host.install(broker).await.unwrap_err();
    assert!(err.to_string().contains("failed to bind"));

    host.trigger_shutdown();
    host.wait_for_shutdown().await;
}

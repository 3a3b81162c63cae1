//! Consolidation pipeline scenarios: fan-out, join barriers, ordering, and
//! failure semantics.

mod common;

use common::{Collector, StubEmbedding, StubLlm};
use mnemon_core::bus::Topic;
use mnemon_core::model::{Engram, Meta, Observation, Summary};
use mnemon_core::plugin::PluginRegistry;
use mnemon_core::recorder::MockRecorder;
use mnemon_core::runtime::{Host, Profile};
use mnemon_core::services::ConsolidateService;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

const SOURCE_ID: &str = "source-1";

fn engram_with_context(content: &str, key: &str, value: &str) -> Engram {
    let mut context = BTreeMap::new();
    context.insert(key.to_string(), value.to_string());
    Engram::new(SOURCE_ID, "loc", content, true).with_context(context)
}

fn observation_with(engrams: Vec<Engram>) -> Observation {
    let meta = Meta::new(
        vec!["loc".to_string()],
        vec![SOURCE_ID.to_string()],
        vec!["kw".to_string()],
        Some("short".to_string()),
        Summary::new("the full summary"),
    );
    Observation::new(SOURCE_ID, meta, engrams)
}

async fn consolidation_host(
    llm: StubLlm,
    embedding: StubEmbedding,
) -> (Host, Arc<Collector>, Arc<ConsolidateService>) {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = common::test_config(&dir);

    let recorder = Arc::new(MockRecorder::new());
    let mut registry = PluginRegistry::new();
    registry.register_llm("gen_indices", Arc::new(llm));
    registry.register_embedding("gen_embed", Arc::new(embedding));

    let consolidate = ConsolidateService::new(&registry, recorder.clone()).expect("service");
    let mut host = Host::with_registry(Profile::Standard, config, Arc::new(registry), recorder);
    host.install(consolidate).await.expect("install consolidate");
    host.install(Collector::new(vec![
        Topic::MetaComplete,
        Topic::EngramCreated,
        Topic::IndexCreated,
        Topic::IndexComplete,
        Topic::EngramComplete,
    ]))
    .await
    .expect("install collector");

    let collector = host.get_service::<Collector>().expect("collector");
    let consolidate = host.get_service::<ConsolidateService>().expect("consolidate");
    (host, collector, consolidate)
}

#[tokio::test]
async fn single_engram_single_index() {
    let llm = StubLlm::indices(&["biographical detail"]);
    let embedding = StubEmbedding::fixed(vec![0.1, 0.2]);
    let (host, collector, consolidate) = consolidation_host(llm, embedding).await;

    let observation = observation_with(vec![engram_with_context("body", "header", "Intro")]);
    host.publish(
        Topic::ObservationComplete,
        serde_json::to_value(&observation).expect("serialize"),
    );

    assert!(
        collector
            .wait_for(Topic::EngramComplete, 1, Duration::from_secs(2))
            .await
    );

    let payloads = collector.payloads(Topic::EngramComplete);
    assert_eq!(payloads.len(), 1);
    assert_eq!(payloads[0]["source_id"], SOURCE_ID);

    let engram_array = payloads[0]["engram_array"].as_array().expect("array");
    assert_eq!(engram_array.len(), observation.engram_list.len());

    let indices = engram_array[0]["indices"].as_array().expect("indices");
    assert_eq!(indices.len(), 1);
    assert_eq!(
        indices[0]["text"],
        "Context: header: Intro\n Content: biographical detail"
    );
    assert_eq!(
        indices[0]["embedding"],
        serde_json::json!([0.1, 0.2])
    );

    // Lifecycle events were emitted too.
    assert_eq!(collector.count(Topic::EngramCreated), 1);
    assert_eq!(collector.count(Topic::IndexCreated), 1);
    assert_eq!(collector.count(Topic::IndexComplete), 1);

    // Summary branch completed independently.
    assert!(
        collector
            .wait_for(Topic::MetaComplete, 1, Duration::from_secs(2))
            .await
    );
    let metas = collector.payloads(Topic::MetaComplete);
    assert_eq!(
        metas[0]["summary_full"]["embedding"],
        serde_json::json!([0.1, 0.2])
    );

    // Builder is empty between observations.
    assert!(!consolidate.has_inflight_engrams());

    host.trigger_shutdown();
    host.wait_for_shutdown().await;
}

#[tokio::test]
async fn two_engrams_preserve_order() {
    let llm = StubLlm::new("{}")
        .on(
            "<text>alpha body</text>",
            serde_json::json!({"index_text_array": ["a1", "a2"]}).to_string(),
        )
        .on(
            "<text>beta body</text>",
            serde_json::json!({"index_text_array": ["b1", "b2"]}).to_string(),
        );
    let embedding = StubEmbedding::fixed(vec![0.5]);
    let (host, collector, consolidate) = consolidation_host(llm, embedding).await;

    let observation = observation_with(vec![
        engram_with_context("alpha body", "section", "A"),
        engram_with_context("beta body", "section", "B"),
    ]);
    let expected_ids: Vec<String> = observation.engram_list.iter().map(|e| e.id.clone()).collect();

    host.publish(
        Topic::ObservationComplete,
        serde_json::to_value(&observation).expect("serialize"),
    );

    assert!(
        collector
            .wait_for(Topic::EngramComplete, 1, Duration::from_secs(2))
            .await
    );

    let payloads = collector.payloads(Topic::EngramComplete);
    let engram_array = payloads[0]["engram_array"].as_array().expect("array");
    assert_eq!(engram_array.len(), 2);

    // Positional order of the emitted array matches the input engram list.
    assert_eq!(engram_array[0]["id"], expected_ids[0].as_str());
    assert_eq!(engram_array[1]["id"], expected_ids[1].as_str());

    let texts = |i: usize| -> Vec<String> {
        engram_array[i]["indices"]
            .as_array()
            .expect("indices")
            .iter()
            .map(|index| index["text"].as_str().expect("text").to_string())
            .collect()
    };
    assert!(texts(0)[0].ends_with("a1"));
    assert!(texts(0)[1].ends_with("a2"));
    assert!(texts(1)[0].ends_with("b1"));
    assert!(texts(1)[1].ends_with("b2"));

    assert!(!consolidate.has_inflight_engrams());

    host.trigger_shutdown();
    host.wait_for_shutdown().await;
}

#[tokio::test]
async fn empty_index_array_is_fatal_for_the_observation() {
    let llm = StubLlm::indices(&[]);
    let embedding = StubEmbedding::fixed(vec![0.1]);
    let (host, collector, consolidate) = consolidation_host(llm, embedding).await;

    let observation = observation_with(vec![engram_with_context("body", "header", "Intro")]);
    host.publish(
        Topic::ObservationComplete,
        serde_json::to_value(&observation).expect("serialize"),
    );

    // Registration happens before the failure, so ENGRAM_CREATED fires, but
    // no completion ever does.
    assert!(
        collector
            .wait_for(Topic::EngramCreated, 1, Duration::from_secs(2))
            .await
    );
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(collector.count(Topic::EngramComplete), 0);
    assert_eq!(collector.count(Topic::IndexComplete), 0);

    // The failed observation's entries were evicted.
    assert!(!consolidate.has_inflight_engrams());

    host.trigger_shutdown();
    host.wait_for_shutdown().await;
}

#[tokio::test]
async fn engram_id_collision_is_fatal() {
    let llm = StubLlm::indices(&["index"]);
    let embedding = StubEmbedding::fixed(vec![0.1]);
    let (host, collector, consolidate) = consolidation_host(llm, embedding).await;

    let first = engram_with_context("body one", "header", "A");
    let mut second = engram_with_context("body two", "header", "B");
    second.id = first.id.clone();

    let observation = observation_with(vec![first, second]);
    host.publish(
        Topic::ObservationComplete,
        serde_json::to_value(&observation).expect("serialize"),
    );

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(collector.count(Topic::EngramCreated), 0);
    assert_eq!(collector.count(Topic::EngramComplete), 0);
    assert!(!consolidate.has_inflight_engrams());

    host.trigger_shutdown();
    host.wait_for_shutdown().await;
}

#[tokio::test]
async fn summary_branch_failure_is_independent() {
    let llm = StubLlm::indices(&["index text"]);
    // Poison only the summary batch; engram index batches never contain it.
    let embedding = StubEmbedding::fixed(vec![0.1]).failing_on("the full summary");
    let (host, collector, consolidate) = consolidation_host(llm, embedding).await;

    let observation = observation_with(vec![engram_with_context("body", "header", "Intro")]);
    host.publish(
        Topic::ObservationComplete,
        serde_json::to_value(&observation).expect("serialize"),
    );

    assert!(
        collector
            .wait_for(Topic::EngramComplete, 1, Duration::from_secs(2))
            .await
    );
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(collector.count(Topic::MetaComplete), 0);
    assert!(!consolidate.has_inflight_engrams());

    host.trigger_shutdown();
    host.wait_for_shutdown().await;
}

#[tokio::test]
async fn missing_summary_text_fails_only_the_summary_branch() {
    let llm = StubLlm::indices(&["index text"]);
    let embedding = StubEmbedding::fixed(vec![0.1]);
    let (host, collector, _consolidate) = consolidation_host(llm, embedding).await;

    let mut observation = observation_with(vec![engram_with_context("body", "header", "Intro")]);
    observation.meta.summary_full = Summary::default();

    host.publish(
        Topic::ObservationComplete,
        serde_json::to_value(&observation).expect("serialize"),
    );

    assert!(
        collector
            .wait_for(Topic::EngramComplete, 1, Duration::from_secs(2))
            .await
    );
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(collector.count(Topic::MetaComplete), 0);

    host.trigger_shutdown();
    host.wait_for_shutdown().await;
}

#[tokio::test]
async fn missing_context_is_fatal() {
    let llm = StubLlm::indices(&["index text"]);
    let embedding = StubEmbedding::fixed(vec![0.1]);
    let (host, collector, consolidate) = consolidation_host(llm, embedding).await;

    // No context map at all.
    let engram = Engram::new(SOURCE_ID, "loc", "body", true);
    let observation = observation_with(vec![engram]);
    host.publish(
        Topic::ObservationComplete,
        serde_json::to_value(&observation).expect("serialize"),
    );

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(collector.count(Topic::EngramComplete), 0);
    assert!(!consolidate.has_inflight_engrams());

    host.trigger_shutdown();
    host.wait_for_shutdown().await;
}

#[tokio::test]
async fn context_prefix_skips_null_values() {
    let llm = StubLlm::indices(&["fact"]);
    let embedding = StubEmbedding::fixed(vec![0.1]);
    let (host, collector, _consolidate) = consolidation_host(llm, embedding).await;

    let mut context = BTreeMap::new();
    context.insert("header".to_string(), "Intro".to_string());
    context.insert("subtitle".to_string(), "null".to_string());
    let engram = Engram::new(SOURCE_ID, "loc", "body", true).with_context(context);

    let observation = observation_with(vec![engram]);
    host.publish(
        Topic::ObservationComplete,
        serde_json::to_value(&observation).expect("serialize"),
    );

    assert!(
        collector
            .wait_for(Topic::EngramComplete, 1, Duration::from_secs(2))
            .await
    );
    let payloads = collector.payloads(Topic::EngramComplete);
    let text = payloads[0]["engram_array"][0]["indices"][0]["text"]
        .as_str()
        .expect("text");
    assert_eq!(text, "Context: header: Intro\n Content: fact");

    host.trigger_shutdown();
    host.wait_for_shutdown().await;
}

#[tokio::test]
async fn consecutive_observations_each_complete() {
    let llm = StubLlm::indices(&["index"]);
    let embedding = StubEmbedding::fixed(vec![0.1]);
    let (host, collector, consolidate) = consolidation_host(llm, embedding).await;

    for _ in 0..3 {
        let observation = observation_with(vec![engram_with_context("body", "k", "v")]);
        host.publish(
            Topic::ObservationComplete,
            serde_json::to_value(&observation).expect("serialize"),
        );
    }

    assert!(
        collector
            .wait_for(Topic::EngramComplete, 3, Duration::from_secs(3))
            .await
    );
    assert!(!consolidate.has_inflight_engrams());

    host.trigger_shutdown();
    host.wait_for_shutdown().await;
}

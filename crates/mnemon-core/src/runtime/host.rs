//! The host: boots the process, owns the fabric and the plugin registry,
//! drives service lifecycle and shutdown.

use super::{Service, ServiceContext};
use crate::bus::{BusClient, Envelope, Router, Topic};
use crate::config::Config;
use crate::error::{HostError, PluginError};
use crate::plugin::{document, gemini, mock, vector, PluginRegistry};
use crate::recorder::MockRecorder;
use std::any::Any;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Which plugin set the host wires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    /// Real backends: Gemini adapters, file vector store, SQLite documents.
    Standard,
    /// Replay backends over the mock recorder.
    Mock,
}

impl FromStr for Profile {
    type Err = HostError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "standard" => Ok(Profile::Standard),
            "mock" => Ok(Profile::Mock),
            other => Err(HostError::UnknownProfile {
                name: other.to_string(),
            }),
        }
    }
}

struct InstalledService {
    name: &'static str,
    instance: Arc<dyn Any + Send + Sync>,
    ctx: ServiceContext,
    event_loop: JoinHandle<()>,
}

/// Boots configuration, wires plugins, hosts services, and coordinates
/// shutdown. Services never hold the host; they reach the fabric through
/// their [`ServiceContext`] only.
pub struct Host {
    profile: Profile,
    config: Config,
    router: Arc<Router>,
    registry: Arc<PluginRegistry>,
    recorder: Arc<MockRecorder>,
    cancel: CancellationToken,
    services: Vec<InstalledService>,
}

impl Host {
    /// Build a host: resolves the plugin registry for the profile and wires
    /// the `SHUTDOWN` topic to the root cancellation token.
    pub async fn new(profile: Profile, config: Config) -> Result<Self, HostError> {
        let recorder = Arc::new(MockRecorder::new());

        if profile == Profile::Mock {
            let mock_path = MockRecorder::default_path(&config.storage.root_path);
            if mock_path.exists() {
                recorder
                    .load_from_disk(&mock_path)
                    .map_err(|e| HostError::Plugin {
                        source: PluginError::Store {
                            message: format!(
                                "failed to load mock data from {}: {e}",
                                mock_path.display()
                            ),
                        },
                    })?;
                tracing::info!(path = %mock_path.display(), entries = recorder.len(), "Loaded mock data");
            }
        }

        let registry = Arc::new(build_registry(profile, &config, &recorder).await?);
        Ok(Self::with_registry(profile, config, registry, recorder))
    }

    /// Build a host around an externally wired registry. Used by tests and
    /// embedders that bring their own plugin implementations.
    pub fn with_registry(
        profile: Profile,
        config: Config,
        registry: Arc<PluginRegistry>,
        recorder: Arc<MockRecorder>,
    ) -> Self {
        let router = Arc::new(Router::new());
        let cancel = CancellationToken::new();

        // Any service (or external peer via the broker) can request shutdown
        // by publishing on the SHUTDOWN topic.
        let (shutdown_tx, mut shutdown_rx) = mpsc::unbounded_channel::<Envelope>();
        router.subscribe(Topic::Shutdown, shutdown_tx);
        let shutdown_cancel = cancel.clone();
        tokio::spawn(async move {
            if shutdown_rx.recv().await.is_some() {
                tracing::info!("Shutdown requested over the bus");
                shutdown_cancel.cancel();
            }
        });

        Self {
            profile,
            config,
            router,
            registry,
            recorder,
            cancel,
            services: Vec::new(),
        }
    }

    /// The active profile.
    pub fn profile(&self) -> Profile {
        self.profile
    }

    /// The loaded configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The shared plugin registry.
    pub fn registry(&self) -> Arc<PluginRegistry> {
        self.registry.clone()
    }

    /// The mock recorder.
    pub fn recorder(&self) -> Arc<MockRecorder> {
        self.recorder.clone()
    }

    /// Install a service: wire its context, run its `start`, and spawn its
    /// event loop. Services are installed in the order supplied and started
    /// immediately.
    pub async fn install<S: Service>(&mut self, service: S) -> Result<(), HostError> {
        let service = Arc::new(service);
        let name = service.name();

        let (inbox_tx, mut inbox_rx) = mpsc::unbounded_channel();
        let bus = BusClient::new(name, self.router.clone(), inbox_tx);
        let ctx = ServiceContext::new(
            name,
            bus,
            self.cancel.clone(),
            Duration::from_millis(self.config.runtime.join_grace_ms),
        );

        service.start(ctx.clone()).await?;

        let loop_service = service.clone();
        let loop_cancel = self.cancel.clone();
        let event_loop = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = loop_cancel.cancelled() => break,
                    envelope = inbox_rx.recv() => match envelope {
                        Some(envelope) => loop_service.handle(envelope).await,
                        None => break,
                    }
                }
            }
            loop_service.stop().await;
        });

        tracing::info!(service = name, "Service started");
        self.services.push(InstalledService {
            name,
            instance: service,
            ctx,
            event_loop,
        });
        Ok(())
    }

    /// Look up an installed service by type.
    pub fn get_service<S: Service>(&self) -> Option<Arc<S>> {
        self.services
            .iter()
            .find_map(|installed| installed.instance.clone().downcast::<S>().ok())
    }

    /// Publish directly onto the fabric, outside any service.
    pub fn publish(&self, topic: Topic, payload: serde_json::Value) {
        self.router.publish(&Envelope::new(topic, payload));
    }

    /// Request shutdown.
    pub fn trigger_shutdown(&self) {
        self.cancel.cancel();
    }

    /// Resolve once shutdown has been requested, without consuming the host.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    /// Serialize the recorder to its default location under the storage root.
    pub fn write_mock_data(&self) -> std::io::Result<PathBuf> {
        let path = MockRecorder::default_path(&self.config.storage.root_path);
        self.recorder.write_to_disk(&path)?;
        Ok(path)
    }

    /// Block until shutdown is requested, then drain every service: cancel
    /// background work, give in-flight joins the grace window, stop event
    /// loops.
    pub async fn wait_for_shutdown(mut self) {
        self.cancel.cancelled().await;
        tracing::info!("Shutting down services");

        for installed in &self.services {
            installed.ctx.drain().await;
        }

        for installed in self.services.drain(..) {
            match tokio::time::timeout(Duration::from_secs(5), installed.event_loop).await {
                Ok(Ok(())) => tracing::info!(service = installed.name, "Service stopped"),
                Ok(Err(e)) => {
                    tracing::warn!(service = installed.name, error = %e, "Service event loop panicked");
                }
                Err(_) => {
                    tracing::warn!(service = installed.name, "Service stop timed out");
                }
            }
        }
        tracing::info!("Shutdown complete");
    }
}

/// Wire the plugin registry for a profile.
async fn build_registry(
    profile: Profile,
    config: &Config,
    recorder: &Arc<MockRecorder>,
) -> Result<PluginRegistry, HostError> {
    let mut registry = PluginRegistry::new();

    match profile {
        Profile::Standard => {
            let api_key =
                config
                    .llm
                    .api_key
                    .clone()
                    .ok_or_else(|| PluginError::MissingCredential {
                        name: config.llm.api_key_env.clone(),
                    })?;

            let llm: Arc<dyn crate::plugin::LanguageModel> = match &config.llm.base_url {
                Some(base_url) => Arc::new(gemini::GeminiLlm::with_base_url(
                    api_key.clone(),
                    config.llm.model.clone(),
                    base_url.clone(),
                )),
                None => Arc::new(gemini::GeminiLlm::new(
                    api_key.clone(),
                    config.llm.model.clone(),
                )),
            };
            for usage in ["analyze", "respond", "codify", "gen_indices", "summary"] {
                registry.register_llm(usage, llm.clone());
            }

            let embedding: Arc<dyn crate::plugin::Embedding> = match &config.embedding.base_url {
                Some(base_url) => Arc::new(gemini::GeminiEmbedding::with_base_url(
                    api_key,
                    config.embedding.model.clone(),
                    config.embedding.dimensions,
                    base_url.clone(),
                )),
                None => Arc::new(gemini::GeminiEmbedding::new(
                    api_key,
                    config.embedding.model.clone(),
                    config.embedding.dimensions,
                )),
            };
            registry.register_embedding("gen_embed", embedding);

            registry.register_vector(
                "db",
                Arc::new(vector::FileVectorStore::open(&config.storage.root_path)?),
            );

            let db_path = PathBuf::from(&config.storage.root_path)
                .join(&config.storage.database_file);
            let pool = document::init_db(&db_path.to_string_lossy()).await?;
            registry.register_document(
                "document",
                Arc::new(document::SqliteDocumentStore::new(pool)),
            );
        }
        Profile::Mock => {
            let llm: Arc<dyn crate::plugin::LanguageModel> =
                Arc::new(mock::MockLlm::new(recorder.clone()));
            for usage in ["analyze", "respond", "codify", "gen_indices", "summary"] {
                registry.register_llm(usage, llm.clone());
            }
            registry.register_embedding(
                "gen_embed",
                Arc::new(mock::MockEmbedding::new(recorder.clone())),
            );
            registry.register_vector(
                "db",
                Arc::new(mock::MockVectorStore::with_recorder(recorder.clone())),
            );
            registry.register_document("document", Arc::new(mock::MockDocumentStore::new()));
        }
    }

    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn mock_config(dir: &tempfile::TempDir) -> Config {
        let mut config = Config::default();
        config.storage.root_path = dir.path().to_string_lossy().to_string();
        config.broker.enabled = false;
        config
    }

    struct CountingService {
        seen: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Service for CountingService {
        fn name(&self) -> &'static str {
            "CountingService"
        }

        async fn start(&self, ctx: ServiceContext) -> Result<(), HostError> {
            ctx.subscribe(Topic::Acknowledge);
            Ok(())
        }

        async fn handle(&self, _envelope: Envelope) {
            self.seen.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn profile_parses() {
        assert_eq!("standard".parse::<Profile>().expect("parse"), Profile::Standard);
        assert_eq!("mock".parse::<Profile>().expect("parse"), Profile::Mock);
        assert!("other".parse::<Profile>().is_err());
    }

    #[tokio::test]
    async fn standard_profile_without_credential_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = mock_config(&dir);
        let err = Host::new(Profile::Standard, config).await.err().expect("err");
        assert!(err.to_string().contains("GEMINI_API_KEY"));
    }

    #[tokio::test]
    async fn install_dispatches_bus_messages_to_handler() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut host = Host::new(Profile::Mock, mock_config(&dir))
            .await
            .expect("host");
        host.install(CountingService {
            seen: AtomicUsize::new(0),
        })
        .await
        .expect("install");

        host.publish(Topic::Acknowledge, serde_json::json!({}));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let service = host.get_service::<CountingService>().expect("lookup");
        assert_eq!(service.seen.load(Ordering::SeqCst), 1);

        host.trigger_shutdown();
        host.wait_for_shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_topic_cancels_host() {
        let dir = tempfile::tempdir().expect("tempdir");
        let host = Host::new(Profile::Mock, mock_config(&dir))
            .await
            .expect("host");

        host.publish(Topic::Shutdown, serde_json::json!({}));
        tokio::time::timeout(Duration::from_secs(1), host.wait_for_shutdown())
            .await
            .expect("shutdown within deadline");
    }

    #[tokio::test]
    async fn get_service_returns_none_for_missing_type() {
        let dir = tempfile::tempdir().expect("tempdir");
        let host = Host::new(Profile::Mock, mock_config(&dir))
            .await
            .expect("host");
        assert!(host.get_service::<CountingService>().is_none());
    }
}

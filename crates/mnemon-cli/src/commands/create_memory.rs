//! The `create-memory` command: one training exchange, end to end.
//!
//! Boots a standard-profile host, submits a fixed training-mode prompt,
//! waits for the memory-formation round to finish, writes the recorded
//! mock data, and shuts down cleanly.

use mnemon_core::bus::Topic;
use mnemon_core::model::Prompt;
use mnemon_core::runtime::{Host, Profile};
use mnemon_core::services::{ProgressService, RetrieveService};

/// The prompt the training run submits.
const TRAINING_PROMPT: &str = "Tell me about Chamath Palihapitiya.";

/// Arguments for `mnemon create-memory`.
#[derive(clap::Args)]
pub struct CreateMemoryArgs {
    /// Prompt text to submit instead of the default
    #[arg(long)]
    pub prompt: Option<String>,
}

/// Run one training-mode exchange through the full pipeline.
pub async fn create_memory(config_arg: &str, args: CreateMemoryArgs) -> anyhow::Result<()> {
    let config = super::load_config(config_arg)?;
    let mut host = Host::new(Profile::Standard, config).await?;
    super::install_pipeline(&mut host).await?;

    let retrieve = host
        .get_service::<RetrieveService>()
        .expect("retrieve service installed");
    let progress = host
        .get_service::<ProgressService>()
        .expect("progress service installed");

    // Training mode makes every stage record its inputs and outputs for
    // later replay under the mock profile.
    host.publish(
        Topic::SetTrainingMode,
        serde_json::json!({"training_mode": true}),
    );

    let prompt_text = args.prompt.as_deref().unwrap_or(TRAINING_PROMPT);
    println!("Submitting training prompt: {prompt_text}");
    retrieve.submit(&Prompt::new(prompt_text).with_training_mode(true));

    tokio::select! {
        source_id = progress.wait_for_any_source() => {
            tracing::info!(source_id = %source_id, "Memory round complete");
            match host.write_mock_data() {
                Ok(path) => println!("Memory formed. Mock data written to {}", path.display()),
                Err(e) => tracing::warn!(error = %e, "Failed to write mock data"),
            }
        }
        () = super::wait_for_shutdown_signal() => {
            tracing::warn!("Interrupted before the memory round completed");
        }
        () = host.cancelled() => {}
    }

    host.trigger_shutdown();
    host.wait_for_shutdown().await;
    Ok(())
}

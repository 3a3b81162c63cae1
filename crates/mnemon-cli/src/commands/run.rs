//! The `run` command: start the host and block until shutdown.

use mnemon_core::runtime::{Host, Profile};
use std::str::FromStr;

/// Arguments for `mnemon run`.
#[derive(clap::Args)]
pub struct RunArgs {
    /// Plugin profile: "standard" or "mock"
    #[arg(long, default_value = "standard")]
    pub profile: String,
}

/// Start the pipeline host with every service and block until Ctrl+C,
/// SIGTERM, or a `SHUTDOWN` bus message.
pub async fn run(config_arg: &str, args: RunArgs) -> anyhow::Result<()> {
    let config = super::load_config(config_arg)?;
    let profile = Profile::from_str(&args.profile)?;

    let mut host = Host::new(profile, config).await?;
    super::install_pipeline(&mut host).await?;

    println!(
        "mnemon v{version}\n\
         Profile: {profile} | Broker: {broker}\n\
         Press Ctrl+C to stop.",
        version = env!("CARGO_PKG_VERSION"),
        profile = args.profile,
        broker = if host.config().broker.enabled {
            host.config().broker.pull_endpoint.clone()
        } else {
            "disabled".to_string()
        },
    );

    tokio::select! {
        () = super::wait_for_shutdown_signal() => host.trigger_shutdown(),
        () = host.cancelled() => {}
    }
    host.wait_for_shutdown().await;
    Ok(())
}

//! GANTRY headless server.
//!
//! Runs the orchestration core against the sample profile with an in-memory
//! transport. The real websocket transport attaches through the same
//! `Transport` trait and queues.

#![warn(missing_docs)]
#![warn(clippy::all)]

use anyhow::Result;
use clap::Parser;
use gantry_core::ClientId;
use gantry_server::{AppConfig, Application, SampleProfile};
use gantry_state::{CommandMessage, RecordingTransport, Transport};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "gantry-server")]
#[command(about = "GANTRY test-jig orchestrator", long_about = None)]
struct Args {
    /// Panels to create for the control session
    #[arg(short, long, default_value_t = 1)]
    panel_limit: u32,

    /// Give up on the demo run after this many seconds
    #[arg(long, default_value_t = 30)]
    run_timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gantry=debug".into()),
        )
        .init();

    let transport = Arc::new(RecordingTransport::new());
    let app = Application::new(
        Arc::new(SampleProfile),
        Arc::clone(&transport) as Arc<dyn Transport>,
        &AppConfig::default().with_panel_limit(args.panel_limit),
    );

    let controller = ClientId::new();
    transport.set_control_client(controller);
    app.connect(controller).await;

    app.command_sender()
        .send(CommandMessage::new("loadTC", serde_json::json!({})))
        .await?;

    let finished = tokio::time::timeout(Duration::from_secs(args.run_timeout_secs), async {
        loop {
            let terminated = transport
                .broadcasts()
                .iter()
                .any(|message| message["event_type"] == "testRunTermination");
            if terminated {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;

    match finished {
        Ok(()) => tracing::info!(
            records = transport.broadcasts().len(),
            "test run finished"
        ),
        Err(_) => tracing::warn!("test run did not terminate in time"),
    }

    app.disconnect(controller);
    app.shutdown().await;
    Ok(())
}

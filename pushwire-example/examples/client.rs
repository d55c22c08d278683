//! Push client example.
//!
//! Connects to `PUSH_ADDRESS`, subscribes to `PUSH_ITEMS` and logs every
//! update until Ctrl-C.

use pushwire::prelude::*;
use pushwire_example::{ExampleConfig, LoggingListener, init_logging};
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let cfg = ExampleConfig::from_env();
    info!(address = %cfg.address, "client connecting");

    let mut builder = ClientBuilder::new()
        .with_listener(LoggingListener)
        .with_config(cfg.session().with_reverse_heartbeat_interval(Duration::from_secs(10)));
    if let Some(transport) = cfg.transport {
        builder = builder.with_forced_transport(transport);
    }
    let client = builder.build()?;
    client.connect().await?;

    client
        .subscribe(
            1,
            [
                ("LS_mode".to_string(), "MERGE".to_string()),
                ("LS_group".to_string(), cfg.items.clone()),
                ("LS_schema".to_string(), cfg.fields.clone()),
                ("LS_snapshot".to_string(), "true".to_string()),
            ],
        )
        .await?;
    client.send_message("hello", None, 1).await?;

    tokio::signal::ctrl_c().await?;
    info!(status = %client.status(), "shutting down");
    client.shutdown().await?;
    Ok(())
}

//! Standalone WebSocket relay.
//!
//! ```text
//! pocket-relay [BIND_ADDR]
//! ```
//!
//! The bind address comes from the first argument, then `POCKET_RELAY_ADDR`,
//! then the default `127.0.0.1:9090`. `RUST_LOG` controls log output.

use pocket_sync::relay::{RelayConfig, RelayServer};

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut config = RelayConfig::default();
    if let Some(addr) = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("POCKET_RELAY_ADDR").ok())
    {
        config.bind_addr = addr;
    }

    let server = RelayServer::new(config);
    if let Err(e) = server.run().await {
        log::error!("Relay stopped: {e}");
        std::process::exit(1);
    }
}

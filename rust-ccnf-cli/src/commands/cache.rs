//! Content-store control commands.

use crate::{client, CacheCommands};
use anyhow::Result;
use std::net::SocketAddr;

pub async fn handle(forwarder: SocketAddr, cmd: CacheCommands) -> Result<()> {
    match cmd {
        CacheCommands::Store { state } => {
            let reply = client::request(
                forwarder,
                format!("cmd=cache-store-enable on={}", state.as_bool()),
            )
            .await?;
            client::expect_ack(&reply)?;
            println!("cache store {}", if state.as_bool() { "enabled" } else { "disabled" });
            Ok(())
        }
        CacheCommands::Serve { state } => {
            let reply = client::request(
                forwarder,
                format!("cmd=cache-serve-enable on={}", state.as_bool()),
            )
            .await?;
            client::expect_ack(&reply)?;
            println!("cache serve {}", if state.as_bool() { "enabled" } else { "disabled" });
            Ok(())
        }
        CacheCommands::Clear => {
            let reply = client::request(forwarder, "cmd=cache-clear".into()).await?;
            client::expect_ack(&reply)?;
            println!("cache cleared");
            Ok(())
        }
    }
}

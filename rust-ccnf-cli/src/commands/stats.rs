//! Forwarder statistics dump.

use crate::client;
use anyhow::Result;
use std::net::SocketAddr;

pub async fn handle(forwarder: SocketAddr) -> Result<()> {
    let reply = client::request(forwarder, "cmd=stats".into()).await?;
    client::expect_ack(&reply)?;
    if let Some(body) = client::body(&reply) {
        println!("{body}");
    }
    Ok(())
}

//! Connection management commands.

use crate::{client, ConnectionCommands};
use anyhow::Result;
use std::net::SocketAddr;

pub async fn handle(forwarder: SocketAddr, cmd: ConnectionCommands) -> Result<()> {
    match cmd {
        ConnectionCommands::Add {
            transport,
            peer,
            name,
        } => {
            let reply = client::request(
                forwarder,
                format!("cmd=add-connection type={transport} peer={peer} name={name}"),
            )
            .await?;
            client::expect_ack(&reply)?;
            println!("Added connection '{name}' ({transport} {peer})");
            Ok(())
        }
        ConnectionCommands::Remove { conn } => {
            let reply =
                client::request(forwarder, format!("cmd=remove-connection conn={conn}")).await?;
            client::expect_ack(&reply)?;
            println!("Removed connection '{conn}'");
            Ok(())
        }
        ConnectionCommands::List => {
            let reply = client::request(forwarder, "cmd=list-connections".into()).await?;
            client::expect_ack(&reply)?;
            match client::body(&reply) {
                Some(rows) => println!("{rows}"),
                None => println!("no connections"),
            }
            Ok(())
        }
    }
}

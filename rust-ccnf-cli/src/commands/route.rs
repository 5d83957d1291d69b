//! Route management commands.

use crate::{client, RouteCommands};
use anyhow::{Context, Result};
use rust_ccnf_common::name::Name;
use std::net::SocketAddr;

pub async fn handle(forwarder: SocketAddr, cmd: RouteCommands) -> Result<()> {
    match cmd {
        RouteCommands::Add {
            prefix,
            nexthop,
            cost,
            strategy,
        } => {
            // Validate locally so a typo fails before it reaches the wire.
            Name::from_uri(&prefix).with_context(|| format!("invalid prefix '{prefix}'"))?;
            let mut line = format!("cmd=add-route prefix={prefix} nexthop={nexthop} cost={cost}");
            if let Some(strategy) = &strategy {
                line.push_str(&format!(" strategy={strategy}"));
            }
            let reply = client::request(forwarder, line).await?;
            client::expect_ack(&reply)?;
            println!("Added route: {prefix} -> {nexthop} (cost {cost})");
            Ok(())
        }
        RouteCommands::Remove { prefix, nexthop } => {
            Name::from_uri(&prefix).with_context(|| format!("invalid prefix '{prefix}'"))?;
            let reply = client::request(
                forwarder,
                format!("cmd=remove-route prefix={prefix} nexthop={nexthop}"),
            )
            .await?;
            client::expect_ack(&reply)?;
            println!("Removed route: {prefix} -> {nexthop}");
            Ok(())
        }
        RouteCommands::List => {
            let reply = client::request(forwarder, "cmd=list-routes".into()).await?;
            client::expect_ack(&reply)?;
            match client::body(&reply) {
                Some(rows) => println!("{rows}"),
                None => println!("no routes installed"),
            }
            Ok(())
        }
    }
}

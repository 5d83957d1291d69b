//! Control-message handler.
//!
//! Commands are single lines of `key=value` tokens carrying a `seq` number
//! and a `cmd` name; replies echo the sequence number with `status=ack` or
//! `status=nack`. List replies append one JSON row per line after the
//! status line. The handler has no state of its own: every command maps
//! onto the forwarding tables, except connection setup, which needs socket
//! work and is returned to the dispatcher to complete.

use crate::pipeline::Engine;
use crate::strategy::StrategyTag;
use log::info;
use rust_ccnf_common::{name::Name, types::ConnId, Error};
use serde_json::json;
use std::collections::HashMap;
use std::net::SocketAddr;

/// What the dispatcher does with a handled command.
#[derive(Debug)]
pub enum ControlOutcome {
    /// Final reply; nothing left to do.
    Reply(String),
    /// Create the connection, then ack with its id (or nack).
    AddConnection {
        seq: u64,
        kind: AddConnKind,
        peer: SocketAddr,
        symbolic: String,
    },
    /// The engine already purged the connection; stop its I/O and reply.
    ConnectionRemoved { id: ConnId, reply: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddConnKind {
    Udp,
    Tcp,
}

struct Command {
    seq: u64,
    cmd: String,
    args: HashMap<String, String>,
}

impl Command {
    fn arg(&self, key: &str) -> Result<&str, Error> {
        self.args
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| Error::ControlParse(format!("missing argument '{key}'")))
    }

    fn opt(&self, key: &str) -> Option<&str> {
        self.args.get(key).map(String::as_str)
    }
}

fn parse_line(line: &str) -> Result<Command, Error> {
    let mut seq = None;
    let mut cmd = None;
    let mut args = HashMap::new();
    for token in line.split_whitespace() {
        let Some((key, value)) = token.split_once('=') else {
            return Err(Error::ControlParse(format!("token '{token}' is not key=value")));
        };
        match key {
            "seq" => {
                seq = Some(value.parse::<u64>().map_err(|_| {
                    Error::ControlParse(format!("sequence number '{value}' is not numeric"))
                })?);
            }
            "cmd" => cmd = Some(value.to_string()),
            _ => {
                args.insert(key.to_string(), value.to_string());
            }
        }
    }
    Ok(Command {
        seq: seq.ok_or_else(|| Error::ControlParse("missing seq".into()))?,
        cmd: cmd.ok_or_else(|| Error::ControlParse("missing cmd".into()))?,
        args,
    })
}

pub fn ack(seq: u64) -> String {
    format!("seq={seq} status=ack")
}

pub fn nack(seq: u64, reason: &str) -> String {
    format!("seq={seq} status=nack reason={reason}")
}

/// Runs one command line against the engine.
pub fn handle_line(engine: &mut Engine, line: &str) -> ControlOutcome {
    let command = match parse_line(line) {
        Ok(command) => command,
        Err(e) => return ControlOutcome::Reply(nack(0, &e.to_string())),
    };
    let seq = command.seq;
    match dispatch(engine, &command) {
        Ok(outcome) => outcome,
        Err(e) => ControlOutcome::Reply(nack(seq, &e.to_string())),
    }
}

fn dispatch(engine: &mut Engine, command: &Command) -> Result<ControlOutcome, Error> {
    let seq = command.seq;
    match command.cmd.as_str() {
        "add-route" => {
            let prefix = Name::from_uri(command.arg("prefix")?)?;
            let next_hop = resolve_conn(engine, command.arg("nexthop")?)?;
            let cost = parse_cost(command.opt("cost"))?;
            let strategy = command
                .opt("strategy")
                .map(|s| s.parse::<StrategyTag>().map_err(Error::ControlParse))
                .transpose()?;
            engine.fib.add(prefix.clone(), next_hop, cost, strategy);
            info!("route {prefix} -> {next_hop} added");
            Ok(ControlOutcome::Reply(ack(seq)))
        }
        "remove-route" => {
            let prefix = Name::from_uri(command.arg("prefix")?)?;
            let next_hop = resolve_conn(engine, command.arg("nexthop")?)?;
            if engine.fib.remove(&prefix, next_hop) {
                info!("route {prefix} -> {next_hop} removed");
                Ok(ControlOutcome::Reply(ack(seq)))
            } else {
                Ok(ControlOutcome::Reply(nack(seq, "no such route")))
            }
        }
        "add-connection" => {
            let kind = match command.arg("type")? {
                "udp" => AddConnKind::Udp,
                "tcp" => AddConnKind::Tcp,
                other => {
                    return Err(Error::ControlParse(format!(
                        "connection type '{other}' is not udp or tcp"
                    )));
                }
            };
            let peer: SocketAddr = command
                .arg("peer")?
                .parse()
                .map_err(|_| Error::ControlParse("peer is not a socket address".into()))?;
            let symbolic = command.arg("name")?.to_string();
            if engine.conns.resolve(&symbolic).is_some() {
                return Err(Error::DuplicateConnection(symbolic));
            }
            Ok(ControlOutcome::AddConnection {
                seq,
                kind,
                peer,
                symbolic,
            })
        }
        "remove-connection" => {
            let id = resolve_conn(engine, command.arg("conn")?)?;
            engine.remove_connection(id);
            info!("connection {id} removed by control");
            Ok(ControlOutcome::ConnectionRemoved {
                id,
                reply: ack(seq),
            })
        }
        "cache-store-enable" => {
            engine.set_cache_store(parse_bool(command.arg("on")?)?);
            Ok(ControlOutcome::Reply(ack(seq)))
        }
        "cache-serve-enable" => {
            engine.set_cache_serve(parse_bool(command.arg("on")?)?);
            Ok(ControlOutcome::Reply(ack(seq)))
        }
        "cache-clear" => {
            let removed = engine.cs.clear();
            Ok(ControlOutcome::Reply(format!(
                "{} removed={removed}",
                ack(seq)
            )))
        }
        "list-routes" => {
            let mut reply = ack(seq);
            for (prefix, entry) in engine.fib.iter() {
                for hop in entry.next_hops() {
                    reply.push('\n');
                    reply.push_str(
                        &json!({
                            "prefix": prefix.to_string(),
                            "nexthop": hop.conn.0,
                            "cost": hop.cost,
                            "strategy": entry.strategy().to_string(),
                        })
                        .to_string(),
                    );
                }
            }
            Ok(ControlOutcome::Reply(reply))
        }
        "list-connections" => {
            let mut reply = ack(seq);
            for conn in engine.conns.iter() {
                reply.push('\n');
                reply.push_str(
                    &json!({
                        "id": conn.id().0,
                        "name": conn.symbolic(),
                        "kind": conn.kind().to_string(),
                    })
                    .to_string(),
                );
            }
            Ok(ControlOutcome::Reply(reply))
        }
        "stats" => {
            let mut row = serde_json::Map::new();
            for (key, value) in engine.metrics.snapshot() {
                row.insert(key.into(), value.into());
            }
            for (key, value) in engine.cs.stats().snapshot() {
                row.insert(key.into(), value.into());
            }
            row.insert("pit_size".into(), engine.pit.len().into());
            row.insert("cs_size".into(), engine.cs.len().into());
            row.insert("fib_size".into(), engine.fib.len().into());
            row.insert("connections".into(), engine.conns.len().into());
            Ok(ControlOutcome::Reply(format!(
                "{}\n{}",
                ack(seq),
                serde_json::Value::Object(row)
            )))
        }
        other => Err(Error::ControlParse(format!("unknown command '{other}'"))),
    }
}

fn resolve_conn(engine: &Engine, name_or_id: &str) -> Result<ConnId, Error> {
    engine
        .conns
        .resolve(name_or_id)
        .ok_or_else(|| Error::UnknownConnection(name_or_id.to_string()))
}

fn parse_cost(value: Option<&str>) -> Result<u8, Error> {
    match value {
        None => Ok(1),
        Some(v) => v
            .parse()
            .map_err(|_| Error::ControlParse(format!("cost '{v}' is not a small integer"))),
    }
}

fn parse_bool(value: &str) -> Result<bool, Error> {
    match value {
        "true" | "on" | "1" => Ok(true),
        "false" | "off" | "0" => Ok(false),
        other => Err(Error::ControlParse(format!("'{other}' is not a boolean"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ForwarderConfig;
    use crate::conn::{ConnKind, Connection};
    use tokio::sync::mpsc;

    fn engine_with_conn(symbolic: &str) -> (Engine, ConnId) {
        let mut engine = Engine::new(&ForwarderConfig::default());
        let id = engine.conns.allocate_id();
        let (tx, _rx) = mpsc::channel(8);
        let peer: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        engine
            .conns
            .insert(Connection::new(id, symbolic.into(), ConnKind::Udp { peer }, tx))
            .unwrap();
        (engine, id)
    }

    fn reply(engine: &mut Engine, line: &str) -> String {
        match handle_line(engine, line) {
            ControlOutcome::Reply(r) => r,
            other => panic!("expected plain reply, got {other:?}"),
        }
    }

    #[test]
    fn malformed_lines_nack_with_diagnostic() {
        let (mut engine, _) = engine_with_conn("peer0");
        assert!(reply(&mut engine, "this is not a bag").starts_with("seq=0 status=nack"));
        assert!(reply(&mut engine, "seq=4 cmd=no-such-thing").starts_with("seq=4 status=nack"));
        assert!(reply(&mut engine, "cmd=stats").contains("missing seq"));
    }

    #[test]
    fn route_add_remove_round_trip() {
        let (mut engine, id) = engine_with_conn("peer0");
        assert_eq!(
            reply(&mut engine, "seq=1 cmd=add-route prefix=/a/b nexthop=peer0"),
            "seq=1 status=ack"
        );
        let listed = reply(&mut engine, "seq=2 cmd=list-routes");
        assert!(listed.contains("\"/a/b\""));
        assert!(listed.contains(&format!("\"nexthop\":{}", id.0)));

        assert_eq!(
            reply(&mut engine, "seq=3 cmd=remove-route prefix=/a/b nexthop=peer0"),
            "seq=3 status=ack"
        );
        assert!(reply(&mut engine, "seq=4 cmd=remove-route prefix=/a/b nexthop=peer0")
            .contains("no such route"));
    }

    #[test]
    fn route_to_unknown_connection_nacks() {
        let (mut engine, _) = engine_with_conn("peer0");
        let r = reply(&mut engine, "seq=9 cmd=add-route prefix=/a nexthop=ghost");
        assert!(r.starts_with("seq=9 status=nack"));
        assert!(r.contains("unknown connection"));
    }

    #[test]
    fn duplicate_connection_name_nacks() {
        let (mut engine, _) = engine_with_conn("peer0");
        let r = reply(
            &mut engine,
            "seq=5 cmd=add-connection type=udp peer=127.0.0.1:9001 name=peer0",
        );
        assert!(r.contains("duplicate connection"));
    }

    #[test]
    fn add_connection_defers_to_dispatcher() {
        let (mut engine, _) = engine_with_conn("peer0");
        match handle_line(
            &mut engine,
            "seq=6 cmd=add-connection type=tcp peer=10.0.0.2:9695 name=uplink",
        ) {
            ControlOutcome::AddConnection {
                seq,
                kind,
                peer,
                symbolic,
            } => {
                assert_eq!(seq, 6);
                assert_eq!(kind, AddConnKind::Tcp);
                assert_eq!(peer, "10.0.0.2:9695".parse().unwrap());
                assert_eq!(symbolic, "uplink");
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn remove_connection_purges_engine_state() {
        let (mut engine, id) = engine_with_conn("peer0");
        reply(&mut engine, "seq=1 cmd=add-route prefix=/a nexthop=peer0");
        match handle_line(&mut engine, "seq=2 cmd=remove-connection conn=peer0") {
            ControlOutcome::ConnectionRemoved { id: removed, reply } => {
                assert_eq!(removed, id);
                assert_eq!(reply, "seq=2 status=ack");
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(engine.conns.is_empty());
        assert!(engine.fib.is_empty());
    }

    #[test]
    fn cache_controls_toggle_engine_flags() {
        let (mut engine, _) = engine_with_conn("peer0");
        reply(&mut engine, "seq=1 cmd=cache-store-enable on=false");
        assert!(!engine.cache_store_enabled());
        reply(&mut engine, "seq=2 cmd=cache-serve-enable on=false");
        assert!(!engine.cache_serve_enabled());
        reply(&mut engine, "seq=3 cmd=cache-serve-enable on=true");
        assert!(engine.cache_serve_enabled());
        assert!(reply(&mut engine, "seq=4 cmd=cache-clear").starts_with("seq=4 status=ack"));
    }

    #[test]
    fn stats_reports_table_sizes() {
        let (mut engine, _) = engine_with_conn("peer0");
        let r = reply(&mut engine, "seq=7 cmd=stats");
        let (_, body) = r.split_once('\n').unwrap();
        let parsed: serde_json::Value = serde_json::from_str(body).unwrap();
        assert_eq!(parsed["connections"], 1);
        assert_eq!(parsed["pit_size"], 0);
    }
}

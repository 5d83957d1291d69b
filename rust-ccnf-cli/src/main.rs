use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::fmt;
use std::net::SocketAddr;

mod client;
mod commands;

/// ccnf forwarder control CLI
#[derive(Parser)]
#[clap(author, version, about)]
struct Cli {
    /// Forwarder control address
    #[clap(long, global = true, default_value = "127.0.0.1:9695")]
    forwarder: SocketAddr,

    /// Sets the level of verbosity
    #[clap(short, long, global = true)]
    verbose: bool,

    /// Subcommand to execute
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the routing table
    Route {
        #[clap(subcommand)]
        cmd: RouteCommands,
    },

    /// Manage connections
    Connection {
        #[clap(subcommand)]
        cmd: ConnectionCommands,
    },

    /// Control the content store
    Cache {
        #[clap(subcommand)]
        cmd: CacheCommands,
    },

    /// Express an Interest and wait for the Content Object
    Interest {
        /// Name to request (URI format)
        name: String,

        /// Forwarder data-plane address (UDP)
        #[clap(long, default_value = "127.0.0.1:9695")]
        data: SocketAddr,

        /// Interest lifetime in milliseconds
        #[clap(short, long, default_value = "4000")]
        lifetime: u64,

        /// Receive timeout in milliseconds
        #[clap(short, long, default_value = "4000")]
        timeout: u64,
    },

    /// Show forwarder counters and table sizes
    Stats,
}

#[derive(Subcommand)]
enum RouteCommands {
    /// Add a route
    Add {
        /// Name prefix (URI format, e.g. /video/hd)
        prefix: String,

        /// Next-hop connection (symbolic name or id)
        nexthop: String,

        /// Route cost
        #[clap(short, long, default_value = "1")]
        cost: u8,

        /// Forwarding strategy: multicast or best-path
        #[clap(short, long)]
        strategy: Option<String>,
    },

    /// Remove a route
    Remove {
        /// Name prefix (URI format)
        prefix: String,

        /// Next-hop connection (symbolic name or id)
        nexthop: String,
    },

    /// List installed routes
    List,
}

#[derive(Subcommand)]
enum ConnectionCommands {
    /// Create a tunnel connection to a peer forwarder
    Add {
        /// Tunnel transport
        #[clap(value_enum)]
        transport: Transport,

        /// Peer address (host:port)
        peer: SocketAddr,

        /// Symbolic name for the connection
        name: String,
    },

    /// Remove a connection
    Remove {
        /// Symbolic name or id
        conn: String,
    },

    /// List connections
    List,
}

#[derive(Subcommand)]
enum CacheCommands {
    /// Enable or disable storing received objects
    Store {
        #[clap(value_enum)]
        state: Switch,
    },

    /// Enable or disable serving Interests from the cache
    Serve {
        #[clap(value_enum)]
        state: Switch,
    },

    /// Drop every cached object
    Clear,
}

#[derive(ValueEnum, Clone, Copy)]
enum Transport {
    Udp,
    Tcp,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Udp => f.write_str("udp"),
            Self::Tcp => f.write_str("tcp"),
        }
    }
}

#[derive(ValueEnum, Clone, Copy)]
enum Switch {
    On,
    Off,
}

impl Switch {
    fn as_bool(self) -> bool {
        matches!(self, Self::On)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if cli.verbose { "debug" } else { "warn" }),
    )
    .init();

    match cli.command {
        Commands::Route { cmd } => commands::route::handle(cli.forwarder, cmd).await,
        Commands::Connection { cmd } => commands::connection::handle(cli.forwarder, cmd).await,
        Commands::Cache { cmd } => commands::cache::handle(cli.forwarder, cmd).await,
        Commands::Interest {
            name,
            data,
            lifetime,
            timeout,
        } => commands::interest::handle(data, &name, lifetime, timeout).await,
        Commands::Stats => commands::stats::handle(cli.forwarder).await,
    }
}

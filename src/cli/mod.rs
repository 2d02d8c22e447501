//! CLI surface: the peer daemon with its operator menu, plus the
//! store/retrieve client commands that resolve a file's owner through any
//! entry peer.

use std::ffi::OsString;
use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

use crate::{Result, config, peer, ring};

mod commands;
mod menu;

#[derive(Parser, Debug)]
#[command(
    name = "ringfs",
    version,
    about = "Content-addressed file store over a consistent-hashing ring of peers",
    arg_required_else_help = true
)]
pub struct Cli {
    /// Debug output (repeat for more).
    #[arg(short = 'v', long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a peer on the given port and open the operator menu.
    Peer {
        /// Local port to listen on (0 picks a free one).
        port: u16,
    },

    /// Store a local file on the ring via any peer.
    Store {
        /// Address of any joined peer, host:port.
        peer: String,
        /// File to upload.
        file: PathBuf,
    },

    /// Retrieve a file from the ring via any peer.
    Retrieve {
        /// Address of any joined peer, host:port.
        peer: String,
        /// Name the file was stored under.
        file: String,
    },

    /// Print the ring key of a name.
    Hash { name: String },
}

pub fn parse_from<I, T>(args: I) -> Cli
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    Cli::parse_from(args)
}

pub fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Peer { port } => run_peer(port),
        Commands::Store { peer, file } => {
            let cfg = config::load_or_init();
            commands::store(&peer, &file, cfg.io_timeout())
        }
        Commands::Retrieve { peer, file } => {
            let cfg = config::load_or_init();
            commands::retrieve(&peer, &file, cfg.io_timeout())
        }
        Commands::Hash { name } => {
            println!("{name} => {}", ring::hash(&name));
            Ok(())
        }
    }
}

fn run_peer(port: u16) -> Result<()> {
    let cfg = config::load_or_init();
    let peer_config = peer::PeerConfig::from_config(&cfg, port);
    let (peer, handle) = peer::start(peer_config)?;
    println!("Listening on {}", peer.self_node().addr);
    menu::run(&peer)?;
    handle.shutdown();
    Ok(())
}

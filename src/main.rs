//! # Seedling
//!
//! Command-line front end for the seedling core.
//!
//! ## Usage
//!
//! ```bash
//! seedling decode <bencoded value>
//! seedling info <torrent_file>
//! seedling peers <torrent_file>
//! seedling handshake <torrent_file> <ip:port>
//! seedling download_piece -o <output_file> <torrent_file> <piece_index>
//! seedling download -o <output_file> <torrent_file>
//! ```

use seedling::bencode::{self, Value};
use seedling::download::{self, progress_bar};
use seedling::{ClientConfig, PeerAddress, PeerSession, TorrentMetadata, Tracker};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::ProgressBar;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "A minimal command-line BitTorrent client, written in Rust."
)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Port reported to the tracker
    #[arg(long, global = true, default_value_t = seedling::config::DEFAULT_PORT)]
    port: u16,

    /// Connect and read timeout in seconds
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Accept peers whose handshake names another info hash
    #[arg(long, global = true)]
    no_verify_info_hash: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Decode a bencoded value and print it as JSON
    Decode { value: String },

    /// Print torrent metadata
    Info { torrent: PathBuf },

    /// Print the peers returned by the tracker
    Peers { torrent: PathBuf },

    /// Handshake with a peer and print its peer id
    Handshake { torrent: PathBuf, peer: PeerAddress },

    /// Download and verify a single piece from the first peer
    #[command(name = "download_piece")]
    DownloadPiece {
        /// Output filename
        #[arg(short = 'o', long)]
        output: PathBuf,
        torrent: PathBuf,
        index: u32,
    },

    /// Download the whole file from the first peer
    Download {
        /// Output filename (defaults to name from torrent)
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,
        torrent: PathBuf,
    },
}

impl Args {
    fn config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config.port = self.port;
        config.verify_info_hash = !self.no_verify_info_hash;
        if let Some(secs) = self.timeout {
            config.connect_timeout = Duration::from_secs(secs);
            config.read_timeout = Duration::from_secs(secs);
        }
        config
    }
}

/// Sanitize a filename to prevent path traversal and basic issues.
fn sanitize_filename(filename: &str) -> String {
    // Replace path separators with underscores to prevent directory traversal
    let safe_name = filename.replace(['/', '\\'], "_");

    if safe_name.trim().is_empty() || safe_name == "." || safe_name == ".." {
        "download".to_string()
    } else {
        safe_name
    }
}

/// Render a bencode value as JSON, byte strings as (lossy) text.
fn to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Bytes(b) => serde_json::Value::String(String::from_utf8_lossy(b).into_owned()),
        Value::Integer(i) => serde_json::Value::from(*i),
        Value::List(l) => serde_json::Value::Array(l.iter().map(to_json).collect()),
        Value::Dict(d) => serde_json::Value::Object(
            d.iter()
                .map(|(k, v)| (String::from_utf8_lossy(k).into_owned(), to_json(v)))
                .collect(),
        ),
    }
}

fn open_torrent(path: &Path) -> Result<TorrentMetadata> {
    let buf = fs::read(path)
        .with_context(|| format!("could not read torrent file '{}'", path.display()))?;
    TorrentMetadata::from_bytes(&buf)
        .with_context(|| format!("could not parse torrent file '{}'", path.display()))
}

fn first_peer(metadata: &TorrentMetadata, config: &ClientConfig) -> Result<PeerAddress> {
    let tracker = Tracker::new(config).context("tracker client")?;
    let peers = tracker.announce(metadata).context("announce")?;
    peers
        .first()
        .copied()
        .ok_or_else(|| anyhow!("tracker returned no peers"))
}

fn check_piece_index(metadata: &TorrentMetadata, index: u32) -> Result<()> {
    metadata
        .piece_len(index)
        .with_context(|| format!("download piece {}", index))?;
    Ok(())
}

fn write_output(path: &Path, data: &[u8]) -> Result<()> {
    fs::write(path, data)
        .with_context(|| format!("could not write data to file '{}'", path.display()))
}

fn run(args: Args) -> Result<()> {
    let config = args.config();

    match args.command {
        Command::Decode { value } => {
            let decoded = bencode::decode(value.as_bytes()).context("decode")?;
            println!("{}", to_json(&decoded));
        }
        Command::Info { torrent } => {
            let metadata = open_torrent(&torrent)?;
            println!("Tracker URL: {}", metadata.announce());
            println!("Length: {}", metadata.length());
            println!("Info Hash: {}", metadata.info_hash_hex());
            println!("Piece Length: {}", metadata.piece_length());
            println!("Piece Hashes:");
            for hash in metadata.pieces_hashes_hex() {
                println!("{}", hash);
            }
        }
        Command::Peers { torrent } => {
            let metadata = open_torrent(&torrent)?;
            let tracker = Tracker::new(&config).context("tracker client")?;
            for peer in tracker.announce(&metadata).context("announce")? {
                println!("{}", peer);
            }
        }
        Command::Handshake { torrent, peer } => {
            let metadata = open_torrent(&torrent)?;
            let mut session = PeerSession::connect(peer, *metadata.info_hash(), &config)
                .with_context(|| format!("connect to {}", peer))?;
            let peer_id = session.handshake().context("handshake")?;
            session.shutdown();
            println!("Peer ID: {}", hex::encode(peer_id));
        }
        Command::DownloadPiece {
            output,
            torrent,
            index,
        } => {
            let metadata = open_torrent(&torrent)?;
            check_piece_index(&metadata, index)?;

            let peer = first_peer(&metadata, &config)?;
            let mut session = download::open_session(&metadata, peer, &config)
                .with_context(|| format!("open session with {}", peer))?;
            let piece = download::download_piece_verified(&mut session, &metadata, index)
                .with_context(|| format!("download piece {}", index))?;
            session.shutdown();

            write_output(&output, &piece)?;
            println!("Piece {} downloaded to {}.", index, output.display());
        }
        Command::Download { output, torrent } => {
            let metadata = open_torrent(&torrent)?;
            let output = output.unwrap_or_else(|| PathBuf::from(sanitize_filename(metadata.name())));

            let peer = first_peer(&metadata, &config)?;
            let mut session = download::open_session(&metadata, peer, &config)
                .with_context(|| format!("open session with {}", peer))?;

            let pb = if log::log_enabled!(log::Level::Info) {
                ProgressBar::hidden()
            } else {
                progress_bar(metadata.length())
            };
            let data = download::download_all(&mut session, &metadata, &pb).context("download")?;
            session.shutdown();

            write_output(&output, &data)?;
            println!("Downloaded {} to {}.", torrent.display(), output.display());
        }
    }

    Ok(())
}

fn main() {
    // Initialize logger
    pretty_env_logger::init_timed();

    let args = Args::parse();

    if let Err(error) = run(args) {
        eprintln!("Error: {:#}", error);
        std::process::exit(1);
    }
}

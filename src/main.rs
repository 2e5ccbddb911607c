//! peerlink CLI
//!
//! Usage:
//!   peerlink <local-id> <remote-id> [--relay wss://...] [--call] [--media]
//!
//! Connects to the first reachable relay, optionally initiates the call,
//! then reads lines from stdin and sends each one to the peer.

use anyhow::{anyhow, Result};
use clap::{Parser, ValueEnum};
use peerlink::{ClientConfig, PayloadEncoding, PeerClient, WireProtocol};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "peerlink")]
#[command(about = "Peer-to-peer chat bootstrapped over a signaling relay", long_about = None)]
struct Cli {
    /// Our endpoint ID
    local_id: String,

    /// The endpoint to negotiate with
    remote_id: String,

    /// Relay address, repeatable; order defines failover priority
    #[arg(long = "relay")]
    relays: Vec<String>,

    /// Initiate the call (the other side answers)
    #[arg(long)]
    call: bool,

    /// Surface inbound media track events
    #[arg(long)]
    media: bool,

    /// Relay wire convention
    #[arg(long, value_enum, default_value_t = WireArg::Envelope)]
    wire: WireArg,

    /// Payload encoding for negotiation messages
    #[arg(long, value_enum, default_value_t = EncodingArg::Deflate)]
    encoding: EncodingArg,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum WireArg {
    /// action/from/target/data envelopes
    Envelope,
    /// maps keyed by endpoint ID, elicited by polling
    IdMap,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum EncodingArg {
    /// plain JSON payloads
    Json,
    /// JSON deflated then base64-encoded
    Deflate,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let mut config = ClientConfig::new(cli.local_id.clone(), cli.remote_id.clone());
    if !cli.relays.is_empty() {
        config.relays = cli.relays.clone();
    }
    config.media_enabled = cli.media;
    config.wire = match cli.wire {
        WireArg::Envelope => WireProtocol::ActionEnvelope,
        WireArg::IdMap => WireProtocol::IdMap,
    };
    config.encoding = match cli.encoding {
        EncodingArg::Json => PayloadEncoding::Json,
        EncodingArg::Deflate => PayloadEncoding::DeflateBase64,
    };

    let client = PeerClient::new(config).await?;
    client.connect().await?;

    let mut incoming = client
        .take_incoming()
        .await
        .ok_or_else(|| anyhow!("incoming receiver already taken"))?;
    let remote = cli.remote_id.clone();
    tokio::spawn(async move {
        while let Some(message) = incoming.recv().await {
            println!("[{remote}] {message}");
        }
    });

    if cli.media {
        if let Some(mut tracks) = client.take_tracks().await {
            tokio::spawn(async move {
                while let Some(track) = tracks.recv().await {
                    println!("* inbound {} track ({})", track.kind, track.id);
                }
            });
        }
    }

    if cli.call {
        // give the answering side a moment to register with the relay
        tokio::time::sleep(Duration::from_secs(1)).await;
        client.call().await?;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.is_empty() {
            continue;
        }
        client.send_message(&line).await?;
    }

    client.close().await;
    Ok(())
}

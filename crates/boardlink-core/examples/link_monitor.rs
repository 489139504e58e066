//! Board Link Monitor
//!
//! Opens a link to a board, prints everything it reports and sends a few
//! commands typed on stdin.
//!
//! Usage:
//!   cargo run --example link_monitor -- [OPTIONS]
//!
//! Options:
//!   --port PORT       Serial port (default: /dev/ttyACM0)
//!   --alt PORT        Alternate serial port
//!   --config FILE     Load link settings from a JSON file
//!   --subscribe MSG   Payload to queue on every connect (repeatable)
//!   --detect          Use the first attached boards as primary/alternate
//!   --list            List attached boards and exit
//!
//! Set RUST_LOG=boardlink::traffic=trace to see every frame.

use boardlink_core::prelude::*;
use chrono::{DateTime, Utc};
use std::io::BufRead;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

struct Monitor {
    subscriptions: Vec<String>,
}

impl LinkHandler for Monitor {
    fn decode(&self, body: &str, at: DateTime<Utc>) -> bool {
        println!("{} {}", at.format("%H:%M:%S%.3f"), body);
        true
    }

    fn identified(&self, peer: &PeerIdentity) {
        println!(
            "Board: {} ({})",
            peer.name,
            peer.kind.as_deref().unwrap_or("unknown type")
        );
    }

    fn on_connected(&self, reconnect: bool) -> Vec<String> {
        if reconnect {
            println!("Reconnected");
        }
        self.subscriptions.clone()
    }

    fn system_stop(&self, reason: &str) {
        eprintln!("Giving up: {}", reason);
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let mut config = LinkConfig::default();
    let mut subscriptions = Vec::new();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" | "-p" => {
                i += 1;
                if i < args.len() {
                    config.primary_path = args[i].clone();
                    config.alternate_path = None;
                }
            }
            "--alt" => {
                i += 1;
                if i < args.len() {
                    config.alternate_path = Some(args[i].clone());
                }
            }
            "--config" | "-c" => {
                i += 1;
                if i < args.len() {
                    config = LinkConfig::from_file(&args[i])?;
                }
            }
            "--subscribe" | "-s" => {
                i += 1;
                if i < args.len() {
                    subscriptions.push(args[i].clone());
                }
            }
            "--detect" | "-d" => {
                if !config.use_board_ports(&find_board_ports()) {
                    anyhow::bail!("no board attached");
                }
            }
            "--list" | "-l" => {
                for port in find_board_ports() {
                    println!(
                        "{}  {}  {}",
                        port.path,
                        port.serial_number.as_deref().unwrap_or("-"),
                        port.product.as_deref().unwrap_or("")
                    );
                }
                return Ok(());
            }
            "--help" | "-h" => {
                println!("Usage: link_monitor [--port PORT] [--alt PORT] [--config FILE] [--subscribe MSG] [--detect] [--list]");
                return Ok(());
            }
            other => {
                anyhow::bail!("unknown argument: {}", other);
            }
        }
        i += 1;
    }

    let handler = Arc::new(Monitor { subscriptions });
    let mut link = Link::setup(config, handler)?;
    println!("Link on {} is {:?}", link.active_path(), link.state());
    println!("Type a payload to send it; prefix with '>' to send it directly. Empty line quits.");

    for line in std::io::stdin().lock().lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        let sent = match line.strip_prefix('>') {
            Some(payload) => link.send(payload.trim(), true),
            None => link.send(line, false),
        };
        if !sent {
            println!("Not sent");
        }
    }

    println!("{}", serde_json::to_string_pretty(&link.status())?);
    link.terminate();
    Ok(())
}

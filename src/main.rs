//! ruguard CLI
//!
//! `genkey` and `pubkey` manage key material in base64; `run` starts a
//! device from a configuration file. Without an OS tunnel interface the
//! daemon acts as a protocol responder (handshakes, keepalives, cookies).

use std::process::ExitCode;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use ruguard::config::Config;
use ruguard::device::Device;
use ruguard::protocol::keys::{NoisePrivateKey, PRIVATE_KEY_SIZE};
use ruguard::tunnel::{NullTun, Tunnel};

#[derive(Parser)]
#[command(name = "ruguard")]
#[command(author, version, about = "GOST-suite WireGuard-style VPN data plane")]
struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate a private key and print it base64-encoded
    Genkey,
    /// Read a base64 private key on stdin and print its public key
    Pubkey,
    /// Run a device from a configuration file
    Run {
        /// Path to the configuration file
        #[arg(short, long)]
        config: std::path::PathBuf,
    },
}

fn genkey() -> ExitCode {
    match NoisePrivateKey::generate(&mut rand::rngs::OsRng) {
        Ok(sk) => {
            println!("{}", BASE64.encode(sk.to_le_bytes()));
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("key generation failed: {err}");
            ExitCode::FAILURE
        }
    }
}

fn pubkey() -> ExitCode {
    let mut line = String::new();
    if std::io::stdin().read_line(&mut line).is_err() {
        eprintln!("failed to read private key from stdin");
        return ExitCode::FAILURE;
    }
    let decoded = match BASE64.decode(line.trim()) {
        Ok(bytes) if bytes.len() == PRIVATE_KEY_SIZE => bytes,
        _ => {
            eprintln!("expected a base64-encoded {PRIVATE_KEY_SIZE}-byte private key");
            return ExitCode::FAILURE;
        }
    };
    let raw: [u8; PRIVATE_KEY_SIZE] = decoded.try_into().expect("length checked");
    let sk = NoisePrivateKey::from_le_bytes(&raw);
    match sk.public_key() {
        Ok(pk) => {
            println!("{}", BASE64.encode(pk.as_bytes()));
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("invalid private key: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config_path: &std::path::Path) -> ExitCode {
    let config = match Config::from_file(config_path) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("failed to load {}: {err}", config_path.display());
            return ExitCode::FAILURE;
        }
    };

    let device = Arc::new(Device::new());
    if let Err(errno) = device.ipc_set_operation(&config.to_uapi()) {
        eprintln!("failed to apply configuration (errno={errno})");
        return ExitCode::FAILURE;
    }

    let tunnel = match Tunnel::bind(device.clone(), NullTun).await {
        Ok(tunnel) => tunnel,
        Err(err) => {
            eprintln!("failed to bind udp socket: {err}");
            return ExitCode::FAILURE;
        }
    };
    tracing::info!(port = device.listen_port(), "device running");

    let result = tokio::select! {
        result = tunnel.run() => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
            Ok(())
        }
    };
    device.close();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("device loop failed: {err}");
            ExitCode::FAILURE
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let filter = if args.verbose {
        EnvFilter::new("ruguard=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ruguard=info"))
    };
    fmt().with_env_filter(filter).init();

    match args.command {
        Command::Genkey => genkey(),
        Command::Pubkey => pubkey(),
        Command::Run { config } => run(&config).await,
    }
}

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use keel_core::channel::ChannelEnvelope;
use keel_core::identity::verify;
use keel_core::{logging, qr, CoreConfig, Session};
use std::io::Read;
use std::path::PathBuf;
use tracing::debug;

#[derive(Parser)]
#[command(name = "keel")]
#[command(about = "Device identity, transfer and conversation channel tool", long_about = None)]
struct Cli {
    /// JSON config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Restore or create this device's identity
    Init,

    /// Sign a server challenge; prints the signature with device context
    Sign {
        challenge: String,
    },

    /// Verify a challenge signature against a public JWK
    Verify {
        /// Public key JWK
        #[arg(long)]
        public_key: String,
        challenge: String,
        signature: String,
    },

    /// Show the identity fingerprint
    Fingerprint,

    /// Delete this device's identity from every storage tier
    Clear,

    /// Export the identity as a PIN-protected transfer code
    Export {
        /// Write the QR code as PNG to this path
        #[arg(long)]
        qr_png: Option<PathBuf>,

        /// Print the QR code to the terminal
        #[arg(long)]
        show_qr: bool,
    },

    /// Import an identity from a transfer code
    Import {
        code: String,
        pin: String,
    },

    /// Encrypt text for a conversation; prints a JSON envelope
    Encrypt {
        conversation: String,
        text: String,
    },

    /// Decrypt a JSON envelope ("-" reads stdin)
    Decrypt {
        envelope: String,
    },

    /// Show the device fingerprint and label
    Device,
}

fn load_config(cli: &Cli) -> Result<CoreConfig> {
    let mut config = match &cli.config {
        Some(path) => CoreConfig::load(path)?,
        None => CoreConfig::default(),
    };
    config = config.apply_env()?;
    if let Some(dir) = &cli.data_dir {
        config.data_dir = Some(dir.clone());
    }
    Ok(config)
}

fn read_envelope(arg: &str) -> Result<ChannelEnvelope> {
    let raw = if arg == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        arg.to_string()
    };
    serde_json::from_str(&raw).context("envelope is not valid JSON")
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init("warn");
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    debug!(?config, "configuration loaded");

    match cli.command {
        Commands::Init => {
            let session = Session::open(config)?;
            let outcome = session.initialize().await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }

        Commands::Sign { challenge } => {
            let session = Session::open(config)?;
            let signed = session.sign_with_context(&challenge).await?;
            println!("{}", serde_json::to_string_pretty(&signed)?);
        }

        Commands::Verify {
            public_key,
            challenge,
            signature,
        } => {
            verify(&public_key, &challenge, &signature)?;
            println!("valid");
        }

        Commands::Fingerprint => {
            let session = Session::open(config)?;
            session.initialize().await?;
            let fingerprint = session
                .fingerprint()
                .await
                .ok_or_else(|| anyhow!("identity not ready"))?;
            println!("{fingerprint}");
        }

        Commands::Clear => {
            let session = Session::open(config)?;
            session.clear_identity().await;
            println!("identity cleared");
        }

        Commands::Export { qr_png, show_qr } => {
            let session = Session::open(config.clone())?;
            let transfer = session.generate_transfer_code().await?;
            if let Some(path) = qr_png {
                let png = qr::render_png(&transfer.code, config.qr_module_size)?;
                std::fs::write(&path, png)
                    .with_context(|| format!("write {}", path.display()))?;
                eprintln!("QR written to {}", path.display());
            }
            if show_qr {
                println!("{}", qr::render_text(&transfer.code)?);
            }
            println!("PIN:  {}", transfer.pin.as_str());
            println!("Code: {}", transfer.code);
        }

        Commands::Import { code, pin } => {
            let session = Session::open(config)?;
            match session.import_from_code(&code, &pin).await? {
                Some(public_key) => {
                    println!("{public_key}");
                    if let Some(fingerprint) = session.fingerprint().await {
                        eprintln!("imported identity {fingerprint}");
                    }
                }
                None => return Err(anyhow!("invalid code or PIN")),
            }
        }

        Commands::Encrypt { conversation, text } => {
            let session = Session::open(config)?;
            let envelope = session.encrypt_text(&conversation, &text).await?;
            println!("{}", serde_json::to_string_pretty(&envelope)?);
        }

        Commands::Decrypt { envelope } => {
            let envelope = read_envelope(&envelope)?;
            let session = Session::open(config)?;
            println!("{}", session.decrypt_text(&envelope).await?);
        }

        Commands::Device => {
            let session = Session::open(config)?;
            println!("{}", serde_json::to_string_pretty(session.device())?);
        }
    }

    Ok(())
}

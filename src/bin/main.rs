//! Diagnostic CLI for OpenPGP security tokens
//!
//! Small terminal front-end over the library: card identification, PIN
//! verification, and factory reset against the first connected USB
//! reader.

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use openpgp_token::{
    ConfigManager, Pin, PinType, SecurityTokenConnection, TokenOperations, UsbTransport,
};

#[derive(Parser)]
#[command(name = "openpgp-token")]
#[command(about = "Talk to an OpenPGP smart card over USB CCID")]
#[command(long_about = "
OpenPGP Token - diagnostic tool for OpenPGP smart cards

EXAMPLES:
    # Show card identity, algorithms and PIN counters
    openpgp-token info

    # Check the user PIN (set OPENPGP_PIN first)
    openpgp-token verify-pin

    # Wipe the card back to factory state
    openpgp-token reset --yes

ENVIRONMENT VARIABLES:
    OPENPGP_PIN     PIN for verify-pin (prompted otherwise)
    RUST_LOG        Logging level (debug, info, warn, error)
")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the connected card's identity and capabilities
    Info,

    /// Verify a PIN and report the result
    VerifyPin {
        /// Verify PW3 (admin) instead of PW1
        #[arg(long)]
        admin: bool,
    },

    /// Factory-reset the card, wiping all keys and PINs
    Reset {
        /// Confirm the wipe without prompting
        #[arg(long)]
        yes: bool,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = ConfigManager::new()
        .and_then(|m| m.load_or_create_default())
        .unwrap_or_default();

    match cli.command {
        Commands::Info => {
            let connection = connect(&config)?;
            let caps = connection.capabilities().into_diagnostic()?;

            let (major, minor) = caps.version();
            println!("Application version: {major}.{minor}");
            println!("Manufacturer:        {:04X}", caps.manufacturer());
            println!("Serial number:       {:08X}", caps.serial_number());
            println!("Extended length:     {}", caps.has_extended_length());
            println!(
                "Max command/response: {} / {} bytes",
                caps.max_command_bytes(),
                caps.max_response_bytes()
            );
            println!("Key import:          {}", caps.supports_key_import());

            for slot in [
                openpgp_token::KeySlot::Signature,
                openpgp_token::KeySlot::Decryption,
                openpgp_token::KeySlot::Authentication,
            ] {
                match caps.algorithm_for(slot) {
                    Some(algorithm) => println!("{slot} key: {algorithm:?}"),
                    None => println!("{slot} key: none"),
                }
            }

            let pw = caps.pw_status();
            println!(
                "PIN tries remaining: PW1={} RC={} PW3={}",
                pw.pw1_tries_remaining, pw.reset_code_tries_remaining, pw.pw3_tries_remaining
            );
        }

        Commands::VerifyPin { admin } => {
            let pin_value = std::env::var("OPENPGP_PIN")
                .map_err(|_| miette::miette!("set OPENPGP_PIN to the PIN to verify"))?;
            let pin = Pin::new(pin_value.as_bytes()).into_diagnostic()?;

            let pin_type = if admin { PinType::Pw3 } else { PinType::Pw1 };
            let mut connection = connect(&config)?;
            connection.verify_pin(pin_type, &pin).into_diagnostic()?;
            println!("{pin_type} verified");
        }

        Commands::Reset { yes } => {
            if !yes {
                return Err(miette::miette!(
                    "factory reset erases all keys; pass --yes to confirm"
                ));
            }
            let connection = connect(&config)?;
            let mut ops = TokenOperations::new(connection);
            ops.factory_reset().into_diagnostic()?;
            println!("card wiped and re-initialized");
        }
    }

    Ok(())
}

fn connect(config: &openpgp_token::TokenConfig) -> Result<SecurityTokenConnection> {
    let transport = UsbTransport::open_first()
        .into_diagnostic()?
        .with_config(config);
    SecurityTokenConnection::connect(Box::new(transport)).into_diagnostic()
}

//! Create a group as its initiator and write the signed setup message.
//!
//! # Usage
//!
//! ```bash
//! setup_group --out-message setup.msg --out-state alice-state.json alice-ik.pem group.cfg
//! ```
//!
//! Each line of the group config names a member's public identity key file
//! and public prekey file. The initiator is listed first; relative paths are
//! resolved against the config file's directory.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use toy_art::config::{DEFAULT_MESSAGE_FILE, DEFAULT_STATE_FILE, SetupOptions};
use toy_art::{DalekProvider, setup_group_files};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Create a group and its signed setup message
#[derive(Parser, Debug)]
#[command(name = "setup_group")]
#[command(version)]
struct Args {
    /// The initiator's private identity key, a PEM-encoded Ed25519 private key
    priv_ik_file: PathBuf,

    /// Group config: one `IK_PUB_FILE EK_PUB_FILE` line per member, initiator first
    config_file: PathBuf,

    /// Where to write the setup message
    #[arg(long = "out-message", default_value = DEFAULT_MESSAGE_FILE)]
    out_message: PathBuf,

    /// Where to write the signature [default: OUT_MESSAGE.sig]
    #[arg(long = "sig-file")]
    sig_file: Option<PathBuf>,

    /// Where to write the initiator's state
    #[arg(long = "out-state", default_value = DEFAULT_STATE_FILE)]
    out_state: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl From<Args> for SetupOptions {
    fn from(args: Args) -> Self {
        let mut options = SetupOptions::new(args.priv_ik_file, args.config_file);
        options.message_file = args.out_message;
        options.signature_file = args.sig_file;
        options.state_file = args.out_state;
        options
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let options = SetupOptions::from(args);
    match setup_group_files(&DalekProvider, &options) {
        Ok(state) => {
            println!("Stage key: {}", state.stage_key.to_base64());
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

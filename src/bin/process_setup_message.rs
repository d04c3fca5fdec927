//! Process a group setup message as the group member at position INDEX.
//!
//! # Usage
//!
//! ```bash
//! process_setup_message --out-state bob-state.json 2 bob-ek.pem alice-ik-pub.pem setup.msg
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use toy_art::config::{DEFAULT_STATE_FILE, ProcessOptions};
use toy_art::{DalekProvider, process_setup_files};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Process a group setup message as the group member at position INDEX
#[derive(Parser, Debug)]
#[command(name = "process_setup_message")]
#[command(version)]
struct Args {
    /// Position of the member processing the message in the group config
    /// file, where the first entry is at index 1
    #[arg(allow_negative_numbers = true)]
    index: i64,

    /// The member's private ephemeral key (prekey), a PEM-encoded X25519 private key
    priv_ek_file: PathBuf,

    /// The initiator's public identity key, a PEM-encoded Ed25519 public key
    initiator_pub_ik_file: PathBuf,

    /// The file containing the group setup message
    setup_msg_file: PathBuf,

    /// The setup message's signature file [default: SETUP_MSG_FILE.sig]
    #[arg(long = "sig-file")]
    sig_file: Option<PathBuf>,

    /// Where to write the member's state after processing the message
    #[arg(long = "out-state", default_value = DEFAULT_STATE_FILE)]
    out_state: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl From<Args> for ProcessOptions {
    fn from(args: Args) -> Self {
        let mut options = ProcessOptions::new(
            args.index,
            args.priv_ek_file,
            args.initiator_pub_ik_file,
            args.setup_msg_file,
        );
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

    let options = ProcessOptions::from(args);
    match process_setup_files(&DalekProvider, &options) {
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

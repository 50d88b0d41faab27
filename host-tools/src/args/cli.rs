//! Command line arguments.

use std::path::PathBuf;

#[derive(clap::Parser)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Log more, repeat for even more.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(clap::Subcommand)]
pub enum Command {
    /// Generate a fresh set of keys, IVs and readback password.
    Secrets {
        /// Path to write the secrets file.
        #[clap(short, long)]
        output: PathBuf,
        /// Overwrite an existing secrets file.
        #[clap(long)]
        force: bool,
    },
    /// Encrypt and authenticate a firmware image into an update package.
    Protect {
        /// Path to the secrets file.
        #[clap(long)]
        secrets: PathBuf,
        /// The raw firmware image.
        #[clap(short, long)]
        input: PathBuf,
        /// Path to write the update package.
        #[clap(short, long)]
        output: PathBuf,
        /// Version to embed, 0 for a debug build that skips the version check.
        #[clap(long)]
        firmware_version: u16,
        /// Release message printed by the bootloader before starting the
        /// application.
        #[clap(long, default_value = "")]
        message: String,
    },
    /// Send an update package to a bootloader in update mode.
    Update {
        /// Serial port of the bootloader.
        #[clap(short, long)]
        port: String,
        /// The update package.
        #[clap(short, long)]
        input: PathBuf,
    },
    /// Read flash back from a bootloader in readback mode.
    Readback {
        /// Serial port of the bootloader.
        #[clap(short, long)]
        port: String,
        /// Path to the secrets file.
        #[clap(long)]
        secrets: PathBuf,
        /// First byte address, decimal or 0x-prefixed hex.
        #[clap(long, value_parser = parse_number)]
        start: u32,
        /// Number of bytes, decimal or 0x-prefixed hex.
        #[clap(long, value_parser = parse_number)]
        length: u32,
        /// Path to write the pages to. Printed as hex when omitted.
        #[clap(short, long)]
        output: Option<PathBuf>,
    },
    /// Check the bootloader fingerprint of a device in configure mode and
    /// seal it when it matches.
    Configure {
        /// Serial port of the bootloader.
        #[clap(short, long)]
        port: String,
        /// Path to the secrets file.
        #[clap(long)]
        secrets: PathBuf,
        /// The bootloader binary that was flashed.
        #[clap(long)]
        bootloader: PathBuf,
    },
}

fn parse_number(s: &str) -> Result<u32, std::num::ParseIntError> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    }
}

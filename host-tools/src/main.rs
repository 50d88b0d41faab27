// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

use {
    colored::Colorize,
    consts::BAUD_RATE,
    rand::rngs::OsRng,
    secrets::Secrets,
    std::{
        ffi::OsString,
        io::Write,
        path::{Path, PathBuf},
        time::Duration,
    },
    tracing_subscriber::{fmt, prelude::*, EnvFilter},
};

mod args;
mod package;
mod readback;
mod secrets;
mod session;

#[cfg(test)]
mod tests;

/// Per-read timeout on the serial port.
const PORT_TIMEOUT: Duration = Duration::from_secs(2);

fn main() -> std::process::ExitCode {
    main_args(std::env::args_os(), &mut std::io::stdout(), &mut std::io::stderr()).into()
}

fn main_args<I, T>(args: I, stdout: impl Write, mut stderr: impl Write) -> ExitCode
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    match run(args, stdout) {
        Ok(()) => ExitCode(0),
        Err(Error::Args(e @ args::Error::Cli(_))) => {
            // Clap already does the "error: {}" formatting.
            writeln!(stderr, "{e}").expect("write error to stderr");
            ExitCode(1)
        }
        Err(e) => {
            writeln!(stderr, "{} {e}", "error:".bold().red()).expect("write error to stderr");
            ExitCode(1)
        }
    }
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    // Tests call `run` repeatedly, only the first call installs the subscriber.
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}

fn run<I, T>(args: I, mut stdout: impl Write) -> Result<(), Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let args = args::args(args)?;
    init_logging(args.verbosity);

    match args.command {
        args::Command::Secrets { output, force } => {
            if output.exists() && !force {
                return Err(Error::OutputExists(output));
            }
            let secrets = Secrets::generate(&mut OsRng);
            std::fs::write(&output, secrets.to_toml()?).map_err(Error::WriteOutputFile)?;
            writeln!(stdout, "{} {}", "wrote".bold(), output.display()).map_err(Error::Stdout)?;
        }
        args::Command::Protect {
            secrets,
            input,
            output,
            version,
            message,
        } => {
            let secrets = Secrets::load(&secrets)?;
            let image = std::fs::read(&input).map_err(Error::ReadInputFile)?;
            let package = package::protect(&secrets, version, &message, &image, &mut OsRng)?;
            std::fs::write(&output, &package).map_err(Error::WriteOutputFile)?;
            tracing::info!("protected {} bytes of firmware as version {}", image.len(), version);
            writeln!(stdout, "{:10} {}", "version".bold(), version).map_err(Error::Stdout)?;
            writeln!(stdout, "{:10} {} B", "image".bold(), image.len()).map_err(Error::Stdout)?;
            writeln!(stdout, "{:10} {} B", "package".bold(), package.len()).map_err(Error::Stdout)?;
        }
        args::Command::Update { port, input } => {
            let package = std::fs::read(&input).map_err(Error::ReadInputFile)?;
            let mut port = open(&port)?;
            session::update(&mut port, &package)?;
            writeln!(stdout, "{}", "update installed".bold().green()).map_err(Error::Stdout)?;
        }
        args::Command::Readback {
            port,
            secrets,
            start,
            length,
            output,
        } => {
            let secrets = Secrets::load(&secrets)?;
            let size = readback::response_size(start, length);
            let pages = readback::pages(start, length);
            tracing::info!("requesting pages {}..{}", pages.start, pages.end);
            let request = readback::request(&secrets, start, length, &mut OsRng)?;
            let mut port = open(&port)?;
            let mut data = session::readback(&mut port, &request, size)?;
            readback::decrypt(&secrets, &mut data, &mut OsRng)?;
            match output {
                Some(path) => write_output(&path, &data)?,
                None => {
                    for (i, line) in data.chunks(32).enumerate() {
                        let address = usize::from(pages.start) * consts::PAGE_SIZE + i * 32;
                        writeln!(stdout, "{address:08x} {}", hex::encode(line)).map_err(Error::Stdout)?;
                    }
                }
            }
        }
        args::Command::Configure {
            port,
            secrets,
            bootloader,
        } => {
            let secrets = Secrets::load(&secrets)?;
            let image = std::fs::read(&bootloader).map_err(Error::ReadInputFile)?;
            let expected = package::fingerprint(&secrets, &image, &mut OsRng)?;
            let mut port = open(&port)?;
            let fingerprint = session::configure(&mut port, &expected)?;
            writeln!(stdout, "{:10} {}", "expected".bold(), hex::encode(expected)).map_err(Error::Stdout)?;
            writeln!(stdout, "{:10} {}", "reported".bold(), hex::encode(fingerprint.reported))
                .map_err(Error::Stdout)?;
            if !fingerprint.sealed {
                return Err(Error::FingerprintMismatch);
            }
            writeln!(stdout, "{}", "device sealed".bold().green()).map_err(Error::Stdout)?;
        }
    }
    Ok(())
}

fn open(path: &str) -> Result<Box<dyn serialport::SerialPort>, Error> {
    tracing::info!("opening {path} at {BAUD_RATE} baud");
    serialport::new(path, BAUD_RATE)
        .timeout(PORT_TIMEOUT)
        .open()
        .map_err(Error::OpenPort)
}

fn write_output(path: &Path, data: &[u8]) -> Result<(), Error> {
    std::fs::write(path, data).map_err(Error::WriteOutputFile)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ExitCode(u8);

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        code.0.into()
    }
}

#[derive(Debug)]
enum Error {
    Args(args::Error),
    Cipher(shielded_aes::Error),
    FingerprintMismatch,
    OpenPort(serialport::Error),
    OutputExists(PathBuf),
    Package(package::Error),
    ReadInputFile(std::io::Error),
    Secrets(secrets::Error),
    Session(session::Error),
    Stdout(std::io::Error),
    WriteOutputFile(std::io::Error),
}

impl From<args::Error> for Error {
    fn from(e: args::Error) -> Self {
        Error::Args(e)
    }
}

impl From<shielded_aes::Error> for Error {
    fn from(e: shielded_aes::Error) -> Self {
        Error::Cipher(e)
    }
}

impl From<package::Error> for Error {
    fn from(e: package::Error) -> Self {
        Error::Package(e)
    }
}

impl From<secrets::Error> for Error {
    fn from(e: secrets::Error) -> Self {
        Error::Secrets(e)
    }
}

impl From<session::Error> for Error {
    fn from(e: session::Error) -> Self {
        Error::Session(e)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::Args(e) => write!(f, "{e}"),
            Error::Cipher(e) => write!(f, "{e}"),
            Error::FingerprintMismatch => write!(
                f,
                "bootloader fingerprint does not match the binary, device left unsealed"
            ),
            Error::OpenPort(e) => write!(f, "failed to open serial port: {e}"),
            Error::OutputExists(path) => write!(
                f,
                "{} already exists, pass --force to overwrite it",
                path.display()
            ),
            Error::Package(e) => write!(f, "{e}"),
            Error::ReadInputFile(e) => write!(f, "failed to read input file: {e}"),
            Error::Secrets(e) => write!(f, "{e}"),
            Error::Session(e) => write!(f, "{e}"),
            Error::Stdout(e) => write!(f, "failed to write to stdout: {e}"),
            Error::WriteOutputFile(e) => write!(f, "failed to write to output file: {e}"),
        }
    }
}

impl std::error::Error for Error {}

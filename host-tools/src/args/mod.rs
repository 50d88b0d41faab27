use {clap::Parser, host_protocol::MAX_MESSAGE_LEN, std::path::PathBuf};

mod cli;

/// Program arguments after validation.
#[derive(Debug, Clone)]
pub struct Args {
    pub verbosity: u8,
    pub command: Command,
}

#[derive(Debug, Clone)]
pub enum Command {
    Secrets {
        output: PathBuf,
        force: bool,
    },
    Protect {
        secrets: PathBuf,
        input: PathBuf,
        output: PathBuf,
        version: u16,
        message: Vec<u8>,
    },
    Update {
        port: String,
        input: PathBuf,
    },
    Readback {
        port: String,
        secrets: PathBuf,
        start: u32,
        length: u32,
        output: Option<PathBuf>,
    },
    Configure {
        port: String,
        secrets: PathBuf,
        bootloader: PathBuf,
    },
}

pub fn args<I, T>(args: I) -> Result<Args, Error>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let cli = cli::Args::try_parse_from(args).map_err(Error::Cli)?;
    let command = match cli.command {
        cli::Command::Secrets { output, force } => Command::Secrets { output, force },
        cli::Command::Protect {
            secrets,
            input,
            output,
            firmware_version,
            message,
        } => {
            // The bootloader prints the message up to the first NUL.
            if message.contains('\0') {
                return Err(Error::MessageContainsNul);
            }
            if message.len() > MAX_MESSAGE_LEN {
                return Err(Error::MessageTooLong(message.len()));
            }
            Command::Protect {
                secrets,
                input,
                output,
                version: firmware_version,
                message: message.into_bytes(),
            }
        }
        cli::Command::Update { port, input } => Command::Update { port, input },
        cli::Command::Readback {
            port,
            secrets,
            start,
            length,
            output,
        } => Command::Readback {
            port,
            secrets,
            start,
            length,
            output,
        },
        cli::Command::Configure {
            port,
            secrets,
            bootloader,
        } => Command::Configure {
            port,
            secrets,
            bootloader,
        },
    };
    Ok(Args {
        verbosity: cli.verbose,
        command,
    })
}

#[derive(Debug)]
pub enum Error {
    Cli(clap::Error),
    MessageContainsNul,
    MessageTooLong(usize),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Cli(e) => write!(f, "{}", e.render().ansi()),
            Error::MessageContainsNul => write!(f, "release message must not contain NUL characters"),
            Error::MessageTooLong(len) => {
                write!(f, "release message is {len} bytes long, at most {MAX_MESSAGE_LEN} fit")
            }
        }
    }
}

impl std::error::Error for Error {}

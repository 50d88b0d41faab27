//! Host side of the bootloader sessions.
//!
//! Every function takes the port right after the device was reset into the
//! matching mode and starts by waiting for the mode announce byte.

use {
    crate::package::PACKAGE_SIZE,
    consts::PAGE_SIZE,
    host_protocol::{Mode, ACK, NACK, READBACK_REQUEST_SIZE, TAG_SIZE},
    shielded_aes::Tag,
    std::io::{ErrorKind, Read, Write},
};

/// Consecutive read timeouts tolerated while the device has not started
/// answering yet. It may be busy with a full pass over the package.
pub const PATIENCE: usize = 15;

/// Waits for the device to announce `mode`.
pub fn announce(port: &mut impl Read, mode: Mode) -> Result<(), Error> {
    let mut byte = [0u8; 1];
    receive(port, &mut byte)?;
    match Mode::from_announce(byte[0]) {
        Some(announced) if announced == mode => Ok(()),
        _ => Err(Error::WrongMode {
            expected: mode,
            byte: byte[0],
        }),
    }
}

/// Streams an update package page by page. Every page must be acknowledged,
/// and the device acknowledges once more after installing.
pub fn update(port: &mut (impl Read + Write), package: &[u8]) -> Result<(), Error> {
    if package.len() != PACKAGE_SIZE {
        return Err(Error::PackageSize(package.len()));
    }
    announce(port, Mode::Update)?;
    for (index, page) in package.chunks(PAGE_SIZE).enumerate() {
        port.write_all(page).map_err(Error::Io)?;
        port.flush().map_err(Error::Io)?;
        expect_ack(port)?;
        tracing::debug!("page {index} acknowledged");
    }
    tracing::info!("package sent, waiting for the device to install it");
    expect_ack(port)
}

/// Sends a readback request and collects `size` bytes of encrypted pages.
pub fn readback(
    port: &mut (impl Read + Write),
    request: &[u8; READBACK_REQUEST_SIZE],
    size: usize,
) -> Result<Vec<u8>, Error> {
    announce(port, Mode::Readback)?;
    port.write_all(request).map_err(Error::Io)?;
    port.flush().map_err(Error::Io)?;
    let mut data = vec![0u8; size];
    receive(port, &mut data)?;
    Ok(data)
}

/// Outcome of a configure session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fingerprint {
    pub reported: Tag,
    pub sealed: bool,
}

/// Asks for the bootloader fingerprint and seals the device when it matches
/// `expected`.
pub fn configure(port: &mut (impl Read + Write), expected: &Tag) -> Result<Fingerprint, Error> {
    announce(port, Mode::Configure)?;
    port.write_all(&[ACK]).map_err(Error::Io)?;
    port.flush().map_err(Error::Io)?;
    let mut reported = [0u8; TAG_SIZE];
    receive(port, &mut reported)?;
    let sealed = reported == *expected;
    port.write_all(&[if sealed { ACK } else { NACK }]).map_err(Error::Io)?;
    port.flush().map_err(Error::Io)?;
    Ok(Fingerprint { reported, sealed })
}

fn expect_ack(port: &mut impl Read) -> Result<(), Error> {
    let mut byte = [0u8; 1];
    receive(port, &mut byte)?;
    match byte[0] {
        ACK => Ok(()),
        NACK => Err(Error::Rejected),
        other => Err(Error::UnexpectedReply(other)),
    }
}

/// Fills `buf`. A lone NACK followed by silence is the device refusing the
/// session.
fn receive(port: &mut impl Read, buf: &mut [u8]) -> Result<(), Error> {
    let mut filled = 0;
    let mut idle = 0;
    while filled < buf.len() {
        match port.read(&mut buf[filled..]) {
            Ok(0) => return Err(stalled(&buf[..filled], Error::Closed)),
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) if e.kind() == ErrorKind::TimedOut && filled == 0 && idle + 1 < PATIENCE => {
                idle += 1;
                tracing::debug!("waiting for the device ({idle}/{PATIENCE})");
            }
            Err(e) if e.kind() == ErrorKind::TimedOut => return Err(stalled(&buf[..filled], Error::Timeout)),
            Err(e) => return Err(Error::Io(e)),
        }
    }
    Ok(())
}

fn stalled(received: &[u8], otherwise: Error) -> Error {
    if received == [NACK] {
        Error::Rejected
    } else {
        otherwise
    }
}

#[derive(Debug)]
pub enum Error {
    Closed,
    Io(std::io::Error),
    PackageSize(usize),
    Rejected,
    Timeout,
    UnexpectedReply(u8),
    WrongMode { expected: Mode, byte: u8 },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Closed => write!(f, "serial port closed"),
            Error::Io(e) => write!(f, "serial port error: {e}"),
            Error::PackageSize(len) => {
                write!(f, "update package is {len} bytes, expected {PACKAGE_SIZE}")
            }
            Error::Rejected => write!(f, "device rejected the session"),
            Error::Timeout => write!(f, "device stopped responding"),
            Error::UnexpectedReply(byte) => write!(f, "unexpected reply {byte:#04x}"),
            Error::WrongMode { expected, byte } => write!(
                f,
                "device announced {byte:#04x}, expected {:#04x} ({expected:?} mode)",
                expected.announce()
            ),
        }
    }
}

impl std::error::Error for Error {}

//! Provisioning secrets file.
//!
//! The same TOML file is read by the device build, which bakes the values
//! into the bootloader image.

use {
    host_protocol::PASSWORD_SIZE,
    rand::{CryptoRng, RngCore},
    serde::{Deserialize, Serialize},
    shielded_aes::{Block, Key},
    std::path::Path,
    zeroize::{Zeroize, ZeroizeOnDrop},
};

#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Secrets {
    pub firmware_key: Key,
    pub firmware_hash_key: Key,
    pub firmware_iv: Block,
    pub readback_key: Key,
    pub readback_hash_key: Key,
    pub readback_iv: Block,
    pub readback_password: [u8; PASSWORD_SIZE],
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secrets(..)")
    }
}

/// On-disk representation, every value hex encoded.
#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct File {
    firmware_key: String,
    firmware_hash_key: String,
    firmware_iv: String,
    readback_key: String,
    readback_hash_key: String,
    readback_iv: String,
    readback_password: String,
}

impl Secrets {
    pub fn generate(rng: &mut (impl RngCore + CryptoRng)) -> Self {
        let mut secrets = Self {
            firmware_key: [0; 32],
            firmware_hash_key: [0; 32],
            firmware_iv: [0; 16],
            readback_key: [0; 32],
            readback_hash_key: [0; 32],
            readback_iv: [0; 16],
            readback_password: [0; PASSWORD_SIZE],
        };
        // The device build refuses equal keys.
        loop {
            rng.fill_bytes(&mut secrets.firmware_key);
            rng.fill_bytes(&mut secrets.firmware_hash_key);
            rng.fill_bytes(&mut secrets.readback_key);
            rng.fill_bytes(&mut secrets.readback_hash_key);
            if secrets.check().is_ok() {
                break;
            }
        }
        rng.fill_bytes(&mut secrets.firmware_iv);
        rng.fill_bytes(&mut secrets.readback_iv);
        rng.fill_bytes(&mut secrets.readback_password);
        secrets
    }

    pub fn load(path: &Path) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path).map_err(Error::Read)?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, Error> {
        let file: File = toml::from_str(text)?;
        let secrets = Self {
            firmware_key: decode("firmware_key", &file.firmware_key)?,
            firmware_hash_key: decode("firmware_hash_key", &file.firmware_hash_key)?,
            firmware_iv: decode("firmware_iv", &file.firmware_iv)?,
            readback_key: decode("readback_key", &file.readback_key)?,
            readback_hash_key: decode("readback_hash_key", &file.readback_hash_key)?,
            readback_iv: decode("readback_iv", &file.readback_iv)?,
            readback_password: decode("readback_password", &file.readback_password)?,
        };
        secrets.check()?;
        Ok(secrets)
    }

    pub fn to_toml(&self) -> Result<String, Error> {
        let file = File {
            firmware_key: hex::encode(self.firmware_key),
            firmware_hash_key: hex::encode(self.firmware_hash_key),
            firmware_iv: hex::encode(self.firmware_iv),
            readback_key: hex::encode(self.readback_key),
            readback_hash_key: hex::encode(self.readback_hash_key),
            readback_iv: hex::encode(self.readback_iv),
            readback_password: hex::encode(self.readback_password),
        };
        Ok(toml::to_string(&file)?)
    }

    /// A key that hashes some data must never encrypt it too.
    fn check(&self) -> Result<(), Error> {
        let keys = [
            ("firmware_key", &self.firmware_key),
            ("firmware_hash_key", &self.firmware_hash_key),
            ("readback_key", &self.readback_key),
            ("readback_hash_key", &self.readback_hash_key),
        ];
        for (i, (a, ka)) in keys.iter().enumerate() {
            for (b, kb) in &keys[i + 1..] {
                if ka == kb {
                    return Err(Error::KeyReused(*a, *b));
                }
            }
        }
        Ok(())
    }
}

fn decode<const N: usize>(name: &'static str, value: &str) -> Result<[u8; N], Error> {
    let bytes = hex::decode(value).map_err(|e| Error::Hex(name, e))?;
    let len = bytes.len();
    bytes.try_into().map_err(|_| Error::Length {
        name,
        expected: N,
        actual: len,
    })
}

#[derive(Debug)]
pub enum Error {
    Hex(&'static str, hex::FromHexError),
    KeyReused(&'static str, &'static str),
    Length {
        name: &'static str,
        expected: usize,
        actual: usize,
    },
    Read(std::io::Error),
    Toml(toml::de::Error),
    TomlSer(toml::ser::Error),
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Toml(e)
    }
}

impl From<toml::ser::Error> for Error {
    fn from(e: toml::ser::Error) -> Self {
        Error::TomlSer(e)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Hex(name, e) => write!(f, "{name} is not valid hex: {e}"),
            Error::KeyReused(a, b) => write!(f, "{a} and {b} must differ"),
            Error::Length { name, expected, actual } => {
                write!(f, "{name} must be {expected} bytes, got {actual}")
            }
            Error::Read(e) => write!(f, "failed to read secrets file: {e}"),
            Error::Toml(e) => write!(f, "invalid secrets file: {e}"),
            Error::TomlSer(e) => write!(f, "failed to serialize secrets: {e}"),
        }
    }
}

impl std::error::Error for Error {}

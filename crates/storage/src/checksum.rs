//! Incremental content checksums for write validation.

use base64::{Engine as _, engine::general_purpose};
use depot_core::Validation;
use md5::{Digest, Md5};

/// Running checksum over the bytes of one write.
///
/// Digests are rendered as base64 of the big-endian digest bytes, the form
/// object stores use in checksum headers.
#[derive(Clone)]
pub enum Checksum {
    Crc32c(u32),
    Md5(Md5),
    None,
}

impl Checksum {
    pub fn new(validation: Validation) -> Self {
        match validation {
            Validation::Crc32c => Self::Crc32c(0),
            Validation::Md5 => Self::Md5(Md5::new()),
            Validation::None => Self::None,
        }
    }

    /// Checksum of a complete buffer.
    pub fn of(validation: Validation, data: &[u8]) -> Self {
        let mut checksum = Self::new(validation);
        checksum.update(data);
        checksum
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::Crc32c(crc) => *crc = crc32c::crc32c_append(*crc, data),
            Self::Md5(hasher) => hasher.update(data),
            Self::None => {}
        }
    }

    pub fn validation(&self) -> Validation {
        match self {
            Self::Crc32c(_) => Validation::Crc32c,
            Self::Md5(_) => Validation::Md5,
            Self::None => Validation::None,
        }
    }

    /// Algorithm name, as used in error messages.
    pub fn algorithm(&self) -> &'static str {
        self.validation().as_str()
    }

    /// Base64 digest, or `None` when validation is disabled.
    pub fn finalize(self) -> Option<String> {
        match self {
            Self::Crc32c(crc) => Some(general_purpose::STANDARD.encode(crc.to_be_bytes())),
            Self::Md5(hasher) => Some(general_purpose::STANDARD.encode(hasher.finalize())),
            Self::None => None,
        }
    }
}

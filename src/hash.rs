//! Content-addressed hashing
//!
//! A content identifier is the hex encoding of a multihash: the varint
//! algorithm code, the digest length, then the digest itself. For sha2-256 every
//! identifier therefore starts with `1220`.
//!
//! ```
//! use archway::hash::{calc_hash, HashAlgorithm};
//!
//! let id = calc_hash(b"", HashAlgorithm::Sha2_256);
//! assert!(id.starts_with("1220e3b0c442"));
//! ```

use multihash_codetable::{Code, MultihashDigest};
use std::fmt;
use std::str::FromStr;

/// Error type for hashing operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HashError {
    #[error("unsupported hash algorithm: {0}")]
    UnsupportedAlgorithm(String),
}

/// Digest algorithms accepted by name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HashAlgorithm {
    #[default]
    Sha2_256,
    Sha2_512,
}

impl HashAlgorithm {
    /// Multihash table name of the algorithm
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sha2_256 => "sha2-256",
            Self::Sha2_512 => "sha2-512",
        }
    }

    /// Algorithm that produced a content identifier, read from its multihash
    /// prefix
    pub fn of_id(id: &str) -> Option<Self> {
        [Self::Sha2_256, Self::Sha2_512]
            .into_iter()
            .find(|alg| id.starts_with(alg.id_prefix()))
    }

    /// Hex of the code and digest length bytes
    fn id_prefix(&self) -> &'static str {
        match self {
            Self::Sha2_256 => "1220",
            Self::Sha2_512 => "1340",
        }
    }

    fn code(&self) -> Code {
        match self {
            Self::Sha2_256 => Code::Sha2_256,
            Self::Sha2_512 => Code::Sha2_512,
        }
    }
}

impl FromStr for HashAlgorithm {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sha2-256" => Ok(Self::Sha2_256),
            "sha2-512" => Ok(Self::Sha2_512),
            other => Err(HashError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Hash a byte sequence into a self-describing content identifier
pub fn calc_hash(data: &[u8], algorithm: HashAlgorithm) -> String {
    let multihash = algorithm.code().digest(data);
    hex::encode(multihash.to_bytes())
}

/// Hash with an algorithm given by its multihash table name (e.g. "sha2-256")
pub fn calc_hash_named(data: &[u8], algorithm: &str) -> Result<String, HashError> {
    let algorithm = HashAlgorithm::from_str(algorithm)?;
    Ok(calc_hash(data, algorithm))
}

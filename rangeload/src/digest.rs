//! Incremental digests for part verification.
//!
//! Part metadata carries lowercase hex digests. MD5 is the usual algorithm
//! for part tables; SHA-256 is available for sources that publish it.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

/// Digest algorithm used for part checksums.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    /// MD5, 32 hex characters.
    #[default]
    Md5,
    /// SHA-256, 64 hex characters.
    Sha256,
}

impl DigestAlgorithm {
    /// Start a new incremental digest.
    pub fn hasher(self) -> PartHasher {
        match self {
            Self::Md5 => PartHasher::Md5(md5::Context::new()),
            Self::Sha256 => PartHasher::Sha256(Sha256::new()),
        }
    }

    /// Configuration name of this algorithm.
    pub fn name(self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha256 => "sha256",
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DigestAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "md5" => Ok(Self::Md5),
            "sha256" | "sha-256" => Ok(Self::Sha256),
            other => Err(format!("unknown digest algorithm '{}'", other)),
        }
    }
}

/// Running digest over a part's bytes.
#[derive(Clone)]
pub enum PartHasher {
    Md5(md5::Context),
    Sha256(Sha256),
}

impl PartHasher {
    /// Feed more bytes.
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::Md5(ctx) => ctx.consume(data),
            Self::Sha256(hasher) => hasher.update(data),
        }
    }

    /// Finish and return the lowercase hex digest.
    pub fn finalize_hex(self) -> String {
        match self {
            Self::Md5(ctx) => format!("{:x}", ctx.compute()),
            Self::Sha256(hasher) => format!("{:x}", hasher.finalize()),
        }
    }
}

impl fmt::Debug for PartHasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Md5(_) => f.write_str("PartHasher::Md5"),
            Self::Sha256(_) => f.write_str("PartHasher::Sha256"),
        }
    }
}

/// Compare an expected digest from metadata with a computed one.
pub fn digests_match(expected: &str, actual: &str) -> bool {
    expected.trim().eq_ignore_ascii_case(actual)
}

/// Digest a byte slice in one call.
pub fn digest_bytes(algorithm: DigestAlgorithm, data: &[u8]) -> String {
    let mut hasher = algorithm.hasher();
    hasher.update(data);
    hasher.finalize_hex()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_md5_hello_world() {
        assert_eq!(
            digest_bytes(DigestAlgorithm::Md5, b"hello world"),
            "5eb63bbbe01eeed093cb22bb8f5acdc3"
        );
    }

    #[test]
    fn test_sha256_hello_world() {
        assert_eq!(
            digest_bytes(DigestAlgorithm::Sha256, b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(
            digest_bytes(DigestAlgorithm::Md5, b""),
            "d41d8cd98f00b204e9800998ecf8427e"
        );
        assert_eq!(
            digest_bytes(DigestAlgorithm::Sha256, b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_incremental_matches_one_shot() {
        let data = vec![0xABu8; 100_000];
        let mut hasher = DigestAlgorithm::Md5.hasher();
        for chunk in data.chunks(4096) {
            hasher.update(chunk);
        }
        assert_eq!(hasher.finalize_hex(), digest_bytes(DigestAlgorithm::Md5, &data));
    }

    #[test]
    fn test_digests_match_ignores_case() {
        assert!(digests_match("5EB63BBBE01EEED093CB22BB8F5ACDC3", "5eb63bbbe01eeed093cb22bb8f5acdc3"));
        assert!(!digests_match("abc", "abd"));
    }

    #[test]
    fn test_parse_algorithm() {
        assert_eq!("MD5".parse::<DigestAlgorithm>().unwrap(), DigestAlgorithm::Md5);
        assert_eq!("sha256".parse::<DigestAlgorithm>().unwrap(), DigestAlgorithm::Sha256);
        assert!("crc32".parse::<DigestAlgorithm>().is_err());
    }
}

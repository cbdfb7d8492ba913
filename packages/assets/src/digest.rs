use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A validated MD5 digest as declared by upload clients.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Md5Digest([u8; 16]);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid md5 digest: {0}")]
pub struct InvalidDigest(String);

impl Md5Digest {
    pub fn compute(data: &[u8]) -> Self {
        Self(md5::compute(data).0)
    }

    /// Parse a 32-character hex string. Uppercase input is accepted.
    pub fn from_hex(s: &str) -> Result<Self, InvalidDigest> {
        if s.len() != 32 {
            return Err(InvalidDigest(format!(
                "expected 32 hex characters, got {}",
                s.len()
            )));
        }
        let bytes = hex::decode(s).map_err(|e| InvalidDigest(format!("invalid hex: {e}")))?;
        let arr: [u8; 16] = bytes
            .try_into()
            .map_err(|_| InvalidDigest("decoded to wrong length".into()))?;
        Ok(Self(arr))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

/// Incremental MD5 over streamed bytes.
pub struct Md5Hasher(md5::Context);

impl Md5Hasher {
    pub fn new() -> Self {
        Self(md5::Context::new())
    }

    pub fn update(&mut self, data: &[u8]) {
        self.0.consume(data);
    }

    pub fn finalize(self) -> Md5Digest {
        Md5Digest(self.0.compute().0)
    }
}

impl Default for Md5Hasher {
    fn default() -> Self {
        Self::new()
    }
}

impl FromStr for Md5Digest {
    type Err = InvalidDigest;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s.trim())
    }
}

impl fmt::Debug for Md5Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Md5Digest({})", self.to_hex())
    }
}

impl fmt::Display for Md5Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for Md5Digest {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Md5Digest {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

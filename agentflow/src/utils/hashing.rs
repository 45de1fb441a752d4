//! SHA-256 content hashing.

use sha2::{Digest, Sha256};

/// Returns the lowercase hex SHA-256 digest of `data`.
#[must_use]
pub fn sha256_hex(data: impl AsRef<[u8]>) -> String {
    hex::encode(Sha256::digest(data.as_ref()))
}

/// Incremental SHA-256 hasher producing a hex digest.
#[derive(Default)]
pub struct Sha256Builder {
    inner: Sha256,
}

impl Sha256Builder {
    /// Creates an empty hasher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds bytes into the hasher.
    pub fn update(&mut self, data: impl AsRef<[u8]>) {
        self.inner.update(data.as_ref());
    }

    /// Consumes the hasher and returns the hex digest.
    #[must_use]
    pub fn finish(self) -> String {
        hex::encode(self.inner.finalize())
    }
}

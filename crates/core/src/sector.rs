//! Content-addressed sector identity.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512_256};
use std::fmt;

/// Identity of a schema v2 sector: the sector's index in the file joined
/// with the SHA-512/256 digest of its contents.
///
/// Two writes of the same index with equal contents produce equal ids, so
/// idempotent rewrites can be suppressed without touching the store.
#[derive(Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SectorId(String);

impl SectorId {
    /// Compute the id for sector `idx` holding `data`.
    pub fn compute(idx: usize, data: &[u8]) -> Self {
        let mut hasher = Sha512_256::new();
        hasher.update(data);
        let digest = hasher.finalize();
        let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        Self(format!("{idx}__{hex}"))
    }

    /// Parse an id from its stored string form.
    pub fn parse(s: &str) -> Result<Self> {
        let (idx, digest) = s
            .split_once("__")
            .ok_or_else(|| Error::InvalidSectorId(s.to_string()))?;
        if idx.parse::<usize>().is_err() || digest.is_empty() {
            return Err(Error::InvalidSectorId(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }

    /// The sector's index within its file.
    pub fn index(&self) -> Option<usize> {
        self.0.split_once("__")?.0.parse().ok()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for SectorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for SectorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown = if self.0.len() > 24 { &self.0[..24] } else { &self.0 };
        write!(f, "SectorId({shown})")
    }
}

//! Typed ID wrappers for type safety across flowshelf.
//!
//! Newtype wrappers around UUIDs prevent mixing different kinds of
//! identifiers (e.g., passing an AssociationId where a BlobId is expected).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a stored image blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobId(Uuid);

impl BlobId {
    /// Generate a new random blob ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for BlobId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for BlobId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<BlobId> for Uuid {
    fn from(id: BlobId) -> Self {
        id.0
    }
}

impl std::str::FromStr for BlobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl std::fmt::Display for BlobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a blob-to-entity association row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssociationId(Uuid);

impl AssociationId {
    /// Generate a new random association ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AssociationId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for AssociationId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl std::str::FromStr for AssociationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl std::fmt::Display for AssociationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

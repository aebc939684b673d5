//! Core type definitions for image owners.
//!
//! Every association binds a blob to one record of a given [`EntityType`].
//! The string forms are what the database stores.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of marketplace record that can own images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    /// A published workflow template.
    Workflow,
    /// A gallery category.
    Category,
    /// A template author profile.
    Author,
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Workflow => write!(f, "workflow"),
            Self::Category => write!(f, "category"),
            Self::Author => write!(f, "author"),
        }
    }
}

impl std::str::FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "workflow" => Ok(Self::Workflow),
            "category" => Ok(Self::Category),
            "author" => Ok(Self::Author),
            _ => Err(format!("Invalid entity type: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_type_serialization() {
        let et = EntityType::Workflow;
        let json = serde_json::to_string(&et).unwrap();
        assert_eq!(json, "\"workflow\"");

        let back: EntityType = serde_json::from_str("\"author\"").unwrap();
        assert_eq!(back, EntityType::Author);
    }

    #[test]
    fn test_entity_type_display_matches_from_str() {
        for et in [EntityType::Workflow, EntityType::Category, EntityType::Author] {
            assert_eq!(et.to_string().parse::<EntityType>().unwrap(), et);
        }
    }

    #[test]
    fn test_entity_type_from_str_invalid() {
        assert!("user".parse::<EntityType>().is_err());
    }
}

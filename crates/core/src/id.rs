//! Strongly-typed identifiers.

use core::fmt;
use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DomainError, DomainResult};

/// Identifier of an ingredient whose demand is forecast.
///
/// Serialized as the bare UUID string so forecasts can be joined with the
/// application's own ingredient table.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IngredientId(Uuid);

impl IngredientId {
    /// A fresh, time-ordered (UUIDv7) identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for IngredientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for IngredientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<Uuid> for IngredientId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl FromStr for IngredientId {
    type Err = DomainError;

    /// Accepts any UUID text form, surrounding whitespace ignored.
    fn from_str(s: &str) -> DomainResult<Self> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|e| DomainError::invalid_id(format!("IngredientId {s:?}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_its_own_display() {
        let id = IngredientId::new();
        assert_eq!(id.to_string().parse::<IngredientId>().unwrap(), id);
        assert_eq!(format!("  {id}\n").parse::<IngredientId>().unwrap(), id);
    }

    #[test]
    fn malformed_id_names_the_type() {
        let DomainError::InvalidId(msg) = "not-a-uuid".parse::<IngredientId>().unwrap_err();
        assert!(msg.starts_with("IngredientId"));
    }

    #[test]
    fn serializes_as_a_bare_uuid() {
        let uuid = Uuid::now_v7();
        let json = serde_json::to_string(&IngredientId::from_uuid(uuid)).unwrap();
        assert_eq!(json, format!("\"{uuid}\""));
    }
}

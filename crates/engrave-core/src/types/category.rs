//! Category and retention tier enumerations.
//!
//! Both serialize to snake_case for storage compatibility and parse from the
//! same names, so unknown values are rejected at the boundary.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};

use crate::error::{EngraveError, EngraveResult, ErrorCode};

/// The kind of knowledge a record holds.
///
/// Category scales how strongly a successful retrieval grows a record's
/// stability: procedures and preferences settle quickly, episodes and
/// opinions stay fragile.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Facts about the world or the user.
    Factual,
    /// Things that happened at a specific time.
    Episodic,
    /// Likes, dislikes, styles.
    Preference,
    /// How to do something.
    Procedural,
    /// Feelings attached to people or events.
    Emotional,
    /// Judgements that may change.
    Opinion,
    /// Relationships between people or entities.
    Relational,
}

impl Category {
    /// Returns all category names as static strings.
    pub fn all_names() -> Vec<&'static str> {
        Self::iter().map(|c| c.into()).collect()
    }

    /// Parse a category name, rejecting unknown values.
    pub fn parse(name: &str) -> EngraveResult<Self> {
        name.trim().to_lowercase().parse().map_err(|_| {
            EngraveError::invalid_with_suggestion(
                ErrorCode::ParamUnknownValue,
                "category",
                format!("unknown category '{}'", name),
                format!("Use one of: {}", Self::all_names().join(", ")),
            )
        })
    }

    /// Multiplier applied to the stability growth bonus on each access.
    pub fn stability_factor(&self) -> f64 {
        match self {
            Category::Procedural => 1.3,
            Category::Preference => 1.2,
            Category::Factual => 1.0,
            Category::Relational => 1.0,
            Category::Emotional => 0.9,
            Category::Opinion => 0.8,
            Category::Episodic => 0.7,
        }
    }
}

/// Retention tier, in consolidation order.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Freshly added, short-term.
    Working,
    /// Consolidated long-term memory.
    Core,
    /// Faded from active use but still retrievable.
    Archive,
}

impl Tier {
    /// All tiers in consolidation order.
    pub fn all() -> Vec<Tier> {
        Self::iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_parse() {
        assert_eq!(Category::parse("factual").unwrap(), Category::Factual);
        assert_eq!(Category::parse(" Episodic ").unwrap(), Category::Episodic);

        let err = Category::parse("gossip").unwrap_err();
        assert!(err.is_invalid_parameter());
        assert!(err.suggestion().unwrap().contains("procedural"));
    }

    #[test]
    fn test_category_serde_snake_case() {
        let json = serde_json::to_string(&Category::Procedural).unwrap();
        assert_eq!(json, "\"procedural\"");
        let back: Category = serde_json::from_str("\"opinion\"").unwrap();
        assert_eq!(back, Category::Opinion);
    }

    #[test]
    fn test_stability_factors_positive() {
        for name in Category::all_names() {
            let category = Category::parse(name).unwrap();
            assert!(category.stability_factor() > 0.0);
        }
    }

    #[test]
    fn test_tier_roundtrip_names() {
        assert_eq!(Tier::Working.to_string(), "working");
        assert_eq!("archive".parse::<Tier>().unwrap(), Tier::Archive);
        assert_eq!(Tier::all().len(), 3);
    }
}

//! Core data models for stylelens
//!
//! These models are shared between the feature store, the classifier
//! and the service layer.

use serde::{Deserialize, Serialize};

/// Identifier of a code block in the dataset.
pub type BlockId = u64;

/// Confidence tier of a user-provided label.
///
/// `High` comes from a direct user action (a click), `Low` from automatic
/// inclusion when a block crossed a score threshold. The wire names used by
/// the labeling UI (`click` / `threshold`) are accepted as aliases.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    #[serde(alias = "click")]
    High,
    #[serde(alias = "threshold")]
    Low,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::High => "high",
            Tier::Low => "low",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "high" | "click" => Ok(Tier::High),
            "low" | "threshold" => Ok(Tier::Low),
            other => Err(format!("unknown tier '{}' (expected high or low)", other)),
        }
    }
}

/// A block the user marked as matching / not matching the target style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LabeledItem {
    pub id: BlockId,
    #[serde(default, alias = "source")]
    pub tier: Tier,
}

impl LabeledItem {
    pub fn new(id: BlockId, tier: Tier) -> Self {
        Self { id, tier }
    }

    pub fn high(id: BlockId) -> Self {
        Self::new(id, Tier::High)
    }

    pub fn low(id: BlockId) -> Self {
        Self::new(id, Tier::Low)
    }
}

/// Block metadata, without the source text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockInfo {
    pub block_id: BlockId,
    pub file_id: u64,
    pub file_path: String,
    /// function | class | method | module
    pub block_type: String,
    pub block_name: String,
    pub language: String,
    pub start_line: u32,
    pub end_line: u32,
}

/// Source text of a single block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockSource {
    pub block_id: BlockId,
    pub code: String,
    pub language: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_accepts_wire_aliases() {
        let item: LabeledItem = serde_json::from_str(r#"{"id": 7, "source": "click"}"#).unwrap();
        assert_eq!(item, LabeledItem::high(7));

        let item: LabeledItem = serde_json::from_str(r#"{"id": 8, "tier": "threshold"}"#).unwrap();
        assert_eq!(item, LabeledItem::low(8));
    }

    #[test]
    fn test_tier_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Tier::Low).unwrap(), r#""low""#);
        assert_eq!("HIGH".parse::<Tier>().unwrap(), Tier::High);
        assert!("medium".parse::<Tier>().is_err());
    }

    #[test]
    fn test_missing_tier_defaults_to_high() {
        let item: LabeledItem = serde_json::from_str(r#"{"id": 3}"#).unwrap();
        assert_eq!(item.tier, Tier::High);
    }
}

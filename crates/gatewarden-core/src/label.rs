use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Sensitivity classification. Variant order is the total order
/// `Public < Internal < Confidential < Regulated` and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    Public,
    Internal,
    Confidential,
    Regulated,
}

pub const ALL_LABELS: [Label; 4] = [
    Label::Public,
    Label::Internal,
    Label::Confidential,
    Label::Regulated,
];

impl Label {
    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Public => "public",
            Label::Internal => "internal",
            Label::Confidential => "confidential",
            Label::Regulated => "regulated",
        }
    }

    /// Labels a subject with the given clearance may see: the prefix of the
    /// total order up to and including the clearance itself.
    pub fn allowed_for(clearance: Label) -> &'static [Label] {
        match clearance {
            Label::Public => &ALL_LABELS[..1],
            Label::Internal => &ALL_LABELS[..2],
            Label::Confidential => &ALL_LABELS[..3],
            Label::Regulated => &ALL_LABELS[..4],
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown label: {0}")]
pub struct UnknownLabel(String);

impl FromStr for Label {
    type Err = UnknownLabel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(Label::Public),
            "internal" => Ok(Label::Internal),
            "confidential" => Ok(Label::Confidential),
            "regulated" => Ok(Label::Regulated),
            other => Err(UnknownLabel(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_totally_ordered() {
        assert!(Label::Public < Label::Internal);
        assert!(Label::Internal < Label::Confidential);
        assert!(Label::Confidential < Label::Regulated);
    }

    #[test]
    fn allowed_for_public_is_public_only() {
        assert_eq!(Label::allowed_for(Label::Public), &[Label::Public]);
    }

    #[test]
    fn allowed_for_internal_is_prefix_of_two() {
        assert_eq!(
            Label::allowed_for(Label::Internal),
            &[Label::Public, Label::Internal]
        );
    }

    #[test]
    fn allowed_for_regulated_is_every_label() {
        assert_eq!(Label::allowed_for(Label::Regulated), &ALL_LABELS);
    }

    #[test]
    fn allowed_sets_are_monotone_in_clearance() {
        for (lo, hi) in ALL_LABELS.iter().zip(ALL_LABELS.iter().skip(1)) {
            let lo_set = Label::allowed_for(*lo);
            let hi_set = Label::allowed_for(*hi);
            assert!(lo_set.iter().all(|l| hi_set.contains(l)));
        }
    }

    #[test]
    fn parse_round_trips_display() {
        for label in ALL_LABELS {
            assert_eq!(label.as_str().parse::<Label>().unwrap(), label);
        }
    }

    #[test]
    fn parse_rejects_unknown() {
        assert!("secret".parse::<Label>().is_err());
    }

    #[test]
    fn serde_uses_lowercase() {
        let json = serde_json::to_string(&Label::Confidential).unwrap();
        assert_eq!(json, "\"confidential\"");
        let back: Label = serde_json::from_str("\"regulated\"").unwrap();
        assert_eq!(back, Label::Regulated);
    }
}

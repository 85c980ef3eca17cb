//! The pattern catalog: a finite, ordered set of masking rules.
//!
//! Order matters. More specific patterns run first so a social security
//! number is masked as an SSN before the phone rule can touch it. The
//! catalog is read-only after load; a malformed pattern fails the load and
//! the service refuses to start.

use regex::Regex;
use serde::Deserialize;

use crate::label::Label;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternCategory {
    Pii,
    Phi,
}

impl PatternCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternCategory::Pii => "PII",
            PatternCategory::Phi => "PHI",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MaskStrategy {
    /// Replace the whole match with a fixed string.
    Fixed(String),
    /// Keep the trailing `keep` characters, replace the rest with `mask_char`.
    KeepLast { keep: usize, mask_char: char },
}

#[derive(Debug, Clone)]
pub struct RedactionPattern {
    pub id: String,
    pub regex: Regex,
    pub category: PatternCategory,
    pub mask: MaskStrategy,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum CatalogError {
    #[error("pattern '{id}' has an invalid regex: {source}")]
    InvalidRegex {
        id: String,
        #[source]
        source: regex::Error,
    },

    #[error("pattern '{0}' is declared more than once")]
    DuplicateId(String),

    #[error("pattern '{0}' has an empty fixed mask")]
    EmptyMask(String),

    #[error("failed to parse pattern file: {0}")]
    Parse(String),
}

struct PatternSpec {
    id: &'static str,
    regex: &'static str,
    category: PatternCategory,
    mask: MaskStrategy,
}

fn builtin_specs() -> Vec<PatternSpec> {
    vec![
        PatternSpec {
            id: "ssn",
            regex: r"\b\d{3}-\d{2}-\d{4}\b",
            category: PatternCategory::Pii,
            mask: MaskStrategy::Fixed("XXX-XX-XXXX".to_string()),
        },
        PatternSpec {
            id: "email",
            regex: r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}",
            category: PatternCategory::Pii,
            mask: MaskStrategy::Fixed("***@***.***".to_string()),
        },
        PatternSpec {
            id: "pan",
            regex: r"\b(?:4\d{3}|5[1-5]\d{2}|3[47]\d{2}|6(?:011|5\d{2}))[-\s]?\d{4}[-\s]?\d{4}[-\s]?\d{3,4}\b",
            category: PatternCategory::Pii,
            mask: MaskStrategy::KeepLast {
                keep: 4,
                mask_char: '*',
            },
        },
        PatternSpec {
            id: "phone",
            regex: r"\b\(?\d{3}\)?[-.\s]\d{3}[-.\s]\d{4}\b",
            category: PatternCategory::Pii,
            mask: MaskStrategy::Fixed("(XXX) XXX-XXXX".to_string()),
        },
        PatternSpec {
            id: "dob",
            regex: r"\b(?:0[1-9]|1[0-2])[/\-](?:0[1-9]|[12]\d|3[01])[/\-](?:19|20)\d{2}\b",
            category: PatternCategory::Phi,
            mask: MaskStrategy::Fixed("XX/XX/XXXX".to_string()),
        },
        PatternSpec {
            id: "mrn",
            regex: r"\bMRN[-:# ]?\d{6,10}\b",
            category: PatternCategory::Phi,
            mask: MaskStrategy::Fixed("MRN-XXXXXXX".to_string()),
        },
        PatternSpec {
            id: "ip_address",
            regex: r"\b(?:(?:25[0-5]|2[0-4]\d|[01]?\d\d?)\.){3}(?:25[0-5]|2[0-4]\d|[01]?\d\d?)\b",
            category: PatternCategory::Pii,
            mask: MaskStrategy::Fixed("XXX.XXX.XXX.XXX".to_string()),
        },
        PatternSpec {
            id: "street_address",
            regex: r"\b\d{1,5}\s+(?:[A-Z][a-z]+\s?){1,4}(?:St|Street|Ave|Avenue|Blvd|Boulevard|Dr|Drive|Ln|Lane|Rd|Road|Ct|Court|Pl|Place|Way)\b",
            category: PatternCategory::Pii,
            mask: MaskStrategy::Fixed("[ADDRESS REDACTED]".to_string()),
        },
    ]
}

/// TOML shape for user-supplied catalogs.
#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    patterns: Vec<PatternEntry>,
}

#[derive(Debug, Deserialize)]
struct PatternEntry {
    id: String,
    regex: String,
    category: PatternCategory,
    #[serde(default)]
    replacement: Option<String>,
    #[serde(default)]
    keep_last: Option<usize>,
    #[serde(default)]
    mask_char: Option<char>,
}

#[derive(Debug, Clone)]
pub struct PatternCatalog {
    patterns: Vec<RedactionPattern>,
}

impl PatternCatalog {
    /// The built-in catalog. Returns an error rather than panicking so the
    /// caller can fail closed at startup.
    pub fn builtin() -> Result<Self, CatalogError> {
        let patterns = builtin_specs()
            .into_iter()
            .map(|spec| {
                let regex = Regex::new(spec.regex).map_err(|source| CatalogError::InvalidRegex {
                    id: spec.id.to_string(),
                    source,
                })?;
                Ok(RedactionPattern {
                    id: spec.id.to_string(),
                    regex,
                    category: spec.category,
                    mask: spec.mask,
                })
            })
            .collect::<Result<Vec<_>, CatalogError>>()?;
        Self::validated(patterns)
    }

    /// Load a catalog from TOML. Any malformed entry fails the whole load.
    pub fn from_toml(contents: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile =
            toml::from_str(contents).map_err(|e| CatalogError::Parse(e.to_string()))?;

        let mut patterns = Vec::with_capacity(file.patterns.len());
        for entry in file.patterns {
            let regex = Regex::new(&entry.regex).map_err(|source| CatalogError::InvalidRegex {
                id: entry.id.clone(),
                source,
            })?;
            let mask = match (entry.keep_last, entry.replacement) {
                (Some(keep), _) => MaskStrategy::KeepLast {
                    keep,
                    mask_char: entry.mask_char.unwrap_or('*'),
                },
                (None, Some(replacement)) => {
                    if replacement.is_empty() {
                        return Err(CatalogError::EmptyMask(entry.id));
                    }
                    MaskStrategy::Fixed(replacement)
                }
                (None, None) => MaskStrategy::Fixed("[REDACTED]".to_string()),
            };
            patterns.push(RedactionPattern {
                id: entry.id,
                regex,
                category: entry.category,
                mask,
            });
        }
        Self::validated(patterns)
    }

    fn validated(patterns: Vec<RedactionPattern>) -> Result<Self, CatalogError> {
        for (i, p) in patterns.iter().enumerate() {
            if patterns[..i].iter().any(|q| q.id == p.id) {
                return Err(CatalogError::DuplicateId(p.id.clone()));
            }
        }
        Ok(Self { patterns })
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RedactionPattern> {
        self.patterns.iter()
    }

    /// Patterns applied to a fragment with the given label:
    /// Public none, Internal PII, Confidential and Regulated everything.
    pub fn patterns_for(&self, label: Label) -> impl Iterator<Item = &RedactionPattern> {
        self.patterns.iter().filter(move |p| match label {
            Label::Public => false,
            Label::Internal => p.category == PatternCategory::Pii,
            Label::Confidential | Label::Regulated => true,
        })
    }
}

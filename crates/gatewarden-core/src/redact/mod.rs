//! Classification-aware masking of sensitive sub-strings.
//!
//! Pure: no I/O, no clock, no panics. The same text and label always
//! produce the same output, and redacting already-redacted text is a no-op.

mod catalog;

pub use catalog::{
    CatalogError, MaskStrategy, PatternCatalog, PatternCategory, RedactionPattern,
};

use std::collections::BTreeSet;

use serde::Serialize;

use crate::label::Label;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Redaction {
    pub text: String,
    pub patterns_matched: BTreeSet<String>,
    pub changed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Detection {
    pub pattern_id: String,
    pub category: &'static str,
    pub count: usize,
}

#[derive(Debug, Clone)]
pub struct Redactor {
    catalog: PatternCatalog,
}

impl Redactor {
    pub fn new(catalog: PatternCatalog) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &PatternCatalog {
        &self.catalog
    }

    /// Mask every catalog match admitted by the label policy. Patterns run
    /// in catalog order against the progressively rewritten text, so earlier
    /// (more specific) patterns win overlaps.
    pub fn redact(&self, text: &str, label: Label) -> Redaction {
        let mut out = text.to_string();
        let mut patterns_matched = BTreeSet::new();

        for pattern in self.catalog.patterns_for(label) {
            if !pattern.regex.is_match(&out) {
                continue;
            }
            patterns_matched.insert(pattern.id.clone());
            out = pattern
                .regex
                .replace_all(&out, |caps: &regex::Captures<'_>| {
                    apply_mask(&pattern.mask, &caps[0])
                })
                .into_owned();
        }

        let changed = out != text;
        Redaction {
            text: out,
            patterns_matched,
            changed,
        }
    }

    /// Report matches without rewriting. Scans the full catalog regardless
    /// of label; callers decide what the counts mean.
    pub fn detect(&self, text: &str) -> Vec<Detection> {
        self.catalog
            .iter()
            .filter_map(|pattern| {
                let count = pattern.regex.find_iter(text).count();
                (count > 0).then(|| Detection {
                    pattern_id: pattern.id.clone(),
                    category: pattern.category.as_str(),
                    count,
                })
            })
            .collect()
    }
}

fn apply_mask(mask: &MaskStrategy, matched: &str) -> String {
    match mask {
        MaskStrategy::Fixed(replacement) => replacement.clone(),
        MaskStrategy::KeepLast { keep, mask_char } => {
            let chars: Vec<char> = matched.chars().collect();
            if chars.len() <= *keep {
                return matched.to_string();
            }
            let masked = chars.len() - keep;
            let mut out = String::with_capacity(chars.len());
            for _ in 0..masked {
                out.push(*mask_char);
            }
            out.extend(&chars[masked..]);
            out
        }
    }
}

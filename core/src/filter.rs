//! Suppression rules loaded from a JSON filter document.
//!
//! Layout: `{ Platform: { Operation: { Kind: { Field: { Include: [..], Exclude: [..] } } } } }`
//! with `*` accepted at the platform, operation and kind levels. A value is
//! filtered when it matches an `Exclude` pattern and no `Include` pattern.

use std::collections::BTreeMap;
use std::path::Path;

use regex::Regex;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::model::Record;
use crate::platform::platform_name;

const WILDCARD: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Scan,
    Monitor,
}

impl Operation {
    pub const fn as_str(self) -> &'static str {
        match self {
            Operation::Scan => "Scan",
            Operation::Monitor => "Monitor",
        }
    }
}

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("reading filter file: {0}")]
    Io(#[from] std::io::Error),
    #[error("parsing filter document: {0}")]
    Json(#[from] serde_json::Error),
    #[error("bad pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

#[derive(Debug, Default, Deserialize)]
struct FieldRules {
    #[serde(rename = "Include", default)]
    include: Vec<String>,
    #[serde(rename = "Exclude", default)]
    exclude: Vec<String>,
}

type Document = BTreeMap<String, BTreeMap<String, BTreeMap<String, BTreeMap<String, FieldRules>>>>;

#[derive(Debug)]
struct Rule {
    platform: String,
    operation: String,
    kind: String,
    field: String,
    include: Vec<Regex>,
    exclude: Vec<Regex>,
}

impl Rule {
    fn applies(&self, platform: &str, op: Operation, kind: &str, field: &str) -> bool {
        scope_matches(&self.platform, platform)
            && scope_matches(&self.operation, op.as_str())
            && scope_matches(&self.kind, kind)
            && self.field == field
    }
}

fn scope_matches(rule: &str, actual: &str) -> bool {
    rule == WILDCARD || rule == actual
}

/// Compiled filter. The default value filters nothing.
#[derive(Debug, Default)]
pub struct Filter {
    rules: Vec<Rule>,
}

impl Filter {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Loads a filter document. A missing file yields an empty filter.
    pub fn load(path: &Path) -> Result<Self, FilterError> {
        if !path.exists() {
            debug!(path = %path.display(), "filter file not found, filtering nothing");
            return Ok(Self::empty());
        }
        let text = std::fs::read_to_string(path)?;
        let filter = Self::from_json(&text)?;
        debug!(path = %path.display(), rules = filter.rules.len(), "loaded filter");
        Ok(filter)
    }

    pub fn from_json(text: &str) -> Result<Self, FilterError> {
        let doc: Document = serde_json::from_str(text)?;
        let mut rules = Vec::new();
        for (platform, ops) in doc {
            for (operation, kinds) in ops {
                for (kind, fields) in kinds {
                    for (field, spec) in fields {
                        rules.push(Rule {
                            platform: platform.clone(),
                            operation: operation.clone(),
                            kind: kind.clone(),
                            field,
                            include: compile_all(&spec.include)?,
                            exclude: compile_all(&spec.exclude)?,
                        });
                    }
                }
            }
        }
        Ok(Self { rules })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn is_filtered(
        &self,
        platform: &str,
        op: Operation,
        kind: &str,
        field: &str,
        value: &str,
    ) -> bool {
        let mut excluded = false;
        for rule in self.rules.iter().filter(|r| r.applies(platform, op, kind, field)) {
            if rule.include.iter().any(|re| re.is_match(value)) {
                return false;
            }
            excluded |= rule.exclude.iter().any(|re| re.is_match(value));
        }
        excluded
    }

    /// True if any filterable field of `record` is filtered on this platform.
    pub fn is_filtered_record(&self, op: Operation, record: &Record) -> bool {
        if self.is_empty() {
            return false;
        }
        let kind = record.kind().filter_name();
        record
            .filter_fields()
            .iter()
            .any(|(field, value)| self.is_filtered(platform_name(), op, kind, field, value))
    }
}

fn compile_all(patterns: &[String]) -> Result<Vec<Regex>, FilterError> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(p).map_err(|source| FilterError::Pattern { pattern: p.clone(), source })
        })
        .collect()
}

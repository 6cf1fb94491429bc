//! Prompt templates and the template engine.
//!
//! Templates carry `${variable}` placeholders that are substituted from an
//! [`AnalysisContext`](crate::types::AnalysisContext)-derived variable map.
//! Substitution is deliberately permissive: an unresolved placeholder is
//! left verbatim in the output, never dropped and never an error, so callers
//! can detect incomplete interpolation by scanning the result for `${`.
//!
//! Resolution order per category: stored default template first, then any
//! active stored template (highest version wins), then the compiled-in
//! default text.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::PromptStore;

lazy_static! {
    /// Matches a `${identifier}` placeholder.
    static ref PLACEHOLDER: Regex = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap();
}

/// Template category. `Fundamental` and `Technical` are first-class; any
/// other tag round-trips through `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PromptCategory {
    Fundamental,
    Technical,
    Other(String),
}

impl PromptCategory {
    /// The general-purpose category used when a caller does not choose one.
    pub fn general() -> Self {
        PromptCategory::Other("general".to_string())
    }

    pub fn as_str(&self) -> &str {
        match self {
            PromptCategory::Fundamental => "fundamental",
            PromptCategory::Technical => "technical",
            PromptCategory::Other(tag) => tag,
        }
    }
}

impl From<String> for PromptCategory {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "fundamental" => PromptCategory::Fundamental,
            "technical" => PromptCategory::Technical,
            _ => PromptCategory::Other(tag),
        }
    }
}

impl From<PromptCategory> for String {
    fn from(category: PromptCategory) -> Self {
        category.as_str().to_string()
    }
}

impl fmt::Display for PromptCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted prompt template version.
///
/// Versions are immutable: creating a "new version" of a name always appends
/// `max(existing) + 1` and never mutates an existing row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptTemplate {
    /// Store-assigned identifier.
    pub id: u64,

    /// Template name; versions share a name.
    pub name: String,

    /// Optional description for the admin surface.
    pub description: Option<String>,

    /// Category this template serves.
    pub category: PromptCategory,

    /// Body text with `${variable}` placeholders.
    pub body: String,

    /// Monotonically increasing per name, starting at 1.
    pub version: u32,

    /// Whether this version may be resolved.
    pub is_active: bool,

    /// Whether this version is the category default.
    pub is_default: bool,

    /// How many times this version has been resolved.
    pub usage_count: u64,

    /// Last successful resolution.
    pub last_used_at: Option<DateTime<Utc>>,

    /// Row creation time.
    pub created_at: DateTime<Utc>,
}

/// Fields for creating a brand-new template (version 1).
#[derive(Debug, Clone)]
pub struct NewPromptTemplate {
    pub name: String,
    pub description: Option<String>,
    pub category: PromptCategory,
    pub body: String,
    pub is_active: bool,
    pub is_default: bool,
}

/// Errors from named template resolution.
///
/// Category resolution never fails (it falls back to compiled-in text);
/// resolution by name fails when no active version of that name exists.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PromptError {
    #[error("no active template named '{0}'")]
    UnknownTemplate(String),
}

/// Substitute `${name}` placeholders from `variables`.
///
/// Every occurrence whose name is present in `variables` is replaced with
/// the value as-is. Placeholders with no matching variable are left verbatim
/// so incomplete interpolation stays detectable downstream.
pub fn render(template: &str, variables: &BTreeMap<String, String>) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &regex::Captures<'_>| {
            let name = &caps[1];
            match variables.get(name) {
                Some(value) => value.clone(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Names of placeholders left unresolved in rendered output.
pub fn unresolved_placeholders(text: &str) -> Vec<String> {
    PLACEHOLDER
        .captures_iter(text)
        .map(|caps| caps[1].to_string())
        .collect()
}

/// Compiled-in fallback for the fundamental category.
pub const FUNDAMENTAL_ANALYSIS_PROMPT: &str = r#"You are a professional equity research analyst. Produce a fundamental
analysis report for ${name} (${code}).

Stock context:
- Code: ${code}
- Name: ${name}
- Market: ${market}
- Industry: ${industry}
- Exchange: ${exchange}
- Analysis date: ${analysis_date}

Cover, with concrete figures where possible:

## 1. Business model and competitive position
## 2. Financial health and profitability
## 3. Growth outlook and catalysts
## 4. Valuation (DCF and relative multiples)
## 5. Key risks
## 6. Investment thesis and recommendation

Structure the report with clear headings and keep claims grounded in the
stated context."#;

/// Compiled-in fallback for the technical category.
pub const TECHNICAL_ANALYSIS_PROMPT: &str = r#"You are a professional technical analyst. Produce a technical analysis
report for ${name} (${code}) as of ${analysis_date}.

Stock context:
- Code: ${code}
- Market: ${market}
- Exchange: ${exchange}

Cover:

## 1. Trend structure (short, medium, long horizon)
## 2. Support and resistance levels
## 3. Momentum and volume indicators
## 4. Chart patterns worth monitoring
## 5. Entry/exit scenarios with invalidation levels
## 6. Risk notes

Be explicit about the timeframe each observation applies to."#;

/// Compiled-in fallback for every other category.
pub const GENERAL_ANALYSIS_PROMPT: &str = r#"You are a professional investment analyst. Produce a full analysis report
for ${name} (${code}).

Stock context:
- Code: ${code}
- Name: ${name}
- Market: ${market}
- Industry: ${industry}
- Exchange: ${exchange}
- Analysis date: ${analysis_date}

Cover the following sections:

## 1. Technical picture
## 2. Fundamentals
## 3. Investment recommendation (buy/hold/sell with target range)
## 4. Market outlook

Provide a detailed, professional report with clear reasoning for each
conclusion and an explicit risk disclaimer."#;

/// Compiled-in default body for a category.
pub fn builtin_prompt(category: &PromptCategory) -> &'static str {
    match category {
        PromptCategory::Fundamental => FUNDAMENTAL_ANALYSIS_PROMPT,
        PromptCategory::Technical => TECHNICAL_ANALYSIS_PROMPT,
        PromptCategory::Other(_) => GENERAL_ANALYSIS_PROMPT,
    }
}

/// Resolves prompt templates against a store, with compiled-in fallbacks.
///
/// Resolving a *persisted* template has one side effect: its usage counter
/// and last-used timestamp are bumped (a single store write, not retried).
/// Resolving a compiled-in fallback writes nothing.
pub struct PromptEngine {
    store: Arc<dyn PromptStore>,
}

impl PromptEngine {
    pub fn new(store: Arc<dyn PromptStore>) -> Self {
        Self { store }
    }

    /// Resolve the best template for `category` and render it.
    ///
    /// Selection: the category default if one exists, else the active
    /// template with the highest version, else the compiled-in text.
    pub fn resolve(&self, category: &PromptCategory, variables: &BTreeMap<String, String>) -> String {
        let stored = self.store.get_default(category).or_else(|| {
            self.store
                .get_active_by_category(category)
                .into_iter()
                .next()
        });

        match stored {
            Some(template) => {
                self.touch(&template);
                render(&template.body, variables)
            }
            None => {
                tracing::debug!(category = %category, "no stored template, using builtin");
                render(builtin_prompt(category), variables)
            }
        }
    }

    /// Resolve a template by name and render it.
    ///
    /// Among active versions of `name`, a default-flagged version wins;
    /// otherwise the highest version is used.
    pub fn resolve_by_name(
        &self,
        name: &str,
        variables: &BTreeMap<String, String>,
    ) -> Result<String, PromptError> {
        let mut versions: Vec<_> = self
            .store
            .get_by_name(name)
            .into_iter()
            .filter(|t| t.is_active)
            .collect();
        versions.sort_by(|a, b| {
            b.is_default
                .cmp(&a.is_default)
                .then(b.version.cmp(&a.version))
        });

        let template = versions
            .into_iter()
            .next()
            .ok_or_else(|| PromptError::UnknownTemplate(name.to_string()))?;

        self.touch(&template);
        Ok(render(&template.body, variables))
    }

    fn touch(&self, template: &PromptTemplate) {
        if let Err(err) = self.store.increment_usage(template.id) {
            // Usage bookkeeping is best-effort; the rendered text is still valid.
            tracing::warn!(
                template = %template.name,
                version = template.version,
                error = %err,
                "failed to record template usage"
            );
        }
    }
}

use crate::errors::LinebarsError;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const DEFAULT_TOTAL_PATTERN: &str = r"^processing total of (?P<value>\d+) items$";
pub const DEFAULT_COUNT_PATTERN: &str = r"^processed .*$";
pub const DEFAULT_ALIAS_PATTERN: &str = r"^worker is (?P<value>.*)$";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternCategory {
    Alias,
    Total,
    Count,
}

impl PatternCategory {
    /// Order in which a payload is tested against the table.
    pub const PRIORITY: [PatternCategory; 3] = [Self::Alias, Self::Total, Self::Count];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Alias => "alias",
            Self::Total => "total",
            Self::Count => "count",
        }
    }

    fn capture(self) -> CaptureKind {
        match self {
            Self::Alias => CaptureKind::Text,
            Self::Total => CaptureKind::Integer,
            Self::Count => CaptureKind::Presence,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureKind {
    Text,
    Integer,
    Presence,
}

/// Uncompiled pattern sources, as they appear in config files.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PatternSpec {
    pub total: String,
    pub count: String,
    pub alias: String,
}

impl Default for PatternSpec {
    fn default() -> Self {
        Self {
            total: DEFAULT_TOTAL_PATTERN.to_string(),
            count: DEFAULT_COUNT_PATTERN.to_string(),
            alias: DEFAULT_ALIAS_PATTERN.to_string(),
        }
    }
}

impl PatternSpec {
    fn source(&self, category: PatternCategory) -> &str {
        match category {
            PatternCategory::Alias => &self.alias,
            PatternCategory::Total => &self.total,
            PatternCategory::Count => &self.count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capture {
    Alias(String),
    Total(u64),
    Count,
}

#[derive(Debug, Clone)]
struct CompiledPattern {
    category: PatternCategory,
    regex: Regex,
}

/// Validated, immutable pattern set shared by every tracker of a session.
#[derive(Debug, Clone)]
pub struct PatternTable {
    patterns: Vec<CompiledPattern>,
}

impl PatternTable {
    pub fn compile(spec: &PatternSpec) -> Result<Self, LinebarsError> {
        let patterns = PatternCategory::PRIORITY
            .iter()
            .map(|category| compile_one(*category, spec.source(*category)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// Compiled categories in the order they are tried.
    pub fn categories(&self) -> impl Iterator<Item = PatternCategory> + '_ {
        self.patterns.iter().map(|pattern| pattern.category)
    }

    /// Every category that matches `payload`, in priority order.
    pub fn captures(&self, payload: &str) -> Vec<Capture> {
        self.patterns
            .iter()
            .filter_map(|pattern| pattern.extract(payload))
            .collect()
    }
}

impl Default for PatternTable {
    fn default() -> Self {
        Self::compile(&PatternSpec::default()).expect("default patterns compile")
    }
}

impl CompiledPattern {
    fn extract(&self, payload: &str) -> Option<Capture> {
        let caps = self.regex.captures(payload)?;
        match self.category.capture() {
            CaptureKind::Presence => Some(Capture::Count),
            CaptureKind::Text => {
                let value = caps.get(1)?.as_str().to_string();
                Some(Capture::Alias(value))
            }
            // `\d+` can still overflow u64; treat that as no match rather than an error.
            CaptureKind::Integer => caps.get(1)?.as_str().parse().ok().map(Capture::Total),
        }
    }
}

fn compile_one(category: PatternCategory, source: &str) -> Result<CompiledPattern, LinebarsError> {
    let regex = Regex::new(source).map_err(|e| {
        LinebarsError::Configuration(format!(
            "patterns.{} is not a valid regex: {e}",
            category.as_str()
        ))
    })?;
    let groups = regex.captures_len().saturating_sub(1);
    let expected_ok = match category.capture() {
        CaptureKind::Presence => groups <= 1,
        CaptureKind::Text | CaptureKind::Integer => groups == 1,
    };
    if !expected_ok {
        return Err(LinebarsError::Configuration(format!(
            "patterns.{} must have exactly one capture group, found {groups}",
            category.as_str()
        )));
    }
    Ok(CompiledPattern { category, regex })
}

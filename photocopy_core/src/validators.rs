use chrono::{DateTime, Utc};
use glob::{MatchOptions, Pattern};
use photocopy_common::{OrganizeConfig, PhotoCopyError, Result, SourceFile};
use std::path::Path;

/// Outcome of running one validator against a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    Pass,
    Fail { name: &'static str, reason: String },
}

impl Validation {
    pub fn is_pass(&self) -> bool {
        matches!(self, Validation::Pass)
    }
}

/// A predicate applied to a candidate file during planning. `relative` is
/// the file's path relative to the source root.
pub trait Validator: Send + Sync {
    fn name(&self) -> &'static str;
    fn validate(&self, file: &SourceFile, relative: &Path) -> Validation;
}

/// Fails files whose resolved timestamp is before the minimum (inclusive
/// comparison: a timestamp equal to the bound passes).
pub struct MinDateValidator {
    min: DateTime<Utc>,
}

impl MinDateValidator {
    pub fn new(min: DateTime<Utc>) -> Self {
        Self { min }
    }
}

impl Validator for MinDateValidator {
    fn name(&self) -> &'static str {
        "MinDate"
    }

    fn validate(&self, file: &SourceFile, _relative: &Path) -> Validation {
        let timestamp = file.timestamp();
        if timestamp < self.min {
            Validation::Fail {
                name: self.name(),
                reason: format!("timestamp {} is before {}", timestamp, self.min),
            }
        } else {
            Validation::Pass
        }
    }
}

/// Fails files whose resolved timestamp is after the maximum (inclusive).
pub struct MaxDateValidator {
    max: DateTime<Utc>,
}

impl MaxDateValidator {
    pub fn new(max: DateTime<Utc>) -> Self {
        Self { max }
    }
}

impl Validator for MaxDateValidator {
    fn name(&self) -> &'static str {
        "MaxDate"
    }

    fn validate(&self, file: &SourceFile, _relative: &Path) -> Validation {
        let timestamp = file.timestamp();
        if timestamp > self.max {
            Validation::Fail {
                name: self.name(),
                reason: format!("timestamp {} is after {}", timestamp, self.max),
            }
        } else {
            Validation::Pass
        }
    }
}

/// Fails files whose source-relative path matches any of the configured
/// globs. Matching is case-insensitive; `*`, `**` and `?` are supported.
pub struct ExcludePatternValidator {
    patterns: Vec<Pattern>,
}

impl ExcludePatternValidator {
    pub fn new(patterns: &[String]) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| {
                Pattern::new(p).map_err(|e| {
                    PhotoCopyError::Config(format!("invalid exclude pattern '{}': {}", p, e))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    fn match_options() -> MatchOptions {
        MatchOptions {
            case_sensitive: false,
            require_literal_separator: false,
            require_literal_leading_dot: false,
        }
    }
}

impl Validator for ExcludePatternValidator {
    fn name(&self) -> &'static str {
        "ExcludePattern"
    }

    fn validate(&self, _file: &SourceFile, relative: &Path) -> Validation {
        let options = Self::match_options();
        for pattern in &self.patterns {
            if pattern.matches_path_with(relative, options) {
                return Validation::Fail {
                    name: self.name(),
                    reason: format!(
                        "path {} matches exclude pattern '{}'",
                        relative.display(),
                        pattern.as_str()
                    ),
                };
            }
        }
        Validation::Pass
    }
}

/// An ordered set of validators with two evaluation modes: short-circuit at
/// the first failure (used during planning) or collect every failure (used
/// by diagnostic tooling).
#[derive(Default)]
pub struct ValidatorChain {
    validators: Vec<Box<dyn Validator>>,
}

impl ValidatorChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the chain a config asks for: date bounds, then exclusions.
    pub fn from_config(config: &OrganizeConfig) -> Result<Self> {
        let mut chain = Self::new();
        if let Some(min) = config.min_date {
            chain.push(Box::new(MinDateValidator::new(min)));
        }
        if let Some(max) = config.max_date {
            chain.push(Box::new(MaxDateValidator::new(max)));
        }
        if !config.exclude_patterns.is_empty() {
            chain.push(Box::new(ExcludePatternValidator::new(
                &config.exclude_patterns,
            )?));
        }
        Ok(chain)
    }

    pub fn push(&mut self, validator: Box<dyn Validator>) {
        self.validators.push(validator);
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    /// Evaluate in declared order, stopping at the first failure.
    pub fn check_first_failure(&self, file: &SourceFile, relative: &Path) -> Validation {
        for validator in &self.validators {
            let result = validator.validate(file, relative);
            if !result.is_pass() {
                return result;
            }
        }
        Validation::Pass
    }

    /// Evaluate every validator and collect all failures.
    pub fn check_all(&self, file: &SourceFile, relative: &Path) -> Vec<Validation> {
        self.validators
            .iter()
            .map(|v| v.validate(file, relative))
            .filter(|r| !r.is_pass())
            .collect()
    }
}

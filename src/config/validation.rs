//! Constraint checks for configuration documents.
//!
//! A document type implements [`Validate`] by declaring field-level [`Constraint`]s and,
//! optionally, a type-specific [`Validate::validate_extra`] hook. Both feed into one
//! [`ValidationResult`]; validation never fails with an error value.

use std::fmt;
use std::ops::RangeInclusive;

/// Outcome of validating one document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationResult {
    /// Problems that make the document unusable
    pub errors: Vec<String>,
    /// Suspicious but tolerated values
    pub warnings: Vec<String>,
}

impl ValidationResult {
    /// Empty (valid) result.
    pub fn new() -> Self {
        Self::default()
    }

    /// True when no errors were recorded.
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Records an error.
    pub fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    /// Records a warning.
    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    /// Appends everything from `other`.
    pub fn merge(&mut self, other: ValidationResult) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }
}

impl fmt::Display for ValidationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for e in &self.errors {
            writeln!(f, "error: {e}")?;
        }
        for w in &self.warnings {
            writeln!(f, "warning: {w}")?;
        }
        Ok(())
    }
}

/// A declarative rule on one field.
#[derive(Debug, Clone)]
pub enum Constraint {
    /// Optional field must be present.
    Required {
        /// Field name
        field: &'static str,
        /// Whether a value is set
        present: bool,
    },
    /// Numeric field must lie in an inclusive range.
    Range {
        /// Field name
        field: &'static str,
        /// Actual value
        value: f64,
        /// Allowed range
        range: RangeInclusive<f64>,
    },
    /// String field must be one of the listed values (case-insensitive).
    OneOf {
        /// Field name
        field: &'static str,
        /// Actual value
        value: String,
        /// Allowed values
        allowed: &'static [&'static str],
    },
    /// String field must not be empty or whitespace.
    NotEmpty {
        /// Field name
        field: &'static str,
        /// Actual value
        value: String,
    },
}

impl Constraint {
    /// Checks the rule, returning the error message when it is violated.
    pub fn check(&self) -> Result<(), String> {
        match self {
            Constraint::Required { field, present } => {
                if *present {
                    Ok(())
                } else {
                    Err(format!("{field} is required"))
                }
            }
            Constraint::Range { field, value, range } => is_in_range(*value, range.clone())
                .map_err(|e| {
                    format!(
                        "{field}: {e} ({value} not in {}..={})",
                        range.start(),
                        range.end()
                    )
                }),
            Constraint::OneOf {
                field,
                value,
                allowed,
            } => {
                if allowed.iter().any(|a| a.eq_ignore_ascii_case(value)) {
                    Ok(())
                } else {
                    Err(format!(
                        "{field}: '{value}' must be one of: {}",
                        allowed.join(", ")
                    ))
                }
            }
            Constraint::NotEmpty { field, value } => {
                is_not_empty(value.trim()).map_err(|e| format!("{field}: {e}"))
            }
        }
    }
}

/// Implemented by documents that carry validation rules.
pub trait Validate {
    /// Field-level rules.
    fn constraints(&self) -> Vec<Constraint>;

    /// Type-specific checks that do not fit a single-field rule.
    fn validate_extra(&self, _result: &mut ValidationResult) {}

    /// Runs every constraint, then the extra hook.
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::new();
        for constraint in self.constraints() {
            if let Err(message) = constraint.check() {
                result.error(message);
            }
        }
        self.validate_extra(&mut result);
        result
    }
}

/// Validates that `value` lies within `range`.
pub fn is_in_range<T: PartialOrd>(value: T, range: RangeInclusive<T>) -> Result<(), &'static str> {
    if range.contains(&value) {
        Ok(())
    } else {
        Err("Value is outside the specified range")
    }
}

/// Validates that `value` is not empty.
pub fn is_not_empty(value: &str) -> Result<(), &'static str> {
    if !value.is_empty() {
        Ok(())
    } else {
        Err("Value cannot be empty")
    }
}

/// Validates that `port` is usable (non-zero).
pub fn is_valid_port(port: u16) -> Result<(), &'static str> {
    if port > 0 {
        Ok(())
    } else {
        Err("Port number must be greater than 0")
    }
}

/// Validates that `path` is a plausible file path.
pub fn is_valid_path(path: &str) -> Result<(), &'static str> {
    if path.is_empty() {
        return Err("File path cannot be empty");
    }
    if path.contains('\0') {
        return Err("File path cannot contain null bytes");
    }
    Ok(())
}

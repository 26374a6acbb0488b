//! Diagnostics
//!
//! Collects errors found while validating a template so a single pass can
//! report every problem instead of stopping at the first one. In immediate
//! mode the first reported error is handed straight back to the caller.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, ToscaError};

// =============================================================================
// Mode
// =============================================================================

/// How reported errors are handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Store every error and keep going
    #[default]
    Collect,
    /// Return the first error to the caller
    Immediate,
}

// =============================================================================
// Diagnostic Item
// =============================================================================

/// A single collected error
#[derive(Debug, Clone, PartialEq)]
pub struct DiagnosticItem {
    pub error: ToscaError,
    /// Additional context (e.g., suggestions)
    pub context: Vec<String>,
}

impl DiagnosticItem {
    pub fn new(error: ToscaError) -> Self {
        Self { error, context: Vec::new() }
    }

    pub fn with_context(mut self, ctx: impl Into<String>) -> Self {
        self.context.push(ctx.into());
        self
    }

    pub fn code(&self) -> &'static str {
        self.error.code()
    }
}

impl fmt::Display for DiagnosticItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.error.code(), self.error.kind(), self.error)?;

        for ctx in &self.context {
            write!(f, "\n  - {}", ctx)?;
        }

        Ok(())
    }
}

/// Serializable form of a diagnostic, used for JSON reports
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticRecord {
    pub code: &'static str,
    pub kind: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub context: Vec<String>,
}

impl From<&DiagnosticItem> for DiagnosticRecord {
    fn from(item: &DiagnosticItem) -> Self {
        Self {
            code: item.error.code(),
            kind: item.error.kind(),
            message: item.error.to_string(),
            context: item.context.clone(),
        }
    }
}

// =============================================================================
// Diagnostics Collection
// =============================================================================

/// Error accumulator threaded through every validation call
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    mode: Mode,
    items: Vec<DiagnosticItem>,
}

impl Diagnostics {
    pub fn new(mode: Mode) -> Self {
        Self { mode, items: Vec::new() }
    }

    pub fn collecting() -> Self {
        Self::new(Mode::Collect)
    }

    pub fn immediate() -> Self {
        Self::new(Mode::Immediate)
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Report an error.
    ///
    /// Collect mode stores it and returns `Ok(())`; immediate mode returns it.
    pub fn report(&mut self, error: ToscaError) -> Result<()> {
        self.push(DiagnosticItem::new(error))
    }

    /// Report an error with extra context lines
    pub fn push(&mut self, item: DiagnosticItem) -> Result<()> {
        match self.mode {
            Mode::Collect => {
                tracing::debug!(code = item.code(), "{}", item.error);
                self.items.push(item);
                Ok(())
            }
            Mode::Immediate => Err(item.error),
        }
    }

    /// Report the error of a failed result, passing successes through
    pub fn check<T>(&mut self, result: Result<T>) -> Result<Option<T>> {
        match result {
            Ok(v) => Ok(Some(v)),
            Err(e) => self.report(e).map(|_| None),
        }
    }

    /// Check if there are any errors
    pub fn has_errors(&self) -> bool {
        !self.items.is_empty()
    }

    pub fn error_count(&self) -> usize {
        self.items.len()
    }

    /// Get all items
    pub fn all(&self) -> &[DiagnosticItem] {
        &self.items
    }

    pub fn iter(&self) -> impl Iterator<Item = &DiagnosticItem> {
        self.items.iter()
    }

    /// Errors of one kind, e.g. `"UnknownField"`
    pub fn of_kind<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a DiagnosticItem> + 'a {
        self.items.iter().filter(move |i| i.error.kind() == kind)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Merge another Diagnostics into this one
    pub fn merge(&mut self, other: Diagnostics) {
        self.items.extend(other.items);
    }

    pub fn records(&self) -> Vec<DiagnosticRecord> {
        self.items.iter().map(DiagnosticRecord::from).collect()
    }

    /// Format all diagnostics for display
    pub fn format_all(&self) -> String {
        let mut output = String::new();

        for item in &self.items {
            output.push_str(&format!("{}\n", item));
        }

        if self.has_errors() {
            output.push_str(&format!("\n{} error(s)\n", self.error_count()));
        }

        output
    }

    /// Collapse collected errors into a single result
    pub fn into_result(self) -> Result<()> {
        match self.items.len() {
            0 => Ok(()),
            1 => Err(self.items.into_iter().next().map(|i| i.error).unwrap_or_else(|| {
                ToscaError::Validation("Unknown validation failure.".to_string())
            })),
            n => {
                let lines: Vec<String> = self.items.iter().map(|i| format!("\t{}", i.error)).collect();
                Err(ToscaError::Validation(format!(
                    "The input template failed validation with {} error(s):\n{}",
                    n,
                    lines.join("\n")
                )))
            }
        }
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_all())
    }
}

impl IntoIterator for Diagnostics {
    type Item = DiagnosticItem;
    type IntoIter = std::vec::IntoIter<DiagnosticItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a> IntoIterator for &'a Diagnostics {
    type Item = &'a DiagnosticItem;
    type IntoIter = std::slice::Iter<'a, DiagnosticItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

//! JSON report generation.
//!
//! Reports can be written as compact single-line JSON or pretty-printed.
//!
//! # Example
//!
//! ```rust
//! use octopus_report::{ClassReport, json::JsonGenerator};
//!
//! let report = ClassReport::builder().teacher_name("Ms. Rivera").build().unwrap();
//! let generator = JsonGenerator::new(&report);
//!
//! let compact = generator.generate().unwrap();
//! assert!(!compact.contains('\n'));
//! ```

use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::{ClassReport, ReportError, Result};

/// Serializes a [`ClassReport`] to JSON.
pub struct JsonGenerator<'a> {
    report: &'a ClassReport,
}

impl<'a> JsonGenerator<'a> {
    /// Creates a new JSON generator for the given report.
    #[must_use]
    pub const fn new(report: &'a ClassReport) -> Self {
        Self { report }
    }

    /// Generates compact JSON output.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError::Serialization`] if JSON serialization fails.
    pub fn generate(&self) -> Result<String> {
        serde_json::to_string(self.report).map_err(ReportError::from)
    }

    /// Generates pretty-printed JSON output.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError::Serialization`] if JSON serialization fails.
    pub fn generate_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self.report).map_err(ReportError::from)
    }

    /// Writes the report to `path`, creating or overwriting it.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError::Serialization`] if JSON serialization fails.
    /// Returns [`ReportError::Io`] if file creation or writing fails.
    pub fn write_to_file(&self, path: &Path, pretty: bool) -> Result<()> {
        let json = if pretty {
            self.generate_pretty()?
        } else {
            self.generate()?
        };

        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;

        Ok(())
    }
}

//! Input validation helpers.
//!
//! Validation failures are collected into a list and reported together
//! rather than short-circuiting on the first bad field.

use crate::utils::{AppError, AppResult};

/// Entity names: vendors, titles, campaign names, etc.
pub const MAX_NAME_LEN: usize = 200;

/// Notes, descriptions, reasons.
pub const MAX_NOTE_LEN: usize = 2000;

/// Short identifiers: IPNs, MPNs, serial numbers, locations.
pub const MAX_SHORT_TEXT_LEN: usize = 100;

/// Passwords (before hashing).
pub const MAX_PASSWORD_LEN: usize = 128;
pub const MIN_PASSWORD_LEN: usize = 8;

/// Collects field errors, turning into one `invalid_input` error at the end.
#[derive(Debug, Default)]
pub struct Validator {
    errors: Vec<String>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn require_text(&mut self, value: &str, field: &str, max_len: usize) -> &mut Self {
        if value.trim().is_empty() {
            self.errors.push(format!("{field} must not be empty"));
        } else if value.len() > max_len {
            self.errors
                .push(format!("{field} is too long ({} chars, max {max_len})", value.len()));
        }
        self
    }

    pub fn optional_text(&mut self, value: Option<&str>, field: &str, max_len: usize) -> &mut Self {
        if let Some(v) = value
            && v.len() > max_len
        {
            self.errors
                .push(format!("{field} is too long ({} chars, max {max_len})", v.len()));
        }
        self
    }

    pub fn positive(&mut self, value: i64, field: &str) -> &mut Self {
        if value <= 0 {
            self.errors.push(format!("{field} must be positive"));
        }
        self
    }

    pub fn non_negative(&mut self, value: i64, field: &str) -> &mut Self {
        if value < 0 {
            self.errors.push(format!("{field} must not be negative"));
        }
        self
    }

    pub fn non_negative_f64(&mut self, value: f64, field: &str) -> &mut Self {
        if !value.is_finite() || value < 0.0 {
            self.errors.push(format!("{field} must be a non-negative number"));
        }
        self
    }

    pub fn one_of(&mut self, value: &str, allowed: &[&str], field: &str) -> &mut Self {
        if !allowed.contains(&value) {
            self.errors
                .push(format!("{field} must be one of: {}", allowed.join(", ")));
        }
        self
    }

    pub fn push(&mut self, message: impl Into<String>) -> &mut Self {
        self.errors.push(message.into());
        self
    }

    pub fn finish(&mut self) -> AppResult<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(AppError::validation_all(std::mem::take(&mut self.errors)))
        }
    }
}

/// Strip path components and unsafe characters from an uploaded filename.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or("file");
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '-' | '_' | ' ') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_matches([' ', '.']).to_string();
    if trimmed.is_empty() {
        "file".to_string()
    } else {
        trimmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validator_accumulates_errors() {
        let mut v = Validator::new();
        v.require_text("", "name", MAX_NAME_LEN)
            .positive(0, "qty")
            .one_of("bogus", &["draft", "sent"], "status");
        let err = v.finish().unwrap_err();
        assert!(err.message.contains("name must not be empty"));
        assert!(err.message.contains("qty must be positive"));
        assert!(err.message.contains("status must be one of"));
    }

    #[test]
    fn validator_passes_clean_input() {
        let mut v = Validator::new();
        v.require_text("RES-001", "ipn", MAX_SHORT_TEXT_LEN).positive(5, "qty");
        assert!(v.finish().is_ok());
    }

    #[test]
    fn sanitize_strips_traversal() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("..\\..\\boot.ini"), "boot.ini");
        assert_eq!(sanitize_filename("data sheet (rev2).pdf"), "data sheet _rev2_.pdf");
        assert_eq!(sanitize_filename(""), "file");
        assert_eq!(sanitize_filename("..."), "file");
    }
}

//! src/utils.rs
//! Shared utility functions used across the codebase

use std::fmt::Display;
use std::path::Path;

/// Extension trait for Result to simplify error conversion to String.
///
/// Eliminates verbose `.map_err(|e| e.to_string())?` patterns; use
/// `.str_err()?` instead.
pub trait ResultExt<T, E> {
    /// Convert the error type to String.
    fn str_err(self) -> Result<T, String>;
}

impl<T, E: Display> ResultExt<T, E> for Result<T, E> {
    fn str_err(self) -> Result<T, String> {
        self.map_err(|e| e.to_string())
    }
}

/// Convert a path to a String, lossy on non-UTF-8 segments.
pub fn path_to_string(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

/// Truncate a string to max length with ellipsis.
///
/// If the string is longer than `max_len`, it will be truncated at a char
/// boundary at or below `max_len` and "..." appended.
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        let mut end = max_len;
        while end > 0 && !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &s[..end])
    }
}

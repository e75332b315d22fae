// src/config/ignore.rs
// Centralized directory ignore lists

/// Common directories to skip across all languages
pub const COMMON_SKIP: &[&str] = &[
    "node_modules",
    "target",
    ".git",
    "pkg",
    "dist",
    "build",
    "vendor",
    "__pycache__",
    ".next",
    "out",
    ".venv",
    "venv",
    "coverage",
];

/// Check if a directory name should be skipped
pub fn should_skip(name: &str) -> bool {
    name.starts_with('.') || COMMON_SKIP.contains(&name)
}

/// Load additional ignore patterns from a .quarryignore file in the given
/// directory. Returns a vector of pattern strings (directory names).
pub fn load_project_ignore_patterns(root: &std::path::Path) -> Vec<String> {
    use std::fs;
    use std::io::{self, BufRead};

    let ignore_file = root.join(".quarryignore");
    if !ignore_file.exists() {
        return Vec::new();
    }

    match fs::File::open(&ignore_file) {
        Ok(file) => {
            let reader = io::BufReader::new(file);
            let mut patterns = Vec::new();
            for line in reader.lines() {
                match line {
                    Ok(line) => {
                        let line = line.trim();
                        // Skip empty lines and comments
                        if line.is_empty() || line.starts_with('#') {
                            continue;
                        }
                        patterns.push(line.to_string());
                    }
                    Err(_) => break,
                }
            }
            patterns
        }
        Err(_) => Vec::new(),
    }
}

/// Check if a directory should be skipped with additional patterns.
pub fn should_skip_with_patterns(name: &str, extra_patterns: &[String]) -> bool {
    should_skip(name) || extra_patterns.iter().any(|p| p == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_should_skip_common_dirs() {
        assert!(should_skip("node_modules"));
        assert!(should_skip("target"));
        assert!(should_skip(".git"));
        assert!(should_skip("dist"));
        assert!(should_skip("__pycache__"));
    }

    #[test]
    fn test_should_skip_hidden_dirs() {
        assert!(should_skip(".hidden"));
        assert!(should_skip(".cache"));
    }

    #[test]
    fn test_should_not_skip_source_dirs() {
        assert!(!should_skip("src"));
        assert!(!should_skip("lib"));
        assert!(!should_skip("crates"));
    }

    #[test]
    fn test_load_project_ignore_patterns() {
        let temp_dir = TempDir::new().unwrap();
        let ignore_content = "\n# comment\ngenerated\n\nthird_party\n";
        fs::write(temp_dir.path().join(".quarryignore"), ignore_content).unwrap();
        let patterns = load_project_ignore_patterns(temp_dir.path());
        assert_eq!(patterns, vec!["generated", "third_party"]);
    }

    #[test]
    fn test_load_project_ignore_patterns_no_file() {
        let temp_dir = TempDir::new().unwrap();
        let patterns = load_project_ignore_patterns(temp_dir.path());
        assert!(patterns.is_empty());
    }

    #[test]
    fn test_should_skip_with_patterns() {
        let extra = vec!["generated".to_string()];
        assert!(should_skip_with_patterns("generated", &extra));
        assert!(should_skip_with_patterns("node_modules", &extra));
        assert!(!should_skip_with_patterns("src", &extra));
    }
}

//! Integration Test: Dev-Dependency Hygiene
//!
//! **Policy**: `chatkit-core` declares a dev-dependency only while the
//! test suite actually drives it. Dead declarations are how stale
//! versions linger unnoticed.
//! **Required**: every `[dev-dependencies]` entry has a call site under
//! `client/core`, or the declaration goes.

use std::fs;
use std::path::{Path, PathBuf};

fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .ancestors()
        .nth(2)
        .expect("workspace root should exist above the tests directory")
        .to_path_buf()
}

/// Crate names declared in the manifest's `[dev-dependencies]` table
fn dev_dependencies(manifest: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut in_section = false;

    for line in manifest.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with('[') {
            in_section = trimmed == "[dev-dependencies]";
            continue;
        }
        if !in_section || trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let name = trimmed.split('=').next().unwrap_or(trimmed).trim();
        // `dep.workspace = true` spelling still names the crate first
        let name = name.split('.').next().unwrap_or(name);
        if !name.is_empty() {
            names.push(name.to_string());
        }
    }

    names
}

/// Whether any Rust source under `dir` references the crate by path
fn crate_referenced(dir: &Path, crate_name: &str) -> bool {
    let ident = crate_name.replace('-', "_");
    let needle = format!("{ident}::");

    for entry in walkdir::WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
        if entry.path().extension().and_then(|s| s.to_str()) != Some("rs") {
            continue;
        }
        let content = match fs::read_to_string(entry.path()) {
            Ok(c) => c,
            Err(_) => continue,
        };
        if content.contains(&needle) {
            return true;
        }
    }

    false
}

/// Test that every core dev-dependency is exercised by the test suite
#[test]
fn test_core_dev_dependencies_are_exercised() {
    let core = workspace_root().join("client/core");
    let manifest_path = core.join("Cargo.toml");
    let manifest = fs::read_to_string(&manifest_path)
        .unwrap_or_else(|e| panic!("Failed to read {}: {e}", manifest_path.display()));

    let mut violations = Vec::new();
    for name in dev_dependencies(&manifest) {
        if !crate_referenced(&core, &name) {
            violations.push(format!(
                "{} - dev-dependency never exercised: {name}",
                manifest_path.display()
            ));
        }
    }

    if !violations.is_empty() {
        eprintln!("\n❌ CRITICAL: Unexercised dev-dependencies in chatkit-core!");
        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }
        eprintln!("\n✅ REQUIRED: a [dev-dependencies] entry earns its keep");
        eprintln!("  - drive the crate from a test, or delete the declaration");

        panic!(
            "\nFound {} unexercised dev-dependency declaration(s) in chatkit-core.\nFix these before merging!",
            violations.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dev_section_parsing() {
        let manifest = "\
[dependencies]
serde = \"1.0\"

[dev-dependencies]
# comment line
pretty_assertions = \"1.4\"
tempfile = { version = \"3.10\" }
walkdir.workspace = true

[features]
extra = []
";

        assert_eq!(
            dev_dependencies(manifest),
            vec!["pretty_assertions", "tempfile", "walkdir"]
        );
    }

    #[test]
    fn test_dependencies_section_is_not_scanned() {
        let manifest = "[dependencies]\nserde = \"1.0\"\n";
        assert!(dev_dependencies(manifest).is_empty());
    }
}

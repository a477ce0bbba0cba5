//! Integration Test: Core Library UI Isolation
//!
//! **Policy**: `chatkit-core` is a headless library. It MUST NOT depend on
//! terminal or UI crates, and it MUST NOT install a logging subscriber.
//! **Required**: Surfaces (the `chatkit` binary) own rendering and
//! subscriber setup; the library only emits `tracing` events.

use std::fs;
use std::path::{Path, PathBuf};

/// Crates that would pull rendering or argument parsing into the library
const FORBIDDEN_CORE_DEPENDENCIES: &[&str] = &[
    "ratatui",
    "crossterm",
    "termion",
    "cursive",
    "clap",
    "tracing-subscriber",
];

fn workspace_root() -> PathBuf {
    // tests/architectural-enforcement -> tests -> workspace root
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .ancestors()
        .nth(2)
        .expect("workspace root should exist above the tests directory")
        .to_path_buf()
}

/// Test that the core library manifest declares no UI or subscriber crates
#[test]
fn test_core_manifest_stays_headless() {
    let manifest_path = workspace_root().join("client/core/Cargo.toml");
    let manifest = fs::read_to_string(&manifest_path)
        .unwrap_or_else(|e| panic!("Failed to read {}: {e}", manifest_path.display()));

    let mut violations = Vec::new();
    for dependency in FORBIDDEN_CORE_DEPENDENCIES {
        if manifest.contains(dependency) {
            violations.push(format!(
                "{} - forbidden dependency: {dependency}",
                manifest_path.display()
            ));
        }
    }

    if !violations.is_empty() {
        eprintln!("\n❌ CRITICAL: UI or subscriber crates found in chatkit-core!");
        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }
        eprintln!("\n✅ REQUIRED separation:");
        eprintln!("  - chatkit-core emits tracing events only");
        eprintln!("  - the chatkit binary installs the subscriber and renders output");

        panic!(
            "\nFound {} forbidden dependency declaration(s) in chatkit-core.\nFix these before merging!",
            violations.len()
        );
    }
}

/// Test that no library source file initializes a tracing subscriber
#[test]
fn test_core_sources_never_install_a_subscriber() {
    let src = workspace_root().join("client/core/src");
    let mut violations = Vec::new();

    for entry in walkdir::WalkDir::new(&src).into_iter().filter_map(|e| e.ok()) {
        if entry.path().extension().and_then(|s| s.to_str()) != Some("rs") {
            continue;
        }
        let content = match fs::read_to_string(entry.path()) {
            Ok(c) => c,
            Err(_) => continue,
        };

        for (idx, line) in content.lines().enumerate() {
            let code_part = line.split("//").next().unwrap_or(line);
            if code_part.contains("tracing_subscriber") || code_part.contains("fmt().init()") {
                violations.push(format!(
                    "{}:{} - subscriber setup in library code: {}",
                    entry.path().display(),
                    idx + 1,
                    line.trim()
                ));
            }
        }
    }

    assert!(
        violations.is_empty(),
        "\nFound subscriber setup in chatkit-core:\n{}",
        violations.join("\n")
    );
}

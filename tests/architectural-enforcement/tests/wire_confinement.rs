//! Integration Test: Wire Format Confinement
//!
//! **Policy**: Splitting the byte stream into records is the frame
//! decoder's job, and only the frame decoder's. Scattered newline
//! scanning is how chunk-boundary bugs creep in.
//! **Required**: All record splitting goes through `wire/frame.rs`.

use std::fs;
use std::path::{Path, PathBuf};

/// Byte-level newline scanning that belongs only in the frame decoder
const SPLIT_PATTERNS: &[&str] = &["b'\\n'", "find('\\n')", "split('\\n')", "split_terminator('\\n')"];

/// The one module allowed to split records
const FRAME_DECODER: &str = "wire/frame.rs";

fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .ancestors()
        .nth(2)
        .expect("workspace root should exist above the tests directory")
        .to_path_buf()
}

fn production_sources() -> Vec<PathBuf> {
    let root = workspace_root();
    let mut sources = Vec::new();
    for dir in ["client", "cli"] {
        for entry in walkdir::WalkDir::new(root.join(dir))
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if entry.path().extension().and_then(|s| s.to_str()) == Some("rs") {
                sources.push(entry.path().to_path_buf());
            }
        }
    }
    sources
}

/// Test that newline splitting appears only in the frame decoder
#[test]
fn test_record_splitting_confined_to_frame_decoder() {
    let mut violations = Vec::new();

    for path in production_sources() {
        if path.ends_with(FRAME_DECODER) {
            continue;
        }
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(_) => continue,
        };

        for (idx, line) in content.lines().enumerate() {
            let code_part = line.split("//").next().unwrap_or(line);
            for pattern in SPLIT_PATTERNS {
                if code_part.contains(pattern) {
                    violations.push(format!(
                        "{}:{} - newline splitting outside the frame decoder: {}",
                        path.display(),
                        idx + 1,
                        line.trim()
                    ));
                }
            }
        }
    }

    if !violations.is_empty() {
        eprintln!("\n❌ CRITICAL: Record splitting found outside {FRAME_DECODER}!");
        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }
        eprintln!("\n✅ REQUIRED: feed bytes to FrameDecoder and consume whole records");

        panic!(
            "\nFound {} record-splitting violation(s).\nFix these before merging!",
            violations.len()
        );
    }
}

/// Test that the frame decoder itself still exists where the policy says
#[test]
fn test_frame_decoder_present() {
    let path = workspace_root().join("client/core/src").join(FRAME_DECODER);
    assert!(
        path.exists(),
        "Frame decoder not found at {}",
        path.display()
    );
}

/// Test that production code never blocks a runtime thread with
/// `std::thread::sleep`
#[test]
fn test_no_thread_sleep_in_production_code() {
    let mut violations = Vec::new();

    for path in production_sources() {
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(_) => continue,
        };
        let lines: Vec<&str> = content.lines().collect();

        for (idx, line) in lines.iter().enumerate() {
            let code_part = line.split("//").next().unwrap_or(line);
            if !code_part.contains("thread::sleep") {
                continue;
            }
            if is_in_test_function(&lines, idx) {
                continue;
            }
            violations.push(format!(
                "{}:{} - blocking sleep: {}",
                path.display(),
                idx + 1,
                line.trim()
            ));
        }
    }

    assert!(
        violations.is_empty(),
        "\nFound blocking sleep in production code (use tokio::time::sleep):\n{}",
        violations.join("\n")
    );
}

/// Check if line is inside a test function
fn is_in_test_function(lines: &[&str], current_idx: usize) -> bool {
    let mut found_fn_idx = None;
    for i in (0..current_idx).rev() {
        let line = lines[i].trim();

        if line.starts_with("fn ") || line.contains(" fn ") {
            found_fn_idx = Some(i);
            break;
        }

        if line.starts_with("mod ") || (line.starts_with("impl ") && line.contains('{')) {
            return false;
        }
    }

    if let Some(fn_idx) = found_fn_idx {
        for i in (0..fn_idx).rev() {
            let line = lines[i].trim();

            if line.starts_with("#[test]")
                || line.starts_with("#[tokio::test")
                || line.starts_with("#[cfg(test)]")
            {
                return true;
            }

            if line.starts_with("fn ") || line.starts_with("mod ") || line.starts_with("impl ") {
                break;
            }
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_test_function_detection() {
        let test_code = vec![
            "#[test]",
            "fn test_something() {",
            "    std::thread::sleep(std::time::Duration::from_millis(1));",
            "}",
        ];

        assert!(
            is_in_test_function(&test_code, 2),
            "Should detect test function"
        );
    }

    #[test]
    fn test_production_function_detection() {
        let test_code = vec![
            "fn busy_wait() {",
            "    std::thread::sleep(std::time::Duration::from_millis(1));",
            "}",
        ];

        assert!(
            !is_in_test_function(&test_code, 1),
            "Should not flag production code as test code"
        );
    }
}

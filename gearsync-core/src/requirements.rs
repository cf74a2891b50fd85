//! Requirements manifest parsing.

use std::path::Path;

use tracing::debug;

use crate::error::{Result, SyncError};

/// Read `path` and return its requirement specifiers in file order.
pub async fn read_requirements(path: &Path) -> Result<Vec<String>> {
    let contents = tokio::fs::read_to_string(path).await.map_err(|err| {
        if err.kind() == std::io::ErrorKind::NotFound {
            SyncError::FileNotFound {
                path: path.to_path_buf(),
            }
        } else {
            SyncError::Io(err)
        }
    })?;
    Ok(parse_requirements(&contents))
}

/// One specifier per line. Blank lines and comments are dropped, as are pip
/// option lines (`-r`, `--index-url`, ...) which the engine cannot honour.
pub fn parse_requirements(contents: &str) -> Vec<String> {
    contents
        .lines()
        .filter_map(|line| {
            let spec = strip_comment(line).trim();
            if spec.is_empty() {
                return None;
            }
            if spec.starts_with('-') {
                debug!(line = spec, "skipping pip option in requirements file");
                return None;
            }
            Some(spec.to_string())
        })
        .collect()
}

// pip only treats '#' as a comment at line start or after whitespace, so
// URL fragments like `pkg @ https://host/x.whl#sha256=...` survive.
fn strip_comment(line: &str) -> &str {
    let bytes = line.as_bytes();
    for (idx, byte) in bytes.iter().enumerate() {
        if *byte == b'#' && (idx == 0 || bytes[idx - 1].is_ascii_whitespace()) {
            return &line[..idx];
        }
    }
    line
}

//! Where scanned pages go.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::info;

/// Placeholder replaced by the page number in a [`OutputTarget::Numbered`] pattern.
pub const PAGE_PLACEHOLDER: &str = "{n}";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    /// Write the single page to standard output.
    Stdout,
    /// Write the single page to a file, replacing it if it exists.
    File(PathBuf),
    /// One file per page, numbered from 1, skipping names that already exist.
    Numbered { pattern: String, next: u32 },
}

impl OutputTarget {
    pub fn numbered(pattern: impl Into<String>) -> Self {
        OutputTarget::Numbered {
            pattern: pattern.into(),
            next: 1,
        }
    }

    /// Write one page. Returns the path written, if any.
    pub fn emit(&mut self, jpeg: &[u8]) -> io::Result<Option<PathBuf>> {
        match self {
            OutputTarget::Stdout => {
                let mut stdout = io::stdout().lock();
                stdout.write_all(jpeg)?;
                stdout.flush()?;
                Ok(None)
            }
            OutputTarget::File(path) => {
                fs::write(&*path, jpeg)?;
                info!(path = %path.display(), bytes = jpeg.len(), "Saved page");
                Ok(Some(path.clone()))
            }
            OutputTarget::Numbered { pattern, next } => {
                let (number, path) = next_free(pattern, *next);
                fs::write(&path, jpeg)?;
                *next = number + 1;
                info!(path = %path.display(), bytes = jpeg.len(), "Saved page {}", number);
                Ok(Some(path))
            }
        }
    }
}

/// First page number at or after `start` whose file does not exist yet.
fn next_free(pattern: &str, start: u32) -> (u32, PathBuf) {
    let mut number = start;
    loop {
        let path = page_path(pattern, number);
        if !path.exists() {
            return (number, path);
        }
        number += 1;
    }
}

/// Substitute `number` into `pattern`.
///
/// `{n}` becomes the 3-digit page number. Without a placeholder the number
/// goes before the extension: `scan.jpg` → `scan-001.jpg`.
pub fn page_path(pattern: &str, number: u32) -> PathBuf {
    let number = format!("{number:03}");
    if pattern.contains(PAGE_PLACEHOLDER) {
        return PathBuf::from(pattern.replace(PAGE_PLACEHOLDER, &number));
    }

    let path = Path::new(pattern);
    let stem = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    let file_name = match path.extension() {
        Some(ext) => format!("{stem}-{number}.{}", ext.to_string_lossy()),
        None => format!("{stem}-{number}"),
    };
    path.with_file_name(file_name)
}

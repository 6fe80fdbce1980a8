//! Request-list parsing and destination resolution.
//!
//! Each non-empty input line is either a bare URL (saved to the working
//! directory under the URL's basename) or `URL > PATH`. The destination is
//! resolved against the live filesystem: an existing directory gets the
//! basename appended, an existing file is overwritten, and anything else
//! has its parent directories created.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use url::Url;

/// Fallback filename when the URL path has no usable last segment.
const DEFAULT_FILENAME: &str = "download.bin";

/// Separator between URL and destination on a request line.
const DEST_SEPARATOR: &str = " > ";

/// One parsed download request: where from, where to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRequest {
    pub url: String,
    pub dest: PathBuf,
}

/// Read a line-oriented file, dropping empty lines.
pub fn read_non_empty_lines(path: &Path) -> Result<Vec<String>> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    Ok(data
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

/// Parse request lines into `UserRequest`s, resolving destinations (and
/// creating missing parent directories) as a side effect.
pub fn parse_request_lines(lines: &[String]) -> Result<Vec<UserRequest>> {
    lines
        .iter()
        .map(String::as_str)
        .filter(|line| !line.trim().is_empty())
        .map(parse_line)
        .collect()
}

fn parse_line(line: &str) -> Result<UserRequest> {
    let (raw_url, dest_spec) = match line.split_once(DEST_SEPARATOR) {
        Some((url, dest)) => (url.trim(), Some(dest.trim())),
        None => (line.trim(), None),
    };

    // The fragment never reaches the server; drop it before parsing.
    let without_fragment = raw_url.split_once('#').map_or(raw_url, |(u, _)| u);
    let url = Url::parse(without_fragment)
        .with_context(|| format!("invalid request URL: {}", line))?;

    let file_name = file_name_from_url(&url);
    let dest = resolve_dest(dest_spec, &file_name)
        .with_context(|| format!("cannot resolve destination for: {}", line))?;

    Ok(UserRequest {
        url: url.to_string(),
        dest,
    })
}

/// Last path segment of the URL, or `download.bin` when there is none.
fn file_name_from_url(url: &Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|segment| !segment.is_empty())
        .unwrap_or(DEFAULT_FILENAME)
        .to_string()
}

fn resolve_dest(spec: Option<&str>, file_name: &str) -> Result<PathBuf> {
    let cwd = std::env::current_dir().context("no working directory")?;
    let raw = match spec {
        Some(path) if !path.is_empty() => {
            let path = Path::new(path);
            if path.is_absolute() {
                path.to_path_buf()
            } else {
                cwd.join(path)
            }
        }
        _ => cwd,
    };

    match fs::metadata(&raw) {
        Ok(meta) if meta.is_dir() => Ok(raw.join(file_name)),
        Ok(_) => Ok(raw),
        Err(_) => {
            if let Some(parent) = raw.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
            Ok(raw)
        }
    }
}

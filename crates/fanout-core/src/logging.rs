//! Logging init: append to a chosen log file, or discard everything.
//!
//! The engine logs through `tracing`; the binary decides where that goes.
//! With a log path, lines append to the file (parents created as needed).
//! Without one, output is swallowed so the terminal stays clean for the
//! final report.

use anyhow::{Context, Result};
use std::fs;
use std::io;
use std::path::Path;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

/// Writer that is either the log file or a sink (used when the file handle
/// cannot be cloned for a new writer).
enum FileOrSink {
    File(fs::File),
    Sink,
}

impl io::Write for FileOrSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            FileOrSink::File(f) => f.write(buf),
            FileOrSink::Sink => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            FileOrSink::File(f) => f.flush(),
            FileOrSink::Sink => Ok(()),
        }
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,fanout_core=debug"))
}

/// Initialize logging. `log_path` of `None` discards all output.
pub fn init(log_path: Option<&Path>) -> Result<()> {
    let writer: BoxMakeWriter = match log_path {
        Some(path) => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)
                        .with_context(|| format!("failed to create {}", parent.display()))?;
                }
            }
            let file = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;

            struct FileMakeWriter(fs::File);

            impl<'a> MakeWriter<'a> for FileMakeWriter {
                type Writer = FileOrSink;

                fn make_writer(&'a self) -> Self::Writer {
                    self.0
                        .try_clone()
                        .map(FileOrSink::File)
                        .unwrap_or(FileOrSink::Sink)
                }
            }

            BoxMakeWriter::new(FileMakeWriter(file))
        }
        None => BoxMakeWriter::new(io::sink),
    };

    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(writer)
        .with_ansi(false)
        .init();

    if let Some(path) = log_path {
        tracing::info!("logging to {}", path.display());
    }
    Ok(())
}

/// Stderr fallback for when the log file cannot be opened; keeps the run
/// alive instead of failing on a bad `--log` path.
pub fn init_stderr() {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(io::stderr)
        .with_ansi(false)
        .init();
}

// Output sinks: one per consumer

use crate::config::MAX_SINKS;
use crate::error::TeeError;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

/// Permissions for sink files created by [`open_sink`].
pub const SINK_MODE: u32 = 0o600;

/// A named destination a consumer writes drained bytes to.
pub struct Sink {
    name: String,
    writer: Box<dyn Write + Send>,
}

impl Sink {
    pub fn new<W: Write + Send + 'static>(name: impl Into<String>, writer: W) -> Self {
        Self {
            name: name.into(),
            writer: Box::new(writer),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Write one drained batch. A short write is an error.
    pub(crate) fn write_batch(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.writer.write_all(bytes)?;
        self.writer.flush()
    }
}

/// Open `path` create + write-only with mode `0600`. Existing content is
/// kept (and overwritten from the start) unless `truncate` is set.
pub fn open_sink(path: &Path, truncate: bool) -> Result<Sink, TeeError> {
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(truncate)
        .mode(SINK_MODE)
        .open(path)
        .map_err(|source| TeeError::SinkOpen {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(Sink::new(path.display().to_string(), file))
}

/// Open every sink, failing on the first that cannot be opened. The count is
/// checked before anything is opened.
pub fn open_sinks<P: AsRef<Path>>(paths: &[P], truncate: bool) -> Result<Vec<Sink>, TeeError> {
    if paths.is_empty() || paths.len() > MAX_SINKS {
        return Err(TeeError::Usage(format!(
            "expected 1 to {} output files, got {}",
            MAX_SINKS,
            paths.len()
        )));
    }
    paths
        .iter()
        .map(|p| open_sink(p.as_ref(), truncate))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn opened_sink_is_private_and_writable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.log");

        let mut sink = open_sink(&path, false).unwrap();
        sink.write_batch(b"payload").unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, SINK_MODE);
        assert_eq!(std::fs::read(&path).unwrap(), b"payload");
    }

    #[test]
    fn truncate_discards_old_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.log");
        std::fs::write(&path, b"old old old").unwrap();

        let mut sink = open_sink(&path, true).unwrap();
        sink.write_batch(b"new").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"new");
    }

    #[test]
    fn missing_directory_is_a_setup_error() {
        let err = open_sinks(&["/nonexistent-dir/out.log"], false).unwrap_err();
        assert!(matches!(err, TeeError::SinkOpen { .. }));
    }

    #[test]
    fn too_many_sinks_is_a_usage_error() {
        let paths: Vec<String> = (0..=MAX_SINKS).map(|i| format!("/tmp/never-{}", i)).collect();
        assert!(matches!(open_sinks(&paths, false), Err(TeeError::Usage(_))));
        let none: [&str; 0] = [];
        assert!(matches!(open_sinks(&none, false), Err(TeeError::Usage(_))));
    }
}

//! File output
//!
//! Writes to `<directory>/<name>` through a buffered tokio file. With
//! `compress = true` the content is gzipped and `.gz` is appended to the name.
//! Content goes to `<name>.tmp` first and is renamed into place on close, so
//! a target name only ever holds a complete part.

use super::{reject_encryption, OutputResource};
use crate::config::DestinationConfig;
use crate::domain::context::ResultExt;
use crate::domain::{ConduitError, Result};
use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};

const BUFFER_CAPACITY: usize = 1024 * 1024;

/// Compressed bytes are drained to disk once this much has accumulated
const GZIP_DRAIN_THRESHOLD: usize = 64 * 1024;

enum FileWriter {
    Plain(BufWriter<File>),
    Gzip {
        file: BufWriter<File>,
        encoder: GzEncoder<Vec<u8>>,
    },
}

/// Local file destination
#[derive(Default)]
pub struct FileOutput {
    path: Option<PathBuf>,
    temp_path: Option<PathBuf>,
    writer: Option<FileWriter>,
    final_size: Option<u64>,
}

impl FileOutput {
    pub fn new() -> Self {
        Self::default()
    }

    fn not_open() -> ConduitError {
        ConduitError::Destination("file output is not open".to_string())
    }
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

#[async_trait]
impl OutputResource for FileOutput {
    async fn open(&mut self, destination: &DestinationConfig, name: &str) -> Result<()> {
        reject_encryption("file", destination)?;

        let directory = PathBuf::from(destination.directory.as_deref().unwrap_or("."));
        tokio::fs::create_dir_all(&directory)
            .await
            .map_err(|e| {
                ConduitError::Destination(format!(
                    "Failed to create directory {}: {e}",
                    directory.display()
                ))
            })?;

        let mut file_name = name.to_string();
        if destination.compress && !file_name.ends_with(".gz") {
            file_name.push_str(".gz");
        }
        let path = directory.join(file_name);
        let temp_path = temp_path_for(&path);

        let file = File::create(&temp_path).await.map_err(|e| {
            ConduitError::Destination(format!("Failed to create {}: {e}", temp_path.display()))
        })?;
        let file = BufWriter::with_capacity(BUFFER_CAPACITY, file);

        self.writer = Some(if destination.compress {
            FileWriter::Gzip {
                file,
                encoder: GzEncoder::new(Vec::new(), Compression::default()),
            }
        } else {
            FileWriter::Plain(file)
        });

        tracing::debug!(path = %path.display(), compress = destination.compress, "Opened file output");
        self.path = Some(path);
        self.temp_path = Some(temp_path);
        self.final_size = None;
        Ok(())
    }

    fn output_stream(&mut self) -> Result<&mut (dyn AsyncWrite + Send + Unpin)> {
        match self.writer.as_mut() {
            Some(FileWriter::Plain(file)) => Ok(file),
            Some(FileWriter::Gzip { .. }) => Err(ConduitError::Unsupported(
                "raw output stream is not available for compressed files".to_string(),
            )),
            None => Err(Self::not_open()),
        }
    }

    async fn write(&mut self, data: &[u8], _partition_key: &str, _record_key: &str) -> Result<()> {
        match self.writer.as_mut().ok_or_else(Self::not_open)? {
            FileWriter::Plain(file) => file.write_all(data).await.context("file write")?,
            FileWriter::Gzip { file, encoder } => {
                encoder.write_all(data).context("gzip write")?;
                if encoder.get_ref().len() >= GZIP_DRAIN_THRESHOLD {
                    let chunk = std::mem::take(encoder.get_mut());
                    file.write_all(&chunk).await.context("file write")?;
                }
            }
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        let Some(writer) = self.writer.take() else {
            return Ok(());
        };

        let mut file = match writer {
            FileWriter::Plain(file) => file,
            FileWriter::Gzip { mut file, encoder } => {
                let rest = encoder.finish().context("gzip finish")?;
                file.write_all(&rest).await.context("file write")?;
                file
            }
        };
        file.flush().await.context("file flush")?;
        file.get_mut().sync_all().await.context("file sync")?;
        drop(file);

        if let (Some(temp_path), Some(path)) = (self.temp_path.take(), &self.path) {
            tokio::fs::rename(&temp_path, path).await.map_err(|e| {
                ConduitError::Destination(format!(
                    "Failed to move {} into place: {e}",
                    temp_path.display()
                ))
            })?;
            let metadata = tokio::fs::metadata(path).await.context("file metadata")?;
            self.final_size = Some(metadata.len());
            tracing::debug!(path = %path.display(), size = metadata.len(), "Closed file output");
        }
        Ok(())
    }

    fn effective_name(&self) -> Option<String> {
        self.path.as_ref().map(|p| p.display().to_string())
    }

    fn size(&self) -> Option<u64> {
        self.final_size
    }
}

//! Local file loader.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::io::SeekFrom;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, Take};
use tokio_util::io::ReaderStream;

use super::loader::{DataSource, Loader, LoaderError, LoaderRange, LoaderResponse};

/// Read size per chunk.
const CHUNK_SIZE: usize = 64 * 1024;

/// Reads byte ranges of a local file; `DataSource::url` is the path.
#[derive(Debug, Clone, Default)]
pub struct FileLoader {
    chunk_size: Option<usize>,
}

impl FileLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self {
            chunk_size: Some(chunk_size),
        }
    }
}

fn io_error(error: std::io::Error) -> LoaderError {
    LoaderError::exception(error.raw_os_error().unwrap_or(-1), error.to_string())
}

#[async_trait]
impl Loader for FileLoader {
    fn loader_type(&self) -> &'static str {
        "file-loader"
    }

    async fn open(
        &self,
        source: &DataSource,
        range: LoaderRange,
    ) -> Result<Box<dyn LoaderResponse>, LoaderError> {
        let mut file = File::open(&source.url).await.map_err(io_error)?;
        let size = file.metadata().await.map_err(io_error)?.len();

        let end = range.to.map_or(size, |to| (to + 1).min(size));
        let length = end.saturating_sub(range.from);
        file.seek(SeekFrom::Start(range.from))
            .await
            .map_err(io_error)?;

        tracing::debug!(path = %source.url, from = range.from, length, "Opening file range");
        let stream =
            ReaderStream::with_capacity(file.take(length), self.chunk_size.unwrap_or(CHUNK_SIZE));

        Ok(Box::new(FileResponse {
            stream,
            content_length: length,
            received: 0,
        }))
    }
}

struct FileResponse {
    stream: ReaderStream<Take<File>>,
    content_length: u64,
    received: u64,
}

#[async_trait]
impl LoaderResponse for FileResponse {
    fn content_length(&self) -> Option<u64> {
        Some(self.content_length).filter(|&len| len != 0)
    }

    fn redirected_url(&self) -> Option<&str> {
        None
    }

    async fn next_chunk(&mut self) -> Result<Option<Bytes>, LoaderError> {
        match self.stream.next().await {
            Some(Ok(chunk)) => {
                self.received += chunk.len() as u64;
                Ok(Some(chunk))
            }
            Some(Err(error)) => Err(io_error(error)),
            None if self.received < self.content_length => {
                // file truncated while reading
                Err(LoaderError::early_eof("File ended before the expected length"))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_reads_requested_range() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let data: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        file.write_all(&data).unwrap();

        let loader = FileLoader::with_chunk_size(128);
        let source = DataSource::new(file.path().to_string_lossy());
        let range = LoaderRange {
            from: 100,
            to: Some(599),
        };
        let mut response = loader.open(&source, range).await.unwrap();
        assert_eq!(response.content_length(), Some(500));

        let mut read = Vec::new();
        while let Some(chunk) = response.next_chunk().await.unwrap() {
            assert!(chunk.len() <= 128);
            read.extend_from_slice(&chunk);
        }
        assert_eq!(read, &data[100..600]);
    }

    #[tokio::test]
    async fn test_missing_file() {
        let loader = FileLoader::new();
        let source = DataSource::new("/nonexistent/tsforged/input.ts");
        let result = loader.open(&source, LoaderRange::default()).await;
        assert!(matches!(result, Err(LoaderError::Exception { .. })));
    }
}

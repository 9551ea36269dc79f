//! Text file provider backing `fs/read_text_file` and `fs/write_text_file`.

use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use tracing::debug;

use crate::models::messages::{ReadTextFileParams, WriteTextFileParams};
use crate::providers::path_safety::{confine, validate_absolute};
use crate::{AppError, Result};

/// Boxed future returned by [`FileSystem`] methods.
pub type FsFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// File access served to the agent by the client.
pub trait FileSystem: Send + Sync {
    /// Read a text file, optionally a window of lines.
    fn read_text_file(&self, params: ReadTextFileParams) -> FsFuture<'_, String>;

    /// Replace a text file's content.
    fn write_text_file(&self, params: WriteTextFileParams) -> FsFuture<'_, ()>;
}

/// [`FileSystem`] over the local disk via `tokio::fs`.
#[derive(Debug, Clone, Default)]
pub struct LocalFileSystem {
    root: Option<PathBuf>,
}

impl LocalFileSystem {
    /// Unconfined provider: any absolute path is allowed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Provider confined to `root`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the root cannot be canonicalized.
    pub fn confined_to(root: impl AsRef<Path>) -> Result<Self> {
        let root = root
            .as_ref()
            .canonicalize()
            .map_err(|err| AppError::Config(format!("file system root invalid: {err}")))?;
        Ok(Self { root: Some(root) })
    }

    /// Root this provider is confined to, if any.
    #[must_use]
    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    async fn resolve(&self, raw: &str) -> Result<PathBuf> {
        let path = validate_absolute(raw)?;
        match &self.root {
            Some(root) => confine(root, &path).await,
            None => Ok(path),
        }
    }
}

impl FileSystem for LocalFileSystem {
    fn read_text_file(&self, params: ReadTextFileParams) -> FsFuture<'_, String> {
        Box::pin(async move {
            let path = self.resolve(&params.path).await?;
            let content = tokio::fs::read_to_string(&path)
                .await
                .map_err(|err| map_io_error(&path, &err))?;
            debug!(path = %path.display(), bytes = content.len(), "fs: read");
            Ok(select_lines(&content, params.line, params.limit))
        })
    }

    fn write_text_file(&self, params: WriteTextFileParams) -> FsFuture<'_, ()> {
        Box::pin(async move {
            let path = self.resolve(&params.path).await?;
            tokio::fs::write(&path, params.content.as_bytes())
                .await
                .map_err(|err| map_io_error(&path, &err))?;
            debug!(path = %path.display(), bytes = params.content.len(), "fs: wrote");
            Ok(())
        })
    }
}

/// Map an I/O failure to the protocol's error kinds.
#[must_use]
pub fn map_io_error(path: &Path, err: &std::io::Error) -> AppError {
    let detail = format!("{}: {err}", path.display());
    match err.kind() {
        ErrorKind::NotFound => AppError::ResourceNotFound(detail),
        ErrorKind::PermissionDenied => AppError::PermissionDenied(detail),
        ErrorKind::InvalidData => AppError::InvalidParams(format!("{detail} (not UTF-8 text)")),
        _ => AppError::Internal(detail),
    }
}

/// Select `limit` lines starting at 1-based `line`.
fn select_lines(content: &str, line: Option<u32>, limit: Option<u32>) -> String {
    if line.is_none() && limit.is_none() {
        return content.to_owned();
    }
    let skip = line.map_or(0, |l| l.saturating_sub(1) as usize);
    let take = limit.map_or(usize::MAX, |l| l as usize);
    content
        .split_inclusive('\n')
        .skip(skip)
        .take(take)
        .collect()
}

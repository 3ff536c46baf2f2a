//! Multipart upload building and progress tracking.
//!
//! The `/upload` endpoint takes a single image in the `photo` field and an
//! optional `path` text field naming the target folder on the server.

use crate::{CrowError, Result};
use futures::StreamExt;
use reqwest::multipart::{Form, Part};
use std::path::{Path, PathBuf};

/// Multipart field carrying the image bytes.
pub const PHOTO_FIELD: &str = "photo";
/// Multipart field carrying the target folder.
pub const PATH_FIELD: &str = "path";
/// Content type sent for every photo, whatever its extension.
pub const PHOTO_CONTENT_TYPE: &str = "image/jpeg";
/// Extensions offered by the file picker.
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "tiff", "gif"];

/// A single-file upload: the local image and an optional remote folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    pub file: PathBuf,
    pub target_folder: String,
}

/// One part of the multipart body, as it will be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormField {
    File {
        name: &'static str,
        file_name: String,
        content_type: &'static str,
    },
    Text {
        name: &'static str,
        value: String,
    },
}

impl UploadRequest {
    pub fn new(file: impl Into<PathBuf>, target_folder: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            target_folder: target_folder.into(),
        }
    }

    /// Target folder with surrounding whitespace removed, `None` when blank.
    pub fn target(&self) -> Option<&str> {
        let trimmed = self.target_folder.trim();
        (!trimmed.is_empty()).then_some(trimmed)
    }

    pub fn file_name(&self) -> Result<String> {
        if self.file.as_os_str().is_empty() {
            return Err(CrowError::NoFileSelected);
        }
        self.file
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .ok_or_else(|| CrowError::InvalidPath(self.file.display().to_string()))
    }

    /// Describes the parts of the multipart body in send order.
    pub fn fields(&self) -> Result<Vec<FormField>> {
        let mut fields = vec![FormField::File {
            name: PHOTO_FIELD,
            file_name: self.file_name()?,
            content_type: PHOTO_CONTENT_TYPE,
        }];
        if let Some(target) = self.target() {
            fields.push(FormField::Text {
                name: PATH_FIELD,
                value: target.to_string(),
            });
        }
        Ok(fields)
    }

    /// Opens the file and builds a streaming form from [`Self::fields`].
    ///
    /// The file is read lazily while the request body is sent; every chunk
    /// handed to the transport is reported through `on_progress`.
    pub(crate) async fn build_form<F>(&self, on_progress: F) -> Result<Form>
    where
        F: Fn(UploadProgress) + Send + Sync + 'static,
    {
        let fields = self.fields()?;
        let file = open_local(&self.file).await?;
        let total = file.metadata().await?.len();

        let mut sent = 0u64;
        let stream = tokio_util::io::ReaderStream::new(file).inspect(move |chunk| {
            if let Ok(bytes) = chunk {
                sent += bytes.len() as u64;
                on_progress(UploadProgress::new(sent as i64, total as i64));
            }
        });
        let mut body = Some(reqwest::Body::wrap_stream(stream));

        let mut form = Form::new();
        for field in fields {
            match field {
                FormField::File {
                    name,
                    file_name,
                    content_type,
                } => {
                    let body = body.take().ok_or_else(|| {
                        CrowError::InvalidPath(format!("{file_name}: file part listed twice"))
                    })?;
                    let part = Part::stream_with_length(body, total)
                        .file_name(file_name)
                        .mime_str(content_type)?;
                    form = form.part(name, part);
                }
                FormField::Text { name, value } => {
                    form = form.text(name, value);
                }
            }
        }
        Ok(form)
    }
}

async fn open_local(path: &Path) -> Result<tokio::fs::File> {
    match tokio::fs::File::open(path).await {
        Ok(file) => Ok(file),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(CrowError::FileNotFound(path.display().to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

/// Bytes sent so far against the expected total. A total of `-1` means the
/// size is unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadProgress {
    pub sent: i64,
    pub total: i64,
}

impl UploadProgress {
    pub fn new(sent: i64, total: i64) -> Self {
        Self { sent, total }
    }

    /// Whole percent sent, or `None` while the total is unknown.
    pub fn percent(&self) -> Option<u8> {
        if self.total <= 0 {
            return None;
        }
        let pct = self.sent.clamp(0, self.total) * 100 / self.total;
        Some(pct as u8)
    }
}

/// Progress value shown to the user, 0 to 100.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressMeter {
    value: u8,
}

impl ProgressMeter {
    pub fn value(&self) -> u8 {
        self.value
    }

    /// Applies a progress report. Reports without a known total are ignored.
    pub fn update(&mut self, progress: UploadProgress) -> bool {
        match progress.percent() {
            Some(pct) => {
                self.value = pct;
                true
            }
            None => false,
        }
    }

    pub fn reset(&mut self) {
        self.value = 0;
    }

    pub fn complete(&mut self) {
        self.value = 100;
    }
}

//! Note file persistence and keyframe loading for prompts.

use std::path::PathBuf;

use async_trait::async_trait;
use image::imageops::FilterType;
use tokio::task;
use trace_core::summarize::ports::NoteFiles;
use trace_domain::{Result, TraceError};

/// Longest edge of keyframe images attached to prompts.
const PROMPT_IMAGE_MAX_DIM: u32 = 768;

/// Filesystem note tree plus screenshot reads for prompt assembly.
pub struct FsNoteFiles {
    data_dir: PathBuf,
}

impl FsNoteFiles {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self { data_dir: data_dir.into() }
    }
}

#[async_trait]
impl NoteFiles for FsNoteFiles {
    async fn write_note(&self, relative_path: &str, content: &str) -> Result<()> {
        let absolute = self.data_dir.join(relative_path);
        let content = content.to_string();
        task::spawn_blocking(move || -> Result<()> {
            if let Some(parent) = absolute.parent() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    TraceError::Storage(format!("create {}: {e}", parent.display()))
                })?;
            }
            std::fs::write(&absolute, content)
                .map_err(|e| TraceError::Storage(format!("write {}: {e}", absolute.display())))
        })
        .await
        .map_err(|e| TraceError::Fatal(e.to_string()))?
    }

    async fn read_note(&self, relative_path: &str) -> Result<String> {
        let absolute = self.data_dir.join(relative_path);
        task::spawn_blocking(move || -> Result<String> {
            std::fs::read_to_string(&absolute).map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    TraceError::NotFound(absolute.display().to_string())
                }
                _ => TraceError::Storage(format!("read {}: {e}", absolute.display())),
            })
        })
        .await
        .map_err(|e| TraceError::Fatal(e.to_string()))?
    }

    async fn load_frame_jpeg(&self, relative_path: &str) -> Result<Vec<u8>> {
        let absolute = self.data_dir.join(relative_path);
        task::spawn_blocking(move || -> Result<Vec<u8>> {
            let image = image::open(&absolute).map_err(|e| match &e {
                image::ImageError::IoError(io)
                    if io.kind() == std::io::ErrorKind::NotFound =>
                {
                    TraceError::NotFound(absolute.display().to_string())
                }
                _ => TraceError::Storage(format!("decode {}: {e}", absolute.display())),
            })?;

            // Low-detail variant for the prompt: shrink to bound token cost.
            let image = if image.width() > PROMPT_IMAGE_MAX_DIM
                || image.height() > PROMPT_IMAGE_MAX_DIM
            {
                image.resize(PROMPT_IMAGE_MAX_DIM, PROMPT_IMAGE_MAX_DIM, FilterType::Triangle)
            } else {
                image
            };

            let mut buffer = std::io::Cursor::new(Vec::new());
            let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buffer, 70);
            image
                .write_with_encoder(encoder)
                .map_err(|e| TraceError::Storage(format!("re-encode frame: {e}")))?;
            Ok(buffer.into_inner())
        })
        .await
        .map_err(|e| TraceError::Fatal(e.to_string()))?
    }
}

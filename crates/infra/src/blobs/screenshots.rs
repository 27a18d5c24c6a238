//! Screenshot blob persistence.
//!
//! Accepted frames are downscaled to fit 1920x1080 (Lanczos3) and written
//! as JPEG at the configured quality under the day-partitioned tree
//! `screenshots/YYYY/MM/DD/`.

use std::path::PathBuf;

use chrono::NaiveDateTime;
use image::imageops::FilterType;
use trace_core::capture::ports::{FrameBlobStore, RawFrame, StoredFrame};
use trace_domain::constants::{MAX_SCREENSHOT_HEIGHT, MAX_SCREENSHOT_WIDTH};
use trace_domain::utils::time::screenshot_path;
use trace_domain::{Result, TraceError};

/// Filesystem-backed frame blobs under the data root.
pub struct FsScreenshotBlobs {
    data_dir: PathBuf,
}

impl FsScreenshotBlobs {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self { data_dir: data_dir.into() }
    }

    fn absolute(&self, relative: &str) -> PathBuf {
        self.data_dir.join(relative)
    }
}

impl FrameBlobStore for FsScreenshotBlobs {
    fn store_frame(
        &self,
        frame: &RawFrame,
        ts: NaiveDateTime,
        short_id: &str,
        jpeg_quality: u8,
    ) -> Result<StoredFrame> {
        let relative = screenshot_path(ts, frame.monitor_id, short_id)
            .to_string_lossy()
            .into_owned();
        let absolute = self.absolute(&relative);

        if let Some(parent) = absolute.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| TraceError::Storage(format!("create {}: {e}", parent.display())))?;
        }

        let image = if frame.image.width() > MAX_SCREENSHOT_WIDTH
            || frame.image.height() > MAX_SCREENSHOT_HEIGHT
        {
            frame.image.resize(MAX_SCREENSHOT_WIDTH, MAX_SCREENSHOT_HEIGHT, FilterType::Lanczos3)
        } else {
            frame.image.clone()
        };

        let file = std::fs::File::create(&absolute)
            .map_err(|e| TraceError::Storage(format!("create {}: {e}", absolute.display())))?;
        let mut writer = std::io::BufWriter::new(file);
        let encoder =
            image::codecs::jpeg::JpegEncoder::new_with_quality(&mut writer, jpeg_quality);
        image
            .write_with_encoder(encoder)
            .map_err(|e| TraceError::Storage(format!("encode {}: {e}", absolute.display())))?;

        Ok(StoredFrame { path: relative, width: image.width(), height: image.height() })
    }

    fn delete_blob(&self, relative_path: &str) -> Result<()> {
        let absolute = self.absolute(relative_path);
        match std::fs::remove_file(&absolute) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => {
                Err(TraceError::Storage(format!("delete {}: {err}", absolute.display())))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use image::{DynamicImage, RgbImage};
    use tempfile::TempDir;

    use super::*;

    fn frame(width: u32, height: u32) -> RawFrame {
        RawFrame { monitor_id: 1, image: DynamicImage::ImageRgb8(RgbImage::new(width, height)) }
    }

    fn ts() -> NaiveDateTime {
        "2025-01-15T14:23:45.678".parse().unwrap()
    }

    #[test]
    fn stores_jpeg_under_day_partition() {
        let dir = TempDir::new().unwrap();
        let store = FsScreenshotBlobs::new(dir.path());

        let stored = store.store_frame(&frame(640, 480), ts(), "abcd1234", 85).unwrap();

        assert!(stored.path.starts_with("screenshots/2025/01/15/"));
        assert!(stored.path.ends_with("_m1_abcd1234.jpg"));
        assert_eq!((stored.width, stored.height), (640, 480));
        assert!(dir.path().join(&stored.path).exists());
    }

    #[test]
    fn oversized_frames_are_downscaled_to_fit() {
        let dir = TempDir::new().unwrap();
        let store = FsScreenshotBlobs::new(dir.path());

        let stored = store.store_frame(&frame(3840, 2160), ts(), "big", 85).unwrap();

        assert!(stored.width <= MAX_SCREENSHOT_WIDTH);
        assert!(stored.height <= MAX_SCREENSHOT_HEIGHT);
    }

    #[test]
    fn delete_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = FsScreenshotBlobs::new(dir.path());

        let stored = store.store_frame(&frame(64, 64), ts(), "gone", 85).unwrap();
        store.delete_blob(&stored.path).unwrap();
        assert!(!dir.path().join(&stored.path).exists());

        // Deleting again is a no-op.
        store.delete_blob(&stored.path).unwrap();
    }
}

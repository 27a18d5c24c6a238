//! Filesystem blob stores: screenshot JPEGs and note Markdown files.

pub mod notes;
pub mod screenshots;

pub use notes::FsNoteFiles;
pub use screenshots::FsScreenshotBlobs;

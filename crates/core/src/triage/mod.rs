//! Frame triage and keyframe selection.

pub mod heuristic;
pub mod keyframes;

pub use heuristic::{FrameCategory, HeuristicTriager, TriageResult};
pub use keyframes::{KeyframeSelector, ScreenshotCandidate, SelectedKeyframe, SelectorConfig};

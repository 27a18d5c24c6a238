//! Keyframe selection.
//!
//! Deterministic multi-factor selection of representative screenshots for
//! one hour: transition frames, high-diff frames and triage importance are
//! scored, a diversity window prevents clustering, and periodic anchors fill
//! coverage gaps. Ties break toward the earlier timestamp.

use chrono::{Duration, NaiveDateTime};
use trace_domain::constants::{
    DEFAULT_ANCHOR_INTERVAL_SECS, DEFAULT_DIVERSITY_WINDOW_SECS, DEFAULT_MAX_KEYFRAMES,
};

use super::heuristic::{FrameCategory, TriageResult};

/// A screenshot candidate for keyframe selection.
#[derive(Debug, Clone)]
pub struct ScreenshotCandidate {
    pub screenshot_id: String,
    pub path: String,
    pub timestamp: NaiveDateTime,
    pub monitor_id: i64,
    pub diff_score: f64,
    pub app_id: Option<String>,
    pub app_name: Option<String>,
    pub window_title: Option<String>,
    pub triage: Option<TriageResult>,
}

/// A selected keyframe with its selection provenance.
#[derive(Debug, Clone)]
pub struct SelectedKeyframe {
    pub screenshot_id: String,
    pub path: String,
    pub timestamp: NaiveDateTime,
    pub monitor_id: i64,
    pub diff_score: f64,
    /// transition, high_diff, importance, anchor or base.
    pub selection_reason: &'static str,
    pub combined_score: f64,
    pub app_name: Option<String>,
    pub window_title: Option<String>,
    pub triage: Option<TriageResult>,
}

/// Selector weights and limits.
#[derive(Debug, Clone)]
pub struct SelectorConfig {
    pub max_keyframes: usize,
    pub transition_weight: f64,
    pub diff_weight: f64,
    pub min_importance: f64,
    pub diversity_window_secs: i64,
    pub anchor_interval_secs: i64,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            max_keyframes: DEFAULT_MAX_KEYFRAMES,
            transition_weight: 1.0,
            diff_weight: 0.6,
            min_importance: 0.3,
            diversity_window_secs: DEFAULT_DIVERSITY_WINDOW_SECS,
            anchor_interval_secs: DEFAULT_ANCHOR_INTERVAL_SECS,
        }
    }
}

/// Deterministic keyframe selector.
#[derive(Debug, Default, Clone)]
pub struct KeyframeSelector {
    config: SelectorConfig,
}

impl KeyframeSelector {
    pub fn new(config: SelectorConfig) -> Self {
        Self { config }
    }

    /// Select keyframes from the hour's candidates, returned in timestamp
    /// order, at most `max_keyframes`.
    pub fn select(&self, candidates: &[ScreenshotCandidate]) -> Vec<SelectedKeyframe> {
        if candidates.is_empty() {
            return Vec::new();
        }

        let mut sorted: Vec<&ScreenshotCandidate> = candidates.iter().collect();
        sorted.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));

        let transitions = mark_transitions(&sorted);
        let scored = self.score(&sorted, &transitions);
        let mut selected = self.select_with_diversity(&scored);
        self.add_anchors(&mut selected, &sorted);

        selected.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        selected.truncate(self.config.max_keyframes);
        selected
    }

    fn score<'a>(
        &self,
        sorted: &[&'a ScreenshotCandidate],
        transitions: &[bool],
    ) -> Vec<(&'a ScreenshotCandidate, f64, &'static str, bool)> {
        let mut scored = Vec::with_capacity(sorted.len());

        for (index, candidate) in sorted.iter().enumerate() {
            let is_transition = transitions[index];
            let mut score = 0.0;
            let mut reason = "base";

            if is_transition {
                score += self.config.transition_weight;
                reason = "transition";
            }

            let diff_contribution = candidate.diff_score * self.config.diff_weight;
            score += diff_contribution;
            if diff_contribution > 0.4 && reason == "base" {
                reason = "high_diff";
            }

            if let Some(triage) = &candidate.triage {
                if triage.importance >= self.config.min_importance {
                    score += triage.importance * 0.5;

                    match triage.category {
                        FrameCategory::Document => score += 0.2,
                        FrameCategory::Creative => score += 0.15,
                        _ => {}
                    }

                    if triage.importance > 0.7 && reason != "transition" {
                        reason = "importance";
                    }
                }
            }

            scored.push((*candidate, score, reason, is_transition));
        }

        // Highest score first; equal scores break toward the earlier frame.
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.timestamp.cmp(&b.0.timestamp))
        });
        scored
    }

    fn select_with_diversity(
        &self,
        scored: &[(&ScreenshotCandidate, f64, &'static str, bool)],
    ) -> Vec<SelectedKeyframe> {
        let window = Duration::seconds(self.config.diversity_window_secs);
        let mut selected: Vec<SelectedKeyframe> = Vec::new();

        for &(candidate, score, reason, _) in scored {
            if selected.len() >= self.config.max_keyframes {
                break;
            }

            let too_close = selected.iter().any(|kf| {
                let gap = (candidate.timestamp - kf.timestamp).abs();
                gap < window
            });
            if too_close {
                continue;
            }

            selected.push(keyframe(candidate, score, reason));
        }


        selected
    }

    /// Insert the candidate nearest the midpoint of any coverage gap longer
    /// than the anchor interval.
    fn add_anchors(&self, selected: &mut Vec<SelectedKeyframe>, sorted: &[&ScreenshotCandidate]) {
        if sorted.is_empty() || selected.len() >= self.config.max_keyframes {
            return;
        }

        let interval = Duration::seconds(self.config.anchor_interval_secs);
        let mut chosen_ids: Vec<String> =
            selected.iter().map(|kf| kf.screenshot_id.clone()).collect();

        let mut check_points: Vec<NaiveDateTime> = Vec::new();
        check_points.push(sorted[0].timestamp);
        let mut by_time: Vec<NaiveDateTime> = selected.iter().map(|kf| kf.timestamp).collect();
        by_time.sort();
        check_points.extend(by_time);
        check_points.push(sorted[sorted.len() - 1].timestamp);

        for pair in check_points.windows(2) {
            if selected.len() >= self.config.max_keyframes {
                break;
            }
            let (gap_start, gap_end) = (pair[0], pair[1]);
            if gap_end - gap_start <= interval {
                continue;
            }

            let midpoint = gap_start + (gap_end - gap_start) / 2;
            let best = sorted
                .iter()
                .filter(|c| !chosen_ids.contains(&c.screenshot_id))
                .filter(|c| c.timestamp >= gap_start && c.timestamp <= gap_end)
                .min_by_key(|c| (c.timestamp - midpoint).abs());

            if let Some(candidate) = best {
                chosen_ids.push(candidate.screenshot_id.clone());
                selected.push(keyframe(candidate, 0.3, "anchor"));
            }
        }
    }
}

fn keyframe(candidate: &ScreenshotCandidate, score: f64, reason: &'static str) -> SelectedKeyframe {
    SelectedKeyframe {
        screenshot_id: candidate.screenshot_id.clone(),
        path: candidate.path.clone(),
        timestamp: candidate.timestamp,
        monitor_id: candidate.monitor_id,
        diff_score: candidate.diff_score,
        selection_reason: reason,
        combined_score: score,
        app_name: candidate.app_name.clone(),
        window_title: candidate.window_title.clone(),
        triage: candidate.triage.clone(),
    }
}

/// A frame is a transition when the app id changes, or the window title
/// changes with both sides non-empty.
fn mark_transitions(sorted: &[&ScreenshotCandidate]) -> Vec<bool> {
    let mut flags = Vec::with_capacity(sorted.len());
    let mut prev_app: Option<&str> = None;
    let mut prev_title: Option<&str> = None;
    let mut first = true;

    for candidate in sorted {
        let app = candidate.app_id.as_deref();
        let title = candidate.window_title.as_deref();

        let is_transition = if first {
            true
        } else if app != prev_app {
            true
        } else {
            title != prev_title && title.is_some() && prev_title.is_some()
        };

        flags.push(is_transition);
        prev_app = app;
        prev_title = title;
        first = false;
    }

    flags
}

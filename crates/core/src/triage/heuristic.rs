//! Screenshot triage: classify frames and score their importance.
//!
//! The heuristic mode runs by default and needs only metadata already in the
//! database. The optional vision mode lives behind the
//! [`crate::summarize::ports::VisionTriager`] port and returns the same
//! shape.

use serde::{Deserialize, Serialize};

/// Frame content categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameCategory {
    Transition,
    Document,
    Media,
    Browsing,
    Idle,
    Communication,
    Creative,
    Gaming,
    Other,
}

impl FrameCategory {
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "transition" => FrameCategory::Transition,
            "document" => FrameCategory::Document,
            "media" => FrameCategory::Media,
            "browsing" => FrameCategory::Browsing,
            "idle" => FrameCategory::Idle,
            "communication" => FrameCategory::Communication,
            "creative" => FrameCategory::Creative,
            "gaming" => FrameCategory::Gaming,
            _ => FrameCategory::Other,
        }
    }
}

/// Result of triaging a single screenshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriageResult {
    pub category: FrameCategory,
    /// Importance in `[0,1]`.
    pub importance: f64,
    pub has_text: bool,
    pub has_document: bool,
    pub has_media: bool,
    pub description: String,
}

/// App bundle-id prefix -> category map used by the heuristic triager.
const APP_CATEGORIES: &[(&str, FrameCategory)] = &[
    ("com.apple.Preview", FrameCategory::Document),
    ("com.adobe.Reader", FrameCategory::Document),
    ("com.microsoft.Word", FrameCategory::Document),
    ("com.microsoft.Excel", FrameCategory::Document),
    ("com.microsoft.PowerPoint", FrameCategory::Document),
    ("com.apple.Safari", FrameCategory::Browsing),
    ("com.google.Chrome", FrameCategory::Browsing),
    ("org.mozilla.firefox", FrameCategory::Browsing),
    ("com.apple.mail", FrameCategory::Communication),
    ("com.microsoft.Outlook", FrameCategory::Communication),
    ("com.tinyspeck.slackmacgap", FrameCategory::Communication),
    ("com.apple.MobileSMS", FrameCategory::Communication),
    ("us.zoom.xos", FrameCategory::Communication),
    ("com.spotify.client", FrameCategory::Media),
    ("com.apple.Music", FrameCategory::Media),
    ("com.apple.TV", FrameCategory::Media),
    ("tv.plex.", FrameCategory::Media),
    ("com.apple.Xcode", FrameCategory::Creative),
    ("com.microsoft.VSCode", FrameCategory::Creative),
    ("com.jetbrains.", FrameCategory::Creative),
    ("com.figma.Desktop", FrameCategory::Creative),
    ("com.adobe.Photoshop", FrameCategory::Creative),
    ("com.apple.Terminal", FrameCategory::Creative),
    ("com.valvesoftware.steam", FrameCategory::Gaming),
    ("com.apple.finder", FrameCategory::Other),
];

/// Metadata-only triage: app prefix drives the category, diff score drives
/// the importance.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeuristicTriager;

impl HeuristicTriager {
    pub fn triage(
        &self,
        app_id: Option<&str>,
        window_title: Option<&str>,
        diff_score: f64,
    ) -> TriageResult {
        let category = app_id
            .and_then(|id| {
                APP_CATEGORIES
                    .iter()
                    .find(|(prefix, _)| id.starts_with(prefix))
                    .map(|(_, cat)| *cat)
            })
            .unwrap_or(FrameCategory::Other);

        let mut importance = diff_score * 0.6 + 0.2;
        if matches!(category, FrameCategory::Document | FrameCategory::Creative) {
            importance += 0.1;
        }
        if category == FrameCategory::Transition {
            importance = importance.max(0.8);
        }
        let importance = importance.clamp(0.0, 1.0);

        let has_document = category == FrameCategory::Document;
        let has_media = category == FrameCategory::Media;
        let has_text = matches!(
            category,
            FrameCategory::Document
                | FrameCategory::Browsing
                | FrameCategory::Communication
                | FrameCategory::Creative
        );

        let app_label = app_id
            .map(|id| id.rsplit('.').next().unwrap_or(id).to_string())
            .unwrap_or_else(|| "Unknown".to_string());
        let description = match window_title {
            Some(title) => {
                let short: String = title.chars().take(50).collect();
                format!("{app_label} - {short}")
            }
            None => app_label,
        };

        TriageResult { category, importance, has_text, has_document, has_media, description }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categorizes_by_app_prefix() {
        let triager = HeuristicTriager;

        let code = triager.triage(Some("com.microsoft.VSCode"), Some("main.rs"), 0.5);
        assert_eq!(code.category, FrameCategory::Creative);
        assert!(code.has_text);
        assert!(!code.has_media);

        let doc = triager.triage(Some("com.apple.Preview"), Some("paper.pdf"), 0.5);
        assert_eq!(doc.category, FrameCategory::Document);
        assert!(doc.has_document);

        let unknown = triager.triage(Some("com.example.mystery"), None, 0.5);
        assert_eq!(unknown.category, FrameCategory::Other);
    }

    #[test]
    fn importance_formula() {
        let triager = HeuristicTriager;

        // Base: 0.2 + 0.6 * diff.
        let low = triager.triage(Some("com.apple.finder"), None, 0.0);
        assert!((low.importance - 0.2).abs() < 1e-9);

        // Category bonus for document/creative apps.
        let doc = triager.triage(Some("com.apple.Preview"), None, 0.5);
        assert!((doc.importance - (0.2 + 0.3 + 0.1)).abs() < 1e-9);

        // Clamped to [0, 1].
        let max = triager.triage(Some("com.apple.Xcode"), None, 1.0);
        assert!(max.importance <= 1.0);
    }

    #[test]
    fn description_includes_truncated_title() {
        let triager = HeuristicTriager;
        let long_title = "x".repeat(200);
        let result = triager.triage(Some("com.apple.Safari"), Some(&long_title), 0.3);
        assert!(result.description.starts_with("Safari - "));
        assert!(result.description.chars().count() <= "Safari - ".len() + 50);
    }

    #[test]
    fn category_lenient_parse() {
        assert_eq!(FrameCategory::parse_lenient("Document"), FrameCategory::Document);
        assert_eq!(FrameCategory::parse_lenient("weird"), FrameCategory::Other);
    }
}

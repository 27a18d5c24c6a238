//! Per-hour evidence aggregation under a token budget.

pub mod aggregator;
pub mod tokens;

pub use aggregator::{
    EventSummary, EvidenceAggregator, HourlyEvidence, NowPlayingSpan, TextSnippet,
};
pub use tokens::{HeuristicTokenCounter, TokenCounter};

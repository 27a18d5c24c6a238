//! BPE token counting shared by the evidence aggregator and summarizer.

use once_cell::sync::Lazy;
use tiktoken_rs::CoreBPE;
use trace_core::evidence::tokens::TokenCounter;

static CL100K: Lazy<Option<CoreBPE>> = Lazy::new(|| match tiktoken_rs::cl100k_base() {
    Ok(bpe) => Some(bpe),
    Err(err) => {
        tracing::warn!(error = %err, "cl100k_base unavailable, falling back to char estimate");
        None
    }
});

/// `cl100k_base` token counter with a chars/4 fallback when the encoding
/// cannot be loaded.
#[derive(Debug, Default, Clone, Copy)]
pub struct TiktokenCounter;

impl TokenCounter for TiktokenCounter {
    fn count(&self, text: &str) -> usize {
        match CL100K.as_ref() {
            Some(bpe) => bpe.encode_ordinary(text).len(),
            None => text.chars().count() / 4,
        }
    }

    fn truncate(&self, text: &str, max_tokens: usize) -> String {
        match CL100K.as_ref() {
            Some(bpe) => {
                let tokens = bpe.encode_ordinary(text);
                if tokens.len() <= max_tokens {
                    return text.to_string();
                }
                let keep = max_tokens.saturating_sub(1);
                match bpe.decode(tokens[..keep].to_vec()) {
                    Ok(mut truncated) => {
                        truncated.push_str("...");
                        truncated
                    }
                    Err(_) => {
                        let mut out: String =
                            text.chars().take(max_tokens.saturating_mul(4).saturating_sub(3)).collect();
                        out.push_str("...");
                        out
                    }
                }
            }
            None => {
                let budget = max_tokens * 4;
                if text.chars().count() <= budget {
                    return text.to_string();
                }
                let mut out: String = text.chars().take(budget.saturating_sub(3)).collect();
                out.push_str("...");
                out
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_real_tokens() {
        let counter = TiktokenCounter;
        assert_eq!(counter.count(""), 0);
        let count = counter.count("The quick brown fox jumps over the lazy dog.");
        assert!(count >= 8 && count <= 12, "unexpected token count {count}");
    }

    #[test]
    fn truncate_respects_budget_and_marks_cut() {
        let counter = TiktokenCounter;
        let text = "word ".repeat(500);

        let truncated = counter.truncate(&text, 50);
        assert!(truncated.ends_with("..."));
        assert!(counter.count(&truncated) <= 51);

        assert_eq!(counter.truncate("short text", 100), "short text");
    }
}

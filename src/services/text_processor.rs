// Text Processing Service
// Input normalization and token counting for classifier budgets

use regex::Regex;
use std::sync::OnceLock;

static SPACE_RE: OnceLock<Regex> = OnceLock::new();
static HSPACE_RE: OnceLock<Regex> = OnceLock::new();
static TOKEN_RE: OnceLock<Regex> = OnceLock::new();

fn space_re() -> &'static Regex {
    SPACE_RE.get_or_init(|| Regex::new(r"[\u{3000}\u{00A0}\u{2009}\u{202F}]").expect("valid space regex"))
}

fn hspace_re() -> &'static Regex {
    HSPACE_RE.get_or_init(|| Regex::new(r"[ \t\x0C\x0B]+").expect("valid whitespace regex"))
}

fn token_re() -> &'static Regex {
    TOKEN_RE.get_or_init(|| {
        Regex::new(r"[A-Za-z0-9_]+|[\u{4e00}-\u{9fff}]|[^\sA-Za-z0-9_]").expect("valid token regex")
    })
}

/// Normalize quotes, dashes and whitespace before analysis.
/// Paragraph breaks (blank lines) survive so the segmenter can still see them.
pub fn normalize_punctuation(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    let mut s = text
        .replace(['\u{201c}', '\u{201d}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'")
        .replace('\u{2014}', "-");

    s = space_re().replace_all(&s, " ").to_string();

    // Normalize line endings
    s = s.replace("\r\n", "\n").replace('\r', "\n");

    s = hspace_re().replace_all(&s, " ").to_string();

    s = s.lines().map(|ln| ln.trim()).collect::<Vec<_>>().join("\n");

    s.trim().to_string()
}

/// Token counting capability aligned with the classifier a chunk is sent to.
pub trait TokenCounter: Send + Sync {
    fn count_tokens(&self, text: &str) -> usize;
}

/// Tokenizer-free estimate: one token per word, per CJK character and per
/// punctuation mark. Long words count one extra token per 8 characters to
/// approximate subword splitting.
#[derive(Debug, Clone, Copy, Default)]
pub struct EstimatingTokenCounter;

impl TokenCounter for EstimatingTokenCounter {
    fn count_tokens(&self, text: &str) -> usize {
        token_re()
            .find_iter(text)
            .map(|m| {
                let chars = m.as_str().chars().count();
                1 + chars.saturating_sub(1) / 8
            })
            .sum()
    }
}

/// Shorthand for the default estimator.
pub fn estimate_tokens(text: &str) -> usize {
    EstimatingTokenCounter.count_tokens(text)
}

#[cfg(feature = "hf-tokenizer")]
pub use hf::HfTokenCounter;

#[cfg(feature = "hf-tokenizer")]
mod hf {
    use super::{estimate_tokens, TokenCounter};
    use std::path::Path;
    use tokenizers::Tokenizer;
    use tracing::warn;

    /// Counts tokens with the classifier's own `tokenizer.json`.
    pub struct HfTokenCounter {
        tokenizer: Tokenizer,
    }

    impl HfTokenCounter {
        pub fn from_file(path: &Path) -> Result<Self, String> {
            let tokenizer = Tokenizer::from_file(path)
                .map_err(|e| format!("Failed to load tokenizer {}: {}", path.display(), e))?;
            Ok(Self { tokenizer })
        }
    }

    impl TokenCounter for HfTokenCounter {
        fn count_tokens(&self, text: &str) -> usize {
            match self.tokenizer.encode(text, false) {
                Ok(encoding) => encoding.len(),
                Err(e) => {
                    warn!("[TOKENIZER] encode failed, using estimate: {}", e);
                    estimate_tokens(text)
                }
            }
        }
    }
}

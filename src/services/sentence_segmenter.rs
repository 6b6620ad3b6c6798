// Sentence Segmenter
// Deterministic rule-based sentence splitting with exact byte offsets
//
// Boundary rules:
// - A run of terminators (. ! ? … and the CJK 。！？) ends a sentence, together
//   with any closing quotes/brackets right after it.
// - Latin terminators only split when followed by whitespace or end of text,
//   so decimals ("3.14"), URLs and "e.g.x" stay intact. CJK terminators split
//   unconditionally.
// - A lone "." does not split after a known abbreviation, after a single
//   capital initial, or when the next sentence would start lowercase.
// - Nothing splits inside a double quote that closes within the same
//   paragraph. Unclosed quotes are ignored, and a straight quote right after
//   a digit with no quote open is read as an inch mark.
// - A blank line always splits.
// Whitespace between sentences is attached to the preceding span.

use crate::error::PipelineError;
use crate::models::SentenceSpan;
use tracing::debug;

/// Minimum trimmed input length (in chars) accepted before any model call.
pub const DEFAULT_MIN_CHARS: usize = 20;

const ABBREVIATIONS: &[&str] = &[
    "mr", "mrs", "ms", "dr", "prof", "sr", "jr", "st", "vs", "fig", "eq", "inc", "ltd", "co",
    "corp", "gen", "gov", "sen", "rep", "rev", "lt", "col", "capt", "sgt", "dept", "approx",
    "e.g", "i.e", "u.s", "u.k", "u.n", "a.m", "p.m", "jan", "feb", "mar", "apr", "jun", "jul",
    "aug", "sep", "sept", "oct", "nov", "dec", "mt",
];

fn is_terminator(c: char) -> bool {
    matches!(c, '.' | '!' | '?' | '…' | '。' | '！' | '？')
}

fn is_cjk_terminator(c: char) -> bool {
    matches!(c, '。' | '！' | '？')
}

fn is_closer(c: char) -> bool {
    matches!(c, '"' | '\'' | '”' | '’' | ')' | ']' | '»' | '」' | '』')
}

fn is_quote_opener(c: char) -> bool {
    matches!(c, '“' | '«' | '「' | '『')
}

fn is_quote_closer(c: char) -> bool {
    matches!(c, '”' | '»' | '」' | '』')
}

fn mark_between(mask: &mut [bool], open: usize, close: usize) {
    for slot in &mut mask[open + 1..close] {
        *slot = true;
    }
}

/// Marks every char that sits strictly between a matched quote pair.
///
/// Pairs never span a paragraph break; openers left unmatched at the end of
/// a paragraph mark nothing.
fn quoted_mask(chars: &[(usize, char)]) -> Vec<bool> {
    let n = chars.len();
    let mut mask = vec![false; n];
    let mut straight: Option<usize> = None;
    let mut curly: Vec<usize> = Vec::new();

    let mut i = 0usize;
    while i < n {
        let c = chars[i].1;
        if c.is_whitespace() && is_paragraph_break(chars, i) {
            straight = None;
            curly.clear();
            while i < n && chars[i].1.is_whitespace() {
                i += 1;
            }
            continue;
        }
        if c == '"' {
            match straight.take() {
                Some(open) => mark_between(&mut mask, open, i),
                None => {
                    let after_digit = i > 0 && chars[i - 1].1.is_ascii_digit();
                    if !after_digit {
                        straight = Some(i);
                    }
                }
            }
        } else if is_quote_opener(c) {
            curly.push(i);
        } else if is_quote_closer(c) {
            if let Some(open) = curly.pop() {
                mark_between(&mut mask, open, i);
            }
        }
        i += 1;
    }

    mask
}

/// Word immediately before position `dot` (letters, digits and inner dots).
fn word_before(chars: &[(usize, char)], dot: usize) -> String {
    let mut start = dot;
    while start > 0 {
        let c = chars[start - 1].1;
        if c.is_alphanumeric() || c == '.' {
            start -= 1;
        } else {
            break;
        }
    }
    chars[start..dot].iter().map(|(_, c)| *c).collect()
}

fn is_abbreviation(word: &str) -> bool {
    let word = word.trim_start_matches('.');
    if word.is_empty() {
        return false;
    }
    let mut letters = word.chars();
    if let (Some(first), None) = (letters.next(), letters.next()) {
        if first.is_uppercase() {
            return true;
        }
    }
    let lower = word.to_lowercase();
    ABBREVIATIONS.contains(&lower.as_str())
}

fn next_visible(chars: &[(usize, char)], from: usize) -> Option<char> {
    chars[from..].iter().map(|(_, c)| *c).find(|c| !c.is_whitespace())
}

fn is_paragraph_break(chars: &[(usize, char)], from: usize) -> bool {
    chars[from..]
        .iter()
        .take_while(|(_, c)| c.is_whitespace())
        .filter(|(_, c)| *c == '\n')
        .count()
        >= 2
}

/// Split `text` into contiguous sentence spans covering its trimmed range.
pub fn split_sentence_spans(text: &str) -> Vec<SentenceSpan> {
    let lead = text.len() - text.trim_start().len();
    let tail_end = text.trim_end().len();
    if lead >= tail_end {
        return Vec::new();
    }

    let chars: Vec<(usize, char)> = text[lead..tail_end]
        .char_indices()
        .map(|(i, c)| (i + lead, c))
        .collect();
    let n = chars.len();
    let offset = |idx: usize| if idx < n { chars[idx].0 } else { tail_end };

    let quoted = quoted_mask(&chars);
    let mut spans = Vec::new();
    let mut cur_start = lead;
    let mut i = 0usize;

    while i < n {
        let c = chars[i].1;

        if c.is_whitespace() {
            if is_paragraph_break(&chars, i) {
                let mut k = i;
                while k < n && chars[k].1.is_whitespace() {
                    k += 1;
                }
                spans.push(SentenceSpan::new(cur_start, offset(k)));
                cur_start = offset(k);
                i = k;
                continue;
            }
            i += 1;
            continue;
        }

        if !is_terminator(c) {
            i += 1;
            continue;
        }

        // Absorb the whole terminator run, then closing quotes/brackets.
        let mut j = i + 1;
        while j < n && is_terminator(chars[j].1) {
            j += 1;
        }
        let lone_dot = c == '.' && j == i + 1;
        let cjk = is_cjk_terminator(chars[j - 1].1);
        while j < n && is_closer(chars[j].1) {
            j += 1;
        }

        let followed_by_space = j >= n || chars[j].1.is_whitespace();
        let mut boundary = !quoted[j - 1] && (cjk || followed_by_space);

        if boundary && lone_dot && j < n {
            let word = word_before(&chars, i);
            let next_lower = next_visible(&chars, j).map(|ch| ch.is_lowercase()).unwrap_or(false);
            if is_abbreviation(&word) || next_lower {
                boundary = false;
            }
        }

        if !boundary {
            i = j;
            continue;
        }

        let mut k = j;
        while k < n && chars[k].1.is_whitespace() {
            k += 1;
        }
        spans.push(SentenceSpan::new(cur_start, offset(k)));
        cur_start = offset(k);
        i = k;
    }

    if cur_start < tail_end {
        spans.push(SentenceSpan::new(cur_start, tail_end));
    }

    spans
}

/// Input gate plus sentence splitting.
#[derive(Debug, Clone, Copy)]
pub struct SentenceSegmenter {
    min_chars: usize,
}

impl Default for SentenceSegmenter {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_CHARS)
    }
}

impl SentenceSegmenter {
    pub fn new(min_chars: usize) -> Self {
        Self { min_chars }
    }

    pub fn min_chars(&self) -> usize {
        self.min_chars
    }

    /// Reject input whose trimmed length is below the minimum.
    pub fn validate<'a>(&self, text: &'a str) -> Result<&'a str, PipelineError> {
        let trimmed = text.trim();
        let actual_chars = trimmed.chars().count();
        if trimmed.is_empty() || actual_chars < self.min_chars {
            return Err(PipelineError::InvalidInput {
                min_chars: self.min_chars,
                actual_chars,
            });
        }
        Ok(trimmed)
    }

    pub fn segment(&self, text: &str) -> Result<Vec<SentenceSpan>, PipelineError> {
        self.validate(text)?;
        let spans = split_sentence_spans(text);
        debug!("[SEGMENTER] {} sentences from {} bytes", spans.len(), text.len());
        Ok(spans)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contents(text: &str) -> Vec<String> {
        split_sentence_spans(text)
            .iter()
            .map(|s| s.content(text).to_string())
            .collect()
    }

    fn assert_total(text: &str) {
        let spans = split_sentence_spans(text);
        let trimmed = text.trim();
        let joined: String = spans.iter().map(|s| s.slice(text)).collect();
        assert_eq!(joined, trimmed);
        for pair in spans.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
        assert!(spans.iter().all(|s| !s.is_empty()));
    }

    #[test]
    fn test_basic_sentences() {
        let text = "The vote passed. Critics objected! Will it hold?";
        assert_eq!(
            contents(text),
            vec!["The vote passed.", "Critics objected!", "Will it hold?"]
        );
        assert_total(text);
    }

    #[test]
    fn test_whitespace_attaches_to_previous_span() {
        let text = "  One here.   Two here.  ";
        let spans = split_sentence_spans(text);
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].slice(text), "One here.   ");
        assert_eq!(spans[1].slice(text), "Two here.");
        assert_eq!(spans[0].start, 2);
    }

    #[test]
    fn test_abbreviations_and_initials() {
        let text = "Dr. Smith met John F. Kennedy in the U.S. Senate. They talked.";
        assert_eq!(
            contents(text),
            vec!["Dr. Smith met John F. Kennedy in the U.S. Senate.", "They talked."]
        );
    }

    #[test]
    fn test_decimal_and_lowercase_continuation() {
        let text = "Inflation hit 3.5 percent. prices rose again. Markets fell.";
        assert_eq!(
            contents(text),
            vec!["Inflation hit 3.5 percent. prices rose again.", "Markets fell."]
        );
    }

    #[test]
    fn test_quoted_terminators_stay_inside() {
        let text = "He said \"Stop. Now.\" Then he left. Done.";
        assert_eq!(
            contents(text),
            vec!["He said \"Stop. Now.\"", "Then he left.", "Done."]
        );
    }

    #[test]
    fn test_terminator_runs() {
        let text = "Really?! Yes... Okay.";
        assert_eq!(contents(text), vec!["Really?!", "Yes...", "Okay."]);
    }

    #[test]
    fn test_paragraph_break_splits_headline() {
        let text = "Senate Passes Budget\n\nThe bill now goes to the house.";
        assert_eq!(
            contents(text),
            vec!["Senate Passes Budget", "The bill now goes to the house."]
        );
        assert_total(text);
    }

    #[test]
    fn test_paragraph_break_resets_unbalanced_quote() {
        let text = "He said \"this never closes.\n\nNew paragraph. Second one.";
        assert_eq!(
            contents(text),
            vec!["He said \"this never closes.", "New paragraph.", "Second one."]
        );
    }

    #[test]
    fn test_inch_mark_does_not_suppress_splits() {
        let text = "The monitor measures 27\" across. It costs $300. Reviewers liked it. Sales rose. Stock fell.";
        assert_eq!(
            contents(text),
            vec![
                "The monitor measures 27\" across.",
                "It costs $300.",
                "Reviewers liked it.",
                "Sales rose.",
                "Stock fell.",
            ]
        );
        assert_total(text);
    }

    #[test]
    fn test_unclosed_quote_does_not_suppress_splits() {
        let text = "He said \"we will win. Polls disagree. Voters decide.";
        assert_eq!(
            contents(text),
            vec!["He said \"we will win.", "Polls disagree.", "Voters decide."]
        );
    }

    #[test]
    fn test_inch_mark_before_real_quote() {
        let text = "A 27\" panel. She said \"Buy it. Now.\" Sales rose.";
        assert_eq!(
            contents(text),
            vec!["A 27\" panel.", "She said \"Buy it. Now.\"", "Sales rose."]
        );
    }

    #[test]
    fn test_curly_quotes_pair_within_paragraph() {
        let text = "She wrote “Stop. Think.” Then she left. “Unclosed. Still splits.";
        assert_eq!(
            contents(text),
            vec![
                "She wrote “Stop. Think.”",
                "Then she left.",
                "“Unclosed.",
                "Still splits.",
            ]
        );
    }

    #[test]
    fn test_cjk_terminators() {
        let text = "这是第一句。这是第二句！这是第三句？";
        assert_eq!(contents(text), vec!["这是第一句。", "这是第二句！", "这是第三句？"]);
        assert_total(text);
    }

    #[test]
    fn test_no_terminator_is_one_sentence() {
        let text = "a headline without punctuation";
        assert_eq!(contents(text), vec![text]);
    }

    #[test]
    fn test_totality_on_mixed_inputs() {
        for text in [
            "  Leading space. Trailing space.  ",
            "Mr. Brown said (quietly.) that it was fine. Ok?",
            "Multiple\n\n\nbreaks\n\nhere. And \"quotes\" too.",
            "Ends mid sentence with no dot",
            "Email me at a.b@example.com. Thanks!",
        ] {
            assert_total(text);
        }
    }

    #[test]
    fn test_deterministic() {
        let text = "One. Two! Three? Four.";
        assert_eq!(split_sentence_spans(text), split_sentence_spans(text));
    }

    #[test]
    fn test_min_length_boundary() {
        let segmenter = SentenceSegmenter::new(20);
        let exact = "a".repeat(20);
        assert!(segmenter.segment(&exact).is_ok());

        let short = "a".repeat(19);
        match segmenter.segment(&short) {
            Err(PipelineError::InvalidInput {
                min_chars,
                actual_chars,
            }) => {
                assert_eq!(min_chars, 20);
                assert_eq!(actual_chars, 19);
            }
            other => panic!("expected InvalidInput, got {:?}", other),
        }
    }

    #[test]
    fn test_min_length_counts_trimmed_chars() {
        let segmenter = SentenceSegmenter::new(5);
        assert!(segmenter.validate("   abc   ").is_err());
        assert!(segmenter.validate("   ").is_err());
        assert_eq!(segmenter.validate("  你好世界啊  ").unwrap(), "你好世界啊");
    }
}

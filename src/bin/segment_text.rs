use anyhow::Context;
use clap::Parser;
use echolens_lib::models::{Chunk, SentenceSpan};
use echolens_lib::services::analysis::chunk_builder::{build_chunks, DEFAULT_TOKEN_BUDGET};
use echolens_lib::services::sentence_segmenter::{SentenceSegmenter, DEFAULT_MIN_CHARS};
use echolens_lib::services::text_processor::{normalize_punctuation, EstimatingTokenCounter, TokenCounter};
use serde::Serialize;
use std::path::PathBuf;

/// Print the sentence spans and classifier chunks a text would produce.
#[derive(Parser, Debug)]
#[command(name = "segment_text")]
struct Args {
    /// Plain-text input file
    path: PathBuf,
    /// Per-chunk token budget
    #[arg(long, default_value_t = DEFAULT_TOKEN_BUDGET)]
    budget: usize,
    /// Minimum accepted input length in characters
    #[arg(long, default_value_t = DEFAULT_MIN_CHARS)]
    min_chars: usize,
    /// Sentences to print
    #[arg(long, default_value_t = 50)]
    sentences: usize,
    /// Chunks to print
    #[arg(long, default_value_t = 20)]
    chunks: usize,
    /// Also write spans and chunks as JSON
    #[arg(long)]
    out: Option<PathBuf>,
}

fn preview(s: &str, max_chars: usize) -> String {
    let mut out: String = s.chars().take(max_chars).collect();
    if s.chars().count() > max_chars {
        out.push_str("...");
    }
    out.replace('\n', " ")
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let raw = std::fs::read_to_string(&args.path)
        .with_context(|| format!("read file failed: {}", args.path.display()))?;
    let text = normalize_punctuation(&raw);

    let segmenter = SentenceSegmenter::new(args.min_chars);
    let spans = segmenter.segment(&text)?;
    let counter = EstimatingTokenCounter;
    let chunks = build_chunks(&text, &spans, args.budget, &counter);

    println!("File: {}", args.path.display());
    println!("Text: {} chars ({} bytes)", text.chars().count(), text.len());
    println!("Token budget: {}", args.budget);
    println!();

    println!("Sentences: {}", spans.len());
    for (i, s) in spans.iter().take(args.sentences).enumerate() {
        let content = s.content(&text);
        println!(
            "[S{:04}] bytes=[{},{}] tokens={}  {}",
            i,
            s.start,
            s.end,
            counter.count_tokens(content),
            preview(content, 120)
        );
    }
    if spans.len() > args.sentences {
        println!("... ({} more sentences)", spans.len() - args.sentences);
    }
    println!();

    println!("Chunks: {}", chunks.len());
    for c in chunks.iter().take(args.chunks) {
        println!(
            "[C{:04}] bytes=[{},{}] tokens={} sentences={}{}  {}",
            c.index,
            c.start,
            c.end,
            c.token_count,
            c.sentence_count(),
            if c.is_oversized(args.budget) { " OVERSIZED" } else { "" },
            preview(c.classifier_input(), 140)
        );
    }
    if chunks.len() > args.chunks {
        println!("... ({} more chunks)", chunks.len() - args.chunks);
    }

    if let Some(out_path) = args.out {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Output<'a> {
            file: String,
            token_budget: usize,
            text_chars: usize,
            sentences: &'a [SentenceSpan],
            chunks: &'a [Chunk],
        }

        let out = Output {
            file: args.path.display().to_string(),
            token_budget: args.budget,
            text_chars: text.chars().count(),
            sentences: &spans,
            chunks: &chunks,
        };

        let json = serde_json::to_string_pretty(&out)?;
        std::fs::write(&out_path, json)
            .with_context(|| format!("write out failed: {}", out_path.display()))?;
        println!();
        println!("Wrote JSON: {}", out_path.display());
    }

    Ok(())
}

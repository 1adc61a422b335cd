use anyhow::{Context, Result};
use clap::Parser;
use prettytable::{Cell, Row as PrettyRow, Table};
use std::fs;
use std::path::PathBuf;

use condense::evaluation::{evaluate_summary, EvaluationResult};
use condense::logging::configure_cli_logging;

/// Score a summary against its source text, and optionally a reference summary
#[derive(Parser, Debug)]
#[clap(name = "evaluate-summary")]
struct Args {
    /// File containing the source document
    #[clap(required = true)]
    source: PathBuf,

    /// File containing the summary to score
    #[clap(required = true)]
    summary: PathBuf,

    /// Human-written reference summary for ROUGE and BLEU
    #[clap(short, long)]
    reference: Option<PathBuf>,

    /// Print the result as JSON
    #[clap(long)]
    json: bool,
}

fn read(path: &PathBuf) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

fn print_table(result: &EvaluationResult, with_reference: bool) {
    let m = &result.metrics;
    let mut rows: Vec<(&str, String)> = vec![
        ("Words", m.word_count.to_string()),
        ("Sentences", m.sentence_count.to_string()),
        ("Compression ratio", format!("{:.3}", m.compression_ratio)),
        ("Readability", format!("{:.3}", m.readability)),
        ("Coherence", format!("{:.3}", m.coherence)),
        ("Semantic similarity", format!("{:.3}", m.semantic_similarity)),
        ("Entity preservation", format!("{:.3}", result.entity_preservation)),
        ("Factual consistency", format!("{:.3}", result.factual_consistency)),
    ];
    if with_reference {
        rows.push(("ROUGE-1", format!("{:.3}", m.rouge1)));
        rows.push(("ROUGE-2", format!("{:.3}", m.rouge2)));
        rows.push(("ROUGE-L", format!("{:.3}", m.rouge_l)));
        rows.push(("BLEU", format!("{:.3}", m.bleu)));
    }
    rows.push(("Overall score", format!("{:.3}", result.overall_score)));
    rows.push(("Confidence", format!("{:.3}", result.confidence)));

    let mut table = Table::new();
    table.add_row(PrettyRow::new(vec![Cell::new("Metric"), Cell::new("Value")]));
    for (name, value) in rows {
        table.add_row(PrettyRow::new(vec![Cell::new(name), Cell::new(&value)]));
    }
    table.printstd();
}

fn main() -> Result<()> {
    configure_cli_logging();
    let args = Args::parse();

    let source = read(&args.source)?;
    let summary = read(&args.summary)?;
    let reference = args.reference.as_ref().map(read).transpose()?;

    let result = evaluate_summary(&source, &summary, reference.as_deref());

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_table(&result, reference.is_some());
    }
    Ok(())
}

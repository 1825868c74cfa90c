//! `mm ask` and `mm search` output.
//!
//! Both print to stdout; `--json` emits one pretty JSON document instead of
//! the human layout.

use anyhow::Result;

use marketmuse_core::answer::NO_GROUNDED_ANSWER;
use marketmuse_core::models::{Answer, Citation, ConversationTurn, RetrievalResult};

use crate::engine::{AskError, Engine};

pub async fn run_ask(
    engine: &Engine,
    question: &str,
    k: Option<usize>,
    document_ids: &[String],
    json: bool,
) -> Result<()> {
    let filter = (!document_ids.is_empty()).then_some(document_ids);
    match engine.ask(question, k, filter).await {
        Ok(turn) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&turn)?);
            } else {
                print_turn(&turn);
            }
            Ok(())
        }
        Err(AskError::Generation(failure)) => {
            if json {
                let body = serde_json::json!({
                    "error": { "code": failure.error.code(), "message": failure.error.to_string() },
                    "citations": failure.citations,
                });
                println!("{}", serde_json::to_string_pretty(&body)?);
            } else if !failure.citations.is_empty() {
                println!("Retrieved before generation failed:");
                print_citations(&failure.citations);
            }
            Err(failure.error.into())
        }
        Err(AskError::Retrieval(e)) => Err(e.into()),
    }
}

fn print_turn(turn: &ConversationTurn) {
    match &turn.answer {
        Answer::Grounded { text, citations } => {
            println!("{}", text.trim());
            println!();
            println!("Sources:");
            print_citations(citations);
        }
        Answer::NoGroundedAnswer => {
            println!("{}", NO_GROUNDED_ANSWER);
        }
    }
}

fn print_citations(citations: &[Citation]) {
    for (i, c) in citations.iter().enumerate() {
        println!(
            "  [{}] {}  chars {}  (relevance {:.2})",
            i + 1,
            c.filename,
            c.range,
            c.relevance
        );
    }
}

pub async fn run_search(
    engine: &Engine,
    query: &str,
    k: Option<usize>,
    document_ids: &[String],
    json: bool,
) -> Result<()> {
    let filter = (!document_ids.is_empty()).then_some(document_ids);
    let result = engine.retrieve(query, k, filter).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&result);
    }
    Ok(())
}

fn print_result(result: &RetrievalResult) {
    if result.is_empty() {
        println!("No results.");
        return;
    }
    for (i, hit) in result.passages.iter().enumerate() {
        println!(
            "{}. [{:.2}] {} #{}",
            i + 1,
            hit.relevance,
            hit.filename,
            hit.passage.ordinal
        );
        println!("    range: {}", hit.passage.range);
        println!("    excerpt: \"{}\"", excerpt(&hit.passage.text, 240));
        println!("    document: {}", hit.passage.document_id);
        println!();
    }
}

/// First `max` characters on one line, with an ellipsis when cut.
fn excerpt(text: &str, max: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    match flat.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...", &flat[..cut]),
        None => flat,
    }
}

//! Prompt assembly and grounded answering.
//!
//! The orchestrator turns a [`RetrievalResult`] into a bounded prompt,
//! hands it to a [`Generator`], and attaches citations for exactly the
//! passages the prompt contained.
//!
//! # Context budget
//!
//! Passages are added in rank order while the context section stays within
//! `max_context_chars`; the first passage that does not fit ends the
//! context, so the lowest-ranked passages are always the ones dropped. If
//! even the top passage does not fit it is truncated to the budget.

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::models::{Answer, Citation, OffsetRange, RetrievalResult};

/// Default context budget, in characters.
pub const DEFAULT_MAX_CONTEXT_CHARS: usize = 6000;

/// Shown in place of an answer when retrieval found nothing.
pub const NO_GROUNDED_ANSWER: &str =
    "I couldn't find anything in the uploaded documents that answers this question.";

pub const DEFAULT_INSTRUCTIONS: &str = "You are MarketMuse, an AI content strategist assistant. \
Answer the question using only the numbered context passages below. \
If the context does not contain the answer, say that you don't know instead of making one up.\n\n\
Where the context supports it, cover:\n\
1. Key insights from the context\n\
2. Content strategy recommendations\n\
3. Potential subtopics to explore\n\
4. SEO considerations";

/// External text generator (an LLM behind some API).
#[async_trait]
pub trait Generator: Send + Sync {
    fn model_name(&self) -> &str;
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// A generation error, with the citations of the passages that were sent.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{error}")]
pub struct GenerationFailure {
    #[source]
    pub error: Error,
    pub citations: Vec<Citation>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PromptConfig {
    pub max_context_chars: usize,
    pub instructions: String,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            max_context_chars: DEFAULT_MAX_CONTEXT_CHARS,
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
        }
    }
}

/// A rendered prompt and the passages it cites.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltPrompt {
    pub text: String,
    /// One per included passage, in prompt order.
    pub citations: Vec<Citation>,
    /// Passages left out because the budget ran out.
    pub dropped: usize,
    /// Whether the top passage had to be cut to fit.
    pub truncated: bool,
}

/// Render the prompt for `question` over `result`.
pub fn build_prompt(
    question: &str,
    result: &RetrievalResult,
    config: &PromptConfig,
) -> BuiltPrompt {
    let mut context = String::new();
    let mut used = 0usize;
    let mut citations = Vec::new();
    let mut truncated = false;

    for (i, hit) in result.passages.iter().enumerate() {
        let header = format!(
            "[{}] {} (chars {}, relevance {:.2})\n",
            i + 1,
            hit.filename,
            hit.passage.range,
            hit.relevance
        );
        let header_len = header.chars().count();
        let body_len = hit.passage.text.chars().count();
        let block_len = header_len + body_len + 2;

        if used + block_len <= config.max_context_chars {
            context.push_str(&header);
            context.push_str(&hit.passage.text);
            context.push_str("\n\n");
            used += block_len;
        } else if citations.is_empty() {
            // The cited range covers only the characters the prompt kept.
            // The shortened header is never longer than the one sized above.
            let room = config.max_context_chars.saturating_sub(header_len + 2);
            let body: String = hit.passage.text.chars().take(room).collect();
            let start = hit.passage.range.start;
            let range = OffsetRange::new(start, start + body.chars().count());
            context.push_str(&format!(
                "[{}] {} (chars {}, relevance {:.2})\n",
                i + 1,
                hit.filename,
                range,
                hit.relevance
            ));
            context.push_str(&body);
            context.push_str("\n\n");
            let mut citation = Citation::from(hit);
            citation.range = range;
            citations.push(citation);
            truncated = true;
            break;
        } else {
            break;
        }
        citations.push(Citation::from(hit));
    }

    let text = format!(
        "{}\n\nContext:\n{}Question: {}\n\nAnswer:",
        config.instructions,
        context,
        question.trim()
    );
    BuiltPrompt {
        text,
        dropped: result.passages.len() - citations.len(),
        citations,
        truncated,
    }
}

pub struct Orchestrator<'a> {
    generator: &'a dyn Generator,
    config: PromptConfig,
}

impl<'a> Orchestrator<'a> {
    pub fn new(generator: &'a dyn Generator, config: PromptConfig) -> Self {
        Self { generator, config }
    }

    /// Answer `question` from `result`.
    ///
    /// An empty result short-circuits to [`Answer::NoGroundedAnswer`]
    /// without calling the generator.
    pub async fn answer(
        &self,
        question: &str,
        result: &RetrievalResult,
    ) -> std::result::Result<Answer, GenerationFailure> {
        if result.is_empty() {
            return Ok(Answer::NoGroundedAnswer);
        }

        let prompt = build_prompt(question, result, &self.config);
        if prompt.dropped > 0 || prompt.truncated {
            tracing::debug!(
                dropped = prompt.dropped,
                truncated = prompt.truncated,
                budget = self.config.max_context_chars,
                "context trimmed to fit prompt budget"
            );
        }

        let fail = |error: Error| GenerationFailure {
            error,
            citations: prompt.citations.clone(),
        };
        let text = self.generator.generate(&prompt.text).await.map_err(|e| match e {
            Error::GenerationService(_) => fail(e),
            other => fail(Error::GenerationService(other.to_string())),
        })?;
        let text = text.trim();
        if text.is_empty() {
            return Err(fail(Error::GenerationService(
                "generator returned an empty completion".to_string(),
            )));
        }

        Ok(Answer::Grounded {
            text: text.to_string(),
            citations: prompt.citations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Passage, RetrievedPassage};
    use std::sync::Mutex;

    struct Scripted {
        reply: Result<String>,
        prompts: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn replying(reply: Result<String>) -> Self {
            Self {
                reply,
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Generator for Scripted {
        fn model_name(&self) -> &str {
            "scripted"
        }

        async fn generate(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.reply.clone()
        }
    }

    fn hit(n: usize, text: &str, relevance: f32) -> RetrievedPassage {
        RetrievedPassage {
            passage: Passage {
                id: format!("p{}", n),
                document_id: format!("d{}", n),
                ordinal: 0,
                text: text.to_string(),
                range: OffsetRange::new(0, text.chars().count()),
                hash: format!("h{}", n),
            },
            filename: format!("doc{}.txt", n),
            distance: 1.0 - relevance,
            relevance,
        }
    }

    fn result(hits: Vec<RetrievedPassage>) -> RetrievalResult {
        RetrievalResult {
            query: "q".to_string(),
            passages: hits,
        }
    }

    #[tokio::test]
    async fn test_empty_result_skips_generator() {
        let generator = Scripted::replying(Ok("unused".to_string()));
        let orchestrator = Orchestrator::new(&generator, PromptConfig::default());
        let answer = orchestrator.answer("q", &result(Vec::new())).await.unwrap();
        assert_eq!(answer, Answer::NoGroundedAnswer);
        assert_eq!(generator.calls(), 0);
    }

    #[tokio::test]
    async fn test_grounded_answer_cites_included_passages() {
        let generator = Scripted::replying(Ok("  Align calendars with launches.  ".to_string()));
        let orchestrator = Orchestrator::new(&generator, PromptConfig::default());
        let r = result(vec![hit(1, "Calendars align with launches.", 0.9), hit(2, "Other.", 0.5)]);

        let answer = orchestrator.answer("When?", &r).await.unwrap();
        match answer {
            Answer::Grounded { text, citations } => {
                assert_eq!(text, "Align calendars with launches.");
                assert_eq!(citations.len(), 2);
                assert_eq!(citations[0].filename, "doc1.txt");
                assert_eq!(citations[0].range, OffsetRange::new(0, 30));
            }
            other => panic!("expected grounded answer, got {:?}", other),
        }
        let prompts = generator.prompts.lock().unwrap();
        assert!(prompts[0].contains("Calendars align with launches."));
        assert!(prompts[0].contains("Question: When?"));
    }

    #[tokio::test]
    async fn test_generation_error_keeps_citations() {
        let generator =
            Scripted::replying(Err(Error::GenerationService("HTTP 503".to_string())));
        let orchestrator = Orchestrator::new(&generator, PromptConfig::default());
        let r = result(vec![hit(1, "Calendars align with launches.", 0.9)]);

        let failure = orchestrator.answer("When?", &r).await.unwrap_err();
        assert_eq!(failure.error, Error::GenerationService("HTTP 503".to_string()));
        assert_eq!(failure.citations.len(), 1);
        assert_eq!(failure.citations[0].document_id, "d1");
    }

    #[tokio::test]
    async fn test_empty_completion_is_an_error() {
        let generator = Scripted::replying(Ok("   ".to_string()));
        let orchestrator = Orchestrator::new(&generator, PromptConfig::default());
        let r = result(vec![hit(1, "Some context.", 0.9)]);
        let failure = orchestrator.answer("q", &r).await.unwrap_err();
        assert!(matches!(failure.error, Error::GenerationService(_)));
    }

    #[test]
    fn test_budget_drops_lowest_ranked_first() {
        let r = result(vec![
            hit(1, &"a".repeat(100), 0.9),
            hit(2, &"b".repeat(100), 0.8),
            hit(3, &"c".repeat(100), 0.7),
        ]);
        let config = PromptConfig {
            max_context_chars: 300,
            ..PromptConfig::default()
        };
        let prompt = build_prompt("q", &r, &config);
        assert_eq!(prompt.citations.len(), 2);
        assert_eq!(prompt.dropped, 1);
        assert!(prompt.text.contains(&"b".repeat(100)));
        assert!(!prompt.text.contains("ccc"));
    }

    #[test]
    fn test_oversized_top_passage_truncated() {
        let r = result(vec![hit(1, &"a".repeat(500), 0.9), hit(2, "short", 0.8)]);
        let config = PromptConfig {
            max_context_chars: 120,
            ..PromptConfig::default()
        };
        let prompt = build_prompt("q", &r, &config);
        assert!(prompt.truncated);
        assert_eq!(prompt.citations.len(), 1);
        assert_eq!(prompt.dropped, 1);
        assert!(!prompt.text.contains(&"a".repeat(200)));
    }

    #[test]
    fn test_truncated_citation_covers_only_prompted_chars() {
        let mut top = hit(1, &"a".repeat(500), 0.9);
        top.passage.range = OffsetRange::new(40, 540);
        let config = PromptConfig {
            max_context_chars: 120,
            ..PromptConfig::default()
        };
        let prompt = build_prompt("q", &result(vec![top]), &config);
        assert!(prompt.truncated);

        let range = prompt.citations[0].range;
        assert_eq!(range.start, 40);
        assert!(range.len() < 120, "cited {} chars", range.len());
        assert!(prompt.text.contains(&"a".repeat(range.len())));
        assert!(!prompt.text.contains(&"a".repeat(range.len() + 1)));
        assert!(prompt.text.contains(&format!("chars {}", range)));
    }
}

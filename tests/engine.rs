//! End-to-end tests over a real SQLite store, using the deterministic hash
//! embedder and a scripted generator.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use marketmuse::config::Config;
use marketmuse::engine::{AskError, Engine};
use marketmuse::ingest::{IngestStatus, Upload};
use marketmuse::progress::NoProgress;
use marketmuse_core::answer::Generator;
use marketmuse_core::embedding::HashEmbedder;
use marketmuse_core::models::{Answer, OffsetRange};
use marketmuse_core::Error;

const DIMS: usize = 256;

struct Scripted {
    reply: Result<String, String>,
    prompts: Mutex<Vec<String>>,
}

impl Scripted {
    fn ok(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Ok(reply.to_string()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Err(message.to_string()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Generator for Scripted {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, prompt: &str) -> marketmuse_core::Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.reply.clone().map_err(Error::GenerationService)
    }
}

fn test_config(tmp: &TempDir) -> Config {
    let mut config = Config::with_db(tmp.path().join("data/mm.sqlite"));
    config.embedding.provider = "hash".to_string();
    config.embedding.dims = Some(DIMS);
    config.generation.provider = "disabled".to_string();
    config.chunking.chunk_size = 200;
    config.chunking.overlap = 40;
    config.retrieval.min_relevance = 0.0;
    config
}

async fn open(config: &Config, generator: Arc<Scripted>) -> Engine {
    Engine::open_with(config, Arc::new(HashEmbedder::new(DIMS)), generator)
        .await
        .unwrap()
}

fn upload(name: &str, text: &str) -> Upload {
    Upload::bytes(name, text.as_bytes().to_vec())
}

fn document_id(status: &IngestStatus) -> String {
    match status {
        IngestStatus::Ingested { document_id, .. } | IngestStatus::Unchanged { document_id } => {
            document_id.clone()
        }
        IngestStatus::Failed { code, message } => panic!("ingest failed: {} {}", code, message),
    }
}

const SPRING: &str = "Our spring campaign targets first-time buyers with email and short video.";

fn launch_plan() -> String {
    [
        "The product launch starts with a teaser email to existing customers.",
        "Two weeks before the product launch we publish the landing page.",
        "Paid social for the product launch runs for three weeks.",
        "Influencer posts support the product launch in the second week.",
        "After the product launch we send a survey to new customers.",
        "The product launch budget is split between search and social.",
        "Press outreach for the product launch begins one week early.",
        "A webinar recap closes the product launch campaign.",
    ]
    .join(" ")
}

#[tokio::test]
async fn single_document_answer_cites_its_passage() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let generator = Scripted::ok("  It targets first-time buyers.  ");
    let engine = open(&config, Arc::clone(&generator)).await;

    let report = engine
        .ingest(vec![upload("spring-campaign.txt", SPRING)], &NoProgress)
        .await
        .unwrap();
    assert_eq!(report.ingested(), 1);

    let turn = engine
        .ask("What does our spring campaign target with email and short video?", None, None)
        .await
        .unwrap();

    match &turn.answer {
        Answer::Grounded { text, citations } => {
            assert_eq!(text, "It targets first-time buyers.");
            assert_eq!(citations.len(), 1);
            assert_eq!(citations[0].filename, "spring-campaign.txt");
            assert_eq!(citations[0].range, OffsetRange::new(0, SPRING.chars().count()));
            assert!(citations[0].relevance > 0.0 && citations[0].relevance <= 1.0);
        }
        Answer::NoGroundedAnswer => panic!("expected a grounded answer"),
    }
    assert_eq!(turn.retrieved.len(), 1);

    let prompts = generator.calls();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains(SPRING));
}

#[tokio::test]
async fn empty_corpus_has_no_grounded_answer() {
    let tmp = TempDir::new().unwrap();
    let generator = Scripted::ok("should not be called");
    let engine = open(&test_config(&tmp), Arc::clone(&generator)).await;

    let turn = engine.ask("What is our Q3 plan?", None, None).await.unwrap();
    assert_eq!(turn.answer, Answer::NoGroundedAnswer);
    assert!(turn.retrieved.is_empty());
    assert!(generator.calls().is_empty());
}

#[tokio::test]
async fn unrelated_question_falls_below_threshold() {
    let tmp = TempDir::new().unwrap();
    let mut config = test_config(&tmp);
    config.retrieval.min_relevance = 0.5;
    let generator = Scripted::ok("unused");
    let engine = open(&config, Arc::clone(&generator)).await;

    engine
        .ingest(vec![upload("spring-campaign.txt", SPRING)], &NoProgress)
        .await
        .unwrap();

    let turn = engine
        .ask("zebra quantum volcano orchestra", None, None)
        .await
        .unwrap();
    assert_eq!(turn.answer, Answer::NoGroundedAnswer);
    assert!(generator.calls().is_empty());
}

#[tokio::test]
async fn retrieved_passages_of_one_document_do_not_overlap() {
    let tmp = TempDir::new().unwrap();
    let engine = open(&test_config(&tmp), Scripted::ok("ok")).await;

    let report = engine
        .ingest(vec![upload("launch.md", &launch_plan())], &NoProgress)
        .await
        .unwrap();
    match &report.documents[0].status {
        IngestStatus::Ingested { passages, .. } => assert!(*passages > 2),
        other => panic!("unexpected status {:?}", other),
    }

    let result = engine
        .retrieve("product launch plan for customers", Some(4), None)
        .await
        .unwrap();
    assert!(!result.is_empty());
    assert!(result.len() <= 4);
    for (i, a) in result.passages.iter().enumerate() {
        for b in &result.passages[i + 1..] {
            assert!(
                !a.passage.range.overlaps(&b.passage.range),
                "{} overlaps {}",
                a.passage.range,
                b.passage.range
            );
        }
    }
    for pair in result.passages.windows(2) {
        assert!(pair[0].relevance >= pair[1].relevance);
    }
}

#[tokio::test]
async fn document_filter_restricts_results() {
    let tmp = TempDir::new().unwrap();
    let engine = open(&test_config(&tmp), Scripted::ok("ok")).await;

    let report = engine
        .ingest(
            vec![
                upload("launch.md", &launch_plan()),
                upload("launch-copy.txt", &launch_plan().replace("product", "brand")),
            ],
            &NoProgress,
        )
        .await
        .unwrap();
    let wanted = document_id(&report.documents[1].status);

    let filter = vec![wanted.clone()];
    let result = engine
        .retrieve("product launch budget", Some(3), Some(&filter))
        .await
        .unwrap();
    assert!(!result.is_empty());
    assert!(result.passages.iter().all(|p| p.passage.document_id == wanted));

    let none = engine
        .retrieve("product launch budget", Some(3), Some(&["missing".to_string()]))
        .await
        .unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn generation_failure_keeps_citations() {
    let tmp = TempDir::new().unwrap();
    let engine = open(&test_config(&tmp), Scripted::failing("upstream 503")).await;

    engine
        .ingest(vec![upload("spring-campaign.txt", SPRING)], &NoProgress)
        .await
        .unwrap();

    let err = engine
        .ask("Who does our spring campaign target?", None, None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "generation_service");
    assert_eq!(err.citations().len(), 1);
    assert!(matches!(err, AskError::Generation(_)));
}

#[tokio::test]
async fn corpus_survives_reopen() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);

    let engine = open(&config, Scripted::ok("ok")).await;
    engine
        .ingest(vec![upload("launch.md", &launch_plan())], &NoProgress)
        .await
        .unwrap();
    let before = engine
        .retrieve("press outreach for the product launch", Some(2), None)
        .await
        .unwrap();
    let stats_before = engine.stats().await.unwrap();
    engine.close().await;

    let engine = open(&config, Scripted::ok("ok")).await;
    let after = engine
        .retrieve("press outreach for the product launch", Some(2), None)
        .await
        .unwrap();
    let stats_after = engine.stats().await.unwrap();

    assert_eq!(stats_after.store.documents, 1);
    assert_eq!(stats_after.store.passages, stats_before.store.passages);
    assert_eq!(stats_after.store.vectors, stats_before.store.vectors);
    assert_eq!(
        before.passages.iter().map(|p| &p.passage.id).collect::<Vec<_>>(),
        after.passages.iter().map(|p| &p.passage.id).collect::<Vec<_>>()
    );
    assert_eq!(stats_after.index_meta.unwrap().model, format!("hash-{}", DIMS));
}

#[tokio::test]
async fn reingest_is_unchanged_or_replaces() {
    let tmp = TempDir::new().unwrap();
    let engine = open(&test_config(&tmp), Scripted::ok("ok")).await;

    let first = engine
        .ingest(vec![upload("plan.txt", SPRING)], &NoProgress)
        .await
        .unwrap();
    let again = engine
        .ingest(vec![upload("plan.txt", SPRING)], &NoProgress)
        .await
        .unwrap();
    assert_eq!(again.unchanged(), 1);

    let replaced = engine
        .ingest(vec![upload("plan.txt", &launch_plan())], &NoProgress)
        .await
        .unwrap();
    match &replaced.documents[0].status {
        IngestStatus::Ingested { replaced, .. } => {
            assert_eq!(replaced, &vec![document_id(&first.documents[0].status)]);
        }
        other => panic!("unexpected status {:?}", other),
    }
    assert_eq!(engine.stats().await.unwrap().store.documents, 1);
}

#[tokio::test]
async fn unsupported_upload_fails_alone() {
    let tmp = TempDir::new().unwrap();
    let engine = open(&test_config(&tmp), Scripted::ok("ok")).await;

    let report = engine
        .ingest(
            vec![
                Upload::bytes("deck.key", vec![0u8, 1, 2, 3]),
                upload("spring-campaign.txt", SPRING),
            ],
            &NoProgress,
        )
        .await
        .unwrap();

    assert_eq!(report.documents[0].filename, "deck.key");
    assert!(matches!(
        &report.documents[0].status,
        IngestStatus::Failed { code, .. } if code == "unsupported_format"
    ));
    assert_eq!(report.ingested(), 1);
}

#[tokio::test]
async fn changed_embedder_requires_reindex() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);

    let engine = Engine::open_with(&config, Arc::new(HashEmbedder::new(64)), Scripted::ok("ok"))
        .await
        .unwrap();
    engine
        .ingest(vec![upload("launch.md", &launch_plan())], &NoProgress)
        .await
        .unwrap();
    let passages = engine.stats().await.unwrap().store.passages;
    engine.close().await;

    let engine = open(&config, Scripted::ok("ok")).await;
    let err = engine.retrieve("product launch", None, None).await.unwrap_err();
    assert_eq!(err.code(), "dimension_mismatch");
    assert!(engine.stats().await.unwrap().reindex_required);
    assert!(engine
        .ingest(vec![upload("more.txt", SPRING)], &NoProgress)
        .await
        .is_err());

    assert_eq!(engine.reindex().await.unwrap(), passages);
    assert!(!engine.stats().await.unwrap().reindex_required);
    let result = engine.retrieve("product launch", None, None).await.unwrap();
    assert!(!result.is_empty());
}

#[tokio::test]
async fn reset_empties_corpus() {
    let tmp = TempDir::new().unwrap();
    let generator = Scripted::ok("ok");
    let engine = open(&test_config(&tmp), Arc::clone(&generator)).await;

    engine
        .ingest(vec![upload("spring-campaign.txt", SPRING)], &NoProgress)
        .await
        .unwrap();
    engine.reset().await.unwrap();

    let stats = engine.stats().await.unwrap();
    assert_eq!(stats.store.documents, 0);
    assert_eq!(stats.store.vectors, 0);
    assert!(stats.index_meta.is_none());

    let turn = engine
        .ask("What does our spring campaign target?", None, None)
        .await
        .unwrap();
    assert_eq!(turn.answer, Answer::NoGroundedAnswer);
    assert!(generator.calls().is_empty());
}

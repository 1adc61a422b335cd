mod common;

use chrono::Utc;
use std::time::Duration;
use tokio::sync::watch;

use common::{Harness, Options, ARTICLE, REPLY};
use condense::config::{LengthPreset, Mode, SummarizationConfig};
use condense::error::SummarizeError;
use condense::pipeline::UserTiers;
use condense::engine::extractive::BUILTIN_EXTRACTIVE_VERSION;
use condense::rate_limit::{RateLimitConfig, TierQuotas};
use condense::types::UserTier;

fn extractive() -> SummarizationConfig {
    SummarizationConfig::new(Mode::Extractive, LengthPreset::Short)
}

fn abstractive() -> SummarizationConfig {
    SummarizationConfig::new(Mode::Abstractive, LengthPreset::Short)
}

fn premium(user_id: &str) -> UserTiers {
    UserTiers::new(UserTier::Free).with_user(user_id, UserTier::Premium)
}

#[tokio::test]
async fn test_cache_hit_is_served_before_admission() {
    let harness = Harness::new(Options {
        rate_limits: RateLimitConfig::parse("summarize|1|60|300").unwrap(),
        ..Options::default()
    })
    .await;

    let first = harness
        .pipeline
        .summarize(ARTICLE, &extractive(), "alice")
        .await
        .unwrap();
    assert_eq!(first.method, "extractive");

    // Identical request: answered from cache although the limit is used up.
    let second = harness
        .pipeline
        .summarize(ARTICLE, &extractive(), "alice")
        .await
        .unwrap();
    assert_eq!(second.id, first.id);
    assert_eq!(second.summary, first.summary);

    let usage = harness.usage("alice").await;
    assert_eq!(usage.len(), 1);
    assert_eq!(usage[0].requests, 1);

    let err = harness
        .pipeline
        .summarize(&format!("{} A new depot opens next year.", ARTICLE), &extractive(), "alice")
        .await
        .unwrap_err();
    assert!(matches!(err, SummarizeError::RateLimited { .. }));
}

#[tokio::test]
async fn test_rate_limit_blocks_after_max_requests() {
    let harness = Harness::new(Options {
        rate_limits: RateLimitConfig::parse("summarize|2|60|300").unwrap(),
        ..Options::default()
    })
    .await;

    for extra in ["One more line was added.", "Another line was added."] {
        harness
            .pipeline
            .summarize(&format!("{} {}", ARTICLE, extra), &extractive(), "bob")
            .await
            .unwrap();
    }

    let err = harness
        .pipeline
        .summarize(&format!("{} A third line was added.", ARTICLE), &extractive(), "bob")
        .await
        .unwrap_err();
    match err {
        SummarizeError::RateLimited { blocked_until, .. } => {
            assert!(blocked_until.is_some_and(|until| until > Utc::now()));
        }
        other => panic!("expected rate limit, got {:?}", other),
    }

    // Other users are unaffected.
    assert!(harness
        .pipeline
        .summarize(ARTICLE, &extractive(), "carol")
        .await
        .is_ok());
}

#[tokio::test]
async fn test_monthly_quota_is_enforced() {
    let harness = Harness::new(Options {
        quotas: TierQuotas::parse("free=10").unwrap(),
        ..Options::default()
    })
    .await;

    harness
        .pipeline
        .summarize(ARTICLE, &extractive(), "dave")
        .await
        .unwrap();

    let err = harness
        .pipeline
        .summarize(&format!("{} Extra text.", ARTICLE), &extractive(), "dave")
        .await
        .unwrap_err();
    match err {
        SummarizeError::QuotaExceeded { used, limit, .. } => {
            assert!(used >= limit);
            assert_eq!(limit, 10);
        }
        other => panic!("expected quota error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_free_tier_uses_fast_backend() {
    let harness = Harness::new(Options::default()).await;

    let result = harness
        .pipeline
        .summarize(ARTICLE, &abstractive(), "erin")
        .await
        .unwrap();

    assert_eq!(result.method, "abstractive");
    assert_eq!(result.summary, REPLY);
    assert_eq!(harness.ollama.calls(), 1);
    assert_eq!(harness.openai.calls(), 0);

    let usage = harness.usage("erin").await;
    assert!(usage[0].tokens_used > 0);
    assert!(usage[0].cost > 0.0);
}

#[tokio::test]
async fn test_premium_request_fails_over_to_registry_fallback() {
    let harness = Harness::new(Options {
        openai_failures: u32::MAX,
        tiers: premium("fran"),
        ..Options::default()
    })
    .await;

    let result = harness
        .pipeline
        .summarize(ARTICLE, &abstractive(), "fran")
        .await
        .unwrap();

    assert_eq!(result.method, "abstractive");
    assert!(result.model_version.starts_with("fast-abstractive"));
    assert_eq!(harness.openai.calls(), 3);
    assert_eq!(harness.ollama.calls(), 1);
}

#[tokio::test]
async fn test_degraded_results_are_not_cached() {
    let harness = Harness::new(Options {
        openai_failures: u32::MAX,
        ollama_failures: u32::MAX,
        tiers: premium("gus"),
        ..Options::default()
    })
    .await;

    let first = harness
        .pipeline
        .summarize(ARTICLE, &abstractive(), "gus")
        .await
        .unwrap();
    assert!(first.method.ends_with("(fallback)"));
    assert!(!first.summary.is_empty());
    let calls = harness.backend_calls();

    let second = harness
        .pipeline
        .summarize(ARTICLE, &abstractive(), "gus")
        .await
        .unwrap();
    assert_ne!(second.id, first.id);
    assert!(harness.backend_calls() > calls);

    // Degraded output is free.
    let usage = harness.usage("gus").await;
    assert_eq!(usage[0].requests, 2);
    assert_eq!(usage[0].cost, 0.0);
}

#[tokio::test]
async fn test_cancelled_request_writes_nothing() {
    let harness = Harness::new(Options {
        backend_delay: Duration::from_secs(5),
        ..Options::default()
    })
    .await;

    let (cancel_tx, cancel_rx) = watch::channel(false);
    let caller = harness.pipeline.caller("hana");
    let request = {
        let pipeline = harness.pipeline.clone();
        let caller = caller.clone();
        tokio::spawn(async move {
            pipeline
                .summarize_with_cancel(ARTICLE, &abstractive(), &caller, cancel_rx)
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel_tx.send(true).unwrap();

    let err = request.await.unwrap().unwrap_err();
    assert!(matches!(err, SummarizeError::Cancelled));
    assert!(harness.usage("hana").await.is_empty());
    assert_eq!(harness.pipeline.cache().stats().hits, 0);
}

#[tokio::test]
async fn test_invalid_requests_are_rejected_without_billing() {
    let harness = Harness::new(Options::default()).await;

    let err = harness
        .pipeline
        .summarize("   ", &extractive(), "ivan")
        .await
        .unwrap_err();
    assert!(matches!(err, SummarizeError::Validation { .. }));

    let custom = SummarizationConfig::new(Mode::Extractive, LengthPreset::Custom);
    let err = harness
        .pipeline
        .summarize(ARTICLE, &custom, "ivan")
        .await
        .unwrap_err();
    assert!(matches!(err, SummarizeError::Validation { .. }));

    let huge = "word ".repeat(11_000);
    let err = harness
        .pipeline
        .summarize(&huge, &extractive(), "ivan")
        .await
        .unwrap_err();
    assert!(matches!(err, SummarizeError::Validation { .. }));

    assert!(harness.usage("ivan").await.is_empty());
}

#[tokio::test]
async fn test_summary_is_persisted_with_metrics() {
    let harness = Harness::new(Options::default()).await;

    let config = SummarizationConfig::new(Mode::Extractive, LengthPreset::Long);
    let result = harness
        .pipeline
        .summarize(ARTICLE, &config, "jack")
        .await
        .unwrap();

    assert!(result.confidence > 0.0 && result.confidence <= 1.0);
    assert!(result.metrics.compression_ratio > 0.0 && result.metrics.compression_ratio < 1.0);
    assert!(result.metrics.sentence_count > 1 && result.metrics.sentence_count <= 5);

    let stored = harness
        .pipeline
        .get_summary(result.id)
        .await
        .unwrap()
        .expect("summary should be stored");
    assert_eq!(stored.summary, result.summary);
    assert_eq!(stored.config, config);
}

#[tokio::test]
async fn test_inputs_differing_in_case_are_cached_separately() {
    let harness = Harness::new(Options::default()).await;

    let shouted = harness
        .pipeline
        .summarize(&ARTICLE.to_uppercase(), &extractive(), "kim")
        .await
        .unwrap();
    let plain = harness
        .pipeline
        .summarize(ARTICLE, &extractive(), "kim")
        .await
        .unwrap();

    assert_ne!(plain.id, shouted.id);
    assert_ne!(plain.summary, shouted.summary);
    assert!(plain.summary.chars().any(char::is_lowercase));
    assert_eq!(harness.usage("kim").await[0].requests, 2);
}

#[tokio::test]
async fn test_label_only_backend_reply_falls_back_to_extractive() {
    let harness = Harness::new(Options {
        reply: "Summary:",
        tiers: premium("lena"),
        ..Options::default()
    })
    .await;

    let result = harness
        .pipeline
        .summarize(ARTICLE, &abstractive(), "lena")
        .await
        .unwrap();

    assert_eq!(result.method, "abstractive (fallback)");
    assert_eq!(result.model_version, BUILTIN_EXTRACTIVE_VERSION);
    assert!(!result.summary.is_empty());
    assert_eq!(harness.openai.calls(), 3);
    assert_eq!(harness.ollama.calls(), 1);

    // Degraded output is neither billed nor cached.
    let usage = harness.usage("lena").await;
    assert_eq!(usage[0].cost, 0.0);
    assert_eq!(harness.pipeline.cache().stats().memory_entries, Some(0));
}

use chrono::Duration;
use memlayer_core::{
    CacheSettings, EmbeddingJob, EmbeddingStatus, EmbeddingWorker, FileMemoryStore,
    HashEmbeddingProvider, InMemoryStore, MemoryError, MemoryService, MemoryStore, MessageQuery,
    NewMessage, RetentionPolicy, RetentionScheduler, SearchCache, SearchFilters,
    SqliteMemoryStore, SystemClock, TenantScope, embedding_queue,
};
use memlayer_test_utils::{
    FailingEmbedding, FlakyStore, ManualClock, MessageBuilder, StubEmbedding, fixed_now,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

fn service_with(
    store: Arc<dyn MemoryStore>,
    embedder: StubEmbedding,
) -> (MemoryService, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(fixed_now()));
    let service = MemoryService::builder(store, Arc::new(embedder))
        .clock(clock.clone())
        .cache(SearchCache::new(CacheSettings::default()))
        .build();
    (service, clock)
}

#[tokio::test]
async fn ingest_scores_embeds_and_stores() {
    let store = Arc::new(InMemoryStore::new());
    let (service, _) = service_with(store.clone(), StubEmbedding::new(3));

    let message = service
        .ingest(NewMessage::new("acme", "conv-1", "system", "You are helpful."))
        .await
        .expect("ingest");
    assert!((message.importance_score - 0.78).abs() < 1e-6);
    assert_eq!(message.embedding_status, EmbeddingStatus::Completed);
    assert_eq!(message.embedding, Some(vec![1.0, 0.0, 0.0]));
    assert_eq!(message.metadata, serde_json::json!({}));
    assert_eq!(service.get_message(message.id).await.expect("get"), message);
}

#[tokio::test]
async fn ingest_validates_input() {
    let store = Arc::new(InMemoryStore::new());
    let (service, _) = service_with(store.clone(), StubEmbedding::new(2));

    let cases = vec![
        NewMessage::new("", "c", "user", "hi"),
        NewMessage::new("acme", "bad id", "user", "hi"),
        NewMessage::new("acme", "c", "narrator", "hi"),
        NewMessage::new("acme", "c", "user", "   "),
        NewMessage::new("acme", "c", "user", "x".repeat(16_001)),
        NewMessage {
            importance_override: Some(1.2),
            ..NewMessage::new("acme", "c", "user", "hi")
        },
        NewMessage {
            created_at: Some(fixed_now() + Duration::minutes(5)),
            ..NewMessage::new("acme", "c", "user", "hi")
        },
    ];
    for input in cases {
        let err = service.ingest(input.clone()).await.unwrap_err();
        assert!(matches!(err, MemoryError::Validation(_)), "input={input:?}");
    }
    assert!(store.is_empty());
}

#[tokio::test]
async fn override_replaces_computed_importance() {
    let store = Arc::new(InMemoryStore::new());
    let (service, _) = service_with(store, StubEmbedding::new(2));
    let input = NewMessage {
        importance_override: Some(0.37),
        ..NewMessage::new("acme", "c", "system", "pinned")
    };
    let message = service.ingest(input).await.expect("ingest");
    assert_eq!(message.importance_score, 0.37);
    assert_eq!(
        service
            .compute_importance(fixed_now() - Duration::days(30), "user", Some(0.37))
            .expect("score"),
        0.37
    );
}

#[tokio::test]
async fn provider_failure_still_stores_message() {
    let store = Arc::new(InMemoryStore::new());
    let service = MemoryService::builder(store.clone(), Arc::new(FailingEmbedding::new(4)))
        .clock(Arc::new(ManualClock::new(fixed_now())))
        .build();

    let message = service
        .ingest(NewMessage::new("acme", "c", "user", "remember this"))
        .await
        .expect("ingest");
    assert_eq!(message.embedding_status, EmbeddingStatus::Failed);
    assert!(message.embedding.is_none());
    assert_eq!(store.len(), 1);

    let results = service
        .search("acme", &[1.0, 0.0, 0.0, 0.0], &SearchFilters::default(), Some(5))
        .await
        .expect("search");
    assert!(results.is_empty());
}

#[tokio::test]
async fn search_ranks_filters_and_bounds() {
    let store = Arc::new(InMemoryStore::new());
    let now = fixed_now();
    let close = MessageBuilder::new("acme", now)
        .embedding(vec![1.0, 0.0])
        .importance(0.5)
        .build();
    let far = MessageBuilder::new("acme", now)
        .embedding(vec![0.0, 1.0])
        .importance(0.5)
        .build();
    let other_conversation = MessageBuilder::new("acme", now)
        .conversation("conv-2")
        .embedding(vec![1.0, 0.0])
        .importance(0.9)
        .build();
    let other_tenant = MessageBuilder::new("beta", now).embedding(vec![1.0, 0.0]).build();
    let wrong_dimension = MessageBuilder::new("acme", now)
        .embedding(vec![1.0, 0.0, 0.0])
        .build();
    for message in [&close, &far, &other_conversation, &other_tenant, &wrong_dimension] {
        store.insert(message.clone()).await.expect("insert");
    }
    let (service, _) = service_with(store, StubEmbedding::new(2));

    let filters = SearchFilters {
        conversation_id: Some("conv-1".to_string()),
        ..SearchFilters::default()
    };
    let results = service
        .search("acme", &[1.0, 0.0], &filters, Some(10))
        .await
        .expect("search");
    let ids: Vec<_> = results.iter().map(|r| r.message_id).collect();
    assert_eq!(ids, vec![close.id, far.id]);

    let filtered = SearchFilters {
        importance_min: Some(0.6),
        ..SearchFilters::default()
    };
    let results = service
        .search("acme", &[1.0, 0.0], &filtered, Some(10))
        .await
        .expect("search");
    let ids: Vec<_> = results.iter().map(|r| r.message_id).collect();
    assert_eq!(ids, vec![other_conversation.id]);

    let results = service
        .search("acme", &[1.0, 0.0], &SearchFilters::default(), Some(0))
        .await
        .expect("search");
    assert!(results.is_empty());

    let err = service
        .search("acme", &[], &SearchFilters::default(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, MemoryError::Validation(_)));
}

#[tokio::test]
async fn text_search_uses_cache_until_ingest_invalidates() {
    let store = Arc::new(InMemoryStore::new());
    let embedder = StubEmbedding::new(2).with_vector("weather", vec![0.0, 1.0]);
    let clock = Arc::new(ManualClock::new(fixed_now()));
    let embedder = Arc::new(embedder);
    let service = MemoryService::builder(store.clone(), embedder.clone())
        .clock(clock)
        .cache(SearchCache::new(CacheSettings::default()))
        .build();

    service
        .ingest(NewMessage::new("acme", "c", "user", "weather"))
        .await
        .expect("ingest");
    let filters = SearchFilters::default();
    let first = service
        .search_text("acme", "weather", &filters, None)
        .await
        .expect("search");
    assert_eq!(first.len(), 1);
    let second = service
        .search_text("acme", "weather", &filters, None)
        .await
        .expect("search");
    assert_eq!(first, second);
    // One embed for ingestion; the query embedding comes from the cache.
    assert_eq!(embedder.calls(), vec!["weather".to_string()]);

    service
        .ingest(NewMessage::new("acme", "c", "assistant", "sunny later"))
        .await
        .expect("ingest");
    let third = service
        .search_text("acme", "weather", &filters, None)
        .await
        .expect("search");
    assert_eq!(third.len(), 2);
}

#[tokio::test]
async fn async_mode_defers_embeddings_to_worker() {
    let store = Arc::new(InMemoryStore::new());
    let (queue, receiver) = embedding_queue(8);
    let service = Arc::new(
        MemoryService::builder(store.clone(), Arc::new(StubEmbedding::new(2)))
            .clock(Arc::new(ManualClock::new(fixed_now())))
            .queue(queue)
            .build(),
    );

    let message = service
        .ingest(NewMessage::new("acme", "c", "user", "later"))
        .await
        .expect("ingest");
    assert_eq!(message.embedding_status, EmbeddingStatus::Pending);
    let results = service
        .search("acme", &[1.0, 0.0], &SearchFilters::default(), None)
        .await
        .expect("search");
    assert!(results.is_empty());

    let mut worker = EmbeddingWorker::new(service.clone(), receiver);
    let processed = worker.drain_once().await.expect("drain");
    assert_eq!(processed, 1);
    let stored = service.get_message(message.id).await.expect("get");
    assert_eq!(stored.embedding_status, EmbeddingStatus::Completed);
    let results = service
        .search("acme", &[1.0, 0.0], &SearchFilters::default(), None)
        .await
        .expect("search");
    assert_eq!(results.len(), 1);
}

#[tokio::test]
async fn drain_recovers_pending_rows_without_queue() {
    let store = Arc::new(InMemoryStore::new());
    let pending = MessageBuilder::new("acme", fixed_now()).pending().build();
    store.insert(pending.clone()).await.expect("insert");
    let (service, _) = service_with(store.clone(), StubEmbedding::new(2));

    assert_eq!(service.drain_pending(10).await.expect("drain"), 1);
    assert_eq!(service.drain_pending(10).await.expect("drain"), 0);
    let stored = service.get_message(pending.id).await.expect("get");
    assert_eq!(stored.embedding_status, EmbeddingStatus::Completed);
}

#[tokio::test]
async fn worker_stops_on_cancel() {
    let store = Arc::new(InMemoryStore::new());
    let (queue, receiver) = embedding_queue(4);
    let service = Arc::new(
        MemoryService::builder(store.clone(), Arc::new(StubEmbedding::new(2)))
            .queue(queue)
            .build(),
    );
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(EmbeddingWorker::new(service.clone(), receiver).run(cancel.clone()));

    let message = service
        .ingest(NewMessage::new("acme", "c", "user", "queued"))
        .await
        .expect("ingest");
    for _ in 0..50 {
        let stored = service.get_message(message.id).await.expect("get");
        if stored.embedding_status == EmbeddingStatus::Completed {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(
        service.get_message(message.id).await.expect("get").embedding_status,
        EmbeddingStatus::Completed
    );
    cancel.cancel();
    handle.await.expect("worker joined");
}

#[tokio::test]
async fn worker_recovers_jobs_rejected_by_full_queue() {
    let store = Arc::new(InMemoryStore::new());
    let (queue, receiver) = embedding_queue(1);
    let service = Arc::new(
        MemoryService::builder(store.clone(), Arc::new(StubEmbedding::new(2)))
            .queue(queue)
            .build(),
    );
    let cancel = CancellationToken::new();
    let worker = EmbeddingWorker::new(service.clone(), receiver)
        .with_drain_interval(std::time::Duration::from_millis(20));
    let handle = tokio::spawn(worker.run(cancel.clone()));

    for index in 0..5 {
        service
            .ingest(NewMessage::new("acme", "c", "user", format!("burst {index}")))
            .await
            .expect("ingest");
    }
    let mut pending = usize::MAX;
    for _ in 0..100 {
        pending = store.pending_embeddings(100).await.expect("pending").len();
        if pending == 0 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(pending, 0);
    let active = store
        .scan(&MessageQuery::tenant("acme"))
        .await
        .expect("scan");
    assert_eq!(active.len(), 5);
    assert!(
        active
            .iter()
            .all(|message| message.embedding_status == EmbeddingStatus::Completed)
    );
    cancel.cancel();
    handle.await.expect("worker joined");
}

#[tokio::test]
async fn drain_pending_continues_past_failing_messages() {
    let inner = Arc::new(InMemoryStore::new());
    let broken = MessageBuilder::new("broken", fixed_now()).pending().build();
    let healthy = MessageBuilder::new("acme", fixed_now()).pending().build();
    inner.insert(broken.clone()).await.expect("insert");
    inner.insert(healthy.clone()).await.expect("insert");
    let store = Arc::new(FlakyStore::new(inner.clone()));
    store.fail_tenant("broken");
    let (service, _) = service_with(store, StubEmbedding::new(2));

    assert_eq!(service.drain_pending(10).await.expect("drain"), 1);
    let healthy = inner.get(healthy.id).await.expect("get").expect("healthy");
    assert_eq!(healthy.embedding_status, EmbeddingStatus::Completed);
    let broken = inner.get(broken.id).await.expect("get").expect("broken");
    assert_eq!(broken.embedding_status, EmbeddingStatus::Pending);
}

#[tokio::test]
async fn embedding_job_for_another_tenant_is_ignored() {
    let store = Arc::new(InMemoryStore::new());
    let (queue, _receiver) = embedding_queue(4);
    let service = MemoryService::builder(store.clone(), Arc::new(StubEmbedding::new(2)))
        .queue(queue)
        .build();
    let message = service
        .ingest(NewMessage::new("acme", "c", "user", "private"))
        .await
        .expect("ingest");

    let stray = EmbeddingJob {
        message_id: message.id,
        tenant_id: "beta".to_string(),
        text: "overwritten".to_string(),
    };
    let status = service.process_embedding(&stray).await.expect("process");
    assert_eq!(status, EmbeddingStatus::Pending);
    assert_eq!(service.get_message(message.id).await.expect("get"), message);

    let owned = EmbeddingJob {
        tenant_id: "acme".to_string(),
        ..stray
    };
    let status = service.process_embedding(&owned).await.expect("process");
    assert_eq!(status, EmbeddingStatus::Completed);
}

#[tokio::test]
async fn retention_invalidates_cached_searches() {
    let store = Arc::new(InMemoryStore::new());
    let (service, clock) = service_with(store.clone(), StubEmbedding::new(2));
    service
        .ingest(NewMessage::new("acme", "c", "user", "note"))
        .await
        .expect("ingest");
    let filters = SearchFilters::default();
    assert_eq!(
        service.search_text("acme", "note", &filters, None).await.expect("search").len(),
        1
    );

    clock.advance(Duration::days(200));
    let report = service
        .run_retention(&TenantScope::parse("*"), None, false)
        .await
        .expect("retention");
    assert_eq!(report.archived(), 1);
    assert!(service
        .search_text("acme", "note", &filters, None)
        .await
        .expect("search")
        .is_empty());
}

#[tokio::test]
async fn scheduler_runs_until_cancelled() {
    let store = Arc::new(InMemoryStore::new());
    let old = MessageBuilder::new("acme", fixed_now()).age_days(365).build();
    store.insert(old.clone()).await.expect("insert");
    let (service, _) = service_with(store.clone(), StubEmbedding::new(2));
    let cancel = CancellationToken::new();
    let handle = RetentionScheduler::new(Arc::new(service), std::time::Duration::from_secs(3600))
        .spawn(cancel.clone());

    for _ in 0..50 {
        if store.get(old.id).await.expect("get").is_some_and(|m| m.archived) {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    cancel.cancel();
    let runs = handle.await.expect("scheduler joined");
    assert_eq!(runs, 1);
    assert!(store.get(old.id).await.expect("get").is_some_and(|m| m.archived));
}

#[tokio::test]
async fn file_and_sqlite_stores_back_the_service() {
    let temp = tempdir().expect("tempdir");
    let stores: Vec<Arc<dyn MemoryStore>> = vec![
        Arc::new(FileMemoryStore::new(temp.path().join("files")).expect("file store")),
        Arc::new(SqliteMemoryStore::open(temp.path().join("memlayer.db")).expect("sqlite store")),
    ];
    for store in stores {
        let service = MemoryService::builder(
            store.clone(),
            Arc::new(HashEmbeddingProvider::new(32).expect("provider")),
        )
        .clock(Arc::new(ManualClock::new(fixed_now())))
        .build();
        let kept = service
            .ingest(NewMessage::new("acme", "c", "system", "deploy checklist for friday"))
            .await
            .expect("ingest");
        let dropped = service
            .ingest(NewMessage {
                importance_override: Some(0.05),
                ..NewMessage::new("acme", "c", "user", "lunch order")
            })
            .await
            .expect("ingest");

        let results = service
            .search_text("acme", "friday deploy", &SearchFilters::default(), Some(1))
            .await
            .expect("search");
        assert_eq!(results[0].message_id, kept.id);

        let report = service
            .run_retention(
                &TenantScope::Single("acme".to_string()),
                Some(RetentionPolicy::default()),
                false,
            )
            .await
            .expect("retention");
        assert_eq!(report.tenants[0].outcome.archived_ids, vec![dropped.id]);
        let active = store
            .scan(&MessageQuery::tenant("acme"))
            .await
            .expect("scan");
        assert_eq!(active.len(), 1);

        let wall_clock = MemoryService::builder(
            store.clone(),
            Arc::new(HashEmbeddingProvider::new(32).expect("provider")),
        )
        .clock(Arc::new(SystemClock))
        .build();
        let live = wall_clock
            .ingest(NewMessage::new("live", "c", "user", "stamped now"))
            .await
            .expect("ingest");
        assert_eq!(wall_clock.get_message(live.id).await.expect("get"), live);
        let backdated = wall_clock
            .ingest(NewMessage {
                created_at: Some(chrono::Utc::now() - Duration::hours(1)),
                ..NewMessage::new("live", "c", "assistant", "stamped earlier")
            })
            .await
            .expect("ingest");
        assert_eq!(
            wall_clock.get_message(backdated.id).await.expect("get"),
            backdated
        );
    }
}

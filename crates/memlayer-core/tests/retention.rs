use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use memlayer_core::{
    ArchiveOutcome, InMemoryStore, MemoryError, MemoryService, MemoryStore, Message, MessageQuery,
    MessageUpdate, NewMessage, PolicyOrigin, RetentionEngine, RetentionPolicy, StaticPolicies,
    StoreError, TenantScope,
};
use memlayer_test_utils::{FlakyStore, ManualClock, MessageBuilder, StubEmbedding, fixed_now};
use pretty_assertions::assert_eq;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

fn policy(max_age_days: u32, importance_threshold: f32, purge_after_days: u32) -> RetentionPolicy {
    RetentionPolicy {
        max_age_days,
        importance_threshold,
        purge_after_days,
    }
}

async fn seed(store: &dyn MemoryStore, messages: &[Message]) {
    for message in messages {
        store.insert(message.clone()).await.expect("insert");
    }
}

fn engine(store: Arc<dyn MemoryStore>) -> RetentionEngine {
    RetentionEngine::new(store, Arc::new(StaticPolicies::new()))
}

fn id_set(ids: &[Uuid]) -> BTreeSet<Uuid> {
    ids.iter().copied().collect()
}

#[tokio::test]
async fn dry_run_reports_the_same_ids_a_real_run_transitions() {
    let store = Arc::new(InMemoryStore::new());
    let now = fixed_now();
    let mut eligible = Vec::new();
    let mut rows = Vec::new();
    for i in 0..100 {
        let importance = if i % 10 == 0 { 0.1 } else { 0.9 };
        let message = MessageBuilder::new("acme", now)
            .importance(importance)
            .age_days(i % 7)
            .build();
        if importance < 0.35 {
            eligible.push(message.id);
        }
        rows.push(message);
    }
    seed(store.as_ref(), &rows).await;
    let engine = engine(store.clone());
    let scope = TenantScope::Single("acme".to_string());
    let cancel = CancellationToken::new();
    let policy = policy(30, 0.35, 30);

    let dry = engine
        .run(&scope, Some(policy), true, now, &cancel)
        .await
        .expect("dry run");
    assert!(dry.dry_run);
    assert_eq!(dry.archived(), 10);
    assert_eq!(dry.deleted(), 0);
    let archived_active = store
        .scan(&MessageQuery::tenant("acme"))
        .await
        .expect("scan")
        .len();
    assert_eq!(archived_active, 100);

    let real = engine
        .run(&scope, Some(policy), false, now, &cancel)
        .await
        .expect("real run");
    assert!(!real.dry_run);
    assert_eq!(real.archived(), 10);
    let dry_ids = &dry.tenants[0].outcome.archived_ids;
    let real_ids = &real.tenants[0].outcome.archived_ids;
    assert_eq!(dry_ids, real_ids);
    assert_eq!(id_set(real_ids), id_set(&eligible));
    assert_eq!(
        store.scan(&MessageQuery::tenant("acme")).await.expect("scan").len(),
        90
    );
}

#[tokio::test]
async fn evaluation_does_not_depend_on_dry_run() {
    let store = Arc::new(InMemoryStore::new());
    let now = fixed_now();
    seed(
        store.as_ref(),
        &[
            MessageBuilder::new("acme", now).age_days(40).build(),
            MessageBuilder::new("acme", now).importance(0.05).build(),
            MessageBuilder::new("acme", now).archived_days_ago(50).build(),
            MessageBuilder::new("acme", now).build(),
        ],
    )
    .await;
    let engine = engine(store.clone());
    let policy = policy(30, 0.2, 30);

    let before = engine.evaluate("acme", &policy, now).await.expect("plan");
    let _ = engine.apply(&before, true, &CancellationToken::new()).await;
    let after_dry = engine.evaluate("acme", &policy, now).await.expect("plan");
    assert_eq!(before, after_dry);
    assert_eq!(before.archive.len(), 2);
    assert_eq!(before.delete.len(), 1);
}

#[tokio::test]
async fn applying_a_plan_twice_is_a_no_op() {
    let store = Arc::new(InMemoryStore::new());
    let now = fixed_now();
    seed(
        store.as_ref(),
        &[
            MessageBuilder::new("acme", now).age_days(100).build(),
            MessageBuilder::new("acme", now).importance(0.01).build(),
            MessageBuilder::new("acme", now).archived_days_ago(40).build(),
        ],
    )
    .await;
    let engine = engine(store.clone());
    let plan = engine
        .evaluate("acme", &RetentionPolicy::default(), now)
        .await
        .expect("plan");
    let cancel = CancellationToken::new();

    let first = engine.apply(&plan, false, &cancel).await;
    assert_eq!((first.archived, first.deleted, first.failed), (2, 1, 0));

    let second = engine.apply(&plan, false, &cancel).await;
    assert_eq!((second.archived, second.deleted, second.failed), (0, 0, 0));
    assert_eq!(second.skipped, 3);
}

#[tokio::test]
async fn archive_precedes_purge_and_is_never_repeated() {
    let store = Arc::new(InMemoryStore::new());
    let now = fixed_now();
    let old = MessageBuilder::new("acme", now).age_days(400).build();
    seed(store.as_ref(), &[old.clone()]).await;
    let engine = engine(store.clone());
    let scope = TenantScope::Single("acme".to_string());
    let cancel = CancellationToken::new();
    let eager = policy(1, 0.0, 0);

    let first = engine
        .run(&scope, Some(eager), false, now, &cancel)
        .await
        .expect("first");
    assert_eq!((first.archived(), first.deleted()), (1, 0));
    let stored = store.get(old.id).await.expect("get").expect("still stored");
    assert!(stored.archived);
    assert_eq!(stored.archived_at, Some(now));

    // Same instant: archive age is zero, not past purge_after_days.
    let same_instant = engine
        .run(&scope, Some(eager), false, now, &cancel)
        .await
        .expect("second");
    assert_eq!((same_instant.archived(), same_instant.deleted()), (0, 0));

    let later = now + Duration::hours(1);
    let third = engine
        .run(&scope, Some(eager), false, later, &cancel)
        .await
        .expect("third");
    assert_eq!((third.archived(), third.deleted()), (0, 1));
    assert!(store.get(old.id).await.expect("get").is_none());
}

#[tokio::test]
async fn low_importance_archives_before_max_age() {
    let store = Arc::new(InMemoryStore::new());
    let now = fixed_now();
    let clock = Arc::new(ManualClock::new(now));
    let service = MemoryService::builder(store.clone(), Arc::new(StubEmbedding::new(2)))
        .clock(clock)
        .build();

    let mut input = NewMessage::new("acme", "conv-1", "assistant", "old answer");
    input.created_at = Some(now - Duration::days(14));
    let message = service.ingest(input).await.expect("ingest");
    assert!(message.importance_score < 0.35);

    let report = service
        .run_retention(
            &TenantScope::Single("acme".to_string()),
            Some(policy(30, 0.35, 30)),
            false,
        )
        .await
        .expect("retention");
    assert_eq!(report.tenants[0].outcome.archived_ids, vec![message.id]);
}

#[tokio::test]
async fn one_failing_tenant_does_not_block_others() {
    let inner = Arc::new(InMemoryStore::new());
    let now = fixed_now();
    let rows: Vec<Message> = ["acme", "acme", "acme", "beta", "beta"]
        .iter()
        .map(|tenant| MessageBuilder::new(tenant, now).importance(0.05).build())
        .collect();
    seed(inner.as_ref(), &rows).await;
    let flaky = Arc::new(FlakyStore::new(inner.clone()));
    flaky.fail_tenant("acme");
    let engine = engine(flaky);

    let report = engine
        .run(&TenantScope::All, None, false, now, &CancellationToken::new())
        .await
        .expect("run");
    let acme = report.tenant("acme").expect("acme report");
    let beta = report.tenant("beta").expect("beta report");
    assert_eq!((acme.outcome.archived, acme.outcome.failed), (0, 3));
    assert_eq!((beta.outcome.archived, beta.outcome.failed), (2, 0));
    assert_eq!(report.failed(), 3);
    assert_eq!(
        inner.scan(&MessageQuery::tenant("acme")).await.expect("scan").len(),
        3
    );
}

#[tokio::test]
async fn wildcard_run_on_empty_store_is_an_error() {
    let engine = engine(Arc::new(InMemoryStore::new()));
    let err = engine
        .run(&TenantScope::All, None, false, fixed_now(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, MemoryError::NoTenants));
}

#[tokio::test]
async fn tenant_listing_failure_is_top_level() {
    let inner = Arc::new(InMemoryStore::new());
    seed(inner.as_ref(), &[MessageBuilder::new("acme", fixed_now()).build()]).await;
    let flaky = Arc::new(FlakyStore::new(inner));
    flaky.fail_tenant_listing();
    let err = engine(flaky)
        .run(&TenantScope::All, None, false, fixed_now(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, MemoryError::Store(StoreError::Unavailable(_))));
}

#[tokio::test]
async fn invalid_override_is_rejected() {
    let engine = engine(Arc::new(InMemoryStore::new()));
    let err = engine
        .run(
            &TenantScope::Single("acme".to_string()),
            Some(policy(30, 1.5, 30)),
            true,
            fixed_now(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, MemoryError::InvalidPolicy(_)));
}

#[tokio::test]
async fn stored_policies_resolve_per_tenant() {
    let store = Arc::new(InMemoryStore::new());
    let now = fixed_now();
    seed(
        store.as_ref(),
        &[
            MessageBuilder::new("acme", now).age_days(10).build(),
            MessageBuilder::new("beta", now).age_days(10).build(),
            MessageBuilder::new("gamma", now).age_days(10).build(),
        ],
    )
    .await;
    store.set_policy("acme", policy(5, 0.0, 30));
    store.set_policy("*", policy(60, 0.0, 30));
    store.set_policy("gamma", policy(5, 2.0, 30));
    let engine = RetentionEngine::new(store.clone(), store.clone());

    let report = engine
        .run(&TenantScope::All, None, false, now, &CancellationToken::new())
        .await
        .expect("run");
    let acme = report.tenant("acme").expect("acme");
    assert_eq!(acme.policy_origin, Some(PolicyOrigin::Tenant));
    assert_eq!(acme.outcome.archived, 1);
    let beta = report.tenant("beta").expect("beta");
    assert_eq!(beta.policy_origin, Some(PolicyOrigin::Wildcard));
    assert_eq!(beta.outcome.archived, 0);
    let gamma = report.tenant("gamma").expect("gamma");
    assert!(gamma.error.is_some());
    assert_eq!(gamma.outcome.archived, 0);
}

/// Cancels the token once a number of archives have gone through.
struct CancelAfter {
    inner: Arc<InMemoryStore>,
    remaining: AtomicUsize,
    cancel: CancellationToken,
}

#[async_trait]
impl MemoryStore for CancelAfter {
    async fn insert(&self, message: Message) -> Result<(), StoreError> {
        self.inner.insert(message).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<Message>, StoreError> {
        self.inner.get(id).await
    }

    async fn scan(&self, query: &MessageQuery) -> Result<Vec<Message>, StoreError> {
        self.inner.scan(query).await
    }

    async fn list_distinct_tenants(&self) -> Result<Vec<String>, StoreError> {
        self.inner.list_distinct_tenants().await
    }

    async fn update(
        &self,
        id: Uuid,
        update: MessageUpdate,
        at: DateTime<Utc>,
    ) -> Result<Message, StoreError> {
        self.inner.update(id, update, at).await
    }

    async fn archive(&self, id: Uuid, at: DateTime<Utc>) -> Result<ArchiveOutcome, StoreError> {
        let outcome = self.inner.archive(id, at).await?;
        if self.remaining.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.cancel.cancel();
        }
        Ok(outcome)
    }

    async fn purge(&self, id: Uuid) -> Result<(), StoreError> {
        self.inner.purge(id).await
    }
}

#[tokio::test]
async fn cancelled_apply_stops_between_items_and_resumes() {
    let inner = Arc::new(InMemoryStore::new());
    let now = fixed_now();
    let rows: Vec<Message> = (0..5)
        .map(|_| MessageBuilder::new("acme", now).importance(0.0).build())
        .collect();
    seed(inner.as_ref(), &rows).await;
    let cancel = CancellationToken::new();
    let store = Arc::new(CancelAfter {
        inner: inner.clone(),
        remaining: AtomicUsize::new(2),
        cancel: cancel.clone(),
    });
    let engine = engine(store);
    let scope = TenantScope::Single("acme".to_string());

    let first = engine
        .run(&scope, None, false, now, &cancel)
        .await
        .expect("first");
    assert!(first.interrupted);
    assert_eq!(first.archived(), 2);
    assert_eq!(
        inner.scan(&MessageQuery::tenant("acme")).await.expect("scan").len(),
        3
    );

    let resumed = engine
        .run(&scope, None, false, now, &CancellationToken::new())
        .await
        .expect("resumed");
    assert!(!resumed.interrupted);
    assert_eq!(resumed.archived(), 3);
    assert!(inner.scan(&MessageQuery::tenant("acme")).await.expect("scan").is_empty());
}

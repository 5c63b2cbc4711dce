//! Retention: archive stale or unimportant messages, purge old archives.
//!
//! A run evaluates a plan per tenant and then applies it one id at a time.
//! Each item is re-read and re-checked against the plan's policy and
//! evaluation time before it is touched, so applying a plan twice is a no-op
//! and a cancelled run can be resumed by evaluating again.

use crate::error::MemoryError;
use crate::model::{Message, validate_identifier};
use crate::policy::{PolicyOrigin, PolicySource, RetentionPolicy, resolve_policy};
use crate::store::{ArchiveOutcome, MemoryStore, MessageQuery, StoreError};
use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Tenants covered by a retention run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TenantScope {
    Single(String),
    /// Every tenant present in the store.
    All,
}

impl TenantScope {
    /// `*` selects every tenant.
    pub fn parse(value: &str) -> Self {
        if value == crate::policy::WILDCARD_TENANT {
            TenantScope::All
        } else {
            TenantScope::Single(value.to_string())
        }
    }
}

/// Ids selected for each transition, sorted ascending.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetentionPlan {
    pub tenant_id: String,
    pub policy: RetentionPolicy,
    pub evaluated_at: DateTime<Utc>,
    pub archive: Vec<Uuid>,
    pub delete: Vec<Uuid>,
}

/// Counts from applying one plan.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ApplyOutcome {
    /// Archived, or would be archived in a dry run.
    pub archived: usize,
    /// Purged, or would be purged in a dry run.
    pub deleted: usize,
    /// Store failures; the item is left unchanged.
    pub failed: usize,
    /// Items no longer eligible or already transitioned.
    pub skipped: usize,
    /// The run stopped early on cancellation.
    pub interrupted: bool,
    pub archived_ids: Vec<Uuid>,
    pub deleted_ids: Vec<Uuid>,
}

/// Per-tenant section of a [`RetentionReport`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TenantReport {
    pub tenant_id: String,
    pub policy: Option<RetentionPolicy>,
    pub policy_origin: Option<PolicyOrigin>,
    pub outcome: ApplyOutcome,
    /// Set when the tenant could not be evaluated at all.
    pub error: Option<String>,
}

/// Result of [`RetentionEngine::run`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetentionReport {
    pub dry_run: bool,
    pub evaluated_at: DateTime<Utc>,
    pub tenants: Vec<TenantReport>,
    pub interrupted: bool,
}

impl RetentionReport {
    pub fn archived(&self) -> usize {
        self.tenants.iter().map(|t| t.outcome.archived).sum()
    }

    pub fn deleted(&self) -> usize {
        self.tenants.iter().map(|t| t.outcome.deleted).sum()
    }

    pub fn failed(&self) -> usize {
        self.tenants.iter().map(|t| t.outcome.failed).sum()
    }

    pub fn skipped(&self) -> usize {
        self.tenants.iter().map(|t| t.outcome.skipped).sum()
    }

    pub fn tenant(&self, tenant_id: &str) -> Option<&TenantReport> {
        self.tenants.iter().find(|t| t.tenant_id == tenant_id)
    }
}

/// Active message older than `max_age_days` or below the importance threshold.
pub fn is_archive_eligible(message: &Message, policy: &RetentionPolicy, now: DateTime<Utc>) -> bool {
    if message.archived {
        return false;
    }
    let too_old = now - message.created_at > Duration::days(i64::from(policy.max_age_days));
    too_old || message.importance_score < policy.importance_threshold
}

/// Archived message whose archive age exceeds `purge_after_days`.
pub fn is_purge_eligible(message: &Message, policy: &RetentionPolicy, now: DateTime<Utc>) -> bool {
    message.archived
        && message
            .archived_at
            .is_some_and(|at| now - at > Duration::days(i64::from(policy.purge_after_days)))
}

/// Pure plan over a snapshot of one tenant's messages.
pub fn plan_retention(
    tenant_id: &str,
    messages: &[Message],
    policy: &RetentionPolicy,
    now: DateTime<Utc>,
) -> RetentionPlan {
    let mut archive = Vec::new();
    let mut delete = Vec::new();
    for message in messages.iter().filter(|m| m.tenant_id == tenant_id) {
        if is_purge_eligible(message, policy, now) {
            delete.push(message.id);
        } else if is_archive_eligible(message, policy, now) {
            archive.push(message.id);
        }
    }
    archive.sort();
    delete.sort();
    RetentionPlan {
        tenant_id: tenant_id.to_string(),
        policy: *policy,
        evaluated_at: now,
        archive,
        delete,
    }
}

/// Evaluates and applies retention against a store.
pub struct RetentionEngine {
    store: Arc<dyn MemoryStore>,
    policies: Arc<dyn PolicySource>,
}

enum Step {
    Done,
    Skipped,
    Failed,
}

impl RetentionEngine {
    pub fn new(store: Arc<dyn MemoryStore>, policies: Arc<dyn PolicySource>) -> Self {
        Self { store, policies }
    }

    /// Build a plan from the tenant's current rows, archived included.
    pub async fn evaluate(
        &self,
        tenant_id: &str,
        policy: &RetentionPolicy,
        now: DateTime<Utc>,
    ) -> Result<RetentionPlan, StoreError> {
        let messages = self
            .store
            .scan(&MessageQuery::tenant(tenant_id).with_archived())
            .await?;
        let plan = plan_retention(tenant_id, &messages, policy, now);
        debug!(
            "retention evaluated (tenant_id={}, scanned={}, archive={}, delete={})",
            tenant_id,
            messages.len(),
            plan.archive.len(),
            plan.delete.len()
        );
        Ok(plan)
    }

    /// Apply a plan item by item. A dry run takes the same path without mutating.
    pub async fn apply(
        &self,
        plan: &RetentionPlan,
        dry_run: bool,
        cancel: &CancellationToken,
    ) -> ApplyOutcome {
        let mut outcome = ApplyOutcome::default();

        for id in &plan.archive {
            if cancel.is_cancelled() {
                outcome.interrupted = true;
                return outcome;
            }
            match self.archive_one(plan, *id, dry_run).await {
                Step::Done => {
                    outcome.archived += 1;
                    outcome.archived_ids.push(*id);
                }
                Step::Skipped => outcome.skipped += 1,
                Step::Failed => outcome.failed += 1,
            }
        }

        for id in &plan.delete {
            if cancel.is_cancelled() {
                outcome.interrupted = true;
                return outcome;
            }
            match self.purge_one(plan, *id, dry_run).await {
                Step::Done => {
                    outcome.deleted += 1;
                    outcome.deleted_ids.push(*id);
                }
                Step::Skipped => outcome.skipped += 1,
                Step::Failed => outcome.failed += 1,
            }
        }

        outcome
    }

    async fn current(&self, plan: &RetentionPlan, id: Uuid) -> Result<Option<Message>, StoreError> {
        Ok(self
            .store
            .get(id)
            .await?
            .filter(|message| message.tenant_id == plan.tenant_id))
    }

    async fn archive_one(&self, plan: &RetentionPlan, id: Uuid, dry_run: bool) -> Step {
        let message = match self.current(plan, id).await {
            Ok(Some(message)) => message,
            Ok(None) => return Step::Skipped,
            Err(err) => return failed(plan, id, "archive", &err),
        };
        if !is_archive_eligible(&message, &plan.policy, plan.evaluated_at) {
            return Step::Skipped;
        }
        if dry_run {
            return Step::Done;
        }
        match self.store.archive(id, plan.evaluated_at).await {
            Ok(ArchiveOutcome::Archived) => Step::Done,
            Ok(ArchiveOutcome::AlreadyArchived) => Step::Skipped,
            Err(StoreError::NotFound(_)) => Step::Skipped,
            Err(err) => failed(plan, id, "archive", &err),
        }
    }

    async fn purge_one(&self, plan: &RetentionPlan, id: Uuid, dry_run: bool) -> Step {
        let message = match self.current(plan, id).await {
            Ok(Some(message)) => message,
            Ok(None) => return Step::Skipped,
            Err(err) => return failed(plan, id, "purge", &err),
        };
        if !is_purge_eligible(&message, &plan.policy, plan.evaluated_at) {
            return Step::Skipped;
        }
        if dry_run {
            return Step::Done;
        }
        match self.store.purge(id).await {
            Ok(()) => Step::Done,
            Err(StoreError::NotFound(_) | StoreError::NotArchived(_)) => Step::Skipped,
            Err(err) => failed(plan, id, "purge", &err),
        }
    }

    /// Evaluate and apply retention for every tenant in scope.
    ///
    /// Only an invalid override, an unusable scope, or a failure to enumerate
    /// tenants fails the whole run; everything else is reported per tenant.
    pub async fn run(
        &self,
        scope: &TenantScope,
        policy_override: Option<RetentionPolicy>,
        dry_run: bool,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<RetentionReport, MemoryError> {
        if let Some(policy) = &policy_override {
            policy.validate()?;
        }
        let tenants = match scope {
            TenantScope::Single(tenant_id) => {
                validate_identifier("tenant id", tenant_id)?;
                vec![tenant_id.clone()]
            }
            TenantScope::All => {
                let tenants = self.store.list_distinct_tenants().await?;
                if tenants.is_empty() {
                    return Err(MemoryError::NoTenants);
                }
                tenants
            }
        };

        let mut report = RetentionReport {
            dry_run,
            evaluated_at: now,
            tenants: Vec::with_capacity(tenants.len()),
            interrupted: false,
        };
        for tenant_id in tenants {
            if cancel.is_cancelled() {
                report.interrupted = true;
                break;
            }
            let tenant_report = self
                .run_tenant(&tenant_id, policy_override, dry_run, now, cancel)
                .await;
            if tenant_report.outcome.interrupted {
                report.interrupted = true;
            }
            report.tenants.push(tenant_report);
        }

        info!(
            "retention run finished (tenants={}, archived={}, deleted={}, failed={}, skipped={}, dry_run={}, interrupted={})",
            report.tenants.len(),
            report.archived(),
            report.deleted(),
            report.failed(),
            report.skipped(),
            dry_run,
            report.interrupted
        );
        Ok(report)
    }

    async fn run_tenant(
        &self,
        tenant_id: &str,
        policy_override: Option<RetentionPolicy>,
        dry_run: bool,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> TenantReport {
        let mut report = TenantReport {
            tenant_id: tenant_id.to_string(),
            policy: None,
            policy_origin: None,
            outcome: ApplyOutcome::default(),
            error: None,
        };

        let (policy, origin) =
            match resolve_policy(self.policies.as_ref(), tenant_id, policy_override).await {
                Ok(resolved) => resolved,
                Err(err) => {
                    warn!("retention policy lookup failed (tenant_id={tenant_id}, error={err})");
                    report.error = Some(err.to_string());
                    return report;
                }
            };
        report.policy = Some(policy);
        report.policy_origin = Some(origin);
        if let Err(err) = policy.validate() {
            warn!("skipping tenant with invalid retention policy (tenant_id={tenant_id}, error={err})");
            report.error = Some(err.to_string());
            return report;
        }

        let plan = match self.evaluate(tenant_id, &policy, now).await {
            Ok(plan) => plan,
            Err(err) => {
                warn!("retention evaluation failed (tenant_id={tenant_id}, error={err})");
                report.error = Some(err.to_string());
                return report;
            }
        };
        report.outcome = self.apply(&plan, dry_run, cancel).await;
        info!(
            "retention applied (tenant_id={}, archived={}, deleted={}, failed={}, skipped={}, dry_run={})",
            tenant_id,
            report.outcome.archived,
            report.outcome.deleted,
            report.outcome.failed,
            report.outcome.skipped,
            dry_run
        );
        report
    }
}

fn failed(plan: &RetentionPlan, id: Uuid, action: &str, err: &StoreError) -> Step {
    warn!(
        "retention {} failed (tenant_id={}, message_id={}, error={})",
        action, plan.tenant_id, id, err
    );
    Step::Failed
}

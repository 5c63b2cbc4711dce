//! Retention policies and their lookup.

use crate::error::MemoryError;
use crate::store::StoreError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Key of the wildcard policy record applied to tenants without their own.
pub const WILDCARD_TENANT: &str = "*";

/// Per-tenant archive and purge thresholds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RetentionPolicy {
    /// Archive active messages older than this many days.
    pub max_age_days: u32,
    /// Archive active messages whose importance is below this value.
    pub importance_threshold: f32,
    /// Purge archived messages this many days after archiving.
    pub purge_after_days: u32,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_age_days: 90,
            importance_threshold: 0.2,
            purge_after_days: 30,
        }
    }
}

impl RetentionPolicy {
    /// Reject thresholds outside [0, 1].
    pub fn validate(&self) -> Result<(), MemoryError> {
        if !self.importance_threshold.is_finite()
            || !(0.0..=1.0).contains(&self.importance_threshold)
        {
            return Err(MemoryError::InvalidPolicy(format!(
                "importance_threshold must be within [0, 1], got {}",
                self.importance_threshold
            )));
        }
        Ok(())
    }
}

/// Where a resolved policy came from.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PolicyOrigin {
    Override,
    Tenant,
    Wildcard,
    BuiltIn,
}

/// Read access to stored retention policies.
#[async_trait]
pub trait PolicySource: Send + Sync {
    /// Policy record stored under exactly this key.
    async fn policy_for(&self, tenant_id: &str) -> Result<Option<RetentionPolicy>, StoreError>;

    /// Wildcard policy record.
    async fn default_policy(&self) -> Result<Option<RetentionPolicy>, StoreError> {
        self.policy_for(WILDCARD_TENANT).await
    }
}

/// Resolve the effective policy: override, tenant record, wildcard record, built-in.
pub async fn resolve_policy(
    source: &dyn PolicySource,
    tenant_id: &str,
    policy_override: Option<RetentionPolicy>,
) -> Result<(RetentionPolicy, PolicyOrigin), StoreError> {
    if let Some(policy) = policy_override {
        return Ok((policy, PolicyOrigin::Override));
    }
    if let Some(policy) = source.policy_for(tenant_id).await? {
        return Ok((policy, PolicyOrigin::Tenant));
    }
    if let Some(policy) = source.default_policy().await? {
        return Ok((policy, PolicyOrigin::Wildcard));
    }
    Ok((RetentionPolicy::default(), PolicyOrigin::BuiltIn))
}

/// Fixed policy table, typically built from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticPolicies {
    policies: BTreeMap<String, RetentionPolicy>,
}

impl StaticPolicies {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(mut self, key: impl Into<String>, policy: RetentionPolicy) -> Self {
        self.policies.insert(key.into(), policy);
        self
    }

    pub fn with_default(self, policy: RetentionPolicy) -> Self {
        self.with_policy(WILDCARD_TENANT, policy)
    }
}

#[async_trait]
impl PolicySource for StaticPolicies {
    async fn policy_for(&self, tenant_id: &str) -> Result<Option<RetentionPolicy>, StoreError> {
        Ok(self.policies.get(tenant_id).copied())
    }
}

/// Two sources consulted in order per key; the primary wins.
pub struct ChainedPolicies {
    primary: Arc<dyn PolicySource>,
    fallback: Arc<dyn PolicySource>,
}

impl ChainedPolicies {
    pub fn new(primary: Arc<dyn PolicySource>, fallback: Arc<dyn PolicySource>) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl PolicySource for ChainedPolicies {
    async fn policy_for(&self, tenant_id: &str) -> Result<Option<RetentionPolicy>, StoreError> {
        match self.primary.policy_for(tenant_id).await? {
            Some(policy) => Ok(Some(policy)),
            None => self.fallback.policy_for(tenant_id).await,
        }
    }
}

//! # Bucket
//!
//! A namespaced request for a bucket in the object store with an access policy.

use super::common::PhaseStatus;
use kube::CustomResource;
use serde::{Deserialize, Serialize};

/// Bucket Custom Resource Definition
///
/// # Example
///
/// ```yaml
/// apiVersion: assetstore.kyma-project.io/v1alpha2
/// kind: Bucket
/// metadata:
///   name: docs
///   namespace: default
/// spec:
///   region: us-east-1
///   policy: readonly
/// ```
#[derive(CustomResource, Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "Bucket",
    group = "assetstore.kyma-project.io",
    version = "v1alpha2",
    namespaced,
    status = "BucketStatus",
    shortname = "bkt",
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Reason", "type":"string", "jsonPath":".status.reason"}"#,
    printcolumn = r#"{"name":"Remote", "type":"string", "jsonPath":".status.remoteName"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BucketSpec {
    /// Location constraint for the remote bucket; empty uses the store's default region
    #[serde(default)]
    pub region: Option<String>,
    /// Anonymous access policy applied to the remote bucket
    #[serde(default)]
    pub policy: BucketPolicy,
}

/// Anonymous access policy
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize, schemars::JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum BucketPolicy {
    #[default]
    None,
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl BucketPolicy {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            BucketPolicy::None => "none",
            BucketPolicy::ReadOnly => "readonly",
            BucketPolicy::WriteOnly => "writeonly",
            BucketPolicy::ReadWrite => "readwrite",
        }
    }
}

impl std::fmt::Display for BucketPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse Bucket lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
pub enum BucketPhase {
    Ready,
    Failed,
}

impl BucketPhase {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            BucketPhase::Ready => "Ready",
            BucketPhase::Failed => "Failed",
        }
    }
}

/// Fine-grained explanation attached to a Bucket phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketReason {
    NotFound,
    CreationFailure,
    VerificationFailure,
    PolicyUpdated,
    PolicyUpdateFailed,
    PolicyVerificationFailed,
}

impl BucketReason {
    const ALL: [BucketReason; 6] = [
        BucketReason::NotFound,
        BucketReason::CreationFailure,
        BucketReason::VerificationFailure,
        BucketReason::PolicyUpdated,
        BucketReason::PolicyUpdateFailed,
        BucketReason::PolicyVerificationFailed,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            BucketReason::NotFound => "BucketNotFound",
            BucketReason::CreationFailure => "BucketCreationFailure",
            BucketReason::VerificationFailure => "BucketVerificationFailure",
            BucketReason::PolicyUpdated => "BucketPolicyUpdated",
            BucketReason::PolicyUpdateFailed => "BucketPolicyUpdateFailed",
            BucketReason::PolicyVerificationFailed => "BucketPolicyVerificationFailed",
        }
    }

    /// Parse a persisted reason string
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.as_str() == value)
    }

    /// Render the human-readable message; `detail` fills the template's placeholder
    #[must_use]
    pub fn message(&self, detail: &str) -> String {
        let template = match self {
            BucketReason::NotFound => "Bucket {} doesn't exist anymore",
            BucketReason::CreationFailure => "Bucket couldn't be created due to error {}",
            BucketReason::VerificationFailure => {
                "Bucket couldn't be verified due to error {}"
            }
            BucketReason::PolicyUpdated => "Policy is up to date",
            BucketReason::PolicyUpdateFailed => "Policy couldn't be set due to error {}",
            BucketReason::PolicyVerificationFailed => {
                "Policy couldn't be verified due to error {}"
            }
        };
        template.replacen("{}", detail, 1)
    }
}

impl std::fmt::Display for BucketReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observed state of a Bucket
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BucketStatus {
    /// Values: Ready, Failed
    #[serde(default)]
    pub phase: Option<BucketPhase>,
    /// Reason code, one of the `Bucket*` reasons
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub observed_generation: i64,
    /// Last time the bucket was verified (RFC3339)
    #[serde(default)]
    pub last_heartbeat_time: Option<String>,
    /// Generated name of the remote bucket; empty until the bucket is created
    #[serde(default)]
    pub remote_name: String,
    /// Public URL of the remote bucket
    #[serde(default)]
    pub url: String,
}

impl BucketStatus {
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.phase == Some(BucketPhase::Ready)
    }

    #[must_use]
    pub fn reason_code(&self) -> Option<BucketReason> {
        BucketReason::parse(&self.reason)
    }
}

impl PhaseStatus for BucketStatus {
    fn observed_generation(&self) -> i64 {
        self.observed_generation
    }

    fn phase_str(&self) -> &str {
        self.phase.as_ref().map_or("", BucketPhase::as_str)
    }

    fn reason(&self) -> &str {
        &self.reason
    }
}

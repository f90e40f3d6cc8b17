//! # Asset
//!
//! A namespaced request to pull content from a URL, pass it through webhooks
//! and publish it into a Bucket.

use super::common::{preserve_unknown_fields, PhaseStatus};
use kube::CustomResource;
use serde::{Deserialize, Serialize};

/// Asset Custom Resource Definition
///
/// # Example
///
/// ```yaml
/// apiVersion: assetstore.kyma-project.io/v1alpha2
/// kind: Asset
/// metadata:
///   name: orders-docs
///   namespace: default
/// spec:
///   bucketRef:
///     name: docs
///   source:
///     url: https://example.com/orders.tar.gz
///     mode: package
///     filter: \.md$
///     validationWebhookService:
///       - name: markdown-lint
///         namespace: kyma-system
///         endpoint: /validate
/// ```
#[derive(CustomResource, Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "Asset",
    group = "assetstore.kyma-project.io",
    version = "v1alpha2",
    namespaced,
    status = "AssetStatus",
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Reason", "type":"string", "jsonPath":".status.reason"}"#,
    printcolumn = r#"{"name":"Bucket", "type":"string", "jsonPath":".spec.bucketRef.name"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AssetSpec {
    /// Bucket in the same namespace that receives the content
    pub bucket_ref: AssetBucketRef,
    pub source: AssetSource,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AssetBucketRef {
    pub name: String,
}

/// Where the content comes from and which webhooks process it
#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AssetSource {
    pub url: String,
    #[serde(default)]
    pub mode: AssetMode,
    /// Regex matched against file paths relative to the content root
    #[serde(default)]
    pub filter: Option<String>,
    #[serde(default)]
    pub validation_webhook_service: Vec<WebhookService>,
    #[serde(default)]
    pub mutation_webhook_service: Vec<WebhookService>,
    #[serde(default)]
    pub metadata_webhook_service: Vec<WebhookService>,
}

/// `single` downloads one file, `package` downloads and unpacks an archive
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum AssetMode {
    #[default]
    Single,
    Package,
}

/// A webhook target
///
/// `endpoint` is either a path served by `<name>.<namespace>` inside the cluster
/// or an absolute `http(s)://` URL.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WebhookService {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub endpoint: String,
    /// Only files whose relative path matches this regex are sent
    #[serde(default)]
    pub filter: Option<String>,
}

/// Coarse Asset lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
pub enum AssetPhase {
    Pending,
    Ready,
    Failed,
}

impl AssetPhase {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetPhase::Pending => "Pending",
            AssetPhase::Ready => "Ready",
            AssetPhase::Failed => "Failed",
        }
    }
}

/// Fine-grained explanation attached to an Asset phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetReason {
    Scheduled,
    BucketNotReady,
    BucketError,
    RemoteContentVerificationError,
    MissingContent,
    Uploaded,
    Cleaned,
    CleanupError,
    Pulled,
    PullingFailed,
    Mutated,
    MutationFailed,
    MutationError,
    Validated,
    ValidationFailed,
    ValidationError,
    MetadataExtracted,
    MetadataExtractionFailed,
    UploadFailed,
}

impl AssetReason {
    const ALL: [AssetReason; 19] = [
        AssetReason::Scheduled,
        AssetReason::BucketNotReady,
        AssetReason::BucketError,
        AssetReason::RemoteContentVerificationError,
        AssetReason::MissingContent,
        AssetReason::Uploaded,
        AssetReason::Cleaned,
        AssetReason::CleanupError,
        AssetReason::Pulled,
        AssetReason::PullingFailed,
        AssetReason::Mutated,
        AssetReason::MutationFailed,
        AssetReason::MutationError,
        AssetReason::Validated,
        AssetReason::ValidationFailed,
        AssetReason::ValidationError,
        AssetReason::MetadataExtracted,
        AssetReason::MetadataExtractionFailed,
        AssetReason::UploadFailed,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetReason::Scheduled => "Scheduled",
            AssetReason::BucketNotReady => "BucketNotReady",
            AssetReason::BucketError => "BucketError",
            AssetReason::RemoteContentVerificationError => "RemoteContentVerificationError",
            AssetReason::MissingContent => "MissingContent",
            AssetReason::Uploaded => "Uploaded",
            AssetReason::Cleaned => "Cleaned",
            AssetReason::CleanupError => "CleanupError",
            AssetReason::Pulled => "Pulled",
            AssetReason::PullingFailed => "PullingFailed",
            AssetReason::Mutated => "Mutated",
            AssetReason::MutationFailed => "MutationFailed",
            AssetReason::MutationError => "MutationError",
            AssetReason::Validated => "Validated",
            AssetReason::ValidationFailed => "ValidationFailed",
            AssetReason::ValidationError => "ValidationError",
            AssetReason::MetadataExtracted => "MetadataExtracted",
            AssetReason::MetadataExtractionFailed => "MetadataExtractionFailed",
            AssetReason::UploadFailed => "UploadFailed",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.as_str() == value)
    }

    /// Render the human-readable message; `detail` fills the template's placeholder
    #[must_use]
    pub fn message(&self, detail: &str) -> String {
        let template = match self {
            AssetReason::Scheduled => "Asset scheduled for processing",
            AssetReason::BucketNotReady => "Referenced bucket is not ready",
            AssetReason::BucketError => "Reading bucket status failed due to error {}",
            AssetReason::RemoteContentVerificationError => {
                "Asset content couldn't be verified due to error {}"
            }
            AssetReason::MissingContent => "Asset content is missing in the bucket",
            AssetReason::Uploaded => "Asset content has been uploaded",
            AssetReason::Cleaned => "Stale asset content has been removed from the bucket",
            AssetReason::CleanupError => "Stale asset content couldn't be removed due to error {}",
            AssetReason::Pulled => "Asset content has been pulled",
            AssetReason::PullingFailed => "Asset content couldn't be pulled due to error {}",
            AssetReason::Mutated => "Asset content has been mutated",
            AssetReason::MutationFailed => "Asset content mutation failed: {}",
            AssetReason::MutationError => "Asset content couldn't be mutated due to error {}",
            AssetReason::Validated => "Asset content has been validated",
            AssetReason::ValidationFailed => "Asset content validation failed: {}",
            AssetReason::ValidationError => "Asset content couldn't be validated due to error {}",
            AssetReason::MetadataExtracted => "Metadata has been extracted from asset content",
            AssetReason::MetadataExtractionFailed => {
                "Metadata couldn't be extracted due to error {}"
            }
            AssetReason::UploadFailed => "Asset content couldn't be uploaded due to error {}",
        };
        template.replacen("{}", detail, 1)
    }
}

impl std::fmt::Display for AssetReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observed state of an Asset
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AssetStatus {
    /// Values: Pending, Ready, Failed
    #[serde(default)]
    pub phase: Option<AssetPhase>,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub observed_generation: i64,
    /// Last time the content was verified or uploaded (RFC3339)
    #[serde(default)]
    pub last_heartbeat_time: Option<String>,
    #[serde(default)]
    pub asset_ref: AssetStatusRef,
}

/// Where the published content lives
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AssetStatusRef {
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub files: Vec<AssetFile>,
}

/// One published file, path relative to `baseUrl`
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AssetFile {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub metadata: Option<serde_json::Value>,
}

impl AssetStatus {
    #[must_use]
    pub fn reason_code(&self) -> Option<AssetReason> {
        AssetReason::parse(&self.reason)
    }
}

impl PhaseStatus for AssetStatus {
    fn observed_generation(&self) -> i64 {
        self.observed_generation
    }

    fn phase_str(&self) -> &str {
        self.phase.as_ref().map_or("", AssetPhase::as_str)
    }

    fn reason(&self) -> &str {
        &self.reason
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_parses_webhook_lists() {
        let spec: AssetSpec = serde_json::from_value(serde_json::json!({
            "bucketRef": {"name": "docs"},
            "source": {
                "url": "https://example.com/a.tgz",
                "mode": "package",
                "mutationWebhookService": [
                    {"name": "m", "namespace": "ns", "endpoint": "/mutate", "filter": "\\.md$"}
                ]
            }
        }))
        .unwrap();

        assert_eq!(spec.bucket_ref.name, "docs");
        assert_eq!(spec.source.mode, AssetMode::Package);
        assert_eq!(spec.source.mutation_webhook_service.len(), 1);
        assert!(spec.source.validation_webhook_service.is_empty());
        assert_eq!(
            spec.source.mutation_webhook_service[0].filter.as_deref(),
            Some("\\.md$")
        );
    }

    #[test]
    fn test_every_reason_parses_back() {
        for reason in AssetReason::ALL {
            assert_eq!(AssetReason::parse(reason.as_str()), Some(reason));
        }
    }

    #[test]
    fn test_file_metadata_is_omitted_when_absent() {
        let file = AssetFile {
            name: "README.md".to_string(),
            metadata: None,
        };
        let json = serde_json::to_value(&file).unwrap();
        assert!(json.get("metadata").is_none());
    }

    #[test]
    fn test_progress_comparison_ignores_message_and_heartbeat() {
        let a = AssetStatus {
            phase: Some(AssetPhase::Ready),
            reason: AssetReason::Uploaded.to_string(),
            observed_generation: 2,
            message: "one".to_string(),
            last_heartbeat_time: Some("2024-01-01T00:00:00Z".to_string()),
            ..AssetStatus::default()
        };
        let b = AssetStatus {
            message: "two".to_string(),
            last_heartbeat_time: Some("2024-02-01T00:00:00Z".to_string()),
            ..a.clone()
        };
        assert!(a.same_progress_as(&b));

        let c = AssetStatus {
            observed_generation: 3,
            ..a.clone()
        };
        assert!(!a.same_progress_as(&c));
    }
}

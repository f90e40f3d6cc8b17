//! # Bucket Policies
//!
//! Renders anonymous-access bucket policies and compares them with what the
//! store reports.
//!
//! Stores may hand a policy back either as the statements we wrote or merged
//! into fewer statements, so comparison flattens both sides into a set of
//! `(effect, action, resource)` triples.

use crate::constants::BUCKET_POLICY_VERSION;
use crate::crd::BucketPolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

const BUCKET_READ_ACTIONS: &[&str] = &["s3:GetBucketLocation", "s3:ListBucket"];
const BUCKET_WRITE_ACTIONS: &[&str] = &["s3:GetBucketLocation", "s3:ListBucketMultipartUploads"];
const OBJECT_READ_ACTIONS: &[&str] = &["s3:GetObject"];
const OBJECT_WRITE_ACTIONS: &[&str] = &[
    "s3:AbortMultipartUpload",
    "s3:DeleteObject",
    "s3:ListMultipartUploadParts",
    "s3:PutObject",
];

/// A field that may be a single value or a list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    fn iter(&self) -> std::slice::Iter<'_, T> {
        match self {
            OneOrMany::One(value) => std::slice::from_ref(value).iter(),
            OneOrMany::Many(values) => values.iter(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyDocument {
    #[serde(default)]
    pub version: String,
    pub statement: OneOrMany<PolicyStatement>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyStatement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    pub effect: String,
    #[serde(default)]
    pub principal: serde_json::Value,
    pub action: OneOrMany<String>,
    pub resource: OneOrMany<String>,
}

/// Build the policy document for `policy`; `None` means "no policy at all"
#[must_use]
pub fn render_policy(bucket: &str, policy: BucketPolicy) -> Option<PolicyDocument> {
    let (bucket_actions, object_actions): (Vec<&str>, Vec<&str>) = match policy {
        BucketPolicy::None => return None,
        BucketPolicy::ReadOnly => (BUCKET_READ_ACTIONS.to_vec(), OBJECT_READ_ACTIONS.to_vec()),
        BucketPolicy::WriteOnly => (BUCKET_WRITE_ACTIONS.to_vec(), OBJECT_WRITE_ACTIONS.to_vec()),
        BucketPolicy::ReadWrite => {
            let mut bucket_actions: Vec<&str> = BUCKET_READ_ACTIONS
                .iter()
                .chain(BUCKET_WRITE_ACTIONS)
                .copied()
                .collect();
            bucket_actions.sort_unstable();
            bucket_actions.dedup();
            let object_actions = OBJECT_READ_ACTIONS
                .iter()
                .chain(OBJECT_WRITE_ACTIONS)
                .copied()
                .collect();
            (bucket_actions, object_actions)
        }
    };

    let statement = |actions: Vec<&str>, resource: String| PolicyStatement {
        sid: None,
        effect: "Allow".to_string(),
        principal: serde_json::json!({ "AWS": ["*"] }),
        action: OneOrMany::Many(actions.into_iter().map(ToString::to_string).collect()),
        resource: OneOrMany::Many(vec![resource]),
    };

    Some(PolicyDocument {
        version: BUCKET_POLICY_VERSION.to_string(),
        statement: OneOrMany::Many(vec![
            statement(bucket_actions, format!("arn:aws:s3:::{bucket}")),
            statement(object_actions, format!("arn:aws:s3:::{bucket}/*")),
        ]),
    })
}

/// Serialize the policy for `policy`, or `None` when the bucket should have no policy
pub fn render_policy_json(bucket: &str, policy: BucketPolicy) -> Result<Option<String>> {
    render_policy(bucket, policy)
        .map(|doc| serde_json::to_string(&doc).context("while marshalling bucket policy"))
        .transpose()
}

/// Flatten a document into `(effect, action, resource)` triples
#[must_use]
pub fn policy_triples(doc: &PolicyDocument) -> BTreeSet<(String, String, String)> {
    let mut triples = BTreeSet::new();
    for statement in doc.statement.iter() {
        for action in statement.action.iter() {
            for resource in statement.resource.iter() {
                triples.insert((statement.effect.clone(), action.clone(), resource.clone()));
            }
        }
    }
    triples
}

/// Compare the live policy JSON (if any) with the declared policy
///
/// A missing or empty live policy equals [`BucketPolicy::None`].
pub fn policy_matches(bucket: &str, expected: BucketPolicy, live: Option<&str>) -> Result<bool> {
    let expected = render_policy(bucket, expected)
        .map(|doc| policy_triples(&doc))
        .unwrap_or_default();

    let live = match live.map(str::trim).filter(|l| !l.is_empty()) {
        Some(live) => {
            let doc: PolicyDocument = serde_json::from_str(live)
                .with_context(|| format!("while unmarshalling policy for bucket {bucket}"))?;
            policy_triples(&doc)
        }
        None => BTreeSet::new(),
    };

    Ok(expected == live)
}

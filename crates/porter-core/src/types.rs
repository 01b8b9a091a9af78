//! Core action vocabulary
//!
//! Defines the types shared by plan generation and execution:
//! - Action identifiers and resource references
//! - The closed enumeration of action kinds and the phase each belongs to
//! - Action status and the [`Action`] record itself

use crate::keyer::IdempotencyKey;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Identifier of an action within a single plan
///
/// Assigned sequentially at generation time. Ordering follows emission
/// order, not dependency order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionId(pub u32);

impl ActionId {
    /// Raw numeric value
    #[inline]
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "A{:04}", self.0)
    }
}

/// Reference to a resource produced by some action
///
/// `resource_type` is the id-map namespace (`"label"`, `"issue_comment"`, ...)
/// and `id` the source-side identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub id: String,
}

impl ResourceRef {
    /// Create a new resource reference
    #[inline]
    pub fn new(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource_type, self.id)
    }
}

/// Coarse execution bucket
///
/// Declaration order is execution order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    Foundation,
    CiSetup,
    IssueImport,
    PrImport,
    Wiki,
    Releases,
    Packages,
    Governance,
    Integrations,
    Preservation,
}

impl Phase {
    /// All phases in execution order
    pub const ALL: [Phase; 10] = [
        Phase::Foundation,
        Phase::CiSetup,
        Phase::IssueImport,
        Phase::PrImport,
        Phase::Wiki,
        Phase::Releases,
        Phase::Packages,
        Phase::Governance,
        Phase::Integrations,
        Phase::Preservation,
    ];

    /// Stable string form
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Phase::Foundation => "foundation",
            Phase::CiSetup => "ci-setup",
            Phase::IssueImport => "issue-import",
            Phase::PrImport => "pr-import",
            Phase::Wiki => "wiki",
            Phase::Releases => "releases",
            Phase::Packages => "packages",
            Phase::Governance => "governance",
            Phase::Integrations => "integrations",
            Phase::Preservation => "preservation",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

macro_rules! action_kinds {
    ($( $variant:ident => $name:literal, $phase:ident, $resource:literal; )*) => {
        /// Closed enumeration of remote operations
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        pub enum ActionKind {
            $(
                #[serde(rename = $name)]
                $variant,
            )*
        }

        impl ActionKind {
            /// Every kind, in declaration order
            pub const ALL: &'static [ActionKind] = &[$(ActionKind::$variant,)*];

            /// Stable string tag
            #[must_use]
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(ActionKind::$variant => $name,)*
                }
            }

            /// Phase this kind executes in
            #[must_use]
            pub const fn phase(self) -> Phase {
                match self {
                    $(ActionKind::$variant => Phase::$phase,)*
                }
            }

            /// Id-map namespace of the resource this kind produces
            #[must_use]
            pub const fn resource_type(self) -> &'static str {
                match self {
                    $(ActionKind::$variant => $resource,)*
                }
            }
        }

        impl FromStr for ActionKind {
            type Err = UnknownActionKind;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($name => Ok(ActionKind::$variant),)*
                    other => Err(UnknownActionKind(other.to_string())),
                }
            }
        }
    };
}

action_kinds! {
    RepositoryCreate => "repository-create", Foundation, "repository";
    RepositoryPush => "repository-push", Foundation, "repository_push";
    LfsPush => "lfs-push", Foundation, "lfs_push";
    RepositorySettings => "repository-settings", Foundation, "repository_settings";
    EnvironmentCreate => "environment-create", CiSetup, "environment";
    VariableSet => "variable-set", CiSetup, "ci_variable";
    SecretSet => "secret-set", CiSetup, "ci_secret";
    WorkflowCommit => "workflow-commit", CiSetup, "ci_workflow";
    LabelCreate => "label-create", IssueImport, "label";
    MilestoneCreate => "milestone-create", IssueImport, "milestone";
    IssueCreate => "issue-create", IssueImport, "issue";
    CommentAdd => "comment-add", IssueImport, "issue_comment";
    PrCreate => "pr-create", PrImport, "pull_request";
    PrCommentAdd => "pr-comment-add", PrImport, "pr_comment";
    PrReviewAdd => "pr-review-add", PrImport, "pr_review";
    WikiPush => "wiki-push", Wiki, "wiki";
    ReleaseCreate => "release-create", Releases, "release";
    ReleaseAssetUpload => "release-asset-upload", Releases, "release_asset";
    PackagePublish => "package-publish", Packages, "package";
    BranchProtectionSet => "branch-protection-set", Governance, "branch_protection";
    TeamCreate => "team-create", Governance, "team";
    CollaboratorAdd => "collaborator-add", Governance, "collaborator";
    WebhookCreate => "webhook-create", Integrations, "webhook";
    DeployKeyAdd => "deploy-key-add", Integrations, "deploy_key";
    ArchiveUpload => "archive-upload", Preservation, "project_archive";
    SourceLinkComment => "source-link-comment", Preservation, "source_link_comment";
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unrecognised action kind tag
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown action kind: {0}")]
pub struct UnknownActionKind(pub String);

/// Lifecycle status of an action during apply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionStatus {
    #[default]
    Pending,
    Ready,
    Running,
    Succeeded,
    Failed,
    SkippedBlocked,
}

impl ActionStatus {
    /// Whether no further transition can happen
    #[inline]
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::SkippedBlocked)
    }

    /// Whether dependents of an action in this status can never run
    #[inline]
    #[must_use]
    pub const fn blocks_dependents(self) -> bool {
        matches!(self, Self::Failed | Self::SkippedBlocked)
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::SkippedBlocked => "skipped-blocked",
        };
        f.write_str(s)
    }
}

/// A unit of remote work derived from a source entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub id: ActionId,
    pub kind: ActionKind,
    /// Source-side identifier of the resource this action produces
    pub source_id: String,
    pub phase: Phase,
    /// Opaque payload consumed only by the matching executor
    pub parameters: Value,
    /// Resources that must exist before this action runs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requires: Vec<ResourceRef>,
    #[serde(default)]
    pub dependencies: BTreeSet<ActionId>,
    pub idempotency_key: IdempotencyKey,
    #[serde(default)]
    pub requires_user_input: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub user_input_prompts: Vec<String>,
    /// Run state lives in the engine and the apply report; these stay at
    /// their defaults in a plan document and are never serialized.
    #[serde(skip)]
    pub status: ActionStatus,
    #[serde(skip)]
    pub attempt_count: u32,
    #[serde(skip)]
    pub last_error: Option<String>,
}

impl Action {
    /// Reference to the resource this action produces
    #[must_use]
    pub fn produces(&self) -> ResourceRef {
        ResourceRef::new(self.kind.resource_type(), self.source_id.clone())
    }

    /// Short human label, e.g. `A0003 label-create[bug]`
    #[must_use]
    pub fn label(&self) -> String {
        format!("{} {}[{}]", self.id, self.kind, self.source_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_through_tag() {
        for kind in ActionKind::ALL {
            assert_eq!(kind.as_str().parse::<ActionKind>().unwrap(), *kind);
        }
        assert!("frobnicate".parse::<ActionKind>().is_err());
    }

    #[test]
    fn kind_serializes_as_tag() {
        let json = serde_json::to_string(&ActionKind::BranchProtectionSet).unwrap();
        assert_eq!(json, "\"branch-protection-set\"");
    }

    #[test]
    fn phases_are_ordered() {
        let mut sorted = Phase::ALL;
        sorted.sort();
        assert_eq!(sorted, Phase::ALL);
        assert!(ActionKind::RepositoryCreate.phase() < ActionKind::WorkflowCommit.phase());
        assert!(ActionKind::ReleaseCreate.phase() < ActionKind::BranchProtectionSet.phase());
    }

    #[test]
    fn terminal_statuses() {
        assert!(ActionStatus::Succeeded.is_terminal());
        assert!(ActionStatus::SkippedBlocked.is_terminal());
        assert!(!ActionStatus::Ready.is_terminal());
        assert!(ActionStatus::Failed.blocks_dependents());
        assert!(!ActionStatus::Succeeded.blocks_dependents());
    }

    #[test]
    fn action_id_display() {
        assert_eq!(ActionId(7).to_string(), "A0007");
    }
}

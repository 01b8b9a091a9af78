//! Plan errors
//!
//! Two families:
//! - [`PlanError`] for inputs the generator cannot work with at all
//! - [`ValidationError`] for data-shaped problems, collected into the plan's
//!   validation report instead of being raised

use porter_core::{ActionId, CatalogError, IdempotencyKey, ResourceRef};
use serde::{Deserialize, Serialize};

/// Fatal plan generation or loading failure
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    /// Catalog could not be built
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// Entity payload violates the shape its emission rule needs
    #[error("malformed entity {entity}: {reason}")]
    MalformedEntity { entity: String, reason: String },

    /// Action id space exhausted
    #[error("plan exceeds {max} actions")]
    TooManyActions { max: u32 },

    /// Plan document could not be (de)serialized
    #[error("plan serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PlanError {
    pub(crate) fn malformed(entity: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedEntity {
            entity: entity.into(),
            reason: reason.into(),
        }
    }
}

/// Data-shaped plan defect
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "error", rename_all = "kebab-case")]
pub enum ValidationError {
    /// Declared dependencies form a cycle; `path` starts and ends on the same action
    #[error("dependency cycle: {}", format_path(.path))]
    Cycle { path: Vec<ActionId> },

    /// No action produces a required resource
    #[error("{action} depends on {missing}, which no action produces")]
    DanglingReference {
        action: ActionId,
        missing: ResourceRef,
    },

    /// Dependency names an action id outside the plan
    #[error("{action} depends on unknown action {dependency}")]
    UnknownDependency {
        action: ActionId,
        dependency: ActionId,
    },

    /// Two actions share an idempotency key
    #[error("duplicate idempotency key {key} on {}", format_ids(.actions))]
    DuplicateKey {
        key: IdempotencyKey,
        actions: Vec<ActionId>,
    },

    /// Two actions claim to produce the same resource
    #[error("{resource} is produced by {}", format_ids(.actions))]
    DuplicateProducer {
        resource: ResourceRef,
        actions: Vec<ActionId>,
    },
}

fn format_path(path: &[ActionId]) -> String {
    path.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

fn format_ids(ids: &[ActionId]) -> String {
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_message_lists_path() {
        let err = ValidationError::Cycle {
            path: vec![ActionId(1), ActionId(2), ActionId(1)],
        };
        assert_eq!(err.to_string(), "dependency cycle: A0001 -> A0002 -> A0001");
    }

    #[test]
    fn validation_errors_serialize_tagged() {
        let err = ValidationError::DanglingReference {
            action: ActionId(3),
            missing: ResourceRef::new("label", "ghost"),
        };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["error"], "dangling-reference");
        assert_eq!(json["missing"]["type"], "label");
    }
}

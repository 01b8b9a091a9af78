//! Error types shared across porter crates

use crate::catalog::EntityType;
use crate::types::ActionStatus;

/// Catalog loading and validation failures
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// Two entities share a `(type, id)` pair
    #[error("duplicate entity {entity_type}:{id}")]
    DuplicateEntity { entity_type: EntityType, id: String },

    /// Entity id is blank
    #[error("{0} entity has an empty id")]
    EmptyId(EntityType),

    /// Payload shape is unusable
    #[error("invalid payload for {entity}: {reason}")]
    InvalidPayload { entity: String, reason: String },

    /// A plan covers exactly one project repository
    #[error("catalog carries {0} repositories, at most one is allowed")]
    MultipleRepositories(usize),

    /// Malformed catalog document
    #[error("catalog parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Illegal action status transition
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("illegal status transition {from} -> {to}")]
pub struct TransitionError {
    pub from: ActionStatus,
    pub to: ActionStatus,
}

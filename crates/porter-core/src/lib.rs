//! Porter Core - migration vocabulary
//!
//! Shared building blocks for planning and applying a project migration:
//! - The entity catalog produced by export and transform stages
//! - Action kinds, phases and statuses
//! - Deterministic idempotency keys
//! - Parameter placeholders resolved at plan or run time
//!
//! # Example
//!
//! ```rust
//! use porter_core::{ActionKind, IdempotencyKeyer};
//! use serde_json::json;
//!
//! let keyer = IdempotencyKeyer::new();
//! let key = keyer.key(ActionKind::LabelCreate, "bug", &json!({"name": "bug"}));
//! assert!(key.as_str().starts_with("ik1_"));
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod catalog;
pub mod error;
pub mod keyer;
pub mod placeholder;
pub mod state;
pub mod types;

pub use catalog::{Entity, EntityCatalog, EntityRef, EntityType};
pub use error::{CatalogError, TransitionError};
pub use keyer::{canonical_digest, canonical_json, IdempotencyKey, IdempotencyKeyer, KeyError};
pub use state::{allowed_transitions, validate_transition};
pub use types::{
    Action, ActionId, ActionKind, ActionStatus, Phase, ResourceRef, UnknownActionKind,
};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with porter types
    pub use crate::{
        Action, ActionId, ActionKind, ActionStatus, Entity, EntityCatalog, EntityType,
        IdempotencyKey, Phase, ResourceRef,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

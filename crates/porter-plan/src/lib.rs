//! Porter Plan - plan generation
//!
//! Consumes an [`EntityCatalog`](porter_core::EntityCatalog) and produces a
//! validated, dependency-ordered [`Plan`]:
//! - Emission rules turn entities into actions
//! - [`DependencyResolver`] adds declared and structural edges
//! - Graph checks reject cycles, dangling references and duplicates
//!
//! # Example
//!
//! ```rust
//! use porter_core::{Entity, EntityCatalog, EntityType};
//! use porter_plan::PlanGenerator;
//! use serde_json::json;
//!
//! let catalog = EntityCatalog::new(
//!     "gitlab:group/app",
//!     vec![
//!         Entity::new(EntityType::Repository, "app", json!({"name": "app"})),
//!         Entity::new(EntityType::Label, "bug", json!({"name": "bug"})),
//!     ],
//! )?;
//! let plan = PlanGenerator::new().generate(&catalog)?;
//! assert!(plan.is_runnable());
//! assert_eq!(plan.len(), 2);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod emit;
pub mod error;
pub mod generator;
pub mod graph;
pub mod plan;
pub mod resolver;

pub use error::{PlanError, ValidationError};
pub use generator::PlanGenerator;
pub use plan::{PhaseGroup, Plan, PlanStats, ValidationReport, PLAN_FORMAT_VERSION};
pub use resolver::{DependencyResolver, Edge, EdgeOrigin, Resolution};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

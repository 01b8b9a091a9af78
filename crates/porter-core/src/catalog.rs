//! Entity catalog
//!
//! Read-only view over the entities produced by the export and transform
//! collaborators. Each entity is a typed record with an id, an opaque JSON
//! payload and optional declared references to other entities.

use crate::error::CatalogError;
use crate::types::ResourceRef;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Kind of exported entity
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Repository,
    Environment,
    CiVariable,
    CiSecret,
    CiWorkflow,
    Label,
    Milestone,
    Issue,
    PullRequest,
    Wiki,
    Release,
    Package,
    BranchProtection,
    Team,
    Collaborator,
    Webhook,
    DeployKey,
    ProjectArchive,
    IdentityMapping,
}

impl EntityType {
    /// Stable string form, also the id-map namespace of the primary action
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Repository => "repository",
            Self::Environment => "environment",
            Self::CiVariable => "ci_variable",
            Self::CiSecret => "ci_secret",
            Self::CiWorkflow => "ci_workflow",
            Self::Label => "label",
            Self::Milestone => "milestone",
            Self::Issue => "issue",
            Self::PullRequest => "pull_request",
            Self::Wiki => "wiki",
            Self::Release => "release",
            Self::Package => "package",
            Self::BranchProtection => "branch_protection",
            Self::Team => "team",
            Self::Collaborator => "collaborator",
            Self::Webhook => "webhook",
            Self::DeployKey => "deploy_key",
            Self::ProjectArchive => "project_archive",
            Self::IdentityMapping => "identity_mapping",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared dependency on another entity's creation
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub id: String,
}

impl EntityRef {
    /// Create a new entity reference
    #[inline]
    pub fn new(entity_type: EntityType, id: impl Into<String>) -> Self {
        Self {
            entity_type,
            id: id.into(),
        }
    }

    /// Id-map reference to the resource created from this entity
    #[must_use]
    pub fn to_resource(&self) -> ResourceRef {
        ResourceRef::new(self.entity_type.as_str(), self.id.clone())
    }
}

/// A typed record with an id and an opaque payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub id: String,
    #[serde(default = "empty_object")]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<EntityRef>,
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

impl Entity {
    /// Create an entity with the given payload
    pub fn new(entity_type: EntityType, id: impl Into<String>, payload: Value) -> Self {
        Self {
            entity_type,
            id: id.into(),
            payload,
            references: Vec::new(),
        }
    }

    /// Add a declared reference
    #[must_use]
    pub fn with_reference(mut self, entity_type: EntityType, id: impl Into<String>) -> Self {
        self.references.push(EntityRef::new(entity_type, id));
        self
    }

    /// Reference to this entity
    #[must_use]
    pub fn as_ref(&self) -> EntityRef {
        EntityRef::new(self.entity_type, self.id.clone())
    }

    /// Payload field lookup
    #[inline]
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.payload.get(name)
    }

    /// Array payload field, empty when absent or not an array
    #[must_use]
    pub fn list(&self, name: &str) -> &[Value] {
        self.payload
            .get(name)
            .and_then(Value::as_array)
            .map_or(&[], Vec::as_slice)
    }

    /// Boolean payload flag, false when absent
    #[must_use]
    pub fn flag(&self, name: &str) -> bool {
        self.payload.get(name).and_then(Value::as_bool).unwrap_or(false)
    }
}

#[derive(Debug, Deserialize)]
struct CatalogDocument {
    #[serde(default)]
    source: String,
    entities: Vec<Entity>,
}

/// Read-only, validated set of entities
///
/// Iteration order is stable: by entity type, then by id. Plan generation
/// relies on this for deterministic action ids.
#[derive(Debug, Clone)]
pub struct EntityCatalog {
    source: String,
    entities: Vec<Entity>,
    index: HashMap<(EntityType, String), usize>,
}

impl EntityCatalog {
    /// Build a catalog, rejecting records that cannot be repaired
    ///
    /// # Errors
    /// - `CatalogError::EmptyId` for an entity with a blank id
    /// - `CatalogError::DuplicateEntity` for repeated `(type, id)` pairs
    /// - `CatalogError::InvalidPayload` when a payload is not a JSON object
    /// - `CatalogError::MultipleRepositories` when more than one repository is present
    pub fn new(source: impl Into<String>, entities: Vec<Entity>) -> Result<Self, CatalogError> {
        let mut entities = entities;
        let mut repositories = 0usize;

        for entity in &mut entities {
            if entity.id.trim().is_empty() {
                return Err(CatalogError::EmptyId(entity.entity_type));
            }
            if entity.payload.is_null() {
                entity.payload = empty_object();
            }
            if !entity.payload.is_object() {
                return Err(CatalogError::InvalidPayload {
                    entity: format!("{}:{}", entity.entity_type, entity.id),
                    reason: "payload must be a JSON object".to_string(),
                });
            }
            if entity.entity_type == EntityType::Repository {
                repositories += 1;
            }
        }

        if repositories > 1 {
            return Err(CatalogError::MultipleRepositories(repositories));
        }

        entities.sort_by(|a, b| (a.entity_type, &a.id).cmp(&(b.entity_type, &b.id)));

        let mut index = HashMap::with_capacity(entities.len());
        for (pos, entity) in entities.iter().enumerate() {
            if index
                .insert((entity.entity_type, entity.id.clone()), pos)
                .is_some()
            {
                return Err(CatalogError::DuplicateEntity {
                    entity_type: entity.entity_type,
                    id: entity.id.clone(),
                });
            }
        }

        Ok(Self {
            source: source.into(),
            entities,
            index,
        })
    }

    /// Parse a catalog document `{ "source": ..., "entities": [...] }`
    ///
    /// # Errors
    /// Returns error on malformed JSON or any [`EntityCatalog::new`] failure
    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let doc: CatalogDocument = serde_json::from_str(json)?;
        Self::new(doc.source, doc.entities)
    }

    /// Source platform/project label
    #[inline]
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Number of entities
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Whether the catalog is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Iterate entities in stable order
    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.iter()
    }

    /// Entities of one type
    pub fn of_type(&self, entity_type: EntityType) -> impl Iterator<Item = &Entity> {
        self.entities
            .iter()
            .filter(move |e| e.entity_type == entity_type)
    }

    /// Lookup by type and id
    #[must_use]
    pub fn get(&self, entity_type: EntityType, id: &str) -> Option<&Entity> {
        self.index
            .get(&(entity_type, id.to_string()))
            .map(|&pos| &self.entities[pos])
    }

    /// Whether an entity exists
    #[must_use]
    pub fn contains(&self, entity: &EntityRef) -> bool {
        self.get(entity.entity_type, &entity.id).is_some()
    }

    /// The project repository, if the catalog carries one
    #[must_use]
    pub fn repository(&self) -> Option<&Entity> {
        self.of_type(EntityType::Repository).next()
    }

    /// Confirmed source-user → target-login mappings
    ///
    /// Collected from `identity_mapping` entities whose payload has
    /// `confirmed: true` and a `target` login.
    #[must_use]
    pub fn identity_map(&self) -> BTreeMap<String, String> {
        self.of_type(EntityType::IdentityMapping)
            .filter(|e| e.flag("confirmed"))
            .filter_map(|e| {
                e.field("target")
                    .and_then(Value::as_str)
                    .map(|target| (e.id.clone(), target.to_string()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn catalog_orders_entities() {
        let catalog = EntityCatalog::new(
            "gitlab",
            vec![
                Entity::new(EntityType::Label, "z", json!({})),
                Entity::new(EntityType::Repository, "repo", json!({})),
                Entity::new(EntityType::Label, "a", json!({})),
            ],
        )
        .unwrap();

        let order: Vec<_> = catalog.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(order, vec!["repo", "a", "z"]);
        assert_eq!(catalog.repository().unwrap().id, "repo");
    }

    #[test]
    fn catalog_rejects_duplicates() {
        let err = EntityCatalog::new(
            "gitlab",
            vec![
                Entity::new(EntityType::Label, "a", json!({})),
                Entity::new(EntityType::Label, "a", json!({})),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, CatalogError::DuplicateEntity { .. }));
    }

    #[test]
    fn catalog_rejects_blank_ids_and_scalar_payloads() {
        let err = EntityCatalog::new("x", vec![Entity::new(EntityType::Label, " ", json!({}))])
            .unwrap_err();
        assert!(matches!(err, CatalogError::EmptyId(EntityType::Label)));

        let err = EntityCatalog::new("x", vec![Entity::new(EntityType::Label, "a", json!(3))])
            .unwrap_err();
        assert!(matches!(err, CatalogError::InvalidPayload { .. }));
    }

    #[test]
    fn catalog_parses_document() {
        let catalog = EntityCatalog::from_json(
            r#"{
                "source": "gitlab:group/project",
                "entities": [
                    {"type": "repository", "id": "project", "payload": {"name": "project"}},
                    {"type": "issue", "id": "1", "references": [{"type": "label", "id": "bug"}]},
                    {"type": "label", "id": "bug"}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(catalog.len(), 3);
        let issue = catalog.get(EntityType::Issue, "1").unwrap();
        assert!(issue.payload.is_object());
        assert_eq!(issue.references[0], EntityRef::new(EntityType::Label, "bug"));
    }

    #[test]
    fn identity_map_uses_confirmed_only() {
        let catalog = EntityCatalog::new(
            "x",
            vec![
                Entity::new(
                    EntityType::IdentityMapping,
                    "alice",
                    json!({"target": "alice-gh", "confirmed": true}),
                ),
                Entity::new(
                    EntityType::IdentityMapping,
                    "bob",
                    json!({"target": "bob-gh", "confirmed": false}),
                ),
            ],
        )
        .unwrap();

        let map = catalog.identity_map();
        assert_eq!(map.get("alice").map(String::as_str), Some("alice-gh"));
        assert!(!map.contains_key("bob"));
    }
}

//! TOML-declared schema registry.
//!
//! The migrator is a pure consumer of schema metadata: entity types, their
//! fields, foreign-key targets, and expected table names are declared in a
//! TOML file and validated once at load time. This replaces runtime field
//! reflection with an explicit field-mapping table, so schema drift is
//! caught at startup rather than mid-copy.
use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::types::{EntityType, EntityTypeId, FieldSpec};

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("failed to read schema file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse schema file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("duplicate entity type {0}")]
    DuplicateEntityType(EntityTypeId),
    #[error("entity type {entity} field '{field}' references unknown entity type '{target}'")]
    UnknownReference {
        entity: EntityTypeId,
        field: String,
        target: String,
    },
    #[error("entity type {entity} field '{field}' has malformed reference '{target}' (expected namespace.name)")]
    MalformedReference {
        entity: EntityTypeId,
        field: String,
        target: String,
    },
    #[error("entity type {0} declares more than one primary key")]
    MultiplePrimaryKeys(EntityTypeId),
    #[error("entity type {0} declares no fields")]
    EmptyEntityType(EntityTypeId),
}

#[derive(Debug, Deserialize)]
struct SchemaFile {
    #[serde(rename = "entity", default)]
    entities: Vec<EntityDef>,
}

#[derive(Debug, Deserialize)]
struct EntityDef {
    namespace: String,
    name: String,
    table: String,
    #[serde(rename = "field", default)]
    fields: Vec<FieldDef>,
}

#[derive(Debug, Deserialize)]
struct FieldDef {
    name: String,
    #[serde(default)]
    references: Option<String>,
    #[serde(default)]
    primary_key: bool,
    #[serde(default)]
    auto_generated: bool,
    #[serde(default)]
    deferred: bool,
}

/// All declared entity types, indexed by identifier.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    entities: Vec<EntityType>,
    by_id: HashMap<EntityTypeId, usize>,
}

impl SchemaRegistry {
    pub fn from_path(path: &Path) -> Result<Self, SchemaError> {
        let display = path.display().to_string();
        let raw = std::fs::read_to_string(path).map_err(|source| SchemaError::Io {
            path: display.clone(),
            source,
        })?;
        Self::from_toml(&raw, &display)
    }

    pub fn from_toml(raw: &str, path: &str) -> Result<Self, SchemaError> {
        let file: SchemaFile = toml::from_str(raw).map_err(|source| SchemaError::Parse {
            path: path.to_string(),
            source,
        })?;
        Self::from_defs(file.entities)
    }

    fn from_defs(defs: Vec<EntityDef>) -> Result<Self, SchemaError> {
        let mut entities = Vec::with_capacity(defs.len());
        let mut by_id = HashMap::new();

        for def in defs {
            let id = EntityTypeId::new(def.namespace, def.name);
            if by_id.contains_key(&id) {
                return Err(SchemaError::DuplicateEntityType(id));
            }
            if def.fields.is_empty() {
                return Err(SchemaError::EmptyEntityType(id));
            }

            let mut fields = Vec::with_capacity(def.fields.len());
            let mut saw_primary_key = false;
            for field in def.fields {
                if field.primary_key {
                    if saw_primary_key {
                        return Err(SchemaError::MultiplePrimaryKeys(id));
                    }
                    saw_primary_key = true;
                }
                let references = match field.references {
                    Some(target) => Some(target.parse::<EntityTypeId>().map_err(|_| {
                        SchemaError::MalformedReference {
                            entity: id.clone(),
                            field: field.name.clone(),
                            target,
                        }
                    })?),
                    None => None,
                };
                fields.push(FieldSpec {
                    name: field.name,
                    references,
                    primary_key: field.primary_key,
                    auto_generated: field.auto_generated,
                    deferred: field.deferred,
                });
            }

            by_id.insert(id.clone(), entities.len());
            entities.push(EntityType {
                id,
                table: def.table,
                fields,
            });
        }

        // Foreign-key targets must resolve within the declared schema.
        for entity in &entities {
            for field in &entity.fields {
                if let Some(target) = &field.references {
                    if !by_id.contains_key(target) {
                        return Err(SchemaError::UnknownReference {
                            entity: entity.id.clone(),
                            field: field.name.clone(),
                            target: target.to_string(),
                        });
                    }
                }
            }
        }

        Ok(Self { entities, by_id })
    }

    pub fn entity_types(&self) -> &[EntityType] {
        &self.entities
    }

    pub fn get(&self, id: &EntityTypeId) -> Option<&EntityType> {
        self.by_id.get(id).map(|&idx| &self.entities[idx])
    }

    /// Entity types belonging to the given namespaces, in declaration order.
    pub fn in_namespaces(&self, namespaces: &[String]) -> Vec<EntityType> {
        self.entities
            .iter()
            .filter(|e| namespaces.iter().any(|ns| *ns == e.id.namespace))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHOP_SCHEMA: &str = r#"
        [[entity]]
        namespace = "shop"
        name = "order"
        table = "shop_order"

        [[entity.field]]
        name = "id"
        primary_key = true
        auto_generated = true

        [[entity.field]]
        name = "total"

        [[entity]]
        namespace = "shop"
        name = "orderitem"
        table = "shop_orderitem"

        [[entity.field]]
        name = "id"
        primary_key = true
        auto_generated = true

        [[entity.field]]
        name = "order_id"
        references = "shop.order"
    "#;

    #[test]
    fn parses_entities_and_resolves_references() {
        let registry = SchemaRegistry::from_toml(SHOP_SCHEMA, "test").unwrap();
        assert_eq!(registry.entity_types().len(), 2);

        let item = registry
            .get(&EntityTypeId::new("shop", "orderitem"))
            .unwrap();
        assert_eq!(item.table, "shop_orderitem");
        assert_eq!(
            item.field("order_id").unwrap().references,
            Some(EntityTypeId::new("shop", "order"))
        );
    }

    #[test]
    fn rejects_unknown_reference_targets() {
        let raw = r#"
            [[entity]]
            namespace = "shop"
            name = "orderitem"
            table = "shop_orderitem"

            [[entity.field]]
            name = "order_id"
            references = "shop.order"
        "#;
        let err = SchemaRegistry::from_toml(raw, "test").unwrap_err();
        assert!(matches!(err, SchemaError::UnknownReference { .. }));
    }

    #[test]
    fn rejects_duplicate_entity_types() {
        let raw = r#"
            [[entity]]
            namespace = "shop"
            name = "order"
            table = "shop_order"

            [[entity.field]]
            name = "id"

            [[entity]]
            namespace = "shop"
            name = "order"
            table = "shop_order_v2"

            [[entity.field]]
            name = "id"
        "#;
        let err = SchemaRegistry::from_toml(raw, "test").unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateEntityType(_)));
    }

    #[test]
    fn rejects_multiple_primary_keys() {
        let raw = r#"
            [[entity]]
            namespace = "shop"
            name = "order"
            table = "shop_order"

            [[entity.field]]
            name = "id"
            primary_key = true

            [[entity.field]]
            name = "uid"
            primary_key = true
        "#;
        let err = SchemaRegistry::from_toml(raw, "test").unwrap_err();
        assert!(matches!(err, SchemaError::MultiplePrimaryKeys(_)));
    }

    #[test]
    fn namespace_filter_keeps_declaration_order() {
        let registry = SchemaRegistry::from_toml(SHOP_SCHEMA, "test").unwrap();
        let shop = registry.in_namespaces(&["shop".to_string()]);
        assert_eq!(shop.len(), 2);
        assert_eq!(shop[0].id.name, "order");

        let none = registry.in_namespaces(&["member".to_string()]);
        assert!(none.is_empty());
    }
}

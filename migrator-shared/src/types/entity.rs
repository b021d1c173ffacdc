//! Entity-type metadata: identifiers, field specifications, and the
//! `EntityType` record schema the planner and copier operate on.
use std::fmt;
use std::str::FromStr;

/// Stable identifier for an entity type: a `(namespace, name)` pair,
/// rendered as `namespace.name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityTypeId {
    pub namespace: String,
    pub name: String,
}

impl EntityTypeId {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for EntityTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.namespace, self.name)
    }
}

/// Error returned when a fully-qualified identifier does not parse.
#[derive(Debug, thiserror::Error)]
#[error("invalid entity type identifier '{0}' (expected namespace.name)")]
pub struct ParseEntityTypeIdError(pub String);

impl FromStr for EntityTypeId {
    type Err = ParseEntityTypeIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('.') {
            Some((namespace, name)) if !namespace.is_empty() && !name.is_empty() => {
                Ok(Self::new(namespace, name))
            }
            _ => Err(ParseEntityTypeIdError(s.to_string())),
        }
    }
}

/// A single typed field on an entity type.
///
/// `references` marks the field as a foreign key to another entity type.
/// `deferred` marks a large opaque field that is copied in a separate
/// second pass instead of the bulk-metadata pass.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    pub references: Option<EntityTypeId>,
    pub primary_key: bool,
    pub auto_generated: bool,
    pub deferred: bool,
}

impl FieldSpec {
    pub fn plain(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            references: None,
            primary_key: false,
            auto_generated: false,
            deferred: false,
        }
    }
}

/// A named record schema: primary key, typed fields, and zero or more
/// foreign-key fields referencing other entity types.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityType {
    pub id: EntityTypeId,
    pub table: String,
    pub fields: Vec<FieldSpec>,
}

impl EntityType {
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn primary_key(&self) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.primary_key)
    }

    /// Foreign-key fields in declaration order.
    pub fn foreign_key_fields(&self) -> Vec<&FieldSpec> {
        self.fields.iter().filter(|f| f.references.is_some()).collect()
    }

    /// Fields flagged as deferred (large opaque columns).
    pub fn deferred_fields(&self) -> Vec<&FieldSpec> {
        self.fields.iter().filter(|f| f.deferred).collect()
    }

    pub fn has_deferred_fields(&self) -> bool {
        self.fields.iter().any(|f| f.deferred)
    }

    /// Column names excluding deferred fields, in declaration order.
    pub fn eager_field_names(&self) -> Vec<String> {
        self.fields
            .iter()
            .filter(|f| !f.deferred)
            .map(|f| f.name.clone())
            .collect()
    }

    pub fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order_entity() -> EntityType {
        EntityType {
            id: EntityTypeId::new("shop", "order"),
            table: "shop_order".to_string(),
            fields: vec![
                FieldSpec {
                    name: "id".to_string(),
                    references: None,
                    primary_key: true,
                    auto_generated: true,
                    deferred: false,
                },
                FieldSpec {
                    name: "user_id".to_string(),
                    references: Some(EntityTypeId::new("auth", "user")),
                    primary_key: false,
                    auto_generated: false,
                    deferred: false,
                },
                FieldSpec {
                    name: "memo".to_string(),
                    references: None,
                    primary_key: false,
                    auto_generated: false,
                    deferred: true,
                },
            ],
        }
    }

    #[test]
    fn id_round_trips_through_display_and_from_str() {
        let id = EntityTypeId::new("shop", "order");
        assert_eq!(id.to_string(), "shop.order");
        assert_eq!("shop.order".parse::<EntityTypeId>().unwrap(), id);
    }

    #[test]
    fn from_str_rejects_unqualified_names() {
        assert!("order".parse::<EntityTypeId>().is_err());
        assert!(".order".parse::<EntityTypeId>().is_err());
        assert!("shop.".parse::<EntityTypeId>().is_err());
    }

    #[test]
    fn accessors_report_key_and_deferred_fields() {
        let entity = order_entity();
        assert_eq!(entity.primary_key().unwrap().name, "id");
        assert_eq!(entity.foreign_key_fields().len(), 1);
        assert!(entity.has_deferred_fields());
        assert_eq!(entity.eager_field_names(), vec!["id", "user_id"]);
        assert_eq!(entity.deferred_fields()[0].name, "memo");
    }
}

//! Remote object schema modeling
//!
//! Every resolution step asks a [`SchemaProvider`] to describe an object.
//! Objects keep their fields in declared order, since wildcard expansion
//! and result column order both depend on it.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;

use crate::cache::{Cache, CacheWeight};
use crate::config::CacheConfig;
use crate::error::{Error, Result};

/// Answers "describe object X" with its fields and relationships
pub trait SchemaProvider {
    fn describe(&self, object: &str) -> Result<Arc<ObjectDescribe>>;
}

impl<T: SchemaProvider + ?Sized> SchemaProvider for Arc<T> {
    fn describe(&self, object: &str) -> Result<Arc<ObjectDescribe>> {
        self.as_ref().describe(object)
    }
}

impl<T: SchemaProvider + ?Sized> SchemaProvider for &T {
    fn describe(&self, object: &str) -> Result<Arc<ObjectDescribe>> {
        (**self).describe(object)
    }
}

/// A static schema held in memory
#[derive(Debug, Clone, Default)]
pub struct InMemorySchema {
    /// Map from object API name (case-insensitive key) to object description
    objects: HashMap<String, Arc<ObjectDescribe>>,
}

impl InMemorySchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an object to the schema, replacing any object with the same name
    pub fn add_object(&mut self, object: ObjectDescribe) {
        self.objects
            .insert(object.name.to_lowercase(), Arc::new(object));
    }

    /// Get an object by API name (case-insensitive)
    pub fn get_object(&self, name: &str) -> Option<&ObjectDescribe> {
        self.objects.get(&name.to_lowercase()).map(|o| o.as_ref())
    }

    pub fn objects(&self) -> impl Iterator<Item = &ObjectDescribe> {
        self.objects.values().map(|o| o.as_ref())
    }
}

impl SchemaProvider for InMemorySchema {
    fn describe(&self, object: &str) -> Result<Arc<ObjectDescribe>> {
        self.objects
            .get(&object.to_lowercase())
            .cloned()
            .ok_or_else(|| Error::UnknownObject(object.to_string()))
    }
}

/// Provider wrapper that memoizes describe results in a TTL cache
pub struct CachingSchemaProvider<P> {
    inner: P,
    cache: Cache<Arc<ObjectDescribe>>,
}

impl<P: SchemaProvider> CachingSchemaProvider<P> {
    pub fn new(inner: P, config: &CacheConfig) -> Self {
        Self::with_cache(inner, Cache::new(config))
    }

    pub fn with_cache(inner: P, cache: Cache<Arc<ObjectDescribe>>) -> Self {
        Self { inner, cache }
    }

    pub fn cache(&self) -> &Cache<Arc<ObjectDescribe>> {
        &self.cache
    }
}

impl<P: SchemaProvider> SchemaProvider for CachingSchemaProvider<P> {
    fn describe(&self, object: &str) -> Result<Arc<ObjectDescribe>> {
        let key = format!("describe:{}", object.to_lowercase());
        self.cache
            .get_or_compute(&key, || self.inner.describe(object))
    }
}

/// Description of a remote object
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectDescribe {
    /// API name (e.g., "Account", "Custom_Object__c")
    pub name: String,
    pub label: String,
    /// Fields in declared order
    fields: Vec<FieldDescribe>,
    /// Lowercased field name to position in `fields`
    index: HashMap<String, usize>,
    /// Child relationships (for subqueries)
    pub child_relationships: Vec<ChildRelationship>,
}

impl ObjectDescribe {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            label: name.clone(),
            name,
            fields: Vec::new(),
            index: HashMap::new(),
            child_relationships: Vec::new(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Add a field; a field with the same name keeps its position and is replaced
    pub fn add_field(&mut self, field: FieldDescribe) {
        let key = field.name.to_lowercase();
        match self.index.get(&key) {
            Some(&pos) => self.fields[pos] = field,
            None => {
                self.index.insert(key, self.fields.len());
                self.fields.push(field);
            }
        }
    }

    pub fn with_field(mut self, field: FieldDescribe) -> Self {
        self.add_field(field);
        self
    }

    /// Get a field by API name (case-insensitive)
    pub fn get_field(&self, name: &str) -> Option<&FieldDescribe> {
        self.index
            .get(&name.to_lowercase())
            .map(|&pos| &self.fields[pos])
    }

    /// Fields in declared order
    pub fn fields(&self) -> impl Iterator<Item = &FieldDescribe> {
        self.fields.iter()
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// Find the lookup field whose relationship name matches (case-insensitive)
    pub fn get_relationship_field(&self, relationship_name: &str) -> Option<&FieldDescribe> {
        self.fields.iter().find(|f| {
            f.relationship_name
                .as_deref()
                .map(|r| r.eq_ignore_ascii_case(relationship_name))
                .unwrap_or(false)
        })
    }

    pub fn add_child_relationship(&mut self, relationship: ChildRelationship) {
        self.child_relationships.push(relationship);
    }

    pub fn with_child_relationship(mut self, relationship: ChildRelationship) -> Self {
        self.add_child_relationship(relationship);
        self
    }

    /// Find a child relationship by name (case-insensitive)
    pub fn get_child_relationship(&self, name: &str) -> Option<&ChildRelationship> {
        self.child_relationships
            .iter()
            .find(|r| r.relationship_name.eq_ignore_ascii_case(name))
    }

    /// Build from the remote describe JSON document
    pub fn from_json(json: &serde_json::Value) -> Result<Self> {
        let raw: RawObjectDescribe = serde_json::from_value(json.clone())
            .map_err(|e| Error::Remote(format!("malformed describe result: {}", e)))?;

        let mut object = ObjectDescribe::new(raw.name);
        if let Some(label) = raw.label {
            object.label = label;
        }
        for raw_field in raw.fields {
            let field_type = FieldType::from_remote_name(&raw_field.field_type)
                .unwrap_or(FieldType::AnyType);
            let mut field = FieldDescribe::new(raw_field.name, field_type);
            if let Some(label) = raw_field.label {
                field.label = label;
            }
            field.reference_to = raw_field.reference_to;
            field.relationship_name = raw_field.relationship_name;
            field.nillable = raw_field.nillable;
            object.add_field(field);
        }
        for raw_child in raw.child_relationships {
            // Relationships without a name cannot be queried as subqueries
            if let Some(relationship_name) = raw_child.relationship_name {
                object.add_child_relationship(ChildRelationship::new(
                    relationship_name,
                    raw_child.child_sobject,
                    raw_child.field,
                ));
            }
        }
        Ok(object)
    }
}

impl CacheWeight for ObjectDescribe {
    fn weight(&self) -> usize {
        let fields: usize = self
            .fields
            .iter()
            .map(|f| {
                std::mem::size_of::<FieldDescribe>()
                    + f.name.len()
                    + f.label.len()
                    + f.reference_to.iter().map(String::len).sum::<usize>()
            })
            .sum();
        let children: usize = self
            .child_relationships
            .iter()
            .map(|c| {
                std::mem::size_of::<ChildRelationship>()
                    + c.relationship_name.len()
                    + c.child_object.len()
                    + c.field.len()
            })
            .sum();
        std::mem::size_of::<ObjectDescribe>() + self.name.len() + fields + children
    }
}

/// Description of a remote field
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescribe {
    /// API name (e.g., "AccountId", "Custom_Field__c")
    pub name: String,
    pub label: String,
    pub field_type: FieldType,
    /// For lookup fields: object(s) this references, first is the default target
    pub reference_to: Vec<String>,
    /// Relationship name for parent traversal (e.g., "Account" for AccountId)
    pub relationship_name: Option<String>,
    pub nillable: bool,
}

impl FieldDescribe {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        let name = name.into();
        Self {
            label: name.clone(),
            name,
            field_type,
            reference_to: Vec::new(),
            relationship_name: None,
            nillable: true,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Set this as a lookup field
    pub fn with_reference(mut self, reference_to: impl Into<String>) -> Self {
        self.reference_to = vec![reference_to.into()];
        self
    }

    /// Set this as a polymorphic lookup field
    pub fn with_polymorphic_reference(mut self, reference_to: Vec<String>) -> Self {
        self.reference_to = reference_to;
        self
    }

    pub fn with_relationship_name(mut self, name: impl Into<String>) -> Self {
        self.relationship_name = Some(name.into());
        self
    }

    pub fn with_nillable(mut self, nillable: bool) -> Self {
        self.nillable = nillable;
        self
    }

    pub fn is_relationship(&self) -> bool {
        !self.reference_to.is_empty()
    }

    pub fn is_polymorphic(&self) -> bool {
        self.reference_to.len() > 1
    }

    /// Declared remote type name
    pub fn remote_type(&self) -> &'static str {
        self.field_type.remote_name()
    }
}

/// Child relationship (for subqueries like `SELECT ... FROM Contacts`)
#[derive(Debug, Clone, PartialEq)]
pub struct ChildRelationship {
    /// Relationship name used in queries (e.g., "Contacts", "Opportunities")
    pub relationship_name: String,
    /// Child object API name (e.g., "Contact")
    pub child_object: String,
    /// Field on child object (e.g., "AccountId")
    pub field: String,
}

impl ChildRelationship {
    pub fn new(
        relationship_name: impl Into<String>,
        child_object: impl Into<String>,
        field: impl Into<String>,
    ) -> Self {
        Self {
            relationship_name: relationship_name.into(),
            child_object: child_object.into(),
            field: field.into(),
        }
    }
}

/// Remote field types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Id,
    String,
    TextArea,
    Boolean,
    Int,
    Double,
    Currency,
    Percent,
    Date,
    DateTime,
    Time,
    Phone,
    Email,
    Url,
    Picklist,
    MultiPicklist,
    Combobox,
    Reference,
    Address, // Compound
    Location,
    Base64,
    EncryptedString,
    AnyType,
}

impl FieldType {
    /// Type name as the remote describe call reports it
    pub fn remote_name(&self) -> &'static str {
        match self {
            FieldType::Id => "id",
            FieldType::String => "string",
            FieldType::TextArea => "textarea",
            FieldType::Boolean => "boolean",
            FieldType::Int => "int",
            FieldType::Double => "double",
            FieldType::Currency => "currency",
            FieldType::Percent => "percent",
            FieldType::Date => "date",
            FieldType::DateTime => "datetime",
            FieldType::Time => "time",
            FieldType::Phone => "phone",
            FieldType::Email => "email",
            FieldType::Url => "url",
            FieldType::Picklist => "picklist",
            FieldType::MultiPicklist => "multipicklist",
            FieldType::Combobox => "combobox",
            FieldType::Reference => "reference",
            FieldType::Address => "address",
            FieldType::Location => "location",
            FieldType::Base64 => "base64",
            FieldType::EncryptedString => "encryptedstring",
            FieldType::AnyType => "anyType",
        }
    }

    /// Parse a remote type name (case-insensitive)
    pub fn from_remote_name(name: &str) -> Option<FieldType> {
        let field_type = match name.to_ascii_lowercase().as_str() {
            "id" => FieldType::Id,
            "string" => FieldType::String,
            "textarea" => FieldType::TextArea,
            "boolean" => FieldType::Boolean,
            "int" => FieldType::Int,
            "double" => FieldType::Double,
            "currency" => FieldType::Currency,
            "percent" => FieldType::Percent,
            "date" => FieldType::Date,
            "datetime" => FieldType::DateTime,
            "time" => FieldType::Time,
            "phone" => FieldType::Phone,
            "email" => FieldType::Email,
            "url" => FieldType::Url,
            "picklist" => FieldType::Picklist,
            "multipicklist" => FieldType::MultiPicklist,
            "combobox" => FieldType::Combobox,
            "reference" => FieldType::Reference,
            "address" => FieldType::Address,
            "location" => FieldType::Location,
            "base64" => FieldType::Base64,
            "encryptedstring" => FieldType::EncryptedString,
            "anytype" => FieldType::AnyType,
            _ => return None,
        };
        Some(field_type)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawObjectDescribe {
    name: String,
    label: Option<String>,
    #[serde(default)]
    fields: Vec<RawFieldDescribe>,
    #[serde(default)]
    child_relationships: Vec<RawChildRelationship>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFieldDescribe {
    name: String,
    label: Option<String>,
    #[serde(rename = "type")]
    field_type: String,
    #[serde(default)]
    reference_to: Vec<String>,
    relationship_name: Option<String>,
    #[serde(default = "default_nillable")]
    nillable: bool,
}

fn default_nillable() -> bool {
    true
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawChildRelationship {
    relationship_name: Option<String>,
    #[serde(rename = "childSObject")]
    child_sobject: String,
    field: String,
}

/// Builder for in-memory schemas
pub struct SchemaBuilder {
    schema: InMemorySchema,
}

impl SchemaBuilder {
    pub fn new() -> Self {
        Self {
            schema: InMemorySchema::new(),
        }
    }

    /// Add the system fields every object carries
    pub fn add_standard_fields(object: &mut ObjectDescribe) {
        object.add_field(FieldDescribe::new("Id", FieldType::Id).with_nillable(false));
        object.add_field(FieldDescribe::new("Name", FieldType::String));
        object.add_field(
            FieldDescribe::new("OwnerId", FieldType::Reference)
                .with_polymorphic_reference(vec!["User".to_string(), "Group".to_string()])
                .with_relationship_name("Owner"),
        );
        object.add_field(
            FieldDescribe::new("CreatedById", FieldType::Reference)
                .with_reference("User")
                .with_relationship_name("CreatedBy"),
        );
        object.add_field(FieldDescribe::new("CreatedDate", FieldType::DateTime));
        object.add_field(FieldDescribe::new("IsDeleted", FieldType::Boolean));
    }

    /// Add a standard object with common fields
    pub fn with_standard_object(mut self, name: &str) -> Self {
        let mut object = ObjectDescribe::new(name);
        Self::add_standard_fields(&mut object);
        self.schema.add_object(object);
        self
    }

    pub fn with_object(mut self, object: ObjectDescribe) -> Self {
        self.schema.add_object(object);
        self
    }

    pub fn build(self) -> InMemorySchema {
        self.schema
    }
}

impl Default for SchemaBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_schema_lookup() {
        let schema = SchemaBuilder::new()
            .with_object(
                ObjectDescribe::new("Account")
                    .with_field(FieldDescribe::new("Id", FieldType::Id))
                    .with_field(FieldDescribe::new("Name", FieldType::String)),
            )
            .build();

        // Case-insensitive lookup
        assert!(schema.get_object("Account").is_some());
        assert!(schema.get_object("ACCOUNT").is_some());
        assert!(schema.describe("account").is_ok());
        assert_eq!(
            schema.describe("Nope").unwrap_err(),
            Error::UnknownObject("Nope".to_string())
        );

        let obj = schema.describe("account").unwrap();
        assert_eq!(obj.name, "Account");
        assert!(obj.get_field("id").is_some());
        assert!(obj.get_field("NAME").is_some());
    }

    #[test]
    fn test_fields_keep_declared_order() {
        let mut object = ObjectDescribe::new("Contact");
        for name in ["Id", "LastName", "FirstName", "AccountId", "Email"] {
            object.add_field(FieldDescribe::new(name, FieldType::String));
        }
        object.add_field(FieldDescribe::new("lastname", FieldType::TextArea));

        let names: Vec<_> = object.fields().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["Id", "lastname", "FirstName", "AccountId", "Email"]);
        assert_eq!(object.field_count(), 5);
    }

    #[test]
    fn test_relationship_field() {
        let object = ObjectDescribe::new("Contact").with_field(
            FieldDescribe::new("AccountId", FieldType::Reference)
                .with_reference("Account")
                .with_relationship_name("Account"),
        );
        let field = object.get_relationship_field("account").unwrap();
        assert_eq!(field.name, "AccountId");
        assert!(field.is_relationship());
        assert!(!field.is_polymorphic());
        assert_eq!(field.remote_type(), "reference");
    }

    #[test]
    fn test_child_relationship() {
        let account = ObjectDescribe::new("Account").with_child_relationship(
            ChildRelationship::new("Contacts", "Contact", "AccountId"),
        );
        let rel = account.get_child_relationship("contacts").unwrap();
        assert_eq!(rel.child_object, "Contact");
        assert_eq!(rel.field, "AccountId");
    }

    #[test]
    fn test_field_type_names() {
        assert_eq!(FieldType::from_remote_name("DateTime"), Some(FieldType::DateTime));
        assert_eq!(FieldType::from_remote_name("anyType"), Some(FieldType::AnyType));
        assert_eq!(FieldType::from_remote_name("blob"), None);
        assert_eq!(FieldType::Int.remote_name(), "int");
    }

    #[test]
    fn test_from_describe_json() {
        let json = serde_json::json!({
            "name": "Account",
            "label": "Account",
            "fields": [
                {"name": "Id", "type": "id", "nillable": false},
                {"name": "ParentId", "type": "reference", "referenceTo": ["Account"], "relationshipName": "Parent"},
                {"name": "AnnualRevenue", "type": "currency"}
            ],
            "childRelationships": [
                {"relationshipName": "Contacts", "childSObject": "Contact", "field": "AccountId"},
                {"relationshipName": null, "childSObject": "AccountHistory", "field": "AccountId"}
            ]
        });
        let object = ObjectDescribe::from_json(&json).unwrap();
        assert_eq!(object.field_count(), 3);
        assert!(!object.get_field("Id").unwrap().nillable);
        assert_eq!(object.get_relationship_field("Parent").unwrap().reference_to, vec!["Account"]);
        assert_eq!(object.get_field("AnnualRevenue").unwrap().remote_type(), "currency");
        assert_eq!(object.child_relationships.len(), 1);
    }

    struct CountingProvider {
        inner: InMemorySchema,
        calls: AtomicUsize,
    }

    impl SchemaProvider for CountingProvider {
        fn describe(&self, object: &str) -> Result<Arc<ObjectDescribe>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.describe(object)
        }
    }

    #[test]
    fn test_caching_provider_describes_once() {
        let provider = CachingSchemaProvider::new(
            CountingProvider {
                inner: SchemaBuilder::new().with_standard_object("Account").build(),
                calls: AtomicUsize::new(0),
            },
            &CacheConfig::default(),
        );

        let first = provider.describe("Account").unwrap();
        let second = provider.describe("ACCOUNT").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(provider.inner.calls.load(Ordering::SeqCst), 1);

        // Failures are not cached
        assert!(provider.describe("Missing").is_err());
        assert!(provider.describe("Missing").is_err());
        assert_eq!(provider.inner.calls.load(Ordering::SeqCst), 3);
    }
}

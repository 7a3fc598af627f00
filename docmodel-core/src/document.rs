//! Document instances.
//!
//! A [`DocumentInstance`] holds field values for one instance of a registered class, the
//! set of paths changed since it was loaded or saved, and the storage form it was loaded
//! with. Values are addressed by field name; storage uses each field's storage key.
//!
//! ```ignore
//! let mut post = registry.create("Post", values! { "title" => "Hello" })?;
//! post.set("title", "Hello, world")?;
//! post.list_mut("tags")?.push("greeting");
//! assert_eq!(post.changed_paths().to_vec(), vec!["title", "tags"]);
//! ```

use std::{collections::{BTreeMap, HashMap}, sync::Arc};

use bson::{Bson, Document};
use tracing::trace;

use crate::{
    error::{DocumentStoreError, DocumentStoreResult, ValidationError},
    field::{Field, FieldKind, dynamic_to_native},
    metadata::DocumentMeta,
    registry::Registry,
    tracking::{ChangedPaths, EmbeddedList, PathTracker, TrackedDict, TrackedList},
    update::{UpdateSpec, get_path},
    value::Value,
};

/// Storage key of the document identity.
pub const ID_KEY: &str = "_id";

/// Storage key of the class discriminator.
pub const DISCRIMINATOR_KEY: &str = "_cls";

/// Observable persistence state of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Never persisted, possibly with an identity assigned.
    New,
    /// Persisted and unchanged since load or save.
    Persisted,
    /// Persisted with pending changes.
    Dirty,
    /// Removed from storage.
    Deleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Persistence {
    New,
    Persisted,
    Deleted,
}

/// An instance of a registered document or embedded class.
#[derive(Debug, Clone)]
pub struct DocumentInstance {
    meta: Arc<DocumentMeta>,
    values: HashMap<String, Value>,
    dynamic_fields: Vec<Field>,
    changed: ChangedPaths,
    shadow: Option<Document>,
    persistence: Persistence,
}

fn find_field<'a>(meta: &'a DocumentMeta, dynamic: &'a [Field], name: &str) -> Option<&'a Field> {
    meta.field(name).or_else(|| dynamic.iter().find(|field| field.name() == name))
}

impl DocumentInstance {
    /// Constructs an instance from `(name, value)` pairs. Unset fields get their defaults;
    /// nothing is recorded as changed.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::UnknownField`] for names the class does not declare,
    /// unless the class is dynamic, and [`DocumentStoreError::Operation`] for abstract classes.
    pub fn new<I, K, V>(meta: Arc<DocumentMeta>, values: I) -> DocumentStoreResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        if meta.is_abstract() {
            return Err(DocumentStoreError::Operation(format!("cannot instantiate abstract class {}", meta.name())));
        }

        let mut doc = Self::blank(meta);
        for (name, value) in values {
            let name = name.into();
            let field = doc.field_for_assignment(&name)?;
            match field.prepare(value.into()) {
                Value::Null => match field.default_value() {
                    Some(default) => doc.values.insert(name, default),
                    None => doc.values.remove(&name),
                },
                value => doc.values.insert(name, value),
            };
        }
        doc.changed.clear();
        Ok(doc)
    }

    /// An instance holding only defaults.
    pub(crate) fn blank(meta: Arc<DocumentMeta>) -> Self {
        let values = meta
            .fields()
            .iter()
            .filter_map(|field| field.default_value().map(|value| (field.name().to_string(), value)))
            .collect();

        Self {
            meta,
            values,
            dynamic_fields: Vec::new(),
            changed: ChangedPaths::new(),
            shadow: None,
            persistence: Persistence::New,
        }
    }

    pub fn meta(&self) -> &Arc<DocumentMeta> {
        &self.meta
    }

    pub fn class_name(&self) -> &str {
        self.meta.name()
    }

    /// Declared fields followed by dynamic fields in assignment order.
    pub fn fields(&self) -> impl Iterator<Item = &Field> {
        self.meta.fields().iter().chain(self.dynamic_fields.iter())
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        find_field(&self.meta, &self.dynamic_fields, name)
    }

    /// The descriptor used to assign `name`, synthesizing a dynamic field when allowed.
    fn field_for_assignment(&mut self, name: &str) -> DocumentStoreResult<Field> {
        if let Some(field) = self.field(name) {
            return Ok(field.clone());
        }
        if !self.meta.is_dynamic() {
            return Err(self.unknown(name));
        }

        let field = Field::dynamic(name);
        field
            .check_declaration()
            .map_err(|_| self.unknown(name))?;
        self.dynamic_fields.push(field.clone());
        Ok(field)
    }

    fn unknown(&self, name: &str) -> DocumentStoreError {
        DocumentStoreError::UnknownField {
            class: self.meta.name().to_string(),
            field: name.to_string(),
        }
    }

    /// The value of `name`, or `None` if unset.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Assigns a field. `Null` restores the default (or unsets the field when there is none).
    /// The field's storage key is recorded as changed only if the stored value changes.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> DocumentStoreResult<()> {
        let field = self.field_for_assignment(name)?;
        let value = match field.prepare(value.into()) {
            Value::Null => field.default_value(),
            value => Some(value),
        };

        if self.values.get(name) == value.as_ref() {
            return Ok(());
        }

        self.changed.mark(field.storage_key());
        match value {
            Some(value) => self.values.insert(name.to_string(), value),
            None => self.values.remove(name),
        };
        Ok(())
    }

    /// Removes a field's value, restoring its default, and records the change.
    pub fn unset(&mut self, name: &str) -> DocumentStoreResult<()> {
        let field = self.field(name).cloned().ok_or_else(|| self.unknown(name))?;

        match field.default_value() {
            Some(default) => self.values.insert(name.to_string(), default),
            None => self.values.remove(name),
        };
        self.changed.mark(field.storage_key());
        Ok(())
    }

    /// Display form of a field: its choice label if one matches, else the value's string form.
    pub fn display(&self, name: &str) -> Option<String> {
        let field = self.field(name)?;
        self.values.get(name).map(|value| field.display(value))
    }

    /// The identity value, if assigned.
    pub fn id(&self) -> Option<&Value> {
        self.meta.id_field().and_then(|field| self.values.get(field.name()))
    }

    /// The identity in storage form.
    pub fn id_bson(&self) -> DocumentStoreResult<Option<Bson>> {
        let Some(field) = self.meta.id_field() else {
            return Ok(None);
        };
        match self.values.get(field.name()) {
            Some(value) => field.to_storage(value).map(|id| Some(id).filter(|id| !matches!(id, Bson::Null))),
            None => Ok(None),
        }
    }

    /// Sets the identity from a backend-generated value without recording a change.
    pub(crate) fn assign_storage_id(&mut self, id: Bson, registry: &Registry) -> DocumentStoreResult<()> {
        let Some(field) = self.meta.id_field().cloned() else {
            return Ok(());
        };
        if !self.values.contains_key(field.name()) {
            let value = field.to_native(id, registry)?;
            self.values.insert(field.name().to_string(), value);
        }
        Ok(())
    }

    /// A tracked view over a list field. An unset list field starts empty.
    pub fn list_mut(&mut self, name: &str) -> DocumentStoreResult<TrackedList<'_>> {
        let unknown = self.unknown(name);
        let Self { meta, values, dynamic_fields, changed, .. } = self;
        let field = find_field(meta, dynamic_fields, name).ok_or(unknown)?;

        match values.entry(name.to_string()).or_insert_with(|| Value::List(Vec::new())) {
            Value::List(items) => Ok(TrackedList::new(
                items,
                PathTracker::new(changed, field.storage_key().to_string()),
                field.item_field(),
            )),
            other => Err(DocumentStoreError::Operation(format!(
                "field '{}' holds a {}, not a list",
                name,
                other.type_name()
            ))),
        }
    }

    /// A filterable view over a list of embedded documents.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::Operation`] if the field's items are not embedded documents.
    pub fn embedded_list_mut(&mut self, name: &str) -> DocumentStoreResult<EmbeddedList<'_>> {
        let holds_documents = self.field(name).map(|field| {
            matches!(
                field.item_field().map(Field::kind),
                Some(FieldKind::Embedded { .. } | FieldKind::GenericEmbedded)
            )
        });
        if holds_documents == Some(false) {
            return Err(DocumentStoreError::Operation(format!(
                "field '{}' is not a list of embedded documents",
                name
            )));
        }

        self.list_mut(name).map(EmbeddedList::new)
    }

    /// A tracked view over a dict field. An unset dict field starts empty.
    pub fn dict_mut(&mut self, name: &str) -> DocumentStoreResult<TrackedDict<'_>> {
        let unknown = self.unknown(name);
        let Self { meta, values, dynamic_fields, changed, .. } = self;
        let field = find_field(meta, dynamic_fields, name).ok_or(unknown)?;

        match values.entry(name.to_string()).or_insert_with(|| Value::Dict(Default::default())) {
            Value::Dict(map) => Ok(TrackedDict::new(
                map,
                PathTracker::new(changed, field.storage_key().to_string()),
                field.item_field(),
            )),
            other => Err(DocumentStoreError::Operation(format!(
                "field '{}' holds a {}, not a dict",
                name,
                other.type_name()
            ))),
        }
    }

    /// Mutable access to an embedded document field; it records its own changes, which
    /// surface here prefixed by the field's storage key.
    pub fn embedded_mut(&mut self, name: &str) -> DocumentStoreResult<&mut DocumentInstance> {
        if self.field(name).is_none() {
            return Err(self.unknown(name));
        }
        self.values
            .get_mut(name)
            .and_then(Value::as_document_mut)
            .ok_or_else(|| DocumentStoreError::Operation(format!("field '{}' does not hold an embedded document", name)))
    }

    /// Removes values assigned by a save that did not complete.
    pub(crate) fn discard_values(&mut self, names: &[String]) {
        for name in names {
            self.values.remove(name);
        }
    }

    /// Mutable access without change tracking, for reference resolution.
    pub(crate) fn value_mut_untracked(&mut self, name: &str) -> Option<&mut Value> {
        self.values.get_mut(name)
    }

    /// Changed paths of this document and, prefixed, of every embedded document it holds.
    pub fn changed_paths(&self) -> ChangedPaths {
        let mut paths = self.changed.clone();
        for field in self.fields() {
            if let Some(value) = self.values.get(field.name()) {
                collect_nested(value, field.storage_key(), &mut paths);
            }
        }
        paths
    }

    pub fn is_dirty(&self) -> bool {
        !self.changed_paths().is_empty()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        match self.persistence {
            Persistence::New => Lifecycle::New,
            Persistence::Deleted => Lifecycle::Deleted,
            Persistence::Persisted if self.is_dirty() => Lifecycle::Dirty,
            Persistence::Persisted => Lifecycle::Persisted,
        }
    }

    pub fn is_new(&self) -> bool {
        self.persistence == Persistence::New
    }

    pub fn is_deleted(&self) -> bool {
        self.persistence == Persistence::Deleted
    }

    /// The storage form this instance was loaded or last saved with.
    pub fn shadow(&self) -> Option<&Document> {
        self.shadow.as_ref()
    }

    /// Forgets recorded changes here and in every embedded document.
    pub fn clear_changes(&mut self) {
        self.changed.clear();
        for value in self.values.values_mut() {
            clear_nested(value);
        }
    }

    pub(crate) fn mark_saved(&mut self, stored: Document) {
        self.clear_changes();
        self.shadow = Some(stored);
        self.persistence = Persistence::Persisted;
    }

    pub(crate) fn mark_deleted(&mut self) {
        self.persistence = Persistence::Deleted;
    }

    pub(crate) fn mark_new(&mut self) {
        self.shadow = None;
        self.persistence = Persistence::New;
    }

    /// Partial update covering every changed path: present values are set, missing or null
    /// ones unset.
    pub fn delta(&self) -> DocumentStoreResult<UpdateSpec> {
        let stored = self.to_storage_form(None)?;
        let mut update = UpdateSpec::new();

        for path in self.changed_paths().iter() {
            match get_path(&stored, path) {
                Some(Bson::Null) | None => update.unset(path),
                Some(value) => update.set(path, value.clone()),
            };
        }
        Ok(update)
    }

    /// Validates every field, collecting all failures keyed by field name.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut errors = BTreeMap::new();

        for field in self.fields() {
            let result = match self.values.get(field.name()) {
                Some(value) => field.validate(value),
                None if field.is_required() && !field.is_generated() => Err(ValidationError::new("Field is required")),
                None => Ok(()),
            };
            if let Err(error) = result {
                errors.insert(field.name().to_string(), error);
            }
        }

        if errors.is_empty() {
            return Ok(());
        }

        let id = self.id().map(Value::to_string).unwrap_or_else(|| "None".to_string());
        Err(ValidationError::with_errors(
            format!("ValidationError ({}:{})", self.meta.name(), id),
            errors,
        ))
    }

    /// The storage form: `_id` first, `_cls` when the class takes part in inheritance, then
    /// every set, non-null field in declaration order. `subset` limits fields by name.
    pub fn to_storage_form(&self, subset: Option<&[&str]>) -> DocumentStoreResult<Document> {
        let mut stored = Document::new();
        let id_field = self.meta.id_field();

        if let Some(id) = self.id_bson()? {
            stored.insert(ID_KEY, id);
        }
        if self.meta.emits_discriminator() {
            stored.insert(DISCRIMINATOR_KEY, self.meta.hierarchy_path());
        }

        for field in self.fields() {
            if id_field.is_some_and(|id| id.name() == field.name()) {
                continue;
            }
            if subset.is_some_and(|names| !names.contains(&field.name())) {
                continue;
            }
            let Some(value) = self.values.get(field.name()) else {
                continue;
            };

            match field.to_storage(value)? {
                Bson::Null => {}
                stored_value => {
                    stored.insert(field.storage_key(), stored_value);
                }
            }
        }
        Ok(stored)
    }

    /// Decodes a stored document. A `_cls` discriminator selects the most specific
    /// registered class; unknown stored keys are skipped unless the class is strict or dynamic.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::NotRegistered`] if the discriminator names no registered
    /// class, [`DocumentStoreError::InvalidDocument`] if it names a class outside `meta`'s
    /// hierarchy, and [`DocumentStoreError::UnknownField`] for unknown keys in strict classes.
    pub fn from_storage_form(meta: &Arc<DocumentMeta>, raw: Document, registry: &Registry) -> DocumentStoreResult<Self> {
        let meta = match raw.get(DISCRIMINATOR_KEY) {
            Some(Bson::String(path)) if path != meta.hierarchy_path() => {
                let stored = registry.lookup(path)?;
                if !stored.is_a(meta.name()) {
                    return Err(DocumentStoreError::InvalidDocument(format!(
                        "stored class {} is not a {}",
                        stored.name(),
                        meta.name()
                    )));
                }
                stored
            }
            _ => meta.clone(),
        };

        let mut doc = Self::blank(meta.clone());
        doc.shadow = Some(raw.clone());
        doc.persistence = Persistence::Persisted;

        for (key, stored) in raw {
            if key == DISCRIMINATOR_KEY {
                continue;
            }

            let (name, value) = match meta.field_by_storage_key(&key) {
                Some(field) => (field.name().to_string(), field.to_native(stored, registry)?),
                None if meta.is_dynamic() => {
                    doc.dynamic_fields.push(Field::dynamic(key.clone()));
                    (key, dynamic_to_native(stored, registry)?)
                }
                None if meta.is_strict() => {
                    return Err(DocumentStoreError::UnknownField {
                        class: meta.name().to_string(),
                        field: key,
                    });
                }
                None => {
                    trace!(class = %meta.name(), key = %key, "skipping unknown stored key");
                    continue;
                }
            };

            let value = match value {
                Value::Null => doc.field(&name).and_then(Field::default_value),
                value => Some(value),
            };
            match value {
                Some(value) => doc.values.insert(name, value),
                None => doc.values.remove(&name),
            };
        }

        Ok(doc)
    }
}

impl PartialEq for DocumentInstance {
    fn eq(&self, other: &Self) -> bool {
        self.meta.name() == other.meta.name() && self.values == other.values
    }
}

fn collect_nested(value: &Value, prefix: &str, paths: &mut ChangedPaths) {
    match value {
        Value::Document(doc) => {
            for path in doc.changed_paths().iter() {
                paths.mark(format!("{}.{}", prefix, path));
            }
        }
        Value::List(items) => {
            for (index, item) in items.iter().enumerate() {
                collect_nested(item, &format!("{}.{}", prefix, index), paths);
            }
        }
        Value::Dict(map) => {
            for (key, item) in map {
                collect_nested(item, &format!("{}.{}", prefix, key), paths);
            }
        }
        _ => {}
    }
}

fn clear_nested(value: &mut Value) {
    match value {
        Value::Document(doc) => doc.clear_changes(),
        Value::List(items) => items.iter_mut().for_each(clear_nested),
        Value::Dict(map) => map.values_mut().for_each(clear_nested),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use bson::doc;

    use super::*;
    use crate::{field::Field, metadata::ClassDef, values};

    fn registry() -> Registry {
        let registry = Registry::new();
        registry
            .register(
                ClassDef::embedded("Comment")
                    .field(Field::string("body").required())
                    .field(Field::int("votes").default(0)),
            )
            .unwrap();
        registry
            .register(
                ClassDef::document("Post")
                    .field(Field::string("title").required().db_field("t"))
                    .field(Field::string("status").default("draft"))
                    .field(Field::untyped_list("tags"))
                    .field(Field::dict("extra"))
                    .field(Field::embedded("lead", "Comment"))
                    .field(Field::list("comments", Field::embedded("comment", "Comment"))),
            )
            .unwrap();
        registry
    }

    fn comment(registry: &Registry, body: &str) -> DocumentInstance {
        registry.create("Comment", values! { "body" => body }).unwrap()
    }

    #[test]
    fn construction_applies_defaults_without_marking() {
        let registry = registry();
        let post = registry.create("Post", values! { "title" => "Hi", "status" => Value::Null }).unwrap();

        assert_eq!(post.get("status"), Some(&Value::from("draft")));
        assert_eq!(post.get("tags"), Some(&Value::List(vec![])));
        assert!(post.changed_paths().is_empty());
        assert_eq!(post.lifecycle(), Lifecycle::New);
    }

    #[test]
    fn unknown_fields_are_rejected_unless_dynamic() {
        let registry = registry();
        let err = registry.create("Post", values! { "nope" => 1 }).unwrap_err();
        assert!(matches!(err, DocumentStoreError::UnknownField { field, .. } if field == "nope"));

        registry.register(ClassDef::dynamic_document("Bag")).unwrap();
        let mut bag = registry.create("Bag", values! { "colour" => "red" }).unwrap();
        bag.set("size", 3).unwrap();
        assert_eq!(
            bag.to_storage_form(None).unwrap().keys().collect::<Vec<_>>(),
            vec!["colour", "size"]
        );
    }

    #[test]
    fn assignment_marks_storage_key_on_change_only() {
        let registry = registry();
        let mut post = registry.create("Post", values! { "title" => "Hi" }).unwrap();

        post.set("title", "Hi").unwrap();
        post.set("tags", Vec::<Value>::new()).unwrap();
        assert!(post.changed_paths().is_empty());

        post.set("title", "Hello").unwrap();
        post.set("status", Value::Null).unwrap();
        assert_eq!(post.changed_paths().to_vec(), vec!["t".to_string()]);
        assert_eq!(post.get("status"), Some(&Value::from("draft")));

        post.unset("status").unwrap();
        assert!(post.changed_paths().contains("status"));
    }

    #[test]
    fn nested_changes_are_prefixed() {
        let registry = registry();
        let mut post = registry
            .create(
                "Post",
                values! {
                    "title" => "Hi",
                    "lead" => comment(&registry, "first"),
                    "comments" => vec![comment(&registry, "a"), comment(&registry, "b")],
                },
            )
            .unwrap();

        post.embedded_mut("lead").unwrap().set("votes", 3).unwrap();
        post.list_mut("comments").unwrap().embedded_mut(1).unwrap().set("body", "edited").unwrap();
        post.dict_mut("extra").unwrap().insert("k", "v");

        assert_eq!(
            post.changed_paths().to_vec(),
            vec!["extra.k".to_string(), "lead.votes".to_string(), "comments.1.body".to_string()]
        );

        post.list_mut("comments").unwrap().push(comment(&registry, "c"));
        assert!(post.changed_paths().contains("comments"));
        assert!(!post.changed_paths().contains("comments.1.body"));

        post.clear_changes();
        assert!(!post.is_dirty());
    }

    #[test]
    fn delta_sets_present_and_unsets_missing_paths() {
        let registry = registry();
        let mut post = registry.create("Post", values! { "title" => "Hi", "lead" => comment(&registry, "x") }).unwrap();
        post.clear_changes();

        post.set("title", "Bye").unwrap();
        post.unset("lead").unwrap();
        let delta = post.delta().unwrap();

        assert_eq!(delta.to_document(), doc! { "$set": { "t": "Bye" }, "$unset": { "lead": "" } });
    }

    #[test]
    fn validation_collects_nested_failures() {
        let registry = registry();
        let mut bad = comment(&registry, "x");
        bad.set("body", Value::Null).unwrap();
        let post = registry
            .create("Post", values! { "comments" => vec![comment(&registry, "ok"), bad] })
            .unwrap();

        let err = post.validate().unwrap_err();
        assert_eq!(err.message(), "ValidationError (Post:None)");
        assert_eq!(err.at("title").map(ValidationError::message), Some("Field is required"));
        assert_eq!(err.at("comments.1.body").map(ValidationError::message), Some("Field is required"));
        assert!(err.get("comments").unwrap().get("0").is_none());
    }

    #[test]
    fn storage_form_round_trips() {
        let registry = registry();
        let post = registry
            .create(
                "Post",
                values! {
                    "id" => bson::oid::ObjectId::new(),
                    "title" => "Hi",
                    "tags" => vec!["a", "b"],
                    "comments" => vec![comment(&registry, "a")],
                },
            )
            .unwrap();

        let stored = post.to_storage_form(None).unwrap();
        assert_eq!(stored.keys().next().map(String::as_str), Some(ID_KEY));
        assert_eq!(stored.get_str("t").unwrap(), "Hi");
        assert!(!stored.contains_key("lead"));

        let meta = registry.get("Post").unwrap();
        let loaded = DocumentInstance::from_storage_form(&meta, stored.clone(), &registry).unwrap();
        assert_eq!(loaded, post);
        assert_eq!(loaded.lifecycle(), Lifecycle::Persisted);
        assert_eq!(loaded.shadow(), Some(&stored));
    }

    #[test]
    fn unknown_stored_keys_follow_strictness() {
        let registry = registry();
        registry.register(ClassDef::document("Strict").strict(true).field(Field::string("name"))).unwrap();
        let raw = doc! { "_id": bson::oid::ObjectId::new(), "name": "n", "legacy": 1 };

        let lenient = registry.get("Post").unwrap();
        assert!(DocumentInstance::from_storage_form(&lenient, raw.clone(), &registry).is_ok());

        let strict = registry.get("Strict").unwrap();
        let err = DocumentInstance::from_storage_form(&strict, raw, &registry).unwrap_err();
        assert!(matches!(err, DocumentStoreError::UnknownField { field, .. } if field == "legacy"));
    }

    #[test]
    fn stored_nulls_fall_back_to_defaults() {
        let registry = registry();
        let meta = registry.get("Post").unwrap();
        let raw = doc! { "_id": bson::oid::ObjectId::new(), "t": "Hi", "status": Bson::Null, "lead": Bson::Null };

        let loaded = DocumentInstance::from_storage_form(&meta, raw, &registry).unwrap();
        assert_eq!(loaded.get("status"), Some(&Value::from("draft")));
        assert!(!loaded.contains("lead"));
        assert!(!loaded.is_dirty());
    }

    #[test]
    fn discriminators_outside_the_hierarchy_are_rejected() {
        let registry = Registry::new();
        registry
            .register(ClassDef::document("Animal").allow_inheritance(true).field(Field::string("name")))
            .unwrap();
        registry.register(ClassDef::document("Fish").extends("Animal")).unwrap();
        registry.register(ClassDef::document("Vehicle").allow_inheritance(true)).unwrap();
        registry.register(ClassDef::document("Car").extends("Vehicle")).unwrap();

        let fish = registry.get("Fish").unwrap();
        let raw = doc! { "_id": bson::oid::ObjectId::new(), "_cls": "Vehicle.Car" };
        let err = DocumentInstance::from_storage_form(&fish, raw, &registry).unwrap_err();
        assert!(matches!(err, DocumentStoreError::InvalidDocument(_)));

        let animal = registry.get("Animal").unwrap();
        let raw = doc! { "_id": bson::oid::ObjectId::new(), "_cls": "Animal.Fish", "name": "Nemo" };
        let loaded = DocumentInstance::from_storage_form(&animal, raw, &registry).unwrap();
        assert_eq!(loaded.class_name(), "Fish");
    }

    #[test]
    fn display_uses_choice_labels() {
        let registry = Registry::new();
        registry
            .register(ClassDef::document("Shirt").field(Field::string("size").labeled_choices([("S", "Small"), ("L", "Large")])))
            .unwrap();
        let shirt = registry.create("Shirt", values! { "size" => "L" }).unwrap();
        assert_eq!(shirt.display("size").as_deref(), Some("Large"));
        assert_eq!(shirt.display("id"), None);
    }
}

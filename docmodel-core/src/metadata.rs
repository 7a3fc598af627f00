//! Class declarations and their resolved metadata.
//!
//! A [`ClassDef`] is what the caller writes: a name, bases, own fields and options.
//! Registering it with a [`Registry`](crate::registry::Registry) resolves it against the
//! already-registered bases into an immutable [`DocumentMeta`], which every instance of the
//! class shares.
//!
//! ```ignore
//! let animal = ClassDef::document("Animal")
//!     .allow_inheritance(true)
//!     .field(Field::string("name"));
//! let dog = ClassDef::document("Dog").extends("Animal").field(Field::boolean("good"));
//! ```

use std::{collections::HashMap, sync::Arc};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    document::ID_KEY,
    error::{DocumentStoreError, DocumentStoreResult},
    field::{Field, FieldKind},
};

/// Whether a class is stored in its own collection or only inside other documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Document,
    Embedded,
}

/// A single-field index declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    /// Storage key, possibly dotted.
    pub field: String,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub sparse: bool,
}

impl IndexSpec {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            unique: false,
            sparse: false,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn sparse(mut self) -> Self {
        self.sparse = true;
        self
    }
}

/// A class declaration, resolved by [`Registry::register`](crate::registry::Registry::register).
#[derive(Debug, Clone)]
pub struct ClassDef {
    name: String,
    kind: DocumentKind,
    bases: Vec<String>,
    fields: Vec<Field>,
    collection: Option<String>,
    abstract_class: bool,
    allow_inheritance: Option<bool>,
    strict: Option<bool>,
    dynamic: Option<bool>,
    shard_key: Option<Vec<String>>,
    indexes: Vec<IndexSpec>,
}

impl ClassDef {
    fn new(name: impl Into<String>, kind: DocumentKind) -> Self {
        Self {
            name: name.into(),
            kind,
            bases: Vec::new(),
            fields: Vec::new(),
            collection: None,
            abstract_class: false,
            allow_inheritance: None,
            strict: None,
            dynamic: None,
            shard_key: None,
            indexes: Vec::new(),
        }
    }

    /// A top-level document class stored in its own collection.
    pub fn document(name: impl Into<String>) -> Self {
        Self::new(name, DocumentKind::Document)
    }

    /// A class that only lives inside other documents.
    pub fn embedded(name: impl Into<String>) -> Self {
        Self::new(name, DocumentKind::Embedded)
    }

    /// A document class that accepts and stores undeclared fields.
    pub fn dynamic_document(name: impl Into<String>) -> Self {
        Self::document(name).dynamic(true)
    }

    /// Adds a base class. Earlier bases win when resolving inherited options.
    pub fn extends(mut self, base: impl Into<String>) -> Self {
        self.bases.push(base.into());
        self
    }

    /// Declares a field. A field named like an inherited one replaces it in place.
    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    pub fn fields(mut self, fields: impl IntoIterator<Item = Field>) -> Self {
        self.fields.extend(fields);
        self
    }

    pub fn collection(mut self, name: impl Into<String>) -> Self {
        self.collection = Some(name.into());
        self
    }

    /// Abstract classes contribute fields and options but cannot be instantiated or stored.
    pub fn abstract_class(mut self) -> Self {
        self.abstract_class = true;
        self
    }

    pub fn allow_inheritance(mut self, allow: bool) -> Self {
        self.allow_inheritance = Some(allow);
        self
    }

    /// Rejects stored keys that match no declared field instead of skipping them.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = Some(strict);
        self
    }

    pub fn dynamic(mut self, dynamic: bool) -> Self {
        self.dynamic = Some(dynamic);
        self
    }

    /// Fields whose stored values identify the document together with `_id` and may not change.
    pub fn shard_key<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.shard_key = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn index(mut self, index: IndexSpec) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Resolved, immutable metadata of a registered class.
#[derive(Debug)]
pub struct DocumentMeta {
    name: String,
    kind: DocumentKind,
    fields: Vec<Field>,
    by_name: HashMap<String, usize>,
    by_storage_key: HashMap<String, usize>,
    id_field: Option<usize>,
    abstract_class: bool,
    allow_inheritance: bool,
    hierarchy_path: String,
    lineage: Vec<String>,
    superclasses: Vec<String>,
    ancestors: Vec<String>,
    collection: Option<String>,
    strict: bool,
    dynamic: bool,
    shard_key: Vec<String>,
    indexes: Vec<IndexSpec>,
}

impl DocumentMeta {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> DocumentKind {
        self.kind
    }

    pub fn is_embedded(&self) -> bool {
        self.kind == DocumentKind::Embedded
    }

    /// Declared and inherited fields; the identity field comes first.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.by_name.get(name).map(|&index| &self.fields[index])
    }

    pub fn field_by_storage_key(&self, key: &str) -> Option<&Field> {
        self.by_storage_key.get(key).map(|&index| &self.fields[index])
    }

    /// The primary key or synthesized identity field, stored under `_id`.
    pub fn id_field(&self) -> Option<&Field> {
        self.id_field.map(|index| &self.fields[index])
    }

    pub fn is_abstract(&self) -> bool {
        self.abstract_class
    }

    pub fn allow_inheritance(&self) -> bool {
        self.allow_inheritance
    }

    /// Dotted chain of concrete class names from the hierarchy root, e.g. `Animal.Fish.Guppy`.
    pub fn hierarchy_path(&self) -> &str {
        &self.hierarchy_path
    }

    /// Hierarchy paths of the concrete ancestors, nearest last.
    pub fn superclasses(&self) -> &[String] {
        &self.superclasses
    }

    /// Names of every ancestor, abstract ones included.
    pub fn ancestors(&self) -> &[String] {
        &self.ancestors
    }

    /// True if this class is `class` or inherits from it.
    pub fn is_a(&self, class: &str) -> bool {
        self.name == class || self.ancestors.iter().any(|ancestor| ancestor == class)
    }

    pub fn collection(&self) -> Option<&str> {
        self.collection.as_deref()
    }

    /// The collection, or an operation error for classes that have none.
    pub fn require_collection(&self) -> DocumentStoreResult<&str> {
        self.collection.as_deref().ok_or_else(|| {
            DocumentStoreError::Operation(format!(
                "{} is {} and has no collection",
                self.name,
                if self.abstract_class { "abstract" } else { "embedded" },
            ))
        })
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    pub fn is_dynamic(&self) -> bool {
        self.dynamic
    }

    pub fn shard_key(&self) -> &[String] {
        &self.shard_key
    }

    /// Declared indexes followed by one unique index per unique field.
    pub fn indexes(&self) -> Vec<IndexSpec> {
        let mut indexes = self.indexes.clone();
        for field in self.fields.iter().filter(|f| f.is_unique() && !f.is_primary_key()) {
            if indexes.iter().all(|index| index.field != field.storage_key()) {
                let mut index = IndexSpec::new(field.storage_key()).unique();
                index.sparse = field.is_sparse();
                indexes.push(index);
            }
        }
        indexes
    }

    /// Whether stored documents carry a `_cls` discriminator.
    pub fn emits_discriminator(&self) -> bool {
        self.allow_inheritance && !self.abstract_class
    }
}

/// Resolves a declaration against its registered bases.
pub(crate) fn resolve<F>(def: ClassDef, lookup: F) -> DocumentStoreResult<DocumentMeta>
where
    F: Fn(&str) -> Option<Arc<DocumentMeta>>,
{
    let config = DocumentStoreError::Configuration;
    let name = def.name.clone();

    if name.is_empty() || name.contains('.') {
        return Err(config(format!("invalid class name '{}'", name)));
    }

    let bases = def
        .bases
        .iter()
        .map(|base| lookup(base).ok_or_else(|| config(format!("{}: unknown base class {}", name, base))))
        .collect::<DocumentStoreResult<Vec<_>>>()?;

    for base in &bases {
        if base.kind != def.kind {
            return Err(config(format!("{} cannot inherit from {}: document kinds differ", name, base.name)));
        }
        if !base.abstract_class && !base.allow_inheritance {
            return Err(config(format!(
                "Document {} may not be subclassed. To enable inheritance, use the \"allow_inheritance\" meta attribute.",
                base.name
            )));
        }
    }

    if def.abstract_class && bases.iter().any(|base| !base.abstract_class) {
        return Err(config(format!("abstract class {} cannot extend a concrete class", name)));
    }

    let inherited_allow = bases.iter().any(|base| base.allow_inheritance);
    if def.allow_inheritance == Some(false) && inherited_allow {
        return Err(config(format!(
            "{}: only classes without inheriting bases may set \"allow_inheritance\" to false",
            name
        )));
    }
    let allow_inheritance = def.allow_inheritance.unwrap_or(inherited_allow);

    let mut fields: Vec<Field> = Vec::new();
    let own = def.fields.into_iter().map(|field| field.resolve_self(&name));
    for field in bases.iter().flat_map(|base| base.fields.iter().cloned()).chain(own) {
        match fields.iter().position(|existing| existing.name() == field.name()) {
            Some(index) => fields[index] = field,
            None => fields.push(field),
        }
    }

    for field in &fields {
        field.check_declaration().map_err(|problem| config(format!("{}: {}", name, problem)))?;
        check_targets(field, &name, def.kind, &lookup)?;
    }

    let primary_keys = fields.iter().filter(|field| field.is_primary_key()).count();
    match def.kind {
        DocumentKind::Embedded if primary_keys > 0 => {
            return Err(config(format!("embedded class {} cannot declare a primary key", name)));
        }
        DocumentKind::Document if primary_keys > 1 => {
            return Err(config(format!("{}: cannot have more than one primary key", name)));
        }
        _ => {}
    }

    if let Some(index) = fields.iter().position(Field::is_primary_key) {
        let id = fields.remove(index);
        let auto = id.is_auto();
        fields.insert(0, id.into_identity(auto));
    } else if def.kind == DocumentKind::Document && !def.abstract_class {
        let id_name = auto_id_name(&fields);
        fields.insert(0, Field::object_id(id_name).into_identity(true));
    }

    let mut by_name = HashMap::new();
    let mut by_storage_key = HashMap::new();
    for (index, field) in fields.iter().enumerate() {
        by_name.insert(field.name().to_string(), index);
        if by_storage_key.insert(field.storage_key().to_string(), index).is_some() {
            return Err(config(format!("{}: storage key '{}' is used by more than one field", name, field.storage_key())));
        }
    }
    let id_field = by_storage_key.get(ID_KEY).copied();

    let inherited_lineage = bases
        .iter()
        .find(|base| !base.lineage.is_empty())
        .map(|base| base.lineage.clone())
        .unwrap_or_default();
    let lineage = match def.abstract_class {
        true => inherited_lineage,
        false => inherited_lineage.into_iter().chain([name.clone()]).collect::<Vec<_>>(),
    };
    let hierarchy_path = match def.abstract_class {
        true => name.clone(),
        false => lineage.join("."),
    };
    let superclass_count = match def.abstract_class {
        true => lineage.len(),
        false => lineage.len().saturating_sub(1),
    };
    let superclasses = (1..=superclass_count)
        .map(|len| lineage[..len].join("."))
        .collect::<Vec<_>>();

    let mut ancestors: Vec<String> = Vec::new();
    for base in &bases {
        for ancestor in std::iter::once(&base.name).chain(base.ancestors.iter()) {
            if !ancestors.contains(ancestor) {
                ancestors.push(ancestor.clone());
            }
        }
    }

    let collection = match (def.kind, def.abstract_class) {
        (DocumentKind::Embedded, _) | (_, true) => None,
        _ => {
            let inherited = bases
                .iter()
                .filter(|base| !base.abstract_class)
                .find_map(|base| base.collection.clone());
            match (inherited, def.collection) {
                (Some(inherited), Some(own)) if own != inherited => {
                    warn!(class = %name, collection = %inherited, ignored = %own, "subclass collection override ignored");
                    Some(inherited)
                }
                (Some(inherited), _) => Some(inherited),
                (None, Some(own)) => Some(own),
                (None, None) => Some(snake_case(&name)),
            }
        }
    };

    let inherit = |get: fn(&DocumentMeta) -> Option<bool>| bases.iter().find_map(|base| get(base));
    let strict = def.strict.or_else(|| inherit(|base| base.strict.then_some(true))).unwrap_or(false);
    let dynamic = def.dynamic.or_else(|| inherit(|base| base.dynamic.then_some(true))).unwrap_or(false);
    let shard_key = def
        .shard_key
        .or_else(|| bases.iter().find(|base| !base.shard_key.is_empty()).map(|base| base.shard_key.clone()))
        .unwrap_or_default();

    let mut indexes: Vec<IndexSpec> = Vec::new();
    for index in bases.iter().flat_map(|base| base.indexes.iter().cloned()).chain(def.indexes) {
        if !indexes.contains(&index) {
            indexes.push(index);
        }
    }

    for key in &shard_key {
        if !by_name.contains_key(key) {
            return Err(config(format!("{}: shard key '{}' is not a field", name, key)));
        }
    }

    Ok(DocumentMeta {
        name,
        kind: def.kind,
        fields,
        by_name,
        by_storage_key,
        id_field,
        abstract_class: def.abstract_class,
        allow_inheritance,
        hierarchy_path,
        lineage,
        superclasses,
        ancestors,
        collection,
        strict,
        dynamic,
        shard_key,
        indexes,
    })
}

fn check_targets<F>(field: &Field, class: &str, kind: DocumentKind, lookup: &F) -> DocumentStoreResult<()>
where
    F: Fn(&str) -> Option<Arc<DocumentMeta>>,
{
    let config = |message: String| Err(DocumentStoreError::Configuration(format!("{}: {}", class, message)));
    let target_kind = |target: &str| match target == class {
        true => Some(kind),
        false => lookup(target).map(|meta| meta.kind),
    };

    match field.kind() {
        FieldKind::Embedded { class: target } => {
            if target_kind(target).is_some_and(|k| k != DocumentKind::Embedded) {
                return config(format!("Invalid embedded document class provided to an EmbeddedDocumentField ({})", field.name()));
            }
        }
        FieldKind::Reference { class: target, .. } | FieldKind::CachedReference { class: target, .. } => {
            if target_kind(target) == Some(DocumentKind::Embedded) {
                return config(format!("field '{}' must reference a document class, not embedded {}", field.name(), target));
            }
            if matches!(field.kind(), FieldKind::CachedReference { .. }) && kind == DocumentKind::Embedded {
                return config(format!("CachedReferenceField '{}' is not allowed in embedded documents", field.name()));
            }
        }
        FieldKind::GenericEmbedded | FieldKind::GenericReference { .. } => {
            let expected = match field.kind() {
                FieldKind::GenericEmbedded => DocumentKind::Embedded,
                _ => DocumentKind::Document,
            };
            for choice in field.choice_list() {
                let Some(target) = choice.value.as_str() else {
                    return config(format!("choices of '{}' must be class names", field.name()));
                };
                match target_kind(target) {
                    Some(k) if k == expected => {}
                    Some(_) => return config(format!("choice {} of '{}' has the wrong document kind", target, field.name())),
                    None => return config(format!("choice {} of '{}' is not a registered class", target, field.name())),
                }
            }
        }
        _ => {}
    }

    match field.item_field() {
        Some(item) => check_targets(item, class, kind, lookup),
        None => Ok(()),
    }
}

fn auto_id_name(fields: &[Field]) -> String {
    let taken = |candidate: &str| {
        fields
            .iter()
            .any(|field| field.name() == candidate || field.storage_key() == candidate)
    };

    if !taken("id") {
        return "id".to_string();
    }
    (0..)
        .map(|n| format!("auto_id_{}", n))
        .find(|candidate| !taken(candidate))
        .unwrap_or_default()
}

/// `PersonAuto` becomes `person_auto`; every uppercase letter starts a word.
pub(crate) fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for c in name.chars() {
        if c.is_uppercase() {
            out.push('_');
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out.trim_matches('_').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snake_case_names() {
        assert_eq!(snake_case("PersonAuto"), "person_auto");
        assert_eq!(snake_case("Person"), "person");
        assert_eq!(snake_case("HTMLPage"), "h_t_m_l_page");
    }

    #[test]
    fn auto_id_avoids_taken_names() {
        let fields = vec![Field::string("id"), Field::string("auto_id_0")];
        assert_eq!(auto_id_name(&fields), "auto_id_1");
        assert_eq!(auto_id_name(&[Field::string("name")]), "id");
    }

    #[test]
    fn declared_and_unique_indexes_are_listed() {
        let meta = resolve(
            ClassDef::document("User")
                .field(Field::email("email").unique())
                .field(Field::string("nick").unique().sparse())
                .index(IndexSpec::new("created")),
            |_| None,
        )
        .unwrap();

        assert_eq!(
            meta.indexes(),
            vec![
                IndexSpec::new("created"),
                IndexSpec::new("email").unique(),
                IndexSpec::new("nick").unique().sparse(),
            ]
        );
    }

    #[test]
    fn inherited_auto_ids_stay_generated() {
        let animal = Arc::new(
            resolve(ClassDef::document("Animal").allow_inheritance(true).field(Field::string("name")), |_| None)
                .unwrap(),
        );
        let fish = resolve(ClassDef::document("Fish").extends("Animal"), |name| {
            (name == "Animal").then(|| animal.clone())
        })
        .unwrap();

        let id = fish.id_field().unwrap();
        assert_eq!(id.name(), "id");
        assert_eq!(id.storage_key(), "_id");
        assert!(id.is_auto());
        assert!(!id.is_required());
        assert_eq!(fish.fields().iter().filter(|field| field.is_primary_key()).count(), 1);
    }

    #[test]
    fn declared_primary_keys_are_required_in_subclasses() {
        let base = Arc::new(
            resolve(
                ClassDef::document("Account").allow_inheritance(true).field(Field::string("login").primary_key()),
                |_| None,
            )
            .unwrap(),
        );
        let admin = resolve(ClassDef::document("Admin").extends("Account"), |_| Some(base.clone())).unwrap();

        let id = admin.id_field().unwrap();
        assert_eq!(id.name(), "login");
        assert!(!id.is_auto());
        assert!(id.is_required());
    }
}

//! Field descriptors.
//!
//! A [`Field`] names a logical attribute, the key it is stored under, its semantic
//! [`FieldKind`] and its validation rules. Descriptors are built with a fluent API and
//! checked when the owning class is registered:
//!
//! ```ignore
//! use docmodel::prelude::*;
//!
//! let title = Field::string("title").max_length(120).required();
//! let tags = Field::list("tags", Field::string("tag"));
//! let author = Field::reference("author", "User");
//! ```
//!
//! Builder options that do not apply to the field's kind are recorded and reported as a
//! [`DocumentStoreError::Configuration`](crate::error::DocumentStoreError) at registration.

mod convert;
mod validate;

use std::{fmt, sync::Arc};

use chrono::SubsecRound;
use regex::Regex;

use crate::value::{Value, ValueMap};

pub use convert::{dynamic_to_native, dynamic_to_storage};

/// Default URL schemes accepted by [`Field::url`].
pub const DEFAULT_URL_SCHEMES: [&str; 4] = ["http", "https", "ftp", "ftps"];

/// Produces per-instance default values.
pub type DefaultFactory = Arc<dyn Fn() -> Value + Send + Sync>;

/// Maps a freshly allocated sequence number to the stored value.
pub type ValueDecorator = Arc<dyn Fn(i64) -> Value + Send + Sync>;

/// Default applied to unset fields at construction and after deletion.
#[derive(Clone)]
pub enum DefaultValue {
    /// The same value for every instance.
    Static(Value),
    /// Invoked once per instance, so mutable defaults are never shared.
    Factory(DefaultFactory),
}

impl DefaultValue {
    pub fn produce(&self) -> Value {
        match self {
            DefaultValue::Static(value) => value.clone(),
            DefaultValue::Factory(factory) => factory(),
        }
    }
}

impl fmt::Debug for DefaultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefaultValue::Static(value) => f.debug_tuple("Static").field(value).finish(),
            DefaultValue::Factory(_) => f.write_str("Factory(..)"),
        }
    }
}

/// One allowed value of a choice-constrained field.
#[derive(Debug, Clone, PartialEq)]
pub struct Choice {
    pub value: Value,
    pub label: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct StringRules {
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub regex: Option<Regex>,
}

#[derive(Debug, Clone)]
pub struct EmailRules {
    pub domain_whitelist: Vec<String>,
    pub allow_utf8_user: bool,
    pub allow_ip_domain: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Bounds<T> {
    pub min: Option<T>,
    pub max: Option<T>,
}

#[derive(Clone, Default)]
pub struct SequenceRules {
    pub sequence_name: Option<String>,
    pub value_decorator: Option<ValueDecorator>,
}

impl fmt::Debug for SequenceRules {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SequenceRules")
            .field("sequence_name", &self.sequence_name)
            .field("value_decorator", &self.value_decorator.as_ref().map(|_| ".."))
            .finish()
    }
}

/// Semantic type of a field.
#[derive(Debug, Clone)]
pub enum FieldKind {
    ObjectId,
    String(StringRules),
    Url {
        rules: StringRules,
        schemes: Vec<String>,
    },
    Email {
        rules: StringRules,
        email: EmailRules,
    },
    Int(Bounds<i64>),
    Float(Bounds<f64>),
    Boolean,
    /// Stored as a BSON datetime (millisecond precision).
    DateTime,
    /// Stored as a sortable `YYYY,MM,DD,HH,MM,SS,ffffff` string with microsecond precision.
    ComplexDateTime {
        separator: String,
    },
    Uuid {
        binary: bool,
    },
    List(Box<Field>),
    /// A list kept sorted on write, optionally by a field of its embedded documents.
    SortedList {
        item: Box<Field>,
        ordering: Option<String>,
        reverse: bool,
    },
    /// A string-keyed mapping; the item field types every value.
    Dict(Box<Field>),
    Embedded {
        class: String,
    },
    GenericEmbedded,
    Reference {
        class: String,
        auto_dereference: bool,
    },
    GenericReference {
        auto_dereference: bool,
    },
    CachedReference {
        class: String,
        fields: Vec<String>,
        auto_sync: bool,
    },
    Sequence(SequenceRules),
    /// Accepts any value; used for dynamic documents and untyped containers.
    Dynamic,
}

impl FieldKind {
    /// Short kind label used in messages.
    pub fn label(&self) -> &'static str {
        match self {
            FieldKind::ObjectId => "ObjectIdField",
            FieldKind::String(_) => "StringField",
            FieldKind::Url { .. } => "URLField",
            FieldKind::Email { .. } => "EmailField",
            FieldKind::Int(_) => "IntField",
            FieldKind::Float(_) => "FloatField",
            FieldKind::Boolean => "BooleanField",
            FieldKind::DateTime => "DateTimeField",
            FieldKind::ComplexDateTime { .. } => "ComplexDateTimeField",
            FieldKind::Uuid { .. } => "UUIDField",
            FieldKind::List(_) => "ListField",
            FieldKind::SortedList { .. } => "SortedListField",
            FieldKind::Dict(_) => "DictField",
            FieldKind::Embedded { .. } => "EmbeddedDocumentField",
            FieldKind::GenericEmbedded => "GenericEmbeddedDocumentField",
            FieldKind::Reference { .. } => "ReferenceField",
            FieldKind::GenericReference { .. } => "GenericReferenceField",
            FieldKind::CachedReference { .. } => "CachedReferenceField",
            FieldKind::Sequence(_) => "SequenceField",
            FieldKind::Dynamic => "DynamicField",
        }
    }

    fn string_rules_mut(&mut self) -> Option<&mut StringRules> {
        match self {
            FieldKind::String(rules) | FieldKind::Url { rules, .. } | FieldKind::Email { rules, .. } => Some(rules),
            _ => None,
        }
    }

    fn is_reference(&self) -> bool {
        matches!(
            self,
            FieldKind::Reference { .. } | FieldKind::GenericReference { .. } | FieldKind::CachedReference { .. }
        )
    }
}

/// A typed schema unit of a document class.
#[derive(Debug, Clone)]
pub struct Field {
    name: String,
    db_field: Option<String>,
    kind: FieldKind,
    required: bool,
    primary_key: bool,
    unique: bool,
    sparse: bool,
    auto: bool,
    default: Option<DefaultValue>,
    choices: Vec<Choice>,
    custom_data: Option<serde_json::Value>,
    problems: Vec<String>,
}

impl Field {
    /// Creates a field of the given kind.
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            db_field: None,
            kind,
            required: false,
            primary_key: false,
            unique: false,
            sparse: false,
            auto: false,
            default: None,
            choices: Vec::new(),
            custom_data: None,
            problems: Vec::new(),
        }
    }

    pub fn object_id(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::ObjectId)
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::String(StringRules::default()))
    }

    pub fn url(name: impl Into<String>) -> Self {
        Self::new(
            name,
            FieldKind::Url {
                rules: StringRules::default(),
                schemes: DEFAULT_URL_SCHEMES.iter().map(|s| s.to_string()).collect(),
            },
        )
    }

    pub fn email(name: impl Into<String>) -> Self {
        Self::new(
            name,
            FieldKind::Email {
                rules: StringRules::default(),
                email: EmailRules {
                    domain_whitelist: Vec::new(),
                    allow_utf8_user: false,
                    allow_ip_domain: false,
                },
            },
        )
    }

    pub fn int(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Int(Bounds::default()))
    }

    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Float(Bounds::default()))
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Boolean)
    }

    pub fn datetime(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::DateTime)
    }

    pub fn complex_datetime(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::ComplexDateTime { separator: ",".to_string() })
    }

    /// A UUID field, stored as BSON binary (subtype 4) unless [`Field::binary`] turns it off.
    pub fn uuid(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Uuid { binary: true })
    }

    /// A list whose elements are described by `item`; the item's name is replaced with the list's.
    pub fn list(name: impl Into<String>, item: Field) -> Self {
        let name = name.into();
        Self::new(name.clone(), FieldKind::List(Box::new(item.with_name(name))))
    }

    /// A list of arbitrary values.
    pub fn untyped_list(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::list(name.clone(), Field::dynamic(name))
    }

    pub fn sorted_list(name: impl Into<String>, item: Field) -> Self {
        let name = name.into();
        Self::new(
            name.clone(),
            FieldKind::SortedList {
                item: Box::new(item.with_name(name)),
                ordering: None,
                reverse: false,
            },
        )
    }

    /// A mapping of string keys to arbitrary values.
    pub fn dict(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(name.clone(), FieldKind::Dict(Box::new(Field::dynamic(name))))
    }

    /// A mapping of string keys to values described by `item`.
    pub fn map(name: impl Into<String>, item: Field) -> Self {
        let name = name.into();
        Self::new(name.clone(), FieldKind::Dict(Box::new(item.with_name(name))))
    }

    pub fn embedded(name: impl Into<String>, class: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Embedded { class: class.into() })
    }

    /// An embedded document of any registered embedded class; restrict with [`Field::choices`].
    pub fn generic_embedded(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::GenericEmbedded)
    }

    /// A reference to a document of `class` (or `"self"`), stored as the target's identity.
    pub fn reference(name: impl Into<String>, class: impl Into<String>) -> Self {
        Self::new(
            name,
            FieldKind::Reference {
                class: class.into(),
                auto_dereference: true,
            },
        )
    }

    /// A reference to a document of any class, stored with the target's hierarchy path.
    pub fn generic_reference(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::GenericReference { auto_dereference: true })
    }

    /// A reference that also stores a snapshot of `fields` from the target.
    pub fn cached_reference<I, S>(name: impl Into<String>, class: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            name,
            FieldKind::CachedReference {
                class: class.into(),
                fields: fields.into_iter().map(Into::into).collect(),
                auto_sync: false,
            },
        )
    }

    /// An integer allocated from a shared counter when the document is first saved.
    pub fn sequence(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Sequence(SequenceRules::default()))
    }

    pub fn dynamic(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Dynamic)
    }

    fn problem(mut self, option: &str) -> Self {
        self.problems.push(format!(
            "option '{}' does not apply to {} '{}'",
            option,
            self.kind.label(),
            self.name
        ));
        self
    }

    /// Stores the field under `key` instead of its name.
    pub fn db_field(mut self, key: impl Into<String>) -> Self {
        self.db_field = Some(key.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Marks the field as the class identity; it is stored under `_id`.
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Unique indexes built for this field skip documents that lack it.
    pub fn sparse(mut self) -> Self {
        self.sparse = true;
        self
    }

    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(DefaultValue::Static(value.into()));
        self
    }

    pub fn default_with<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        self.default = Some(DefaultValue::Factory(Arc::new(factory)));
        self
    }

    /// Restricts values to a fixed, ordered set. For document-valued fields the choices are class names.
    pub fn choices<I, V>(mut self, choices: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.choices = choices
            .into_iter()
            .map(|value| Choice { value: value.into(), label: None })
            .collect();
        self
    }

    /// Restricts values to a fixed set of `(value, label)` pairs.
    pub fn labeled_choices<I, V, L>(mut self, choices: I) -> Self
    where
        I: IntoIterator<Item = (V, L)>,
        V: Into<Value>,
        L: Into<String>,
    {
        self.choices = choices
            .into_iter()
            .map(|(value, label)| Choice { value: value.into(), label: Some(label.into()) })
            .collect();
        self
    }

    /// Attaches opaque data to the descriptor; it is never stored with documents.
    pub fn custom_data(mut self, data: serde_json::Value) -> Self {
        self.custom_data = Some(data);
        self
    }

    pub fn min_length(mut self, length: usize) -> Self {
        match self.kind.string_rules_mut() {
            Some(rules) => rules.min_length = Some(length),
            None => return self.problem("min_length"),
        }
        self
    }

    pub fn max_length(mut self, length: usize) -> Self {
        match self.kind.string_rules_mut() {
            Some(rules) => rules.max_length = Some(length),
            None => return self.problem("max_length"),
        }
        self
    }

    /// Values must match `pattern` from their first character.
    pub fn regex(mut self, pattern: &str) -> Self {
        let compiled = match Regex::new(pattern) {
            Ok(compiled) => compiled,
            Err(err) => {
                self.problems.push(format!("invalid regex for field '{}': {}", self.name, err));
                return self;
            }
        };

        match self.kind.string_rules_mut() {
            Some(rules) => rules.regex = Some(compiled),
            None => return self.problem("regex"),
        }
        self
    }

    /// Lower bound for int and float fields.
    pub fn min(mut self, bound: impl Into<Value>) -> Self {
        let bound = bound.into();
        match (&mut self.kind, &bound) {
            (FieldKind::Int(bounds), Value::Int(min)) => bounds.min = Some(*min),
            (FieldKind::Float(bounds), Value::Int(_) | Value::Float(_)) => bounds.min = bound.as_f64(),
            _ => return self.problem("min"),
        }
        self
    }

    /// Upper bound for int and float fields.
    pub fn max(mut self, bound: impl Into<Value>) -> Self {
        let bound = bound.into();
        match (&mut self.kind, &bound) {
            (FieldKind::Int(bounds), Value::Int(max)) => bounds.max = Some(*max),
            (FieldKind::Float(bounds), Value::Int(_) | Value::Float(_)) => bounds.max = bound.as_f64(),
            _ => return self.problem("max"),
        }
        self
    }

    pub fn schemes<I, S>(mut self, schemes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        match &mut self.kind {
            FieldKind::Url { schemes: current, .. } => *current = schemes.into_iter().map(Into::into).collect(),
            _ => return self.problem("schemes"),
        }
        self
    }

    pub fn domain_whitelist<I, S>(mut self, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        match &mut self.kind {
            FieldKind::Email { email, .. } => email.domain_whitelist = domains.into_iter().map(Into::into).collect(),
            _ => return self.problem("domain_whitelist"),
        }
        self
    }

    pub fn allow_utf8_user(mut self, allow: bool) -> Self {
        match &mut self.kind {
            FieldKind::Email { email, .. } => email.allow_utf8_user = allow,
            _ => return self.problem("allow_utf8_user"),
        }
        self
    }

    pub fn allow_ip_domain(mut self, allow: bool) -> Self {
        match &mut self.kind {
            FieldKind::Email { email, .. } => email.allow_ip_domain = allow,
            _ => return self.problem("allow_ip_domain"),
        }
        self
    }

    pub fn separator(mut self, separator: impl Into<String>) -> Self {
        match &mut self.kind {
            FieldKind::ComplexDateTime { separator: current } => *current = separator.into(),
            _ => return self.problem("separator"),
        }
        self
    }

    /// Chooses binary (`true`) or string storage for UUID fields.
    pub fn binary(mut self, binary: bool) -> Self {
        match &mut self.kind {
            FieldKind::Uuid { binary: current } => *current = binary,
            _ => return self.problem("binary"),
        }
        self
    }

    /// Sorts embedded-document elements of a sorted list by this field.
    pub fn ordering(mut self, field: impl Into<String>) -> Self {
        match &mut self.kind {
            FieldKind::SortedList { ordering, .. } => *ordering = Some(field.into()),
            _ => return self.problem("ordering"),
        }
        self
    }

    pub fn reverse(mut self, reverse: bool) -> Self {
        match &mut self.kind {
            FieldKind::SortedList { reverse: current, .. } => *current = reverse,
            _ => return self.problem("reverse"),
        }
        self
    }

    /// Controls whether accessing the reference fetches the target.
    pub fn auto_dereference(mut self, enabled: bool) -> Self {
        match &mut self.kind {
            FieldKind::Reference { auto_dereference, .. }
            | FieldKind::GenericReference { auto_dereference } => *auto_dereference = enabled,
            _ => return self.problem("auto_dereference"),
        }
        self
    }

    /// Resyncs the cached snapshot whenever the target is saved with changes to the cached fields.
    pub fn auto_sync(mut self, enabled: bool) -> Self {
        match &mut self.kind {
            FieldKind::CachedReference { auto_sync, .. } => *auto_sync = enabled,
            _ => return self.problem("auto_sync"),
        }
        self
    }

    pub fn sequence_name(mut self, name: impl Into<String>) -> Self {
        match &mut self.kind {
            FieldKind::Sequence(rules) => rules.sequence_name = Some(name.into()),
            _ => return self.problem("sequence_name"),
        }
        self
    }

    pub fn value_decorator<F>(mut self, decorator: F) -> Self
    where
        F: Fn(i64) -> Value + Send + Sync + 'static,
    {
        match &mut self.kind {
            FieldKind::Sequence(rules) => rules.value_decorator = Some(Arc::new(decorator)),
            _ => return self.problem("value_decorator"),
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The key this field is stored under.
    pub fn storage_key(&self) -> &str {
        self.db_field.as_deref().unwrap_or(&self.name)
    }

    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn is_primary_key(&self) -> bool {
        self.primary_key
    }

    pub fn is_unique(&self) -> bool {
        self.unique
    }

    pub fn is_sparse(&self) -> bool {
        self.sparse
    }

    /// True for the synthesized identity field.
    pub fn is_auto(&self) -> bool {
        self.auto
    }

    /// True for fields whose value is produced at save time rather than by the caller.
    pub fn is_generated(&self) -> bool {
        self.auto || matches!(self.kind, FieldKind::Sequence(_))
    }

    pub fn choice_list(&self) -> &[Choice] {
        &self.choices
    }

    pub fn custom(&self) -> Option<&serde_json::Value> {
        self.custom_data.as_ref()
    }

    /// The descriptor of list elements or dict values.
    pub fn item_field(&self) -> Option<&Field> {
        match &self.kind {
            FieldKind::List(item) | FieldKind::Dict(item) | FieldKind::SortedList { item, .. } => Some(item),
            _ => None,
        }
    }

    /// Whether reading this reference resolves the target.
    pub fn dereferences(&self) -> bool {
        match &self.kind {
            FieldKind::Reference { auto_dereference, .. }
            | FieldKind::GenericReference { auto_dereference } => *auto_dereference,
            FieldKind::CachedReference { .. } => true,
            _ => self.item_field().is_some_and(Field::dereferences),
        }
    }

    /// A fresh default value; containers default to empty.
    pub fn default_value(&self) -> Option<Value> {
        match (&self.default, &self.kind) {
            (Some(default), _) => Some(default.produce()).filter(|value| !value.is_null()),
            (None, FieldKind::List(_) | FieldKind::SortedList { .. }) => Some(Value::List(Vec::new())),
            (None, FieldKind::Dict(_)) => Some(Value::Dict(ValueMap::new())),
            (None, _) => None,
        }
    }

    /// Human label for `value`: the matching choice label, else the value's string form.
    pub fn display(&self, value: &Value) -> String {
        self.choices
            .iter()
            .find(|choice| &choice.value == value)
            .and_then(|choice| choice.label.clone())
            .unwrap_or_else(|| value.to_string())
    }

    /// Normalizes an assigned value: documents and identities assigned to reference fields
    /// become [`Reference`](crate::reference::Reference) values, datetimes are truncated to
    /// milliseconds, and container items are prepared recursively.
    pub fn prepare(&self, value: Value) -> Value {
        use crate::reference::{DocumentRef, Reference};

        match (&self.kind, value) {
            (FieldKind::Reference { class, .. } | FieldKind::CachedReference { class, .. }, value) => match value {
                Value::Document(doc) => Value::Reference(Reference::resolved(*doc)),
                Value::Null => Value::Null,
                value @ Value::Reference(_) => value,
                id => match convert::identity_to_bson(&id) {
                    Some(id) => Value::Reference(Reference::unresolved(DocumentRef::new(class.clone(), id))),
                    None => id,
                },
            },
            (FieldKind::GenericReference { .. }, Value::Document(doc)) => Value::Reference(Reference::resolved(*doc)),
            // Storage keeps milliseconds.
            (FieldKind::DateTime, Value::DateTime(dt)) => Value::DateTime(dt.trunc_subsecs(3)),
            (FieldKind::List(item) | FieldKind::SortedList { item, .. }, Value::List(items)) => {
                Value::List(items.into_iter().map(|value| item.prepare(value)).collect())
            }
            (FieldKind::Dict(item), Value::Dict(map)) => Value::Dict(
                map.into_iter()
                    .map(|(key, value)| (key, item.prepare(value)))
                    .collect()
            ),
            (_, value) => value,
        }
    }

    pub(crate) fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub(crate) fn into_identity(mut self, auto: bool) -> Self {
        self.db_field = Some("_id".to_string());
        self.primary_key = true;
        self.required = self.required || !auto;
        self.auto = auto;
        self
    }

    /// Replaces `"self"` reference targets with the declaring class.
    pub(crate) fn resolve_self(mut self, class_name: &str) -> Self {
        match &mut self.kind {
            FieldKind::Reference { class, .. } | FieldKind::CachedReference { class, .. } if class == "self" => {
                *class = class_name.to_string();
            }
            FieldKind::Embedded { class } if class == "self" => *class = class_name.to_string(),
            FieldKind::List(item) | FieldKind::Dict(item) | FieldKind::SortedList { item, .. } => {
                let resolved = std::mem::replace(item.as_mut(), Field::dynamic(""));
                **item = resolved.resolve_self(class_name);
            }
            _ => {}
        }
        self
    }

    /// Checks construction-time constraints: recorded builder problems and storage key shape.
    pub(crate) fn check_declaration(&self) -> Result<(), String> {
        self.check_options()?;

        let key = self.storage_key();
        if key.is_empty() {
            return Err(format!("field '{}' has an empty storage key", self.name));
        }
        if key.contains('.') || key.contains('\0') || key.starts_with('$') {
            return Err(format!(
                "field '{}': storage keys cannot contain dots (\".\") or null characters (\"\\0\"), and they must not start with a dollar sign (\"$\")",
                self.name
            ));
        }
        if key == crate::document::DISCRIMINATOR_KEY {
            return Err(format!("field '{}' uses the reserved storage key '_cls'", self.name));
        }
        if self.kind.is_reference() && self.primary_key {
            return Err(format!("reference field '{}' cannot be a primary key", self.name));
        }

        Ok(())
    }

    /// Item fields are never stored under their own key, so only their options are checked.
    fn check_options(&self) -> Result<(), String> {
        if let Some(problem) = self.problems.first() {
            return Err(problem.clone());
        }

        match self.item_field() {
            Some(item) => item.check_options(),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_defaults_are_fresh_per_call() {
        let field = Field::dict("settings").default_with(|| Value::Dict(ValueMap::new()));
        assert_eq!(field.default_value(), Some(Value::Dict(ValueMap::new())));
        assert_eq!(Field::untyped_list("tags").default_value(), Some(Value::List(vec![])));
        assert_eq!(Field::string("name").default_value(), None);
    }

    #[test]
    fn misapplied_options_are_reported() {
        let field = Field::int("age").max_length(3);
        assert!(field.check_declaration().unwrap_err().contains("max_length"));

        let field = Field::string("name").regex("(unclosed");
        assert!(field.check_declaration().is_err());
    }

    #[test]
    fn storage_key_shape_is_checked() {
        assert!(Field::string("name").db_field("a.b").check_declaration().is_err());
        assert!(Field::string("name").db_field("$name").check_declaration().is_err());
        assert!(Field::string("name").db_field("na\0me").check_declaration().is_err());
        assert!(Field::string("name").db_field("_cls").check_declaration().is_err());
        assert!(Field::list("names", Field::string("x").db_field("$x")).check_declaration().is_ok());
        assert!(Field::list("sizes", Field::int("x").max_length(2)).check_declaration().is_err());
        assert!(Field::string("name").db_field("n").check_declaration().is_ok());
    }

    #[test]
    fn display_falls_back_to_string_form() {
        let field = Field::string("size").labeled_choices([("S", "Small"), ("M", "Medium")]);
        assert_eq!(field.display(&Value::from("S")), "Small");
        assert_eq!(field.display(&Value::from("XXL")), "XXL");
    }

    #[test]
    fn prepare_wraps_identities_for_references() {
        let field = Field::reference("author", "User");
        let prepared = field.prepare(Value::ObjectId(bson::oid::ObjectId::new()));
        assert!(prepared.as_reference().is_some());

        let list = Field::list("authors", Field::reference("author", "User"));
        let prepared = list.prepare(Value::List(vec![Value::ObjectId(bson::oid::ObjectId::new())]));
        assert!(prepared.as_list().unwrap()[0].as_reference().is_some());
    }
}

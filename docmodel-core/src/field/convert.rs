use bson::{Binary, Bson, Document, oid::ObjectId, spec::BinarySubtype};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use tracing::trace;
use uuid::Uuid;

use crate::{
    document::{DISCRIMINATOR_KEY, DocumentInstance, ID_KEY},
    error::{DocumentStoreError, DocumentStoreResult},
    reference::{DocumentRef, Reference, cached_snapshot},
    registry::Registry,
    value::{NULL, Value, ValueMap},
};

use super::{Field, FieldKind};

const REF_KEY: &str = "_ref";

impl Field {
    /// Converts a native value to its storage form. `Null` converts to `Bson::Null`, which
    /// document serialization omits.
    pub fn to_storage(&self, value: &Value) -> DocumentStoreResult<Bson> {
        if value.is_null() {
            return Ok(Bson::Null);
        }

        match (&self.kind, value) {
            (FieldKind::ObjectId, Value::String(hex)) => ObjectId::parse_str(hex)
                .map(Bson::ObjectId)
                .map_err(|e| DocumentStoreError::Serialization(format!("field '{}': {}", self.name, e))),
            (FieldKind::Int(_), Value::Float(f)) if f.is_finite() => Ok(int_to_bson(f.trunc() as i64)),
            (FieldKind::Int(_), Value::String(s)) => match s.trim().parse::<i64>() {
                Ok(i) => Ok(int_to_bson(i)),
                Err(_) => Ok(Bson::String(s.clone())),
            },
            (FieldKind::Float(_), Value::Int(i)) => Ok(Bson::Double(*i as f64)),
            (FieldKind::DateTime, Value::String(s)) => match parse_datetime(s) {
                Some(dt) => Ok(Bson::DateTime(bson::DateTime::from_chrono(dt))),
                None => Ok(Bson::String(s.clone())),
            },
            (FieldKind::ComplexDateTime { separator }, Value::DateTime(dt)) => {
                Ok(Bson::String(format_complex_datetime(dt, separator)))
            }
            (FieldKind::Uuid { binary }, Value::Uuid(uuid)) => Ok(uuid_to_bson(uuid, *binary)),
            (FieldKind::Uuid { binary }, Value::String(s)) => match Uuid::parse_str(s) {
                Ok(uuid) => Ok(uuid_to_bson(&uuid, *binary)),
                Err(_) => Ok(Bson::String(s.clone())),
            },
            (FieldKind::List(item), Value::List(items)) => items
                .iter()
                .map(|v| item.to_storage(v))
                .collect::<DocumentStoreResult<Vec<_>>>()
                .map(Bson::Array),
            (FieldKind::SortedList { item, ordering, reverse }, Value::List(items)) => {
                let mut sorted = items.iter().collect::<Vec<_>>();
                match ordering {
                    Some(key) => sorted.sort_by(|a, b| ordering_key(a, key).compare(ordering_key(b, key))),
                    None => sorted.sort_by(|a, b| a.compare(b)),
                }
                if *reverse {
                    sorted.reverse();
                }
                sorted
                    .into_iter()
                    .map(|v| item.to_storage(v))
                    .collect::<DocumentStoreResult<Vec<_>>>()
                    .map(Bson::Array)
            }
            (FieldKind::Dict(item), Value::Dict(map)) => {
                let mut out = Document::new();
                for (key, v) in map {
                    let stored = item.to_storage(v)?;
                    if !matches!(stored, Bson::Null) {
                        out.insert(key.clone(), stored);
                    }
                }
                Ok(Bson::Document(out))
            }
            (FieldKind::Embedded { .. }, Value::Document(doc)) => doc.to_storage_form(None).map(Bson::Document),
            (FieldKind::GenericEmbedded, Value::Document(doc)) => embedded_with_discriminator(doc),
            (FieldKind::Reference { .. }, Value::Reference(reference)) => Ok(reference.id().clone()),
            (FieldKind::GenericReference { .. }, Value::Reference(reference)) => generic_reference_to_bson(reference),
            (FieldKind::CachedReference { fields, .. }, Value::Reference(reference)) => {
                match (reference.document(), reference.snapshot()) {
                    (Some(target), _) => cached_snapshot(target, fields).map(Bson::Document),
                    (None, Some(snapshot)) => Ok(Bson::Document(snapshot.clone())),
                    (None, None) => {
                        let mut snapshot = Document::new();
                        snapshot.insert(ID_KEY, reference.id().clone());
                        Ok(Bson::Document(snapshot))
                    }
                }
            }
            (FieldKind::Sequence(_), Value::Int(i)) => Ok(int_to_bson(*i)),
            (_, value) => dynamic_to_storage(value),
        }
    }

    /// Converts a stored value back to its native form, resolving embedded classes through `registry`.
    pub fn to_native(&self, raw: Bson, registry: &Registry) -> DocumentStoreResult<Value> {
        if matches!(raw, Bson::Null | Bson::Undefined) {
            return Ok(Value::Null);
        }

        match (&self.kind, raw) {
            (FieldKind::Int(_), Bson::Double(f)) => Ok(Value::Int(f.trunc() as i64)),
            (FieldKind::Float(_), Bson::Int32(i)) => Ok(Value::Float(i as f64)),
            (FieldKind::Float(_), Bson::Int64(i)) => Ok(Value::Float(i as f64)),
            (FieldKind::DateTime, Bson::String(s)) => Ok(parse_datetime(&s).map(Value::DateTime).unwrap_or(Value::String(s))),
            (FieldKind::ComplexDateTime { separator }, Bson::String(s)) => {
                Ok(parse_complex_datetime(&s, separator).map(Value::DateTime).unwrap_or(Value::String(s)))
            }
            (FieldKind::Uuid { .. }, Bson::String(s)) => Ok(Uuid::parse_str(&s).map(Value::Uuid).unwrap_or(Value::String(s))),
            (FieldKind::List(item) | FieldKind::SortedList { item, .. }, Bson::Array(items)) => items
                .into_iter()
                .map(|v| item.to_native(v, registry))
                .collect::<DocumentStoreResult<Vec<_>>>()
                .map(Value::List),
            (FieldKind::Dict(item), Bson::Document(doc)) => doc
                .into_iter()
                .map(|(key, v)| item.to_native(v, registry).map(|v| (key, v)))
                .collect::<DocumentStoreResult<ValueMap>>()
                .map(Value::Dict),
            (FieldKind::Embedded { class }, Bson::Document(doc)) => {
                let meta = registry.get(class)?;
                DocumentInstance::from_storage_form(&meta, doc, registry).map(Value::from)
            }
            (FieldKind::GenericEmbedded, Bson::Document(doc)) => {
                let path = doc
                    .get_str(DISCRIMINATOR_KEY)
                    .map_err(|_| DocumentStoreError::InvalidDocument(format!("field '{}': generic embedded document without _cls", self.name)))?
                    .to_string();
                let meta = registry.lookup(&path)?;
                DocumentInstance::from_storage_form(&meta, doc, registry).map(Value::from)
            }
            (FieldKind::Reference { class, .. }, raw) => {
                let id = match raw {
                    Bson::Document(mut dbref) if dbref.contains_key("$id") => dbref.remove("$id").unwrap_or(Bson::Null),
                    raw => raw,
                };
                Ok(Value::Reference(Reference::unresolved(DocumentRef::new(class.clone(), id))))
            }
            (FieldKind::GenericReference { .. }, Bson::Document(doc)) => generic_reference_from_bson(doc, &self.name),
            (FieldKind::CachedReference { class, .. }, Bson::Document(snapshot)) => {
                let id = snapshot.get(ID_KEY).cloned().unwrap_or(Bson::Null);
                Ok(Value::Reference(Reference::cached(DocumentRef::new(class.clone(), id), snapshot)))
            }
            (FieldKind::CachedReference { class, .. }, id) => {
                Ok(Value::Reference(Reference::unresolved(DocumentRef::new(class.clone(), id))))
            }
            (_, raw) => dynamic_to_native(raw, registry),
        }
    }
}

/// Converts a native value to BSON without a descriptor. Embedded documents carry their `_cls`
/// so they can be decoded again; references use the generic reference form.
pub fn dynamic_to_storage(value: &Value) -> DocumentStoreResult<Bson> {
    Ok(match value {
        Value::Null => Bson::Null,
        Value::Bool(b) => Bson::Boolean(*b),
        Value::Int(i) => int_to_bson(*i),
        Value::Float(f) => Bson::Double(*f),
        Value::String(s) => Bson::String(s.clone()),
        Value::DateTime(dt) => Bson::DateTime(bson::DateTime::from_chrono(*dt)),
        Value::Uuid(uuid) => uuid_to_bson(uuid, true),
        Value::ObjectId(oid) => Bson::ObjectId(*oid),
        Value::List(items) => Bson::Array(
            items
                .iter()
                .map(dynamic_to_storage)
                .collect::<DocumentStoreResult<Vec<_>>>()?
        ),
        Value::Dict(map) => {
            let mut out = Document::new();
            for (key, v) in map {
                out.insert(key.clone(), dynamic_to_storage(v)?);
            }
            Bson::Document(out)
        }
        Value::Document(doc) => embedded_with_discriminator(doc)?,
        Value::Reference(reference) => generic_reference_to_bson(reference)?,
    })
}

/// Converts BSON to a native value without a descriptor. Subdocuments carrying a resolvable
/// `_cls` decode as documents, generic reference shapes as references, anything else as dicts.
pub fn dynamic_to_native(raw: Bson, registry: &Registry) -> DocumentStoreResult<Value> {
    Ok(match raw {
        Bson::Null | Bson::Undefined => Value::Null,
        Bson::Boolean(b) => Value::Bool(b),
        Bson::Int32(i) => Value::Int(i as i64),
        Bson::Int64(i) => Value::Int(i),
        Bson::Double(f) => Value::Float(f),
        Bson::String(s) => Value::String(s),
        Bson::DateTime(dt) => Value::DateTime(dt.to_chrono()),
        Bson::ObjectId(oid) => Value::ObjectId(oid),
        Bson::Binary(binary) if binary.subtype == BinarySubtype::Uuid => Uuid::from_slice(&binary.bytes)
            .map(Value::Uuid)
            .map_err(|e| DocumentStoreError::InvalidDocument(e.to_string()))?,
        Bson::Array(items) => Value::List(
            items
                .into_iter()
                .map(|v| dynamic_to_native(v, registry))
                .collect::<DocumentStoreResult<Vec<_>>>()?
        ),
        Bson::Document(doc) => {
            if doc.contains_key(REF_KEY) && doc.contains_key(DISCRIMINATOR_KEY) {
                return generic_reference_from_bson(doc, "dynamic");
            }

            let class = doc.get_str(DISCRIMINATOR_KEY).ok().map(str::to_string);
            match class.and_then(|path| registry.lookup(&path).ok()) {
                Some(meta) => DocumentInstance::from_storage_form(&meta, doc, registry).map(Value::from)?,
                None => {
                    trace!(keys = doc.len(), "decoding untyped subdocument as dict");
                    Value::Dict(
                        doc.into_iter()
                            .map(|(key, v)| dynamic_to_native(v, registry).map(|v| (key, v)))
                            .collect::<DocumentStoreResult<ValueMap>>()?
                    )
                }
            }
        }
        other => {
            return Err(DocumentStoreError::InvalidDocument(format!(
                "unsupported stored value type {:?}",
                other.element_type()
            )));
        }
    })
}

/// The storage form of a value used as a document identity, if it can be one.
pub(crate) fn identity_to_bson(value: &Value) -> Option<Bson> {
    match value {
        Value::ObjectId(oid) => Some(Bson::ObjectId(*oid)),
        Value::String(s) => Some(Bson::String(s.clone())),
        Value::Int(i) => Some(int_to_bson(*i)),
        Value::Uuid(uuid) => Some(uuid_to_bson(uuid, true)),
        _ => None,
    }
}

/// Integers are stored as 32-bit when they fit.
pub(crate) fn int_to_bson(value: i64) -> Bson {
    i32::try_from(value).map(Bson::Int32).unwrap_or(Bson::Int64(value))
}

fn uuid_to_bson(uuid: &Uuid, binary: bool) -> Bson {
    if binary {
        Bson::Binary(Binary {
            subtype: BinarySubtype::Uuid,
            bytes: uuid.as_bytes().to_vec(),
        })
    } else {
        Bson::String(uuid.hyphenated().to_string())
    }
}

fn embedded_with_discriminator(doc: &DocumentInstance) -> DocumentStoreResult<Bson> {
    let mut stored = doc.to_storage_form(None)?;
    if !stored.contains_key(DISCRIMINATOR_KEY) {
        let mut tagged = Document::new();
        tagged.insert(DISCRIMINATOR_KEY, doc.meta().hierarchy_path());
        for (key, value) in stored {
            tagged.insert(key, value);
        }
        stored = tagged;
    }
    Ok(Bson::Document(stored))
}

fn generic_reference_to_bson(reference: &Reference) -> DocumentStoreResult<Bson> {
    let pointer = reference.pointer();
    let collection = reference
        .document()
        .and_then(|doc| doc.meta().collection().map(str::to_string))
        .or_else(|| pointer.collection().map(str::to_string))
        .ok_or_else(|| DocumentStoreError::Operation(format!("reference to {} has no collection", pointer)))?;
    let path = reference
        .document()
        .map(|doc| doc.meta().hierarchy_path().to_string())
        .unwrap_or_else(|| pointer.class().to_string());

    let mut dbref = Document::new();
    dbref.insert("$ref", collection);
    dbref.insert("$id", pointer.id().clone());

    let mut stored = Document::new();
    stored.insert(DISCRIMINATOR_KEY, path);
    stored.insert(REF_KEY, dbref);
    Ok(Bson::Document(stored))
}

fn generic_reference_from_bson(mut doc: Document, field: &str) -> DocumentStoreResult<Value> {
    let invalid = || DocumentStoreError::InvalidDocument(format!("field '{}': malformed generic reference", field));

    let path = doc.get_str(DISCRIMINATOR_KEY).map_err(|_| invalid())?.to_string();
    let mut dbref = match doc.remove(REF_KEY) {
        Some(Bson::Document(dbref)) => dbref,
        _ => return Err(invalid()),
    };
    let id = dbref.remove("$id").ok_or_else(invalid)?;
    let collection = dbref.get_str("$ref").ok().map(str::to_string);

    let mut pointer = DocumentRef::new(path, id);
    if let Some(collection) = collection {
        pointer = pointer.with_collection(collection);
    }
    Ok(Value::Reference(Reference::unresolved(pointer)))
}

fn ordering_key<'a>(value: &'a Value, key: &str) -> &'a Value {
    value
        .as_document()
        .and_then(|doc| doc.get(key))
        .unwrap_or(&NULL)
}

/// Parses RFC 3339 timestamps, `YYYY-MM-DD HH:MM:SS[.f]` and plain dates.
pub(crate) fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

pub(crate) fn format_complex_datetime(dt: &DateTime<Utc>, separator: &str) -> String {
    let format = ["%Y", "%m", "%d", "%H", "%M", "%S", "%6f"].join(separator);
    dt.format(&format).to_string()
}

pub(crate) fn parse_complex_datetime(s: &str, separator: &str) -> Option<DateTime<Utc>> {
    let parts = s
        .split(separator)
        .map(|part| part.parse::<u32>().ok())
        .collect::<Option<Vec<_>>>()?;
    let [year, month, day, hour, minute, second, micro] = parts.as_slice() else {
        return None;
    };

    NaiveDate::from_ymd_opt(i32::try_from(*year).ok()?, *month, *day)?
        .and_hms_micro_opt(*hour, *minute, *second, *micro)
        .map(|naive| naive.and_utc())
}

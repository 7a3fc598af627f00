use std::{collections::BTreeMap, net::IpAddr, sync::LazyLock};

use regex::Regex;

use crate::{
    document::DocumentInstance,
    error::ValidationError,
    value::Value,
};

use super::{EmailRules, Field, FieldKind, StringRules, convert};

static URL_REGEX: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?i)^(?:[a-z0-9.\-]*)://",
        r"(?:(?:[^\s:@/]+(?::[^\s:@/]*)?@)?)",
        r"(?:(?:[\p{L}\p{N}](?:[\p{L}\p{N}-]{0,61}[\p{L}\p{N}])?\.)+(?:[\p{L}]{2,63}|xn--[a-z0-9-]{2,59})\.?|",
        r"localhost|",
        r"\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}|",
        r"\[?[a-f0-9]*:[a-f0-9:]+\]?)",
        r"(?::\d+)?",
        r"(?:/?|[/?]\S+)$",
    ))
    .ok()
});

static USER_REGEX: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?i)^(?:[-!#$%&'*+/=?^_`{}|~0-9a-z]+(?:\.[-!#$%&'*+/=?^_`{}|~0-9a-z]+)*$",
        r##"|^"(?:[\x01-\x08\x0b\x0c\x0e-\x1f!#-\[\]-\x7f]|\\[\x01-\x09\x0b\x0c\x0e-\x7f])*"$)"##,
    ))
    .ok()
});

static UTF8_USER_REGEX: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?i)^(?:[-!#$%&'*+/=?^_`{}|~\w]+(?:\.[-!#$%&'*+/=?^_`{}|~\w]+)*$",
        r##"|^"(?:[\x01-\x08\x0b\x0c\x0e-\x1f!#-\[\]-\x7f]|\\[\x01-\x09\x0b\x0c\x0e-\x7f])*"$)"##,
    ))
    .ok()
});

static DOMAIN_REGEX: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:[\p{L}\p{N}](?:[\p{L}\p{N}-]{0,61}[\p{L}\p{N}])?\.)+[\p{L}\p{N}](?:[\p{L}\p{N}-]{0,61}[\p{L}\p{N}])$").ok()
});

fn is_match(regex: &LazyLock<Option<Regex>>, value: &str) -> bool {
    regex.as_ref().is_some_and(|regex| regex.is_match(value))
}

fn fail<T>(message: impl Into<String>) -> Result<T, ValidationError> {
    Err(ValidationError::new(message))
}

impl Field {
    /// Validates a present value against this descriptor. Missing values are checked by
    /// the owning document, which knows whether the field is required.
    pub fn validate(&self, value: &Value) -> Result<(), ValidationError> {
        if value.is_null() {
            return match self.required && !self.is_generated() {
                true => fail("Field is required"),
                false => Ok(()),
            };
        }

        if self.required && matches!(value, Value::List(items) if items.is_empty()) {
            return fail("Field is required and cannot be empty");
        }
        if self.required && matches!(value, Value::Dict(map) if map.is_empty()) {
            return fail("Field is required and cannot be empty");
        }

        self.validate_choices(value)?;
        self.validate_kind(value)
    }

    fn validate_choices(&self, value: &Value) -> Result<(), ValidationError> {
        if self.choices.is_empty() {
            return Ok(());
        }

        let allowed = |candidate: &Value| match candidate {
            Value::Document(doc) => self.class_in_choices(doc),
            Value::Reference(reference) => match reference.document() {
                Some(doc) => self.class_in_choices(doc),
                None => self.choices.iter().any(|c| c.value.as_str() == Some(reference.pointer().class())),
            },
            other => self.choices.iter().any(|c| &c.value == other),
        };

        let ok = match value {
            Value::List(items) => items.iter().all(allowed),
            other => allowed(other),
        };

        match ok {
            true => Ok(()),
            false => {
                let listed = self.choices
                    .iter()
                    .map(|c| c.value.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                fail(format!("Value must be one of [{}]", listed))
            }
        }
    }

    fn class_in_choices(&self, doc: &DocumentInstance) -> bool {
        let meta = doc.meta();
        self.choices.iter().any(|choice| {
            choice.value.as_str().is_some_and(|name| meta.is_a(name))
        })
    }

    fn validate_kind(&self, value: &Value) -> Result<(), ValidationError> {
        match &self.kind {
            FieldKind::ObjectId => match value {
                Value::ObjectId(_) => Ok(()),
                Value::String(s) if bson::oid::ObjectId::parse_str(s).is_ok() => Ok(()),
                _ => fail("Invalid ObjectID"),
            },
            FieldKind::String(rules) => validate_string(rules, value).map(|_| ()),
            FieldKind::Url { rules, schemes } => {
                let s = validate_string(rules, value)?;
                validate_url(s, schemes)
            }
            FieldKind::Email { rules, email } => {
                let s = validate_string(rules, value)?;
                validate_email(s, email)
            }
            FieldKind::Int(bounds) => {
                let number = match value {
                    Value::Int(i) => *i,
                    Value::Float(f) if f.is_finite() => f.trunc() as i64,
                    Value::String(s) => s
                        .trim()
                        .parse::<i64>()
                        .map_err(|_| ValidationError::new(format!("{} could not be converted to int", s)))?,
                    other => return fail(format!("{} could not be converted to int", other)),
                };
                if bounds.min.is_some_and(|min| number < min) {
                    return fail("Integer value is too small");
                }
                if bounds.max.is_some_and(|max| number > max) {
                    return fail("Integer value is too large");
                }
                Ok(())
            }
            FieldKind::Float(bounds) => {
                let number = match value {
                    Value::Float(f) => *f,
                    Value::Int(i) => *i as f64,
                    _ => return fail("FloatField only accepts float and integer values"),
                };
                if bounds.min.is_some_and(|min| number < min) {
                    return fail("Float value is too small");
                }
                if bounds.max.is_some_and(|max| number > max) {
                    return fail("Float value is too large");
                }
                Ok(())
            }
            FieldKind::Boolean => match value {
                Value::Bool(_) => Ok(()),
                _ => fail("BooleanField only accepts boolean values"),
            },
            FieldKind::DateTime => match value {
                Value::DateTime(_) => Ok(()),
                Value::String(s) if convert::parse_datetime(s).is_some() => Ok(()),
                other => fail(format!("cannot parse date \"{}\"", other)),
            },
            FieldKind::ComplexDateTime { separator } => match value {
                Value::DateTime(_) => Ok(()),
                Value::String(s) if convert::parse_complex_datetime(s, separator).is_some() => Ok(()),
                _ => fail("Only datetime objects may used in a ComplexDateTimeField"),
            },
            FieldKind::Uuid { .. } => match value {
                Value::Uuid(_) => Ok(()),
                Value::String(s) if uuid::Uuid::parse_str(s).is_ok() => Ok(()),
                other => fail(format!("Could not convert to UUID: {}", other)),
            },
            FieldKind::List(item) | FieldKind::SortedList { item, .. } => match value {
                Value::List(items) => {
                    let errors = items
                        .iter()
                        .enumerate()
                        .filter_map(|(index, v)| item.validate_item(v).err().map(|e| (index.to_string(), e)))
                        .collect::<BTreeMap<_, _>>();
                    aggregate(format!("Invalid {} item", self.kind.label()), errors)
                }
                _ => fail("Only lists and tuples may be used in a list field"),
            },
            FieldKind::Dict(item) => match value {
                Value::Dict(map) => {
                    if map.keys().any(|key| key.contains('.') || key.starts_with('$')) {
                        return fail("Invalid dictionary key name - keys may not contain \".\" or startswith \"$\" characters");
                    }
                    let errors = map
                        .iter()
                        .filter_map(|(key, v)| item.validate_item(v).err().map(|e| (key.clone(), e)))
                        .collect::<BTreeMap<_, _>>();
                    aggregate(format!("Invalid {} item", self.kind.label()), errors)
                }
                _ => fail("Only dictionaries may be used in a DictField"),
            },
            FieldKind::Embedded { class } => match value {
                Value::Document(doc) if doc.meta().is_a(class) => nested(doc),
                _ => fail(format!("Invalid embedded document instance provided to an EmbeddedDocumentField ({})", class)),
            },
            FieldKind::GenericEmbedded => match value {
                Value::Document(doc) if doc.meta().is_embedded() => nested(doc),
                _ => fail("Invalid embedded document instance provided to a GenericEmbeddedDocumentField"),
            },
            FieldKind::Reference { class, .. } | FieldKind::CachedReference { class, .. } => match value {
                Value::Reference(reference) => {
                    if let Some(target) = reference.document() {
                        if !target.meta().is_a(class) {
                            return fail(format!("{} is not an instance of {}", target.class_name(), class));
                        }
                    }
                    require_saved(reference)
                }
                _ => fail(format!("A ReferenceField only accepts documents of class {} or their identities", class)),
            },
            FieldKind::GenericReference { .. } => match value {
                Value::Reference(reference) => require_saved(reference),
                _ => fail("Invalid generic reference: only documents may be referenced"),
            },
            FieldKind::Sequence(_) | FieldKind::Dynamic => match value {
                Value::Document(doc) => nested(doc),
                _ => Ok(()),
            },
        }
    }

    /// Element validation inside containers: nulls are allowed unless the item is required.
    fn validate_item(&self, value: &Value) -> Result<(), ValidationError> {
        match value {
            Value::Null if !self.required => Ok(()),
            value => self.validate(value),
        }
    }
}

fn aggregate(message: String, errors: BTreeMap<String, ValidationError>) -> Result<(), ValidationError> {
    match errors.is_empty() {
        true => Ok(()),
        false => Err(ValidationError::with_errors(message, errors)),
    }
}

fn nested(doc: &DocumentInstance) -> Result<(), ValidationError> {
    doc.validate().map_err(|err| {
        ValidationError::with_errors(format!("Invalid embedded document {}", doc.class_name()), err.errors().clone())
    })
}

fn require_saved(reference: &crate::reference::Reference) -> Result<(), ValidationError> {
    if reference.id() == &bson::Bson::Null {
        return fail("You can only reference documents once they have been saved to the database");
    }
    Ok(())
}

fn validate_string<'a>(rules: &StringRules, value: &'a Value) -> Result<&'a str, ValidationError> {
    let Value::String(s) = value else {
        return fail("StringField only accepts string values");
    };

    let length = s.chars().count();
    if rules.max_length.is_some_and(|max| length > max) {
        return fail("String value is too long");
    }
    if rules.min_length.is_some_and(|min| length < min) {
        return fail("String value is too short");
    }
    if let Some(regex) = &rules.regex {
        if !regex.find(s).is_some_and(|m| m.start() == 0) {
            return fail("String value did not match validation regex");
        }
    }
    Ok(s)
}

fn validate_url(url: &str, schemes: &[String]) -> Result<(), ValidationError> {
    let scheme = url.split("://").next().unwrap_or_default().to_lowercase();
    if !schemes.iter().any(|s| s.eq_ignore_ascii_case(&scheme)) {
        return fail(format!("Invalid scheme {} in URL: {}", scheme, url));
    }
    if !is_match(&URL_REGEX, url) {
        return fail(format!("Invalid URL: {}", url));
    }
    Ok(())
}

fn validate_email(email: &str, rules: &EmailRules) -> Result<(), ValidationError> {
    let invalid = || fail(format!("Invalid email address: {}", email));

    let Some((user, domain)) = email.rsplit_once('@') else {
        return invalid();
    };

    let user_ok = match rules.allow_utf8_user {
        true => is_match(&UTF8_USER_REGEX, user),
        false => is_match(&USER_REGEX, user),
    };
    if !user_ok {
        return invalid();
    }

    if rules.domain_whitelist.iter().any(|allowed| allowed == domain) {
        return Ok(());
    }
    if is_match(&DOMAIN_REGEX, domain) {
        return Ok(());
    }
    if rules.allow_ip_domain {
        let literal = domain.strip_prefix('[').and_then(|d| d.strip_suffix(']'));
        if literal.is_some_and(|ip| ip.parse::<IpAddr>().is_ok()) {
            return Ok(());
        }
    }
    invalid()
}

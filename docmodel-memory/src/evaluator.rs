//! Query expression evaluation for in-memory document filtering.
//!
//! Paths are resolved the way a document database resolves them: numeric segments index into
//! arrays, and any other segment applied to an array fans out over its subdocuments, so
//! `comments.author` matches if any comment's author matches. A comparison against an array
//! value also matches if any element matches.

use std::{cmp::Ordering, collections::HashMap};

use bson::{Bson, Document, datetime::DateTime, oid::ObjectId};

use docmodel_core::{
    error::{DocumentStoreError, DocumentStoreResult},
    query::{Expr, FieldOp, QueryVisitor},
};

/// Type-erased, comparable representation of BSON values.
///
/// Numbers are normalized to f64 so `Int32`, `Int64` and `Double` compare with each other.
#[derive(Debug)]
pub(crate) enum Comparable<'a> {
    Null,
    Bool(bool),
    Number(f64),
    DateTime(DateTime),
    String(&'a str),
    ObjectId(ObjectId),
    Binary(&'a [u8]),
    Array(Vec<Comparable<'a>>),
    Map(HashMap<&'a str, Comparable<'a>>),
}

impl<'a> From<&'a Bson> for Comparable<'a> {
    fn from(bson: &'a Bson) -> Self {
        match bson {
            Bson::Null | Bson::Undefined => Comparable::Null,
            Bson::Boolean(value) => Comparable::Bool(*value),
            Bson::Int32(value) => Comparable::Number(*value as f64),
            Bson::Int64(value) => Comparable::Number(*value as f64),
            Bson::Double(value) => Comparable::Number(*value),
            Bson::DateTime(value) => Comparable::DateTime(*value),
            Bson::String(value) => Comparable::String(value),
            Bson::ObjectId(value) => Comparable::ObjectId(*value),
            Bson::Binary(binary) => Comparable::Binary(&binary.bytes),
            Bson::Array(arr) => Comparable::Array(arr.iter().map(Comparable::from).collect()),
            Bson::Document(doc) => Comparable::Map(
                doc.iter()
                    .map(|(k, v)| (k.as_str(), Comparable::from(v)))
                    .collect(),
            ),
            _ => Comparable::Null,
        }
    }
}

impl<'a> PartialEq for Comparable<'a> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => true,
            (Comparable::Bool(a), Comparable::Bool(b)) => a == b,
            (Comparable::Number(a), Comparable::Number(b)) => a == b,
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a == b,
            (Comparable::String(a), Comparable::String(b)) => a == b,
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a == b,
            (Comparable::Binary(a), Comparable::Binary(b)) => a == b,
            (Comparable::Array(a), Comparable::Array(b)) => a == b,
            (Comparable::Map(a), Comparable::Map(b)) => a == b,
            _ => false,
        }
    }
}

impl<'a> PartialOrd for Comparable<'a> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Comparable::Bool(a), Comparable::Bool(b)) => a.partial_cmp(b),
            (Comparable::Number(a), Comparable::Number(b)) => a.partial_cmp(b),
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a.partial_cmp(b),
            (Comparable::String(a), Comparable::String(b)) => a.partial_cmp(b),
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a.partial_cmp(b),
            (Comparable::Binary(a), Comparable::Binary(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

/// Sort order: missing and null values first, incomparable values equal.
pub(crate) fn sort_order(left: Option<&Bson>, right: Option<&Bson>) -> Ordering {
    let left = left.map(Comparable::from).unwrap_or(Comparable::Null);
    let right = right.map(Comparable::from).unwrap_or(Comparable::Null);

    match (&left, &right) {
        (Comparable::Null, Comparable::Null) => Ordering::Equal,
        (Comparable::Null, _) => Ordering::Less,
        (_, Comparable::Null) => Ordering::Greater,
        _ => left.partial_cmp(&right).unwrap_or(Ordering::Equal),
    }
}

/// All values reachable through `path`.
pub(crate) fn resolve_path<'a>(doc: &'a Document, path: &str) -> Vec<&'a Bson> {
    let (head, rest) = match path.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    };
    match (doc.get(head), rest) {
        (None, _) => Vec::new(),
        (Some(value), None) => vec![value],
        (Some(value), Some(rest)) => resolve_in(value, rest),
    }
}

fn resolve_in<'a>(value: &'a Bson, path: &str) -> Vec<&'a Bson> {
    match value {
        Bson::Document(doc) => resolve_path(doc, path),
        Bson::Array(items) => {
            let (head, rest) = match path.split_once('.') {
                Some((head, rest)) => (head, Some(rest)),
                None => (path, None),
            };
            match head.parse::<usize>() {
                Ok(index) => match (items.get(index), rest) {
                    (None, _) => Vec::new(),
                    (Some(item), None) => vec![item],
                    (Some(item), Some(rest)) => resolve_in(item, rest),
                },
                Err(_) => items.iter().flat_map(|item| resolve_in(item, path)).collect(),
            }
        }
        _ => Vec::new(),
    }
}

/// Whether `candidate` equals `value`, or is an array with an element equal to it.
fn matches_value(candidate: &Bson, value: &Comparable<'_>) -> bool {
    let candidate = Comparable::from(candidate);
    if &candidate == value {
        return true;
    }
    match candidate {
        Comparable::Array(items) => items.iter().any(|item| item == value),
        _ => false,
    }
}

fn order_matches(candidate: &Bson, op: FieldOp, value: &Comparable<'_>) -> bool {
    let check = |item: &Comparable<'_>| match item.partial_cmp(value) {
        Some(ordering) => match op {
            FieldOp::Gt => ordering == Ordering::Greater,
            FieldOp::Gte => ordering != Ordering::Less,
            FieldOp::Lt => ordering == Ordering::Less,
            FieldOp::Lte => ordering != Ordering::Greater,
            _ => false,
        },
        None => false,
    };

    match Comparable::from(candidate) {
        Comparable::Array(items) => items.iter().any(check),
        single => check(&single),
    }
}

fn string_matches(candidate: &Bson, op: FieldOp, value: &Bson) -> bool {
    let check = |item: &Bson| match (item, value) {
        (Bson::String(left), Bson::String(right)) => match op {
            FieldOp::Contains => left.contains(right.as_str()),
            FieldOp::StartsWith => left.starts_with(right.as_str()),
            FieldOp::EndsWith => left.ends_with(right.as_str()),
            _ => false,
        },
        _ => false,
    };

    match candidate {
        Bson::Array(items) => match op {
            FieldOp::Contains => {
                let value = Comparable::from(value);
                items.iter().any(|item| Comparable::from(item) == value || check(item))
            }
            _ => items.iter().any(check),
        },
        single => check(single),
    }
}

pub(crate) struct DocumentEvaluator<'a> {
    document: &'a Document,
}

impl<'a> DocumentEvaluator<'a> {
    pub fn new(document: &'a Document) -> Self {
        Self { document }
    }

    pub fn evaluate(&mut self, expr: &Expr) -> DocumentStoreResult<bool> {
        self.visit_expr(expr)
    }

    pub fn matches(document: &'a Document, filter: Option<&Expr>) -> DocumentStoreResult<bool> {
        match filter {
            Some(expr) => DocumentEvaluator::new(document).evaluate(expr),
            None => Ok(true),
        }
    }
}

impl<'a> QueryVisitor for DocumentEvaluator<'a> {
    type Output = bool;
    type Error = DocumentStoreError;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        for expr in exprs {
            if !self.visit_expr(expr)? {
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        for expr in exprs {
            if self.visit_expr(expr)? {
                return Ok(true);
            }
        }

        Ok(false)
    }

    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        Ok(!self.visit_expr(expr)?)
    }

    fn visit_exists(&mut self, field: &str, should_exist: bool) -> Result<Self::Output, Self::Error> {
        let exists = resolve_path(self.document, field)
            .into_iter()
            .any(|value| !matches!(value, Bson::Null | Bson::Undefined));
        Ok(exists == should_exist)
    }

    fn visit_field(&mut self, field: &str, op: &FieldOp, value: &Bson) -> Result<Self::Output, Self::Error> {
        let candidates = resolve_path(self.document, field);
        let target = Comparable::from(value);

        let any_equal = || {
            if candidates.is_empty() {
                return target == Comparable::Null;
            }
            candidates.iter().any(|candidate| matches_value(candidate, &target))
        };

        let any_of = |values: &Bson| -> DocumentStoreResult<bool> {
            let Bson::Array(values) = values else {
                return Err(DocumentStoreError::InvalidDocument(format!(
                    "operand of an any_of/none_of filter on '{}' must be an array",
                    field
                )));
            };
            Ok(values.iter().any(|value| {
                let value = Comparable::from(value);
                if candidates.is_empty() {
                    return value == Comparable::Null;
                }
                candidates.iter().any(|candidate| matches_value(candidate, &value))
            }))
        };

        Ok(match op {
            FieldOp::Eq => any_equal(),
            FieldOp::Ne => !any_equal(),
            FieldOp::Gt | FieldOp::Gte | FieldOp::Lt | FieldOp::Lte => candidates
                .iter()
                .any(|candidate| order_matches(candidate, *op, &target)),
            FieldOp::Contains | FieldOp::StartsWith | FieldOp::EndsWith => candidates
                .iter()
                .any(|candidate| string_matches(candidate, *op, value)),
            FieldOp::NotContains => !candidates
                .iter()
                .any(|candidate| string_matches(candidate, FieldOp::Contains, value)),
            FieldOp::AnyOf => any_of(value)?,
            FieldOp::NoneOf => !any_of(value)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use bson::doc;
    use docmodel_core::query::Filter;

    use super::*;

    fn eval(doc: &Document, expr: Expr) -> bool {
        DocumentEvaluator::new(doc).evaluate(&expr).unwrap()
    }

    #[test]
    fn paths_fan_out_over_arrays() {
        let doc = doc! {
            "tags": ["a", "b"],
            "comments": [ { "author": "ann", "votes": 3 }, { "author": "bob", "votes": 9 } ],
        };

        assert!(eval(&doc, Filter::eq("tags", "b")));
        assert!(eval(&doc, Filter::eq("comments.author", "bob")));
        assert!(eval(&doc, Filter::eq("comments.0.author", "ann")));
        assert!(!eval(&doc, Filter::eq("comments.0.author", "bob")));
        assert!(eval(&doc, Filter::gt("comments.votes", 5)));
        assert!(eval(&doc, Filter::contains("tags", "a")));
    }

    #[test]
    fn missing_fields_equal_null() {
        let doc = doc! { "name": "x" };

        assert!(eval(&doc, Filter::eq("age", Bson::Null)));
        assert!(eval(&doc, Filter::ne("age", 3)));
        assert!(eval(&doc, Filter::not_exists("age")));
        assert!(!eval(&doc, Filter::gt("age", 3)));
        assert!(eval(&doc, Filter::none_of("age", vec![1, 2])));
    }

    #[test]
    fn identities_compare_by_value() {
        let id = ObjectId::new();
        let doc = doc! { "_id": id, "_cls": "Animal.Dog" };

        assert!(eval(&doc, Filter::id(id)));
        assert!(eval(&doc, Filter::any_of("_cls", vec!["Animal", "Animal.Dog"])));
        assert!(!eval(&doc, Filter::id(ObjectId::new())));
        assert!(DocumentEvaluator::new(&doc).evaluate(&Filter::any_of("_cls", "Animal")).is_err());
    }

    #[test]
    fn sort_order_puts_missing_first() {
        assert_eq!(sort_order(None, Some(&Bson::Int32(1))), Ordering::Less);
        assert_eq!(sort_order(Some(&Bson::Int32(2)), Some(&Bson::Double(1.5))), Ordering::Greater);
    }
}

//! Query translation from the docmodel AST to MongoDB query syntax.
//!
//! String operators become anchored or unanchored regular expressions over the escaped
//! operand, so they match literally and case-sensitively like the in-memory evaluator.

use bson::{Bson, Document, doc};

use docmodel_core::{
    error::DocumentStoreError,
    query::{Expr, FieldOp, QueryVisitor},
};

/// Translates query expressions into MongoDB query documents.
pub(crate) struct MongoQueryTranslator;

impl MongoQueryTranslator {
    /// The filter document for an optional expression; no expression matches everything.
    pub(crate) fn translate(filter: Option<&Expr>) -> Result<Document, DocumentStoreError> {
        match filter {
            Some(expr) => MongoQueryTranslator.visit_expr(expr),
            None => Ok(Document::new()),
        }
    }

    fn visit_all(&mut self, exprs: &[Expr]) -> Result<Vec<Document>, DocumentStoreError> {
        exprs.iter().map(|expr| self.visit_expr(expr)).collect()
    }
}

fn string_operand<'a>(field: &str, op: &str, value: &'a Bson) -> Result<&'a str, DocumentStoreError> {
    match value {
        Bson::String(s) => Ok(s),
        _ => Err(DocumentStoreError::Backend(format!(
            "{} on '{}' requires a string value",
            op, field
        ))),
    }
}

fn array_operand(field: &str, value: &Bson) -> Result<Vec<Bson>, DocumentStoreError> {
    match value {
        Bson::Array(values) => Ok(values.clone()),
        _ => Err(DocumentStoreError::Backend(format!(
            "any_of/none_of on '{}' requires an array value",
            field
        ))),
    }
}

impl QueryVisitor for MongoQueryTranslator {
    type Output = Document;
    type Error = DocumentStoreError;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        if exprs.is_empty() {
            return Ok(Document::new());
        }
        Ok(doc! { "$and": self.visit_all(exprs)? })
    }

    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        if exprs.is_empty() {
            return Ok(doc! { "$nor": [{}] });
        }
        Ok(doc! { "$or": self.visit_all(exprs)? })
    }

    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        Ok(doc! { "$nor": [self.visit_expr(expr)?] })
    }

    fn visit_exists(&mut self, field: &str, should_exist: bool) -> Result<Self::Output, Self::Error> {
        let present = doc! { field: { "$exists": true, "$ne": Bson::Null } };
        if should_exist {
            Ok(present)
        } else {
            Ok(doc! { "$nor": [present] })
        }
    }

    fn visit_field(&mut self, field: &str, op: &FieldOp, value: &Bson) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            field: match op {
                FieldOp::Eq => doc! { "$eq": value },
                FieldOp::Ne => doc! { "$ne": value },
                FieldOp::Gt => doc! { "$gt": value },
                FieldOp::Gte => doc! { "$gte": value },
                FieldOp::Lt => doc! { "$lt": value },
                FieldOp::Lte => doc! { "$lte": value },
                FieldOp::Contains => match value {
                    Bson::String(s) => doc! { "$regex": regex::escape(s) },
                    other => doc! { "$eq": other },
                },
                FieldOp::NotContains => match value {
                    Bson::String(s) => doc! { "$not": { "$regex": regex::escape(s) } },
                    other => doc! { "$ne": other },
                },
                FieldOp::StartsWith => {
                    doc! { "$regex": format!("^{}", regex::escape(string_operand(field, "starts_with", value)?)) }
                }
                FieldOp::EndsWith => {
                    doc! { "$regex": format!("{}$", regex::escape(string_operand(field, "ends_with", value)?)) }
                }
                FieldOp::AnyOf => doc! { "$in": array_operand(field, value)? },
                FieldOp::NoneOf => doc! { "$nin": array_operand(field, value)? },
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use docmodel_core::query::Filter;

    use super::*;

    fn translate(expr: Expr) -> Document {
        MongoQueryTranslator::translate(Some(&expr)).unwrap()
    }

    #[test]
    fn negation_uses_nor() {
        assert_eq!(
            translate(Filter::eq("age", 3).not()),
            doc! { "$nor": [{ "age": { "$eq": 3 } }] }
        );
    }

    #[test]
    fn string_operands_are_escaped() {
        assert_eq!(
            translate(Filter::starts_with("name", "a.b")),
            doc! { "name": { "$regex": "^a\\.b" } }
        );
        assert_eq!(
            translate(Filter::contains("tags", 3)),
            doc! { "tags": { "$eq": 3 } }
        );
    }

    #[test]
    fn class_scope_translates_to_in() {
        let expr = Filter::any_of("_cls", vec!["Animal", "Animal.Dog"]).and(Filter::eq("name", "Rex"));
        assert_eq!(
            translate(expr),
            doc! { "$and": [
                { "_cls": { "$in": ["Animal", "Animal.Dog"] } },
                { "name": { "$eq": "Rex" } },
            ] }
        );
        assert!(MongoQueryTranslator::translate(Some(&Filter::any_of("_cls", "Animal"))).is_err());
    }

    #[test]
    fn empty_conjunction_matches_everything() {
        assert_eq!(translate(Expr::And(Vec::new())), Document::new());
        assert_eq!(MongoQueryTranslator::translate(None).unwrap(), Document::new());
    }
}

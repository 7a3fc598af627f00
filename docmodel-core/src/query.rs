//! Query AST shared by the store and its backends.
//!
//! Filters address stored documents by storage key, with dotted paths reaching into
//! subdocuments and list elements (`author._id`, `comments.0.body`). The store adds the
//! `_cls` restriction for inheritance-enabled classes before handing a query to a backend.
//!
//! # Query Building
//!
//! ```ignore
//! use docmodel::query::{Filter, Query, SortDirection};
//!
//! let query = Query::builder()
//!     .filter(Filter::eq("status", "active").and(Filter::gt("age", 18)))
//!     .sort("age", SortDirection::Desc)
//!     .limit(10)
//!     .project(["name", "age"])
//!     .build();
//! ```
//!
//! # Filter Expression API
//!
//! [`Filter`] collects the constructors:
//!
//! - Comparison: `eq`, `ne`, `gt`, `gte`, `lt`, `lte`
//! - String and list: `starts_with`, `ends_with`, `contains`, `not_contains`
//! - Existence: `exists`, `not_exists`
//! - Membership: `any_of`, `none_of`
//! - Logical: `and`, `or`, plus [`Expr::not`]
//! - Identity: `id`
//!
//! Backends translate an [`Expr`] by implementing [`QueryVisitor`].

use bson::Bson;

use crate::error::DocumentStoreError;

/// Sort direction for query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    /// Ascending order (smallest first).
    Asc,
    /// Descending order (largest first).
    Desc,
}

/// One sort key of a query.
#[derive(Debug, Clone, PartialEq)]
pub struct Sort {
    /// Storage key or dotted path.
    pub field: String,
    /// The sort direction.
    pub direction: SortDirection,
}

/// Field comparison operators for filter expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOp {
    /// Equal; on a list value, matches if any element is equal.
    Eq,
    /// Not equal; on a list value, matches if no element is equal.
    Ne,
    /// Greater than.
    Gt,
    /// Greater than or equal to.
    Gte,
    /// Less than.
    Lt,
    /// Less than or equal to.
    Lte,
    /// Substring of a string, or element of a list.
    Contains,
    /// Neither a substring nor an element.
    NotContains,
    /// String starts with the value.
    StartsWith,
    /// String ends with the value.
    EndsWith,
    /// The value (or any element of it) is one of the given array's values.
    AnyOf,
    /// The value (and every element of it) is none of the given array's values.
    NoneOf,
}

/// A filter expression over stored documents.
///
/// Expressions combine with [`and`](Expr::and), [`or`](Expr::or) and [`not`](Expr::not).
/// An empty `And` matches every document and an empty `Or` matches none.
///
/// ```ignore
/// use docmodel::query::Filter;
///
/// let adults = Filter::gte("age", 18);
/// let either = Filter::or([Filter::eq("role", "admin"), Filter::exists("invited_by")]);
/// let filter = adults.and(either.not());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// All of the expressions must match.
    And(Vec<Expr>),
    /// Any of the expressions must match.
    Or(Vec<Expr>),
    /// Inverts the inner expression.
    Not(Box<Expr>),
    /// Whether the path is present with a non-null value.
    Exists(String, bool),
    /// Field comparison expression.
    Field {
        /// Storage key or dotted path.
        field: String,
        /// The comparison operator.
        op: FieldOp,
        /// The value to compare against, in storage form.
        value: Bson,
    },
}

impl Expr {
    /// Creates a field comparison expression.
    pub fn field(field: String, op: FieldOp, value: Bson) -> Self {
        Expr::Field { field, op, value }
    }

    /// Combines with another expression using logical AND; an existing `And` is extended.
    pub fn and(self, other: Expr) -> Self {
        match self {
            Expr::And(mut list) => {
                list.push(other);
                Expr::And(list)
            }
            _ => Expr::And(vec![self, other]),
        }
    }

    /// Combines with another expression using logical OR; an existing `Or` is extended.
    pub fn or(self, other: Expr) -> Self {
        match self {
            Expr::Or(mut list) => {
                list.push(other);
                Expr::Or(list)
            }
            _ => Expr::Or(vec![self, other]),
        }
    }

    /// Negates this expression.
    pub fn not(self) -> Self {
        Expr::Not(Box::new(self))
    }

    /// The `path == value` pairs this expression requires, used to seed upserted documents.
    pub fn equalities(&self) -> Vec<(&str, &Bson)> {
        match self {
            Expr::Field { field, op: FieldOp::Eq, value } => vec![(field.as_str(), value)],
            Expr::And(exprs) => exprs.iter().flat_map(Expr::equalities).collect(),
            _ => Vec::new(),
        }
    }
}

/// A structured query for one collection.
///
/// Use [`QueryBuilder`] for construction. Results come back in insertion order unless
/// sort keys are given; `offset` applies before `limit`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    /// Optional filter expression; `None` matches every document.
    pub filter: Option<Expr>,
    /// Maximum number of documents to return.
    pub limit: Option<usize>,
    /// Number of documents to skip.
    pub offset: Option<usize>,
    /// Sort keys, most significant first.
    pub sort: Vec<Sort>,
    /// Storage keys to return; `_id` and `_cls` are always returned.
    pub projection: Option<Vec<String>>,
}

impl Query {
    /// Creates an empty query matching every document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a query builder for fluent construction.
    pub fn builder() -> QueryBuilder {
        QueryBuilder::new()
    }

    /// A query matching `filter`, if any.
    pub fn filtered(filter: Option<Expr>) -> Self {
        Query {
            filter,
            ..Self::default()
        }
    }

    /// Restricts this query further; the existing filter is kept.
    pub(crate) fn restrict(mut self, expr: Expr) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => expr.and(existing),
            None => expr,
        });
        self
    }
}

/// Constructors for filter expressions.
///
/// Field names are storage keys or dotted paths; values are given in storage form.
///
/// ```ignore
/// use docmodel::query::Filter;
///
/// let expr = Filter::eq("name", "Alice").and(Filter::gt("age", 18));
/// ```
pub struct Filter;

impl Filter {
    /// Matches documents where the field equals `value`.
    pub fn eq(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Eq, value.into())
    }

    /// Matches documents where the field does not equal `value`.
    pub fn ne(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Ne, value.into())
    }

    /// Matches documents where the field is greater than `value`.
    pub fn gt(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Gt, value.into())
    }

    /// Matches documents where the field is greater than or equal to `value`.
    pub fn gte(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Gte, value.into())
    }

    /// Matches documents where the field is less than `value`.
    pub fn lt(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Lt, value.into())
    }

    /// Matches documents where the field is less than or equal to `value`.
    pub fn lte(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Lte, value.into())
    }

    /// Matches documents where the string field starts with `value`.
    pub fn starts_with(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::StartsWith, value.into())
    }

    /// Matches documents where the string field ends with `value`.
    pub fn ends_with(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::EndsWith, value.into())
    }

    /// Matches documents where the field holds `value` as a substring or list element.
    pub fn contains(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Contains, value.into())
    }

    /// Matches documents where the field holds `value` neither as a substring nor as an element.
    pub fn not_contains(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::NotContains, value.into())
    }

    /// Matches documents where the field is present and not null.
    pub fn exists(field: impl Into<String>) -> Expr {
        Expr::Exists(field.into(), true)
    }

    /// Matches documents where the field is missing or null.
    pub fn not_exists(field: impl Into<String>) -> Expr {
        Expr::Exists(field.into(), false)
    }

    /// Matches documents matched by every expression.
    pub fn and(exprs: impl IntoIterator<Item = Expr>) -> Expr {
        Expr::And(exprs.into_iter().collect())
    }

    /// Matches documents matched by at least one expression.
    pub fn or(exprs: impl IntoIterator<Item = Expr>) -> Expr {
        Expr::Or(exprs.into_iter().collect())
    }

    /// Matches documents where the field, or one of its elements, is in `value`.
    ///
    /// `value` must be an array.
    pub fn any_of(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::AnyOf, value.into())
    }

    /// Matches documents where neither the field nor any of its elements is in `value`.
    pub fn none_of(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::NoneOf, value.into())
    }

    /// Matches the document with identity `id`.
    pub fn id(id: impl Into<Bson>) -> Expr {
        Self::eq(crate::document::ID_KEY, id)
    }
}

/// Fluent builder for [`Query`].
#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
    query: Query,
}

impl QueryBuilder {
    /// Creates a builder for a query matching every document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the filter expression, replacing any previous one.
    ///
    /// # Arguments
    ///
    /// * `filter` - The filter expression to apply
    pub fn filter(mut self, filter: Expr) -> Self {
        self.query.filter = Some(filter);
        self
    }

    /// Sets the maximum number of documents to return.
    ///
    /// # Arguments
    ///
    /// * `limit` - The maximum number of documents to return
    pub fn limit(mut self, limit: usize) -> Self {
        self.query.limit = Some(limit);
        self
    }

    /// Sets the number of documents to skip.
    ///
    /// # Arguments
    ///
    /// * `offset` - The number of documents to skip
    pub fn offset(mut self, offset: usize) -> Self {
        self.query.offset = Some(offset);
        self
    }

    /// Appends a sort key; earlier keys take precedence.
    ///
    /// # Arguments
    ///
    /// * `field` - The storage key or dotted path to sort by
    /// * `direction` - The sort direction
    pub fn sort(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.query.sort.push(Sort { field: field.into(), direction });
        self
    }

    /// Limits returned documents to the given storage keys plus `_id` and `_cls`.
    pub fn project<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.query.projection = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Builds and returns the final query.
    pub fn build(self) -> Query {
        self.query
    }
}

/// Translates filter expressions into a backend's native representation.
///
/// Implementors provide one method per expression shape; [`visit_expr`](QueryVisitor::visit_expr)
/// dispatches on the variant.
pub trait QueryVisitor {
    /// The backend's representation of a translated expression.
    type Output;
    /// The error raised for expressions the backend cannot express.
    type Error: Into<DocumentStoreError>;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error>;
    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error>;
    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error>;
    fn visit_exists(&mut self, field: &str, should_exist: bool) -> Result<Self::Output, Self::Error>;
    fn visit_field(&mut self, field: &str, op: &FieldOp, value: &Bson) -> Result<Self::Output, Self::Error>;

    /// Dispatches `expr` to the matching `visit_*` method.
    fn visit_expr(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        match expr {
            Expr::And(exprs) => self.visit_and(exprs),
            Expr::Or(exprs) => self.visit_or(exprs),
            Expr::Not(expr) => self.visit_not(expr),
            Expr::Exists(field, should_exist) => self.visit_exists(field, *should_exist),
            Expr::Field { field, op, value } => self.visit_field(field, op, value),
        }
    }
}

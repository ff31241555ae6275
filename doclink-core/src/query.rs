//! Predicate and query builder.
//!
//! Comparisons are applied to compiled [`FieldPath`]s and collected into a
//! boolean [`Predicate`] tree; the tree compiles to a canonical predicate
//! document keyed by storage-alias paths with store-native operator keys
//! (`$eq`, `$ne`, `$gt`, `$gte`, `$lt`, `$lte`, `$in`, `$regex`). A [`Query`]
//! bundles a predicate with ordered sort keys, skip, limit and projection.

use bson::{Bson, Document, doc};

use crate::{
    path::FieldPath,
    store::{FindSpec, RawRecord},
};

/// Store-native comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CmpOp {
    fn key(self) -> &'static str {
        match self {
            CmpOp::Eq => "$eq",
            CmpOp::Ne => "$ne",
            CmpOp::Gt => "$gt",
            CmpOp::Gte => "$gte",
            CmpOp::Lt => "$lt",
            CmpOp::Lte => "$lte",
        }
    }
}

/// A boolean predicate tree over compiled field paths.
#[derive(Debug, Clone)]
pub enum Predicate {
    /// `alias <op> value`.
    Cmp {
        /// Storage-alias dotted path.
        alias: String,
        /// Comparison operator.
        op: CmpOp,
        /// Literal operand.
        value: Bson,
    },
    /// Case-insensitive substring match; multiple terms OR together.
    Matches {
        /// Storage-alias dotted path.
        alias: String,
        /// Substring terms, escaped before compilation.
        terms: Vec<String>,
    },
    /// Membership in a literal set.
    In {
        /// Storage-alias dotted path.
        alias: String,
        /// Allowed values.
        values: Vec<Bson>,
    },
    /// All branches must hold.
    And(Vec<Predicate>),
    /// At least one branch must hold.
    Or(Vec<Predicate>),
    /// A raw predicate document merged in as-is, for operators the builder
    /// does not cover.
    Raw(Document),
}

impl Predicate {
    /// Conjunction of equality comparisons from `(path, value)` pairs.
    pub fn all<I, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (FieldPath, V)>,
        V: Into<Bson>,
    {
        Predicate::And(
            pairs
                .into_iter()
                .map(|(path, value)| path.eq(value))
                .collect(),
        )
    }

    /// Conjunction with another predicate.
    pub fn and(self, other: Predicate) -> Self {
        match self {
            Predicate::And(mut branches) => {
                branches.push(other);
                Predicate::And(branches)
            }
            p => Predicate::And(vec![p, other]),
        }
    }

    /// Disjunction with another predicate.
    pub fn or(self, other: Predicate) -> Self {
        match self {
            Predicate::Or(mut branches) => {
                branches.push(other);
                Predicate::Or(branches)
            }
            p => Predicate::Or(vec![p, other]),
        }
    }

    /// Compiles the tree to a canonical predicate document.
    ///
    /// Conjunction branches over distinct alias paths merge into one flat
    /// document; a key collision falls back to an explicit `$and` array.
    pub fn compile(&self) -> RawRecord {
        match self {
            Predicate::Cmp { alias, op, value } => {
                doc! { alias: { op.key(): value.clone() } }
            }
            Predicate::Matches { alias, terms } => {
                let pattern = terms
                    .iter()
                    .map(|t| escape_regex(t))
                    .collect::<Vec<_>>()
                    .join("|");
                doc! { alias: { "$regex": pattern, "$options": "i" } }
            }
            Predicate::In { alias, values } => {
                doc! { alias: { "$in": values.clone() } }
            }
            Predicate::And(branches) => {
                let compiled: Vec<Document> = branches.iter().map(Predicate::compile).collect();
                let distinct_keys = {
                    let mut keys: Vec<&str> =
                        compiled.iter().flat_map(|d| d.keys().map(String::as_str)).collect();
                    let before = keys.len();
                    keys.sort_unstable();
                    keys.dedup();
                    keys.len() == before
                };
                if distinct_keys {
                    let mut merged = Document::new();
                    for branch in compiled {
                        merged.extend(branch);
                    }
                    merged
                } else {
                    doc! { "$and": compiled }
                }
            }
            Predicate::Or(branches) => {
                let compiled: Vec<Document> = branches.iter().map(Predicate::compile).collect();
                doc! { "$or": compiled }
            }
            Predicate::Raw(document) => document.clone(),
        }
    }
}

fn escape_regex(term: &str) -> String {
    let mut out = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(
            c,
            '\\' | '.' | '^' | '$' | '|' | '?' | '*' | '+' | '(' | ')' | '[' | ']' | '{' | '}'
        ) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

impl FieldPath {
    /// `self == value`.
    pub fn eq(&self, value: impl Into<Bson>) -> Predicate {
        self.cmp(CmpOp::Eq, value)
    }

    /// `self != value`.
    pub fn ne(&self, value: impl Into<Bson>) -> Predicate {
        self.cmp(CmpOp::Ne, value)
    }

    /// `self > value`.
    pub fn gt(&self, value: impl Into<Bson>) -> Predicate {
        self.cmp(CmpOp::Gt, value)
    }

    /// `self >= value`.
    pub fn gte(&self, value: impl Into<Bson>) -> Predicate {
        self.cmp(CmpOp::Gte, value)
    }

    /// `self < value`.
    pub fn lt(&self, value: impl Into<Bson>) -> Predicate {
        self.cmp(CmpOp::Lt, value)
    }

    /// `self <= value`.
    pub fn lte(&self, value: impl Into<Bson>) -> Predicate {
        self.cmp(CmpOp::Lte, value)
    }

    /// Case-insensitive substring match.
    pub fn matches(&self, term: impl Into<String>) -> Predicate {
        Predicate::Matches { alias: self.alias().to_string(), terms: vec![term.into()] }
    }

    /// Case-insensitive substring match against any of the given terms.
    pub fn matches_any<I, S>(&self, terms: I) -> Predicate
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Predicate::Matches {
            alias: self.alias().to_string(),
            terms: terms.into_iter().map(Into::into).collect(),
        }
    }

    /// Membership in a literal set.
    pub fn is_in<I, V>(&self, values: I) -> Predicate
    where
        I: IntoIterator<Item = V>,
        V: Into<Bson>,
    {
        Predicate::In {
            alias: self.alias().to_string(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    fn cmp(&self, op: CmpOp, value: impl Into<Bson>) -> Predicate {
        Predicate::Cmp { alias: self.alias().to_string(), op, value: value.into() }
    }
}

/// Sort direction of one sort key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Ascending,
    Descending,
}

impl Order {
    fn as_i32(self) -> i32 {
        match self {
            Order::Ascending => 1,
            Order::Descending => -1,
        }
    }
}

/// A complete retrieval request: filter, ordered sort keys, skip, limit and
/// projection. Assembled fluently; compiled once when executed.
#[derive(Debug, Clone, Default)]
pub struct Query {
    filter: Option<Predicate>,
    sort: Vec<(String, Order)>,
    skip: Option<u64>,
    limit: Option<i64>,
    projection: Vec<String>,
}

impl Query {
    /// An empty query matching everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the filter predicate, conjoining with any previous one.
    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.filter = Some(match self.filter {
            Some(existing) => existing.and(predicate),
            None => predicate,
        });
        self
    }

    /// Appends a sort key; keys apply in call order.
    pub fn sort(mut self, path: &FieldPath, order: Order) -> Self {
        self.sort.push((path.alias().to_string(), order));
        self
    }

    /// Skips the first `n` matching records.
    pub fn skip(mut self, n: u64) -> Self {
        self.skip = Some(n);
        self
    }

    /// Caps the number of returned records.
    pub fn limit(mut self, n: i64) -> Self {
        self.limit = Some(n);
        self
    }

    /// Adds a field to the inclusion projection; fields apply in call order.
    pub fn project(mut self, path: &FieldPath) -> Self {
        self.projection.push(path.alias().to_string());
        self
    }

    /// Compiles to the predicate document and retrieval options the store
    /// consumes.
    pub fn compile(&self) -> (RawRecord, FindSpec) {
        let predicate = self
            .filter
            .as_ref()
            .map(Predicate::compile)
            .unwrap_or_default();
        let mut sort = Document::new();
        for (alias, order) in &self.sort {
            sort.insert(alias.clone(), order.as_i32());
        }
        let projection = if self.projection.is_empty() {
            None
        } else {
            let mut doc = Document::new();
            for alias in &self.projection {
                doc.insert(alias.clone(), 1i32);
            }
            Some(doc)
        };
        (predicate, FindSpec { sort, skip: self.skip, limit: self.limit, projection })
    }

    /// The predicate document alone, for count-style operations.
    pub fn compile_predicate(&self) -> RawRecord {
        self.filter
            .as_ref()
            .map(Predicate::compile)
            .unwrap_or_default()
    }
}

impl From<Predicate> for Query {
    fn from(predicate: Predicate) -> Self {
        Query::new().filter(predicate)
    }
}

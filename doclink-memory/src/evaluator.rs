//! Predicate evaluation for in-memory document filtering.
//!
//! Interprets the predicate documents the mapper core compiles: alias paths
//! (dotted, with array broadcasting) mapped to operator sub-documents, plus
//! `$and`/`$or` arrays. The `$regex` patterns the core emits are
//! escaped-literal alternations, so they are matched as case-insensitive
//! substrings rather than through a full regex engine.

use bson::{Bson, Document, datetime::DateTime};
use std::{cmp::Ordering, collections::HashMap};

use doclink_core::error::{DocLinkError, DocLinkResult};

/// Type-erased, comparable view of a BSON value.
///
/// Normalizes all numeric widths to f64 so that a stored `Int32` and a
/// queried `Int64` of the same value compare equal, matching the store this
/// evaluator stands in for.
#[derive(Debug)]
pub(crate) enum Comparable<'a> {
    Null,
    Bool(bool),
    Number(f64),
    DateTime(DateTime),
    String(&'a str),
    Array(Vec<Comparable<'a>>),
    Map(HashMap<&'a str, Comparable<'a>>),
    ObjectId(&'a bson::oid::ObjectId),
}

impl<'a> From<&'a Bson> for Comparable<'a> {
    fn from(bson: &'a Bson) -> Self {
        match bson {
            Bson::Null => Comparable::Null,
            Bson::Boolean(value) => Comparable::Bool(*value),
            Bson::Int32(value) => Comparable::Number(*value as f64),
            Bson::Int64(value) => Comparable::Number(*value as f64),
            Bson::Double(value) => Comparable::Number(*value),
            Bson::DateTime(value) => Comparable::DateTime(*value),
            Bson::String(value) => Comparable::String(value),
            Bson::ObjectId(value) => Comparable::ObjectId(value),
            Bson::Array(items) => {
                Comparable::Array(items.iter().map(Comparable::from).collect())
            }
            Bson::Document(doc) => Comparable::Map(
                doc.iter()
                    .map(|(k, v)| (k.as_str(), Comparable::from(v)))
                    .collect(),
            ),
            // Remaining types never appear in mapper-compiled predicates.
            _ => Comparable::Null,
        }
    }
}

impl PartialEq for Comparable<'_> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => true,
            (Comparable::Bool(a), Comparable::Bool(b)) => a == b,
            (Comparable::Number(a), Comparable::Number(b)) => a == b,
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a == b,
            (Comparable::String(a), Comparable::String(b)) => a == b,
            (Comparable::Array(a), Comparable::Array(b)) => a == b,
            (Comparable::Map(a), Comparable::Map(b)) => a == b,
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a == b,
            _ => false,
        }
    }
}

impl PartialOrd for Comparable<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Comparable::Bool(a), Comparable::Bool(b)) => a.partial_cmp(b),
            (Comparable::Number(a), Comparable::Number(b)) => a.partial_cmp(b),
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a.partial_cmp(b),
            (Comparable::String(a), Comparable::String(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

/// Resolves a dotted alias path inside a record, broadcasting over arrays
/// the way the document store does: a non-numeric segment applied to an
/// array fans out across its elements.
pub(crate) fn resolve_path<'a>(record: &'a Document, path: &str) -> Vec<&'a Bson> {
    let mut segments = path.split('.');
    let Some(first) = segments.next() else {
        return vec![];
    };
    let mut current: Vec<&Bson> = record.get(first).into_iter().collect();
    for segment in segments {
        let mut next = Vec::new();
        for candidate in current {
            match candidate {
                Bson::Document(doc) => {
                    if let Some(v) = doc.get(segment) {
                        next.push(v);
                    }
                }
                Bson::Array(items) => {
                    if let Ok(index) = segment.parse::<usize>() {
                        if let Some(v) = items.get(index) {
                            next.push(v);
                        }
                    } else {
                        for item in items {
                            if let Bson::Document(doc) = item {
                                if let Some(v) = doc.get(segment) {
                                    next.push(v);
                                }
                            }
                        }
                    }
                }
                _ => {}
            }
        }
        current = next;
    }
    current
}

/// Evaluates one compiled predicate document against one record.
pub(crate) fn matches(record: &Document, predicate: &Document) -> DocLinkResult<bool> {
    for (key, condition) in predicate {
        let holds = match key.as_str() {
            "$and" => branches(condition, key)?
                .iter()
                .try_fold(true, |acc, branch| {
                    Ok::<_, DocLinkError>(acc && matches(record, branch)?)
                })?,
            "$or" => branches(condition, key)?
                .iter()
                .try_fold(false, |acc, branch| {
                    Ok::<_, DocLinkError>(acc || matches(record, branch)?)
                })?,
            path => {
                let candidates = resolve_path(record, path);
                match condition {
                    Bson::Document(ops) if ops.keys().any(|k| k.starts_with('$')) => {
                        field_matches(&candidates, ops)?
                    }
                    literal => eq_matches(&candidates, literal),
                }
            }
        };
        if !holds {
            return Ok(false);
        }
    }
    Ok(true)
}

fn branches<'a>(condition: &'a Bson, key: &str) -> DocLinkResult<Vec<&'a Document>> {
    let Bson::Array(items) = condition else {
        return Err(DocLinkError::Store(format!("{key} expects an array of predicates")));
    };
    items
        .iter()
        .map(|item| match item {
            Bson::Document(doc) => Ok(doc),
            other => Err(DocLinkError::Store(format!(
                "{key} branch must be a predicate document, got {other}"
            ))),
        })
        .collect()
}

// Equality with contains semantics over arrays and map values, and null
// matching an absent field. Keyed-mapping link fields store `{key: id}`
// maps, so their values participate in equality the way array elements do.
fn eq_matches(candidates: &[&Bson], value: &Bson) -> bool {
    if candidates.is_empty() {
        return matches!(value, Bson::Null);
    }
    let target = Comparable::from(value);
    candidates.iter().any(|candidate| {
        if Comparable::from(*candidate) == target {
            return true;
        }
        match candidate {
            Bson::Array(items) => items.iter().any(|item| Comparable::from(item) == target),
            Bson::Document(map) => {
                map.values().any(|item| Comparable::from(item) == target)
            }
            _ => false,
        }
    })
}

fn field_matches(candidates: &[&Bson], ops: &Document) -> DocLinkResult<bool> {
    for (op, operand) in ops {
        if op == "$options" {
            // Consumed together with $regex.
            continue;
        }
        let holds = match op.as_str() {
            "$eq" => eq_matches(candidates, operand),
            "$ne" => !eq_matches(candidates, operand),
            "$gt" | "$gte" | "$lt" | "$lte" => {
                let target = Comparable::from(operand);
                candidates.iter().any(|candidate| {
                    match Comparable::from(*candidate).partial_cmp(&target) {
                        Some(ordering) => match op.as_str() {
                            "$gt" => ordering == Ordering::Greater,
                            "$gte" => ordering != Ordering::Less,
                            "$lt" => ordering == Ordering::Less,
                            _ => ordering != Ordering::Greater,
                        },
                        None => false,
                    }
                })
            }
            "$in" => {
                let Bson::Array(values) = operand else {
                    return Err(DocLinkError::Store("$in expects an array".to_string()));
                };
                values.iter().any(|value| eq_matches(candidates, value))
            }
            "$regex" => {
                let Bson::String(pattern) = operand else {
                    return Err(DocLinkError::Store("$regex expects a string".to_string()));
                };
                let case_insensitive = matches!(
                    ops.get("$options"),
                    Some(Bson::String(options)) if options.contains('i')
                );
                substring_matches(candidates, pattern, case_insensitive)
            }
            other => {
                return Err(DocLinkError::Store(format!(
                    "unsupported predicate operator {other}"
                )));
            }
        };
        if !holds {
            return Ok(false);
        }
    }
    Ok(true)
}

// Literal-alternation matching: the pattern is a '|'-joined list of escaped
// substrings, as produced by the predicate compiler.
fn substring_matches(candidates: &[&Bson], pattern: &str, case_insensitive: bool) -> bool {
    let terms: Vec<String> = split_alternation(pattern)
        .into_iter()
        .map(|term| {
            if case_insensitive {
                term.to_lowercase()
            } else {
                term
            }
        })
        .collect();
    candidates.iter().any(|candidate| {
        let haystacks: Vec<&str> = match candidate {
            Bson::String(s) => vec![s.as_str()],
            Bson::Array(items) => items
                .iter()
                .filter_map(|item| item.as_str())
                .collect(),
            _ => vec![],
        };
        haystacks.iter().any(|haystack| {
            let haystack = if case_insensitive {
                haystack.to_lowercase()
            } else {
                haystack.to_string()
            };
            terms.iter().any(|term| haystack.contains(term.as_str()))
        })
    })
}

// Splits on unescaped '|' and strips the escaping backslashes.
fn split_alternation(pattern: &str) -> Vec<String> {
    let mut terms = Vec::new();
    let mut term = String::new();
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(escaped) = chars.next() {
                    term.push(escaped);
                }
            }
            '|' => terms.push(std::mem::take(&mut term)),
            other => term.push(other),
        }
    }
    terms.push(term);
    terms
}

/// Multi-key comparison for sorting, honoring the order of keys in the sort
/// document.
pub(crate) fn compare_records(a: &Document, b: &Document, sort: &Document) -> Ordering {
    for (path, direction) in sort {
        let left = resolve_path(a, path)
            .first()
            .map(|v| Comparable::from(*v))
            .unwrap_or(Comparable::Null);
        let right = resolve_path(b, path)
            .first()
            .map(|v| Comparable::from(*v))
            .unwrap_or(Comparable::Null);
        let mut ordering = left.partial_cmp(&right).unwrap_or(Ordering::Equal);
        let descending = matches!(direction, Bson::Int32(d) if *d < 0)
            || matches!(direction, Bson::Int64(d) if *d < 0);
        if descending {
            ordering = ordering.reverse();
        }
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn matches_operator_documents() {
        let record = doc! { "name": "bar1", "rank": 3 };
        assert!(matches(&record, &doc! { "name": { "$eq": "bar1" } }).unwrap());
        assert!(!matches(&record, &doc! { "name": { "$ne": "bar1" } }).unwrap());
        assert!(matches(&record, &doc! { "rank": { "$gte": 3 } }).unwrap());
        assert!(!matches(&record, &doc! { "rank": { "$lt": 3 } }).unwrap());
        assert!(matches(&record, &doc! { "rank": { "$in": [1, 3] } }).unwrap());
    }

    #[test]
    fn numeric_widths_compare_equal() {
        let record = doc! { "id": 1i64 };
        assert!(matches(&record, &doc! { "id": { "$eq": 1i32 } }).unwrap());
    }

    #[test]
    fn equality_broadcasts_over_arrays() {
        let record = doc! { "foos_id": [2i64, 3i64] };
        assert!(matches(&record, &doc! { "foos_id": { "$in": [3i64] } }).unwrap());
        assert!(matches(&record, &doc! { "foos_id": { "$eq": 2i64 } }).unwrap());
        assert!(!matches(&record, &doc! { "foos_id": { "$in": [9i64] } }).unwrap());
    }

    #[test]
    fn equality_broadcasts_over_map_values() {
        let record = doc! { "foos_d_id": { "one": 4i64, "two": 5i64 } };
        assert!(matches(&record, &doc! { "foos_d_id": { "$in": [4i64] } }).unwrap());
        assert!(matches(&record, &doc! { "foos_d_id": { "$eq": 5i64 } }).unwrap());
        assert!(!matches(&record, &doc! { "foos_d_id": { "$in": [9i64] } }).unwrap());
    }

    #[test]
    fn dotted_paths_descend_and_broadcast() {
        let record = doc! { "items": [ { "sku": "a" }, { "sku": "b" } ] };
        assert!(matches(&record, &doc! { "items.sku": { "$eq": "b" } }).unwrap());
        assert!(matches(&record, &doc! { "items.0.sku": { "$eq": "a" } }).unwrap());
        assert!(!matches(&record, &doc! { "items.1.sku": { "$eq": "a" } }).unwrap());
    }

    #[test]
    fn null_equality_matches_missing_fields() {
        let record = doc! { "name": "bar1" };
        assert!(matches(&record, &doc! { "gone": { "$eq": null } }).unwrap());
        assert!(!matches(&record, &doc! { "name": { "$eq": null } }).unwrap());
    }

    #[test]
    fn regex_is_substring_with_alternation() {
        let record = doc! { "name": "Bar1" };
        assert!(
            matches(&record, &doc! { "name": { "$regex": "ar1", "$options": "i" } }).unwrap()
        );
        assert!(
            matches(&record, &doc! { "name": { "$regex": "zzz|bAr", "$options": "i" } })
                .unwrap()
        );
        assert!(!matches(&record, &doc! { "name": { "$regex": "bar" } }).unwrap());
    }

    #[test]
    fn boolean_branches_combine() {
        let record = doc! { "name": "bar1", "rank": 3 };
        let and = doc! { "$and": [ { "rank": { "$gt": 2 } }, { "rank": { "$lt": 9 } } ] };
        assert!(matches(&record, &and).unwrap());
        let or = doc! { "$or": [ { "name": { "$eq": "nope" } }, { "rank": { "$eq": 3 } } ] };
        assert!(matches(&record, &or).unwrap());
    }

    #[test]
    fn sorts_by_multiple_keys_in_order() {
        let a = doc! { "rank": 1, "name": "b" };
        let b = doc! { "rank": 1, "name": "a" };
        let sort = doc! { "rank": 1, "name": 1 };
        assert_eq!(compare_records(&a, &b, &sort), Ordering::Greater);
        let sort = doc! { "rank": -1 };
        assert_eq!(compare_records(&a, &b, &sort), Ordering::Equal);
    }
}

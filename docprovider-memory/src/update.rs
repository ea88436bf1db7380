//! Application of update documents to in-memory documents.
//!
//! An update is either a replacement document (no `$` keys) or a set of operator clauses:
//! `$set $unset $inc $mul $min $max $push $addToSet $pull $rename`. The `_id` of an existing
//! document is immutable.

use std::cmp::Ordering;

use bson::{Bson, Document};

use docprovider_core::{
    document::describe,
    error::{ProviderError, ProviderResult},
};

use crate::{
    matcher, path,
    value::{self, as_f64},
};

/// Applies `update` to `document`. On error the document is left untouched.
pub(crate) fn apply(document: &mut Document, update: &Document) -> ProviderResult<()> {
    let mut updated = document.clone();

    if is_operator_update(update)? {
        for (operator, fields) in update {
            let Bson::Document(fields) = fields else {
                return Err(failed(format!(
                    "Modifiers operate on fields but {operator} was given a non-document"
                )));
            };

            for (field, operand) in fields {
                apply_operator(&mut updated, operator, field, operand)?;
            }
        }
    } else {
        replace(&mut updated, update);
    }

    if let Some(id) = document.get("_id") {
        if updated.get("_id") != Some(id) {
            return Err(failed(
                "Performing an update on the path '_id' would modify the immutable field '_id'"
                    .to_string(),
            ));
        }
    }

    *document = updated;
    Ok(())
}

/// Builds the base document of an upsert from the equality clauses of `conditions`.
pub(crate) fn seed(conditions: &Document) -> ProviderResult<Document> {
    let mut document = Document::new();
    collect_equalities(conditions, &mut document)?;
    Ok(document)
}

fn collect_equalities(conditions: &Document, into: &mut Document) -> ProviderResult<()> {
    for (key, condition) in conditions {
        if key == "$and" {
            if let Bson::Array(clauses) = condition {
                for clause in clauses.iter().filter_map(Bson::as_document) {
                    collect_equalities(clause, into)?;
                }
            }
            continue;
        }
        if key.starts_with('$') {
            continue;
        }

        match condition {
            Bson::Document(operators) if operators.keys().any(|op| op.starts_with('$')) => {
                if let Some(expected) = operators.get("$eq") {
                    path::set(into, key, expected.clone())?;
                }
            }
            expected => path::set(into, key, expected.clone())?,
        }
    }

    Ok(())
}

fn is_operator_update(update: &Document) -> ProviderResult<bool> {
    let operators = update.keys().filter(|key| key.starts_with('$')).count();

    match operators {
        0 => Ok(false),
        count if count == update.len() => Ok(true),
        _ => Err(failed(format!(
            "update {} mixes operators and replacement fields",
            describe(update)
        ))),
    }
}

fn replace(document: &mut Document, replacement: &Document) {
    let mut replaced = Document::new();

    if let Some(id) = replacement.get("_id").or_else(|| document.get("_id")) {
        replaced.insert("_id", id.clone());
    }
    for (key, value) in replacement {
        if key != "_id" {
            replaced.insert(key.clone(), value.clone());
        }
    }

    *document = replaced;
}

fn apply_operator(
    document: &mut Document,
    operator: &str,
    field: &str,
    operand: &Bson,
) -> ProviderResult<()> {
    match operator {
        "$set" => path::set(document, field, operand.clone()),
        "$unset" => {
            path::remove(document, field);
            Ok(())
        }
        "$inc" => arithmetic(document, field, operand, Arithmetic::Add),
        "$mul" => arithmetic(document, field, operand, Arithmetic::Multiply),
        "$min" | "$max" => {
            let wanted = if operator == "$min" { Ordering::Less } else { Ordering::Greater };
            let replace = match path::get(document, field) {
                None => true,
                Some(current) => value::compare(operand, current) == Some(wanted),
            };

            if replace {
                path::set(document, field, operand.clone())?;
            }
            Ok(())
        }
        "$push" => push(document, field, operand, false),
        "$addToSet" => push(document, field, operand, true),
        "$pull" => pull(document, field, operand),
        "$rename" => {
            let Bson::String(target) = operand else {
                return Err(failed(format!("$rename target for {field} must be a string")));
            };

            if let Some(value) = path::remove(document, field) {
                path::set(document, target, value)?;
            }
            Ok(())
        }
        other => Err(failed(format!("Unknown modifier: {other}"))),
    }
}

#[derive(Debug, Clone, Copy)]
enum Arithmetic {
    Add,
    Multiply,
}

impl Arithmetic {
    fn integer(self, left: i64, right: i64) -> Option<i64> {
        match self {
            Arithmetic::Add => left.checked_add(right),
            Arithmetic::Multiply => left.checked_mul(right),
        }
    }

    fn float(self, left: f64, right: f64) -> f64 {
        match self {
            Arithmetic::Add => left + right,
            Arithmetic::Multiply => left * right,
        }
    }
}

fn arithmetic(
    document: &mut Document,
    field: &str,
    operand: &Bson,
    arithmetic: Arithmetic,
) -> ProviderResult<()> {
    let zero = match operand {
        Bson::Int32(_) => Bson::Int32(0),
        Bson::Int64(_) => Bson::Int64(0),
        Bson::Double(_) => Bson::Double(0.0),
        _ => return Err(failed(format!("Cannot increment with non-numeric argument: {field}"))),
    };
    let current = match (path::get(document, field), arithmetic) {
        (Some(current), _) => current.clone(),
        (None, Arithmetic::Add) => zero,
        (None, Arithmetic::Multiply) => return path::set(document, field, zero),
    };

    let result = match (&current, operand) {
        (Bson::Int32(left), Bson::Int32(right)) => {
            let value = arithmetic
                .integer(i64::from(*left), i64::from(*right))
                .ok_or_else(|| overflow(field))?;
            i32::try_from(value).map_or(Bson::Int64(value), Bson::Int32)
        }
        (Bson::Int32(_) | Bson::Int64(_), Bson::Int32(_) | Bson::Int64(_)) => {
            let (Some(left), Some(right)) = (value::as_i64(&current), value::as_i64(operand)) else {
                return Err(overflow(field));
            };
            Bson::Int64(arithmetic.integer(left, right).ok_or_else(|| overflow(field))?)
        }
        _ => match (as_f64(&current), as_f64(operand)) {
            (Some(left), Some(right)) => Bson::Double(arithmetic.float(left, right)),
            _ => {
                return Err(failed(format!(
                    "Cannot apply arithmetic to non-numeric field {field}"
                )));
            }
        },
    };

    path::set(document, field, result)
}

fn push(document: &mut Document, field: &str, operand: &Bson, unique: bool) -> ProviderResult<()> {
    let values = match operand {
        Bson::Document(modifiers) if modifiers.contains_key("$each") => match modifiers.get("$each") {
            Some(Bson::Array(values)) => values.clone(),
            _ => return Err(failed("$each needs an array".to_string())),
        },
        single => vec![single.clone()],
    };

    let mut items = match path::get(document, field) {
        None => Vec::new(),
        Some(Bson::Array(items)) => items.clone(),
        Some(_) => {
            return Err(failed(format!(
                "The field '{field}' must be an array but is of another type"
            )));
        }
    };

    for value in values {
        if unique && items.iter().any(|item| value::equals(item, &value)) {
            continue;
        }
        items.push(value);
    }

    path::set(document, field, Bson::Array(items))
}

fn pull(document: &mut Document, field: &str, condition: &Bson) -> ProviderResult<()> {
    let items = match path::get(document, field) {
        None => return Ok(()),
        Some(Bson::Array(items)) => items,
        Some(_) => return Err(failed(format!("Cannot apply $pull to a non-array value: {field}"))),
    };

    let mut kept = Vec::with_capacity(items.len());
    for item in items {
        if !matcher::element_matches(item, condition)? {
            kept.push(item.clone());
        }
    }

    path::set(document, field, Bson::Array(kept))
}

fn overflow(field: &str) -> ProviderError {
    failed(format!("integer overflow applying arithmetic to {field}"))
}

fn failed(message: String) -> ProviderError {
    ProviderError::Backend(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn updated(mut document: Document, update: Document) -> Document {
        apply(&mut document, &update).unwrap();
        document
    }

    #[test]
    fn field_operators() {
        let document = doc! { "_id": 1, "name": "a", "n": 1, "old": true, "score": 5 };

        assert_eq!(
            updated(
                document,
                doc! {
                    "$set": { "name": "b", "meta.by": "x" },
                    "$inc": { "n": 2, "visits": 1 },
                    "$unset": { "old": "" },
                    "$max": { "score": 3 },
                    "$min": { "score": 2 },
                    "$rename": { "name": "title" },
                }
            ),
            doc! { "_id": 1, "n": 3, "score": 2, "meta": { "by": "x" }, "visits": 1, "title": "b" }
        );
    }

    #[test]
    fn multiplication_widens_on_overflow() {
        let document = doc! { "n": i32::MAX, "ratio": 1.5 };

        assert_eq!(
            updated(document, doc! { "$mul": { "n": 2, "ratio": 2, "fresh": 3 } }),
            doc! { "n": i64::from(i32::MAX) * 2, "ratio": 3.0, "fresh": 0 }
        );
    }

    #[test]
    fn array_operators() {
        let document = doc! { "tags": ["a"], "scores": [1, 5, 9] };

        assert_eq!(
            updated(
                document,
                doc! {
                    "$push": { "tags": { "$each": ["b", "c"] } },
                    "$addToSet": { "tags": "a", "roles": "admin" },
                    "$pull": { "scores": { "$gte": 5 } },
                }
            ),
            doc! { "tags": ["a", "b", "c"], "scores": [1], "roles": ["admin"] }
        );
    }

    #[test]
    fn replacement_keeps_the_id() {
        let document = doc! { "_id": 7, "name": "a", "n": 1 };

        assert_eq!(updated(document, doc! { "name": "b" }), doc! { "_id": 7, "name": "b" });
    }

    #[test]
    fn id_is_immutable() {
        let mut document = doc! { "_id": 7, "name": "a" };

        assert!(apply(&mut document, &doc! { "$set": { "_id": 8 } }).is_err());
        assert!(apply(&mut document, &doc! { "_id": 8, "name": "b" }).is_err());
    }

    #[test]
    fn invalid_updates_are_rejected() {
        let mut document = doc! { "name": "a" };

        assert!(apply(&mut document, &doc! { "$set": { "x": 1 }, "y": 2 }).is_err());
        assert!(apply(&mut document, &doc! { "$inc": { "name": 1 } }).is_err());
        assert!(apply(&mut document, &doc! { "$push": { "name": 1 } }).is_err());
        assert!(apply(&mut document, &doc! { "$bogus": { "name": 1 } }).is_err());
    }

    #[test]
    fn upsert_seed_takes_equalities() {
        let conditions = doc! {
            "name": "a",
            "age": { "$gt": 3 },
            "kind": { "$eq": "user" },
            "$and": [{ "address.city": "Oslo" }],
        };

        assert_eq!(
            seed(&conditions).unwrap(),
            doc! { "name": "a", "kind": "user", "address": { "city": "Oslo" } }
        );
    }
}

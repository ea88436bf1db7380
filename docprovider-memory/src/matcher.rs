//! Evaluation of MongoDB-style query conditions against in-memory documents.
//!
//! Supported: implicit equality, `$eq $ne $gt $gte $lt $lte $in $nin $exists $not $size $all
//! $elemMatch` on fields (dotted paths included) and `$and $or $nor` at the top level.
//! Equality against an array field also matches when any element equals the operand, and a
//! missing field equals `null`.

use std::cmp::Ordering;

use bson::{Bson, Document};

use docprovider_core::error::{ProviderError, ProviderResult};

use crate::{
    path,
    value::{self, as_i64, truthy},
};

/// Whether `document` satisfies every clause of `conditions`.
pub(crate) fn matches(document: &Document, conditions: &Document) -> ProviderResult<bool> {
    for (key, condition) in conditions {
        let matched = match key.as_str() {
            "$and" => {
                let mut all = true;
                for clause in clauses(key, condition)? {
                    if !matches(document, clause)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" => any_clause(document, key, condition)?,
            "$nor" => !any_clause(document, key, condition)?,
            operator if operator.starts_with('$') => {
                return Err(unsupported("top-level operator", operator));
            }
            field => field_matches(&path::resolve(document, field), condition)?,
        };

        if !matched {
            return Ok(false);
        }
    }

    Ok(true)
}

/// Whether a single array element satisfies `condition`, as used by `$elemMatch` and `$pull`.
///
/// An operator document applies to the element itself, a plain document is a query on an
/// element that is itself a document, anything else is compared for equality.
pub(crate) fn element_matches(element: &Bson, condition: &Bson) -> ProviderResult<bool> {
    match condition {
        Bson::Document(operators) if is_operator_document(operators) => {
            operators_match(&[element], operators)
        }
        Bson::Document(query) => match element {
            Bson::Document(inner) => matches(inner, query),
            _ => Ok(false),
        },
        expected => Ok(value::equals(element, expected)),
    }
}

fn is_operator_document(document: &Document) -> bool {
    document
        .keys()
        .next()
        .is_some_and(|key| key.starts_with('$'))
}

fn clauses<'a>(operator: &str, condition: &'a Bson) -> ProviderResult<Vec<&'a Document>> {
    let invalid = || ProviderError::Backend(format!("{operator} must be an array of documents"));

    match condition {
        Bson::Array(items) if !items.is_empty() => items
            .iter()
            .map(|item| item.as_document().ok_or_else(invalid))
            .collect(),
        _ => Err(invalid()),
    }
}

fn any_clause(document: &Document, operator: &str, condition: &Bson) -> ProviderResult<bool> {
    for clause in clauses(operator, condition)? {
        if matches(document, clause)? {
            return Ok(true);
        }
    }

    Ok(false)
}

fn field_matches(values: &[&Bson], condition: &Bson) -> ProviderResult<bool> {
    match condition {
        Bson::Document(operators) if is_operator_document(operators) => {
            operators_match(values, operators)
        }
        expected => Ok(equals_any(values, expected)),
    }
}

fn operators_match(values: &[&Bson], operators: &Document) -> ProviderResult<bool> {
    for (operator, operand) in operators {
        if !operator_matches(values, operator, operand)? {
            return Ok(false);
        }
    }

    Ok(true)
}

fn operator_matches(values: &[&Bson], operator: &str, operand: &Bson) -> ProviderResult<bool> {
    match operator {
        "$eq" => Ok(equals_any(values, operand)),
        "$ne" => Ok(!equals_any(values, operand)),
        "$gt" => Ok(compares(values, operand, |ordering| ordering == Ordering::Greater)),
        "$gte" => Ok(compares(values, operand, |ordering| ordering != Ordering::Less)),
        "$lt" => Ok(compares(values, operand, |ordering| ordering == Ordering::Less)),
        "$lte" => Ok(compares(values, operand, |ordering| ordering != Ordering::Greater)),
        "$in" => Ok(array_operand(operator, operand)?
            .iter()
            .any(|candidate| equals_any(values, candidate))),
        "$nin" => Ok(!array_operand(operator, operand)?
            .iter()
            .any(|candidate| equals_any(values, candidate))),
        "$all" => Ok(array_operand(operator, operand)?
            .iter()
            .all(|candidate| equals_any(values, candidate))),
        "$exists" => Ok(!values.is_empty() == truthy(operand)),
        "$size" => {
            let size = as_i64(operand)
                .ok_or_else(|| ProviderError::Backend("$size needs a number".to_string()))?;
            Ok(values.iter().any(|value| match value {
                Bson::Array(items) => items.len() as i64 == size,
                _ => false,
            }))
        }
        "$not" => match operand {
            Bson::Document(inner) => Ok(!operators_match(values, inner)?),
            _ => Err(ProviderError::Backend("$not needs a document".to_string())),
        },
        "$elemMatch" => {
            for value in values {
                if let Bson::Array(items) = value {
                    for item in items {
                        if element_matches(item, operand)? {
                            return Ok(true);
                        }
                    }
                }
            }
            Ok(false)
        }
        other => Err(unsupported("query operator", other)),
    }
}

/// Equality with array membership, where a missing field equals `null`.
fn equals_any(values: &[&Bson], expected: &Bson) -> bool {
    if values.is_empty() {
        return matches!(expected, Bson::Null);
    }

    values.iter().any(|value| {
        value::equals(value, expected)
            || matches!(value, Bson::Array(items) if items.iter().any(|item| value::equals(item, expected)))
    })
}

fn compares(values: &[&Bson], operand: &Bson, accept: impl Fn(Ordering) -> bool) -> bool {
    let accepts = |value: &Bson| value::compare(value, operand).is_some_and(&accept);

    values.iter().any(|value| match value {
        Bson::Array(items) => items.iter().any(|item| accepts(item)),
        other => accepts(*other),
    })
}

fn array_operand<'a>(operator: &str, operand: &'a Bson) -> ProviderResult<&'a [Bson]> {
    match operand {
        Bson::Array(items) => Ok(items),
        _ => Err(ProviderError::Backend(format!("{operator} needs an array"))),
    }
}

fn unsupported(kind: &str, operator: &str) -> ProviderError {
    ProviderError::Backend(format!("unknown {kind}: {operator}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn user() -> Document {
        doc! {
            "name": "a",
            "age": 30,
            "tags": ["admin", "ops"],
            "address": { "city": "Oslo" },
            "logins": [{ "at": 1, "ok": true }, { "at": 2, "ok": false }],
        }
    }

    fn check(conditions: Document) -> bool {
        matches(&user(), &conditions).unwrap()
    }

    #[test]
    fn implicit_equality_and_paths() {
        assert!(check(doc! {}));
        assert!(check(doc! { "name": "a", "address.city": "Oslo" }));
        assert!(check(doc! { "tags": "ops" }));
        assert!(check(doc! { "age": 30.0 }));
        assert!(check(doc! { "missing": Bson::Null }));
        assert!(!check(doc! { "name": "b" }));
    }

    #[test]
    fn comparison_operators() {
        assert!(check(doc! { "age": { "$gt": 18, "$lte": 30 } }));
        assert!(!check(doc! { "age": { "$lt": 30 } }));
        assert!(check(doc! { "age": { "$ne": 31 } }));
        assert!(check(doc! { "name": { "$in": ["x", "a"] } }));
        assert!(check(doc! { "tags": { "$nin": ["root"] } }));
        assert!(check(doc! { "logins.at": { "$gte": 2 } }));
        assert!(!check(doc! { "name": { "$gt": 5 } }));
    }

    #[test]
    fn element_and_array_operators() {
        assert!(check(doc! { "tags": { "$all": ["ops", "admin"], "$size": 2 } }));
        assert!(check(doc! { "logins": { "$elemMatch": { "at": 2, "ok": false } } }));
        assert!(!check(doc! { "logins": { "$elemMatch": { "at": 1, "ok": false } } }));
        assert!(check(doc! { "age": { "$exists": true }, "email": { "$exists": false } }));
        assert!(check(doc! { "age": { "$not": { "$gt": 40 } } }));
    }

    #[test]
    fn logical_operators() {
        assert!(check(doc! { "$or": [{ "name": "b" }, { "age": 30 }] }));
        assert!(check(doc! { "$and": [{ "name": "a" }, { "tags": "admin" }] }));
        assert!(!check(doc! { "$nor": [{ "name": "a" }] }));
    }

    #[test]
    fn unknown_operators_are_rejected() {
        assert!(matches(&user(), &doc! { "name": { "$regex": "a" } }).is_err());
        assert!(matches(&user(), &doc! { "$where": "true" }).is_err());
        assert!(matches(&user(), &doc! { "$or": [] }).is_err());
    }
}

//! Projections and aggregation pipelines over in-memory documents.
//!
//! Supported stages: `$match`, `$project`, `$unset`, `$sort`, `$skip`, `$limit` and `$count`.

use bson::{Bson, Document};

use docprovider_core::error::{ProviderError, ProviderResult};

use crate::{
    matcher, path,
    value::{self, as_i64, truthy},
};

/// Applies an inclusion or exclusion projection. `_id` is kept unless excluded explicitly.
pub(crate) fn project(document: &Document, projection: &Document) -> ProviderResult<Document> {
    let include_id = projection.get("_id").is_none_or(truthy);
    let fields = projection
        .iter()
        .filter(|(field, _)| field.as_str() != "_id")
        .map(|(field, flag)| (field.as_str(), truthy(flag)))
        .collect::<Vec<_>>();

    let inclusive = match fields.first() {
        Some((_, inclusive)) => *inclusive,
        None => false,
    };
    if let Some((field, _)) = fields.iter().find(|(_, flag)| *flag != inclusive) {
        return Err(ProviderError::Backend(format!(
            "Cannot mix inclusion and exclusion in a projection: {field}"
        )));
    }

    if inclusive {
        let mut projected = Document::new();

        if include_id {
            if let Some(id) = document.get("_id") {
                projected.insert("_id", id.clone());
            }
        }
        for (field, _) in fields {
            if let Some(value) = path::get(document, field) {
                path::set(&mut projected, field, value.clone())?;
            }
        }

        return Ok(projected);
    }

    let mut projected = document.clone();
    for (field, _) in fields {
        path::remove(&mut projected, field);
    }
    if !include_id {
        projected.remove("_id");
    }

    Ok(projected)
}

/// Runs `pipeline` over `documents`, one stage after the other.
pub(crate) fn run(documents: Vec<Document>, pipeline: &[Document]) -> ProviderResult<Vec<Document>> {
    pipeline
        .iter()
        .try_fold(documents, |documents, stage| apply_stage(documents, stage))
}

fn apply_stage(documents: Vec<Document>, stage: &Document) -> ProviderResult<Vec<Document>> {
    let mut entries = stage.iter();
    let (Some((name, spec)), None) = (entries.next(), entries.next()) else {
        return Err(ProviderError::Backend(
            "A pipeline stage specification object must contain exactly one field".to_string(),
        ));
    };

    match name.as_str() {
        "$match" => {
            let conditions = stage_document(name, spec)?;
            let mut matched = Vec::with_capacity(documents.len());

            for document in documents {
                if matcher::matches(&document, conditions)? {
                    matched.push(document);
                }
            }
            Ok(matched)
        }
        "$project" => {
            let projection = stage_document(name, spec)?;
            documents
                .iter()
                .map(|document| project(document, projection))
                .collect()
        }
        "$unset" => {
            let fields = match spec {
                Bson::String(field) => vec![field.as_str()],
                Bson::Array(fields) => fields.iter().filter_map(Bson::as_str).collect(),
                _ => return Err(invalid(name, "a field name or an array of field names")),
            };

            Ok(documents
                .into_iter()
                .map(|mut document| {
                    for field in &fields {
                        path::remove(&mut document, field);
                    }
                    document
                })
                .collect())
        }
        "$sort" => {
            let keys = stage_document(name, spec)?
                .iter()
                .map(|(field, direction)| match as_i64(direction) {
                    Some(1) => Ok((field.as_str(), false)),
                    Some(-1) => Ok((field.as_str(), true)),
                    _ => Err(invalid(name, "1 or -1 per field")),
                })
                .collect::<ProviderResult<Vec<_>>>()?;

            let mut sorted = documents;
            sorted.sort_by(|left, right| {
                keys.iter()
                    .map(|(field, descending)| {
                        let ordering =
                            value::sort_order(path::get(left, field), path::get(right, field));
                        if *descending { ordering.reverse() } else { ordering }
                    })
                    .find(|ordering| ordering.is_ne())
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            Ok(sorted)
        }
        "$skip" => Ok(documents.into_iter().skip(stage_count(name, spec)?).collect()),
        "$limit" => Ok(documents.into_iter().take(stage_count(name, spec)?).collect()),
        "$count" => {
            let Bson::String(field) = spec else {
                return Err(invalid(name, "a field name"));
            };
            if documents.is_empty() {
                return Ok(Vec::new());
            }

            let mut counted = Document::new();
            counted.insert(field.clone(), count_value(documents.len()));
            Ok(vec![counted])
        }
        other => Err(ProviderError::Backend(format!(
            "Unrecognized pipeline stage name: '{other}'"
        ))),
    }
}

/// Counts stay 32-bit while they fit, like the server's `$count`.
fn count_value(count: usize) -> Bson {
    i32::try_from(count).map_or_else(
        |_| Bson::Int64(i64::try_from(count).unwrap_or(i64::MAX)),
        Bson::Int32,
    )
}

fn stage_document<'a>(name: &str, spec: &'a Bson) -> ProviderResult<&'a Document> {
    spec.as_document().ok_or_else(|| invalid(name, "a document"))
}

fn stage_count(name: &str, spec: &Bson) -> ProviderResult<usize> {
    as_i64(spec)
        .and_then(|count| usize::try_from(count).ok())
        .ok_or_else(|| invalid(name, "a non-negative integer"))
}

fn invalid(stage: &str, expected: &str) -> ProviderError {
    ProviderError::Backend(format!("the {stage} stage expects {expected}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn people() -> Vec<Document> {
        vec![
            doc! { "_id": 1, "name": "c", "age": 40, "team": { "id": 1, "lead": true } },
            doc! { "_id": 2, "name": "a", "age": 20, "team": { "id": 2, "lead": false } },
            doc! { "_id": 3, "name": "b", "age": 30, "team": { "id": 1, "lead": false } },
        ]
    }

    #[test]
    fn inclusion_projection_keeps_id_by_default() {
        let projected = project(&people()[0], &doc! { "name": 1, "team.id": 1 }).unwrap();

        assert_eq!(projected, doc! { "_id": 1, "name": "c", "team": { "id": 1 } });
    }

    #[test]
    fn exclusion_projection() {
        let projected = project(&people()[0], &doc! { "_id": 0, "team": 0 }).unwrap();

        assert_eq!(projected, doc! { "name": "c", "age": 40 });
    }

    #[test]
    fn mixed_projection_is_rejected() {
        assert!(project(&people()[0], &doc! { "name": 1, "age": 0 }).is_err());
    }

    #[test]
    fn stages_run_in_order() {
        let result = run(
            people(),
            &[
                doc! { "$match": { "team.id": 1 } },
                doc! { "$sort": { "age": -1 } },
                doc! { "$skip": 1 },
                doc! { "$project": { "name": 1, "_id": 0 } },
            ],
        )
        .unwrap();

        assert_eq!(result, vec![doc! { "name": "b" }]);
    }

    #[test]
    fn sort_limit_and_unset() {
        let result = run(
            people(),
            &[
                doc! { "$sort": { "name": 1 } },
                doc! { "$limit": 2 },
                doc! { "$unset": ["team", "age"] },
            ],
        )
        .unwrap();

        assert_eq!(result, vec![doc! { "_id": 2, "name": "a" }, doc! { "_id": 3, "name": "b" }]);
    }

    #[test]
    fn count_stage() {
        assert_eq!(
            run(people(), &[doc! { "$match": { "age": { "$gte": 30 } } }, doc! { "$count": "n" }])
                .unwrap(),
            vec![doc! { "n": 2 }]
        );
        assert!(run(vec![], &[doc! { "$count": "n" }]).unwrap().is_empty());
    }

    #[test]
    fn large_counts_widen_to_64_bits() {
        assert_eq!(count_value(7), Bson::Int32(7));
        assert_eq!(count_value(i32::MAX as usize), Bson::Int32(i32::MAX));
        assert_eq!(count_value(i32::MAX as usize + 1), Bson::Int64(i64::from(i32::MAX) + 1));
    }

    #[test]
    fn unknown_stage_is_rejected() {
        assert!(run(people(), &[doc! { "$group": { "_id": "$team" } }]).is_err());
        assert!(run(people(), &[doc! { "$skip": 1, "$limit": 1 }]).is_err());
    }
}

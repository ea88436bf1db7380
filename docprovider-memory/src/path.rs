//! Dotted field paths (`address.city`, `tags.0`) over BSON documents.

use bson::{Bson, Document};

use docprovider_core::error::{ProviderError, ProviderResult};

/// Most nulls a positional write may append to reach its index.
const MAX_ARRAY_PADDING: usize = 1500;

/// Resolves `path` for matching: arrays of sub-documents fan out, so `items.sku` yields the
/// `sku` of every element of `items`. Numeric segments index into arrays.
pub(crate) fn resolve<'a>(document: &'a Document, path: &str) -> Vec<&'a Bson> {
    let mut segments = path.split('.');
    let mut current = match segments.next().and_then(|head| document.get(head)) {
        Some(value) => vec![value],
        None => return Vec::new(),
    };

    for segment in segments {
        let mut next = Vec::new();

        for value in current {
            match value {
                Bson::Document(inner) => next.extend(inner.get(segment)),
                Bson::Array(items) => match segment.parse::<usize>() {
                    Ok(index) => next.extend(items.get(index)),
                    Err(_) => next.extend(
                        items
                            .iter()
                            .filter_map(Bson::as_document)
                            .filter_map(|inner| inner.get(segment)),
                    ),
                },
                _ => {}
            }
        }

        current = next;
    }

    current
}

/// Returns the single value at `path`, without array fan-out.
pub(crate) fn get<'a>(document: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut segments = path.split('.');
    let mut current = document.get(segments.next()?)?;

    for segment in segments {
        current = match current {
            Bson::Document(inner) => inner.get(segment)?,
            Bson::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}

/// Writes `value` at `path`, creating intermediate documents as needed.
pub(crate) fn set(document: &mut Document, path: &str, value: Bson) -> ProviderResult<()> {
    let Some((head, rest)) = path.split_once('.') else {
        document.insert(path, value);
        return Ok(());
    };

    if !document.contains_key(head) {
        document.insert(head, Document::new());
    }

    match document.get_mut(head) {
        Some(Bson::Document(inner)) => set(inner, rest, value),
        Some(Bson::Array(items)) => set_in_array(items, rest, value),
        _ => Err(cannot_create(rest, head)),
    }
}

fn set_in_array(items: &mut Vec<Bson>, path: &str, value: Bson) -> ProviderResult<()> {
    let (head, rest) = match path.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    };
    let index = head
        .parse::<usize>()
        .map_err(|_| cannot_create(head, "array"))?;

    if items.len() <= index {
        let padding = index - items.len();
        let length = index
            .checked_add(1)
            .filter(|_| padding <= MAX_ARRAY_PADDING)
            .ok_or_else(|| {
                ProviderError::Backend(format!(
                    "can't backfill array to position {index}, more than {MAX_ARRAY_PADDING} \
                     elements past the end ({})",
                    items.len()
                ))
            })?;
        items.resize(length, Bson::Null);
    }

    let Some(rest) = rest else {
        items[index] = value;
        return Ok(());
    };

    if items[index] == Bson::Null {
        items[index] = Bson::Document(Document::new());
    }

    match &mut items[index] {
        Bson::Document(inner) => set(inner, rest, value),
        Bson::Array(nested) => set_in_array(nested, rest, value),
        _ => Err(cannot_create(rest, head)),
    }
}

/// Removes the value at `path` and returns it. Array elements are nulled rather than removed.
pub(crate) fn remove(document: &mut Document, path: &str) -> Option<Bson> {
    let Some((head, rest)) = path.split_once('.') else {
        return document.remove(path);
    };

    match document.get_mut(head)? {
        Bson::Document(inner) => remove(inner, rest),
        Bson::Array(items) => remove_in_array(items, rest),
        _ => None,
    }
}

fn remove_in_array(items: &mut [Bson], path: &str) -> Option<Bson> {
    let (head, rest) = match path.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    };
    let item = items.get_mut(head.parse::<usize>().ok()?)?;

    match (rest, item) {
        (None, item) => Some(std::mem::replace(item, Bson::Null)),
        (Some(rest), Bson::Document(inner)) => remove(inner, rest),
        (Some(rest), Bson::Array(nested)) => remove_in_array(nested, rest),
        _ => None,
    }
}

fn cannot_create(field: &str, parent: &str) -> ProviderError {
    ProviderError::Backend(format!(
        "Cannot create field '{field}' in element '{parent}'"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn resolve_fans_out_over_arrays() {
        let order = doc! {
            "items": [{ "sku": "a" }, { "sku": "b" }, { "qty": 1 }],
            "tags": ["x", "y"],
        };

        assert_eq!(resolve(&order, "items.sku"), vec![&Bson::from("a"), &Bson::from("b")]);
        assert_eq!(resolve(&order, "tags.1"), vec![&Bson::from("y")]);
        assert!(resolve(&order, "missing.field").is_empty());
    }

    #[test]
    fn set_creates_intermediate_documents() {
        let mut document = doc! { "name": "a" };

        set(&mut document, "address.city", Bson::from("Oslo")).unwrap();
        set(&mut document, "name", Bson::from("b")).unwrap();

        assert_eq!(document, doc! { "name": "b", "address": { "city": "Oslo" } });
        assert_eq!(get(&document, "address.city"), Some(&Bson::from("Oslo")));
    }

    #[test]
    fn set_through_a_scalar_fails() {
        let mut document = doc! { "name": "a" };

        assert!(set(&mut document, "name.first", Bson::from("x")).is_err());
    }

    #[test]
    fn positional_set_pads_a_bounded_distance() {
        let mut document = doc! { "tags": ["x"] };

        set(&mut document, "tags.3", Bson::from("y")).unwrap();
        assert_eq!(document, doc! { "tags": ["x", null, null, "y"] });

        assert!(set(&mut document, "tags.100000000000", Bson::from(1)).is_err());
        assert!(set(&mut document, &format!("tags.{}", usize::MAX), Bson::from(1)).is_err());
        assert_eq!(document, doc! { "tags": ["x", null, null, "y"] });
    }

    #[test]
    fn remove_nulls_array_elements() {
        let mut document = doc! { "tags": ["x", "y"], "meta": { "a": 1, "b": 2 } };

        assert_eq!(remove(&mut document, "tags.0"), Some(Bson::from("x")));
        assert_eq!(remove(&mut document, "meta.a"), Some(Bson::Int32(1)));
        assert_eq!(remove(&mut document, "meta.z"), None);
        assert_eq!(document, doc! { "tags": [Bson::Null, "y"], "meta": { "b": 2 } });
    }
}

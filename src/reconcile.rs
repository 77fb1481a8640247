//! Partial updates over an API that only accepts full replacement.
//!
//! NPM answers `PUT` with a full-object replace, rejects read-only and unknown
//! fields as additional properties, and reports some collections as `null`
//! while demanding the collection type on write. An update is therefore built
//! from the freshly fetched record:
//!
//! 1. project the record onto its writable fields ([`extract`]),
//! 2. replace `null` or missing collections with empty ones ([`normalize`]),
//! 3. overlay the caller's fields ([`merge`]),
//! 4. parse the result into the strict write model and validate it.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::errors::NpmError;
use crate::resource::{Resource, ResourceKind, WritePayload};

pub type Fields = Map<String, Value>;

/// Keeps only the writable fields of `kind`.
pub fn extract(kind: ResourceKind, record: &Fields) -> Fields {
    kind.writable_fields()
        .iter()
        .filter_map(|field| {
            record
                .get(*field)
                .map(|value| (field.to_string(), value.clone()))
        })
        .collect()
}

/// Replaces `null` or missing collection fields with their empty value. Idempotent.
pub fn normalize(kind: ResourceKind, mut fields: Fields) -> Fields {
    for (field, collection) in kind.collection_fields() {
        let entry = fields
            .entry(field.to_string())
            .or_insert(Value::Null);
        if entry.is_null() {
            *entry = collection.empty();
        }
    }
    fields
}

/// Overlays `patch` onto `base`. Keys present in `patch` win.
pub fn merge(mut base: Fields, patch: Fields) -> Fields {
    for (key, value) in patch {
        base.insert(key, value);
    }
    base
}

/// Serializes a patch model; unset fields are skipped and never reach the merge.
pub fn patch_fields<P: Serialize>(patch: &P) -> Result<Fields, NpmError> {
    match serde_json::to_value(patch) {
        Ok(Value::Object(fields)) => Ok(fields),
        Ok(other) => Err(NpmError::invalid_request(format!(
            "update must be an object, got {}",
            other
        ))),
        Err(e) => Err(NpmError::invalid_request(format!(
            "cannot serialize update: {}",
            e
        ))),
    }
}

/// The normalized writable projection of a fetched record.
pub fn project<R: Resource>(record: &R) -> Result<Fields, NpmError> {
    let fields = patch_fields(record)?;
    Ok(normalize(R::KIND, extract(R::KIND, &fields)))
}

/// Builds the full `PUT` body for updating `current` with `patch`.
///
/// Every field absent from `patch` keeps the value of `current`. The body is
/// checked locally before it is returned, so an invalid update never reaches
/// the server.
pub fn reconcile_update<R: Resource>(current: &R, patch: &R::Patch) -> Result<R::Write, NpmError> {
    let base = project(current)?;
    let overlay = extract(R::KIND, &patch_fields(patch)?);
    let merged = normalize(R::KIND, merge(base, overlay));

    let payload: R::Write = serde_json::from_value(Value::Object(merged)).map_err(|e| {
        NpmError::invalid_request(format!(
            "cannot build update for {} {}: {}",
            R::KIND,
            current.id(),
            e
        ))
    })?;
    payload.validate().map_err(NpmError::invalid_request)?;
    Ok(payload)
}

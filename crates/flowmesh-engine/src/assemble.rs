//! Step assembly: persisted step objects to named, deployable step specs.

use std::collections::HashSet;

use flowmesh_store::ObjectStore;
use flowmesh_types::ids::ObjectId;
use flowmesh_types::step::{StepObject, StepSpec, DEFAULT_MAX_SCALE};
use serde_json::{Map, Value};

use crate::errors::FlowError;
use crate::resources::names::{fit_with_suffix, slug};

/// Parsed parameter blob of one step object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepParams {
    pub code: String,
    pub max_scale: u8,
}

impl StepParams {
    /// Parse the stored blob. A missing blob means empty code; a non-string
    /// `code` value is kept as its JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::InvalidParams`] if the blob is not a JSON object.
    pub fn parse(object: &StepObject) -> Result<Self, FlowError> {
        let Some(raw) = object.params.as_deref().filter(|p| !p.trim().is_empty()) else {
            return Ok(Self {
                code: String::new(),
                max_scale: DEFAULT_MAX_SCALE,
            });
        };
        let params: Map<String, Value> =
            serde_json::from_str(raw).map_err(|e| FlowError::InvalidParams {
                id: object.id,
                reason: e.to_string(),
            })?;

        let code = match params.get("code") {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        };
        let max_scale = params
            .get("autoScale")
            .and_then(configured_max_scale)
            .map_or(DEFAULT_MAX_SCALE, clamp_scale);

        Ok(Self { code, max_scale })
    }
}

fn scale_number(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(truncate_f64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().filter(|f| f.is_finite()).map(truncate_f64))
        }
        _ => None,
    }
}

#[allow(clippy::cast_possible_truncation)]
fn truncate_f64(value: f64) -> i64 {
    value.trunc() as i64
}

/// `autoScale` as a number, numeric string, or `{maxScale: ...}`.
fn configured_max_scale(auto_scale: &Value) -> Option<i64> {
    match auto_scale {
        Value::Object(map) => map.get("maxScale").and_then(scale_number),
        other => scale_number(other),
    }
}

fn clamp_scale(value: i64) -> u8 {
    u8::try_from(value.clamp(0, i64::from(DEFAULT_MAX_SCALE))).unwrap_or(DEFAULT_MAX_SCALE)
}

/// Give every label a distinct, DNS-safe step name, keeping input order.
///
/// Empty slugs fall back to `s<N>` (1-based). Collisions get `-2`, `-3`, ...
/// and the base is shortened so the suffix survives the length cap.
#[must_use]
pub fn unique_step_names<S: AsRef<str>>(labels: &[S]) -> Vec<String> {
    let mut used = HashSet::with_capacity(labels.len());
    labels
        .iter()
        .enumerate()
        .map(|(i, label)| {
            let mut base = slug(label.as_ref());
            if base.is_empty() {
                base = format!("s{}", i + 1);
            }
            let mut name = fit_with_suffix(&base, "");
            let mut n = 2;
            while used.contains(&name) {
                name = fit_with_suffix(&base, &format!("-{n}"));
                n += 1;
            }
            used.insert(name.clone());
            name
        })
        .collect()
}

/// Fetch one step object.
///
/// # Errors
///
/// Returns [`FlowError::NotFound`] if the id does not resolve.
pub fn fetch_object(store: &dyn ObjectStore, id: ObjectId) -> Result<StepObject, FlowError> {
    store.find_object(id)?.ok_or(FlowError::NotFound(id))
}

/// Resolve ordered object ids into step specs.
///
/// # Errors
///
/// Returns [`FlowError::NotFound`] for an unknown id and
/// [`FlowError::InvalidParams`] for an unparsable parameter blob.
pub fn assemble_steps(store: &dyn ObjectStore, ids: &[ObjectId]) -> Result<Vec<StepSpec>, FlowError> {
    let objects = ids
        .iter()
        .map(|id| fetch_object(store, *id))
        .collect::<Result<Vec<_>, _>>()?;
    let params = objects
        .iter()
        .map(StepParams::parse)
        .collect::<Result<Vec<_>, _>>()?;
    let labels: Vec<&str> = objects.iter().map(|o| o.label.as_str()).collect();

    Ok(unique_step_names(&labels)
        .into_iter()
        .zip(params)
        .enumerate()
        .map(|(index, (name, p))| StepSpec {
            name,
            code: p.code,
            index,
            max_scale: p.max_scale,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowmesh_store::SqliteObjectStore;

    fn object(params: &str) -> StepObject {
        StepObject::new(1, "x").with_params(params)
    }

    #[test]
    fn test_code_extraction() {
        assert_eq!(StepParams::parse(&object(r#"{"code":"def handle(e): pass"}"#)).unwrap().code, "def handle(e): pass");
        assert_eq!(StepParams::parse(&object(r#"{"other":1}"#)).unwrap().code, "");
        assert_eq!(StepParams::parse(&object(r#"{"code":null}"#)).unwrap().code, "");
        assert_eq!(StepParams::parse(&object(r#"{"code":{"a":1}}"#)).unwrap().code, r#"{"a":1}"#);
        assert_eq!(StepParams::parse(&StepObject::new(1, "x")).unwrap().code, "");
    }

    #[test]
    fn test_non_string_code_is_kept_as_json_text() {
        let code = |p: &str| StepParams::parse(&object(p)).unwrap().code;
        assert_eq!(code(r#"{"code":42}"#), "42");
        assert_eq!(code(r#"{"code":true}"#), "true");
        assert_eq!(code(r#"{"code":["a","b"]}"#), r#"["a","b"]"#);
    }

    #[test]
    fn test_invalid_params() {
        let err = StepParams::parse(&object("{not json")).unwrap_err();
        assert!(matches!(err, FlowError::InvalidParams { id: ObjectId(1), .. }));
    }

    #[test]
    fn test_max_scale_forms() {
        let scale = |p: &str| StepParams::parse(&object(p)).unwrap().max_scale;
        assert_eq!(scale(r#"{"autoScale":3}"#), 3);
        assert_eq!(scale(r#"{"autoScale":"2"}"#), 2);
        assert_eq!(scale(r#"{"autoScale":{"maxScale":4}}"#), 4);
        assert_eq!(scale(r#"{"autoScale":{"maxScale":" 1 "}}"#), 1);
        assert_eq!(scale(r#"{"autoScale":2.9}"#), 2);
        assert_eq!(scale(r#"{"autoScale":99}"#), 5);
        assert_eq!(scale(r#"{"autoScale":-3}"#), 0);
        assert_eq!(scale(r#"{"autoScale":"lots"}"#), 5);
        assert_eq!(scale(r#"{"autoScale":{"minScale":1}}"#), 5);
        assert_eq!(scale(r#"{}"#), 5);
    }

    #[test]
    fn test_unique_names() {
        let names = unique_step_names(&["Ingest", "ingest", "", "INGEST!", "s3"]);
        assert_eq!(names, vec!["ingest", "ingest-2", "s3", "ingest-3", "s3-2"]);
    }

    #[test]
    fn test_long_names_keep_suffix() {
        let long = "a".repeat(80);
        let names = unique_step_names(&[long.as_str(), long.as_str()]);
        assert_eq!(names[0].len(), 63);
        assert!(names[1].ends_with("-2"));
        assert!(names[1].len() <= 63);
        assert_ne!(names[0], names[1]);
    }

    #[test]
    fn test_assemble_from_store() {
        let store = SqliteObjectStore::in_memory().unwrap();
        store
            .insert_object(&StepObject::new(10, "Ingest").with_params(r#"{"code":"def handle(e): return e","autoScale":2}"#), None)
            .unwrap();
        store
            .insert_object(&StepObject::new(11, "Sink").with_params(r#"{"code":"def handle(e): pass"}"#), None)
            .unwrap();

        let steps = assemble_steps(&store, &[ObjectId(10), ObjectId(11)]).unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].name, "ingest");
        assert_eq!(steps[0].max_scale, 2);
        assert_eq!(steps[1].name, "sink");
        assert_eq!(steps[1].index, 1);
    }

    #[test]
    fn test_assemble_missing_object() {
        let store = SqliteObjectStore::in_memory().unwrap();
        let err = assemble_steps(&store, &[ObjectId(404)]).unwrap_err();
        assert!(matches!(err, FlowError::NotFound(ObjectId(404))));
    }
}

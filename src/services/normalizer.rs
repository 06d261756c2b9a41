//! Converts backend-specific result payloads into one canonical shape.
//!
//! Generation backends expose files under whatever field each output node
//! happens to use (`images`, `videos`, `gifs`, `webm`, `files`, or a custom
//! name). All of the "guess the shape" logic lives here.

use reqwest::Url;
use serde_json::{Map, Value};

use crate::models::job::JobKind;
use crate::models::result::{AnalysisOutput, FileDescriptor, GenerationOutput, JobError, JobPayload};

const UNKNOWN: &str = "Unknown";

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NormalizationError {
    #[error("no retrievable output files in result")]
    NoOutputs { shape: Value },

    #[error("unexpected result shape: {detail}")]
    Malformed { detail: String, shape: Value },
}

impl From<NormalizationError> for JobError {
    fn from(err: NormalizationError) -> Self {
        let detail = err.to_string();
        let shape = match err {
            NormalizationError::NoOutputs { shape } | NormalizationError::Malformed { shape, .. } => {
                shape
            }
        };
        JobError::Normalization {
            detail,
            shape: Some(shape),
        }
    }
}

/// Normalize a raw result for the given job kind. `view_endpoint` is the
/// backend's file retrieval URL (e.g. `http://comfy:8188/view`) and is
/// required for generation jobs.
pub fn normalize(
    kind: JobKind,
    raw: &Value,
    view_endpoint: Option<&Url>,
) -> Result<JobPayload, NormalizationError> {
    if !kind.is_generation() {
        return normalize_analysis(raw).map(JobPayload::Analysis);
    }
    let view = view_endpoint.ok_or_else(|| NormalizationError::Malformed {
        detail: "backend exposes no file view endpoint".to_string(),
        shape: describe_shape(raw),
    })?;
    normalize_generation(raw, view).map(JobPayload::Generation)
}

/// Collect every file descriptor across every node and every array field,
/// in document order.
pub fn normalize_generation(
    raw: &Value,
    view_endpoint: &Url,
) -> Result<GenerationOutput, NormalizationError> {
    let nodes = output_nodes(raw).ok_or_else(|| NormalizationError::Malformed {
        detail: "expected an object of output nodes".to_string(),
        shape: describe_shape(raw),
    })?;

    let mut files = Vec::new();
    for (node_id, node_output) in nodes {
        let Some(fields) = node_output.as_object() else {
            continue;
        };
        for (field, value) in fields {
            let Some(entries) = value.as_array() else {
                continue;
            };
            for entry in entries {
                if let Some(file) = file_descriptor(node_id, field, entry, view_endpoint) {
                    files.push(file);
                }
            }
        }
    }

    if files.is_empty() {
        return Err(NormalizationError::NoOutputs {
            shape: describe_shape(raw),
        });
    }

    Ok(GenerationOutput {
        media_urls: files.iter().map(|f| f.url.clone()).collect(),
        files,
    })
}

/// Project an analysis record, defaulting optional fields.
pub fn normalize_analysis(raw: &Value) -> Result<AnalysisOutput, NormalizationError> {
    // n8n "respond to webhook" nodes often wrap the item in a one-element array
    let record = match raw {
        Value::Array(items) => items.first().and_then(Value::as_object),
        Value::Object(map) => Some(map),
        _ => None,
    }
    .ok_or_else(|| NormalizationError::Malformed {
        detail: "expected an analysis object".to_string(),
        shape: describe_shape(raw),
    })?;

    let text = ["text", "prompt"]
        .iter()
        .find_map(|key| record.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| NormalizationError::Malformed {
            detail: "analysis result has no `text`".to_string(),
            shape: describe_shape(raw),
        })?;

    Ok(AnalysisOutput {
        text: text.to_string(),
        tags: tags(record.get("tags")),
        confidence: record
            .get("confidence")
            .and_then(Value::as_f64)
            .unwrap_or(0.0),
        style: string_or_unknown(record.get("style")),
        mood: string_or_unknown(record.get("mood")),
    })
}

/// Accept either a bare outputs map or a ComfyUI history entry wrapping it.
fn output_nodes(raw: &Value) -> Option<&Map<String, Value>> {
    let map = raw.as_object()?;
    match map.get("outputs").and_then(Value::as_object) {
        Some(outputs) => Some(outputs),
        None => Some(map),
    }
}

fn file_descriptor(node: &str, field: &str, entry: &Value, view_endpoint: &Url) -> Option<FileDescriptor> {
    let obj = entry.as_object()?;
    let filename = obj.get("filename")?.as_str()?;
    if filename.is_empty() {
        return None;
    }
    let subfolder = obj.get("subfolder").and_then(Value::as_str).unwrap_or("");
    let file_type = obj.get("type").and_then(Value::as_str).unwrap_or("output");

    let mut url = view_endpoint.clone();
    url.query_pairs_mut()
        .append_pair("filename", filename)
        .append_pair("subfolder", subfolder)
        .append_pair("type", file_type);

    Some(FileDescriptor {
        filename: filename.to_string(),
        subfolder: subfolder.to_string(),
        file_type: file_type.to_string(),
        node: node.to_string(),
        field: field.to_string(),
        url: url.to_string(),
    })
}

fn tags(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect(),
        Some(Value::String(joined)) => joined
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

fn string_or_unknown(value: Option<&Value>) -> String {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(UNKNOWN)
        .to_string()
}

/// Skeleton of a payload for diagnostics: object keys are kept, leaves are
/// replaced by their JSON type name.
fn describe_shape(raw: &Value) -> Value {
    fn walk(value: &Value, depth: usize) -> Value {
        match value {
            Value::Object(map) if depth < 3 => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), walk(v, depth + 1)))
                    .collect(),
            ),
            Value::Object(_) => Value::String("object".to_string()),
            Value::Array(items) => Value::String(format!("array[{}]", items.len())),
            Value::String(_) => Value::String("string".to_string()),
            Value::Number(_) => Value::String("number".to_string()),
            Value::Bool(_) => Value::String("bool".to_string()),
            Value::Null => Value::String("null".to_string()),
        }
    }
    walk(raw, 0)
}

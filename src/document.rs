// This module implements ingestion of one whole compilation-unit dump. A dump
// is a single JSON object: the compiled function (modern object form or the
// legacy string + source text pair), the source and inlining tables, the node
// position map, the per-line bytecode positions, the ordered phase list, and
// optional per-phase event counts. A compiler crash mid-dump leaves the phase
// array open with a trailing comma; such a text is repaired by appending a
// synthetic empty disassembly phase and the closing brackets before parsing.
// The resolver tables are fed strictly in registration order (inlinings,
// sources, node positions, line positions, phases) since position-to-source
// attribution depends on the sources being registered first.

//! Compilation-unit dump ingestion.

use hashbrown::HashMap;
use serde::Deserialize;
use serde_json::Value;

use crate::core::{ScopeError, ScopeResult};
use crate::position::{Inlining, Source, SourcePosition, NOT_INLINED};
use crate::resolver::SourceResolver;

/// One loaded compilation unit: the populated resolver plus the metadata a
/// report needs but the resolver does not.
#[derive(Debug)]
pub struct GraphDocument {
    pub resolver: SourceResolver,
    pub function_name: String,
    /// Per-phase event counters, kept verbatim for callers.
    pub event_counts: HashMap<String, HashMap<String, u64>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FunctionSpec {
    #[serde(default)]
    function_name: String,
    #[serde(default)]
    source_name: String,
    #[serde(default)]
    source_text: String,
    #[serde(default)]
    start_position: i32,
    #[serde(default)]
    source_id: Option<i32>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SourceSpec {
    #[serde(default)]
    source_id: i32,
    #[serde(default)]
    source_name: String,
    #[serde(default)]
    function_name: String,
    #[serde(default)]
    source_text: String,
    #[serde(default)]
    start_position: i32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InliningSpec {
    source_id: i32,
    inlining_position: Value,
}

impl GraphDocument {
    /// Parses a dump text, repairing crash truncation first. The only fatal
    /// conditions are JSON syntax errors, a missing phase list and an
    /// unknown phase kind; every other data gap degrades to "no data".
    pub fn from_json(text: &str) -> ScopeResult<GraphDocument> {
        let repaired = repair_truncated(text);
        let root: Value = serde_json::from_str(&repaired)?;

        let mut resolver = SourceResolver::new();

        if let Some(raw) = root.get("inlinings") {
            resolver.set_inlinings(parse_inlinings(raw));
        }
        let fallback = main_source(&root);
        let function_name = fallback
            .as_ref()
            .map(|source| source.function_name.clone())
            .unwrap_or_default();
        resolver.set_sources(parse_sources(root.get("sources")), fallback);

        if let Some(map) = root.get("nodePositions").and_then(Value::as_object) {
            resolver.set_node_position_map(map);
        }
        if let Some(lines) = root.get("sourceLineToBytecodePosition").and_then(Value::as_array) {
            let lines: Vec<i32> = lines
                .iter()
                .map(|v| v.as_i64().unwrap_or(0) as i32)
                .collect();
            resolver.set_source_line_to_bytecode_position(&lines);
        }

        let phases = root
            .get("phases")
            .and_then(Value::as_array)
            .ok_or(ScopeError::MissingField { field: "phases" })?;
        resolver.parse_phases(phases)?;

        Ok(GraphDocument {
            resolver,
            function_name,
            event_counts: parse_event_counts(root.get("eventCounts")),
        })
    }
}

/// Repairs a crash-truncated dump. A truncated text ends inside the phase
/// array, right after a phase and its separating comma; closing it with an
/// empty disassembly phase yields valid JSON with the partial data intact.
fn repair_truncated(text: &str) -> String {
    let trimmed = text.trim_end();
    if trimmed.ends_with(',') {
        log::warn!("dump looks crash-truncated, appending synthetic disassembly phase");
        let mut repaired = String::with_capacity(trimmed.len() + 64);
        repaired.push_str(trimmed);
        repaired.push_str(r#"{"name":"disassembly","type":"disassembly","data":""}]}"#);
        repaired
    } else {
        text.to_string()
    }
}

/// The main function record, from the modern `function` object or from the
/// legacy `function`/`source`/`sourcePosition` string triple. `None` when
/// the dump names no function at all.
fn main_source(root: &Value) -> Option<Source> {
    match root.get("function") {
        Some(Value::Object(_)) => {
            let spec: FunctionSpec =
                serde_json::from_value(root.get("function").cloned()?).ok()?;
            Some(Source {
                source_id: spec.source_id.unwrap_or(-1),
                source_name: spec.source_name,
                function_name: spec.function_name,
                source_text: spec.source_text,
                start_position: spec.start_position,
                source_positions: Vec::new(),
            })
        }
        Some(Value::String(name)) => Some(Source {
            source_id: -1,
            source_name: String::new(),
            function_name: name.clone(),
            source_text: root
                .get("source")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string(),
            start_position: root
                .get("sourcePosition")
                .and_then(Value::as_i64)
                .unwrap_or(0) as i32,
            source_positions: Vec::new(),
        }),
        _ => None,
    }
}

fn parse_sources(raw: Option<&Value>) -> Vec<Source> {
    let Some(map) = raw.and_then(Value::as_object) else {
        return Vec::new();
    };
    let mut sources = Vec::with_capacity(map.len());
    for (key, value) in map {
        let spec: SourceSpec = match serde_json::from_value(value.clone()) {
            Ok(spec) => spec,
            Err(e) => {
                log::warn!("ignoring malformed source {key:?}: {e}");
                continue;
            }
        };
        sources.push(Source {
            source_id: spec.source_id,
            source_name: spec.source_name,
            function_name: spec.function_name,
            source_text: spec.source_text,
            start_position: spec.start_position,
            source_positions: Vec::new(),
        });
    }
    sources
}

fn parse_inlinings(raw: &Value) -> Vec<(i32, Inlining)> {
    let Some(map) = raw.as_object() else {
        return Vec::new();
    };
    let mut inlinings = Vec::with_capacity(map.len());
    for (key, value) in map {
        let id: i32 = match key.parse() {
            Ok(id) => id,
            Err(_) => {
                log::warn!("ignoring non-numeric inlining id {key:?}");
                continue;
            }
        };
        let spec: InliningSpec = match serde_json::from_value(value.clone()) {
            Ok(spec) => spec,
            Err(e) => {
                log::warn!("ignoring malformed inlining {id}: {e}");
                continue;
            }
        };
        let position = SourcePosition::from_json(&spec.inlining_position)
            .unwrap_or(SourcePosition::script(NOT_INLINED, 0));
        inlinings.push((
            id,
            Inlining {
                source_id: spec.source_id,
                inlining_position: position,
            },
        ));
    }
    inlinings
}

fn parse_event_counts(raw: Option<&Value>) -> HashMap<String, HashMap<String, u64>> {
    let mut counts = HashMap::new();
    let Some(map) = raw.and_then(Value::as_object) else {
        return counts;
    };
    for (phase, events) in map {
        let Some(events) = events.as_object() else {
            continue;
        };
        let inner: HashMap<String, u64> = events
            .iter()
            .filter_map(|(name, count)| Some((name.clone(), count.as_u64()?)))
            .collect();
        counts.insert(phase.clone(), inner);
    }
    counts
}

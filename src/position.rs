// This module implements the source-side identifier spaces: positions inside
// script source (with their inlining context), positions inside a bytecode
// stream, and the source/inlining records positions resolve against. A position
// is a small Copy value usable directly as a map key; equality and ordering are
// derived from the variant fields, with script positions ordering by inlining
// id then offset. Dumps encode positions either as a bare script offset (older
// producers) or as a tagged object; from_json accepts both and treats anything
// else as "no position", logged and skipped rather than failed, since a single
// undefined position must not take down a whole load.

//! Source positions, sources and inlinings.

use serde_json::Value;
use std::fmt;

/// Inlining id of top-level (not inlined) code.
pub const NOT_INLINED: i32 = -1;

/// A position in one of the two source-side spaces.
///
/// `Script` positions order by `(inlining_id, script_offset)`, which is the
/// order position lists are kept in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SourcePosition {
    Script { inlining_id: i32, script_offset: i32 },
    Bytecode { bytecode_position: i32 },
}

impl SourcePosition {
    pub fn script(inlining_id: i32, script_offset: i32) -> SourcePosition {
        SourcePosition::Script {
            inlining_id,
            script_offset,
        }
    }

    pub fn bytecode(bytecode_position: i32) -> SourcePosition {
        SourcePosition::Bytecode { bytecode_position }
    }

    /// Decodes a dump position. A bare number is the legacy form, a top-level
    /// script offset. Unrecognized payloads yield `None` after a warning.
    pub fn from_json(raw: &Value) -> Option<SourcePosition> {
        if let Some(offset) = raw.as_i64() {
            return Some(SourcePosition::script(NOT_INLINED, offset as i32));
        }
        if let Some(object) = raw.as_object() {
            if let Some(offset) = object.get("scriptOffset").and_then(Value::as_i64) {
                let inlining_id = object
                    .get("inliningId")
                    .and_then(Value::as_i64)
                    .unwrap_or(NOT_INLINED as i64);
                return Some(SourcePosition::script(inlining_id as i32, offset as i32));
            }
            if let Some(position) = object.get("bytecodePosition").and_then(Value::as_i64) {
                return Some(SourcePosition::bytecode(position as i32));
            }
        }
        log::warn!("unrecognized source position payload: {raw}");
        None
    }

    /// The inlining this position sits in; `NOT_INLINED` for bytecode
    /// positions, which carry no inlining context.
    pub fn inlining_id(&self) -> i32 {
        match *self {
            SourcePosition::Script { inlining_id, .. } => inlining_id,
            SourcePosition::Bytecode { .. } => NOT_INLINED,
        }
    }

    pub fn is_top_level_script(&self) -> bool {
        matches!(
            *self,
            SourcePosition::Script {
                inlining_id: NOT_INLINED,
                ..
            }
        )
    }
}

impl fmt::Display for SourcePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            SourcePosition::Script {
                inlining_id,
                script_offset,
            } => write!(f, "SP:{inlining_id}:{script_offset}"),
            SourcePosition::Bytecode { bytecode_position } => {
                write!(f, "BCP:{bytecode_position}")
            }
        }
    }
}

/// One entry of the inlining table: which source was inlined, and the
/// position of the call site it replaced.
#[derive(Debug, Clone)]
pub struct Inlining {
    pub source_id: i32,
    pub inlining_position: SourcePosition,
}

impl Inlining {
    /// The sentinel entry for top-level code.
    pub fn not_inlined() -> Inlining {
        Inlining {
            source_id: -1,
            inlining_position: SourcePosition::script(NOT_INLINED, 0),
        }
    }
}

/// One source function of the compilation unit. `source_positions` is the
/// list of all positions observed inside it, kept sorted and de-duplicated
/// once registration finishes.
#[derive(Debug, Clone, Default)]
pub struct Source {
    pub source_id: i32,
    pub source_name: String,
    pub function_name: String,
    pub source_text: String,
    pub start_position: i32,
    pub source_positions: Vec<SourcePosition>,
}

impl Source {
    pub fn push_position(&mut self, position: SourcePosition) {
        self.source_positions.push(position);
    }

    pub fn sort_and_dedup_positions(&mut self) {
        self.source_positions.sort_unstable();
        self.source_positions.dedup();
    }

    /// Positions whose script offset lies in `[start, end)`. Bytecode
    /// positions never match.
    pub fn positions_in_range(&self, start: i32, end: i32) -> Vec<SourcePosition> {
        self.source_positions
            .iter()
            .copied()
            .filter(|position| match *position {
                SourcePosition::Script { script_offset, .. } => {
                    script_offset >= start && script_offset < end
                }
                SourcePosition::Bytecode { .. } => false,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_script_position_ordering() {
        let mut positions = vec![
            SourcePosition::script(1, 2),
            SourcePosition::script(NOT_INLINED, 9),
            SourcePosition::script(0, 5),
            SourcePosition::script(0, 1),
        ];
        positions.sort_unstable();
        assert_eq!(
            positions,
            vec![
                SourcePosition::script(NOT_INLINED, 9),
                SourcePosition::script(0, 1),
                SourcePosition::script(0, 5),
                SourcePosition::script(1, 2),
            ]
        );
    }

    #[test]
    fn test_from_json_forms() {
        assert_eq!(
            SourcePosition::from_json(&json!(42)),
            Some(SourcePosition::script(NOT_INLINED, 42))
        );
        assert_eq!(
            SourcePosition::from_json(&json!({"scriptOffset": 7, "inliningId": 2})),
            Some(SourcePosition::script(2, 7))
        );
        assert_eq!(
            SourcePosition::from_json(&json!({"bytecodePosition": 13})),
            Some(SourcePosition::bytecode(13))
        );
        assert_eq!(SourcePosition::from_json(&json!("bogus")), None);
        assert_eq!(SourcePosition::from_json(&json!(null)), None);
        assert_eq!(SourcePosition::from_json(&json!({})), None);
    }

    #[test]
    fn test_sort_and_dedup() {
        let mut source = Source::default();
        source.push_position(SourcePosition::script(NOT_INLINED, 9));
        source.push_position(SourcePosition::script(NOT_INLINED, 2));
        source.push_position(SourcePosition::script(NOT_INLINED, 9));
        source.sort_and_dedup_positions();
        assert_eq!(
            source.source_positions,
            vec![
                SourcePosition::script(NOT_INLINED, 2),
                SourcePosition::script(NOT_INLINED, 9),
            ]
        );
    }

    #[test]
    fn test_positions_in_range_is_half_open() {
        let mut source = Source::default();
        for offset in [1, 5, 9] {
            source.push_position(SourcePosition::script(NOT_INLINED, offset));
        }
        source.push_position(SourcePosition::bytecode(5));
        source.sort_and_dedup_positions();
        assert_eq!(
            source.positions_in_range(1, 9),
            vec![
                SourcePosition::script(NOT_INLINED, 1),
                SourcePosition::script(NOT_INLINED, 5),
            ]
        );
        assert_eq!(source.positions_in_range(10, 20), Vec::new());
    }
}

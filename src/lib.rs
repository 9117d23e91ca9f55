//! irscope - Compiler-phase dump resolution and layout.
//!
//! irscope ingests the JSON dump a compiler writes after each pipeline phase
//! (IR graphs, schedules, register-allocated sequences, instruction tables,
//! disassembly) and builds the machinery a visualizer needs: bidirectional
//! indices between the five identifier spaces the dumps use, a selection
//! broker that keeps multiple views of the same program point in sync, and a
//! layered layout engine for the graph phases.
//!
//! # Primary Usage
//!
//! ```ignore
//! use irscope::{GraphDocument, Graph, layout_graph};
//!
//! let document = GraphDocument::from_json(&dump_text)?;
//! let (_, phase) = document.resolver.graph_phases().last().unwrap();
//! let mut graph = Graph::from_phase(phase);
//! layout_graph(&mut graph);
//! ```
//!
//! # Architecture
//!
//! - [`resolver`] - Cross-representation resolver and phase parsing
//! - [`position`] - Source positions, sources and inlinings
//! - [`broker`] - Selection broker synchronizing registered views
//! - [`graph`] - Graph model and node classification for one phase
//! - [`layout`] - Layered layout engine with slot occupation
//! - [`document`] - Whole-dump ingestion
//! - [`core`] - Shared infrastructure (errors)

pub mod broker;
pub mod core;
pub mod document;
pub mod graph;
pub mod layout;
pub mod position;
pub mod resolver;

// Re-export common types from organized modules
pub use crate::core::{ScopeError, ScopeResult};
pub use broker::{
    BlockSelectionHandler, ClearableHandler, HandlerId, InstructionSelectionHandler,
    NodeSelectionHandler, SelectionBroker, SourcePositionSelectionHandler,
};
pub use document::GraphDocument;
pub use graph::{Edge, EdgeKind, GNode, Graph, NodeKind};
pub use layout::layout_graph;
pub use position::{Inlining, Source, SourcePosition, NOT_INLINED};
pub use resolver::{InstructionRange, NodeId, SourceResolver};

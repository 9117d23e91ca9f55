// This module is the hub for irscope's shared infrastructure. Today that is the
// error stack (ScopeError/ScopeResult); the domain modules (resolver, broker, graph,
// layout, document) sit at the crate root and pull the error types from here. The
// hub-and-re-export shape keeps call sites on `core::ScopeResult` even if more
// shared infrastructure lands later.

//! Core irscope infrastructure.
//!
//! Shared building blocks used by every domain module. Currently this is the
//! error handling stack; see [`error`].

pub mod error;

pub use error::{ScopeError, ScopeResult};

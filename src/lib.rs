//! # Agentic Workflows
//!
//! Compiles natural-language agent workflow documents into least-privilege
//! CI pipelines, and carries the runtime that moves an agent's requested
//! side effects across the privilege boundary.
//!
//! ## Usage
//!
//! ```bash
//! aw compile [paths...] [--check]
//! aw graph .github/workflows/triage.md
//! ```
//!
//! ## Modules
//!
//! - `imports` - Import references, remote sources and the content-addressed cache
//! - `parser` - Frontmatter split, layered merge and body directives
//! - `model` - Typed workflow model and its validation rules
//! - `compiler` - Job graph construction, engines and deterministic rendering
//! - `safe_outputs` - Effect request log, mediator server and effect processor
//! - `activation` - Runtime filters evaluated by the activation job
//! - `config` - Compiler settings from `.aw/config.toml` and the environment
//! - `testing` - In-memory fakes shared by unit and integration tests
pub mod activation;
pub mod cli;
pub mod compiler;
pub mod config;
pub mod error;
pub mod imports;
pub mod model;
pub mod parser;
pub mod safe_outputs;

pub mod testing;

pub use error::{Error, ErrorCode, Result};

//! protocrd-compiler
//!
//! This crate implements:
//!  1) A tokenizer + parser for annotated `.proto` files,
//!  2) A schema verifier (duplicate types and numbers, reserved ranges, recursive messages, etc.),
//!  3) The marker interpreter (`+kubebuilder:validation:*`, `+protoc-gen-crd:*`),
//!  4) Schema compilation (`compile_schema` → per-message OpenAPI v3 schemas),
//!  5) CRD manifest generation from a `protocrd.yaml` configuration,
//!  6) A compatibility checker between two schema versions,
//!  7) Error types (`CrdError`).

pub mod error;
pub mod types;
pub mod utils;
pub mod tokenizer;
pub mod parser;
pub mod verifier;
pub mod marker;
pub mod compiler;
pub mod config;
pub mod gen_crd;
pub mod compat;

pub use compat::{check_compatibility, Breakage, BreakageKind, Snapshot};
pub use compiler::{compile_schema, SchemaSet};
pub use config::{Config, Resource, ResourceScope};
pub use error::CrdError;
pub use gen_crd::{generate_crds, to_yaml};

//! protocrd
//!
//! Facade over the workspace crates:
//!
//! - schema compilation and CRD generation (re-exported from `protocrd-compiler`)
//! - the OpenAPI schema model and instance validator (`protocrd-schema`)
//! - CEL macro expansion and evaluation (`protocrd-cel`)
//! - fixture runs over `valid.yaml` / `invalid.yaml` documents

use std::path::Path;

pub mod fixtures;

pub use fixtures::{run_fixtures, FixtureFailure, FixtureReport};
pub use protocrd_compiler::{
    check_compatibility, compile_schema, generate_crds, to_yaml, Breakage, BreakageKind, Config,
    CrdError, Resource, ResourceScope, SchemaSet, Snapshot,
};
pub use protocrd_schema::{validate, CustomResourceDefinition, JsonSchemaProps, Violation};

pub mod cel {
    pub use protocrd_cel::*;
}

pub mod compiler {
    pub use protocrd_compiler::*;
}

pub mod schema {
    pub use protocrd_schema::*;
}

/// Compiles `proto` source and builds the CRDs described by `config`.
pub fn compile_crds(proto: &str, config: &Config) -> Result<Vec<CustomResourceDefinition>, CrdError> {
    let (_, schemas) = compile_schema(proto)?;
    generate_crds(&schemas, config)
}

/// Same as [`compile_crds`], reading both inputs from disk.
pub fn compile_crds_from_files(proto: &Path, config: &Path) -> Result<Vec<CustomResourceDefinition>, CrdError> {
    let text = std::fs::read_to_string(proto)?;
    compile_crds(&text, &Config::load(config)?)
}

//! Types for the OpenAPI v3 subset used by Kubernetes
//! `CustomResourceDefinition` manifests, and a validator that checks
//! decoded documents against them (including `x-kubernetes-validations`
//! CEL rules).
//!
//! ```
//! use protocrd_schema::*;
//! use serde_json::json;
//!
//! let mut port = JsonSchemaProps::typed("integer");
//! port.tighten_minimum(0.into());
//! port.tighten_maximum(65535.into());
//!
//! assert!(validate(&port, &json!(443)).is_empty());
//! let violations = validate(&port, &json!(70000));
//! assert_eq!(violations[0].to_string(), "<root>: should be less than or equal to 65535");
//! ```

pub mod crd;
pub mod props;
pub mod validate;

pub use crd::*;
pub use props::*;
pub use validate::*;

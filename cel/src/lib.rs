//! protocrd-cel
//!
//! The CEL side of the schema compiler:
//!  1) A tokenizer + recursive-descent parser producing an [`Expr`] tree,
//!  2) A canonical printer (`Display` on [`Expr`]),
//!  3) Expansion of the `default`, `oneof` and `index` authoring macros,
//!  4) A small evaluator for the rule subset used in `x-kubernetes-validations`.

pub mod ast;
pub mod error;
pub mod eval;
pub mod macros;
pub mod parser;
pub mod tokenizer;
pub mod value;

pub use ast::Expr;
pub use error::CelError;
pub use eval::{evaluate, evaluate_rule, Activation};
pub use macros::{expand, expand_expr};
pub use parser::parse_expr;
pub use value::Value;

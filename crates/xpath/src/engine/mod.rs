//! Dynamic evaluation: contexts, the expression evaluator, the built-in function library
//! and the error taxonomy.

pub mod context;
pub(crate) mod evaluator;
pub mod functions;
pub mod runtime;

pub use context::{DynamicContext, ExecutionParameters, VariableScope};
pub use runtime::{Error, ErrorCode};

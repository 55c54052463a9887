//! Static context, module registry and the compilation of syntax trees into [`Expression`] graphs.

mod compile;
mod expression;
mod modules;
mod static_context;

pub use compile::{CompileEnv, CompiledQuery, compile_library, compile_main};
pub use expression::{
    Bucket, DeclaredFunction, Expression, ExpressionKind, FlworClause, GlobalVariable, LookupKey, NameSource,
    NameTest, NodeTest, OrderKeySpec, Specificity, buckets_for_node, compare_specificity,
};
pub use modules::{LibraryModule, ModuleRegistry};
pub use static_context::{Arity, FunctionNameResolver, FunctionSignatures, NamespaceResolver, StaticContext};

//! The public evaluation API: [`Engine`], [`Options`] and result conversion.

mod engine;
mod native;
mod options;
mod result;

pub use crate::parser::Language;
pub use engine::{CustomFunctionContext, Engine};
pub use native::NativeValue;
pub use options::Options;
pub use result::{ResultStream, ReturnType, XPathError, XPathResult};

//! XPath 3.1, XQuery 3.1 and XQuery Update Facility evaluation over any tree reachable
//! through a [`DomFacade`].
//!
//! Queries compile into an [`Expression`](compiler::Expression) graph that evaluates to lazy
//! item streams. Facade calls may suspend; the synchronous entry points wait for them and the
//! `*_async` ones await them.
//!
//! ```
//! use arbor_xpath::{Engine, Options, SimpleNode, SimpleTree};
//! use std::rc::Rc;
//!
//! let engine = Engine::<SimpleNode>::new();
//! let sum = engine.evaluate_xpath_to_number("1 + 1", None, Rc::new(SimpleTree), &Options::default());
//! assert_eq!(sum.unwrap(), 2.0);
//! ```

pub mod api;
pub mod compiler;
pub mod consts;
pub mod engine;
pub mod model;
pub mod parser;
pub mod simple_node;
pub mod types;
pub mod update;
pub mod util;
pub mod xdm;

pub use api::{
    CustomFunctionContext, Engine, Language, NativeValue, Options, ResultStream, ReturnType, XPathError, XPathResult,
};
pub use compiler::{Bucket, Specificity, buckets_for_node as get_buckets_for_node};
pub use engine::{Error, ErrorCode};
pub use model::{DocumentWriter, DomFacade, NodeKind, NodesFactory, XdmNode};
pub use simple_node::{SimpleNode, SimpleNodeBuilder, SimpleTree, SuspendingTree};
pub use update::{
    PendingUpdate, TransferablePendingUpdate, UpdatingResult, apply_updates, apply_updates_blocking, merge_updates,
};
pub use util::{merge_sort, try_merge_sort};
pub use xdm::{AtomicValue, ExpandedName, QName, XdmItem, XdmSequence};

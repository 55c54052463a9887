use super::NativeValue;
use crate::engine::runtime::{Error, ErrorCode};
use crate::model::{DomFacade, XdmNode};
use crate::types::{atomize, effective_boolean_value};
use crate::xdm::{AtomicValue, ArrayItem, Fetch, MapItem, Pull, Suspension, XdmItem, XdmSequence, XdmSequenceStream};
use futures_lite::Stream;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

/// The shape a caller wants the result in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReturnType {
    /// Nodes pass through, a single value is converted, several become a list.
    Any,
    Boolean,
    /// All values atomized and joined with single spaces.
    String,
    Strings,
    /// The first value if it is numeric, `NaN` otherwise.
    Number,
    Numbers,
    Nodes,
    FirstNode,
    Map,
    Array,
    /// The raw item sequence.
    AllResults,
    /// A lazily pulled [`ResultStream`].
    AsyncIterator,
}

impl fmt::Display for ReturnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReturnType::Any => "any",
            ReturnType::Boolean => "boolean",
            ReturnType::String => "string",
            ReturnType::Strings => "strings",
            ReturnType::Number => "number",
            ReturnType::Numbers => "numbers",
            ReturnType::Nodes => "nodes",
            ReturnType::FirstNode => "first node",
            ReturnType::Map => "map",
            ReturnType::Array => "array",
            ReturnType::AllResults => "all results",
            ReturnType::AsyncIterator => "async iterator",
        })
    }
}

/// An evaluation result in the requested [`ReturnType`].
pub enum XPathResult<N> {
    Any(NativeValue<N>),
    Boolean(bool),
    String(String),
    Strings(Vec<String>),
    Number(f64),
    Numbers(Vec<f64>),
    Nodes(Vec<N>),
    FirstNode(Option<N>),
    Map(MapItem<N>),
    Array(ArrayItem<N>),
    AllResults(XdmSequence<N>),
    AsyncIterator(ResultStream<N>),
}

impl<N: fmt::Debug> fmt::Debug for XPathResult<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            XPathResult::Any(v) => f.debug_tuple("Any").field(v).finish(),
            XPathResult::Boolean(v) => f.debug_tuple("Boolean").field(v).finish(),
            XPathResult::String(v) => f.debug_tuple("String").field(v).finish(),
            XPathResult::Strings(v) => f.debug_tuple("Strings").field(v).finish(),
            XPathResult::Number(v) => f.debug_tuple("Number").field(v).finish(),
            XPathResult::Numbers(v) => f.debug_tuple("Numbers").field(v).finish(),
            XPathResult::Nodes(v) => f.debug_tuple("Nodes").field(v).finish(),
            XPathResult::FirstNode(v) => f.debug_tuple("FirstNode").field(v).finish(),
            XPathResult::Map(v) => f.debug_tuple("Map").field(v).finish(),
            XPathResult::Array(v) => f.debug_tuple("Array").field(v).finish(),
            XPathResult::AllResults(v) => f.debug_tuple("AllResults").field(v).finish(),
            XPathResult::AsyncIterator(_) => f.write_str("AsyncIterator(..)"),
        }
    }
}

impl<N> XPathResult<N> {
    pub(crate) fn return_type(&self) -> ReturnType {
        match self {
            XPathResult::Any(_) => ReturnType::Any,
            XPathResult::Boolean(_) => ReturnType::Boolean,
            XPathResult::String(_) => ReturnType::String,
            XPathResult::Strings(_) => ReturnType::Strings,
            XPathResult::Number(_) => ReturnType::Number,
            XPathResult::Numbers(_) => ReturnType::Numbers,
            XPathResult::Nodes(_) => ReturnType::Nodes,
            XPathResult::FirstNode(_) => ReturnType::FirstNode,
            XPathResult::Map(_) => ReturnType::Map,
            XPathResult::Array(_) => ReturnType::Array,
            XPathResult::AllResults(_) => ReturnType::AllResults,
            XPathResult::AsyncIterator(_) => ReturnType::AsyncIterator,
        }
    }
}

/// Failure of an API call, always with the query text it concerns.
#[derive(Debug, Clone, thiserror::Error)]
pub enum XPathError {
    #[error("cannot parse '{expression}': {error}")]
    Parse {
        expression: String,
        #[source]
        error: Error,
    },
    #[error("static error in '{expression}': {error}")]
    Static {
        expression: String,
        #[source]
        error: Error,
    },
    #[error("evaluating '{expression}' failed: {error}")]
    Dynamic {
        expression: String,
        #[source]
        error: Error,
    },
    #[error("'{expression}' evaluated to {found}, which is not convertible to {expected}")]
    ResultMismatch { expression: String, expected: ReturnType, found: String },
}

impl XPathError {
    pub(crate) fn parse(expression: &str, error: Error) -> Self {
        XPathError::Parse { expression: expression.to_string(), error }
    }

    pub(crate) fn static_error(expression: &str, error: Error) -> Self {
        XPathError::Static { expression: expression.to_string(), error }
    }

    pub(crate) fn dynamic(expression: &str, error: Error) -> Self {
        XPathError::Dynamic { expression: expression.to_string(), error }
    }

    pub(crate) fn mismatch(expression: &str, expected: ReturnType, found: impl Into<String>) -> Self {
        XPathError::ResultMismatch { expression: expression.to_string(), expected, found: found.into() }
    }

    pub fn expression(&self) -> &str {
        match self {
            XPathError::Parse { expression, .. }
            | XPathError::Static { expression, .. }
            | XPathError::Dynamic { expression, .. }
            | XPathError::ResultMismatch { expression, .. } => expression,
        }
    }

    /// The underlying engine error; result mismatches have none.
    pub fn error(&self) -> Option<&Error> {
        match self {
            XPathError::Parse { error, .. } | XPathError::Static { error, .. } | XPathError::Dynamic { error, .. } => {
                Some(error)
            }
            XPathError::ResultMismatch { .. } => None,
        }
    }

    pub fn is(&self, code: ErrorCode) -> bool {
        self.error().is_some_and(|e| e.is(code))
    }
}

/// Drives `produce` to completion, awaiting each suspension it reports.
pub(crate) async fn settle<T>(mut produce: impl FnMut() -> Result<Fetch<T>, Error>) -> Result<T, Error> {
    loop {
        match produce()? {
            Fetch::Ready(v) => return Ok(v),
            Fetch::Pending(suspension) => suspension.await,
        }
    }
}

/// Pulls every item of `stream`, awaiting suspensions.
pub(crate) async fn drain<N: XdmNode>(mut stream: XdmSequenceStream<N>) -> Result<XdmSequence<N>, Error> {
    let mut out = Vec::new();
    loop {
        match stream.pull()? {
            Pull::Done => return Ok(out),
            Pull::Ready(item) => out.push(item),
            Pull::Suspended(suspension) => suspension.await,
        }
    }
}

fn describe<N>(items: &[XdmItem<N>]) -> String {
    match items {
        [] => "the empty sequence".to_string(),
        [single] => single.describe(),
        many => format!("a sequence of {} items", many.len()),
    }
}

async fn atomized<N: XdmNode>(facade: &dyn DomFacade<N>, items: &[XdmItem<N>]) -> Result<Vec<AtomicValue>, Error> {
    settle(|| atomize(facade, items)).await
}

/// Converts a fully evaluated result to `return_type`.
pub(crate) async fn convert<N: XdmNode>(
    items: XdmSequence<N>,
    return_type: ReturnType,
    facade: &dyn DomFacade<N>,
    expression: &str,
) -> Result<XPathResult<N>, XPathError> {
    let dynamic = |e| XPathError::dynamic(expression, e);
    let mismatch = |items: &[XdmItem<N>]| XPathError::mismatch(expression, return_type, describe(items));
    Ok(match return_type {
        ReturnType::Any => XPathResult::Any(match items.as_slice() {
            [] => NativeValue::Null,
            [single] => NativeValue::from_item(single).map_err(dynamic)?,
            many => NativeValue::List(many.iter().map(NativeValue::from_item).collect::<Result<_, _>>().map_err(dynamic)?),
        }),
        ReturnType::Boolean => XPathResult::Boolean(effective_boolean_value(&items).map_err(dynamic)?),
        ReturnType::String => {
            let values = atomized(facade, &items).await.map_err(dynamic)?;
            XPathResult::String(itertools::join(values.iter().map(AtomicValue::lexical), " "))
        }
        ReturnType::Strings => {
            let values = atomized(facade, &items).await.map_err(dynamic)?;
            XPathResult::Strings(values.iter().map(AtomicValue::lexical).collect())
        }
        ReturnType::Number => {
            let first = match items.first() {
                Some(item) => atomized(facade, std::slice::from_ref(item)).await.map_err(dynamic)?.into_iter().next(),
                None => None,
            };
            XPathResult::Number(first.filter(AtomicValue::is_numeric).and_then(|a| a.to_f64()).unwrap_or(f64::NAN))
        }
        ReturnType::Numbers => {
            let values = atomized(facade, &items).await.map_err(dynamic)?;
            let mut numbers = Vec::with_capacity(values.len());
            for value in values {
                match value.to_f64().filter(|_| value.is_numeric()) {
                    Some(n) => numbers.push(n),
                    None => {
                        return Err(XPathError::mismatch(
                            expression,
                            return_type,
                            format!("a value of type {}", value.ty()),
                        ));
                    }
                }
            }
            XPathResult::Numbers(numbers)
        }
        ReturnType::Nodes => {
            if !items.iter().all(XdmItem::is_node) {
                return Err(mismatch(&items));
            }
            XPathResult::Nodes(items.into_iter().filter_map(|i| i.as_node().cloned()).collect())
        }
        ReturnType::FirstNode => match items.first() {
            None => XPathResult::FirstNode(None),
            Some(XdmItem::Node(n)) => XPathResult::FirstNode(Some(n.clone())),
            Some(_) => return Err(mismatch(&items)),
        },
        ReturnType::Map => match items.as_slice() {
            [XdmItem::Map(m)] => XPathResult::Map(m.clone()),
            other => return Err(mismatch(other)),
        },
        ReturnType::Array => match items.as_slice() {
            [XdmItem::Array(a)] => XPathResult::Array(a.clone()),
            other => return Err(mismatch(other)),
        },
        ReturnType::AllResults => XPathResult::AllResults(items),
        ReturnType::AsyncIterator => {
            XPathResult::AsyncIterator(ResultStream::new(XdmSequenceStream::from_vec(items), expression))
        }
    })
}

/// Result items delivered one at a time, each converted as [`ReturnType::Any`] converts a
/// single item. The underlying evaluation only runs as far as the stream is polled.
pub struct ResultStream<N> {
    source: Option<XdmSequenceStream<N>>,
    waiting: Option<Suspension>,
    expression: String,
}

impl<N: XdmNode> ResultStream<N> {
    pub(crate) fn new(source: XdmSequenceStream<N>, expression: &str) -> Self {
        Self { source: Some(source), waiting: None, expression: expression.to_string() }
    }

    /// The next item, or `None` once the sequence is exhausted or has failed.
    pub async fn next_item(&mut self) -> Option<Result<NativeValue<N>, XPathError>> {
        futures_lite::StreamExt::next(self).await
    }
}

impl<N: XdmNode> Stream for ResultStream<N> {
    type Item = Result<NativeValue<N>, XPathError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        loop {
            if let Some(waiting) = this.waiting.as_mut() {
                ready!(Pin::new(waiting).poll(cx));
                this.waiting = None;
            }
            let Some(source) = this.source.as_mut() else { return Poll::Ready(None) };
            let failed = match source.pull() {
                Ok(Pull::Done) => None,
                Ok(Pull::Ready(item)) => match NativeValue::from_item(&item) {
                    Ok(value) => return Poll::Ready(Some(Ok(value))),
                    Err(e) => Some(e),
                },
                Ok(Pull::Suspended(suspension)) => {
                    this.waiting = Some(suspension);
                    continue;
                }
                Err(e) => Some(e),
            };
            this.source = None;
            return Poll::Ready(failed.map(|e| Err(XPathError::dynamic(&this.expression, e))));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simple_node::{SimpleNode, SimpleTree, elem};
    use futures_lite::future::block_on;

    fn run(items: XdmSequence<SimpleNode>, ty: ReturnType) -> Result<XPathResult<SimpleNode>, XPathError> {
        block_on(convert(items, ty, &SimpleTree, "test"))
    }

    fn atoms(values: &[i64]) -> XdmSequence<SimpleNode> {
        values.iter().map(|v| XdmItem::Atomic(AtomicValue::integer(*v))).collect()
    }

    #[test]
    fn strings_are_space_joined() {
        let XPathResult::String(s) = run(atoms(&[1, 2, 3]), ReturnType::String).unwrap() else { panic!() };
        assert_eq!(s, "1 2 3");
    }

    #[test]
    fn non_numeric_numbers_are_nan() {
        let items = vec![XdmItem::Atomic(AtomicValue::string("x"))];
        let XPathResult::Number(n) = run(items, ReturnType::Number).unwrap() else { panic!() };
        assert!(n.is_nan());
        let XPathResult::Number(n) = run(Vec::new(), ReturnType::Number).unwrap() else { panic!() };
        assert!(n.is_nan());
    }

    #[test]
    fn atomic_results_do_not_convert_to_nodes() {
        let err = run(atoms(&[1]), ReturnType::Nodes).unwrap_err();
        assert!(matches!(err, XPathError::ResultMismatch { expected: ReturnType::Nodes, .. }));
        assert_eq!(err.expression(), "test");
    }

    #[test]
    fn maps_require_exactly_one_map() {
        let err = run(Vec::new(), ReturnType::Map).unwrap_err();
        assert!(err.to_string().contains("the empty sequence"));
    }

    #[test]
    fn any_maps_empty_to_null_and_lists_many_items() {
        let node = elem("a").build();
        let XPathResult::Any(v) = run(vec![XdmItem::Node(node.clone())], ReturnType::Any).unwrap() else { panic!() };
        assert_eq!(v, NativeValue::Node(node));
        let XPathResult::Any(v) = run(Vec::new(), ReturnType::Any).unwrap() else { panic!() };
        assert_eq!(v, NativeValue::Null);
        let XPathResult::Any(v) = run(atoms(&[1, 2]), ReturnType::Any).unwrap() else { panic!() };
        assert!(matches!(v, NativeValue::List(ref l) if l.len() == 2));
    }

    #[test]
    fn streams_yield_items_then_end() {
        let XPathResult::AsyncIterator(mut stream) = run(atoms(&[4, 5]), ReturnType::AsyncIterator).unwrap() else {
            panic!()
        };
        let collected: Vec<_> = block_on(async {
            let mut out = Vec::new();
            while let Some(item) = stream.next_item().await {
                out.push(item.unwrap());
            }
            out
        });
        assert_eq!(collected, vec![NativeValue::Number(4.0), NativeValue::Number(5.0)]);
    }
}

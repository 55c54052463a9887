//! Root, steps, predicates, `/` and `!`.

use super::axes::{AxisCursor, is_forward, is_reverse, matches_test};
use super::{EResult, Operand, atomic_truth, no_context};
use crate::compiler::{Expression, ExpressionKind, NodeTest};
use crate::engine::context::{DynamicContext, ExecutionParameters};
use crate::engine::runtime::{Error, ErrorCode};
use crate::model::{NodeKind, XdmNode, traverse};
use crate::parser::ast::Axis;
use crate::xdm::{
    Fetch, Pull, SequenceCollector, XdmItem, XdmSequence, XdmSequenceStream, pull_or_pending, ready_or_pending,
    ready_or_suspend,
};
use std::rc::Rc;

pub(super) fn root<N: XdmNode>(ctx: &DynamicContext<N>, params: &ExecutionParameters<N>) -> EResult<XdmSequenceStream<N>> {
    let node = match &ctx.item {
        None => return Ok(XdmSequenceStream::error(no_context())),
        Some(XdmItem::Node(n)) => n.clone(),
        Some(_) => {
            return Ok(XdmSequenceStream::error(Error::from_code(
                ErrorCode::XPTY0020,
                "the context item for '/' is not a node",
            )));
        }
    };
    let facade = Rc::clone(&params.facade);
    Ok(XdmSequenceStream::deferred(move || {
        let top = ready_or_pending!(traverse::root(&*facade, &node));
        if top.kind() != NodeKind::Document {
            return Err(Error::from_code(ErrorCode::XPDY0050, "the root of the context node is not a document node"));
        }
        Ok(Fetch::Ready(vec![XdmItem::Node(top)]))
    }))
}

/// The nodes of one axis from one origin, filtered by the node test.
fn axis_stream<N: XdmNode>(axis: Axis, test: NodeTest, origin: N, params: &ExecutionParameters<N>) -> XdmSequenceStream<N> {
    let facade = Rc::clone(&params.facade);
    let mut cursor = AxisCursor::new(axis, origin);
    XdmSequenceStream::new(move || {
        loop {
            match ready_or_suspend!(cursor.next(&*facade)) {
                None => return Ok(Pull::Done),
                Some(n) if matches_test(&test, axis, &n) => return Ok(Pull::Ready(XdmItem::Node(n))),
                Some(_) => {}
            }
        }
    })
}

pub(super) fn step<N: XdmNode>(
    axis: Axis,
    test: &NodeTest,
    predicates: &[Rc<Expression>],
    ctx: &DynamicContext<N>,
    params: &ExecutionParameters<N>,
) -> EResult<XdmSequenceStream<N>> {
    let origin = match &ctx.item {
        None => return Ok(XdmSequenceStream::error(no_context())),
        Some(XdmItem::Node(n)) => n.clone(),
        Some(_) => {
            return Ok(XdmSequenceStream::error(Error::from_code(
                ErrorCode::XPTY0020,
                "an axis step requires the context item to be a node",
            )));
        }
    };
    let mut stream = axis_stream(axis, test.clone(), origin, params);
    for predicate in predicates {
        stream = filter_stream(stream, Rc::clone(predicate), ctx, params);
    }
    if is_reverse(axis) {
        // predicates saw proximity positions; the result is in document order
        let mut collector = SequenceCollector::new(stream);
        return Ok(XdmSequenceStream::deferred(move || {
            let mut items = ready_or_pending!(collector.poll_collect()?);
            items.reverse();
            Ok(Fetch::Ready(items))
        }));
    }
    Ok(stream)
}

pub(super) fn filter<N: XdmNode>(
    base: &Rc<Expression>,
    predicate: &Rc<Expression>,
    ctx: &DynamicContext<N>,
    params: &ExecutionParameters<N>,
) -> EResult<XdmSequenceStream<N>> {
    let input = base.evaluate(ctx, params)?;
    Ok(filter_stream(input, Rc::clone(predicate), ctx, params))
}

/// The value of a predicate for one item: a numeric singleton tests the position,
/// anything else its effective boolean value.
struct PredicateTest<N> {
    stream: XdmSequenceStream<N>,
    first: Option<XdmItem<N>>,
}

impl<N: XdmNode> PredicateTest<N> {
    fn poll(&mut self, position: usize) -> EResult<Fetch<bool>> {
        if self.first.is_none() {
            match pull_or_pending!(self.stream) {
                None => return Ok(Fetch::Ready(false)),
                Some(XdmItem::Node(_)) => return Ok(Fetch::Ready(true)),
                Some(item) => self.first = Some(item),
            }
        }
        if pull_or_pending!(self.stream).is_some() {
            return Err(Error::from_code(
                ErrorCode::FORG0006,
                "a predicate yielded two or more items starting with an atomic value",
            ));
        }
        let truth = match self.first.take() {
            Some(XdmItem::Atomic(a)) if a.is_numeric() => a.to_f64().is_some_and(|f| f == position as f64),
            Some(XdmItem::Atomic(a)) => atomic_truth(&a)?,
            Some(_) => {
                return Err(Error::from_code(ErrorCode::FORG0006, "a function item has no effective boolean value"));
            }
            None => false,
        };
        Ok(Fetch::Ready(truth))
    }
}

/// A literal positional predicate such as `[3]`: no item after that position can match.
fn literal_position(predicate: &Expression) -> Option<f64> {
    match &predicate.kind {
        ExpressionKind::Literal(v) if v.is_numeric() => v.to_f64(),
        _ => None,
    }
}

enum Source<N> {
    Streaming(XdmSequenceStream<N>),
    /// `last()` is used, so the whole input is collected first.
    Collecting(SequenceCollector<N>),
    Collected(std::vec::IntoIter<XdmItem<N>>),
}

pub(super) fn filter_stream<N: XdmNode>(
    input: XdmSequenceStream<N>,
    predicate: Rc<Expression>,
    ctx: &DynamicContext<N>,
    params: &ExecutionParameters<N>,
) -> XdmSequenceStream<N> {
    let (ctx, params) = (ctx.clone(), params.clone());
    let stop_after = literal_position(&predicate);
    let mut source =
        if predicate.uses_last() { Source::Collecting(SequenceCollector::new(input)) } else { Source::Streaming(input) };
    let mut size = 0;
    let mut position = 0;
    let mut current: Option<(XdmItem<N>, PredicateTest<N>)> = None;
    XdmSequenceStream::new(move || {
        loop {
            if current.is_none() {
                if stop_after.is_some_and(|p| position as f64 >= p) {
                    return Ok(Pull::Done);
                }
                let next = match &mut source {
                    Source::Streaming(s) => s.pull()?,
                    Source::Collecting(c) => {
                        let items = ready_or_suspend!(c.poll_collect()?);
                        size = items.len();
                        source = Source::Collected(items.into_iter());
                        continue;
                    }
                    Source::Collected(it) => Pull::from(it.next()),
                };
                let item = match next {
                    Pull::Ready(item) => item,
                    Pull::Done => return Ok(Pull::Done),
                    Pull::Suspended(s) => return Ok(Pull::Suspended(s)),
                };
                position += 1;
                let focus = ctx.with_focus(item.clone(), position, size);
                let test = PredicateTest { stream: predicate.evaluate(&focus, &params)?, first: None };
                current = Some((item, test));
            }
            let Some((_, test)) = current.as_mut() else { continue };
            let keep = ready_or_suspend!(test.poll(position)?);
            let taken = current.take();
            if keep && let Some((item, _)) = taken {
                return Ok(Pull::Ready(item));
            }
        }
    })
}

enum PathState<N> {
    Left(Operand<N>),
    Streaming(XdmSequenceStream<N>),
    Mapping { contexts: std::vec::IntoIter<XdmItem<N>>, size: usize, position: usize, current: Option<XdmSequenceStream<N>>, results: XdmSequence<N> },
    Ordering(XdmSequence<N>),
    Output(std::vec::IntoIter<XdmItem<N>>),
}

fn forward_step(expr: &Expression) -> bool {
    matches!(&expr.kind, ExpressionKind::Step { axis, .. } if is_forward(*axis))
}

/// `E1/E2`: every node of `E1` becomes the focus of `E2`. Node results are put in
/// document order without duplicates; atomic results keep their order.
pub(super) fn path<N: XdmNode>(
    left: &Rc<Expression>,
    right: &Rc<Expression>,
    ctx: &DynamicContext<N>,
    params: &ExecutionParameters<N>,
) -> EResult<XdmSequenceStream<N>> {
    let mut state = PathState::Left(Operand::new(left, ctx, params)?);
    let (right, ctx, params) = (Rc::clone(right), ctx.clone(), params.clone());
    let streamable = forward_step(&right);
    Ok(XdmSequenceStream::new(move || {
        loop {
            match &mut state {
                PathState::Left(op) => {
                    ready_or_suspend!(op.poll()?);
                    let items = op.items().to_vec();
                    if let Some(bad) = items.iter().find(|i| !i.is_node()) {
                        return Err(Error::from_code(
                            ErrorCode::XPTY0019,
                            format!("the left operand of '/' must yield nodes, got {}", bad.describe()),
                        ));
                    }
                    state = if streamable && items.len() == 1 {
                        let focus = ctx.with_focus(items[0].clone(), 1, 1);
                        PathState::Streaming(right.evaluate(&focus, &params)?)
                    } else {
                        let size = items.len();
                        PathState::Mapping { contexts: items.into_iter(), size, position: 0, current: None, results: Vec::new() }
                    };
                }
                PathState::Streaming(s) => return s.pull(),
                PathState::Mapping { contexts, size, position, current, results } => {
                    if current.is_none() {
                        match contexts.next() {
                            Some(item) => {
                                *position += 1;
                                let focus = ctx.with_focus(item, *position, *size);
                                *current = Some(right.evaluate(&focus, &params)?);
                            }
                            None => {
                                state = PathState::Ordering(std::mem::take(results));
                                continue;
                            }
                        }
                    }
                    if let Some(stream) = current.as_mut() {
                        match stream.pull()? {
                            Pull::Ready(item) => results.push(item),
                            Pull::Done => *current = None,
                            Pull::Suspended(s) => return Ok(Pull::Suspended(s)),
                        }
                    }
                }
                PathState::Ordering(results) => {
                    let nodes = results.iter().filter(|i| i.is_node()).count();
                    let ordered = if nodes == 0 {
                        std::mem::take(results)
                    } else if nodes == results.len() {
                        let list: Vec<N> = results.iter().filter_map(|i| i.as_node().cloned()).collect();
                        let sorted = ready_or_suspend!(params.order.sort_unique(&*params.facade, list));
                        sorted.into_iter().map(XdmItem::Node).collect()
                    } else {
                        return Err(Error::from_code(
                            ErrorCode::XPTY0018,
                            "the result of a path expression mixes nodes and atomic values",
                        ));
                    };
                    state = PathState::Output(ordered.into_iter());
                }
                PathState::Output(it) => return Ok(Pull::from(it.next())),
            }
        }
    }))
}

/// `E1 ! E2`, streaming over `E1` unless `E2` needs the context size.
pub(super) fn simple_map<N: XdmNode>(
    left: &Rc<Expression>,
    right: &Rc<Expression>,
    ctx: &DynamicContext<N>,
    params: &ExecutionParameters<N>,
) -> EResult<XdmSequenceStream<N>> {
    let mut source = if right.uses_last() {
        Source::Collecting(SequenceCollector::new(left.evaluate(ctx, params)?))
    } else {
        Source::Streaming(left.evaluate(ctx, params)?)
    };
    let (right, ctx, params) = (Rc::clone(right), ctx.clone(), params.clone());
    let mut size = 0;
    let mut position = 0;
    let mut current: Option<XdmSequenceStream<N>> = None;
    Ok(XdmSequenceStream::new(move || {
        loop {
            if let Some(stream) = current.as_mut() {
                match stream.pull()? {
                    Pull::Done => current = None,
                    other => return Ok(other),
                }
                continue;
            }
            let next = match &mut source {
                Source::Streaming(s) => s.pull()?,
                Source::Collecting(c) => {
                    let items = ready_or_suspend!(c.poll_collect()?);
                    size = items.len();
                    source = Source::Collected(items.into_iter());
                    continue;
                }
                Source::Collected(it) => Pull::from(it.next()),
            };
            match next {
                Pull::Ready(item) => {
                    position += 1;
                    current = Some(right.evaluate(&ctx.with_focus(item, position, size), &params)?);
                }
                other => return Ok(other),
            }
        }
    }))
}

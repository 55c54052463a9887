//! FLWOR expressions and quantifiers as a pipeline of tuple streams.
//!
//! A tuple is a [`DynamicContext`] carrying the clause variables bound so far. Each clause
//! wraps the stream of its predecessor; only `order by` has to see every tuple before
//! producing one.

use super::comparison::sort_compare;
use super::{EResult, Ebv, Operand, atomize_optional, boolean};
use crate::compiler::{Expression, FlworClause, OrderKeySpec};
use crate::engine::context::{DynamicContext, ExecutionParameters};
use crate::engine::runtime::{Error, ErrorCode};
use crate::model::XdmNode;
use crate::types::SequenceType;
use crate::util::try_merge_sort;
use crate::xdm::{
    AtomicValue, ExpandedName, Fetch, Pull, SequenceCollector, SharedSequence, XdmItem, XdmSequenceStream,
    pull_or_pending, pull_or_suspend, ready_or_pending, ready_or_suspend,
};
use std::cmp::Ordering;
use std::rc::Rc;

type TuplePull<N> = EResult<Pull<DynamicContext<N>>>;

struct Tuples<N>(Box<dyn FnMut() -> TuplePull<N>>);

impl<N: XdmNode> Tuples<N> {
    fn new(f: impl FnMut() -> TuplePull<N> + 'static) -> Self {
        Self(Box::new(f))
    }

    fn start(ctx: &DynamicContext<N>) -> Self {
        let mut first = Some(ctx.clone());
        Self::new(move || Ok(first.take().into()))
    }

    fn pull(&mut self) -> TuplePull<N> {
        (self.0)()
    }
}

fn mismatch(var: &ExpandedName, ty: &SequenceType) -> Error {
    Error::from_code(ErrorCode::XPTY0004, format!("the value of ${var} does not match {ty}"))
}

fn for_clause<N: XdmNode>(
    mut upstream: Tuples<N>,
    var: ExpandedName,
    ty: Option<SequenceType>,
    allowing_empty: bool,
    position: Option<ExpandedName>,
    source: Rc<Expression>,
    params: ExecutionParameters<N>,
) -> Tuples<N> {
    let mut current: Option<(DynamicContext<N>, XdmSequenceStream<N>, usize)> = None;
    let bind = move |tuple: &DynamicContext<N>, items: Vec<XdmItem<N>>, pos: usize| {
        let out = tuple.bind_items(var.clone(), items);
        match &position {
            Some(p) => out.bind_items(p.clone(), vec![XdmItem::Atomic(AtomicValue::integer(pos as i64))]),
            None => out,
        }
    };
    Tuples::new(move || {
        loop {
            if current.is_none() {
                let Some(tuple) = pull_or_suspend!(upstream) else { return Ok(Pull::Done) };
                let stream = source.evaluate(&tuple, &params)?;
                current = Some((tuple, stream, 0));
            }
            let Some((tuple, stream, pos)) = current.as_mut() else { continue };
            match stream.pull()? {
                Pull::Ready(item) => {
                    *pos += 1;
                    if let Some(ty) = &ty
                        && !ty.matches(std::slice::from_ref(&item))
                    {
                        return Err(Error::from_code(ErrorCode::XPTY0004, format!("for-clause item {item:?} does not match {ty}")));
                    }
                    return Ok(Pull::Ready(bind(tuple, vec![item], *pos)));
                }
                Pull::Suspended(s) => return Ok(Pull::Suspended(s)),
                Pull::Done => {
                    let empty = *pos == 0 && allowing_empty;
                    let finished = current.take();
                    if empty && let Some((tuple, _, _)) = finished {
                        return Ok(Pull::Ready(bind(&tuple, Vec::new(), 0)));
                    }
                }
            }
        }
    })
}

/// Checks a `let` binding against its declared type once the value is complete.
fn matching_stream<N: XdmNode>(stream: XdmSequenceStream<N>, var: ExpandedName, ty: SequenceType) -> XdmSequenceStream<N> {
    let mut collector = SequenceCollector::new(stream);
    XdmSequenceStream::deferred(move || {
        let items = ready_or_pending!(collector.poll_collect()?);
        if !ty.matches(&items) {
            return Err(mismatch(&var, &ty));
        }
        Ok(Fetch::Ready(items))
    })
}

fn let_clause<N: XdmNode>(
    mut upstream: Tuples<N>,
    var: ExpandedName,
    ty: Option<SequenceType>,
    value: Rc<Expression>,
    params: ExecutionParameters<N>,
) -> Tuples<N> {
    Tuples::new(move || {
        let Some(tuple) = pull_or_suspend!(upstream) else { return Ok(Pull::Done) };
        let mut stream = value.evaluate(&tuple, &params)?;
        if let Some(ty) = &ty {
            stream = matching_stream(stream, var.clone(), ty.clone());
        }
        Ok(Pull::Ready(tuple.bind(var.clone(), SharedSequence::new(stream))))
    })
}

fn where_clause<N: XdmNode>(
    mut upstream: Tuples<N>,
    condition: Rc<Expression>,
    params: ExecutionParameters<N>,
) -> Tuples<N> {
    let mut pending: Option<(DynamicContext<N>, Ebv<N>)> = None;
    Tuples::new(move || {
        loop {
            if pending.is_none() {
                let Some(tuple) = pull_or_suspend!(upstream) else { return Ok(Pull::Done) };
                let test = Ebv::new(&condition, &tuple, &params)?;
                pending = Some((tuple, test));
            }
            let Some((_, test)) = pending.as_mut() else { continue };
            let keep = ready_or_suspend!(test.poll()?);
            let taken = pending.take();
            if keep && let Some((tuple, _)) = taken {
                return Ok(Pull::Ready(tuple));
            }
        }
    })
}

fn count_clause<N: XdmNode>(mut upstream: Tuples<N>, var: ExpandedName) -> Tuples<N> {
    let mut count = 0i64;
    Tuples::new(move || {
        let Some(tuple) = pull_or_suspend!(upstream) else { return Ok(Pull::Done) };
        count += 1;
        Ok(Pull::Ready(tuple.bind_items(var.clone(), vec![XdmItem::Atomic(AtomicValue::integer(count))])))
    })
}

type Row<N> = (DynamicContext<N>, Vec<Option<AtomicValue>>);

fn compare_rows<N>(a: &Row<N>, b: &Row<N>, specs: &[OrderKeySpec], implicit_tz: i16) -> EResult<Ordering> {
    for (i, spec) in specs.iter().enumerate() {
        let (x, y) = (a.1.get(i).and_then(Option::as_ref), b.1.get(i).and_then(Option::as_ref));
        let ord = sort_compare(x, y, spec.empty_greatest, implicit_tz)?;
        let ord = if spec.descending { ord.reverse() } else { ord };
        if ord.is_ne() {
            return Ok(ord);
        }
    }
    Ok(Ordering::Equal)
}

/// Collects every tuple with its sort keys, then replays them sorted. The sort is stable,
/// so `stable order by` needs nothing extra.
fn order_by<N: XdmNode>(mut upstream: Tuples<N>, specs: Vec<OrderKeySpec>, params: ExecutionParameters<N>) -> Tuples<N> {
    let mut rows: Vec<Row<N>> = Vec::new();
    let mut current: Option<(DynamicContext<N>, Vec<Operand<N>>)> = None;
    let mut sorted: Option<std::vec::IntoIter<Row<N>>> = None;
    Tuples::new(move || {
        loop {
            if let Some(out) = sorted.as_mut() {
                return Ok(out.next().map(|(tuple, _)| tuple).into());
            }
            if current.is_none() {
                match pull_or_suspend!(upstream) {
                    Some(tuple) => {
                        let keys =
                            specs.iter().map(|s| Operand::new(&s.key, &tuple, &params)).collect::<EResult<Vec<_>>>()?;
                        current = Some((tuple, keys));
                    }
                    None => {
                        let tz = params.implicit_timezone;
                        let all = try_merge_sort(std::mem::take(&mut rows), |a, b| compare_rows(a, b, &specs, tz))?;
                        sorted = Some(all.into_iter());
                        continue;
                    }
                }
            }
            let Some((_, keys)) = current.as_mut() else { continue };
            let mut values = Vec::with_capacity(keys.len());
            for key in keys.iter_mut() {
                ready_or_suspend!(key.poll()?);
                values.push(ready_or_suspend!(atomize_optional(&params, key.items(), "an order by key")?));
            }
            if let Some((tuple, _)) = current.take() {
                rows.push((tuple, values));
            }
        }
    })
}

fn tuple_stream<N: XdmNode>(
    clauses: &[FlworClause],
    ctx: &DynamicContext<N>,
    params: &ExecutionParameters<N>,
) -> Tuples<N> {
    let mut tuples = Tuples::start(ctx);
    for clause in clauses {
        let params = params.clone();
        tuples = match clause {
            FlworClause::For { var, ty, allowing_empty, position, source } => for_clause(
                tuples,
                var.clone(),
                ty.clone(),
                *allowing_empty,
                position.clone(),
                Rc::clone(source),
                params,
            ),
            FlworClause::Let { var, ty, value } => let_clause(tuples, var.clone(), ty.clone(), Rc::clone(value), params),
            FlworClause::Where(condition) => where_clause(tuples, Rc::clone(condition), params),
            FlworClause::OrderBy { specs, .. } => order_by(tuples, specs.clone(), params),
            FlworClause::Count(var) => count_clause(tuples, var.clone()),
        };
    }
    tuples
}

pub(super) fn flwor<N: XdmNode>(
    clauses: &[FlworClause],
    result: &Rc<Expression>,
    ctx: &DynamicContext<N>,
    params: &ExecutionParameters<N>,
) -> EResult<XdmSequenceStream<N>> {
    let mut tuples = tuple_stream(clauses, ctx, params);
    let (result, params) = (Rc::clone(result), params.clone());
    let mut current: Option<XdmSequenceStream<N>> = None;
    Ok(XdmSequenceStream::new(move || {
        loop {
            if current.is_none() {
                let Some(tuple) = pull_or_suspend!(tuples) else { return Ok(Pull::Done) };
                current = Some(result.evaluate(&tuple, &params)?);
            }
            let Some(stream) = current.as_mut() else { continue };
            match stream.pull()? {
                Pull::Done => current = None,
                other => return Ok(other),
            }
        }
    }))
}

/// `some` stops at the first satisfying binding, `every` at the first failing one.
pub(super) fn quantified<N: XdmNode>(
    every: bool,
    bindings: &[(ExpandedName, Rc<Expression>)],
    satisfies: &Rc<Expression>,
    ctx: &DynamicContext<N>,
    params: &ExecutionParameters<N>,
) -> EResult<XdmSequenceStream<N>> {
    let clauses: Vec<FlworClause> = bindings
        .iter()
        .map(|(var, source)| FlworClause::For {
            var: var.clone(),
            ty: None,
            allowing_empty: false,
            position: None,
            source: Rc::clone(source),
        })
        .collect();
    let mut tuples = tuple_stream(&clauses, ctx, params);
    let (satisfies, params) = (Rc::clone(satisfies), params.clone());
    let mut current: Option<Ebv<N>> = None;
    Ok(XdmSequenceStream::deferred(move || {
        loop {
            if current.is_none() {
                match pull_or_pending!(tuples) {
                    Some(tuple) => current = Some(Ebv::new(&satisfies, &tuple, &params)?),
                    None => return Ok(Fetch::Ready(vec![boolean(every)])),
                }
            }
            let Some(test) = current.as_mut() else { continue };
            let holds = ready_or_pending!(test.poll()?);
            current = None;
            if holds != every {
                return Ok(Fetch::Ready(vec![boolean(!every)]));
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(keys: Vec<Option<AtomicValue>>) -> Row<()> {
        (DynamicContext::default(), keys)
    }

    fn spec(descending: bool, empty_greatest: bool) -> OrderKeySpec {
        OrderKeySpec { key: Expression::empty(), descending, empty_greatest }
    }

    #[test]
    fn later_keys_break_ties() {
        let specs = [spec(false, false), spec(true, false)];
        let a = row(vec![Some(AtomicValue::integer(1)), Some(AtomicValue::integer(1))]);
        let b = row(vec![Some(AtomicValue::integer(1)), Some(AtomicValue::integer(2))]);
        assert_eq!(compare_rows(&a, &b, &specs, 0).unwrap(), Ordering::Greater);
    }

    #[test]
    fn descending_keeps_empty_placement_reversed() {
        let specs = [spec(true, false)];
        let empty = row(vec![None]);
        let one = row(vec![Some(AtomicValue::integer(1))]);
        assert_eq!(compare_rows(&empty, &one, &specs, 0).unwrap(), Ordering::Greater);
    }

    #[test]
    fn mixed_key_types_are_an_error() {
        let specs = [spec(false, false)];
        let a = row(vec![Some(AtomicValue::integer(1))]);
        let b = row(vec![Some(AtomicValue::string("x"))]);
        assert!(compare_rows(&a, &b, &specs, 0).unwrap_err().is(ErrorCode::XPTY0004));
    }
}

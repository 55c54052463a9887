//! `union`, `intersect` and `except` over node sequences.

use super::{EResult, Operand};
use crate::compiler::Expression;
use crate::engine::context::{DynamicContext, ExecutionParameters};
use crate::engine::runtime::{Error, ErrorCode};
use crate::model::XdmNode;
use crate::parser::ast::SetOp;
use crate::xdm::{Fetch, XdmItem, XdmSequenceStream, ready_or_pending};
use std::collections::HashSet;
use std::rc::Rc;

fn nodes_of<N: XdmNode>(op: SetOp, items: &[XdmItem<N>]) -> EResult<Vec<N>> {
    items
        .iter()
        .map(|item| match item {
            XdmItem::Node(n) => Ok(n.clone()),
            other => Err(Error::from_code(
                ErrorCode::XPTY0004,
                format!("{op:?} requires node operands, got {other:?}"),
            )),
        })
        .collect()
}

/// Combines two node lists; the result still needs ordering.
pub(crate) fn combine<N: Eq + std::hash::Hash>(op: SetOp, left: Vec<N>, right: Vec<N>) -> Vec<N> {
    match op {
        SetOp::Union => {
            let mut all = left;
            all.extend(right);
            all
        }
        SetOp::Intersect => {
            let keep: HashSet<N> = right.into_iter().collect();
            left.into_iter().filter(|n| keep.contains(n)).collect()
        }
        SetOp::Except => {
            let drop: HashSet<N> = right.into_iter().collect();
            left.into_iter().filter(|n| !drop.contains(n)).collect()
        }
    }
}

pub(super) fn evaluate<N: XdmNode>(
    op: SetOp,
    left: &Rc<Expression>,
    right: &Rc<Expression>,
    ctx: &DynamicContext<N>,
    params: &ExecutionParameters<N>,
) -> EResult<XdmSequenceStream<N>> {
    let mut l = Operand::new(left, ctx, params)?;
    let mut r = Operand::new(right, ctx, params)?;
    let params = params.clone();
    Ok(XdmSequenceStream::deferred(move || {
        ready_or_pending!(l.poll()?);
        ready_or_pending!(r.poll()?);
        let combined = combine(op, nodes_of(op, l.items())?, nodes_of(op, r.items())?);
        let sorted = ready_or_pending!(params.order.sort_unique(&*params.facade, combined));
        Ok(Fetch::Ready(sorted.into_iter().map(XdmItem::Node).collect()))
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intersect_and_except_partition_the_left_side() {
        let left = vec![1, 2, 3, 4];
        let right = vec![2, 4, 6];
        assert_eq!(combine(SetOp::Intersect, left.clone(), right.clone()), vec![2, 4]);
        assert_eq!(combine(SetOp::Except, left, right), vec![1, 3]);
    }
}

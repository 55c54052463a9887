//! `copy $v := source modify updates return result`.

use super::UpdateApplier;
use crate::compiler::Expression;
use crate::engine::context::{DynamicContext, ExecutionParameters};
use crate::engine::evaluator::constructors::{build, snapshot};
use crate::engine::evaluator::{EResult, Operand, lazy_stream, missing_factory};
use crate::engine::runtime::{Error, ErrorCode};
use crate::model::{XdmNode, traverse};
use crate::xdm::{ExpandedName, Fetch, XdmItem, XdmSequenceStream, ready_or_pending};
use std::rc::Rc;

enum Stage<N> {
    Copying,
    Modifying { copies: Vec<N>, scope: DynamicContext<N>, inner: ExecutionParameters<N>, modify: Operand<N> },
    Applying { copies: Vec<N>, scope: DynamicContext<N>, applier: UpdateApplier<N> },
}

pub(crate) fn evaluate<N: XdmNode>(
    copies: &[(ExpandedName, Rc<Expression>)],
    modify: &Rc<Expression>,
    result: &Rc<Expression>,
    ctx: &DynamicContext<N>,
    params: &ExecutionParameters<N>,
) -> EResult<XdmSequenceStream<N>> {
    let mut sources = copies
        .iter()
        .map(|(name, source)| Ok((name.clone(), Operand::new(source, ctx, params)?)))
        .collect::<EResult<Vec<_>>>()?;
    let (modify, result, ctx, params) = (Rc::clone(modify), Rc::clone(result), ctx.clone(), params.clone());
    let mut stage = Stage::Copying;
    Ok(lazy_stream(move || {
        let (factory, writer) = match (&params.factory, &params.writer) {
            (Some(f), Some(w)) => (Rc::clone(f), Rc::clone(w)),
            _ => return Err(missing_factory()),
        };
        if let Stage::Copying = stage {
            let mut snapshots = Vec::with_capacity(sources.len());
            for (name, source) in sources.iter_mut() {
                ready_or_pending!(source.poll()?);
                let [XdmItem::Node(node)] = source.items() else {
                    return Err(Error::from_code(
                        ErrorCode::XUTY0013,
                        format!("${name} must be bound to exactly one node to be copied"),
                    ));
                };
                snapshots.push(ready_or_pending!(snapshot(&*params.facade, node)));
            }
            let mut scope = ctx.clone();
            let mut copies = Vec::with_capacity(snapshots.len());
            for ((name, _), snap) in sources.iter().zip(&snapshots) {
                let copy = build(snap, &*factory, &*writer)?;
                scope = scope.bind_items(name.clone(), vec![XdmItem::Node(copy.clone())]);
                copies.push(copy);
            }
            let inner = params.with_fresh_updates();
            let modify = Operand::new(&modify, &scope, &inner)?;
            stage = Stage::Modifying { copies, scope, inner, modify };
        }
        if let Stage::Modifying { copies, scope, inner, modify } = &mut stage {
            ready_or_pending!(modify.poll()?);
            let targets: Vec<N> = inner
                .updates
                .borrow()
                .iter()
                .filter(|u| !matches!(u, super::PendingUpdate::Put { .. }))
                .map(|u| u.target().clone())
                .collect();
            for target in &targets {
                let root = ready_or_pending!(traverse::root(&*params.facade, target));
                if !copies.contains(&root) {
                    return Err(Error::from_code(
                        ErrorCode::XUDY0014,
                        "the modify clause can only change the copied nodes",
                    ));
                }
            }
            let applier =
                UpdateApplier::new(inner.take_updates(), Rc::clone(&params.facade), Some(factory), writer)?;
            stage = Stage::Applying { copies: std::mem::take(copies), scope: scope.clone(), applier };
        }
        let Stage::Applying { copies, scope, applier } = &mut stage else {
            return Ok(Fetch::Ready(XdmSequenceStream::empty()));
        };
        ready_or_pending!(applier.poll()?);
        // Renamed copies are new nodes; rebind the variables to them.
        let mut bound = scope.clone();
        for ((name, _), copy) in sources.iter().zip(copies.iter()) {
            bound = bound.bind_items(name.clone(), vec![XdmItem::Node(applier.current(copy))]);
        }
        Ok(Fetch::Ready(result.evaluate(&bound, &params)?))
    }))
}

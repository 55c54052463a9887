//! Evaluation of the expression graph into lazy item streams.
//!
//! Every [`Expression`] evaluates to an [`XdmSequenceStream`]. Cursors own clones of
//! their operand expressions, the dynamic context and the execution parameters, so the
//! resulting streams are `'static` and may outlive the call that created them.
//! Evaluating is cheap; work happens when the stream is pulled.

pub(crate) mod arithmetic;
pub(crate) mod axes;
mod calls;
pub(crate) mod comparison;
pub(crate) mod constructors;
mod flwor;
mod paths;
mod set_ops;
pub(crate) mod structures;
pub(crate) mod type_check;

pub(crate) use calls::invoke_function;

use crate::compiler::{Expression, ExpressionKind as K};
use crate::engine::context::{DynamicContext, ExecutionParameters};
use crate::engine::runtime::{Error, ErrorCode};
use crate::model::XdmNode;
use crate::types::atomize::atomic_ebv;
use crate::types::{atomize, effective_boolean_value};
use crate::xdm::{
    AtomicValue, Fetch, Pull, SequenceCollector, SharedSequence, XdmItem, XdmSequence, XdmSequenceStream,
    pull_or_pending, ready_or_pending,
};
use std::rc::Rc;

pub(crate) type EResult<T> = Result<T, Error>;

/// A sub-expression collected to completion across suspensions.
pub(crate) struct Operand<N> {
    collector: SequenceCollector<N>,
    items: Option<XdmSequence<N>>,
}

impl<N: XdmNode> Operand<N> {
    pub(crate) fn new(expr: &Expression, ctx: &DynamicContext<N>, params: &ExecutionParameters<N>) -> EResult<Self> {
        Ok(Self::from_stream(expr.evaluate(ctx, params)?))
    }

    pub(crate) fn from_stream(stream: XdmSequenceStream<N>) -> Self {
        Self { collector: SequenceCollector::new(stream), items: None }
    }

    pub(crate) fn poll(&mut self) -> EResult<Fetch<()>> {
        if self.items.is_none() {
            match self.collector.poll_collect()? {
                Fetch::Ready(v) => self.items = Some(v),
                Fetch::Pending(s) => return Ok(Fetch::Pending(s)),
            }
        }
        Ok(Fetch::Ready(()))
    }

    pub(crate) fn items(&self) -> &[XdmItem<N>] {
        self.items.as_deref().unwrap_or(&[])
    }
}

/// Effective boolean value computed from as few items as needed.
pub(crate) struct Ebv<N> {
    stream: XdmSequenceStream<N>,
    first: Option<XdmItem<N>>,
    result: Option<bool>,
}

impl<N: XdmNode> Ebv<N> {
    pub(crate) fn new(expr: &Expression, ctx: &DynamicContext<N>, params: &ExecutionParameters<N>) -> EResult<Self> {
        Ok(Self { stream: expr.evaluate(ctx, params)?, first: None, result: None })
    }

    pub(crate) fn poll(&mut self) -> EResult<Fetch<bool>> {
        if let Some(r) = self.result {
            return Ok(Fetch::Ready(r));
        }
        if self.first.is_none() {
            match pull_or_pending!(self.stream) {
                None => {
                    self.result = Some(false);
                    return Ok(Fetch::Ready(false));
                }
                Some(XdmItem::Node(_)) => {
                    self.result = Some(true);
                    return Ok(Fetch::Ready(true));
                }
                Some(item) => self.first = Some(item),
            }
        }
        let value = match pull_or_pending!(self.stream) {
            None => effective_boolean_value(std::slice::from_ref(self.first.as_ref().unwrap_or(&XdmItem::Atomic(AtomicValue::boolean(false)))))?,
            Some(_) => {
                return Err(Error::from_code(
                    ErrorCode::FORG0006,
                    "effective boolean value is not defined for a sequence of two or more items starting with an atomic value",
                ));
            }
        };
        self.result = Some(value);
        Ok(Fetch::Ready(value))
    }
}

pub(crate) fn boolean<N>(b: bool) -> XdmItem<N> {
    XdmItem::Atomic(AtomicValue::boolean(b))
}

pub(crate) fn no_context() -> Error {
    Error::from_code(ErrorCode::XPDY0002, "the context item is absent")
}

pub(crate) fn missing_factory() -> Error {
    Error::from_code(ErrorCode::FOER0000, "node construction requires a nodes factory and a document writer")
}

/// Atomizes a sequence expected to hold at most one value.
pub(crate) fn atomize_optional<N: XdmNode>(
    params: &ExecutionParameters<N>,
    items: &[XdmItem<N>],
    what: &str,
) -> EResult<Fetch<Option<AtomicValue>>> {
    let mut values = ready_or_pending!(atomize(&*params.facade, items)?);
    if values.len() > 1 {
        return Err(Error::from_code(ErrorCode::XPTY0004, format!("{what} expects at most one atomic value")));
    }
    Ok(Fetch::Ready(values.pop()))
}

impl Expression {
    /// Evaluates this expression in the given context. The returned stream does the work.
    pub fn evaluate<N: XdmNode>(
        &self,
        ctx: &DynamicContext<N>,
        params: &ExecutionParameters<N>,
    ) -> EResult<XdmSequenceStream<N>> {
        match &self.kind {
            K::Literal(v) => Ok(XdmSequenceStream::once(XdmItem::Atomic(v.clone()))),
            K::Sequence(items) => Ok(sequence(items.clone(), ctx.clone(), params.clone())),
            K::Range(a, b) => arithmetic::range(a, b, ctx, params),
            K::ContextItem => Ok(match &ctx.item {
                Some(item) => XdmSequenceStream::once(item.clone()),
                None => XdmSequenceStream::error(no_context()),
            }),
            K::Variable(name) => Ok(match ctx.variables.lookup(name).or_else(|| params.initial.variables.lookup(name)) {
                Some(shared) => shared.reader(),
                None => XdmSequenceStream::error(Error::from_code(
                    ErrorCode::XPDY0002,
                    format!("no value is bound to ${name}"),
                )),
            }),
            K::ExternalVariable { name, default } => match params.initial.variables.lookup(name) {
                Some(shared) => Ok(shared.reader()),
                None => match default {
                    Some(d) => d.evaluate(&params.initial.without_focus(), params),
                    None => Ok(XdmSequenceStream::error(Error::from_code(
                        ErrorCode::XPDY0002,
                        format!("external variable ${name} has no value"),
                    ))),
                },
            },
            K::Global(global) => {
                let key = Rc::as_ptr(global) as usize;
                if let Some(shared) = params.globals.borrow().get(&key) {
                    return Ok(shared.reader());
                }
                let Some(init) = global.value.get() else {
                    return Ok(XdmSequenceStream::error(Error::from_code(
                        ErrorCode::XPDY0002,
                        format!("variable ${} is not initialized", global.name),
                    )));
                };
                let mut stream = init.evaluate(&params.initial, params)?;
                if let Some(ty) = global.ty.clone() {
                    stream = type_check::coerce_stream(stream, ty, params.clone());
                }
                let shared = SharedSequence::new(stream);
                params.globals.borrow_mut().insert(key, shared.clone());
                Ok(shared.reader())
            }
            K::Root => paths::root(ctx, params),
            K::Path(left, right) => paths::path(left, right, ctx, params),
            K::Step { axis, test, predicates } => paths::step(*axis, test, predicates, ctx, params),
            K::Filter { base, predicate } => paths::filter(base, predicate, ctx, params),
            K::SimpleMap(left, right) => paths::simple_map(left, right, ctx, params),
            K::Arithmetic { op, left, right } => arithmetic::binary(*op, left, right, ctx, params),
            K::Unary { negate, operand } => arithmetic::unary(*negate, operand, ctx, params),
            K::Concat(left, right) => arithmetic::concat(left, right, ctx, params),
            K::And(left, right) => Ok(logical(true, left, right, ctx, params)),
            K::Or(left, right) => Ok(logical(false, left, right, ctx, params)),
            K::ValueComparison { op, left, right } => comparison::value(*op, left, right, ctx, params),
            K::GeneralComparison { op, left, right } => comparison::general(*op, left, right, ctx, params),
            K::NodeComparison { op, left, right } => comparison::node(*op, left, right, ctx, params),
            K::SetOperation { op, left, right } => set_ops::evaluate(*op, left, right, ctx, params),
            K::If { condition, then_branch, else_branch } => {
                Ok(conditional(condition, Rc::clone(then_branch), Rc::clone(else_branch), ctx, params))
            }
            K::Flwor { clauses, result } => flwor::flwor(clauses, result, ctx, params),
            K::Quantified { every, bindings, satisfies } => flwor::quantified(*every, bindings, satisfies, ctx, params),
            K::InstanceOf(operand, ty) => type_check::instance_of(operand, ty, ctx, params),
            K::TreatAs(operand, ty) => type_check::treat_as(operand, ty, ctx, params),
            K::Castable { operand, target, optional } => {
                type_check::castable(operand, *target, *optional, ctx, params)
            }
            K::Cast { operand, target, optional } => type_check::cast(operand, *target, *optional, ctx, params),
            K::FunctionCall { name, params: types, args } => calls::static_call(name, types.clone(), args, ctx, params),
            K::DeclaredCall { function, args } => calls::declared_call(function, args, ctx, params),
            K::NamedFunctionRef { name, arity } => calls::named_function_ref(name, *arity, ctx, params),
            K::DeclaredFunctionRef(function) => Ok(calls::declared_function_ref(function)),
            K::InlineFunction { params: fparams, result, body } => {
                Ok(calls::inline_function(fparams, result, body, ctx))
            }
            K::DynamicCall { function, args } => calls::dynamic_call(function, args, ctx, params),
            K::MapConstructor(entries) => structures::map_constructor(entries, ctx, params),
            K::SquareArray(members) => structures::square_array(members, ctx, params),
            K::CurlyArray(content) => structures::curly_array(content, ctx, params),
            K::Lookup { base, key } => structures::lookup(base, key, ctx, params),
            K::UnaryLookup(key) => structures::unary_lookup(key, ctx, params),
            K::ElementConstructor { name, attributes, content } => {
                constructors::element(name, attributes, content, ctx, params)
            }
            K::AttributeConstructor { name, value } => constructors::attribute(name, value, ctx, params),
            K::TextConstructor(content) => constructors::text(content, ctx, params),
            K::CommentConstructor(content) => constructors::comment(content, ctx, params),
            K::PiConstructor { target, content } => constructors::processing_instruction(target, content, ctx, params),
            K::DocumentConstructor(content) => constructors::document(content, ctx, params),
            K::Insert { source, position, target } => crate::update::build::insert(source, *position, target, ctx, params),
            K::Delete(target) => crate::update::build::delete(target, ctx, params),
            K::ReplaceNode { target, replacement } => crate::update::build::replace_node(target, replacement, ctx, params),
            K::ReplaceValue { target, value } => crate::update::build::replace_value(target, value, ctx, params),
            K::Rename { target, name } => crate::update::build::rename(target, name, ctx, params),
            K::Transform { copies, modify, result } => crate::update::transform::evaluate(copies, modify, result, ctx, params),
        }
    }
}

/// The comma operator: operands are evaluated one after another as the stream advances.
fn sequence<N: XdmNode>(
    items: Vec<Rc<Expression>>,
    ctx: DynamicContext<N>,
    params: ExecutionParameters<N>,
) -> XdmSequenceStream<N> {
    let mut index = 0;
    let mut current: Option<XdmSequenceStream<N>> = None;
    XdmSequenceStream::new(move || {
        loop {
            if current.is_none() {
                let Some(expr) = items.get(index) else { return Ok(Pull::Done) };
                current = Some(expr.evaluate(&ctx, &params)?);
                index += 1;
            }
            let Some(stream) = current.as_mut() else { continue };
            match stream.pull()? {
                Pull::Done => current = None,
                other => return Ok(other),
            }
        }
    })
}

/// `and` (`conjunction = true`) or `or`, evaluating the right operand only when needed.
fn logical<N: XdmNode>(
    conjunction: bool,
    left: &Rc<Expression>,
    right: &Rc<Expression>,
    ctx: &DynamicContext<N>,
    params: &ExecutionParameters<N>,
) -> XdmSequenceStream<N> {
    let (right, ctx2, params2) = (Rc::clone(right), ctx.clone(), params.clone());
    let mut lhs = match Ebv::new(left, ctx, params) {
        Ok(e) => e,
        Err(e) => return XdmSequenceStream::error(e),
    };
    let mut rhs: Option<Ebv<N>> = None;
    XdmSequenceStream::deferred(move || {
        let l = ready_or_pending!(lhs.poll()?);
        if l != conjunction {
            return Ok(Fetch::Ready(vec![boolean(l)]));
        }
        if rhs.is_none() {
            rhs = Some(Ebv::new(&right, &ctx2, &params2)?);
        }
        let Some(r) = rhs.as_mut() else { return Ok(Fetch::Ready(Vec::new())) };
        let r = ready_or_pending!(r.poll()?);
        Ok(Fetch::Ready(vec![boolean(r)]))
    })
}

fn conditional<N: XdmNode>(
    condition: &Rc<Expression>,
    then_branch: Rc<Expression>,
    else_branch: Rc<Expression>,
    ctx: &DynamicContext<N>,
    params: &ExecutionParameters<N>,
) -> XdmSequenceStream<N> {
    let mut test = match Ebv::new(condition, ctx, params) {
        Ok(e) => e,
        Err(e) => return XdmSequenceStream::error(e),
    };
    let (ctx, params) = (ctx.clone(), params.clone());
    let mut chosen: Option<XdmSequenceStream<N>> = None;
    XdmSequenceStream::new(move || {
        if chosen.is_none() {
            let branch = match test.poll()? {
                Fetch::Ready(true) => &then_branch,
                Fetch::Ready(false) => &else_branch,
                Fetch::Pending(s) => return Ok(Pull::Suspended(s)),
            };
            chosen = Some(branch.evaluate(&ctx, &params)?);
        }
        match chosen.as_mut() {
            Some(stream) => stream.pull(),
            None => Ok(Pull::Done),
        }
    })
}

/// A stream whose source is only known once `start` completes, which may take several polls.
pub(crate) fn lazy_stream<N: XdmNode>(
    mut start: impl FnMut() -> EResult<Fetch<XdmSequenceStream<N>>> + 'static,
) -> XdmSequenceStream<N> {
    let mut inner: Option<XdmSequenceStream<N>> = None;
    XdmSequenceStream::new(move || {
        if inner.is_none() {
            match start()? {
                Fetch::Ready(stream) => inner = Some(stream),
                Fetch::Pending(s) => return Ok(Pull::Suspended(s)),
            }
        }
        match inner.as_mut() {
            Some(stream) => stream.pull(),
            None => Ok(Pull::Done),
        }
    })
}

/// Effective boolean value of one atomic value, used by predicates.
pub(crate) fn atomic_truth(value: &AtomicValue) -> EResult<bool> {
    atomic_ebv(value)
}

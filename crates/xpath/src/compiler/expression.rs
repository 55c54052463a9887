//! The executable expression graph produced by the compiler.

use crate::model::{NodeKind, XdmNode};
use crate::parser::ast::{ArithOp, Axis, CompOp, InsertPosition, NodeCompOp, SetOp};
use crate::types::{AtomicType, KindTest, SequenceType};
use crate::xdm::{AtomicValue, ExpandedName, QName};
use std::cell::OnceCell;
use std::cmp::Ordering;
use std::fmt;
use std::ops::Add;
use std::rc::Rc;
use string_cache::DefaultAtom;

/// A cheap prefilter tag: a node can only match an expression whose bucket is among the
/// node's own buckets (see [`buckets_for_node`]).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Bucket(DefaultAtom);

impl Bucket {
    pub fn new(text: &str) -> Self {
        Self(DefaultAtom::from(text))
    }

    pub fn for_kind(kind: NodeKind) -> Self {
        Self::new(&format!("type-{}", kind.dom_type()))
    }

    pub fn for_name(local: &str) -> Self {
        Self::new(&format!("name-{local}"))
    }

    pub fn element_or_attribute() -> Self {
        Self::new("type-1-or-type-2")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Every bucket a node belongs to, most general first.
pub fn buckets_for_node<N: XdmNode>(node: &N) -> Vec<Bucket> {
    let kind = node.kind();
    match kind {
        NodeKind::Element | NodeKind::Attribute => {
            let mut out = vec![Bucket::element_or_attribute(), Bucket::for_kind(kind)];
            if let Some(name) = node.name() {
                out.push(Bucket::for_name(&name.local));
            }
            out
        }
        other => vec![Bucket::for_kind(other)],
    }
}

/// How narrowly a selector matches, compared field by field in declaration order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Specificity {
    pub external: u32,
    pub attribute: u32,
    pub node_name: u32,
    pub node_type: u32,
    pub universal: u32,
}

impl Specificity {
    pub const ZERO: Specificity =
        Specificity { external: 0, attribute: 0, node_name: 0, node_type: 0, universal: 0 };

    pub fn external() -> Self {
        Self { external: 1, ..Self::ZERO }
    }

    /// Field-wise maximum.
    pub fn max_each(self, other: Self) -> Self {
        Self {
            external: self.external.max(other.external),
            attribute: self.attribute.max(other.attribute),
            node_name: self.node_name.max(other.node_name),
            node_type: self.node_type.max(other.node_type),
            universal: self.universal.max(other.universal),
        }
    }
}

impl Add for Specificity {
    type Output = Specificity;

    fn add(self, rhs: Self) -> Self {
        Self {
            external: self.external + rhs.external,
            attribute: self.attribute + rhs.attribute,
            node_name: self.node_name + rhs.node_name,
            node_type: self.node_type + rhs.node_type,
            universal: self.universal + rhs.universal,
        }
    }
}

/// `-1`, `0` or `1` for `a` less specific than, as specific as, or more specific than `b`.
pub fn compare_specificity(a: &Specificity, b: &Specificity) -> i32 {
    match a.cmp(b) {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameTest {
    Exact(ExpandedName),
    Any,
    Namespace(Option<String>),
    Local(String),
}

impl NameTest {
    pub fn matches(&self, name: Option<&QName>) -> bool {
        let Some(name) = name else { return false };
        match self {
            NameTest::Any => true,
            NameTest::Exact(e) => e.local == name.local && e.ns_uri == name.ns_uri,
            NameTest::Namespace(ns) => &name.ns_uri == ns,
            NameTest::Local(local) => &name.local == local,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeTest {
    /// Matches nodes of the axis' principal kind by name.
    Name(NameTest),
    Kind(KindTest),
}

#[derive(Debug, Clone)]
pub enum LookupKey {
    Name(String),
    Integer(i128),
    Expr(Rc<Expression>),
    Wildcard,
}

/// Name of a constructed node: fixed at compile time or computed.
#[derive(Debug, Clone)]
pub enum NameSource {
    Static(QName),
    Computed(Rc<Expression>),
}

#[derive(Debug, Clone)]
pub struct OrderKeySpec {
    pub key: Rc<Expression>,
    pub descending: bool,
    pub empty_greatest: bool,
}

#[derive(Debug, Clone)]
pub enum FlworClause {
    For { var: ExpandedName, ty: Option<SequenceType>, allowing_empty: bool, position: Option<ExpandedName>, source: Rc<Expression> },
    Let { var: ExpandedName, ty: Option<SequenceType>, value: Rc<Expression> },
    Where(Rc<Expression>),
    OrderBy { stable: bool, specs: Vec<OrderKeySpec> },
    Count(ExpandedName),
}

/// A function declared in a query prolog or a library module.
pub struct DeclaredFunction {
    pub name: ExpandedName,
    pub params: Vec<(ExpandedName, Option<SequenceType>)>,
    pub result: Option<SequenceType>,
    pub updating: bool,
    /// Set once every declaration of the module is known, which allows recursion.
    pub body: OnceCell<Rc<Expression>>,
}

impl fmt::Debug for DeclaredFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name, self.params.len())
    }
}

/// A prolog variable with an initializer; evaluated where it is referenced.
pub struct GlobalVariable {
    pub name: ExpandedName,
    pub ty: Option<SequenceType>,
    pub value: OnceCell<Rc<Expression>>,
}

impl fmt::Debug for GlobalVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}", self.name)
    }
}

#[derive(Debug, Clone)]
pub enum ExpressionKind {
    Literal(AtomicValue),
    Sequence(Vec<Rc<Expression>>),
    Range(Rc<Expression>, Rc<Expression>),
    ContextItem,
    Variable(ExpandedName),
    /// `declare variable $x external := default`
    ExternalVariable { name: ExpandedName, default: Option<Rc<Expression>> },
    Global(Rc<GlobalVariable>),
    Root,
    Path(Rc<Expression>, Rc<Expression>),
    Step { axis: Axis, test: NodeTest, predicates: Vec<Rc<Expression>> },
    Filter { base: Rc<Expression>, predicate: Rc<Expression> },
    SimpleMap(Rc<Expression>, Rc<Expression>),
    Arithmetic { op: ArithOp, left: Rc<Expression>, right: Rc<Expression> },
    Unary { negate: bool, operand: Rc<Expression> },
    Concat(Rc<Expression>, Rc<Expression>),
    And(Rc<Expression>, Rc<Expression>),
    Or(Rc<Expression>, Rc<Expression>),
    ValueComparison { op: CompOp, left: Rc<Expression>, right: Rc<Expression> },
    GeneralComparison { op: CompOp, left: Rc<Expression>, right: Rc<Expression> },
    NodeComparison { op: NodeCompOp, left: Rc<Expression>, right: Rc<Expression> },
    SetOperation { op: SetOp, left: Rc<Expression>, right: Rc<Expression> },
    If { condition: Rc<Expression>, then_branch: Rc<Expression>, else_branch: Rc<Expression> },
    Flwor { clauses: Vec<FlworClause>, result: Rc<Expression> },
    Quantified { every: bool, bindings: Vec<(ExpandedName, Rc<Expression>)>, satisfies: Rc<Expression> },
    InstanceOf(Rc<Expression>, SequenceType),
    TreatAs(Rc<Expression>, SequenceType),
    Castable { operand: Rc<Expression>, target: AtomicType, optional: bool },
    Cast { operand: Rc<Expression>, target: AtomicType, optional: bool },
    /// A registry function. `None` arguments are placeholders.
    FunctionCall { name: ExpandedName, params: Option<Rc<[SequenceType]>>, args: Vec<Option<Rc<Expression>>> },
    DeclaredCall { function: Rc<DeclaredFunction>, args: Vec<Option<Rc<Expression>>> },
    NamedFunctionRef { name: ExpandedName, arity: usize },
    DeclaredFunctionRef(Rc<DeclaredFunction>),
    InlineFunction { params: Vec<(ExpandedName, Option<SequenceType>)>, result: Option<SequenceType>, body: Rc<Expression> },
    DynamicCall { function: Rc<Expression>, args: Vec<Option<Rc<Expression>>> },
    MapConstructor(Vec<(Rc<Expression>, Rc<Expression>)>),
    SquareArray(Vec<Rc<Expression>>),
    CurlyArray(Rc<Expression>),
    Lookup { base: Rc<Expression>, key: LookupKey },
    UnaryLookup(LookupKey),
    /// Attribute nodes may also come first in `content`; `attributes` holds direct ones.
    ElementConstructor { name: NameSource, attributes: Vec<Rc<Expression>>, content: Vec<Rc<Expression>> },
    /// Direct attribute values are a list of parts concatenated without separators.
    AttributeConstructor { name: NameSource, value: Vec<Rc<Expression>> },
    TextConstructor(Rc<Expression>),
    CommentConstructor(Rc<Expression>),
    PiConstructor { target: NameSource, content: Rc<Expression> },
    DocumentConstructor(Rc<Expression>),
    Insert { source: Rc<Expression>, position: InsertPosition, target: Rc<Expression> },
    Delete(Rc<Expression>),
    ReplaceNode { target: Rc<Expression>, replacement: Rc<Expression> },
    ReplaceValue { target: Rc<Expression>, value: Rc<Expression> },
    Rename { target: Rc<Expression>, name: Rc<Expression> },
    Transform { copies: Vec<(ExpandedName, Rc<Expression>)>, modify: Rc<Expression>, result: Rc<Expression> },
}

/// One node of the compiled graph.
#[derive(Debug, Clone)]
pub struct Expression {
    pub kind: ExpressionKind,
    updating: bool,
    uses_last: bool,
}

impl Expression {
    pub fn new(kind: ExpressionKind) -> Self {
        let mut expr = Self { kind, updating: false, uses_last: false };
        expr.updating = compute_updating(&expr.kind);
        expr.uses_last = expr.compute_uses_last();
        expr
    }

    pub fn rc(kind: ExpressionKind) -> Rc<Self> {
        Rc::new(Self::new(kind))
    }

    pub fn empty() -> Rc<Self> {
        Self::rc(ExpressionKind::Sequence(Vec::new()))
    }

    /// Whether evaluating this expression may add to the pending update list.
    pub fn is_updating(&self) -> bool {
        self.updating
    }

    /// Whether `fn:last()` appears in this subtree, which forces predicates to know the
    /// input size up front.
    pub fn uses_last(&self) -> bool {
        self.uses_last
    }

    pub fn is_empty_sequence(&self) -> bool {
        matches!(&self.kind, ExpressionKind::Sequence(items) if items.is_empty())
    }

    pub fn bucket(&self) -> Option<Bucket> {
        use ExpressionKind as K;
        match &self.kind {
            K::Step { axis: Axis::SelfAxis, test, .. } => test_bucket(test, NodeKind::Element),
            K::Step { axis: Axis::Attribute, test, .. } if matches!(test, NodeTest::Name(_)) => {
                test_bucket(test, NodeKind::Attribute)
            }
            K::Filter { base, .. } => base.bucket(),
            K::And(l, r) => l.bucket().or_else(|| r.bucket()),
            K::Or(l, r) => {
                let (a, b) = (l.bucket()?, r.bucket()?);
                (a == b).then_some(a)
            }
            _ => None,
        }
    }

    pub fn specificity(&self) -> Specificity {
        use ExpressionKind as K;
        match &self.kind {
            K::Literal(_) | K::ContextItem | K::Variable(_) | K::Root => Specificity::ZERO,
            K::Step { axis, test, predicates } => {
                let mut s = match test {
                    NodeTest::Name(NameTest::Any) => Specificity { node_type: 1, ..Specificity::ZERO },
                    NodeTest::Name(_) => Specificity { node_name: 1, ..Specificity::ZERO },
                    NodeTest::Kind(KindTest::AnyKind) => Specificity { universal: 1, ..Specificity::ZERO },
                    NodeTest::Kind(KindTest::Element(Some(_)) | KindTest::Attribute(Some(_))) => {
                        Specificity { node_name: 1, ..Specificity::ZERO }
                    }
                    NodeTest::Kind(_) => Specificity { node_type: 1, ..Specificity::ZERO },
                };
                if *axis == Axis::Attribute {
                    s.attribute += 1;
                }
                predicates.iter().fold(s, |acc, p| acc + p.specificity())
            }
            K::Path(l, r) | K::SimpleMap(l, r) | K::And(l, r) => l.specificity() + r.specificity(),
            K::Filter { base, predicate } => base.specificity() + predicate.specificity(),
            K::Or(l, r) => l.specificity().max(r.specificity()),
            K::ValueComparison { left, right, .. }
            | K::GeneralComparison { left, right, .. }
            | K::NodeComparison { left, right, .. } => left.specificity() + right.specificity(),
            K::Sequence(items) => items.iter().fold(Specificity::ZERO, |acc, e| acc + e.specificity()),
            _ => Specificity::external(),
        }
    }

    /// Direct operands, in evaluation order.
    pub fn operands(&self) -> Vec<&Rc<Expression>> {
        use ExpressionKind as K;
        let mut out = Vec::new();
        match &self.kind {
            K::Literal(_)
            | K::ContextItem
            | K::Variable(_)
            | K::Global(_)
            | K::Root
            | K::NamedFunctionRef { .. }
            | K::DeclaredFunctionRef(_) => {}
            K::ExternalVariable { default, .. } => out.extend(default),
            K::Sequence(items) | K::SquareArray(items) => out.extend(items),
            K::Range(a, b)
            | K::Path(a, b)
            | K::SimpleMap(a, b)
            | K::Concat(a, b)
            | K::And(a, b)
            | K::Or(a, b)
            | K::Filter { base: a, predicate: b }
            | K::Arithmetic { left: a, right: b, .. }
            | K::ValueComparison { left: a, right: b, .. }
            | K::GeneralComparison { left: a, right: b, .. }
            | K::NodeComparison { left: a, right: b, .. }
            | K::SetOperation { left: a, right: b, .. }
            | K::Insert { source: a, target: b, .. }
            | K::ReplaceNode { target: a, replacement: b }
            | K::ReplaceValue { target: a, value: b }
            | K::Rename { target: a, name: b } => {
                out.push(a);
                out.push(b);
            }
            K::Step { predicates, .. } => out.extend(predicates),
            K::Unary { operand, .. }
            | K::InstanceOf(operand, _)
            | K::TreatAs(operand, _)
            | K::Castable { operand, .. }
            | K::Cast { operand, .. }
            | K::CurlyArray(operand)
            | K::TextConstructor(operand)
            | K::CommentConstructor(operand)
            | K::DocumentConstructor(operand)
            | K::Delete(operand) => out.push(operand),
            K::If { condition, then_branch, else_branch } => {
                out.extend([condition, then_branch, else_branch]);
            }
            K::Flwor { clauses, result } => {
                for clause in clauses {
                    match clause {
                        FlworClause::For { source, .. } => out.push(source),
                        FlworClause::Let { value, .. } => out.push(value),
                        FlworClause::Where(e) => out.push(e),
                        FlworClause::OrderBy { specs, .. } => out.extend(specs.iter().map(|s| &s.key)),
                        FlworClause::Count(_) => {}
                    }
                }
                out.push(result);
            }
            K::Quantified { bindings, satisfies, .. } => {
                out.extend(bindings.iter().map(|(_, e)| e));
                out.push(satisfies);
            }
            K::FunctionCall { args, .. } | K::DeclaredCall { args, .. } => out.extend(args.iter().flatten()),
            K::InlineFunction { body, .. } => out.push(body),
            K::DynamicCall { function, args } => {
                out.push(function);
                out.extend(args.iter().flatten());
            }
            K::MapConstructor(entries) => {
                for (k, v) in entries {
                    out.push(k);
                    out.push(v);
                }
            }
            K::Lookup { base, key } => {
                out.push(base);
                if let LookupKey::Expr(e) = key {
                    out.push(e);
                }
            }
            K::UnaryLookup(key) => {
                if let LookupKey::Expr(e) = key {
                    out.push(e);
                }
            }
            K::ElementConstructor { name, attributes, content, .. } => {
                if let NameSource::Computed(e) = name {
                    out.push(e);
                }
                out.extend(attributes);
                out.extend(content);
            }
            K::AttributeConstructor { name, value } => {
                if let NameSource::Computed(e) = name {
                    out.push(e);
                }
                out.extend(value);
            }
            K::PiConstructor { target, content } => {
                if let NameSource::Computed(e) = target {
                    out.push(e);
                }
                out.push(content);
            }
            K::Transform { copies, modify, result } => {
                out.extend(copies.iter().map(|(_, e)| e));
                out.push(modify);
                out.push(result);
            }
        }
        out
    }
}

impl Expression {
    fn compute_uses_last(&self) -> bool {
        use ExpressionKind as K;
        match &self.kind {
            K::FunctionCall { name, args, .. } if args.is_empty() => {
                name.local == "last" && name.ns_uri.as_deref() == Some(crate::consts::FNS)
            }
            // steps and inline functions establish their own focus
            K::Step { .. } | K::InlineFunction { .. } => false,
            K::Path(l, _) | K::SimpleMap(l, _) => l.uses_last(),
            K::Filter { base, .. } => base.uses_last(),
            _ => self.operands().iter().any(|e| e.uses_last()),
        }
    }
}

fn test_bucket(test: &NodeTest, principal: NodeKind) -> Option<Bucket> {
    match test {
        NodeTest::Name(NameTest::Exact(name)) => Some(Bucket::for_name(&name.local)),
        NodeTest::Name(NameTest::Local(local)) => Some(Bucket::for_name(local)),
        NodeTest::Name(_) => Some(Bucket::for_kind(principal)),
        NodeTest::Kind(k) => match k {
            KindTest::AnyKind => None,
            KindTest::Element(Some(n)) | KindTest::Attribute(Some(n)) => Some(Bucket::for_name(&n.local)),
            KindTest::Element(None) => Some(Bucket::for_kind(NodeKind::Element)),
            KindTest::Attribute(None) => Some(Bucket::for_kind(NodeKind::Attribute)),
            KindTest::Text => Some(Bucket::for_kind(NodeKind::Text)),
            KindTest::Comment => Some(Bucket::for_kind(NodeKind::Comment)),
            KindTest::ProcessingInstruction(_) => Some(Bucket::for_kind(NodeKind::ProcessingInstruction)),
            KindTest::Document(_) => Some(Bucket::for_kind(NodeKind::Document)),
            KindTest::Namespace => Some(Bucket::for_kind(NodeKind::Namespace)),
        },
    }
}

fn compute_updating(kind: &ExpressionKind) -> bool {
    use ExpressionKind as K;
    match kind {
        K::Insert { .. } | K::Delete(_) | K::ReplaceNode { .. } | K::ReplaceValue { .. } | K::Rename { .. } => true,
        K::DeclaredCall { function, .. } => function.updating,
        K::FunctionCall { name, .. } => name.ns_uri.as_deref() == Some(crate::consts::FNS) && name.local == "put",
        K::Sequence(items) => items.iter().any(|e| e.is_updating()),
        K::If { then_branch, else_branch, .. } => then_branch.is_updating() || else_branch.is_updating(),
        K::Flwor { result, .. } => result.is_updating(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(axis: Axis, test: NodeTest) -> Expression {
        Expression::new(ExpressionKind::Step { axis, test, predicates: Vec::new() })
    }

    #[test]
    fn specificity_orders_lexicographically() {
        let name = step(Axis::SelfAxis, NodeTest::Name(NameTest::Exact(ExpandedName::local("a"))));
        let any = step(Axis::SelfAxis, NodeTest::Kind(KindTest::AnyKind));
        assert_eq!(compare_specificity(&name.specificity(), &any.specificity()), 1);
        assert_eq!(compare_specificity(&any.specificity(), &name.specificity()), -1);
        assert_eq!(compare_specificity(&any.specificity(), &any.specificity()), 0);
        assert!(Specificity::external() > name.specificity());
    }

    #[test]
    fn self_step_buckets() {
        let a = step(Axis::SelfAxis, NodeTest::Name(NameTest::Exact(ExpandedName::local("a"))));
        assert_eq!(a.bucket().map(|b| b.to_string()).as_deref(), Some("name-a"));
        let text = step(Axis::SelfAxis, NodeTest::Kind(KindTest::Text));
        assert_eq!(text.bucket().map(|b| b.to_string()).as_deref(), Some("type-3"));
        let child = step(Axis::Child, NodeTest::Kind(KindTest::Text));
        assert_eq!(child.bucket(), None);
    }

    #[test]
    fn updating_propagates_through_sequences() {
        let del = Expression::rc(ExpressionKind::Delete(Expression::empty()));
        let seq = Expression::new(ExpressionKind::Sequence(vec![del, Expression::empty()]));
        assert!(seq.is_updating());
        let tr = Expression::new(ExpressionKind::Transform {
            copies: Vec::new(),
            modify: Expression::rc(ExpressionKind::Delete(Expression::empty())),
            result: Expression::empty(),
        });
        assert!(!tr.is_updating());
    }
}

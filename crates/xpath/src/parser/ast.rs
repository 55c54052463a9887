//! Syntax tree produced by the parser. Names are kept lexical; the compiler resolves them.

use crate::types::Occurrence;

/// A possibly prefixed or URI-qualified name as written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Name {
    pub prefix: Option<String>,
    /// Set for `Q{uri}local` names.
    pub uri: Option<String>,
    pub local: String,
}

impl Name {
    pub fn local(local: &str) -> Self {
        Self { prefix: None, uri: None, local: local.to_string() }
    }

    /// Parses `Q{uri}local`, `prefix:local` or `local`.
    pub fn parse(text: &str) -> Self {
        if let Some(rest) = text.strip_prefix("Q{")
            && let Some((uri, local)) = rest.split_once('}')
        {
            return Self { prefix: None, uri: Some(uri.to_string()), local: local.to_string() };
        }
        match text.split_once(':') {
            Some((p, l)) => Self { prefix: Some(p.to_string()), uri: None, local: l.to_string() },
            None => Self::local(text),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Integer(i128),
    /// Lexical form, converted by the compiler.
    Decimal(String),
    Double(f64),
    String(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    IDiv,
    Mod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeCompOp {
    Is,
    Precedes,
    Follows,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOp {
    Union,
    Intersect,
    Except,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    Child,
    Descendant,
    DescendantOrSelf,
    Attribute,
    SelfAxis,
    Parent,
    Ancestor,
    AncestorOrSelf,
    FollowingSibling,
    PrecedingSibling,
    Following,
    Preceding,
    Namespace,
}

impl Axis {
    pub fn is_reverse(self) -> bool {
        matches!(self, Axis::Parent | Axis::Ancestor | Axis::AncestorOrSelf | Axis::PrecedingSibling | Axis::Preceding)
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "child" => Axis::Child,
            "descendant" => Axis::Descendant,
            "descendant-or-self" => Axis::DescendantOrSelf,
            "attribute" => Axis::Attribute,
            "self" => Axis::SelfAxis,
            "parent" => Axis::Parent,
            "ancestor" => Axis::Ancestor,
            "ancestor-or-self" => Axis::AncestorOrSelf,
            "following-sibling" => Axis::FollowingSibling,
            "preceding-sibling" => Axis::PrecedingSibling,
            "following" => Axis::Following,
            "preceding" => Axis::Preceding,
            "namespace" => Axis::Namespace,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameTest {
    Name(Name),
    /// `*`
    Any,
    /// `prefix:*` or `Q{uri}*`
    Namespace(Name),
    /// `*:local`
    Local(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KindTest {
    AnyKind,
    Document(Option<Box<KindTest>>),
    /// `None` is `element()` / `element(*)`.
    Element(Option<Name>),
    Attribute(Option<Name>),
    Text,
    Comment,
    ProcessingInstruction(Option<String>),
    NamespaceNode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeTest {
    Name(NameTest),
    Kind(KindTest),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemType {
    AnyItem,
    Atomic(Name),
    Kind(KindTest),
    AnyFunction,
    Function { params: Vec<SequenceType>, result: Box<SequenceType> },
    AnyMap,
    Map(Name, Box<SequenceType>),
    AnyArray,
    Array(Box<SequenceType>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequenceType {
    Empty,
    Item(ItemType, Occurrence),
}

#[derive(Debug, Clone, PartialEq)]
pub enum KeySpec {
    Name(String),
    Integer(i128),
    Expr(Box<Expr>),
    Wildcard,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: Name,
    pub ty: Option<SequenceType>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    For { var: Name, ty: Option<SequenceType>, allowing_empty: bool, position: Option<Name>, source: Expr },
    Let { var: Name, ty: Option<SequenceType>, value: Expr },
    Where(Expr),
    OrderBy { stable: bool, specs: Vec<OrderSpec> },
    Count(Name),
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderSpec {
    pub key: Expr,
    pub descending: bool,
    pub empty_greatest: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertPosition {
    Into,
    AsFirst,
    AsLast,
    Before,
    After,
}

/// A computed constructor name: written out or computed at run time.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstructorName {
    Static(Name),
    Computed(Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ContentPart {
    Text(String),
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DirAttribute {
    pub name: Name,
    pub value: Vec<ContentPart>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    Sequence(Vec<Expr>),
    Range(Box<Expr>, Box<Expr>),
    ContextItem,
    VarRef(Name),
    /// `/` on its own, or the start of an absolute path.
    Root,
    /// `e1/e2`; `//` is expanded to an explicit `descendant-or-self::node()` step.
    Path(Box<Expr>, Box<Expr>),
    Step { axis: Axis, test: NodeTest, predicates: Vec<Expr> },
    Filter { base: Box<Expr>, predicate: Box<Expr> },
    SimpleMap(Box<Expr>, Box<Expr>),
    Arithmetic { op: ArithOp, left: Box<Expr>, right: Box<Expr> },
    Unary { negate: bool, operand: Box<Expr> },
    Concat(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    ValueComparison { op: CompOp, left: Box<Expr>, right: Box<Expr> },
    GeneralComparison { op: CompOp, left: Box<Expr>, right: Box<Expr> },
    NodeComparison { op: NodeCompOp, left: Box<Expr>, right: Box<Expr> },
    SetOperation { op: SetOp, left: Box<Expr>, right: Box<Expr> },
    If { condition: Box<Expr>, then_branch: Box<Expr>, else_branch: Box<Expr> },
    Flwor { clauses: Vec<Clause>, result: Box<Expr> },
    Quantified { every: bool, bindings: Vec<(Name, Expr)>, satisfies: Box<Expr> },
    InstanceOf(Box<Expr>, SequenceType),
    TreatAs(Box<Expr>, SequenceType),
    CastableAs { operand: Box<Expr>, target: Name, optional: bool },
    CastAs { operand: Box<Expr>, target: Name, optional: bool },
    /// `None` arguments are `?` placeholders.
    FunctionCall { name: Name, args: Vec<Option<Expr>> },
    NamedFunctionRef { name: Name, arity: usize },
    InlineFunction { params: Vec<Param>, result: Option<SequenceType>, body: Box<Expr> },
    DynamicCall { function: Box<Expr>, args: Vec<Option<Expr>> },
    MapConstructor(Vec<(Expr, Expr)>),
    SquareArray(Vec<Expr>),
    CurlyArray(Box<Expr>),
    Lookup { base: Box<Expr>, key: KeySpec },
    UnaryLookup(KeySpec),
    DirElement { name: Name, namespaces: Vec<(Option<String>, String)>, attributes: Vec<DirAttribute>, content: Vec<ContentPart> },
    DirComment(String),
    DirPi { target: String, data: String },
    CompDocument(Box<Expr>),
    CompElement { name: ConstructorName, content: Box<Expr> },
    CompAttribute { name: ConstructorName, content: Box<Expr> },
    CompText(Box<Expr>),
    CompComment(Box<Expr>),
    CompPi { target: ConstructorName, content: Box<Expr> },
    Insert { source: Box<Expr>, position: InsertPosition, target: Box<Expr> },
    Delete(Box<Expr>),
    ReplaceNode { target: Box<Expr>, replacement: Box<Expr> },
    ReplaceValue { target: Box<Expr>, value: Box<Expr> },
    Rename { target: Box<Expr>, name: Box<Expr> },
    Transform { copies: Vec<(Name, Expr)>, modify: Box<Expr>, result: Box<Expr> },
}

impl Expr {
    pub fn empty() -> Self {
        Expr::Sequence(Vec::new())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VarDecl {
    pub name: Name,
    pub ty: Option<SequenceType>,
    pub external: bool,
    /// Initializer, or default value for external variables.
    pub value: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDecl {
    pub name: Name,
    pub params: Vec<Param>,
    pub result: Option<SequenceType>,
    pub updating: bool,
    /// `None` for external functions.
    pub body: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Prolog {
    pub namespaces: Vec<(String, String)>,
    pub default_element_namespace: Option<String>,
    pub default_function_namespace: Option<String>,
    pub imports: Vec<(Option<String>, String)>,
    pub variables: Vec<VarDecl>,
    pub functions: Vec<FunctionDecl>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Module {
    Main { prolog: Prolog, body: Expr },
    Library { prefix: String, namespace: String, prolog: Prolog },
}

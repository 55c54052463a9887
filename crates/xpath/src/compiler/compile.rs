//! Lowering of the syntax tree into the [`Expression`] graph.
//!
//! Names are resolved here: namespace prefixes, function names and arities, variable
//! references and type names. The updating-expression rules are checked while lowering so
//! that every constructed node has already been validated.

use super::expression::{
    DeclaredFunction, Expression, ExpressionKind as K, FlworClause, GlobalVariable, LookupKey, NameSource,
    NameTest, NodeTest, OrderKeySpec,
};
use super::modules::{LibraryModule, ModuleRegistry};
use super::static_context::StaticContext;
use crate::consts::{RESERVED_FUNCTION_NAMESPACES, XS};
use crate::engine::runtime::{Error, ErrorCode};
use crate::parser::ast::{self, Axis};
use crate::types::lexical;
use crate::types::{AtomicType, ItemType, KindTest, Occurrence, SequenceType};
use crate::xdm::{AtomicValue, ExpandedName, QName};
use std::cell::OnceCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

type CResult<T> = Result<T, Error>;

/// A compiled main module.
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    pub expression: Rc<Expression>,
    pub static_ctx: Rc<StaticContext>,
}

impl CompiledQuery {
    pub fn is_updating(&self) -> bool {
        self.expression.is_updating()
    }
}

/// Inputs to compilation besides the syntax tree.
#[derive(Debug, Clone, Copy)]
pub struct CompileEnv<'a> {
    pub modules: &'a ModuleRegistry,
    /// `(prefix, namespace)` pairs importing registered modules.
    pub module_imports: &'a [(String, String)],
    /// Variables bound by the caller at evaluation time.
    pub external_variables: &'a [ExpandedName],
}

/// Compiles a main module. Library modules are rejected with `XPST0003`.
pub fn compile_main(module: &ast::Module, ctx: StaticContext, env: CompileEnv<'_>) -> CResult<CompiledQuery> {
    let ast::Module::Main { prolog, body } = module else {
        return Err(Error::from_code(ErrorCode::XPST0003, "a library module cannot be evaluated"));
    };
    let mut compiler = Compiler::new(ctx, env, None)?;
    compiler.prolog(prolog)?;
    let expression = compiler.lower(body)?;
    tracing::trace!(updating = expression.is_updating(), "compiled main module");
    Ok(CompiledQuery { expression, static_ctx: Rc::new(compiler.ctx) })
}

/// Compiles a library module, answering its target namespace and declarations.
pub fn compile_library(
    module: &ast::Module,
    ctx: StaticContext,
    env: CompileEnv<'_>,
) -> CResult<(String, LibraryModule)> {
    let ast::Module::Library { prefix, namespace, prolog } = module else {
        return Err(Error::from_code(ErrorCode::XPST0003, "not a library module"));
    };
    if namespace.is_empty() {
        return Err(Error::from_code(ErrorCode::XQST0088, "a library module needs a target namespace"));
    }
    let mut compiler = Compiler::new(ctx, env, Some(namespace.clone()))?;
    compiler.ctx.bind_namespace(prefix.clone(), namespace.clone());
    compiler.prolog(prolog)?;
    let mut functions: Vec<_> = compiler.functions.into_values().collect();
    functions.sort_by(|a, b| a.name.cmp(&b.name).then(a.params.len().cmp(&b.params.len())));
    let variables = compiler.module_variables;
    tracing::debug!(namespace = %namespace, functions = functions.len(), variables = variables.len(), "compiled library module");
    Ok((namespace.clone(), LibraryModule { functions, variables }))
}

struct Compiler<'a> {
    ctx: StaticContext,
    modules: &'a ModuleRegistry,
    imported: HashSet<String>,
    /// Target namespace when compiling a library module.
    library: Option<String>,
    functions: HashMap<(ExpandedName, usize), Rc<DeclaredFunction>>,
    globals: HashMap<ExpandedName, Rc<Expression>>,
    module_variables: Vec<Rc<GlobalVariable>>,
    externals: HashSet<ExpandedName>,
    locals: Vec<ExpandedName>,
    /// Namespace declarations of enclosing direct element constructors; `""` is the default
    /// element namespace and an empty URI undeclares.
    ns_scopes: Vec<Vec<(String, String)>>,
}

fn unknown_prefix(prefix: &str) -> Error {
    Error::from_code(ErrorCode::XPST0081, format!("namespace prefix '{prefix}' is not declared"))
}

fn unknown_function(name: &ExpandedName, arity: usize) -> Error {
    Error::from_code(ErrorCode::XPST0017, format!("unknown function {name}#{arity}"))
}

fn updating_misplaced() -> Error {
    Error::from_code(ErrorCode::XUST0001, "updating expression is not allowed here")
}

impl<'a> Compiler<'a> {
    fn new(ctx: StaticContext, env: CompileEnv<'a>, library: Option<String>) -> CResult<Self> {
        let mut compiler = Self {
            ctx,
            modules: env.modules,
            imported: HashSet::new(),
            library,
            functions: HashMap::new(),
            globals: HashMap::new(),
            module_variables: Vec::new(),
            externals: env.external_variables.iter().cloned().collect(),
            locals: Vec::new(),
            ns_scopes: Vec::new(),
        };
        for (prefix, uri) in env.module_imports {
            compiler.import(Some(prefix), uri)?;
        }
        Ok(compiler)
    }

    fn import(&mut self, prefix: Option<&String>, uri: &str) -> CResult<()> {
        if !self.modules.contains(uri) {
            return Err(Error::from_code(ErrorCode::XQST0059, format!("no module is registered for namespace '{uri}'")));
        }
        if let Some(prefix) = prefix {
            self.ctx.bind_namespace(prefix.clone(), uri);
        }
        self.imported.insert(uri.to_string());
        Ok(())
    }

    fn prolog(&mut self, prolog: &ast::Prolog) -> CResult<()> {
        for (prefix, uri) in &prolog.namespaces {
            if prefix == "xml" || prefix == "xmlns" {
                return Err(Error::from_code(ErrorCode::XQST0070, format!("prefix '{prefix}' cannot be redeclared")));
            }
            self.ctx.bind_namespace(prefix.clone(), uri.clone());
        }
        if let Some(ns) = &prolog.default_element_namespace {
            self.ctx.default_element_namespace = Some(ns.clone()).filter(|s| !s.is_empty());
        }
        if let Some(ns) = &prolog.default_function_namespace {
            self.ctx.default_function_namespace = Some(ns.clone()).filter(|s| !s.is_empty());
        }
        for (prefix, uri) in &prolog.imports {
            self.import(prefix.as_ref(), uri)?;
        }

        let mut pending = Vec::with_capacity(prolog.functions.len());
        for decl in &prolog.functions {
            pending.push(self.declare_function(decl)?);
        }
        for decl in &prolog.variables {
            self.declare_variable(decl)?;
        }
        for (decl, function) in prolog.functions.iter().zip(pending) {
            self.function_body(decl, &function)?;
        }
        Ok(())
    }

    fn declare_function(&mut self, decl: &ast::FunctionDecl) -> CResult<Rc<DeclaredFunction>> {
        let name = match (&decl.name.prefix, &decl.name.uri) {
            (None, None) => {
                return Err(Error::from_code(
                    ErrorCode::XQST0060,
                    format!("declared function '{}' must be in a namespace", decl.name.local),
                ));
            }
            _ => self.expanded(&decl.name, None)?,
        };
        let ns = name.ns_uri.as_deref().unwrap_or_default();
        if RESERVED_FUNCTION_NAMESPACES.contains(&ns) {
            return Err(Error::from_code(ErrorCode::XQST0045, format!("function {name} is in a reserved namespace")));
        }
        if let Some(target) = &self.library
            && ns != target
        {
            return Err(Error::from_code(
                ErrorCode::XQST0048,
                format!("function {name} is not in the module namespace '{target}'"),
            ));
        }
        let mut params = Vec::with_capacity(decl.params.len());
        for p in &decl.params {
            let pname = self.expanded(&p.name, None)?;
            if params.iter().any(|(n, _)| *n == pname) {
                return Err(Error::from_code(ErrorCode::XQST0039, format!("duplicate parameter ${pname}")));
            }
            let ty = p.ty.as_ref().map(|t| self.sequence_type(t)).transpose()?;
            params.push((pname, ty));
        }
        let result = decl.result.as_ref().map(|t| self.sequence_type(t)).transpose()?;
        let key = (name.clone(), params.len());
        if self.functions.contains_key(&key) {
            return Err(Error::from_code(ErrorCode::XQST0034, format!("function {name}#{} declared twice", key.1)));
        }
        let function =
            Rc::new(DeclaredFunction { name, params, result, updating: decl.updating, body: OnceCell::new() });
        self.functions.insert(key, Rc::clone(&function));
        Ok(function)
    }

    fn function_body(&mut self, decl: &ast::FunctionDecl, function: &Rc<DeclaredFunction>) -> CResult<()> {
        let Some(body) = &decl.body else {
            return Err(Error::from_code(
                ErrorCode::XPST0017,
                format!("external function {} has no implementation", function.name),
            ));
        };
        let saved = self.locals.len();
        self.locals.extend(function.params.iter().map(|(n, _)| n.clone()));
        let lowered = self.lower(body);
        self.locals.truncate(saved);
        let lowered = lowered?;
        if function.updating && !lowered.is_updating() && !lowered.is_empty_sequence() {
            return Err(Error::from_code(
                ErrorCode::XUST0002,
                format!("updating function {} has a non-updating body", function.name),
            ));
        }
        if !function.updating && lowered.is_updating() {
            return Err(updating_misplaced());
        }
        let _ = function.body.set(lowered);
        Ok(())
    }

    fn declare_variable(&mut self, decl: &ast::VarDecl) -> CResult<()> {
        let name = self.expanded(&decl.name, None)?;
        if self.globals.contains_key(&name) {
            return Err(Error::from_code(ErrorCode::XQST0049, format!("variable ${name} declared twice")));
        }
        if let Some(target) = &self.library
            && name.ns_uri.as_deref() != Some(target.as_str())
        {
            return Err(Error::from_code(
                ErrorCode::XQST0048,
                format!("variable ${name} is not in the module namespace '{target}'"),
            ));
        }
        let ty = decl.ty.as_ref().map(|t| self.sequence_type(t)).transpose()?;
        let value = decl.value.as_ref().map(|v| self.lower(v)).transpose()?;
        if value.as_ref().is_some_and(|v| v.is_updating()) {
            return Err(updating_misplaced());
        }
        let reference = if decl.external {
            Expression::rc(K::ExternalVariable { name: name.clone(), default: value })
        } else {
            let global = Rc::new(GlobalVariable { name: name.clone(), ty, value: OnceCell::new() });
            let _ = global.value.set(value.unwrap_or_else(Expression::empty));
            self.module_variables.push(Rc::clone(&global));
            Expression::rc(K::Global(global))
        };
        self.globals.insert(name, reference);
        Ok(())
    }

    // ---- names ----

    fn resolve_prefix(&self, prefix: &str) -> Option<String> {
        for scope in self.ns_scopes.iter().rev() {
            if let Some((_, uri)) = scope.iter().find(|(p, _)| p == prefix) {
                return (!uri.is_empty()).then(|| uri.clone());
            }
        }
        if prefix.is_empty() {
            return None;
        }
        self.ctx.resolve_prefix(prefix)
    }

    fn default_element_namespace(&self) -> Option<String> {
        for scope in self.ns_scopes.iter().rev() {
            if let Some((_, uri)) = scope.iter().find(|(p, _)| p.is_empty()) {
                return (!uri.is_empty()).then(|| uri.clone());
            }
        }
        self.ctx.default_element_namespace.clone()
    }

    /// Resolves a lexical name. Unprefixed names take `default`.
    fn expanded(&self, name: &ast::Name, default: Option<&str>) -> CResult<ExpandedName> {
        Ok(self.qname(name, default)?.expanded())
    }

    fn qname(&self, name: &ast::Name, default: Option<&str>) -> CResult<QName> {
        if let Some(uri) = &name.uri {
            return Ok(QName::new(None, Some(uri.as_str()), &name.local));
        }
        match &name.prefix {
            Some(prefix) => {
                let uri = self.resolve_prefix(prefix).ok_or_else(|| unknown_prefix(prefix))?;
                Ok(QName::new(Some(prefix.as_str()), Some(uri.as_str()), &name.local))
            }
            None => Ok(QName::new(None, default, &name.local)),
        }
    }

    fn element_qname(&self, name: &ast::Name) -> CResult<QName> {
        let default = self.default_element_namespace();
        self.qname(name, default.as_deref())
    }

    fn function_name(&self, name: &ast::Name, arity: usize) -> CResult<ExpandedName> {
        if let Some(uri) = &name.uri {
            return Ok(ExpandedName::new(Some(uri.as_str()), &name.local));
        }
        let prefix = name.prefix.as_deref().unwrap_or("");
        if let Some(resolver) = &self.ctx.function_name_resolver
            && let Some(resolved) = resolver(prefix, &name.local, arity)
        {
            return Ok(resolved);
        }
        match &name.prefix {
            Some(p) => {
                let uri = self.resolve_prefix(p).ok_or_else(|| unknown_prefix(p))?;
                Ok(ExpandedName::new(Some(uri.as_str()), &name.local))
            }
            None => Ok(ExpandedName::new(self.ctx.default_function_namespace.as_deref(), &name.local)),
        }
    }

    fn declared_function(&self, name: &ExpandedName, arity: usize) -> Option<Rc<DeclaredFunction>> {
        if let Some(f) = self.functions.get(&(name.clone(), arity)) {
            return Some(Rc::clone(f));
        }
        let ns = name.ns_uri.as_deref()?;
        if self.imported.contains(ns) || self.library.as_deref() == Some(ns) {
            return self.modules.function(name, arity);
        }
        None
    }

    fn variable(&self, name: &ast::Name) -> CResult<Rc<Expression>> {
        let name = self.expanded(name, None)?;
        if self.locals.iter().rev().any(|l| *l == name) {
            return Ok(Expression::rc(K::Variable(name)));
        }
        if let Some(global) = self.globals.get(&name) {
            return Ok(Rc::clone(global));
        }
        if self.externals.contains(&name) {
            return Ok(Expression::rc(K::Variable(name)));
        }
        if let Some(ns) = &name.ns_uri
            && self.imported.contains(ns)
            && let Some(v) = self.modules.variable(&name)
        {
            return Ok(Expression::rc(K::Global(v)));
        }
        Err(Error::from_code(ErrorCode::XPST0008, format!("variable ${name} is not declared")))
    }

    /// Binds local variables for the duration of `f`.
    fn scoped<T>(&mut self, names: &[ExpandedName], f: impl FnOnce(&mut Self) -> CResult<T>) -> CResult<T> {
        let saved = self.locals.len();
        self.locals.extend_from_slice(names);
        let out = f(self);
        self.locals.truncate(saved);
        out
    }

    // ---- types ----

    /// A type usable in a sequence type; `xs:anySimpleType` is not one.
    fn atomic_type(&self, name: &ast::Name) -> CResult<AtomicType> {
        match self.simple_type(name)? {
            AtomicType::AnySimpleType => {
                Err(Error::from_code(ErrorCode::XPST0051, "xs:anySimpleType is not an atomic type"))
            }
            ty => Ok(ty),
        }
    }

    fn simple_type(&self, name: &ast::Name) -> CResult<AtomicType> {
        let default = self.default_element_namespace();
        let resolved = self.expanded(name, default.as_deref())?;
        resolved
            .ns_uri
            .as_deref()
            .filter(|ns| *ns == XS)
            .and_then(|_| AtomicType::from_local_name(&resolved.local))
            .ok_or_else(|| Error::from_code(ErrorCode::XPST0051, format!("{resolved} is not an atomic type")))
    }

    /// Abstract targets are known types, so they fail with `XPST0080` rather than `XPST0051`.
    fn cast_target(&self, name: &ast::Name) -> CResult<AtomicType> {
        let target = self.simple_type(name)?;
        if target == AtomicType::NOTATION || target.is_abstract() {
            return Err(Error::from_code(ErrorCode::XPST0080, format!("cannot cast to {target}")));
        }
        Ok(target)
    }

    fn sequence_type(&self, st: &ast::SequenceType) -> CResult<SequenceType> {
        Ok(match st {
            ast::SequenceType::Empty => SequenceType::Empty,
            ast::SequenceType::Item(item, occ) => SequenceType::Typed(self.item_type(item)?, *occ),
        })
    }

    fn item_type(&self, item: &ast::ItemType) -> CResult<ItemType> {
        use ast::ItemType as I;
        Ok(match item {
            I::AnyItem => ItemType::AnyItem,
            I::Atomic(name) => ItemType::Atomic(self.atomic_type(name)?),
            I::Kind(k) => ItemType::Kind(self.kind_test(k)?),
            I::AnyFunction => ItemType::Function(None),
            I::Function { params, .. } => ItemType::Function(Some(params.len())),
            I::AnyMap => ItemType::Map(None),
            I::Map(key, value) => ItemType::Map(Some((self.atomic_type(key)?, Box::new(self.sequence_type(value)?)))),
            I::AnyArray => ItemType::Array(None),
            I::Array(member) => ItemType::Array(Some(Box::new(self.sequence_type(member)?))),
        })
    }

    fn kind_test(&self, test: &ast::KindTest) -> CResult<KindTest> {
        use ast::KindTest as A;
        Ok(match test {
            A::AnyKind => KindTest::AnyKind,
            A::Document(inner) => KindTest::Document(inner.as_deref().map(|k| self.kind_test(k)).transpose()?.map(Box::new)),
            A::Element(name) => KindTest::Element(name.as_ref().map(|n| self.element_qname(n)).transpose()?.map(|q| q.expanded())),
            A::Attribute(name) => KindTest::Attribute(name.as_ref().map(|n| self.expanded(n, None)).transpose()?),
            A::Text => KindTest::Text,
            A::Comment => KindTest::Comment,
            A::ProcessingInstruction(target) => KindTest::ProcessingInstruction(target.clone()),
            A::NamespaceNode => KindTest::Namespace,
        })
    }

    fn node_test(&self, axis: Axis, test: &ast::NodeTest) -> CResult<NodeTest> {
        Ok(match test {
            ast::NodeTest::Kind(k) => NodeTest::Kind(self.kind_test(k)?),
            ast::NodeTest::Name(ast::NameTest::Any) => NodeTest::Name(NameTest::Any),
            ast::NodeTest::Name(ast::NameTest::Local(l)) => NodeTest::Name(NameTest::Local(l.clone())),
            ast::NodeTest::Name(ast::NameTest::Namespace(n)) => {
                let uri = match (&n.uri, &n.prefix) {
                    (Some(uri), _) => uri.clone(),
                    (None, Some(p)) => self.resolve_prefix(p).ok_or_else(|| unknown_prefix(p))?,
                    (None, None) => String::new(),
                };
                NodeTest::Name(NameTest::Namespace(Some(uri).filter(|u| !u.is_empty())))
            }
            ast::NodeTest::Name(ast::NameTest::Name(n)) => {
                let name = if axis == Axis::Attribute { self.expanded(n, None)? } else { self.element_qname(n)?.expanded() };
                NodeTest::Name(NameTest::Exact(name))
            }
        })
    }

    // ---- expressions ----

    fn lower(&mut self, e: &ast::Expr) -> CResult<Rc<Expression>> {
        let expr = self.lower_expr(e)?;
        check_updating(&expr)?;
        Ok(expr)
    }

    fn lower_all(&mut self, items: &[ast::Expr]) -> CResult<Vec<Rc<Expression>>> {
        items.iter().map(|e| self.lower(e)).collect()
    }

    fn lower_args(&mut self, args: &[Option<ast::Expr>]) -> CResult<Vec<Option<Rc<Expression>>>> {
        args.iter().map(|a| a.as_ref().map(|e| self.lower(e)).transpose()).collect()
    }

    fn lower_expr(&mut self, e: &ast::Expr) -> CResult<Rc<Expression>> {
        use ast::Expr as E;
        let kind = match e {
            E::Literal(lit) => K::Literal(match lit {
                ast::Literal::Integer(i) => AtomicValue::big_integer(*i),
                ast::Literal::Decimal(text) => AtomicValue::decimal(
                    lexical::parse_decimal(text)
                        .ok_or_else(|| Error::from_code(ErrorCode::FOAR0002, format!("decimal literal {text} is out of range")))?,
                ),
                ast::Literal::Double(d) => AtomicValue::double(*d),
                ast::Literal::String(s) => AtomicValue::string(s.as_str()),
            }),
            E::Sequence(items) if items.len() == 1 => return self.lower_expr(&items[0]),
            E::Sequence(items) => K::Sequence(self.lower_all(items)?),
            E::Range(a, b) => K::Range(self.lower(a)?, self.lower(b)?),
            E::ContextItem => K::ContextItem,
            E::VarRef(name) => return self.variable(name),
            E::Root => K::Root,
            E::Path(a, b) => K::Path(self.lower(a)?, self.lower(b)?),
            E::Step { axis, test, predicates } => {
                if *axis == Axis::Namespace {
                    return Err(Error::from_code(ErrorCode::XPST0003, "the namespace axis is not supported"));
                }
                K::Step { axis: *axis, test: self.node_test(*axis, test)?, predicates: self.lower_all(predicates)? }
            }
            E::Filter { base, predicate } => K::Filter { base: self.lower(base)?, predicate: self.lower(predicate)? },
            E::SimpleMap(a, b) => K::SimpleMap(self.lower(a)?, self.lower(b)?),
            E::Arithmetic { op, left, right } => K::Arithmetic { op: *op, left: self.lower(left)?, right: self.lower(right)? },
            E::Unary { negate, operand } => K::Unary { negate: *negate, operand: self.lower(operand)? },
            E::Concat(a, b) => K::Concat(self.lower(a)?, self.lower(b)?),
            E::And(a, b) => K::And(self.lower(a)?, self.lower(b)?),
            E::Or(a, b) => K::Or(self.lower(a)?, self.lower(b)?),
            E::ValueComparison { op, left, right } => {
                K::ValueComparison { op: *op, left: self.lower(left)?, right: self.lower(right)? }
            }
            E::GeneralComparison { op, left, right } => {
                K::GeneralComparison { op: *op, left: self.lower(left)?, right: self.lower(right)? }
            }
            E::NodeComparison { op, left, right } => {
                K::NodeComparison { op: *op, left: self.lower(left)?, right: self.lower(right)? }
            }
            E::SetOperation { op, left, right } => {
                K::SetOperation { op: *op, left: self.lower(left)?, right: self.lower(right)? }
            }
            E::If { condition, then_branch, else_branch } => K::If {
                condition: self.lower(condition)?,
                then_branch: self.lower(then_branch)?,
                else_branch: self.lower(else_branch)?,
            },
            E::Flwor { clauses, result } => return self.flwor(clauses, result),
            E::Quantified { every, bindings, satisfies } => {
                let saved = self.locals.len();
                let lowered = (|| {
                    let mut out = Vec::with_capacity(bindings.len());
                    for (name, source) in bindings {
                        let source = self.lower(source)?;
                        let name = self.expanded(name, None)?;
                        self.locals.push(name.clone());
                        out.push((name, source));
                    }
                    Ok::<_, Error>((out, self.lower(satisfies)?))
                })();
                self.locals.truncate(saved);
                let (bindings, satisfies) = lowered?;
                K::Quantified { every: *every, bindings, satisfies }
            }
            E::InstanceOf(operand, ty) => K::InstanceOf(self.lower(operand)?, self.sequence_type(ty)?),
            E::TreatAs(operand, ty) => K::TreatAs(self.lower(operand)?, self.sequence_type(ty)?),
            E::CastableAs { operand, target, optional } => {
                K::Castable { operand: self.lower(operand)?, target: self.cast_target(target)?, optional: *optional }
            }
            E::CastAs { operand, target, optional } => {
                K::Cast { operand: self.lower(operand)?, target: self.cast_target(target)?, optional: *optional }
            }
            E::FunctionCall { name, args } => return self.call(name, args),
            E::NamedFunctionRef { name, arity } => return self.function_ref(name, *arity),
            E::InlineFunction { params, result, body } => {
                let mut lowered_params = Vec::with_capacity(params.len());
                for p in params {
                    let pname = self.expanded(&p.name, None)?;
                    if lowered_params.iter().any(|(n, _)| *n == pname) {
                        return Err(Error::from_code(ErrorCode::XQST0039, format!("duplicate parameter ${pname}")));
                    }
                    lowered_params.push((pname, p.ty.as_ref().map(|t| self.sequence_type(t)).transpose()?));
                }
                let names: Vec<_> = lowered_params.iter().map(|(n, _)| n.clone()).collect();
                let body = self.scoped(&names, |c| c.lower(body))?;
                if body.is_updating() {
                    return Err(updating_misplaced());
                }
                K::InlineFunction {
                    params: lowered_params,
                    result: result.as_ref().map(|t| self.sequence_type(t)).transpose()?,
                    body,
                }
            }
            E::DynamicCall { function, args } => {
                K::DynamicCall { function: self.lower(function)?, args: self.lower_args(args)? }
            }
            E::MapConstructor(entries) => K::MapConstructor(
                entries.iter().map(|(k, v)| Ok((self.lower(k)?, self.lower(v)?))).collect::<CResult<_>>()?,
            ),
            E::SquareArray(members) => K::SquareArray(self.lower_all(members)?),
            E::CurlyArray(content) => K::CurlyArray(self.lower(content)?),
            E::Lookup { base, key } => K::Lookup { base: self.lower(base)?, key: self.lookup_key(key)? },
            E::UnaryLookup(key) => K::UnaryLookup(self.lookup_key(key)?),
            E::DirElement { name, namespaces, attributes, content } => {
                self.ns_scopes.push(
                    namespaces.iter().map(|(p, u)| (p.clone().unwrap_or_default(), u.clone())).collect(),
                );
                let built = self.direct_element(name, attributes, content);
                self.ns_scopes.pop();
                built?
            }
            E::DirComment(text) => K::CommentConstructor(literal_string(text)),
            E::DirPi { target, data } => K::PiConstructor {
                target: NameSource::Static(QName::local(target)),
                content: literal_string(data),
            },
            E::CompDocument(content) => K::DocumentConstructor(self.lower(content)?),
            E::CompElement { name, content } => K::ElementConstructor {
                name: self.constructor_name(name, true)?,
                attributes: Vec::new(),
                content: vec![self.lower(content)?],
            },
            E::CompAttribute { name, content } => {
                K::AttributeConstructor { name: self.constructor_name(name, false)?, value: vec![self.lower(content)?] }
            }
            E::CompText(content) => K::TextConstructor(self.lower(content)?),
            E::CompComment(content) => K::CommentConstructor(self.lower(content)?),
            E::CompPi { target, content } => {
                K::PiConstructor { target: self.constructor_name(target, false)?, content: self.lower(content)? }
            }
            E::Insert { source, position, target } => {
                K::Insert { source: self.lower(source)?, position: *position, target: self.lower(target)? }
            }
            E::Delete(target) => K::Delete(self.lower(target)?),
            E::ReplaceNode { target, replacement } => {
                K::ReplaceNode { target: self.lower(target)?, replacement: self.lower(replacement)? }
            }
            E::ReplaceValue { target, value } => {
                K::ReplaceValue { target: self.lower(target)?, value: self.lower(value)? }
            }
            E::Rename { target, name } => K::Rename { target: self.lower(target)?, name: self.lower(name)? },
            E::Transform { copies, modify, result } => {
                let saved = self.locals.len();
                let lowered = (|| {
                    let mut out = Vec::with_capacity(copies.len());
                    for (name, source) in copies {
                        let source = self.lower(source)?;
                        let name = self.expanded(name, None)?;
                        self.locals.push(name.clone());
                        out.push((name, source));
                    }
                    Ok::<_, Error>((out, self.lower(modify)?, self.lower(result)?))
                })();
                self.locals.truncate(saved);
                let (copies, modify, result) = lowered?;
                K::Transform { copies, modify, result }
            }
        };
        Ok(Expression::rc(kind))
    }

    fn flwor(&mut self, clauses: &[ast::Clause], result: &ast::Expr) -> CResult<Rc<Expression>> {
        let saved = self.locals.len();
        let lowered = (|| {
            let mut out = Vec::with_capacity(clauses.len());
            for clause in clauses {
                out.push(match clause {
                    ast::Clause::For { var, ty, allowing_empty, position, source } => {
                        let source = self.lower(source)?;
                        let var = self.expanded(var, None)?;
                        let position = position.as_ref().map(|p| self.expanded(p, None)).transpose()?;
                        if position.as_ref() == Some(&var) {
                            return Err(Error::from_code(
                                ErrorCode::XQST0089,
                                format!("positional variable ${var} has the same name as its binding"),
                            ));
                        }
                        self.locals.push(var.clone());
                        self.locals.extend(position.iter().cloned());
                        let ty = ty.as_ref().map(|t| self.sequence_type(t)).transpose()?;
                        FlworClause::For { var, ty, allowing_empty: *allowing_empty, position, source }
                    }
                    ast::Clause::Let { var, ty, value } => {
                        let value = self.lower(value)?;
                        let var = self.expanded(var, None)?;
                        self.locals.push(var.clone());
                        let ty = ty.as_ref().map(|t| self.sequence_type(t)).transpose()?;
                        FlworClause::Let { var, ty, value }
                    }
                    ast::Clause::Where(cond) => FlworClause::Where(self.lower(cond)?),
                    ast::Clause::OrderBy { stable, specs } => FlworClause::OrderBy {
                        stable: *stable,
                        specs: specs
                            .iter()
                            .map(|s| {
                                Ok(OrderKeySpec {
                                    key: self.lower(&s.key)?,
                                    descending: s.descending,
                                    empty_greatest: s.empty_greatest,
                                })
                            })
                            .collect::<CResult<_>>()?,
                    },
                    ast::Clause::Count(var) => {
                        let var = self.expanded(var, None)?;
                        self.locals.push(var.clone());
                        FlworClause::Count(var)
                    }
                });
            }
            Ok((out, self.lower(result)?))
        })();
        self.locals.truncate(saved);
        let (clauses, result) = lowered?;
        Ok(Expression::rc(K::Flwor { clauses, result }))
    }

    fn lookup_key(&mut self, key: &ast::KeySpec) -> CResult<LookupKey> {
        Ok(match key {
            ast::KeySpec::Name(n) => LookupKey::Name(n.clone()),
            ast::KeySpec::Integer(i) => LookupKey::Integer(*i),
            ast::KeySpec::Expr(e) => LookupKey::Expr(self.lower(e)?),
            ast::KeySpec::Wildcard => LookupKey::Wildcard,
        })
    }

    fn call(&mut self, name: &ast::Name, args: &[Option<ast::Expr>]) -> CResult<Rc<Expression>> {
        let arity = args.len();
        let resolved = self.function_name(name, arity)?;
        if resolved.ns_uri.as_deref() == Some(XS) {
            if arity != 1 {
                return Err(unknown_function(&resolved, arity));
            }
            let target = self.constructor_target(&resolved)?;
            return match &args[0] {
                Some(arg) => {
                    let operand = self.lower(arg)?;
                    Ok(Expression::rc(K::Cast { operand, target, optional: true }))
                }
                None => Ok(constructor_function(target)),
            };
        }
        let args = self.lower_args(args)?;
        if let Some(function) = self.declared_function(&resolved, arity) {
            return Ok(Expression::rc(K::DeclaredCall { function, args }));
        }
        if self.ctx.signatures.accepts(&resolved, arity) {
            let params = self.ctx.signatures.param_types(&resolved, arity);
            return Ok(Expression::rc(K::FunctionCall { name: resolved, params, args }));
        }
        Err(unknown_function(&resolved, arity))
    }

    fn constructor_target(&self, name: &ExpandedName) -> CResult<AtomicType> {
        let target = AtomicType::from_local_name(&name.local)
            .filter(|t| *t != AtomicType::AnySimpleType)
            .ok_or_else(|| unknown_function(name, 1))?;
        if target == AtomicType::NOTATION || target.is_abstract() {
            return Err(Error::from_code(ErrorCode::XPST0017, format!("{name} has no constructor function")));
        }
        Ok(target)
    }

    fn function_ref(&mut self, name: &ast::Name, arity: usize) -> CResult<Rc<Expression>> {
        let resolved = self.function_name(name, arity)?;
        if resolved.ns_uri.as_deref() == Some(XS) && arity == 1 {
            return Ok(constructor_function(self.constructor_target(&resolved)?));
        }
        if let Some(function) = self.declared_function(&resolved, arity) {
            return Ok(Expression::rc(K::DeclaredFunctionRef(function)));
        }
        if self.ctx.signatures.accepts(&resolved, arity) {
            return Ok(Expression::rc(K::NamedFunctionRef { name: resolved, arity }));
        }
        Err(unknown_function(&resolved, arity))
    }

    fn constructor_name(&mut self, name: &ast::ConstructorName, element: bool) -> CResult<NameSource> {
        Ok(match name {
            ast::ConstructorName::Static(n) => {
                NameSource::Static(if element { self.element_qname(n)? } else { self.qname(n, None)? })
            }
            ast::ConstructorName::Computed(e) => NameSource::Computed(self.lower(e)?),
        })
    }

    fn direct_element(
        &mut self,
        name: &ast::Name,
        attributes: &[ast::DirAttribute],
        content: &[ast::ContentPart],
    ) -> CResult<K> {
        let qname = self.element_qname(name)?;
        let mut seen: Vec<ExpandedName> = Vec::with_capacity(attributes.len());
        let mut lowered_attributes = Vec::with_capacity(attributes.len());
        for attr in attributes {
            let aname = self.qname(&attr.name, None)?;
            let expanded = aname.expanded();
            if seen.contains(&expanded) {
                return Err(Error::from_code(ErrorCode::XQST0040, format!("attribute {expanded} appears twice")));
            }
            seen.push(expanded);
            let value = attr
                .value
                .iter()
                .map(|part| match part {
                    ast::ContentPart::Text(t) => Ok(literal_string(t)),
                    ast::ContentPart::Expr(e) => self.lower(e),
                })
                .collect::<CResult<Vec<_>>>()?;
            lowered_attributes.push(Expression::rc(K::AttributeConstructor { name: NameSource::Static(aname), value }));
        }
        let content = content
            .iter()
            .map(|part| match part {
                ast::ContentPart::Text(t) => Ok(Expression::rc(K::TextConstructor(literal_string(t)))),
                ast::ContentPart::Expr(e) => self.lower(e),
            })
            .collect::<CResult<Vec<_>>>()?;
        Ok(K::ElementConstructor { name: NameSource::Static(qname), attributes: lowered_attributes, content })
    }
}

fn literal_string(text: &str) -> Rc<Expression> {
    Expression::rc(K::Literal(AtomicValue::string(text)))
}

/// `xs:T#1` as an inline function casting its argument.
fn constructor_function(target: AtomicType) -> Rc<Expression> {
    let param = ExpandedName::local("value");
    let body = Expression::rc(K::Cast {
        operand: Expression::rc(K::Variable(param.clone())),
        target,
        optional: true,
    });
    Expression::rc(K::InlineFunction {
        params: vec![(param, Some(SequenceType::Typed(ItemType::Atomic(AtomicType::AnyAtomicType), Occurrence::ZeroOrOne)))],
        result: None,
        body,
    })
}

/// Rejects updating operands outside the positions that may hold them.
fn check_updating(expr: &Expression) -> CResult<()> {
    let simple = |e: &Rc<Expression>| if e.is_updating() { Err(updating_misplaced()) } else { Ok(()) };
    let mixed = |items: &[&Rc<Expression>]| {
        if items.iter().any(|e| e.is_updating())
            && items.iter().any(|e| !e.is_updating() && !e.is_empty_sequence())
        {
            return Err(updating_misplaced());
        }
        Ok(())
    };
    match &expr.kind {
        K::Sequence(items) => mixed(&items.iter().collect::<Vec<_>>()),
        K::If { condition, then_branch, else_branch } => {
            simple(condition)?;
            mixed(&[then_branch, else_branch])
        }
        K::Flwor { result, .. } => {
            expr.operands().into_iter().filter(|op| !Rc::ptr_eq(op, result)).try_for_each(simple)
        }
        K::Transform { copies, modify, result } => {
            copies.iter().try_for_each(|(_, e)| simple(e))?;
            simple(result)?;
            if !modify.is_updating() && !modify.is_empty_sequence() {
                return Err(Error::from_code(ErrorCode::XUST0002, "the modify clause must be an updating expression"));
            }
            Ok(())
        }
        _ => expr.operands().into_iter().try_for_each(simple),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::static_context::FunctionSignatures;
    use crate::consts::FNS;
    use crate::parser::{Language, parse};
    use rstest::rstest;

    fn signatures() -> Rc<FunctionSignatures> {
        let mut sigs = FunctionSignatures::default();
        sigs.register_ns(FNS, "true", 0, Some(0));
        sigs.register_ns(FNS, "count", 1, Some(1));
        sigs.register_ns(FNS, "last", 0, Some(0));
        Rc::new(sigs)
    }

    fn compile(text: &str, language: Language) -> CResult<CompiledQuery> {
        let module = parse(text, language)?;
        let modules = ModuleRegistry::new();
        let env = CompileEnv { modules: &modules, module_imports: &[], external_variables: &[] };
        compile_main(&module, StaticContext::new(signatures()), env)
    }

    #[rstest]
    #[case("$nope", ErrorCode::XPST0008)]
    #[case("nope()", ErrorCode::XPST0017)]
    #[case("fn:count(1, 2)", ErrorCode::XPST0017)]
    #[case("p:a", ErrorCode::XPST0081)]
    #[case("1 cast as xs:NOTATION", ErrorCode::XPST0080)]
    #[case("1 cast as xs:nope", ErrorCode::XPST0051)]
    fn static_errors(#[case] text: &str, #[case] code: ErrorCode) {
        let err = compile(text, Language::XPath31).unwrap_err();
        assert!(err.is(code), "{text}: {err}");
    }

    #[rstest]
    #[case("(delete node /a, 1)", ErrorCode::XUST0001)]
    #[case("count(delete node /a)", ErrorCode::XUST0001)]
    #[case("copy $c := /a modify 1 return $c", ErrorCode::XUST0002)]
    fn updating_rules(#[case] text: &str, #[case] code: ErrorCode) {
        let err = compile(text, Language::XQueryUpdate31).unwrap_err();
        assert!(err.is(code), "{text}: {err}");
    }

    #[test]
    fn updating_sequences_are_updating() {
        let q = compile("(delete node /a, ())", Language::XQueryUpdate31).unwrap();
        assert!(q.is_updating());
        let q = compile("copy $c := /a modify delete node $c/b return $c", Language::XQueryUpdate31).unwrap();
        assert!(!q.is_updating());
    }

    #[test]
    fn declared_functions_may_recurse() {
        let q = compile(
            "declare function local:f($n) { if ($n le 0) then 0 else local:f($n - 1) }; local:f(3)",
            Language::XQuery31,
        )
        .unwrap();
        assert!(matches!(q.expression.kind, K::DeclaredCall { .. }));
    }

    #[test]
    fn unprefixed_declarations_need_a_namespace() {
        let err = compile("declare function f() { 1 }; 1", Language::XQuery31).unwrap_err();
        assert!(err.is(ErrorCode::XQST0060));
    }

    #[test]
    fn predicates_record_last_usage() {
        let q = compile("a[last()]", Language::XPath31).unwrap();
        let K::Step { predicates, .. } = &q.expression.kind else { panic!("expected a step") };
        assert!(predicates[0].uses_last());
    }

    #[test]
    fn library_functions_must_be_in_the_module_namespace() {
        let module =
            parse("module namespace m = \"urn:m\"; declare function local:f() { 1 };", Language::XQuery31).unwrap();
        let modules = ModuleRegistry::new();
        let env = CompileEnv { modules: &modules, module_imports: &[], external_variables: &[] };
        let err = compile_library(&module, StaticContext::new(signatures()), env).unwrap_err();
        assert!(err.is(ErrorCode::XQST0048));
    }
}

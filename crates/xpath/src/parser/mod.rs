//! Query text to [`ast::Module`].
//!
//! The grammar in `xquery.pest` accepts the union of the supported languages. The builder
//! walks the pest pairs and rejects constructs that the selected [`Language`] does not allow.

pub mod ast;

use crate::engine::runtime::{Error, ErrorCode};
use ast::{
    ArithOp, Axis, Clause, CompOp, ConstructorName, ContentPart, DirAttribute, Expr, FunctionDecl, InsertPosition,
    ItemType, KeySpec, KindTest, Literal, Module, Name, NameTest, NodeCompOp, NodeTest, OrderSpec, Param, Prolog,
    SequenceType, SetOp, VarDecl,
};
use pest::Parser;
use pest::iterators::Pair;
use std::sync::Arc;

#[derive(pest_derive::Parser)]
#[grammar = "parser/xquery.pest"]
pub struct QueryParser;

/// The query language a source text is written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Language {
    #[default]
    XPath31,
    XQuery31,
    XQueryUpdate31,
}

impl Language {
    pub fn is_xquery(self) -> bool {
        !matches!(self, Language::XPath31)
    }

    pub fn allows_updates(self) -> bool {
        matches!(self, Language::XQueryUpdate31)
    }
}

/// Parses `text` as a module of the given language. XPath input becomes a main module with an
/// empty prolog.
pub fn parse(text: &str, language: Language) -> Result<Module, Error> {
    let rule = if language.is_xquery() { Rule::module } else { Rule::xpath };
    let mut pairs = QueryParser::parse(rule, text).map_err(|e| {
        let message = e.to_string();
        Error::from_code(ErrorCode::XPST0003, message).with_source(Some(Arc::new(e) as _))
    })?;
    let root = pairs.next().ok_or_else(|| Error::static_error("empty parse tree"))?;
    let builder = Builder { language };
    if language.is_xquery() {
        builder.module(root)
    } else {
        let body = significant(root).next().ok_or_else(|| Error::static_error("missing expression"))?;
        Ok(Module::Main { prolog: Prolog::default(), body: builder.expr(body)? })
    }
}

fn is_keyword(rule: Rule) -> bool {
    use Rule::*;
    matches!(
        rule,
        K_AFTER | K_ALLOWING | K_AND | K_ARRAY | K_AS | K_AT | K_ATTRIBUTE | K_BEFORE | K_BY | K_CAST | K_CASTABLE
            | K_COLLATION | K_COMMENT | K_COPY | K_COUNT | K_DECLARE | K_DEFAULT | K_DELETE | K_DOCUMENT | K_ELEMENT
            | K_ELSE | K_EMPTY | K_ENCODING | K_EXTERNAL | K_FIRST | K_FOR | K_FUNCTION | K_IF | K_IMPORT | K_IN
            | K_INSERT | K_INSTANCE | K_INTO | K_LAST | K_LET | K_MAP | K_MODIFY | K_MODULE | K_NAMESPACE | K_NODE
            | K_NODES | K_OF | K_OPTION | K_OR | K_ORDER | K_PROCESSING_INSTRUCTION | K_RENAME | K_REPLACE | K_RETURN
            | K_SATISFIES | K_SCHEMA | K_STABLE | K_TEXT | K_THEN | K_TO | K_TREAT | K_VALUE | K_VARIABLE | K_VERSION
            | K_WHERE | K_WITH | K_XQUERY | EOI
    )
}

/// Child pairs without keyword tokens.
fn significant(pair: Pair<'_, Rule>) -> impl Iterator<Item = Pair<'_, Rule>> {
    pair.into_inner().filter(|p| !is_keyword(p.as_rule()))
}

fn has_child(pair: &Pair<'_, Rule>, rule: Rule) -> bool {
    pair.clone().into_inner().any(|p| p.as_rule() == rule)
}

/// Precedence levels that only wrap their operand when no operator is present.
fn is_wrapper(rule: Rule) -> bool {
    use Rule::*;
    matches!(
        rule,
        expr | or_expr | and_expr | comparison_expr | string_concat_expr | range_expr | additive_expr
            | multiplicative_expr | union_expr | intersect_except_expr | instanceof_expr | treat_expr
            | castable_expr | cast_expr | arrow_expr | unary_expr | simple_map_expr | relative_path_expr
            | postfix_expr
    )
}

/// Descends through single-operand precedence levels, so the builder recurses once per
/// nesting level of the query instead of once per grammar level.
fn collapse(mut pair: Pair<'_, Rule>) -> Pair<'_, Rule> {
    loop {
        let passes_through = is_wrapper(pair.as_rule())
            || (pair.as_rule() == Rule::path_expr && !has_child(&pair, Rule::root) && !has_child(&pair, Rule::root_descendant));
        if !passes_through {
            return pair;
        }
        let mut inner = significant(pair.clone());
        match (inner.next(), inner.next()) {
            (Some(only), None) => pair = only,
            _ => return pair,
        }
    }
}

fn syntax(message: impl Into<String>) -> Error {
    Error::from_code(ErrorCode::XPST0003, message)
}

fn next<'a>(it: &mut impl Iterator<Item = Pair<'a, Rule>>, what: &str) -> Result<Pair<'a, Rule>, Error> {
    it.next().ok_or_else(|| syntax(format!("expected {what}")))
}

fn boxed(e: Expr) -> Box<Expr> {
    Box::new(e)
}

/// Decodes the five predefined entities and character references.
fn decode_references(text: &str) -> Result<String, Error> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(i) = rest.find('&') {
        out.push_str(&rest[..i]);
        let tail = &rest[i..];
        let end = tail.find(';').ok_or_else(|| syntax(format!("unterminated reference in '{text}'")))?;
        out.push(decode_reference(&tail[..=end])?);
        rest = &tail[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

fn decode_reference(reference: &str) -> Result<char, Error> {
    let body = &reference[1..reference.len() - 1];
    let code = match body {
        "lt" => return Ok('<'),
        "gt" => return Ok('>'),
        "amp" => return Ok('&'),
        "quot" => return Ok('"'),
        "apos" => return Ok('\''),
        _ => match body.strip_prefix("#x") {
            Some(hex) => u32::from_str_radix(hex, 16).ok(),
            None => body.strip_prefix('#').and_then(|d| d.parse().ok()),
        },
    };
    code.and_then(char::from_u32).ok_or_else(|| syntax(format!("invalid character reference {reference}")))
}

struct Builder {
    language: Language,
}

impl Builder {
    fn require_xquery(&self, what: &str) -> Result<(), Error> {
        if self.language.is_xquery() { Ok(()) } else { Err(syntax(format!("{what} is not allowed in XPath"))) }
    }

    fn require_updates(&self, what: &str) -> Result<(), Error> {
        if self.language.allows_updates() {
            Ok(())
        } else {
            Err(syntax(format!("{what} requires the XQuery Update Facility")))
        }
    }

    // ===== Modules and prolog =====

    fn module(&self, root: Pair<'_, Rule>) -> Result<Module, Error> {
        for part in significant(root) {
            match part.as_rule() {
                Rule::version_decl => {}
                Rule::library_module => {
                    let mut it = significant(part);
                    let decl = next(&mut it, "module declaration")?;
                    let mut d = significant(decl);
                    let prefix = next(&mut d, "module prefix")?.as_str().to_string();
                    let namespace = self.string_literal(next(&mut d, "module namespace")?)?;
                    let prolog = self.prolog(next(&mut it, "prolog")?)?;
                    return Ok(Module::Library { prefix, namespace, prolog });
                }
                Rule::main_module => {
                    let mut it = significant(part);
                    let prolog = self.prolog(next(&mut it, "prolog")?)?;
                    let body = self.expr(next(&mut it, "query body")?)?;
                    return Ok(Module::Main { prolog, body });
                }
                other => return Err(syntax(format!("unexpected {other:?} in module"))),
            }
        }
        Err(syntax("empty module"))
    }

    fn prolog(&self, pair: Pair<'_, Rule>) -> Result<Prolog, Error> {
        let mut prolog = Prolog::default();
        for decl in significant(pair) {
            match decl.as_rule() {
                Rule::default_namespace_decl => {
                    let mut it = significant(decl);
                    let kind = next(&mut it, "default namespace kind")?.as_str().to_string();
                    let uri = self.string_literal(next(&mut it, "namespace URI")?)?;
                    if kind == "element" {
                        prolog.default_element_namespace = Some(uri);
                    } else {
                        prolog.default_function_namespace = Some(uri);
                    }
                }
                Rule::namespace_decl => {
                    let mut it = significant(decl);
                    let prefix = next(&mut it, "prefix")?.as_str().to_string();
                    let uri = self.string_literal(next(&mut it, "namespace URI")?)?;
                    prolog.namespaces.push((prefix, uri));
                }
                Rule::module_import => {
                    let mut prefix = None;
                    let mut uri = None;
                    for p in significant(decl) {
                        match p.as_rule() {
                            Rule::ncname => prefix = Some(p.as_str().to_string()),
                            Rule::string_literal if uri.is_none() => uri = Some(self.string_literal(p)?),
                            _ => {}
                        }
                    }
                    let uri = uri.ok_or_else(|| syntax("module import without a namespace"))?;
                    prolog.imports.push((prefix, uri));
                }
                Rule::schema_import => return Err(syntax("schema import is not supported")),
                Rule::option_decl => {}
                Rule::var_decl => prolog.variables.push(self.var_decl(decl)?),
                Rule::function_decl => prolog.functions.push(self.function_decl(decl)?),
                other => return Err(syntax(format!("unexpected {other:?} in prolog"))),
            }
        }
        Ok(prolog)
    }

    fn var_decl(&self, pair: Pair<'_, Rule>) -> Result<VarDecl, Error> {
        let external = has_child(&pair, Rule::K_EXTERNAL);
        let mut name = None;
        let mut ty = None;
        let mut value = None;
        for p in significant(pair) {
            match p.as_rule() {
                Rule::annotation => {}
                Rule::eqname => name = Some(Name::parse(p.as_str())),
                Rule::type_declaration => ty = Some(self.type_declaration(p)?),
                _ => value = Some(self.expr(p)?),
            }
        }
        let name = name.ok_or_else(|| syntax("variable declaration without a name"))?;
        Ok(VarDecl { name, ty, external, value })
    }

    fn function_decl(&self, pair: Pair<'_, Rule>) -> Result<FunctionDecl, Error> {
        let mut updating = false;
        let mut name = None;
        let mut params = Vec::new();
        let mut result = None;
        let mut body = None;
        for p in significant(pair) {
            match p.as_rule() {
                Rule::annotation => {
                    let ann = significant(p).next().map(|n| Name::parse(n.as_str()));
                    updating |= ann.is_some_and(|n| n.local == "updating");
                }
                Rule::eqname => name = Some(Name::parse(p.as_str())),
                Rule::param_list => params = self.params(p)?,
                Rule::sequence_type => result = Some(self.sequence_type(p)?),
                Rule::enclosed_expr => body = Some(self.enclosed(p)?),
                _ => {}
            }
        }
        let name = name.ok_or_else(|| syntax("function declaration without a name"))?;
        if updating {
            self.require_updates("an updating function")?;
        }
        Ok(FunctionDecl { name, params, result, updating, body })
    }

    fn params(&self, pair: Pair<'_, Rule>) -> Result<Vec<Param>, Error> {
        significant(pair)
            .map(|param| {
                let mut it = significant(param);
                let name = Name::parse(next(&mut it, "parameter name")?.as_str());
                let ty = it.next().map(|t| self.type_declaration(t)).transpose()?;
                Ok(Param { name, ty })
            })
            .collect()
    }

    fn type_declaration(&self, pair: Pair<'_, Rule>) -> Result<SequenceType, Error> {
        let ty = significant(pair).next().ok_or_else(|| syntax("expected a sequence type"))?;
        self.sequence_type(ty)
    }

    // ===== Expressions =====

    fn expr(&self, pair: Pair<'_, Rule>) -> Result<Expr, Error> {
        let pair = collapse(pair);
        match pair.as_rule() {
            Rule::expr => {
                let items = significant(pair).map(|p| self.expr(p)).collect::<Result<Vec<_>, _>>()?;
                Ok(Expr::Sequence(items))
            }
            Rule::enclosed_expr => self.enclosed(pair),
            Rule::flwor_expr => self.flwor(pair),
            Rule::quantified_expr => self.quantified(pair),
            Rule::if_expr => {
                let mut it = significant(pair);
                let condition = self.expr(next(&mut it, "condition")?)?;
                let then_branch = self.expr(next(&mut it, "then branch")?)?;
                let else_branch = self.expr(next(&mut it, "else branch")?)?;
                Ok(Expr::If { condition: boxed(condition), then_branch: boxed(then_branch), else_branch: boxed(else_branch) })
            }
            Rule::insert_expr => self.insert(pair),
            Rule::delete_expr | Rule::rename_expr | Rule::replace_expr => self.update(pair),
            Rule::transform_expr => self.transform(pair),
            Rule::or_expr => self.fold_plain(pair, |l, r| Expr::Or(boxed(l), boxed(r))),
            Rule::and_expr => self.fold_plain(pair, |l, r| Expr::And(boxed(l), boxed(r))),
            Rule::comparison_expr => self.comparison(pair),
            Rule::string_concat_expr => self.fold_plain(pair, |l, r| Expr::Concat(boxed(l), boxed(r))),
            Rule::range_expr => self.fold_plain(pair, |l, r| Expr::Range(boxed(l), boxed(r))),
            Rule::additive_expr | Rule::multiplicative_expr => self.arithmetic(pair),
            Rule::union_expr | Rule::intersect_except_expr => self.set_operation(pair),
            Rule::instanceof_expr | Rule::treat_expr => self.sequence_type_test(pair),
            Rule::castable_expr | Rule::cast_expr => self.cast(pair),
            Rule::arrow_expr => self.arrow(pair),
            Rule::unary_expr => self.unary(pair),
            Rule::simple_map_expr => self.fold_plain(pair, |l, r| Expr::SimpleMap(boxed(l), boxed(r))),
            Rule::path_expr => self.path(pair),
            Rule::relative_path_expr => self.relative_path(pair, None),
            Rule::axis_step => self.axis_step(pair),
            Rule::postfix_expr => self.postfix(pair),
            _ => self.primary(pair),
        }
    }

    fn update(&self, pair: Pair<'_, Rule>) -> Result<Expr, Error> {
        match pair.as_rule() {
            Rule::delete_expr => {
                self.require_updates("delete")?;
                let target = significant(pair).next().ok_or_else(|| syntax("expected a delete target"))?;
                Ok(Expr::Delete(boxed(self.expr(target)?)))
            }
            Rule::rename_expr => {
                self.require_updates("rename")?;
                let mut it = significant(pair);
                let target = self.expr(next(&mut it, "rename target")?)?;
                let name = self.expr(next(&mut it, "new name")?)?;
                Ok(Expr::Rename { target: boxed(target), name: boxed(name) })
            }
            _ => {
                self.require_updates("replace")?;
                let value_of = has_child(&pair, Rule::replace_value_of);
                let mut it = significant(pair).filter(|p| p.as_rule() != Rule::replace_value_of);
                let target = boxed(self.expr(next(&mut it, "replace target")?)?);
                let with = boxed(self.expr(next(&mut it, "replacement")?)?);
                Ok(if value_of {
                    Expr::ReplaceValue { target, value: with }
                } else {
                    Expr::ReplaceNode { target, replacement: with }
                })
            }
        }
    }

    fn sequence_type_test(&self, pair: Pair<'_, Rule>) -> Result<Expr, Error> {
        let is_instance = pair.as_rule() == Rule::instanceof_expr;
        let mut it = significant(pair);
        let operand = self.expr(next(&mut it, "operand")?)?;
        match it.next() {
            None => Ok(operand),
            Some(ty) if is_instance => Ok(Expr::InstanceOf(boxed(operand), self.sequence_type(ty)?)),
            Some(ty) => Ok(Expr::TreatAs(boxed(operand), self.sequence_type(ty)?)),
        }
    }

    fn cast(&self, pair: Pair<'_, Rule>) -> Result<Expr, Error> {
        let castable = pair.as_rule() == Rule::castable_expr;
        let mut it = significant(pair);
        let operand = self.expr(next(&mut it, "operand")?)?;
        let Some(single) = it.next() else { return Ok(operand) };
        let optional = has_child(&single, Rule::optional_marker);
        let target = Name::parse(next(&mut significant(single), "type name")?.as_str());
        Ok(if castable {
            Expr::CastableAs { operand: boxed(operand), target, optional }
        } else {
            Expr::CastAs { operand: boxed(operand), target, optional }
        })
    }

    fn unary(&self, pair: Pair<'_, Rule>) -> Result<Expr, Error> {
        let mut negate = false;
        let mut signed = false;
        let mut operand = None;
        for p in significant(pair) {
            if p.as_rule() == Rule::unary_sign {
                signed = true;
                negate ^= p.as_str() == "-";
            } else {
                operand = Some(self.expr(p)?);
            }
        }
        let operand = operand.ok_or_else(|| syntax("expected an operand"))?;
        Ok(if signed { Expr::Unary { negate, operand: boxed(operand) } } else { operand })
    }

    fn enclosed(&self, pair: Pair<'_, Rule>) -> Result<Expr, Error> {
        match significant(pair).next() {
            Some(e) => self.expr(e),
            None => Ok(Expr::empty()),
        }
    }

    /// Left fold over operands separated by anonymous tokens.
    fn fold_plain(&self, pair: Pair<'_, Rule>, combine: impl Fn(Expr, Expr) -> Expr) -> Result<Expr, Error> {
        let mut it = significant(pair);
        let mut acc = self.expr(next(&mut it, "operand")?)?;
        for p in it {
            acc = combine(acc, self.expr(p)?);
        }
        Ok(acc)
    }

    fn comparison(&self, pair: Pair<'_, Rule>) -> Result<Expr, Error> {
        let mut it = significant(pair);
        let left = self.expr(next(&mut it, "operand")?)?;
        let Some(op) = it.next() else { return Ok(left) };
        let right = boxed(self.expr(next(&mut it, "operand")?)?);
        let left = boxed(left);
        let general = |op| Expr::GeneralComparison { op, left: left.clone(), right: right.clone() };
        let value = |op| Expr::ValueComparison { op, left: left.clone(), right: right.clone() };
        let node = |op| Expr::NodeComparison { op, left: left.clone(), right: right.clone() };
        Ok(match op.as_str() {
            "=" => general(CompOp::Eq),
            "!=" => general(CompOp::Ne),
            "<" => general(CompOp::Lt),
            "<=" => general(CompOp::Le),
            ">" => general(CompOp::Gt),
            ">=" => general(CompOp::Ge),
            "eq" => value(CompOp::Eq),
            "ne" => value(CompOp::Ne),
            "lt" => value(CompOp::Lt),
            "le" => value(CompOp::Le),
            "gt" => value(CompOp::Gt),
            "ge" => value(CompOp::Ge),
            "is" => node(NodeCompOp::Is),
            "<<" => node(NodeCompOp::Precedes),
            ">>" => node(NodeCompOp::Follows),
            other => return Err(syntax(format!("unknown comparison operator {other}"))),
        })
    }

    fn arithmetic(&self, pair: Pair<'_, Rule>) -> Result<Expr, Error> {
        let mut it = significant(pair);
        let mut acc = self.expr(next(&mut it, "operand")?)?;
        while let Some(op) = it.next() {
            let op = match op.as_str() {
                "+" => ArithOp::Add,
                "-" => ArithOp::Sub,
                "*" => ArithOp::Mul,
                "div" => ArithOp::Div,
                "idiv" => ArithOp::IDiv,
                "mod" => ArithOp::Mod,
                other => return Err(syntax(format!("unknown operator {other}"))),
            };
            let right = self.expr(next(&mut it, "operand")?)?;
            acc = Expr::Arithmetic { op, left: boxed(acc), right: boxed(right) };
        }
        Ok(acc)
    }

    fn set_operation(&self, pair: Pair<'_, Rule>) -> Result<Expr, Error> {
        let mut it = significant(pair);
        let mut acc = self.expr(next(&mut it, "operand")?)?;
        while let Some(op) = it.next() {
            let op = match op.as_str() {
                "|" | "union" => SetOp::Union,
                "intersect" => SetOp::Intersect,
                _ => SetOp::Except,
            };
            let right = self.expr(next(&mut it, "operand")?)?;
            acc = Expr::SetOperation { op, left: boxed(acc), right: boxed(right) };
        }
        Ok(acc)
    }

    fn arrow(&self, pair: Pair<'_, Rule>) -> Result<Expr, Error> {
        let mut it = significant(pair);
        let mut acc = self.expr(next(&mut it, "operand")?)?;
        for step in it {
            let mut parts = significant(step);
            let spec = next(&mut parts, "arrow target")?;
            let mut args = vec![Some(acc)];
            args.extend(self.arguments(next(&mut parts, "argument list")?)?);
            let target = next(&mut significant(spec), "arrow target")?;
            acc = match target.as_rule() {
                Rule::eqname => Expr::FunctionCall { name: Name::parse(target.as_str()), args },
                _ => Expr::DynamicCall { function: boxed(self.primary(target)?), args },
            };
        }
        Ok(acc)
    }

    fn arguments(&self, pair: Pair<'_, Rule>) -> Result<Vec<Option<Expr>>, Error> {
        significant(pair)
            .map(|arg| {
                let inner = next(&mut significant(arg), "argument")?;
                if inner.as_rule() == Rule::argument_placeholder { Ok(None) } else { self.expr(inner).map(Some) }
            })
            .collect()
    }

    // ===== Paths =====

    fn descendant_or_self() -> Expr {
        Expr::Step { axis: Axis::DescendantOrSelf, test: NodeTest::Kind(KindTest::AnyKind), predicates: Vec::new() }
    }

    fn path(&self, pair: Pair<'_, Rule>) -> Result<Expr, Error> {
        let mut it = significant(pair);
        let first = next(&mut it, "path")?;
        match first.as_rule() {
            Rule::root_descendant => {
                let start = Expr::Path(boxed(Expr::Root), boxed(Self::descendant_or_self()));
                self.relative_path(next(&mut it, "relative path")?, Some(start))
            }
            Rule::root => match it.next() {
                Some(rel) => self.relative_path(rel, Some(Expr::Root)),
                None => Ok(Expr::Root),
            },
            _ => self.relative_path(first, None),
        }
    }

    fn relative_path(&self, pair: Pair<'_, Rule>, start: Option<Expr>) -> Result<Expr, Error> {
        let mut it = significant(pair);
        let first = self.expr(next(&mut it, "step")?)?;
        let mut acc = match start {
            Some(s) => Expr::Path(boxed(s), boxed(first)),
            None => first,
        };
        while let Some(sep) = it.next() {
            let step = self.expr(next(&mut it, "step")?)?;
            if sep.as_str() == "//" {
                acc = Expr::Path(boxed(acc), boxed(Self::descendant_or_self()));
            }
            acc = Expr::Path(boxed(acc), boxed(step));
        }
        Ok(acc)
    }

    fn axis_step(&self, pair: Pair<'_, Rule>) -> Result<Expr, Error> {
        let mut it = significant(pair);
        let step = next(&mut it, "step")?;
        let predicates = it.map(|p| self.predicate(p)).collect::<Result<Vec<_>, _>>()?;
        let mut parts = significant(step).peekable();
        let head = next(&mut parts, "step")?;
        let (axis, test) = match head.as_rule() {
            Rule::forward_axis | Rule::reverse_axis => {
                let name = head.as_str().trim_end_matches("::");
                let axis = Axis::from_name(name).ok_or_else(|| syntax(format!("unknown axis {name}")))?;
                (axis, self.node_test(next(&mut parts, "node test")?)?)
            }
            Rule::abbrev_reverse_step => (Axis::Parent, NodeTest::Kind(KindTest::AnyKind)),
            Rule::abbrev_forward_step => {
                let mut inner = significant(head).peekable();
                let at = inner.next_if(|p| p.as_rule() == Rule::attribute_marker).is_some();
                let test = self.node_test(next(&mut inner, "node test")?)?;
                let axis = match &test {
                    _ if at => Axis::Attribute,
                    NodeTest::Kind(KindTest::Attribute(_)) => Axis::Attribute,
                    NodeTest::Kind(KindTest::NamespaceNode) => Axis::Namespace,
                    _ => Axis::Child,
                };
                (axis, test)
            }
            other => return Err(syntax(format!("unexpected {other:?} in step"))),
        };
        if axis == Axis::Namespace {
            return Err(Error::from_code(ErrorCode::XPST0003, "the namespace axis is not supported"));
        }
        Ok(Expr::Step { axis, test, predicates })
    }

    fn node_test(&self, pair: Pair<'_, Rule>) -> Result<NodeTest, Error> {
        match pair.as_rule() {
            Rule::kind_test => Ok(NodeTest::Kind(self.kind_test(pair)?)),
            Rule::name_test => {
                let inner = next(&mut significant(pair), "name test")?;
                if inner.as_rule() == Rule::eqname {
                    return Ok(NodeTest::Name(NameTest::Name(Name::parse(inner.as_str()))));
                }
                let text = inner.as_str();
                Ok(NodeTest::Name(if text == "*" {
                    NameTest::Any
                } else if let Some(local) = text.strip_prefix("*:") {
                    NameTest::Local(local.to_string())
                } else if let Some(uri) = text.strip_prefix("Q{").and_then(|t| t.strip_suffix("}*")) {
                    NameTest::Namespace(Name { prefix: None, uri: Some(uri.to_string()), local: String::new() })
                } else {
                    let prefix = text.trim_end_matches(":*");
                    NameTest::Namespace(Name { prefix: Some(prefix.to_string()), uri: None, local: String::new() })
                }))
            }
            other => Err(syntax(format!("unexpected {other:?} in node test"))),
        }
    }

    fn predicate(&self, pair: Pair<'_, Rule>) -> Result<Expr, Error> {
        self.expr(next(&mut significant(pair), "predicate")?)
    }

    fn postfix(&self, pair: Pair<'_, Rule>) -> Result<Expr, Error> {
        let mut it = significant(pair);
        let mut acc = self.primary(next(&mut it, "primary expression")?)?;
        for p in it {
            acc = match p.as_rule() {
                Rule::predicate => Expr::Filter { base: boxed(acc), predicate: boxed(self.predicate(p)?) },
                Rule::argument_list => Expr::DynamicCall { function: boxed(acc), args: self.arguments(p)? },
                Rule::lookup => {
                    let key = self.key_specifier(next(&mut significant(p), "key")?)?;
                    Expr::Lookup { base: boxed(acc), key }
                }
                other => return Err(syntax(format!("unexpected {other:?} after primary expression"))),
            };
        }
        Ok(acc)
    }

    fn key_specifier(&self, pair: Pair<'_, Rule>) -> Result<KeySpec, Error> {
        let inner = next(&mut significant(pair), "key")?;
        Ok(match inner.as_rule() {
            Rule::ncname => KeySpec::Name(inner.as_str().to_string()),
            Rule::integer_literal => KeySpec::Integer(
                inner.as_str().parse().map_err(|_| syntax(format!("integer key {} is too large", inner.as_str())))?,
            ),
            Rule::lookup_wildcard => KeySpec::Wildcard,
            _ => KeySpec::Expr(boxed(self.primary(inner)?)),
        })
    }

    // ===== Primary expressions =====

    fn primary(&self, pair: Pair<'_, Rule>) -> Result<Expr, Error> {
        match pair.as_rule() {
            Rule::integer_literal => {
                let text = pair.as_str();
                match text.parse::<i128>() {
                    Ok(v) => Ok(Expr::Literal(Literal::Integer(v))),
                    Err(_) => Err(Error::from_code(ErrorCode::FOAR0002, format!("integer literal {text} is too large"))),
                }
            }
            Rule::decimal_literal => Ok(Expr::Literal(Literal::Decimal(pair.as_str().to_string()))),
            Rule::double_literal => pair
                .as_str()
                .parse::<f64>()
                .map(|d| Expr::Literal(Literal::Double(d)))
                .map_err(|_| syntax(format!("invalid double literal {}", pair.as_str()))),
            Rule::string_literal => Ok(Expr::Literal(Literal::String(self.string_literal(pair)?))),
            Rule::var_ref => Ok(Expr::VarRef(Name::parse(next(&mut significant(pair), "variable name")?.as_str()))),
            Rule::parenthesized_expr => match significant(pair).next() {
                Some(e) => self.expr(e),
                None => Ok(Expr::empty()),
            },
            Rule::context_item_expr => Ok(Expr::ContextItem),
            Rule::named_function_ref => {
                let mut it = significant(pair);
                let name = Name::parse(next(&mut it, "function name")?.as_str());
                let arity = next(&mut it, "arity")?
                    .as_str()
                    .parse()
                    .map_err(|_| syntax("function arity out of range"))?;
                Ok(Expr::NamedFunctionRef { name, arity })
            }
            Rule::inline_function_expr => {
                let mut params = Vec::new();
                let mut result = None;
                let mut body = Expr::empty();
                for p in significant(pair) {
                    match p.as_rule() {
                        Rule::param_list => params = self.params(p)?,
                        Rule::sequence_type => result = Some(self.sequence_type(p)?),
                        Rule::enclosed_expr => body = self.enclosed(p)?,
                        _ => {}
                    }
                }
                Ok(Expr::InlineFunction { params, result, body: boxed(body) })
            }
            Rule::map_constructor => {
                let entries = significant(pair)
                    .map(|entry| {
                        let mut it = significant(entry);
                        let key = self.expr(next(&mut it, "map key")?)?;
                        let value = self.expr(next(&mut it, "map value")?)?;
                        Ok((key, value))
                    })
                    .collect::<Result<Vec<_>, Error>>()?;
                Ok(Expr::MapConstructor(entries))
            }
            Rule::array_constructor => {
                let inner = next(&mut significant(pair), "array")?;
                if inner.as_rule() == Rule::square_array {
                    let members = significant(inner).map(|m| self.expr(m)).collect::<Result<Vec<_>, _>>()?;
                    Ok(Expr::SquareArray(members))
                } else {
                    let body = next(&mut significant(inner), "array content")?;
                    Ok(Expr::CurlyArray(boxed(self.enclosed(body)?)))
                }
            }
            Rule::unary_lookup => Ok(Expr::UnaryLookup(self.key_specifier(next(&mut significant(pair), "key")?)?)),
            Rule::function_call => {
                let mut it = significant(pair);
                let name = Name::parse(next(&mut it, "function name")?.as_str());
                let args = self.arguments(next(&mut it, "argument list")?)?;
                Ok(Expr::FunctionCall { name, args })
            }
            Rule::dir_elem_constructor => {
                self.require_xquery("a direct element constructor")?;
                self.direct_element(pair)
            }
            Rule::dir_comment_constructor => {
                self.require_xquery("a direct comment constructor")?;
                let text = significant(pair).next().map(|p| p.as_str().to_string()).unwrap_or_default();
                Ok(Expr::DirComment(text))
            }
            Rule::dir_pi_constructor => {
                self.require_xquery("a direct processing-instruction constructor")?;
                let mut it = significant(pair);
                let target = next(&mut it, "target")?.as_str().to_string();
                let data = it.next().map(|p| p.as_str().trim_start().to_string()).unwrap_or_default();
                Ok(Expr::DirPi { target, data })
            }
            Rule::comp_doc_constructor
            | Rule::comp_elem_constructor
            | Rule::comp_attr_constructor
            | Rule::comp_text_constructor
            | Rule::comp_comment_constructor
            | Rule::comp_pi_constructor => {
                self.require_xquery("a computed constructor")?;
                self.computed(pair)
            }
            Rule::enclosed_expr => self.enclosed(pair),
            Rule::expr => self.expr(pair),
            other => Err(syntax(format!("unsupported construct {other:?}"))),
        }
    }

    fn string_literal(&self, pair: Pair<'_, Rule>) -> Result<String, Error> {
        let Some(inner) = pair.into_inner().next() else { return Ok(String::new()) };
        let raw = match inner.as_rule() {
            Rule::dbl_string_inner => inner.as_str().replace("\"\"", "\""),
            _ => inner.as_str().replace("''", "'"),
        };
        if self.language.is_xquery() { decode_references(&raw) } else { Ok(raw) }
    }

    // ===== FLWOR, quantifiers, updates =====

    fn flwor(&self, pair: Pair<'_, Rule>) -> Result<Expr, Error> {
        let mut clauses = Vec::new();
        let mut result = None;
        for clause in significant(pair) {
            match clause.as_rule() {
                Rule::for_clause => {
                    for binding in significant(clause) {
                        let mut var = None;
                        let mut ty = None;
                        let mut allowing_empty = false;
                        let mut position = None;
                        let mut source = None;
                        for p in significant(binding) {
                            match p.as_rule() {
                                Rule::eqname => var = Some(Name::parse(p.as_str())),
                                Rule::type_declaration => {
                                    self.require_xquery("a typed for binding")?;
                                    ty = Some(self.type_declaration(p)?);
                                }
                                Rule::allowing_empty => {
                                    self.require_xquery("allowing empty")?;
                                    allowing_empty = true;
                                }
                                Rule::positional_var => {
                                    self.require_xquery("a positional variable")?;
                                    position =
                                        Some(Name::parse(next(&mut significant(p), "positional variable")?.as_str()));
                                }
                                _ => source = Some(self.expr(p)?),
                            }
                        }
                        let var = var.ok_or_else(|| syntax("for binding without a variable"))?;
                        let source = source.ok_or_else(|| syntax("for binding without a source"))?;
                        clauses.push(Clause::For { var, ty, allowing_empty, position, source });
                    }
                }
                Rule::let_clause => {
                    for binding in significant(clause) {
                        let mut it = significant(binding).peekable();
                        let var = Name::parse(next(&mut it, "variable")?.as_str());
                        let ty = match it.next_if(|p| p.as_rule() == Rule::type_declaration) {
                            Some(t) => {
                                self.require_xquery("a typed let binding")?;
                                Some(self.type_declaration(t)?)
                            }
                            None => None,
                        };
                        let value = self.expr(next(&mut it, "let value")?)?;
                        clauses.push(Clause::Let { var, ty, value });
                    }
                }
                Rule::where_clause => {
                    self.require_xquery("a where clause")?;
                    clauses.push(Clause::Where(self.expr(next(&mut significant(clause), "condition")?)?));
                }
                Rule::order_by_clause => {
                    self.require_xquery("an order by clause")?;
                    let stable = has_child(&clause, Rule::K_STABLE);
                    let specs = significant(clause)
                        .map(|spec| {
                            let mut key = None;
                            let mut descending = false;
                            let mut empty_greatest = false;
                            for p in significant(spec) {
                                match p.as_rule() {
                                    Rule::order_direction => descending = p.as_str().starts_with("descending"),
                                    Rule::empty_order => {
                                        empty_greatest = significant(p).any(|k| k.as_str().starts_with("greatest"));
                                    }
                                    Rule::string_literal => {}
                                    _ => key = Some(self.expr(p)?),
                                }
                            }
                            let key = key.ok_or_else(|| syntax("order spec without a key"))?;
                            Ok(OrderSpec { key, descending, empty_greatest })
                        })
                        .collect::<Result<Vec<_>, Error>>()?;
                    clauses.push(Clause::OrderBy { stable, specs });
                }
                Rule::count_clause => {
                    self.require_xquery("a count clause")?;
                    clauses.push(Clause::Count(Name::parse(next(&mut significant(clause), "variable")?.as_str())));
                }
                Rule::return_clause => result = Some(self.expr(next(&mut significant(clause), "return")?)?),
                other => return Err(syntax(format!("unexpected {other:?} in FLWOR expression"))),
            }
        }
        let result = result.ok_or_else(|| syntax("FLWOR expression without return"))?;
        Ok(Expr::Flwor { clauses, result: boxed(result) })
    }

    fn quantified(&self, pair: Pair<'_, Rule>) -> Result<Expr, Error> {
        let mut every = false;
        let mut bindings = Vec::new();
        let mut satisfies = None;
        for p in significant(pair) {
            match p.as_rule() {
                Rule::quantifier => every = p.as_str().starts_with("every"),
                Rule::quantified_binding => {
                    let mut it = significant(p).filter(|b| b.as_rule() != Rule::type_declaration);
                    let var = Name::parse(next(&mut it, "variable")?.as_str());
                    let source = self.expr(next(&mut it, "binding sequence")?)?;
                    bindings.push((var, source));
                }
                _ => satisfies = Some(self.expr(p)?),
            }
        }
        let satisfies = satisfies.ok_or_else(|| syntax("quantified expression without satisfies"))?;
        Ok(Expr::Quantified { every, bindings, satisfies: boxed(satisfies) })
    }

    fn insert(&self, pair: Pair<'_, Rule>) -> Result<Expr, Error> {
        self.require_updates("insert")?;
        let mut it = significant(pair);
        let source = self.expr(next(&mut it, "insert source")?)?;
        let position = next(&mut it, "insert position")?;
        let position = if has_child(&position, Rule::K_FIRST) {
            InsertPosition::AsFirst
        } else if has_child(&position, Rule::K_LAST) {
            InsertPosition::AsLast
        } else if has_child(&position, Rule::K_BEFORE) {
            InsertPosition::Before
        } else if has_child(&position, Rule::K_AFTER) {
            InsertPosition::After
        } else {
            InsertPosition::Into
        };
        let target = self.expr(next(&mut it, "insert target")?)?;
        Ok(Expr::Insert { source: boxed(source), position, target: boxed(target) })
    }

    fn transform(&self, pair: Pair<'_, Rule>) -> Result<Expr, Error> {
        self.require_updates("copy/modify")?;
        let mut copies = Vec::new();
        let mut rest = Vec::new();
        for p in significant(pair) {
            if p.as_rule() == Rule::copy_binding {
                let mut it = significant(p);
                let var = Name::parse(next(&mut it, "copy variable")?.as_str());
                copies.push((var, self.expr(next(&mut it, "copy source")?)?));
            } else {
                rest.push(self.expr(p)?);
            }
        }
        let mut rest = rest.into_iter();
        let modify = rest.next().ok_or_else(|| syntax("copy without modify"))?;
        let result = rest.next().ok_or_else(|| syntax("copy without return"))?;
        Ok(Expr::Transform { copies, modify: boxed(modify), result: boxed(result) })
    }

    // ===== Constructors =====

    fn direct_element(&self, pair: Pair<'_, Rule>) -> Result<Expr, Error> {
        let mut it = significant(pair);
        let start = next(&mut it, "element name")?.as_str().to_string();
        let mut namespaces = Vec::new();
        let mut attributes = Vec::new();
        let mut content: Vec<ContentPart> = Vec::new();
        let mut end = None;
        for p in it {
            match p.as_rule() {
                Rule::dir_attribute_list => {
                    for attr in significant(p) {
                        let mut a = significant(attr);
                        let name = next(&mut a, "attribute name")?.as_str().to_string();
                        let value = self.attribute_value(next(&mut a, "attribute value")?)?;
                        if name == "xmlns" || name.starts_with("xmlns:") {
                            let uri = match value.as_slice() {
                                [] => String::new(),
                                [ContentPart::Text(t)] => t.clone(),
                                _ => {
                                    return Err(Error::from_code(
                                        ErrorCode::XQST0022,
                                        "namespace declaration attributes must be literal",
                                    ));
                                }
                            };
                            namespaces.push((name.strip_prefix("xmlns:").map(str::to_string), uri));
                        } else {
                            attributes.push(DirAttribute { name: Name::parse(&name), value });
                        }
                    }
                }
                Rule::qname => end = Some(p.as_str().to_string()),
                Rule::elem_text => {
                    let text = p.as_str();
                    if !text.chars().all(|c| matches!(c, ' ' | '\t' | '\r' | '\n')) {
                        push_text(&mut content, text);
                    }
                }
                Rule::cdata_section => {
                    let text = significant(p).next().map(|c| c.as_str()).unwrap_or_default();
                    push_text(&mut content, text);
                }
                Rule::predefined_entity_ref | Rule::char_ref => push_text(&mut content, &decode_references(p.as_str())?),
                Rule::escaped_lbrace => push_text(&mut content, "{"),
                Rule::escaped_rbrace => push_text(&mut content, "}"),
                Rule::enclosed_expr => content.push(ContentPart::Expr(self.enclosed(p)?)),
                _ => content.push(ContentPart::Expr(self.primary(p)?)),
            }
        }
        if let Some(end) = end
            && end != start
        {
            return Err(Error::from_code(ErrorCode::XQST0118, format!("end tag </{end}> does not match <{start}>")));
        }
        Ok(Expr::DirElement { name: Name::parse(&start), namespaces, attributes, content })
    }

    fn attribute_value(&self, pair: Pair<'_, Rule>) -> Result<Vec<ContentPart>, Error> {
        let mut parts = Vec::new();
        for p in significant(pair) {
            match p.as_rule() {
                Rule::escape_quot => push_text(&mut parts, "\""),
                Rule::escape_apos => push_text(&mut parts, "'"),
                Rule::quot_attr_text | Rule::apos_attr_text => {
                    let normalized: String =
                        p.as_str().chars().map(|c| if matches!(c, '\t' | '\n' | '\r') { ' ' } else { c }).collect();
                    push_text(&mut parts, &normalized);
                }
                Rule::predefined_entity_ref | Rule::char_ref => push_text(&mut parts, &decode_references(p.as_str())?),
                Rule::escaped_lbrace => push_text(&mut parts, "{"),
                Rule::escaped_rbrace => push_text(&mut parts, "}"),
                Rule::enclosed_expr => parts.push(ContentPart::Expr(self.enclosed(p)?)),
                other => return Err(syntax(format!("unexpected {other:?} in attribute value"))),
            }
        }
        Ok(parts)
    }

    fn computed(&self, pair: Pair<'_, Rule>) -> Result<Expr, Error> {
        let rule = pair.as_rule();
        let mut it = significant(pair);
        let mut name = None;
        if matches!(rule, Rule::comp_elem_constructor | Rule::comp_attr_constructor | Rule::comp_pi_constructor) {
            let n = next(&mut it, "constructor name")?;
            let inner = next(&mut significant(n), "constructor name")?;
            name = Some(if inner.as_rule() == Rule::eqname {
                ConstructorName::Static(Name::parse(inner.as_str()))
            } else {
                ConstructorName::Computed(boxed(self.expr(inner)?))
            });
        }
        let content = boxed(self.enclosed(next(&mut it, "constructor content")?)?);
        let name = || name.clone().ok_or_else(|| syntax("constructor without a name"));
        Ok(match rule {
            Rule::comp_doc_constructor => Expr::CompDocument(content),
            Rule::comp_elem_constructor => Expr::CompElement { name: name()?, content },
            Rule::comp_attr_constructor => Expr::CompAttribute { name: name()?, content },
            Rule::comp_text_constructor => Expr::CompText(content),
            Rule::comp_comment_constructor => Expr::CompComment(content),
            _ => Expr::CompPi { target: name()?, content },
        })
    }

    // ===== Types =====

    fn sequence_type(&self, pair: Pair<'_, Rule>) -> Result<SequenceType, Error> {
        let mut it = significant(pair);
        let first = next(&mut it, "sequence type")?;
        if first.as_rule() == Rule::empty_sequence_type {
            return Ok(SequenceType::Empty);
        }
        let item = self.item_type(first)?;
        let occurrence = it.next().map_or(crate::types::Occurrence::One, |o| {
            crate::types::Occurrence::from_indicator(o.as_str())
        });
        Ok(SequenceType::Item(item, occurrence))
    }

    fn item_type(&self, pair: Pair<'_, Rule>) -> Result<ItemType, Error> {
        let inner = next(&mut significant(pair), "item type")?;
        Ok(match inner.as_rule() {
            Rule::kind_test => ItemType::Kind(self.kind_test(inner)?),
            Rule::any_item_test => ItemType::AnyItem,
            Rule::atomic_type => ItemType::Atomic(Name::parse(inner.as_str().trim())),
            Rule::parenthesized_item_type => self.item_type(next(&mut significant(inner), "item type")?)?,
            Rule::function_test => {
                let test = significant(inner)
                    .find(|p| p.as_rule() != Rule::annotation)
                    .ok_or_else(|| syntax("expected a function test"))?;
                if test.as_rule() == Rule::any_function_test {
                    ItemType::AnyFunction
                } else {
                    let mut types = significant(test).map(|t| self.sequence_type(t)).collect::<Result<Vec<_>, _>>()?;
                    let result = types.pop().ok_or_else(|| syntax("function test without a result type"))?;
                    ItemType::Function { params: types, result: Box::new(result) }
                }
            }
            Rule::map_test => {
                let mut it = significant(inner);
                match (it.next(), it.next()) {
                    (Some(key), Some(value)) => {
                        ItemType::Map(Name::parse(key.as_str().trim()), Box::new(self.sequence_type(value)?))
                    }
                    _ => ItemType::AnyMap,
                }
            }
            Rule::array_test => match significant(inner).next() {
                Some(member) => ItemType::Array(Box::new(self.sequence_type(member)?)),
                None => ItemType::AnyArray,
            },
            other => return Err(syntax(format!("unexpected {other:?} in item type"))),
        })
    }

    fn kind_test(&self, pair: Pair<'_, Rule>) -> Result<KindTest, Error> {
        let inner = next(&mut significant(pair), "kind test")?;
        let rule = inner.as_rule();
        let optional_name = |p: Pair<'_, Rule>| -> Option<Name> {
            let first = significant(p).next()?;
            let name = significant(first).next()?;
            (name.as_rule() == Rule::eqname).then(|| Name::parse(name.as_str()))
        };
        Ok(match rule {
            Rule::any_kind_test => KindTest::AnyKind,
            Rule::text_test => KindTest::Text,
            Rule::comment_test => KindTest::Comment,
            Rule::namespace_node_test => KindTest::NamespaceNode,
            Rule::document_test => match significant(inner).next() {
                Some(element) => {
                    let wrapped = KindTest::Element(optional_name(element));
                    KindTest::Document(Some(Box::new(wrapped)))
                }
                None => KindTest::Document(None),
            },
            Rule::element_test => KindTest::Element(optional_name(inner)),
            Rule::attribute_test => KindTest::Attribute(optional_name(inner)),
            Rule::pi_test => match significant(inner).next() {
                Some(p) if p.as_rule() == Rule::string_literal => {
                    KindTest::ProcessingInstruction(Some(self.string_literal(p)?.trim().to_string()))
                }
                Some(p) => KindTest::ProcessingInstruction(Some(p.as_str().to_string())),
                None => KindTest::ProcessingInstruction(None),
            },
            _ => return Err(syntax("schema element and attribute tests are not supported")),
        })
    }
}

fn push_text(parts: &mut Vec<ContentPart>, text: &str) {
    if let Some(ContentPart::Text(last)) = parts.last_mut() {
        last.push_str(text);
    } else {
        parts.push(ContentPart::Text(text.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn xpath(text: &str) -> Expr {
        match parse(text, Language::XPath31).unwrap() {
            Module::Main { body, .. } => body,
            Module::Library { .. } => panic!("expected a main module"),
        }
    }

    #[rstest]
    #[case::parens("(", ")", 24)]
    #[case::calls("string(count((", ")))", 8)]
    fn nesting_parses_on_a_default_stack(#[case] open: &str, #[case] close: &str, #[case] depth: usize) {
        let text = format!("{}1{}", open.repeat(depth), close.repeat(depth));
        let parsed = std::thread::Builder::new()
            .stack_size(2 * 1024 * 1024)
            .spawn(move || parse(&text, Language::XPath31).is_ok())
            .unwrap()
            .join()
            .unwrap();
        assert!(parsed);
    }

    #[test]
    fn parenthesized_operand_collapses_to_the_literal() {
        assert!(matches!(xpath("(((1)))"), Expr::Literal(Literal::Integer(1))));
        assert!(matches!(xpath("(1, 2)"), Expr::Sequence(items) if items.len() == 2));
    }

    #[test]
    fn arithmetic_is_left_associative() {
        let e = xpath("1 - 2 - 3");
        let Expr::Arithmetic { op: ArithOp::Sub, left, .. } = e else { panic!("expected subtraction") };
        assert!(matches!(*left, Expr::Arithmetic { op: ArithOp::Sub, .. }));
    }

    #[test]
    fn double_slash_expands_to_descendant_or_self() {
        let e = xpath("//a");
        let Expr::Path(left, right) = e else { panic!("expected a path") };
        assert!(matches!(*right, Expr::Step { axis: Axis::Child, .. }));
        assert!(matches!(*left, Expr::Path(_, _)));
    }

    #[test]
    fn arrow_becomes_a_call_with_the_operand_first() {
        let e = xpath("'a' => concat('b')");
        let Expr::FunctionCall { name, args } = e else { panic!("expected a call") };
        assert_eq!(name.local, "concat");
        assert_eq!(args.len(), 2);
    }

    #[test]
    fn placeholders_are_kept() {
        let Expr::FunctionCall { args, .. } = xpath("substring(?, 2)") else { panic!("expected a call") };
        assert!(args[0].is_none());
    }

    #[rstest]
    #[case("div div div")]
    #[case("a/b[1]/@c")]
    #[case("for $x in 1 to 3 return $x * 2")]
    #[case("map { 'a': 1 }?a")]
    #[case("[1, 2, 3](2)")]
    #[case("function($x) { $x + 1 }(2)")]
    #[case("(: comment :) 1 eq 1")]
    #[case("some $x in (1, 2) satisfies $x gt 1")]
    #[case("Q{urn:x}local")]
    #[case("../ancestor-or-self::node()")]
    fn accepts_xpath(#[case] text: &str) {
        assert!(parse(text, Language::XPath31).is_ok(), "{text}");
    }

    #[rstest]
    #[case("<a/>")]
    #[case("element a { 1 }")]
    #[case("for $x at $i in 1 return $i")]
    #[case("1 +")]
    #[case("typeswitch (1) case xs:integer return 1 default return 2")]
    fn rejects_non_xpath(#[case] text: &str) {
        let err = parse(text, Language::XPath31).unwrap_err();
        assert!(err.is(ErrorCode::XPST0003), "{text}: {err}");
    }

    #[test]
    fn direct_constructor_strips_boundary_whitespace() {
        let module = parse("<a x='1'>\n  <b>{1}</b>\n</a>", Language::XQuery31).unwrap();
        let Module::Main { body: Expr::DirElement { attributes, content, .. }, .. } = module else {
            panic!("expected a direct element")
        };
        assert_eq!(attributes.len(), 1);
        assert_eq!(content.len(), 1);
    }

    #[test]
    fn library_module_is_recognized() {
        let text = r#"module namespace m = "urn:m"; declare function m:f() { 1 };"#;
        let Module::Library { prefix, namespace, prolog } = parse(text, Language::XQuery31).unwrap() else {
            panic!("expected a library module")
        };
        assert_eq!((prefix.as_str(), namespace.as_str()), ("m", "urn:m"));
        assert_eq!(prolog.functions.len(), 1);
    }

    #[test]
    fn updates_need_the_update_language() {
        assert!(parse("delete node /a", Language::XQuery31).is_err());
        assert!(parse("delete node /a", Language::XQueryUpdate31).is_ok());
    }

    #[test]
    fn group_by_is_unsupported() {
        let err = parse("for $x in 1 group by $x return $x", Language::XQuery31).unwrap_err();
        assert!(err.is(ErrorCode::XPST0003));
    }
}

use crate::consts::{FNS, PREDECLARED_NAMESPACES, XML_URI};
use crate::types::SequenceType;
use crate::xdm::ExpandedName;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

pub type Arity = usize;

/// Resolves a namespace prefix that is not bound statically.
pub type NamespaceResolver = Rc<dyn Fn(&str) -> Option<String>>;

/// Maps `(prefix, local, arity)` of a function call to the function's expanded name.
pub type FunctionNameResolver = Rc<dyn Fn(&str, &str, Arity) -> Option<ExpandedName>>;

#[derive(Debug, Clone, Default)]
struct Overload {
    min: Arity,
    max: Option<Arity>,
    params: HashMap<Arity, Rc<[SequenceType]>>,
}

/// Names and arities of the functions known at compile time, plus the declared parameter
/// types used for the function conversion rules.
#[derive(Debug, Clone, Default)]
pub struct FunctionSignatures {
    by_name: HashMap<ExpandedName, Vec<Overload>>,
}

impl FunctionSignatures {
    pub fn register_ns(&mut self, ns: &str, local: &str, min: Arity, max: Option<Arity>) {
        self.register(ExpandedName::new(Some(ns), local), min, max);
    }

    pub fn register(&mut self, name: ExpandedName, min: Arity, max: Option<Arity>) {
        let overloads = self.by_name.entry(name).or_default();
        if let Some(existing) = overloads.iter_mut().find(|o| o.min == min && o.max == max) {
            existing.params.clear();
            return;
        }
        overloads.push(Overload { min, max, params: HashMap::new() });
    }

    pub fn set_param_types(&mut self, name: ExpandedName, arity: Arity, params: Vec<SequenceType>) {
        if let Some(overload) = self
            .by_name
            .get_mut(&name)
            .and_then(|v| v.iter_mut().find(|o| arity >= o.min && o.max.is_none_or(|m| arity <= m)))
        {
            overload.params.insert(arity, params.into());
        }
    }

    pub fn knows(&self, name: &ExpandedName) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn accepts(&self, name: &ExpandedName, arity: Arity) -> bool {
        self.by_name
            .get(name)
            .is_some_and(|v| v.iter().any(|o| arity >= o.min && o.max.is_none_or(|m| arity <= m)))
    }

    /// Declared parameter types for a call, when the registration supplied them.
    pub fn param_types(&self, name: &ExpandedName, arity: Arity) -> Option<Rc<[SequenceType]>> {
        self.by_name.get(name)?.iter().find_map(|o| o.params.get(&arity).cloned())
    }
}

/// Compile-time context: namespaces, default namespaces and the known functions.
///
/// Built once per compiled query and shared read-only afterwards.
#[derive(Clone)]
pub struct StaticContext {
    pub namespaces: HashMap<String, String>,
    pub default_element_namespace: Option<String>,
    pub default_function_namespace: Option<String>,
    pub signatures: Rc<FunctionSignatures>,
    pub namespace_resolver: Option<NamespaceResolver>,
    pub function_name_resolver: Option<FunctionNameResolver>,
}

impl fmt::Debug for StaticContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticContext")
            .field("namespaces", &self.namespaces)
            .field("default_element_namespace", &self.default_element_namespace)
            .field("default_function_namespace", &self.default_function_namespace)
            .finish_non_exhaustive()
    }
}

impl StaticContext {
    pub fn new(signatures: Rc<FunctionSignatures>) -> Self {
        let namespaces =
            PREDECLARED_NAMESPACES.iter().map(|(p, u)| ((*p).to_string(), (*u).to_string())).collect();
        Self {
            namespaces,
            default_element_namespace: None,
            default_function_namespace: Some(FNS.to_string()),
            signatures,
            namespace_resolver: None,
            function_name_resolver: None,
        }
    }

    /// Binds a prefix. The `xml` prefix cannot be rebound.
    pub fn bind_namespace(&mut self, prefix: impl Into<String>, uri: impl Into<String>) {
        let prefix = prefix.into();
        if prefix == "xml" {
            return;
        }
        let uri = uri.into();
        if uri.is_empty() {
            self.namespaces.remove(&prefix);
        } else {
            self.namespaces.insert(prefix, uri);
        }
    }

    /// Statically bound prefixes first, then the resolver.
    pub fn resolve_prefix(&self, prefix: &str) -> Option<String> {
        if prefix == "xml" {
            return Some(XML_URI.to_string());
        }
        self.namespaces
            .get(prefix)
            .cloned()
            .or_else(|| self.namespace_resolver.as_ref().and_then(|r| r(prefix)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predeclared_prefixes_resolve() {
        let ctx = StaticContext::new(Rc::default());
        assert_eq!(ctx.resolve_prefix("fn").as_deref(), Some(FNS));
        assert_eq!(ctx.resolve_prefix("nope"), None);
    }

    #[test]
    fn resolver_is_consulted_for_unknown_prefixes() {
        let mut ctx = StaticContext::new(Rc::default());
        ctx.namespace_resolver = Some(Rc::new(|p: &str| (p == "ui").then(|| "urn:ui".to_string())));
        assert_eq!(ctx.resolve_prefix("ui").as_deref(), Some("urn:ui"));
    }

    #[test]
    fn xml_prefix_is_fixed() {
        let mut ctx = StaticContext::new(Rc::default());
        ctx.bind_namespace("xml", "urn:other");
        assert_eq!(ctx.resolve_prefix("xml").as_deref(), Some(XML_URI));
    }

    #[test]
    fn signature_ranges() {
        let mut sigs = FunctionSignatures::default();
        sigs.register_ns(FNS, "substring", 2, Some(3));
        sigs.register_ns(FNS, "concat", 2, None);
        let substring = ExpandedName::new(Some(FNS), "substring");
        assert!(sigs.accepts(&substring, 3));
        assert!(!sigs.accepts(&substring, 4));
        assert!(sigs.accepts(&ExpandedName::new(Some(FNS), "concat"), 9));
    }
}

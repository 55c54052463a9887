use super::expression::{DeclaredFunction, GlobalVariable};
use crate::xdm::ExpandedName;
use std::collections::HashMap;
use std::rc::Rc;

/// Declarations contributed by one or more library modules sharing a namespace.
#[derive(Debug, Clone, Default)]
pub struct LibraryModule {
    pub functions: Vec<Rc<DeclaredFunction>>,
    pub variables: Vec<Rc<GlobalVariable>>,
}

/// Library modules keyed by target namespace.
///
/// Append-only: registering the same namespace twice merges the declarations, later
/// declarations shadowing earlier ones with the same name and arity.
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    modules: HashMap<String, LibraryModule>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, namespace: &str, module: LibraryModule) {
        let entry = self.modules.entry(namespace.to_string()).or_default();
        entry.functions.extend(module.functions);
        entry.variables.extend(module.variables);
    }

    pub fn contains(&self, namespace: &str) -> bool {
        self.modules.contains_key(namespace)
    }

    pub fn function(&self, name: &ExpandedName, arity: usize) -> Option<Rc<DeclaredFunction>> {
        let module = self.modules.get(name.ns_uri.as_deref()?)?;
        module.functions.iter().rev().find(|f| f.name == *name && f.params.len() == arity).cloned()
    }

    pub fn variable(&self, name: &ExpandedName) -> Option<Rc<GlobalVariable>> {
        let module = self.modules.get(name.ns_uri.as_deref()?)?;
        module.variables.iter().rev().find(|v| v.name == *name).cloned()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::OnceCell;

    fn function(ns: &str, local: &str, arity: usize) -> Rc<DeclaredFunction> {
        Rc::new(DeclaredFunction {
            name: ExpandedName::new(Some(ns), local),
            params: (0..arity).map(|i| (ExpandedName::local(&format!("p{i}")), None)).collect(),
            result: None,
            updating: false,
            body: OnceCell::new(),
        })
    }

    #[test]
    fn registration_is_additive() {
        let mut reg = ModuleRegistry::new();
        reg.register("urn:m", LibraryModule { functions: vec![function("urn:m", "a", 0)], variables: Vec::new() });
        reg.register("urn:m", LibraryModule { functions: vec![function("urn:m", "b", 1)], variables: Vec::new() });
        assert_eq!(reg.len(), 1);
        assert!(reg.function(&ExpandedName::new(Some("urn:m"), "a"), 0).is_some());
        assert!(reg.function(&ExpandedName::new(Some("urn:m"), "b"), 1).is_some());
        assert!(reg.function(&ExpandedName::new(Some("urn:m"), "b"), 2).is_none());
    }
}

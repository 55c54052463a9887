use super::NativeValue;
use crate::compiler::{Arity, FunctionNameResolver, NamespaceResolver};
use crate::model::{DocumentWriter, NodesFactory};
use crate::parser::Language;
use crate::xdm::ExpandedName;
use indexmap::IndexMap;
use std::fmt;
use std::rc::Rc;

/// Per-evaluation settings.
///
/// ```
/// use arbor_xpath::{Language, Options, SimpleNode};
///
/// let options = Options::<SimpleNode>::new()
///     .with_language(Language::XQuery31)
///     .with_variable("limit", 3)
///     .with_cache_disabled(true);
/// assert_eq!(options.language(), Language::XQuery31);
/// ```
pub struct Options<N> {
    language: Language,
    namespace_resolver: Option<NamespaceResolver>,
    function_name_resolver: Option<FunctionNameResolver>,
    variables: IndexMap<String, NativeValue<N>>,
    module_imports: Vec<(String, String)>,
    nodes_factory: Option<Rc<dyn NodesFactory<N>>>,
    document_writer: Option<Rc<dyn DocumentWriter<N>>>,
    disable_cache: bool,
    debug: bool,
    current_date_time: Option<chrono::DateTime<chrono::FixedOffset>>,
}

impl<N> Default for Options<N> {
    fn default() -> Self {
        Self {
            language: Language::default(),
            namespace_resolver: None,
            function_name_resolver: None,
            variables: IndexMap::new(),
            module_imports: Vec::new(),
            nodes_factory: None,
            document_writer: None,
            disable_cache: false,
            debug: false,
            current_date_time: None,
        }
    }
}

impl<N: Clone> Clone for Options<N> {
    fn clone(&self) -> Self {
        Self {
            language: self.language,
            namespace_resolver: self.namespace_resolver.clone(),
            function_name_resolver: self.function_name_resolver.clone(),
            variables: self.variables.clone(),
            module_imports: self.module_imports.clone(),
            nodes_factory: self.nodes_factory.clone(),
            document_writer: self.document_writer.clone(),
            disable_cache: self.disable_cache,
            debug: self.debug,
            current_date_time: self.current_date_time,
        }
    }
}

impl<N> fmt::Debug for Options<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("language", &self.language)
            .field("variables", &self.variables.keys().collect::<Vec<_>>())
            .field("module_imports", &self.module_imports)
            .field("has_nodes_factory", &self.nodes_factory.is_some())
            .field("has_document_writer", &self.document_writer.is_some())
            .field("disable_cache", &self.disable_cache)
            .field("debug", &self.debug)
            .finish_non_exhaustive()
    }
}

impl<N> Options<N> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_language(mut self, language: Language) -> Self {
        self.language = language;
        self
    }

    /// Consulted for prefixes the query does not declare itself.
    pub fn with_namespace_resolver(mut self, resolver: impl Fn(&str) -> Option<String> + 'static) -> Self {
        self.namespace_resolver = Some(Rc::new(resolver));
        self
    }

    /// Maps `(prefix, local, arity)` of a call to the function's expanded name. Unprefixed
    /// calls pass an empty prefix.
    pub fn with_function_name_resolver(
        mut self,
        resolver: impl Fn(&str, &str, Arity) -> Option<ExpandedName> + 'static,
    ) -> Self {
        self.function_name_resolver = Some(Rc::new(resolver));
        self
    }

    /// Binds `$name`. Rebinding a name replaces its value.
    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<NativeValue<N>>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    /// Imports the registered module `uri` under `prefix`.
    pub fn with_module_import(mut self, prefix: impl Into<String>, uri: impl Into<String>) -> Self {
        self.module_imports.push((prefix.into(), uri.into()));
        self
    }

    pub fn with_nodes_factory(mut self, factory: Rc<dyn NodesFactory<N>>) -> Self {
        self.nodes_factory = Some(factory);
        self
    }

    pub fn with_document_writer(mut self, writer: Rc<dyn DocumentWriter<N>>) -> Self {
        self.document_writer = Some(writer);
        self
    }

    pub fn with_cache_disabled(mut self, disabled: bool) -> Self {
        self.disable_cache = disabled;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Fixes `fn:current-dateTime()` and the implicit timezone.
    pub fn with_current_date_time(mut self, now: chrono::DateTime<chrono::FixedOffset>) -> Self {
        self.current_date_time = Some(now);
        self
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn namespace_resolver(&self) -> Option<&NamespaceResolver> {
        self.namespace_resolver.as_ref()
    }

    pub fn function_name_resolver(&self) -> Option<&FunctionNameResolver> {
        self.function_name_resolver.as_ref()
    }

    pub fn variables(&self) -> impl Iterator<Item = (&str, &NativeValue<N>)> {
        self.variables.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn module_imports(&self) -> &[(String, String)] {
        &self.module_imports
    }

    pub fn nodes_factory(&self) -> Option<&Rc<dyn NodesFactory<N>>> {
        self.nodes_factory.as_ref()
    }

    pub fn document_writer(&self) -> Option<&Rc<dyn DocumentWriter<N>>> {
        self.document_writer.as_ref()
    }

    pub fn cache_disabled(&self) -> bool {
        self.disable_cache
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    pub fn current_date_time(&self) -> Option<chrono::DateTime<chrono::FixedOffset>> {
        self.current_date_time
    }

    /// Resolvers are opaque closures, so queries compiled with them are never cached.
    pub(crate) fn cacheable(&self) -> bool {
        !self.disable_cache && self.namespace_resolver.is_none() && self.function_name_resolver.is_none()
    }
}

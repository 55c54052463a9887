use super::native::{adapt_argument, adapt_result};
use super::result::{ResultStream, convert, drain};
use super::{NativeValue, Options, ReturnType, XPathError, XPathResult};
use crate::compiler::{
    Bucket, CompileEnv, CompiledQuery, FunctionSignatures, ModuleRegistry, StaticContext, compile_library, compile_main,
};
use crate::consts::RESERVED_FUNCTION_NAMESPACES;
use crate::engine::context::{DynamicContext, ExecutionParameters};
use crate::engine::functions::{
    CallCtx, FnResult, FunctionRegistry, default_function_registry, default_function_signatures, from_chrono,
};
use crate::engine::runtime::{Error, ErrorCode};
use crate::model::{DetachedNodeOrder, DocumentOrder, DomFacade, XdmNode};
use crate::parser::{Language, parse};
use crate::types::SequenceType;
use crate::update::{PendingUpdate, UpdatingResult, apply_updates, merge_updates};
use crate::xdm::{ArrayItem, ExpandedName, Fetch, MapItem, XdmItem, XdmSequence, XdmSequenceStream};
use lru::LruCache;
use std::cell::RefCell;
use std::num::NonZeroUsize;
use std::rc::Rc;

/// 256 compiled queries.
const CACHE_CAPACITY: NonZeroUsize = NonZeroUsize::MIN.saturating_add(255);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    text: String,
    language: Language,
    module_imports: Vec<(String, String)>,
    variables: Vec<String>,
}

/// What a custom function sees of its caller.
pub struct CustomFunctionContext<'a, N> {
    pub context_item: Option<&'a XdmItem<N>>,
    pub facade: &'a dyn DomFacade<N>,
}

/// Owns everything that outlives one evaluation: the function library including custom
/// functions, registered library modules, the detached-root order and the compiled-query
/// cache.
pub struct Engine<N> {
    signatures: Rc<FunctionSignatures>,
    functions: Rc<FunctionRegistry<N>>,
    modules: ModuleRegistry,
    detached: Rc<DetachedNodeOrder<N>>,
    cache: RefCell<LruCache<CacheKey, CompiledQuery>>,
}

impl<N: XdmNode> Default for Engine<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N> std::fmt::Debug for Engine<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("modules", &self.modules.len())
            .field("cached_queries", &self.cache.borrow().len())
            .finish_non_exhaustive()
    }
}

macro_rules! typed_evaluation {
    ($(#[$doc:meta])* $name:ident, $variant:ident, $out:ty) => {
        $(#[$doc])*
        pub fn $name(
            &self,
            query: &str,
            context: Option<XdmItem<N>>,
            facade: Rc<dyn DomFacade<N>>,
            options: &Options<N>,
        ) -> Result<$out, XPathError> {
            match self.evaluate_xpath(query, context, facade, ReturnType::$variant, options)? {
                XPathResult::$variant(v) => Ok(v),
                other => Err(XPathError::mismatch(query, ReturnType::$variant, other.return_type().to_string())),
            }
        }
    };
}

impl<N: XdmNode> Engine<N> {
    pub fn new() -> Self {
        Self {
            signatures: default_function_signatures(),
            functions: default_function_registry(),
            modules: ModuleRegistry::new(),
            detached: Rc::new(DetachedNodeOrder::new()),
            cache: RefCell::new(LruCache::new(CACHE_CAPACITY)),
        }
    }

    pub fn modules(&self) -> &ModuleRegistry {
        &self.modules
    }

    pub fn detached_node_order(&self) -> &Rc<DetachedNodeOrder<N>> {
        &self.detached
    }

    /// Registers a host function under `name`.
    ///
    /// Arguments arrive as [`NativeValue`]s shaped by their declared types; the result is
    /// converted to `return_type`. The name needs a namespace (`XQST0060`) outside the
    /// reserved ones (`XQST0045`).
    pub fn register_custom_xpath_function(
        &mut self,
        name: ExpandedName,
        param_types: &[&str],
        return_type: &str,
        callback: impl Fn(&CustomFunctionContext<'_, N>, Vec<NativeValue<N>>) -> Result<NativeValue<N>, Error> + 'static,
    ) -> Result<(), XPathError> {
        let label = name.to_string();
        let Some(ns) = name.ns_uri.as_deref() else {
            return Err(XPathError::static_error(
                &label,
                Error::from_code(ErrorCode::XQST0060, format!("custom function '{label}' must be in a namespace")),
            ));
        };
        if RESERVED_FUNCTION_NAMESPACES.contains(&ns) {
            return Err(XPathError::static_error(
                &label,
                Error::from_code(ErrorCode::XQST0045, format!("custom function {label} is in a reserved namespace")),
            ));
        }
        let parse_type = |text: &str| {
            SequenceType::parse_signature(text).ok_or_else(|| {
                XPathError::static_error(
                    &label,
                    Error::from_code(ErrorCode::XPST0051, format!("unknown sequence type '{text}'")),
                )
            })
        };
        let params = param_types.iter().map(|t| parse_type(*t)).collect::<Result<Vec<_>, _>>()?;
        let result = parse_type(return_type)?;
        let arity = params.len();

        let signatures = Rc::make_mut(&mut self.signatures);
        signatures.register(name.clone(), arity, Some(arity));
        signatures.set_param_types(name.clone(), arity, params.clone());

        tracing::debug!(function = %label, arity, "registering custom function");
        Rc::make_mut(&mut self.functions).register(
            name,
            arity,
            Rc::new(move |cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]| -> FnResult<N> {
                let natives = args.iter().zip(&params).map(|(arg, ty)| adapt_argument(arg, ty)).collect::<Result<_, _>>()?;
                let context = CustomFunctionContext { context_item: cc.dyn_ctx.item.as_ref(), facade: &*cc.params.facade };
                Ok(Fetch::Ready(adapt_result(callback(&context, natives)?, &result)?))
            }),
        );
        self.cache.borrow_mut().clear();
        Ok(())
    }

    /// Compiles an XQuery library module and adds its declarations to the module registry.
    /// Answers the module's target namespace.
    pub fn register_xquery_module(&mut self, source: &str) -> Result<String, XPathError> {
        let module = parse(source, Language::XQueryUpdate31).map_err(|e| XPathError::parse(source, e))?;
        let env = CompileEnv { modules: &self.modules, module_imports: &[], external_variables: &[] };
        let (namespace, library) = compile_library(&module, StaticContext::new(Rc::clone(&self.signatures)), env)
            .map_err(|e| XPathError::static_error(source, e))?;
        self.modules.register(&namespace, library);
        self.cache.borrow_mut().clear();
        Ok(namespace)
    }

    fn compile(&self, query: &str, language: Language, options: &Options<N>) -> Result<CompiledQuery, XPathError> {
        let mut variables: Vec<String> = options.variables().map(|(name, _)| name.to_string()).collect();
        variables.sort();
        let key = options.cacheable().then(|| CacheKey {
            text: query.to_string(),
            language,
            module_imports: options.module_imports().to_vec(),
            variables: variables.clone(),
        });
        if let Some(key) = &key
            && let Some(hit) = self.cache.borrow_mut().get(key)
        {
            tracing::trace!(query, "compiled query cache hit");
            return Ok(hit.clone());
        }

        let module = parse(query, language).map_err(|e| XPathError::parse(query, e))?;
        let mut ctx = StaticContext::new(Rc::clone(&self.signatures));
        ctx.namespace_resolver = options.namespace_resolver().cloned();
        ctx.function_name_resolver = options.function_name_resolver().cloned();
        let externals: Vec<ExpandedName> = variables.iter().map(|v| ExpandedName::local(v)).collect();
        let env = CompileEnv {
            modules: &self.modules,
            module_imports: options.module_imports(),
            external_variables: &externals,
        };
        let compiled = compile_main(&module, ctx, env).map_err(|e| XPathError::static_error(query, e))?;
        tracing::debug!(query, ?language, updating = compiled.is_updating(), "compiled query");
        if let Some(key) = key {
            self.cache.borrow_mut().put(key, compiled.clone());
        }
        Ok(compiled)
    }

    fn parameters(
        &self,
        compiled: &CompiledQuery,
        context: Option<XdmItem<N>>,
        facade: Rc<dyn DomFacade<N>>,
        options: &Options<N>,
    ) -> (DynamicContext<N>, ExecutionParameters<N>) {
        let now = from_chrono(&options.current_date_time().unwrap_or_else(|| chrono::Local::now().fixed_offset()));
        let mut initial = DynamicContext::new(context);
        for (name, value) in options.variables() {
            initial = initial.bind_items(ExpandedName::local(name), value.clone().into_sequence());
        }
        let params = ExecutionParameters {
            facade,
            factory: options.nodes_factory().cloned(),
            writer: options.document_writer().cloned(),
            order: Rc::new(DocumentOrder::new(Rc::clone(&self.detached))),
            functions: Rc::clone(&self.functions),
            static_ctx: Rc::clone(&compiled.static_ctx),
            initial: Rc::new(initial.clone()),
            implicit_timezone: now.timezone().unwrap_or(0),
            now,
            updates: Rc::default(),
            globals: Rc::default(),
            debug: options.debug(),
        };
        (initial, params)
    }

    fn start(
        &self,
        query: &str,
        language: Language,
        context: Option<XdmItem<N>>,
        facade: Rc<dyn DomFacade<N>>,
        options: &Options<N>,
    ) -> Result<(CompiledQuery, ExecutionParameters<N>, XdmSequenceStream<N>), XPathError> {
        let compiled = self.compile(query, language, options)?;
        let (ctx, params) = self.parameters(&compiled, context, facade, options);
        if params.debug {
            tracing::debug!(query, ?params, "evaluating");
        }
        let stream = compiled.expression.evaluate(&ctx, &params).map_err(|e| XPathError::dynamic(query, e))?;
        Ok((compiled, params, stream))
    }

    /// Evaluates a non-updating query, awaiting the facade whenever it suspends.
    pub async fn evaluate_xpath_async(
        &self,
        query: &str,
        context: Option<XdmItem<N>>,
        facade: Rc<dyn DomFacade<N>>,
        return_type: ReturnType,
        options: &Options<N>,
    ) -> Result<XPathResult<N>, XPathError> {
        let (compiled, params, stream) = self.start(query, options.language(), context, facade, options)?;
        if compiled.is_updating() {
            return Err(XPathError::static_error(
                query,
                Error::from_code(ErrorCode::XUST0001, "updating expressions must be evaluated as updates"),
            ));
        }
        if return_type == ReturnType::AsyncIterator {
            return Ok(XPathResult::AsyncIterator(ResultStream::new(stream, query)));
        }
        let items = drain(stream).await.map_err(|e| XPathError::dynamic(query, e))?;
        let result = convert(items, return_type, &*params.facade, query).await?;
        if options.debug() {
            tracing::debug!(query, ?result, "evaluated");
        }
        Ok(result)
    }

    /// [`evaluate_xpath_async`](Self::evaluate_xpath_async) on the calling thread.
    pub fn evaluate_xpath(
        &self,
        query: &str,
        context: Option<XdmItem<N>>,
        facade: Rc<dyn DomFacade<N>>,
        return_type: ReturnType,
        options: &Options<N>,
    ) -> Result<XPathResult<N>, XPathError> {
        let span = if options.debug() { tracing::debug_span!("evaluate_xpath", query) } else { tracing::Span::none() };
        span.in_scope(|| {
            futures_lite::future::block_on(self.evaluate_xpath_async(query, context, facade, return_type, options))
        })
    }

    typed_evaluation!(evaluate_xpath_to_boolean, Boolean, bool);
    typed_evaluation!(evaluate_xpath_to_string, String, String);
    typed_evaluation!(evaluate_xpath_to_strings, Strings, Vec<String>);
    typed_evaluation!(evaluate_xpath_to_number, Number, f64);
    typed_evaluation!(evaluate_xpath_to_numbers, Numbers, Vec<f64>);
    typed_evaluation!(evaluate_xpath_to_nodes, Nodes, Vec<N>);
    typed_evaluation!(evaluate_xpath_to_first_node, FirstNode, Option<N>);
    typed_evaluation!(evaluate_xpath_to_map, Map, MapItem<N>);
    typed_evaluation!(evaluate_xpath_to_array, Array, ArrayItem<N>);

    /// A stream over the result items. Evaluation advances as the stream is polled.
    pub fn evaluate_xpath_to_async_iterator(
        &self,
        query: &str,
        context: Option<XdmItem<N>>,
        facade: Rc<dyn DomFacade<N>>,
        options: &Options<N>,
    ) -> Result<ResultStream<N>, XPathError> {
        match self.evaluate_xpath(query, context, facade, ReturnType::AsyncIterator, options)? {
            XPathResult::AsyncIterator(stream) => Ok(stream),
            other => Err(XPathError::mismatch(query, ReturnType::AsyncIterator, other.return_type().to_string())),
        }
    }

    /// Evaluates an XQuery Update expression without touching the document: the result
    /// carries the value together with the merged pending update list.
    pub async fn evaluate_updating_expression_async(
        &self,
        query: &str,
        context: Option<XdmItem<N>>,
        facade: Rc<dyn DomFacade<N>>,
        options: &Options<N>,
    ) -> Result<UpdatingResult<N>, XPathError> {
        let (_, params, stream) = self.start(query, Language::XQueryUpdate31, context, facade, options)?;
        let value = drain(stream).await.map_err(|e| XPathError::dynamic(query, e))?;
        let updates = merge_updates([params.take_updates()]).map_err(|e| XPathError::dynamic(query, e))?;
        tracing::debug!(query, updates = updates.len(), "collected pending updates");
        Ok(UpdatingResult { value, updates })
    }

    pub fn evaluate_updating_expression(
        &self,
        query: &str,
        context: Option<XdmItem<N>>,
        facade: Rc<dyn DomFacade<N>>,
        options: &Options<N>,
    ) -> Result<UpdatingResult<N>, XPathError> {
        futures_lite::future::block_on(self.evaluate_updating_expression_async(query, context, facade, options))
    }

    /// Applies a pending update list through the options' document writer.
    pub async fn execute_pending_updates_async(
        &self,
        updates: Vec<PendingUpdate<N>>,
        facade: Rc<dyn DomFacade<N>>,
        options: &Options<N>,
    ) -> Result<(), XPathError> {
        const LABEL: &str = "pending update list";
        let writer = options.document_writer().cloned().ok_or_else(|| {
            XPathError::dynamic(
                LABEL,
                Error::from_code(ErrorCode::FOER0000, "applying updates requires a document writer"),
            )
        })?;
        apply_updates(updates, facade, options.nodes_factory().cloned(), writer)
            .await
            .map_err(|e| XPathError::dynamic(LABEL, e))
    }

    pub fn execute_pending_updates(
        &self,
        updates: Vec<PendingUpdate<N>>,
        facade: Rc<dyn DomFacade<N>>,
        options: &Options<N>,
    ) -> Result<(), XPathError> {
        futures_lite::future::block_on(self.execute_pending_updates_async(updates, facade, options))
    }

    /// The bucket a selector's matches must fall into, if it narrows them at all.
    pub fn bucket_for_selector(&self, selector: &str) -> Result<Option<Bucket>, XPathError> {
        let compiled = self.compile(selector, Language::XPath31, &Options::default())?;
        Ok(compiled.expression.bucket())
    }

    /// Compares how specific two selectors are: `1` when `a` is more specific, `-1` when
    /// `b` is, `0` when they tie.
    pub fn compare_specificity(&self, a: &str, b: &str) -> Result<i32, XPathError> {
        let options = Options::default();
        let left = self.compile(a, Language::XPath31, &options)?;
        let right = self.compile(b, Language::XPath31, &options)?;
        Ok(crate::compiler::compare_specificity(&left.expression.specificity(), &right.expression.specificity()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simple_node::{SimpleNode, SimpleTree, elem};

    fn facade() -> Rc<dyn DomFacade<SimpleNode>> {
        Rc::new(SimpleTree)
    }

    #[test]
    fn cache_serves_repeated_queries() {
        let engine = Engine::<SimpleNode>::new();
        let options = Options::default();
        for _ in 0..3 {
            assert_eq!(engine.evaluate_xpath_to_number("2 * 21", None, facade(), &options).unwrap(), 42.0);
        }
        assert_eq!(engine.cache.borrow().len(), 1);
        let uncached = Options::default().with_cache_disabled(true);
        engine.evaluate_xpath_to_number("1 + 2", None, facade(), &uncached).unwrap();
        assert_eq!(engine.cache.borrow().len(), 1);
    }

    #[test]
    fn updating_queries_are_refused_by_plain_evaluation() {
        let engine = Engine::<SimpleNode>::new();
        let root = elem("r").child(elem("a")).build();
        let options = Options::default().with_language(Language::XQueryUpdate31);
        let err = engine
            .evaluate_xpath("delete node a", Some(XdmItem::Node(root)), facade(), ReturnType::Any, &options)
            .unwrap_err();
        assert!(err.is(ErrorCode::XUST0001));
    }

    #[test]
    fn fixed_clock_is_visible_to_queries() {
        let engine = Engine::<SimpleNode>::new();
        let now = chrono::DateTime::parse_from_rfc3339("2020-05-17T10:00:00+02:00").unwrap();
        let options = Options::default().with_current_date_time(now);
        let year = engine.evaluate_xpath_to_number("year-from-dateTime(current-dateTime())", None, facade(), &options);
        assert_eq!(year.unwrap(), 2020.0);
        let tz = engine.evaluate_xpath_to_string("string(implicit-timezone())", None, facade(), &options);
        assert_eq!(tz.unwrap(), "PT2H");
    }

    #[test]
    fn custom_function_names_need_a_free_namespace() {
        let mut engine = Engine::<SimpleNode>::new();
        let noop = |_: &CustomFunctionContext<'_, SimpleNode>, _: Vec<NativeValue<SimpleNode>>| Ok(NativeValue::Null);
        let err = engine.register_custom_xpath_function(ExpandedName::local("f"), &[], "item()*", noop).unwrap_err();
        assert!(err.is(ErrorCode::XQST0060));
        let err = engine
            .register_custom_xpath_function(ExpandedName::new(Some(crate::consts::FNS), "f"), &[], "item()*", noop)
            .unwrap_err();
        assert!(err.is(ErrorCode::XQST0045));
    }
}

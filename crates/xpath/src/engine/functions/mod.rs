//! The built-in function library and the registry that resolves calls to it.
//!
//! Every function is registered twice over one table: names and arities (plus declared
//! parameter types) go into the compile-time [`FunctionSignatures`], implementations go into
//! a [`FunctionRegistry`] for a concrete node type. Both are built once per thread and shared.

use crate::compiler::{Arity, FunctionSignatures};
use crate::consts::{ARRAY_NS, FNS, MAP_NS, MATH_NS};
use crate::engine::context::{DynamicContext, ExecutionParameters};
use crate::engine::runtime::Error;
use crate::model::XdmNode;
use crate::types::{AtomicType, SequenceType};
use crate::xdm::{ExpandedName, Fetch, XdmSequence};
use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

mod arrays;
mod boolean;
mod common;
mod datetime;
mod diagnostics;
mod higher_order;
mod maps;
mod numeric;
mod qnames;
mod regex;
mod sequences;
mod strings;
mod updating;
mod uris;

pub(crate) use datetime::from_chrono;

/// Result of a built-in: ready items, or pending on a suspended facade call.
pub type FnResult<N> = Result<Fetch<XdmSequence<N>>, Error>;

/// A native function body. Arguments arrive already converted to the declared parameter types.
pub type FunctionImpl<N> = Rc<dyn Fn(&CallCtx<'_, N>, &[XdmSequence<N>]) -> FnResult<N>>;

/// What a native function sees of the caller.
pub struct CallCtx<'a, N> {
    pub dyn_ctx: &'a DynamicContext<N>,
    pub params: &'a ExecutionParameters<N>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveError {
    Unknown,
    WrongArity,
}

type Overload<N> = (Arity, Option<Arity>, FunctionImpl<N>);

/// Implementations keyed by expanded name, with arity ranges per overload.
pub struct FunctionRegistry<N> {
    fns: HashMap<ExpandedName, Vec<Overload<N>>>,
}

impl<N> Clone for FunctionRegistry<N> {
    fn clone(&self) -> Self {
        Self { fns: self.fns.clone() }
    }
}

impl<N> Default for FunctionRegistry<N> {
    fn default() -> Self {
        Self { fns: HashMap::new() }
    }
}

impl<N> fmt::Debug for FunctionRegistry<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionRegistry").field("functions", &self.fns.len()).finish()
    }
}

impl<N> FunctionRegistry<N> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an overload covering `min..=max` arguments (`None`: variadic). Narrower
    /// overloads are tried first, so a fixed-arity registration shadows a range.
    pub fn register_range(&mut self, name: ExpandedName, min: Arity, max: Option<Arity>, f: FunctionImpl<N>) {
        let overloads = self.fns.entry(name).or_default();
        overloads.retain(|(lo, hi, _)| !(*lo == min && *hi == max));
        overloads.push((min, max, f));
        overloads.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| match (a.1, b.1) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        }));
    }

    pub fn register(&mut self, name: ExpandedName, arity: Arity, f: FunctionImpl<N>) {
        self.register_range(name, arity, Some(arity), f);
    }

    pub fn register_ns(&mut self, ns: &str, local: &str, arity: Arity, f: FunctionImpl<N>) {
        self.register(ExpandedName::new(Some(ns), local), arity, f);
    }

    pub fn register_ns_range(&mut self, ns: &str, local: &str, min: Arity, max: Option<Arity>, f: FunctionImpl<N>) {
        self.register_range(ExpandedName::new(Some(ns), local), min, max, f);
    }

    pub fn register_ns_variadic(&mut self, ns: &str, local: &str, min: Arity, f: FunctionImpl<N>) {
        self.register_range(ExpandedName::new(Some(ns), local), min, None, f);
    }

    pub fn contains(&self, name: &ExpandedName) -> bool {
        self.fns.contains_key(name)
    }

    pub fn resolve(&self, name: &ExpandedName, arity: Arity) -> Result<&FunctionImpl<N>, ResolveError> {
        let overloads = self.fns.get(name).ok_or(ResolveError::Unknown)?;
        overloads
            .iter()
            .find(|(lo, hi, _)| *lo == arity && *hi == Some(arity))
            .or_else(|| overloads.iter().find(|(lo, hi, _)| arity >= *lo && hi.is_none_or(|m| arity <= m)))
            .map(|(_, _, f)| f)
            .ok_or(ResolveError::WrongArity)
    }
}

fn sig(specs: &[&str]) -> Vec<SequenceType> {
    specs.iter().map(|s| SequenceType::parse_signature(s).unwrap_or_else(SequenceType::item_star)).collect()
}

fn register_default_functions<N: XdmNode>(
    reg: Option<&mut FunctionRegistry<N>>,
    sigs: Option<&mut FunctionSignatures>,
) {
    let mut reg = reg;
    let mut sigs = sigs;
    macro_rules! reg_ns {
        ($ns:expr, $local:expr, $arity:expr, $func:expr $(,)?) => {{
            if let Some(s) = sigs.as_mut() {
                s.register_ns($ns, $local, $arity, Some($arity));
            }
            if let Some(r) = reg.as_mut() {
                r.register_ns($ns, $local, $arity, Rc::new($func));
            }
        }};
        ($ns:expr, $local:expr, $arity:expr, $func:expr, $specs:expr $(,)?) => {{
            if let Some(s) = sigs.as_mut() {
                s.register_ns($ns, $local, $arity, Some($arity));
                s.set_param_types(ExpandedName::new(Some($ns), $local), $arity, sig($specs));
            }
            if let Some(r) = reg.as_mut() {
                r.register_ns($ns, $local, $arity, Rc::new($func));
            }
        }};
    }
    macro_rules! reg_ns_range {
        ($ns:expr, $local:expr, $min:expr, $max:expr, $func:expr $(,)?) => {{
            if let Some(s) = sigs.as_mut() {
                s.register_ns($ns, $local, $min, Some($max));
            }
            if let Some(r) = reg.as_mut() {
                r.register_ns_range($ns, $local, $min, Some($max), Rc::new($func));
            }
        }};
        ($ns:expr, $local:expr, $min:expr, $max:expr, $func:expr, { $($arity:expr => $specs:expr),+ $(,)? }) => {{
            if let Some(s) = sigs.as_mut() {
                s.register_ns($ns, $local, $min, Some($max));
                $(
                    s.set_param_types(ExpandedName::new(Some($ns), $local), $arity, sig($specs));
                )+
            }
            if let Some(r) = reg.as_mut() {
                r.register_ns_range($ns, $local, $min, Some($max), Rc::new($func));
            }
        }};
    }
    macro_rules! reg_ns_variadic {
        ($ns:expr, $local:expr, $min:expr, $func:expr $(,)?) => {{
            if let Some(s) = sigs.as_mut() {
                s.register_ns($ns, $local, $min, None);
            }
            if let Some(r) = reg.as_mut() {
                r.register_ns_variadic($ns, $local, $min, Rc::new($func));
            }
        }};
    }

    const STR: &str = "xs:string?";
    const ATOMS: &str = "xs:anyAtomicType*";
    const NUM: &str = "xs:anyAtomicType?";

    // ===== Accessors and general =====
    reg_ns!(FNS, "true", 0, boolean::fn_true::<N>);
    reg_ns!(FNS, "false", 0, boolean::fn_false::<N>);
    reg_ns!(FNS, "boolean", 1, boolean::fn_boolean::<N>);
    reg_ns!(FNS, "not", 1, boolean::fn_not::<N>);
    reg_ns_range!(FNS, "data", 0, 1, boolean::data_fn::<N>);
    reg_ns_range!(FNS, "string", 0, 1, boolean::string_fn::<N>);
    reg_ns!(FNS, "position", 0, boolean::position_fn::<N>);
    reg_ns!(FNS, "last", 0, boolean::last_fn::<N>);
    reg_ns_range!(FNS, "node-name", 0, 1, boolean::node_name_fn::<N>, { 1 => &["node()?"] });
    reg_ns_range!(FNS, "name", 0, 1, boolean::name_fn::<N>, { 1 => &["node()?"] });
    reg_ns_range!(FNS, "local-name", 0, 1, boolean::local_name_fn::<N>, { 1 => &["node()?"] });
    reg_ns_range!(FNS, "namespace-uri", 0, 1, boolean::namespace_uri_fn::<N>, { 1 => &["node()?"] });
    reg_ns_range!(FNS, "root", 0, 1, boolean::root_fn::<N>, { 1 => &["node()?"] });
    reg_ns_range!(FNS, "has-children", 0, 1, boolean::has_children_fn::<N>, { 1 => &["node()?"] });
    reg_ns_range!(FNS, "error", 0, 3, diagnostics::error_fn::<N>, {
        1 => &["xs:QName?"],
        2 => &["xs:QName?", "xs:string"],
        3 => &["xs:QName?", "xs:string", "item()*"],
    });
    reg_ns_range!(FNS, "trace", 1, 2, diagnostics::trace_fn::<N>, { 2 => &["item()*", "xs:string"] });

    // ===== Numeric =====
    reg_ns_range!(FNS, "number", 0, 1, numeric::number_fn::<N>, { 1 => &[NUM] });
    reg_ns!(FNS, "abs", 1, numeric::abs_fn::<N>, &[NUM]);
    reg_ns!(FNS, "ceiling", 1, numeric::ceiling_fn::<N>, &[NUM]);
    reg_ns!(FNS, "floor", 1, numeric::floor_fn::<N>, &[NUM]);
    reg_ns_range!(FNS, "round", 1, 2, numeric::round_fn::<N>, {
        1 => &[NUM],
        2 => &[NUM, "xs:integer"],
    });
    reg_ns_range!(FNS, "round-half-to-even", 1, 2, numeric::round_half_to_even_fn::<N>, {
        1 => &[NUM],
        2 => &[NUM, "xs:integer"],
    });
    reg_ns!(FNS, "count", 1, numeric::count_fn::<N>);
    reg_ns_range!(FNS, "sum", 1, 2, numeric::sum_fn::<N>, {
        1 => &[ATOMS],
        2 => &[ATOMS, "xs:anyAtomicType?"],
    });
    reg_ns!(FNS, "avg", 1, numeric::avg_fn::<N>, &[ATOMS]);
    reg_ns_range!(FNS, "min", 1, 2, numeric::min_fn::<N>, { 1 => &[ATOMS], 2 => &[ATOMS, "xs:string"] });
    reg_ns_range!(FNS, "max", 1, 2, numeric::max_fn::<N>, { 1 => &[ATOMS], 2 => &[ATOMS, "xs:string"] });
    reg_ns!(MATH_NS, "pi", 0, numeric::math_pi::<N>);
    reg_ns!(MATH_NS, "sqrt", 1, numeric::math_sqrt::<N>, &["xs:double?"]);
    reg_ns!(MATH_NS, "exp", 1, numeric::math_exp::<N>, &["xs:double?"]);
    reg_ns!(MATH_NS, "exp10", 1, numeric::math_exp10::<N>, &["xs:double?"]);
    reg_ns!(MATH_NS, "log", 1, numeric::math_log::<N>, &["xs:double?"]);
    reg_ns!(MATH_NS, "log10", 1, numeric::math_log10::<N>, &["xs:double?"]);
    reg_ns!(MATH_NS, "sin", 1, numeric::math_sin::<N>, &["xs:double?"]);
    reg_ns!(MATH_NS, "cos", 1, numeric::math_cos::<N>, &["xs:double?"]);
    reg_ns!(MATH_NS, "tan", 1, numeric::math_tan::<N>, &["xs:double?"]);
    reg_ns!(MATH_NS, "asin", 1, numeric::math_asin::<N>, &["xs:double?"]);
    reg_ns!(MATH_NS, "acos", 1, numeric::math_acos::<N>, &["xs:double?"]);
    reg_ns!(MATH_NS, "atan", 1, numeric::math_atan::<N>, &["xs:double?"]);
    reg_ns!(MATH_NS, "atan2", 2, numeric::math_atan2::<N>, &["xs:double", "xs:double"]);
    reg_ns!(MATH_NS, "pow", 2, numeric::math_pow::<N>, &["xs:double?", "xs:double"]);

    // ===== Strings =====
    reg_ns_variadic!(FNS, "concat", 2, strings::concat_fn::<N>);
    reg_ns_range!(FNS, "string-join", 1, 2, strings::string_join_fn::<N>, {
        1 => &[ATOMS],
        2 => &[ATOMS, "xs:string"],
    });
    reg_ns_range!(FNS, "string-length", 0, 1, strings::string_length_fn::<N>, { 1 => &[STR] });
    reg_ns_range!(FNS, "normalize-space", 0, 1, strings::normalize_space_fn::<N>, { 1 => &[STR] });
    reg_ns_range!(FNS, "normalize-unicode", 1, 2, strings::normalize_unicode_fn::<N>, {
        1 => &[STR],
        2 => &[STR, "xs:string"],
    });
    reg_ns!(FNS, "upper-case", 1, strings::upper_case_fn::<N>, &[STR]);
    reg_ns!(FNS, "lower-case", 1, strings::lower_case_fn::<N>, &[STR]);
    for (local, func) in [
        ("contains", strings::contains_fn::<N> as fn(&CallCtx<'_, N>, &[XdmSequence<N>]) -> FnResult<N>),
        ("starts-with", strings::starts_with_fn::<N>),
        ("ends-with", strings::ends_with_fn::<N>),
        ("substring-before", strings::substring_before_fn::<N>),
        ("substring-after", strings::substring_after_fn::<N>),
    ] {
        reg_ns_range!(FNS, local, 2, 3, func, { 2 => &[STR, STR], 3 => &[STR, STR, "xs:string"] });
    }
    reg_ns_range!(FNS, "substring", 2, 3, strings::substring_fn::<N>, {
        2 => &[STR, "xs:double"],
        3 => &[STR, "xs:double", "xs:double"],
    });
    reg_ns!(FNS, "translate", 3, strings::translate_fn::<N>, &[STR, "xs:string", "xs:string"]);
    reg_ns!(FNS, "codepoints-to-string", 1, strings::codepoints_to_string_fn::<N>, &["xs:integer*"]);
    reg_ns!(FNS, "string-to-codepoints", 1, strings::string_to_codepoints_fn::<N>, &[STR]);
    reg_ns_range!(FNS, "compare", 2, 3, strings::compare_fn::<N>, {
        2 => &[STR, STR],
        3 => &[STR, STR, "xs:string"],
    });
    reg_ns!(FNS, "codepoint-equal", 2, strings::codepoint_equal_fn::<N>, &[STR, STR]);
    reg_ns!(FNS, "untypedAtomic", 1, strings::untyped_atomic_fn::<N>, &[STR]);

    // ===== Regular expressions =====
    reg_ns_range!(FNS, "matches", 2, 3, regex::matches_fn::<N>, {
        2 => &[STR, "xs:string"],
        3 => &[STR, "xs:string", "xs:string"],
    });
    reg_ns_range!(FNS, "replace", 3, 4, regex::replace_fn::<N>, {
        3 => &[STR, "xs:string", "xs:string"],
        4 => &[STR, "xs:string", "xs:string", "xs:string"],
    });
    reg_ns_range!(FNS, "tokenize", 1, 3, regex::tokenize_fn::<N>, {
        1 => &[STR],
        2 => &[STR, "xs:string"],
        3 => &[STR, "xs:string", "xs:string"],
    });

    // ===== Sequences =====
    reg_ns!(FNS, "empty", 1, sequences::empty_fn::<N>);
    reg_ns!(FNS, "exists", 1, sequences::exists_fn::<N>);
    reg_ns!(FNS, "head", 1, sequences::head_fn::<N>);
    reg_ns!(FNS, "tail", 1, sequences::tail_fn::<N>);
    reg_ns!(FNS, "reverse", 1, sequences::reverse_fn::<N>);
    reg_ns!(FNS, "unordered", 1, sequences::unordered_fn::<N>);
    reg_ns_range!(FNS, "subsequence", 2, 3, sequences::subsequence_fn::<N>, {
        2 => &["item()*", "xs:double"],
        3 => &["item()*", "xs:double", "xs:double"],
    });
    reg_ns!(FNS, "insert-before", 3, sequences::insert_before_fn::<N>, &["item()*", "xs:integer", "item()*"]);
    reg_ns!(FNS, "remove", 2, sequences::remove_fn::<N>, &["item()*", "xs:integer"]);
    reg_ns_range!(FNS, "distinct-values", 1, 2, sequences::distinct_values_fn::<N>, {
        1 => &[ATOMS],
        2 => &[ATOMS, "xs:string"],
    });
    reg_ns_range!(FNS, "index-of", 2, 3, sequences::index_of_fn::<N>, {
        2 => &[ATOMS, "xs:anyAtomicType"],
        3 => &[ATOMS, "xs:anyAtomicType", "xs:string"],
    });
    reg_ns!(FNS, "zero-or-one", 1, sequences::zero_or_one_fn::<N>);
    reg_ns!(FNS, "one-or-more", 1, sequences::one_or_more_fn::<N>);
    reg_ns!(FNS, "exactly-one", 1, sequences::exactly_one_fn::<N>);
    reg_ns_range!(FNS, "deep-equal", 2, 3, sequences::deep_equal_fn::<N>, {
        3 => &["item()*", "item()*", "xs:string"],
    });
    reg_ns_range!(FNS, "sort", 1, 3, sequences::sort_fn::<N>, {
        2 => &["item()*", "xs:string?"],
        3 => &["item()*", "xs:string?", "function(*)"],
    });

    // ===== Higher-order =====
    reg_ns!(FNS, "for-each", 2, higher_order::for_each_fn::<N>, &["item()*", "function(*)"]);
    reg_ns!(FNS, "filter", 2, higher_order::filter_fn::<N>, &["item()*", "function(*)"]);
    reg_ns!(FNS, "fold-left", 3, higher_order::fold_left_fn::<N>, &["item()*", "item()*", "function(*)"]);
    reg_ns!(FNS, "fold-right", 3, higher_order::fold_right_fn::<N>, &["item()*", "item()*", "function(*)"]);
    reg_ns!(FNS, "for-each-pair", 3, higher_order::for_each_pair_fn::<N>, &["item()*", "item()*", "function(*)"]);
    reg_ns!(FNS, "apply", 2, higher_order::apply_fn::<N>, &["function(*)", "array(*)"]);
    reg_ns!(FNS, "function-arity", 1, higher_order::function_arity_fn::<N>, &["function(*)"]);
    reg_ns!(FNS, "function-name", 1, higher_order::function_name_fn::<N>, &["function(*)"]);

    // ===== Maps =====
    reg_ns!(MAP_NS, "size", 1, maps::size_fn::<N>, &["map(*)"]);
    reg_ns!(MAP_NS, "keys", 1, maps::keys_fn::<N>, &["map(*)"]);
    reg_ns!(MAP_NS, "contains", 2, maps::contains_fn::<N>, &["map(*)", "xs:anyAtomicType"]);
    reg_ns!(MAP_NS, "get", 2, maps::get_fn::<N>, &["map(*)", "xs:anyAtomicType"]);
    reg_ns!(MAP_NS, "put", 3, maps::put_fn::<N>, &["map(*)", "xs:anyAtomicType", "item()*"]);
    reg_ns!(MAP_NS, "remove", 2, maps::remove_fn::<N>, &["map(*)", ATOMS]);
    reg_ns!(MAP_NS, "entry", 2, maps::entry_fn::<N>, &["xs:anyAtomicType", "item()*"]);
    reg_ns_range!(MAP_NS, "merge", 1, 2, maps::merge_fn::<N>, {
        1 => &["map(*)*"],
        2 => &["map(*)*", "map(*)"],
    });
    reg_ns!(MAP_NS, "for-each", 2, maps::for_each_fn::<N>, &["map(*)", "function(*)"]);
    reg_ns!(MAP_NS, "find", 2, maps::find_fn::<N>, &["item()*", "xs:anyAtomicType"]);

    // ===== Arrays =====
    reg_ns!(ARRAY_NS, "size", 1, arrays::size_fn::<N>, &["array(*)"]);
    reg_ns!(ARRAY_NS, "get", 2, arrays::get_fn::<N>, &["array(*)", "xs:integer"]);
    reg_ns!(ARRAY_NS, "put", 3, arrays::put_fn::<N>, &["array(*)", "xs:integer", "item()*"]);
    reg_ns!(ARRAY_NS, "append", 2, arrays::append_fn::<N>, &["array(*)", "item()*"]);
    reg_ns_range!(ARRAY_NS, "subarray", 2, 3, arrays::subarray_fn::<N>, {
        2 => &["array(*)", "xs:integer"],
        3 => &["array(*)", "xs:integer", "xs:integer"],
    });
    reg_ns!(ARRAY_NS, "head", 1, arrays::head_fn::<N>, &["array(*)"]);
    reg_ns!(ARRAY_NS, "tail", 1, arrays::tail_fn::<N>, &["array(*)"]);
    reg_ns!(ARRAY_NS, "reverse", 1, arrays::reverse_fn::<N>, &["array(*)"]);
    reg_ns!(ARRAY_NS, "join", 1, arrays::join_fn::<N>, &["array(*)*"]);
    reg_ns!(ARRAY_NS, "flatten", 1, arrays::flatten_fn::<N>);
    reg_ns!(ARRAY_NS, "insert-before", 3, arrays::insert_before_fn::<N>, &["array(*)", "xs:integer", "item()*"]);
    reg_ns!(ARRAY_NS, "remove", 2, arrays::remove_fn::<N>, &["array(*)", "xs:integer*"]);
    reg_ns!(ARRAY_NS, "for-each", 2, arrays::for_each_fn::<N>, &["array(*)", "function(*)"]);
    reg_ns!(ARRAY_NS, "filter", 2, arrays::filter_fn::<N>, &["array(*)", "function(*)"]);
    reg_ns!(ARRAY_NS, "fold-left", 3, arrays::fold_left_fn::<N>, &["array(*)", "item()*", "function(*)"]);
    reg_ns!(ARRAY_NS, "fold-right", 3, arrays::fold_right_fn::<N>, &["array(*)", "item()*", "function(*)"]);

    // ===== Date and time =====
    use datetime::Part;
    reg_ns!(FNS, "current-dateTime", 0, datetime::current_date_time_fn::<N>);
    reg_ns!(FNS, "current-date", 0, datetime::current_date_fn::<N>);
    reg_ns!(FNS, "current-time", 0, datetime::current_time_fn::<N>);
    reg_ns!(FNS, "implicit-timezone", 0, datetime::implicit_timezone_fn::<N>);
    reg_ns!(FNS, "dateTime", 2, datetime::date_time_fn::<N>, &["xs:date?", "xs:time?"]);
    let accessors: [(&str, &str, Part); 15] = [
        ("year-from-dateTime", "xs:dateTime?", Part::Year),
        ("month-from-dateTime", "xs:dateTime?", Part::Month),
        ("day-from-dateTime", "xs:dateTime?", Part::Day),
        ("hours-from-dateTime", "xs:dateTime?", Part::Hours),
        ("minutes-from-dateTime", "xs:dateTime?", Part::Minutes),
        ("seconds-from-dateTime", "xs:dateTime?", Part::Seconds),
        ("timezone-from-dateTime", "xs:dateTime?", Part::Timezone),
        ("year-from-date", "xs:date?", Part::Year),
        ("month-from-date", "xs:date?", Part::Month),
        ("day-from-date", "xs:date?", Part::Day),
        ("timezone-from-date", "xs:date?", Part::Timezone),
        ("hours-from-time", "xs:time?", Part::Hours),
        ("minutes-from-time", "xs:time?", Part::Minutes),
        ("seconds-from-time", "xs:time?", Part::Seconds),
        ("timezone-from-time", "xs:time?", Part::Timezone),
    ];
    for (local, spec, part) in accessors {
        reg_ns!(FNS, local, 1, datetime::component_fn::<N>(part), &[spec]);
    }
    for (local, part) in [
        ("years-from-duration", Part::Year),
        ("months-from-duration", Part::Month),
        ("days-from-duration", Part::Day),
        ("hours-from-duration", Part::Hours),
        ("minutes-from-duration", Part::Minutes),
        ("seconds-from-duration", Part::Seconds),
    ] {
        reg_ns!(FNS, local, 1, datetime::duration_component_fn::<N>(part), &["xs:duration?"]);
    }
    for (local, spec, ty) in [
        ("adjust-dateTime-to-timezone", "xs:dateTime?", AtomicType::DateTime),
        ("adjust-date-to-timezone", "xs:date?", AtomicType::Date),
        ("adjust-time-to-timezone", "xs:time?", AtomicType::Time),
    ] {
        reg_ns_range!(FNS, local, 1, 2, datetime::adjust_fn::<N>(ty), {
            1 => &[spec],
            2 => &[spec, "xs:dayTimeDuration?"],
        });
    }

    // ===== URIs =====
    reg_ns_range!(FNS, "resolve-uri", 1, 2, uris::resolve_uri_fn::<N>, {
        1 => &[STR],
        2 => &[STR, "xs:string"],
    });
    reg_ns!(FNS, "encode-for-uri", 1, uris::encode_for_uri_fn::<N>, &[STR]);
    reg_ns!(FNS, "iri-to-uri", 1, uris::iri_to_uri_fn::<N>, &[STR]);
    reg_ns!(FNS, "escape-html-uri", 1, uris::escape_html_uri_fn::<N>, &[STR]);

    // ===== QNames =====
    reg_ns!(FNS, "QName", 2, qnames::qname_fn::<N>, &[STR, "xs:string"]);
    reg_ns!(FNS, "resolve-QName", 2, qnames::resolve_qname_fn::<N>, &[STR, "element()"]);
    reg_ns!(FNS, "prefix-from-QName", 1, qnames::prefix_from_qname_fn::<N>, &["xs:QName?"]);
    reg_ns!(FNS, "local-name-from-QName", 1, qnames::local_name_from_qname_fn::<N>, &["xs:QName?"]);
    reg_ns!(FNS, "namespace-uri-from-QName", 1, qnames::namespace_uri_from_qname_fn::<N>, &["xs:QName?"]);
    reg_ns!(FNS, "namespace-uri-for-prefix", 2, qnames::namespace_uri_for_prefix_fn::<N>, &[STR, "element()"]);

    // ===== Updates =====
    reg_ns!(FNS, "put", 2, updating::put_fn::<N>, &["node()", "xs:string"]);
}

thread_local! {
    static REGISTRIES: RefCell<HashMap<TypeId, Box<dyn Any>>> = RefCell::new(HashMap::new());
    static SIGNATURES: Rc<FunctionSignatures> = {
        let mut sigs = FunctionSignatures::default();
        register_default_functions::<crate::simple_node::SimpleNode>(None, Some(&mut sigs));
        Rc::new(sigs)
    };
}

/// The built-in implementations for node type `N`, built once per thread.
pub fn default_function_registry<N: XdmNode>() -> Rc<FunctionRegistry<N>> {
    REGISTRIES.with(|cache| {
        let type_id = TypeId::of::<N>();
        if let Some(existing) = cache.borrow().get(&type_id).and_then(|b| b.downcast_ref::<Rc<FunctionRegistry<N>>>())
        {
            return Rc::clone(existing);
        }
        let mut reg = FunctionRegistry::new();
        register_default_functions(Some(&mut reg), None);
        let reg = Rc::new(reg);
        cache.borrow_mut().insert(type_id, Box::new(Rc::clone(&reg)));
        reg
    })
}

/// Names, arities and parameter types of the built-ins.
pub fn default_function_signatures() -> Rc<FunctionSignatures> {
    SIGNATURES.with(Rc::clone)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simple_node::SimpleNode;

    fn fixed(_: &CallCtx<'_, SimpleNode>, _: &[XdmSequence<SimpleNode>]) -> FnResult<SimpleNode> {
        Ok(Fetch::Ready(Vec::new()))
    }

    #[test]
    fn resolution_checks_arity() {
        let reg = default_function_registry::<SimpleNode>();
        let concat = ExpandedName::new(Some(FNS), "concat");
        assert!(reg.resolve(&concat, 5).is_ok());
        assert_eq!(reg.resolve(&concat, 1).err(), Some(ResolveError::WrongArity));
        assert_eq!(reg.resolve(&ExpandedName::new(Some(FNS), "nope"), 0).err(), Some(ResolveError::Unknown));
    }

    #[test]
    fn exact_arity_wins_over_ranges() {
        let mut reg: FunctionRegistry<SimpleNode> = FunctionRegistry::new();
        let name = ExpandedName::local("f");
        reg.register_range(name.clone(), 0, None, Rc::new(fixed));
        reg.register(name.clone(), 2, Rc::new(fixed));
        assert_eq!(reg.fns[&name][0].0, 2);
        assert!(reg.resolve(&name, 7).is_ok());
    }

    #[test]
    fn signatures_and_implementations_agree() {
        let sigs = default_function_signatures();
        let reg = default_function_registry::<SimpleNode>();
        for name in reg.fns.keys() {
            assert!(sigs.knows(name), "{name} has no signature");
        }
        let substring = ExpandedName::new(Some(FNS), "substring");
        assert_eq!(sigs.param_types(&substring, 2).map(|p| p.len()), Some(2));
    }
}

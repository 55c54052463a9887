use super::common::{boolean, integer, opt_atomic, ready, string_arg};
use super::{CallCtx, FnResult};
use crate::engine::evaluator::invoke_function;
use crate::engine::runtime::{Error, ErrorCode};
use crate::model::XdmNode;
use crate::xdm::{ArrayItem, AtomicValue, MapItem, XdmItem, XdmSequence, ready_or_pending};

fn map_arg<'a, N>(arg: &'a [XdmItem<N>], function: &str) -> Result<&'a MapItem<N>, Error> {
    match arg {
        [XdmItem::Map(m)] => Ok(m),
        _ => Err(Error::from_code(ErrorCode::XPTY0004, format!("map:{function} expects a single map"))),
    }
}

fn key_arg<'a, N>(arg: &'a [XdmItem<N>], function: &str) -> Result<&'a AtomicValue, Error> {
    opt_atomic(arg)
        .filter(|_| arg.len() == 1)
        .ok_or_else(|| Error::from_code(ErrorCode::XPTY0004, format!("map:{function} expects a single atomic key")))
}

fn map_item<N>(map: MapItem<N>) -> FnResult<N> {
    ready(vec![XdmItem::Map(map)])
}

pub(super) fn size_fn<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    integer(map_arg(&args[0], "size")?.len() as i128)
}

pub(super) fn keys_fn<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let map = map_arg(&args[0], "keys")?;
    ready(map.keys().cloned().map(XdmItem::Atomic).collect())
}

pub(super) fn contains_fn<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let map = map_arg(&args[0], "contains")?;
    boolean(map.contains(key_arg(&args[1], "contains")?))
}

pub(super) fn get_fn<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let map = map_arg(&args[0], "get")?;
    ready(map.get(key_arg(&args[1], "get")?).cloned().unwrap_or_default())
}

pub(super) fn put_fn<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let map = map_arg(&args[0], "put")?;
    map_item(map.put(key_arg(&args[1], "put")?.clone(), args[2].clone()))
}

/// `map:remove` takes a sequence of keys.
pub(super) fn remove_fn<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let mut map = map_arg(&args[0], "remove")?.clone();
    for key in args[1].iter().filter_map(XdmItem::as_atomic) {
        map = map.remove(key);
    }
    map_item(map)
}

pub(super) fn entry_fn<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let key = key_arg(&args[0], "entry")?.clone();
    map_item(MapItem::from_entries([(key, args[1].clone())]))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Duplicates {
    Reject,
    UseFirst,
    UseLast,
    UseAny,
    Combine,
}

fn duplicates_option<N: Clone>(options: Option<&XdmSequence<N>>) -> Result<Duplicates, Error> {
    let Some(options) = options.filter(|o| !o.is_empty()) else { return Ok(Duplicates::UseFirst) };
    let options = map_arg(options, "merge")?;
    let Some(value) = options.get(&AtomicValue::string("duplicates")) else { return Ok(Duplicates::UseFirst) };
    match string_arg(value).as_str() {
        "reject" => Ok(Duplicates::Reject),
        "use-first" => Ok(Duplicates::UseFirst),
        "use-last" => Ok(Duplicates::UseLast),
        "use-any" => Ok(Duplicates::UseAny),
        "combine" => Ok(Duplicates::Combine),
        other => Err(Error::from_code(ErrorCode::FOJS0005, format!("invalid duplicates option '{other}'"))),
    }
}

pub(super) fn merge_fn<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let duplicates = duplicates_option(args.get(1))?;
    let mut merged = MapItem::default();
    for item in &args[0] {
        let XdmItem::Map(map) = item else {
            return Err(Error::from_code(ErrorCode::XPTY0004, "map:merge expects a sequence of maps"));
        };
        for (key, value) in map.entries() {
            let Some(existing) = merged.get(key) else {
                merged = merged.put(key.clone(), value.clone());
                continue;
            };
            match duplicates {
                Duplicates::Reject => {
                    return Err(Error::from_code(
                        ErrorCode::FOJS0003,
                        format!("duplicate key '{}' in map:merge", key.lexical()),
                    ));
                }
                Duplicates::UseFirst | Duplicates::UseAny => {}
                Duplicates::UseLast => merged = merged.put(key.clone(), value.clone()),
                Duplicates::Combine => {
                    let mut combined = existing.clone();
                    combined.extend(value.iter().cloned());
                    merged = merged.put(key.clone(), combined);
                }
            }
        }
    }
    map_item(merged)
}

pub(super) fn for_each_fn<N: XdmNode>(cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let map = map_arg(&args[0], "for-each")?;
    let [f] = args[1].as_slice() else {
        return Err(Error::from_code(ErrorCode::XPTY0004, "map:for-each expects a function item"));
    };
    let mut out = Vec::new();
    for (key, value) in map.entries() {
        let args = vec![vec![XdmItem::Atomic(key.clone())], value.clone()];
        out.extend(ready_or_pending!(invoke_function(f, args, cc.params)?));
    }
    ready(out)
}

/// `map:find`: values of all entries with the key, searching nested maps and arrays.
pub(super) fn find_fn<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let key = key_arg(&args[1], "find")?;
    let mut found = Vec::new();
    let mut stack: Vec<XdmItem<N>> = args[0].iter().rev().cloned().collect();
    while let Some(item) = stack.pop() {
        match item {
            XdmItem::Map(map) => {
                if let Some(value) = map.get(key) {
                    found.push(value.clone());
                }
                for (_, value) in map.entries().collect::<Vec<_>>().into_iter().rev() {
                    stack.extend(value.iter().rev().cloned());
                }
            }
            XdmItem::Array(array) => {
                for member in array.members().iter().rev() {
                    stack.extend(member.iter().rev().cloned());
                }
            }
            _ => {}
        }
    }
    ready(vec![XdmItem::Array(ArrayItem::new(found))])
}

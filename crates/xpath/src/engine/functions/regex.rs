use super::common::{boolean, empty, ready, string, string_arg};
use super::{CallCtx, FnResult};
use crate::engine::runtime::{Error, ErrorCode};
use crate::model::XdmNode;
use crate::types::lexical::collapse_whitespace;
use crate::xdm::{AtomicValue, XdmItem, XdmSequence};
use std::sync::Arc;

fn regex_error(code: ErrorCode, msg: &str, e: fancy_regex::Error) -> Error {
    Error::from_code(code, msg).with_source(Some(Arc::new(e) as Arc<dyn std::error::Error + Send + Sync>))
}

/// Compiles a pattern with XPath flags (`s`, `m`, `i`, `x`, `q`).
fn build_with_flags(pattern: &str, flags: &str) -> Result<fancy_regex::Regex, Error> {
    let literal = flags.contains('q');
    let pattern = if literal { fancy_regex::escape(pattern).into_owned() } else { pattern.to_string() };
    let mut builder = fancy_regex::RegexBuilder::new(&pattern);
    for ch in flags.chars() {
        match ch {
            'i' => {
                builder.case_insensitive(true);
            }
            'm' => {
                builder.multi_line(true);
            }
            's' => {
                builder.dot_matches_new_line(true);
            }
            'x' if !literal => {
                builder.verbose_mode(true);
            }
            'x' | 'q' => {}
            other => {
                return Err(Error::from_code(ErrorCode::FORX0001, format!("unsupported regex flag '{other}'")));
            }
        }
    }
    builder.build().map_err(|e| regex_error(ErrorCode::FORX0002, "invalid regular expression", e))
}

fn flags_arg<N>(args: &[XdmSequence<N>], index: usize) -> String {
    args.get(index).map(|f| string_arg(f)).unwrap_or_default()
}

/// Rewrites an XPath replacement string (`$N`, `\$`, `\\`) into expander syntax.
fn expander_template(replacement: &str, groups: usize, literal: bool) -> Result<String, Error> {
    if literal {
        return Ok(replacement.replace('$', "$$"));
    }
    let invalid = |msg: &str| Error::from_code(ErrorCode::FORX0004, format!("invalid replacement string: {msg}"));
    let mut out = String::with_capacity(replacement.len());
    let mut chars = replacement.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some('\\') => out.push('\\'),
                Some('$') => out.push_str("$$"),
                _ => return Err(invalid("'\\' must be followed by '\\' or '$'")),
            },
            '$' => {
                let mut digits = String::new();
                while let Some(d) = chars.peek().copied().filter(char::is_ascii_digit) {
                    let candidate = format!("{digits}{d}");
                    if !digits.is_empty() && candidate.parse::<usize>().map_or(true, |n| n >= groups) {
                        break;
                    }
                    digits = candidate;
                    chars.next();
                }
                if digits.is_empty() {
                    return Err(invalid("'$' must be followed by a group number"));
                }
                let group: usize = digits.parse().map_err(|_| invalid("bad group number"))?;
                if group >= groups {
                    // groups the pattern does not have expand to nothing
                    continue;
                }
                out.push_str(&format!("${{{group}}}"));
            }
            other => out.push(other),
        }
    }
    Ok(out)
}

pub(crate) fn replace_all(text: &str, pattern: &str, replacement: &str, flags: &str) -> Result<String, Error> {
    let re = build_with_flags(pattern, flags)?;
    let template = expander_template(replacement, re.captures_len(), flags.contains('q'))?;
    let expander = fancy_regex::Expander::default();
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for caps in re.captures_iter(text) {
        let caps = caps.map_err(|e| regex_error(ErrorCode::FORX0002, "regex evaluation error", e))?;
        let Some(m) = caps.get(0) else { continue };
        if m.start() == m.end() {
            return Err(Error::from_code(ErrorCode::FORX0003, "the pattern matches the zero-length string"));
        }
        out.push_str(&text[last..m.start()]);
        expander.append_expansion(&mut out, &template, &caps);
        last = m.end();
    }
    out.push_str(&text[last..]);
    Ok(out)
}

pub(super) fn matches_fn<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let re = build_with_flags(&string_arg(&args[1]), &flags_arg(args, 2))?;
    let found = re
        .is_match(&string_arg(&args[0]))
        .map_err(|e| regex_error(ErrorCode::FORX0002, "regex evaluation error", e))?;
    boolean(found)
}

pub(super) fn replace_fn<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let text = string_arg(&args[0]);
    string(replace_all(&text, &string_arg(&args[1]), &string_arg(&args[2]), &flags_arg(args, 3))?)
}

pub(super) fn tokenize_fn<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    if args.len() == 1 {
        let text = collapse_whitespace(&string_arg(&args[0]));
        if text.is_empty() {
            return empty();
        }
        return ready(text.split(' ').map(|t| XdmItem::Atomic(AtomicValue::string(t))).collect());
    }
    let text = string_arg(&args[0]);
    let re = build_with_flags(&string_arg(&args[1]), &flags_arg(args, 2))?;
    if re.is_match("").map_err(|e| regex_error(ErrorCode::FORX0002, "regex evaluation error", e))? {
        return Err(Error::from_code(ErrorCode::FORX0003, "the pattern matches the zero-length string"));
    }
    if text.is_empty() {
        return empty();
    }
    let mut tokens = Vec::new();
    for part in re.split(&text) {
        let part = part.map_err(|e| regex_error(ErrorCode::FORX0002, "regex evaluation error", e))?;
        tokens.push(XdmItem::Atomic(AtomicValue::string(part)));
    }
    ready(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("abracadabra", "bra", "*", "", "a*cada*")]
    #[case("abracadabra", "a.*a", "*", "", "*")]
    #[case("abracadabra", "a.*?a", "*", "", "*c*bra")]
    #[case("abracadabra", "a(.)", "a$1$1", "", "abbraccaddabbra")]
    #[case("AAAA", "a", "b", "i", "bbbb")]
    #[case("a.b", ".", "!", "q", "a!b")]
    #[case("price", "i", "\\$", "", "pr$ce")]
    fn replacement(#[case] text: &str, #[case] pattern: &str, #[case] repl: &str, #[case] flags: &str, #[case] expected: &str) {
        assert_eq!(replace_all(text, pattern, repl, flags).unwrap(), expected);
    }

    #[test]
    fn zero_length_matches_are_rejected() {
        assert!(replace_all("abc", "x*", "-", "").unwrap_err().is(ErrorCode::FORX0003));
    }

    #[test]
    fn bad_flags_and_templates() {
        assert!(replace_all("abc", "b", "x", "z").unwrap_err().is(ErrorCode::FORX0001));
        assert!(replace_all("abc", "b", "$", "").unwrap_err().is(ErrorCode::FORX0004));
        assert!(replace_all("abc", "(", "x", "").unwrap_err().is(ErrorCode::FORX0002));
    }
}

use crate::loc::Loc;
use crate::types::{Scope, StrHashMap};
use crate::error::{Error, CycleKind, Result};

use std::cell::RefCell;

/// Names whose values are being expanded right now, innermost first.
/// Every recursion level links a new node onto its own stack frame.
#[derive(Copy, Clone)]
struct Chain<'a> {
    name: &'a str,
    parent: Option::<&'a Chain<'a>>,
}

impl Chain<'_> {
    #[inline]
    fn contains(&self, name: &str) -> bool {
        let mut link = Some(self);
        while let Some(l) = link {
            if l.name == name { return true }
            link = l.parent
        } false
    }

    /// Outermost name first, `closing` last.
    #[inline]
    fn cycle(&self, closing: &str) -> Error {
        let mut chain = vec![closing.to_owned()];
        let mut link = Some(self);
        while let Some(l) = link {
            chain.push(l.name.to_owned());
            link = l.parent
        }
        chain.reverse();
        Error::cycle(CycleKind::Variable, chain)
    }
}

/// Inner values already expanded during one call, by name.
type Memo<'a> = RefCell::<StrHashMap::<'a, String>>;

#[inline(always)]
pub(crate) fn is_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.')
}

enum Piece<'a> {
    /// `$$`, `$ `, `$:` or a `$` that starts no reference: copied as is up to the index.
    Verbatim(usize),
    /// `${name}` and the index right after the `}`.
    Braced(&'a str, usize),
    /// Longest run of name bytes after the `$`.
    Bare(&'a str),
    Unterminated,
}

/// Classifies what follows the `$` at `raw[i]`.
#[inline]
fn piece_at(raw: &str, i: usize) -> Piece<'_> {
    let bytes = raw.as_bytes();
    match bytes.get(i + 1) {
        Some(b'{') => match raw[i + 2..].find('}') {
            Some(len) => Piece::Braced(&raw[i + 2..i + 2 + len], i + 3 + len),
            None => Piece::Unterminated
        },
        Some(&b) if is_name_byte(b) => {
            let len = bytes[i + 1..].iter().take_while(|b| is_name_byte(**b)).count();
            Piece::Bare(&raw[i + 1..i + 1 + len])
        }
        Some(b) if b.is_ascii() => Piece::Verbatim(i + 2),
        _ => Piece::Verbatim(i + 1)
    }
}

/// Rejects references the expander could never resolve: `${` without `}` and `${}`.
pub fn validate(raw: &str, loc: Loc) -> Result::<()> {
    let mut start = 0;
    while let Some(pos) = raw[start..].find('$') {
        let i = start + pos;
        start = match piece_at(raw, i) {
            Piece::Verbatim(end) => end,
            Piece::Bare(name) => i + 1 + name.len(),
            Piece::Braced("", ..) => {
                return Err(format_err!(loc, "empty variable name in '{raw}'"))
            }
            Piece::Braced(_, end) => end,
            Piece::Unterminated => {
                return Err(format_err!(loc, "missing closing brace for variable reference in '{raw}'"))
            }
        }
    } Ok(())
}

/// Expands every `$name` and `${name}` in `raw`.
///
/// `inner` holds raw values and is expanded recursively on lookup, `outer` holds
/// values that are already final. `inner` wins when both define a name. Literal escapes
/// (`$$`, `$ `, `$:`) are left encoded in the result.
///
/// A bare name that is not defined is retried with its last `.`-suffix cut off,
/// so `$out.d` reads as `$out` followed by `.d`.
#[inline]
pub fn expand(raw: &str, outer: &Scope, inner: &Scope) -> Result::<String> {
    expand_in(raw, outer, inner, None, &Memo::default())
}

/// Expands each value of `scope` against itself and `outer`, every value once.
pub fn expand_scope(scope: &Scope, outer: &Scope) -> Result::<Scope> {
    let memo = Memo::default();
    scope.iter().map(|(name, value)| {
        if let Some(done) = memo.borrow().get(name.as_str()) {
            return Ok((name.clone(), done.clone()))
        }
        let link = Chain { name: name.as_str(), parent: None };
        let expanded = expand_in(value, outer, scope, Some(&link), &memo)?;
        memo.borrow_mut().insert(name.as_str(), expanded.clone());
        Ok((name.clone(), expanded))
    }).collect()
}

fn expand_in<'a>(
    raw: &str,
    outer: &Scope,
    inner: &'a Scope,
    chain: Option::<&Chain>,
    memo: &Memo<'a>
) -> Result::<String> {
    if !raw.contains('$') { return Ok(raw.to_owned()) }

    let mut ret = String::with_capacity(raw.len() + 32);
    let mut start = 0;
    while let Some(pos) = raw[start..].find('$') {
        let i = start + pos;
        ret.push_str(&raw[start..i]);
        start = match piece_at(raw, i) {
            Piece::Verbatim(end) => {
                ret.push_str(&raw[i..end]);
                end
            }
            Piece::Braced(name, end) => match lookup(name, outer, inner, chain, memo)? {
                Some(value) => {
                    ret.push_str(&value);
                    end
                }
                None => return Err(undefined(name, raw))
            },
            Piece::Bare(name) => {
                let (found, value) = lookup_dotted(name, raw, outer, inner, chain, memo)?;
                ret.push_str(&value);
                i + 1 + found.len()
            }
            Piece::Unterminated => return Err(undefined(&raw[i + 2..], raw))
        }
    }

    ret.push_str(&raw[start..]);
    Ok(ret)
}

/// A value that expanded once reaches no cycle, so later lookups reuse it whatever the chain.
#[inline]
fn lookup<'a>(
    name: &str,
    outer: &Scope,
    inner: &'a Scope,
    chain: Option::<&Chain>,
    memo: &Memo<'a>
) -> Result::<Option::<String>> {
    let Some((key, value)) = inner.get_key_value(name) else {
        return Ok(outer.get(name).cloned())
    };

    if let Some(done) = memo.borrow().get(name) {
        return Ok(Some(done.clone()))
    }

    if let Some(chain) = chain {
        if chain.contains(name) {
            return Err(chain.cycle(name))
        }
    }

    let link = Chain { name, parent: chain };
    let expanded = expand_in(value, outer, inner, Some(&link), memo)?;
    memo.borrow_mut().insert(key.as_str(), expanded.clone());
    Ok(Some(expanded))
}

fn lookup_dotted<'n, 'a>(
    name: &'n str,
    raw: &str,
    outer: &Scope,
    inner: &'a Scope,
    chain: Option::<&Chain>,
    memo: &Memo<'a>
) -> Result::<(&'n str, String)> {
    let mut candidate = name;
    loop {
        if let Some(value) = lookup(candidate, outer, inner, chain, memo)? {
            return Ok((candidate, value))
        }
        match candidate.rfind('.') {
            Some(idx) if idx > 0 => candidate = &candidate[..idx],
            _ => return Err(undefined(name, raw))
        }
    }
}

#[inline]
fn undefined(name: &str, text: &str) -> Error {
    Error::UndefinedVariable { name: name.to_owned(), text: text.to_owned() }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope(pairs: &[(&str, &str)]) -> Scope {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn expands_inner_before_outer() {
        let outer = scope(&[
            ("one", "uno"),
            ("two", "duo"),
            ("three.3", "tres"),
            ("four", "cuatro"),
            ("with-slash", "-"),
        ]);
        let inner = scope(&[("one", "ein"), ("four", "vier")]);

        let data = [
            ("", ""),
            ("abcde", "abcde"),
            ("$one", "ein"),
            ("$two", "duo"),
            ("${two}", "duo"),
            ("${three.3}", "tres"),
            ("${with-slash}", "-"),
            (" ${with-slash} ", " - "),
            ("$one ${with-slash} ", "ein - "),
            ("345$one 5 ${with-slash} ", "345ein 5 - "),
            ("345$one${two}5 ${with-slash} ", "345einduo5 - "),
        ];
        for (raw, expected) in data {
            assert_eq!(expand(raw, &outer, &inner).unwrap(), expected, "raw: {raw:?}");
        }
    }

    #[test]
    fn text_without_dollar_is_unchanged() {
        let outer = scope(&[("a", "x")]);
        let inner = scope(&[("b", "$a")]);
        for raw in ["", "a b c", "gcc -c a.c -o a.o", "{}", "ünïcödé : | ||", "\ttab"] {
            assert_eq!(expand(raw, &outer, &inner).unwrap(), raw);
            assert_eq!(expand(raw, &Scope::default(), &Scope::default()).unwrap(), raw);
        }
    }

    #[test]
    fn compile_command() {
        let globals = scope(&[("cc", "clang")]);
        let params = scope(&[
            ("command", "$cc -c $in -o $out"),
            ("in", "hello.c"),
            ("in_newline", "hello.c"),
            ("out", "hello.o"),
        ]);
        let command = expand(&params["command"], &globals, &params).unwrap();
        assert_eq!(command, "clang -c hello.c -o hello.o");
    }

    #[test]
    fn linker_command_from_inner_scope_only() {
        let params = scope(&[
            ("cc", "clang"),
            ("cclinkerflags", "-lstdc++"),
            ("in", "out/hello.o"),
            ("out", "out/hello"),
            ("command", "$cc $cclinkerflags $in -o $out"),
        ]);
        let expanded = expand_scope(&params, &Scope::default()).unwrap();
        assert_eq!(expanded["command"], "clang -lstdc++ out/hello.o -o out/hello");
    }

    #[test]
    fn scope_is_expanded_against_itself() {
        let outer = scope(&[("global", "replaced!")]);
        let globals = scope(&[
            ("one", "$two"),
            ("two", "!${three.3}"),
            ("three.3", "tres 3"),
            ("five", "$global"),
        ]);
        let expanded = expand_scope(&globals, &outer).unwrap();
        assert_eq!(expanded["one"], "!tres 3");
        assert_eq!(expanded["two"], "!tres 3");
        assert_eq!(expanded["five"], "replaced!");
    }

    #[test]
    fn dotted_names_fall_back() {
        let inner = scope(&[("out", "a.o")]);
        let outer = Scope::default();
        assert_eq!(expand("-MF $out.d", &outer, &inner).unwrap(), "-MF a.o.d");
        assert_eq!(expand("$out.x.y", &outer, &inner).unwrap(), "a.o.x.y");
        // braced names are exact
        assert!(matches!(
            expand("${out.d}", &outer, &inner),
            Err(Error::UndefinedVariable { ref name, .. }) if name == "out.d"
        ));
    }

    #[test]
    fn literal_escapes_stay_encoded() {
        let inner = scope(&[("in", "a.c")]);
        let outer = Scope::default();
        assert_eq!(expand("echo $$in", &outer, &inner).unwrap(), "echo $$in");
        assert_eq!(expand("c$:/x$ y $in", &outer, &inner).unwrap(), "c$:/x$ y a.c");
        assert_eq!(expand("cost: 5$", &outer, &inner).unwrap(), "cost: 5$");
        assert_eq!(expand("$/", &outer, &inner).unwrap(), "$/");
    }

    #[test]
    fn undefined_variable() {
        let err = expand("gcc $cflags", &Scope::default(), &Scope::default()).unwrap_err();
        assert_eq!(err.to_string(), "variable not defined: `cflags` in 'gcc $cflags'");
    }

    #[test]
    fn cycle_reports_chain() {
        let inner = scope(&[("a", "x $b"), ("b", "$c"), ("c", "${a}")]);
        match expand("$a", &Scope::default(), &inner) {
            Err(Error::Cycle { kind: CycleKind::Variable, chain }) => {
                assert_eq!(chain, ["a", "b", "c", "a"])
            }
            other => panic!("expected a cycle, got {other:?}")
        }
    }

    #[test]
    fn self_reference_is_a_cycle() {
        let globals = scope(&[("cflags", "$cflags -O2")]);
        match expand_scope(&globals, &Scope::default()) {
            Err(Error::Cycle { chain, .. }) => assert_eq!(chain, ["cflags", "cflags"]),
            other => panic!("expected a cycle, got {other:?}")
        }
    }

    #[test]
    fn adjacent_references_are_not_cycles() {
        let inner = scope(&[("a", "$b$b"), ("b", "x")]);
        assert_eq!(expand("$a $a", &Scope::default(), &inner).unwrap(), "xx xx");
        // `-` continues a bare name
        assert!(expand("$a-$a", &Scope::default(), &inner).is_err());
    }

    #[test]
    fn shared_references_expand_once() {
        // every level doubles the references to the one below
        let mut values = vec![("v0".to_owned(), String::new())];
        for i in 1..64 {
            values.push((format!("v{i}"), format!("$v{p}${{v{p}}}", p = i - 1)));
        }
        let globals = values.into_iter().collect::<Scope>();

        let expanded = expand_scope(&globals, &Scope::default()).unwrap();
        assert!(expanded.values().all(String::is_empty));
        assert_eq!(expand("[$v63]", &Scope::default(), &globals).unwrap(), "[]");
    }

    #[test]
    fn validation() {
        assert!(validate("$a ${b} $$ $: $ ", Loc::new(1, 0)).is_ok());
        let err = validate("${abc", Loc::new(3, 0)).unwrap_err();
        assert_eq!(err.to_string(), "3: missing closing brace for variable reference in '${abc'");
        assert!(validate("x ${}", Loc::new(1, 0)).unwrap_err().is_format());
    }
}

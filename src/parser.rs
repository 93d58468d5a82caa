use crate::loc::Loc;
use crate::line::Line;
use crate::consts::syntax::*;
use crate::error::Result;
use crate::template::{self, is_name_byte};
use crate::types::{PathSet, Scope};

use std::fmt;

use indexmap::IndexMap;
use fxhash::FxBuildHasher;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ParameterName {
    Command,
    Depfile,
    Deps,
    Description,
    Generator,
    Restat,
    Rspfile,
    RspfileContent,
    Pool,
    MsvcDepsPrefix,
}

impl ParameterName {
    #[inline]
    pub fn parse(name: &str) -> Option::<Self> {
        let p = match name {
            "command"          => Self::Command,
            "depfile"          => Self::Depfile,
            "deps"             => Self::Deps,
            "description"      => Self::Description,
            "generator"        => Self::Generator,
            "restat"           => Self::Restat,
            "rspfile"          => Self::Rspfile,
            "rspfile_content"  => Self::RspfileContent,
            "pool"             => Self::Pool,
            "msvc_deps_prefix" => Self::MsvcDepsPrefix,
            _ => return None
        }; Some(p)
    }

    #[inline]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Command        => "command",
            Self::Depfile        => "depfile",
            Self::Deps           => "deps",
            Self::Description    => "description",
            Self::Generator      => "generator",
            Self::Restat         => "restat",
            Self::Rspfile        => "rspfile",
            Self::RspfileContent => "rspfile_content",
            Self::Pool           => "pool",
            Self::MsvcDepsPrefix => "msvc_deps_prefix",
        }
    }
}

impl fmt::Display for ParameterName {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Set by every target for its rule, never by the rule itself.
pub const PSEUDO_PARAMETERS: [&str; 3] = ["in", "in_newline", "out"];

pub type Parameters = IndexMap::<ParameterName, String, FxBuildHasher>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rule {
    pub name: String,
    pub parameters: Parameters,
    pub loc: Loc,
}

impl Rule {
    #[inline]
    pub fn command(&self) -> &str {
        self.parameters.get(&ParameterName::Command).map(String::as_str).unwrap_or_default()
    }
}

/// One `build` statement with its indented bindings, all values still raw.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Target {
    pub rule: String,
    pub outputs: PathSet,
    pub implicit_outputs: PathSet,
    pub inputs: PathSet,
    pub implicit_inputs: PathSet,
    pub order_only_inputs: PathSet,
    pub variables: Scope,
    pub loc: Loc,
}

impl Target {
    #[inline(always)]
    pub fn is_phony(&self) -> bool {
        self.rule == PHONY
    }

    #[inline]
    pub fn all_inputs(&self) -> impl Iterator::<Item = &String> {
        self.inputs.iter()
            .chain(self.implicit_inputs.iter())
            .chain(self.order_only_inputs.iter())
    }

    #[inline]
    pub fn all_outputs(&self) -> impl Iterator::<Item = &String> {
        self.outputs.iter().chain(self.implicit_outputs.iter())
    }

    #[inline]
    pub fn has_inputs(&self) -> bool {
        self.all_inputs().next().is_some()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Binding {
    pub name: String,
    pub value: String,
    pub loc: Loc,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IncludeKind {
    Include,
    Subninja,
}

impl IncludeKind {
    #[inline(always)]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Include => INCLUDE,
            Self::Subninja => SUBNINJA,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Include {
    pub kind: IncludeKind,
    /// Raw path, expanded against the globals once the whole file is read.
    pub path: String,
    pub loc: Loc,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Statement {
    Binding(Binding),
    Rule(Rule),
    /// Pools are parsed for validity only.
    Pool(String),
    Build(Target),
    Default(Vec::<String>),
    Include(Include),
}

/// A non-indented line plus the indented lines that follow it.
#[derive(Clone, Debug)]
pub struct StatementLines {
    pub header: Line,
    pub body: Vec::<Line>,
}

/// Everything read out of one ninja file, in file order.
#[derive(Default, Debug)]
pub struct Parsed {
    pub variables: Scope,
    pub rules: Vec::<Rule>,
    pub targets: Vec::<Target>,
    pub defaults: Vec::<String>,
    pub includes: Vec::<Include>,
}

impl Parsed {
    #[inline]
    pub fn push(&mut self, statement: Statement) {
        match statement {
            Statement::Binding(b) => { self.variables.insert(b.name, b.value); }
            Statement::Rule(r) => self.rules.push(r),
            Statement::Pool(..) => {}
            Statement::Build(t) => self.targets.push(t),
            Statement::Default(names) => self.defaults.extend(names),
            Statement::Include(i) => self.includes.push(i),
        }
    }
}

#[cfg_attr(feature = "dbg", derive(Debug))]
pub struct Parser {
    parsed: Parsed,
    statements: usize,
}

impl Default for Parser {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl Parser {
    #[inline]
    pub fn new() -> Self {
        Self { parsed: Parsed::default(), statements: 0 }
    }

    /// Parses a run of lines that starts at a statement boundary.
    pub fn feed(&mut self, lines: impl IntoIterator::<Item = Line>) -> Result::<()> {
        for statement in group_statements(lines)? {
            self.parsed.push(parse_statement(&statement)?);
            self.statements += 1
        } Ok(())
    }

    #[inline(always)]
    pub fn statements(&self) -> usize {
        self.statements
    }

    #[inline(always)]
    pub fn finish(self) -> Parsed {
        self.parsed
    }
}

/// Blank and comment lines are dropped, indentation before the first header is an error.
pub fn group_statements(lines: impl IntoIterator::<Item = Line>) -> Result::<Vec::<StatementLines>> {
    let mut groups = Vec::<StatementLines>::with_capacity(64);
    for line in lines {
        if line.is_blank() || line.is_comment() { continue }

        if line.is_indented() {
            let Some(group) = groups.last_mut() else {
                return Err(format_err!(line.loc, "unexpected indentation: '{text}'", text = line.text.trim()))
            };
            group.body.push(line)
        } else {
            groups.push(StatementLines { header: line, body: Vec::new() })
        }
    } Ok(groups)
}

pub fn parse_statement(statement: &StatementLines) -> Result::<Statement> {
    let StatementLines { header, body } = statement;
    let (keyword, rest) = split_keyword(&header.text);
    match keyword {
        RULE => parse_rule(header, rest, body).map(Statement::Rule),
        POOL => parse_pool(header, rest, body).map(Statement::Pool),
        BUILD => parse_build(header, rest, body).map(Statement::Build),
        DEFAULT => parse_default(header, rest, body).map(Statement::Default),
        INCLUDE => parse_include(IncludeKind::Include, header, rest, body).map(Statement::Include),
        SUBNINJA => parse_include(IncludeKind::Subninja, header, rest, body).map(Statement::Include),
        _ if header.text.contains('=') => {
            let binding = parse_binding(header)?;
            if !body.is_empty() {
                return Err(format_err!{
                    body[0].loc,
                    "variable '{name}' can not be followed by indented lines",
                    name = binding.name
                })
            }
            Ok(Statement::Binding(binding))
        }
        _ => Err(format_err!(header.loc, "unexpected statement: '{text}'", text = header.text))
    }
}

#[inline]
fn split_keyword(text: &str) -> (&str, &str) {
    match text.find([' ', '\t']) {
        Some(i) => (&text[..i], text[i..].trim_start()),
        None => (text, "")
    }
}

pub fn parse_binding(line: &Line) -> Result::<Binding> {
    let text = line.text.trim_start();
    let Some((name, value)) = text.split_once('=') else {
        return Err(format_err!(line.loc, "expected '=' in '{text}'"))
    };

    let name = name.trim_end();
    if name.is_empty() || !name.bytes().all(is_name_byte) {
        return Err(format_err!(line.loc, "invalid variable name '{name}' in '{text}'"))
    }

    let value = trim_end_unescaped(value.trim_start());
    template::validate(value, line.loc)?;
    Ok(Binding { name: name.to_owned(), value: value.to_owned(), loc: line.loc })
}

#[inline]
fn parse_name<'a>(keyword: &str, header: &'a Line, rest: &'a str) -> Result::<&'a str> {
    let name = rest.trim_end();
    if name.is_empty() || !name.bytes().all(is_name_byte) {
        return Err(format_err!{
            header.loc,
            "expected '{keyword} <name>', got '{text}'",
            text = header.text
        })
    } Ok(name)
}

fn parse_rule(header: &Line, rest: &str, body: &[Line]) -> Result::<Rule> {
    let name = parse_name(RULE, header, rest)?;
    if name == PHONY {
        return Err(format_err!(header.loc, "rule '{PHONY}' is built in and can not be redefined"))
    }

    let mut parameters = Parameters::default();
    for line in body {
        let Binding { name: key, value, loc } = parse_binding(line)?;
        if PSEUDO_PARAMETERS.contains(&key.as_str()) {
            return Err(format_err!(loc, "'{key}' is set by targets and can not be defined by rule '{name}'"))
        }
        let Some(parameter) = ParameterName::parse(&key) else {
            return Err(format_err!(loc, "unknown rule parameter: '{key}'"))
        };
        parameters.insert(parameter, value);
    }

    if !parameters.contains_key(&ParameterName::Command) {
        return Err(format_err!(header.loc, "rule '{name}' has no command"))
    }

    Ok(Rule { name: name.to_owned(), parameters, loc: header.loc })
}

fn parse_pool(header: &Line, rest: &str, body: &[Line]) -> Result::<String> {
    let name = parse_name(POOL, header, rest)?;
    for line in body {
        _ = parse_binding(line)?;
    }
    Ok(name.to_owned())
}

/// `outputs [| implicit] : rule inputs [| implicit] [|| order-only]`
fn parse_build(header: &Line, rest: &str, body: &[Line]) -> Result::<Target> {
    let loc = header.loc;
    let text = &header.text;

    let Some(colon) = find_unescaped(rest, COLON) else {
        return Err(format_err!(loc, "expected '{COLON}' in build statement: '{text}'"))
    };
    let (left, right) = (&rest[..colon], &rest[colon + COLON.len()..]);

    let (outputs, implicit_outputs) = split_field(left, PIPE);
    let (right, order_only_inputs) = split_field(right, PIPE2);
    let (right, implicit_inputs) = split_field(right, PIPE);

    let path = |path: &str| -> Result::<String> {
        if path.starts_with(PIPE) {
            return Err(format_err!(loc, "unexpected '{path}' in build statement: '{text}'"))
        }
        template::validate(path, loc)?;
        Ok(path.to_owned())
    };
    let paths = |field: &str| -> Result::<PathSet> {
        split_unescaped(field).into_iter().map(path).collect()
    };

    let mut words = split_unescaped(right).into_iter();
    let Some(rule) = words.next() else {
        return Err(format_err!(loc, "expected rule name after '{COLON}': '{text}'"))
    };

    let target = Target {
        rule: rule.to_owned(),
        outputs: paths(outputs)?,
        implicit_outputs: paths(implicit_outputs)?,
        inputs: words.map(path).collect::<Result::<PathSet>>()?,
        implicit_inputs: paths(implicit_inputs)?,
        order_only_inputs: paths(order_only_inputs)?,
        variables: body.iter().map(|line| {
            parse_binding(line).map(|b| (b.name, b.value))
        }).collect::<Result::<Scope>>()?,
        loc,
    };

    if target.outputs.is_empty() {
        return Err(format_err!(loc, "expected at least one output: '{text}'"))
    }

    if target.is_phony() {
        if !target.implicit_outputs.is_empty() {
            return Err(format_err!(loc, "phony targets can not have implicit outputs: '{text}'"))
        }
        if target.has_inputs() && target.outputs.len() != 1 {
            return Err(format_err!{
                loc,
                "phony alias must have exactly one output, got {n}: '{text}'",
                n = target.outputs.len()
            })
        }
    }

    Ok(target)
}

fn parse_default(header: &Line, rest: &str, body: &[Line]) -> Result::<Vec::<String>> {
    if header.continued || !body.is_empty() {
        return Err(format_err!(header.loc, "'{DEFAULT}' must be a single line: '{text}'", text = header.text))
    }

    let names = split_unescaped(rest);
    if names.is_empty() {
        return Err(format_err!(header.loc, "expected at least one target after '{DEFAULT}'"))
    }

    names.into_iter().map(|name| {
        template::validate(name, header.loc)?;
        Ok(name.to_owned())
    }).collect()
}

fn parse_include(kind: IncludeKind, header: &Line, rest: &str, body: &[Line]) -> Result::<Include> {
    let keyword = kind.as_str();
    if !body.is_empty() {
        return Err(format_err!(body[0].loc, "'{keyword}' can not be followed by indented lines"))
    }

    let path = trim_end_unescaped(rest);
    if path.is_empty() {
        return Err(format_err!(header.loc, "expected a path after '{keyword}'"))
    }
    template::validate(path, header.loc)?;

    Ok(Include { kind, path: path.to_owned(), loc: header.loc })
}

#[inline]
fn split_field<'a>(text: &'a str, separator: &str) -> (&'a str, &'a str) {
    match find_unescaped(text, separator) {
        Some(i) => (&text[..i], &text[i + separator.len()..]),
        None => (text, "")
    }
}

/// Index of the first `pattern` in `text` that is not part of a `$` escape.
pub fn find_unescaped(text: &str, pattern: &str) -> Option::<usize> {
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == ESCAPE {
            i += 2;
            continue
        }
        if bytes[i..].starts_with(pattern.as_bytes()) {
            return Some(i)
        }
        i += 1
    } None
}

/// Splits on spaces and tabs, `$ ` does not split.
pub fn split_unescaped(text: &str) -> Vec::<&str> {
    let bytes = text.as_bytes();
    let mut ret = Vec::new();
    let mut start = Option::<usize>::None;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b' ' | b'\t' => {
                if let Some(s) = start.take() {
                    ret.push(&text[s..i])
                }
                i += 1
            }
            b => {
                start.get_or_insert(i);
                i += if b == ESCAPE { 2 } else { 1 }
            }
        }
    }
    if let Some(s) = start {
        ret.push(&text[s..])
    } ret
}

/// Trims trailing whitespace but keeps a space escaped with `$`.
#[inline]
fn trim_end_unescaped(text: &str) -> &str {
    let trimmed = text.trim_end();
    if trimmed.len() < text.len() && text.as_bytes()[trimmed.len()] == b' ' {
        let dollars = trimmed.bytes().rev().take_while(|b| *b == ESCAPE).count();
        if dollars % 2 == 1 {
            return &text[..trimmed.len() + 1]
        }
    } trimmed
}

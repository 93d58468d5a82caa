use crate::loc::Loc;
use crate::config::Config;
use crate::header::HeaderSplitter;
use crate::source::{ByteSource, SourceResolver};
use crate::line::{decode_escapes, escape_dollars, LineDecoder};
use crate::tokenizer::{self, statement_separator};
use crate::parser::{Include, ParameterName, Parameters, Parsed, Parser, Rule, Target};
use crate::graph::{self, AliasResolver, GraphReducer};
use crate::template::{expand, expand_scope};
use crate::types::{PathSet, Scope};
use crate::error::{Error, CycleKind, Result};

use std::collections::VecDeque;

use rayon::{ThreadPool, ThreadPoolBuilder};
use indexmap::IndexMap;
use fxhash::{FxBuildHasher, FxHashMap};
use tracing::{debug, info, warn};
#[cfg(feature = "dbg")]
use tramer::tramer;

pub type Rules = IndexMap::<String, Rule, FxBuildHasher>;

/// Reads ninja files through a [`SourceResolver`], tokenizing bodies on its own thread pool.
pub struct Pipeline<R> {
    config: Config,
    resolver: R,
    pool: ThreadPool,
}

impl<R: SourceResolver> Pipeline<R> {
    pub fn new(config: Config, resolver: R) -> Result::<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.jobs)
            .thread_name(|i| format!("kunai-tokenizer-{i}"))
            .build()?;
        Ok(Self { config, resolver, pool })
    }

    #[inline(always)]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Parses a single file: header sequentially, the rest in parallel chunks.
    #[cfg_attr(feature = "dbg", tramer("millis"))]
    pub fn parse_file<S>(&self, source: &S) -> Result::<Parsed>
    where
        S: ByteSource + ?Sized
    {
        let header = HeaderSplitter::new(self.config.header_block).split(source)?;
        let resume = header.resume;

        let mut parser = Parser::new();
        parser.feed(header.includes)?;
        parser.feed(header.variables)?;
        parser.feed(header.rules)?;

        let tokens = tokenizer::tokenize(
            &self.pool,
            source,
            resume.absolute(),
            self.config.chunk_size,
            statement_separator
        )?;

        let mut decoder = LineDecoder::new(resume.absolute(), resume.row);
        let mut lines = Vec::with_capacity(tokens.len());
        for token in tokens.iter() {
            lines.extend(decoder.append(&token.bytes))
        }
        lines.extend(decoder.finish());
        parser.feed(lines)?;

        debug!(
            path = source.path(),
            body = resume.absolute(),
            tokens = tokens.len(),
            statements = parser.statements(),
            "parsed"
        );

        Ok(parser.finish())
    }

    /// Loads `root` and every file it includes, breadth first, root first.
    #[cfg_attr(feature = "dbg", tramer("millis"))]
    pub fn load(&self, root: &str) -> Result::<Manifest> {
        struct Pending {
            path: String,
            including: Option::<String>,
            /// `path` and every file that led to it.
            chain: Vec::<String>,
        }

        let mut manifest = Manifest::default();
        let mut queue = VecDeque::from([Pending {
            path: root.to_owned(),
            including: None,
            chain: vec![root.to_owned()],
        }]);

        while let Some(Pending { path, including, chain }) = queue.pop_front() {
            let source = self.resolver.resolve(&path, including.as_deref())?;
            let parsed = self.parse_file(&source).map_err(|e| e.in_file(&path))?;

            let file = manifest.files.len() as u32;
            let includes = manifest.merge(parsed, file).map_err(|e| e.in_file(&path))?;

            for include in includes {
                let raw = expand(&include.path, &Scope::default(), &manifest.variables)
                    .map_err(|e| e.in_file(&path))?;
                let next = decode_escapes(&raw);

                if chain.contains(&next) {
                    let mut cycle = chain.clone();
                    cycle.push(next);
                    return Err(Error::cycle(CycleKind::Include, cycle))
                }

                debug!(from = path.as_str(), path = next.as_str(), kind = include.kind.as_str(), "following include");

                let mut next_chain = chain.clone();
                next_chain.push(next.clone());
                queue.push_back(Pending { path: next, including: Some(path.clone()), chain: next_chain })
            }

            manifest.files.push(path)
        }

        Ok(manifest)
    }
}

/// What to keep of the graph. Nothing requested keeps everything.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Request {
    pub outputs: Vec::<String>,
    /// Also seed from `default` statements.
    pub use_defaults: bool,
    pub executable: Option::<String>,
}

impl Request {
    #[inline]
    pub fn all() -> Self {
        Self::default()
    }

    #[inline]
    pub fn outputs<I, S>(outputs: I) -> Self
    where
        I: IntoIterator::<Item = S>,
        S: Into::<String>
    {
        Self { outputs: outputs.into_iter().map(Into::into).collect(), ..Self::default() }
    }

    #[inline]
    pub fn with_defaults(mut self) -> Self {
        self.use_defaults = true;
        self
    }

    #[inline]
    pub fn with_executable(mut self, executable: impl Into::<String>) -> Self {
        self.executable = Some(executable.into());
        self
    }

    /// Every name asked for, in request order.
    fn names<'a>(&'a self, defaults: &'a [String]) -> impl Iterator::<Item = &'a String> {
        self.outputs.iter()
            .chain(defaults.iter().filter(|_| self.use_defaults))
            .chain(self.executable.iter())
    }
}

/// Rules, variables and targets of a root file and all of its includes, unexpanded.
#[derive(Default, Debug)]
pub struct Manifest {
    pub rules: Rules,
    pub variables: Scope,
    pub targets: Vec::<Target>,
    pub defaults: Vec::<String>,
    /// Loaded files in load order.
    pub files: Vec::<String>,
    /// Index into `files` per target.
    origins: Vec::<u32>,
}

impl Manifest {
    /// Returns the includes of `parsed`, still raw.
    fn merge(&mut self, parsed: Parsed, file: u32) -> Result::<Vec::<Include>> {
        let Parsed { variables, rules, targets, defaults, includes } = parsed;

        // later files win
        self.variables.extend(variables);

        for rule in rules {
            if let Some(first) = self.rules.get(&rule.name) {
                return Err(format_err!{
                    rule.loc,
                    "duplicate rule '{name}', first defined on row {row}",
                    name = rule.name,
                    row = first.loc.row
                })
            }
            self.rules.insert(rule.name.clone(), rule);
        }

        self.origins.extend(std::iter::repeat(file).take(targets.len()));
        self.targets.extend(targets);
        self.defaults.extend(defaults);
        Ok(includes)
    }

    #[inline]
    fn origin(&self, target: usize) -> &str {
        self.origins.get(target)
            .and_then(|&file| self.files.get(file as usize))
            .map(String::as_str)
            .unwrap_or_default()
    }

    /// Expands, flattens aliases, prunes to `request` and expands the commands of what is left.
    #[cfg_attr(feature = "dbg", tramer("millis"))]
    pub fn resolve(&self, request: &Request) -> Result::<ResolvedGraph> {
        let empty = Scope::default();
        let globals = expand_scope(&self.variables, &empty)?;

        let mut phony = Vec::new();
        let mut concrete = Vec::with_capacity(self.targets.len());
        let mut origins = Vec::with_capacity(self.targets.len());
        for (i, target) in self.targets.iter().enumerate() {
            let expanded = expand_target(target, &globals).map_err(|e| e.in_file(self.origin(i)))?;
            if expanded.is_phony() {
                phony.push(expanded)
            } else {
                concrete.push(expanded);
                origins.push(i)
            }
        }

        let phony_artifacts = phony.iter()
            .filter(|t| !t.has_inputs())
            .flat_map(|t| t.outputs.iter().cloned())
            .collect::<PathSet>();

        let aliases = AliasResolver::new(graph::alias_map(&phony))?;
        for (target, &i) in concrete.iter_mut().zip(origins.iter()) {
            if let Some(output) = target.all_outputs().find(|o| aliases.is_alias(o)) {
                return Err(format_err!(target.loc, "multiple rules generate {output}").in_file(self.origin(i)))
            }
            aliases.rewrite(target)
        }

        let defaults = self.defaults.iter().map(|name| {
            expand(name, &globals, &empty).map(|n| decode_escapes(&n))
        }).collect::<Result::<Vec::<_>>>()?;

        let requested = request.names(&defaults).collect::<Vec::<_>>();
        let mut seeds = Vec::with_capacity(requested.len());
        for name in requested.iter() {
            match aliases.get(name) {
                Some(flat) => seeds.extend(flat.iter().map(String::as_str)),
                None => seeds.push(name.as_str())
            }
        }

        let reducer = GraphReducer::new(&concrete);
        let kept = reducer.reduce(seeds);
        info!(
            kept = kept.len(),
            pruned = concrete.len() - kept.len(),
            aliases = aliases.len(),
            "reduced graph"
        );

        let unresolved = requested.iter()
            .filter(|name| {
                !aliases.is_alias(name) && !reducer.produces(name) && !phony_artifacts.contains(name.as_str())
            })
            .map(|name| name.to_string())
            .collect::<PathSet>();
        for name in unresolved.iter() {
            warn!(output = name.as_str(), "nothing produces requested target")
        }

        let mut targets = Vec::<ResolvedTarget>::with_capacity(kept.len());
        let mut producers = FxHashMap::<String, usize>::default();
        for i in kept {
            let file = self.origin(origins[i]);
            let resolved = self.resolve_target(&concrete[i], &globals, file).map_err(|e| e.in_file(file))?;

            let clash = resolved.all_outputs().find_map(|o| producers.get(o).map(|&j| (o, j)));
            if let Some((output, j)) = clash {
                if targets[j].same_action(&resolved) { continue }
                return Err(format_err!(resolved.loc, "multiple rules generate {output}").in_file(file))
            }

            for output in resolved.all_outputs() {
                producers.insert(output.clone(), targets.len());
            }
            targets.push(resolved)
        }

        let generated_files = targets.iter()
            .flat_map(|t| t.all_outputs().cloned())
            .collect();

        Ok(ResolvedGraph {
            targets,
            defaults,
            unresolved: unresolved.into_iter().collect(),
            phony_artifacts,
            generated_files,
        })
    }

    fn resolve_target(&self, target: &Target, globals: &Scope, file: &str) -> Result::<ResolvedTarget> {
        let Some(rule) = self.rules.get(&target.rule) else {
            return Err(format_err!(target.loc, "unknown rule '{rule}'", rule = target.rule))
        };

        let mut inner = Scope::with_capacity_and_hasher(
            rule.parameters.len() + target.variables.len() + 3,
            Default::default()
        );
        for (name, value) in rule.parameters.iter() {
            inner.insert(name.as_str().to_owned(), value.clone());
        }

        let inputs = target.inputs.iter().map(|p| escape_dollars(p)).collect::<Vec::<_>>();
        let outputs = target.outputs.iter().map(|p| escape_dollars(p)).collect::<Vec::<_>>();
        inner.insert("in".to_owned(), inputs.join(" "));
        inner.insert("in_newline".to_owned(), inputs.join("\n"));
        inner.insert("out".to_owned(), outputs.join(" "));

        for (name, value) in target.variables.iter() {
            inner.insert(name.clone(), value.clone());
        }

        let mut parameters = Parameters::default();
        for name in rule.parameters.keys() {
            let raw = inner.get(name.as_str()).map(String::as_str).unwrap_or_default();
            let value = expand(raw, globals, &inner)?;
            parameters.insert(*name, decode_escapes(&value));
        }
        let command = parameters.shift_remove(&ParameterName::Command).unwrap_or_default();

        Ok(ResolvedTarget {
            rule: rule.name.clone(),
            command,
            parameters,
            outputs: target.outputs.clone(),
            implicit_outputs: target.implicit_outputs.clone(),
            inputs: target.inputs.clone(),
            implicit_inputs: target.implicit_inputs.clone(),
            order_only_inputs: target.order_only_inputs.clone(),
            variables: target.variables.iter()
                .map(|(name, value)| (name.clone(), decode_escapes(value)))
                .collect(),
            file: file.to_owned(),
            loc: target.loc,
        })
    }
}

/// Expands the bindings of `target` against `globals`, then its paths against both.
/// Paths come out decoded, bindings stay encoded for the command expansion.
fn expand_target(target: &Target, globals: &Scope) -> Result::<Target> {
    let variables = expand_scope(&target.variables, globals)?;
    let paths = |set: &PathSet| -> Result::<PathSet> {
        let mut ret = PathSet::with_capacity_and_hasher(set.len(), Default::default());
        for path in set.iter() {
            let path = decode_escapes(&expand(path, globals, &variables)?);
            if !path.is_empty() {
                ret.insert(path);
            }
        }
        Ok(ret)
    };

    Ok(Target {
        rule: target.rule.clone(),
        outputs: paths(&target.outputs)?,
        implicit_outputs: paths(&target.implicit_outputs)?,
        inputs: paths(&target.inputs)?,
        implicit_inputs: paths(&target.implicit_inputs)?,
        order_only_inputs: paths(&target.order_only_inputs)?,
        variables,
        loc: target.loc,
    })
}

/// A build action ready to be handed over: every string expanded and decoded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub rule: String,
    pub command: String,
    /// Every other parameter the rule defines.
    pub parameters: Parameters,
    pub outputs: PathSet,
    pub implicit_outputs: PathSet,
    pub inputs: PathSet,
    pub implicit_inputs: PathSet,
    pub order_only_inputs: PathSet,
    pub variables: Scope,
    /// File of the `build` statement.
    pub file: String,
    pub loc: Loc,
}

impl ResolvedTarget {
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
    pub fn parameter(&self, name: ParameterName) -> Option::<&str> {
        match name {
            ParameterName::Command => Some(&self.command),
            _ => self.parameters.get(&name).map(String::as_str)
        }
    }

    /// Same action regardless of where it was declared.
    #[inline]
    pub fn same_action(&self, other: &Self) -> bool {
        self.rule == other.rule
            && self.command == other.command
            && self.parameters == other.parameters
            && self.outputs == other.outputs
            && self.implicit_outputs == other.implicit_outputs
            && self.inputs == other.inputs
            && self.implicit_inputs == other.implicit_inputs
            && self.order_only_inputs == other.order_only_inputs
    }
}

/// Receiver of a resolved graph.
pub trait TargetSink {
    fn target(&mut self, target: &ResolvedTarget);

    fn defaults(&mut self, names: &[String]);

    fn unresolved(&mut self, name: &str);
}

#[derive(Clone, Debug, Default)]
pub struct ResolvedGraph {
    /// Kept, deduplicated non-phony targets in declaration order.
    pub targets: Vec::<ResolvedTarget>,
    pub defaults: Vec::<String>,
    /// Requested names nothing produces.
    pub unresolved: Vec::<String>,
    /// Outputs of input-less phony targets: paths that may not exist.
    pub phony_artifacts: PathSet,
    /// Every output of every kept target.
    pub generated_files: PathSet,
}

impl ResolvedGraph {
    pub fn deliver(&self, sink: &mut impl TargetSink) {
        for target in self.targets.iter() {
            sink.target(target)
        }
        sink.defaults(&self.defaults);
        for name in self.unresolved.iter() {
            sink.unresolved(name)
        }
    }

    #[inline]
    pub fn target_for(&self, output: &str) -> Option::<&ResolvedTarget> {
        self.targets.iter().find(|t| t.all_outputs().any(|o| o == output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemoryResolver;

    fn pipeline(files: &[(&str, &str)]) -> Pipeline::<MemoryResolver> {
        let resolver = files.iter().fold(MemoryResolver::new(), |r, (path, text)| r.with(*path, text));
        Pipeline::new(Config::default().with_jobs(2).with_chunk_size(16).with_header_block(8), resolver).unwrap()
    }

    #[test]
    fn request_names_follow_flags() {
        let defaults = vec!["d".to_owned()];
        let names = |r: &Request| r.names(&defaults).cloned().collect::<Vec::<_>>();
        assert!(names(&Request::all()).is_empty());
        assert_eq!(names(&Request::outputs(["a"]).with_defaults().with_executable("e")), ["a", "d", "e"]);
        assert_eq!(names(&Request::outputs(["a"])), ["a"]);
    }

    #[test]
    fn body_and_header_agree_for_any_chunking() {
        let text = "cc = clang\nrule cc\n  command = $cc $in -o $out\nbuild a.o: cc a.c\nx = 1\nbuild b.o: cc b.c\n  cflags = $x\n";
        let expected = pipeline(&[("build.ninja", text)]).load("build.ninja").unwrap();
        for (chunk, block) in [(1, 1), (3, 5), (7, 2), (1024, 1024)] {
            let resolver = MemoryResolver::new().with("build.ninja", text);
            let config = Config::default().with_chunk_size(chunk).with_header_block(block).with_jobs(3);
            let manifest = Pipeline::new(config, resolver).unwrap().load("build.ninja").unwrap();
            assert_eq!(manifest.targets, expected.targets);
            assert_eq!(manifest.variables, expected.variables);
        }
    }

    #[test]
    fn errors_name_the_file() {
        let p = pipeline(&[("build.ninja", "include rules.ninja\n"), ("rules.ninja", "rule r\n  cmd = x\n")]);
        let err = p.load("build.ninja").unwrap_err();
        assert_eq!(err.to_string(), "rules.ninja:2: unknown rule parameter: 'cmd'");
    }

    #[test]
    fn duplicate_rules_across_files() {
        let p = pipeline(&[
            ("build.ninja", "rule r\n  command = a\ninclude more.ninja\n"),
            ("more.ninja", "rule r\n  command = b\n"),
        ]);
        let err = p.load("build.ninja").unwrap_err();
        assert!(err.to_string().starts_with("more.ninja:1: duplicate rule 'r'"), "{err}");
    }

    #[test]
    fn origin_of_targets() {
        let p = pipeline(&[
            ("build.ninja", "rule r\n  command = x\nbuild a: r\nsubninja sub.ninja\n"),
            ("sub.ninja", "build b: r\n"),
        ]);
        let manifest = p.load("build.ninja").unwrap();
        assert_eq!(manifest.files, ["build.ninja", "sub.ninja"]);
        assert_eq!(manifest.origin(0), "build.ninja");
        assert_eq!(manifest.origin(1), "sub.ninja");

        let graph = manifest.resolve(&Request::all()).unwrap();
        assert_eq!(graph.target_for("b").map(|t| t.file.as_str()), Some("sub.ninja"));
    }
}

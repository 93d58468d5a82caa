use crate::parser::Target;
use crate::error::{Error, CycleKind, Result};
use crate::types::{AliasMap, PathSet, StrHashMap, StrHashSet, StrIndexSet};

use std::collections::VecDeque;

#[cfg(feature = "dbg")]
use tramer::tramer;

/// Maps each phony output to everything its phony statements list as inputs.
/// Input-less phony targets only mark paths that may not exist and map nothing.
pub fn alias_map<'a>(targets: impl IntoIterator::<Item = &'a Target>) -> AliasMap {
    let mut map = AliasMap::default();
    for target in targets.into_iter().filter(|t| t.is_phony() && t.has_inputs()) {
        for output in target.outputs.iter() {
            map.entry(output.clone())
                .or_default()
                .extend(target.all_inputs().cloned())
        }
    } map
}

/// Fully flattened aliases: no mapped set contains another alias.
#[cfg_attr(feature = "dbg", derive(Debug))]
pub struct AliasResolver {
    aliases: AliasMap,
}

impl AliasResolver {
    /// Fails with an alias cycle naming the chain of aliases involved.
    pub fn new(map: AliasMap) -> Result::<Self> {
        let mut resolved = AliasMap::with_capacity_and_hasher(map.len(), Default::default());
        let mut in_progress = StrIndexSet::default();
        for name in map.keys() {
            flatten(name, &map, &mut resolved, &mut in_progress)?
        }

        // back to definition order
        let aliases = map.keys().filter_map(|name| {
            resolved.swap_remove(name.as_str()).map(|flat| (name.clone(), flat))
        }).collect();

        Ok(Self { aliases })
    }

    #[inline(always)]
    pub fn is_alias(&self, path: &str) -> bool {
        self.aliases.contains_key(path)
    }

    #[inline(always)]
    pub fn get(&self, alias: &str) -> Option::<&PathSet> {
        self.aliases.get(alias)
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }

    /// Replaces every alias in `paths` with what it stands for, in place of the alias.
    pub fn substitute(&self, paths: &PathSet) -> PathSet {
        let mut ret = PathSet::with_capacity_and_hasher(paths.len(), Default::default());
        for path in paths.iter() {
            match self.aliases.get(path.as_str()) {
                Some(flat) => ret.extend(flat.iter().cloned()),
                None => { ret.insert(path.clone()); }
            }
        } ret
    }

    #[inline]
    pub fn rewrite(&self, target: &mut Target) {
        if self.aliases.is_empty() { return }
        target.inputs = self.substitute(&target.inputs);
        target.implicit_inputs = self.substitute(&target.implicit_inputs);
        target.order_only_inputs = self.substitute(&target.order_only_inputs);
    }
}

fn flatten<'a>(
    name: &'a str,
    map: &'a AliasMap,
    resolved: &mut AliasMap,
    in_progress: &mut StrIndexSet<'a>
) -> Result::<()> {
    if resolved.contains_key(name) { return Ok(()) }

    if !in_progress.insert(name) {
        let mut chain = in_progress.iter()
            .skip_while(|n| **n != name)
            .map(|n| n.to_string())
            .collect::<Vec::<_>>();
        chain.push(name.to_owned());
        return Err(Error::cycle(CycleKind::Alias, chain))
    }

    let mut flat = PathSet::default();
    for input in map[name].iter() {
        if map.contains_key(input.as_str()) {
            flatten(input, map, resolved, in_progress)?;
            flat.extend(resolved[input.as_str()].iter().cloned())
        } else {
            flat.insert(input.clone());
        }
    }

    in_progress.pop();
    resolved.insert(name.to_owned(), flat);
    Ok(())
}

/// Indexes targets by everything they produce for backward reachability.
#[cfg_attr(feature = "dbg", derive(Debug))]
pub struct GraphReducer<'a> {
    targets: &'a [Target],
    producers: StrHashMap::<'a, Vec::<usize>>,
}

impl<'a> GraphReducer<'a> {
    pub fn new(targets: &'a [Target]) -> Self {
        let mut producers = StrHashMap::<Vec::<usize>>::default();
        producers.reserve(targets.len());
        for (i, target) in targets.iter().enumerate() {
            for output in target.all_outputs() {
                producers.entry(output.as_str()).or_default().push(i)
            }
        }
        Self { targets, producers }
    }

    #[inline(always)]
    pub fn produces(&self, path: &str) -> bool {
        self.producers.contains_key(path)
    }

    /// Indices of the targets reachable from `seeds` through their inputs, in file order.
    /// Without seeds every target is kept.
    #[cfg_attr(feature = "dbg", tramer("millis"))]
    pub fn reduce<I>(&self, seeds: I) -> Vec::<usize>
    where
        I: IntoIterator::<Item = &'a str>
    {
        let mut queue = seeds.into_iter().collect::<VecDeque::<_>>();
        if queue.is_empty() {
            return (0..self.targets.len()).collect()
        }

        let mut visited = StrHashSet::default();
        let mut kept = vec![false; self.targets.len()];
        while let Some(path) = queue.pop_front() {
            if !visited.insert(path) { continue }

            let Some(producers) = self.producers.get(path) else { continue };
            for &i in producers.iter() {
                if kept[i] { continue }
                kept[i] = true;
                queue.extend(self.targets[i].all_inputs().map(String::as_str))
            }
        }

        kept.iter()
            .enumerate()
            .filter_map(|(i, k)| k.then_some(i))
            .collect()
    }
}

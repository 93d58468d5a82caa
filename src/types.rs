use indexmap::{IndexMap, IndexSet};
use fxhash::{FxHashMap, FxHashSet, FxBuildHasher};

pub type StrHashSet<'a> = FxHashSet::<&'a str>;
pub type StrHashMap<'a, T> = FxHashMap::<&'a str, T>;

pub type StrIndexSet<'a> = IndexSet::<&'a str, FxBuildHasher>;

/// Ordered, duplicate-free list of paths as written in a `build` statement.
pub type PathSet = IndexSet::<String, FxBuildHasher>;

/// Variable bindings of one scope, kept in definition order.
pub type Scope = IndexMap::<String, String, FxBuildHasher>;

pub type AliasMap = IndexMap::<String, PathSet, FxBuildHasher>;

#[inline]
pub fn path_set<I, S>(paths: I) -> PathSet
where
    I: IntoIterator::<Item = S>,
    S: Into::<String>
{
    paths.into_iter().map(Into::into).collect()
}

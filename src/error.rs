use crate::loc::Loc;

use std::io;
use std::fmt;

use thiserror::Error;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CycleKind {
    Variable,
    Alias,
    Include,
}

impl fmt::Display for CycleKind {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Variable => "variable",
            Self::Alias => "alias",
            Self::Include => "include",
        })
    }
}

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed grammar: bad rule header, unknown parameter, bad build line...
    #[error("{loc}: {message}")]
    Format {
        loc: Loc,
        message: String
    },

    #[error("variable not defined: `{name}` in '{text}'")]
    UndefinedVariable {
        name: String,
        text: String
    },

    #[error("{kind} cycle detected: {chain}", chain = chain.join(" -> "))]
    Cycle {
        kind: CycleKind,
        chain: Vec::<String>
    },

    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error
    },

    #[error("could not start tokenizer threads: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("{path}{sep}{source}", sep = if source.is_format() { ":" } else { ": " })]
    File {
        path: String,
        #[source]
        source: Box::<Error>
    },
}

impl Error {
    #[inline]
    pub fn io(path: impl Into::<String>, source: io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }

    #[inline]
    pub fn cycle(kind: CycleKind, chain: Vec::<String>) -> Self {
        Self::Cycle { kind, chain }
    }

    /// Attaches the ninja file the error came from, once.
    #[inline]
    pub fn in_file(self, path: &str) -> Self {
        match self {
            Self::File { .. } | Self::Io { .. } => self,
            err => Self::File { path: path.to_owned(), source: Box::new(err) }
        }
    }

    #[inline(always)]
    pub fn is_format(&self) -> bool {
        matches!(self, Self::Format { .. })
    }

    /// Strips [`Error::File`] wrappers.
    #[inline]
    pub fn root(&self) -> &Self {
        match self {
            Self::File { source, .. } => source.root(),
            err => err
        }
    }
}

pub type Result<T> = std::result::Result::<T, Error>;

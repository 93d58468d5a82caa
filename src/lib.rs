#[macro_use]
pub mod loc;

pub mod cli;
pub mod line;
pub mod graph;
pub mod types;
pub mod error;
pub mod config;
pub mod consts;
pub mod header;
pub mod parser;
pub mod source;
pub mod template;
pub mod pipeline;
pub mod tokenizer;

pub use loc::Loc;
pub use config::Config;
pub use error::{Error, CycleKind, Result};
pub use source::{ByteSource, FsResolver, MemoryResolver, MemorySource, MmapSource, SourceResolver};
pub use pipeline::{Manifest, Pipeline, Request, ResolvedGraph, ResolvedTarget, TargetSink};
pub use parser::{ParameterName, Parameters};

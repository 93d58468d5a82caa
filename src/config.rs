use crate::consts::{DEFAULT_CHUNK_SIZE, DEFAULT_HEADER_BLOCK};

use std::thread::available_parallelism;

/// Knobs of the parsing pipeline, passed to [`crate::Pipeline::new`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Size of the byte ranges the body of a file is split into for tokenization.
    pub chunk_size: u32,
    /// Amount of tokenizer threads.
    pub jobs: usize,
    /// Block size the header is read with.
    pub header_block: usize,
}

impl Default for Config {
    #[inline]
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            jobs: available_parallelism().map_or(1, |n| n.get()),
            header_block: DEFAULT_HEADER_BLOCK,
        }
    }
}

impl Config {
    #[inline]
    pub fn with_chunk_size(mut self, chunk_size: u32) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    #[inline]
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    #[inline]
    pub fn with_header_block(mut self, header_block: usize) -> Self {
        self.header_block = header_block.max(1);
        self
    }
}

use crate::source::{ByteSource, ChunkPlan};
use crate::error::{Error, Result};

use std::mem;

use rayon::ThreadPool;
use rayon::prelude::*;
use crossbeam_channel::Sender;
#[cfg(feature = "dbg")]
use tramer::tramer;

/// Raw bytes of a token together with the absolute offset of its first byte.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token {
    pub offset: u64,
    pub bytes: Vec::<u8>,
}

impl Token {
    #[inline(always)]
    pub fn new(offset: u64, bytes: Vec::<u8>) -> Self {
        Self { offset, bytes }
    }

    #[inline(always)]
    pub fn end(&self) -> u64 {
        self.offset + self.bytes.len() as u64
    }
}

pub trait TokenConsumer {
    fn consume(&mut self, token: Token);
}

impl TokenConsumer for Vec::<Token> {
    #[inline(always)]
    fn consume(&mut self, token: Token) {
        self.push(token)
    }
}

impl TokenConsumer for Sender::<Token> {
    #[inline(always)]
    fn consume(&mut self, token: Token) {
        // receiver outlives every worker
        _ = self.send(token)
    }
}

/// Separator of top-level ninja statements: a newline not followed by indentation.
#[inline(always)]
pub fn statement_separator(cur: u8, next: u8) -> bool {
    cur == b'\n' && !matches!(next, b' ' | b'\t')
}

/// Splits one chunk into tokens, a separator match at `i` splits before `i + 1`.
#[derive(Copy, Clone)]
pub struct ChunkTokenizer<F> {
    separator: F,
}

impl<F> ChunkTokenizer<F>
where
    F: Fn(u8, u8) -> bool
{
    #[inline(always)]
    pub fn new(separator: F) -> Self {
        Self { separator }
    }

    /// Hands interior tokens to `consumer` and returns the leading and trailing
    /// fragments, which may continue in the neighbouring chunks.
    /// A chunk with no separator inside yields a single fragment.
    pub fn tokenize(&self, buf: &[u8], offset: u64, consumer: &mut impl TokenConsumer) -> Vec::<Token> {
        let mut boundary = Vec::with_capacity(2);
        if buf.is_empty() { return boundary }

        let mut start = 0;
        for (i, pair) in buf.windows(2).enumerate() {
            if !(self.separator)(pair[0], pair[1]) { continue }

            let token = Token::new(offset + start as u64, buf[start..=i].to_vec());
            if start == 0 {
                boundary.push(token)
            } else {
                consumer.consume(token)
            }
            start = i + 1
        }

        boundary.push(Token::new(offset + start as u64, buf[start..].to_vec()));
        boundary
    }
}

/// Stitches boundary fragments of adjacent chunks back into whole tokens.
pub struct TokenAssembler<F> {
    separator: F,
    fragments: Vec::<Token>,
}

impl<F> TokenAssembler<F>
where
    F: Fn(u8, u8) -> bool
{
    #[inline]
    pub fn new(separator: F) -> Self {
        Self { separator, fragments: Vec::with_capacity(64) }
    }

    #[inline]
    pub fn add(&mut self, fragments: impl IntoIterator::<Item = Token>) {
        self.fragments.extend(fragments)
    }

    /// Fragments are concatenated when contiguous and the bytes meeting at the seam
    /// are not a separator pair themselves.
    pub fn assemble(mut self, consumer: &mut impl TokenConsumer) {
        self.fragments.sort_unstable_by_key(|t| t.offset);

        let mut current = Option::<Token>::None;
        for fragment in mem::take(&mut self.fragments) {
            current = match current.take() {
                Some(mut prev) if self.joins(&prev, &fragment) => {
                    prev.bytes.extend_from_slice(&fragment.bytes);
                    Some(prev)
                }
                Some(prev) => {
                    consumer.consume(prev);
                    Some(fragment)
                }
                None => Some(fragment)
            }
        }

        if let Some(last) = current {
            consumer.consume(last)
        }
    }

    #[inline]
    fn joins(&self, prev: &Token, next: &Token) -> bool {
        if prev.end() != next.offset { return false }
        match (prev.bytes.last(), next.bytes.first()) {
            (Some(&cur), Some(&first)) => !(self.separator)(cur, first),
            _ => true
        }
    }
}

/// Tokenizes `[start, source.len())` of `source` on `pool`, one task per chunk.
/// Returns every token sorted by offset, the first failing read aborts the whole run.
#[cfg_attr(feature = "dbg", tramer("millis"))]
pub fn tokenize<S, F>(
    pool: &ThreadPool,
    source: &S,
    start: u64,
    chunk_size: u32,
    separator: F
) -> Result::<Vec::<Token>>
where
    S: ByteSource + ?Sized,
    F: Fn(u8, u8) -> bool + Copy + Send + Sync
{
    let chunks = ChunkPlan::new(start, source.len(), chunk_size).collect::<Vec::<_>>();
    let (tx, rx) = crossbeam_channel::unbounded();

    let tokenizer = ChunkTokenizer::new(separator);
    let boundaries = pool.install(|| {
        chunks.par_iter().map_with(tx, |tx, chunk| {
            let bytes = source.read_at(chunk.offset, chunk.length as usize)
                .map_err(|e| Error::io(source.path(), e))?;
            Ok(tokenizer.tokenize(&bytes, chunk.offset, tx))
        }).collect::<Result::<Vec::<_>>>()
    })?;

    let mut tokens = rx.try_iter().collect::<Vec::<_>>();
    let mut assembler = TokenAssembler::new(separator);
    boundaries.into_iter().for_each(|b| assembler.add(b));
    assembler.assemble(&mut tokens);

    tokens.sort_unstable_by_key(|t| t.offset);

    tracing::debug!(
        path = source.path(),
        chunks = chunks.len(),
        tokens = tokens.len(),
        "tokenized"
    );

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;

    use std::io;

    const NINJA: &[u8] = b"cc = clang\nrule cc\n  command = $cc -c $in $\n    -o $out\n\nbuild a.o: cc a.c\nbuild b.o: cc b.c\n  cflags = -O2\ndefault a.o\n";

    fn single_pass(buf: &[u8]) -> Vec::<Token> {
        let mut tokens = Vec::new();
        let boundary = ChunkTokenizer::new(statement_separator).tokenize(buf, 0, &mut tokens);
        let mut assembler = TokenAssembler::new(statement_separator);
        assembler.add(boundary);
        assembler.assemble(&mut tokens);
        tokens.sort_unstable_by_key(|t| t.offset);
        tokens
    }

    fn chunked(buf: &[u8], chunk_size: usize) -> Vec::<Token> {
        let tokenizer = ChunkTokenizer::new(statement_separator);
        let mut assembler = TokenAssembler::new(statement_separator);
        let mut tokens = Vec::new();
        for (i, chunk) in buf.chunks(chunk_size).enumerate() {
            let offset = (i * chunk_size) as u64;
            assembler.add(tokenizer.tokenize(chunk, offset, &mut tokens));
        }
        assembler.assemble(&mut tokens);
        tokens.sort_unstable_by_key(|t| t.offset);
        tokens
    }

    fn texts(tokens: &[Token]) -> Vec::<&str> {
        tokens.iter().map(|t| std::str::from_utf8(&t.bytes).unwrap()).collect()
    }

    #[test]
    fn splits_on_statement_boundaries() {
        let tokens = single_pass(NINJA);
        assert_eq!(texts(&tokens), vec![
            "cc = clang\n",
            "rule cc\n  command = $cc -c $in $\n    -o $out\n",
            "\n",
            "build a.o: cc a.c\n",
            "build b.o: cc b.c\n  cflags = -O2\n",
            "default a.o\n",
        ]);
    }

    #[test]
    fn chunk_count_does_not_change_tokens() {
        let expected = single_pass(NINJA);
        for chunk_size in 1..=NINJA.len() + 1 {
            assert_eq!(chunked(NINJA, chunk_size), expected, "chunk size: {chunk_size}");
        }
    }

    #[test]
    fn every_byte_is_emitted_exactly_once() {
        for chunk_size in [1, 3, 7, 16, 1000] {
            let tokens = chunked(NINJA, chunk_size);
            let mut offset = 0;
            for token in tokens.iter() {
                assert_eq!(token.offset, offset);
                offset = token.end()
            }
            let joined = tokens.into_iter().flat_map(|t| t.bytes).collect::<Vec::<_>>();
            assert_eq!(joined, NINJA);
        }
    }

    #[test]
    fn fragment_without_separators_is_one_boundary_token() {
        let mut interior = Vec::new();
        let boundary = ChunkTokenizer::new(statement_separator).tokenize(b"  command = x", 40, &mut interior);
        assert!(interior.is_empty());
        assert_eq!(boundary, vec![Token::new(40, b"  command = x".to_vec())]);
    }

    #[test]
    fn separator_across_chunk_seam_is_respected() {
        let tokenizer = ChunkTokenizer::new(statement_separator);
        let mut tokens = Vec::new();
        let mut assembler = TokenAssembler::new(statement_separator);
        assembler.add(tokenizer.tokenize(b"a = 1\n", 0, &mut tokens));
        assembler.add(tokenizer.tokenize(b"b = 2\n", 6, &mut tokens));
        assembler.assemble(&mut tokens);
        assert_eq!(texts(&tokens), vec!["a = 1\n", "b = 2\n"]);
    }

    #[test]
    fn parallel_driver_matches_single_pass() {
        let pool = rayon::ThreadPoolBuilder::new().num_threads(4).build().unwrap();
        let source = MemorySource::new("build.ninja", NINJA);
        for chunk_size in [1, 5, 13, 64, 4096] {
            let tokens = tokenize(&pool, &source, 0, chunk_size, statement_separator).unwrap();
            assert_eq!(tokens, single_pass(NINJA), "chunk size: {chunk_size}");
        }
    }

    #[test]
    fn parallel_driver_starts_mid_file() {
        let pool = rayon::ThreadPoolBuilder::new().num_threads(2).build().unwrap();
        let source = MemorySource::new("build.ninja", NINJA);
        let start = NINJA.windows(5).position(|w| w == b"build").unwrap() as u64;
        let tokens = tokenize(&pool, &source, start, 8, statement_separator).unwrap();
        assert_eq!(tokens.first().map(|t| t.offset), Some(start));
        assert_eq!(texts(&tokens), vec![
            "build a.o: cc a.c\n",
            "build b.o: cc b.c\n  cflags = -O2\n",
            "default a.o\n",
        ]);
    }

    struct BrokenSource {
        bytes: MemorySource,
        broken_chunk: u64,
    }

    impl ByteSource for BrokenSource {
        fn path(&self) -> &str {
            self.bytes.path()
        }

        fn len(&self) -> u64 {
            self.bytes.len()
        }

        fn read_at(&self, offset: u64, len: usize) -> io::Result::<Vec::<u8>> {
            if offset == self.broken_chunk {
                return Err(io::Error::new(io::ErrorKind::Other, "device lost"))
            }
            self.bytes.read_at(offset, len)
        }
    }

    #[test]
    fn failed_read_aborts_every_chunk() {
        let pool = rayon::ThreadPoolBuilder::new().num_threads(4).build().unwrap();
        let source = BrokenSource { bytes: MemorySource::new("build.ninja", NINJA), broken_chunk: 24 };
        match tokenize(&pool, &source, 0, 8, statement_separator) {
            Err(Error::Io { path, source }) => {
                assert_eq!(path, "build.ninja");
                assert_eq!(source.kind(), io::ErrorKind::Other);
            }
            other => panic!("expected an io error, got {other:?}")
        }

        // the broken offset is never a chunk start
        assert!(tokenize(&pool, &source, 0, 7, statement_separator).is_ok());
    }
}

use crate::error::{Error, Result};

use std::io;
use std::sync::Arc;
use std::fs::File;
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use fxhash::FxHashMap;

/// Random-access, read-only bytes of one ninja file.
pub trait ByteSource: Send + Sync {
    fn path(&self) -> &str;

    fn len(&self) -> u64;

    /// Reads at most `len` bytes starting at `offset`, clamped to the end of the source.
    fn read_at(&self, offset: u64, len: usize) -> io::Result::<Vec::<u8>>;

    #[inline(always)]
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[inline]
fn clamp_range(offset: u64, len: usize, total: u64) -> io::Result::<(usize, usize)> {
    if offset > total {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("read at {offset} past the end of a {total} bytes source")
        ))
    }
    let start = offset as usize;
    let end = (offset + len as u64).min(total) as usize;
    Ok((start, end))
}

pub struct MmapSource {
    path: String,
    mmap: Option::<Mmap>,
}

impl MmapSource {
    pub fn open(path: impl AsRef::<Path>) -> io::Result::<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        // zero-length mappings are rejected by some platforms
        let mmap = if file.metadata()?.len() == 0 {
            None
        } else {
            Some(unsafe { Mmap::map(&file) }?)
        };
        Ok(Self { path: path.to_string_lossy().into_owned(), mmap })
    }

    #[inline(always)]
    fn bytes(&self) -> &[u8] {
        self.mmap.as_deref().unwrap_or_default()
    }
}

impl ByteSource for MmapSource {
    #[inline(always)]
    fn path(&self) -> &str {
        &self.path
    }

    #[inline(always)]
    fn len(&self) -> u64 {
        self.bytes().len() as _
    }

    #[inline]
    fn read_at(&self, offset: u64, len: usize) -> io::Result::<Vec::<u8>> {
        let (start, end) = clamp_range(offset, len, self.len())?;
        Ok(self.bytes()[start..end].to_vec())
    }
}

#[derive(Clone)]
pub struct MemorySource {
    path: String,
    bytes: Arc::<[u8]>,
}

impl MemorySource {
    #[inline]
    pub fn new(path: impl Into::<String>, bytes: impl Into::<Arc::<[u8]>>) -> Self {
        Self { path: path.into(), bytes: bytes.into() }
    }
}

impl ByteSource for MemorySource {
    #[inline(always)]
    fn path(&self) -> &str {
        &self.path
    }

    #[inline(always)]
    fn len(&self) -> u64 {
        self.bytes.len() as _
    }

    #[inline]
    fn read_at(&self, offset: u64, len: usize) -> io::Result::<Vec::<u8>> {
        let (start, end) = clamp_range(offset, len, self.len())?;
        Ok(self.bytes[start..end].to_vec())
    }
}

/// Contiguous byte range of a file assigned to one tokenizer task.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Chunk {
    pub offset: u64,
    pub length: u32,
    pub sequence: u32,
}

impl Chunk {
    #[inline(always)]
    pub fn end(&self) -> u64 {
        self.offset + self.length as u64
    }
}

/// Splits `[start, end)` into consecutive chunks of at most `chunk_size` bytes.
#[derive(Clone, Debug)]
pub struct ChunkPlan {
    next: u64,
    end: u64,
    sequence: u32,
    chunk_size: u32,
}

impl ChunkPlan {
    #[inline]
    pub fn new(start: u64, end: u64, chunk_size: u32) -> Self {
        Self { next: start, end, sequence: 0, chunk_size: chunk_size.max(1) }
    }
}

impl Iterator for ChunkPlan {
    type Item = Chunk;

    #[inline]
    fn next(&mut self) -> Option::<Chunk> {
        if self.next >= self.end { return None }

        let length = (self.end - self.next).min(self.chunk_size as u64) as u32;
        let chunk = Chunk { offset: self.next, length, sequence: self.sequence };
        self.next += length as u64;
        self.sequence += 1;
        Some(chunk)
    }
}

/// Maps the root file and `include`/`subninja` paths onto byte sources.
pub trait SourceResolver: Sync {
    type Source: ByteSource;

    /// `including` is the path of the file the statement was found in, `None` for the root file.
    fn resolve(&self, path: &str, including: Option::<&str>) -> Result::<Self::Source>;
}

/// Opens files from disk. Included paths are taken relative to `base`,
/// the directory ninja runs in, and may not be absolute.
#[derive(Clone, Debug)]
pub struct FsResolver {
    base: PathBuf,
}

impl FsResolver {
    #[inline]
    pub fn new(base: impl Into::<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// Resolver rooted at the directory containing `root_file`.
    #[inline]
    pub fn for_root_file(root_file: impl AsRef::<Path>) -> Self {
        let base = root_file.as_ref()
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Self::new(base)
    }
}

impl SourceResolver for FsResolver {
    type Source = MmapSource;

    fn resolve(&self, path: &str, including: Option::<&str>) -> Result::<MmapSource> {
        let p = Path::new(path);
        let full = match including {
            None => p.to_path_buf(),
            Some(..) if p.is_absolute() => {
                let e = io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "absolute paths can not be included"
                );
                return Err(Error::io(path, e))
            }
            Some(..) => self.base.join(p)
        };
        MmapSource::open(&full).map_err(|e| Error::io(full.to_string_lossy(), e))
    }
}

/// In-memory file set, keyed by the exact path used in statements.
#[derive(Clone, Default)]
pub struct MemoryResolver {
    files: FxHashMap::<String, Arc::<[u8]>>,
}

impl MemoryResolver {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn insert(&mut self, path: impl Into::<String>, content: impl AsRef::<[u8]>) -> &mut Self {
        self.files.insert(path.into(), Arc::from(content.as_ref()));
        self
    }

    #[inline]
    pub fn with(mut self, path: impl Into::<String>, content: impl AsRef::<[u8]>) -> Self {
        self.insert(path, content);
        self
    }
}

impl SourceResolver for MemoryResolver {
    type Source = MemorySource;

    #[inline]
    fn resolve(&self, path: &str, _including: Option::<&str>) -> Result::<MemorySource> {
        match self.files.get(path) {
            Some(bytes) => Ok(MemorySource::new(path, Arc::clone(bytes))),
            None => Err(Error::io(path, io::Error::from(io::ErrorKind::NotFound)))
        }
    }
}

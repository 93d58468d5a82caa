use crate::consts::syntax::*;
use crate::source::ByteSource;
use crate::line::{Line, LineDecoder};
use crate::error::{Error, Result};

#[cfg(feature = "dbg")]
use tramer::tramer;

/// Where the targets region of a file begins.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Resume {
    /// Start of the header block the first body line was read from.
    pub chunk_offset: u64,
    /// Offset of that line within the block.
    pub line_offset: u64,
    /// Row of that line.
    pub row: u32,
}

impl Resume {
    #[inline(always)]
    pub fn absolute(&self) -> u64 {
        self.chunk_offset + self.line_offset
    }
}

/// Leading regions of a ninja file: variables first, then rules and pools.
#[derive(Debug, Default)]
pub struct Header {
    pub includes: Vec::<Line>,
    pub variables: Vec::<Line>,
    pub rules: Vec::<Line>,
    pub resume: Resume,
}

#[inline]
fn starts_with_keyword(text: &str, keyword: &str) -> bool {
    text.strip_prefix(keyword).map_or(false, |rest| {
        rest.is_empty() || rest.starts_with([' ', '\t'])
    })
}

#[inline]
fn is_include(line: &Line) -> bool {
    starts_with_keyword(&line.text, INCLUDE) || starts_with_keyword(&line.text, SUBNINJA)
}

#[inline]
fn is_variables_line(line: &Line) -> bool {
    ![RULE, BUILD, DEFAULT, POOL].iter().any(|kw| starts_with_keyword(&line.text, kw))
}

#[inline]
fn is_rules_line(line: &Line) -> bool {
    starts_with_keyword(&line.text, RULE)
        || starts_with_keyword(&line.text, POOL)
        || line.is_indented()
        || line.is_blank()
        || line.is_comment()
}

#[derive(Copy, Clone, PartialEq, Eq)]
enum Region {
    Variables,
    Rules,
}

#[derive(Copy, Clone)]
struct State {
    region: Region,
    /// Last statement line was an include: indented lines belong to it.
    after_include: bool,
}

/// Reads a file from its start in `block`-sized reads, classifying lines until the first
/// one that belongs to neither region. Never fails on content.
#[derive(Copy, Clone, Debug)]
pub struct HeaderSplitter {
    block: usize,
}

impl HeaderSplitter {
    #[inline]
    pub fn new(block: usize) -> Self {
        Self { block: block.max(1) }
    }

    #[inline]
    fn resume_at(&self, line: &Line) -> Resume {
        let block = self.block as u64;
        let chunk_offset = line.loc.offset / block * block;
        Resume {
            chunk_offset,
            line_offset: line.loc.offset - chunk_offset,
            row: line.loc.row,
        }
    }

    /// Classifies `line`, returns `false` once the header is over.
    #[inline]
    fn take(&self, line: Line, state: &mut State, header: &mut Header) -> bool {
        if is_include(&line) {
            header.includes.push(line);
            state.after_include = true;
            return true
        }

        if state.after_include {
            if line.is_indented() || line.is_blank() || line.is_comment() {
                header.includes.push(line);
                return true
            }
            state.after_include = false
        }

        if state.region == Region::Variables {
            if is_variables_line(&line) {
                header.variables.push(line);
                return true
            }
            state.region = Region::Rules
        }

        if is_rules_line(&line) {
            header.rules.push(line);
            return true
        }

        header.resume = self.resume_at(&line);
        false
    }

    #[cfg_attr(feature = "dbg", tramer("millis"))]
    pub fn split<S>(&self, source: &S) -> Result::<Header>
    where
        S: ByteSource + ?Sized
    {
        let mut header = Header::default();
        let mut state = State { region: Region::Variables, after_include: false };
        let mut decoder = LineDecoder::new(0, 1);

        let len = source.len();
        let mut offset = 0;
        while offset < len {
            let bytes = source.read_at(offset, self.block).map_err(|e| Error::io(source.path(), e))?;
            if bytes.is_empty() { break }
            offset += bytes.len() as u64;

            for line in decoder.append(&bytes) {
                if !self.take(line, &mut state, &mut header) {
                    return Ok(header)
                }
            }
        }

        let (end, row) = (decoder.offset(), decoder.row());
        if let Some(line) = decoder.finish() {
            if !self.take(line, &mut state, &mut header) {
                return Ok(header)
            }
        }

        let block = self.block as u64;
        header.resume = Resume {
            chunk_offset: end / block * block,
            line_offset: end % block,
            row,
        };
        Ok(header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;

    fn split(text: &str, block: usize) -> Header {
        let source = MemorySource::new("build.ninja", text.as_bytes());
        HeaderSplitter::new(block).split(&source).unwrap()
    }

    fn texts(lines: &[Line]) -> Vec::<&str> {
        lines.iter().map(|l| l.text.as_str()).collect()
    }

    const FILE: &str = "\
# build.ninja
cc     = clang
cflags = -Weverything

rule compile
  command = $cc $cflags -c $in -o$
 $out

pool link_pool
  depth = 4

rule link
  command = $cc $in -o $out
  pool = link_pool

build hello.o: compile hello.c
build hello: link hello.o

default hello
";

    #[test]
    fn file_header() {
        for block in [1, 7, 64, 10 * 1024] {
            let header = split(FILE, block);
            assert_eq!(texts(&header.variables), [
                "# build.ninja",
                "cc     = clang",
                "cflags = -Weverything",
                "",
            ]);
            assert_eq!(texts(&header.rules), [
                "rule compile",
                "  command = $cc $cflags -c $in -o $out",
                "",
                "pool link_pool",
                "  depth = 4",
                "",
                "rule link",
                "  command = $cc $in -o $out",
                "  pool = link_pool",
                "",
            ]);

            let body = FILE.find("build hello.o").unwrap() as u64;
            assert_eq!(header.resume.absolute(), body, "block: {block}");
            assert_eq!(header.resume.chunk_offset % block as u64, 0);
            assert!(header.resume.line_offset < block as u64);
            assert_eq!(header.resume.row, 16);
        }
    }

    #[test]
    fn empty_header() {
        let header = split("", 16);
        assert!(header.variables.is_empty());
        assert!(header.rules.is_empty());
        assert_eq!(header.resume.absolute(), 0);
    }

    #[test]
    fn empty_vars() {
        let header = split("rule compile\n  command = $cc\n\nrule link\n  command = $cc $in\n\nbuild a: link b\n", 8);
        assert!(header.variables.is_empty());
        assert_eq!(texts(&header.rules), ["rule compile", "  command = $cc", "", "rule link", "  command = $cc $in", ""]);
    }

    #[test]
    fn empty_rules() {
        let text = "# build.ninja\ncc = clang\n\nbuild hello.o: compile hello.c\n\ndefault hello\n";
        let header = split(text, 10 * 1024);
        assert_eq!(texts(&header.variables), ["# build.ninja", "cc = clang", ""]);
        assert!(header.rules.is_empty());
        assert_eq!(header.resume.absolute(), text.find("build").unwrap() as u64);
        assert_eq!(header.resume.row, 4);
    }

    #[test]
    fn includes_are_collected_from_any_region() {
        let text = "include a.ninja\nx = 1\nrule r\n  command = c\nsubninja b.ninja\nbuild o: r\ninclude c.ninja\n";
        let header = split(text, 5);
        assert_eq!(texts(&header.includes), ["include a.ninja", "subninja b.ninja"]);
        assert_eq!(texts(&header.variables), ["x = 1"]);
        assert_eq!(texts(&header.rules), ["rule r", "  command = c"]);
    }

    #[test]
    fn indented_lines_after_an_include_stay_with_it() {
        let text = "rule r\n  command = c\ninclude a.ninja\n\n  description = leaked\nbuild o: r\n";
        let header = split(text, 6);
        assert_eq!(texts(&header.rules), ["rule r", "  command = c"]);
        assert_eq!(texts(&header.includes), ["include a.ninja", "", "  description = leaked"]);
        assert_eq!(header.resume.absolute(), text.find("build").unwrap() as u64);

        let text = "x = 1\ninclude a.ninja\ny = 2\n";
        let header = split(text, 1024);
        assert_eq!(texts(&header.includes), ["include a.ninja"]);
        assert_eq!(texts(&header.variables), ["x = 1", "y = 2"]);
    }

    #[test]
    fn header_only_file_resumes_at_the_end() {
        let text = "a = 1\nrule r\n  command = c";
        let header = split(text, 4);
        assert_eq!(header.resume.absolute(), text.len() as u64);
        assert_eq!(header.rules.len(), 2);
    }

    #[test]
    fn variable_after_rules_ends_the_header() {
        let text = "rule r\n  command = c\nflags = -g\nbuild o: r\n";
        let header = split(text, 1024);
        assert_eq!(header.resume.absolute(), text.find("flags").unwrap() as u64);
        assert_eq!(header.resume.row, 3);
    }
}

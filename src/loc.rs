use std::fmt;

/// Position of a logical line: 1-based row of its first physical line
/// and absolute byte offset from the start of the file.
#[derive(Copy, Clone, Default, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Loc {
    pub row: u32,
    pub offset: u64,
}

impl Loc {
    #[inline(always)]
    pub const fn new(row: u32, offset: u64) -> Self {
        Self { row, offset }
    }
}

impl fmt::Display for Loc {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{row}", row = self.row)
    }
}

#[macro_export]
macro_rules! format_err {
    ($loc: expr, $($arg:tt)*) => {
        $crate::error::Error::Format {
            loc: $loc,
            message: std::fmt::format(format_args!($($arg)*))
        }
    };
}

pub mod syntax {
    pub const RULE: &str = "rule";
    pub const POOL: &str = "pool";
    pub const BUILD: &str = "build";
    pub const PHONY: &str = "phony";
    pub const DEFAULT: &str = "default";
    pub const INCLUDE: &str = "include";
    pub const SUBNINJA: &str = "subninja";

    pub const COMMENT: char = '#';
    pub const ESCAPE: u8 = b'$';

    pub const COLON: &str = ":";
    pub const PIPE: &str = "|";
    pub const PIPE2: &str = "||";
}

pub const DEFAULT_NINJA_FILE: &str = "build.ninja";

pub const DEFAULT_CHUNK_SIZE: u32 = 10 * 1024 * 1024;
pub const DEFAULT_HEADER_BLOCK: usize = 10 * 1024;

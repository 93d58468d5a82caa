use crate::config::Config;
use crate::consts::{DEFAULT_CHUNK_SIZE, DEFAULT_NINJA_FILE};
use crate::pipeline::Request;

use clap::{ArgAction, Parser};

#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// specify file path to the ninja file
    #[arg(short = 'f', long = "file", default_value = DEFAULT_NINJA_FILE)]
    pub file_path: String,

    /// only keep what is needed to build this output, may be repeated
    #[arg(short = 't', long = "target")]
    pub targets: Vec<String>,

    /// also keep what `default` statements name
    #[arg(short = 'd', long = "defaults", action = ArgAction::SetTrue)]
    pub defaults: bool,

    /// only keep what is needed to build this executable
    #[arg(short = 'e', long = "executable")]
    pub executable: Option<String>,

    /// amount of tokenizer threads
    #[arg(short = 'j', long = "jobs")]
    pub jobs: Option<usize>,

    /// size of the byte ranges a file is tokenized in
    #[arg(long = "chunk-size", default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: u32,

    /// list outputs only, without commands
    #[arg(short = 'l', long = "list", action = ArgAction::SetTrue)]
    pub list: bool,

    /// print what the pipeline does to stderr
    #[arg(short = 'v', long = "verbose", action = ArgAction::SetTrue)]
    pub verbose: bool,
}

impl Cli {
    pub fn config(&self) -> Config {
        let config = Config::default().with_chunk_size(self.chunk_size);
        match self.jobs {
            Some(jobs) => config.with_jobs(jobs),
            None => config
        }
    }

    pub fn request(&self) -> Request {
        Request {
            outputs: self.targets.clone(),
            use_defaults: self.defaults,
            executable: self.executable.clone(),
        }
    }
}

use kunai::cli::Cli;
use kunai::{FsResolver, Pipeline, ResolvedTarget, TargetSink};

use std::io::{self, BufWriter, Write};
use std::process::ExitCode;

use clap::Parser;
use tracing::Level;
use tracing_subscriber::fmt;

struct Printer<W: Write> {
    out: W,
    list: bool,
    result: io::Result::<()>,
}

impl<W: Write> Printer<W> {
    #[inline]
    fn write(&mut self, args: std::fmt::Arguments) {
        if self.result.is_ok() {
            self.result = self.out.write_fmt(args)
        }
    }
}

impl<W: Write> TargetSink for Printer<W> {
    fn target(&mut self, target: &ResolvedTarget) {
        let outputs = target.outputs.iter().map(String::as_str).collect::<Vec::<_>>().join(" ");
        if self.list {
            self.write(format_args!("{outputs}\n"))
        } else {
            self.write(format_args!("{outputs}: {command}\n", command = target.command))
        }
    }

    fn defaults(&mut self, names: &[String]) {
        if self.list || names.is_empty() { return }
        self.write(format_args!("default: {names}\n", names = names.join(" ")))
    }

    fn unresolved(&mut self, name: &str) {
        self.write(format_args!("unresolved: {name}\n"))
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let max_level = if cli.verbose { Level::DEBUG } else { Level::WARN };
    fmt().with_max_level(max_level).with_writer(io::stderr).init();

    let resolver = FsResolver::for_root_file(&cli.file_path);
    let graph = Pipeline::new(cli.config(), resolver)
        .and_then(|pipeline| pipeline.load(&cli.file_path))
        .and_then(|manifest| manifest.resolve(&cli.request()));

    let graph = match graph {
        Ok(ok) => ok,
        Err(e) => {
            eprintln!("kunai: error: {e}");
            return ExitCode::FAILURE
        }
    };

    let stdout = io::stdout();
    let mut printer = Printer {
        out: BufWriter::new(stdout.lock()),
        list: cli.list,
        result: Ok(()),
    };
    graph.deliver(&mut printer);

    if let Err(e) = printer.result.and_then(|_| printer.out.flush()) {
        eprintln!("kunai: could not write output: {e}");
        return ExitCode::FAILURE
    }

    ExitCode::SUCCESS
}

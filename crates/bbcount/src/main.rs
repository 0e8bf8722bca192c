// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Basic-block counter instrumentation CLI
//!
//! Reads one kernel's assembly, injects a counter update after every block
//! label, and writes the result to stdout.
//!
//! Usage:
//!     kernel-extract dump.s 3 | bb-instrument --counters 12 > kernel.s
//!     bb-instrument --dump dump.s --kernel 3 --counters 12 --manifest blocks.json

use std::{path::PathBuf, process::ExitCode};

use bbcount::{
    cli::{self, CliError, ConfigArgs},
    strip, Instrumenter, KernelDump, Manifest,
};
use clap::Parser;
use tracing::{debug, info};

#[derive(Debug, Parser)]
#[command(
    name = "bb-instrument",
    version,
    about = "Inject per-wavefront basic-block entry counters into AMDGCN kernel assembly"
)]
struct Args {
    /// Kernel assembly to instrument (`-` or absent for stdin)
    #[arg(value_name = "INPUT", conflicts_with = "dump")]
    input: Option<PathBuf>,

    /// Number of basic blocks the kernel is declared to have
    #[arg(
        short = 'k',
        long,
        value_name = "K",
        required_unless_present_any = ["list_blocks", "strip"]
    )]
    counters: Option<usize>,

    /// Multi-kernel dump to extract the kernel from
    #[arg(long, value_name = "FILE", requires = "kernel")]
    dump: Option<PathBuf>,

    /// Zero-based kernel index within --dump
    #[arg(long, value_name = "N", requires = "dump")]
    kernel: Option<usize>,

    /// Print the block table instead of instrumenting
    #[arg(long, conflicts_with = "strip")]
    list_blocks: bool,

    /// Remove previously injected counter updates
    #[arg(long, conflicts_with_all = ["manifest", "header"])]
    strip: bool,

    /// Write the block manifest as JSON
    #[arg(long, value_name = "PATH")]
    manifest: Option<PathBuf>,

    /// Write a C header describing the counter region
    #[arg(long, value_name = "PATH")]
    header: Option<PathBuf>,

    /// Log pipeline stages to stderr
    #[arg(short, long)]
    verbose: bool,

    #[command(flatten)]
    config: ConfigArgs,
}

fn main() -> ExitCode {
    let args = Args::parse();
    cli::init_logging(args.verbose);

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(err.exit_code())
        }
    }
}

fn run(args: &Args) -> Result<(), CliError> {
    let config = args.config.load()?;
    let instrumenter = Instrumenter::new(&config)?;

    let (source, kernel_name) = match (&args.dump, args.kernel) {
        (Some(dump), Some(index)) => {
            let text = cli::read_input(Some(dump.as_path()))?;
            let dump = KernelDump::scan(&text, instrumenter.grammar())?;
            let section = dump.kernel(index, instrumenter.grammar())?;
            info!(index, name = section.name, "kernel extracted");
            (section.text.to_string(), Some(section.name.to_string()))
        }
        _ => {
            let text = cli::read_input(args.input.as_deref())?;
            let name = single_kernel_name(&instrumenter, &text);
            (text, name)
        }
    };

    if args.strip {
        return cli::write_stdout(&strip(&source));
    }

    let (text, manifest) = match args.counters {
        Some(counters) if !args.list_blocks => {
            let instrumented = instrumenter.instrument(&source, counters)?;
            (Some(instrumented.text), instrumented.manifest)
        }
        _ => (None, instrumenter.survey(&source)?.manifest),
    };
    let manifest = match kernel_name {
        Some(name) => manifest.with_kernel(name),
        None => manifest,
    };

    if let Some(path) = &args.manifest {
        cli::write_file(path, &manifest.to_json()?)?;
        debug!(path = %path.display(), "manifest written");
    }
    if let Some(path) = &args.header {
        cli::write_file(path, &manifest.render_header())?;
        debug!(path = %path.display(), "header written");
    }

    match text {
        Some(text) => cli::write_stdout(&text),
        None => cli::write_stdout(&render_listing(&manifest)),
    }
}

/// The kernel name, when the input holds exactly one kernel marker.
fn single_kernel_name(instrumenter: &Instrumenter, text: &str) -> Option<String> {
    let dump = KernelDump::scan(text, instrumenter.grammar()).ok()?;
    let mut sections = dump.sections();
    match (sections.next(), sections.next()) {
        (Some(section), None) => Some(section.name.to_string()),
        _ => None,
    }
}

fn render_listing(manifest: &Manifest) -> String {
    match &manifest.kernel {
        Some(kernel) => format!("{kernel}: {} block(s)\n{}", manifest.counters, manifest.render_table()),
        None => format!("{} block(s)\n{}", manifest.counters, manifest.render_table()),
    }
}

// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Kernel extraction CLI
//!
//! Prints the N-th kernel (zero-based, in marker order) of a multi-kernel
//! assembly dump exactly as it appears in the dump.
//!
//! Usage:
//!     kernel-extract --list dump.s
//!     kernel-extract dump.s 3 > kernel.s

use std::{path::PathBuf, process::ExitCode};

use bbcount::{
    cli::{self, CliError, GrammarArgs},
    KernelDump,
};
use clap::Parser;

#[derive(Debug, Parser)]
#[command(
    name = "kernel-extract",
    version,
    about = "Extract one kernel from an AMDGCN assembly dump"
)]
struct Args {
    /// Assembly dump (`-` for stdin)
    #[arg(value_name = "DUMP")]
    dump: PathBuf,

    /// Zero-based index of the kernel to extract
    #[arg(value_name = "INDEX", required_unless_present = "list")]
    index: Option<usize>,

    /// List kernels as `index<TAB>name<TAB>line` instead of extracting
    #[arg(long, conflicts_with = "index")]
    list: bool,

    /// Log extraction details to stderr
    #[arg(short, long)]
    verbose: bool,

    #[command(flatten)]
    grammar: GrammarArgs,
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
    let grammar = args.grammar.load()?.grammar()?;
    let text = cli::read_input(Some(args.dump.as_path()))?;
    let dump = KernelDump::scan(&text, &grammar)?;

    match args.index {
        Some(index) => {
            let section = dump.kernel(index, &grammar)?;
            cli::write_stdout(section.text)
        }
        None => {
            let listing: String = dump
                .sections()
                .map(|section| {
                    format!(
                        "{}\t{}\t{}\n",
                        section.index, section.name, section.line_number
                    )
                })
                .collect();
            cli::write_stdout(&listing)
        }
    }
}

//! Executable for parsing persisted hardware error records.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation. All rights reserved.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!

use clap::Parser;
use std::{
    fs::File,
    io::{self, Read},
    path::{Path, PathBuf},
};

#[derive(Parser, Debug)]
struct Args {
    /// Path for the input file containing the raw contents of an HwErrRec variable.
    input_path: PathBuf,
    /// Optional path for the output file. If not specified, the output will be printed to stdout.
    #[arg(short, long)]
    output_path: Option<PathBuf>,
    /// Flag to skip the section contents and only print the record header.
    #[arg(long, default_value_t = false)]
    header_only: bool,
}

fn main() -> io::Result<()> {
    let args = Args::parse();

    let mut file = File::open(Path::new(&args.input_path))?;
    let mut buffer = Vec::new();
    file.read_to_end(&mut buffer)?;

    let parser = patina_whea::parser::Parser::open(&buffer).map_err(|e| {
        eprintln!("Error parsing record: {}", e);
        io::Error::new(io::ErrorKind::InvalidData, e)
    })?;

    // Write to standard out if no output file is specified.
    match args.output_path {
        Some(path) => {
            let mut out = File::create(path)?;
            write_record(args.header_only, &parser, &mut out)?;
        }
        None => write_record(args.header_only, &parser, &mut io::stdout())?,
    };

    Ok(())
}

fn write_record<W: std::io::Write>(
    header_only: bool,
    parser: &patina_whea::parser::Parser,
    out: &mut W,
) -> io::Result<()> {
    parser.write_header(out).map_err(|e| {
        eprintln!("Error writing record: {}", e);
        io::Error::other(e)
    })?;

    if !header_only {
        parser.write_sections(out).map_err(|e| {
            eprintln!("Error writing record: {}", e);
            io::Error::other(e)
        })?;
    }

    Ok(())
}

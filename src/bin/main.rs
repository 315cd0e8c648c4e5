use crate::builder::{BuilderError, LittleFsBuilder};
use crate::source::SubdirPolicy;

use anyhow::Result;
use clap::Parser;
use littlefs_image::{Geometry, DEFAULT_BLOCK_COUNT, DEFAULT_BLOCK_SIZE};
use std::path::PathBuf;
use std::process::ExitCode;

mod builder;
mod output;
mod source;


/// Build a LittleFS image from the files in a directory
#[derive(Parser, Debug)]
#[command(
    about,
    version,
    after_help = "Exit status: 0 success, 2 usage error, 3 source directory problem, \
                  4 image does not fit or codec error, 5 output not writable"
)]
struct Args {
    /// Directory with the files to pack
    #[arg(short = 'c', long = "source")]
    source: PathBuf,
    /// Image file name
    output: PathBuf,
    /// Erase block size in bytes
    #[arg(long, default_value_t = DEFAULT_BLOCK_SIZE)]
    block_size: usize,
    /// Number of erase blocks
    #[arg(long, default_value_t = DEFAULT_BLOCK_COUNT)]
    block_count: usize,
    /// How to handle directories inside the source directory
    #[arg(long, value_enum, default_value_t = SubdirPolicy::Reject)]
    subdirs: SubdirPolicy,
    /// Mount the finished image and compare it with the sources
    #[arg(long)]
    verify: bool,
}

fn main() -> ExitCode {
    pretty_env_logger::init();

    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::from(exit_code(&err))
        }
    }
}

fn exit_code(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<BuilderError>()
        .map_or(1, BuilderError::exit_code)
}

fn run(args: &Args) -> Result<()> {
    log::debug!("{args:?}");

    let geometry =
        Geometry::new(args.block_size, args.block_count).map_err(BuilderError::Geometry)?;
    let entries = source::collect(&args.source, args.subdirs)?;

    let mut builder = LittleFsBuilder::new(geometry)?;
    for entry in &entries {
        println!("Adding {}", entry.volume_path);
        builder.add_entry(entry)?;
    }

    let bytes = builder.finalize()?;
    if args.verify {
        builder::verify(geometry, &bytes, &entries)?;
    }

    println!(
        "Writing image to {}, size {} bytes",
        args.output.display(),
        bytes.len()
    );
    output::write_image(&args.output, &bytes)?;

    Ok(())
}

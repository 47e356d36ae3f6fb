use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use fsverity_digest::{digest_files, OutputFormat, TreeOptions, TreeParameters};
use tracing_subscriber::EnvFilter;

/// Compute the fs-verity measurement of the given file(s), for offline signing.
#[derive(Parser, Debug)]
#[command(name = "fsverity-digest", version)]
struct Args {
    /// Merkle tree hash algorithm (sha256 or sha512)
    #[arg(long = "hash-alg", value_name = "NAME")]
    hash_alg: Option<String>,

    /// Merkle tree block size in bytes
    #[arg(long, value_name = "SIZE")]
    block_size: Option<String>,

    /// Salt to mix into every hash, as hex
    #[arg(long, value_name = "HEX")]
    salt: Option<String>,

    /// Print only the hex digest, without algorithm name or file name
    #[arg(long)]
    compact: bool,

    /// Print the digest formatted for the kernel's builtin signature support
    #[arg(long)]
    for_builtin_sig: bool,

    /// Files to measure
    #[arg(value_name = "FILE", required = true)]
    files: Vec<PathBuf>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();

    let options = TreeOptions {
        hash_alg: args.hash_alg,
        block_size: args.block_size,
        salt: args.salt,
    };
    let params = match TreeParameters::resolve(&options) {
        Ok(params) => params,
        Err(e) => Args::command().error(ErrorKind::InvalidValue, e).exit(),
    };
    let format = OutputFormat {
        compact: args.compact,
        for_builtin_sig: args.for_builtin_sig,
    };

    let stdout = io::stdout();
    match digest_files(&args.files, &params, format, &mut stdout.lock()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if e.is_usage() => Args::command().error(ErrorKind::MissingRequiredArgument, e).exit(),
        Err(e) => {
            match std::error::Error::source(&e) {
                Some(cause) => eprintln!("ERROR: {}: {}", e, cause),
                None => eprintln!("ERROR: {}", e),
            }
            ExitCode::from(e.exit_code())
        }
    }
}

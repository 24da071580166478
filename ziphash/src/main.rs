use anyhow::{Result, anyhow};
use clap::Parser;
use common::{AllowList, ExecutionLock, HashAlgorithm, LockConfig, RunConfiguration};
use tracing::instrument;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "ziphash",
    version,
    about = "Zip every subdirectory, hash the archives and optionally copy or move the sources",
    long_about = "`ziphash` archives each immediate subdirectory of SRC into DST/<name>.zip, writes the \
digest of every archive to DST/hashes.txt and prints the digest of hashes.txt as the run's \
fingerprint. Only one instance runs at a time per lock file.

EXAMPLE:
    # Archive only allowed files, skip empty archives, then move the sources after confirming
    ziphash /data/incoming /data/archive --fzip --fmpt --mv

Note: --mv clears the source subdirectories once the move is confirmed. Use --unsafe with care."
)]
struct Args {
    // Pipeline options
    /// Ask for a subdirectory name and write results into DST/<name> (and CPY/<name>)
    #[arg(long = "sub", help_heading = "Pipeline options")]
    named_subdirectory: bool,

    /// Hash algorithm used for the archives and the manifest
    #[arg(
        long = "hash",
        value_enum,
        value_name = "ALG",
        default_value_t = HashAlgorithm::default(),
        help_heading = "Pipeline options"
    )]
    algorithm: HashAlgorithm,

    /// Copy the sources into the destination and clear the source subdirectories
    #[arg(long = "mv", help_heading = "Pipeline options")]
    move_after: bool,

    /// Also replicate the results and the sources into this directory
    #[arg(long = "cpy", value_name = "PATH", help_heading = "Pipeline options")]
    copy_to: Option<std::path::PathBuf>,

    /// Do not ask for confirmation before clearing the sources
    #[arg(long = "unsafe", help_heading = "Pipeline options")]
    skip_confirmation: bool,

    /// Wait for ENTER before exiting
    #[arg(long, help_heading = "Pipeline options")]
    pause: bool,

    // Filtering
    /// Only archive files with an allowed extension
    #[arg(long = "fzip", help_heading = "Filtering")]
    filter_archive: bool,

    /// Only copy source files with an allowed extension
    #[arg(long = "fcpy", help_heading = "Filtering")]
    filter_copy: bool,

    /// Only move source files with an allowed extension
    #[arg(long = "fmv", help_heading = "Filtering")]
    filter_move: bool,

    /// Do not write archives for subdirectories without qualifying files
    #[arg(long = "fmpt", help_heading = "Filtering")]
    prune_empty: bool,

    // Locking
    /// Lock file guarding against concurrent runs [default: <temp dir>/ziphash.lock]
    #[arg(long, value_name = "PATH", help_heading = "Locking")]
    lock_file: Option<std::path::PathBuf>,

    /// How long to wait for a running instance before giving up (exit status 3)
    ///
    /// This option accepts a human readable duration, e.g. "30s", "5min" etc.
    #[arg(
        long,
        value_name = "DURATION",
        default_value = "5min",
        value_parser = humantime::parse_duration,
        help_heading = "Locking"
    )]
    lock_timeout: std::time::Duration,

    // Progress & output
    /// Verbose level: -v DEBUG / -vv TRACE (default: INFO)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, help_heading = "Progress & output")]
    verbose: u8,

    /// Print summary at the end
    #[arg(long, help_heading = "Progress & output")]
    summary: bool,

    /// Quiet mode, only report errors
    #[arg(short = 'q', long = "quiet", help_heading = "Progress & output")]
    quiet: bool,

    /// Also append log records, with timestamps and the operator name, to this file
    #[arg(long, value_name = "PATH", help_heading = "Progress & output")]
    log_file: Option<std::path::PathBuf>,

    // ARGUMENTS
    /// Directory whose subdirectories are archived
    #[arg()]
    src: std::path::PathBuf,

    /// Directory receiving the archives and hashes.txt
    #[arg()]
    dst: std::path::PathBuf,
}

#[instrument(skip(args), fields(src = ?args.src, dst = ?args.dst))]
async fn async_main(args: Args) -> Result<common::pipeline::Summary> {
    let lock_path = args
        .lock_file
        .clone()
        .unwrap_or_else(LockConfig::default_path);
    let mut lock_config = LockConfig::new(lock_path);
    lock_config.max_wait = args.lock_timeout;
    let _lock = ExecutionLock::acquire_or_exit(&lock_config).await?;
    let config = RunConfiguration {
        source: args.src.clone(),
        destination: args.dst.clone(),
        copy_to: args.copy_to.clone(),
        named_subdirectory: args.named_subdirectory,
        move_after: args.move_after,
        filter_archive: args.filter_archive,
        filter_copy: args.filter_copy,
        filter_move: args.filter_move,
        prune_empty: args.prune_empty,
        require_confirmation: !args.skip_confirmation,
        pause_on_exit: args.pause,
        algorithm: args.algorithm,
    };
    let mut prompt = common::prompt::StdinPrompt;
    match common::pipeline::run(&config, &AllowList::default(), &mut prompt).await {
        Ok(summary) => {
            if let Some(fingerprint) = &summary.fingerprint {
                println!("{fingerprint}");
            }
            Ok(summary)
        }
        Err(error) => {
            if args.summary {
                return Err(anyhow!("{}\n\n{}", error, &error.summary));
            }
            Err(anyhow!("{}", error))
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let func = {
        let args = args.clone();
        || async_main(args)
    };
    let output = common::OutputConfig {
        quiet: args.quiet,
        verbose: args.verbose,
        print_summary: args.summary,
    };
    let tracing = common::TracingConfig {
        log_file: args.log_file.clone(),
    };
    let res = common::run(&output, &tracing, func)?;
    if res.is_none() {
        std::process::exit(1);
    }
    Ok(())
}

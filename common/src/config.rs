//! Configuration types for a pipeline run and its output

use std::path::PathBuf;

use crate::hash::HashAlgorithm;

/// Everything a single pipeline run needs, fixed once the command line is parsed
#[derive(Debug, Clone)]
pub struct RunConfiguration {
    /// Directory whose immediate subdirectories are archived
    pub source: PathBuf,
    /// Root under which archives and the manifest are written
    pub destination: PathBuf,
    /// Optional root receiving a replica of the results and the sources
    pub copy_to: Option<PathBuf>,
    /// Ask the operator for a subdirectory name below `destination`
    pub named_subdirectory: bool,
    /// Copy sources into the output directory and then clear them
    pub move_after: bool,
    /// Only archive files with an allowed suffix
    pub filter_archive: bool,
    /// Only replicate source files with an allowed suffix
    pub filter_copy: bool,
    /// Only move source files with an allowed suffix
    pub filter_move: bool,
    /// Skip archives and directories left without qualifying files
    pub prune_empty: bool,
    /// Ask for confirmation before clearing sources
    pub require_confirmation: bool,
    /// Wait for ENTER before returning
    pub pause_on_exit: bool,
    pub algorithm: HashAlgorithm,
}

impl RunConfiguration {
    /// Configuration with every optional step disabled and confirmation required.
    #[must_use]
    pub fn new(source: PathBuf, destination: PathBuf) -> Self {
        Self {
            source,
            destination,
            copy_to: None,
            named_subdirectory: false,
            move_after: false,
            filter_archive: false,
            filter_copy: false,
            filter_move: false,
            prune_empty: false,
            require_confirmation: true,
            pause_on_exit: false,
            algorithm: HashAlgorithm::default(),
        }
    }
}

/// Output and logging configuration
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputConfig {
    /// Only report errors
    pub quiet: bool,
    /// Verbosity level: 0=INFO, 1=DEBUG, 2+=TRACE
    pub verbose: u8,
    /// Print summary statistics at the end
    pub print_summary: bool,
}

impl OutputConfig {
    /// Default filter directive for the console and log file.
    #[must_use]
    pub fn level(&self) -> tracing::Level {
        if self.quiet {
            return tracing::Level::ERROR;
        }
        match self.verbose {
            0 => tracing::Level::INFO,
            1 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        }
    }
}

/// Where log records go besides the console
#[derive(Debug, Clone, Default)]
pub struct TracingConfig {
    /// Append records to this file, with timestamps and the operator name
    pub log_file: Option<PathBuf>,
}

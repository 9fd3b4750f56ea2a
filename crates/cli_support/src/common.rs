use clap::Args;
use tracing_subscriber::EnvFilter;

/// Verbosity flags shared by the training binaries.
#[derive(Debug, Clone, Default, Args)]
pub struct LoggingArgs {
    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
    /// Only log errors.
    #[arg(short = 'q', long = "quiet", default_value_t = false, global = true)]
    pub quiet: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoggingOpts {
    pub verbose: u8,
    pub quiet: bool,
}

impl LoggingOpts {
    pub fn new(verbose: u8, quiet: bool) -> Self {
        Self { verbose, quiet }
    }

    /// Default directive when `RUST_LOG` is unset.
    pub fn default_directive(&self) -> &'static str {
        match self.verbose {
            0 if self.quiet => "error",
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

impl From<&LoggingArgs> for LoggingOpts {
    fn from(args: &LoggingArgs) -> Self {
        LoggingOpts::new(args.verbose, args.quiet)
    }
}

/// Install the stderr fmt subscriber. `RUST_LOG` wins over the flags.
/// Safe to call more than once; later calls are ignored.
pub fn init_tracing(opts: impl Into<LoggingOpts>) {
    let opts = opts.into();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(opts.default_directive()));
    if tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok()
    {
        tracing::debug!(directive = opts.default_directive(), "logging initialised");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directive_follows_flags() {
        assert_eq!(LoggingOpts::new(0, false).default_directive(), "info");
        assert_eq!(LoggingOpts::new(0, true).default_directive(), "error");
        assert_eq!(LoggingOpts::new(1, true).default_directive(), "debug");
        assert_eq!(LoggingOpts::new(5, false).default_directive(), "trace");
    }
}

//! CLI argument parsing for agents.

use std::path::PathBuf;

use clap::Parser;

/// Common CLI arguments for LineSight agents.
#[derive(Parser, Debug, Clone)]
#[command(about = "LineSight production-line agent")]
#[command(version)]
pub struct BridgeArgs {
    /// Path to configuration file (JSON5 format).
    #[arg(short, long)]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    pub log_level: Option<String>,
}

impl BridgeArgs {
    /// Parse CLI arguments, falling back to `default_config` when
    /// `--config` is omitted.
    pub fn parse_with_default(default_config: &'static str) -> Self {
        Self::parse_from_with_default(std::env::args_os(), default_config)
    }

    /// Same as [`parse_with_default`](Self::parse_with_default) over an explicit
    /// argument list. Exits the process with clap's usage message on error.
    pub fn parse_from_with_default<I, T>(args: I, default_config: &'static str) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let matches = <Self as clap::CommandFactory>::command()
            .mut_arg("config", |arg| arg.default_value(default_config))
            .get_matches_from(args);

        <Self as clap::FromArgMatches>::from_arg_matches(&matches).unwrap_or_else(|e| e.exit())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_path() {
        let args = BridgeArgs::parse_from_with_default(["agent"], "linesight.json5");
        assert_eq!(args.config, PathBuf::from("linesight.json5"));
        assert_eq!(args.log_level, None);
    }

    #[test]
    fn test_explicit_arguments() {
        let args = BridgeArgs::parse_from_with_default(
            ["agent", "--config", "plant.json5", "--log-level", "debug"],
            "linesight.json5",
        );
        assert_eq!(args.config, PathBuf::from("plant.json5"));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
    }
}

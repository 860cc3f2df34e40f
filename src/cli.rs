use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mpegfs")]
#[command(author, version, about = "Mount video as low-bandwidth MPEG-1 streams")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Mount a transcoding mirror of SOURCE_DIR, or a search tree if only
    /// TARGET_DIR is given
    Mount {
        /// [SOURCE_DIR] TARGET_DIR
        #[arg(required = true, num_args = 1..=2, value_name = "DIR")]
        dirs: Vec<PathBuf>,

        /// Enable debug output (implies debug logging)
        #[arg(short, long)]
        debug: bool,

        /// Run in the foreground instead of daemonizing
        #[arg(short, long)]
        foreground: bool,

        /// Create search directories on navigation, without explicit mkdir
        #[arg(long)]
        create_on_navigation: bool,
    },

    /// Run a search and print the results
    Search {
        /// Search phrase
        #[arg(required = true, num_args = 1..)]
        phrase: Vec<String>,

        /// Maximum number of results (defaults to remote.search_results)
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check that required external tools are available
    CheckTools,

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}

impl Commands {
    /// Whether this command asks for debug output on its own.
    pub fn debug(&self) -> bool {
        matches!(self, Commands::Mount { debug: true, .. })
    }

    /// Whether `mount` stays attached to the terminal. Debug output implies it.
    pub fn foreground(&self) -> bool {
        matches!(
            self,
            Commands::Mount { foreground: true, .. } | Commands::Mount { debug: true, .. }
        )
    }
}

/// Split `mount`'s positional arguments into source and target.
pub fn split_dirs(mut dirs: Vec<PathBuf>) -> Option<(Option<PathBuf>, PathBuf)> {
    let target = dirs.pop()?;
    let source = dirs.pop();
    dirs.is_empty().then_some((source, target))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mount_with_source_and_target() {
        let cli = Cli::try_parse_from(["mpegfs", "mount", "/media", "/mnt/v", "-f"]).unwrap();
        let Commands::Mount {
            dirs, foreground, ..
        } = cli.command
        else {
            panic!("expected mount");
        };
        assert!(foreground);
        assert_eq!(
            split_dirs(dirs),
            Some((Some(PathBuf::from("/media")), PathBuf::from("/mnt/v")))
        );
    }

    #[test]
    fn mount_debug_implies_foreground() {
        let cli = Cli::try_parse_from(["mpegfs", "mount", "/mnt/v", "--debug"]).unwrap();
        assert!(cli.command.debug());
        assert!(cli.command.foreground());

        let cli = Cli::try_parse_from(["mpegfs", "mount", "/mnt/v"]).unwrap();
        assert!(!cli.command.foreground());
    }

    #[test]
    fn mount_target_only_is_search_mode() {
        let cli = Cli::try_parse_from([
            "mpegfs",
            "mount",
            "/mnt/yt",
            "--create-on-navigation",
            "--debug",
        ])
        .unwrap();
        assert!(cli.command.debug());
        let Commands::Mount {
            dirs,
            create_on_navigation,
            ..
        } = cli.command
        else {
            panic!("expected mount");
        };
        assert!(create_on_navigation);
        assert_eq!(split_dirs(dirs), Some((None, PathBuf::from("/mnt/yt"))));
    }

    #[test]
    fn mount_rejects_three_dirs() {
        assert!(Cli::try_parse_from(["mpegfs", "mount", "/a", "/b", "/c"]).is_err());
        assert!(Cli::try_parse_from(["mpegfs", "mount"]).is_err());
    }

    #[test]
    fn search_joins_words_later() {
        let cli = Cli::try_parse_from(["mpegfs", "search", "funny", "cats", "-l", "3"]).unwrap();
        let Commands::Search { phrase, limit, .. } = cli.command else {
            panic!("expected search");
        };
        assert_eq!(phrase, vec!["funny", "cats"]);
        assert_eq!(limit, Some(3));
    }
}

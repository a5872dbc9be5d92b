//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Batch download and organize a topic library of EPUBs.
///
/// `discover` enumerates the books behind each skill in your skills list;
/// `download` assembles each discovered book into an EPUB library organized
/// by skill.
#[derive(Parser, Debug)]
#[command(name = "skillshelf")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file (JSON, overrides defaults field by field)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Enumerate book identifiers for each skill and write per-skill
    /// result files
    Discover {
        /// Only discover skills whose name contains one of these values
        #[arg(short, long, num_args = 1..)]
        skills: Vec<String>,

        /// Concurrent discovery workers (1-10)
        #[arg(short, long, value_parser = clap::value_parser!(u8).range(1..=10))]
        workers: Option<u8>,

        /// Maximum search pages fetched per skill (1-500)
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..=500))]
        max_pages: Option<u32>,

        /// Re-discover skills whose result file already exists
        #[arg(short, long)]
        update: bool,

        /// List what would be discovered without issuing requests
        #[arg(long)]
        dry_run: bool,
    },

    /// Download every discovered book and assemble EPUB files
    Download {
        /// Only download skills whose name contains one of these values
        #[arg(short, long, num_args = 1..)]
        skills: Vec<String>,

        /// Per-skill cap on books downloaded
        #[arg(long)]
        max_books: Option<usize>,

        /// Output variant set
        #[arg(short, long, default_value = "enhanced",
              value_parser = ["legacy", "enhanced", "kindle", "dual"])]
        format: String,

        /// Rebuild books whose EPUB already exists
        #[arg(long)]
        force: bool,

        /// Persist session cookies after this many completed books (1-100)
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..=100))]
        token_save_interval: Option<u32>,
    },
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_discover_defaults() {
        let args = Args::try_parse_from(["skillshelf", "discover"]).unwrap();
        match args.command {
            Command::Discover {
                skills,
                workers,
                max_pages,
                update,
                dry_run,
            } => {
                assert!(skills.is_empty());
                assert!(workers.is_none());
                assert!(max_pages.is_none());
                assert!(!update);
                assert!(!dry_run);
            }
            Command::Download { .. } => panic!("expected discover"),
        }
    }

    #[test]
    fn test_discover_with_flags() {
        let args = Args::try_parse_from([
            "skillshelf", "discover", "-s", "Python", "Rust", "-w", "5", "--max-pages", "50",
            "--update",
        ])
        .unwrap();
        match args.command {
            Command::Discover {
                skills,
                workers,
                max_pages,
                update,
                ..
            } => {
                assert_eq!(skills, vec!["Python", "Rust"]);
                assert_eq!(workers, Some(5));
                assert_eq!(max_pages, Some(50));
                assert!(update);
            }
            Command::Download { .. } => panic!("expected discover"),
        }
    }

    #[test]
    fn test_download_defaults() {
        let args = Args::try_parse_from(["skillshelf", "download"]).unwrap();
        match args.command {
            Command::Download {
                format,
                force,
                max_books,
                token_save_interval,
                ..
            } => {
                assert_eq!(format, "enhanced");
                assert!(!force);
                assert!(max_books.is_none());
                assert!(token_save_interval.is_none());
            }
            Command::Discover { .. } => panic!("expected download"),
        }
    }

    #[test]
    fn test_download_format_values() {
        for format in ["legacy", "enhanced", "kindle", "dual"] {
            let args =
                Args::try_parse_from(["skillshelf", "download", "--format", format]).unwrap();
            match args.command {
                Command::Download { format: parsed, .. } => assert_eq!(parsed, format),
                Command::Discover { .. } => panic!("expected download"),
            }
        }
    }

    #[test]
    fn test_download_invalid_format_rejected() {
        let result = Args::try_parse_from(["skillshelf", "download", "--format", "pdf"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_workers_range_enforced() {
        let result = Args::try_parse_from(["skillshelf", "discover", "-w", "0"]);
        assert!(result.is_err());
        let result = Args::try_parse_from(["skillshelf", "discover", "-w", "11"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_global_verbose_and_quiet() {
        let args = Args::try_parse_from(["skillshelf", "-vv", "discover"]).unwrap();
        assert_eq!(args.verbose, 2);

        let args = Args::try_parse_from(["skillshelf", "discover", "--quiet"]).unwrap();
        assert!(args.quiet);
    }

    #[test]
    fn test_missing_subcommand_is_error() {
        let result = Args::try_parse_from(["skillshelf"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_help_flag() {
        let result = Args::try_parse_from(["skillshelf", "--help"]);
        let err = result.unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }
}

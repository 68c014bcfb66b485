use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::build::{DEFAULT_OUTPUT, DEFAULT_SOURCE};
use crate::collect::CollectOptions;

/// Environment fallback for `--no-descend`, a comma-separated list of names.
pub const NO_DESCEND_ENV: &str = "INITRD_NO_DESCEND";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace). RUST_LOG takes precedence.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Build a ramdisk image from a directory tree.
    #[command(alias = "b")]
    Build {
        /// The directory whose contents become the image root.
        #[arg(default_value = DEFAULT_SOURCE)]
        source: PathBuf,

        /// The path for the output image.
        #[arg(short, long, default_value = DEFAULT_OUTPUT)]
        output: PathBuf,

        /// Record directories with this name but do not descend into them. Repeatable.
        /// Defaults to `ext2` and `fat`, or to the contents of INITRD_NO_DESCEND.
        #[arg(long = "no-descend", value_name = "NAME")]
        no_descend: Vec<String>,

        /// Skip re-reading and checking the image before it is moved into place.
        #[arg(long)]
        skip_check: bool,
    },

    /// List the entries of an image.
    #[command(alias = "l")]
    List {
        /// The image file to list.
        #[arg(required = true)]
        image: PathBuf,

        /// Print a JSON array instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Extract the tree stored in an image.
    #[command(alias = "x")]
    Extract {
        /// The image file to extract.
        #[arg(required = true)]
        image: PathBuf,

        /// The directory to recreate the tree in.
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Check that an image is internally consistent.
    Verify {
        /// The image file to check.
        #[arg(required = true)]
        image: PathBuf,
    },
}

/// Resolves the no-descend list.
///
/// Priority:
/// 1. `--no-descend` command-line arguments.
/// 2. `INITRD_NO_DESCEND` environment variable (empty means descend everywhere).
/// 3. The built-in `ext2`/`fat` default.
pub fn collect_options_from_opt_or_env(no_descend: &[String]) -> CollectOptions {
    if !no_descend.is_empty() {
        return CollectOptions::with_no_descend(no_descend.iter().cloned());
    }
    if let Ok(list) = std::env::var(NO_DESCEND_ENV) {
        return parse_name_list(&list);
    }
    CollectOptions::default()
}

fn parse_name_list(list: &str) -> CollectOptions {
    CollectOptions::with_no_descend(list.split(',').map(str::trim).filter(|s| !s.is_empty()))
}

/// Parses command-line arguments using `clap`. Parse errors are returned,
/// not printed; the caller decides how to report them.
pub fn run() -> Result<Args, clap::Error> {
    Args::try_parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn args_are_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn build_defaults() {
        let args = Args::try_parse_from(["initrd-pack", "build"]).unwrap();
        match args.command {
            Commands::Build { source, output, no_descend, skip_check } => {
                assert_eq!(source, PathBuf::from("initrd"));
                assert_eq!(output, PathBuf::from("isofiles/boot/initrd.img"));
                assert!(no_descend.is_empty());
                assert!(!skip_check);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn repeated_no_descend_flags() {
        let args = Args::try_parse_from(["initrd-pack", "-vv", "b", "tree", "--no-descend", "a", "--no-descend", "b"])
            .unwrap();
        assert_eq!(args.verbose, 2);
        let Commands::Build { no_descend, .. } = args.command else { panic!("expected build") };
        let opts = collect_options_from_opt_or_env(&no_descend);
        assert_eq!(opts, CollectOptions::with_no_descend(["a", "b"]));
    }

    #[test]
    fn name_lists() {
        assert_eq!(parse_name_list("ext2, fat,,"), CollectOptions::default());
        assert_eq!(parse_name_list(""), CollectOptions::descend_all());
    }
}

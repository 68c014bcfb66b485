//! # initrd-pack
//!
//! Builds a flat ramdisk image from a directory tree: one header, one
//! fixed-size record per file or directory, then the file contents back to
//! back. The format is meant for a small kernel loader that cannot run a real
//! filesystem driver; it can walk the records and slice payloads straight out
//! of memory.
//!
//! ## Key Modules
//!
//! - [`collect`]: walks a source tree and assigns identities, parents first.
//! - [`archive`]: the layout pass and the encoder that writes the image.
//! - [`extract`]: decodes, lists and extracts finished images.
//! - [`verify`]: re-checks a written image against its layout rules.
//! - [`build`]: collect + encode + atomic rename, as used by the CLI.
//!
//! ## Examples
//!
//! ```no_run
//! use initrd_pack::{build_image, BuildConfig};
//!
//! let summary = build_image(&BuildConfig::default())?;
//! println!("wrote {} bytes", summary.total_bytes);
//! # Ok::<(), initrd_pack::ImageError>(())
//! ```

pub mod archive;
pub mod build;
pub mod cli;
pub mod cli_runner;
pub mod collect;
pub mod common;
pub mod error;
pub mod extract;
pub mod verify;

// Host metadata helpers
pub mod fsx;

pub use archive::{encode, plan_layout, Diagnostic, EncodeSummary, Layout, Record};
pub use build::{build_image, write_image, BuildConfig};
pub use collect::{collect_tree, CollectOptions};
pub use common::{Entry, EntryKind, EntryList, Payload};
pub use error::ImageError;
pub use extract::{DecodedEntry, ImageReader};
pub use verify::{verify_image, VerifyReport};

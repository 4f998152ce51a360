//! Parse and apply patches in the unified, context and normal diff formats.
//!
//! The crate is the core of a `patch(1)` reimplementation: a format
//! detector that tolerates arbitrary prologue text, per-format hunk
//! parsers, and an applicator with the classical fuzz and offset
//! heuristics. Everything is driven through an explicit [`options::Options`]
//! value and an injected [`report::Reporter`] sink; there is no global
//! state.
//!
//! ```
//! use patchup::apply::apply_all;
//! use patchup::fs::LocalFs;
//! use patchup::options::Options;
//! use patchup::report::Reporter;
//!
//! let patch = b"--- hello.txt\n+++ hello.txt\n@@ -1 +1 @@\n-hi\n+hello\n";
//! let mut status = Vec::new();
//! let mut reporter = Reporter::new(&mut status);
//! let code = apply_all(patch, &Options::default(), &LocalFs, &mut reporter);
//! # let _ = code;
//! ```

pub mod apply;
pub mod fs;
pub mod hunk;
pub mod options;
pub mod parse;
pub mod patch;
pub mod report;

pub use apply::{apply_all, apply_patch, ApplyError, FileImage, PatchReport};
pub use hunk::{Hunk, HunkLine, LineNumber, Range};
pub use options::Options;
pub use parse::{iter_patches, parse_single_patch, ParseError, PatchHeaderInfo};
pub use patch::{Format, Operation, Patch};
pub use report::Reporter;

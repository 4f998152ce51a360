//! Invocation configuration, threaded explicitly through the parser and the
//! applicator instead of living in process globals.

use std::path::PathBuf;

/// Everything the command line would decide, in one structure.
#[derive(Clone, Debug)]
pub struct Options {
    /// `-p N`: leading path components to strip from header paths.
    /// `None` picks the smallest strip that names an existing file.
    pub strip: Option<usize>,

    /// `-i FILE`: where the patch text comes from; `None` means the caller
    /// reads stdin
    pub input: Option<PathBuf>,

    /// `-o FILE`: force all output to this path
    pub output: Option<PathBuf>,

    /// `-R`: apply the patch in reverse
    pub reverse: bool,

    /// `--dry-run`: match and report, write nothing
    pub dry_run: bool,

    /// `-F N`: maximum context lines to ignore when locating a hunk
    pub max_fuzz: usize,

    /// `--reject-file=FILE`: where rejected hunks go instead of
    /// `<target>.rej`
    pub reject_file: Option<PathBuf>,

    /// `-E`: unlink output files that end up empty
    pub remove_empty_files: bool,

    /// `-f`: assume yes; skip prerequisite checks instead of failing
    pub force: bool,

    /// `-t`: never ask; fail where `-f` would assume
    pub batch: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            strip: None,
            input: None,
            output: None,
            reverse: false,
            dry_run: false,
            max_fuzz: 2,
            reject_file: None,
            remove_empty_files: false,
            force: false,
            batch: false,
        }
    }
}

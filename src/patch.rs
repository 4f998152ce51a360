//! The per-file patch record produced by the parser.

use crate::hunk::Hunk;

/// The wire sentinel naming the absent side of a file addition or deletion
pub const DEV_NULL: &str = "/dev/null";

/// The textual encoding a patch body was written in
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Format {
    /// `--- `/`+++ ` headers with `@@` hunks
    Unified,

    /// `*** `/`--- ` headers with `***************` hunks
    Context,

    /// Bare `diff` output: `5,7c8,10` command lines
    Normal,

    /// A `diff --git` extended header block; commits to [`Format::Unified`]
    /// once the header is consumed, since the body is unified
    Git,

    /// Nothing recognisable found
    #[default]
    Unknown,
}

/// What the patch does to its target file
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Operation {
    /// Edit an existing file in place
    #[default]
    Change,

    /// Move the old path to the new path, applying any hunks on the way
    Rename,

    /// Copy the old path to the new path, applying any hunks on the way
    Copy,

    /// Remove the old path; the single hunk is the whole pre-image
    Delete,

    /// Create the new path; the single hunk is the whole post-image
    Add,

    /// A git binary patch; recognised but never applied
    Binary,
}

/// One per-file patch: header metadata plus the hunks to apply.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Patch {
    /// Detected body encoding
    pub format: Format,

    /// What to do with the target
    pub operation: Operation,

    /// Path on the pre-image side, as written in the header
    pub old_file_path: String,

    /// Path on the post-image side
    pub new_file_path: String,

    /// Path from an `Index:` prologue line
    pub index_file_path: String,

    /// POSIX mode bits for the pre-image, when the header carried them
    pub old_file_mode: Option<u32>,

    /// POSIX mode bits for the post-image
    pub new_file_mode: Option<u32>,

    /// Raw timestamp bytes from the old header line; never interpreted
    pub old_file_time: Option<Vec<u8>>,

    /// Raw timestamp bytes from the new header line
    pub new_file_time: Option<Vec<u8>>,

    /// `Prereq:` token the target must contain
    pub prereq: Option<Vec<u8>>,

    /// Hunks in input order
    pub hunks: Vec<Hunk>,
}

impl Patch {
    /// Whether a header path is empty or the `/dev/null` sentinel
    pub fn is_null_path(path: &str) -> bool {
        path.is_empty() || path == DEV_NULL
    }

    /// The path the applicator should read, per operation
    pub fn source_path(&self) -> &str {
        match self.operation {
            Operation::Delete => &self.old_file_path,
            Operation::Add => &self.new_file_path,
            Operation::Rename | Operation::Copy => &self.old_file_path,
            Operation::Change | Operation::Binary => {
                if !self.new_file_path.is_empty() {
                    &self.new_file_path
                } else if !self.old_file_path.is_empty() {
                    &self.old_file_path
                } else {
                    &self.index_file_path
                }
            }
        }
    }

    /// The path the applicator should write, per operation
    pub fn destination_path(&self) -> &str {
        match self.operation {
            Operation::Delete => &self.old_file_path,
            Operation::Rename | Operation::Copy => &self.new_file_path,
            _ => self.source_path(),
        }
    }

    /// Swap the two sides of the patch, inverting its effect.
    pub fn reversed(&self) -> Self {
        Self {
            format: self.format,
            operation: match self.operation {
                Operation::Add => Operation::Delete,
                Operation::Delete => Operation::Add,
                other => other,
            },
            old_file_path: self.new_file_path.clone(),
            new_file_path: self.old_file_path.clone(),
            index_file_path: self.index_file_path.clone(),
            old_file_mode: self.new_file_mode,
            new_file_mode: self.old_file_mode,
            old_file_time: self.new_file_time.clone(),
            new_file_time: self.old_file_time.clone(),
            prereq: self.prereq.clone(),
            hunks: self.hunks.iter().map(Hunk::reversed).collect(),
        }
    }

    /// Write the `--- `/`+++ ` header pair, used at the top of unified
    /// reject files
    pub fn write_unified_header<W: std::io::Write>(&self, w: &mut W) -> std::io::Result<()> {
        write_header_line(w, b"--- ", &self.old_file_path, self.old_file_time.as_deref())?;
        write_header_line(w, b"+++ ", &self.new_file_path, self.new_file_time.as_deref())
    }

    /// Write the `*** `/`--- ` header pair, used at the top of context
    /// reject files
    pub fn write_context_header<W: std::io::Write>(&self, w: &mut W) -> std::io::Result<()> {
        write_header_line(w, b"*** ", &self.old_file_path, self.old_file_time.as_deref())?;
        write_header_line(w, b"--- ", &self.new_file_path, self.new_file_time.as_deref())
    }
}

fn write_header_line<W: std::io::Write>(
    w: &mut W,
    prefix: &[u8],
    path: &str,
    time: Option<&[u8]>,
) -> std::io::Result<()> {
    w.write_all(prefix)?;
    w.write_all(path.as_bytes())?;
    if let Some(time) = time {
        w.write_all(b"\t")?;
        w.write_all(time)?;
    }
    w.write_all(b"\n")
}

/// Remove `count` leading components from a `/`-delimited path.
pub fn strip_path(path: &str, count: usize) -> String {
    if count == 0 || path == DEV_NULL {
        return path.to_string();
    }
    path.split('/')
        .filter(|c| !c.is_empty())
        .skip(count)
        .collect::<Vec<_>>()
        .join("/")
}

/// The last component of a `/`-delimited path.
pub fn path_basename(path: &str) -> &str {
    path.rsplit('/').find(|c| !c.is_empty()).unwrap_or(path)
}

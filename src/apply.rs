//! Locating and applying hunks against target files.

use crate::fs::Filesystem;
use crate::hunk::{Hunk, HunkLine};
use crate::options::Options;
use crate::parse::{iter_patches, splitlines, ParseError};
use crate::patch::{path_basename, strip_path, Format, Operation, Patch, DEV_NULL};
use crate::report::{Reporter, EXIT_ERROR, EXIT_OK, EXIT_REJECTS};
use log::{debug, trace};
use std::path::{Path, PathBuf};

/// Errors that abort a single patch. Hunks that merely fail to match are not
/// errors; they land in the reject file.
#[derive(Debug)]
pub enum ApplyError {
    /// The filesystem said no
    Io(std::io::Error),

    /// Git binary patches are recognised but cannot be applied
    UnsupportedBinary,

    /// No file to patch could be found
    MissingTarget(String),

    /// The patch would create or rename onto a file that already exists
    TargetExists(String),

    /// The target does not contain the `Prereq:` token
    PrereqMissing(String),

    /// The configuration cannot be acted on
    InvalidConfiguration(&'static str),
}

impl std::fmt::Display for ApplyError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "{}", err),
            Self::UnsupportedBinary => write!(f, "cannot apply binary patch"),
            Self::MissingTarget(path) if path.is_empty() => {
                write!(f, "can't find file to patch")
            }
            Self::MissingTarget(path) => write!(f, "can't find file to patch: {}", path),
            Self::TargetExists(path) => write!(f, "file {} already exists", path),
            Self::PrereqMissing(token) => {
                write!(f, "this file doesn't appear to be the {} version", token)
            }
            Self::InvalidConfiguration(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for ApplyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ApplyError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

/// A target file held as its lines, each carrying its own terminator.
///
/// The last line may lack one; that is the "no newline at end of file"
/// state. `to_bytes` repairs any interior line that lost its terminator, so
/// only the final line can end the output unterminated.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FileImage {
    /// File content split into terminator-carrying lines
    pub lines: Vec<Vec<u8>>,
}

impl FileImage {
    /// Split raw bytes into an image
    pub fn parse(data: &[u8]) -> Self {
        Self {
            lines: splitlines(data).map(|l| l.to_vec()).collect(),
        }
    }

    /// Number of lines
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Whether the image has no lines at all
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Whether the image ends with a line terminator
    pub fn trailing_newline(&self) -> bool {
        self.lines.last().map(|l| l.ends_with(b"\n")).unwrap_or(true)
    }

    /// Reassemble the file
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.lines.iter().map(Vec::len).sum());
        let last = self.lines.len().saturating_sub(1);
        for (i, line) in self.lines.iter().enumerate() {
            out.extend_from_slice(line);
            if i != last && !line.ends_with(b"\n") {
                out.push(b'\n');
            }
        }
        out
    }
}

/// Where a hunk landed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Placement {
    /// 0-based index of the matched (fuzz-trimmed) window
    window: usize,

    /// Context lines ignored at the top of the hunk
    top: usize,

    /// Context lines ignored at the bottom
    bottom: usize,

    /// Fuzz level the match needed
    fuzz: usize,

    /// Lines between the declared and the actual position
    offset: i64,

    /// 0-based position of the untrimmed hunk, for reporting
    position: i64,
}

fn line_matches(file_line: &[u8], hunk_line: &[u8], file_is_last: bool) -> bool {
    if file_line == hunk_line {
        return true;
    }
    // The file's unterminated last line still matches a terminated hunk
    // line (and vice versa); the output follows the hunk's new side.
    file_is_last
        && file_line.strip_suffix(b"\n").unwrap_or(file_line)
            == hunk_line.strip_suffix(b"\n").unwrap_or(hunk_line)
}

fn window_matches(lines: &[Vec<u8>], pattern: &[&[u8]], at: usize) -> bool {
    pattern.iter().enumerate().all(|(k, expected)| {
        let idx = at + k;
        line_matches(&lines[idx], expected, idx + 1 == lines.len())
    })
}

fn leading_context(hunk: &Hunk) -> usize {
    hunk.lines
        .iter()
        .take_while(|l| matches!(l, HunkLine::Context(_)))
        .count()
}

fn trailing_context(hunk: &Hunk) -> usize {
    hunk.lines
        .iter()
        .rev()
        .take_while(|l| matches!(l, HunkLine::Context(_)))
        .count()
}

/// Find where a hunk applies, trying fuzz levels in order and searching
/// outward from the expected position at each level. At equal distance the
/// earlier position wins.
fn locate_hunk(lines: &[Vec<u8>], hunk: &Hunk, delta: i64, max_fuzz: usize) -> Option<Placement> {
    let pattern: Vec<&[u8]> = hunk.old_lines().collect();

    if pattern.is_empty() {
        // A pure insertion has nothing to search for; it applies after the
        // declared line or not at all.
        let expected = hunk.old_range.start_line + delta;
        if expected < 0 || expected > lines.len() as i64 {
            return None;
        }
        return Some(Placement {
            window: expected as usize,
            top: 0,
            bottom: 0,
            fuzz: 0,
            offset: 0,
            position: expected,
        });
    }

    let expected = hunk.old_range.start_line - 1 + delta;
    let lead = leading_context(hunk);
    let trail = trailing_context(hunk);

    for fuzz in 0..=max_fuzz {
        let top = fuzz.min(lead);
        let bottom = fuzz.min(trail);
        if top + bottom >= pattern.len() {
            break;
        }
        let trimmed = &pattern[top..pattern.len() - bottom];
        let max_window = lines.len() as i64 - trimmed.len() as i64;
        if max_window < 0 {
            continue;
        }
        let expected_window = expected + top as i64;
        let mut distance = 0i64;
        loop {
            let below = expected_window - distance;
            let above = expected_window + distance;
            if below < 0 && above > max_window {
                break;
            }
            for window in [below, above] {
                if window < 0 || window > max_window {
                    continue;
                }
                if window_matches(lines, trimmed, window as usize) {
                    let placement = Placement {
                        window: window as usize,
                        top,
                        bottom,
                        fuzz,
                        offset: window - expected_window,
                        position: window - top as i64,
                    };
                    trace!(
                        "hunk located at line {} (fuzz {}, offset {})",
                        placement.position + 1,
                        placement.fuzz,
                        placement.offset
                    );
                    return Some(placement);
                }
                if distance == 0 {
                    break;
                }
            }
            distance += 1;
        }
    }
    None
}

/// Replace the matched window with the hunk's new-side projection, trimmed
/// by the same fuzz so the file's own bytes survive at the fuzzed edges.
fn apply_at(image: &mut FileImage, hunk: &Hunk, placement: &Placement) {
    let pattern_len = hunk.old_lines().count() - placement.top - placement.bottom;
    let replacement: Vec<&[u8]> = hunk.new_lines().collect();
    let replacement = &replacement[placement.top..replacement.len() - placement.bottom];
    image.lines.splice(
        placement.window..placement.window + pattern_len,
        replacement.iter().map(|l| l.to_vec()),
    );
}

fn contains_bytes(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|w| w == needle)
}

/// Resolve the strip transform on every header path.
///
/// An explicit count is applied as-is. Auto mode picks one count for the
/// whole patch: the smallest strip at which a named side exists on disk,
/// consulting the new-file side before the old-file side at each level, and
/// applies it uniformly so the two sides of a rename or copy can never land
/// at different depths. When no strip level names an existing file, each
/// path falls back to the shortest form that can still be created: the
/// first candidate whose directory exists, else the basename.
pub fn resolve_strip(patch: &mut Patch, strip: Option<usize>, fs: &dyn Filesystem) {
    let count = match strip {
        Some(count) => Some(count),
        None => shared_strip_count(patch, fs),
    };
    for path in [
        &mut patch.old_file_path,
        &mut patch.new_file_path,
        &mut patch.index_file_path,
    ] {
        *path = match count {
            Some(count) => strip_path(path, count),
            None => creatable_path(path, fs),
        };
    }
}

fn component_count(path: &str) -> usize {
    path.split('/').filter(|c| !c.is_empty()).count()
}

fn shared_strip_count(patch: &Patch, fs: &dyn Filesystem) -> Option<usize> {
    let sides = [
        patch.new_file_path.as_str(),
        patch.old_file_path.as_str(),
    ];
    let deepest = sides.iter().map(|side| component_count(side)).max()?;
    for count in 0..deepest {
        for side in sides {
            if side.is_empty() || side == DEV_NULL {
                continue;
            }
            let candidate = strip_path(side, count);
            if !candidate.is_empty() && fs.exists(Path::new(&candidate)) {
                return Some(count);
            }
        }
    }
    None
}

fn creatable_path(path: &str, fs: &dyn Filesystem) -> String {
    if path.is_empty() || path == DEV_NULL {
        return path.to_string();
    }
    for count in 0..component_count(path) {
        let candidate = strip_path(path, count);
        if parent_dir_exists(&candidate, fs) {
            return candidate;
        }
    }
    path_basename(path).to_string()
}

fn parent_dir_exists(candidate: &str, fs: &dyn Filesystem) -> bool {
    match Path::new(candidate).parent() {
        None => false,
        Some(parent) if parent.as_os_str().is_empty() => true,
        Some(parent) => fs.dir_exists(parent),
    }
}

/// What happened to one patch.
#[derive(Clone, Debug, Default)]
pub struct PatchReport {
    /// The file that was patched (or checked, under `--dry-run`)
    pub target: String,

    /// Hunks that applied
    pub hunks_applied: usize,

    /// Hunks that landed in the reject file
    pub hunks_failed: usize,

    /// Where rejects were saved, when any hunk failed
    pub reject_path: Option<PathBuf>,
}

fn load_image(
    patch: &Patch,
    source: &Path,
    fs: &dyn Filesystem,
) -> Result<FileImage, ApplyError> {
    match patch.operation {
        Operation::Add => {
            if fs.exists(source) {
                let existing = fs.read(source)?;
                if !existing.is_empty() {
                    return Err(ApplyError::TargetExists(
                        source.display().to_string(),
                    ));
                }
            }
            Ok(FileImage::default())
        }
        _ => {
            if !fs.exists(source) {
                return Err(ApplyError::MissingTarget(source.display().to_string()));
            }
            Ok(FileImage::parse(&fs.read(source)?))
        }
    }
}

fn render_rejects(patch: &Patch, rejected: &[&Hunk]) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::new();
    match patch.format {
        Format::Context => {
            patch.write_context_header(&mut out)?;
            for hunk in rejected {
                hunk.write_context(&mut out)?;
            }
        }
        Format::Normal => {
            for hunk in rejected {
                hunk.write_normal(&mut out)?;
            }
        }
        _ => {
            patch.write_unified_header(&mut out)?;
            for hunk in rejected {
                hunk.write_unified(&mut out)?;
            }
        }
    }
    Ok(out)
}

/// Apply one parsed patch to the filesystem.
///
/// Hunks that cannot be placed within the fuzz budget are collected into the
/// reject file; anything that prevents the patch as a whole from proceeding
/// is an [`ApplyError`].
pub fn apply_patch(
    patch: &Patch,
    options: &Options,
    fs: &dyn Filesystem,
    reporter: &mut Reporter,
) -> Result<PatchReport, ApplyError> {
    let reversed;
    let patch = if options.reverse {
        reversed = patch.reversed();
        &reversed
    } else {
        patch
    };

    if patch.operation == Operation::Binary {
        return Err(ApplyError::UnsupportedBinary);
    }

    let source_name = patch.source_path().to_string();
    if source_name.is_empty() {
        return Err(ApplyError::MissingTarget(String::new()));
    }
    let destination_name = patch.destination_path().to_string();
    let source = PathBuf::from(&source_name);
    let destination = PathBuf::from(&destination_name);

    let mut image = load_image(patch, &source, fs)?;
    debug!(
        "patching {} ({} lines, {} hunks)",
        destination_name,
        image.len(),
        patch.hunks.len()
    );

    if let Some(prereq) = &patch.prereq {
        if !contains_bytes(&image.to_bytes(), prereq) {
            let token = String::from_utf8_lossy(prereq).into_owned();
            if options.force {
                reporter.warn(
                    Some(&destination_name),
                    &format!(
                        "this file doesn't appear to be the {} version -- patching anyway",
                        token
                    ),
                );
            } else {
                return Err(ApplyError::PrereqMissing(token));
            }
        }
    }

    let renamed_from = if patch.operation == Operation::Rename {
        Some(source_name.as_str())
    } else {
        None
    };
    reporter.patching_file(&destination_name, options.dry_run, renamed_from);

    let mut delta = 0i64;
    let mut rejected: Vec<&Hunk> = Vec::new();
    let mut applied = 0usize;
    for (index, hunk) in patch.hunks.iter().enumerate() {
        let number = index + 1;
        match locate_hunk(&image.lines, hunk, delta, options.max_fuzz) {
            Some(placement) => {
                apply_at(&mut image, hunk, &placement);
                delta += hunk.new_range.number_of_lines - hunk.old_range.number_of_lines;
                applied += 1;
                reporter.hunk_succeeded(
                    number,
                    placement.position + 1,
                    placement.fuzz,
                    placement.offset,
                );
            }
            None => {
                debug!("hunk #{} does not match anywhere", number);
                rejected.push(hunk);
                reporter.hunk_failed(number, hunk.old_range.start_line + delta);
            }
        }
    }

    let mut report = PatchReport {
        target: destination_name.clone(),
        hunks_applied: applied,
        hunks_failed: rejected.len(),
        reject_path: None,
    };

    // Decide the output path before touching anything.
    let output = options
        .output
        .clone()
        .unwrap_or_else(|| destination.clone());

    let deletes_file = patch.operation == Operation::Delete
        || (image.is_empty() && options.remove_empty_files);

    if patch.operation == Operation::Delete && !image.is_empty() {
        reporter.warn(
            Some(&destination_name),
            "not deleting file as content differs from patch",
        );
    }

    // Renames and copies carry the source's permissions unless the header
    // declared new ones.
    let source_mode = match patch.operation {
        Operation::Rename | Operation::Copy => fs.mode(&source).ok(),
        _ => None,
    };

    if !options.dry_run {
        match patch.operation {
            Operation::Rename | Operation::Copy => {
                if fs.exists(&output) && output != source {
                    return Err(ApplyError::TargetExists(output.display().to_string()));
                }
                if patch.operation == Operation::Rename && patch.hunks.is_empty() {
                    fs.rename(&source, &output)?;
                } else {
                    fs.write(&output, &image.to_bytes())?;
                    if patch.operation == Operation::Rename && output != source {
                        fs.unlink(&source)?;
                    }
                }
            }
            _ => {
                if deletes_file && image.is_empty() {
                    if fs.exists(&output) {
                        fs.unlink(&output)?;
                    }
                } else {
                    fs.write(&output, &image.to_bytes())?;
                }
            }
        }
        if fs.exists(&output) {
            if let Some(mode) = patch.new_file_mode {
                fs.set_mode(&output, mode & 0o7777)?;
            } else if patch.operation == Operation::Add {
                fs.set_mode(&output, 0o644)?;
            } else if let Some(mode) = source_mode {
                fs.set_mode(&output, mode & 0o7777)?;
            }
        }
    }

    if !rejected.is_empty() {
        let reject_path = options
            .reject_file
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("{}.rej", destination_name)));
        reporter.rejects_saved(
            rejected.len(),
            patch.hunks.len(),
            &reject_path.display().to_string(),
        );
        if !options.dry_run {
            fs.write(&reject_path, &render_rejects(patch, &rejected)?)?;
        }
        report.reject_path = Some(reject_path);
    }

    Ok(report)
}

/// Parse a whole patch stream and apply every patch in it.
///
/// Returns the exit code of the classical tool: 0 when every hunk applied,
/// 1 when any hunk was rejected, 2 on an unrecoverable error. One broken
/// patch does not stop later ones from being attempted.
pub fn apply_all(
    input: &[u8],
    options: &Options,
    fs: &dyn Filesystem,
    reporter: &mut Reporter,
) -> i32 {
    let mut exit = EXIT_OK;
    let mut seen_any = false;

    for item in iter_patches(input) {
        match item {
            Ok(parsed) => {
                seen_any = true;
                let prologue = &input[parsed.header.header_start..parsed.header.body_start];
                reporter.format_detected(parsed.header.format, prologue);

                let mut patch = parsed.patch;
                resolve_strip(&mut patch, options.strip, fs);

                match apply_patch(&patch, options, fs, reporter) {
                    Ok(report) => {
                        if report.hunks_failed > 0 && exit < EXIT_REJECTS {
                            exit = EXIT_REJECTS;
                        }
                    }
                    Err(error) => {
                        let target = patch.destination_path();
                        let target = (!target.is_empty()).then_some(target);
                        reporter.patch_failed(target, &error.to_string());
                        exit = EXIT_ERROR;
                    }
                }
            }
            Err(stream_error) => {
                seen_any = true;
                if let Some(header) = stream_error.header {
                    let prologue = &input[header.header_start..header.body_start];
                    reporter.format_detected(header.format, prologue);
                }
                let message = match stream_error.error {
                    ParseError::UnsupportedBinary => stream_error.error.to_string(),
                    _ => format!("malformed patch: {}", stream_error.error),
                };
                reporter.patch_failed(None, &message);
                exit = EXIT_ERROR;
            }
        }
    }

    if !seen_any {
        reporter.no_patch_found();
        exit = EXIT_ERROR;
    }
    exit
}



#[cfg(test)]
mod apply_tests {
    use super::{apply_all, apply_patch, resolve_strip, ApplyError, PatchReport};
    use crate::fs::Filesystem;
    use crate::options::Options;
    use crate::parse::parse_single_patch;
    use crate::patch::Patch;
    use crate::report::{Reporter, EXIT_ERROR, EXIT_OK, EXIT_REJECTS};
    use std::cell::RefCell;
    use std::collections::BTreeMap;
    use std::io;
    use std::path::{Path, PathBuf};

    /// In-memory stand-in for the real filesystem.
    #[derive(Default)]
    struct MemFs {
        files: RefCell<BTreeMap<PathBuf, (Vec<u8>, u32)>>,
    }

    impl MemFs {
        fn with(files: &[(&str, &[u8])]) -> Self {
            let fs = Self::default();
            for (path, data) in files {
                fs.files
                    .borrow_mut()
                    .insert(PathBuf::from(path), (data.to_vec(), 0o644));
            }
            fs
        }

        fn contents(&self, path: &str) -> Option<Vec<u8>> {
            self.files
                .borrow()
                .get(Path::new(path))
                .map(|(data, _)| data.clone())
        }

        fn mode_of(&self, path: &str) -> Option<u32> {
            self.files
                .borrow()
                .get(Path::new(path))
                .map(|(_, mode)| *mode)
        }
    }

    impl Filesystem for MemFs {
        fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
            self.files
                .borrow()
                .get(path)
                .map(|(data, _)| data.clone())
                .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))
        }

        fn write(&self, path: &Path, data: &[u8]) -> io::Result<()> {
            let mut files = self.files.borrow_mut();
            let mode = files.get(path).map(|(_, m)| *m).unwrap_or(0o644);
            files.insert(path.to_path_buf(), (data.to_vec(), mode));
            Ok(())
        }

        fn unlink(&self, path: &Path) -> io::Result<()> {
            self.files
                .borrow_mut()
                .remove(path)
                .map(|_| ())
                .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))
        }

        fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
            let entry = self
                .files
                .borrow_mut()
                .remove(from)
                .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))?;
            self.files.borrow_mut().insert(to.to_path_buf(), entry);
            Ok(())
        }

        fn exists(&self, path: &Path) -> bool {
            self.files.borrow().contains_key(path)
        }

        fn dir_exists(&self, path: &Path) -> bool {
            self.files
                .borrow()
                .keys()
                .any(|k| k != path && k.starts_with(path))
        }

        fn mode(&self, path: &Path) -> io::Result<u32> {
            self.files
                .borrow()
                .get(path)
                .map(|(_, mode)| *mode)
                .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))
        }

        fn set_mode(&self, path: &Path, mode: u32) -> io::Result<()> {
            self.files
                .borrow_mut()
                .get_mut(path)
                .map(|entry| entry.1 = mode)
                .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))
        }
    }

    fn apply(
        patch_text: &[u8],
        fs: &MemFs,
        options: &Options,
    ) -> (Result<PatchReport, ApplyError>, String) {
        let mut patch = parse_single_patch(patch_text).unwrap().patch;
        resolve_strip(&mut patch, options.strip, fs);
        let mut out = Vec::new();
        let mut reporter = Reporter::new(&mut out);
        let result = apply_patch(&patch, options, fs, &mut reporter);
        (result, String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_clean_change() {
        let fs = MemFs::with(&[("f", b"int main()\n{\n}\n")]);
        let (result, output) = apply(
            b"--- f\n+++ f\n@@ -1,3 +1,4 @@\n int main()\n {\n+\treturn 1;\n }\n",
            &fs,
            &Options::default(),
        );
        let report = result.unwrap();
        assert_eq!(report.hunks_applied, 1);
        assert_eq!(report.hunks_failed, 0);
        assert_eq!(
            fs.contents("f").unwrap(),
            b"int main()\n{\n\treturn 1;\n}\n"
        );
        assert_eq!(output, "patching file f\n");
    }

    #[test]
    fn test_offset_reported() {
        let fs = MemFs::with(&[("f", b"pad\npad\na\nb\nc\n")]);
        let (result, output) = apply(
            b"--- f\n+++ f\n@@ -1,3 +1,3 @@\n a\n-b\n+B\n c\n",
            &fs,
            &Options::default(),
        );
        assert_eq!(result.unwrap().hunks_applied, 1);
        assert_eq!(fs.contents("f").unwrap(), b"pad\npad\na\nB\nc\n");
        assert_eq!(
            output,
            "patching file f\nHunk #1 succeeded at 3 (offset 2 lines).\n"
        );
    }

    #[test]
    fn test_fuzz_reported() {
        let fs = MemFs::with(&[("f", b"X\nb\nc\n")]);
        let (result, output) = apply(
            b"--- f\n+++ f\n@@ -1,3 +1,3 @@\n a\n-b\n+B\n c\n",
            &fs,
            &Options::default(),
        );
        assert_eq!(result.unwrap().hunks_applied, 1);
        assert_eq!(fs.contents("f").unwrap(), b"X\nB\nc\n");
        assert!(output.contains("Hunk #1 succeeded at 1 with fuzz 1.\n"));
    }

    #[test]
    fn test_reject_written() {
        let fs = MemFs::with(&[("f", b"nothing\nmatches\nhere\n")]);
        let (result, output) = apply(
            b"--- f\t2024-01-01\n+++ f\t2024-01-02\n@@ -1,3 +1,3 @@\n a\n-b\n+B\n c\n",
            &fs,
            &Options::default(),
        );
        let report = result.unwrap();
        assert_eq!(report.hunks_failed, 1);
        assert_eq!(report.reject_path, Some(PathBuf::from("f.rej")));
        assert!(output.contains("Hunk #1 FAILED at line 1.\n"));
        assert!(output
            .contains("1 out of 1 hunk FAILED -- saving rejects to file f.rej\n"));
        assert_eq!(
            fs.contents("f.rej").unwrap(),
            b"--- f\t2024-01-01\n+++ f\t2024-01-02\n@@ -1,3 +1,3 @@\n a\n-b\n+B\n c\n"
        );
        // the target is rewritten unchanged
        assert_eq!(fs.contents("f").unwrap(), b"nothing\nmatches\nhere\n");
    }

    #[test]
    fn test_second_hunk_sees_first_hunks_delta() {
        let fs = MemFs::with(&[("f", b"a\nb\nc\nd\ne\nf\n")]);
        let (result, _) = apply(
            b"--- f\n+++ f\n\
              @@ -1,2 +1,4 @@\n a\n+one\n+two\n b\n\
              @@ -5,2 +7,2 @@\n e\n-f\n+F\n",
            &fs,
            &Options::default(),
        );
        let report = result.unwrap();
        assert_eq!(report.hunks_applied, 2);
        assert_eq!(fs.contents("f").unwrap(), b"a\none\ntwo\nb\nc\nd\ne\nF\n");
    }

    #[test]
    fn test_add_and_delete() {
        let fs = MemFs::with(&[]);
        let (result, _) = apply(
            b"--- /dev/null\n+++ created\n@@ -0,0 +1,2 @@\n+first\n+second\n",
            &fs,
            &Options::default(),
        );
        assert_eq!(result.unwrap().hunks_applied, 1);
        assert_eq!(fs.contents("created").unwrap(), b"first\nsecond\n");
        assert_eq!(fs.mode_of("created"), Some(0o644));

        let (result, _) = apply(
            b"--- created\n+++ /dev/null\n@@ -1,2 +0,0 @@\n-first\n-second\n",
            &fs,
            &Options::default(),
        );
        assert_eq!(result.unwrap().hunks_applied, 1);
        assert_eq!(fs.contents("created"), None);
    }

    #[test]
    fn test_add_refuses_existing_content() {
        let fs = MemFs::with(&[("created", b"already here\n")]);
        let (result, _) = apply(
            b"--- /dev/null\n+++ created\n@@ -0,0 +1 @@\n+x\n",
            &fs,
            &Options::default(),
        );
        assert!(matches!(result.unwrap_err(), ApplyError::TargetExists(_)));
    }

    #[test]
    fn test_git_rename_with_hunk() {
        let fs = MemFs::with(&[("thing", b"a\nb\nc\nd\ne\nf\ng\nh\n")]);
        let (result, output) = apply(
            b"diff --git a/file b/test\n\
              similarity index 87%\n\
              rename from a/b/c/d/thing\n\
              rename to a/b/c/d/e/test\n\
              index 71ac1b5..fc3102f 100644\n\
              --- a/thing\n+++ b/test\n\
              @@ -2,7 +2,6 @@ a\n b\n c\n d\n-e\n f\n g\n h\n",
            &fs,
            &Options::default(),
        );
        assert_eq!(result.unwrap().hunks_applied, 1);
        assert_eq!(fs.contents("thing"), None);
        // the strip count that found the source governs both sides
        assert_eq!(fs.contents("e/test").unwrap(), b"a\nb\nc\nd\nf\ng\nh\n");
        assert!(output.starts_with("patching file e/test (renamed from thing)\n"));
    }

    #[test]
    fn test_git_rename_without_hunk() {
        let fs = MemFs::with(&[("new_file", b"payload\n")]);
        let (result, _) = apply(
            b"diff --git a/new_file b/another_new\n\
              similarity index 100%\n\
              rename from new_file\n\
              rename to another_new\n",
            &fs,
            &Options::default(),
        );
        result.unwrap();
        assert_eq!(fs.contents("new_file"), None);
        assert_eq!(fs.contents("another_new").unwrap(), b"payload\n");
    }

    #[test]
    fn test_copy_keeps_source() {
        let fs = MemFs::with(&[("orig", b"payload\n")]);
        let (result, _) = apply(
            b"diff --git a/orig b/dup\ncopy from orig\ncopy to dup\n",
            &fs,
            &Options::default(),
        );
        result.unwrap();
        assert_eq!(fs.contents("orig").unwrap(), b"payload\n");
        assert_eq!(fs.contents("dup").unwrap(), b"payload\n");
    }

    #[test]
    fn test_reverse_round_trip() {
        let original = b"int main()\n{\n}\n";
        let patch_text = b"--- f\n+++ f\n@@ -1,3 +1,4 @@\n int main()\n {\n+\treturn 1;\n }\n";
        let fs = MemFs::with(&[("f", original)]);

        let (result, _) = apply(patch_text, &fs, &Options::default());
        assert_eq!(result.unwrap().hunks_failed, 0);
        assert_ne!(fs.contents("f").unwrap(), original.to_vec());

        let reverse = Options {
            reverse: true,
            ..Options::default()
        };
        let (result, _) = apply(patch_text, &fs, &reverse);
        assert_eq!(result.unwrap().hunks_failed, 0);
        assert_eq!(fs.contents("f").unwrap(), original.to_vec());
    }

    #[test]
    fn test_new_side_projection_appears_in_output() {
        let fs = MemFs::with(&[("f", b"a\nb\nc\nd\n")]);
        let patch_text = b"--- f\n+++ f\n@@ -2,2 +2,3 @@\n b\n-c\n+C\n+c2\n";
        let (result, _) = apply(patch_text, &fs, &Options::default());
        result.unwrap();
        let patched = fs.contents("f").unwrap();
        let patch = parse_single_patch(patch_text).unwrap().patch;
        let hunk = &patch.hunks[0];
        let start = (hunk.new_range.start_line - 1) as usize;
        let window: Vec<u8> = crate::parse::splitlines(&patched)
            .skip(start)
            .take(hunk.new_range.number_of_lines as usize)
            .flat_map(|l| l.to_vec())
            .collect();
        let projection: Vec<u8> = hunk.new_lines().flat_map(|l| l.to_vec()).collect();
        assert_eq!(window, projection);
    }

    #[test]
    fn test_no_newline_at_end_repair() {
        let fs = MemFs::with(&[("f", b"a\nend")]);
        let (result, _) = apply(
            b"--- f\n+++ f\n@@ -1,2 +1,2 @@\n a\n-end\n\\ No newline at end of file\n+end\n",
            &fs,
            &Options::default(),
        );
        assert_eq!(result.unwrap().hunks_applied, 1);
        assert_eq!(fs.contents("f").unwrap(), b"a\nend\n");

        let (result, _) = apply(
            b"--- f\n+++ f\n@@ -1,2 +1,2 @@\n a\n-end\n+end\n\\ No newline at end of file\n",
            &fs,
            &Options::default(),
        );
        assert_eq!(result.unwrap().hunks_applied, 1);
        assert_eq!(fs.contents("f").unwrap(), b"a\nend");
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let fs = MemFs::with(&[("f", b"a\nb\nc\n")]);
        let options = Options {
            dry_run: true,
            ..Options::default()
        };
        let (result, output) = apply(
            b"--- f\n+++ f\n@@ -1,3 +1,3 @@\n a\n-b\n+B\n c\n",
            &fs,
            &options,
        );
        assert_eq!(result.unwrap().hunks_applied, 1);
        assert_eq!(fs.contents("f").unwrap(), b"a\nb\nc\n");
        assert!(output.starts_with("checking file f\n"));
    }

    #[test]
    fn test_binary_operation_is_refused() {
        let fs = MemFs::with(&[("blob", b"x\n")]);
        let patch = Patch {
            operation: crate::patch::Operation::Binary,
            old_file_path: "blob".to_string(),
            new_file_path: "blob".to_string(),
            ..Default::default()
        };
        let mut reporter = Reporter::silent();
        let err = apply_patch(&patch, &Options::default(), &fs, &mut reporter).unwrap_err();
        assert!(matches!(err, ApplyError::UnsupportedBinary));
    }

    #[test]
    fn test_missing_target() {
        let fs = MemFs::with(&[]);
        let (result, _) = apply(
            b"--- absent\n+++ absent\n@@ -1 +1 @@\n-x\n+y\n",
            &fs,
            &Options::default(),
        );
        assert!(matches!(result.unwrap_err(), ApplyError::MissingTarget(_)));
    }

    #[test]
    fn test_prereq_enforced_and_forced() {
        let fs = MemFs::with(&[("f", b"version 1.0\ndata\n")]);
        let patch_text =
            b"Prereq: 2.0\n--- f\n+++ f\n@@ -2 +2 @@\n-data\n+DATA\n";
        let (result, _) = apply(patch_text, &fs, &Options::default());
        assert!(matches!(result.unwrap_err(), ApplyError::PrereqMissing(_)));

        let forced = Options {
            force: true,
            ..Options::default()
        };
        let (result, output) = apply(patch_text, &fs, &forced);
        assert_eq!(result.unwrap().hunks_applied, 1);
        assert!(output.contains("doesn't appear to be the 2.0 version"));
    }

    #[test]
    fn test_normal_patch_and_reject_format() {
        let fs = MemFs::with(&[("f", b"one\ntwo\nthree\n")]);
        let options = Options::default();
        // second command cannot apply
        let mut patch = parse_single_patch(b"2c2\n< two\n---\n> TWO\n9d8\n< gone\n")
            .unwrap()
            .patch;
        patch.old_file_path = "f".to_string();
        patch.new_file_path = "f".to_string();
        let mut out = Vec::new();
        let mut reporter = Reporter::new(&mut out);
        let report = apply_patch(&patch, &options, &fs, &mut reporter).unwrap();
        assert_eq!(report.hunks_applied, 1);
        assert_eq!(report.hunks_failed, 1);
        assert_eq!(fs.contents("f").unwrap(), b"one\nTWO\nthree\n");
        assert_eq!(fs.contents("f.rej").unwrap(), b"9d8\n< gone\n");
    }

    #[test]
    fn test_context_insertion_only_hunk_applies() {
        let fs = MemFs::with(&[("f", b"int main()\n{\n}\n")]);
        let (result, output) = apply(
            b"*** f\n--- f\n***************\n*** 1,3 ****\n--- 1,4 ----\n\
              \x20 int main()\n  {\n+     return 0;\n  }\n",
            &fs,
            &Options::default(),
        );
        let report = result.unwrap();
        assert_eq!(report.hunks_applied, 1);
        assert_eq!(report.hunks_failed, 0);
        assert_eq!(
            fs.contents("f").unwrap(),
            b"int main()\n{\n    return 0;\n}\n"
        );
        assert_eq!(output, "patching file f\n");
    }

    #[test]
    fn test_context_add_file_hunk_applies() {
        let fs = MemFs::with(&[]);
        let (result, _) = apply(
            b"*** /dev/null\n--- created\n***************\n\
              *** 0 ****\n--- 1,2 ----\n+ first\n+ second\n",
            &fs,
            &Options::default(),
        );
        assert_eq!(result.unwrap().hunks_applied, 1);
        assert_eq!(fs.contents("created").unwrap(), b"first\nsecond\n");
    }

    #[test]
    fn test_context_reject_format() {
        let fs = MemFs::with(&[("f", b"unrelated\n")]);
        let (result, _) = apply(
            b"*** f\n--- f\n***************\n\
              *** 1,2 ****\n  one\n! two\n--- 1,2 ----\n  one\n! TWO\n",
            &fs,
            &Options::default(),
        );
        let report = result.unwrap();
        assert_eq!(report.hunks_failed, 1);
        let reject = fs.contents("f.rej").unwrap();
        assert!(reject.starts_with(b"*** f\n--- f\n***************\n"));
        assert!(reject.ends_with(b"*** 1,2 ****\n  one\n- two\n--- 1,2 ----\n  one\n+ TWO\n"));
    }

    #[test]
    fn test_remove_empty_files() {
        let fs = MemFs::with(&[("f", b"only\n")]);
        let options = Options {
            remove_empty_files: true,
            ..Options::default()
        };
        let (result, _) = apply(
            b"--- f\n+++ f\n@@ -1 +0,0 @@\n-only\n",
            &fs,
            &options,
        );
        assert_eq!(result.unwrap().hunks_applied, 1);
        assert_eq!(fs.contents("f"), None);
    }

    #[test]
    fn test_git_mode_applied() {
        let fs = MemFs::with(&[("script.sh", b"#!/bin/sh\n")]);
        let (result, _) = apply(
            b"diff --git a/script.sh b/script.sh\n\
              old mode 100644\nnew mode 100755\n",
            &fs,
            &Options::default(),
        );
        result.unwrap();
        assert_eq!(fs.mode_of("script.sh"), Some(0o755));
    }

    #[test]
    fn test_auto_strip_prefers_existing_file() {
        let fs = MemFs::with(&[("src/f.c", b"x\n")]);
        let mut patch = Patch {
            old_file_path: "a/src/f.c".to_string(),
            new_file_path: "b/src/f.c".to_string(),
            ..Default::default()
        };
        resolve_strip(&mut patch, None, &fs);
        assert_eq!(patch.old_file_path, "src/f.c");
        assert_eq!(patch.new_file_path, "src/f.c");
    }

    #[test]
    fn test_auto_strip_count_is_shared_between_sides() {
        // The old side names an existing file at strip 2. That count must
        // also govern the new side, even though the new side's own parent
        // directory exists untouched at strip 0.
        let fs = MemFs::with(&[("d/thing", b"x\n"), ("a/b/marker", b"m\n")]);
        let mut patch = Patch {
            operation: crate::patch::Operation::Rename,
            old_file_path: "x/y/d/thing".to_string(),
            new_file_path: "a/b/newname".to_string(),
            ..Default::default()
        };
        resolve_strip(&mut patch, None, &fs);
        assert_eq!(patch.old_file_path, "d/thing");
        assert_eq!(patch.new_file_path, "newname");
    }

    #[test]
    fn test_auto_strip_falls_back_to_basename() {
        let fs = MemFs::with(&[]);
        let mut patch = Patch {
            old_file_path: "a/b/c/d/thing".to_string(),
            new_file_path: "a/b/c/d/e/test".to_string(),
            ..Default::default()
        };
        resolve_strip(&mut patch, None, &fs);
        assert_eq!(patch.old_file_path, "thing");
        assert_eq!(patch.new_file_path, "test");
    }

    #[test]
    fn test_explicit_strip() {
        let fs = MemFs::with(&[]);
        let mut patch = Patch {
            old_file_path: "a/src/f.c".to_string(),
            new_file_path: "b/src/f.c".to_string(),
            ..Default::default()
        };
        resolve_strip(&mut patch, Some(1), &fs);
        assert_eq!(patch.old_file_path, "src/f.c");
        assert_eq!(patch.new_file_path, "src/f.c");
    }

    #[test]
    fn test_apply_all_exit_codes() {
        let fs = MemFs::with(&[("f", b"a\nb\nc\n")]);
        let mut out = Vec::new();
        let mut reporter = Reporter::new(&mut out);
        let code = apply_all(
            b"--- f\n+++ f\n@@ -1,3 +1,3 @@\n a\n-b\n+B\n c\n",
            &Options::default(),
            &fs,
            &mut reporter,
        );
        assert_eq!(code, EXIT_OK);

        let fs = MemFs::with(&[("f", b"unrelated\ncontent\nlines\n")]);
        let mut out = Vec::new();
        let mut reporter = Reporter::new(&mut out);
        let code = apply_all(
            b"--- f\n+++ f\n@@ -1,3 +1,3 @@\n a\n-b\n+B\n c\n",
            &Options::default(),
            &fs,
            &mut reporter,
        );
        assert_eq!(code, EXIT_REJECTS);

        let fs = MemFs::with(&[]);
        let mut out = Vec::new();
        let mut reporter = Reporter::new(&mut out);
        let code = apply_all(b"not a patch at all\n", &Options::default(), &fs, &mut reporter);
        assert_eq!(code, EXIT_ERROR);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Hmm...  I can't seem to find a patch in there anywhere.\n"
        );
    }

    #[test]
    fn test_apply_all_binary_patch_is_fatal_but_isolated() {
        let fs = MemFs::with(&[("f", b"x\n")]);
        let input = b"diff --git a/blob b/blob\nGIT binary patch\nliteral 4\nzabc\n\
                      diff --git a/f b/f\n--- a/f\n+++ b/f\n@@ -1 +1 @@\n-x\n+y\n";
        let mut out = Vec::new();
        let mut reporter = Reporter::new(&mut out);
        let code = apply_all(input, &Options::default(), &fs, &mut reporter);
        assert_eq!(code, EXIT_ERROR);
        // the later patch was still applied
        assert_eq!(fs.contents("f").unwrap(), b"y\n");
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("cannot apply binary patch"));
    }

    #[test]
    fn test_apply_all_status_banner() {
        let fs = MemFs::with(&[("f", b"a\nb\nc\n")]);
        let input = b"--- f\t2024-01-01\n+++ f\t2024-01-02\n@@ -1,3 +1,3 @@\n a\n-b\n+B\n c\n";
        let mut out = Vec::new();
        let mut reporter = Reporter::new(&mut out);
        apply_all(input, &Options::default(), &fs, &mut reporter);
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "Hmm...  Looks like a unified diff to me...\n\
             The text leading up to this was:\n\
             --------------------------\n\
             |--- f\t2024-01-01\n\
             |+++ f\t2024-01-02\n\
             --------------------------\n\
             patching file f\n"
        );
    }
}

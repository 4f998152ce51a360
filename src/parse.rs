//! Format detection and patch parsing.
//!
//! The detector reads a stream line by line, accumulating everything it
//! cannot classify as prologue, and commits to a format at the first line
//! that unambiguously belongs to a patch body. The per-format hunk parsers
//! then materialise every body as unified-shape [`Hunk`]s so the applicator
//! only ever sees one shape.

use crate::hunk::{
    parse_normal_range, parse_unified_range, string_to_line_number, Hunk, HunkLine, NormalKind,
    Range,
};
use crate::patch::{Format, Operation, Patch};
use once_cell::sync::Lazy;

/// Errors that can occur while parsing a patch
#[derive(Debug, PartialEq, Eq)]
pub enum ParseError {
    /// A range line violated its grammar
    MalformedRange(Vec<u8>),

    /// A hunk body disagreed with the declared line counts
    LineCountMismatch(&'static str, Vec<u8>),

    /// The stream ended in the middle of a hunk body
    UnexpectedEof,

    /// A git binary patch, which this crate recognises but cannot apply
    UnsupportedBinary,

    /// Any other structural failure
    PatchSyntax(&'static str, Vec<u8>),
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::MalformedRange(line) => {
                write!(f, "malformed hunk range: {}", String::from_utf8_lossy(line))
            }
            Self::LineCountMismatch(msg, line) => {
                write!(f, "{}: {}", msg, String::from_utf8_lossy(line))
            }
            Self::UnexpectedEof => write!(f, "unexpected end of patch in hunk body"),
            Self::UnsupportedBinary => write!(f, "cannot apply binary patch"),
            Self::PatchSyntax(msg, line) => {
                write!(f, "{}: {}", msg, String::from_utf8_lossy(line))
            }
        }
    }
}

impl std::error::Error for ParseError {}

/// Split lines but preserve trailing newlines
pub fn splitlines(data: &[u8]) -> impl Iterator<Item = &'_ [u8]> {
    let mut start = 0;
    std::iter::from_fn(move || {
        if start == data.len() {
            return None;
        }
        let end = data[start..]
            .iter()
            .position(|&b| b == b'\n')
            .map(|i| start + i + 1)
            .unwrap_or(data.len());
        let line = &data[start..end];
        start = end;
        Some(line)
    })
}


/// A line reader over an in-memory stream that remembers byte offsets, so
/// the detector can rewind to a committed position and the reporter can
/// replay the prologue.
pub struct LineScanner<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> LineScanner<'a> {
    /// Scan the given bytes from the start
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    /// Current byte offset
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Rewind (or advance) to a previously observed offset
    pub fn seek(&mut self, offset: usize) {
        debug_assert!(offset <= self.data.len());
        self.offset = offset;
    }

    /// The next line, terminator included, without consuming it
    pub fn peek_line(&self) -> Option<&'a [u8]> {
        if self.offset >= self.data.len() {
            return None;
        }
        let end = self.data[self.offset..]
            .iter()
            .position(|&b| b == b'\n')
            .map(|i| self.offset + i + 1)
            .unwrap_or(self.data.len());
        Some(&self.data[self.offset..end])
    }

    /// Consume and return the next line
    pub fn next_line(&mut self) -> Option<&'a [u8]> {
        let line = self.peek_line()?;
        self.offset += line.len();
        Some(line)
    }

    /// Whether the stream is exhausted
    pub fn at_eof(&self) -> bool {
        self.offset >= self.data.len()
    }
}

/// Where a patch's header and body sit in the input stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PatchHeaderInfo {
    /// Byte offset where scanning for this patch began
    pub header_start: usize,

    /// Byte offset where the hunk bodies begin; everything in
    /// `[header_start, body_start)` is the prologue
    pub body_start: usize,

    /// The committed format
    pub format: Format,
}

static BINARY_FILES_RE: Lazy<regex::bytes::Regex> =
    Lazy::new(|| lazy_regex::BytesRegex::new(r"^Binary files (.+) and (.+) differ").unwrap());

fn trim_newline(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\n").unwrap_or(line)
}

/// Decode a git-quoted path: `"a/name\twith\ttabs"`. Unquoted input is
/// returned verbatim.
fn unquote_path(raw: &[u8]) -> String {
    if raw.len() < 2 || raw[0] != b'"' {
        return String::from_utf8_lossy(raw).into_owned();
    }
    let mut out = Vec::with_capacity(raw.len());
    let mut bytes = raw[1..].iter().copied().peekable();
    while let Some(b) = bytes.next() {
        match b {
            b'"' => break,
            b'\\' => match bytes.next() {
                Some(b'n') => out.push(b'\n'),
                Some(b't') => out.push(b'\t'),
                Some(b'r') => out.push(b'\r'),
                Some(b'\\') => out.push(b'\\'),
                Some(b'"') => out.push(b'"'),
                Some(d @ b'0'..=b'7') => {
                    let mut value = (d - b'0') as u32;
                    for _ in 0..2 {
                        match bytes.peek() {
                            Some(&d @ b'0'..=b'7') => {
                                value = value * 8 + (d - b'0') as u32;
                                bytes.next();
                            }
                            _ => break,
                        }
                    }
                    out.push(value as u8);
                }
                Some(other) => out.push(other),
                None => break,
            },
            other => out.push(other),
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Split a `--- `/`+++ `/`*** ` header remainder into path and raw
/// timestamp; the timestamp begins at the first TAB.
fn header_path_and_time(rest: &[u8]) -> (String, Option<Vec<u8>>) {
    let rest = trim_newline(rest);
    match rest.iter().position(|&b| b == b'\t') {
        Some(i) => (unquote_path(&rest[..i]), Some(rest[i + 1..].to_vec())),
        None => (unquote_path(rest), None),
    }
}

fn parse_octal_mode(digits: &[u8]) -> Option<u32> {
    let s = std::str::from_utf8(trim_newline(digits)).ok()?;
    if s.is_empty() {
        return None;
    }
    u32::from_str_radix(s, 8).ok()
}

/// Split the remainder of a `diff --git a/old b/new` line into its two
/// paths. Quoted paths are unquoted; for unquoted paths the split point is
/// the last ` b/` so that the common case of space-free names always works.
fn parse_git_diff_paths(rest: &[u8]) -> (String, String) {
    let rest = trim_newline(rest);
    if rest.first() == Some(&b'"') {
        // "a/old" "b/new" or "a/old" b/new
        let old = unquote_path(rest);
        if let Some(end) = rest[1..].iter().position(|&b| b == b'"') {
            let remainder = &rest[end + 2..];
            let remainder = remainder.strip_prefix(b" ").unwrap_or(remainder);
            return (old, unquote_path(remainder));
        }
        return (old, String::new());
    }
    let split = rest
        .windows(3)
        .rposition(|w| w == b" b/")
        .map(|i| (i, i + 1));
    match split {
        Some((old_end, new_start)) => (
            String::from_utf8_lossy(&rest[..old_end]).into_owned(),
            String::from_utf8_lossy(&rest[new_start..]).into_owned(),
        ),
        None => (String::from_utf8_lossy(rest).into_owned(), String::new()),
    }
}

/// Parse the extended-header block that follows a `diff --git` line,
/// filling in operation, paths and modes. Leaves the scanner at the first
/// body line (or at the line that ends the block) and returns that offset.
fn parse_git_extended_headers(scanner: &mut LineScanner, patch: &mut Patch) -> usize {
    static INDEX_RE: Lazy<regex::bytes::Regex> = Lazy::new(|| {
        lazy_regex::BytesRegex::new(r"^index [0-9a-f]+\.\.[0-9a-f]+(?: ([0-7]+))?\s*$").unwrap()
    });

    // The extended header block is its own state; the caller commits to
    // Unified only once the body starts.
    patch.format = Format::Git;

    let mut rename_or_copy_paths = false;
    let mut header_old: Option<String> = None;
    let mut header_new: Option<String> = None;

    let body_start = loop {
        let line_start = scanner.offset();
        let Some(line) = scanner.peek_line() else {
            break scanner.offset();
        };
        if let Some(rest) = line.strip_prefix(b"old mode ") {
            patch.old_file_mode = parse_octal_mode(rest);
        } else if let Some(rest) = line.strip_prefix(b"new mode ") {
            patch.new_file_mode = parse_octal_mode(rest);
        } else if let Some(rest) = line.strip_prefix(b"new file mode ") {
            patch.operation = Operation::Add;
            patch.new_file_mode = parse_octal_mode(rest);
        } else if let Some(rest) = line.strip_prefix(b"deleted file mode ") {
            patch.operation = Operation::Delete;
            patch.old_file_mode = parse_octal_mode(rest);
        } else if let Some(rest) = line.strip_prefix(b"rename from ") {
            patch.operation = Operation::Rename;
            patch.old_file_path = unquote_path(trim_newline(rest));
            rename_or_copy_paths = true;
        } else if let Some(rest) = line.strip_prefix(b"rename to ") {
            patch.operation = Operation::Rename;
            patch.new_file_path = unquote_path(trim_newline(rest));
            rename_or_copy_paths = true;
        } else if let Some(rest) = line.strip_prefix(b"copy from ") {
            patch.operation = Operation::Copy;
            patch.old_file_path = unquote_path(trim_newline(rest));
            rename_or_copy_paths = true;
        } else if let Some(rest) = line.strip_prefix(b"copy to ") {
            patch.operation = Operation::Copy;
            patch.new_file_path = unquote_path(trim_newline(rest));
            rename_or_copy_paths = true;
        } else if line.starts_with(b"similarity index ")
            || line.starts_with(b"dissimilarity index ")
        {
            // advisory only
        } else if let Some(captures) = INDEX_RE.captures(line) {
            if let Some(mode) = captures.get(1) {
                patch.new_file_mode = parse_octal_mode(mode.as_bytes());
            }
        } else if line.starts_with(b"GIT binary patch") || BINARY_FILES_RE.is_match(line) {
            patch.operation = Operation::Binary;
            scanner.next_line();
            break scanner.offset();
        } else if let Some(rest) = line.strip_prefix(b"--- ") {
            let (path, time) = header_path_and_time(rest);
            header_old = Some(path);
            patch.old_file_time = time;
        } else if let Some(rest) = line.strip_prefix(b"+++ ") {
            let (path, time) = header_path_and_time(rest);
            header_new = Some(path);
            patch.new_file_time = time;
        } else {
            // Either the first body line (an @@ range) or the end of this
            // patch's header: a new diff, junk, or EOF.
            break line_start;
        }
        scanner.next_line();
    };

    // Directive paths win over the --- / +++ pair.
    if !rename_or_copy_paths {
        if let Some(old) = header_old {
            if !Patch::is_null_path(&old) {
                patch.old_file_path = old;
            } else {
                patch.old_file_path = String::new();
                if patch.operation == Operation::Change {
                    patch.operation = Operation::Add;
                }
            }
        }
        if let Some(new) = header_new {
            if !Patch::is_null_path(&new) {
                patch.new_file_path = new;
            } else {
                patch.new_file_path = String::new();
                if patch.operation == Operation::Change {
                    patch.operation = Operation::Delete;
                }
            }
        }
    }

    body_start
}

/// Classify the stream and consume the patch header.
///
/// Reads lines as "possible prologue" until one unambiguously starts a patch
/// body, filling `patch` with whatever the header declared. On return the
/// scanner sits at `body_start`. A stream with nothing recognisable yields
/// `Format::Unknown` with the scanner at end of input.
pub fn parse_patch_header(scanner: &mut LineScanner, patch: &mut Patch) -> PatchHeaderInfo {
    let header_start = scanner.offset();
    // A bare @@ range line is only a weak signal: it commits Unified at end
    // of stream, but any stronger trigger seen later takes precedence.
    let mut pending_unified: Option<usize> = None;

    let (format, body_start) = loop {
        let line_start = scanner.offset();
        let Some(line) = scanner.next_line() else {
            match pending_unified {
                Some(at) => break (Format::Unified, at),
                None => break (Format::Unknown, scanner.offset()),
            }
        };

        if let Some(rest) = line.strip_prefix(b"Index: ") {
            patch.index_file_path = unquote_path(trim_newline(rest));
            continue;
        }
        if let Some(rest) = line.strip_prefix(b"Prereq: ") {
            let token = trim_newline(rest);
            let token: Vec<u8> = token
                .iter()
                .copied()
                .skip_while(|b| b.is_ascii_whitespace())
                .take_while(|b| !b.is_ascii_whitespace())
                .collect();
            if !token.is_empty() {
                patch.prereq = Some(token);
            }
            continue;
        }

        if let Some(rest) = line.strip_prefix(b"--- ") {
            if scanner
                .peek_line()
                .map(|next| next.starts_with(b"+++ "))
                .unwrap_or(false)
            {
                let (old_path, old_time) = header_path_and_time(rest);
                let next = scanner.next_line().expect("peeked");
                let (new_path, new_time) =
                    header_path_and_time(next.strip_prefix(b"+++ ").expect("peeked"));
                apply_header_paths(patch, old_path, new_path);
                patch.old_file_time = old_time;
                patch.new_file_time = new_time;
                break (Format::Unified, scanner.offset());
            }
        }

        if let Some(rest) = line.strip_prefix(b"*** ") {
            if scanner
                .peek_line()
                .map(|next| next.starts_with(b"--- "))
                .unwrap_or(false)
            {
                let (old_path, old_time) = header_path_and_time(rest);
                let next = scanner.next_line().expect("peeked");
                let (new_path, new_time) =
                    header_path_and_time(next.strip_prefix(b"--- ").expect("peeked"));
                apply_header_paths(patch, old_path, new_path);
                patch.old_file_time = old_time;
                patch.new_file_time = new_time;
                break (Format::Context, scanner.offset());
            }
        }

        // A hunk separator with no *** / --- pair above it is still
        // unambiguously a context body; detection must classify the body
        // bytes the same way on a re-run.
        if trim_newline(line) == b"***************" {
            break (Format::Context, line_start);
        }

        if parse_normal_range(line).is_some() {
            break (Format::Normal, line_start);
        }

        if let Some(rest) = line.strip_prefix(b"diff --git ") {
            let (old, new) = parse_git_diff_paths(rest);
            // The diff line's own paths are the fallback when no directive
            // or --- / +++ pair names the file (pure mode changes).
            patch.old_file_path = old;
            patch.new_file_path = new;
            let body_start = parse_git_extended_headers(scanner, patch);
            break (Format::Unified, body_start);
        }

        if pending_unified.is_none() && parse_unified_range(line).is_some() {
            pending_unified = Some(line_start);
        }
    };

    scanner.seek(body_start);
    patch.format = format;
    if format == Format::Unified || format == Format::Context {
        if patch.operation == Operation::Change && Patch::is_null_path(&patch.old_file_path) {
            if !Patch::is_null_path(&patch.new_file_path) {
                patch.operation = Operation::Add;
            }
        } else if patch.operation == Operation::Change
            && Patch::is_null_path(&patch.new_file_path)
        {
            patch.operation = Operation::Delete;
        }
    }

    PatchHeaderInfo {
        header_start,
        body_start,
        format,
    }
}

fn apply_header_paths(patch: &mut Patch, old: String, new: String) {
    if !Patch::is_null_path(&old) {
        patch.old_file_path = old;
    }
    if !Patch::is_null_path(&new) {
        patch.new_file_path = new;
    }
}

/// Parse the hunk bodies for an already-classified patch, consuming lines
/// until the body no longer continues.
pub fn parse_hunks(scanner: &mut LineScanner, patch: &mut Patch) -> Result<(), ParseError> {
    if patch.operation == Operation::Binary {
        // Skip the payload so the stream can resynchronise on the next
        // patch before reporting the failure.
        skip_binary_payload(scanner);
        return Err(ParseError::UnsupportedBinary);
    }
    match patch.format {
        Format::Unified | Format::Git => parse_unified_hunks(scanner, patch),
        Format::Context => parse_context_hunks(scanner, patch),
        Format::Normal => parse_normal_hunks(scanner, patch),
        Format::Unknown => Ok(()),
    }
}

fn skip_binary_payload(scanner: &mut LineScanner) {
    while let Some(line) = scanner.peek_line() {
        if line == b"\n" || line.starts_with(b"diff ") {
            break;
        }
        scanner.next_line();
    }
}

fn parse_unified_hunks(scanner: &mut LineScanner, patch: &mut Patch) -> Result<(), ParseError> {
    loop {
        let start = scanner.offset();
        let Some(line) = scanner.next_line() else {
            break;
        };
        let Some((old_range, new_range, tail)) = parse_unified_range(line) else {
            scanner.seek(start);
            break;
        };
        if old_range.number_of_lines < 0 || new_range.number_of_lines < 0 {
            return Err(ParseError::MalformedRange(line.to_vec()));
        }
        let mut hunk = Hunk::new(old_range, new_range, tail);
        let mut old_seen = 0;
        let mut new_seen = 0;
        while old_seen < old_range.number_of_lines || new_seen < new_range.number_of_lines {
            let line = scanner.next_line().ok_or(ParseError::UnexpectedEof)?;
            if line.starts_with(b"\\") {
                strip_last_newline(&mut hunk, line)?;
                continue;
            }
            let hunk_line = HunkLine::parse_line(line).map_err(|_| {
                ParseError::LineCountMismatch(
                    "hunk body shorter than declared line counts",
                    line.to_vec(),
                )
            })?;
            if hunk_line.is_old() {
                old_seen += 1;
            }
            if hunk_line.is_new() {
                new_seen += 1;
            }
            hunk.lines.push(hunk_line);
        }
        if old_seen != old_range.number_of_lines || new_seen != new_range.number_of_lines {
            return Err(ParseError::LineCountMismatch(
                "hunk body longer than declared line counts",
                hunk.unified_header(),
            ));
        }
        consume_trailing_no_newline(scanner, &mut hunk)?;
        patch.hunks.push(hunk);
    }
    Ok(())
}

fn strip_last_newline(hunk: &mut Hunk, marker: &[u8]) -> Result<(), ParseError> {
    let stripped = hunk
        .lines
        .last_mut()
        .map(|line| line.strip_newline())
        .unwrap_or(false);
    if stripped {
        Ok(())
    } else {
        Err(ParseError::PatchSyntax(
            "no-newline marker without a preceding line",
            marker.to_vec(),
        ))
    }
}

fn consume_trailing_no_newline(
    scanner: &mut LineScanner,
    hunk: &mut Hunk,
) -> Result<(), ParseError> {
    if let Some(line) = scanner.peek_line() {
        if line.starts_with(b"\\") {
            let line = scanner.next_line().expect("peeked");
            strip_last_newline(hunk, line)?;
        }
    }
    Ok(())
}

/// One side of a context hunk body.
#[derive(Clone, Debug, PartialEq, Eq)]
enum ContextLine {
    Unchanged(Vec<u8>),
    Removed(Vec<u8>),
    Inserted(Vec<u8>),
    Changed(Vec<u8>),
}

fn parse_context_range(line: &[u8], prefix: &[u8], suffix: &[u8]) -> Option<Range> {
    let inner = trim_newline(line).strip_prefix(prefix)?.strip_suffix(suffix)?;
    let (first, last) = match inner.iter().position(|&b| b == b',') {
        Some(i) => (
            string_to_line_number(&inner[..i])?,
            string_to_line_number(&inner[i + 1..])?,
        ),
        None => {
            let n = string_to_line_number(inner)?;
            (n, n)
        }
    };
    if first == 0 && last == 0 {
        return Some(Range::new(0, 0));
    }
    if last < first {
        return None;
    }
    Some(Range::new(first, last - first + 1))
}

fn parse_context_body_line(line: &[u8], change_marker: u8) -> Option<ContextLine> {
    if line == b"\n" {
        return Some(ContextLine::Unchanged(line.to_vec()));
    }
    if line.len() < 2 {
        return None;
    }
    let content = line[2..].to_vec();
    match (line[0], line[1]) {
        (b' ', b' ') => Some(ContextLine::Unchanged(content)),
        (b'-', b' ') if change_marker == b'-' => Some(ContextLine::Removed(content)),
        (b'+', b' ') if change_marker == b'+' => Some(ContextLine::Inserted(content)),
        (b'!', b' ') => Some(ContextLine::Changed(content)),
        _ => None,
    }
}

fn read_context_side(
    scanner: &mut LineScanner,
    expected: i64,
    change_marker: u8,
) -> Result<Vec<ContextLine>, ParseError> {
    let mut lines: Vec<ContextLine> = Vec::new();
    while (lines.len() as i64) < expected {
        let Some(raw) = scanner.peek_line() else {
            // End of stream right after the range line: the side was
            // omitted. Mid-body it is a truncated hunk.
            if lines.is_empty() {
                return Ok(lines);
            }
            return Err(ParseError::UnexpectedEof);
        };
        if raw.starts_with(b"\\") {
            let raw = scanner.next_line().expect("peeked");
            match lines.last_mut() {
                Some(
                    ContextLine::Unchanged(bytes)
                    | ContextLine::Removed(bytes)
                    | ContextLine::Inserted(bytes)
                    | ContextLine::Changed(bytes),
                ) if bytes.ends_with(b"\n") => {
                    bytes.pop();
                }
                _ => {
                    return Err(ParseError::PatchSyntax(
                        "no-newline marker without a preceding line",
                        raw.to_vec(),
                    ))
                }
            }
            continue;
        }
        let Some(parsed) = parse_context_body_line(raw, change_marker) else {
            // An omitted side shows up as zero body lines.
            if lines.is_empty() {
                return Ok(lines);
            }
            return Err(ParseError::LineCountMismatch(
                "context hunk side shorter than its declared range",
                raw.to_vec(),
            ));
        };
        scanner.next_line();
        lines.push(parsed);
    }
    // Trailing no-newline marker after the side's last line.
    if let Some(raw) = scanner.peek_line() {
        if raw.starts_with(b"\\") {
            scanner.next_line();
            match lines.last_mut() {
                Some(
                    ContextLine::Unchanged(bytes)
                    | ContextLine::Removed(bytes)
                    | ContextLine::Inserted(bytes)
                    | ContextLine::Changed(bytes),
                ) if bytes.ends_with(b"\n") => {
                    bytes.pop();
                }
                _ => {
                    return Err(ParseError::PatchSyntax(
                        "no-newline marker without a preceding line",
                        raw.to_vec(),
                    ))
                }
            }
        }
    }
    Ok(lines)
}

fn reconstruct_omitted_side(
    other: &[ContextLine],
    expected: i64,
    header: &Hunk,
) -> Result<Vec<ContextLine>, ParseError> {
    let unchanged: Vec<ContextLine> = other
        .iter()
        .filter_map(|line| match line {
            ContextLine::Unchanged(bytes) => Some(ContextLine::Unchanged(bytes.clone())),
            _ => None,
        })
        .collect();
    if other
        .iter()
        .any(|line| matches!(line, ContextLine::Changed(_)))
    {
        return Err(ParseError::PatchSyntax(
            "changed lines with no matching side",
            header.unified_header(),
        ));
    }
    if unchanged.len() as i64 != expected {
        return Err(ParseError::LineCountMismatch(
            "context hunk side disagrees with its declared range",
            header.unified_header(),
        ));
    }
    Ok(unchanged)
}

/// Merge the two sides of a context hunk into unified-shape body lines.
///
/// Strict: the sides must agree byte-for-byte on unchanged context lines and
/// on the length of each `!` run.
fn merge_context_sides(
    old_side: Vec<ContextLine>,
    new_side: Vec<ContextLine>,
    header: &Hunk,
) -> Result<Vec<HunkLine>, ParseError> {
    let mut out = Vec::with_capacity(old_side.len() + new_side.len());
    let mut i = 0;
    let mut j = 0;
    while i < old_side.len() || j < new_side.len() {
        if let Some(ContextLine::Removed(bytes)) = old_side.get(i) {
            out.push(HunkLine::Remove(bytes.clone()));
            i += 1;
            continue;
        }
        if let Some(ContextLine::Inserted(bytes)) = new_side.get(j) {
            out.push(HunkLine::Insert(bytes.clone()));
            j += 1;
            continue;
        }
        let old_changed = matches!(old_side.get(i), Some(ContextLine::Changed(_)));
        let new_changed = matches!(new_side.get(j), Some(ContextLine::Changed(_)));
        if old_changed || new_changed {
            let old_run = old_side[i..]
                .iter()
                .take_while(|l| matches!(l, ContextLine::Changed(_)))
                .count();
            let new_run = new_side[j..]
                .iter()
                .take_while(|l| matches!(l, ContextLine::Changed(_)))
                .count();
            if old_run == 0 || new_run == 0 || old_run != new_run {
                return Err(ParseError::PatchSyntax(
                    "context hunk sides disagree on changed lines",
                    header.unified_header(),
                ));
            }
            for line in &old_side[i..i + old_run] {
                if let ContextLine::Changed(bytes) = line {
                    out.push(HunkLine::Remove(bytes.clone()));
                }
            }
            for line in &new_side[j..j + new_run] {
                if let ContextLine::Changed(bytes) = line {
                    out.push(HunkLine::Insert(bytes.clone()));
                }
            }
            i += old_run;
            j += new_run;
            continue;
        }
        match (old_side.get(i), new_side.get(j)) {
            (Some(ContextLine::Unchanged(old)), Some(ContextLine::Unchanged(new))) => {
                if old != new {
                    return Err(ParseError::PatchSyntax(
                        "context hunk sides disagree on a context line",
                        header.unified_header(),
                    ));
                }
                out.push(HunkLine::Context(old.clone()));
                i += 1;
                j += 1;
            }
            _ => {
                return Err(ParseError::PatchSyntax(
                    "context hunk sides are misaligned",
                    header.unified_header(),
                ));
            }
        }
    }
    Ok(out)
}

fn parse_context_hunks(scanner: &mut LineScanner, patch: &mut Patch) -> Result<(), ParseError> {
    loop {
        let start = scanner.offset();
        let Some(line) = scanner.next_line() else {
            break;
        };
        if trim_newline(line) != b"***************" {
            scanner.seek(start);
            break;
        }
        let old_line = scanner.next_line().ok_or(ParseError::UnexpectedEof)?;
        let old_range = parse_context_range(old_line, b"*** ", b" ****")
            .ok_or_else(|| ParseError::MalformedRange(old_line.to_vec()))?;

        let old_side = read_context_side(scanner, old_range.number_of_lines, b'-')?;

        let new_line = scanner.next_line().ok_or(ParseError::UnexpectedEof)?;
        let new_range = parse_context_range(new_line, b"--- ", b" ----")
            .ok_or_else(|| ParseError::MalformedRange(new_line.to_vec()))?;

        let new_side = read_context_side(scanner, new_range.number_of_lines, b'+')?;

        let mut hunk = Hunk::new(old_range, new_range, None);
        let (old_side, new_side) = match (old_side.is_empty(), new_side.is_empty()) {
            (false, false) => (old_side, new_side),
            (true, false) => {
                let reconstructed =
                    reconstruct_omitted_side(&new_side, old_range.number_of_lines, &hunk)?;
                (reconstructed, new_side)
            }
            (false, true) => {
                let reconstructed =
                    reconstruct_omitted_side(&old_side, new_range.number_of_lines, &hunk)?;
                (old_side, reconstructed)
            }
            (true, true) => {
                if old_range.number_of_lines != 0 || new_range.number_of_lines != 0 {
                    return Err(ParseError::LineCountMismatch(
                        "context hunk with no body lines",
                        old_line.to_vec(),
                    ));
                }
                (old_side, new_side)
            }
        };
        if old_side.len() as i64 != old_range.number_of_lines
            || new_side.len() as i64 != new_range.number_of_lines
        {
            return Err(ParseError::LineCountMismatch(
                "context hunk body disagrees with its declared ranges",
                old_line.to_vec(),
            ));
        }
        hunk.lines = merge_context_sides(old_side, new_side, &hunk)?;
        patch.hunks.push(hunk);
    }
    Ok(())
}

fn read_prefixed_line<'a>(line: &'a [u8], marker: u8) -> Option<&'a [u8]> {
    if line.len() >= 2 && line[0] == marker && line[1] == b' ' {
        Some(&line[2..])
    } else if line.len() == 2 && line[0] == marker && line[1] == b'\n' {
        // an empty source line is sometimes emitted without the pad space
        Some(b"\n")
    } else {
        None
    }
}

fn read_normal_side(
    scanner: &mut LineScanner,
    expected: i64,
    marker: u8,
) -> Result<Vec<Vec<u8>>, ParseError> {
    let mut lines: Vec<Vec<u8>> = Vec::new();
    while (lines.len() as i64) < expected {
        let Some(raw) = scanner.next_line() else {
            return Err(ParseError::UnexpectedEof);
        };
        if raw.starts_with(b"\\") {
            match lines.last_mut() {
                Some(last) if last.ends_with(b"\n") => {
                    last.pop();
                    continue;
                }
                _ => {
                    return Err(ParseError::PatchSyntax(
                        "no-newline marker without a preceding line",
                        raw.to_vec(),
                    ))
                }
            }
        }
        let Some(content) = read_prefixed_line(raw, marker) else {
            return Err(ParseError::LineCountMismatch(
                "normal hunk body shorter than its command implies",
                raw.to_vec(),
            ));
        };
        lines.push(content.to_vec());
    }
    if let Some(raw) = scanner.peek_line() {
        if raw.starts_with(b"\\") {
            scanner.next_line();
            match lines.last_mut() {
                Some(last) if last.ends_with(b"\n") => {
                    last.pop();
                }
                _ => {
                    return Err(ParseError::PatchSyntax(
                        "no-newline marker without a preceding line",
                        raw.to_vec(),
                    ))
                }
            }
        }
    }
    Ok(lines)
}

fn parse_normal_hunks(scanner: &mut LineScanner, patch: &mut Patch) -> Result<(), ParseError> {
    loop {
        let start = scanner.offset();
        let Some(line) = scanner.next_line() else {
            break;
        };
        let Some(command) = parse_normal_range(line) else {
            scanner.seek(start);
            break;
        };
        let old_range = command.old_range();
        let new_range = command.new_range();
        if old_range.number_of_lines < 0 || new_range.number_of_lines < 0 {
            return Err(ParseError::MalformedRange(line.to_vec()));
        }
        let mut hunk = Hunk::new(old_range, new_range, None);
        match command.kind {
            NormalKind::Add => {
                for content in read_normal_side(scanner, new_range.number_of_lines, b'>')? {
                    hunk.lines.push(HunkLine::Insert(content));
                }
            }
            NormalKind::Delete => {
                for content in read_normal_side(scanner, old_range.number_of_lines, b'<')? {
                    hunk.lines.push(HunkLine::Remove(content));
                }
            }
            NormalKind::Change => {
                for content in read_normal_side(scanner, old_range.number_of_lines, b'<')? {
                    hunk.lines.push(HunkLine::Remove(content));
                }
                let separator = scanner.next_line().ok_or(ParseError::UnexpectedEof)?;
                if trim_newline(separator) != b"---" {
                    return Err(ParseError::PatchSyntax(
                        "expected --- separator in change hunk",
                        separator.to_vec(),
                    ));
                }
                for content in read_normal_side(scanner, new_range.number_of_lines, b'>')? {
                    hunk.lines.push(HunkLine::Insert(content));
                }
            }
        }
        patch.hunks.push(hunk);
    }
    Ok(())
}

/// A parsed patch together with where it sat in the stream.
#[derive(Clone, Debug)]
pub struct ParsedPatch {
    /// The structured patch
    pub patch: Patch,

    /// Header and body offsets for prologue replay
    pub header: PatchHeaderInfo,
}

/// A parse failure, with the header offsets when classification had already
/// succeeded.
#[derive(Debug)]
pub struct PatchStreamError {
    /// Offsets of the failed patch's header, if it was classified
    pub header: Option<PatchHeaderInfo>,

    /// What went wrong
    pub error: ParseError,
}

impl std::fmt::Display for PatchStreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        self.error.fmt(f)
    }
}

impl std::error::Error for PatchStreamError {}

/// Iterate over every patch in a stream.
///
/// Garbage between patches becomes the next patch's prologue. A malformed
/// patch yields an error and the stream resynchronises at the next
/// classifiable header, so one bad patch does not prevent later ones from
/// being attempted.
pub fn iter_patches(input: &[u8]) -> impl Iterator<Item = Result<ParsedPatch, PatchStreamError>> + '_ {
    let mut scanner = LineScanner::new(input);
    std::iter::from_fn(move || loop {
        if scanner.at_eof() {
            return None;
        }
        let mut patch = Patch::default();
        let header = parse_patch_header(&mut scanner, &mut patch);
        if header.format == Format::Unknown {
            return None;
        }
        match parse_hunks(&mut scanner, &mut patch) {
            Ok(()) => {
                if patch.hunks.is_empty()
                    && patch.operation == Operation::Change
                    && patch.old_file_mode.is_none()
                    && patch.new_file_mode.is_none()
                    && patch.format != Format::Normal
                {
                    // A header with no hunks and no declared operation is
                    // noise, not a patch; keep scanning after it.
                    if scanner.at_eof() {
                        return Some(Err(PatchStreamError {
                            header: Some(header),
                            error: ParseError::PatchSyntax(
                                "patch header with no hunks",
                                input[header.header_start..header.body_start].to_vec(),
                            ),
                        }));
                    }
                    continue;
                }
                return Some(Ok(ParsedPatch { patch, header }));
            }
            Err(error) => {
                return Some(Err(PatchStreamError {
                    header: Some(header),
                    error,
                }))
            }
        }
    })
}

/// Parse a stream expected to contain exactly one patch.
pub fn parse_single_patch(input: &[u8]) -> Result<ParsedPatch, PatchStreamError> {
    iter_patches(input).next().unwrap_or(Err(PatchStreamError {
        header: None,
        error: ParseError::PatchSyntax("no patch found in input", Vec::new()),
    }))
}

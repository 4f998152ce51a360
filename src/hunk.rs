//! Hunk data model, range grammars and hunk renderers.

/// A line number in a patch header. Signed so that interfaces which need an
/// "unset" sentinel can carry `-1`.
pub type LineNumber = i64;

/// The string that indicates that a line has no newline
pub const NO_NL: &[u8] = b"\\ No newline at end of file\n";

/// A line range in one side of a hunk header.
///
/// An empty range (`number_of_lines == 0`) is legal and positional: the edit
/// applies after line `start_line`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Range {
    /// First line of the range (1-based; 0 only for empty ranges)
    pub start_line: LineNumber,

    /// Number of lines covered
    pub number_of_lines: LineNumber,
}

impl Range {
    /// Create a new range
    pub fn new(start_line: LineNumber, number_of_lines: LineNumber) -> Self {
        Self {
            start_line,
            number_of_lines,
        }
    }

    /// Whether this range covers no lines
    pub fn is_empty(&self) -> bool {
        self.number_of_lines == 0
    }

    /// Render in unified form: `N` for a single line, `N,M` otherwise
    pub fn unified_str(&self) -> String {
        if self.number_of_lines == 1 {
            format!("{}", self.start_line)
        } else {
            format!("{},{}", self.start_line, self.number_of_lines)
        }
    }

    /// Render in context/normal form: inclusive `first,last` line numbers
    pub fn inclusive_str(&self) -> String {
        if self.number_of_lines == 0 {
            format!("{}", self.start_line)
        } else if self.number_of_lines == 1 {
            format!("{}", self.start_line)
        } else {
            format!(
                "{},{}",
                self.start_line,
                self.start_line + self.number_of_lines - 1
            )
        }
    }
}

/// Parse a non-empty run of ASCII decimal digits into a line number.
///
/// No sign, no whitespace, no other characters; a value overflowing a signed
/// 64-bit accumulator is rejected.
pub fn string_to_line_number(s: &[u8]) -> Option<LineNumber> {
    if s.is_empty() {
        return None;
    }
    let mut value: LineNumber = 0;
    for &b in s {
        if !b.is_ascii_digit() {
            return None;
        }
        value = value
            .checked_mul(10)?
            .checked_add((b - b'0') as LineNumber)?;
    }
    Some(value)
}


/// Byte cursor shared by the range grammars.
struct Cursor<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(input: &'a [u8]) -> Self {
        Self { input, pos: 0 }
    }

    fn eat(&mut self, prefix: &[u8]) -> bool {
        if self.input[self.pos..].starts_with(prefix) {
            self.pos += prefix.len();
            true
        } else {
            false
        }
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn number(&mut self) -> Option<LineNumber> {
        let start = self.pos;
        while self
            .peek()
            .map(|b| b.is_ascii_digit())
            .unwrap_or(false)
        {
            self.pos += 1;
        }
        string_to_line_number(&self.input[start..self.pos])
    }

    fn rest(&self) -> &'a [u8] {
        &self.input[self.pos..]
    }

    fn at_end(&self) -> bool {
        self.pos == self.input.len()
    }
}

fn strip_line_terminator(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\n").unwrap_or(line)
}

/// One side of a unified `@@` line: `N` (count 1) or `N,M`.
fn unified_side(cursor: &mut Cursor) -> Option<Range> {
    let start = cursor.number()?;
    let count = if cursor.eat(b",") {
        cursor.number()?
    } else {
        1
    };
    Some(Range::new(start, count))
}

/// Parse a unified hunk range line.
///
/// The exact grammar is `"@@ -" old " +" new " @@"`, optionally followed by a
/// space and arbitrary trailing text (the section heading `diff -p` emits).
/// Anything else is rejected.
pub fn parse_unified_range(line: &[u8]) -> Option<(Range, Range, Option<Vec<u8>>)> {
    let mut cursor = Cursor::new(strip_line_terminator(line));
    if !cursor.eat(b"@@ -") {
        return None;
    }
    let old = unified_side(&mut cursor)?;
    if !cursor.eat(b" +") {
        return None;
    }
    let new = unified_side(&mut cursor)?;
    if !cursor.eat(b" @@") {
        return None;
    }
    if cursor.at_end() {
        return Some((old, new, None));
    }
    if cursor.eat(b" ") {
        return Some((old, new, Some(cursor.rest().to_vec())));
    }
    None
}


/// The command letter of a normal-format hunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NormalKind {
    /// `LaR[,R]`: lines added after old line L
    Add,

    /// `L[,L]cR[,R]`: old lines replaced by new lines
    Change,

    /// `L[,L]dR`: old lines deleted
    Delete,
}

/// A parsed normal-format command line, with inclusive line pairs kept as
/// written so that count validation can happen against the hunk body.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NormalCommand {
    /// Command letter
    pub kind: NormalKind,

    /// Old-side first line
    pub old_first: LineNumber,

    /// Old-side last line (equal to `old_first` when no comma was given)
    pub old_last: LineNumber,

    /// New-side first line
    pub new_first: LineNumber,

    /// New-side last line
    pub new_last: LineNumber,
}

impl NormalCommand {
    /// Old-side range in start/count form. Empty for `a` commands.
    pub fn old_range(&self) -> Range {
        match self.kind {
            NormalKind::Add => Range::new(self.old_first, 0),
            _ => Range::new(self.old_first, self.old_last - self.old_first + 1),
        }
    }

    /// New-side range in start/count form. Empty for `d` commands.
    pub fn new_range(&self) -> Range {
        match self.kind {
            NormalKind::Delete => Range::new(self.new_first, 0),
            _ => Range::new(self.new_first, self.new_last - self.new_first + 1),
        }
    }
}

fn normal_side(cursor: &mut Cursor) -> Option<(LineNumber, LineNumber, bool)> {
    let first = cursor.number()?;
    if cursor.eat(b",") {
        let last = cursor.number()?;
        Some((first, last, true))
    } else {
        Some((first, first, false))
    }
}

/// Parse a normal-format command line: `L[,L]{a|c|d}L[,L]`.
///
/// An `a` command's old side and a `d` command's new side are positions, not
/// ranges, so a comma there is rejected. Leading or trailing bytes of any
/// kind are rejected.
pub fn parse_normal_range(line: &[u8]) -> Option<NormalCommand> {
    let mut cursor = Cursor::new(strip_line_terminator(line));
    let (old_first, old_last, old_pair) = normal_side(&mut cursor)?;
    let kind = match cursor.peek()? {
        b'a' => NormalKind::Add,
        b'c' => NormalKind::Change,
        b'd' => NormalKind::Delete,
        _ => return None,
    };
    cursor.pos += 1;
    let (new_first, new_last, new_pair) = normal_side(&mut cursor)?;
    if !cursor.at_end() {
        return None;
    }
    if kind == NormalKind::Add && old_pair {
        return None;
    }
    if kind == NormalKind::Delete && new_pair {
        return None;
    }
    Some(NormalCommand {
        kind,
        old_first,
        old_last,
        new_first,
        new_last,
    })
}


/// A line in a hunk body.
///
/// The content carries its own terminating newline; a line whose content does
/// not end in `\n` is the "no newline at end of file" state, and the
/// renderers follow it with the `\ No newline at end of file` marker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HunkLine {
    /// A line present in both images, used to locate the hunk
    Context(Vec<u8>),

    /// A line added by the patch
    Insert(Vec<u8>),

    /// A line removed by the patch
    Remove(Vec<u8>),
}

impl HunkLine {
    /// The unified marker byte for this line
    pub fn marker(&self) -> u8 {
        match self {
            Self::Context(_) => b' ',
            Self::Insert(_) => b'+',
            Self::Remove(_) => b'-',
        }
    }

    /// The line content, terminator included when present
    pub fn contents(&self) -> &[u8] {
        match self {
            Self::Context(bytes) | Self::Insert(bytes) | Self::Remove(bytes) => bytes,
        }
    }

    fn contents_mut(&mut self) -> &mut Vec<u8> {
        match self {
            Self::Context(bytes) | Self::Insert(bytes) | Self::Remove(bytes) => bytes,
        }
    }

    /// Drop the terminating newline, recording that the line ends the file
    /// without one. Returns false if there was no terminator to drop.
    pub fn strip_newline(&mut self) -> bool {
        let contents = self.contents_mut();
        if contents.ends_with(b"\n") {
            contents.pop();
            true
        } else {
            false
        }
    }

    /// Whether this line counts against the old image
    pub fn is_old(&self) -> bool {
        matches!(self, Self::Context(_) | Self::Remove(_))
    }

    /// Whether this line counts against the new image
    pub fn is_new(&self) -> bool {
        matches!(self, Self::Context(_) | Self::Insert(_))
    }

    /// Serialize in unified form, appending the no-newline marker when the
    /// content lacks a terminator
    pub fn as_bytes(&self) -> Vec<u8> {
        let contents = self.contents();
        let mut out = Vec::with_capacity(contents.len() + 2);
        out.push(self.marker());
        out.extend_from_slice(contents);
        if !contents.ends_with(b"\n") {
            out.push(b'\n');
            out.extend_from_slice(NO_NL);
        }
        out
    }

    /// Classify a unified body line by its first byte. A bare `\n` is an
    /// empty context line, which some diff generators emit.
    pub fn parse_line(line: &[u8]) -> Result<Self, MalformedLine> {
        if line == b"\n" {
            Ok(Self::Context(line.to_vec()))
        } else if let Some(rest) = line.strip_prefix(b" ") {
            Ok(Self::Context(rest.to_vec()))
        } else if let Some(rest) = line.strip_prefix(b"+") {
            Ok(Self::Insert(rest.to_vec()))
        } else if let Some(rest) = line.strip_prefix(b"-") {
            Ok(Self::Remove(rest.to_vec()))
        } else {
            Err(MalformedLine(line.to_vec()))
        }
    }
}

/// An error that occurs when classifying a hunk body line
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MalformedLine(pub Vec<u8>);

impl std::fmt::Display for MalformedLine {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "Malformed line: {:?}", String::from_utf8_lossy(&self.0))
    }
}

impl std::error::Error for MalformedLine {}

#[cfg(test)]
mod hunkline_tests {
    use super::{HunkLine, MalformedLine};

    #[test]
    fn test_parse_line() {
        assert_eq!(
            HunkLine::parse_line(b" foo\n").unwrap(),
            HunkLine::Context(b"foo\n".to_vec())
        );
        assert_eq!(
            HunkLine::parse_line(b"-foo\n").unwrap(),
            HunkLine::Remove(b"foo\n".to_vec())
        );
        assert_eq!(
            HunkLine::parse_line(b"+foo\n").unwrap(),
            HunkLine::Insert(b"foo\n".to_vec())
        );
        assert_eq!(
            HunkLine::parse_line(b"\n").unwrap(),
            HunkLine::Context(b"\n".to_vec())
        );
        assert_eq!(
            HunkLine::parse_line(b"aaaaa\n").unwrap_err(),
            MalformedLine(b"aaaaa\n".to_vec())
        );
    }

    #[test]
    fn test_as_bytes() {
        assert_eq!(HunkLine::Context(b"foo\n".to_vec()).as_bytes(), b" foo\n");
        assert_eq!(HunkLine::Insert(b"foo\n".to_vec()).as_bytes(), b"+foo\n");
        assert_eq!(HunkLine::Remove(b"foo\n".to_vec()).as_bytes(), b"-foo\n");
    }

    #[test]
    fn test_as_bytes_no_newline() {
        assert_eq!(
            HunkLine::Insert(b"foo".to_vec()).as_bytes(),
            b"+foo\n\\ No newline at end of file\n"
        );
    }
}

/// One localised edit: a pair of ranges plus the interleaved old/new lines.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Hunk {
    /// Where the edit applies in the old file
    pub old_range: Range,

    /// Where the edit lands in the new file
    pub new_range: Range,

    /// Trailing text of the unified `@@` line, if any
    pub tail: Option<Vec<u8>>,

    /// Body lines in input order
    pub lines: Vec<HunkLine>,
}

impl Hunk {
    /// Create an empty hunk with the given ranges
    pub fn new(old_range: Range, new_range: Range, tail: Option<Vec<u8>>) -> Self {
        Self {
            old_range,
            new_range,
            tail,
            lines: Vec::new(),
        }
    }

    /// The old-image projection: context and removed lines, in order
    pub fn old_lines(&self) -> impl Iterator<Item = &[u8]> {
        self.lines
            .iter()
            .filter(|l| l.is_old())
            .map(|l| l.contents())
    }

    /// The new-image projection: context and inserted lines, in order
    pub fn new_lines(&self) -> impl Iterator<Item = &[u8]> {
        self.lines
            .iter()
            .filter(|l| l.is_new())
            .map(|l| l.contents())
    }

    /// Check the counting invariant: old lines match the old range, new
    /// lines match the new range
    pub fn counts_match(&self) -> bool {
        let old = self.lines.iter().filter(|l| l.is_old()).count() as LineNumber;
        let new = self.lines.iter().filter(|l| l.is_new()).count() as LineNumber;
        old == self.old_range.number_of_lines && new == self.new_range.number_of_lines
    }

    /// Swap the two sides, turning the hunk into its own inverse
    pub fn reversed(&self) -> Self {
        Self {
            old_range: self.new_range,
            new_range: self.old_range,
            tail: self.tail.clone(),
            lines: self
                .lines
                .iter()
                .map(|line| match line {
                    HunkLine::Context(bytes) => HunkLine::Context(bytes.clone()),
                    HunkLine::Insert(bytes) => HunkLine::Remove(bytes.clone()),
                    HunkLine::Remove(bytes) => HunkLine::Insert(bytes.clone()),
                })
                .collect(),
        }
    }

    /// The unified `@@` header line for this hunk
    pub fn unified_header(&self) -> Vec<u8> {
        let mut header = format!(
            "@@ -{} +{} @@",
            self.old_range.unified_str(),
            self.new_range.unified_str()
        )
        .into_bytes();
        if let Some(tail) = &self.tail {
            header.push(b' ');
            header.extend_from_slice(tail);
        }
        header.push(b'\n');
        header
    }

    /// Write this hunk in unified form
    pub fn write_unified<W: std::io::Write>(&self, w: &mut W) -> std::io::Result<()> {
        w.write_all(&self.unified_header())?;
        for line in &self.lines {
            w.write_all(&line.as_bytes())?;
        }
        Ok(())
    }

    /// Serialize this hunk in unified form
    pub fn as_unified_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        self.write_unified(&mut bytes).expect("write to Vec");
        bytes
    }

    /// Write this hunk in context form.
    ///
    /// The canonical rendering: context plus `- `/`+ ` bodies, with an
    /// unchanged side's body omitted the way `diff -c` omits it.
    pub fn write_context<W: std::io::Write>(&self, w: &mut W) -> std::io::Result<()> {
        let has_removes = self.lines.iter().any(|l| matches!(l, HunkLine::Remove(_)));
        let has_inserts = self.lines.iter().any(|l| matches!(l, HunkLine::Insert(_)));

        w.write_all(b"***************\n")?;
        w.write_all(format!("*** {} ****\n", self.old_range.inclusive_str()).as_bytes())?;
        if has_removes {
            for line in &self.lines {
                match line {
                    HunkLine::Context(bytes) => write_context_body(w, b"  ", bytes)?,
                    HunkLine::Remove(bytes) => write_context_body(w, b"- ", bytes)?,
                    HunkLine::Insert(_) => {}
                }
            }
        }
        w.write_all(format!("--- {} ----\n", self.new_range.inclusive_str()).as_bytes())?;
        if has_inserts {
            for line in &self.lines {
                match line {
                    HunkLine::Context(bytes) => write_context_body(w, b"  ", bytes)?,
                    HunkLine::Insert(bytes) => write_context_body(w, b"+ ", bytes)?,
                    HunkLine::Remove(_) => {}
                }
            }
        }
        Ok(())
    }

    /// Write this hunk in normal form: `< `/`> ` bodies under the command
    /// line implied by the ranges.
    pub fn write_normal<W: std::io::Write>(&self, w: &mut W) -> std::io::Result<()> {
        let cmd = if self.old_range.is_empty() {
            b'a'
        } else if self.new_range.is_empty() {
            b'd'
        } else {
            b'c'
        };
        w.write_all(
            format!(
                "{}{}{}\n",
                self.old_range.inclusive_str(),
                cmd as char,
                self.new_range.inclusive_str()
            )
            .as_bytes(),
        )?;
        for line in &self.lines {
            if let HunkLine::Remove(bytes) = line {
                write_context_body(w, b"< ", bytes)?;
            }
        }
        if cmd == b'c' {
            w.write_all(b"---\n")?;
        }
        for line in &self.lines {
            if let HunkLine::Insert(bytes) = line {
                write_context_body(w, b"> ", bytes)?;
            }
        }
        Ok(())
    }
}

fn write_context_body<W: std::io::Write>(
    w: &mut W,
    prefix: &[u8],
    contents: &[u8],
) -> std::io::Result<()> {
    w.write_all(prefix)?;
    w.write_all(contents)?;
    if !contents.ends_with(b"\n") {
        w.write_all(b"\n")?;
        w.write_all(NO_NL)?;
    }
    Ok(())
}

//! Deterministic status output and the exit-code policy.
//!
//! Every message here is part of the tool's observable surface and is kept
//! byte-compatible with the classical `patch` phrasing; nothing in this
//! module goes through the `log` facade.

use crate::parse::splitlines;
use crate::patch::Format;
use std::io::Write;

/// All hunks applied cleanly
pub const EXIT_OK: i32 = 0;

/// At least one hunk was rejected
pub const EXIT_REJECTS: i32 = 1;

/// Unrecoverable: malformed patch, I/O failure, unsupported binary
pub const EXIT_ERROR: i32 = 2;

const PROLOGUE_FENCE: &[u8] = b"--------------------------\n";

/// Status sink injected by the caller. A reporter without a sink swallows
/// everything, for embedders that only want the structured results.
pub struct Reporter<'a> {
    sink: Option<&'a mut dyn Write>,
}

impl<'a> Reporter<'a> {
    /// Report to the given sink
    pub fn new(sink: &'a mut dyn Write) -> Self {
        Self { sink: Some(sink) }
    }

    /// Discard all status output
    pub fn silent() -> Self {
        Self { sink: None }
    }

    fn emit(&mut self, bytes: &[u8]) {
        if let Some(sink) = self.sink.as_mut() {
            let _ = sink.write_all(bytes);
        }
    }

    /// The format-detection banner, followed by the prologue block when any
    /// prologue bytes exist
    pub fn format_detected(&mut self, format: Format, prologue: &[u8]) {
        let name = match format {
            Format::Context => "context",
            Format::Normal => "normal",
            // Git extended headers carry a unified body
            _ => "unified",
        };
        self.emit(format!("Hmm...  Looks like a {} diff to me...\n", name).as_bytes());
        if !prologue.is_empty() {
            self.emit(b"The text leading up to this was:\n");
            self.emit(PROLOGUE_FENCE);
            for line in splitlines(prologue) {
                self.emit(b"|");
                self.emit(line);
                if !line.ends_with(b"\n") {
                    self.emit(b"\n");
                }
            }
            self.emit(PROLOGUE_FENCE);
        }
    }

    /// Nothing in the stream could be classified
    pub fn no_patch_found(&mut self) {
        self.emit(b"Hmm...  I can't seem to find a patch in there anywhere.\n");
    }

    /// Announce the target before its hunks are processed
    pub fn patching_file(&mut self, file: &str, dry_run: bool, renamed_from: Option<&str>) {
        let verb = if dry_run { "checking" } else { "patching" };
        match renamed_from {
            Some(old) => {
                self.emit(format!("{} file {} (renamed from {})\n", verb, file, old).as_bytes())
            }
            None => self.emit(format!("{} file {}\n", verb, file).as_bytes()),
        }
    }

    /// A hunk that needed an offset or fuzz to land. Hunks that apply at
    /// their declared position are not reported.
    pub fn hunk_succeeded(&mut self, number: usize, line: i64, fuzz: usize, offset: i64) {
        if fuzz == 0 && offset == 0 {
            return;
        }
        let mut msg = format!("Hunk #{} succeeded at {}", number, line);
        if fuzz > 0 {
            msg.push_str(&format!(" with fuzz {}", fuzz));
        }
        if offset != 0 {
            let unit = if offset.abs() == 1 { "line" } else { "lines" };
            msg.push_str(&format!(" (offset {} {})", offset, unit));
        }
        msg.push_str(".\n");
        self.emit(msg.as_bytes());
    }

    /// A hunk that could not be placed within the fuzz budget
    pub fn hunk_failed(&mut self, number: usize, line: i64) {
        self.emit(format!("Hunk #{} FAILED at line {}.\n", number, line).as_bytes());
    }

    /// Per-file failure tally, emitted after the last hunk when any failed
    pub fn rejects_saved(&mut self, failed: usize, total: usize, reject_file: &str) {
        let unit = if total == 1 { "hunk" } else { "hunks" };
        self.emit(
            format!(
                "{} out of {} {} FAILED -- saving rejects to file {}\n",
                failed, total, unit, reject_file
            )
            .as_bytes(),
        );
    }

    /// A fatal per-patch failure; prefixed with the target name when known
    pub fn patch_failed(&mut self, file: Option<&str>, message: &str) {
        match file {
            Some(file) => self.emit(format!("{}: {}\n", file, message).as_bytes()),
            None => self.emit(format!("{}\n", message).as_bytes()),
        }
    }

    /// A non-fatal warning, same prefix convention
    pub fn warn(&mut self, file: Option<&str>, message: &str) {
        self.patch_failed(file, message);
    }
}

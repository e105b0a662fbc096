//! Diagnostics.
//!
//! Errors are values on a queue, never control flow: no phase aborts on a user error.
//! Each error belongs to an [`ErrorClass`] with a stable numeric code and a minimum
//! strictness level; reporting against a file below that level silences the error.
//! Workers push onto the queue from any thread and the driver drains whole-file
//! batches, so output is never interleaved across files.

use std::fmt;

use crossbeam_channel::{Receiver, Sender, unbounded};

use crate::{
    files::StrictLevel,
    loc::{FileRef, Loc},
};

/// A category of diagnostic with a stable numeric code.
///
/// `min_level` is the lowest file strictness at which this class is reported;
/// below it the error is silenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ErrorClass {
    pub code: u16,
    pub min_level: StrictLevel,
}

impl ErrorClass {
    const fn new(code: u16, min_level: StrictLevel) -> Self {
        Self { code, min_level }
    }
}

/// All known error classes, grouped by the phase that raises them. Codes are stable
/// and never reused.
pub mod classes {
    use super::ErrorClass;
    use crate::files::StrictLevel;

    pub mod internal {
        use super::*;
        /// Catch-all for invariant violations caught at a file boundary.
        pub const INTERNAL_ERROR: ErrorClass = ErrorClass::new(1001, StrictLevel::False);
    }

    pub mod parser {
        use super::*;
        pub const PARSER_ERROR: ErrorClass = ErrorClass::new(2001, StrictLevel::False);
    }

    pub mod desugar {
        use super::*;
        pub const UNSUPPORTED_NODE: ErrorClass = ErrorClass::new(3001, StrictLevel::False);
        pub const NO_CONSTANT_REASSIGNMENT: ErrorClass = ErrorClass::new(3002, StrictLevel::False);
        pub const INTEGER_OUT_OF_RANGE: ErrorClass = ErrorClass::new(3003, StrictLevel::False);
        pub const FLOAT_OUT_OF_RANGE: ErrorClass = ErrorClass::new(3004, StrictLevel::False);
        pub const INVALID_SINGLETON_DEF: ErrorClass = ErrorClass::new(3005, StrictLevel::False);
    }

    pub mod namer {
        use super::*;
        pub const INCLUDE_MULTIPLE_PARAM: ErrorClass = ErrorClass::new(4001, StrictLevel::False);
        pub const INCLUDE_NOT_CONSTANT: ErrorClass = ErrorClass::new(4002, StrictLevel::False);
        pub const INCLUDE_PASSED_BLOCK: ErrorClass = ErrorClass::new(4003, StrictLevel::False);
        pub const REDEFINITION_OF_METHOD: ErrorClass = ErrorClass::new(4010, StrictLevel::True);
    }

    pub mod resolver {
        use super::*;
        pub const STUB_CONSTANT: ErrorClass = ErrorClass::new(5001, StrictLevel::False);
    }

    pub mod cfg {
        use super::*;
        pub const NO_NEXT_SCOPE: ErrorClass = ErrorClass::new(6001, StrictLevel::False);
    }

    pub mod infer {
        use super::*;
        pub const PINNED_VARIABLE_MISMATCH: ErrorClass = ErrorClass::new(7001, StrictLevel::True);
        pub const METHOD_ARGUMENT_MISMATCH: ErrorClass = ErrorClass::new(7002, StrictLevel::True);
        pub const UNKNOWN_METHOD: ErrorClass = ErrorClass::new(7003, StrictLevel::True);
        pub const METHOD_ARGUMENT_COUNT_MISMATCH: ErrorClass = ErrorClass::new(7004, StrictLevel::True);
        pub const RETURN_TYPE_MISMATCH: ErrorClass = ErrorClass::new(7005, StrictLevel::True);
        pub const DEAD_BRANCH_INFERENCER: ErrorClass = ErrorClass::new(7006, StrictLevel::True);
        pub const CAST_TYPE_MISMATCH: ErrorClass = ErrorClass::new(7007, StrictLevel::True);
        pub const BARE_TYPE_USAGE: ErrorClass = ErrorClass::new(7009, StrictLevel::True);
        pub const INCOMPLETE_TYPE: ErrorClass = ErrorClass::new(7011, StrictLevel::True);
        pub const GLOBAL_REASSIGNMENT_TYPE_MISMATCH: ErrorClass = ErrorClass::new(7012, StrictLevel::True);
        pub const FIELD_REASSIGNMENT_TYPE_MISMATCH: ErrorClass = ErrorClass::new(7013, StrictLevel::True);
    }
}

/// A detail block under an error's header line, e.g. "Expected ..." with the
/// declaration location, or "Got ... originating from ..." with every origin.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ErrorSection {
    pub header: String,
    pub locs: Vec<Loc>,
}

impl ErrorSection {
    pub fn new(header: impl Into<String>, locs: Vec<Loc>) -> Self {
        Self {
            header: header.into(),
            locs,
        }
    }
}

/// One diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Error {
    pub class: ErrorClass,
    pub loc: Loc,
    pub header: String,
    pub sections: Vec<ErrorSection>,
}

impl Error {
    pub fn new(class: ErrorClass, loc: Loc, header: impl Into<String>) -> Self {
        Self {
            class,
            loc,
            header: header.into(),
            sections: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_section(mut self, section: ErrorSection) -> Self {
        self.sections.push(section);
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}] {}", self.loc, self.class.code, self.header)?;
        for section in &self.sections {
            write!(f, "\n  {}", section.header)?;
            for loc in &section.locs {
                write!(f, "\n    at {loc}")?;
            }
        }
        Ok(())
    }
}

/// Sending half of the error queue; cheap to clone into workers and GlobalState
/// copies.
#[derive(Debug, Clone)]
pub(crate) struct ErrorSink {
    sender: Sender<Error>,
}

impl ErrorSink {
    pub fn push(&self, error: Error) {
        // The receiver lives as long as the driver; a send can only fail during
        // teardown, at which point the error has nowhere to go anyway.
        let _ = self.sender.send(error);
    }
}

/// The MPSC error queue. Workers push through [`ErrorSink`] clones; the driver
/// drains per-file batches.
#[derive(Debug)]
pub struct ErrorQueue {
    sender: Sender<Error>,
    receiver: Receiver<Error>,
    /// Errors drained from the channel but not yet flushed to the caller.
    pending: Vec<Error>,
}

impl Default for ErrorQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorQueue {
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self {
            sender,
            receiver,
            pending: Vec::new(),
        }
    }

    pub(crate) fn sink(&self) -> ErrorSink {
        ErrorSink {
            sender: self.sender.clone(),
        }
    }

    fn pull(&mut self) {
        self.pending.extend(self.receiver.try_iter());
    }

    /// Takes every pending error for one file, in source order.
    pub fn flush_file(&mut self, file: FileRef) -> Vec<Error> {
        self.pull();
        let mut batch: Vec<Error> = Vec::new();
        self.pending.retain(|e| {
            if e.loc.file == file {
                batch.push(e.clone());
                false
            } else {
                true
            }
        });
        batch.sort_by_key(|e| (e.loc.begin, e.loc.end, e.class.code));
        batch
    }

    /// Takes everything, grouped by file then source order. Flushed unconditionally
    /// on teardown.
    pub fn flush_all(&mut self) -> Vec<Error> {
        self.pull();
        let mut batch = std::mem::take(&mut self.pending);
        batch.sort_by_key(|e| (e.loc.file, e.loc.begin, e.loc.end, e.class.code));
        batch
    }

    /// True when nothing has been reported since the last flush.
    pub fn is_empty(&mut self) -> bool {
        self.pull();
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loc::FileRef;

    #[test]
    fn flush_file_takes_only_that_file() {
        let mut queue = ErrorQueue::new();
        let sink = queue.sink();
        let f0 = FileRef::from_index(0);
        let f1 = FileRef::from_index(1);
        sink.push(Error::new(classes::infer::UNKNOWN_METHOD, Loc::new(f1, 5, 6), "b"));
        sink.push(Error::new(classes::infer::UNKNOWN_METHOD, Loc::new(f0, 9, 10), "a2"));
        sink.push(Error::new(classes::infer::UNKNOWN_METHOD, Loc::new(f0, 1, 2), "a1"));

        let batch = queue.flush_file(f0);
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].header, "a1");
        assert_eq!(batch[1].header, "a2");

        let rest = queue.flush_all();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].header, "b");
    }

    #[test]
    fn display_includes_code_and_sections() {
        let f0 = FileRef::from_index(0);
        let err = Error::new(classes::infer::RETURN_TYPE_MISMATCH, Loc::new(f0, 3, 7), "bad return")
            .with_section(ErrorSection::new("Expected `Integer`", vec![Loc::new(f0, 0, 2)]));
        let text = err.to_string();
        assert!(text.contains("[7005]"));
        assert!(text.contains("bad return"));
        assert!(text.contains("Expected `Integer`"));
    }
}

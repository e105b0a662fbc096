//! Source locations.
//!
//! A [`Loc`] is a byte range within a file, identified by [`FileRef`]. Locations are
//! carried on every AST node and CFG binding so diagnostics can point back at source.
//! Line and column numbers are computed on demand from the file's line index; nothing
//! in the pipeline needs them until an error is rendered.

use std::fmt;

/// Index of a file in `GlobalState`'s file table.
///
/// Uses `u32` to save space. `FileRef::NONE` is a sentinel used by synthetic
/// locations that do not belong to any file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct FileRef(u32);

impl FileRef {
    pub const NONE: Self = Self(u32::MAX);

    pub(crate) fn from_index(index: usize) -> Self {
        Self(u32::try_from(index).expect("file table overflow"))
    }

    /// Returns the raw index value.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub fn exists(self) -> bool {
        self != Self::NONE
    }
}

/// A byte range in a source file.
///
/// `begin` and `end` are byte offsets; `end` is exclusive. The distinguished
/// [`Loc::NONE`] is used for sentinel positions (notably `EmptyTree`); everything
/// else produced by desugar must carry a real range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Loc {
    pub file: FileRef,
    pub begin: u32,
    pub end: u32,
}

impl Loc {
    pub const NONE: Self = Self {
        file: FileRef::NONE,
        begin: 0,
        end: 0,
    };

    pub fn new(file: FileRef, begin: u32, end: u32) -> Self {
        debug_assert!(begin <= end, "inverted location {begin}..{end}");
        Self { file, begin, end }
    }

    #[inline]
    pub fn exists(self) -> bool {
        self.file.exists()
    }

    /// Extends this location to cover `other`. Either side may be `NONE`, in which
    /// case the other side wins.
    pub fn join(self, other: Self) -> Self {
        if !self.exists() {
            return other;
        }
        if !other.exists() {
            return self;
        }
        debug_assert_eq!(self.file, other.file, "joining locations across files");
        Self {
            file: self.file,
            begin: self.begin.min(other.begin),
            end: self.end.max(other.end),
        }
    }

    /// Renders as `begin..end` without file context, for the compact debug forms.
    pub(crate) fn show_range(self) -> String {
        if self.exists() {
            format!("{}..{}", self.begin, self.end)
        } else {
            "???".to_owned()
        }
    }
}

impl fmt::Display for Loc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.show_range())
    }
}

/// A 1-based line and column position, computed from a line index when rendering
/// diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct LineCol {
    pub line: u32,
    pub col: u32,
}

/// Converts a byte offset into a line/column pair using a precomputed table of
/// newline offsets (one entry per `\n` in the source).
pub(crate) fn offset_to_line_col(line_ends: &[u32], offset: u32) -> LineCol {
    let line = line_ends.partition_point(|&e| e < offset);
    let line_start = if line == 0 { 0 } else { line_ends[line - 1] + 1 };
    LineCol {
        line: u32::try_from(line).expect("line count overflow") + 1,
        col: offset - line_start + 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_prefers_existing_side() {
        let file = FileRef::from_index(0);
        let a = Loc::new(file, 4, 9);
        assert_eq!(Loc::NONE.join(a), a);
        assert_eq!(a.join(Loc::NONE), a);
    }

    #[test]
    fn join_covers_both_ranges() {
        let file = FileRef::from_index(0);
        let a = Loc::new(file, 4, 9);
        let b = Loc::new(file, 12, 20);
        let joined = a.join(b);
        assert_eq!((joined.begin, joined.end), (4, 20));
    }

    #[test]
    fn line_col_from_offsets() {
        // "ab\ncd\n"
        let line_ends = [2, 5];
        assert_eq!(offset_to_line_col(&line_ends, 0), LineCol { line: 1, col: 1 });
        assert_eq!(offset_to_line_col(&line_ends, 3), LineCol { line: 2, col: 1 });
        assert_eq!(offset_to_line_col(&line_ends, 4), LineCol { line: 2, col: 2 });
    }
}

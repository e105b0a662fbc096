//! Source files and strictness levels.
//!
//! A [`File`] is one source unit: path, text, and the strictness level that decides
//! how much of the pipeline runs over it. The level comes from a `# typed:` sigil in
//! the file's leading comment block, possibly overridden by the driver.

use strum::{EnumString, IntoStaticStr};

use crate::loc::FileRef;

/// How strictly a file is checked, lowest to highest.
///
/// `Ignore` parses the sigil but skips everything else: the file produces an empty
/// lifted class definition and no analysis runs. CFG construction and inference run
/// only at `True` and above.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    EnumString,
    IntoStaticStr,
    serde::Serialize,
    serde::Deserialize,
)]
#[strum(serialize_all = "lowercase")]
pub enum StrictLevel {
    Ignore,
    #[default]
    False,
    True,
    Strict,
    Strong,
    /// Internal ceiling, above anything a sigil can request.
    Max,
}

/// One source unit.
#[derive(Debug, Clone)]
pub struct File {
    pub path: String,
    pub source: String,
    /// Level from the sigil scan, before any driver override.
    pub sigil: StrictLevel,
    /// Effective level used by the pipeline.
    pub strict: StrictLevel,
    /// Byte offsets of every `\n`, for line/column rendering.
    pub(crate) line_ends: Vec<u32>,
}

impl File {
    pub fn new(path: String, source: String) -> Self {
        let sigil = scan_sigil(&source);
        let line_ends = source
            .bytes()
            .enumerate()
            .filter(|&(_, b)| b == b'\n')
            .map(|(i, _)| u32::try_from(i).expect("file too large"))
            .collect();
        Self {
            path,
            source,
            sigil,
            strict: sigil,
            line_ends,
        }
    }
}

/// Scans the leading comment block for a `# typed: <level>` sigil.
///
/// The scan stops at the first non-comment, non-blank line. An unrecognized level is
/// treated as no sigil at all; the default level is `false`.
pub fn scan_sigil(source: &str) -> StrictLevel {
    for line in source.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let Some(comment) = trimmed.strip_prefix('#') else {
            break;
        };
        if let Some(rest) = comment.trim().strip_prefix("typed:")
            && let Ok(level) = rest.trim().parse::<StrictLevel>()
            && level <= StrictLevel::Strong
        {
            return level;
        }
    }
    StrictLevel::default()
}

/// The file table: append-only, indexed by [`FileRef`].
#[derive(Debug, Clone, Default)]
pub(crate) struct FileTable {
    files: Vec<File>,
}

impl FileTable {
    pub fn enter(&mut self, file: File) -> FileRef {
        let id = FileRef::from_index(self.files.len());
        self.files.push(file);
        id
    }

    pub fn get(&self, id: FileRef) -> &File {
        &self.files[id.index()]
    }

    pub fn get_mut(&mut self, id: FileRef) -> &mut File {
        &mut self.files[id.index()]
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (FileRef, &File)> {
        self.files.iter().enumerate().map(|(i, f)| (FileRef::from_index(i), f))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sigil_parses_known_levels() {
        assert_eq!(scan_sigil("# typed: true\nx = 1\n"), StrictLevel::True);
        assert_eq!(scan_sigil("# typed: strict\n"), StrictLevel::Strict);
        assert_eq!(scan_sigil("# typed: ignore\n"), StrictLevel::Ignore);
    }

    #[test]
    fn sigil_defaults_to_false() {
        assert_eq!(scan_sigil("x = 1\n"), StrictLevel::False);
        assert_eq!(scan_sigil("# typed: bogus\nx = 1\n"), StrictLevel::False);
        // Sigils below code do not count.
        assert_eq!(scan_sigil("x = 1\n# typed: true\n"), StrictLevel::False);
    }

    #[test]
    fn sigil_allows_leading_comments_and_blanks() {
        let src = "# frozen\n\n#  typed:  strong\nclass A; end\n";
        assert_eq!(scan_sigil(src), StrictLevel::Strong);
        // `max` is internal and cannot be requested from source.
        assert_eq!(scan_sigil("# typed: max\n"), StrictLevel::False);
    }

    #[test]
    fn levels_are_ordered() {
        assert!(StrictLevel::Ignore < StrictLevel::False);
        assert!(StrictLevel::False < StrictLevel::True);
        assert!(StrictLevel::True < StrictLevel::Strict);
        assert!(StrictLevel::Strict < StrictLevel::Strong);
        assert!(StrictLevel::Strong < StrictLevel::Max);
    }
}

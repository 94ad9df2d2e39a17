//! Line-addressable views over document text.

use serde::{Deserialize, Serialize};

/// A document addressed by zero-based line index.
///
/// The parser only ever asks for whole lines in order, so sources never need
/// a character-offset index.
pub trait LineSource {
    fn line_count(&self) -> usize;

    /// Text of line `index` without its line terminator. `None` for an index
    /// the source cannot provide.
    fn line_at(&self, index: usize) -> Option<&str>;
}

impl<S: AsRef<str>> LineSource for [S] {
    fn line_count(&self) -> usize {
        self.len()
    }

    fn line_at(&self, index: usize) -> Option<&str> {
        self.get(index).map(AsRef::as_ref)
    }
}

impl<S: AsRef<str>, const N: usize> LineSource for [S; N] {
    fn line_count(&self) -> usize {
        N
    }

    fn line_at(&self, index: usize) -> Option<&str> {
        self.get(index).map(AsRef::as_ref)
    }
}

impl<S: AsRef<str>> LineSource for Vec<S> {
    fn line_count(&self) -> usize {
        self.len()
    }

    fn line_at(&self, index: usize) -> Option<&str> {
        self.get(index).map(AsRef::as_ref)
    }
}

impl<T: LineSource + ?Sized> LineSource for &T {
    fn line_count(&self) -> usize {
        (**self).line_count()
    }

    fn line_at(&self, index: usize) -> Option<&str> {
        (**self).line_at(index)
    }
}

/// Owned document text with the byte offset of every line start.
///
/// Lines split on `\n`; a `\r` directly before the `\n` is dropped. A final
/// newline does not start an extra empty line.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct TextDocument {
    text: String,
    line_starts: Vec<usize>,
}

impl TextDocument {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let mut line_starts = Vec::new();
        if !text.is_empty() {
            line_starts.push(0);
            line_starts.extend(
                text.match_indices('\n')
                    .map(|(index, _)| index + 1)
                    .filter(|&start| start < text.len()),
            );
        }
        Self { text, line_starts }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> + '_ {
        (0..self.line_starts.len()).filter_map(move |index| self.line_at(index))
    }

    pub fn into_text(self) -> String {
        self.text
    }
}

impl LineSource for TextDocument {
    fn line_count(&self) -> usize {
        self.line_starts.len()
    }

    fn line_at(&self, index: usize) -> Option<&str> {
        let start = *self.line_starts.get(index)?;
        let end = self
            .line_starts
            .get(index + 1)
            .copied()
            .unwrap_or(self.text.len());
        let line = &self.text[start..end];
        Some(match line.strip_suffix('\n') {
            Some(line) => line.strip_suffix('\r').unwrap_or(line),
            None => line,
        })
    }
}

impl From<String> for TextDocument {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

impl From<&str> for TextDocument {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl From<TextDocument> for String {
    fn from(document: TextDocument) -> Self {
        document.text
    }
}

/// Returns the slice of `line` covering `length` characters from character
/// offset `start`.
pub fn char_slice(line: &str, start: usize, length: usize) -> Option<&str> {
    let mut boundaries = line
        .char_indices()
        .map(|(index, _)| index)
        .chain(std::iter::once(line.len()));
    let from = boundaries.nth(start)?;
    let to = if length == 0 {
        from
    } else {
        boundaries.nth(length - 1)?
    };
    Some(&line[from..to])
}

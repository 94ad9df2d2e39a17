use std::borrow::Cow;
use std::error::Error as StdError;
use std::fmt;
use std::path::{Path, PathBuf};
use std::string::FromUtf8Error;
use std::{io, result};

use thiserror::Error;

pub type Result<T, E = ParseError> = result::Result<T, E>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum ParseErrorKind {
    #[error("I/O error")]
    Io,
    #[error("input was not valid UTF-8")]
    Utf8,
    #[error("line source is inconsistent")]
    MissingLine,
}

type BoxedSource = Box<dyn StdError + Send + Sync>;

/// Failure reading or scanning a document.
///
/// Carries the file path when the document came from disk and the zero-based
/// line when the failure belongs to one.
#[derive(Debug)]
pub struct ParseError {
    kind: ParseErrorKind,
    detail: Cow<'static, str>,
    path: Option<PathBuf>,
    line: Option<usize>,
    source: Option<BoxedSource>,
}

impl ParseError {
    pub fn new(kind: ParseErrorKind, detail: impl Into<Cow<'static, str>>) -> Self {
        Self {
            kind,
            detail: detail.into(),
            path: None,
            line: None,
            source: None,
        }
    }

    pub fn io(err: io::Error) -> Self {
        Self::new(ParseErrorKind::Io, err.to_string()).with_source(err)
    }

    pub fn utf8(err: FromUtf8Error) -> Self {
        let detail = format!("invalid byte at offset {}", err.utf8_error().valid_up_to());
        Self::new(ParseErrorKind::Utf8, detail).with_source(err)
    }

    /// A line the source claimed to have could not be read.
    pub fn missing_line(index: usize, line_count: usize) -> Self {
        let mut err = Self::new(
            ParseErrorKind::MissingLine,
            format!("source reports {line_count} lines but has no text for this one"),
        );
        err.line = Some(index);
        err
    }

    pub fn kind(&self) -> ParseErrorKind {
        self.kind
    }

    pub fn detail(&self) -> &str {
        &self.detail
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Zero-based line the error refers to.
    pub fn line(&self) -> Option<usize> {
        self.line
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.kind, f)?;
        if let Some(path) = &self.path {
            write!(f, " in {}", path.display())?;
        }
        if let Some(line) = self.line {
            write!(f, " at line {}", line + 1)?;
        }
        write!(f, ": {}", self.detail)
    }
}

impl StdError for ParseError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source.as_deref().map(|err| err as &(dyn StdError + 'static))
    }
}

impl From<io::Error> for ParseError {
    fn from(err: io::Error) -> Self {
        Self::io(err)
    }
}

impl From<FromUtf8Error> for ParseError {
    fn from(err: FromUtf8Error) -> Self {
        Self::utf8(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn display_names_path_and_line() {
        let err = ParseError::missing_line(4, 3).with_path("model.cif");
        assert_eq!(
            err.to_string(),
            "line source is inconsistent in model.cif at line 5: \
             source reports 3 lines but has no text for this one"
        );
        assert_eq!(err.kind(), ParseErrorKind::MissingLine);
        assert_eq!(err.line(), Some(4));
    }

    #[test]
    fn io_errors_keep_their_source() {
        let err = ParseError::from(io::Error::new(io::ErrorKind::NotFound, "gone"));
        assert_eq!(err.kind(), ParseErrorKind::Io);
        assert_eq!(err.to_string(), "I/O error: gone");
        assert!(err.source().is_some());
    }

    #[test]
    fn utf8_errors_report_the_offset() {
        let bad = String::from_utf8(vec![b'_', b'a', 0xff]).unwrap_err();
        let err = ParseError::from(bad);
        assert_eq!(err.kind(), ParseErrorKind::Utf8);
        assert_eq!(err.detail(), "invalid byte at offset 2");
    }
}

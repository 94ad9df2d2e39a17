#![forbid(unsafe_code)]
//! Line-oriented reader for mmCIF/PDBx text.
//!
//! The parser turns a document into [`Block`]s: `loop_` tables and runs of
//! same-category single items, with the line and character span of every
//! field name and value. It never rejects input; malformed constructs are
//! skipped and parsing continues with the next line.

pub mod error;
pub mod model;
pub mod parser;
pub mod source;
pub mod token;

pub use error::{ParseError, ParseErrorKind, Result};
pub use model::{Block, DataRow, FieldDefinition, MultiLineRange, ParsedDocument, ValueRange};
pub use parser::{
    parse_async_reader, parse_blocks, parse_file, parse_file_with_options, parse_reader, parse_str,
    parse_str_with_options, try_parse_blocks, BlockParser, ParserOptions,
};
pub use source::{char_slice, LineSource, TextDocument};
pub use token::{tokenize, SpecialSplit, Token, Tokenizer};

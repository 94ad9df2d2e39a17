use std::{
    fs::File,
    io::{BufRead, Read},
    path::Path,
};

use flate2::read::GzDecoder;
use futures::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, trace, warn};

use crate::{
    error::{ParseError, Result},
    model::{Block, DataRow, FieldDefinition, MultiLineRange, ParsedDocument, ValueRange},
    source::{LineSource, TextDocument},
    token::{SpecialSplit, Token, Tokenizer},
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ParserOptions {
    /// Recognise `loop_`, `data_`, `save_`, `global_` and `stop_` in any
    /// ASCII case.
    pub case_insensitive_keywords: bool,
    /// Treat an unquoted `stop_` like `data_`: it closes the open block.
    pub stop_keyword: bool,
}

pub fn parse_file(path: impl AsRef<Path>) -> Result<ParsedDocument> {
    parse_file_with_options(path, ParserOptions::default())
}

pub fn parse_file_with_options(
    path: impl AsRef<Path>,
    options: ParserOptions,
) -> Result<ParsedDocument> {
    let path_ref = path.as_ref();
    let file = File::open(path_ref).map_err(|err| ParseError::io(err).with_path(path_ref))?;
    let gzipped = path_ref
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("gz"))
        .unwrap_or(false);
    let mut reader: Box<dyn Read> = if gzipped {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };
    debug!(path = %path_ref.display(), gzipped, "reading mmCIF file");

    let mut buf = Vec::new();
    reader
        .read_to_end(&mut buf)
        .map_err(|err| ParseError::io(err).with_path(path_ref))?;
    let text = String::from_utf8(buf).map_err(|err| ParseError::utf8(err).with_path(path_ref))?;
    Ok(parse_document(TextDocument::new(text), options))
}

pub fn parse_reader<R: BufRead>(mut reader: R, options: ParserOptions) -> Result<ParsedDocument> {
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf)?;
    let text = String::from_utf8(buf)?;
    Ok(parse_document(TextDocument::new(text), options))
}

pub async fn parse_async_reader<R>(mut reader: R, options: ParserOptions) -> Result<ParsedDocument>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    reader
        .read_to_end(&mut buf)
        .await
        .map_err(ParseError::io)?;
    let text = String::from_utf8(buf)?;
    Ok(parse_document(TextDocument::new(text), options))
}

pub fn parse_str(input: &str) -> ParsedDocument {
    parse_str_with_options(input, ParserOptions::default())
}

pub fn parse_str_with_options(input: &str, options: ParserOptions) -> ParsedDocument {
    parse_document(TextDocument::new(input), options)
}

fn parse_document(document: TextDocument, options: ParserOptions) -> ParsedDocument {
    let blocks = BlockParser::new(options).parse(&document);
    ParsedDocument::new(document, blocks)
}

/// Parses `source` with default options. Never fails; see [`BlockParser::parse`].
pub fn parse_blocks<S: LineSource + ?Sized>(source: &S) -> Vec<Block> {
    BlockParser::new(ParserOptions::default()).parse(source)
}

pub fn try_parse_blocks<S: LineSource + ?Sized>(source: &S) -> Result<Vec<Block>> {
    BlockParser::new(ParserOptions::default()).try_parse(source)
}

/// Line-driven mmCIF block parser.
///
/// Holds no state between calls; each parse depends only on the source
/// text.
#[derive(Clone, Debug, Default)]
pub struct BlockParser<T = SpecialSplit> {
    tokenizer: T,
    options: ParserOptions,
}

impl BlockParser<SpecialSplit> {
    pub fn new(options: ParserOptions) -> Self {
        Self::with_tokenizer(SpecialSplit, options)
    }
}

impl<T: Tokenizer> BlockParser<T> {
    pub fn with_tokenizer(tokenizer: T, options: ParserOptions) -> Self {
        Self { tokenizer, options }
    }

    pub fn options(&self) -> ParserOptions {
        self.options
    }

    /// Parses every line of `source` into blocks, in document order.
    ///
    /// A source that fails mid-scan yields an empty list and a warning. Use
    /// [`BlockParser::try_parse`] to get the error instead.
    #[tracing::instrument(level = "debug", skip_all, fields(lines = source.line_count()))]
    pub fn parse<S: LineSource + ?Sized>(&self, source: &S) -> Vec<Block> {
        match self.try_parse(source) {
            Ok(blocks) => {
                debug!(blocks = blocks.len(), "parsed mmCIF blocks");
                blocks
            }
            Err(err) => {
                warn!(error = %err, "mmCIF block parse failed, returning no blocks");
                Vec::new()
            }
        }
    }

    pub fn try_parse<S: LineSource + ?Sized>(&self, source: &S) -> Result<Vec<Block>> {
        let line_count = source.line_count();
        let mut pass = Pass::new(self);
        for index in 0..line_count {
            let line = source
                .line_at(index)
                .ok_or_else(|| ParseError::missing_line(index, line_count))?;
            pass.feed(index, line);
        }
        Ok(pass.finish(line_count))
    }

    fn classify(&self, token: &Token<'_>) -> LineHead {
        let ignore_case = self.options.case_insensitive_keywords;
        if token.matches_keyword("global_", ignore_case)
            || token.has_keyword_prefix("data_", ignore_case)
            || token.has_keyword_prefix("save_", ignore_case)
            || (self.options.stop_keyword && token.matches_keyword("stop_", ignore_case))
        {
            LineHead::BlockKeyword
        } else if token.matches_keyword("loop_", ignore_case) {
            LineHead::LoopKeyword
        } else if token.is_data_name() {
            LineHead::DataName
        } else {
            LineHead::Value
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LineHead {
    BlockKeyword,
    LoopKeyword,
    DataName,
    Value,
}

/// Mutable accumulator for the block being read; frozen into a [`Block`]
/// when it closes.
#[derive(Debug)]
struct PendingBlock {
    start_line: usize,
    category_name: String,
    field_names: Vec<FieldDefinition>,
    data_rows: Vec<DataRow>,
    is_loop: bool,
    /// The field declaration phase is over.
    names_defined: bool,
    processed_value_count: usize,
}

impl PendingBlock {
    fn open_loop(line: usize) -> Self {
        Self {
            start_line: line,
            category_name: String::new(),
            field_names: Vec::new(),
            data_rows: Vec::new(),
            is_loop: true,
            names_defined: false,
            processed_value_count: 0,
        }
    }

    fn open_items(line: usize, category: &str) -> Self {
        Self {
            category_name: category.to_owned(),
            is_loop: false,
            names_defined: true,
            ..Self::open_loop(line)
        }
    }

    fn has_fields(&self) -> bool {
        !self.field_names.is_empty()
    }

    fn declares(&self, field_name: &str) -> bool {
        self.field_names
            .iter()
            .any(|field| field.field_name == field_name)
    }

    /// Column receiving the next whole value (a text field).
    fn next_value_column(&self) -> usize {
        if self.is_loop {
            self.processed_value_count % self.field_names.len().max(1)
        } else {
            self.field_names.len().saturating_sub(1)
        }
    }

    fn push_whole_line(&mut self, line: usize, text: &str, column_index: usize) {
        self.data_rows.push(DataRow {
            line,
            value_ranges: vec![ValueRange {
                start: 0,
                length: text.chars().count(),
                column_index,
            }],
            multi_line: None,
        });
    }

    fn freeze(self) -> Option<Block> {
        if !self.has_fields() {
            return None;
        }
        Some(Block {
            start_line: self.start_line,
            category_name: self.category_name,
            field_names: self.field_names,
            data_rows: self.data_rows,
            is_loop: self.is_loop,
        })
    }
}

/// An open `;` text field.
#[derive(Clone, Copy, Debug)]
struct TextField {
    start_line: usize,
    column_index: usize,
    /// Index of the opening line's row in the pending block; `None` when no
    /// block with fields was open, in which case the lines are not recorded.
    first_row: Option<usize>,
}

struct Pass<'p, T> {
    parser: &'p BlockParser<T>,
    blocks: Vec<Block>,
    current: Option<PendingBlock>,
    text_field: Option<TextField>,
}

impl<'p, T: Tokenizer> Pass<'p, T> {
    fn new(parser: &'p BlockParser<T>) -> Self {
        Self {
            parser,
            blocks: Vec::new(),
            current: None,
            text_field: None,
        }
    }

    fn feed(&mut self, index: usize, line: &str) {
        if line.starts_with(';') {
            match self.text_field.take() {
                Some(open) => self.close_text_field(open, index, Some(line)),
                None => self.open_text_field(index, line),
            }
            return;
        }
        if let Some(open) = self.text_field {
            self.text_field_line(open, index, line);
            return;
        }
        if line.starts_with('#') {
            if self
                .current
                .as_ref()
                .is_some_and(|block| block.has_fields() && block.names_defined)
            {
                self.close_current();
            }
            return;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            if let Some(block) = self.current.as_mut().filter(|block| block.has_fields()) {
                block.names_defined = true;
            }
            return;
        }

        let tokens = self.parser.tokenizer.tokenize(trimmed);
        let Some(head) = tokens.first() else {
            return;
        };
        match self.parser.classify(head) {
            LineHead::BlockKeyword => self.close_current(),
            LineHead::LoopKeyword => {
                self.close_current();
                self.current = Some(PendingBlock::open_loop(index));
            }
            LineHead::DataName => self.data_name(index, line, &tokens),
            LineHead::Value => self.data_values(index, line, &tokens),
        }
    }

    fn finish(mut self, line_count: usize) -> Vec<Block> {
        if let Some(open) = self.text_field.take() {
            trace!(start_line = open.start_line, "text field runs to end of document");
            self.close_text_field(open, line_count.saturating_sub(1), None);
        }
        self.close_current();
        self.blocks
    }

    fn close_current(&mut self) {
        if let Some(block) = self.current.take().and_then(PendingBlock::freeze) {
            self.blocks.push(block);
        }
    }

    fn open_text_field(&mut self, index: usize, line: &str) {
        let mut open = TextField {
            start_line: index,
            column_index: 0,
            first_row: None,
        };
        if let Some(block) = self.current.as_mut().filter(|block| block.has_fields()) {
            open.column_index = block.next_value_column();
            open.first_row = Some(block.data_rows.len());
            block.push_whole_line(index, line, open.column_index);
        }
        self.text_field = Some(open);
    }

    fn text_field_line(&mut self, open: TextField, index: usize, line: &str) {
        if open.first_row.is_none() {
            return;
        }
        if let Some(block) = self.current.as_mut() {
            block.push_whole_line(index, line, open.column_index);
        }
    }

    /// Ends a text field at `end_line`. `closing` is the delimiter line, absent
    /// when the document ends first.
    fn close_text_field(&mut self, open: TextField, end_line: usize, closing: Option<&str>) {
        let (Some(first_row), Some(block)) = (open.first_row, self.current.as_mut()) else {
            return;
        };
        if let Some(text) = closing {
            block.push_whole_line(end_line, text, open.column_index);
        }
        block.processed_value_count += 1;
        let span = MultiLineRange {
            start_line: open.start_line,
            end_line,
        };
        for row in &mut block.data_rows[first_row..] {
            row.multi_line = Some(span);
        }
        block.names_defined = true;
    }

    fn data_name(&mut self, index: usize, line: &str, tokens: &[Token<'_>]) {
        let name = tokens[0].text;
        let Some((category, field)) = split_data_name(name) else {
            trace!(line = index, data_name = name, "ignoring malformed data name");
            return;
        };

        if let Some(block) = &self.current {
            let (close, reopen_loop) = if block.is_loop {
                let other_category =
                    !block.category_name.is_empty() && block.category_name != category;
                (
                    block.names_defined || other_category,
                    !block.names_defined && other_category,
                )
            } else {
                (
                    block.category_name != category || block.declares(field),
                    false,
                )
            };
            if close {
                self.close_current();
                if reopen_loop {
                    self.current = Some(PendingBlock::open_loop(index));
                }
            }
        }

        let block = self
            .current
            .get_or_insert_with(|| PendingBlock::open_items(index, category));
        if block.category_name.is_empty() {
            block.category_name = category.to_owned();
        }

        let mut cursor = LineCursor::new(line);
        let Some((name_start, _)) = cursor.find(name) else {
            return;
        };
        block.field_names.push(FieldDefinition {
            line: index,
            start: name_start + category.chars().count() + 1,
            length: field.chars().count(),
            field_name: field.to_owned(),
        });

        if block.is_loop {
            return;
        }
        let column_index = block.field_names.len() - 1;
        let value_ranges: Vec<ValueRange> = tokens[1..]
            .iter()
            .filter_map(|token| cursor.find(token.text))
            .map(|(start, length)| ValueRange {
                start,
                length,
                column_index,
            })
            .collect();
        if !value_ranges.is_empty() {
            block.processed_value_count += value_ranges.len();
            block.data_rows.push(DataRow {
                line: index,
                value_ranges,
                multi_line: None,
            });
        }
        block.names_defined = true;
    }

    fn data_values(&mut self, index: usize, line: &str, tokens: &[Token<'_>]) {
        let Some(block) = self.current.as_mut().filter(|block| block.has_fields()) else {
            return;
        };
        block.names_defined = true;

        let field_count = block.field_names.len();
        let mut cursor = LineCursor::new(line);
        let mut value_ranges = Vec::new();
        for (ordinal, token) in tokens.iter().take(field_count).enumerate() {
            if let Some((start, length)) = cursor.find(token.text) {
                value_ranges.push(ValueRange {
                    start,
                    length,
                    column_index: (block.processed_value_count + ordinal) % field_count,
                });
            }
        }
        if !value_ranges.is_empty() {
            block.processed_value_count += value_ranges.len();
            block.data_rows.push(DataRow {
                line: index,
                value_ranges,
                multi_line: None,
            });
        }
    }
}

/// `_category.field` split at the first dot; both parts must be non-empty.
fn split_data_name(name: &str) -> Option<(&str, &str)> {
    let (category, field) = name.split_once('.')?;
    if category.len() <= 1 || field.is_empty() {
        return None;
    }
    Some((category, field))
}

/// Sequential substring search over a raw line, reporting character offsets.
///
/// Each search starts where the previous match ended, so a value that also
/// occurs inside an earlier value on the line is placed correctly.
struct LineCursor<'l> {
    line: &'l str,
    byte: usize,
    chars: usize,
}

impl<'l> LineCursor<'l> {
    fn new(line: &'l str) -> Self {
        Self {
            line,
            byte: 0,
            chars: 0,
        }
    }

    /// `(start, length)` in characters of the next occurrence of `needle`.
    fn find(&mut self, needle: &str) -> Option<(usize, usize)> {
        if needle.is_empty() {
            return None;
        }
        let found = self.byte + self.line[self.byte..].find(needle)?;
        let start = self.chars + self.line[self.byte..found].chars().count();
        let length = needle.chars().count();
        self.byte = found + needle.len();
        self.chars = start + length;
        Some((start, length))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ParseErrorKind;
    use pretty_assertions::assert_eq;

    fn blocks(lines: &[&str]) -> Vec<Block> {
        parse_blocks(lines)
    }

    fn columns(row: &DataRow) -> Vec<usize> {
        row.value_ranges
            .iter()
            .map(|range| range.column_index)
            .collect()
    }

    fn field_names(block: &Block) -> Vec<&str> {
        block
            .field_names
            .iter()
            .map(|field| field.field_name.as_str())
            .collect()
    }

    #[test]
    fn groups_consecutive_items_of_one_category() {
        let parsed = blocks(&["data_TEST", "_entry.id   TEST", "_entry.desc \"Test Entry\""]);
        assert_eq!(parsed.len(), 1);
        let block = &parsed[0];
        assert_eq!(block.category_name, "_entry");
        assert!(!block.is_loop);
        assert_eq!(block.start_line, 1);
        assert_eq!(field_names(block), vec!["id", "desc"]);
        assert_eq!(
            block.field_names[1],
            FieldDefinition {
                line: 2,
                start: 7,
                length: 4,
                field_name: "desc".to_string(),
            }
        );
        assert_eq!(block.data_rows.len(), 2);
        assert_eq!(
            block.data_rows[0].value_ranges,
            vec![ValueRange {
                start: 12,
                length: 4,
                column_index: 0,
            }]
        );
        assert_eq!(
            block.data_rows[1].value_ranges,
            vec![ValueRange {
                start: 12,
                length: 12,
                column_index: 1,
            }]
        );
    }

    #[test]
    fn category_change_splits_items() {
        let parsed = blocks(&["_entry.id X", "_cell.a 1", "_entry.desc Y"]);
        let names: Vec<(&str, Vec<&str>)> = parsed
            .iter()
            .map(|block| (block.category_name.as_str(), field_names(block)))
            .collect();
        assert_eq!(
            names,
            vec![
                ("_entry", vec!["id"]),
                ("_cell", vec!["a"]),
                ("_entry", vec!["desc"]),
            ]
        );
    }

    #[test]
    fn repeated_field_starts_a_new_block() {
        let parsed = blocks(&["_entry.id A", "_entry.id B", "_entry.desc C"]);
        assert_eq!(parsed.len(), 2);
        assert_eq!(field_names(&parsed[0]), vec!["id"]);
        assert_eq!(field_names(&parsed[1]), vec!["id", "desc"]);
        assert_eq!(parsed[1].start_line, 1);
    }

    #[test]
    fn loop_rows_cycle_columns() {
        let parsed = blocks(&[
            "data_TEST",
            "loop_",
            "_atom_site.id",
            "_atom_site.label_atom_id",
            "1 N",
            "2 CA",
            "3 C",
        ]);
        assert_eq!(parsed.len(), 1);
        let block = &parsed[0];
        assert!(block.is_loop);
        assert_eq!(block.start_line, 1);
        assert_eq!(block.category_name, "_atom_site");
        assert_eq!(block.data_rows.len(), 3);
        for row in &block.data_rows {
            assert_eq!(columns(row), vec![0, 1]);
        }
        assert_eq!(block.data_rows[1].value_ranges[1].start, 2);
        assert_eq!(block.data_rows[1].value_ranges[1].length, 2);
    }

    #[test]
    fn loop_rows_may_wrap_across_lines() {
        let parsed = blocks(&["loop_", "_a.x", "_a.y", "_a.z", "1 2", "3", "4 5 6"]);
        let block = &parsed[0];
        let all: Vec<Vec<usize>> = block.data_rows.iter().map(columns).collect();
        assert_eq!(all, vec![vec![0, 1], vec![2], vec![0, 1, 2]]);
    }

    #[test]
    fn extra_tokens_beyond_field_count_are_dropped() {
        let parsed = blocks(&["loop_", "_a.x", "_a.y", "1 2 3 4"]);
        assert_eq!(columns(&parsed[0].data_rows[0]), vec![0, 1]);
    }

    #[test]
    fn loop_header_with_second_category_opens_another_loop() {
        let parsed = blocks(&["loop_", "_a.x", "_b.y", "1"]);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].category_name, "_a");
        assert!(parsed[0].data_rows.is_empty());
        assert_eq!(parsed[1].category_name, "_b");
        assert!(parsed[1].is_loop);
        assert_eq!(parsed[1].start_line, 2);
        assert_eq!(parsed[1].data_rows.len(), 1);
    }

    #[test]
    fn data_name_after_loop_rows_starts_single_item() {
        let parsed = blocks(&["loop_", "_a.x", "1", "2", "_a.y 3"]);
        assert_eq!(parsed.len(), 2);
        assert!(parsed[0].is_loop);
        assert!(!parsed[1].is_loop);
        assert_eq!(field_names(&parsed[1]), vec!["y"]);
    }

    #[test]
    fn multi_line_value_in_loop() {
        let parsed = blocks(&[
            "loop_",
            "_entity_poly.entity_id",
            "_entity_poly.pdbx_seq_one_letter_code",
            "1",
            ";VLSPADKTNVKAAWGKVGAHAGEYGAEALERMF",
            "SALSDLHAHKLRVDPVNFKLLSHCLLVTLAAHL",
            ";",
            "2 MKV",
        ]);
        assert_eq!(parsed.len(), 1);
        let block = &parsed[0];
        let span = Some(MultiLineRange {
            start_line: 4,
            end_line: 6,
        });
        let text_rows: Vec<&DataRow> = block
            .data_rows
            .iter()
            .filter(|row| row.multi_line.is_some())
            .collect();
        assert_eq!(text_rows.len(), 3);
        for row in &text_rows {
            assert_eq!(row.multi_line, span);
            assert_eq!(columns(row), vec![1]);
        }
        assert_eq!(text_rows[0].value_ranges[0].length, 34);
        assert_eq!(text_rows[2].value_ranges[0].length, 1);
        let last = block.data_rows.last().unwrap();
        assert_eq!(last.line, 7);
        assert_eq!(columns(last), vec![0, 1]);
    }

    #[test]
    fn multi_line_value_for_single_item_uses_declared_column() {
        let parsed = blocks(&[
            "data_TEST",
            "_entity.id 1",
            "_entity.description",
            ";This is a long",
            "# not a comment here",
            "",
            ";",
            "_entity.type polymer",
        ]);
        assert_eq!(parsed.len(), 1);
        let block = &parsed[0];
        assert_eq!(field_names(block), vec!["id", "description", "type"]);
        let text_rows: Vec<usize> = block
            .data_rows
            .iter()
            .filter(|row| row.multi_line.is_some())
            .map(|row| row.line)
            .collect();
        assert_eq!(text_rows, vec![3, 4, 5, 6]);
        for row in block.data_rows.iter().filter(|row| row.multi_line.is_some()) {
            assert_eq!(columns(row), vec![1]);
        }
        assert_eq!(columns(block.data_rows.last().unwrap()), vec![2]);
    }

    #[test]
    fn value_on_following_line_belongs_to_last_field() {
        let parsed = blocks(&["_entry.id A", "_entry.desc", "'on the next line'"]);
        let block = &parsed[0];
        assert_eq!(block.data_rows.len(), 2);
        assert_eq!(columns(&block.data_rows[1]), vec![1]);
    }

    #[test]
    fn unterminated_text_field_runs_to_end() {
        let parsed = blocks(&[
            "data_TEST",
            "_item.value",
            ";This is a multi-line string",
            "that never closes",
        ]);
        assert_eq!(parsed.len(), 1);
        let rows = &parsed[0].data_rows;
        assert_eq!(rows.len(), 2);
        for row in rows {
            assert_eq!(
                row.multi_line,
                Some(MultiLineRange {
                    start_line: 2,
                    end_line: 3,
                })
            );
        }
    }

    #[test]
    fn text_field_without_block_is_skipped() {
        let parsed = blocks(&[";orphan", "text", ";", "_a.b 1"]);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].start_line, 3);
        assert_eq!(parsed[0].data_rows.len(), 1);
    }

    #[test]
    fn comments_close_finished_blocks_only() {
        let parsed = blocks(&[
            "loop_",
            "_a.x",
            "# between header lines",
            "_a.y",
            "1 2",
            "#",
            "3 4",
        ]);
        assert_eq!(parsed.len(), 1);
        assert_eq!(field_names(&parsed[0]), vec!["x", "y"]);
        assert_eq!(parsed[0].data_rows.len(), 1);
    }

    #[test]
    fn blank_line_ends_loop_header() {
        let parsed = blocks(&["loop_", "_a.x", "", "_a.y 1"]);
        assert_eq!(parsed.len(), 2);
        assert!(parsed[0].is_loop);
        assert!(!parsed[1].is_loop);
    }

    #[test]
    fn block_keywords_close_blocks() {
        let parsed = blocks(&[
            "data_TEST",
            "save_FRAME",
            "_item.value 1",
            "save_",
            "_item.value 2",
            "global_",
        ]);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].start_line, 2);
        assert_eq!(parsed[1].start_line, 4);
    }

    #[test]
    fn empty_loops_and_malformed_names_emit_nothing() {
        assert!(blocks(&["data_TEST", "loop_", "data_NEXT"]).is_empty());
        assert!(blocks(&["data_TEST", "loop_"]).is_empty());
        assert!(blocks(&["data_TEST", "_invalid 1", "_.x 2", "_a. 3"]).is_empty());
    }

    #[test]
    fn malformed_name_does_not_touch_open_block() {
        let parsed = blocks(&["_entry.id A", "_invalid 1", "_entry.desc B"]);
        assert_eq!(parsed.len(), 1);
        assert_eq!(field_names(&parsed[0]), vec!["id", "desc"]);
    }

    #[test]
    fn quoted_keywords_are_values() {
        let parsed = blocks(&["loop_", "_a.x", "'loop_'", "\"data_x\"", "'_a.y'"]);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].field_count(), 1);
        assert_eq!(parsed[0].data_rows.len(), 3);
    }

    #[test]
    fn quoted_values_keep_their_quotes() {
        let parsed = blocks(&["loop_", "_test.a", "_test.b", "'Value A' \"Value B with spaces\""]);
        let ranges = &parsed[0].data_rows[0].value_ranges;
        assert_eq!(ranges.len(), 2);
        assert_eq!((ranges[0].start, ranges[0].length), (0, 9));
        assert_eq!((ranges[1].start, ranges[1].length), (10, 21));
    }

    #[test]
    fn repeated_text_is_located_after_previous_value() {
        let parsed = blocks(&["loop_", "_a.x", "_a.y", "AB B"]);
        let ranges = &parsed[0].data_rows[0].value_ranges;
        assert_eq!(ranges[1].start, 3);
    }

    #[test]
    fn offsets_count_characters() {
        let parsed = blocks(&["_struct.title 'Å résumé' x"]);
        let ranges = &parsed[0].data_rows[0].value_ranges;
        assert_eq!((ranges[0].start, ranges[0].length), (14, 10));
        assert_eq!((ranges[1].start, ranges[1].length), (25, 1));
    }

    #[test]
    fn astral_characters_count_once() {
        let parsed = blocks(&["_struct.title \u{1F9EC}dna x"]);
        let ranges = &parsed[0].data_rows[0].value_ranges;
        assert_eq!((ranges[0].start, ranges[0].length), (14, 4));
        assert_eq!((ranges[1].start, ranges[1].length), (19, 1));
    }

    #[test]
    fn hash_lines_inside_text_fields_are_content() {
        let parsed = blocks(&[
            "_entity.description",
            ";line one",
            "# hash line",
            ";",
            "_entity.type x",
        ]);
        assert_eq!(parsed.len(), 1);
        let lines: Vec<usize> = parsed[0].data_rows.iter().map(|row| row.line).collect();
        assert_eq!(lines, vec![1, 2, 3, 4]);
        let span = MultiLineRange {
            start_line: 1,
            end_line: 3,
        };
        for row in &parsed[0].data_rows[..3] {
            assert_eq!(row.multi_line, Some(span));
        }
        assert_eq!(field_names(&parsed[0]), vec!["description", "type"]);
    }

    #[test]
    fn indented_lines_keep_raw_positions() {
        let parsed = blocks(&["   _cell.length_a   10.0"]);
        let block = &parsed[0];
        assert_eq!(block.field_names[0].start, 9);
        assert_eq!(block.data_rows[0].value_ranges[0].start, 20);
    }

    #[test]
    fn keyword_options() {
        let lines = ["LOOP_", "_a.x", "1", "STOP_", "_b.y 2"];
        let strict = BlockParser::new(ParserOptions::default()).parse(&lines);
        assert_eq!(strict.len(), 2);
        assert!(!strict[0].is_loop);
        assert_eq!(strict[0].data_rows.len(), 2);

        let relaxed = BlockParser::new(ParserOptions {
            case_insensitive_keywords: true,
            stop_keyword: true,
        })
        .parse(&lines);
        assert_eq!(relaxed.len(), 2);
        assert!(relaxed[0].is_loop);
        assert_eq!(relaxed[0].data_rows.len(), 1);
        assert!(!relaxed[1].is_loop);
    }

    #[test]
    fn degenerate_documents() {
        assert!(blocks(&[]).is_empty());
        assert!(blocks(&["# Comment line 1", "# Comment line 2"]).is_empty());
        assert!(blocks(&["", "   ", "\t", ""]).is_empty());
    }

    struct Truncated;

    impl LineSource for Truncated {
        fn line_count(&self) -> usize {
            3
        }

        fn line_at(&self, index: usize) -> Option<&str> {
            ["_entry.id A"].get(index).copied()
        }
    }

    #[test]
    fn broken_source_yields_no_blocks() {
        let err = try_parse_blocks(&Truncated).unwrap_err();
        assert_eq!(err.kind(), ParseErrorKind::MissingLine);
        assert!(parse_blocks(&Truncated).is_empty());
    }

    #[derive(Default)]
    struct WordSplit;

    impl Tokenizer for WordSplit {
        fn tokenize<'a>(&self, line: &'a str) -> Vec<Token<'a>> {
            line.split_whitespace()
                .map(|word| Token::new(word, false))
                .collect()
        }
    }

    #[test]
    fn tokenizer_backend_is_swappable() {
        let lines = ["loop_", "_a.x", "_a.y", "'two words' b"];
        let special = BlockParser::new(ParserOptions::default()).parse(&lines);
        let naive = BlockParser::with_tokenizer(WordSplit, ParserOptions::default()).parse(&lines);
        assert_eq!(special[0].data_rows[0].value_ranges[0].length, 11);
        assert_eq!(naive[0].data_rows[0].value_ranges[0].length, 4);
    }

    #[test]
    fn parse_str_keeps_document() {
        let parsed = parse_str("data_demo\r\n_entry.id demo\r\n");
        assert_eq!(parsed.block_count(), 1);
        let block = &parsed.blocks()[0];
        let row = &block.data_rows[0];
        assert_eq!(parsed.value_text(row.line, &row.value_ranges[0]), Some("demo"));
    }
}

use std::collections::BTreeMap;

use once_cell::unsync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::source::{char_slice, LineSource, TextDocument};

/// Position of a declared field name: the part of `_category.field` after the
/// dot.
///
/// `start` and `length` count `char`s of the line, so a character outside the
/// BMP counts once here but twice in UTF-16 editor columns.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub line: usize,
    pub start: usize,
    pub length: usize,
    pub field_name: String,
}

impl FieldDefinition {
    #[inline]
    pub fn end(&self) -> usize {
        self.start + self.length
    }

    /// Inclusive of the end offset, so a cursor sitting right after the
    /// name still hits it.
    pub fn contains(&self, line: usize, character: usize) -> bool {
        self.line == line && character >= self.start && character <= self.end()
    }
}

/// One value on a data line. Offsets are in `char`s, like
/// [`FieldDefinition`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValueRange {
    pub start: usize,
    pub length: usize,
    pub column_index: usize,
}

impl ValueRange {
    #[inline]
    pub fn end(&self) -> usize {
        self.start + self.length
    }

    pub fn contains(&self, character: usize) -> bool {
        character >= self.start && character <= self.end()
    }
}

/// Lines spanned by a `;`-delimited text field, delimiters included.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MultiLineRange {
    pub start_line: usize,
    pub end_line: usize,
}

impl MultiLineRange {
    pub fn contains(&self, line: usize) -> bool {
        (self.start_line..=self.end_line).contains(&line)
    }
}

/// Values found on one physical line.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataRow {
    pub line: usize,
    pub value_ranges: Vec<ValueRange>,
    /// Set on every line of a multi-line text field.
    pub multi_line: Option<MultiLineRange>,
}

/// A `loop_` table, or a run of consecutive single items of one category.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub start_line: usize,
    pub category_name: String,
    pub field_names: Vec<FieldDefinition>,
    pub data_rows: Vec<DataRow>,
    pub is_loop: bool,
}

impl Block {
    pub fn field_count(&self) -> usize {
        self.field_names.len()
    }

    pub fn field(&self, column: usize) -> Option<&FieldDefinition> {
        self.field_names.get(column)
    }

    /// Full data name of a column, e.g. `_atom_site.label_atom_id`.
    pub fn tag_name(&self, column: usize) -> Option<String> {
        self.field(column)
            .map(|field| format!("{}.{}", self.category_name, field.field_name))
    }

    pub fn column_of(&self, field_name: &str) -> Option<usize> {
        self.field_names
            .iter()
            .position(|field| field.field_name == field_name)
    }

    /// Last line holding a field declaration or a value of this block.
    pub fn end_line(&self) -> usize {
        let last_field = self.field_names.iter().map(|field| field.line).max();
        let last_row = self.data_rows.iter().map(|row| row.line).max();
        last_field
            .into_iter()
            .chain(last_row)
            .max()
            .unwrap_or(self.start_line)
            .max(self.start_line)
    }

    pub fn values_in_column(&self, column: usize) -> impl Iterator<Item = (usize, &ValueRange)> + '_ {
        self.data_rows.iter().flat_map(move |row| {
            row.value_ranges
                .iter()
                .filter(move |range| range.column_index == column)
                .map(move |range| (row.line, range))
        })
    }
}

/// Parsed blocks together with the text they point into.
#[derive(Debug, Default)]
pub struct ParsedDocument {
    document: TextDocument,
    blocks: Vec<Block>,
    cache: CategoryCache,
}

impl ParsedDocument {
    pub fn new(document: TextDocument, blocks: Vec<Block>) -> Self {
        Self {
            document,
            blocks,
            cache: CategoryCache::default(),
        }
    }

    pub fn document(&self) -> &TextDocument {
        &self.document
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn into_blocks(self) -> Vec<Block> {
        self.blocks
    }

    pub fn line_text(&self, line: usize) -> Option<&str> {
        self.document.line_at(line)
    }

    /// Raw text of a value, quotes included.
    pub fn value_text(&self, line: usize, range: &ValueRange) -> Option<&str> {
        char_slice(self.line_text(line)?, range.start, range.length)
    }

    pub fn field_text(&self, field: &FieldDefinition) -> Option<&str> {
        char_slice(self.line_text(field.line)?, field.start, field.length)
    }

    /// The block whose line range covers `line`.
    pub fn block_at_line(&self, line: usize) -> Option<&Block> {
        let candidate = self
            .blocks
            .partition_point(|block| block.start_line <= line)
            .checked_sub(1)?;
        let block = &self.blocks[candidate];
        (line <= block.end_line()).then_some(block)
    }

    /// Block indices per category name, in document order.
    pub fn categories(&self) -> &BTreeMap<String, Vec<usize>> {
        self.cache
            .by_category
            .get_or_init(|| build_category_map(&self.blocks))
    }

    pub fn blocks_in_category<'a>(&'a self, category: &str) -> impl Iterator<Item = &'a Block> + 'a {
        self.categories()
            .get(category)
            .into_iter()
            .flatten()
            .filter_map(move |&index| self.blocks.get(index))
    }
}

fn build_category_map(blocks: &[Block]) -> BTreeMap<String, Vec<usize>> {
    let mut map: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (index, block) in blocks.iter().enumerate() {
        map.entry(block.category_name.clone()).or_default().push(index);
    }
    map
}

impl Clone for ParsedDocument {
    fn clone(&self) -> Self {
        Self::new(self.document.clone(), self.blocks.clone())
    }
}

impl PartialEq for ParsedDocument {
    fn eq(&self, other: &Self) -> bool {
        self.document == other.document && self.blocks == other.blocks
    }
}

#[derive(Default, Debug)]
struct CategoryCache {
    by_category: OnceCell<BTreeMap<String, Vec<usize>>>,
}

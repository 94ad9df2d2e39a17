#![forbid(unsafe_code)]
//! Position queries built on top of `mmcif_blocks` output.
//! Everything here is a pure function over a parsed block list: feed in the
//! blocks and a `(line, character)` position to find what sits under a
//! cursor, the spans of a whole column, a category index for jumping around
//! a file, or confidence bands for predicted-model B-factor columns.

use std::collections::BTreeMap;

use mmcif_blocks::{Block, FieldDefinition, LineSource, ParsedDocument, ValueRange};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// Lines scanned by [`is_model_cif`].
pub const MODEL_CIF_SCAN_LINES: usize = 500;

const CONFIDENCE_FIELD: &str = "B_iso_or_equiv";

/// A character span on one line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Span {
    pub line: usize,
    pub start: usize,
    pub length: usize,
}

impl Span {
    pub fn new(line: usize, start: usize, length: usize) -> Self {
        Self {
            line,
            start,
            length,
        }
    }

    pub fn end(&self) -> usize {
        self.start + self.length
    }

    /// Inclusive of the end offset.
    pub fn contains(&self, line: usize, character: usize) -> bool {
        self.line == line && character >= self.start && character <= self.end()
    }

    fn of_value(line: usize, range: &ValueRange) -> Self {
        Self::new(line, range.start, range.length)
    }
}

impl From<&FieldDefinition> for Span {
    fn from(field: &FieldDefinition) -> Self {
        Self::new(field.line, field.start, field.length)
    }
}

/// What part of a block a position falls on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Target {
    /// The `_category` part of a field declaration.
    Category,
    /// The field part of a declaration, after the dot.
    Field,
    Value,
}

/// Result of [`locate`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hit {
    pub block_index: usize,
    pub column: usize,
    pub target: Target,
    pub span: Span,
}

/// First declaration of a category, for search and jump lists.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryEntry {
    pub name: String,
    pub block_index: usize,
    pub span: Span,
}

/// pLDDT confidence classes used by AlphaFold-style models.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConfidenceBand {
    VeryLow,
    Low,
    High,
    VeryHigh,
}

impl ConfidenceBand {
    /// `> 90` very high, `> 70` high, `> 50` low, anything else very low.
    pub fn classify(plddt: f64) -> Self {
        if plddt > 90.0 {
            ConfidenceBand::VeryHigh
        } else if plddt > 70.0 {
            ConfidenceBand::High
        } else if plddt > 50.0 {
            ConfidenceBand::Low
        } else {
            ConfidenceBand::VeryLow
        }
    }
}

/// Span of the `_category` prefix in front of a field declaration.
///
/// The parser records the field part only; the category sits directly before
/// it, separated by the dot.
pub fn category_span(block: &Block, field: &FieldDefinition) -> Option<Span> {
    let length = block.category_name.chars().count();
    let start = field.start.checked_sub(length + 1)?;
    Some(Span::new(field.line, start, length))
}

/// Find the declaration or value under `(line, character)`.
///
/// Blocks are searched in order. Within a block field declarations win over
/// values, and the first match ends the search.
pub fn locate(blocks: &[Block], line: usize, character: usize) -> Option<Hit> {
    for (block_index, block) in blocks.iter().enumerate() {
        if let Some(hit) = locate_in_block(block, line, character) {
            return Some(Hit {
                block_index,
                ..hit
            });
        }
    }
    None
}

fn locate_in_block(block: &Block, line: usize, character: usize) -> Option<Hit> {
    for (column, field) in block.field_names.iter().enumerate() {
        if field.contains(line, character) {
            return Some(Hit {
                block_index: 0,
                column,
                target: Target::Field,
                span: Span::from(field),
            });
        }
        if let Some(span) = category_span(block, field).filter(|span| span.contains(line, character))
        {
            return Some(Hit {
                block_index: 0,
                column,
                target: Target::Category,
                span,
            });
        }
    }

    block
        .data_rows
        .iter()
        .filter(|row| row.line == line)
        .flat_map(|row| row.value_ranges.iter())
        .find(|range| range.contains(character))
        .map(|range| Hit {
            block_index: 0,
            column: range.column_index,
            target: Target::Value,
            span: Span::of_value(line, range),
        })
}

/// Header span of `column` followed by every value span in it, in row order.
pub fn column_ranges(block: &Block, column: usize) -> Vec<Span> {
    block
        .field(column)
        .map(Span::from)
        .into_iter()
        .chain(
            block
                .values_in_column(column)
                .map(|(line, range)| Span::of_value(line, range)),
        )
        .collect()
}

/// Spans to highlight for a cursor at `(line, character)`: the whole column
/// under it. Empty when nothing is hit or the cursor is on a category prefix.
pub fn highlight_at(blocks: &[Block], line: usize, character: usize) -> Vec<Span> {
    match locate(blocks, line, character) {
        Some(hit) if hit.target != Target::Category => {
            column_ranges(&blocks[hit.block_index], hit.column)
        }
        _ => Vec::new(),
    }
}

/// Unique category names in sorted order, each pointing at its first field
/// declaration in the document.
pub fn category_index(blocks: &[Block]) -> Vec<CategoryEntry> {
    let mut first_seen: BTreeMap<&str, (usize, Span)> = BTreeMap::new();
    for (block_index, block) in blocks.iter().enumerate() {
        if block.category_name.is_empty() {
            continue;
        }
        let span = block
            .field_names
            .first()
            .map(Span::from)
            .unwrap_or_else(|| Span::new(block.start_line, 0, 0));
        first_seen
            .entry(block.category_name.as_str())
            .or_insert((block_index, span));
    }
    first_seen
        .into_iter()
        .map(|(name, (block_index, span))| CategoryEntry {
            name: name.to_string(),
            block_index,
            span,
        })
        .collect()
}

/// Position of each block within its run of consecutive non-loop blocks of
/// the same category.
///
/// Loop blocks get 0 and reset the count, as does a change of category. A
/// category repeated back to back (a repeated field name closing the block)
/// yields 0, 1, 2, ... so alternating styles can tell the entries apart.
pub fn category_runs(blocks: &[Block]) -> Vec<usize> {
    let mut runs = Vec::with_capacity(blocks.len());
    let mut previous: Option<&str> = None;
    let mut ordinal = 0usize;
    for block in blocks {
        if block.is_loop {
            previous = None;
            ordinal = 0;
            runs.push(0);
            continue;
        }
        if previous == Some(block.category_name.as_str()) {
            ordinal += 1;
        } else {
            ordinal = 0;
        }
        previous = Some(block.category_name.as_str());
        runs.push(ordinal);
    }
    runs
}

/// Classify `B_iso_or_equiv` values of `atom_site` blocks as pLDDT scores.
///
/// `resolve_text` maps a value position to its raw text. Values that do not
/// parse as a number are skipped.
pub fn plddt_bands<'s, F>(blocks: &[Block], resolve_text: F) -> Vec<(Span, ConfidenceBand)>
where
    F: Fn(usize, &ValueRange) -> Option<&'s str>,
{
    let mut bands = Vec::new();
    for block in blocks.iter().filter(|block| block.category_name.contains("atom_site")) {
        let Some(column) = block.column_of(CONFIDENCE_FIELD) else {
            continue;
        };
        for (line, range) in block.values_in_column(column) {
            let Some(text) = resolve_text(line, range) else {
                continue;
            };
            match text.trim().parse::<f64>() {
                Ok(plddt) if !plddt.is_nan() => {
                    bands.push((Span::of_value(line, range), ConfidenceBand::classify(plddt)))
                }
                _ => trace!(line, value = text, "skipping non-numeric confidence value"),
            }
        }
    }
    debug!(values = bands.len(), "classified confidence values");
    bands
}

/// Confidence bands for a parsed document, or nothing when the document is
/// not a predicted model.
pub fn model_confidence(parsed: &ParsedDocument) -> Vec<(Span, ConfidenceBand)> {
    if !is_model_cif(parsed.document()) {
        return Vec::new();
    }
    plddt_bands(parsed.blocks(), |line, range| parsed.value_text(line, range))
}

/// Whether the source declares conformance to the ModelCIF dictionary
/// within its first [`MODEL_CIF_SCAN_LINES`] lines.
pub fn is_model_cif<L: LineSource + ?Sized>(source: &L) -> bool {
    (0..source.line_count().min(MODEL_CIF_SCAN_LINES))
        .filter_map(|index| source.line_at(index))
        .any(|line| line.contains("_audit_conform.dict_name") && line.contains("mmcif_ma.dic"))
}

//! Whitespace/quote tokenizer for a single mmCIF line.
//!
//! A quote character only opens or closes a quoted run when it sits next to
//! whitespace or a line boundary, so apostrophes inside bare words (`C4'A`,
//! `N,N'-dimethyl`) stay part of the word. Quote state never carries over to
//! the next line.

/// One whitespace-delimited token of a line.
///
/// `text` borrows the exact slice of the line the token was read from,
/// including the delimiting quotes of a quoted run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Token<'a> {
    pub text: &'a str,
    pub quoted: bool,
}

impl<'a> Token<'a> {
    pub fn new(text: &'a str, quoted: bool) -> Self {
        Self { text, quoted }
    }

    /// `_category.field` style name. Quoted text is always a value.
    pub fn is_data_name(&self) -> bool {
        !self.quoted && self.text.starts_with('_')
    }

    pub fn is_loop_keyword(&self) -> bool {
        self.matches_keyword("loop_", false)
    }

    /// `global_`, or anything starting with `data_` or `save_`.
    pub fn is_block_keyword(&self) -> bool {
        self.matches_keyword("global_", false)
            || self.has_keyword_prefix("data_", false)
            || self.has_keyword_prefix("save_", false)
    }

    pub(crate) fn matches_keyword(&self, keyword: &str, ignore_case: bool) -> bool {
        if self.quoted {
            return false;
        }
        if ignore_case {
            self.text.eq_ignore_ascii_case(keyword)
        } else {
            self.text == keyword
        }
    }

    pub(crate) fn has_keyword_prefix(&self, prefix: &str, ignore_case: bool) -> bool {
        if self.quoted {
            return false;
        }
        match self.text.get(..prefix.len()) {
            Some(head) if ignore_case => head.eq_ignore_ascii_case(prefix),
            Some(head) => head == prefix,
            None => false,
        }
    }
}

/// Splits one line of text into tokens.
///
/// Implementations must return tokens in line order, and every token's text
/// must occur in the line at or after the end of the previous token.
pub trait Tokenizer {
    fn tokenize<'a>(&self, line: &'a str) -> Vec<Token<'a>>;
}

/// The canonical mmCIF line splitter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SpecialSplit;

impl Tokenizer for SpecialSplit {
    fn tokenize<'a>(&self, line: &'a str) -> Vec<Token<'a>> {
        let mut tokens = Vec::new();
        let mut open_quote: Option<char> = None;
        // (byte offset of the first character, quoted)
        let mut current: Option<(usize, bool)> = None;
        let mut end = line.len();
        let mut previous: Option<char> = None;
        let mut chars = line.char_indices().peekable();

        while let Some((index, ch)) = chars.next() {
            let next = chars.peek().map(|&(_, c)| c);
            let toggles = matches!(ch, '\'' | '"')
                && (previous.map_or(true, is_blank) || next.map_or(true, is_blank))
                && open_quote.map_or(true, |quote| quote == ch);

            if toggles {
                open_quote = match open_quote {
                    Some(_) => None,
                    None => Some(ch),
                };
                current.get_or_insert((index, true)).1 = true;
            } else if open_quote.is_none() && is_blank(ch) {
                if let Some((start, quoted)) = current.take() {
                    tokens.push(Token::new(&line[start..index], quoted));
                }
            } else if open_quote.is_none() && ch == '#' {
                end = index;
                break;
            } else {
                let token = current.get_or_insert((index, false));
                if open_quote.is_some() {
                    token.1 = true;
                }
            }
            previous = Some(ch);
        }

        if let Some((start, quoted)) = current {
            tokens.push(Token::new(&line[start..end], quoted));
        }
        tokens
    }
}

/// Tokenizes `line` with [`SpecialSplit`].
pub fn tokenize(line: &str) -> Vec<Token<'_>> {
    SpecialSplit.tokenize(line)
}

fn is_blank(ch: char) -> bool {
    ch == ' ' || ch == '\t'
}

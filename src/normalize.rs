//! Flattening of chat markup into the plain text that filters run against.
//!
//! Filters should match what a human reads, not markup syntax: `**b**a*d*` reads as "bad".
//! Mentions and custom emoji collapse to a single space; code is passed through verbatim.

use crate::pattern::MatchSpan;
use anyhow::Result;
use lazy_static::lazy_static;
use regex::Regex;

/// Turns raw message markup into matchable text.
pub trait Normalizer: Send + Sync {
    fn normalize(&self, raw: &str) -> Result<NormalizedText>;
}

/// Normalized text plus, for every normalized character, the half-open range of raw
/// characters it stands for.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NormalizedText {
    text: String,
    sources: Vec<(usize, usize)>,
}

impl NormalizedText {
    /// Text that needs no flattening. Offsets map one to one.
    pub fn plain(text: &str) -> Self {
        Self {
            text: text.to_string(),
            sources: (0..text.chars().count()).map(|i| (i, i + 1)).collect(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Length in characters.
    pub fn char_len(&self) -> usize {
        self.sources.len()
    }

    /// Raw-text character interval covered by a span over this text, or `None` if the
    /// span doesn't fit inside it.
    pub fn raw_span(&self, span: &MatchSpan) -> Option<(usize, usize)> {
        if span.high() > self.sources.len() || span.low() >= span.high() {
            return None;
        }
        Some((self.sources[span.low()].0, self.sources[span.high() - 1].1))
    }

    fn push(&mut self, c: char, source: (usize, usize)) {
        self.text.push(c);
        self.sources.push(source);
    }
}

/// Normalizer for text that carries no markup.
#[derive(Clone, Copy, Debug, Default)]
pub struct PlainText;

impl Normalizer for PlainText {
    fn normalize(&self, raw: &str) -> Result<NormalizedText> {
        Ok(NormalizedText::plain(raw))
    }
}

/// Normalizer for Discord-flavoured markdown.
#[derive(Clone, Copy, Debug, Default)]
pub struct MarkdownNormalizer;

impl Normalizer for MarkdownNormalizer {
    fn normalize(&self, raw: &str) -> Result<NormalizedText> {
        let mut flattener = Flattener::new(raw);
        flattener.flatten(0, raw.len(), 0);
        Ok(flattener.out)
    }
}

/// Stands in for anything that renders as a picture or a pill rather than text.
const PLACEHOLDER: char = ' ';

lazy_static! {
    static ref CODE_BLOCK: Regex =
        Regex::new(r"^```(?i:[a-z0-9-]+?\n+)?\n*((?s:.+?))\n*```").unwrap();
    static ref ESCAPE: Regex = Regex::new(r"^\\([^0-9A-Za-z\s])").unwrap();
    static ref MENTION: Regex =
        Regex::new(r"^(?:<@!?\d+>|<@&\d+>|<#\d+>|<a?:\w+:\d+>|@everyone|@here)").unwrap();
    static ref AUTOLINK: Regex = Regex::new(r"^<(https?://[^\s>]+)>").unwrap();
    static ref BLOCK_QUOTE: Regex = Regex::new(r"^ *>>> ?").unwrap();
    static ref LINE_QUOTE: Regex = Regex::new(r"^ *> ").unwrap();
    /// Order matters: longer delimiters first.
    static ref DELIMITED: Vec<Regex> = vec![
        Regex::new(r"^\|\|((?s:.+?))\|\|").unwrap(),
        Regex::new(r"^\*\*((?s:.+?))\*\*").unwrap(),
        Regex::new(r"^__((?s:.+?))__").unwrap(),
        Regex::new(r"^~~((?s:.+?))~~").unwrap(),
        Regex::new(r"^\*([^\s*](?:(?s:.*?)[^\s*])?)\*").unwrap(),
    ];
    static ref EM_UNDERSCORE: Regex = Regex::new(r"^_((?s:[^_]+?))_\b").unwrap();
}

/// Length of the whole match and the byte range of its first group, relative to `rest`.
fn inner(regex: &Regex, rest: &str) -> Option<(usize, usize, usize)> {
    let caps = regex.captures(rest)?;
    let whole = caps.get(0)?;
    let group = caps.get(1)?;
    Some((whole.end(), group.start(), group.end()))
}

struct Flattener<'a> {
    raw: &'a str,
    /// Byte offset of each raw character.
    char_starts: Vec<usize>,
    out: NormalizedText,
}

impl<'a> Flattener<'a> {
    fn new(raw: &'a str) -> Self {
        Self {
            raw,
            char_starts: raw.char_indices().map(|(i, _)| i).collect(),
            out: Default::default(),
        }
    }

    fn char_at(&self, byte: usize) -> usize {
        match self.char_starts.binary_search(&byte) {
            Ok(i) | Err(i) => i,
        }
    }

    fn emit_verbatim(&mut self, start: usize, end: usize) {
        for (offset, c) in self.raw[start..end].char_indices() {
            let i = self.char_at(start + offset);
            self.out.push(c, (i, i + 1));
        }
    }

    fn emit_placeholder(&mut self, start: usize, end: usize) {
        let source = (self.char_at(start), self.char_at(end));
        self.out.push(PLACEHOLDER, source);
    }

    fn at_line_start(&self, pos: usize) -> bool {
        pos == 0 || self.raw[..pos].ends_with('\n')
    }

    /// Flatten `raw[start..end]`. `depth` is 0 outside any formatting span; quotes are
    /// only recognized there.
    fn flatten(&mut self, start: usize, end: usize, depth: usize) {
        let raw = self.raw;
        let mut pos = start;
        let mut in_block_quote = false;
        while pos < end {
            let rest = &raw[pos..end];

            if depth == 0 && !in_block_quote && self.at_line_start(pos) {
                if let Some(m) = BLOCK_QUOTE.find(rest) {
                    pos += m.end();
                    in_block_quote = true;
                    continue;
                }
                if let Some(m) = LINE_QUOTE.find(rest) {
                    pos += m.end();
                    continue;
                }
            }

            if let Some((len, inner_start, inner_end)) = inner(&CODE_BLOCK, rest) {
                self.emit_verbatim(pos + inner_start, pos + inner_end);
                pos += len;
                continue;
            }

            if rest.starts_with('`') {
                pos = self.inline_code(pos, end);
                continue;
            }

            if let Some((len, inner_start, inner_end)) = inner(&ESCAPE, rest) {
                self.emit_verbatim(pos + inner_start, pos + inner_end);
                pos += len;
                continue;
            }

            if let Some(m) = MENTION.find(rest) {
                self.emit_placeholder(pos, pos + m.end());
                pos += m.end();
                continue;
            }

            if let Some((len, inner_start, inner_end)) = inner(&AUTOLINK, rest) {
                self.emit_verbatim(pos + inner_start, pos + inner_end);
                pos += len;
                continue;
            }

            let emphasis = DELIMITED
                .iter()
                .find_map(|regex| inner(regex, rest))
                .or_else(|| {
                    if rest.starts_with('_') && !self.follows_word_char(pos) {
                        inner(&EM_UNDERSCORE, rest)
                    } else {
                        None
                    }
                });
            if let Some((len, inner_start, inner_end)) = emphasis {
                self.flatten(pos + inner_start, pos + inner_end, depth + 1);
                pos += len;
                continue;
            }

            let c_len = rest.chars().next().map(char::len_utf8).unwrap_or(1);
            self.emit_verbatim(pos, pos + c_len);
            pos += c_len;
        }
    }

    fn follows_word_char(&self, pos: usize) -> bool {
        self.raw[..pos]
            .chars()
            .next_back()
            .map(|c| c.is_alphanumeric() || c == '_')
            .unwrap_or(false)
    }

    /// Inline code delimited by a run of N backticks closes at the next run of exactly N.
    /// Without a closing run the backticks are plain text. Returns the new position.
    fn inline_code(&mut self, pos: usize, end: usize) -> usize {
        let raw = self.raw;
        let rest = &raw[pos..end];
        let fence = rest.len() - rest.trim_start_matches('`').len();
        let body_start = pos + fence;

        let mut search = body_start;
        while search < end {
            let Some(found) = raw[search..end].find('`') else {
                break;
            };
            let run_start = search + found;
            let run = &raw[run_start..end];
            let run_len = run.len() - run.trim_start_matches('`').len();
            if run_len == fence && run_start > body_start {
                self.emit_verbatim(body_start, run_start);
                return run_start + run_len;
            }
            search = run_start + run_len;
        }

        self.emit_verbatim(pos, body_start);
        body_start
    }
}

//! Recursive separator-based chunking with line provenance recovery.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use crate::languages::{GENERIC_SEPARATORS, Grammar, detect_grammar};

/// 1-based inclusive line range of a chunk in its source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineRange {
    pub start: usize,
    pub end: usize,
}

/// One chunk of a source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub rel_path: String,
    pub text: String,
    /// Position in the chunker's output sequence for this file.
    pub index: usize,
    /// `None` when the chunk text could not be located in the source.
    pub lines: Option<LineRange>,
}

impl Chunk {
    /// Start line, or `-1` when provenance is unresolved.
    #[must_use]
    pub fn start_line(&self) -> i64 {
        self.lines
            .map_or(-1, |l| i64::try_from(l.start).unwrap_or(i64::MAX))
    }

    /// End line, or `-1` when provenance is unresolved.
    #[must_use]
    pub fn end_line(&self) -> i64 {
        self.lines
            .map_or(-1, |l| i64::try_from(l.end).unwrap_or(i64::MAX))
    }
}

/// Chunker configuration. Sizes are measured in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkerConfig {
    /// Target size for files with a known grammar (default: 500).
    pub code_chunk_size: usize,
    /// Overlap for files with a known grammar (default: 50).
    pub code_overlap: usize,
    /// Target size for everything else (default: 1000).
    pub text_chunk_size: usize,
    /// Overlap for everything else (default: 100).
    pub text_overlap: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            code_chunk_size: 500,
            code_overlap: 50,
            text_chunk_size: 1000,
            text_overlap: 100,
        }
    }
}

enum Separator {
    Pattern(Regex),
    Chars,
}

/// Invalid patterns are logged and left out of the separator list.
fn compile(patterns: &[&str], escape: bool) -> Vec<Separator> {
    patterns
        .iter()
        .filter_map(|p| {
            if p.is_empty() {
                return Some(Separator::Chars);
            }
            let source = if escape { regex::escape(p) } else { (*p).to_owned() };
            match Regex::new(&source) {
                Ok(re) => Some(Separator::Pattern(re)),
                Err(e) => {
                    tracing::warn!(pattern = %p, "skipping invalid separator pattern: {e}");
                    None
                }
            }
        })
        .collect()
}

static GRAMMAR_SEPARATORS: LazyLock<HashMap<Grammar, Vec<Separator>>> = LazyLock::new(|| {
    Grammar::ALL
        .into_iter()
        .map(|g| (g, compile(g.separators(), false)))
        .collect()
});

static GENERIC: LazyLock<Vec<Separator>> = LazyLock::new(|| compile(GENERIC_SEPARATORS, true));

/// Splits file text into overlapping chunks and recovers their line ranges.
#[derive(Debug, Clone, Default)]
pub struct Chunker {
    config: ChunkerConfig,
}

impl Chunker {
    #[must_use]
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Split `text` into an ordered chunk sequence.
    ///
    /// The splitter is chosen from the extension of `rel_path`. Identical
    /// input and configuration always yield identical output.
    #[must_use]
    pub fn chunk(&self, rel_path: &str, text: &str) -> Vec<Chunk> {
        let (separators, size, overlap) = match detect_grammar(Path::new(rel_path)) {
            Some(grammar) => (
                &GRAMMAR_SEPARATORS[&grammar],
                self.config.code_chunk_size,
                self.config.code_overlap,
            ),
            None => (
                &*GENERIC,
                self.config.text_chunk_size,
                self.config.text_overlap,
            ),
        };
        let splitter = Splitter {
            chunk_size: size.max(1),
            overlap,
        };
        let pieces = splitter.split(text, separators);
        locate(rel_path, text, pieces, overlap)
    }
}

struct Splitter {
    chunk_size: usize,
    overlap: usize,
}

impl Splitter {
    fn split(&self, text: &str, separators: &[Separator]) -> Vec<String> {
        let mut chosen = separators.len().saturating_sub(1);
        let mut rest: &[Separator] = &[];
        for (i, sep) in separators.iter().enumerate() {
            match sep {
                Separator::Chars => {
                    chosen = i;
                    break;
                }
                Separator::Pattern(re) if re.is_match(text) => {
                    chosen = i;
                    rest = &separators[i + 1..];
                    break;
                }
                Separator::Pattern(_) => {}
            }
        }

        let pieces = match separators.get(chosen) {
            Some(Separator::Pattern(re)) => split_keep_separator(text, re),
            _ => split_chars(text),
        };

        let mut out = Vec::new();
        let mut good: Vec<&str> = Vec::new();
        for piece in pieces {
            if char_len(piece) < self.chunk_size {
                good.push(piece);
                continue;
            }
            if !good.is_empty() {
                out.extend(self.merge(&good));
                good.clear();
            }
            if rest.is_empty() {
                out.push(piece.to_owned());
            } else {
                out.extend(self.split(piece, rest));
            }
        }
        if !good.is_empty() {
            out.extend(self.merge(&good));
        }
        out
    }

    /// Greedily merge small pieces up to the chunk size, carrying at most
    /// `overlap` characters of trailing pieces into the next chunk.
    fn merge(&self, pieces: &[&str]) -> Vec<String> {
        let mut docs = Vec::new();
        let mut current: VecDeque<&str> = VecDeque::new();
        let mut total = 0usize;

        for &piece in pieces {
            let len = char_len(piece);
            if total + len > self.chunk_size && !current.is_empty() {
                if let Some(doc) = join(&current) {
                    docs.push(doc);
                }
                while total > self.overlap || (total + len > self.chunk_size && total > 0) {
                    let Some(first) = current.pop_front() else {
                        break;
                    };
                    total -= char_len(first);
                }
            }
            current.push_back(piece);
            total += len;
        }
        if let Some(doc) = join(&current) {
            docs.push(doc);
        }
        docs
    }
}

fn join(pieces: &VecDeque<&str>) -> Option<String> {
    let joined: String = pieces.iter().copied().collect();
    let trimmed = joined.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_owned())
}

/// Split on every match, keeping each separator at the start of the piece
/// that follows it. Empty pieces are dropped.
fn split_keep_separator<'a>(text: &'a str, re: &Regex) -> Vec<&'a str> {
    let mut pieces = Vec::new();
    let mut last = 0;
    for m in re.find_iter(text) {
        pieces.push(&text[last..m.start()]);
        last = m.start();
    }
    pieces.push(&text[last..]);
    pieces.retain(|p| !p.is_empty());
    pieces
}

fn split_chars(text: &str) -> Vec<&str> {
    text.char_indices()
        .map(|(i, c)| &text[i..i + c.len_utf8()])
        .collect()
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Byte offsets at which each line starts.
struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    fn new(text: &str) -> Self {
        let mut starts = vec![0];
        starts.extend(text.match_indices('\n').map(|(i, _)| i + 1));
        Self { starts }
    }

    /// 1-based line containing `offset`: the index of the first line start
    /// strictly greater than `offset`, or the last line when none is.
    fn line_of(&self, offset: usize) -> usize {
        self.starts.partition_point(|&s| s <= offset).max(1)
    }
}

fn locate(rel_path: &str, source: &str, pieces: Vec<String>, overlap: usize) -> Vec<Chunk> {
    let lines = LineIndex::new(source);
    let mut cursor = 0usize;
    let mut prev: Option<(usize, usize)> = None;
    let mut chunks = Vec::with_capacity(pieces.len());

    for (index, text) in pieces.into_iter().enumerate() {
        let mut found = find_from(source, cursor, &text);
        if let (Some(pos), Some((prev_start, prev_end))) = (found, prev)
            && pos == prev_start
            && source[prev_start..prev_end] == text
        {
            found = find_from(source, next_boundary(source, prev_start), &text);
        }

        let range = match found {
            Some(start) => {
                let end = start + text.len();
                cursor = back_off(source, end, overlap).max(start);
                prev = Some((start, end));
                Some(LineRange {
                    start: lines.line_of(start),
                    end: lines.line_of(end.saturating_sub(1).max(start)),
                })
            }
            None => {
                tracing::debug!(file = rel_path, index, "chunk not found in source");
                None
            }
        };

        chunks.push(Chunk {
            rel_path: rel_path.to_owned(),
            text,
            index,
            lines: range,
        });
    }
    chunks
}

fn find_from(haystack: &str, from: usize, needle: &str) -> Option<usize> {
    haystack.get(from..)?.find(needle).map(|i| from + i)
}

fn next_boundary(text: &str, at: usize) -> usize {
    text[at..].chars().next().map_or(text.len(), |c| at + c.len_utf8())
}

/// Byte offset `chars` characters before `from`.
fn back_off(text: &str, from: usize, chars: usize) -> usize {
    if chars == 0 {
        return from;
    }
    text[..from]
        .char_indices()
        .rev()
        .nth(chars - 1)
        .map_or(0, |(i, _)| i)
}

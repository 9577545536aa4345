//! Structured element extraction
//!
//! Recovers fenced code blocks and pipe tables from free-form model output so
//! the shell can list them and show one by index. Extraction is best-effort:
//! malformed fences and tables are skipped, never reported as errors.
//!
//! # Rules
//!
//! - A code block opens with a run of at least three backticks or tildes,
//!   optionally followed by a language tag, and closes with a run of the same
//!   character at least as long. Blocks without a closing fence are dropped.
//! - A table is a header row followed by a separator row (cells of the form
//!   `---`, `:--`, `--:` or `:-:`) with the same number of cells, plus any
//!   directly following rows. Lines inside code fences never form tables.

use regex::Regex;
use sdk::errors::EngineError;
use std::fmt;
use std::iter::Peekable;
use std::str::Lines;
use std::sync::OnceLock;

/// Which kind of element a request refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    CodeBlock,
    Table,
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementKind::CodeBlock => write!(f, "code block"),
            ElementKind::Table => write!(f, "table"),
        }
    }
}

/// A fenced code block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBlock {
    /// Position among the code blocks of the source text
    pub index: usize,
    pub language: Option<String>,
    /// Lines between the fences, joined with `\n`
    pub body: String,
}

/// A pipe table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    /// Position among the tables of the source text
    pub index: usize,
    /// Raw rows, header and separator included
    pub rows: Vec<String>,
}

impl Table {
    pub fn raw(&self) -> String {
        self.rows.join("\n")
    }
}

static SEPARATOR_CELL: OnceLock<Regex> = OnceLock::new();

fn separator_cell() -> &'static Regex {
    SEPARATOR_CELL.get_or_init(|| Regex::new(r"^:?-+:?$").expect("Invalid separator pattern"))
}

#[derive(Debug, Clone, Copy)]
struct Fence {
    marker: char,
    len: usize,
}

/// Returns the fence and info string when `line` opens a code fence.
fn open_fence(line: &str) -> Option<(Fence, &str)> {
    let trimmed = line.trim_start();
    let marker = trimmed.chars().next().filter(|c| *c == '`' || *c == '~')?;
    let len = trimmed.chars().take_while(|c| *c == marker).count();
    if len < 3 {
        return None;
    }
    let info = trimmed[len..].trim();
    // Backtick fences may not carry backticks in their info string.
    if marker == '`' && info.contains('`') {
        return None;
    }
    Some((Fence { marker, len }, info))
}

fn closes(fence: Fence, line: &str) -> bool {
    let trimmed = line.trim();
    let run = trimmed.chars().take_while(|c| *c == fence.marker).count();
    run >= fence.len && run == trimmed.chars().count()
}

/// Lazy iterator over the code blocks of a text.
pub struct CodeBlocks<'a> {
    lines: Lines<'a>,
    next_index: usize,
}

impl<'a> Iterator for CodeBlocks<'a> {
    type Item = CodeBlock;

    fn next(&mut self) -> Option<CodeBlock> {
        while let Some(line) = self.lines.next() {
            let Some((fence, info)) = open_fence(line) else {
                continue;
            };
            let language = info
                .split_whitespace()
                .next()
                .map(str::to_string);

            let mut body = Vec::new();
            let mut closed = false;
            for inner in self.lines.by_ref() {
                if closes(fence, inner) {
                    closed = true;
                    break;
                }
                body.push(inner);
            }
            if !closed {
                // An unterminated fence swallows the rest of the text.
                return None;
            }

            let block = CodeBlock {
                index: self.next_index,
                language,
                body: body.join("\n"),
            };
            self.next_index += 1;
            return Some(block);
        }
        None
    }
}

/// Lazy iterator over the pipe tables of a text.
pub struct Tables<'a> {
    lines: Peekable<Lines<'a>>,
    fence: Option<Fence>,
    next_index: usize,
}

fn split_cells(line: &str) -> Option<Vec<&str>> {
    let trimmed = line.trim();
    if trimmed.is_empty() || !trimmed.contains('|') {
        return None;
    }
    let inner = trimmed.strip_prefix('|').unwrap_or(trimmed);
    let inner = inner.strip_suffix('|').unwrap_or(inner);
    Some(inner.split('|').map(str::trim).collect())
}

fn is_separator(line: &str, width: usize) -> bool {
    match split_cells(line) {
        Some(cells) => {
            cells.len() == width && cells.iter().all(|cell| separator_cell().is_match(cell))
        }
        None => false,
    }
}

impl<'a> Tables<'a> {
    /// Advances the fence state for `line`; returns true when the line is
    /// fence syntax or code content.
    fn in_code(&mut self, line: &str) -> bool {
        match self.fence {
            Some(fence) => {
                if closes(fence, line) {
                    self.fence = None;
                }
                true
            }
            None => match open_fence(line) {
                Some((fence, _)) => {
                    self.fence = Some(fence);
                    true
                }
                None => false,
            },
        }
    }
}

impl<'a> Iterator for Tables<'a> {
    type Item = Table;

    fn next(&mut self) -> Option<Table> {
        while let Some(line) = self.lines.next() {
            if self.in_code(line) {
                continue;
            }
            let Some(header) = split_cells(line) else {
                continue;
            };
            let qualifies = self
                .lines
                .peek()
                .is_some_and(|next| is_separator(next, header.len()));
            if !qualifies {
                continue;
            }

            let mut rows = vec![line.trim().to_string()];
            if let Some(separator) = self.lines.next() {
                rows.push(separator.trim().to_string());
            }
            while let Some(next) = self.lines.peek() {
                if split_cells(next).is_none() || open_fence(next).is_some() {
                    break;
                }
                rows.push(next.trim().to_string());
                self.lines.next();
            }

            let table = Table {
                index: self.next_index,
                rows,
            };
            self.next_index += 1;
            return Some(table);
        }
        None
    }
}

/// Code blocks of `text`, in order of appearance.
pub fn code_blocks(text: &str) -> CodeBlocks<'_> {
    CodeBlocks {
        lines: text.lines(),
        next_index: 0,
    }
}

/// Tables of `text`, in order of appearance.
pub fn tables(text: &str) -> Tables<'_> {
    Tables {
        lines: text.lines().peekable(),
        fence: None,
        next_index: 0,
    }
}

/// Elements of the last final answer, materialized for repeated lookups.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    code_blocks: Vec<CodeBlock>,
    tables: Vec<Table>,
}

impl Extraction {
    pub fn from_text(text: &str) -> Self {
        Self {
            code_blocks: code_blocks(text).collect(),
            tables: tables(text).collect(),
        }
    }

    pub fn code_blocks(&self) -> &[CodeBlock] {
        &self.code_blocks
    }

    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    pub fn is_empty(&self) -> bool {
        self.code_blocks.is_empty() && self.tables.is_empty()
    }

    /// Code block at `index`, as typed by the user.
    pub fn code_block(&self, index: usize) -> Result<&CodeBlock, EngineError> {
        lookup(&self.code_blocks, ElementKind::CodeBlock, index)
    }

    /// Table at `index`, as typed by the user.
    pub fn table(&self, index: usize) -> Result<&Table, EngineError> {
        lookup(&self.tables, ElementKind::Table, index)
    }
}

fn lookup<T>(items: &[T], kind: ElementKind, index: usize) -> Result<&T, EngineError> {
    if items.is_empty() {
        return Err(EngineError::ExtractionEmpty(kind.to_string()));
    }
    items.get(index).ok_or_else(|| EngineError::IndexOutOfRange {
        kind: kind.to_string(),
        index,
        len: items.len(),
    })
}

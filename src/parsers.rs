//! Fragment parsers and the registry that scans documents with them

use std::ops::Range;
use std::sync::LazyLock;

use log::debug;
use regex::Regex;

use crate::error::ParseError;
use crate::fragment::{Fragment, FragmentKind};

/// Environments recognised as display math when written as `\begin{env}`
const MATH_ENVIRONMENTS: &[&str] = &[
    "equation",
    "align",
    "alignat",
    "flalign",
    "gather",
    "multline",
    "eqnarray",
    "displaymath",
];

static BEGIN_ENV_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\\begin\{([A-Za-z]+\*?)\}").expect("Failed to compile begin environment regex")
});

static MARKDOWN_IMAGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^!\[[^\]\n]*\]\(\s*([^)\s]+)(?:\s+"[^"\n]*")?\s*\)"#)
        .expect("Failed to compile markdown image regex")
});

static ORG_IMAGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[\[(?:file:)?([^\]\n]+)\](?:\[[^\]\n]*\])?\]")
        .expect("Failed to compile org image link regex")
});

/// Recognises one kind of fragment.
///
/// `delimiter_pattern` only has to find candidate starting positions; the
/// registry combines the patterns of all parsers into one scanning regex and
/// calls `parse_at` at every match.
pub trait FragmentParser: Send + Sync {
    fn kind(&self) -> FragmentKind;

    fn delimiter_pattern(&self) -> &str;

    /// `Ok(None)`: not this kind. `Err`: this kind, but malformed.
    fn parse_at(&self, document: &str, pos: usize) -> Result<Option<Fragment>, ParseError>;
}

/// `$$...$$`, `\[...\]` and `\begin{equation}...\end{equation}` style math
pub struct BlockMathParser;

impl FragmentParser for BlockMathParser {
    fn kind(&self) -> FragmentKind {
        FragmentKind::BlockMath
    }

    fn delimiter_pattern(&self) -> &str {
        r"\$\$|\\\[|\\begin\{[A-Za-z]+\*?\}"
    }

    fn parse_at(&self, document: &str, pos: usize) -> Result<Option<Fragment>, ParseError> {
        if is_escaped(document, pos) {
            return Ok(None);
        }
        let rest = &document[pos..];

        let (open_len, close) = if rest.starts_with("$$") {
            (2, "$$".to_string())
        } else if rest.starts_with("\\[") {
            (2, "\\]".to_string())
        } else if let Some(caps) = BEGIN_ENV_RE.captures(rest) {
            let env = &caps[1];
            if !MATH_ENVIRONMENTS.contains(&env.trim_end_matches('*')) {
                return Ok(None);
            }
            (caps[0].len(), format!("\\end{{{env}}}"))
        } else {
            return Ok(None);
        };

        let begin_content = pos + open_len;
        let Some(found) = document[begin_content..].find(&close) else {
            return Err(ParseError::Unterminated {
                kind: self.kind(),
                offset: pos,
            });
        };
        let end_content = begin_content + found;
        let end = end_content + close.len();

        Fragment::new(document, self.kind(), pos..end, begin_content..end_content).map(Some)
    }
}

/// `$...$` and `\(...\)` math
pub struct InlineMathParser;

impl FragmentParser for InlineMathParser {
    fn kind(&self) -> FragmentKind {
        FragmentKind::InlineMath
    }

    fn delimiter_pattern(&self) -> &str {
        r"\$|\\\("
    }

    fn parse_at(&self, document: &str, pos: usize) -> Result<Option<Fragment>, ParseError> {
        if is_escaped(document, pos) {
            return Ok(None);
        }
        let rest = &document[pos..];

        if rest.starts_with("$$") {
            return Ok(None);
        }

        if rest.starts_with("\\(") {
            let begin_content = pos + 2;
            let Some(found) = document[begin_content..].find("\\)") else {
                return Err(ParseError::Unterminated {
                    kind: self.kind(),
                    offset: pos,
                });
            };
            let end_content = begin_content + found;
            return Fragment::new(
                document,
                self.kind(),
                pos..end_content + 2,
                begin_content..end_content,
            )
            .map(Some);
        }

        if !rest.starts_with('$') {
            return Ok(None);
        }

        // `$ 5` is a price, not math
        let begin_content = pos + 1;
        match document[begin_content..].chars().next() {
            Some(c) if !c.is_whitespace() => {}
            _ => return Ok(None),
        }

        let Some(end_content) = find_inline_close(document, begin_content) else {
            return Err(ParseError::Unterminated {
                kind: self.kind(),
                offset: pos,
            });
        };

        Fragment::new(
            document,
            self.kind(),
            pos..end_content + 1,
            begin_content..end_content,
        )
        .map(Some)
    }
}

/// Pipe tables (`| a | b |`), one fragment per block of consecutive rows
pub struct TableParser;

impl FragmentParser for TableParser {
    fn kind(&self) -> FragmentKind {
        FragmentKind::Table
    }

    fn delimiter_pattern(&self) -> &str {
        r"(?m:^[ \t]*\|)"
    }

    fn parse_at(&self, document: &str, pos: usize) -> Result<Option<Fragment>, ParseError> {
        if pos > 0 && document.as_bytes()[pos - 1] != b'\n' {
            return Ok(None);
        }

        let mut offset = pos;
        let mut end = pos;
        let mut has_row = false;
        for line in document[pos..].split_inclusive('\n') {
            let body = line.trim_end_matches(['\n', '\r']);
            if !body.trim_start().starts_with('|') {
                break;
            }
            if !is_separator_row(body) {
                has_row = true;
            }
            end = offset + body.len();
            offset += line.len();
        }

        if !has_row {
            return Ok(None);
        }

        Fragment::new(document, self.kind(), pos..end, pos..end).map(Some)
    }
}

/// Markdown `![alt](path)` and org `[[file:path.png]]` image links
pub struct ImageParser;

impl FragmentParser for ImageParser {
    fn kind(&self) -> FragmentKind {
        FragmentKind::Image
    }

    fn delimiter_pattern(&self) -> &str {
        r"!\[|\[\["
    }

    fn parse_at(&self, document: &str, pos: usize) -> Result<Option<Fragment>, ParseError> {
        let rest = &document[pos..];

        let (whole, path) = if let Some(caps) = MARKDOWN_IMAGE_RE.captures(rest) {
            let (Some(whole), Some(path)) = (caps.get(0), caps.get(1)) else {
                return Ok(None);
            };
            (whole.range(), path.range())
        } else if let Some(caps) = ORG_IMAGE_RE.captures(rest) {
            let (Some(whole), Some(path)) = (caps.get(0), caps.get(1)) else {
                return Ok(None);
            };
            if !has_image_extension(path.as_str()) {
                return Ok(None);
            }
            (whole.range(), path.range())
        } else {
            return Ok(None);
        };

        Fragment::new(
            document,
            self.kind(),
            pos + whole.start..pos + whole.end,
            pos + path.start..pos + path.end,
        )
        .map(Some)
    }
}

/// The ordered set of parsers plus the combined scanning regex
pub struct ParserRegistry {
    parsers: Vec<Box<dyn FragmentParser>>,
    combined: Regex,
}

impl ParserRegistry {
    pub fn new(parsers: Vec<Box<dyn FragmentParser>>) -> Result<Self, regex::Error> {
        let combined = combine_patterns(&parsers)?;
        Ok(Self { parsers, combined })
    }

    /// Block math first so `$$` is never taken for two inline delimiters
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(vec![
            Box::new(BlockMathParser),
            Box::new(InlineMathParser),
            Box::new(TableParser),
            Box::new(ImageParser),
        ])
        .expect("Failed to compile built-in fragment patterns")
    }

    /// Append a parser; it is queried after all existing ones
    pub fn register(&mut self, parser: Box<dyn FragmentParser>) -> Result<(), regex::Error> {
        self.parsers.push(parser);
        match combine_patterns(&self.parsers) {
            Ok(combined) => {
                self.combined = combined;
                Ok(())
            }
            Err(e) => {
                self.parsers.pop();
                Err(e)
            }
        }
    }

    #[must_use]
    pub fn kinds(&self) -> Vec<FragmentKind> {
        self.parsers.iter().map(|p| p.kind()).collect()
    }

    #[must_use]
    pub fn combined_pattern(&self) -> &Regex {
        &self.combined
    }

    /// Ask every parser in registration order; the first fragment wins.
    /// If nobody matched but somebody reported a malformed fragment, that
    /// error is returned.
    pub fn parse_at(&self, document: &str, pos: usize) -> Result<Option<Fragment>, ParseError> {
        let mut first_error = None;
        for parser in &self.parsers {
            match parser.parse_at(document, pos) {
                Ok(Some(fragment)) => return Ok(Some(fragment)),
                Ok(None) => {}
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }

    /// Scan `range` of `document` left to right
    #[must_use]
    pub fn scan<'a>(&'a self, document: &'a str, range: Range<usize>) -> Scan<'a> {
        let end = floor_char_boundary(document, range.end.min(document.len()));
        let start = floor_char_boundary(document, range.start.min(end));
        Scan {
            registry: self,
            document,
            cursor: start,
            end,
        }
    }

    /// The fragment covering `offset`, if any
    #[must_use]
    pub fn fragment_at_point(&self, document: &str, offset: usize) -> Option<Fragment> {
        for item in self.scan(document, 0..document.len()) {
            match item {
                Ok(fragment) if fragment.contains(offset) => return Some(fragment),
                Ok(fragment) if fragment.begin > offset => return None,
                Ok(_) => {}
                Err(e) => debug!("Skipping malformed fragment while locating point: {e}"),
            }
        }
        None
    }

    /// All well-formed fragments in the document
    #[must_use]
    pub fn fragments(&self, document: &str) -> Vec<Fragment> {
        self.scan(document, 0..document.len())
            .filter_map(Result::ok)
            .collect()
    }
}

/// Iterator returned by [`ParserRegistry::scan`]
pub struct Scan<'a> {
    registry: &'a ParserRegistry,
    document: &'a str,
    cursor: usize,
    end: usize,
}

impl Iterator for Scan<'_> {
    type Item = Result<Fragment, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.cursor < self.end {
            let m = self.registry.combined.find_at(self.document, self.cursor)?;
            let pos = m.start();
            if pos >= self.end {
                self.cursor = self.end;
                return None;
            }
            let step = next_char_boundary(self.document, pos);

            match self.registry.parse_at(self.document, pos) {
                Ok(Some(fragment)) => {
                    self.cursor = fragment.end.max(step);
                    return Some(Ok(fragment));
                }
                Ok(None) => self.cursor = step,
                Err(e) => {
                    self.cursor = m.end().max(step);
                    return Some(Err(e));
                }
            }
        }
        None
    }
}

/// Convert a pipe table into a LaTeX `tabular`
#[must_use]
pub fn table_to_latex(content: &str) -> String {
    let rows: Vec<Option<Vec<String>>> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            if is_separator_row(line) {
                None
            } else {
                Some(
                    line.trim_matches('|')
                        .split('|')
                        .map(|cell| escape_cell(cell.trim()))
                        .collect(),
                )
            }
        })
        .collect();

    let columns = rows.iter().flatten().map(Vec::len).max().unwrap_or(1);

    let mut out = format!("\\begin{{tabular}}{{{}}}\n", "l".repeat(columns));
    for row in rows {
        match row {
            None => out.push_str("\\hline\n"),
            Some(cells) => {
                out.push_str(&cells.join(" & "));
                out.push_str(" \\\\\n");
            }
        }
    }
    out.push_str("\\end{tabular}");
    out
}

fn combine_patterns(parsers: &[Box<dyn FragmentParser>]) -> Result<Regex, regex::Error> {
    let pattern = parsers
        .iter()
        .map(|p| format!("(?:{})", p.delimiter_pattern()))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&pattern)
}

fn find_inline_close(document: &str, from: usize) -> Option<usize> {
    let bytes = document.as_bytes();
    let mut i = from;
    while i < bytes.len() {
        match bytes[i] {
            b'\n' if bytes.get(i + 1) == Some(&b'\n') => return None,
            b'$' if !is_escaped(document, i) => {
                let before = document[..i].chars().next_back();
                let after = document[i + 1..].chars().next();
                let closes_after_text = before.is_some_and(|c| !c.is_whitespace());
                let followed_by_digit = after.is_some_and(|c| c.is_ascii_digit());
                if closes_after_text && !followed_by_digit {
                    return Some(i);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

fn is_escaped(document: &str, pos: usize) -> bool {
    document.as_bytes()[..pos]
        .iter()
        .rev()
        .take_while(|&&b| b == b'\\')
        .count()
        % 2
        == 1
}

fn is_separator_row(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.contains('-')
        && trimmed
            .chars()
            .all(|c| matches!(c, '|' | '-' | '+' | ':' | ' ' | '\t'))
}

fn escape_cell(cell: &str) -> String {
    let mut out = String::with_capacity(cell.len());
    for c in cell.chars() {
        if matches!(c, '&' | '%' | '#') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn has_image_extension(path: &str) -> bool {
    let ext = path.rsplit('.').next().unwrap_or_default().to_lowercase();
    matches!(
        ext.as_str(),
        "png" | "jpg" | "jpeg" | "gif" | "svg" | "webp" | "bmp"
    )
}

fn next_char_boundary(document: &str, pos: usize) -> usize {
    pos + document[pos..].chars().next().map_or(1, char::len_utf8)
}

fn floor_char_boundary(document: &str, mut pos: usize) -> usize {
    while pos > 0 && !document.is_char_boundary(pos) {
        pos -= 1;
    }
    pos
}

// ABOUTME: Block tokenizer splitting expanded template text into text and directive segments
// ABOUTME: Runs the comment and line-break pre-passes and tags each segment with its template line

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use super::indent::{strip_mode_tags, IndentNormalizer};

// A comment never spans a line terminator, CR and U+2028/U+2029 included.
static COMMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:\r\n|\n|\r|\u{2028}|\u{2029})?[\t ]*<#[^\r\n\u{2028}\u{2029}]*?#>").unwrap()
});
static BREAK_BEFORE_LOGIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:\r\n|\n|\r|\u{2028}|\u{2029})[\t ]*<%").unwrap());
static BREAK_BEFORE_LINE_UP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:\r\n|\n|\r|\u{2028}|\u{2029})?[\t ]*<up").unwrap());
static BREAK_AFTER_LINE_UP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"up>(?:\r\n|\n|\r|\u{2028}|\u{2029})[\t ]*").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentKind {
    Text,
    Expression,
    Logic,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    /// Escaped literal text, or the inner text of a directive.
    pub content: String,
    /// Exactly what was consumed from the intermediate text.
    pub original_content: String,
    pub kind: SegmentKind,
    pub source_line: usize,
}

/// `(opener, closer, kind)` in match priority.
const DIRECTIVES: [(&str, &str, SegmentKind); 3] = [
    ("<%", "%>", SegmentKind::Logic),
    ("<$", "$>", SegmentKind::Expression),
    ("<up", "up>", SegmentKind::Logic),
];

fn is_line_terminator(c: char) -> bool {
    matches!(c, '\n' | '\r' | '\u{2028}' | '\u{2029}')
}

/// Strip comments and the line breaks around logic directives.
pub fn prepare(expanded: &str) -> String {
    let text = COMMENT.replace_all(expanded, "");
    let text = BREAK_BEFORE_LOGIC.replace_all(&text, "<%");
    let text = BREAK_BEFORE_LINE_UP.replace_all(&text, "<up");
    BREAK_AFTER_LINE_UP.replace_all(&text, "up>").into_owned()
}

struct DirectiveMatch {
    end: usize,
    inner_start: usize,
    inner_end: usize,
    kind: SegmentKind,
}

fn match_directive_at(text: &str, pos: usize) -> Option<DirectiveMatch> {
    for (opener, closer, kind) in DIRECTIVES {
        if !text[pos..].starts_with(opener) {
            continue;
        }
        let inner_start = pos + opener.len();
        let Some(first) = text[inner_start..].chars().next() else {
            continue;
        };
        if is_line_terminator(first) {
            continue;
        }

        let search_start = inner_start + first.len_utf8();
        let line_end = text[search_start..]
            .find(is_line_terminator)
            .map_or(text.len(), |offset| search_start + offset);
        if let Some(offset) = text[search_start..line_end].find(closer) {
            let inner_end = search_start + offset;
            return Some(DirectiveMatch {
                end: inner_end + closer.len(),
                inner_start,
                inner_end,
                kind,
            });
        }
    }
    None
}

/// Byte offset of the `n`-th (1-based) occurrence of `needle`, allowing
/// occurrences to overlap.
fn nth_occurrence(haystack: &str, needle: &str, n: usize) -> Option<usize> {
    let step = needle.chars().next().map_or(1, char::len_utf8);
    let mut from = 0;
    let mut found = None;
    for _ in 0..n {
        let offset = haystack.get(from..)?.find(needle)?;
        found = Some(from + offset);
        from += offset + step;
    }
    found
}

fn line_number(text: &str, offset: usize) -> usize {
    text[..offset].matches('\n').count() + 1
}

fn line_containing(text: &str, line: usize) -> &str {
    line.checked_sub(1)
        .and_then(|index| text.split('\n').nth(index))
        .unwrap_or("")
}

/// One left-to-right scan over the prepared text, driving the indent
/// normalizer as segments are produced.
pub struct Tokenizer<'a> {
    expanded: &'a str,
    normalizer: IndentNormalizer,
    occurrences: HashMap<String, usize>,
    segments: Vec<Segment>,
    last_line: usize,
}

impl<'a> Tokenizer<'a> {
    pub fn new(expanded: &'a str, indent_back: bool) -> Self {
        Self {
            expanded,
            normalizer: IndentNormalizer::new(indent_back),
            occurrences: HashMap::new(),
            segments: Vec::new(),
            last_line: 1,
        }
    }

    pub fn tokenize(mut self) -> Vec<Segment> {
        let text = prepare(self.expanded);
        let mut text_start = 0;
        let mut pos = 0;

        while let Some(offset) = text[pos..].find('<') {
            let at = pos + offset;
            match match_directive_at(&text, at) {
                Some(found) => {
                    self.push_text(&text[text_start..at]);
                    self.push_directive(
                        &text[at..found.end],
                        &text[found.inner_start..found.inner_end],
                        found.kind,
                    );
                    text_start = found.end;
                    pos = found.end;
                }
                None => pos = at + 1,
            }
        }
        self.push_text(&text[text_start..]);

        self.segments
    }

    fn push_text(&mut self, raw: &str) {
        self.normalizer.observe_text(raw);
        let content = strip_mode_tags(&self.normalizer.normalize_text(raw)).replace('\\', "\\\\");
        self.segments.push(Segment {
            content,
            original_content: raw.to_string(),
            kind: SegmentKind::Text,
            source_line: self.last_line,
        });
    }

    fn push_directive(&mut self, full: &str, inner: &str, kind: SegmentKind) {
        let count = self.occurrences.entry(full.to_string()).or_insert(0);
        *count += 1;
        let source_line = nth_occurrence(self.expanded, full, *count)
            .map_or(0, |offset| line_number(self.expanded, offset));

        if kind == SegmentKind::Logic {
            self.normalizer
                .observe_logic(inner, line_containing(self.expanded, source_line));
        }

        self.last_line = source_line;
        self.segments.push(Segment {
            content: inner.to_string(),
            original_content: full.to_string(),
            kind,
            source_line,
        });
    }
}

/// Segment sequence for an import-expanded template.
pub fn tokenize(expanded: &str, indent_back: bool) -> Vec<Segment> {
    Tokenizer::new(expanded, indent_back).tokenize()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(segments: &[Segment]) -> Vec<SegmentKind> {
        segments.iter().map(|segment| segment.kind).collect()
    }

    fn reconstruct(segments: &[Segment]) -> String {
        segments
            .iter()
            .map(|segment| segment.original_content.as_str())
            .collect()
    }

    #[test]
    fn test_pre_passes() {
        assert_eq!(prepare("a\n  <# note #>\nb"), "a\nb");
        assert_eq!(prepare("a\n\t <% x %>"), "a<% x %>");
        assert_eq!(prepare("a\n  <up x up>\n   b"), "a<up x up>b");
        assert_eq!(prepare("a <# one #> <# two #>"), "a");
    }

    #[test]
    fn test_comments_stop_at_any_line_terminator() {
        assert_eq!(prepare("a\r<# note #>b"), "ab");
        assert_eq!(prepare("a\r<# one\r two #>b"), "a\r<# one\r two #>b");
        assert_eq!(
            prepare("a<# one\u{2028}two #>b"),
            "a<# one\u{2028}two #>b"
        );
    }

    #[test]
    fn test_plain_text_is_one_segment() {
        let segments = tokenize("hello\nworld", false);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].content, "hello\nworld");
        assert_eq!(segments[0].source_line, 1);
    }

    #[test]
    fn test_directives_split_text() {
        let segments = tokenize("Hi <$ name $>!<% x++ %><up y up>", false);
        assert_eq!(
            kinds(&segments),
            vec![
                SegmentKind::Text,
                SegmentKind::Expression,
                SegmentKind::Text,
                SegmentKind::Logic,
                SegmentKind::Text,
                SegmentKind::Logic,
                SegmentKind::Text,
            ]
        );
        assert_eq!(segments[1].content, " name ");
        assert_eq!(segments[1].original_content, "<$ name $>");
        assert_eq!(segments[4].content, "");
        assert_eq!(segments[5].content, " y ");
    }

    #[test]
    fn test_unclosed_or_empty_openers_are_literal() {
        let source = "a <$ b\n$> <%%> <$";
        let segments = tokenize(source, false);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].content, source);
    }

    #[test]
    fn test_shortest_match() {
        let segments = tokenize("<$ a $> and <$ b $>", false);
        assert_eq!(segments[1].content, " a ");
        assert_eq!(segments[3].content, " b ");
    }

    #[test]
    fn test_reconstructs_intermediate_text() {
        let source = "<% if (a) { %>\n  <$ a $> \\ \"q\"\n<% } %>\ntail <up x up>\nend";
        let segments = tokenize(source, false);
        assert_eq!(reconstruct(&segments), prepare(source));
    }

    #[test]
    fn test_source_lines_follow_repeated_directives() {
        let source = "one\n<$ x $>\ntwo <$ x $>\n<$ y $>";
        let segments = tokenize(source, false);
        let lines: Vec<usize> = segments
            .iter()
            .filter(|segment| segment.kind != SegmentKind::Text)
            .map(|segment| segment.source_line)
            .collect();
        assert_eq!(lines, vec![2, 3, 4]);
        assert_eq!(segments[2].source_line, 2);
    }

    #[test]
    fn test_text_backslashes_are_doubled() {
        let segments = tokenize("a\\b<$ '\\n' $>", false);
        assert_eq!(segments[0].content, "a\\\\b");
        assert_eq!(segments[1].content, " '\\n' ");
    }

    #[test]
    fn test_mode_tags_are_stripped_from_text() {
        let segments = tokenize("a\n<* indent-back *>\nb", false);
        assert_eq!(segments[0].content, "a\nb");
    }

    #[test]
    fn test_indent_back_region_dedents_nested_text() {
        let source = "<* indent-back *>\n<% if (a) { %>\n    <% if (b) { %>\n        deep\n    <% } %>\n<% } %>\n<* end:indent-back *>";
        let segments = tokenize(source, false);
        let deep = segments
            .iter()
            .find(|segment| segment.original_content.contains("deep"))
            .unwrap();
        assert_eq!(deep.content, "\n    deep");
    }
}

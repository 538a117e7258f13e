// ABOUTME: Indent-back normalizer that dedents literal text nested inside logic blocks
// ABOUTME: Tracks block depth per logic segment and strips <* mode *> markers from text

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

const START_MARKER: &str = "<* indent-back *>";
const END_MARKER: &str = "<* end:indent-back *>";

static MODE_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:\r\n|\n|\r|\u{2028}|\u{2029})?[\t ]*<\*[^\r\n\u{2028}\u{2029}]*?\*>").unwrap()
});

const OPENING_KEYWORDS: [&str; 6] = ["if", "for", "while", "else", "switch", "case"];

/// Structural role of a logic fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockRole {
    Open,
    Close,
    Neutral,
}

/// Classify a logic fragment by its leading keyword.
pub fn classify(content: &str) -> BlockRole {
    let trimmed = content.trim();
    if trimmed == "}" || trimmed == "break;" {
        return BlockRole::Close;
    }

    let word_len = trimmed
        .find(|c: char| !(c.is_alphanumeric() || c == '_' || c == '$'))
        .unwrap_or(trimmed.len());
    if OPENING_KEYWORDS.contains(&&trimmed[..word_len]) {
        BlockRole::Open
    } else {
        BlockRole::Neutral
    }
}

/// Remove every `<* ... *>` marker together with its line break and indentation.
pub fn strip_mode_tags(text: &str) -> String {
    MODE_TAG.replace_all(text, "").into_owned()
}

fn leading_whitespace(line: &str) -> usize {
    line.chars().take_while(|c| c.is_whitespace()).count()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndentationFrame {
    pub step_number: usize,
    pub baseline_spaces: usize,
}

/// Per-compile normalizer state.
#[derive(Debug, Default)]
pub struct IndentNormalizer {
    active: bool,
    inside_container: bool,
    indent_back_spaces: usize,
    frames: Vec<IndentationFrame>,
}

impl IndentNormalizer {
    /// `whole_template` turns the normalizer on from the first segment.
    pub fn new(whole_template: bool) -> Self {
        Self {
            active: whole_template,
            ..Self::default()
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Switch the region on or off from markers found in raw text. A start
    /// marker wins over an end marker in the same text.
    pub fn observe_text(&mut self, raw: &str) {
        if raw.contains(END_MARKER) {
            debug!("Leaving indent-back region");
            self.active = false;
        }
        if raw.contains(START_MARKER) {
            debug!("Entering indent-back region");
            self.active = true;
        }
    }

    /// Track block nesting. `source_line` is the full template line the
    /// fragment came from.
    pub fn observe_logic(&mut self, content: &str, source_line: &str) {
        if !self.active {
            return;
        }

        match classify(content) {
            BlockRole::Open => {
                let baseline_spaces = leading_whitespace(source_line);
                if self.frames.is_empty() {
                    self.indent_back_spaces = baseline_spaces;
                    self.inside_container = true;
                }
                self.frames.push(IndentationFrame {
                    step_number: self.frames.len() + 1,
                    baseline_spaces,
                });
            }
            BlockRole::Close => {
                self.frames.pop();
                if self.frames.is_empty() {
                    self.indent_back_spaces = 0;
                    self.inside_container = false;
                }
            }
            BlockRole::Neutral => {}
        }
    }

    /// Dedent literal text to the region's baseline.
    pub fn normalize_text(&self, text: &str) -> String {
        if !self.active || !self.inside_container || text.is_empty() {
            return text.to_string();
        }
        let Some(top) = self.frames.last() else {
            return text.to_string();
        };

        text.split('\n')
            .map(|line| {
                let line_spaces = leading_whitespace(line) as isize;
                let extra = line_spaces - top.baseline_spaces as isize;
                let diff = (line_spaces - self.indent_back_spaces as isize - extra).max(0) as usize;
                let prefix_len = line.len() - line.trim_start_matches(' ').len();
                if diff > 0 && prefix_len >= diff {
                    line[diff..].to_string()
                } else {
                    line.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

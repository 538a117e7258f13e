// ABOUTME: Code generator turning segments into an annotated template script program
// ABOUTME: Keeps one statement per line with its template line and caches parsed programs

use std::cell::OnceCell;
use std::rc::Rc;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::debug;

use super::tokenizer::{Segment, SegmentKind};
use crate::script::{self, Grammar, Program, ScriptError};

static TEMPLATE_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"TEMPLATE_LINE:(\d+)").unwrap());

const PRELUDE: [&str; 3] = [
    "let codeBlocks = [];",
    "this.templateParams = {};",
    "this.removeLastLineBreak = lineBreakRemover(codeBlocks);",
];
const EPILOGUE: &str = "return codeBlocks.join(\"\");";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Statement {
    pub code: String,
    pub template_line: usize,
}

impl Statement {
    fn from_segment(segment: &Segment) -> Self {
        let code = match segment.kind {
            SegmentKind::Text => format!(
                "codeBlocks.push(\"{}\"); // TEMPLATE_LINE:{}",
                escape_literal(&segment.content),
                segment.source_line
            ),
            SegmentKind::Expression => format!(
                "codeBlocks.push({}); // TEMPLATE_LINE:{}",
                segment.content, segment.source_line
            ),
            SegmentKind::Logic => format!("{} // TEMPLATE_LINE:{}", segment.content, segment.source_line),
        };
        Self {
            code,
            template_line: segment.source_line,
        }
    }
}

/// Escape already backslash-doubled text for a double-quoted literal.
fn escape_literal(content: &str) -> String {
    let mut escaped = String::with_capacity(content.len());
    for c in content.chars() {
        match c {
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            '\t' => escaped.push_str("\\t"),
            '\r' => escaped.push_str("\\r"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Outcome of statically checking a generated program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    pub valid: bool,
    pub message: Option<String>,
    pub code_line: Option<usize>,
    pub template_line: usize,
}

impl Diagnostic {
    fn valid() -> Self {
        Self {
            valid: true,
            message: None,
            code_line: None,
            template_line: 0,
        }
    }
}

/// Script program generated from one compile.
#[derive(Debug)]
pub struct GeneratedProgram {
    source: String,
    segments: Vec<Segment>,
    statements: Vec<Statement>,
    sync_program: OnceCell<Rc<Program>>,
    async_program: OnceCell<Rc<Program>>,
}

impl GeneratedProgram {
    pub fn generate(segments: Vec<Segment>) -> Self {
        let statements: Vec<Statement> = segments.iter().map(Statement::from_segment).collect();

        let mut lines: Vec<&str> = PRELUDE.to_vec();
        lines.extend(statements.iter().map(|statement| statement.code.as_str()));
        lines.push(EPILOGUE);
        let source = lines.join("\n");

        debug!(
            segments = segments.len(),
            lines = lines.len(),
            "Generated template program"
        );

        Self {
            source,
            segments,
            statements,
            sync_program: OnceCell::new(),
            async_program: OnceCell::new(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    /// Program line (1-based) where statements begin.
    pub fn first_statement_line() -> usize {
        PRELUDE.len() + 1
    }

    /// The program as an inspectable function body.
    pub fn wrapped(&self) -> String {
        format!("function anonymous(\n) {{\n{}\n}}", self.source)
    }

    /// Template line annotated on program line `code_line`, 0 when absent.
    pub fn template_line_for(&self, code_line: usize) -> usize {
        template_line_in(&self.source, code_line)
    }

    /// Parsed program for `grammar`, parsed once per grammar.
    pub fn parsed(&self, grammar: Grammar) -> script::Result<Rc<Program>> {
        let cell = match grammar {
            Grammar::Sync => &self.sync_program,
            Grammar::Async => &self.async_program,
        };
        if let Some(program) = cell.get() {
            return Ok(Rc::clone(program));
        }
        let program = Rc::new(script::parse(&self.source, grammar)?);
        Ok(Rc::clone(cell.get_or_init(|| program)))
    }

    /// Parse with the async grammar and report instead of failing.
    pub fn validate(&self) -> Diagnostic {
        match self.parsed(Grammar::Async) {
            Ok(_) => Diagnostic::valid(),
            Err(error) => diagnostic_for(&self.source, &error),
        }
    }
}

fn diagnostic_for(source: &str, error: &ScriptError) -> Diagnostic {
    let code_line = error.line();
    Diagnostic {
        valid: false,
        message: Some(error.message().to_string()),
        code_line,
        template_line: code_line.map_or(0, |line| template_line_in(source, line)),
    }
}

/// Number after `TEMPLATE_LINE:` on line `code_line` of `source`.
pub fn template_line_in(source: &str, code_line: usize) -> usize {
    code_line
        .checked_sub(1)
        .and_then(|index| source.lines().nth(index))
        .and_then(|line| TEMPLATE_LINE.captures(line))
        .and_then(|captures| captures[1].parse().ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::tokenizer::tokenize;

    fn program(template: &str) -> GeneratedProgram {
        GeneratedProgram::generate(tokenize(template, false))
    }

    #[test]
    fn test_program_layout() {
        let generated = program("Hi \"you\"\t<$ name $><% let x = 1 %>");
        let lines: Vec<&str> = generated.source().lines().collect();
        assert_eq!(lines[0], "let codeBlocks = [];");
        assert_eq!(lines[2], "this.removeLastLineBreak = lineBreakRemover(codeBlocks);");
        assert_eq!(lines[3], r#"codeBlocks.push("Hi \"you\"\t"); // TEMPLATE_LINE:1"#);
        assert_eq!(lines[4], "codeBlocks.push( name ); // TEMPLATE_LINE:1");
        assert_eq!(lines[6], " let x = 1  // TEMPLATE_LINE:1");
        assert_eq!(lines.last(), Some(&"return codeBlocks.join(\"\");"));
        assert_eq!(generated.statements().len(), 5);
        assert_eq!(lines.len(), 3 + 5 + 1);
    }

    #[test]
    fn test_line_breaks_stay_on_one_program_line() {
        let generated = program("a\r\nb\\c");
        assert_eq!(
            generated.statements()[0].code,
            r#"codeBlocks.push("a\r\nb\\c"); // TEMPLATE_LINE:1"#
        );
    }

    #[test]
    fn test_maps_code_lines_to_template_lines() {
        let generated = program("one\n<$ a $>\n<$ b $>");
        assert_eq!(generated.template_line_for(1), 0);
        assert_eq!(generated.template_line_for(5), 2);
        assert_eq!(generated.template_line_for(7), 3);
        assert_eq!(generated.template_line_for(0), 0);
        assert_eq!(generated.template_line_for(99), 0);
        assert_eq!(GeneratedProgram::first_statement_line(), 4);
    }

    #[test]
    fn test_wrapped_form() {
        let generated = program("x");
        assert!(generated.wrapped().starts_with("function anonymous(\n) {\nlet codeBlocks"));
        assert!(generated.wrapped().ends_with("return codeBlocks.join(\"\");\n}"));
    }

    #[test]
    fn test_validate_reports_template_line() {
        assert!(program("ok <$ 1 + 1 $>").validate().valid);

        let diagnostic = program("line one\n<% if (x { %>\n<% } %>").validate();
        assert!(!diagnostic.valid);
        assert_eq!(diagnostic.code_line, Some(5));
        assert_eq!(diagnostic.template_line, 2);
        assert!(diagnostic.message.is_some());
    }

    #[test]
    fn test_parsed_program_is_cached() {
        let generated = program("<$ 1 $>");
        let first = generated.parsed(Grammar::Sync).unwrap();
        let second = generated.parsed(Grammar::Sync).unwrap();
        assert!(Rc::ptr_eq(&first, &second));
    }
}

// ABOUTME: Import directive scanner and resolver for template sources
// ABOUTME: Splices imported templates in place with a parameter preamble and inherited indentation

use std::ops::Range;

use indexmap::IndexMap;
use tracing::debug;

use super::error::{CompileError, Result};
use super::graph::ImportGraph;

const IMPORT_OPENER: &str = "<import";

/// One `<import template="NAME" key="expr" ...>` occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportDirective {
    /// Occurrence order within the scanned text.
    pub index: usize,
    pub target_name: String,
    /// `(key, raw expression)` pairs in attribute order.
    pub params: Vec<(String, String)>,
    /// Byte range of the whole directive.
    pub span: Range<usize>,
    /// 1-based line of the directive.
    pub line: usize,
}

/// Find every well-formed import directive in `text`. Anything else that
/// starts with `<import` is left alone as literal text.
pub fn scan_directives(text: &str) -> Vec<ImportDirective> {
    let mut directives = Vec::new();
    let mut search_from = 0;

    while let Some(offset) = text[search_from..].find(IMPORT_OPENER) {
        let start = search_from + offset;
        match parse_directive(text, start + IMPORT_OPENER.len()) {
            Some((target_name, params, end)) => {
                directives.push(ImportDirective {
                    index: directives.len(),
                    target_name,
                    params,
                    span: start..end,
                    line: line_at(text, start),
                });
                search_from = end;
            }
            None => search_from = start + IMPORT_OPENER.len(),
        }
    }

    directives
}

/// Distinct import names used directly by `source`, in first-occurrence order.
pub fn imported_templates(source: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for directive in scan_directives(source) {
        if !names.contains(&directive.target_name) {
            names.push(directive.target_name);
        }
    }
    names
}

struct DirectiveCursor<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> DirectiveCursor<'a> {
    fn rest(&self) -> &'a str {
        &self.text[self.pos..]
    }

    fn skip_blanks(&mut self) {
        let rest = self.rest();
        let trimmed = rest.trim_start_matches([' ', '\t']);
        self.pos += rest.len() - trimmed.len();
    }

    fn eat(&mut self, literal: &str) -> Option<()> {
        if self.rest().starts_with(literal) {
            self.pos += literal.len();
            Some(())
        } else {
            None
        }
    }

    /// `\w+`
    fn word(&mut self) -> Option<String> {
        let rest = self.rest();
        let len = rest
            .find(|c: char| !(c.is_alphanumeric() || c == '_'))
            .unwrap_or(rest.len());
        if len == 0 {
            return None;
        }
        self.pos += len;
        Some(rest[..len].to_string())
    }

    /// Non-empty text up to the closing quote, which is consumed. Fails on
    /// a line break.
    fn quoted(&mut self) -> Option<String> {
        let rest = self.rest();
        let end = rest.find(['"', '\n', '\r'])?;
        if end == 0 || !rest[end..].starts_with('"') {
            return None;
        }
        self.pos += end + 1;
        Some(rest[..end].to_string())
    }
}

fn parse_directive(text: &str, after_opener: usize) -> Option<(String, Vec<(String, String)>, usize)> {
    let mut cursor = DirectiveCursor {
        text,
        pos: after_opener,
    };
    cursor.skip_blanks();
    cursor.eat("template=\"")?;
    let target_name = cursor.quoted()?;

    let mut params = Vec::new();
    loop {
        cursor.skip_blanks();
        if cursor.eat(">").is_some() {
            return Some((target_name, params, cursor.pos));
        }
        let key = cursor.word()?;
        cursor.eat("=\"")?;
        let value = cursor.quoted()?;
        params.push((key, value));
    }
}

fn line_at(text: &str, offset: usize) -> usize {
    text[..offset].matches('\n').count() + 1
}

/// Width of the leading whitespace of the line containing `offset`.
fn indentation_at(text: &str, offset: usize) -> usize {
    let line_start = text[..offset].rfind('\n').map_or(0, |index| index + 1);
    text[line_start..]
        .chars()
        .take_while(|c| c.is_whitespace() && *c != '\n')
        .count()
}

/// Prefix every line after the first with `width` spaces.
fn indent_continuation(content: &str, width: usize) -> String {
    if width == 0 {
        return content.to_string();
    }
    let padding = " ".repeat(width);
    content
        .split('\n')
        .enumerate()
        .map(|(index, line)| {
            if index == 0 {
                line.to_string()
            } else {
                format!("{}{}", padding, line)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parameter bag reset followed by one assignment per parameter, each on
/// its own line, then the imported content.
fn bind_params(params: &[(String, String)], content: &str) -> String {
    let mut lines = vec!["<% this.templateParams = {} %>".to_string()];
    for (key, expression) in params {
        lines.push(format!("<% this.templateParams.{} = {} %>", key, expression));
    }
    format!("{}\n{}", lines.join("\n"), content)
}

/// Expands import directives against a name to content table.
pub struct ImportResolver<'a> {
    imports: &'a IndexMap<String, String>,
}

impl<'a> ImportResolver<'a> {
    pub fn new(imports: &'a IndexMap<String, String>) -> Self {
        Self { imports }
    }

    /// Replace every directive in `source` with the fully resolved content
    /// of its target.
    pub fn resolve(&self, source: &str) -> Result<String> {
        let graph = ImportGraph::from_source(source, self.imports)?;
        if graph.is_empty() {
            return Ok(source.to_string());
        }
        let order = graph.resolution_order()?;
        debug!(templates = ?order, "Resolving imports");

        let mut chain = Vec::new();
        self.expand(source, &mut chain)
    }

    fn expand(&self, text: &str, chain: &mut Vec<String>) -> Result<String> {
        let directives = scan_directives(text);
        if directives.is_empty() {
            return Ok(text.to_string());
        }

        let mut output = String::with_capacity(text.len());
        let mut cursor = 0;
        for directive in &directives {
            let name = &directive.target_name;
            let content = self
                .imports
                .get(name)
                .ok_or_else(|| CompileError::UnresolvedImport { name: name.clone() })?;
            if chain.contains(name) {
                return Err(CompileError::cyclic(name, chain));
            }

            chain.push(name.clone());
            let expanded = self.expand(content, chain)?;
            chain.pop();

            let spliced = bind_params(&directive.params, &expanded);
            let width = indentation_at(text, directive.span.start);
            output.push_str(&text[cursor..directive.span.start]);
            output.push_str(&indent_continuation(&spliced, width));
            cursor = directive.span.end;
        }
        output.push_str(&text[cursor..]);

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(entries: &[(&str, &str)]) -> IndexMap<String, String> {
        entries
            .iter()
            .map(|(name, content)| (name.to_string(), content.to_string()))
            .collect()
    }

    #[test]
    fn test_scans_directives_with_params() {
        let text = "a\n  <import template=\"card\" title=\"this.name\" count=\"1 + 2\">\n<import  template=\"card\">";
        let directives = scan_directives(text);
        assert_eq!(directives.len(), 2);
        assert_eq!(directives[0].index, 0);
        assert_eq!(directives[0].target_name, "card");
        assert_eq!(
            directives[0].params,
            vec![
                ("title".to_string(), "this.name".to_string()),
                ("count".to_string(), "1 + 2".to_string()),
            ]
        );
        assert_eq!(directives[0].line, 2);
        assert_eq!(directives[1].index, 1);
        assert!(directives[1].params.is_empty());
        assert_eq!(&text[directives[1].span.clone()], "<import  template=\"card\">");
    }

    #[test]
    fn test_malformed_directives_stay_literal() {
        assert!(scan_directives("<import card> <imports> <import template=\"x\"").is_empty());
        assert!(scan_directives("<import template=\"\">").is_empty());
        assert!(scan_directives("<import template=\"a\nb\">").is_empty());
    }

    #[test]
    fn test_splices_with_preamble_and_indentation() {
        let imports = table(&[("item", "x\ny")]);
        let source = "A\n  <import template=\"item\" flag=\"true\">\nZ";
        let resolved = ImportResolver::new(&imports).resolve(source).unwrap();
        assert_eq!(
            resolved,
            "A\n  <% this.templateParams = {} %>\n  <% this.templateParams.flag = true %>\n  x\n  y\nZ"
        );
    }

    #[test]
    fn test_repeated_imports_bind_their_own_params() {
        let imports = table(&[("greet", "<$ this.templateParams.who $>")]);
        let source = "<import template=\"greet\" who=\"'a'\">|<import template=\"greet\" who=\"'b'\">";
        let resolved = ImportResolver::new(&imports).resolve(source).unwrap();
        assert_eq!(
            resolved,
            "<% this.templateParams = {} %>\n<% this.templateParams.who = 'a' %>\n<$ this.templateParams.who $>|<% this.templateParams = {} %>\n<% this.templateParams.who = 'b' %>\n<$ this.templateParams.who $>"
        );
    }

    #[test]
    fn test_nested_imports_resolve_first() {
        let imports = table(&[
            ("outer", "[<import template=\"inner\">]"),
            ("inner", "in"),
        ]);
        let resolved = ImportResolver::new(&imports)
            .resolve("<import template=\"outer\">")
            .unwrap();
        assert_eq!(
            resolved,
            "<% this.templateParams = {} %>\n[<% this.templateParams = {} %>\nin]"
        );
    }

    #[test]
    fn test_unresolved_and_cyclic_imports_fail() {
        let imports = table(&[("a", "<import template=\"a\">")]);
        let resolver = ImportResolver::new(&imports);

        assert_eq!(
            resolver.resolve("<import template=\"missing\">").unwrap_err(),
            CompileError::UnresolvedImport {
                name: "missing".to_string()
            }
        );
        assert!(matches!(
            resolver.resolve("<import template=\"a\">"),
            Err(CompileError::CyclicImport { .. })
        ));
    }

    #[test]
    fn test_imported_templates_are_distinct_and_ordered() {
        let source = "<import template=\"b\"><import template=\"a\"><import template=\"b\" x=\"1\">";
        assert_eq!(imported_templates(source), vec!["b", "a"]);
    }
}

// ABOUTME: Maps a failure inside a generated program back to its template line
// ABOUTME: Builds the error record a template keeps and hands to its error logger

use crate::compiler::GeneratedProgram;

use super::error::TemplateError;
use super::logger::ErrorRecord;

/// Where a render failed and under which identity it is reported.
pub struct ErrorMapper<'a> {
    program: Option<&'a GeneratedProgram>,
    template_name: &'a str,
    is_child_execution: bool,
}

impl<'a> ErrorMapper<'a> {
    pub fn new(
        program: Option<&'a GeneratedProgram>,
        template_name: &'a str,
        is_child_execution: bool,
    ) -> Self {
        Self {
            program,
            template_name,
            is_child_execution,
        }
    }

    /// Template line for a program line, 0 when it cannot be mapped.
    pub fn template_line(&self, code_line: Option<usize>) -> usize {
        match (self.program, code_line) {
            (Some(program), Some(line)) => program.template_line_for(line),
            _ => 0,
        }
    }

    pub fn record(&self, error: &TemplateError) -> ErrorRecord {
        let code_line = error.code_line();
        ErrorRecord::new(
            self.template_name,
            code_line,
            self.template_line(code_line),
            self.is_child_execution,
            error.to_string(),
        )
    }
}

// ABOUTME: Options controlling how a template is expanded, compiled and reported
// ABOUTME: Carries the import table, require() modules and error reporting identity

use indexmap::IndexMap;

use crate::script::Value;

pub const ANONYMOUS_TEMPLATE: &str = "(anonymous template)";

#[derive(Debug, Clone, Default)]
pub struct TemplateOptions {
    /// Template name to content, used by `<import template="...">`.
    pub imports: IndexMap<String, String>,
    /// Values returned by `require(name)` inside the template.
    pub modules: IndexMap<String, Value>,
    pub template_name: Option<String>,
    /// Set when the template is rendered from inside another template.
    pub is_child_execution: bool,
    /// Keep import directives unexpanded. Only introspection is meaningful.
    pub disable_imports_processing: bool,
    /// Normalize indentation across the whole template.
    pub indent_back: bool,
}

impl TemplateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_import(mut self, name: impl Into<String>, content: impl Into<String>) -> Self {
        self.imports.insert(name.into(), content.into());
        self
    }

    pub fn with_imports(mut self, imports: IndexMap<String, String>) -> Self {
        self.imports.extend(imports);
        self
    }

    pub fn with_module(mut self, name: impl Into<String>, module: impl Into<Value>) -> Self {
        self.modules.insert(name.into(), module.into());
        self
    }

    pub fn with_template_name(mut self, name: impl Into<String>) -> Self {
        self.template_name = Some(name.into());
        self
    }

    pub fn child_execution(mut self, is_child: bool) -> Self {
        self.is_child_execution = is_child;
        self
    }

    pub fn without_imports_processing(mut self) -> Self {
        self.disable_imports_processing = true;
        self
    }

    pub fn with_indent_back(mut self, enabled: bool) -> Self {
        self.indent_back = enabled;
        self
    }

    /// Name used in error records.
    pub fn display_name(&self) -> &str {
        self.template_name.as_deref().unwrap_or(ANONYMOUS_TEMPLATE)
    }
}

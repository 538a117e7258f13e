// ABOUTME: Template engine that expands, compiles and runs templates against a data context
// ABOUTME: Renders synchronously or asynchronously and records failures at their template line

use std::cell::RefCell;
use std::rc::Rc;

use futures::FutureExt;
use indexmap::IndexMap;
use tracing::{debug, error, warn};

use super::context::DataContext;
use super::error::{Result, TemplateError};
use super::logger::{ErrorLogger, ErrorRecord};
use super::mapper::ErrorMapper;
use super::options::TemplateOptions;
use crate::compiler::{
    self, DataDeclaration, Diagnostic, GeneratedProgram, ImportGraph, ImportResolver,
};
use crate::script::{Grammar, Interpreter, ScriptError, Value};

const REQUIRE_HELPER: &str = "require";

pub struct Template {
    source: String,
    expanded: String,
    data: DataContext,
    options: TemplateOptions,
    logger: Option<ErrorLogger>,
    program: RefCell<Option<Rc<GeneratedProgram>>>,
    latest_error: RefCell<Option<ErrorRecord>>,
}

impl Template {
    pub fn new(source: impl Into<String>) -> Result<Self> {
        Self::with_options(source, TemplateOptions::default())
    }

    /// Fails when an import cannot be resolved or imports form a cycle.
    pub fn with_options(source: impl Into<String>, options: TemplateOptions) -> Result<Self> {
        let mut template = Self {
            source: String::new(),
            expanded: String::new(),
            data: DataContext::new(),
            options,
            logger: None,
            program: RefCell::new(None),
            latest_error: RefCell::new(None),
        };
        template.set_template(source)?;
        Ok(template)
    }

    /// Send every recorded error to `logger` as well.
    pub fn with_error_logger(mut self, logger: ErrorLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Replace the source. Imports are expanded immediately.
    pub fn set_template(&mut self, source: impl Into<String>) -> Result<()> {
        let source = source.into();
        self.expanded = if self.options.disable_imports_processing {
            source.clone()
        } else {
            ImportResolver::new(&self.options.imports).resolve(&source)?
        };
        self.source = source;
        self.program.replace(None);
        debug!(
            template = self.options.display_name(),
            bytes = self.expanded.len(),
            "Template source set"
        );
        Ok(())
    }

    pub fn template(&self) -> &str {
        &self.source
    }

    /// Source with every import spliced in.
    pub fn expanded_template(&self) -> &str {
        &self.expanded
    }

    pub fn set_data(&mut self, data: DataContext) {
        self.data = data;
    }

    pub fn data(&self) -> &DataContext {
        &self.data
    }

    pub fn options(&self) -> &TemplateOptions {
        &self.options
    }

    pub fn error_logger(&self) -> Option<&ErrorLogger> {
        self.logger.as_ref()
    }

    /// Regenerate the program from the current source.
    pub fn compile(&self) -> Rc<GeneratedProgram> {
        let program = Rc::new(compiler::compile(&self.expanded, self.options.indent_back));
        self.program.replace(Some(Rc::clone(&program)));
        program
    }

    fn program(&self) -> Rc<GeneratedProgram> {
        if let Some(program) = self.program.borrow().as_ref() {
            return Rc::clone(program);
        }
        self.compile()
    }

    pub fn generated_code(&self) -> String {
        self.program().source().to_string()
    }

    pub fn pre_compiled_code(&self) -> String {
        self.program().wrapped()
    }

    pub fn latest_error(&self) -> Option<ErrorRecord> {
        self.latest_error.borrow().clone()
    }

    /// Names imported directly by the raw source.
    pub fn imported_templates(&self) -> Vec<String> {
        compiler::imported_templates(&self.source)
    }

    pub fn import_graph(&self) -> Result<ImportGraph> {
        Ok(ImportGraph::from_source(&self.source, &self.options.imports)?)
    }

    pub fn data_declarations(&self) -> IndexMap<String, DataDeclaration> {
        compiler::data_declarations(&self.expanded)
    }

    pub fn validate(&self) -> Diagnostic {
        self.program().validate()
    }

    pub fn code_is_valid(&self, show_errors: bool) -> bool {
        let diagnostic = self.validate();
        if !diagnostic.valid && show_errors {
            error!(
                template = self.options.display_name(),
                code_line = ?diagnostic.code_line,
                template_line = diagnostic.template_line,
                message = diagnostic.message.as_deref().unwrap_or_default(),
                "Generated template code is invalid"
            );
        }
        diagnostic.valid
    }

    /// Render without suspending. Awaiting is a syntax error here.
    pub fn render(&self) -> Result<String> {
        self.execute(Grammar::Sync)
            .now_or_never()
            .unwrap_or(Err(TemplateError::Suspended))
    }

    pub fn render_with_error_treatment(&self) -> Result<String> {
        self.render().map_err(|error| self.treat_error(error))
    }

    pub async fn render_async(&self) -> Result<String> {
        self.execute(Grammar::Async).await
    }

    pub async fn render_async_with_error_treatment(&self) -> Result<String> {
        match self.render_async().await {
            Ok(output) => Ok(output),
            Err(error) => Err(self.treat_error(error)),
        }
    }

    async fn execute(&self, grammar: Grammar) -> Result<String> {
        let program = self.program();
        let parsed = program.parsed(grammar)?;
        let interpreter = Interpreter::new(self.execution_context());
        debug!(
            template = self.options.display_name(),
            ?grammar,
            "Executing template"
        );
        match interpreter.run(&parsed).await? {
            Value::Str(output) => Ok(output),
            other => Ok(other.to_string()),
        }
    }

    /// Fork the data and attach the `require` helper.
    fn execution_context(&self) -> Value {
        let context = self.data.fork();
        if let Value::Object(fields) = &context {
            let mut fields = fields.borrow_mut();
            if fields.contains_key(REQUIRE_HELPER) {
                warn!(
                    template = self.options.display_name(),
                    helper = REQUIRE_HELPER,
                    "Data field shadows template helper, keeping the data value"
                );
            } else {
                fields.insert(REQUIRE_HELPER.to_string(), require_helper(&self.options.modules));
            }
        }
        context
    }

    fn treat_error(&self, failure: TemplateError) -> TemplateError {
        let program = self.program.borrow().clone();
        let record = ErrorMapper::new(
            program.as_deref(),
            self.options.display_name(),
            self.options.is_child_execution,
        )
        .record(&failure);

        error!(
            template = %record.template_name,
            template_line = record.template_line,
            code_line = ?record.code_line,
            child = record.is_child_execution,
            "{}",
            record.error
        );
        if let Some(logger) = &self.logger {
            logger.log(record.clone());
        }
        self.latest_error.replace(Some(record));
        failure
    }
}

fn require_helper(modules: &IndexMap<String, Value>) -> Value {
    let modules = modules.clone();
    Value::function(REQUIRE_HELPER, move |args| {
        let name = args.first().map(|value| value.to_string()).unwrap_or_default();
        modules
            .get(&name)
            .cloned()
            .ok_or_else(|| ScriptError::thrown(format!("Cannot find module '{}'", name)))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn template_with(source: &str, data: serde_json::Value) -> Template {
        let mut template = Template::new(source).unwrap();
        template.set_data(DataContext::from_json(&data).unwrap());
        template
    }

    #[test]
    fn test_renders_text_and_expressions() {
        let template = template_with("Hi, <$ this.name $>! <$ 2 * 3 $>", json!({"name": "Ann"}));
        assert_eq!(template.render().unwrap(), "Hi, Ann! 6");
    }

    #[test]
    fn test_logic_blocks_drive_output() {
        let source = "<% for (const item of this.items) { %>\n- <$ item $><% } %>";
        let template = template_with(source, json!({"items": ["a", "b"]}));
        assert_eq!(template.render().unwrap(), "\n- a\n- b");
    }

    #[test]
    fn test_generation_is_memoized_until_source_changes() {
        let mut template = Template::new("a").unwrap();
        let first = template.program();
        assert!(Rc::ptr_eq(&first, &template.program()));

        template.set_template("b").unwrap();
        assert!(!Rc::ptr_eq(&first, &template.program()));
        assert_eq!(template.render().unwrap(), "b");
    }

    #[test]
    fn test_await_is_rejected_in_sync_render() {
        let template = Template::new("<$ await 1 $>").unwrap();
        assert!(matches!(
            template.render(),
            Err(TemplateError::Script(error)) if error.is_syntax()
        ));
    }

    #[test]
    fn test_error_treatment_records_latest_error() {
        let template = Template::new("\nHi, I'm <$ this.user.name $>\nOther Line").unwrap();
        let failure = template.render_with_error_treatment().unwrap_err();
        assert_eq!(failure.to_string(), "Cannot read property 'name' of undefined");

        let record = template.latest_error().unwrap();
        assert_eq!(record.template_line, 2);
        assert_eq!(record.template_name, "(anonymous template)");
        assert!(!record.is_child_execution);
    }

    #[test]
    fn test_plain_render_does_not_record() {
        let template = Template::new("<$ missing $>").unwrap();
        assert!(template.render().is_err());
        assert!(template.latest_error().is_none());
    }

    #[test]
    fn test_require_resolves_modules() {
        let options = TemplateOptions::new().with_module("greeting", Value::string("hello"));
        let template = Template::with_options("<$ require('greeting') $>", options).unwrap();
        assert_eq!(template.render().unwrap(), "hello");

        let missing = Template::new("<$ require('nope') $>").unwrap();
        assert_eq!(
            missing.render().unwrap_err().to_string(),
            "Cannot find module 'nope'"
        );
    }

    #[test]
    fn test_data_field_wins_over_require_helper() {
        let template = template_with("<$ require $>", json!({"require": "mine"}));
        assert_eq!(template.render().unwrap(), "mine");
    }

    #[test]
    fn test_disabled_import_processing_keeps_directives() {
        let options = TemplateOptions::new().without_imports_processing();
        let template = Template::with_options("<import template=\"missing\">", options).unwrap();
        assert_eq!(template.expanded_template(), "<import template=\"missing\">");
        assert_eq!(template.imported_templates(), vec!["missing"]);
    }

    #[test]
    fn test_code_is_valid() {
        assert!(Template::new("<% if (true) { %>x<% } %>").unwrap().code_is_valid(false));
        let broken = Template::new("<% if (true) { %>x").unwrap();
        assert!(!broken.code_is_valid(true));
        assert!(broken.render().is_err());
    }

    #[tokio::test]
    async fn test_async_render_awaits_host_functions() {
        let mut data = DataContext::new();
        data.insert_async_function("load", |args| async move {
            tokio::task::yield_now().await;
            Ok(Value::string(format!("loaded {}", args.first().map(|value| value.to_string()).unwrap_or_default())))
        });
        let mut template = Template::new("<$ await load('x') $>").unwrap();
        template.set_data(data);
        assert_eq!(template.render_async().await.unwrap(), "loaded x");
    }
}

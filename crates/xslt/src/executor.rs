//! Runs a compiled stylesheet against a source tree.
//!
//! A [`TransformContext`] is created for one transformation. It owns the variable scopes,
//! the key tables, the template call depth and the stopped flag; the compiled stylesheet
//! is only read. Template bodies are interpreted by a recursive walk: each instruction is
//! dispatched to a handler in `executor_handlers`, and a handler that contains a body
//! decides itself whether and how often to run it.

use crate::ast::{
    AttributeValueTemplate, CompiledExpr, CompiledStylesheet, ExpandedName, PreparsedTemplate,
    TemplateId, VariableBinding, VariableValue, XsltInstruction,
};
use crate::avt::evaluate_avt;
use crate::config::TransformOptions;
use crate::diagnostics::{Diagnostic, DiagnosticSink, LogSink};
use crate::error::ExecutionError;
use crate::executor_handlers::{
    apply_templates, call_template, control_flow, copy, extensions, for_each, literals,
    message, number, variables,
};
use crate::extensions::ExtensionRegistry;
use crate::functions::register_xslt_functions;
use crate::keys::build_key_indexes;
use crate::matcher::{MatchCache, MatchEnv};
use crate::output::{OutputBuilder, TextCollector};
use crate::registry::resolve_template;
use crate::result_tree::{ResultTree, TreeBuilder};
use crate::scope::ScopeStack;
use quill_xpath1::{
    DataSourceNode, EvaluationContext, FunctionRegistry, KeyIndexes, NodeType, XPathValue,
    evaluate,
};
use std::cell::RefCell;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::ops::Range;
use std::rc::Rc;
use std::sync::Arc;
use thiserror::Error;

/// A failed transformation: the error plus whatever output was built before it.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct TransformFailure {
    pub error: ExecutionError,
    /// Incomplete output. Only useful for inspection.
    pub partial: ResultTree,
}

/// The context node with its proximity position and context size.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Focus<N> {
    pub node: N,
    pub position: usize,
    pub size: usize,
}

/// Parameters evaluated by the caller, keyed by expanded name.
pub(crate) type PassedParams<N> = Vec<(String, XPathValue<N>)>;

pub struct TransformContext<'s, 'a, N: DataSourceNode<'a>> {
    pub(crate) stylesheet: &'s CompiledStylesheet,
    pub(crate) options: TransformOptions,
    pub(crate) root: N,
    pub(crate) functions: FunctionRegistry<N>,
    pub(crate) extensions: ExtensionRegistry<N>,
    pub(crate) scopes: ScopeStack<N>,
    pub(crate) key_indexes: KeyIndexes<N>,
    match_cache: RefCell<MatchCache<N>>,
    /// Mode and rule of the innermost template invoked by `apply-templates`, for
    /// `apply-imports`. `for-each` clears the rule.
    pub(crate) current_mode: Option<ExpandedName>,
    pub(crate) current_rule: Option<TemplateId>,
    depth: usize,
    stopped: bool,
    pub(crate) sink: Rc<dyn DiagnosticSink>,
    params: HashMap<String, XPathValue<N>>,
    _marker: PhantomData<&'a ()>,
}

/// Native stack that must be left when a nested body or rule starts.
const STACK_RED_ZONE: usize = 256 * 1024;
/// Size of each extra stack segment allocated once the red zone is reached.
const STACK_SEGMENT: usize = 4 * 1024 * 1024;

/// Runs `f`, moving to a fresh heap-allocated stack segment when the current one is
/// nearly exhausted. Template recursion is bounded by `max_template_depth`, not by the
/// size of the host thread's stack.
fn with_stack<R>(f: impl FnOnce() -> R) -> R {
    stacker::maybe_grow(STACK_RED_ZONE, STACK_SEGMENT, f)
}

fn build_functions<'a, N: DataSourceNode<'a> + 'a>(
    stylesheet: &CompiledStylesheet,
    extensions: &ExtensionRegistry<N>,
) -> FunctionRegistry<N> {
    let mut functions = extensions.functions().clone();
    register_xslt_functions(
        &mut functions,
        Arc::clone(&stylesheet.decimal_formats),
        Rc::new(extensions.element_names()),
    );
    functions
}

impl<'s, 'a, N: DataSourceNode<'a> + 'a> TransformContext<'s, 'a, N> {
    /// `root` is used as given. For an [`XmlDocument`](crate::XmlDocument) source, apply
    /// the stylesheet's `whitespace` rules to the document first.
    pub fn new(stylesheet: &'s CompiledStylesheet, root: N, options: TransformOptions) -> Self {
        let extensions = ExtensionRegistry::new();
        Self {
            stylesheet,
            options,
            root,
            functions: build_functions(stylesheet, &extensions),
            extensions,
            scopes: ScopeStack::new(),
            key_indexes: KeyIndexes::new(),
            match_cache: RefCell::new(MatchCache::new()),
            current_mode: None,
            current_rule: None,
            depth: 0,
            stopped: false,
            sink: Rc::new(LogSink),
            params: HashMap::new(),
            _marker: PhantomData,
        }
    }

    /// Diagnostics and `xsl:message` output go to `sink` instead of the log.
    pub fn with_sink(mut self, sink: Rc<dyn DiagnosticSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_extensions(mut self, extensions: ExtensionRegistry<N>) -> Self {
        self.functions = build_functions(self.stylesheet, &extensions);
        self.extensions = extensions;
        self
    }

    /// Overrides the default of the top-level `xsl:param` named `name` (`local` or
    /// `{uri}local`).
    pub fn set_param(&mut self, name: &str, value: XPathValue<N>) {
        self.params.insert(name.to_string(), value);
    }

    pub fn set_string_param(&mut self, name: &str, value: &str) {
        self.set_param(name, XPathValue::String(value.to_string()));
    }

    /// True once the transformation failed or was terminated.
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Requests that no further instructions run.
    pub fn stop(&mut self) {
        self.stopped = true;
    }

    /// Builds key tables and globals, then processes the root node.
    pub fn transform(&mut self) -> Result<ResultTree, TransformFailure> {
        self.stopped = false;
        self.depth = 0;
        self.scopes = ScopeStack::new();
        self.match_cache.borrow_mut().clear();

        let mut builder = TreeBuilder::new();
        match self.run(&mut builder) {
            Ok(()) => {
                log::debug!("Transformation finished");
                Ok(builder.into_tree())
            }
            Err(error) => {
                self.stopped = true;
                self.sink.report(Diagnostic::error(error.to_string()));
                Err(TransformFailure {
                    error,
                    partial: builder.into_tree(),
                })
            }
        }
    }

    fn run(&mut self, builder: &mut dyn OutputBuilder) -> Result<(), ExecutionError> {
        self.key_indexes = build_key_indexes(
            &self.stylesheet.keys,
            self.root,
            &self.functions,
            &self.params,
            self.options.strict,
        )?;
        self.evaluate_globals()?;
        log::debug!(
            "Starting transformation with {} globals and {} key tables",
            self.scopes.globals.len(),
            self.key_indexes.len()
        );
        let root = self.root;
        self.apply_templates_to(&[root], &None, &Vec::new(), builder)
    }

    fn evaluate_globals(&mut self) -> Result<(), ExecutionError> {
        let stylesheet = self.stylesheet;
        let focus = Focus {
            node: self.root,
            position: 1,
            size: 1,
        };
        for global in &stylesheet.globals {
            let name = global.binding.name.clark();
            let supplied = match global.is_param {
                true => self.params.get(&name).cloned(),
                false => None,
            };
            let value = match supplied {
                Some(value) => value,
                None => self.evaluate_binding(&global.binding.value, focus)?,
            };
            self.scopes.globals.insert(name, value);
        }
        Ok(())
    }

    pub(crate) fn check_stopped(&self) -> Result<(), ExecutionError> {
        match self.stopped {
            true => Err(ExecutionError::Stopped),
            false => Ok(()),
        }
    }

    pub(crate) fn warn(&self, message: impl Into<String>) {
        self.sink.report(Diagnostic::warning(message));
    }

    // --- Evaluation ---

    pub(crate) fn eval(
        &self,
        expr: &CompiledExpr,
        focus: Focus<N>,
    ) -> Result<XPathValue<N>, ExecutionError> {
        let ctx = EvaluationContext::new(
            focus.node,
            self.root,
            &self.functions,
            focus.position,
            focus.size,
            &self.scopes,
            &self.key_indexes,
            self.options.strict,
        )
        .with_namespaces(&expr.namespaces);
        Ok(evaluate(&expr.expr, &ctx)?)
    }

    pub(crate) fn eval_string(
        &self,
        expr: &CompiledExpr,
        focus: Focus<N>,
    ) -> Result<String, ExecutionError> {
        Ok(self.eval(expr, focus)?.to_string())
    }

    pub(crate) fn eval_node_set(
        &self,
        expr: &CompiledExpr,
        focus: Focus<N>,
    ) -> Result<Vec<N>, ExecutionError> {
        Ok(self.eval(expr, focus)?.into_node_set()?)
    }

    pub(crate) fn eval_avt(
        &self,
        avt: &AttributeValueTemplate,
        focus: Focus<N>,
    ) -> Result<String, ExecutionError> {
        evaluate_avt(avt, |expr| self.eval_string(expr, focus))
    }

    /// The value of a `variable`, `param` or `with-param`.
    pub(crate) fn evaluate_binding(
        &mut self,
        value: &VariableValue,
        focus: Focus<N>,
    ) -> Result<XPathValue<N>, ExecutionError> {
        match value {
            VariableValue::Select(expr) => self.eval(expr, focus),
            VariableValue::Content(body) => {
                let mut fragment = TreeBuilder::new();
                self.execute_body(body, focus, &mut fragment)?;
                Ok(XPathValue::Fragment(Rc::new(fragment.into_tree())))
            }
            VariableValue::Empty => Ok(XPathValue::String(String::new())),
        }
    }

    pub(crate) fn evaluate_params(
        &mut self,
        params: &[VariableBinding],
        focus: Focus<N>,
    ) -> Result<PassedParams<N>, ExecutionError> {
        let mut passed = Vec::with_capacity(params.len());
        for param in params {
            let value = self.evaluate_binding(&param.value, focus)?;
            passed.push((param.name.clark(), value));
        }
        Ok(passed)
    }

    /// Binds a local variable in the innermost frame.
    pub(crate) fn bind(&mut self, name: String, value: XPathValue<N>) -> Result<(), ExecutionError> {
        if self.scopes.len() >= self.options.max_variable_depth {
            return Err(ExecutionError::VariableLimit(self.options.max_variable_depth));
        }
        self.scopes.bind(name, value);
        Ok(())
    }

    /// Runs `body` for its text only. Nodes other than text are dropped with a warning.
    pub(crate) fn instantiate_to_string(
        &mut self,
        body: &PreparsedTemplate,
        focus: Focus<N>,
        instruction: &str,
    ) -> Result<String, ExecutionError> {
        let mut collector = TextCollector::new();
        self.execute_body(body, focus, &mut collector)?;
        if collector.dropped > 0 {
            self.warn(format!(
                "{} node(s) other than text were ignored in {}",
                collector.dropped, instruction
            ));
        }
        Ok(collector.text)
    }

    // --- Template resolution and invocation ---

    pub(crate) fn match_env(&self) -> MatchEnv<'_, 'a, N> {
        // Patterns see globals only.
        MatchEnv::new(
            self.root,
            &self.functions,
            &self.scopes.globals,
            &self.key_indexes,
            self.options.strict,
        )
        .with_cache(&self.match_cache)
    }

    pub(crate) fn resolve(
        &self,
        node: N,
        mode: &Option<ExpandedName>,
        levels: Range<usize>,
    ) -> Result<Option<TemplateId>, ExecutionError> {
        let env = self.match_env();
        Ok(resolve_template(
            &self.stylesheet.levels,
            levels,
            node,
            mode,
            &env,
        )?)
    }

    /// Finds and runs the rule for every node in turn; the list is the new context.
    pub(crate) fn apply_templates_to(
        &mut self,
        nodes: &[N],
        mode: &Option<ExpandedName>,
        params: &PassedParams<N>,
        builder: &mut dyn OutputBuilder,
    ) -> Result<(), ExecutionError> {
        let all_levels = 0..self.stylesheet.levels.len();
        let size = nodes.len();
        for (index, &node) in nodes.iter().enumerate() {
            self.check_stopped()?;
            let focus = Focus {
                node,
                position: index + 1,
                size,
            };
            let found = self.resolve(node, mode, all_levels.clone())?;
            self.run_rule(found, focus, mode, params, builder)?;
        }
        Ok(())
    }

    /// Runs a resolved rule, or the built-in rule when nothing matched.
    pub(crate) fn run_rule(
        &mut self,
        found: Option<TemplateId>,
        focus: Focus<N>,
        mode: &Option<ExpandedName>,
        params: &PassedParams<N>,
        builder: &mut dyn OutputBuilder,
    ) -> Result<(), ExecutionError> {
        // Built-in rules recurse once per level of the source tree.
        with_stack(|| self.run_rule_in_place(found, focus, mode, params, builder))
    }

    fn run_rule_in_place(
        &mut self,
        found: Option<TemplateId>,
        focus: Focus<N>,
        mode: &Option<ExpandedName>,
        params: &PassedParams<N>,
        builder: &mut dyn OutputBuilder,
    ) -> Result<(), ExecutionError> {
        let saved_rule = self.current_rule;
        let saved_mode = std::mem::replace(&mut self.current_mode, mode.clone());
        let result = match found {
            Some(id) => {
                self.current_rule = Some(id);
                self.invoke_template(id, focus, params, builder)
            }
            None => {
                self.current_rule = None;
                self.apply_builtin_rule(focus, mode, builder)
            }
        };
        self.current_rule = saved_rule;
        self.current_mode = saved_mode;
        result
    }

    /// Runs a template in a fresh scope that holds only its parameters.
    pub(crate) fn invoke_template(
        &mut self,
        id: TemplateId,
        focus: Focus<N>,
        params: &PassedParams<N>,
        builder: &mut dyn OutputBuilder,
    ) -> Result<(), ExecutionError> {
        if self.depth >= self.options.max_template_depth {
            return Err(ExecutionError::RecursionLimit(self.options.max_template_depth));
        }
        let stylesheet = self.stylesheet;
        let template = stylesheet.template(id);
        log::trace!(
            "Invoking template {} ({}) at depth {}",
            id.0,
            template
                .match_pattern
                .as_deref()
                .or(template.name.as_ref().map(|n| n.local.as_str()))
                .unwrap_or_default(),
            self.depth
        );

        self.depth += 1;
        self.scopes.push_frame(true);
        let result = self.bind_params_and_run(template, focus, params, builder);
        self.scopes.pop_frame();
        self.depth -= 1;
        result
    }

    fn bind_params_and_run(
        &mut self,
        template: &crate::ast::Template,
        focus: Focus<N>,
        params: &PassedParams<N>,
        builder: &mut dyn OutputBuilder,
    ) -> Result<(), ExecutionError> {
        for param in &template.params {
            let name = param.name.clark();
            let passed = params
                .iter()
                .find(|(passed, _)| *passed == name)
                .map(|(_, value)| value.clone());
            let value = match passed {
                Some(value) => value,
                None => self.evaluate_binding(&param.value, focus)?,
            };
            self.bind(name, value)?;
        }
        self.execute_body(&template.body, focus, builder)
    }

    /// Root and elements: process the children. Text and attributes: copy the string
    /// value. Comments and processing instructions: nothing.
    fn apply_builtin_rule(
        &mut self,
        focus: Focus<N>,
        mode: &Option<ExpandedName>,
        builder: &mut dyn OutputBuilder,
    ) -> Result<(), ExecutionError> {
        match focus.node.node_type() {
            NodeType::Root | NodeType::Element => {
                let children: Vec<N> = focus.node.children().collect();
                self.apply_templates_to(&children, mode, &Vec::new(), builder)
            }
            NodeType::Text | NodeType::Attribute => {
                builder.add_text(&focus.node.string_value());
                Ok(())
            }
            NodeType::Comment | NodeType::ProcessingInstruction => Ok(()),
        }
    }

    // --- Instruction walk ---

    /// Runs a sequence of instructions. Variables bound in it go out of scope at its end.
    pub(crate) fn execute_body(
        &mut self,
        body: &PreparsedTemplate,
        focus: Focus<N>,
        builder: &mut dyn OutputBuilder,
    ) -> Result<(), ExecutionError> {
        with_stack(|| self.execute_body_in_place(body, focus, builder))
    }

    fn execute_body_in_place(
        &mut self,
        body: &PreparsedTemplate,
        focus: Focus<N>,
        builder: &mut dyn OutputBuilder,
    ) -> Result<(), ExecutionError> {
        self.scopes.push_frame(false);
        let mut result = Ok(());
        for instruction in &body.0 {
            result = self
                .check_stopped()
                .and_then(|()| self.execute_instruction(instruction, focus, builder));
            if result.is_err() {
                break;
            }
        }
        self.scopes.pop_frame();
        result
    }

    fn execute_instruction(
        &mut self,
        instruction: &XsltInstruction,
        focus: Focus<N>,
        builder: &mut dyn OutputBuilder,
    ) -> Result<(), ExecutionError> {
        match instruction {
            XsltInstruction::Text {
                text,
                disable_output_escaping,
            } => {
                if *disable_output_escaping {
                    builder.add_raw_text(text);
                } else {
                    builder.add_text(text);
                }
                Ok(())
            }
            XsltInstruction::LiteralElement {
                name,
                namespaces,
                attributes,
                use_attribute_sets,
                body,
            } => literals::handle_literal_element(
                self,
                name,
                namespaces,
                attributes,
                use_attribute_sets,
                body,
                focus,
                builder,
            ),
            XsltInstruction::ValueOf {
                select,
                disable_output_escaping,
            } => literals::handle_value_of(self, select, *disable_output_escaping, focus, builder),
            XsltInstruction::CopyOf { select } => copy::handle_copy_of(self, select, focus, builder),
            XsltInstruction::Copy {
                use_attribute_sets,
                body,
            } => copy::handle_copy(self, use_attribute_sets, body, focus, builder),
            XsltInstruction::ApplyTemplates {
                select,
                mode,
                sort_keys,
                params,
            } => apply_templates::handle_apply_templates(
                self,
                select.as_ref(),
                mode,
                sort_keys,
                params,
                focus,
                builder,
            ),
            XsltInstruction::ApplyImports => {
                apply_templates::handle_apply_imports(self, focus, builder)
            }
            XsltInstruction::CallTemplate {
                name,
                params,
                target,
            } => call_template::handle_call_template(self, name, params, target, focus, builder),
            XsltInstruction::ForEach {
                select,
                sort_keys,
                body,
            } => for_each::handle_for_each(self, select, sort_keys, body, focus, builder),
            XsltInstruction::If { test, body } => {
                control_flow::handle_if(self, test, body, focus, builder)
            }
            XsltInstruction::Choose { whens, otherwise } => {
                control_flow::handle_choose(self, whens, otherwise.as_ref(), focus, builder)
            }
            XsltInstruction::Variable(binding) => variables::handle_variable(self, binding, focus),
            XsltInstruction::Element {
                name,
                namespace,
                namespaces,
                default_namespace,
                use_attribute_sets,
                body,
            } => literals::handle_element(
                self,
                literals::ElementInstruction {
                    name,
                    namespace: namespace.as_ref(),
                    namespaces,
                    default_namespace: default_namespace.as_deref(),
                    use_attribute_sets,
                    body,
                },
                focus,
                builder,
            ),
            XsltInstruction::Attribute {
                name,
                namespace,
                namespaces,
                body,
            } => literals::handle_attribute(
                self,
                name,
                namespace.as_ref(),
                namespaces,
                body,
                focus,
                builder,
            ),
            XsltInstruction::Comment { body } => {
                literals::handle_comment(self, body, focus, builder)
            }
            XsltInstruction::ProcessingInstruction { name, body } => {
                literals::handle_processing_instruction(self, name, body, focus, builder)
            }
            XsltInstruction::Number(instruction) => {
                number::handle_number(self, instruction, focus, builder)
            }
            XsltInstruction::Message { body, terminate } => {
                message::handle_message(self, body, *terminate, focus)
            }
            XsltInstruction::Extension {
                name,
                attributes,
                body,
                fallbacks,
            } => extensions::handle_extension(
                self, name, attributes, body, fallbacks, focus, builder,
            ),
            XsltInstruction::Unsupported { name, fallbacks } => {
                extensions::handle_unsupported(self, name, fallbacks, focus, builder)
            }
        }
    }

    /// Marks the transformation as stopped; used by `xsl:message terminate="yes"`.
    pub(crate) fn terminate(&mut self) {
        self.stopped = true;
    }
}

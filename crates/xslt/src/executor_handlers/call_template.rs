use crate::ast::{ExpandedName, TemplateId, VariableBinding};
use crate::error::ExecutionError;
use crate::executor::{Focus, TransformContext};
use crate::output::OutputBuilder;
use quill_xpath1::DataSourceNode;
use std::sync::OnceLock;

/// Invokes a named template with the current focus. The name is looked up once and the
/// result kept on the instruction.
pub(crate) fn handle_call_template<'s, 'a, N: DataSourceNode<'a> + 'a>(
    executor: &mut TransformContext<'s, 'a, N>,
    name: &ExpandedName,
    params: &[VariableBinding],
    target: &OnceLock<Option<TemplateId>>,
    focus: Focus<N>,
    builder: &mut dyn OutputBuilder,
) -> Result<(), ExecutionError> {
    let stylesheet = executor.stylesheet;
    let Some(id) = *target.get_or_init(|| stylesheet.named_template(name)) else {
        return Err(ExecutionError::UnknownNamedTemplate(name.to_string()));
    };

    // Parameters are evaluated in the caller's scope.
    let passed = executor.evaluate_params(params, focus)?;
    if executor.options.strict {
        let declared = &stylesheet.template(id).params;
        for (passed_name, _) in &passed {
            if !declared.iter().any(|p| p.name.clark() == *passed_name) {
                return Err(ExecutionError::TypeError(format!(
                    "Call to template '{}' with undeclared parameter: '{}'",
                    name, passed_name
                )));
            }
        }
    }
    executor.invoke_template(id, focus, &passed, builder)
}

use crate::ast::VariableBinding;
use crate::error::ExecutionError;
use crate::executor::{Focus, TransformContext};
use quill_xpath1::DataSourceNode;

/// Binds a local variable; it stays visible until the end of the enclosing body.
pub(crate) fn handle_variable<'s, 'a, N: DataSourceNode<'a> + 'a>(
    executor: &mut TransformContext<'s, 'a, N>,
    binding: &VariableBinding,
    focus: Focus<N>,
) -> Result<(), ExecutionError> {
    let value = executor.evaluate_binding(&binding.value, focus)?;
    executor.bind(binding.name.clark(), value)
}

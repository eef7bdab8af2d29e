use crate::ast::{CompiledExpr, PreparsedTemplate, When};
use crate::error::ExecutionError;
use crate::executor::{Focus, TransformContext};
use crate::output::OutputBuilder;
use quill_xpath1::DataSourceNode;

pub(crate) fn handle_if<'s, 'a, N: DataSourceNode<'a> + 'a>(
    executor: &mut TransformContext<'s, 'a, N>,
    test: &CompiledExpr,
    body: &PreparsedTemplate,
    focus: Focus<N>,
    builder: &mut dyn OutputBuilder,
) -> Result<(), ExecutionError> {
    if executor.eval(test, focus)?.to_bool() {
        executor.execute_body(body, focus, builder)?;
    }
    Ok(())
}

/// Runs the first `when` whose test is true, else `otherwise`.
pub(crate) fn handle_choose<'s, 'a, N: DataSourceNode<'a> + 'a>(
    executor: &mut TransformContext<'s, 'a, N>,
    whens: &[When],
    otherwise: Option<&PreparsedTemplate>,
    focus: Focus<N>,
    builder: &mut dyn OutputBuilder,
) -> Result<(), ExecutionError> {
    for when in whens {
        if executor.eval(&when.test, focus)?.to_bool() {
            return executor.execute_body(&when.body, focus, builder);
        }
    }
    match otherwise {
        Some(body) => executor.execute_body(body, focus, builder),
        None => Ok(()),
    }
}

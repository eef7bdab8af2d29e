use crate::ast::PreparsedTemplate;
use crate::diagnostics::{Diagnostic, Severity};
use crate::error::ExecutionError;
use crate::executor::{Focus, TransformContext};
use quill_xpath1::DataSourceNode;

/// Reports the text of the body to the session's sink. A terminating message is reported
/// as an error and stops the transformation.
pub(crate) fn handle_message<'s, 'a, N: DataSourceNode<'a> + 'a>(
    executor: &mut TransformContext<'s, 'a, N>,
    body: &PreparsedTemplate,
    terminate: bool,
    focus: Focus<N>,
) -> Result<(), ExecutionError> {
    let text = executor.instantiate_to_string(body, focus, "xsl:message")?;
    let severity = match terminate {
        true => Severity::Error,
        false => Severity::Message,
    };
    executor.sink.report(Diagnostic::new(severity, text.clone()));
    if terminate {
        executor.terminate();
        return Err(ExecutionError::Terminated(text));
    }
    Ok(())
}

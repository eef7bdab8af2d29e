use crate::ast::{ExpandedName, PreparsedTemplate};
use crate::error::ExecutionError;
use crate::executor::{Focus, TransformContext};
use crate::extensions::ExtensionCall;
use crate::output::OutputBuilder;
use crate::result_tree::TreeBuilder;
use quill_xpath1::DataSourceNode;

fn run_fallbacks<'s, 'a, N: DataSourceNode<'a> + 'a>(
    executor: &mut TransformContext<'s, 'a, N>,
    fallbacks: &[PreparsedTemplate],
    focus: Focus<N>,
    builder: &mut dyn OutputBuilder,
) -> Result<(), ExecutionError> {
    for fallback in fallbacks {
        executor.execute_body(fallback, focus, builder)?;
    }
    Ok(())
}

/// Dispatches an extension element to its registered handler, or runs its
/// `xsl:fallback` children when no handler is registered.
#[allow(clippy::too_many_arguments)]
pub(crate) fn handle_extension<'s, 'a, N: DataSourceNode<'a> + 'a>(
    executor: &mut TransformContext<'s, 'a, N>,
    name: &ExpandedName,
    attributes: &[(ExpandedName, String)],
    body: &PreparsedTemplate,
    fallbacks: &[PreparsedTemplate],
    focus: Focus<N>,
    builder: &mut dyn OutputBuilder,
) -> Result<(), ExecutionError> {
    let Some(handler) = executor.extensions.element(name).cloned() else {
        if fallbacks.is_empty() {
            return Err(ExecutionError::Extension {
                name: name.to_string(),
                message: "no handler is registered and there is no xsl:fallback".to_string(),
            });
        }
        log::debug!("No handler for extension element '{}', running fallback", name);
        return run_fallbacks(executor, fallbacks, focus, builder);
    };

    let mut content = TreeBuilder::new();
    executor.execute_body(body, focus, &mut content)?;
    let content = content.into_tree();
    let call = ExtensionCall {
        name,
        attributes,
        context_node: focus.node,
        position: focus.position,
        size: focus.size,
        content: &content,
    };
    handler(&call, builder)
}

/// An XSLT instruction from a later version, accepted in forwards-compatible mode.
pub(crate) fn handle_unsupported<'s, 'a, N: DataSourceNode<'a> + 'a>(
    executor: &mut TransformContext<'s, 'a, N>,
    name: &str,
    fallbacks: &[PreparsedTemplate],
    focus: Focus<N>,
    builder: &mut dyn OutputBuilder,
) -> Result<(), ExecutionError> {
    if fallbacks.is_empty() {
        return Err(ExecutionError::Dynamic(format!(
            "unsupported instruction {} has no xsl:fallback",
            name
        )));
    }
    run_fallbacks(executor, fallbacks, focus, builder)
}

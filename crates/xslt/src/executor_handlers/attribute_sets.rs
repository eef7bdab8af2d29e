use crate::ast::ExpandedName;
use crate::error::ExecutionError;
use crate::executor::{Focus, TransformContext};
use crate::output::OutputBuilder;
use quill_xpath1::DataSourceNode;

/// Adds the attributes of the named sets to the open element. Every declaration of a
/// set contributes, lowest precedence first, and the sets a declaration uses are applied
/// before its own attributes. Attribute sets see only global variables.
pub(crate) fn apply_attribute_sets<'s, 'a, N: DataSourceNode<'a> + 'a>(
    executor: &mut TransformContext<'s, 'a, N>,
    names: &[ExpandedName],
    focus: Focus<N>,
    builder: &mut dyn OutputBuilder,
) -> Result<(), ExecutionError> {
    let mut active = Vec::new();
    executor.scopes.push_frame(true);
    let result = apply_sets(executor, names, focus, builder, &mut active);
    executor.scopes.pop_frame();
    result
}

fn apply_sets<'s, 'a, N: DataSourceNode<'a> + 'a>(
    executor: &mut TransformContext<'s, 'a, N>,
    names: &[ExpandedName],
    focus: Focus<N>,
    builder: &mut dyn OutputBuilder,
    active: &mut Vec<ExpandedName>,
) -> Result<(), ExecutionError> {
    let stylesheet = executor.stylesheet;
    for name in names {
        if active.contains(name) {
            return Err(ExecutionError::Dynamic(format!(
                "attribute set '{}' uses itself",
                name
            )));
        }
        let Some(declarations) = stylesheet.attribute_sets.get(name) else {
            executor.warn(format!("unknown attribute set '{}'", name));
            continue;
        };
        active.push(name.clone());
        for declaration in declarations {
            apply_sets(
                executor,
                &declaration.use_attribute_sets,
                focus,
                builder,
                active,
            )?;
            executor.execute_body(&declaration.attributes, focus, builder)?;
        }
        active.pop();
    }
    Ok(())
}

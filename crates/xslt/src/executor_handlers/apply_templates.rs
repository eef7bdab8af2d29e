use super::sort::sort_nodes;
use crate::ast::{CompiledExpr, ExpandedName, SortKey, VariableBinding};
use crate::error::ExecutionError;
use crate::executor::{Focus, TransformContext};
use crate::output::OutputBuilder;
use quill_xpath1::DataSourceNode;

#[allow(clippy::too_many_arguments)]
pub(crate) fn handle_apply_templates<'s, 'a, N: DataSourceNode<'a> + 'a>(
    executor: &mut TransformContext<'s, 'a, N>,
    select: Option<&CompiledExpr>,
    mode: &Option<ExpandedName>,
    sort_keys: &[SortKey],
    params: &[VariableBinding],
    focus: Focus<N>,
    builder: &mut dyn OutputBuilder,
) -> Result<(), ExecutionError> {
    let mut nodes = match select {
        Some(select) => executor.eval_node_set(select, focus)?,
        None => focus.node.children().collect(),
    };
    sort_nodes(executor, &mut nodes, sort_keys, focus)?;
    let passed = executor.evaluate_params(params, focus)?;
    executor.apply_templates_to(&nodes, mode, &passed, builder)
}

/// Re-processes the current node with the rules imported into the level of the current
/// rule, in the current mode.
pub(crate) fn handle_apply_imports<'s, 'a, N: DataSourceNode<'a> + 'a>(
    executor: &mut TransformContext<'s, 'a, N>,
    focus: Focus<N>,
    builder: &mut dyn OutputBuilder,
) -> Result<(), ExecutionError> {
    let Some(current) = executor.current_rule else {
        return Err(ExecutionError::Dynamic(
            "xsl:apply-imports used with no current template rule".to_string(),
        ));
    };
    let stylesheet = executor.stylesheet;
    let level = stylesheet.template(current).level;
    let imported = level + 1..stylesheet.levels[level].import_end;
    let mode = executor.current_mode.clone();
    let found = executor.resolve(focus.node, &mode, imported)?;
    executor.run_rule(found, focus, &mode, &Vec::new(), builder)
}

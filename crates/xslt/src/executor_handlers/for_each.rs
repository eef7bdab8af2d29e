use super::sort::sort_nodes;
use crate::ast::{CompiledExpr, PreparsedTemplate, SortKey};
use crate::error::ExecutionError;
use crate::executor::{Focus, TransformContext};
use crate::output::OutputBuilder;
use quill_xpath1::DataSourceNode;

pub(crate) fn handle_for_each<'s, 'a, N: DataSourceNode<'a> + 'a>(
    executor: &mut TransformContext<'s, 'a, N>,
    select: &CompiledExpr,
    sort_keys: &[SortKey],
    body: &PreparsedTemplate,
    focus: Focus<N>,
    builder: &mut dyn OutputBuilder,
) -> Result<(), ExecutionError> {
    let mut nodes = executor.eval_node_set(select, focus)?;
    sort_nodes(executor, &mut nodes, sort_keys, focus)?;

    // Inside for-each there is no current template rule.
    let saved_rule = executor.current_rule.take();
    let size = nodes.len();
    let mut result = Ok(());
    for (i, node) in nodes.into_iter().enumerate() {
        let inner = Focus {
            node,
            position: i + 1,
            size,
        };
        result = executor.execute_body(body, inner, builder);
        if result.is_err() {
            break;
        }
    }
    executor.current_rule = saved_rule;
    result
}

//! Index tables behind `key()` and `key(...)` patterns.

use crate::ast::KeyDeclaration;
use crate::matcher::MatchEnv;
use quill_xpath1::{
    DataSourceNode, EvaluationContext, FunctionRegistry, KeyIndexes, VariableScope, XPathError,
    XPathValue, evaluate,
};
use std::collections::HashMap;

/// Walks the whole source tree once per declaration and records every matching node
/// under each of its `use` values. Declarations sharing a name merge into one table.
/// Node lists stay in document order.
pub fn build_key_indexes<'a, N: DataSourceNode<'a> + 'a>(
    keys: &[KeyDeclaration],
    root: N,
    functions: &FunctionRegistry<N>,
    variables: &dyn VariableScope<N>,
    strict: bool,
) -> Result<KeyIndexes<N>, XPathError> {
    let mut indexes: KeyIndexes<N> = HashMap::new();
    for key in keys {
        // Patterns of later keys may use earlier tables.
        let mut table: HashMap<String, Vec<N>> = HashMap::new();
        {
            let env = MatchEnv::new(root, functions, variables, &indexes, strict);
            index_subtree(key, root, &env, &mut table)?;
        }
        let name = key.name.clark();
        let entry = indexes.entry(name.clone()).or_default();
        for (value, nodes) in table {
            let existing = entry.entry(value).or_default();
            existing.extend(nodes);
            existing.sort();
            existing.dedup();
        }
        log::debug!(
            "Indexed key '{}' with {} distinct values",
            name,
            indexes.get(&name).map_or(0, HashMap::len)
        );
    }
    Ok(indexes)
}

fn index_node<'a, N: DataSourceNode<'a> + 'a>(
    key: &KeyDeclaration,
    node: N,
    env: &MatchEnv<'_, 'a, N>,
    table: &mut HashMap<String, Vec<N>>,
) -> Result<(), XPathError> {
    if !key.match_pattern.matches(node, env)? {
        return Ok(());
    }
    let ctx = EvaluationContext::new(
        node,
        env.root,
        env.functions,
        1,
        1,
        env.variables,
        env.key_indexes,
        env.strict,
    )
    .with_namespaces(&key.use_expr.namespaces);
    let values = match evaluate(&key.use_expr.expr, &ctx)? {
        XPathValue::NodeSet(nodes) => nodes.iter().map(|n| n.string_value()).collect(),
        other => vec![other.to_string()],
    };
    for value in values {
        let nodes = table.entry(value).or_default();
        if nodes.last() != Some(&node) {
            nodes.push(node);
        }
    }
    Ok(())
}

fn index_subtree<'a, N: DataSourceNode<'a> + 'a>(
    key: &KeyDeclaration,
    node: N,
    env: &MatchEnv<'_, 'a, N>,
    table: &mut HashMap<String, Vec<N>>,
) -> Result<(), XPathError> {
    index_node(key, node, env, table)?;
    for attribute in node.attributes() {
        index_node(key, attribute, env, table)?;
    }
    for child in node.children() {
        index_subtree(key, child, env, table)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{CompiledExpr, ExpandedName};
    use crate::datasources::{XmlDocument, XmlNode};
    use crate::pattern::Pattern;
    use quill_xpath1::{NamespaceMap, parse_expression};
    use std::sync::Arc;

    fn declaration(name: &str, pattern: &str, use_expr: &str) -> KeyDeclaration {
        let namespaces = Arc::new(NamespaceMap::new());
        KeyDeclaration {
            name: ExpandedName::local(name),
            match_pattern: Pattern::compile(pattern, &namespaces).unwrap(),
            use_expr: CompiledExpr {
                expr: parse_expression(use_expr).unwrap(),
                source: use_expr.to_string(),
                namespaces,
            },
        }
    }

    #[test]
    fn test_index_groups_nodes_by_value() {
        let doc = XmlDocument::parse(
            "<r><p id='1' tag='x'/><p id='2' tag='y'/><p id='3' tag='x'/></r>",
        )
        .unwrap();
        let functions = FunctionRegistry::new();
        let vars: HashMap<String, XPathValue<XmlNode>> = HashMap::new();
        let indexes = build_key_indexes(
            &[declaration("by-tag", "p", "@tag")],
            doc.root_node(),
            &functions,
            &vars,
            false,
        )
        .unwrap();

        let table = &indexes["by-tag"];
        let ids = |value: &str| -> Vec<String> {
            table[value]
                .iter()
                .map(|n| n.attributes().next().unwrap().string_value())
                .collect()
        };
        assert_eq!(ids("x"), vec!["1", "3"]);
        assert_eq!(ids("y"), vec!["2"]);
    }

    #[test]
    fn test_node_set_use_indexes_every_value_and_attributes() {
        let doc = XmlDocument::parse("<r><b><a>k1</a><a>k2</a></b><c ref='k1'/></r>").unwrap();
        let functions = FunctionRegistry::new();
        let vars: HashMap<String, XPathValue<XmlNode>> = HashMap::new();
        let indexes = build_key_indexes(
            &[
                declaration("by-a", "b", "a"),
                declaration("refs", "@ref", "."),
            ],
            doc.root_node(),
            &functions,
            &vars,
            false,
        )
        .unwrap();

        assert_eq!(indexes["by-a"]["k1"].len(), 1);
        assert_eq!(indexes["by-a"]["k1"], indexes["by-a"]["k2"]);
        assert_eq!(indexes["refs"]["k1"][0].string_value(), "k1");
    }
}

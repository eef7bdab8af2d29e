//! Variable and parameter bindings, and the evaluation order of global ones.

use super::{compile_expr, expand_qname, location, required_attr, structure_error};
use crate::ast::{GlobalVariable, VariableBinding, VariableValue};
use crate::compiler::{CompilerBuilder, Ranked};
use crate::error::XsltError;
use roxmltree::Node;
use std::collections::HashMap;

impl CompilerBuilder<'_> {
    /// Compiles `xsl:variable`, `xsl:param` or `xsl:with-param`.
    pub(crate) fn compile_binding(&mut self, node: Node) -> Result<VariableBinding, XsltError> {
        let name = expand_qname(node, required_attr(node, "name")?)?;
        let body = self.compile_body(node)?;
        let value = match node.attribute("select") {
            Some(select) => {
                if !body.is_empty() {
                    self.report(
                        structure_error(
                            node,
                            format!("variable '{}' has both a select attribute and content", name),
                        ),
                        Some(location(node)),
                    )?;
                }
                VariableValue::Select(compile_expr(node, select)?)
            }
            None if body.is_empty() => VariableValue::Empty,
            None => VariableValue::Content(body),
        };
        Ok(VariableBinding { name, value })
    }

    pub(crate) fn handle_global_variable(
        &mut self,
        node: Node,
        level: usize,
        is_param: bool,
    ) -> Result<(), XsltError> {
        let binding = self.compile_binding(node)?;
        let position = self.next_position();
        self.globals.push(Ranked {
            level,
            position,
            value: GlobalVariable { binding, is_param },
        });
        Ok(())
    }

    /// Keeps the highest-precedence declaration of each name and orders the survivors so
    /// that every variable comes after the globals its value reads.
    pub(crate) fn order_globals(&mut self) -> Result<Vec<GlobalVariable>, XsltError> {
        let mut winners: HashMap<String, Ranked<GlobalVariable>> = HashMap::new();
        for ranked in std::mem::take(&mut self.globals) {
            let name = ranked.value.binding.name.clark();
            let (duplicate, wins) = match winners.get(&name) {
                Some(existing) => (existing.level == ranked.level, ranked.outranks(existing)),
                None => (false, true),
            };
            if duplicate {
                self.report(
                    XsltError::compilation(format!("global variable '{}' is declared twice", name)),
                    None,
                )?;
            }
            if wins {
                winners.insert(name, ranked);
            }
        }

        let mut declared: Vec<Ranked<GlobalVariable>> = winners.into_values().collect();
        declared.sort_by_key(|ranked| ranked.position);
        let index: HashMap<String, usize> = declared
            .iter()
            .enumerate()
            .map(|(i, ranked)| (ranked.value.binding.name.clark(), i))
            .collect();
        let dependencies: Vec<Vec<usize>> = declared
            .iter()
            .map(|ranked| {
                let mut refs = Vec::new();
                ranked.value.binding.value.for_each_expression(&mut |expr| {
                    refs.extend(
                        expr.variable_references()
                            .iter()
                            .filter_map(|name| index.get(name).copied()),
                    );
                });
                refs
            })
            .collect();

        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            New,
            Visiting,
            Done,
        }

        fn visit(
            i: usize,
            dependencies: &[Vec<usize>],
            marks: &mut [Mark],
            order: &mut Vec<usize>,
            declared: &[Ranked<GlobalVariable>],
        ) -> Result<(), XsltError> {
            match marks[i] {
                Mark::Done => return Ok(()),
                Mark::Visiting => {
                    return Err(XsltError::compilation(format!(
                        "circular reference between global variables involving '{}'",
                        declared[i].value.binding.name
                    )));
                }
                Mark::New => {}
            }
            marks[i] = Mark::Visiting;
            for &dependency in &dependencies[i] {
                visit(dependency, dependencies, marks, order, declared)?;
            }
            marks[i] = Mark::Done;
            order.push(i);
            Ok(())
        }

        let mut marks = vec![Mark::New; declared.len()];
        let mut order = Vec::with_capacity(declared.len());
        for i in 0..declared.len() {
            visit(i, &dependencies, &mut marks, &mut order, &declared)?;
        }

        let mut slots: Vec<Option<GlobalVariable>> =
            declared.into_iter().map(|ranked| Some(ranked.value)).collect();
        Ok(order
            .into_iter()
            .filter_map(|i| slots[i].take())
            .collect())
    }
}

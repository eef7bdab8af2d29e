//! Host extensions: functions callable from expressions and elements dispatched by the
//! executor. A registry belongs to one transformation session; nothing is global.

use crate::ast::ExpandedName;
use crate::error::ExecutionError;
use crate::output::OutputBuilder;
use crate::result_tree::ResultTree;
use quill_xpath1::{CustomFunction, FunctionRegistry};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

/// What an extension element handler sees.
pub struct ExtensionCall<'c, N> {
    pub name: &'c ExpandedName,
    /// Attributes as written on the element, without AVT expansion.
    pub attributes: &'c [(ExpandedName, String)],
    pub context_node: N,
    pub position: usize,
    pub size: usize,
    /// The element's content, already instantiated.
    pub content: &'c ResultTree,
}

impl<N> ExtensionCall<'_, N> {
    pub fn attribute(&self, local: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(name, _)| name.namespace.is_none() && name.local == local)
            .map(|(_, value)| value.as_str())
    }
}

pub type ExtensionElement<N> =
    Rc<dyn Fn(&ExtensionCall<'_, N>, &mut dyn OutputBuilder) -> Result<(), ExecutionError>>;

pub struct ExtensionRegistry<N> {
    functions: FunctionRegistry<N>,
    elements: HashMap<ExpandedName, ExtensionElement<N>>,
}

impl<N> Default for ExtensionRegistry<N> {
    fn default() -> Self {
        Self {
            functions: FunctionRegistry::new(),
            elements: HashMap::new(),
        }
    }
}

impl<N> Clone for ExtensionRegistry<N> {
    fn clone(&self) -> Self {
        Self {
            functions: self.functions.clone(),
            elements: self.elements.clone(),
        }
    }
}

impl<N> ExtensionRegistry<N> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_function(&mut self, namespace: &str, local: &str, f: CustomFunction<N>) {
        self.functions.register(Some(namespace), local, f);
    }

    pub fn register_element<F>(&mut self, namespace: &str, local: &str, handler: F)
    where
        F: Fn(&ExtensionCall<'_, N>, &mut dyn OutputBuilder) -> Result<(), ExecutionError>
            + 'static,
    {
        self.elements
            .insert(ExpandedName::new(Some(namespace), local), Rc::new(handler));
    }

    pub fn element(&self, name: &ExpandedName) -> Option<&ExtensionElement<N>> {
        self.elements.get(name)
    }

    pub fn functions(&self) -> &FunctionRegistry<N> {
        &self.functions
    }

    /// Expanded (`{uri}local`) names of every registered element.
    pub fn element_names(&self) -> HashSet<String> {
        self.elements.keys().map(ExpandedName::clark).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_xpath1::tests::MockNode;

    #[test]
    fn test_elements_are_found_by_expanded_name() {
        let mut registry: ExtensionRegistry<MockNode<'static>> = ExtensionRegistry::new();
        registry.register_element("urn:ext", "shout", |call, out| {
            let text = call.content.text_content(call.content.root()).to_uppercase();
            out.add_text(&text);
            Ok(())
        });

        assert!(registry.element(&ExpandedName::new(Some("urn:ext"), "shout")).is_some());
        assert!(registry.element(&ExpandedName::local("shout")).is_none());
        assert!(registry.element_names().contains("{urn:ext}shout"));
    }

    #[test]
    fn test_attribute_lookup_ignores_namespaced_names() {
        let content = ResultTree::new();
        let attributes = vec![
            (ExpandedName::new(Some("urn:x"), "mode"), "ns".to_string()),
            (ExpandedName::local("mode"), "plain".to_string()),
        ];
        let name = ExpandedName::local("e");
        let call = ExtensionCall {
            name: &name,
            attributes: &attributes,
            context_node: (),
            position: 1,
            size: 1,
            content: &content,
        };
        assert_eq!(call.attribute("mode"), Some("plain"));
        assert_eq!(call.attribute("other"), None);
    }
}

//! Functions XSLT adds to the XPath core library.

use crate::ast::XSLT_NAMESPACE;
use crate::format_number::DecimalFormat;
use quill_xpath1::{
    DataSourceNode, FunctionContext, FunctionRegistry, XPathError, XPathValue, clark_name,
    custom_function,
};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::sync::Arc;

/// Instructions this processor implements, for `element-available()`.
pub const XSLT_INSTRUCTIONS: &[&str] = &[
    "apply-imports",
    "apply-templates",
    "attribute",
    "call-template",
    "choose",
    "comment",
    "copy",
    "copy-of",
    "element",
    "fallback",
    "for-each",
    "if",
    "message",
    "number",
    "processing-instruction",
    "text",
    "value-of",
    "variable",
];

fn arity_error(function: &str, expected: &str) -> XPathError {
    XPathError::FunctionError {
        function: format!("{}()", function),
        message: format!("Expected {} argument(s)", expected),
    }
}

/// Registers `current()`, `format-number()`, `system-property()`, `element-available()`
/// and `unparsed-entity-uri()`.
pub fn register_xslt_functions<'a, N: DataSourceNode<'a> + 'a>(
    registry: &mut FunctionRegistry<N>,
    decimal_formats: Arc<HashMap<String, DecimalFormat>>,
    extension_elements: Rc<HashSet<String>>,
) {
    registry.register(
        None,
        "current",
        custom_function(|args: Vec<XPathValue<N>>, ctx: &FunctionContext<'_, N>| {
            if !args.is_empty() {
                return Err(arity_error("current", "0"));
            }
            Ok(XPathValue::NodeSet(vec![ctx.current_node]))
        }),
    );

    registry.register(
        None,
        "format-number",
        custom_function(
            move |args: Vec<XPathValue<N>>, ctx: &FunctionContext<'_, N>| {
                if args.len() != 2 && args.len() != 3 {
                    return Err(arity_error("format-number", "2 or 3"));
                }
                let value = args[0].to_number();
                let pattern = args[1].to_string();
                let format_name = match args.get(2) {
                    Some(name) => ctx.expand_qname(&name.to_string())?,
                    None => String::new(),
                };
                let format = decimal_formats.get(&format_name).ok_or_else(|| {
                    XPathError::FunctionError {
                        function: "format-number()".to_string(),
                        message: format!("Unknown decimal format '{}'", format_name),
                    }
                })?;
                format
                    .format(value, &pattern)
                    .map(XPathValue::String)
                    .map_err(|message| XPathError::FunctionError {
                        function: "format-number()".to_string(),
                        message,
                    })
            },
        ),
    );

    registry.register(
        None,
        "system-property",
        custom_function(|args: Vec<XPathValue<N>>, ctx: &FunctionContext<'_, N>| {
            if args.len() != 1 {
                return Err(arity_error("system-property", "1"));
            }
            let name = ctx.expand_qname(&args[0].to_string())?;
            let value = if name == clark_name(Some(XSLT_NAMESPACE), "version") {
                XPathValue::Number(1.0)
            } else if name == clark_name(Some(XSLT_NAMESPACE), "vendor") {
                XPathValue::String(env!("CARGO_PKG_NAME").to_string())
            } else if name == clark_name(Some(XSLT_NAMESPACE), "vendor-url") {
                XPathValue::String(env!("CARGO_PKG_REPOSITORY").to_string())
            } else {
                XPathValue::String(String::new())
            };
            Ok(value)
        }),
    );

    registry.register(
        None,
        "element-available",
        custom_function(
            move |args: Vec<XPathValue<N>>, ctx: &FunctionContext<'_, N>| {
                if args.len() != 1 {
                    return Err(arity_error("element-available", "1"));
                }
                let name = ctx.expand_qname(&args[0].to_string())?;
                let xslt_prefix = format!("{{{}}}", XSLT_NAMESPACE);
                let available = match name.strip_prefix(&xslt_prefix) {
                    Some(local) => XSLT_INSTRUCTIONS.contains(&local),
                    None => extension_elements.contains(&name),
                };
                Ok(XPathValue::Boolean(available))
            },
        ),
    );

    // Unparsed entities are not exposed by the source tree.
    registry.register(
        None,
        "unparsed-entity-uri",
        custom_function(|args: Vec<XPathValue<N>>, _ctx: &FunctionContext<'_, N>| {
            if args.len() != 1 {
                return Err(arity_error("unparsed-entity-uri", "1"));
            }
            Ok(XPathValue::String(String::new()))
        }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_xpath1::tests::{MockNode, create_test_tree};
    use quill_xpath1::{EvaluationContext, KeyIndexes, NamespaceMap, evaluate, parse_expression};

    fn eval_with(expr: &str, namespaces: &NamespaceMap) -> String {
        let tree = create_test_tree();
        let root = MockNode { id: 0, tree: &tree };
        let mut formats = HashMap::new();
        formats.insert(String::new(), DecimalFormat::default());
        formats.insert(
            "euro".to_string(),
            DecimalFormat {
                decimal_separator: ',',
                grouping_separator: '.',
                ..DecimalFormat::default()
            },
        );
        let mut elements = HashSet::new();
        elements.insert("{urn:ext}widget".to_string());

        let mut functions = FunctionRegistry::new();
        register_xslt_functions(&mut functions, Arc::new(formats), Rc::new(elements));
        let vars: HashMap<String, XPathValue<MockNode>> = HashMap::new();
        let keys = KeyIndexes::new();
        let ctx = EvaluationContext::new(root, root, &functions, 1, 1, &vars, &keys, false)
            .with_namespaces(namespaces);
        let parsed = parse_expression(expr).unwrap();
        evaluate(&parsed, &ctx).unwrap().to_string()
    }

    fn eval(expr: &str) -> String {
        let mut namespaces = NamespaceMap::new();
        namespaces.insert("xsl".to_string(), XSLT_NAMESPACE.to_string());
        namespaces.insert("ext".to_string(), "urn:ext".to_string());
        eval_with(expr, &namespaces)
    }

    #[test]
    fn test_format_number_uses_named_formats() {
        assert_eq!(eval("format-number(1234.5, '#,##0.00')"), "1,234.50");
        assert_eq!(eval("format-number(1234.5, '#.##0,00', 'euro')"), "1.234,50");
    }

    #[test]
    fn test_system_properties() {
        assert_eq!(eval("system-property('xsl:version')"), "1");
        assert_eq!(eval("system-property('xsl:vendor')"), "quill-xslt");
        assert_eq!(eval("system-property('xsl:unknown')"), "");
    }

    #[test]
    fn test_element_available() {
        assert_eq!(eval("element-available('xsl:for-each')"), "true");
        assert_eq!(eval("element-available('xsl:for-each-group')"), "false");
        assert_eq!(eval("element-available('ext:widget')"), "true");
        assert_eq!(eval("element-available('ext:gadget')"), "false");
    }

    #[test]
    fn test_current_and_unparsed_entity_uri() {
        assert_eq!(eval("count(current())"), "1");
        assert_eq!(eval("unparsed-entity-uri('logo')"), "");
    }
}

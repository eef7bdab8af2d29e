//! Turns a [`ResultTree`] into text according to `xsl:output`.

use crate::ast::{OutputMethod, OutputSettings};
use crate::result_tree::{NodeId, ResultNodeKind, ResultTree};
use quick_xml::escape::{escape, partial_escape};

const HTML_VOID_ELEMENTS: &[&str] = &[
    "area", "base", "basefont", "br", "col", "embed", "frame", "hr", "img", "input", "isindex",
    "link", "meta", "param",
];

/// The method used when `xsl:output` names none: `html` when the first element is an
/// unqualified `html` with only whitespace text before it, `xml` otherwise.
pub fn effective_method(tree: &ResultTree, settings: &OutputSettings) -> OutputMethod {
    if let Some(method) = settings.method {
        return method;
    }
    for &child in tree.children(tree.root()) {
        match &tree.node(child).kind {
            ResultNodeKind::Element { name, .. } => {
                return if name.namespace.is_none() && name.local.eq_ignore_ascii_case("html") {
                    OutputMethod::Html
                } else {
                    OutputMethod::Xml
                };
            }
            ResultNodeKind::Text { text, .. } if !text.trim().is_empty() => break,
            _ => {}
        }
    }
    OutputMethod::Xml
}

pub fn serialize(tree: &ResultTree, settings: &OutputSettings) -> String {
    let method = effective_method(tree, settings);
    log::debug!("Serializing result tree as {:?}", method);
    if method == OutputMethod::Text {
        return tree.text_content(tree.root());
    }
    let mut serializer = Serializer {
        tree,
        settings,
        html: method == OutputMethod::Html,
        indent: settings.indent.unwrap_or(false),
        out: String::new(),
    };
    serializer.document();
    serializer.out
}

struct Serializer<'t> {
    tree: &'t ResultTree,
    settings: &'t OutputSettings,
    html: bool,
    indent: bool,
    out: String,
}

impl Serializer<'_> {
    fn document(&mut self) {
        if !self.html && !self.settings.omit_xml_declaration {
            let encoding = self.settings.encoding.as_deref().unwrap_or("UTF-8");
            self.out
                .push_str(&format!("<?xml version=\"1.0\" encoding=\"{}\"", encoding));
            if let Some(standalone) = self.settings.standalone {
                let value = if standalone { "yes" } else { "no" };
                self.out.push_str(&format!(" standalone=\"{}\"", value));
            }
            self.out.push_str("?>\n");
        }
        self.doctype();

        let root = self.tree.root();
        for (index, &child) in self.tree.children(root).iter().enumerate() {
            if self.indent && index > 0 {
                self.out.push('\n');
            }
            self.node(child, 0);
        }
    }

    fn doctype(&mut self) {
        let Some(element) = self.tree.document_element() else {
            return;
        };
        let ResultNodeKind::Element { name, .. } = &self.tree.node(element).kind else {
            return;
        };
        let public = self.settings.doctype_public.as_deref();
        let system = self.settings.doctype_system.as_deref();
        let external = match (public, system) {
            (Some(public), Some(system)) => format!(" PUBLIC \"{}\" \"{}\"", public, system),
            (None, Some(system)) => format!(" SYSTEM \"{}\"", system),
            (Some(public), None) if self.html => format!(" PUBLIC \"{}\"", public),
            _ => return,
        };
        self.out
            .push_str(&format!("<!DOCTYPE {}{}>\n", name.qualified(), external));
    }

    /// True when every child is markup, so whitespace may be added between them.
    fn element_only(&self, id: NodeId) -> bool {
        let children = self.tree.children(id);
        !children.is_empty()
            && children
                .iter()
                .all(|&c| !matches!(self.tree.node(c).kind, ResultNodeKind::Text { .. }))
    }

    fn newline(&mut self, depth: usize) {
        self.out.push('\n');
        for _ in 0..depth {
            self.out.push_str("  ");
        }
    }

    fn node(&mut self, id: NodeId, depth: usize) {
        match &self.tree.node(id).kind {
            ResultNodeKind::Document => {}
            ResultNodeKind::Element {
                name,
                namespaces,
                attributes,
            } => {
                let qualified = name.qualified();
                self.out.push('<');
                self.out.push_str(&qualified);
                for (prefix, uri) in namespaces {
                    match prefix {
                        Some(prefix) => self.out.push_str(&format!(" xmlns:{}=\"", prefix)),
                        None => self.out.push_str(" xmlns=\""),
                    }
                    self.out.push_str(&escape(uri.as_str()));
                    self.out.push('"');
                }
                for (attr_name, value) in attributes {
                    self.out.push(' ');
                    self.out.push_str(&attr_name.qualified());
                    self.out.push_str("=\"");
                    self.out.push_str(&escape(value.as_str()));
                    self.out.push('"');
                }

                let children = self.tree.children(id);
                let html_element = self.html && name.namespace.is_none();
                if children.is_empty() {
                    if html_element {
                        self.out.push('>');
                        if !HTML_VOID_ELEMENTS.contains(&name.local.to_ascii_lowercase().as_str())
                        {
                            self.out.push_str(&format!("</{}>", qualified));
                        }
                    } else {
                        self.out.push_str("/>");
                    }
                    return;
                }
                self.out.push('>');

                let raw_content = html_element
                    && matches!(name.local.to_ascii_lowercase().as_str(), "script" | "style");
                let indent_children = self.indent && self.element_only(id);
                for &child in children {
                    if indent_children {
                        self.newline(depth + 1);
                    }
                    if raw_content {
                        if let ResultNodeKind::Text { text, .. } = &self.tree.node(child).kind {
                            self.out.push_str(text);
                            continue;
                        }
                    }
                    self.node(child, depth + 1);
                }
                if indent_children {
                    self.newline(depth);
                }
                self.out.push_str(&format!("</{}>", qualified));
            }
            ResultNodeKind::Text {
                text,
                disable_escaping,
            } => {
                if *disable_escaping {
                    self.out.push_str(text);
                } else {
                    self.out.push_str(&partial_escape(text.as_str()));
                }
            }
            ResultNodeKind::Comment(text) => {
                self.out.push_str("<!--");
                self.out.push_str(text);
                self.out.push_str("-->");
            }
            ResultNodeKind::ProcessingInstruction { target, data } => {
                self.out.push_str("<?");
                self.out.push_str(target);
                if !data.is_empty() {
                    self.out.push(' ');
                    self.out.push_str(data);
                }
                self.out.push_str(if self.html { ">" } else { "?>" });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::OutputBuilder;
    use crate::result_tree::{ResultName, TreeBuilder};

    fn sample() -> ResultTree {
        let mut builder = TreeBuilder::new();
        builder.start_element(&ResultName::local("doc"));
        builder.set_attribute(&ResultName::local("title"), "a \"b\" & c");
        builder.start_element(&ResultName::local("empty"));
        builder.end_element();
        builder.add_text("1 < 2 & 3");
        builder.add_comment(" note ");
        builder.add_processing_instruction("pi", "data");
        builder.end_element();
        builder.into_tree()
    }

    fn settings(method: Option<OutputMethod>) -> OutputSettings {
        OutputSettings {
            method,
            omit_xml_declaration: true,
            ..OutputSettings::default()
        }
    }

    #[test]
    fn test_xml_escaping_and_empty_elements() {
        let out = serialize(&sample(), &settings(None));
        assert_eq!(
            out,
            "<doc title=\"a &quot;b&quot; &amp; c\"><empty/>1 &lt; 2 &amp; 3<!-- note --><?pi data?></doc>"
        );
    }

    #[test]
    fn test_xml_declaration() {
        let out = serialize(&sample(), &OutputSettings::default());
        assert!(out.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<doc"));
    }

    #[test]
    fn test_text_method_keeps_only_text() {
        let out = serialize(&sample(), &settings(Some(OutputMethod::Text)));
        assert_eq!(out, "1 < 2 & 3");
    }

    #[test]
    fn test_html_is_detected_from_root_element() {
        let mut builder = TreeBuilder::new();
        builder.start_element(&ResultName::local("html"));
        builder.start_element(&ResultName::local("br"));
        builder.end_element();
        builder.start_element(&ResultName::local("script"));
        builder.add_text("if (a < b) {}");
        builder.end_element();
        builder.start_element(&ResultName::local("p"));
        builder.end_element();
        builder.end_element();
        let tree = builder.into_tree();

        assert_eq!(effective_method(&tree, &OutputSettings::default()), OutputMethod::Html);
        assert_eq!(
            serialize(&tree, &OutputSettings::default()),
            "<html><br><script>if (a < b) {}</script><p></p></html>"
        );
    }

    #[test]
    fn test_indent_only_touches_element_content() {
        let mut builder = TreeBuilder::new();
        builder.start_element(&ResultName::local("a"));
        builder.start_element(&ResultName::local("b"));
        builder.add_text("x");
        builder.end_element();
        builder.start_element(&ResultName::local("c"));
        builder.end_element();
        builder.end_element();
        let tree = builder.into_tree();

        let mut settings = settings(None);
        settings.indent = Some(true);
        assert_eq!(serialize(&tree, &settings), "<a>\n  <b>x</b>\n  <c/>\n</a>");
    }

    #[test]
    fn test_namespaces_and_doctype() {
        let mut builder = TreeBuilder::new();
        builder.start_element(&ResultName::new(Some("x"), "root", Some("urn:x")));
        builder.end_element();
        let tree = builder.into_tree();

        let mut settings = settings(None);
        settings.doctype_system = Some("root.dtd".to_string());
        assert_eq!(
            serialize(&tree, &settings),
            "<!DOCTYPE x:root SYSTEM \"root.dtd\">\n<x:root xmlns:x=\"urn:x\"/>"
        );
    }
}

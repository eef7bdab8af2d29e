//! Defines the `OutputBuilder` trait, which decouples the executor from the tree it
//! writes into (the final result tree or a result tree fragment).

use crate::result_tree::ResultName;

/// The semantic actions of building a result tree. Calls arrive in document order;
/// namespace declarations and attributes for an element must follow its
/// `start_element` before any child content.
pub trait OutputBuilder {
    fn start_element(&mut self, name: &ResultName);
    fn end_element(&mut self);

    /// Adds a namespace node to the open element. The default namespace has no prefix.
    fn declare_namespace(&mut self, prefix: Option<&str>, uri: &str);

    /// Sets an attribute on the open element, replacing one with the same expanded name.
    /// Returns false when there is no open element or it already has children.
    fn set_attribute(&mut self, name: &ResultName, value: &str) -> bool;

    fn add_text(&mut self, text: &str);
    /// Text written without output escaping (`disable-output-escaping="yes"`).
    fn add_raw_text(&mut self, text: &str);
    fn add_comment(&mut self, text: &str);
    fn add_processing_instruction(&mut self, target: &str, data: &str);
}

/// Collects only text, for instructions whose content becomes a string value
/// (`xsl:attribute`, `xsl:comment`, `xsl:processing-instruction`, `xsl:message`).
#[derive(Debug, Default)]
pub struct TextCollector {
    pub text: String,
    /// Number of non-text nodes that were dropped.
    pub dropped: usize,
    depth: usize,
}

impl TextCollector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OutputBuilder for TextCollector {
    fn start_element(&mut self, _name: &ResultName) {
        self.dropped += 1;
        self.depth += 1;
    }

    fn end_element(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    fn declare_namespace(&mut self, _prefix: Option<&str>, _uri: &str) {}

    fn set_attribute(&mut self, _name: &ResultName, _value: &str) -> bool {
        false
    }

    fn add_text(&mut self, text: &str) {
        // Text inside a dropped element is dropped with it.
        if self.depth == 0 {
            self.text.push_str(text);
        }
    }

    fn add_raw_text(&mut self, text: &str) {
        self.add_text(text);
    }

    fn add_comment(&mut self, _text: &str) {
        self.dropped += 1;
    }

    fn add_processing_instruction(&mut self, _target: &str, _data: &str) {
        self.dropped += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_collector_drops_markup() {
        let mut collector = TextCollector::new();
        collector.add_text("a");
        collector.start_element(&ResultName::local("b"));
        collector.add_text("ignored");
        collector.end_element();
        collector.add_comment("c");
        collector.add_raw_text("d");
        assert_eq!(collector.text, "ad");
        assert_eq!(collector.dropped, 2);
    }
}

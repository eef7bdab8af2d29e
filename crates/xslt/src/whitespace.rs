//! `xsl:strip-space` and `xsl:preserve-space`: which source elements lose their
//! whitespace-only text children.

use crate::ast::ExpandedName;

/// One name test from an `elements` list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpaceTest {
    /// `*`
    Any,
    /// `prefix:*`, resolved to its namespace URI.
    Namespace(String),
    Name(ExpandedName),
}

impl SpaceTest {
    pub fn matches(&self, namespace: Option<&str>, local: &str) -> bool {
        match self {
            SpaceTest::Any => true,
            SpaceTest::Namespace(uri) => namespace == Some(uri.as_str()),
            SpaceTest::Name(name) => name.local == local && name.namespace.as_deref() == namespace,
        }
    }

    /// Same order as the default priorities of the matching patterns: 0, -0.25, -0.5.
    fn specificity(&self) -> u8 {
        match self {
            SpaceTest::Name(_) => 2,
            SpaceTest::Namespace(_) => 1,
            SpaceTest::Any => 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SpaceRule {
    pub test: SpaceTest,
    /// `strip-space` when true, `preserve-space` otherwise.
    pub strip: bool,
    /// Precedence level, lower is stronger.
    pub level: usize,
    /// Declaration order across all modules.
    pub position: usize,
}

/// Every rule of the stylesheet, strongest first: import precedence, then name test
/// specificity, then the later declaration.
#[derive(Debug, Clone, Default)]
pub struct WhitespaceRules {
    rules: Vec<SpaceRule>,
}

impl WhitespaceRules {
    pub fn new(mut rules: Vec<SpaceRule>) -> Self {
        rules.sort_by(|a, b| {
            a.level
                .cmp(&b.level)
                .then(b.test.specificity().cmp(&a.test.specificity()))
                .then(b.position.cmp(&a.position))
        });
        Self { rules }
    }

    /// True when no element can ever be stripped.
    pub fn is_empty(&self) -> bool {
        !self.rules.iter().any(|rule| rule.strip)
    }

    /// Whether whitespace-only text directly inside an element with this name goes.
    /// Elements no rule names keep theirs.
    pub fn strips(&self, namespace: Option<&str>, local: &str) -> bool {
        self.rules
            .iter()
            .find(|rule| rule.test.matches(namespace, local))
            .is_some_and(|rule| rule.strip)
    }
}

/// XML whitespace: space, tab, carriage return and line feed.
pub fn is_xml_whitespace(text: &str) -> bool {
    text.chars().all(|c| matches!(c, ' ' | '\t' | '\r' | '\n'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(test: SpaceTest, strip: bool, level: usize, position: usize) -> SpaceRule {
        SpaceRule {
            test,
            strip,
            level,
            position,
        }
    }

    #[test]
    fn test_named_element_beats_wildcard_at_same_level() {
        let rules = WhitespaceRules::new(vec![
            rule(SpaceTest::Name(ExpandedName::local("pre")), false, 0, 1),
            rule(SpaceTest::Any, true, 0, 2),
        ]);
        assert!(rules.strips(None, "div"));
        assert!(!rules.strips(None, "pre"));
    }

    #[test]
    fn test_importing_level_wins_regardless_of_specificity() {
        let rules = WhitespaceRules::new(vec![
            rule(SpaceTest::Any, false, 0, 5),
            rule(SpaceTest::Name(ExpandedName::local("list")), true, 1, 1),
        ]);
        assert!(!rules.strips(None, "list"));
    }

    #[test]
    fn test_namespace_wildcard_and_later_declaration() {
        let rules = WhitespaceRules::new(vec![
            rule(SpaceTest::Namespace("urn:x".to_string()), true, 0, 1),
            rule(SpaceTest::Name(ExpandedName::new(Some("urn:x"), "keep")), true, 0, 2),
            rule(SpaceTest::Name(ExpandedName::new(Some("urn:x"), "keep")), false, 0, 3),
        ]);
        assert!(rules.strips(Some("urn:x"), "item"));
        assert!(!rules.strips(Some("urn:x"), "keep"));
        assert!(!rules.strips(None, "item"));
        assert!(!rules.is_empty());
    }

    #[test]
    fn test_preserve_only_rules_are_empty() {
        let rules = WhitespaceRules::new(vec![rule(SpaceTest::Any, false, 0, 1)]);
        assert!(rules.is_empty());
        assert!(WhitespaceRules::default().is_empty());
        assert!(is_xml_whitespace(" \n\t\r"));
        assert!(!is_xml_whitespace("\u{a0}"));
    }
}

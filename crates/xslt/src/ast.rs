//! The compiled form of a stylesheet.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`CompiledStylesheet`] | Every declaration of a stylesheet and its imports, flattened by precedence |
//! | [`XsltInstruction`] | One node of a template body |
//! | [`Template`] | A template rule and/or named template |
//! | [`CompiledExpr`] | An XPath expression plus the namespace bindings it was written under |
//!
//! Nothing in here borrows from the stylesheet source, and nothing is mutated during a
//! transformation except the lazily filled `call-template` targets, so one compiled
//! stylesheet can back any number of transformations.

use crate::diagnostics::{Diagnostic, Severity};
use crate::error::Location;
use crate::format_number::DecimalFormat;
use crate::pattern::Pattern;
use crate::registry::TemplateRegistry;
use crate::result_tree::ResultName;
use crate::whitespace::WhitespaceRules;
use quill_xpath1::{Expression, NamespaceMap, clark_name};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

pub const XSLT_NAMESPACE: &str = "http://www.w3.org/1999/XSL/Transform";

/// A namespace URI plus local name. Prefixes never take part in comparisons.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExpandedName {
    pub namespace: Option<String>,
    pub local: String,
}

impl ExpandedName {
    pub fn new(namespace: Option<&str>, local: &str) -> Self {
        Self {
            namespace: namespace.filter(|ns| !ns.is_empty()).map(str::to_string),
            local: local.to_string(),
        }
    }

    pub fn local(local: &str) -> Self {
        Self::new(None, local)
    }

    /// The `{uri}local` form used for variable and key lookups.
    pub fn clark(&self) -> String {
        clark_name(self.namespace.as_deref(), &self.local)
    }
}

impl fmt::Display for ExpandedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.clark())
    }
}

#[derive(Debug, Clone)]
pub struct CompiledExpr {
    pub expr: Expression,
    pub source: String,
    pub namespaces: Arc<NamespaceMap>,
}

impl CompiledExpr {
    /// Expanded names of the variables the expression reads.
    pub fn variable_references(&self) -> Vec<String> {
        self.expr
            .variable_references()
            .into_iter()
            .map(|name| match name.split_once(':') {
                Some((prefix, local)) => {
                    clark_name(self.namespaces.get(prefix).map(String::as_str), local)
                }
                None => name.to_string(),
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub enum AvtPart {
    Static(String),
    Dynamic(CompiledExpr),
}

/// An attribute value with embedded `{expr}` segments.
#[derive(Debug, Clone)]
pub struct AttributeValueTemplate(pub Vec<AvtPart>);

impl AttributeValueTemplate {
    pub fn from_static(text: &str) -> Self {
        AttributeValueTemplate(vec![AvtPart::Static(text.to_string())])
    }

    /// The value when no segment needs evaluation.
    pub fn as_static(&self) -> Option<String> {
        let mut text = String::new();
        for part in &self.0 {
            match part {
                AvtPart::Static(s) => text.push_str(s),
                AvtPart::Dynamic(_) => return None,
            }
        }
        Some(text)
    }
}

#[derive(Debug, Clone, Default)]
pub struct PreparsedTemplate(pub Vec<XsltInstruction>);

impl PreparsedTemplate {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Visits every expression in the body, including nested bodies and AVT segments.
    pub fn for_each_expression(&self, f: &mut dyn FnMut(&CompiledExpr)) {
        for instruction in &self.0 {
            instruction.for_each_expression(f);
        }
    }
}

/// How a variable, parameter or `with-param` gets its value.
#[derive(Debug, Clone)]
pub enum VariableValue {
    Select(CompiledExpr),
    /// A body producing a result tree fragment.
    Content(PreparsedTemplate),
    /// Neither `select` nor content: the empty string.
    Empty,
}

impl VariableValue {
    pub fn for_each_expression(&self, f: &mut dyn FnMut(&CompiledExpr)) {
        match self {
            VariableValue::Select(expr) => f(expr),
            VariableValue::Content(body) => body.for_each_expression(f),
            VariableValue::Empty => {}
        }
    }
}

/// A `variable`, `param` or `with-param` declaration.
#[derive(Debug, Clone)]
pub struct VariableBinding {
    pub name: ExpandedName,
    pub value: VariableValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDataType {
    Text,
    Number,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseOrder {
    UpperFirst,
    LowerFirst,
}

/// An `xsl:sort`. The settings are AVTs evaluated once per sorted node-list.
#[derive(Debug, Clone)]
pub struct SortKey {
    pub select: CompiledExpr,
    pub order: Option<AttributeValueTemplate>,
    pub data_type: Option<AttributeValueTemplate>,
    pub case_order: Option<AttributeValueTemplate>,
}

#[derive(Debug, Clone)]
pub struct When {
    pub test: CompiledExpr,
    pub body: PreparsedTemplate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumberLevel {
    Single,
    Multiple,
    Any,
}

#[derive(Debug, Clone)]
pub struct NumberInstruction {
    pub level: NumberLevel,
    pub count: Option<Pattern>,
    pub from: Option<Pattern>,
    pub value: Option<CompiledExpr>,
    pub format: AttributeValueTemplate,
    pub grouping_separator: Option<AttributeValueTemplate>,
    pub grouping_size: Option<AttributeValueTemplate>,
}

#[derive(Debug, Clone)]
pub struct LiteralAttribute {
    pub name: ResultName,
    pub value: AttributeValueTemplate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TemplateId(pub usize);

#[derive(Debug, Clone)]
pub enum XsltInstruction {
    Text {
        text: String,
        disable_output_escaping: bool,
    },
    LiteralElement {
        name: ResultName,
        /// Namespace nodes copied onto the result element.
        namespaces: Vec<(Option<String>, String)>,
        attributes: Vec<LiteralAttribute>,
        use_attribute_sets: Vec<ExpandedName>,
        body: PreparsedTemplate,
    },
    ValueOf {
        select: CompiledExpr,
        disable_output_escaping: bool,
    },
    CopyOf {
        select: CompiledExpr,
    },
    Copy {
        use_attribute_sets: Vec<ExpandedName>,
        body: PreparsedTemplate,
    },
    ApplyTemplates {
        select: Option<CompiledExpr>,
        mode: Option<ExpandedName>,
        sort_keys: Vec<SortKey>,
        params: Vec<VariableBinding>,
    },
    ApplyImports,
    CallTemplate {
        name: ExpandedName,
        params: Vec<VariableBinding>,
        /// Resolved on first execution and reused afterwards.
        target: OnceLock<Option<TemplateId>>,
    },
    ForEach {
        select: CompiledExpr,
        sort_keys: Vec<SortKey>,
        body: PreparsedTemplate,
    },
    If {
        test: CompiledExpr,
        body: PreparsedTemplate,
    },
    Choose {
        whens: Vec<When>,
        otherwise: Option<PreparsedTemplate>,
    },
    Variable(VariableBinding),
    Element {
        name: AttributeValueTemplate,
        namespace: Option<AttributeValueTemplate>,
        namespaces: Arc<NamespaceMap>,
        default_namespace: Option<String>,
        use_attribute_sets: Vec<ExpandedName>,
        body: PreparsedTemplate,
    },
    Attribute {
        name: AttributeValueTemplate,
        namespace: Option<AttributeValueTemplate>,
        namespaces: Arc<NamespaceMap>,
        body: PreparsedTemplate,
    },
    Comment {
        body: PreparsedTemplate,
    },
    ProcessingInstruction {
        name: AttributeValueTemplate,
        body: PreparsedTemplate,
    },
    Number(Box<NumberInstruction>),
    Message {
        body: PreparsedTemplate,
        terminate: bool,
    },
    /// An element in an extension namespace, dispatched through the extension registry.
    Extension {
        name: ExpandedName,
        attributes: Vec<(ExpandedName, String)>,
        body: PreparsedTemplate,
        fallbacks: Vec<PreparsedTemplate>,
    },
    /// An XSLT element this processor does not know, accepted in forwards-compatible mode.
    Unsupported {
        name: String,
        fallbacks: Vec<PreparsedTemplate>,
    },
}

impl XsltInstruction {
    pub fn for_each_expression(&self, f: &mut dyn FnMut(&CompiledExpr)) {
        fn avt(template: &AttributeValueTemplate, f: &mut dyn FnMut(&CompiledExpr)) {
            for part in &template.0 {
                if let AvtPart::Dynamic(expr) = part {
                    f(expr);
                }
            }
        }
        fn sort_keys(keys: &[SortKey], f: &mut dyn FnMut(&CompiledExpr)) {
            for key in keys {
                f(&key.select);
                for setting in [&key.order, &key.data_type, &key.case_order]
                    .into_iter()
                    .flatten()
                {
                    avt(setting, f);
                }
            }
        }

        match self {
            XsltInstruction::Text { .. }
            | XsltInstruction::ApplyImports
            | XsltInstruction::Unsupported { .. } => {}
            XsltInstruction::LiteralElement {
                attributes, body, ..
            } => {
                for attribute in attributes {
                    avt(&attribute.value, f);
                }
                body.for_each_expression(f);
            }
            XsltInstruction::ValueOf { select, .. } | XsltInstruction::CopyOf { select } => {
                f(select)
            }
            XsltInstruction::Copy { body, .. }
            | XsltInstruction::Comment { body }
            | XsltInstruction::Message { body, .. }
            | XsltInstruction::Extension { body, .. } => body.for_each_expression(f),
            XsltInstruction::ApplyTemplates {
                select,
                sort_keys: keys,
                params,
                ..
            } => {
                if let Some(select) = select {
                    f(select);
                }
                sort_keys(keys, f);
                for param in params {
                    param.value.for_each_expression(f);
                }
            }
            XsltInstruction::CallTemplate { params, .. } => {
                for param in params {
                    param.value.for_each_expression(f);
                }
            }
            XsltInstruction::ForEach {
                select,
                sort_keys: keys,
                body,
            } => {
                f(select);
                sort_keys(keys, f);
                body.for_each_expression(f);
            }
            XsltInstruction::If { test, body } => {
                f(test);
                body.for_each_expression(f);
            }
            XsltInstruction::Choose { whens, otherwise } => {
                for when in whens {
                    f(&when.test);
                    when.body.for_each_expression(f);
                }
                if let Some(otherwise) = otherwise {
                    otherwise.for_each_expression(f);
                }
            }
            XsltInstruction::Variable(binding) => binding.value.for_each_expression(f),
            XsltInstruction::Element {
                name,
                namespace,
                body,
                ..
            }
            | XsltInstruction::Attribute {
                name,
                namespace,
                body,
                ..
            } => {
                avt(name, f);
                if let Some(namespace) = namespace {
                    avt(namespace, f);
                }
                body.for_each_expression(f);
            }
            XsltInstruction::ProcessingInstruction { name, body } => {
                avt(name, f);
                body.for_each_expression(f);
            }
            XsltInstruction::Number(number) => {
                if let Some(value) = &number.value {
                    f(value);
                }
                avt(&number.format, f);
                for setting in [&number.grouping_separator, &number.grouping_size]
                    .into_iter()
                    .flatten()
                {
                    avt(setting, f);
                }
            }
        }
    }
}

/// A template rule (with `match`), a named template (with `name`), or both.
#[derive(Debug, Clone)]
pub struct Template {
    pub match_pattern: Option<String>,
    pub name: Option<ExpandedName>,
    pub mode: Option<ExpandedName>,
    pub priority: Option<f64>,
    pub params: Vec<VariableBinding>,
    pub body: PreparsedTemplate,
    /// Index of the precedence level that declared the template.
    pub level: usize,
    /// Declaration order across the whole stylesheet.
    pub position: usize,
    pub location: Option<Location>,
}

#[derive(Debug, Clone)]
pub struct GlobalVariable {
    pub binding: VariableBinding,
    pub is_param: bool,
}

#[derive(Debug, Clone)]
pub struct KeyDeclaration {
    pub name: ExpandedName,
    pub match_pattern: Pattern,
    pub use_expr: CompiledExpr,
}

#[derive(Debug, Clone)]
pub struct AttributeSet {
    pub name: ExpandedName,
    pub use_attribute_sets: Vec<ExpandedName>,
    pub attributes: PreparsedTemplate,
}

/// Result namespace substituted for a stylesheet namespace by `xsl:namespace-alias`.
#[derive(Debug, Clone, PartialEq)]
pub struct NamespaceAlias {
    pub result_prefix: Option<String>,
    pub result_uri: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMethod {
    Xml,
    Html,
    Text,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutputSettings {
    pub method: Option<OutputMethod>,
    pub indent: Option<bool>,
    pub omit_xml_declaration: bool,
    pub encoding: Option<String>,
    pub standalone: Option<bool>,
    pub doctype_public: Option<String>,
    pub doctype_system: Option<String>,
    pub media_type: Option<String>,
}

/// One import-precedence level: a stylesheet module together with everything it includes.
#[derive(Debug, Default)]
pub struct StylesheetLevel {
    pub href: Option<String>,
    pub registry: TemplateRegistry,
    /// Levels `index + 1 .. import_end` are the ones this level imports, directly or not.
    pub import_end: usize,
}

#[derive(Debug, Default)]
pub struct CompiledStylesheet {
    pub templates: Vec<Template>,
    /// Highest precedence first.
    pub levels: Vec<StylesheetLevel>,
    pub named_templates: HashMap<ExpandedName, TemplateId>,
    /// Global variables and parameters in evaluation order.
    pub globals: Vec<GlobalVariable>,
    pub keys: Vec<KeyDeclaration>,
    /// Every declaration of each attribute set, lowest precedence first.
    pub attribute_sets: HashMap<ExpandedName, Vec<AttributeSet>>,
    /// Keyed by stylesheet namespace URI; the empty string stands for no namespace.
    pub namespace_aliases: HashMap<String, NamespaceAlias>,
    /// Keyed by expanded name; the unnamed default format is under the empty string.
    pub decimal_formats: Arc<HashMap<String, DecimalFormat>>,
    pub output: OutputSettings,
    /// `xsl:strip-space` and `xsl:preserve-space` across all modules.
    pub whitespace: WhitespaceRules,
    pub diagnostics: Vec<Diagnostic>,
}

impl CompiledStylesheet {
    pub fn template(&self, id: TemplateId) -> &Template {
        &self.templates[id.0]
    }

    pub fn named_template(&self, name: &ExpandedName) -> Option<TemplateId> {
        self.named_templates.get(name).copied()
    }

    /// Number of non-fatal errors reported while compiling.
    pub fn error_count(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .count()
    }
}

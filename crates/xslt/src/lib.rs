//! XSLT 1.0 transformation engine.
//!
//! A stylesheet is compiled once into a [`CompiledStylesheet`] (templates grouped by import
//! precedence, globals in dependency order, keys, attribute sets, output settings) and
//! then run any number of times. Each run is a [`TransformContext`]: it owns the variable
//! scopes, key tables, diagnostics sink and extension registry of that one session, and
//! produces a [`ResultTree`] that [`serialize`] turns into text.
//!
//! Source documents are read through the [`DataSourceNode`] trait, so any tree that can
//! answer the XPath data model questions can be transformed. [`XmlDocument`] adapts
//! `roxmltree`.

pub mod ast;
pub mod avt;
pub mod compiler;
pub mod config;
pub mod datasources;
pub mod diagnostics;
pub mod error;
pub mod executor;
pub mod extensions;
pub mod format_number;
pub mod functions;
pub mod keys;
pub mod loader;
pub mod matcher;
pub mod number;
pub mod output;
pub mod pattern;
pub mod processor;
pub mod registry;
pub mod result_tree;
pub mod scope;
pub mod serializer;
pub mod whitespace;

mod compiler_handlers;
mod executor_handlers;

pub use ast::{CompiledStylesheet, ExpandedName, OutputMethod, OutputSettings};
pub use compiler::{compile_stylesheet, compile_stylesheet_with_loader};
pub use config::TransformOptions;
pub use datasources::{DataSourceNode, NodeType, QName, XmlDocument, XmlNode};
pub use diagnostics::{CollectingSink, Diagnostic, DiagnosticSink, LogSink, Severity};
pub use error::{ExecutionError, Location, XsltError};
pub use executor::{TransformContext, TransformFailure};
pub use extensions::{ExtensionCall, ExtensionRegistry};
pub use loader::{FileSystemLoader, InMemoryLoader, StylesheetLoader};
pub use output::OutputBuilder;
pub use processor::XsltTemplate;
pub use result_tree::{ResultName, ResultTree, TreeBuilder};
pub use serializer::serialize;

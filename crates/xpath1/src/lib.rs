pub mod ast;
pub mod axes;
pub mod datasource;
pub mod engine;
pub mod error;
pub mod functions;
pub mod operators;
pub mod parser;

pub use ast::{Axis, BinaryOperator, Expression, LocationPath, NodeTest, NodeTypeTest, Step};
pub use datasource::{DataSourceNode, NodeType, QName, XML_NAMESPACE};
pub use engine::{
    EvaluationContext, ExternalValue, KeyIndexes, NamespaceMap, ResultFragment, VariableScope,
    XPathValue, clark_name, evaluate, number_to_string, predicate_holds, split_qname,
    string_to_number,
};
pub use functions::{
    CustomFunction, FunctionContext, FunctionRegistry, custom_function, find_ids, is_builtin,
};

// Re-export test utilities for integration testing in downstream crates
pub use datasource::tests;
pub use error::XPathError;
pub use parser::parse_expression;

pub mod xml;

pub use quill_xpath1::{DataSourceNode, NodeType, QName};
pub use xml::{XmlDocument, XmlNode};

//! Loading of stylesheet modules named by `xsl:import` and `xsl:include`.

use crate::error::XsltError;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Bound on nested imports and includes.
pub const MAX_IMPORT_DEPTH: usize = 100;

/// Supplies the text of a stylesheet module given its resolved URI.
pub trait StylesheetLoader {
    fn load(&self, uri: &str) -> Result<String, XsltError>;
}

/// Reads modules from disk, relative to an optional base directory.
#[derive(Debug, Clone, Default)]
pub struct FileSystemLoader {
    base_dir: Option<PathBuf>,
}

impl FileSystemLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: Some(base_dir.into()),
        }
    }
}

impl StylesheetLoader for FileSystemLoader {
    fn load(&self, uri: &str) -> Result<String, XsltError> {
        let path = uri.strip_prefix("file://").unwrap_or(uri);
        let path = match &self.base_dir {
            Some(base) if Path::new(path).is_relative() => base.join(path),
            _ => PathBuf::from(path),
        };
        std::fs::read_to_string(&path).map_err(|e| XsltError::import(uri, e.to_string()))
    }
}

/// Serves modules from a map, keyed by the URI they are requested under.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLoader {
    modules: HashMap<String, String>,
}

impl InMemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_module(mut self, uri: impl Into<String>, source: impl Into<String>) -> Self {
        self.insert(uri, source);
        self
    }

    pub fn insert(&mut self, uri: impl Into<String>, source: impl Into<String>) {
        self.modules.insert(uri.into(), source.into());
    }
}

impl StylesheetLoader for InMemoryLoader {
    fn load(&self, uri: &str) -> Result<String, XsltError> {
        self.modules
            .get(uri)
            .cloned()
            .ok_or_else(|| XsltError::import(uri, "no such module"))
    }
}

/// Resolves `href` against the URI of the module that references it.
pub fn resolve_uri(href: &str, base_uri: Option<&str>) -> String {
    if href.starts_with('/') || href.contains("://") {
        return href.to_string();
    }
    match base_uri {
        Some(base) => {
            let base_dir = match base.rfind('/') {
                Some(index) => &base[..=index],
                None => "",
            };
            normalize_path(&format!("{}{}", base_dir, href))
        }
        None => normalize_path(href),
    }
}

fn normalize_path(path: &str) -> String {
    let (scheme, rest) = match path.find("://") {
        Some(index) => path.split_at(index + 3),
        None => ("", path),
    };
    let mut parts: Vec<&str> = Vec::new();
    for part in rest.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            _ => parts.push(part),
        }
    }
    if rest.starts_with('/') {
        format!("{}/{}", scheme, parts.join("/"))
    } else {
        format!("{}{}", scheme, parts.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_relative_hrefs() {
        assert_eq!(resolve_uri("b.xsl", Some("dir/a.xsl")), "dir/b.xsl");
        assert_eq!(resolve_uri("../b.xsl", Some("dir/sub/a.xsl")), "dir/b.xsl");
        assert_eq!(resolve_uri("./b.xsl", None), "b.xsl");
        assert_eq!(resolve_uri("/abs/b.xsl", Some("dir/a.xsl")), "/abs/b.xsl");
        assert_eq!(
            resolve_uri("b.xsl", Some("http://host/x/a.xsl")),
            "http://host/x/b.xsl"
        );
    }

    #[test]
    fn test_in_memory_loader() {
        let loader = InMemoryLoader::new().with_module("a.xsl", "<x/>");
        assert_eq!(loader.load("a.xsl").unwrap(), "<x/>");
        assert!(matches!(
            loader.load("missing.xsl"),
            Err(XsltError::Import { .. })
        ));
    }
}

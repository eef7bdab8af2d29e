//! Variable bindings visible during a transformation.
//!
//! Bindings live in one growable vector, split into frames. A frame pushed for a template
//! invocation is a barrier: lookups from inside it see only its own bindings and the
//! globals, never the caller's locals. Frames pushed for a template body or a `for-each`
//! iteration are transparent.

use quill_xpath1::{VariableScope, XPathValue};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy)]
struct Frame {
    start: usize,
    barrier: bool,
}

#[derive(Debug)]
pub struct ScopeStack<N> {
    /// Global variables and parameters, keyed by expanded name.
    pub globals: HashMap<String, XPathValue<N>>,
    bindings: Vec<(String, XPathValue<N>)>,
    frames: Vec<Frame>,
}

impl<N> Default for ScopeStack<N> {
    fn default() -> Self {
        Self {
            globals: HashMap::new(),
            bindings: Vec::new(),
            frames: Vec::new(),
        }
    }
}

impl<N: Clone> ScopeStack<N> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_frame(&mut self, barrier: bool) {
        self.frames.push(Frame {
            start: self.bindings.len(),
            barrier,
        });
    }

    /// Drops the innermost frame and every binding made inside it.
    pub fn pop_frame(&mut self) {
        if let Some(frame) = self.frames.pop() {
            self.bindings.truncate(frame.start);
        }
    }

    /// Binds `name` in the innermost frame. A later binding shadows an earlier one.
    pub fn bind(&mut self, name: String, value: XPathValue<N>) {
        self.bindings.push((name, value));
    }

    /// Number of live local bindings.
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn clear(&mut self) {
        self.bindings.clear();
        self.frames.clear();
    }

    fn visible_start(&self) -> usize {
        self.frames
            .iter()
            .rev()
            .find(|frame| frame.barrier)
            .map_or(0, |frame| frame.start)
    }
}

impl<N: Clone> VariableScope<N> for ScopeStack<N> {
    fn lookup(&self, name: &str) -> Option<XPathValue<N>> {
        self.bindings[self.visible_start()..]
            .iter()
            .rev()
            .find(|(bound, _)| bound == name)
            .map(|(_, value)| value.clone())
            .or_else(|| self.globals.get(name).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_xpath1::tests::MockNode;

    fn string(value: Option<XPathValue<MockNode<'static>>>) -> Option<String> {
        value.map(|v| match v {
            XPathValue::String(s) => s,
            other => panic!("unexpected {:?}", other),
        })
    }

    fn text(s: &str) -> XPathValue<MockNode<'static>> {
        XPathValue::String(s.to_string())
    }

    #[test]
    fn test_barrier_hides_caller_locals() {
        let mut scopes: ScopeStack<MockNode<'static>> = ScopeStack::new();
        scopes.globals.insert("g".to_string(), text("global"));
        scopes.push_frame(true);
        scopes.bind("x".to_string(), text("caller"));

        scopes.push_frame(true);
        assert_eq!(string(scopes.lookup("x")), None);
        assert_eq!(string(scopes.lookup("g")).as_deref(), Some("global"));
        scopes.bind("p".to_string(), text("param"));
        assert_eq!(string(scopes.lookup("p")).as_deref(), Some("param"));
        scopes.pop_frame();

        assert_eq!(string(scopes.lookup("x")).as_deref(), Some("caller"));
        assert_eq!(string(scopes.lookup("p")), None);
    }

    #[test]
    fn test_transparent_frames_and_shadowing() {
        let mut scopes: ScopeStack<MockNode<'static>> = ScopeStack::new();
        scopes.globals.insert("x".to_string(), text("global"));
        scopes.push_frame(true);
        scopes.bind("x".to_string(), text("outer"));
        scopes.push_frame(false);
        assert_eq!(string(scopes.lookup("x")).as_deref(), Some("outer"));
        scopes.bind("x".to_string(), text("inner"));
        assert_eq!(string(scopes.lookup("x")).as_deref(), Some("inner"));
        assert_eq!(scopes.len(), 2);
        scopes.pop_frame();
        assert_eq!(string(scopes.lookup("x")).as_deref(), Some("outer"));
        scopes.pop_frame();
        assert_eq!(string(scopes.lookup("x")).as_deref(), Some("global"));
        assert!(scopes.is_empty());
    }
}

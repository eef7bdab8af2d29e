//! Parsed form of XPath 1.0 expressions.

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal(String),
    Number(f64),
    LocationPath(LocationPath),
    Variable(String),
    FunctionCall {
        name: String,
        args: Vec<Expression>,
    },
    BinaryOp {
        left: Box<Expression>,
        op: BinaryOperator,
        right: Box<Expression>,
    },
    UnaryOp {
        op: UnaryOperator,
        expr: Box<Expression>,
    },
    /// A primary expression narrowed by predicates, like `$items[2]` or `(a|b)[last()]`.
    Filter {
        primary: Box<Expression>,
        predicates: Vec<Expression>,
    },
}

impl Expression {
    pub fn is_location_path(&self) -> bool {
        matches!(self, Expression::LocationPath(_))
    }

    pub fn is_binary_op(&self) -> bool {
        matches!(self, Expression::BinaryOp { .. })
    }

    /// Every `$name` in the expression, including inside predicates and arguments, in
    /// source order. Duplicates are kept.
    pub fn variable_references(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_variables(&mut names);
        names
    }

    fn collect_variables<'e>(&'e self, names: &mut Vec<&'e str>) {
        match self {
            Expression::Literal(_) | Expression::Number(_) => {}
            Expression::Variable(name) => names.push(name),
            Expression::LocationPath(path) => {
                if let Some(start) = &path.start_point {
                    start.collect_variables(names);
                }
                for step in &path.steps {
                    for predicate in &step.predicates {
                        predicate.collect_variables(names);
                    }
                }
            }
            Expression::FunctionCall { args, .. } => {
                for arg in args {
                    arg.collect_variables(names);
                }
            }
            Expression::BinaryOp { left, right, .. } => {
                left.collect_variables(names);
                right.collect_variables(names);
            }
            Expression::UnaryOp { expr, .. } => expr.collect_variables(names),
            Expression::Filter {
                primary,
                predicates,
            } => {
                primary.collect_variables(names);
                for predicate in predicates {
                    predicate.collect_variables(names);
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Minus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    // Logical
    Or,
    And,
    // Equality
    Equals,
    NotEquals,
    // Relational
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    // Additive
    Plus,
    Minus,
    // Multiplicative
    Multiply,
    Divide,
    Modulo,
    // Set
    Union,
}

/// `/a/b`, `descendant::x[1]`, `$var/item`, ...
#[derive(Debug, Clone, PartialEq)]
pub struct LocationPath {
    /// The filter expression a path like `$var/foo` or `key('k', 1)/foo` continues from.
    /// Without one the path starts at the context node, or at the root when absolute.
    pub start_point: Option<Box<Expression>>,
    /// Ignored when `start_point` is set.
    pub is_absolute: bool,
    pub steps: Vec<Step>,
}

/// `axis::test[predicate]...`
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub axis: Axis,
    pub node_test: NodeTest,
    pub predicates: Vec<Expression>,
}

impl Axis {
    /// Reverse axes number their nodes backwards from the context node.
    pub fn is_reverse(self) -> bool {
        matches!(
            self,
            Axis::Parent
                | Axis::Ancestor
                | Axis::AncestorOrSelf
                | Axis::PrecedingSibling
                | Axis::Preceding
        )
    }
}

/// The namespace axis is not supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Child,
    Descendant,
    DescendantOrSelf,
    Attribute,
    Parent,
    Ancestor,
    AncestorOrSelf,
    SelfAxis,
    FollowingSibling,
    PrecedingSibling,
    Following,
    Preceding,
}

/// What a step keeps from its axis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeTest {
    /// `foo` or `ns:foo`, as written.
    Name(String),
    /// `*`
    Wildcard,
    /// A wildcard restricted to one namespace (`svg:*`); holds the prefix.
    NamespaceWildcard(String),
    /// `processing-instruction('target')`.
    ProcessingInstructionTarget(String),
    /// `text()`, `comment()`, `node()` or `processing-instruction()`.
    NodeType(NodeTypeTest),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeTypeTest {
    Text,
    Node,
    Comment,
    ProcessingInstruction,
}

use serde::{Deserialize, Serialize};

use crate::diagnostics::SourceSpan;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Bool(bool),
    String(String),
    Nil,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Equal => "==",
            BinaryOp::NotEqual => "!=",
            BinaryOp::Less => "<",
            BinaryOp::LessEqual => "<=",
            BinaryOp::Greater => ">",
            BinaryOp::GreaterEqual => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Negate,
    Not,
}

/// One link in a chained access suffix: `.member`, `[index]`, or `(args)`.
/// A method call is a `Member` immediately followed by a `Call`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Accessor {
    Member(String),
    Index(Vec<Node>),
    Call(Vec<Vec<Node>>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TemplatePart {
    Text(String),
    Expr(Vec<Node>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub kind: NodeKind,
    pub span: SourceSpan,
}

impl Node {
    pub fn new(kind: NodeKind, span: SourceSpan) -> Self {
        Self { kind, span }
    }
}

/// The universal parse-tree unit. Statement variants come first, operand
/// variants after; an expression is a flat list of operand nodes with
/// `Operator` nodes between them, precedence left to the evaluator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NodeKind {
    Declare {
        name: String,
        mutable: bool,
        value: Vec<Node>,
    },
    Function {
        name: String,
        params: Vec<String>,
        body: Vec<Node>,
    },
    Define {
        name: String,
        body: Vec<Node>,
    },
    Assign {
        name: String,
        accessors: Vec<Accessor>,
        value: Vec<Node>,
    },
    Increment {
        name: String,
        accessors: Vec<Accessor>,
        negative: bool,
    },
    If {
        condition: Vec<Node>,
        then_branch: Vec<Node>,
        else_branch: Option<Vec<Node>>,
    },
    While {
        condition: Vec<Node>,
        body: Vec<Node>,
    },
    For {
        binding: String,
        iterable: Vec<Node>,
        body: Vec<Node>,
    },
    Return(Option<Vec<Node>>),
    Use {
        namespace: String,
        alias: Option<String>,
    },
    Namespace(String),
    Expression(Vec<Node>),

    Literal(Literal),
    Reference {
        name: String,
        accessors: Vec<Accessor>,
    },
    ListLiteral(Vec<Vec<Node>>),
    ArrayLiteral(Vec<(String, Vec<Node>)>),
    Lambda {
        params: Vec<String>,
        body: Vec<Node>,
    },
    Group(Vec<Node>),
    Template {
        parts: Vec<TemplatePart>,
        block: bool,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Node>,
    },
    Operator(BinaryOp),
}

/// Renders a statement list back to canonical source text. Re-parsing the
/// output yields an equivalent tree, and rendering is idempotent.
pub fn render(nodes: &[Node]) -> String {
    let mut out = String::new();
    render_block(nodes, 0, &mut out);
    out
}

/// Renders a flat expression back to source text, used when diagnostics
/// quote the offending expression.
pub fn expression_text(parts: &[Node]) -> String {
    let mut out = String::new();
    render_expression(parts, &mut out);
    out
}

fn indent(depth: usize, out: &mut String) {
    for _ in 0..depth {
        out.push_str("    ");
    }
}

fn render_block(nodes: &[Node], depth: usize, out: &mut String) {
    for node in nodes {
        indent(depth, out);
        render_statement(node, depth, out);
        out.push('\n');
    }
}

fn render_statement(node: &Node, depth: usize, out: &mut String) {
    match &node.kind {
        NodeKind::Declare {
            name,
            mutable,
            value,
        } => {
            out.push_str(if *mutable { "let " } else { "const " });
            out.push_str(name);
            out.push_str(" = ");
            render_expression(value, out);
            out.push(';');
        }
        NodeKind::Function { name, params, body } => {
            out.push_str("fn ");
            out.push_str(name);
            out.push('(');
            out.push_str(&params.join(", "));
            out.push_str(") ");
            render_braced(body, depth, out);
        }
        NodeKind::Define { name, body } => {
            out.push_str("define ");
            out.push_str(name);
            out.push(' ');
            render_braced(body, depth, out);
        }
        NodeKind::Assign {
            name,
            accessors,
            value,
        } => {
            out.push_str(name);
            render_accessors(accessors, out);
            out.push_str(" = ");
            render_expression(value, out);
            out.push(';');
        }
        NodeKind::Increment {
            name,
            accessors,
            negative,
        } => {
            out.push_str(name);
            render_accessors(accessors, out);
            out.push_str(if *negative { "--" } else { "++" });
            out.push(';');
        }
        NodeKind::If {
            condition,
            then_branch,
            else_branch,
        } => {
            out.push_str("if ");
            render_expression(condition, out);
            out.push(' ');
            render_braced(then_branch, depth, out);
            if let Some(else_branch) = else_branch {
                out.push_str(" else ");
                // `else if` keeps its chained form instead of nesting.
                if let [only] = else_branch.as_slice() {
                    if matches!(only.kind, NodeKind::If { .. }) {
                        render_statement(only, depth, out);
                        return;
                    }
                }
                render_braced(else_branch, depth, out);
            }
        }
        NodeKind::While { condition, body } => {
            out.push_str("while ");
            render_expression(condition, out);
            out.push(' ');
            render_braced(body, depth, out);
        }
        NodeKind::For {
            binding,
            iterable,
            body,
        } => {
            out.push_str("for ");
            out.push_str(binding);
            out.push_str(" in ");
            render_expression(iterable, out);
            out.push(' ');
            render_braced(body, depth, out);
        }
        NodeKind::Return(value) => {
            out.push_str("return");
            if let Some(value) = value {
                out.push(' ');
                render_expression(value, out);
            }
            out.push(';');
        }
        NodeKind::Use { namespace, alias } => {
            out.push_str("use ");
            out.push_str(namespace);
            if let Some(alias) = alias {
                out.push_str(" as ");
                out.push_str(alias);
            }
            out.push(';');
        }
        NodeKind::Namespace(name) => {
            out.push_str("namespace ");
            out.push_str(name);
            out.push(';');
        }
        NodeKind::Expression(parts) => {
            render_expression(parts, out);
            out.push(';');
        }
        other => {
            // A bare operand at statement position renders as an
            // expression statement.
            render_operand_kind(other, out);
            out.push(';');
        }
    }
}

fn render_braced(body: &[Node], depth: usize, out: &mut String) {
    if body.is_empty() {
        out.push_str("{}");
        return;
    }
    out.push_str("{\n");
    render_block(body, depth + 1, out);
    indent(depth, out);
    out.push('}');
}

fn render_expression(parts: &[Node], out: &mut String) {
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        render_operand_kind(&part.kind, out);
    }
}

fn render_operand_kind(kind: &NodeKind, out: &mut String) {
    match kind {
        NodeKind::Literal(literal) => render_literal(literal, out),
        NodeKind::Reference { name, accessors } => {
            out.push_str(name);
            render_accessors(accessors, out);
        }
        NodeKind::ListLiteral(elements) => {
            out.push('[');
            for (i, element) in elements.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                render_expression(element, out);
            }
            out.push(']');
        }
        NodeKind::ArrayLiteral(entries) => {
            out.push_str("array { ");
            for (i, (key, value)) in entries.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                render_array_key(key, out);
                out.push_str(": ");
                render_expression(value, out);
            }
            out.push_str(" }");
        }
        NodeKind::Lambda { params, body } => {
            out.push_str("fn(");
            out.push_str(&params.join(", "));
            out.push(')');
            // Single synthetic-return bodies render back in arrow form.
            if let [only] = body.as_slice() {
                if let NodeKind::Return(Some(value)) = &only.kind {
                    out.push_str(" => ");
                    render_expression(value, out);
                    return;
                }
            }
            out.push(' ');
            render_braced(body, 0, out);
        }
        NodeKind::Group(parts) => {
            out.push('(');
            render_expression(parts, out);
            out.push(')');
        }
        NodeKind::Template { parts, block } => {
            if *block {
                out.push_str("<>");
            } else {
                out.push('`');
            }
            for part in parts {
                match part {
                    TemplatePart::Text(text) => {
                        if *block {
                            out.push_str(text);
                        } else {
                            out.push_str(&text.replace('`', "\\`"));
                        }
                    }
                    TemplatePart::Expr(expr) => {
                        out.push_str("{{");
                        render_expression(expr, out);
                        out.push_str("}}");
                    }
                }
            }
            if *block {
                out.push_str("</>");
            } else {
                out.push('`');
            }
        }
        NodeKind::Unary { op, operand } => {
            out.push(match op {
                UnaryOp::Negate => '-',
                UnaryOp::Not => '!',
            });
            render_operand_kind(&operand.kind, out);
        }
        NodeKind::Operator(op) => out.push_str(op.symbol()),
        other => {
            // Statement kinds never appear at operand position, but the
            // match stays total for tooling that renders arbitrary nodes.
            let node = Node::new(other.clone(), SourceSpan::new(0, 0));
            render_statement(&node, 0, out);
        }
    }
}

fn render_accessors(accessors: &[Accessor], out: &mut String) {
    for accessor in accessors {
        match accessor {
            Accessor::Member(name) => {
                out.push('.');
                out.push_str(name);
            }
            Accessor::Index(index) => {
                out.push('[');
                render_expression(index, out);
                out.push(']');
            }
            Accessor::Call(args) => {
                out.push('(');
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    render_expression(arg, out);
                }
                out.push(')');
            }
        }
    }
}

fn render_array_key(key: &str, out: &mut String) {
    let plain = !key.is_empty()
        && key
            .chars()
            .next()
            .is_some_and(|c| c.is_alphabetic() || c == '_' || c == '$')
        && key
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '$');
    if plain {
        out.push_str(key);
    } else {
        out.push('"');
        out.push_str(&escape_string(key));
        out.push('"');
    }
}

fn render_literal(literal: &Literal, out: &mut String) {
    match literal {
        Literal::Int(value) => out.push_str(&value.to_string()),
        Literal::Float(value) => {
            let rendered = format!("{value}");
            out.push_str(&rendered);
            if !rendered.contains('.') {
                out.push_str(".0");
            }
        }
        Literal::Bool(value) => out.push_str(if *value { "true" } else { "false" }),
        Literal::String(value) => {
            out.push('"');
            out.push_str(&escape_string(value));
            out.push('"');
        }
        Literal::Nil => out.push_str("nil"),
    }
}

fn escape_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out
}

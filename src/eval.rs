use indexmap::IndexMap;

use crate::ast::{self, Accessor, BinaryOp, Literal, Node, NodeKind, TemplatePart, UnaryOp};
use crate::diagnostics::{Diagnostic, DiagnosticKind, OleanderError, Result, SourceSpan};
use crate::object::{Method, Object, ObjectKind};
use crate::runtime::{self, Executer};

/// Evaluates a flat operand/operator list to a single object. Precedence is
/// resolved here, not in the parser. An expression that is exactly one
/// operand short-circuits to a copy of that operand, which preserves
/// non-scalar results untouched by operator machinery.
pub fn evaluate(exec: &mut Executer, parts: &[Node]) -> Result<Object> {
    match evaluate_parts(exec, parts) {
        Err(OleanderError::Diagnostic(diagnostic))
            if diagnostic.kind == DiagnosticKind::Expression && diagnostic.notes.is_empty() =>
        {
            Err(diagnostic
                .with_note(format!("in expression `{}`", ast::expression_text(parts)))
                .into())
        }
        other => other,
    }
}

fn evaluate_parts(exec: &mut Executer, parts: &[Node]) -> Result<Object> {
    if parts.is_empty() {
        return Ok(Object::nil());
    }
    if let [single] = parts {
        if !matches!(single.kind, NodeKind::Operator(_)) {
            return Ok(resolve_operand(exec, single)?.copy());
        }
    }
    let mut cursor = Cursor { parts, pos: 0 };
    let result = binary(exec, &mut cursor, 0)?;
    if let Some(extra) = cursor.peek() {
        return Err(Diagnostic::expression("expected an operator between operands")
            .with_span(extra.span)
            .into());
    }
    Ok(result)
}

struct Cursor<'a> {
    parts: &'a [Node],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn peek(&self) -> Option<&'a Node> {
        self.parts.get(self.pos)
    }

    fn peek_operator(&self) -> Option<(BinaryOp, SourceSpan)> {
        match self.peek() {
            Some(Node {
                kind: NodeKind::Operator(op),
                span,
            }) => Some((*op, *span)),
            _ => None,
        }
    }

    fn advance(&mut self) {
        self.pos += 1;
    }
}

fn binding_power(op: BinaryOp) -> u8 {
    match op {
        BinaryOp::Or => 1,
        BinaryOp::And => 2,
        BinaryOp::Equal | BinaryOp::NotEqual => 3,
        BinaryOp::Less | BinaryOp::LessEqual | BinaryOp::Greater | BinaryOp::GreaterEqual => 4,
        BinaryOp::Add | BinaryOp::Sub => 5,
        BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => 6,
    }
}

fn binary(exec: &mut Executer, cursor: &mut Cursor<'_>, min_bp: u8) -> Result<Object> {
    let first = cursor.peek().ok_or_else(|| {
        Diagnostic::expression("expected an operand")
            .with_span(SourceSpan::new(0, 0))
    })?;
    if matches!(first.kind, NodeKind::Operator(_)) {
        return Err(Diagnostic::expression(format!(
            "misplaced operator `{}`",
            ast::expression_text(std::slice::from_ref(first))
        ))
        .with_span(first.span)
        .into());
    }
    let mut left = resolve_operand(exec, first)?;
    cursor.advance();
    while let Some((op, span)) = cursor.peek_operator() {
        let bp = binding_power(op);
        if bp < min_bp {
            break;
        }
        cursor.advance();
        match op {
            BinaryOp::And | BinaryOp::Or => {
                let lhs = left.expect_bool(&format!("left operand of `{}`", symbol(op)))
                    .map_err(|diagnostic| diagnostic.with_span(span))?;
                // Short-circuit: the right-hand side is skipped structurally
                // without evaluation, so its calls never run.
                if (op == BinaryOp::And && !lhs) || (op == BinaryOp::Or && lhs) {
                    skip_binary(cursor, bp + 1);
                    left = Object::bool(lhs);
                } else {
                    let right = binary(exec, cursor, bp + 1)?;
                    let rhs = right
                        .expect_bool(&format!("right operand of `{}`", symbol(op)))
                        .map_err(|diagnostic| diagnostic.with_span(span))?;
                    left = Object::bool(rhs);
                }
            }
            _ => {
                let right = binary(exec, cursor, bp + 1)?;
                left = apply_binary(op, &left, &right, span)?;
            }
        }
    }
    Ok(left)
}

fn skip_binary(cursor: &mut Cursor<'_>, min_bp: u8) {
    // Operands occupy exactly one node in the flat list, so skipping is a
    // cursor walk with the same precedence climb as evaluation.
    cursor.advance();
    while let Some((op, _)) = cursor.peek_operator() {
        if binding_power(op) < min_bp {
            break;
        }
        cursor.advance();
        cursor.advance();
    }
}

fn symbol(op: BinaryOp) -> &'static str {
    op.symbol()
}

fn apply_binary(op: BinaryOp, left: &Object, right: &Object, span: SourceSpan) -> Result<Object> {
    match op {
        BinaryOp::Equal => Ok(Object::bool(left.deep_eq(right))),
        BinaryOp::NotEqual => Ok(Object::bool(!left.deep_eq(right))),
        BinaryOp::Add => {
            if matches!(left.kind(), ObjectKind::String(_))
                || matches!(right.kind(), ObjectKind::String(_))
            {
                return Ok(Object::string(format!("{left}{right}")));
            }
            numeric(op, left, right, span)
        }
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => numeric(op, left, right, span),
        BinaryOp::Mod => match (left.kind(), right.kind()) {
            (ObjectKind::Int(_), ObjectKind::Int(0)) => {
                Err(Diagnostic::expression("division by zero").with_span(span).into())
            }
            (ObjectKind::Int(a), ObjectKind::Int(b)) => Ok(Object::int(a % b)),
            _ => Err(Diagnostic::type_error(format!(
                "operator `%` expects Integer operands, found {} and {}",
                left.type_name(),
                right.type_name()
            ))
            .with_span(span)
            .into()),
        },
        BinaryOp::Less | BinaryOp::LessEqual | BinaryOp::Greater | BinaryOp::GreaterEqual => {
            compare(op, left, right, span)
        }
        BinaryOp::And | BinaryOp::Or => unreachable!("logical operators are short-circuited"),
    }
}

fn numeric(op: BinaryOp, left: &Object, right: &Object, span: SourceSpan) -> Result<Object> {
    let (Some(a), Some(b)) = (left.number(), right.number()) else {
        return Err(Diagnostic::type_error(format!(
            "operator `{}` expects numeric operands, found {} and {}",
            symbol(op),
            left.type_name(),
            right.type_name()
        ))
        .with_span(span)
        .into());
    };
    if op == BinaryOp::Div && matches!(right.kind(), ObjectKind::Int(0)) {
        return Err(Diagnostic::expression("division by zero")
            .with_span(span)
            .into());
    }
    let result = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
        _ => unreachable!("non-arithmetic operator in numeric()"),
    };
    Ok(normalize(result))
}

/// Float results with no fractional part normalize back to Integer, so
/// `7 / 2` stays `3.5` but `6 / 2` is `3`.
fn normalize(value: f64) -> Object {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        Object::int(value as i64)
    } else {
        Object::float(value)
    }
}

fn compare(op: BinaryOp, left: &Object, right: &Object, span: SourceSpan) -> Result<Object> {
    let ordering = match (left.kind(), right.kind()) {
        (ObjectKind::String(a), ObjectKind::String(b)) => a.cmp(b),
        _ => match (left.number(), right.number()) {
            (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(std::cmp::Ordering::Equal),
            _ => {
                return Err(Diagnostic::type_error(format!(
                    "operator `{}` cannot compare {} and {}",
                    symbol(op),
                    left.type_name(),
                    right.type_name()
                ))
                .with_span(span)
                .into());
            }
        },
    };
    let result = match op {
        BinaryOp::Less => ordering.is_lt(),
        BinaryOp::LessEqual => ordering.is_le(),
        BinaryOp::Greater => ordering.is_gt(),
        BinaryOp::GreaterEqual => ordering.is_ge(),
        _ => unreachable!("non-comparison operator in compare()"),
    };
    Ok(Object::bool(result))
}

/// Resolves a single operand node to an object. Accessor chains, calls
/// included, are applied here.
pub(crate) fn resolve_operand(exec: &mut Executer, node: &Node) -> Result<Object> {
    match &node.kind {
        NodeKind::Literal(literal) => Ok(literal_object(literal)),
        NodeKind::Reference { name, accessors } => {
            resolve_reference(exec, name, accessors, node.span)
        }
        NodeKind::Group(parts) => evaluate(exec, parts),
        NodeKind::ListLiteral(elements) => {
            let mut items = Vec::with_capacity(elements.len());
            for element in elements {
                items.push(evaluate(exec, element)?);
            }
            Ok(Object::list(items))
        }
        NodeKind::ArrayLiteral(entries) => {
            let mut table = IndexMap::with_capacity(entries.len());
            for (key, value) in entries {
                let mut value = evaluate(exec, value)?;
                value.rename(key);
                table.insert(key.clone(), value);
            }
            Ok(Object::array(table))
        }
        NodeKind::Lambda { params, body } => {
            let method = Method::user("fn", params.clone(), body.clone(), exec.scope.clone());
            Ok(Object::function("fn", method))
        }
        NodeKind::Template { parts, .. } => {
            let mut rendered = String::new();
            for part in parts {
                match part {
                    TemplatePart::Text(text) => rendered.push_str(text),
                    TemplatePart::Expr(expr) => {
                        rendered.push_str(&evaluate(exec, expr)?.to_string())
                    }
                }
            }
            Ok(Object::string(rendered))
        }
        NodeKind::Unary { op, operand } => {
            let value = resolve_operand(exec, operand)?;
            apply_unary(*op, &value, node.span)
        }
        NodeKind::Operator(op) => Err(Diagnostic::expression(format!(
            "misplaced operator `{}`",
            op.symbol()
        ))
        .with_span(node.span)
        .into()),
        _ => Err(Diagnostic::expression("expected an operand")
            .with_span(node.span)
            .into()),
    }
}

fn literal_object(literal: &Literal) -> Object {
    match literal {
        Literal::Int(value) => Object::int(*value),
        Literal::Float(value) => Object::float(*value),
        Literal::Bool(value) => Object::bool(*value),
        Literal::String(value) => Object::string(value.clone()),
        Literal::Nil => Object::nil(),
    }
}

fn apply_unary(op: UnaryOp, value: &Object, span: SourceSpan) -> Result<Object> {
    match (op, value.kind()) {
        (UnaryOp::Negate, ObjectKind::Int(n)) => Ok(Object::int(-n)),
        (UnaryOp::Negate, ObjectKind::Float(n)) => Ok(Object::float(-n)),
        (UnaryOp::Not, ObjectKind::Bool(b)) => Ok(Object::bool(!b)),
        (UnaryOp::Negate, _) => Err(Diagnostic::type_error(format!(
            "operator `-` expects a numeric operand, found {}",
            value.type_name()
        ))
        .with_span(span)
        .into()),
        (UnaryOp::Not, _) => Err(Diagnostic::type_error(format!(
            "operator `!` expects a Bool operand, found {}",
            value.type_name()
        ))
        .with_span(span)
        .into()),
    }
}

/// Resolves a named reference and its accessor chain. Namespace aliases
/// take priority, then ordinary scope lookup; `this` is just a binding.
pub(crate) fn resolve_reference(
    exec: &mut Executer,
    name: &str,
    accessors: &[Accessor],
    span: SourceSpan,
) -> Result<Object> {
    if let Some(ns_name) = exec.scope.resolve_alias(name) {
        let namespace = exec.runtime.get_namespace(&ns_name);
        let Some(Accessor::Member(member)) = accessors.first() else {
            return Err(Diagnostic::resolution(format!(
                "namespace alias `{name}` cannot be used as a value"
            ))
            .with_span(span)
            .into());
        };
        if let Some(Accessor::Call(arg_lists)) = accessors.get(1) {
            if let Some(method) = namespace.function_local(member) {
                let args = evaluate_args(exec, arg_lists)?;
                let result = method.call(&exec.runtime.clone(), args)?;
                return apply_accessors(exec, result, &accessors[2..], span);
            }
        }
        let object = namespace.member(member).ok_or_else(|| {
            Diagnostic::resolution(format!("namespace `{ns_name}` has no member `{member}`"))
                .with_span(span)
        })?;
        return apply_accessors(exec, object, &accessors[1..], span);
    }
    match exec.scope.lookup(name) {
        Some(object) => apply_accessors(exec, object, accessors, span),
        None => {
            let diagnostic = match accessors.first() {
                Some(Accessor::Call(_)) => {
                    Diagnostic::resolution(format!("unknown function `{name}`"))
                }
                _ => Diagnostic::declaration(format!("undeclared variable `{name}`")),
            };
            Err(diagnostic.with_span(span).into())
        }
    }
}

/// Walks an accessor chain left to right. A `Member` directly followed by
/// a `Call` is a method invocation; anything else is a plain read.
pub(crate) fn apply_accessors(
    exec: &mut Executer,
    mut current: Object,
    accessors: &[Accessor],
    span: SourceSpan,
) -> Result<Object> {
    let mut index = 0;
    while index < accessors.len() {
        match &accessors[index] {
            Accessor::Member(member) => {
                if let Some(Accessor::Call(arg_lists)) = accessors.get(index + 1) {
                    let method = lookup_method(&current, member).ok_or_else(|| {
                        Diagnostic::resolution(format!(
                            "unknown method `{member}` on {}",
                            current.type_name()
                        ))
                        .with_span(span)
                    })?;
                    let args = evaluate_args(exec, arg_lists)?;
                    current = method.call(&exec.runtime.clone(), args)?;
                    index += 2;
                } else {
                    current = current.variable(member).ok_or_else(|| {
                        Diagnostic::resolution(format!(
                            "unknown member `{member}` on {}",
                            current.type_name()
                        ))
                        .with_span(span)
                    })?;
                    index += 1;
                }
            }
            Accessor::Index(index_nodes) => {
                let key = evaluate(exec, index_nodes)?;
                current = index_value(&current, &key, span)?;
                index += 1;
            }
            Accessor::Call(arg_lists) => {
                let args = evaluate_args(exec, arg_lists)?;
                current = call_value(exec, &current, args, span)?;
                index += 1;
            }
        }
    }
    Ok(current)
}

fn lookup_method(object: &Object, name: &str) -> Option<Method> {
    if let Some(method) = object.method(name) {
        return Some(method);
    }
    match object.variable(name)?.kind() {
        ObjectKind::Fn(method) => Some(method.as_ref().clone()),
        _ => None,
    }
}

fn evaluate_args(exec: &mut Executer, arg_lists: &[Vec<Node>]) -> Result<Vec<Object>> {
    let mut args = Vec::with_capacity(arg_lists.len());
    for nodes in arg_lists {
        args.push(evaluate(exec, nodes)?);
    }
    Ok(args)
}

fn call_value(
    exec: &mut Executer,
    callee: &Object,
    args: Vec<Object>,
    span: SourceSpan,
) -> Result<Object> {
    match callee.kind() {
        ObjectKind::Fn(method) => method.call(&exec.runtime.clone(), args),
        ObjectKind::Definition(definition) => {
            runtime::instantiate(&exec.runtime.clone(), definition, args, span)
        }
        _ => Err(Diagnostic::type_error(format!(
            "value of type {} is not callable",
            callee.type_name()
        ))
        .with_span(span)
        .into()),
    }
}

fn index_value(current: &Object, key: &Object, span: SourceSpan) -> Result<Object> {
    match (current.kind(), key.kind()) {
        (ObjectKind::List(items), ObjectKind::Int(n)) => {
            let items = items.read().expect("list lock poisoned");
            usize::try_from(*n)
                .ok()
                .and_then(|idx| items.get(idx).cloned())
                .ok_or_else(|| {
                    Diagnostic::resolution(format!(
                        "index {n} out of bounds for list of length {}",
                        items.len()
                    ))
                    .with_span(span)
                    .into()
                })
        }
        (ObjectKind::String(text), ObjectKind::Int(n)) => usize::try_from(*n)
            .ok()
            .and_then(|idx| text.chars().nth(idx))
            .map(|ch| Object::string(ch.to_string()))
            .ok_or_else(|| {
                Diagnostic::resolution(format!(
                    "index {n} out of bounds for string of length {}",
                    text.chars().count()
                ))
                .with_span(span)
                .into()
            }),
        (ObjectKind::Array(entries), _) => {
            let lookup = array_key(key).ok_or_else(|| {
                Diagnostic::type_error(format!(
                    "array keys must be String or Integer, found {}",
                    key.type_name()
                ))
                .with_span(span)
            })?;
            entries
                .read()
                .expect("array lock poisoned")
                .get(&lookup)
                .cloned()
                .ok_or_else(|| {
                    Diagnostic::resolution(format!("unknown key `{lookup}`"))
                        .with_span(span)
                        .into()
                })
        }
        (ObjectKind::List(_), _) | (ObjectKind::String(_), _) => {
            Err(Diagnostic::type_error(format!(
                "index must be an Integer, found {}",
                key.type_name()
            ))
            .with_span(span)
            .into())
        }
        _ => Err(Diagnostic::type_error(format!(
            "cannot index into {}",
            current.type_name()
        ))
        .with_span(span)
        .into()),
    }
}

pub(crate) fn array_key(key: &Object) -> Option<String> {
    match key.kind() {
        ObjectKind::String(text) => Some(text.clone()),
        ObjectKind::Int(n) => Some(n.to_string()),
        _ => None,
    }
}

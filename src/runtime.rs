use std::sync::{Arc, RwLock};

use indexmap::IndexMap;

use crate::ast::{Accessor, Node, NodeKind};
use crate::diagnostics::{Diagnostic, Result, SourceSpan};
use crate::eval;
use crate::object::{DefinitionValue, Method, MethodBody, Object, ObjectKind};
use crate::parser::parse_source;
use crate::scope::{Scope, ScopeKind, ScopeRef};
use crate::stdlib;

/// Host extension point. Binding a module merges its objects and methods
/// into the named namespace, where scripts reach them with `use`.
pub trait Module {
    fn namespace(&self) -> &str;

    fn objects(&self) -> IndexMap<String, Object> {
        IndexMap::new()
    }

    fn methods(&self) -> IndexMap<String, Method> {
        IndexMap::new()
    }
}

struct RuntimeInner {
    globals: ScopeRef,
    namespaces: RwLock<IndexMap<String, ScopeRef>>,
}

/// The shared interpreter state: the prelude root scope and the namespace
/// registry. Cloning is cheap and every clone sees the same state, which is
/// what lets spawned tasks keep working against the same scope graph.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl Runtime {
    pub fn new() -> Self {
        let runtime = Self {
            inner: Arc::new(RuntimeInner {
                globals: Scope::global("global"),
                namespaces: RwLock::new(IndexMap::new()),
            }),
        };
        stdlib::install(&runtime);
        runtime
    }

    pub fn globals(&self) -> ScopeRef {
        Arc::clone(&self.inner.globals)
    }

    /// Resolves a namespace root scope, creating it on first access.
    pub fn get_namespace(&self, name: &str) -> ScopeRef {
        if let Some(scope) = self
            .inner
            .namespaces
            .read()
            .expect("namespace registry poisoned")
            .get(name)
        {
            return Arc::clone(scope);
        }
        let mut namespaces = self
            .inner
            .namespaces
            .write()
            .expect("namespace registry poisoned");
        Arc::clone(namespaces.entry(name.to_string()).or_insert_with(|| {
            tracing::debug!(namespace = name, "creating namespace");
            Scope::child(&self.inner.globals, name, ScopeKind::Global)
        }))
    }

    pub fn bind_module(&self, module: &dyn Module) {
        let scope = self.get_namespace(module.namespace());
        let objects = module.objects();
        let methods = module.methods();
        tracing::debug!(
            namespace = module.namespace(),
            objects = objects.len(),
            methods = methods.len(),
            "binding module"
        );
        for (name, mut object) in objects {
            object.rename(&name);
            object.immute();
            scope.bind(&name, object);
        }
        for (name, method) in methods {
            scope.bind_function(&name, method);
        }
    }

    /// Executes a parsed program in a fresh File scope under the prelude.
    /// Returns the value of a top-level `return` or the last expression
    /// statement.
    pub fn execute(&self, nodes: &[Node]) -> Result<Option<Object>> {
        let scope = Scope::child(&self.inner.globals, "file", ScopeKind::File);
        self.execute_in(&scope, nodes)
    }

    /// Executes a parsed program into an existing scope, so callers like
    /// the REPL can carry bindings across programs. A leading `namespace`
    /// statement still routes the whole program into that namespace's root
    /// scope instead.
    pub fn execute_in(&self, scope: &ScopeRef, nodes: &[Node]) -> Result<Option<Object>> {
        let (scope, body) = if let Some(Node {
            kind: NodeKind::Namespace(name),
            ..
        }) = nodes.first()
        {
            (self.get_namespace(name), &nodes[1..])
        } else {
            (Arc::clone(scope), nodes)
        };
        tracing::debug!(
            statements = body.len(),
            scope = scope.name(),
            "executing program"
        );
        Executer::new(self.clone(), scope).run(body)
    }

    pub fn eval_source(&self, source: &str) -> Result<Option<Object>> {
        let nodes = parse_source(source)?;
        self.execute(&nodes)
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

/// How a statement hands control back to its enclosing body.
pub(crate) enum Flow {
    Next,
    /// An expression statement's value; the last one becomes the body result.
    Value(Object),
    /// A `return`, unwinding until a function or file boundary absorbs it.
    Return(Object),
}

impl Method {
    /// Invokes the method. User methods run in a fresh Function scope under
    /// their declaring scope; natives dispatch straight to the host callback.
    pub fn call(&self, runtime: &Runtime, args: Vec<Object>) -> Result<Object> {
        match &self.body {
            MethodBody::Native(native) => {
                if let Some(arity) = native.arity {
                    if args.len() != arity {
                        return Err(Diagnostic::type_error(format!(
                            "`{}` expected {arity} argument{}, got {}",
                            self.name,
                            if arity == 1 { "" } else { "s" },
                            args.len()
                        ))
                        .into());
                    }
                }
                (native.callback)(runtime, &args)
            }
            MethodBody::User { nodes, scope } => {
                if args.len() != self.params.len() {
                    return Err(Diagnostic::type_error(format!(
                        "function `{}` expected {} argument{}, got {}",
                        self.name,
                        self.params.len(),
                        if self.params.len() == 1 { "" } else { "s" },
                        args.len()
                    ))
                    .into());
                }
                tracing::trace!(method = %self.name, "calling user function");
                let child = Scope::child(scope, &self.name, ScopeKind::Function);
                let mut args = args.into_iter();
                for param in &self.params {
                    let mut value = args.next().unwrap_or_else(Object::nil);
                    value.rename(param);
                    child.declare(param, value)?;
                }
                let mut executer = Executer::new(runtime.clone(), child);
                let mut result = Object::nil();
                for node in nodes {
                    match executer.statement(node)? {
                        Flow::Next => {}
                        Flow::Value(value) => result = value,
                        Flow::Return(value) => return Ok(value),
                    }
                }
                Ok(result)
            }
        }
    }
}

/// Materializes a definition: its body runs into a fresh Definition scope,
/// `this` is sealed into that scope, and the synthesized `$init` runs the
/// `construct` method when one was declared.
pub(crate) fn instantiate(
    runtime: &Runtime,
    definition: &Arc<DefinitionValue>,
    args: Vec<Object>,
    span: SourceSpan,
) -> Result<Object> {
    let scope = Scope::child(&definition.declaring, &definition.name, ScopeKind::Definition);
    let mut executer = Executer::new(runtime.clone(), Arc::clone(&scope));
    for node in &definition.body {
        match executer.statement(node)? {
            Flow::Next | Flow::Value(_) => {}
            Flow::Return(_) => {
                return Err(Diagnostic::syntax("`return` is not allowed in a define body")
                    .with_span(node.span)
                    .into());
            }
        }
    }
    let instance = Object::instance(Arc::clone(definition), Arc::clone(&scope));
    let mut this = instance.clone();
    this.rename("this");
    this.immute();
    scope
        .declare("this", this)
        .map_err(|diagnostic| diagnostic.with_span(span))?;
    match instance.method("$init") {
        Some(init) => init.call(runtime, args),
        None => Ok(instance),
    }
}

/// The statement walker. One executer owns a cursor into the scope tree;
/// braced bodies push a child scope for their duration and pop it on the
/// way out, error or not.
pub struct Executer {
    pub(crate) runtime: Runtime,
    pub(crate) scope: ScopeRef,
}

impl Executer {
    pub fn new(runtime: Runtime, scope: ScopeRef) -> Self {
        Self { runtime, scope }
    }

    pub fn run(&mut self, nodes: &[Node]) -> Result<Option<Object>> {
        let mut last = None;
        for node in nodes {
            match self.statement(node)? {
                Flow::Next => {}
                Flow::Value(value) => last = Some(value),
                Flow::Return(value) => return Ok(Some(value)),
            }
        }
        Ok(last)
    }

    pub(crate) fn statement(&mut self, node: &Node) -> Result<Flow> {
        match &node.kind {
            NodeKind::Declare {
                name,
                mutable,
                value,
            } => {
                let mut object = eval::evaluate(self, value)?;
                object.rename(name);
                if !mutable {
                    object.immute();
                }
                self.scope
                    .declare(name, object)
                    .map_err(|diagnostic| diagnostic.with_span(node.span))?;
                Ok(Flow::Next)
            }
            NodeKind::Function { name, params, body } => {
                let method =
                    Method::user(name, params.clone(), body.clone(), Arc::clone(&self.scope));
                self.scope
                    .declare_function(name, method)
                    .map_err(|diagnostic| diagnostic.with_span(node.span))?;
                Ok(Flow::Next)
            }
            NodeKind::Define { name, body } => {
                let object = Object::definition(name, body.clone(), Arc::clone(&self.scope));
                self.scope
                    .declare(name, object)
                    .map_err(|diagnostic| diagnostic.with_span(node.span))?;
                Ok(Flow::Next)
            }
            NodeKind::Assign {
                name,
                accessors,
                value,
            } => {
                let object = eval::evaluate(self, value)?;
                self.assign_path(name, accessors, object, node.span)?;
                Ok(Flow::Next)
            }
            NodeKind::Increment {
                name,
                accessors,
                negative,
            } => {
                let current = eval::resolve_reference(self, name, accessors, node.span)?;
                let ObjectKind::Int(n) = current.kind() else {
                    return Err(Diagnostic::type_error(format!(
                        "increment target must be an Integer, found {}",
                        current.type_name()
                    ))
                    .with_span(node.span)
                    .into());
                };
                let next = Object::int(if *negative { n - 1 } else { n + 1 });
                self.assign_path(name, accessors, next, node.span)?;
                Ok(Flow::Next)
            }
            NodeKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                let value = eval::evaluate(self, condition)?;
                let truth = value
                    .expect_bool("`if` condition")
                    .map_err(|diagnostic| diagnostic.with_span(expression_span(condition, node)))?;
                if truth {
                    self.block(then_branch, "if")
                } else if let Some(else_branch) = else_branch {
                    self.block(else_branch, "else")
                } else {
                    Ok(Flow::Next)
                }
            }
            NodeKind::While { condition, body } => {
                loop {
                    let value = eval::evaluate(self, condition)?;
                    let truth = value.expect_bool("`while` condition").map_err(|diagnostic| {
                        diagnostic.with_span(expression_span(condition, node))
                    })?;
                    if !truth {
                        break;
                    }
                    match self.block(body, "while")? {
                        Flow::Next | Flow::Value(_) => {}
                        flow @ Flow::Return(_) => return Ok(flow),
                    }
                }
                Ok(Flow::Next)
            }
            NodeKind::For {
                binding,
                iterable,
                body,
            } => {
                let source = eval::evaluate(self, iterable)?;
                for item in self.iterate(&source, expression_span(iterable, node))? {
                    let child = Scope::child(&self.scope, "for", ScopeKind::Block);
                    let mut item = item;
                    item.rename(binding);
                    child
                        .declare(binding, item)
                        .map_err(|diagnostic| diagnostic.with_span(node.span))?;
                    match self.run_in(child, body)? {
                        Flow::Next | Flow::Value(_) => {}
                        flow @ Flow::Return(_) => return Ok(flow),
                    }
                }
                Ok(Flow::Next)
            }
            NodeKind::Return(value) => {
                let object = match value {
                    Some(parts) => eval::evaluate(self, parts)?,
                    None => Object::nil(),
                };
                Ok(Flow::Return(object))
            }
            NodeKind::Use { namespace, alias } => {
                self.runtime.get_namespace(namespace);
                let alias = alias.as_deref().unwrap_or(namespace);
                self.scope
                    .register_alias(alias, namespace)
                    .map_err(|diagnostic| diagnostic.with_span(node.span))?;
                Ok(Flow::Next)
            }
            NodeKind::Namespace(_) => Err(Diagnostic::syntax(
                "`namespace` must be the first statement in a file",
            )
            .with_span(node.span)
            .into()),
            NodeKind::Expression(parts) => Ok(Flow::Value(eval::evaluate(self, parts)?)),
            _ => {
                // A bare operand at statement position evaluates as an
                // expression statement.
                Ok(Flow::Value(eval::resolve_operand(self, node)?))
            }
        }
    }

    fn block(&mut self, nodes: &[Node], name: &str) -> Result<Flow> {
        let child = Scope::child(&self.scope, name, ScopeKind::Block);
        self.run_in(child, nodes)
    }

    fn run_in(&mut self, scope: ScopeRef, nodes: &[Node]) -> Result<Flow> {
        let previous = std::mem::replace(&mut self.scope, scope);
        let mut last = Flow::Next;
        for node in nodes {
            match self.statement(node) {
                Ok(Flow::Next) => {}
                Ok(Flow::Value(value)) => last = Flow::Value(value),
                Ok(flow) => {
                    self.scope = previous;
                    return Ok(flow);
                }
                Err(err) => {
                    self.scope = previous;
                    return Err(err);
                }
            }
        }
        self.scope = previous;
        Ok(last)
    }

    /// Assignment to a plain name or a dotted/indexed path. Path prefixes
    /// resolve through namespace aliases first, then ordinary lookup
    /// (`this` is an ordinary binding inside definition scopes).
    fn assign_path(
        &mut self,
        name: &str,
        accessors: &[Accessor],
        value: Object,
        span: SourceSpan,
    ) -> Result<()> {
        if accessors.is_empty() {
            let mut value = value;
            value.rename(name);
            return self
                .scope
                .assign(name, value)
                .map_err(|diagnostic| diagnostic.with_span(span).into());
        }
        let (current, consumed) = if let Some(ns_name) = self.scope.resolve_alias(name) {
            let namespace = self.runtime.get_namespace(&ns_name);
            match accessors.first() {
                Some(Accessor::Member(member)) if accessors.len() == 1 => {
                    let mut value = value;
                    value.rename(member);
                    return namespace
                        .assign_local(member, value)
                        .map_err(|diagnostic| diagnostic.with_span(span).into());
                }
                Some(Accessor::Member(member)) => {
                    let object = namespace.member(member).ok_or_else(|| {
                        Diagnostic::resolution(format!(
                            "namespace `{ns_name}` has no member `{member}`"
                        ))
                        .with_span(span)
                    })?;
                    (object, 1)
                }
                _ => {
                    return Err(Diagnostic::resolution(format!(
                        "namespace alias `{name}` cannot be indexed"
                    ))
                    .with_span(span)
                    .into());
                }
            }
        } else {
            let object = self.scope.lookup(name).ok_or_else(|| {
                Diagnostic::declaration(format!("undeclared variable `{name}`")).with_span(span)
            })?;
            (object, 0)
        };
        let rest = &accessors[consumed..];
        let Some((last, walk)) = rest.split_last() else {
            return Ok(());
        };
        let target = eval::apply_accessors(self, current, walk, span)?;
        match last {
            Accessor::Member(member) => target
                .set_variable(member, value)
                .map_err(|diagnostic| diagnostic.with_span(span).into()),
            Accessor::Index(index_nodes) => self.set_index(&target, index_nodes, value, span),
            Accessor::Call(_) => Err(Diagnostic::type_error("cannot assign to a call result")
                .with_span(span)
                .into()),
        }
    }

    fn set_index(
        &mut self,
        target: &Object,
        index_nodes: &[Node],
        value: Object,
        span: SourceSpan,
    ) -> Result<()> {
        let index = eval::evaluate(self, index_nodes)?;
        match (target.kind(), index.kind()) {
            (ObjectKind::List(items), ObjectKind::Int(n)) => {
                if !target.is_mutable() {
                    return Err(Diagnostic::declaration(
                        "cannot assign into an immutable list",
                    )
                    .with_span(span)
                    .into());
                }
                let mut items = items.write().expect("list lock poisoned");
                let len = items.len();
                let slot = usize::try_from(*n)
                    .ok()
                    .filter(|idx| *idx < len)
                    .ok_or_else(|| {
                        Diagnostic::resolution(format!(
                            "index {n} out of bounds for list of length {len}"
                        ))
                        .with_span(span)
                    })?;
                items[slot] = value;
                Ok(())
            }
            (ObjectKind::Array(entries), _) => {
                if !target.is_mutable() {
                    return Err(Diagnostic::declaration(
                        "cannot assign into an immutable array",
                    )
                    .with_span(span)
                    .into());
                }
                let key = eval::array_key(&index).ok_or_else(|| {
                    Diagnostic::type_error(format!(
                        "array keys must be String or Integer, found {}",
                        index.type_name()
                    ))
                    .with_span(span)
                })?;
                let mut value = value;
                value.rename(&key);
                entries
                    .write()
                    .expect("array lock poisoned")
                    .insert(key, value);
                Ok(())
            }
            (ObjectKind::List(_), _) => Err(Diagnostic::type_error(format!(
                "list index must be an Integer, found {}",
                index.type_name()
            ))
            .with_span(span)
            .into()),
            _ => Err(Diagnostic::type_error(format!(
                "cannot index into {}",
                target.type_name()
            ))
            .with_span(span)
            .into()),
        }
    }

    fn iterate(&self, object: &Object, span: SourceSpan) -> Result<Vec<Object>> {
        match object.kind() {
            ObjectKind::List(items) => Ok(items.read().expect("list lock poisoned").clone()),
            ObjectKind::Array(entries) => Ok(entries
                .read()
                .expect("array lock poisoned")
                .iter()
                .map(|(key, value)| Object::list(vec![Object::string(key.clone()), value.clone()]))
                .collect()),
            ObjectKind::String(text) => Ok(text
                .chars()
                .map(|ch| Object::string(ch.to_string()))
                .collect()),
            _ => Err(Diagnostic::type_error(format!(
                "value of type {} is not iterable",
                object.type_name()
            ))
            .with_span(span)
            .into()),
        }
    }
}

fn expression_span(parts: &[Node], fallback: &Node) -> SourceSpan {
    parts.first().map(|node| node.span).unwrap_or(fallback.span)
}

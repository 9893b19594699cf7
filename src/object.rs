use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use indexmap::IndexMap;

use crate::ast::Node;
use crate::diagnostics::{Diagnostic, Result};
use crate::runtime::Runtime;
use crate::scope::ScopeRef;

static NEXT_ADDR: AtomicU64 = AtomicU64::new(1);

fn next_addr() -> u64 {
    NEXT_ADDR.fetch_add(1, Ordering::Relaxed)
}

/// A runtime value. Every object carries a binding name, a mutability flag,
/// and an opaque identity (`$addr`) assigned at creation. Value variants get
/// a fresh identity on `copy`; definitions, instances, functions, and
/// streams keep theirs (reference semantics).
#[derive(Clone)]
pub struct Object {
    name: String,
    mutable: bool,
    addr: u64,
    kind: ObjectKind,
}

#[derive(Clone)]
pub enum ObjectKind {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Nil,
    List(Arc<RwLock<Vec<Object>>>),
    Array(Arc<RwLock<IndexMap<String, Object>>>),
    Definition(Arc<DefinitionValue>),
    Instance(Arc<InstanceValue>),
    Fn(Arc<Method>),
    Stream(Arc<dyn Stream>),
}

/// A parsed `define` block: a template that has not been materialized yet.
/// Instances are built by executing `body` into a fresh Definition scope
/// rooted at `declaring`.
pub struct DefinitionValue {
    pub name: String,
    pub body: Vec<Node>,
    pub declaring: ScopeRef,
}

/// A materialized definition bound to its own scope for the lifetime of
/// the instance.
pub struct InstanceValue {
    pub definition: Arc<DefinitionValue>,
    pub scope: ScopeRef,
}

/// A host-supplied I/O handle exposed to scripts as an object with `write`
/// and `read` methods.
pub trait Stream: Send + Sync {
    fn stream_name(&self) -> &str;
    fn write_text(&self, text: &str) -> std::io::Result<()>;
    fn read_line(&self) -> std::io::Result<String>;
}

pub type NativeCallback = Arc<dyn Fn(&Runtime, &[Object]) -> Result<Object> + Send + Sync>;

/// A callable. User methods carry their body nodes and the scope they were
/// declared in; native methods carry a host callback. Wrapped as
/// `ObjectKind::Fn` a method is itself an object, which is what makes
/// functions first-class.
#[derive(Clone)]
pub struct Method {
    pub name: String,
    pub params: Vec<String>,
    pub body: MethodBody,
}

#[derive(Clone)]
pub enum MethodBody {
    User { nodes: Vec<Node>, scope: ScopeRef },
    Native(NativeMethod),
}

#[derive(Clone)]
pub struct NativeMethod {
    /// Exact argument count, or `None` for variadic callbacks that check
    /// their own arguments.
    pub arity: Option<usize>,
    pub callback: NativeCallback,
}

impl Method {
    pub fn user(
        name: impl Into<String>,
        params: Vec<String>,
        nodes: Vec<Node>,
        scope: ScopeRef,
    ) -> Self {
        Self {
            name: name.into(),
            params,
            body: MethodBody::User { nodes, scope },
        }
    }

    pub fn native<F>(name: impl Into<String>, arity: Option<usize>, callback: F) -> Self
    where
        F: Fn(&Runtime, &[Object]) -> Result<Object> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            params: Vec::new(),
            body: MethodBody::Native(NativeMethod {
                arity,
                callback: Arc::new(callback),
            }),
        }
    }
}

impl Object {
    fn new(kind: ObjectKind) -> Self {
        Self {
            name: String::new(),
            mutable: true,
            addr: next_addr(),
            kind,
        }
    }

    pub fn nil() -> Self {
        Self::new(ObjectKind::Nil)
    }

    pub fn bool(value: bool) -> Self {
        Self::new(ObjectKind::Bool(value))
    }

    pub fn int(value: i64) -> Self {
        Self::new(ObjectKind::Int(value))
    }

    pub fn float(value: f64) -> Self {
        Self::new(ObjectKind::Float(value))
    }

    pub fn string(value: impl Into<String>) -> Self {
        Self::new(ObjectKind::String(value.into()))
    }

    pub fn list(items: Vec<Object>) -> Self {
        Self::new(ObjectKind::List(Arc::new(RwLock::new(items))))
    }

    pub fn array(entries: IndexMap<String, Object>) -> Self {
        Self::new(ObjectKind::Array(Arc::new(RwLock::new(entries))))
    }

    pub fn definition(name: impl Into<String>, body: Vec<Node>, declaring: ScopeRef) -> Self {
        let name = name.into();
        let mut object = Self::new(ObjectKind::Definition(Arc::new(DefinitionValue {
            name: name.clone(),
            body,
            declaring,
        })));
        object.name = name;
        object.mutable = false;
        object
    }

    pub fn instance(definition: Arc<DefinitionValue>, scope: ScopeRef) -> Self {
        let mut object = Self::new(ObjectKind::Instance(Arc::new(InstanceValue {
            definition,
            scope,
        })));
        if let ObjectKind::Instance(instance) = &object.kind {
            object.name = instance.definition.name.clone();
        }
        object
    }

    pub fn function(name: impl Into<String>, method: Method) -> Self {
        let mut object = Self::new(ObjectKind::Fn(Arc::new(method)));
        object.name = name.into();
        object
    }

    pub fn stream(stream: Arc<dyn Stream>) -> Self {
        let mut object = Self::new(ObjectKind::Stream(stream));
        if let ObjectKind::Stream(inner) = &object.kind {
            object.name = inner.stream_name().to_string();
        }
        object
    }

    pub fn kind(&self) -> &ObjectKind {
        &self.kind
    }

    pub fn type_name(&self) -> &'static str {
        match &self.kind {
            ObjectKind::String(_) => "String",
            ObjectKind::Int(_) => "Integer",
            ObjectKind::Float(_) => "Float",
            ObjectKind::Bool(_) => "Bool",
            ObjectKind::Nil => "Nil",
            ObjectKind::List(_) => "List",
            ObjectKind::Array(_) => "Array",
            ObjectKind::Definition(_) => "Definition",
            ObjectKind::Instance(_) => "Instance",
            ObjectKind::Fn(_) => "Fn",
            ObjectKind::Stream(_) => "Stream",
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rename(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn is_mutable(&self) -> bool {
        self.mutable
    }

    /// Marks the value permanently read-only. Constants are enforced by
    /// checking this flag at assignment time.
    pub fn immute(&mut self) {
        self.mutable = false;
    }

    pub fn addr(&self) -> u64 {
        self.addr
    }

    pub fn number(&self) -> Option<f64> {
        match &self.kind {
            ObjectKind::Int(n) => Some(*n as f64),
            ObjectKind::Float(n) => Some(*n),
            _ => None,
        }
    }

    pub fn expect_bool(&self, what: &str) -> std::result::Result<bool, Diagnostic> {
        match &self.kind {
            ObjectKind::Bool(value) => Ok(*value),
            _ => Err(Diagnostic::type_error(format!(
                "{what} must be a Bool, found {}",
                self.type_name()
            ))),
        }
    }

    /// Produces a value with independent identity for value types; lists and
    /// arrays are copied element-wise. Definitions, instances, functions,
    /// and streams return themselves.
    pub fn copy(&self) -> Object {
        match &self.kind {
            ObjectKind::String(_)
            | ObjectKind::Int(_)
            | ObjectKind::Float(_)
            | ObjectKind::Bool(_)
            | ObjectKind::Nil => Object {
                name: self.name.clone(),
                mutable: true,
                addr: next_addr(),
                kind: self.kind.clone(),
            },
            ObjectKind::List(items) => {
                let items = items
                    .read()
                    .expect("list lock poisoned")
                    .iter()
                    .map(Object::copy)
                    .collect();
                let mut copied = Object::list(items);
                copied.name = self.name.clone();
                copied
            }
            ObjectKind::Array(entries) => {
                let entries = entries
                    .read()
                    .expect("array lock poisoned")
                    .iter()
                    .map(|(key, value)| (key.clone(), value.copy()))
                    .collect();
                let mut copied = Object::array(entries);
                copied.name = self.name.clone();
                copied
            }
            ObjectKind::Definition(_)
            | ObjectKind::Instance(_)
            | ObjectKind::Fn(_)
            | ObjectKind::Stream(_) => self.clone(),
        }
    }

    /// Deep structural equality for value types, identity for reference
    /// types. Integers and floats compare numerically across kinds.
    pub fn deep_eq(&self, other: &Object) -> bool {
        match (&self.kind, &other.kind) {
            (ObjectKind::Nil, ObjectKind::Nil) => true,
            (ObjectKind::Bool(a), ObjectKind::Bool(b)) => a == b,
            (ObjectKind::Int(a), ObjectKind::Int(b)) => a == b,
            (ObjectKind::Float(a), ObjectKind::Float(b)) => (a - b).abs() < f64::EPSILON,
            (ObjectKind::Int(a), ObjectKind::Float(b)) => (*a as f64 - b).abs() < f64::EPSILON,
            (ObjectKind::Float(a), ObjectKind::Int(b)) => (a - *b as f64).abs() < f64::EPSILON,
            (ObjectKind::String(a), ObjectKind::String(b)) => a == b,
            (ObjectKind::List(a), ObjectKind::List(b)) => {
                if Arc::ptr_eq(a, b) {
                    return true;
                }
                let a = a.read().expect("list lock poisoned");
                let b = b.read().expect("list lock poisoned");
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(l, r)| l.deep_eq(r))
            }
            (ObjectKind::Array(a), ObjectKind::Array(b)) => {
                if Arc::ptr_eq(a, b) {
                    return true;
                }
                let a = a.read().expect("array lock poisoned");
                let b = b.read().expect("array lock poisoned");
                a.len() == b.len()
                    && a.iter().all(|(key, value)| {
                        b.get(key).map(|rhs| value.deep_eq(rhs)).unwrap_or(false)
                    })
            }
            (ObjectKind::Definition(a), ObjectKind::Definition(b)) => Arc::ptr_eq(a, b),
            (ObjectKind::Instance(a), ObjectKind::Instance(b)) => Arc::ptr_eq(a, b),
            (ObjectKind::Fn(a), ObjectKind::Fn(b)) => Arc::ptr_eq(a, b),
            (ObjectKind::Stream(a), ObjectKind::Stream(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Member lookup. `$addr` is available on every object; instances
    /// expose their bound fields, arrays their keyed entries.
    pub fn variable(&self, name: &str) -> Option<Object> {
        if name == "$addr" {
            let mut addr = Object::int(self.addr as i64);
            addr.rename("$addr");
            addr.immute();
            return Some(addr);
        }
        match &self.kind {
            ObjectKind::Instance(instance) => instance.scope.object_local(name),
            ObjectKind::Array(entries) => entries
                .read()
                .expect("array lock poisoned")
                .get(name)
                .cloned(),
            _ => None,
        }
    }

    pub fn variable_names(&self) -> Vec<String> {
        let mut names = vec!["$addr".to_string()];
        match &self.kind {
            ObjectKind::Instance(instance) => names.extend(instance.scope.object_names()),
            ObjectKind::Array(entries) => names.extend(
                entries
                    .read()
                    .expect("array lock poisoned")
                    .keys()
                    .cloned(),
            ),
            _ => {}
        }
        names
    }

    pub fn set_variable(&self, name: &str, mut value: Object) -> std::result::Result<(), Diagnostic> {
        if name == "$addr" {
            return Err(Diagnostic::declaration("`$addr` is read-only"));
        }
        value.rename(name);
        match &self.kind {
            ObjectKind::Instance(instance) => instance.scope.assign_local(name, value),
            ObjectKind::Array(entries) => {
                if !self.mutable {
                    return Err(Diagnostic::declaration(
                        "cannot assign into an immutable array",
                    ));
                }
                entries
                    .write()
                    .expect("array lock poisoned")
                    .insert(name.to_string(), value);
                Ok(())
            }
            _ => Err(Diagnostic::type_error(format!(
                "cannot set member `{name}` on {}",
                self.type_name()
            ))),
        }
    }

    /// Method lookup. Lists and arrays answer with natives bound to their
    /// shared payload; instances answer from their own scope, with `$init`
    /// synthesized as the constructor wrapper.
    pub fn method(&self, name: &str) -> Option<Method> {
        match &self.kind {
            ObjectKind::List(items) => match name {
                "append" => {
                    let items = Arc::clone(items);
                    let mutable = self.mutable;
                    Some(Method::native("append", Some(1), move |_runtime, args| {
                        if !mutable {
                            return Err(Diagnostic::declaration(
                                "cannot call `append` on an immutable list",
                            )
                            .into());
                        }
                        items
                            .write()
                            .expect("list lock poisoned")
                            .push(args[0].clone());
                        Ok(Object::nil())
                    }))
                }
                "contains" => {
                    let items = Arc::clone(items);
                    Some(Method::native("contains", Some(1), move |_runtime, args| {
                        let found = items
                            .read()
                            .expect("list lock poisoned")
                            .iter()
                            .any(|item| item.deep_eq(&args[0]));
                        Ok(Object::bool(found))
                    }))
                }
                _ => None,
            },
            ObjectKind::Array(entries) => match name {
                "$bind" => {
                    let entries = Arc::clone(entries);
                    let mutable = self.mutable;
                    Some(Method::native("$bind", Some(2), move |_runtime, args| {
                        if !mutable {
                            return Err(Diagnostic::declaration(
                                "cannot call `$bind` on an immutable array",
                            )
                            .into());
                        }
                        let key = match args[0].kind() {
                            ObjectKind::String(key) => key.clone(),
                            ObjectKind::Int(n) => n.to_string(),
                            _ => {
                                return Err(Diagnostic::type_error(format!(
                                    "array keys must be String or Integer, found {}",
                                    args[0].type_name()
                                ))
                                .into());
                            }
                        };
                        let mut value = args[1].clone();
                        value.rename(&key);
                        entries
                            .write()
                            .expect("array lock poisoned")
                            .insert(key, value);
                        Ok(Object::nil())
                    }))
                }
                _ => None,
            },
            ObjectKind::Instance(instance) => {
                if name == "$init" {
                    let target = self.clone();
                    let definition = instance.definition.name.clone();
                    let construct = instance.scope.function_local("construct");
                    return Some(Method::native("$init", None, move |runtime, args| {
                        match &construct {
                            Some(constructor) => {
                                constructor.call(runtime, args.to_vec())?;
                            }
                            None if !args.is_empty() => {
                                return Err(Diagnostic::type_error(format!(
                                    "definition `{definition}` takes no constructor arguments"
                                ))
                                .into());
                            }
                            None => {}
                        }
                        Ok(target.clone())
                    }));
                }
                instance.scope.function_local(name)
            }
            ObjectKind::Stream(stream) => match name {
                "write" => {
                    let stream = Arc::clone(stream);
                    Some(Method::native("write", Some(1), move |_runtime, args| {
                        stream.write_text(&args[0].to_string())?;
                        Ok(Object::nil())
                    }))
                }
                "read" => {
                    let stream = Arc::clone(stream);
                    Some(Method::native("read", Some(0), move |_runtime, _args| {
                        Ok(Object::string(stream.read_line()?))
                    }))
                }
                _ => None,
            },
            _ => None,
        }
    }

    pub fn method_names(&self) -> Vec<String> {
        match &self.kind {
            ObjectKind::List(_) => vec!["append".into(), "contains".into()],
            ObjectKind::Array(_) => vec!["$bind".into()],
            ObjectKind::Instance(instance) => {
                let mut names = vec!["$init".to_string()];
                names.extend(instance.scope.function_names());
                names
            }
            ObjectKind::Stream(_) => vec!["write".into(), "read".into()],
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ObjectKind::String(value) => write!(f, "{value}"),
            ObjectKind::Int(value) => write!(f, "{value}"),
            ObjectKind::Float(value) => write!(f, "{value}"),
            ObjectKind::Bool(value) => write!(f, "{value}"),
            ObjectKind::Nil => write!(f, "nil"),
            ObjectKind::List(items) => {
                write!(f, "[")?;
                for (idx, item) in items.read().expect("list lock poisoned").iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            ObjectKind::Array(entries) => {
                write!(f, "{{")?;
                let entries = entries.read().expect("array lock poisoned");
                for (idx, (key, value)) in entries.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                write!(f, "}}")
            }
            ObjectKind::Definition(definition) => write!(f, "<definition {}>", definition.name),
            ObjectKind::Instance(instance) => {
                write!(f, "<instance {}>", instance.definition.name)
            }
            ObjectKind::Fn(method) => write!(f, "<fn {}>", method.name),
            ObjectKind::Stream(stream) => write!(f, "<stream {}>", stream.stream_name()),
        }
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({self})", self.type_name())
    }
}

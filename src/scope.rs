use std::sync::{Arc, RwLock};

use indexmap::IndexMap;

use crate::diagnostics::Diagnostic;
use crate::object::{Method, Object, ObjectKind};

pub type ScopeRef = Arc<Scope>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    /// Root of a namespace. Holds the prelude builtins at the very top.
    Global,
    /// Top-level scope of one executed source file.
    File,
    /// Braced statement body: `if`, `while`, `for`.
    Block,
    /// One function invocation, parented at the declaring scope.
    Function,
    /// The private scope of a definition instance.
    Definition,
}

/// One node of the scope tree. Bindings live in two tables, objects and
/// functions, plus the namespace aliases brought in by `use`. Name lookup
/// falls through Block, Function, and File scopes to their parent;
/// Definition and Global scopes fall through only to the prelude root, so
/// independent definitions and namespaces stay sealed off from each other.
pub struct Scope {
    name: String,
    kind: ScopeKind,
    parent: Option<ScopeRef>,
    objects: RwLock<IndexMap<String, Object>>,
    functions: RwLock<IndexMap<String, Method>>,
    used_namespaces: RwLock<IndexMap<String, String>>,
}

impl Scope {
    pub fn global(name: impl Into<String>) -> ScopeRef {
        Arc::new(Self {
            name: name.into(),
            kind: ScopeKind::Global,
            parent: None,
            objects: RwLock::new(IndexMap::new()),
            functions: RwLock::new(IndexMap::new()),
            used_namespaces: RwLock::new(IndexMap::new()),
        })
    }

    pub fn child(parent: &ScopeRef, name: impl Into<String>, kind: ScopeKind) -> ScopeRef {
        Arc::new(Self {
            name: name.into(),
            kind,
            parent: Some(Arc::clone(parent)),
            objects: RwLock::new(IndexMap::new()),
            functions: RwLock::new(IndexMap::new()),
            used_namespaces: RwLock::new(IndexMap::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ScopeKind {
        self.kind
    }

    /// Binds a new object in this scope. Redeclaring a name already bound
    /// here, as either an object or a function, is fatal. The two tables are
    /// never locked at the same time; lock order stays flat.
    pub fn declare(&self, name: &str, object: Object) -> Result<(), Diagnostic> {
        let clashes = self
            .functions
            .read()
            .expect("scope lock poisoned")
            .contains_key(name);
        let mut objects = self.objects.write().expect("scope lock poisoned");
        if clashes || objects.contains_key(name) {
            return Err(Diagnostic::declaration(format!(
                "cannot redeclare `{name}` in the same scope"
            )));
        }
        objects.insert(name.to_string(), object);
        Ok(())
    }

    pub fn declare_function(&self, name: &str, method: Method) -> Result<(), Diagnostic> {
        let clashes = self
            .objects
            .read()
            .expect("scope lock poisoned")
            .contains_key(name);
        let mut functions = self.functions.write().expect("scope lock poisoned");
        if clashes || functions.contains_key(name) {
            return Err(Diagnostic::declaration(format!(
                "cannot redeclare `{name}` in the same scope"
            )));
        }
        functions.insert(name.to_string(), method);
        Ok(())
    }

    /// Unchecked insert used when host modules are merged into a namespace.
    pub fn bind(&self, name: &str, object: Object) {
        self.objects
            .write()
            .expect("scope lock poisoned")
            .insert(name.to_string(), object);
    }

    pub fn bind_function(&self, name: &str, method: Method) {
        self.functions
            .write()
            .expect("scope lock poisoned")
            .insert(name.to_string(), method);
    }

    /// Local-only lookup across both tables; functions come back wrapped
    /// as first-class `Fn` objects.
    pub fn member(&self, name: &str) -> Option<Object> {
        if let Some(object) = self
            .objects
            .read()
            .expect("scope lock poisoned")
            .get(name)
        {
            return Some(object.clone());
        }
        self.functions
            .read()
            .expect("scope lock poisoned")
            .get(name)
            .map(|method| Object::function(name, method.clone()))
    }

    pub fn lookup(self: &Arc<Self>, name: &str) -> Option<Object> {
        if let Some(object) = self.member(name) {
            return Some(object);
        }
        self.delegate()?.lookup(name)
    }

    pub fn object_local(&self, name: &str) -> Option<Object> {
        self.objects
            .read()
            .expect("scope lock poisoned")
            .get(name)
            .cloned()
    }

    pub fn function_local(&self, name: &str) -> Option<Method> {
        self.functions
            .read()
            .expect("scope lock poisoned")
            .get(name)
            .cloned()
    }

    pub fn object_names(&self) -> Vec<String> {
        self.objects
            .read()
            .expect("scope lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    pub fn function_names(&self) -> Vec<String> {
        self.functions
            .read()
            .expect("scope lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// Rebinds an existing name, walking the same fallthrough chain as
    /// `lookup`. Constants, definitions, and function bindings refuse.
    pub fn assign(self: &Arc<Self>, name: &str, value: Object) -> Result<(), Diagnostic> {
        match self.assign_here(name, value)? {
            None => Ok(()),
            Some(value) => match self.delegate() {
                Some(parent) => parent.assign(name, value),
                None => Err(Diagnostic::declaration(format!(
                    "undeclared variable `{name}`"
                ))),
            },
        }
    }

    /// Rebinds a name that must already exist in this scope. Used for
    /// instance fields and namespace members.
    pub fn assign_local(&self, name: &str, value: Object) -> Result<(), Diagnostic> {
        match self.assign_here(name, value)? {
            None => Ok(()),
            Some(_) => Err(Diagnostic::resolution(format!("unknown member `{name}`"))),
        }
    }

    /// Returns the value back when this scope has no binding for `name`.
    fn assign_here(&self, name: &str, value: Object) -> Result<Option<Object>, Diagnostic> {
        {
            let mut objects = self.objects.write().expect("scope lock poisoned");
            if let Some(existing) = objects.get(name) {
                if matches!(existing.kind(), ObjectKind::Definition(_)) {
                    return Err(Diagnostic::declaration(format!(
                        "cannot reassign definition `{name}`"
                    )));
                }
                if !existing.is_mutable() {
                    return Err(Diagnostic::declaration(format!(
                        "cannot assign to immutable binding `{name}`"
                    )));
                }
                let mut value = value;
                value.rename(name);
                objects.insert(name.to_string(), value);
                return Ok(None);
            }
        }
        if self
            .functions
            .read()
            .expect("scope lock poisoned")
            .contains_key(name)
        {
            return Err(Diagnostic::declaration(format!(
                "cannot reassign function `{name}`"
            )));
        }
        Ok(Some(value))
    }

    pub fn register_alias(&self, alias: &str, namespace: &str) -> Result<(), Diagnostic> {
        let mut aliases = self.used_namespaces.write().expect("scope lock poisoned");
        if aliases.contains_key(alias) {
            return Err(Diagnostic::declaration(format!(
                "namespace alias `{alias}` is already in use"
            )));
        }
        aliases.insert(alias.to_string(), namespace.to_string());
        Ok(())
    }

    pub fn resolve_alias(&self, name: &str) -> Option<String> {
        if let Some(namespace) = self
            .used_namespaces
            .read()
            .expect("scope lock poisoned")
            .get(name)
        {
            return Some(namespace.clone());
        }
        self.parent.as_ref()?.resolve_alias(name)
    }

    fn delegate(&self) -> Option<ScopeRef> {
        match self.kind {
            ScopeKind::Block | ScopeKind::Function | ScopeKind::File => self.parent.clone(),
            ScopeKind::Definition | ScopeKind::Global => {
                let mut root = self.parent.clone()?;
                while let Some(parent) = root.parent.clone() {
                    root = parent;
                }
                Some(root)
            }
        }
    }
}

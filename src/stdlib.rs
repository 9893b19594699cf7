use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::thread;
use std::time::Duration;

use indexmap::IndexMap;

use crate::diagnostics::{Diagnostic, Result};
use crate::object::{Method, Object, ObjectKind};
use crate::runtime::{Module, Runtime};

/// Portal receives give up after this long and report `ok: false` instead
/// of blocking a task forever.
const PORTAL_RECV_TIMEOUT: Duration = Duration::from_millis(250);

const DEFAULT_PORTAL_CAPACITY: usize = 16;

/// Installs the prelude builtins into the runtime's root scope and binds
/// the shipped `thread` and `state` modules.
pub fn install(runtime: &Runtime) {
    let globals = runtime.globals();
    globals.bind_function("print", Method::native("print", None, builtin_print));
    globals.bind_function("println", Method::native("println", None, builtin_println));
    globals.bind_function("len", Method::native("len", Some(1), builtin_len));
    globals.bind_function("type", Method::native("type", Some(1), builtin_type));

    runtime.bind_module(&ThreadModule);
    runtime.bind_module(&StateModule::new());
}

fn builtin_print(_runtime: &Runtime, args: &[Object]) -> Result<Object> {
    let rendered: Vec<String> = args.iter().map(Object::to_string).collect();
    print!("{}", rendered.join(" "));
    Ok(Object::nil())
}

fn builtin_println(_runtime: &Runtime, args: &[Object]) -> Result<Object> {
    let rendered: Vec<String> = args.iter().map(Object::to_string).collect();
    println!("{}", rendered.join(" "));
    Ok(Object::nil())
}

fn builtin_len(_runtime: &Runtime, args: &[Object]) -> Result<Object> {
    let length = match args[0].kind() {
        ObjectKind::String(text) => text.chars().count(),
        ObjectKind::List(items) => items.read().expect("list lock poisoned").len(),
        ObjectKind::Array(entries) => entries.read().expect("array lock poisoned").len(),
        _ => {
            return Err(Diagnostic::type_error(format!(
                "`len` expects a String, List, or Array, found {}",
                args[0].type_name()
            ))
            .into());
        }
    };
    Ok(Object::int(length as i64))
}

fn builtin_type(_runtime: &Runtime, args: &[Object]) -> Result<Object> {
    Ok(Object::string(args[0].type_name()))
}

fn expect_fn(value: &Object, what: &str) -> Result<Method> {
    match value.kind() {
        ObjectKind::Fn(method) => Ok(method.as_ref().clone()),
        _ => Err(Diagnostic::type_error(format!(
            "{what} expects a function, found {}",
            value.type_name()
        ))
        .into()),
    }
}

fn expect_task(value: &Object, what: &str) -> Result<Method> {
    let method = expect_fn(value, what)?;
    if !method.params.is_empty() {
        return Err(Diagnostic::type_error(format!(
            "{what} expects a zero-argument function"
        ))
        .into());
    }
    Ok(method)
}

fn expect_string(value: &Object, what: &str) -> Result<String> {
    match value.kind() {
        ObjectKind::String(text) => Ok(text.clone()),
        _ => Err(Diagnostic::type_error(format!(
            "{what} expects a String, found {}",
            value.type_name()
        ))
        .into()),
    }
}

fn expect_capacity(value: &Object, what: &str) -> Result<usize> {
    match value.kind() {
        ObjectKind::Int(n) if *n > 0 => Ok(*n as usize),
        ObjectKind::Int(n) => Err(Diagnostic::type_error(format!(
            "{what} capacity must be positive, got {n}"
        ))
        .into()),
        _ => Err(Diagnostic::type_error(format!(
            "{what} expects an Integer capacity, found {}",
            value.type_name()
        ))
        .into()),
    }
}

/// Concurrency primitives: detached `spawn`, bounded `portal` channels,
/// and `spawner` worker limiters.
pub struct ThreadModule;

impl Module for ThreadModule {
    fn namespace(&self) -> &str {
        "thread"
    }

    fn methods(&self) -> IndexMap<String, Method> {
        let mut methods = IndexMap::new();
        methods.insert(
            "spawn".to_string(),
            Method::native("spawn", Some(1), thread_spawn),
        );
        methods.insert(
            "portal".to_string(),
            Method::native("portal", None, thread_portal),
        );
        methods.insert(
            "spawner".to_string(),
            Method::native("spawner", Some(1), thread_spawner),
        );
        methods.insert(
            "sleep".to_string(),
            Method::native("sleep", Some(1), thread_sleep),
        );
        methods
    }
}

fn thread_spawn(runtime: &Runtime, args: &[Object]) -> Result<Object> {
    let method = expect_task(&args[0], "`thread.spawn`")?;
    let runtime = runtime.clone();
    tracing::debug!(task = %method.name, "spawning detached task");
    thread::spawn(move || {
        if let Err(err) = method.call(&runtime, Vec::new()) {
            tracing::debug!(error = %err, "spawned task failed");
        }
    });
    Ok(Object::nil())
}

fn thread_sleep(_runtime: &Runtime, args: &[Object]) -> Result<Object> {
    match args[0].kind() {
        ObjectKind::Int(millis) if *millis >= 0 => {
            thread::sleep(Duration::from_millis(*millis as u64));
            Ok(Object::nil())
        }
        _ => Err(Diagnostic::type_error(
            "`thread.sleep` expects a non-negative Integer of milliseconds",
        )
        .into()),
    }
}

/// Builds a channel object. `send` blocks when the buffer is full;
/// `receive` blocks up to the portal timeout and answers an array of
/// `{ok, value}` so callers can tell a timeout from a delivered nil.
fn thread_portal(_runtime: &Runtime, args: &[Object]) -> Result<Object> {
    let capacity = match args {
        [] => DEFAULT_PORTAL_CAPACITY,
        [capacity] => expect_capacity(capacity, "`thread.portal`")?,
        _ => {
            return Err(Diagnostic::type_error(
                "`thread.portal` expects at most one capacity argument",
            )
            .into());
        }
    };
    let (sender, receiver) = mpsc::sync_channel::<Object>(capacity);
    let receiver = Arc::new(Mutex::new(receiver));

    let send = Method::native("send", Some(1), move |_runtime, args: &[Object]| {
        sender
            .send(args[0].clone())
            .map_err(|_| Diagnostic::expression("portal is closed"))?;
        Ok(Object::bool(true))
    });
    let receive = Method::native("receive", Some(0), move |_runtime, _args: &[Object]| {
        let receiver = receiver.lock().expect("portal receiver poisoned");
        let mut result = IndexMap::new();
        match receiver.recv_timeout(PORTAL_RECV_TIMEOUT) {
            Ok(value) => {
                result.insert("ok".to_string(), Object::bool(true));
                result.insert("value".to_string(), value);
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                result.insert("ok".to_string(), Object::bool(false));
                result.insert("value".to_string(), Object::nil());
            }
        }
        Ok(Object::array(result))
    });

    let mut portal = IndexMap::new();
    portal.insert("send".to_string(), Object::function("send", send));
    portal.insert("receive".to_string(), Object::function("receive", receive));
    Ok(Object::array(portal))
}

/// Builds a worker limiter around a counting semaphore. `spawn` blocks
/// only while all permits are held; the permit travels into the worker
/// thread and releases when the task finishes, panic included.
fn thread_spawner(_runtime: &Runtime, args: &[Object]) -> Result<Object> {
    let capacity = expect_capacity(&args[0], "`thread.spawner`")?;
    let semaphore = Arc::new(Semaphore::new(capacity));

    let spawn = Method::native("spawn", Some(1), move |runtime: &Runtime, args: &[Object]| {
        let method = expect_task(&args[0], "`spawner.spawn`")?;
        let permit = semaphore.clone().acquire();
        let runtime = runtime.clone();
        tracing::debug!(task = %method.name, "spawning limited task");
        thread::spawn(move || {
            let _permit = permit;
            if let Err(err) = method.call(&runtime, Vec::new()) {
                tracing::debug!(error = %err, "spawner task failed");
            }
        });
        Ok(Object::nil())
    });

    let mut spawner = IndexMap::new();
    spawner.insert("spawn".to_string(), Object::function("spawn", spawn));
    Ok(Object::array(spawner))
}

struct Semaphore {
    permits: Mutex<usize>,
    freed: Condvar,
}

impl Semaphore {
    fn new(permits: usize) -> Self {
        Self {
            permits: Mutex::new(permits),
            freed: Condvar::new(),
        }
    }

    fn acquire(self: Arc<Self>) -> Permit {
        let mut permits = self.permits.lock().expect("semaphore poisoned");
        while *permits == 0 {
            permits = self.freed.wait(permits).expect("semaphore poisoned");
        }
        *permits -= 1;
        drop(permits);
        Permit { semaphore: self }
    }
}

struct Permit {
    semaphore: Arc<Semaphore>,
}

impl Drop for Permit {
    fn drop(&mut self) {
        let mut permits = self
            .semaphore
            .permits
            .lock()
            .expect("semaphore poisoned");
        *permits += 1;
        self.semaphore.freed.notify_one();
    }
}

/// A process-wide key/value table shared by every task in the runtime.
pub struct StateModule {
    table: Arc<RwLock<IndexMap<String, Object>>>,
}

impl StateModule {
    pub fn new() -> Self {
        Self {
            table: Arc::new(RwLock::new(IndexMap::new())),
        }
    }
}

impl Default for StateModule {
    fn default() -> Self {
        Self::new()
    }
}

impl Module for StateModule {
    fn namespace(&self) -> &str {
        "state"
    }

    fn methods(&self) -> IndexMap<String, Method> {
        let mut methods = IndexMap::new();

        let table = Arc::clone(&self.table);
        methods.insert(
            "get".to_string(),
            Method::native("get", Some(1), move |_runtime, args: &[Object]| {
                let key = expect_string(&args[0], "`state.get`")?;
                Ok(table
                    .read()
                    .expect("state table poisoned")
                    .get(&key)
                    .cloned()
                    .unwrap_or_else(Object::nil))
            }),
        );

        let table = Arc::clone(&self.table);
        methods.insert(
            "set".to_string(),
            Method::native("set", Some(2), move |_runtime, args: &[Object]| {
                let key = expect_string(&args[0], "`state.set`")?;
                let mut value = args[1].clone();
                value.rename(&key);
                table
                    .write()
                    .expect("state table poisoned")
                    .insert(key, value);
                Ok(Object::nil())
            }),
        );

        let table = Arc::clone(&self.table);
        methods.insert(
            "delete".to_string(),
            Method::native("delete", Some(1), move |_runtime, args: &[Object]| {
                let key = expect_string(&args[0], "`state.delete`")?;
                let removed = table
                    .write()
                    .expect("state table poisoned")
                    .shift_remove(&key)
                    .is_some();
                Ok(Object::bool(removed))
            }),
        );

        let table = Arc::clone(&self.table);
        methods.insert(
            "keys".to_string(),
            Method::native("keys", Some(0), move |_runtime, _args: &[Object]| {
                let keys = table
                    .read()
                    .expect("state table poisoned")
                    .keys()
                    .map(|key| Object::string(key.clone()))
                    .collect();
                Ok(Object::list(keys))
            }),
        );

        methods
    }
}

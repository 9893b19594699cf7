use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use indexmap::IndexMap;

use oleander::{Method, Module, Object, ObjectKind, Runtime};

fn eval(source: &str) -> Object {
    Runtime::new()
        .eval_source(source)
        .expect("script should succeed")
        .expect("script should produce a value")
}

fn expect_int(value: &Object) -> i64 {
    match value.kind() {
        ObjectKind::Int(n) => *n,
        _ => panic!("expected Integer, found {}", value.type_name()),
    }
}

fn expect_bool(value: &Object) -> bool {
    match value.kind() {
        ObjectKind::Bool(b) => *b,
        _ => panic!("expected Bool, found {}", value.type_name()),
    }
}

fn expect_string(value: &Object) -> String {
    match value.kind() {
        ObjectKind::String(text) => text.clone(),
        _ => panic!("expected String, found {}", value.type_name()),
    }
}

#[test]
fn portals_deliver_in_order_within_one_task() {
    let value = eval(
        r#"
        use thread;
        let p = thread.portal(4);
        p.send(1);
        p.send(2);
        let first = p.receive();
        let second = p.receive();
        return first.value * 10 + second.value;
        "#,
    );
    assert_eq!(expect_int(&value), 12);
}

#[test]
fn portal_receive_reports_delivery_in_ok() {
    let value = eval(
        r#"
        use thread;
        let p = thread.portal();
        p.send(nil);
        return p.receive().ok;
        "#,
    );
    assert!(expect_bool(&value), "a delivered nil still counts as ok");
}

#[test]
fn portals_carry_values_between_tasks() {
    let value = eval(
        r#"
        use thread;
        let p = thread.portal();
        thread.spawn(fn() { p.send("ping"); });
        let got = p.receive();
        if got.ok == false {
            got = p.receive();
        }
        return got.value;
        "#,
    );
    assert_eq!(expect_string(&value), "ping");
}

#[test]
fn portal_receive_times_out_instead_of_blocking() {
    let started = Instant::now();
    let value = eval(
        r#"
        use thread;
        let p = thread.portal();
        let got = p.receive();
        if got.ok { return "delivered"; }
        if got.value == nil { return "timed out"; }
        return "bad value";
        "#,
    );
    assert_eq!(expect_string(&value), "timed out");
    assert!(
        started.elapsed() < Duration::from_secs(2),
        "receive should give up after the portal timeout"
    );
}

#[test]
fn portal_capacity_must_be_positive() {
    let err = Runtime::new()
        .eval_source("use thread; let p = thread.portal(0);")
        .expect_err("zero capacity should be rejected")
        .to_string();
    assert!(err.contains("capacity must be positive"), "got: {err}");
}

/// Counts concurrent entries into `probe.work` so tests can observe how
/// many tasks a spawner really lets run at once.
struct ProbeModule {
    current: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    done: Arc<AtomicUsize>,
}

impl ProbeModule {
    fn new() -> Self {
        Self {
            current: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
            done: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl Module for ProbeModule {
    fn namespace(&self) -> &str {
        "probe"
    }

    fn methods(&self) -> IndexMap<String, Method> {
        let current = Arc::clone(&self.current);
        let peak = Arc::clone(&self.peak);
        let done = Arc::clone(&self.done);
        let mut methods = IndexMap::new();
        methods.insert(
            "work".to_string(),
            Method::native("work", Some(0), move |_runtime, _args| {
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(40));
                current.fetch_sub(1, Ordering::SeqCst);
                done.fetch_add(1, Ordering::SeqCst);
                Ok(Object::nil())
            }),
        );
        methods
    }
}

#[test]
fn spawners_cap_how_many_tasks_run_at_once() {
    let probe = ProbeModule::new();
    let peak = Arc::clone(&probe.peak);
    let done = Arc::clone(&probe.done);

    let runtime = Runtime::new();
    runtime.bind_module(&probe);
    runtime
        .eval_source(
            r#"
            use thread;
            use probe;
            let pool = thread.spawner(2);
            let i = 0;
            while i < 6 {
                pool.spawn(fn() { probe.work(); });
                i++;
            }
            "#,
        )
        .expect("script should succeed");

    let deadline = Instant::now() + Duration::from_secs(5);
    while done.load(Ordering::SeqCst) < 6 {
        assert!(Instant::now() < deadline, "spawned tasks never finished");
        std::thread::sleep(Duration::from_millis(10));
    }
    let peak = peak.load(Ordering::SeqCst);
    assert!(peak >= 1, "tasks should have run");
    assert!(peak <= 2, "spawner let {peak} tasks run at once");
}

#[test]
fn spawn_rejects_functions_that_take_arguments() {
    let err = Runtime::new()
        .eval_source("use thread; thread.spawn(fn(x) => x);")
        .expect_err("spawn should reject a one-argument task")
        .to_string();
    assert!(
        err.contains("expects a zero-argument function"),
        "got: {err}"
    );
}

#[test]
fn sleep_pauses_the_calling_task() {
    let started = Instant::now();
    Runtime::new()
        .eval_source("use thread; thread.sleep(30);")
        .expect("sleep should succeed");
    assert!(started.elapsed() >= Duration::from_millis(30));
}

#[test]
fn state_table_is_shared_across_tasks() {
    let value = eval(
        r#"
        use thread;
        use state;
        let p = thread.portal();
        thread.spawn(fn() {
            state.set("who", "worker");
            p.send(true);
        });
        let got = p.receive();
        if got.ok == false {
            got = p.receive();
        }
        return state.get("who");
        "#,
    );
    assert_eq!(expect_string(&value), "worker");
}

#[test]
fn state_supports_delete_and_keys() {
    let value = eval(
        r#"
        use state;
        state.set("a", 1);
        state.set("b", 2);
        let dropped = state.delete("a");
        let again = state.delete("a");
        let names = state.keys();
        if dropped == false { return "first delete failed"; }
        if again { return "second delete should miss"; }
        if len(names) != 1 { return "wrong key count"; }
        return names[0];
        "#,
    );
    assert_eq!(expect_string(&value), "b");
}

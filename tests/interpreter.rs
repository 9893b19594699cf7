use std::io;
use std::sync::{Arc, Mutex};

use indexmap::IndexMap;

use oleander::{parse_source, Method, Module, Object, ObjectKind, Runtime, Scope, ScopeKind, Stream};

fn eval(source: &str) -> Object {
    Runtime::new()
        .eval_source(source)
        .expect("evaluation should succeed")
        .expect("script should produce a value")
}

fn eval_error(source: &str) -> String {
    Runtime::new()
        .eval_source(source)
        .expect_err("evaluation should fail")
        .to_string()
}

fn expect_int(value: &Object) -> i64 {
    match value.kind() {
        ObjectKind::Int(n) => *n,
        _ => panic!("expected Integer, found {}", value.type_name()),
    }
}

fn expect_float(value: &Object) -> f64 {
    match value.kind() {
        ObjectKind::Float(n) => *n,
        _ => panic!("expected Float, found {}", value.type_name()),
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
        ObjectKind::String(s) => s.clone(),
        _ => panic!("expected String, found {}", value.type_name()),
    }
}

#[test]
fn arithmetic_respects_precedence() {
    assert_eq!(expect_int(&eval("return 2 + 3 * 4;")), 14);
    assert_eq!(expect_int(&eval("return 10 - 3 - 2;")), 5);
    assert_eq!(expect_int(&eval("return (2 + 3) * 4;")), 20);
}

#[test]
fn integer_division_may_produce_floats() {
    assert_eq!(expect_float(&eval("return 7 / 2;")), 3.5);
    assert_eq!(expect_int(&eval("return 6 / 2;")), 3);
    assert_eq!(expect_int(&eval("return 7 % 3;")), 1);
}

#[test]
fn exact_float_results_normalize_to_integers() {
    assert_eq!(expect_int(&eval("return 2.5 + 2.5;")), 5);
    assert_eq!(expect_float(&eval("return 2.5 + 2.0;")), 4.5);
}

#[test]
fn division_by_zero_is_fatal_and_quotes_the_expression() {
    let message = eval_error("return 1 / 0;");
    assert!(message.contains("division by zero"), "got: {message}");
    assert!(message.contains("1 / 0"), "got: {message}");
}

#[test]
fn plus_concatenates_when_either_side_is_a_string() {
    assert_eq!(expect_string(&eval("return \"a\" + 1;")), "a1");
    assert_eq!(expect_string(&eval("return 2 + \"b\";")), "2b");
}

#[test]
fn logical_operators_require_bools_and_short_circuit() {
    assert!(expect_bool(&eval("return true || false;")));
    // The right-hand call must not run when the left side decides.
    assert!(!expect_bool(&eval("return false && boom();")));
    assert!(expect_bool(&eval("return true || boom();")));
    let message = eval_error("return 1 && true;");
    assert!(message.contains("must be a Bool"), "got: {message}");
}

#[test]
fn comparisons_cover_numbers_and_strings() {
    assert!(expect_bool(&eval("return 1 < 2;")));
    assert!(expect_bool(&eval("return \"apple\" < \"banana\";")));
    assert!(expect_bool(&eval("return 1 == 1.0;")));
    assert!(expect_bool(&eval("return [1, [2]] == [1, [2]];")));
    assert!(expect_bool(&eval("return [1] != [2];")));
}

#[test]
fn constants_cannot_be_reassigned() {
    let message = eval_error("const x = 1; x = 2;");
    assert!(message.contains("immutable binding `x`"), "got: {message}");
}

#[test]
fn let_bindings_can_be_reassigned() {
    assert_eq!(expect_int(&eval("let x = 5; x = 6; return x;")), 6);
}

#[test]
fn redeclaration_in_the_same_scope_is_fatal() {
    let message = eval_error("let x = 1; let x = 2;");
    assert!(message.contains("cannot redeclare `x`"), "got: {message}");
}

#[test]
fn undeclared_variables_are_reported() {
    let message = eval_error("return missing;");
    assert!(
        message.contains("undeclared variable `missing`"),
        "got: {message}"
    );
}

#[test]
fn block_bindings_are_invisible_to_siblings() {
    let source = "
        let x = 1;
        if true { let y = 2; if true { x = x + y; } }
        return x;
    ";
    assert_eq!(expect_int(&eval(source)), 3);

    let message = eval_error("if true { let y = 2; } if true { return y; }");
    assert!(
        message.contains("undeclared variable `y`"),
        "got: {message}"
    );
}

#[test]
fn while_loops_run_their_condition_each_pass() {
    let source = "
        let total = 0;
        let i = 0;
        while i < 5 {
            total = total + i;
            i++;
        }
        return total;
    ";
    assert_eq!(expect_int(&eval(source)), 10);
}

#[test]
fn for_loops_iterate_lists_strings_and_arrays() {
    let source = "
        let total = 0;
        for n in [1, 2, 3, 4] { total = total + n; }
        return total;
    ";
    assert_eq!(expect_int(&eval(source)), 10);

    let source = "
        let out = \"\";
        for ch in \"abc\" { out = out + ch; }
        return out;
    ";
    assert_eq!(expect_string(&eval(source)), "abc");

    let source = "
        let keys = \"\";
        for entry in array { a: 1, b: 2 } { keys = keys + entry[0]; }
        return keys;
    ";
    assert_eq!(expect_string(&eval(source)), "ab");
}

#[test]
fn increments_require_integers() {
    assert_eq!(expect_int(&eval("let x = 1; x++; x++; x--; return x;")), 2);
    let message = eval_error("let s = \"a\"; s++;");
    assert!(
        message.contains("increment target must be an Integer"),
        "got: {message}"
    );
}

#[test]
fn if_conditions_must_be_bools() {
    let message = eval_error("if 1 { return 2; }");
    assert!(
        message.contains("`if` condition must be a Bool"),
        "got: {message}"
    );
}

#[test]
fn functions_are_first_class() {
    assert_eq!(
        expect_int(&eval("fn add(a, b) => a + b; let f = add; return f(2, 3);")),
        5
    );
    assert_eq!(expect_int(&eval("let f = fn(x) => x * 2; return f(21);")), 42);
}

#[test]
fn closures_capture_their_declaring_scope() {
    let source = "
        fn make() {
            let n = 10;
            return fn(x) => x + n;
        }
        let f = make();
        return f(5);
    ";
    assert_eq!(expect_int(&eval(source)), 15);
}

#[test]
fn function_arity_is_checked() {
    let message = eval_error("fn add(a, b) => a + b; return add(1);");
    assert!(message.contains("expected 2 arguments"), "got: {message}");
}

#[test]
fn early_return_unwinds_nested_blocks() {
    let source = "
        fn pick(n) {
            while true {
                if n > 10 { return \"big\"; }
                return \"small\";
            }
        }
        return pick(20) + pick(3);
    ";
    assert_eq!(expect_string(&eval(source)), "bigsmall");
}

#[test]
fn definitions_materialize_independent_instances() {
    let source = "
        define Counter {
            let count = 0;
            fn construct(start) { this.count = start; }
            fn bump() { this.count = this.count + 1; }
            fn value() => this.count
        }
        let a = Counter(10);
        let b = Counter(20);
        a.bump();
        a.bump();
        return a.value() + b.value();
    ";
    assert_eq!(expect_int(&eval(source)), 32);
}

#[test]
fn definition_fields_resolve_without_this() {
    let source = "
        define Box {
            let item = \"pearl\";
            fn peek() => item
        }
        return Box().peek();
    ";
    assert_eq!(expect_string(&eval(source)), "pearl");
}

#[test]
fn constructorless_definitions_reject_arguments() {
    assert_eq!(
        expect_int(&eval("define P { let x = 1; } let p = P(); return p.x;")),
        1
    );
    let message = eval_error("define P { let x = 1; } P(5);");
    assert!(
        message.contains("takes no constructor arguments"),
        "got: {message}"
    );
}

#[test]
fn definitions_cannot_be_reassigned() {
    let message = eval_error("define P {} P = 1;");
    assert!(
        message.contains("cannot reassign definition `P`"),
        "got: {message}"
    );
}

#[test]
fn instance_members_must_exist_to_assign() {
    let message = eval_error("define P {} let p = P(); p.ghost = 1;");
    assert!(message.contains("unknown member `ghost`"), "got: {message}");
}

#[test]
fn definition_scopes_cannot_see_enclosing_locals() {
    let message = eval_error(
        "let secret = 41; define Leak { fn probe() => secret } return Leak().probe();",
    );
    assert!(
        message.contains("undeclared variable `secret`"),
        "got: {message}"
    );
}

#[test]
fn builtins_remain_visible_inside_definitions() {
    let source = "
        define Tag {
            fn describe(value) => type(value)
        }
        return Tag().describe([1]);
    ";
    assert_eq!(expect_string(&eval(source)), "List");
}

#[test]
fn lists_append_and_contain_with_deep_equality() {
    assert_eq!(
        expect_int(&eval("let xs = [1, 2]; xs.append(3); return len(xs);")),
        3
    );
    assert!(expect_bool(&eval(
        "let xs = [1, [2, 3]]; return xs.contains([2, 3]);"
    )));
    let message = eval_error("const xs = [1]; xs.append(2);");
    assert!(message.contains("immutable list"), "got: {message}");
}

#[test]
fn arrays_support_members_keys_and_dynamic_binding() {
    let source = "
        let m = array { apples: 1, \"two words\": 2 };
        m.apples = m.apples + 5;
        m.$bind(\"pears\", 4);
        m.grapes = 7;
        return m.apples + m[\"two words\"] + m.pears + m.grapes;
    ";
    assert_eq!(expect_int(&eval(source)), 19);
}

#[test]
fn indexing_reads_lists_strings_and_arrays() {
    assert_eq!(expect_int(&eval("let xs = [4, 5, 6]; return xs[1];")), 5);
    assert_eq!(expect_string(&eval("let s = \"hello\"; return s[1];")), "e");
    assert_eq!(
        expect_int(&eval("let m = array { a: 9 }; return m[\"a\"];")),
        9
    );
    let message = eval_error("let xs = [1]; return xs[4];");
    assert!(message.contains("out of bounds"), "got: {message}");
}

#[test]
fn index_assignment_writes_through() {
    assert_eq!(
        expect_int(&eval("let xs = [1, 2, 3]; xs[1] = 9; return xs[1];")),
        9
    );
}

#[test]
fn single_operand_expressions_copy_value_types() {
    // `b` is an independent copy; mutating it leaves `a` untouched.
    let source = "
        let a = [1];
        let b = a;
        b.append(2);
        return len(a) + len(b);
    ";
    assert_eq!(expect_int(&eval(source)), 3);
    // Copies of constants are mutable again.
    assert_eq!(expect_int(&eval("const x = 5; let y = x; y = 6; return y;")), 6);
}

#[test]
fn instances_keep_their_identity_across_bindings() {
    let source = "
        define Cell { let v = 0; fn set(n) { this.v = n; } fn get() => this.v }
        let a = Cell();
        let b = a;
        b.set(7);
        return a.get();
    ";
    assert_eq!(expect_int(&eval(source)), 7);
}

#[test]
fn addr_is_stable_per_object_and_unique_across_objects() {
    assert!(expect_bool(&eval("let a = [1]; return a.$addr == a.$addr;")));
    assert!(expect_bool(&eval(
        "let a = [1]; let b = [1]; return a.$addr != b.$addr;"
    )));
}

#[test]
fn templates_interpolate_expressions() {
    assert_eq!(
        expect_string(&eval("let name = \"world\"; return `hello {{name}}`;")),
        "hello world"
    );
    assert_eq!(expect_string(&eval("return <>sum: {{1 + 2}}</>;")), "sum: 3");
}

#[test]
fn templates_render_compound_values() {
    assert_eq!(
        expect_string(&eval("let xs = [1, \"two\"]; return `xs = {{xs}}`;")),
        "xs = [1, two]"
    );
    assert_eq!(
        expect_string(&eval("let m = array { a: 1 }; return `m = {{m}}`;")),
        "m = {a: 1}"
    );
}

#[test]
fn bindings_persist_across_programs_sharing_a_scope() {
    let runtime = Runtime::new();
    let scope = Scope::child(&runtime.globals(), "session", ScopeKind::File);
    runtime
        .execute_in(
            &scope,
            &parse_source("let x = 1; fn next() => x + 1").expect("first line should parse"),
        )
        .expect("first line should execute");
    let result = runtime
        .execute_in(
            &scope,
            &parse_source("x = x + 1; return next();").expect("second line should parse"),
        )
        .expect("second line should execute")
        .expect("script should produce a value");
    assert_eq!(expect_int(&result), 3);
}

#[test]
fn namespaces_share_state_across_files() {
    let runtime = Runtime::new();
    runtime
        .eval_source("namespace counters; let hits = 0; fn bump() { hits = hits + 1; }")
        .expect("namespace file should execute");
    let result = runtime
        .eval_source("use counters as c; c.bump(); c.bump(); return c.hits;")
        .expect("second file should execute")
        .expect("script should produce a value");
    assert_eq!(expect_int(&result), 2);
}

#[test]
fn namespace_members_assign_through_aliases() {
    let runtime = Runtime::new();
    runtime
        .eval_source("namespace config; let retries = 1;")
        .expect("namespace file should execute");
    let result = runtime
        .eval_source("use config; config.retries = 5; return config.retries;")
        .expect("assignment through alias should work")
        .expect("script should produce a value");
    assert_eq!(expect_int(&result), 5);
}

#[test]
fn alias_reuse_is_fatal() {
    let message = eval_error("use alpha as a; use beta as a;");
    assert!(
        message.contains("alias `a` is already in use"),
        "got: {message}"
    );
}

#[test]
fn namespace_statement_must_come_first() {
    let message = eval_error("let x = 1; namespace late;");
    assert!(
        message.contains("must be the first statement"),
        "got: {message}"
    );
}

#[test]
fn len_and_type_builtins() {
    assert_eq!(expect_int(&eval("return len(\"héllo\");")), 5);
    assert_eq!(expect_int(&eval("return len([1, 2]);")), 2);
    assert_eq!(expect_string(&eval("return type(1.5);")), "Float");
    assert_eq!(expect_string(&eval("return type(nil);")), "Nil");
}

struct CollectingStream {
    lines: Mutex<Vec<String>>,
}

impl Stream for CollectingStream {
    fn stream_name(&self) -> &str {
        "collector"
    }

    fn write_text(&self, text: &str) -> io::Result<()> {
        self.lines
            .lock()
            .expect("collector poisoned")
            .push(text.to_string());
        Ok(())
    }

    fn read_line(&self) -> io::Result<String> {
        Ok(String::new())
    }
}

struct HostModule {
    log: Arc<CollectingStream>,
}

impl Module for HostModule {
    fn namespace(&self) -> &str {
        "host"
    }

    fn objects(&self) -> IndexMap<String, Object> {
        let mut objects = IndexMap::new();
        objects.insert("version".to_string(), Object::string("1.0"));
        objects.insert(
            "out".to_string(),
            Object::stream(Arc::clone(&self.log) as Arc<dyn Stream>),
        );
        objects
    }

    fn methods(&self) -> IndexMap<String, Method> {
        let mut methods = IndexMap::new();
        methods.insert(
            "double".to_string(),
            Method::native("double", Some(1), |_runtime, args| match args[0].kind() {
                ObjectKind::Int(n) => Ok(Object::int(n * 2)),
                _ => Ok(Object::nil()),
            }),
        );
        methods
    }
}

#[test]
fn host_modules_bind_objects_methods_and_streams() {
    let log = Arc::new(CollectingStream {
        lines: Mutex::new(Vec::new()),
    });
    let runtime = Runtime::new();
    runtime.bind_module(&HostModule {
        log: Arc::clone(&log),
    });
    let result = runtime
        .eval_source("use host; host.out.write(`v{{host.version}}`); return host.double(21);")
        .expect("host module script should execute")
        .expect("script should produce a value");
    assert_eq!(expect_int(&result), 42);
    assert_eq!(
        log.lines.lock().expect("collector poisoned").as_slice(),
        ["v1.0"]
    );
}

#[test]
fn module_objects_are_bound_immutable() {
    let log = Arc::new(CollectingStream {
        lines: Mutex::new(Vec::new()),
    });
    let runtime = Runtime::new();
    runtime.bind_module(&HostModule { log });
    let err = runtime
        .eval_source("use host; host.version = \"2.0\";")
        .expect_err("module constants should refuse assignment")
        .to_string();
    assert!(err.contains("immutable"), "got: {err}");
}

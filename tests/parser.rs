use oleander::ast::{self, NodeKind};
use oleander::parse_source;

fn canonical(source: &str) -> String {
    ast::render(&parse_source(source).expect("parsing should succeed"))
}

fn parse_error(source: &str) -> String {
    parse_source(source)
        .expect_err("parsing should fail")
        .message
}

#[test]
fn rendering_is_canonical_and_idempotent() {
    let source = r#"
namespace demo;
use thread as t;
const LIMIT = 10;
let total = 0.5;
fn add(a, b) => a + b
fn run(jobs) {
    for job in jobs {
        if job > LIMIT {
            total = total + job;
        } else if job == 0 {
            total--;
        } else {
            total++;
        }
    }
    while total < 100 { total = total * 2; }
    return total;
}
define Basket {
    let items = [];
    fn construct(first) { this.items.append(first); }
    fn report() => `basket has {{len(this.items)}} items`
}
let basket = Basket(array { kind: "apple", "unit price": 3 });
basket.items[0] = nil;
let banner = <>total: {{total}}</>;
println(add(1, 2), basket.report(), banner, -total, !false);
"#;
    let first = canonical(source);
    let second = canonical(&first);
    assert_eq!(first, second, "canonical rendering should be idempotent");
}

#[test]
fn expression_statements_render_with_semicolons() {
    assert_eq!(canonical("let x=2+3*4;"), "let x = 2 + 3 * 4;\n");
    assert_eq!(canonical("1   +   2;"), "1 + 2;\n");
}

#[test]
fn arrow_lambdas_render_back_in_arrow_form() {
    assert_eq!(
        canonical("let f = fn(x) => x * 2;"),
        "let f = fn(x) => x * 2;\n"
    );
}

#[test]
fn else_if_chains_stay_flat() {
    let rendered = canonical("if a { 1; } else { if b { 2; } else { 3; } }");
    assert!(rendered.contains("} else if b {"), "got:\n{rendered}");
}

#[test]
fn expressions_stay_flat_lists_of_operands() {
    let nodes = parse_source("1 + 2 * 3;").expect("parsing should succeed");
    let NodeKind::Expression(parts) = &nodes[0].kind else {
        panic!("expected an expression statement");
    };
    assert_eq!(parts.len(), 5);
    assert!(matches!(parts[1].kind, NodeKind::Operator(_)));
    assert!(matches!(parts[3].kind, NodeKind::Operator(_)));
}

#[test]
fn comments_are_dropped_from_the_tree() {
    let rendered = canonical("// heading\nlet x = 1; /* inline */ let y = 2;");
    assert_eq!(rendered, "let x = 1;\nlet y = 2;\n");
}

#[test]
fn unbalanced_call_arguments_report_eof() {
    let message = parse_error("f(1, 2");
    assert!(
        message.contains("expected `)`, got end of input"),
        "got: {message}"
    );
}

#[test]
fn mismatched_closers_are_reported() {
    let message = parse_error("f(1]");
    assert!(message.contains("expected `)`"), "got: {message}");
}

#[test]
fn declarations_need_a_value() {
    let message = parse_error("let x = ;");
    assert!(message.contains("expected an expression"), "got: {message}");
}

#[test]
fn assignment_to_a_call_result_is_rejected() {
    let message = parse_error("f() = 1;");
    assert!(
        message.contains("cannot assign to a call result"),
        "got: {message}"
    );
}

#[test]
fn dangling_template_substitutions_are_rejected() {
    let message = parse_error("let t = `oops {{1 + 2`;");
    assert!(message.contains("unterminated `{{`"), "got: {message}");
}

#[test]
fn serialized_trees_round_trip_through_json() {
    let nodes = parse_source("define P { fn construct(n) { this.n = n; } } let p = P(4);")
        .expect("parsing should succeed");
    let encoded = serde_json::to_string(&nodes).expect("nodes should serialize");
    let decoded: Vec<oleander::ast::Node> =
        serde_json::from_str(&encoded).expect("nodes should deserialize");
    assert_eq!(ast::render(&nodes), ast::render(&decoded));
}

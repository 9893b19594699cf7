use std::fs;

use oleander::ast;
use oleander::AstCache;

const SOURCE: &str = "let x = 1;\nfn double(n) => n * 2\nprintln(double(x));\n";

#[test]
fn a_miss_parses_and_stores_the_tree() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cache = AstCache::new(dir.path());
    assert!(cache.load(SOURCE).is_none(), "fresh cache should miss");

    let parsed = cache.load_or_parse(SOURCE).expect("parse should succeed");
    assert!(cache.entry_path(SOURCE).is_file(), "entry should be written");

    let reloaded = cache.load(SOURCE).expect("entry should now hit");
    assert_eq!(ast::render(&parsed), ast::render(&reloaded));
}

#[test]
fn keys_are_stable_and_source_sensitive() {
    let cache = AstCache::new("unused");
    assert_eq!(AstCache::key(SOURCE), AstCache::key(SOURCE));
    assert_ne!(AstCache::key("let a = 1;"), AstCache::key("let a = 2;"));
    assert_ne!(
        cache.entry_path("let a = 1;"),
        cache.entry_path("let a = 2;")
    );
    let name = cache
        .entry_path(SOURCE)
        .file_name()
        .expect("entry should have a file name")
        .to_string_lossy()
        .into_owned();
    assert!(name.ends_with(".ast.json"), "got: {name}");
    assert_eq!(name.len(), 64 + ".ast.json".len());
}

#[test]
fn a_corrupt_entry_counts_as_a_miss() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cache = AstCache::new(dir.path());
    fs::create_dir_all(cache.dir()).expect("create cache dir");
    fs::write(cache.entry_path(SOURCE), b"{ not json").expect("write garbage");

    assert!(cache.load(SOURCE).is_none(), "garbage should not decode");
    let parsed = cache
        .load_or_parse(SOURCE)
        .expect("corrupt entry should fall back to parsing");
    let reloaded = cache.load(SOURCE).expect("entry should be rewritten");
    assert_eq!(ast::render(&parsed), ast::render(&reloaded));
}

#[test]
fn syntax_errors_are_not_cached() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cache = AstCache::new(dir.path());
    let bad = "let x = ;";
    assert!(cache.load_or_parse(bad).is_err());
    assert!(!cache.entry_path(bad).exists());
}

#[test]
fn an_unwritable_directory_still_returns_the_parse() {
    let dir = tempfile::tempdir().expect("tempdir");
    let blocker = dir.path().join("cache");
    fs::write(&blocker, b"").expect("occupy the cache path with a file");

    let cache = AstCache::new(&blocker);
    let parsed = cache
        .load_or_parse(SOURCE)
        .expect("a failed store should not fail the parse");
    assert!(!parsed.is_empty());
    assert!(cache.load(SOURCE).is_none(), "nothing should be written");
}

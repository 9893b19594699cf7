use oleander::lexer::{Keyword, Lexer, Token, TokenKind};

fn tokenize(source: &str) -> Vec<Token> {
    Lexer::new(source).tokenize().expect("lexing should succeed")
}

fn kinds(source: &str) -> Vec<TokenKind> {
    tokenize(source).into_iter().map(|token| token.kind).collect()
}

#[test]
fn declarations_lex_into_keywords_and_punctuation() {
    assert_eq!(
        kinds("let x = 5;"),
        vec![
            TokenKind::Keyword(Keyword::Let),
            TokenKind::Identifier,
            TokenKind::Assign,
            TokenKind::Int,
            TokenKind::Semicolon,
            TokenKind::Eof,
        ]
    );
}

#[test]
fn multi_character_operators_win_over_single() {
    assert_eq!(
        kinds("a && b || !c == d"),
        vec![
            TokenKind::Identifier,
            TokenKind::DoubleAmpersand,
            TokenKind::Identifier,
            TokenKind::DoublePipe,
            TokenKind::Bang,
            TokenKind::Identifier,
            TokenKind::EqualEqual,
            TokenKind::Identifier,
            TokenKind::Eof,
        ]
    );
    assert_eq!(
        kinds("x++ y-- z => w"),
        vec![
            TokenKind::Identifier,
            TokenKind::PlusPlus,
            TokenKind::Identifier,
            TokenKind::MinusMinus,
            TokenKind::Identifier,
            TokenKind::FatArrow,
            TokenKind::Identifier,
            TokenKind::Eof,
        ]
    );
}

#[test]
fn string_lexemes_hold_the_unescaped_value() {
    let tokens = tokenize(r#"let s = "a\nb\"c";"#);
    let string = tokens
        .iter()
        .find(|token| token.kind == TokenKind::String)
        .expect("should lex a string token");
    assert_eq!(string.lexeme, "a\nb\"c");
}

#[test]
fn dollar_names_are_ordinary_identifiers() {
    let tokens = tokenize("x.$addr");
    assert_eq!(tokens[2].kind, TokenKind::Identifier);
    assert_eq!(tokens[2].lexeme, "$addr");
}

#[test]
fn a_dot_without_a_digit_stays_member_access() {
    assert_eq!(
        kinds("1.foo"),
        vec![
            TokenKind::Int,
            TokenKind::Dot,
            TokenKind::Identifier,
            TokenKind::Eof,
        ]
    );
}

#[test]
fn a_second_dot_in_a_number_is_malformed() {
    let err = Lexer::new("1.2.3").tokenize().expect_err("should fail");
    assert!(
        err.message.contains("only one '.'"),
        "got: {}",
        err.message
    );
}

#[test]
fn unterminated_strings_report_line_and_column() {
    let source = "let x = 1;\nlet y = \"abc";
    let err = Lexer::new(source).tokenize().expect_err("should fail");
    assert!(
        err.message.contains("unterminated string literal"),
        "got: {}",
        err.message
    );
    let span = err.span.expect("diagnostic should carry a span");
    assert_eq!(span.position(source), (2, 9));
}

#[test]
fn comments_are_kept_as_tokens() {
    let tokens = tokenize("// note\nlet x = 1; /* block */");
    assert_eq!(tokens[0].kind, TokenKind::Comment);
    assert_eq!(tokens[0].lexeme, "// note");
    assert!(tokens
        .iter()
        .any(|token| token.kind == TokenKind::BlockComment));
}

#[test]
fn templates_keep_their_raw_text() {
    let tokens = tokenize("`hi {{name}}`");
    assert_eq!(tokens[0].kind, TokenKind::Template);
    assert_eq!(tokens[0].lexeme, "hi {{name}}");

    let tokens = tokenize("<>body {{1 + 2}}</>");
    assert_eq!(tokens[0].kind, TokenKind::TemplateBlock);
    assert_eq!(tokens[0].lexeme, "body {{1 + 2}}");
}

#[test]
fn unterminated_block_comments_are_fatal() {
    let err = Lexer::new("/* open").tokenize().expect_err("should fail");
    assert!(
        err.message.contains("unterminated block comment"),
        "got: {}",
        err.message
    );
}

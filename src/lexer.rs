use crate::diagnostics::{Diagnostic, SourceSpan};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Let,
    Const,
    Fn,
    Define,
    Array,
    If,
    Else,
    While,
    For,
    In,
    Return,
    Use,
    As,
    Namespace,
    True,
    False,
    Nil,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Identifier,
    Int,
    Float,
    String,
    Template,
    TemplateBlock,
    Comment,
    BlockComment,
    Keyword(Keyword),
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Colon,
    Semicolon,
    FatArrow,
    Assign,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    PlusPlus,
    MinusMinus,
    DoubleAmpersand,
    DoublePipe,
    Bang,
    BangEqual,
    EqualEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Unknown,
    Eof,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    pub span: SourceSpan,
}

pub struct Lexer<'a> {
    source: &'a str,
    chars: std::str::CharIndices<'a>,
    current: usize,
    peeked: Option<(usize, char)>,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.char_indices(),
            current: 0,
            peeked: None,
        }
    }

    fn bump(&mut self) -> Option<(usize, char)> {
        let next = if let Some((idx, ch)) = self.peeked.take() {
            Some((idx, ch))
        } else {
            self.chars.next()
        };
        if let Some((idx, ch)) = next {
            self.current = idx + ch.len_utf8();
            Some((idx, ch))
        } else {
            None
        }
    }

    fn peek(&mut self) -> Option<(usize, char)> {
        if self.peeked.is_none() {
            self.peeked = self.chars.next();
        }
        self.peeked
    }

    fn match_next(&mut self, expected: char) -> bool {
        if let Some((idx, ch)) = self.peek() {
            if ch == expected {
                self.peeked = None;
                self.current = idx + ch.len_utf8();
                true
            } else {
                false
            }
        } else {
            false
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some((_, ch)) = self.peek() {
            if ch.is_whitespace() {
                self.bump();
            } else {
                break;
            }
        }
    }

    fn identifier_or_keyword(&mut self, start: usize) -> Token {
        while let Some((_, ch)) = self.peek() {
            if ch.is_alphanumeric() || ch == '_' || ch == '$' {
                self.bump();
            } else {
                break;
            }
        }
        let end = self.current;
        let lexeme = self.source[start..end].to_string();
        let kind = keyword_for(&lexeme).unwrap_or(TokenKind::Identifier);
        Token {
            kind,
            lexeme,
            span: SourceSpan { start, end },
        }
    }

    fn number_literal(&mut self, start: usize) -> Result<Token, Diagnostic> {
        let mut end = self.current;
        let mut seen_dot = false;
        while let Some((idx, ch)) = self.peek() {
            match ch {
                '0'..='9' => {
                    self.bump();
                    end = idx + ch.len_utf8();
                }
                '.' if !seen_dot => {
                    // A dot only belongs to the literal when a digit follows;
                    // `1.foo` stays integer plus member access.
                    let mut ahead = self.chars.clone();
                    match ahead.next() {
                        Some((_, '0'..='9')) => {
                            seen_dot = true;
                            self.bump();
                            end = idx + 1;
                        }
                        _ => break,
                    }
                }
                '.' => {
                    return Err(Diagnostic::syntax(
                        "malformed numeric literal: a number may contain only one '.'",
                    )
                    .with_span(SourceSpan { start, end: idx + 1 }));
                }
                _ => break,
            }
        }
        let lexeme = self.source[start..end].to_string();
        let kind = if seen_dot {
            TokenKind::Float
        } else {
            TokenKind::Int
        };
        Ok(Token {
            kind,
            lexeme,
            span: SourceSpan { start, end },
        })
    }

    fn string_literal(&mut self, start: usize, quote: char) -> Result<Token, Diagnostic> {
        let mut end = self.current;
        let mut value = String::new();
        while let Some((idx, ch)) = self.bump() {
            end = idx + ch.len_utf8();
            match ch {
                c if c == quote => {
                    return Ok(Token {
                        kind: TokenKind::String,
                        lexeme: value,
                        span: SourceSpan { start, end },
                    });
                }
                '\\' => {
                    if let Some((_, esc)) = self.bump() {
                        end = idx + 1 + esc.len_utf8();
                        match esc {
                            'n' => value.push('\n'),
                            'r' => value.push('\r'),
                            't' => value.push('\t'),
                            '\\' => value.push('\\'),
                            other => value.push(other),
                        }
                    } else {
                        break;
                    }
                }
                _ => value.push(ch),
            }
        }
        Err(Diagnostic::syntax("unterminated string literal")
            .with_span(SourceSpan { start, end }))
    }

    // Backtick templates keep their raw text; `{{expr}}` splitting happens
    // in the parser so the cached AST sees pre-split parts.
    fn template_literal(&mut self, start: usize) -> Result<Token, Diagnostic> {
        let mut end = self.current;
        let mut value = String::new();
        while let Some((idx, ch)) = self.bump() {
            end = idx + ch.len_utf8();
            match ch {
                '`' => {
                    return Ok(Token {
                        kind: TokenKind::Template,
                        lexeme: value,
                        span: SourceSpan { start, end },
                    });
                }
                '\\' => {
                    if let Some((_, esc)) = self.bump() {
                        end = idx + 1 + esc.len_utf8();
                        if esc != '`' {
                            value.push('\\');
                        }
                        value.push(esc);
                    } else {
                        break;
                    }
                }
                _ => value.push(ch),
            }
        }
        Err(Diagnostic::syntax("unterminated template literal")
            .with_span(SourceSpan { start, end }))
    }

    // `<>` opens a multi-line template block terminated by `</>`.
    fn template_block(&mut self, start: usize) -> Result<Token, Diagnostic> {
        let mut end = self.current;
        let mut value = String::new();
        while let Some((idx, ch)) = self.bump() {
            end = idx + ch.len_utf8();
            if ch == '<' {
                if let Some((_, '/')) = self.peek() {
                    self.bump();
                    if self.match_next('>') {
                        end = self.current;
                        return Ok(Token {
                            kind: TokenKind::TemplateBlock,
                            lexeme: value,
                            span: SourceSpan { start, end },
                        });
                    }
                    value.push('<');
                    value.push('/');
                    continue;
                }
            }
            value.push(ch);
        }
        Err(Diagnostic::syntax("unterminated template block, expected `</>`")
            .with_span(SourceSpan { start, end }))
    }

    fn line_comment(&mut self, start: usize) -> Token {
        while let Some((_, ch)) = self.peek() {
            if ch == '\n' {
                break;
            }
            self.bump();
        }
        let end = self.current;
        Token {
            kind: TokenKind::Comment,
            lexeme: self.source[start..end].to_string(),
            span: SourceSpan { start, end },
        }
    }

    fn block_comment(&mut self, start: usize) -> Result<Token, Diagnostic> {
        let mut depth = 1;
        while let Some((_, ch)) = self.bump() {
            if ch == '/' {
                if let Some((_, '*')) = self.peek() {
                    self.bump();
                    depth += 1;
                }
            } else if ch == '*' {
                if let Some((_, '/')) = self.peek() {
                    self.bump();
                    depth -= 1;
                    if depth == 0 {
                        let end = self.current;
                        return Ok(Token {
                            kind: TokenKind::BlockComment,
                            lexeme: self.source[start..end].to_string(),
                            span: SourceSpan { start, end },
                        });
                    }
                }
            }
        }
        Err(Diagnostic::syntax("unterminated block comment").with_span(SourceSpan {
            start,
            end: self.current,
        }))
    }

    fn simple_token(&mut self, start: usize, kind: TokenKind) -> Token {
        let end = self.current;
        Token {
            kind,
            lexeme: self.source[start..end].to_string(),
            span: SourceSpan { start, end },
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, Diagnostic> {
        let mut tokens = Vec::new();
        loop {
            self.skip_whitespace();
            let (start, ch) = match self.bump() {
                Some(pair) => pair,
                None => {
                    tokens.push(Token {
                        kind: TokenKind::Eof,
                        lexeme: String::new(),
                        span: SourceSpan {
                            start: self.current,
                            end: self.current,
                        },
                    });
                    break;
                }
            };

            let token = match ch {
                c if c.is_alphabetic() || c == '_' || c == '$' => {
                    self.identifier_or_keyword(start)
                }
                '0'..='9' => self.number_literal(start)?,
                '"' | '\'' => self.string_literal(start, ch)?,
                '`' => self.template_literal(start)?,
                '(' => self.simple_token(start, TokenKind::LParen),
                ')' => self.simple_token(start, TokenKind::RParen),
                '{' => self.simple_token(start, TokenKind::LBrace),
                '}' => self.simple_token(start, TokenKind::RBrace),
                '[' => self.simple_token(start, TokenKind::LBracket),
                ']' => self.simple_token(start, TokenKind::RBracket),
                ',' => self.simple_token(start, TokenKind::Comma),
                '.' => self.simple_token(start, TokenKind::Dot),
                ';' => self.simple_token(start, TokenKind::Semicolon),
                ':' => self.simple_token(start, TokenKind::Colon),
                '+' => {
                    if self.match_next('+') {
                        self.simple_token(start, TokenKind::PlusPlus)
                    } else {
                        self.simple_token(start, TokenKind::Plus)
                    }
                }
                '-' => {
                    if self.match_next('-') {
                        self.simple_token(start, TokenKind::MinusMinus)
                    } else {
                        self.simple_token(start, TokenKind::Minus)
                    }
                }
                '*' => self.simple_token(start, TokenKind::Star),
                '%' => self.simple_token(start, TokenKind::Percent),
                '=' => {
                    if self.match_next('>') {
                        self.simple_token(start, TokenKind::FatArrow)
                    } else if self.match_next('=') {
                        self.simple_token(start, TokenKind::EqualEqual)
                    } else {
                        self.simple_token(start, TokenKind::Assign)
                    }
                }
                '!' => {
                    if self.match_next('=') {
                        self.simple_token(start, TokenKind::BangEqual)
                    } else {
                        self.simple_token(start, TokenKind::Bang)
                    }
                }
                '&' => {
                    if self.match_next('&') {
                        self.simple_token(start, TokenKind::DoubleAmpersand)
                    } else {
                        self.simple_token(start, TokenKind::Unknown)
                    }
                }
                '|' => {
                    if self.match_next('|') {
                        self.simple_token(start, TokenKind::DoublePipe)
                    } else {
                        self.simple_token(start, TokenKind::Unknown)
                    }
                }
                '<' => {
                    if self.match_next('>') {
                        self.template_block(start)?
                    } else if self.match_next('=') {
                        self.simple_token(start, TokenKind::LessEqual)
                    } else {
                        self.simple_token(start, TokenKind::Less)
                    }
                }
                '>' => {
                    if self.match_next('=') {
                        self.simple_token(start, TokenKind::GreaterEqual)
                    } else {
                        self.simple_token(start, TokenKind::Greater)
                    }
                }
                '/' => {
                    if self.match_next('/') {
                        self.line_comment(start)
                    } else if self.match_next('*') {
                        self.block_comment(start)?
                    } else {
                        self.simple_token(start, TokenKind::Slash)
                    }
                }
                _ => self.simple_token(start, TokenKind::Unknown),
            };
            tokens.push(token);
        }
        Ok(tokens)
    }
}

fn keyword_for(ident: &str) -> Option<TokenKind> {
    use self::Keyword as Kw;
    let keyword = match ident {
        "let" => Kw::Let,
        "const" => Kw::Const,
        "fn" => Kw::Fn,
        "define" => Kw::Define,
        "array" => Kw::Array,
        "if" => Kw::If,
        "else" => Kw::Else,
        "while" => Kw::While,
        "for" => Kw::For,
        "in" => Kw::In,
        "return" => Kw::Return,
        "use" => Kw::Use,
        "as" => Kw::As,
        "namespace" => Kw::Namespace,
        "true" => Kw::True,
        "false" => Kw::False,
        "nil" => Kw::Nil,
        _ => return None,
    };
    Some(TokenKind::Keyword(keyword))
}

use crate::ast::{Accessor, BinaryOp, Literal, Node, NodeKind, TemplatePart, UnaryOp};
use crate::diagnostics::{Diagnostic, SourceSpan};
use crate::lexer::{Keyword, Lexer, Token, TokenKind};

/// Lexes and parses a source text in one step.
pub fn parse_source(source: &str) -> Result<Vec<Node>, Diagnostic> {
    let tokens = Lexer::new(source).tokenize()?;
    Parser::new(tokens).parse_program()
}

pub struct Parser {
    tokens: Vec<Token>,
    current: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        // Comment tokens are kept in the lexer output for tooling; the
        // grammar never sees them.
        let tokens = tokens
            .into_iter()
            .filter(|t| !matches!(t.kind, TokenKind::Comment | TokenKind::BlockComment))
            .collect();
        Self { tokens, current: 0 }
    }

    pub fn parse_program(mut self) -> Result<Vec<Node>, Diagnostic> {
        let mut nodes = Vec::new();
        while !self.is_at_end() {
            nodes.push(self.parse_statement()?);
        }
        Ok(nodes)
    }

    fn parse_statement(&mut self) -> Result<Node, Diagnostic> {
        let token = match self.peek() {
            Some(token) => token.clone(),
            None => return Err(self.error_eof("expected a statement, got end of input")),
        };
        match &token.kind {
            TokenKind::Keyword(Keyword::Let) => self.parse_declaration(true),
            TokenKind::Keyword(Keyword::Const) => self.parse_declaration(false),
            TokenKind::Keyword(Keyword::Fn) => {
                // `fn name(...)` declares; `fn(...)` is a lambda expression.
                if matches!(
                    self.peek_next().map(|t| &t.kind),
                    Some(TokenKind::Identifier)
                ) {
                    self.parse_function()
                } else {
                    self.parse_expression_statement()
                }
            }
            TokenKind::Keyword(Keyword::Define) => self.parse_define(),
            TokenKind::Keyword(Keyword::If) => self.parse_if(),
            TokenKind::Keyword(Keyword::While) => self.parse_while(),
            TokenKind::Keyword(Keyword::For) => self.parse_for(),
            TokenKind::Keyword(Keyword::Return) => self.parse_return(),
            TokenKind::Keyword(Keyword::Use) => self.parse_use(),
            TokenKind::Keyword(Keyword::Namespace) => self.parse_namespace(),
            TokenKind::Identifier => self.parse_identifier_statement(),
            TokenKind::Int
            | TokenKind::Float
            | TokenKind::String
            | TokenKind::Template
            | TokenKind::TemplateBlock
            | TokenKind::LBracket
            | TokenKind::LParen
            | TokenKind::Minus
            | TokenKind::Bang
            | TokenKind::Keyword(Keyword::True)
            | TokenKind::Keyword(Keyword::False)
            | TokenKind::Keyword(Keyword::Nil)
            | TokenKind::Keyword(Keyword::Array) => self.parse_expression_statement(),
            TokenKind::Eof => Err(self.error_eof("expected a statement, got end of input")),
            _ => Err(self.error(
                &token,
                &format!("expected a statement, got `{}`", describe(&token)),
            )),
        }
    }

    fn parse_declaration(&mut self, mutable: bool) -> Result<Node, Diagnostic> {
        let start = self.advance().span.start;
        let name = self.consume_identifier("expected a name after declaration keyword")?;
        self.consume(TokenKind::Assign, "expected `=` in declaration")?;
        let value = self.parse_expression()?;
        self.consume_optional_semicolon();
        let end = value.last().map(|n| n.span.end).unwrap_or(name.span.end);
        Ok(Node::new(
            NodeKind::Declare {
                name: name.lexeme.clone(),
                mutable,
                value,
            },
            SourceSpan { start, end },
        ))
    }

    fn parse_function(&mut self) -> Result<Node, Diagnostic> {
        let start = self.consume_keyword(Keyword::Fn)?.span.start;
        let name = self.consume_identifier("expected function name after `fn`")?;
        let params = self.parse_params()?;
        let (body, end) = self.parse_function_body()?;
        Ok(Node::new(
            NodeKind::Function {
                name: name.lexeme.clone(),
                params,
                body,
            },
            SourceSpan { start, end },
        ))
    }

    fn parse_params(&mut self) -> Result<Vec<String>, Diagnostic> {
        self.consume(TokenKind::LParen, "expected `(` after function name")?;
        let mut params = Vec::new();
        if !self.check(TokenKind::RParen) {
            loop {
                let param = self.consume_identifier("expected parameter name")?;
                params.push(param.lexeme.clone());
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RParen, "expected `)` after parameters")?;
        Ok(params)
    }

    // `=> expr` bodies become a synthetic return statement.
    fn parse_function_body(&mut self) -> Result<(Vec<Node>, usize), Diagnostic> {
        if self.matches(TokenKind::FatArrow) {
            let value = self.parse_expression()?;
            self.consume_optional_semicolon();
            let span = expression_span(&value);
            let body = vec![Node::new(NodeKind::Return(Some(value)), span)];
            Ok((body, span.end))
        } else {
            let (body, span) = self.parse_block()?;
            Ok((body, span.end))
        }
    }

    fn parse_define(&mut self) -> Result<Node, Diagnostic> {
        let start = self.consume_keyword(Keyword::Define)?.span.start;
        let name = self.consume_identifier("expected definition name after `define`")?;
        let (body, span) = self.parse_block()?;
        Ok(Node::new(
            NodeKind::Define {
                name: name.lexeme.clone(),
                body,
            },
            SourceSpan {
                start,
                end: span.end,
            },
        ))
    }

    fn parse_if(&mut self) -> Result<Node, Diagnostic> {
        let start = self.consume_keyword(Keyword::If)?.span.start;
        let condition = self.parse_expression()?;
        let (then_branch, mut span) = self.parse_block()?;
        let else_branch = if self.matches_keyword(Keyword::Else) {
            if self.check(TokenKind::Keyword(Keyword::If)) {
                let chained = self.parse_if()?;
                span.end = chained.span.end;
                Some(vec![chained])
            } else {
                let (body, block_span) = self.parse_block()?;
                span.end = block_span.end;
                Some(body)
            }
        } else {
            None
        };
        Ok(Node::new(
            NodeKind::If {
                condition,
                then_branch,
                else_branch,
            },
            SourceSpan {
                start,
                end: span.end,
            },
        ))
    }

    fn parse_while(&mut self) -> Result<Node, Diagnostic> {
        let start = self.consume_keyword(Keyword::While)?.span.start;
        let condition = self.parse_expression()?;
        let (body, span) = self.parse_block()?;
        Ok(Node::new(
            NodeKind::While { condition, body },
            SourceSpan {
                start,
                end: span.end,
            },
        ))
    }

    fn parse_for(&mut self) -> Result<Node, Diagnostic> {
        let start = self.consume_keyword(Keyword::For)?.span.start;
        let binding = self.consume_identifier("expected loop binding after `for`")?;
        self.consume_keyword(Keyword::In)?;
        let iterable = self.parse_expression()?;
        let (body, span) = self.parse_block()?;
        Ok(Node::new(
            NodeKind::For {
                binding: binding.lexeme.clone(),
                iterable,
                body,
            },
            SourceSpan {
                start,
                end: span.end,
            },
        ))
    }

    fn parse_return(&mut self) -> Result<Node, Diagnostic> {
        let token = self.consume_keyword(Keyword::Return)?;
        let value = if self.check(TokenKind::Semicolon)
            || self.check(TokenKind::RBrace)
            || self.check(TokenKind::Eof)
        {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.consume_optional_semicolon();
        let end = value
            .as_ref()
            .map(|v| expression_span(v).end)
            .unwrap_or(token.span.end);
        Ok(Node::new(
            NodeKind::Return(value),
            SourceSpan {
                start: token.span.start,
                end,
            },
        ))
    }

    fn parse_use(&mut self) -> Result<Node, Diagnostic> {
        let token = self.consume_keyword(Keyword::Use)?;
        let namespace = self.consume_identifier("expected namespace name after `use`")?;
        let mut end = namespace.span.end;
        let alias = if self.matches_keyword(Keyword::As) {
            let alias = self.consume_identifier("expected alias name after `as`")?;
            end = alias.span.end;
            Some(alias.lexeme.clone())
        } else {
            None
        };
        self.consume_optional_semicolon();
        Ok(Node::new(
            NodeKind::Use {
                namespace: namespace.lexeme.clone(),
                alias,
            },
            SourceSpan {
                start: token.span.start,
                end,
            },
        ))
    }

    fn parse_namespace(&mut self) -> Result<Node, Diagnostic> {
        let token = self.consume_keyword(Keyword::Namespace)?;
        let name = self.consume_identifier("expected namespace name after `namespace`")?;
        self.consume_optional_semicolon();
        Ok(Node::new(
            NodeKind::Namespace(name.lexeme.clone()),
            SourceSpan {
                start: token.span.start,
                end: name.span.end,
            },
        ))
    }

    // An identifier opens an assignment, an increment, or an expression
    // statement; one token of look-ahead past the accessor chain decides.
    fn parse_identifier_statement(&mut self) -> Result<Node, Diagnostic> {
        let name = self.consume_identifier("expected identifier")?;
        let start = name.span.start;
        let accessors = self.parse_accessors()?;
        if self.matches(TokenKind::Assign) {
            if matches!(accessors.last(), Some(Accessor::Call(_))) {
                return Err(Diagnostic::syntax("cannot assign to a call result")
                    .with_span(self.previous().span));
            }
            let value = self.parse_expression()?;
            self.consume_optional_semicolon();
            let end = expression_span(&value).end;
            return Ok(Node::new(
                NodeKind::Assign {
                    name: name.lexeme.clone(),
                    accessors,
                    value,
                },
                SourceSpan { start, end },
            ));
        }
        if self.check(TokenKind::PlusPlus) || self.check(TokenKind::MinusMinus) {
            let op = self.advance();
            self.consume_optional_semicolon();
            return Ok(Node::new(
                NodeKind::Increment {
                    name: name.lexeme.clone(),
                    accessors,
                    negative: op.kind == TokenKind::MinusMinus,
                },
                SourceSpan {
                    start,
                    end: op.span.end,
                },
            ));
        }
        let end = self.previous().span.end;
        let first = Node::new(
            NodeKind::Reference {
                name: name.lexeme.clone(),
                accessors,
            },
            SourceSpan { start, end },
        );
        let parts = self.continue_expression(first)?;
        self.consume_optional_semicolon();
        let span = expression_span(&parts);
        Ok(Node::new(NodeKind::Expression(parts), span))
    }

    fn parse_expression_statement(&mut self) -> Result<Node, Diagnostic> {
        let parts = self.parse_expression()?;
        self.consume_optional_semicolon();
        let span = expression_span(&parts);
        Ok(Node::new(NodeKind::Expression(parts), span))
    }

    fn parse_block(&mut self) -> Result<(Vec<Node>, SourceSpan), Diagnostic> {
        let open = self.consume(TokenKind::LBrace, "expected `{`")?;
        let mut body = Vec::new();
        while !self.check(TokenKind::RBrace) {
            if self.is_at_end() {
                return Err(self.error_eof("expected `}`, got end of input"));
            }
            body.push(self.parse_statement()?);
        }
        let close = self.consume(TokenKind::RBrace, "expected `}`")?;
        Ok((
            body,
            SourceSpan {
                start: open.span.start,
                end: close.span.end,
            },
        ))
    }

    /// Parses a flat expression: operand nodes with `Operator` nodes
    /// between them. Precedence is the evaluator's concern.
    fn parse_expression(&mut self) -> Result<Vec<Node>, Diagnostic> {
        let first = self.parse_operand()?;
        self.continue_expression(first)
    }

    fn continue_expression(&mut self, first: Node) -> Result<Vec<Node>, Diagnostic> {
        let mut parts = vec![first];
        while let Some(token) = self.peek() {
            let Some(op) = binary_op_for(&token.kind) else {
                break;
            };
            let span = token.span;
            self.advance();
            parts.push(Node::new(NodeKind::Operator(op), span));
            parts.push(self.parse_operand()?);
        }
        Ok(parts)
    }

    fn parse_expression_to_end(&mut self) -> Result<Vec<Node>, Diagnostic> {
        let parts = self.parse_expression()?;
        if let Some(token) = self.peek() {
            if token.kind != TokenKind::Eof {
                return Err(self.error(
                    &token.clone(),
                    &format!("expected end of expression, got `{}`", describe(token)),
                ));
            }
        }
        Ok(parts)
    }

    fn parse_operand(&mut self) -> Result<Node, Diagnostic> {
        let token = match self.peek() {
            Some(token) => token.clone(),
            None => return Err(self.error_eof("expected an expression, got end of input")),
        };
        match &token.kind {
            TokenKind::Int => {
                self.advance();
                let value: i64 = token.lexeme.parse().map_err(|_| {
                    Diagnostic::syntax(format!(
                        "integer literal `{}` is out of range",
                        token.lexeme
                    ))
                    .with_span(token.span)
                })?;
                Ok(Node::new(NodeKind::Literal(Literal::Int(value)), token.span))
            }
            TokenKind::Float => {
                self.advance();
                let value: f64 = token.lexeme.parse().map_err(|_| {
                    Diagnostic::syntax(format!("malformed float literal `{}`", token.lexeme))
                        .with_span(token.span)
                })?;
                Ok(Node::new(
                    NodeKind::Literal(Literal::Float(value)),
                    token.span,
                ))
            }
            TokenKind::String => {
                self.advance();
                Ok(Node::new(
                    NodeKind::Literal(Literal::String(token.lexeme.clone())),
                    token.span,
                ))
            }
            TokenKind::Template => {
                self.advance();
                let parts = self.split_template(&token, false)?;
                Ok(Node::new(
                    NodeKind::Template {
                        parts,
                        block: false,
                    },
                    token.span,
                ))
            }
            TokenKind::TemplateBlock => {
                self.advance();
                let parts = self.split_template(&token, true)?;
                Ok(Node::new(
                    NodeKind::Template { parts, block: true },
                    token.span,
                ))
            }
            TokenKind::Keyword(Keyword::True) => {
                self.advance();
                Ok(Node::new(
                    NodeKind::Literal(Literal::Bool(true)),
                    token.span,
                ))
            }
            TokenKind::Keyword(Keyword::False) => {
                self.advance();
                Ok(Node::new(
                    NodeKind::Literal(Literal::Bool(false)),
                    token.span,
                ))
            }
            TokenKind::Keyword(Keyword::Nil) => {
                self.advance();
                Ok(Node::new(NodeKind::Literal(Literal::Nil), token.span))
            }
            TokenKind::Identifier => {
                let name = self.advance();
                let accessors = self.parse_accessors()?;
                let end = self.previous().span.end;
                Ok(Node::new(
                    NodeKind::Reference {
                        name: name.lexeme.clone(),
                        accessors,
                    },
                    SourceSpan {
                        start: name.span.start,
                        end,
                    },
                ))
            }
            TokenKind::Keyword(Keyword::Fn) => self.parse_lambda(),
            TokenKind::Keyword(Keyword::Array) => self.parse_array_literal(),
            TokenKind::LBracket => self.parse_list_literal(),
            TokenKind::LParen => {
                let open = self.advance();
                let inner = self.parse_expression()?;
                let close = self.consume(TokenKind::RParen, "expected `)` to close group")?;
                Ok(Node::new(
                    NodeKind::Group(inner),
                    SourceSpan {
                        start: open.span.start,
                        end: close.span.end,
                    },
                ))
            }
            TokenKind::Minus => {
                let op = self.advance();
                let operand = self.parse_operand()?;
                let span = SourceSpan {
                    start: op.span.start,
                    end: operand.span.end,
                };
                Ok(Node::new(
                    NodeKind::Unary {
                        op: UnaryOp::Negate,
                        operand: Box::new(operand),
                    },
                    span,
                ))
            }
            TokenKind::Bang => {
                let op = self.advance();
                let operand = self.parse_operand()?;
                let span = SourceSpan {
                    start: op.span.start,
                    end: operand.span.end,
                };
                Ok(Node::new(
                    NodeKind::Unary {
                        op: UnaryOp::Not,
                        operand: Box::new(operand),
                    },
                    span,
                ))
            }
            TokenKind::Eof => Err(self.error_eof("expected an expression, got end of input")),
            _ => Err(self.error(
                &token,
                &format!("expected an expression, got `{}`", describe(&token)),
            )),
        }
    }

    fn parse_accessors(&mut self) -> Result<Vec<Accessor>, Diagnostic> {
        let mut accessors = Vec::new();
        loop {
            if self.matches(TokenKind::Dot) {
                let member = self.consume_identifier("expected member name after `.`")?;
                accessors.push(Accessor::Member(member.lexeme.clone()));
            } else if self.matches(TokenKind::LBracket) {
                let index = self.parse_expression()?;
                self.consume(TokenKind::RBracket, "expected `]` after index")?;
                accessors.push(Accessor::Index(index));
            } else if self.matches(TokenKind::LParen) {
                let args = self.parse_call_arguments()?;
                accessors.push(Accessor::Call(args));
            } else {
                break;
            }
        }
        Ok(accessors)
    }

    // Argument lists are split on top-level commas with explicit depth
    // counters, so commas inside nested calls and literals stay put.
    fn parse_call_arguments(&mut self) -> Result<Vec<Vec<Node>>, Diagnostic> {
        let chunks = self.collect_group(TokenKind::RParen, ")")?;
        let mut args = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            args.push(Parser::new_raw(chunk).parse_expression_to_end()?);
        }
        Ok(args)
    }

    fn parse_list_literal(&mut self) -> Result<Node, Diagnostic> {
        let open = self.consume(TokenKind::LBracket, "expected `[`")?;
        let chunks = self.collect_group(TokenKind::RBracket, "]")?;
        let close_end = self.previous().span.end;
        let mut elements = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            elements.push(Parser::new_raw(chunk).parse_expression_to_end()?);
        }
        Ok(Node::new(
            NodeKind::ListLiteral(elements),
            SourceSpan {
                start: open.span.start,
                end: close_end,
            },
        ))
    }

    fn parse_array_literal(&mut self) -> Result<Node, Diagnostic> {
        let start = self.consume_keyword(Keyword::Array)?.span.start;
        self.consume(TokenKind::LBrace, "expected `{` after `array`")?;
        let chunks = self.collect_group(TokenKind::RBrace, "}")?;
        let close_end = self.previous().span.end;
        let mut entries = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let mut sub = Parser::new_raw(chunk);
            let key = sub.parse_array_key()?;
            sub.consume(TokenKind::Colon, "expected `:` after array key")?;
            let value = sub.parse_expression_to_end()?;
            entries.push((key, value));
        }
        Ok(Node::new(
            NodeKind::ArrayLiteral(entries),
            SourceSpan {
                start,
                end: close_end,
            },
        ))
    }

    fn parse_array_key(&mut self) -> Result<String, Diagnostic> {
        let token = match self.peek() {
            Some(token) => token.clone(),
            None => return Err(self.error_eof("expected array key")),
        };
        match &token.kind {
            TokenKind::Identifier | TokenKind::String | TokenKind::Keyword(_) => {
                self.advance();
                Ok(token.lexeme.clone())
            }
            _ => Err(self.error(
                &token,
                &format!("expected array key, got `{}`", describe(&token)),
            )),
        }
    }

    fn parse_lambda(&mut self) -> Result<Node, Diagnostic> {
        let start = self.consume_keyword(Keyword::Fn)?.span.start;
        let params = self.parse_params()?;
        let (body, end) = self.parse_function_body()?;
        Ok(Node::new(
            NodeKind::Lambda { params, body },
            SourceSpan { start, end },
        ))
    }

    /// Consumes tokens up to the matching `close` delimiter, splitting on
    /// top-level commas. Parentheses, brackets, and braces are tracked
    /// with independent counters; running out of input is its own error.
    fn collect_group(
        &mut self,
        close: TokenKind,
        close_text: &str,
    ) -> Result<Vec<Vec<Token>>, Diagnostic> {
        let mut chunks: Vec<Vec<Token>> = Vec::new();
        let mut chunk: Vec<Token> = Vec::new();
        let mut parens = 0usize;
        let mut brackets = 0usize;
        let mut braces = 0usize;
        loop {
            let token = match self.peek() {
                Some(token) if token.kind != TokenKind::Eof => token.clone(),
                _ => {
                    return Err(self.error_eof(&format!(
                        "expected `{close_text}`, got end of input"
                    )));
                }
            };
            let balanced = parens == 0 && brackets == 0 && braces == 0;
            if balanced && token.kind == close {
                self.advance();
                if !chunk.is_empty() {
                    chunks.push(chunk);
                } else if !chunks.is_empty() {
                    return Err(self.error(&token, "expected expression before closing delimiter"));
                }
                return Ok(chunks);
            }
            if balanced && token.kind == TokenKind::Comma {
                self.advance();
                if chunk.is_empty() {
                    return Err(self.error(&token, "expected expression before `,`"));
                }
                chunks.push(std::mem::take(&mut chunk));
                continue;
            }
            match token.kind {
                TokenKind::LParen => parens += 1,
                TokenKind::LBracket => brackets += 1,
                TokenKind::LBrace => braces += 1,
                TokenKind::RParen => {
                    if parens == 0 {
                        return Err(self.error(
                            &token,
                            &format!("expected `{close_text}`, got `)`"),
                        ));
                    }
                    parens -= 1;
                }
                TokenKind::RBracket => {
                    if brackets == 0 {
                        return Err(self.error(
                            &token,
                            &format!("expected `{close_text}`, got `]`"),
                        ));
                    }
                    brackets -= 1;
                }
                TokenKind::RBrace => {
                    if braces == 0 {
                        return Err(self.error(
                            &token,
                            &format!("expected `{close_text}`, got `}}`"),
                        ));
                    }
                    braces -= 1;
                }
                _ => {}
            }
            self.advance();
            chunk.push(token);
        }
    }

    // Splits a raw template body into text and `{{expr}}` parts; the
    // expressions are lexed and parsed in place.
    fn split_template(
        &mut self,
        token: &Token,
        block: bool,
    ) -> Result<Vec<TemplatePart>, Diagnostic> {
        let raw = token.lexeme.as_str();
        let delimiter = if block { 2 } else { 1 };
        let mut parts = Vec::new();
        let mut rest = raw;
        let mut consumed = 0usize;
        while let Some(open) = rest.find("{{") {
            if open > 0 {
                parts.push(TemplatePart::Text(rest[..open].to_string()));
            }
            let expr_start = open + 2;
            let close = find_substitution_end(&rest[expr_start..]).ok_or_else(|| {
                Diagnostic::syntax("unterminated `{{` substitution in template")
                    .with_span(token.span)
            })?;
            let expr_text = &rest[expr_start..expr_start + close];
            let offset = token.span.start + delimiter + consumed + expr_start;
            let tokens = Lexer::new(expr_text)
                .tokenize()
                .map_err(|d| d.offset(offset))?;
            let mut nodes = Parser::new(tokens)
                .parse_expression_to_end()
                .map_err(|d| d.offset(offset))?;
            shift_spans(&mut nodes, offset);
            parts.push(TemplatePart::Expr(nodes));
            let next = expr_start + close + 2;
            consumed += next;
            rest = &rest[next..];
        }
        if !rest.is_empty() {
            parts.push(TemplatePart::Text(rest.to_string()));
        }
        Ok(parts)
    }

    fn new_raw(tokens: Vec<Token>) -> Self {
        Self { tokens, current: 0 }
    }

    fn consume_optional_semicolon(&mut self) {
        let _ = self.matches(TokenKind::Semicolon);
    }

    fn matches(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn matches_keyword(&mut self, keyword: Keyword) -> bool {
        if let Some(Token {
            kind: TokenKind::Keyword(k),
            ..
        }) = self.peek()
        {
            if *k == keyword {
                self.advance();
                return true;
            }
        }
        false
    }

    fn consume(&mut self, kind: TokenKind, message: &str) -> Result<Token, Diagnostic> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(match self.peek() {
                Some(token) if token.kind != TokenKind::Eof => {
                    let token = token.clone();
                    self.error(
                        &token,
                        &format!("{message}, got `{}`", describe(&token)),
                    )
                }
                _ => self.error_eof(&format!("{message}, got end of input")),
            })
        }
    }

    fn consume_keyword(&mut self, keyword: Keyword) -> Result<Token, Diagnostic> {
        if let Some(token) = self.peek() {
            if token.kind == TokenKind::Keyword(keyword) {
                return Ok(self.advance());
            }
            let token = token.clone();
            return Err(self.error(
                &token,
                &format!("expected keyword `{keyword:?}`, got `{}`", describe(&token)),
            ));
        }
        Err(self.error_eof("unexpected end of input"))
    }

    fn consume_identifier(&mut self, message: &str) -> Result<Token, Diagnostic> {
        if self.check(TokenKind::Identifier) {
            Ok(self.advance())
        } else {
            Err(match self.peek() {
                Some(token) if token.kind != TokenKind::Eof => {
                    let token = token.clone();
                    self.error(
                        &token,
                        &format!("{message}, got `{}`", describe(&token)),
                    )
                }
                _ => self.error_eof(&format!("{message}, got end of input")),
            })
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        if let Some(token) = self.peek() {
            token.kind == kind
        } else {
            false
        }
    }

    fn advance(&mut self) -> Token {
        if !self.is_at_end() {
            self.current += 1;
        }
        self.previous().clone()
    }

    fn previous(&self) -> &Token {
        &self.tokens[self.current - 1]
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.current)
    }

    fn peek_next(&self) -> Option<&Token> {
        self.tokens.get(self.current + 1)
    }

    fn is_at_end(&self) -> bool {
        matches!(self.peek().map(|t| &t.kind), Some(TokenKind::Eof) | None)
    }

    fn error(&self, token: &Token, message: &str) -> Diagnostic {
        Diagnostic::syntax(message.to_string()).with_span(token.span)
    }

    fn error_eof(&self, message: &str) -> Diagnostic {
        let span = self
            .tokens
            .last()
            .map(|t| t.span)
            .unwrap_or(SourceSpan { start: 0, end: 0 });
        Diagnostic::syntax(message.to_string()).with_span(span)
    }
}

impl Diagnostic {
    fn offset(mut self, by: usize) -> Self {
        if let Some(span) = self.span.as_mut() {
            span.start += by;
            span.end += by;
        }
        self
    }
}

fn expression_span(parts: &[Node]) -> SourceSpan {
    let start = parts.first().map(|n| n.span.start).unwrap_or(0);
    let end = parts.last().map(|n| n.span.end).unwrap_or(start);
    SourceSpan { start, end }
}

fn binary_op_for(kind: &TokenKind) -> Option<BinaryOp> {
    let op = match kind {
        TokenKind::Plus => BinaryOp::Add,
        TokenKind::Minus => BinaryOp::Sub,
        TokenKind::Star => BinaryOp::Mul,
        TokenKind::Slash => BinaryOp::Div,
        TokenKind::Percent => BinaryOp::Mod,
        TokenKind::EqualEqual => BinaryOp::Equal,
        TokenKind::BangEqual => BinaryOp::NotEqual,
        TokenKind::Less => BinaryOp::Less,
        TokenKind::LessEqual => BinaryOp::LessEqual,
        TokenKind::Greater => BinaryOp::Greater,
        TokenKind::GreaterEqual => BinaryOp::GreaterEqual,
        TokenKind::DoubleAmpersand => BinaryOp::And,
        TokenKind::DoublePipe => BinaryOp::Or,
        _ => return None,
    };
    Some(op)
}

// Finds the end of a `{{expr}}` substitution, skipping over braces that
// belong to nested literals inside the expression.
fn find_substitution_end(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'}' if depth == 0 && bytes.get(i + 1) == Some(&b'}') => return Some(i),
            b'{' => depth += 1,
            b'}' => depth = depth.saturating_sub(1),
            _ => {}
        }
        i += 1;
    }
    None
}

fn shift_spans(nodes: &mut [Node], offset: usize) {
    for node in nodes {
        node.span.start += offset;
        node.span.end += offset;
        match &mut node.kind {
            NodeKind::Declare { value, .. } => shift_spans(value, offset),
            NodeKind::Function { body, .. } | NodeKind::Define { body, .. } => {
                shift_spans(body, offset)
            }
            NodeKind::Assign {
                accessors, value, ..
            } => {
                shift_accessors(accessors, offset);
                shift_spans(value, offset);
            }
            NodeKind::Increment { accessors, .. } => shift_accessors(accessors, offset),
            NodeKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                shift_spans(condition, offset);
                shift_spans(then_branch, offset);
                if let Some(else_branch) = else_branch {
                    shift_spans(else_branch, offset);
                }
            }
            NodeKind::While { condition, body } => {
                shift_spans(condition, offset);
                shift_spans(body, offset);
            }
            NodeKind::For {
                iterable, body, ..
            } => {
                shift_spans(iterable, offset);
                shift_spans(body, offset);
            }
            NodeKind::Return(value) => {
                if let Some(value) = value {
                    shift_spans(value, offset);
                }
            }
            NodeKind::Expression(parts) | NodeKind::Group(parts) => shift_spans(parts, offset),
            NodeKind::Reference { accessors, .. } => shift_accessors(accessors, offset),
            NodeKind::ListLiteral(elements) => {
                for element in elements {
                    shift_spans(element, offset);
                }
            }
            NodeKind::ArrayLiteral(entries) => {
                for (_, value) in entries {
                    shift_spans(value, offset);
                }
            }
            NodeKind::Lambda { body, .. } => shift_spans(body, offset),
            NodeKind::Template { parts, .. } => {
                for part in parts {
                    if let TemplatePart::Expr(expr) = part {
                        shift_spans(expr, offset);
                    }
                }
            }
            NodeKind::Unary { operand, .. } => {
                shift_spans(std::slice::from_mut(operand.as_mut()), offset)
            }
            NodeKind::Use { .. }
            | NodeKind::Namespace(_)
            | NodeKind::Literal(_)
            | NodeKind::Operator(_) => {}
        }
    }
}

fn shift_accessors(accessors: &mut [Accessor], offset: usize) {
    for accessor in accessors {
        match accessor {
            Accessor::Member(_) => {}
            Accessor::Index(index) => shift_spans(index, offset),
            Accessor::Call(args) => {
                for arg in args {
                    shift_spans(arg, offset);
                }
            }
        }
    }
}

fn describe(token: &Token) -> String {
    match &token.kind {
        TokenKind::Eof => "end of input".to_string(),
        TokenKind::String | TokenKind::Template | TokenKind::TemplateBlock => {
            format!("\"{}\"", token.lexeme)
        }
        _ => token.lexeme.clone(),
    }
}

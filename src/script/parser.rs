// ABOUTME: Recursive-descent parser for the template script language
// ABOUTME: Builds the program tree, applies automatic semicolon insertion and gates `await` by mode

use std::rc::Rc;

use super::ast::*;
use super::error::{Result, ScriptError, STACK_EXCEEDED};
use super::lexer::{tokenize, Token, TokenKind};
use super::value::format_number;

/// Words that can never name a binding.
pub fn is_reserved(word: &str) -> bool {
    matches!(
        word,
        "let"
            | "const"
            | "var"
            | "if"
            | "else"
            | "for"
            | "while"
            | "do"
            | "switch"
            | "case"
            | "default"
            | "break"
            | "continue"
            | "return"
            | "throw"
            | "function"
            | "true"
            | "false"
            | "null"
            | "undefined"
            | "this"
            | "typeof"
            | "new"
            | "in"
            | "instanceof"
            | "void"
            | "delete"
            | "class"
            | "try"
            | "catch"
            | "finally"
            | "await"
    )
}

/// Parse a whole program. `allow_await` selects the async grammar.
pub fn parse_program(source: &str, allow_await: bool) -> Result<Program> {
    let tokens = tokenize(source)?;
    let mut parser = Parser::new(tokens, allow_await);
    let mut body = Vec::new();
    while parser.peek().kind != TokenKind::Eof {
        body.push(parser.parse_statement()?);
    }
    Ok(Program { body })
}

/// Nesting budget shared by statements and expressions, left-nested
/// operator chains included.
const MAX_NESTING_DEPTH: usize = 256;

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    allow_await: bool,
    loop_depth: usize,
    breakable_depth: usize,
    depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>, allow_await: bool) -> Self {
        Self {
            tokens,
            pos: 0,
            allow_await,
            loop_depth: 0,
            breakable_depth: 0,
            depth: 0,
        }
    }

    fn deepen(&mut self) -> Result<()> {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(ScriptError::syntax(STACK_EXCEEDED, self.peek().line));
        }
        self.depth += 1;
        Ok(())
    }

    fn nested<T>(&mut self, parse: fn(&mut Self) -> Result<T>) -> Result<T> {
        self.deepen()?;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn peek(&self) -> &Token {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[(self.pos + offset).min(last)]
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if token.kind != TokenKind::Eof {
            self.pos += 1;
        }
        token
    }

    fn eat_punct(&mut self, punct: &str) -> bool {
        if self.peek().is_punct(punct) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_ident(&mut self, word: &str) -> bool {
        if self.peek().is_ident(word) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, punct: &str) -> Result<Token> {
        if self.peek().is_punct(punct) {
            Ok(self.advance())
        } else {
            Err(self.unexpected())
        }
    }

    fn unexpected(&self) -> ScriptError {
        let token = self.peek();
        ScriptError::syntax(token.describe(), token.line)
    }

    fn expect_binding(&mut self) -> Result<String> {
        match &self.peek().kind {
            TokenKind::Ident(name) if !is_reserved(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected()),
        }
    }

    fn consume_semicolon(&mut self) -> Result<()> {
        if self.eat_punct(";") {
            return Ok(());
        }
        let next = self.peek();
        if next.is_punct("}") || next.kind == TokenKind::Eof || next.newline_before {
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn at_statement_end(&self) -> bool {
        let next = self.peek();
        next.is_punct(";") || next.is_punct("}") || next.kind == TokenKind::Eof || next.newline_before
    }

    // ---------------------------------------------------------------
    // Statements
    // ---------------------------------------------------------------

    fn parse_statement(&mut self) -> Result<Stmt> {
        self.nested(Self::statement)
    }

    fn statement(&mut self) -> Result<Stmt> {
        let line = self.peek().line;
        let word = match &self.peek().kind {
            TokenKind::Punct("{") => {
                self.advance();
                let body = self.parse_block_body()?;
                return Ok(Stmt {
                    kind: StmtKind::Block(body),
                    line,
                });
            }
            TokenKind::Punct(";") => {
                self.advance();
                return Ok(Stmt {
                    kind: StmtKind::Empty,
                    line,
                });
            }
            TokenKind::Ident(word) => word.clone(),
            _ => return self.parse_expression_statement(),
        };

        let kind = match word.as_str() {
            "let" | "const" | "var" => {
                let kind = self.parse_declaration()?;
                self.consume_semicolon()?;
                kind
            }
            "if" => self.parse_if()?,
            "for" => self.parse_for()?,
            "while" => {
                self.advance();
                self.expect_punct("(")?;
                let test = self.parse_expression()?;
                self.expect_punct(")")?;
                let body = Box::new(self.parse_loop_body()?);
                StmtKind::While { test, body }
            }
            "do" => {
                self.advance();
                let body = Box::new(self.parse_loop_body()?);
                if !self.eat_ident("while") {
                    return Err(self.unexpected());
                }
                self.expect_punct("(")?;
                let test = self.parse_expression()?;
                self.expect_punct(")")?;
                self.eat_punct(";");
                StmtKind::DoWhile { body, test }
            }
            "switch" => self.parse_switch()?,
            "break" => {
                self.advance();
                if self.breakable_depth == 0 {
                    return Err(ScriptError::syntax("Illegal break statement", line));
                }
                self.consume_semicolon()?;
                StmtKind::Break
            }
            "continue" => {
                self.advance();
                if self.loop_depth == 0 {
                    return Err(ScriptError::syntax(
                        "Illegal continue statement: no surrounding iteration statement",
                        line,
                    ));
                }
                self.consume_semicolon()?;
                StmtKind::Continue
            }
            "return" => {
                self.advance();
                let value = if self.at_statement_end() {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                self.consume_semicolon()?;
                StmtKind::Return(value)
            }
            "throw" => {
                self.advance();
                if self.peek().newline_before {
                    return Err(ScriptError::syntax("Illegal newline after throw", line));
                }
                let value = self.parse_expression()?;
                self.consume_semicolon()?;
                StmtKind::Throw(value)
            }
            "function" if matches!(self.peek_at(1).kind, TokenKind::Ident(_)) => {
                self.advance();
                let name = self.expect_binding()?;
                let def = self.parse_function_rest(Some(name))?;
                StmtKind::Function(def)
            }
            _ => return self.parse_expression_statement(),
        };

        Ok(Stmt { kind, line })
    }

    fn parse_expression_statement(&mut self) -> Result<Stmt> {
        let line = self.peek().line;
        let expr = self.parse_expression()?;
        self.consume_semicolon()?;
        Ok(Stmt {
            kind: StmtKind::Expr(expr),
            line,
        })
    }

    fn parse_block_body(&mut self) -> Result<Vec<Stmt>> {
        let mut body = Vec::new();
        loop {
            if self.eat_punct("}") {
                return Ok(body);
            }
            if self.peek().kind == TokenKind::Eof {
                return Err(self.unexpected());
            }
            body.push(self.parse_statement()?);
        }
    }

    fn parse_declaration(&mut self) -> Result<StmtKind> {
        let line = self.peek().line;
        let kind = match &self.advance().kind {
            TokenKind::Ident(word) if word == "let" => DeclKind::Let,
            TokenKind::Ident(word) if word == "const" => DeclKind::Const,
            _ => DeclKind::Var,
        };

        let mut declarators = Vec::new();
        loop {
            let name = self.expect_binding()?;
            let init = if self.eat_punct("=") {
                Some(self.parse_assignment()?)
            } else if kind == DeclKind::Const {
                return Err(ScriptError::syntax(
                    "Missing initializer in const declaration",
                    line,
                ));
            } else {
                None
            };
            declarators.push(Declarator { name, init });
            if !self.eat_punct(",") {
                break;
            }
        }

        Ok(StmtKind::Declare { kind, declarators })
    }

    fn parse_if(&mut self) -> Result<StmtKind> {
        self.advance();
        self.expect_punct("(")?;
        let test = self.parse_expression()?;
        self.expect_punct(")")?;
        let consequent = Box::new(self.parse_statement()?);
        let alternate = if self.eat_ident("else") {
            Some(Box::new(self.parse_statement()?))
        } else {
            None
        };
        Ok(StmtKind::If {
            test,
            consequent,
            alternate,
        })
    }

    fn parse_for(&mut self) -> Result<StmtKind> {
        self.advance();
        self.expect_punct("(")?;

        let declared = matches!(&self.peek().kind, TokenKind::Ident(w) if w == "let" || w == "const" || w == "var");
        let offset = usize::from(declared);
        let iteration_word = match (&self.peek_at(offset).kind, &self.peek_at(offset + 1).kind) {
            (TokenKind::Ident(name), TokenKind::Ident(word))
                if !is_reserved(name) && (word == "of" || word == "in") =>
            {
                Some(word.clone())
            }
            _ => None,
        };

        if let Some(word) = iteration_word {
            let kind = if declared {
                match &self.advance().kind {
                    TokenKind::Ident(w) if w == "let" => Some(DeclKind::Let),
                    TokenKind::Ident(w) if w == "const" => Some(DeclKind::Const),
                    _ => Some(DeclKind::Var),
                }
            } else {
                None
            };
            let name = self.expect_binding()?;
            self.advance();
            let source = self.parse_expression()?;
            self.expect_punct(")")?;
            let body = Box::new(self.parse_loop_body()?);
            return Ok(if word == "of" {
                StmtKind::ForOf {
                    kind,
                    name,
                    iterable: source,
                    body,
                }
            } else {
                StmtKind::ForIn {
                    kind,
                    name,
                    object: source,
                    body,
                }
            });
        }

        let init = if self.peek().is_punct(";") {
            None
        } else if declared {
            let line = self.peek().line;
            let kind = self.parse_declaration()?;
            Some(Box::new(Stmt { kind, line }))
        } else {
            let line = self.peek().line;
            let expr = self.parse_expression()?;
            Some(Box::new(Stmt {
                kind: StmtKind::Expr(expr),
                line,
            }))
        };
        self.expect_punct(";")?;
        let test = if self.peek().is_punct(";") {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect_punct(";")?;
        let update = if self.peek().is_punct(")") {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect_punct(")")?;
        let body = Box::new(self.parse_loop_body()?);

        Ok(StmtKind::For {
            init,
            test,
            update,
            body,
        })
    }

    fn parse_loop_body(&mut self) -> Result<Stmt> {
        self.loop_depth += 1;
        self.breakable_depth += 1;
        let body = self.parse_statement();
        self.loop_depth -= 1;
        self.breakable_depth -= 1;
        body
    }

    fn parse_switch(&mut self) -> Result<StmtKind> {
        self.advance();
        self.expect_punct("(")?;
        let discriminant = self.parse_expression()?;
        self.expect_punct(")")?;
        self.expect_punct("{")?;

        self.breakable_depth += 1;
        let cases = self.parse_switch_cases();
        self.breakable_depth -= 1;

        Ok(StmtKind::Switch {
            discriminant,
            cases: cases?,
        })
    }

    fn parse_switch_cases(&mut self) -> Result<Vec<SwitchCase>> {
        let mut cases: Vec<SwitchCase> = Vec::new();
        loop {
            if self.eat_punct("}") {
                return Ok(cases);
            }
            if self.eat_ident("case") {
                let test = self.parse_expression()?;
                self.expect_punct(":")?;
                cases.push(SwitchCase {
                    test: Some(test),
                    body: Vec::new(),
                });
                continue;
            }
            if self.eat_ident("default") {
                self.expect_punct(":")?;
                cases.push(SwitchCase {
                    test: None,
                    body: Vec::new(),
                });
                continue;
            }
            // Only a label may follow `{` directly.
            let Some(case) = cases.last_mut() else {
                return Err(self.unexpected());
            };
            if self.peek().kind == TokenKind::Eof {
                return Err(self.unexpected());
            }
            let statement = self.parse_statement()?;
            case.body.push(statement);
        }
    }

    // ---------------------------------------------------------------
    // Expressions
    // ---------------------------------------------------------------

    fn parse_expression(&mut self) -> Result<Expr> {
        self.parse_assignment()
    }

    fn parse_assignment(&mut self) -> Result<Expr> {
        self.nested(Self::assignment)
    }

    fn assignment(&mut self) -> Result<Expr> {
        if self.is_arrow_start() {
            return self.parse_arrow();
        }

        let target = self.parse_conditional()?;
        let op = match &self.peek().kind {
            TokenKind::Punct(p) => AssignOp::from_punct(p),
            _ => None,
        };
        let Some(op) = op else {
            return Ok(target);
        };

        if !is_assignable(&target) {
            return Err(ScriptError::syntax(
                "Invalid left-hand side in assignment",
                target.line,
            ));
        }
        self.advance();
        let value = self.parse_assignment()?;
        let line = target.line;
        Ok(Expr {
            kind: ExprKind::Assign {
                op,
                target: Box::new(target),
                value: Box::new(value),
            },
            line,
        })
    }

    fn is_arrow_start(&self) -> bool {
        match &self.peek().kind {
            TokenKind::Ident(name) if !is_reserved(name) => self.peek_at(1).is_punct("=>"),
            TokenKind::Punct("(") => {
                let mut depth = 0usize;
                let mut offset = 0;
                loop {
                    let token = self.peek_at(offset);
                    match &token.kind {
                        TokenKind::Punct("(") | TokenKind::Punct("[") | TokenKind::Punct("{") => {
                            depth += 1
                        }
                        TokenKind::Punct(")") | TokenKind::Punct("]") | TokenKind::Punct("}") => {
                            depth -= 1;
                            if depth == 0 {
                                return self.peek_at(offset + 1).is_punct("=>");
                            }
                        }
                        TokenKind::Eof => return false,
                        _ => {}
                    }
                    offset += 1;
                }
            }
            _ => false,
        }
    }

    fn parse_arrow(&mut self) -> Result<Expr> {
        let line = self.peek().line;
        let params = if self.eat_punct("(") {
            self.parse_params_rest()?
        } else {
            vec![self.expect_binding()?]
        };
        self.expect_punct("=>")?;

        let body = if self.eat_punct("{") {
            FunctionBody::Block(self.parse_function_block()?)
        } else {
            FunctionBody::Expr(self.parse_assignment()?)
        };

        Ok(Expr {
            kind: ExprKind::Function(Rc::new(FunctionDef {
                name: None,
                params,
                body,
                is_arrow: true,
            })),
            line,
        })
    }

    /// Parameter names after an opening `(`, through the closing `)`.
    fn parse_params_rest(&mut self) -> Result<Vec<String>> {
        let mut params = Vec::new();
        if self.eat_punct(")") {
            return Ok(params);
        }
        loop {
            params.push(self.expect_binding()?);
            if self.eat_punct(")") {
                return Ok(params);
            }
            self.expect_punct(",")?;
        }
    }

    fn parse_function_rest(&mut self, name: Option<String>) -> Result<Rc<FunctionDef>> {
        self.expect_punct("(")?;
        let params = self.parse_params_rest()?;
        self.expect_punct("{")?;
        let body = self.parse_function_block()?;
        Ok(Rc::new(FunctionDef {
            name,
            params,
            body: FunctionBody::Block(body),
            is_arrow: false,
        }))
    }

    fn parse_function_block(&mut self) -> Result<Vec<Stmt>> {
        let loops = std::mem::take(&mut self.loop_depth);
        let breakables = std::mem::take(&mut self.breakable_depth);
        let body = self.parse_block_body();
        self.loop_depth = loops;
        self.breakable_depth = breakables;
        body
    }

    fn parse_conditional(&mut self) -> Result<Expr> {
        let test = self.parse_logical_or()?;
        if !self.eat_punct("?") {
            return Ok(test);
        }
        let consequent = self.parse_assignment()?;
        self.expect_punct(":")?;
        let alternate = self.parse_assignment()?;
        let line = test.line;
        Ok(Expr {
            kind: ExprKind::Conditional {
                test: Box::new(test),
                consequent: Box::new(consequent),
                alternate: Box::new(alternate),
            },
            line,
        })
    }

    fn parse_logical_or(&mut self) -> Result<Expr> {
        let depth = self.depth;
        let mut left = self.parse_logical_and()?;
        loop {
            let op = if self.eat_punct("||") {
                LogicalOp::Or
            } else if self.eat_punct("??") {
                LogicalOp::Nullish
            } else {
                self.depth = depth;
                return Ok(left);
            };
            self.deepen()?;
            let right = self.parse_logical_and()?;
            left = logical(op, left, right);
        }
    }

    fn parse_logical_and(&mut self) -> Result<Expr> {
        let depth = self.depth;
        let mut left = self.parse_binary(0)?;
        while self.eat_punct("&&") {
            self.deepen()?;
            let right = self.parse_binary(0)?;
            left = logical(LogicalOp::And, left, right);
        }
        self.depth = depth;
        Ok(left)
    }

    /// Equality, relational, additive and multiplicative levels.
    fn parse_binary(&mut self, level: usize) -> Result<Expr> {
        const LEVELS: [&[&str]; 4] = [
            &["==", "!=", "===", "!=="],
            &["<", ">", "<=", ">="],
            &["+", "-"],
            &["*", "/", "%"],
        ];
        if level == LEVELS.len() {
            return self.parse_unary();
        }

        let depth = self.depth;
        let mut left = self.parse_binary(level + 1)?;
        loop {
            let op = match &self.peek().kind {
                TokenKind::Punct(p) if LEVELS[level].contains(p) => BinaryOp::from_punct(p),
                _ => None,
            };
            let Some(op) = op else {
                self.depth = depth;
                return Ok(left);
            };
            self.deepen()?;
            self.advance();
            let right = self.parse_binary(level + 1)?;
            let line = left.line;
            left = Expr {
                kind: ExprKind::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                line,
            };
        }
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        self.nested(Self::unary)
    }

    fn unary(&mut self) -> Result<Expr> {
        let token = self.peek().clone();
        let line = token.line;
        let op = match &token.kind {
            TokenKind::Punct("!") => Some(UnaryOp::Not),
            TokenKind::Punct("-") => Some(UnaryOp::Neg),
            TokenKind::Punct("+") => Some(UnaryOp::Plus),
            TokenKind::Ident(word) if word == "typeof" => Some(UnaryOp::TypeOf),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let operand = Box::new(self.parse_unary()?);
            return Ok(Expr {
                kind: ExprKind::Unary { op, operand },
                line,
            });
        }

        if token.is_ident("await") {
            if !self.allow_await {
                return Err(ScriptError::syntax(
                    "await is only valid in async functions and the top level bodies of modules",
                    line,
                ));
            }
            self.advance();
            let operand = Box::new(self.parse_unary()?);
            return Ok(Expr {
                kind: ExprKind::Await(operand),
                line,
            });
        }

        if token.is_punct("++") || token.is_punct("--") {
            self.advance();
            let target = self.parse_unary()?;
            if !is_assignable(&target) {
                return Err(ScriptError::syntax(
                    "Invalid left-hand side expression in prefix operation",
                    line,
                ));
            }
            return Ok(Expr {
                kind: ExprKind::Update {
                    increment: token.is_punct("++"),
                    prefix: true,
                    target: Box::new(target),
                },
                line,
            });
        }

        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr> {
        let expr = self.parse_call_member()?;
        let next = self.peek();
        if (next.is_punct("++") || next.is_punct("--")) && !next.newline_before {
            let increment = next.is_punct("++");
            if !is_assignable(&expr) {
                return Err(ScriptError::syntax(
                    "Invalid left-hand side expression in postfix operation",
                    expr.line,
                ));
            }
            self.advance();
            let line = expr.line;
            return Ok(Expr {
                kind: ExprKind::Update {
                    increment,
                    prefix: false,
                    target: Box::new(expr),
                },
                line,
            });
        }
        Ok(expr)
    }

    fn parse_call_member(&mut self) -> Result<Expr> {
        let depth = self.depth;
        let mut expr = self.parse_primary()?;
        loop {
            let line = expr.line;
            if [".", "?.", "[", "("].iter().any(|p| self.peek().is_punct(p)) {
                self.deepen()?;
            }
            if self.eat_punct(".") {
                let name = self.expect_property_name()?;
                expr = member(expr, Property::Named(name), false, line);
            } else if self.eat_punct("?.") {
                if self.eat_punct("(") {
                    let args = self.parse_args_rest()?;
                    expr = call(expr, args, true, line);
                } else if self.eat_punct("[") {
                    let property = self.parse_expression()?;
                    self.expect_punct("]")?;
                    expr = member(expr, Property::Computed(Box::new(property)), true, line);
                } else {
                    let name = self.expect_property_name()?;
                    expr = member(expr, Property::Named(name), true, line);
                }
            } else if self.eat_punct("[") {
                let property = self.parse_expression()?;
                self.expect_punct("]")?;
                expr = member(expr, Property::Computed(Box::new(property)), false, line);
            } else if self.eat_punct("(") {
                let args = self.parse_args_rest()?;
                expr = call(expr, args, false, line);
            } else {
                self.depth = depth;
                return Ok(expr);
            }
        }
    }

    fn expect_property_name(&mut self) -> Result<String> {
        match &self.peek().kind {
            TokenKind::Ident(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected()),
        }
    }

    fn parse_args_rest(&mut self) -> Result<Vec<Expr>> {
        let mut args = Vec::new();
        loop {
            if self.eat_punct(")") {
                return Ok(args);
            }
            args.push(self.parse_assignment()?);
            if !self.peek().is_punct(")") {
                self.expect_punct(",")?;
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        let token = self.peek().clone();
        let line = token.line;
        let kind = match token.kind {
            TokenKind::Number(value) => {
                self.advance();
                ExprKind::Number(value)
            }
            TokenKind::Str(value) => {
                self.advance();
                ExprKind::Str(value)
            }
            TokenKind::Ident(word) => match word.as_str() {
                "true" | "false" => {
                    self.advance();
                    ExprKind::Bool(word == "true")
                }
                "null" => {
                    self.advance();
                    ExprKind::Null
                }
                "undefined" => {
                    self.advance();
                    ExprKind::Undefined
                }
                "this" => {
                    self.advance();
                    ExprKind::This
                }
                "function" => {
                    self.advance();
                    let name = match &self.peek().kind {
                        TokenKind::Ident(name) if !is_reserved(name) => {
                            let name = name.clone();
                            self.advance();
                            Some(name)
                        }
                        _ => None,
                    };
                    ExprKind::Function(self.parse_function_rest(name)?)
                }
                _ if is_reserved(&word) => return Err(self.unexpected()),
                _ => {
                    self.advance();
                    ExprKind::Ident(word)
                }
            },
            TokenKind::Punct("(") => {
                self.advance();
                let inner = self.parse_expression()?;
                self.expect_punct(")")?;
                return Ok(inner);
            }
            TokenKind::Punct("[") => {
                self.advance();
                let mut elements = Vec::new();
                loop {
                    if self.eat_punct("]") {
                        break;
                    }
                    elements.push(self.parse_assignment()?);
                    if !self.peek().is_punct("]") {
                        self.expect_punct(",")?;
                    }
                }
                ExprKind::Array(elements)
            }
            TokenKind::Punct("{") => {
                self.advance();
                ExprKind::Object(self.parse_object_rest()?)
            }
            _ => return Err(self.unexpected()),
        };
        Ok(Expr { kind, line })
    }

    fn parse_object_rest(&mut self) -> Result<Vec<(String, Expr)>> {
        let mut properties = Vec::new();
        loop {
            if self.eat_punct("}") {
                return Ok(properties);
            }

            let token = self.advance();
            let (key, shorthand_allowed) = match &token.kind {
                TokenKind::Ident(name) => (name.clone(), !is_reserved(name)),
                TokenKind::Str(value) => (value.clone(), false),
                TokenKind::Number(value) => (format_number(*value), false),
                _ => return Err(ScriptError::syntax(token.describe(), token.line)),
            };

            let value = if self.eat_punct(":") {
                self.parse_assignment()?
            } else if self.peek().is_punct("(") {
                Expr {
                    kind: ExprKind::Function(self.parse_function_rest(Some(key.clone()))?),
                    line: token.line,
                }
            } else if shorthand_allowed && (self.peek().is_punct(",") || self.peek().is_punct("}")) {
                Expr {
                    kind: ExprKind::Ident(key.clone()),
                    line: token.line,
                }
            } else {
                return Err(self.unexpected());
            };
            properties.push((key, value));

            if !self.peek().is_punct("}") {
                self.expect_punct(",")?;
            }
        }
    }
}

fn is_assignable(expr: &Expr) -> bool {
    matches!(
        expr.kind,
        ExprKind::Ident(_) | ExprKind::Member { optional: false, .. }
    )
}

fn logical(op: LogicalOp, left: Expr, right: Expr) -> Expr {
    let line = left.line;
    Expr {
        kind: ExprKind::Logical {
            op,
            left: Box::new(left),
            right: Box::new(right),
        },
        line,
    }
}

fn member(object: Expr, property: Property, optional: bool, line: usize) -> Expr {
    Expr {
        kind: ExprKind::Member {
            object: Box::new(object),
            property,
            optional,
        },
        line,
    }
}

fn call(callee: Expr, args: Vec<Expr>, optional: bool, line: usize) -> Expr {
    Expr {
        kind: ExprKind::Call {
            callee: Box::new(callee),
            args,
            optional,
        },
        line,
    }
}

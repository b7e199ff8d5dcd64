use super::ast::*;
use super::error::ParseError;
use super::tokenizer::{source_line, tokenize, Token, TokenKind as TK};

/// Parse exactly one statement/expression.
pub fn parse(src: &str) -> Result<Stmt, ParseError> {
    let mut parser = Parser::new(src)?;
    if parser.at_end() {
        return Err(ParseError::new("Unexpected end of input"));
    }
    let stmt = parser.parse_statement()?;
    parser.skip_separators();
    if !parser.at_end() {
        return Err(parser.unexpected_token());
    }
    Ok(stmt)
}

/// Parse a full sequence of statements.
pub fn parse_program(src: &str) -> Result<Program, ParseError> {
    let mut parser = Parser::new(src)?;
    let mut statements = vec![];
    while !parser.at_end() {
        let stmt = parser.parse_statement()?;
        if matches!(stmt, Stmt::Param(_)) {
            return Err(parser.error_here("error: param declaration outside function atom"));
        }
        statements.push(stmt);
        parser.skip_separators();
    }
    Ok(Program { statements })
}

struct Parser<'a> {
    src: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Result<Self, ParseError> {
        let tokens = tokenize(src)?;
        Ok(Self {
            src,
            tokens,
            pos: 0,
        })
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn check(&self, kind: TK) -> bool {
        self.peek().map(|t| t.kind == kind).unwrap_or(false)
    }

    fn check_at(&self, offset: usize, kind: TK) -> bool {
        self.peek_at(offset)
            .map(|t| t.kind == kind)
            .unwrap_or(false)
    }

    fn check_keyword(&self, word: &str) -> bool {
        self.peek()
            .map(|t| t.kind == TK::Keyword && t.lexeme == word)
            .unwrap_or(false)
    }

    fn check_keyword_at(&self, offset: usize, word: &str) -> bool {
        self.peek_at(offset)
            .map(|t| t.kind == TK::Keyword && t.lexeme == word)
            .unwrap_or(false)
    }

    fn eat(&mut self, kind: TK) -> bool {
        if self.check(kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, word: &str) -> bool {
        if self.check_keyword(word) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TK, message: &str) -> Result<Token, ParseError> {
        if self.check(kind) {
            Ok(self.advance().unwrap())
        } else {
            Err(self.error_here(message))
        }
    }

    fn skip_separators(&mut self) {
        while self.check(TK::Semicolon) || self.check(TK::Comma) {
            self.pos += 1;
        }
    }

    /// The single source line holding the current token.
    fn line_here(&self) -> String {
        let offset = self
            .peek()
            .or_else(|| self.tokens.last())
            .map(|t| t.start)
            .unwrap_or(0);
        source_line(self.src, offset)
    }

    fn error_here(&self, message: impl Into<String>) -> ParseError {
        ParseError::with_line(message, self.line_here())
    }

    fn unexpected_token(&self) -> ParseError {
        match self.peek() {
            Some(t) if t.kind == TK::Semicolon => self.error_here("error: extra semicolon"),
            Some(t) => self.error_here(format!("Unexpected token: {t}")),
            None => ParseError::with_line(
                "Unexpected end of input",
                source_line(self.src, self.src.len().saturating_sub(1)),
            ),
        }
    }

    /// Reconstruct the full logical statement between two token indices,
    /// re-indented consistently. Multi-line constructs report all of their
    /// lines, not just the line of the offending token.
    fn statement_text(&self, start_index: usize) -> String {
        let start = match self.tokens.get(start_index) {
            Some(t) => t.start,
            None => return self.line_here(),
        };
        let end_index = self.pos.min(self.tokens.len().saturating_sub(1));
        let end = self.tokens[end_index].end.min(self.src.len());
        let first = self.src[..start].rfind('\n').map(|i| i + 1).unwrap_or(0);
        let last = self.src[end..]
            .find('\n')
            .map(|i| end + i)
            .unwrap_or(self.src.len());
        self.src[first..last]
            .lines()
            .map(|l| l.trim())
            .filter(|l| !l.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }

    // ------------------------------------------------------------------
    // Statements

    fn parse_statement(&mut self) -> Result<Stmt, ParseError> {
        if self.check(TK::Semicolon) {
            return Err(self.error_here("error: extra semicolon"));
        }
        if self.check_keyword("If") || self.check_keyword("either") {
            return Ok(Stmt::If(self.parse_if()?));
        }
        if self.check_keyword("Loop") {
            return Ok(Stmt::Loop(self.parse_loop()?));
        }
        if self.eat_keyword("return") {
            if self.at_end() || self.check(TK::Semicolon) || self.check(TK::RPar) {
                return Ok(Stmt::Return(None));
            }
            return Ok(Stmt::Return(Some(self.parse_pipeline()?)));
        }
        if self.eat_keyword("end-loop") {
            return Ok(Stmt::EndLoop);
        }
        if self.eat_keyword("restart-loop") {
            return Ok(Stmt::RestartLoop);
        }
        if self.check_keyword("param") {
            return self.parse_param();
        }
        if self.check(TK::Keyname) && self.check_keyword_at(1, "variants") {
            return self.parse_variant_group();
        }
        if self.looks_like_destructure() {
            return self.parse_destructure();
        }
        let start_index = self.pos;
        let expr = self.parse_pipeline()?;
        if self.eat(TK::RebindLeftward) {
            let value = self.parse_pipeline()?;
            self.require_rebind_target(&expr, start_index)?;
            return Ok(Stmt::Rebind {
                target: expr,
                value,
            });
        }
        if self.check(TK::Colon) {
            let name = match &expr {
                Expr::VarInvoke(name) => name.clone(),
                _ => return Err(self.unexpected_token()),
            };
            self.advance();
            if self.at_end() || self.check(TK::Semicolon) || self.check(TK::RPar) {
                return Ok(Stmt::Binding { name, value: None });
            }
            let value = self.parse_pipeline()?;
            return Ok(Stmt::Binding {
                name,
                value: Some(value),
            });
        }
        if self.eat(TK::RebindRightward) {
            if let Some(targets) = self.try_target_list()? {
                return Ok(Stmt::ReverseDestructure {
                    source: expr,
                    targets,
                });
            }
            let start_index = self.pos;
            let target = self.parse_pipeline()?;
            self.require_rebind_target(&target, start_index)?;
            return Ok(Stmt::Rebind {
                target,
                value: expr,
            });
        }
        Ok(Stmt::Expr(expr))
    }

    fn require_rebind_target(
        &self,
        target: &Expr,
        start_index: usize,
    ) -> Result<(), ParseError> {
        match target {
            Expr::VarInvoke(_) | Expr::Index { .. } | Expr::Property { .. } | Expr::Unpack(_) => {
                Ok(())
            }
            _ => Err(ParseError::with_line(
                "error: invalid rebind target",
                self.statement_text(start_index),
            )),
        }
    }

    fn parse_param(&mut self) -> Result<Stmt, ParseError> {
        self.advance(); // param
        let name = self
            .expect(TK::Keyname, "error: expected a keyname after 'param'")?
            .lexeme;
        self.expect(TK::Colon, "error: expected ':' after parameter name")?;
        let default = if self.at_end() || self.check(TK::Semicolon) || self.check(TK::RPar) {
            None
        } else {
            Some(self.parse_pipeline()?)
        };
        Ok(Stmt::Param(Param { name, default }))
    }

    fn parse_variant_group(&mut self) -> Result<Stmt, ParseError> {
        let name = self.advance().unwrap();
        if name.lexeme.starts_with('$') {
            return Err(self.error_here("error: variant group names do not take '$'"));
        }
        self.advance(); // variants
        self.expect(TK::Colon, "error: expected ':' after 'variants'")?;
        let mut tags = vec![];
        loop {
            self.eat_keyword("or");
            let tag = match self.peek() {
                Some(t) if t.kind == TK::Keyname => self.advance().unwrap().lexeme,
                _ => return Err(self.error_here("error: expected a variant tag name")),
            };
            tags.push(tag);
            if !self.eat(TK::Comma) {
                break;
            }
            if self.check(TK::Semicolon) || self.at_end() {
                return Err(self.error_here("error: excess trailing comma"));
            }
        }
        Ok(Stmt::VariantGroupDef {
            group: name.lexeme,
            tags,
        })
    }

    /// Bounded lookahead for `$a, $b: ...` / `$a -> $c, $b: ...` shapes.
    fn looks_like_destructure(&self) -> bool {
        let mut i = 0;
        let mut saw_comma = false;
        loop {
            if !self.check_at(i, TK::Keyname) {
                return false;
            }
            i += 1;
            if self.check_at(i, TK::Arrow) {
                if !self.check_at(i + 1, TK::Keyname) {
                    return false;
                }
                i += 2;
            }
            if self.check_at(i, TK::Comma) {
                saw_comma = true;
                i += 1;
                continue;
            }
            return saw_comma && self.check_at(i, TK::Colon);
        }
    }

    fn parse_destructure(&mut self) -> Result<Stmt, ParseError> {
        let start_index = self.pos;
        let targets = self.parse_target_list()?;
        self.expect(TK::Colon, "error: expected ':' in destructuring")?;
        let source = self.parse_pipeline()?;
        self.check_duplicate_targets(&targets, start_index)?;
        Ok(Stmt::Destructure { targets, source })
    }

    fn parse_target_list(&mut self) -> Result<Vec<DestructureTarget>, ParseError> {
        let mut targets = vec![];
        loop {
            let name = self
                .expect(TK::Keyname, "error: expected a keyname in destructuring")?
                .lexeme;
            let rename = if self.eat(TK::Arrow) {
                Some(
                    self.expect(TK::Keyname, "error: expected a keyname after '->'")?
                        .lexeme,
                )
            } else {
                None
            };
            targets.push(DestructureTarget { name, rename });
            if !self.eat(TK::Comma) {
                break;
            }
        }
        Ok(targets)
    }

    /// After `:>`, a comma-separated name list is a reverse destructure.
    fn try_target_list(&mut self) -> Result<Option<Vec<DestructureTarget>>, ParseError> {
        let mut i = 0;
        let mut saw_comma = false;
        loop {
            if !self.check_at(i, TK::Keyname) {
                return Ok(None);
            }
            i += 1;
            if self.check_at(i, TK::Arrow) {
                i += 2;
            }
            if self.check_at(i, TK::Comma) {
                saw_comma = true;
                i += 1;
                continue;
            }
            break;
        }
        if !saw_comma {
            return Ok(None);
        }
        let start_index = self.pos;
        let targets = self.parse_target_list()?;
        self.check_duplicate_targets(&targets, start_index)?;
        Ok(Some(targets))
    }

    fn check_duplicate_targets(
        &self,
        targets: &[DestructureTarget],
        start_index: usize,
    ) -> Result<(), ParseError> {
        let mut seen: Vec<&str> = vec![];
        for target in targets {
            let bound = target.rename.as_deref().unwrap_or(&target.name);
            if seen.contains(&bound) {
                return Err(ParseError::with_line(
                    format!("error: duplicate destructure target: {bound}"),
                    self.statement_text(start_index),
                ));
            }
            seen.push(bound);
        }
        Ok(())
    }

    fn parse_if(&mut self) -> Result<IfStatement, ParseError> {
        let either_form = self.check_keyword("either");
        self.advance(); // If / either
        let mut exclusive = true;
        let mut branches = vec![];
        let condition = self.parse_pipeline()?;
        self.expect(TK::Comma, "error: expected ',' after condition")?;
        branches.push((condition, self.parse_block()?));
        let mut else_block = None;
        loop {
            if self.check(TK::Comma) && self.check_keyword_at(1, "or") {
                self.advance();
                self.advance();
                if !either_form {
                    exclusive = false;
                }
                let condition = self.parse_pipeline()?;
                self.expect(TK::Comma, "error: expected ',' after condition")?;
                branches.push((condition, self.parse_block()?));
                continue;
            }
            // `; Else ...` and `, Else ...` both continue the chain.
            let else_offset = if (self.check(TK::Semicolon) || self.check(TK::Comma))
                && self.check_keyword_at(1, "Else")
            {
                1
            } else if self.check_keyword("Else") {
                0
            } else {
                break;
            };
            self.pos += else_offset + 1;
            if self.eat_keyword("if") || self.eat_keyword("If") {
                let condition = self.parse_pipeline()?;
                self.expect(TK::Comma, "error: expected ',' after condition")?;
                branches.push((condition, self.parse_block()?));
                continue;
            }
            self.expect(TK::Comma, "error: expected ',' after 'Else'")?;
            else_block = Some(self.parse_block()?);
            break;
        }
        Ok(IfStatement {
            branches,
            else_block,
            exclusive,
        })
    }

    fn parse_loop(&mut self) -> Result<LoopStatement, ParseError> {
        self.advance(); // Loop
        if self.eat_keyword("while") {
            let condition = self.parse_pipeline()?;
            self.expect(TK::Comma, "error: expected ',' after loop condition")?;
            let body = self.parse_block()?;
            return Ok(LoopStatement {
                kind: LoopKind::While(condition),
                body,
            });
        }
        if self.eat_keyword("for") {
            let by_reference = self.eat(TK::At);
            let name = self
                .expect(TK::Keyname, "error: expected a loop variable")?
                .lexeme;
            let var = if name.starts_with('$') {
                name
            } else {
                format!("${name}")
            };
            if !self.eat_keyword("in") {
                return Err(self.error_here("error: expected 'in' after loop variable"));
            }
            let source = self.parse_pipeline()?;
            self.expect(TK::Comma, "error: expected ',' after loop source")?;
            let body = self.parse_block()?;
            return Ok(LoopStatement {
                kind: LoopKind::For {
                    var,
                    by_reference,
                    source,
                },
                body,
            });
        }
        self.expect(TK::Comma, "error: expected ',' after 'Loop'")?;
        let body = self.parse_block()?;
        Ok(LoopStatement {
            kind: LoopKind::Bare,
            body,
        })
    }

    /// `( statements )` used as the body of If/Loop/pipeline stages.
    fn parse_block(&mut self) -> Result<Vec<Stmt>, ParseError> {
        let start_index = self.pos;
        self.expect(TK::LPar, "error: expected '(' to open a block")?;
        let stmts = self.parse_statements_until(TK::RPar)?;
        if !self.eat(TK::RPar) {
            return Err(ParseError::with_line(
                "error: unmatched parenthesis",
                self.statement_text(start_index),
            ));
        }
        Ok(stmts)
    }

    fn parse_statements_until(&mut self, closer: TK) -> Result<Vec<Stmt>, ParseError> {
        let mut stmts = vec![];
        while !self.at_end() && !self.check(closer) {
            let stmt_index = self.pos;
            let stmt = self.parse_statement()?;
            // Blocks are never a function atom's own statement list, so a
            // param here is always misplaced.
            if matches!(stmt, Stmt::Param(_)) {
                return Err(ParseError::with_line(
                    "error: param declaration outside function atom",
                    source_line(self.src, self.tokens[stmt_index].start),
                ));
            }
            stmts.push(stmt);
            if !self.check(TK::Semicolon) && !self.check(TK::Comma) && !self.check(closer) {
                if self.at_end() {
                    break;
                }
                return Err(self.unexpected_token());
            }
            self.skip_separators();
        }
        Ok(stmts)
    }

    // ------------------------------------------------------------------
    // Expressions, lowest precedence first.

    fn parse_pipeline(&mut self) -> Result<Expr, ParseError> {
        let start_index = self.pos;
        let head = self.parse_logical()?;
        let mut stages = vec![];
        while self.eat_keyword("then") {
            if let Some(t) = self.peek() {
                if t.kind == TK::Keyword
                    && matches!(t.lexeme.as_str(), "is" | "contains" | "and" | "or" | "not")
                {
                    return Err(ParseError::with_line(
                        format!("error: '{}' cannot be used as a pipeline stage", t.lexeme),
                        self.statement_text(start_index),
                    ));
                }
            }
            if self.check_keyword("If") {
                self.advance();
                let condition = self.parse_logical()?;
                self.expect(TK::Comma, "error: expected ',' after condition")?;
                let body = self.parse_block()?;
                stages.push(PipelineStage::Conditional { condition, body });
                continue;
            }
            stages.push(PipelineStage::Expr(self.parse_logical()?));
        }
        if stages.is_empty() {
            Ok(head)
        } else {
            Ok(Expr::Pipeline {
                head: Box::new(head),
                stages,
            })
        }
    }

    fn parse_logical(&mut self) -> Result<Expr, ParseError> {
        let mut node = self.parse_comparison()?;
        loop {
            let op = if self.check_keyword("and") {
                BinOp::And
            } else if self.check_keyword("or") {
                BinOp::Or
            } else {
                break;
            };
            self.advance();
            let right = self.parse_comparison()?;
            node = Expr::Binary {
                op,
                left: Box::new(node),
                right: Box::new(right),
            };
        }
        Ok(node)
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        let mut node = self.parse_additive()?;
        loop {
            let op = if self.check_keyword("is") {
                self.advance();
                if self.eat_keyword("not") {
                    BinOp::IsNot
                } else {
                    BinOp::Is
                }
            } else if self.eat_keyword("contains") {
                BinOp::Contains
            } else if self.eat(TK::Less) {
                BinOp::Less
            } else if self.eat(TK::Greater) {
                BinOp::Greater
            } else if self.eat(TK::LessEqual) {
                BinOp::LessEqual
            } else if self.eat(TK::GreaterEqual) {
                BinOp::GreaterEqual
            } else if self.eat(TK::EqEqual) {
                BinOp::Is
            } else if self.eat(TK::NotEqual) {
                BinOp::IsNot
            } else {
                break;
            };
            let right = self.parse_additive()?;
            node = Expr::Binary {
                op,
                left: Box::new(node),
                right: Box::new(right),
            };
        }
        Ok(node)
    }

    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        let mut node = self.parse_multiplicative()?;
        loop {
            let op = if self.check(TK::Plus) {
                BinOp::Add
            } else if self.check(TK::Minus) {
                BinOp::Sub
            } else {
                break;
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            node = Expr::Binary {
                op,
                left: Box::new(node),
                right: Box::new(right),
            };
        }
        Ok(node)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ParseError> {
        let mut node = self.parse_unary()?;
        loop {
            let op = if self.check(TK::Star) {
                BinOp::Mul
            } else if self.check(TK::Slash) {
                BinOp::Div
            } else {
                break;
            };
            self.advance();
            let right = self.parse_unary()?;
            node = Expr::Binary {
                op,
                left: Box::new(node),
                right: Box::new(right),
            };
        }
        Ok(node)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        if self.eat_keyword("not") {
            return Ok(Expr::Not(Box::new(self.parse_unary()?)));
        }
        if self.check(TK::Minus) {
            self.advance();
            if self.check(TK::Minus) {
                return Err(self.error_here("error: double minus not allowed"));
            }
            let token = self.expect(TK::Number, "error: expected a number after '-'")?;
            let value: f64 = token
                .lexeme
                .parse()
                .map_err(|_| self.error_here("error: malformed number"))?;
            return self.parse_postfix_chain(Expr::Number(-value));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let node = self.parse_atom()?;
        self.parse_postfix_chain(node)
    }

    fn parse_postfix_chain(&mut self, mut node: Expr) -> Result<Expr, ParseError> {
        loop {
            if self.eat(TK::Dot) {
                node = self.parse_index_or_property(node)?;
                continue;
            }
            if self.check(TK::LPar) {
                self.advance();
                let mut args = vec![];
                while !self.check(TK::RPar) {
                    if self.at_end() {
                        return Err(self.error_here("error: unmatched parenthesis"));
                    }
                    args.push(self.parse_pipeline()?);
                    if !self.eat(TK::Comma) {
                        break;
                    }
                }
                self.expect(TK::RPar, "error: unmatched parenthesis")?;
                node = Expr::Invoke {
                    callee: Box::new(node),
                    args,
                };
                continue;
            }
            if self.check(TK::LBrack) {
                match &node {
                    Expr::VarInvoke(name) if !name.starts_with('$') => {
                        let name = name.clone();
                        node = self.parse_blueprint_instantiate(name)?;
                        continue;
                    }
                    _ if self.check_at(1, TK::RBrack) => {
                        self.advance();
                        self.advance();
                        node = Expr::Unpack(Box::new(node));
                        continue;
                    }
                    _ => break,
                }
            }
            break;
        }
        Ok(node)
    }

    fn parse_index_or_property(&mut self, base: Expr) -> Result<Expr, ParseError> {
        let token = match self.advance() {
            Some(t) => t,
            None => return Err(self.unexpected_token()),
        };
        match token.kind {
            // `$l.1.2` tokenizes the index pair as the number `1.2`; each
            // dot-separated component is its own index step.
            TK::Number => {
                let mut node = base;
                for part in token.lexeme.split('.') {
                    let value: f64 = part
                        .parse()
                        .map_err(|_| self.error_here("error: malformed number"))?;
                    node = Expr::Index {
                        base: Box::new(node),
                        index: Box::new(Expr::Number(value)),
                    };
                }
                Ok(node)
            }
            TK::Keyname if token.lexeme.starts_with('$') => Ok(Expr::Index {
                base: Box::new(base),
                index: Box::new(Expr::VarInvoke(token.lexeme)),
            }),
            TK::Keyname => Ok(Expr::Property {
                base: Box::new(base),
                name: token.lexeme,
            }),
            TK::Text => Ok(Expr::Property {
                base: Box::new(base),
                name: token.lexeme,
            }),
            _ => {
                self.pos -= 1;
                Err(self.unexpected_token())
            }
        }
    }

    fn parse_atom(&mut self) -> Result<Expr, ParseError> {
        let token = match self.peek() {
            Some(t) => t.clone(),
            None => return Err(self.unexpected_token()),
        };
        match token.kind {
            TK::Number => {
                self.advance();
                let value: f64 = token
                    .lexeme
                    .parse()
                    .map_err(|_| self.error_here("error: malformed number"))?;
                Ok(Expr::Number(value))
            }
            TK::Text => {
                self.check_interpolation(&token)?;
                self.advance();
                Ok(Expr::Text(token.lexeme))
            }
            TK::Keyname => {
                self.advance();
                Ok(Expr::VarInvoke(token.lexeme))
            }
            TK::At => {
                self.advance();
                let name = self
                    .expect(TK::Keyname, "error: expected a keyname after '@'")?
                    .lexeme;
                Ok(Expr::FunctionRef(name))
            }
            TK::LPar => self.parse_function_atom(),
            TK::LBrack => self.parse_list_atom(),
            TK::LBrace => self.parse_table_atom(),
            TK::BlueprintOpen => self.parse_blueprint_atom(),
            _ => Err(self.unexpected_token()),
        }
    }

    /// Interpolation brackets inside a text literal must balance; the actual
    /// sub-expressions are parsed at evaluation time.
    fn check_interpolation(&self, token: &Token) -> Result<(), ParseError> {
        let mut depth = 0i32;
        for chr in token.lexeme.chars() {
            match chr {
                '<' => depth += 1,
                '>' => {
                    depth -= 1;
                    if depth < 0 {
                        return Err(self.error_here("error: malformed interpolation"));
                    }
                }
                _ => {}
            }
        }
        if depth != 0 {
            return Err(self.error_here("error: unterminated interpolation in text atom"));
        }
        Ok(())
    }

    fn parse_function_atom(&mut self) -> Result<Expr, ParseError> {
        let start_index = self.pos;
        let open = self.expect(TK::LPar, "error: expected '('")?;
        let code_line = source_line(self.src, open.start);
        let mut params: Vec<Param> = vec![];
        let mut body = vec![];
        while !self.at_end() && !self.check(TK::RPar) {
            let stmt_index = self.pos;
            let stmt = self.parse_statement()?;
            match stmt {
                Stmt::Param(param) => {
                    if params.iter().any(|p| p.name == param.name) {
                        return Err(ParseError::with_line(
                            format!("error: duplicate parameter name: {}", param.name),
                            source_line(self.src, self.tokens[stmt_index].start),
                        ));
                    }
                    if !body.is_empty() {
                        return Err(ParseError::with_line(
                            "error: param declarations must come before the function body",
                            source_line(self.src, self.tokens[stmt_index].start),
                        ));
                    }
                    params.push(param);
                }
                other => body.push(other),
            }
            if !self.check(TK::Semicolon) && !self.check(TK::Comma) && !self.check(TK::RPar) {
                return Err(self.unexpected_token());
            }
            self.skip_separators();
        }
        let close = match self.advance() {
            Some(t) if t.kind == TK::RPar => t,
            _ => {
                return Err(ParseError::with_line(
                    "error: unmatched parenthesis",
                    self.statement_text(start_index),
                ))
            }
        };
        let multiline = self.src[open.start..close.end].contains('\n');
        if multiline && !matches!(body.last(), Some(Stmt::Return(_))) && !body.is_empty() {
            return Err(ParseError::with_line(
                "error: multi-line function atom requires an explicit return",
                self.statement_text(start_index),
            ));
        }
        Ok(Expr::FunctionAtom(Box::new(FunctionAtom {
            params,
            body,
            multiline,
            code_line: Some(code_line),
        })))
    }

    fn parse_list_atom(&mut self) -> Result<Expr, ParseError> {
        let start_index = self.pos;
        self.expect(TK::LBrack, "error: expected '['")?;
        if self.check(TK::Comma) {
            if self.check_at(1, TK::RBrack) {
                return Err(self.error_here("error: empty list with just a comma"));
            }
            return Err(self.error_here("error: excess leading comma"));
        }
        let mut items = vec![];
        while !self.check(TK::RBrack) {
            if self.at_end() {
                return Err(ParseError::with_line(
                    "error: unmatched bracket",
                    self.statement_text(start_index),
                ));
            }
            if self.check(TK::Less) {
                self.advance();
                let expr = self.parse_additive()?;
                self.expect(TK::Greater, "error: expected '>' to close a spread")?;
                items.push(ListItem::Spread(expr));
            } else if self.check(TK::Number) && self.check_at(1, TK::Colon) {
                return Err(self.error_here("error: key names cannot be purely numeric"));
            } else if self.check(TK::Keyname) && self.check_at(1, TK::Colon) {
                let key = key_name(&self.advance().unwrap().lexeme);
                self.advance(); // :
                let value = self.parse_pipeline()?;
                items.push(ListItem::KeyValue { key, value });
            } else {
                items.push(ListItem::Value(self.parse_pipeline()?));
            }
            if self.eat(TK::Comma) {
                if self.check(TK::Comma) {
                    return Err(self.error_here("error: double comma in list"));
                }
                if self.check(TK::RBrack) {
                    return Err(self.error_here("error: excess trailing comma"));
                }
            } else if !self.check(TK::RBrack) {
                if self.at_end() {
                    return Err(ParseError::with_line(
                        "error: unmatched bracket",
                        self.statement_text(start_index),
                    ));
                }
                return Err(self.unexpected_token());
            }
        }
        self.advance(); // ]
        Ok(Expr::ListAtom(items))
    }

    fn parse_table_atom(&mut self) -> Result<Expr, ParseError> {
        let start_index = self.pos;
        self.expect(TK::LBrace, "error: expected '{'")?;
        if self.check(TK::Comma) {
            if self.check_at(1, TK::RBrace) {
                return Err(self.error_here("error: empty list with just a comma"));
            }
            return Err(self.error_here("error: excess leading comma"));
        }
        let mut items = vec![];
        while !self.check(TK::RBrace) {
            if self.at_end() {
                return Err(ParseError::with_line(
                    "error: unmatched brace",
                    self.statement_text(start_index),
                ));
            }
            if self.check(TK::Number) && self.check_at(1, TK::Colon) {
                return Err(self.error_here("error: key names cannot be purely numeric"));
            }
            let key = key_name(
                &self
                    .expect(TK::Keyname, "error: expected a key name")?
                    .lexeme,
            );
            self.expect(TK::Colon, "error: expected ':' after key name")?;
            let value = self.parse_pipeline()?;
            items.push((key, value));
            if self.eat(TK::Comma) {
                if self.check(TK::Comma) {
                    return Err(self.error_here("error: double comma in list"));
                }
                if self.check(TK::RBrace) {
                    return Err(self.error_here("error: excess trailing comma"));
                }
            } else if !self.check(TK::RBrace) {
                if self.at_end() {
                    return Err(ParseError::with_line(
                        "error: unmatched brace",
                        self.statement_text(start_index),
                    ));
                }
                return Err(self.unexpected_token());
            }
        }
        self.advance(); // }
        Ok(Expr::TableAtom(items))
    }

    fn parse_blueprint_atom(&mut self) -> Result<Expr, ParseError> {
        let start_index = self.pos;
        self.expect(TK::BlueprintOpen, "error: expected '<['")?;
        let mut fields = vec![];
        while !self.check(TK::BlueprintClose) {
            if self.at_end() {
                return Err(ParseError::with_line(
                    "error: unmatched '<['",
                    self.statement_text(start_index),
                ));
            }
            let key = key_name(
                &self
                    .expect(TK::Keyname, "error: expected a field name")?
                    .lexeme,
            );
            self.expect(TK::Colon, "error: expected ':' after field name")?;
            let value = self.parse_pipeline()?;
            fields.push((key, value));
            if !self.eat(TK::Comma) && !self.check(TK::BlueprintClose) {
                if self.at_end() {
                    return Err(ParseError::with_line(
                        "error: unmatched '<['",
                        self.statement_text(start_index),
                    ));
                }
                return Err(self.unexpected_token());
            }
        }
        self.advance(); // ]>
        Ok(Expr::BlueprintAtom(fields))
    }

    fn parse_blueprint_instantiate(&mut self, name: String) -> Result<Expr, ParseError> {
        let start_index = self.pos;
        self.expect(TK::LBrack, "error: expected '['")?;
        let mut fields = vec![];
        while !self.check(TK::RBrack) {
            if self.at_end() {
                return Err(ParseError::with_line(
                    "error: unmatched bracket",
                    self.statement_text(start_index),
                ));
            }
            let key = key_name(
                &self
                    .expect(TK::Keyname, "error: expected a field name")?
                    .lexeme,
            );
            self.expect(TK::Colon, "error: expected ':' after field name")?;
            let value = self.parse_pipeline()?;
            fields.push((key, value));
            if !self.eat(TK::Comma) && !self.check(TK::RBrack) {
                return Err(self.unexpected_token());
            }
        }
        self.advance(); // ]
        Ok(Expr::BlueprintInstantiate { name, fields })
    }
}

/// Key names are stored without the `$` sigil so `$l.key` and `key:` agree.
fn key_name(lexeme: &str) -> String {
    lexeme.trim_start_matches('$').to_string()
}

use crate::cst::{CstNode, NonTerminal};
use crate::ParseError;
use quaint_lexer::{Lexer, Token, TokenSpan};

/// Binding powers for the binary operators, tightest first. Mirrors the
/// language's precedence table: `::`; `:` `.` `->`; `@` `as`; `* / %`;
/// `+ -`; `<< >>`; relational; equality; `&`; `^`; `|`; `&&`; `||`; `?:`;
/// assignments; `,`.
fn binding_power(token: &Token) -> Option<(u8, bool)> {
    let (bp, right_assoc) = match token {
        Token::PathSep => (160, true),
        Token::Colon => (150, true),
        Token::Dot | Token::Arrow => (150, false),
        Token::At => (140, false),
        Token::As => (139, false),
        Token::Star | Token::Slash | Token::Percent => (130, false),
        Token::Plus | Token::Minus => (120, false),
        Token::Shl | Token::Shr => (110, false),
        Token::Lt | Token::Gt | Token::LtEq | Token::GtEq => (100, false),
        Token::EqEq | Token::NotEq => (90, false),
        Token::Ampersand => (80, false),
        Token::Caret => (70, false),
        Token::Pipe => (60, false),
        Token::AndAnd => (50, false),
        Token::OrOr => (40, false),
        Token::Question => (30, true),
        t if t.is_assignment() => (20, true),
        Token::Comma => (10, true),
        _ => return None,
    };
    Some((bp, right_assoc))
}

const TERNARY_BP: u8 = 30;
// A unary operand binds postfix forms and the tight binary operators
// (`::` `:` `.` `->` `@`) but not `as`
const UNARY_OPERAND_BP: u8 = 140;

pub struct Parser {
    tokens: Vec<TokenSpan>,
    current: usize,
    // While set, a top-level `:` belongs to an enclosing ternary and must
    // not be consumed as a type annotation
    ternary_colon_guard: bool,
    source_len: usize,
}

impl Parser {
    pub fn new(source: &str) -> Result<Self, ParseError> {
        let tokens: Result<Vec<_>, _> = Lexer::new(source).collect();
        let tokens = tokens.map_err(|e| ParseError::Lexer { span: e.span() })?;

        Ok(Self {
            tokens,
            current: 0,
            ternary_colon_guard: false,
            source_len: source.len(),
        })
    }

    /// Parse a whole translation unit: statements up to end of input
    pub fn parse_unit(&mut self) -> Result<CstNode, ParseError> {
        let mut stmts = Vec::new();

        while !self.is_at_end() {
            stmts.push(self.parse_stmt()?);
        }

        Ok(CstNode::interior(NonTerminal::Unit, stmts))
    }

    // ==================== Helpers ====================

    fn is_at_end(&self) -> bool {
        self.current >= self.tokens.len()
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.current).map(|ts| &ts.token)
    }

    fn peek_nth(&self, n: usize) -> Option<&Token> {
        self.tokens.get(self.current + n).map(|ts| &ts.token)
    }

    fn check(&self, kind: &Token) -> bool {
        self.peek()
            .is_some_and(|t| std::mem::discriminant(t) == std::mem::discriminant(kind))
    }

    fn advance(&mut self) -> Option<TokenSpan> {
        let ts = self.tokens.get(self.current).cloned();
        if ts.is_some() {
            self.current += 1;
        }
        ts
    }

    fn here(&self) -> std::ops::Range<usize> {
        self.tokens
            .get(self.current)
            .map(|ts| ts.span.clone())
            .unwrap_or(self.source_len..self.source_len)
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        let found = match self.peek() {
            Some(t) => format!("{:?}", t),
            None => "end of file".to_string(),
        };
        ParseError::Unexpected {
            message: format!("{}, found {}", message.into(), found),
            span: self.here(),
        }
    }

    fn expect(&mut self, kind: &Token, what: &str) -> Result<CstNode, ParseError> {
        if self.check(kind) {
            // advance() cannot fail here
            match self.advance() {
                Some(ts) => Ok(CstNode::Leaf(ts)),
                None => Err(self.error(format!("expected {}", what))),
            }
        } else {
            Err(self.error(format!("expected {}", what)))
        }
    }

    fn leaf(&mut self) -> Result<CstNode, ParseError> {
        self.advance()
            .map(CstNode::Leaf)
            .ok_or_else(|| self.error("unexpected end of file"))
    }

    // ==================== Statements ====================

    fn parse_stmt(&mut self) -> Result<CstNode, ParseError> {
        match self.peek() {
            Some(Token::Type) => self.parse_type_stmt(false),
            Some(Token::Exposed) if self.peek_nth(1) == Some(&Token::Type) => {
                self.parse_type_stmt(true)
            }
            Some(Token::Wait) => self.parse_wait_stmt(),
            Some(Token::Return) => self.parse_return_stmt(),
            Some(Token::LBracket) => self.parse_wlab_stmt(),
            Some(Token::LBrace) => self.parse_block_stmt(false),
            Some(Token::Noint) => self.parse_block_stmt(true),
            Some(Token::If) => {
                let ctrl = self.parse_cond_ctrl()?;
                Ok(CstNode::interior(NonTerminal::Stmt, vec![ctrl]))
            }
            Some(Token::While) => {
                let whil = self.parse_while()?;
                let ctrl = CstNode::interior(NonTerminal::Ctrl, vec![whil]);
                Ok(CstNode::interior(NonTerminal::Stmt, vec![ctrl]))
            }
            Some(Token::Do) => {
                let dowh = self.parse_do_while()?;
                let ctrl = CstNode::interior(NonTerminal::Ctrl, vec![dowh]);
                Ok(CstNode::interior(NonTerminal::Stmt, vec![ctrl]))
            }
            Some(_) => self.parse_decl_expr_or_func(),
            None => Err(self.error("expected a statement")),
        }
    }

    fn parse_type_stmt(&mut self, exposed: bool) -> Result<CstNode, ParseError> {
        let mut children = Vec::new();
        if exposed {
            children.push(self.leaf()?); // exposed
        }
        children.push(self.leaf()?); // type
        children.push(self.parse_expr_toplevel()?);
        children.push(self.expect(&Token::Semicolon, "`;` after type declaration")?);
        Ok(CstNode::interior(NonTerminal::Stmt, children))
    }

    fn parse_wait_stmt(&mut self) -> Result<CstNode, ParseError> {
        let mut children = vec![self.leaf()?]; // wait
        children.push(self.parse_expr_toplevel()?);

        if self.check(&Token::For) {
            children.push(self.leaf()?);
            let expr = self.parse_expr_toplevel()?;
            if self.check(&Token::Msec) || self.check(&Token::Sec) {
                let unit = self.leaf()?;
                let wexp = CstNode::interior(NonTerminal::Wexp, vec![expr, unit]);
                children.push(CstNode::interior(NonTerminal::Expr, vec![wexp]));
            } else {
                children.push(expr);
            }
        } else if self.check(&Token::Until) {
            children.push(self.leaf()?);
            children.push(self.parse_expr_toplevel()?);
        }

        if self.check(&Token::Noblock) {
            children.push(self.leaf()?);
        }

        children.push(self.expect(&Token::Semicolon, "`;` after wait statement")?);
        Ok(CstNode::interior(NonTerminal::Stmt, children))
    }

    fn parse_return_stmt(&mut self) -> Result<CstNode, ParseError> {
        let mut children = vec![self.leaf()?]; // return
        if !self.check(&Token::Semicolon) {
            children.push(self.parse_expr_toplevel()?);
        }
        children.push(self.expect(&Token::Semicolon, "`;` after return")?);
        Ok(CstNode::interior(NonTerminal::Stmt, children))
    }

    fn parse_wlab_stmt(&mut self) -> Result<CstNode, ParseError> {
        let open = self.leaf()?;
        let name = self.parse_expr_toplevel()?;
        let close = self.expect(&Token::RBracket, "`]` after wait label")?;
        Ok(CstNode::interior(NonTerminal::Stmt, vec![open, name, close]))
    }

    fn parse_block_stmt(&mut self, noint: bool) -> Result<CstNode, ParseError> {
        let mut children = Vec::new();
        if noint {
            children.push(self.leaf()?); // noint
        }
        children.push(self.expect(&Token::LBrace, "`{`")?);
        while !self.check(&Token::RBrace) && !self.is_at_end() {
            children.push(self.parse_stmt()?);
        }
        children.push(self.expect(&Token::RBrace, "`}` to close block")?);
        Ok(CstNode::interior(NonTerminal::Stmt, children))
    }

    fn parse_braced_stmts(&mut self, children: &mut Vec<CstNode>) -> Result<(), ParseError> {
        children.push(self.expect(&Token::LBrace, "`{`")?);
        while !self.check(&Token::RBrace) && !self.is_at_end() {
            children.push(self.parse_stmt()?);
        }
        children.push(self.expect(&Token::RBrace, "`}` to close block")?);
        Ok(())
    }

    fn parse_cond_ctrl(&mut self) -> Result<CstNode, ParseError> {
        let mut cond_children = vec![self.leaf()?]; // if
        cond_children.push(self.parse_expr_toplevel()?);
        self.parse_braced_stmts(&mut cond_children)?;
        let cond = CstNode::interior(NonTerminal::Cond, cond_children);

        let mut ctrl_children = vec![cond];

        while self.check(&Token::Elif) {
            let mut elif_children = vec![self.leaf()?];
            elif_children.push(self.parse_expr_toplevel()?);
            self.parse_braced_stmts(&mut elif_children)?;
            ctrl_children.push(CstNode::interior(NonTerminal::Elif, elif_children));
        }

        if self.check(&Token::Else) {
            let mut else_children = vec![self.leaf()?];
            self.parse_braced_stmts(&mut else_children)?;
            ctrl_children.push(CstNode::interior(NonTerminal::Else, else_children));
        }

        let ctrl = CstNode::interior(NonTerminal::Ctrl, ctrl_children);
        Ok(CstNode::interior(NonTerminal::Stmt, vec![ctrl]))
    }

    fn parse_while(&mut self) -> Result<CstNode, ParseError> {
        let mut children = vec![self.leaf()?]; // while
        children.push(self.parse_expr_toplevel()?);
        self.parse_braced_stmts(&mut children)?;
        Ok(CstNode::interior(NonTerminal::Whil, children))
    }

    fn parse_do_while(&mut self) -> Result<CstNode, ParseError> {
        let mut children = vec![self.leaf()?]; // do
        self.parse_braced_stmts(&mut children)?;
        children.push(self.expect(&Token::While, "`while` after do-block")?);
        children.push(self.parse_expr_toplevel()?);
        children.push(self.expect(&Token::Semicolon, "`;` after do-while")?);
        Ok(CstNode::interior(NonTerminal::Dowh, children))
    }

    /// Qualifiers followed by an expression: `;` closes a declaration or
    /// expression statement, `{` opens a function body
    fn parse_decl_expr_or_func(&mut self) -> Result<CstNode, ParseError> {
        let mut children = Vec::new();

        while self.peek().is_some_and(Token::is_qualifier) {
            let q = self.leaf()?;
            children.push(CstNode::interior(NonTerminal::Qual, vec![q]));
        }

        children.push(self.parse_expr_toplevel()?);

        if self.check(&Token::LBrace) {
            self.parse_braced_stmts(&mut children)?;
            let func = CstNode::interior(NonTerminal::Func, children);
            Ok(CstNode::interior(NonTerminal::Stmt, vec![func]))
        } else {
            children.push(self.expect(&Token::Semicolon, "`;` after statement")?);
            Ok(CstNode::interior(NonTerminal::Stmt, children))
        }
    }

    // ==================== Expressions ====================

    fn parse_expr_toplevel(&mut self) -> Result<CstNode, ParseError> {
        let saved = self.ternary_colon_guard;
        self.ternary_colon_guard = false;
        let expr = self.parse_expr_bp(0);
        self.ternary_colon_guard = saved;
        expr
    }

    fn parse_expr_bp(&mut self, min_bp: u8) -> Result<CstNode, ParseError> {
        let mut lhs = self.parse_prefix()?;

        loop {
            let Some(token) = self.peek() else { break };

            let Some((bp, right_assoc)) = binding_power(token) else {
                break;
            };

            if bp < min_bp {
                break;
            }

            if *token == Token::Colon && self.ternary_colon_guard {
                // belongs to the enclosing ternary
                break;
            }

            if *token == Token::Question {
                lhs = self.parse_ternary(lhs)?;
                continue;
            }

            let op = self.leaf()?;
            let rhs = self.parse_expr_bp(if right_assoc { bp } else { bp + 1 })?;
            let bexp = CstNode::interior(NonTerminal::Bexp, vec![lhs, op, rhs]);
            lhs = CstNode::interior(NonTerminal::Expr, vec![bexp]);
        }

        Ok(lhs)
    }

    fn parse_ternary(&mut self, cond: CstNode) -> Result<CstNode, ParseError> {
        let question = self.leaf()?;

        let saved = self.ternary_colon_guard;
        self.ternary_colon_guard = true;
        let tval = self.parse_expr_bp(0);
        self.ternary_colon_guard = saved;
        let tval = tval?;

        let colon = self.expect(&Token::Colon, "`:` in conditional expression")?;
        let fval = self.parse_expr_bp(TERNARY_BP)?;

        let texp =
            CstNode::interior(NonTerminal::Texp, vec![cond, question, tval, colon, fval]);
        Ok(CstNode::interior(NonTerminal::Expr, vec![texp]))
    }

    fn parse_prefix(&mut self) -> Result<CstNode, ParseError> {
        match self.peek() {
            Some(
                Token::Plus
                | Token::Minus
                | Token::Not
                | Token::Tilde
                | Token::Star
                | Token::Ampersand
                | Token::Caret
                | Token::Increment
                | Token::Decrement
                | Token::Sizeof
                | Token::Alignof,
            ) => {
                let op = self.leaf()?;
                let operand = self.parse_expr_bp(UNARY_OPERAND_BP)?;
                let uexp = CstNode::interior(NonTerminal::Uexp, vec![op, operand]);
                Ok(CstNode::interior(NonTerminal::Expr, vec![uexp]))
            }
            _ => {
                let primary = self.parse_primary()?;
                self.parse_postfix_chain(primary)
            }
        }
    }

    fn parse_primary(&mut self) -> Result<CstNode, ParseError> {
        match self.peek() {
            Some(Token::Name(_) | Token::Number(_) | Token::Str(_)) => {
                let leaf = self.leaf()?;
                let atom = CstNode::interior(NonTerminal::Atom, vec![leaf]);
                Ok(CstNode::interior(NonTerminal::Expr, vec![atom]))
            }
            Some(Token::LParen) => {
                let open = self.leaf()?;
                let saved = self.ternary_colon_guard;
                self.ternary_colon_guard = false;
                let inner = self.parse_expr_bp(0);
                self.ternary_colon_guard = saved;
                let inner = inner?;
                let close = self.expect(&Token::RParen, "`)`")?;
                let pexp = CstNode::interior(NonTerminal::Pexp, vec![open, inner, close]);
                Ok(CstNode::interior(NonTerminal::Expr, vec![pexp]))
            }
            _ => Err(self.error("expected an expression")),
        }
    }

    fn parse_postfix_chain(&mut self, mut expr: CstNode) -> Result<CstNode, ParseError> {
        loop {
            match self.peek() {
                Some(Token::LParen) => {
                    let open = self.leaf()?;
                    let mut children = vec![expr, open];
                    if self.check(&Token::RParen) {
                        children.push(self.leaf()?);
                    } else {
                        let saved = self.ternary_colon_guard;
                        self.ternary_colon_guard = false;
                        let args = self.parse_expr_bp(0);
                        self.ternary_colon_guard = saved;
                        children.push(args?);
                        children.push(self.expect(&Token::RParen, "`)` after arguments")?);
                    }
                    let fexp = CstNode::interior(NonTerminal::Fexp, children);
                    expr = CstNode::interior(NonTerminal::Expr, vec![fexp]);
                }
                Some(Token::LBracket) => {
                    let open = self.leaf()?;
                    let saved = self.ternary_colon_guard;
                    self.ternary_colon_guard = false;
                    let index = self.parse_expr_bp(0);
                    self.ternary_colon_guard = saved;
                    let index = index?;
                    let close = self.expect(&Token::RBracket, "`]` after subscript")?;
                    let aexp = CstNode::interior(NonTerminal::Aexp, vec![expr, open, index, close]);
                    expr = CstNode::interior(NonTerminal::Expr, vec![aexp]);
                }
                Some(Token::Increment | Token::Decrement) => {
                    let op = self.leaf()?;
                    let xexp = CstNode::interior(NonTerminal::Xexp, vec![expr, op]);
                    expr = CstNode::interior(NonTerminal::Expr, vec![xexp]);
                }
                _ => break,
            }
        }
        Ok(expr)
    }
}

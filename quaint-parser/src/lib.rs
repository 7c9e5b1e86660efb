// Parser for the Quaint language: tokens in, concrete syntax tree out.
// Interior CST nodes carry non-terminal tags, leaves carry tokens; the AST
// builder in quaint-compiler consumes this tree.

pub mod cst;
mod parser;

pub use cst::{CstNode, NonTerminal};
pub use parser::Parser;

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("invalid token")]
    Lexer { span: std::ops::Range<usize> },

    #[error("{message}")]
    Unexpected {
        message: String,
        span: std::ops::Range<usize>,
    },
}

impl ParseError {
    pub fn span(&self) -> std::ops::Range<usize> {
        match self {
            ParseError::Lexer { span } => span.clone(),
            ParseError::Unexpected { span, .. } => span.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quaint_lexer::Token;

    fn parse(source: &str) -> CstNode {
        Parser::new(source).unwrap().parse_unit().unwrap()
    }

    fn parse_err(source: &str) -> ParseError {
        Parser::new(source).unwrap().parse_unit().unwrap_err()
    }

    /// Strip Expr/Pexp wrappers and render operator structure for assertions
    fn shape(node: &CstNode) -> String {
        match node {
            CstNode::Leaf(ts) => match &ts.token {
                Token::Name(n) => n.clone(),
                Token::Number(n) => n.clone(),
                Token::Str(s) => format!("{:?}", s),
                other => format!("{:?}", other),
            },
            CstNode::Interior { nt, children } => match nt {
                NonTerminal::Expr => shape(&children[0]),
                NonTerminal::Pexp => shape(&children[1]),
                NonTerminal::Atom => shape(&children[0]),
                _ => {
                    let inner: Vec<String> = children.iter().map(shape).collect();
                    format!("({})", inner.join(" "))
                }
            },
        }
    }

    fn first_stmt_expr(unit: &CstNode) -> &CstNode {
        // Stmt[Expr, ;]
        &unit.children()[0].children()[0]
    }

    #[test]
    fn test_precedence_mul_over_add() {
        let unit = parse("a + b * c;");
        assert_eq!(shape(first_stmt_expr(&unit)), "(a Plus (b Star c))");
    }

    #[test]
    fn test_left_associativity() {
        let unit = parse("a - b - c;");
        assert_eq!(shape(first_stmt_expr(&unit)), "((a Minus b) Minus c)");
    }

    #[test]
    fn test_assignment_right_associative() {
        let unit = parse("a = b = c;");
        assert_eq!(shape(first_stmt_expr(&unit)), "(a Assign (b Assign c))");
    }

    #[test]
    fn test_comma_right_nested() {
        let unit = parse("a, b, c: u32;");
        // the declaration list nests rightward so the builder can walk it
        assert_eq!(
            shape(first_stmt_expr(&unit)),
            "(a Comma (b Comma (c Colon u32)))"
        );
    }

    #[test]
    fn test_member_binds_tighter_than_deref() {
        let unit = parse("*p.x;");
        assert_eq!(shape(first_stmt_expr(&unit)), "(Star (p Dot x))");
    }

    #[test]
    fn test_quaintify_call() {
        let unit = parse("~f(x);");
        assert_eq!(shape(first_stmt_expr(&unit)), "(Tilde (f LParen x RParen))");
    }

    #[test]
    fn test_at_probe_with_path() {
        let unit = parse("q@f::checkpoint;");
        assert_eq!(shape(first_stmt_expr(&unit)), "(q At (f PathSep checkpoint))");
    }

    #[test]
    fn test_ternary() {
        let unit = parse("c ? a + 1 : b;");
        assert_eq!(
            shape(first_stmt_expr(&unit)),
            "(c Question (a Plus 1) Colon b)"
        );
    }

    #[test]
    fn test_ternary_in_assignment() {
        let unit = parse("x = c ? a : b;");
        assert_eq!(
            shape(first_stmt_expr(&unit)),
            "(x Assign (c Question a Colon b))"
        );
    }

    #[test]
    fn test_cast_looser_than_at() {
        let unit = parse("x as u8;");
        assert_eq!(shape(first_stmt_expr(&unit)), "(x As u8)");
    }

    #[test]
    fn test_call_and_subscript_chain() {
        let unit = parse("f(a)[1]++;");
        assert_eq!(
            shape(first_stmt_expr(&unit)),
            "(((f LParen a RParen) LBracket 1 RBracket) Increment)"
        );
    }

    #[test]
    fn test_typespec_expression_shapes() {
        let unit = parse("x: ptr(u32[4]);");
        assert_eq!(
            shape(first_stmt_expr(&unit)),
            "(x Colon (ptr LParen (u32 LBracket 4 RBracket) RParen))"
        );
    }

    #[test]
    fn test_function_statement_shape() {
        let unit = parse("f(a: u32): u8 { return x; }");
        let stmt = &unit.children()[0];
        let func = &stmt.children()[0];
        assert_eq!(func.nt(), Some(NonTerminal::Func));
        // signature, {, one stmt, }
        assert_eq!(func.children().len(), 4);
    }

    #[test]
    fn test_if_elif_else() {
        let unit = parse("f() { if a { } elif b { } else { } }");
        let func = &unit.children()[0].children()[0];
        let ctrl = &func.children()[2].children()[0];
        assert_eq!(ctrl.nt(), Some(NonTerminal::Ctrl));
        let kinds: Vec<_> = ctrl.children().iter().map(|c| c.nt()).collect();
        assert_eq!(
            kinds,
            vec![
                Some(NonTerminal::Cond),
                Some(NonTerminal::Elif),
                Some(NonTerminal::Else)
            ]
        );
    }

    #[test]
    fn test_do_while() {
        let unit = parse("f() { do { x; } while a; }");
        let func = &unit.children()[0].children()[0];
        let ctrl = &func.children()[2].children()[0];
        assert_eq!(ctrl.children()[0].nt(), Some(NonTerminal::Dowh));
    }

    #[test]
    fn test_wait_variants() {
        for (src, n) in [
            ("f() { wait q; }", 3),
            ("f() { wait q noblock; }", 4),
            ("f() { wait q for 10 msec; }", 5),
            ("f() { wait q until g::l noblock; }", 6),
        ] {
            let unit = parse(src);
            let func = &unit.children()[0].children()[0];
            let wait = &func.children()[2];
            assert_eq!(wait.children().len(), n, "source: {}", src);
        }
    }

    #[test]
    fn test_wait_for_units_wrap() {
        let unit = parse("f() { wait q for 2 sec; }");
        let func = &unit.children()[0].children()[0];
        let wait = &func.children()[2];
        let wexp = &wait.children()[3];
        assert_eq!(wexp.children()[0].nt(), Some(NonTerminal::Wexp));
    }

    #[test]
    fn test_wait_label_statement() {
        let unit = parse("f() { [checkpoint] }");
        let func = &unit.children()[0].children()[0];
        let wlab = &func.children()[2];
        assert_eq!(wlab.nt(), Some(NonTerminal::Stmt));
        assert_eq!(wlab.children().len(), 3);
    }

    #[test]
    fn test_noint_block() {
        let unit = parse("f() { noint { x; } }");
        let func = &unit.children()[0].children()[0];
        let blok = &func.children()[2];
        assert_eq!(
            blok.children()[0].leaf_token().map(|t| t.token.clone()),
            Some(Token::Noint)
        );
    }

    #[test]
    fn test_error_is_located() {
        let err = parse_err("f() { return + ; }");
        assert!(err.span().start > 0);
    }

    #[test]
    fn test_error_missing_semicolon() {
        let err = parse_err("x: u32");
        assert!(matches!(err, ParseError::Unexpected { .. }));
    }
}

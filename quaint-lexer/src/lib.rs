use logos::Logos;

/// Token types for the Quaint programming language
#[derive(Logos, Debug, Clone, PartialEq, Eq)]
#[logos(skip r"[ \t\r\n\f]+")]
pub enum Token {
    // Keywords
    #[token("if")]
    If,
    #[token("elif")]
    Elif,
    #[token("else")]
    Else,
    #[token("do")]
    Do,
    #[token("while")]
    While,
    #[token("return")]
    Return,
    #[token("type")]
    Type,
    #[token("wait")]
    Wait,
    #[token("for")]
    For,
    #[token("until")]
    Until,
    #[token("noblock")]
    Noblock,
    #[token("msec")]
    Msec,
    #[token("sec")]
    Sec,
    #[token("noint")]
    Noint,
    #[token("const")]
    Const,
    #[token("exposed")]
    Exposed,
    #[token("static")]
    Static,
    #[token("sizeof")]
    Sizeof,
    #[token("alignof")]
    Alignof,
    #[token("as")]
    As,

    // Compound assignment operators
    #[token("+=")]
    PlusAssign,
    #[token("-=")]
    MinusAssign,
    #[token("*=")]
    StarAssign,
    #[token("/=")]
    SlashAssign,
    #[token("%=")]
    PercentAssign,
    #[token("<<=")]
    ShlAssign,
    #[token(">>=")]
    ShrAssign,
    #[token("&=")]
    AmpAssign,
    #[token("^=")]
    CaretAssign,
    #[token("|=")]
    PipeAssign,

    // Operators
    #[token("=")]
    Assign,
    #[token("::")]
    PathSep,
    #[token(":")]
    Colon,
    #[token("@")]
    At,
    #[token(".")]
    Dot,
    #[token("->")]
    Arrow,
    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,
    #[token("<=")]
    LtEq,
    #[token(">=")]
    GtEq,
    #[token("<<")]
    Shl,
    #[token(">>")]
    Shr,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,
    #[token("++")]
    Increment,
    #[token("--")]
    Decrement,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("&")]
    Ampersand,
    #[token("^")]
    Caret,
    #[token("|")]
    Pipe,
    #[token(",")]
    Comma,
    #[token("?")]
    Question,
    #[token("!")]
    Not,
    #[token("~")]
    Tilde,

    // Delimiters
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token(";")]
    Semicolon,

    // Literals
    // Decimal integers only; range is validated where the value is consumed
    #[regex(r"[0-9]+", |lex| lex.slice().to_string())]
    Number(String),

    // String literals are raw bytes between quotes; the language has no
    // escape sequences
    #[regex(r#""[^"]*""#, |lex| {
        let s = lex.slice();
        s[1..s.len() - 1].to_string()
    })]
    Str(String),

    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice().to_string())]
    Name(String),

    // Comments (skip)
    #[regex(r"//[^\n]*", logos::skip)]
    LineComment,

    #[regex(r"/\*([^*]|\*[^/])*\*/", logos::skip)]
    BlockComment,
}

impl Token {
    /// Assignment-family operators, `=` through `|=`
    pub fn is_assignment(&self) -> bool {
        matches!(
            self,
            Token::Assign
                | Token::PlusAssign
                | Token::MinusAssign
                | Token::StarAssign
                | Token::SlashAssign
                | Token::PercentAssign
                | Token::ShlAssign
                | Token::ShrAssign
                | Token::AmpAssign
                | Token::CaretAssign
                | Token::PipeAssign
        )
    }

    pub fn is_qualifier(&self) -> bool {
        matches!(self, Token::Const | Token::Exposed | Token::Static)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TokenSpan {
    pub token: Token,
    pub span: std::ops::Range<usize>,
}

pub struct Lexer<'source> {
    inner: logos::Lexer<'source, Token>,
}

impl<'source> Lexer<'source> {
    pub fn new(source: &'source str) -> Self {
        Self {
            inner: Token::lexer(source),
        }
    }
}

impl<'source> Iterator for Lexer<'source> {
    type Item = Result<TokenSpan, LexError>;

    fn next(&mut self) -> Option<Self::Item> {
        let token = self.inner.next()?;
        let span = self.inner.span();

        match token {
            Ok(tok) => Some(Ok(TokenSpan { token: tok, span })),
            Err(_) => Some(Err(LexError::InvalidToken { span })),
        }
    }
}

/// Tokenize an entire source file, stopping at the first invalid token.
pub fn tokenize(source: &str) -> Result<Vec<TokenSpan>, LexError> {
    Lexer::new(source).collect()
}

#[derive(Debug, thiserror::Error)]
pub enum LexError {
    #[error("invalid token at {span:?}")]
    InvalidToken { span: std::ops::Range<usize> },
}

impl LexError {
    pub fn span(&self) -> std::ops::Range<usize> {
        match self {
            LexError::InvalidToken { span } => span.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        Lexer::new(source).map(|r| r.unwrap().token).collect()
    }

    #[test]
    fn test_keywords() {
        let tokens = kinds("if elif else do while return type wait noint");
        assert_eq!(
            tokens,
            vec![
                Token::If,
                Token::Elif,
                Token::Else,
                Token::Do,
                Token::While,
                Token::Return,
                Token::Type,
                Token::Wait,
                Token::Noint,
            ]
        );
    }

    #[test]
    fn test_keyword_prefix_is_a_name() {
        // maximal munch: "iffy" and "format" are names, not keywords
        let tokens = kinds("iffy format doit");
        assert_eq!(
            tokens,
            vec![
                Token::Name("iffy".to_string()),
                Token::Name("format".to_string()),
                Token::Name("doit".to_string()),
            ]
        );
    }

    #[test]
    fn test_multichar_operators() {
        let tokens = kinds("<<= << <= < :: : -> - ++ + == =");
        assert_eq!(
            tokens,
            vec![
                Token::ShlAssign,
                Token::Shl,
                Token::LtEq,
                Token::Lt,
                Token::PathSep,
                Token::Colon,
                Token::Arrow,
                Token::Minus,
                Token::Increment,
                Token::Plus,
                Token::EqEq,
                Token::Assign,
            ]
        );
    }

    #[test]
    fn test_literals() {
        let tokens = kinds(r#"42 "hello world" x_1"#);
        assert_eq!(
            tokens,
            vec![
                Token::Number("42".to_string()),
                Token::Str("hello world".to_string()),
                Token::Name("x_1".to_string()),
            ]
        );
    }

    #[test]
    fn test_string_has_no_escapes() {
        let tokens = kinds(r#""a\n""#);
        assert_eq!(tokens, vec![Token::Str("a\\n".to_string())]);
    }

    #[test]
    fn test_comments_skipped() {
        let tokens = kinds("a // line\n/* block\nstill */ b");
        assert_eq!(
            tokens,
            vec![Token::Name("a".to_string()), Token::Name("b".to_string())]
        );
    }

    #[test]
    fn test_wait_statement_tokens() {
        let tokens = kinds("wait q for 10 msec noblock;");
        assert_eq!(
            tokens,
            vec![
                Token::Wait,
                Token::Name("q".to_string()),
                Token::For,
                Token::Number("10".to_string()),
                Token::Msec,
                Token::Noblock,
                Token::Semicolon,
            ]
        );
    }

    #[test]
    fn test_invalid_token() {
        let mut lexer = Lexer::new("a $ b");
        assert!(lexer.next().unwrap().is_ok());
        assert!(lexer.next().unwrap().is_err());
    }

    #[test]
    fn test_spans() {
        let mut lexer = Lexer::new("ab  cd");
        assert_eq!(lexer.next().unwrap().unwrap().span, 0..2);
        assert_eq!(lexer.next().unwrap().unwrap().span, 4..6);
    }
}

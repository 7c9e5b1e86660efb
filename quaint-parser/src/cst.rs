use quaint_lexer::TokenSpan;

/// Non-terminal tags of the concrete syntax tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonTerminal {
    Unit,
    Stmt,
    Ctrl,
    Cond,
    Elif,
    Else,
    Dowh,
    Whil,
    Func,
    Qual,
    Atom,
    Expr,
    Fexp,
    Pexp,
    Texp,
    Bexp,
    Uexp,
    Xexp,
    Wexp,
    Aexp,
}

/// Concrete syntax tree node: interior nodes carry a non-terminal tag,
/// leaves carry tokens
#[derive(Debug, Clone, PartialEq)]
pub enum CstNode {
    Leaf(TokenSpan),
    Interior {
        nt: NonTerminal,
        children: Vec<CstNode>,
    },
}

impl CstNode {
    pub fn interior(nt: NonTerminal, children: Vec<CstNode>) -> Self {
        CstNode::Interior { nt, children }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, CstNode::Leaf(_))
    }

    pub fn nt(&self) -> Option<NonTerminal> {
        match self {
            CstNode::Leaf(_) => None,
            CstNode::Interior { nt, .. } => Some(*nt),
        }
    }

    pub fn children(&self) -> &[CstNode] {
        match self {
            CstNode::Leaf(_) => &[],
            CstNode::Interior { children, .. } => children,
        }
    }

    pub fn leaf_token(&self) -> Option<&TokenSpan> {
        match self {
            CstNode::Leaf(ts) => Some(ts),
            CstNode::Interior { .. } => None,
        }
    }

    /// Byte range covering the leftmost through rightmost token
    pub fn span(&self) -> std::ops::Range<usize> {
        let mut left = self;
        while let CstNode::Interior { children, .. } = left {
            match children.first() {
                Some(c) => left = c,
                None => return 0..0,
            }
        }

        let mut right = self;
        while let CstNode::Interior { children, .. } = right {
            match children.last() {
                Some(c) => right = c,
                None => return 0..0,
            }
        }

        match (left, right) {
            (CstNode::Leaf(l), CstNode::Leaf(r)) => l.span.start..r.span.end,
            _ => 0..0,
        }
    }
}

use crate::scopes::ScopeId;
use crate::types::{Type, TypeNamePair};
use serde::{Deserialize, Serialize};

/// Index of a node in the AST arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u32);

/// Index of a function among the unit's functions, in declaration order
pub type FuncId = usize;

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Assign,
    AddAssign,
    SubAssign,
    MulAssign,
    DivAssign,
    ModAssign,
    ShlAssign,
    ShrAssign,
    AndAssign,
    XorAssign,
    OrAssign,
    /// Type annotation `x: T`; same lowering as `as`
    Colon,
    /// `A::b`: enum value access (and label paths under `@`/`wait until`)
    Scope,
    /// `q @ probe`
    At,
    /// `x.m`
    Member,
    /// `p->m`
    Arrow,
    Eq,
    NotEq,
    Lt,
    Gt,
    LtEq,
    GtEq,
    LogicalAnd,
    LogicalOr,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Shl,
    Shr,
    BitAnd,
    BitXor,
    BitOr,
    Comma,
    /// `x as T`
    Cast,
}

impl BinOp {
    pub fn is_assignment(&self) -> bool {
        matches!(
            self,
            BinOp::Assign
                | BinOp::AddAssign
                | BinOp::SubAssign
                | BinOp::MulAssign
                | BinOp::DivAssign
                | BinOp::ModAssign
                | BinOp::ShlAssign
                | BinOp::ShrAssign
                | BinOp::AndAssign
                | BinOp::XorAssign
                | BinOp::OrAssign
        )
    }
}

/// Unary prefix operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnOp {
    /// `+x`, identity
    Plus,
    /// `-x`
    Neg,
    /// `!x`
    Not,
    /// `~x`: wrap in a quaint
    Quaintify,
    /// `*x`: dereference a pointer, or move a quaint's result out
    Deref,
    /// `&x`
    AddrOf,
    /// `^x`: bitwise negation
    BitNot,
    PreInc,
    PreDec,
    SizeOf,
    AlignOf,
}

/// Postfix operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PostOp {
    Inc,
    Dec,
}

/// Right-hand side of a binary expression: an expression, except for
/// `as`/`:` which carry a type specifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BinRhs {
    Expr(NodeId),
    TypeSpec(Type),
}

/// Operand of a unary expression: an expression, except for
/// `sizeof`/`alignof` which carry a type specifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum UnOperand {
    Expr(NodeId),
    TypeSpec(Type),
}

/// Resolution of `q @ probe`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AtProbe {
    Start,
    End,
    Label { func: FuncId, wlab_idx: usize },
}

/// What a name refers to after resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolved {
    Global { decl: NodeId, name_idx: usize },
    Auto { decl: NodeId, name_idx: usize },
    Param { func: NodeId, index: usize },
    Func { node: NodeId, index: FuncId },
    BuiltinConst(crate::builtins::BconId),
    BuiltinFunc(crate::builtins::BfunId),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuncData {
    pub exposed: bool,
    pub name: String,
    pub params: Vec<TypeNamePair>,
    pub ret: Option<Type>,
    /// Wait labels, sorted by name after scope building; labels with the
    /// same spelling share one id
    pub wlabs: Vec<(String, u64)>,
    pub stmts: Vec<NodeId>,
    pub scope: Option<ScopeId>,
    pub index: FuncId,
}

impl FuncData {
    /// Binary-search a wait label by spelling
    pub fn find_wlab(&self, name: &str) -> Option<usize> {
        self.wlabs
            .binary_search_by(|(n, _)| n.as_str().cmp(name))
            .ok()
    }
}

/// One node variant per statement and expression kind. Expressions carry a
/// `ty` attached by the type checker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeKind {
    Unit {
        stmts: Vec<NodeId>,
        scope: Option<ScopeId>,
    },
    TypeDecl {
        exposed: bool,
        name: String,
    },
    Decl {
        constant: bool,
        exposed: bool,
        static_: bool,
        names: Vec<String>,
        ty: Type,
        init: Option<NodeId>,
    },
    Func(FuncData),
    Block {
        noint: bool,
        stmts: Vec<NodeId>,
        scope: Option<ScopeId>,
    },
    Cond {
        if_expr: NodeId,
        if_block: NodeId,
        elifs: Vec<(NodeId, NodeId)>,
        else_block: Option<NodeId>,
    },
    While {
        expr: NodeId,
        stmts: Vec<NodeId>,
        scope: Option<ScopeId>,
    },
    DoWhile {
        expr: NodeId,
        stmts: Vec<NodeId>,
        scope: Option<ScopeId>,
    },
    Return {
        expr: Option<NodeId>,
    },
    Wait {
        quaint: NodeId,
        timeout: Option<NodeId>,
        until: Option<NodeId>,
        noblock: bool,
        /// true when the timeout is in seconds, false for milliseconds
        units_sec: bool,
        /// resolved `until` target
        target: Option<(FuncId, usize)>,
    },
    WaitLabel {
        name: String,
        func: Option<FuncId>,
        id: u64,
    },
    Binary {
        op: BinOp,
        lhs: NodeId,
        rhs: BinRhs,
        ty: Option<Type>,
        /// member index for `.`/`->`
        member_idx: Option<usize>,
        /// probe for `@`
        probe: Option<AtProbe>,
        /// resolved value for enum `::` access
        enum_value: Option<u64>,
    },
    Unary {
        op: UnOp,
        operand: UnOperand,
        ty: Option<Type>,
    },
    Call {
        callee: NodeId,
        args: Vec<NodeId>,
        ty: Option<Type>,
    },
    Postfix {
        op: PostOp,
        lhs: NodeId,
        ty: Option<Type>,
    },
    Index {
        base: NodeId,
        index: NodeId,
        ty: Option<Type>,
    },
    Ternary {
        cond: NodeId,
        tval: NodeId,
        fval: NodeId,
        ty: Option<Type>,
    },
    Name {
        text: String,
        resolved: Option<Resolved>,
        ty: Option<Type>,
    },
    Number {
        value: u64,
        ty: Option<Type>,
    },
    Str {
        value: String,
        ty: Option<Type>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub kind: NodeKind,
    pub parent: Option<NodeId>,
    pub span: std::ops::Range<usize>,
}

/// The AST arena. Node ids index into `nodes`; the unit root is created
/// first and always has id 0.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Ast {
    pub nodes: Vec<Node>,
}

impl Ast {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0 as usize]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0 as usize]
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.node(id).kind
    }

    pub fn span(&self, id: NodeId) -> std::ops::Range<usize> {
        self.node(id).span.clone()
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Type computed for an expression node; panics on non-expressions,
    /// which indicates a compiler bug rather than a user error
    pub fn expr_type(&self, id: NodeId) -> &Type {
        self.try_expr_type(id)
            .unwrap_or_else(|| unreachable!("expression {:?} has no type", id))
    }

    pub fn try_expr_type(&self, id: NodeId) -> Option<&Type> {
        match self.kind(id) {
            NodeKind::Binary { ty, .. }
            | NodeKind::Unary { ty, .. }
            | NodeKind::Call { ty, .. }
            | NodeKind::Postfix { ty, .. }
            | NodeKind::Index { ty, .. }
            | NodeKind::Ternary { ty, .. }
            | NodeKind::Name { ty, .. }
            | NodeKind::Number { ty, .. }
            | NodeKind::Str { ty, .. } => ty.as_ref(),
            _ => None,
        }
    }

    pub fn set_expr_type(&mut self, id: NodeId, new_ty: Type) {
        match &mut self.node_mut(id).kind {
            NodeKind::Binary { ty, .. }
            | NodeKind::Unary { ty, .. }
            | NodeKind::Call { ty, .. }
            | NodeKind::Postfix { ty, .. }
            | NodeKind::Index { ty, .. }
            | NodeKind::Ternary { ty, .. }
            | NodeKind::Name { ty, .. }
            | NodeKind::Number { ty, .. }
            | NodeKind::Str { ty, .. } => *ty = Some(new_ty),
            _ => {}
        }
    }

    pub fn func(&self, id: NodeId) -> Option<&FuncData> {
        match self.kind(id) {
            NodeKind::Func(data) => Some(data),
            _ => None,
        }
    }

    pub fn func_mut(&mut self, id: NodeId) -> Option<&mut FuncData> {
        match &mut self.node_mut(id).kind {
            NodeKind::Func(data) => Some(data),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeKind;

    #[test]
    fn test_arena_ids() {
        let mut ast = Ast::new();
        let root = ast.push(Node {
            kind: NodeKind::Unit {
                stmts: Vec::new(),
                scope: None,
            },
            parent: None,
            span: 0..0,
        });
        let child = ast.push(Node {
            kind: NodeKind::Number {
                value: 7,
                ty: None,
            },
            parent: Some(root),
            span: 0..1,
        });
        assert_eq!(root, NodeId(0));
        assert_eq!(ast.node(child).parent, Some(root));
    }

    #[test]
    fn test_expr_type_roundtrip() {
        let mut ast = Ast::new();
        let id = ast.push(Node {
            kind: NodeKind::Number {
                value: 1,
                ty: None,
            },
            parent: None,
            span: 0..1,
        });
        assert!(ast.try_expr_type(id).is_none());
        ast.set_expr_type(id, Type::scalar(TypeKind::U8));
        assert_eq!(ast.expr_type(id).kind, TypeKind::U8);
    }

    #[test]
    fn test_serialization() {
        let mut ast = Ast::new();
        ast.push(Node {
            kind: NodeKind::Str {
                value: "hi".to_string(),
                ty: None,
            },
            parent: None,
            span: 0..4,
        });
        let json = serde_json::to_string(&ast).unwrap();
        let back: Ast = serde_json::from_str(&json).unwrap();
        assert_eq!(ast.nodes.len(), back.nodes.len());
    }
}

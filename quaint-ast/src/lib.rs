// Shared data model of the Quaint compiler: type descriptors, the typed
// AST arena, lexical scopes, and the built-in tables.

pub mod ast;
pub mod builtins;
pub mod scopes;
pub mod types;

pub use ast::{
    Ast, AtProbe, BinOp, BinRhs, FuncData, FuncId, Node, NodeId, NodeKind, PostOp, Resolved,
    UnOp, UnOperand,
};
pub use builtins::{BconId, BfunId, BCON_COUNT, BFUN_COUNT};
pub use scopes::{ObjKind, Scope, ScopeId, ScopeObj, Scopes};
pub use types::{
    align_up, match_type_name, prim_kind, Type, TypeKind, TypeNameMatch, TypeNamePair, TypeTable,
};

use crate::ast::{FuncId, NodeId};
use crate::builtins::{BconId, BfunId};
use serde::{Deserialize, Serialize};

/// Index of a scope in the scope arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopeId(pub u32);

/// What a scope entry names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjKind {
    /// Marker left in place of duplicated symbols so each duplicate is
    /// reported exactly once
    Duplicate,
    BuiltinConst(BconId),
    BuiltinFunc(BfunId),
    Global { decl: NodeId, name_idx: usize },
    Auto { decl: NodeId, name_idx: usize },
    Func { node: NodeId, index: FuncId },
    Param { func: NodeId, index: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopeObj {
    pub name: String,
    pub kind: ObjKind,
}

/// One lexical scope: entries sorted by name for binary search, plus a
/// link to the enclosing scope
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Scope {
    pub outer: Option<ScopeId>,
    pub objs: Vec<ScopeObj>,
}

impl Scope {
    pub fn find(&self, name: &str) -> Option<&ScopeObj> {
        self.objs
            .binary_search_by(|obj| obj.name.as_str().cmp(name))
            .ok()
            .map(|idx| &self.objs[idx])
    }
}

/// Arena of scopes built once per unit
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Scopes {
    pub scopes: Vec<Scope>,
}

impl Scopes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, scope: Scope) -> ScopeId {
        let id = ScopeId(self.scopes.len() as u32);
        self.scopes.push(scope);
        id
    }

    pub fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.0 as usize]
    }

    pub fn scope_mut(&mut self, id: ScopeId) -> &mut Scope {
        &mut self.scopes[id.0 as usize]
    }

    /// Walk outward through `outer` links looking for `name`. The caller
    /// applies the lexical-position rule for automatics.
    pub fn lookup(&self, from: ScopeId, name: &str) -> Option<&ScopeObj> {
        let mut current = Some(from);

        while let Some(id) = current {
            let scope = self.scope(id);

            if let Some(found) = scope.find(name) {
                if found.kind != ObjKind::Duplicate {
                    return Some(found);
                }
            }

            current = scope.outer;
        }

        None
    }

    /// All names visible from a scope, for "did you mean" suggestions
    pub fn visible_names(&self, from: ScopeId) -> Vec<String> {
        let mut names = Vec::new();
        let mut current = Some(from);

        while let Some(id) = current {
            let scope = self.scope(id);
            names.extend(scope.objs.iter().map(|o| o.name.clone()));
            current = scope.outer;
        }

        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obj(name: &str, kind: ObjKind) -> ScopeObj {
        ScopeObj {
            name: name.to_string(),
            kind,
        }
    }

    #[test]
    fn test_sorted_lookup() {
        let mut scopes = Scopes::new();
        let mut scope = Scope::default();
        scope.objs = vec![
            obj("alpha", ObjKind::BuiltinConst(BconId::Null)),
            obj("beta", ObjKind::BuiltinConst(BconId::True)),
            obj("gamma", ObjKind::BuiltinConst(BconId::False)),
        ];
        let id = scopes.push(scope);

        assert!(scopes.lookup(id, "beta").is_some());
        assert!(scopes.lookup(id, "delta").is_none());
    }

    #[test]
    fn test_outer_chain() {
        let mut scopes = Scopes::new();
        let outer = scopes.push(Scope {
            outer: None,
            objs: vec![obj("g", ObjKind::BuiltinConst(BconId::Null))],
        });
        let inner = scopes.push(Scope {
            outer: Some(outer),
            objs: Vec::new(),
        });

        assert!(scopes.lookup(inner, "g").is_some());
    }

    #[test]
    fn test_duplicate_is_invisible() {
        let mut scopes = Scopes::new();
        let outer = scopes.push(Scope {
            outer: None,
            objs: vec![obj("x", ObjKind::BuiltinConst(BconId::True))],
        });
        let inner = scopes.push(Scope {
            outer: Some(outer),
            objs: vec![obj("x", ObjKind::Duplicate)],
        });

        // the duplicate marker hides the inner entry; lookup reaches the
        // outer binding
        let found = scopes.lookup(inner, "x").unwrap();
        assert_eq!(found.kind, ObjKind::BuiltinConst(BconId::True));
    }
}

// Type checker: computes and attaches a type to every expression, enforces
// the operator constraints, resolves member indices, labels and enum
// values, and quantifies every reachable type descriptor.

use quaint_ast::{
    Ast, AtProbe, BinOp, BinRhs, NodeId, NodeKind, ObjKind, Resolved, ScopeId, Scopes, Type,
    TypeKind, TypeTable, UnOp, UnOperand,
};
use quaint_diagnostics::{fuzzy, Diagnostic, DiagnosticEngine, Span};

pub fn check_types(
    ast: &mut Ast,
    scopes: &Scopes,
    types: &TypeTable,
    engine: &mut DiagnosticEngine,
) {
    let root = ast.root();
    let unit_scope = match ast.kind(root) {
        NodeKind::Unit {
            scope: Some(scope), ..
        } => *scope,
        _ => return,
    };

    let stmts = match ast.kind(root) {
        NodeKind::Unit { stmts, .. } => stmts.clone(),
        _ => Vec::new(),
    };

    let mut checker = Checker {
        ast,
        scopes,
        types,
        engine,
        unit_scope,
    };

    for stmt in stmts {
        match checker.ast.kind(stmt) {
            NodeKind::TypeDecl { .. } => {}
            NodeKind::Decl { .. } => checker.check_decl(stmt, unit_scope),
            NodeKind::Func(_) => checker.check_func(stmt),
            _ => {}
        }
    }
}

/// Quantify a descriptor and everything reachable from it, so later phases
/// can read sizes without touching the AST
fn quantify_deep(ty: &mut Type) {
    ty.quantify();
    match &mut ty.kind {
        TypeKind::Ptr(sub) | TypeKind::Quaint(sub) => quantify_deep(sub),
        TypeKind::Fptr { params, ret } => {
            for p in params.iter_mut() {
                quantify_deep(&mut p.ty);
            }
            if let Some(ret) = ret {
                quantify_deep(ret);
            }
        }
        TypeKind::Struct { members, .. } | TypeKind::Union { members, .. } => {
            for m in members.iter_mut() {
                quantify_deep(&mut m.ty);
            }
        }
        _ => {}
    }
}

struct Checker<'a> {
    ast: &'a mut Ast,
    scopes: &'a Scopes,
    types: &'a TypeTable,
    engine: &'a mut DiagnosticEngine,
    unit_scope: ScopeId,
}

impl<'a> Checker<'a> {
    fn invalid(&mut self, message: impl Into<String>, node: NodeId) {
        let span = self.ast.span(node);
        self.engine.emit_error(message, Span::from_range(span));
    }

    // ==================== Statements ====================

    fn check_decl(&mut self, decl: NodeId, scope: ScopeId) {
        let (mut ty, init) = match self.ast.kind(decl) {
            NodeKind::Decl { ty, init, .. } => (ty.clone(), *init),
            _ => return,
        };

        if let Some(init) = init {
            if let Some(init_ty) = self.expr(init, scope) {
                if !ty.equivalent(&init_ty) {
                    self.invalid("init type does not match decl type", decl);
                }
            }
        }

        quantify_deep(&mut ty);
        if let NodeKind::Decl { ty: slot, .. } = &mut self.ast.node_mut(decl).kind {
            *slot = ty;
        }
    }

    fn check_func(&mut self, func: NodeId) {
        let (mut params, mut ret, stmts, scope, index) = match self.ast.kind(func) {
            NodeKind::Func(data) => (
                data.params.clone(),
                data.ret.clone(),
                data.stmts.clone(),
                data.scope,
                data.index,
            ),
            _ => return,
        };

        for p in params.iter_mut() {
            quantify_deep(&mut p.ty);
        }
        if let Some(ret) = ret.as_mut() {
            quantify_deep(ret);
        }

        if let Some(data) = self.ast.func_mut(func) {
            data.params = params;
            data.ret = ret;
        }

        let Some(scope) = scope else { return };
        self.check_stmts(&stmts, scope, func, index);
    }

    fn check_stmts(&mut self, stmts: &[NodeId], scope: ScopeId, func: NodeId, func_idx: usize) {
        for &stmt in stmts {
            match self.ast.kind(stmt).clone() {
                NodeKind::Decl { .. } => self.check_decl(stmt, scope),

                NodeKind::Cond {
                    if_expr,
                    if_block,
                    elifs,
                    else_block,
                } => {
                    self.expr(if_expr, scope);
                    self.check_branch(if_block, func, func_idx);
                    for (expr, block) in elifs {
                        self.expr(expr, scope);
                        self.check_branch(block, func, func_idx);
                    }
                    if let Some(block) = else_block {
                        self.check_branch(block, func, func_idx);
                    }
                }

                NodeKind::Block {
                    stmts: inner,
                    scope: inner_scope,
                    ..
                } => {
                    if let Some(inner_scope) = inner_scope {
                        self.check_stmts(&inner, inner_scope, func, func_idx);
                    }
                }

                NodeKind::While {
                    expr,
                    stmts: inner,
                    scope: inner_scope,
                } => {
                    self.expr(expr, scope);
                    if let Some(inner_scope) = inner_scope {
                        self.check_stmts(&inner, inner_scope, func, func_idx);
                    }
                }

                NodeKind::DoWhile {
                    expr,
                    stmts: inner,
                    scope: inner_scope,
                } => {
                    if let Some(inner_scope) = inner_scope {
                        self.check_stmts(&inner, inner_scope, func, func_idx);
                    }
                    self.expr(expr, scope);
                }

                NodeKind::Return { expr } => self.check_return(stmt, expr, scope, func),

                NodeKind::Wait { .. } => self.check_wait(stmt, scope),

                NodeKind::WaitLabel { name, .. } => {
                    let found = self
                        .ast
                        .func(func)
                        .and_then(|data| data.find_wlab(&name).map(|i| (i, data.wlabs[i].1)));

                    match found {
                        Some((_, id)) => {
                            if let NodeKind::WaitLabel {
                                func: slot_func,
                                id: slot_id,
                                ..
                            } = &mut self.ast.node_mut(stmt).kind
                            {
                                *slot_func = Some(func_idx);
                                *slot_id = id;
                            }
                        }
                        None => self.invalid("no such label in function", stmt),
                    }
                }

                NodeKind::Binary { .. }
                | NodeKind::Unary { .. }
                | NodeKind::Call { .. }
                | NodeKind::Postfix { .. }
                | NodeKind::Index { .. }
                | NodeKind::Ternary { .. }
                | NodeKind::Name { .. }
                | NodeKind::Number { .. }
                | NodeKind::Str { .. } => {
                    self.expr(stmt, scope);
                }

                _ => {}
            }
        }
    }

    fn check_branch(&mut self, block: NodeId, func: NodeId, func_idx: usize) {
        if let NodeKind::Block {
            stmts,
            scope: Some(scope),
            ..
        } = self.ast.kind(block).clone()
        {
            self.check_stmts(&stmts, scope, func, func_idx);
        }
    }

    fn check_return(&mut self, stmt: NodeId, expr: Option<NodeId>, scope: ScopeId, func: NodeId) {
        let ret = self.ast.func(func).and_then(|d| d.ret.clone());

        match (expr, ret) {
            (Some(expr), Some(ret)) => {
                if let Some(ty) = self.expr(expr, scope) {
                    if !ret.equivalent(&ty) {
                        self.invalid("return type does not match func type", stmt);
                    }
                }
            }
            (Some(_), None) => self.invalid("returning a value in void func", stmt),
            (None, Some(_)) => self.invalid("return requires a value in a non-void func", stmt),
            (None, None) => {}
        }
    }

    fn check_wait(&mut self, stmt: NodeId, scope: ScopeId) {
        let (quaint, timeout, until) = match self.ast.kind(stmt) {
            NodeKind::Wait {
                quaint,
                timeout,
                until,
                ..
            } => (*quaint, *timeout, *until),
            _ => return,
        };

        match self.expr(quaint, scope) {
            Some(ty) if !ty.is_quaint() => self.invalid("wait needs quaint type", quaint),
            _ => {}
        }

        if let Some(timeout) = timeout {
            match self.expr(timeout, scope) {
                Some(ty) if !ty.is_scalar() => {
                    self.invalid("wait-for requires a scalar value", timeout)
                }
                Some(ty) if !ty.is_integral() || ty.is_signed() => {
                    self.invalid("wait-for requires an unsigned value", timeout)
                }
                _ => {}
            }
        } else if let Some(until) = until {
            let Some((func_idx, wlab_idx)) = self.resolve_label(until) else {
                return;
            };
            if let NodeKind::Wait { target, .. } = &mut self.ast.node_mut(stmt).kind {
                *target = Some((func_idx, wlab_idx));
            }
        }
    }

    /// Resolve a `Func::Label` expression to (function index, label index)
    fn resolve_label(&mut self, expr: NodeId) -> Option<(usize, usize)> {
        let (lhs, rhs) = match self.ast.kind(expr) {
            NodeKind::Binary {
                op: BinOp::Scope,
                lhs,
                rhs: BinRhs::Expr(rhs),
                ..
            } => (*lhs, *rhs),
            _ => {
                self.invalid("invalid wait-until label", expr);
                return None;
            }
        };

        let (func_name, label_name) = match (self.ast.kind(lhs), self.ast.kind(rhs)) {
            (NodeKind::Name { text: f, .. }, NodeKind::Name { text: l, .. }) => {
                (f.clone(), l.clone())
            }
            _ => {
                self.invalid("invalid wait-until label", expr);
                return None;
            }
        };

        let found = self.scopes.lookup(self.unit_scope, &func_name);
        let func_node = match found.map(|o| o.kind) {
            Some(ObjKind::Func { node, index }) => (node, index),
            _ => {
                self.invalid("no such function", lhs);
                return None;
            }
        };

        let wlab_idx = self
            .ast
            .func(func_node.0)
            .and_then(|data| data.find_wlab(&label_name));

        match wlab_idx {
            Some(idx) => Some((func_node.1, idx)),
            None => {
                self.invalid("no such label in function", rhs);
                None
            }
        }
    }

    // ==================== L-values ====================

    fn check_lvalue(&mut self, id: NodeId) -> bool {
        match self.ast.kind(id).clone() {
            NodeKind::Binary {
                op: BinOp::Member,
                lhs,
                ..
            } => self.check_lvalue(lhs),

            NodeKind::Binary {
                op: BinOp::Arrow, ..
            } => true,

            NodeKind::Unary {
                op: UnOp::Deref,
                operand: UnOperand::Expr(operand),
                ..
            } => {
                if self
                    .ast
                    .try_expr_type(operand)
                    .is_some_and(|t| !t.is_quaint())
                {
                    true
                } else {
                    self.invalid("lvalue is required", id);
                    false
                }
            }

            NodeKind::Index { base, .. } => self.check_lvalue(base),

            NodeKind::Name { resolved, .. } => match resolved {
                Some(Resolved::BuiltinConst(_)) => {
                    self.invalid("builtin constant is not modifiable", id);
                    false
                }
                Some(Resolved::BuiltinFunc(_)) => {
                    self.invalid("builtin func is not modifiable", id);
                    false
                }
                Some(Resolved::Func { .. }) => {
                    self.invalid("function is not modifiable", id);
                    false
                }
                Some(Resolved::Global { decl, .. }) | Some(Resolved::Auto { decl, .. }) => {
                    let constant = matches!(
                        self.ast.kind(decl),
                        NodeKind::Decl { constant: true, .. }
                    );
                    if constant {
                        self.invalid("constant is not modifiable", id);
                        false
                    } else {
                        true
                    }
                }
                Some(Resolved::Param { .. }) => true,
                None => false,
            },

            _ => {
                self.invalid("lvalue is required", id);
                false
            }
        }
    }

    // ==================== Expressions ====================

    /// Type an expression, store the quantified type on the node, and hand
    /// a copy back. None means an error was already reported.
    fn expr(&mut self, id: NodeId, scope: ScopeId) -> Option<Type> {
        let mut ty = match self.ast.kind(id).clone() {
            NodeKind::Binary { .. } => self.binary(id, scope)?,
            NodeKind::Unary { .. } => self.unary(id, scope)?,
            NodeKind::Call { .. } => self.call(id, scope)?,
            NodeKind::Postfix { .. } => self.postfix(id, scope)?,
            NodeKind::Index { .. } => self.index(id, scope)?,
            NodeKind::Ternary { .. } => self.ternary(id, scope)?,
            NodeKind::Name { .. } => self.name(id, scope)?,

            NodeKind::Number { value, .. } => {
                let kind = if value <= 0xFF {
                    TypeKind::U8
                } else if value <= 0xFFFF {
                    TypeKind::U16
                } else if value <= 0xFFFF_FFFF {
                    TypeKind::U32
                } else {
                    TypeKind::U64
                };
                Type::scalar(kind)
            }

            NodeKind::Str { .. } => Type::ptr_to(Type::scalar(TypeKind::U8)),

            _ => return None,
        };

        quantify_deep(&mut ty);
        self.ast.set_expr_type(id, ty.clone());
        Some(ty)
    }

    fn name(&mut self, id: NodeId, scope: ScopeId) -> Option<Type> {
        let text = match self.ast.kind(id) {
            NodeKind::Name { text, .. } => text.clone(),
            _ => return None,
        };
        let ref_start = self.ast.span(id).start;

        let Some(obj) = self.scopes.lookup(scope, &text) else {
            self.undefined_symbol(&text, id, scope);
            return None;
        };
        let kind = obj.kind;

        let ty = match kind {
            ObjKind::Global { decl, .. } | ObjKind::Auto { decl, .. } => {
                if matches!(kind, ObjKind::Auto { .. })
                    && ref_start <= self.ast.span(decl).start
                {
                    // locals must be declared before use
                    self.undefined_symbol(&text, id, scope);
                    return None;
                }
                match self.ast.kind(decl) {
                    NodeKind::Decl { ty, .. } => ty.clone(),
                    _ => return None,
                }
            }

            ObjKind::Param { func, index } => {
                let data = self.ast.func(func)?;
                data.params.get(index)?.ty.clone()
            }

            ObjKind::BuiltinConst(id) => id.ty(),

            ObjKind::BuiltinFunc(id) => id.fptr_type(),

            ObjKind::Func { node, .. } => {
                let data = self.ast.func(node)?;
                Type::scalar(TypeKind::Fptr {
                    params: data.params.clone(),
                    ret: data.ret.clone().map(Box::new),
                })
            }

            ObjKind::Duplicate => return None,
        };

        let resolved = match kind {
            ObjKind::Global { decl, name_idx } => Resolved::Global { decl, name_idx },
            ObjKind::Auto { decl, name_idx } => Resolved::Auto { decl, name_idx },
            ObjKind::Param { func, index } => Resolved::Param { func, index },
            ObjKind::Func { node, index } => Resolved::Func { node, index },
            ObjKind::BuiltinConst(id) => Resolved::BuiltinConst(id),
            ObjKind::BuiltinFunc(id) => Resolved::BuiltinFunc(id),
            ObjKind::Duplicate => return None,
        };

        if let NodeKind::Name { resolved: slot, .. } = &mut self.ast.node_mut(id).kind {
            *slot = Some(resolved);
        }

        Some(ty)
    }

    fn undefined_symbol(&mut self, text: &str, id: NodeId, scope: ScopeId) {
        let candidates = self.scopes.visible_names(scope);
        let similar = fuzzy::find_similar_names(text, &candidates, 0.7, 1);
        let span = self.ast.span(id);
        let mut diag = Diagnostic::error(
            format!("undefined symbol `{}`", text),
            Span::from_range(span),
        );
        if let Some(candidate) = similar.first() {
            diag = diag.with_help(format!("did you mean `{}`?", candidate));
        }
        self.engine.emit(diag);
    }

    fn binary(&mut self, id: NodeId, scope: ScopeId) -> Option<Type> {
        let (op, lhs, rhs) = match self.ast.kind(id) {
            NodeKind::Binary { op, lhs, rhs, .. } => (*op, *lhs, rhs.clone()),
            _ => return None,
        };

        if op == BinOp::Scope {
            return self.scoped_name(id, lhs, &rhs);
        }

        let lhs_ty = self.expr(lhs, scope)?;

        let go_right = !matches!(
            op,
            BinOp::Cast | BinOp::Colon | BinOp::Member | BinOp::Arrow | BinOp::At
        );

        let rhs_ty = if go_right {
            match &rhs {
                BinRhs::Expr(r) => Some(self.expr(*r, scope)?),
                BinRhs::TypeSpec(_) => None,
            }
        } else {
            None
        };

        match op {
            BinOp::Assign => {
                if !self.check_lvalue(lhs) {
                    return None;
                }
                let rhs_ty = rhs_ty?;
                if !lhs_ty.equivalent(&rhs_ty) {
                    self.invalid("incompatible types in assignment", id);
                    return None;
                }
                Some(rhs_ty)
            }

            BinOp::AddAssign
            | BinOp::SubAssign
            | BinOp::MulAssign
            | BinOp::DivAssign
            | BinOp::ModAssign => {
                let rhs_ty = rhs_ty?;
                if !lhs_ty.is_scalar() || !rhs_ty.is_scalar() {
                    self.invalid("operator requires scalar operands", id);
                    return None;
                }
                if !self.check_lvalue(lhs) {
                    return None;
                }
                if matches!(op, BinOp::AddAssign | BinOp::SubAssign) {
                    if !lhs_ty.is_integral() && !lhs_ty.is_pointer() {
                        self.invalid("non-integral left operand", id);
                        return None;
                    }
                    if matches!(lhs_ty.kind, TypeKind::Vptr) {
                        self.invalid("arithmetic on void pointer", id);
                        return None;
                    }
                    if matches!(lhs_ty.kind, TypeKind::Fptr { .. }) {
                        self.invalid("arithmetic on function pointer", id);
                        return None;
                    }
                } else if !lhs_ty.is_integral() {
                    self.invalid("non-integral left operand", id);
                    return None;
                }
                if !rhs_ty.is_integral() {
                    self.invalid("non-integral right operand", id);
                    return None;
                }
                if lhs_ty.size != rhs_ty.size {
                    self.invalid("differing type sizes", id);
                    return None;
                }
                if lhs_ty.operand_signed() != rhs_ty.operand_signed() {
                    self.invalid("operands differ in signedness", id);
                    return None;
                }
                Some(lhs_ty)
            }

            BinOp::ShlAssign
            | BinOp::ShrAssign
            | BinOp::AndAssign
            | BinOp::XorAssign
            | BinOp::OrAssign => {
                let rhs_ty = rhs_ty?;
                if !lhs_ty.is_scalar() || !rhs_ty.is_scalar() {
                    self.invalid("operator requires scalar operands", id);
                    return None;
                }
                if !self.check_lvalue(lhs) {
                    return None;
                }
                if !lhs_ty.is_integral() {
                    self.invalid("non-integral left operand", id);
                    return None;
                }
                if !rhs_ty.is_integral() {
                    self.invalid("non-integral right operand", id);
                    return None;
                }
                if !lhs_ty.is_unsigned() {
                    self.invalid("signed left operand", id);
                    return None;
                }
                if !rhs_ty.is_unsigned() {
                    self.invalid("signed right operand", id);
                    return None;
                }
                if lhs_ty.size != rhs_ty.size {
                    self.invalid("differing type sizes", id);
                    return None;
                }
                Some(lhs_ty)
            }

            BinOp::At => self.at_probe(id, lhs, &lhs_ty, &rhs),

            BinOp::Member | BinOp::Arrow => self.member(id, op, lhs, &lhs_ty, &rhs),

            BinOp::Eq
            | BinOp::NotEq
            | BinOp::Lt
            | BinOp::Gt
            | BinOp::LtEq
            | BinOp::GtEq
            | BinOp::LogicalAnd
            | BinOp::LogicalOr => {
                let rhs_ty = rhs_ty?;
                if matches!(op, BinOp::Eq | BinOp::NotEq) {
                    if lhs_ty.count != rhs_ty.count {
                        self.invalid("differing array sizes", id);
                        return None;
                    }
                } else if !lhs_ty.is_scalar() || !rhs_ty.is_scalar() {
                    self.invalid("operator requires scalar operands", id);
                    return None;
                }
                if !lhs_ty.is_integral() && !lhs_ty.is_pointer() {
                    self.invalid("non-integral left operand", id);
                    return None;
                }
                if !rhs_ty.is_integral() && !rhs_ty.is_pointer() {
                    self.invalid("non-integral right operand", id);
                    return None;
                }
                if lhs_ty.size != rhs_ty.size {
                    self.invalid("differing type sizes", id);
                    return None;
                }
                if lhs_ty.operand_signed() != rhs_ty.operand_signed() {
                    self.invalid("operands differ in signedness", id);
                    return None;
                }
                Some(Type::scalar(TypeKind::U8))
            }

            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod => {
                let rhs_ty = rhs_ty?;
                if !lhs_ty.is_scalar() || !rhs_ty.is_scalar() {
                    self.invalid("operator requires scalar operands", id);
                    return None;
                }
                if matches!(op, BinOp::Add | BinOp::Sub) {
                    if !lhs_ty.is_integral() && !lhs_ty.is_pointer() {
                        self.invalid("non-integral left operand", id);
                        return None;
                    }
                    if matches!(lhs_ty.kind, TypeKind::Vptr) {
                        self.invalid("arithmetic on void pointer", id);
                        return None;
                    }
                    if matches!(lhs_ty.kind, TypeKind::Fptr { .. }) {
                        self.invalid("arithmetic on function pointer", id);
                        return None;
                    }
                } else if !lhs_ty.is_integral() {
                    self.invalid("non-integral left operand", id);
                    return None;
                }
                if !rhs_ty.is_integral() {
                    self.invalid("non-integral right operand", id);
                    return None;
                }
                if lhs_ty.size != rhs_ty.size {
                    self.invalid("differing type sizes", id);
                    return None;
                }
                if lhs_ty.operand_signed() != rhs_ty.operand_signed() {
                    self.invalid("operands differ in signedness", id);
                    return None;
                }
                Some(lhs_ty)
            }

            BinOp::Shl | BinOp::Shr | BinOp::BitAnd | BinOp::BitXor | BinOp::BitOr => {
                let rhs_ty = rhs_ty?;
                if !lhs_ty.is_scalar() || !rhs_ty.is_scalar() {
                    self.invalid("operator requires scalar operands", id);
                    return None;
                }
                if !lhs_ty.is_integral() {
                    self.invalid("non-integral left operand", id);
                    return None;
                }
                if !rhs_ty.is_integral() {
                    self.invalid("non-integral right operand", id);
                    return None;
                }
                if !lhs_ty.is_unsigned() {
                    self.invalid("signed left operand", id);
                    return None;
                }
                if !rhs_ty.is_unsigned() {
                    self.invalid("signed right operand", id);
                    return None;
                }
                if lhs_ty.size != rhs_ty.size {
                    self.invalid("differing type sizes", id);
                    return None;
                }
                Some(lhs_ty)
            }

            BinOp::Comma => rhs_ty,

            BinOp::Cast | BinOp::Colon => {
                if lhs_ty.is_void() {
                    self.invalid("type not convertible", id);
                    return None;
                }
                let BinRhs::TypeSpec(spec) = &rhs else {
                    return None;
                };
                let mut spec = spec.clone();
                quantify_deep(&mut spec);
                // keep the stored specifier quantified for the code
                // generator
                if let NodeKind::Binary { rhs: slot, .. } = &mut self.ast.node_mut(id).kind {
                    *slot = BinRhs::TypeSpec(spec.clone());
                }
                Some(spec)
            }

            BinOp::Scope => None,
        }
    }

    fn at_probe(
        &mut self,
        id: NodeId,
        lhs: NodeId,
        lhs_ty: &Type,
        rhs: &BinRhs,
    ) -> Option<Type> {
        if !lhs_ty.is_scalar() {
            self.invalid("@ requires scalar value", lhs);
            return None;
        }
        if !lhs_ty.is_quaint() {
            self.invalid("@ requires an lhs quaint", lhs);
            return None;
        }

        let BinRhs::Expr(probe_expr) = rhs else {
            return None;
        };
        let probe_expr = *probe_expr;

        let probe = match self.ast.kind(probe_expr).clone() {
            NodeKind::Name { text, .. } => match text.as_str() {
                "start" => AtProbe::Start,
                "end" => AtProbe::End,
                _ => {
                    self.invalid("@ rhs can only be \"start\" or \"end\"", probe_expr);
                    return None;
                }
            },

            NodeKind::Binary {
                op: BinOp::Scope, ..
            } => {
                let (func, wlab_idx) = self.resolve_at_label(probe_expr)?;
                AtProbe::Label { func, wlab_idx }
            }

            _ => {
                self.invalid("@ rhs must be a label or \"start\"", probe_expr);
                return None;
            }
        };

        if let NodeKind::Binary { probe: slot, .. } = &mut self.ast.node_mut(id).kind {
            *slot = Some(probe);
        }

        Some(Type::scalar(TypeKind::U8))
    }

    fn resolve_at_label(&mut self, expr: NodeId) -> Option<(usize, usize)> {
        let (lhs, rhs) = match self.ast.kind(expr) {
            NodeKind::Binary {
                op: BinOp::Scope,
                lhs,
                rhs: BinRhs::Expr(rhs),
                ..
            } => (*lhs, *rhs),
            _ => {
                self.invalid("invalid label", expr);
                return None;
            }
        };

        let (func_name, label_name) = match (self.ast.kind(lhs), self.ast.kind(rhs)) {
            (NodeKind::Name { text: f, .. }, NodeKind::Name { text: l, .. }) => {
                (f.clone(), l.clone())
            }
            _ => {
                self.invalid("invalid label", expr);
                return None;
            }
        };

        let found = self.scopes.lookup(self.unit_scope, &func_name);
        let (func_node, func_idx) = match found.map(|o| o.kind) {
            Some(ObjKind::Func { node, index }) => (node, index),
            _ => {
                self.invalid("no such function", lhs);
                return None;
            }
        };

        match self
            .ast
            .func(func_node)
            .and_then(|data| data.find_wlab(&label_name))
        {
            Some(idx) => Some((func_idx, idx)),
            None => {
                self.invalid("no such label in function", rhs);
                None
            }
        }
    }

    fn member(
        &mut self,
        id: NodeId,
        op: BinOp,
        lhs: NodeId,
        lhs_ty: &Type,
        rhs: &BinRhs,
    ) -> Option<Type> {
        if !lhs_ty.is_scalar() {
            self.invalid("operator requires scalar value", lhs);
            return None;
        }

        let BinRhs::Expr(field_expr) = rhs else {
            return None;
        };
        let field = match self.ast.kind(*field_expr) {
            NodeKind::Name { text, .. } => text.clone(),
            _ => {
                self.invalid("expecting a field name", *field_expr);
                return None;
            }
        };

        let aggregate = if op == BinOp::Member {
            match &lhs_ty.kind {
                TypeKind::Struct { .. } | TypeKind::Union { .. } => lhs_ty,
                _ => {
                    self.invalid("expecting a union or a struct", lhs);
                    return None;
                }
            }
        } else {
            match &lhs_ty.kind {
                TypeKind::Ptr(sub)
                    if matches!(sub.kind, TypeKind::Struct { .. } | TypeKind::Union { .. }) =>
                {
                    if !sub.is_scalar() {
                        self.invalid("arrow requires scalar value", lhs);
                        return None;
                    }
                    sub
                }
                _ => {
                    self.invalid("expecting a pointer to union or struct", lhs);
                    return None;
                }
            }
        };

        let members = aggregate.members()?;
        let found = members
            .iter()
            .enumerate()
            .find(|(_, m)| m.name == field)
            .map(|(idx, m)| (idx, m.ty.clone()));

        let Some((member_idx, member_ty)) = found else {
            self.invalid("member not found", *field_expr);
            return None;
        };

        if let NodeKind::Binary {
            member_idx: slot, ..
        } = &mut self.ast.node_mut(id).kind
        {
            *slot = Some(member_idx);
        }

        Some(member_ty)
    }

    /// `A::b` in a general expression position: enum value access only
    fn scoped_name(&mut self, id: NodeId, lhs: NodeId, rhs: &BinRhs) -> Option<Type> {
        let BinRhs::Expr(rhs) = rhs else { return None };

        let (lhs_name, rhs_name) = match (self.ast.kind(lhs), self.ast.kind(*rhs)) {
            (NodeKind::Name { text: l, .. }, NodeKind::Name { text: r, .. }) => {
                (l.clone(), r.clone())
            }
            _ => {
                self.invalid("only a name can appear in a scope operator", id);
                return None;
            }
        };

        let Some(named) = self.types.find(&lhs_name).cloned() else {
            self.invalid("operator not implemented", id);
            return None;
        };

        let TypeKind::Enum { values, .. } = &named.kind else {
            self.invalid("operator not implemented", id);
            return None;
        };

        let Some((_, value)) = values.iter().find(|(n, _)| *n == rhs_name) else {
            self.invalid("no such enum value", *rhs);
            return None;
        };
        let value = *value;
        let ty = named.clone();

        if let NodeKind::Binary {
            enum_value: slot, ..
        } = &mut self.ast.node_mut(id).kind
        {
            *slot = Some(value);
        }

        Some(ty)
    }

    fn unary(&mut self, id: NodeId, scope: ScopeId) -> Option<Type> {
        let (op, operand) = match self.ast.kind(id) {
            NodeKind::Unary { op, operand, .. } => (*op, operand.clone()),
            _ => return None,
        };

        if matches!(op, UnOp::SizeOf | UnOp::AlignOf) {
            let UnOperand::TypeSpec(spec) = &operand else {
                return None;
            };
            let mut spec = spec.clone();
            quantify_deep(&mut spec);
            if let NodeKind::Unary { operand: slot, .. } = &mut self.ast.node_mut(id).kind {
                *slot = UnOperand::TypeSpec(spec);
            }
            return Some(Type::scalar(TypeKind::Usize));
        }

        let UnOperand::Expr(rhs) = operand else {
            return None;
        };
        let rhs_ty = self.expr(rhs, scope)?;
        let scalar = rhs_ty.is_scalar();

        match op {
            UnOp::Plus => {
                if !scalar {
                    self.invalid("unary plus requires a scalar value", rhs);
                    return None;
                }
                if !rhs_ty.is_integral() {
                    self.invalid("unary plus to non-integral expr", rhs);
                    return None;
                }
                Some(rhs_ty)
            }

            UnOp::Neg => {
                if !scalar {
                    self.invalid("unary minus requires a scalar value", rhs);
                    return None;
                }
                if !rhs_ty.is_integral() {
                    self.invalid("unary minus to non-integral expr", rhs);
                    return None;
                }
                let mut ty = rhs_ty;
                if ty.is_unsigned() {
                    ty.kind = ty.kind.to_signed();
                }
                Some(ty)
            }

            UnOp::Not => {
                if !scalar {
                    self.invalid("unary not requires a scalar value", rhs);
                    return None;
                }
                if !rhs_ty.is_integral() && !rhs_ty.is_pointer() && !rhs_ty.is_quaint() {
                    self.invalid("unary not to non-integral expr", rhs);
                    return None;
                }
                Some(rhs_ty)
            }

            UnOp::Quaintify => Some(Type::quaint_of(rhs_ty)),

            UnOp::Deref => {
                if rhs_ty.is_quaint() && !self.check_lvalue(rhs) {
                    return None;
                }
                if !scalar {
                    self.invalid("unary star requires a scalar pointer/quaint", rhs);
                    return None;
                }
                if !rhs_ty.is_pointer() && !rhs_ty.is_quaint() {
                    self.invalid("unary star to non-pointer, non-quaint", rhs);
                    return None;
                }
                if matches!(rhs_ty.kind, TypeKind::Vptr) {
                    self.invalid("unary star to void pointer", rhs);
                    return None;
                }
                if matches!(rhs_ty.kind, TypeKind::Fptr { .. }) {
                    self.invalid("unary star to function pointer", rhs);
                    return None;
                }
                rhs_ty.pointee().cloned()
            }

            UnOp::AddrOf => {
                if !self.check_lvalue(rhs) {
                    return None;
                }
                Some(Type::ptr_to(rhs_ty))
            }

            UnOp::BitNot => {
                if !scalar {
                    self.invalid("bitwise negation requires a scalar value", id);
                    return None;
                }
                if !rhs_ty.is_integral() {
                    self.invalid("bitwise negation to non-integral expr", id);
                    return None;
                }
                if rhs_ty.is_signed() {
                    self.invalid("bitwise negation to signed expr", id);
                    return None;
                }
                Some(rhs_ty)
            }

            UnOp::PreInc | UnOp::PreDec => {
                if !self.check_lvalue(rhs) {
                    return None;
                }
                if !scalar {
                    self.invalid("prefix inc/dec requires a scalar value", id);
                    return None;
                }
                if !rhs_ty.is_integral() && !rhs_ty.is_pointer() {
                    self.invalid("prefix inc/dec to non-integral expr", id);
                    return None;
                }
                if matches!(rhs_ty.kind, TypeKind::Vptr) {
                    self.invalid("arithmetic on void pointer", id);
                    return None;
                }
                if matches!(rhs_ty.kind, TypeKind::Fptr { .. }) {
                    self.invalid("arithmetic on function pointer", id);
                    return None;
                }
                Some(rhs_ty)
            }

            UnOp::SizeOf | UnOp::AlignOf => None,
        }
    }

    fn call(&mut self, id: NodeId, scope: ScopeId) -> Option<Type> {
        let (callee, args) = match self.ast.kind(id) {
            NodeKind::Call { callee, args, .. } => (*callee, args.clone()),
            _ => return None,
        };

        let callee_ty = self.expr(callee, scope)?;

        let TypeKind::Fptr { params, ret } = &callee_ty.kind else {
            self.invalid("call target must be of type fptr", callee);
            return None;
        };
        if !callee_ty.is_scalar() {
            self.invalid("call target must be scalar", callee);
            return None;
        }
        let params = params.clone();
        let ret = ret.clone();

        if args.len() > params.len() {
            self.invalid("excessive argument count", id);
            return None;
        }

        for (arg, param) in args.iter().zip(params.iter()) {
            let arg_ty = self.expr(*arg, scope)?;
            if !arg_ty.equivalent(&param.ty) {
                self.invalid("arg does not match param type", *arg);
                return None;
            }
        }

        if args.len() != params.len() {
            self.invalid("wrong argument count", id);
            return None;
        }

        match ret {
            Some(ret) => Some(*ret),
            None => Some(Type::scalar(TypeKind::Void)),
        }
    }

    fn postfix(&mut self, id: NodeId, scope: ScopeId) -> Option<Type> {
        let lhs = match self.ast.kind(id) {
            NodeKind::Postfix { lhs, .. } => *lhs,
            _ => return None,
        };

        let lhs_ty = self.expr(lhs, scope)?;

        if !self.check_lvalue(lhs) {
            return None;
        }
        if !lhs_ty.is_scalar() {
            self.invalid("postfix inc/dec requires a scalar value", id);
            return None;
        }
        if !lhs_ty.is_integral() && !lhs_ty.is_pointer() {
            self.invalid("postfix inc/dec to non-integral expr", id);
            return None;
        }
        if matches!(lhs_ty.kind, TypeKind::Vptr) {
            self.invalid("arithmetic on void pointer", id);
            return None;
        }
        if matches!(lhs_ty.kind, TypeKind::Fptr { .. }) {
            self.invalid("arithmetic on function pointer", id);
            return None;
        }

        Some(lhs_ty)
    }

    fn index(&mut self, id: NodeId, scope: ScopeId) -> Option<Type> {
        let (base, index) = match self.ast.kind(id) {
            NodeKind::Index { base, index, .. } => (*base, *index),
            _ => return None,
        };

        let base_ty = self.expr(base, scope)?;
        let index_ty = self.expr(index, scope)?;

        if base_ty.is_scalar() {
            self.invalid("subscripted object is not an array", id);
            return None;
        }
        if !index_ty.is_integral() {
            self.invalid("non-integral array offset", index);
            return None;
        }
        if index_ty.is_signed() {
            self.invalid("signed array offset", index);
            return None;
        }

        let mut ty = base_ty;
        ty.count = 1;
        Some(ty)
    }

    fn ternary(&mut self, id: NodeId, scope: ScopeId) -> Option<Type> {
        let (cond, tval, fval) = match self.ast.kind(id) {
            NodeKind::Ternary {
                cond, tval, fval, ..
            } => (*cond, *tval, *fval),
            _ => return None,
        };

        let cond_ty = self.expr(cond, scope)?;
        let tval_ty = self.expr(tval, scope)?;
        let fval_ty = self.expr(fval, scope)?;

        if !cond_ty.is_integral() && !cond_ty.is_pointer() && !cond_ty.is_quaint() {
            self.invalid("non-integral condition", cond);
            return None;
        }
        if !tval_ty.equivalent(&fval_ty) {
            self.invalid("differing types in conditional branches", id);
            return None;
        }

        Some(tval_ty)
    }
}

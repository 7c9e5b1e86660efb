// AST builder: validates the concrete syntax tree and lowers it into the
// typed AST arena. Statement kinds are checked against the context they
// appear in, type specifiers are parsed out of their expression-shaped
// concrete form, and named types are registered in the unit type table.

use quaint_ast::{
    match_type_name, prim_kind, Ast, BinOp, BinRhs, FuncData, Node, NodeId, NodeKind, PostOp,
    Type, TypeKind, TypeNameMatch, TypeNamePair, TypeTable, UnOp, UnOperand,
};
use quaint_diagnostics::{fuzzy, Diagnostic, DiagnosticEngine, Span};
use quaint_lexer::Token;
use quaint_parser::{CstNode, NonTerminal};

/// Sentinel for "an error was already reported"
struct Reported;

type Build<T> = Result<T, Reported>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ctx {
    Unit,
    Func,
    Block,
}

pub struct BuildOutput {
    pub ast: Ast,
    pub types: TypeTable,
}

pub fn build_ast(cst: &CstNode, engine: &mut DiagnosticEngine) -> BuildOutput {
    let mut builder = Builder {
        ast: Ast::new(),
        types: TypeTable::new(),
        engine,
        ctx: vec![Ctx::Unit],
        func_count: 0,
    };

    let stmts = cst.children();
    let root = builder.ast.push(Node {
        kind: NodeKind::Unit {
            stmts: Vec::new(),
            scope: None,
        },
        parent: None,
        span: cst.span(),
    });

    let mut built = Vec::new();
    for stmt in stmts {
        if let Ok(id) = builder.stmt(stmt, root) {
            built.push(id);
        }
    }

    if let NodeKind::Unit { stmts, .. } = &mut builder.ast.node_mut(root).kind {
        *stmts = built;
    }

    BuildOutput {
        ast: builder.ast,
        types: builder.types,
    }
}

struct Builder<'a> {
    ast: Ast,
    types: TypeTable,
    engine: &'a mut DiagnosticEngine,
    ctx: Vec<Ctx>,
    func_count: usize,
}

// ==================== CST shape helpers ====================

/// The node under an `Expr` wrapper
fn inner(expr: &CstNode) -> &CstNode {
    match expr {
        CstNode::Interior { nt, children } if *nt == NonTerminal::Expr && !children.is_empty() => {
            &children[0]
        }
        other => other,
    }
}

fn is_nt(expr: &CstNode, nt: NonTerminal) -> bool {
    inner(expr).nt() == Some(nt)
}

fn leaf_is(node: &CstNode, token: &Token) -> bool {
    node.leaf_token()
        .is_some_and(|ts| std::mem::discriminant(&ts.token) == std::mem::discriminant(token))
}

/// Name text when the expression is a bare name atom
fn atom_name(expr: &CstNode) -> Option<&str> {
    let node = inner(expr);
    if node.nt() != Some(NonTerminal::Atom) {
        return None;
    }
    match node.children().first().and_then(CstNode::leaf_token) {
        Some(ts) => match &ts.token {
            Token::Name(name) => Some(name),
            _ => None,
        },
        None => None,
    }
}

/// Literal text when the expression is a bare number atom
fn atom_number(expr: &CstNode) -> Option<&str> {
    let node = inner(expr);
    if node.nt() != Some(NonTerminal::Atom) {
        return None;
    }
    match node.children().first().and_then(CstNode::leaf_token) {
        Some(ts) => match &ts.token {
            Token::Number(text) => Some(text),
            _ => None,
        },
        None => None,
    }
}

/// Children `[lhs, op-token, rhs]` of a binary expression
fn bexp_parts(expr: &CstNode) -> Option<(&CstNode, &Token, &CstNode)> {
    let node = inner(expr);
    if node.nt() != Some(NonTerminal::Bexp) {
        return None;
    }
    let children = node.children();
    let op = children.get(1)?.leaf_token()?;
    Some((children.first()?, &op.token, children.get(2)?))
}

impl<'a> Builder<'a> {
    fn top_ctx(&self) -> Ctx {
        *self.ctx.last().unwrap_or(&Ctx::Unit)
    }

    fn invalid(&mut self, message: impl Into<String>, node: &CstNode) -> Reported {
        self.engine
            .emit_error(message, Span::from_range(node.span()));
        Reported
    }

    fn push_node(&mut self, kind: NodeKind, parent: NodeId, span: std::ops::Range<usize>) -> NodeId {
        self.ast.push(Node {
            kind,
            parent: Some(parent),
            span,
        })
    }

    /// Fix up parent links of nodes built before their parent existed
    fn adopt(&mut self, parent: NodeId, children: &[NodeId]) {
        for &child in children {
            self.ast.node_mut(child).parent = Some(parent);
        }
    }

    // ==================== Statements ====================

    fn stmt(&mut self, stmt: &CstNode, parent: NodeId) -> Build<NodeId> {
        let children = stmt.children();
        let first = children
            .first()
            .ok_or_else(|| self.invalid("empty statement", stmt))?;

        if let Some(ts) = first.leaf_token() {
            return match ts.token {
                Token::Type | Token::Exposed => {
                    if self.top_ctx() != Ctx::Unit {
                        return Err(self.invalid("type statement not in unit context", stmt));
                    }
                    self.type_stmt(stmt, parent)
                }
                Token::Wait => {
                    if self.top_ctx() == Ctx::Unit {
                        return Err(self.invalid("wait statement in unit context", stmt));
                    }
                    self.wait_stmt(stmt, parent)
                }
                Token::Return => {
                    if self.top_ctx() == Ctx::Unit {
                        return Err(self.invalid("return statement in unit context", stmt));
                    }
                    self.return_stmt(stmt, parent)
                }
                Token::LBracket => {
                    if self.top_ctx() == Ctx::Unit {
                        return Err(self.invalid("wait label in unit context", stmt));
                    }
                    self.wlab_stmt(stmt, parent)
                }
                Token::LBrace | Token::Noint => {
                    if self.top_ctx() == Ctx::Unit {
                        return Err(self.invalid("block in unit context", stmt));
                    }
                    self.ctx.push(Ctx::Block);
                    let result = self.block_stmt(stmt, parent);
                    self.ctx.pop();
                    result
                }
                _ => Err(self.invalid("bad statement", stmt)),
            };
        }

        match first.nt() {
            Some(NonTerminal::Qual) | Some(NonTerminal::Expr) => self.decl_or_expr(stmt, parent),
            Some(NonTerminal::Ctrl) => {
                if self.top_ctx() == Ctx::Unit {
                    return Err(self.invalid("control-flow statement in unit context", stmt));
                }
                self.ctx.push(Ctx::Block);
                let result = self.ctrl(first, parent);
                self.ctx.pop();
                result
            }
            Some(NonTerminal::Func) => {
                if self.top_ctx() != Ctx::Unit {
                    return Err(self.invalid("function not in unit context", stmt));
                }
                self.ctx.push(Ctx::Func);
                let result = self.func(first, parent);
                self.ctx.pop();
                result
            }
            _ => Err(self.invalid("bad statement", stmt)),
        }
    }

    fn type_stmt(&mut self, stmt: &CstNode, parent: NodeId) -> Build<NodeId> {
        let children = stmt.children();
        let exposed = leaf_is(&children[0], &Token::Exposed);
        let expr = &children[if exposed { 2 } else { 1 }];

        let Some((left, op, right)) = bexp_parts(expr) else {
            return Err(self.invalid("bad type statement", expr));
        };

        if *op != Token::Colon {
            return Err(self.invalid("expecting a colon after the type name", expr));
        }

        let Some(name) = atom_name(left) else {
            return Err(self.invalid("bad type name", left));
        };
        let name = name.to_string();

        let ty = self.typespec(right)?;

        if self.types.insert(name.clone(), ty).is_err() {
            return Err(self.invalid("redefinition of type", left));
        }

        Ok(self.push_node(NodeKind::TypeDecl { exposed, name }, parent, stmt.span()))
    }

    fn return_stmt(&mut self, stmt: &CstNode, parent: NodeId) -> Build<NodeId> {
        let children = stmt.children();
        let expr = if children.len() == 3 {
            Some(self.expr(&children[1])?)
        } else {
            None
        };

        let id = self.push_node(NodeKind::Return { expr }, parent, stmt.span());
        if let Some(e) = expr {
            self.adopt(id, &[e]);
        }
        Ok(id)
    }

    fn wlab_stmt(&mut self, stmt: &CstNode, parent: NodeId) -> Build<NodeId> {
        let expr = &stmt.children()[1];
        let Some(name) = atom_name(expr) else {
            return Err(self.invalid("expecting a label name", expr));
        };

        Ok(self.push_node(
            NodeKind::WaitLabel {
                name: name.to_string(),
                func: None,
                id: 0,
            },
            parent,
            stmt.span(),
        ))
    }

    fn wait_stmt(&mut self, stmt: &CstNode, parent: NodeId) -> Build<NodeId> {
        let children = stmt.children();
        let quaint = self.expr(&children[1])?;

        let mut timeout = None;
        let mut until = None;
        let mut units_sec = false;

        if children.len() >= 5 {
            let clause = &children[2];
            let operand = &children[3];

            if leaf_is(clause, &Token::For) {
                let mut expr = operand;
                if is_nt(operand, NonTerminal::Wexp) {
                    let wexp = inner(operand);
                    units_sec = leaf_is(&wexp.children()[1], &Token::Sec);
                    expr = &wexp.children()[0];
                }
                timeout = Some(self.expr(expr)?);
            } else {
                until = Some(self.expr(operand)?);
            }
        }

        let noblock = children.iter().any(|c| leaf_is(c, &Token::Noblock));

        let id = self.push_node(
            NodeKind::Wait {
                quaint,
                timeout,
                until,
                noblock,
                units_sec,
                target: None,
            },
            parent,
            stmt.span(),
        );
        self.adopt(id, &[quaint]);
        if let Some(t) = timeout {
            self.adopt(id, &[t]);
        }
        if let Some(u) = until {
            self.adopt(id, &[u]);
        }
        Ok(id)
    }

    fn block_stmt(&mut self, stmt: &CstNode, parent: NodeId) -> Build<NodeId> {
        let children = stmt.children();
        let noint = leaf_is(&children[0], &Token::Noint);
        let body = &children[(noint as usize + 1)..children.len() - 1];

        let id = self.push_node(
            NodeKind::Block {
                noint,
                stmts: Vec::new(),
                scope: None,
            },
            parent,
            stmt.span(),
        );

        let stmts = self.stmt_list(body, id);
        if let NodeKind::Block { stmts: slot, .. } = &mut self.ast.node_mut(id).kind {
            *slot = stmts;
        }
        Ok(id)
    }

    fn stmt_list(&mut self, body: &[CstNode], parent: NodeId) -> Vec<NodeId> {
        let mut stmts = Vec::new();
        for stmt in body {
            if let Ok(id) = self.stmt(stmt, parent) {
                stmts.push(id);
            }
        }
        stmts
    }

    fn ctrl(&mut self, ctrl: &CstNode, parent: NodeId) -> Build<NodeId> {
        let children = ctrl.children();
        match children[0].nt() {
            Some(NonTerminal::Cond) => self.cond(ctrl, parent),
            Some(NonTerminal::Whil) => self.while_stmt(&children[0], parent),
            Some(NonTerminal::Dowh) => self.do_while(&children[0], parent),
            _ => Err(self.invalid("bad control statement", ctrl)),
        }
    }

    /// A branch body becomes its own block node so it can carry a scope
    fn branch_block(
        &mut self,
        branch: &CstNode,
        body: &[CstNode],
        parent: NodeId,
    ) -> NodeId {
        let id = self.push_node(
            NodeKind::Block {
                noint: false,
                stmts: Vec::new(),
                scope: None,
            },
            parent,
            branch.span(),
        );
        let stmts = self.stmt_list(body, id);
        if let NodeKind::Block { stmts: slot, .. } = &mut self.ast.node_mut(id).kind {
            *slot = stmts;
        }
        id
    }

    fn cond(&mut self, ctrl: &CstNode, parent: NodeId) -> Build<NodeId> {
        let children = ctrl.children();

        let id = self.push_node(
            NodeKind::Cond {
                if_expr: NodeId(0),
                if_block: NodeId(0),
                elifs: Vec::new(),
                else_block: None,
            },
            parent,
            ctrl.span(),
        );

        let cond = &children[0];
        let cond_children = cond.children();
        let if_expr = self.expr(&cond_children[1])?;
        let if_block =
            self.branch_block(cond, &cond_children[3..cond_children.len() - 1], id);

        let mut elifs = Vec::new();
        let mut else_block = None;

        for branch in &children[1..] {
            match branch.nt() {
                Some(NonTerminal::Elif) => {
                    let bc = branch.children();
                    let expr = self.expr(&bc[1])?;
                    let block = self.branch_block(branch, &bc[3..bc.len() - 1], id);
                    elifs.push((expr, block));
                }
                Some(NonTerminal::Else) => {
                    let bc = branch.children();
                    else_block = Some(self.branch_block(branch, &bc[2..bc.len() - 1], id));
                }
                _ => return Err(self.invalid("bad conditional", branch)),
            }
        }

        self.adopt(id, &[if_expr]);
        for (e, _) in &elifs {
            self.adopt(id, &[*e]);
        }

        if let NodeKind::Cond {
            if_expr: slot_expr,
            if_block: slot_block,
            elifs: slot_elifs,
            else_block: slot_else,
        } = &mut self.ast.node_mut(id).kind
        {
            *slot_expr = if_expr;
            *slot_block = if_block;
            *slot_elifs = elifs;
            *slot_else = else_block;
        }
        Ok(id)
    }

    fn while_stmt(&mut self, whil: &CstNode, parent: NodeId) -> Build<NodeId> {
        let children = whil.children();
        let id = self.push_node(
            NodeKind::While {
                expr: NodeId(0),
                stmts: Vec::new(),
                scope: None,
            },
            parent,
            whil.span(),
        );

        let expr = self.expr(&children[1])?;
        let stmts = self.stmt_list(&children[3..children.len() - 1], id);

        self.adopt(id, &[expr]);
        if let NodeKind::While {
            expr: slot_expr,
            stmts: slot_stmts,
            ..
        } = &mut self.ast.node_mut(id).kind
        {
            *slot_expr = expr;
            *slot_stmts = stmts;
        }
        Ok(id)
    }

    fn do_while(&mut self, dowh: &CstNode, parent: NodeId) -> Build<NodeId> {
        let children = dowh.children();
        let id = self.push_node(
            NodeKind::DoWhile {
                expr: NodeId(0),
                stmts: Vec::new(),
                scope: None,
            },
            parent,
            dowh.span(),
        );

        let stmts = self.stmt_list(&children[2..children.len() - 4], id);
        let expr = self.expr(&children[children.len() - 2])?;

        self.adopt(id, &[expr]);
        if let NodeKind::DoWhile {
            expr: slot_expr,
            stmts: slot_stmts,
            ..
        } = &mut self.ast.node_mut(id).kind
        {
            *slot_expr = expr;
            *slot_stmts = stmts;
        }
        Ok(id)
    }

    fn func(&mut self, func: &CstNode, parent: NodeId) -> Build<NodeId> {
        let children = func.children();
        let mut qual_count = 0;
        let mut exposed = false;

        while children[qual_count].nt() == Some(NonTerminal::Qual) {
            let qual = &children[qual_count];
            match qual.children()[0].leaf_token().map(|ts| &ts.token) {
                Some(Token::Exposed) => {
                    if exposed {
                        return Err(self.invalid("duplicate qualifier", qual));
                    }
                    exposed = true;
                }
                _ => return Err(self.invalid("invalid qualifier for function", qual)),
            }
            qual_count += 1;
        }

        let signature = &children[qual_count];
        let (name, params, ret) = self.func_signature(signature)?;

        let index = self.func_count;
        self.func_count += 1;

        let id = self.push_node(
            NodeKind::Func(FuncData {
                exposed,
                name,
                params,
                ret,
                wlabs: Vec::new(),
                stmts: Vec::new(),
                scope: None,
                index,
            }),
            parent,
            func.span(),
        );

        let stmts = self.stmt_list(&children[qual_count + 2..children.len() - 1], id);
        if let Some(data) = self.ast.func_mut(id) {
            data.stmts = stmts;
        }
        Ok(id)
    }

    /// Signature forms: `name`, `name(params)`, `name: ret`,
    /// `name(params): ret`
    fn func_signature(
        &mut self,
        signature: &CstNode,
    ) -> Build<(String, Vec<TypeNamePair>, Option<Type>)> {
        if let Some(name) = atom_name(signature) {
            return Ok((name.to_string(), Vec::new(), None));
        }

        if is_nt(signature, NonTerminal::Fexp) {
            let (name, params) = self.func_call_shape(inner(signature))?;
            return Ok((name, params, None));
        }

        if let Some((left, op, right)) = bexp_parts(signature) {
            if *op != Token::Colon {
                return Err(self.invalid("expecting a colon", signature));
            }

            let (name, params) = if let Some(name) = atom_name(left) {
                (name.to_string(), Vec::new())
            } else if is_nt(left, NonTerminal::Fexp) {
                self.func_call_shape(inner(left))?
            } else {
                return Err(self.invalid("bad function signature", left));
            };

            let ret = self.typespec(right)?;
            return Ok((name, params, Some(ret)));
        }

        Err(self.invalid("bad function signature", signature))
    }

    /// `name(pairs?)` out of a call-shaped CST node
    fn func_call_shape(&mut self, fexp: &CstNode) -> Build<(String, Vec<TypeNamePair>)> {
        let children = fexp.children();
        let Some(name) = atom_name(&children[0]) else {
            return Err(self.invalid("bad function name", &children[0]));
        };
        let params = if children.len() == 4 {
            self.type_name_pairs(&children[2])?
        } else {
            Vec::new()
        };
        Ok((name.to_string(), params))
    }

    // ==================== Declarations and expressions ====================

    fn decl_or_expr(&mut self, stmt: &CstNode, parent: NodeId) -> Build<NodeId> {
        let children = stmt.children();
        let mut qual_count = 0;
        let mut constant = false;
        let mut exposed = false;
        let mut static_ = false;

        while children[qual_count].nt() == Some(NonTerminal::Qual) {
            let qual = &children[qual_count];
            match qual.children()[0].leaf_token().map(|ts| &ts.token) {
                Some(Token::Const) => {
                    if constant {
                        return Err(self.invalid("duplicate qualifier", qual));
                    }
                    constant = true;
                }
                Some(Token::Exposed) => {
                    if self.top_ctx() != Ctx::Unit {
                        return Err(self.invalid("qualifier not in unit context", qual));
                    }
                    if exposed {
                        return Err(self.invalid("duplicate qualifier", qual));
                    }
                    exposed = true;
                }
                Some(Token::Static) => {
                    if self.top_ctx() == Ctx::Unit {
                        return Err(self.invalid("qualifier in unit context", qual));
                    }
                    if static_ {
                        return Err(self.invalid("duplicate qualifier", qual));
                    }
                    static_ = true;
                }
                _ => return Err(self.invalid("bad qualifier", qual)),
            }
            qual_count += 1;
        }

        let has_quals = qual_count > 0;
        let expr = &children[qual_count];

        // Try the declaration shape: comma-chained names ending in a colon
        // with a type specifier, optionally behind an initializer
        let mut names: Vec<String> = Vec::new();
        let mut cursor = expr;
        let mut decl: Option<(Type, Option<&CstNode>)> = None;

        loop {
            let Some((mut left, mut op, mut right)) = bexp_parts(cursor) else {
                if has_quals {
                    return Err(self.invalid("expecting a declaration", cursor));
                }
                return self.expr_stmt(expr, parent);
            };

            let mut init = None;

            if *op == Token::Assign {
                let Some((in_left, in_op, in_right)) = bexp_parts(left) else {
                    if has_quals {
                        return Err(self.invalid("expecting a declaration", left));
                    }
                    return self.expr_stmt(expr, parent);
                };
                if *in_op != Token::Colon {
                    if has_quals {
                        return Err(self.invalid("expecting a colon", left));
                    }
                    return self.expr_stmt(expr, parent);
                }
                init = Some(right);
                op = in_op;
                right = in_right;
                left = in_left;
            }

            let Some(name) = atom_name(left) else {
                if has_quals {
                    return Err(self.invalid("expecting a name", left));
                }
                return self.expr_stmt(expr, parent);
            };
            names.push(name.to_string());

            match op {
                Token::Comma => {
                    cursor = right;
                }
                Token::Colon => {
                    let ty = self.typespec(right)?;
                    decl = Some((ty, init));
                    break;
                }
                _ => {
                    if has_quals {
                        return Err(self.invalid("expecting a colon", cursor));
                    }
                    return self.expr_stmt(expr, parent);
                }
            }
        }

        for i in 0..names.len() {
            for j in i + 1..names.len() {
                if names[i] == names[j] {
                    return Err(self.invalid("duplicate name in declaration", expr));
                }
            }
        }

        let Some((ty, init_cst)) = decl else {
            return self.expr_stmt(expr, parent);
        };

        let init = match init_cst {
            Some(cst) => Some(self.expr(cst)?),
            None => None,
        };

        let id = self.push_node(
            NodeKind::Decl {
                constant,
                exposed,
                static_,
                names,
                ty,
                init,
            },
            parent,
            stmt.span(),
        );
        if let Some(e) = init {
            self.adopt(id, &[e]);
        }
        Ok(id)
    }

    fn expr_stmt(&mut self, expr: &CstNode, parent: NodeId) -> Build<NodeId> {
        let id = self.expr(expr)?;
        self.ast.node_mut(id).parent = Some(parent);
        Ok(id)
    }

    // ==================== Expression lowering ====================

    fn expr(&mut self, expr: &CstNode) -> Build<NodeId> {
        let node = inner(expr);
        let span = node.span();

        match node.nt() {
            Some(NonTerminal::Pexp) => self.expr(&node.children()[1]),

            Some(NonTerminal::Wexp) => Err(self.invalid("unexpected time unit", node)),

            Some(NonTerminal::Bexp) => {
                let children = node.children();
                let op_token = children[1]
                    .leaf_token()
                    .ok_or_else(|| self.invalid("bad binary expression", node))?
                    .token
                    .clone();
                let op = bin_op(&op_token)
                    .ok_or_else(|| self.invalid("bad binary operator", node))?;

                let lhs = self.expr(&children[0])?;
                let rhs = if matches!(op, BinOp::Cast | BinOp::Colon) {
                    BinRhs::TypeSpec(self.typespec(&children[2])?)
                } else {
                    BinRhs::Expr(self.expr(&children[2])?)
                };

                let id = self.push_node(
                    NodeKind::Binary {
                        op,
                        lhs,
                        rhs: rhs.clone(),
                        ty: None,
                        member_idx: None,
                        probe: None,
                        enum_value: None,
                    },
                    NodeId(0),
                    span,
                );
                self.adopt(id, &[lhs]);
                if let BinRhs::Expr(r) = rhs {
                    self.adopt(id, &[r]);
                }
                self.ast.node_mut(id).parent = None;
                Ok(id)
            }

            Some(NonTerminal::Uexp) => {
                let children = node.children();
                let op_token = children[0]
                    .leaf_token()
                    .ok_or_else(|| self.invalid("bad unary expression", node))?
                    .token
                    .clone();
                let op = un_op(&op_token)
                    .ok_or_else(|| self.invalid("bad unary operator", node))?;

                let operand = if matches!(op, UnOp::SizeOf | UnOp::AlignOf) {
                    UnOperand::TypeSpec(self.typespec(&children[1])?)
                } else {
                    UnOperand::Expr(self.expr(&children[1])?)
                };

                let id = self.push_node(
                    NodeKind::Unary {
                        op,
                        operand: operand.clone(),
                        ty: None,
                    },
                    NodeId(0),
                    span,
                );
                if let UnOperand::Expr(o) = operand {
                    self.adopt(id, &[o]);
                }
                self.ast.node_mut(id).parent = None;
                Ok(id)
            }

            Some(NonTerminal::Fexp) => {
                let children = node.children();
                let callee = self.expr(&children[0])?;
                let mut args = Vec::new();
                if children.len() == 4 {
                    self.flatten_commas(&children[2], &mut args)?;
                }

                let id = self.push_node(
                    NodeKind::Call {
                        callee,
                        args: args.clone(),
                        ty: None,
                    },
                    NodeId(0),
                    span,
                );
                self.adopt(id, &[callee]);
                self.adopt(id, &args);
                self.ast.node_mut(id).parent = None;
                Ok(id)
            }

            Some(NonTerminal::Xexp) => {
                let children = node.children();
                let op = match children[1].leaf_token().map(|ts| &ts.token) {
                    Some(Token::Increment) => PostOp::Inc,
                    Some(Token::Decrement) => PostOp::Dec,
                    _ => return Err(self.invalid("bad postfix operator", node)),
                };
                let lhs = self.expr(&children[0])?;
                let id = self.push_node(NodeKind::Postfix { op, lhs, ty: None }, NodeId(0), span);
                self.adopt(id, &[lhs]);
                self.ast.node_mut(id).parent = None;
                Ok(id)
            }

            Some(NonTerminal::Aexp) => {
                let children = node.children();
                let base = self.expr(&children[0])?;
                let index = self.expr(&children[2])?;
                let id = self.push_node(
                    NodeKind::Index {
                        base,
                        index,
                        ty: None,
                    },
                    NodeId(0),
                    span,
                );
                self.adopt(id, &[base, index]);
                self.ast.node_mut(id).parent = None;
                Ok(id)
            }

            Some(NonTerminal::Texp) => {
                let children = node.children();
                let cond = self.expr(&children[0])?;
                let tval = self.expr(&children[2])?;
                let fval = self.expr(&children[4])?;
                let id = self.push_node(
                    NodeKind::Ternary {
                        cond,
                        tval,
                        fval,
                        ty: None,
                    },
                    NodeId(0),
                    span,
                );
                self.adopt(id, &[cond, tval, fval]);
                self.ast.node_mut(id).parent = None;
                Ok(id)
            }

            Some(NonTerminal::Atom) => {
                let token = node.children()[0]
                    .leaf_token()
                    .ok_or_else(|| self.invalid("bad atom", node))?
                    .token
                    .clone();

                let kind = match token {
                    Token::Name(text) => NodeKind::Name {
                        text,
                        resolved: None,
                        ty: None,
                    },
                    Token::Number(text) => {
                        let value = text
                            .parse::<u64>()
                            .map_err(|_| self.invalid("number literal too large", node))?;
                        NodeKind::Number { value, ty: None }
                    }
                    Token::Str(value) => NodeKind::Str { value, ty: None },
                    _ => return Err(self.invalid("bad atom", node)),
                };

                let id = self.push_node(kind, NodeId(0), span);
                self.ast.node_mut(id).parent = None;
                Ok(id)
            }

            _ => Err(self.invalid("bad expression", node)),
        }
    }

    /// Flatten a right-nested comma chain into argument expressions
    fn flatten_commas(&mut self, expr: &CstNode, out: &mut Vec<NodeId>) -> Build<()> {
        if let Some((left, op, right)) = bexp_parts(expr) {
            if *op == Token::Comma {
                out.push(self.expr(left)?);
                return self.flatten_commas(right, out);
            }
        }
        out.push(self.expr(expr)?);
        Ok(())
    }

    // ==================== Type specifiers ====================

    /// Parse a type specifier out of its expression-shaped concrete form
    fn typespec(&mut self, expr: &CstNode) -> Build<Type> {
        let node = inner(expr);

        match node.nt() {
            Some(NonTerminal::Atom) => {
                let Some(name) = atom_name(expr) else {
                    return Err(self.invalid("bad type name", node));
                };

                match match_type_name(name) {
                    Some(TypeNameMatch::Prim(spelling)) => {
                        let kind = prim_kind(spelling)
                            .ok_or_else(|| self.invalid("bad type name", node))?;
                        Ok(Type::scalar(kind))
                    }
                    Some(TypeNameMatch::Ptr) => {
                        Err(self.invalid("pointer must have a subtype", node))
                    }
                    Some(TypeNameMatch::Fptr) => {
                        Err(self.invalid("function pointer must list its arguments", node))
                    }
                    Some(TypeNameMatch::Quaint) => {
                        Err(self.invalid("quaint must have a subtype", node))
                    }
                    Some(TypeNameMatch::Struct) => {
                        Err(self.invalid("struct must have members", node))
                    }
                    Some(TypeNameMatch::Union) => {
                        Err(self.invalid("union must have members", node))
                    }
                    Some(TypeNameMatch::Enum) => {
                        Err(self.invalid("enum must list its values", node))
                    }
                    None => self.resolve_named(name, 1, node),
                }
            }

            Some(NonTerminal::Fexp) => {
                let children = node.children();
                let left = &children[0];
                let right = if children.len() == 4 {
                    Some(&children[2])
                } else {
                    None
                };

                let (count, name_node) = self.array_prefix(left)?;
                let Some(name) = atom_name(name_node) else {
                    return Err(self.invalid("bad type expression", left));
                };

                match match_type_name(name) {
                    Some(TypeNameMatch::Ptr) => {
                        let Some(right) = right else {
                            return Err(self.invalid("pointer must have a subtype", node));
                        };
                        let sub = self.typespec(right)?;
                        Ok(Type::array(TypeKind::Ptr(Box::new(sub)), count))
                    }
                    Some(TypeNameMatch::Quaint) => {
                        let sub = match right {
                            Some(right) => self.typespec(right)?,
                            None => Type::scalar(TypeKind::Void),
                        };
                        Ok(Type::array(TypeKind::Quaint(Box::new(sub)), count))
                    }
                    Some(TypeNameMatch::Fptr) => {
                        let params = match right {
                            Some(right) => self.type_name_pairs(right)?,
                            None => Vec::new(),
                        };
                        Ok(Type::array(TypeKind::Fptr { params, ret: None }, count))
                    }
                    Some(TypeNameMatch::Struct) | Some(TypeNameMatch::Union) => {
                        let is_struct = match_type_name(name) == Some(TypeNameMatch::Struct);
                        let Some(right) = right else {
                            return Err(self.invalid(
                                if is_struct {
                                    "struct must have members"
                                } else {
                                    "union must have members"
                                },
                                node,
                            ));
                        };
                        let members = self.type_name_pairs(right)?;
                        let kind = if is_struct {
                            TypeKind::Struct {
                                members,
                                offsets: Vec::new(),
                            }
                        } else {
                            TypeKind::Union {
                                members,
                                offsets: Vec::new(),
                            }
                        };
                        Ok(Type::array(kind, count))
                    }
                    Some(TypeNameMatch::Enum) => {
                        Err(self.invalid("enum must name an underlying integer kind", node))
                    }
                    Some(TypeNameMatch::Prim(_)) => {
                        Err(self.invalid("builtin type must not have a subtype", node))
                    }
                    None => Err(self.invalid("bad builtin type", node)),
                }
            }

            Some(NonTerminal::Aexp) => {
                let children = node.children();
                let Some(name) = atom_name(&children[0]) else {
                    return Err(self.invalid("bad array type", &children[0]));
                };
                let count = self.array_count(&children[2])?;

                match match_type_name(name) {
                    Some(TypeNameMatch::Prim(spelling)) => {
                        let kind = prim_kind(spelling)
                            .ok_or_else(|| self.invalid("bad type name", node))?;
                        Ok(Type::array(kind, count))
                    }
                    Some(TypeNameMatch::Ptr) => {
                        Err(self.invalid("array of pointers must have a subtype", node))
                    }
                    Some(TypeNameMatch::Fptr) => Err(self.invalid(
                        "array of function pointers must list its arguments",
                        node,
                    )),
                    Some(TypeNameMatch::Quaint) => {
                        Err(self.invalid("array of quaints must have a subtype", node))
                    }
                    Some(TypeNameMatch::Struct) => {
                        Err(self.invalid("array of structs must have members", node))
                    }
                    Some(TypeNameMatch::Union) => {
                        Err(self.invalid("array of unions must have members", node))
                    }
                    Some(TypeNameMatch::Enum) => {
                        Err(self.invalid("array of enums must list their values", node))
                    }
                    None => self.resolve_named(name, count, node),
                }
            }

            Some(NonTerminal::Bexp) => {
                let Some((left, op, right)) = bexp_parts(expr) else {
                    return Err(self.invalid("bad type expression", node));
                };

                if *op != Token::Colon {
                    return Err(self.invalid("bad type expression", node));
                }

                if !is_nt(left, NonTerminal::Fexp) {
                    return Err(self.invalid("expecting a functional expression", left));
                }

                let fexp = inner(left);
                let fexp_children = fexp.children();
                let fexp_right = if fexp_children.len() == 4 {
                    Some(&fexp_children[2])
                } else {
                    None
                };

                let (count, name_node) = self.array_prefix(&fexp_children[0])?;
                let Some(name) = atom_name(name_node) else {
                    return Err(self.invalid("bad type expression", name_node));
                };

                match match_type_name(name) {
                    Some(TypeNameMatch::Fptr) => {
                        let params = match fexp_right {
                            Some(right) => self.type_name_pairs(right)?,
                            None => Vec::new(),
                        };
                        let ret = self.typespec(right)?;
                        Ok(Type::array(
                            TypeKind::Fptr {
                                params,
                                ret: Some(Box::new(ret)),
                            },
                            count,
                        ))
                    }
                    Some(TypeNameMatch::Enum) => {
                        let Some(values_cst) = fexp_right else {
                            return Err(self.invalid("enum must list its values", node));
                        };
                        let values = self.enum_values(values_cst)?;
                        let underlying = self.enum_underlying(right)?;
                        Ok(Type::array(
                            TypeKind::Enum {
                                values,
                                underlying: Box::new(underlying),
                            },
                            count,
                        ))
                    }
                    _ => Err(self.invalid("expecting a function pointer or enum", name_node)),
                }
            }

            _ => Err(self.invalid("bad type specifier", node)),
        }
    }

    /// `name` or `name[N]` at the head of a parameterized type
    fn array_prefix<'c>(&mut self, left: &'c CstNode) -> Build<(u64, &'c CstNode)> {
        if is_nt(left, NonTerminal::Aexp) {
            let aexp = inner(left);
            let children = aexp.children();
            if atom_name(&children[0]).is_none() {
                return Err(self.invalid("bad array type", &children[0]));
            }
            let count = self.array_count(&children[2])?;
            Ok((count, &children[0]))
        } else {
            Ok((1, left))
        }
    }

    fn array_count(&mut self, size_expr: &CstNode) -> Build<u64> {
        let Some(text) = atom_number(size_expr) else {
            return Err(self.invalid("bad array size", size_expr));
        };
        text.parse::<u64>()
            .map_err(|_| self.invalid("bad array size", size_expr))
    }

    fn resolve_named(&mut self, name: &str, count: u64, node: &CstNode) -> Build<Type> {
        match self.types.find(name) {
            Some(found) => {
                let mut ty = found.clone();
                ty.count = count;
                Ok(ty)
            }
            None => {
                let candidates: Vec<String> =
                    self.types.names().map(str::to_string).collect();
                let similar = fuzzy::find_similar_names(name, &candidates, 0.7, 1);
                let mut diag = Diagnostic::error(
                    "reference to undefined type",
                    Span::from_range(node.span()),
                );
                if let Some(candidate) = similar.first() {
                    diag = diag.with_help(format!("did you mean `{}`?", candidate));
                }
                self.engine.emit(diag);
                Err(Reported)
            }
        }
    }

    /// Comma-chained `name: typespec` pairs (parameters, members)
    fn type_name_pairs(&mut self, expr: &CstNode) -> Build<Vec<TypeNamePair>> {
        let mut pairs = Vec::new();
        let mut cursor = expr;

        loop {
            let Some((left, op, right)) = bexp_parts(cursor) else {
                return Err(self.invalid("bad name-type pair", cursor));
            };

            if *op == Token::Comma {
                let Some((item_left, item_op, item_right)) = bexp_parts(left) else {
                    return Err(self.invalid("bad name-type pair", left));
                };
                if *item_op != Token::Colon {
                    return Err(self.invalid("expecting a colon", left));
                }
                let Some(name) = atom_name(item_left) else {
                    return Err(self.invalid("expecting a name", item_left));
                };
                let ty = self.typespec(item_right)?;
                pairs.push(TypeNamePair {
                    name: name.to_string(),
                    ty,
                });
                cursor = right;
            } else {
                if *op != Token::Colon {
                    return Err(self.invalid("expecting a colon", cursor));
                }
                let Some(name) = atom_name(left) else {
                    return Err(self.invalid("expecting a name", left));
                };
                let ty = self.typespec(right)?;
                pairs.push(TypeNamePair {
                    name: name.to_string(),
                    ty,
                });
                break;
            }
        }

        for i in 0..pairs.len() {
            for j in i + 1..pairs.len() {
                if pairs[i].name == pairs[j].name {
                    return Err(self.invalid("duplicate name in type-name list", expr));
                }
            }
        }

        Ok(pairs)
    }

    /// Enum value list: bare names auto-increment, `name = N` sets the
    /// counter
    fn enum_values(&mut self, expr: &CstNode) -> Build<Vec<(String, u64)>> {
        let mut values = Vec::new();
        let mut next = 0u64;
        let mut cursor = Some(expr);

        while let Some(item) = cursor {
            let (entry, rest) = match bexp_parts(item) {
                Some((left, Token::Comma, right)) => (left, Some(right)),
                _ => (item, None),
            };

            if let Some(name) = atom_name(entry) {
                values.push((name.to_string(), next));
                next = next.wrapping_add(1);
            } else if let Some((left, Token::Assign, right)) = bexp_parts(entry) {
                let Some(name) = atom_name(left) else {
                    return Err(self.invalid("expecting an enum value name", left));
                };
                let Some(text) = atom_number(right) else {
                    return Err(self.invalid("expecting an enum value number", right));
                };
                let value = text
                    .parse::<u64>()
                    .map_err(|_| self.invalid("number literal too large", right))?;
                values.push((name.to_string(), value));
                next = value.wrapping_add(1);
            } else {
                return Err(self.invalid("bad enum value", entry));
            }

            cursor = rest;
        }

        for i in 0..values.len() {
            for j in i + 1..values.len() {
                if values[i].0 == values[j].0 {
                    return Err(self.invalid("duplicate enum value name", expr));
                }
            }
        }

        Ok(values)
    }

    fn enum_underlying(&mut self, expr: &CstNode) -> Build<TypeKind> {
        let Some(name) = atom_name(expr) else {
            return Err(self.invalid("enum underlying must be an integer kind", expr));
        };
        match match_type_name(name) {
            Some(TypeNameMatch::Prim(spelling)) => {
                let kind = prim_kind(spelling)
                    .ok_or_else(|| self.invalid("enum underlying must be an integer kind", expr))?;
                if !kind.is_integral() {
                    return Err(self.invalid("enum underlying must be an integer kind", expr));
                }
                Ok(kind)
            }
            _ => Err(self.invalid("enum underlying must be an integer kind", expr)),
        }
    }
}

fn bin_op(token: &Token) -> Option<BinOp> {
    Some(match token {
        Token::Assign => BinOp::Assign,
        Token::PlusAssign => BinOp::AddAssign,
        Token::MinusAssign => BinOp::SubAssign,
        Token::StarAssign => BinOp::MulAssign,
        Token::SlashAssign => BinOp::DivAssign,
        Token::PercentAssign => BinOp::ModAssign,
        Token::ShlAssign => BinOp::ShlAssign,
        Token::ShrAssign => BinOp::ShrAssign,
        Token::AmpAssign => BinOp::AndAssign,
        Token::CaretAssign => BinOp::XorAssign,
        Token::PipeAssign => BinOp::OrAssign,
        Token::Colon => BinOp::Colon,
        Token::PathSep => BinOp::Scope,
        Token::At => BinOp::At,
        Token::Dot => BinOp::Member,
        Token::Arrow => BinOp::Arrow,
        Token::EqEq => BinOp::Eq,
        Token::NotEq => BinOp::NotEq,
        Token::Lt => BinOp::Lt,
        Token::Gt => BinOp::Gt,
        Token::LtEq => BinOp::LtEq,
        Token::GtEq => BinOp::GtEq,
        Token::AndAnd => BinOp::LogicalAnd,
        Token::OrOr => BinOp::LogicalOr,
        Token::Plus => BinOp::Add,
        Token::Minus => BinOp::Sub,
        Token::Star => BinOp::Mul,
        Token::Slash => BinOp::Div,
        Token::Percent => BinOp::Mod,
        Token::Shl => BinOp::Shl,
        Token::Shr => BinOp::Shr,
        Token::Ampersand => BinOp::BitAnd,
        Token::Caret => BinOp::BitXor,
        Token::Pipe => BinOp::BitOr,
        Token::Comma => BinOp::Comma,
        Token::As => BinOp::Cast,
        _ => return None,
    })
}

fn un_op(token: &Token) -> Option<UnOp> {
    Some(match token {
        Token::Plus => UnOp::Plus,
        Token::Minus => UnOp::Neg,
        Token::Not => UnOp::Not,
        Token::Tilde => UnOp::Quaintify,
        Token::Star => UnOp::Deref,
        Token::Ampersand => UnOp::AddrOf,
        Token::Caret => UnOp::BitNot,
        Token::Increment => UnOp::PreInc,
        Token::Decrement => UnOp::PreDec,
        Token::Sizeof => UnOp::SizeOf,
        Token::Alignof => UnOp::AlignOf,
        _ => return None,
    })
}

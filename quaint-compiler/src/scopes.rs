// Scope builder: attaches a scope to every scope-introducing node, injects
// the built-ins ahead of user symbols, marks duplicates so each is reported
// exactly once, and collects the wait labels of every function. Entries are
// sorted by name so resolution is a binary search.

use quaint_ast::{
    Ast, BconId, BfunId, NodeId, NodeKind, ObjKind, Scope, ScopeId, ScopeObj, Scopes,
};
use quaint_diagnostics::{DiagnosticEngine, Span};

/// Scope entry paired with the span its duplicate would be reported at
struct Entry {
    obj: ScopeObj,
    span: std::ops::Range<usize>,
}

pub fn build_scopes(ast: &mut Ast, engine: &mut DiagnosticEngine) -> Scopes {
    let mut scopes = Scopes::new();
    let root = ast.root();

    let stmts = match ast.kind(root) {
        NodeKind::Unit { stmts, .. } => stmts.clone(),
        _ => Vec::new(),
    };

    let unit_scope = scopes.push(Scope::default());

    let mut entries = Vec::new();

    for id in BconId::all() {
        entries.push(Entry {
            obj: ScopeObj {
                name: id.name().to_string(),
                kind: ObjKind::BuiltinConst(id),
            },
            span: 0..0,
        });
    }

    for id in BfunId::all() {
        entries.push(Entry {
            obj: ScopeObj {
                name: id.name().to_string(),
                kind: ObjKind::BuiltinFunc(id),
            },
            span: 0..0,
        });
    }

    for &stmt in &stmts {
        match ast.kind(stmt) {
            NodeKind::Decl { names, .. } => {
                let span = ast.span(stmt);
                for (name_idx, name) in names.clone().into_iter().enumerate() {
                    entries.push(Entry {
                        obj: ScopeObj {
                            name,
                            kind: ObjKind::Global {
                                decl: stmt,
                                name_idx,
                            },
                        },
                        span: span.clone(),
                    });
                }
            }

            NodeKind::Func(data) => {
                entries.push(Entry {
                    obj: ScopeObj {
                        name: data.name.clone(),
                        kind: ObjKind::Func {
                            node: stmt,
                            index: data.index,
                        },
                    },
                    span: ast.span(stmt),
                });
                build_func(ast, &mut scopes, engine, stmt, unit_scope);
            }

            _ => {}
        }
    }

    finish_scope(&mut scopes, unit_scope, entries, engine);

    if let NodeKind::Unit { scope, .. } = &mut ast.node_mut(root).kind {
        *scope = Some(unit_scope);
    }

    scopes
}

fn build_func(
    ast: &mut Ast,
    scopes: &mut Scopes,
    engine: &mut DiagnosticEngine,
    func_id: NodeId,
    outer: ScopeId,
) {
    let (params, stmts, func_span) = match ast.kind(func_id) {
        NodeKind::Func(data) => (
            data.params
                .iter()
                .map(|p| p.name.clone())
                .collect::<Vec<_>>(),
            data.stmts.clone(),
            ast.span(func_id),
        ),
        _ => return,
    };

    let scope_id = scopes.push(Scope {
        outer: Some(outer),
        objs: Vec::new(),
    });

    let mut entries: Vec<Entry> = params
        .into_iter()
        .enumerate()
        .map(|(index, name)| Entry {
            obj: ScopeObj {
                name,
                kind: ObjKind::Param {
                    func: func_id,
                    index,
                },
            },
            span: func_span.clone(),
        })
        .collect();

    let mut wlabs = Vec::new();

    for &stmt in &stmts {
        collect_stmt(ast, scopes, engine, stmt, scope_id, &mut entries, &mut wlabs);
    }

    finish_scope(scopes, scope_id, entries, engine);

    // group labels: sort by spelling, equal spellings share one id
    wlabs.sort();
    let mut identified: Vec<(String, u64)> = Vec::with_capacity(wlabs.len());
    let mut id = 0u64;
    for name in wlabs {
        match identified.last() {
            Some((prev, prev_id)) if *prev == name => {
                let prev_id = *prev_id;
                identified.push((name, prev_id));
            }
            _ => {
                id += 1;
                identified.push((name, id));
            }
        }
    }

    if let Some(data) = ast.func_mut(func_id) {
        data.scope = Some(scope_id);
        data.wlabs = identified;
    }
}

/// Handle one statement while building the scope `current`: declarations
/// add entries, wait labels accumulate, nested blocks get scopes of their
/// own
fn collect_stmt(
    ast: &mut Ast,
    scopes: &mut Scopes,
    engine: &mut DiagnosticEngine,
    stmt: NodeId,
    current: ScopeId,
    entries: &mut Vec<Entry>,
    wlabs: &mut Vec<String>,
) {
    match ast.kind(stmt) {
        NodeKind::Decl { names, .. } => {
            let span = ast.span(stmt);
            for (name_idx, name) in names.clone().into_iter().enumerate() {
                entries.push(Entry {
                    obj: ScopeObj {
                        name,
                        kind: ObjKind::Auto {
                            decl: stmt,
                            name_idx,
                        },
                    },
                    span: span.clone(),
                });
            }
        }

        NodeKind::WaitLabel { name, .. } => {
            wlabs.push(name.clone());
        }

        NodeKind::Block { stmts, .. }
        | NodeKind::While { stmts, .. }
        | NodeKind::DoWhile { stmts, .. } => {
            let stmts = stmts.clone();
            build_block(ast, scopes, engine, stmt, &stmts, current, wlabs);
        }

        NodeKind::Cond {
            if_block,
            elifs,
            else_block,
            ..
        } => {
            let mut blocks = vec![*if_block];
            blocks.extend(elifs.iter().map(|(_, b)| *b));
            if let Some(b) = else_block {
                blocks.push(*b);
            }

            for block in blocks {
                let stmts = match ast.kind(block) {
                    NodeKind::Block { stmts, .. } => stmts.clone(),
                    _ => continue,
                };
                build_block(ast, scopes, engine, block, &stmts, current, wlabs);
            }
        }

        _ => {}
    }
}

fn build_block(
    ast: &mut Ast,
    scopes: &mut Scopes,
    engine: &mut DiagnosticEngine,
    block_id: NodeId,
    stmts: &[NodeId],
    outer: ScopeId,
    wlabs: &mut Vec<String>,
) {
    let scope_id = scopes.push(Scope {
        outer: Some(outer),
        objs: Vec::new(),
    });

    let mut entries = Vec::new();

    for &stmt in stmts {
        collect_stmt(ast, scopes, engine, stmt, scope_id, &mut entries, wlabs);
    }

    finish_scope(scopes, scope_id, entries, engine);

    match &mut ast.node_mut(block_id).kind {
        NodeKind::Block { scope, .. }
        | NodeKind::While { scope, .. }
        | NodeKind::DoWhile { scope, .. } => *scope = Some(scope_id),
        _ => {}
    }
}

/// Mark duplicates (reporting each duplicate occurrence once), then sort
/// for binary search and install the entries
fn finish_scope(
    scopes: &mut Scopes,
    scope_id: ScopeId,
    mut entries: Vec<Entry>,
    engine: &mut DiagnosticEngine,
) {
    for outer_idx in 0..entries.len() {
        if entries[outer_idx].obj.kind == ObjKind::Duplicate {
            continue;
        }

        let mut found_dup = false;

        for inner_idx in outer_idx + 1..entries.len() {
            if entries[outer_idx].obj.name == entries[inner_idx].obj.name {
                found_dup = true;
                let name = entries[inner_idx].obj.name.clone();
                let span = entries[inner_idx].span.clone();
                engine.emit_error(
                    format!("duplicate declaration of `{}`", name),
                    Span::from_range(span),
                );
                entries[inner_idx].obj.kind = ObjKind::Duplicate;
            }
        }

        if found_dup {
            entries[outer_idx].obj.kind = ObjKind::Duplicate;
        }
    }

    let mut objs: Vec<ScopeObj> = entries.into_iter().map(|e| e.obj).collect();
    objs.sort_by(|a, b| a.name.cmp(&b.name));
    scopes.scope_mut(scope_id).objs = objs;
}

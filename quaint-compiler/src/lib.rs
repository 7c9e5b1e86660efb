// The Quaint compiler core: CST -> typed AST -> scopes -> type checking ->
// three-address code. The lexer and parser live in their own crates; the
// VM executes the Program this crate produces.

pub mod builder;
pub mod codegen;
pub mod scopes;
pub mod typeck;

pub use builder::{build_ast, BuildOutput};
pub use codegen::ir::{AluOp, CmpOp, Instr, Opd, Place, Program, QatProbe, WlabRef};
pub use codegen::{generate, listing};
pub use quaint_parser::{CstNode, ParseError, Parser};
pub use scopes::build_scopes;
pub use typeck::check_types;

use quaint_diagnostics::{DiagnosticEngine, Span};

#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("{count} error(s) emitted")]
    Invalid { count: usize },

    #[error("internal compiler error: {0}")]
    Internal(&'static str),
}

/// Run the whole front end over a source string. Diagnostics accumulate in
/// the engine; the pipeline stops at the first phase that reported errors.
pub fn compile(
    source: &str,
    engine: &mut DiagnosticEngine,
) -> Result<Program, CompileError> {
    let invalid = |engine: &DiagnosticEngine| CompileError::Invalid {
        count: engine.error_count(),
    };

    let cst = match Parser::new(source).and_then(|mut p| p.parse_unit()) {
        Ok(cst) => cst,
        Err(err) => {
            engine.emit_error(err.to_string(), Span::from_range(err.span()));
            return Err(invalid(engine));
        }
    };

    let BuildOutput { mut ast, types } = build_ast(&cst, engine);
    if engine.has_errors() {
        return Err(invalid(engine));
    }

    let scopes = build_scopes(&mut ast, engine);
    if engine.has_errors() {
        return Err(invalid(engine));
    }

    check_types(&mut ast, &scopes, &types, engine);
    if engine.has_errors() {
        return Err(invalid(engine));
    }

    generate(&ast)
}

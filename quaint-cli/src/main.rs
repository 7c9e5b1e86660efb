use anyhow::Result;
use clap::Parser;
use quaint_diagnostics::DiagnosticEngine;
use quaint_vm::Machine;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "quaint")]
#[command(version = "0.2.0")]
#[command(about = "Quaint Programming Language", long_about = None)]
struct Cli {
    /// Input source file
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Print the instruction listing before running
    #[arg(long)]
    emit_ir: bool,

    /// Print the typed AST as JSON and exit
    #[arg(long)]
    emit_ast: bool,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    match run(&cli) {
        Ok(status) => ExitCode::from(status as u8),
        Err(err) => {
            eprintln!("error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<i32> {
    let file = cli.input.display().to_string();
    let source = std::fs::read_to_string(&cli.input)?;

    if source.is_empty() {
        anyhow::bail!("`{}`: file is empty", file);
    }

    let mut engine = DiagnosticEngine::new();

    if cli.emit_ast {
        return emit_ast(&source, &file, &mut engine);
    }

    log::info!("compiling {}", file);

    let program = match quaint_compiler::compile(&source, &mut engine) {
        Ok(program) => program,
        Err(err) => {
            engine.print_all(&file, &source);
            engine.print_summary();
            anyhow::bail!(err);
        }
    };

    if engine.warning_count() > 0 {
        engine.print_all(&file, &source);
    }

    if cli.emit_ir {
        print!("{}", quaint_compiler::listing(&program));
    }

    let mut machine = Machine::new(&program);
    let status = machine.run()?;
    Ok(status)
}

fn emit_ast(source: &str, file: &str, engine: &mut DiagnosticEngine) -> Result<i32> {
    let mut parser = quaint_compiler::Parser::new(source)
        .map_err(|e| anyhow::anyhow!("parse error: {}", e))?;
    let cst = parser
        .parse_unit()
        .map_err(|e| anyhow::anyhow!("parse error: {}", e))?;

    let bail = |engine: &DiagnosticEngine| {
        engine.print_all(file, source);
        engine.print_summary();
        anyhow::anyhow!("{} error(s) emitted", engine.error_count())
    };

    let output = quaint_compiler::build_ast(&cst, engine);
    if engine.has_errors() {
        return Err(bail(engine));
    }

    let mut ast = output.ast;
    let scopes = quaint_compiler::build_scopes(&mut ast, engine);
    if engine.has_errors() {
        return Err(bail(engine));
    }

    quaint_compiler::check_types(&mut ast, &scopes, &output.types, engine);
    if engine.has_errors() {
        return Err(bail(engine));
    }

    println!("{}", serde_json::to_string_pretty(&ast)?);
    Ok(0)
}

use std::fs;
use std::io::Read;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use miette::{bail, miette, Diagnostic, IntoDiagnostic, Result};

use thiserror::Error;
use tracing::level_filters::LevelFilter;
use tracing::{debug, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use inkwell::context::Context;
use inkwell::targets::{
    CodeModel, FileType, InitializationConfig, RelocMode, Target, TargetMachine,
};
use inkwell::OptimizationLevel;

use kaleido::ast::Item;
use kaleido::{Codegen, CodegenError, CompilationSession, ParsingError};

#[derive(Debug, Parser)]
#[command(version, about = None, long_about = None)]
#[command(propagate_version = true)]
struct CliArgs {
    /// Path to the source code file; standard input when omitted
    input_file: Option<PathBuf>,

    /// Path to the output object file
    #[arg(short, long)]
    output_file: Option<PathBuf>,

    /// Execution mode
    #[arg(value_enum)]
    #[arg(short, long)]
    #[arg(default_value_t = ExecutionMode::Compile)]
    mode: ExecutionMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ExecutionMode {
    /// Compile the source code to machine code
    Compile,

    /// Inspect the AST of the parsed source code
    Parse,

    /// Inspect the generated LLVM IR
    Ir,
}

#[derive(Debug, Error, Diagnostic)]
enum UnitError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Parse(#[from] ParsingError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Codegen(#[from] CodegenError),
}

#[derive(Debug, Error, Diagnostic)]
#[error("Compilation failed")]
struct AppError {
    #[related]
    errs: Vec<UnitError>,

    #[source_code]
    code: String,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().without_time())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::WARN.into())
                .from_env_lossy(),
        )
        .init();

    let args = CliArgs::parse();

    let (source, module_name) = match &args.input_file {
        Some(path) => {
            if !path.is_file() {
                bail!("No proper input file: {:?}", path);
            }
            let name = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_else(|| String::from("kaleido"));
            (fs::read_to_string(path).into_diagnostic()?, name)
        }
        None => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .into_diagnostic()?;
            (buffer, String::from("kaleido"))
        }
    };

    let mut session = CompilationSession::new();
    let mut parser = kaleido::Parser::new(&source);
    let context = Context::create();
    let mut codegen = Codegen::new(&context, &module_name);

    // Each unit parses and lowers independently; a failed one is reported,
    // skipped past, and leaves everything compiled so far intact.
    let mut errors = Vec::new();
    loop {
        match parser.next_item(&mut session) {
            Ok(None) => break,
            Ok(Some(item)) => {
                if args.mode == ExecutionMode::Parse {
                    item.pretty_print().into_diagnostic()?;
                    continue;
                }
                match codegen.compile_item(&mut session, &item) {
                    Ok(function) => {
                        match &item {
                            Item::Definition(_) => info!("read function definition"),
                            Item::Extern(_) => info!("read extern"),
                            Item::TopLevelExpr(_) => info!("read top-level expression"),
                        }
                        debug!("{}", function.print_to_string().to_string());
                    }
                    Err(err) => errors.push(UnitError::from(err)),
                }
            }
            Err(err) => {
                errors.push(UnitError::from(err));
                parser.recover();
            }
        }
    }

    if !errors.is_empty() {
        return Err(AppError {
            errs: errors,
            code: source,
        }
        .into());
    }

    if args.mode == ExecutionMode::Parse {
        return Ok(());
    }

    let module = codegen.finish();

    if args.mode == ExecutionMode::Ir {
        println!("{}", module.print_to_string().to_string());
        return Ok(());
    }

    Target::initialize_all(&InitializationConfig::default());

    let triple = TargetMachine::get_default_triple();
    let target = Target::from_triple(&triple).map_err(|e| miette!("Failed to resolve target: {e}"))?;
    let target_machine = target
        .create_target_machine(
            &triple,
            "generic",
            "",
            OptimizationLevel::Default,
            RelocMode::Default,
            CodeModel::Default,
        )
        .ok_or_else(|| miette!("Failed to create a target machine"))?;

    let out = args.output_file.unwrap_or_else(|| PathBuf::from("out.o"));
    if out.exists() {
        warn!("{:?} already exists and will be overridden", &out);
    }

    target_machine
        .write_to_file(&module, FileType::Object, &out)
        .or_else(|_| bail!("Failed to write to file"))?;

    Ok(())
}

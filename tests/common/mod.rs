use inkwell::context::Context;

use kaleido::{Codegen, CompilationSession, Parser};

/// Drive the whole front end over `src` and hand back the textual IR of the
/// finished module. Panics on the first parse or codegen error.
pub fn run_pipeline(src: &str) -> String {
    let mut session = CompilationSession::new();
    let mut parser = Parser::new(src);
    let context = Context::create();
    let mut codegen = Codegen::new(&context, "test");

    while let Some(item) = parser.next_item(&mut session).unwrap() {
        codegen.compile_item(&mut session, &item).unwrap();
    }

    codegen.finish().print_to_string().to_string()
}

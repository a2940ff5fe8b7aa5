//! Code generation
//!
//! This module lowers parsed units into an LLVM module via inkwell. Every
//! value in the language is a double; every variable (parameters included)
//! lives in a stack slot allocated in its function's entry block, so
//! assignment is an ordinary store and mem2reg can clean up afterwards.
//!
//! The generator keeps one function's symbol table at a time. Binding
//! constructs (`for`, `var ... in`) shadow by saving the previous slot for
//! each name and putting it back when their scope closes. Cross-unit state
//! (which functions exist, with which arity) comes from the
//! [CompilationSession].

use std::collections::HashMap;

use inkwell::builder::{Builder, BuilderError};
use inkwell::context::Context;
use inkwell::module::Module;
use inkwell::types::BasicMetadataTypeEnum;
use inkwell::values::{BasicMetadataValueEnum, FloatValue, FunctionValue, PointerValue};
use inkwell::FloatPredicate;

use miette::Diagnostic;
use thiserror::Error;

use crate::ast::{Expression, ExpressionKind, Function, Item, Prototype};
use crate::debug::{DebugEventSink, NoopDebugSink};
use crate::session::CompilationSession;
use crate::SourceLocation;

#[derive(Debug, Error, Diagnostic)]
pub enum CodegenError {
    #[error("{loc}: Unknown variable name: {name}")]
    UnknownVariable { name: String, loc: SourceLocation },

    #[error("{loc}: Unknown function referenced: {name}")]
    UnknownFunction { name: String, loc: SourceLocation },

    #[error("{loc}: Function {name} takes {expected} arguments but {found} were passed")]
    WrongArgumentCount {
        name: String,
        expected: usize,
        found: usize,
        loc: SourceLocation,
    },

    #[error("{loc}: Function {name} was already declared with {expected} parameters, not {found}")]
    ConflictingDeclaration {
        name: String,
        expected: usize,
        found: usize,
        loc: SourceLocation,
    },

    #[error("{loc}: Function {name} cannot be redefined")]
    Redefinition { name: String, loc: SourceLocation },

    #[error("{loc}: Destination of '=' must be a variable")]
    InvalidAssignmentTarget { loc: SourceLocation },

    #[error("{loc}: Operator '{op}' has not been declared")]
    #[diagnostic(help("declare it with 'def unary{op} (v) ...' or 'def binary{op} (a b) ...'"))]
    UndeclaredOperator { op: char, loc: SourceLocation },

    #[error("Generated function {name} failed verification")]
    MalformedFunction { name: String },

    #[error("LLVM builder failure: {0}")]
    Builder(#[from] BuilderError),
}

pub struct Codegen<'ctx, D = NoopDebugSink> {
    context: &'ctx Context,
    builder: Builder<'ctx>,
    module: Module<'ctx>,
    /// Per-function symbol table: variable name to its stack slot.
    variables: HashMap<String, PointerValue<'ctx>>,
    debug: D,
}

impl<'ctx> Codegen<'ctx> {
    pub fn new(context: &'ctx Context, module_name: &str) -> Self {
        Self::with_debug_sink(context, module_name, NoopDebugSink)
    }
}

impl<'ctx, D: DebugEventSink> Codegen<'ctx, D> {
    /// A generator that reports scopes and source locations to `debug` as
    /// it emits instructions.
    pub fn with_debug_sink(context: &'ctx Context, module_name: &str, debug: D) -> Self {
        Self {
            context,
            builder: context.create_builder(),
            module: context.create_module(module_name),
            variables: HashMap::new(),
            debug,
        }
    }

    pub fn module(&self) -> &Module<'ctx> {
        &self.module
    }

    /// Flush the debug sink and hand over the finished module.
    pub fn finish(mut self) -> Module<'ctx> {
        self.debug.finalize();
        self.module
    }

    /// Lower one top-level unit into the module.
    pub fn compile_item(
        &mut self,
        session: &mut CompilationSession,
        item: &Item,
    ) -> Result<FunctionValue<'ctx>, CodegenError> {
        match item {
            Item::Definition(function) | Item::TopLevelExpr(function) => {
                self.compile_function(session, function)
            }
            Item::Extern(prototype) => self.compile_prototype(session, prototype),
        }
    }

    fn compile_function(
        &mut self,
        session: &mut CompilationSession,
        func: &Function,
    ) -> Result<FunctionValue<'ctx>, CodegenError> {
        let proto = &func.prototype;
        let function = self.compile_prototype(session, proto)?;

        if function.count_basic_blocks() > 0 {
            return Err(CodegenError::Redefinition {
                name: proto.name.clone(),
                loc: proto.loc,
            });
        }

        self.debug
            .enter_function_scope(&proto.name, proto.loc.line, proto.params.len());
        let result = self.compile_function_body(session, func, function);
        self.debug.exit_function_scope();

        match result {
            Ok(()) if function.verify(true) => Ok(function),
            Ok(()) => {
                unsafe { function.delete() };
                Err(CodegenError::MalformedFunction {
                    name: proto.name.clone(),
                })
            }
            Err(err) => {
                // A half-built function must not stay in the module. The
                // session still has the prototype, so later units can
                // re-declare and call a fixed version.
                unsafe { function.delete() };
                Err(err)
            }
        }
    }

    fn compile_function_body(
        &mut self,
        session: &CompilationSession,
        func: &Function,
        function: FunctionValue<'ctx>,
    ) -> Result<(), CodegenError> {
        let entry = self.context.append_basic_block(function, "entry");
        self.builder.position_at_end(entry);

        // The prologue belongs to no source line.
        self.debug.clear_location();

        // Parameters become mutable locals: copy each into its own slot.
        self.variables.clear();
        for (param, name) in function.get_param_iter().zip(&func.prototype.params) {
            let slot = self.create_entry_block_alloca(function, name)?;
            self.builder.build_store(slot, param.into_float_value())?;
            self.variables.insert(name.clone(), slot);
        }

        self.debug.attach_location(func.body.loc);
        let body_value = self.compile_expression(session, &func.body, function)?;
        self.builder.build_return(Some(&body_value))?;
        Ok(())
    }

    /// Declare (or re-find) the function for `proto` and record its
    /// signature in the session.
    fn compile_prototype(
        &mut self,
        session: &mut CompilationSession,
        proto: &Prototype,
    ) -> Result<FunctionValue<'ctx>, CodegenError> {
        session
            .register_prototype(proto.clone())
            .map_err(|conflict| CodegenError::ConflictingDeclaration {
                name: proto.name.clone(),
                expected: conflict.expected,
                found: conflict.found,
                loc: proto.loc,
            })?;

        match self.module.get_function(&proto.name) {
            Some(existing) => Ok(existing),
            None => self.declare_function(proto),
        }
    }

    fn declare_function(&self, proto: &Prototype) -> Result<FunctionValue<'ctx>, CodegenError> {
        let f64_type = self.context.f64_type();
        let param_types: Vec<BasicMetadataTypeEnum> =
            vec![f64_type.into(); proto.params.len()];
        let fn_type = f64_type.fn_type(&param_types, false);

        let function = self.module.add_function(&proto.name, fn_type, None);
        for (param, name) in function.get_param_iter().zip(&proto.params) {
            param.into_float_value().set_name(name);
        }
        Ok(function)
    }

    /// Look up a callable by name: in the module first, then by declaring
    /// the signature on record in the session (a forward reference).
    fn get_function(
        &self,
        session: &CompilationSession,
        name: &str,
    ) -> Result<Option<FunctionValue<'ctx>>, CodegenError> {
        if let Some(function) = self.module.get_function(name) {
            return Ok(Some(function));
        }
        match session.prototype(name) {
            Some(proto) => self.declare_function(proto).map(Some),
            None => Ok(None),
        }
    }

    fn compile_expression(
        &mut self,
        session: &CompilationSession,
        expr: &Expression,
        function: FunctionValue<'ctx>,
    ) -> Result<FloatValue<'ctx>, CodegenError> {
        self.debug.attach_location(expr.loc);
        let f64_type = self.context.f64_type();

        match &expr.kind {
            ExpressionKind::Number(value) => Ok(f64_type.const_float(*value)),

            ExpressionKind::Variable(name) => {
                let slot = *self.variables.get(name).ok_or_else(|| {
                    CodegenError::UnknownVariable {
                        name: name.clone(),
                        loc: expr.loc,
                    }
                })?;
                Ok(self
                    .builder
                    .build_load(f64_type, slot, name)?
                    .into_float_value())
            }

            ExpressionKind::Unary { op, operand } => {
                let operand = self.compile_expression(session, operand, function)?;
                let target = self
                    .get_function(session, &format!("unary{op}"))?
                    .ok_or(CodegenError::UndeclaredOperator {
                        op: *op,
                        loc: expr.loc,
                    })?;
                self.build_checked_call(target, &[operand.into()], "unop")
            }

            ExpressionKind::Binary { op, lhs, rhs } => {
                // Assignment is intercepted before ordinary binary
                // handling: the left side is a storage target, not a value.
                if *op == '=' {
                    let ExpressionKind::Variable(name) = &lhs.kind else {
                        return Err(CodegenError::InvalidAssignmentTarget { loc: lhs.loc });
                    };
                    let value = self.compile_expression(session, rhs, function)?;
                    let slot = *self.variables.get(name).ok_or_else(|| {
                        CodegenError::UnknownVariable {
                            name: name.clone(),
                            loc: lhs.loc,
                        }
                    })?;
                    self.builder.build_store(slot, value)?;
                    return Ok(value);
                }

                let lhs = self.compile_expression(session, lhs, function)?;
                let rhs = self.compile_expression(session, rhs, function)?;

                match op {
                    '+' => Ok(self.builder.build_float_add(lhs, rhs, "addtmp")?),
                    '-' => Ok(self.builder.build_float_sub(lhs, rhs, "subtmp")?),
                    '*' => Ok(self.builder.build_float_mul(lhs, rhs, "multmp")?),
                    '<' => {
                        let cmp = self.builder.build_float_compare(
                            FloatPredicate::ULT,
                            lhs,
                            rhs,
                            "cmptmp",
                        )?;
                        // 0.0 or 1.0, back in the one type the language has.
                        Ok(self
                            .builder
                            .build_unsigned_int_to_float(cmp, f64_type, "booltmp")?)
                    }
                    op => {
                        let target = self
                            .get_function(session, &format!("binary{op}"))?
                            .ok_or(CodegenError::UndeclaredOperator {
                                op: *op,
                                loc: expr.loc,
                            })?;
                        self.build_checked_call(target, &[lhs.into(), rhs.into()], "binop")
                    }
                }
            }

            ExpressionKind::Call { callee, args } => {
                let target = self.get_function(session, callee)?.ok_or_else(|| {
                    CodegenError::UnknownFunction {
                        name: callee.clone(),
                        loc: expr.loc,
                    }
                })?;

                if target.count_params() as usize != args.len() {
                    return Err(CodegenError::WrongArgumentCount {
                        name: callee.clone(),
                        expected: target.count_params() as usize,
                        found: args.len(),
                        loc: expr.loc,
                    });
                }

                let mut arguments: Vec<BasicMetadataValueEnum> = Vec::with_capacity(args.len());
                for arg in args {
                    arguments.push(self.compile_expression(session, arg, function)?.into());
                }
                self.build_checked_call(target, &arguments, "calltmp")
            }

            ExpressionKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                let zero = f64_type.const_float(0.0);
                let condition = self.compile_expression(session, condition, function)?;
                let condition = self.builder.build_float_compare(
                    FloatPredicate::ONE,
                    condition,
                    zero,
                    "ifcond",
                )?;

                let then_bb = self.context.append_basic_block(function, "then");
                let else_bb = self.context.append_basic_block(function, "else");
                let merge_bb = self.context.append_basic_block(function, "ifcont");
                self.builder
                    .build_conditional_branch(condition, then_bb, else_bb)?;

                // Either arm may emit blocks of its own; the phi needs the
                // block each arm actually ends in.
                self.builder.position_at_end(then_bb);
                let then_value = self.compile_expression(session, then_branch, function)?;
                let then_end = self.current_block();
                self.builder.build_unconditional_branch(merge_bb)?;

                self.builder.position_at_end(else_bb);
                let else_value = self.compile_expression(session, else_branch, function)?;
                let else_end = self.current_block();
                self.builder.build_unconditional_branch(merge_bb)?;

                self.builder.position_at_end(merge_bb);
                let phi = self.builder.build_phi(f64_type, "iftmp")?;
                phi.add_incoming(&[(&then_value, then_end), (&else_value, else_end)]);
                Ok(phi.as_basic_value().into_float_value())
            }

            ExpressionKind::For {
                var,
                start,
                end,
                step,
                body,
            } => {
                let slot = self.create_entry_block_alloca(function, var)?;
                let start_value = self.compile_expression(session, start, function)?;
                self.builder.build_store(slot, start_value)?;

                let loop_bb = self.context.append_basic_block(function, "loop");
                self.builder.build_unconditional_branch(loop_bb)?;
                self.builder.position_at_end(loop_bb);

                // The loop variable shadows any outer binding of the same
                // name for the duration of the loop.
                let shadowed = self.variables.insert(var.clone(), slot);

                self.compile_expression(session, body, function)?;

                let step_value = match step {
                    Some(step) => self.compile_expression(session, step, function)?,
                    None => f64_type.const_float(1.0),
                };
                let end_value = self.compile_expression(session, end, function)?;

                let current = self
                    .builder
                    .build_load(f64_type, slot, var)?
                    .into_float_value();
                let next = self.builder.build_float_add(current, step_value, "nextvar")?;
                self.builder.build_store(slot, next)?;

                let zero = f64_type.const_float(0.0);
                let continue_loop = self.builder.build_float_compare(
                    FloatPredicate::ONE,
                    end_value,
                    zero,
                    "loopcond",
                )?;

                let after_bb = self.context.append_basic_block(function, "afterloop");
                self.builder
                    .build_conditional_branch(continue_loop, loop_bb, after_bb)?;
                self.builder.position_at_end(after_bb);

                match shadowed {
                    Some(previous) => {
                        self.variables.insert(var.clone(), previous);
                    }
                    None => {
                        self.variables.remove(var);
                    }
                }

                // A for expression always evaluates to 0.0.
                Ok(zero)
            }

            ExpressionKind::VarIn { bindings, body } => {
                let mut shadowed: Vec<(String, Option<PointerValue<'ctx>>)> =
                    Vec::with_capacity(bindings.len());

                for (name, init) in bindings {
                    // The initializer runs in the scope as it was before
                    // this binding, so `var a = a in ...` reads the outer a.
                    let value = match init {
                        Some(init) => self.compile_expression(session, init, function)?,
                        None => f64_type.const_float(0.0),
                    };
                    let slot = self.create_entry_block_alloca(function, name)?;
                    self.builder.build_store(slot, value)?;
                    shadowed.push((name.clone(), self.variables.insert(name.clone(), slot)));
                }

                let body_value = self.compile_expression(session, body, function)?;

                // Unwind the scope to exactly its previous state, most
                // recent binding first.
                for (name, previous) in shadowed.into_iter().rev() {
                    match previous {
                        Some(slot) => {
                            self.variables.insert(name, slot);
                        }
                        None => {
                            self.variables.remove(&name);
                        }
                    }
                }

                Ok(body_value)
            }
        }
    }

    fn build_checked_call(
        &mut self,
        target: FunctionValue<'ctx>,
        args: &[BasicMetadataValueEnum<'ctx>],
        name: &str,
    ) -> Result<FloatValue<'ctx>, CodegenError> {
        let call = self.builder.build_call(target, args, name)?;
        Ok(call
            .try_as_basic_value()
            .left()
            .expect("every function returns a double")
            .into_float_value())
    }

    /// Stack slot for a variable, placed in the function's entry block.
    fn create_entry_block_alloca(
        &self,
        function: FunctionValue<'ctx>,
        name: &str,
    ) -> Result<PointerValue<'ctx>, CodegenError> {
        let builder = self.context.create_builder();
        let entry = function
            .get_first_basic_block()
            .expect("function under construction has an entry block");
        match entry.get_first_instruction() {
            Some(first) => builder.position_before(&first),
            None => builder.position_at_end(entry),
        }
        Ok(builder.build_alloca(self.context.f64_type(), name)?)
    }

    fn current_block(&self) -> inkwell::basic_block::BasicBlock<'ctx> {
        self.builder
            .get_insert_block()
            .expect("builder is positioned inside a function")
    }
}

//! Compile imp forms straight to native code.
//!
//! There is no intermediate representation of our own: a form is walked once and
//! every node becomes Cranelift instructions in the function currently being
//! built. For example
//!
//! ```text
//! (let (x 3) ((fn (y) (+ x y)) 4))
//! ```
//!
//! produces two functions. The inner one takes `(closure y)` and reads `x` from
//! slot 0 of its closure object. The outer one allocates that closure object,
//! stores `x` into slot 0, and calls through the stored entrypoint.
//!
//! Inner functions are finalized before the function containing them, so their
//! entrypoints can be embedded as constants.
use cranelift_codegen::ir::{self, condcodes::IntCC, FuncRef, InstBuilder, MemFlags};
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext};

use crate::{
    runtime::{
        self, EncodeError, Fault, Tag, FUNCTION_ARITY_OFFSET, FUNCTION_ENTRYPOINT_OFFSET,
        FUNCTION_TAG_OFFSET,
    },
    value::{ListError, Symbol, Value},
};

pub mod backend;
mod closure;
pub mod environment;

use backend::{Backend, WORD};
pub use backend::BackendError;
pub use environment::{CaptureSet, Environment, Resolution};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompilerOptions {
    /// Keep (and log) the IR of every function compiled
    pub dump_ir: bool,
    /// Run the code generator's optimizations
    pub optimize: bool,
}

#[derive(thiserror::Error, Debug)]
pub enum CompileError {
    #[error("unbound variable `{0}`")]
    Unbound(Symbol),
    #[error("malformed `{form}` form: {reason}")]
    MalformedForm {
        form: &'static str,
        reason: &'static str,
    },
    #[error("too many captured variables, `{0}` does not fit in the closure")]
    TooManyCaptures(Symbol),
    #[error("captured variable `{0}` used outside of a function")]
    NoClosureArgument(Symbol),
    #[error(transparent)]
    List(#[from] ListError),
    #[error("cannot embed constant: {0}")]
    Constant(#[from] EncodeError),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Arithmetic {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SpecialForm {
    Arithmetic(Arithmetic),
    Let,
    Fn,
}

impl SpecialForm {
    fn from_symbol(name: Symbol) -> Option<Self> {
        Some(match name.as_str() {
            "+" => Self::Arithmetic(Arithmetic::Add),
            "-" => Self::Arithmetic(Arithmetic::Sub),
            "*" => Self::Arithmetic(Arithmetic::Mul),
            "/" => Self::Arithmetic(Arithmetic::Div),
            "let" => Self::Let,
            "fn" => Self::Fn,
            _ => return None,
        })
    }

    fn name(self) -> &'static str {
        match self {
            Self::Arithmetic(Arithmetic::Add) => "+",
            Self::Arithmetic(Arithmetic::Sub) => "-",
            Self::Arithmetic(Arithmetic::Mul) => "*",
            Self::Arithmetic(Arithmetic::Div) => "/",
            Self::Let => "let",
            Self::Fn => "fn",
        }
    }
}

/// What was produced for one function.
#[derive(Debug, Clone)]
pub struct FunctionInfo {
    /// Parameter count, including the closure argument
    pub arity: usize,
    /// Captured names, in slot order
    pub captures: Vec<Symbol>,
    pub entrypoint: *const u8,
    /// Only recorded when [`CompilerOptions::dump_ir`] is set
    pub ir: Option<Box<str>>,
}

/// A compiled top-level form, ready to run.
#[derive(Debug, Clone)]
pub struct Compilation {
    pub(crate) entrypoint: *const u8,
    functions: Vec<FunctionInfo>,
}

impl Compilation {
    /// Every function compiled for this form, in the order they were finalized.
    /// Inner functions come before the functions containing them, so the
    /// top-level function is always last.
    pub fn functions(&self) -> &[FunctionInfo] {
        &self.functions
    }

    pub fn entrypoint(&self) -> *const u8 {
        self.entrypoint
    }
}

/// The function currently receiving instructions.
pub(crate) struct FunctionTarget<'a> {
    builder: FunctionBuilder<'a>,
    params: Vec<ir::Value>,
    captures: CaptureSet,
    alloc: Option<FuncRef>,
    fault: Option<FuncRef>,
}

impl<'a> FunctionTarget<'a> {
    fn new(builder: FunctionBuilder<'a>, params: Vec<ir::Value>) -> Self {
        Self {
            builder,
            params,
            captures: CaptureSet::new(),
            alloc: None,
            fault: None,
        }
    }

    // runtime helpers are imported into a function at most once
    fn alloc_ref(&mut self, backend: &mut Backend) -> FuncRef {
        match self.alloc {
            Some(func_ref) => func_ref,
            None => *self.alloc.insert(backend.alloc_ref(self.builder.func)),
        }
    }

    fn fault_ref(&mut self, backend: &mut Backend) -> FuncRef {
        match self.fault {
            Some(func_ref) => func_ref,
            None => *self.fault.insert(backend.fault_ref(self.builder.func)),
        }
    }
}

/// Compiles and runs imp forms in this process.
///
/// Code and objects produced by a [`Jit`] are never freed, so values it
/// returned stay usable after it is dropped.
pub struct Jit {
    backend: Backend,
    options: CompilerOptions,
    functions: Vec<FunctionInfo>,
}

impl Jit {
    pub fn new(options: CompilerOptions) -> Result<Self, BackendError> {
        Ok(Self {
            backend: Backend::new(options.optimize)?,
            options,
            functions: vec![],
        })
    }

    /// Compiles `form` into a function of no arguments.
    ///
    /// Nothing is returned unless every function involved compiled, so a failed
    /// compilation leaves nothing half-built to call.
    pub fn compile(&mut self, form: &Value) -> Result<Compilation, CompileError> {
        self.functions.clear();
        let compiled = self.define_function(0, |jit, target| {
            jit.compile_form(target, &Environment::empty(), form)
        });
        let functions = std::mem::take(&mut self.functions);
        let (entrypoint, _) = compiled?;
        Ok(Compilation {
            entrypoint,
            functions,
        })
    }

    /// Builds a function with `params` word parameters, its body produced by
    /// `body`, and finalizes it.
    fn define_function<F>(
        &mut self,
        params: usize,
        body: F,
    ) -> Result<(*const u8, CaptureSet), CompileError>
    where
        F: FnOnce(&mut Self, &mut FunctionTarget<'_>) -> Result<ir::Value, CompileError>,
    {
        let (id, mut ctx) = self.backend.create_function(params)?;
        let mut builder_ctx = FunctionBuilderContext::new();

        let mut builder = FunctionBuilder::new(&mut ctx.func, &mut builder_ctx);
        let entry = builder.create_block();
        builder.append_block_params_for_function_params(entry);
        builder.switch_to_block(entry);
        builder.seal_block(entry);
        let param_values = builder.block_params(entry).to_vec();

        let mut target = FunctionTarget::new(builder, param_values);
        let result = body(self, &mut target)?;
        target.builder.ins().return_(&[result]);

        let FunctionTarget {
            builder, captures, ..
        } = target;
        builder.finalize();

        let ir = self.options.dump_ir.then(|| {
            let text = ctx.func.display().to_string();
            log::info!("{text}");
            text.into_boxed_str()
        });
        let entrypoint = self.backend.finalize(id, &mut ctx)?;
        log::debug!(
            "finalized function with arity {params} and {} captures at {entrypoint:p}",
            captures.len()
        );

        self.functions.push(FunctionInfo {
            arity: params,
            captures: captures.symbols().to_vec(),
            entrypoint,
            ir,
        });
        Ok((entrypoint, captures))
    }

    fn compile_form(
        &mut self,
        target: &mut FunctionTarget<'_>,
        env: &Environment,
        form: &Value,
    ) -> Result<ir::Value, CompileError> {
        match form {
            Value::Symbol(name) => self.compile_symbol(target, env, *name),
            Value::Cons(cell) => match cell.head().as_symbol().and_then(SpecialForm::from_symbol) {
                Some(SpecialForm::Arithmetic(op)) => {
                    self.compile_arithmetic(target, env, op, form)
                }
                Some(SpecialForm::Let) => self.compile_let(target, env, form),
                Some(SpecialForm::Fn) => self.compile_fn(target, env, form),
                None => self.compile_application(target, env, form),
            },
            atom => {
                let word = runtime::encode(atom)?;
                Ok(target.builder.ins().iconst(WORD, word.bits() as i64))
            }
        }
    }

    fn compile_symbol(
        &mut self,
        target: &mut FunctionTarget<'_>,
        env: &Environment,
        name: Symbol,
    ) -> Result<ir::Value, CompileError> {
        match env.resolve(name)? {
            Resolution::Local(handle) => Ok(handle.get()),
            Resolution::Enclosing => {
                let index = target.captures.register(name);
                log::debug!("load {name} @ {index}");
                let &closure = target
                    .params
                    .first()
                    .ok_or(CompileError::NoClosureArgument(name))?;
                let offset = closure::slot_offset(name, index)?;
                Ok(target
                    .builder
                    .ins()
                    .load(WORD, MemFlags::trusted(), closure, offset))
            }
            Resolution::Unbound => Err(CompileError::Unbound(name)),
        }
    }

    /// `+ - * /` on two fixnums.
    ///
    /// Results wrap around in the 63-bit fixnum range: `(+ MAX 1)` is `MIN`, and a
    /// product keeps only its low 63 bits. Division truncates toward zero.
    fn compile_arithmetic(
        &mut self,
        target: &mut FunctionTarget<'_>,
        env: &Environment,
        op: Arithmetic,
        form: &Value,
    ) -> Result<ir::Value, CompileError> {
        let name = SpecialForm::Arithmetic(op).name();
        let [_, lhs, rhs] = shape(form, name, "expected exactly two operands")?;
        let a = self.compile_form(target, env, lhs)?;
        let b = self.compile_form(target, env, rhs)?;

        // both tag bits set
        let tags = target.builder.ins().band(a, b);
        let tags = target.builder.ins().band_imm(tags, 1);
        let both_fixnums = target.builder.ins().icmp_imm(IntCC::NotEqual, tags, 0);
        self.guard(target, both_fixnums, Fault::NotAFixnum);

        Ok(match op {
            // (2a+1) + (2b+1) - 1 = 2(a+b)+1
            Arithmetic::Add => {
                let raw = target.builder.ins().iadd(a, b);
                target.builder.ins().iadd_imm(raw, -1)
            }
            // (2a+1) - (2b+1) + 1 = 2(a-b)+1
            Arithmetic::Sub => {
                let raw = target.builder.ins().isub(a, b);
                target.builder.ins().iadd_imm(raw, 1)
            }
            Arithmetic::Mul => {
                let x = untag(&mut target.builder, a);
                let y = untag(&mut target.builder, b);
                let product = target.builder.ins().imul(x, y);
                retag(&mut target.builder, product)
            }
            Arithmetic::Div => {
                let x = untag(&mut target.builder, a);
                let y = untag(&mut target.builder, b);
                let nonzero = target.builder.ins().icmp_imm(IntCC::NotEqual, y, 0);
                self.guard(target, nonzero, Fault::DivisionByZero);
                // operands are at most 63 bits wide, so this cannot overflow
                let quotient = target.builder.ins().sdiv(x, y);
                retag(&mut target.builder, quotient)
            }
        })
    }

    fn compile_let(
        &mut self,
        target: &mut FunctionTarget<'_>,
        env: &Environment,
        form: &Value,
    ) -> Result<ir::Value, CompileError> {
        let [_, binding, body] = shape(form, "let", "expected (let (name value) body)")?;
        let [name, value] = shape(binding, "let", "binding must be (name value)")?;
        let name = name.as_symbol().ok_or(CompileError::MalformedForm {
            form: "let",
            reason: "bound name must be a symbol",
        })?;

        let value = self.compile_form(target, env, value)?;
        self.compile_form(target, &env.bind(name, value), body)
    }

    fn compile_fn(
        &mut self,
        target: &mut FunctionTarget<'_>,
        env: &Environment,
        form: &Value,
    ) -> Result<ir::Value, CompileError> {
        let [_, params, body] = shape(form, "fn", "expected (fn (params...) body)")?;
        let names = params
            .elements()
            .map_err(|_| CompileError::MalformedForm {
                form: "fn",
                reason: "parameters must be a list",
            })?
            .into_iter()
            .map(|param| {
                param.as_symbol().ok_or(CompileError::MalformedForm {
                    form: "fn",
                    reason: "parameters must be symbols",
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        // slot 0 is the closure itself
        let arity = names.len() + 1;

        let (entrypoint, captures) = self.define_function(arity, |jit, inner| {
            let mut scope = env.enter_frame();
            for (slot, &name) in names.iter().enumerate().map(|(i, n)| (i + 1, n)) {
                log::debug!("param `{name}` @ {slot}");
                scope = scope.bind(name, inner.params[slot]);
            }
            jit.compile_form(inner, &scope, body)
        })?;

        self.construct_closure(target, env, entrypoint, arity, &captures)
    }

    fn compile_application(
        &mut self,
        target: &mut FunctionTarget<'_>,
        env: &Environment,
        form: &Value,
    ) -> Result<ir::Value, CompileError> {
        let callee = self.compile_form(target, env, form.first()?)?;
        let mut args = vec![callee];
        for arg in form.rest()?.iter() {
            args.push(self.compile_form(target, env, arg?)?);
        }

        // a heap reference: not nil, tag bit clear
        let b = &mut target.builder;
        let tag_bit = b.ins().band_imm(callee, 1);
        let untagged = b.ins().icmp_imm(IntCC::Equal, tag_bit, 0);
        let not_nil = b.ins().icmp_imm(IntCC::NotEqual, callee, 0);
        let is_object = b.ins().band(untagged, not_nil);
        self.guard(target, is_object, Fault::NotCallable);

        let flags = MemFlags::trusted();
        let tag = target
            .builder
            .ins()
            .load(WORD, flags, callee, FUNCTION_TAG_OFFSET);
        let is_function = target
            .builder
            .ins()
            .icmp_imm(IntCC::Equal, tag, Tag::Function as i64);
        self.guard(target, is_function, Fault::NotCallable);

        let arity = target
            .builder
            .ins()
            .load(WORD, flags, callee, FUNCTION_ARITY_OFFSET);
        let arity_matches = target
            .builder
            .ins()
            .icmp_imm(IntCC::Equal, arity, args.len() as i64);
        self.guard(target, arity_matches, Fault::ArityMismatch);

        let entry = target
            .builder
            .ins()
            .load(WORD, flags, callee, FUNCTION_ENTRYPOINT_OFFSET);
        let sig = target
            .builder
            .import_signature(self.backend.signature(args.len()));
        let call = target.builder.ins().call_indirect(sig, entry, &args);
        Ok(target.builder.inst_results(call)[0])
    }

    /// Continues only if `condition` holds. Otherwise `fault` is reported to the
    /// runtime and the current function returns nil.
    fn guard(&mut self, target: &mut FunctionTarget<'_>, condition: ir::Value, fault: Fault) {
        let fault_ref = target.fault_ref(&mut self.backend);
        let b = &mut target.builder;
        let ok = b.create_block();
        let fail = b.create_block();
        b.set_cold_block(fail);
        b.ins().brif(condition, ok, &[], fail, &[]);
        b.seal_block(ok);
        b.seal_block(fail);

        b.switch_to_block(fail);
        let code = b.ins().iconst(WORD, fault as i64);
        b.ins().call(fault_ref, &[code]);
        let nil = b.ins().iconst(WORD, runtime::Word::NIL.bits() as i64);
        b.ins().return_(&[nil]);

        b.switch_to_block(ok);
    }
}

fn untag(builder: &mut FunctionBuilder<'_>, word: ir::Value) -> ir::Value {
    builder.ins().sshr_imm(word, 1)
}

fn retag(builder: &mut FunctionBuilder<'_>, value: ir::Value) -> ir::Value {
    let shifted = builder.ins().ishl_imm(value, 1);
    builder.ins().bor_imm(shifted, 1)
}

/// The elements of a proper list of exactly `N` elements, anything else is a
/// malformed `form`.
fn shape<'v, const N: usize>(
    list: &'v Value,
    form: &'static str,
    reason: &'static str,
) -> Result<[&'v Value; N], CompileError> {
    let malformed = || CompileError::MalformedForm { form, reason };
    let elements = list.elements().map_err(|_| malformed())?;
    elements.try_into().map_err(|_| malformed())
}

#[cfg(test)]
mod tests {
    use assert2::{check, let_assert};

    use super::{CompileError, CompilerOptions, Jit};
    use crate::{reader::read, value::Symbol};

    fn compile(source: &str) -> Result<super::Compilation, CompileError> {
        let_assert!(Ok(form) = read(source));
        let_assert!(Ok(mut jit) = Jit::new(CompilerOptions::default()));
        jit.compile(&form)
    }

    #[test]
    fn top_level_has_no_parameters() {
        let_assert!(Ok(compilation) = compile("(+ 1 2)"));
        check!(compilation.functions().len() == 1);
        check!(compilation.functions()[0].arity == 0);
        check!(compilation.functions()[0].captures.is_empty());
    }

    #[test]
    fn single_capture_is_registered() {
        let_assert!(Ok(compilation) = compile("(let (x 3) ((fn (y) (+ x y)) 4))"));
        let functions = compilation.functions();
        check!(functions.len() == 2);
        // inner function first
        check!(functions[0].arity == 2);
        check!(functions[0].captures == vec![Symbol::new("x")]);
        check!(functions[1].arity == 0);
    }

    #[test]
    fn captures_reuse_slots() {
        let_assert!(Ok(compilation) = compile("(let (x 3) (let (y 4) (fn () (+ (* x y) x))))"));
        check!(compilation.functions()[0].captures == vec![Symbol::new("x"), Symbol::new("y")]);
    }

    #[test]
    fn parameters_are_not_captured() {
        let_assert!(Ok(compilation) = compile("(fn (a b) (+ a b))"));
        check!(compilation.functions()[0].captures.is_empty());
        check!(compilation.functions()[0].arity == 3);
    }

    #[test]
    fn captures_chain_through_nested_functions() {
        let_assert!(Ok(compilation) = compile("(let (x 1) (fn () (fn () x)))"));
        let functions = compilation.functions();
        check!(functions.len() == 3);
        check!(functions[0].captures == vec![Symbol::new("x")]);
        // the middle function needs `x` to build the innermost closure
        check!(functions[1].captures == vec![Symbol::new("x")]);
        check!(functions[2].captures.is_empty());
    }

    #[test]
    fn unbound_variable() {
        let_assert!(Err(CompileError::Unbound(name)) = compile("(+ x 1)"));
        check!(name == Symbol::new("x"));
        let_assert!(Err(CompileError::Unbound(_)) = compile("(fn (y) (+ y z))"));
    }

    #[test]
    fn let_does_not_leak() {
        let_assert!(Err(CompileError::Unbound(name)) = compile("(+ (let (x 1) x) x)"));
        check!(name == Symbol::new("x"));
    }

    #[test]
    fn malformed_forms() {
        for source in [
            "(+ 1)",
            "(+ 1 2 3)",
            "(/)",
            "(let x 1)",
            "(let (x 1))",
            "(let (1 2) 3)",
            "(let (x 1) x x)",
            "(fn x x)",
            "(fn (1) 1)",
            "(fn (x))",
        ] {
            let_assert!(
                Err(CompileError::MalformedForm { .. }) = compile(source),
                "`{source}` should be rejected"
            );
        }
    }

    #[test]
    fn ir_is_recorded_on_request() {
        let_assert!(Ok(form) = read("(let (x 3) ((fn (y) (+ x y)) 4))"));
        let options = CompilerOptions {
            dump_ir: true,
            optimize: false,
        };
        let_assert!(Ok(mut jit) = Jit::new(options));
        let_assert!(Ok(compilation) = jit.compile(&form));
        check!(compilation.functions().iter().all(|f| f.ir.is_some()));

        let_assert!(Ok(mut quiet) = Jit::new(CompilerOptions::default()));
        let_assert!(Ok(compilation) = quiet.compile(&form));
        check!(compilation.functions().iter().all(|f| f.ir.is_none()));
    }
}

//! Native code emission, on top of Cranelift's JIT module.
//!
//! Everything the compiler needs from a code generator goes through here:
//! creating functions with a given number of word-sized parameters, the runtime
//! entry points generated code calls, and finalizing a function into a callable
//! address.
use cranelift_codegen::{
    ir::{types::I64, AbiParam, FuncRef, Function, Signature, Type, UserFuncName},
    settings::{self, Configurable, SetError},
    CodegenError, Context,
};
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{FuncId, Linkage, Module, ModuleError};

use crate::runtime;

/// Every value crossing a function boundary is one tagged word.
pub const WORD: Type = I64;

#[derive(thiserror::Error, Debug)]
pub enum BackendError {
    #[error("host machine is not supported: {0}")]
    UnsupportedHost(&'static str),
    #[error("invalid code generator setting: {0}")]
    Setting(#[from] SetError),
    #[error("code generation failed: {0}")]
    Codegen(#[from] CodegenError),
    #[error("failed to finalize function: {0}")]
    Module(#[from] ModuleError),
}

/// Runtime functions generated code is allowed to call
struct RuntimeHelpers {
    alloc: FuncId,
    fault: FuncId,
}

pub(crate) struct Backend {
    module: JITModule,
    helpers: RuntimeHelpers,
}

impl Backend {
    pub(crate) fn new(optimize: bool) -> Result<Self, BackendError> {
        let mut flag_builder = settings::builder();
        flag_builder.set("use_colocated_libcalls", "false")?;
        flag_builder.set("is_pic", "false")?;
        flag_builder.set("opt_level", if optimize { "speed" } else { "none" })?;

        let isa = cranelift_native::builder()
            .map_err(BackendError::UnsupportedHost)?
            .finish(settings::Flags::new(flag_builder))?;

        let mut builder = JITBuilder::with_isa(isa, cranelift_module::default_libcall_names());
        builder.symbol("imp_alloc", runtime::imp_alloc as *const u8);
        builder.symbol("imp_fault", runtime::imp_fault as *const u8);
        let mut module = JITModule::new(builder);

        let mut alloc_sig = module.make_signature();
        alloc_sig.params.push(AbiParam::new(WORD));
        alloc_sig.returns.push(AbiParam::new(WORD));
        let alloc = module.declare_function("imp_alloc", Linkage::Import, &alloc_sig)?;

        let mut fault_sig = module.make_signature();
        fault_sig.params.push(AbiParam::new(WORD));
        let fault = module.declare_function("imp_fault", Linkage::Import, &fault_sig)?;

        Ok(Self {
            module,
            helpers: RuntimeHelpers { alloc, fault },
        })
    }

    /// `(word, word, ...) -> word` with `params` parameters.
    pub(crate) fn signature(&self, params: usize) -> Signature {
        let mut sig = self.module.make_signature();
        sig.params
            .extend(std::iter::repeat(AbiParam::new(WORD)).take(params));
        sig.returns.push(AbiParam::new(WORD));
        sig
    }

    /// Declares a fresh function taking `params` words and returns a context to
    /// build its body in.
    pub(crate) fn create_function(
        &mut self,
        params: usize,
    ) -> Result<(FuncId, Context), BackendError> {
        let sig = self.signature(params);
        let id = self.module.declare_anonymous_function(&sig)?;
        let mut ctx = self.module.make_context();
        ctx.func.signature = sig;
        ctx.func.name = UserFuncName::user(0, id.as_u32());
        Ok((id, ctx))
    }

    /// Compiles a fully built function and returns its native entrypoint.
    pub(crate) fn finalize(
        &mut self,
        id: FuncId,
        ctx: &mut Context,
    ) -> Result<*const u8, BackendError> {
        self.module.define_function(id, ctx)?;
        self.module.clear_context(ctx);
        self.module.finalize_definitions()?;
        Ok(self.module.get_finalized_function(id))
    }

    pub(crate) fn alloc_ref(&mut self, func: &mut Function) -> FuncRef {
        self.module.declare_func_in_func(self.helpers.alloc, func)
    }

    pub(crate) fn fault_ref(&mut self, func: &mut Function) -> FuncRef {
        self.module.declare_func_in_func(self.helpers.fault, func)
    }
}

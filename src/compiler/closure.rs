//! Building function objects for freshly compiled `fn` forms.
use cranelift_codegen::ir::{self, InstBuilder, MemFlags};

use super::{
    backend::WORD,
    environment::{CaptureSet, Environment},
    CompileError, FunctionTarget, Jit,
};
use crate::{
    runtime::{
        closure_slot_offset, Tag, FUNCTION_ARITY_OFFSET, FUNCTION_ENTRYPOINT_OFFSET,
        FUNCTION_HEADER_SIZE, FUNCTION_TAG_OFFSET, WORD_SIZE,
    },
    value::Symbol,
};

impl Jit {
    /// Emits, into `target`, the allocation and initialization of a function
    /// object for `entrypoint`.
    ///
    /// Captured values are compiled against `env`, the environment the `fn` form
    /// appeared in. If `target` is itself a nested function this may register
    /// captures of its own.
    pub(super) fn construct_closure(
        &mut self,
        target: &mut FunctionTarget<'_>,
        env: &Environment,
        entrypoint: *const u8,
        arity: usize,
        captures: &CaptureSet,
    ) -> Result<ir::Value, CompileError> {
        let size = FUNCTION_HEADER_SIZE + captures.len() * WORD_SIZE;
        let size = target.builder.ins().iconst(WORD, size as i64);
        let alloc = target.alloc_ref(&mut self.backend);
        let call = target.builder.ins().call(alloc, &[size]);
        let object = target.builder.inst_results(call)[0];

        let tag = target.builder.ins().iconst(WORD, Tag::Function as i64);
        let entry = target.builder.ins().iconst(WORD, entrypoint as i64);
        let arity = target.builder.ins().iconst(WORD, arity as i64);
        let flags = MemFlags::trusted();
        target
            .builder
            .ins()
            .store(flags, tag, object, FUNCTION_TAG_OFFSET);
        target
            .builder
            .ins()
            .store(flags, entry, object, FUNCTION_ENTRYPOINT_OFFSET);
        target
            .builder
            .ins()
            .store(flags, arity, object, FUNCTION_ARITY_OFFSET);

        for (name, index) in captures.iter() {
            let value = self.compile_symbol(target, env, name)?;
            log::debug!("store {name} @ {index}");
            target
                .builder
                .ins()
                .store(flags, value, object, slot_offset(name, index)?);
        }

        Ok(object)
    }
}

pub(super) fn slot_offset(name: Symbol, index: usize) -> Result<i32, CompileError> {
    i32::try_from(closure_slot_offset(index)).map_err(|_| CompileError::TooManyCaptures(name))
}

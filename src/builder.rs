//! JIT host plumbing for jet compilation.
//!
//! This module owns the process-wide pieces of the Cranelift backend: the
//! host ISA (a target machine description, created lazily once and shared by
//! every compilation) and the lock that serializes compilations. Everything
//! else (modules, contexts, finalized code) is per-stepper and is released
//! when the stepper is dropped.
//!
//! The main entry points are:
//! - `host_isa()`: the lazily-initialized target description
//! - `create_module_and_context()`: a fresh JIT module with the libm
//!   symbols of the working precision registered
//! - `compile_and_finalize()`: declare/define/finalize a function and hand
//!   back the raw code pointer

use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use cranelift::prelude::*;
use cranelift_codegen::Context;
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{Linkage, Module};
use isa::TargetIsa;

use crate::errors::BuilderError;
use crate::scalar::JetScalar;

static HOST_ISA: OnceLock<Arc<dyn TargetIsa>> = OnceLock::new();
static JIT_LOCK: Mutex<()> = Mutex::new(());

/// Serializes JIT compilation process-wide. Steppers may be constructed from
/// multiple threads; their compilations are queued here.
pub(crate) fn jit_lock() -> MutexGuard<'static, ()> {
    JIT_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// The process-wide host ISA, created on first use.
pub(crate) fn host_isa() -> Result<Arc<dyn TargetIsa>, BuilderError> {
    if let Some(isa) = HOST_ISA.get() {
        return Ok(isa.clone());
    }
    let isa = create_isa()?;
    Ok(HOST_ISA.get_or_init(|| isa).clone())
}

/// Builds the target description for the machine this process runs on.
///
/// Jet functions are long straight-line float kernels, so codegen always
/// optimizes for speed. PIC and colocated libcalls are only worthwhile on
/// x86-64; elsewhere both stay off.
fn create_isa() -> Result<Arc<dyn TargetIsa>, BuilderError> {
    let x86 = matches!(
        target_lexicon::Triple::host().architecture,
        target_lexicon::Architecture::X86_64
    );
    let on_x86 = if x86 { "true" } else { "false" };
    let toggles = [
        ("opt_level", "speed"),
        ("is_pic", on_x86),
        ("use_colocated_libcalls", on_x86),
    ];

    let mut flags = settings::builder();
    for (name, value) in toggles {
        // the flag names are known to the backend, setting them cannot fail
        flags.set(name, value).unwrap();
    }

    let native = cranelift_native::builder()
        .map_err(|unsupported| BuilderError::UnsupportedHost(unsupported.to_string()))?;
    native
        .finish(settings::Flags::new(flags))
        .map_err(BuilderError::Codegen)
}

/// Creates a new JIT module and function context for the working precision.
///
/// The module has the libm symbols of `T` registered (exp, log, sin, cos,
/// pow in the matching precision) so generated code can call them for
/// order-zero transcendentals. The function signature is set by the caller.
pub(crate) fn create_module_and_context<T: JetScalar>(
    isa: Arc<dyn TargetIsa>,
) -> (JITModule, Context) {
    let mut builder = JITBuilder::with_isa(isa, cranelift_module::default_libcall_names());
    T::register_symbols(&mut builder);

    let module = JITModule::new(builder);
    let ctx = module.make_context();
    (module, ctx)
}

/// Compiles and finalizes the function held in `ctx`, returning the raw code
/// pointer.
///
/// The pointer stays valid for as long as the module is alive; the caller
/// owns the module and frees its executable memory on drop.
pub(crate) fn compile_and_finalize(
    module: &mut JITModule,
    ctx: &mut Context,
    name: &str,
) -> Result<*const u8, BuilderError> {
    let func_id = module
        .declare_function(name, Linkage::Local, &ctx.func.signature)
        .map_err(|e| BuilderError::Declare {
            name: name.to_string(),
            detail: e.to_string(),
        })?;

    module
        .define_function(func_id, ctx)
        .map_err(|e| BuilderError::Define(e.to_string()))?;

    module.clear_context(ctx);
    module.finalize_definitions()?;

    Ok(module.get_finalized_function(func_id))
}

//! The MIR pass pipeline. Passes run in a fixed order; the validator is
//! last and any error it finds is fatal for the compilation.

pub mod async_lower;
pub mod simplify;
pub mod switch;
pub mod validate;

use crate::{Cancel, CompileError};
use crate::types::mir::Module;
use crate::types::ty::TypeStore;

/// Run the pipeline over every function:
/// simplify, switch recognition, simplify, async lowering, simplify,
/// validate.
pub fn optimize(m: &mut Module, types: &TypeStore, cancel: &Cancel) -> Result<(), CompileError> {
  for f in &mut m.funcs {
    cancel.check()?;
    simplify::simplify_cfg(f);
    switch::recognize_switch_tag(f, types);
    simplify::simplify_cfg(f);
    async_lower::lower_state_machine(f, types);
    simplify::simplify_cfg(f);
  }
  cancel.check()?;
  validate::validate(m, types)
}

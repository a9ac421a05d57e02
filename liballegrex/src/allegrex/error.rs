use thiserror::Error;

use super::fragment::Label;

#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("trying to execute 0x{address:08X}")]
    InvalidEntry { address: u32 },

    #[error("not implemented '{name}' at 0x{pc:08X}")]
    UnimplementedInstruction { name: &'static str, pc: u32 },

    #[error("too large function PC=0x{entry:08X}")]
    RunawayTranslation { entry: u32 },

    #[error("jump to undefined label {0}")]
    UnresolvedLabel(Label),

    #[error("JIT backend unavailable: {0}")]
    Backend(String),

    #[error("JIT code generation failed: {0}")]
    Codegen(#[from] Box<cranelift_module::ModuleError>),
}

impl From<cranelift_module::ModuleError> for TranslateError {
    fn from(err: cranelift_module::ModuleError) -> Self {
        TranslateError::Codegen(Box::new(err))
    }
}

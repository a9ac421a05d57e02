/* Allegrex function recompiler */
pub mod error;
pub mod fragment;
pub mod generator;
pub mod instruction;
pub mod jit;
pub mod ops;
pub mod program;
pub mod table;
pub mod usage;

pub use error::TranslateError;
pub use fragment::{Condition, Fragment, Label};
pub use generator::{
    Backend, DecodedInstruction, FunctionTranslator, TranslatorConfig, MAX_FUNCTION_INSTRUCTIONS,
};
pub use instruction::Instruction;
pub use ops::TranslatorTable;
pub use program::{CompiledFunction, Program, Step};
pub use table::{classify, InstructionFlags, InstructionType, Kind};
pub use usage::{InstructionCount, InstructionUsage};

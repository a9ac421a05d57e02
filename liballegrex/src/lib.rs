/* Allegrex recompiler core */
pub mod allegrex;
pub mod bus;
pub mod cpu;

pub use allegrex::{Backend, CompiledFunction, FunctionTranslator, TranslateError, TranslatorConfig};
pub use bus::{Memory, Ram};
pub use cpu::{CpuState, Runtime};

/*
    Function translator: rebuilds one guest function as a single compiled unit
*/

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use super::error::TranslateError;
use super::fragment::{Fragment, Label};
use super::instruction::Instruction;
use super::jit::JIT;
use super::ops::TranslatorTable;
use super::program::{CompiledFunction, Program};
use super::table::{classify, InstructionType};
use super::usage::{InstructionCount, InstructionUsage};
use crate::bus::Memory;

/// Upper bound on instructions visited for one function.
pub const MAX_FUNCTION_INSTRUCTIONS: u32 = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Walk the lowered steps in Rust.
    Threaded,
    /// Emit host code with Cranelift.
    Cranelift,
}

#[derive(Debug, Clone)]
pub struct TranslatorConfig {
    /// Loop folding and inlined call dispatch.
    pub optimizations: bool,
    pub backend: Backend,
    /// Log every generated fragment tree at debug level.
    pub dump_functions: bool,
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        TranslatorConfig {
            optimizations: true,
            backend: Backend::Threaded,
            dump_functions: false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DecodedInstruction {
    pub instruction: Instruction,
    pub ty: InstructionType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

pub struct FunctionTranslator {
    memory: Arc<dyn Memory>,
    table: TranslatorTable,
    usage: InstructionUsage,
    config: TranslatorConfig,
    jit: Option<JIT>,
}

impl FunctionTranslator {
    pub fn new(memory: Arc<dyn Memory>, config: TranslatorConfig) -> Result<Self, TranslateError> {
        let jit = match config.backend {
            Backend::Cranelift => Some(JIT::new()?),
            Backend::Threaded => None,
        };

        Ok(FunctionTranslator {
            memory,
            table: TranslatorTable::new(),
            usage: InstructionUsage::new(),
            config,
            jit,
        })
    }

    pub fn config(&self) -> &TranslatorConfig {
        &self.config
    }

    pub fn usage(&self) -> &InstructionUsage {
        &self.usage
    }

    pub fn usage_snapshot(&self) -> Vec<InstructionCount> {
        self.usage.snapshot()
    }

    pub fn translate(&mut self, address: u32) -> Result<CompiledFunction, TranslateError> {
        let fragment = self.generate(address)?;
        let program = Program::lower(fragment)?;

        let native = match self.jit.as_mut() {
            Some(jit) => Some(jit.compile(address, &program)?),
            None => None,
        };

        Ok(CompiledFunction::new(address, program, native))
    }

    /// Builds the fragment tree for the function at `address` without lowering it.
    pub fn generate(&mut self, address: u32) -> Result<Fragment, TranslateError> {
        if address == 0 {
            return Err(TranslateError::InvalidEntry { address });
        }

        let mut generator = FunctionGenerator {
            memory: self.memory.as_ref(),
            table: &self.table,
            usage: &mut self.usage,
            optimizations: self.config.optimizations,
            start_pc: address,
            pc: address,
            stms: vec![Fragment::prologue(), Fragment::capture_ra()],
            pc_to_label: HashMap::new(),
        };

        let mut finished = false;
        for _ in 0..MAX_FUNCTION_INSTRUCTIONS {
            if generator.step()? == Flow::Stop {
                finished = true;
                break;
            }
        }

        if !finished {
            return Err(TranslateError::RunawayTranslation { entry: address });
        }

        generator.stms.push(Fragment::Return);
        let end_pc = generator.pc;
        let fragment = Fragment::list(generator.stms);

        trace!("Generated function_{:08X}..0x{:08X}", address, end_pc);
        if self.config.dump_functions {
            debug!("function_{:08X}:\n{}", address, fragment);
        }

        Ok(fragment)
    }
}

/// State of one in-progress translation.
struct FunctionGenerator<'a> {
    memory: &'a dyn Memory,
    table: &'a TranslatorTable,
    usage: &'a mut InstructionUsage,
    optimizations: bool,
    start_pc: u32,
    pc: u32,
    stms: Vec<Fragment>,
    pc_to_label: HashMap<u32, Label>,
}

impl FunctionGenerator<'_> {
    fn decode(&self, address: u32) -> DecodedInstruction {
        let instruction = Instruction::fetch(self.memory, address);
        DecodedInstruction {
            instruction,
            ty: classify(instruction),
        }
    }

    fn translate(&self, di: &DecodedInstruction) -> Result<Fragment, TranslateError> {
        let translate = self.table.get(di.ty.kind).ok_or_else(|| {
            TranslateError::UnimplementedInstruction {
                name: di.ty.name(),
                pc: di.instruction.pc,
            }
        })?;
        Ok(translate(di.instruction))
    }

    fn create_label(&mut self, address: u32) -> Label {
        let label = Label {
            id: self.pc_to_label.len() as u32,
            address,
        };
        self.pc_to_label.insert(address, label);
        label
    }

    fn step(&mut self) -> Result<Flow, TranslateError> {
        let pc = self.pc;
        let di = self.decode(pc);

        let label = self.create_label(pc);
        self.stms.push(Fragment::Label(label));

        self.usage.record(di.ty.name());

        if di.ty.is_jump_or_branch() {
            return self.branch(pc, &di);
        }

        if di.ty.is_syscall() {
            self.stms.push(Fragment::store_pc(pc.wrapping_add(4)));
        }
        let fragment = self.translate(&di)?;
        self.stms.push(fragment);
        self.pc = pc.wrapping_add(4);

        if di.ty.is_break() {
            self.stms.push(Fragment::store_pc(self.pc));
            return Ok(Flow::Stop);
        }

        Ok(Flow::Continue)
    }

    fn branch(&mut self, pc: u32, di: &DecodedInstruction) -> Result<Flow, TranslateError> {
        let delay_slot = self.decode(pc.wrapping_add(4));
        let follow_on = self.decode(pc.wrapping_add(8));

        let jump_address = if di.ty.is_branch() {
            di.instruction.branch_address()
        } else {
            di.instruction.u_imm26() << 2
        };
        let jump_back = jump_address <= pc;

        let is_simple_loop = di.ty.is_branch() && jump_back && jump_address >= self.start_pc;
        let is_function_call = di.ty.is_call();

        let branch = self.translate(di)?;
        self.stms.push(branch);

        let delayed = Fragment::likely(di.ty.is_likely(), self.translate(&delay_slot)?);
        let resume = pc.wrapping_add(8);
        self.pc = resume;

        // Order follows the follow-on word at PC+8: a syscall there gets the resolved PC first.
        if follow_on.ty.is_syscall() {
            self.stms.push(Fragment::resolve_branch(resume));
            self.stms.push(Fragment::return_unless_taken());
            self.stms.push(delayed);
        } else {
            self.stms.push(delayed);
            self.stms.push(Fragment::resolve_branch(resume));
            self.stms.push(Fragment::return_unless_taken());
        }

        if !self.optimizations {
            return Ok(Flow::Stop);
        }

        if is_simple_loop {
            match self.pc_to_label.get(&jump_address) {
                Some(&target) => self.stms.push(Fragment::Jump(target)),
                None => warn!(
                    "Loop at 0x{:08X} targets 0x{:08X} with no label, leaving to the runtime",
                    pc, jump_address
                ),
            }
            return Ok(Flow::Stop);
        }

        if is_function_call {
            self.stms.push(Fragment::CallPc);
            return Ok(Flow::Continue);
        }

        Ok(Flow::Stop)
    }
}

/*
    Cranelift backend: lowers a Program into host code
*/

use cranelift_codegen::ir::{types, AbiParam, Block, InstBuilder, Type};
use cranelift_codegen::settings::{self, Configurable};
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext};
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{FuncId, Linkage, Module};
use target_lexicon::Triple;
use tracing::{debug, info};

use super::error::TranslateError;
use super::fragment::Condition;
use super::program::{NativeEntry, Program, Step};
use crate::cpu::CpuState;

pub extern "C" fn __allegrex_exec(program: *const Program, index: u32, state: *mut CpuState) {
    let program = unsafe { &*program };
    let state = unsafe { &mut *state };
    (program.ops[index as usize].op)(state);
}

pub extern "C" fn __allegrex_branch_flag(state: *const CpuState) -> u32 {
    let state = unsafe { &*state };
    state.branch_flag as u32
}

/// Returns non-zero when the runtime halted the CPU during the call.
pub extern "C" fn __allegrex_call_pc(state: *mut CpuState) -> u32 {
    let state = unsafe { &mut *state };
    state.call_pc();
    state.halted as u32
}

pub struct JIT {
    module: JITModule,
    pointer_type: Type,
    exec_func: FuncId,
    branch_flag_func: FuncId,
    call_pc_func: FuncId,
    compiled: usize,
}

fn backend_error(err: impl std::fmt::Display) -> TranslateError {
    TranslateError::Backend(err.to_string())
}

impl JIT {
    pub fn new() -> Result<Self, TranslateError> {
        let mut flag_builder = settings::builder();
        flag_builder.set("use_colocated_libcalls", "false").map_err(backend_error)?;
        flag_builder.set("is_pic", "false").map_err(backend_error)?;
        flag_builder.set("opt_level", "speed").map_err(backend_error)?;

        let isa = cranelift_native::builder()
            .map_err(backend_error)?
            .finish(settings::Flags::new(flag_builder))
            .map_err(backend_error)?;

        let mut builder = JITBuilder::with_isa(isa, cranelift_module::default_libcall_names());

        builder.symbol("__allegrex_exec", __allegrex_exec as *const u8);
        builder.symbol("__allegrex_branch_flag", __allegrex_branch_flag as *const u8);
        builder.symbol("__allegrex_call_pc", __allegrex_call_pc as *const u8);

        let mut module = JITModule::new(builder);
        let pointer_type = module.target_config().pointer_type();

        let mut exec_sig = module.make_signature();
        exec_sig.params.push(AbiParam::new(pointer_type));
        exec_sig.params.push(AbiParam::new(types::I32));
        exec_sig.params.push(AbiParam::new(pointer_type));
        let exec_func = module.declare_function("__allegrex_exec", Linkage::Import, &exec_sig)?;

        let mut flag_sig = module.make_signature();
        flag_sig.params.push(AbiParam::new(pointer_type));
        flag_sig.returns.push(AbiParam::new(types::I32));
        let branch_flag_func =
            module.declare_function("__allegrex_branch_flag", Linkage::Import, &flag_sig)?;

        let mut call_sig = module.make_signature();
        call_sig.params.push(AbiParam::new(pointer_type));
        call_sig.returns.push(AbiParam::new(types::I32));
        let call_pc_func = module.declare_function("__allegrex_call_pc", Linkage::Import, &call_sig)?;

        info!("JIT initialized for {}", Triple::host());

        Ok(JIT {
            module,
            pointer_type,
            exec_func,
            branch_flag_func,
            call_pc_func,
            compiled: 0,
        })
    }

    pub fn compile(&mut self, address: u32, program: &Program) -> Result<NativeEntry, TranslateError> {
        let mut ctx = self.module.make_context();
        ctx.func.signature = self.module.make_signature();
        ctx.func.signature.params.push(AbiParam::new(self.pointer_type));
        ctx.func.signature.params.push(AbiParam::new(self.pointer_type));

        let mut builder_ctx = FunctionBuilderContext::new();
        let mut builder = FunctionBuilder::new(&mut ctx.func, &mut builder_ctx);

        let exec = self.module.declare_func_in_func(self.exec_func, builder.func);
        let branch_flag = self.module.declare_func_in_func(self.branch_flag_func, builder.func);
        let call_pc = self.module.declare_func_in_func(self.call_pc_func, builder.func);

        let entry_block = builder.create_block();
        builder.append_block_params_for_function_params(entry_block);
        builder.switch_to_block(entry_block);
        let program_ptr = builder.block_params(entry_block)[0];
        let state_ptr = builder.block_params(entry_block)[1];

        // One block per step; index == steps.len() is the shared exit.
        let blocks: Vec<Block> = (0..=program.steps.len()).map(|_| builder.create_block()).collect();
        let exit_block = blocks[program.steps.len()];
        builder.ins().jump(blocks[0], &[]);

        for (index, step) in program.steps.iter().enumerate() {
            builder.switch_to_block(blocks[index]);
            let next = blocks[index + 1];

            match *step {
                Step::Exec(op) => {
                    let op_index = builder.ins().iconst(types::I32, op as i64);
                    builder.ins().call(exec, &[program_ptr, op_index, state_ptr]);
                    builder.ins().jump(next, &[]);
                }
                Step::Jump(target) => {
                    builder.ins().jump(blocks[target], &[]);
                }
                Step::JumpIf(cond, target) => {
                    let call = builder.ins().call(branch_flag, &[state_ptr]);
                    let flag = builder.inst_results(call)[0];
                    let target = blocks[target];
                    match cond {
                        Condition::BranchTaken => builder.ins().brif(flag, target, &[], next, &[]),
                        Condition::BranchNotTaken => builder.ins().brif(flag, next, &[], target, &[]),
                    };
                }
                Step::CallPc => {
                    let call = builder.ins().call(call_pc, &[state_ptr]);
                    let halted = builder.inst_results(call)[0];
                    builder.ins().brif(halted, exit_block, &[], next, &[]);
                }
                Step::Return => {
                    builder.ins().return_(&[]);
                }
            }
        }

        builder.switch_to_block(exit_block);
        builder.ins().return_(&[]);

        builder.seal_all_blocks();
        builder.finalize();

        let func_id = self.module.declare_anonymous_function(&ctx.func.signature)?;
        self.module.define_function(func_id, &mut ctx)?;
        self.module.clear_context(&mut ctx);
        self.module.finalize_definitions()?;

        let code = self.module.get_finalized_function(func_id);
        self.compiled += 1;
        debug!(
            "JIT compiled function_{:08X} (#{}): {} steps, {} ops",
            address,
            self.compiled,
            program.steps.len(),
            program.ops.len()
        );

        Ok(unsafe { std::mem::transmute::<*const u8, NativeEntry>(code) })
    }
}

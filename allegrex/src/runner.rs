use std::cell::{Cell, RefCell};
use std::num::NonZero;
use std::rc::Rc;

use liballegrex::allegrex::{CompiledFunction, FunctionTranslator, InstructionCount, TranslateError};
use liballegrex::cpu::{CpuState, Runtime, REG_RA, REG_V0};
use lru::LruCache;
use tracing::{debug, error, info, warn};

const MAX_FUNCTIONS: NonZero<usize> = NonZero::new(1024).unwrap();

#[derive(Debug)]
pub enum Stop {
    /// The entry function returned to address 0.
    Returned,
    Halted,
    StepLimit,
    Failed(TranslateError),
}

/// Host side of execution: translates on first entry, caches the result and
/// services call dispatch and syscalls for compiled code.
pub struct Runner {
    translator: RefCell<FunctionTranslator>,
    functions: RefCell<LruCache<u32, Rc<CompiledFunction>>>,
    entered: Cell<u64>,
    max_steps: u64,
    step_limit_hit: Cell<bool>,
    failure: RefCell<Option<TranslateError>>,
}

impl Runner {
    pub fn new(translator: FunctionTranslator, max_steps: u64) -> Rc<Self> {
        Rc::new(Runner {
            translator: RefCell::new(translator),
            functions: RefCell::new(LruCache::new(MAX_FUNCTIONS)),
            entered: Cell::new(0),
            max_steps,
            step_limit_hit: Cell::new(false),
            failure: RefCell::new(None),
        })
    }

    pub fn run(self: &Rc<Self>, state: &mut CpuState) -> Stop {
        state.set_runtime(self.clone());
        state.gpr[REG_RA] = 0;

        info!("Running from 0x{:08X}", state.pc);
        while !state.halted && state.pc != 0 {
            self.enter(state);
        }

        if let Some(err) = self.failure.borrow_mut().take() {
            return Stop::Failed(err);
        }
        if self.step_limit_hit.get() {
            Stop::StepLimit
        } else if state.halted {
            Stop::Halted
        } else {
            Stop::Returned
        }
    }

    pub fn functions_entered(&self) -> u64 {
        self.entered.get()
    }

    pub fn functions_cached(&self) -> usize {
        self.functions.borrow().len()
    }

    pub fn usage(&self) -> Vec<InstructionCount> {
        self.translator.borrow().usage_snapshot()
    }

    fn enter(&self, state: &mut CpuState) {
        let steps = self.entered.get() + 1;
        self.entered.set(steps);
        if steps > self.max_steps {
            warn!("Step limit of {} reached at 0x{:08X}", self.max_steps, state.pc);
            self.step_limit_hit.set(true);
            state.halted = true;
            return;
        }

        match self.function(state.pc) {
            Ok(function) => function.call(state),
            Err(err) => {
                error!("{}", err);
                *self.failure.borrow_mut() = Some(err);
                state.halted = true;
            }
        }
    }

    fn function(&self, pc: u32) -> Result<Rc<CompiledFunction>, TranslateError> {
        if let Some(function) = self.functions.borrow_mut().get(&pc) {
            return Ok(Rc::clone(function));
        }

        let function = Rc::new(self.translator.borrow_mut().translate(pc)?);
        debug!("Translated {:?}", function);
        self.functions.borrow_mut().put(pc, Rc::clone(&function));
        Ok(function)
    }
}

impl Runtime for Runner {
    fn call_pc(&self, state: &mut CpuState) {
        let return_address = state.gpr[REG_RA];
        while state.pc != return_address && !state.halted {
            self.enter(state);
        }
    }

    fn syscall(&self, state: &mut CpuState, code: u32) {
        info!(
            "syscall 0x{:05X} from 0x{:08X} (a0=0x{:08X}, a1=0x{:08X})",
            code,
            state.pc.wrapping_sub(4),
            state.gpr[4],
            state.gpr[5]
        );
        state.set_gpr(REG_V0, 0);
    }

    fn breakpoint(&self, state: &mut CpuState) {
        warn!("BREAK hit, halting (last PC 0x{:08X})", state.pc);
    }
}

/*
    Allegrex register/flag context shared by every compiled function
*/

use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use tracing::{trace, warn};

use crate::bus::Memory;

pub const GPR_NAMES: [&str; 32] = [
    "zero", "at", "v0", "v1", "a0", "a1", "a2", "a3",
    "t0", "t1", "t2", "t3", "t4", "t5", "t6", "t7",
    "s0", "s1", "s2", "s3", "s4", "s5", "s6", "s7",
    "t8", "t9", "k0", "k1", "gp", "sp", "fp", "ra",
];

pub const REG_V0: usize = 2;
pub const REG_SP: usize = 29;
pub const REG_RA: usize = 31;

pub trait CPU {
    type RegisterType;

    fn pc(&self) -> u32;
    fn set_pc(&mut self, value: u32);

    fn read_register(&self, index: usize) -> Self::RegisterType;
    fn write_register(&mut self, index: usize, value: Self::RegisterType);

    fn read32(&self, addr: u32) -> u32;
}

/// Services a compiled function needs from whoever is driving it.
///
/// `call_pc` runs the callee starting at `state.pc()` until control comes back
/// to the return address held in `$ra`.
pub trait Runtime {
    fn call_pc(&self, state: &mut CpuState);

    fn syscall(&self, state: &mut CpuState, code: u32);

    fn breakpoint(&self, state: &mut CpuState) {
        warn!("BREAK hit at PC 0x{:08X}", state.pc());
    }
}

pub struct CpuState {
    pub gpr: [u32; 32],
    pub hi: u32,
    pub lo: u32,
    pub pc: u32,
    pub branch_flag: bool,
    pub branch_pc: u32,
    pub expected_ra: u32,
    pub halted: bool,
    pub memory: Arc<dyn Memory>,
    runtime: Option<Rc<dyn Runtime>>,
}

impl CpuState {
    pub fn new(memory: Arc<dyn Memory>) -> Self {
        CpuState {
            gpr: [0; 32],
            hi: 0,
            lo: 0,
            pc: 0,
            branch_flag: false,
            branch_pc: 0,
            expected_ra: 0,
            halted: false,
            memory,
            runtime: None,
        }
    }

    pub fn set_runtime(&mut self, runtime: Rc<dyn Runtime>) {
        self.runtime = Some(runtime);
    }

    #[inline(always)]
    pub fn gpr(&self, index: usize) -> u32 {
        self.gpr[index]
    }

    /// Writes to `$zero` are dropped.
    #[inline(always)]
    pub fn set_gpr(&mut self, index: usize, value: u32) {
        if index != 0 {
            self.gpr[index] = value;
        }
    }

    pub fn hilo(&self) -> u64 {
        ((self.hi as u64) << 32) | self.lo as u64
    }

    pub fn set_hilo(&mut self, value: u64) {
        self.hi = (value >> 32) as u32;
        self.lo = value as u32;
    }

    pub fn call_pc(&mut self) {
        match self.runtime.clone() {
            Some(runtime) => {
                trace!("call_pc 0x{:08X} (ra 0x{:08X})", self.pc, self.gpr[REG_RA]);
                runtime.call_pc(self);
            }
            None => {
                warn!("call_pc 0x{:08X} without a runtime, halting", self.pc);
                self.halted = true;
            }
        }
    }

    pub fn syscall(&mut self, code: u32) {
        match self.runtime.clone() {
            Some(runtime) => runtime.syscall(self, code),
            None => warn!("syscall 0x{:05X} without a runtime, ignoring", code),
        }
    }

    pub fn breakpoint(&mut self) {
        self.halted = true;
        if let Some(runtime) = self.runtime.clone() {
            runtime.breakpoint(self);
        }
    }
}

impl CPU for CpuState {
    type RegisterType = u32;

    fn pc(&self) -> u32 {
        self.pc
    }

    fn set_pc(&mut self, value: u32) {
        self.pc = value;
    }

    fn read_register(&self, index: usize) -> Self::RegisterType {
        self.gpr[index]
    }

    fn write_register(&mut self, index: usize, value: Self::RegisterType) {
        self.set_gpr(index, value);
    }

    fn read32(&self, addr: u32) -> u32 {
        self.memory.read32(addr)
    }
}

impl fmt::Debug for CpuState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("CpuState");
        s.field("pc", &format_args!("0x{:08X}", self.pc));
        for (name, value) in GPR_NAMES.iter().zip(self.gpr.iter()) {
            if *value != 0 {
                s.field(name, &format_args!("0x{:08X}", value));
            }
        }
        s.field("hi", &format_args!("0x{:08X}", self.hi))
            .field("lo", &format_args!("0x{:08X}", self.lo))
            .field("branch_flag", &self.branch_flag)
            .field("halted", &self.halted)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Ram;

    #[test]
    fn zero_register_is_hardwired() {
        let mut state = CpuState::new(Arc::new(Ram::new(0, 0x100)));
        state.set_gpr(0, 0xDEAD_BEEF);
        state.write_register(4, 7);
        assert_eq!(state.gpr(0), 0);
        assert_eq!(state.read_register(4), 7);
    }

    #[test]
    fn hilo_splits_into_halves() {
        let mut state = CpuState::new(Arc::new(Ram::new(0, 0x100)));
        state.set_hilo(0x1234_5678_9ABC_DEF0);
        assert_eq!(state.hi, 0x1234_5678);
        assert_eq!(state.lo, 0x9ABC_DEF0);
        assert_eq!(state.hilo(), 0x1234_5678_9ABC_DEF0);
    }

    #[test]
    fn breakpoint_without_runtime_still_halts() {
        let mut state = CpuState::new(Arc::new(Ram::new(0, 0x100)));
        state.breakpoint();
        assert!(state.halted);
    }

    #[test]
    fn call_pc_without_runtime_halts() {
        let mut state = CpuState::new(Arc::new(Ram::new(0, 0x100)));
        state.pc = 0x40;
        state.call_pc();
        assert!(state.halted);
        assert_eq!(state.pc, 0x40);
    }
}

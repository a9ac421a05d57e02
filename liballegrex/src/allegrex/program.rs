/*
    Fragment tree lowering and the threaded executor
*/

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::error::TranslateError;
use super::fragment::{Condition, Fragment, Label, Raw};
use crate::cpu::CpuState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Exec(usize),
    Jump(usize),
    JumpIf(Condition, usize),
    CallPc,
    Return,
}

/// A fragment tree flattened into steps with every label resolved to a step index.
pub struct Program {
    pub(crate) steps: Vec<Step>,
    pub(crate) ops: Vec<Raw>,
    labels: Vec<(usize, Label)>,
}

struct Lowering {
    steps: Vec<Step>,
    ops: Vec<Raw>,
    labels: HashMap<u32, usize>,
    named: Vec<(usize, Label)>,
    pending: Vec<(usize, Label)>,
}

impl Lowering {
    fn emit(&mut self, fragment: Fragment) {
        match fragment {
            Fragment::Raw(raw) => {
                self.steps.push(Step::Exec(self.ops.len()));
                self.ops.push(raw);
            }
            Fragment::List(items) => items.into_iter().for_each(|item| self.emit(item)),
            Fragment::Label(label) => {
                self.labels.insert(label.id, self.steps.len());
                self.named.push((self.steps.len(), label));
            }
            Fragment::Jump(label) => {
                self.pending.push((self.steps.len(), label));
                self.steps.push(Step::Jump(usize::MAX));
            }
            Fragment::If { cond, body } => {
                let at = self.steps.len();
                self.steps.push(Step::JumpIf(cond.negate(), usize::MAX));
                self.emit(*body);
                self.steps[at] = Step::JumpIf(cond.negate(), self.steps.len());
            }
            Fragment::CallPc => self.steps.push(Step::CallPc),
            Fragment::Return => self.steps.push(Step::Return),
        }
    }

    fn finish(mut self) -> Result<Program, TranslateError> {
        for (at, label) in self.pending.drain(..) {
            let target = *self
                .labels
                .get(&label.id)
                .ok_or(TranslateError::UnresolvedLabel(label))?;
            self.steps[at] = Step::Jump(target);
        }
        Ok(Program {
            steps: self.steps,
            ops: self.ops,
            labels: self.named,
        })
    }
}

impl Program {
    pub fn lower(fragment: Fragment) -> Result<Program, TranslateError> {
        let mut lowering = Lowering {
            steps: Vec::new(),
            ops: Vec::new(),
            labels: HashMap::new(),
            named: Vec::new(),
            pending: Vec::new(),
        };
        lowering.emit(fragment);
        lowering.finish()
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn op_count(&self) -> usize {
        self.ops.len()
    }

    pub fn run(&self, state: &mut CpuState) {
        let mut ip = 0;
        while let Some(step) = self.steps.get(ip) {
            ip += 1;
            match *step {
                Step::Exec(op) => (self.ops[op].op)(state),
                Step::Jump(target) => ip = target,
                Step::JumpIf(cond, target) => {
                    if cond.holds(state) {
                        ip = target;
                    }
                }
                Step::CallPc => {
                    state.call_pc();
                    if state.halted {
                        return;
                    }
                }
                Step::Return => return,
            }
        }
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut labels = self.labels.iter().peekable();
        for (index, step) in self.steps.iter().enumerate() {
            while let Some((_, label)) = labels.next_if(|(at, _)| *at == index) {
                writeln!(f, "{}:", label)?;
            }
            match step {
                Step::Exec(op) => writeln!(f, "{:5}  {}", index, self.ops[*op].text)?,
                Step::Jump(target) => writeln!(f, "{:5}  jump {}", index, target)?,
                Step::JumpIf(cond, target) => {
                    writeln!(f, "{:5}  if {} jump {}", index, cond, target)?
                }
                Step::CallPc => writeln!(f, "{:5}  call_pc", index)?,
                Step::Return => writeln!(f, "{:5}  return", index)?,
            }
        }
        Ok(())
    }
}

pub type NativeEntry = unsafe extern "C" fn(*const Program, *mut CpuState);

/// Output of one translation: callable with a CPU context, any number of times.
pub struct CompiledFunction {
    address: u32,
    program: Arc<Program>,
    native: Option<NativeEntry>,
}

impl CompiledFunction {
    pub(crate) fn new(address: u32, program: Program, native: Option<NativeEntry>) -> Self {
        CompiledFunction {
            address,
            program: Arc::new(program),
            native,
        }
    }

    pub fn address(&self) -> u32 {
        self.address
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn is_native(&self) -> bool {
        self.native.is_some()
    }

    pub fn call(&self, state: &mut CpuState) {
        match self.native {
            // The entry only dereferences the program and state it is handed.
            Some(entry) => unsafe { entry(Arc::as_ptr(&self.program), state) },
            None => self.program.run(state),
        }
    }
}

impl fmt::Debug for CompiledFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledFunction")
            .field("address", &format_args!("0x{:08X}", self.address))
            .field("steps", &self.program.steps.len())
            .field("native", &self.native.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Ram;

    fn state() -> CpuState {
        CpuState::new(Arc::new(Ram::new(0, 0x100)))
    }

    #[test]
    fn conditional_body_is_skipped() {
        let program = Program::lower(Fragment::list(vec![
            Fragment::when(
                Condition::BranchTaken,
                Fragment::raw("v0 = 1", |s| s.gpr[2] = 1),
            ),
            Fragment::raw("v1 = 2", |s| s.gpr[3] = 2),
        ]))
        .unwrap();

        assert_eq!(program.steps()[0], Step::JumpIf(Condition::BranchNotTaken, 2));
        assert_eq!(program.op_count(), 2);

        let mut s = state();
        program.run(&mut s);
        assert_eq!((s.gpr[2], s.gpr[3]), (0, 2));

        let mut s = state();
        s.branch_flag = true;
        program.run(&mut s);
        assert_eq!((s.gpr[2], s.gpr[3]), (1, 2));
    }

    #[test]
    fn backward_jump_loops() {
        let head = Label { id: 0, address: 0x100 };
        let program = Program::lower(Fragment::list(vec![
            Fragment::Label(head),
            Fragment::raw("v0 += 1; branch_flag = v0 < 5", |s| {
                s.gpr[2] += 1;
                s.branch_flag = s.gpr[2] < 5;
            }),
            Fragment::return_unless_taken(),
            Fragment::Jump(head),
            Fragment::Return,
        ]))
        .unwrap();

        let mut s = state();
        program.run(&mut s);
        assert_eq!(s.gpr[2], 5);
    }

    #[test]
    fn jump_to_missing_label_fails() {
        let stray = Label { id: 7, address: 0x40 };
        let result = Program::lower(Fragment::Jump(stray));
        assert!(matches!(result, Err(TranslateError::UnresolvedLabel(l)) if l == stray));
    }
}

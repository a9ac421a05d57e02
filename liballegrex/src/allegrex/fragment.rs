/*
    Fragment tree produced by the translators
*/

use std::fmt;
use std::sync::Arc;

use crate::cpu::{CpuState, REG_RA};

pub type OpFn = Arc<dyn Fn(&mut CpuState) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label {
    pub id: u32,
    pub address: u32,
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}_{:08X}", self.id, self.address)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    BranchTaken,
    BranchNotTaken,
}

impl Condition {
    pub fn holds(self, state: &CpuState) -> bool {
        match self {
            Condition::BranchTaken => state.branch_flag,
            Condition::BranchNotTaken => !state.branch_flag,
        }
    }

    pub fn negate(self) -> Condition {
        match self {
            Condition::BranchTaken => Condition::BranchNotTaken,
            Condition::BranchNotTaken => Condition::BranchTaken,
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::BranchTaken => f.write_str("branch_flag"),
            Condition::BranchNotTaken => f.write_str("!branch_flag"),
        }
    }
}

#[derive(Clone)]
pub struct Raw {
    pub text: String,
    pub op: OpFn,
}

impl fmt::Debug for Raw {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Raw").field(&self.text).finish()
    }
}

#[derive(Debug, Clone)]
pub enum Fragment {
    Raw(Raw),
    List(Vec<Fragment>),
    Label(Label),
    Jump(Label),
    If { cond: Condition, body: Box<Fragment> },
    /// Hands control to the runtime at `state.pc` and resumes here afterwards.
    CallPc,
    Return,
}

impl Fragment {
    pub fn raw<F>(text: impl Into<String>, op: F) -> Fragment
    where
        F: Fn(&mut CpuState) + Send + Sync + 'static,
    {
        Fragment::Raw(Raw {
            text: text.into(),
            op: Arc::new(op),
        })
    }

    pub fn list(items: Vec<Fragment>) -> Fragment {
        Fragment::List(items)
    }

    pub fn when(cond: Condition, body: Fragment) -> Fragment {
        Fragment::If {
            cond,
            body: Box::new(body),
        }
    }

    pub fn prologue() -> Fragment {
        Fragment::raw("branch_flag = false", |s| s.branch_flag = false)
    }

    pub fn capture_ra() -> Fragment {
        Fragment::raw("expected_ra = $ra", |s| s.expected_ra = s.gpr[REG_RA])
    }

    pub fn store_pc(pc: u32) -> Fragment {
        Fragment::raw(format!("pc = 0x{:08X}", pc), move |s| s.pc = pc)
    }

    /// Commits a latched branch: `pc` becomes the branch target when taken and
    /// `fallthrough` otherwise.
    pub fn resolve_branch(fallthrough: u32) -> Fragment {
        Fragment::raw(
            format!("pc = branch_flag ? branch_pc : 0x{:08X}", fallthrough),
            move |s| s.pc = if s.branch_flag { s.branch_pc } else { fallthrough },
        )
    }

    pub fn likely(is_likely: bool, body: Fragment) -> Fragment {
        if is_likely {
            Fragment::when(Condition::BranchTaken, body)
        } else {
            body
        }
    }

    pub fn return_unless_taken() -> Fragment {
        Fragment::when(Condition::BranchNotTaken, Fragment::Return)
    }

    /// Text of a raw leaf, `None` for structural fragments.
    pub fn text(&self) -> Option<&str> {
        match self {
            Fragment::Raw(raw) => Some(&raw.text),
            _ => None,
        }
    }

    /// Depth-first leaves in emission order.
    pub fn flatten(&self) -> Vec<&Fragment> {
        let mut out = Vec::new();
        self.collect_into(&mut out);
        out
    }

    fn collect_into<'a>(&'a self, out: &mut Vec<&'a Fragment>) {
        match self {
            Fragment::List(items) => items.iter().for_each(|item| item.collect_into(out)),
            other => out.push(other),
        }
    }

    fn render(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        let pad = "    ".repeat(depth);
        match self {
            Fragment::Raw(raw) => writeln!(f, "{}{}", pad, raw.text),
            Fragment::List(items) => items.iter().try_for_each(|item| item.render(f, depth)),
            Fragment::Label(label) => writeln!(f, "{}:", label),
            Fragment::Jump(label) => writeln!(f, "{}goto {}", pad, label),
            Fragment::If { cond, body } => {
                writeln!(f, "{}if {} {{", pad, cond)?;
                body.render(f, depth + 1)?;
                writeln!(f, "{}}}", pad)
            }
            Fragment::CallPc => writeln!(f, "{}call_pc", pad),
            Fragment::Return => writeln!(f, "{}return", pad),
        }
    }
}

impl fmt::Display for Fragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.render(f, 1)
    }
}

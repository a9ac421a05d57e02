/*
    Allegrex instruction classification
*/

use std::fmt;

use bitflags::bitflags;

use super::instruction::Instruction;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct InstructionFlags: u8 {
        const JUMP_OR_BRANCH = 1 << 0;
        /// Conditional, PC-relative transfer.
        const BRANCH = 1 << 1;
        const CALL = 1 << 2;
        /// Delay slot only executes when the branch is taken.
        const LIKELY = 1 << 3;
        const SYSCALL = 1 << 4;
        const BREAK = 1 << 5;
    }
}

macro_rules! kinds {
    ($($variant:ident => $name:literal),* $(,)?) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum Kind {
            $($variant),*
        }

        impl Kind {
            pub const ALL: &'static [Kind] = &[$(Kind::$variant),*];

            pub fn name(self) -> &'static str {
                match self {
                    $(Kind::$variant => $name),*
                }
            }
        }
    };
}

kinds! {
    Nop => "nop",
    Sll => "sll",
    Srl => "srl",
    Rotr => "rotr",
    Sra => "sra",
    Sllv => "sllv",
    Srlv => "srlv",
    Rotrv => "rotrv",
    Srav => "srav",
    Jr => "jr",
    Jalr => "jalr",
    Movz => "movz",
    Movn => "movn",
    Syscall => "syscall",
    Break => "break",
    Sync => "sync",
    Mfhi => "mfhi",
    Mthi => "mthi",
    Mflo => "mflo",
    Mtlo => "mtlo",
    Clz => "clz",
    Clo => "clo",
    Mult => "mult",
    Multu => "multu",
    Div => "div",
    Divu => "divu",
    Madd => "madd",
    Maddu => "maddu",
    Msub => "msub",
    Msubu => "msubu",
    Add => "add",
    Addu => "addu",
    Sub => "sub",
    Subu => "subu",
    And => "and",
    Or => "or",
    Xor => "xor",
    Nor => "nor",
    Slt => "slt",
    Sltu => "sltu",
    Max => "max",
    Min => "min",
    Bltz => "bltz",
    Bgez => "bgez",
    Bltzl => "bltzl",
    Bgezl => "bgezl",
    Bltzal => "bltzal",
    Bgezal => "bgezal",
    Bltzall => "bltzall",
    Bgezall => "bgezall",
    Bal => "bal",
    J => "j",
    Jal => "jal",
    B => "b",
    Beq => "beq",
    Bne => "bne",
    Blez => "blez",
    Bgtz => "bgtz",
    Beql => "beql",
    Bnel => "bnel",
    Blezl => "blezl",
    Bgtzl => "bgtzl",
    Addi => "addi",
    Addiu => "addiu",
    Slti => "slti",
    Sltiu => "sltiu",
    Andi => "andi",
    Ori => "ori",
    Xori => "xori",
    Lui => "lui",
    Ext => "ext",
    Ins => "ins",
    Seb => "seb",
    Seh => "seh",
    Wsbh => "wsbh",
    Bitrev => "bitrev",
    Lb => "lb",
    Lh => "lh",
    Lwl => "lwl",
    Lw => "lw",
    Lbu => "lbu",
    Lhu => "lhu",
    Lwr => "lwr",
    Sb => "sb",
    Sh => "sh",
    Swl => "swl",
    Sw => "sw",
    Swr => "swr",
    Cache => "cache",
    Mfc0 => "mfc0",
    Mtc0 => "mtc0",
    Eret => "eret",
    Mfc1 => "mfc1",
    Mtc1 => "mtc1",
    Cop1 => "cop1",
    Lwc1 => "lwc1",
    Swc1 => "swc1",
    Unknown => "unknown",
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstructionType {
    pub kind: Kind,
    pub flags: InstructionFlags,
}

impl InstructionType {
    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn is_jump_or_branch(&self) -> bool {
        self.flags.contains(InstructionFlags::JUMP_OR_BRANCH)
    }

    pub fn is_branch(&self) -> bool {
        self.flags.contains(InstructionFlags::BRANCH)
    }

    pub fn is_call(&self) -> bool {
        self.flags.contains(InstructionFlags::CALL)
    }

    pub fn is_likely(&self) -> bool {
        self.flags.contains(InstructionFlags::LIKELY)
    }

    pub fn is_syscall(&self) -> bool {
        self.flags.contains(InstructionFlags::SYSCALL)
    }

    pub fn is_break(&self) -> bool {
        self.flags.contains(InstructionFlags::BREAK)
    }
}

impl fmt::Display for InstructionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<Kind> for InstructionType {
    fn from(kind: Kind) -> Self {
        InstructionType {
            kind,
            flags: flags_for(kind),
        }
    }
}

fn flags_for(kind: Kind) -> InstructionFlags {
    use InstructionFlags as F;
    use Kind::*;

    let jb = F::JUMP_OR_BRANCH;
    let branch = F::JUMP_OR_BRANCH | F::BRANCH;

    match kind {
        B | Beq | Bne | Blez | Bgtz | Bltz | Bgez => branch,
        Beql | Bnel | Blezl | Bgtzl | Bltzl | Bgezl => branch | F::LIKELY,
        Bal | Bltzal | Bgezal => branch | F::CALL,
        Bltzall | Bgezall => branch | F::CALL | F::LIKELY,
        J | Jr => jb,
        Jal | Jalr => jb | F::CALL,
        Syscall => F::SYSCALL,
        Break => F::BREAK,
        _ => F::empty(),
    }
}

/// Classifies one instruction word.
///
/// Pure over the instruction; the fetch address is part of `Instruction` so
/// context-dependent pseudo forms can be told apart from their base encoding.
pub fn classify(i: Instruction) -> InstructionType {
    decode_kind(i).into()
}

fn decode_kind(i: Instruction) -> Kind {
    use Kind::*;

    if i.data == 0 {
        return Nop;
    }

    match i.opcode() {
        0x00 => match i.funct() {
            0x00 => Sll,
            0x02 if i.rs() == 1 => Rotr,
            0x02 => Srl,
            0x03 => Sra,
            0x04 => Sllv,
            0x06 if i.sa() == 1 => Rotrv,
            0x06 => Srlv,
            0x07 => Srav,
            0x08 => Jr,
            0x09 => Jalr,
            0x0A => Movz,
            0x0B => Movn,
            0x0C => Syscall,
            0x0D => Break,
            0x0F => Sync,
            0x10 => Mfhi,
            0x11 => Mthi,
            0x12 => Mflo,
            0x13 => Mtlo,
            0x16 => Clz,
            0x17 => Clo,
            0x18 => Mult,
            0x19 => Multu,
            0x1A => Div,
            0x1B => Divu,
            0x1C => Madd,
            0x1D => Maddu,
            0x20 => Add,
            0x21 => Addu,
            0x22 => Sub,
            0x23 => Subu,
            0x24 => And,
            0x25 => Or,
            0x26 => Xor,
            0x27 => Nor,
            0x2A => Slt,
            0x2B => Sltu,
            0x2C => Max,
            0x2D => Min,
            0x2E => Msub,
            0x2F => Msubu,
            _ => Unknown,
        },
        0x01 => match i.rt() {
            0x00 => Bltz,
            0x01 => Bgez,
            0x02 => Bltzl,
            0x03 => Bgezl,
            0x10 => Bltzal,
            0x11 if i.rs() == 0 => Bal,
            0x11 => Bgezal,
            0x12 => Bltzall,
            0x13 => Bgezall,
            _ => Unknown,
        },
        0x02 => J,
        0x03 => Jal,
        0x04 if i.rs() == 0 && i.rt() == 0 => B,
        0x04 => Beq,
        0x05 => Bne,
        0x06 => Blez,
        0x07 => Bgtz,
        0x08 => Addi,
        0x09 => Addiu,
        0x0A => Slti,
        0x0B => Sltiu,
        0x0C => Andi,
        0x0D => Ori,
        0x0E => Xori,
        0x0F => Lui,
        0x10 => match i.rs() {
            0x00 => Mfc0,
            0x04 => Mtc0,
            0x10 if i.funct() == 0x18 => Eret,
            _ => Unknown,
        },
        0x11 => match i.rs() {
            0x00 => Mfc1,
            0x04 => Mtc1,
            _ => Cop1,
        },
        0x14 => Beql,
        0x15 => Bnel,
        0x16 => Blezl,
        0x17 => Bgtzl,
        0x1F => match i.funct() {
            0x00 => Ext,
            0x04 => Ins,
            0x20 => match i.sa() {
                0x02 => Wsbh,
                0x10 => Seb,
                0x14 => Bitrev,
                0x18 => Seh,
                _ => Unknown,
            },
            _ => Unknown,
        },
        0x20 => Lb,
        0x21 => Lh,
        0x22 => Lwl,
        0x23 => Lw,
        0x24 => Lbu,
        0x25 => Lhu,
        0x26 => Lwr,
        0x28 => Sb,
        0x29 => Sh,
        0x2A => Swl,
        0x2B => Sw,
        0x2E => Swr,
        0x2F => Cache,
        0x31 => Lwc1,
        0x39 => Swc1,
        _ => Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind(data: u32) -> Kind {
        classify(Instruction::new(0x0880_0000, data)).kind
    }

    #[test]
    fn pseudo_instructions() {
        assert_eq!(kind(0x0000_0000), Kind::Nop);
        assert_eq!(kind(0x1000_0004), Kind::B);
        assert_eq!(kind(0x0411_0004), Kind::Bal);
        assert_eq!(kind(0x1085_0004), Kind::Beq);
    }

    #[test]
    fn control_flow_flags() {
        let beql = classify(Instruction::new(0, 0x5085_0004));
        assert_eq!(beql.kind, Kind::Beql);
        assert!(beql.is_jump_or_branch() && beql.is_branch() && beql.is_likely());
        assert!(!beql.is_call());

        let jal = classify(Instruction::new(0, 0x0C00_0010));
        assert!(jal.is_jump_or_branch() && jal.is_call());
        assert!(!jal.is_branch());

        let bal = classify(Instruction::new(0, 0x0411_0004));
        assert!(bal.is_branch() && bal.is_call());

        let syscall = classify(Instruction::new(0, 0x0000_000C));
        assert!(syscall.is_syscall() && !syscall.is_jump_or_branch());

        let brk = classify(Instruction::new(0, 0x0000_000D));
        assert!(brk.is_break());
    }

    #[test]
    fn allegrex_extensions() {
        // rotr $v0, $v1, 4
        assert_eq!(kind(0x0023_1102), Kind::Rotr);
        // srl $v0, $v1, 4
        assert_eq!(kind(0x0003_1102), Kind::Srl);
        // seb $v0, $v1
        assert_eq!(kind(0x7C03_1420), Kind::Seb);
        // ext $v0, $v1, 4, 8
        assert_eq!(kind(0x7C62_3900), Kind::Ext);
        // max $v0, $a0, $a1
        assert_eq!(kind(0x0085_102C), Kind::Max);
    }

    #[test]
    fn coprocessor_and_garbage() {
        assert_eq!(kind(0x4002_6000), Kind::Mfc0);
        assert_eq!(kind(0x4200_0018), Kind::Eret);
        assert_eq!(kind(0xC482_0000), Kind::Lwc1);
        assert_eq!(kind(0xFC00_0000), Kind::Unknown);
    }

    #[test]
    fn names_are_unique() {
        let mut names: Vec<_> = Kind::ALL.iter().map(|k| k.name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), Kind::ALL.len());
    }
}

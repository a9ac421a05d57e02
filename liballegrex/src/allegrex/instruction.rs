use std::fmt;

use crate::bus::Memory;

/// One fetched instruction word and the address it was fetched from.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Instruction {
    pub pc: u32,
    pub data: u32,
}

impl Instruction {
    pub fn new(pc: u32, data: u32) -> Self {
        Instruction { pc, data }
    }

    pub fn fetch(memory: &dyn Memory, pc: u32) -> Self {
        Instruction::new(pc, memory.read32(pc))
    }

    #[inline(always)]
    fn bits(&self, offset: u32, len: u32) -> u32 {
        (self.data >> offset) & ((1 << len) - 1)
    }

    pub fn opcode(&self) -> u32 {
        self.bits(26, 6)
    }

    pub fn rs(&self) -> usize {
        self.bits(21, 5) as usize
    }

    pub fn rt(&self) -> usize {
        self.bits(16, 5) as usize
    }

    pub fn rd(&self) -> usize {
        self.bits(11, 5) as usize
    }

    pub fn sa(&self) -> u32 {
        self.bits(6, 5)
    }

    pub fn funct(&self) -> u32 {
        self.bits(0, 6)
    }

    /// Sign-extended 16-bit immediate.
    pub fn imm16(&self) -> i32 {
        self.data as u16 as i16 as i32
    }

    pub fn u_imm16(&self) -> u32 {
        self.bits(0, 16)
    }

    pub fn u_imm26(&self) -> u32 {
        self.bits(0, 26)
    }

    /// 20-bit code field of SYSCALL and BREAK.
    pub fn syscall_code(&self) -> u32 {
        self.bits(6, 20)
    }

    // EXT/INS bit position and field width (msbd for EXT, msb for INS)
    pub fn pos(&self) -> u32 {
        self.sa()
    }

    pub fn size_field(&self) -> u32 {
        self.bits(11, 5)
    }

    pub fn branch_address(&self) -> u32 {
        self.pc
            .wrapping_add(4)
            .wrapping_add((self.imm16() << 2) as u32)
    }

    pub fn jump_address(&self) -> u32 {
        (self.pc & 0xF000_0000) | (self.u_imm26() << 2)
    }
}

impl fmt::Debug for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Instruction(0x{:08X}: 0x{:08X})", self.pc, self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_extraction() {
        // addiu $a0, $sp, -16
        let i = Instruction::new(0x0880_0000, 0x27A4_FFF0);
        assert_eq!(i.opcode(), 0x09);
        assert_eq!(i.rs(), 29);
        assert_eq!(i.rt(), 4);
        assert_eq!(i.imm16(), -16);
        assert_eq!(i.u_imm16(), 0xFFF0);
    }

    #[test]
    fn branch_and_jump_targets() {
        // beq $zero, $zero, -1 (branch to itself)
        let b = Instruction::new(0x0880_0010, 0x1000_FFFF);
        assert_eq!(b.branch_address(), 0x0880_0010);

        // j 0x08800040
        let j = Instruction::new(0x0880_0010, 0x0A20_0010);
        assert_eq!(j.u_imm26() * 4, 0x0880_0040);
        assert_eq!(j.jump_address(), 0x0880_0040);
    }

    #[test]
    fn syscall_code_field() {
        let i = Instruction::new(0, (0x2013 << 6) | 0x0C);
        assert_eq!(i.syscall_code(), 0x2013);
    }
}

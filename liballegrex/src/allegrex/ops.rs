/*
    Per-opcode translators
*/

use crate::cpu::{CpuState, GPR_NAMES, REG_RA};

use super::fragment::Fragment;
use super::instruction::Instruction;
use super::table::Kind;

pub type TranslateFn = fn(Instruction) -> Fragment;

/// Closed mapping from instruction kind to its translator, built once.
pub struct TranslatorTable {
    entries: Vec<Option<TranslateFn>>,
}

impl TranslatorTable {
    pub fn new() -> Self {
        let mut entries = vec![None; Kind::ALL.len()];
        for &kind in Kind::ALL {
            entries[kind as usize] = translator_for(kind);
        }
        TranslatorTable { entries }
    }

    pub fn get(&self, kind: Kind) -> Option<TranslateFn> {
        self.entries[kind as usize]
    }

    pub fn implemented(&self) -> impl Iterator<Item = Kind> + '_ {
        Kind::ALL
            .iter()
            .copied()
            .filter(|kind| self.entries[*kind as usize].is_some())
    }
}

impl Default for TranslatorTable {
    fn default() -> Self {
        TranslatorTable::new()
    }
}

fn translator_for(kind: Kind) -> Option<TranslateFn> {
    use Kind::*;

    let f: TranslateFn = match kind {
        Nop | Sync | Cache => nop,
        Sll => sll,
        Srl => srl,
        Rotr => rotr,
        Sra => sra,
        Sllv => sllv,
        Srlv => srlv,
        Rotrv => rotrv,
        Srav => srav,
        Jr => jr,
        Jalr => jalr,
        Movz => movz,
        Movn => movn,
        Syscall => syscall,
        Break => break_,
        Mfhi => mfhi,
        Mthi => mthi,
        Mflo => mflo,
        Mtlo => mtlo,
        Clz => clz,
        Clo => clo,
        Mult => mult,
        Multu => multu,
        Div => div,
        Divu => divu,
        Madd => madd,
        Maddu => maddu,
        Msub => msub,
        Msubu => msubu,
        Add => add,
        Addu => addu,
        Sub => sub,
        Subu => subu,
        And => and,
        Or => or,
        Xor => xor,
        Nor => nor,
        Slt => slt,
        Sltu => sltu,
        Max => max,
        Min => min,
        Bltz => bltz,
        Bgez => bgez,
        Bltzl => bltzl,
        Bgezl => bgezl,
        Bltzal => bltzal,
        Bgezal => bgezal,
        Bltzall => bltzall,
        Bgezall => bgezall,
        Bal => bal,
        J => j,
        Jal => jal,
        B => b,
        Beq => beq,
        Bne => bne,
        Blez => blez,
        Bgtz => bgtz,
        Beql => beql,
        Bnel => bnel,
        Blezl => blezl,
        Bgtzl => bgtzl,
        Addi => addi,
        Addiu => addiu,
        Slti => slti,
        Sltiu => sltiu,
        Andi => andi,
        Ori => ori,
        Xori => xori,
        Lui => lui,
        Ext => ext,
        Ins => ins,
        Seb => seb,
        Seh => seh,
        Wsbh => wsbh,
        Bitrev => bitrev,
        Lb => lb,
        Lh => lh,
        Lwl => lwl,
        Lw => lw,
        Lbu => lbu,
        Lhu => lhu,
        Lwr => lwr,
        Sb => sb,
        Sh => sh,
        Swl => swl,
        Sw => sw,
        Swr => swr,
        Mfc0 | Mtc0 | Eret | Mfc1 | Mtc1 | Cop1 | Lwc1 | Swc1 | Unknown => return None,
    };
    Some(f)
}

fn reg(index: usize) -> &'static str {
    GPR_NAMES[index]
}

fn nop(i: Instruction) -> Fragment {
    let name = super::table::classify(i).name();
    Fragment::raw(name, |_| {})
}

// rd = op(rs, rt)
fn alu3(i: Instruction, name: &str, op: fn(u32, u32) -> u32) -> Fragment {
    let (rd, rs, rt) = (i.rd(), i.rs(), i.rt());
    Fragment::raw(
        format!("{} ${}, ${}, ${}", name, reg(rd), reg(rs), reg(rt)),
        move |s| s.set_gpr(rd, op(s.gpr(rs), s.gpr(rt))),
    )
}

// rt = op(rs, imm)
fn alu_imm(i: Instruction, name: &str, imm: u32, op: fn(u32, u32) -> u32) -> Fragment {
    let (rt, rs) = (i.rt(), i.rs());
    Fragment::raw(
        format!("{} ${}, ${}, {}", name, reg(rt), reg(rs), imm as i32),
        move |s| s.set_gpr(rt, op(s.gpr(rs), imm)),
    )
}

// rd = op(rt, sa)
fn shift_imm(i: Instruction, name: &str, op: fn(u32, u32) -> u32) -> Fragment {
    let (rd, rt, sa) = (i.rd(), i.rt(), i.sa());
    Fragment::raw(
        format!("{} ${}, ${}, {}", name, reg(rd), reg(rt), sa),
        move |s| s.set_gpr(rd, op(s.gpr(rt), sa)),
    )
}

// rd = op(rt, rs & 31)
fn shift_var(i: Instruction, name: &str, op: fn(u32, u32) -> u32) -> Fragment {
    let (rd, rt, rs) = (i.rd(), i.rt(), i.rs());
    Fragment::raw(
        format!("{} ${}, ${}, ${}", name, reg(rd), reg(rt), reg(rs)),
        move |s| s.set_gpr(rd, op(s.gpr(rt), s.gpr(rs) & 31)),
    )
}

// rd = op(rt)
fn unary(i: Instruction, name: &str, op: fn(u32) -> u32) -> Fragment {
    let (rd, rt) = (i.rd(), i.rt());
    Fragment::raw(
        format!("{} ${}, ${}", name, reg(rd), reg(rt)),
        move |s| s.set_gpr(rd, op(s.gpr(rt))),
    )
}

fn sll(i: Instruction) -> Fragment {
    shift_imm(i, "sll", |v, sa| v << sa)
}

fn srl(i: Instruction) -> Fragment {
    shift_imm(i, "srl", |v, sa| v >> sa)
}

fn rotr(i: Instruction) -> Fragment {
    shift_imm(i, "rotr", |v, sa| v.rotate_right(sa))
}

fn sra(i: Instruction) -> Fragment {
    shift_imm(i, "sra", |v, sa| ((v as i32) >> sa) as u32)
}

fn sllv(i: Instruction) -> Fragment {
    shift_var(i, "sllv", |v, sa| v << sa)
}

fn srlv(i: Instruction) -> Fragment {
    shift_var(i, "srlv", |v, sa| v >> sa)
}

fn rotrv(i: Instruction) -> Fragment {
    shift_var(i, "rotrv", |v, sa| v.rotate_right(sa))
}

fn srav(i: Instruction) -> Fragment {
    shift_var(i, "srav", |v, sa| ((v as i32) >> sa) as u32)
}

fn movz(i: Instruction) -> Fragment {
    let (rd, rs, rt) = (i.rd(), i.rs(), i.rt());
    Fragment::raw(
        format!("movz ${}, ${}, ${}", reg(rd), reg(rs), reg(rt)),
        move |s| {
            if s.gpr(rt) == 0 {
                s.set_gpr(rd, s.gpr(rs));
            }
        },
    )
}

fn movn(i: Instruction) -> Fragment {
    let (rd, rs, rt) = (i.rd(), i.rs(), i.rt());
    Fragment::raw(
        format!("movn ${}, ${}, ${}", reg(rd), reg(rs), reg(rt)),
        move |s| {
            if s.gpr(rt) != 0 {
                s.set_gpr(rd, s.gpr(rs));
            }
        },
    )
}

fn syscall(i: Instruction) -> Fragment {
    let code = i.syscall_code();
    Fragment::raw(format!("syscall 0x{:05X}", code), move |s| s.syscall(code))
}

fn break_(i: Instruction) -> Fragment {
    Fragment::raw(format!("break 0x{:05X}", i.syscall_code()), |s| s.breakpoint())
}

fn mfhi(i: Instruction) -> Fragment {
    let rd = i.rd();
    Fragment::raw(format!("mfhi ${}", reg(rd)), move |s| s.set_gpr(rd, s.hi))
}

fn mflo(i: Instruction) -> Fragment {
    let rd = i.rd();
    Fragment::raw(format!("mflo ${}", reg(rd)), move |s| s.set_gpr(rd, s.lo))
}

fn mthi(i: Instruction) -> Fragment {
    let rs = i.rs();
    Fragment::raw(format!("mthi ${}", reg(rs)), move |s| s.hi = s.gpr(rs))
}

fn mtlo(i: Instruction) -> Fragment {
    let rs = i.rs();
    Fragment::raw(format!("mtlo ${}", reg(rs)), move |s| s.lo = s.gpr(rs))
}

fn clz(i: Instruction) -> Fragment {
    let (rd, rs) = (i.rd(), i.rs());
    Fragment::raw(format!("clz ${}, ${}", reg(rd), reg(rs)), move |s| {
        s.set_gpr(rd, s.gpr(rs).leading_zeros())
    })
}

fn clo(i: Instruction) -> Fragment {
    let (rd, rs) = (i.rd(), i.rs());
    Fragment::raw(format!("clo ${}, ${}", reg(rd), reg(rs)), move |s| {
        s.set_gpr(rd, s.gpr(rs).leading_ones())
    })
}

// HI:LO = op(HI:LO, rs, rt)
fn hilo(i: Instruction, name: &str, op: fn(u64, u32, u32) -> u64) -> Fragment {
    let (rs, rt) = (i.rs(), i.rt());
    Fragment::raw(format!("{} ${}, ${}", name, reg(rs), reg(rt)), move |s| {
        let value = op(s.hilo(), s.gpr(rs), s.gpr(rt));
        s.set_hilo(value);
    })
}

fn signed_product(a: u32, b: u32) -> u64 {
    (a as i32 as i64).wrapping_mul(b as i32 as i64) as u64
}

fn unsigned_product(a: u32, b: u32) -> u64 {
    (a as u64).wrapping_mul(b as u64)
}

fn mult(i: Instruction) -> Fragment {
    hilo(i, "mult", |_, a, b| signed_product(a, b))
}

fn multu(i: Instruction) -> Fragment {
    hilo(i, "multu", |_, a, b| unsigned_product(a, b))
}

fn madd(i: Instruction) -> Fragment {
    hilo(i, "madd", |acc, a, b| acc.wrapping_add(signed_product(a, b)))
}

fn maddu(i: Instruction) -> Fragment {
    hilo(i, "maddu", |acc, a, b| acc.wrapping_add(unsigned_product(a, b)))
}

fn msub(i: Instruction) -> Fragment {
    hilo(i, "msub", |acc, a, b| acc.wrapping_sub(signed_product(a, b)))
}

fn msubu(i: Instruction) -> Fragment {
    hilo(i, "msubu", |acc, a, b| acc.wrapping_sub(unsigned_product(a, b)))
}

fn div(i: Instruction) -> Fragment {
    hilo(i, "div", |_, a, b| {
        let (n, d) = (a as i32, b as i32);
        let (lo, hi) = if d == 0 {
            (if n < 0 { 1 } else { -1 }, n)
        } else {
            (n.wrapping_div(d), n.wrapping_rem(d))
        };
        ((hi as u32 as u64) << 32) | lo as u32 as u64
    })
}

fn divu(i: Instruction) -> Fragment {
    hilo(i, "divu", |_, n, d| {
        let (lo, hi) = if d == 0 { (u32::MAX, n) } else { (n / d, n % d) };
        ((hi as u64) << 32) | lo as u64
    })
}

// Overflow traps are not modelled; ADD/ADDI/SUB behave like their unsigned forms.
fn add(i: Instruction) -> Fragment {
    alu3(i, "add", u32::wrapping_add)
}

fn addu(i: Instruction) -> Fragment {
    alu3(i, "addu", u32::wrapping_add)
}

fn sub(i: Instruction) -> Fragment {
    alu3(i, "sub", u32::wrapping_sub)
}

fn subu(i: Instruction) -> Fragment {
    alu3(i, "subu", u32::wrapping_sub)
}

fn and(i: Instruction) -> Fragment {
    alu3(i, "and", |a, b| a & b)
}

fn or(i: Instruction) -> Fragment {
    alu3(i, "or", |a, b| a | b)
}

fn xor(i: Instruction) -> Fragment {
    alu3(i, "xor", |a, b| a ^ b)
}

fn nor(i: Instruction) -> Fragment {
    alu3(i, "nor", |a, b| !(a | b))
}

fn slt(i: Instruction) -> Fragment {
    alu3(i, "slt", |a, b| ((a as i32) < (b as i32)) as u32)
}

fn sltu(i: Instruction) -> Fragment {
    alu3(i, "sltu", |a, b| (a < b) as u32)
}

fn max(i: Instruction) -> Fragment {
    alu3(i, "max", |a, b| (a as i32).max(b as i32) as u32)
}

fn min(i: Instruction) -> Fragment {
    alu3(i, "min", |a, b| (a as i32).min(b as i32) as u32)
}

fn addi(i: Instruction) -> Fragment {
    alu_imm(i, "addi", i.imm16() as u32, u32::wrapping_add)
}

fn addiu(i: Instruction) -> Fragment {
    alu_imm(i, "addiu", i.imm16() as u32, u32::wrapping_add)
}

fn slti(i: Instruction) -> Fragment {
    alu_imm(i, "slti", i.imm16() as u32, |a, b| ((a as i32) < (b as i32)) as u32)
}

fn sltiu(i: Instruction) -> Fragment {
    alu_imm(i, "sltiu", i.imm16() as u32, |a, b| (a < b) as u32)
}

fn andi(i: Instruction) -> Fragment {
    alu_imm(i, "andi", i.u_imm16(), |a, b| a & b)
}

fn ori(i: Instruction) -> Fragment {
    alu_imm(i, "ori", i.u_imm16(), |a, b| a | b)
}

fn xori(i: Instruction) -> Fragment {
    alu_imm(i, "xori", i.u_imm16(), |a, b| a ^ b)
}

fn lui(i: Instruction) -> Fragment {
    let rt = i.rt();
    let value = i.u_imm16() << 16;
    Fragment::raw(format!("lui ${}, 0x{:04X}", reg(rt), i.u_imm16()), move |s| {
        s.set_gpr(rt, value)
    })
}

fn ones(width: u32) -> u32 {
    if width >= 32 { u32::MAX } else { (1 << width) - 1 }
}

fn ext(i: Instruction) -> Fragment {
    let (rt, rs) = (i.rt(), i.rs());
    let pos = i.pos();
    let size = i.size_field() + 1;
    let mask = ones(size);
    Fragment::raw(
        format!("ext ${}, ${}, {}, {}", reg(rt), reg(rs), pos, size),
        move |s| s.set_gpr(rt, (s.gpr(rs) >> pos) & mask),
    )
}

fn ins(i: Instruction) -> Fragment {
    let (rt, rs) = (i.rt(), i.rs());
    let pos = i.pos();
    let size = (i.size_field() + 1).saturating_sub(pos);
    let mask = ones(size) << pos;
    Fragment::raw(
        format!("ins ${}, ${}, {}, {}", reg(rt), reg(rs), pos, size),
        move |s| s.set_gpr(rt, (s.gpr(rt) & !mask) | ((s.gpr(rs) << pos) & mask)),
    )
}

fn seb(i: Instruction) -> Fragment {
    unary(i, "seb", |v| v as u8 as i8 as i32 as u32)
}

fn seh(i: Instruction) -> Fragment {
    unary(i, "seh", |v| v as u16 as i16 as i32 as u32)
}

fn wsbh(i: Instruction) -> Fragment {
    unary(i, "wsbh", |v| ((v & 0x00FF_00FF) << 8) | ((v >> 8) & 0x00FF_00FF))
}

fn bitrev(i: Instruction) -> Fragment {
    unary(i, "bitrev", u32::reverse_bits)
}

// Branches only latch their outcome; the translator commits it after the delay slot.

fn latch_branch(
    i: Instruction,
    name: &str,
    link: bool,
    cond: fn(&CpuState, usize, usize) -> bool,
) -> Fragment {
    let (rs, rt) = (i.rs(), i.rt());
    let target = i.branch_address();
    let return_address = i.pc.wrapping_add(8);
    let text = match i.opcode() {
        0x04 | 0x05 | 0x14 | 0x15 if rs != 0 || rt != 0 => {
            format!("{} ${}, ${}, 0x{:08X}", name, reg(rs), reg(rt), target)
        }
        0x04 => format!("{} 0x{:08X}", name, target),
        _ if rs == 0 && link => format!("{} 0x{:08X}", name, target),
        _ => format!("{} ${}, 0x{:08X}", name, reg(rs), target),
    };
    Fragment::raw(text, move |s| {
        s.branch_flag = cond(s, rs, rt);
        s.branch_pc = target;
        if link {
            s.set_gpr(REG_RA, return_address);
        }
    })
}

fn b(i: Instruction) -> Fragment {
    latch_branch(i, "b", false, |_, _, _| true)
}

fn beq(i: Instruction) -> Fragment {
    latch_branch(i, "beq", false, |s, rs, rt| s.gpr(rs) == s.gpr(rt))
}

fn bne(i: Instruction) -> Fragment {
    latch_branch(i, "bne", false, |s, rs, rt| s.gpr(rs) != s.gpr(rt))
}

fn blez(i: Instruction) -> Fragment {
    latch_branch(i, "blez", false, |s, rs, _| (s.gpr(rs) as i32) <= 0)
}

fn bgtz(i: Instruction) -> Fragment {
    latch_branch(i, "bgtz", false, |s, rs, _| s.gpr(rs) as i32 > 0)
}

fn bltz(i: Instruction) -> Fragment {
    latch_branch(i, "bltz", false, |s, rs, _| (s.gpr(rs) as i32) < 0)
}

fn bgez(i: Instruction) -> Fragment {
    latch_branch(i, "bgez", false, |s, rs, _| s.gpr(rs) as i32 >= 0)
}

fn beql(i: Instruction) -> Fragment {
    latch_branch(i, "beql", false, |s, rs, rt| s.gpr(rs) == s.gpr(rt))
}

fn bnel(i: Instruction) -> Fragment {
    latch_branch(i, "bnel", false, |s, rs, rt| s.gpr(rs) != s.gpr(rt))
}

fn blezl(i: Instruction) -> Fragment {
    latch_branch(i, "blezl", false, |s, rs, _| (s.gpr(rs) as i32) <= 0)
}

fn bgtzl(i: Instruction) -> Fragment {
    latch_branch(i, "bgtzl", false, |s, rs, _| s.gpr(rs) as i32 > 0)
}

fn bltzl(i: Instruction) -> Fragment {
    latch_branch(i, "bltzl", false, |s, rs, _| (s.gpr(rs) as i32) < 0)
}

fn bgezl(i: Instruction) -> Fragment {
    latch_branch(i, "bgezl", false, |s, rs, _| s.gpr(rs) as i32 >= 0)
}

fn bltzal(i: Instruction) -> Fragment {
    latch_branch(i, "bltzal", true, |s, rs, _| (s.gpr(rs) as i32) < 0)
}

fn bgezal(i: Instruction) -> Fragment {
    latch_branch(i, "bgezal", true, |s, rs, _| s.gpr(rs) as i32 >= 0)
}

fn bltzall(i: Instruction) -> Fragment {
    latch_branch(i, "bltzall", true, |s, rs, _| (s.gpr(rs) as i32) < 0)
}

fn bgezall(i: Instruction) -> Fragment {
    latch_branch(i, "bgezall", true, |s, rs, _| s.gpr(rs) as i32 >= 0)
}

fn bal(i: Instruction) -> Fragment {
    latch_branch(i, "bal", true, |_, _, _| true)
}

fn j(i: Instruction) -> Fragment {
    let target = i.jump_address();
    Fragment::raw(format!("j 0x{:08X}", target), move |s| {
        s.branch_flag = true;
        s.branch_pc = target;
    })
}

fn jal(i: Instruction) -> Fragment {
    let target = i.jump_address();
    let return_address = i.pc.wrapping_add(8);
    Fragment::raw(format!("jal 0x{:08X}", target), move |s| {
        s.branch_flag = true;
        s.branch_pc = target;
        s.set_gpr(REG_RA, return_address);
    })
}

fn jr(i: Instruction) -> Fragment {
    let rs = i.rs();
    Fragment::raw(format!("jr ${}", reg(rs)), move |s| {
        s.branch_flag = true;
        s.branch_pc = s.gpr(rs);
    })
}

fn jalr(i: Instruction) -> Fragment {
    let (rd, rs) = (i.rd(), i.rs());
    let return_address = i.pc.wrapping_add(8);
    Fragment::raw(format!("jalr ${}, ${}", reg(rd), reg(rs)), move |s| {
        s.branch_flag = true;
        s.branch_pc = s.gpr(rs);
        s.set_gpr(rd, return_address);
    })
}

fn address(s: &CpuState, base: usize, offset: i32) -> u32 {
    s.gpr(base).wrapping_add(offset as u32)
}

fn mem_text(name: &str, i: Instruction) -> String {
    format!("{} ${}, {}(${})", name, reg(i.rt()), i.imm16(), reg(i.rs()))
}

// rt = read(addr)
fn load(i: Instruction, name: &str, read: fn(&CpuState, u32) -> u32) -> Fragment {
    let (rt, base, offset) = (i.rt(), i.rs(), i.imm16());
    Fragment::raw(mem_text(name, i), move |s| {
        let value = read(s, address(s, base, offset));
        s.set_gpr(rt, value);
    })
}

fn store(i: Instruction, name: &str, write: fn(&CpuState, u32, u32)) -> Fragment {
    let (rt, base, offset) = (i.rt(), i.rs(), i.imm16());
    Fragment::raw(mem_text(name, i), move |s| {
        write(s, address(s, base, offset), s.gpr(rt))
    })
}

fn lb(i: Instruction) -> Fragment {
    load(i, "lb", |s, a| s.memory.read8(a) as i8 as i32 as u32)
}

fn lbu(i: Instruction) -> Fragment {
    load(i, "lbu", |s, a| s.memory.read8(a) as u32)
}

fn lh(i: Instruction) -> Fragment {
    load(i, "lh", |s, a| s.memory.read16(a) as i16 as i32 as u32)
}

fn lhu(i: Instruction) -> Fragment {
    load(i, "lhu", |s, a| s.memory.read16(a) as u32)
}

fn lw(i: Instruction) -> Fragment {
    load(i, "lw", |s, a| s.memory.read32(a))
}

fn sb(i: Instruction) -> Fragment {
    store(i, "sb", |s, a, v| s.memory.write8(a, v as u8))
}

fn sh(i: Instruction) -> Fragment {
    store(i, "sh", |s, a, v| s.memory.write16(a, v as u16))
}

fn sw(i: Instruction) -> Fragment {
    store(i, "sw", |s, a, v| s.memory.write32(a, v))
}

// Unaligned word halves, little-endian.

fn lwl(i: Instruction) -> Fragment {
    let (rt, base, offset) = (i.rt(), i.rs(), i.imm16());
    Fragment::raw(mem_text("lwl", i), move |s| {
        let addr = address(s, base, offset);
        let shift = (addr & 3) * 8;
        let word = s.memory.read32(addr & !3);
        let value = (s.gpr(rt) & (0x00FF_FFFF >> shift)) | (word << (24 - shift));
        s.set_gpr(rt, value);
    })
}

fn lwr(i: Instruction) -> Fragment {
    let (rt, base, offset) = (i.rt(), i.rs(), i.imm16());
    Fragment::raw(mem_text("lwr", i), move |s| {
        let addr = address(s, base, offset);
        let shift = (addr & 3) * 8;
        let word = s.memory.read32(addr & !3);
        let value = (s.gpr(rt) & !(u32::MAX >> shift)) | (word >> shift);
        s.set_gpr(rt, value);
    })
}

fn swl(i: Instruction) -> Fragment {
    let (rt, base, offset) = (i.rt(), i.rs(), i.imm16());
    Fragment::raw(mem_text("swl", i), move |s| {
        let addr = address(s, base, offset);
        let shift = (addr & 3) * 8;
        let aligned = addr & !3;
        let word = s.memory.read32(aligned);
        let value = (word & !(u32::MAX >> (24 - shift))) | (s.gpr(rt) >> (24 - shift));
        s.memory.write32(aligned, value);
    })
}

fn swr(i: Instruction) -> Fragment {
    let (rt, base, offset) = (i.rt(), i.rs(), i.imm16());
    Fragment::raw(mem_text("swr", i), move |s| {
        let addr = address(s, base, offset);
        let shift = (addr & 3) * 8;
        let aligned = addr & !3;
        let word = s.memory.read32(aligned);
        let value = (word & !(u32::MAX << shift)) | (s.gpr(rt) << shift);
        s.memory.write32(aligned, value);
    })
}

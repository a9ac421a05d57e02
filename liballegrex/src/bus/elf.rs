/*
    ELF executable loading
*/

use goblin::elf::header::EM_MIPS;
use goblin::elf::program_header::PT_LOAD;
use goblin::elf::Elf;
use thiserror::Error;
use tracing::{debug, info};

use super::Ram;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("malformed ELF image: {0}")]
    Parse(#[from] goblin::error::Error),
    #[error("not a 32-bit MIPS executable (machine {machine}, 64-bit: {is_64})")]
    WrongMachine { machine: u16, is_64: bool },
    #[error("segment at 0x{vaddr:08X} ({size} bytes) does not fit in RAM")]
    SegmentOutOfRange { vaddr: u32, size: u32 },
    #[error("segment at 0x{vaddr:08X} points past the end of the file")]
    Truncated { vaddr: u32 },
}

/// Copies every `PT_LOAD` segment into `ram`, zero-filling `.bss`, and returns
/// the entry point.
pub fn load_elf(ram: &Ram, image: &[u8]) -> Result<u32, LoadError> {
    let elf = Elf::parse(image)?;

    if elf.header.e_machine != EM_MIPS || elf.is_64 {
        return Err(LoadError::WrongMachine {
            machine: elf.header.e_machine,
            is_64: elf.is_64,
        });
    }

    for ph in elf.program_headers.iter().filter(|ph| ph.p_type == PT_LOAD) {
        let vaddr = ph.p_vaddr as u32;
        let memsz = ph.p_memsz as u32;
        let start = ph.p_offset as usize;
        let end = start + ph.p_filesz as usize;

        let data = image.get(start..end).ok_or(LoadError::Truncated { vaddr })?;

        if !ram.contains(vaddr, memsz.max(data.len() as u32)) {
            return Err(LoadError::SegmentOutOfRange { vaddr, size: memsz });
        }

        ram.load(vaddr, data);
        if memsz as usize > data.len() {
            let bss = vec![0u8; memsz as usize - data.len()];
            ram.load(vaddr.wrapping_add(data.len() as u32), &bss);
        }

        debug!(
            "Loaded segment 0x{:08X}: {} bytes from file, {} in memory",
            vaddr,
            data.len(),
            memsz
        );
    }

    let entry = elf.entry as u32;
    info!("ELF entry point 0x{:08X}", entry);
    Ok(entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Memory;

    // Minimal little-endian ELF32 header plus one PT_LOAD program header.
    fn build_elf(machine: u16, vaddr: u32, payload: &[u8], memsz: u32) -> Vec<u8> {
        let phoff = 52u32;
        let data_off = phoff + 32;
        let mut out = Vec::new();
        out.extend_from_slice(&[0x7F, b'E', b'L', b'F', 1, 1, 1, 0]);
        out.extend_from_slice(&[0; 8]);
        out.extend_from_slice(&2u16.to_le_bytes()); // ET_EXEC
        out.extend_from_slice(&machine.to_le_bytes());
        out.extend_from_slice(&1u32.to_le_bytes());
        out.extend_from_slice(&vaddr.to_le_bytes()); // e_entry
        out.extend_from_slice(&phoff.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes()); // e_shoff
        out.extend_from_slice(&0u32.to_le_bytes()); // e_flags
        out.extend_from_slice(&52u16.to_le_bytes());
        out.extend_from_slice(&32u16.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&40u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());

        out.extend_from_slice(&PT_LOAD.to_le_bytes());
        out.extend_from_slice(&data_off.to_le_bytes());
        out.extend_from_slice(&vaddr.to_le_bytes());
        out.extend_from_slice(&vaddr.to_le_bytes());
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        out.extend_from_slice(&memsz.to_le_bytes());
        out.extend_from_slice(&5u32.to_le_bytes());
        out.extend_from_slice(&4u32.to_le_bytes());

        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn loads_segment_and_zero_fills_bss() {
        let ram = Ram::new(0x0880_0000, 0x1000);
        ram.write32(0x0880_0104, 0xFFFF_FFFF);

        let image = build_elf(EM_MIPS, 0x0880_0100, &[1, 2, 3, 4], 8);
        let entry = load_elf(&ram, &image).unwrap();

        assert_eq!(entry, 0x0880_0100);
        assert_eq!(ram.read_bytes(0x0880_0100, 4), vec![1, 2, 3, 4]);
        assert_eq!(ram.read32(0x0880_0104), 0);
    }

    #[test]
    fn rejects_other_machines() {
        let ram = Ram::new(0x0880_0000, 0x1000);
        let image = build_elf(3, 0x0880_0100, &[0; 4], 4);
        assert!(matches!(
            load_elf(&ram, &image),
            Err(LoadError::WrongMachine { machine: 3, .. })
        ));
    }

    #[test]
    fn rejects_segments_outside_ram() {
        let ram = Ram::new(0x0880_0000, 0x1000);
        let image = build_elf(EM_MIPS, 0x0990_0000, &[0; 4], 4);
        assert!(matches!(
            load_elf(&ram, &image),
            Err(LoadError::SegmentOutOfRange { vaddr: 0x0990_0000, .. })
        ));
    }
}

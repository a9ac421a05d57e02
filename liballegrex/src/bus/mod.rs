pub mod elf;

use std::sync::{PoisonError, RwLock};

use tracing::{info, trace, warn};

pub use elf::{load_elf, LoadError};

pub mod map {
    #[derive(Clone, Copy, Debug)]
    pub struct Range(pub u32, pub u32);

    impl Range {
        pub fn contains(self, addr: u32) -> Option<u32> {
            let Range(start, length) = self;
            if addr >= start && addr - start < length {
                Some(addr - start)
            } else {
                None
            }
        }
    }

    // PSP user memory as seen by games
    pub const USER_RAM: Range = Range(0x0880_0000, 24 * 1024 * 1024);
    pub const KSEG_MASK: u32 = 0x3FFF_FFFF;
}

/// Guest address space as seen by the translator and by translated code.
///
/// Accesses are little-endian. Reads outside mapped memory return zero, which
/// the classifier decodes as `nop`.
pub trait Memory: Send + Sync {
    fn read8(&self, addr: u32) -> u8;
    fn read16(&self, addr: u32) -> u16;
    fn read32(&self, addr: u32) -> u32;

    fn write8(&self, addr: u32, value: u8);
    fn write16(&self, addr: u32, value: u16);
    fn write32(&self, addr: u32, value: u32);
}

pub struct Ram {
    range: map::Range,
    bytes: RwLock<Vec<u8>>,
}

impl Ram {
    pub fn new(base: u32, size: u32) -> Ram {
        info!("RAM mapped at 0x{:08X} ({} KiB)", base, size / 1024);
        Ram {
            range: map::Range(base, size),
            bytes: RwLock::new(vec![0; size as usize]),
        }
    }

    pub fn user() -> Ram {
        let map::Range(base, size) = map::USER_RAM;
        Ram::new(base, size)
    }

    pub fn base(&self) -> u32 {
        self.range.0
    }

    pub fn size(&self) -> u32 {
        self.range.1
    }

    fn offset(&self, addr: u32, width: u32) -> Option<usize> {
        let addr = addr & map::KSEG_MASK;
        let offset = self.range.contains(addr)?;
        if offset.checked_add(width)? <= self.range.1 {
            Some(offset as usize)
        } else {
            None
        }
    }

    pub fn contains(&self, addr: u32, len: u32) -> bool {
        len == 0 || self.offset(addr, len).is_some()
    }

    /// Copies `data` into guest memory. Returns `false` if it does not fit.
    pub fn load(&self, addr: u32, data: &[u8]) -> bool {
        let Some(offset) = self.offset(addr, data.len() as u32) else {
            return false;
        };
        let mut bytes = self.bytes.write().unwrap_or_else(PoisonError::into_inner);
        bytes[offset..offset + data.len()].copy_from_slice(data);
        true
    }

    pub fn load_words(&self, addr: u32, words: &[u32]) -> bool {
        let data: Vec<u8> = words.iter().flat_map(|word| word.to_le_bytes()).collect();
        self.load(addr, &data)
    }

    pub fn read_bytes(&self, addr: u32, len: u32) -> Vec<u8> {
        (0..len).map(|i| self.read8(addr.wrapping_add(i))).collect()
    }

    fn read<const N: usize>(&self, addr: u32) -> [u8; N] {
        let mut out = [0u8; N];
        match self.offset(addr, N as u32) {
            Some(offset) => {
                let bytes = self.bytes.read().unwrap_or_else(PoisonError::into_inner);
                out.copy_from_slice(&bytes[offset..offset + N]);
            }
            None => trace!("Unmapped read{} at 0x{:08X}", N * 8, addr),
        }
        out
    }

    fn write<const N: usize>(&self, addr: u32, value: [u8; N]) {
        match self.offset(addr, N as u32) {
            Some(offset) => {
                let mut bytes = self.bytes.write().unwrap_or_else(PoisonError::into_inner);
                bytes[offset..offset + N].copy_from_slice(&value);
            }
            None => warn!("Unmapped write{} at 0x{:08X}", N * 8, addr),
        }
    }
}

impl Memory for Ram {
    fn read8(&self, addr: u32) -> u8 {
        self.read::<1>(addr)[0]
    }

    fn read16(&self, addr: u32) -> u16 {
        u16::from_le_bytes(self.read(addr))
    }

    fn read32(&self, addr: u32) -> u32 {
        u32::from_le_bytes(self.read(addr))
    }

    fn write8(&self, addr: u32, value: u8) {
        self.write(addr, [value]);
    }

    fn write16(&self, addr: u32, value: u16) {
        self.write(addr, value.to_le_bytes());
    }

    fn write32(&self, addr: u32, value: u32) {
        self.write(addr, value.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn little_endian_round_trip() {
        let ram = Ram::new(0x0880_0000, 0x1000);
        ram.write32(0x0880_0010, 0x1122_3344);
        assert_eq!(ram.read8(0x0880_0010), 0x44);
        assert_eq!(ram.read16(0x0880_0012), 0x1122);
        assert_eq!(ram.read32(0x0880_0010), 0x1122_3344);
    }

    #[test]
    fn kseg_mirrors_hit_the_same_bytes() {
        let ram = Ram::new(0x0880_0000, 0x1000);
        ram.write32(0x4880_0004, 0xCAFE_F00D);
        assert_eq!(ram.read32(0x0880_0004), 0xCAFE_F00D);
    }

    #[test]
    fn unmapped_reads_are_zero_and_writes_dropped() {
        let ram = Ram::new(0x0880_0000, 0x1000);
        ram.write32(0x0900_0000, 0xFFFF_FFFF);
        assert_eq!(ram.read32(0x0900_0000), 0);
        // straddles the end of the mapping
        assert_eq!(ram.read32(0x0880_0FFE), 0);
        assert!(!ram.load(0x0880_0FFC, &[0; 8]));
    }
}

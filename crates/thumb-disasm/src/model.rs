use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thumb_rs::memory::{Bus, BusFault};

#[derive(Debug, Clone, Serialize)]
pub struct Section {
    pub name: String,
    pub base: u32,
    pub bytes: Vec<u8>,
    pub perms: &'static str, // e.g., "r-x"
    pub kind: &'static str,  // "raw", "code", "data", "literal"
}

impl Section {
    pub fn end(&self) -> u32 {
        self.base.wrapping_add(self.bytes.len() as u32)
    }

    pub fn contains(&self, addr: u32) -> bool {
        addr >= self.base && addr < self.end()
    }
}

/// Read-only memory image built from raw files or assembled segments.
#[derive(Debug, Clone, Default)]
pub struct Image {
    pub sections: Vec<Section>,
}

/// Address/name pair used for label import and export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelKV {
    pub addr: u32,
    pub name: String,
}

pub fn load_raw_bin(path: &Path, base: u32, skip: usize, len: Option<usize>) -> Result<Image> {
    let file = std::fs::read(path)?;
    anyhow::ensure!(skip <= file.len(), "--skip exceeds file size");
    let mut payload = &file[skip..];
    if let Some(lim) = len {
        anyhow::ensure!(lim <= payload.len(), "--len exceeds remaining file size after skip");
        payload = &payload[..lim];
    }
    let sec = Section { name: "segment0".into(), base, bytes: payload.to_vec(), perms: "r-x", kind: "raw" };
    Ok(Image { sections: vec![sec] })
}

impl Image {
    pub fn read_u8(&self, addr: u32) -> Option<u8> {
        let s = self.sections.iter().find(|s| s.contains(addr))?;
        Some(s.bytes[(addr - s.base) as usize])
    }

    pub fn is_mapped(&self, addr: u32) -> bool {
        self.sections.iter().any(|s| s.contains(addr))
    }
}

impl Bus for Image {
    fn read_u8(&mut self, addr: u32) -> Result<u8, BusFault> {
        Image::read_u8(self, addr).ok_or(BusFault::unmapped(addr))
    }
    fn read_u16(&mut self, addr: u32) -> Result<u16, BusFault> {
        if addr % 2 != 0 {
            return Err(BusFault::unaligned(addr, 2));
        }
        let b0 = Bus::read_u8(self, addr)?;
        let b1 = Bus::read_u8(self, addr.wrapping_add(1))?;
        Ok(u16::from_le_bytes([b0, b1]))
    }
    fn read_u32(&mut self, addr: u32) -> Result<u32, BusFault> {
        if addr % 4 != 0 {
            return Err(BusFault::unaligned(addr, 4));
        }
        let lo = Bus::read_u16(self, addr)? as u32;
        let hi = Bus::read_u16(self, addr.wrapping_add(2))? as u32;
        Ok(lo | hi << 16)
    }
    // images are read-only
    fn write_u8(&mut self, addr: u32, _val: u8) -> Result<(), BusFault> {
        Err(BusFault::unmapped(addr))
    }
    fn write_u16(&mut self, addr: u32, _val: u16) -> Result<(), BusFault> {
        Err(BusFault::unmapped(addr))
    }
    fn write_u32(&mut self, addr: u32, _val: u32) -> Result<(), BusFault> {
        Err(BusFault::unmapped(addr))
    }
    fn check_write(&self, addr: u32, _width: u32) -> Result<(), BusFault> {
        Err(BusFault::unmapped(addr))
    }
}

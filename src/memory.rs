use bitvec::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use tracing::debug;

/// A failed bus access. `align` is the required alignment, or 0 when the
/// address is not backed by any writable region.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[error("address {addr:#010x} {}", describe_alignment(*.align))]
pub struct BusFault {
    pub addr: u32,
    pub align: u32,
}

pub fn describe_alignment(align: u32) -> String {
    if align == 0 {
        "was not mapped".to_string()
    } else {
        format!("was not aligned on a {align}-byte boundary")
    }
}

impl BusFault {
    pub fn unmapped(addr: u32) -> Self {
        Self { addr, align: 0 }
    }
    pub fn unaligned(addr: u32, align: u32) -> Self {
        Self { addr, align }
    }
}

pub trait Bus {
    fn read_u8(&mut self, addr: u32) -> Result<u8, BusFault>;
    fn read_u16(&mut self, addr: u32) -> Result<u16, BusFault>;
    fn read_u32(&mut self, addr: u32) -> Result<u32, BusFault>;
    fn write_u8(&mut self, addr: u32, val: u8) -> Result<(), BusFault>;
    fn write_u16(&mut self, addr: u32, val: u16) -> Result<(), BusFault>;
    fn write_u32(&mut self, addr: u32, val: u32) -> Result<(), BusFault>;
    /// Fails the way a `width`-byte write to `addr` would, without writing.
    fn check_write(&self, addr: u32, width: u32) -> Result<(), BusFault>;
}

/// Access width for external inspection and patching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Access {
    Byte = 1,
    Half = 2,
    Word = 4,
}

impl Access {
    pub fn read<B: Bus>(self, bus: &mut B, addr: u32) -> Result<u32, BusFault> {
        Ok(match self {
            Access::Byte => bus.read_u8(addr)? as u32,
            Access::Half => bus.read_u16(addr)? as u32,
            Access::Word => bus.read_u32(addr)?,
        })
    }

    pub fn write<B: Bus>(self, bus: &mut B, addr: u32, value: u32) -> Result<(), BusFault> {
        match self {
            Access::Byte => bus.write_u8(addr, value as u8),
            Access::Half => bus.write_u16(addr, value as u16),
            Access::Word => bus.write_u32(addr, value),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegionKind {
    Rom,
    Sram,
    Io,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryMapConfig {
    pub rom_base: u32,
    pub rom_size: u32,
    pub sram_base: u32,
    pub sram_size: u32,
    pub io_base: u32,
    pub io_size: u32,
    /// Bytes of real storage behind the IO window; mirrored across it.
    pub io_backing: u32,
    /// IO offsets below this are display memory.
    pub display_size: u32,
}

impl Default for MemoryMapConfig {
    fn default() -> Self {
        Self {
            rom_base: 0x0800_0000,
            rom_size: 32 * 1024,
            sram_base: 0x2000_0000,
            sram_size: 8 * 1024,
            io_base: 0x4000_0000,
            io_size: 0x0800_1800,
            io_backing: 4096,
            display_size: 1024,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Region {
    pub name: &'static str,
    pub kind: RegionKind,
    pub base: u32,
    pub size: u32,
    data: Vec<u8>,
}

impl Region {
    fn new(name: &'static str, kind: RegionKind, base: u32, size: u32, backing: u32) -> Self {
        Self { name, kind, base, size, data: vec![0; backing as usize] }
    }

    pub fn contains(&self, addr: u32) -> bool {
        addr >= self.base && addr - self.base < self.size
    }

    pub fn end(&self) -> u64 {
        self.base as u64 + self.size as u64
    }

    fn offset(&self, addr: u32) -> usize {
        (addr - self.base) as usize % self.data.len()
    }
}

/// Write into the peripheral window, recorded for the host (display, LEDs).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IoWrite {
    pub addr: u32,
    pub value: u8,
    pub display: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SegmentKind {
    Code,
    Data,
    Literal,
}

/// Assembled bytes anchored at an origin address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub origin: u32,
    pub kind: SegmentKind,
    pub bytes: Vec<u8>,
}

impl Segment {
    pub fn end(&self) -> u64 {
        self.origin as u64 + self.bytes.len() as u64
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    #[error("region {name} has size {size:#x}; sizes must be non-zero multiples of 4")]
    RegionSize { name: &'static str, size: u32 },
    #[error("regions {a} and {b} overlap")]
    RegionOverlap { a: &'static str, b: &'static str },
    #[error("segment at {a:#010x} overlaps segment at {b:#010x}")]
    SegmentOverlap { a: u32, b: u32 },
    #[error("segment at {origin:#010x} ({len} bytes) does not fit in a memory region")]
    Unmapped { origin: u32, len: usize },
}

#[derive(Debug, Clone)]
pub struct MemoryMap {
    regions: Vec<Region>,
    display_size: u32,
    changed: BitVec,
    io_log: Vec<IoWrite>,
}

impl MemoryMap {
    pub fn new(cfg: &MemoryMapConfig) -> Result<Self, LoadError> {
        let regions = vec![
            Region::new("rom", RegionKind::Rom, cfg.rom_base, cfg.rom_size, cfg.rom_size),
            Region::new("sram", RegionKind::Sram, cfg.sram_base, cfg.sram_size, cfg.sram_size),
            Region::new("io", RegionKind::Io, cfg.io_base, cfg.io_size, cfg.io_backing),
        ];
        for r in &regions {
            for size in [r.size, r.data.len() as u32] {
                if size == 0 || size % 4 != 0 {
                    return Err(LoadError::RegionSize { name: r.name, size });
                }
            }
        }
        for (i, a) in regions.iter().enumerate() {
            for b in &regions[i + 1..] {
                if (a.base as u64) < b.end() && (b.base as u64) < a.end() {
                    return Err(LoadError::RegionOverlap { a: a.name, b: b.name });
                }
            }
        }
        Ok(Self {
            regions,
            display_size: cfg.display_size,
            changed: bitvec![0; cfg.sram_size as usize],
            io_log: Vec::new(),
        })
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn region_of(&self, addr: u32) -> Option<&Region> {
        self.regions.iter().find(|r| r.contains(addr))
    }

    fn locate(&self, addr: u32) -> Option<(usize, usize)> {
        let idx = self.regions.iter().position(|r| r.contains(addr))?;
        Some((idx, self.regions[idx].offset(addr)))
    }

    fn load_bytes<const N: usize>(&self, addr: u32) -> Result<[u8; N], BusFault> {
        if N > 1 && addr % N as u32 != 0 {
            return Err(BusFault::unaligned(addr, N as u32));
        }
        let (idx, off) = self.locate(addr).ok_or(BusFault::unmapped(addr))?;
        let data = &self.regions[idx].data;
        let mut out = [0u8; N];
        for (i, b) in out.iter_mut().enumerate() {
            *b = data[(off + i) % data.len()];
        }
        Ok(out)
    }

    fn writable(&self, addr: u32, width: u32) -> Result<(usize, usize), BusFault> {
        if width > 1 && addr % width != 0 {
            return Err(BusFault::unaligned(addr, width));
        }
        match self.locate(addr) {
            Some((idx, off)) if self.regions[idx].kind != RegionKind::Rom => Ok((idx, off)),
            _ => Err(BusFault::unmapped(addr)),
        }
    }

    fn store_bytes(&mut self, addr: u32, bytes: &[u8]) -> Result<(), BusFault> {
        let (idx, off) = self.writable(addr, bytes.len() as u32)?;
        match self.regions[idx].kind {
            RegionKind::Rom => Err(BusFault::unmapped(addr)),
            RegionKind::Sram => {
                let region = &mut self.regions[idx];
                region.data[off..off + bytes.len()].copy_from_slice(bytes);
                self.changed[off..off + bytes.len()].fill(true);
                Ok(())
            }
            RegionKind::Io => {
                let region = &mut self.regions[idx];
                let len = region.data.len();
                for (i, &b) in bytes.iter().enumerate() {
                    let o = (off + i) % len;
                    region.data[o] = b;
                    self.io_log.push(IoWrite {
                        addr: addr.wrapping_add(i as u32),
                        value: b,
                        display: (o as u32) < self.display_size,
                    });
                }
                Ok(())
            }
        }
    }

    /// Read without permission or alignment checks; unmapped bytes read 0.
    pub fn peek8(&self, addr: u32) -> u8 {
        match self.locate(addr) {
            Some((idx, off)) => self.regions[idx].data[off],
            None => 0,
        }
    }

    pub fn peek16(&self, addr: u32) -> u16 {
        u16::from_le_bytes([self.peek8(addr), self.peek8(addr.wrapping_add(1))])
    }

    pub fn peek32(&self, addr: u32) -> u32 {
        u32::from_le_bytes([
            self.peek8(addr),
            self.peek8(addr.wrapping_add(1)),
            self.peek8(addr.wrapping_add(2)),
            self.peek8(addr.wrapping_add(3)),
        ])
    }

    /// Write without permission checks (ROM included). Returns false when
    /// the address is unmapped.
    pub fn poke8(&mut self, addr: u32, value: u8) -> bool {
        match self.locate(addr) {
            Some((idx, off)) => {
                self.regions[idx].data[off] = value;
                true
            }
            None => false,
        }
    }

    pub fn poke32(&mut self, addr: u32, value: u32) -> bool {
        value
            .to_le_bytes()
            .iter()
            .enumerate()
            .all(|(i, &b)| self.poke8(addr.wrapping_add(i as u32), b))
    }

    /// Zero every region, ROM included, before loading a new program.
    pub fn clear(&mut self) {
        for r in &mut self.regions {
            r.data.fill(0);
        }
        self.changed.fill(false);
        self.io_log.clear();
    }

    pub fn clear_sram(&mut self) {
        for r in self.regions.iter_mut().filter(|r| r.kind == RegionKind::Sram) {
            r.data.fill(0);
        }
        self.changed.fill(false);
    }

    /// Whether an SRAM byte was written since the last [`MemoryMap::clear_changed`].
    pub fn changed(&self, addr: u32) -> bool {
        match self.locate(addr) {
            Some((idx, off)) if self.regions[idx].kind == RegionKind::Sram => self.changed[off],
            _ => false,
        }
    }

    pub fn clear_changed(&mut self) {
        self.changed.fill(false);
    }

    pub fn take_io_writes(&mut self) -> Vec<IoWrite> {
        std::mem::take(&mut self.io_log)
    }

    /// Copy segments into memory. Segments must not overlap each other and
    /// must each fit inside a single region.
    pub fn load(&mut self, segments: &[Segment]) -> Result<(), LoadError> {
        let mut sorted: Vec<&Segment> = segments.iter().filter(|s| !s.bytes.is_empty()).collect();
        sorted.sort_by_key(|s| s.origin);
        for pair in sorted.windows(2) {
            if pair[0].end() > pair[1].origin as u64 {
                return Err(LoadError::SegmentOverlap { a: pair[0].origin, b: pair[1].origin });
            }
        }
        for s in &sorted {
            let fits = self
                .region_of(s.origin)
                .is_some_and(|r| s.end() <= r.end() && r.kind != RegionKind::Io);
            if !fits {
                return Err(LoadError::Unmapped { origin: s.origin, len: s.bytes.len() });
            }
        }
        for s in sorted {
            debug!(origin = s.origin, len = s.bytes.len(), kind = ?s.kind, "load segment");
            for (i, &b) in s.bytes.iter().enumerate() {
                self.poke8(s.origin.wrapping_add(i as u32), b);
            }
        }
        Ok(())
    }

    /// Hex dump, 16 bytes per row: `0300: 05 20 ...`.
    pub fn format(&self, start: u32, length: u32) -> String {
        let mut out = String::new();
        for x in 0..length {
            let addr = start.wrapping_add(x);
            if x % 16 == 0 {
                if x > 0 {
                    out.push('\n');
                }
                let _ = write!(out, "{addr:08x}: ");
            }
            let _ = write!(out, "{:02x} ", self.peek8(addr));
        }
        out
    }
}

impl Bus for MemoryMap {
    fn read_u8(&mut self, addr: u32) -> Result<u8, BusFault> {
        Ok(self.load_bytes::<1>(addr)?[0])
    }
    fn read_u16(&mut self, addr: u32) -> Result<u16, BusFault> {
        Ok(u16::from_le_bytes(self.load_bytes::<2>(addr)?))
    }
    fn read_u32(&mut self, addr: u32) -> Result<u32, BusFault> {
        Ok(u32::from_le_bytes(self.load_bytes::<4>(addr)?))
    }
    fn write_u8(&mut self, addr: u32, val: u8) -> Result<(), BusFault> {
        self.store_bytes(addr, &[val])
    }
    fn write_u16(&mut self, addr: u32, val: u16) -> Result<(), BusFault> {
        self.store_bytes(addr, &val.to_le_bytes())
    }
    fn write_u32(&mut self, addr: u32, val: u32) -> Result<(), BusFault> {
        self.store_bytes(addr, &val.to_le_bytes())
    }
    fn check_write(&self, addr: u32, width: u32) -> Result<(), BusFault> {
        self.writable(addr, width).map(|_| ())
    }
}

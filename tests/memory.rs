use pretty_assertions::assert_eq;
use thumb_rs::memory::{IoWrite, LoadError, SegmentKind};
use thumb_rs::{Access, Bus, BusFault, MemoryMap, MemoryMapConfig, Segment};

fn map() -> MemoryMap {
    MemoryMap::new(&MemoryMapConfig::default()).unwrap()
}

#[test]
fn sram_is_little_endian() {
    let mut mem = map();
    mem.write_u32(0x2000_0000, 0x1234_5678).unwrap();
    assert_eq!(mem.read_u8(0x2000_0000).unwrap(), 0x78);
    assert_eq!(mem.read_u16(0x2000_0002).unwrap(), 0x1234);
    assert_eq!(Access::Half.read(&mut mem, 0x2000_0000).unwrap(), 0x5678);
    assert!(mem.changed(0x2000_0003));
    assert!(!mem.changed(0x2000_0004));
    mem.clear_changed();
    assert!(!mem.changed(0x2000_0000));
}

#[test]
fn unmapped_and_misaligned_faults() {
    let mut mem = map();
    assert_eq!(mem.read_u8(0x1000_0000), Err(BusFault::unmapped(0x1000_0000)));
    assert_eq!(mem.read_u32(0x2000_0002), Err(BusFault::unaligned(0x2000_0002, 4)));
    assert_eq!(mem.write_u16(0x2000_0001, 0), Err(BusFault::unaligned(0x2000_0001, 2)));
    // the word just past the end of SRAM
    assert_eq!(mem.read_u32(0x2000_2000), Err(BusFault::unmapped(0x2000_2000)));
    assert_eq!(
        BusFault::unaligned(0x2000_0002, 4).to_string(),
        "address 0x20000002 was not aligned on a 4-byte boundary"
    );
}

#[test]
fn rom_is_read_only_on_the_bus() {
    let mut mem = map();
    assert_eq!(mem.write_u8(0x0800_0300, 1), Err(BusFault::unmapped(0x0800_0300)));
    assert!(mem.poke32(0x0800_0300, 0xDEAD_BEEF));
    assert_eq!(mem.read_u32(0x0800_0300).unwrap(), 0xDEAD_BEEF);
    assert!(!mem.poke8(0x1000_0000, 1));
}

#[test]
fn io_writes_are_logged_and_mirrored() {
    let mut mem = map();
    mem.write_u8(0x4000_0000, 7).unwrap();
    mem.write_u8(0x4000_07D0, 9).unwrap();
    assert_eq!(
        mem.take_io_writes(),
        vec![
            IoWrite { addr: 0x4000_0000, value: 7, display: true },
            IoWrite { addr: 0x4000_07D0, value: 9, display: false },
        ]
    );
    assert!(mem.take_io_writes().is_empty());
    // 4 KiB of backing repeats across the window
    assert_eq!(mem.read_u8(0x4000_1000).unwrap(), 7);
}

#[test]
fn load_places_segments() {
    let mut mem = map();
    let code = Segment { origin: 0x0800_0300, kind: SegmentKind::Code, bytes: vec![0x05, 0x20] };
    let data = Segment { origin: 0x2000_0000, kind: SegmentKind::Data, bytes: vec![1, 2, 3, 4] };
    mem.load(&[code, data]).unwrap();
    assert_eq!(mem.read_u16(0x0800_0300).unwrap(), 0x2005);
    assert_eq!(mem.peek32(0x2000_0000), 0x0403_0201);
}

#[test]
fn load_rejects_overlap_and_unmapped() {
    let mut mem = map();
    let a = Segment { origin: 0x0800_0300, kind: SegmentKind::Code, bytes: vec![0; 8] };
    let b = Segment { origin: 0x0800_0304, kind: SegmentKind::Literal, bytes: vec![0; 4] };
    assert_eq!(mem.load(&[a, b]), Err(LoadError::SegmentOverlap { a: 0x0800_0300, b: 0x0800_0304 }));

    let outside = Segment { origin: 0x1000_0000, kind: SegmentKind::Data, bytes: vec![0; 4] };
    assert_eq!(mem.load(&[outside]), Err(LoadError::Unmapped { origin: 0x1000_0000, len: 4 }));

    let straddle = Segment { origin: 0x2000_1FFE, kind: SegmentKind::Data, bytes: vec![0; 4] };
    assert!(mem.load(&[straddle]).is_err());
}

#[test]
fn overlapping_regions_are_rejected() {
    let cfg = MemoryMapConfig { sram_base: 0x0800_4000, ..MemoryMapConfig::default() };
    assert_eq!(MemoryMap::new(&cfg).err(), Some(LoadError::RegionOverlap { a: "rom", b: "sram" }));
}

#[test]
fn empty_or_ragged_regions_are_rejected() {
    let cfg = MemoryMapConfig { sram_size: 0, ..MemoryMapConfig::default() };
    assert_eq!(MemoryMap::new(&cfg).err(), Some(LoadError::RegionSize { name: "sram", size: 0 }));

    let cfg = MemoryMapConfig { io_backing: 0, ..MemoryMapConfig::default() };
    assert_eq!(MemoryMap::new(&cfg).err(), Some(LoadError::RegionSize { name: "io", size: 0 }));

    let cfg = MemoryMapConfig { rom_size: 0x7FFE, ..MemoryMapConfig::default() };
    assert_eq!(MemoryMap::new(&cfg).err(), Some(LoadError::RegionSize { name: "rom", size: 0x7FFE }));
}

#[test]
fn check_write_matches_write_faults() {
    let mut mem = map();
    assert_eq!(mem.check_write(0x2000_0000, 4), Ok(()));
    assert_eq!(mem.check_write(0x2000_0002, 4), Err(BusFault::unaligned(0x2000_0002, 4)));
    assert_eq!(mem.check_write(0x0800_0000, 2), Err(BusFault::unmapped(0x0800_0000)));
    assert_eq!(mem.check_write(0x2000_2000, 1), Err(BusFault::unmapped(0x2000_2000)));
    assert!(mem.take_io_writes().is_empty());
}

#[test]
fn hexdump_rows() {
    let mut mem = map();
    mem.write_u32(0x2000_0000, 0x1234_5678).unwrap();
    let dump = mem.format(0x2000_0000, 20);
    let rows: Vec<&str> = dump.lines().collect();
    assert_eq!(rows.len(), 2);
    assert!(rows[0].starts_with("20000000: 78 56 34 12 00 "));
    assert_eq!(rows[1], "20000010: 00 00 00 00 ");
}

#[test]
fn clear_wipes_everything() {
    let mut mem = map();
    mem.poke8(0x0800_0000, 1);
    mem.write_u8(0x2000_0000, 2).unwrap();
    mem.write_u8(0x4000_0000, 3).unwrap();
    mem.clear();
    assert_eq!(mem.peek8(0x0800_0000), 0);
    assert_eq!(mem.peek8(0x2000_0000), 0);
    assert!(!mem.changed(0x2000_0000));
    assert!(mem.take_io_writes().is_empty());
}

#[test]
fn clear_sram_keeps_rom() {
    let mut mem = map();
    mem.poke8(0x0800_0000, 1);
    mem.write_u8(0x2000_0010, 2).unwrap();
    mem.clear_sram();
    assert_eq!(mem.peek8(0x0800_0000), 1);
    assert_eq!(mem.peek8(0x2000_0010), 0);
}

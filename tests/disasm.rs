use pretty_assertions::assert_eq;
use thumb_rs::decoder::{Decoder, Instr};
use thumb_rs::disasm::{disassemble, fmt_decoded, reglist, target_of};
use thumb_rs::isa::thumb::ThumbDecoder;
use thumb_rs::labels::LabelTable;
use thumb_rs::instructions::{self, TABLE};
use thumb_rs::memory::SegmentKind;
use thumb_rs::{assemble, MemoryMap, MemoryMapConfig};

const ROM: u32 = 0x0800_0300;

fn rom(code: &[u16]) -> MemoryMap {
    let mut mem = MemoryMap::new(&MemoryMapConfig::default()).unwrap();
    for (i, &hw) in code.iter().enumerate() {
        let addr = ROM + 2 * i as u32;
        mem.poke8(addr, hw as u8);
        mem.poke8(addr + 1, (hw >> 8) as u8);
    }
    mem
}

fn text(raw: u32, addr: u32) -> String {
    fmt_decoded(&ThumbDecoder::new().decode(raw), addr, None)
}

#[test]
fn common_forms() {
    assert_eq!(text(0x2005, ROM), "movs    r0, #5");
    assert_eq!(text(0x001A, ROM), "movs    r2, r3");
    assert_eq!(text(0x4248, ROM), "rsbs    r0, r1, #0");
    assert_eq!(text(0x4208, ROM), "tst     r0, r1");
    assert_eq!(text(0x0800, ROM), "lsrs    r0, r0, #32");
    assert_eq!(text(0x6048, ROM), "str     r0, [r1, #4]");
    assert_eq!(text(0x888B, ROM), "ldrh    r3, [r1, #4]");
    assert_eq!(text(0x568C, ROM), "ldrsb   r4, [r1, r2]");
    assert_eq!(text(0x9001, ROM), "str     r0, [sp, #4]");
    assert_eq!(text(0xB082, ROM), "sub     sp, sp, #8");
    assert_eq!(text(0x4680, ROM), "mov     r8, r0");
    assert_eq!(text(0x4770, ROM), "bx      lr");
    assert_eq!(text(0xB672, ROM), "cpsid   i");
    assert_eq!(text(0xBE03, ROM), "bkpt    #3");
}

#[test]
fn bare_mnemonics() {
    assert_eq!(text(0xBF00, ROM), "nop");
    assert_eq!(text(0xBF30, ROM), "wfi");
    assert_eq!(text(0xDE00, ROM), "????");
}

#[test]
fn register_lists_collapse_runs() {
    assert_eq!(reglist(0x4017), "{r0-r2,r4,lr}");
    assert_eq!(reglist(0x8001), "{r0,pc}");
    assert_eq!(text(0xB517, ROM), "push    {r0-r2,r4,lr}");
    assert_eq!(text(0xC006, ROM), "stmia   r0!, {r1,r2}");
    assert_eq!(text(0xC803, ROM), "ldmia   r0, {r0,r1}");
}

#[test]
fn branch_targets_without_labels() {
    assert_eq!(text(0xE006, ROM), "b       pc + 16 ; 08000310");
    assert_eq!(text(0xD1FD, ROM + 4), "bne     pc - 2 ; 08000302");
    let bl = Instr::Bl { offset: 12 }.encode();
    assert_eq!(text(bl, ROM), "bl      #08000310");
    assert_eq!(target_of(&Instr::LdrLit { rt: thumb_rs::Reg(0), imm8: 1 }, ROM + 2), Some(ROM + 8));
}

#[test]
fn listing_uses_labels() {
    let bl = Instr::Bl { offset: 6 }.encode();
    let mut mem = rom(&[0x2005, bl as u16, (bl >> 16) as u16, 0xE7FE, 0x4800, 0xBF00, 0xBF00, 0xBF00]);
    let mut labels = LabelTable::new();
    labels.define("spin", ROM + 6, 4, 1).unwrap();
    labels.define("sub", ROM + 12, 6, 1).unwrap();

    let dec = ThumbDecoder::new();
    let lines = disassemble(&mut mem, &dec, ROM, 10, Some(&labels));
    let texts: Vec<&str> = lines.iter().map(|l| l.text.as_str()).collect();
    assert_eq!(texts, vec!["movs    r0, #5", "bl      sub", "b       spin", "ldr     r0, sub"]);
    assert_eq!(lines[1].hex, "f000 f803");
    assert_eq!(lines[1].width, 4);
    assert_eq!(lines[0].to_string(), "2005      movs    r0, #5");
}

#[test]
fn stops_at_unmapped_memory() {
    let mut mem = rom(&[0x2005]);
    let dec = ThumbDecoder::new();
    let end = 0x0800_8000 - 2;
    mem.poke8(end, 0x05);
    mem.poke8(end + 1, 0x20);
    let lines = disassemble(&mut mem, &dec, end, 8, None);
    assert_eq!(lines.len(), 1);
}

const HEAD: &str = ".cpu cortex-m0\n.thumb\n.syntax unified\n.fpu softvfp\n.global main\n";

// One line per operand shape of every mnemonic the assembler accepts.
const FORMS: &[&str] = &[
    "lsls r1, r2, #3", "lsls r1, r2", "lsrs r1, r2, #32", "lsrs r1, r2", "asrs r1, r2, #1", "asrs r1, r2",
    "adds r1, r2, r3", "adds r1, r2, #7", "adds r1, #200", "subs r1, r2, r3", "subs r1, r2, #7", "subs r1, #200",
    "movs r1, #255", "movs r1, r2", "mov r8, r1", "mov r1, sp",
    "cmp r1, #10", "cmp r1, r2", "cmp r8, r1", "cmn r1, r2", "tst r1, r2",
    "add r1, r9", "add r1, sp, #16", "add sp, sp, #16", "add sp, #16", "add r1, pc, #8",
    "sub sp, sp, #16", "sub sp, #8",
    "ands r1, r2", "eors r1, r2", "adcs r1, r2", "sbcs r1, r2", "rors r1, r2", "orrs r1, r2", "bics r1, r2",
    "mvns r1, r2", "muls r1, r2", "rsbs r1, r2, #0", "negs r1, r2",
    "bx lr", "blx r3",
    "ldr r1, [r2, #4]", "ldr r1, [r2, r3]", "ldr r1, [sp, #8]", "ldr r1, [pc, #4]", "ldr r1, tgt",
    "ldr r1, =0x12345678",
    "str r1, [r2, #4]", "str r1, [r2, r3]", "str r1, [sp, #4]",
    "ldrb r1, [r2, #1]", "ldrb r1, [r2, r3]", "strb r1, [r2, #1]", "strb r1, [r2, r3]",
    "ldrh r1, [r2, #2]", "ldrh r1, [r2, r3]", "strh r1, [r2, #2]", "strh r1, [r2, r3]",
    "ldrsb r1, [r2, r3]", "ldrsh r1, [r2, r3]",
    "adr r1, tgt",
    "sxth r1, r2", "sxtb r1, r2", "uxth r1, r2", "uxtb r1, r2", "rev r1, r2", "rev16 r1, r2", "revsh r1, r2",
    "push {r0, r4-r6, lr}", "pop {r0, pc}",
    "stmia r0!, {r1, r2}", "stm r0!, {r1}", "stmea r0!, {r1, r2}",
    "ldmia r0!, {r1, r2}", "ldm r0, {r0, r1}", "ldmfd r3!, {r1}",
    "cpsid i", "cpsie i", "bkpt #3", "nop", "yield", "wfe", "wfi", "sev",
    "b tgt", "beq tgt", "bal tgt", "bl tgt",
];

/// First instruction of `line` placed at `main`, with a word-aligned `tgt`
/// shortly after it.
fn first_instr(line: &str) -> (Vec<u8>, thumb_rs::Program) {
    let p = assemble(&format!("{HEAD}main:\n    {line}\n    nop\n    .align 4\ntgt:\n    .word 0\n")).unwrap();
    let bytes = p.segments.iter().find(|s| s.kind == SegmentKind::Code).unwrap().bytes.clone();
    (bytes, p)
}

#[test]
fn every_form_survives_disassembly() {
    let dec = ThumbDecoder::new();
    for line in FORMS {
        let (bytes, p) = first_instr(line);
        let raw = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let d = dec.decode(if dec.is_wide(raw as u16) { raw } else { raw & 0xFFFF });
        let mnemonic = line.split_whitespace().next().unwrap();
        let desc = instructions::lookup(mnemonic).unwrap();
        assert_eq!(d.width, desc.width, "{line}");

        let text = fmt_decoded(&d, ROM, Some(&p.labels));
        let (again, _) = first_instr(&text);
        let w = d.width as usize;
        assert_eq!(&again[..w], &bytes[..w], "{line} -> {text}");
    }
}

#[test]
fn forms_cover_the_mnemonic_table() {
    for desc in TABLE {
        let covered = FORMS.iter().any(|line| {
            let m = line.split_whitespace().next().unwrap();
            instructions::lookup(m).map(|d| d.mnemonic) == Some(desc.mnemonic)
        });
        assert!(covered, "no form for {}", desc.mnemonic);
    }
}

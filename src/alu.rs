//! Arithmetic and shifter primitives shared by every flag-setting instruction.

/// `x + y + carry_in` as in the ARM ARM: returns (result, carry_out, overflow).
pub fn add_with_carry(x: u32, y: u32, carry_in: bool) -> (u32, bool, bool) {
    let wide = x as u64 + y as u64 + carry_in as u64;
    let result = wide as u32;
    let carry = wide > u32::MAX as u64;
    // operands agree in sign, result does not
    let overflow = ((x ^ result) & (y ^ result)) & 0x8000_0000 != 0;
    (result, carry, overflow)
}

/// `x - y` expressed through [`add_with_carry`]; carry set means "no borrow".
pub fn sub_with_carry(x: u32, y: u32, carry_in: bool) -> (u32, bool, bool) {
    add_with_carry(x, !y, carry_in)
}

pub fn lsl_c(value: u32, amount: u32, carry_in: bool) -> (u32, bool) {
    match amount {
        0 => (value, carry_in),
        1..=31 => (value << amount, (value >> (32 - amount)) & 1 != 0),
        32 => (0, value & 1 != 0),
        _ => (0, false),
    }
}

pub fn lsr_c(value: u32, amount: u32, carry_in: bool) -> (u32, bool) {
    match amount {
        0 => (value, carry_in),
        1..=31 => (value >> amount, (value >> (amount - 1)) & 1 != 0),
        32 => (0, value & 0x8000_0000 != 0),
        _ => (0, false),
    }
}

pub fn asr_c(value: u32, amount: u32, carry_in: bool) -> (u32, bool) {
    match amount {
        0 => (value, carry_in),
        1..=31 => (
            ((value as i32) >> amount) as u32,
            (value >> (amount - 1)) & 1 != 0,
        ),
        _ => {
            let negative = value & 0x8000_0000 != 0;
            (if negative { u32::MAX } else { 0 }, negative)
        }
    }
}

pub fn ror_c(value: u32, amount: u32, carry_in: bool) -> (u32, bool) {
    if amount == 0 {
        return (value, carry_in);
    }
    let result = value.rotate_right(amount & 0x1F);
    (result, result & 0x8000_0000 != 0)
}

pub fn sign_extend(value: u32, bits: u32) -> u32 {
    let shift = 32 - bits;
    (((value << shift) as i32) >> shift) as u32
}

pub fn align_down(value: u32, align: u32) -> u32 {
    value & !(align - 1)
}

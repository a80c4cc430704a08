//! Byte-level encoding and decoding of operands and instructions.
//!
//! Decoding pulls bytes one at a time from a [`ByteSource`] so the same code
//! serves the disassembler (reading a slice) and the executor (reading the
//! address space at IP, advancing it past every consumed byte).

use crate::asm::{
    ratio_from_bcd, ratio_to_bcd, validate_register, Instruction, MemArg, Opcode, Operand, Width,
    WidthRule, CONSTANT_PREFIX, MEMORY_PREFIX, REGISTER_PREFIX,
};
use crate::error::IllegalInstruction;

pub trait ByteSource {
    fn next(&mut self) -> Result<u8, IllegalInstruction>;

    fn next_u64(&mut self) -> Result<u64, IllegalInstruction> {
        let mut bytes = [0u8; 8];
        for byte in &mut bytes {
            *byte = self.next()?;
        }
        Ok(u64::from_le_bytes(bytes))
    }
}

pub struct SliceReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> SliceReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        SliceReader { buf, pos: 0 }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }
}

impl ByteSource for SliceReader<'_> {
    fn next(&mut self) -> Result<u8, IllegalInstruction> {
        let byte = *self.buf.get(self.pos).ok_or(IllegalInstruction::Truncated)?;
        self.pos += 1;
        Ok(byte)
    }
}

////////////////////////////////////////////////////////////////////////////////
// Decode
////////////////////////////////////////////////////////////////////////////////

fn decode_register(src: &mut impl ByteSource) -> Result<(Width, u8), IllegalInstruction> {
    let width = Width::from_byte(src.next()?)?;
    let index = src.next()?;
    validate_register(width, index)?;
    Ok((width, index))
}

fn decode_constant(src: &mut impl ByteSource) -> Result<(bool, u64), IllegalInstruction> {
    let signed = src.next()? != 0x00;
    let value = src.next_u64()?;
    Ok((signed, value))
}

fn decode_mem_arg(src: &mut impl ByteSource) -> Result<MemArg, IllegalInstruction> {
    match src.next()? {
        REGISTER_PREFIX => {
            let (width, index) = decode_register(src)?;
            if width != Width::W64 {
                return Err(IllegalInstruction::BadMemArg);
            }
            Ok(MemArg::Register(index))
        }
        CONSTANT_PREFIX => {
            let (signed, value) = decode_constant(src)?;
            Ok(MemArg::Constant { signed, value })
        }
        _ => Err(IllegalInstruction::BadMemArg),
    }
}

pub fn decode_operand(src: &mut impl ByteSource) -> Result<Operand, IllegalInstruction> {
    match src.next()? {
        REGISTER_PREFIX => {
            let (width, index) = decode_register(src)?;
            Ok(Operand::Register { width, index })
        }
        CONSTANT_PREFIX => {
            let (signed, value) = decode_constant(src)?;
            Ok(Operand::Constant { signed, value })
        }
        MEMORY_PREFIX => {
            let ratio = ratio_from_bcd(src.next()?)?;
            let base = decode_mem_arg(src)?;
            let off1 = decode_mem_arg(src)?;
            let off2 = decode_mem_arg(src)?;
            Ok(Operand::Memory { ratio, base, off1, off2 })
        }
        other => Err(IllegalInstruction::BadPrefix(other)),
    }
}

fn decode_width(opcode: Opcode, byte: u8) -> Result<Option<Width>, IllegalInstruction> {
    let mismatch = || IllegalInstruction::WidthMismatch { mnemonic: opcode.mnemonic(), width: byte };
    match opcode.width_rule() {
        WidthRule::Integer => {
            let width = Width::from_byte(byte)?;
            if width == Width::Float {
                return Err(mismatch());
            }
            Ok(Some(width))
        }
        WidthRule::Fixed64 => {
            if byte != Width::W64 as u8 {
                return Err(mismatch());
            }
            Ok(Some(Width::W64))
        }
        WidthRule::Float => {
            if byte != Width::Float as u8 {
                return Err(mismatch());
            }
            Ok(Some(Width::Float))
        }
        WidthRule::NoWidth => {
            if byte != 0x00 {
                return Err(mismatch());
            }
            Ok(None)
        }
    }
}

pub fn decode_instruction(src: &mut impl ByteSource) -> Result<Instruction, IllegalInstruction> {
    let opcode = Opcode::from_byte(src.next()?)?;
    let width = decode_width(opcode, src.next()?)?;

    let mut operands = Vec::with_capacity(opcode.arity());
    for _ in 0..opcode.arity() {
        operands.push(decode_operand(src)?);
    }

    let literal = Instruction::render_literal(opcode, width, &operands);
    Ok(Instruction { opcode, width, operands, literal })
}

////////////////////////////////////////////////////////////////////////////////
// Encode
////////////////////////////////////////////////////////////////////////////////

fn encode_mem_arg(buf: &mut Vec<u8>, arg: &MemArg) -> Result<(), IllegalInstruction> {
    match *arg {
        MemArg::Register(index) => {
            validate_register(Width::W64, index)?;
            buf.extend_from_slice(&[REGISTER_PREFIX, Width::W64 as u8, index]);
        }
        MemArg::Constant { signed, value } => {
            buf.extend_from_slice(&[CONSTANT_PREFIX, signed as u8]);
            buf.extend_from_slice(&value.to_le_bytes());
        }
    }
    Ok(())
}

pub fn encode_operand(buf: &mut Vec<u8>, operand: &Operand) -> Result<(), IllegalInstruction> {
    match *operand {
        Operand::Register { width, index } => {
            validate_register(width, index)?;
            buf.extend_from_slice(&[REGISTER_PREFIX, width as u8, index]);
        }
        Operand::Constant { signed, value } => {
            buf.extend_from_slice(&[CONSTANT_PREFIX, signed as u8]);
            buf.extend_from_slice(&value.to_le_bytes());
        }
        Operand::Memory { ratio, ref base, ref off1, ref off2 } => {
            let bcd = ratio_to_bcd(ratio).ok_or(IllegalInstruction::BadRatio(ratio))?;
            buf.extend_from_slice(&[MEMORY_PREFIX, bcd]);
            encode_mem_arg(buf, base)?;
            encode_mem_arg(buf, off1)?;
            encode_mem_arg(buf, off2)?;
        }
    }
    Ok(())
}

pub fn encode_instruction(
    buf: &mut Vec<u8>,
    opcode: Opcode,
    width: Option<Width>,
    operands: &[Operand],
) -> Result<(), IllegalInstruction> {
    if operands.len() != opcode.arity() {
        return Err(IllegalInstruction::BadArity {
            mnemonic: opcode.mnemonic(),
            got: operands.len(),
        });
    }

    let width_byte = match opcode.implied_width_byte() {
        Some(byte) => byte,
        None => match width {
            Some(w) if w != Width::Float => w as u8,
            _ => {
                return Err(IllegalInstruction::WidthMismatch {
                    mnemonic: opcode.mnemonic(),
                    width: width.map_or(0x00, |w| w as u8),
                })
            }
        },
    };

    buf.push(opcode as u8);
    buf.push(width_byte);
    for operand in operands {
        encode_operand(buf, operand)?;
    }
    Ok(())
}

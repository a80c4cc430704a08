use common::asm::{Instruction, Opcode, Operand, Width, WidthRule};
use common::codec::encode_instruction;
use common::error::{IllegalInstruction, TargetExpressionError};

use log::trace;
use thiserror::Error;

use crate::lex::{lex_line, Token};
use crate::target::parse_target;

#[derive(Debug)]
pub struct Program {
    pub text: Vec<u8>,
    pub origin: u64,
}

#[derive(Debug, Error)]
#[error("line {line}: {kind}")]
pub struct AsmError {
    pub line: usize,
    pub kind: AsmErrorKind,
}

#[derive(Debug, Error)]
pub enum AsmErrorKind {
    #[error("unrecognized token")]
    Lex,

    #[error("unknown mnemonic \"{0}\"")]
    UnknownMnemonic(String),

    #[error("unknown directive .{0}")]
    UnknownDirective(String),

    #[error(transparent)]
    Target(#[from] TargetExpressionError),

    #[error(transparent)]
    Encode(#[from] IllegalInstruction),

    #[error("expected {expected} operand(s), found {found}")]
    Arity { expected: usize, found: usize },

    #[error("{0} requires a .8bit/.16bit/.32bit/.64bit suffix")]
    WidthRequired(&'static str),

    #[error("{0} does not take a width suffix")]
    WidthForbidden(&'static str),

    #[error("bad width suffix .{0}")]
    BadWidthSuffix(String),

    #[error(".org may not move backwards")]
    OrgBackwards,

    #[error("directive argument must be a number")]
    ExpectedNumber,

    #[error(".byte value {0:#x} does not fit in a byte")]
    ByteRange(u64),

    #[error("unexpected trailing tokens")]
    Trailing,
}

/// Assemble a source text with origin 0.
pub fn assemble(src: &str) -> Result<Vec<u8>, AsmError> {
    assemble_at(src, 0).map(|prog| prog.text)
}

/// Assemble a source text whose first byte will be loaded at `origin`.
/// `.org` pads with zeros relative to it.
pub fn assemble_at(src: &str, origin: u64) -> Result<Program, AsmError> {
    let mut asm = Assembler { buf: Vec::new(), origin };
    for (idx, line) in src.lines().enumerate() {
        let line_no = idx + 1;
        asm.line(line).map_err(|kind| AsmError { line: line_no, kind })?;
    }
    Ok(Program { text: asm.buf, origin })
}

struct Assembler {
    buf: Vec<u8>,
    origin: u64,
}

impl Assembler {
    fn line(&mut self, line: &str) -> Result<(), AsmErrorKind> {
        let tokens = lex_line(line).map_err(|_| AsmErrorKind::Lex)?;
        let Some((head, rest)) = tokens.split_first() else {
            return Ok(());
        };

        match head {
            Token::Ident(name) => self.instruction(name, rest),
            Token::Directive(name) => self.directive(name, rest),
            _ => Err(AsmErrorKind::Trailing),
        }
    }

    fn directive(&mut self, name: &str, args: &[Token]) -> Result<(), AsmErrorKind> {
        match name {
            "org" => {
                let [Token::Number(addr)] = args else {
                    return Err(AsmErrorKind::ExpectedNumber);
                };
                let off = addr.checked_sub(self.origin).ok_or(AsmErrorKind::OrgBackwards)?;
                if (off as usize) < self.buf.len() {
                    return Err(AsmErrorKind::OrgBackwards);
                }
                self.buf.resize(off as usize, 0);
                Ok(())
            }
            "byte" => {
                let mut want_number = true;
                for tok in args {
                    match (want_number, tok) {
                        (true, Token::Number(val)) => {
                            let byte =
                                u8::try_from(*val).map_err(|_| AsmErrorKind::ByteRange(*val))?;
                            self.buf.push(byte);
                            want_number = false;
                        }
                        (false, Token::Comma) => want_number = true,
                        _ => return Err(AsmErrorKind::ExpectedNumber),
                    }
                }
                if want_number {
                    return Err(AsmErrorKind::ExpectedNumber);
                }
                Ok(())
            }
            other => Err(AsmErrorKind::UnknownDirective(other.to_string())),
        }
    }

    fn instruction(&mut self, name: &str, rest: &[Token]) -> Result<(), AsmErrorKind> {
        let opcode = Opcode::from_mnemonic(&name.to_lowercase())
            .ok_or_else(|| AsmErrorKind::UnknownMnemonic(name.to_string()))?;

        let (suffix, rest) = match rest.split_first() {
            Some((Token::WidthSuffix(s), rest)) => (Some(s.as_str()), rest),
            _ => (None, rest),
        };

        let width = match (opcode.width_rule(), suffix) {
            (WidthRule::Integer, Some(s)) => {
                let bits: u32 = s
                    .strip_suffix("bit")
                    .and_then(|b| b.parse().ok())
                    .ok_or_else(|| AsmErrorKind::BadWidthSuffix(s.to_string()))?;
                let width = Width::from_bits(bits)
                    .ok_or_else(|| AsmErrorKind::BadWidthSuffix(s.to_string()))?;
                Some(width)
            }
            (WidthRule::Integer, None) => return Err(AsmErrorKind::WidthRequired(opcode.mnemonic())),
            (_, Some(_)) => return Err(AsmErrorKind::WidthForbidden(opcode.mnemonic())),
            (WidthRule::Fixed64, None) => Some(Width::W64),
            (WidthRule::Float, None) => Some(Width::Float),
            (WidthRule::NoWidth, None) => None,
        };

        // Memory operands inherit the instruction's access width.
        let access = width.unwrap_or(Width::W64);
        let mut operands: Vec<Operand> = Vec::new();
        let mut want_target = true;
        for tok in rest {
            match (want_target, tok) {
                (true, Token::Target(text)) => {
                    operands.push(parse_target(text, access)?);
                    want_target = false;
                }
                (false, Token::Comma) => want_target = true,
                _ => return Err(AsmErrorKind::Trailing),
            }
        }
        if want_target && !operands.is_empty() {
            return Err(AsmErrorKind::Trailing);
        }

        if operands.len() != opcode.arity() {
            return Err(AsmErrorKind::Arity { expected: opcode.arity(), found: operands.len() });
        }

        encode_instruction(&mut self.buf, opcode, width, &operands)?;

        trace!(
            "assembled {}",
            Instruction::render_literal(opcode, width, &operands)
        );
        Ok(())
    }
}

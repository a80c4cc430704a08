//! The textual target grammar: `%REG`, `$(expr)`, `*r&N(base, off1, off2)`.

use common::asm::{register_by_name, MemArg, Operand, Width};
use common::error::TargetExpressionError;

use crate::expr;

fn err(text: &str) -> TargetExpressionError {
    TargetExpressionError(text.to_string())
}

fn parse_register(text: &str) -> Result<(Width, u8), TargetExpressionError> {
    let name = text.strip_prefix('%').ok_or_else(|| err(text))?;
    register_by_name(&name.to_uppercase()).ok_or_else(|| err(text))
}

fn parse_constant(text: &str) -> Result<(bool, u64), TargetExpressionError> {
    let inner = text
        .strip_prefix("$(")
        .and_then(|rest| rest.strip_suffix(')'))
        .ok_or_else(|| err(text))?;
    expr::eval(inner)
}

fn parse_mem_arg(text: &str) -> Result<MemArg, TargetExpressionError> {
    if text.starts_with('%') {
        let (width, index) = parse_register(text)?;
        // Only the 64-bit bank may address memory.
        if width != Width::W64 {
            return Err(TargetExpressionError(format!("not a 64-bit register: {text}")));
        }
        Ok(MemArg::Register(index))
    } else if text.starts_with("$(") {
        let (signed, value) = parse_constant(text)?;
        Ok(MemArg::Constant { signed, value })
    } else {
        Err(err(text))
    }
}

/// Split `base, off1, off2` on commas that are not nested in parentheses.
fn split_args(inner: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (i, c) in inner.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&inner[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&inner[start..]);
    parts
}

fn parse_memory(text: &str, access: Width) -> Result<Operand, TargetExpressionError> {
    let rest = text.strip_prefix('*').ok_or_else(|| err(text))?;

    let head_len = rest.find(['&', '(']).ok_or_else(|| err(text))?;
    let ratio: u8 = rest[..head_len].parse().map_err(|_| err(text))?;
    if !matches!(ratio, 1 | 2 | 4 | 8 | 16) {
        return Err(err(text));
    }

    let mut rest = &rest[head_len..];
    if let Some(suffix) = rest.strip_prefix('&') {
        let paren = suffix.find('(').ok_or_else(|| err(text))?;
        let bits: u32 = suffix[..paren].parse().map_err(|_| err(text))?;
        if bits != access.bits() {
            return Err(TargetExpressionError(format!(
                "access width &{bits} does not match instruction width {}",
                access.bits()
            )));
        }
        rest = &suffix[paren..];
    }

    let inner = rest
        .strip_prefix('(')
        .and_then(|r| r.strip_suffix(')'))
        .ok_or_else(|| err(text))?;

    let args = split_args(inner);
    let [base, off1, off2]: [&str; 3] = args.try_into().map_err(|_| err(text))?;

    Ok(Operand::Memory {
        ratio,
        base: parse_mem_arg(base)?,
        off1: parse_mem_arg(off1)?,
        off2: parse_mem_arg(off2)?,
    })
}

/// Parse one textual target. `access` is the width of the enclosing
/// instruction, used to validate a memory operand's `&N` suffix.
pub fn parse_target(text: &str, access: Width) -> Result<Operand, TargetExpressionError> {
    let stripped: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    if stripped.starts_with('%') {
        let (width, index) = parse_register(&stripped)?;
        Ok(Operand::Register { width, index })
    } else if stripped.starts_with("$(") {
        let (signed, value) = parse_constant(&stripped)?;
        Ok(Operand::Constant { signed, value })
    } else if stripped.starts_with('*') {
        parse_memory(&stripped, access)
    } else {
        Err(err(text))
    }
}

use thiserror::Error;

/// Raised when the instruction stream cannot be decoded, or when an
/// instruction asks for something the operand model forbids. The executor
/// converts this into a software interrupt rather than propagating it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IllegalInstruction {
    #[error("unknown operand prefix {0:#04x}")]
    BadPrefix(u8),

    #[error("unknown width byte {0:#04x}")]
    BadWidth(u8),

    #[error("unknown opcode byte {0:#04x}")]
    BadOpcode(u8),

    #[error("unknown memory ratio {0:#04x}")]
    BadRatio(u8),

    #[error("register index {index} invalid for width {width:#04x}")]
    BadRegister { width: u8, index: u8 },

    #[error("memory sub-operand must be a 64-bit register or a constant")]
    BadMemArg,

    #[error("width byte {width:#04x} not permitted for {mnemonic}")]
    WidthMismatch { mnemonic: &'static str, width: u8 },

    #[error("{got} operand(s) wrong for {mnemonic}")]
    BadArity { mnemonic: &'static str, got: usize },

    #[error("write to a constant operand")]
    ConstantWrite,

    #[error("instruction stream exhausted")]
    Truncated,
}

/// An access outside the bounds of the address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("memory fault: {len} byte(s) at {addr:#x}")]
pub struct MemoryFault {
    pub addr: u64,
    pub len: u64,
}

/// An interrupt number outside the vector table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("interrupt number {0} out of range")]
pub struct InterruptTableError(pub u64);

/// A textual operand that matches no branch of the target grammar, or that
/// violates a sub-operand constraint.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot parse target expression: {0}")]
pub struct TargetExpressionError(pub String);

/// A shared object that could not be opened, or whose init hook failed.
#[derive(Debug, Error)]
#[error("cannot load library: {0}")]
pub struct LibraryLoadError(pub String);

/// A module entry point that is missing or has the wrong shape.
#[derive(Debug, Error)]
#[error("cannot resolve function: {0}")]
pub struct ModuleResolutionError(pub String);

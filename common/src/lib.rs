pub mod asm;
pub mod codec;
pub mod constants;
pub mod error;

pub use asm::{Instruction, MemArg, Opcode, Operand, Width};
pub use codec::{decode_instruction, encode_instruction, SliceReader};
pub use error::{IllegalInstruction, InterruptTableError, MemoryFault, TargetExpressionError};

pub mod assembler;
pub mod expr;
pub mod lex;
pub mod target;

pub use assembler::{assemble, assemble_at, AsmError, AsmErrorKind, Program};
pub use target::parse_target;

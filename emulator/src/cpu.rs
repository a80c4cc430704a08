//! The fetch/decode/execute loop.
//!
//! Faults raised while decoding or executing a single instruction are not
//! propagated: they re-enter the machine as a software interrupt, and only
//! surface to the caller when the vector's handler is the default (zeroed)
//! entry.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use common::asm::{Flag, Instruction, MemArg, Opcode, Operand, Width, REG_SB, REG_SP};
use common::codec::{decode_instruction, ByteSource};
use common::constants::{INT_DIVISION_ERROR, INT_ILLEGAL_INSTRUCTION, IVT_ENTRIES};
use common::error::{IllegalInstruction, InterruptTableError, MemoryFault};

use log::{debug, error, trace};
use thiserror::Error;

use crate::alu;
use crate::bus::Bus;
use crate::interrupt::InterruptTable;
use crate::registers::{Flags, RegisterFile, BANK_BYTES};

/// Why `run` returned.
#[derive(Debug)]
pub enum RunExit {
    /// An explicit HLT, or a software interrupt into a default handler.
    Halted,
    /// The external stop signal was raised.
    Stopped,
    /// A fault reached a default handler; the machine is halted.
    Fault(FaultInfo),
}

/// The summary surfaced when a fault escapes to the top level.
#[derive(Debug, Clone)]
pub struct FaultInfo {
    pub ip: u64,
    pub opcode: Option<u8>,
    pub vector: u64,
    pub trace: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    Halt,
    /// Dispatch reached a zeroed handler entry for this vector.
    DefaultHandler(u64),
}

#[derive(Debug, Error)]
pub enum Fault {
    #[error(transparent)]
    Illegal(#[from] IllegalInstruction),
    #[error(transparent)]
    Memory(#[from] MemoryFault),
    #[error(transparent)]
    Table(#[from] InterruptTableError),
    #[error("division error")]
    Divide,
}

impl Fault {
    fn vector(&self) -> u64 {
        match self {
            Fault::Divide => INT_DIVISION_ERROR,
            _ => INT_ILLEGAL_INSTRUCTION,
        }
    }
}

/// Where a decoded operand lands after effective-address computation.
#[derive(Debug, Clone, Copy)]
enum Resolved {
    Reg { width: Width, index: u8 },
    Imm(u64),
    Mem { addr: u64, width: Width },
}

/// Pulls instruction bytes through the bus, tracking the advancing IP.
struct Fetcher<'a> {
    bus: &'a Bus,
    ip: u64,
}

impl ByteSource for Fetcher<'_> {
    fn next(&mut self) -> Result<u8, IllegalInstruction> {
        let byte = self
            .bus
            .read_u8(self.ip)
            .map_err(|_| IllegalInstruction::Truncated)?;
        self.ip += 1;
        Ok(byte)
    }
}

pub struct Cpu {
    bus: Arc<Bus>,
    regs: Arc<RegisterFile>,
    ivt: Arc<InterruptTable>,
    stop: Arc<AtomicBool>,
    fault: Option<FaultInfo>,
}

impl Cpu {
    pub fn new(
        bus: Arc<Bus>,
        regs: Arc<RegisterFile>,
        ivt: Arc<InterruptTable>,
        stop: Arc<AtomicBool>,
    ) -> Cpu {
        Cpu { bus, regs, ivt, stop, fault: None }
    }

    /// Run until a halt condition.
    pub fn run(&mut self) -> RunExit {
        loop {
            if self.stop.load(Ordering::Acquire) {
                return RunExit::Stopped;
            }
            match self.step() {
                Ok(Step::Continue) => {}
                Ok(Step::Halt) => return RunExit::Halted,
                Ok(Step::DefaultHandler(vector)) => {
                    debug!("default handler for vector {vector:#x}; halting");
                    return match self.fault.take() {
                        Some(info) => RunExit::Fault(info),
                        None => RunExit::Halted,
                    };
                }
                Err(fault) => {
                    // A fault while delivering a fault: nothing left to try.
                    error!("double fault: {fault}");
                    let info = self.fault.take().unwrap_or(FaultInfo {
                        ip: self.regs.ip(),
                        opcode: None,
                        vector: fault.vector(),
                        trace: fault.to_string(),
                    });
                    return RunExit::Fault(info);
                }
            }
        }
    }

    /// Execute a single instruction, including any fault-to-interrupt
    /// conversion it triggers.
    pub fn step(&mut self) -> Result<Step, Fault> {
        let ip = self.regs.ip();
        let mut fetcher = Fetcher { bus: &self.bus, ip };

        match decode_instruction(&mut fetcher) {
            Ok(ins) => {
                self.regs.set_ip(fetcher.ip);
                trace!("{ip:#07x}: {}", ins.literal);
                match self.exec(&ins) {
                    Ok(step) => Ok(step),
                    Err(fault) => {
                        self.deliver_fault(fault, ip, Some(ins.opcode as u8), ins.literal)
                    }
                }
            }
            Err(e) => {
                let opcode = self.bus.read_u8(ip).ok();
                self.regs.set_ip(fetcher.ip);
                let trace = e.to_string();
                self.deliver_fault(Fault::Illegal(e), ip, opcode, trace)
            }
        }
    }

    fn deliver_fault(
        &mut self,
        fault: Fault,
        ip: u64,
        opcode: Option<u8>,
        trace: String,
    ) -> Result<Step, Fault> {
        let vector = fault.vector();
        debug!("fault at {ip:#07x} ({fault}); raising vector {vector:#x}");
        let step = self.dispatch_interrupt(vector)?;
        if matches!(step, Step::DefaultHandler(_)) {
            self.fault = Some(FaultInfo { ip, opcode, vector, trace });
        }
        Ok(step)
    }

    /// Software-interrupt entry. The slot holds an address from which the
    /// real handler pointer is loaded; a zero pointer is the default
    /// handler, which halts.
    fn dispatch_interrupt(&mut self, n: u64) -> Result<Step, Fault> {
        let slot = match self.ivt.entry(n) {
            Ok(slot) => slot,
            Err(_) => self
                .ivt
                .entry(INT_ILLEGAL_INSTRUCTION)
                .expect("fixed vector is in range"),
        };
        let handler = self.bus.read_u64(slot)?;
        if handler == 0 {
            return Ok(Step::DefaultHandler(n));
        }

        self.push_u64(self.regs.ip())?;
        self.push_u64(self.regs.flags().bits())?;
        self.push_bank()?;
        self.regs.set_ip(handler);
        self.regs.clear_flag(Flag::Interrupt);
        Ok(Step::Continue)
    }

    fn exec_iret(&mut self) -> Result<(), Fault> {
        self.pop_bank()?;
        let flags = self.pop_u64()?;
        let ip = self.pop_u64()?;
        self.regs.set_flags(Flags::from_bits(flags));
        self.regs.set_ip(ip);
        Ok(())
    }

    ///////////////////////////////////////////////////////////////////////////
    // Operand access
    ///////////////////////////////////////////////////////////////////////////

    fn mem_arg(&self, arg: MemArg) -> Result<u64, Fault> {
        match arg {
            MemArg::Register(index) => Ok(self.regs.get(Width::W64, index)?),
            MemArg::Constant { value, .. } => Ok(value),
        }
    }

    fn resolve(&self, operand: &Operand, access: Width) -> Result<Resolved, Fault> {
        match *operand {
            Operand::Register { width, index } => Ok(Resolved::Reg { width, index }),
            Operand::Constant { value, .. } => Ok(Resolved::Imm(value)),
            Operand::Memory { ratio, base, off1, off2 } => {
                let base = self.mem_arg(base)?;
                let off1 = self.mem_arg(off1)?;
                let off2 = self.mem_arg(off2)?;
                let addr = base
                    .wrapping_add(off1)
                    .wrapping_add(off2)
                    .wrapping_mul(ratio as u64);
                Ok(Resolved::Mem { addr, width: access })
            }
        }
    }

    fn read_value(&self, res: Resolved) -> Result<u64, Fault> {
        match res {
            Resolved::Reg { width, index } => Ok(self.regs.get(width, index)?),
            Resolved::Imm(value) => Ok(value),
            Resolved::Mem { addr, width } => {
                let bytes = self.bus.read(addr, width.bytes())?;
                let mut out = [0u8; 8];
                out[..bytes.len()].copy_from_slice(&bytes);
                Ok(u64::from_le_bytes(out))
            }
        }
    }

    fn write_value(&self, res: Resolved, value: u64) -> Result<(), Fault> {
        match res {
            Resolved::Reg { width, index } => Ok(self.regs.set(width, index, value)?),
            Resolved::Imm(_) => Err(IllegalInstruction::ConstantWrite.into()),
            Resolved::Mem { addr, width } => {
                Ok(self.bus.write(addr, &value.to_le_bytes()[..width.bytes() as usize])?)
            }
        }
    }

    /// Constant destinations must fail before any state is touched.
    fn check_writable(res: Resolved) -> Result<(), Fault> {
        match res {
            Resolved::Imm(_) => Err(IllegalInstruction::ConstantWrite.into()),
            _ => Ok(()),
        }
    }

    ///////////////////////////////////////////////////////////////////////////
    // Stack
    ///////////////////////////////////////////////////////////////////////////

    fn sp(&self) -> u64 {
        self.regs.get(Width::W64, REG_SP).expect("SP is always valid")
    }

    fn set_sp(&self, sp: u64) {
        self.regs.set(Width::W64, REG_SP, sp).expect("SP is always valid")
    }

    fn push_sized(&self, value: u64, width: Width) -> Result<(), Fault> {
        let sp = self.sp().wrapping_sub(width.bytes());
        self.bus.write(sp, &value.to_le_bytes()[..width.bytes() as usize])?;
        self.set_sp(sp);
        Ok(())
    }

    fn pop_sized(&self, width: Width) -> Result<u64, Fault> {
        let sp = self.sp();
        let bytes = self.bus.read(sp, width.bytes())?;
        let mut out = [0u8; 8];
        out[..bytes.len()].copy_from_slice(&bytes);
        self.set_sp(sp.wrapping_add(width.bytes()));
        Ok(u64::from_le_bytes(out))
    }

    fn push_u64(&self, value: u64) -> Result<(), Fault> {
        self.push_sized(value, Width::W64)
    }

    fn pop_u64(&self) -> Result<u64, Fault> {
        self.pop_sized(Width::W64)
    }

    fn push_bank(&self) -> Result<(), Fault> {
        let sp = self.sp().wrapping_sub(BANK_BYTES as u64);
        self.bus.write(sp, &self.regs.save_bank())?;
        self.set_sp(sp);
        Ok(())
    }

    fn pop_bank(&self) -> Result<(), Fault> {
        let sp = self.sp();
        let bytes = self.bus.read(sp, BANK_BYTES as u64)?;
        self.regs.restore_bank(&bytes.try_into().expect("bank block size"));
        self.set_sp(sp.wrapping_add(BANK_BYTES as u64));
        Ok(())
    }

    ///////////////////////////////////////////////////////////////////////////
    // Execute
    ///////////////////////////////////////////////////////////////////////////

    fn exec(&mut self, ins: &Instruction) -> Result<Step, Fault> {
        use Opcode::*;

        match ins.opcode {
            Nop => {}

            Add => self.alu2(ins, true, |a, b, w, fl| alu::add(a, b, false, w, fl))?,
            Adc => self.alu2(ins, true, |a, b, w, fl| {
                let carry = fl.get(Flag::Carry);
                alu::add(a, b, carry, w, fl)
            })?,
            Sub => self.alu2(ins, true, |a, b, w, fl| alu::sub(a, b, false, w, fl))?,
            Sbb => self.alu2(ins, true, |a, b, w, fl| {
                let carry = fl.get(Flag::Carry);
                alu::sub(a, b, carry, w, fl)
            })?,
            Cmp => self.alu2(ins, false, |a, b, w, fl| alu::sub(a, b, false, w, fl))?,
            And => self.alu2(ins, true, |a, b, w, fl| alu::bitwise(a, b, |x, y| x & y, w, fl))?,
            Or => self.alu2(ins, true, |a, b, w, fl| alu::bitwise(a, b, |x, y| x | y, w, fl))?,
            Xor => self.alu2(ins, true, |a, b, w, fl| alu::bitwise(a, b, |x, y| x ^ y, w, fl))?,
            Shl => self.alu2(ins, true, |a, b, w, fl| alu::shl(a, b, w, fl))?,
            Shr => self.alu2(ins, true, |a, b, w, fl| alu::shr(a, b, w, fl))?,
            Rol => self.alu2(ins, true, |a, b, w, fl| alu::rol(a, b, w, fl))?,
            Ror => self.alu2(ins, true, |a, b, w, fl| alu::ror(a, b, w, fl))?,
            Rcl => self.alu2(ins, true, |a, b, w, fl| {
                let carry = fl.get(Flag::Carry);
                alu::rcl(a, b, carry, w, fl)
            })?,
            Rcr => self.alu2(ins, true, |a, b, w, fl| {
                let carry = fl.get(Flag::Carry);
                alu::rcr(a, b, carry, w, fl)
            })?,

            Neg => self.alu1(ins, |v, w, fl| alu::neg(v, w, fl))?,
            Not => self.alu1(ins, |v, w, _| alu::not(v, w))?,

            Mul => self.exec_mul(ins, false)?,
            Imul => self.exec_mul(ins, true)?,
            Div => self.exec_div(ins, false)?,
            Idiv => self.exec_div(ins, true)?,

            Mov => {
                let w = self.width_of(ins);
                let dst = self.resolve(&ins.operands[0], w)?;
                Self::check_writable(dst)?;
                let val = self.read_value(self.resolve(&ins.operands[1], w)?)?;
                self.write_value(dst, val)?;
            }
            Xchg => {
                let w = self.width_of(ins);
                let a = self.resolve(&ins.operands[0], w)?;
                let b = self.resolve(&ins.operands[1], w)?;
                Self::check_writable(a)?;
                Self::check_writable(b)?;
                let va = self.read_value(a)?;
                let vb = self.read_value(b)?;
                self.write_value(a, vb)?;
                self.write_value(b, va)?;
            }

            Push => {
                let w = self.width_of(ins);
                let val = self.read_value(self.resolve(&ins.operands[0], w)?)?;
                self.push_sized(val, w)?;
            }
            Pop => {
                let w = self.width_of(ins);
                let dst = self.resolve(&ins.operands[0], w)?;
                Self::check_writable(dst)?;
                let val = self.pop_sized(w)?;
                self.write_value(dst, val)?;
            }
            Pushall => self.push_bank()?,
            Popall => self.pop_bank()?,

            Enter => {
                let w = self.width_of(ins);
                let frame = self.read_value(self.resolve(&ins.operands[0], w)?)?;
                self.push_u64(self.regs.get(Width::W64, REG_SB)?)?;
                let sp = self.sp();
                self.regs.set(Width::W64, REG_SB, sp)?;
                self.set_sp(sp.wrapping_sub(frame));
            }
            Leave => {
                self.set_sp(self.regs.get(Width::W64, REG_SB)?);
                let sb = self.pop_u64()?;
                self.regs.set(Width::W64, REG_SB, sb)?;
            }

            Movs => {
                let src = self.regs.get(Width::W64, 0)?;
                let dst = self.regs.get(Width::W64, 1)?;
                let count = self.regs.get(Width::W64, 2)?;
                let block = self.bus.read(src, count)?;
                self.bus.write(dst, &block)?;
            }

            Jmp => self.jump(ins)?,
            Je | Jne | Jl | Jg | Jle | Jge => {
                if self.condition(ins.opcode) {
                    self.jump(ins)?;
                }
            }
            Call => {
                let target = self.read_value(self.resolve(&ins.operands[0], Width::W64)?)?;
                self.push_u64(self.regs.ip())?;
                self.regs.set_ip(target);
            }
            Ret => {
                let ip = self.pop_u64()?;
                self.regs.set_ip(ip);
            }

            Int => {
                let n = self.read_value(self.resolve(&ins.operands[0], Width::W64)?)?;
                if n >= IVT_ENTRIES {
                    return Err(InterruptTableError(n).into());
                }
                return self.dispatch_interrupt(n);
            }
            Iret => self.exec_iret()?,

            Hlt => return Ok(Step::Halt),

            Fadd => {
                let dst = self.resolve(&ins.operands[0], Width::Float)?;
                Self::check_writable(dst)?;
                let a = f64::from_bits(self.read_value(dst)?);
                let b = f64::from_bits(
                    self.read_value(self.resolve(&ins.operands[1], Width::Float)?)?,
                );
                self.write_value(dst, (a + b).to_bits())?;
            }
            Fdiv => {
                let v = f64::from_bits(
                    self.read_value(self.resolve(&ins.operands[0], Width::Float)?)?,
                );
                let acc = self.regs.xmm(0);
                self.regs.set_xmm(0, acc / v);
            }
        }

        Ok(Step::Continue)
    }

    fn width_of(&self, ins: &Instruction) -> Width {
        ins.width.expect("width-parametric opcode decoded without a width")
    }

    fn alu2(
        &self,
        ins: &Instruction,
        writeback: bool,
        f: impl FnOnce(u64, u64, Width, &mut Flags) -> u64,
    ) -> Result<(), Fault> {
        let w = self.width_of(ins);
        let dst = self.resolve(&ins.operands[0], w)?;
        if writeback {
            Self::check_writable(dst)?;
        }
        let src = self.resolve(&ins.operands[1], w)?;
        let a = self.read_value(dst)?;
        let b = self.read_value(src)?;

        let mut flags = self.regs.flags();
        let res = f(a, b, w, &mut flags);
        self.regs.set_flags(flags);

        if writeback {
            self.write_value(dst, res)?;
        }
        Ok(())
    }

    fn alu1(
        &self,
        ins: &Instruction,
        f: impl FnOnce(u64, Width, &mut Flags) -> u64,
    ) -> Result<(), Fault> {
        let w = self.width_of(ins);
        let dst = self.resolve(&ins.operands[0], w)?;
        Self::check_writable(dst)?;
        let v = self.read_value(dst)?;

        let mut flags = self.regs.flags();
        let res = f(v, w, &mut flags);
        self.regs.set_flags(flags);

        self.write_value(dst, res)
    }

    /// MUL/IMUL: bank register 0 is the accumulator, the high half of the
    /// product lands in bank register 1.
    fn exec_mul(&self, ins: &Instruction, signed: bool) -> Result<(), Fault> {
        let w = self.width_of(ins);
        let v = self.read_value(self.resolve(&ins.operands[0], w)?)?;
        let acc = self.regs.get(w, 0)?;

        let mut flags = self.regs.flags();
        let (lo, hi) = if signed {
            alu::imul(acc, v, w, &mut flags)
        } else {
            alu::mul(acc, v, w, &mut flags)
        };
        self.regs.set_flags(flags);

        self.regs.set(w, 0, lo)?;
        self.regs.set(w, 1, hi)?;
        Ok(())
    }

    /// DIV/IDIV: the dividend is bank1:bank0; quotient to bank 0, remainder
    /// to bank 1. Divide errors raise a vector instead of returning.
    fn exec_div(&self, ins: &Instruction, signed: bool) -> Result<(), Fault> {
        let w = self.width_of(ins);
        let v = self.read_value(self.resolve(&ins.operands[0], w)?)?;
        let lo = self.regs.get(w, 0)?;
        let hi = self.regs.get(w, 1)?;

        let result = if signed { alu::idiv(hi, lo, v, w) } else { alu::div(hi, lo, v, w) };
        let (q, r) = result.map_err(|_| Fault::Divide)?;

        self.regs.set(w, 0, q)?;
        self.regs.set(w, 1, r)?;
        Ok(())
    }

    fn jump(&self, ins: &Instruction) -> Result<(), Fault> {
        let target = self.read_value(self.resolve(&ins.operands[0], Width::W64)?)?;
        self.regs.set_ip(target);
        Ok(())
    }

    fn condition(&self, opcode: Opcode) -> bool {
        let flags = self.regs.flags();
        let zero = flags.get(Flag::Zero);
        let sign = flags.get(Flag::Sign);
        let overflow = flags.get(Flag::Overflow);
        match opcode {
            Opcode::Je => zero,
            Opcode::Jne => !zero,
            Opcode::Jl => sign != overflow,
            Opcode::Jge => sign == overflow,
            Opcode::Jg => !zero && sign == overflow,
            Opcode::Jle => zero || sign != overflow,
            _ => unreachable!("not a conditional branch"),
        }
    }
}

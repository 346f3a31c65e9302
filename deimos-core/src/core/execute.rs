//! Decode dispatch and the per-opcode instruction handlers for
//! RV32I + M + A + Zicsr + Zifencei.
//!
//! Dispatch runs in two stages: bits `[1:0]` select the encoding quadrant
//! (only the 32-bit standard quadrant is populated), then bits `[6:2]` index
//! the fixed 32-slot major opcode table below. Slots that fall through raise
//! an illegal-instruction exception.
//!
//! Handlers do not advance the program counter; [`Hart::step`] adds four
//! after every retired instruction. Jump and branch handlers therefore write
//! their destination minus four.

use super::csr::CsrSpecifier;
use super::{ExceptionCause, ExecutionResult, Hart};
use crate::address_space::{AccessType, AddressSpace, BusError};
use crate::instruction::{self, BType, IType, JType, RType, SType, UType};
use crate::registers::Registers;
use crate::{Alignment, PrivilegeLevel};
use log::warn;

/// Runs a single decoded-and-dispatched instruction against `hart`.
pub(super) fn dispatch(
    hart: &mut Hart,
    address_space: &mut AddressSpace,
    raw_instruction: u32,
) -> ExecutionResult {
    if instruction::quadrant(raw_instruction) != instruction::STANDARD_QUADRANT {
        return Err(ExceptionCause::IllegalInstruction);
    }
    let mut executor = Executor {
        hart,
        address_space,
    };
    OPCODES[instruction::opcode_slot(raw_instruction)](&mut executor, raw_instruction)
}

type OpcodeHandler = fn(&mut Executor<'_, '_>, u32) -> ExecutionResult;

/// The major opcode dispatch table, indexed by instruction bits `[6:2]`.
///
/// The slots left at `illegal` are either reserved by the base spec or belong
/// to extensions this interpreter does not implement (floating point, wider
/// encodings, vendor space).
const OPCODES: [OpcodeHandler; 32] = [
    load,     // 0b00000 LOAD
    illegal,  // 0b00001 LOAD-FP
    illegal,  // 0b00010 custom-0
    misc_mem, // 0b00011 MISC-MEM
    op_imm,   // 0b00100 OP-IMM
    auipc,    // 0b00101 AUIPC
    illegal,  // 0b00110 OP-IMM-32
    illegal,  // 0b00111 48b
    store,    // 0b01000 STORE
    illegal,  // 0b01001 STORE-FP
    illegal,  // 0b01010 custom-1
    amo,      // 0b01011 AMO
    op,       // 0b01100 OP
    lui,      // 0b01101 LUI
    illegal,  // 0b01110 OP-32
    illegal,  // 0b01111 64b
    illegal,  // 0b10000 MADD
    illegal,  // 0b10001 MSUB
    illegal,  // 0b10010 NMSUB
    illegal,  // 0b10011 NMADD
    illegal,  // 0b10100 OP-FP
    illegal,  // 0b10101 reserved
    illegal,  // 0b10110 custom-2/rv128
    illegal,  // 0b10111 48b
    branch,   // 0b11000 BRANCH
    jalr,     // 0b11001 JALR
    illegal,  // 0b11010 reserved
    jal,      // 0b11011 JAL
    system,   // 0b11100 SYSTEM
    illegal,  // 0b11101 reserved
    illegal,  // 0b11110 custom-3/rv128
    illegal,  // 0b11111 >= 80b
];

/// SYSTEM immediate encoding of `sfence.vma zero, zero` (funct7 = 0b0001001,
/// rs2 = x0).
const SFENCE_VMA: u32 = 0x120;

pub(super) struct Executor<'h, 'a> {
    pub hart: &'h mut Hart,
    pub address_space: &'a mut AddressSpace,
}

impl Executor<'_, '_> {
    fn registers(&self) -> &Registers {
        self.hart.registers()
    }

    fn registers_mut(&mut self) -> &mut Registers {
        self.hart.registers_mut()
    }
}

fn illegal(_executor: &mut Executor<'_, '_>, _raw_instruction: u32) -> ExecutionResult {
    Err(ExceptionCause::IllegalInstruction)
}

/// LB, LH, LW, LBU, LHU.
///
/// > Loads copy a value from memory to register rd. [...] The LW instruction loads a 32-bit value
/// > from memory into rd. LH loads a 16-bit value from memory, then sign-extends to 32-bits before
/// > storing in rd. LHU loads a 16-bit value from memory but then zero extends to 32-bits before
/// > storing in rd. LB and LBU are defined analogously for 8-bit values.
fn load(executor: &mut Executor<'_, '_>, raw_instruction: u32) -> ExecutionResult {
    let i = IType::new(raw_instruction);
    let address = executor.registers().x(i.rs1).wrapping_add_signed(i.imm);
    let zero_extend = i.funct3 & 0b100 != 0;
    let value = match i.funct3 & 0b011 {
        0b000 => {
            let byte = executor.hart.read_byte(executor.address_space, address)?;
            match zero_extend {
                true => u32::from(byte),
                false => byte as i8 as i32 as u32,
            }
        }
        0b001 => {
            let halfword = executor.hart.read_halfword(executor.address_space, address)?;
            match zero_extend {
                true => u32::from(halfword),
                false => halfword as i16 as i32 as u32,
            }
        }
        0b010 => {
            // The zero-extending word load only exists on RV64.
            if zero_extend {
                return Err(ExceptionCause::IllegalInstruction);
            }
            executor.hart.read_word(executor.address_space, address)?
        }
        _ => return Err(ExceptionCause::IllegalInstruction),
    };
    executor.registers_mut().set_x(i.rd, value);
    Ok(())
}

/// SB, SH, SW. Doubleword stores only exist on RV64.
fn store(executor: &mut Executor<'_, '_>, raw_instruction: u32) -> ExecutionResult {
    let s = SType::new(raw_instruction);
    let address = executor.registers().x(s.rs1).wrapping_add_signed(s.imm);
    let value = executor.registers().x(s.rs2);
    match s.funct3 & 0b011 {
        0b000 => executor
            .hart
            .write_byte(executor.address_space, address, value as u8),
        0b001 => executor
            .hart
            .write_halfword(executor.address_space, address, value as u16),
        0b010 => executor
            .hart
            .write_word(executor.address_space, address, value),
        _ => Err(ExceptionCause::IllegalInstruction),
    }
}

/// ADDI, SLTI, SLTIU, XORI, ORI, ANDI, SLLI, SRLI, SRAI.
///
/// > ADDI adds the sign-extended 12-bit immediate to register rs1. Arithmetic overflow is ignored
/// > and the result is simply the low XLEN bits of the result.
///
/// The shifts take their amount from the low five immediate bits; SRAI is
/// selected by the upper immediate bits reading 0b0100000.
fn op_imm(executor: &mut Executor<'_, '_>, raw_instruction: u32) -> ExecutionResult {
    let i = IType::new(raw_instruction);
    let src = executor.registers().x(i.rs1);
    let shift_amount = i.uimm & 0b1_1111;
    let alternative = (i.uimm >> 5) == 0b010_0000;
    let value = match i.funct3 {
        0b000 => src.wrapping_add_signed(i.imm),
        0b001 => src << shift_amount,
        0b010 => ((src as i32) < i.imm) as u32,
        0b011 => (src < i.imm as u32) as u32,
        0b100 => src ^ i.imm as u32,
        0b101 if alternative => ((src as i32) >> shift_amount) as u32,
        0b101 => src >> shift_amount,
        0b110 => src | i.imm as u32,
        0b111 => src & i.imm as u32,
        _ => unreachable!(),
    };
    executor.registers_mut().set_x(i.rd, value);
    Ok(())
}

/// The register-register ALU family: funct7 selects base ops, MULDIV, or the
/// SUB/SRA alternates.
fn op(executor: &mut Executor<'_, '_>, raw_instruction: u32) -> ExecutionResult {
    let r = RType::new(raw_instruction);
    let src1 = executor.registers().x(r.rs1);
    let src2 = executor.registers().x(r.rs2);
    let value = match (r.funct7, r.funct3) {
        (0b000_0000, 0b000) => src1.wrapping_add(src2),
        (0b010_0000, 0b000) => src1.wrapping_sub(src2),
        (0b000_0000, 0b001) => src1 << (src2 & 0x1F),
        (0b000_0000, 0b010) => ((src1 as i32) < (src2 as i32)) as u32,
        (0b000_0000, 0b011) => (src1 < src2) as u32,
        (0b000_0000, 0b100) => src1 ^ src2,
        (0b000_0000, 0b101) => src1 >> (src2 & 0x1F),
        (0b010_0000, 0b101) => ((src1 as i32) >> (src2 & 0x1F)) as u32,
        (0b000_0000, 0b110) => src1 | src2,
        (0b000_0000, 0b111) => src1 & src2,
        (0b000_0001, funct3) => mul_div(funct3, src1, src2),
        _ => return Err(ExceptionCause::IllegalInstruction),
    };
    executor.registers_mut().set_x(r.rd, value);
    Ok(())
}

/// > LUI (load upper immediate) is used to build 32-bit constants and uses the U-type format. LUI
/// > places the U-immediate value in the top 20 bits of the destination register rd, filling in the
/// > lowest 12 bits with zeros.
fn lui(executor: &mut Executor<'_, '_>, raw_instruction: u32) -> ExecutionResult {
    let u = UType::new(raw_instruction);
    executor.registers_mut().set_x(u.rd, u.imm);
    Ok(())
}

/// > AUIPC (add upper immediate to pc) is used to build pc-relative addresses and uses the U-type
/// > format. AUIPC forms a 32-bit offset from the 20-bit U-immediate, filling in the lowest 12 bits
/// > with zeros, adds this offset to the address of the AUIPC instruction, then places the result
/// > in register rd.
fn auipc(executor: &mut Executor<'_, '_>, raw_instruction: u32) -> ExecutionResult {
    let u = UType::new(raw_instruction);
    let value = executor.registers().pc().wrapping_add(u.imm);
    executor.registers_mut().set_x(u.rd, value);
    Ok(())
}

/// BEQ, BNE, BLT, BGE, BLTU, BGEU, decoded on the full funct3.
fn branch(executor: &mut Executor<'_, '_>, raw_instruction: u32) -> ExecutionResult {
    let b = BType::new(raw_instruction);
    let src1 = executor.registers().x(b.rs1);
    let src2 = executor.registers().x(b.rs2);
    let taken = match b.funct3 {
        0b000 => src1 == src2,
        0b001 => src1 != src2,
        0b100 => (src1 as i32) < (src2 as i32),
        0b101 => (src1 as i32) >= (src2 as i32),
        0b110 => src1 < src2,
        0b111 => src1 >= src2,
        _ => return Err(ExceptionCause::IllegalInstruction),
    };
    if taken {
        let registers = executor.registers_mut();
        let target = registers.pc().wrapping_add_signed(b.imm);
        *registers.pc_mut() = target.wrapping_sub(4);
    }
    Ok(())
}

/// > The jump and link (JAL) instruction [...] stores the address of the instruction following the
/// > jump (pc+4) into register rd.
fn jal(executor: &mut Executor<'_, '_>, raw_instruction: u32) -> ExecutionResult {
    let j = JType::new(raw_instruction);
    let registers = executor.registers_mut();
    let pc = registers.pc();
    registers.set_x(j.rd, pc.wrapping_add(4));
    *registers.pc_mut() = pc.wrapping_add_signed(j.imm).wrapping_sub(4);
    Ok(())
}

/// > The target address is obtained by adding the sign-extended 12-bit I-immediate to the register
/// > rs1, then setting the least-significant bit of the result to zero.
fn jalr(executor: &mut Executor<'_, '_>, raw_instruction: u32) -> ExecutionResult {
    let i = IType::new(raw_instruction);
    let registers = executor.registers_mut();
    let target = registers.x(i.rs1).wrapping_add_signed(i.imm) & !1;
    let pc = registers.pc();
    registers.set_x(i.rd, pc.wrapping_add(4));
    *registers.pc_mut() = target.wrapping_sub(4);
    Ok(())
}

/// FENCE and FENCE.I. A single-issue interpreter performs every access in
/// program order, so both retire as no-ops.
fn misc_mem(_executor: &mut Executor<'_, '_>, raw_instruction: u32) -> ExecutionResult {
    let i = IType::new(raw_instruction);
    match i.funct3 {
        0b000 | 0b001 => Ok(()),
        _ => Err(ExceptionCause::IllegalInstruction),
    }
}

/// The SYSTEM opcode: PRIV encodings at funct3 zero, the Zicsr family
/// otherwise.
fn system(executor: &mut Executor<'_, '_>, raw_instruction: u32) -> ExecutionResult {
    let i = IType::new(raw_instruction);
    match i.funct3 {
        0b000 => privileged(executor, i),
        0b100 => Err(ExceptionCause::IllegalInstruction),
        _ => csr_op(executor, i),
    }
}

fn privileged(executor: &mut Executor<'_, '_>, i: IType) -> ExecutionResult {
    match i.uimm {
        0 => match executor.hart.privilege() {
            PrivilegeLevel::User => Err(ExceptionCause::EnvironmentCallFromUMode),
            PrivilegeLevel::Supervisor => Err(ExceptionCause::EnvironmentCallFromSMode),
            // The trampoline level never runs guest code.
            PrivilegeLevel::Machine => Err(ExceptionCause::IllegalInstruction),
        },
        1 => Err(ExceptionCause::Breakpoint),
        SFENCE_VMA => {
            executor.address_space.invalidate();
            Ok(())
        }
        _ => Err(ExceptionCause::IllegalInstruction),
    }
}

/// The Zicsr read-modify-write family.
///
/// The CSR is read once, the modified value written back per opcode (write,
/// or-set, and-clear), and the old value lands in rd. CSRRS and CSRRC with
/// rs1 = x0 (and their immediate forms with a zero immediate) suppress the
/// write entirely.
fn csr_op(executor: &mut Executor<'_, '_>, i: IType) -> ExecutionResult {
    let specifier = i.uimm as CsrSpecifier;
    // Register forms use rs1's value as the operand, immediate forms the rs1
    // field itself.
    let operand = match i.funct3 & 0b100 {
        0 => executor.registers().x(i.rs1),
        _ => u32::from(i.rs1),
    };
    let old_value = executor.hart.csrs().read(specifier);
    let new_value = match i.funct3 & 0b011 {
        0b01 => Some(operand),
        0b10 => (i.rs1 != 0).then_some(old_value | operand),
        0b11 => (i.rs1 != 0).then_some(old_value & !operand),
        _ => return Err(ExceptionCause::IllegalInstruction),
    };
    if let Some(new_value) = new_value {
        executor.hart.csrs_mut().write(specifier, new_value);
    }
    executor.registers_mut().set_x(i.rd, old_value);
    Ok(())
}

/// The RV32A opcode: LR.W, SC.W, and the fetch-and-op family. funct7 carries
/// {funct5, aq, rl}; the ordering hints are accepted and ignored.
fn amo(executor: &mut Executor<'_, '_>, raw_instruction: u32) -> ExecutionResult {
    let r = RType::new(raw_instruction);
    if r.funct3 != 0b010 {
        return Err(ExceptionCause::IllegalInstruction);
    }
    let funct5 = r.funct7 >> 2;
    let address = executor.registers().x(r.rs1);
    match funct5 {
        0b00010 => load_reserved(executor, r, address),
        0b00011 => store_conditional(executor, r, address),
        _ => amo_op(executor, funct5, r, address),
    }
}

/// > LR.W loads a word from the address in rs1, places the sign-extended value in rd, and
/// > registers a reservation set—a set of bytes that subsumes the bytes in the addressed word.
fn load_reserved(executor: &mut Executor<'_, '_>, r: RType, address: u32) -> ExecutionResult {
    if !Alignment::WORD.is_aligned(address) {
        return Err(executor
            .hart
            .fault(BusError::LoadMisaligned, AccessType::Load, address));
    }
    let physical_address = executor
        .hart
        .translate(executor.address_space, AccessType::Load, address)?;
    let value = executor
        .hart
        .read_word_physical(executor.address_space, physical_address)?;
    executor.hart.set_reservation(physical_address);
    executor.registers_mut().set_x(r.rd, value);
    Ok(())
}

/// > SC.W conditionally writes a word in rs2 to the address in rs1: the SC.W succeeds only if the
/// > reservation is still valid and the reservation set contains the bytes being written. If the
/// > SC.W succeeds, [...] rd is set to zero. Otherwise, [...] rd is set to a nonzero value.
///
/// Success or failure, the reservation is gone afterwards.
fn store_conditional(executor: &mut Executor<'_, '_>, r: RType, address: u32) -> ExecutionResult {
    if !Alignment::WORD.is_aligned(address) {
        return Err(executor
            .hart
            .fault(BusError::StoreMisaligned, AccessType::Store, address));
    }
    let physical_address = executor
        .hart
        .translate(executor.address_space, AccessType::Store, address)?;
    let success = executor.hart.reservation_matches(physical_address);
    if success {
        let value = executor.registers().x(r.rs2);
        executor
            .hart
            .write_word_physical(executor.address_space, physical_address, value)?;
    }
    executor.hart.clear_reservation();
    executor
        .registers_mut()
        .set_x(r.rd, if success { 0 } else { 1 });
    Ok(())
}

/// The fetch-and-op AMOs: read the word, combine it with rs2, write the
/// result back, and return the original value in rd, as one architectural
/// unit.
fn amo_op(
    executor: &mut Executor<'_, '_>,
    funct5: u8,
    r: RType,
    address: u32,
) -> ExecutionResult {
    let op: fn(u32, u32) -> u32 = match funct5 {
        0b00000 => |a, b| a.wrapping_add(b),
        0b00001 => |_, b| b,
        0b00100 => |a, b| a ^ b,
        0b01000 => |a, b| a | b,
        0b01100 => |a, b| a & b,
        0b10000 => |a, b| (a as i32).min(b as i32) as u32,
        0b10100 => |a, b| (a as i32).max(b as i32) as u32,
        0b11000 => u32::min,
        0b11100 => u32::max,
        _ => {
            // Zacas and friends live here; report them out-of-band rather
            // than pretending they trapped architecturally.
            warn!("unimplemented AMO funct5 {:#07b}", funct5);
            return Err(ExceptionCause::UnimplementedInstruction);
        }
    };
    if !Alignment::WORD.is_aligned(address) {
        return Err(executor
            .hart
            .fault(BusError::StoreMisaligned, AccessType::Store, address));
    }
    let physical_address = executor
        .hart
        .translate(executor.address_space, AccessType::Store, address)?;
    let original = executor
        .hart
        .read_word_physical(executor.address_space, physical_address)
        .map_err(as_store_cause)?;
    let value = op(original, executor.registers().x(r.rs2));
    executor
        .hart
        .write_word_physical(executor.address_space, physical_address, value)?;
    executor.registers_mut().set_x(r.rd, original);
    Ok(())
}

/// AMOs fault with the store classification even on their read half.
fn as_store_cause(cause: ExceptionCause) -> ExceptionCause {
    match cause {
        ExceptionCause::LoadAccessFault => ExceptionCause::StoreAccessFault,
        ExceptionCause::LoadAddressMisaligned => ExceptionCause::StoreAddressMisaligned,
        ExceptionCause::LoadPageFault => ExceptionCause::StorePageFault,
        other => other,
    }
}

/// The RV32M multiply/divide family.
///
/// > MUL performs an XLEN-bit×XLEN-bit multiplication of rs1 by rs2 and places the lower XLEN bits
/// > in the destination register. MULH, MULHU, and MULHSU perform the same multiplication but
/// > return the upper XLEN bits of the full 2×XLEN-bit product, for signed×signed,
/// > unsigned×unsigned, and signed rs1×unsigned rs2 multiplication, respectively.
///
/// Division by zero yields an all-ones quotient and passes the dividend
/// through as remainder; signed overflow yields the most negative value and a
/// zero remainder.
fn mul_div(funct3: u8, src1: u32, src2: u32) -> u32 {
    match funct3 {
        0b000 => src1.wrapping_mul(src2),
        0b001 => ((i64::from(src1 as i32) * i64::from(src2 as i32)) >> 32) as u32,
        0b010 => ((i64::from(src1 as i32) * i64::from(src2)) >> 32) as u32,
        0b011 => ((u64::from(src1) * u64::from(src2)) >> 32) as u32,
        0b100 => match src2 {
            0 => u32::MAX,
            _ => (src1 as i32).wrapping_div(src2 as i32) as u32,
        },
        0b101 => match src2 {
            0 => u32::MAX,
            _ => src1 / src2,
        },
        0b110 => match src2 {
            0 => src1,
            _ => (src1 as i32).wrapping_rem(src2 as i32) as u32,
        },
        0b111 => match src2 {
            0 => src1,
            _ => src1 % src2,
        },
        _ => unreachable!(),
    }
}

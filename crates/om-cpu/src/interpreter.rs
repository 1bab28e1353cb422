//! Instruction dispatch loop
//!
//! The CPU repeatedly translates the PC through the MMU's fetch path,
//! decodes one instruction and invokes its handler. Handlers mutate the
//! guest state and the next-instruction address; architectural faults
//! come back through the `Exception` channel and are delivered here.
//! Between instructions the loop samples the stop flag, the decrementer
//! latch, the external-interrupt line, and single-step traces.

use crate::decoder::{Decoder, InstructionForm};
use crate::exceptions::{self, Exception, ProgramCause};
use crate::instructions::{branch, float, integer, load_store, system};
use crate::mmu::Mmu;
use crate::state::{msr, CpuState};
use om_core::irq::InterruptLine;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// The guest CPU: state, MMU and the dispatch loop.
pub struct Cpu {
    pub state: CpuState,
    pub mmu: Mmu,
    /// External-interrupt input, driven by the interrupt controller
    int_line: Arc<InterruptLine>,
    /// Cooperative stop request checked between instructions
    stop: Arc<AtomicBool>,
    /// Decrementer underflow latched until MSR[EE] allows delivery
    dec_pending: bool,
    /// Timebase/decrementer ticks per retired instruction
    tb_ratio: u32,
    /// Log every retired instruction at trace level
    trace_exec: bool,
    retired: u64,
    /// Retirement counters per primary opcode (profiling hook)
    retired_by_opcode: [u64; 64],
}

impl Cpu {
    pub fn new(mmu: Mmu, int_line: Arc<InterruptLine>) -> Self {
        let state = CpuState::new();
        float::sync_host_rounding(&state);
        Self {
            state,
            mmu,
            int_line,
            stop: Arc::new(AtomicBool::new(false)),
            dec_pending: false,
            tb_ratio: 1,
            trace_exec: false,
            retired: 0,
            retired_by_opcode: [0; 64],
        }
    }

    /// Timebase/decrementer ticks added per retired instruction.
    pub fn set_timebase_ratio(&mut self, ratio: u32) {
        self.tb_ratio = ratio.max(1);
    }

    /// Enable per-instruction trace logging.
    pub fn set_trace_exec(&mut self, enabled: bool) {
        self.trace_exec = enabled;
    }

    /// Handle other threads use to request a cooperative stop.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub fn instruction_count(&self) -> u64 {
        self.retired
    }

    /// Retirement counts per primary opcode.
    pub fn opcode_counts(&self) -> &[u64; 64] {
        &self.retired_by_opcode
    }

    /// Cold reset: registers to their reset state, translation caches
    /// dropped.
    pub fn reset(&mut self) {
        self.state.reset();
        self.mmu.invalidate_all();
        self.dec_pending = false;
        float::sync_host_rounding(&self.state);
    }

    /// Run until a stop is requested. The current instruction always
    /// completes before the loop returns.
    pub fn run(&mut self) {
        while !self.stop.load(Ordering::Relaxed) {
            self.step();
        }
        self.stop.store(false, Ordering::Relaxed);
        tracing::debug!(
            "dispatch loop stopped at 0x{:08x} after {} instructions",
            self.state.pc,
            self.retired
        );
    }

    /// Execute one instruction, including boundary work.
    pub fn step(&mut self) {
        // pending asynchronous events are taken at the boundary, so
        // SRR0 names the next unexecuted instruction
        if self.state.interrupts_enabled() {
            if self.dec_pending {
                self.dec_pending = false;
                exceptions::deliver(&mut self.state, &Exception::Decrementer);
                return;
            }
            if self.int_line.is_asserted() {
                exceptions::deliver(&mut self.state, &Exception::ExternalInterrupt);
                return;
            }
        }

        let pc = self.state.pc;
        let instr = match self.mmu.fetch(&self.state, pc) {
            Ok(instr) => instr,
            Err(exc) => {
                exceptions::deliver(&mut self.state, &exc);
                return;
            }
        };

        if self.trace_exec {
            tracing::trace!(
                "0x{:08x}: 0x{:08x} {}",
                pc,
                instr,
                Decoder::mnemonic(instr)
            );
        }

        self.state.nia = pc.wrapping_add(4);
        match self.execute(instr) {
            Ok(()) => {
                self.retired += 1;
                self.retired_by_opcode[(instr >> 26) as usize] += 1;
                self.state.pc = self.state.nia;
                self.tick();
                if self.state.msr & msr::SE != 0 {
                    exceptions::deliver(&mut self.state, &Exception::Trace);
                }
            }
            Err(exc) => {
                exceptions::deliver(&mut self.state, &exc);
            }
        }
    }

    /// Advance the timebase and decrementer per retired instruction;
    /// latch the decrementer when its sign bit turns on.
    fn tick(&mut self) {
        self.state.tb = self.state.tb.wrapping_add(self.tb_ratio as u64);
        let old = self.state.dec;
        self.state.dec = old.wrapping_sub(self.tb_ratio);
        if old & 0x8000_0000 == 0 && self.state.dec & 0x8000_0000 != 0 {
            self.dec_pending = true;
        }
    }

    fn execute(&mut self, instr: u32) -> Result<(), Exception> {
        let decoded = Decoder::decode(instr);
        match decoded.form {
            InstructionForm::I => {
                branch::execute_i_form(&mut self.state, instr);
                Ok(())
            }
            InstructionForm::B => {
                branch::execute_b_form(&mut self.state, instr);
                Ok(())
            }
            InstructionForm::SC => Err(Exception::SystemCall),
            InstructionForm::D => self.execute_d_form(instr, decoded.op),
            InstructionForm::X => self.execute_x_form(instr, decoded.op, decoded.xo),
            InstructionForm::XL => self.execute_xl_form(instr, decoded.xo),
            InstructionForm::XO => integer::execute_xo_form(&mut self.state, instr, decoded.xo),
            InstructionForm::M => integer::execute_m_form(&mut self.state, instr, decoded.op),
            InstructionForm::A => self.execute_a_form(instr, decoded.op, decoded.xo),
            InstructionForm::Unknown => {
                tracing::warn!(
                    "illegal opcode 0x{:08x} ({}) at 0x{:08x}",
                    instr,
                    Decoder::mnemonic(instr),
                    self.state.pc
                );
                Err(Exception::Program(ProgramCause::IllegalInstruction))
            }
        }
    }

    fn execute_d_form(&mut self, instr: u32, op: u8) -> Result<(), Exception> {
        match op {
            3..=29 => integer::execute_d_form(&mut self.state, instr, op),
            32..=55 => load_store::execute_d_form(&mut self.mmu, &mut self.state, instr, op),
            _ => Err(Exception::Program(ProgramCause::IllegalInstruction)),
        }
    }

    fn execute_xl_form(&mut self, instr: u32, xo: u16) -> Result<(), Exception> {
        match xo {
            // rfi
            50 => system::rfi(&mut self.state),
            // isync: dispatch is already serialised
            150 => Ok(()),
            _ => branch::execute_xl_form(&mut self.state, instr, xo),
        }
    }

    /// X-form under primary opcode 31 (and the FP X-forms under 63).
    fn execute_x_form(&mut self, instr: u32, op: u8, xo: u16) -> Result<(), Exception> {
        if op == 63 {
            return self.execute_fp_x_form(instr, xo);
        }

        let st = &mut self.state;
        match xo {
            // compares and trap
            0 | 4 | 32 => integer::execute_x_compare(st, instr, xo),

            // logical, shifts, extends
            24 | 26 | 28 | 60 | 124 | 284 | 316 | 412 | 444 | 476 | 536 | 792 | 824 | 922
            | 954 => integer::execute_x_logical(st, instr, xo),

            // loads, stores, strings, reservation pair
            20 | 23 | 55 | 87 | 119 | 150 | 151 | 183 | 215 | 247 | 279 | 311 | 343 | 375
            | 407 | 439 | 533 | 534 | 535 | 567 | 597 | 599 | 631 | 661 | 662 | 663 | 695
            | 725 | 727 | 759 | 790 | 918 | 983 => {
                load_store::execute_x_form(&mut self.mmu, st, instr, xo)
            }

            // CR and SPR moves
            19 => {
                system::mfcr(st, instr);
                Ok(())
            }
            144 => {
                system::mtcrf(st, instr);
                Ok(())
            }
            512 => {
                system::mcrxr(st, instr);
                Ok(())
            }
            339 => system::mfspr(st, instr),
            467 => system::mtspr(&mut self.mmu, st, instr),
            371 => system::mftb(st, instr),

            // MSR and segment registers
            83 => system::mfmsr(st, instr),
            146 => system::mtmsr(st, instr),
            595 => system::mfsr(st, instr),
            210 => system::mtsr(&mut self.mmu, st, instr),
            659 => system::mfsrin(st, instr),
            242 => system::mtsrin(&mut self.mmu, st, instr),

            // TLB management
            306 => system::tlbie(&mut self.mmu, st, instr),
            370 => system::tlbia(&mut self.mmu, st),
            566 => Ok(()), // tlbsync

            // memory barriers
            598 | 854 => {
                // sync, eieio
                std::sync::atomic::fence(std::sync::atomic::Ordering::SeqCst);
                Ok(())
            }

            // cache hints with no effect on this core
            54 | 86 | 246 | 278 | 982 => Ok(()), // dcbst, dcbf, dcbtst, dcbt, icbi
            // dcbi is supervisor-only
            470 => {
                if st.is_user() {
                    Err(Exception::Program(ProgramCause::PrivilegedInstruction))
                } else {
                    Ok(())
                }
            }
            1014 => system::dcbz(&mut self.mmu, st, instr),

            _ => {
                tracing::warn!(
                    "unimplemented X-form op {} (0x{:08x}) at 0x{:08x}",
                    xo,
                    instr,
                    st.pc
                );
                Err(Exception::Program(ProgramCause::IllegalInstruction))
            }
        }
    }

    /// X-form encodings under primary opcode 63: compares, conversions,
    /// moves, FPSCR access.
    fn execute_fp_x_form(&mut self, instr: u32, xo: u16) -> Result<(), Exception> {
        float::check_available(&self.state)?;
        let st = &mut self.state;
        let (rt, _ra, rb, rc) = Decoder::x_form(instr);

        match xo {
            0 => float::fcmp(st, instr, false),
            32 => float::fcmp(st, instr, true),
            12 => float::frsp(st, rt, rb, rc),
            14 => float::fctiw(st, rt, rb, false, rc),
            15 => float::fctiw(st, rt, rb, true, rc),
            38 => float::mtfsb1(st, rt as u32, rc),
            40 => {
                float::fneg(st, rt, rb, rc);
                Ok(())
            }
            64 => {
                float::mcrfs(st, (instr >> 23) & 7, (instr >> 18) & 7);
                Ok(())
            }
            70 => {
                float::mtfsb0(st, rt as u32, rc);
                Ok(())
            }
            72 => {
                float::fmr(st, rt, rb, rc);
                Ok(())
            }
            134 => float::mtfsfi(st, (instr >> 23) & 7, (instr >> 12) & 0xF, rc),
            136 => {
                float::fnabs(st, rt, rb, rc);
                Ok(())
            }
            264 => {
                float::fabs(st, rt, rb, rc);
                Ok(())
            }
            583 => {
                float::mffs(st, rt, rc);
                Ok(())
            }
            711 => float::mtfsf(st, ((instr >> 17) & 0xFF) as u8, rb, rc),
            _ => {
                tracing::warn!("unimplemented FP X-form op {} (0x{:08x})", xo, instr);
                Err(Exception::Program(ProgramCause::IllegalInstruction))
            }
        }
    }

    /// A-form floating-point arithmetic; primary 59 is the
    /// single-precision variant set.
    fn execute_a_form(&mut self, instr: u32, op: u8, xo: u16) -> Result<(), Exception> {
        float::check_available(&self.state)?;
        let st = &mut self.state;
        let (d, a, b, c, rc) = Decoder::a_form(instr);
        let single = op == 59;

        match xo {
            18 => float::fdiv(st, d, a, b, single, rc),
            20 => float::fsub(st, d, a, b, single, rc),
            21 => float::fadd(st, d, a, b, single, rc),
            22 => float::fsqrt(st, d, b, single, rc),
            23 => float::fsel(st, d, a, b, c, rc),
            24 => float::fres(st, d, b, rc),
            25 => float::fmul(st, d, a, c, single, rc),
            26 => float::frsqrte(st, d, b, rc),
            28 => float::fmadd(st, d, a, b, c, true, false, single, rc), // fmsub
            29 => float::fmadd(st, d, a, b, c, false, false, single, rc), // fmadd
            30 => float::fmadd(st, d, a, b, c, true, true, single, rc), // fnmsub
            31 => float::fmadd(st, d, a, b, c, false, true, single, rc), // fnmadd
            _ => {
                tracing::warn!("unimplemented A-form op {} (0x{:08x})", xo, instr);
                Err(Exception::Program(ProgramCause::IllegalInstruction))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use om_memory::{MmioRouter, SystemRam};

    /// A CPU with RAM only, PC at 0, real addressing.
    fn bare_cpu(ram_size: u32) -> Cpu {
        let mmu = Mmu::new(SystemRam::new(ram_size), MmioRouter::new());
        let mut cpu = Cpu::new(mmu, Arc::new(InterruptLine::new()));
        cpu.state.msr = 0;
        cpu.state.pc = 0;
        cpu
    }

    fn load_program(cpu: &mut Cpu, at: u32, program: &[u32]) {
        for (i, instr) in program.iter().enumerate() {
            cpu.mmu.ram.write_u32(at + i as u32 * 4, *instr).unwrap();
        }
    }

    #[test]
    fn test_straight_line_execution() {
        let mut cpu = bare_cpu(0x1000);
        load_program(
            &mut cpu,
            0,
            &[
                0x3860_0005, // addi r3, 0, 5
                0x3880_0007, // addi r4, 0, 7
                0x7CA3_2214, // add r5, r3, r4
            ],
        );
        cpu.step();
        cpu.step();
        cpu.step();
        assert_eq!(cpu.state.gpr(5), 12);
        assert_eq!(cpu.state.pc, 12);
        assert_eq!(cpu.instruction_count(), 3);
        assert_eq!(cpu.opcode_counts()[14], 2);
        assert_eq!(cpu.opcode_counts()[31], 1);
    }

    #[test]
    fn test_branch_loop() {
        let mut cpu = bare_cpu(0x1000);
        // three bdnz iterations bump r3 from 3 to 6
        load_program(
            &mut cpu,
            0,
            &[
                0x3860_0003, // addi r3, 0, 3
                0x7C69_03A6, // mtctr r3
                0x3863_0001, // addi r3, r3, 1
                0x4200_FFFC, // bdnz .-4
            ],
        );
        for _ in 0..8 {
            cpu.step();
        }
        assert_eq!(cpu.state.gpr(3), 6);
        assert_eq!(cpu.state.ctr, 0);
        assert_eq!(cpu.state.pc, 16);
    }

    #[test]
    fn test_illegal_instruction_takes_program_vector() {
        let mut cpu = bare_cpu(0x1000);
        load_program(&mut cpu, 0x100, &[0x0000_0000]);
        cpu.state.pc = 0x100;
        cpu.step();
        assert_eq!(cpu.state.pc, 0x700);
        assert_eq!(cpu.state.srr0, 0x100);
        assert_ne!(
            cpu.state.srr1 & exceptions::srr1::PROG_ILLEGAL,
            0
        );
    }

    #[test]
    fn test_sc_and_rfi_round_trip() {
        let mut cpu = bare_cpu(0x1000);
        load_program(&mut cpu, 0x10, &[0x4400_0002]); // sc
        load_program(&mut cpu, 0xC00, &[0x4C00_0064]); // rfi
        cpu.state.pc = 0x10;

        cpu.step();
        assert_eq!(cpu.state.pc, 0xC00);
        assert_eq!(cpu.state.srr0, 0x14);

        cpu.step();
        assert_eq!(cpu.state.pc, 0x14);
    }

    #[test]
    fn test_decrementer_latches_until_ee() {
        let mut cpu = bare_cpu(0x1000);
        // nops (ori r0, r0, 0)
        load_program(&mut cpu, 0, &[0x6000_0000; 8]);
        cpu.state.dec = 2;

        cpu.step();
        cpu.step(); // dec wraps 1 -> 0; still no underflow
        assert!(!cpu.dec_pending);
        cpu.step(); // 0 -> 0xFFFF_FFFF latches
        assert!(cpu.dec_pending);

        // EE clear: nothing delivered
        cpu.step();
        assert!(cpu.dec_pending);

        cpu.state.msr |= msr::EE;
        let pc_before = cpu.state.pc;
        cpu.step();
        assert_eq!(cpu.state.pc, 0x900);
        assert_eq!(cpu.state.srr0, pc_before);
        assert!(!cpu.dec_pending);
    }

    #[test]
    fn test_single_step_trace() {
        let mut cpu = bare_cpu(0x1000);
        load_program(&mut cpu, 0, &[0x6000_0000; 2]);
        cpu.state.msr |= msr::SE;

        cpu.step();
        // the instruction retired, then the trace vector was taken with
        // SRR0 naming the next instruction
        assert_eq!(cpu.state.pc, 0xD00);
        assert_eq!(cpu.state.srr0, 4);
        assert_eq!(cpu.state.msr & msr::SE, 0);
    }

    #[test]
    fn test_stop_flag_completes_current_instruction() {
        let mut cpu = bare_cpu(0x1000);
        // an infinite loop: b .
        load_program(&mut cpu, 0, &[0x4800_0000]);
        let stop = cpu.stop_handle();
        stop.store(true, Ordering::Relaxed);
        cpu.run();
        // run() observed the stop request and returned
        assert_eq!(cpu.instruction_count(), 0);
    }
}

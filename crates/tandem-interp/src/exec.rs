use crate::Interp;
use tandem_arch::{PStateFlag, V128};
use tandem_backend::{BackendError, CpuBackend, MemoryPermission};

const RET: u32 = 0xD65F_03C0;

const DEFAULT_NAN_F32: u32 = 0x7FC0_0000;
const DEFAULT_NAN_F64: u64 = 0x7FF8_0000_0000_0000;

impl Interp {
    /// Execute one instruction at the current program counter.
    ///
    /// Returns `true` when the instruction was RET (the program counter then
    /// holds the link-register target, as the architecture specifies).
    pub(crate) fn step(&mut self) -> Result<bool, BackendError> {
        let pc = self.pc;
        let word = self.guest_read(pc, 4, MemoryPermission::EXEC)?;
        let insn = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);

        if insn == RET {
            self.pc = self.x[30];
            return Ok(true);
        }

        self.exec_one(pc, insn)?;
        self.pc = pc + 4;
        Ok(false)
    }

    fn exec_one(&mut self, pc: u64, insn: u32) -> Result<(), BackendError> {
        if (insn >> 23) & 0x3F == 0b100010 {
            return self.add_sub_imm(pc, insn);
        }
        if insn & 0xFFC0_0000 == 0xF940_0000 {
            return self.ldr_unsigned(insn);
        }
        if insn & 0xFFC0_0000 == 0xF900_0000 {
            return self.str_unsigned(insn);
        }
        if insn & 0xFFFF_FC00 == 0x1E21_C000 {
            self.fsqrt_s(insn);
            return Ok(());
        }
        if insn & 0xFFFF_FC00 == 0x1E61_C000 {
            self.fsqrt_d(insn);
            return Ok(());
        }

        Err(BackendError::Execution {
            pc,
            reason: format!("unsupported instruction {insn:#010x}"),
        })
    }

    /// Reads index 31 as SP in SP-form contexts and as XZR otherwise.
    fn reg(&self, index: u32, sp_form: bool) -> u64 {
        match index {
            31 if sp_form => self.sp,
            31 => 0,
            i => self.x[i as usize],
        }
    }

    fn set_reg(&mut self, index: u32, value: u64, sp_form: bool) {
        match index {
            31 if sp_form => self.sp = value,
            31 => {}
            i => self.x[i as usize] = value,
        }
    }

    fn add_sub_imm(&mut self, pc: u64, insn: u32) -> Result<(), BackendError> {
        let sf = insn >> 31 != 0;
        if !sf {
            return Err(BackendError::Execution {
                pc,
                reason: format!("32-bit add/sub immediate not supported ({insn:#010x})"),
            });
        }
        let is_sub = (insn >> 30) & 1 != 0;
        let set_flags = (insn >> 29) & 1 != 0;
        let shift = (insn >> 22) & 1;
        let imm = ((insn >> 10) & 0xFFF) as u64;
        let rn = (insn >> 5) & 0x1F;
        let rd = insn & 0x1F;

        let op1 = self.reg(rn, true);
        let op2 = imm << (12 * shift);

        let result = if is_sub {
            op1.wrapping_sub(op2)
        } else {
            op1.wrapping_add(op2)
        };

        if set_flags {
            let (carry, overflow) = if is_sub {
                (
                    op1 >= op2,
                    ((op1 ^ op2) & (op1 ^ result)) >> 63 != 0,
                )
            } else {
                (
                    op1.checked_add(op2).is_none(),
                    ((op1 ^ result) & (op2 ^ result)) >> 63 != 0,
                )
            };
            self.set_flag(PStateFlag::Negative, result >> 63 != 0);
            self.set_flag(PStateFlag::Zero, result == 0);
            self.set_flag(PStateFlag::Carry, carry);
            self.set_flag(PStateFlag::Overflow, overflow);
        }

        // Flag-setting forms write XZR at index 31; plain forms write SP.
        self.set_reg(rd, result, !set_flags);
        Ok(())
    }

    fn ldr_unsigned(&mut self, insn: u32) -> Result<(), BackendError> {
        let imm = (((insn >> 10) & 0xFFF) as u64) * 8;
        let rn = (insn >> 5) & 0x1F;
        let rt = insn & 0x1F;
        let addr = self.reg(rn, true).wrapping_add(imm);
        let bytes = self.guest_read(addr, 8, MemoryPermission::READ)?;
        let value = u64::from_le_bytes(bytes.try_into().expect("8-byte read"));
        self.set_reg(rt, value, false);
        Ok(())
    }

    fn str_unsigned(&mut self, insn: u32) -> Result<(), BackendError> {
        let imm = (((insn >> 10) & 0xFFF) as u64) * 8;
        let rn = (insn >> 5) & 0x1F;
        let rt = insn & 0x1F;
        let addr = self.reg(rn, true).wrapping_add(imm);
        let value = self.reg(rt, false);
        self.guest_write(addr, &value.to_le_bytes())
    }

    fn fsqrt_s(&mut self, insn: u32) {
        let rn = ((insn >> 5) & 0x1F) as usize;
        let rd = (insn & 0x1F) as usize;
        let input = self.v[rn].f32_lane(0);

        let result_bits = if input.is_nan() {
            let bits = input.to_bits();
            if bits & 0x0040_0000 == 0 {
                self.fpsr |= tandem_arch::Fpsr::IOC;
            }
            if self.fpcr.default_nan() {
                DEFAULT_NAN_F32
            } else {
                bits | 0x0040_0000
            }
        } else if input < 0.0 {
            self.fpsr |= tandem_arch::Fpsr::IOC;
            DEFAULT_NAN_F32
        } else {
            input.sqrt().to_bits()
        };

        self.v[rd] = V128::from_e0(result_bits as u64);
    }

    fn fsqrt_d(&mut self, insn: u32) {
        let rn = ((insn >> 5) & 0x1F) as usize;
        let rd = (insn & 0x1F) as usize;
        let input = self.v[rn].f64_lane(0);

        let result_bits = if input.is_nan() {
            let bits = input.to_bits();
            if bits & 0x0008_0000_0000_0000 == 0 {
                self.fpsr |= tandem_arch::Fpsr::IOC;
            }
            if self.fpcr.default_nan() {
                DEFAULT_NAN_F64
            } else {
                bits | 0x0008_0000_0000_0000
            }
        } else if input < 0.0 {
            self.fpsr |= tandem_arch::Fpsr::IOC;
            DEFAULT_NAN_F64
        } else {
            input.sqrt().to_bits()
        };

        self.v[rd] = V128::from_e0(result_bits);
    }
}

#[cfg(test)]
mod tests {
    use crate::encode;
    use crate::Interp;
    use tandem_arch::{Fpsr, PStateFlag, V128};
    use tandem_backend::{
        BackendError, CpuBackend, MemoryPermission, ReferenceBackend, TranslatorBackend,
    };

    const CODE: u64 = 0x1000;
    const DATA: u64 = 0x2000;

    fn with_program(words: &[u32]) -> Interp {
        let mut cpu = Interp::new();
        cpu.map(CODE, 0x1000, MemoryPermission::READ | MemoryPermission::EXEC)
            .unwrap();
        cpu.map(DATA, 0x1000, MemoryPermission::READ | MemoryPermission::WRITE)
            .unwrap();
        let mut addr = CODE;
        for word in words {
            cpu.write_memory(addr, &word.to_le_bytes()).unwrap();
            addr += 4;
        }
        cpu.write_memory(addr, &encode::ret().to_le_bytes()).unwrap();
        cpu
    }

    #[test]
    fn adds_sets_overflow_on_signed_wrap() {
        let mut cpu = with_program(&[encode::adds_imm(0, 1, 1)]);
        cpu.set_gpr(1, 0x7FFF_FFFF_FFFF_FFFF);
        cpu.execute(CODE).unwrap();
        assert_eq!(cpu.gpr(0), 0x8000_0000_0000_0000);
        assert!(cpu.flag(PStateFlag::Overflow));
        assert!(cpu.flag(PStateFlag::Negative));
        assert!(!cpu.flag(PStateFlag::Carry));
        assert!(!cpu.flag(PStateFlag::Zero));
    }

    #[test]
    fn adds_sets_carry_on_unsigned_wrap() {
        let mut cpu = with_program(&[encode::adds_imm(0, 1, 1)]);
        cpu.set_gpr(1, u64::MAX);
        cpu.execute(CODE).unwrap();
        assert_eq!(cpu.gpr(0), 0);
        assert!(cpu.flag(PStateFlag::Carry));
        assert!(cpu.flag(PStateFlag::Zero));
        assert!(!cpu.flag(PStateFlag::Overflow));
    }

    #[test]
    fn subs_computes_borrow_and_overflow() {
        let mut cpu = with_program(&[encode::subs_imm(2, 3, 1)]);
        cpu.set_gpr(3, 0x8000_0000_0000_0000);
        cpu.execute(CODE).unwrap();
        assert_eq!(cpu.gpr(2), 0x7FFF_FFFF_FFFF_FFFF);
        assert!(cpu.flag(PStateFlag::Carry));
        assert!(cpu.flag(PStateFlag::Overflow));
        assert!(!cpu.flag(PStateFlag::Negative));
    }

    #[test]
    fn plain_add_leaves_flags_alone() {
        let mut cpu = with_program(&[encode::add_imm(0, 1, 7)]);
        cpu.set_gpr(1, 5);
        cpu.set_flag(PStateFlag::Carry, true);
        cpu.execute(CODE).unwrap();
        assert_eq!(cpu.gpr(0), 12);
        assert!(cpu.flag(PStateFlag::Carry));
        assert!(!cpu.flag(PStateFlag::Zero));
    }

    #[test]
    fn ldr_str_round_trip_through_guest_memory() {
        let mut cpu = with_program(&[encode::str_x(0, 1, 0), encode::ldr_x(2, 1, 0)]);
        cpu.set_gpr(0, 0x0123_4567_89AB_CDEF);
        cpu.set_gpr(1, DATA);
        cpu.execute(CODE).unwrap();
        assert_eq!(cpu.gpr(2), 0x0123_4567_89AB_CDEF);
        assert_eq!(
            cpu.read_memory(DATA, 8).unwrap(),
            0x0123_4567_89AB_CDEFu64.to_le_bytes()
        );
    }

    #[test]
    fn store_to_code_segment_faults() {
        let mut cpu = with_program(&[encode::str_x(0, 1, 0)]);
        cpu.set_gpr(1, CODE);
        let err = cpu.execute(CODE).unwrap_err();
        assert!(matches!(err, BackendError::Protection { addr, .. } if addr == CODE));
    }

    #[test]
    fn fsqrt_of_negative_is_default_nan_with_ioc() {
        let mut cpu = with_program(&[encode::fsqrt_s(0, 1)]);
        cpu.set_vreg(1, V128::scalar_f32(-4.0));
        cpu.execute(CODE).unwrap();
        assert_eq!(cpu.vreg(0).u32_lane(0), 0x7FC0_0000);
        assert!(cpu.fpsr().contains(Fpsr::IOC));
    }

    #[test]
    fn fsqrt_quiet_nan_propagates_without_ioc() {
        let mut cpu = with_program(&[encode::fsqrt_s(0, 1)]);
        cpu.set_vreg(1, V128::from_e0(0xFFC0_0000));
        cpu.execute(CODE).unwrap();
        assert!(cpu.vreg(0).f32_lane(0).is_nan());
        assert!(!cpu.fpsr().contains(Fpsr::IOC));
    }

    #[test]
    fn fsqrt_double_scalar_zeroes_upper_element() {
        let mut cpu = with_program(&[encode::fsqrt_d(0, 1)]);
        cpu.set_vreg(1, V128::from_parts(9.0f64.to_bits(), 0xAAAA));
        cpu.execute(CODE).unwrap();
        assert_eq!(cpu.vreg(0), V128::scalar_f64(3.0));
    }

    #[test]
    fn counted_stepping_stops_short_of_ret() {
        let mut cpu = with_program(&[encode::add_imm(0, 0, 1), encode::add_imm(0, 0, 1)]);
        cpu.set_pc(CODE);
        cpu.run_for_count(2).unwrap();
        assert_eq!(cpu.gpr(0), 2);
        assert_eq!(cpu.pc(), CODE + 8);
    }

    #[test]
    fn execute_without_ret_reports_runaway() {
        let mut cpu = Interp::new();
        cpu.map(CODE, 0x1000, MemoryPermission::READ | MemoryPermission::EXEC)
            .unwrap();
        // Page full of ADDs, no RET; falls off the mapping end first.
        for i in 0..(0x1000 / 4) {
            cpu.write_memory(CODE + i * 4, &encode::add_imm(0, 0, 1).to_le_bytes())
                .unwrap();
        }
        let err = cpu.execute(CODE).unwrap_err();
        assert!(matches!(err, BackendError::Unmapped { .. }));
    }
}

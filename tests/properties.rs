//! Property tests for the CPU substrate.

use proptest::prelude::*;

use rv32_multitask::sim::mem::Mem;
use rv32_multitask::sim::reg::{Reg, RegFile};

const MEM_SIZE: u32 = 1 << 16;

proptest! {
    /// Little-endian round-trip holds for every value at every in-bounds
    /// address, aligned or not.
    #[test]
    fn prop_word_round_trip(value in any::<u32>(), addr in 0..MEM_SIZE - 3) {
        let mut mem = Mem::new(MEM_SIZE as usize);
        mem.write_word(addr, value).unwrap();
        prop_assert_eq!(mem.read_word(addr).unwrap(), value);
    }

    #[test]
    fn prop_half_round_trip(value in any::<u16>(), addr in 0..MEM_SIZE - 1) {
        let mut mem = Mem::new(MEM_SIZE as usize);
        mem.write_half(addr, value).unwrap();
        prop_assert_eq!(mem.read_half(addr).unwrap(), value);
    }

    /// A word write is observable byte by byte in little-endian order.
    #[test]
    fn prop_word_decomposes_into_le_bytes(value in any::<u32>(), addr in 0..MEM_SIZE - 3) {
        let mut mem = Mem::new(MEM_SIZE as usize);
        mem.write_word(addr, value).unwrap();

        let le = value.to_le_bytes();
        for (i, &expected) in le.iter().enumerate() {
            prop_assert_eq!(mem.read_byte(addr + i as u32).unwrap(), expected);
        }
    }

    /// Every access with any byte outside `[0, size)` fails.
    #[test]
    fn prop_out_of_bounds_always_fails(addr in MEM_SIZE - 3..=u32::MAX - 4) {
        let mut mem = Mem::new(MEM_SIZE as usize);
        prop_assert!(mem.read_word(addr).is_err());
        prop_assert!(mem.write_word(addr, 0).is_err());
    }

    /// Register 0 reads as zero no matter what is written to any register.
    #[test]
    fn prop_x0_always_reads_zero(writes in proptest::collection::vec((0u8..32, any::<u32>()), 0..64)) {
        let mut regs = RegFile::new();
        for (r, v) in writes {
            regs.write(Reg::try_from(r).unwrap(), v);
        }
        prop_assert_eq!(regs.read(Reg::try_from(0).unwrap()), 0);
    }

    /// Snapshot/restore reproduces the full register state.
    #[test]
    fn prop_context_round_trip(writes in proptest::collection::vec((0u8..32, any::<u32>()), 0..64), pc in any::<u32>()) {
        let mut regs = RegFile::new();
        for (r, v) in writes {
            regs.write(Reg::try_from(r).unwrap(), v);
        }
        regs.set_pc(pc);

        let ctx = regs.snapshot();
        let mut other = RegFile::new();
        other.restore(&ctx);
        prop_assert_eq!(other, regs);
    }
}

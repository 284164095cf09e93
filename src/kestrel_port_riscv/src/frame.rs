//! The register frame layouts of the port
use kestrel_portkit::{FrameDescriptor, FrameKind, FrameLayout, RegisterSlot};
use seq_macro::seq;

/// `ra`, `gp`, `tp`, `t0`-`t6`, `s0`-`s11`, `a0`-`a7` (every register but
/// `zero` and `sp`), `xepc`, `xstatus`
const INTERRUPTED_INT_SLOTS: [RegisterSlot; 32] = seq!(N in 3..32 {
    [
        RegisterSlot::Int(1),
        #( RegisterSlot::Int(N), )*
        RegisterSlot::Pc,
        RegisterSlot::Status,
    ]
});

/// `ft0`-`ft11`, `fs0`-`fs11`, `fa0`-`fa7`, `fcsr`
const INTERRUPTED_FP_SLOTS: [RegisterSlot; 33] = seq!(N in 0..32 {
    [
        #( RegisterSlot::Float(N), )*
        RegisterSlot::FloatStatus,
    ]
});

/// `ra`, `s0`-`s11`, `a0`, `pc`
const COOPERATIVE_INT_SLOTS: [RegisterSlot; 15] = seq!(N in 18..28 {
    [
        RegisterSlot::Int(1),
        RegisterSlot::Int(8),
        RegisterSlot::Int(9),
        #( RegisterSlot::Int(N), )*
        RegisterSlot::Int(10),
        RegisterSlot::Pc,
    ]
});

/// `fs0`-`fs11`, `fcsr`
const COOPERATIVE_FP_SLOTS: [RegisterSlot; 13] = seq!(N in 18..28 {
    [
        RegisterSlot::Float(8),
        RegisterSlot::Float(9),
        #( RegisterSlot::Float(N), )*
        RegisterSlot::FloatStatus,
    ]
});

/// Get the frame layouts. `include_fp` selects whether the floating-point
/// registers are saved as part of a frame.
pub const fn descriptor(include_fp: bool) -> FrameDescriptor {
    FrameDescriptor {
        interrupted: FrameLayout {
            kind: FrameKind::Interrupted,
            int_slots: &INTERRUPTED_INT_SLOTS,
            fp_slots: &INTERRUPTED_FP_SLOTS,
            include_fp,
        },
        cooperative: FrameLayout {
            kind: FrameKind::Cooperative,
            int_slots: &COOPERATIVE_INT_SLOTS,
            fp_slots: &COOPERATIVE_FP_SLOTS,
            include_fp,
        },
    }
}

/// The frame layouts for the current build configuration (the `fp` feature).
pub const FRAME: FrameDescriptor = descriptor(cfg!(feature = "fp"));

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_portkit::{regs::SP, RegisterFile, StackRegion, STACK_ALIGN, WORD_SIZE};
    use quickcheck_macros::quickcheck;

    fn names(slots: impl Iterator<Item = RegisterSlot>) -> Vec<&'static str> {
        slots.map(RegisterSlot::name).collect()
    }

    #[test]
    fn interrupted_covers_everything_but_zero_and_sp() {
        let layout = descriptor(true).interrupted;
        for i in 0..32u8 {
            let expected = i != 0 && i as usize != SP;
            assert_eq!(
                layout.slots().any(|s| s == RegisterSlot::Int(i)),
                expected,
                "x{i}"
            );
            assert!(layout.slots().any(|s| s == RegisterSlot::Float(i)));
        }
        assert!(layout.slots().any(|s| s == RegisterSlot::Pc));
        assert!(layout.slots().any(|s| s == RegisterSlot::Status));
        assert!(layout.slots().any(|s| s == RegisterSlot::FloatStatus));
    }

    #[test]
    fn cooperative_is_callee_saved_set() {
        let without_fp = descriptor(false).cooperative;
        assert_eq!(
            names(without_fp.slots()),
            [
                "ra", "s0", "s1", "s2", "s3", "s4", "s5", "s6", "s7", "s8", "s9", "s10", "s11",
                "a0", "pc"
            ]
        );

        let with_fp = descriptor(true).cooperative;
        assert_eq!(
            names(with_fp.slots().skip(without_fp.slots().count())),
            [
                "fs0", "fs1", "fs2", "fs3", "fs4", "fs5", "fs6", "fs7", "fs8", "fs9", "fs10",
                "fs11", "fcsr"
            ]
        );
    }

    #[test]
    fn sizes() {
        for include_fp in [false, true] {
            let desc = descriptor(include_fp);
            for layout in [&desc.interrupted, &desc.cooperative] {
                assert_eq!(layout.frame_size() % STACK_ALIGN, 0);
            }
            assert!(desc.interrupted.frame_size() > desc.cooperative.frame_size());
        }
        // tag + 30 GPRs + pc + status
        assert!(descriptor(false).interrupted.frame_size() >= 33 * WORD_SIZE);
    }

    #[quickcheck]
    fn quickcheck_round_trip(seed: Vec<u64>, include_fp: bool, interrupted: bool) {
        let desc = descriptor(include_fp);
        let layout = if interrupted {
            &desc.interrupted
        } else {
            &desc.cooperative
        };

        let mut original = RegisterFile::ZERO;
        let mut values = seed.into_iter().chain(1..);
        for slot in layout.slots() {
            original.set_slot(slot, values.next().unwrap());
        }
        let mut storage = vec![0usize; 512];
        let mut region = StackRegion::new(&mut storage);
        let sp = region.aligned_top();
        let frame_sp = layout.save(&original, &mut region, sp).unwrap();

        let mut restored = RegisterFile::ZERO;
        assert_eq!(layout.restore(&region, frame_sp, &mut restored), Ok(sp));
        assert_eq!(restored, original);
    }
}

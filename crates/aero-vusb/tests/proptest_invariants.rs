mod util;

use aero_vusb::{isoc_frame_delta, PortBitmap, UsbSpeed};
use proptest::prelude::*;
use util::Immediate;

#[derive(Debug, Clone)]
enum Op {
    Attach(u8),
    AttachAny,
    Detach(u8),
    Reset(u8),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..10).prop_map(Op::Attach),
        Just(Op::AttachAny),
        (0u8..10).prop_map(Op::Detach),
        (0u8..10).prop_map(Op::Reset),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn frame_delta_matches_modular_distance(prev in any::<u32>(), step in 0u32..4096, bits in 1u8..=32) {
        let mask = if bits == 32 { u32::MAX } else { (1u32 << bits) - 1 };
        let step = step & mask;
        let prev = prev & mask;
        let new = prev.wrapping_add(step) & mask;
        prop_assert_eq!(isoc_frame_delta(Some(prev), new, bits), step);
        prop_assert!(isoc_frame_delta(Some(prev), new, bits) <= mask);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn port_bitmaps_track_live_devices(ops in prop::collection::vec(op(), 1..40)) {
        let mut hub = util::hub(8);
        let exposed = PortBitmap::first_n(8);
        for op in ops {
            let _ = match op {
                Op::Attach(port) => hub.attach_device(port, Immediate::new(UsbSpeed::Full).boxed()),
                Op::AttachAny => hub
                    .attach_device_any(Immediate::new(UsbSpeed::Full).boxed())
                    .map(|_| ()),
                Op::Detach(port) => hub.detach_device(port),
                Op::Reset(port) => hub.device_reset_sync(port, false),
            };

            let occupied = hub.occupied_ports();
            prop_assert_eq!(hub.available_ports(), exposed.difference(occupied));
            prop_assert!(occupied.difference(exposed).is_empty());
            for port in 0..8u8 {
                let live = hub.device(port).is_some_and(|d| d.state().is_live());
                prop_assert_eq!(occupied.contains(port), live, "port {}", port);
            }
        }
        prop_assert_eq!(hub.stats().attaches - hub.stats().detaches, u64::from(hub.occupied_ports().len()));
    }
}

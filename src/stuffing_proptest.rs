use proptest::prelude::*;

use crate::consumer::stuffing_probability;

proptest! {
    #[test]
    fn unity_rate_never_stuffs(frame_size in 1usize..=2048) {
        prop_assert_eq!(stuffing_probability(1.0, frame_size), 0.0);
    }

    #[test]
    fn probability_stays_within_unit_range(rate in -1.0f64..3.0, frame_size in 1usize..=2048) {
        let p = stuffing_probability(rate, frame_size);
        prop_assert!((0.0..=1.0).contains(&p), "p_stuff out of range: {p}");
    }

    #[test]
    fn probability_is_monotone_in_deviation_from_unity(
        frame_size in 1usize..=2048,
        small_dev in 0.0f64..0.5,
        extra in 0.0f64..0.5,
    ) {
        let bigger_dev = small_dev + extra;
        let p_small = stuffing_probability(1.0 + small_dev, frame_size);
        let p_big = stuffing_probability(1.0 + bigger_dev, frame_size);
        prop_assert!(p_big >= p_small - 1e-12, "p_stuff must grow with |rate - 1|: {p_small} -> {p_big}");
    }
}

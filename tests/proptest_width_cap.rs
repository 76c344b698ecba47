use proptest::prelude::*;
use still_relay::error::ConversionError;
use still_relay::media::convert::{check_frame_width, scale_filter};

proptest! {
    /// Frames at or under the cap are accepted, wider ones never are.
    #[test]
    fn accepts_exactly_frames_within_cap(width in 1u32..100_000, max in 1u32..10_000) {
        let verdict = check_frame_width(width, max);
        prop_assert_eq!(verdict.is_ok(), width <= max);
    }

    /// Rejections report the offending width and the cap.
    #[test]
    fn rejection_names_width_and_cap(max in 1u32..10_000, excess in 1u32..50_000) {
        let width = max.saturating_add(excess);
        match check_frame_width(width, max) {
            Err(ConversionError::Oversized { width: w, max: m }) => {
                prop_assert_eq!(w, width);
                prop_assert_eq!(m, max);
            }
            other => prop_assert!(false, "expected oversized, got {:?}", other),
        }
    }

    /// Raising the cap never turns an accepted frame into a rejected one.
    #[test]
    fn acceptance_is_monotonic_in_cap(width in 1u32..100_000, a in 1u32..10_000, b in 1u32..10_000) {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        if check_frame_width(width, lo).is_ok() {
            prop_assert!(check_frame_width(width, hi).is_ok());
        }
    }

    /// The filter always embeds the cap with an escaped comma.
    #[test]
    fn filter_embeds_cap(max in 1u32..100_000) {
        let filter = scale_filter(max);
        let expected = format!("min(1\\,{max}/iw)");
        prop_assert!(filter.starts_with("scale=iw*"));
        prop_assert!(filter.contains(&expected));
        prop_assert!(filter.ends_with(":-1"));
    }
}

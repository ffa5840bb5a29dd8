//! Offset-based framing of characteristic reads
//!
//! Values longer than one response are read with increasing offsets by the
//! remote stack (a long read). [`frame`] only slices; [`clamp_to_mtu`] is the
//! outer step that trims a fragment to one response on the current link.

use crate::protocol::max_read_payload;

/// One read response body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fragment<'a> {
    pub offset: usize,
    pub body: &'a [u8],
    /// Offset was beyond the value; answered as an empty success
    pub past_end: bool,
}

impl<'a> Fragment<'a> {
    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}

/// Slice `value` from `offset` to its end
pub fn frame(value: &[u8], offset: usize) -> Fragment<'_> {
    match value.get(offset..) {
        Some(body) => Fragment {
            offset,
            body,
            past_end: false,
        },
        None => Fragment {
            offset,
            body: &[],
            past_end: true,
        },
    }
}

/// Trim a fragment to what fits in one read response on a link with `mtu`
pub fn clamp_to_mtu(fragment: Fragment<'_>, mtu: u16) -> Fragment<'_> {
    let max = max_read_payload(mtu);
    Fragment {
        body: &fragment.body[..fragment.body.len().min(max)],
        ..fragment
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_frame_suffix() {
        let value = b"/ble/QmPeer";
        assert_eq!(frame(value, 0).body, &value[..]);
        assert_eq!(frame(value, 5).body, b"QmPeer");
        let end = frame(value, value.len());
        assert!(end.is_empty());
        assert!(!end.past_end);
    }

    #[test]
    fn test_frame_past_end_is_empty() {
        let value = b"/ble/QmPeer";
        let fragment = frame(value, value.len() + 5);
        assert!(fragment.is_empty());
        assert!(fragment.past_end);
    }

    #[test]
    fn test_clamp_to_mtu() {
        let value = vec![0xAB; 100];
        let fragment = clamp_to_mtu(frame(&value, 10), 23);
        assert_eq!(fragment.body.len(), 22);
        assert_eq!(fragment.offset, 10);

        // Short remainder is left alone
        let fragment = clamp_to_mtu(frame(&value, 90), 23);
        assert_eq!(fragment.body.len(), 10);
    }

    proptest! {
        #[test]
        fn prop_in_range_offset_returns_suffix(value in prop::collection::vec(any::<u8>(), 0..600), pick in any::<usize>()) {
            let offset = if value.is_empty() { 0 } else { pick % (value.len() + 1) };
            let fragment = frame(&value, offset);
            prop_assert_eq!(fragment.body, &value[offset..]);
            prop_assert!(!fragment.past_end);
        }

        #[test]
        fn prop_past_end_offset_is_empty(value in prop::collection::vec(any::<u8>(), 0..600), extra in 1usize..1000) {
            let fragment = frame(&value, value.len() + extra);
            prop_assert!(fragment.body.is_empty());
            prop_assert!(fragment.past_end);
        }

        #[test]
        fn prop_clamped_fragment_fits_mtu(value in prop::collection::vec(any::<u8>(), 0..600), mtu in 23u16..=517) {
            let fragment = clamp_to_mtu(frame(&value, 0), mtu);
            prop_assert!(fragment.body.len() <= mtu as usize - 1);
        }
    }
}

//! Property tests for framing, the Spb codec, backoff and queue bounds.

use std::collections::HashMap;
use std::time::Duration;

use proptest::prelude::*;
use stnet::codec::SpbCodec;
use stnet::connector::{backoff_delay, next_failure_count};
use stnet::protocol::{encode_frame, split_frame, FrameBuffer, FrameStatus, HEADER_SIZE};
use stnet::queue::BoundedQueue;
use stnet::spb_record;

const MAX: usize = 64 * 1024;

// ── framing ─────────────────────────────────────────────────

proptest! {
    /// A frame fed in arbitrary pieces yields exactly its payload.
    #[test]
    fn frame_survives_any_split(
        payload in proptest::collection::vec(any::<u8>(), 0..2048),
        cuts in proptest::collection::vec(any::<prop::sample::Index>(), 0..8),
    ) {
        let frame = encode_frame(&payload, MAX).unwrap();
        prop_assert_eq!(frame.len(), payload.len() + HEADER_SIZE);

        let mut points: Vec<usize> = cuts.iter().map(|i| i.index(frame.len() + 1)).collect();
        points.push(0);
        points.push(frame.len());
        points.sort_unstable();
        points.dedup();

        let mut carry = FrameBuffer::with_max_msg_size(MAX);
        let mut out = Vec::new();
        for pair in points.windows(2) {
            carry.extend(&frame[pair[0]..pair[1]]);
            while let FrameStatus::Complete { frame_len, payload } = split_frame(carry.as_slice(), MAX) {
                out.push(payload.to_vec());
                prop_assert_eq!(frame_len, frame.len());
                carry.advance(frame_len);
            }
        }

        prop_assert_eq!(out.len(), 1);
        prop_assert_eq!(&out[0][..], &payload[..]);
        prop_assert!(carry.is_empty());
    }

    /// `split_frame` consumes exactly one frame from a stream of frames.
    #[test]
    fn split_frame_consumes_header_plus_payload(
        payloads in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..256), 1..6),
    ) {
        let stream: Vec<u8> = payloads
            .iter()
            .flat_map(|p| encode_frame(p, MAX).unwrap())
            .collect();

        let mut rest = &stream[..];
        for payload in &payloads {
            match split_frame(rest, MAX) {
                FrameStatus::Complete { frame_len, payload: got } => {
                    prop_assert_eq!(frame_len, payload.len() + HEADER_SIZE);
                    prop_assert_eq!(got, &payload[..]);
                    rest = &rest[frame_len..];
                }
                other => prop_assert!(false, "unexpected {:?}", other),
            }
        }
        prop_assert!(rest.is_empty());
    }

    /// Every strict prefix of a frame is incomplete.
    #[test]
    fn prefixes_are_incomplete(payload in proptest::collection::vec(any::<u8>(), 0..128)) {
        let frame = encode_frame(&payload, MAX).unwrap();
        for end in 0..frame.len() {
            prop_assert_eq!(split_frame(&frame[..end], MAX), FrameStatus::Incomplete);
        }
    }
}

// ── Spb ─────────────────────────────────────────────────────

spb_record! {
    #[derive(Debug, Default, Clone, PartialEq)]
    struct Inner {
        [1] name: String,
        [2, required] level: i32,
    }
}

spb_record! {
    #[derive(Debug, Default, Clone, PartialEq)]
    struct Outer {
        [1] id: u64,
        [2] delta: i64,
        [3, required] label: String,
        [4] ratio: f64,
        [5] flags: Vec<u32>,
        [6] inner: Inner,
        [7] children: Vec<Inner>,
        [8] attrs: HashMap<String, i16>,
        [20] flag: bool,
    }
}

spb_record! {
    #[derive(Debug, Default, Clone, PartialEq)]
    struct OuterV2 {
        [1] id: u64,
        [2] delta: i64,
        [3, required] label: String,
        [4] ratio: f64,
        [5] flags: Vec<u32>,
        [6] inner: Inner,
        [7] children: Vec<Inner>,
        [8] attrs: HashMap<String, i16>,
        [20] flag: bool,
        [9] added: Vec<String>,
        [31] extra: Inner,
    }
}

fn inner() -> impl Strategy<Value = Inner> {
    (".{0,12}", any::<i32>()).prop_map(|(name, level)| Inner { name, level })
}

fn outer() -> impl Strategy<Value = Outer> {
    (
        any::<u64>(),
        any::<i64>(),
        ".{0,24}",
        any::<f64>().prop_filter("NaN never compares equal", |f| !f.is_nan()),
        proptest::collection::vec(any::<u32>(), 0..8),
        inner(),
        proptest::collection::vec(inner(), 0..4),
        proptest::collection::hash_map(".{0,6}", any::<i16>(), 0..4),
        any::<bool>(),
    )
        .prop_map(
            |(id, delta, label, ratio, flags, inner, children, attrs, flag)| Outer {
                id,
                delta,
                label,
                ratio,
                flags,
                inner,
                children,
                attrs,
                flag,
            },
        )
}

proptest! {
    #[test]
    fn spb_record_round_trip(value in outer()) {
        let bytes = SpbCodec::encode(&value);
        let decoded: Outer = SpbCodec::decode(&bytes).unwrap();
        prop_assert_eq!(decoded, value);
    }

    /// An older reader skips fields it does not know.
    #[test]
    fn spb_old_reader_skips_new_fields(
        value in outer(),
        added in proptest::collection::vec(".{0,8}", 0..4),
        extra in inner(),
    ) {
        let v2 = OuterV2 {
            id: value.id,
            delta: value.delta,
            label: value.label.clone(),
            ratio: value.ratio,
            flags: value.flags.clone(),
            inner: value.inner.clone(),
            children: value.children.clone(),
            attrs: value.attrs.clone(),
            flag: value.flag,
            added,
            extra,
        };
        let decoded: Outer = SpbCodec::decode(&SpbCodec::encode(&v2)).unwrap();
        prop_assert_eq!(decoded, value);
    }

    /// Decoding arbitrary bytes returns a result instead of panicking.
    #[test]
    fn spb_garbage_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
        let _ = SpbCodec::decode::<Outer>(&bytes);
    }
}

#[test]
fn spb_zero_fields_are_not_transmitted() {
    let empty = SpbCodec::encode(&Inner::default());
    let named = SpbCodec::encode(&Inner {
        name: "x".into(),
        level: 0,
    });
    // begin + required level + end; the name adds header, length and byte
    assert_eq!(named.len(), empty.len() + 3);
}

// ── backoff ─────────────────────────────────────────────────

proptest! {
    #[test]
    fn backoff_is_quadratic(k in 0u32..=30, base_ms in 1u64..1000) {
        let base = Duration::from_millis(base_ms);
        prop_assert_eq!(backoff_delay(k, base), base * k * k);
    }

    #[test]
    fn failure_counter_stays_bounded(start in 0u32..=30, steps in 0usize..200) {
        let mut k = start;
        for _ in 0..steps {
            k = next_failure_count(k);
            prop_assert!(k <= 30);
        }
    }
}

#[test]
fn failure_counter_wraps_on_31st_failure() {
    let mut k = 0;
    for _ in 0..30 {
        k = next_failure_count(k);
    }
    assert_eq!(k, 30);
    assert_eq!(next_failure_count(k), 10);
}

// ── queue bounds ────────────────────────────────────────────

proptest! {
    #[test]
    fn queue_never_exceeds_capacity(capacity in 1usize..32, ops in proptest::collection::vec(any::<bool>(), 0..200)) {
        let queue = BoundedQueue::new(capacity);
        let mut model = 0usize;
        for push in ops {
            if push {
                let accepted = queue.try_push(()).is_ok();
                prop_assert_eq!(accepted, model < capacity);
                if accepted {
                    model += 1;
                }
            } else {
                let popped = queue.try_pop().is_some();
                prop_assert_eq!(popped, model > 0);
                if popped {
                    model -= 1;
                }
            }
            prop_assert!(queue.len() <= capacity);
            prop_assert_eq!(queue.len(), model);
        }
    }
}

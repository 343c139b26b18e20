//! Randomized sweeps over the varint and string codecs.

use graph_pack::varint::*;
use graph_pack_buffers::{Reader, Writer};
use rand::Rng;

#[test]
fn random_ints_roundtrip() {
    let mut rng = rand::thread_rng();
    let mut w = Writer::new();
    let mut values = Vec::new();
    for _ in 0..10_000 {
        let v: i32 = rng.gen();
        values.push(v);
        write_c_int(&mut w, v);
    }
    let bytes = w.flush();
    let mut r = Reader::new(&bytes);
    for v in values {
        assert_eq!(read_c_int(&mut r).unwrap(), v);
    }
    assert_eq!(r.size(), 0);
}

#[test]
fn random_longs_roundtrip() {
    let mut rng = rand::thread_rng();
    let mut w = Writer::new();
    let mut values = Vec::new();
    for _ in 0..10_000 {
        // Mix magnitudes so every sentinel branch is exercised.
        let v: i64 = match rng.gen_range(0..4) {
            0 => rng.gen_range(-200..200),
            1 => rng.gen_range(-40_000..40_000),
            2 => rng.gen_range(i32::MIN as i64..i32::MAX as i64),
            _ => rng.gen(),
        };
        values.push(v);
        write_c_long(&mut w, v);
    }
    let bytes = w.flush();
    let mut r = Reader::new(&bytes);
    for v in values {
        assert_eq!(read_c_long(&mut r).unwrap(), v);
    }
}

#[test]
fn random_shorts_and_chars_roundtrip() {
    let mut rng = rand::thread_rng();
    for _ in 0..10_000 {
        let s: i16 = rng.gen();
        let c: u16 = rng.gen();
        let mut w = Writer::new();
        write_c_short(&mut w, s);
        write_c_char(&mut w, c);
        let bytes = w.flush();
        let mut r = Reader::new(&bytes);
        assert_eq!(read_c_short(&mut r).unwrap(), s);
        assert_eq!(read_c_char(&mut r).unwrap(), c);
    }
}

#[test]
fn random_doubles_roundtrip_bit_exact() {
    let mut rng = rand::thread_rng();
    for _ in 0..10_000 {
        let bits: u64 = rng.gen();
        let v = f64::from_bits(bits);
        let mut w = Writer::new();
        write_c_double(&mut w, v);
        let bytes = w.flush();
        let mut r = Reader::new(&bytes);
        assert_eq!(read_c_double(&mut r).unwrap().to_bits(), bits);
    }
}

#[test]
fn random_strings_roundtrip_both_forms() {
    let mut rng = rand::thread_rng();
    for _ in 0..500 {
        let len = rng.gen_range(0..200);
        let s: String = (0..len)
            .map(|_| {
                // Bias toward the interesting boundaries: ASCII, the
                // nibble alphabet, the 254/255 escapes, wide chars.
                match rng.gen_range(0..5) {
                    0 => rng.gen_range('0'..='9'),
                    1 => rng.gen_range('A'..='F'),
                    2 => rng.gen_range(' '..='~'),
                    3 => char::from_u32(rng.gen_range(0xf8..0x100)).unwrap(),
                    _ => char::from_u32(rng.gen_range(0x100..0xD7FF)).unwrap(),
                }
            })
            .collect();

        let mut w = Writer::new();
        write_string_utf(&mut w, &s);
        let bytes = w.flush();
        let mut r = Reader::new(&bytes);
        assert_eq!(read_string_utf(&mut r).unwrap(), s);

        let mut w = Writer::new();
        write_string_compressed(&mut w, &s);
        let bytes = w.flush();
        let mut r = Reader::new(&bytes);
        assert_eq!(read_string_compressed(&mut r).unwrap(), s);
    }
}

#[test]
fn ascii_compressed_form_is_at_most_one_byte_per_char() {
    let samples = [
        "the quick brown fox",
        "JSON/RPC transport frame",
        "0123456789",
        "",
    ];
    for s in samples {
        let mut w = Writer::new();
        write_string_compressed(&mut w, s);
        // One byte per character plus the length prefix.
        assert!(w.len() <= s.len() + 2, "oversized for {s:?}");
    }
}

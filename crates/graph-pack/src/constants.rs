//! Wire-format constants: tag bytes, reserved code ranges, the nibble
//! alphabet of the compressed string form.

/// Value is a member of the field's enumerated one-of set; body is one
/// index byte.
pub const ONE_OF: i8 = -18;
/// Boxed boolean `false`; empty body.
pub const BIG_BOOLEAN_FALSE: i8 = -17;
/// Boxed boolean `true`; empty body.
pub const BIG_BOOLEAN_TRUE: i8 = -16;
/// Boxed long; body is a long varint.
pub const BIG_LONG: i8 = -10;
/// Boxed integer; body is an int varint.
pub const BIG_INT: i8 = -9;
/// Back-reference that requests a fresh copy on read; body is the varint
/// stream position of the original.
pub const COPYHANDLE: i8 = -8;
/// Identity-preserving back-reference; body is the varint stream position
/// of the original.
pub const HANDLE: i8 = -7;
/// Enum constant; body is class code plus ordinal (or name in
/// cross-language mode).
pub const ENUM: i8 = -6;
/// Array value; body is array class code, length, elements.
pub const ARRAY: i8 = -5;
/// Concrete class equals the field's declared type; body follows directly.
pub const TYPED: i8 = -3;
/// Absent value; empty body.
pub const NULL: i8 = -1;
/// Concrete class differs from the declared type; body is class code then
/// object body.
pub const OBJECT: i8 = 0;

/// Tag bytes above `OBJECT` are prediction codes: `code - 1` indexes the
/// field's possible-classes table. The table is capped where the positive
/// byte range ends.
pub const MAX_PREDICTION: usize = 127;

/// Class-name registry: value written in place of a code when a class is
/// first named in a stream.
pub const NEW_CLASS: i32 = 0;
/// First code handed out by the class-name registry; lower values are
/// reserved.
pub const FIRST_CLASS_CODE: u32 = 3;

/// Compressed-array discriminators.
pub const COMPRESSED_DIFF: u8 = 0;
pub const COMPRESSED_VARINT: u8 = 1;
pub const COMPRESSED_THIN: u8 = 2;
pub const COMPRESSED_OFFSET_SHORT: u8 = 3;

/// Alphabet of the compressed string form's nibble runs. A run packs two
/// 4-bit indices into this table per byte.
pub const NIBBLE_ALPHABET: &[u8; 16] = b"0123456789ABCDEF";

/// Compressed string form escapes.
pub const STR_NIBBLE_RUN: u8 = 254;
pub const STR_TWO_BYTE: u8 = 255;

/// Default read-ahead hint for externalizable bodies.
pub const DEFAULT_READ_EXTERNAL_READ_AHEAD: usize = 5000;

/// Well-known class names seeded into every stream's class-name registry.
pub const BUILTIN_CLASSES: &[&str] = &[
    "String",
    "Byte",
    "Short",
    "Char",
    "Float",
    "Double",
    "boolean[]",
    "byte[]",
    "char[]",
    "short[]",
    "int[]",
    "long[]",
    "float[]",
    "double[]",
    "Object[]",
];

//! The fixed 64-entry alphabet of the 6-bit format.
//!
//! | codes  | bytes     |
//! |--------|-----------|
//! | 0–25   | `a`–`z`   |
//! | 26–51  | `A`–`Z`   |
//! | 52–61  | `0`–`9`   |
//! | 62     | space     |
//! | 63     | newline   |

/// Code → byte.  Index is the 6-bit code.
pub const ALPHABET: &[u8; 64] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789 \n";

/// Byte → 6-bit code, or `None` when the byte is outside the alphabet.
pub fn to_code(byte: u8) -> Option<u8> {
    match byte {
        b'a'..=b'z' => Some(byte - b'a'),
        b'A'..=b'Z' => Some(byte - b'A' + 26),
        b'0'..=b'9' => Some(byte - b'0' + 52),
        b' '        => Some(62),
        b'\n'       => Some(63),
        _           => None,
    }
}

/// 6-bit code → byte, or `None` when the code has no mapping.
pub fn from_code(code: u8) -> Option<u8> {
    ALPHABET.get(usize::from(code)).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_a_bijection() {
        for code in 0u8..64 {
            let byte = from_code(code).unwrap();
            assert_eq!(to_code(byte), Some(code), "byte {:?}", byte as char);
        }
        let mapped = (0u8..=255).filter(|&b| to_code(b).is_some()).count();
        assert_eq!(mapped, 64);
    }

    #[test]
    fn rejects_outside_alphabet() {
        assert_eq!(to_code(b'.'), None);
        assert_eq!(to_code(0xff), None);
        assert_eq!(from_code(64), None);
    }
}

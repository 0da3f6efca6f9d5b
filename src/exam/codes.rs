//! Verification-code generation
//!
//! Fixed-length codes from an alphabet with the visually ambiguous
//! characters (0/O, 1/I/L) removed, so codes survive being read aloud
//! or retyped from a printed certificate.

use rand::Rng;

/// Uppercase alphanumerics minus 0, O, 1, I, L
pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";

/// Generate one verification code
pub fn generate_code<R: Rng + ?Sized>(rng: &mut R, length: usize) -> String {
    (0..length)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

/// Canonical form for lookup: surrounding whitespace dropped, uppercased
pub fn normalize_code(raw: &str) -> String {
    raw.trim().to_ascii_uppercase()
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    #[test]
    fn test_length_and_alphabet() {
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..50 {
            let code = generate_code(&mut rng, 10);
            assert_eq!(code.len(), 10);
            assert!(code.bytes().all(|b| CODE_ALPHABET.contains(&b)));
        }
    }

    #[test]
    fn test_no_ambiguous_characters() {
        for forbidden in [b'0', b'O', b'1', b'I', b'L'] {
            assert!(!CODE_ALPHABET.contains(&forbidden));
        }
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize_code("  abCD23 "), "ABCD23");
    }
}

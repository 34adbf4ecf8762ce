//! Sealed images
//!
//! A sealed image is `01 DC 7F 01`, a 20-byte key, then the plain image
//! XOR-masked with the key repeated over its length.

use super::format::ImageError;

/// Sealed image magic
pub const SEAL_MAGIC: [u8; 4] = [0x01, 0xDC, 0x7F, 0x01];

/// Key length
pub const SEAL_KEY_LEN: usize = 20;

const SEAL_HEADER_LEN: usize = SEAL_MAGIC.len() + SEAL_KEY_LEN;

/// Whether `bytes` carry the seal magic
pub fn is_sealed(bytes: &[u8]) -> bool {
    bytes.starts_with(&SEAL_MAGIC)
}

fn mask(body: &[u8], key: &[u8]) -> Vec<u8> {
    body.iter()
        .zip(key.iter().cycle())
        .map(|(b, k)| b ^ k)
        .collect()
}

/// Recover the plain image
pub fn unseal(bytes: &[u8]) -> Result<Vec<u8>, ImageError> {
    if !is_sealed(bytes) {
        return Err(ImageError::BadMagic);
    }
    if bytes.len() < SEAL_HEADER_LEN {
        return Err(ImageError::SealTruncated(bytes.len()));
    }
    let key = &bytes[SEAL_MAGIC.len()..SEAL_HEADER_LEN];
    Ok(mask(&bytes[SEAL_HEADER_LEN..], key))
}

/// Seal a plain image with `key`
pub fn seal(image: &[u8], key: &[u8; SEAL_KEY_LEN]) -> Vec<u8> {
    let mut out = Vec::with_capacity(SEAL_HEADER_LEN + image.len());
    out.extend_from_slice(&SEAL_MAGIC);
    out.extend_from_slice(key);
    out.extend(mask(image, key));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unseal_recovers_image() {
        let key = [7u8; SEAL_KEY_LEN];
        let plain = b"AMOD\x01\x00 some body longer than the key itself".to_vec();
        let sealed = seal(&plain, &key);
        assert!(is_sealed(&sealed));
        assert_ne!(&sealed[SEAL_HEADER_LEN..], plain.as_slice());
        assert_eq!(unseal(&sealed).unwrap(), plain);
    }

    #[test]
    fn test_key_wraps_at_twenty_bytes() {
        let mut key = [0u8; SEAL_KEY_LEN];
        key[0] = 0xFF;
        let sealed = seal(&[0u8; 41], &key);
        let body = &sealed[SEAL_HEADER_LEN..];
        assert_eq!(body[0], 0xFF);
        assert_eq!(body[1], 0x00);
        assert_eq!(body[20], 0xFF);
        assert_eq!(body[40], 0xFF);
    }

    #[test]
    fn test_short_sealed_input() {
        assert!(matches!(
            unseal(&[0x01, 0xDC, 0x7F, 0x01, 1, 2]),
            Err(ImageError::SealTruncated(6))
        ));
        assert!(matches!(unseal(b"AMOD"), Err(ImageError::BadMagic)));
    }
}

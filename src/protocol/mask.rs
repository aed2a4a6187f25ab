//! Payload masking (RFC 6455 Section 5.3).
//!
//! XOR is its own inverse, so the same routines mask outbound payloads and
//! unmask inbound ones. `offset` is the position of the first byte within the
//! frame payload, which lets a payload be processed in chunks.

/// Copy `src` into `dst` while masking it, leaving `src` untouched.
///
/// `dst` must be at least as long as `src`; extra bytes are left as they were.
/// Returns the offset to pass for the chunk that follows.
#[inline]
pub fn mask_into(dst: &mut [u8], src: &[u8], mask: [u8; 4], offset: usize) -> usize {
    assert!(dst.len() >= src.len(), "mask destination too short");
    let key = rotate_key(mask, offset);
    let key_u32 = u32::from_ne_bytes(key);

    let mut dst_chunks = dst[..src.len()].chunks_exact_mut(4);
    let mut src_chunks = src.chunks_exact(4);
    for (d, s) in (&mut dst_chunks).zip(&mut src_chunks) {
        let val = u32::from_ne_bytes([s[0], s[1], s[2], s[3]]) ^ key_u32;
        d.copy_from_slice(&val.to_ne_bytes());
    }
    for (i, (d, s)) in dst_chunks
        .into_remainder()
        .iter_mut()
        .zip(src_chunks.remainder())
        .enumerate()
    {
        *d = s ^ key[i];
    }

    offset.wrapping_add(src.len())
}

/// Mask or unmask `data` in place.
///
/// Used only on buffers the engine owns, such as a payload just read off the
/// wire. Returns the offset to pass for the chunk that follows.
#[inline]
pub fn apply_mask(data: &mut [u8], mask: [u8; 4], offset: usize) -> usize {
    let key = rotate_key(mask, offset);
    let key_u32 = u32::from_ne_bytes(key);

    let mut chunks = data.chunks_exact_mut(4);
    for chunk in &mut chunks {
        let val = u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) ^ key_u32;
        chunk.copy_from_slice(&val.to_ne_bytes());
    }
    for (i, byte) in chunks.into_remainder().iter_mut().enumerate() {
        *byte ^= key[i];
    }

    offset.wrapping_add(data.len())
}

#[inline]
fn rotate_key(mask: [u8; 4], offset: usize) -> [u8; 4] {
    let mut key = mask;
    key.rotate_left(offset % 4);
    key
}

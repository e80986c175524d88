//! Pure helpers for the two upload-assembly modes (§4.2). Single-shot and
//! chunked both bottom out in the same `BlobStore` calls; this module only
//! holds the bits that don't need I/O so `handler.rs` stays about
//! orchestration, not arithmetic.

pub fn chunk_offset(chunk_index: u64, chunk_size: u64) -> u64 {
    chunk_index * chunk_size
}

pub fn hash_matches(bytes: &[u8], expected_hex: &str) -> bool {
    blake3::hash(bytes).to_hex().to_string().eq_ignore_ascii_case(expected_hex)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_are_index_times_size() {
        assert_eq!(chunk_offset(0, 4096), 0);
        assert_eq!(chunk_offset(3, 4096), 12288);
    }

    #[test]
    fn hash_check_is_case_insensitive() {
        let bytes = b"hello world";
        let hex = blake3::hash(bytes).to_hex().to_string();
        assert!(hash_matches(bytes, &hex));
        assert!(hash_matches(bytes, &hex.to_uppercase()));
        assert!(!hash_matches(bytes, "not-a-hash"));
    }
}

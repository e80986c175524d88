//! Pure, total functions from a raw engine result to an output format (§4.6).
//! Neither module performs I/O; both are safe to call directly from inside
//! `ResultCache::get_or_derive_format`'s single-flight lock.

pub mod json_merge;
pub mod srt;

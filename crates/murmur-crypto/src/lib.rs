//! Murmur credential primitives
//!
//! - argon2id password hashing for stored user credentials
//! - random opaque access-key tokens

pub mod keys;
pub mod password;

//! pixvault - Cryptographic Core
//!
//! Password-derived AES-256-GCM keys for photo payloads at rest.

pub mod keys;
pub mod aead;
pub mod session;

pub use keys::*;
pub use aead::*;
pub use session::KeySession;

//! `tdtp-envelope` — packet-level AES-256-GCM encryption (§3.6, §4.7) and the
//! `xzmercury` key-service client it's bound to.

pub mod codec;
pub mod keyservice;

pub use codec::{decrypt, encrypt, extract_uuid, EnvelopeKey};
pub use keyservice::KeyServiceClient;

//! Durable device identity for gateway authentication.
//!
//! Each installation owns a long-lived Ed25519 keypair. The public half is
//! hashed into a stable fingerprint that serves as the device id; the private
//! half never leaves this crate — callers receive signed assertions, not key
//! material.

mod encoding;
mod error;
mod payload;
mod store;

pub use {
    encoding::{decode_flexible, encode_key},
    error::IdentityError,
    payload::{AssertionInputs, SIGNING_V1, SIGNING_V2, signing_payload},
    store::{DeviceIdentity, DeviceIdentityStore, SignedAssertion, fingerprint},
};

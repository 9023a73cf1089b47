use thiserror::Error;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// PKCS#8 export of a freshly generated key failed. No identity is
    /// usable after this, so it is not recovered from.
    #[error("key export: {0}")]
    KeyExport(ed25519_dalek::pkcs8::Error),
}

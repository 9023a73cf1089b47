use std::{
    fs,
    path::PathBuf,
    sync::Mutex,
    time::{SystemTime, UNIX_EPOCH},
};

use {
    ed25519_dalek::{
        Signer, SigningKey,
        pkcs8::{DecodePrivateKey, EncodePrivateKey, spki::der::pem::LineEnding},
    },
    serde::{Deserialize, Serialize},
    sha2::{Digest, Sha256},
    tracing::{debug, info, warn},
};

use crate::{
    encoding::{decode_flexible, encode_key},
    error::IdentityError,
    payload::{AssertionInputs, signing_payload},
};

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Compute the canonical device fingerprint from raw public-key bytes.
pub fn fingerprint(public_key: &[u8]) -> String {
    Sha256::digest(public_key)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

// ── Persisted record ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdentityRecord {
    id: String,
    public_key: String,
    private_key_pem: String,
    created_at: u64,
    last_used_at: u64,
}

struct Loaded {
    record: IdentityRecord,
    signing_key: SigningKey,
}

// ── Public views ─────────────────────────────────────────────────────────────

/// Read-only view of the stored identity. Private key material stays inside
/// the store.
#[derive(Debug, Clone)]
pub struct DeviceIdentity {
    pub id: String,
    pub public_key: String,
    pub created_at: u64,
    pub last_used_at: u64,
}

/// A fresh signed assertion, ready to embed in a connect request.
#[derive(Debug, Clone)]
pub struct SignedAssertion {
    pub device_id: String,
    pub public_key: String,
    pub signature: String,
    pub signed_at: u64,
    pub nonce: Option<String>,
}

// ── Store ────────────────────────────────────────────────────────────────────

/// Owns the installation keypair file and every operation on it.
///
/// The file is read-modify-written on each sign (to bump `lastUsedAt`);
/// a single-process writer is assumed.
pub struct DeviceIdentityStore {
    path: PathBuf,
    state: Mutex<Option<Loaded>>,
}

impl DeviceIdentityStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            state: Mutex::new(None),
        }
    }

    /// Store rooted at the platform data directory.
    pub fn open_default() -> Self {
        let path = directories::ProjectDirs::from("", "", "pylon")
            .map(|d| d.data_dir().join("identity.json"))
            .unwrap_or_else(|| PathBuf::from(".pylon/identity.json"));
        Self::new(path)
    }

    /// Load the persisted identity, generating and persisting a new one if
    /// the record is absent or unusable. Missing or corrupt files are not
    /// errors — the identity is simply regenerated.
    pub fn get_or_create(&self) -> Result<DeviceIdentity, IdentityError> {
        let mut state = self.lock();
        let loaded = self.ensure_loaded(&mut state)?;
        Ok(DeviceIdentity {
            id: loaded.record.id.clone(),
            public_key: loaded.record.public_key.clone(),
            created_at: loaded.record.created_at,
            last_used_at: loaded.record.last_used_at,
        })
    }

    /// Sign an authentication assertion and bump `lastUsedAt`.
    pub fn sign(&self, inputs: &AssertionInputs<'_>) -> Result<SignedAssertion, IdentityError> {
        let mut state = self.lock();
        let loaded = self.ensure_loaded(&mut state)?;

        let payload = signing_payload(&loaded.record.id, inputs);
        let signature = loaded.signing_key.sign(payload.as_bytes());

        loaded.record.last_used_at = now_ms();
        self.persist(&loaded.record)?;

        Ok(SignedAssertion {
            device_id: loaded.record.id.clone(),
            public_key: loaded.record.public_key.clone(),
            signature: encode_key(&signature.to_bytes()),
            signed_at: inputs.signed_at_ms,
            nonce: inputs.nonce.map(String::from),
        })
    }

    // ── Internals ────────────────────────────────────────────────────────

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Loaded>> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn ensure_loaded<'a>(
        &self,
        state: &'a mut Option<Loaded>,
    ) -> Result<&'a mut Loaded, IdentityError> {
        if state.is_none() {
            *state = Some(self.load_or_generate()?);
        }
        match state.as_mut() {
            Some(loaded) => Ok(loaded),
            // ensure_loaded just stored Some above.
            None => unreachable!("identity state populated"),
        }
    }

    fn load_or_generate(&self) -> Result<Loaded, IdentityError> {
        match self.try_load() {
            Some(loaded) => Ok(loaded),
            None => self.generate(),
        }
    }

    /// Read and validate the on-disk record. Returns `None` for anything
    /// that should trigger regeneration.
    fn try_load(&self) -> Option<Loaded> {
        let raw = fs::read_to_string(&self.path).ok()?;
        let mut record: IdentityRecord = match serde_json::from_str(&raw) {
            Ok(record) => record,
            Err(e) => {
                warn!(path = %self.path.display(), "unreadable identity record: {e}");
                return None;
            },
        };
        let signing_key = match SigningKey::from_pkcs8_pem(&record.private_key_pem) {
            Ok(key) => key,
            Err(e) => {
                warn!(path = %self.path.display(), "invalid private key in identity record: {e}");
                return None;
            },
        };

        // The id and public key are always recomputed from key material —
        // stored values are advisory only.
        let public_bytes = signing_key.verifying_key().to_bytes();
        let canonical_id = fingerprint(&public_bytes);
        let mut rewrite = false;

        if record.id != canonical_id {
            info!(
                old = %record.id,
                new = %canonical_id,
                "migrating legacy device id to canonical fingerprint"
            );
            record.id = canonical_id;
            rewrite = true;
        }
        let stored_key_matches = decode_flexible(&record.public_key)
            .map(|bytes| bytes == public_bytes)
            .unwrap_or(false);
        if !stored_key_matches {
            record.public_key = encode_key(&public_bytes);
            rewrite = true;
        }

        if rewrite {
            if let Err(e) = self.persist(&record) {
                warn!("failed to rewrite migrated identity record: {e}");
            }
        }

        debug!(device = %record.id, "loaded device identity");
        Some(Loaded {
            record,
            signing_key,
        })
    }

    fn generate(&self) -> Result<Loaded, IdentityError> {
        let signing_key = SigningKey::from_bytes(&rand::random::<[u8; 32]>());
        let public_bytes = signing_key.verifying_key().to_bytes();

        let pem = signing_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(IdentityError::KeyExport)?;

        let now = now_ms();
        let record = IdentityRecord {
            id: fingerprint(&public_bytes),
            public_key: encode_key(&public_bytes),
            private_key_pem: pem.to_string(),
            created_at: now,
            last_used_at: now,
        };
        self.persist(&record)?;
        info!(device = %record.id, "generated new device identity");

        Ok(Loaded {
            record,
            signing_key,
        })
    }

    fn persist(&self, record: &IdentityRecord) -> Result<(), IdentityError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(record)?;
        fs::write(&self.path, data)?;
        Ok(())
    }
}

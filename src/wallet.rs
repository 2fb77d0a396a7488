//! Key generation and signing pipelines
//!
//! `generate` mints a keypair inside the module and persists only the
//! public identifiers. `sign` re-locates the module-resident keys from
//! a persisted record, signs a caller-hashed digest, and self-verifies
//! the signature before releasing it. No hashing happens here.

use std::sync::Arc;

use crate::config::ModuleConfig;
use crate::error::WalletError;
use crate::pkcs11::{KeypairSpec, ModuleGateway, ModuleSession, ObjectKind, SessionMode};
use crate::repository::{KeyRecord, KeyRecordStore};
use crate::session::{ActiveSession, SessionManager};

/// Bytes of module randomness behind each label pair.
const LABEL_SEED_LEN: usize = 32;

/// Uncompressed point: format marker plus two coordinates.
const UNCOMPRESSED_MARKER: u8 = 0x04;
const COORDINATE_LEN: usize = 32;
const POINT_LEN: usize = 1 + 2 * COORDINATE_LEN;

pub struct Wallet<G: ModuleGateway, S: KeyRecordStore> {
    sessions: SessionManager<G>,
    store: S,
}

impl<G, S> Wallet<G, S>
where
    G: ModuleGateway,
    S: KeyRecordStore,
{
    pub fn new(gateway: Arc<G>, config: ModuleConfig, store: S) -> Self {
        Self {
            sessions: SessionManager::new(gateway, config),
            store,
        }
    }

    /// Mint an EC keypair in the module and persist its public
    /// identifiers. Returns the raw uncompressed public point, hex
    /// encoded.
    pub async fn generate(&self) -> Result<String, WalletError> {
        let active = self.sessions.start(SessionMode::ReadWrite)?;
        let outcome = match self.mint_keypair(&active) {
            Ok(record) => {
                let persisted = self.store.create(&record).await;
                persisted.map(|_| record.ec_point)
            }
            Err(e) => Err(e),
        };
        let released = self.sessions.stop(active);
        let ec_point = outcome?;
        released?;
        tracing::info!(ec_point = %ec_point, "generated keypair");
        Ok(ec_point)
    }

    /// Session phase of generation. Synchronous, so no session borrow is
    /// ever live across an await; module sessions are `Send` but not
    /// `Sync`.
    fn mint_keypair(&self, active: &ActiveSession<G>) -> Result<KeyRecord, WalletError> {
        let session = active.session();

        // Both labels share one random suffix. Collisions across calls
        // are a birthday problem on 256 bits; labels are not deduplicated.
        let seed = session.generate_random(LABEL_SEED_LEN)?;
        let suffix = hex::encode(&seed);
        let public_label = format!("pub_{suffix}");
        let private_label = format!("priv_{suffix}");

        let (public_key, _private_key) = session.generate_ec_keypair(&KeypairSpec {
            ec_params: &self.sessions.config().ec_params,
            public_label: &public_label,
            private_label: &private_label,
        })?;

        let attribute = session.ec_point(public_key)?;
        let point = decode_ec_point(&attribute)?;

        Ok(KeyRecord {
            ec_point: hex::encode(point),
            private_key_id: private_label,
            public_key_id: public_label,
        })
    }

    /// Sign a caller-hashed digest with the key pair behind `ec_point`.
    /// The signature is verified against the public key object before it
    /// is returned; a mismatch is terminal. Returns `(r, s)` hex encoded.
    pub async fn sign(
        &self,
        ec_point: &str,
        digest_hex: &str,
    ) -> Result<(String, String), WalletError> {
        let record = self.store.find_one(ec_point).await?.ok_or_else(|| {
            WalletError::KeyNotFound(format!("no key material recorded for point {ec_point}"))
        })?;

        let active = self.sessions.start(SessionMode::ReadOnly)?;
        let outcome = self.sign_with(&active, &record, digest_hex);
        let released = self.sessions.stop(active);
        let signature = outcome?;
        released?;
        Ok(signature)
    }

    /// Session phase of signing, synchronous for the same reason as
    /// [`Wallet::mint_keypair`].
    fn sign_with(
        &self,
        active: &ActiveSession<G>,
        record: &KeyRecord,
        digest_hex: &str,
    ) -> Result<(String, String), WalletError> {
        let session = active.session();
        let private_key = find_unique(session, ObjectKind::PrivateKey, &record.private_key_id)?;
        let public_key = find_unique(session, ObjectKind::PublicKey, &record.public_key_id)?;

        let digest = decode_digest(digest_hex)?;

        let signature = session.sign(private_key, &digest)?;
        if signature.len() != 2 * COORDINATE_LEN {
            return Err(WalletError::Module(format!(
                "unexpected signature length: {} bytes",
                signature.len()
            )));
        }

        // Trust boundary: never release a signature the module's own
        // verify path rejects.
        if !session.verify(public_key, &digest, &signature)? {
            tracing::error!(ec_point = %record.ec_point, "signature failed self-verification");
            return Err(WalletError::SignatureIntegrity);
        }

        let (r, s) = signature.split_at(COORDINATE_LEN);
        Ok((hex::encode(r), hex::encode(s)))
    }
}

/// Resolve a label to exactly one module object. None or more than one
/// is a lookup failure.
fn find_unique<M: ModuleSession>(
    session: &M,
    kind: ObjectKind,
    label: &str,
) -> Result<M::Object, WalletError> {
    let handles = session.find_by_label(kind, label)?;
    match handles.as_slice() {
        [handle] => Ok(*handle),
        [] => Err(WalletError::KeyNotFound(format!(
            "module has no object labeled {label}"
        ))),
        _ => Err(WalletError::KeyNotFound(format!(
            "label {label} is ambiguous in the module"
        ))),
    }
}

fn decode_digest(digest_hex: &str) -> Result<Vec<u8>, WalletError> {
    if digest_hex.is_empty() {
        return Err(WalletError::InvalidDigest("digest is empty".into()));
    }
    hex::decode(digest_hex).map_err(|e| WalletError::InvalidDigest(e.to_string()))
}

/// Decode a CKA_EC_POINT attribute into the raw uncompressed point.
/// Modules normally wrap the point in a DER OCTET STRING; some return
/// it bare.
fn decode_ec_point(attribute: &[u8]) -> Result<&[u8], WalletError> {
    if attribute.len() == POINT_LEN && attribute[0] == UNCOMPRESSED_MARKER {
        return Ok(attribute);
    }

    let body = octet_string_body(attribute)?;
    if body.len() != POINT_LEN || body[0] != UNCOMPRESSED_MARKER {
        return Err(WalletError::Module(format!(
            "EC point has unexpected shape: {} bytes, first byte 0x{:02x}",
            body.len(),
            body.first().copied().unwrap_or(0)
        )));
    }
    Ok(body)
}

/// Minimal length-aware DER OCTET STRING reader: tag 0x04, short-form
/// or one/two-byte long-form length, body filling the rest exactly.
fn octet_string_body(der: &[u8]) -> Result<&[u8], WalletError> {
    let malformed = |detail: &str| {
        WalletError::Module(format!("EC point is not a valid OCTET STRING: {detail}"))
    };

    if der.len() < 2 {
        return Err(malformed("too short"));
    }
    if der[0] != 0x04 {
        return Err(malformed("wrong tag"));
    }

    let (length, header) = match der[1] {
        n if n < 0x80 => (n as usize, 2),
        0x81 => {
            if der.len() < 3 {
                return Err(malformed("truncated length"));
            }
            (der[2] as usize, 3)
        }
        0x82 => {
            if der.len() < 4 {
                return Err(malformed("truncated length"));
            }
            (((der[2] as usize) << 8) | der[3] as usize, 4)
        }
        _ => return Err(malformed("unsupported length form")),
    };

    let body = &der[header..];
    if body.len() != length {
        return Err(malformed("length mismatch"));
    }
    Ok(body)
}

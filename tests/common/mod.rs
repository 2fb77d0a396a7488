//! Software fake of the PKCS#11 module, shared by the pipeline and
//! handler tests. Keys are real p256 keys so signatures verify (or
//! fail to) the way module-produced ones would. The fake counts opens,
//! closes, and logins so tests can assert session hygiene.

#![allow(dead_code)]

use std::cell::Cell;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use p256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::elliptic_curve::rand_core::{OsRng, RngCore};

use hsm_wallet::config::ModuleConfig;
use hsm_wallet::error::WalletError;
use hsm_wallet::pkcs11::{KeypairSpec, ModuleGateway, ModuleSession, ObjectKind, SessionMode};

/// Digest from the end-to-end scenario, reused where any valid digest works.
pub const DIGEST: &str = "688787d8ff144c502c7f5cffaafe2cc588d86079f9de88304c26b0cb99ce91c6";

struct FakeObject {
    kind: ObjectKind,
    label: String,
    key: SigningKey,
}

pub struct FakeState {
    slots: usize,
    objects: Mutex<Vec<FakeObject>>,
    pub open_sessions: AtomicUsize,
    pub logins: AtomicUsize,
    pub logouts: AtomicUsize,
    pub fail_keygen: AtomicBool,
    pub fail_login: AtomicBool,
    pub corrupt_signatures: AtomicBool,
}

impl FakeState {
    /// Plant a second object carrying an existing label, making lookups
    /// by that label ambiguous.
    pub fn duplicate_label(&self, kind: ObjectKind, label: &str) {
        let mut objects = self.objects.lock().unwrap();
        let copy = objects
            .iter()
            .find(|object| object.kind == kind && object.label == label)
            .map(|object| FakeObject {
                kind: object.kind,
                label: object.label.clone(),
                key: object.key.clone(),
            })
            .expect("no object with that label");
        objects.push(copy);
    }
}

pub struct FakeModule {
    pub state: Arc<FakeState>,
}

impl FakeModule {
    pub fn new() -> Self {
        Self::with_slots(1)
    }

    pub fn with_slots(slots: usize) -> Self {
        Self {
            state: Arc::new(FakeState {
                slots,
                objects: Mutex::new(Vec::new()),
                open_sessions: AtomicUsize::new(0),
                logins: AtomicUsize::new(0),
                logouts: AtomicUsize::new(0),
                fail_keygen: AtomicBool::new(false),
                fail_login: AtomicBool::new(false),
                corrupt_signatures: AtomicBool::new(false),
            }),
        }
    }
}

impl ModuleGateway for FakeModule {
    type Session = FakeSession;

    fn slot_count(&self) -> Result<usize, WalletError> {
        Ok(self.state.slots)
    }

    fn open_session(
        &self,
        slot_index: usize,
        _mode: SessionMode,
    ) -> Result<FakeSession, WalletError> {
        assert!(
            slot_index < self.state.slots,
            "session manager must range-check the slot before opening"
        );
        self.state.open_sessions.fetch_add(1, Ordering::SeqCst);
        Ok(FakeSession {
            state: Arc::clone(&self.state),
            _not_sync: PhantomData,
        })
    }
}

pub struct FakeSession {
    state: Arc<FakeState>,
    // Module sessions are Send but not Sync; the fake matches so a
    // session borrow held across an await fails to compile here too.
    _not_sync: PhantomData<Cell<()>>,
}

impl ModuleSession for FakeSession {
    type Object = usize;

    fn login(&self, _pin: &str) -> Result<(), WalletError> {
        if self.state.fail_login.load(Ordering::SeqCst) {
            return Err(WalletError::Module("login refused".into()));
        }
        self.state.logins.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn logout(&self) -> Result<(), WalletError> {
        self.state.logouts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(self) -> Result<(), WalletError> {
        self.state.open_sessions.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    fn generate_random(&self, len: usize) -> Result<Vec<u8>, WalletError> {
        let mut bytes = vec![0u8; len];
        OsRng.fill_bytes(&mut bytes);
        Ok(bytes)
    }

    fn generate_ec_keypair(
        &self,
        spec: &KeypairSpec<'_>,
    ) -> Result<(usize, usize), WalletError> {
        if self.state.fail_keygen.load(Ordering::SeqCst) {
            return Err(WalletError::Module("key generation refused".into()));
        }

        let key = SigningKey::random(&mut OsRng);
        let mut objects = self.state.objects.lock().unwrap();

        let public = objects.len();
        objects.push(FakeObject {
            kind: ObjectKind::PublicKey,
            label: spec.public_label.to_string(),
            key: key.clone(),
        });
        let private = objects.len();
        objects.push(FakeObject {
            kind: ObjectKind::PrivateKey,
            label: spec.private_label.to_string(),
            key,
        });

        Ok((public, private))
    }

    fn ec_point(&self, key: usize) -> Result<Vec<u8>, WalletError> {
        let objects = self.state.objects.lock().unwrap();
        let object = objects
            .get(key)
            .ok_or_else(|| WalletError::Module("unknown object handle".into()))?;

        let point = VerifyingKey::from(&object.key).to_encoded_point(false);

        // DER OCTET STRING wrapper, the way SoftHSM stores CKA_EC_POINT.
        let mut wrapped = vec![0x04, point.as_bytes().len() as u8];
        wrapped.extend_from_slice(point.as_bytes());
        Ok(wrapped)
    }

    fn find_by_label(&self, kind: ObjectKind, label: &str) -> Result<Vec<usize>, WalletError> {
        let objects = self.state.objects.lock().unwrap();
        Ok(objects
            .iter()
            .enumerate()
            .filter(|(_, object)| object.kind == kind && object.label == label)
            .map(|(index, _)| index)
            .collect())
    }

    fn sign(&self, key: usize, digest: &[u8]) -> Result<Vec<u8>, WalletError> {
        let objects = self.state.objects.lock().unwrap();
        let object = objects
            .get(key)
            .ok_or_else(|| WalletError::Module("unknown object handle".into()))?;

        let signature: Signature = object
            .key
            .sign_prehash(digest)
            .map_err(|e| WalletError::Module(e.to_string()))?;

        let mut bytes = signature.to_bytes().to_vec();
        if self.state.corrupt_signatures.load(Ordering::SeqCst) {
            bytes[0] ^= 0xff;
        }
        Ok(bytes)
    }

    fn verify(&self, key: usize, digest: &[u8], signature: &[u8]) -> Result<bool, WalletError> {
        let objects = self.state.objects.lock().unwrap();
        let object = objects
            .get(key)
            .ok_or_else(|| WalletError::Module("unknown object handle".into()))?;

        let Ok(signature) = Signature::from_slice(signature) else {
            return Ok(false);
        };

        Ok(VerifyingKey::from(&object.key)
            .verify_prehash(digest, &signature)
            .is_ok())
    }
}

pub fn test_config(pin: Option<&str>) -> ModuleConfig {
    ModuleConfig {
        library: "fake".to_string(),
        slot: 0,
        pin: pin.map(str::to_string),
        // secp256r1, matching the software keys the fake produces
        ec_params: hex::decode("06082a8648ce3d030107").unwrap(),
    }
}

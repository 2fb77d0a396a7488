//! PKCS#11 module gateway
//!
//! The minimal capability surface the pipelines need from the module,
//! expressed as traits so tests can substitute a software fake, plus the
//! cryptoki-backed production implementation. Keys are identified by
//! their label and looked up each time.

use cryptoki::context::{CInitializeArgs, Pkcs11};
use cryptoki::error::{Error as Pkcs11Error, RvError};
use cryptoki::mechanism::Mechanism;
use cryptoki::object::{Attribute, AttributeType, KeyType, ObjectClass, ObjectHandle};
use cryptoki::session::{Session, UserType};
use cryptoki::types::AuthPin;

use crate::error::WalletError;

/// Access mode for a module session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    ReadOnly,
    ReadWrite,
}

/// Class of module-resident key object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    PublicKey,
    PrivateKey,
}

impl From<ObjectKind> for ObjectClass {
    fn from(kind: ObjectKind) -> Self {
        match kind {
            ObjectKind::PublicKey => ObjectClass::PUBLIC_KEY,
            ObjectKind::PrivateKey => ObjectClass::PRIVATE_KEY,
        }
    }
}

/// Attributes for a new EC keypair: curve parameters plus the two labels.
#[derive(Debug, Clone)]
pub struct KeypairSpec<'a> {
    pub ec_params: &'a [u8],
    pub public_label: &'a str,
    pub private_label: &'a str,
}

/// Process-wide handle to the module. Constructed once at startup.
pub trait ModuleGateway: Send + Sync + 'static {
    type Session: ModuleSession;

    /// Number of slots with a token present.
    fn slot_count(&self) -> Result<usize, WalletError>;

    /// Open a session on the given slot.
    fn open_session(
        &self,
        slot_index: usize,
        mode: SessionMode,
    ) -> Result<Self::Session, WalletError>;
}

/// One authenticated channel to a slot. Owned by a single pipeline
/// invocation and never pooled.
pub trait ModuleSession: Send {
    type Object: Copy + Send;

    fn login(&self, pin: &str) -> Result<(), WalletError>;
    fn logout(&self) -> Result<(), WalletError>;
    fn close(self) -> Result<(), WalletError>;

    /// Module-sourced randomness.
    fn generate_random(&self, len: usize) -> Result<Vec<u8>, WalletError>;

    /// Generate a token-persistent EC keypair. Returns the public handle
    /// first, then the private handle.
    fn generate_ec_keypair(
        &self,
        spec: &KeypairSpec<'_>,
    ) -> Result<(Self::Object, Self::Object), WalletError>;

    /// Read the CKA_EC_POINT attribute of a public key object, as stored
    /// by the module (normally a DER OCTET STRING wrapping the point).
    fn ec_point(&self, key: Self::Object) -> Result<Vec<u8>, WalletError>;

    /// Find all objects of the given class carrying the label.
    fn find_by_label(&self, kind: ObjectKind, label: &str)
    -> Result<Vec<Self::Object>, WalletError>;

    /// Raw ECDSA over a caller-hashed digest. The module returns the
    /// fixed-length `r || s` form, not DER.
    fn sign(&self, key: Self::Object, digest: &[u8]) -> Result<Vec<u8>, WalletError>;

    /// Raw ECDSA verification. `Ok(false)` means the module rejected the
    /// signature; `Err` means the operation itself failed.
    fn verify(
        &self,
        key: Self::Object,
        digest: &[u8],
        signature: &[u8],
    ) -> Result<bool, WalletError>;
}

// ==================== Cryptoki implementation ====================

/// Gateway backed by a loaded PKCS#11 library.
pub struct Pkcs11Gateway {
    pkcs11: Pkcs11,
}

impl Pkcs11Gateway {
    pub fn new(library_path: &str) -> Result<Self, WalletError> {
        let pkcs11 = Pkcs11::new(library_path)?;
        pkcs11.initialize(CInitializeArgs::OsThreads)?;
        Ok(Self { pkcs11 })
    }
}

impl ModuleGateway for Pkcs11Gateway {
    type Session = Pkcs11Session;

    fn slot_count(&self) -> Result<usize, WalletError> {
        Ok(self.pkcs11.get_slots_with_token()?.len())
    }

    fn open_session(
        &self,
        slot_index: usize,
        mode: SessionMode,
    ) -> Result<Self::Session, WalletError> {
        let slots = self.pkcs11.get_slots_with_token()?;
        let slot = slots.get(slot_index).copied().ok_or_else(|| {
            WalletError::Configuration(format!(
                "slot index {} is out of range of {} available slots",
                slot_index,
                slots.len()
            ))
        })?;

        let session = match mode {
            SessionMode::ReadOnly => self.pkcs11.open_ro_session(slot)?,
            SessionMode::ReadWrite => self.pkcs11.open_rw_session(slot)?,
        };

        Ok(Pkcs11Session { session })
    }
}

pub struct Pkcs11Session {
    session: Session,
}

impl ModuleSession for Pkcs11Session {
    type Object = ObjectHandle;

    fn login(&self, pin: &str) -> Result<(), WalletError> {
        self.session.login(UserType::User, Some(&AuthPin::new(pin.into())))?;
        Ok(())
    }

    fn logout(&self) -> Result<(), WalletError> {
        self.session.logout()?;
        Ok(())
    }

    fn close(self) -> Result<(), WalletError> {
        let _ = self.session.close();
        Ok(())
    }

    fn generate_random(&self, len: usize) -> Result<Vec<u8>, WalletError> {
        let mut bytes = vec![0u8; len];
        self.session.generate_random_slice(&mut bytes)?;
        Ok(bytes)
    }

    fn generate_ec_keypair(
        &self,
        spec: &KeypairSpec<'_>,
    ) -> Result<(Self::Object, Self::Object), WalletError> {
        let pub_template = vec![
            Attribute::Class(ObjectClass::PUBLIC_KEY),
            Attribute::KeyType(KeyType::EC),
            Attribute::Token(true),
            Attribute::Verify(true),
            Attribute::EcParams(spec.ec_params.to_vec()),
            Attribute::Label(spec.public_label.as_bytes().to_vec()),
        ];

        let priv_template = vec![
            Attribute::Class(ObjectClass::PRIVATE_KEY),
            Attribute::KeyType(KeyType::EC),
            Attribute::Token(true),
            Attribute::Private(true),
            Attribute::Sensitive(true),
            Attribute::Sign(true),
            Attribute::Label(spec.private_label.as_bytes().to_vec()),
        ];

        let (public, private) = self.session.generate_key_pair(
            &Mechanism::EccKeyPairGen,
            &pub_template,
            &priv_template,
        )?;

        Ok((public, private))
    }

    fn ec_point(&self, key: Self::Object) -> Result<Vec<u8>, WalletError> {
        let attrs = self.session.get_attributes(key, &[AttributeType::EcPoint])?;

        attrs
            .into_iter()
            .find_map(|attr| {
                if let Attribute::EcPoint(bytes) = attr {
                    Some(bytes)
                } else {
                    None
                }
            })
            .ok_or_else(|| WalletError::Module("module returned no EC point attribute".into()))
    }

    fn find_by_label(
        &self,
        kind: ObjectKind,
        label: &str,
    ) -> Result<Vec<Self::Object>, WalletError> {
        let template = vec![
            Attribute::Class(kind.into()),
            Attribute::Label(label.as_bytes().to_vec()),
        ];

        Ok(self.session.find_objects(&template)?)
    }

    fn sign(&self, key: Self::Object, digest: &[u8]) -> Result<Vec<u8>, WalletError> {
        Ok(self.session.sign(&Mechanism::Ecdsa, key, digest)?)
    }

    fn verify(
        &self,
        key: Self::Object,
        digest: &[u8],
        signature: &[u8],
    ) -> Result<bool, WalletError> {
        match self.session.verify(&Mechanism::Ecdsa, key, digest, signature) {
            Ok(()) => Ok(true),
            Err(Pkcs11Error::Pkcs11(
                RvError::SignatureInvalid | RvError::SignatureLenRange,
                _,
            )) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Key templates and key object lifecycle

use std::path::{Path, PathBuf};
use std::str::FromStr;

use tpm2::{
    Marshal, RsaKeyBits, Tpm2bData, Tpm2bPrivate, Tpm2bPublic, Tpm2bSensitiveCreate, TpmAlgId,
    TpmCc, TpmHt, TpmRequest, TpmaObject, TpmlPcrSelection, TpmsEccParms, TpmsRsaParms, TpmtPublic,
    TpmtPublicParms, TpmtPublicUnique, TpmtScheme, TpmtSymDef, Unmarshal,
};
use tpm_types::bin_to_hex;
use tracing::debug;

use crate::config::Config;
use crate::executor::Executor;
use crate::handles::{auth_value, check_handle, check_key_handle, Hierarchy};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyRole {
    StorageUnrestricted,
    StorageRestricted,
    SigningUnrestricted,
    SigningRestricted,
}

impl KeyRole {
    pub const ALL: [KeyRole; 4] = [
        KeyRole::StorageUnrestricted,
        KeyRole::StorageRestricted,
        KeyRole::SigningUnrestricted,
        KeyRole::SigningRestricted,
    ];

    /// Role bits as (sign, decrypt, restricted)
    fn usage(self) -> (bool, bool, bool) {
        match self {
            KeyRole::StorageUnrestricted => (false, true, false),
            KeyRole::StorageRestricted => (false, true, true),
            KeyRole::SigningUnrestricted => (true, false, false),
            KeyRole::SigningRestricted => (true, false, true),
        }
    }
}

impl FromStr for KeyRole {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "storage-u" => Ok(KeyRole::StorageUnrestricted),
            "storage-r" => Ok(KeyRole::StorageRestricted),
            "signing-u" => Ok(KeyRole::SigningUnrestricted),
            "signing-r" => Ok(KeyRole::SigningRestricted),
            _ => Err(format!("unknown key role: {s}")),
        }
    }
}

/// Caller adjustments to the default child attributes
/// (`fixedTPM | fixedParent`). Role bits are applied afterwards and always
/// win.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttributeOverrides {
    pub set: u32,
    pub clear: u32,
}

impl AttributeOverrides {
    fn apply(self, base: TpmaObject) -> TpmaObject {
        base.set(self.set).clear(self.clear)
    }
}

/// Object attributes for `role` on top of `base`
pub fn derive_attributes(role: KeyRole, base: TpmaObject) -> TpmaObject {
    let (sign, decrypt, restricted) = role.usage();
    let mut attrs = base
        .set(TpmaObject::SENSITIVE_DATA_ORIGIN | TpmaObject::USER_WITH_AUTH)
        .clear(
            TpmaObject::ADMIN_WITH_POLICY
                | TpmaObject::SIGN_ENCRYPT
                | TpmaObject::DECRYPT
                | TpmaObject::RESTRICTED,
        );
    if sign {
        attrs = attrs.set(TpmaObject::SIGN_ENCRYPT);
    }
    if decrypt {
        attrs = attrs.set(TpmaObject::DECRYPT);
    }
    if restricted {
        attrs = attrs.set(TpmaObject::RESTRICTED);
    }
    attrs
}

fn role_parameters(role: KeyRole, algorithm: TpmAlgId, config: &Config) -> Result<TpmtPublicParms> {
    let hash = config.hash_alg();
    let symmetric = match role {
        KeyRole::StorageRestricted => TpmtSymDef::aes_128_cfb(),
        _ => TpmtSymDef::null(),
    };
    let parameters = match algorithm {
        TpmAlgId::Rsa => {
            let scheme = match role {
                KeyRole::SigningRestricted => TpmtScheme::rsassa(hash),
                _ => TpmtScheme::null(),
            };
            TpmtPublicParms::Rsa(TpmsRsaParms {
                symmetric,
                scheme,
                key_bits: RsaKeyBits::Rsa2048.to_u16(),
                exponent: 0,
            })
        }
        TpmAlgId::Ecc => {
            let (scheme, kdf) = match role {
                KeyRole::SigningRestricted => (TpmtScheme::ecdsa(hash), TpmtScheme::mgf1(hash)),
                _ => (TpmtScheme::null(), TpmtScheme::null()),
            };
            TpmtPublicParms::Ecc(TpmsEccParms {
                symmetric,
                scheme,
                curve_id: config.ecc_curve.curve().to_u16(),
                kdf,
            })
        }
        other => {
            return Err(Error::ValueRejected(format!(
                "no key template for algorithm {other:?}"
            )))
        }
    };
    Ok(parameters)
}

/// Public area template for a key of `role`. Attributes start from
/// `fixedTPM | fixedParent`; use [`derive_attributes`] to rebuild them from
/// another base.
pub fn build_public_template(
    role: KeyRole,
    algorithm: TpmAlgId,
    config: &Config,
) -> Result<TpmtPublic> {
    let parameters = role_parameters(role, algorithm, config)?;
    let unique = match parameters {
        TpmtPublicParms::Rsa(_) => TpmtPublicUnique::Rsa(Vec::new()),
        TpmtPublicParms::Ecc(_) => TpmtPublicUnique::Ecc(Vec::new(), Vec::new()),
    };
    Ok(TpmtPublic {
        type_alg: algorithm,
        name_alg: config.hash_alg(),
        object_attributes: derive_attributes(role, child_base()),
        auth_policy: Default::default(),
        parameters,
        unique,
    })
}

fn child_base() -> TpmaObject {
    TpmaObject::new().with_fixed_tpm().with_fixed_parent()
}

/// Template for a primary: built for `role`, then forced to a
/// storage-class restricted decryption key.
pub fn primary_template(role: KeyRole, algorithm: TpmAlgId, config: &Config) -> Result<TpmtPublic> {
    let mut template = build_public_template(role, algorithm, config)?;
    template.object_attributes = template
        .object_attributes
        .set(
            TpmaObject::FIXED_TPM
                | TpmaObject::FIXED_PARENT
                | TpmaObject::NO_DA
                | TpmaObject::RESTRICTED
                | TpmaObject::DECRYPT,
        )
        .clear(TpmaObject::SIGN_ENCRYPT);
    if role != KeyRole::StorageRestricted {
        template.parameters = role_parameters(KeyRole::StorageRestricted, algorithm, config)?;
    }
    Ok(template)
}

/// Where freshly created key blobs go. The public blob is written first so
/// that a lone private blob on disk always means an interrupted write.
#[derive(Debug, Clone, Default)]
pub struct BlobSink {
    pub public: Option<PathBuf>,
    pub private: Option<PathBuf>,
}

impl BlobSink {
    pub fn none() -> Self {
        Self::default()
    }

    fn store(&self, public: &Tpm2bPublic, private: Option<&Tpm2bPrivate>) -> Result<()> {
        if let Some(path) = &self.public {
            fs_err::write(path, public.to_bytes())?;
            debug!("wrote public blob to {}", path.display());
        }
        if let (Some(path), Some(private)) = (&self.private, private) {
            fs_err::write(path, private.to_bytes())?;
            debug!("wrote private blob to {}", path.display());
        }
        Ok(())
    }
}

/// Blobs of a created child key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPair {
    pub private: Tpm2bPrivate,
    pub public: Tpm2bPublic,
}

fn read_blob<T: Unmarshal>(path: &Path) -> Result<T> {
    let data = fs_err::read(path)?;
    T::from_bytes(&data)
        .map_err(|e| Error::ValueRejected(format!("{} is not a key blob: {e:#}", path.display())))
}

/// Hex encoding of a stored key blob
pub fn read_blob_hex(path: impl AsRef<Path>) -> Result<String> {
    Ok(bin_to_hex(&fs_err::read(path.as_ref())?))
}

fn creation_params(request: TpmRequest, key_auth: &[u8], template: &TpmtPublic) -> TpmRequest {
    request
        .param(&Tpm2bSensitiveCreate::with_auth(key_auth))
        .param(&Tpm2bPublic::from_template(template))
        .param(&Tpm2bData::empty())
        .param(&TpmlPcrSelection::default())
}

impl Executor {
    /// Create a primary key under `hierarchy`
    pub fn create_primary(
        &mut self,
        hierarchy: Hierarchy,
        role: KeyRole,
        hierarchy_password: Option<&str>,
        key_password: Option<&str>,
        sink: &BlobSink,
    ) -> Result<(u32, Tpm2bPublic)> {
        let template = primary_template(role, self.config().asym_algorithm.alg(), self.config())?;
        let request = TpmRequest::new(TpmCc::CreatePrimary)
            .handle(hierarchy.handle())
            .password(auth_value(hierarchy_password)?);
        let request = creation_params(request, auth_value(key_password)?, &template);

        let reply = self.execute(&request)?;
        let handle = reply.handle(0)?;
        let public = Tpm2bPublic::unmarshal(&mut reply.reader())?;
        debug!("created primary 0x{handle:08x} under {hierarchy:?}");
        sink.store(&public, None)?;
        Ok((handle, public))
    }

    /// Create a child key under a loaded parent
    pub fn create_child(
        &mut self,
        parent: u32,
        role: KeyRole,
        overrides: AttributeOverrides,
        parent_password: Option<&str>,
        key_password: Option<&str>,
        sink: &BlobSink,
    ) -> Result<KeyPair> {
        check_key_handle(parent)?;
        let algorithm = self.config().asym_algorithm.alg();
        let mut template = build_public_template(role, algorithm, self.config())?;
        template.object_attributes = derive_attributes(role, overrides.apply(child_base()));
        let request = TpmRequest::new(TpmCc::Create)
            .handle(parent)
            .password(auth_value(parent_password)?);
        let request = creation_params(request, auth_value(key_password)?, &template);

        let reply = self.execute(&request)?;
        let mut reader = reply.reader();
        let private = Tpm2bPrivate::unmarshal(&mut reader)?;
        let public = Tpm2bPublic::unmarshal(&mut reader)?;
        debug!("created {role:?} key under 0x{parent:08x}");
        sink.store(&public, Some(&private))?;
        Ok(KeyPair { private, public })
    }

    pub fn load(
        &mut self,
        parent: u32,
        parent_password: Option<&str>,
        private: &Tpm2bPrivate,
        public: &Tpm2bPublic,
    ) -> Result<u32> {
        check_key_handle(parent)?;
        let request = TpmRequest::new(TpmCc::Load)
            .handle(parent)
            .password(auth_value(parent_password)?)
            .param(private)
            .param(public);
        let handle = self.execute(&request)?.handle(0)?;
        debug!("loaded key 0x{handle:08x} under 0x{parent:08x}");
        Ok(handle)
    }

    /// Load a key from blob files written by a [`BlobSink`]
    pub fn load_from_files(
        &mut self,
        parent: u32,
        parent_password: Option<&str>,
        private_path: &Path,
        public_path: &Path,
    ) -> Result<u32> {
        let private: Tpm2bPrivate = read_blob(private_path)?;
        let public: Tpm2bPublic = read_blob(public_path)?;
        self.load(parent, parent_password, &private, &public)
    }

    /// Make a transient object persistent at `persistent`, or evict the
    /// persistent object `object` when both handles are equal.
    pub fn evict_control(
        &mut self,
        hierarchy: Hierarchy,
        hierarchy_password: Option<&str>,
        object: u32,
        persistent: u32,
    ) -> Result<()> {
        if hierarchy == Hierarchy::Endorsement {
            return Err(Error::ValueRejected(
                "evict control needs the owner or platform hierarchy".into(),
            ));
        }
        check_key_handle(object)?;
        check_handle(persistent, &[TpmHt::Persistent])?;
        if TpmHt::Persistent.matches(object) && object != persistent {
            return Err(Error::BadHandle(persistent));
        }
        let request = TpmRequest::new(TpmCc::EvictControl)
            .handle(hierarchy.handle())
            .handle(object)
            .password(auth_value(hierarchy_password)?)
            .param(&persistent);
        self.execute(&request)?;
        debug!("evict control 0x{object:08x} -> 0x{persistent:08x}");
        Ok(())
    }
}

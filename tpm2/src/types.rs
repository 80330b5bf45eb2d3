// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! TPM 2.0 data types

use anyhow::{anyhow, bail, Result};

use super::constants::*;
use super::marshal::*;

fn alg(raw: u16) -> Result<TpmAlgId> {
    TpmAlgId::from_u16(raw).ok_or_else(|| anyhow!("unknown algorithm: 0x{raw:04x}"))
}

macro_rules! tpm2b {
    ($($(#[$meta:meta])* $name:ident;)*) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Default, PartialEq, Eq)]
            pub struct $name {
                pub buffer: Vec<u8>,
            }

            impl $name {
                pub fn new(data: impl Into<Vec<u8>>) -> Self {
                    Self { buffer: data.into() }
                }

                pub fn empty() -> Self {
                    Self::default()
                }

                pub fn as_slice(&self) -> &[u8] {
                    &self.buffer
                }
            }

            impl Marshal for $name {
                fn marshal(&self, buf: &mut CommandBuffer) {
                    buf.put_tpm2b(&self.buffer);
                }
            }

            impl Unmarshal for $name {
                fn unmarshal(buf: &mut ResponseBuffer) -> Result<Self> {
                    Ok(Self { buffer: buf.get_tpm2b()? })
                }
            }
        )*
    };
}

tpm2b! {
    /// TPM2B_DIGEST
    Tpm2bDigest;
    /// TPM2B_DATA, used for qualifying data
    Tpm2bData;
    /// TPM2B_AUTH
    Tpm2bAuth;
    /// TPM2B_SENSITIVE_DATA
    Tpm2bSensitiveData;
    /// TPM2B_MAX_NV_BUFFER
    Tpm2bMaxNvBuffer;
    /// TPM2B_NAME
    Tpm2bName;
    /// TPM2B_PRIVATE, opaque wrapped private area
    Tpm2bPrivate;
    /// TPM2B_PUBLIC_KEY_RSA, RSA modulus or RSA operation payload
    Tpm2bPublicKeyRsa;
    /// TPM2B_ATTEST, marshalled TPMS_ATTEST as signed by the TPM
    Tpm2bAttest;
}

/// TPM2B_NONCE
pub type Tpm2bNonce = Tpm2bDigest;

impl Tpm2bData {
    /// sizeof(TPMT_HA): largest qualifying data a TPM accepts
    pub const MAX: usize = 2 + 64;
}

/// Highest PCR index addressable by a 3-octet selection bitmap
pub const PCR_SELECT_MAX: u32 = 23;

/// TPMS_PCR_SELECTION - PCR selection for a single hash algorithm
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TpmsPcrSelection {
    pub hash: TpmAlgId,
    pub pcr_select: Vec<u8>,
}

impl TpmsPcrSelection {
    /// Build a 3-octet bitmap. Indices above 23 are ignored; callers
    /// validate the range before getting here.
    pub fn new(hash: TpmAlgId, pcrs: &[u32]) -> Self {
        let mut pcr_select = vec![0u8; 3];
        for &pcr in pcrs.iter().filter(|&&p| p <= PCR_SELECT_MAX) {
            pcr_select[(pcr / 8) as usize] |= 1 << (pcr % 8);
        }
        Self { hash, pcr_select }
    }

    /// Selected indices in ascending order
    pub fn indices(&self) -> Vec<u32> {
        let mut out = Vec::new();
        for (byte_idx, byte) in self.pcr_select.iter().enumerate() {
            for bit in 0..8 {
                if byte & (1 << bit) != 0 {
                    out.push(byte_idx as u32 * 8 + bit);
                }
            }
        }
        out
    }
}

impl Marshal for TpmsPcrSelection {
    fn marshal(&self, buf: &mut CommandBuffer) {
        buf.put_u16(self.hash.to_u16());
        buf.put_u8(self.pcr_select.len() as u8);
        buf.put_bytes(&self.pcr_select);
    }
}

impl Unmarshal for TpmsPcrSelection {
    fn unmarshal(buf: &mut ResponseBuffer) -> Result<Self> {
        let hash = alg(buf.get_u16()?)?;
        let size = buf.get_u8()? as usize;
        let pcr_select = buf.get_bytes(size)?;
        Ok(Self { hash, pcr_select })
    }
}

/// TPML_PCR_SELECTION - List of PCR selections
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TpmlPcrSelection {
    pub pcr_selections: Vec<TpmsPcrSelection>,
}

impl TpmlPcrSelection {
    pub fn single(hash: TpmAlgId, pcrs: &[u32]) -> Self {
        Self {
            pcr_selections: vec![TpmsPcrSelection::new(hash, pcrs)],
        }
    }
}

impl Marshal for TpmlPcrSelection {
    fn marshal(&self, buf: &mut CommandBuffer) {
        buf.put_u32(self.pcr_selections.len() as u32);
        for sel in &self.pcr_selections {
            sel.marshal(buf);
        }
    }
}

impl Unmarshal for TpmlPcrSelection {
    fn unmarshal(buf: &mut ResponseBuffer) -> Result<Self> {
        let count = buf.get_u32()? as usize;
        let pcr_selections = (0..count)
            .map(|_| TpmsPcrSelection::unmarshal(buf))
            .collect::<Result<_>>()?;
        Ok(Self { pcr_selections })
    }
}

/// TPML_DIGEST - List of digests
#[derive(Debug, Clone, Default)]
pub struct TpmlDigest {
    pub digests: Vec<Tpm2bDigest>,
}

impl Unmarshal for TpmlDigest {
    fn unmarshal(buf: &mut ResponseBuffer) -> Result<Self> {
        let count = buf.get_u32()? as usize;
        let digests = (0..count)
            .map(|_| Tpm2bDigest::unmarshal(buf))
            .collect::<Result<_>>()?;
        Ok(Self { digests })
    }
}

/// TPMS_NV_PUBLIC - NV index public area
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TpmsNvPublic {
    pub nv_index: u32,
    pub name_alg: TpmAlgId,
    pub attributes: TpmaNv,
    pub auth_policy: Tpm2bDigest,
    pub data_size: u16,
}

impl TpmsNvPublic {
    pub fn new(nv_index: u32, name_alg: TpmAlgId, attributes: TpmaNv, data_size: u16) -> Self {
        Self {
            nv_index,
            name_alg,
            attributes,
            auth_policy: Tpm2bDigest::empty(),
            data_size,
        }
    }
}

impl Marshal for TpmsNvPublic {
    fn marshal(&self, buf: &mut CommandBuffer) {
        buf.put_u32(self.nv_index);
        buf.put_u16(self.name_alg.to_u16());
        buf.put_u32(self.attributes.0);
        self.auth_policy.marshal(buf);
        buf.put_u16(self.data_size);
    }
}

impl Unmarshal for TpmsNvPublic {
    fn unmarshal(buf: &mut ResponseBuffer) -> Result<Self> {
        Ok(Self {
            nv_index: buf.get_u32()?,
            name_alg: alg(buf.get_u16()?)?,
            attributes: TpmaNv(buf.get_u32()?),
            auth_policy: Tpm2bDigest::unmarshal(buf)?,
            data_size: buf.get_u16()?,
        })
    }
}

/// TPM2B_NV_PUBLIC
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tpm2bNvPublic {
    pub nv_public: TpmsNvPublic,
}

impl Marshal for Tpm2bNvPublic {
    fn marshal(&self, buf: &mut CommandBuffer) {
        buf.put_sized(&self.nv_public);
    }
}

impl Unmarshal for Tpm2bNvPublic {
    fn unmarshal(buf: &mut ResponseBuffer) -> Result<Self> {
        Ok(Self {
            nv_public: buf.get_sized()?,
        })
    }
}

/// TPMT_SYM_DEF / TPMT_SYM_DEF_OBJECT
///
/// The XOR variant carries a hash algorithm in place of key bits and has no
/// mode on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TpmtSymDef {
    Null,
    Xor { hash: TpmAlgId },
    Aes { key_bits: u16, mode: TpmAlgId },
}

impl TpmtSymDef {
    pub fn null() -> Self {
        TpmtSymDef::Null
    }

    pub fn aes_128_cfb() -> Self {
        TpmtSymDef::Aes {
            key_bits: 128,
            mode: TpmAlgId::Cfb,
        }
    }

    pub fn xor(hash: TpmAlgId) -> Self {
        TpmtSymDef::Xor { hash }
    }

    pub fn algorithm(&self) -> TpmAlgId {
        match self {
            TpmtSymDef::Null => TpmAlgId::Null,
            TpmtSymDef::Xor { .. } => TpmAlgId::Xor,
            TpmtSymDef::Aes { .. } => TpmAlgId::Aes,
        }
    }
}

impl Marshal for TpmtSymDef {
    fn marshal(&self, buf: &mut CommandBuffer) {
        buf.put_u16(self.algorithm().to_u16());
        match *self {
            TpmtSymDef::Null => {}
            TpmtSymDef::Xor { hash } => buf.put_u16(hash.to_u16()),
            TpmtSymDef::Aes { key_bits, mode } => {
                buf.put_u16(key_bits);
                buf.put_u16(mode.to_u16());
            }
        }
    }
}

impl Unmarshal for TpmtSymDef {
    fn unmarshal(buf: &mut ResponseBuffer) -> Result<Self> {
        match alg(buf.get_u16()?)? {
            TpmAlgId::Null => Ok(TpmtSymDef::Null),
            TpmAlgId::Xor => Ok(TpmtSymDef::Xor {
                hash: alg(buf.get_u16()?)?,
            }),
            TpmAlgId::Aes => Ok(TpmtSymDef::Aes {
                key_bits: buf.get_u16()?,
                mode: alg(buf.get_u16()?)?,
            }),
            other => bail!("unsupported symmetric algorithm {other:?}"),
        }
    }
}

/// A scheme selector followed by its hash when the scheme is not NULL.
///
/// Covers TPMT_RSA_SCHEME, TPMT_ECC_SCHEME, TPMT_SIG_SCHEME,
/// TPMT_RSA_DECRYPT and TPMT_KDF_SCHEME, which share this layout for every
/// scheme this crate uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TpmtScheme {
    pub scheme: TpmAlgId,
    pub hash_alg: Option<TpmAlgId>,
}

pub type TpmtRsaScheme = TpmtScheme;
pub type TpmtEccScheme = TpmtScheme;
pub type TpmtSigScheme = TpmtScheme;
pub type TpmtRsaDecrypt = TpmtScheme;
pub type TpmtKdfScheme = TpmtScheme;

impl TpmtScheme {
    pub fn null() -> Self {
        Self {
            scheme: TpmAlgId::Null,
            hash_alg: None,
        }
    }

    fn with_hash(scheme: TpmAlgId, hash: TpmAlgId) -> Self {
        Self {
            scheme,
            hash_alg: Some(hash),
        }
    }

    pub fn rsassa(hash: TpmAlgId) -> Self {
        Self::with_hash(TpmAlgId::RsaSsa, hash)
    }

    pub fn ecdsa(hash: TpmAlgId) -> Self {
        Self::with_hash(TpmAlgId::EcDsa, hash)
    }

    pub fn oaep(hash: TpmAlgId) -> Self {
        Self::with_hash(TpmAlgId::Oaep, hash)
    }

    pub fn mgf1(hash: TpmAlgId) -> Self {
        Self::with_hash(TpmAlgId::Mgf1, hash)
    }

    pub fn is_null(&self) -> bool {
        self.scheme == TpmAlgId::Null
    }
}

impl Marshal for TpmtScheme {
    fn marshal(&self, buf: &mut CommandBuffer) {
        buf.put_u16(self.scheme.to_u16());
        if let Some(hash) = self.hash_alg {
            buf.put_u16(hash.to_u16());
        }
    }
}

impl Unmarshal for TpmtScheme {
    fn unmarshal(buf: &mut ResponseBuffer) -> Result<Self> {
        let scheme = alg(buf.get_u16()?)?;
        if scheme == TpmAlgId::Null {
            return Ok(Self::null());
        }
        Ok(Self::with_hash(scheme, alg(buf.get_u16()?)?))
    }
}

/// TPMS_RSA_PARMS - RSA key parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TpmsRsaParms {
    pub symmetric: TpmtSymDef,
    pub scheme: TpmtRsaScheme,
    pub key_bits: u16,
    /// zero selects the default exponent 65537
    pub exponent: u32,
}

impl Marshal for TpmsRsaParms {
    fn marshal(&self, buf: &mut CommandBuffer) {
        self.symmetric.marshal(buf);
        self.scheme.marshal(buf);
        buf.put_u16(self.key_bits);
        buf.put_u32(self.exponent);
    }
}

impl Unmarshal for TpmsRsaParms {
    fn unmarshal(buf: &mut ResponseBuffer) -> Result<Self> {
        Ok(Self {
            symmetric: TpmtSymDef::unmarshal(buf)?,
            scheme: TpmtScheme::unmarshal(buf)?,
            key_bits: buf.get_u16()?,
            exponent: buf.get_u32()?,
        })
    }
}

/// TPMS_ECC_PARMS - ECC key parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TpmsEccParms {
    pub symmetric: TpmtSymDef,
    pub scheme: TpmtEccScheme,
    pub curve_id: u16,
    pub kdf: TpmtKdfScheme,
}

impl Marshal for TpmsEccParms {
    fn marshal(&self, buf: &mut CommandBuffer) {
        self.symmetric.marshal(buf);
        self.scheme.marshal(buf);
        buf.put_u16(self.curve_id);
        self.kdf.marshal(buf);
    }
}

impl Unmarshal for TpmsEccParms {
    fn unmarshal(buf: &mut ResponseBuffer) -> Result<Self> {
        Ok(Self {
            symmetric: TpmtSymDef::unmarshal(buf)?,
            scheme: TpmtScheme::unmarshal(buf)?,
            curve_id: buf.get_u16()?,
            kdf: TpmtScheme::unmarshal(buf)?,
        })
    }
}

/// TPMU_PUBLIC_PARMS - Public parameters union
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TpmtPublicParms {
    Rsa(TpmsRsaParms),
    Ecc(TpmsEccParms),
}

impl TpmtPublicParms {
    pub fn symmetric(&self) -> TpmtSymDef {
        match self {
            TpmtPublicParms::Rsa(p) => p.symmetric,
            TpmtPublicParms::Ecc(p) => p.symmetric,
        }
    }

    pub fn scheme(&self) -> TpmtScheme {
        match self {
            TpmtPublicParms::Rsa(p) => p.scheme,
            TpmtPublicParms::Ecc(p) => p.scheme,
        }
    }
}

impl Marshal for TpmtPublicParms {
    fn marshal(&self, buf: &mut CommandBuffer) {
        match self {
            TpmtPublicParms::Rsa(p) => p.marshal(buf),
            TpmtPublicParms::Ecc(p) => p.marshal(buf),
        }
    }
}

/// TPMU_PUBLIC_ID - Unique identifier union
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TpmtPublicUnique {
    Rsa(Vec<u8>),          // TPM2B_PUBLIC_KEY_RSA
    Ecc(Vec<u8>, Vec<u8>), // TPMS_ECC_POINT (x, y)
}

impl Marshal for TpmtPublicUnique {
    fn marshal(&self, buf: &mut CommandBuffer) {
        match self {
            TpmtPublicUnique::Rsa(n) => buf.put_tpm2b(n),
            TpmtPublicUnique::Ecc(x, y) => {
                buf.put_tpm2b(x);
                buf.put_tpm2b(y);
            }
        }
    }
}

/// TPMT_PUBLIC - Public area template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TpmtPublic {
    pub type_alg: TpmAlgId,
    pub name_alg: TpmAlgId,
    pub object_attributes: TpmaObject,
    pub auth_policy: Tpm2bDigest,
    pub parameters: TpmtPublicParms,
    pub unique: TpmtPublicUnique,
}

impl Marshal for TpmtPublic {
    fn marshal(&self, buf: &mut CommandBuffer) {
        buf.put_u16(self.type_alg.to_u16());
        buf.put_u16(self.name_alg.to_u16());
        buf.put_u32(self.object_attributes.0);
        self.auth_policy.marshal(buf);
        self.parameters.marshal(buf);
        self.unique.marshal(buf);
    }
}

impl Unmarshal for TpmtPublic {
    fn unmarshal(buf: &mut ResponseBuffer) -> Result<Self> {
        let type_alg = alg(buf.get_u16()?)?;
        let name_alg = alg(buf.get_u16()?)?;
        let object_attributes = TpmaObject(buf.get_u32()?);
        let auth_policy = Tpm2bDigest::unmarshal(buf)?;
        let (parameters, unique) = match type_alg {
            TpmAlgId::Rsa => (
                TpmtPublicParms::Rsa(TpmsRsaParms::unmarshal(buf)?),
                TpmtPublicUnique::Rsa(buf.get_tpm2b()?),
            ),
            TpmAlgId::Ecc => {
                let parms = TpmsEccParms::unmarshal(buf)?;
                let x = buf.get_tpm2b()?;
                let y = buf.get_tpm2b()?;
                (TpmtPublicParms::Ecc(parms), TpmtPublicUnique::Ecc(x, y))
            }
            other => bail!("unsupported object type {other:?}"),
        };
        Ok(Self {
            type_alg,
            name_alg,
            object_attributes,
            auth_policy,
            parameters,
            unique,
        })
    }
}

/// TPM2B_PUBLIC
///
/// The marshalled TPMT_PUBLIC is kept verbatim so that blobs returned by the
/// TPM are written back byte for byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tpm2bPublic {
    pub public_area: Vec<u8>,
}

impl Tpm2bPublic {
    pub fn from_template(template: &TpmtPublic) -> Self {
        Self {
            public_area: template.to_bytes(),
        }
    }

    pub fn decode(&self) -> Result<TpmtPublic> {
        TpmtPublic::from_bytes(&self.public_area)
    }
}

impl Marshal for Tpm2bPublic {
    fn marshal(&self, buf: &mut CommandBuffer) {
        buf.put_tpm2b(&self.public_area);
    }
}

impl Unmarshal for Tpm2bPublic {
    fn unmarshal(buf: &mut ResponseBuffer) -> Result<Self> {
        Ok(Self {
            public_area: buf.get_tpm2b()?,
        })
    }
}

/// TPMS_SENSITIVE_CREATE
#[derive(Debug, Clone, Default)]
pub struct TpmsSensitiveCreate {
    pub user_auth: Tpm2bAuth,
    pub data: Tpm2bSensitiveData,
}

impl Marshal for TpmsSensitiveCreate {
    fn marshal(&self, buf: &mut CommandBuffer) {
        self.user_auth.marshal(buf);
        self.data.marshal(buf);
    }
}

/// TPM2B_SENSITIVE_CREATE
#[derive(Debug, Clone, Default)]
pub struct Tpm2bSensitiveCreate {
    pub sensitive: TpmsSensitiveCreate,
}

impl Tpm2bSensitiveCreate {
    pub fn with_auth(auth: &[u8]) -> Self {
        Self {
            sensitive: TpmsSensitiveCreate {
                user_auth: Tpm2bAuth::new(auth),
                data: Tpm2bSensitiveData::empty(),
            },
        }
    }
}

impl Marshal for Tpm2bSensitiveCreate {
    fn marshal(&self, buf: &mut CommandBuffer) {
        buf.put_sized(&self.sensitive);
    }
}

/// TPMS_CLOCK_INFO
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TpmsClockInfo {
    pub clock: u64,
    pub reset_count: u32,
    pub restart_count: u32,
    pub safe: u8,
}

impl Unmarshal for TpmsClockInfo {
    fn unmarshal(buf: &mut ResponseBuffer) -> Result<Self> {
        Ok(Self {
            clock: buf.get_u64()?,
            reset_count: buf.get_u32()?,
            restart_count: buf.get_u32()?,
            safe: buf.get_u8()?,
        })
    }
}

/// TPMS_QUOTE_INFO
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TpmsQuoteInfo {
    pub pcr_select: TpmlPcrSelection,
    pub pcr_digest: Tpm2bDigest,
}

/// TPMU_ATTEST, decoded only for quotes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TpmuAttest {
    Quote(TpmsQuoteInfo),
    Other(Vec<u8>),
}

/// TPMS_ATTEST - Attestation structure returned by Quote
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TpmsAttest {
    pub magic: u32,
    pub attest_type: u16,
    pub qualified_signer: Tpm2bName,
    pub extra_data: Tpm2bData,
    pub clock_info: TpmsClockInfo,
    pub firmware_version: u64,
    pub attested: TpmuAttest,
}

impl Unmarshal for TpmsAttest {
    fn unmarshal(buf: &mut ResponseBuffer) -> Result<Self> {
        let magic = buf.get_u32()?;
        if magic != TPM_GENERATED_VALUE {
            bail!("attestation magic 0x{magic:08x} is not TPM_GENERATED");
        }
        let attest_type = buf.get_u16()?;
        let qualified_signer = Tpm2bName::unmarshal(buf)?;
        let extra_data = Tpm2bData::unmarshal(buf)?;
        let clock_info = TpmsClockInfo::unmarshal(buf)?;
        let firmware_version = buf.get_u64()?;
        let attested = if attest_type == TpmSt::AttestQuote.to_u16() {
            TpmuAttest::Quote(TpmsQuoteInfo {
                pcr_select: TpmlPcrSelection::unmarshal(buf)?,
                pcr_digest: Tpm2bDigest::unmarshal(buf)?,
            })
        } else {
            TpmuAttest::Other(buf.get_remaining())
        };
        Ok(Self {
            magic,
            attest_type,
            qualified_signer,
            extra_data,
            clock_info,
            firmware_version,
            attested,
        })
    }
}

/// TPMT_SIGNATURE
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TpmtSignature {
    Null,
    /// RSASSA or RSAPSS
    Rsa {
        scheme: TpmAlgId,
        hash: TpmAlgId,
        sig: Vec<u8>,
    },
    EcDsa {
        hash: TpmAlgId,
        r: Vec<u8>,
        s: Vec<u8>,
    },
}

impl Marshal for TpmtSignature {
    fn marshal(&self, buf: &mut CommandBuffer) {
        match self {
            TpmtSignature::Null => buf.put_u16(TpmAlgId::Null.to_u16()),
            TpmtSignature::Rsa { scheme, hash, sig } => {
                buf.put_u16(scheme.to_u16());
                buf.put_u16(hash.to_u16());
                buf.put_tpm2b(sig);
            }
            TpmtSignature::EcDsa { hash, r, s } => {
                buf.put_u16(TpmAlgId::EcDsa.to_u16());
                buf.put_u16(hash.to_u16());
                buf.put_tpm2b(r);
                buf.put_tpm2b(s);
            }
        }
    }
}

impl Unmarshal for TpmtSignature {
    fn unmarshal(buf: &mut ResponseBuffer) -> Result<Self> {
        match alg(buf.get_u16()?)? {
            TpmAlgId::Null => Ok(TpmtSignature::Null),
            scheme @ (TpmAlgId::RsaSsa | TpmAlgId::RsaPss) => Ok(TpmtSignature::Rsa {
                scheme,
                hash: alg(buf.get_u16()?)?,
                sig: buf.get_tpm2b()?,
            }),
            TpmAlgId::EcDsa => Ok(TpmtSignature::EcDsa {
                hash: alg(buf.get_u16()?)?,
                r: buf.get_tpm2b()?,
                s: buf.get_tpm2b()?,
            }),
            other => bail!("unsupported signature algorithm {other:?}"),
        }
    }
}

/// TPMT_HA - Hash value with algorithm
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TpmtHa {
    pub hash_alg: TpmAlgId,
    pub digest: Vec<u8>,
}

impl Marshal for TpmtHa {
    fn marshal(&self, buf: &mut CommandBuffer) {
        buf.put_u16(self.hash_alg.to_u16());
        buf.put_bytes(&self.digest);
    }
}

/// TPML_DIGEST_VALUES - List of digest values for PCR extend
#[derive(Debug, Clone)]
pub struct TpmlDigestValues {
    pub digests: Vec<TpmtHa>,
}

impl TpmlDigestValues {
    pub fn single(digest: TpmtHa) -> Self {
        Self {
            digests: vec![digest],
        }
    }
}

impl Marshal for TpmlDigestValues {
    fn marshal(&self, buf: &mut CommandBuffer) {
        buf.put_u32(self.digests.len() as u32);
        for d in &self.digests {
            d.marshal(buf);
        }
    }
}

/// TPMS_TAGGED_PROPERTY
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TpmsTaggedProperty {
    pub property: u32,
    pub value: u32,
}

/// TPMS_CAPABILITY_DATA restricted to TPM_CAP_TPM_PROPERTIES
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TpmPropertyData {
    pub more_data: bool,
    pub properties: Vec<TpmsTaggedProperty>,
}

impl Unmarshal for TpmPropertyData {
    fn unmarshal(buf: &mut ResponseBuffer) -> Result<Self> {
        let more_data = buf.get_u8()? != 0;
        let capability = buf.get_u32()?;
        if capability != TpmCap::TpmProperties.to_u32() {
            bail!("unexpected capability 0x{capability:08x}");
        }
        let count = buf.get_u32()? as usize;
        let properties = (0..count)
            .map(|_| {
                Ok(TpmsTaggedProperty {
                    property: buf.get_u32()?,
                    value: buf.get_u32()?,
                })
            })
            .collect::<Result<_>>()?;
        Ok(Self {
            more_data,
            properties,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcr_bitmap() {
        let sel = TpmsPcrSelection::new(TpmAlgId::Sha256, &[0, 7, 16, 23]);
        assert_eq!(sel.pcr_select, vec![0x81, 0x00, 0x81]);
        assert_eq!(sel.indices(), vec![0, 7, 16, 23]);
        assert_eq!(
            sel.to_bytes(),
            vec![0x00, 0x0B, 0x03, 0x81, 0x00, 0x81]
        );
    }

    #[test]
    fn test_xor_symdef_has_no_mode() {
        assert_eq!(
            TpmtSymDef::xor(TpmAlgId::Sha256).to_bytes(),
            vec![0x00, 0x0A, 0x00, 0x0B]
        );
        assert_eq!(
            TpmtSymDef::aes_128_cfb().to_bytes(),
            vec![0x00, 0x06, 0x00, 0x80, 0x00, 0x43]
        );
        assert_eq!(TpmtSymDef::null().to_bytes(), vec![0x00, 0x10]);
    }

    #[test]
    fn test_nv_public_sized() {
        let public = Tpm2bNvPublic {
            nv_public: TpmsNvPublic::new(0x01500001, TpmAlgId::Sha256, TpmaNv(0x00060006), 32),
        };
        let bytes = public.to_bytes();
        assert_eq!(&bytes[..2], &[0, 14]);
        assert_eq!(Tpm2bNvPublic::from_bytes(&bytes).unwrap(), public);
    }

    #[test]
    fn test_attest_quote() {
        let mut buf = CommandBuffer::new();
        buf.put_u32(TPM_GENERATED_VALUE);
        buf.put_u16(TpmSt::AttestQuote.to_u16());
        buf.put_tpm2b(&[0x00, 0x0B, 0xaa]);
        buf.put_tpm2b(b"nonce");
        buf.put_u64(1);
        buf.put_u32(2);
        buf.put_u32(3);
        buf.put_u8(1);
        buf.put_u64(0x2000);
        TpmlPcrSelection::single(TpmAlgId::Sha256, &[0]).marshal(&mut buf);
        buf.put_tpm2b(&[0x11; 32]);

        let attest = TpmsAttest::from_bytes(buf.as_bytes()).unwrap();
        assert_eq!(attest.extra_data.as_slice(), b"nonce");
        assert_eq!(attest.clock_info.restart_count, 3);
        match attest.attested {
            TpmuAttest::Quote(info) => assert_eq!(info.pcr_digest.buffer.len(), 32),
            TpmuAttest::Other(_) => panic!("expected quote info"),
        }
    }

    #[test]
    fn test_attest_rejects_foreign_magic() {
        let mut buf = CommandBuffer::new();
        buf.put_u32(0xdeadbeef);
        buf.put_u16(TpmSt::AttestQuote.to_u16());
        assert!(TpmsAttest::from_bytes(buf.as_bytes()).is_err());
    }

    #[test]
    fn test_ecdsa_signature() {
        let sig = TpmtSignature::EcDsa {
            hash: TpmAlgId::Sha256,
            r: vec![1, 2],
            s: vec![3],
        };
        let bytes = sig.to_bytes();
        assert_eq!(bytes, vec![0x00, 0x18, 0x00, 0x0B, 0, 2, 1, 2, 0, 1, 3]);
        assert_eq!(TpmtSignature::from_bytes(&bytes).unwrap(), sig);
    }

    #[test]
    fn test_public_decode() {
        let template = TpmtPublic {
            type_alg: TpmAlgId::Ecc,
            name_alg: TpmAlgId::Sha256,
            object_attributes: TpmaObject(0x00040072),
            auth_policy: Tpm2bDigest::empty(),
            parameters: TpmtPublicParms::Ecc(TpmsEccParms {
                symmetric: TpmtSymDef::null(),
                scheme: TpmtScheme::ecdsa(TpmAlgId::Sha256),
                curve_id: TpmEccCurve::NistP256.to_u16(),
                kdf: TpmtScheme::null(),
            }),
            unique: TpmtPublicUnique::Ecc(vec![], vec![]),
        };
        let blob = Tpm2bPublic::from_template(&template);
        assert_eq!(blob.decode().unwrap(), template);
    }

    #[test]
    fn test_property_data() {
        let mut buf = CommandBuffer::new();
        buf.put_u8(0);
        buf.put_u32(TpmCap::TpmProperties.to_u32());
        buf.put_u32(1);
        buf.put_u32(TpmPt::NvBufferMax.to_u32());
        buf.put_u32(1024);
        let data = TpmPropertyData::from_bytes(buf.as_bytes()).unwrap();
        assert_eq!(data.properties[0].value, 1024);
        assert!(!data.more_data);
    }
}

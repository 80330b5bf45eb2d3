// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! TPM 2.0 constants and command codes

/// TPM 2.0 Command Codes (TPM_CC)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum TpmCc {
    EvictControl = 0x00000120,
    NvUndefineSpace = 0x00000122,
    Clear = 0x00000126,
    NvDefineSpace = 0x0000012A,
    CreatePrimary = 0x00000131,
    NvWrite = 0x00000137,
    SelfTest = 0x00000143,
    Startup = 0x00000144,
    NvRead = 0x0000014E,
    Create = 0x00000153,
    Load = 0x00000157,
    Quote = 0x00000158,
    RsaDecrypt = 0x00000159,
    FlushContext = 0x00000165,
    NvReadPublic = 0x00000169,
    ReadPublic = 0x00000173,
    RsaEncrypt = 0x00000174,
    StartAuthSession = 0x00000176,
    GetCapability = 0x0000017A,
    GetRandom = 0x0000017B,
    PcrRead = 0x0000017E,
    PcrExtend = 0x00000182,
}

impl TpmCc {
    pub fn to_u32(self) -> u32 {
        self as u32
    }

    /// Name used in diagnostics, matching the TCG `TPM_CC_*` spelling.
    pub fn name(self) -> &'static str {
        match self {
            TpmCc::EvictControl => "CC_EvictControl",
            TpmCc::NvUndefineSpace => "CC_NV_UndefineSpace",
            TpmCc::Clear => "CC_Clear",
            TpmCc::NvDefineSpace => "CC_NV_DefineSpace",
            TpmCc::CreatePrimary => "CC_CreatePrimary",
            TpmCc::NvWrite => "CC_NV_Write",
            TpmCc::SelfTest => "CC_SelfTest",
            TpmCc::Startup => "CC_Startup",
            TpmCc::NvRead => "CC_NV_Read",
            TpmCc::Create => "CC_Create",
            TpmCc::Load => "CC_Load",
            TpmCc::Quote => "CC_Quote",
            TpmCc::RsaDecrypt => "CC_RSA_Decrypt",
            TpmCc::FlushContext => "CC_FlushContext",
            TpmCc::NvReadPublic => "CC_NV_ReadPublic",
            TpmCc::ReadPublic => "CC_ReadPublic",
            TpmCc::RsaEncrypt => "CC_RSA_Encrypt",
            TpmCc::StartAuthSession => "CC_StartAuthSession",
            TpmCc::GetCapability => "CC_GetCapability",
            TpmCc::GetRandom => "CC_GetRandom",
            TpmCc::PcrRead => "CC_PCR_Read",
            TpmCc::PcrExtend => "CC_PCR_Extend",
        }
    }

    /// Number of handles the TPM places in the response handle area.
    pub fn response_handle_count(self) -> usize {
        match self {
            TpmCc::CreatePrimary | TpmCc::Load | TpmCc::StartAuthSession => 1,
            _ => 0,
        }
    }
}

impl std::fmt::Display for TpmCc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Response codes the core and the channel need to recognise.
///
/// Full decoding into text lives in [`crate::rc`].
pub mod tpm_rc {
    pub const SUCCESS: u32 = 0x00000000;
    pub const INITIALIZE: u32 = 0x00000100;
    pub const FAILURE: u32 = 0x00000101;
    /// Format-1 TPM_RC_VALUE without parameter position
    pub const VALUE: u32 = 0x00000084;
    /// Format-1 TPM_RC_HANDLE without handle position
    pub const HANDLE: u32 = 0x0000008B;
    pub const NV_DEFINED: u32 = 0x0000014C;
    pub const NV_UNINITIALIZED: u32 = 0x0000014A;
}

/// TPM 2.0 Algorithm IDs (TPM_ALG_ID)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum TpmAlgId {
    Rsa = 0x0001,
    Sha1 = 0x0004,
    Aes = 0x0006,
    Mgf1 = 0x0007,
    KeyedHash = 0x0008,
    Xor = 0x000A,
    Sha256 = 0x000B,
    Sha384 = 0x000C,
    Sha512 = 0x000D,
    Null = 0x0010,
    RsaSsa = 0x0014,
    RsaPss = 0x0016,
    Oaep = 0x0017,
    EcDsa = 0x0018,
    Ecc = 0x0023,
    SymCipher = 0x0025,
    Cfb = 0x0043,
}

impl TpmAlgId {
    pub fn to_u16(self) -> u16 {
        self as u16
    }

    pub fn from_u16(v: u16) -> Option<Self> {
        match v {
            0x0001 => Some(TpmAlgId::Rsa),
            0x0004 => Some(TpmAlgId::Sha1),
            0x0006 => Some(TpmAlgId::Aes),
            0x0007 => Some(TpmAlgId::Mgf1),
            0x0008 => Some(TpmAlgId::KeyedHash),
            0x000A => Some(TpmAlgId::Xor),
            0x000B => Some(TpmAlgId::Sha256),
            0x000C => Some(TpmAlgId::Sha384),
            0x000D => Some(TpmAlgId::Sha512),
            0x0010 => Some(TpmAlgId::Null),
            0x0014 => Some(TpmAlgId::RsaSsa),
            0x0016 => Some(TpmAlgId::RsaPss),
            0x0017 => Some(TpmAlgId::Oaep),
            0x0018 => Some(TpmAlgId::EcDsa),
            0x0023 => Some(TpmAlgId::Ecc),
            0x0025 => Some(TpmAlgId::SymCipher),
            0x0043 => Some(TpmAlgId::Cfb),
            _ => None,
        }
    }

    /// Parse a hash bank name such as `sha256`
    pub fn from_hash_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "sha1" => Some(TpmAlgId::Sha1),
            "sha256" => Some(TpmAlgId::Sha256),
            "sha384" => Some(TpmAlgId::Sha384),
            "sha512" => Some(TpmAlgId::Sha512),
            _ => None,
        }
    }

    pub fn is_hash(self) -> bool {
        self.digest_size() != 0
    }

    pub fn digest_size(self) -> usize {
        match self {
            TpmAlgId::Sha1 => 20,
            TpmAlgId::Sha256 => 32,
            TpmAlgId::Sha384 => 48,
            TpmAlgId::Sha512 => 64,
            _ => 0,
        }
    }

    /// Label handed to callers alongside hex-encoded digests and quotes.
    pub fn label(self) -> &'static str {
        match self {
            TpmAlgId::Sha1 => "TPM_ALG_SHA1",
            TpmAlgId::Sha256 => "TPM_ALG_SHA256",
            TpmAlgId::Sha384 => "TPM_ALG_SHA384",
            _ => "NONE",
        }
    }
}

/// TPM 2.0 Handle Types (most significant octet of a handle)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TpmHt {
    Pcr = 0x00,
    NvIndex = 0x01,
    HmacSession = 0x02,
    PolicySession = 0x03,
    Permanent = 0x40,
    Transient = 0x80,
    Persistent = 0x81,
}

impl TpmHt {
    pub fn of(handle: u32) -> Option<Self> {
        match (handle >> 24) as u8 {
            0x00 => Some(TpmHt::Pcr),
            0x01 => Some(TpmHt::NvIndex),
            0x02 => Some(TpmHt::HmacSession),
            0x03 => Some(TpmHt::PolicySession),
            0x40 => Some(TpmHt::Permanent),
            0x80 => Some(TpmHt::Transient),
            0x81 => Some(TpmHt::Persistent),
            _ => None,
        }
    }

    /// Check whether `handle` carries this type tag
    pub fn matches(self, handle: u32) -> bool {
        (handle >> 24) as u8 == self as u8
    }
}

/// TPM 2.0 Permanent Handles
pub mod tpm_rh {
    pub const OWNER: u32 = 0x40000001;
    pub const NULL: u32 = 0x40000007;
    pub const PW: u32 = 0x40000009; // Password authorization
    pub const LOCKOUT: u32 = 0x4000000A;
    pub const ENDORSEMENT: u32 = 0x4000000B;
    pub const PLATFORM: u32 = 0x4000000C;
}

/// TPM 2.0 Session Types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TpmSe {
    Hmac = 0x00,
    Policy = 0x01,
    Trial = 0x03,
}

impl TpmSe {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x00 => Some(TpmSe::Hmac),
            0x01 => Some(TpmSe::Policy),
            0x03 => Some(TpmSe::Trial),
            _ => None,
        }
    }
}

/// TPM 2.0 Startup Types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum TpmSu {
    Clear = 0x0000,
    State = 0x0001,
}

impl TpmSu {
    pub fn to_u16(self) -> u16 {
        self as u16
    }
}

/// TPM 2.0 Capability Types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum TpmCap {
    Handles = 0x00000001,
    Commands = 0x00000002,
    Pcrs = 0x00000005,
    TpmProperties = 0x00000006,
}

impl TpmCap {
    pub fn to_u32(self) -> u32 {
        self as u32
    }
}

/// TPM 2.0 fixed property tags (TPM_PT)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum TpmPt {
    InputBuffer = 0x0000010D,
    MaxDigest = 0x00000120,
    NvBufferMax = 0x0000012C,
}

impl TpmPt {
    pub fn to_u32(self) -> u32 {
        self as u32
    }
}

/// TPM 2.0 Object Attributes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TpmaObject(pub u32);

impl TpmaObject {
    pub const FIXED_TPM: u32 = 1 << 1;
    pub const ST_CLEAR: u32 = 1 << 2;
    pub const FIXED_PARENT: u32 = 1 << 4;
    pub const SENSITIVE_DATA_ORIGIN: u32 = 1 << 5;
    pub const USER_WITH_AUTH: u32 = 1 << 6;
    pub const ADMIN_WITH_POLICY: u32 = 1 << 7;
    pub const NO_DA: u32 = 1 << 10;
    pub const ENCRYPTED_DUPLICATION: u32 = 1 << 11;
    pub const RESTRICTED: u32 = 1 << 16;
    pub const DECRYPT: u32 = 1 << 17;
    pub const SIGN_ENCRYPT: u32 = 1 << 18;

    pub fn new() -> Self {
        Self(0)
    }

    pub fn contains(self, bits: u32) -> bool {
        self.0 & bits == bits
    }

    pub fn set(mut self, bits: u32) -> Self {
        self.0 |= bits;
        self
    }

    pub fn clear(mut self, bits: u32) -> Self {
        self.0 &= !bits;
        self
    }

    pub fn with_fixed_tpm(self) -> Self {
        self.set(Self::FIXED_TPM)
    }

    pub fn with_fixed_parent(self) -> Self {
        self.set(Self::FIXED_PARENT)
    }

    pub fn is_sign(self) -> bool {
        self.contains(Self::SIGN_ENCRYPT)
    }

    pub fn is_decrypt(self) -> bool {
        self.contains(Self::DECRYPT)
    }

    pub fn is_restricted(self) -> bool {
        self.contains(Self::RESTRICTED)
    }
}

/// TPM 2.0 NV Attributes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TpmaNv(pub u32);

impl TpmaNv {
    pub const PP_WRITE: u32 = 1 << 0;
    pub const OWNER_WRITE: u32 = 1 << 1;
    pub const AUTH_WRITE: u32 = 1 << 2;
    pub const POLICY_WRITE: u32 = 1 << 3;
    pub const TPM_NT_MASK: u32 = 0xF << 4;
    pub const PP_READ: u32 = 1 << 16;
    pub const OWNER_READ: u32 = 1 << 17;
    pub const AUTH_READ: u32 = 1 << 18;
    pub const POLICY_READ: u32 = 1 << 19;
    pub const NO_DA: u32 = 1 << 25;
    pub const ORDERLY: u32 = 1 << 26;
    pub const CLEAR_STCLEAR: u32 = 1 << 27;
    pub const READ_LOCKED: u32 = 1 << 28;
    pub const WRITTEN: u32 = 1 << 29;
    pub const PLATFORM_CREATE: u32 = 1 << 30;
    pub const READ_STCLEAR: u32 = 1 << 31;

    /// TPM_NT_ORDINARY
    pub const NT_ORDINARY: u32 = 0x0;

    pub fn new() -> Self {
        Self(0)
    }

    pub fn set(mut self, bits: u32) -> Self {
        self.0 |= bits;
        self
    }

    pub fn contains(self, bits: u32) -> bool {
        self.0 & bits == bits
    }

    /// Index type (TPM_NT) encoded in bits 4..8
    pub fn nv_type(self) -> u32 {
        (self.0 & Self::TPM_NT_MASK) >> 4
    }

    pub fn with_nv_type(mut self, nt: u32) -> Self {
        self.0 = (self.0 & !Self::TPM_NT_MASK) | ((nt << 4) & Self::TPM_NT_MASK);
        self
    }
}

/// TPM 2.0 Session Attributes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TpmaSa(pub u8);

impl TpmaSa {
    pub const CONTINUE_SESSION: u8 = 1 << 0;
    pub const AUDIT_EXCLUSIVE: u8 = 1 << 1;
    pub const AUDIT_RESET: u8 = 1 << 2;
    pub const DECRYPT: u8 = 1 << 5;
    pub const ENCRYPT: u8 = 1 << 6;
    pub const AUDIT: u8 = 1 << 7;

    pub fn new() -> Self {
        Self(0)
    }

    pub fn with_continue_session(mut self) -> Self {
        self.0 |= Self::CONTINUE_SESSION;
        self
    }

    /// Caller-to-TPM parameter encryption
    pub fn with_decrypt(mut self) -> Self {
        self.0 |= Self::DECRYPT;
        self
    }

    /// TPM-to-caller parameter encryption
    pub fn with_encrypt(mut self) -> Self {
        self.0 |= Self::ENCRYPT;
        self
    }

    pub fn continue_session(self) -> bool {
        self.0 & Self::CONTINUE_SESSION != 0
    }

    pub fn decrypt(self) -> bool {
        self.0 & Self::DECRYPT != 0
    }

    pub fn encrypt(self) -> bool {
        self.0 & Self::ENCRYPT != 0
    }
}

/// TPM command header tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum TpmSt {
    RspCommand = 0x00C4,
    NoSessions = 0x8001,
    Sessions = 0x8002,
    AttestQuote = 0x8018,
}

impl TpmSt {
    pub fn to_u16(self) -> u16 {
        self as u16
    }

    pub fn from_u16(v: u16) -> Option<Self> {
        match v {
            0x00C4 => Some(TpmSt::RspCommand),
            0x8001 => Some(TpmSt::NoSessions),
            0x8002 => Some(TpmSt::Sessions),
            0x8018 => Some(TpmSt::AttestQuote),
            _ => None,
        }
    }
}

/// TPM_GENERATED_VALUE, prefix of every TPMS_ATTEST produced by a TPM
pub const TPM_GENERATED_VALUE: u32 = 0xff544347;

/// ECC Curve IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum TpmEccCurve {
    None = 0x0000,
    NistP256 = 0x0003,
    NistP384 = 0x0004,
    NistP521 = 0x0005,
}

impl TpmEccCurve {
    pub fn to_u16(self) -> u16 {
        self as u16
    }
}

/// RSA Key Bits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum RsaKeyBits {
    Rsa2048 = 2048,
}

impl RsaKeyBits {
    pub fn to_u16(self) -> u16 {
        self as u16
    }

    /// Largest message one RSA operation accepts
    pub fn block_bytes(self) -> usize {
        self as usize / 8
    }
}

// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Response code decoding

const RC_VER1: u32 = 0x100;
const RC_FMT1: u32 = 0x080;
const RC_WARN: u32 = 0x900;
const RC_VENDOR: u32 = 0x400;
const RC_P: u32 = 0x040;
const RC_S: u32 = 0x800;

/// Textual form of a response code, split the way log lines print it:
/// `"{msg}{submsg}{num}"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RcDescription {
    pub msg: &'static str,
    pub submsg: &'static str,
    pub num: String,
}

impl std::fmt::Display for RcDescription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}{}", self.msg, self.submsg, self.num)
    }
}

fn format1(code: u32) -> &'static str {
    match code {
        0x01 => "TPM_RC_ASYMMETRIC - asymmetric algorithm not supported or not correct",
        0x02 => "TPM_RC_ATTRIBUTES - inconsistent attributes",
        0x03 => "TPM_RC_HASH - hash algorithm not supported or not appropriate",
        0x04 => "TPM_RC_VALUE - value is out of range or is not correct for the context",
        0x05 => "TPM_RC_HIERARCHY - hierarchy is not enabled or is not correct for the use",
        0x07 => "TPM_RC_KEY_SIZE - key size is not supported",
        0x08 => "TPM_RC_MGF - mask generation function not supported",
        0x09 => "TPM_RC_MODE - mode of operation not supported",
        0x0A => "TPM_RC_TYPE - the type of the value is not appropriate for the use",
        0x0B => "TPM_RC_HANDLE - the handle is not correct for the use",
        0x0C => "TPM_RC_KDF - unsupported key derivation function",
        0x0D => "TPM_RC_RANGE - value was out of allowed range",
        0x0E => "TPM_RC_AUTH_FAIL - the authorization HMAC check failed and DA counter incremented",
        0x0F => "TPM_RC_NONCE - invalid nonce size or nonce value mismatch",
        0x10 => "TPM_RC_PP - authorization requires assertion of PP",
        0x12 => "TPM_RC_SCHEME - unsupported or incompatible scheme",
        0x15 => "TPM_RC_SIZE - structure is the wrong size",
        0x16 => "TPM_RC_SYMMETRIC - unsupported symmetric algorithm or key size",
        0x17 => "TPM_RC_TAG - incorrect structure tag",
        0x18 => "TPM_RC_SELECTOR - union selector is incorrect",
        0x1A => "TPM_RC_INSUFFICIENT - the TPM was unable to unmarshal a value",
        0x1B => "TPM_RC_SIGNATURE - the signature is not valid",
        0x1C => "TPM_RC_KEY - key fields are not compatible with the selected use",
        0x1D => "TPM_RC_POLICY_FAIL - a policy check failed",
        0x1F => "TPM_RC_INTEGRITY - integrity check failed",
        0x20 => "TPM_RC_TICKET - invalid ticket",
        0x21 => "TPM_RC_RESERVED_BITS - reserved bits not set to zero as required",
        0x22 => "TPM_RC_BAD_AUTH - authorization failure without DA implications",
        0x23 => "TPM_RC_EXPIRED - the policy has expired",
        0x24 => "TPM_RC_POLICY_CC - the command code in the policy is not the command code of the command",
        0x25 => "TPM_RC_BINDING - public and sensitive portions of an object are not cryptographically bound",
        0x26 => "TPM_RC_CURVE - curve not supported",
        0x27 => "TPM_RC_ECC_POINT - point is not on the required curve",
        _ => "unknown format 1 response code",
    }
}

fn format0(code: u32) -> &'static str {
    match code {
        0x000 => "TPM_RC_INITIALIZE - TPM not initialized by TPM2_Startup or already initialized",
        0x001 => "TPM_RC_FAILURE - commands not being accepted because of a TPM failure",
        0x003 => "TPM_RC_SEQUENCE - improper use of a sequence handle",
        0x00B => "TPM_RC_PRIVATE - not currently used",
        0x019 => "TPM_RC_HMAC - not currently used",
        0x020 => "TPM_RC_DISABLED - the command is disabled",
        0x021 => "TPM_RC_EXCLUSIVE - command failed because audit sequence required exclusivity",
        0x024 => "TPM_RC_AUTH_TYPE - authorization handle is not correct for command",
        0x025 => "TPM_RC_AUTH_MISSING - command requires an authorization session for handle and it is not present",
        0x026 => "TPM_RC_POLICY - policy failure in math operation or an invalid authPolicy value",
        0x027 => "TPM_RC_PCR - PCR check fail",
        0x028 => "TPM_RC_PCR_CHANGED - PCR have changed since checked",
        0x02D => "TPM_RC_UPGRADE - TPM is in field upgrade mode",
        0x02E => "TPM_RC_TOO_MANY_CONTEXTS - context ID counter is at maximum",
        0x02F => "TPM_RC_AUTH_UNAVAILABLE - authValue or authPolicy is not available for selected entity",
        0x030 => "TPM_RC_REBOOT - a _TPM_Init and Startup(CLEAR) is required before the TPM can resume operation",
        0x031 => "TPM_RC_UNBALANCED - the protection algorithms (hash and symmetric) are not reasonably balanced",
        0x042 => "TPM_RC_COMMAND_SIZE - command commandSize value is inconsistent with contents of the command buffer",
        0x043 => "TPM_RC_COMMAND_CODE - command code not supported",
        0x044 => "TPM_RC_AUTHSIZE - the value of authorizationSize is out of range",
        0x045 => "TPM_RC_AUTH_CONTEXT - use of an authorization session with a context command",
        0x046 => "TPM_RC_NV_RANGE - NV offset+size is out of range",
        0x047 => "TPM_RC_NV_SIZE - requested allocation size is larger than allowed",
        0x048 => "TPM_RC_NV_LOCKED - NV access locked",
        0x049 => "TPM_RC_NV_AUTHORIZATION - NV access authorization fails in command actions",
        0x04A => "TPM_RC_NV_UNINITIALIZED - an NV Index is used before being initialized",
        0x04B => "TPM_RC_NV_SPACE - insufficient space for NV allocation",
        0x04C => "TPM_RC_NV_DEFINED - NV Index or persistent object already defined",
        0x050 => "TPM_RC_BAD_CONTEXT - context in TPM2_ContextLoad is not valid",
        0x051 => "TPM_RC_CPHASH - cpHash value already set or not correct for use",
        0x052 => "TPM_RC_PARENT - handle for parent is not a valid parent",
        0x053 => "TPM_RC_NEEDS_TEST - some function needs testing",
        0x054 => "TPM_RC_NO_RESULT - returned when an internal function cannot process a request",
        0x055 => "TPM_RC_SENSITIVE - the sensitive area did not unmarshal correctly after decryption",
        _ => "unknown format 0 response code",
    }
}

fn warning(code: u32) -> &'static str {
    match code {
        0x001 => "TPM_RC_CONTEXT_GAP - gap for context ID is too large",
        0x002 => "TPM_RC_OBJECT_MEMORY - out of memory for object contexts",
        0x003 => "TPM_RC_SESSION_MEMORY - out of memory for session contexts",
        0x004 => "TPM_RC_MEMORY - out of shared object/session memory or need space for internal operations",
        0x005 => "TPM_RC_SESSION_HANDLES - out of session handles",
        0x006 => "TPM_RC_OBJECT_HANDLES - out of object handles",
        0x007 => "TPM_RC_LOCALITY - bad locality",
        0x008 => "TPM_RC_YIELDED - the TPM has suspended operation on the command",
        0x009 => "TPM_RC_CANCELED - the command was canceled",
        0x00A => "TPM_RC_TESTING - TPM is performing self-tests",
        0x020 => "TPM_RC_NV_RATE - the TPM is rate-limiting accesses to prevent wearout of NV",
        0x021 => "TPM_RC_LOCKOUT - authorizations for objects subject to DA protection are not allowed at this time",
        0x022 => "TPM_RC_RETRY - the TPM was not able to start the command",
        0x023 => "TPM_RC_NV_UNAVAILABLE - the command may require writing of NV and NV is not current accessible",
        _ => "unknown warning response code",
    }
}

/// Decode a response code into message, position kind and position number
pub fn describe(rc: u32) -> RcDescription {
    let none = |msg| RcDescription {
        msg,
        submsg: "",
        num: String::new(),
    };

    if rc == 0 {
        return none("TPM_RC_SUCCESS");
    }
    // Non-zero upper layers are produced by software stacks, never the TPM
    if rc >> 16 != 0 {
        return none("response code from a software layer, not the TPM");
    }
    if rc & RC_FMT1 != 0 {
        let code = rc & 0x3F;
        let (submsg, n) = if rc & RC_P != 0 {
            (" - parameter", (rc >> 8) & 0xF)
        } else if rc & RC_S != 0 {
            (" - session", (rc >> 8) & 0x7)
        } else {
            (" - handle", (rc >> 8) & 0x7)
        };
        if n == 0 {
            return none(format1(code));
        }
        return RcDescription {
            msg: format1(code),
            submsg,
            num: format!(" {n}"),
        };
    }
    if rc & RC_VER1 == 0 {
        return none("TPM 1.2 response code");
    }
    if rc & RC_VENDOR != 0 {
        return none("vendor defined response code");
    }
    if rc & 0xF00 == RC_WARN {
        return none(warning(rc & 0x7F));
    }
    none(format0(rc & 0x7F))
}

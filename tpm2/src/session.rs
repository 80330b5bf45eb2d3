// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! TPM 2.0 session state and session cryptography
//!
//! Everything needed to drive HMAC sessions from the caller side: KDFa,
//! session key derivation, command/response HMACs and first-parameter
//! encryption (XOR obfuscation or AES-128-CFB).

use aes::Aes128;
use anyhow::{anyhow, bail, Result};
use cipher::{AsyncStreamCipher, KeyIvInit};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256, Sha384, Sha512};

use super::constants::*;
use super::types::TpmtSymDef;

type Aes128CfbEnc = cfb_mode::Encryptor<Aes128>;
type Aes128CfbDec = cfb_mode::Decryptor<Aes128>;

/// Hash the concatenation of `parts` with `alg`
pub fn digest(alg: TpmAlgId, parts: &[&[u8]]) -> Result<Vec<u8>> {
    macro_rules! run {
        ($hasher:ty) => {{
            let mut hasher = <$hasher>::new();
            for part in parts {
                hasher.update(part);
            }
            hasher.finalize().to_vec()
        }};
    }
    let out = match alg {
        TpmAlgId::Sha256 => run!(Sha256),
        TpmAlgId::Sha384 => run!(Sha384),
        TpmAlgId::Sha512 => run!(Sha512),
        _ => bail!("unsupported session hash algorithm {alg:?}"),
    };
    Ok(out)
}

/// HMAC over the concatenation of `parts`
pub fn hmac(alg: TpmAlgId, key: &[u8], parts: &[&[u8]]) -> Result<Vec<u8>> {
    macro_rules! run {
        ($hasher:ty) => {{
            let mut mac = <Hmac<$hasher> as Mac>::new_from_slice(key)
                .map_err(|_| anyhow!("invalid HMAC key length"))?;
            for part in parts {
                mac.update(part);
            }
            mac.finalize().into_bytes().to_vec()
        }};
    }
    let out = match alg {
        TpmAlgId::Sha256 => run!(Sha256),
        TpmAlgId::Sha384 => run!(Sha384),
        TpmAlgId::Sha512 => run!(Sha512),
        _ => bail!("unsupported session hash algorithm {alg:?}"),
    };
    Ok(out)
}

/// KDFa from TPM 2.0 Part 1, counter mode with HMAC.
///
/// `label` is written without its terminating zero; the zero octet is
/// appended here.
pub fn kdfa(
    alg: TpmAlgId,
    key: &[u8],
    label: &[u8],
    context_u: &[u8],
    context_v: &[u8],
    bits: u32,
) -> Result<Vec<u8>> {
    let bytes = bits.div_ceil(8) as usize;
    let mut out = Vec::with_capacity(bytes + alg.digest_size());
    let mut counter: u32 = 0;
    while out.len() < bytes {
        counter += 1;
        out.extend(hmac(
            alg,
            key,
            &[
                &counter.to_be_bytes(),
                label,
                &[0],
                context_u,
                context_v,
                &bits.to_be_bytes(),
            ],
        )?);
    }
    out.truncate(bytes);
    // Partial last octet keeps only its low-order bits
    if bits % 8 != 0 {
        out[0] &= (1u8 << (bits % 8)) - 1;
    }
    Ok(out)
}

/// Strip trailing zero octets from an authorization value
pub fn trim_auth(auth: &[u8]) -> &[u8] {
    let end = auth.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    &auth[..end]
}

/// Caller-side view of one HMAC or policy session
#[derive(Debug, Clone)]
pub struct SessionState {
    pub handle: u32,
    pub session_type: TpmSe,
    pub auth_hash: TpmAlgId,
    pub symmetric: TpmtSymDef,
    session_key: Vec<u8>,
    bind_name: Option<Vec<u8>>,
    pub nonce_caller: Vec<u8>,
    pub nonce_tpm: Vec<u8>,
}

/// Direction of a parameter being protected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamDirection {
    /// command parameter, TPMA_SESSION_DECRYPT
    Command,
    /// response parameter, TPMA_SESSION_ENCRYPT
    Response,
}

impl SessionState {
    /// Record a session the TPM just started. `bind` is the Name and
    /// authorization value of the bind entity for bound sessions.
    pub fn new(
        handle: u32,
        session_type: TpmSe,
        auth_hash: TpmAlgId,
        symmetric: TpmtSymDef,
        bind: Option<(Vec<u8>, &[u8])>,
        nonce_caller: Vec<u8>,
        nonce_tpm: Vec<u8>,
    ) -> Result<Self> {
        if !auth_hash.is_hash() {
            bail!("session hash {auth_hash:?} is not a digest algorithm");
        }
        let (session_key, bind_name) = match bind {
            Some((name, auth)) => {
                let key = kdfa(
                    auth_hash,
                    trim_auth(auth),
                    b"ATH",
                    &nonce_tpm,
                    &nonce_caller,
                    (auth_hash.digest_size() * 8) as u32,
                )?;
                (key, Some(name))
            }
            None => (Vec::new(), None),
        };
        Ok(Self {
            handle,
            session_type,
            auth_hash,
            symmetric,
            session_key,
            bind_name,
            nonce_caller,
            nonce_tpm,
        })
    }

    pub fn is_bound(&self) -> bool {
        self.bind_name.is_some()
    }

    pub fn session_key(&self) -> &[u8] {
        &self.session_key
    }

    /// HMAC key for authorizing `entity_name`. The authorization value is
    /// left out when the entity is the one the session is bound to.
    pub fn hmac_key(&self, entity_name: Option<&[u8]>, auth: &[u8]) -> Vec<u8> {
        let mut key = self.session_key.clone();
        let is_bind_entity =
            entity_name.is_some() && self.bind_name.as_deref() == entity_name;
        if !is_bind_entity {
            key.extend_from_slice(trim_auth(auth));
        }
        key
    }

    /// Parameter encryption key, always including the authorization value
    pub fn encryption_key(&self, auth: &[u8]) -> Vec<u8> {
        let mut key = self.session_key.clone();
        key.extend_from_slice(trim_auth(auth));
        key
    }

    pub fn command_hmac(&self, key: &[u8], cp_hash: &[u8], attributes: TpmaSa) -> Result<Vec<u8>> {
        hmac(
            self.auth_hash,
            key,
            &[cp_hash, &self.nonce_caller, &self.nonce_tpm, &[attributes.0]],
        )
    }

    /// Expected response HMAC; call after the TPM nonce has been rolled.
    pub fn response_hmac(&self, key: &[u8], rp_hash: &[u8], attributes: TpmaSa) -> Result<Vec<u8>> {
        hmac(
            self.auth_hash,
            key,
            &[rp_hash, &self.nonce_tpm, &self.nonce_caller, &[attributes.0]],
        )
    }

    /// Encrypt or decrypt a parameter body in place
    pub fn apply_param_cipher(
        &self,
        direction: ParamDirection,
        auth: &[u8],
        data: &mut [u8],
    ) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let key = self.encryption_key(auth);
        let (newer, older) = match direction {
            ParamDirection::Command => (&self.nonce_caller, &self.nonce_tpm),
            ParamDirection::Response => (&self.nonce_tpm, &self.nonce_caller),
        };
        match self.symmetric {
            TpmtSymDef::Null => bail!("session 0x{:08x} has no symmetric algorithm", self.handle),
            TpmtSymDef::Xor { hash } => {
                let mask = kdfa(hash, &key, b"XOR", newer, older, (data.len() * 8) as u32)?;
                for (b, m) in data.iter_mut().zip(mask) {
                    *b ^= m;
                }
            }
            TpmtSymDef::Aes { key_bits: 128, mode: TpmAlgId::Cfb } => {
                let material = kdfa(self.auth_hash, &key, b"CFB", newer, older, 128 + 128)?;
                let (k, iv) = material.split_at(16);
                match direction {
                    ParamDirection::Command => Aes128CfbEnc::new_from_slices(k, iv)
                        .map_err(|e| anyhow!("{e}"))?
                        .encrypt(data),
                    ParamDirection::Response => Aes128CfbDec::new_from_slices(k, iv)
                        .map_err(|e| anyhow!("{e}"))?
                        .decrypt(data),
                }
            }
            other => bail!("unsupported parameter encryption {other:?}"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trim_auth() {
        assert_eq!(trim_auth(b"ab\0\0"), b"ab");
        assert_eq!(trim_auth(b"\0a\0"), b"\0a");
        assert_eq!(trim_auth(b"\0\0"), b"");
    }

    #[test]
    fn test_kdfa_length_and_determinism() {
        let a = kdfa(TpmAlgId::Sha256, b"key", b"ATH", b"u", b"v", 256).unwrap();
        let b = kdfa(TpmAlgId::Sha256, b"key", b"ATH", b"u", b"v", 256).unwrap();
        assert_eq!(a.len(), 32);
        assert_eq!(a, b);

        let long = kdfa(TpmAlgId::Sha256, b"key", b"XOR", b"u", b"v", 400).unwrap();
        assert_eq!(long.len(), 50);
        // A different output size feeds a different `bits` value
        assert_ne!(&long[..32], &a[..]);
    }

    #[test]
    fn test_kdfa_first_block() {
        let out = kdfa(TpmAlgId::Sha256, b"k", b"CFB", b"", b"", 256).unwrap();
        let expected = hmac(
            TpmAlgId::Sha256,
            b"k",
            &[&[0, 0, 0, 1], b"CFB\0", &[0, 0, 1, 0]],
        )
        .unwrap();
        assert_eq!(out, expected);
    }

    fn session(symmetric: TpmtSymDef, bind: Option<(Vec<u8>, &[u8])>) -> SessionState {
        SessionState::new(
            0x02000000,
            TpmSe::Hmac,
            TpmAlgId::Sha256,
            symmetric,
            bind,
            vec![1; 32],
            vec![2; 32],
        )
        .unwrap()
    }

    #[test]
    fn test_unbound_session_key_is_empty() {
        let s = session(TpmtSymDef::aes_128_cfb(), None);
        assert!(s.session_key().is_empty());
        assert_eq!(s.hmac_key(Some(b"name"), b"pw\0"), b"pw".to_vec());
    }

    #[test]
    fn test_bind_entity_omits_auth() {
        let s = session(TpmtSymDef::aes_128_cfb(), Some((b"name".to_vec(), b"pw")));
        assert_eq!(s.session_key().len(), 32);
        assert_eq!(s.hmac_key(Some(b"name"), b"pw"), s.session_key().to_vec());
        assert_eq!(s.hmac_key(Some(b"other"), b"pw").len(), 34);
        assert_eq!(s.encryption_key(b"pw").len(), 34);
    }

    #[test]
    fn test_param_cipher_reverses() {
        for sym in [TpmtSymDef::aes_128_cfb(), TpmtSymDef::xor(TpmAlgId::Sha256)] {
            let s = session(sym, None);
            let mut data = b"secret nv payload".to_vec();
            s.apply_param_cipher(ParamDirection::Command, b"pw", &mut data).unwrap();
            assert_ne!(data, b"secret nv payload");

            // The TPM decrypts a command parameter with the same nonce order
            // the caller used; emulate it with a mirrored session.
            let mut mirrored = s.clone();
            std::mem::swap(&mut mirrored.nonce_caller, &mut mirrored.nonce_tpm);
            mirrored
                .apply_param_cipher(ParamDirection::Response, b"pw", &mut data)
                .unwrap();
            assert_eq!(data, b"secret nv payload");
        }
    }

    #[test]
    fn test_null_symmetric_refuses_encryption() {
        let s = session(TpmtSymDef::null(), None);
        let mut data = vec![1, 2, 3];
        assert!(s
            .apply_param_cipher(ParamDirection::Command, b"", &mut data)
            .is_err());
    }
}

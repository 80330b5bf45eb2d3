// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Process-wide algorithm and device settings

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tpm2::{TpmAlgId, TpmEccCurve, TpmtSymDef};

/// Name algorithm, session hash and signing-scheme hash
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    pub fn alg(self) -> TpmAlgId {
        match self {
            HashAlgorithm::Sha256 => TpmAlgId::Sha256,
            HashAlgorithm::Sha384 => TpmAlgId::Sha384,
            HashAlgorithm::Sha512 => TpmAlgId::Sha512,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AsymAlgorithm {
    #[default]
    Rsa,
    Ecc,
}

impl AsymAlgorithm {
    pub fn alg(self) -> TpmAlgId {
        match self {
            AsymAlgorithm::Rsa => TpmAlgId::Rsa,
            AsymAlgorithm::Ecc => TpmAlgId::Ecc,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EccCurve {
    #[default]
    NistP256,
    NistP384,
    NistP521,
}

impl EccCurve {
    pub fn curve(self) -> TpmEccCurve {
        match self {
            EccCurve::NistP256 => TpmEccCurve::NistP256,
            EccCurve::NistP384 => TpmEccCurve::NistP384,
            EccCurve::NistP521 => TpmEccCurve::NistP521,
        }
    }
}

/// Parameter encryption used by every session the core opens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionCipher {
    #[default]
    Aes128Cfb,
    /// XOR obfuscation keyed with the session hash
    Xor,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Channel selector, e.g. `device:/dev/tpmrm0` or `mssim:127.0.0.1:2321`.
    /// Auto-detects the character device when unset.
    pub tcti: Option<String>,
    pub hash_algorithm: HashAlgorithm,
    pub asym_algorithm: AsymAlgorithm,
    pub ecc_curve: EccCurve,
    pub session_encryption: SessionCipher,
    /// Max NV buffer assumed when TPM_PT_NV_BUFFER_MAX cannot be read
    pub nv_buffer_fallback: u32,
    /// Consecutive empty GetRandom answers tolerated before giving up
    pub random_zero_retries: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tcti: None,
            hash_algorithm: HashAlgorithm::default(),
            asym_algorithm: AsymAlgorithm::default(),
            ecc_curve: EccCurve::default(),
            session_encryption: SessionCipher::default(),
            nv_buffer_fallback: 512,
            random_zero_retries: 3,
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs_err::read_to_string(path)?;
        serde_json::from_str(&text)
            .with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn hash_alg(&self) -> TpmAlgId {
        self.hash_algorithm.alg()
    }

    pub fn session_symmetric(&self) -> TpmtSymDef {
        match self.session_encryption {
            SessionCipher::Aes128Cfb => TpmtSymDef::aes_128_cfb(),
            SessionCipher::Xor => TpmtSymDef::xor(self.hash_alg()),
        }
    }
}

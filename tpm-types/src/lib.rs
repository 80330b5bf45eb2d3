// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! TPM Types - values handed to callers above the TPM core
//!
//! Every binary value leaves the core as lowercase hex text so it can travel
//! over text-based IPC unchanged. This crate holds those result types and the
//! shared hex conversion used to produce and consume them.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Malformed hex input
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HexError {
    #[error("invalid hex character {character:?} at position {position}")]
    InvalidCharacter { character: char, position: usize },
    #[error("malformed hex: {0}")]
    Malformed(String),
}

/// Lowercase, two digits per byte, no separators
pub fn bin_to_hex(bin: &[u8]) -> String {
    hex::encode(bin)
}

/// Decode hex text.
///
/// Odd-length input is accepted: the first digit stands alone as the low
/// nibble of the first byte, every following pair forms one byte. So `"f"`
/// decodes to `[0x0f]` and `"abc"` to `[0x0a, 0xbc]`.
pub fn hex_to_bin(hex_str: &str) -> Result<Vec<u8>, HexError> {
    let digits = hex_str.as_bytes();
    let lead = digits.len() % 2;
    let mut out = Vec::with_capacity(digits.len().div_ceil(2));
    if lead == 1 {
        let c = digits[0] as char;
        let nibble = c.to_digit(16).ok_or(HexError::InvalidCharacter {
            character: c,
            position: 0,
        })?;
        out.push(nibble as u8);
    }
    let pairs = hex::decode(&digits[lead..]).map_err(|e| match e {
        hex::FromHexError::InvalidHexCharacter { c, index } => HexError::InvalidCharacter {
            character: c,
            position: index + lead,
        },
        other => HexError::Malformed(other.to_string()),
    })?;
    out.extend(pairs);
    Ok(out)
}

/// One PCR value as read from a bank
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PcrReading {
    /// PCR index (0-23)
    pub index: u32,

    /// Bank label, e.g. `TPM_ALG_SHA256`
    pub algorithm: String,

    /// PCR value (hex)
    pub digest: String,
}

/// Signed quote, released only once its qualifying data has been checked
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteReport {
    /// Hash label of the signing scheme, e.g. `TPM_ALG_SHA256`
    pub algorithm: String,

    /// TPMS_ATTEST body as signed by the TPM (hex)
    pub attestation: String,

    /// Marshalled TPMT_SIGNATURE (hex)
    pub signature: String,
}

/// Persisted key blobs, hex-encoded for transport
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyBlobs {
    /// Marshalled TPM2B_PUBLIC (hex)
    pub public: String,

    /// Marshalled TPM2B_PRIVATE (hex), absent for primary keys
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private: Option<String>,
}

/// PCR selection specifying which PCRs to include
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PcrSelection {
    /// Hash bank (e.g., "sha256")
    pub bank: String,

    /// List of PCR indices
    pub pcrs: Vec<u32>,
}

impl PcrSelection {
    pub fn new(bank: &str, pcrs: &[u32]) -> Self {
        Self {
            bank: bank.to_string(),
            pcrs: pcrs.to_vec(),
        }
    }

    pub fn sha256(pcrs: &[u32]) -> Self {
        Self::new("sha256", pcrs)
    }

    pub fn to_arg(&self) -> String {
        let pcr_list: Vec<String> = self.pcrs.iter().map(|p| p.to_string()).collect();
        format!("{}:{}", self.bank, pcr_list.join(","))
    }
}

impl Default for PcrSelection {
    fn default() -> Self {
        Self::sha256(&[0, 1, 2, 3, 4, 5, 6, 7])
    }
}

impl FromStr for PcrSelection {
    type Err = String;

    /// Parse `bank:0,1,2` or a bare `0,1,2` (sha256 bank)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (bank, list) = s.split_once(':').unwrap_or(("sha256", s));
        let pcrs = list
            .split(',')
            .filter(|p| !p.trim().is_empty())
            .map(|p| {
                p.trim()
                    .parse::<u32>()
                    .map_err(|e| format!("invalid PCR index {p:?}: {e}"))
            })
            .collect::<Result<Vec<_>, _>>()?;
        if pcrs.is_empty() {
            return Err("empty PCR selection".into());
        }
        Ok(Self::new(bank, &pcrs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bin_to_hex_lowercase_padded() {
        assert_eq!(bin_to_hex(&[0x00, 0x0f, 0xab, 0xff]), "000fabff");
        assert_eq!(bin_to_hex(&[]), "");
    }

    #[test]
    fn test_hex_roundtrip() {
        let samples: [&[u8]; 4] = [&[], &[0], &[0x12, 0x34, 0x56], &[0xff; 33]];
        for bytes in samples {
            assert_eq!(hex_to_bin(&bin_to_hex(bytes)).unwrap(), bytes);
        }
    }

    #[test]
    fn test_odd_length_first_nibble_standalone() {
        assert_eq!(hex_to_bin("f").unwrap(), vec![0x0f]);
        assert_eq!(hex_to_bin("abc").unwrap(), vec![0x0a, 0xbc]);
        assert_eq!(hex_to_bin("ABC").unwrap(), vec![0x0a, 0xbc]);
    }

    #[test]
    fn test_malformed_hex() {
        assert_eq!(
            hex_to_bin("12zz"),
            Err(HexError::InvalidCharacter {
                character: 'z',
                position: 2
            })
        );
        assert!(hex_to_bin("g").is_err());
    }

    #[test]
    fn test_malformed_hex_after_lone_nibble() {
        assert_eq!(
            hex_to_bin("abz"),
            Err(HexError::InvalidCharacter {
                character: 'z',
                position: 2
            })
        );
        // Multi-byte characters are rejected, not split
        assert!(hex_to_bin("\u{e9}1").is_err());
    }

    #[test]
    fn test_pcr_selection_parse() {
        let sel: PcrSelection = "sha384:0, 7,23".parse().unwrap();
        assert_eq!(sel, PcrSelection::new("sha384", &[0, 7, 23]));
        assert_eq!(sel.to_arg(), "sha384:0,7,23");
        assert_eq!("1,2".parse::<PcrSelection>().unwrap().bank, "sha256");
        assert!("sha256:".parse::<PcrSelection>().is_err());
    }

    #[test]
    fn test_quote_report_json() {
        let report = QuoteReport {
            algorithm: "TPM_ALG_SHA256".into(),
            attestation: "ff544347".into(),
            signature: "0014".into(),
        };
        let json = serde_json::to_string(&report).unwrap();
        assert_eq!(
            json,
            r#"{"algorithm":"TPM_ALG_SHA256","attestation":"ff544347","signature":"0014"}"#
        );
    }
}

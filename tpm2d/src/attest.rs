// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! PCR measurement and quotes

use tpm2::{
    Marshal, Tpm2bAttest, Tpm2bData, TpmAlgId, TpmCc, TpmRequest, TpmlDigest, TpmlDigestValues,
    TpmlPcrSelection, TpmsAttest, TpmtHa, TpmtScheme, TpmtSignature, Unmarshal, PCR_SELECT_MAX,
};
use tpm_types::{bin_to_hex, hex_to_bin, PcrReading, QuoteReport};
use tracing::{debug, error};

use crate::config::AsymAlgorithm;
use crate::executor::Executor;
use crate::handles::{auth_value, check_key_handle};
use crate::{Error, Result};

fn check_pcr(pcr: u32) -> Result<()> {
    if pcr > PCR_SELECT_MAX {
        return Err(Error::ValueRejected(format!(
            "PCR {pcr} is out of range 0-{PCR_SELECT_MAX}"
        )));
    }
    Ok(())
}

fn check_bank(hash: TpmAlgId) -> Result<()> {
    if !hash.is_hash() {
        return Err(Error::ValueRejected(format!("{hash:?} is not a PCR bank")));
    }
    Ok(())
}

impl Executor {
    /// Extend `pcr` with `data` as the digest value. `data` is zero-padded
    /// to the digest size, not hashed.
    pub fn pcr_extend(&mut self, pcr: u32, hash: TpmAlgId, data: &[u8]) -> Result<()> {
        check_pcr(pcr)?;
        check_bank(hash)?;
        let size = hash.digest_size();
        if data.len() > size {
            return Err(Error::InsufficientBuffer(format!(
                "{} bytes do not fit a {size} byte {} digest",
                data.len(),
                hash.label()
            )));
        }
        let mut digest = vec![0u8; size];
        digest[..data.len()].copy_from_slice(data);

        let request = TpmRequest::new(TpmCc::PcrExtend)
            .handle(pcr)
            .password(&[])
            .param(&TpmlDigestValues::single(TpmtHa {
                hash_alg: hash,
                digest,
            }));
        self.execute(&request)?;
        debug!("extended PCR {pcr} in bank {}", hash.label());
        Ok(())
    }

    pub fn pcr_read(&mut self, pcr: u32, hash: TpmAlgId) -> Result<PcrReading> {
        check_pcr(pcr)?;
        check_bank(hash)?;
        let request =
            TpmRequest::new(TpmCc::PcrRead).param(&TpmlPcrSelection::single(hash, &[pcr]));
        let reply = self.execute(&request)?;

        let mut reader = reply.reader();
        let _update_counter = reader.get_u32()?;
        let selection = TpmlPcrSelection::unmarshal(&mut reader)?;
        let digests = TpmlDigest::unmarshal(&mut reader)?;
        let selected = selection
            .pcr_selections
            .first()
            .is_some_and(|s| s.hash == hash && s.indices() == [pcr]);
        let digest = match digests.digests.first() {
            Some(d) if selected => d,
            _ => {
                return Err(Error::ValueRejected(format!(
                    "PCR {pcr} is not allocated in bank {}",
                    hash.label()
                )))
            }
        };
        Ok(PcrReading {
            index: pcr,
            algorithm: hash.label().to_string(),
            digest: bin_to_hex(digest.as_slice()),
        })
    }

    /// Quote `pcrs` in the configured bank with `key`. `qualifying_data` is
    /// hex; the quote is returned only if the TPM echoed it back unchanged.
    pub fn quote(
        &mut self,
        pcrs: &[u32],
        key: u32,
        key_password: Option<&str>,
        qualifying_data: Option<&str>,
    ) -> Result<QuoteReport> {
        for &pcr in pcrs {
            check_pcr(pcr)?;
        }
        check_key_handle(key)?;
        let key_auth = auth_value(key_password)?;
        let qualifying = match qualifying_data {
            Some(hex) => hex_to_bin(hex)?,
            None => Vec::new(),
        };
        if qualifying.len() > Tpm2bData::MAX {
            return Err(Error::InsufficientBuffer(format!(
                "qualifying data of {} bytes exceeds {}",
                qualifying.len(),
                Tpm2bData::MAX
            )));
        }

        let hash = self.config().hash_alg();
        let scheme = match self.config().asym_algorithm {
            AsymAlgorithm::Rsa => TpmtScheme::rsassa(hash),
            AsymAlgorithm::Ecc => TpmtScheme::ecdsa(hash),
        };
        let request = TpmRequest::new(TpmCc::Quote)
            .handle(key)
            .password(key_auth)
            .param(&Tpm2bData::new(qualifying.clone()))
            .param(&scheme)
            .param(&TpmlPcrSelection::single(hash, pcrs));
        let reply = self.execute(&request)?;

        let mut reader = reply.reader();
        let attest = Tpm2bAttest::unmarshal(&mut reader)?;
        let signature = TpmtSignature::unmarshal(&mut reader)?;
        reader.finish()?;

        let body = TpmsAttest::from_bytes(attest.as_slice())
            .map_err(|e| Error::Verification(format!("malformed attestation: {e:#}")))?;
        if body.extra_data.as_slice() != qualifying.as_slice() {
            error!("quote extra data does not match the qualifying data");
            return Err(Error::Verification(
                "quote extra data does not match the qualifying data".into(),
            ));
        }
        debug!("quoted PCRs {pcrs:?} with key 0x{key:08x}");
        Ok(QuoteReport {
            algorithm: hash.label().to_string(),
            attestation: bin_to_hex(attest.as_slice()),
            signature: bin_to_hex(&signature.to_bytes()),
        })
    }
}

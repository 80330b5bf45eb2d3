// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! RSA-OAEP with loaded keys

use tpm2::{RsaKeyBits, Tpm2bData, Tpm2bPublicKeyRsa, TpmCc, TpmRequest, TpmtScheme, Unmarshal};
use tracing::debug;

use crate::executor::Executor;
use crate::handles::{auth_value, check_key_handle};
use crate::{Error, Result};

fn check_block(len: usize) -> Result<()> {
    let max = RsaKeyBits::Rsa2048.block_bytes();
    if len > max {
        return Err(Error::InsufficientBuffer(format!(
            "{len} bytes exceed the {max} byte RSA block"
        )));
    }
    Ok(())
}

impl Executor {
    fn oaep(&self) -> TpmtScheme {
        TpmtScheme::oaep(self.config().hash_alg())
    }

    pub fn rsa_encrypt(&mut self, key: u32, message: &[u8]) -> Result<Vec<u8>> {
        check_key_handle(key)?;
        check_block(message.len())?;
        let request = TpmRequest::new(TpmCc::RsaEncrypt)
            .handle(key)
            .param(&Tpm2bPublicKeyRsa::new(message))
            .param(&self.oaep())
            .param(&Tpm2bData::empty());
        let reply = self.execute(&request)?;
        let out = Tpm2bPublicKeyRsa::from_bytes(&reply.params)?.buffer;
        debug!("encrypted {} bytes with key 0x{key:08x}", message.len());
        Ok(out)
    }

    /// Decrypt into at most `capacity` bytes
    pub fn rsa_decrypt(
        &mut self,
        key: u32,
        key_password: Option<&str>,
        ciphertext: &[u8],
        capacity: usize,
    ) -> Result<Vec<u8>> {
        check_key_handle(key)?;
        check_block(ciphertext.len())?;
        let request = TpmRequest::new(TpmCc::RsaDecrypt)
            .handle(key)
            .password(auth_value(key_password)?)
            .param(&Tpm2bPublicKeyRsa::new(ciphertext))
            .param(&self.oaep())
            .param(&Tpm2bData::empty());
        let reply = self.execute(&request)?;
        let out = Tpm2bPublicKeyRsa::from_bytes(&reply.params)?.buffer;
        if out.len() > capacity {
            return Err(Error::InsufficientBuffer(format!(
                "decrypted {} bytes, caller accepts {capacity}",
                out.len()
            )));
        }
        debug!("decrypted {} bytes with key 0x{key:08x}", out.len());
        Ok(out)
    }
}

// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

use tpm2::{tpm_rc, tpm_rh, Tpm2bDigest, TpmCc, TpmRequest, TpmaSa, Unmarshal};
use tracing::{debug, warn};

use crate::executor::Executor;
use crate::session::SessionKind;
use crate::{Error, Result};

impl Executor {
    /// Fetch `length` random bytes over a response-encrypted session. The
    /// TPM may answer with fewer bytes than asked; requests repeat until
    /// `length` bytes have arrived.
    pub fn get_random(&mut self, length: usize) -> Result<Vec<u8>> {
        if length == 0 {
            return Ok(Vec::new());
        }
        let max_empty = self.config().random_zero_retries;
        let mut session = self.open_session(SessionKind::Hmac, tpm_rh::NULL, None)?;
        let attributes = TpmaSa::new().with_encrypt().with_continue_session();

        let mut collect = || -> Result<Vec<u8>> {
            let mut out = Vec::with_capacity(length);
            let mut empty = 0;
            while out.len() < length {
                let wanted = u16::try_from(length - out.len()).unwrap_or(u16::MAX);
                let request = TpmRequest::new(TpmCc::GetRandom)
                    .session(session.handle(), attributes, &[])
                    .param(&wanted);
                let reply = session.execute(&request)?;
                let chunk = Tpm2bDigest::from_bytes(&reply.params)?.buffer;
                if chunk.is_empty() {
                    empty += 1;
                    warn!("GetRandom returned no bytes ({empty}/{max_empty})");
                    if empty > max_empty {
                        return Err(Error::protocol(TpmCc::GetRandom, tpm_rc::FAILURE));
                    }
                    continue;
                }
                empty = 0;
                let take = chunk.len().min(length - out.len());
                out.extend_from_slice(&chunk[..take]);
            }
            Ok(out)
        };
        let outcome = collect();
        let bytes = session.finish(outcome)?;
        debug!("got {} random bytes", bytes.len());
        Ok(bytes)
    }
}

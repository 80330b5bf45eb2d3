// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Authorization sessions
//!
//! Sessions are handed out as [`SessionGuard`]s that flush the session
//! handle when they go out of scope. Operations call
//! [`SessionGuard::finish`] to get the flush status folded into their own.

use tpm2::{tpm_rh, TpmCc, TpmReply, TpmRequest, TpmSe};
use tracing::{debug, warn};

use crate::executor::Executor;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    Hmac,
    Policy,
}

impl SessionKind {
    fn session_type(self) -> TpmSe {
        match self {
            SessionKind::Hmac => TpmSe::Hmac,
            SessionKind::Policy => TpmSe::Policy,
        }
    }
}

impl Executor {
    /// Start an unsalted session, bound to `bind` unless it is `TPM_RH_NULL`.
    /// Parameter encryption follows the configured session cipher.
    pub fn open_session(
        &mut self,
        kind: SessionKind,
        bind: u32,
        bind_password: Option<&[u8]>,
    ) -> Result<SessionGuard<'_>> {
        let bind_password = if bind == tpm_rh::NULL {
            if bind_password.is_some() {
                debug!("ignoring bind password for unbound session");
            }
            None
        } else {
            Some(bind_password.unwrap_or_default())
        };
        let request = TpmRequest::new(TpmCc::StartAuthSession)
            .handle(tpm_rh::NULL)
            .handle(bind)
            // nonceCaller and encryptedSalt
            .param_tpm2b(&[])
            .param_tpm2b(&[])
            .param(&(kind.session_type() as u8))
            .param(&self.config().session_symmetric())
            .param(&self.config().hash_alg().to_u16())
            .bind_auth(bind_password);
        let reply = self.execute(&request)?;
        let handle = reply.handle(0)?;
        debug!("opened {kind:?} session 0x{handle:08x}, bind 0x{bind:08x}");
        Ok(SessionGuard {
            executor: self,
            handle,
            flushed: false,
        })
    }
}

/// An open session. Dropping the guard flushes the handle; a failed flush
/// there is only logged.
pub struct SessionGuard<'a> {
    executor: &'a mut Executor,
    handle: u32,
    flushed: bool,
}

impl SessionGuard<'_> {
    pub fn handle(&self) -> u32 {
        self.handle
    }

    pub fn execute(&mut self, request: &TpmRequest) -> Result<TpmReply> {
        self.executor.execute(request)
    }

    /// Flush now and report the outcome
    pub fn close(mut self) -> Result<()> {
        self.flushed = true;
        self.executor.flush_context(self.handle)
    }

    /// Flush and combine with the outcome of the operation run under the
    /// session: the operation error if any, else the flush error.
    pub fn finish<T>(self, outcome: Result<T>) -> Result<T> {
        let flush = self.close();
        settle(outcome, flush)
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        if !self.flushed {
            self.flushed = true;
            if self.executor.flush_context(self.handle).is_err() {
                warn!("session 0x{:08x} may have leaked", self.handle);
            }
        }
    }
}

pub(crate) fn settle<T>(outcome: Result<T>, flush: Result<()>) -> Result<T> {
    match (outcome, flush) {
        (Err(e), _) => Err(e),
        (Ok(_), Err(e)) => {
            warn!(
                "operation succeeded but its session flush failed, \
                 maybe session handle was already flushed"
            );
            Err(e)
        }
        (Ok(value), Ok(())) => Ok(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn test_settle_prefers_operation_error() {
        let out: Result<()> = settle(
            Err(Error::ValueRejected("op".into())),
            Err(Error::BadHandle(1)),
        );
        assert!(matches!(out, Err(Error::ValueRejected(_))));
    }

    #[test]
    fn test_settle_reports_flush_error_after_success() {
        let out = settle(Ok(5u32), Err(Error::BadHandle(0x02000000)));
        assert!(matches!(out, Err(Error::BadHandle(0x02000000))));
        assert_eq!(settle(Ok(5u32), Ok(())).unwrap(), 5);
    }
}

// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Uniform dispatch to the TPM channel

use anyhow::anyhow;
use tpm2::{ChannelError, PlatformSignal, TpmCc, TpmChannel, TpmPt, TpmReply, TpmRequest};
use tracing::{debug, error, warn};

use crate::config::Config;
use crate::{Error, Result};

/// Sole caller of the TPM channel. Every command the core issues goes
/// through [`Executor::execute`], which turns response codes into
/// [`Error::Protocol`] and logs them.
pub struct Executor {
    channel: Box<dyn TpmChannel>,
    config: Config,
}

impl Executor {
    pub fn new(channel: Box<dyn TpmChannel>, config: Config) -> Self {
        Self { channel, config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Send without logging failures
    fn send(&mut self, request: &TpmRequest) -> Result<TpmReply> {
        self.channel
            .execute(request)
            .map_err(|e| channel_error(request.code, e))
    }

    pub fn execute(&mut self, request: &TpmRequest) -> Result<TpmReply> {
        let result = self.send(request);
        match &result {
            Ok(_) => debug!("{} succeeded", request.code),
            Err(Error::Protocol { command, rc, .. }) => {
                let d = tpm2::rc::describe(*rc);
                error!("{command} failed, rc {rc:08x}: {}{}{}", d.msg, d.submsg, d.num);
            }
            Err(e) => error!("{} failed: {e}", request.code),
        }
        result
    }

    /// Read a fixed TPM property
    pub fn query_property(&mut self, property: TpmPt) -> Result<Option<u32>> {
        self.channel
            .query_property(property)
            .map_err(|e| channel_error(TpmCc::GetCapability, e))
    }

    /// Release a transient object or session handle. Failures are reported
    /// as warnings; the handle may already be gone.
    pub fn flush_context(&mut self, handle: u32) -> Result<()> {
        let request = TpmRequest::new(TpmCc::FlushContext).param(&handle);
        match self.send(&request) {
            Ok(_) => {
                debug!("flushed handle 0x{handle:08x}");
                Ok(())
            }
            Err(e) => {
                warn!("failed to flush handle 0x{handle:08x}: {e}");
                Err(e)
            }
        }
    }

    pub fn platform_signal(&mut self, signal: PlatformSignal) -> Result<()> {
        self.channel.platform_signal(signal).map_err(|e| match e {
            ChannelError::Rc(rc) => anyhow!("platform signal {signal:?} answered 0x{rc:08x}"),
            ChannelError::Transport(e) => e.context(format!("platform signal {signal:?} failed")),
        })?;
        debug!("platform signal {signal:?} sent");
        Ok(())
    }
}

fn channel_error(command: TpmCc, err: ChannelError) -> Error {
    match err {
        ChannelError::Rc(rc) => Error::protocol(command, rc),
        ChannelError::Transport(e) => {
            Error::Transport(e.context(format!("{command} exchange failed")))
        }
    }
}

// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Device context and TPM startup

use tpm2::{tpm_rh, DeviceChannel, PlatformSignal, TpmCc, TpmChannel, TpmRequest, TpmSu};
use tracing::{debug, info};

use crate::config::Config;
use crate::executor::Executor;
use crate::handles::auth_value;
use crate::{Error, Result};

/// The one connection to a TPM. Created unopened; [`TpmContext::init`] or
/// [`TpmContext::open`] attach a channel and [`TpmContext::destroy`]
/// detaches it.
pub struct TpmContext {
    config: Config,
    executor: Option<Executor>,
}

impl TpmContext {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            executor: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_open(&self) -> bool {
        self.executor.is_some()
    }

    pub fn init(&mut self, channel: Box<dyn TpmChannel>) -> Result<()> {
        if self.executor.is_some() {
            return Err(Error::AlreadyOpen);
        }
        self.executor = Some(Executor::new(channel, self.config.clone()));
        debug!("TPM device context created");
        Ok(())
    }

    /// Attach the channel selected by the configured TCTI
    pub fn open(&mut self) -> Result<()> {
        if self.executor.is_some() {
            return Err(Error::AlreadyOpen);
        }
        let channel = DeviceChannel::open(self.config.tcti.as_deref())?;
        info!("using TPM at {}", channel.describe());
        self.init(Box::new(channel))
    }

    pub fn destroy(&mut self) -> Result<()> {
        self.executor.take().ok_or(Error::NoDevice)?;
        debug!("TPM device context destroyed");
        Ok(())
    }

    /// Executor for the open device
    pub fn device(&mut self) -> Result<&mut Executor> {
        self.executor.as_mut().ok_or(Error::NoDevice)
    }
}

impl Executor {
    /// Power-cycle a simulator: power off, power on, NV on
    pub fn powerup(&mut self) -> Result<()> {
        for signal in [PlatformSignal::PowerOff, PlatformSignal::PowerOn, PlatformSignal::NvOn] {
            self.platform_signal(signal)?;
        }
        Ok(())
    }

    pub fn startup(&mut self, startup_type: TpmSu) -> Result<()> {
        self.execute(&TpmRequest::new(TpmCc::Startup).param(&startup_type.to_u16()))?;
        info!("TPM started ({startup_type:?})");
        Ok(())
    }

    /// Full self test
    pub fn selftest(&mut self) -> Result<()> {
        self.execute(&TpmRequest::new(TpmCc::SelfTest).param(&1u8))?;
        info!("TPM self test passed");
        Ok(())
    }

    /// TPM2_Clear under lockout authorization
    pub fn clear(&mut self, lockout_password: Option<&str>) -> Result<()> {
        let request = TpmRequest::new(TpmCc::Clear)
            .handle(tpm_rh::LOCKOUT)
            .password(auth_value(lockout_password)?);
        self.execute(&request)?;
        info!("TPM cleared");
        Ok(())
    }
}

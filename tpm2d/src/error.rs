// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;
use tpm2::TpmCc;
use tpm_types::HexError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("no TPM device context")]
    NoDevice,
    #[error("TPM device context already open")]
    AlreadyOpen,
    #[error("bad handle 0x{0:08x}")]
    BadHandle(u32),
    #[error("value rejected: {0}")]
    ValueRejected(String),
    #[error("insufficient buffer: {0}")]
    InsufficientBuffer(String),
    #[error("{command} failed, rc {rc:08x}: {description}")]
    Protocol {
        command: TpmCc,
        rc: u32,
        description: String,
    },
    #[error("verification failure: {0}")]
    Verification(String),
    #[error("conversion error: {0}")]
    Conversion(#[from] HexError),
    #[error("transport failure: {0:#}")]
    Transport(#[from] anyhow::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Response code carried by a protocol error
    pub fn rc(&self) -> Option<u32> {
        match self {
            Error::Protocol { rc, .. } => Some(*rc),
            _ => None,
        }
    }

    pub(crate) fn protocol(command: TpmCc, rc: u32) -> Self {
        Error::Protocol {
            command,
            rc,
            description: tpm2::rc::describe(rc).to_string(),
        }
    }
}

// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

use std::str::FromStr;
use tpm2::{tpm_rh, TpmHt};

use crate::{Error, Result};

/// Largest authorization value, sizeof(TPMU_HA)
const MAX_AUTH_SIZE: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hierarchy {
    Owner,
    Platform,
    Endorsement,
}

impl Hierarchy {
    pub fn handle(self) -> u32 {
        match self {
            Hierarchy::Owner => tpm_rh::OWNER,
            Hierarchy::Platform => tpm_rh::PLATFORM,
            Hierarchy::Endorsement => tpm_rh::ENDORSEMENT,
        }
    }
}

impl FromStr for Hierarchy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "o" | "owner" => Ok(Hierarchy::Owner),
            "p" | "platform" => Ok(Hierarchy::Platform),
            "e" | "endorsement" => Ok(Hierarchy::Endorsement),
            _ => Err(format!("unknown hierarchy: {s}")),
        }
    }
}

/// Fail with [`Error::BadHandle`] unless the handle carries one of `types`
pub(crate) fn check_handle(handle: u32, types: &[TpmHt]) -> Result<()> {
    if types.iter().any(|t| t.matches(handle)) {
        Ok(())
    } else {
        Err(Error::BadHandle(handle))
    }
}

pub(crate) fn check_key_handle(handle: u32) -> Result<()> {
    check_handle(handle, &[TpmHt::Transient, TpmHt::Persistent])
}

/// Authorization value of an optional password
pub(crate) fn auth_value(password: Option<&str>) -> Result<&[u8]> {
    let auth = password.map(str::as_bytes).unwrap_or_default();
    if auth.len() > MAX_AUTH_SIZE {
        return Err(Error::InsufficientBuffer(format!(
            "password of {} bytes exceeds {MAX_AUTH_SIZE}",
            auth.len()
        )));
    }
    Ok(auth)
}

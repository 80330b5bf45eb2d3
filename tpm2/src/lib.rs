// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Pure Rust TPM 2.0 command channel
//!
//! This crate speaks the TPM 2.0 command protocol directly to the TPM
//! device or to a TPM simulator, without C library dependencies.
//!
//! ## Layers
//!
//! - [`CommandBuffer`] / [`ResponseBuffer`] and the typed structures in
//!   this crate root handle marshalling
//! - [`Transport`] moves raw frames: [`TpmDevice`] for `/dev/tpmrm0` or
//!   `/dev/tpm0`, [`SimulatorTransport`] for the reference simulator
//! - [`TpmChannel`] is the typed request/response interface; [`DeviceChannel`]
//!   implements it and keeps HMAC session state, including parameter
//!   encryption and response verification
//!
//! ## Example
//!
//! ```no_run
//! use tpm2::{DeviceChannel, TpmCc, TpmChannel, TpmRequest};
//!
//! let mut channel = DeviceChannel::open(None)?; // Auto-detect TPM device
//! let reply = channel.execute(&TpmRequest::new(TpmCc::GetRandom).param(&16u16))?;
//! # Ok::<(), anyhow::Error>(())
//! ```

mod channel;
mod constants;
mod device;
mod marshal;
pub mod rc;
pub mod session;
mod types;

pub use channel::{
    Authorization, ChannelError, ChannelResult, DeviceChannel, TpmChannel, TpmReply, TpmRequest,
};
pub use constants::*;
pub use types::*;

pub use device::{
    open_tcti, AuthCommand, AuthResponse, PlatformSignal, SimulatorTransport, TpmCommand,
    TpmDevice, TpmResponse, Transport,
};
pub use marshal::{CommandBuffer, Marshal, ResponseBuffer, Unmarshal};

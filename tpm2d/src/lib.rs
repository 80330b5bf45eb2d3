// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! TPM 2.0 session and key lifecycle management
//!
//! All TPM access goes through a [`TpmContext`], which owns the channel to
//! the device and hands out an [`Executor`] for issuing operations:
//!
//! ```no_run
//! use tpm2d::{Config, TpmContext};
//!
//! # fn main() -> tpm2d::Result<()> {
//! let mut ctx = TpmContext::new(Config::default());
//! ctx.open()?;
//! let nonce = ctx.device()?.get_random(32)?;
//! let quote = ctx
//!     .device()?
//!     .quote(&[0, 1, 2], 0x81000001, None, Some(&tpm_types::bin_to_hex(&nonce)))?;
//! println!("{}", quote.signature);
//! ctx.destroy()?;
//! # Ok(())
//! # }
//! ```

mod attest;
mod context;
mod crypt;
mod error;
mod executor;
mod handles;
mod nv;
mod random;

pub mod config;
pub mod keys;
pub mod session;

pub use config::Config;
pub use context::TpmContext;
pub use error::{Error, Result};
pub use executor::Executor;
pub use handles::Hierarchy;
pub use keys::{read_blob_hex, AttributeOverrides, BlobSink, KeyPair, KeyRole};
pub use session::{SessionGuard, SessionKind};

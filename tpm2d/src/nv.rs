// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! NV index storage
//!
//! Transfers are single-chunk: anything larger than the TPM's maximum NV
//! buffer is refused instead of being split.

use tpm2::{
    Tpm2bAuth, Tpm2bMaxNvBuffer, Tpm2bNvPublic, TpmCc, TpmHt, TpmPt, TpmRequest, TpmaNv, TpmaSa,
    TpmsNvPublic, Unmarshal,
};
use tracing::{debug, info, warn};

use crate::executor::Executor;
use crate::handles::{auth_value, check_handle, Hierarchy};
use crate::session::SessionKind;
use crate::{Error, Result};

fn check_nv_index(index: u32) -> Result<()> {
    check_handle(index, &[TpmHt::NvIndex])
}

/// Attributes of an index defined under `hierarchy`
fn index_attributes(hierarchy: Hierarchy) -> Result<TpmaNv> {
    let by_hierarchy = match hierarchy {
        Hierarchy::Platform => TpmaNv::PP_READ | TpmaNv::PP_WRITE | TpmaNv::PLATFORM_CREATE,
        Hierarchy::Owner => TpmaNv::OWNER_READ | TpmaNv::OWNER_WRITE,
        Hierarchy::Endorsement => {
            return Err(Error::ValueRejected(
                "NV indices are defined under the owner or platform hierarchy".into(),
            ))
        }
    };
    Ok(TpmaNv::new()
        .with_nv_type(TpmaNv::NT_ORDINARY)
        .set(by_hierarchy | TpmaNv::AUTH_READ | TpmaNv::AUTH_WRITE))
}

impl Executor {
    /// Largest single NV transfer, falling back to the configured size when
    /// the TPM does not report one
    pub fn nv_max_buffer(&mut self) -> usize {
        let fallback = self.config().nv_buffer_fallback;
        let max = match self.query_property(TpmPt::NvBufferMax) {
            Ok(Some(max)) => max,
            Ok(None) => {
                warn!("TPM_PT_NV_BUFFER_MAX not reported, assuming {fallback}");
                fallback
            }
            Err(e) => {
                warn!("failed to query TPM_PT_NV_BUFFER_MAX, assuming {fallback}: {e}");
                fallback
            }
        };
        info!("max NV buffer size: {max}");
        max as usize
    }

    /// Declared size of an ordinary index; other index types report 0
    pub fn nv_data_size(&mut self, index: u32) -> Result<usize> {
        check_nv_index(index)?;
        let reply = self.execute(&TpmRequest::new(TpmCc::NvReadPublic).handle(index))?;
        let public = Tpm2bNvPublic::unmarshal(&mut reply.reader())?.nv_public;
        let nv_type = public.attributes.nv_type();
        if nv_type != TpmaNv::NT_ORDINARY {
            warn!("NV index 0x{index:08x} has type {nv_type}, not an ordinary index");
            return Ok(0);
        }
        Ok(public.data_size as usize)
    }

    pub fn nv_define_space(
        &mut self,
        hierarchy: Hierarchy,
        index: u32,
        size: u16,
        hierarchy_password: Option<&str>,
        index_password: Option<&str>,
    ) -> Result<()> {
        check_nv_index(index)?;
        let attributes = index_attributes(hierarchy)?;
        let hierarchy_auth = auth_value(hierarchy_password)?;
        let public = Tpm2bNvPublic {
            nv_public: TpmsNvPublic::new(index, self.config().hash_alg(), attributes, size),
        };
        let index_auth = Tpm2bAuth::new(auth_value(index_password)?);

        let mut session =
            self.open_session(SessionKind::Hmac, hierarchy.handle(), Some(hierarchy_auth))?;
        let request = TpmRequest::new(TpmCc::NvDefineSpace)
            .handle(hierarchy.handle())
            .session(
                session.handle(),
                TpmaSa::new().with_decrypt().with_continue_session(),
                hierarchy_auth,
            )
            .param(&index_auth)
            .param(&public);
        let outcome = session.execute(&request);
        session.finish(outcome)?;
        debug!("defined NV index 0x{index:08x}, {size} bytes");
        Ok(())
    }

    pub fn nv_undefine_space(
        &mut self,
        hierarchy: Hierarchy,
        index: u32,
        hierarchy_password: Option<&str>,
    ) -> Result<()> {
        check_nv_index(index)?;
        index_attributes(hierarchy)?;
        let request = TpmRequest::new(TpmCc::NvUndefineSpace)
            .handle(hierarchy.handle())
            .handle(index)
            .password(auth_value(hierarchy_password)?);
        self.execute(&request)?;
        debug!("undefined NV index 0x{index:08x}");
        Ok(())
    }

    /// Write `data` at offset zero
    pub fn nv_write(
        &mut self,
        index: u32,
        index_password: Option<&str>,
        data: &[u8],
    ) -> Result<()> {
        check_nv_index(index)?;
        let auth = auth_value(index_password)?;
        let max = self.nv_max_buffer();
        if data.len() > max {
            return Err(Error::InsufficientBuffer(format!(
                "NV write of {} bytes exceeds the {max} byte maximum",
                data.len()
            )));
        }

        let mut session = self.open_session(SessionKind::Hmac, index, Some(auth))?;
        let request = TpmRequest::new(TpmCc::NvWrite)
            .handle(index)
            .handle(index)
            .session(
                session.handle(),
                TpmaSa::new().with_decrypt().with_continue_session(),
                auth,
            )
            .param(&Tpm2bMaxNvBuffer::new(data))
            .param(&0u16);
        let outcome = session.execute(&request);
        session.finish(outcome)?;
        debug!("wrote {} bytes to NV index 0x{index:08x}", data.len());
        Ok(())
    }

    /// Read the whole index. `capacity` is the most the caller accepts.
    pub fn nv_read(
        &mut self,
        index: u32,
        index_password: Option<&str>,
        capacity: usize,
    ) -> Result<Vec<u8>> {
        check_nv_index(index)?;
        let auth = auth_value(index_password)?;
        let size = self.nv_data_size(index)?;
        let max = self.nv_max_buffer();
        if size > max {
            return Err(Error::InsufficientBuffer(format!(
                "NV index 0x{index:08x} holds {size} bytes, more than the {max} byte maximum"
            )));
        }
        if size > capacity {
            return Err(Error::InsufficientBuffer(format!(
                "NV index 0x{index:08x} holds {size} bytes, caller accepts {capacity}"
            )));
        }

        let mut session = self.open_session(SessionKind::Hmac, index, Some(auth))?;
        let request = TpmRequest::new(TpmCc::NvRead)
            .handle(index)
            .handle(index)
            .session(
                session.handle(),
                TpmaSa::new().with_encrypt().with_continue_session(),
                auth,
            )
            .param(&(size as u16))
            .param(&0u16);
        let outcome = session
            .execute(&request)
            .and_then(|reply| Ok(Tpm2bMaxNvBuffer::from_bytes(&reply.params)?.buffer));
        let data = session.finish(outcome)?;
        debug!("read {} bytes from NV index 0x{index:08x}", data.len());
        Ok(data)
    }
}

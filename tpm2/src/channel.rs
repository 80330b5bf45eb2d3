// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Typed command channel
//!
//! [`TpmChannel`] is the seam between session/key orchestration and the wire:
//! callers hand over a command code, handles, authorization entries and
//! marshalled parameters, and get back response handles and parameters.
//! [`DeviceChannel`] is the implementation that talks to a real transport
//! and owns all session cryptography.

use anyhow::{anyhow, bail, Context};
use std::collections::HashMap;
use tracing::{debug, trace};

use crate::constants::*;
use crate::device::*;
use crate::marshal::*;
use crate::session::{self, ParamDirection, SessionState};
use crate::types::*;

/// Failure of a channel exchange
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// The TPM answered with a non-success response code
    #[error("TPM response code 0x{0:08x}")]
    Rc(u32),
    /// The exchange itself failed: I/O, framing or session verification
    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

pub type ChannelResult<T> = std::result::Result<T, ChannelError>;

/// One entry of the authorization area, in handle order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authorization {
    /// Plaintext password (TPM_RS_PW)
    Password(Vec<u8>),
    /// A started HMAC or policy session. `auth` is the authorization value of
    /// the entity at the same position in the handle list; sessions placed
    /// after the authorized handles only protect parameters.
    Session {
        handle: u32,
        attributes: TpmaSa,
        auth: Vec<u8>,
    },
}

/// A command ready for the channel
#[derive(Debug, Clone)]
pub struct TpmRequest {
    pub code: TpmCc,
    pub handles: Vec<u32>,
    pub auths: Vec<Authorization>,
    pub params: Vec<u8>,
    /// Authorization value of the bind entity, StartAuthSession only
    pub bind_auth: Option<Vec<u8>>,
}

impl TpmRequest {
    pub fn new(code: TpmCc) -> Self {
        Self {
            code,
            handles: Vec::new(),
            auths: Vec::new(),
            params: Vec::new(),
            bind_auth: None,
        }
    }

    pub fn handle(mut self, handle: u32) -> Self {
        self.handles.push(handle);
        self
    }

    pub fn password(mut self, password: &[u8]) -> Self {
        self.auths.push(Authorization::Password(password.to_vec()));
        self
    }

    pub fn session(mut self, handle: u32, attributes: TpmaSa, auth: &[u8]) -> Self {
        self.auths.push(Authorization::Session {
            handle,
            attributes,
            auth: auth.to_vec(),
        });
        self
    }

    pub fn bind_auth(mut self, auth: Option<&[u8]>) -> Self {
        self.bind_auth = auth.map(<[u8]>::to_vec);
        self
    }

    /// Append a marshallable parameter
    pub fn param<T: Marshal + ?Sized>(mut self, value: &T) -> Self {
        let mut buf = CommandBuffer::new();
        value.marshal(&mut buf);
        self.params.extend_from_slice(buf.as_bytes());
        self
    }

    pub fn param_tpm2b(mut self, data: &[u8]) -> Self {
        let mut buf = CommandBuffer::with_capacity(data.len() + 2);
        buf.put_tpm2b(data);
        self.params.extend_from_slice(buf.as_bytes());
        self
    }

    /// Parameters as a read cursor, for channel implementations
    pub fn params_reader(&self) -> ResponseBuffer<'_> {
        ResponseBuffer::new(&self.params)
    }
}

/// A successful reply
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TpmReply {
    pub handles: Vec<u32>,
    pub params: Vec<u8>,
}

impl TpmReply {
    pub fn reader(&self) -> ResponseBuffer<'_> {
        ResponseBuffer::new(&self.params)
    }

    pub fn handle(&self, index: usize) -> anyhow::Result<u32> {
        self.handles
            .get(index)
            .copied()
            .ok_or_else(|| anyhow!("response carries no handle #{index}"))
    }
}

/// Typed command/response exchange with a TPM
pub trait TpmChannel: Send {
    fn execute(&mut self, request: &TpmRequest) -> ChannelResult<TpmReply>;

    /// Read one fixed TPM property. `None` means the TPM did not report it.
    fn query_property(&mut self, property: TpmPt) -> ChannelResult<Option<u32>> {
        let request = TpmRequest::new(TpmCc::GetCapability)
            .param(&TpmCap::TpmProperties.to_u32())
            .param(&property.to_u32())
            .param(&1u32);
        let reply = self.execute(&request)?;
        let data = TpmPropertyData::unmarshal(&mut reply.reader())?;
        Ok(data
            .properties
            .iter()
            .find(|p| p.property == property.to_u32())
            .map(|p| p.value))
    }

    fn platform_signal(&mut self, signal: PlatformSignal) -> ChannelResult<()>;
}

/// [`TpmChannel`] over a byte [`Transport`]
pub struct DeviceChannel {
    transport: Box<dyn Transport>,
    sessions: HashMap<u32, SessionState>,
}

impl DeviceChannel {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            transport,
            sessions: HashMap::new(),
        }
    }

    /// Open the transport named by a TCTI-style selector
    pub fn open(tcti: Option<&str>) -> anyhow::Result<Self> {
        let transport = open_tcti(tcti)?;
        debug!("opened TPM transport {}", transport.describe());
        Ok(Self::new(transport))
    }

    pub fn describe(&self) -> String {
        self.transport.describe()
    }

    /// Send one framed command; non-success codes become [`ChannelError::Rc`]
    fn roundtrip(
        &mut self,
        code: TpmCc,
        handles: &[u32],
        auths: &[AuthCommand],
        params: &[u8],
    ) -> ChannelResult<ResponseAreas> {
        let command = TpmCommand::build(code, handles, auths, params).finalize();
        trace!("{code}: sending {} bytes", command.len());
        let raw = self
            .transport
            .transmit(&command)
            .with_context(|| format!("{code} exchange failed"))?;
        let response = TpmResponse::parse(&raw)?;
        if !response.is_success() {
            return Err(ChannelError::Rc(response.response_code));
        }
        Ok(response.split(code.response_handle_count(), auths.len())?)
    }

    /// Name of the entity behind `handle`
    fn entity_name(&mut self, handle: u32) -> ChannelResult<Vec<u8>> {
        match TpmHt::of(handle) {
            Some(TpmHt::NvIndex) => {
                let rsp = self.roundtrip(TpmCc::NvReadPublic, &[handle], &[], &[])?;
                let mut buf = ResponseBuffer::new(&rsp.params);
                Tpm2bNvPublic::unmarshal(&mut buf)?;
                Ok(Tpm2bName::unmarshal(&mut buf)?.buffer)
            }
            Some(TpmHt::Transient | TpmHt::Persistent) => {
                let rsp = self.roundtrip(TpmCc::ReadPublic, &[handle], &[], &[])?;
                let mut buf = ResponseBuffer::new(&rsp.params);
                Tpm2bPublic::unmarshal(&mut buf)?;
                Ok(Tpm2bName::unmarshal(&mut buf)?.buffer)
            }
            _ => Ok(handle.to_be_bytes().to_vec()),
        }
    }

    fn fresh_nonce(size: usize) -> ChannelResult<Vec<u8>> {
        let mut nonce = vec![0u8; size];
        getrandom::fill(&mut nonce).map_err(|e| anyhow!("failed to generate nonce: {e}"))?;
        Ok(nonce)
    }

    fn start_session(&mut self, request: &TpmRequest) -> ChannelResult<TpmReply> {
        let &[tpm_key, bind] = request.handles.as_slice() else {
            return Err(anyhow!("StartAuthSession takes exactly two handles").into());
        };
        if tpm_key != tpm_rh::NULL {
            return Err(anyhow!("salted sessions are not supported").into());
        }

        let mut reader = request.params_reader();
        let nonce_caller = reader.get_tpm2b()?;
        let salt = reader.get_tpm2b()?;
        let session_type = reader.get_u8()?;
        let symmetric = TpmtSymDef::unmarshal(&mut reader)?;
        let auth_hash_raw = reader.get_u16()?;
        reader.finish()?;

        let session_type = TpmSe::from_u8(session_type)
            .ok_or_else(|| anyhow!("unknown session type {session_type}"))?;
        let auth_hash = TpmAlgId::from_u16(auth_hash_raw)
            .filter(|alg| alg.is_hash())
            .ok_or_else(|| anyhow!("invalid session hash 0x{auth_hash_raw:04x}"))?;

        let nonce_caller = if nonce_caller.is_empty() {
            Self::fresh_nonce(auth_hash.digest_size())?
        } else {
            nonce_caller
        };
        let bind_name = if bind == tpm_rh::NULL {
            None
        } else {
            Some(self.entity_name(bind)?)
        };

        let mut params = CommandBuffer::new();
        params.put_tpm2b(&nonce_caller);
        params.put_tpm2b(&salt);
        params.put_u8(session_type as u8);
        symmetric.marshal(&mut params);
        params.put_u16(auth_hash.to_u16());

        let rsp = self.roundtrip(
            TpmCc::StartAuthSession,
            &request.handles,
            &[],
            params.as_bytes(),
        )?;
        let handle = *rsp
            .handles
            .first()
            .ok_or_else(|| anyhow!("StartAuthSession returned no handle"))?;
        let nonce_tpm = Tpm2bNonce::from_bytes(&rsp.params)?.buffer;

        let bind_auth = request.bind_auth.as_deref().unwrap_or_default();
        let state = SessionState::new(
            handle,
            session_type,
            auth_hash,
            symmetric,
            bind_name.map(|name| (name, bind_auth)),
            nonce_caller,
            nonce_tpm,
        )?;
        debug!(
            "session 0x{handle:08x} started, bound: {}, symmetric: {:?}",
            state.is_bound(),
            symmetric.algorithm()
        );
        self.sessions.insert(handle, state);

        Ok(TpmReply {
            handles: rsp.handles,
            params: rsp.params,
        })
    }

    fn run(&mut self, request: &TpmRequest) -> ChannelResult<TpmReply> {
        let code = request.code;
        let has_sessions = request
            .auths
            .iter()
            .any(|a| matches!(a, Authorization::Session { .. }));

        let names = if has_sessions {
            request
                .handles
                .iter()
                .map(|&h| self.entity_name(h))
                .collect::<ChannelResult<Vec<_>>>()?
        } else {
            Vec::new()
        };

        // Fresh caller nonces for every session in use
        for auth in &request.auths {
            if let Authorization::Session { handle, .. } = auth {
                let state = self
                    .sessions
                    .get_mut(handle)
                    .ok_or_else(|| anyhow!("session 0x{handle:08x} is not known to the channel"))?;
                state.nonce_caller = Self::fresh_nonce(state.auth_hash.digest_size())?;
            }
        }

        let mut params = request.params.clone();
        if let Some((state, auth)) = self.cipher_session(request, TpmaSa::decrypt) {
            let body = first_tpm2b_mut(&mut params)?;
            state.apply_param_cipher(ParamDirection::Command, auth, body)?;
        }

        let mut auth_area = Vec::with_capacity(request.auths.len());
        let mut hmac_keys = Vec::with_capacity(request.auths.len());
        for (index, auth) in request.auths.iter().enumerate() {
            match auth {
                Authorization::Password(password) => {
                    auth_area.push(AuthCommand {
                        session_handle: tpm_rh::PW,
                        nonce: Vec::new(),
                        attributes: TpmaSa::new().with_continue_session(),
                        hmac: password.clone(),
                    });
                    hmac_keys.push(None);
                }
                Authorization::Session {
                    handle,
                    attributes,
                    auth,
                } => {
                    let state = &self.sessions[handle];
                    let cc = code.to_u32().to_be_bytes();
                    let mut parts: Vec<&[u8]> = vec![&cc];
                    parts.extend(names.iter().map(Vec::as_slice));
                    parts.push(&params);
                    let cp_hash = session::digest(state.auth_hash, &parts)?;
                    let key = state.hmac_key(names.get(index).map(Vec::as_slice), auth);
                    let hmac = state.command_hmac(&key, &cp_hash, *attributes)?;
                    auth_area.push(AuthCommand {
                        session_handle: *handle,
                        nonce: state.nonce_caller.clone(),
                        attributes: *attributes,
                        hmac,
                    });
                    hmac_keys.push(Some(key));
                }
            }
        }

        let rsp = self.roundtrip(code, &request.handles, &auth_area, &params)?;
        if rsp.auths.len() != request.auths.len() {
            return Err(anyhow!(
                "{code}: expected {} response authorizations, got {}",
                request.auths.len(),
                rsp.auths.len()
            )
            .into());
        }

        let mut closed = Vec::new();
        for ((auth, key), rsp_auth) in request.auths.iter().zip(&hmac_keys).zip(&rsp.auths) {
            let (Authorization::Session { handle, .. }, Some(key)) = (auth, key) else {
                continue;
            };
            let Some(state) = self.sessions.get_mut(handle) else {
                continue;
            };
            state.nonce_tpm = rsp_auth.nonce.clone();
            let rp_hash = session::digest(
                state.auth_hash,
                &[&[0u8; 4][..], &code.to_u32().to_be_bytes(), &rsp.params],
            )?;
            let expected = state.response_hmac(key, &rp_hash, rsp_auth.attributes)?;
            if expected != rsp_auth.hmac {
                return Err(
                    anyhow!("{code}: response HMAC mismatch on session 0x{handle:08x}").into(),
                );
            }
            if !rsp_auth.attributes.continue_session() {
                closed.push(*handle);
            }
        }

        let mut params = rsp.params;
        if let Some((state, auth)) = self.cipher_session(request, TpmaSa::encrypt) {
            let body = first_tpm2b_mut(&mut params)?;
            state.apply_param_cipher(ParamDirection::Response, auth, body)?;
        }
        for handle in closed {
            debug!("session 0x{handle:08x} closed by the TPM");
            self.sessions.remove(&handle);
        }

        Ok(TpmReply {
            handles: rsp.handles,
            params,
        })
    }

    /// The session carrying `direction` parameter encryption, with the
    /// authorization value used for its key
    fn cipher_session<'a>(
        &'a self,
        request: &'a TpmRequest,
        direction: fn(TpmaSa) -> bool,
    ) -> Option<(&'a SessionState, &'a [u8])> {
        request.auths.iter().find_map(|auth| match auth {
            Authorization::Session {
                handle,
                attributes,
                auth,
            } if direction(*attributes) => self.sessions.get(handle).map(|s| (s, auth.as_slice())),
            _ => None,
        })
    }
}

/// Body of the leading TPM2B parameter
fn first_tpm2b_mut(params: &mut [u8]) -> anyhow::Result<&mut [u8]> {
    if params.len() < 2 {
        bail!("parameter encryption requested but no sized parameter present");
    }
    let size = u16::from_be_bytes([params[0], params[1]]) as usize;
    params
        .get_mut(2..2 + size)
        .ok_or_else(|| anyhow!("leading TPM2B parameter overruns the parameter area"))
}

impl TpmChannel for DeviceChannel {
    fn execute(&mut self, request: &TpmRequest) -> ChannelResult<TpmReply> {
        match request.code {
            TpmCc::StartAuthSession => self.start_session(request),
            TpmCc::FlushContext => {
                // The handle is gone or unusable whatever the TPM answers
                let flushed = request.params_reader().get_u32()?;
                let result = self.run(request);
                if self.sessions.remove(&flushed).is_some() {
                    debug!("session 0x{flushed:08x} flushed");
                }
                result
            }
            _ => self.run(request),
        }
    }

    fn platform_signal(&mut self, signal: PlatformSignal) -> ChannelResult<()> {
        Ok(self.transport.platform_signal(signal)?)
    }
}

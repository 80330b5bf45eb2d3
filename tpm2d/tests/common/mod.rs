// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tpm2::{
    tpm_rc, Authorization, ChannelError, ChannelResult, CommandBuffer, Marshal, PlatformSignal,
    Tpm2bAuth, Tpm2bNvPublic, TpmAlgId, TpmCc, TpmChannel, TpmPt, TpmReply,
    TpmRequest, TpmSt, TpmaNv, TpmlPcrSelection, TpmsNvPublic, TpmtSignature, Unmarshal,
    TPM_GENERATED_VALUE,
};
use tpm2d::{Config, TpmContext};

pub const NV_INDEX: u32 = 0x01500020;
pub const SIGNING_KEY: u32 = 0x81000010;

pub struct NvSlot {
    pub attributes: TpmaNv,
    pub data_size: u16,
    pub data: Vec<u8>,
}

/// What the mock TPM saw and how it should answer
pub struct MockState {
    pub requests: Vec<TpmRequest>,
    pub started: Vec<u32>,
    pub flushed: Vec<u32>,
    pub open_sessions: HashSet<u32>,
    pub signals: Vec<PlatformSignal>,
    /// Reported TPM_PT_NV_BUFFER_MAX; `None` makes the query fail
    pub nv_buffer_max: Option<u32>,
    pub nv: HashMap<u32, NvSlot>,
    /// Response codes forced per command
    pub fail: HashMap<TpmCc, u32>,
    /// Most bytes one GetRandom answer carries
    pub random_chunk: usize,
    /// Answer GetRandom with zero bytes
    pub random_empty: bool,
    /// Extra data the quote reports instead of echoing the request
    pub quote_extra_data: Option<Vec<u8>>,
    next_session: u32,
    next_random: u8,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            requests: Vec::new(),
            started: Vec::new(),
            flushed: Vec::new(),
            open_sessions: HashSet::new(),
            signals: Vec::new(),
            nv_buffer_max: Some(1024),
            nv: HashMap::new(),
            fail: HashMap::new(),
            random_chunk: 32,
            random_empty: false,
            quote_extra_data: None,
            next_session: 0x02000000,
            next_random: 0,
        }
    }
}

impl MockState {
    pub fn codes(&self) -> Vec<TpmCc> {
        self.requests.iter().map(|r| r.code).collect()
    }

    pub fn count(&self, code: TpmCc) -> usize {
        self.requests.iter().filter(|r| r.code == code).count()
    }

    pub fn last(&self, code: TpmCc) -> Option<&TpmRequest> {
        self.requests.iter().rev().find(|r| r.code == code)
    }

    pub fn define_ordinary(&mut self, index: u32, data_size: u16, data: &[u8]) {
        self.nv.insert(
            index,
            NvSlot {
                attributes: TpmaNv::new().with_nv_type(TpmaNv::NT_ORDINARY),
                data_size,
                data: data.to_vec(),
            },
        );
    }
}

pub struct MockTpm {
    state: Arc<Mutex<MockState>>,
}

impl MockTpm {
    pub fn new() -> (Self, Arc<Mutex<MockState>>) {
        let state = Arc::new(Mutex::new(MockState::default()));
        (
            Self {
                state: state.clone(),
            },
            state,
        )
    }
}

/// An open context backed by a fresh mock
pub fn mock_context(config: Config) -> (TpmContext, Arc<Mutex<MockState>>) {
    let (tpm, state) = MockTpm::new();
    let mut ctx = TpmContext::new(config);
    ctx.init(Box::new(tpm)).unwrap();
    (ctx, state)
}

fn reply(params: CommandBuffer) -> TpmReply {
    TpmReply {
        handles: Vec::new(),
        params: params.into_vec(),
    }
}

fn attest_body(extra_data: &[u8], selection: &TpmlPcrSelection) -> Vec<u8> {
    let mut buf = CommandBuffer::new();
    buf.put_u32(TPM_GENERATED_VALUE);
    buf.put_u16(TpmSt::AttestQuote.to_u16());
    buf.put_tpm2b(&[0x00, 0x0b, 0xaa]);
    buf.put_tpm2b(extra_data);
    // clock info
    buf.put_u64(1000);
    buf.put_u32(1);
    buf.put_u32(0);
    buf.put_u8(1);
    buf.put_u64(0x2000_0000_0000_0001);
    selection.marshal(&mut buf);
    buf.put_tpm2b(&[0x5a; 32]);
    buf.into_vec()
}

impl MockState {
    fn answer(&mut self, request: &TpmRequest) -> ChannelResult<TpmReply> {
        if let Some(&rc) = self.fail.get(&request.code) {
            return Err(ChannelError::Rc(rc));
        }
        for auth in &request.auths {
            if let Authorization::Session { handle, .. } = auth {
                if !self.open_sessions.contains(handle) {
                    return Err(ChannelError::Rc(tpm_rc::VALUE));
                }
            }
        }
        let mut params = request.params_reader();
        let mut out = CommandBuffer::new();
        match request.code {
            TpmCc::StartAuthSession => {
                let handle = self.next_session;
                self.next_session += 1;
                self.started.push(handle);
                self.open_sessions.insert(handle);
                out.put_tpm2b(&[0x11; 32]);
                return Ok(TpmReply {
                    handles: vec![handle],
                    params: out.into_vec(),
                });
            }
            TpmCc::FlushContext => {
                let handle = params.get_u32()?;
                if !self.open_sessions.remove(&handle) {
                    return Err(ChannelError::Rc(tpm_rc::HANDLE));
                }
                self.flushed.push(handle);
            }
            TpmCc::NvReadPublic => {
                let index = request.handles[0];
                let slot = self.nv.get(&index).ok_or(ChannelError::Rc(tpm_rc::HANDLE))?;
                Tpm2bNvPublic {
                    nv_public: TpmsNvPublic::new(
                        index,
                        TpmAlgId::Sha256,
                        slot.attributes,
                        slot.data_size,
                    ),
                }
                .marshal(&mut out);
                out.put_tpm2b(&index.to_be_bytes());
            }
            TpmCc::NvDefineSpace => {
                let _auth = Tpm2bAuth::unmarshal(&mut params)?;
                let public = Tpm2bNvPublic::unmarshal(&mut params)?.nv_public;
                if self.nv.contains_key(&public.nv_index) {
                    return Err(ChannelError::Rc(tpm_rc::NV_DEFINED));
                }
                self.nv.insert(
                    public.nv_index,
                    NvSlot {
                        attributes: public.attributes,
                        data_size: public.data_size,
                        data: Vec::new(),
                    },
                );
            }
            TpmCc::NvUndefineSpace => {
                self.nv.remove(&request.handles[1]);
            }
            TpmCc::NvWrite => {
                let data = params.get_tpm2b()?;
                let slot = self
                    .nv
                    .get_mut(&request.handles[1])
                    .ok_or(ChannelError::Rc(tpm_rc::HANDLE))?;
                slot.data = data;
            }
            TpmCc::NvRead => {
                let size = params.get_u16()? as usize;
                let slot = self
                    .nv
                    .get(&request.handles[1])
                    .ok_or(ChannelError::Rc(tpm_rc::HANDLE))?;
                if slot.data.len() < size {
                    return Err(ChannelError::Rc(tpm_rc::NV_UNINITIALIZED));
                }
                out.put_tpm2b(&slot.data[..size]);
            }
            TpmCc::GetRandom => {
                let wanted = params.get_u16()? as usize;
                let n = if self.random_empty { 0 } else { wanted.min(self.random_chunk) };
                let bytes: Vec<u8> = (0..n)
                    .map(|_| {
                        self.next_random = self.next_random.wrapping_add(1);
                        self.next_random
                    })
                    .collect();
                out.put_tpm2b(&bytes);
            }
            TpmCc::PcrRead => {
                let selection = TpmlPcrSelection::unmarshal(&mut params)?;
                out.put_u32(7);
                selection.marshal(&mut out);
                out.put_u32(1);
                out.put_tpm2b(&[0xab; 32]);
            }
            TpmCc::Quote => {
                let qualifying = params.get_tpm2b()?;
                let _scheme = tpm2::TpmtScheme::unmarshal(&mut params)?;
                let selection = TpmlPcrSelection::unmarshal(&mut params)?;
                let extra = self.quote_extra_data.clone().unwrap_or(qualifying);
                out.put_tpm2b(&attest_body(&extra, &selection));
                TpmtSignature::Rsa {
                    scheme: TpmAlgId::RsaSsa,
                    hash: TpmAlgId::Sha256,
                    sig: vec![0x5c; 256],
                }
                .marshal(&mut out);
            }
            TpmCc::CreatePrimary | TpmCc::Create => {
                let _sensitive = params.get_tpm2b()?;
                let public = params.get_tpm2b()?;
                if request.code == TpmCc::Create {
                    out.put_tpm2b(b"wrapped private area");
                }
                out.put_tpm2b(&public);
                // creationData, creationHash, creationTicket
                out.put_tpm2b(&[]);
                out.put_tpm2b(&[]);
                out.put_u16(0x8021);
                out.put_u32(request.handles[0]);
                out.put_tpm2b(&[]);
                if request.code == TpmCc::CreatePrimary {
                    return Ok(TpmReply {
                        handles: vec![0x80000000],
                        params: out.into_vec(),
                    });
                }
            }
            TpmCc::Load => {
                out.put_tpm2b(&[0x00, 0x0b, 0x01]);
                return Ok(TpmReply {
                    handles: vec![0x80000001],
                    params: out.into_vec(),
                });
            }
            TpmCc::RsaEncrypt => {
                let message = params.get_tpm2b()?;
                let mut cipher = message;
                cipher.resize(256, 0xee);
                out.put_tpm2b(&cipher);
            }
            TpmCc::RsaDecrypt => {
                let cipher = params.get_tpm2b()?;
                let end = cipher.iter().position(|&b| b == 0xee).unwrap_or(cipher.len());
                out.put_tpm2b(&cipher[..end]);
            }
            _ => {}
        }
        Ok(reply(out))
    }
}

impl TpmChannel for MockTpm {
    fn execute(&mut self, request: &TpmRequest) -> ChannelResult<TpmReply> {
        let mut state = self.state.lock().unwrap();
        state.requests.push(request.clone());
        state.answer(request)
    }

    fn query_property(&mut self, property: TpmPt) -> ChannelResult<Option<u32>> {
        let mut state = self.state.lock().unwrap();
        state.requests.push(TpmRequest::new(TpmCc::GetCapability).param(&property.to_u32()));
        match (property, state.nv_buffer_max) {
            (TpmPt::NvBufferMax, Some(max)) => Ok(Some(max)),
            (TpmPt::NvBufferMax, None) => Err(ChannelError::Rc(tpm_rc::VALUE)),
            _ => Ok(None),
        }
    }

    fn platform_signal(&mut self, signal: PlatformSignal) -> ChannelResult<()> {
        self.state.lock().unwrap().signals.push(signal);
        Ok(())
    }
}

/// Parse the sensitive/public pair a creation request carried
pub fn creation_template(request: &TpmRequest) -> tpm2::TpmtPublic {
    let mut params = request.params_reader();
    params.get_tpm2b().unwrap();
    tpm2::Tpm2bPublic::unmarshal(&mut params).unwrap().decode().unwrap()
}

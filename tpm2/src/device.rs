// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! TPM transports and command framing
//!
//! A [`Transport`] moves complete command/response byte streams. Two are
//! provided: the kernel character device (`/dev/tpmrm0`, `/dev/tpm0`) and the
//! TCP protocol spoken by the Microsoft reference simulator.

use anyhow::{anyhow, bail, Context, Result};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::Path;

use super::constants::*;
use super::marshal::*;

/// Maximum TPM command/response size
const TPM_MAX_COMMAND_SIZE: usize = 4096;

const TPM_HEADER_SIZE: usize = 10;

/// Default command port of the reference simulator
pub const MSSIM_DEFAULT_PORT: u16 = 2321;

/// Platform power signals, available on simulators only
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformSignal {
    PowerOn,
    PowerOff,
    NvOn,
}

impl PlatformSignal {
    fn simulator_code(self) -> u32 {
        match self {
            PlatformSignal::PowerOn => 1,
            PlatformSignal::PowerOff => 2,
            PlatformSignal::NvOn => 11,
        }
    }
}

/// Byte-level link to a TPM
pub trait Transport: Send {
    /// Send a complete command and return the complete response
    fn transmit(&mut self, command: &[u8]) -> Result<Vec<u8>>;

    fn platform_signal(&mut self, signal: PlatformSignal) -> Result<()> {
        bail!("{signal:?}: platform signals are not supported by this transport")
    }

    fn describe(&self) -> String;
}

/// Open a transport from a TCTI-style selector.
///
/// Accepted forms: `device:/dev/tpmrm0`, a bare device path,
/// `mssim:host:port` (port optional), and `None`/`auto` for auto-detection.
pub fn open_tcti(tcti: Option<&str>) -> Result<Box<dyn Transport>> {
    match tcti.map(str::trim) {
        None | Some("") | Some("auto") => Ok(Box::new(TpmDevice::detect()?)),
        Some(s) if s.starts_with("mssim") => {
            let addr = s.strip_prefix("mssim").unwrap_or_default();
            let addr = addr.strip_prefix(':').unwrap_or(addr);
            Ok(Box::new(SimulatorTransport::connect(addr)?))
        }
        Some(s) => Ok(Box::new(TpmDevice::open(s)?)),
    }
}

/// TPM device handle
pub struct TpmDevice {
    file: File,
    path: String,
}

impl TpmDevice {
    /// Open a TPM device
    pub fn open(path: &str) -> Result<Self> {
        let device_path = path.strip_prefix("device:").unwrap_or(path);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(device_path)
            .with_context(|| format!("failed to open TPM device: {device_path}"))?;

        Ok(Self {
            file,
            path: device_path.to_string(),
        })
    }

    /// Detect and open the default TPM device, preferring the resource manager
    pub fn detect() -> Result<Self> {
        if Path::new("/dev/tpmrm0").exists() {
            Self::open("/dev/tpmrm0")
        } else if Path::new("/dev/tpm0").exists() {
            Self::open("/dev/tpm0")
        } else {
            bail!("TPM device not found")
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Transport for TpmDevice {
    fn transmit(&mut self, command: &[u8]) -> Result<Vec<u8>> {
        self.file
            .write_all(command)
            .context("failed to write TPM command")?;

        // The driver hands back a whole response per read
        let mut response = vec![0u8; TPM_MAX_COMMAND_SIZE];
        let n = self
            .file
            .read(&mut response)
            .context("failed to read TPM response")?;

        response.truncate(n);
        Ok(response)
    }

    fn describe(&self) -> String {
        format!("device:{}", self.path)
    }
}

/// Microsoft TPM simulator over TCP.
///
/// The platform port is always the command port plus one.
pub struct SimulatorTransport {
    command: TcpStream,
    platform: TcpStream,
    addr: String,
}

impl SimulatorTransport {
    const SEND_COMMAND: u32 = 8;
    const LOCALITY: u8 = 0;

    pub fn connect(addr: &str) -> Result<Self> {
        let (host, port) = match addr.rsplit_once(':') {
            Some((host, port)) => (
                host,
                port.parse::<u16>()
                    .with_context(|| format!("invalid simulator port: {port}"))?,
            ),
            None if addr.is_empty() => ("127.0.0.1", MSSIM_DEFAULT_PORT),
            None => (addr, MSSIM_DEFAULT_PORT),
        };
        let platform_port = port
            .checked_add(1)
            .ok_or_else(|| anyhow!("simulator port {port} leaves no room for platform port"))?;

        let command = TcpStream::connect((host, port))
            .with_context(|| format!("failed to connect to TPM simulator at {host}:{port}"))?;
        let platform = TcpStream::connect((host, platform_port)).with_context(|| {
            format!("failed to connect to TPM simulator platform port {host}:{platform_port}")
        })?;

        Ok(Self {
            command,
            platform,
            addr: format!("{host}:{port}"),
        })
    }

    fn read_u32(stream: &mut TcpStream) -> Result<u32> {
        let mut word = [0u8; 4];
        stream.read_exact(&mut word)?;
        Ok(u32::from_be_bytes(word))
    }

    fn read_ack(stream: &mut TcpStream) -> Result<()> {
        match Self::read_u32(stream).context("failed to read simulator ack")? {
            0 => Ok(()),
            code => bail!("simulator returned status {code}"),
        }
    }
}

impl Transport for SimulatorTransport {
    fn transmit(&mut self, command: &[u8]) -> Result<Vec<u8>> {
        let mut frame = CommandBuffer::with_capacity(command.len() + 9);
        frame.put_u32(Self::SEND_COMMAND);
        frame.put_u8(Self::LOCALITY);
        frame.put_u32(command.len() as u32);
        frame.put_bytes(command);
        self.command
            .write_all(frame.as_bytes())
            .context("failed to write TPM command to simulator")?;

        let size = Self::read_u32(&mut self.command).context("failed to read response size")?;
        if size as usize > TPM_MAX_COMMAND_SIZE {
            bail!("simulator response too large: {size} bytes");
        }
        let mut response = vec![0u8; size as usize];
        self.command
            .read_exact(&mut response)
            .context("failed to read TPM response from simulator")?;
        Self::read_ack(&mut self.command)?;
        Ok(response)
    }

    fn platform_signal(&mut self, signal: PlatformSignal) -> Result<()> {
        self.platform
            .write_all(&signal.simulator_code().to_be_bytes())
            .with_context(|| format!("failed to send {signal:?}"))?;
        Self::read_ack(&mut self.platform)
    }

    fn describe(&self) -> String {
        format!("mssim:{}", self.addr)
    }
}

/// One entry of a command authorization area
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthCommand {
    pub session_handle: u32,
    pub nonce: Vec<u8>,
    pub attributes: TpmaSa,
    pub hmac: Vec<u8>,
}

impl Marshal for AuthCommand {
    fn marshal(&self, buf: &mut CommandBuffer) {
        buf.put_u32(self.session_handle);
        buf.put_tpm2b(&self.nonce);
        buf.put_u8(self.attributes.0);
        buf.put_tpm2b(&self.hmac);
    }
}

/// One entry of a response authorization area
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthResponse {
    pub nonce: Vec<u8>,
    pub attributes: TpmaSa,
    pub hmac: Vec<u8>,
}

impl Unmarshal for AuthResponse {
    fn unmarshal(buf: &mut ResponseBuffer) -> Result<Self> {
        Ok(Self {
            nonce: buf.get_tpm2b()?,
            attributes: TpmaSa(buf.get_u8()?),
            hmac: buf.get_tpm2b()?,
        })
    }
}

/// TPM command builder
pub struct TpmCommand {
    buf: CommandBuffer,
}

impl TpmCommand {
    /// Assemble a complete command. The tag is chosen from whether an
    /// authorization area is present.
    pub fn build(code: TpmCc, handles: &[u32], auths: &[AuthCommand], params: &[u8]) -> Self {
        let mut buf = CommandBuffer::with_capacity(TPM_HEADER_SIZE + params.len() + 64);
        let tag = if auths.is_empty() {
            TpmSt::NoSessions
        } else {
            TpmSt::Sessions
        };

        // Header: tag (2) + size (4) + command code (4)
        buf.put_u16(tag.to_u16());
        buf.put_u32(0);
        buf.put_u32(code.to_u32());
        for &handle in handles {
            buf.put_u32(handle);
        }
        if !auths.is_empty() {
            let mut area = CommandBuffer::new();
            for auth in auths {
                auth.marshal(&mut area);
            }
            buf.put_u32(area.len() as u32);
            buf.put_bytes(area.as_bytes());
        }
        buf.put_bytes(params);

        Self { buf }
    }

    /// Patch the size field and return the bytes
    pub fn finalize(mut self) -> Vec<u8> {
        let size = self.buf.len() as u32;
        self.buf.update_u32(2, size);
        self.buf.into_vec()
    }
}

/// TPM response parser
#[derive(Debug)]
pub struct TpmResponse {
    pub tag: TpmSt,
    pub response_code: u32,
    pub data: Vec<u8>,
}

/// Response body split into its areas
#[derive(Debug, Default)]
pub struct ResponseAreas {
    pub handles: Vec<u32>,
    pub params: Vec<u8>,
    pub auths: Vec<AuthResponse>,
}

impl TpmResponse {
    pub fn parse(response: &[u8]) -> Result<Self> {
        if response.len() < TPM_HEADER_SIZE {
            bail!("TPM response too short: {} bytes", response.len());
        }

        let mut buf = ResponseBuffer::new(response);

        let tag_raw = buf.get_u16()?;
        let tag = TpmSt::from_u16(tag_raw)
            .ok_or_else(|| anyhow!("invalid response tag: 0x{tag_raw:04x}"))?;

        let size = buf.get_u32()? as usize;
        if size < TPM_HEADER_SIZE || response.len() < size {
            bail!(
                "TPM response size mismatch: header says {size}, got {}",
                response.len()
            );
        }

        let response_code = buf.get_u32()?;
        let data = response[TPM_HEADER_SIZE..size].to_vec();

        Ok(Self {
            tag,
            response_code,
            data,
        })
    }

    pub fn is_success(&self) -> bool {
        self.response_code == tpm_rc::SUCCESS
    }

    /// Split a successful response into handle, parameter and
    /// authorization areas. `auth_count` is the number of authorization
    /// entries the command carried.
    pub fn split(&self, handle_count: usize, auth_count: usize) -> Result<ResponseAreas> {
        let mut buf = ResponseBuffer::new(&self.data);
        let handles = (0..handle_count)
            .map(|_| buf.get_u32())
            .collect::<Result<Vec<_>>>()?;

        if self.tag != TpmSt::Sessions {
            return Ok(ResponseAreas {
                handles,
                params: buf.get_remaining(),
                auths: Vec::new(),
            });
        }

        let param_size = buf.get_u32()? as usize;
        let params = buf.get_bytes(param_size)?;
        let auths = (0..auth_count)
            .map(|_| AuthResponse::unmarshal(&mut buf))
            .collect::<Result<Vec<_>>>()
            .context("malformed response authorization area")?;
        buf.finish().context("response authorization area")?;

        Ok(ResponseAreas {
            handles,
            params,
            auths,
        })
    }
}

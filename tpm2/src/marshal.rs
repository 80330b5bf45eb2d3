// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Big-endian TPM wire encoding
//!
//! [`CommandBuffer`] grows an outgoing byte stream; [`ResponseBuffer`] walks an
//! incoming one and refuses to read past its end.

use anyhow::{bail, Context, Result};

/// Buffer for building TPM commands
#[derive(Debug, Default, Clone)]
pub struct CommandBuffer {
    data: Vec<u8>,
}

impl CommandBuffer {
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
        }
    }

    pub fn put_u8(&mut self, v: u8) {
        self.data.push(v);
    }

    pub fn put_u16(&mut self, v: u16) {
        self.data.extend_from_slice(&v.to_be_bytes());
    }

    pub fn put_u32(&mut self, v: u32) {
        self.data.extend_from_slice(&v.to_be_bytes());
    }

    pub fn put_u64(&mut self, v: u64) {
        self.data.extend_from_slice(&v.to_be_bytes());
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Put a TPM2B structure (2-byte size prefix + data).
    ///
    /// Callers are responsible for keeping `data` within the 16-bit size
    /// field; the typed wrappers in [`crate::types`] enforce their own caps.
    pub fn put_tpm2b(&mut self, data: &[u8]) {
        self.put_u16(data.len() as u16);
        self.put_bytes(data);
    }

    /// Put a structure wrapped in a TPM2B size prefix, e.g. TPM2B_PUBLIC.
    pub fn put_sized<T: Marshal + ?Sized>(&mut self, value: &T) {
        let start = self.data.len();
        self.put_u16(0);
        value.marshal(self);
        let size = (self.data.len() - start - 2) as u16;
        self.data[start..start + 2].copy_from_slice(&size.to_be_bytes());
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    /// Overwrite a u32 already written at `pos` (header size field)
    pub fn update_u32(&mut self, pos: usize, v: u32) {
        if let Some(slot) = self.data.get_mut(pos..pos + 4) {
            slot.copy_from_slice(&v.to_be_bytes());
        }
    }
}

/// Buffer for parsing TPM responses
#[derive(Debug, Clone)]
pub struct ResponseBuffer<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ResponseBuffer<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    fn take(&mut self, len: usize, what: &str) -> Result<&'a [u8]> {
        if len > self.remaining() {
            bail!(
                "buffer underflow reading {what} ({len} bytes, {} remaining)",
                self.remaining()
            );
        }
        let data: &'a [u8] = self.data;
        let v = &data[self.pos..self.pos + len];
        self.pos += len;
        Ok(v)
    }

    fn take_array<const N: usize>(&mut self, what: &str) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N, what)?);
        Ok(out)
    }

    pub fn get_u8(&mut self) -> Result<u8> {
        Ok(self.take_array::<1>("u8")?[0])
    }

    pub fn get_u16(&mut self) -> Result<u16> {
        self.take_array("u16").map(u16::from_be_bytes)
    }

    pub fn get_u32(&mut self) -> Result<u32> {
        self.take_array("u32").map(u32::from_be_bytes)
    }

    pub fn get_u64(&mut self) -> Result<u64> {
        self.take_array("u64").map(u64::from_be_bytes)
    }

    pub fn get_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        self.take(len, "bytes").map(<[u8]>::to_vec)
    }

    /// Get a TPM2B structure (2-byte size prefix + data)
    pub fn get_tpm2b(&mut self) -> Result<Vec<u8>> {
        let size = self.get_u16()? as usize;
        self.take(size, "TPM2B body").map(<[u8]>::to_vec)
    }

    /// Get a structure wrapped in a TPM2B size prefix. The inner structure
    /// must consume exactly the advertised size.
    pub fn get_sized<T: Unmarshal>(&mut self) -> Result<T> {
        let size = self.get_u16()? as usize;
        let body = self.take(size, "sized structure")?;
        let mut inner = ResponseBuffer::new(body);
        let value = T::unmarshal(&mut inner)?;
        inner.finish().context("sized structure")?;
        Ok(value)
    }

    /// Get remaining bytes
    pub fn get_remaining(&mut self) -> Vec<u8> {
        let v = self.data[self.pos..].to_vec();
        self.pos = self.data.len();
        v
    }

    /// Fail if anything is left unread
    pub fn finish(&self) -> Result<()> {
        if self.remaining() != 0 {
            bail!("{} trailing bytes", self.remaining());
        }
        Ok(())
    }
}

/// Trait for types that can be marshalled to TPM format
pub trait Marshal {
    fn marshal(&self, buf: &mut CommandBuffer);

    fn to_bytes(&self) -> Vec<u8> {
        let mut buf = CommandBuffer::new();
        self.marshal(&mut buf);
        buf.into_vec()
    }
}

/// Trait for types that can be unmarshalled from TPM format
pub trait Unmarshal: Sized {
    fn unmarshal(buf: &mut ResponseBuffer) -> Result<Self>;

    /// Decode a value that must span all of `data`
    fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut buf = ResponseBuffer::new(data);
        let value = Self::unmarshal(&mut buf)?;
        buf.finish()?;
        Ok(value)
    }
}

macro_rules! impl_int {
    ($($ty:ty => $put:ident, $get:ident;)*) => {
        $(
            impl Marshal for $ty {
                fn marshal(&self, buf: &mut CommandBuffer) {
                    buf.$put(*self);
                }
            }

            impl Unmarshal for $ty {
                fn unmarshal(buf: &mut ResponseBuffer) -> Result<Self> {
                    buf.$get()
                }
            }
        )*
    };
}

impl_int! {
    u8 => put_u8, get_u8;
    u16 => put_u16, get_u16;
    u32 => put_u32, get_u32;
    u64 => put_u64, get_u64;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Pair(u16, u32);

    impl Marshal for Pair {
        fn marshal(&self, buf: &mut CommandBuffer) {
            buf.put_u16(self.0);
            buf.put_u32(self.1);
        }
    }

    impl Unmarshal for Pair {
        fn unmarshal(buf: &mut ResponseBuffer) -> Result<Self> {
            Ok(Pair(buf.get_u16()?, buf.get_u32()?))
        }
    }

    #[test]
    fn test_sized_prefix() {
        let mut buf = CommandBuffer::new();
        buf.put_sized(&Pair(1, 2));
        assert_eq!(buf.as_bytes(), &[0, 6, 0, 1, 0, 0, 0, 2]);

        let mut rsp = ResponseBuffer::new(buf.as_bytes());
        let pair: Pair = rsp.get_sized().unwrap();
        assert_eq!((pair.0, pair.1), (1, 2));
        assert_eq!(rsp.remaining(), 0);
    }

    #[test]
    fn test_sized_rejects_slack() {
        // size claims 7 bytes but Pair only consumes 6
        let data = [0, 7, 0, 1, 0, 0, 0, 2, 0xff];
        let mut rsp = ResponseBuffer::new(&data);
        assert!(rsp.get_sized::<Pair>().is_err());
    }

    #[test]
    fn test_underflow() {
        let mut rsp = ResponseBuffer::new(&[0x00, 0x05, 0xaa]);
        assert!(rsp.get_tpm2b().is_err());
        let mut rsp = ResponseBuffer::new(&[0x01]);
        assert!(rsp.get_u32().is_err());
        assert_eq!(rsp.get_u8().unwrap(), 1);
    }
}

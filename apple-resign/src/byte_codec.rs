// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Bounds checked primitives for reading and writing binary structures.

Mach-O headers and load commands are little-endian while every code signing
structure is big-endian. Integer reads go through `scroll` with an explicit
endianness at each call site.

[ByteReader] is a cursor over a borrowed slice. A read past the end of the
slice fails with [AppleResignError::TruncatedInput] and leaves the cursor where
it was, so a caller may decide a structure is unreadable without losing its
position in the enclosing structure.

Variable length data in code signing structures is encoded as a big-endian
u32 length, the raw bytes, then NULL padding to the next 4 byte boundary.
*/

use {
    crate::error::AppleResignError,
    scroll::{IOwrite, Pread},
    std::io::Write,
};

/// Round a length up to the next multiple of 4.
pub fn align4(len: usize) -> usize {
    (len + 3) & !3
}

/// Number of bytes a length-prefixed value occupies when encoded.
pub fn length_prefixed_len(data_len: usize) -> usize {
    4 + align4(data_len)
}

/// A read cursor over a byte slice.
#[derive(Clone, Copy, Debug)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> ByteReader<'a> {
    /// Construct a reader positioned at the start of `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    /// Construct a reader positioned at `offset` within `data`.
    ///
    /// The offset is validated on the first read.
    pub fn at(data: &'a [u8], offset: usize) -> Self {
        Self { data, offset }
    }

    /// Current position relative to the start of the underlying slice.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Data not yet consumed.
    pub fn remaining(&self) -> &'a [u8] {
        self.data.get(self.offset..).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.remaining().is_empty()
    }

    pub fn read_u8(&mut self) -> Result<u8, AppleResignError> {
        Ok(self.data.gread_with(&mut self.offset, scroll::BE)?)
    }

    pub fn read_u32_be(&mut self) -> Result<u32, AppleResignError> {
        Ok(self.data.gread_with(&mut self.offset, scroll::BE)?)
    }

    pub fn read_u32_le(&mut self) -> Result<u32, AppleResignError> {
        Ok(self.data.gread_with(&mut self.offset, scroll::LE)?)
    }

    pub fn read_u64_be(&mut self) -> Result<u64, AppleResignError> {
        Ok(self.data.gread_with(&mut self.offset, scroll::BE)?)
    }

    pub fn read_u64_le(&mut self) -> Result<u64, AppleResignError> {
        Ok(self.data.gread_with(&mut self.offset, scroll::LE)?)
    }

    pub fn read_i32_be(&mut self) -> Result<i32, AppleResignError> {
        Ok(self.data.gread_with(&mut self.offset, scroll::BE)?)
    }

    /// Read exactly `len` bytes.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], AppleResignError> {
        // Not scroll: it rejects zero length reads at the end of a slice.
        let end = self
            .offset
            .checked_add(len)
            .ok_or(AppleResignError::TruncatedInput)?;
        let value = self
            .data
            .get(self.offset..end)
            .ok_or(AppleResignError::TruncatedInput)?;
        self.offset = end;

        Ok(value)
    }

    /// Read a fixed size array, such as a 16 byte segment name.
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], AppleResignError> {
        self.read_bytes(N)?
            .try_into()
            .map_err(|_| AppleResignError::TruncatedInput)
    }

    /// Advance the cursor without interpreting the skipped bytes.
    pub fn skip(&mut self, len: usize) -> Result<(), AppleResignError> {
        self.read_bytes(len).map(|_| ())
    }

    /// Read a big-endian u32 length, that many bytes, then the NULL padding
    /// aligning the next field on a 4 byte boundary.
    pub fn read_length_prefixed(&mut self) -> Result<&'a [u8], AppleResignError> {
        let start = self.offset;
        let res = self.read_length_prefixed_inner();

        if res.is_err() {
            self.offset = start;
        }

        res
    }

    fn read_length_prefixed_inner(&mut self) -> Result<&'a [u8], AppleResignError> {
        let length = self.read_u32_be()? as usize;
        let value = self.read_bytes(length)?;
        self.skip(align4(length) - length)?;

        Ok(value)
    }

    /// Read bytes up to the first NULL and consume the NULL.
    pub fn read_c_string(&mut self) -> Result<&'a str, AppleResignError> {
        let remaining = self.remaining();

        let end = remaining
            .iter()
            .position(|b| *b == 0)
            .ok_or(AppleResignError::TruncatedInput)?;

        let s = std::str::from_utf8(&remaining[..end])
            .map_err(|_| AppleResignError::MalformedIdentifier("C string"))?;

        self.offset += end + 1;

        Ok(s)
    }
}

/// Write a length-prefixed value, padded with NULLs to a 4 byte boundary.
pub fn write_length_prefixed(dest: &mut impl Write, data: &[u8]) -> Result<(), AppleResignError> {
    dest.iowrite_with(data.len() as u32, scroll::BE)?;
    dest.write_all(data)?;

    for _ in data.len()..align4(data.len()) {
        dest.iowrite(0u8)?;
    }

    Ok(())
}

/// Write a string followed by a NULL terminator.
pub fn write_c_string(dest: &mut impl Write, s: &str) -> Result<(), AppleResignError> {
    dest.write_all(s.as_bytes())?;
    dest.write_all(b"\0")?;

    Ok(())
}

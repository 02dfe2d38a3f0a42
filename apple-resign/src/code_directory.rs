// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Code directory data structure and related types.
//!
//! A code directory has a fixed header whose size depends on its version,
//! followed by an identifier string, an optional team identifier string,
//! the special hashes and the code hashes. The header's hash offset points
//! at code hash 0. Special hashes sit immediately before it, so special slot
//! `n` is at `hash_offset - n * hash_size`.

use {
    crate::{
        byte_codec::ByteReader,
        embedded_signature::{
            read_and_validate_blob_header, Blob, CodeSigningMagic, CodeSigningSlot, Digest,
            DigestType,
        },
        error::AppleResignError,
    },
    scroll::IOwrite,
    std::borrow::Cow,
};

bitflags::bitflags! {
    /// Code signature flags.
    ///
    /// These flags are embedded in the code directory and govern use of the
    /// embedded signature.
    pub struct CodeSignatureFlags: u32 {
        /// Code may act as a host that controls and supervises guest code.
        const HOST = 0x0001;
        /// The code has been sealed without a signing identity.
        const ADHOC = 0x0002;
        /// Set the "hard" status bit for the code when it starts running.
        const FORCE_HARD = 0x0100;
        /// Implicitly set the "kill" status bit for the code when it starts running.
        const FORCE_KILL = 0x0200;
        /// Force certificate expiration checks.
        const FORCE_EXPIRATION = 0x0400;
        /// Restrict dyld loading.
        const RESTRICT = 0x0800;
        /// Enforce code signing.
        const ENFORCEMENT = 0x1000;
        /// Library validation required.
        const LIBRARY_VALIDATION = 0x2000;
        /// Apply runtime hardening policies.
        const RUNTIME = 0x10000;
        /// The code was automatically signed by the linker.
        const LINKER_SIGNED = 0x20000;
    }
}

bitflags::bitflags! {
    /// Flags that influence behavior of the executable segment.
    pub struct ExecutableSegmentFlags: u64 {
        /// Executable segment belongs to main binary.
        const MAIN_BINARY = 0x0001;
        /// Allow unsigned pages (for debugging).
        const ALLOW_UNSIGNED = 0x0010;
        /// Main binary is debugger.
        const DEBUGGER = 0x0020;
        /// JIT enabled.
        const JIT = 0x0040;
        /// Skip library validation (obsolete).
        const SKIP_LIBRARY_VALIDATION = 0x0080;
        /// Can bless code directory hash for execution.
        const CAN_LOAD_CD_HASH = 0x0100;
        /// Can execute blessed code directory hash.
        const CAN_EXEC_CD_HASH = 0x0200;
    }
}

/// Version of the code directory data structure.
///
/// Each version adds fields to the fixed header.
#[derive(Clone, Copy, Debug, PartialEq)]
#[repr(u32)]
pub enum CodeDirectoryVersion {
    Initial = 0x20000,
    SupportsScatter = 0x20100,
    SupportsTeamId = 0x20200,
    SupportsCodeLimit64 = 0x20300,
    SupportsExecutableSegment = 0x20400,
}

/// Byte length of the fixed header for a code directory version.
///
/// The length includes the 8 byte blob header.
pub fn fixed_length(version: u32) -> usize {
    if version >= CodeDirectoryVersion::SupportsExecutableSegment as u32 {
        88
    } else if version >= CodeDirectoryVersion::SupportsCodeLimit64 as u32 {
        64
    } else if version >= CodeDirectoryVersion::SupportsTeamId as u32 {
        52
    } else if version >= CodeDirectoryVersion::SupportsScatter as u32 {
        48
    } else {
        44
    }
}

/// Page size used for code hashes of new code directories.
pub const PAGE_SIZE_LOG2: u8 = 12;

/// Number of special slots in new code directories.
///
/// Covers [CodeSigningSlot::Info] through [CodeSigningSlot::Entitlements].
pub const SPECIAL_SLOT_COUNT: usize = 5;

fn read_hashes<'a>(
    data: &'a [u8],
    offset: usize,
    count: usize,
    hash_size: usize,
) -> Result<Vec<Digest<'a>>, AppleResignError> {
    let end = count
        .checked_mul(hash_size)
        .and_then(|len| len.checked_add(offset))
        .ok_or(AppleResignError::OffsetOutOfRange("hash table size"))?;

    Ok(data
        .get(offset..end)
        .ok_or(AppleResignError::TruncatedInput)?
        .chunks(hash_size.max(1))
        .take(count)
        .map(|data| Digest { data: data.into() })
        .collect())
}

/// Read a NULL terminated string at an offset within the blob.
fn read_string_at<'a>(
    data: &'a [u8],
    offset: u32,
    what: &'static str,
) -> Result<Cow<'a, str>, AppleResignError> {
    ByteReader::at(data, offset as usize)
        .read_c_string()
        .map(Cow::from)
        .map_err(|e| match e {
            AppleResignError::MalformedIdentifier(_) => AppleResignError::MalformedIdentifier(what),
            e => e,
        })
}

/// A code directory blob.
///
/// Fields introduced after the initial version are `Option`, and are `None`
/// when the version predates them.
#[derive(Clone, Debug, PartialEq)]
pub struct CodeDirectoryBlob<'a> {
    /// Compatibility version.
    pub version: u32,
    /// Setup and mode flags.
    pub flags: CodeSignatureFlags,
    /// File offset to stop digesting code data at.
    pub code_limit: u32,
    /// Size of each hash in bytes.
    pub hash_size: u8,
    pub hash_type: DigestType,
    /// Platform identifier. 0 if not a platform binary.
    pub platform: u8,
    /// Page size as a power of 2. 0 means the whole image is one page.
    pub page_size_log2: u8,
    pub spare2: u32,
    // Version 0x20100
    pub scatter_offset: Option<u32>,
    // Version 0x20300
    pub spare3: Option<u32>,
    pub code_limit_64: Option<u64>,
    // Version 0x20400
    pub exec_seg_base: Option<u64>,
    pub exec_seg_limit: Option<u64>,
    pub exec_seg_flags: Option<ExecutableSegmentFlags>,

    pub ident: Cow<'a, str>,
    /// Only written for versions supporting team ids.
    pub team_name: Option<Cow<'a, str>>,
    /// Special hashes in storage order: the highest slot first and slot 1 last.
    pub special_hashes: Vec<Digest<'a>>,
    pub code_hashes: Vec<Digest<'a>>,
}

impl<'a> Blob<'a> for CodeDirectoryBlob<'a> {
    fn magic() -> u32 {
        u32::from(CodeSigningMagic::CodeDirectory)
    }

    fn from_blob_bytes(data: &'a [u8]) -> Result<Self, AppleResignError> {
        let payload = read_and_validate_blob_header(data, Self::magic(), "code directory blob")?;
        let data = &data[..payload.len() + 8];

        let mut reader = ByteReader::at(data, 8);

        let version = reader.read_u32_be()?;
        let flags = reader.read_u32_be()?;
        let flags = unsafe { CodeSignatureFlags::from_bits_unchecked(flags) };
        let hash_offset = reader.read_u32_be()?;
        let ident_offset = reader.read_u32_be()?;
        let n_special_slots = reader.read_u32_be()?;
        let n_code_slots = reader.read_u32_be()?;
        let code_limit = reader.read_u32_be()?;
        let hash_size = reader.read_u8()?;
        let hash_type = DigestType::from(reader.read_u8()?);
        let platform = reader.read_u8()?;
        let page_size_log2 = reader.read_u8()?;
        let spare2 = reader.read_u32_be()?;

        let scatter_offset = if version >= CodeDirectoryVersion::SupportsScatter as u32 {
            Some(reader.read_u32_be()?).filter(|v| *v != 0)
        } else {
            None
        };

        let team_offset = if version >= CodeDirectoryVersion::SupportsTeamId as u32 {
            Some(reader.read_u32_be()?).filter(|v| *v != 0)
        } else {
            None
        };

        let (spare3, code_limit_64) = if version >= CodeDirectoryVersion::SupportsCodeLimit64 as u32
        {
            (Some(reader.read_u32_be()?), Some(reader.read_u64_be()?))
        } else {
            (None, None)
        };

        let (exec_seg_base, exec_seg_limit, exec_seg_flags) =
            if version >= CodeDirectoryVersion::SupportsExecutableSegment as u32 {
                (
                    Some(reader.read_u64_be()?),
                    Some(reader.read_u64_be()?),
                    Some(reader.read_u64_be()?),
                )
            } else {
                (None, None, None)
            };

        let exec_seg_flags = exec_seg_flags
            .map(|flags| unsafe { ExecutableSegmentFlags::from_bits_unchecked(flags) });

        let ident = if ident_offset == 0 {
            Cow::Borrowed("")
        } else {
            read_string_at(data, ident_offset, "code directory identifier")?
        };

        let team_name = team_offset
            .map(|offset| read_string_at(data, offset, "code directory team identifier"))
            .transpose()?;

        let specials_start = (hash_offset as usize)
            .checked_sub(n_special_slots as usize * hash_size as usize)
            .ok_or(AppleResignError::OffsetOutOfRange(
                "special hashes start before code directory",
            ))?;

        let special_hashes = read_hashes(
            data,
            specials_start,
            n_special_slots as usize,
            hash_size as usize,
        )?;
        let code_hashes = read_hashes(
            data,
            hash_offset as usize,
            n_code_slots as usize,
            hash_size as usize,
        )?;

        Ok(Self {
            version,
            flags,
            code_limit,
            hash_size,
            hash_type,
            platform,
            page_size_log2,
            spare2,
            scatter_offset,
            spare3,
            code_limit_64,
            exec_seg_base,
            exec_seg_limit,
            exec_seg_flags,
            ident,
            team_name,
            special_hashes,
            code_hashes,
        })
    }

    fn serialize_payload(&self) -> Result<Vec<u8>, AppleResignError> {
        for digest in self.special_hashes.iter().chain(self.code_hashes.iter()) {
            if digest.len() != self.hash_size as usize {
                return Err(AppleResignError::HashLengthMismatch {
                    expected: self.hash_size as usize,
                    actual: digest.len(),
                });
            }
        }

        // Resolve the variable length layout before writing any offsets.
        let mut offset = fixed_length(self.version);

        let ident_offset = if self.ident.is_empty() {
            0
        } else {
            let v = offset;
            offset += self.ident.len() + 1;
            v
        };

        let team_name = self
            .team_name
            .as_ref()
            .filter(|s| self.supports_team_id() && !s.is_empty());

        let team_offset = if let Some(team) = team_name {
            let v = offset;
            offset += team.len() + 1;
            v
        } else {
            0
        };

        let hash_offset = offset + self.special_hashes.len() * self.hash_size as usize;
        let end_offset = hash_offset + self.code_hashes.len() * self.hash_size as usize;

        let hash_offset = u32::try_from(hash_offset)
            .map_err(|_| AppleResignError::OffsetOutOfRange("code directory hash offset"))?;
        u32::try_from(end_offset)
            .map_err(|_| AppleResignError::OffsetOutOfRange("code directory length"))?;

        let mut res = Vec::with_capacity(end_offset - 8);

        res.iowrite_with(self.version, scroll::BE)?;
        res.iowrite_with(self.flags.bits(), scroll::BE)?;
        res.iowrite_with(hash_offset, scroll::BE)?;
        res.iowrite_with(ident_offset as u32, scroll::BE)?;
        res.iowrite_with(self.special_hashes.len() as u32, scroll::BE)?;
        res.iowrite_with(self.code_hashes.len() as u32, scroll::BE)?;
        res.iowrite_with(self.code_limit, scroll::BE)?;
        res.iowrite_with(self.hash_size, scroll::BE)?;
        res.iowrite_with(u8::from(self.hash_type), scroll::BE)?;
        res.iowrite_with(self.platform, scroll::BE)?;
        res.iowrite_with(self.page_size_log2, scroll::BE)?;
        res.iowrite_with(self.spare2, scroll::BE)?;

        if self.version >= CodeDirectoryVersion::SupportsScatter as u32 {
            res.iowrite_with(self.scatter_offset.unwrap_or(0), scroll::BE)?;
        }
        if self.supports_team_id() {
            res.iowrite_with(team_offset as u32, scroll::BE)?;
        }
        if self.version >= CodeDirectoryVersion::SupportsCodeLimit64 as u32 {
            res.iowrite_with(self.spare3.unwrap_or(0), scroll::BE)?;
            res.iowrite_with(self.code_limit_64.unwrap_or(0), scroll::BE)?;
        }
        if self.version >= CodeDirectoryVersion::SupportsExecutableSegment as u32 {
            res.iowrite_with(self.exec_seg_base.unwrap_or(0), scroll::BE)?;
            res.iowrite_with(self.exec_seg_limit.unwrap_or(0), scroll::BE)?;
            res.iowrite_with(
                self.exec_seg_flags
                    .unwrap_or_else(ExecutableSegmentFlags::empty)
                    .bits(),
                scroll::BE,
            )?;
        }

        if !self.ident.is_empty() {
            res.extend_from_slice(self.ident.as_bytes());
            res.push(0);
        }
        if let Some(team) = team_name {
            res.extend_from_slice(team.as_bytes());
            res.push(0);
        }

        for digest in self.special_hashes.iter().chain(self.code_hashes.iter()) {
            res.extend_from_slice(&digest.data);
        }

        Ok(res)
    }
}

impl<'a> CodeDirectoryBlob<'a> {
    /// Create a code directory with zero-filled hashes for `code_length` bytes of code.
    ///
    /// Uses 4096 byte pages, [SPECIAL_SLOT_COUNT] special slots and the version
    /// introducing team identifiers.
    pub fn create(
        code_length: usize,
        identifier: &str,
        team_id: Option<&str>,
        hash_type: DigestType,
    ) -> Result<CodeDirectoryBlob<'static>, AppleResignError> {
        let hash_len = hash_type.hash_len()?;
        let page_size = 1usize << PAGE_SIZE_LOG2;
        let page_count = (code_length + page_size - 1) / page_size;

        Ok(CodeDirectoryBlob {
            version: CodeDirectoryVersion::SupportsTeamId as u32,
            flags: CodeSignatureFlags::empty(),
            code_limit: u32::try_from(code_length)
                .map_err(|_| AppleResignError::OffsetOutOfRange("code limit"))?,
            hash_size: hash_len as u8,
            hash_type,
            platform: 0,
            page_size_log2: PAGE_SIZE_LOG2,
            spare2: 0,
            scatter_offset: None,
            spare3: None,
            code_limit_64: None,
            exec_seg_base: None,
            exec_seg_limit: None,
            exec_seg_flags: None,
            ident: Cow::Owned(identifier.to_string()),
            team_name: team_id.map(|s| Cow::Owned(s.to_string())),
            special_hashes: vec![Digest::null(hash_len); SPECIAL_SLOT_COUNT],
            code_hashes: vec![Digest::null(hash_len); page_count],
        })
    }

    fn supports_team_id(&self) -> bool {
        self.version >= CodeDirectoryVersion::SupportsTeamId as u32
    }

    /// Page size in bytes. `None` means the whole code range is one page.
    pub fn page_size(&self) -> Option<usize> {
        if self.page_size_log2 == 0 {
            None
        } else {
            Some(1usize << self.page_size_log2)
        }
    }

    /// Obtain the special hash for a slot.
    pub fn special_hash(&self, slot: CodeSigningSlot) -> Option<&Digest<'a>> {
        let slot = u32::from(slot) as usize;

        if slot == 0 || slot > self.special_hashes.len() {
            None
        } else {
            self.special_hashes.get(self.special_hashes.len() - slot)
        }
    }

    pub fn to_owned(&self) -> CodeDirectoryBlob<'static> {
        CodeDirectoryBlob {
            version: self.version,
            flags: self.flags,
            code_limit: self.code_limit,
            hash_size: self.hash_size,
            hash_type: self.hash_type,
            platform: self.platform,
            page_size_log2: self.page_size_log2,
            spare2: self.spare2,
            scatter_offset: self.scatter_offset,
            spare3: self.spare3,
            code_limit_64: self.code_limit_64,
            exec_seg_base: self.exec_seg_base,
            exec_seg_limit: self.exec_seg_limit,
            exec_seg_flags: self.exec_seg_flags,
            ident: Cow::Owned(self.ident.to_string()),
            team_name: self
                .team_name
                .as_ref()
                .map(|s| Cow::Owned(s.to_string())),
            special_hashes: self.special_hashes.iter().map(|h| h.to_owned()).collect(),
            code_hashes: self.code_hashes.iter().map(|h| h.to_owned()).collect(),
        }
    }
}

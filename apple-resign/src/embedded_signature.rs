// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Embedded signature data structures (superblobs, blobs, magic values).
//!
//! Code signing data embedded in a Mach-O is a `SuperBlob`: a header with
//! magic, total length and a blob count, an index of `(type, offset)` pairs,
//! then the blobs themselves packed contiguously. Every blob starts with its
//! own magic and length. All integers are big-endian.
//!
//! The same superblob shape is used for the requirement set blob, where the
//! index types are requirement types instead of signature slots. So
//! [SuperBlob] and [parse_superblob] work on raw `u32` index types.
//!
//! Field definitions derive from Apple's `cs_blobs.h` in xnu.

use {
    crate::{
        code_directory::CodeDirectoryBlob, code_requirement::RequirementSetBlob,
        error::AppleResignError,
    },
    scroll::{IOwrite, Pread},
    std::{
        borrow::Cow,
        fmt::{Display, Formatter},
        io::Write,
    },
};

/// Header magic for the blob types we know about.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CodeSigningMagic {
    /// A single requirement.
    Requirement,
    /// A set of requirements, keyed by requirement type.
    RequirementSet,
    CodeDirectory,
    /// The top-level superblob embedded in a Mach-O.
    EmbeddedSignature,
    /// XML plist of entitlements.
    Entitlements,
    /// Wrapper around CMS signature data.
    BlobWrapper,
    Unknown(u32),
}

impl From<u32> for CodeSigningMagic {
    fn from(v: u32) -> Self {
        match v {
            0xfade0c00 => Self::Requirement,
            0xfade0c01 => Self::RequirementSet,
            0xfade0c02 => Self::CodeDirectory,
            0xfade0cc0 => Self::EmbeddedSignature,
            0xfade7171 => Self::Entitlements,
            0xfade0b01 => Self::BlobWrapper,
            _ => Self::Unknown(v),
        }
    }
}

impl From<CodeSigningMagic> for u32 {
    fn from(magic: CodeSigningMagic) -> u32 {
        match magic {
            CodeSigningMagic::Requirement => 0xfade0c00,
            CodeSigningMagic::RequirementSet => 0xfade0c01,
            CodeSigningMagic::CodeDirectory => 0xfade0c02,
            CodeSigningMagic::EmbeddedSignature => 0xfade0cc0,
            CodeSigningMagic::Entitlements => 0xfade7171,
            CodeSigningMagic::BlobWrapper => 0xfade0b01,
            CodeSigningMagic::Unknown(v) => v,
        }
    }
}

/// A well-known slot within embedded signature data.
///
/// Slots 1 through 5 double as the special hash indices of a code directory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CodeSigningSlot {
    CodeDirectory,
    /// Info.plist.
    Info,
    RequirementSet,
    /// `_CodeSignature/CodeResources`.
    ResourceDir,
    /// Application specific slot.
    Application,
    Entitlements,
    /// CMS signature over the code directory.
    Signature,
    Unknown(u32),
}

impl From<u32> for CodeSigningSlot {
    fn from(v: u32) -> Self {
        match v {
            0 => Self::CodeDirectory,
            1 => Self::Info,
            2 => Self::RequirementSet,
            3 => Self::ResourceDir,
            4 => Self::Application,
            5 => Self::Entitlements,
            0x10000 => Self::Signature,
            _ => Self::Unknown(v),
        }
    }
}

impl From<CodeSigningSlot> for u32 {
    fn from(v: CodeSigningSlot) -> Self {
        match v {
            CodeSigningSlot::CodeDirectory => 0,
            CodeSigningSlot::Info => 1,
            CodeSigningSlot::RequirementSet => 2,
            CodeSigningSlot::ResourceDir => 3,
            CodeSigningSlot::Application => 4,
            CodeSigningSlot::Entitlements => 5,
            CodeSigningSlot::Signature => 0x10000,
            CodeSigningSlot::Unknown(v) => v,
        }
    }
}

/// A digest type encountered in code signature data structures.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DigestType {
    None,
    Sha1,
    Sha256,
    /// SHA-256 truncated to 20 bytes.
    Sha256Truncated,
    Sha384,
    Unknown(u8),
}

impl Default for DigestType {
    fn default() -> Self {
        Self::Sha1
    }
}

impl From<u8> for DigestType {
    fn from(v: u8) -> Self {
        match v {
            0 => Self::None,
            1 => Self::Sha1,
            2 => Self::Sha256,
            3 => Self::Sha256Truncated,
            4 => Self::Sha384,
            _ => Self::Unknown(v),
        }
    }
}

impl From<DigestType> for u8 {
    fn from(v: DigestType) -> u8 {
        match v {
            DigestType::None => 0,
            DigestType::Sha1 => 1,
            DigestType::Sha256 => 2,
            DigestType::Sha256Truncated => 3,
            DigestType::Sha384 => 4,
            DigestType::Unknown(v) => v,
        }
    }
}

impl Display for DigestType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            DigestType::None => f.write_str("none"),
            DigestType::Sha1 => f.write_str("sha1"),
            DigestType::Sha256 => f.write_str("sha256"),
            DigestType::Sha256Truncated => f.write_str("sha256-truncated"),
            DigestType::Sha384 => f.write_str("sha384"),
            DigestType::Unknown(v) => f.write_fmt(format_args!("unknown: {}", v)),
        }
    }
}

impl DigestType {
    /// Size of digests of this type, in bytes.
    pub fn hash_len(&self) -> Result<usize, AppleResignError> {
        Ok(self.digest_data(&[])?.len())
    }

    /// Obtain a hasher for this digest type.
    pub fn as_hasher(&self) -> Result<ring::digest::Context, AppleResignError> {
        match self {
            Self::Sha1 => Ok(ring::digest::Context::new(
                &ring::digest::SHA1_FOR_LEGACY_USE_ONLY,
            )),
            Self::Sha256 | Self::Sha256Truncated => {
                Ok(ring::digest::Context::new(&ring::digest::SHA256))
            }
            Self::Sha384 => Ok(ring::digest::Context::new(&ring::digest::SHA384)),
            Self::None | Self::Unknown(_) => Err(AppleResignError::UnknownDigestType(u8::from(*self))),
        }
    }

    /// Digest data with this digest type.
    pub fn digest_data(&self, data: &[u8]) -> Result<Vec<u8>, AppleResignError> {
        let mut hasher = self.as_hasher()?;

        hasher.update(data);
        let mut hash = hasher.finish().as_ref().to_vec();

        if matches!(self, Self::Sha256Truncated) {
            hash.truncate(20);
        }

        Ok(hash)
    }
}

/// A digest value.
#[derive(Clone, Eq, PartialEq)]
pub struct Digest<'a> {
    pub data: Cow<'a, [u8]>,
}

impl<'a> Digest<'a> {
    /// A digest of `len` zero bytes.
    pub fn null(len: usize) -> Digest<'static> {
        Digest {
            data: Cow::Owned(vec![0; len]),
        }
    }

    /// Whether this is the null hash (all 0s).
    pub fn is_null(&self) -> bool {
        self.data.iter().all(|b| *b == 0)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.data.to_vec()
    }

    pub fn to_owned(&self) -> Digest<'static> {
        Digest {
            data: Cow::Owned(self.data.clone().into_owned()),
        }
    }

    pub fn as_hex(&self) -> String {
        hex::encode(&self.data)
    }
}

impl<'a> std::fmt::Debug for Digest<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.as_hex())
    }
}

impl<'a> From<Vec<u8>> for Digest<'a> {
    fn from(v: Vec<u8>) -> Self {
        Self { data: v.into() }
    }
}

impl<'a> From<&'a [u8]> for Digest<'a> {
    fn from(v: &'a [u8]) -> Self {
        Self { data: v.into() }
    }
}

/// Read the header from a blob.
///
/// Blobs begin with a u32 magic and a u32 length inclusive of the header.
/// Returns the magic and the blob's full data, header included, bounded by
/// the declared length.
fn read_blob_header(data: &[u8]) -> Result<(u32, &[u8]), AppleResignError> {
    let magic = data.pread_with::<u32>(0, scroll::BE)?;
    let length = data.pread_with::<u32>(4, scroll::BE)? as usize;

    if length < 8 {
        return Err(AppleResignError::OffsetOutOfRange(
            "blob length smaller than blob header",
        ));
    }

    Ok((
        magic,
        data.get(..length).ok_or(AppleResignError::TruncatedInput)?,
    ))
}

/// Validate a blob's magic and return its payload.
pub(crate) fn read_and_validate_blob_header<'a>(
    data: &'a [u8],
    expected_magic: u32,
    what: &'static str,
) -> Result<&'a [u8], AppleResignError> {
    let (magic, data) = read_blob_header(data)?;

    if magic != expected_magic {
        Err(AppleResignError::BadMagic(what))
    } else {
        Ok(&data[8..])
    }
}

/// Common behavior of blob types.
pub trait Blob<'a>
where
    Self: Sized,
{
    /// The header magic that identifies this format.
    fn magic() -> u32;

    /// Construct an instance by parsing a slice beginning with the blob header.
    fn from_blob_bytes(data: &'a [u8]) -> Result<Self, AppleResignError>;

    /// Serialize the payload of this blob, without the magic and length.
    fn serialize_payload(&self) -> Result<Vec<u8>, AppleResignError>;

    /// Serialize this blob, header included.
    fn to_blob_bytes(&self) -> Result<Vec<u8>, AppleResignError> {
        let mut res = Vec::new();
        res.iowrite_with(Self::magic(), scroll::BE)?;

        let payload = self.serialize_payload()?;
        // Length includes our own header.
        res.iowrite_with(payload.len() as u32 + 8, scroll::BE)?;

        res.extend(payload);

        Ok(res)
    }

    /// Digest the serialized blob.
    fn digest_with(&self, hash_type: DigestType) -> Result<Vec<u8>, AppleResignError> {
        hash_type.digest_data(&self.to_blob_bytes()?)
    }
}

/// Builder for a superblob.
///
/// Entries are written in insertion order. Offsets are absolute from the start
/// of the superblob and are only assigned during serialization, once every
/// entry's length is known.
#[derive(Clone, Debug)]
pub struct SuperBlob {
    magic: CodeSigningMagic,
    entries: Vec<(u32, Vec<u8>)>,
}

impl SuperBlob {
    pub fn new(magic: CodeSigningMagic) -> Self {
        Self {
            magic,
            entries: vec![],
        }
    }

    /// Append a serialized blob with the given index type.
    pub fn add(&mut self, typ: impl Into<u32>, blob: Vec<u8>) {
        self.entries.push((typ.into(), blob));
    }

    /// Number of bytes occupied by the header and index table.
    pub fn header_length(&self) -> usize {
        12 + 8 * self.entries.len()
    }

    /// Total serialized length.
    pub fn length(&self) -> usize {
        self.header_length() + self.entries.iter().map(|(_, blob)| blob.len()).sum::<usize>()
    }

    pub fn write_to(&self, dest: &mut impl Write) -> Result<(), AppleResignError> {
        let total_length = u32::try_from(self.length())
            .map_err(|_| AppleResignError::OffsetOutOfRange("superblob length"))?;

        dest.iowrite_with(u32::from(self.magic), scroll::BE)?;
        dest.iowrite_with(total_length, scroll::BE)?;
        dest.iowrite_with(self.entries.len() as u32, scroll::BE)?;

        let mut offset = self.header_length() as u32;
        for (typ, blob) in &self.entries {
            dest.iowrite_with(*typ, scroll::BE)?;
            dest.iowrite_with(offset, scroll::BE)?;
            offset += blob.len() as u32;
        }

        for (_, blob) in &self.entries {
            dest.write_all(blob)?;
        }

        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, AppleResignError> {
        let mut res = Vec::with_capacity(self.length());
        self.write_to(&mut res)?;

        Ok(res)
    }
}

/// A single blob as defined by a superblob index entry.
///
/// The blob data is unparsed.
#[derive(Clone)]
pub struct BlobEntry<'a> {
    /// Position within the superblob index.
    pub index: usize,
    /// Index type. A [CodeSigningSlot] or requirement type value.
    pub typ: u32,
    /// Offset of the blob from the start of the superblob.
    pub offset: usize,
    /// Magic of the blob.
    pub magic: CodeSigningMagic,
    /// Blob data, including its header.
    pub data: &'a [u8],
}

impl<'a> std::fmt::Debug for BlobEntry<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("BlobEntry")
            .field("index", &self.index)
            .field("type", &self.typ)
            .field("offset", &self.offset)
            .field("length", &self.data.len())
            .field("magic", &self.magic)
            .finish()
    }
}

impl<'a> BlobEntry<'a> {
    /// The signature slot of this entry.
    pub fn slot(&self) -> CodeSigningSlot {
        CodeSigningSlot::from(self.typ)
    }

    /// The blob data without its header.
    pub fn payload(&self) -> &'a [u8] {
        &self.data[8..]
    }

    /// Digest the full blob data.
    pub fn digest_with(&self, hash: DigestType) -> Result<Vec<u8>, AppleResignError> {
        hash.digest_data(self.data)
    }
}

/// Parse a superblob into its entries.
pub fn parse_superblob<'a>(
    data: &'a [u8],
    expected_magic: CodeSigningMagic,
    what: &'static str,
) -> Result<Vec<BlobEntry<'a>>, AppleResignError> {
    read_and_validate_blob_header(data, u32::from(expected_magic), what)?;
    let (_, data) = read_blob_header(data)?;

    let offset = &mut 8;
    let count = data.gread_with::<u32>(offset, scroll::BE)?;

    let mut indices = Vec::with_capacity(count.min(64) as usize);
    for _ in 0..count {
        indices.push((
            data.gread_with::<u32>(offset, scroll::BE)?,
            data.gread_with::<u32>(offset, scroll::BE)? as usize,
        ));
    }

    indices
        .into_iter()
        .enumerate()
        .map(|(index, (typ, offset))| {
            let blob_data = data.get(offset..).ok_or(AppleResignError::TruncatedInput)?;
            let (magic, blob_data) = read_blob_header(blob_data)?;

            Ok(BlobEntry {
                index,
                typ,
                offset,
                magic: CodeSigningMagic::from(magic),
                data: blob_data,
            })
        })
        .collect()
}

/// An entitlements blob.
///
/// The payload is an XML plist. It is carried as opaque bytes.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EntitlementsBlob {
    pub data: Vec<u8>,
}

impl<'a> Blob<'a> for EntitlementsBlob {
    fn magic() -> u32 {
        u32::from(CodeSigningMagic::Entitlements)
    }

    fn from_blob_bytes(data: &'a [u8]) -> Result<Self, AppleResignError> {
        let data = read_and_validate_blob_header(data, Self::magic(), "entitlements blob")?;

        Ok(Self {
            data: data.to_vec(),
        })
    }

    fn serialize_payload(&self) -> Result<Vec<u8>, AppleResignError> {
        Ok(self.data.clone())
    }
}

impl EntitlementsBlob {
    /// Construct an instance using any string as the payload.
    pub fn from_string(s: &(impl ToString + ?Sized)) -> Self {
        Self {
            data: s.to_string().into_bytes(),
        }
    }
}

/// Wraps the CMS signature over the code directory.
///
/// The payload is carried as opaque bytes.
#[derive(Clone, Eq, PartialEq)]
pub struct BlobWrapperBlob {
    pub data: Vec<u8>,
}

impl<'a> Blob<'a> for BlobWrapperBlob {
    fn magic() -> u32 {
        u32::from(CodeSigningMagic::BlobWrapper)
    }

    fn from_blob_bytes(data: &'a [u8]) -> Result<Self, AppleResignError> {
        Ok(Self {
            data: read_and_validate_blob_header(data, Self::magic(), "blob wrapper blob")?
                .to_vec(),
        })
    }

    fn serialize_payload(&self) -> Result<Vec<u8>, AppleResignError> {
        Ok(self.data.clone())
    }
}

impl std::fmt::Debug for BlobWrapperBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("BlobWrapperBlob({})", hex::encode(&self.data)))
    }
}

/// A lightly parsed embedded signature superblob.
#[derive(Debug)]
pub struct EmbeddedSignature<'a> {
    /// Total length of the superblob as declared in its header.
    pub length: usize,
    /// Blobs within the superblob, in index order.
    pub blobs: Vec<BlobEntry<'a>>,
}

impl<'a> EmbeddedSignature<'a> {
    /// Parse embedded signature data, as stored at `LC_CODE_SIGNATURE`.
    ///
    /// Data following the superblob's declared length is ignored.
    pub fn from_bytes(data: &'a [u8]) -> Result<Self, AppleResignError> {
        let blobs = parse_superblob(
            data,
            CodeSigningMagic::EmbeddedSignature,
            "embedded signature superblob",
        )?;

        Ok(Self {
            length: data.pread_with::<u32>(4, scroll::BE)? as usize,
            blobs,
        })
    }

    /// Find the first blob in a slot.
    pub fn find_slot(&self, slot: CodeSigningSlot) -> Option<&BlobEntry<'a>> {
        self.blobs.iter().find(|entry| entry.slot() == slot)
    }

    pub fn code_directory(&self) -> Result<Option<CodeDirectoryBlob<'a>>, AppleResignError> {
        self.find_slot(CodeSigningSlot::CodeDirectory)
            .map(|entry| CodeDirectoryBlob::from_blob_bytes(entry.data))
            .transpose()
    }

    pub fn requirements(&self) -> Result<Option<RequirementSetBlob>, AppleResignError> {
        self.find_slot(CodeSigningSlot::RequirementSet)
            .map(|entry| RequirementSetBlob::from_blob_bytes(entry.data))
            .transpose()
    }

    pub fn entitlements(&self) -> Result<Option<EntitlementsBlob>, AppleResignError> {
        self.find_slot(CodeSigningSlot::Entitlements)
            .map(|entry| EntitlementsBlob::from_blob_bytes(entry.data))
            .transpose()
    }

    /// The CMS signature data, without the blob wrapper header.
    pub fn signature_data(&self) -> Result<Option<&'a [u8]>, AppleResignError> {
        self.find_slot(CodeSigningSlot::Signature)
            .map(|entry| {
                read_and_validate_blob_header(
                    entry.data,
                    u32::from(CodeSigningMagic::BlobWrapper),
                    "blob wrapper blob",
                )
            })
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_lengths() {
        assert_eq!(DigestType::default(), DigestType::Sha1);
        assert_eq!(DigestType::Sha1.hash_len().unwrap(), 20);
        assert_eq!(DigestType::Sha256.hash_len().unwrap(), 32);
        assert_eq!(DigestType::Sha256Truncated.hash_len().unwrap(), 20);
        assert_eq!(DigestType::Sha384.hash_len().unwrap(), 48);
        assert!(matches!(
            DigestType::from(9).hash_len(),
            Err(AppleResignError::UnknownDigestType(9))
        ));

        assert_eq!(
            hex::encode(DigestType::Sha1.digest_data(b"abc").unwrap()),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
        assert_eq!(
            hex::encode(DigestType::Sha256Truncated.digest_data(b"abc").unwrap()),
            "ba7816bf8f01cfea414140de5dae2223b00361a3"
        );
    }

    #[test]
    fn superblob_layout() {
        let mut sb = SuperBlob::new(CodeSigningMagic::EmbeddedSignature);
        sb.add(CodeSigningSlot::CodeDirectory, vec![0xaa; 12]);
        sb.add(CodeSigningSlot::Signature, vec![0xbb; 8]);

        assert_eq!(sb.header_length(), 28);
        assert_eq!(sb.length(), 48);

        let data = sb.to_bytes().unwrap();
        assert_eq!(data.len(), sb.length());
        assert_eq!(
            hex::encode(&data[0..28]),
            concat!(
                "fade0cc0", "00000030", "00000002", "00000000", "0000001c", "00010000",
                "00000028"
            )
        );
    }

    #[test]
    fn superblob_offsets_monotonic() {
        let mut sb = SuperBlob::new(CodeSigningMagic::EmbeddedSignature);
        sb.add(CodeSigningSlot::Entitlements, blob(0xfade7171, 5));
        sb.add(CodeSigningSlot::CodeDirectory, blob(0xfade0c02, 17));
        sb.add(CodeSigningSlot::RequirementSet, blob(0xfade0c01, 0));

        let data = sb.to_bytes().unwrap();
        let entries = parse_superblob(&data, CodeSigningMagic::EmbeddedSignature, "test").unwrap();

        // Insertion order is kept, even though slot types are unsorted.
        assert_eq!(
            entries.iter().map(|e| e.slot()).collect::<Vec<_>>(),
            vec![
                CodeSigningSlot::Entitlements,
                CodeSigningSlot::CodeDirectory,
                CodeSigningSlot::RequirementSet
            ]
        );

        for pair in entries.windows(2) {
            assert_eq!(pair[0].offset + pair[0].data.len(), pair[1].offset);
        }
        let last = entries.last().unwrap();
        assert_eq!(last.offset + last.data.len(), data.len());
        assert_eq!(entries[1].payload().len(), 17);
    }

    fn blob(magic: u32, payload_len: usize) -> Vec<u8> {
        let mut res = vec![];
        res.iowrite_with(magic, scroll::BE).unwrap();
        res.iowrite_with(payload_len as u32 + 8, scroll::BE).unwrap();
        res.extend(std::iter::repeat(0x42).take(payload_len));
        res
    }

    #[test]
    fn generic_blobs() {
        let entitlements = EntitlementsBlob::from_string("<plist/>");
        let data = entitlements.to_blob_bytes().unwrap();
        assert_eq!(hex::encode(&data[0..8]), "fade717100000010");
        assert_eq!(EntitlementsBlob::from_blob_bytes(&data).unwrap(), entitlements);

        let wrapper = BlobWrapperBlob {
            data: vec![0x30, 0x80],
        };
        let data = wrapper.to_blob_bytes().unwrap();
        assert_eq!(data, hex::decode("fade0b010000000a3080").unwrap());

        assert!(matches!(
            EntitlementsBlob::from_blob_bytes(&data),
            Err(AppleResignError::BadMagic(_))
        ));
    }

    #[test]
    fn blob_length_bounds() {
        // Declares 16 bytes but only 10 are present.
        let data = hex::decode("fade0b01000000103080").unwrap();
        assert!(matches!(
            BlobWrapperBlob::from_blob_bytes(&data),
            Err(AppleResignError::TruncatedInput)
        ));

        let data = hex::decode("fade0b0100000004").unwrap();
        assert!(matches!(
            BlobWrapperBlob::from_blob_bytes(&data),
            Err(AppleResignError::OffsetOutOfRange(_))
        ));
    }

    #[test]
    fn embedded_signature_read_back() {
        let mut sb = SuperBlob::new(CodeSigningMagic::EmbeddedSignature);
        sb.add(
            CodeSigningSlot::Entitlements,
            EntitlementsBlob::from_string("<dict/>").to_blob_bytes().unwrap(),
        );
        sb.add(
            CodeSigningSlot::Signature,
            BlobWrapperBlob { data: vec![1, 2, 3] }
                .to_blob_bytes()
                .unwrap(),
        );

        let mut data = sb.to_bytes().unwrap();
        // Trailing zero padding is not part of the superblob.
        data.extend_from_slice(&[0; 16]);

        let sig = EmbeddedSignature::from_bytes(&data).unwrap();
        assert_eq!(sig.length, sb.length());
        assert_eq!(sig.blobs.len(), 2);
        assert!(sig.code_directory().unwrap().is_none());
        assert!(sig.requirements().unwrap().is_none());
        assert_eq!(sig.entitlements().unwrap().unwrap().data, b"<dict/>");
        assert_eq!(sig.signature_data().unwrap(), Some(&[1u8, 2, 3][..]));

        assert!(matches!(
            EmbeddedSignature::from_bytes(&hex::decode("fade0c010000000c00000000").unwrap()),
            Err(AppleResignError::BadMagic(_))
        ));
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use thiserror::Error;

/// Unified error type for Mach-O resigning.
#[derive(Debug, Error)]
pub enum AppleResignError {
    #[error("input truncated: buffer is shorter than the structure being read")]
    TruncatedInput,

    #[error("corrupt load command (kind {cmd:#x}): declared {declared} bytes but consumed {actual}")]
    CorruptLoadCommand {
        cmd: u32,
        declared: usize,
        actual: usize,
    },

    #[error("load command table size mismatch: header declares {declared} bytes but commands occupy {actual}")]
    LoadCommandTableMismatch { declared: usize, actual: usize },

    #[error("unsupported magic: {0:#010x}")]
    UnsupportedMagic(u32),

    #[error("bad magic in {0}")]
    BadMagic(&'static str),

    #[error("__LINKEDIT segment not found")]
    MissingLinkEditSegment,

    #[error("binary does not have an LC_CODE_SIGNATURE load command")]
    MissingCodeSignatureCommand,

    #[error("the last load command is not LC_CODE_SIGNATURE")]
    CodeSignatureNotLast,

    #[error("offset out of range: {0}")]
    OffsetOutOfRange(&'static str),

    #[error("unknown requirement expression opcode: {0}")]
    UnknownExpressionOpcode(u32),

    #[error("unknown requirement match operation: {0}")]
    UnknownMatchOperation(u32),

    #[error("malformed requirement expression: {0}")]
    RequirementMalformed(&'static str),

    #[error("malformed identifier string in {0}")]
    MalformedIdentifier(&'static str),

    #[error("hash length mismatch: expected {expected} bytes, got {actual}")]
    HashLengthMismatch { expected: usize, actual: usize },

    #[error("unknown digest type: {0}")]
    UnknownDigestType(u8),

    #[error("signer failure: {0}")]
    SignerFailure(String),

    #[error("no signing identity: set one or provide a certificate chain")]
    MissingSigningIdentity,

    #[error("{0} plist is not a dictionary")]
    PlistNotDictionary(&'static str),

    #[error("signature size did not settle: reserved {reserved} bytes but produced {actual}")]
    SignatureSizeMismatch { reserved: usize, actual: usize },

    #[error("certificate name decode error: {0}")]
    CertificateDecode(bcder::decode::DecodeError<std::convert::Infallible>),

    #[error("plist error: {0}")]
    Plist(#[from] plist::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("binary parsing error: {0}")]
    Scroll(scroll::Error),
}

impl From<bcder::decode::DecodeError<std::convert::Infallible>> for AppleResignError {
    fn from(e: bcder::decode::DecodeError<std::convert::Infallible>) -> Self {
        Self::CertificateDecode(e)
    }
}

impl From<scroll::Error> for AppleResignError {
    fn from(e: scroll::Error) -> Self {
        match e {
            scroll::Error::TooBig { .. } | scroll::Error::BadOffset(_) => Self::TruncatedInput,
            scroll::Error::IO(e) => Self::Io(e),
            e => Self::Scroll(e),
        }
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Code requirement language primitives.

Code signatures contain a binary encoded expression tree denoting
requirements, such as "the leaf certificate's common name is X and the
chain anchors to Apple". This module reads and writes those trees, wraps
them in requirement blobs and collects them in requirement sets.

# Binary Encoding

Expressions consist of opcodes. An opcode is a big-endian u32 where the high
byte holds flags and the lower 3 bytes denote the opcode value. Some opcodes
have payloads, which vary by opcode. `and`, `or` and `not` are followed by
their operand expressions.

Variable length data is a u32 length, the raw bytes, then NULL padding so
the next opcode is aligned on a 4 byte boundary.
*/

use {
    crate::{
        byte_codec::{write_length_prefixed, ByteReader},
        embedded_signature::{
            parse_superblob, read_and_validate_blob_header, Blob, CodeSigningMagic, SuperBlob,
        },
        error::AppleResignError,
    },
    bcder::Oid,
    scroll::IOwrite,
    std::{
        fmt::{Debug, Display},
        io::Write,
    },
};

const OPCODE_FLAG_MASK: u32 = 0xff000000;
const OPCODE_VALUE_MASK: u32 = 0x00ffffff;

/// Expressions nested deeper than this are rejected.
const MAX_EXPRESSION_DEPTH: usize = 256;

/// Requirement blob kind for expression-form requirements.
const REQUIREMENT_KIND_EXPRESSION: u32 = 1;

/// OID of the Apple iOS development certificate extension.
///
/// 1.2.840.113635.100.6.2.1
pub const OID_APPLE_IOS_DEVELOPMENT_INTERMEDIATE: &[u8] =
    &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x63, 0x64, 0x06, 0x02, 0x01];

fn read_string(reader: &mut ByteReader, what: &'static str) -> Result<String, AppleResignError> {
    let value = reader.read_length_prefixed()?;

    Ok(std::str::from_utf8(value)
        .map_err(|_| AppleResignError::RequirementMalformed(what))?
        .to_string())
}

/// Format a certificate slot's value to human form.
fn format_certificate_slot(slot: i32) -> String {
    match slot {
        -1 => "root".to_string(),
        0 => "leaf".to_string(),
        _ => format!("{}", slot),
    }
}

/// A comparison value in a match expression.
#[derive(Clone, PartialEq, Eq)]
pub struct CodeRequirementValue(pub Vec<u8>);

impl From<&str> for CodeRequirementValue {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl From<&[u8]> for CodeRequirementValue {
    fn from(v: &[u8]) -> Self {
        Self(v.to_vec())
    }
}

impl Display for CodeRequirementValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let is_ascii_printable = |c: &u8| -> bool {
            c.is_ascii_alphanumeric() || c.is_ascii_whitespace() || c.is_ascii_punctuation()
        };

        match std::str::from_utf8(&self.0) {
            Ok(s) if self.0.iter().all(is_ascii_printable) => f.write_str(s),
            _ => f.write_str(&hex::encode(&self.0)),
        }
    }
}

impl Debug for CodeRequirementValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("CodeRequirementValue({})", self))
    }
}

/// An opcode representing a code requirement expression.
#[derive(Clone, Copy, Debug, PartialEq)]
#[repr(u32)]
enum RequirementOpCode {
    False = 0,
    True = 1,
    Identifier = 2,
    AnchorApple = 3,
    AnchorCertificateHash = 4,
    InfoKeyValueLegacy = 5,
    And = 6,
    Or = 7,
    CodeDirectoryHash = 8,
    Not = 9,
    InfoPlistExpression = 10,
    CertificateField = 11,
    CertificateTrusted = 12,
    AnchorTrusted = 13,
    CertificateGeneric = 14,
    AnchorAppleGeneric = 15,
    EntitlementsField = 16,
    NamedAnchor = 18,
    NamedCode = 19,
    Platform = 20,
    Notarized = 21,
    LegacyDeveloperId = 23,
}

impl TryFrom<u32> for RequirementOpCode {
    type Error = AppleResignError;

    fn try_from(v: u32) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Self::False),
            1 => Ok(Self::True),
            2 => Ok(Self::Identifier),
            3 => Ok(Self::AnchorApple),
            4 => Ok(Self::AnchorCertificateHash),
            5 => Ok(Self::InfoKeyValueLegacy),
            6 => Ok(Self::And),
            7 => Ok(Self::Or),
            8 => Ok(Self::CodeDirectoryHash),
            9 => Ok(Self::Not),
            10 => Ok(Self::InfoPlistExpression),
            11 => Ok(Self::CertificateField),
            12 => Ok(Self::CertificateTrusted),
            13 => Ok(Self::AnchorTrusted),
            14 => Ok(Self::CertificateGeneric),
            15 => Ok(Self::AnchorAppleGeneric),
            16 => Ok(Self::EntitlementsField),
            18 => Ok(Self::NamedAnchor),
            19 => Ok(Self::NamedCode),
            20 => Ok(Self::Platform),
            21 => Ok(Self::Notarized),
            23 => Ok(Self::LegacyDeveloperId),
            _ => Err(AppleResignError::UnknownExpressionOpcode(v)),
        }
    }
}

/// A code requirement expression.
///
/// Operands of `and`, `or` and `not` are owned subtrees.
#[derive(Clone, Debug, PartialEq)]
pub enum CodeRequirementExpression {
    /// `never`
    False,

    /// `always`
    True,

    /// Signing identifier.
    ///
    /// `identifier "<string>"`
    Identifier(String),

    /// The certificate chain must lead to an Apple root.
    ///
    /// `anchor apple`
    AnchorApple,

    /// The certificate in a slot must have the given SHA-1 hash.
    ///
    /// `anchor <slot> H"<hash>"`
    AnchorCertificateHash(i32, Vec<u8>),

    /// Info.plist key has a value. Superseded by [Self::InfoPlistKeyField].
    ///
    /// `info[<key>] = "<value>"`
    InfoKeyValueLegacy(String, String),

    /// `(<expr>) and (<expr>)`
    And(Box<CodeRequirementExpression>, Box<CodeRequirementExpression>),

    /// `(<expr>) or (<expr>)`
    Or(Box<CodeRequirementExpression>, Box<CodeRequirementExpression>),

    /// The code directory hash has a value.
    ///
    /// `cdhash H"<hash>"`
    CodeDirectoryHash(Vec<u8>),

    /// `!(<expr>)`
    Not(Box<CodeRequirementExpression>),

    /// Info.plist key matches.
    ///
    /// `info [<key>] <match>`
    InfoPlistKeyField(String, CodeRequirementMatchExpression),

    /// A named field of the certificate in a slot matches.
    ///
    /// `certificate <slot>[<field>] <match>`
    CertificateField(i32, String, CodeRequirementMatchExpression),

    /// The certificate in a slot is trusted.
    ///
    /// `certificate <slot> trusted`
    CertificateTrusted(i32),

    /// The chain anchors to a trusted certificate.
    ///
    /// `anchor trusted`
    AnchorTrusted,

    /// An extension of the certificate in a slot, identified by OID, matches.
    ///
    /// `certificate <slot>[field.<oid>] <match>`
    CertificateGeneric(i32, Vec<u8>, CodeRequirementMatchExpression),

    /// The chain anchors to an Apple root, including non-Apple intermediates.
    ///
    /// `anchor apple generic`
    AnchorAppleGeneric,

    /// An entitlement matches.
    ///
    /// `entitlement [<key>] <match>`
    EntitlementsKey(String, CodeRequirementMatchExpression),

    /// `anchor apple <name>`
    NamedAnchor(String),

    /// `(<name>)`
    NamedCode(String),

    /// `platform = <value>`
    Platform(u32),

    /// `notarized`
    Notarized,

    /// `legacy`
    LegacyDeveloperId,

    /// An expression whose opcode carries flag bits (high byte).
    ///
    /// Renders as the inner expression. The flags are written back into the
    /// inner opcode.
    Flagged(u32, Box<CodeRequirementExpression>),
}

impl Display for CodeRequirementExpression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::False => f.write_str("never"),
            Self::True => f.write_str("always"),
            Self::Identifier(value) => f.write_fmt(format_args!("identifier \"{}\"", value)),
            Self::AnchorApple => f.write_str("anchor apple"),
            Self::AnchorCertificateHash(slot, digest) => f.write_fmt(format_args!(
                "anchor {} H\"{}\"",
                format_certificate_slot(*slot),
                hex::encode(digest)
            )),
            Self::InfoKeyValueLegacy(key, value) => {
                f.write_fmt(format_args!("info[{}] = \"{}\"", key, value))
            }
            Self::And(a, b) => f.write_fmt(format_args!("({}) and ({})", a, b)),
            Self::Or(a, b) => f.write_fmt(format_args!("({}) or ({})", a, b)),
            Self::CodeDirectoryHash(digest) => {
                f.write_fmt(format_args!("cdhash H\"{}\"", hex::encode(digest)))
            }
            Self::Not(expr) => f.write_fmt(format_args!("!({})", expr)),
            Self::InfoPlistKeyField(key, expr) => {
                f.write_fmt(format_args!("info [{}] {}", key, expr))
            }
            Self::CertificateField(slot, field, expr) => f.write_fmt(format_args!(
                "certificate {}[{}] {}",
                format_certificate_slot(*slot),
                field,
                expr
            )),
            Self::CertificateTrusted(slot) => f.write_fmt(format_args!(
                "certificate {} trusted",
                format_certificate_slot(*slot)
            )),
            Self::AnchorTrusted => f.write_str("anchor trusted"),
            Self::CertificateGeneric(slot, oid, expr) => f.write_fmt(format_args!(
                "certificate {}[field.{}] {}",
                format_certificate_slot(*slot),
                Oid(oid.as_slice()),
                expr
            )),
            Self::AnchorAppleGeneric => f.write_str("anchor apple generic"),
            Self::EntitlementsKey(key, expr) => {
                f.write_fmt(format_args!("entitlement [{}] {}", key, expr))
            }
            Self::NamedAnchor(name) => f.write_fmt(format_args!("anchor apple {}", name)),
            Self::NamedCode(name) => f.write_fmt(format_args!("({})", name)),
            Self::Platform(platform) => f.write_fmt(format_args!("platform = {}", platform)),
            Self::Notarized => f.write_str("notarized"),
            Self::LegacyDeveloperId => f.write_str("legacy"),
            Self::Flagged(_, expr) => Display::fmt(expr, f),
        }
    }
}

impl From<&CodeRequirementExpression> for RequirementOpCode {
    fn from(e: &CodeRequirementExpression) -> Self {
        match e {
            CodeRequirementExpression::False => Self::False,
            CodeRequirementExpression::True => Self::True,
            CodeRequirementExpression::Identifier(_) => Self::Identifier,
            CodeRequirementExpression::AnchorApple => Self::AnchorApple,
            CodeRequirementExpression::AnchorCertificateHash(_, _) => Self::AnchorCertificateHash,
            CodeRequirementExpression::InfoKeyValueLegacy(_, _) => Self::InfoKeyValueLegacy,
            CodeRequirementExpression::And(_, _) => Self::And,
            CodeRequirementExpression::Or(_, _) => Self::Or,
            CodeRequirementExpression::CodeDirectoryHash(_) => Self::CodeDirectoryHash,
            CodeRequirementExpression::Not(_) => Self::Not,
            CodeRequirementExpression::InfoPlistKeyField(_, _) => Self::InfoPlistExpression,
            CodeRequirementExpression::CertificateField(_, _, _) => Self::CertificateField,
            CodeRequirementExpression::CertificateTrusted(_) => Self::CertificateTrusted,
            CodeRequirementExpression::AnchorTrusted => Self::AnchorTrusted,
            CodeRequirementExpression::CertificateGeneric(_, _, _) => Self::CertificateGeneric,
            CodeRequirementExpression::AnchorAppleGeneric => Self::AnchorAppleGeneric,
            CodeRequirementExpression::EntitlementsKey(_, _) => Self::EntitlementsField,
            CodeRequirementExpression::NamedAnchor(_) => Self::NamedAnchor,
            CodeRequirementExpression::NamedCode(_) => Self::NamedCode,
            CodeRequirementExpression::Platform(_) => Self::Platform,
            CodeRequirementExpression::Notarized => Self::Notarized,
            CodeRequirementExpression::LegacyDeveloperId => Self::LegacyDeveloperId,
            CodeRequirementExpression::Flagged(_, expr) => Self::from(expr.as_ref()),
        }
    }
}

impl CodeRequirementExpression {
    /// Construct an expression by reading from a slice.
    ///
    /// Returns the expression and the number of bytes it occupied.
    pub fn from_bytes(data: &[u8]) -> Result<(Self, usize), AppleResignError> {
        let mut reader = ByteReader::new(data);
        let expr = Self::read(&mut reader, 0)?;

        Ok((expr, reader.offset()))
    }

    fn read(reader: &mut ByteReader, depth: usize) -> Result<Self, AppleResignError> {
        if depth > MAX_EXPRESSION_DEPTH {
            return Err(AppleResignError::RequirementMalformed(
                "expression nesting too deep",
            ));
        }

        let raw = reader.read_u32_be()?;
        let flags = raw & OPCODE_FLAG_MASK;
        let opcode = RequirementOpCode::try_from(raw & OPCODE_VALUE_MASK)?;

        let operand = |reader: &mut ByteReader| -> Result<Box<Self>, AppleResignError> {
            Ok(Box::new(Self::read(reader, depth + 1)?))
        };

        let expr = match opcode {
            RequirementOpCode::False => Self::False,
            RequirementOpCode::True => Self::True,
            RequirementOpCode::Identifier => {
                Self::Identifier(read_string(reader, "identifier value not a UTF-8 string")?)
            }
            RequirementOpCode::AnchorApple => Self::AnchorApple,
            RequirementOpCode::AnchorCertificateHash => {
                let slot = reader.read_i32_be()?;
                let digest = reader.read_length_prefixed()?;

                Self::AnchorCertificateHash(slot, digest.to_vec())
            }
            RequirementOpCode::InfoKeyValueLegacy => {
                let key = read_string(reader, "info key not a UTF-8 string")?;
                let value = read_string(reader, "info value not a UTF-8 string")?;

                Self::InfoKeyValueLegacy(key, value)
            }
            RequirementOpCode::And => {
                let a = operand(reader)?;
                let b = operand(reader)?;

                Self::And(a, b)
            }
            RequirementOpCode::Or => {
                let a = operand(reader)?;
                let b = operand(reader)?;

                Self::Or(a, b)
            }
            RequirementOpCode::CodeDirectoryHash => {
                Self::CodeDirectoryHash(reader.read_length_prefixed()?.to_vec())
            }
            RequirementOpCode::Not => Self::Not(operand(reader)?),
            RequirementOpCode::InfoPlistExpression => {
                let key = read_string(reader, "info key not a UTF-8 string")?;
                let m = CodeRequirementMatchExpression::read(reader)?;

                Self::InfoPlistKeyField(key, m)
            }
            RequirementOpCode::CertificateField => {
                let slot = reader.read_i32_be()?;
                let field = read_string(reader, "certificate field not a UTF-8 string")?;
                let m = CodeRequirementMatchExpression::read(reader)?;

                Self::CertificateField(slot, field, m)
            }
            RequirementOpCode::CertificateTrusted => {
                Self::CertificateTrusted(reader.read_i32_be()?)
            }
            RequirementOpCode::AnchorTrusted => Self::AnchorTrusted,
            RequirementOpCode::CertificateGeneric => {
                let slot = reader.read_i32_be()?;
                let oid = reader.read_length_prefixed()?.to_vec();
                let m = CodeRequirementMatchExpression::read(reader)?;

                Self::CertificateGeneric(slot, oid, m)
            }
            RequirementOpCode::AnchorAppleGeneric => Self::AnchorAppleGeneric,
            RequirementOpCode::EntitlementsField => {
                let key = read_string(reader, "entitlement key not a UTF-8 string")?;
                let m = CodeRequirementMatchExpression::read(reader)?;

                Self::EntitlementsKey(key, m)
            }
            RequirementOpCode::NamedAnchor => {
                Self::NamedAnchor(read_string(reader, "named anchor not a UTF-8 string")?)
            }
            RequirementOpCode::NamedCode => {
                Self::NamedCode(read_string(reader, "named code not a UTF-8 string")?)
            }
            RequirementOpCode::Platform => Self::Platform(reader.read_u32_be()?),
            RequirementOpCode::Notarized => Self::Notarized,
            RequirementOpCode::LegacyDeveloperId => Self::LegacyDeveloperId,
        };

        Ok(if flags == 0 {
            expr
        } else {
            Self::Flagged(flags, Box::new(expr))
        })
    }

    /// Write the binary representation of this expression.
    pub fn write_to(&self, dest: &mut impl Write) -> Result<(), AppleResignError> {
        self.write_with_flags(dest, 0)
    }

    fn write_with_flags(&self, dest: &mut impl Write, flags: u32) -> Result<(), AppleResignError> {
        if let Self::Flagged(inner_flags, expr) = self {
            return expr.write_with_flags(dest, flags | (inner_flags & OPCODE_FLAG_MASK));
        }

        dest.iowrite_with(RequirementOpCode::from(self) as u32 | flags, scroll::BE)?;

        match self {
            Self::False
            | Self::True
            | Self::AnchorApple
            | Self::AnchorTrusted
            | Self::AnchorAppleGeneric
            | Self::Notarized
            | Self::LegacyDeveloperId => {}
            Self::Identifier(s) | Self::NamedAnchor(s) | Self::NamedCode(s) => {
                write_length_prefixed(dest, s.as_bytes())?;
            }
            Self::AnchorCertificateHash(slot, hash) => {
                dest.iowrite_with(*slot, scroll::BE)?;
                write_length_prefixed(dest, hash)?;
            }
            Self::InfoKeyValueLegacy(key, value) => {
                write_length_prefixed(dest, key.as_bytes())?;
                write_length_prefixed(dest, value.as_bytes())?;
            }
            Self::And(a, b) | Self::Or(a, b) => {
                a.write_to(dest)?;
                b.write_to(dest)?;
            }
            Self::CodeDirectoryHash(hash) => {
                write_length_prefixed(dest, hash)?;
            }
            Self::Not(expr) => {
                expr.write_to(dest)?;
            }
            Self::InfoPlistKeyField(key, m) | Self::EntitlementsKey(key, m) => {
                write_length_prefixed(dest, key.as_bytes())?;
                m.write_to(dest)?;
            }
            Self::CertificateField(slot, field, m) => {
                dest.iowrite_with(*slot, scroll::BE)?;
                write_length_prefixed(dest, field.as_bytes())?;
                m.write_to(dest)?;
            }
            Self::CertificateTrusted(slot) => {
                dest.iowrite_with(*slot, scroll::BE)?;
            }
            Self::CertificateGeneric(slot, oid, m) => {
                dest.iowrite_with(*slot, scroll::BE)?;
                write_length_prefixed(dest, oid)?;
                m.write_to(dest)?;
            }
            Self::Platform(value) => {
                dest.iowrite_with(*value, scroll::BE)?;
            }
            Self::Flagged(_, _) => {}
        }

        Ok(())
    }

    /// Produce the binary serialization of this expression.
    ///
    /// The blob header is not included.
    pub fn to_bytes(&self) -> Result<Vec<u8>, AppleResignError> {
        let mut res = vec![];

        self.write_to(&mut res)?;

        Ok(res)
    }
}

/// A code requirement match expression type.
#[derive(Clone, Copy, Debug, PartialEq)]
#[repr(u32)]
enum MatchType {
    Exists = 0,
    Equal = 1,
    Contains = 2,
    BeginsWith = 3,
    EndsWith = 4,
    LessThan = 5,
    GreaterThan = 6,
    LessThanEqual = 7,
    GreaterThanEqual = 8,
}

impl TryFrom<u32> for MatchType {
    type Error = AppleResignError;

    fn try_from(v: u32) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Self::Exists),
            1 => Ok(Self::Equal),
            2 => Ok(Self::Contains),
            3 => Ok(Self::BeginsWith),
            4 => Ok(Self::EndsWith),
            5 => Ok(Self::LessThan),
            6 => Ok(Self::GreaterThan),
            7 => Ok(Self::LessThanEqual),
            8 => Ok(Self::GreaterThanEqual),
            _ => Err(AppleResignError::UnknownMatchOperation(v)),
        }
    }
}

/// A comparison applied to a value selected by a [CodeRequirementExpression].
///
/// Every operation except `Exists` carries a comparison value.
#[derive(Clone, Debug, PartialEq)]
pub enum CodeRequirementMatchExpression {
    /// `/* exists */`
    Exists,
    /// `= "<value>"`
    Equal(CodeRequirementValue),
    /// `~ "<value>"`
    Contains(CodeRequirementValue),
    /// `= "<value>*"`
    BeginsWith(CodeRequirementValue),
    /// `= "*<value>"`
    EndsWith(CodeRequirementValue),
    /// `< "<value>"`
    LessThan(CodeRequirementValue),
    /// `> "<value>"`
    GreaterThan(CodeRequirementValue),
    /// `<= "<value>"`
    LessThanEqual(CodeRequirementValue),
    /// `>= "<value>"`
    GreaterThanEqual(CodeRequirementValue),
}

impl Display for CodeRequirementMatchExpression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exists => f.write_str("/* exists */"),
            Self::Equal(value) => f.write_fmt(format_args!("= \"{}\"", value)),
            Self::Contains(value) => f.write_fmt(format_args!("~ \"{}\"", value)),
            Self::BeginsWith(value) => f.write_fmt(format_args!("= \"{}*\"", value)),
            Self::EndsWith(value) => f.write_fmt(format_args!("= \"*{}\"", value)),
            Self::LessThan(value) => f.write_fmt(format_args!("< \"{}\"", value)),
            Self::GreaterThan(value) => f.write_fmt(format_args!("> \"{}\"", value)),
            Self::LessThanEqual(value) => f.write_fmt(format_args!("<= \"{}\"", value)),
            Self::GreaterThanEqual(value) => f.write_fmt(format_args!(">= \"{}\"", value)),
        }
    }
}

impl From<&CodeRequirementMatchExpression> for MatchType {
    fn from(m: &CodeRequirementMatchExpression) -> Self {
        match m {
            CodeRequirementMatchExpression::Exists => MatchType::Exists,
            CodeRequirementMatchExpression::Equal(_) => MatchType::Equal,
            CodeRequirementMatchExpression::Contains(_) => MatchType::Contains,
            CodeRequirementMatchExpression::BeginsWith(_) => MatchType::BeginsWith,
            CodeRequirementMatchExpression::EndsWith(_) => MatchType::EndsWith,
            CodeRequirementMatchExpression::LessThan(_) => MatchType::LessThan,
            CodeRequirementMatchExpression::GreaterThan(_) => MatchType::GreaterThan,
            CodeRequirementMatchExpression::LessThanEqual(_) => MatchType::LessThanEqual,
            CodeRequirementMatchExpression::GreaterThanEqual(_) => MatchType::GreaterThanEqual,
        }
    }
}

impl CodeRequirementMatchExpression {
    fn read(reader: &mut ByteReader) -> Result<Self, AppleResignError> {
        let typ = MatchType::try_from(reader.read_u32_be()?)?;

        if typ == MatchType::Exists {
            return Ok(Self::Exists);
        }

        let value = CodeRequirementValue::from(reader.read_length_prefixed()?);

        Ok(match typ {
            MatchType::Exists => Self::Exists,
            MatchType::Equal => Self::Equal(value),
            MatchType::Contains => Self::Contains(value),
            MatchType::BeginsWith => Self::BeginsWith(value),
            MatchType::EndsWith => Self::EndsWith(value),
            MatchType::LessThan => Self::LessThan(value),
            MatchType::GreaterThan => Self::GreaterThan(value),
            MatchType::LessThanEqual => Self::LessThanEqual(value),
            MatchType::GreaterThanEqual => Self::GreaterThanEqual(value),
        })
    }

    /// The comparison value, if this operation has one.
    pub fn value(&self) -> Option<&CodeRequirementValue> {
        match self {
            Self::Exists => None,
            Self::Equal(v)
            | Self::Contains(v)
            | Self::BeginsWith(v)
            | Self::EndsWith(v)
            | Self::LessThan(v)
            | Self::GreaterThan(v)
            | Self::LessThanEqual(v)
            | Self::GreaterThanEqual(v) => Some(v),
        }
    }

    /// Write the binary representation of this match expression.
    pub fn write_to(&self, dest: &mut impl Write) -> Result<(), AppleResignError> {
        dest.iowrite_with(MatchType::from(self) as u32, scroll::BE)?;

        if let Some(value) = self.value() {
            write_length_prefixed(dest, &value.0)?;
        }

        Ok(())
    }
}

/// The type of a requirement within a requirement set.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum RequirementType {
    /// What hosts may run us.
    Host,
    /// What guests we may run.
    Guest,
    /// Designated requirement.
    Designated,
    /// What libraries we may link against.
    Library,
    /// What plug-ins we may load.
    Plugin,
    Unknown(u32),
}

impl From<u32> for RequirementType {
    fn from(v: u32) -> Self {
        match v {
            1 => Self::Host,
            2 => Self::Guest,
            3 => Self::Designated,
            4 => Self::Library,
            5 => Self::Plugin,
            _ => Self::Unknown(v),
        }
    }
}

impl From<RequirementType> for u32 {
    fn from(t: RequirementType) -> Self {
        match t {
            RequirementType::Host => 1,
            RequirementType::Guest => 2,
            RequirementType::Designated => 3,
            RequirementType::Library => 4,
            RequirementType::Plugin => 5,
            RequirementType::Unknown(v) => v,
        }
    }
}

/// A requirement blob: a single expression tree.
///
/// The payload is a u32 kind (always expression form) followed by the
/// expression.
#[derive(Clone, Debug, PartialEq)]
pub struct RequirementBlob {
    pub expression: CodeRequirementExpression,
}

impl<'a> Blob<'a> for RequirementBlob {
    fn magic() -> u32 {
        u32::from(CodeSigningMagic::Requirement)
    }

    fn from_blob_bytes(data: &'a [u8]) -> Result<Self, AppleResignError> {
        let payload = read_and_validate_blob_header(data, Self::magic(), "requirement blob")?;

        let mut reader = ByteReader::new(payload);
        if reader.read_u32_be()? != REQUIREMENT_KIND_EXPRESSION {
            return Err(AppleResignError::RequirementMalformed(
                "requirement is not in expression form",
            ));
        }

        let (expression, consumed) = CodeRequirementExpression::from_bytes(reader.remaining())?;

        if consumed != reader.remaining().len() {
            return Err(AppleResignError::RequirementMalformed(
                "trailing data after requirement expression",
            ));
        }

        Ok(Self { expression })
    }

    fn serialize_payload(&self) -> Result<Vec<u8>, AppleResignError> {
        let mut res = vec![];
        res.iowrite_with(REQUIREMENT_KIND_EXPRESSION, scroll::BE)?;
        self.expression.write_to(&mut res)?;

        Ok(res)
    }
}

impl From<CodeRequirementExpression> for RequirementBlob {
    fn from(expression: CodeRequirementExpression) -> Self {
        Self { expression }
    }
}

/// A requirement set blob.
///
/// Requirements are kept in insertion order. Each requirement type appears
/// at most once.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RequirementSetBlob {
    requirements: Vec<(RequirementType, RequirementBlob)>,
}

impl<'a> Blob<'a> for RequirementSetBlob {
    fn magic() -> u32 {
        u32::from(CodeSigningMagic::RequirementSet)
    }

    fn from_blob_bytes(data: &'a [u8]) -> Result<Self, AppleResignError> {
        let requirements =
            parse_superblob(data, CodeSigningMagic::RequirementSet, "requirement set blob")?
                .into_iter()
                .map(|entry| -> Result<_, AppleResignError> {
                    Ok((
                        RequirementType::from(entry.typ),
                        RequirementBlob::from_blob_bytes(entry.data)?,
                    ))
                })
                .collect::<Result<Vec<_>, AppleResignError>>()?;

        Ok(Self { requirements })
    }

    fn serialize_payload(&self) -> Result<Vec<u8>, AppleResignError> {
        Ok(self.to_blob_bytes()?[8..].to_vec())
    }

    fn to_blob_bytes(&self) -> Result<Vec<u8>, AppleResignError> {
        let mut sb = SuperBlob::new(CodeSigningMagic::RequirementSet);

        for (typ, requirement) in &self.requirements {
            sb.add(*typ, requirement.to_blob_bytes()?);
        }

        sb.to_bytes()
    }
}

impl RequirementSetBlob {
    /// Set the requirement for a type, replacing any existing one in place.
    pub fn set_requirement(&mut self, typ: RequirementType, blob: RequirementBlob) {
        if let Some(entry) = self.requirements.iter_mut().find(|(t, _)| *t == typ) {
            entry.1 = blob;
        } else {
            self.requirements.push((typ, blob));
        }
    }

    pub fn get(&self, typ: RequirementType) -> Option<&RequirementBlob> {
        self.requirements
            .iter()
            .find_map(|(t, blob)| if *t == typ { Some(blob) } else { None })
    }

    pub fn iter(&self) -> impl Iterator<Item = &(RequirementType, RequirementBlob)> {
        self.requirements.iter()
    }

    pub fn len(&self) -> usize {
        self.requirements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }
}

/// Build the designated requirement for a signing identifier and certificate.
///
/// The requirement is:
///
/// `identifier "<ident>" and anchor apple generic and
/// certificate leaf[subject.CN] = "<cn>" and
/// certificate 1[field.1.2.840.113635.100.6.2.1] exists`
pub fn designated_requirement(identifier: &str, common_name: &str) -> CodeRequirementExpression {
    use CodeRequirementExpression::*;

    And(
        Box::new(Identifier(identifier.to_string())),
        Box::new(And(
            Box::new(AnchorAppleGeneric),
            Box::new(And(
                Box::new(CertificateField(
                    0,
                    "subject.CN".to_string(),
                    CodeRequirementMatchExpression::Equal(common_name.into()),
                )),
                Box::new(CertificateGeneric(
                    1,
                    OID_APPLE_IOS_DEVELOPMENT_INTERMEDIATE.to_vec(),
                    CodeRequirementMatchExpression::Exists,
                )),
            )),
        )),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verify_roundtrip(expr: &CodeRequirementExpression, source: &[u8]) {
        let (parsed, consumed) = CodeRequirementExpression::from_bytes(source).unwrap();
        assert_eq!(&parsed, expr);
        assert_eq!(consumed, source.len());
        assert_eq!(expr.to_bytes().unwrap(), source);
    }

    #[test]
    fn parse_false_and_true() {
        verify_roundtrip(
            &CodeRequirementExpression::False,
            &hex::decode("00000000").unwrap(),
        );
        verify_roundtrip(
            &CodeRequirementExpression::True,
            &hex::decode("00000001").unwrap(),
        );
    }

    #[test]
    fn parse_identifier() {
        let source = hex::decode("000000020000000f636f6d2e6578616d706c652e61707000").unwrap();
        let expr = CodeRequirementExpression::Identifier("com.example.app".into());

        verify_roundtrip(&expr, &source);
        assert_eq!(expr.to_string(), "identifier \"com.example.app\"");
    }

    #[test]
    fn parse_anchor_certificate_hash() {
        let source = hex::decode(concat!(
            "00000004",
            "ffffffff",
            "00000014",
            "b0b1730ecbc7ff4505142c49f1295e6eda6bcaed"
        ))
        .unwrap();

        let expr = CodeRequirementExpression::AnchorCertificateHash(
            -1,
            hex::decode("b0b1730ecbc7ff4505142c49f1295e6eda6bcaed").unwrap(),
        );

        verify_roundtrip(&expr, &source);
        assert_eq!(
            expr.to_string(),
            "anchor root H\"b0b1730ecbc7ff4505142c49f1295e6eda6bcaed\""
        );
    }

    #[test]
    fn parse_certificate_field() {
        // certificate leaf[subject.CN] = "abc"
        let source = hex::decode(concat!(
            "0000000b",
            "00000000",
            "0000000a",
            "7375626a6563742e434e0000",
            "00000001",
            "00000003",
            "61626300",
        ))
        .unwrap();

        let expr = CodeRequirementExpression::CertificateField(
            0,
            "subject.CN".into(),
            CodeRequirementMatchExpression::Equal("abc".into()),
        );

        verify_roundtrip(&expr, &source);
        assert_eq!(expr.to_string(), "certificate leaf[subject.CN] = \"abc\"");
    }

    #[test]
    fn parse_certificate_generic_exists() {
        let source = hex::decode(concat!(
            "0000000e",
            "00000001",
            "0000000a",
            "2a864886f76364060201",
            "0000",
            "00000000",
        ))
        .unwrap();

        let expr = CodeRequirementExpression::CertificateGeneric(
            1,
            OID_APPLE_IOS_DEVELOPMENT_INTERMEDIATE.to_vec(),
            CodeRequirementMatchExpression::Exists,
        );

        verify_roundtrip(&expr, &source);
        assert_eq!(
            expr.to_string(),
            "certificate 1[field.1.2.840.113635.100.6.2.1] /* exists */"
        );
    }

    #[test]
    fn designated_requirement_structure() {
        let expr = designated_requirement("com.example.app", "Apple Development: Jo (ABC)");

        let data = expr.to_bytes().unwrap();
        // and, identifier
        assert_eq!(&data[0..8], &hex::decode("0000000600000002").unwrap()[..]);
        assert_eq!(data.len() % 4, 0);

        let (parsed, consumed) = CodeRequirementExpression::from_bytes(&data).unwrap();
        assert_eq!(parsed, expr);
        assert_eq!(consumed, data.len());

        assert_eq!(
            expr.to_string(),
            concat!(
                "(identifier \"com.example.app\") and ((anchor apple generic) and ",
                "((certificate leaf[subject.CN] = \"Apple Development: Jo (ABC)\") and ",
                "(certificate 1[field.1.2.840.113635.100.6.2.1] /* exists */)))"
            )
        );
    }

    #[test]
    fn every_opcode_roundtrip() {
        use CodeRequirementExpression::*;

        let leaves = vec![
            False,
            True,
            AnchorApple,
            AnchorTrusted,
            AnchorAppleGeneric,
            Notarized,
            LegacyDeveloperId,
            Platform(2),
            NamedAnchor("developer-id".into()),
            NamedCode("foo".into()),
            CertificateTrusted(-1),
            CodeDirectoryHash(vec![0xab; 20]),
            InfoKeyValueLegacy("CFBundleVersion".into(), "1.0".into()),
            InfoPlistKeyField(
                "CFBundleShortVersionString".into(),
                CodeRequirementMatchExpression::GreaterThanEqual("1".into()),
            ),
            EntitlementsKey(
                "com.apple.security.app-sandbox".into(),
                CodeRequirementMatchExpression::Contains(CodeRequirementValue(vec![0, 1, 2])),
            ),
        ];

        // Fold every leaf into one tree so children of every combinator are exercised.
        let tree = leaves
            .into_iter()
            .enumerate()
            .fold(True, |acc, (i, leaf)| match i % 3 {
                0 => And(Box::new(acc), Box::new(leaf)),
                1 => Or(Box::new(leaf), Box::new(acc)),
                _ => Not(Box::new(And(Box::new(acc), Box::new(leaf)))),
            });

        let data = tree.to_bytes().unwrap();
        let (parsed, consumed) = CodeRequirementExpression::from_bytes(&data).unwrap();
        assert_eq!(parsed, tree);
        assert_eq!(consumed, data.len());
    }

    #[test]
    fn opcode_flags_preserved() {
        let data = hex::decode("80000001").unwrap();
        let (expr, consumed) = CodeRequirementExpression::from_bytes(&data).unwrap();
        assert_eq!(
            expr,
            CodeRequirementExpression::Flagged(
                0x80000000,
                Box::new(CodeRequirementExpression::True)
            )
        );
        assert_eq!(consumed, 4);
        assert_eq!(expr.to_string(), "always");
        assert_eq!(expr.to_bytes().unwrap(), data);

        // Flags on a nested operand with a payload.
        let data = hex::decode("00000006400000020000000161000000").unwrap();
        let (expr, consumed) = CodeRequirementExpression::from_bytes(&data).unwrap();
        assert_eq!(consumed, data.len());
        assert_eq!(
            expr,
            CodeRequirementExpression::Not(Box::new(CodeRequirementExpression::Flagged(
                0x40000000,
                Box::new(CodeRequirementExpression::Identifier("a".into()))
            )))
        );
        assert_eq!(expr.to_string(), "!(identifier \"a\")");
        assert_eq!(expr.to_bytes().unwrap(), data);
    }

    #[test]
    fn unknown_opcodes() {
        assert!(matches!(
            CodeRequirementExpression::from_bytes(&hex::decode("00000042").unwrap()),
            Err(AppleResignError::UnknownExpressionOpcode(0x42))
        ));

        // info [key] with match type 9.
        let data = hex::decode("0000000a000000016b00000000000009").unwrap();
        assert!(matches!(
            CodeRequirementExpression::from_bytes(&data),
            Err(AppleResignError::UnknownMatchOperation(9))
        ));
    }

    #[test]
    fn malformed_expressions() {
        // Identifier that isn't UTF-8.
        let data = hex::decode("0000000200000002ff fe0000".replace(' ', "")).unwrap();
        assert!(matches!(
            CodeRequirementExpression::from_bytes(&data),
            Err(AppleResignError::RequirementMalformed(_))
        ));

        // `and` missing its second operand.
        let data = hex::decode("0000000600000001").unwrap();
        assert!(matches!(
            CodeRequirementExpression::from_bytes(&data),
            Err(AppleResignError::TruncatedInput)
        ));

        // Deeply nested `not`.
        let data = hex::decode("00000009".repeat(MAX_EXPRESSION_DEPTH + 2)).unwrap();
        assert!(matches!(
            CodeRequirementExpression::from_bytes(&data),
            Err(AppleResignError::RequirementMalformed(_))
        ));
    }

    #[test]
    fn requirement_blob() {
        let blob = RequirementBlob::from(CodeRequirementExpression::AnchorApple);
        let data = blob.to_blob_bytes().unwrap();
        assert_eq!(data, hex::decode("fade0c00000000100000000100000003").unwrap());

        assert_eq!(RequirementBlob::from_blob_bytes(&data).unwrap(), blob);

        let mut data = data;
        data[11] = 2;
        assert!(matches!(
            RequirementBlob::from_blob_bytes(&data),
            Err(AppleResignError::RequirementMalformed(_))
        ));
    }

    #[test]
    fn requirement_set_offsets() {
        let mut set = RequirementSetBlob::default();
        set.set_requirement(
            RequirementType::Host,
            CodeRequirementExpression::AnchorApple.into(),
        );
        set.set_requirement(
            RequirementType::Designated,
            designated_requirement("com.example.app", "Example").into(),
        );
        set.set_requirement(
            RequirementType::Library,
            CodeRequirementExpression::Identifier("lib".into()).into(),
        );

        let data = set.to_blob_bytes().unwrap();
        let entries =
            parse_superblob(&data, CodeSigningMagic::RequirementSet, "requirement set").unwrap();

        assert_eq!(
            entries.iter().map(|e| e.typ).collect::<Vec<_>>(),
            vec![1, 3, 4]
        );
        assert_eq!(entries[0].offset, 12 + 3 * 8);
        for pair in entries.windows(2) {
            assert!(pair[0].offset < pair[1].offset);
        }
        let last = entries.last().unwrap();
        assert_eq!(last.offset + last.data.len(), data.len());
        assert_eq!(
            u32::from_be_bytes([data[4], data[5], data[6], data[7]]) as usize,
            data.len()
        );

        let parsed = RequirementSetBlob::from_blob_bytes(&data).unwrap();
        assert_eq!(parsed, set);
        assert_eq!(parsed.serialize_payload().unwrap(), data[8..].to_vec());
    }

    #[test]
    fn requirement_set_replaces_in_place() {
        let mut set = RequirementSetBlob::default();
        set.set_requirement(RequirementType::Designated, CodeRequirementExpression::False.into());
        set.set_requirement(RequirementType::Host, CodeRequirementExpression::False.into());
        set.set_requirement(RequirementType::Designated, CodeRequirementExpression::True.into());

        assert_eq!(set.len(), 2);
        assert_eq!(set.iter().next().unwrap().0, RequirementType::Designated);
        assert_eq!(
            set.get(RequirementType::Designated).unwrap().expression,
            CodeRequirementExpression::True
        );
        assert!(set.get(RequirementType::Plugin).is_none());
    }
}

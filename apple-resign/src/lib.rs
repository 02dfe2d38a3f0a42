// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Re-signing Mach-O binaries for Apple platforms.
//!
//! This crate replaces the embedded code signature of an existing Mach-O
//! binary (thin or universal) with one for a new bundle identifier and
//! signing identity. It is the binary-format half of re-signing an
//! application bundle: unpacking the bundle, parsing provisioning profiles
//! and producing the CMS signature itself are left to the caller.
//!
//! # Features and Capabilities
//!
//! This crate can:
//!
//! * Parse and re-emit Mach-O images byte for byte, including universal
//!   binaries. (See [MachOImage], [UniversalBinary] and [MachOFile].)
//! * Parse and build embedded signature superblobs and the blobs within
//!   them. (See [EmbeddedSignature], [CodeDirectoryBlob] and
//!   [RequirementSetBlob].)
//! * Read, write and render code requirement expressions. (See
//!   [CodeRequirementExpression].)
//! * Resign an image, recomputing code and special hashes over its final
//!   layout. (See [resign_macho_data].)
//!
//! # Signing
//!
//! The detached signature over the code directory comes from a [Signer]
//! implementation. Its output is embedded without interpretation. Closures
//! with the matching signature implement [Signer].
//!
//! Settings for a resign operation are held by [ResignSettings].

pub mod byte_codec;
pub mod code_directory;
pub use code_directory::{CodeDirectoryBlob, CodeSignatureFlags, ExecutableSegmentFlags};
pub mod code_hash;
pub mod code_requirement;
pub use code_requirement::{
    designated_requirement, CodeRequirementExpression, CodeRequirementMatchExpression,
    RequirementBlob, RequirementSetBlob, RequirementType,
};
pub mod code_resources;
pub use code_resources::CodeResources;
pub mod embedded_signature;
pub use embedded_signature::{
    Blob, BlobWrapperBlob, CodeSigningMagic, CodeSigningSlot, Digest, DigestType,
    EmbeddedSignature, EntitlementsBlob, SuperBlob,
};
pub mod entitlements;
mod error;
pub use error::AppleResignError;
pub mod macho;
pub use macho::{LoadCommand, MachOImage};
mod resign;
pub use resign::{resign_image, resign_macho_data};
mod signing;
pub use signing::{sign_checked, ResignSettings, Signer, SigningIdentity};
pub mod universal;
pub use universal::{pack_macho_images, read_macho_images, MachOFile, UniversalBinary};

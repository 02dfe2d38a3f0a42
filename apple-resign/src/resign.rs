// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Resigning Mach-O binaries.

An image is resigned in several passes. The code hashes cover the header and
load commands, and those record the size of the signature. So we first
build a provisional signature to learn its size, resize `__LINKEDIT` and
`LC_CODE_SIGNATURE` to fit it, and only then compute hashes over the final
layout and produce the real signature.

`LC_CODE_SIGNATURE` must record the exact length of the embedded superblob.
Only the detached signature can change length between passes. When it does,
the region is resized to the new length and hashing and signing are repeated.
*/

use {
    crate::{
        code_directory::CodeDirectoryBlob,
        code_hash::{
            compute_code_hashes, compute_special_hashes, special_hashes_storage_order,
            SpecialHashInputs,
        },
        code_requirement::{designated_requirement, RequirementSetBlob, RequirementType},
        embedded_signature::{
            Blob, BlobWrapperBlob, CodeSigningMagic, CodeSigningSlot, SuperBlob,
        },
        entitlements::entitlements_blob,
        error::AppleResignError,
        macho::{find_linkedit_segment, find_linkedit_segment_mut, LoadCommand, MachOImage, Segment},
        signing::{sign_checked, ResignSettings, Signer},
        universal::MachOFile,
    },
    log::{debug, info, warn},
};

/// `codesign` rounds the `__LINKEDIT` vmsize up to this boundary.
const LINKEDIT_VM_ALIGNMENT: u64 = 16384;

/// Signing passes over the final layout before giving up on a signer whose
/// output length keeps changing.
const MAX_SIGNING_PASSES: usize = 4;

/// Blobs that don't depend on the final image layout.
struct SignatureBlobs {
    code_directory: CodeDirectoryBlob<'static>,
    requirements: Vec<u8>,
    entitlements: Vec<u8>,
}

impl SignatureBlobs {
    /// Assemble the embedded signature superblob around a detached signature.
    fn superblob(&self, signature: Vec<u8>) -> Result<Vec<u8>, AppleResignError> {
        let mut sb = SuperBlob::new(CodeSigningMagic::EmbeddedSignature);

        sb.add(
            CodeSigningSlot::CodeDirectory,
            self.code_directory.to_blob_bytes()?,
        );
        sb.add(CodeSigningSlot::RequirementSet, self.requirements.clone());
        sb.add(CodeSigningSlot::Entitlements, self.entitlements.clone());
        sb.add(
            CodeSigningSlot::Signature,
            BlobWrapperBlob { data: signature }.to_blob_bytes()?,
        );

        sb.to_bytes()
    }
}

/// Verify the image has the structure resigning requires.
///
/// Returns the code length, which is the file offset of the signature data.
fn check_signing_capability(image: &MachOImage) -> Result<usize, AppleResignError> {
    let command = image
        .code_signature_command()
        .ok_or(AppleResignError::MissingCodeSignatureCommand)?;

    if !matches!(image.load_commands.last(), Some(LoadCommand::CodeSignature(_))) {
        return Err(AppleResignError::CodeSignatureNotLast);
    }

    let linkedit =
        find_linkedit_segment(&image.load_commands).ok_or(AppleResignError::MissingLinkEditSegment)?;

    let code_length = command.dataoff as usize;

    if code_length < image.data_offset() || code_length > image.len() {
        return Err(AppleResignError::OffsetOutOfRange(
            "signature data offset outside the image data",
        ));
    }
    if (code_length as u64) < linkedit.file_offset() {
        return Err(AppleResignError::OffsetOutOfRange(
            "signature data starts before __LINKEDIT",
        ));
    }

    Ok(code_length)
}

/// Resize the signature region to `signature_size` bytes.
///
/// Updates `LC_CODE_SIGNATURE`, `__LINKEDIT` and the raw data region. The
/// new region is zero-filled.
fn reserve_signature_space(
    image: &mut MachOImage,
    code_length: usize,
    signature_size: usize,
) -> Result<(), AppleResignError> {
    let datasize = u32::try_from(signature_size)
        .map_err(|_| AppleResignError::OffsetOutOfRange("signature size"))?;

    for command in image.load_commands.iter_mut() {
        if let LoadCommand::CodeSignature(command) = command {
            command.datasize = datasize;
        }
    }

    let linkedit = find_linkedit_segment_mut(&mut image.load_commands)
        .ok_or(AppleResignError::MissingLinkEditSegment)?;
    linkedit.set_end_offset((code_length + signature_size) as u64)?;

    let filesize = linkedit.file_size();
    let remainder = filesize % LINKEDIT_VM_ALIGNMENT;
    let vmsize = if remainder == 0 {
        filesize
    } else {
        filesize + LINKEDIT_VM_ALIGNMENT - remainder
    };
    if vmsize > linkedit.vm_size() {
        linkedit.set_vm_size(vmsize)?;
    }

    debug!(
        "__LINKEDIT resized to {} bytes ({} bytes of signature)",
        filesize, signature_size
    );

    let start = code_length - image.data_offset();
    image.data.truncate(start);
    image.data.resize(start + signature_size, 0);

    Ok(())
}

/// Resign a single Mach-O image in place.
///
/// On error the image is left unmodified.
pub fn resign_image(
    image: &mut MachOImage,
    settings: &ResignSettings,
    signer: &dyn Signer,
) -> Result<(), AppleResignError> {
    let identifier = settings
        .bundle_identifier()
        .filter(|s| !s.is_empty())
        .ok_or(AppleResignError::MalformedIdentifier("bundle identifier"))?;
    let identity = settings
        .signing_identity()?
        .ok_or(AppleResignError::MissingSigningIdentity)?;
    let hash_type = settings.digest_type();

    let code_length = check_signing_capability(image)?;

    let mut code_directory = CodeDirectoryBlob::create(
        code_length,
        identifier,
        identity.team_id.as_deref(),
        hash_type,
    )?;
    info!(
        "code directory for {} covers {} pages of {}",
        identifier,
        code_directory.code_hashes.len(),
        hash_type
    );

    let mut requirements = RequirementSetBlob::default();
    requirements.set_requirement(
        RequirementType::Designated,
        designated_requirement(identifier, &identity.common_name).into(),
    );
    if let Some(blob) = requirements.get(RequirementType::Designated) {
        info!("designated requirement: {}", blob.expression);
    }

    let no_entitlements = plist::Dictionary::new();
    let entitlements =
        entitlements_blob(settings.entitlements().unwrap_or(&no_entitlements))?.to_blob_bytes()?;

    let mut blobs = SignatureBlobs {
        code_directory: code_directory.clone(),
        requirements: requirements.to_blob_bytes()?,
        entitlements,
    };

    let special_hashes = special_hashes_storage_order(compute_special_hashes(
        &SpecialHashInputs {
            info_plist: settings.info_plist().unwrap_or_default(),
            requirements: &blobs.requirements,
            code_resources: settings.code_resources().unwrap_or_default(),
            entitlements: &blobs.entitlements,
        },
        hash_type,
    )?);

    // Provisional pass to learn the signature size.
    let provisional_signature = sign_checked(
        signer,
        &blobs.code_directory.to_blob_bytes()?,
        settings.certificates(),
    )?;
    let mut reserved = blobs.superblob(provisional_signature)?.len();

    let mut signed = image.clone();
    let mut pass = 0;

    loop {
        pass += 1;
        info!("reserving {} bytes for signature (pass {})", reserved, pass);
        reserve_signature_space(&mut signed, code_length, reserved)?;

        // Hashes over the final layout.
        let image_data = signed.to_bytes()?;

        code_directory.code_hashes = compute_code_hashes(
            &image_data,
            code_length,
            hash_type,
            code_directory.page_size(),
        )?;
        code_directory.special_hashes = special_hashes.clone();
        blobs.code_directory = code_directory.clone();

        let signature = sign_checked(
            signer,
            &blobs.code_directory.to_blob_bytes()?,
            settings.certificates(),
        )?;
        let signature_data = blobs.superblob(signature)?;
        let actual = signature_data.len();

        if actual == reserved {
            info!("total signature size: {} bytes", actual);

            let start = code_length - signed.data_offset();
            signed.data[start..start + reserved].copy_from_slice(&signature_data);
            *image = signed;

            return Ok(());
        }

        if pass == MAX_SIGNING_PASSES {
            return Err(AppleResignError::SignatureSizeMismatch { reserved, actual });
        }

        warn!(
            "signature is {} bytes but {} were reserved; resizing",
            actual, reserved
        );
        reserved = actual;
    }
}

/// Resign a thin or universal Mach-O file.
///
/// Architectures are resigned in order. The first failure aborts the whole
/// operation.
pub fn resign_macho_data(
    data: &[u8],
    settings: &ResignSettings,
    signer: &dyn Signer,
) -> Result<Vec<u8>, AppleResignError> {
    let mut file = MachOFile::parse(data)?;

    for (index, image) in file.images_mut().iter_mut().enumerate() {
        info!(
            "resigning Mach-O binary at index {} (cputype {:#x})",
            index, image.header.cputype
        );
        resign_image(image, settings, signer)?;
    }

    file.to_bytes()
}

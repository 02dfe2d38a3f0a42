// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Computing code and special hashes.

The signed range of a binary is split into pages and the digest of each
page is stored in the code directory. When the binary is loaded, each page
is verified against its digest as it is paged in.

Special hashes are digests of things outside the code: Info.plist, the
requirements blob, `CodeResources`, and the entitlements blob. They are
addressed by negative index from code hash 0. Slot 1 is closest to the code
hashes, so storing them requires reversing the slot order.
*/

use crate::{
    embedded_signature::{Digest, DigestType},
    error::AppleResignError,
};

/// Compute paged digests.
///
/// `page_size` of `None` means the whole of `data` is one page. The final
/// page may be short.
pub fn paged_digests(
    data: &[u8],
    hash: DigestType,
    page_size: Option<usize>,
) -> Result<Vec<Digest<'static>>, AppleResignError> {
    match page_size {
        Some(page_size) if page_size > 0 => data
            .chunks(page_size)
            .map(|chunk| Ok(Digest::from(hash.digest_data(chunk)?)))
            .collect::<Result<Vec<_>, AppleResignError>>(),
        _ => Ok(vec![Digest::from(hash.digest_data(data)?)]),
    }
}

/// Compute code hashes over the first `code_length` bytes of an image.
pub fn compute_code_hashes(
    image_data: &[u8],
    code_length: usize,
    hash: DigestType,
    page_size: Option<usize>,
) -> Result<Vec<Digest<'static>>, AppleResignError> {
    let code = image_data
        .get(..code_length)
        .ok_or(AppleResignError::OffsetOutOfRange(
            "code length exceeds image length",
        ))?;

    paged_digests(code, hash, page_size)
}

/// Data feeding the special hash slots.
///
/// Every input is digested as given. An absent file is an empty buffer.
#[derive(Clone, Copy, Debug, Default)]
pub struct SpecialHashInputs<'a> {
    /// Info.plist content.
    pub info_plist: &'a [u8],
    /// Serialized requirement set blob.
    pub requirements: &'a [u8],
    /// `_CodeSignature/CodeResources` content.
    pub code_resources: &'a [u8],
    /// Serialized entitlements blob.
    pub entitlements: &'a [u8],
}

/// Compute special hashes in slot order.
///
/// The result is `[Info, RequirementSet, ResourceDir, Application, Entitlements]`.
/// The application specific slot is always zero-filled.
pub fn compute_special_hashes(
    inputs: &SpecialHashInputs,
    hash: DigestType,
) -> Result<Vec<Digest<'static>>, AppleResignError> {
    let digest = |data: &[u8]| -> Result<Digest<'static>, AppleResignError> {
        Ok(Digest::from(hash.digest_data(data)?))
    };

    Ok(vec![
        digest(inputs.info_plist)?,
        digest(inputs.requirements)?,
        digest(inputs.code_resources)?,
        Digest::null(hash.hash_len()?),
        digest(inputs.entitlements)?,
    ])
}

/// Convert special hashes from slot order to code directory storage order.
pub fn special_hashes_storage_order(mut hashes: Vec<Digest<'static>>) -> Vec<Digest<'static>> {
    hashes.reverse();
    hashes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_counts() {
        let data = vec![0x42u8; 4097];

        let hashes = compute_code_hashes(&data, 4096, DigestType::Sha1, Some(4096)).unwrap();
        assert_eq!(hashes.len(), 1);

        let hashes = compute_code_hashes(&data, 4097, DigestType::Sha1, Some(4096)).unwrap();
        assert_eq!(hashes.len(), 2);
        assert_eq!(
            hashes[1].to_vec(),
            DigestType::Sha1.digest_data(&[0x42]).unwrap()
        );

        let hashes = compute_code_hashes(&data, 100, DigestType::Sha256, Some(4096)).unwrap();
        assert_eq!(hashes.len(), 1);
        assert_eq!(hashes[0].len(), 32);

        assert!(matches!(
            compute_code_hashes(&data, 4098, DigestType::Sha1, Some(4096)),
            Err(AppleResignError::OffsetOutOfRange(_))
        ));
    }

    #[test]
    fn whole_image_page() {
        let data = vec![1u8; 10000];

        let hashes = paged_digests(&data, DigestType::Sha1, None).unwrap();
        assert_eq!(hashes.len(), 1);
        assert_eq!(
            hashes[0].to_vec(),
            DigestType::Sha1.digest_data(&data).unwrap()
        );
    }

    #[test]
    fn special_hash_order() {
        let inputs = SpecialHashInputs {
            info_plist: b"info",
            requirements: b"requirements",
            code_resources: b"",
            entitlements: b"entitlements",
        };

        let computed = compute_special_hashes(&inputs, DigestType::Sha1).unwrap();
        assert_eq!(computed.len(), 5);
        assert_eq!(
            computed[0].to_vec(),
            DigestType::Sha1.digest_data(b"info").unwrap()
        );
        // An empty resource file is still digested.
        assert_eq!(
            computed[2].to_vec(),
            hex::decode("da39a3ee5e6b4b0d3255bfef95601890afd80709").unwrap()
        );
        assert!(computed[3].is_null());
        assert_eq!(computed[3].len(), 20);
        assert_eq!(
            computed[4].to_vec(),
            DigestType::Sha1.digest_data(b"entitlements").unwrap()
        );

        let letters = ["A", "B", "C", "D", "E"]
            .iter()
            .map(|s| Digest::from(s.as_bytes().to_vec()))
            .collect::<Vec<_>>();
        let stored = special_hashes_storage_order(letters);
        assert_eq!(
            stored.iter().map(|d| d.to_vec()).collect::<Vec<_>>(),
            vec![b"E".to_vec(), b"D".to_vec(), b"C".to_vec(), b"B".to_vec(), b"A".to_vec()]
        );

        let stored = special_hashes_storage_order(computed.clone());
        assert_eq!(stored[0], computed[4]);
        assert_eq!(stored[4], computed[0]);
    }
}

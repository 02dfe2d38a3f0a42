// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Settings and collaborators for resigning.

use {
    crate::{embedded_signature::DigestType, error::AppleResignError},
    bcder::Oid,
    x509_certificate::{
        rfc4519::{OID_COMMON_NAME, OID_ORGANIZATIONAL_UNIT_NAME},
        CapturedX509Certificate,
    },
};

/// The name attributes of a signing certificate that end up in a signature.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SigningIdentity {
    /// Subject common name. Used by the designated requirement.
    pub common_name: String,
    /// Subject organizational unit, which is the Apple team identifier.
    pub team_id: Option<String>,
}

impl SigningIdentity {
    /// Extract the identity from a certificate's subject name.
    ///
    /// Returns `None` if the certificate has no common name. Attributes that
    /// fail to decode are errors.
    pub fn from_certificate(
        cert: &CapturedX509Certificate,
    ) -> Result<Option<Self>, AppleResignError> {
        let subject = cert.subject_name();

        let common_name = match subject
            .find_first_attribute_string(Oid(OID_COMMON_NAME.as_ref().into()))?
        {
            Some(name) => name,
            None => return Ok(None),
        };
        let team_id = subject
            .find_first_attribute_string(Oid(OID_ORGANIZATIONAL_UNIT_NAME.as_ref().into()))?;

        Ok(Some(Self {
            common_name,
            team_id,
        }))
    }
}

/// Produces detached signatures over code directories.
///
/// The output is embedded verbatim in the signature wrapper blob.
pub trait Signer {
    /// Sign `content`, producing an opaque signature.
    fn sign(
        &self,
        content: &[u8],
        certificates: &[CapturedX509Certificate],
    ) -> Result<Vec<u8>, AppleResignError>;
}

impl<F> Signer for F
where
    F: Fn(&[u8], &[CapturedX509Certificate]) -> Result<Vec<u8>, AppleResignError>,
{
    fn sign(
        &self,
        content: &[u8],
        certificates: &[CapturedX509Certificate],
    ) -> Result<Vec<u8>, AppleResignError> {
        self(content, certificates)
    }
}

/// Invoke a signer, normalizing its failures to [AppleResignError::SignerFailure].
///
/// An empty signature is a failure.
pub fn sign_checked(
    signer: &dyn Signer,
    content: &[u8],
    certificates: &[CapturedX509Certificate],
) -> Result<Vec<u8>, AppleResignError> {
    let signature = signer.sign(content, certificates).map_err(|e| match e {
        AppleResignError::SignerFailure(_) => e,
        e => AppleResignError::SignerFailure(e.to_string()),
    })?;

    if signature.is_empty() {
        return Err(AppleResignError::SignerFailure(
            "signer produced an empty signature".to_string(),
        ));
    }

    Ok(signature)
}

/// Represents settings for resigning a Mach-O binary.
///
/// Instances are constructed with [Default] and populated with setters.
#[derive(Clone, Debug, Default)]
pub struct ResignSettings {
    bundle_identifier: Option<String>,
    signing_identity: Option<SigningIdentity>,
    certificates: Vec<CapturedX509Certificate>,
    digest_type: DigestType,
    info_plist: Option<Vec<u8>>,
    code_resources: Option<Vec<u8>>,
    entitlements: Option<plist::Dictionary>,
}

impl ResignSettings {
    /// The identifier recorded in the code directory and designated requirement.
    pub fn bundle_identifier(&self) -> Option<&str> {
        self.bundle_identifier.as_deref()
    }

    pub fn set_bundle_identifier(&mut self, value: impl ToString) {
        self.bundle_identifier = Some(value.to_string());
    }

    /// Obtain the signing identity.
    ///
    /// An explicitly set identity wins. Otherwise it is derived from the leaf
    /// of the certificate chain.
    pub fn signing_identity(&self) -> Result<Option<SigningIdentity>, AppleResignError> {
        if let Some(identity) = &self.signing_identity {
            return Ok(Some(identity.clone()));
        }

        match self.signing_certificate() {
            Some(cert) => SigningIdentity::from_certificate(cert),
            None => Ok(None),
        }
    }

    pub fn set_signing_identity(&mut self, identity: SigningIdentity) {
        self.signing_identity = Some(identity);
    }

    /// The certificate chain handed to the signer, leaf last.
    pub fn certificates(&self) -> &[CapturedX509Certificate] {
        &self.certificates
    }

    /// The leaf certificate.
    pub fn signing_certificate(&self) -> Option<&CapturedX509Certificate> {
        self.certificates.last()
    }

    /// Set the certificate chain. The leaf certificate must be last.
    pub fn set_certificate_chain(&mut self, certificates: Vec<CapturedX509Certificate>) {
        self.certificates = certificates;
    }

    /// The digest used for code directory hashes.
    pub fn digest_type(&self) -> DigestType {
        self.digest_type
    }

    pub fn set_digest_type(&mut self, digest_type: DigestType) {
        self.digest_type = digest_type;
    }

    /// Info.plist content, digested into its special slot.
    pub fn info_plist(&self) -> Option<&[u8]> {
        self.info_plist.as_deref()
    }

    pub fn set_info_plist(&mut self, data: impl Into<Vec<u8>>) {
        self.info_plist = Some(data.into());
    }

    /// `CodeResources` content, digested into its special slot.
    pub fn code_resources(&self) -> Option<&[u8]> {
        self.code_resources.as_deref()
    }

    pub fn set_code_resources(&mut self, data: impl Into<Vec<u8>>) {
        self.code_resources = Some(data.into());
    }

    /// The entitlements dictionary to embed.
    pub fn entitlements(&self) -> Option<&plist::Dictionary> {
        self.entitlements.as_ref()
    }

    pub fn set_entitlements(&mut self, entitlements: plist::Dictionary) {
        self.entitlements = Some(entitlements);
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        x509_certificate::{KeyAlgorithm, X509CertificateBuilder},
    };

    fn development_certificate(team_id: Option<&str>) -> CapturedX509Certificate {
        let mut builder = X509CertificateBuilder::new(KeyAlgorithm::Ed25519);
        builder
            .subject()
            .append_common_name_utf8_string("Apple Development: Jo Dev (ABCDE12345)")
            .unwrap();
        if let Some(team_id) = team_id {
            builder
                .subject()
                .append_organizational_unit_utf8_string(team_id)
                .unwrap();
        }

        builder.create_with_random_keypair().unwrap().0
    }

    #[test]
    fn identity_from_certificate() {
        let cert = development_certificate(Some("ABCDE12345"));

        assert_eq!(
            SigningIdentity::from_certificate(&cert).unwrap(),
            Some(SigningIdentity {
                common_name: "Apple Development: Jo Dev (ABCDE12345)".into(),
                team_id: Some("ABCDE12345".into()),
            })
        );

        let cert = development_certificate(None);
        assert_eq!(
            SigningIdentity::from_certificate(&cert)
                .unwrap()
                .unwrap()
                .team_id,
            None
        );
    }

    #[test]
    fn undecodable_subject_name() {
        let cert = development_certificate(Some("ABCDE12345"));
        let cn = b"Apple Development: Jo Dev (ABCDE12345)";

        // Retag the UTF8String common name as an OCTET STRING.
        let mut der = cert.constructed_data().to_vec();
        let mut retagged = 0;
        for i in 2..der.len() - cn.len() {
            if &der[i..i + cn.len()] == cn && der[i - 2] == 0x0c && der[i - 1] as usize == cn.len()
            {
                der[i - 2] = 0x04;
                retagged += 1;
            }
        }
        assert!(retagged > 0);

        let cert = CapturedX509Certificate::from_der(der).unwrap();
        assert!(matches!(
            SigningIdentity::from_certificate(&cert),
            Err(AppleResignError::CertificateDecode(_))
        ));

        let mut settings = ResignSettings::default();
        settings.set_certificate_chain(vec![cert]);
        assert!(matches!(
            settings.signing_identity(),
            Err(AppleResignError::CertificateDecode(_))
        ));
    }

    #[test]
    fn settings_identity_resolution() {
        let mut settings = ResignSettings::default();
        assert_eq!(settings.digest_type(), DigestType::Sha1);
        assert!(settings.signing_identity().unwrap().is_none());

        let root = development_certificate(None);
        let leaf = development_certificate(Some("ABCDE12345"));
        settings.set_certificate_chain(vec![root, leaf]);
        assert_eq!(
            settings
                .signing_identity()
                .unwrap()
                .unwrap()
                .team_id
                .as_deref(),
            Some("ABCDE12345")
        );

        settings.set_signing_identity(SigningIdentity {
            common_name: "Explicit".into(),
            team_id: None,
        });
        assert_eq!(
            settings.signing_identity().unwrap().unwrap().common_name,
            "Explicit"
        );
    }

    #[test]
    fn signer_failures() {
        let failing = |_: &[u8], _: &[CapturedX509Certificate]| -> Result<Vec<u8>, AppleResignError> {
            Err(AppleResignError::OffsetOutOfRange("nope"))
        };
        assert!(matches!(
            sign_checked(&failing, b"content", &[]),
            Err(AppleResignError::SignerFailure(_))
        ));

        let empty = |_: &[u8], _: &[CapturedX509Certificate]| -> Result<Vec<u8>, AppleResignError> {
            Ok(vec![])
        };
        assert!(matches!(
            sign_checked(&empty, b"content", &[]),
            Err(AppleResignError::SignerFailure(_))
        ));

        let echo = |content: &[u8], _: &[CapturedX509Certificate]| -> Result<Vec<u8>, AppleResignError> {
            Ok(content.to_vec())
        };
        assert_eq!(sign_checked(&echo, b"content", &[]).unwrap(), b"content");
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Entitlements handling.

Entitlements come from a provisioning profile as a plist dictionary. The
copy embedded in a signature is that dictionary serialized as an XML plist,
minus `keychain-access-groups`, which platform tooling never embeds.
*/

use {
    crate::{embedded_signature::EntitlementsBlob, error::AppleResignError},
    plist::{Dictionary, Value},
};

/// Entitlement keys that are removed before embedding.
pub const STRIPPED_ENTITLEMENTS: &[&str] = &["keychain-access-groups"];

const APPLICATION_IDENTIFIER: &str = "application-identifier";
const TEAM_IDENTIFIER: &str = "com.apple.developer.team-identifier";

/// Parse an entitlements dictionary from an XML plist.
pub fn entitlements_from_xml(xml: &[u8]) -> Result<Dictionary, AppleResignError> {
    Value::from_reader_xml(xml)?
        .into_dictionary()
        .ok_or(AppleResignError::PlistNotDictionary("entitlements"))
}

/// Obtain the XML plist of entitlements as they should be embedded.
pub fn entitlements_xml(entitlements: &Dictionary) -> Result<Vec<u8>, AppleResignError> {
    let mut entitlements = entitlements.clone();

    for key in STRIPPED_ENTITLEMENTS {
        entitlements.remove(key);
    }

    let mut buffer = vec![];
    Value::Dictionary(entitlements).to_writer_xml(&mut buffer)?;

    Ok(buffer)
}

/// Build the entitlements blob for an entitlements dictionary.
pub fn entitlements_blob(entitlements: &Dictionary) -> Result<EntitlementsBlob, AppleResignError> {
    Ok(EntitlementsBlob {
        data: entitlements_xml(entitlements)?,
    })
}

/// Derive a bundle identifier from entitlements.
///
/// `application-identifier` is the team identifier, a dot, then the bundle
/// identifier. Returns `None` if either key is missing or they disagree.
pub fn bundle_identifier_from_entitlements(entitlements: &Dictionary) -> Option<String> {
    let application_id = entitlements.get(APPLICATION_IDENTIFIER)?.as_string()?;
    let team_id = entitlements.get(TEAM_IDENTIFIER)?.as_string()?;

    application_id
        .strip_prefix(team_id)?
        .strip_prefix('.')
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use {super::*, crate::embedded_signature::Blob};

    const ENTITLEMENTS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>application-identifier</key>
    <string>ABCDE12345.com.example.app</string>
    <key>com.apple.developer.team-identifier</key>
    <string>ABCDE12345</string>
    <key>get-task-allow</key>
    <true/>
    <key>keychain-access-groups</key>
    <array>
        <string>ABCDE12345.*</string>
    </array>
</dict>
</plist>"#;

    #[test]
    fn strips_keychain_access_groups() {
        let entitlements = entitlements_from_xml(ENTITLEMENTS_XML.as_bytes()).unwrap();
        assert!(entitlements.contains_key("keychain-access-groups"));

        let xml = entitlements_xml(&entitlements).unwrap();
        let s = String::from_utf8(xml.clone()).unwrap();
        assert!(s.starts_with("<?xml"));
        assert!(!s.contains("keychain-access-groups"));

        let embedded = entitlements_from_xml(&xml).unwrap();
        assert_eq!(
            embedded.keys().collect::<Vec<_>>(),
            vec![
                "application-identifier",
                "com.apple.developer.team-identifier",
                "get-task-allow"
            ]
        );
        assert_eq!(embedded.get("get-task-allow"), Some(&Value::Boolean(true)));

        // The caller's dictionary is untouched.
        assert!(entitlements.contains_key("keychain-access-groups"));

        let blob = entitlements_blob(&entitlements).unwrap();
        let data = blob.to_blob_bytes().unwrap();
        assert_eq!(&data[0..4], &[0xfa, 0xde, 0x71, 0x71]);
        assert_eq!(&data[8..], xml.as_slice());
    }

    #[test]
    fn not_a_dictionary() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<plist version="1.0"><array/></plist>"#;

        assert!(matches!(
            entitlements_from_xml(xml.as_bytes()),
            Err(AppleResignError::PlistNotDictionary(_))
        ));
    }

    #[test]
    fn bundle_identifier() {
        let entitlements = entitlements_from_xml(ENTITLEMENTS_XML.as_bytes()).unwrap();
        assert_eq!(
            bundle_identifier_from_entitlements(&entitlements),
            Some("com.example.app".to_string())
        );

        let mut mismatched = entitlements.clone();
        mismatched.insert(TEAM_IDENTIFIER.to_string(), Value::String("ZZZ".into()));
        assert_eq!(bundle_identifier_from_entitlements(&mismatched), None);

        let mut missing = entitlements;
        missing.remove(APPLICATION_IDENTIFIER);
        assert_eq!(bundle_identifier_from_entitlements(&missing), None);
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! `CodeResources` file handling.

A bundle's `_CodeSignature/CodeResources` is an XML plist sealing every
resource file. `files` maps a path to a SHA-1 digest, either directly as
`<data>` or as a dictionary holding a `hash` key when the file is optional.
`files2` maps a path to a dictionary with `hash` (SHA-1) and `hash2`
(SHA-256) keys.

When a file in the bundle is replaced, such as the embedded provisioning
profile, its seal must be updated before the digest of `CodeResources` is
recorded in a code directory.
*/

use {
    crate::{embedded_signature::DigestType, error::AppleResignError},
    plist::{Dictionary, Value},
};

/// A parsed `CodeResources` plist.
///
/// Keys we don't interpret are carried through unchanged.
#[derive(Clone, Debug, PartialEq)]
pub struct CodeResources {
    dict: Dictionary,
}

impl CodeResources {
    /// Construct an instance by parsing an XML plist.
    pub fn from_xml(xml: &[u8]) -> Result<Self, AppleResignError> {
        let dict = Value::from_reader_xml(xml)?
            .into_dictionary()
            .ok_or(AppleResignError::PlistNotDictionary("CodeResources"))?;

        Ok(Self { dict })
    }

    /// Obtain the SHA-1 digest recorded in `files` for a path.
    pub fn file_hash(&self, name: &str) -> Option<&[u8]> {
        match self.dict.get("files")?.as_dictionary()?.get(name)? {
            Value::Data(data) => Some(data.as_slice()),
            Value::Dictionary(entry) => entry.get("hash")?.as_data(),
            _ => None,
        }
    }

    /// Obtain the SHA-256 digest recorded in `files2` for a path.
    pub fn file_hash2(&self, name: &str) -> Option<&[u8]> {
        self.dict
            .get("files2")?
            .as_dictionary()?
            .get(name)?
            .as_dictionary()?
            .get("hash2")?
            .as_data()
    }

    /// Update the seal of an existing file to match new content.
    ///
    /// Only entries already present are updated. Returns whether any entry
    /// matched.
    pub fn update_file_hash(&mut self, name: &str, data: &[u8]) -> Result<bool, AppleResignError> {
        let sha1 = DigestType::Sha1.digest_data(data)?;
        let sha256 = DigestType::Sha256.digest_data(data)?;

        let mut updated = false;

        if let Some(entry) = self
            .dict
            .get_mut("files")
            .and_then(|files| files.as_dictionary_mut())
            .and_then(|files| files.get_mut(name))
        {
            match entry {
                Value::Dictionary(entry) => {
                    entry.insert("hash".to_string(), Value::Data(sha1.clone()));
                }
                entry => {
                    *entry = Value::Data(sha1.clone());
                }
            }

            updated = true;
        }

        if let Some(entry) = self
            .dict
            .get_mut("files2")
            .and_then(|files| files.as_dictionary_mut())
            .and_then(|files| files.get_mut(name))
            .and_then(|entry| entry.as_dictionary_mut())
        {
            entry.insert("hash".to_string(), Value::Data(sha1));
            entry.insert("hash2".to_string(), Value::Data(sha256));

            updated = true;
        }

        Ok(updated)
    }

    /// Serialize to an XML plist.
    pub fn to_xml(&self) -> Result<Vec<u8>, AppleResignError> {
        let mut buffer = vec![];
        Value::Dictionary(self.dict.clone()).to_writer_xml(&mut buffer)?;

        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESOURCES: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
  <dict>
    <key>files</key>
    <dict>
      <key>embedded.mobileprovision</key>
      <data>Y0SEPxyC6hCQ+rl4LTRmXy7F9DQ=</data>
      <key>en.lproj/InfoPlist.strings</key>
      <dict>
        <key>hash</key>
        <data>U8LTYe+cVqPcBu9aLvcyyfp+dAg=</data>
        <key>optional</key>
        <true/>
      </dict>
    </dict>
    <key>files2</key>
    <dict>
      <key>embedded.mobileprovision</key>
      <dict>
        <key>hash</key>
        <data>Y0SEPxyC6hCQ+rl4LTRmXy7F9DQ=</data>
        <key>hash2</key>
        <data>iMnDHpWkKTI6xLi9Av93eNuIhxXhv3C18D4fljCfw2Y=</data>
      </dict>
    </dict>
    <key>rules</key>
    <dict>
      <key>^.*</key>
      <true/>
    </dict>
  </dict>
</plist>"#;

    #[test]
    fn update_provisioning_profile_seal() {
        let mut resources = CodeResources::from_xml(RESOURCES.as_bytes()).unwrap();
        assert_eq!(
            resources.file_hash("embedded.mobileprovision"),
            Some(&hex::decode("6344843f1c82ea1090fab9782d34665f2ec5f434").unwrap()[..])
        );

        assert!(resources
            .update_file_hash("embedded.mobileprovision", b"abc")
            .unwrap());

        assert_eq!(
            resources.file_hash("embedded.mobileprovision"),
            Some(&hex::decode("a9993e364706816aba3e25717850c26c9cd0d89d").unwrap()[..])
        );
        assert_eq!(
            resources.file_hash2("embedded.mobileprovision"),
            Some(
                &hex::decode("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
                    .unwrap()[..]
            )
        );

        // Survives serialization, with untouched keys intact.
        let reparsed = CodeResources::from_xml(&resources.to_xml().unwrap()).unwrap();
        assert_eq!(reparsed, resources);
        assert!(reparsed.dict.contains_key("rules"));
    }

    #[test]
    fn optional_file_entry() {
        let mut resources = CodeResources::from_xml(RESOURCES.as_bytes()).unwrap();

        assert!(resources
            .update_file_hash("en.lproj/InfoPlist.strings", b"abc")
            .unwrap());
        assert_eq!(
            resources.file_hash("en.lproj/InfoPlist.strings"),
            Some(&hex::decode("a9993e364706816aba3e25717850c26c9cd0d89d").unwrap()[..])
        );
        assert_eq!(resources.file_hash2("en.lproj/InfoPlist.strings"), None);

        let entry = resources
            .dict
            .get("files")
            .and_then(|files| files.as_dictionary())
            .and_then(|files| files.get("en.lproj/InfoPlist.strings"))
            .and_then(|entry| entry.as_dictionary())
            .unwrap();
        assert_eq!(entry.get("optional"), Some(&Value::Boolean(true)));
    }

    #[test]
    fn missing_file() {
        let mut resources = CodeResources::from_xml(RESOURCES.as_bytes()).unwrap();
        let before = resources.clone();

        assert!(!resources.update_file_hash("MacOS/other", b"abc").unwrap());
        assert_eq!(resources, before);
        assert_eq!(resources.file_hash("MacOS/other"), None);
    }
}

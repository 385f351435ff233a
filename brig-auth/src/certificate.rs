//! Repository certificate decoding.

use sha2::{Digest, Sha256};
use x509_parser::prelude::{FromDer, X509Certificate};

use crate::Error;

/// The number of hex digits of an abbreviated fingerprint.
const ABBREV_FINGERPRINT_LEN: usize = 16;

/// A decoded repository certificate.
///
/// Only the identity the core needs is retained: the subject name and
/// organization, the validity period and the SHA-256 fingerprint of the
/// DER encoding. Signature verification proper is an external
/// collaborator's job.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Certificate {
    /// The full certificate fingerprint (upper-case hex SHA-256 of the
    /// DER encoding).
    pub fingerprint: String,
    /// The repository name prefix from the subject `CN` (with the
    /// `name:` prefix stripped).
    pub name: String,
    /// The subject organization.
    pub organization: String,
    /// The subject contact email, if present.
    pub email: Option<String>,
    /// The start of the validity period, in GMT.
    pub not_before: String,
    /// The end of the validity period, in GMT.
    pub not_after: String,
}

impl Certificate {
    /// Returns the abbreviated fingerprint used as the store key.
    pub fn abbreviated_fingerprint(&self) -> String {
        abbreviate_fingerprint(&self.fingerprint)
    }
}

/// Abbreviates a full fingerprint to its store-key form.
pub fn abbreviate_fingerprint(fingerprint: &str) -> String {
    fingerprint
        .chars()
        .take(ABBREV_FINGERPRINT_LEN)
        .collect()
}

/// Parses a PEM-encoded repository certificate and verifies that it is
/// within its validity period.
///
/// The certificate subject must carry `CN=name:<repository-name>` and
/// `O=<organization>`; `notBefore`/`notAfter` are normalized to GMT.
///
/// # Errors
///
/// Returns [`Error::UnparseableCertificate`] for decoding and subject
/// failures and [`Error::ExpiredCertificate`] when outside the validity
/// period.
pub fn parse_certificate(pem_text: &str) -> Result<Certificate, Error> {
    let pem = pem::parse(pem_text)
        .map_err(|e| Error::UnparseableCertificate(e.to_string()))?;
    if pem.tag() != "CERTIFICATE" {
        return Err(Error::UnparseableCertificate(format!(
            "unexpected PEM tag {}",
            pem.tag()
        )));
    }
    let der = pem.contents();
    let (_, x509) = X509Certificate::from_der(der)
        .map_err(|e| Error::UnparseableCertificate(e.to_string()))?;

    let subject = x509.subject();
    let common_name = subject
        .iter_common_name()
        .next()
        .and_then(|attr| attr.as_str().ok())
        .ok_or_else(|| Error::UnparseableCertificate("missing subject CN".to_string()))?;
    let name = common_name
        .strip_prefix("name:")
        .ok_or_else(|| {
            Error::UnparseableCertificate(format!(
                "subject CN '{common_name}' lacks the 'name:' prefix"
            ))
        })?
        .to_string();
    let organization = subject
        .iter_organization()
        .next()
        .and_then(|attr| attr.as_str().ok())
        .ok_or_else(|| Error::UnparseableCertificate("missing subject O".to_string()))?
        .to_string();
    let email = subject
        .iter_email()
        .next()
        .and_then(|attr| attr.as_str().ok())
        .map(ToString::to_string);

    if !x509.validity().is_valid() {
        return Err(Error::ExpiredCertificate { name });
    }

    Ok(Certificate {
        fingerprint: hex::encode_upper(Sha256::digest(der)),
        name,
        organization,
        email,
        not_before: x509.validity().not_before.to_string(),
        not_after: x509.validity().not_after.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn garbage_is_unparseable() {
        let err = parse_certificate("not a certificate").unwrap_err();
        assert!(matches!(err, Error::UnparseableCertificate(_)));
    }

    #[test]
    fn wrong_pem_tag_is_unparseable() {
        let pem = "-----BEGIN PUBLIC KEY-----\nAAAA\n-----END PUBLIC KEY-----\n";
        let err = parse_certificate(pem).unwrap_err();
        assert!(matches!(err, Error::UnparseableCertificate(_)));
    }

    #[test]
    fn fingerprint_abbreviation() {
        let certificate = Certificate {
            fingerprint: "0123456789ABCDEF0123456789ABCDEF".to_string(),
            name: "example.com".to_string(),
            organization: "Example".to_string(),
            email: None,
            not_before: String::new(),
            not_after: String::new(),
        };
        assert_eq!(certificate.abbreviated_fingerprint(), "0123456789ABCDEF");
    }
}

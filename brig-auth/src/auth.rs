//! The repository authentication flow.

use std::fs;

use brig_store::{CertificateRecord, Store};
use log::{debug, info};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{
    Certificate, Error,
    certificate::{abbreviate_fingerprint, parse_certificate},
    name_match::match_certificate_name,
};

/// Options controlling trust decisions.
#[derive(Clone, Debug, Default)]
pub struct AuthOptions {
    /// Fingerprints (full or abbreviated) to trust without prompting.
    pub trust: Vec<String>,
    /// Assume yes for all trust questions.
    pub trust_yes: bool,
    /// Assume no for all trust questions.
    pub trust_no: bool,
}

/// The interactive trust question callback.
///
/// Returns `true` if the user accepts the certificate.
pub type TrustPrompt<'a> = dyn Fn(&Certificate) -> bool + 'a;

/// Derives the canonical name of a repository from its location.
///
/// The scheme and the version path component (the first all-digit
/// component) are dropped:
/// `https://example.com/1/math` becomes `example.com/math`.
pub fn canonical_repository_name(location: &str) -> String {
    let location = location
        .split_once("://")
        .map_or(location, |(_, rest)| rest);
    let mut components: Vec<&str> = location
        .split('/')
        .filter(|c| !c.is_empty())
        .collect();
    if let Some(position) = components
        .iter()
        .skip(1)
        .position(|c| c.bytes().all(|b| b.is_ascii_digit()))
    {
        components.remove(position + 1);
    }
    components.join("/")
}

/// Returns the repository location prefix up to and including the
/// version component, used to key the placeholder certificate of an
/// unsigned repository.
pub fn location_prefix(location: &str) -> String {
    let Some((scheme, rest)) = location.split_once("://") else {
        return location.to_string();
    };
    let mut prefix = Vec::new();
    for component in rest.split('/') {
        let is_version = !prefix.is_empty()
            && !component.is_empty()
            && component.bytes().all(|b| b.is_ascii_digit());
        prefix.push(component);
        if is_version {
            break;
        }
    }
    format!("{scheme}://{}", prefix.join("/"))
}

/// Builds the placeholder certificate record of an unsigned
/// repository.
fn dummy_record(location: &str) -> CertificateRecord {
    let digest = Sha256::digest(location_prefix(location).as_bytes());
    CertificateRecord {
        fingerprint: abbreviate_fingerprint(&hex::encode_upper(digest)),
        name: canonical_repository_name(location),
        organization: String::new(),
        email: None,
        not_before: String::new(),
        not_after: String::new(),
        dummy: true,
    }
}

/// Converts a parsed certificate into its store record.
fn certificate_record(certificate: &Certificate) -> CertificateRecord {
    CertificateRecord {
        fingerprint: certificate.abbreviated_fingerprint(),
        name: certificate.name.clone(),
        organization: certificate.organization.clone(),
        email: certificate.email.clone(),
        not_before: certificate.not_before.clone(),
        not_after: certificate.not_after.clone(),
        dummy: false,
    }
}

/// Authenticates a repository and returns its certificate record.
///
/// For a signed repository (`cert_pem` present) the certificate is
/// decoded, its name matched against the repository canonical name and
/// the trust decision taken from (in order) the persisted store, the
/// `dependent_trust` fingerprint of an already-trusted dependent
/// repository, the `--trust` fingerprints, the `--trust-yes`/`--trust-no`
/// policy, and finally the interactive `prompt`. A newly trusted
/// certificate is persisted in the store and its PEM saved under the
/// workspace certificate directory.
///
/// For an unsigned repository a placeholder record keyed by the hash of
/// the location prefix is used, subject to the same policy.
///
/// # Errors
///
/// Returns the authentication failure kinds described in [`Error`].
pub fn authenticate_repository(
    store: &Store,
    config: Uuid,
    options: &AuthOptions,
    location: &str,
    cert_pem: Option<&str>,
    dependent_trust: Option<&str>,
    prompt: Option<&TrustPrompt>,
) -> Result<CertificateRecord, Error> {
    let canonical_name = canonical_repository_name(location);

    let Some(cert_pem) = cert_pem else {
        let record = dummy_record(location);
        if let Some(existing) = store.certificate(config, &record.fingerprint)? {
            debug!("unsigned repository {canonical_name} already authenticated");
            return Ok(existing);
        }
        if trusted_by_policy(options, None, dependent_trust, &record.fingerprint) {
            store.save_certificate(config, &record)?;
            info!("trusting unsigned repository {canonical_name}");
            return Ok(record);
        }
        return Err(Error::UntrustedRepository(canonical_name));
    };

    let certificate = parse_certificate(cert_pem)?;
    authenticate_certificate(
        store,
        config,
        options,
        &canonical_name,
        &certificate,
        cert_pem,
        dependent_trust,
        prompt,
    )
}

/// Authenticates an already-decoded certificate for a repository.
///
/// # Errors
///
/// See [`authenticate_repository`].
#[allow(clippy::too_many_arguments)]
pub fn authenticate_certificate(
    store: &Store,
    config: Uuid,
    options: &AuthOptions,
    canonical_name: &str,
    certificate: &Certificate,
    cert_pem: &str,
    dependent_trust: Option<&str>,
    prompt: Option<&TrustPrompt>,
) -> Result<CertificateRecord, Error> {
    if !match_certificate_name(&certificate.name, canonical_name) {
        return Err(Error::NameMismatch {
            name: certificate.name.clone(),
            repository: canonical_name.to_string(),
        });
    }

    let abbreviated = certificate.abbreviated_fingerprint();
    if let Some(existing) = store.certificate(config, &abbreviated)? {
        debug!("repository {canonical_name} already authenticated as {abbreviated}");
        return Ok(existing);
    }

    // --trust-no also answers the interactive question.
    let trusted = trusted_by_policy(
        options,
        Some(&certificate.fingerprint),
        dependent_trust,
        &abbreviated,
    ) || (!options.trust_no && prompt.is_some_and(|prompt| prompt(certificate)));

    if !trusted {
        return Err(Error::UntrustedRepository(canonical_name.to_string()));
    }

    let record = certificate_record(certificate);
    store.save_certificate(config, &record)?;

    let path = store
        .certificate_dir(config)?
        .join(format!("{abbreviated}.pem"));
    fs::write(&path, cert_pem).map_err(|source| Error::Io {
        context: format!("saving certificate to {}", path.display()),
        source,
    })?;
    info!("trusting repository {canonical_name} with certificate {abbreviated}");
    Ok(record)
}

/// Applies the non-interactive parts of the trust policy.
fn trusted_by_policy(
    options: &AuthOptions,
    full_fingerprint: Option<&str>,
    dependent_trust: Option<&str>,
    abbreviated: &str,
) -> bool {
    if options.trust_no {
        return false;
    }
    if options.trust_yes {
        return true;
    }
    if let Some(dependent) = dependent_trust {
        if dependent == abbreviated || Some(dependent) == full_fingerprint {
            return true;
        }
    }
    options.trust.iter().any(|trusted| {
        trusted == abbreviated || Some(trusted.as_str()) == full_fingerprint
    })
}

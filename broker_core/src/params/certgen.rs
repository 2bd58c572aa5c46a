//! X.509 certificate generation for the `generateCertificate` source.

use rand::RngCore;
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, Ia5String, IsCa, Issuer, KeyPair, KeyUsagePurpose,
    SanType, SerialNumber,
};
use time::{Duration, OffsetDateTime};

use crate::error::{ErrorKind, Result};
use crate::params::{CertUsage, GenerateCertificateSpec};

/// Parse the broker's `"DNS:<name>"` / `"EMAIL:<addr>"` SAN notation into the
/// `rcgen::SanType` values its certificate builder expects.
fn parse_sans(sans: &[String]) -> Result<Vec<SanType>> {
    sans.iter()
        .map(|s| {
            let (kind, value) = s
                .split_once(':')
                .ok_or_else(|| ErrorKind::ConfigurationError(format!("malformed SAN '{}', expected '<TYPE>:<value>'", s)))?;
            let ia5 = Ia5String::try_from(value.to_string())
                .map_err(|e| ErrorKind::ConfigurationError(format!("SAN value '{}' is not valid IA5 text: {}", value, e)))?;
            match kind {
                "DNS" => Ok(SanType::DnsName(ia5)),
                "EMAIL" => Ok(SanType::Rfc822Name(ia5)),
                other => Err(ErrorKind::ConfigurationError(format!("unsupported SAN type '{}', expected DNS or EMAIL", other)).into()),
            }
        })
        .collect()
}

/// Generate a certificate for `subject_key_pem` per `spec`, self-signed
/// unless `ca` (a `(key_pem, cert_pem)` pair) is supplied.
pub fn generate(subject_key_pem: &str, spec: &GenerateCertificateSpec, ca: Option<(&str, &str)>) -> Result<String> {
    let subject_key = KeyPair::from_pem(subject_key_pem).map_err(|e| ErrorKind::ConfigurationError(format!("invalid subject key for certificate generation: {}", e)))?;

    if matches!(subject_key.algorithm(), alg if alg == &rcgen::PKCS_ED25519) {
        return Err(ErrorKind::ConfigurationError("ed25519 keys cannot be used as certificate subject keys".into()).into());
    }

    let mut params = CertificateParams::default();
    params.subject_alt_names = parse_sans(&spec.sans)?;

    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, spec.common_name.clone());
    params.distinguished_name = dn;

    let now = OffsetDateTime::now_utc();
    params.not_before = now;
    params.not_after = now + Duration::seconds(spec.lifetime_seconds);

    let mut serial_bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut serial_bytes);
    params.serial_number = Some(SerialNumber::from_slice(&serial_bytes));

    match spec.usage {
        CertUsage::Ca => {
            params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
            params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
        }
        CertUsage::Server => {
            params.is_ca = IsCa::NoCa;
            params.key_usages = vec![KeyUsagePurpose::DigitalSignature, KeyUsagePurpose::KeyEncipherment];
            params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        }
        CertUsage::Client => {
            params.is_ca = IsCa::NoCa;
            params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
            params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
        }
    }

    let cert = match ca {
        None => params.self_signed(&subject_key).map_err(|e| ErrorKind::Internal(format!("self-signed certificate generation failed: {}", e)))?,
        Some((ca_key_pem, ca_cert_pem)) => {
            let ca_key = KeyPair::from_pem(ca_key_pem).map_err(|e| ErrorKind::ConfigurationError(format!("invalid ca key: {}", e)))?;
            let issuer = Issuer::from_ca_cert_pem(ca_cert_pem, ca_key).map_err(|e| ErrorKind::ConfigurationError(format!("invalid ca certificate: {}", e)))?;
            params.signed_by(&subject_key, &issuer).map_err(|e| ErrorKind::Internal(format!("ca-signed certificate generation failed: {}", e)))?
        }
    };

    Ok(cert.pem())
}

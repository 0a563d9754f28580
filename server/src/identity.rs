use rustls::{
    crypto::CryptoProvider,
    pki_types::{
        CertificateDer, PrivateKeyDer, PrivatePkcs1KeyDer, PrivatePkcs8KeyDer, PrivateSec1KeyDer,
    },
    RootCertStore,
};
use sslc_common::protocol::ResultCode;

use crate::fault::Fault;

/// Certificate and private key presented during mutual TLS
#[derive(Debug)]
pub struct ClientIdentity {
    pub certs: Vec<CertificateDer<'static>>,
    pub key:   PrivateKeyDer<'static>,
}

impl Clone for ClientIdentity {
    fn clone(&self) -> Self {
        Self {
            certs: self.certs.clone(),
            key:   self.key.clone_key(),
        }
    }
}

impl ClientIdentity {
    /// Build an identity from caller-supplied DER bytes, rejecting anything
    /// the crypto provider cannot load
    pub fn from_der(cert: &[u8], key: &[u8], provider: &CryptoProvider) -> Result<Self, Fault> {
        let cert = parse_certificate(cert)?;
        let key = parse_private_key(key, provider)?;
        Ok(Self {
            certs: vec![cert],
            key,
        })
    }
}

/// Check that `der` parses as an X.509 certificate
pub fn parse_certificate(der: &[u8]) -> Result<CertificateDer<'static>, Fault> {
    if der.is_empty() {
        return Err(Fault::invalid_argument("empty certificate"));
    }

    let cert = CertificateDer::from(der.to_vec());
    let mut scratch = RootCertStore::empty();
    scratch
        .add(cert.clone())
        .map_err(|e| Fault::new(ResultCode::CertFormat, format!("malformed certificate: {e}")))?;
    Ok(cert)
}

/// Accepts PKCS#8, SEC1 and PKCS#1 DER encodings
pub fn parse_private_key(
    der: &[u8],
    provider: &CryptoProvider,
) -> Result<PrivateKeyDer<'static>, Fault> {
    if der.is_empty() {
        return Err(Fault::invalid_argument("empty private key"));
    }

    let candidates = [
        PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(der.to_vec())),
        PrivateKeyDer::Sec1(PrivateSec1KeyDer::from(der.to_vec())),
        PrivateKeyDer::Pkcs1(PrivatePkcs1KeyDer::from(der.to_vec())),
    ];

    candidates
        .into_iter()
        .find(|key| provider.key_provider.load_private_key(key.clone_key()).is_ok())
        .ok_or_else(|| Fault::new(ResultCode::KeyFormat, "unsupported or malformed private key"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn garbage_certificate_is_a_format_error() {
        let fault = parse_certificate(&[0x30, 0x03, 0x02, 0x01, 0x00]).unwrap_err();
        assert_eq!(fault.code, ResultCode::CertFormat);
    }

    #[test]
    fn garbage_key_is_a_format_error() {
        let provider = rustls::crypto::aws_lc_rs::default_provider();
        let fault = parse_private_key(&[0xde, 0xad, 0xbe, 0xef], &provider).unwrap_err();
        assert_eq!(fault.code, ResultCode::KeyFormat);
    }

    #[test]
    fn empty_inputs_are_invalid_arguments() {
        let provider = rustls::crypto::aws_lc_rs::default_provider();
        assert_eq!(
            parse_certificate(&[]).unwrap_err().code,
            ResultCode::InvalidArgument
        );
        assert_eq!(
            parse_private_key(&[], &provider).unwrap_err().code,
            ResultCode::InvalidArgument
        );
    }
}

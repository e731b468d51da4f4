//! Demo identity generation for `pqecho generate-certs`.
//!
//! The server certificate is self-signed and doubles as the client's trust
//! anchor, so `ca.crt` is a copy of `srv.crt`.

use std::io::{Error, ErrorKind, Result};
use std::path::{Path, PathBuf};

use aws_lc_rs::digest;
use log::info;
use rcgen::{CertificateParams, DnType, KeyPair};

pub const SERVER_CERT_FILE: &str = "srv.crt";
pub const SERVER_KEY_FILE: &str = "srv.key";
pub const CA_CERT_FILE: &str = "ca.crt";

/// Names the demo certificate is valid for: the default server name and both
/// loopback addresses.
pub const DEFAULT_SUBJECT_ALT_NAMES: &[&str] = &["localhost", "127.0.0.1", "::1"];

pub struct GeneratedIdentity {
    pub cert_pem: String,
    pub key_pem: String,
    /// SHA-256 over the DER certificate, colon-separated hex.
    pub fingerprint: String,
}

pub struct WrittenIdentity {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    pub ca_cert_path: PathBuf,
    pub fingerprint: String,
}

/// ECDSA P-256 key and a self-signed certificate covering `subject_alt_names`.
/// IP literals become IP address SANs.
pub fn generate_identity<S: AsRef<str>>(subject_alt_names: &[S]) -> Result<GeneratedIdentity> {
    if subject_alt_names.is_empty() {
        return Err(Error::new(
            ErrorKind::InvalidInput,
            "at least one subject alternative name is required",
        ));
    }
    let names: Vec<String> = subject_alt_names
        .iter()
        .map(|s| s.as_ref().to_string())
        .collect();

    let key_pair = KeyPair::generate()
        .map_err(|e| Error::other(format!("failed to generate key pair: {e}")))?;
    let mut params = CertificateParams::new(names.clone()).map_err(|e| {
        Error::new(
            ErrorKind::InvalidInput,
            format!("invalid subject alternative names {names:?}: {e}"),
        )
    })?;
    params
        .distinguished_name
        .push(DnType::CommonName, names[0].clone());
    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| Error::other(format!("failed to sign certificate: {e}")))?;

    Ok(GeneratedIdentity {
        cert_pem: cert.pem(),
        key_pem: key_pair.serialize_pem(),
        fingerprint: sha256_fingerprint(cert.der()),
    })
}

pub fn sha256_fingerprint(der: &[u8]) -> String {
    digest::digest(&digest::SHA256, der)
        .as_ref()
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// Writes `srv.crt`, `srv.key` and `ca.crt` into `dir`, creating it if
/// needed. Existing files are not overwritten.
pub async fn write_demo_identity(dir: &Path) -> Result<WrittenIdentity> {
    let cert_path = dir.join(SERVER_CERT_FILE);
    let key_path = dir.join(SERVER_KEY_FILE);
    let ca_cert_path = dir.join(CA_CERT_FILE);

    for path in [&cert_path, &key_path, &ca_cert_path] {
        if tokio::fs::try_exists(path).await? {
            return Err(Error::new(
                ErrorKind::AlreadyExists,
                format!("{} already exists, refusing to overwrite", path.display()),
            ));
        }
    }

    let identity = generate_identity(DEFAULT_SUBJECT_ALT_NAMES)?;

    tokio::fs::create_dir_all(dir).await?;
    tokio::fs::write(&cert_path, &identity.cert_pem).await?;
    write_private_key(&key_path, &identity.key_pem).await?;
    tokio::fs::write(&ca_cert_path, &identity.cert_pem).await?;

    info!(
        "wrote {}, {} and {}",
        cert_path.display(),
        key_path.display(),
        ca_cert_path.display()
    );

    Ok(WrittenIdentity {
        cert_path,
        key_path,
        ca_cert_path,
        fingerprint: identity.fingerprint,
    })
}

#[cfg(unix)]
async fn write_private_key(path: &Path, pem: &str) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    tokio::fs::write(path, pem).await?;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await
}

#[cfg(not(unix))]
async fn write_private_key(path: &Path, pem: &str) -> Result<()> {
    tokio::fs::write(path, pem).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tls_context::TlsContext;

    #[test]
    fn test_fingerprint_format() {
        let fp = sha256_fingerprint(b"abc");
        assert_eq!(fp.len(), 32 * 3 - 1);
        assert!(fp.starts_with("BA:78:16:BF"));
    }

    #[test]
    fn test_generate_identity_requires_a_name() {
        let names: &[&str] = &[];
        let err = generate_identity(names).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_written_identity_loads_as_server_context() {
        let dir = tempfile::tempdir().unwrap();
        let cert_dir = dir.path().join("cert");
        let written = write_demo_identity(&cert_dir).await.unwrap();

        assert_eq!(
            std::fs::read(&written.cert_path).unwrap(),
            std::fs::read(&written.ca_cert_path).unwrap()
        );
        TlsContext::new_server(&written.cert_path, &written.key_path).unwrap();

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&written.key_path)
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[tokio::test]
    async fn test_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        write_demo_identity(dir.path()).await.unwrap();
        let err = write_demo_identity(dir.path()).await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    }
}

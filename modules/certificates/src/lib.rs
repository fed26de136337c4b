//! Trusted certificates from the system stores.
//!
//! On Linux a store is a directory of PEM or DER files; on macOS it is a
//! keychain dumped with `security find-certificate -a -p`. A file that also
//! carries a private key has its PEM export redacted.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use sha2::{Digest, Sha256};
use surface_core::platform::run_command;
use surface_core::{
    CertificateExport, CertificateObject, CollectContext, Collector, Emitter, RedactionReason, ResultType,
};
use tracing::{debug, info, warn};
use x509_parser::pem::Pem;
use x509_parser::prelude::*;

const LOCAL_MACHINE: &str = "LocalMachine";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreSource {
    Directory(PathBuf),
    Keychain(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertStore {
    pub location: String,
    pub name: String,
    pub source: StoreSource,
}

impl CertStore {
    pub fn directory(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self { location: LOCAL_MACHINE.to_string(), name: path.display().to_string(), source: StoreSource::Directory(path) }
    }

    pub fn keychain(name: &str, path: impl Into<PathBuf>) -> Self {
        Self { location: LOCAL_MACHINE.to_string(), name: name.to_string(), source: StoreSource::Keychain(path.into()) }
    }
}

#[derive(Debug, Clone)]
pub struct CertificatesCollector {
    stores: Vec<CertStore>,
}

impl Default for CertificatesCollector {
    fn default() -> Self {
        Self::new(Self::default_stores())
    }
}

impl CertificatesCollector {
    pub fn new(stores: Vec<CertStore>) -> Self {
        Self { stores }
    }

    pub fn default_stores() -> Vec<CertStore> {
        if cfg!(target_os = "macos") {
            vec![
                CertStore::keychain("System", "/Library/Keychains/System.keychain"),
                CertStore::keychain("SystemRoots", "/System/Library/Keychains/SystemRootCertificates.keychain"),
            ]
        } else {
            ["/etc/ssl/certs", "/usr/local/share/ca-certificates", "/etc/pki/tls/certs"]
                .into_iter()
                .filter(|p| Path::new(p).is_dir())
                .map(CertStore::directory)
                .collect()
        }
    }

    fn read_store(&self, store: &CertStore) -> Result<Vec<CertificateObject>> {
        match &store.source {
            StoreSource::Directory(dir) => {
                let mut out = Vec::new();
                let entries = fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))?;
                for entry in entries.flatten() {
                    let path = entry.path();
                    // fs::read follows the hash-named symlinks in /etc/ssl/certs
                    if !path.is_file() {
                        continue;
                    }
                    match fs::read(&path) {
                        Ok(bytes) => out.extend(parse_certificates(&bytes, &store.location, &store.name)),
                        Err(e) => debug!(path = %path.display(), error = %e, "unreadable certificate file"),
                    }
                }
                Ok(out)
            }
            StoreSource::Keychain(path) => {
                let keychain = path.to_string_lossy();
                let pem = run_command("security", &["find-certificate", "-a", "-p", &keychain])?;
                Ok(parse_certificates(pem.as_bytes(), &store.location, &store.name))
            }
        }
    }
}

impl Collector for CertificatesCollector {
    fn name(&self) -> &'static str {
        "certificates"
    }

    fn kind(&self) -> ResultType {
        ResultType::Certificate
    }

    fn can_run_on_platform(&self) -> bool {
        cfg!(any(target_os = "linux", target_os = "macos"))
    }

    fn collect(&self, ctx: &CollectContext<'_>, out: &mut Emitter<'_>) -> Result<()> {
        if self.stores.is_empty() {
            bail!("no certificate stores found");
        }
        for store in &self.stores {
            match self.read_store(store) {
                Ok(certs) => {
                    info!(run_id = ctx.run_id, store = %store.name, certificates = certs.len(), "read certificate store");
                    for c in certs {
                        out.emit(c);
                    }
                }
                Err(e) => warn!(store = %store.name, error = %e, "certificate store unreadable"),
            }
        }
        Ok(())
    }
}

/// Uppercase hex SHA-256 of the DER encoding.
pub fn certificate_hash(der: &[u8]) -> String {
    hex::encode_upper(Sha256::digest(der))
}

/// Re-wraps DER bytes as a PEM `CERTIFICATE` block with 64 column lines.
pub fn to_pem(der: &[u8]) -> String {
    let body = STANDARD.encode(der);
    let mut pem = String::from("-----BEGIN CERTIFICATE-----\n");
    for line in body.as_bytes().chunks(64) {
        pem.push_str(&String::from_utf8_lossy(line));
        pem.push('\n');
    }
    pem.push_str("-----END CERTIFICATE-----\n");
    pem
}

/// Parses every certificate in a PEM bundle or a single DER file.
pub fn parse_certificates(bytes: &[u8], location: &str, store: &str) -> Vec<CertificateObject> {
    let blocks: Vec<Pem> = Pem::iter_from_buffer(bytes).filter_map(|p| p.ok()).collect();
    if blocks.is_empty() {
        return match X509Certificate::from_der(bytes) {
            Ok(_) => vec![certificate_object(bytes, location, store, false)],
            Err(_) => Vec::new(),
        };
    }
    let has_private_key = blocks.iter().any(|b| b.label.ends_with("PRIVATE KEY"));
    blocks
        .iter()
        .filter(|b| b.label == "CERTIFICATE" || b.label == "TRUSTED CERTIFICATE")
        .map(|b| certificate_object(&b.contents, location, store, has_private_key))
        .collect()
}

fn certificate_object(der: &[u8], location: &str, store: &str, has_private_key: bool) -> CertificateObject {
    let hash = certificate_hash(der);
    match X509Certificate::from_der(der) {
        Ok((_, cert)) => CertificateObject {
            store_location: location.to_string(),
            store_name: store.to_string(),
            certificate_hash: hash,
            subject: cert.subject().to_string(),
            issuer: cert.issuer().to_string(),
            serial: Some(hex::encode_upper(cert.raw_serial())),
            not_before: Some(cert.validity().not_before.timestamp()),
            not_after: Some(cert.validity().not_after.timestamp()),
            pkcs12: if has_private_key {
                CertificateExport::Redacted { reason: RedactionReason::HasPrivateKey }
            } else {
                CertificateExport::Exported { pem: to_pem(der) }
            },
        },
        Err(e) => {
            debug!(hash = %hash, error = %e, "certificate did not parse");
            CertificateObject {
                store_location: location.to_string(),
                store_name: store.to_string(),
                certificate_hash: hash,
                subject: String::new(),
                issuer: String::new(),
                serial: None,
                not_before: None,
                not_after: None,
                pkcs12: CertificateExport::Failed { reason: e.to_string() },
            }
        }
    }
}

//! TLS certificate lifecycle: first-run self-signed certificate
//! generation and loading, per spec §6/§9 "TLS certificate lifecycle".

// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{os::unix::fs::PermissionsExt, path::Path};

use anyhow::{Context, Result};
use axum_server::tls_rustls::RustlsConfig;

/// Ensures `cert_path`/`key_path` exist, generating a self-signed
/// certificate (no expiry, TLS-server EKU, digital-signature usage) on
/// first run. Returns the loaded `RustlsConfig`.
pub async fn ensure_and_load(cert_path: &Path, key_path: &Path) -> Result<RustlsConfig> {
    if !cert_path.exists() || !key_path.exists() {
        generate_self_signed(cert_path, key_path)
            .context("failed to generate self-signed TLS certificate")?;
    }

    RustlsConfig::from_pem_file(cert_path, key_path)
        .await
        .with_context(|| format!("failed to load TLS material from {cert_path:?}/{key_path:?}"))
}

/// Generates the RSA self-signed certificate spec §6/§9 require: "RSA
/// high, self-signed, no expiry, digital-signature usage, TLS-server
/// EKU". `rcgen::generate_simple_self_signed` defaults to an ECDSA key
/// with no key-usage/EKU constraints, which doesn't match, so the
/// key pair and certificate parameters are built explicitly here.
fn generate_self_signed(cert_path: &Path, key_path: &Path) -> Result<()> {
    let key_pair = rcgen::KeyPair::generate_for(&rcgen::PKCS_RSA_SHA256)
        .context("rcgen failed to generate RSA key pair")?;

    let mut params = rcgen::CertificateParams::new(vec!["localhost".to_string()])
        .context("rcgen failed to build certificate parameters")?;
    params.key_usages = vec![rcgen::KeyUsagePurpose::DigitalSignature];
    params.extended_key_usages = vec![rcgen::ExtendedKeyUsagePurpose::ServerAuth];
    params.not_after = rcgen::date_time_ymd(9999, 1, 1);

    let cert = params
        .self_signed(&key_pair)
        .context("rcgen failed to self-sign certificate")?;

    if let Some(parent) = cert_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(cert_path, cert.pem())?;
    std::fs::write(key_path, key_pair.serialize_pem())?;
    std::fs::set_permissions(key_path, std::fs::Permissions::from_mode(0o600))?;

    Ok(())
}

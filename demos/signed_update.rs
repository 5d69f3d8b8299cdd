//! Signed update demonstration.
//!
//! This example admits an update archive only if its signature verifies,
//! then extracts it under a single directory:
//! 1. Sign a tar archive with an Ed25519 key
//! 2. Admit it through a policy that requires the signature check
//! 3. Show that a tampered archive never touches the disk
//!
//! Run with: `cargo run --example signed_update`

use std::net::{IpAddr, Ipv4Addr};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use ed25519_dalek::{Signer, SigningKey};
use policy_guard::{
    HashAlgorithm, Ownership, PolicyGuard, PolicySpec, Principal, RequestContext, ResourceRef,
    SafeExtractor, SignaturePolicy, SignedPayload,
};
use sha2::{Digest, Sha256};
use tar::{Builder, EntryType, Header};

fn build_archive() -> std::io::Result<Vec<u8>> {
    let mut builder = Builder::new(Vec::new());
    let files: [(&str, &[u8]); 2] = [
        ("bin/agent", b"#!/bin/sh\necho updated\n"),
        ("VERSION", b"2.4.1\n"),
    ];
    for (path, data) in files {
        let mut header = Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o755);
        header.set_entry_type(EntryType::Regular);
        builder.append_data(&mut header, path, data)?;
    }
    builder.into_inner()
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_target(true).init();
    println!("=== Signed Update Example ===\n");

    let signer = SigningKey::from_bytes(&[42u8; 32]);
    let workdir = tempfile::tempdir()?;
    let dest = workdir.path().join("current");

    let guard = PolicyGuard::builder()
        .signature(SignaturePolicy::new(signer.verifying_key(), HashAlgorithm::Sha256))
        .extractor(SafeExtractor::new(&dest))
        .policy(
            PolicySpec::new("apply_update")
                .require(Ownership)
                .require(SignedPayload),
        )
        .build()?;

    let archive = build_archive()?;
    let signature = STANDARD.encode(signer.sign(&Sha256::digest(&archive)).to_bytes());
    let request = |payload: Vec<u8>| {
        RequestContext::builder("req-update", IpAddr::V4(Ipv4Addr::new(198, 51, 100, 7)))
            .actor(Principal::user("ops-1", "Ops"))
            .target(ResourceRef::new("fleet-7", "ops-1"))
            .signed_payload(payload, signature.clone())
            .build()
    };

    println!("--- Tampered archive ---");
    let mut tampered = archive.clone();
    tampered[520] ^= 0x20;
    match guard.admit_archive("apply_update", &request(tampered)) {
        Ok(_) => println!("✗ tampered archive was admitted"),
        Err(denial) => println!("✓ refused: {denial}"),
    }
    println!("  destination exists: {}", dest.exists());

    println!("\n--- Signed archive ---");
    match guard.admit_archive("apply_update", &request(archive)) {
        Ok(report) => {
            println!("✓ extracted {} files ({} bytes)", report.files().len(), report.total_bytes());
            for file in report.files() {
                println!("  {}", report.root().join(file).display());
            }
        }
        Err(denial) => println!("✗ refused: {denial}"),
    }
    Ok(())
}

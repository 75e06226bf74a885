//! Key commands: show the instance public key, verify a signature offline.

use anyhow::{Context, Result};
use rssx_crypto::{PublicIdentity, SignatureEngine};
use rssx_protocol::canonical_string;

use crate::config::RssxConfig;

/// Arguments for `keys verify`
#[derive(Debug, Clone)]
pub struct VerifyArgs {
    pub timestamp: i64,
    pub author: String,
    pub content: String,
    /// Hex-encoded detached signature
    pub signature: String,
    /// PEM file with the signer's public key
    pub public_key: String,
}

/// Print the instance public key, creating the keypair on first use.
pub fn execute_keys_show(config_path: &str) -> Result<()> {
    let config = RssxConfig::load(config_path)?;
    let engine = SignatureEngine::load_or_generate(
        &config.node.private_key_file,
        &config.node.public_key_file,
    )
    .context("Failed to load instance keys")?;

    println!("🔑 Fingerprint: {}", engine.public_identity().fingerprint());
    println!();
    print!("{}", engine.public_key_pem());
    Ok(())
}

/// Check a detached signature; an invalid signature is an error.
pub fn execute_keys_verify(args: VerifyArgs) -> Result<()> {
    if verify_signature(&args)? {
        println!("✅ Signature is valid");
        Ok(())
    } else {
        anyhow::bail!("❌ Signature does not verify")
    }
}

fn verify_signature(args: &VerifyArgs) -> Result<bool> {
    let pem = std::fs::read_to_string(&args.public_key)
        .with_context(|| format!("Failed to read public key {}", args.public_key))?;
    let identity = PublicIdentity::from_pem(&pem).context("Invalid public key file")?;

    let canonical = canonical_string(args.timestamp, &args.author, &args.content);
    Ok(SignatureEngine::verify(&canonical, &args.signature, &identity))
}

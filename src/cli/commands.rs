// Keyvault — CLI Command Handlers
//
// Each function handles one CLI subcommand against a vault opened from the
// environment plus any scope flags. A CLI process exits right after its
// command, so expiry across invocations relies on the deadline recorded
// with each key: `get` purges a key past its deadline and `sweep` purges
// all of them.

use std::time::Duration;

use crate::config::VaultConfig;
use crate::enclave::{Algorithm, HashAlgorithm, KeyGenParams, KeyMaterial, KeyUsage, NamedCurve};
use crate::error::VaultError;
use crate::vault::{CreateKeyOptions, KeyVault};

use super::{AlgorithmArg, Cli, Commands};

/// Execute the parsed CLI command.
pub async fn execute(cli: Cli) -> Result<(), VaultError> {
    let config = resolve_config(&cli);
    let vault = KeyVault::open(&config)?;

    match cli.command {
        Commands::Create {
            name,
            algorithm,
            extractable,
            ttl,
        } => cmd_create(&vault, name, algorithm, extractable, ttl).await,
        Commands::Get { name } => cmd_get(&vault, &name).await,
        Commands::Delete { name } => cmd_delete(&vault, &name).await,
        Commands::List => cmd_list(&vault).await,
        Commands::Sweep => cmd_sweep(&vault).await,
    }
}

/// Environment first, then command-line flags.
fn resolve_config(cli: &Cli) -> VaultConfig {
    let mut config = VaultConfig::from_env();
    if let Some(dir) = &cli.data_dir {
        config = config.with_data_dir(dir);
    }
    if let Some(container) = &cli.container {
        config.container = container.clone();
    }
    if let Some(collection) = &cli.collection {
        config.collection = collection.clone();
    }
    config
}

fn params_for(algorithm: AlgorithmArg, extractable: bool) -> KeyGenParams {
    match algorithm {
        AlgorithmArg::EcdsaP256 => KeyGenParams::new(
            Algorithm::Ecdsa {
                named_curve: NamedCurve::P256,
            },
            extractable,
            vec![KeyUsage::Sign, KeyUsage::Verify],
        ),
        AlgorithmArg::EcdhP256 => KeyGenParams::new(
            Algorithm::Ecdh {
                named_curve: NamedCurve::P256,
            },
            extractable,
            vec![KeyUsage::DeriveKey, KeyUsage::DeriveBits],
        ),
        AlgorithmArg::HmacSha256 => KeyGenParams::new(
            Algorithm::Hmac {
                hash: HashAlgorithm::Sha256,
                length: None,
            },
            extractable,
            vec![KeyUsage::Sign, KeyUsage::Verify],
        ),
        AlgorithmArg::AesGcm256 => KeyGenParams::new(
            Algorithm::AesGcm { length: 256 },
            extractable,
            vec![KeyUsage::Encrypt, KeyUsage::Decrypt],
        ),
    }
}

/// Parse a TTL string such as "500ms", "30s", "5m", "1h" or "1d".
/// A bare number is taken as milliseconds.
pub fn parse_ttl(input: &str) -> Result<Duration, VaultError> {
    let input = input.trim();
    let split = input
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(input.len());
    let (num_str, unit) = input.split_at(split);

    let invalid = || VaultError::InvalidArgument(format!("Invalid TTL '{input}'"));
    let amount: u64 = num_str.parse().map_err(|_| invalid())?;

    let seconds = |factor: u64| {
        amount
            .checked_mul(factor)
            .map(Duration::from_secs)
            .ok_or_else(invalid)
    };

    match unit {
        "" | "ms" => Ok(Duration::from_millis(amount)),
        "s" => seconds(1),
        "m" => seconds(60),
        "h" => seconds(60 * 60),
        "d" => seconds(24 * 60 * 60),
        _ => Err(invalid()),
    }
}

/// Convert bytes to a lowercase hex string.
fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

// ─── Create ──────────────────────────────────────────────────────────────────

async fn cmd_create(
    vault: &KeyVault,
    name: String,
    algorithm: AlgorithmArg,
    extractable: bool,
    ttl: Option<String>,
) -> Result<(), VaultError> {
    let ttl = ttl.as_deref().map(parse_ttl).transpose()?;

    let mut options = CreateKeyOptions::new(name.clone()).params(params_for(algorithm, extractable));
    if let Some(ttl) = ttl {
        options = options.ttl(ttl);
    }

    let material = vault.create_key(options).await?;

    println!("✓ Key stored");
    println!("  Name:    {}", name);
    println!("  Key:     {}", material);
    match ttl.filter(|ttl| !ttl.is_zero()) {
        Some(ttl) => println!("  Expires: in {:?}", ttl),
        None => println!("  Expires: never"),
    }

    Ok(())
}

// ─── Read (Get, List) ────────────────────────────────────────────────────────

async fn cmd_get(vault: &KeyVault, name: &str) -> Result<(), VaultError> {
    let material = vault.fetch_key(name).await?;

    println!("Key details:\n");
    println!("  Name:      {}", name);
    println!("  Algorithm: {}", material.algorithm());
    println!("  Key:       {}", material);

    if let KeyMaterial::Pair(pair) = &material {
        if let Ok(point) = pair.public_key.export_raw() {
            println!("  Public:    {}", to_hex(&point));
        }
    }

    Ok(())
}

async fn cmd_list(vault: &KeyVault) -> Result<(), VaultError> {
    // Drop anything whose deadline passed since the last invocation.
    vault.restore_expiries().await?;
    let names = vault.list_key_names().await?;

    if names.is_empty() {
        println!("No keys stored yet.");
        println!("Create one with: keyvault create <name> [--ttl 5m]");
        return Ok(());
    }

    println!("Stored keys ({}):\n", names.len());
    for name in names {
        println!("  {}", name);
    }

    Ok(())
}

// ─── Delete, Sweep ───────────────────────────────────────────────────────────

async fn cmd_delete(vault: &KeyVault, name: &str) -> Result<(), VaultError> {
    match vault.delete_key(name).await {
        Ok(()) => {
            println!("✓ Key deleted: {}", name);
            Ok(())
        }
        Err(e) if e.is_not_found() => {
            println!("Key not found: {}", name);
            Ok(())
        }
        Err(e) => Err(e),
    }
}

async fn cmd_sweep(vault: &KeyVault) -> Result<(), VaultError> {
    let report = vault.restore_expiries().await?;
    println!("✓ Removed {} expired key(s)", report.purged);
    if report.scheduled > 0 {
        println!("  {} key(s) still pending expiry", report.scheduled);
    }
    Ok(())
}

// ─── Tests ───────────────────────────────────────────────────────────────────

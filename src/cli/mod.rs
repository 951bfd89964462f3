// Keyvault — CLI Module
//
// Command-line interface using clap derive macros.
// Subcommands: create, get, delete, list, sweep.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

pub use commands::{execute, parse_ttl};

/// Keyvault — persistent, non-extractable keys with optional expiry.
#[derive(Parser, Debug)]
#[command(name = "keyvault")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Directory holding container files (default: platform data dir).
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Container (database file) name.
    #[arg(long, global = true)]
    pub container: Option<String>,

    /// Collection (table) inside the container.
    #[arg(long, global = true)]
    pub collection: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate a key and store it under a name.
    Create {
        /// Name to store the key under. An existing key is replaced.
        name: String,

        /// Key algorithm.
        #[arg(long, value_enum, default_value_t = AlgorithmArg::EcdsaP256)]
        algorithm: AlgorithmArg,

        /// Allow the private or secret key bytes to be exported.
        #[arg(long, default_value = "false")]
        extractable: bool,

        /// Remove the key after this long (e.g., "500ms", "30s", "5m", "1h", "1d").
        #[arg(long)]
        ttl: Option<String>,
    },

    /// Show a stored key (metadata and public key only).
    Get {
        /// The key name.
        name: String,
    },

    /// Delete a stored key.
    Delete {
        /// The key name.
        name: String,
    },

    /// List stored key names.
    List,

    /// Remove keys whose expiry has passed.
    Sweep,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum AlgorithmArg {
    /// ECDSA on P-256, sign/verify.
    EcdsaP256,
    /// ECDH on P-256, deriveKey/deriveBits.
    EcdhP256,
    /// HMAC with SHA-256, sign/verify.
    HmacSha256,
    /// AES-256-GCM, encrypt/decrypt.
    AesGcm256,
}

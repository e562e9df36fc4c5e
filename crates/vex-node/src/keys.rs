//! Validator key file.
//!
//! The key is stored as a hex-encoded 32-byte ed25519 seed. A missing file is
//! created with a fresh key on first start.

use anyhow::Context;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use vex_core::KeyProvider;
use vex_crypto::{CryptoError, Keypair};
use vex_types::{Block, Ed25519PublicKey};

/// Signing key backed by a seed file.
pub struct FileKeyProvider {
    keypair: Keypair,
    path: PathBuf,
}

impl FileKeyProvider {
    /// Load the key at `path`, generating and saving one if the file does not exist.
    pub fn load_or_generate(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            return Self::load(path);
        }

        let keypair = Keypair::generate();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create key directory '{}'", parent.display()))?;
            }
        }
        let mut file = create_private(path)
            .with_context(|| format!("Failed to create validator key '{}'", path.display()))?;
        file.write_all(keypair.to_seed_hex().as_bytes())
            .and_then(|()| file.sync_all())
            .with_context(|| format!("Failed to write validator key '{}'", path.display()))?;

        tracing::info!(address = %keypair.address(), path = %path.display(), "Generated validator key");
        Ok(Self {
            keypair,
            path: path.to_path_buf(),
        })
    }

    /// Load an existing key.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let seed = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read validator key '{}'", path.display()))?;
        let keypair = Keypair::from_seed_hex(&seed)
            .with_context(|| format!("Invalid validator key '{}'", path.display()))?;
        Ok(Self {
            keypair,
            path: path.to_path_buf(),
        })
    }

    pub fn keypair(&self) -> &Keypair {
        &self.keypair
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KeyProvider for FileKeyProvider {
    fn public_key(&self) -> Ed25519PublicKey {
        self.keypair.public_key()
    }

    fn sign_block(&self, block: &mut Block) -> Result<(), CryptoError> {
        self.keypair.sign_block(block)
    }
}

/// Create a new file readable by the owner only. Fails if it already exists.
fn create_private(path: &Path) -> std::io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)
}

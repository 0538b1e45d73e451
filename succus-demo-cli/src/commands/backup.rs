//! Backup and restore commands for identity keypairs

use std::path::Path;

use anyhow::{Context, Result};
use succus_lib::{
    Address, KeyBackup, KeyPair, MemoryGraph, Messenger, ProtocolConfig, SeaSuite, StaticWallet,
};

use crate::ui;

/// Use `password` when given, otherwise prompt for one.
pub fn resolve_password(password: Option<&str>, confirm: bool) -> Result<String> {
    if let Some(password) = password {
        return Ok(password.to_string());
    }

    let password =
        rpassword::prompt_password("Enter backup password: ").context("Failed to read password")?;
    if password.is_empty() {
        anyhow::bail!("Password cannot be empty");
    }
    if confirm {
        let password_confirm = rpassword::prompt_password("Confirm password: ")
            .context("Failed to read password confirmation")?;
        if password != password_confirm {
            anyhow::bail!("Passwords do not match");
        }
    }
    Ok(password)
}

/// Encrypt `keypair` and write the backup to `output`.
pub fn export(
    keypair: &KeyPair,
    address: Option<&str>,
    output: &Path,
    password: Option<&str>,
    verbose: bool,
) -> Result<()> {
    let password = resolve_password(password, true)?;
    if verbose {
        ui::info("Creating encrypted backup...");
    }

    let address = address.map(Address::from);
    let backup = KeyBackup::export(keypair, address.as_ref(), &password)?;
    std::fs::write(output, backup.to_json()?)
        .with_context(|| format!("Failed to write backup to {}", output.display()))?;

    ui::success(&format!("Backup saved to: {}", output.display()));
    ui::key_value("epub (for verification)", &ui::fingerprint(&backup.public_keys.epub));
    ui::separator();
    ui::warning("Store this backup securely and remember your password!");
    ui::warning("Without the password, the backup cannot be restored.");
    Ok(())
}

fn read_backup(input: &Path) -> Result<KeyBackup> {
    let json = std::fs::read_to_string(input)
        .with_context(|| format!("Failed to read backup file: {}", input.display()))?;
    KeyBackup::from_json(&json).context("Backup file is not valid")
}

/// Read and decrypt a backup file.
pub fn load(input: &Path, password: Option<&str>) -> Result<KeyPair> {
    let backup = read_backup(input)?;
    let password = resolve_password(password, false)?;
    Ok(backup.import(&password)?)
}

/// Restore a backup and publish its public keys again.
pub async fn import(
    config: ProtocolConfig,
    input: &Path,
    address: Option<&str>,
    password: Option<&str>,
    verbose: bool,
) -> Result<()> {
    ui::header("Restore Keypair from Backup");

    let backup = read_backup(input)?;
    if verbose {
        ui::info(&format!("Backup version: {}", backup.version));
    }

    let address = match (address, &backup.address) {
        (Some(address), _) => address.to_string(),
        (None, Some(address)) => address.to_string(),
        (None, None) => anyhow::bail!("Backup has no address; pass --address"),
    };
    let password = resolve_password(password, false)?;

    let messenger = Messenger::new(MemoryGraph::new(), SeaSuite::new(), config);
    let session = messenger
        .restore(&StaticWallet::new(address.as_str()), &backup, &password)
        .await?;

    ui::success("Backup decrypted successfully!");
    ui::key_value("Address", session.address.as_str());
    ui::key_value("epub", &ui::fingerprint(&session.keypair.epub));
    if messenger.directory().has(&session.address).await {
        ui::success("Public keys registered");
    } else {
        ui::warning("Public keys were not registered");
    }
    messenger.logout(session);
    Ok(())
}

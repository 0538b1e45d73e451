//! Keygen command - generate an identity keypair

use std::path::Path;

use anyhow::Result;
use succus_lib::{CryptoSuite, SeaSuite};

use crate::ui;

pub struct KeygenOptions<'a> {
    pub output: Option<&'a Path>,
    pub address: Option<&'a str>,
    pub password: Option<&'a str>,
}

pub fn run(options: KeygenOptions<'_>, verbose: bool) -> Result<()> {
    let keypair = SeaSuite::new().pair()?;

    ui::header("Generated Keypair");
    ui::key_value("pub", &keypair.pub_key);
    ui::key_value("epub", &keypair.epub);

    match options.output {
        Some(path) => {
            super::backup::export(&keypair, options.address, path, options.password, verbose)?;
        }
        None => {
            ui::info("Private keys discarded; pass --output to keep an encrypted backup");
        }
    }

    if verbose {
        ui::json(&serde_json::to_value(keypair.public_keys())?);
    }
    Ok(())
}

use anyhow::{Context, Result};
use phylomix_chain::base::TokenReader;
use phylomix_chain::chain::checkpoint::read_header;
use phylomix_chain::chain::{ResumeOptions, TraceLikelihood};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

pub fn show_header(checkpoint: &Path, json: bool) -> Result<()> {
    let file = File::open(checkpoint)
        .with_context(|| format!("Failed to open checkpoint {}", checkpoint.display()))?;
    let mut tokens = TokenReader::new(BufReader::new(file));
    // Runtime-only settings play no part in what the header says.
    let options = ResumeOptions::new(TraceLikelihood::Cached);
    let header = read_header(&mut tokens, &options).context("Failed to read checkpoint header")?;

    if json {
        let text = serde_json::to_string_pretty(&header.config)
            .context("Failed to encode configuration")?;
        println!("{text}");
        return Ok(());
    }

    println!("\n📊 Checkpoint Information");
    println!("{}", "=".repeat(50));
    println!("{header}");
    Ok(())
}

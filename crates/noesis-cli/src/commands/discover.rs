//! Related-note discovery.

use std::path::PathBuf;
use std::sync::Arc;

use noesis_discovery::{DocumentSource, FsVault};

use crate::context::AppContext;
use crate::host::CliHost;

/// Print notes related to `note`, or to the most recently modified note.
pub async fn run(ctx: &AppContext, note: Option<PathBuf>) -> anyhow::Result<()> {
    let Some(root) = ctx.vault_root().cloned() else {
        anyhow::bail!("No vault configured. Set general.vault_path or pass --vault PATH.");
    };

    let note = match note {
        Some(note) => note,
        None => latest_note(&FsVault::new(&root)).await?,
    };

    let host = Arc::new(CliHost::new(root, Some(note)));
    let registry = ctx.connect().await;
    let engine = ctx.engine(registry.clone(), host);

    // The host prints the result at the "cursor", which is stdout.
    let result = engine.discover_related_to_active().await;

    registry.disconnect_all().await;
    result?;
    Ok(())
}

async fn latest_note(vault: &FsVault) -> anyhow::Result<PathBuf> {
    let documents = vault.list_documents().await?;
    documents
        .into_iter()
        .max_by_key(|d| d.modified)
        .map(|d| PathBuf::from(d.path))
        .ok_or_else(|| anyhow::anyhow!("The vault at {} has no notes", vault.root().display()))
}

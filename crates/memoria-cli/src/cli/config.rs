//! Configuration commands. These run without opening the store or loading
//! the embedding model.

use std::path::Path;

use anyhow::{Context, Result};
use comfy_table::{presets, Cell, Color, ContentArrangement, Table};
use console::style;

use memoria_infra::config::load_memory_config;
use memoria_types::config::MemoryConfig;

fn on_off(flag: bool) -> Cell {
    if flag {
        Cell::new("enabled").fg(Color::Green)
    } else {
        Cell::new("disabled").fg(Color::DarkGrey)
    }
}

fn settings_rows(config: &MemoryConfig) -> Vec<(&'static str, Cell)> {
    vec![
        ("memory", on_off(config.enabled)),
        ("store.backend", Cell::new(format!("{:?}", config.store.backend).to_lowercase())),
        ("store.uri", Cell::new(&config.store.uri)),
        ("store.collection", Cell::new(&config.store.collection)),
        ("store.dimension", Cell::new(config.store.dimension)),
        ("embedding.model", Cell::new(config.embedding.model.as_str())),
        ("retrieval.limit", Cell::new(config.default_retrieval_limit)),
        (
            "retrieval.threshold",
            Cell::new(format!("{:.2}", config.default_similarity_threshold)),
        ),
        (
            "deduplication.threshold",
            Cell::new(format!("{:.2}", config.deduplication.threshold)),
        ),
        ("extraction", on_off(config.extraction.enabled)),
        ("extraction.model", Cell::new(&config.extraction.model)),
        ("extraction.batch_size", Cell::new(config.extraction.batch_size)),
        ("query_rewrite", on_off(config.query_rewrite.enabled)),
        ("query_rewrite.model", Cell::new(&config.query_rewrite.model)),
    ]
}

/// Validate the config file and print the effective settings.
pub async fn check(path: &Path, json: bool) -> Result<()> {
    let config = load_memory_config(path)
        .await
        .with_context(|| format!("Invalid configuration in {}", path.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let exists = tokio::fs::try_exists(path).await.unwrap_or(false);
    println!();
    println!(
        "  {} {}{}",
        style("✓").green(),
        style(path.display()).cyan(),
        if exists { "" } else { " (not found, using defaults)" }
    );
    println!();

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Setting").fg(Color::White),
        Cell::new("Value").fg(Color::White),
    ]);
    for (name, value) in settings_rows(&config) {
        table.add_row(vec![Cell::new(name).fg(Color::DarkGrey), value]);
    }
    println!("{table}");

    if config.dedup_threshold_overlaps_retrieval() {
        println!();
        println!(
            "  {} deduplication.threshold is not above the retrieval threshold; related memories will be merged",
            style("!").yellow().bold()
        );
    }
    println!();
    Ok(())
}

pub fn path(path: &Path, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::json!({"config_path": path}));
    } else {
        println!("{}", path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_rows_cover_each_section() {
        let rows = settings_rows(&MemoryConfig::default());
        let names: Vec<&str> = rows.iter().map(|(n, _)| *n).collect();
        for section in ["store.backend", "embedding.model", "extraction", "query_rewrite"] {
            assert!(names.contains(&section), "missing {section}");
        }
    }

    #[tokio::test]
    async fn test_check_accepts_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        check(&dir.path().join("memoria.toml"), true).await.unwrap();
    }

    #[tokio::test]
    async fn test_check_rejects_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memoria.toml");
        tokio::fs::write(&path, "enabled = \"sometimes\"").await.unwrap();
        assert!(check(&path, true).await.is_err());
    }
}

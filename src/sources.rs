use anyhow::Result;

use crate::config::Config;
use crate::db;

pub async fn list_sources(config: &Config) -> Result<()> {
    let mut entries: Vec<(&str, String, String)> = Vec::new();
    for s in &config.sources.guides {
        entries.push(("guide", s.name.clone(), s.root_url.clone()));
    }
    for s in &config.sources.statutes {
        entries.push(("statute", s.name.clone(), s.toc_url.clone()));
    }
    for s in &config.sources.ipgs {
        entries.push(("ipg", s.name.clone(), s.index_url.clone()));
    }
    for s in &config.sources.files {
        entries.push(("file", s.name.clone(), s.root.display().to_string()));
    }

    if entries.is_empty() {
        println!("No sources configured.");
        return Ok(());
    }

    let pool = db::connect(config).await?;

    // The DB may not have been initialized yet
    let have_documents: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='documents'",
    )
    .fetch_one(&pool)
    .await?;

    println!("{:<8} {:<20} {:<60} DOCS", "KIND", "NAME", "ROOT");
    for (kind, name, root) in &entries {
        let count: i64 = if have_documents {
            sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE source = ?")
                .bind(name)
                .fetch_one(&pool)
                .await?
        } else {
            0
        };
        println!("{:<8} {:<20} {:<60} {}", kind, name, root, count);
    }

    pool.close().await;
    Ok(())
}

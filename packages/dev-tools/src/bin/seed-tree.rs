//! Development seeder for a local classification tree
//!
//! Opens (or creates) a libsql database, seeds the default subjects with
//! their grade levels, applies the built-in chapter templates beneath the
//! matching subjects, then prints tree statistics as JSON.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin seed-tree -- ./data/classtree.db
//!
//! # Or via environment
//! CLASSTREE_DB=./data/classtree.db cargo run --bin seed-tree
//! ```
//!
//! Seeding is skipped when the database already holds nodes, so the tool is
//! safe to re-run.

use classtree_core::db::{MemoryItemStore, TursoBackend};
use classtree_core::utils::init_tracing;
use classtree_core::{BuiltinTemplate, TreeService};
use std::path::PathBuf;
use std::sync::Arc;

const DEFAULT_DB_PATH: &str = "./classtree.db";

/// Subject each built-in template is applied beneath
fn subject_for(template: BuiltinTemplate) -> &'static str {
    match template {
        BuiltinTemplate::MathHighSchool => "Mathematics",
        BuiltinTemplate::PhysicsHighSchool => "Physics",
        BuiltinTemplate::ChemistryHighSchool => "Chemistry",
    }
}

fn database_path() -> PathBuf {
    std::env::args()
        .nth(1)
        .or_else(|| std::env::var("CLASSTREE_DB").ok())
        .unwrap_or_else(|| DEFAULT_DB_PATH.to_string())
        .into()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing("seed_tree=info,classtree_core=info");

    let db_path = database_path();
    tracing::info!(path = %db_path.display(), "Opening tree database");
    let backend = Arc::new(TursoBackend::new(db_path).await?);
    let service = TreeService::new(backend.clone(), backend, Arc::new(MemoryItemStore::new()));

    if service.create_default_structure().await? {
        let roots = service.get_tree_roots().await?;
        for template in BuiltinTemplate::ALL {
            let Some(subject) = roots.iter().find(|root| root.name == subject_for(template)) else {
                tracing::warn!(template = %template, "No matching subject; skipping template");
                continue;
            };
            let chapters = service
                .apply_builtin_template(template.name(), Some(subject.id))
                .await?;
            tracing::info!(
                template = %template,
                subject = %subject.name,
                chapters = chapters.len(),
                "Applied template"
            );
        }
    } else {
        tracing::info!("Tree already populated; skipping seed");
    }

    let violations = service.validate_structure().await?;
    for violation in &violations {
        tracing::warn!(%violation, "Structural problem");
    }

    let stats = service.tree_statistics().await?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

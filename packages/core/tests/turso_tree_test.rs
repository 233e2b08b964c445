//! TreeService over the libsql backend
//!
//! Tests cover:
//! - Structural edits persisted across reopen
//! - Cascade subtree deletes inside one transaction
//! - History rows surviving reopen, newest first
//! - Cache rebuilt from the database on a fresh service

use anyhow::Result;
use classtree_core::db::{MemoryItemStore, TursoBackend};
use classtree_core::{
    ErrorKind, HistoryAction, HistoryQuery, Level, NewNode, NodeUpdate, TreeConfig, TreeService,
};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

/// Helper to open a service on a database file inside `dir`
async fn open_service(dir: &Path) -> Result<(TreeService, Arc<MemoryItemStore>)> {
    let backend = Arc::new(TursoBackend::new(dir.join("tree.db")).await?);
    let items = Arc::new(MemoryItemStore::new());
    let service = TreeService::with_config(
        backend.clone(),
        backend,
        items.clone(),
        TreeConfig {
            changed_by: "turso-test".to_string(),
            ..Default::default()
        },
    )?;
    Ok((service, items))
}

#[tokio::test]
async fn test_edits_survive_reopen() -> Result<()> {
    let temp_dir = TempDir::new()?;

    let (math_id, algebra_id) = {
        let (service, _items) = open_service(temp_dir.path()).await?;
        let math = service
            .create_node(NewNode::new("Math", Level::Subject).with_description("Numbers"))
            .await?;
        let grade = service
            .create_node(NewNode::new("Grade 10", Level::Grade).with_parent(math.id))
            .await?;
        let algebra = service
            .create_node(NewNode::new("Algebra", Level::Chapter).with_parent(math.id))
            .await?;
        service.move_node(algebra.id, Some(grade.id)).await?;
        service
            .update_node(algebra.id, NodeUpdate::new().with_name("Algebra I"))
            .await?;
        (math.id, algebra.id)
    };

    let (service, _items) = open_service(temp_dir.path()).await?;
    let algebra = service.get_node(algebra_id).await?.unwrap();
    assert_eq!(algebra.name, "Algebra I");
    assert_eq!(algebra.level, Level::Chapter);
    assert_eq!(
        service.get_path_string(algebra_id).await?,
        "Math > Grade 10 > Algebra I"
    );
    assert_eq!(service.depth(algebra_id).await?, 2);
    assert_eq!(service.cache().descendant_count(math_id).await?, 2);

    let history = service
        .history(HistoryQuery::new().for_node(algebra_id))
        .await?;
    let actions: Vec<HistoryAction> = history.iter().map(|e| e.action).collect();
    assert_eq!(
        actions,
        vec![HistoryAction::Update, HistoryAction::Move, HistoryAction::Create]
    );
    assert!(history.iter().all(|e| e.changed_by == "turso-test"));
    Ok(())
}

#[tokio::test]
async fn test_cascade_delete_and_template_on_disk() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let (service, items) = open_service(temp_dir.path()).await?;

    let physics = service
        .create_node(NewNode::new("Physics", Level::Subject))
        .await?;
    let chapters = service
        .apply_builtin_template("physics_high_school", Some(physics.id))
        .await?;
    assert_eq!(chapters.len(), 2);
    assert_eq!(service.get_descendants(physics.id, None).await?.len(), 6);

    let mechanics = &chapters[0];
    let dynamics = service.get_children(Some(mechanics.id)).await?[0].clone();
    items.file_item("q1", dynamics.id).await;

    let err = service.delete_node(mechanics.id, false).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let outcome = service.delete_node(mechanics.id, true).await?;
    assert_eq!(outcome.removed.len(), 3);
    assert_eq!(outcome.items_reassigned_to, Some(physics.id));
    assert_eq!(items.items_at(physics.id).await, vec!["q1"]);
    assert_eq!(service.question_count(physics.id).await?, 1);

    // A fresh service over the same file sees the same tree
    let (reopened, _items) = open_service(temp_dir.path()).await?;
    assert_eq!(reopened.get_descendants(physics.id, None).await?.len(), 3);
    assert!(reopened.get_node(dynamics.id).await?.is_none());
    assert!(reopened.validate_structure().await?.is_empty());
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use docsync::memory::{MemoryRepository, MemoryStore, ROOT_ID};
    use docsync::{
        LocalStore, RemoteRepository, SyncConfig, SyncEngine, SyncError, SyncOutcome,
    };

    async fn connected(
        repo: &Arc<MemoryRepository>,
    ) -> anyhow::Result<SyncEngine<MemoryRepository, MemoryStore>> {
        let mut engine =
            SyncEngine::new(Arc::clone(repo), MemoryStore::new(), SyncConfig::default())?;
        engine.connect().await?;
        Ok(engine)
    }

    #[tokio::test]
    async fn test_create_document_pushes_then_mirrors() -> anyhow::Result<()> {
        let repo = Arc::new(MemoryRepository::new());
        repo.add_folder("f1", "a", ROOT_ID);
        let mut engine = connected(&repo).await?;

        let node = engine
            .create_document("/a", "report.txt", Some("text/plain"))
            .await?;
        assert_eq!(node.path, "/a/report.txt");
        // remote side has it too
        assert!(repo.object(&node.remote_id).await.is_ok());
        // the mirror already reflects the acknowledged state, so the push
        // shows up as a creation in the next change-log pass elsewhere, not
        // here
        assert!(engine.store().node_at("/a/report.txt")?.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_create_conflict_adopts_existing_object() -> anyhow::Result<()> {
        let repo = Arc::new(MemoryRepository::new());
        repo.add_folder("f1", "a", ROOT_ID);
        let mut engine = connected(&repo).await?;

        // someone else (or an interrupted earlier push) created it first
        repo.add_document("d9", "report.txt", &["f1"]);
        let node = engine.create_document("/a", "report.txt", None).await?;
        assert_eq!(node.remote_id, "d9");
        assert!(engine.store().node_at("/a/report.txt")?.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_update_moves_and_renames() -> anyhow::Result<()> {
        let repo = Arc::new(MemoryRepository::new());
        repo.add_folder("f1", "a", ROOT_ID);
        repo.add_folder("f2", "b", ROOT_ID);
        repo.add_document("d1", "doc.txt", &["f1"]);
        let mut engine = connected(&repo).await?;

        let node = engine
            .update("/a/doc.txt", "/b", "renamed.txt")
            .await?
            .expect("the repository applied a change");
        assert_eq!(node.path, "/b/renamed.txt");
        assert!(engine.store().node_at("/a/doc.txt")?.is_none());

        // pushing the same state again is a no-op
        let again = engine.update("/b/renamed.txt", "/b", "renamed.txt").await?;
        assert!(again.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_update_content_refreshes_size() -> anyhow::Result<()> {
        let repo = Arc::new(MemoryRepository::new());
        repo.add_folder("f1", "a", ROOT_ID);
        repo.add_document("d1", "doc.txt", &["f1"]);
        let mut engine = connected(&repo).await?;

        let node = engine.update_content("/a/doc.txt", None, 2048).await?;
        assert_eq!(node.size, Some(2048));
        Ok(())
    }

    #[tokio::test]
    async fn test_copy_creates_an_independent_mirror() -> anyhow::Result<()> {
        let repo = Arc::new(MemoryRepository::new());
        repo.add_folder("f1", "a", ROOT_ID);
        repo.add_folder("f2", "b", ROOT_ID);
        repo.add_document("d1", "doc.txt", &["f1"]);
        let mut engine = connected(&repo).await?;

        let copy = engine.copy("/a/doc.txt", "/b", "copy.txt").await?;
        assert_eq!(copy.path, "/b/copy.txt");
        assert_ne!(copy.remote_id, "d1");
        assert!(engine.store().node_at("/a/doc.txt")?.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_remove_deletes_remote_and_mirror() -> anyhow::Result<()> {
        let repo = Arc::new(MemoryRepository::new());
        repo.add_folder("f1", "a", ROOT_ID);
        repo.add_document("d1", "doc.txt", &["f1"]);
        let mut engine = connected(&repo).await?;

        engine.remove("/a/doc.txt").await?;
        assert!(engine.store().node_at("/a/doc.txt")?.is_none());
        assert!(matches!(
            repo.object("d1").await,
            Err(SyncError::NotFound(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_trash_is_not_supported() -> anyhow::Result<()> {
        let repo = Arc::new(MemoryRepository::new());
        repo.add_folder("f1", "a", ROOT_ID);
        let mut engine = connected(&repo).await?;

        assert!(matches!(
            engine.trash("/a").await,
            Err(SyncError::Unsupported(_))
        ));
        assert!(matches!(
            engine.untrash("/a").await,
            Err(SyncError::Unsupported(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_push_forces_traversal_on_next_sync() -> anyhow::Result<()> {
        let repo = Arc::new(MemoryRepository::new());
        repo.add_folder("f1", "a", ROOT_ID);
        let mut engine = connected(&repo).await?;

        repo.set_fail_writes(true);
        let err = engine.create_document("/a", "doc.txt", None).await;
        assert!(matches!(err, Err(SyncError::Transport(_))));
        repo.set_fail_writes(false);

        // the repair pass traverses even though the change log works
        repo.add_document("d1", "doc.txt", &["f1"]);
        let report = engine.sync().await?;
        assert_eq!(report.outcome, SyncOutcome::Traversal);
        assert!(engine.store().node_at("/a/doc.txt")?.is_some());

        // the flag resets once the repair pass committed
        repo.add_document("d2", "more.txt", &["f1"]);
        let report = engine.sync().await?;
        assert_eq!(report.outcome, SyncOutcome::ChangeLog);
        Ok(())
    }

    #[tokio::test]
    async fn test_restore_drops_unfiled_and_creates_missing_filings() -> anyhow::Result<()> {
        let repo = Arc::new(MemoryRepository::new());
        repo.add_folder("f1", "a", ROOT_ID);
        repo.add_folder("f2", "b", ROOT_ID);
        repo.add_document("d1", "shared.txt", &["f1", "f2"]);
        let mut engine = connected(&repo).await?;

        // remotely re-filed under "b" only while the mirror was damaged
        repo.set_parents("d1", &["f2"]);
        engine.restore("d1", "/a/shared.txt").await?;
        assert!(engine.store().node_at("/a/shared.txt")?.is_none());
        assert!(engine.store().node_at("/b/shared.txt")?.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_restore_of_a_folder_fetches_its_subtree() -> anyhow::Result<()> {
        let repo = Arc::new(MemoryRepository::new());
        let mut engine = connected(&repo).await?;

        // created remotely after connect, so no local mirror exists yet
        repo.add_folder("f1", "a", ROOT_ID);
        repo.add_folder("f2", "b", "f1");
        repo.add_document("d1", "deep.txt", &["f2"]);

        engine.restore("f1", "/a").await?;
        assert!(engine.store().node_at("/a")?.is_some());
        assert!(engine.store().node_at("/a/b/deep.txt")?.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_restore_of_a_vanished_object_removes_the_mirror() -> anyhow::Result<()> {
        let repo = Arc::new(MemoryRepository::new());
        repo.add_folder("f1", "a", ROOT_ID);
        repo.add_document("d1", "doc.txt", &["f1"]);
        let mut engine = connected(&repo).await?;

        repo.remove_object("d1");
        engine.restore("d1", "/a/doc.txt").await?;
        assert!(engine.store().node_at("/a/doc.txt")?.is_none());
        Ok(())
    }
}

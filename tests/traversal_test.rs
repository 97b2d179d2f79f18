#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use docsync::memory::{MemoryRepository, MemoryStore, ROOT_ID};
    use docsync::{LocalStore, SyncConfig, SyncEngine, SyncOutcome};

    async fn connected(
        repo: &Arc<MemoryRepository>,
    ) -> anyhow::Result<SyncEngine<MemoryRepository, MemoryStore>> {
        let mut engine =
            SyncEngine::new(Arc::clone(repo), MemoryStore::new(), SyncConfig::default())?;
        engine.connect().await?;
        Ok(engine)
    }

    #[tokio::test]
    async fn test_traversal_used_without_change_log() -> anyhow::Result<()> {
        let repo = Arc::new(MemoryRepository::new());
        repo.set_change_log_supported(false);
        repo.add_folder("f1", "a", ROOT_ID);
        let mut engine = connected(&repo).await?;

        repo.add_document("d1", "doc.txt", &["f1"]);
        let report = engine.sync().await?;
        assert_eq!(report.outcome, SyncOutcome::Traversal);
        assert!(engine.store().node_at("/a/doc.txt")?.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_traversal_mirrors_nested_additions() -> anyhow::Result<()> {
        let repo = Arc::new(MemoryRepository::new());
        repo.set_change_log_supported(false);
        let mut engine = connected(&repo).await?;

        repo.add_folder("f1", "a", ROOT_ID);
        repo.add_folder("f2", "b", "f1");
        repo.add_folder("f3", "c", "f2");
        repo.add_document("d1", "deep.txt", &["f3"]);

        let report = engine.sync().await?;
        assert_eq!(report.outcome, SyncOutcome::Traversal);
        assert_eq!(report.stats.created, 4);
        assert!(engine.store().node_at("/a/b/c/deep.txt")?.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_traversal_removes_leftovers() -> anyhow::Result<()> {
        let repo = Arc::new(MemoryRepository::new());
        repo.set_change_log_supported(false);
        repo.add_folder("f1", "a", ROOT_ID);
        repo.add_folder("f2", "b", "f1");
        repo.add_document("d1", "doc.txt", &["f2"]);
        repo.add_document("d2", "other.txt", &[ROOT_ID]);
        let mut engine = connected(&repo).await?;

        // whole subtree gone remotely; the local copy is now a leftover
        repo.remove_object("f1");
        let report = engine.sync().await?;
        assert_eq!(report.outcome, SyncOutcome::Traversal);
        assert!(engine.store().node_at("/a")?.is_none());
        assert!(engine.store().node_at("/a/b/doc.txt")?.is_none());
        assert!(engine.store().node_at("/other.txt")?.is_some());
        // the subtree counts as one removal, not one per node
        assert_eq!(report.stats.removed, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_traversal_keeps_multifiled_filings() -> anyhow::Result<()> {
        let repo = Arc::new(MemoryRepository::new());
        repo.set_change_log_supported(false);
        repo.add_folder("f1", "a", ROOT_ID);
        repo.add_folder("f2", "b", ROOT_ID);
        repo.add_document("d1", "shared.txt", &["f1", "f2"]);
        let mut engine = connected(&repo).await?;

        // an unrelated change forces a pass; both filings must survive it
        repo.add_document("d2", "noise.txt", &[ROOT_ID]);
        engine.sync().await?;
        assert!(engine.store().node_at("/a/shared.txt")?.is_some());
        assert!(engine.store().node_at("/b/shared.txt")?.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_traversal_applies_backward_timestamp_change() -> anyhow::Result<()> {
        let repo = Arc::new(MemoryRepository::new());
        repo.set_change_log_supported(false);
        repo.add_folder("f1", "a", ROOT_ID);
        repo.add_document("d1", "doc.txt", &["f1"]);
        let mut engine = connected(&repo).await?;

        // restoring an old version moves the modification time backward
        let earlier = chrono::Utc::now() - chrono::Duration::days(7);
        repo.touch("d1", earlier);
        let report = engine.sync().await?;
        assert_eq!(report.outcome, SyncOutcome::Traversal);
        let node = engine.store().node_at("/a/doc.txt")?.expect("mirror");
        assert_eq!(node.modified, earlier);
        Ok(())
    }

    #[tokio::test]
    async fn test_cancelled_sync_reports_cleanly() -> anyhow::Result<()> {
        let repo = Arc::new(MemoryRepository::new());
        repo.set_change_log_supported(false);
        repo.add_folder("f1", "a", ROOT_ID);
        let mut engine = connected(&repo).await?;
        let commits = engine.store().commit_count();

        repo.add_document("d1", "doc.txt", &["f1"]);
        engine.cancellation().cancel();
        let report = engine.sync().await?;
        assert_eq!(report.outcome, SyncOutcome::Cancelled);
        assert_eq!(engine.store().commit_count(), commits);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use docsync::memory::{MemoryRepository, MemoryStore, ROOT_ID};
    use docsync::{
        read_position, LocalStore, RemoteRepository, SyncConfig, SyncEngine, SyncOutcome,
        PROP_DRIVE_ID, ROOT_PATH,
    };

    fn engine_over(
        repo: Arc<MemoryRepository>,
    ) -> SyncEngine<MemoryRepository, MemoryStore> {
        SyncEngine::new(repo, MemoryStore::new(), SyncConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_connect_fetches_whole_tree() -> anyhow::Result<()> {
        let repo = Arc::new(MemoryRepository::new());
        repo.add_folder("f1", "projects", ROOT_ID);
        repo.add_folder("f2", "alpha", "f1");
        repo.add_document("d1", "readme.md", &["f1"]);
        repo.add_document("d2", "notes.txt", &["f2"]);

        let token_before = repo.current_token().await?;
        let mut engine = engine_over(Arc::clone(&repo));
        let report = engine.connect().await?;
        assert_eq!(report.outcome, SyncOutcome::Connected);
        assert_eq!(report.stats.created, 4);

        let store = engine.store();
        assert!(store.node_at("/projects")?.is_some());
        assert!(store.node_at("/projects/alpha")?.is_some());
        assert!(store.node_at("/projects/readme.md")?.is_some());
        assert!(store.node_at("/projects/alpha/notes.txt")?.is_some());

        // drive identity and starting position are committed
        assert_eq!(
            store.get_property(ROOT_PATH, PROP_DRIVE_ID)?.as_deref(),
            Some(ROOT_ID)
        );
        // the committed position is the token read before listing began
        let position = read_position(store)?.expect("position committed");
        assert_eq!(position.token, token_before);

        // each mirror carries its object's token as of the fetch
        let doc = store.node_at("/projects/readme.md")?.unwrap();
        let remote = repo.object("d1").await?;
        assert_eq!(doc.change_token.as_ref(), Some(&remote.change_token));

        // nothing changed since the fetch, so the next pass is a no-op
        let report = engine.sync().await?;
        assert_eq!(report.outcome, SyncOutcome::NoChanges);
        Ok(())
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() -> anyhow::Result<()> {
        let repo = Arc::new(MemoryRepository::new());
        repo.add_folder("f1", "a", ROOT_ID);
        repo.add_document("d1", "b.txt", &["f1"]);

        let mut engine = engine_over(Arc::clone(&repo));
        engine.connect().await?;
        let first: Vec<String> = engine.store().paths();
        let position = read_position(engine.store())?.expect("position committed");

        let report = engine.connect().await?;
        assert_eq!(report.outcome, SyncOutcome::Connected);
        // nothing new to create or update on the retry
        assert_eq!(report.stats.created, 0);
        assert_eq!(report.stats.updated, 0);
        assert_eq!(engine.store().paths(), first);
        // the committed token does not move either
        let retried = read_position(engine.store())?.expect("position still committed");
        assert_eq!(retried.token, position.token);
        Ok(())
    }

    #[tokio::test]
    async fn test_cancelled_connect_commits_nothing() -> anyhow::Result<()> {
        let repo = Arc::new(MemoryRepository::new());
        repo.add_folder("f1", "a", ROOT_ID);

        let mut engine = engine_over(Arc::clone(&repo));
        engine.cancellation().cancel();
        let report = engine.connect().await?;
        assert_eq!(report.outcome, SyncOutcome::Cancelled);
        assert!(read_position(engine.store())?.is_none());
        assert_eq!(engine.store().commit_count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_multifiled_document_mirrors_under_each_parent() -> anyhow::Result<()> {
        let repo = Arc::new(MemoryRepository::new());
        repo.add_folder("f1", "a", ROOT_ID);
        repo.add_folder("f2", "b", ROOT_ID);
        repo.add_document("d1", "shared.txt", &["f1", "f2"]);

        let mut engine = engine_over(Arc::clone(&repo));
        engine.connect().await?;

        let store = engine.store();
        let first = store.node_at("/a/shared.txt")?.expect("filing under a");
        let second = store.node_at("/b/shared.txt")?.expect("filing under b");
        assert_eq!(first.remote_id, "d1");
        assert_eq!(second.remote_id, "d1");
        Ok(())
    }
}

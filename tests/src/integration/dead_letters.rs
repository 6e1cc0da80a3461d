//! # Dead Letters
//!
//! Undeliverable envelopes land in the dead-letter file as JSON lines; the
//! file rotates once it reaches its size bound.

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use service_bus::config::{DEADLETTER_MAX_FILES_KEY, DEADLETTER_MAX_FILE_SIZE_KEY};
    use service_bus::dead_letter::rotated_path;
    use shared_types::{Envelope, Route};

    use crate::fixtures::{props, TestBus};

    fn lines(path: &Path) -> Vec<Envelope> {
        fs::read_to_string(path)
            .unwrap_or_default()
            .lines()
            .map(|l| Envelope::from_json_line(l).unwrap())
            .collect()
    }

    fn to_ghost() -> Envelope {
        Envelope::document().with_route(Route::new("svc.Ghost", "op"))
    }

    #[tokio::test]
    async fn test_unknown_service_dead_lettered() {
        let t = TestBus::start(&[]).await;
        let envelope = to_ghost();
        let id = envelope.id;

        assert!(!t.bus.send(envelope).await);
        t.bus.flush_dead_letters().await;

        let dead = lines(&t.bus.dead_letter_path().unwrap());
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].id, id);
        assert!(dead[0].route.as_ref().unwrap().routed);
    }

    #[tokio::test]
    async fn test_client_without_router_dead_lettered() {
        let t = TestBus::start(&[]).await;

        assert!(!t.bus.send_with_client(Envelope::document(), "C1").await);
        t.bus.flush_dead_letters().await;

        let dead = lines(&t.bus.dead_letter_path().unwrap());
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].client.as_deref(), Some("C1"));
    }

    #[tokio::test]
    async fn test_rotation_keeps_max_files() {
        let mut extra = props(DEADLETTER_MAX_FILE_SIZE_KEY, "1");
        extra.insert(DEADLETTER_MAX_FILES_KEY.to_string(), "2".to_string());
        let t = TestBus::start_with(&[], extra).await;

        let mut ids = Vec::new();
        for _ in 0..5 {
            let envelope = to_ghost();
            ids.push(envelope.id);
            t.bus.send(envelope).await;
        }
        t.bus.flush_dead_letters().await;

        let path = t.bus.dead_letter_path().unwrap();
        // One record per file: newest active, then .1 and .2.
        assert_eq!(lines(&path)[0].id, ids[4]);
        assert_eq!(lines(&rotated_path(&path, 1))[0].id, ids[3]);
        assert_eq!(lines(&rotated_path(&path, 2))[0].id, ids[2]);
        assert!(!rotated_path(&path, 3).exists());
    }

    #[tokio::test]
    async fn test_dead_letters_survive_restart() {
        let t = TestBus::start(&[]).await;
        t.bus.send(to_ghost()).await;
        t.bus.shutdown().await.unwrap();

        t.bus
            .start(TestBus::properties(&t.dir, Default::default()))
            .await
            .unwrap();
        t.bus.send(to_ghost()).await;
        t.bus.flush_dead_letters().await;

        assert_eq!(lines(&t.bus.dead_letter_path().unwrap()).len(), 2);
    }
}

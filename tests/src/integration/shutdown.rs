//! # Shutdown
//!
//! Immediate and graceful bus shutdown with running services.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use service_bus::{BusError, BusStatus};
    use shared_types::Properties;

    use crate::fixtures::{props, StatusLog, TestBus, HANG_KEY};

    #[tokio::test]
    async fn test_shutdown_stops_everything() {
        let t = TestBus::start(&["svc.A", "svc.B"]).await;
        t.start_services(&["svc.A", "svc.B"]).await;
        let log = Arc::new(StatusLog::default());
        t.bus.register_status_listener(&log);

        t.bus.shutdown().await.unwrap();

        assert_eq!(t.bus.status(), BusStatus::Stopped);
        assert_eq!(log.seen(), vec![BusStatus::Stopping, BusStatus::Stopped]);
        assert!(t.bus.service_reports().is_empty());
        assert!(t.bus.dead_letter_path().is_none());
    }

    #[tokio::test]
    async fn test_graceful_shutdown_completes() {
        let t = TestBus::start(&["svc.A", "svc.B"]).await;
        t.start_services(&["svc.A", "svc.B"]).await;

        let report = t.bus.graceful_shutdown().await.unwrap();

        assert!(!report.is_degraded());
        let mut completed = report.completed.clone();
        completed.sort();
        assert_eq!(completed, vec!["svc.A", "svc.B"]);
        assert_eq!(t.bus.status(), BusStatus::Stopped);
    }

    #[tokio::test]
    async fn test_graceful_shutdown_forces_hung_service() {
        let t = TestBus::start(&["svc.A", "svc.Hung"]).await;
        t.bus.register_default("svc.A", Properties::new()).unwrap();
        t.bus
            .register_default("svc.Hung", props(HANG_KEY, "true"))
            .unwrap();
        t.bus.start_service("svc.A");
        t.bus.start_service("svc.Hung");
        assert!(
            crate::fixtures::eventually(|| t.bus.is_running("svc.A") && t.bus.is_running("svc.Hung"))
                .await
        );

        let started = Instant::now();
        let report = t.bus.graceful_shutdown().await.unwrap();

        // graceful timeout is one second in the fixtures
        assert!(started.elapsed() >= Duration::from_secs(1));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(report.is_degraded());
        assert_eq!(report.completed, vec!["svc.A"]);
        assert_eq!(report.forced, vec!["svc.Hung"]);
        assert!(report.transport_ok);
        assert_eq!(t.bus.status(), BusStatus::Stopped);
    }

    #[tokio::test]
    async fn test_graceful_shutdown_requires_running() {
        let t = TestBus::start(&[]).await;
        t.bus.shutdown().await.unwrap();

        assert!(matches!(
            t.bus.graceful_shutdown().await,
            Err(BusError::InvalidState(BusStatus::Stopped))
        ));
    }
}

//! # Bus Lifecycle
//!
//! Start, registration with dependencies, and status aggregation across
//! several services.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use service_bus::{BusStatus, RegistrationError, ServiceBus};
    use shared_types::{Properties, ServiceStatus};
    use tempfile::TempDir;

    use crate::fixtures::{catalog, eventually, Journal, ServiceWatch, StatusLog, TestBus};

    #[tokio::test]
    async fn test_start_walks_through_starting() {
        let dir = TempDir::new().unwrap();
        let bus = ServiceBus::with_catalog(catalog(&Journal::default(), &["svc.A"]));
        let log = Arc::new(StatusLog::default());
        bus.register_status_listener(&log);

        assert_eq!(bus.status(), BusStatus::Stopped);
        bus.start(TestBus::properties(&dir, Properties::new()))
            .await
            .unwrap();

        assert_eq!(bus.status(), BusStatus::Running);
        assert_eq!(log.seen(), vec![BusStatus::Starting, BusStatus::Running]);
        assert_eq!(
            bus.dead_letter_path(),
            Some(dir.path().join("deadLetter.json"))
        );
    }

    #[tokio::test]
    async fn test_register_start_and_query() {
        let t = TestBus::start(&["svc.A"]).await;

        t.bus
            .register_service("svc.A", "svc.A", Properties::new())
            .unwrap();
        assert!(t.bus.is_registered("svc.A"));
        assert!(!t.bus.is_running("svc.A"));

        assert!(t.bus.start_service("svc.A"));
        assert!(eventually(|| t.bus.is_running("svc.A")).await);
        assert_eq!(t.bus.running_services(), vec!["svc.A".to_string()]);
        assert!(eventually(|| t.bus.service_status("svc.A") == Some(ServiceStatus::Running)).await);
    }

    #[tokio::test]
    async fn test_service_watch_follows_one_service() {
        let t = TestBus::start(&["svc.A", "svc.B"]).await;
        t.bus.register_default("svc.A", Properties::new()).unwrap();
        t.bus.register_default("svc.B", Properties::new()).unwrap();
        let watch = Arc::new(ServiceWatch::default());
        assert!(t.bus.register_service_status_observer("svc.A", &watch));

        t.start_services(&["svc.A", "svc.B"]).await;
        assert!(eventually(|| !watch.seen().is_empty()).await);
        assert_eq!(watch.seen(), vec![("svc.A".to_string(), ServiceStatus::Running)]);

        assert!(t.bus.stop_service("svc.A", false));
        assert!(eventually(|| watch.seen().len() == 2).await);
        assert_eq!(watch.seen()[1], ("svc.A".to_string(), ServiceStatus::Shutdown));

        assert!(t.bus.unregister_service("svc.A"));
        assert!(eventually(|| !t.bus.is_registered("svc.A")).await);
        assert!(!t.bus.register_service_status_observer("svc.A", &watch));
    }

    #[tokio::test]
    async fn test_registration_is_idempotent() {
        let t = TestBus::start(&["svc.A"]).await;

        t.bus.register_default("svc.A", Properties::new()).unwrap();
        t.bus.register_default("svc.A", Properties::new()).unwrap();

        let reports = t.bus.service_reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].name, "svc.A");
    }

    #[tokio::test]
    async fn test_dependencies_registered_first() {
        let t = TestBus::start_graph(&[
            ("svc.A", &["svc.B", "svc.C"]),
            ("svc.B", &["svc.C"]),
            ("svc.C", &[]),
        ])
        .await;

        t.bus.register_default("svc.A", Properties::new()).unwrap();

        assert!(t.bus.is_registered("svc.B"));
        assert!(t.bus.is_registered("svc.C"));
        let report = t
            .bus
            .service_reports()
            .into_iter()
            .find(|r| r.name == "svc.A")
            .unwrap();
        assert_eq!(report.dependencies, vec!["svc.B", "svc.C"]);
    }

    #[tokio::test]
    async fn test_dependency_cycle_registers_nothing() {
        let t = TestBus::start_graph(&[("svc.A", &["svc.B"]), ("svc.B", &["svc.A"])]).await;

        let err = t
            .bus
            .register_default("svc.A", Properties::new())
            .unwrap_err();

        match &err {
            RegistrationError::DependencyCycle { chain } => {
                assert_eq!(chain, &["svc.A", "svc.B", "svc.A"]);
            }
            other => panic!("expected a cycle, got {other}"),
        }
        assert_eq!(err.kind_name(), "DependencyCycle");
        assert!(!t.bus.is_registered("svc.A"));
        assert!(!t.bus.is_registered("svc.B"));
    }

    #[tokio::test]
    async fn test_unknown_implementation() {
        let t = TestBus::start(&["svc.A"]).await;
        let err = t
            .bus
            .register_service("svc.X", "svc.nothing", Properties::new())
            .unwrap_err();
        assert_eq!(err.kind_name(), "UnknownImplementation");
        assert!(!t.bus.is_registered("svc.X"));
    }

    #[tokio::test]
    async fn test_registration_requires_running_bus() {
        let bus = ServiceBus::with_catalog(catalog(&Journal::default(), &["svc.A"]));
        let err = bus
            .register_default("svc.A", Properties::new())
            .unwrap_err();
        assert_eq!(err.kind_name(), "BusNotRunning");
    }

    #[tokio::test]
    async fn test_all_services_shut_down_stops_bus() {
        let t = TestBus::start(&["svc.A", "svc.B"]).await;
        t.start_services(&["svc.A", "svc.B"]).await;
        assert_eq!(t.bus.status(), BusStatus::Running);

        t.bus.stop_service("svc.A", false);
        assert!(eventually(|| !t.bus.is_running("svc.A")).await);
        assert_eq!(t.bus.status(), BusStatus::Running);

        t.bus.stop_service("svc.B", false);
        assert!(eventually(|| t.bus.status() == BusStatus::Stopped).await);

        // A bus stopped by aggregation starts again.
        t.bus
            .start(TestBus::properties(&t.dir, Properties::new()))
            .await
            .unwrap();
        assert_eq!(t.bus.status(), BusStatus::Running);
    }

    #[tokio::test]
    async fn test_unstable_service_is_restarted() {
        let t = TestBus::start(&["svc.A"]).await;
        t.start_services(&["svc.A"]).await;

        t.bus.service_status_changed("svc.A", ServiceStatus::Unstable);

        assert!(eventually(|| t.bus.service_status("svc.A") == Some(ServiceStatus::Running)).await);
        assert!(t.bus.is_running("svc.A"));
    }

    #[tokio::test]
    async fn test_bus_pause_not_supported() {
        let t = TestBus::start(&[]).await;
        assert!(t.bus.pause().is_err());
        assert!(t.bus.unpause().is_err());
        assert!(t.bus.restart().is_err());
        assert_eq!(t.bus.status(), BusStatus::Running);
    }
}

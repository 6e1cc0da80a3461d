//! # Control Protocol End to End
//!
//! A controller in front of a bus of recorders, driven entirely over TCP.

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bus_controller::{BusController, ControlClient, ControllerConfig};
    use service_bus::BusStatus;
    use shared_types::{
        ControlCommand, DynamicRoutingSlip, Envelope, Properties, Route, CONTENT_KEY,
    };
    use tokio::time::timeout;

    use crate::fixtures::{eventually, props, TestBus, FORWARD_KEY};

    const WAIT: Duration = Duration::from_secs(3);

    async fn controller(t: &TestBus, config: ControllerConfig) -> BusController {
        BusController::start(t.bus.clone(), config).await.unwrap()
    }

    async fn connect(controller: &BusController, id: &str) -> ControlClient {
        timeout(WAIT, ControlClient::connect(controller.local_addr(), id))
            .await
            .unwrap()
            .unwrap()
    }

    /// Register and start a forwarding recorder over the wire.
    async fn deploy(client: &mut ControlClient, name: &str) {
        let reply = client
            .register_service(name, None, props(FORWARD_KEY, "true"))
            .await
            .unwrap();
        assert_eq!(reply.get::<bool>(CONTENT_KEY), Some(true));
        let reply = client
            .service_command(ControlCommand::StartService, name)
            .await
            .unwrap();
        assert_eq!(reply.get::<bool>(CONTENT_KEY), Some(true));
    }

    #[tokio::test]
    async fn test_slip_result_follows_reconnected_client() {
        let t = TestBus::start(&["svc.A", "svc.B"]).await;
        let controller = controller(&t, ControllerConfig::ephemeral()).await;

        let mut first = connect(&controller, "C1").await;
        deploy(&mut first, "svc.A").await;
        deploy(&mut first, "svc.B").await;
        assert!(eventually(|| t.bus.is_running("svc.A") && t.bus.is_running("svc.B")).await);
        first.close().await.unwrap();

        let mut second = connect(&controller, "C1").await;
        let envelope = Envelope::document().with_slip(DynamicRoutingSlip::from_routes(vec![
            Route::new("svc.A", "one"),
            Route::new("svc.B", "two"),
        ]));
        let id = envelope.id;
        second.send_data(envelope).await.unwrap();

        let back = timeout(WAIT, second.recv()).await.unwrap().unwrap().unwrap();
        assert_eq!(back.id, id);
        assert!(back.is_end_of_route());
        assert_eq!(t.journal.services(), vec!["svc.A", "svc.B"]);
        assert_eq!(controller.client_addr("C1"), Some(second.local_addr()));
    }

    #[tokio::test]
    async fn test_deferred_admission_at_ceiling() {
        let t = TestBus::start(&[]).await;
        let config = ControllerConfig {
            max_clients: 2,
            accept_backoff: Duration::from_millis(50),
            ..ControllerConfig::ephemeral()
        };
        let controller = controller(&t, config).await;
        let addr = controller.local_addr();

        let first = connect(&controller, "C1").await;
        let _second = connect(&controller, "C2").await;

        let third = tokio::spawn(async move { ControlClient::connect(addr, "C3").await });
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!third.is_finished());
        assert_eq!(controller.session_count(), 2);

        first.close().await.unwrap();
        let mut third = timeout(WAIT, third).await.unwrap().unwrap().unwrap();
        let reply = third.command(ControlCommand::Ack).await.unwrap();
        assert_eq!(reply.get::<String>(CONTENT_KEY).as_deref(), Some("Ack"));
    }

    #[tokio::test]
    async fn test_remote_start_after_shutdown() {
        let t = TestBus::start(&["svc.A"]).await;
        let controller = controller(&t, ControllerConfig::ephemeral()).await;
        let mut client = connect(&controller, "C1").await;

        t.bus.shutdown().await.unwrap();
        let reply = client
            .register_service("svc.A", None, Properties::new())
            .await
            .unwrap();
        assert_eq!(reply.get::<String>(CONTENT_KEY).as_deref(), Some("BusNotRunning"));

        // The remote Start uses the configuration the bus last ran with.
        let reply = client.command(ControlCommand::Start).await.unwrap();
        assert_eq!(reply.get::<String>(CONTENT_KEY).as_deref(), Some("Started"));
        assert_eq!(t.bus.status(), BusStatus::Running);
        assert_eq!(t.bus.dead_letter_path(), Some(t.dir.path().join("deadLetter.json")));
    }

    #[tokio::test]
    async fn test_disconnect_notifies_client() {
        let t = TestBus::start(&[]).await;
        let controller = controller(&t, ControllerConfig::ephemeral()).await;
        let mut client = connect(&controller, "C1").await;

        assert!(controller.disconnect(client.local_addr()));

        let notice = timeout(WAIT, client.recv()).await.unwrap().unwrap().unwrap();
        assert_eq!(notice.command, Some(ControlCommand::CloseClient));
        assert_eq!(notice.client.as_deref(), Some("C1"));
        assert!(eventually(|| controller.session_count() == 0).await);
    }
}

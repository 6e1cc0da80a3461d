//! # Control Command Handling
//!
//! Each decoded line is answered on the session it arrived on. The reply is
//! the request envelope itself with its `content` (or `errors`) filled in, so
//! clients correlate by envelope id.
//!
//! | Command | Reply `content` |
//! |---|---|
//! | InitiateComm | `init = true` |
//! | Start | "Started" / "Start Failed" / "Bus not Stopped" |
//! | RegisterService | `true` or the registration error kind |
//! | StartService, StopService, GracefullyStopService | bool |
//! | Send | none unless refused or dead-lettered |
//! | Ack | "Ack" |
//! | reserved | "<Command> not supported at this time." |

use std::sync::Arc;

use service_bus::{BusStatus, DispatchOutcome};
use shared_types::{ControlCommand, Envelope, Properties};
use tracing::{debug, info, warn};

use crate::controller::ControllerInner;
use crate::session::Session;

/// Request key: name to register the service under.
pub const INTERFACE_NAME_KEY: &str = "interfaceName";
/// Request key: implementation name.
pub const SERVICE_CLASS_KEY: &str = "serviceClass";
/// Request key: string map of service configuration.
pub const SERVICE_CONFIG_KEY: &str = "serviceConfig";
/// Reply key set by a successful handshake.
pub const INIT_KEY: &str = "init";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    Close,
}

/// Decode and handle one line.
pub(crate) async fn handle_line(
    inner: &Arc<ControllerInner>,
    session: &Arc<Session>,
    line: &str,
) -> Flow {
    match Envelope::from_json_line(line) {
        Ok(envelope) => handle_envelope(inner, session, envelope).await,
        Err(e) => {
            warn!(addr = %session.addr(), error = %e, "[Controller] Undecodable line");
            let mut reply = Envelope::document();
            reply.client = session.client();
            reply.add_error(format!("Undecodable envelope: {}", e));
            session.send(&reply);
            Flow::Continue
        }
    }
}

pub(crate) async fn handle_envelope(
    inner: &Arc<ControllerInner>,
    session: &Arc<Session>,
    mut envelope: Envelope,
) -> Flow {
    let Some(command) = envelope.command else {
        envelope.add_error("Missing command");
        session.send(&envelope);
        return Flow::Continue;
    };
    debug!(addr = %session.addr(), %command, "[Controller] Command received");

    if command.is_reserved() {
        envelope.set_content(format!("{} not supported at this time.", command));
        session.send(&envelope);
        return Flow::Continue;
    }

    match command {
        ControlCommand::InitiateComm => initiate_comm(inner, session, envelope),
        ControlCommand::Start => {
            let reply = if inner.bus.status() == BusStatus::Stopped {
                match inner.bus.start(Properties::new()).await {
                    Ok(()) => "Started",
                    Err(e) => {
                        warn!(error = %e, "[Controller] Bus start failed");
                        "Start Failed"
                    }
                }
            } else {
                "Bus not Stopped"
            };
            envelope.set_content(reply);
            session.send(&envelope);
        }
        ControlCommand::RegisterService => register_service(inner, session, envelope),
        ControlCommand::StartService => {
            let started = with_service_class(&mut envelope, |name| inner.bus.start_service(name));
            envelope.set_content(started);
            session.send(&envelope);
        }
        ControlCommand::StopService | ControlCommand::GracefullyStopService => {
            let graceful = command == ControlCommand::GracefullyStopService;
            let stopped =
                with_service_class(&mut envelope, |name| inner.bus.stop_service(name, graceful));
            envelope.set_content(stopped);
            session.send(&envelope);
        }
        ControlCommand::Send => send(inner, session, envelope).await,
        ControlCommand::CloseClient => {
            info!(addr = %session.addr(), "[Controller] Client requested close");
            return Flow::Close;
        }
        ControlCommand::Ack => {
            envelope.set_content("Ack");
            session.send(&envelope);
        }
        // reserved, answered above
        _ => {}
    }
    Flow::Continue
}

fn initiate_comm(inner: &ControllerInner, session: &Session, mut envelope: Envelope) {
    match envelope.client.clone() {
        Some(client) if !client.is_empty() => {
            inner.bind_client(session, client);
            envelope.insert(INIT_KEY, true);
        }
        _ => {
            warn!(addr = %session.addr(), "[Controller] Handshake without client id");
            envelope.insert(INIT_KEY, false);
            envelope.add_error("No Client Id");
        }
    }
    session.send(&envelope);
}

fn register_service(inner: &ControllerInner, session: &Session, mut envelope: Envelope) {
    let Some(implementation) = envelope.get::<String>(SERVICE_CLASS_KEY) else {
        envelope.add_error(format!("No {}", SERVICE_CLASS_KEY));
        envelope.set_content(false);
        session.send(&envelope);
        return;
    };
    let name = envelope
        .get::<String>(INTERFACE_NAME_KEY)
        .unwrap_or_else(|| implementation.clone());
    let config: Properties = envelope.get(SERVICE_CONFIG_KEY).unwrap_or_default();

    match inner.bus.register_service(&name, &implementation, config) {
        Ok(()) => envelope.set_content(true),
        Err(e) => {
            warn!(service = %name, error = %e, "[Controller] Registration failed");
            envelope.set_content(e.kind_name());
            envelope.add_error(e.to_string());
        }
    }
    session.send(&envelope);
}

/// Route the envelope as data. Its end-of-route delivery is the reply.
async fn send(inner: &ControllerInner, session: &Session, mut envelope: Envelope) {
    envelope.command = None;
    let client = session.client().or_else(|| envelope.client.clone());
    let id = envelope.id;

    match inner.bus.dispatch(envelope, client.clone()).await {
        DispatchOutcome::Rejected { reason } => {
            let mut reply = Envelope::command(ControlCommand::Send);
            reply.id = id;
            reply.client = client;
            reply.add_error(reason);
            session.send(&reply);
        }
        DispatchOutcome::DeadLettered => {
            let mut reply = Envelope::command(ControlCommand::Send);
            reply.id = id;
            reply.client = client;
            reply.add_error("Envelope could not be routed and was dead-lettered");
            session.send(&reply);
        }
        outcome => debug!(%id, ?outcome, "[Controller] Envelope dispatched"),
    }
}

/// Run `op` on the request's service class, recording an error if absent.
fn with_service_class(envelope: &mut Envelope, op: impl FnOnce(&str) -> bool) -> bool {
    match envelope.get::<String>(SERVICE_CLASS_KEY) {
        Some(name) => op(&name),
        None => {
            envelope.add_error(format!("No {}", SERVICE_CLASS_KEY));
            false
        }
    }
}

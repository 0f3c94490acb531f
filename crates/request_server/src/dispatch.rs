//! Per-request dispatch.
//!
//! One request's lifetime on its worker: resolve the handler for the frame's
//! `(category, method)` and the connection's authentication state,
//! deserialize, validate, run the handler inside the worker's database
//! transaction, commit or roll back, serialize the response, apply any
//! authentication transition, and fan out the notification outbox.
//!
//! Only the synchronization conflict escapes the handler with retry
//! semantics; every other failure is answered through the response-code
//! channel. Notifications are delivered strictly after a successful commit,
//! so a rolled-back request has no observable side effects.

use crate::cache::SpatialCache;
use crate::connection::{ConnectionId, ConnectionManager};
use crate::db::DatabaseContext;
use crate::handler::RequestContext;
use crate::notify::NotificationRouter;
use crate::registry::WorkerHandlers;
use tracing::{debug, error, warn};
use warden_protocol::{codes, encode_response, validate, Codec, RequestFrame, WireReader, WireWriter};

/// One framed request, bound to the connection it arrived on.
#[derive(Debug)]
pub struct RequestEnvelope {
    pub connection_id: ConnectionId,
    pub frame: RequestFrame,
}

/// What the transport should do with the processed request.
#[derive(Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Send this frame back on the originating connection.
    Respond(Vec<u8>),
    /// Send nothing; the handler suppressed the reply.
    NoResponse,
    /// Re-queue the same envelope for another attempt.
    RetryLater,
}

/// Everything one worker owns exclusively: its handler instances and its
/// database context. No other worker ever touches these.
pub struct WorkerState {
    pub index: usize,
    pub handlers: WorkerHandlers,
    pub db: Box<dyn DatabaseContext>,
    pub codec: Codec,
}

/// Runs one request to completion on its worker.
pub async fn dispatch(
    envelope: &RequestEnvelope,
    worker: &mut WorkerState,
    connections: &ConnectionManager,
    router: &NotificationRouter,
    cache: &SpatialCache,
) -> DispatchOutcome {
    let WorkerState {
        handlers,
        db,
        codec,
        ..
    } = worker;

    let start_id = connections.authenticated_id(envelope.connection_id);
    let Some(handler) = handlers.lookup(envelope.frame.key(), start_id != 0) else {
        debug!(
            category = envelope.frame.category,
            method = envelope.frame.method,
            authenticated = start_id != 0,
            "no handler for request"
        );
        return DispatchOutcome::Respond(encode_response(codes::INVALID_REQUEST_TYPE, &[]));
    };

    let mut reader = WireReader::new(&envelope.frame.payload);
    if let Err(err) = codec.deserialize(
        &handler.tree.input,
        handler.instance.params_mut(),
        &mut reader,
    ) {
        debug!(error = %err, "request payload rejected");
        return DispatchOutcome::Respond(encode_response(codes::INVALID_PARAMETERS, &[]));
    }

    let code = validate::run(handler.instance.descriptor(), handler.instance.params());
    if code != codes::SUCCESS {
        return DispatchOutcome::Respond(encode_response(code, &[]));
    }

    if let Err(err) = db.begin_transaction().await {
        error!(error = %err, "failed to begin transaction");
        return DispatchOutcome::Respond(encode_response(codes::SERVER_ERROR, &[]));
    }

    let mut outbox = Vec::new();
    let mut context = RequestContext {
        authenticated_id: start_id,
        connection_id: envelope.connection_id,
        db: db.as_mut(),
        cache,
        outbox: &mut outbox,
    };
    let result = handler.instance.process(&mut context).await;
    let end_id = context.authenticated_id;
    drop(context);

    let mut code = match result {
        Ok(code) => code,
        Err(err) if err.is_synchronization_conflict() => {
            roll_back(db.as_mut()).await;
            return DispatchOutcome::RetryLater;
        }
        Err(err) => {
            warn!(error = %err, "handler failed; rolling back");
            roll_back(db.as_mut()).await;
            return DispatchOutcome::Respond(encode_response(codes::SERVER_ERROR, &[]));
        }
    };

    // Suppressed replies still commit: NO_RESPONSE is a successful outcome
    // that merely sends nothing back.
    let mut committed = false;
    if code == codes::SUCCESS || code == codes::NO_RESPONSE {
        match db.commit_transaction().await {
            Ok(()) => committed = true,
            Err(err) => {
                warn!(error = %err, "commit failed; rolling back");
                roll_back(db.as_mut()).await;
                code = codes::SERVER_ERROR;
            }
        }
    } else {
        roll_back(db.as_mut()).await;
    }

    let outcome = if code == codes::NO_RESPONSE {
        DispatchOutcome::NoResponse
    } else if code == codes::SUCCESS {
        let mut writer = WireWriter::new();
        match codec.serialize(
            &handler.tree.output,
            handler.instance.params_mut(),
            &mut writer,
        ) {
            Ok(()) => {
                DispatchOutcome::Respond(encode_response(codes::SUCCESS, writer.as_bytes()))
            }
            Err(err) => {
                error!(error = %err, "output serialization failed");
                DispatchOutcome::Respond(encode_response(codes::SERVER_ERROR, &[]))
            }
        }
    } else {
        DispatchOutcome::Respond(encode_response(code, &[]))
    };

    // An authentication transition is a login (0 → id) or logout (id → 0);
    // a handler may also move a connection between identities.
    if end_id != start_id {
        if start_id != 0 {
            connections
                .deauthenticate(envelope.connection_id, start_id)
                .await;
        }
        if end_id != 0 {
            connections.authenticate(envelope.connection_id, end_id).await;
        }
    }

    if committed {
        for notification in outbox {
            router.deliver(notification).await;
        }
    }

    outcome
}

async fn roll_back(db: &mut dyn DatabaseContext) {
    if let Err(err) = db.rollback_transaction().await {
        error!(error = %err, "rollback failed");
    }
}

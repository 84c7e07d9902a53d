use std::{convert::Infallible, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio::sync::{
    broadcast::{self, error::RecvError},
    mpsc,
};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::{
    dto::{
        common::Audience,
        sse::{Handshake, ServerEvent},
    },
    services::sync_service,
    state::SharedState,
};

const EVENT_HANDSHAKE: &str = "handshake";
const EVENT_STANDINGS: &str = "standings";

/// Identifies the target SSE stream for logging on teardown.
#[derive(Clone, Copy, Debug)]
pub enum StreamKind {
    Public,
    Admin,
}

impl StreamKind {
    fn name(self) -> &'static str {
        match self {
            StreamKind::Public => "public",
            StreamKind::Admin => "admin",
        }
    }

    fn audience(self) -> Audience {
        match self {
            StreamKind::Public => Audience::Arena,
            StreamKind::Admin => Audience::Admin,
        }
    }
}

/// Subscribe to a stream and build the events a fresh client receives first:
/// the handshake, then the current standings when storage is available.
pub async fn subscribe(
    state: &SharedState,
    kind: StreamKind,
) -> (broadcast::Receiver<ServerEvent>, Vec<ServerEvent>) {
    let receiver = match kind {
        StreamKind::Public => state.public_sse().subscribe(),
        StreamKind::Admin => state.admin_sse().subscribe(),
    };

    let mut initial = Vec::with_capacity(2);
    let handshake = Handshake {
        stream: kind.name().to_owned(),
        degraded: state.is_degraded(),
    };
    match ServerEvent::json(Some(EVENT_HANDSHAKE.to_owned()), &handshake) {
        Ok(event) => initial.push(event),
        Err(err) => warn!(error = %err, "failed to serialize SSE handshake"),
    }

    match sync_service::current_view(state, kind.audience(), None).await {
        Ok(view) => match ServerEvent::json(Some(EVENT_STANDINGS.to_owned()), &view) {
            Ok(event) => initial.push(event),
            Err(err) => warn!(error = %err, "failed to serialize initial standings"),
        },
        Err(err) => debug!(error = %err, "no initial standings for new SSE client"),
    }

    (receiver, initial)
}

/// Convert a broadcast receiver into an SSE response, forwarding events and
/// cleaning up once the client disconnects.
pub fn to_sse_stream(
    mut receiver: broadcast::Receiver<ServerEvent>,
    initial: Vec<ServerEvent>,
    kind: StreamKind,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // small bounded channel between forwarder and response
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(8);

    tokio::spawn(async move {
        for payload in initial {
            if tx.send(Ok(to_event(payload))).await.is_err() {
                return;
            }
        }

        loop {
            tokio::select! {
                _ = tx.closed() => break,
                recv_result = receiver.recv() => {
                    match recv_result {
                        Ok(payload) => {
                            if tx.send(Ok(to_event(payload))).await.is_err() {
                                break;
                            }
                        }
                        Err(RecvError::Closed) => break,
                        Err(RecvError::Lagged(skipped)) => {
                            // Projections are full snapshots; the next one catches the client up.
                            debug!(stream = kind.name(), skipped, "SSE client lagged");
                            continue;
                        }
                    }
                }
            }
        }

        info!(stream = kind.name(), "SSE stream disconnected");
    });

    let stream = ReceiverStream::new(rx);
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

fn to_event(payload: ServerEvent) -> Event {
    let mut event = Event::default().data(payload.data);
    if let Some(name) = payload.event {
        event = event.event(name);
    }
    event
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::AppConfig,
        state::{AppState, clock::ManualClock},
    };

    #[tokio::test]
    async fn degraded_client_only_gets_the_handshake() {
        let state = AppState::new(AppConfig::default(), Arc::new(ManualClock::new(0)));
        let (_receiver, initial) = subscribe(&state, StreamKind::Public).await;

        assert_eq!(initial.len(), 1);
        assert_eq!(initial[0].event.as_deref(), Some(EVENT_HANDSHAKE));
        assert!(initial[0].data.contains("\"degraded\":true"));
    }
}

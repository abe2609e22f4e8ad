use axum::{
    Router,
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
};
use futures::stream::{self, Stream};
use std::{convert::Infallible, sync::Arc, time::Duration};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::api::AppState;
use crate::domain::events::PanelEvent;

const DASHBOARD_TICK: Duration = Duration::from_secs(10);

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/events", get(sse_handler))
}

fn to_sse(event: &PanelEvent) -> Event {
    let json = serde_json::to_string(event).unwrap_or_default();
    Event::default().event(event.name()).data(json)
}

/// Panel events as they happen, plus a dashboard summary every ten seconds.
async fn sse_handler(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.shared.event_bus.subscribe();

    let events = stream::unfold(rx, |mut rx| async move {
        match rx.recv().await {
            Ok(event) => Some((Ok(to_sse(&event)), rx)),
            Err(broadcast::error::RecvError::Lagged(count)) => {
                warn!("Client lagged by {} messages", count);

                Some((
                    Ok(Event::default().event("warning").data("Missed some events")),
                    rx,
                ))
            }
            Err(broadcast::error::RecvError::Closed) => None,
        }
    });

    let mut interval = tokio::time::interval(DASHBOARD_TICK);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let ticks = stream::unfold((interval, state), |(mut interval, state)| async move {
        loop {
            interval.tick().await;
            match state.shared.system_service.get_dashboard_summary().await {
                Ok(summary) => {
                    let event = to_sse(&PanelEvent::Dashboard { summary });
                    return Some((Ok(event), (interval, state)));
                }
                Err(e) => debug!(error = %e, "Skipping dashboard tick"),
            }
        }
    });

    Sse::new(stream::select(events, ticks))
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

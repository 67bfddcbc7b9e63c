//! Live ticker WebSocket.
//!
//! Pushes reference price updates and offer-book changes to connected
//! clients as JSON events. Connections are fire-and-forget: a client that
//! stops reading is dropped on the next failed send.

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::State,
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::AppState;
use crate::{
    feeds::PriceFeed,
    market::MarketOfferStore,
    models::{CertificateType, WsServerEvent},
};

pub async fn websocket_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let events = state.events.subscribe();
    ws.on_upgrade(move |socket| handle_socket(socket, events))
}

async fn handle_socket(socket: WebSocket, mut events: broadcast::Receiver<WsServerEvent>) {
    let (mut sender, mut receiver) = socket.split();
    debug!("ticker client connected");

    loop {
        tokio::select! {
            event = events.recv() => {
                let event = match event {
                    Ok(event) => event,
                    // Dropped behind the broadcast buffer: skip ahead.
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "ticker client lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };

                let payload = match serde_json::to_string(&event) {
                    Ok(payload) => payload,
                    Err(_) => continue,
                };
                if sender.send(Message::Text(payload)).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    // Inbound messages are ignored; the ticker is one-way.
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    debug!("ticker client disconnected");
}

/// Bridge feed and book changes into the broadcast channel the WS
/// connections fan out from.
pub fn spawn_event_publisher(
    cea_feed: Arc<PriceFeed>,
    eua_feed: Arc<PriceFeed>,
    market: Arc<MarketOfferStore>,
    events: broadcast::Sender<WsServerEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        info!("📡 ticker event publisher started");
        let mut cea_rx = cea_feed.subscribe();
        let mut eua_rx = eua_feed.subscribe();
        let mut count_rx = market.subscribe_count();

        loop {
            let event = tokio::select! {
                changed = cea_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    quote_event(CertificateType::Cea, cea_rx.borrow().clone())
                }
                changed = eua_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    quote_event(CertificateType::Eua, eua_rx.borrow().clone())
                }
                changed = count_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    Some(WsServerEvent::OffersChanged {
                        offer_count: *count_rx.borrow(),
                    })
                }
            };

            if let Some(event) = event {
                // No receivers is fine; clients come and go.
                let _ = events.send(event);
            }
        }
    })
}

fn quote_event(
    instrument: CertificateType,
    quote: Option<crate::feeds::PriceQuote>,
) -> Option<WsServerEvent> {
    quote.map(|q| WsServerEvent::PriceUpdate {
        instrument,
        price: q.price,
        change_24h: q.change_24h,
        timestamp: q.timestamp,
    })
}

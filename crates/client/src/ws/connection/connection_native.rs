//! Native/Desktop transport using tokio-tungstenite.

use futures_channel::mpsc::UnboundedReceiver;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::{Connector, EventSink, Outbound, TransportHandle};

/// Opens one tokio task per transport.
#[derive(Debug, Clone, Default)]
pub struct PlatformConnector;

impl Connector for PlatformConnector {
    fn open(&self, url: &str, sink: EventSink) -> TransportHandle {
        let (handle, outbound) = TransportHandle::channel(sink.topic());
        tokio::spawn(run_transport(url.to_string(), sink, outbound));
        handle
    }
}

async fn run_transport(url: String, sink: EventSink, mut outbound: UnboundedReceiver<Outbound>) {
    let topic = sink.topic();

    let ws_stream = match connect_async(url.as_str()).await {
        Ok((ws_stream, _response)) => ws_stream,
        Err(e) => {
            crate::log_error!("WebSocket error for {}: {}", topic, e);
            sink.closed(Some(e.to_string()));
            return;
        }
    };

    crate::log_info!("WebSocket connected to {} ({})", url, topic);
    sink.opened();

    let (mut write, mut read) = ws_stream.split();

    let reason = loop {
        tokio::select! {
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => sink.frame(text.as_str().to_owned()),
                Some(Ok(Message::Close(frame))) => {
                    crate::log_info!("WebSocket for {} received close frame", topic);
                    break frame.map(|f| f.reason.to_string());
                }
                Some(Ok(Message::Ping(data))) => {
                    // Pong is handled automatically by tungstenite
                    crate::log_debug!("Received ping: {:?}", data);
                }
                Some(Ok(_)) => {
                    // Ignore binary, pong, etc.
                }
                Some(Err(e)) => {
                    crate::log_error!("WebSocket read error for {}: {}", topic, e);
                    break Some(e.to_string());
                }
                None => break None,
            },
            command = outbound.next() => match command {
                Some(Outbound::Text(text)) => {
                    if let Err(e) = write.send(Message::Text(text.into())).await {
                        crate::log_error!("Send failed for {}: {}", topic, e);
                        break Some(e.to_string());
                    }
                }
                Some(Outbound::Close) | None => {
                    let _ = write.send(Message::Close(None)).await;
                    break Some("closed locally".to_string());
                }
            },
        }
    };

    crate::log_info!("WebSocket for {} closed", topic);
    sink.closed(reason);
}

//! WASM/Web transport using web_sys::WebSocket.

use futures_channel::mpsc::UnboundedReceiver;
use futures_util::StreamExt;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::spawn_local;
use web_sys::{js_sys, CloseEvent, ErrorEvent, MessageEvent, WebSocket};

use super::{Connector, EventSink, Outbound, TransportHandle};

/// Opens one browser WebSocket per transport.
#[derive(Debug, Clone, Default)]
pub struct PlatformConnector;

impl Connector for PlatformConnector {
    fn open(&self, url: &str, sink: EventSink) -> TransportHandle {
        let (handle, outbound) = TransportHandle::channel(sink.topic());

        match WebSocket::new(url) {
            Ok(ws) => {
                install_callbacks(&ws, sink);
                spawn_local(drain_outbound(ws, outbound));
            }
            Err(e) => {
                crate::log_error!("Failed to create WebSocket for {}: {:?}", sink.topic(), e);
                sink.closed(Some(format!("{e:?}")));
            }
        }

        handle
    }
}

fn install_callbacks(ws: &WebSocket, sink: EventSink) {
    let sink_open = sink.clone();
    let onopen_callback = Closure::wrap(Box::new(move |_: web_sys::Event| {
        crate::log_info!("WebSocket for {} opened", sink_open.topic());
        sink_open.opened();
    }) as Box<dyn FnMut(web_sys::Event)>);
    ws.set_onopen(Some(onopen_callback.as_ref().unchecked_ref()));
    onopen_callback.forget();

    let sink_message = sink.clone();
    let onmessage_callback = Closure::wrap(Box::new(move |e: MessageEvent| {
        if let Ok(text) = e.data().dyn_into::<js_sys::JsString>() {
            sink_message.frame(text.into());
        }
    }) as Box<dyn FnMut(MessageEvent)>);
    ws.set_onmessage(Some(onmessage_callback.as_ref().unchecked_ref()));
    onmessage_callback.forget();

    let topic = sink.topic();
    let onerror_callback = Closure::wrap(Box::new(move |_: ErrorEvent| {
        // A close event always follows; reconnect logic hangs off that.
        crate::log_error!("WebSocket error for {}", topic);
    }) as Box<dyn FnMut(ErrorEvent)>);
    ws.set_onerror(Some(onerror_callback.as_ref().unchecked_ref()));
    onerror_callback.forget();

    let onclose_callback = Closure::wrap(Box::new(move |e: CloseEvent| {
        let reason = if e.reason().is_empty() {
            format!("Code {}", e.code())
        } else {
            e.reason()
        };
        crate::log_info!("WebSocket for {} closed: {}", sink.topic(), reason);
        sink.closed(Some(reason));
    }) as Box<dyn FnMut(CloseEvent)>);
    ws.set_onclose(Some(onclose_callback.as_ref().unchecked_ref()));
    onclose_callback.forget();
}

async fn drain_outbound(ws: WebSocket, mut outbound: UnboundedReceiver<Outbound>) {
    while let Some(command) = outbound.next().await {
        match command {
            Outbound::Text(text) => {
                if ws.ready_state() != WebSocket::OPEN {
                    continue;
                }
                if let Err(e) = ws.send_with_str(&text) {
                    crate::log_error!("Send failed: {:?}", e);
                }
            }
            Outbound::Close => break,
        }
    }
    let _ = ws.close();
}

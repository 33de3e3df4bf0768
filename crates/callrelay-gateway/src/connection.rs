use callrelay_session::LinkReceiver;
use futures_util::{Sink, SinkExt};
use tracing::debug;

/// Drain a link's outbound queue into a websocket sink.
///
/// Returns when the link is closed, the queue's senders are gone, or the
/// socket stops accepting writes. A close frame is sent on the way out.
pub async fn pump<S, M>(mut sink: S, mut link: LinkReceiver, wrap: fn(String) -> M, close: M)
where
    S: Sink<M> + Unpin,
{
    while let Some(text) = link.next().await {
        if sink.send(wrap(text)).await.is_err() {
            debug!("Websocket sink closed while writing");
            return;
        }
    }
    let _ = sink.send(close).await;
    let _ = sink.close().await;
}

/// Wrappers for axum server-side sockets.
pub mod axum_ws {
    use axum::extract::ws::Message;

    pub fn text(text: String) -> Message {
        Message::Text(text.into())
    }

    pub fn close() -> Message {
        Message::Close(None)
    }
}

/// Wrappers for tungstenite client sockets.
pub mod client_ws {
    use tokio_tungstenite::tungstenite::Message;

    pub fn text(text: String) -> Message {
        Message::Text(text)
    }

    pub fn close() -> Message {
        Message::Close(None)
    }
}

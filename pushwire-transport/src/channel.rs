/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

//! Duplex channel over WebSocket.
//!
//! Each outbound batch is sent as one text frame holding its operation line
//! and its parameter line. Inbound text frames may carry several lines; they
//! are reported one by one as [`StreamEvent::Line`]. The end of the channel
//! is reported once, as [`StreamEvent::Ended`] or [`StreamEvent::Failed`].

use crate::StreamEvent;
use crate::codec::{CodecError, FrameCodec};
use crate::endpoint::Endpoint;
use crate::error::TransportError;
use bytes::BytesMut;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, Stream, StreamExt};
use pushwire_protocol::ControlBatch;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, trace, warn};

/// WebSocket subprotocol announced on connect.
pub const CHANNEL_PROTOCOL: &str = "TLCP-2.5.0.pushwire";

/// Capacity of the outbound queue.
const OUTBOUND_CAPACITY: usize = 64;

/// Initial capacity of the read buffer.
pub(crate) const READ_BUFFER_CAPACITY: usize = 8 * 1024;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// An open duplex channel.
///
/// Dropping the channel stops the reader at once. The writer sends what is
/// still queued, then closes the socket.
#[derive(Debug)]
pub struct DuplexChannel {
    outbound: mpsc::Sender<String>,
    reader: JoinHandle<()>,
}

impl DuplexChannel {
    /// Connects to the server and starts the reader and writer tasks.
    ///
    /// # Arguments
    /// * `address` - Server address; `http`/`ws` connect in the clear,
    ///   `https`/`wss` over TLS
    /// * `codec` - Line codec
    /// * `events` - Sink for inbound lines and the end of the channel
    ///
    /// # Errors
    /// Returns an error if the address is invalid or the handshake fails.
    pub async fn connect(
        address: &str,
        codec: FrameCodec,
        events: mpsc::Sender<StreamEvent>,
    ) -> Result<Self, TransportError> {
        let url = Endpoint::parse(address)?.channel_url();
        let mut request = url.as_str().into_client_request()?;
        request
            .headers_mut()
            .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(CHANNEL_PROTOCOL));
        let (socket, response) = connect_async(request).await?;
        debug!(%url, status = %response.status(), "channel connected");

        let (sink, stream) = socket.split();
        let (outbound, queue) = mpsc::channel(OUTBOUND_CAPACITY);
        let reader = tokio::spawn(run_reader(stream, codec.clone(), events.clone()));
        tokio::spawn(run_writer(sink, codec, queue, events));
        Ok(Self { outbound, reader })
    }

    /// Queues a batch for writing.
    ///
    /// # Errors
    /// Returns `TransportError::ChannelClosed` once the writer has stopped.
    pub async fn send(&self, batch: &ControlBatch) -> Result<(), TransportError> {
        self.outbound
            .send(batch.finish())
            .await
            .map_err(|_| TransportError::ChannelClosed)
    }
}

impl Drop for DuplexChannel {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn run_reader(
    stream: SplitStream<Socket>,
    codec: FrameCodec,
    events: mpsc::Sender<StreamEvent>,
) {
    let result = read_frames(stream, codec, &events).await;
    report_end(result, &events).await;
}

/// Writes queued frames until every sender is gone, then closes the socket.
async fn run_writer(
    mut sink: SplitSink<Socket, Message>,
    mut codec: FrameCodec,
    mut queue: mpsc::Receiver<String>,
    events: mpsc::Sender<StreamEvent>,
) {
    let mut buf = BytesMut::new();
    while let Some(frame) = queue.recv().await {
        buf.clear();
        let written = match encode_text(&mut codec, frame, &mut buf) {
            Ok(text) => sink.send(Message::Text(text)).await.map_err(TransportError::from),
            Err(err) => Err(err.into()),
        };
        if let Err(err) = written {
            warn!(%err, "channel write failed");
            let _ = events.send(StreamEvent::Failed(err.to_string())).await;
            return;
        }
        trace!(bytes = buf.len(), "frame written");
    }
    if let Err(err) = sink.close().await {
        debug!(%err, "channel close not acknowledged");
    }
    debug!("channel writer stopped");
}

fn encode_text(
    codec: &mut FrameCodec,
    frame: String,
    buf: &mut BytesMut,
) -> Result<String, CodecError> {
    codec.encode(frame, buf)?;
    std::str::from_utf8(&buf[..])
        .map(str::to_owned)
        .map_err(|_| CodecError::InvalidUtf8)
}

/// Reads frames until the peer closes the channel.
///
/// A frame always ends on a line boundary, so a trailing line without a
/// terminator is reported with its frame.
async fn read_frames<S>(
    stream: S,
    mut codec: FrameCodec,
    events: &mpsc::Sender<StreamEvent>,
) -> Result<(), TransportError>
where
    S: Stream<Item = Result<Message, tungstenite::Error>>,
{
    let mut stream = std::pin::pin!(stream);
    let mut buf = BytesMut::with_capacity(READ_BUFFER_CAPACITY);
    while let Some(message) = stream.next().await {
        match message? {
            Message::Text(text) => buf.extend_from_slice(text.as_bytes()),
            Message::Binary(data) => buf.extend_from_slice(&data),
            Message::Close(frame) => {
                debug!(?frame, "channel closed by peer");
                return Ok(());
            }
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
        }
        if !emit_lines(&mut codec, &mut buf, true, events).await? {
            return Ok(());
        }
    }
    Ok(())
}

/// Reports every complete line held in `buf`.
///
/// With `at_boundary` set, the bytes left after the last terminator form a
/// line too. Returns false once nobody listens to `events` any more.
pub(crate) async fn emit_lines(
    codec: &mut FrameCodec,
    buf: &mut BytesMut,
    at_boundary: bool,
    events: &mpsc::Sender<StreamEvent>,
) -> Result<bool, TransportError> {
    loop {
        let line = if at_boundary {
            codec.decode_eof(buf)?
        } else {
            codec.decode(buf)?
        };
        let Some(line) = line else {
            return Ok(true);
        };
        if events.send(StreamEvent::Line(line)).await.is_err() {
            return Ok(false);
        }
    }
}

pub(crate) async fn report_end(
    result: Result<(), TransportError>,
    events: &mpsc::Sender<StreamEvent>,
) {
    let event = match result {
        Ok(()) => StreamEvent::Ended,
        Err(err) => {
            warn!(%err, "stream failed");
            StreamEvent::Failed(err.to_string())
        }
    };
    let _ = events.send(event).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pushwire_protocol::{Operation, params};
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_hdr_async;
    use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

    async fn accept(listener: TcpListener) -> WebSocketStream<TcpStream> {
        let (socket, _) = listener.accept().await.unwrap();
        accept_hdr_async(socket, |request: &Request, mut response: Response| {
            assert_eq!(request.uri().path(), "/pushwire");
            assert_eq!(
                request.headers().get(SEC_WEBSOCKET_PROTOCOL),
                Some(&HeaderValue::from_static(CHANNEL_PROTOCOL))
            );
            response
                .headers_mut()
                .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(CHANNEL_PROTOCOL));
            Ok::<_, ErrorResponse>(response)
        })
        .await
        .unwrap()
    }

    async fn next_text(socket: &mut WebSocketStream<TcpStream>) -> Option<String> {
        while let Some(message) = socket.next().await {
            match message.ok()? {
                Message::Text(text) => return Some(text),
                Message::Close(_) => return None,
                _ => {}
            }
        }
        None
    }

    #[tokio::test]
    async fn test_channel_exchanges_lines() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let mut socket = accept(listener).await;
            let request = next_text(&mut socket).await;
            socket
                .send(Message::Text(
                    "WSOK\r\nCONOK,S1,50000,5000,*\r\n".to_string(),
                ))
                .await
                .unwrap();
            socket.close(None).await.unwrap();
            request
        });

        let (tx, mut rx) = mpsc::channel(8);
        let address = format!("http://127.0.0.1:{port}");
        let channel = DuplexChannel::connect(&address, FrameCodec::new(), tx)
            .await
            .unwrap();
        let mut batch = ControlBatch::new(Operation::Wsok);
        batch.put_str(params::CID, "c");
        channel.send(&batch).await.unwrap();

        assert_eq!(rx.recv().await, Some(StreamEvent::Line("WSOK".to_string())));
        assert_eq!(
            rx.recv().await,
            Some(StreamEvent::Line("CONOK,S1,50000,5000,*".to_string()))
        );
        assert_eq!(rx.recv().await, Some(StreamEvent::Ended));
        let request = server.await.unwrap();
        assert_eq!(request.as_deref(), Some("wsok\r\nLS_cid=c\r\n"));
    }

    #[tokio::test]
    async fn test_dropped_channel_flushes_queued_frames() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let mut socket = accept(listener).await;
            let first = next_text(&mut socket).await;
            let after = next_text(&mut socket).await;
            (first, after)
        });

        let (tx, _rx) = mpsc::channel(8);
        let channel =
            DuplexChannel::connect(&format!("ws://127.0.0.1:{port}"), FrameCodec::new(), tx)
                .await
                .unwrap();
        let mut destroy = ControlBatch::new(Operation::Control);
        destroy.put_uint(params::REQ_ID, 9);
        destroy.put_str(params::OP, "destroy");
        channel.send(&destroy).await.unwrap();
        drop(channel);

        let (first, after) = tokio::time::timeout(std::time::Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap();
        assert!(first.unwrap().contains("LS_op=destroy"));
        assert_eq!(after, None);
    }

    #[tokio::test]
    async fn test_connect_refused_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let (tx, _rx) = mpsc::channel(8);
        let result =
            DuplexChannel::connect(&format!("ws://127.0.0.1:{port}"), FrameCodec::new(), tx).await;
        assert!(matches!(result, Err(TransportError::WebSocket(_))));
    }

    #[tokio::test]
    async fn test_frame_boundary_ends_last_line() {
        let (tx, mut rx) = mpsc::channel(8);
        let frames = futures_util::stream::iter(vec![
            Ok::<_, tungstenite::Error>(Message::Text("PROG,3\r\nLOOP".to_string())),
            Ok(Message::Ping(vec![1])),
            Ok(Message::Text("NOOP,x\r\n".to_string())),
        ]);
        read_frames(frames, FrameCodec::new(), &tx).await.unwrap();
        assert_eq!(rx.recv().await, Some(StreamEvent::Line("PROG,3".to_string())));
        assert_eq!(rx.recv().await, Some(StreamEvent::Line("LOOP".to_string())));
        assert_eq!(rx.recv().await, Some(StreamEvent::Line("NOOP,x".to_string())));
    }
}

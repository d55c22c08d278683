/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

//! HTTP request transport.
//!
//! Session requests are posted to `<path>/pushwire/<operation>.txt` with the
//! batch parameters as a form body. The response body is a sequence of
//! server lines that lasts until the server ends it.

use crate::StreamEvent;
use crate::channel::{READ_BUFFER_CAPACITY, emit_lines, report_end};
use crate::codec::FrameCodec;
use crate::endpoint::Endpoint;
use crate::error::TransportError;
use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt};
use pushwire_protocol::ControlBatch;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Response};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::Decoder;
use tracing::debug;

/// Content type of every request body.
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Builds the HTTP client shared by every request of a push client.
///
/// # Errors
/// Returns `TransportError::Http` if the TLS backend cannot be initialised.
pub fn http_client() -> Result<Client, TransportError> {
    Ok(Client::builder().tcp_nodelay(true).build()?)
}

/// An open streaming or polling request.
///
/// Dropping the stream aborts the request.
#[derive(Debug)]
pub struct HttpStream {
    task: JoinHandle<()>,
}

impl HttpStream {
    /// Posts a session request and streams its response lines.
    ///
    /// Returns once the response head arrived; lines, then the end of the
    /// response, are reported on `events`.
    ///
    /// # Errors
    /// Returns an error if the address is invalid, the request fails or the
    /// server answers with a non-success status.
    pub async fn open(
        client: &Client,
        address: &str,
        batch: &ControlBatch,
        codec: FrameCodec,
        events: mpsc::Sender<StreamEvent>,
    ) -> Result<Self, TransportError> {
        let response = send_request(client, address, batch).await?;
        let task = tokio::spawn(async move {
            let result = read_body(response.bytes_stream(), codec, &events).await;
            report_end(result, &events).await;
        });
        Ok(Self { task })
    }
}

impl Drop for HttpStream {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Posts a control request and returns its whole response body.
///
/// Lines are validated by `codec` and returned `\r\n`-terminated.
///
/// # Errors
/// Returns an error on connection failure, a non-success status or a body
/// the codec rejects.
pub async fn post_control(
    client: &Client,
    address: &str,
    batch: &ControlBatch,
    mut codec: FrameCodec,
) -> Result<String, TransportError> {
    let response = send_request(client, address, batch).await?;
    let mut buf = BytesMut::from(&response.bytes().await?[..]);
    let mut body = String::with_capacity(buf.len() + 2);
    while let Some(line) = codec.decode_eof(&mut buf)? {
        body.push_str(&line);
        body.push_str("\r\n");
    }
    Ok(body)
}

async fn send_request(
    client: &Client,
    address: &str,
    batch: &ControlBatch,
) -> Result<Response, TransportError> {
    let url = Endpoint::parse(address)?.request_url(batch.operation());
    let response = client
        .post(&url)
        .header(CONTENT_TYPE, FORM_CONTENT_TYPE)
        .body(batch.body().to_owned())
        .send()
        .await?;
    let status = response.status();
    debug!(%url, %status, op = %batch.operation(), "request answered");
    if !status.is_success() {
        return Err(TransportError::HttpStatus(status.as_u16()));
    }
    Ok(response)
}

/// Reads body chunks until the server ends the response.
async fn read_body<S>(
    body: S,
    mut codec: FrameCodec,
    events: &mpsc::Sender<StreamEvent>,
) -> Result<(), TransportError>
where
    S: Stream<Item = Result<Bytes, reqwest::Error>>,
{
    let mut body = std::pin::pin!(body);
    let mut buf = BytesMut::with_capacity(READ_BUFFER_CAPACITY);
    while let Some(chunk) = body.next().await {
        buf.extend_from_slice(&chunk?);
        if !emit_lines(&mut codec, &mut buf, false, events).await? {
            return Ok(());
        }
    }
    emit_lines(&mut codec, &mut buf, true, events).await?;
    Ok(())
}

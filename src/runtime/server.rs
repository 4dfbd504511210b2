//! HTTP surface of the invoker.
//!
//! - `GET /_health` answers `OK`.
//! - `POST /stream` runs a streaming call over length-prefixed CBOR frames.
//! - Any other `POST` runs a single envelope call: the body is the payload
//!   and HTTP headers are envelope headers.

use crate::invoker::{Envelope, EnvelopeSink, EnvelopeSource, Invoker, TransportError};
use crate::runtime::frame::{encode_frame, FrameDecoder, StreamFrame};
use crate::runtime::InvokerConfig;
use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full, Limited, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Media type of the framed streaming protocol.
pub const FRAMED_CONTENT_TYPE: &str = "application/x-strand-frames";

/// Frames buffered between a call and its response body.
const RESPONSE_BUFFER: usize = 16;

type ResponseBody = UnsyncBoxBody<Bytes, Infallible>;

/// Invoker HTTP server.
pub struct InvokerServer {
    config: InvokerConfig,
    invoker: Invoker,
}

impl InvokerServer {
    /// Create a new server for `invoker`.
    pub fn new(config: InvokerConfig, invoker: Invoker) -> Self {
        Self { config, invoker }
    }

    /// Bind the configured address and serve until the listener fails.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr: SocketAddr = self.config.bind_addr().parse()?;
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener).await
    }

    /// Serve connections accepted from `listener`.
    pub async fn serve(
        self,
        listener: TcpListener,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        info!("Invoker listening on {}", listener.local_addr()?);

        loop {
            let (stream, remote_addr) = listener.accept().await?;
            let io = TokioIo::new(stream);

            let invoker = self.invoker.clone();
            let config = self.config.clone();

            tokio::task::spawn(async move {
                let service = service_fn(move |req| {
                    let invoker = invoker.clone();
                    let config = config.clone();
                    async move { handle_request(req, invoker, config, remote_addr).await }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    error!("Error serving connection: {:?}", err);
                }
            });
        }
    }
}

async fn handle_request(
    req: Request<Incoming>,
    invoker: Invoker,
    config: InvokerConfig,
    remote_addr: SocketAddr,
) -> Result<Response<ResponseBody>, Infallible> {
    let path = req.uri().path().to_string();
    let method = req.method().clone();
    debug!("Handling request: {} {} from {}", method, path, remote_addr);

    let response = match (&method, path.as_str()) {
        (&Method::GET, "/_health") if config.enable_health => text(StatusCode::OK, "OK"),
        (&Method::POST, "/stream") => stream_call(req, invoker, &config),
        (&Method::POST, _) => single_call(req, invoker, &config).await,
        _ => text(StatusCode::NOT_FOUND, "Not Found"),
    };
    Ok(response)
}

/// Streaming mode: decode request frames into the call, encode its output
/// as response frames, and finish with a status frame.
fn stream_call(req: Request<Incoming>, invoker: Invoker, config: &InvokerConfig) -> Response<ResponseBody> {
    let (tx, rx) = mpsc::channel::<Bytes>(RESPONSE_BUFFER);
    let source = BodySource::new(req.into_body(), config.max_body_size);
    let sink = FrameSink { tx: tx.clone() };

    tokio::spawn(async move {
        let result = invoker.call(source, sink).await;
        if let Err(err) = &result {
            warn!("Streaming call failed with {}: {}", err.code(), err);
        }
        match encode_frame(&StreamFrame::status(&result)) {
            Ok(frame) => {
                let _ = tx.send(frame).await;
            }
            Err(err) => error!("Failed to encode status frame: {}", err),
        }
    });

    let frames = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv()
            .await
            .map(|bytes| (Ok::<_, Infallible>(Frame::data(bytes)), rx))
    });

    let mut response = Response::new(StreamBody::new(frames).boxed_unsync());
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(FRAMED_CONTENT_TYPE));
    response
}

/// Single envelope mode. Errors travel inside the envelope, so the HTTP
/// status is only an error for malformed requests.
async fn single_call(
    req: Request<Incoming>,
    invoker: Invoker,
    config: &InvokerConfig,
) -> Response<ResponseBody> {
    let (parts, body) = req.into_parts();

    let payload = match Limited::new(body, config.max_body_size).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(err) => {
            warn!("Failed to read request body: {}", err);
            return text(StatusCode::BAD_REQUEST, "Invalid or oversized request body");
        }
    };

    let mut request = Envelope::new(payload);
    for (name, value) in &parts.headers {
        match value.to_str() {
            Ok(value) => request.add_header(name.as_str(), value),
            Err(_) => debug!("Skipping non-text header {}", name),
        }
    }

    let reply = invoker.invoke_once(request).await;

    let mut response = Response::new(Full::new(reply.payload).boxed_unsync());
    for (name, values) in &reply.headers {
        let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
            warn!("Dropping invalid response header name {:?}", name);
            continue;
        };
        for value in values {
            match HeaderValue::from_str(value) {
                Ok(value) => {
                    response.headers_mut().append(name.clone(), value);
                }
                Err(_) => warn!("Dropping invalid value of response header {}", name),
            }
        }
    }
    response
}

fn text(status: StatusCode, body: &'static str) -> Response<ResponseBody> {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())).boxed_unsync());
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    response
}

/// Envelopes decoded from a framed request body.
struct BodySource {
    body: Incoming,
    decoder: FrameDecoder,
    finished: bool,
}

impl BodySource {
    fn new(body: Incoming, max_frame: usize) -> Self {
        Self {
            body,
            decoder: FrameDecoder::new(max_frame),
            finished: false,
        }
    }
}

#[async_trait]
impl EnvelopeSource for BodySource {
    async fn recv(&mut self) -> Result<Option<Envelope>, TransportError> {
        loop {
            if let Some(envelope) = self.decoder.next_frame::<Envelope>()? {
                return Ok(Some(envelope));
            }
            if self.finished {
                self.decoder.finish()?;
                return Ok(None);
            }
            match self.body.frame().await {
                Some(Ok(frame)) => {
                    if let Ok(data) = frame.into_data() {
                        self.decoder.push(&data);
                    }
                }
                Some(Err(err)) => return Err(TransportError::Http(err)),
                None => self.finished = true,
            }
        }
    }
}

/// Envelopes encoded onto the response body.
struct FrameSink {
    tx: mpsc::Sender<Bytes>,
}

#[async_trait]
impl EnvelopeSink for FrameSink {
    async fn send(&mut self, envelope: Envelope) -> Result<(), TransportError> {
        let frame = encode_frame(&StreamFrame::Envelope(envelope))?;
        self.tx.send(frame).await.map_err(|_| TransportError::Closed)
    }
}

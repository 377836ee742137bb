#![deny(unsafe_code)]
#![deny(warnings)]
//! HTTP/1.0 GET runner for the time and weather sources
//!
//! One runner per fetch kind, each serving one request at a time over plain
//! TCP. The response is read until the server closes the connection, parsed
//! with `httparse`, and reported to the engine as a completion (any status)
//! or a transport error. An abort for the running request drops it at once.

use core::fmt::Write as _;

use clock_core::config::{MAX_TIMEOUT_MS, URL_MAX_LEN};
use clock_core::event::{Event, FETCH_BODY_MAX};
use clock_core::fetch::FetchKind;
use defmt::{debug, info, warn};
use embassy_futures::join::join;
use embassy_futures::select::{select, Either};
use embassy_net::Stack;
use embassy_time::{with_timeout, Duration};
use embedded_io_async::{Read, Write};
use heapless::{String, Vec};

use super::error::NetworkError;
use super::socket::AsyncTcpSocket;
use crate::events::{self, HttpChannel, HttpCommand};

/// Room for the status line and headers on top of the largest body
const RESPONSE_MAX: usize = FETCH_BODY_MAX + 512;
const REQUEST_MAX: usize = 256;
const MAX_HEADERS: usize = 16;

/// Parts of an `http://host[:port]/path` URL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Url<'a> {
    pub host: &'a str,
    pub port: u16,
    pub path: &'a str,
}

/// Split a plain-HTTP URL; `https` and other schemes are rejected
pub fn parse_url(url: &str) -> Result<Url<'_>, NetworkError> {
    let rest = url.strip_prefix("http://").ok_or(NetworkError::InvalidUrl)?;
    let (authority, path) = match rest.find('/') {
        Some(i) => (&rest[..i], &rest[i..]),
        None => (rest, "/"),
    };
    let (host, port) = match authority.rsplit_once(':') {
        Some((host, port)) => (host, port.parse().map_err(|_| NetworkError::InvalidUrl)?),
        None => (authority, 80),
    };
    if host.is_empty() {
        return Err(NetworkError::InvalidUrl);
    }
    Ok(Url { host, port, path })
}

fn format_request(url: &Url<'_>) -> Result<String<REQUEST_MAX>, NetworkError> {
    let mut request = String::new();
    write!(
        request,
        "GET {} HTTP/1.0\r\nHost: {}\r\nUser-Agent: desktop-clock\r\nAccept: application/json\r\nConnection: close\r\n\r\n",
        url.path, url.host
    )
    .map_err(|_| NetworkError::InvalidUrl)?;
    Ok(request)
}

/// Status code and body of a complete response
#[derive(Debug, PartialEq, Eq)]
pub struct Response<'a> {
    pub status: u16,
    pub body: &'a [u8],
}

pub fn parse_response(buf: &[u8]) -> Result<Response<'_>, NetworkError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut response = httparse::Response::new(&mut headers);
    match response.parse(buf) {
        Ok(httparse::Status::Complete(offset)) => Ok(Response {
            status: response.code.ok_or(NetworkError::InvalidResponse)?,
            body: &buf[offset..],
        }),
        Ok(httparse::Status::Partial) | Err(_) => Err(NetworkError::InvalidResponse),
    }
}

async fn read_to_end<R: Read<Error = NetworkError>>(
    reader: &mut R,
    buf: &mut [u8],
) -> Result<usize, NetworkError> {
    let mut len = 0;
    loop {
        if len == buf.len() {
            return Err(NetworkError::ResponseTooLarge);
        }
        match reader.read(&mut buf[len..]).await? {
            0 => return Ok(len),
            n => len += n,
        }
    }
}

async fn fetch(
    stack: Stack<'_>,
    url: &str,
) -> Result<(u16, Vec<u8, FETCH_BODY_MAX>), NetworkError> {
    let url = parse_url(url)?;
    let request = format_request(&url)?;

    let mut rx_buffer = [0u8; 2048];
    let mut tx_buffer = [0u8; 512];
    let mut socket = AsyncTcpSocket::new(stack, &mut rx_buffer, &mut tx_buffer);
    socket.connect_host(stack, url.host, url.port).await?;

    socket.write_all(request.as_bytes()).await?;
    socket.flush().await?;

    let mut response = [0u8; RESPONSE_MAX];
    let len = read_to_end(&mut socket, &mut response).await;
    socket.close();
    let parsed = parse_response(&response[..len?])?;

    let body = Vec::from_slice(parsed.body).map_err(|_| NetworkError::ResponseTooLarge)?;
    Ok((parsed.status, body))
}

type Request = (u32, String<URL_MAX_LEN>);

/// Whether `command`, received while `in_flight` runs, ends that request
///
/// Its own abort cancels it. A new GET means the abort was lost and the
/// engine already gave up on it.
fn interrupts(command: &HttpCommand, in_flight: u32) -> bool {
    match command {
        HttpCommand::Abort(token) => *token == in_flight,
        HttpCommand::Get { .. } => true,
    }
}

/// Resolves when request `token` is cancelled, with the GET replacing it
async fn cancelled(commands: &HttpChannel, token: u32) -> Option<Request> {
    loop {
        let command = commands.receive().await;
        if !interrupts(&command, token) {
            debug!("Abort for finished request");
            continue;
        }
        return match command {
            HttpCommand::Get { token, url } => Some((token, url)),
            HttpCommand::Abort(_) => None,
        };
    }
}

/// Serve GET requests for one fetch kind forever
async fn serve(stack: Stack<'_>, kind: FetchKind) -> ! {
    let commands = events::http_commands(kind);
    let deadline = Duration::from_millis(MAX_TIMEOUT_MS);
    let mut next: Option<Request> = None;
    loop {
        let (token, url) = match next.take() {
            Some(request) => request,
            None => match commands.receive().await {
                HttpCommand::Get { token, url } => (token, url),
                HttpCommand::Abort(token) => {
                    debug!("Abort for request {} arrived after it finished", token);
                    continue;
                }
            },
        };

        info!("GET {} ({:?})", url.as_str(), kind);
        let request = with_timeout(deadline, fetch(stack, &url));
        let result = match select(request, cancelled(commands, token)).await {
            Either::First(result) => result.unwrap_or(Err(NetworkError::Timeout)),
            Either::Second(replacement) => {
                info!("Request {} cancelled", token);
                next = replacement;
                continue;
            }
        };

        let event = match result {
            Ok((status, body)) => {
                debug!("Request {} answered {} ({} bytes)", token, status, body.len());
                Event::FetchComplete {
                    kind,
                    token,
                    status,
                    body,
                }
            }
            Err(e) => {
                warn!("Request {} failed: {:?}", token, e);
                Event::FetchError {
                    kind,
                    token,
                    cause: e.into(),
                }
            }
        };
        events::post(event).await;
    }
}

/// Run the time and weather runners side by side
pub async fn run(stack: Stack<'_>) -> ! {
    let (never, _) = join(serve(stack, FetchKind::Time), serve(stack, FetchKind::Weather)).await;
    never
}

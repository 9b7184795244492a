// Connection module
// Accepts a TCP connection and serves it over HTTP/1.1 in its own task

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::{TokioIo, TokioTimer};
use tokio::net::TcpStream;

use crate::config::AppState;
use crate::handler;
use crate::http;
use crate::logger;

/// Accept a connection unless the configured limit is reached.
///
/// The counter is incremented before the limit check and rolled back on
/// rejection, so two racing accepts can never both squeeze past the limit.
pub fn accept_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    state: &Arc<AppState>,
    conn_counter: &Arc<AtomicUsize>,
) {
    let prev_count = conn_counter.fetch_add(1, Ordering::SeqCst);

    if let Some(max_conn) = state.config.performance.max_connections {
        if prev_count >= usize::try_from(max_conn).unwrap_or(usize::MAX) {
            conn_counter.fetch_sub(1, Ordering::SeqCst);
            logger::log_warning(&format!(
                "Max connections reached: {prev_count}/{max_conn}. Connection from {peer_addr} rejected."
            ));
            drop(stream);
            return;
        }
    }

    logger::log_connection_accepted(&peer_addr);
    serve_connection(stream, peer_addr, Arc::clone(state), Arc::clone(conn_counter));
}

/// Serve one connection in a spawned task, then release its slot in the
/// counter.
///
/// Timeouts apply per request, never to the connection as a whole. The wait
/// for a request's headers, including the idle gap before it on a kept-alive
/// connection, is bounded by the larger of `keep_alive_timeout` and
/// `read_timeout`. Reading the body and building the response is bounded by
/// `write_timeout`.
fn serve_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    state: Arc<AppState>,
    conn_counter: Arc<AtomicUsize>,
) {
    tokio::spawn(async move {
        let io = TokioIo::new(stream);

        let performance = &state.config.performance;
        let keep_alive = performance.keep_alive_timeout > 0;
        let header_timeout = if keep_alive {
            performance.keep_alive_timeout.max(performance.read_timeout)
        } else {
            performance.read_timeout
        };
        let request_timeout = Duration::from_secs(performance.write_timeout);

        let mut builder = http1::Builder::new();
        builder
            .timer(TokioTimer::new())
            .header_read_timeout(Duration::from_secs(header_timeout))
            .keep_alive(keep_alive);

        let service_state = Arc::clone(&state);
        let conn = builder.serve_connection(
            io,
            service_fn(move |req| {
                let state = Arc::clone(&service_state);
                async move {
                    let request = handler::handle_request(req, state, peer_addr);
                    match tokio::time::timeout(request_timeout, request).await {
                        Ok(response) => response,
                        Err(_) => {
                            logger::log_warning(&format!(
                                "Request from {peer_addr} timed out after {} seconds",
                                request_timeout.as_secs()
                            ));
                            Ok(http::build_error_response(408, "408 Request Timeout"))
                        }
                    }
                }
            }),
        );

        if let Err(err) = conn.await {
            logger::log_connection_error(&err);
        }

        conn_counter.fetch_sub(1, Ordering::SeqCst);
    });
}

//! Sample server binary wiring every piece together (spec §6): parses the
//! CLI/file configuration, builds a `ServiceContext`, starts the I/O and
//! CPU pools, and binds an HTTP listener. With `--forward` set, `/proxy`
//! forwards the request to the configured upstream and relays its response
//! back, exercising the outbound `client::Client` path end to end.

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use kestrel_rt::client::{Client, HttpCodec};
use kestrel_rt::config::{Args, ResolvedConfig};
use kestrel_rt::context::ServiceContext;
use kestrel_rt::cpu_pool::CpuPool;
use kestrel_rt::dispatcher::{DispatchKey, Dispatcher, Request, Response};
use kestrel_rt::event_handler::EventHandler;
use kestrel_rt::http::{HttpResponse, Method};
use kestrel_rt::io_pool::IoPool;
use kestrel_rt::transport::http::{encode_request, parse_response, HttpTransport};

fn main() -> ExitCode {
    let config = match Args::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("kestrel-server: {e}");
            return ExitCode::FAILURE;
        }
    };

    env_logger::Builder::new()
        .parse_filters(&config.log_level)
        .init();

    run(config)
}

fn run(config: ResolvedConfig) -> ExitCode {
    let read_timeout = Duration::from_millis(config.read_timeout_ms);

    let mut dispatcher = Dispatcher::new();
    register_routes(&mut dispatcher, config.forward, read_timeout);
    dispatcher.freeze();

    let context = ServiceContext::new(
        Arc::new(dispatcher),
        Arc::new(CpuPool::new(config.cpu_threads)),
        read_timeout,
    );

    let pool = match IoPool::new(&context, config.threads) {
        Ok(pool) => pool,
        Err(e) => {
            log::error!("failed to start io pool: {e}");
            return ExitCode::FAILURE;
        }
    };

    let handler = EventHandler::new(context.dispatch.clone(), context.read_timeout);
    if let Err(e) = pool.bind_acceptor(config.addr, || Box::new(HttpTransport::new()), handler) {
        log::error!("failed to bind {}: {}", config.addr, e);
        pool.stop();
        return ExitCode::FAILURE;
    }

    log::info!(
        "kestrel-server listening on {} with {} io thread(s), forward={:?}",
        config.addr,
        config.threads,
        config.forward
    );

    wait_for_shutdown_signal();
    log::info!("shutting down");
    pool.stop();
    ExitCode::SUCCESS
}

fn register_routes(dispatcher: &mut Dispatcher, forward: Option<SocketAddr>, read_timeout: Duration) {
    dispatcher.register(
        DispatchKey::Http {
            method: Method::Get,
            path: "/".into(),
        },
        Arc::new(|_req: Request| Response::Http(HttpResponse::with_body(200, b"kestrel-rt\n".to_vec()))),
    );

    if let Some(upstream) = forward {
        let client = Arc::new(Client::new(Box::new(HttpCodec), read_timeout));
        let upstream = upstream.to_string();
        dispatcher.register(
            DispatchKey::Http {
                method: Method::Get,
                path: "/proxy".into(),
            },
            Arc::new(move |req: Request| forward_request(&client, &upstream, req)),
        );
    }
}

/// Re-serializes the inbound request for `upstream`, stripping hop-by-hop
/// headers on both legs (spec §4.2's Open Question 1: only the forwarding
/// path strips them, never a locally-originated response).
fn forward_request(client: &Client, upstream: &str, req: Request) -> Response {
    let mut message = match req {
        Request::Http(msg) => msg,
        _ => return Response::Http(HttpResponse::with_body(400, b"proxy route is http-only".to_vec())),
    };
    message.headers.strip_per_hop_headers();
    let wire = encode_request(&message);

    match client.call_peer(upstream, &wire) {
        Ok(raw) => match parse_response(&raw) {
            Ok(mut response) => {
                response.headers.strip_per_hop_headers();
                Response::Http(response)
            }
            Err(e) => {
                log::warn!("malformed response from {upstream}: {e}");
                Response::Http(HttpResponse::with_body(502, b"bad gateway".to_vec()))
            }
        },
        Err(e) => {
            log::warn!("forward to {upstream} failed: {e}");
            Response::Http(HttpResponse::with_body(502, b"bad gateway".to_vec()))
        }
    }
}

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn on_shutdown_signal(_signum: libc::c_int) {
    SHUTDOWN.store(true, Ordering::SeqCst);
}

/// Blocks until SIGINT/SIGTERM, for a clean `IoPool::stop()` on exit
/// (spec §6: "exit code 0 on clean shutdown").
fn wait_for_shutdown_signal() {
    unsafe {
        libc::signal(libc::SIGINT, on_shutdown_signal as usize);
        libc::signal(libc::SIGTERM, on_shutdown_signal as usize);
    }
    while !SHUTDOWN.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(100));
    }
}

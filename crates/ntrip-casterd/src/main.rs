//! NTRIP caster daemon entry point: loads configuration, builds a
//! [`CasterContext`], and runs a blocking TCP accept loop that performs
//! source login or client admission on each connection.
//!
//! One thread per source owns that source's ingest-then-fan-out loop end
//! to end; client sockets are handed to that thread rather than given
//! one of their own.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use ntrip_caster::{
    login_client, login_source, CasterContext, ClientId, ClientLoginRequest, ClientChunkState,
    Config, Credentials, Framing, KickReason, NullSourcetableSink, OutputFraming, Socket, Source,
    SourceKind, SourceLoginRequest, SourceState, StaticAuthenticator, WriteAttempt,
};

/// Adapts a nonblocking [`TcpStream`] to the library's [`Socket`] seam.
struct TcpSocket(TcpStream);

impl Socket for TcpSocket {
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }

    fn write_bytes(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }
}

/// Hand-off of newly admitted client sockets to the owning source's
/// thread, parallel to `ntrip_caster::Pool`'s `Client` hand-off — sockets
/// can't live inside the library crate since `Socket` implementations are
/// a binary-crate concern.
#[derive(Default)]
struct SocketPool {
    by_mount: Mutex<HashMap<String, Vec<(ClientId, TcpStream)>>>,
}

impl SocketPool {
    fn add(&self, mount: &str, id: ClientId, stream: TcpStream) {
        self.by_mount
            .lock()
            .expect("socket pool mutex poisoned")
            .entry(mount.to_string())
            .or_default()
            .push((id, stream));
    }

    fn drain(&self, mount: &str) -> Vec<(ClientId, TcpStream)> {
        self.by_mount
            .lock()
            .expect("socket pool mutex poisoned")
            .remove(mount)
            .unwrap_or_default()
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = load_config();
    let bind_addr = std::env::var("NTRIP_CASTERD_BIND").unwrap_or_else(|_| "0.0.0.0:2101".into());

    let ctx = Arc::new(CasterContext::new(
        config.clone(),
        vec!["localhost".into()],
        Arc::new(StaticAuthenticator::new()),
        Arc::new(NullSourcetableSink),
    ));
    let sockets = Arc::new(SocketPool::default());

    let listener = match TcpListener::bind(&bind_addr) {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(error = %e, addr = %bind_addr, "failed to bind");
            std::process::exit(1);
        }
    };
    tracing::info!(addr = %bind_addr, "ntrip-casterd listening");

    for incoming in listener.incoming() {
        let Ok(stream) = incoming else { continue };
        let ctx = Arc::clone(&ctx);
        let sockets = Arc::clone(&sockets);
        thread::spawn(move || handle_connection(ctx, sockets, stream));
    }
}

fn load_config() -> Config {
    match std::env::var("NTRIP_CASTERD_CONFIG") {
        Ok(path) => match std::fs::read_to_string(&path) {
            Ok(body) => match serde_json::from_str(&body) {
                Ok(cfg) => cfg,
                Err(e) => {
                    tracing::warn!(error = %e, path = %path, "invalid config, using defaults");
                    Config::default()
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, path = %path, "could not read config, using defaults");
                Config::default()
            }
        },
        Err(_) => Config::default(),
    }
}

/// One accepted connection: read just enough of the request line and
/// headers (blocking) to decide whether this is a source login (an HTTP
/// `SOURCE`/`PUT` request, or the legacy NTRIP1 `SOURCE <password> <mount>`
/// line) or a client `GET` request, then dispatch.
fn handle_connection(ctx: Arc<CasterContext>, sockets: Arc<SocketPool>, stream: TcpStream) {
    let request = match read_request_head(&stream) {
        Ok(r) => r,
        Err(_) => return,
    };

    if request.is_source {
        handle_source_connection(ctx, sockets, stream, request);
    } else {
        handle_client_connection(ctx, sockets, stream, request);
    }
}

struct RequestHead {
    is_source: bool,
    mount: String,
    host: String,
    port: u16,
    user_agent: String,
    credentials: Credentials,
}

fn read_request_head(stream: &TcpStream) -> io::Result<RequestHead> {
    let mut reader = io::BufReader::new(stream.try_clone()?);
    let mut line = String::new();
    read_line(&mut reader, &mut line)?;

    let mut parts = line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let target = parts.next().unwrap_or("/").to_string();

    let mut host = "localhost".to_string();
    let mut user_agent = String::new();
    let mut credentials = Credentials {
        user: None,
        password: None,
    };

    loop {
        let mut header = String::new();
        if read_line(&mut reader, &mut header)? == 0 || header.trim().is_empty() {
            break;
        }
        if let Some((name, value)) = header.split_once(':') {
            match name.trim().to_ascii_lowercase().as_str() {
                "host" => host = value.trim().to_string(),
                "user-agent" => user_agent = value.trim().to_string(),
                "authorization" => credentials = parse_basic_auth(value.trim()),
                _ => {}
            }
        }
    }

    let is_source = method.eq_ignore_ascii_case("SOURCE") || method.eq_ignore_ascii_case("PUT");
    Ok(RequestHead {
        is_source,
        mount: target,
        host,
        port: 2101,
        user_agent,
        credentials,
    })
}

fn read_line(reader: &mut impl std::io::BufRead, out: &mut String) -> io::Result<usize> {
    reader.read_line(out)
}

fn parse_basic_auth(value: &str) -> Credentials {
    let Some(b64) = value.strip_prefix("Basic ") else {
        return Credentials {
            user: None,
            password: None,
        };
    };
    let Ok(decoded) = base64_decode(b64.trim()) else {
        return Credentials {
            user: None,
            password: None,
        };
    };
    match String::from_utf8_lossy(&decoded).split_once(':') {
        Some((user, pass)) => Credentials {
            user: Some(user.to_string()),
            password: Some(pass.to_string()),
        },
        None => Credentials {
            user: None,
            password: None,
        },
    }
}

/// Minimal base64 decoder for the `Authorization: Basic` header — pulling
/// in a dependency for this one call site isn't worth it.
fn base64_decode(input: &str) -> Result<Vec<u8>, ()> {
    const TABLE: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let mut out = Vec::with_capacity(input.len() / 4 * 3);
    let mut buf = 0u32;
    let mut bits = 0u32;
    for b in input.bytes() {
        if b == b'=' {
            break;
        }
        let val = TABLE.iter().position(|&c| c == b).ok_or(())? as u32;
        buf = (buf << 6) | val;
        bits += 6;
        if bits >= 8 {
            bits -= 8;
            out.push((buf >> bits) as u8);
        }
    }
    Ok(out)
}

fn handle_source_connection(
    ctx: Arc<CasterContext>,
    sockets: Arc<SocketPool>,
    stream: TcpStream,
    request: RequestHead,
) {
    let login = SourceLoginRequest {
        mount: request.mount.clone(),
        user_agent: request.user_agent,
        credentials: request.credentials,
        kind: SourceKind::Http,
        framing: Framing::PlainTcp,
    };

    let source = match login_source(&ctx, true, login) {
        Ok(source) => source,
        Err(e) => {
            tracing::warn!(mount = %request.mount, error = %e, "source login rejected");
            let _ = (&stream).write_all(status_line_for(&e).as_bytes());
            return;
        }
    };

    tracing::info!(mount = %source.mount, "source connected");
    let _ = (&stream).write_all(b"ICY 200 OK\r\n\r\n");
    stream.set_nonblocking(true).ok();

    run_source_loop(ctx, sockets, source, TcpSocket(stream));
}

fn status_line_for(e: &ntrip_caster::LoginError) -> String {
    use ntrip_caster::LoginError::*;
    let code = match e {
        Forbidden | NotNtrip => 403,
        Unauthorized => 401,
        EmptyRequest => 400,
        MountConflict => 409,
        CapacityExceeded => 503,
    };
    format!("HTTP/1.1 {code} {e}\r\n\r\n")
}

fn run_source_loop(
    ctx: Arc<CasterContext>,
    sockets: Arc<SocketPool>,
    source: Arc<Source>,
    mut sock: TcpSocket,
) {
    let cfg = ctx.config.clone();
    let mut client_socks: HashMap<ClientId, TcpSocket> = HashMap::new();
    let max_idle = cfg.read_retry_delay * cfg.read_retries().max(1);

    loop {
        if source.state() == SourceState::Killed {
            break;
        }

        for (id, stream) in sockets.drain(&source.mount) {
            stream.set_nonblocking(true).ok();
            client_socks.insert(id, TcpSocket(stream));
        }
        source.admit_new_clients(ctx.pool());

        match source.ingest_step(&mut sock, &cfg) {
            Ok(_) => {}
            Err(KickReason::SourceDied | KickReason::BrokenConnection) => break,
            Err(_) => {}
        }

        if source.idle_for() > max_idle {
            tracing::warn!(mount = %source.mount, "source read timeout, declaring dead");
            break;
        }

        let written = source.write_to_clients(cfg.chunklen, |id, framing, bytes| {
            let Some(client_sock) = client_socks.get_mut(&id) else {
                return WriteAttempt::Broken;
            };
            write_framed(client_sock, framing, bytes)
        });
        ctx.record_mount_write(&source.mount, written);

        for id in source.kick_dead_clients(&cfg) {
            client_socks.remove(&id);
            ctx.client_disconnected();
        }

        thread::sleep(cfg.read_retry_delay);
    }

    ctx.unregister_source(&source.mount);
    tracing::info!(mount = %source.mount, "source disconnected");
}

/// Writes one slot's worth of payload to a client, prefixing whatever
/// framing that client negotiated at login. Returns the
/// number of *payload* bytes delivered so the caller's cursor accounting
/// stays framing-agnostic.
fn write_framed(sock: &mut TcpSocket, framing: &mut OutputFraming, payload: &[u8]) -> WriteAttempt {
    match framing {
        OutputFraming::PlainTcp | OutputFraming::UdpFramed => match sock.write_bytes(payload) {
            Ok(n) => WriteAttempt::Wrote(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => WriteAttempt::Wrote(0),
            Err(_) => WriteAttempt::Broken,
        },
        OutputFraming::Chunked(state) => {
            if state.left() == 0 {
                let header = ClientChunkState::header_for(payload.len());
                state.start_slot(payload.len());
                if sock.write_bytes(header.as_bytes()).is_err() {
                    return WriteAttempt::Broken;
                }
            }
            match sock.write_bytes(payload) {
                Ok(n) => {
                    if n == payload.len() {
                        let _ = sock.write_bytes(b"\r\n");
                        state.finish_slot();
                    }
                    WriteAttempt::Wrote(n)
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => WriteAttempt::Wrote(0),
                Err(_) => WriteAttempt::Broken,
            }
        }
        OutputFraming::Rtp(rtp) => {
            let header = rtp.next_header(payload.len());
            if sock.write_bytes(&header).is_err() {
                return WriteAttempt::Broken;
            }
            match sock.write_bytes(payload) {
                Ok(n) => WriteAttempt::Wrote(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => WriteAttempt::Wrote(0),
                Err(_) => WriteAttempt::Broken,
            }
        }
    }
}

fn handle_client_connection(
    ctx: Arc<CasterContext>,
    sockets: Arc<SocketPool>,
    stream: TcpStream,
    request: RequestHead,
) {
    let output = OutputFraming::PlainTcp;
    let login = ClientLoginRequest {
        path: request.mount.clone(),
        host: request.host,
        port: request.port,
        credentials: request.credentials,
        output,
        is_udp: false,
    };

    match login_client(&ctx, login) {
        Ok((source, client)) => {
            let id = client.id;
            let _ = (&stream).write_all(b"HTTP/1.1 200 OK\r\n\r\n");
            sockets.add(&source.mount, id, stream);
            ctx.pool().add(&source.mount, client);
            tracing::info!(mount = %source.mount, client = id, "client admitted");
        }
        Err(e) => {
            tracing::warn!(mount = %request.mount, error = %e, "client login rejected");
            let _ = (&stream).write_all(status_line_for(&e).as_bytes());
        }
    }
}

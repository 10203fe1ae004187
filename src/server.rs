//! Listening socket, sequential accept loop and route dispatch
use std::io::{self, Read, Write};
use std::mem;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::os::fd::{FromRawFd, OwnedFd};
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::config::Sources;
use crate::constants::{
    DRAIN_LIMIT, DRAIN_TIMEOUT, LISTEN_BACKLOG, RECV_BUFFER_SIZE, ROUTE_CPU_NAME, ROUTE_HOSTNAME,
    ROUTE_LOAD,
};
use crate::cpu::sample_utilization;
use crate::cpuinfo::read_cpu_name;
use crate::error::{HostInfoError, Result};
use crate::hostname::read_canonical_hostname;
use crate::response::{format_hostname, format_utilization, Response};

/// Create an IPv4 listener on all interfaces with a backlog of one.
///
/// Each syscall maps to its own error class so startup failures exit with
/// distinct codes.
pub fn bind_listener(port: u16) -> Result<TcpListener> {
    let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_STREAM | libc::SOCK_CLOEXEC, 0) };
    if fd < 0 {
        return Err(HostInfoError::SocketCreate(io::Error::last_os_error()));
    }
    // Closes the descriptor on every early return below
    let socket = unsafe { OwnedFd::from_raw_fd(fd) };

    let bind_error = |source| HostInfoError::Bind { port, source };

    let one: libc::c_int = 1;
    let rc = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            &one as *const libc::c_int as *const libc::c_void,
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        return Err(bind_error(io::Error::last_os_error()));
    }

    let mut addr: libc::sockaddr_in = unsafe { mem::zeroed() };
    addr.sin_family = libc::AF_INET as libc::sa_family_t;
    addr.sin_port = port.to_be();
    addr.sin_addr = libc::in_addr {
        s_addr: libc::INADDR_ANY.to_be(),
    };

    let rc = unsafe {
        libc::bind(
            fd,
            &addr as *const libc::sockaddr_in as *const libc::sockaddr,
            mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        return Err(bind_error(io::Error::last_os_error()));
    }

    if unsafe { libc::listen(fd, LISTEN_BACKLOG) } < 0 {
        return Err(HostInfoError::Listen(io::Error::last_os_error()));
    }

    Ok(TcpListener::from(socket))
}

/// The three request targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    CpuName,
    Hostname,
    Load,
}

impl Route {
    /// Exact, case-sensitive prefix match on the raw request bytes.
    pub fn classify(request: &[u8]) -> Option<Route> {
        if request.starts_with(ROUTE_CPU_NAME) {
            Some(Route::CpuName)
        } else if request.starts_with(ROUTE_HOSTNAME) {
            Some(Route::Hostname)
        } else if request.starts_with(ROUTE_LOAD) {
            Some(Route::Load)
        } else {
            None
        }
    }

    /// Produce the response body for this route.
    fn body(self, sources: &Sources) -> Result<String> {
        match self {
            Route::CpuName => read_cpu_name(&sources.cpuinfo),
            Route::Hostname => read_canonical_hostname().map(|name| format_hostname(&name)),
            Route::Load => sample_utilization(&sources.stat).map(format_utilization),
        }
    }
}

/// Map one request to exactly one response.
pub fn dispatch(request: &[u8], sources: &Sources) -> Response {
    let Some(route) = Route::classify(request) else {
        return Response::not_found();
    };

    match route.body(sources) {
        Ok(body) => Response::ok(body),
        Err(err) => {
            warn!(?route, error = %err, "request failed");
            Response::internal_error()
        }
    }
}

/// Buffers and socket for a single accepted connection.
struct ConnectionSession {
    stream: TcpStream,
    recv: Vec<u8>,
    out: String,
}

impl ConnectionSession {
    fn open(stream: TcpStream) -> Result<Self> {
        let mut recv = Vec::new();
        recv.try_reserve_exact(RECV_BUFFER_SIZE)
            .map_err(|_| HostInfoError::Allocation(RECV_BUFFER_SIZE))?;
        recv.resize(RECV_BUFFER_SIZE, 0);

        Ok(Self {
            stream,
            recv,
            out: String::new(),
        })
    }

    /// Single read; an empty slice means the peer sent nothing.
    fn receive(&mut self) -> io::Result<&[u8]> {
        let len = self.stream.read(&mut self.recv)?;
        Ok(&self.recv[..len])
    }

    fn respond(&mut self, response: &Response) -> io::Result<()> {
        response.write_to(&mut self.out);
        self.stream.write_all(self.out.as_bytes())?;
        self.stream.flush()
    }

    /// Half-close, then discard whatever the peer is still sending so the
    /// final close does not reset the connection under the response.
    ///
    /// Returns the number of bytes discarded. Bounded by `DRAIN_LIMIT` bytes
    /// and `DRAIN_TIMEOUT`.
    fn close(mut self) -> io::Result<usize> {
        self.stream.shutdown(Shutdown::Write)?;

        let deadline = Instant::now() + DRAIN_TIMEOUT;
        let mut drained = 0;
        while drained < DRAIN_LIMIT {
            let Some(left) = deadline.checked_duration_since(Instant::now()).filter(|d| !d.is_zero()) else {
                break;
            };
            self.stream.set_read_timeout(Some(left))?;
            match self.stream.read(&mut self.recv) {
                Ok(0) => break,
                Ok(len) => drained += len,
                Err(err) if matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(drained)
    }
}

/// Single-threaded server: one connection is answered and closed before the next accept.
pub struct Server {
    listener: TcpListener,
    sources: Sources,
}

impl Server {
    pub fn new(listener: TcpListener, sources: Sources) -> Self {
        Self { listener, sources }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept forever. Accept failures are logged and the loop continues.
    pub fn run(&self) -> ! {
        if let Ok(addr) = self.local_addr() {
            info!(%addr, stat = %self.sources.stat.display(), cpuinfo = %self.sources.cpuinfo.display(), "listening");
        }

        loop {
            match self.accept() {
                Ok((stream, peer)) => self.serve(stream, peer),
                Err(err) => warn!(error = %err, code = err.exit_code(), "accept failed"),
            }
        }
    }

    fn accept(&self) -> Result<(TcpStream, SocketAddr)> {
        self.listener.accept().map_err(HostInfoError::Accept)
    }

    /// Answer one connection, then drop (close) it.
    fn serve(&self, stream: TcpStream, peer: SocketAddr) {
        let mut session = match ConnectionSession::open(stream) {
            Ok(session) => session,
            Err(err) => {
                warn!(%peer, error = %err, "dropping connection");
                return;
            }
        };

        let response = match session.receive() {
            Ok([]) => {
                debug!(%peer, "connection closed before request");
                return;
            }
            Ok(request) => dispatch(request, &self.sources),
            Err(err) => {
                warn!(%peer, error = %err, "receive failed");
                return;
            }
        };

        debug!(%peer, status = response.status.code(), "responding");
        if let Err(err) = session.respond(&response) {
            warn!(%peer, error = %err, "send failed");
            return;
        }

        match session.close() {
            Ok(0) => {}
            Ok(drained) => debug!(%peer, drained, "discarded unread request bytes"),
            Err(err) => debug!(%peer, error = %err, "close failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use std::thread;
    use std::time::Duration;

    use crate::response::Status;

    fn sources_in(dir: &Path) -> Sources {
        Sources {
            stat: dir.join("stat"),
            cpuinfo: dir.join("cpuinfo"),
        }
    }

    fn spawn_server(sources: Sources) -> SocketAddr {
        let listener = bind_listener(0).unwrap();
        let server = Server::new(listener, sources);
        let port = server.local_addr().unwrap().port();
        thread::spawn(move || {
            server.run();
        });
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn request(addr: SocketAddr, raw: &str) -> String {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.write_all(raw.as_bytes()).unwrap();
        let mut reply = String::new();
        stream.read_to_string(&mut reply).unwrap();
        reply
    }

    fn split_reply(reply: &str) -> (&str, &str) {
        let (head, body) = reply.split_once("\r\n\r\n").unwrap();
        (head.lines().next().unwrap(), body)
    }

    fn is_percent_body(body: &str) -> bool {
        let Some(number) = body.strip_suffix("%\n") else {
            return false;
        };
        let Some((int, frac)) = number.split_once('.') else {
            return false;
        };
        !int.is_empty()
            && int.bytes().all(|b| b.is_ascii_digit())
            && frac.len() == 2
            && frac.bytes().all(|b| b.is_ascii_digit())
    }

    #[test]
    fn test_classify_routes() {
        assert_eq!(Route::classify(b"GET /cpu-name HTTP/1.1\r\n"), Some(Route::CpuName));
        assert_eq!(Route::classify(b"GET /hostname HTTP/1.1\r\n"), Some(Route::Hostname));
        assert_eq!(Route::classify(b"GET /load HTTP/1.1\r\n"), Some(Route::Load));
    }

    #[test]
    fn test_classify_requires_exact_prefix() {
        assert_eq!(Route::classify(b"GET /load"), None);
        assert_eq!(Route::classify(b"GET /loadavg HTTP/1.1\r\n"), None);
        assert_eq!(Route::classify(b"get /load HTTP/1.1\r\n"), None);
        assert_eq!(Route::classify(b"POST /load HTTP/1.1\r\n"), None);
        assert_eq!(Route::classify(b"GET /load?x=1 HTTP/1.1\r\n"), None);
        assert_eq!(Route::classify(b""), None);
    }

    #[test]
    fn test_dispatch_unknown_route() {
        let response = dispatch(b"GET /unknown HTTP/1.1\r\n", &Sources::default());
        assert_eq!(response.status, Status::NotFound);
        assert_eq!(response.body, "404 Not Found\n");
    }

    #[test]
    fn test_dispatch_cpu_name() {
        let dir = tempfile::tempdir().unwrap();
        let sources = sources_in(dir.path());
        fs::write(&sources.cpuinfo, "processor : 0\nmodel name : Example CPU @ 2.00GHz\n").unwrap();

        let response = dispatch(b"GET /cpu-name HTTP/1.1\r\n", &sources);
        assert_eq!(response.status, Status::Ok);
        assert_eq!(response.body, "Example CPU @ 2.00GHz\n");
    }

    #[test]
    fn test_dispatch_missing_field_is_500() {
        let dir = tempfile::tempdir().unwrap();
        let sources = sources_in(dir.path());
        fs::write(&sources.cpuinfo, "processor : 0\n").unwrap();

        let response = dispatch(b"GET /cpu-name HTTP/1.1\r\n", &sources);
        assert_eq!(response.status, Status::InternalServerError);
    }

    #[test]
    fn test_bind_port_in_use() {
        let first = bind_listener(0).unwrap();
        let port = first.local_addr().unwrap().port();
        let err = bind_listener(port).unwrap_err();
        assert!(matches!(err, HostInfoError::Bind { .. }));
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn test_live_unknown_route() {
        let addr = spawn_server(Sources::default());
        let reply = request(addr, "GET /unknown HTTP/1.1\r\n");
        assert_eq!(
            reply,
            "HTTP/1.1 404 Not Found\r\nContent-Type: text/plain\r\n\r\n404 Not Found\n"
        );
    }

    #[test]
    fn test_live_load_from_proc() {
        if !Path::new(crate::constants::PROC_STAT_PATH).exists() {
            return;
        }
        let addr = spawn_server(Sources::default());
        let reply = request(addr, "GET /load HTTP/1.1\r\n");
        let (status, body) = split_reply(&reply);
        assert_eq!(status, "HTTP/1.1 200 OK");
        assert!(is_percent_body(body), "{body:?}");
    }

    #[test]
    fn test_live_load_synthetic_counters() {
        let dir = tempfile::tempdir().unwrap();
        let sources = sources_in(dir.path());
        fs::write(&sources.stat, "cpu  100 0 100 800 0 0 0 0 0 0\n").unwrap();
        let stat = sources.stat.clone();
        let addr = spawn_server(sources);

        // Advance the counters halfway through the sampling window
        let writer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(500));
            fs::write(&stat, "cpu  110 0 115 875 0 0 0 0 0 0\n").unwrap();
        });

        let reply = request(addr, "GET /load HTTP/1.1\r\n");
        writer.join().unwrap();
        let (status, body) = split_reply(&reply);
        assert_eq!(status, "HTTP/1.1 200 OK");
        assert_eq!(body, "25.00%\n");
    }

    #[test]
    fn test_live_failure_then_recovery() {
        let Ok(hostname) = read_canonical_hostname() else {
            return;
        };
        let dir = tempfile::tempdir().unwrap();
        let addr = spawn_server(sources_in(dir.path()));

        let (status, body) = {
            let reply = request(addr, "GET /load HTTP/1.1\r\n");
            let (status, body) = split_reply(&reply);
            (status.to_string(), body.to_string())
        };
        assert_eq!(status, "HTTP/1.1 500 Internal Server Error");
        assert_eq!(body, "500 Internal Server Error\n");

        let reply = request(addr, "GET /hostname HTTP/1.1\r\n");
        let (status, body) = split_reply(&reply);
        assert_eq!(status, "HTTP/1.1 200 OK");
        assert_eq!(body, format!("{hostname}\n"));
    }

    #[test]
    fn test_live_missing_field_then_cpu_name() {
        let dir = tempfile::tempdir().unwrap();
        let sources = sources_in(dir.path());
        fs::write(&sources.cpuinfo, "processor : 0\n").unwrap();
        let cpuinfo = sources.cpuinfo.clone();
        let addr = spawn_server(sources);

        let reply = request(addr, "GET /cpu-name HTTP/1.1\r\n");
        assert_eq!(split_reply(&reply).0, "HTTP/1.1 500 Internal Server Error");

        fs::write(&cpuinfo, "model name : Example CPU @ 2.00GHz\n").unwrap();
        let reply = request(addr, "GET /cpu-name HTTP/1.1\r\n");
        let (status, body) = split_reply(&reply);
        assert_eq!(status, "HTTP/1.1 200 OK");
        assert_eq!(body, "Example CPU @ 2.00GHz\n");
    }

    #[test]
    fn test_live_overflowing_counters_then_recovery() {
        let dir = tempfile::tempdir().unwrap();
        let sources = sources_in(dir.path());
        fs::write(&sources.stat, "cpu 18446744073709551615 5 0 0 0 0 0 0 0 0\n").unwrap();
        fs::write(&sources.cpuinfo, "model name : X\n").unwrap();
        let addr = spawn_server(sources);

        let reply = request(addr, "GET /load HTTP/1.1\r\n");
        let (status, body) = split_reply(&reply);
        assert_eq!(status, "HTTP/1.1 500 Internal Server Error");
        assert_eq!(body, "500 Internal Server Error\n");

        let reply = request(addr, "GET /cpu-name HTTP/1.1\r\n");
        assert_eq!(split_reply(&reply), ("HTTP/1.1 200 OK", "X\n"));
    }

    #[test]
    fn test_live_long_request_gets_clean_close() {
        let addr = spawn_server(Sources::default());
        let mut raw = String::from("GET /nope HTTP/1.1\r\nX-Padding: ");
        raw.push_str(&"a".repeat(4000));
        raw.push_str("\r\n\r\n");

        let reply = request(addr, &raw);
        assert_eq!(
            reply,
            "HTTP/1.1 404 Not Found\r\nContent-Type: text/plain\r\n\r\n404 Not Found\n"
        );
    }

    #[test]
    fn test_live_hostname() {
        let expected = read_canonical_hostname();
        let addr = spawn_server(Sources::default());
        let reply = request(addr, "GET /hostname HTTP/1.1\r\n");
        let (status, body) = split_reply(&reply);
        match expected {
            Ok(name) => {
                assert_eq!(status, "HTTP/1.1 200 OK");
                assert_eq!(body, format!("{name}\n"));
            }
            // Sandboxes without a resolvable hostname
            Err(_) => {
                assert_eq!(status, "HTTP/1.1 500 Internal Server Error");
                assert_eq!(body, "500 Internal Server Error\n");
            }
        }
    }

    #[test]
    fn test_accept_hands_out_connection() {
        let server = Server::new(bind_listener(0).unwrap(), Sources::default());
        let port = server.local_addr().unwrap().port();
        let client = TcpStream::connect(("127.0.0.1", port)).unwrap();

        let (_stream, peer) = server.accept().unwrap();
        assert_eq!(peer, client.local_addr().unwrap());
    }

    #[test]
    fn test_live_empty_connection_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let sources = sources_in(dir.path());
        fs::write(&sources.cpuinfo, "model name : X\n").unwrap();
        let addr = spawn_server(sources);

        let mut silent = TcpStream::connect(addr).unwrap();
        silent.shutdown(std::net::Shutdown::Write).unwrap();
        let mut reply = String::new();
        silent.read_to_string(&mut reply).unwrap();
        assert!(reply.is_empty());

        let reply = request(addr, "GET /cpu-name HTTP/1.1\r\n");
        assert_eq!(split_reply(&reply).1, "X\n");
    }

    #[test]
    fn test_live_one_response_per_connection() {
        let addr = spawn_server(Sources::default());
        let reply = request(addr, "GET /nope HTTP/1.1\r\n\r\nGET /nope HTTP/1.1\r\n\r\n");
        assert_eq!(reply.matches("HTTP/1.1 404").count(), 1);
    }
}

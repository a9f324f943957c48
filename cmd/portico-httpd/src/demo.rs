//! Demo routes.
//!
//! | Route              | Behavior                                      |
//! |--------------------|-----------------------------------------------|
//! | `GET /`            | static greeting                               |
//! | `POST /echo`       | body echoed back                              |
//! | `POST /login`      | body `user:password`, answers a session id    |
//! | `GET /session/<id>`| 200 if the session is live, 401 otherwise     |
//! | `POST /logout/<id>`| ends the session                              |

use portico_core::capability::AuthOutcome;
use portico_core::protocol::{ProtocolHandler, RequestContext, Response};
use tracing::debug;

use crate::users;

const HELLO_BODY: &[u8] = b"Hello from portico!\n";

fn respond(status: &str, body: &[u8]) -> Response {
    let mut out = format!(
        "HTTP/1.1 {status}\r\n\
         Content-Type: text/plain\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         Server: portico-httpd\r\n\
         \r\n",
        body.len()
    )
    .into_bytes();
    out.extend_from_slice(body);
    Response::write(out)
}

pub struct DemoHandler;

impl DemoHandler {
    fn login(&self, cx: &RequestContext<'_>) -> Response {
        let Some(auth) = cx.capabilities.capability(users::NAME, users::VERSION) else {
            return respond("503 Service Unavailable", b"auth unavailable\n");
        };
        let body = String::from_utf8_lossy(cx.request.body());
        let Some((user, password)) = body.trim().split_once(':') else {
            return respond("400 Bad Request", b"expected user:password\n");
        };
        let device = cx
            .request
            .header()
            .and_then(|h| h.header("user-agent"))
            .map(str::to_string);
        match auth.authenticate(user, password, device.as_deref()) {
            AuthOutcome::Granted { session_id } => {
                respond("200 OK", format!("{session_id}\n").as_bytes())
            }
            AuthOutcome::Denied => respond("401 Unauthorized", b"denied\n"),
            AuthOutcome::Blocked => respond("403 Forbidden", b"blocked\n"),
        }
    }

    fn session(&self, cx: &RequestContext<'_>, id: &str, end: bool) -> Response {
        let Some(auth) = cx.capabilities.capability(users::NAME, users::VERSION) else {
            return respond("503 Service Unavailable", b"auth unavailable\n");
        };
        let ok = if end {
            auth.logout(id)
        } else {
            auth.is_session_valid(id)
        };
        if ok {
            respond("200 OK", b"ok\n")
        } else {
            respond("401 Unauthorized", b"no such session\n")
        }
    }
}

impl ProtocolHandler for DemoHandler {
    fn handle(&self, cx: &mut RequestContext<'_>) -> Option<Response> {
        let header = cx.request.header()?;
        let (method, target) = (header.method.as_str(), header.target.as_str());
        debug!(method, target, peer = ?cx.transport.peer_addr(), "[httpd] request");

        let response = match (method, target) {
            ("GET", "/") => respond("200 OK", HELLO_BODY),
            ("POST", "/echo") => respond("200 OK", cx.request.body()),
            ("POST", "/login") => self.login(cx),
            ("GET", t) if t.starts_with("/session/") => {
                self.session(cx, &t["/session/".len()..], false)
            }
            ("POST", t) if t.starts_with("/logout/") => {
                self.session(cx, &t["/logout/".len()..], true)
            }
            _ => respond("404 Not Found", b"404 Not Found\n"),
        };
        Some(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::PasswordTable;
    use portico_core::capability::{Capability, CapabilityLookup};
    use portico_core::protocol::{HeaderParser, WriteType};
    use portico_core::request::Request;
    use portico_core::transport::Transport;
    use portico_module::Http1HeaderParser;
    use std::io::{self, Read, Write};
    use std::net::SocketAddr;
    use std::os::fd::RawFd;
    use std::sync::Arc;

    struct Null;

    impl Read for Null {
        fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
            Ok(0)
        }
    }

    impl Write for Null {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Transport for Null {
        fn shutdown(&mut self) {}
        fn as_raw_fd(&self) -> RawFd {
            -1
        }
        fn peer_addr(&self) -> Option<SocketAddr> {
            None
        }
        fn set_blocking(&mut self, _: bool) -> io::Result<()> {
            Ok(())
        }
    }

    struct Table(Option<Arc<dyn Capability>>);

    impl CapabilityLookup for Table {
        fn capability(&self, name: &str, min_version: u64) -> Option<Arc<dyn Capability>> {
            self.0
                .clone()
                .filter(|c| c.name() == name && c.version() >= min_version)
        }
    }

    fn request(raw: &str) -> Request {
        let bytes = raw.as_bytes().to_vec();
        let parsed = Http1HeaderParser::default().parse(&bytes).unwrap();
        let header_len = raw.find("\r\n\r\n").unwrap() + 4;
        let mut req = Request::new();
        req.record_header(parsed, header_len);
        req.set_bytes(bytes);
        req
    }

    fn call(raw: &str, caps: &Table) -> String {
        let req = request(raw);
        let mut transport = Null;
        let mut cx = RequestContext::new(&req, &mut transport, caps, false);
        let response = DemoHandler.handle(&mut cx).unwrap();
        assert_eq!(response.write_type, WriteType::WriteAndFree);
        String::from_utf8(response.bytes).unwrap()
    }

    fn status(reply: &str) -> &str {
        reply.lines().next().unwrap()
    }

    #[test]
    fn test_routes() {
        let none = Table(None);
        let hello = call("GET / HTTP/1.1\r\n\r\n", &none);
        assert_eq!(status(&hello), "HTTP/1.1 200 OK");
        assert!(hello.ends_with("Hello from portico!\n"));

        let echo = call("POST /echo HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello", &none);
        assert!(echo.contains("Content-Length: 5\r\n"));
        assert!(echo.ends_with("\r\n\r\nhello"));

        assert_eq!(status(&call("GET /nope HTTP/1.1\r\n\r\n", &none)), "HTTP/1.1 404 Not Found");
    }

    #[test]
    fn test_login_without_capability() {
        let reply = call("POST /login HTTP/1.1\r\nContent-Length: 3\r\n\r\na:b", &Table(None));
        assert_eq!(status(&reply), "HTTP/1.1 503 Service Unavailable");
    }

    #[test]
    fn test_login_and_session() {
        let caps = Table(Some(PasswordTable::parse("alice:secret").into_capability()));

        let bad = call("POST /login HTTP/1.1\r\nContent-Length: 6\r\n\r\nnocred", &caps);
        assert_eq!(status(&bad), "HTTP/1.1 400 Bad Request");
        let denied = call("POST /login HTTP/1.1\r\nContent-Length: 7\r\n\r\nalice:x", &caps);
        assert_eq!(status(&denied), "HTTP/1.1 401 Unauthorized");

        let ok = call("POST /login HTTP/1.1\r\nContent-Length: 12\r\n\r\nalice:secret", &caps);
        assert_eq!(status(&ok), "HTTP/1.1 200 OK");
        let session = ok.rsplit("\r\n\r\n").next().unwrap().trim().to_string();

        let live = call(&format!("GET /session/{session} HTTP/1.1\r\n\r\n"), &caps);
        assert_eq!(status(&live), "HTTP/1.1 200 OK");
        let out = call(&format!("POST /logout/{session} HTTP/1.1\r\n\r\n"), &caps);
        assert_eq!(status(&out), "HTTP/1.1 200 OK");
        let gone = call(&format!("GET /session/{session} HTTP/1.1\r\n\r\n"), &caps);
        assert_eq!(status(&gone), "HTTP/1.1 401 Unauthorized");
    }
}

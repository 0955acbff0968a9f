//! The GET-tunnel handshake.
//!
//! After a successful config fetch the tunnel is entered with a bare
//! HTTP GET on the configured endpoint. The gateway does not answer
//! with an HTTP response: on success it sends the literal bytes
//! `START_TUNNEL` and the stream switches to packet framing.

use crate::error::GpstError;
use crate::query::filter_fields;
use crate::transport::Transport;
use tracing::{debug, error, info};

const START_TUNNEL: &[u8] = b"START_TUNNEL";

/// Issue the GET-tunnel request and wait for `START_TUNNEL`.
///
/// Only the `user` and `authcookie` fields of the session cookie are
/// forwarded. An interrupted read propagates untouched with the
/// transport still open so the caller can resume or tear down itself;
/// any other failure means the transport is useless and the caller
/// drops it.
pub fn connect_tunnel(
    transport: &mut dyn Transport,
    urlpath: &str,
    cookie: &str,
) -> Result<(), GpstError> {
    let query = filter_fields(cookie, "user,authcookie", true);
    let request = format!("GET {}?{} HTTP/1.1\r\n\r\n", urlpath, query);
    debug!("Connecting to HTTPS tunnel endpoint {}", urlpath);
    transport.write(request.as_bytes())?;

    let mut buf = [0u8; START_TUNNEL.len()];
    let n = transport.read(&mut buf)?;

    if n == 0 {
        error!("Gateway disconnected immediately after GET-tunnel request");
        return Err(GpstError::Disconnected);
    }
    if buf[..n] == *START_TUNNEL {
        info!("Tunnel session started");
        return Ok(());
    }

    // Not the magic cookie. The gateway is probably sending an HTTP
    // error page; pull in a bit more of it for the log.
    let mut extra = [0u8; 256];
    let mut reply = buf[..n].to_vec();
    match transport.read(&mut extra) {
        Ok(more) => reply.extend_from_slice(&extra[..more]),
        Err(e) if e.is_interrupted() => return Err(e),
        Err(_) => {}
    }
    let printable = String::from_utf8_lossy(&reply);
    error!("Got unexpected response instead of START_TUNNEL: {}", printable);
    Err(GpstError::SetupFailed(format!(
        "unexpected GET-tunnel response: {}",
        printable
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::IoStatus;
    use std::collections::VecDeque;

    /// Transport double replaying scripted read results and recording
    /// everything written to it.
    struct ScriptedTransport {
        reads: VecDeque<Result<Vec<u8>, GpstError>>,
        written: Vec<u8>,
    }

    impl ScriptedTransport {
        fn new(reads: Vec<Result<Vec<u8>, GpstError>>) -> Self {
            Self {
                reads: reads.into(),
                written: Vec::new(),
            }
        }
    }

    impl Transport for ScriptedTransport {
        fn read(&mut self, buf: &mut [u8]) -> Result<usize, GpstError> {
            match self.reads.pop_front() {
                Some(Ok(bytes)) => {
                    let n = bytes.len().min(buf.len());
                    buf[..n].copy_from_slice(&bytes[..n]);
                    Ok(n)
                }
                Some(Err(e)) => Err(e),
                None => Ok(0),
            }
        }

        fn write(&mut self, buf: &[u8]) -> Result<(), GpstError> {
            self.written.extend_from_slice(buf);
            Ok(())
        }

        fn read_nonblock(&mut self, _buf: &mut [u8]) -> Result<IoStatus, GpstError> {
            Ok(IoStatus::WouldBlock)
        }

        fn write_nonblock(&mut self, _buf: &[u8]) -> Result<IoStatus, GpstError> {
            Ok(IoStatus::WouldBlock)
        }
    }

    #[test]
    fn test_successful_handshake() {
        let mut t = ScriptedTransport::new(vec![Ok(b"START_TUNNEL".to_vec())]);
        connect_tunnel(
            &mut t,
            "/ssl-tunnel-connect.sslvpn",
            "user=alice&domain=corp&authcookie=deadbeef",
        )
        .unwrap();

        let sent = String::from_utf8(t.written).unwrap();
        assert_eq!(
            sent,
            "GET /ssl-tunnel-connect.sslvpn?user=alice&authcookie=deadbeef HTTP/1.1\r\n\r\n"
        );
    }

    #[test]
    fn test_immediate_close_is_disconnect() {
        let mut t = ScriptedTransport::new(vec![Ok(Vec::new())]);
        assert!(matches!(
            connect_tunnel(&mut t, "/ssl-tunnel-connect.sslvpn", "authcookie=c"),
            Err(GpstError::Disconnected)
        ));
    }

    #[test]
    fn test_http_error_page_is_setup_failure() {
        let mut t = ScriptedTransport::new(vec![
            Ok(b"HTTP/1.1 502".to_vec()),
            Ok(b" Bad Gateway\r\n\r\n".to_vec()),
        ]);
        match connect_tunnel(&mut t, "/ssl-tunnel-connect.sslvpn", "authcookie=c") {
            Err(GpstError::SetupFailed(msg)) => {
                assert!(msg.contains("HTTP/1.1 502 Bad Gateway"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_short_mismatched_reply_is_setup_failure() {
        let mut t = ScriptedTransport::new(vec![Ok(b"NOPE".to_vec())]);
        assert!(matches!(
            connect_tunnel(&mut t, "/ssl-tunnel-connect.sslvpn", "authcookie=c"),
            Err(GpstError::SetupFailed(_))
        ));
    }

    #[test]
    fn test_interrupted_read_propagates() {
        let mut t = ScriptedTransport::new(vec![Err(GpstError::Interrupted)]);
        assert!(matches!(
            connect_tunnel(&mut t, "/ssl-tunnel-connect.sslvpn", "authcookie=c"),
            Err(GpstError::Interrupted)
        ));
    }

    #[test]
    fn test_interrupted_diagnostic_read_propagates() {
        let mut t = ScriptedTransport::new(vec![
            Ok(b"HTTP/1.1 403".to_vec()),
            Err(GpstError::Interrupted),
        ]);
        assert!(matches!(
            connect_tunnel(&mut t, "/ssl-tunnel-connect.sslvpn", "authcookie=c"),
            Err(GpstError::Interrupted)
        ));
    }
}

use std::io::{Read, Write};

use embedded_hal::{delay::DelayNs, digital::OutputPin};
use log::{debug, info, warn};

use crate::{
    clock::Monotonic, controller::BlindController, error::BlindError, types::Direction,
};

pub const MAX_REQUEST_BYTES: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestLine<'a> {
    pub method: &'a str,
    pub path: &'a str,
}

impl<'a> RequestLine<'a> {
    pub fn parse(request: &'a str) -> Result<Self, BlindError> {
        let line = request.lines().next().unwrap_or_default();
        let mut parts = line.split(' ');
        match (parts.next(), parts.next()) {
            (Some(method), Some(path)) => Ok(Self { method, path }),
            _ => Err(BlindError::MalformedRequest),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Roll(Direction),
    NotFound,
}

impl Route {
    pub fn resolve(request: &RequestLine<'_>) -> Self {
        match (request.method, request.path) {
            ("GET", "/up") => Self::Roll(Direction::Up),
            ("GET", "/down") => Self::Roll(Direction::Down),
            _ => Self::NotFound,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub reason: &'static str,
    pub body: &'static str,
}

impl HttpResponse {
    pub fn rolling(direction: Direction) -> Self {
        Self {
            status: 200,
            reason: "OK",
            body: match direction {
                Direction::Up => "Rolling up...",
                Direction::Down => "Rolling down...",
            },
        }
    }

    pub fn not_found() -> Self {
        Self {
            status: 404,
            reason: "Not Found",
            body: "Not Found",
        }
    }

    pub fn busy() -> Self {
        Self {
            status: 409,
            reason: "Conflict",
            body: "Motor busy",
        }
    }

    pub fn internal_error() -> Self {
        Self {
            status: 500,
            reason: "Internal Server Error",
            body: "Internal Server Error",
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        format!(
            "HTTP/1.1 {} {}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            self.status,
            self.reason,
            self.body.len(),
            self.body
        )
        .into_bytes()
    }
}

pub fn respond<P, D, C>(
    controller: &BlindController<P, D, C>,
    raw: &[u8],
) -> Result<HttpResponse, BlindError>
where
    P: OutputPin,
    D: DelayNs,
    C: Monotonic,
{
    if !controller.is_calibrated() {
        return Err(BlindError::NotCalibrated);
    }

    let request = std::str::from_utf8(raw).map_err(|_| BlindError::MalformedRequest)?;
    let line = RequestLine::parse(request)?;
    debug!("http {} {}", line.method, line.path);

    let direction = match Route::resolve(&line) {
        Route::Roll(direction) => direction,
        Route::NotFound => return Ok(HttpResponse::not_found()),
    };

    info!("http request to roll {}", direction.as_str());
    Ok(match controller.roll(direction) {
        Ok(_) => HttpResponse::rolling(direction),
        Err(BlindError::Busy) => {
            warn!("http roll {} rejected: motor busy", direction.as_str());
            HttpResponse::busy()
        }
        Err(err) => {
            warn!("http roll {} failed: {err}", direction.as_str());
            HttpResponse::internal_error()
        }
    })
}

pub fn serve_connection<S, P, D, C>(
    stream: &mut S,
    controller: &BlindController<P, D, C>,
    max_bytes: usize,
) -> Result<(), BlindError>
where
    S: Read + Write,
    P: OutputPin,
    D: DelayNs,
    C: Monotonic,
{
    if !controller.is_calibrated() {
        return Err(BlindError::NotCalibrated);
    }

    let mut buf = vec![0u8; max_bytes.max(1)];
    let n = match stream.read(&mut buf) {
        Ok(n) => n,
        Err(err) => {
            debug!("http read failed: {err}");
            return Err(BlindError::MalformedRequest);
        }
    };
    if n == 0 {
        return Err(BlindError::MalformedRequest);
    }

    let response = respond(controller, &buf[..n])?;
    if let Err(err) = stream
        .write_all(&response.to_bytes())
        .and_then(|()| stream.flush())
    {
        debug!("http write failed: {err}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{
        io::{self, Cursor},
        time::Duration,
    };

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        controller::tests::{calibrated, sim_controller},
        sim::Relay,
        types::Position,
    };

    #[test]
    fn parses_request_line_only() {
        let line = RequestLine::parse("GET /up HTTP/1.1\r\nHost: blinds\r\n\r\n").unwrap();
        assert_eq!(line, RequestLine { method: "GET", path: "/up" });

        assert_eq!(RequestLine::parse(""), Err(BlindError::MalformedRequest));
        assert_eq!(RequestLine::parse("GET"), Err(BlindError::MalformedRequest));
        assert_eq!(RequestLine::parse("\r\nGET /up"), Err(BlindError::MalformedRequest));
    }

    #[test]
    fn routes_only_get_up_and_down() {
        let route = |method, path| Route::resolve(&RequestLine { method, path });

        assert_eq!(route("GET", "/up"), Route::Roll(Direction::Up));
        assert_eq!(route("GET", "/down"), Route::Roll(Direction::Down));
        assert_eq!(route("POST", "/up"), Route::NotFound);
        assert_eq!(route("GET", "/up?now=1"), Route::NotFound);
        assert_eq!(route("GET", "/"), Route::NotFound);
    }

    #[test]
    fn repeated_spaces_leave_an_empty_path() {
        let line = RequestLine::parse("GET  /up HTTP/1.1").unwrap();

        assert_eq!(line.path, "");
        assert_eq!(Route::resolve(&line), Route::NotFound);
    }

    #[test]
    fn response_encoding() {
        let bytes = HttpResponse::rolling(Direction::Up).to_bytes();

        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 13\r\nConnection: close\r\n\r\nRolling up..."
        );
    }

    #[test]
    fn get_up_rolls_when_calibrated_and_idle() {
        let (controller, journal, _) = calibrated(5, 4);
        controller.roll(Direction::Down).unwrap();

        let response = respond(&controller, b"GET /up HTTP/1.1\r\n\r\n").unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.body, "Rolling up...");
        assert_eq!(controller.position(), Position::Up);
        assert_eq!(journal.on_durations(Relay::Up), vec![Duration::from_secs(4)]);
    }

    #[test]
    fn unknown_path_is_404_without_state_change() {
        let (controller, journal, _) = calibrated(5, 4);
        let before = journal.events().len();

        let response = respond(&controller, b"GET /unknown HTTP/1.1\r\n\r\n").unwrap();

        assert_eq!(response, HttpResponse::not_found());
        assert_eq!(controller.position(), Position::Up);
        assert_eq!(journal.events().len(), before);
    }

    #[test]
    fn roll_while_busy_is_409_and_keeps_position() {
        let (controller, journal, _) = calibrated(5, 4);
        let before = journal.events().len();

        let motion = controller.begin_motion().unwrap();
        let response = respond(&controller, b"GET /down HTTP/1.1\r\n\r\n").unwrap();
        drop(motion);

        assert_eq!(response, HttpResponse::busy());
        assert_eq!(controller.position(), Position::Up);
        assert_eq!(journal.events().len(), before);
        assert!(journal.never_both_on());
    }

    #[test]
    fn uncalibrated_rejects_before_parsing() {
        let (controller, _, _) = sim_controller();

        assert_eq!(
            respond(&controller, b"GET /up HTTP/1.1\r\n\r\n"),
            Err(BlindError::NotCalibrated)
        );
        assert_eq!(respond(&controller, b""), Err(BlindError::NotCalibrated));
    }

    #[test]
    fn malformed_requests_get_no_response() {
        let (controller, _, _) = calibrated(5, 4);

        assert_eq!(respond(&controller, b""), Err(BlindError::MalformedRequest));
        assert_eq!(
            respond(&controller, &[0xff, 0xfe, 0x20, 0x2f]),
            Err(BlindError::MalformedRequest)
        );
        assert_eq!(controller.position(), Position::Up);
    }

    struct MockStream {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl MockStream {
        fn new(request: &[u8]) -> Self {
            Self {
                input: Cursor::new(request.to_vec()),
                output: Vec::new(),
            }
        }
    }

    impl Read for MockStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for MockStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.output.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn serve_connection_writes_response() {
        let (controller, _, _) = calibrated(5, 4);
        let mut stream = MockStream::new(b"GET /down HTTP/1.1\r\nHost: blinds\r\n\r\n");

        serve_connection(&mut stream, &controller, MAX_REQUEST_BYTES).unwrap();

        let written = String::from_utf8(stream.output).unwrap();
        assert!(written.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(written.ends_with("\r\n\r\nRolling down..."));
        assert_eq!(controller.position(), Position::Down);
    }

    #[test]
    fn serve_connection_reads_at_most_max_bytes() {
        let (controller, _, _) = calibrated(5, 4);
        let mut request = b"GET /up HTTP/1.1\r\n".to_vec();
        request.extend(std::iter::repeat(b'x').take(4096));
        let mut stream = MockStream::new(&request);

        serve_connection(&mut stream, &controller, 8).unwrap();

        // "GET /up " parses, so the truncated read still routes.
        assert!(String::from_utf8(stream.output).unwrap().contains("Rolling up..."));
        assert_eq!(stream.input.position(), 8);
    }

    struct SilentStream {
        reads: usize,
        written: usize,
    }

    impl Read for SilentStream {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            self.reads += 1;
            Err(io::ErrorKind::WouldBlock.into())
        }
    }

    impl Write for SilentStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written += buf.len();
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn uncalibrated_connection_is_closed_without_reading() {
        let (controller, _, _) = sim_controller();
        let mut stream = SilentStream {
            reads: 0,
            written: 0,
        };

        assert_eq!(
            serve_connection(&mut stream, &controller, MAX_REQUEST_BYTES),
            Err(BlindError::NotCalibrated)
        );
        assert_eq!(stream.reads, 0);
        assert_eq!(stream.written, 0);
    }

    #[test]
    fn serve_connection_without_calibration_writes_nothing() {
        let (controller, _, _) = sim_controller();
        let mut stream = MockStream::new(b"GET /up HTTP/1.1\r\n\r\n");

        assert_eq!(
            serve_connection(&mut stream, &controller, MAX_REQUEST_BYTES),
            Err(BlindError::NotCalibrated)
        );
        assert!(stream.output.is_empty());
    }
}

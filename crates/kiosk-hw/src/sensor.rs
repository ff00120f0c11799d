//! Distance sensor feed.
//!
//! The proximity microcontroller prints one `distance:<cm>` line per
//! reading over a serial port. A reader thread parses lines and forwards
//! readings; [`SensorFeed::poll`] waits at most the read timeout and returns
//! the freshest reading. Malformed lines and I/O errors are never surfaced
//! to the caller: they are logged and read as "no reading".

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::os::unix::io::AsRawFd;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::time::Duration;
use thiserror::Error;

const LINE_PREFIX: &str = "distance:";
const QUEUE_DEPTH: usize = 32;

#[derive(Error, Debug)]
pub enum SensorError {
    #[error("failed to open sensor device {path}: {source}")]
    Open { path: String, source: io::Error },
    #[error("failed to configure serial port {path}: {source}")]
    Configure { path: String, source: io::Error },
    #[error("unsupported baud rate: {0}")]
    UnsupportedBaud(u32),
    #[error("failed to start reader thread: {0}")]
    Thread(io::Error),
}

/// Parse one sensor line. Returns `None` for anything other than a
/// well-formed, finite, non-negative `distance:<value>` line.
pub fn parse_distance_line(line: &str) -> Option<f32> {
    let value = line.trim().strip_prefix(LINE_PREFIX)?.trim();
    let distance: f32 = value.parse().ok()?;
    (distance.is_finite() && distance >= 0.0).then_some(distance)
}

/// Serial device the feed can reopen after its reader ends.
#[derive(Debug, Clone)]
struct SerialSource {
    path: String,
    baud: u32,
}

pub struct SensorFeed {
    source: Option<SerialSource>,
    rx: Option<Receiver<f32>>,
    read_timeout: Duration,
}

impl SensorFeed {
    /// Open a serial device (or any readable stream path) as the feed.
    pub fn open(path: &str, baud: u32, read_timeout: Duration) -> Result<Self, SensorError> {
        let source = SerialSource {
            path: path.to_string(),
            baud,
        };
        let rx = spawn_serial_reader(&source)?;
        Ok(Self {
            source: Some(source),
            rx: Some(rx),
            read_timeout,
        })
    }

    /// Feed for a device that is not available yet. Every `poll` tries to
    /// open it until it succeeds.
    pub fn unopened(path: &str, baud: u32, read_timeout: Duration) -> Self {
        Self {
            source: Some(SerialSource {
                path: path.to_string(),
                baud,
            }),
            rx: None,
            read_timeout,
        }
    }

    /// Feed backed by an arbitrary reader. It is not reopened once it ends.
    pub fn from_reader<R>(reader: R, read_timeout: Duration) -> Result<Self, SensorError>
    where
        R: BufRead + Send + 'static,
    {
        let rx = spawn_reader("stream".to_string(), reader)?;
        Ok(Self {
            source: None,
            rx: Some(rx),
            read_timeout,
        })
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// Freshest reading received within the read timeout, if any.
    pub fn poll(&mut self) -> Option<f32> {
        let Some(rx) = self.rx.as_ref() else {
            self.reopen();
            return None;
        };

        match rx.recv_timeout(self.read_timeout) {
            Ok(first) => {
                // Older queued readings are stale; keep only the newest.
                let mut latest = first;
                while let Ok(next) = rx.try_recv() {
                    latest = next;
                }
                Some(latest)
            }
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => {
                tracing::warn!("sensor reader stopped");
                self.rx = None;
                None
            }
        }
    }

    /// Try once to reopen the serial device; on failure wait out the read
    /// timeout so callers keep their polling cadence.
    fn reopen(&mut self) {
        let Some(source) = self.source.clone() else {
            std::thread::sleep(self.read_timeout);
            return;
        };

        match spawn_serial_reader(&source) {
            Ok(rx) => {
                tracing::info!(device = %source.path, "sensor feed reopened");
                self.rx = Some(rx);
            }
            Err(e) => {
                tracing::warn!(error = %e, "sensor feed unavailable");
                std::thread::sleep(self.read_timeout);
            }
        }
    }
}

fn spawn_serial_reader(source: &SerialSource) -> Result<Receiver<f32>, SensorError> {
    let file = File::open(&source.path).map_err(|e| SensorError::Open {
        path: source.path.clone(),
        source: e,
    })?;

    match configure_serial(&file, source.baud) {
        Ok(()) => {}
        // Not a TTY (FIFO, replay file): read it as a plain stream.
        Err(SensorError::Configure { source: e, .. }) if e.raw_os_error() == Some(libc::ENOTTY) => {
            tracing::debug!(
                device = %source.path,
                "sensor source is not a tty; skipping serial setup"
            );
        }
        Err(SensorError::Configure { source: e, .. }) => {
            return Err(SensorError::Configure {
                path: source.path.clone(),
                source: e,
            })
        }
        Err(e) => return Err(e),
    }

    tracing::info!(device = %source.path, baud = source.baud, "sensor feed opened");
    spawn_reader(source.path.clone(), BufReader::new(file))
}

fn spawn_reader<R>(name: String, reader: R) -> Result<Receiver<f32>, SensorError>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::sync_channel(QUEUE_DEPTH);
    std::thread::Builder::new()
        .name("kiosk-sensor".into())
        .spawn(move || read_lines(&name, reader, tx))
        .map_err(SensorError::Thread)?;
    Ok(rx)
}

fn read_lines<R: BufRead>(name: &str, mut reader: R, tx: SyncSender<f32>) {
    let mut buf = Vec::with_capacity(64);
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => {
                tracing::info!(source = name, "sensor stream ended");
                return;
            }
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                match parse_distance_line(&line) {
                    Some(distance) => {
                        if tx.send(distance).is_err() {
                            return;
                        }
                    }
                    None => {
                        tracing::trace!(source = name, line = %line.trim(), "ignoring sensor line")
                    }
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::warn!(source = name, error = %e, "sensor read failed");
                return;
            }
        }
    }
}

/// Put the port in raw mode at `baud`, blocking until at least one byte.
fn configure_serial(file: &File, baud: u32) -> Result<(), SensorError> {
    let speed = match baud {
        1200 => libc::B1200,
        2400 => libc::B2400,
        4800 => libc::B4800,
        9600 => libc::B9600,
        19200 => libc::B19200,
        38400 => libc::B38400,
        57600 => libc::B57600,
        115200 => libc::B115200,
        other => return Err(SensorError::UnsupportedBaud(other)),
    };

    let fd = file.as_raw_fd();
    let configure_err = |source: io::Error| SensorError::Configure {
        path: format!("fd {fd}"),
        source,
    };

    // SAFETY: `fd` is a valid open descriptor owned by `file` for the whole
    // block, and `tio` is a plain C struct fully initialized by tcgetattr.
    unsafe {
        let mut tio: libc::termios = std::mem::zeroed();
        if libc::tcgetattr(fd, &mut tio) != 0 {
            return Err(configure_err(io::Error::last_os_error()));
        }
        libc::cfmakeraw(&mut tio);
        if libc::cfsetispeed(&mut tio, speed) != 0 || libc::cfsetospeed(&mut tio, speed) != 0 {
            return Err(configure_err(io::Error::last_os_error()));
        }
        tio.c_cflag |= libc::CLOCAL | libc::CREAD;
        tio.c_cc[libc::VMIN] = 1;
        tio.c_cc[libc::VTIME] = 0;
        if libc::tcsetattr(fd, libc::TCSANOW, &tio) != 0 {
            return Err(configure_err(io::Error::last_os_error()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_parse_well_formed() {
        assert_eq!(parse_distance_line("distance:42.5"), Some(42.5));
        assert_eq!(parse_distance_line("  distance: 80 \r\n"), Some(80.0));
        assert_eq!(parse_distance_line("distance:0"), Some(0.0));
    }

    #[test]
    fn test_parse_malformed() {
        assert_eq!(parse_distance_line(""), None);
        assert_eq!(parse_distance_line("distance:"), None);
        assert_eq!(parse_distance_line("distance:abc"), None);
        assert_eq!(parse_distance_line("range:12"), None);
        assert_eq!(parse_distance_line("distance:-3"), None);
        assert_eq!(parse_distance_line("distance:NaN"), None);
        assert_eq!(parse_distance_line("distance:inf"), None);
    }

    #[test]
    fn test_feed_skips_garbage_and_ends() {
        let input = b"boot ok\ndistance:50\n\xff\xfe\ndistance:120.5\n".to_vec();
        let mut feed =
            SensorFeed::from_reader(Cursor::new(input), Duration::from_millis(200)).unwrap();

        let mut seen = Vec::new();
        while let Some(d) = feed.poll() {
            seen.push(d);
        }
        assert!(!seen.is_empty());
        assert!(seen.iter().all(|d| *d == 50.0 || *d == 120.5));
        assert_eq!(seen.last().copied(), Some(120.5));

        // Stream is exhausted: further polls report no reading.
        assert_eq!(feed.poll(), None);
    }

    #[test]
    fn test_feed_with_only_noise() {
        let input = b"hello\nworld\n".to_vec();
        let mut feed =
            SensorFeed::from_reader(Cursor::new(input), Duration::from_millis(50)).unwrap();
        assert_eq!(feed.poll(), None);
    }

    #[test]
    fn test_open_missing_device() {
        let err = SensorFeed::open("/dev/no-such-sensor", 9600, Duration::from_millis(10));
        assert!(matches!(err, Err(SensorError::Open { .. })));
    }

    #[test]
    fn test_unopened_feed_opens_on_poll() {
        let path =
            std::env::temp_dir().join(format!("kiosk-sensor-late-{}.txt", std::process::id()));
        let mut feed =
            SensorFeed::unopened(path.to_str().unwrap(), 9600, Duration::from_millis(300));
        assert_eq!(feed.poll(), None);

        std::fs::write(&path, "distance:12\n").unwrap();
        // First poll reopens, the next one reads.
        assert_eq!(feed.poll(), None);
        assert_eq!(feed.poll(), Some(12.0));

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_open_plain_file_as_stream() {
        let path = std::env::temp_dir().join(format!("kiosk-sensor-{}.txt", std::process::id()));
        std::fs::write(&path, "distance:33\n").unwrap();

        let mut feed =
            SensorFeed::open(path.to_str().unwrap(), 9600, Duration::from_millis(200)).unwrap();
        assert_eq!(feed.poll(), Some(33.0));

        std::fs::remove_file(&path).ok();
    }
}

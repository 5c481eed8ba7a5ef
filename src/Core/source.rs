// Message sources: where the producer pulls its input from

use std::io;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixDatagram;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

/// Outcome of one receive attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recv {
    /// One message of this many bytes sits at the front of the buffer.
    Message(usize),
    /// A message of this size arrived but does not fit the buffer. It was
    /// consumed and discarded.
    Oversized(usize),
    /// Nothing arrived before the timeout. Not an error.
    Idle,
    /// No more input will ever arrive.
    Eof,
}

/// A descriptor yielding discrete, bounded reads.
///
/// Every call returns at most one message and never blocks longer than
/// `timeout`, so the producer can evaluate rotation deadlines while idle.
pub trait MessageSource: Send {
    fn recv(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<Recv>;

    /// Human-readable name for logs.
    fn label(&self) -> &str;
}

/// Source backed by a raw descriptor: standard input or a bound unix
/// datagram socket. The descriptor is switched to non-blocking mode and
/// restored on drop.
pub struct FdSource {
    fd: RawFd,
    label: String,
    /// Keeps an owned descriptor open for as long as the source lives.
    _owner: Option<OwnedFd>,
    /// Socket file to remove on drop.
    unlink: Option<PathBuf>,
    /// Datagram socket: oversized datagrams are detected and zero-byte reads
    /// are skipped. Otherwise a stream where zero bytes mean end of input.
    datagram: bool,
    original_flags: libc::c_int,
}

impl FdSource {
    /// Read from standard input.
    pub fn stdin() -> io::Result<Self> {
        Self::from_raw(libc::STDIN_FILENO, "stdin".to_string(), None, None, false)
    }

    /// Bind a unix datagram socket at `path` and read datagrams from it.
    /// Fails if `path` already exists.
    pub fn bind_unix_datagram(path: &Path) -> io::Result<Self> {
        let socket = UnixDatagram::bind(path)?;
        let owner: OwnedFd = socket.into();
        let fd = owner.as_raw_fd();
        Self::from_raw(
            fd,
            format!("unix:{}", path.display()),
            Some(owner),
            Some(path.to_path_buf()),
            true,
        )
    }

    fn from_raw(
        fd: RawFd,
        label: String,
        owner: Option<OwnedFd>,
        unlink: Option<PathBuf>,
        datagram: bool,
    ) -> io::Result<Self> {
        let original_flags = set_nonblocking(fd)?;
        Ok(Self {
            fd,
            label,
            _owner: owner,
            unlink,
            datagram,
            original_flags,
        })
    }
}

/// Put `fd` in non-blocking mode and return its previous flags.
fn set_nonblocking(fd: RawFd) -> io::Result<libc::c_int> {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL, 0);
        if flags < 0 {
            return Err(io::Error::last_os_error());
        }
        if libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(flags)
    }
}

impl MessageSource for FdSource {
    fn recv(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<Recv> {
        let mut pfd = libc::pollfd {
            fd: self.fd,
            events: libc::POLLIN,
            revents: 0,
        };
        let timeout_ms = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;

        // Only the wakeup matters; the read below reports the real state.
        let ready = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
        if ready < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(Recv::Idle);
            }
            return Err(err);
        }
        if ready == 0 {
            return Ok(Recv::Idle);
        }

        let n = if self.datagram {
            // MSG_TRUNC reports the full datagram length even when it does not fit.
            unsafe {
                libc::recv(
                    self.fd,
                    buf.as_mut_ptr() as *mut libc::c_void,
                    buf.len(),
                    libc::MSG_TRUNC,
                )
            }
        } else {
            unsafe { libc::read(self.fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) }
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            return match err.kind() {
                io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => Ok(Recv::Idle),
                _ => Err(err),
            };
        }
        match n as usize {
            0 if self.datagram => Ok(Recv::Idle),
            0 => Ok(Recv::Eof),
            n if n > buf.len() => Ok(Recv::Oversized(n)),
            n => Ok(Recv::Message(n)),
        }
    }

    fn label(&self) -> &str {
        &self.label
    }
}

impl Drop for FdSource {
    fn drop(&mut self) {
        unsafe {
            libc::fcntl(self.fd, libc::F_SETFL, self.original_flags);
        }
        if let Some(path) = self.unlink.take() {
            let _ = std::fs::remove_file(path);
        }
    }
}

/// In-process source fed through a channel. Dropping every sender ends the
/// input.
pub struct ChannelSource {
    rx: Receiver<Vec<u8>>,
}

impl ChannelSource {
    pub fn new(rx: Receiver<Vec<u8>>) -> Self {
        Self { rx }
    }

    /// Create a connected sender/source pair.
    pub fn channel() -> (Sender<Vec<u8>>, Self) {
        let (tx, rx) = mpsc::channel();
        (tx, Self::new(rx))
    }
}

impl MessageSource for ChannelSource {
    fn recv(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<Recv> {
        match self.rx.recv_timeout(timeout) {
            Ok(message) if message.len() > buf.len() => Ok(Recv::Oversized(message.len())),
            Ok(message) => {
                buf[..message.len()].copy_from_slice(&message);
                Ok(Recv::Message(message.len()))
            }
            Err(RecvTimeoutError::Timeout) => Ok(Recv::Idle),
            Err(RecvTimeoutError::Disconnected) => Ok(Recv::Eof),
        }
    }

    fn label(&self) -> &str {
        "channel"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_source_reports_each_state() {
        let (tx, mut source) = ChannelSource::channel();
        let mut buf = [0u8; 8];

        tx.send(b"hello".to_vec()).unwrap();
        tx.send(vec![0u8; 9]).unwrap();

        assert_eq!(
            source.recv(&mut buf, Duration::from_millis(10)).unwrap(),
            Recv::Message(5)
        );
        assert_eq!(&buf[..5], b"hello");
        assert_eq!(
            source.recv(&mut buf, Duration::from_millis(10)).unwrap(),
            Recv::Oversized(9)
        );
        assert_eq!(
            source.recv(&mut buf, Duration::from_millis(10)).unwrap(),
            Recv::Idle
        );

        drop(tx);
        assert_eq!(
            source.recv(&mut buf, Duration::from_millis(10)).unwrap(),
            Recv::Eof
        );
    }

    #[test]
    fn unix_datagram_source_reads_whole_datagrams() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.sock");
        let mut source = FdSource::bind_unix_datagram(&path).unwrap();

        let client = UnixDatagram::unbound().unwrap();
        client.send_to(b"first", &path).unwrap();
        client.send_to(b"second", &path).unwrap();

        let mut buf = [0u8; 64];
        assert_eq!(
            source.recv(&mut buf, Duration::from_secs(1)).unwrap(),
            Recv::Message(5)
        );
        assert_eq!(&buf[..5], b"first");
        assert_eq!(
            source.recv(&mut buf, Duration::from_secs(1)).unwrap(),
            Recv::Message(6)
        );
        assert_eq!(&buf[..6], b"second");
        assert_eq!(
            source.recv(&mut buf, Duration::from_millis(10)).unwrap(),
            Recv::Idle
        );

        drop(source);
        assert!(!path.exists());
    }

    #[test]
    fn oversized_datagram_is_rejected_not_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.sock");
        let mut source = FdSource::bind_unix_datagram(&path).unwrap();

        let client = UnixDatagram::unbound().unwrap();
        client.send_to(&[7u8; 100], &path).unwrap();
        client.send_to(b"fits", &path).unwrap();

        let mut buf = [0u8; 16];
        assert_eq!(
            source.recv(&mut buf, Duration::from_secs(1)).unwrap(),
            Recv::Oversized(100)
        );
        // The oversized datagram is gone; the next one is intact.
        assert_eq!(
            source.recv(&mut buf, Duration::from_secs(1)).unwrap(),
            Recv::Message(4)
        );
        assert_eq!(&buf[..4], b"fits");
    }
}

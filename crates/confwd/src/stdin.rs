//! Local standard input copied to the child.

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};

/// Copy `reader` into `writer` until end of input, a write failure, or
/// `running` is cleared. Returns the number of bytes forwarded.
///
/// A blocked read is not interrupted by clearing `running`; callers cancel
/// the read or close the source to unblock it.
pub fn pump<R, W>(
    mut reader: R,
    mut writer: W,
    running: &AtomicBool,
    buffer_len: usize,
) -> io::Result<u64>
where
    R: Read,
    W: Write,
{
    let mut buffer = vec![0u8; buffer_len.max(1)];
    let mut total = 0u64;
    while running.load(Ordering::Acquire) {
        let n = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
            Err(error) => return Err(error),
        };
        if !running.load(Ordering::Acquire) {
            break;
        }
        writer.write_all(&buffer[..n])?;
        writer.flush()?;
        total += n as u64;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Flaky<'a> {
        data: &'a [u8],
        interrupted: bool,
    }

    impl Read for Flaky<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if !self.interrupted {
                self.interrupted = true;
                return Err(io::Error::from(io::ErrorKind::Interrupted));
            }
            let n = self.data.len().min(buf.len()).min(3);
            buf[..n].copy_from_slice(&self.data[..n]);
            self.data = &self.data[n..];
            Ok(n)
        }
    }

    #[test]
    fn copies_everything_until_eof() {
        let mut out = Vec::new();
        let n = pump(&b"status\nquit\n"[..], &mut out, &AtomicBool::new(true), 4).unwrap();
        assert_eq!(n, 12);
        assert_eq!(out, b"status\nquit\n");
    }

    #[test]
    fn interrupted_reads_are_retried() {
        let reader = Flaky {
            data: b"hello",
            interrupted: false,
        };
        let mut out = Vec::new();
        pump(reader, &mut out, &AtomicBool::new(true), 64).unwrap();
        assert_eq!(out, b"hello");
    }

    #[test]
    fn stopped_pump_forwards_nothing() {
        let mut out = Vec::new();
        let n = pump(&b"data"[..], &mut out, &AtomicBool::new(false), 64).unwrap();
        assert_eq!(n, 0);
        assert!(out.is_empty());
    }

    #[test]
    fn write_failure_is_returned() {
        struct Closed;
        impl Write for Closed {
            fn write(&mut self, _: &[u8]) -> io::Result<usize> {
                Err(io::Error::from(io::ErrorKind::BrokenPipe))
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }
        let error = pump(&b"x"[..], Closed, &AtomicBool::new(true), 8).unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::BrokenPipe);
    }
}

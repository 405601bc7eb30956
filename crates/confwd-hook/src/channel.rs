//! Frame sink shared by every interceptor.
//!
//! Interceptors on any thread call [`RelayChannel::send`]. A frame is written
//! only after a relay has connected, only if it carries a payload, and always
//! as one header-plus-payload unit under the channel lock, so frames from
//! concurrent writers never interleave.
//!
//! Stream payloads larger than one frame can carry are split across several
//! frames. Other kinds are forwarded whole or not at all.
//!
//! A failed write marks the channel disconnected; output then flows to the
//! real console only, as it would without the hook.

use std::io::{self, Write};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use confwd_wire::{IconImage, MAX_PAYLOAD_LEN, MessageKind, encode};

/// Serialized writer for the output pipe.
#[derive(Debug)]
pub struct RelayChannel<W> {
    writer: Mutex<Option<W>>,
    connected: AtomicBool,
}

impl<W> Default for RelayChannel<W> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W> RelayChannel<W> {
    pub const fn new() -> Self {
        Self {
            writer: Mutex::new(None),
            connected: AtomicBool::new(false),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Install the connected pipe and start forwarding.
    pub fn attach(&self, writer: W) {
        if let Ok(mut slot) = self.writer.lock() {
            *slot = Some(writer);
            self.connected.store(true, Ordering::Release);
        }
    }

    /// Stop forwarding and hand back the writer, if one was attached.
    pub fn detach(&self) -> Option<W> {
        self.connected.store(false, Ordering::Release);
        self.writer.lock().ok().and_then(|mut slot| slot.take())
    }
}

impl<W: Write> RelayChannel<W> {
    /// Forward one frame. Returns `true` if it was written.
    ///
    /// Empty payloads and sends before a relay connects are dropped.
    pub fn send(&self, kind: MessageKind, payload: &[u8]) -> bool {
        if payload.is_empty() || !self.is_connected() {
            return false;
        }
        let chunk_len = match kind {
            MessageKind::Stdout | MessageKind::Stderr => MAX_PAYLOAD_LEN,
            _ => payload.len(),
        };
        let frames = match payload
            .chunks(chunk_len)
            .map(|chunk| encode(kind, chunk))
            .collect::<Result<Vec<_>, _>>()
        {
            Ok(frames) => frames,
            Err(error) => {
                tracing::debug!(?kind, %error, "dropping unencodable frame");
                return false;
            }
        };

        let Ok(mut slot) = self.writer.lock() else {
            return false;
        };
        let Some(writer) = slot.as_mut() else {
            return false;
        };
        match frames
            .iter()
            .try_for_each(|frame| write_all_flush(writer, frame))
        {
            Ok(()) => true,
            Err(error) => {
                tracing::debug!(?kind, %error, "relay write failed; disconnecting");
                self.connected.store(false, Ordering::Release);
                *slot = None;
                false
            }
        }
    }

    pub fn send_text(&self, kind: MessageKind, text: &str) -> bool {
        self.send(kind, text.as_bytes())
    }

    pub fn send_attribute(&self, attribute: u16) -> bool {
        self.send(MessageKind::StatusLineAttribute, &attribute.to_le_bytes())
    }

    pub fn send_icon(&self, icon: &IconImage) -> bool {
        match icon.to_bytes() {
            Ok(bytes) => self.send(MessageKind::Icon, &bytes),
            Err(error) => {
                tracing::debug!(%error, "icon not forwarded");
                false
            }
        }
    }
}

fn write_all_flush<W: Write>(writer: &mut W, frame: &[u8]) -> io::Result<()> {
    writer.write_all(frame)?;
    writer.flush()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use confwd_wire::FrameReader;

    use super::*;

    struct Failing;

    impl Write for Failing {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn frames(bytes: Vec<u8>) -> Vec<(u8, Vec<u8>)> {
        FrameReader::new(bytes.as_slice())
            .map(|f| f.map(|f| (f.kind, f.payload)))
            .collect::<io::Result<_>>()
            .unwrap()
    }

    #[test]
    fn drops_frames_before_connect() {
        let channel = RelayChannel::<Vec<u8>>::new();
        assert!(!channel.send(MessageKind::Stdout, b"early"));
        channel.attach(Vec::<u8>::new());
        assert!(channel.send(MessageKind::Stdout, b"late"));
        let written = channel.detach().unwrap();
        assert_eq!(frames(written), vec![(0x01, b"late".to_vec())]);
    }

    #[test]
    fn never_sends_empty_payload() {
        let channel = RelayChannel::new();
        channel.attach(Vec::<u8>::new());
        assert!(!channel.send(MessageKind::Stdout, b""));
        assert!(!channel.send_text(MessageKind::Title, ""));
        assert!(channel.detach().unwrap().is_empty());
    }

    #[test]
    fn attribute_is_little_endian_word() {
        let channel = RelayChannel::new();
        channel.attach(Vec::<u8>::new());
        channel.send_attribute(0x008A);
        let written = channel.detach().unwrap();
        assert_eq!(written, vec![0x04, 2, 0, 0, 0, 0x8A, 0x00]);
    }

    #[test]
    fn failed_write_disconnects() {
        let channel = RelayChannel::new();
        channel.attach(Failing);
        assert!(!channel.send(MessageKind::Stderr, b"x"));
        assert!(!channel.is_connected());
        assert!(channel.detach().is_none());
    }

    #[test]
    fn oversized_stdout_is_split_into_readable_frames() {
        let payload = vec![b'x'; MAX_PAYLOAD_LEN + 17];
        let channel = RelayChannel::new();
        channel.attach(Vec::<u8>::new());
        assert!(channel.send(MessageKind::Stdout, &payload));
        let written = frames(channel.detach().unwrap());
        let lens: Vec<usize> = written.iter().map(|(_, p)| p.len()).collect();
        assert_eq!(lens, vec![MAX_PAYLOAD_LEN, 17]);
        assert!(written.iter().all(|(kind, _)| *kind == 0x01));
    }

    #[test]
    fn oversized_title_is_dropped_whole() {
        let title = vec![b't'; MAX_PAYLOAD_LEN + 1];
        let channel = RelayChannel::new();
        channel.attach(Vec::<u8>::new());
        assert!(!channel.send(MessageKind::Title, &title));
        assert!(channel.is_connected());
        assert!(channel.detach().unwrap().is_empty());
    }

    #[test]
    fn icon_frame_carries_serialized_image() {
        let icon = IconImage {
            width: 16,
            height: 32,
            bits_per_pixel: 1,
            mask: vec![0xFF; 64],
            ..IconImage::default()
        };
        let channel = RelayChannel::new();
        channel.attach(Vec::<u8>::new());
        assert!(channel.send_icon(&icon));
        let written = frames(channel.detach().unwrap());
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].0, 0x06);
        assert_eq!(IconImage::from_bytes(&written[0].1).unwrap(), icon);
    }

    #[test]
    fn concurrent_senders_never_interleave() {
        let channel = Arc::new(RelayChannel::new());
        channel.attach(Vec::<u8>::new());
        let handles: Vec<_> = (0..4u8)
            .map(|n| {
                let channel = Arc::clone(&channel);
                thread::spawn(move || {
                    let payload = vec![n; 300];
                    for _ in 0..50 {
                        channel.send(MessageKind::Stdout, &payload);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let written = frames(channel.detach().unwrap());
        assert_eq!(written.len(), 200);
        for (_, payload) in written {
            assert_eq!(payload.len(), 300);
            assert!(payload.iter().all(|b| *b == payload[0]));
        }
    }
}

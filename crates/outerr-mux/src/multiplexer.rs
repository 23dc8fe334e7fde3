use std::io::{ErrorKind, Write};
use std::sync::Arc;

use outerr_frame::{FrameWriter, Stream};
use outerr_transport::{DatagramSocket, Endpoint};
use tracing::{debug, trace, warn};

use crate::disposition::Disposition;
use crate::error::{MuxError, Result};
use crate::watch::ChildWatch;

/// The two child-side addresses datagrams are classified against.
#[derive(Debug, Clone, Copy)]
pub struct Endpoints {
    pub output: Endpoint,
    pub error: Endpoint,
}

impl Endpoints {
    /// Map a sender address to the stream it speaks for.
    pub fn classify(&self, sender: &Endpoint) -> Option<Stream> {
        if *sender == self.output {
            Some(Stream::Out)
        } else if *sender == self.error {
            Some(Stream::Err)
        } else {
            None
        }
    }
}

/// Counters kept by one multiplexer run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MuxStats {
    /// Frames written to the combined output.
    pub frames: u64,
    /// Payload bytes written to the combined output.
    pub bytes: u64,
    /// Datagrams dropped because their sender was not a child endpoint.
    pub discarded: u64,
}

/// Receive loop: master socket in, framed combined stream out.
///
/// Blocks on the master socket until the child terminates; the child watch
/// then switches the socket to non-blocking mode and the first empty
/// receive ends the loop, after every queued datagram has been framed.
pub struct Multiplexer<'a, W: Write> {
    master: &'a DatagramSocket,
    endpoints: Endpoints,
    watch: Arc<ChildWatch>,
    writer: FrameWriter<W>,
    buf: Vec<u8>,
    stats: MuxStats,
}

impl<'a, W: Write> Multiplexer<'a, W> {
    /// Build a multiplexer whose receive buffer starts at `capacity` bytes.
    /// Larger datagrams grow it; none is ever cut short.
    pub fn new(
        master: &'a DatagramSocket,
        endpoints: Endpoints,
        watch: Arc<ChildWatch>,
        writer: FrameWriter<W>,
        capacity: usize,
    ) -> Self {
        Self {
            master,
            endpoints,
            watch,
            writer,
            buf: vec![0u8; capacity],
            stats: MuxStats::default(),
        }
    }

    /// Run until the child has terminated and the master queue is empty.
    pub fn run(&mut self) -> Result<Disposition> {
        loop {
            match self.master.recv_from(&mut self.buf) {
                Ok((len, sender)) => self.dispatch(len, &sender)?,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                // Only the child watch makes the socket non-blocking, and it
                // publishes the status first.
                Err(err) if err.kind() == ErrorKind::WouldBlock => break,
                Err(err) => return Err(MuxError::Receive(err)),
            }
        }

        self.writer.flush()?;
        debug!(
            frames = self.stats.frames,
            bytes = self.stats.bytes,
            discarded = self.stats.discarded,
            "drained master socket"
        );
        self.watch.disposition().ok_or(MuxError::MissingDisposition)
    }

    fn dispatch(&mut self, len: usize, sender: &Endpoint) -> Result<()> {
        let Some(stream) = self.endpoints.classify(sender) else {
            warn!(len, ?sender, "discarding datagram from unknown sender");
            self.stats.discarded += 1;
            return Ok(());
        };
        trace!(%stream, len, "frame");
        self.writer.write_chunk(stream, &self.buf[..len])?;
        self.stats.frames += 1;
        self.stats.bytes += len as u64;
        Ok(())
    }

    /// Counters accumulated so far.
    pub fn stats(&self) -> MuxStats {
        self.stats
    }

    /// Consume the multiplexer and return the frame writer.
    pub fn into_writer(self) -> FrameWriter<W> {
        self.writer
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::os::fd::AsRawFd;
    use std::thread;
    use std::time::Duration;

    use outerr_frame::{Frame, FrameReader};

    use super::*;

    struct Rig {
        master: DatagramSocket,
        output: DatagramSocket,
        error: DatagramSocket,
        watch: Arc<ChildWatch>,
    }

    impl Rig {
        fn new() -> Self {
            let master = DatagramSocket::bind_anonymous().unwrap();
            let output = DatagramSocket::bind_anonymous().unwrap();
            let error = DatagramSocket::bind_anonymous().unwrap();
            output.connect(master.local_endpoint()).unwrap();
            error.connect(master.local_endpoint()).unwrap();
            let watch = ChildWatch::new();
            watch.arm(master.as_raw_fd());
            Self {
                master,
                output,
                error,
                watch,
            }
        }

        fn endpoints(&self) -> Endpoints {
            Endpoints {
                output: *self.output.local_endpoint(),
                error: *self.error.local_endpoint(),
            }
        }

        fn multiplexer(&self, capacity: usize) -> Multiplexer<'_, Cursor<Vec<u8>>> {
            Multiplexer::new(
                &self.master,
                self.endpoints(),
                Arc::clone(&self.watch),
                FrameWriter::new(Cursor::new(Vec::new())),
                capacity,
            )
        }
    }

    fn frames_of(mux: Multiplexer<'_, Cursor<Vec<u8>>>) -> Vec<Frame> {
        let wire = mux.into_writer().into_inner().into_inner();
        FrameReader::new(Cursor::new(wire))
            .map(|f| f.unwrap())
            .collect()
    }

    #[test]
    fn classify_matches_exact_endpoints_only() {
        let rig = Rig::new();
        let endpoints = rig.endpoints();
        assert_eq!(endpoints.classify(rig.output.local_endpoint()), Some(Stream::Out));
        assert_eq!(endpoints.classify(rig.error.local_endpoint()), Some(Stream::Err));
        assert_eq!(endpoints.classify(rig.master.local_endpoint()), None);
    }

    #[test]
    fn frames_follow_send_order_across_streams() {
        let rig = Rig::new();
        rig.output.send(b"a\n").unwrap();
        rig.error.send(b"b\n").unwrap();
        rig.output.send(b"c\n").unwrap();
        rig.watch.record(0);

        let mut mux = rig.multiplexer(1024);
        assert_eq!(mux.run().unwrap(), Disposition::Exited(0));
        assert_eq!(
            mux.stats(),
            MuxStats {
                frames: 3,
                bytes: 6,
                discarded: 0
            }
        );
        assert_eq!(
            frames_of(mux),
            vec![
                Frame::new(Stream::Out, &b"a\n"[..]),
                Frame::new(Stream::Err, &b"b\n"[..]),
                Frame::new(Stream::Out, &b"c\n"[..]),
            ]
        );
    }

    #[test]
    fn unknown_sender_is_discarded() {
        let rig = Rig::new();
        let stranger = DatagramSocket::bind_anonymous().unwrap();
        stranger.connect(rig.master.local_endpoint()).unwrap();

        stranger.send(b"noise").unwrap();
        rig.error.send(b"kept").unwrap();
        rig.watch.record(3 << 8);

        let mut mux = rig.multiplexer(1024);
        assert_eq!(mux.run().unwrap(), Disposition::Exited(3));
        assert_eq!(mux.stats().discarded, 1);
        assert_eq!(frames_of(mux), vec![Frame::new(Stream::Err, &b"kept"[..])]);
    }

    #[test]
    fn datagram_after_exit_notification_is_drained() {
        let rig = Rig::new();
        rig.output.send(b"first").unwrap();
        rig.watch.record(libc::SIGTERM);
        // Lands just behind the exit notification.
        rig.output.send(b"last").unwrap();

        let mut mux = rig.multiplexer(1024);
        assert_eq!(mux.run().unwrap(), Disposition::Signaled(libc::SIGTERM));
        assert_eq!(
            frames_of(mux),
            vec![
                Frame::new(Stream::Out, &b"first"[..]),
                Frame::new(Stream::Out, &b"last"[..]),
            ]
        );
    }

    #[test]
    fn blocked_receive_picks_up_final_datagram() {
        let rig = Rig::new();
        let watch = Arc::clone(&rig.watch);
        let output_fd = rig.output.as_raw_fd();
        let endpoints = rig.endpoints();

        let child = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            watch.record(5 << 8);
            // SAFETY: the descriptor stays open until the test joins this thread.
            let rc = unsafe { libc::send(output_fd, b"tail".as_ptr().cast(), 4, 0) };
            assert_eq!(rc, 4);
        });

        let mut mux = Multiplexer::new(
            &rig.master,
            endpoints,
            Arc::clone(&rig.watch),
            FrameWriter::new(Cursor::new(Vec::new())),
            1024,
        );
        assert_eq!(mux.run().unwrap(), Disposition::Exited(5));
        child.join().unwrap();
        assert_eq!(frames_of(mux), vec![Frame::new(Stream::Out, &b"tail"[..])]);
    }

    #[test]
    fn datagram_larger_than_buffer_is_framed_whole() {
        let rig = Rig::new();
        let big: Vec<u8> = (0..64u8).collect();
        rig.output.send(&big).unwrap();
        rig.error.send(b"after").unwrap();
        rig.watch.record(0);

        let mut mux = rig.multiplexer(16);
        mux.run().unwrap();
        assert_eq!(mux.stats().bytes, 69);
        assert_eq!(
            frames_of(mux),
            vec![
                Frame::new(Stream::Out, big),
                Frame::new(Stream::Err, &b"after"[..]),
            ]
        );
    }

    #[test]
    fn output_failure_is_fatal() {
        struct Closed;
        impl Write for Closed {
            fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
                Err(std::io::Error::from(ErrorKind::BrokenPipe))
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let rig = Rig::new();
        rig.output.send(b"x").unwrap();
        rig.watch.record(0);

        let mut mux = Multiplexer::new(
            &rig.master,
            rig.endpoints(),
            Arc::clone(&rig.watch),
            FrameWriter::new(Closed),
            64,
        );
        let err = mux.run().unwrap_err();
        assert!(matches!(err, MuxError::Output(_)));
        assert!(err.to_string().starts_with("write combined output"));
    }
}

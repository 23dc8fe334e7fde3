//! Exported `write`/`writev` interceptors.
//!
//! Each call goes to the original primitive once, unchanged. Only an
//! `EMSGSIZE` failure is taken over by the retry engine; every other result,
//! success or error, is returned exactly as the original produced it.

use std::io;

use libc::iovec;

use crate::retry::{is_too_large, write_chunked, writev_chunked, Primitive};

/// Scalar write with `EMSGSIZE` recovery.
pub fn reliable_write<P: Primitive + ?Sized>(
    primitive: &P,
    buf: &[u8],
    limit: usize,
) -> io::Result<usize> {
    match primitive.write(buf) {
        Err(err) if is_too_large(&err) => write_chunked(primitive, buf, limit),
        other => other,
    }
}

/// Vectored write with `EMSGSIZE` recovery.
pub fn reliable_writev<P: Primitive + ?Sized>(
    primitive: &P,
    iov: &[iovec],
    limit: usize,
) -> io::Result<usize> {
    match primitive.writev(iov) {
        Err(err) if is_too_large(&err) => writev_chunked(primitive, iov, limit),
        other => other,
    }
}

/// Translate into the C return convention.
#[cfg_attr(test, allow(dead_code))]
fn to_ssize(result: io::Result<usize>) -> libc::ssize_t {
    match result {
        Ok(n) => n as libc::ssize_t,
        Err(err) => {
            crate::sys::set_errno(err.raw_os_error().unwrap_or(libc::EIO));
            -1
        }
    }
}

#[cfg_attr(test, allow(dead_code))]
fn limit() -> usize {
    crate::budget::chunk_limit(crate::budget::send_buffer())
}

// Not exported from the test harness, where they would replace the test
// binary's own `write`.
#[cfg(not(test))]
mod exports {
    use libc::{c_int, c_void, iovec, size_t, ssize_t};

    use super::{limit, reliable_write, reliable_writev, to_ssize};
    use crate::sys::{real_write, real_writev, Original};

    /// # Safety
    /// Same contract as `write(2)`.
    #[no_mangle]
    pub unsafe extern "C" fn write(fd: c_int, buf: *const c_void, count: size_t) -> ssize_t {
        if count == 0 || buf.is_null() {
            return real_write(fd, buf, count);
        }
        crate::ffi_boundary(-1, || {
            let data = std::slice::from_raw_parts(buf.cast::<u8>(), count);
            to_ssize(reliable_write(&Original::new(fd), data, limit()))
        })
    }

    /// # Safety
    /// Same contract as `writev(2)`.
    #[no_mangle]
    pub unsafe extern "C" fn writev(fd: c_int, iov: *const iovec, iovcnt: c_int) -> ssize_t {
        if iovcnt <= 0 || iov.is_null() {
            return real_writev(fd, iov, iovcnt);
        }
        crate::ffi_boundary(-1, || {
            let segments = std::slice::from_raw_parts(iov, iovcnt as usize);
            to_ssize(reliable_writev(&Original::new(fd), segments, limit()))
        })
    }
}

#[cfg(test)]
mod tests {
    use std::os::fd::{AsFd, AsRawFd};
    use std::os::unix::net::UnixDatagram;
    use std::thread;

    use outerr_transport::budget::send_buffer_of;

    use super::*;
    use crate::budget::chunk_limit;
    use crate::retry::tests::{iov_of, Capped};
    use crate::sys::Original;

    #[test]
    fn first_attempt_result_passes_through() {
        let sink = Capped::new(64);
        assert_eq!(reliable_write(&sink, b"small", 16).unwrap(), 5);
        assert_eq!(sink.sends.borrow().len(), 1);

        let mut broken = Capped::new(64);
        broken.fail_after = Some(0);
        let err = reliable_write(&broken, b"x", 16).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EPIPE));
    }

    #[test]
    fn short_first_attempt_is_not_retried() {
        let mut sink = Capped::new(64);
        sink.short_by = 2;
        assert_eq!(reliable_write(&sink, b"partial", 16).unwrap(), 5);
        assert_eq!(sink.sends.borrow().len(), 1);
    }

    #[test]
    fn vectored_first_attempt_passes_through() {
        let sink = Capped::new(64);
        let parts = vec![b"ab".to_vec(), b"cd".to_vec()];
        assert_eq!(reliable_writev(&sink, &iov_of(&parts), 16).unwrap(), 4);
        assert_eq!(sink.joined(), b"abcd");
    }

    #[test]
    fn c_convention_sets_errno() {
        crate::sys::set_errno(0);
        let rc = to_ssize(Err(io::Error::from_raw_os_error(libc::EBADF)));
        assert_eq!(rc, -1);
        assert_eq!(crate::sys::errno(), libc::EBADF);
        assert_eq!(to_ssize(Ok(12)), 12);
    }

    /// A connected datagram pair whose sending side has a small buffer.
    fn small_buffer_pair() -> (UnixDatagram, UnixDatagram, usize) {
        let (tx, rx) = UnixDatagram::pair().unwrap();
        let requested: libc::c_int = 16 * 1024;
        // SAFETY: valid descriptor and correctly sized option value.
        let rc = unsafe {
            libc::setsockopt(
                tx.as_raw_fd(),
                libc::SOL_SOCKET,
                libc::SO_SNDBUF,
                (&requested as *const libc::c_int).cast(),
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        assert_eq!(rc, 0);
        let budget = send_buffer_of(tx.as_fd()).unwrap();
        (tx, rx, budget)
    }

    fn collect(rx: UnixDatagram, total: usize) -> thread::JoinHandle<Vec<Vec<u8>>> {
        thread::spawn(move || {
            let mut got = Vec::new();
            let mut seen = 0;
            let mut buf = vec![0u8; 1 << 20];
            while seen < total {
                let n = rx.recv(&mut buf).unwrap();
                seen += n;
                got.push(buf[..n].to_vec());
            }
            got
        })
    }

    #[test]
    fn oversized_write_reaches_receiver_intact() {
        let (tx, rx, budget) = small_buffer_pair();
        let limit = chunk_limit(budget);
        let data: Vec<u8> = (0..limit * 5 / 2).map(|i| (i % 253) as u8).collect();
        let reader = collect(rx, data.len());

        let prim = Original::new(tx.as_raw_fd());
        let too_large = prim.write(&data).unwrap_err();
        assert!(is_too_large(&too_large));

        assert_eq!(reliable_write(&prim, &data, limit).unwrap(), data.len());

        let datagrams = reader.join().unwrap();
        assert!(datagrams.len() >= 3);
        assert!(datagrams.iter().all(|d| d.len() <= limit));
        assert_eq!(datagrams.concat(), data);
    }

    #[test]
    fn oversized_writev_reaches_receiver_intact() {
        let (tx, rx, budget) = small_buffer_pair();
        let limit = chunk_limit(budget);

        // The first two segments end exactly on the chunk limit.
        let mut sizes = vec![limit - 100, 100];
        sizes.extend((0..38).map(|i| 200 + (i * 331) % 2500));
        let parts: Vec<Vec<u8>> = sizes
            .iter()
            .enumerate()
            .map(|(i, len)| (0..*len).map(|j| (i * 7 + j) as u8).collect())
            .collect();
        let expected = parts.concat();
        assert!(expected.len() > budget);
        let reader = collect(rx, expected.len());

        let prim = Original::new(tx.as_raw_fd());
        assert_eq!(
            reliable_writev(&prim, &iov_of(&parts), limit).unwrap(),
            expected.len()
        );

        let datagrams = reader.join().unwrap();
        assert_eq!(datagrams[0].len(), limit);
        assert!(datagrams.iter().all(|d| d.len() <= limit));
        assert_eq!(datagrams.concat(), expected);
    }

    #[test]
    fn closed_peer_error_is_not_masked() {
        let (tx, rx, budget) = small_buffer_pair();
        drop(rx);
        let prim = Original::new(tx.as_raw_fd());
        let err = reliable_write(&prim, &vec![0u8; budget * 2], chunk_limit(budget)).unwrap_err();
        assert!(!is_too_large(&err));
    }
}

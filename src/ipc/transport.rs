//! Socket transport for the primordial channel
//!
//! Each host that opens a socket-backed channel gets a dedicated IO thread
//! running a small `smol` executor. The thread moves frames between the
//! socket and a [`Link`]; the host itself never touches the socket.

use std::os::unix::net::UnixStream;
use std::thread;

use async_io::Async;
use futures_lite::future;
use futures_lite::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::Result;
use crate::id::HostId;
use crate::ipc::link::Link;
use crate::ipc::protocol::{Frame, check_len};

/// Start the IO thread for `stream` and return the host's side of the link
pub(crate) fn spawn_io_thread(
    host_id: HostId,
    stream: UnixStream,
    thread_prefix: &str,
    max_frame_len: usize,
) -> Result<Link> {
    let (host_side, io_side) = Link::pair();
    let name = format!("{thread_prefix}-{host_id}");

    thread::Builder::new()
        .name(name)
        .spawn(move || smol::block_on(run_io(host_id, stream, io_side, max_frame_len)))?;

    tracing::debug!(host_id = %host_id, "channel IO thread started");
    Ok(host_side)
}

/// Pump frames until either direction stops
///
/// A protocol or I/O failure on the read side is reported on the link before
/// the link is dropped, so the host sees it along with the disconnect.
async fn run_io(host_id: HostId, stream: UnixStream, link: Link, max_frame_len: usize) {
    let stream = match Async::new(stream) {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!(host_id = %host_id, error = %e, "failed to register channel socket");
            link.report_fault(e.into());
            return;
        }
    };

    let outcome = future::or(read_loop(host_id, &stream, &link, max_frame_len), async {
        write_loop(host_id, &stream, &link).await;
        Ok(())
    })
    .await;

    if let Err(e) = outcome {
        link.report_fault(e);
    }
    tracing::debug!(host_id = %host_id, "channel IO thread stopping");
}

/// Socket -> host
///
/// Returns `Ok` on a clean hangup by either side.
async fn read_loop(
    host_id: HostId,
    stream: &Async<UnixStream>,
    link: &Link,
    max_frame_len: usize,
) -> Result<()> {
    let mut reader = stream;
    loop {
        let mut len_buf = [0u8; 4];
        if let Err(e) = reader.read_exact(&mut len_buf).await {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                return Ok(());
            }
            tracing::debug!(host_id = %host_id, error = %e, "failed to read frame length");
            return Err(e.into());
        }

        let len = check_len(len_buf, max_frame_len).inspect_err(|e| {
            tracing::warn!(host_id = %host_id, error = %e, "rejecting frame");
        })?;

        let mut body = vec![0u8; len];
        if let Err(e) = reader.read_exact(&mut body).await {
            tracing::debug!(host_id = %host_id, error = %e, "failed to read frame body");
            return Err(e.into());
        }

        let frame = Frame::from_body(&body).inspect_err(|e| {
            tracing::warn!(host_id = %host_id, error = %e, "failed to parse frame");
        })?;

        if !link.send(frame) {
            // Host went away
            return Ok(());
        }
    }
}

/// Host -> socket
async fn write_loop(host_id: HostId, stream: &Async<UnixStream>, link: &Link) {
    let mut writer = stream;
    while let Some(frame) = link.recv().await {
        let bytes = match frame.to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(host_id = %host_id, kind = frame.kind(), error = %e, "failed to encode frame");
                continue;
            }
        };
        if let Err(e) = writer.write_all(&bytes).await {
            tracing::debug!(host_id = %host_id, error = %e, "failed to write frame");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HostError;
    use crate::ipc::protocol::{DEFAULT_MAX_FRAME_LEN, Message, read_frame, write_frame};
    use std::time::Duration;

    #[tokio::test]
    async fn test_frames_cross_the_socket() {
        let (host_end, mut child_end) = UnixStream::pair().unwrap();
        let link =
            spawn_io_thread(HostId::allocate(), host_end, "test-io", DEFAULT_MAX_FRAME_LEN).unwrap();

        let hello = Frame::Hello {
            pid: 7,
            token: "t".to_string(),
        };
        write_frame(&mut child_end, &hello).unwrap();
        assert_eq!(link.recv().await, Some(hello));

        let message = Frame::Message(Message::new("ping", vec![1, 2, 3]));
        assert!(link.send(message.clone()));
        child_end
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let received = read_frame(&mut child_end, DEFAULT_MAX_FRAME_LEN).unwrap();
        assert_eq!(received, Some(message));
    }

    #[tokio::test]
    async fn test_child_hangup_closes_link() {
        let (host_end, child_end) = UnixStream::pair().unwrap();
        let link =
            spawn_io_thread(HostId::allocate(), host_end, "test-io", DEFAULT_MAX_FRAME_LEN).unwrap();
        drop(child_end);
        assert_eq!(link.recv().await, None);
    }

    #[tokio::test]
    async fn test_oversized_frame_closes_link() {
        let (host_end, mut child_end) = UnixStream::pair().unwrap();
        let link = spawn_io_thread(HostId::allocate(), host_end, "test-io", 8).unwrap();
        write_frame(&mut child_end, &Frame::Message(Message::new("big", vec![0; 32]))).unwrap();
        assert_eq!(link.recv().await, None);
        assert!(matches!(
            link.take_fault(),
            Some(HostError::FrameTooLarge { max: 8, .. })
        ));
    }

    #[tokio::test]
    async fn test_garbage_body_reports_invalid_frame() {
        use std::io::Write;

        let (host_end, mut child_end) = UnixStream::pair().unwrap();
        let link =
            spawn_io_thread(HostId::allocate(), host_end, "test-io", DEFAULT_MAX_FRAME_LEN).unwrap();
        child_end.write_all(&2u32.to_be_bytes()).unwrap();
        child_end.write_all(&[0xc1, 0xc1]).unwrap();

        assert_eq!(link.recv().await, None);
        assert!(matches!(link.take_fault(), Some(HostError::Deserialization(_))));
    }

    #[tokio::test]
    async fn test_clean_hangup_reports_no_fault() {
        let (host_end, child_end) = UnixStream::pair().unwrap();
        let link =
            spawn_io_thread(HostId::allocate(), host_end, "test-io", DEFAULT_MAX_FRAME_LEN).unwrap();
        drop(child_end);
        assert_eq!(link.recv().await, None);
        assert!(link.take_fault().is_none());
    }

    #[tokio::test]
    async fn test_dropping_link_hangs_up_socket() {
        let (host_end, mut child_end) = UnixStream::pair().unwrap();
        let link =
            spawn_io_thread(HostId::allocate(), host_end, "test-io", DEFAULT_MAX_FRAME_LEN).unwrap();
        link.send(Frame::Shutdown);
        drop(link);

        child_end
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        assert_eq!(
            read_frame(&mut child_end, DEFAULT_MAX_FRAME_LEN).unwrap(),
            Some(Frame::Shutdown)
        );
        assert_eq!(read_frame(&mut child_end, DEFAULT_MAX_FRAME_LEN).unwrap(), None);
    }
}

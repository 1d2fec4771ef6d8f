//! In-process frame queues
//!
//! A [`Link`] is one side of a bidirectional frame queue. The host always
//! talks to a link; the other side is either the IO thread that owns the
//! socket or an in-process child.

use std::sync::{Arc, Mutex};

use smol::channel::{self, Receiver, Sender, TryRecvError};

use crate::error::HostError;
use crate::ipc::protocol::Frame;

/// One side of a bidirectional frame queue
#[derive(Debug)]
pub struct Link {
    sender: Sender<Frame>,
    receiver: Receiver<Frame>,
    fault: Arc<Mutex<Option<HostError>>>,
}

impl Link {
    /// Create two connected links
    ///
    /// Frames sent on one side arrive on the other in order.
    pub fn pair() -> (Link, Link) {
        let (a_tx, a_rx) = channel::unbounded();
        let (b_tx, b_rx) = channel::unbounded();
        let fault = Arc::new(Mutex::new(None));
        (
            Link {
                sender: a_tx,
                receiver: b_rx,
                fault: Arc::clone(&fault),
            },
            Link {
                sender: b_tx,
                receiver: a_rx,
                fault,
            },
        )
    }

    /// Queue a frame for the other side
    ///
    /// Returns `false` if the other side is gone.
    pub fn send(&self, frame: Frame) -> bool {
        self.sender.try_send(frame).is_ok()
    }

    /// Wait for the next frame; `None` once the other side is gone
    pub async fn recv(&self) -> Option<Frame> {
        self.receiver.recv().await.ok()
    }

    /// Take the next frame without waiting
    pub fn try_recv(&self) -> Result<Option<Frame>, Disconnected> {
        match self.receiver.try_recv() {
            Ok(frame) => Ok(Some(frame)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Closed) => Err(Disconnected),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Record why this side is about to hang up
    ///
    /// Must be called before the side is dropped so the peer sees the error
    /// no later than the disconnect. Only the first fault is kept.
    pub fn report_fault(&self, error: HostError) {
        if let Ok(mut slot) = self.fault.lock()
            && slot.is_none()
        {
            *slot = Some(error);
        }
    }

    /// Take the error the other side hung up with, if any
    pub fn take_fault(&self) -> Option<HostError> {
        self.fault.lock().ok().and_then(|mut slot| slot.take())
    }

    pub(crate) fn receiver(&self) -> Receiver<Frame> {
        self.receiver.clone()
    }
}

/// The other side of a link has been dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Disconnected;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_cross_in_order() {
        let (a, b) = Link::pair();
        assert!(a.send(Frame::Shutdown));
        assert!(a.send(Frame::Hello {
            pid: 1,
            token: String::new()
        }));

        assert_eq!(b.try_recv(), Ok(Some(Frame::Shutdown)));
        assert!(matches!(b.try_recv(), Ok(Some(Frame::Hello { pid: 1, .. }))));
        assert_eq!(b.try_recv(), Ok(None));
    }

    #[test]
    fn test_drop_disconnects_peer() {
        let (a, b) = Link::pair();
        a.send(Frame::Shutdown);
        drop(a);

        // Queued frames are still delivered before the disconnect
        assert_eq!(b.try_recv(), Ok(Some(Frame::Shutdown)));
        assert_eq!(b.try_recv(), Err(Disconnected));
        assert!(!b.send(Frame::Shutdown));
        assert!(b.is_closed());
    }

    #[test]
    fn test_fault_reaches_peer_before_disconnect() {
        let (a, b) = Link::pair();
        a.report_fault(HostError::InvalidFrame("garbage".to_string()));
        a.report_fault(HostError::ChannelClosed);
        drop(a);

        assert_eq!(b.try_recv(), Err(Disconnected));
        assert!(matches!(b.take_fault(), Some(HostError::InvalidFrame(_))));
        assert!(b.take_fault().is_none());
    }

    #[test]
    fn test_clean_hangup_has_no_fault() {
        let (a, b) = Link::pair();
        drop(a);
        assert_eq!(b.try_recv(), Err(Disconnected));
        assert!(b.take_fault().is_none());
    }

    #[tokio::test]
    async fn test_recv_waits_for_frame() {
        let (a, b) = Link::pair();
        let sender = std::thread::spawn(move || {
            a.send(Frame::Shutdown);
            a
        });
        assert_eq!(b.recv().await, Some(Frame::Shutdown));
        drop(sender.join().unwrap());
        assert_eq!(b.recv().await, None);
    }
}

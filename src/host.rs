//! Parent-side representative of one child process
//!
//! A [`ChildProcessHost`] owns the primordial channel to a single child. It is
//! driven from one dispatch context: every method takes `&self` or
//! `&mut self`, so state transitions, filter mutation and message dispatch
//! are serialized by ownership rather than by locks.

use std::collections::VecDeque;
use std::os::unix::net::UnixStream;
use std::sync::Arc;

use crate::config::HostConfig;
use crate::delegate::{HostDelegate, PendingRequest};
use crate::error::{HostError, Result};
use crate::id::HostId;
use crate::invitation::{ChildEndpoint, TransportInvitation};
use crate::ipc::transport::spawn_io_thread;
use crate::ipc::{
    Disconnected, EndpointHandle, FilterChain, FilterVerdict, Frame, Link, Message, MessageFilter,
    ReceiverBindingRequest, ReceiverRouter, Route,
};

/// How the host uses its primordial channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMode {
    /// Fully capable: interface binding and services are available
    Structured,
    /// Raw bootstrap only; `bind_receiver` and `run_service` are rejected
    Legacy,
}

/// Lifecycle of the primordial channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Unopened,
    /// Armed and waiting for the child's handshake
    Opening,
    Open,
    /// Terminal
    Closed,
}

/// Host for one child process and its primordial channel
///
/// ```rust,ignore
/// let mut host = ChildProcessHost::new(delegate, ChannelMode::Structured)?;
/// let invitation = host.take_invitation().expect("fresh host");
/// let child = ProcessLauncher::new().launch(invitation, params)?;
///
/// host.create_channel()?;
/// host.run_service("echo", EndpointHandle::new())?;
/// while host.pump().await {}
/// ```
pub struct ChildProcessHost<D: HostDelegate> {
    id: HostId,
    config: HostConfig,
    delegate: Arc<D>,
    state: ChannelState,
    invitation: Option<TransportInvitation>,
    legacy_bootstrap: Option<ChildEndpoint>,
    host_end: Option<UnixStream>,
    expected_token: Option<String>,
    link: Option<Link>,
    filters: FilterChain,
    pending: VecDeque<PendingRequest>,
    peer_pid: Option<u32>,
}

impl<D: HostDelegate> ChildProcessHost<D> {
    /// Create a host with the default configuration for `mode`
    pub fn new(delegate: Arc<D>, mode: ChannelMode) -> Result<Self> {
        Self::with_config(delegate, HostConfig::new(mode))
    }

    /// Create a host with a custom configuration
    ///
    /// The socket pair backing the channel is created here, so the
    /// invitation (or legacy bootstrap endpoint) is available immediately.
    pub fn with_config(delegate: Arc<D>, config: HostConfig) -> Result<Self> {
        let id = HostId::allocate();
        let (host_end, child_end) = UnixStream::pair()?;
        let child_end = ChildEndpoint::new(child_end);

        let (invitation, legacy_bootstrap, expected_token) = match config.mode() {
            ChannelMode::Structured => {
                let token = generate_token();
                let invitation = TransportInvitation::new(id, token.clone(), child_end);
                (Some(invitation), None, Some(token))
            }
            ChannelMode::Legacy => (None, Some(child_end), None),
        };

        tracing::debug!(host_id = %id, mode = ?config.mode(), "created child process host");

        Ok(Self {
            id,
            config,
            delegate,
            state: ChannelState::Unopened,
            invitation,
            legacy_bootstrap,
            host_end: Some(host_end),
            expected_token,
            link: None,
            filters: FilterChain::new(),
            pending: VecDeque::new(),
            peer_pid: None,
        })
    }

    pub fn id(&self) -> HostId {
        self.id
    }

    pub fn mode(&self) -> ChannelMode {
        self.config.mode()
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn delegate(&self) -> &Arc<D> {
        &self.delegate
    }

    /// Pid reported by the child in its handshake
    pub fn peer_pid(&self) -> Option<u32> {
        self.peer_pid
    }

    /// The invitation slot, so the caller can `take()` it
    ///
    /// Holds `Some` from construction until someone takes ownership. Always
    /// `None` in legacy mode and after shutdown.
    pub fn invitation(&mut self) -> &mut Option<TransportInvitation> {
        &mut self.invitation
    }

    /// Take ownership of the invitation
    ///
    /// Returns `Some` at most once over the lifetime of the host.
    pub fn take_invitation(&mut self) -> Option<TransportInvitation> {
        let invitation = self.invitation.take();
        if invitation.is_some() {
            tracing::debug!(host_id = %self.id, "invitation taken");
        }
        invitation
    }

    /// Take the raw bootstrap endpoint of a legacy host
    pub fn take_legacy_bootstrap(&mut self) -> Option<ChildEndpoint> {
        self.legacy_bootstrap.take()
    }

    /// Arm the channel and start its IO thread
    ///
    /// Idempotent while opening or open. Fails once the host is closed.
    pub fn create_channel(&mut self) -> Result<()> {
        if !self.check_can_open()? {
            return Ok(());
        }

        let Some(stream) = self.host_end.take() else {
            return Err(HostError::ChannelClosed);
        };

        match spawn_io_thread(
            self.id,
            stream,
            self.config.io_thread_prefix(),
            self.config.max_frame_len(),
        ) {
            Ok(link) => {
                self.arm(link);
                Ok(())
            }
            Err(e) => {
                tracing::error!(host_id = %self.id, error = %e, "failed to start channel IO");
                self.delegate.on_channel_error(&e);
                self.close();
                Err(e)
            }
        }
    }

    /// Arm the channel over an in-process link instead of the socket pair
    ///
    /// The socket pair and any invitation still held are released, and the
    /// handshake token is not checked.
    pub fn create_channel_with_link(&mut self, link: Link) -> Result<()> {
        if !self.check_can_open()? {
            return Ok(());
        }

        self.host_end = None;
        self.expected_token = None;
        if self.invitation.take().is_some() {
            tracing::debug!(host_id = %self.id, "released invitation replaced by in-process link");
        }
        self.arm(link);
        Ok(())
    }

    /// Returns true iff the channel is waiting for the child's handshake
    pub fn is_channel_opening(&self) -> bool {
        self.state == ChannelState::Opening
    }

    /// Append a filter to the end of the chain
    ///
    /// Has no effect once the host is closed.
    pub fn add_filter(&mut self, filter: Arc<dyn MessageFilter>) {
        if self.state == ChannelState::Closed {
            tracing::debug!(host_id = %self.id, "ignoring filter added after shutdown");
            return;
        }
        self.filters.push(Arc::clone(&filter));
        if let (ChannelState::Open, Some(pid)) = (self.state, self.peer_pid) {
            filter.on_channel_connected(pid);
        }
    }

    /// Remove a filter previously passed to [`add_filter`](Self::add_filter)
    pub fn remove_filter(&mut self, filter: &Arc<dyn MessageFilter>) -> bool {
        self.filters.remove(filter)
    }

    /// Bind an interface, locally if the delegate knows it, otherwise in the child
    ///
    /// Requests for the child are queued until the channel opens.
    pub fn bind_receiver(&mut self, request: ReceiverBindingRequest) -> Result<()> {
        self.require_structured("bind_receiver")?;
        if self.state == ChannelState::Closed {
            tracing::debug!(
                host_id = %self.id,
                interface = request.interface(),
                "ignoring bind_receiver after shutdown"
            );
            return Ok(());
        }

        match ReceiverRouter::route(self.delegate.as_ref(), request) {
            Route::Local => Ok(()),
            Route::Forward(request) => self.enqueue(PendingRequest::BindReceiver(request)),
        }
    }

    /// Ask the child to run an instance of the named service
    ///
    /// Requests made before the channel opens are delivered in order once it
    /// does.
    pub fn run_service(
        &mut self,
        service: impl Into<String>,
        receiver: EndpointHandle,
    ) -> Result<()> {
        self.require_structured("run_service")?;
        let service = service.into();
        if self.state == ChannelState::Closed {
            tracing::debug!(host_id = %self.id, service = %service, "ignoring run_service after shutdown");
            return Ok(());
        }

        self.enqueue(PendingRequest::RunService { service, receiver })
    }

    /// Send a raw message to the child
    pub fn send(&mut self, message: Message) -> Result<()> {
        if self.state == ChannelState::Closed {
            return Err(HostError::ChannelClosed);
        }
        self.enqueue(PendingRequest::Message(message))
    }

    /// Tell the child to shut down and close the channel
    ///
    /// The shutdown notice is best effort and only sent on an open channel.
    /// Safe to call any number of times.
    pub fn force_shutdown(&mut self) {
        if self.state == ChannelState::Closed {
            return;
        }

        if self.state == ChannelState::Open
            && let Some(link) = &self.link
            && !link.send(Frame::Shutdown)
        {
            tracing::debug!(host_id = %self.id, "child already gone, shutdown notice not sent");
        }

        tracing::info!(host_id = %self.id, "forcing child process shutdown");
        self.close();
    }

    /// Record that the child process died
    pub fn handle_process_exit(&mut self) {
        if self.state == ChannelState::Closed {
            return;
        }
        tracing::info!(host_id = %self.id, pid = ?self.peer_pid, "child process exited");
        self.close();
    }

    /// Wait for the next inbound frame and handle it
    ///
    /// Returns `false` once the channel is closed.
    pub async fn pump(&mut self) -> bool {
        let Some(receiver) = self.link.as_ref().map(Link::receiver) else {
            return false;
        };

        match receiver.recv().await {
            Ok(frame) => {
                self.handle_frame(frame);
                self.state != ChannelState::Closed
            }
            Err(_) => {
                self.handle_disconnect();
                false
            }
        }
    }

    /// Handle every frame already received, without waiting
    ///
    /// Returns the number of frames handled.
    pub fn dispatch_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Some(link) = &self.link {
            match link.try_recv() {
                Ok(Some(frame)) => {
                    self.handle_frame(frame);
                    handled += 1;
                }
                Ok(None) => break,
                Err(Disconnected) => {
                    self.handle_disconnect();
                    break;
                }
            }
        }
        handled
    }

    /// Returns `Ok(true)` if the channel still needs to be armed
    fn check_can_open(&self) -> Result<bool> {
        match self.state {
            ChannelState::Unopened => Ok(true),
            ChannelState::Opening | ChannelState::Open => Ok(false),
            ChannelState::Closed => {
                tracing::warn!(host_id = %self.id, "cannot create channel after shutdown");
                Err(HostError::ChannelClosed)
            }
        }
    }

    fn arm(&mut self, link: Link) {
        self.link = Some(link);
        self.state = ChannelState::Opening;
        tracing::debug!(host_id = %self.id, "channel opening");
    }

    fn require_structured(&self, operation: &'static str) -> Result<()> {
        match self.mode() {
            ChannelMode::Structured => Ok(()),
            ChannelMode::Legacy => {
                tracing::error!(host_id = %self.id, operation, "not supported by legacy hosts");
                Err(HostError::Unsupported {
                    operation,
                    mode: ChannelMode::Legacy,
                })
            }
        }
    }

    /// Send now if open, otherwise queue
    ///
    /// Frames the child would reject for size are refused up front. The
    /// child is expected to read with the same limit as the host.
    fn enqueue(&mut self, request: PendingRequest) -> Result<()> {
        let frame = Frame::from(request.clone());
        let len = frame.body_len()?;
        let max = self.config.max_frame_len();
        if len > max {
            tracing::warn!(host_id = %self.id, kind = frame.kind(), len, max, "refusing oversized frame");
            return Err(HostError::FrameTooLarge { len, max });
        }

        if self.state == ChannelState::Open {
            self.transmit(frame);
        } else {
            tracing::debug!(host_id = %self.id, queued = self.pending.len() + 1, "queued request until channel opens");
            self.pending.push_back(request);
        }
        Ok(())
    }

    fn transmit(&self, frame: Frame) {
        let kind = frame.kind();
        let sent = self.link.as_ref().is_some_and(|link| link.send(frame));
        if !sent {
            tracing::debug!(host_id = %self.id, kind, "child gone, dropping outbound frame");
        }
    }

    fn flush_pending(&mut self) {
        while let Some(request) = self.pending.pop_front() {
            self.transmit(Frame::from(request));
        }
    }

    fn handle_frame(&mut self, frame: Frame) {
        match frame {
            Frame::Hello { pid, token } => self.handle_hello(pid, token),
            Frame::Message(message) => self.handle_message(message),
            Frame::BindReceiver(request) => {
                if self.state == ChannelState::Open {
                    self.delegate.bind_host_receiver(request);
                } else {
                    tracing::warn!(host_id = %self.id, "bind request from child before handshake");
                }
            }
            Frame::RunService { service, .. } => {
                tracing::warn!(host_id = %self.id, service = %service, "child sent run_service, ignoring");
            }
            Frame::Shutdown => {
                tracing::info!(host_id = %self.id, "child announced shutdown");
                self.close();
            }
        }
    }

    fn handle_hello(&mut self, pid: u32, token: String) {
        if self.state != ChannelState::Opening {
            tracing::warn!(host_id = %self.id, pid, "unexpected handshake, ignoring");
            return;
        }

        if let Some(expected) = &self.expected_token
            && *expected != token
        {
            let error = HostError::HandshakeRejected;
            tracing::warn!(host_id = %self.id, pid, error = %error, "closing channel");
            self.delegate.on_channel_error(&error);
            self.close();
            return;
        }

        self.state = ChannelState::Open;
        self.peer_pid = Some(pid);
        tracing::info!(host_id = %self.id, pid, "child process connected");

        self.flush_pending();
        self.filters.notify_connected(pid);
        self.delegate.on_channel_opened(pid);
    }

    fn handle_message(&mut self, message: Message) {
        if self.state != ChannelState::Open {
            tracing::warn!(host_id = %self.id, name = message.name(), "message before handshake, dropping");
            return;
        }

        if self.filters.dispatch(&message) == FilterVerdict::Consumed {
            return;
        }
        if !self.delegate.on_message_received(&message) {
            tracing::debug!(host_id = %self.id, name = message.name(), "unhandled message");
        }
    }

    fn handle_disconnect(&mut self) {
        if self.state == ChannelState::Closed {
            return;
        }
        if let Some(error) = self.link.as_ref().and_then(Link::take_fault) {
            tracing::warn!(host_id = %self.id, error = %error, "channel failed");
            self.delegate.on_channel_error(&error);
        } else if self.state == ChannelState::Opening {
            tracing::warn!(host_id = %self.id, "child disconnected before handshake");
        } else {
            tracing::debug!(host_id = %self.id, "child disconnected");
        }
        self.close();
    }

    /// Transition to `Closed` and release everything the channel held
    fn close(&mut self) {
        self.state = ChannelState::Closed;
        self.filters.close();
        self.link = None;
        self.host_end = None;
        self.legacy_bootstrap = None;
        self.expected_token = None;
        if self.invitation.take().is_some() {
            tracing::debug!(host_id = %self.id, "released unused invitation");
        }

        if !self.pending.is_empty() {
            let dropped: Vec<_> = self.pending.drain(..).collect();
            tracing::warn!(host_id = %self.id, count = dropped.len(), "dropping requests queued before channel opened");
            self.delegate.on_requests_dropped(dropped);
        }

        tracing::debug!(host_id = %self.id, "channel closed");
        self.delegate.on_channel_closed();
    }
}

impl<D: HostDelegate> Drop for ChildProcessHost<D> {
    fn drop(&mut self) {
        self.force_shutdown();
    }
}

impl From<PendingRequest> for Frame {
    fn from(request: PendingRequest) -> Self {
        match request {
            PendingRequest::BindReceiver(request) => Frame::BindReceiver(request),
            PendingRequest::RunService { service, receiver } => {
                Frame::RunService { service, receiver }
            }
            PendingRequest::Message(message) => Frame::Message(message),
        }
    }
}

fn generate_token() -> String {
    format!("{:032x}", rand::random::<u128>())
}

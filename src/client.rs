//! DVR-IP client session.
//!
//! One [`DvrClient`] owns one TCP connection and one authenticated session.
//! [`DvrClient::run`] drives the whole lifecycle: connect, login, keep-alive
//! and frame dispatch, until the device drops the connection, a fatal error
//! occurs or the client is shut down. A client instance logs in exactly once;
//! reconnection means building a fresh instance (see [`crate::supervisor`]).

use crate::{
    error::{DvrError, Result},
    protocol::{
        codec,
        commands::{
            AlarmInfo, AlarmNotify, Command, DvrReply, DvrRequest, GetConfigRequest, GuardRequest,
            KeepAliveRequest, LoginRequest, SetConfigRequest, UnguardRequest, ALARM_PUSH_ID,
        },
        correlator::{FrameFilter, ReplyCorrelator},
        reassembly::StreamReassembler,
        ret,
    },
    types::{DvrOptions, DEFAULT_KEEP_ALIVE_SECS, FRAME_RETENTION, SEND_RECEIVE_TIMEOUT},
};
use bytes::Bytes;
use futures::Stream;
use serde_json::Value;
use std::{
    pin::Pin,
    sync::{
        atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
        Arc,
    },
    task::{Context, Poll},
    time::Duration,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    sync::{mpsc, watch, Mutex},
    time::timeout,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Observable lifecycle of one client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionLifecycleState {
    Idle,
    Connecting,
    LoggingIn,
    Ready,
    Closing,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ReadyState {
    Pending,
    Ready,
    Failed(String),
}

/// Client for one DVR/NVR device.
pub struct DvrClient {
    options: DvrOptions,
    cancel: CancellationToken,
    correlator: Arc<ReplyCorrelator>,
    /// Write half of the connection. The guard is held across a whole
    /// send-and-receive round trip so commands never interleave on the wire.
    writer: Mutex<Option<OwnedWriteHalf>>,
    /// Serializes multi-command read-modify-write config operations.
    api_lock: Mutex<()>,
    sequence: AtomicU32,
    session_id: AtomicU32,
    keep_alive_secs: AtomicU64,
    logged_in: AtomicBool,
    lifecycle_tx: watch::Sender<SessionLifecycleState>,
    ready_tx: watch::Sender<ReadyState>,
}

impl DvrClient {
    pub fn new(options: DvrOptions) -> Arc<Self> {
        let (lifecycle_tx, _) = watch::channel(SessionLifecycleState::Idle);
        let (ready_tx, _) = watch::channel(ReadyState::Pending);
        Arc::new(Self {
            options,
            cancel: CancellationToken::new(),
            correlator: Arc::new(ReplyCorrelator::new(FRAME_RETENTION)),
            writer: Mutex::new(None),
            api_lock: Mutex::new(()),
            sequence: AtomicU32::new(0),
            session_id: AtomicU32::new(0),
            keep_alive_secs: AtomicU64::new(DEFAULT_KEEP_ALIVE_SECS),
            logged_in: AtomicBool::new(false),
            lifecycle_tx,
            ready_tx,
        })
    }

    pub fn options(&self) -> &DvrOptions {
        &self.options
    }

    /// Watch the session lifecycle.
    pub fn lifecycle(&self) -> watch::Receiver<SessionLifecycleState> {
        self.lifecycle_tx.subscribe()
    }

    /// Numeric session id assigned at login; 0 before login.
    pub fn session_id(&self) -> u32 {
        self.session_id.load(Ordering::Acquire)
    }

    /// Keep-alive interval negotiated at login.
    pub fn keep_alive_interval(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs.load(Ordering::Acquire))
    }

    /// Resolves once the session is authenticated and ready, or with the
    /// error that prevented it from getting there.
    pub async fn when_connected(&self) -> Result<()> {
        let mut rx = self.ready_tx.subscribe();
        let state = rx
            .wait_for(|s| *s != ReadyState::Pending)
            .await
            .map_err(|_| DvrError::ConnectionClosed)?;
        match &*state {
            ReadyState::Ready => Ok(()),
            ReadyState::Failed(reason) => Err(DvrError::ConnectFailed(reason.clone())),
            ReadyState::Pending => unreachable!("wait_for excludes Pending"),
        }
    }

    /// Tear the session down. Idempotent; in-flight operations resolve with
    /// [`DvrError::Cancelled`].
    pub fn shutdown(&self) {
        if !self.cancel.is_cancelled() {
            debug!(host = %self.options.host, "shutting down dvr client");
            self.cancel.cancel();
        }
    }

    /// Drive the session to completion: connect, login, then keep the
    /// connection alive until cancellation or a fatal error.
    ///
    /// Always resolves the [`when_connected`](Self::when_connected) gate, so
    /// callers awaiting readiness never hang on a session that died first.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let result = self.run_inner().await;

        let still_pending = { *self.ready_tx.borrow() == ReadyState::Pending };
        if still_pending {
            let reason = match &result {
                Ok(()) => "session closed before becoming ready".to_string(),
                Err(err) => err.to_string(),
            };
            self.ready_tx.send_replace(ReadyState::Failed(reason));
        }

        self.lifecycle_tx.send_replace(SessionLifecycleState::Closing);
        self.cancel.cancel();
        self.correlator.shutdown();
        self.writer.lock().await.take();
        self.lifecycle_tx.send_replace(SessionLifecycleState::Closed);

        match &result {
            Ok(()) => info!(host = %self.options.host, "dvr session closed"),
            Err(err) => warn!(host = %self.options.host, error = %err, "dvr session failed"),
        }
        result
    }

    async fn run_inner(self: &Arc<Self>) -> Result<()> {
        self.lifecycle_tx.send_replace(SessionLifecycleState::Connecting);

        let addr = (self.options.host.as_str(), self.options.port);
        let stream = tokio::select! {
            _ = self.cancel.cancelled() => return Err(DvrError::Cancelled),
            connected = timeout(self.options.connect_timeout(), TcpStream::connect(addr)) => {
                connected.map_err(|_| DvrError::Timeout { op: "Connect" })??
            }
        };
        if self.options.tcp_nodelay {
            stream.set_nodelay(true)?;
        }
        info!(host = %self.options.host, port = self.options.port, "connected to device");

        self.sequence.store(0, Ordering::Release);
        self.session_id.store(0, Ordering::Release);

        let (read_half, write_half) = stream.into_split();
        *self.writer.lock().await = Some(write_half);

        let mut receiver = tokio::spawn(receive_loop(
            read_half,
            Arc::clone(&self.correlator),
            self.cancel.clone(),
        ));

        self.lifecycle_tx.send_replace(SessionLifecycleState::LoggingIn);
        let login = tokio::select! {
            _ = self.cancel.cancelled() => Err(DvrError::Cancelled),
            joined = &mut receiver => match joined {
                Ok(Err(err)) => Err(err),
                _ => Err(DvrError::ConnectionClosed),
            },
            res = self.login() => res,
        };
        if let Err(err) = login {
            receiver.abort();
            return Err(err);
        }

        self.lifecycle_tx.send_replace(SessionLifecycleState::Ready);
        self.ready_tx.send_replace(ReadyState::Ready);

        let result = tokio::select! {
            _ = self.cancel.cancelled() => Ok(()),
            joined = &mut receiver => joined.unwrap_or(Err(DvrError::ConnectionClosed)),
            res = self.keep_alive_loop() => res,
        };
        receiver.abort();
        result
    }

    /// Authenticate the session. Runs exactly once per client instance.
    async fn login(&self) -> Result<()> {
        if self.logged_in.swap(true, Ordering::AcqRel) {
            return Err(DvrError::AlreadyLoggedIn);
        }

        let request = LoginRequest::new(self.options.user_name(), self.options.pass_word());
        let reply = self.send(request).await?;

        let raw = reply.session_id.unwrap_or_default();
        let session_id = parse_session_id(&raw)?;
        self.session_id.store(session_id, Ordering::Release);

        let interval = if reply.alive_interval == 0 {
            DEFAULT_KEEP_ALIVE_SECS
        } else {
            u64::from(reply.alive_interval)
        };
        self.keep_alive_secs.store(interval, Ordering::Release);

        info!(
            host = %self.options.host,
            session_id = format_args!("0x{session_id:X}"),
            alive_interval = interval,
            channels = reply.channel_num,
            "logged in"
        );
        Ok(())
    }

    async fn keep_alive_loop(&self) -> Result<()> {
        loop {
            match self.send(KeepAliveRequest::new()).await {
                Ok(_) => debug!(host = %self.options.host, "keep-alive acknowledged"),
                Err(DvrError::Cancelled) => return Ok(()),
                Err(err) => return Err(err),
            }
            tokio::time::sleep(self.keep_alive_interval()).await;
        }
    }

    /// Send one command and wait for its correlated reply.
    ///
    /// The send and the receive each get their own round-trip deadline. The
    /// reply's `Ret` code is checked before the typed reply is returned.
    pub(crate) async fn send<R: DvrRequest>(&self, mut request: R) -> Result<R::Reply> {
        if self.cancel.is_cancelled() {
            return Err(DvrError::Disposed);
        }
        let session_id = self.session_id();
        if R::COMMAND != Command::Login && session_id == 0 {
            return Err(DvrError::NotLoggedIn);
        }
        request.set_session_id(session_id_hex(session_id));

        let sequence = self.sequence.fetch_add(1, Ordering::AcqRel) + 1;
        let payload = serde_json::to_vec(&request)?;
        let frame = codec::encode(session_id, sequence, R::COMMAND.request_id(), &payload);

        // Register before writing so a fast reply cannot slip past its waiter.
        let reply_rx = self.correlator.register(FrameFilter {
            sequence: Some(sequence),
            session_id: Some(session_id),
            command_id: Some(R::COMMAND.reply_id()),
        });

        let mut writer_guard = self.writer.lock().await;
        let writer = writer_guard.as_mut().ok_or(DvrError::ConnectionClosed)?;

        debug!(
            command = R::NAME,
            sequence,
            payload_len = payload.len(),
            "sending command"
        );
        tokio::select! {
            _ = self.cancel.cancelled() => return Err(DvrError::Cancelled),
            written = timeout(SEND_RECEIVE_TIMEOUT, writer.write_all(&frame)) => {
                written.map_err(|_| DvrError::Timeout { op: R::NAME })??;
            }
        }

        let reply_frame = tokio::select! {
            _ = self.cancel.cancelled() => return Err(DvrError::Cancelled),
            received = timeout(SEND_RECEIVE_TIMEOUT, reply_rx) => {
                received
                    .map_err(|_| DvrError::Timeout { op: R::NAME })?
                    .map_err(|_| DvrError::ConnectionClosed)?
            }
        };
        drop(writer_guard);

        let (reply_payload, _) = codec::decode(
            &reply_frame,
            Some(R::COMMAND.reply_id()),
            Some(sequence),
        )?;
        let reply: R::Reply = serde_json::from_slice(&reply_payload)?;
        ret::ensure_success(R::NAME, reply.ret())?;
        Ok(reply)
    }

    /// Read one named config block.
    pub async fn get_config(&self, name: impl Into<String>) -> Result<Value> {
        let reply = self.send(GetConfigRequest::new(name)).await?;
        Ok(reply.data)
    }

    /// Write one named config block.
    pub async fn set_config(&self, name: impl Into<String>, data: Value) -> Result<()> {
        self.send(SetConfigRequest::new(name, data)).await?;
        Ok(())
    }

    pub(crate) async fn api_guard(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.api_lock.lock().await
    }

    /// Enable alarm pushes and return a stream of them.
    ///
    /// Dropping the stream stops delivery and sends a best-effort unguard.
    pub async fn observe_alarms(self: &Arc<Self>) -> Result<AlarmStream> {
        // Subscribe before guarding so a push racing the guard reply is not
        // lost.
        let (subscription_id, rx) = self.correlator.subscribe(ALARM_PUSH_ID, 32);
        if let Err(err) = self.send(GuardRequest::default()).await {
            self.correlator.unsubscribe(subscription_id);
            return Err(err);
        }
        info!(host = %self.options.host, "alarm observation armed");
        Ok(AlarmStream {
            client: Arc::clone(self),
            subscription_id,
            rx,
        })
    }

    async fn unguard_best_effort(self: Arc<Self>) {
        if let Err(err) = self.send(UnguardRequest::default()).await {
            debug!(host = %self.options.host, error = %err, "unguard after unsubscribe failed");
        }
    }
}

/// Pushed alarm events from one guarded session.
pub struct AlarmStream {
    client: Arc<DvrClient>,
    subscription_id: u64,
    rx: mpsc::Receiver<Bytes>,
}

impl AlarmStream {
    /// Next pushed alarm, or `None` once the session is gone.
    pub async fn recv(&mut self) -> Option<AlarmInfo> {
        while let Some(frame) = self.rx.recv().await {
            if let Some(info) = decode_alarm(&frame) {
                return Some(info);
            }
        }
        None
    }
}

impl Stream for AlarmStream {
    type Item = AlarmInfo;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match self.rx.poll_recv(cx) {
                Poll::Ready(Some(frame)) => {
                    if let Some(info) = decode_alarm(&frame) {
                        return Poll::Ready(Some(info));
                    }
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl Drop for AlarmStream {
    fn drop(&mut self) {
        self.client.correlator.unsubscribe(self.subscription_id);
        // Unguard needs a live runtime; outside one the device just keeps
        // pushing into a closed subscription.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(Arc::clone(&self.client).unguard_best_effort());
        }
    }
}

fn decode_alarm(frame: &Bytes) -> Option<AlarmInfo> {
    let (payload, _) = match codec::decode(frame, Some(ALARM_PUSH_ID), None) {
        Ok(decoded) => decoded,
        Err(err) => {
            warn!(error = %err, "discarding malformed alarm frame");
            return None;
        }
    };
    match serde_json::from_slice::<AlarmNotify>(&payload) {
        Ok(notify) => notify.alarm_info,
        Err(err) => {
            warn!(error = %err, "discarding unparsable alarm payload");
            None
        }
    }
}

/// Parse the device's `"0x..."` session id string; 0 is never a valid
/// session.
fn parse_session_id(raw: &str) -> Result<u32> {
    let digits = raw
        .get(2..)
        .filter(|_| raw.starts_with("0x") || raw.starts_with("0X"))
        .ok_or_else(|| DvrError::InvalidSessionId(raw.to_string()))?;
    let session_id = u32::from_str_radix(digits, 16)
        .map_err(|_| DvrError::InvalidSessionId(raw.to_string()))?;
    if session_id == 0 {
        return Err(DvrError::InvalidSessionId(raw.to_string()));
    }
    Ok(session_id)
}

/// Session id rendered the way the devices expect it in request payloads.
pub(crate) fn session_id_hex(session_id: u32) -> String {
    format!("0x{session_id:X}")
}

async fn receive_loop(
    mut read_half: OwnedReadHalf,
    correlator: Arc<ReplyCorrelator>,
    cancel: CancellationToken,
) -> Result<()> {
    let mut reassembler = StreamReassembler::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            read = read_half.read(&mut buf) => read?,
        };
        if n == 0 {
            return Err(DvrError::ConnectionClosed);
        }
        for frame in reassembler.push(&buf[..n]) {
            correlator.dispatch(frame);
        }
    }
}

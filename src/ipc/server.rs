//! Unix domain socket server for IPC
//!
//! Serves the external button GUI: status queries, button presses and
//! voice controls go through the same dispatch section as the keypad, and
//! subscribed clients receive every engine event as a push notification.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::events::EngineEvent;
use crate::fsm::FiniteStateMachine;
use crate::keypad::InputCode;

use super::protocol::{Notification, Request, Response, SessionStatus, MAX_MESSAGE_LEN};

/// IPC Server handling client connections
pub struct Server {
    socket_path: PathBuf,
    listener: UnixListener,
    context: Arc<ClientContext>,
    shutdown_tx: broadcast::Sender<()>,
}

/// What every client handler shares
struct ClientContext {
    machine: Arc<FiniteStateMachine>,
    start_time: Instant,
}

impl Server {
    /// Bind the socket and serve `machine`
    pub fn new(socket_path: &Path, machine: Arc<FiniteStateMachine>) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create socket directory")?;
        }

        // Remove stale socket if it exists
        if socket_path.exists() {
            std::fs::remove_file(socket_path).context("failed to remove stale socket")?;
        }

        let listener = UnixListener::bind(socket_path).context("failed to bind Unix socket")?;

        // Set socket permissions to owner-only (0600)
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        info!(?socket_path, "IPC server listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            listener,
            context: Arc::new(ClientContext {
                machine,
                start_time: Instant::now(),
            }),
            shutdown_tx,
        })
    }

    /// Run the server, accepting connections
    pub async fn run(&self) -> Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("client connected");
                    let context = Arc::clone(&self.context);
                    let mut shutdown_rx = self.shutdown_tx.subscribe();

                    tokio::spawn(async move {
                        tokio::select! {
                            result = Self::handle_client(stream, context) => {
                                if let Err(e) = result {
                                    warn!(?e, "client handler error");
                                }
                            }
                            _ = shutdown_rx.recv() => {
                                debug!("client handler shutting down");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(?e, "accept error");
                }
            }
        }
    }

    /// Handle a single client connection
    async fn handle_client(stream: UnixStream, context: Arc<ClientContext>) -> Result<()> {
        let (reader, mut writer) = stream.into_split();

        // Reads are not cancel-safe, so they run apart from the select below
        let (request_tx, mut requests) = mpsc::channel(16);
        let reader_task = tokio::spawn(read_requests(reader, request_tx));

        let mut events: Option<broadcast::Receiver<EngineEvent>> = None;

        let result = loop {
            tokio::select! {
                request = requests.recv() => {
                    let response = match request {
                        Some(Ok(request)) => {
                            debug!(?request, "received request");
                            if request == Request::Subscribe && events.is_none() {
                                events = Some(context.machine.subscribe());
                                debug!("client subscribed to notifications");
                            }
                            Self::process_request(request, &context).await
                        }
                        Some(Err(message)) => Response::error("bad_request", message),
                        None => break Ok(()),
                    };
                    if let Err(e) = send_message(&mut writer, &response).await {
                        break Err(e);
                    }
                }
                event = next_event(&mut events) => match event {
                    Ok(event) => {
                        if let Err(e) = send_message(&mut writer, &Notification::Event { event }).await {
                            break Err(e);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "event subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        events = None;
                    }
                },
            }
        };

        reader_task.abort();
        result
    }

    /// Process a request and return a response
    async fn process_request(request: Request, context: &ClientContext) -> Response {
        let machine = &context.machine;
        match request {
            Request::Ping => Response::Pong,

            Request::GetStatus => Response::Status(SessionStatus {
                version: env!("CARGO_PKG_VERSION").to_string(),
                lifecycle: machine.lifecycle(),
                current_state: machine.current_state(),
                valid_inputs: machine.valid_inputs(),
                speed: machine.speed(),
                gain: machine.gain(),
                uptime_secs: context.start_time.elapsed().as_secs(),
            }),

            Request::Press { code } => {
                let input = match InputCode::new(code) {
                    Ok(input) => input,
                    Err(e) => return Response::error(e.code(), e.to_string()),
                };
                match machine.give_input(input).await {
                    Ok(outcome) => Response::Input(outcome),
                    Err(e) => Response::error(e.code(), e.to_string()),
                }
            }

            Request::AdjustGain { up } => Response::Gain {
                level: machine.adjust_gain(up),
            },

            Request::AdjustSpeed { faster } => Response::Speed {
                level: machine.adjust_speed(faster),
            },

            Request::Subscribe => Response::Subscribed,
        }
    }

    /// Gracefully shutdown the server
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        // Remove socket file
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(?e, "failed to remove socket file");
            }
        }

        info!("IPC server shutdown complete");
    }
}

/// Forward decoded requests until the client disconnects
///
/// Undecodable messages are passed on as errors so the client gets an
/// error response instead of a dropped connection.
async fn read_requests<R: AsyncRead + Unpin>(
    mut reader: R,
    requests: mpsc::Sender<Result<Request, String>>,
) {
    loop {
        let body = match read_message(&mut reader).await {
            Ok(Some(body)) => body,
            Ok(None) => {
                debug!("client disconnected");
                return;
            }
            Err(e) => {
                warn!(?e, "failed to read request");
                return;
            }
        };

        let request = serde_json::from_slice(&body).map_err(|e| e.to_string());
        if requests.send(request).await.is_err() {
            return;
        }
    }
}

async fn next_event(
    events: &mut Option<broadcast::Receiver<EngineEvent>>,
) -> Result<EngineEvent, broadcast::error::RecvError> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Read one length-prefixed message; `None` at a clean end of stream
pub(crate) async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_LEN {
        bail!("message of {len} bytes is too large");
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(body))
}

/// Send a length-prefixed JSON message
pub(crate) async fn send_message<W, T>(writer: &mut W, msg: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let msg_bytes = serde_json::to_vec(msg)?;
    let msg_len = (msg_bytes.len() as u32).to_le_bytes();

    writer.write_all(&msg_len).await?;
    writer.write_all(&msg_bytes).await?;

    Ok(())
}

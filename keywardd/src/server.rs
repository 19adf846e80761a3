//! Unix-socket listener and per-connection tasks.
//!
//! Each accepted connection gets its own task and its own
//! [`ConnectionState`]; the dispatcher is shared. Responses are flushed
//! before the next frame is read, so a client never has more than one
//! request in flight and a slow client only ever stalls itself.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Context, Result, bail};
use keyward_agent::{ConnectionState, Dispatcher};
use keyward_proto::frame::{decode_frame, encode_frame};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Bind the agent socket, replacing a stale one, with the socket file and
/// its directory restricted to the owner.
pub fn bind(socket_path: &Path) -> Result<UnixListener> {
    use std::os::unix::fs::PermissionsExt;

    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
        if let Err(e) =
            std::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o700))
        {
            warn!("could not restrict socket directory permissions: {e}");
        }
    }
    match std::fs::remove_file(socket_path) {
        Ok(()) => debug!(path = %socket_path.display(), "removed stale socket"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(e).with_context(|| format!("removing stale {}", socket_path.display()));
        }
    }

    let listener = UnixListener::bind(socket_path)
        .with_context(|| format!("binding {}", socket_path.display()))?;
    if let Err(e) =
        std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))
    {
        warn!("could not restrict socket permissions: {e}");
    }
    Ok(listener)
}

pub struct Server {
    dispatcher: Arc<Dispatcher>,
    exit_on_last_client: bool,
}

impl Server {
    pub fn new(dispatcher: Arc<Dispatcher>, exit_on_last_client: bool) -> Self {
        Self {
            dispatcher,
            exit_on_last_client,
        }
    }

    /// Accept loop. Returns `Ok` when the last client disconnects in
    /// exit-on-last-client mode, `Err` on a fatal protocol condition.
    pub async fn run(&self, listener: UnixListener) -> Result<()> {
        // SAFETY: getuid never fails.
        let my_uid = unsafe { libc::getuid() };
        let (fatal_tx, mut fatal_rx) = mpsc::channel::<String>(1);
        let (idle_tx, mut idle_rx) = mpsc::unbounded_channel::<()>();
        let active = Arc::new(AtomicUsize::new(0));
        let mut next_id: u64 = 0;

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, _) = accepted.context("accept failed")?;
                    match stream.peer_cred() {
                        Ok(cred) if cred.uid() == my_uid || cred.uid() == 0 => {}
                        Ok(cred) => {
                            warn!(uid = cred.uid(), "rejected connection from foreign uid");
                            continue;
                        }
                        Err(e) => {
                            warn!("rejected connection, peer credentials unavailable: {e}");
                            continue;
                        }
                    }
                    next_id += 1;
                    let conn_id = next_id;
                    debug!(conn = conn_id, "client connected");
                    active.fetch_add(1, Ordering::SeqCst);
                    let dispatcher = Arc::clone(&self.dispatcher);
                    let fatal_tx = fatal_tx.clone();
                    let active = Arc::clone(&active);
                    let idle_tx = idle_tx.clone();
                    tokio::spawn(async move {
                        if let Err(error) =
                            serve_connection(stream, dispatcher, conn_id, &fatal_tx).await
                        {
                            debug!(conn = conn_id, %error, "connection closed");
                        } else {
                            debug!(conn = conn_id, "client disconnected");
                        }
                        if active.fetch_sub(1, Ordering::SeqCst) == 1 {
                            let _ = idle_tx.send(());
                        }
                    });
                }
                Some(reason) = fatal_rx.recv() => {
                    bail!("fatal protocol condition: {reason}");
                }
                Some(()) = idle_rx.recv(), if self.exit_on_last_client => {
                    if active.load(Ordering::SeqCst) == 0 {
                        info!("last client disconnected, exiting");
                        return Ok(());
                    }
                }
            }
        }
    }
}

async fn serve_connection(
    mut stream: UnixStream,
    dispatcher: Arc<Dispatcher>,
    conn_id: u64,
    fatal_tx: &mpsc::Sender<String>,
) -> Result<()> {
    let mut conn = ConnectionState::new(conn_id);
    let mut buf: Vec<u8> = Vec::with_capacity(4096);
    let mut chunk = [0u8; 4096];

    loop {
        // Framing violations (oversize, zero-length) close the connection.
        while let Some((msg_type, payload)) = decode_frame(&mut buf)? {
            let response = match dispatcher.handle_frame(&mut conn, msg_type, &payload).await {
                Ok(response) => response,
                Err(fatal) => {
                    let _ = fatal_tx.send(fatal.to_string()).await;
                    bail!("fatal request on this connection: {fatal}");
                }
            };
            let (resp_type, body) = response.encode();
            stream.write_all(&encode_frame(resp_type, &body)?).await?;
            stream.flush().await?;
        }

        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

//! Control socket for session tools
//!
//! Every frame is a little-endian `u32` byte count followed by that many
//! bytes of JSON. A client sends one [`DisplayRequest`] at a time and reads
//! exactly one [`DisplayResponse`] back before sending the next.

use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{ErrorKind, Read, Write};
use std::marker::PhantomData;
use std::os::unix::fs::{DirBuilderExt, FileTypeExt, PermissionsExt};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::constants::ipc::{MAX_MESSAGE_SIZE, SOCKET_PATH};

mod messages;
pub use messages::{DisplayRequest, DisplayResponse, MonitorView};

/// `$XDG_RUNTIME_DIR/randr-layoutd/display.sock`, else under the cache dir
pub fn default_socket_path() -> Result<PathBuf> {
    let base = match std::env::var_os("XDG_RUNTIME_DIR") {
        Some(dir) => PathBuf::from(dir),
        None => dirs::cache_dir().context("Neither XDG_RUNTIME_DIR nor a cache directory is set")?,
    };
    Ok(base.join(SOCKET_PATH))
}

/// One side of a connection, typed by what it sends and what it receives
pub struct Endpoint<Out, In> {
    stream: UnixStream,
    _dir: PhantomData<fn(Out) -> In>,
}

/// Session tool side
pub type DisplayClient = Endpoint<DisplayRequest, DisplayResponse>;

/// Daemon side of an accepted connection
pub type SessionPeer = Endpoint<DisplayResponse, DisplayRequest>;

impl<Out: Serialize, In: DeserializeOwned> Endpoint<Out, In> {
    fn new(stream: UnixStream) -> Self {
        Self {
            stream,
            _dir: PhantomData,
        }
    }

    pub fn send(&mut self, msg: &Out) -> Result<()> {
        write_frame(&mut self.stream, msg)
    }

    /// Next message, `None` once the peer hung up between frames
    pub fn recv(&mut self) -> Result<Option<In>> {
        read_frame(&mut self.stream)
    }
}

impl DisplayClient {
    pub fn connect() -> Result<Self> {
        Self::connect_to(&default_socket_path()?)
    }

    pub fn connect_to(path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(path)
            .with_context(|| format!("No daemon listening on {}", path.display()))?;
        Ok(Self::new(stream))
    }

    /// Round trip one request
    pub fn request(&mut self, req: DisplayRequest) -> Result<DisplayResponse> {
        self.send(&req)?;
        self.recv()?
            .context("Daemon closed the connection without replying")
    }
}

/// Listening socket owned by the daemon; the file goes away on drop
pub struct DisplaySocket {
    listener: UnixListener,
    path: PathBuf,
}

impl DisplaySocket {
    pub fn bind() -> Result<Self> {
        Self::bind_to(default_socket_path()?)
    }

    /// Bind at `path`, refusing to take over a socket another daemon answers on
    pub fn bind_to(path: PathBuf) -> Result<Self> {
        if let Some(dir) = path.parent() {
            std::fs::DirBuilder::new()
                .recursive(true)
                .mode(0o700)
                .create(dir)
                .with_context(|| format!("Cannot create {}", dir.display()))?;
        }

        match std::fs::symlink_metadata(&path) {
            Ok(meta) if meta.file_type().is_socket() => {
                if UnixStream::connect(&path).is_ok() {
                    bail!("Another daemon is already listening on {}", path.display());
                }
                debug!(path = %path.display(), "removing stale socket");
                std::fs::remove_file(&path)
                    .with_context(|| format!("Cannot remove stale socket {}", path.display()))?;
            }
            Ok(_) => bail!("{} exists and is not a socket", path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e).with_context(|| format!("Cannot inspect {}", path.display())),
        }

        let listener = UnixListener::bind(&path)
            .with_context(|| format!("Cannot bind {}", path.display()))?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o700))
            .context("Cannot restrict socket permissions")?;
        info!(path = %path.display(), "control socket bound");

        Ok(Self { listener, path })
    }

    /// Block until a session tool connects
    pub fn accept(&self) -> Result<SessionPeer> {
        let (stream, _) = self.listener.accept().context("accept() on control socket failed")?;
        Ok(SessionPeer::new(stream))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DisplaySocket {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn write_frame<T: Serialize>(w: &mut impl Write, msg: &T) -> Result<()> {
    let body = serde_json::to_vec(msg).context("Cannot encode message")?;
    if body.len() > MAX_MESSAGE_SIZE {
        bail!("Refusing to send {} byte frame (limit {})", body.len(), MAX_MESSAGE_SIZE);
    }
    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
    frame.extend_from_slice(&body);
    w.write_all(&frame).context("Cannot write frame")?;
    w.flush().context("Cannot flush frame")
}

fn read_frame<T: DeserializeOwned>(r: &mut impl Read) -> Result<Option<T>> {
    let mut header = [0u8; 4];
    match r.read_exact(&mut header) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e).context("Cannot read frame header"),
    }
    let len = u32::from_le_bytes(header) as usize;
    if len > MAX_MESSAGE_SIZE {
        bail!("Incoming frame of {} bytes exceeds the {} byte limit", len, MAX_MESSAGE_SIZE);
    }

    let mut body = vec![0u8; len];
    r.read_exact(&mut body).context("Frame truncated")?;
    serde_json::from_slice(&body)
        .map(Some)
        .context("Cannot decode message")
}

//! Keypad listener reading raw key bytes from an input source
//!
//! Runs on a dedicated thread because the source (normally stdin) only
//! offers blocking reads. Each key is mapped to an input code and forwarded
//! to the state machine over a channel.

use std::io::{BufReader, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::keys::{InputCode, KeyMap};

/// Events sent from the keypad listener to the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeypadEvent {
    /// A key was pressed
    Key(InputCode),
    /// The input source reached end of stream
    Closed,
}

/// Keypad listener that turns a byte stream into input codes
pub struct KeypadListener {
    event_tx: mpsc::Sender<KeypadEvent>,
    key_map: KeyMap,
    running: Arc<AtomicBool>,
}

impl KeypadListener {
    /// Create a new keypad listener
    pub fn new(event_tx: mpsc::Sender<KeypadEvent>, key_map: KeyMap) -> Self {
        Self {
            event_tx,
            key_map,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start reading keys from `source`
    ///
    /// This spawns a dedicated thread that blocks on the source. The thread
    /// exits at end of stream, on a read error, when the receiving side is
    /// dropped, or at the first key after `stop()` is called.
    pub fn start<R>(&self, source: R) -> Result<(), KeypadError>
    where
        R: Read + Send + 'static,
    {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(KeypadError::AlreadyRunning);
        }

        let event_tx = self.event_tx.clone();
        let key_map = self.key_map.clone();
        let running = Arc::clone(&self.running);

        thread::Builder::new()
            .name("keypad-listener".to_string())
            .spawn(move || {
                info!("keypad listener thread started");

                if let Err(e) = run_read_loop(source, &key_map, &event_tx, &running) {
                    error!(?e, "keypad listener error");
                }

                let _ = event_tx.blocking_send(KeypadEvent::Closed);
                running.store(false, Ordering::SeqCst);
                info!("keypad listener thread stopped");
            })
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                KeypadError::ThreadSpawn(e.to_string())
            })?;

        Ok(())
    }

    /// Stop the keypad listener
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Check if the listener is currently running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Errors that can occur in the keypad listener
#[derive(Debug, thiserror::Error)]
pub enum KeypadError {
    #[error("keypad listener is already running")]
    AlreadyRunning,

    #[error("failed to spawn listener thread: {0}")]
    ThreadSpawn(String),

    #[error("failed to read from keypad source")]
    Read(#[from] std::io::Error),
}

/// Read keys until end of stream or until the listener is stopped
fn run_read_loop<R: Read>(
    source: R,
    key_map: &KeyMap,
    event_tx: &mpsc::Sender<KeypadEvent>,
    running: &AtomicBool,
) -> Result<(), KeypadError> {
    for byte in BufReader::new(source).bytes() {
        if !running.load(Ordering::SeqCst) {
            break;
        }

        let key = char::from(byte?);
        let Some(code) = key_map.map_key(key) else {
            continue;
        };

        debug!(?key, input = %code, "key pressed");

        // blocking_send is fine here: this thread has no async context
        if event_tx.blocking_send(KeypadEvent::Key(code)).is_err() {
            warn!("failed to send key event - channel closed?");
            break;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn test_listener_creation() {
        let (tx, _rx) = mpsc::channel(32);
        let listener = KeypadListener::new(tx, KeyMap::default());
        assert!(!listener.is_running());
    }

    #[tokio::test]
    async fn test_keys_are_mapped_and_forwarded() {
        let (tx, mut rx) = mpsc::channel(32);
        let listener = KeypadListener::new(tx, KeyMap::default());
        listener.start(Cursor::new(b"1\n*\r\n9x".to_vec())).unwrap();

        let mut codes = Vec::new();
        while let Some(event) = rx.recv().await {
            match event {
                KeypadEvent::Key(code) => codes.push(code.value()),
                KeypadEvent::Closed => break,
            }
        }

        assert_eq!(codes, vec![1, 10, 9, 0]);
    }

    #[tokio::test]
    async fn test_double_start_is_rejected() {
        let (tx, mut rx) = mpsc::channel(32);
        let listener = KeypadListener::new(tx, KeyMap::default());
        // the reader blocks until the writer end is dropped
        let (writer, reader) = std::os::unix::net::UnixStream::pair().unwrap();
        listener.start(reader).unwrap();
        assert!(matches!(
            listener.start(Cursor::new(Vec::new())),
            Err(KeypadError::AlreadyRunning)
        ));
        assert!(listener.is_running());
        drop(writer);
        assert_eq!(rx.recv().await, Some(KeypadEvent::Closed));
    }
}

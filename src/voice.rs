//! Voice output.
//!
//! `VoiceSink` is the blocking text-to-speech seam. `VoiceWorker` runs a sink on
//! its own thread so speech latency never stalls the video path, and holds at
//! most one utterance in flight. Sink failures are logged and discarded here;
//! they never reach the frame loop.

use anyhow::Result;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;
use thiserror::Error;

use crate::config::VoiceSettings;

#[derive(Debug, Error)]
pub enum VoiceError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} exited with {status}")]
    Exit { program: String, status: ExitStatus },
    #[error("voice output unavailable: {0}")]
    Unavailable(String),
}

/// Blocking speech output.
pub trait VoiceSink: Send {
    fn speak(&mut self, text: &str) -> Result<(), VoiceError>;
}

/// Speaks through an external TTS program, message appended as the last argument.
#[derive(Clone, Debug)]
pub struct CommandVoice {
    program: String,
    args: Vec<String>,
}

impl CommandVoice {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Parse a whitespace-separated command line such as `espeak -s 150`.
    pub fn from_command_line(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self::new(program, parts.collect()))
    }
}

impl VoiceSink for CommandVoice {
    fn speak(&mut self, text: &str) -> Result<(), VoiceError> {
        let status = Command::new(&self.program)
            .args(&self.args)
            .arg(text)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|source| VoiceError::Spawn {
                program: self.program.clone(),
                source,
            })?;
        if !status.success() {
            return Err(VoiceError::Exit {
                program: self.program.clone(),
                status,
            });
        }
        Ok(())
    }
}

/// Logs alerts instead of speaking them.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogVoice;

impl VoiceSink for LogVoice {
    fn speak(&mut self, text: &str) -> Result<(), VoiceError> {
        log::info!("voice: {}", text);
        Ok(())
    }
}

pub fn sink_from_config(settings: &VoiceSettings) -> Box<dyn VoiceSink> {
    match settings
        .command
        .as_deref()
        .and_then(CommandVoice::from_command_line)
    {
        Some(voice) => Box::new(voice),
        None => Box::new(LogVoice),
    }
}

/// Dedicated speech thread with a single-utterance busy guard.
pub struct VoiceWorker {
    tx: Option<SyncSender<String>>,
    busy: Arc<AtomicBool>,
    spoken: Arc<AtomicU64>,
    join: Option<JoinHandle<()>>,
}

/// Clears the busy flag even if the sink panics.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl VoiceWorker {
    pub fn spawn(mut sink: Box<dyn VoiceSink>) -> Result<Self> {
        let (tx, rx) = mpsc::sync_channel::<String>(1);
        let busy = Arc::new(AtomicBool::new(false));
        let spoken = Arc::new(AtomicU64::new(0));
        let busy_thread = busy.clone();
        let spoken_thread = spoken.clone();
        let join = std::thread::Builder::new()
            .name("nearsight-voice".to_string())
            .spawn(move || {
                for text in rx {
                    let _guard = BusyGuard(&busy_thread);
                    match sink.speak(&text) {
                        Ok(()) => {
                            spoken_thread.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(err) => log::warn!("voice alert dropped: {}", err),
                    }
                }
            })?;
        Ok(Self {
            tx: Some(tx),
            busy,
            spoken,
            join: Some(join),
        })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Number of utterances the sink completed without error.
    pub fn spoken(&self) -> u64 {
        self.spoken.load(Ordering::Relaxed)
    }

    /// Hand `text` to the speech thread. Returns `false` without queuing when an
    /// utterance is already in flight or the thread is gone.
    pub fn try_speak(&self, text: String) -> bool {
        let Some(tx) = self.tx.as_ref() else {
            return false;
        };
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        match tx.try_send(text) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.busy.store(false, Ordering::SeqCst);
                false
            }
        }
    }
}

impl Drop for VoiceWorker {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                log::error!("voice thread panicked");
            }
        }
    }
}

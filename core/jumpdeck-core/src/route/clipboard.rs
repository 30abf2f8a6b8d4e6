//! Clipboard primitive.
//!
//! [`SystemClipboard`] tries `arboard` first, then the platform's command-line
//! helper (`clip`, `pbcopy`, `wl-copy`, `xclip`, `xsel`). Both failing is an
//! error the cursor reports as `CLIPBOARD_FAIL`.

use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::Mutex;

use tracing::debug;

use crate::error::{NavError, Result};

pub trait ClipboardSink: Send + Sync {
    fn set_text(&self, text: &str) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct SystemClipboard;

impl SystemClipboard {
    pub fn new() -> Self {
        Self
    }
}

type Helper = (&'static str, &'static [&'static str]);

const WINDOWS_HELPERS: &[Helper] = &[("clip", &[])];
const MACOS_HELPERS: &[Helper] = &[("pbcopy", &[])];
const UNIX_HELPERS: &[Helper] = &[
    ("wl-copy", &[]),
    ("xclip", &["-selection", "clipboard"]),
    ("xsel", &["--clipboard", "--input"]),
];

fn fallback_commands() -> &'static [Helper] {
    if cfg!(target_os = "windows") {
        WINDOWS_HELPERS
    } else if cfg!(target_os = "macos") {
        MACOS_HELPERS
    } else {
        UNIX_HELPERS
    }
}

fn copy_with_command(program: &str, args: &[&str], text: &str) -> std::io::Result<()> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;
    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(text.as_bytes())?;
    }
    let status = child.wait()?;
    if status.success() {
        Ok(())
    } else {
        Err(std::io::Error::other(format!("{program} exited with {status}")))
    }
}

impl ClipboardSink for SystemClipboard {
    fn set_text(&self, text: &str) -> Result<()> {
        let primary = arboard::Clipboard::new().and_then(|mut cb| cb.set_text(text.to_string()));
        let primary_err = match primary {
            Ok(()) => return Ok(()),
            Err(err) => err.to_string(),
        };
        debug!(error = %primary_err, "Primary clipboard failed; trying command fallback");

        let mut errors = vec![format!("arboard: {primary_err}")];
        for (program, args) in fallback_commands() {
            match copy_with_command(program, args, text) {
                Ok(()) => return Ok(()),
                Err(err) => errors.push(format!("{program}: {err}")),
            }
        }
        Err(NavError::Clipboard(errors.join("; ")))
    }
}

/// In-memory sink that records every write.
#[derive(Debug, Default)]
pub struct MemoryClipboard {
    writes: Mutex<Vec<String>>,
    failing: Mutex<bool>,
}

impl MemoryClipboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        if let Ok(mut flag) = self.failing.lock() {
            *flag = failing;
        }
    }

    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().map(|w| w.clone()).unwrap_or_default()
    }

    pub fn last(&self) -> Option<String> {
        self.writes().pop()
    }
}

impl ClipboardSink for MemoryClipboard {
    fn set_text(&self, text: &str) -> Result<()> {
        if self.failing.lock().map(|f| *f).unwrap_or(false) {
            return Err(NavError::Clipboard("clipboard locked by another process".to_string()));
        }
        match self.writes.lock() {
            Ok(mut writes) => writes.push(text.to_string()),
            Err(poisoned) => poisoned.into_inner().push(text.to_string()),
        }
        Ok(())
    }
}

// logger.rs - Terminal + log file tee
// Purpose: Every diagnostic goes to the terminal (coloured by severity), to the
//          per-run log file when one is open, and to any live subscribers
//          (the /scan endpoint streams its log this way)

use chrono::{DateTime, Local};
use colored::*;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Error,
    Warning,
    Info,
    Success,
    Debug,
}

impl Level {
    pub fn label(&self) -> &'static str {
        match self {
            Level::Error => "ERROR",
            Level::Warning => "WARNING",
            Level::Info | Level::Success => "INFO",
            Level::Debug => "DEBUG",
        }
    }
}

#[derive(Clone)]
pub struct Logger {
    inner: Arc<Inner>,
}

struct Inner {
    verbose: bool,
    path: Option<PathBuf>,
    file: Mutex<Option<File>>,
    subscribers: Mutex<Vec<(u64, UnboundedSender<String>)>>,
    next_id: AtomicU64,
}

/// Name of the log file for a run started at `started`
pub fn log_file_name(prefix: &str, started: DateTime<Local>) -> String {
    format!("{}_{}.log", prefix, started.format("%Y%m%d_%H%M%S"))
}

/// True when `name` looks like a log file written by this tool
pub fn is_log_file_for(prefix: &str, name: &str) -> bool {
    let Some(stamp) = name
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('_'))
        .and_then(|rest| rest.strip_suffix(".log"))
    else {
        return false;
    };

    // YYYYMMDD_HHMMSS
    stamp.len() == 15
        && stamp.char_indices().all(|(i, c)| if i == 8 { c == '_' } else { c.is_ascii_digit() })
}

impl Logger {
    /// Terminal-only logger
    pub fn new(verbose: bool) -> Self {
        Self::build(verbose, None, None)
    }

    /// Logger that also appends to a freshly created, timestamped file in `dir`
    pub fn with_file(dir: &Path, prefix: &str, verbose: bool) -> io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(log_file_name(prefix, Local::now()));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self::build(verbose, Some(path), Some(file)))
    }

    fn build(verbose: bool, path: Option<PathBuf>, file: Option<File>) -> Self {
        Self {
            inner: Arc::new(Inner {
                verbose,
                path,
                file: Mutex::new(file),
                subscribers: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    pub fn log_file(&self) -> Option<&Path> {
        self.inner.path.as_deref()
    }

    pub fn error(&self, message: impl AsRef<str>) {
        self.emit(Level::Error, message.as_ref());
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        self.emit(Level::Warning, message.as_ref());
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.emit(Level::Info, message.as_ref());
    }

    pub fn success(&self, message: impl AsRef<str>) {
        self.emit(Level::Success, message.as_ref());
    }

    pub fn debug(&self, message: impl AsRef<str>) {
        self.emit(Level::Debug, message.as_ref());
    }

    fn emit(&self, level: Level, message: &str) {
        match level {
            Level::Error => eprintln!("{}", format!("[-] {}", message).red().bold()),
            Level::Warning => println!("{}", format!("[!] {}", message).yellow()),
            Level::Info => println!("{}", format!("[*] {}", message).cyan()),
            Level::Success => println!("{}", format!("[+] {}", message).green()),
            Level::Debug if self.inner.verbose => println!("{}", format!("    {}", message).dimmed()),
            Level::Debug => {}
        }

        let line = format!(
            "{} [{}] {}",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            level.label(),
            message
        );

        if let Ok(mut guard) = self.inner.file.lock() {
            if let Some(file) = guard.as_mut() {
                writeln!(file, "{}", line).ok();
            }
        }

        if let Ok(mut subscribers) = self.inner.subscribers.lock() {
            subscribers.retain(|(_, tx)| tx.send(format!("{}\n", line)).is_ok());
        }
    }

    /// Receive a copy of every line logged from now on
    pub fn subscribe(&self) -> (u64, UnboundedReceiver<String>) {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut subscribers) = self.inner.subscribers.lock() {
            subscribers.push((id, tx));
        }
        (id, rx)
    }

    /// Drop a subscription; its receiver ends once drained
    pub fn unsubscribe(&self, id: u64) {
        if let Ok(mut subscribers) = self.inner.subscribers.lock() {
            subscribers.retain(|(sub_id, _)| *sub_id != id);
        }
    }

    /// Flush and release the log file handle
    pub fn close(&self) {
        if let Ok(mut guard) = self.inner.file.lock() {
            if let Some(mut file) = guard.take() {
                file.flush().ok();
            }
        }
    }
}

use chrono::{DateTime, Utc};
use env_logger::{Env, Logger};
use log::{Log, Metadata, Record, SetLoggerError};
use std::cell::RefCell;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

thread_local! {
    static SITE_FILE: RefCell<Option<File>> = const { RefCell::new(None) };
}

/// `[RFC3339] LEVEL - message`
pub fn format_line(now: &DateTime<Utc>, record: &Record) -> String {
    format!("[{}] {} - {}", now.to_rfc3339(), record.level(), record.args())
}

/// Console logging through `env_logger` (level from `RUST_LOG`, default
/// `info`), plus a copy of every record emitted on a thread that holds a
/// [`SiteScope`] in that site's log file.
pub struct SiteLogger {
    console: Logger,
}

impl SiteLogger {
    pub fn new() -> Self {
        let console = env_logger::Builder::from_env(Env::default().default_filter_or("info")).build();
        SiteLogger { console }
    }

    /// Install as the global logger.
    pub fn init(self) -> Result<(), SetLoggerError> {
        let max_level = self.console.filter();
        log::set_boxed_logger(Box::new(self))?;
        log::set_max_level(max_level);
        Ok(())
    }
}

impl Default for SiteLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl Log for SiteLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.console.enabled(metadata)
    }

    fn log(&self, record: &Record) {
        if !self.console.matches(record) {
            return;
        }
        self.console.log(record);
        SITE_FILE.with(|slot| {
            if let Some(file) = slot.borrow_mut().as_mut() {
                let _ = writeln!(file, "{}", format_line(&Utc::now(), record));
            }
        });
    }

    fn flush(&self) {
        self.console.flush();
        SITE_FILE.with(|slot| {
            if let Some(file) = slot.borrow_mut().as_mut() {
                let _ = file.flush();
            }
        });
    }
}

/// Routes this thread's records into a site log file until dropped.
pub struct SiteScope {
    path: Option<PathBuf>,
    previous: Option<File>,
}

impl SiteScope {
    /// Open `<simulation_dir>/<site>/log_<YYYYMMDDHHMM>.txt` for this thread.
    pub fn enter(simulation_dir: &Path, site: &str, now: &DateTime<Utc>) -> io::Result<Self> {
        let dir = simulation_dir.join(site);
        fs::create_dir_all(&dir)?;
        let path = dir.join(format!("log_{}.txt", now.format("%Y%m%d%H%M")));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let previous = SITE_FILE.with(|slot| slot.borrow_mut().replace(file));
        Ok(SiteScope {
            path: Some(path),
            previous,
        })
    }

    /// A scope that writes no file, for runs with site logs turned off.
    pub fn disabled() -> Self {
        let previous = SITE_FILE.with(|slot| slot.borrow_mut().take());
        SiteScope {
            path: None,
            previous,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl Drop for SiteScope {
    fn drop(&mut self) {
        let previous = self.previous.take();
        SITE_FILE.with(|slot| {
            if let Some(mut file) = slot.replace(previous) {
                let _ = file.flush();
            }
        });
    }
}

//! Script scaffolding
//!
//! Common command-line flags, single-instance locking, date parameters and
//! start/finish reporting for batch scripts.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Datelike, Local, NaiveDate, NaiveDateTime};
use clap::Args;

use crate::cfg_host::CfgHost;
use crate::config::{LoggingConfig, SllConfig};
use crate::error::{Error, Result};
use crate::locker::{LockGuard, Locker, DEFAULT_LOCK_TTL};
use crate::logger::{self, paint, palette};
use crate::profiler::Profiler;

const DATE_FORMAT: &str = "%Y-%m-%d";
const DATETIME_FORMAT: &str = "%Y-%m-%d-%H:%M:%S";

/// Flags shared by every script; flatten into the script's own parser
#[derive(Debug, Clone, Default, Args)]
pub struct ScriptArgs {
    /// Debug run: no lock file, debug output from the library
    #[arg(short, long)]
    pub verbose: bool,

    /// Host inventory XML
    #[arg(long)]
    pub cfg_host: Option<PathBuf>,

    /// Day to process, YYYY-MM-DD (default: yesterday)
    #[arg(long)]
    pub date: Option<String>,

    /// Start of a date range, YYYY-MM-DD
    #[arg(long)]
    pub date_from: Option<String>,

    /// End of a date range, YYYY-MM-DD
    #[arg(long)]
    pub date_to: Option<String>,

    /// Start of a time range, YYYY-MM-DD-HH:MM:SS
    #[arg(long)]
    pub datetime_from: Option<String>,

    /// End of a time range, YYYY-MM-DD-HH:MM:SS
    #[arg(long)]
    pub datetime_to: Option<String>,
}

impl ScriptArgs {
    /// Logging settings for this run: verbose runs get library debug output
    pub fn logging(&self, base: &LoggingConfig) -> LoggingConfig {
        LoggingConfig {
            debug_info: self.verbose,
            ..base.clone()
        }
    }

    fn lines(&self) -> Vec<(&'static str, String)> {
        let show = |v: &Option<String>| v.clone().unwrap_or_else(|| "None".into());
        vec![
            ("verbose", self.verbose.to_string()),
            (
                "cfg_host",
                self.cfg_host
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "None".into()),
            ),
            ("date", show(&self.date)),
            ("date_from", show(&self.date_from)),
            ("date_to", show(&self.date_to)),
            ("datetime_from", show(&self.datetime_from)),
            ("datetime_to", show(&self.datetime_to)),
        ]
    }
}

/// Script behaviour not driven by command-line flags
#[derive(Debug, Clone)]
pub struct ScriptOptions {
    pub create_lock_file: bool,
    pub lock_dir: PathBuf,
    pub lock_ttl: Duration,
    /// Date used without `--date` (default: yesterday)
    pub default_date: Option<NaiveDate>,
    pub logging: LoggingConfig,
}

impl Default for ScriptOptions {
    fn default() -> Self {
        Self {
            create_lock_file: true,
            lock_dir: PathBuf::from("/tmp"),
            lock_ttl: DEFAULT_LOCK_TTL,
            default_date: None,
            logging: LoggingConfig::default(),
        }
    }
}

impl ScriptOptions {
    pub fn from_config(config: &SllConfig) -> Self {
        Self {
            lock_dir: config.locker.lock_dir.clone(),
            lock_ttl: config.locker.ttl(),
            logging: config.logging.clone(),
            ..Self::default()
        }
    }
}

/// A running script
#[derive(Debug)]
pub struct Script {
    name: String,
    started_at: DateTime<Local>,
    args: ScriptArgs,
    lock: Option<LockGuard>,
    cfg: Option<CfgHost>,
    date: NaiveDate,
    date_range: Option<(NaiveDate, NaiveDate)>,
    datetime_range: Option<(NaiveDateTime, NaiveDateTime)>,
}

impl Script {
    pub fn new(name: &str, args: ScriptArgs, options: ScriptOptions) -> Result<Self> {
        if name.trim().is_empty() {
            return Err(Error::Script("script name is empty".into()));
        }

        logger::configure(&args.logging(&options.logging));

        let lock = if options.create_lock_file && !args.verbose {
            Some(Locker::for_script(&options.lock_dir, name).acquire(options.lock_ttl)?)
        } else {
            None
        };

        tracing::info!("Script name: {}", name);
        tracing::info!("Script options: {:?}", options);
        tracing::info!("{}", paint("System args:", palette::TABLE));
        for (flag, value) in args.lines() {
            tracing::info!("--{} : {}", paint(flag, palette::TABLE), paint(value, palette::VALUE));
        }

        let cfg = match &args.cfg_host {
            Some(path) => Some(CfgHost::from_file(path).map_err(|e| {
                Error::Script(format!("Not found cfg_host file! cfg_host={}: {}", path.display(), e))
            })?),
            None => None,
        };

        let datetime_range = match (&args.datetime_from, &args.datetime_to) {
            (Some(from), Some(to)) => Some((
                parse_datetime(from, "--datetime-from")?,
                parse_datetime(to, "--datetime-to")?,
            )),
            _ => None,
        };

        let date_range = match (&args.date_from, &args.date_to) {
            (Some(from), Some(to)) => Some((parse_date(from, "--date-from")?, parse_date(to, "--date-to")?)),
            _ => None,
        };

        let date = match &args.date {
            Some(date) => parse_date(date, "--date")?,
            None => options.default_date.unwrap_or_else(yesterday),
        };

        let script = Self {
            name: name.to_string(),
            started_at: Local::now(),
            args,
            lock,
            cfg,
            date,
            date_range,
            datetime_range,
        };
        script.log_dates();
        Ok(script)
    }

    fn log_dates(&self) {
        let show = |label: &str, value: String| {
            tracing::info!("{} : {}", paint(label, palette::TABLE), paint(value, palette::VALUE));
        };
        show("DATE", self.date.to_string());
        show("DAY", self.day().to_string());
        show("MONTH", self.month().to_string());
        if let Some((from, to)) = self.datetime_range {
            show("DATE_TIME_FROM", from.to_string());
            show("DATE_TIME_TO", to.to_string());
        }
        if let Some((from, to)) = self.date_range {
            show("DATE_FROM", from.to_string());
            show("DATE_TO", to.to_string());
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }

    pub fn args(&self) -> &ScriptArgs {
        &self.args
    }

    pub fn is_locked(&self) -> bool {
        self.lock.is_some()
    }

    /// Host inventory given with `--cfg-host`
    pub fn cfg(&self) -> Result<&CfgHost> {
        self.cfg
            .as_ref()
            .ok_or_else(|| Error::Script("no --cfg-host given".into()))
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    /// Date as `YYYY-MM-DD`
    pub fn date_str(&self) -> String {
        self.date.format(DATE_FORMAT).to_string()
    }

    pub fn day(&self) -> u32 {
        self.date.day()
    }

    pub fn month(&self) -> u32 {
        self.date.month()
    }

    pub fn date_range(&self) -> Option<(NaiveDate, NaiveDate)> {
        self.date_range
    }

    pub fn datetime_range(&self) -> Option<(NaiveDateTime, NaiveDateTime)> {
        self.datetime_range
    }

    pub fn start_info(&self) {
        tracing::info!(
            "\nScript {:?} Start!\n\tAt: {}\n",
            self.name,
            self.started_at.format("%Y-%m-%d %H:%M:%S")
        );
    }

    /// Log the outcome. The lock is released on success and kept on
    /// failure, so a broken script is not restarted before the TTL.
    pub fn finish(self, success: bool) {
        let now = Local::now();
        let status = if success {
            paint("Successful Finished!", palette::OPENED)
        } else {
            paint("FAILED Finished!", palette::CLOSED)
        };
        let total = (now - self.started_at).to_std().unwrap_or_default();
        tracing::info!(
            "\nScript {:?} {}\n\tAt: {}\n\tTotal work time: {:.3?}\n",
            self.name,
            status,
            now.format("%Y-%m-%d %H:%M:%S"),
            total
        );

        if let Some(lock) = self.lock {
            if success {
                drop(lock);
            } else {
                lock.keep();
            }
        }
    }

    /// Time a block; enabled in verbose runs
    pub fn profile(&self, label: &str) -> Profiler {
        Profiler::start(self.args.verbose, label)
    }
}

fn yesterday() -> NaiveDate {
    let today = Local::now().date_naive();
    today.pred_opt().unwrap_or(today)
}

fn parse_date(value: &str, flag: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, DATE_FORMAT)
        .map_err(|e| Error::Script(format!("Error while convert date {} {:?}: {}", flag, value, e)))
}

fn parse_datetime(value: &str, flag: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, DATETIME_FORMAT)
        .map_err(|e| Error::Script(format!("Error while convert datetime {} {:?}: {}", flag, value, e)))
}

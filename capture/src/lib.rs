//! Task inbox library: capture one-line tasks into an append-only Markdown file and read
//! back the most recent ones.
//! The core stays pure; filesystem effects live in `storage`, time comes from `clock`.

pub mod core {
    use chrono::{NaiveDateTime, Timelike};
    use std::num::NonZeroUsize;

    /// Marker that opens every entry line. Any line starting with it is an entry.
    pub const ENTRY_PREFIX: &str = "- [";

    /// `strftime` pattern for entry timestamps: local time, minute precision, no zone.
    pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M";

    /// Written once when the inbox file is created; never reconciled afterwards.
    pub const PREAMBLE: &str = "# Tasks inbox\n\n\
        New tasks you enter appear here; then you can prioritize them.\n\n\
        ---\n\n";

    /* ------------------------------ Entities ------------------------------ */

    /// One captured task. Immutable once written.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Entry {
        /// Truncated to the minute.
        pub timestamp: NaiveDateTime,
        /// Trimmed, single-line, never empty.
        pub text: String,
    }

    impl Entry {
        /// Validate `raw` and stamp it with `timestamp`.
        pub fn new(timestamp: NaiveDateTime, raw: &str) -> Result<Self, DomainError> {
            let text = normalize_text(raw).ok_or(DomainError::EmptyText)?;
            Ok(Self {
                timestamp: truncate_to_minute(timestamp),
                text,
            })
        }

        /// The line as stored in the inbox, without the trailing newline.
        pub fn to_line(&self) -> String {
            format!(
                "{ENTRY_PREFIX}{}] {}",
                self.timestamp.format(TIMESTAMP_FORMAT),
                self.text
            )
        }
    }

    /* ------------------------------ Helpers ------------------------------ */

    pub fn is_entry_line(line: &str) -> bool {
        line.starts_with(ENTRY_PREFIX)
    }

    /// Trim surrounding whitespace and fold line breaks into single spaces.
    /// Returns `None` when nothing is left.
    pub fn normalize_text(raw: &str) -> Option<String> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(trimmed.lines().collect::<Vec<_>>().join(" "))
    }

    pub fn truncate_to_minute(ts: NaiveDateTime) -> NaiveDateTime {
        ts.with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(ts)
    }

    /// The last `limit` entry lines of `text`, oldest first.
    pub fn tail_entry_lines(text: &str, limit: NonZeroUsize) -> Vec<String> {
        let lines: Vec<&str> = text.lines().filter(|line| is_entry_line(line)).collect();
        let start = lines.len().saturating_sub(limit.get());
        lines[start..].iter().map(|line| line.to_string()).collect()
    }

    /* ---------------------------- Errors (domain) ---------------------------- */

    #[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
    pub enum DomainError {
        #[error("task text is empty; please enter some text")]
        EmptyText,
    }

}

pub mod clock {
    //! Time capability for new entries, so tests can pin "now".

    use chrono::{Local, NaiveDateTime};

    pub trait Clock {
        fn now(&self) -> NaiveDateTime;
    }

    /// Local wall-clock time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> NaiveDateTime {
            Local::now().naive_local()
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FixedClock(pub NaiveDateTime);

    impl Clock for FixedClock {
        fn now(&self) -> NaiveDateTime {
            self.0
        }
    }

    impl<F> Clock for F
    where
        F: Fn() -> NaiveDateTime,
    {
        fn now(&self) -> NaiveDateTime {
            self()
        }
    }
}

pub mod parser {
    //! Entry-line parser built on `nom`.
    //!
    //! Only the reader's structured view uses it; listing itself keys off the prefix, so a
    //! hand-edited line that fails here is still listed verbatim.

    use crate::core::{ENTRY_PREFIX, Entry};
    use anyhow::{Result, anyhow};
    use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
    use nom::{
        IResult,
        bytes::complete::{tag, take_while_m_n},
        character::complete::char,
        combinator::{map, map_opt, map_res, rest},
        error::{VerboseError, convert_error},
        sequence::{preceded, separated_pair, tuple},
    };

    type PResult<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

    /// Parse `- [YYYY-MM-DD HH:MM] text` into an [`Entry`].
    pub fn parse_entry_line(line: &str) -> Result<Entry> {
        let (_, (timestamp, text)) = entry_line(line).map_err(|err| match err {
            nom::Err::Error(e) | nom::Err::Failure(e) => {
                anyhow!("malformed entry line {line:?}\n{}", convert_error(line, e))
            }
            nom::Err::Incomplete(_) => anyhow!("incomplete entry line {line:?}"),
        })?;
        Entry::new(timestamp, text).map_err(|e| anyhow!("{e}: {line:?}"))
    }

    fn entry_line(i: &str) -> PResult<'_, (NaiveDateTime, &str)> {
        tuple((
            preceded(tag(ENTRY_PREFIX), parse_timestamp),
            preceded(tag("] "), rest),
        ))(i)
    }

    fn parse_timestamp(i: &str) -> PResult<'_, NaiveDateTime> {
        map(
            separated_pair(parse_date, char(' '), parse_time),
            |(date, time)| NaiveDateTime::new(date, time),
        )(i)
    }

    fn parse_date(i: &str) -> PResult<'_, NaiveDate> {
        map_opt(
            tuple((digits(4), char('-'), digits(2), char('-'), digits(2))),
            |(year, _, month, _, day)| NaiveDate::from_ymd_opt(year as i32, month, day),
        )(i)
    }

    fn parse_time(i: &str) -> PResult<'_, NaiveTime> {
        map_opt(
            separated_pair(digits(2), char(':'), digits(2)),
            |(hour, minute)| NaiveTime::from_hms_opt(hour, minute, 0),
        )(i)
    }

    /// Exactly `width` ASCII digits as a number.
    fn digits<'a>(width: usize) -> impl FnMut(&'a str) -> PResult<'a, u32> {
        map_res(
            take_while_m_n(width, width, |c: char| c.is_ascii_digit()),
            str::parse::<u32>,
        )
    }

}

pub mod config {
    //! Inbox configuration, resolved once by the front end and passed in explicitly.

    use std::path::PathBuf;

    /// Relative to the working directory.
    pub const DEFAULT_INBOX: &str = "inbox/tasks_inbox.md";

    /// Environment variable consulted when `--inbox` is absent.
    pub const INBOX_ENV: &str = "CAPTURE_INBOX";

    /// `--list` with no value.
    pub const DEFAULT_LIST_LIMIT: &str = "10";

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct InboxConfig {
        pub path: PathBuf,
        /// Hold an advisory lock on the inbox while appending or reading.
        pub lock: bool,
    }

    impl InboxConfig {
        pub fn new(path: impl Into<PathBuf>) -> Self {
            Self {
                path: path.into(),
                lock: false,
            }
        }

        pub fn with_lock(mut self, lock: bool) -> Self {
            self.lock = lock;
            self
        }
    }

    impl Default for InboxConfig {
        fn default() -> Self {
            Self::new(DEFAULT_INBOX)
        }
    }
}

pub mod storage {
    //! The inbox on disk.
    //!
    //! Writes are single `write_all` calls on an append-mode handle. Without `lock`, nothing
    //! protects against a second process appending at the same time. With `lock`, an `fs2`
    //! advisory lock is taken on the open handle and released when the handle closes.

    use crate::clock::{Clock, SystemClock};
    use crate::config::InboxConfig;
    use crate::core::{DomainError, Entry, PREAMBLE, tail_entry_lines};
    use crate::parser::parse_entry_line;
    use fs2::FileExt;
    use std::{
        fs::{self, File, OpenOptions},
        io::{self, Read, Seek, SeekFrom, Write},
        num::NonZeroUsize,
        path::{Path, PathBuf},
    };

    #[derive(Debug, thiserror::Error)]
    pub enum TaskLogError {
        #[error(transparent)]
        EmptyInput(#[from] DomainError),
        #[error("{action} {path:?}")]
        Io {
            action: &'static str,
            path: PathBuf,
            #[source]
            source: io::Error,
        },
    }

    pub type Result<T> = std::result::Result<T, TaskLogError>;

    /// An entry line together with its parsed form, when it has one.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct EntryLine {
        pub line: String,
        pub entry: Option<Entry>,
    }

    /// Append-only task inbox backed by a single Markdown file.
    #[derive(Debug)]
    pub struct TaskLog<C = SystemClock> {
        path: PathBuf,
        lock: bool,
        clock: C,
    }

    impl TaskLog<SystemClock> {
        pub fn open(config: &InboxConfig) -> Self {
            Self::with_clock(config, SystemClock)
        }
    }

    impl<C: Clock> TaskLog<C> {
        pub fn with_clock(config: &InboxConfig, clock: C) -> Self {
            Self {
                path: config.path.clone(),
                lock: config.lock,
                clock,
            }
        }

        pub fn path(&self) -> &Path {
            &self.path
        }

        pub fn ensure_ready(&self) -> Result<()> {
            ensure_ready(&self.path)
        }

        /// Validate `text` and append it as one timestamped line.
        ///
        /// Blank text fails with [`TaskLogError::EmptyInput`] before the filesystem is
        /// touched.
        pub fn capture(&self, text: &str) -> Result<Entry> {
            let entry = Entry::new(self.clock.now(), text)?;
            self.ensure_ready()?;

            let mut file = OpenOptions::new()
                .read(true)
                .append(true)
                .open(&self.path)
                .map_err(io_err("opening", &self.path))?;
            if self.lock {
                FileExt::lock_exclusive(&file).map_err(io_err("locking", &self.path))?;
            }

            // A file left without a final newline would swallow the entry into its last line.
            let mut buf = String::new();
            if !ends_with_newline(&mut file).map_err(io_err("reading", &self.path))? {
                buf.push('\n');
            }
            buf.push_str(&entry.to_line());
            buf.push('\n');
            file.write_all(buf.as_bytes())
                .map_err(io_err("appending to", &self.path))?;

            tracing::debug!(path = %self.path.display(), line = %entry.to_line(), "captured task");
            Ok(entry)
        }

        /// The last `limit` entry lines, oldest first. Returns everything when the inbox
        /// holds fewer.
        pub fn list_recent(&self, limit: NonZeroUsize) -> Result<Vec<String>> {
            self.ensure_ready()?;
            let text = self.read_all()?;
            let lines = tail_entry_lines(&text, limit);
            tracing::debug!(
                path = %self.path.display(),
                limit = limit.get(),
                returned = lines.len(),
                "listed tasks"
            );
            Ok(lines)
        }

        /// Like [`TaskLog::list_recent`], pairing each line with its parsed entry.
        pub fn list_recent_entries(&self, limit: NonZeroUsize) -> Result<Vec<EntryLine>> {
            let lines = self.list_recent(limit)?;
            Ok(lines
                .into_iter()
                .map(|line| {
                    let entry = match parse_entry_line(&line) {
                        Ok(entry) => Some(entry),
                        Err(err) => {
                            tracing::debug!(%line, error = %err, "unparsed entry line");
                            None
                        }
                    };
                    EntryLine { line, entry }
                })
                .collect())
        }

        fn read_all(&self) -> Result<String> {
            let mut file = File::open(&self.path).map_err(io_err("opening", &self.path))?;
            if self.lock {
                FileExt::lock_shared(&file).map_err(io_err("locking", &self.path))?;
            }
            let mut text = String::new();
            file.read_to_string(&mut text)
                .map_err(io_err("reading", &self.path))?;
            Ok(text)
        }
    }

    /// Create the parent directories and the inbox (with its preamble) when missing.
    /// An existing file is left as is.
    pub fn ensure_ready(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err("creating directory", parent))?;
        }

        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(mut file) => {
                file.write_all(PREAMBLE.as_bytes())
                    .map_err(io_err("writing preamble to", path))?;
                tracing::debug!(path = %path.display(), "created inbox");
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Ok(()),
            Err(source) => Err(TaskLogError::Io {
                action: "creating",
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// True for an empty file too: there is no line to terminate.
    fn ends_with_newline(file: &mut File) -> io::Result<bool> {
        if file.metadata()?.len() == 0 {
            return Ok(true);
        }
        let mut last = [0u8; 1];
        file.seek(SeekFrom::End(-1))?;
        file.read_exact(&mut last)?;
        Ok(last[0] == b'\n')
    }

    fn io_err<'a>(
        action: &'static str,
        path: &'a Path,
    ) -> impl FnOnce(io::Error) -> TaskLogError + 'a {
        move |source| TaskLogError::Io {
            action,
            path: path.to_path_buf(),
            source,
        }
    }

}

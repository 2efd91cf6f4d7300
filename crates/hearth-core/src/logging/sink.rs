use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

use crossterm::style::{StyledContent, Stylize};

use super::{Category, Sink, Tags};

fn styled(category: Category) -> StyledContent<&'static str> {
    let label = category.as_str();
    match category {
        Category::Debug => label.dark_grey(),
        Category::Message => label.white(),
        Category::Warning => label.yellow(),
        Category::Error => label.red(),
        Category::Fatal => label.red().bold(),
    }
}

/// Writes every message to stderr, optionally with coloured category labels.
pub struct ConsoleSink {
    colored: bool,
}

impl ConsoleSink {
    pub fn new(colored: bool) -> Self {
        Self { colored }
    }
}

impl Default for ConsoleSink {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Sink for ConsoleSink {
    fn write(&self, tags: &Tags, text: &str) {
        // Raw mode turns off output post-processing, so newlines need an
        // explicit carriage return.
        let eol = if crossterm::terminal::is_raw_mode_enabled().unwrap_or(false) {
            "\r\n"
        } else {
            "\n"
        };
        let mut err = io::stderr().lock();
        let _ = if self.colored {
            write!(
                err,
                "[{}] {}:{} {}{eol}",
                styled(tags.category),
                tags.file,
                tags.line,
                text
            )
        } else {
            write!(err, "[{}] {}:{} {}{eol}", tags.category, tags.file, tags.line, text)
        };
    }
}

/// Appends plain-text lines to a file.
///
/// The file is opened by [`FileSink::create`]; an unopenable path is reported
/// there, never at write time.
pub struct FileSink {
    file: Mutex<BufWriter<File>>,
}

impl FileSink {
    pub fn create(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(BufWriter::new(file)),
        })
    }
}

impl Sink for FileSink {
    fn write(&self, tags: &Tags, text: &str) {
        if let Ok(mut file) = self.file.lock() {
            let _ = writeln!(file, "[{}] {}:{} {}", tags.category, tags.file, tags.line, text);
            let _ = file.flush();
        }
    }
}

/// Forwards messages into the `tracing` subscriber installed by
/// [`init`](super::init).
#[derive(Default)]
pub struct TracingSink;

impl Sink for TracingSink {
    fn write(&self, tags: &Tags, text: &str) {
        let category = tags.category.as_str();
        match tags.category {
            Category::Debug => tracing::debug!(
                target: "hearth",
                category,
                file = tags.file,
                line = tags.line,
                "{text}"
            ),
            Category::Message => tracing::info!(
                target: "hearth",
                category,
                file = tags.file,
                line = tags.line,
                "{text}"
            ),
            Category::Warning => tracing::warn!(
                target: "hearth",
                category,
                file = tags.file,
                line = tags.line,
                "{text}"
            ),
            Category::Error | Category::Fatal => tracing::error!(
                target: "hearth",
                category,
                file = tags.file,
                line = tags.line,
                "{text}"
            ),
        }
    }
}

/// A single retained log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub category: Category,
    pub file: &'static str,
    pub line: u32,
    pub text: String,
}

/// Bounded in-memory history of recent messages. The oldest entry is evicted
/// once `capacity` is reached.
pub struct RingSink {
    entries: Mutex<VecDeque<LogEntry>>,
    capacity: usize,
}

impl RingSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Snapshot of the retained entries, oldest first.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .map(|e| e.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Remove and return all retained entries.
    pub fn drain(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .map(|mut e| e.drain(..).collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of retained entries in `category`.
    pub fn count(&self, category: Category) -> usize {
        self.entries
            .lock()
            .map(|e| e.iter().filter(|entry| entry.category == category).count())
            .unwrap_or(0)
    }

    /// Whether any retained entry contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.entries
            .lock()
            .map(|e| e.iter().any(|entry| entry.text.contains(needle)))
            .unwrap_or(false)
    }
}

impl Sink for RingSink {
    fn write(&self, tags: &Tags, text: &str) {
        if self.capacity == 0 {
            return;
        }
        if let Ok(mut entries) = self.entries.lock() {
            if entries.len() >= self.capacity {
                entries.pop_front();
            }
            entries.push_back(LogEntry {
                category: tags.category,
                file: tags.file,
                line: tags.line,
                text: text.to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn tags(category: Category) -> Tags {
        Tags {
            category,
            file: "sink.rs",
            line: 1,
        }
    }

    #[test]
    fn ring_caps_at_capacity() {
        let ring = RingSink::new(3);
        for i in 0..5 {
            ring.write(&tags(Category::Message), &format!("msg {i}"));
        }
        let entries = ring.entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].text, "msg 2");
        assert_eq!(entries[1].text, "msg 3");
        assert_eq!(entries[2].text, "msg 4");
    }

    #[test]
    fn ring_drain_empties() {
        let ring = RingSink::new(4);
        ring.write(&tags(Category::Warning), "a");
        ring.write(&tags(Category::Error), "b");
        assert_eq!(ring.count(Category::Warning), 1);
        assert_eq!(ring.drain().len(), 2);
        assert!(ring.is_empty());
    }

    #[test]
    fn zero_capacity_ring_keeps_nothing() {
        let ring = RingSink::new(0);
        ring.write(&tags(Category::Message), "dropped");
        assert!(ring.is_empty());
    }

    #[test]
    fn file_sink_appends_lines() {
        let path = std::env::temp_dir().join(format!(
            "hearth-file-sink-{}-{:?}.log",
            std::process::id(),
            std::thread::current().id()
        ));
        let _ = fs::remove_file(&path);

        let sink = FileSink::create(&path).unwrap();
        sink.write(&tags(Category::Message), "first");
        sink.write(&tags(Category::Error), "second");

        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines, vec!["[MESSAGE] sink.rs:1 first", "[ERROR] sink.rs:1 second"]);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn file_sink_fails_at_construction() {
        let dir = std::env::temp_dir().join(format!("hearth-file-sink-dir-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        // A directory cannot be opened for appending.
        assert!(FileSink::create(&dir).is_err());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn file_sink_creates_parent_directories() {
        let root: PathBuf =
            std::env::temp_dir().join(format!("hearth-file-sink-nested-{}", std::process::id()));
        let path = root.join("a").join("b.log");
        let sink = FileSink::create(&path).unwrap();
        sink.write(&tags(Category::Debug), "deep");
        assert!(path.exists());
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn console_and_tracing_sinks_do_not_panic() {
        ConsoleSink::new(false).write(&tags(Category::Warning), "plain");
        ConsoleSink::default().write(&tags(Category::Fatal), "coloured");
        TracingSink.write(&tags(Category::Message), "no subscriber installed");
    }
}

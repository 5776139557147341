use std::cell::RefCell;
use std::rc::Rc;

/// Where the kernel sends the lines a user should see: command results,
/// program output and process diagnostics. Rendering is the caller's job.
pub trait LogSink {
    fn write(&mut self, message: &str, source: &str);
}

/// Prints every line to stdout, prefixed with its source.
#[derive(Debug, Default)]
pub struct ConsoleSink;

impl LogSink for ConsoleSink {
    fn write(&mut self, message: &str, source: &str) {
        println!("[{}] {}", source, message);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub source: String,
    pub message: String,
}

/// Records lines in memory. Clones share the same buffer, so a test can keep
/// one handle while the kernel owns another.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    lines: Rc<RefCell<Vec<LogLine>>>,
}

impl MemorySink {
    pub fn new() -> MemorySink {
        MemorySink::default()
    }

    pub fn lines(&self) -> Vec<LogLine> {
        self.lines.borrow().clone()
    }

    pub fn messages_from(&self, source: &str) -> Vec<String> {
        self.lines
            .borrow()
            .iter()
            .filter(|line| line.source == source)
            .map(|line| line.message.clone())
            .collect()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines.borrow().iter().any(|line| line.message.contains(needle))
    }

    pub fn clear(&self) {
        self.lines.borrow_mut().clear();
    }
}

impl LogSink for MemorySink {
    fn write(&mut self, message: &str, source: &str) {
        self.lines.borrow_mut().push(LogLine {
            source: source.to_string(),
            message: message.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_clones_share_buffer() {
        let sink = MemorySink::new();
        let mut handle = sink.clone();
        handle.write("hello", "cpu");
        handle.write("created file", "disk");

        assert_eq!(sink.lines().len(), 2);
        assert_eq!(sink.messages_from("disk"), vec!["created file".to_string()]);
        assert!(sink.contains("hello"));

        sink.clear();
        assert!(sink.lines().is_empty());
    }
}

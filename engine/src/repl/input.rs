//! Multi-line input buffering
//!
//! Lines accumulate until one contains the end-of-input marker. The text
//! before the marker on that line completes the message; anything after
//! it is dropped.

#[derive(Debug, Clone)]
pub struct InputBuffer {
    marker: String,
    lines: Vec<String>,
}

impl InputBuffer {
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
            lines: Vec::new(),
        }
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// Changes the marker. Blank markers are rejected.
    pub fn set_marker(&mut self, marker: &str) -> bool {
        let marker = marker.trim();
        if marker.is_empty() {
            return false;
        }
        self.marker = marker.to_string();
        true
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Adds a line; returns the finished message once the marker is seen.
    ///
    /// A message that is blank after trimming is discarded.
    pub fn push_line(&mut self, line: &str) -> Option<String> {
        match line.find(&self.marker) {
            Some(pos) => {
                self.lines.push(line[..pos].to_string());
                let message = self.take();
                (!message.trim().is_empty()).then_some(message)
            }
            None => {
                self.lines.push(line.to_string());
                None
            }
        }
    }

    /// Appends text, e.g. a transcription, as its own line.
    pub fn append(&mut self, text: &str) {
        self.lines.push(text.to_string());
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    fn take(&mut self) -> String {
        let message = self.lines.join("\n");
        self.lines.clear();
        message.trim_end().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_completes_at_marker() {
        let mut buffer = InputBuffer::new("EOF");
        assert_eq!(buffer.push_line("first line"), None);
        assert_eq!(buffer.push_line("second line"), None);
        assert!(!buffer.is_empty());
        assert_eq!(
            buffer.push_line("third EOF ignored"),
            Some("first line\nsecond line\nthird".to_string())
        );
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_marker_alone_on_a_line() {
        let mut buffer = InputBuffer::new("EOF");
        buffer.push_line("hello");
        assert_eq!(buffer.push_line("EOF"), Some("hello".to_string()));
    }

    #[test]
    fn test_blank_message_is_dropped() {
        let mut buffer = InputBuffer::new("EOF");
        buffer.push_line("   ");
        assert_eq!(buffer.push_line("EOF"), None);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_custom_marker_and_append() {
        let mut buffer = InputBuffer::new("EOF");
        assert!(!buffer.set_marker("  "));
        assert!(buffer.set_marker(";;"));
        buffer.append("turn on the lights");
        assert_eq!(
            buffer.push_line("please;;"),
            Some("turn on the lights\nplease".to_string())
        );
    }
}

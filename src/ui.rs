//! Human-readable progress output.
//!
//! Steps never print directly; they report through a [`Ui`] sink so the host
//! embedding the builder can route messages wherever it wants.

/// Sink for human-readable progress messages.
pub trait Ui {
    /// Ordinary progress message.
    fn say(&self, msg: &str);
    /// Something went wrong but the run continues (e.g. cleanup failures).
    fn warn(&self, msg: &str);
    /// Terminal failure report.
    fn error(&self, msg: &str);
}

/// Ui that prints to stdout/stderr.
pub struct StdoutUi;

impl Ui for StdoutUi {
    fn say(&self, msg: &str) {
        println!("{}", msg);
    }

    fn warn(&self, msg: &str) {
        eprintln!("[WARN] {}", msg);
    }

    fn error(&self, msg: &str) {
        eprintln!("[ERROR] {}", msg);
    }
}

/// Ui that discards everything. Used by tests.
pub struct NullUi;

impl Ui for NullUi {
    fn say(&self, _msg: &str) {}
    fn warn(&self, _msg: &str) {}
    fn error(&self, _msg: &str) {}
}

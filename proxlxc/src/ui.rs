//! Operator-facing output.
//!
//! `Ui` is the structured sink the build stages talk to. Diagnostics go
//! through `tracing`; `Ui` lines are what the operator reads.

use std::io::Write;
use std::sync::{Arc, Mutex};

use proxlxc_shared::constants::BUILDER_NAME;

use crate::secrets;

/// Sink for human-readable build output.
pub trait Ui: Send + Sync {
    /// Announce a step ("Stopping LXC Container").
    fn say(&self, message: &str);

    /// Detail line under the current step.
    fn message(&self, message: &str);

    /// Failure line. Carries remote messages verbatim.
    fn error(&self, message: &str);
}

/// Routes every line through the global secret filter before forwarding it.
///
/// The builder wraps whatever `Ui` it is handed in one of these.
pub struct FilteredUi {
    inner: Arc<dyn Ui>,
}

impl FilteredUi {
    pub fn new(inner: Arc<dyn Ui>) -> Self {
        Self { inner }
    }
}

impl Ui for FilteredUi {
    fn say(&self, message: &str) {
        self.inner.say(&secrets::redact(message));
    }

    fn message(&self, message: &str) {
        self.inner.message(&secrets::redact(message));
    }

    fn error(&self, message: &str) {
        self.inner.error(&secrets::redact(message));
    }
}

/// Console output in the usual `==> builder: ...` shape.
pub struct ConsoleUi {
    out: Mutex<Box<dyn Write + Send>>,
    err: Mutex<Box<dyn Write + Send>>,
}

impl ConsoleUi {
    pub fn stdio() -> Self {
        Self::new(Box::new(std::io::stdout()), Box::new(std::io::stderr()))
    }

    pub fn new(out: Box<dyn Write + Send>, err: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
            err: Mutex::new(err),
        }
    }

    fn write_line(sink: &Mutex<Box<dyn Write + Send>>, line: &str) {
        let mut sink = sink.lock().unwrap_or_else(|e| e.into_inner());
        let _ = writeln!(sink, "{}", secrets::redact(line));
        let _ = sink.flush();
    }
}

impl Ui for ConsoleUi {
    fn say(&self, message: &str) {
        Self::write_line(&self.out, &format!("==> {}: {}", BUILDER_NAME, message));
    }

    fn message(&self, message: &str) {
        Self::write_line(&self.out, &format!("    {}: {}", BUILDER_NAME, message));
    }

    fn error(&self, message: &str) {
        Self::write_line(&self.err, &format!("==> {}: {}", BUILDER_NAME, message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    #[test]
    fn console_prefixes_and_splits_streams() {
        let out = SharedBuf::default();
        let err = SharedBuf::default();
        let ui = ConsoleUi::new(Box::new(out.clone()), Box::new(err.clone()));

        ui.say("Creating LXC container");
        ui.message("vmid 9000");
        ui.error("could not stop");

        assert_eq!(
            out.text(),
            "==> proxmox-lxc: Creating LXC container\n    proxmox-lxc: vmid 9000\n"
        );
        assert_eq!(err.text(), "==> proxmox-lxc: could not stop\n");
    }

    #[test]
    fn filtered_ui_hides_secrets_from_any_sink() {
        secrets::register("ui-filter-secret");
        let out = SharedBuf::default();
        let err = SharedBuf::default();
        let ui = FilteredUi::new(Arc::new(ConsoleUi::new(
            Box::new(out.clone()),
            Box::new(err.clone()),
        )));

        ui.error("auth failed for ui-filter-secret");
        assert!(err.text().contains("auth failed for <sensitive>"));
        assert!(!err.text().contains("ui-filter-secret"));
    }
}

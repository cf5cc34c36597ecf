// ALERT NOTIFICATION
// Edge-triggered dispatch of the warning text to an external hook
//
// SAFETY INVARIANTS:
// 1. Exactly one dispatch per Clear -> Warned edge
// 2. No dispatch while Warned persists, none on Warned -> Clear
// 3. Text handed to a shell contains only SAFE_CHARS, wrapped in single quotes
// 4. Hook failures are logged and never reach the caller

use crate::settings::NOTIFY_PLACEHOLDER;
use crate::warning::{VerdictKind, WarningState};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::io;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::thread;

/// Punctuation allowed through sanitization, in addition to ASCII
/// letters and digits.
pub const SAFE_CHARS: &str = " .,;-_/:?@()";

/// Strip everything that is not alphanumeric or in [`SAFE_CHARS`].
pub fn sanitize_message(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_ascii_alphanumeric() || SAFE_CHARS.contains(*c))
        .collect()
}

/// Substitute the sanitized, single-quoted message into the template.
pub fn render_command(template: &str, message: &str) -> String {
    let quoted = format!("'{}'", sanitize_message(message));
    template.replace(NOTIFY_PLACEHOLDER, &quoted)
}

/// Receiver of warning alerts. Implementations must return promptly.
pub trait Notifier: Send + Sync {
    fn notify(&self, text: &str);
}

/// Notifier used when no command is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, text: &str) {
        debug!("No alert command configured; dropping alert: {}", text);
    }
}

/// Runs the configured shell command on a detached thread.
#[derive(Debug, Clone)]
pub struct CommandNotifier {
    template: String,
}

impl CommandNotifier {
    pub fn new(template: impl Into<String>) -> Self {
        CommandNotifier {
            template: template.into(),
        }
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    fn shell(command: &str) -> Command {
        if cfg!(windows) {
            let mut cmd = Command::new("cmd");
            cmd.arg("/C").arg(command);
            cmd
        } else {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(command);
            cmd
        }
    }

    /// Start the hook. The process is running when this returns.
    fn launch(command: &str) -> io::Result<Child> {
        Self::shell(command).stdin(Stdio::null()).spawn()
    }

    fn reap(mut child: Child, command: String) {
        match child.wait() {
            Ok(status) if status.success() => debug!("Alert command finished: {}", command),
            Ok(status) => warn!("Alert command '{}' exited with {}", command, status),
            Err(e) => error!("Alert command '{}' could not be waited on: {}", command, e),
        }
    }
}

impl Notifier for CommandNotifier {
    fn notify(&self, text: &str) {
        let command = render_command(&self.template, text);
        info!("Running alert command: {}", command);

        let child = match Self::launch(&command) {
            Ok(child) => child,
            Err(e) => {
                error!("Alert command '{}' could not be started: {}", command, e);
                return;
            }
        };
        let spawned = thread::Builder::new()
            .name("alertnotify".to_string())
            .spawn(move || Self::reap(child, command));
        if let Err(e) = spawned {
            error!("Failed to spawn alert wait thread: {}", e);
        }
    }
}

/// Records every alert; for tests and embedding.
#[derive(Debug, Default)]
pub struct CapturingNotifier {
    alerts: Mutex<Vec<String>>,
}

impl CapturingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn alerts(&self) -> Vec<String> {
        self.alerts.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.alerts.lock().len()
    }
}

impl Notifier for CapturingNotifier {
    fn notify(&self, text: &str) {
        self.alerts.lock().push(text.to_string());
    }
}

/// Alert that passed edge detection and still has to be delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAlert {
    pub bit: u8,
    pub text: String,
}

/// Tracks the last observed verdict kind and decides when to alert.
#[derive(Debug, Clone)]
pub struct AlertEdge {
    last: VerdictKind,
}

impl AlertEdge {
    pub fn new() -> Self {
        AlertEdge {
            last: VerdictKind::Clear,
        }
    }

    pub fn last(&self) -> VerdictKind {
        self.last
    }

    /// Record a fresh verdict. Returns an alert only on Clear -> Warned.
    pub fn observe(&mut self, state: &WarningState) -> Option<PendingAlert> {
        let previous = self.last;
        self.last = state.kind();

        match (previous, state) {
            (VerdictKind::Clear, WarningState::Warned { bit, message }) => Some(PendingAlert {
                bit: *bit,
                text: message.to_string(),
            }),
            _ => None,
        }
    }
}

impl Default for AlertEdge {
    fn default() -> Self {
        Self::new()
    }
}

/// Delivers pending alerts through a [`Notifier`].
#[derive(Clone)]
pub struct NotificationDispatcher {
    notifier: Arc<dyn Notifier>,
}

impl NotificationDispatcher {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        NotificationDispatcher { notifier }
    }

    /// Dispatcher matching the configured command, if any.
    pub fn from_command(command: Option<&str>) -> Self {
        match command {
            Some(template) => Self::new(Arc::new(CommandNotifier::new(template))),
            None => Self::new(Arc::new(NullNotifier)),
        }
    }

    pub fn dispatch(&self, alert: &PendingAlert) {
        info!("Unknown version bit {} crossed the warning threshold", alert.bit);
        self.notifier.notify(&alert.text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::warning::UNKNOWN_RULES_MINED;

    fn warned(bit: u8) -> WarningState {
        WarningState::Warned {
            bit,
            message: UNKNOWN_RULES_MINED,
        }
    }

    #[test]
    fn test_sanitize_strips_shell_metacharacters() {
        assert_eq!(
            sanitize_message(UNKNOWN_RULES_MINED),
            "Warning: Unknown block versions being mined Its possible unknown rules are in effect"
        );
        assert_eq!(sanitize_message("a'b\"c`d$e|f&g>h<i;j"), "abcdefghi;j");
        assert_eq!(sanitize_message("$(rm -rf /)"), "(rm -rf /)");
    }

    #[test]
    fn test_render_command_quotes_every_placeholder() {
        let cmd = render_command("echo %s >> alert.txt; logger %s", "it's on!");
        assert_eq!(cmd, "echo 'its on' >> alert.txt; logger 'its on'");
    }

    #[test]
    fn test_edge_fires_once_per_transition() {
        let mut edge = AlertEdge::new();

        assert_eq!(edge.observe(&WarningState::Clear), None);
        let first = edge.observe(&warned(27)).unwrap();
        assert_eq!(first.bit, 27);
        assert_eq!(first.text, UNKNOWN_RULES_MINED);

        assert_eq!(edge.observe(&warned(27)), None);
        assert_eq!(edge.observe(&warned(3)), None);
        assert_eq!(edge.observe(&WarningState::Clear), None);
        assert!(edge.observe(&warned(27)).is_some());
    }

    #[test]
    fn test_dispatcher_uses_notifier() {
        let capture = CapturingNotifier::new();
        let dispatcher = NotificationDispatcher::new(capture.clone());

        dispatcher.dispatch(&PendingAlert {
            bit: 5,
            text: "hello".to_string(),
        });
        assert_eq!(capture.alerts(), vec!["hello".to_string()]);
    }

    #[cfg(unix)]
    #[test]
    fn test_command_notifier_writes_sanitized_text() {
        use std::time::{Duration, Instant};

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alert.txt");
        let notifier = CommandNotifier::new(format!("echo %s >> \"{}\"", path.display()));

        notifier.notify(UNKNOWN_RULES_MINED);

        let deadline = Instant::now() + Duration::from_secs(10);
        let mut contents = String::new();
        while Instant::now() < deadline {
            contents = std::fs::read_to_string(&path).unwrap_or_default();
            if contents.ends_with('\n') {
                break;
            }
            thread::sleep(Duration::from_millis(20));
        }
        assert_eq!(
            contents,
            "Warning: Unknown block versions being mined Its possible unknown rules are in effect\n"
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_hook_is_running_before_notify_returns() {
        let mut child = CommandNotifier::launch("exit 3").unwrap();
        assert!(child.id() > 0);
        assert_eq!(child.wait().unwrap().code(), Some(3));
    }

    #[test]
    fn test_failing_command_does_not_panic() {
        let notifier = CommandNotifier::new("/nonexistent/vbwatch-hook %s");
        notifier.notify("x");
    }
}

use greenlight_core::notify::{Button, NotificationChannel};
use greenlight_core::Result;

/// Terminal-backed notification transport.
///
/// Action alerts land on stderr so `--json` output on stdout stays
/// machine-readable. A richer deployment swaps this for a chat transport;
/// the engine only sees the trait.
pub struct ConsoleChannel;

impl NotificationChannel for ConsoleChannel {
    fn name(&self) -> &'static str {
        "console"
    }

    fn send(&self, recipient: &str, text: &str, buttons: &[Button]) -> Result<()> {
        eprintln!("-- notification for {recipient} --");
        for line in text.lines() {
            eprintln!("  {line}");
        }
        for button in buttons {
            eprintln!("  [{}] {}", button.label, button.command);
        }
        Ok(())
    }
}

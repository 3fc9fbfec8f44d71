use tokio::process::Command;
use tracing::{debug, warn};

#[cfg(target_os = "macos")]
const OPENER: &str = "open";
#[cfg(not(target_os = "macos"))]
const OPENER: &str = "xdg-open";

/// Open a URL in the default browser, fire and forget. A failed launch is
/// logged and otherwise ignored; no state depends on the tab opening.
pub fn open_in_tab(url: &str, in_background: bool) {
    let mut command = Command::new(OPENER);
    if cfg!(target_os = "macos") && in_background {
        // `open -g` keeps the browser from stealing focus. xdg-open has no
        // equivalent, so elsewhere the flag is best-effort only.
        command.arg("-g");
    }
    command.arg(url);
    match command.spawn() {
        Ok(_) => debug!(url = %url, "opened in browser"),
        Err(e) => warn!(url = %url, error = %e, "failed to launch browser opener"),
    }
}

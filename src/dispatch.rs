use std::collections::HashMap;
use std::process::{Command, Stdio};

use tracing::{info, warn};

use crate::proto::message::CommandResult;

/// Executes the OS-side work behind one action. Implementations must return
/// promptly; slow external work (launching a process) is fire-and-forget so
/// a handler can never stall frame reading or heartbeat detection.
pub trait ActionHandler: Send + Sync {
    fn execute(&self, action: &str) -> CommandResult;
}

impl<F> ActionHandler for F
where
    F: Fn(&str) -> CommandResult + Send + Sync,
{
    fn execute(&self, action: &str) -> CommandResult {
        self(action)
    }
}

/// Maps inbound action tokens to handlers. Exact tokens first, then
/// namespaced prefixes (`SOUND:<name>` routes to the `SOUND` handler with
/// the full token). One exact handler per action; re-registering replaces
/// the previous binding.
///
/// The dispatcher does not deduplicate: the wire has no request id, so the
/// same action arriving twice runs twice. At-most-once per physical press is
/// the sender's contract.
#[derive(Default)]
pub struct Dispatcher {
    exact: HashMap<String, Box<dyn ActionHandler>>,
    prefix: HashMap<String, Box<dyn ActionHandler>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `action` to `handler`. Last writer wins.
    pub fn register(&mut self, action: impl Into<String>, handler: impl ActionHandler + 'static) {
        self.exact.insert(action.into(), Box::new(handler));
    }

    /// Bind every `NAMESPACE:<suffix>` action to one handler.
    pub fn register_prefix(
        &mut self,
        namespace: impl Into<String>,
        handler: impl ActionHandler + 'static,
    ) {
        self.prefix.insert(namespace.into(), Box::new(handler));
    }

    /// Look up and run the handler for `action`. Always produces exactly
    /// one result; an unregistered action yields a failed result, never a
    /// panic or error the read path would have to survive.
    pub fn dispatch(&self, action: &str) -> CommandResult {
        if let Some(handler) = self.exact.get(action) {
            info!(action, "dispatching command");
            return handler.execute(action);
        }
        if let Some((namespace, _suffix)) = action.split_once(':')
            && let Some(handler) = self.prefix.get(namespace)
        {
            info!(action, "dispatching namespaced command");
            return handler.execute(action);
        }
        warn!(action, "unknown action");
        CommandResult::failed(action, "unknown action")
    }
}

/// Spawn a process without waiting for it. Success means "started", not
/// "completed" — command handlers must return before the work finishes.
pub fn spawn_detached(action: &str, program: &str, args: &[&str]) -> CommandResult {
    match Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
    {
        Ok(child) => CommandResult::success(
            action,
            format!("{} started (pid {})", program, child.id()),
        ),
        Err(e) => CommandResult::failed(action, format!("failed to start {}: {}", program, e)),
    }
}

/// The stock action set the host service answers to.
pub fn builtin_actions(
    dispatcher: &mut Dispatcher,
    allow_shutdown: bool,
    shutdown_flag: impl Fn() + Send + Sync + 'static,
) {
    dispatcher.register("INIT", |action: &str| open_terminal(action));
    dispatcher.register("TEST", |action: &str| open_browser(action));
    dispatcher.register("EXIT", move |action: &str| {
        shutdown_flag();
        CommandResult::success(action, "service stopping")
    });
    dispatcher.register_prefix("SOUND", |action: &str| play_sound(action));
    dispatcher.register("SHUTDOWN", move |action: &str| {
        if allow_shutdown {
            shutdown_host(action)
        } else {
            CommandResult::failed(action, "shutdown disabled by configuration")
        }
    });
}

#[cfg(target_os = "linux")]
fn open_terminal(action: &str) -> CommandResult {
    spawn_detached(action, "x-terminal-emulator", &[])
}

#[cfg(target_os = "macos")]
fn open_terminal(action: &str) -> CommandResult {
    spawn_detached(action, "open", &["-a", "Terminal"])
}

#[cfg(target_os = "windows")]
fn open_terminal(action: &str) -> CommandResult {
    spawn_detached(action, "cmd", &["/C", "start", "cmd"])
}

#[cfg(target_os = "linux")]
fn open_browser(action: &str) -> CommandResult {
    spawn_detached(action, "xdg-open", &["https://example.com"])
}

#[cfg(target_os = "macos")]
fn open_browser(action: &str) -> CommandResult {
    spawn_detached(action, "open", &["https://example.com"])
}

#[cfg(target_os = "windows")]
fn open_browser(action: &str) -> CommandResult {
    spawn_detached(action, "cmd", &["/C", "start", "https://example.com"])
}

fn play_sound(action: &str) -> CommandResult {
    let Some((_, name)) = action.split_once(':') else {
        return CommandResult::failed(action, "missing sound name");
    };
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return CommandResult::failed(action, "invalid sound name");
    }
    let file = format!("sounds/{}.wav", name.to_lowercase());
    #[cfg(target_os = "linux")]
    return spawn_detached(action, "paplay", &[&file]);
    #[cfg(target_os = "macos")]
    return spawn_detached(action, "afplay", &[&file]);
    #[cfg(target_os = "windows")]
    return spawn_detached(
        action,
        "powershell",
        &[
            "-Command",
            &format!("(New-Object Media.SoundPlayer '{}').Play()", file),
        ],
    );
}

#[cfg(target_os = "linux")]
fn shutdown_host(action: &str) -> CommandResult {
    spawn_detached(action, "systemctl", &["poweroff"])
}

#[cfg(target_os = "macos")]
fn shutdown_host(action: &str) -> CommandResult {
    spawn_detached(action, "osascript", &["-e", "tell app \"System Events\" to shut down"])
}

#[cfg(target_os = "windows")]
fn shutdown_host(action: &str) -> CommandResult {
    spawn_detached(action, "shutdown", &["/s", "/t", "10"])
}

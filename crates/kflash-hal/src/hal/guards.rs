use crate::{HalResult, ShellOps};

/// RAII guard that overrides a system property and restores the original value when dropped.
///
/// Used to point `ro.boot.slot_suffix` at the target slot while an installer runs.
#[derive(Debug)]
pub struct PropGuard<'a, H: ShellOps + ?Sized> {
    hal: &'a H,
    name: String,
    original: String,
    active: bool,
}

impl<'a, H: ShellOps + ?Sized> PropGuard<'a, H> {
    /// Read the current value of `name`, then set it to `value` via `resetprop -n`.
    pub fn set(hal: &'a H, name: &str, value: &str) -> HalResult<Self> {
        let original = hal.getprop(name, true)?;
        let output = hal.run_capture(&format!("resetprop -n {} {}", name, value), true)?;
        if !output.success() {
            return Err(crate::HalError::CommandFailed {
                program: "resetprop".to_string(),
                code: Some(output.code),
                stderr: output.stderr_text(),
            });
        }
        log::info!("property {}: '{}' -> '{}'", name, original, value);
        Ok(Self {
            hal,
            name: name.to_string(),
            original,
            active: true,
        })
    }

    pub fn original(&self) -> &str {
        &self.original
    }

    /// Prevent restoration and return the original value.
    pub fn release(mut self) -> String {
        self.active = false;
        std::mem::take(&mut self.original)
    }
}

impl<'a, H: ShellOps + ?Sized> Drop for PropGuard<'a, H> {
    fn drop(&mut self) {
        if !self.active || self.original.is_empty() {
            return;
        }
        let cmd = format!("resetprop {} {}", self.name, self.original);
        match self.hal.run_capture(&cmd, true) {
            Ok(output) if output.success() => {
                log::info!("property {} restored to '{}'", self.name, self.original);
            }
            Ok(output) => log::warn!(
                "prop guard failed to restore {} (exit={})",
                self.name,
                output.code
            ),
            Err(err) => log::warn!("prop guard failed to restore {}: {}", self.name, err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FakeHal, FakeResponse};

    #[test]
    fn prop_guard_restores_on_drop() {
        let hal = FakeHal::new();
        hal.respond("getprop ro.boot.slot_suffix", FakeResponse::stdout(["_a"]));

        {
            let guard = PropGuard::set(&hal, "ro.boot.slot_suffix", "_b").unwrap();
            assert_eq!(guard.original(), "_a");
        }

        let commands = hal.commands();
        assert_eq!(
            commands,
            vec![
                "getprop ro.boot.slot_suffix".to_string(),
                "resetprop -n ro.boot.slot_suffix _b".to_string(),
                "resetprop ro.boot.slot_suffix _a".to_string(),
            ]
        );
    }

    #[test]
    fn prop_guard_release_skips_restore() {
        let hal = FakeHal::new();
        hal.respond("getprop", FakeResponse::stdout(["_a"]));

        {
            let guard = PropGuard::set(&hal, "ro.boot.slot_suffix", "_b").unwrap();
            assert_eq!(guard.release(), "_a");
        }

        assert!(!hal.ran_command_containing("resetprop ro.boot.slot_suffix _a"));
    }

    #[test]
    fn failed_override_is_an_error() {
        let hal = FakeHal::new();
        hal.respond("resetprop -n", FakeResponse::exit(1));
        assert!(PropGuard::set(&hal, "ro.boot.slot_suffix", "_b").is_err());
        assert!(!hal.ran_command_containing("resetprop ro.boot"));
    }
}

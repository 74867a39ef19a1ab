//! Pub/Sub emulator endpoint resolution.
//!
//! An emulator is selected either by the `PUBSUB_EMULATOR_HOST` environment
//! variable or by an endpoint written as `emulator:///host:port`. The
//! environment variable takes priority.

/// Prefix marking an endpoint as an emulator address.
pub const EMULATOR_ENDPOINT_PREFIX: &str = "emulator:///";

/// Environment variable naming the emulator `host:port`.
pub const EMULATOR_HOST_ENV: &str = "PUBSUB_EMULATOR_HOST";

/// Mark `endpoint` as an emulator address.
pub fn to_emulator_endpoint(endpoint: &str) -> String {
    format!("{}{}", EMULATOR_ENDPOINT_PREFIX, endpoint)
}

/// Resolve the emulator `host:port` to connect to, if any.
pub fn emulator_endpoint(endpoint: Option<&str>) -> Option<String> {
    resolve(std::env::var(EMULATOR_HOST_ENV).ok(), endpoint)
}

fn resolve(env_host: Option<String>, endpoint: Option<&str>) -> Option<String> {
    if env_host.is_some() {
        return env_host;
    }
    endpoint
        .and_then(|e| e.strip_prefix(EMULATOR_ENDPOINT_PREFIX))
        .map(str::to_string)
}

/// Sets `PUBSUB_EMULATOR_HOST` for the lifetime of the guard and restores
/// the previous value on drop. Tests using it must be `#[serial]`.
#[cfg(test)]
pub(crate) struct EmulatorHostGuard {
    saved: Option<std::ffi::OsString>,
}

#[cfg(test)]
impl EmulatorHostGuard {
    pub(crate) fn set(value: Option<&str>) -> Self {
        let saved = std::env::var_os(EMULATOR_HOST_ENV);
        match value {
            Some(value) => std::env::set_var(EMULATOR_HOST_ENV, value),
            None => std::env::remove_var(EMULATOR_HOST_ENV),
        }
        Self { saved }
    }
}

#[cfg(test)]
impl Drop for EmulatorHostGuard {
    fn drop(&mut self) {
        match self.saved.take() {
            Some(value) => std::env::set_var(EMULATOR_HOST_ENV, value),
            None => std::env::remove_var(EMULATOR_HOST_ENV),
        }
    }
}

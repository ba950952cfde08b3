use std::{
    path::PathBuf,
    thread,
    time::{Duration, Instant},
};

use crate::config::ClientConfig;

/// Phone-identity config with short timeouts and a fixed files directory.
pub(crate) fn test_config() -> ClientConfig {
    let mut config = ClientConfig::new(94575, "a3406de8d171bb422bb6ddf3bbd800e2", "test-key")
        .with_phone("+15550100");
    config.files_directory = Some(PathBuf::from("/tmp/tdbridge-test"));
    config.receive_timeout = Duration::from_millis(20);
    config.queue_put_timeout = Duration::from_millis(200);
    config.auth_step_timeout = Duration::from_secs(5);
    config.close_poll_interval = Duration::from_millis(10);
    config.close_poll_attempts = 5;
    config
}

/// Poll `condition` until it holds or `timeout` passes.
pub(crate) fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

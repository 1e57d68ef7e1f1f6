//! Safe wrappers for platform-specific unsafe operations.
//!
//! Every `unsafe` block in the crate lives here.

/// Effective user ID of the calling process.
pub fn current_uid() -> u32 {
    // SAFETY: getuid is a read-only POSIX syscall with no preconditions.
    unsafe { libc::getuid() }
}

/// Set an environment variable.
///
/// Caller must ensure no other thread reads the environment concurrently.
pub fn set_env(key: &str, value: &str) {
    // SAFETY: see above; only used at startup and in serialized tests.
    unsafe {
        std::env::set_var(key, value);
    }
}

/// Remove an environment variable. Same caveat as [`set_env`].
pub fn remove_env(key: &str) {
    // SAFETY: see set_env.
    unsafe {
        std::env::remove_var(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_uid_matches_file_ownership() {
        use std::os::unix::fs::MetadataExt;
        let dir = tempfile::TempDir::new().unwrap();
        let owner = std::fs::metadata(dir.path()).unwrap().uid();
        assert_eq!(current_uid(), owner);
    }

    #[test]
    fn set_and_remove_env() {
        let key = "FEEDCAST_SYS_TEST_VAR";
        set_env(key, "value");
        assert_eq!(std::env::var(key).unwrap(), "value");
        remove_env(key);
        assert!(std::env::var(key).is_err());
    }
}

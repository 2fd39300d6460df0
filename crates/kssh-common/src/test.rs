use std::path::PathBuf;
use std::sync::OnceLock;

/// Point `KSSH_DATA_DIR` at a per-process scratch directory for tests that
/// touch the default paths.
pub fn ensure_data_dir(prefix: &str) -> PathBuf {
    static DATA_DIR: OnceLock<PathBuf> = OnceLock::new();

    DATA_DIR
        .get_or_init(|| {
            let base = if let Ok(existing) = std::env::var(crate::paths::DATA_DIR_ENV) {
                PathBuf::from(existing)
            } else {
                let base =
                    std::env::temp_dir().join(format!("{}-{}", prefix, std::process::id()));
                std::env::set_var(crate::paths::DATA_DIR_ENV, &base);
                base
            };

            let _ = std::fs::create_dir_all(&base);
            base
        })
        .clone()
}

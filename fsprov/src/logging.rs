use env_logger::{Env, Target};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::Path;

fn open_log_file(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// Initialise `env_logger` at `info` unless `RUST_LOG` says otherwise.
///
/// Logs go to `log_file` when it can be opened, to stderr otherwise.
pub fn init_with(log_file: Option<&Path>) {
    let target = log_file
        .and_then(|path| match open_log_file(path) {
            Ok(file) => Some(Target::Pipe(Box::new(file))),
            Err(err) => {
                eprintln!(
                    "warning: cannot open log file {}: {err}; logging to stderr",
                    path.display()
                );
                None
            }
        })
        .unwrap_or(Target::Stderr);

    let _ = env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .target(target)
        .try_init();
}

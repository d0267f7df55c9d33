//! `.env` discovery. The first existing file wins; variables already set in
//! the process environment are never overwritten.

use std::env;
use std::path::PathBuf;

/// Candidate files in lookup order, after the working directory's `.env`.
fn dotenv_candidates(
    explicit: Option<PathBuf>,
    timefold_home: Option<PathBuf>,
    home_dir: Option<PathBuf>,
) -> Vec<PathBuf> {
    let home_env = timefold_home
        .or_else(|| home_dir.map(|home| home.join(".timefold")))
        .map(|base| base.join(".env"));
    explicit.into_iter().chain(home_env).collect()
}

/// Returns the file that was loaded, if any.
pub fn load_dotenv() -> Option<PathBuf> {
    let explicit = env::var_os("TIMEFOLD_ENV_FILE").map(PathBuf::from);
    if explicit.is_none() {
        if let Ok(path) = dotenvy::dotenv() {
            return Some(path);
        }
    }

    dotenv_candidates(
        explicit,
        env::var_os("TIMEFOLD_HOME").map(PathBuf::from),
        dirs::home_dir(),
    )
    .into_iter()
    .find(|path| path.is_file() && dotenvy::from_path(path).is_ok())
}

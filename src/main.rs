use anyhow::{bail, Result};
use std::path::Path;

use retro_engine::{app, EngineConfig, PlaybackSession};

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() {
        bail!("usage: retro-engine <file | folder | playlist.json>...");
    }

    let config = EngineConfig::load_or_default();
    let mut session = PlaybackSession::new(&config)?;
    for arg in &args {
        let path = Path::new(arg);
        if path.is_dir() {
            let n = session.add_folder(path)?;
            log::info!("added {n} tracks from {}", path.display());
        } else if path.extension().is_some_and(|e| e.eq_ignore_ascii_case("json")) {
            for dropped in session.load_playlist(path)? {
                log::warn!("{dropped}");
            }
        } else {
            session.add_path(path);
        }
    }

    app::event_loop::run(&mut session)
}

use anyhow::Result;
use std::time::{Duration, Instant};

use crate::error::PlaybackError;
use crate::playback::events::EngineEvent;
use crate::playback::session::PlaybackSession;
use crate::playback::PlaybackState;
use crate::utils::timefmt::mmss_secs;

const WAIT: Duration = Duration::from_millis(250);
const STATUS_EVERY: Duration = Duration::from_secs(1);
const BAR_GLYPHS: &[char] = &[' ', '.', ':', '-', '=', '+', '*', '#', '%', '@'];

/// Headless driver: plays the session's playlist to the end, logging
/// position once a second and spectrum frames at debug level.
pub fn run(session: &mut PlaybackSession) -> Result<()> {
    if session.playlist().is_empty() {
        log::warn!("nothing to play");
        return Ok(());
    }
    let display = session.subscribe();
    if !start_first_playable(session) {
        log::error!("no playable tracks");
        return Ok(());
    }

    let mut last_status = Instant::now();
    loop {
        for ev in session.wait_events(WAIT) {
            match ev {
                EngineEvent::StateChanged { state, .. } => log::debug!("state: {state:?}"),
                EngineEvent::Error { error, .. } => log::error!("{error}"),
                _ => {}
            }
        }

        for ev in display.try_iter() {
            match ev {
                EngineEvent::Position {
                    position, duration, ..
                } if last_status.elapsed() >= STATUS_EVERY => {
                    last_status = Instant::now();
                    let title = session
                        .current_track()
                        .map(|t| format!("{} - {}", t.display_artist(), t.display_title()))
                        .unwrap_or_default();
                    log::info!("{title} [{} / {}]", mmss_secs(position), mmss_secs(duration));
                }
                EngineEvent::Spectrum(frame) => log::debug!("|{}|", bars(&frame.bands)),
                _ => {}
            }
        }

        if session.state() == PlaybackState::Stopped {
            break;
        }
    }
    log::info!("playback finished");
    Ok(())
}

/// Try tracks in list order from the current one onward until one opens.
fn start_first_playable(session: &mut PlaybackSession) -> bool {
    let len = session.playlist().len();
    let start = session.playlist().current().unwrap_or(0);
    for k in 0..len {
        match session.play_index((start + k) % len) {
            Ok(()) => return true,
            Err(PlaybackError::Decode(e)) => {
                log::warn!("skipping {}: {e}", e.path().display());
            }
            Err(e) => {
                log::error!("{e}");
                return false;
            }
        }
    }
    false
}

fn bars(bands: &[f32]) -> String {
    let top = (BAR_GLYPHS.len() - 1) as f32;
    bands
        .iter()
        .map(|v| BAR_GLYPHS[(v.clamp(0.0, 1.0) * top).round() as usize])
        .collect()
}

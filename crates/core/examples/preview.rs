use std::path::PathBuf;
use std::thread;
use std::time::Instant;

use audition_core::{Config, PreviewEvent, Previewer};

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let path: PathBuf = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .ok_or_else(|| anyhow::anyhow!("usage: preview <audio file>"))?;

    let config = Config::load();
    let interval = config.refresh_interval();
    let mut previewer = Previewer::new(config)?;

    previewer.select(&path)?;
    if let Some(info) = previewer.metadata() {
        println!(
            "Loaded {}: {} Hz, {} channels, {:.2} s",
            path.display(),
            info.sample_rate,
            info.channels,
            info.duration_secs()
        );
    }
    previewer.play();

    let started = Instant::now();
    let mut reported = false;
    loop {
        let frame = previewer.tick(80.0);
        for event in previewer.drain_events() {
            match event {
                PreviewEvent::SummaryReady if !reported => {
                    if let Some(summary) = previewer.summary() {
                        println!("{summary}");
                    }
                    reported = true;
                }
                PreviewEvent::PlaybackFailed(reason) => anyhow::bail!("playback failed: {reason}"),
                _ => {}
            }
        }

        if !frame.playing && started.elapsed() > interval * 10 {
            break;
        }
        thread::sleep(interval);
    }

    println!("Finished at {:.2} s", previewer.position_seconds());
    Ok(())
}

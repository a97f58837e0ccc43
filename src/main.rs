//! termvid CLI - Play image sequences as terminal video.

#[cfg(feature = "dhat-heap")]
#[global_allocator]
static ALLOC: dhat::Alloc = dhat::Alloc;

use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use termvid::{
    convert::HalfBlockConverter,
    cvid::{self, CvidContainer},
    playback::{AudioPlayer, RunningStats, Scheduler, TerminalSink, Tick},
    schema::PlayerConfig,
    stream::{CancelToken, ConvFrameStream, FrameStream},
};

fn main() {
    #[cfg(feature = "dhat-heap")]
    let _profiler = dhat::Profiler::new_heap();

    env_logger::init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_usage(&args[0]);
        std::process::exit(1);
    }

    match args[1].as_str() {
        "--example-config" => print_example_config(),
        "play" => run_play(&parse_options(&args[2..])),
        "save" => run_save(&parse_options(&args[2..])),
        "open" => run_open(&parse_options(&args[2..])),
        other => {
            eprintln!("Unknown command: {}", other);
            eprintln!();
            print_usage(&args[0]);
            std::process::exit(1);
        }
    }
}

fn print_usage(program: &str) {
    eprintln!("Usage:");
    eprintln!("  {} play <frames_dir> <fps> [--audio <file>] [--config <cfg.json>] [--debug]", program);
    eprintln!("  {} save <frames_dir> <fps> <out.cvid> [--audio <file>] [--config <cfg.json>]", program);
    eprintln!("  {} open <in.cvid> [--config <cfg.json>] [--debug]", program);
    eprintln!("  {} --example-config", program);
    eprintln!();
    eprintln!("Play a directory of frame images as ANSI truecolor video, or save it");
    eprintln!("to a .cvid container and play that back later.");
    eprintln!();
    eprintln!("Frames are ordered by the first number in each file name (image12.png).");
    eprintln!("Set RUST_LOG=debug for pipeline logging.");
}

/// Parsed positional arguments and switches.
struct Options {
    positional: Vec<String>,
    audio: Option<PathBuf>,
    config: Option<PathBuf>,
    debug: bool,
}

fn parse_options(args: &[String]) -> Options {
    let mut options = Options {
        positional: Vec::new(),
        audio: None,
        config: None,
        debug: false,
    };

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--debug" => options.debug = true,
            "--audio" => {
                let value = iter.next().unwrap_or_else(|| fail("--audio requires a file"));
                options.audio = Some(PathBuf::from(value));
            }
            "--config" => {
                let value = iter.next().unwrap_or_else(|| fail("--config requires a file"));
                options.config = Some(PathBuf::from(value));
            }
            flag if flag.starts_with("--") => fail(format!("Unknown option: {}", flag)),
            _ => options.positional.push(arg.clone()),
        }
    }
    options
}

fn fail(message: impl Display) -> ! {
    eprintln!("Error: {}", message);
    std::process::exit(1);
}

fn load_config(options: &Options) -> PlayerConfig {
    let mut config = match &options.config {
        Some(path) => PlayerConfig::from_json_file(path).unwrap_or_else(|e| fail(e)),
        None => PlayerConfig::default(),
    };
    config.debug |= options.debug;
    config
}

fn positional<'a>(options: &'a Options, index: usize, name: &str) -> &'a str {
    options
        .positional
        .get(index)
        .map(String::as_str)
        .unwrap_or_else(|| fail(format!("Missing argument <{}>", name)))
}

fn parse_fps(value: &str) -> f64 {
    match value.parse::<f64>() {
        Ok(fps) if fps.is_finite() && fps > 0.0 => fps,
        _ => fail(format!("Invalid frame rate: {}", value)),
    }
}

/// First run of digits in a file name, used as the frame number.
fn frame_number(name: &str) -> Option<u64> {
    let start = name.find(|c: char| c.is_ascii_digit())?;
    let digits: String = name[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

fn list_frames(dir: &Path) -> Vec<PathBuf> {
    let entries = fs::read_dir(dir)
        .unwrap_or_else(|e| fail(format!("Error reading frames directory {}: {}", dir.display(), e)));

    let mut frames: Vec<(Option<u64>, String, PathBuf)> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .map(|path| {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            (frame_number(&name), name, path)
        })
        .collect();
    frames.sort();

    if frames.is_empty() {
        fail(format!("No frames found in {}", dir.display()));
    }
    frames.into_iter().map(|(_, _, path)| path).collect()
}

fn conv_stream(config: &PlayerConfig, frames: Vec<PathBuf>) -> ConvFrameStream<HalfBlockConverter> {
    let stream = ConvFrameStream::with_options(HalfBlockConverter::new(), config.stream_options())
        .unwrap_or_else(|e| fail(e));
    stream.add(frames);
    stream
}

fn run_play(options: &Options) {
    let config = load_config(options);
    let dir = PathBuf::from(positional(options, 0, "frames_dir"));
    let fps = parse_fps(positional(options, 1, "fps"));

    let stream = conv_stream(&config, list_frames(&dir));
    // Fill the ready buffer before the first tick.
    stream.safely_process_more(config.lookahead);
    stream.run();

    play_stream(&stream, fps, options.audio.as_deref(), &config);
}

fn run_save(options: &Options) {
    let config = load_config(options);
    let dir = PathBuf::from(positional(options, 0, "frames_dir"));
    let fps = parse_fps(positional(options, 1, "fps"));
    let out = PathBuf::from(positional(options, 2, "out.cvid"));

    let audio = match &options.audio {
        Some(path) => fs::read(path)
            .unwrap_or_else(|e| fail(format!("Error reading audio {}: {}", path.display(), e))),
        None => Vec::new(),
    };

    let frames = list_frames(&dir);
    println!("Converting {} frames from {}...", frames.len(), dir.display());
    let start = Instant::now();

    let stream = conv_stream(&config, frames);
    let container = CvidContainer::from_stream(&stream, fps, audio, &CancelToken::new())
        .unwrap_or_else(|e| fail(e));
    println!("Converted in {:.2}s", start.elapsed().as_secs_f32());

    cvid::write(&out, &container).unwrap_or_else(|e| fail(e));
    println!(
        "Saved {} frames ({}x{} @ {} fps) to {}",
        container.frame_count(),
        container.frame_width,
        container.frame_height,
        container.frame_rate,
        out.display()
    );
}

fn run_open(options: &Options) {
    let config = load_config(options);
    let path = PathBuf::from(positional(options, 0, "in.cvid"));

    let container = cvid::read(&path).unwrap_or_else(|e| fail(e));
    let (stream, fps, audio) = container.into_stream();

    // The audio player needs a file, so stage the embedded bytes on disk.
    let audio_path = if audio.is_empty() {
        None
    } else {
        let staged = std::env::temp_dir().join(format!("termvid-{}.audio", std::process::id()));
        fs::write(&staged, &audio)
            .unwrap_or_else(|e| fail(format!("Error staging audio {}: {}", staged.display(), e)));
        Some(staged)
    };

    play_stream(&stream, fps, audio_path.as_deref(), &config);

    if let Some(staged) = audio_path {
        // The player may still hold the file; a leftover temp file is harmless.
        let _ = fs::remove_file(staged);
    }
}

fn play_stream<S: FrameStream>(stream: &S, fps: f64, audio: Option<&Path>, config: &PlayerConfig) {
    let playback = config.playback(fps).unwrap_or_else(|e| fail(e));
    let scheduler = Scheduler::new(playback).unwrap_or_else(|e| fail(e));

    let mut sink = TerminalSink::stdout();
    sink.begin().unwrap_or_else(|e| fail(e));

    if let Some(audio) = audio {
        if let Err(e) = config.audio_player().play(audio) {
            log::warn!("Audio disabled, could not start {}: {}", config.audio_command.program, e);
        }
    }

    let result = if config.debug {
        let mut overlay = TerminalSink::stdout();
        scheduler.play_with(stream, &mut sink, |tick, stats| {
            if let Tick::Rendered { debt } = tick {
                let _ = overlay.write_overlay(&stats.render(debt));
            }
        })
    } else {
        scheduler.play(stream, &mut sink)
    };

    // Restore the cursor even if playback failed.
    let _ = sink.finish();

    match result {
        Ok(stats) => print_summary(&stats),
        Err(e) => fail(e),
    }
}

fn print_summary(stats: &RunningStats) {
    println!();
    println!("Playback finished");
    println!("=================");
    println!("Frames:  {} ({} rendered, {} dropped)", stats.full_count(), stats.count, stats.dropped);
    println!("Dropped: {:.2}%", stats.dropped_percent());
    println!("Debted:  {:.2}%", stats.debted_percent());
    println!(
        "Time debt: mean {}us, max {}us",
        stats.mean.as_micros(),
        stats.max.as_micros()
    );
}

fn print_example_config() {
    let config = PlayerConfig::default();

    println!("Example configuration (player.json):");
    match serde_json::to_string_pretty(&config) {
        Ok(json) => println!("{}", json),
        Err(e) => fail(e),
    }
}

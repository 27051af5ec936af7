use chrono::Utc;
use fern::Dispatch;
use fern::colors::{Color, ColoredLevelConfig};
use log::LevelFilter;
use std::path::Path;
use std::sync::Once;

const LOG_FILE: &str = "logs/sched.log";

static INIT: Once = Once::new();

/// Initializes the global logger at the default verbosity.
///
/// `RUST_LOG` overrides the level when set. Safe to call more than once;
/// only the first call applies a configuration.
pub fn init() {
    init_with_verbosity(1);
}

/// Initializes the global logger from the `verbosity` configuration knob:
/// 0 warns only, 1 is informational, 2 debugs, 3 traces. The planner logs
/// every reservation mutation at trace; that firehose stays capped at
/// debug until verbosity 4.
pub fn init_with_verbosity(verbosity: u8) {
    INIT.call_once(|| {
        let level = std::env::var("RUST_LOG")
            .ok()
            .and_then(|v| v.parse::<LevelFilter>().ok())
            .unwrap_or(match verbosity {
                0 => LevelFilter::Warn,
                1 => LevelFilter::Info,
                2 => LevelFilter::Debug,
                _ => LevelFilter::Trace,
            });
        let planner_level = if verbosity >= 4 { level } else { level.min(LevelFilter::Debug) };
        if let Err(e) = build(level, planner_level, Path::new(LOG_FILE)) {
            eprintln!("Failed to initialize the logger: {}", e);
        }
    });
}

fn build(level: LevelFilter, planner_level: LevelFilter, log_file: &Path) -> Result<(), fern::InitError> {
    if let Some(dir) = log_file.parent() {
        std::fs::create_dir_all(dir)?;
    }

    let colors = ColoredLevelConfig::new()
        .error(Color::Red)
        .warn(Color::Yellow)
        .info(Color::Green)
        .debug(Color::Blue)
        .trace(Color::BrightBlack);

    let console = Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!("{} [{:<5}] {}: {}", Utc::now().format("%H:%M:%S"), colors.color(record.level()), record.target(), message))
        })
        .chain(std::io::stderr());

    let file = Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!("{} {} {}: {}", Utc::now().format("%Y-%m-%dT%H:%M:%SZ"), record.level(), record.target(), message))
        })
        .chain(fern::log_file(log_file)?);

    Dispatch::new()
        .level(level)
        .level_for("tempo_sched::domain::planner", planner_level)
        .chain(console)
        .chain(file)
        .apply()?;

    log::info!("logger initialized at {}, writing to {}", level, log_file.display());
    Ok(())
}

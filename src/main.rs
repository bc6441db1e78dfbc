//! Emitrack: vehicle image extraction by zone crossing, classification and
//! emission estimation over a shared dataset.

pub mod module; // Import the module submodule that contains other modules

use std::path::Path;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use crate::module::classify::pipeline::{ClassificationPipeline, ConstantsTable};
use crate::module::classify::ClassifyService;
use crate::module::dataset::DatasetStore;
use crate::module::define;
use crate::module::error::{Error, Result};
use crate::module::extract::FrameExtractor;
use crate::module::util::init::{resource::init, AppProperty};
use crate::module::vision::detector::onnx::{YoloClassifier, YoloV8};
use crate::module::vision::source::ImageSequence;
use crate::module::vision::tracker::IouTracker;

#[derive(Parser, Debug)]
#[command(author, version, about = "Vehicle capture, classification and emission estimation")]
struct Cli {
    /// Directory holding emitrack.toml (generated on first run)
    #[arg(long, default_value = ".")]
    config_dir: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Capture one image per vehicle crossing a detection zone
    Extract,
    /// Watch for captured images and classify them until Ctrl-C
    Classify,
    /// Write the HTML report of the dataset
    Report,
}

pub fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(&cli) {
        log::error!("{}", e);
        eprintln!("{}: {}", define::system::NAME, e);
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<()> {
    // Prepare the resources: config file and every working directory
    let property = init(&cli.config_dir)?;

    init_log(
        &property.path.log,
        define::system::NAME,
        &property.conf.system.log_level,
    )?;
    log::info!("Starting {} {:?}...", define::system::NAME, cli.command);

    match cli.command {
        Command::Extract => extract(&property),
        Command::Classify => classify(&property),
        Command::Report => {
            module::report::generate(
                Path::new(&property.path.dataset),
                Path::new(&property.path.report),
            )?;
            Ok(())
        }
    }
}

fn extract(property: &AppProperty) -> Result<()> {
    let conf = &property.conf;
    // An unreadable source is fatal before any model is loaded
    let mut source = ImageSequence::open(Path::new(&conf.extract.video_path))?;
    let detector = YoloV8::new(
        "detector",
        &conf.model.detector,
        conf.model.detector_size,
        conf.model.detect_threshold,
    )?;
    let mut tracker = IouTracker::new(
        detector,
        conf.extract.vehicle_classes.clone(),
        conf.model.iou_threshold,
        conf.extract.max_missing,
    );
    let store = Arc::new(DatasetStore::open(Path::new(&property.path.dataset))?);
    let mut extractor =
        FrameExtractor::from_conf(&conf.extract, Path::new(&property.path.images), store)?;
    extractor.run(&mut source, &mut tracker)?;
    Ok(())
}

fn classify(property: &AppProperty) -> Result<()> {
    let conf = &property.conf;
    let tier1 = YoloClassifier::new(
        "tier1",
        &conf.model.tier1,
        &conf.model.tier1_labels,
        conf.model.classifier_size,
        conf.model.tier1_threshold,
    )?;
    let pc = YoloClassifier::new(
        "pc",
        &conf.model.pc,
        &conf.model.pc_labels,
        conf.model.classifier_size,
        conf.model.pc_threshold,
    )?;
    let constants = ConstantsTable::load(Path::new(&conf.classify.constants_path))?;
    let store = Arc::new(DatasetStore::open(Path::new(&property.path.dataset))?);
    let pipeline = ClassificationPipeline::new(
        Box::new(tier1),
        Box::new(pc),
        constants,
        store,
        Path::new(&property.path.results),
    );
    let service = ClassifyService::start(
        Path::new(&property.path.watch),
        &conf.classify,
        Arc::new(pipeline),
    )?;

    // Block the main thread until Ctrl-C
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    rt.block_on(tokio::signal::ctrl_c())?;
    log::info!(
        "Interrupted, finishing {} queued images",
        service.pending()
    );
    service.shutdown()
}

/// This function initializes the logger system using the log4rs crate.
///
/// # Arguments
/// * `dir` - The log directory; the log file goes to `<dir>/<name>.log`
/// * `name` - The name of the logger and the log file
/// * `level` - Root level filter, e.g. `info` or `debug`
///
/// # Log Example
/// ```
/// log::debug!("Debug Message"); // Log a debug message
/// log::info!("Info Message"); // Log an info message
/// log::warn!("Warning Message"); // Log a warning message
/// log::error!("Error Message"); // Log an error message
/// ```
fn init_log(dir: &str, name: &str, level: &str) -> Result<()> {
    use crate::module::util::path::join;
    use log::LevelFilter;
    use log4rs::append::console::ConsoleAppender;
    use log4rs::append::file::FileAppender;
    use log4rs::config::{Appender, Config, Root};
    use log4rs::encode::pattern::PatternEncoder;

    let level: LevelFilter = level
        .parse()
        .map_err(|_| Error::Log(format!("unknown log level {}", level)))?;

    let logfile = FileAppender::builder()
        .encoder(Box::new(PatternEncoder::new("{d} - {l}: {m}{n}")))
        .build(join(&[dir, &format!("{}.log", name)]))?;
    let stdout = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new("{h({d} - {l}: {m}{n})}")))
        .build();

    let config = Config::builder()
        .appender(Appender::builder().build("logfile", Box::new(logfile)))
        .appender(Appender::builder().build("stdout", Box::new(stdout)))
        .build(
            Root::builder()
                .appender("logfile")
                .appender("stdout")
                .build(level),
        )
        .map_err(|e| Error::Log(e.to_string()))?;
    log4rs::init_config(config).map_err(|e| Error::Log(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::{debug, error, info, warn};
    use std::fs;

    // A simple test case for the init_log function
    #[test]
    fn test_log() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().to_str().unwrap();
        let name = "test_log";

        init_log(dir, name, "info").unwrap();

        debug!("Debug Message");
        info!("Info Message");
        warn!("Warning Message");
        error!("Error Message");

        // Read the contents of the log file
        let log_file_path = tmp.path().join("test_log.log");
        let log_contents = fs::read_to_string(log_file_path).expect("Failed to read log file");

        // Assert that log messages are present in the file
        assert!(!log_contents.contains("Debug Message"));
        assert!(log_contents.contains("Info Message"));
        assert!(log_contents.contains("Warning Message"));
        assert!(log_contents.contains("Error Message"));
    }

    #[test]
    fn test_unknown_level() {
        assert!(matches!(init_log("/tmp", "x", "loud"), Err(Error::Log(_))));
    }

    #[test]
    fn test_cli_parses_subcommands() {
        let cli = Cli::try_parse_from(["emitrack", "--config-dir", "/etc/emitrack", "classify"])
            .unwrap();
        assert_eq!(cli.config_dir, "/etc/emitrack");
        assert!(matches!(cli.command, Command::Classify));
        assert!(Cli::try_parse_from(["emitrack"]).is_err());
    }
}

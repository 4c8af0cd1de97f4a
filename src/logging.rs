use std::path::Path;

use log4rs::{
    append::{
        console::{ConsoleAppender, Target},
        file::FileAppender,
    },
    config::{Appender, Root},
    encode::pattern::PatternEncoder,
    filter::threshold::ThresholdFilter,
    Config,
};

const CONSOLE_PATTERN: &str = "{h({d(%Y-%m-%d %H:%M:%S)} [{l}] in {M})} - {m}{n}";
const FILE_PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S)} [{l}] from line {L} in {M} - {m}{n}";

/// Set up logging to stderr and, if `log_file` is given, to that file as well.
///
/// The console only shows messages at `level` or above. The file always records
/// at least DEBUG messages so that the external tool command lines of a failed
/// coupling run can be recovered afterwards. Panics if the logger cannot be
/// configured, usually because the log file cannot be created.
pub fn init_logging(level: log::LevelFilter, log_file: Option<&Path>) {
    let stderr = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(CONSOLE_PATTERN)))
        .target(Target::Stderr)
        .build();

    let mut builder = Config::builder().appender(
        Appender::builder()
            .filter(Box::new(ThresholdFilter::new(level)))
            .build("stderr", Box::new(stderr)),
    );
    let mut root = Root::builder().appender("stderr");
    let mut root_level = level;

    if let Some(path) = log_file {
        let file = FileAppender::builder()
            .encoder(Box::new(PatternEncoder::new(FILE_PATTERN)))
            .append(false)
            .build(path)
            .expect("Failed to create log file");
        builder = builder.appender(Appender::builder().build("file", Box::new(file)));
        root = root.appender("file");
        root_level = root_level.max(log::LevelFilter::Debug);
    }

    let config = builder
        .build(root.build(root_level))
        .expect("Failed to configure logger");

    log4rs::init_config(config).expect("Failed to initialize logger");
}

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::PathBuf;

use clap::Parser;
use outerr::cli::exit::{frame_error, io_error, CliResult, SUCCESS};
use outerr::cli::logging::{init_logging, LogFormat, LogLevel};
use outerr::cli::output::{FramePrinter, OutputFormat, StreamFilter};
use outerr::frame::FrameReader;
use tracing::debug;

#[derive(Parser, Debug)]
#[command(
    name = "out-err-dump",
    version,
    about = "Decode a combined stream written by out-err"
)]
struct Cli {
    /// Output format. Default: table on a terminal, json otherwise.
    #[arg(long, value_name = "FORMAT")]
    format: Option<OutputFormat>,

    /// Only show frames from one stream.
    #[arg(long, value_name = "STREAM")]
    stream: Option<StreamFilter>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text")]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "warn", env = "OUT_ERR_LOG_LEVEL")]
    log_level: LogLevel,

    /// Combined stream to read. Default: stdin.
    file: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("out-err-dump: {err}");
            std::process::exit(err.code);
        }
    }
}

fn run(cli: Cli) -> CliResult<i32> {
    let input: Box<dyn Read> = match &cli.file {
        Some(path) => Box::new(BufReader::new(
            File::open(path).map_err(|err| io_error(&path.display().to_string(), err))?,
        )),
        None => Box::new(io::stdin().lock()),
    };
    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let mut printer = FramePrinter::new(io::stdout().lock(), format);

    let mut skipped = 0u64;
    let mut malformed = None;
    for frame in FrameReader::new(input) {
        let frame = match frame {
            Ok(frame) => frame,
            Err(err) => {
                malformed = Some(frame_error("read frame", err));
                break;
            }
        };
        if cli.stream.is_some_and(|filter| !filter.matches(frame.stream)) {
            skipped += 1;
            continue;
        }
        printer
            .print(&frame)
            .map_err(|err| io_error("write output", err))?;
    }

    debug!(printed = printer.count(), skipped, "decoded combined stream");
    // Frames decoded before a malformed one are still written out.
    let _out = printer
        .finish()
        .map_err(|err| io_error("write output", err))?;
    match malformed {
        Some(err) => Err(err),
        None => Ok(SUCCESS),
    }
}

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use clap::Parser;
use outerr::cli::exit::{io_error, mux_error, transport_error, CliResult};
use outerr::cli::logging::{init_logging, LogFormat, LogLevel};
use outerr::cli::{destination, preload};
use outerr::frame::FrameWriter;
use outerr::mux::{Disposition, Launcher};
use tracing::debug;

#[derive(Parser, Debug)]
#[command(
    name = "out-err",
    version,
    about = "Run a command and merge its stdout and stderr into one ordered, framed stream"
)]
struct Cli {
    /// Write the combined stream to FILE (created with mode 0600) instead of stdout.
    #[arg(short = 'o', long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Interception library to preload into the command.
    #[arg(long, value_name = "PATH", env = "OUT_ERR_PRELOAD")]
    preload: Option<PathBuf>,

    /// Run the command without the interception library.
    #[arg(long)]
    no_preload: bool,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text")]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "warn", env = "OUT_ERR_LOG_LEVEL")]
    log_level: LogLevel,

    /// Command to run, followed by its arguments.
    #[arg(
        value_name = "COMMAND",
        required = true,
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    command: Vec<OsString>,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    match run(cli) {
        Ok(disposition) => disposition.mirror(),
        Err(err) => {
            eprintln!("out-err: {err}");
            std::process::exit(err.code);
        }
    }
}

fn run(cli: Cli) -> CliResult<Disposition> {
    let sink = destination::open(cli.output.as_deref())
        .map_err(|err| io_error(&output_name(cli.output.as_deref()), err))?;
    let capacity = outerr::transport::max_send_buffer().map_err(transport_error)?;
    debug!(capacity, "initial receive buffer");

    let library = preload::resolve(cli.preload, cli.no_preload);
    let session = Launcher::new(cli.command)
        .with_preload(library)
        .spawn()
        .map_err(mux_error)?;

    session
        .multiplex(FrameWriter::new(sink), capacity)
        .map_err(mux_error)
}

fn output_name(output: Option<&Path>) -> String {
    match output {
        Some(path) => path.display().to_string(),
        None => "stdout".to_string(),
    }
}

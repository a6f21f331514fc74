use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info, warn};

use motionmux::batch;
use motionmux::cli::{Args, Mode};
use motionmux::exiftool::ExifTool;
use motionmux::{MuxResult, Muxer};

fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(args.log_level())
        .with_target(false)
        .init();

    match run(&args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> MuxResult<bool> {
    let mode = args.mode()?;
    let tool = ExifTool::new(&args.exiftool);
    if !tool.available() {
        warn!(
            "{} could not be run, metadata queries will fail",
            tool.program().display()
        );
    }

    match mode {
        Mode::Single {
            image,
            video,
            options,
        } => {
            let mut muxer = Muxer::new(image, video, &tool, options)?;
            match muxer.mux() {
                Ok(report) => {
                    info!(
                        "Done: {} ({} bytes)",
                        report.output.display(),
                        report.bytes_written
                    );
                    Ok(true)
                }
                Err(e) => {
                    error!("Failed while {}: {}", muxer.stage(), e);
                    Ok(false)
                }
            }
        }
        Mode::Batch(options) => {
            let summary = batch::run(&options, || ExifTool::new(&args.exiftool))?;
            for (path, message) in &summary.failures {
                error!("{}: {}", path.display(), message);
            }
            Ok(summary.is_success())
        }
    }
}

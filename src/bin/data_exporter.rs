//! Capture frames from the first sensors found and write them to a file.
//!
//! Usage: data_exporter [-n <N>] [-f csv|bin] <outputfile>
//!
//! Without the `cepton-sdk` feature, frames come from the simulated SDK.

use cepton_api::export::{self, Command, ExportArgs};
use cepton_api::{Options, RigidTransform, SensorSdk, Session};
use std::fs::File;
use std::io::BufWriter;
use std::sync::Arc;
use std::time::Duration;

const FRAME_TIMEOUT: Duration = Duration::from_secs(5);

#[cfg(feature = "cepton-sdk")]
fn create_sdk() -> Arc<dyn SensorSdk> {
    Arc::new(cepton_api::CeptonSdk::new())
}

#[cfg(not(feature = "cepton-sdk"))]
fn create_sdk() -> Arc<dyn SensorSdk> {
    Arc::new(cepton_api::SimulatedSdk::new())
}

fn main() {
    env_logger::init();
    std::process::exit(run());
}

fn run() -> i32 {
    let argv: Vec<String> = std::env::args().skip(1).collect();
    let args = match export::parse_args(&argv) {
        Ok(Command::Usage) => {
            print!("{}", export::USAGE);
            return 0;
        }
        Ok(Command::Export(args)) => args,
        Err(e) => {
            println!("{}", e);
            return -1;
        }
    };
    if !args.extra.is_empty() {
        println!("Extra argument after filename ignored");
    }

    let mut session = Session::new(create_sdk());
    if let Err(e) = session.initialize(Options::default(), None) {
        log::error!("{}", e);
        println!("Initialize SDK failed");
        return -1;
    }

    let code = match export_to_file(&session, &args) {
        Ok(()) => 0,
        Err(message) => {
            println!("{}", message);
            -1
        }
    };

    if let Err(e) = session.deinitialize() {
        log::warn!("Failed to deinitialize SDK: {}", e);
    }
    code
}

fn export_to_file(session: &Session, args: &ExportArgs) -> Result<(), String> {
    let file = File::create(&args.output)
        .map_err(|e| format!("Failed to open {}: {}", args.output.display(), e))?;

    println!("Capturing {} frames into {}", args.frame_count, args.output.display());
    export::export_frames(
        session,
        args.frame_count,
        args.format,
        &RigidTransform::identity(),
        BufWriter::new(file),
        FRAME_TIMEOUT,
    )
    .map_err(|e| format!("Export failed: {}", e))?;
    Ok(())
}

//! Frame export used by the `data_exporter` binary.

use crate::error::SensorError;
use crate::session::{Session, POLL_INTERVAL};
use crate::stream::{FrameStream, ImageFrame, StreamError};
use crate::transform::RigidTransform;
use crate::types::SensorPoint;
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

pub const MAX_FRAMES: usize = 1000;

pub const USAGE: &str = "
Usage: data_exporter <options> <outputfile>

Options are:
  -n <N>    Number of frames to capture, default is 1
  -f <fmt>  Valid formats are csv or bin, default is csv
      binary files use a 32 byte little-endian record per point

";

/// Subscriber id the exporter registers on the image frame channel.
pub const EXPORTER_CALLBACK_ID: u64 = 0x6578_706f_7274;

const FRAME_QUEUE: usize = 64;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExportFormat {
    /// `timestamp,x,y,z,intensity` per line.
    #[default]
    Csv,
    /// [`SensorPoint::to_le_bytes`] records.
    Bin,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportArgs {
    pub frame_count: usize,
    pub format: ExportFormat,
    pub output: PathBuf,
    /// Arguments after the file name. Ignored.
    pub extra: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Usage,
    Export(ExportArgs),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArgsError {
    #[error("Invalid number of frames, maximum allowed is 1000")]
    InvalidFrameCount,
    #[error("Invalid format specified. Expect csv or bin")]
    InvalidFormat,
    #[error("Unknown option: {0}")]
    UnknownOption(String),
    #[error("Expect a file name")]
    MissingFileName,
    #[error("Invalid file name: {0}")]
    InvalidFileName(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("SDK error: {0}")]
    Sensor(#[from] SensorError),
    #[error(transparent)]
    Stream(#[from] StreamError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Parse the arguments following the program name.
///
/// Options are consumed as `-x value` pairs while at least two arguments
/// remain, so a trailing lone `-x` is taken as the (invalid) file name.
pub fn parse_args<S: AsRef<str>>(args: &[S]) -> Result<Command, ArgsError> {
    if args.is_empty() {
        return Ok(Command::Usage);
    }

    let mut frame_count = 1;
    let mut format = ExportFormat::Csv;
    let mut i = 0;

    while args.len() > i + 1 && args[i].as_ref().starts_with('-') {
        let value = args[i + 1].as_ref();
        match args[i].as_ref() {
            "-n" => {
                frame_count = value
                    .parse::<usize>()
                    .ok()
                    .filter(|n| (1..=MAX_FRAMES).contains(n))
                    .ok_or(ArgsError::InvalidFrameCount)?;
            }
            "-f" => {
                format = match value {
                    "csv" => ExportFormat::Csv,
                    "bin" => ExportFormat::Bin,
                    _ => return Err(ArgsError::InvalidFormat),
                };
            }
            other => return Err(ArgsError::UnknownOption(other.to_string())),
        }
        i += 2;
    }

    let name = args.get(i).ok_or(ArgsError::MissingFileName)?.as_ref();
    if name.starts_with('-') {
        return Err(ArgsError::InvalidFileName(name.to_string()));
    }

    Ok(Command::Export(ExportArgs {
        frame_count,
        format,
        output: PathBuf::from(name),
        extra: args[i + 1..].iter().map(|s| s.as_ref().to_string()).collect(),
    }))
}

/// Decides which frames are written: the first frame may be partial and is
/// skipped, then exactly `target` frames are kept.
#[derive(Debug, Clone)]
pub struct FrameCollector {
    target: usize,
    seen: usize,
}

impl FrameCollector {
    pub fn new(target: usize) -> Self {
        Self { target, seen: 0 }
    }

    /// Count a received frame; true if it should be written.
    pub fn accept(&mut self) -> bool {
        if self.is_done() {
            return false;
        }
        self.seen += 1;
        self.seen > 1
    }

    pub fn is_done(&self) -> bool {
        self.seen > self.target
    }

    pub fn written(&self) -> usize {
        self.seen.saturating_sub(1)
    }
}

/// Writes points in the selected [`ExportFormat`].
pub struct PointWriter<W: Write> {
    out: W,
    format: ExportFormat,
    points_written: usize,
}

impl<W: Write> PointWriter<W> {
    pub fn new(out: W, format: ExportFormat) -> Self {
        Self {
            out,
            format,
            points_written: 0,
        }
    }

    pub fn write_points(&mut self, points: &[SensorPoint]) -> io::Result<()> {
        for p in points {
            match self.format {
                ExportFormat::Csv => writeln!(
                    self.out,
                    "{},{:.6},{:.6},{:.6},{:.6}",
                    p.timestamp, p.x, p.y, p.z, p.intensity
                )?,
                ExportFormat::Bin => self.out.write_all(&p.to_le_bytes())?,
            }
        }
        self.points_written += points.len();
        Ok(())
    }

    pub fn points_written(&self) -> usize {
        self.points_written
    }

    /// Flush and hand back the underlying writer.
    pub fn finish(mut self) -> io::Result<W> {
        self.out.flush()?;
        Ok(self.out)
    }
}

/// Capture `frame_count` frames from an initialized session into `out`.
///
/// Frames are converted to Cartesian points and moved by `transform`. A live
/// or running replay fails if no frame arrives within `timeout`. A paused
/// replay is advanced with [`Session::wait`] and fails with
/// [`StreamError::Stopped`] if the capture ends first.
pub fn export_frames<W: Write>(
    session: &Session,
    frame_count: usize,
    format: ExportFormat,
    transform: &RigidTransform,
    out: W,
    timeout: Duration,
) -> Result<W, ExportError> {
    let channel = session.image_frames();
    channel.initialize()?;
    let stream = FrameStream::subscribe(&channel, EXPORTER_CALLBACK_ID, FRAME_QUEUE);

    let mut collector = FrameCollector::new(frame_count);
    let mut writer = PointWriter::new(out, format);

    while !collector.is_done() {
        if session.is_realtime() {
            let frame = stream.recv_timeout(timeout)?;
            write_frame(&mut collector, &mut writer, transform, &frame)?;
            continue;
        }

        while let Some(frame) = stream.try_recv() {
            write_frame(&mut collector, &mut writer, transform, &frame)?;
        }
        if collector.is_done() {
            break;
        }
        if session.is_end() {
            return Err(StreamError::Stopped.into());
        }
        session.wait(POLL_INTERVAL)?;
    }

    log::info!(
        "Exported {} frames ({} points)",
        collector.written(),
        writer.points_written()
    );
    Ok(writer.finish()?)
}

fn write_frame<W: Write>(
    collector: &mut FrameCollector,
    writer: &mut PointWriter<W>,
    transform: &RigidTransform,
    frame: &ImageFrame,
) -> io::Result<()> {
    if !collector.accept() {
        log::debug!("Skipping frame ({} points)", frame.points.len());
        return Ok(());
    }
    let points: Vec<SensorPoint> = frame
        .points
        .iter()
        .map(|p| SensorPoint::from_image_point(p).transformed(transform))
        .collect();
    writer.write_points(&points)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn export(args: &[&str]) -> ExportArgs {
        match parse_args(args).unwrap() {
            Command::Export(args) => args,
            Command::Usage => panic!("expected export arguments"),
        }
    }

    #[test]
    fn test_no_arguments_prints_usage() {
        assert_eq!(parse_args::<&str>(&[]).unwrap(), Command::Usage);
    }

    #[test]
    fn test_defaults_and_options() {
        let args = export(&["out.csv"]);
        assert_eq!(args.frame_count, 1);
        assert_eq!(args.format, ExportFormat::Csv);
        assert_eq!(args.output, PathBuf::from("out.csv"));

        let args = export(&["-n", "5", "-f", "bin", "out.bin"]);
        assert_eq!(args.frame_count, 5);
        assert_eq!(args.format, ExportFormat::Bin);
        assert!(args.extra.is_empty());
    }

    #[test]
    fn test_frame_count_bounds() {
        assert_eq!(export(&["-n", "1000", "o"]).frame_count, 1000);
        for bad in ["0", "1001", "2000", "-3", "five"] {
            assert_eq!(
                parse_args(&["-n", bad, "out.csv"]).unwrap_err(),
                ArgsError::InvalidFrameCount,
                "{bad}"
            );
        }
    }

    #[test]
    fn test_invalid_arguments() {
        assert_eq!(
            parse_args(&["-f", "json", "out"]).unwrap_err(),
            ArgsError::InvalidFormat
        );
        assert_eq!(
            parse_args(&["-x", "1", "out"]).unwrap_err(),
            ArgsError::UnknownOption("-x".into())
        );
        assert_eq!(parse_args(&["-n", "5"]).unwrap_err(), ArgsError::MissingFileName);
        assert_eq!(
            parse_args(&["-n"]).unwrap_err(),
            ArgsError::InvalidFileName("-n".into())
        );
    }

    #[test]
    fn test_extra_arguments_are_kept_aside() {
        let args = export(&["-n", "2", "out.csv", "more", "stuff"]);
        assert_eq!(args.output, PathBuf::from("out.csv"));
        assert_eq!(args.extra, vec!["more".to_string(), "stuff".to_string()]);
    }

    #[test]
    fn test_collector_skips_first_frame() {
        let mut collector = FrameCollector::new(2);
        let decisions: Vec<bool> = (0..5).map(|_| collector.accept()).collect();
        assert_eq!(decisions, vec![false, true, true, false, false]);
        assert!(collector.is_done());
        assert_eq!(collector.written(), 2);
    }

    #[test]
    fn test_csv_rows() {
        let point = SensorPoint {
            timestamp: 42,
            x: 1.0,
            y: 2.5,
            z: -0.125,
            intensity: 0.5,
            ..SensorPoint::default()
        };
        let mut writer = PointWriter::new(Vec::new(), ExportFormat::Csv);
        writer.write_points(&[point, point]).unwrap();
        let text = String::from_utf8(writer.finish().unwrap()).unwrap();
        assert_eq!(
            text,
            "42,1.000000,2.500000,-0.125000,0.500000\n42,1.000000,2.500000,-0.125000,0.500000\n"
        );
    }

    #[test]
    fn test_bin_records() {
        let mut writer = PointWriter::new(Vec::new(), ExportFormat::Bin);
        writer.write_points(&[SensorPoint::default(); 3]).unwrap();
        assert_eq!(writer.points_written(), 3);
        assert_eq!(writer.finish().unwrap().len(), 3 * crate::types::SENSOR_POINT_RECORD_SIZE);
    }
}

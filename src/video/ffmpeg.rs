//! Video input and output through the ffmpeg command line tools.

use std::ffi::OsString;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::thread::JoinHandle;

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::{
    config::{OutputConfig, VideoConfig},
    error::{Result, VideoError},
    video::{
        CaptureSink, EncodedVideo, Frame, OutputFormat, OutputKind, SinkCapabilities,
        SinkProvider, VideoMetadata, VideoSource,
    },
};

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

/// Parse an ffprobe rational such as `30000/1001`
fn parse_rate(rate: &str) -> Option<f64> {
    let (num, den) = rate.split_once('/').unwrap_or((rate, "1"));
    let num: f64 = num.trim().parse().ok()?;
    let den: f64 = den.trim().parse().ok()?;
    if num > 0.0 && den > 0.0 {
        Some(num / den)
    } else {
        None
    }
}

fn parse_probe(json: &str, path: &Path) -> Result<VideoMetadata> {
    let unavailable = |reason: String| VideoError::SourceUnavailable {
        path: path.display().to_string(),
        reason,
    };

    let probe: ProbeOutput = serde_json::from_str(json)
        .map_err(|e| unavailable(format!("invalid ffprobe output: {}", e)))?;
    let stream = probe
        .streams
        .into_iter()
        .next()
        .ok_or_else(|| unavailable("no video stream".to_string()))?;

    let (width, height) = match (stream.width, stream.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => return Err(unavailable("video stream has no frame size".to_string()).into()),
    };

    let duration = probe
        .format
        .and_then(|f| f.duration)
        .and_then(|d| d.trim().parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d >= 0.0);

    Ok(VideoMetadata {
        duration,
        width,
        height,
        fps: stream.avg_frame_rate.as_deref().and_then(parse_rate),
        codec: stream.codec_name,
    })
}

/// Arguments decoding the single frame at `time` as raw RGBA.
///
/// Rotation metadata is ignored so the decoded frame keeps the coded size ffprobe
/// reports as `width` x `height`.
fn decode_args(path: &Path, time: f64) -> Vec<OsString> {
    let mut args: Vec<OsString> = ["-v", "error", "-nostdin", "-noautorotate", "-ss"]
        .into_iter()
        .map(OsString::from)
        .collect();
    args.push(format!("{:.6}", time).into());
    args.push("-i".into());
    args.push(path.as_os_str().to_os_string());
    args.extend(
        ["-frames:v", "1", "-f", "rawvideo", "-pix_fmt", "rgba", "pipe:1"]
            .into_iter()
            .map(OsString::from),
    );
    args
}

/// Decodes frames on demand with one short-lived ffmpeg process per seek
pub struct FfmpegSource {
    path: PathBuf,
    ffmpeg_bin: String,
    metadata: VideoMetadata,
    decoded: Option<Vec<u8>>,
}

impl FfmpegSource {
    /// Probe `path` with ffprobe and prepare it for seeking
    pub async fn open<P: AsRef<Path>>(path: P, config: &VideoConfig) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(VideoError::SourceUnavailable {
                path: path.display().to_string(),
                reason: "file does not exist".to_string(),
            }
            .into());
        }

        let output = tokio::process::Command::new(&config.ffprobe_bin)
            .args([
                "-v", "error",
                "-select_streams", "v:0",
                "-show_entries", "format=duration:stream=width,height,avg_frame_rate,codec_name",
                "-of", "json",
            ])
            .arg(path)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| VideoError::SourceUnavailable {
                path: path.display().to_string(),
                reason: format!("failed to run {}: {}", config.ffprobe_bin, e),
            })?;

        if !output.status.success() {
            return Err(VideoError::SourceUnavailable {
                path: path.display().to_string(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }
            .into());
        }

        let metadata = parse_probe(&String::from_utf8_lossy(&output.stdout), path)?;
        info!(
            "Video metadata: {}x{} @ {} fps, {} ({})",
            metadata.width,
            metadata.height,
            metadata.fps.map_or("?".to_string(), |f| format!("{:.2}", f)),
            metadata.duration.map_or("unknown duration".to_string(), |d| format!("{:.2}s", d)),
            metadata.codec.as_deref().unwrap_or("unknown codec"),
        );

        Ok(Self {
            path: path.to_path_buf(),
            ffmpeg_bin: config.ffmpeg_bin.clone(),
            metadata,
            decoded: None,
        })
    }
}

impl VideoSource for FfmpegSource {
    fn metadata(&self) -> &VideoMetadata {
        &self.metadata
    }

    async fn seek(&mut self, time: f64) -> Result<()> {
        let output = tokio::process::Command::new(&self.ffmpeg_bin)
            .args(decode_args(&self.path, time))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| VideoError::SeekFailed {
                time,
                reason: format!("failed to run {}: {}", self.ffmpeg_bin, e),
            })?;

        if !output.status.success() {
            return Err(VideoError::SeekFailed {
                time,
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }
            .into());
        }
        if output.stdout.is_empty() {
            return Err(VideoError::SeekFailed {
                time,
                reason: "no frame decoded at this position".to_string(),
            }
            .into());
        }

        debug!("Decoded {} bytes at {:.3}s", output.stdout.len(), time);
        self.decoded = Some(output.stdout);
        Ok(())
    }

    fn capture(&mut self) -> Result<Frame> {
        let bytes = self.decoded.clone().ok_or_else(|| VideoError::Capture {
            reason: "no frame decoded yet".to_string(),
        })?;
        Frame::from_rgba_bytes(self.metadata.width, self.metadata.height, bytes)
    }
}

/// ffmpeg muxer name for a container extension
fn muxer_for(container: &str) -> &str {
    match container {
        "mkv" => "matroska",
        other => other,
    }
}

/// Streams raw RGBA frames into an ffmpeg encoder and collects the container bytes.
///
/// Requested frames are queued to a writer thread that owns the encoder's stdin,
/// so a full pipe never blocks the caller's paced loop.
pub struct FfmpegSink {
    child: Child,
    frame_queue: Option<mpsc::Sender<Vec<u8>>>,
    stdin_writer: Option<JoinHandle<std::io::Result<usize>>>,
    stdout_reader: Option<JoinHandle<std::io::Result<Vec<u8>>>>,
    stderr_reader: Option<JoinHandle<String>>,
    surface: Option<Vec<u8>>,
    format: OutputFormat,
    width: u32,
    height: u32,
    fps: f64,
    frames_written: usize,
    done: bool,
}

impl FfmpegSink {
    pub fn spawn(
        ffmpeg_bin: &str,
        output: &OutputConfig,
        width: u32,
        height: u32,
        fps: f64,
    ) -> Result<Self> {
        let args = Self::ffmpeg_args(output, width, height, fps);
        debug!("Spawning encoder: {} {}", ffmpeg_bin, args.join(" "));

        let mut child = Command::new(ffmpeg_bin)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| VideoError::Sink {
                reason: format!("failed to spawn {}: {}", ffmpeg_bin, e),
            })?;

        let format = OutputFormat::new(output.container.clone(), output.codec.clone());
        Self::attach(child, format, width, height, fps)
    }

    /// Take over a spawned encoder whose stdio is piped
    fn attach(
        mut child: Child,
        format: OutputFormat,
        width: u32,
        height: u32,
        fps: f64,
    ) -> Result<Self> {
        let mut stdin = child.stdin.take().ok_or_else(|| VideoError::Sink {
            reason: "encoder stdin unavailable".to_string(),
        })?;
        let mut stdout = child.stdout.take().ok_or_else(|| VideoError::Sink {
            reason: "encoder stdout unavailable".to_string(),
        })?;
        let mut stderr = child.stderr.take().ok_or_else(|| VideoError::Sink {
            reason: "encoder stderr unavailable".to_string(),
        })?;

        let (frame_queue, frames) = mpsc::channel::<Vec<u8>>();
        let stdin_writer = std::thread::spawn(move || -> std::io::Result<usize> {
            let mut written = 0;
            for frame in frames {
                stdin.write_all(&frame)?;
                written += 1;
            }
            Ok(written)
        });
        let stdout_reader = std::thread::spawn(move || {
            let mut data = Vec::new();
            stdout.read_to_end(&mut data).map(|_| data)
        });
        let stderr_reader = std::thread::spawn(move || {
            let mut log = String::new();
            let _ = stderr.read_to_string(&mut log);
            log
        });

        Ok(Self {
            child,
            frame_queue: Some(frame_queue),
            stdin_writer: Some(stdin_writer),
            stdout_reader: Some(stdout_reader),
            stderr_reader: Some(stderr_reader),
            surface: None,
            format,
            width,
            height,
            fps,
            frames_written: 0,
            done: false,
        })
    }

    fn ffmpeg_args(output: &OutputConfig, width: u32, height: u32, fps: f64) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "-v".into(), "error".into(),
            "-f".into(), "rawvideo".into(),
            "-pix_fmt".into(), "rgba".into(),
            "-s".into(), format!("{}x{}", width, height),
            "-framerate".into(), format!("{}", fps),
            "-i".into(), "pipe:0".into(),
            "-an".into(),
            "-c:v".into(), output.codec.clone(),
            "-crf".into(), output.crf().to_string(),
            "-pix_fmt".into(), "yuv420p".into(),
            // 4:2:0 chroma needs even dimensions
            "-vf".into(), "scale=trunc(iw/2)*2:trunc(ih/2)*2".into(),
        ];

        if output.container == "mp4" || output.container == "mov" {
            args.push("-movflags".to_string());
            args.push("frag_keyframe+empty_moov+default_base_moof".to_string());
        }

        args.push("-f".to_string());
        args.push(muxer_for(&output.container).to_string());
        args.push("pipe:1".to_string());
        args
    }

    /// Last few lines the encoder wrote to stderr
    fn stderr_tail(&mut self) -> String {
        let log = self
            .stderr_reader
            .take()
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();
        let lines: Vec<&str> = log.lines().collect();
        lines[lines.len().saturating_sub(5)..].join(" | ")
    }

    /// Close the frame queue and wait for the writer to drain it
    fn close_input(&mut self) -> std::result::Result<usize, String> {
        drop(self.frame_queue.take());
        match self.stdin_writer.take().map(|handle| handle.join()) {
            Some(Ok(Ok(written))) => Ok(written),
            Some(Ok(Err(e))) => Err(e.to_string()),
            Some(Err(_)) => Err("encoder writer thread panicked".to_string()),
            None => Err("encoder input already closed".to_string()),
        }
    }
}

impl CaptureSink for FfmpegSink {
    fn capabilities(&self) -> SinkCapabilities {
        SinkCapabilities {
            explicit_frame_request: true,
        }
    }

    fn draw(&mut self, frame: &Frame) -> Result<()> {
        let bytes = if frame.dimensions() == (self.width, self.height) {
            frame.as_raw().to_vec()
        } else {
            frame.resized(self.width, self.height).into_raw()
        };
        self.surface = Some(bytes);
        Ok(())
    }

    fn request_frame(&mut self) -> Result<()> {
        let surface = self.surface.clone().ok_or_else(|| VideoError::Sink {
            reason: "frame requested before anything was drawn".to_string(),
        })?;
        let queue = self.frame_queue.as_ref().ok_or_else(|| VideoError::Sink {
            reason: "encoder input already closed".to_string(),
        })?;

        if queue.send(surface).is_err() {
            // The writer only hangs up after a failed write
            let reason = match self.close_input() {
                Err(reason) => reason,
                Ok(_) => "encoder input closed".to_string(),
            };
            return Err(VideoError::Sink {
                reason: format!("failed to write frame {}: {}", self.frames_written, reason),
            }
            .into());
        }
        self.frames_written += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<EncodedVideo> {
        let written = self.close_input();
        self.done = true;

        let status = self.child.wait().map_err(|e| VideoError::Sink {
            reason: format!("failed to wait for encoder: {}", e),
        })?;
        let data = self
            .stdout_reader
            .take()
            .and_then(|handle| handle.join().ok())
            .transpose()
            .map_err(|e| VideoError::Sink {
                reason: format!("failed to read encoder output: {}", e),
            })?
            .unwrap_or_default();

        let frame_count = match written {
            Ok(count) => count,
            Err(reason) => {
                let tail = self.stderr_tail();
                return Err(VideoError::Sink {
                    reason: format!("failed to feed encoder: {}: {}", reason, tail),
                }
                .into());
            }
        };
        if !status.success() {
            return Err(VideoError::Sink {
                reason: format!("encoder exited with {}: {}", status, self.stderr_tail()),
            }
            .into());
        }

        info!(
            "Encoded {} frames into {} KB of {}",
            frame_count,
            data.len() / 1024,
            self.format.container
        );

        Ok(EncodedVideo {
            data,
            format: self.format.clone(),
            width: self.width & !1,
            height: self.height & !1,
            fps: self.fps,
            frame_count,
        })
    }

    fn abort(&mut self) {
        drop(self.frame_queue.take());
        if !self.done {
            let _ = self.child.kill();
            let _ = self.child.wait();
            self.done = true;
        }
        self.stdin_writer.take();
        self.stdout_reader.take();
        self.stderr_reader.take();
        warn!("Encoder aborted after {} frames", self.frames_written);
    }
}

impl Drop for FfmpegSink {
    fn drop(&mut self) {
        drop(self.frame_queue.take());
        if !self.done {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// Creates one ffmpeg encoder per output stream
pub struct FfmpegSinkProvider {
    ffmpeg_bin: String,
    output: OutputConfig,
}

impl FfmpegSinkProvider {
    pub fn new(ffmpeg_bin: impl Into<String>, output: OutputConfig) -> Self {
        Self {
            ffmpeg_bin: ffmpeg_bin.into(),
            output,
        }
    }

    /// Check that the ffmpeg binary can be executed
    pub fn is_available(&self) -> bool {
        Command::new(&self.ffmpeg_bin)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }
}

impl SinkProvider for FfmpegSinkProvider {
    fn create_sink(
        &self,
        kind: OutputKind,
        width: u32,
        height: u32,
        fps: f64,
    ) -> Result<Box<dyn CaptureSink>> {
        debug!("Creating {} sink {}x{} @ {} fps", kind, width, height, fps);
        Ok(Box::new(FfmpegSink::spawn(&self.ffmpeg_bin, &self.output, width, height, fps)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rate() {
        assert_eq!(parse_rate("30/1"), Some(30.0));
        assert!((parse_rate("30000/1001").unwrap() - 29.97).abs() < 0.01);
        assert_eq!(parse_rate("25"), Some(25.0));
        assert_eq!(parse_rate("0/0"), None);
        assert_eq!(parse_rate("n/a"), None);
    }

    #[test]
    fn test_parse_probe() {
        let json = r#"{
            "programs": [],
            "streams": [{"codec_name": "h264", "width": 1920, "height": 1080, "avg_frame_rate": "30/1"}],
            "format": {"duration": "12.480000"}
        }"#;
        let meta = parse_probe(json, Path::new("clip.mp4")).unwrap();
        assert_eq!((meta.width, meta.height), (1920, 1080));
        assert_eq!(meta.fps, Some(30.0));
        assert_eq!(meta.duration, Some(12.48));
        assert_eq!(meta.codec.as_deref(), Some("h264"));
        assert_eq!(meta.frame_count_at(30.0), 374);
    }

    #[test]
    fn test_parse_probe_rotated_stream_keeps_coded_size() {
        let json = r#"{
            "streams": [{
                "codec_name": "hevc",
                "width": 1920,
                "height": 1080,
                "avg_frame_rate": "30/1",
                "side_data_list": [{"side_data_type": "Display Matrix", "rotation": -90}],
                "tags": {"rotate": "90"}
            }],
            "format": {"duration": "3.000000"}
        }"#;
        let meta = parse_probe(json, Path::new("phone.mov")).unwrap();
        assert_eq!((meta.width, meta.height), (1920, 1080));
    }

    #[test]
    fn test_decode_args_disable_autorotate() {
        let args: Vec<String> = decode_args(Path::new("phone.mov"), 1.5)
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        let rotate = args.iter().position(|a| a == "-noautorotate").unwrap();
        let input = args.iter().position(|a| a == "-i").unwrap();
        assert!(rotate < input, "-noautorotate must precede the input");
        assert_eq!(args[input + 1], "phone.mov");
        assert!(args.contains(&"1.500000".to_string()));
        assert!(args.join(" ").ends_with("-frames:v 1 -f rawvideo -pix_fmt rgba pipe:1"));
    }

    #[test]
    fn test_parse_probe_without_duration() {
        let json = r#"{"streams": [{"width": 640, "height": 480, "avg_frame_rate": "0/0"}], "format": {}}"#;
        let meta = parse_probe(json, Path::new("live.ts")).unwrap();
        assert_eq!(meta.duration, None);
        assert_eq!(meta.fps, None);
        assert_eq!(meta.frame_count_at(30.0), 0);
    }

    #[test]
    fn test_parse_probe_without_video_stream() {
        let err = parse_probe(r#"{"streams": []}"#, Path::new("audio.wav")).unwrap_err();
        assert!(matches!(err, crate::KeyerError::Video(VideoError::SourceUnavailable { .. })));
    }

    #[test]
    fn test_encoder_args() {
        let output = OutputConfig::default();
        let args = FfmpegSink::ffmpeg_args(&output, 640, 360, 30.0);
        let joined = args.join(" ");
        assert!(joined.contains("-f rawvideo -pix_fmt rgba -s 640x360 -framerate 30 -i pipe:0"));
        assert!(joined.contains("-c:v libx264"));
        assert!(joined.contains("-movflags frag_keyframe+empty_moov+default_base_moof"));
        assert!(joined.ends_with("-f mp4 pipe:1"));

        let mkv = OutputConfig {
            container: "mkv".to_string(),
            ..OutputConfig::default()
        };
        let joined = FfmpegSink::ffmpeg_args(&mkv, 640, 360, 24.0).join(" ");
        assert!(!joined.contains("-movflags"));
        assert!(joined.ends_with("-f matroska pipe:1"));
    }

    #[cfg(unix)]
    #[test]
    fn test_request_frame_does_not_wait_for_encoder() {
        // Reads nothing for a while, then drains stdin like a slow encoder
        let child = Command::new("sh")
            .args(["-c", "sleep 0.5; cat > /dev/null"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap();
        let mut sink = FfmpegSink::attach(child, OutputFormat::default(), 512, 512, 30.0).unwrap();

        // Each frame is 1 MiB, far more than a pipe buffers
        let frame = Frame::new_filled(512, 512, [0, 255, 0, 255]);
        let started = std::time::Instant::now();
        for _ in 0..8 {
            sink.draw(&frame).unwrap();
            sink.request_frame().unwrap();
        }
        assert!(
            started.elapsed() < std::time::Duration::from_millis(250),
            "queueing frames took {:?}",
            started.elapsed()
        );

        let video = sink.finish().unwrap();
        assert_eq!(video.frame_count, 8);
    }

    #[cfg(unix)]
    #[test]
    fn test_finish_reports_encoder_that_stopped_reading() {
        let child = Command::new("sh")
            .args(["-c", "exit 0"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap();
        let mut sink = FfmpegSink::attach(child, OutputFormat::default(), 512, 512, 30.0).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(100));

        let frame = Frame::new_filled(512, 512, [0, 0, 255, 255]);
        let mut failed = false;
        for _ in 0..4 {
            sink.draw(&frame).unwrap();
            if sink.request_frame().is_err() {
                failed = true;
                break;
            }
        }
        if !failed {
            let err = sink.finish().unwrap_err();
            assert!(err.to_string().contains("failed to feed encoder"));
        }
    }

    #[tokio::test]
    async fn test_open_missing_file() {
        let err = FfmpegSource::open("/no/such/clip.mp4", &VideoConfig::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, crate::KeyerError::Video(VideoError::SourceUnavailable { .. })));
    }
}

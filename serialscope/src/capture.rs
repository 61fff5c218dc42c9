/*!
Poll-driven capture pipeline.

1. Source thread: device/file reads, UDP datagrams or the synthetic generator
   push raw chunks into a bounded channel
2. Decode loop: every poll interval, drain all queued chunks into a single
   `feed` call on the one decoder instance, then emit the batch
3. When the channel is full, real-time sources (UDP, synthetic) drop the
   newest chunk and count it; the reader source blocks instead, so replaying
   a file never loses data. Memory stays bounded either way.
*/

use crate::config::{AppConfig, SourceKind};
use crate::generator::{Pacer, SyntheticGenerator, TICK};
use crate::output::{LiveOutput, Recorder, ScaledBatch};
use anyhow::{Context, Result};
use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError, TrySendError};
use std::io::Read;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use streamframe::{DecoderStats, StreamDecoder};
use tokio::net::UdpSocket;
use tokio::runtime::Runtime;
use tracing::{debug, error, info, warn};

/// Weight of the previous mean when tracking the poll cadence
const CADENCE_RETAIN: f64 = 0.95;

/// Totals reported when a capture ends
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureSummary {
    pub decoder: DecoderStats,
    pub dropped_chunks: u64,
    pub packet_rate: f64,
    pub error_rate: f64,
}

/// Exponentially averaged interval between decoder polls
#[derive(Debug, Clone, Default)]
pub struct PollCadence {
    last: Option<Instant>,
    mean: Option<Duration>,
}

impl PollCadence {
    pub fn record(&mut self, now: Instant) {
        if let Some(last) = self.last {
            let dt = now.saturating_duration_since(last).as_secs_f64();
            let mean = match self.mean {
                None => dt,
                Some(mean) => mean.as_secs_f64() * CADENCE_RETAIN + dt * (1.0 - CADENCE_RETAIN),
            };
            self.mean = Some(Duration::from_secs_f64(mean));
        }
        self.last = Some(now);
    }

    pub fn mean(&self) -> Option<Duration> {
        self.mean
    }
}

/// Serial stream capture: one source thread feeding one decoder
pub struct SerialCapture {
    config: AppConfig,
    running: Arc<AtomicBool>,
    dropped_chunks: Arc<AtomicU64>,
}

impl SerialCapture {
    /// Validate the configured scheme and prepare a capture
    pub fn new(config: AppConfig) -> Result<Self> {
        config.validate()?;
        let scheme = config.parser.to_scheme()?;
        info!(
            "🔧 Frame scheme: {} ({} bytes per frame)",
            scheme.expected_pattern(),
            scheme.frame_size()
        );

        Ok(Self {
            config,
            running: Arc::new(AtomicBool::new(true)),
            dropped_chunks: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Get a reference to the running flag for external control
    pub fn get_running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Run until the source ends or the running flag is cleared
    pub fn start(&mut self) -> Result<CaptureSummary> {
        let scheme = self.config.parser.to_scheme()?;
        let (data_tx, data_rx) = bounded::<Vec<u8>>(self.config.source.queue_capacity.max(1));

        let source_handle = self.spawn_source(data_tx)?;
        let result = self.decode_loop(StreamDecoder::new(scheme), data_rx);

        // stop the source whichever way the loop ended
        self.running.store(false, Ordering::SeqCst);
        if source_handle.is_finished() || self.config.source.kind != SourceKind::File {
            match source_handle.join() {
                Ok(Ok(())) => debug!("Source thread finished"),
                Ok(Err(e)) => error!("Source thread failed: {:#}", e),
                Err(_) => error!("Source thread panicked"),
            }
        } else {
            // a blocking read on a quiet device cannot be interrupted
            debug!("Source thread still blocked in read, detaching");
        }

        result
    }

    fn spawn_source(&self, data_tx: Sender<Vec<u8>>) -> Result<thread::JoinHandle<Result<()>>> {
        let source = self.config.source.clone();
        let running = Arc::clone(&self.running);
        let dropped = Arc::clone(&self.dropped_chunks);

        let handle = match source.kind {
            SourceKind::File => {
                let reader = open_reader(&source.path)?;
                info!("🔌 Reading from {}", source.path);
                thread::spawn(move || reader_thread(reader, source.read_chunk_size, data_tx, running))
            }
            SourceKind::Udp => thread::spawn(move || -> Result<()> {
                let rt = Runtime::new()?;
                rt.block_on(udp_receiver_thread(
                    source.udp_bind_addr,
                    source.udp_port,
                    data_tx,
                    running,
                    dropped,
                ))
            }),
            SourceKind::Synthetic => {
                let generator =
                    SyntheticGenerator::new(self.config.parser.to_scheme()?, &self.config.generator);
                let rate_hz = self.config.generator.rate_hz;
                thread::spawn(move || synthetic_thread(generator, rate_hz, data_tx, running, dropped))
            }
        };

        Ok(handle)
    }

    fn decode_loop(&self, mut decoder: StreamDecoder, data_rx: Receiver<Vec<u8>>) -> Result<CaptureSummary> {
        let active = self.config.channels.resolve(decoder.scheme().channels());
        let scaling = self.config.scaling;
        let poll_interval = Duration::from_millis(self.config.source.poll_interval_ms);
        let stats_interval = Duration::from_secs(self.config.output.stats_interval_seconds.max(1));

        let mut live = self.config.output.live.then(LiveOutput::stdout_writer);
        let mut recorder = match &self.config.output.record_dir {
            Some(dir) => Some(Recorder::create(dir)?),
            None => None,
        };

        let mut cadence = PollCadence::default();
        let mut last_stats = Instant::now();
        let mut chunk = Vec::new();

        info!("📝 Decoder started (poll every {} ms)", poll_interval.as_millis());

        loop {
            let running = self.running.load(Ordering::SeqCst);

            chunk.clear();
            let mut source_done = false;
            loop {
                match data_rx.try_recv() {
                    Ok(mut data) => chunk.append(&mut data),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        source_done = true;
                        break;
                    }
                }
            }

            let queue = chunk.len();
            let batch = decoder.feed(&chunk);
            let now = Instant::now();
            cadence.record(now);

            if !batch.is_empty() {
                let scaled = ScaledBatch::new(&batch, &active, &scaling);
                if let Some(live) = live.as_mut() {
                    live.write_batch(&scaled).context("Failed to write live output")?;
                }
                if let Some(recorder) = recorder.as_mut() {
                    recorder.write_batch(&scaled)?;
                }
            }

            if now.duration_since(last_stats) >= stats_interval {
                self.log_stats(&decoder, queue, &cadence);
                last_stats = now;
            }

            if source_done {
                info!("Source finished, all queued data decoded");
                break;
            }
            if !running {
                info!("🛑 Capture stopped");
                break;
            }

            thread::sleep(poll_interval);
        }

        if let Some(recorder) = recorder.as_mut() {
            recorder.flush()?;
            info!("💾 Recorded {} frames to {}", recorder.frames_written(), recorder.path().display());
        }

        let summary = CaptureSummary {
            decoder: decoder.stats(),
            dropped_chunks: self.dropped_chunks.load(Ordering::SeqCst),
            packet_rate: decoder.packet_rate(),
            error_rate: decoder.error_rate(),
        };

        info!("📊 Decoder final stats:");
        info!("   Bytes fed: {}", summary.decoder.bytes_fed);
        info!("   Frames decoded: {}", summary.decoder.frames);
        info!("   Bytes discarded: {}", summary.decoder.error_bytes);
        info!("   Dropped chunks: {}", summary.dropped_chunks);
        info!("   Pending bytes: {}", decoder.pending());

        Ok(summary)
    }

    fn log_stats(&self, decoder: &StreamDecoder, queue: usize, cadence: &PollCadence) {
        let mean_ms = cadence.mean().map_or(0.0, |d| d.as_secs_f64() * 1000.0);
        info!(
            "📊 {:.0} packets/s, {:.0} errors/s, queue {} bytes, pending {} bytes, poll {:.1} ms, dropped chunks {}",
            decoder.packet_rate(),
            decoder.error_rate(),
            queue,
            decoder.pending(),
            mean_ms,
            self.dropped_chunks.load(Ordering::SeqCst)
        );
    }
}

/// Open a path for reading; `-` is stdin
fn open_reader(path: &str) -> Result<Box<dyn Read + Send>> {
    if path == "-" {
        return Ok(Box::new(std::io::stdin()));
    }
    let file = std::fs::File::open(path).with_context(|| format!("Failed to open {}", path))?;
    Ok(Box::new(file))
}

/// Forward a chunk to the decoder. Returns false once the decoder is gone.
fn forward(data_tx: &Sender<Vec<u8>>, data: Vec<u8>, dropped: &AtomicU64) -> bool {
    match data_tx.try_send(data) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            error!("Data channel full, dropping chunk! The decoder can't keep up.");
            dropped.fetch_add(1, Ordering::SeqCst);
            true
        }
        Err(TrySendError::Disconnected(_)) => false,
    }
}

/// Blocking reader thread - device nodes, ptys, regular files and stdin.
/// A full channel blocks the reader until the decoder catches up.
fn reader_thread<R: Read>(
    mut reader: R,
    chunk_size: usize,
    data_tx: Sender<Vec<u8>>,
    running: Arc<AtomicBool>,
) -> Result<()> {
    let mut buffer = vec![0u8; chunk_size.max(1)];
    let mut total_bytes = 0u64;

    while running.load(Ordering::SeqCst) {
        match reader.read(&mut buffer) {
            Ok(0) => {
                info!("End of input after {} bytes", total_bytes);
                break;
            }
            Ok(n) => {
                total_bytes += n as u64;
                if data_tx.send(buffer[..n].to_vec()).is_err() {
                    debug!("Decoder gone, reader stopping");
                    break;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e).context("Read from source failed"),
        }
    }

    Ok(())
}

/// UDP receiver thread - receives datagrams and forwards their payload
async fn udp_receiver_thread(
    bind_addr: String,
    port: u16,
    data_tx: Sender<Vec<u8>>,
    running: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
) -> Result<()> {
    let socket_addr = format!("{}:{}", bind_addr, port);
    info!("🔌 Binding UDP socket to {}", socket_addr);

    let socket = UdpSocket::bind(&socket_addr)
        .await
        .with_context(|| format!("Failed to bind {}", socket_addr))?;

    let sock_ref = socket2::SockRef::from(&socket);
    sock_ref.set_recv_buffer_size(1024 * 1024)?;
    info!("✅ UDP socket bound, receive buffer set to 1MB");

    let mut buffer = vec![0u8; 65536];
    let mut datagrams = 0u64;

    while running.load(Ordering::SeqCst) {
        let timeout = Duration::from_millis(100);

        match tokio::time::timeout(timeout, socket.recv(&mut buffer)).await {
            Ok(Ok(0)) => continue,
            Ok(Ok(bytes_received)) => {
                datagrams += 1;
                if !forward(&data_tx, buffer[..bytes_received].to_vec(), &dropped) {
                    break;
                }
            }
            Ok(Err(e)) => {
                warn!("UDP receive error: {}", e);
            }
            Err(_) => {
                // Timeout - continue to check running flag
                continue;
            }
        }
    }

    info!("UDP receiver stopped after {} datagrams", datagrams);
    Ok(())
}

/// Synthetic source thread - emits generated frames at the configured rate
fn synthetic_thread(
    mut generator: SyntheticGenerator,
    rate_hz: f64,
    data_tx: Sender<Vec<u8>>,
    running: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
) -> Result<()> {
    info!("🧪 Starting synthetic source at {} frames/s", rate_hz);
    let mut pacer = Pacer::new(rate_hz, Instant::now());

    while running.load(Ordering::SeqCst) {
        let due = pacer.due(Instant::now());
        if due > 0 && !forward(&data_tx, generator.next_chunk(due)?, &dropped) {
            break;
        }
        thread::sleep(TICK);
    }

    info!("🧪 Synthetic source stopped after {} frames", generator.frames_generated());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GeneratorConfig;
    use std::io::Write;
    use streamframe::FrameScheme;
    use tempfile::NamedTempFile;

    fn file_capture(path: &std::path::Path, record_dir: Option<&std::path::Path>) -> SerialCapture {
        let mut config = AppConfig::new();
        config.source.kind = SourceKind::File;
        config.source.path = path.display().to_string();
        config.source.poll_interval_ms = 1;
        config.source.read_chunk_size = 7;
        config.output.live = false;
        config.output.record_dir = record_dir.map(|p| p.display().to_string());
        SerialCapture::new(config).unwrap()
    }

    #[test]
    fn test_file_source_decodes_everything() {
        let mut generator = SyntheticGenerator::new(
            FrameScheme::default(),
            &GeneratorConfig {
                corrupt_every: 5,
                ..GeneratorConfig::default()
            },
        );
        let mut input = NamedTempFile::new().unwrap();
        input.write_all(&generator.next_chunk(50).unwrap()).unwrap();
        input.flush().unwrap();

        let mut capture = file_capture(input.path(), None);
        let summary = capture.start().unwrap();

        assert_eq!(summary.decoder.frames, 50);
        assert_eq!(summary.decoder.error_bytes, 10);
        assert_eq!(summary.decoder.bytes_fed, 50 * 14 + 10);
        assert_eq!(summary.dropped_chunks, 0);
    }

    #[test]
    fn test_file_replay_larger_than_queue_loses_nothing() {
        let mut generator = SyntheticGenerator::new(FrameScheme::default(), &GeneratorConfig::default());
        let mut input = NamedTempFile::new().unwrap();
        input.write_all(&generator.next_chunk(2000).unwrap()).unwrap();
        input.flush().unwrap();

        let mut config = AppConfig::new();
        config.source.path = input.path().display().to_string();
        config.source.read_chunk_size = 64;
        config.source.queue_capacity = 4;
        config.source.poll_interval_ms = 1;
        config.output.live = false;

        let summary = SerialCapture::new(config).unwrap().start().unwrap();

        assert_eq!(summary.decoder.frames, 2000);
        assert_eq!(summary.decoder.bytes_fed, 2000 * 14);
        assert_eq!(summary.decoder.error_bytes, 0);
        assert_eq!(summary.dropped_chunks, 0);
        assert_eq!(summary.error_rate, 0.0);
        assert!(summary.packet_rate >= 0.0);
    }

    #[test]
    fn test_reader_stops_when_decoder_is_gone() {
        let (tx, rx) = bounded::<Vec<u8>>(1);
        drop(rx);
        let running = Arc::new(AtomicBool::new(true));

        reader_thread(&[1u8, 2, 3][..], 2, tx, running).unwrap();
    }

    #[test]
    fn test_file_source_records_frames() {
        let mut generator = SyntheticGenerator::new(FrameScheme::default(), &GeneratorConfig::default());
        let mut input = NamedTempFile::new().unwrap();
        input.write_all(&generator.next_chunk(12).unwrap()).unwrap();
        input.flush().unwrap();

        let record_dir = tempfile::tempdir().unwrap();
        let mut capture = file_capture(input.path(), Some(record_dir.path()));
        capture.start().unwrap();

        let session = std::fs::read_dir(record_dir.path())
            .unwrap()
            .next()
            .unwrap()
            .unwrap()
            .path();
        let content = std::fs::read_to_string(session.join(crate::output::RECORDING_FILE)).unwrap();
        assert_eq!(content.lines().count(), 12);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let mut capture = file_capture(std::path::Path::new("/nonexistent/serialscope/input"), None);
        assert!(capture.start().is_err());
    }

    #[test]
    fn test_invalid_scheme_rejected_up_front() {
        let mut config = AppConfig::new();
        config.parser.start_marker = "XYZ".to_string();
        assert!(SerialCapture::new(config).is_err());
    }

    #[test]
    fn test_infinite_rate_rejected_up_front() {
        let mut config = AppConfig::new();
        config.source.kind = SourceKind::Synthetic;
        config.generator.rate_hz = f64::INFINITY;
        assert!(SerialCapture::new(config).is_err());
    }

    #[test]
    fn test_synthetic_source_stops_on_flag() {
        let mut config = AppConfig::new();
        config.source.kind = SourceKind::Synthetic;
        config.source.poll_interval_ms = 5;
        config.output.live = false;
        config.generator.rate_hz = 2000.0;

        let mut capture = SerialCapture::new(config).unwrap();
        let running = capture.get_running_flag();
        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(150));
            running.store(false, Ordering::SeqCst);
        });

        let summary = capture.start().unwrap();
        stopper.join().unwrap();

        assert!(summary.decoder.frames > 0);
        assert_eq!(summary.decoder.error_bytes, 0);
    }

    #[test]
    fn test_full_channel_drops_newest() {
        let (tx, rx) = bounded::<Vec<u8>>(1);
        let dropped = AtomicU64::new(0);

        assert!(forward(&tx, vec![1], &dropped));
        assert!(forward(&tx, vec![2], &dropped));
        assert_eq!(dropped.load(Ordering::SeqCst), 1);
        assert_eq!(rx.try_recv().unwrap(), vec![1]);

        drop(rx);
        assert!(!forward(&tx, vec![3], &dropped));
    }

    #[test]
    fn test_poll_cadence_average() {
        let mut cadence = PollCadence::default();
        let t0 = Instant::now();

        cadence.record(t0);
        assert_eq!(cadence.mean(), None);

        cadence.record(t0 + Duration::from_millis(20));
        assert_eq!(cadence.mean(), Some(Duration::from_millis(20)));

        cadence.record(t0 + Duration::from_millis(60));
        let mean = cadence.mean().unwrap().as_secs_f64();
        assert!((mean - (0.020 * 0.95 + 0.040 * 0.05)).abs() < 1e-9);
    }
}
